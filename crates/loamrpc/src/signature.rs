//! # Signatures
//!
//! The declared shape of one call or notification: identifier, parameters,
//! return type and, for notifications, the direction of travel.
//!
//! ## Invariants
//! - **Tuple Layout**: Parameters are laid out exactly like an anonymous struct, so the
//!   derived-length rule covers a single variable-length parameter.
//! - **Byte Aligned**: Parameters and returns are never bare bit-fields.

use std::sync::Arc;

use loampack::decode_exact;
use loampack::encode;
use loampack::Error as PackError;
use loampack::Field;
use loampack::StructType;
use loampack::Type;
use loampack::Value;

use crate::error::Error;
use crate::error::Result;

/// Which end of the link a runtime plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Host,
    Device,
}

impl Role {
    /// The role on the other end of the link.
    pub fn peer(self) -> Role {
        match self {
            Role::Host => Role::Device,
            Role::Device => Role::Host,
        }
    }
}

/// Direction of travel of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Device to host.
    ToHost,
    /// Host to device.
    ToDevice,
    /// Either end may originate it.
    TwoWay,
}

impl Direction {
    /// True if an endpoint playing `role` may send this notification.
    pub fn sent_by(self, role: Role) -> bool {
        matches!(
            (self, role),
            (Direction::TwoWay, _) | (Direction::ToHost, Role::Device) | (Direction::ToDevice, Role::Host)
        )
    }

    /// True if an endpoint playing `role` should deliver this notification.
    pub fn received_by(self, role: Role) -> bool {
        self.sent_by(role.peer())
    }
}

/// Call or notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Call,
    Notification(Direction),
}

/// One remote procedure or notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    id: u16,
    name: String,
    kind: Kind,
    params: Arc<StructType>,
    returns: Option<Type>,
}

impl Signature {
    /// Starts declaring a call.
    pub fn call(id: u16, name: impl Into<String>) -> SignatureBuilder {
        SignatureBuilder::new(id, name.into(), Kind::Call)
    }

    /// Starts declaring a notification.
    pub fn notification(id: u16, name: impl Into<String>, direction: Direction) -> SignatureBuilder {
        SignatureBuilder::new(id, name.into(), Kind::Notification(direction))
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn is_call(&self) -> bool {
        self.kind == Kind::Call
    }

    /// Direction of a notification, `None` for calls.
    pub fn direction(&self) -> Option<Direction> {
        match self.kind {
            Kind::Call => None,
            Kind::Notification(d) => Some(d),
        }
    }

    /// Parameters in declaration order.
    pub fn params(&self) -> &[Field] {
        self.params.fields()
    }

    /// Wire layout of the parameter tuple.
    pub fn param_layout(&self) -> &StructType {
        &self.params
    }

    /// Return type, `None` for void.
    pub fn returns(&self) -> Option<&Type> {
        self.returns.as_ref()
    }

    /// Encodes an argument list as the parameter tuple.
    pub fn encode_args(&self, args: &[Value]) -> Result<Vec<u8>> {
        let params = self.params();
        if args.len() != params.len() {
            return Err(Error::ArgumentCount {
                signature: self.name.clone(),
                expected: params.len(),
                found: args.len(),
            });
        }
        let tuple = Value::Struct(params.iter().map(|p| p.name.clone()).zip(args.iter().cloned()).collect());
        Ok(encode(&Type::Struct(self.params.clone()), &tuple)?)
    }

    /// Decodes a request or notification payload into its arguments.
    pub fn decode_args(&self, payload: &[u8]) -> Result<Vec<Value>> {
        match decode_exact(&Type::Struct(self.params.clone()), payload)? {
            Value::Struct(members) => Ok(members.into_iter().map(|(_, v)| v).collect()),
            other => Err(Error::Codec(PackError::TypeMismatch {
                expected: self.params.name().to_string(),
                found: other.kind().to_string(),
            })),
        }
    }

    /// Encodes a response payload.
    pub fn encode_return(&self, value: Option<&Value>) -> Result<Vec<u8>> {
        match (&self.returns, value) {
            (Some(ty), Some(value)) => Ok(encode(ty, value)?),
            (None, None) => Ok(Vec::new()),
            (Some(_), None) => Err(Error::MissingReturn(self.name.clone())),
            (None, Some(_)) => Err(Error::UnexpectedPayload { signature: self.name.clone(), len: 0 }),
        }
    }

    /// Decodes a response payload. Void signatures expect an empty payload.
    pub fn decode_return(&self, payload: &[u8]) -> Result<Option<Value>> {
        match &self.returns {
            Some(ty) => Ok(Some(decode_exact(ty, payload)?)),
            None if payload.is_empty() => Ok(None),
            None => Err(Error::UnexpectedPayload { signature: self.name.clone(), len: payload.len() }),
        }
    }
}

/// Declares a `Signature`.
#[derive(Debug, Clone)]
pub struct SignatureBuilder {
    id: u16,
    name: String,
    kind: Kind,
    params: Vec<Field>,
    returns: Option<Type>,
}

impl SignatureBuilder {
    fn new(id: u16, name: String, kind: Kind) -> Self {
        Self { id, name, kind, params: Vec::new(), returns: None }
    }

    pub fn param(mut self, name: impl Into<String>, ty: Type) -> Self {
        self.params.push(Field::new(name, ty));
        self
    }

    pub fn returns(mut self, ty: Type) -> Self {
        self.returns = Some(ty);
        self
    }

    /// Validates the declaration.
    ///
    /// # Errors
    /// - `BitfieldParameter` for a bare bit-field parameter or return.
    /// - `NotificationReturns` for a notification with a return type.
    /// - `Codec` for duplicate parameter names or more than one variable-length parameter.
    pub fn build(self) -> Result<Signature> {
        for param in &self.params {
            if param.ty.is_bitfield() {
                return Err(Error::BitfieldParameter { signature: self.name, name: param.name.clone() });
            }
        }
        if let Some(ty) = &self.returns {
            if matches!(self.kind, Kind::Notification(_)) {
                return Err(Error::NotificationReturns(self.name));
            }
            ty.check()?;
            if ty.is_bitfield() {
                return Err(Error::BitfieldParameter { signature: self.name, name: "return".into() });
            }
        }
        let params = StructType::tuple(self.name.clone(), self.params)?;
        Ok(Signature {
            id: self.id,
            name: self.name,
            kind: self.kind,
            params: Arc::new(params),
            returns: self.returns,
        })
    }
}
