//! # Protocols
//!
//! An immutable set of signatures plus every struct and enum they reach.
//!
//! ## Invariants
//! - **Namespaces**: Calls and notifications are numbered independently. Within each,
//!   identifiers are unique. Names are unique across both.
//! - **Type Names**: Two distinct definitions never share a name, so generated code
//!   can refer to types by name alone.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use loampack::EnumType;
use loampack::StructType;
use loampack::Type;

use crate::error::Error;
use crate::error::Result;
use crate::signature::Kind;
use crate::signature::Signature;
use crate::signature::SignatureBuilder;

/// A validated protocol.
#[derive(Debug, Clone)]
pub struct Protocol {
    name: String,
    calls: BTreeMap<u16, Signature>,
    notifications: BTreeMap<u16, Signature>,
    by_name: HashMap<String, (Kind, u16)>,
    structs: Vec<Arc<StructType>>,
    enums: Vec<Arc<EnumType>>,
}

impl Protocol {
    pub fn builder(name: impl Into<String>) -> ProtocolBuilder {
        ProtocolBuilder { name: name.into(), signatures: Vec::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up a call by identifier.
    pub fn call(&self, id: u16) -> Option<&Signature> {
        self.calls.get(&id)
    }

    /// Looks up a notification by identifier.
    pub fn notification(&self, id: u16) -> Option<&Signature> {
        self.notifications.get(&id)
    }

    /// Looks up any signature by name.
    pub fn by_name(&self, name: &str) -> Option<&Signature> {
        let (kind, id) = self.by_name.get(name)?;
        match kind {
            Kind::Call => self.calls.get(id),
            Kind::Notification(_) => self.notifications.get(id),
        }
    }

    /// Calls, sorted by identifier.
    pub fn calls(&self) -> impl Iterator<Item = &Signature> {
        self.calls.values()
    }

    /// Notifications, sorted by identifier.
    pub fn notifications(&self) -> impl Iterator<Item = &Signature> {
        self.notifications.values()
    }

    /// Every struct reachable from a signature, dependencies before dependents.
    pub fn structs(&self) -> &[Arc<StructType>] {
        &self.structs
    }

    /// Every enum reachable from a signature, in order of first use.
    pub fn enums(&self) -> &[Arc<EnumType>] {
        &self.enums
    }
}

/// Collects signature declarations.
#[derive(Debug, Clone)]
pub struct ProtocolBuilder {
    name: String,
    signatures: Vec<SignatureBuilder>,
}

impl ProtocolBuilder {
    /// Adds a call or notification.
    pub fn signature(mut self, signature: SignatureBuilder) -> Self {
        self.signatures.push(signature);
        self
    }

    /// Validates every signature and the protocol as a whole.
    ///
    /// # Errors
    /// - `DuplicateId` when an identifier repeats within a namespace.
    /// - `DuplicateSignature` when a name repeats.
    /// - `ConflictingType` when two different types share a name.
    /// - Any error of `SignatureBuilder::build`.
    pub fn build(self) -> Result<Protocol> {
        let mut protocol = Protocol {
            name: self.name,
            calls: BTreeMap::new(),
            notifications: BTreeMap::new(),
            by_name: HashMap::new(),
            structs: Vec::new(),
            enums: Vec::new(),
        };
        let mut types = TypeCollector::default();

        for builder in self.signatures {
            let signature = builder.build()?;
            let (namespace, table) = match signature.kind() {
                Kind::Call => ("call", &mut protocol.calls),
                Kind::Notification(_) => ("notification", &mut protocol.notifications),
            };
            if table.contains_key(&signature.id()) {
                return Err(Error::DuplicateId { namespace, id: signature.id() });
            }
            if protocol.by_name.contains_key(signature.name()) {
                return Err(Error::DuplicateSignature(signature.name().to_string()));
            }

            for param in signature.params() {
                types.visit(&param.ty)?;
            }
            if let Some(ty) = signature.returns() {
                types.visit(ty)?;
            }

            protocol.by_name.insert(signature.name().to_string(), (signature.kind(), signature.id()));
            table.insert(signature.id(), signature);
        }

        protocol.structs = types.structs;
        protocol.enums = types.enums;
        Ok(protocol)
    }
}

#[derive(Default)]
struct TypeCollector {
    structs: Vec<Arc<StructType>>,
    enums: Vec<Arc<EnumType>>,
}

impl TypeCollector {
    fn visit(&mut self, ty: &Type) -> Result<()> {
        match ty {
            Type::Enum(e) => {
                if let Some(seen) = self.enums.iter().find(|s| s.name() == e.name()) {
                    if **seen != **e {
                        return Err(Error::ConflictingType(e.name().to_string()));
                    }
                    return Ok(());
                }
                if self.structs.iter().any(|s| s.name() == e.name()) {
                    return Err(Error::ConflictingType(e.name().to_string()));
                }
                self.enums.push(e.clone());
            }
            Type::Struct(s) => {
                if let Some(seen) = self.structs.iter().find(|seen| seen.name() == s.name()) {
                    if **seen != **s {
                        return Err(Error::ConflictingType(s.name().to_string()));
                    }
                    return Ok(());
                }
                for field in s.fields() {
                    self.visit(&field.ty)?;
                }
                if self.enums.iter().any(|e| e.name() == s.name()) {
                    return Err(Error::ConflictingType(s.name().to_string()));
                }
                self.structs.push(s.clone());
            }
            Type::List(elem) => self.visit(elem)?,
            _ => {}
        }
        Ok(())
    }
}
