//! # Rust Target
//!
//! One module body, meant to be pulled in with `include!`. It refers to `loampack` and
//! `loamrun` by absolute path and declares no `use` items or inner attributes.
//!
//! - Enums become fieldless Rust enums. Byte-aligned ones implement `loampack::Pack`;
//!   bit-backed ones only ever travel inside a struct's bit run.
//! - Structs and parameter tuples (`<Name>Args`) become plain structs implementing
//!   `loampack::Pack`, member by member, in wire order.
//! - `Client` wraps `loamrun::Peer` with one typed method per call and notification.
//! - `Handlers`, `dispatch` and `serve` answer requests on the device side.

use loampack::Segment;
use loampack::StructType;
use loampack::Type;
use loamrpc::Protocol;
use loamrpc::Signature;

use crate::emit::Emitter;
use crate::naming::camel_case;
use crate::naming::rust_ident;
use crate::naming::snake_case;
use crate::naming::upper_snake;
use crate::GeneratedFile;
use crate::Target;
use crate::BANNER;

#[derive(Debug, Clone, Copy, Default)]
pub struct RustTarget;

impl Target for RustTarget {
    fn name(&self) -> &'static str {
        "rust"
    }

    fn generate(&self, protocol: &Protocol) -> Vec<GeneratedFile> {
        let name = format!("{}.rs", snake_case(protocol.name()));
        vec![GeneratedFile::new(name, RustProtocol { protocol }.module())]
    }
}

struct RustProtocol<'a> {
    protocol: &'a Protocol,
}

/// Locals used by generated `unpack` bodies.
const RESERVED_LOCALS: &[&str] = &["buf", "at", "var_len", "run"];

fn local(field: &str) -> String {
    if RESERVED_LOCALS.contains(&field) {
        format!("{}_", field)
    } else {
        rust_ident(field)
    }
}

fn uint_for_bits(width: u32) -> &'static str {
    match width {
        0..=8 => "u8",
        9..=16 => "u16",
        17..=32 => "u32",
        _ => "u64",
    }
}

fn rust_type(ty: &Type) -> String {
    match ty {
        Type::U8 => "u8".into(),
        Type::I8 => "i8".into(),
        Type::U16 => "u16".into(),
        Type::I16 => "i16".into(),
        Type::U32 => "u32".into(),
        Type::I32 => "i32".into(),
        Type::U64 => "u64".into(),
        Type::I64 => "i64".into(),
        Type::F32 => "f32".into(),
        Type::Bits(w) => uint_for_bits(*w).into(),
        Type::Enum(e) => e.name().into(),
        Type::Struct(s) => s.name().into(),
        Type::String => "String".into(),
        Type::Bytes => "Vec<u8>".into(),
        Type::List(elem) => format!("Vec<{}>", rust_type(elem)),
    }
}

/// An enum constant, usable both as an expression and as a pattern.
fn int_literal(value: i64) -> String {
    if value == i64::MIN {
        "i64::MIN".into()
    } else {
        value.to_string()
    }
}

fn args_name(sig: &Signature) -> String {
    format!("{}Args", camel_case(sig.name()))
}

fn id_const(sig: &Signature) -> String {
    format!("{}_ID", upper_snake(sig.name()))
}

fn fixed_size_expr(layout: &StructType) -> String {
    match layout.fixed_size() {
        Some(size) => format!("Some({})", size),
        None => "None".into(),
    }
}

impl RustProtocol<'_> {
    fn module(&self) -> String {
        let mut e = Emitter::new();
        e.line(format!("// {} from protocol \"{}\". Do not edit.", BANNER, self.protocol.name()));
        e.blank();

        self.ids(&mut e);
        for en in self.protocol.enums() {
            self.enumeration(&mut e, en);
        }
        for s in self.protocol.structs() {
            self.structure(&mut e, s.name(), s);
        }
        for sig in self.protocol.calls().chain(self.protocol.notifications()) {
            self.structure(&mut e, &args_name(sig), sig.param_layout());
        }
        self.client(&mut e);
        self.posts(&mut e);
        self.handlers(&mut e);
        e.finish()
    }

    fn ids(&self, e: &mut Emitter) {
        for sig in self.protocol.calls().chain(self.protocol.notifications()) {
            let kind = if sig.is_call() { "call" } else { "notification" };
            e.line(format!("/// Identifier of {} `{}`.", kind, sig.name()));
            e.line(format!("pub const {}: u16 = 0x{:04X};", id_const(sig), sig.id()));
        }
        e.blank();
        let calls: Vec<String> = self.protocol.calls().map(id_const).collect();
        e.line("/// Every call, sorted by identifier.");
        e.line(format!("pub const CALL_IDS: [u16; {}] = [{}];", calls.len(), calls.join(", ")));
        e.blank();
    }

    // ========================================================================
    //  TYPES
    // ========================================================================

    fn enumeration(&self, e: &mut Emitter, en: &loampack::EnumType) {
        let name = en.name();
        let variants: Vec<(String, i64)> = en.constants().iter().map(|(c, v)| (rust_ident(c), *v)).collect();

        e.line("#[allow(non_camel_case_types, clippy::upper_case_acronyms)]");
        e.line("#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]");
        e.block(format!("pub enum {} {{", name), "}", |e| {
            for (variant, _) in &variants {
                e.line(format!("{},", variant));
            }
        });
        e.blank();

        e.block(format!("impl {} {{", name), "}", |e| {
            let all: Vec<String> = variants.iter().map(|(v, _)| format!("{}::{}", name, v)).collect();
            e.line(format!("pub const ALL: [{}; {}] = [{}];", name, all.len(), all.join(", ")));
            e.blank();
            e.block("pub fn to_raw(self) -> i64 {", "}", |e| {
                e.block("match self {", "}", |e| {
                    for (variant, value) in &variants {
                        e.line(format!("{}::{} => {},", name, variant, int_literal(*value)));
                    }
                });
            });
            e.blank();
            e.block("pub fn from_raw(raw: i64) -> Option<Self> {", "}", |e| {
                e.block("match raw {", "}", |e| {
                    for (variant, value) in &variants {
                        e.line(format!("{} => Some({}::{}),", int_literal(*value), name, variant));
                    }
                    e.line("_ => None,");
                });
            });
            e.blank();
            e.line("/// The constant's name as declared.");
            e.block("pub fn name(self) -> &'static str {", "}", |e| {
                e.block("match self {", "}", |e| {
                    for ((variant, _), (declared, _)) in variants.iter().zip(en.constants()) {
                        e.line(format!("{}::{} => \"{}\",", name, variant, declared));
                    }
                });
            });
        });
        e.blank();

        if en.backing().is_bitfield() {
            return;
        }
        let backing = rust_type(en.backing());
        let size = en.backing().fixed_size().unwrap_or(0);
        e.block(format!("impl loampack::Pack for {} {{", name), "}", |e| {
            e.line(format!("const FIXED_SIZE: Option<usize> = Some({});", size));
            e.blank();
            e.block("fn pack(&self, buf: &mut Vec<u8>) -> loampack::Result<()> {", "}", |e| {
                e.line(format!("loampack::Pack::pack(&(self.to_raw() as {}), buf)", backing));
            });
            e.blank();
            e.block("fn unpack(buf: &[u8]) -> loampack::Result<(Self, usize)> {", "}", |e| {
                e.line(format!("let (raw, used) = <{} as loampack::Pack>::unpack(buf)?;", backing));
                e.block("match Self::from_raw(raw as i64) {", "}", |e| {
                    e.line("Some(value) => Ok((value, used)),");
                    e.line(format!(
                        "None => Err(loampack::Error::InvalidEnumValue {{ name: \"{}\".to_string(), value: raw as i64 }}),",
                        name
                    ));
                });
            });
        });
        e.blank();
    }

    fn structure(&self, e: &mut Emitter, name: &str, layout: &StructType) {
        let fields = layout.fields();
        e.line("#[derive(Debug, Clone, PartialEq)]");
        if fields.is_empty() {
            e.line(format!("pub struct {} {{}}", name));
        } else {
            e.block(format!("pub struct {} {{", name), "}", |e| {
                for field in fields {
                    e.line(format!("pub {}: {},", rust_ident(&field.name), rust_type(&field.ty)));
                }
            });
        }
        e.blank();

        e.block(format!("impl loampack::Pack for {} {{", name), "}", |e| {
            e.line(format!("const FIXED_SIZE: Option<usize> = {};", fixed_size_expr(layout)));
            e.blank();
            self.pack_body(e, layout);
            e.blank();
            self.unpack_body(e, layout);
        });
        e.blank();
    }

    fn pack_body(&self, e: &mut Emitter, layout: &StructType) {
        let fields = layout.fields();
        let buf = if fields.is_empty() { "_buf" } else { "buf" };
        e.block(format!("fn pack(&self, {}: &mut Vec<u8>) -> loampack::Result<()> {{", buf), "}", |e| {
            for segment in layout.segments() {
                match segment {
                    Segment::Member(i) => {
                        let field = &fields[*i];
                        e.line(format!("loampack::Pack::pack(&self.{}, buf)?;", rust_ident(&field.name)));
                    }
                    Segment::Bits { members, .. } => {
                        e.block("{", "}", |e| {
                            e.line("let mut run = loampack::BitWriter::new();");
                            for field in &fields[members.clone()] {
                                let width = field.ty.bit_width().unwrap_or(0);
                                let member = format!("self.{}", rust_ident(&field.name));
                                let raw = match &field.ty {
                                    Type::Enum(_) => format!("{}.to_raw() as u64", member),
                                    _ => format!("{} as u64", member),
                                };
                                e.line(format!("run.put({}, {})?;", raw, width));
                            }
                            e.line("buf.extend_from_slice(&run.finish());");
                        });
                    }
                }
            }
            e.line("Ok(())");
        });
    }

    fn unpack_body(&self, e: &mut Emitter, layout: &StructType) {
        let fields = layout.fields();
        if fields.is_empty() {
            e.block("fn unpack(_buf: &[u8]) -> loampack::Result<(Self, usize)> {", "}", |e| {
                e.line("Ok((Self {}, 0))");
            });
            return;
        }

        e.block("fn unpack(buf: &[u8]) -> loampack::Result<(Self, usize)> {", "}", |e| {
            if layout.variable_member().is_some() {
                e.line(format!("let var_len = loampack::derived_len(buf.len(), {})?;", layout.fixed_bytes()));
            }
            e.line("let mut at = 0;");
            for segment in layout.segments() {
                match segment {
                    Segment::Member(i) => {
                        let field = &fields[*i];
                        let size = match field.ty.fixed_size() {
                            Some(size) if layout.variable_member() != Some(*i) => size.to_string(),
                            _ => "var_len".to_string(),
                        };
                        e.line(format!(
                            "let {} = <{} as loampack::Pack>::unpack(loampack::window(buf, at, {})?)?.0;",
                            local(&field.name),
                            rust_type(&field.ty),
                            size
                        ));
                        e.line(format!("at += {};", size));
                    }
                    Segment::Bits { members, size } => {
                        e.line(format!("let mut run = loampack::BitReader::new(loampack::window(buf, at, {})?);", size));
                        for field in &fields[members.clone()] {
                            let width = field.ty.bit_width().unwrap_or(0);
                            let var = local(&field.name);
                            match &field.ty {
                                Type::Enum(en) => {
                                    let raw = format!("{}_raw", var.trim_start_matches("r#"));
                                    e.line(format!("let {} = run.take({})? as i64;", raw, width));
                                    e.line(format!(
                                        "let {} = {}::from_raw({}).ok_or_else(|| loampack::Error::InvalidEnumValue {{ name: \"{}\".to_string(), value: {} }})?;",
                                        var,
                                        en.name(),
                                        raw,
                                        en.name(),
                                        raw
                                    ));
                                }
                                ty => {
                                    e.line(format!("let {} = run.take({})? as {};", var, width, rust_type(ty)));
                                }
                            }
                        }
                        e.line(format!("at += {};", size));
                    }
                }
            }
            let members: Vec<String> = fields
                .iter()
                .map(|f| {
                    let var = local(&f.name);
                    let field = rust_ident(&f.name);
                    if var == field { field } else { format!("{}: {}", field, var) }
                })
                .collect();
            e.line(format!("Ok((Self {{ {} }}, at))", members.join(", ")));
        });
    }

    // ========================================================================
    //  HOST SIDE
    // ========================================================================

    fn client(&self, e: &mut Emitter) {
        e.line("/// Typed calls and notifications over a `loamrun::Peer`.");
        e.line("#[derive(Clone, Copy)]");
        e.block("pub struct Client<'a> {", "}", |e| {
            e.line("peer: &'a loamrun::Peer,");
        });
        e.blank();

        e.block("impl<'a> Client<'a> {", "}", |e| {
            e.block("pub fn new(peer: &'a loamrun::Peer) -> Self {", "}", |e| {
                e.line("Self { peer }");
            });
            e.blank();
            e.block("pub fn peer(&self) -> &'a loamrun::Peer {", "}", |e| {
                e.line("self.peer");
            });

            for sig in self.protocol.calls() {
                e.blank();
                self.call_method(e, sig);
            }
            for sig in self.protocol.notifications() {
                e.blank();
                self.notify_method(e, sig);
                e.blank();
                self.on_method(e, sig);
            }
        });
        e.blank();
    }

    fn param_list(sig: &Signature) -> String {
        sig.params()
            .iter()
            .map(|p| format!(", {}: {}", rust_ident(&p.name), rust_type(&p.ty)))
            .collect()
    }

    fn args_init(sig: &Signature) -> String {
        let names: Vec<String> = sig.params().iter().map(|p| rust_ident(&p.name)).collect();
        if names.is_empty() {
            format!("{} {{}}", args_name(sig))
        } else {
            format!("{} {{ {} }}", args_name(sig), names.join(", "))
        }
    }

    fn call_method(&self, e: &mut Emitter, sig: &Signature) {
        let ret = sig.returns().map(rust_type).unwrap_or_else(|| "()".into());
        e.block(
            format!(
                "pub async fn {}(&self{}) -> loamrun::peer::Result<{}> {{",
                rust_ident(&snake_case(sig.name())),
                Self::param_list(sig),
                ret
            ),
            "}",
            |e| {
                e.line(format!("let args = loampack::Pack::to_bytes(&{})?;", Self::args_init(sig)));
                e.line(format!("let payload = self.peer.call_raw({}, &args).await?;", id_const(sig)));
                match sig.returns() {
                    Some(_) => e.line(format!("loamrun::peer::unpack_reply(\"{}\", &payload)", sig.name())),
                    None => e.line(format!("loamrun::peer::expect_empty_reply(\"{}\", &payload)", sig.name())),
                }
            },
        );
    }

    fn notify_method(&self, e: &mut Emitter, sig: &Signature) {
        e.block(
            format!(
                "pub async fn notify_{}(&self{}) -> loamrun::peer::Result<()> {{",
                snake_case(sig.name()),
                Self::param_list(sig)
            ),
            "}",
            |e| {
                e.line(format!("let args = loampack::Pack::to_bytes(&{})?;", Self::args_init(sig)));
                e.line(format!("self.peer.notify_raw({}, &args).await", id_const(sig)));
            },
        );
    }

    fn on_method(&self, e: &mut Emitter, sig: &Signature) {
        e.line("/// Payloads that fail to decode are dropped.");
        e.line(format!("pub fn on_{}<F>(&self, callback: F) -> loamrun::peer::Result<loamrun::Subscription>", snake_case(sig.name())));
        e.line("where");
        e.indent();
        e.line(format!("F: Fn({}) + Send + Sync + 'static,", args_name(sig)));
        e.dedent();
        e.block("{", "}", |e| {
            e.block(format!("self.peer.subscribe_raw({}, move |payload| {{", id_const(sig)), "})", |e| {
                e.block(
                    format!("if let Ok(args) = <{} as loampack::Pack>::from_bytes(payload) {{", args_name(sig)),
                    "}",
                    |e| e.line("callback(args);"),
                );
            });
        });
    }

    /// Synchronous senders usable from callbacks and handlers.
    fn posts(&self, e: &mut Emitter) {
        for sig in self.protocol.notifications() {
            e.line(format!("/// Queues notification `{}` without waiting.", sig.name()));
            e.block(
                format!(
                    "pub fn post_{}(handle: &loamrun::PeerHandle, args: &{}) -> loamrun::peer::Result<()> {{",
                    snake_case(sig.name()),
                    args_name(sig)
                ),
                "}",
                |e| {
                    e.line(format!("handle.post_raw({}, &loampack::Pack::to_bytes(args)?)", id_const(sig)));
                },
            );
            e.blank();
        }
    }

    // ========================================================================
    //  DEVICE SIDE
    // ========================================================================

    fn handlers(&self, e: &mut Emitter) {
        e.line("/// Implementation of every call, for device-side peers.");
        e.line("///");
        e.line("/// An `Err` is answered with an Error frame carrying the message.");
        e.block("pub trait Handlers: Send + Sync + 'static {", "}", |e| {
            for sig in self.protocol.calls() {
                let ret = sig.returns().map(rust_type).unwrap_or_else(|| "()".into());
                e.line(format!(
                    "fn {}(&self{}) -> Result<{}, String>;",
                    rust_ident(&snake_case(sig.name())),
                    Self::param_list(sig),
                    ret
                ));
            }
        });
        e.blank();

        for sig in self.protocol.calls() {
            let name = snake_case(sig.name());
            e.block(
                format!(
                    "fn dispatch_{}<H: Handlers + ?Sized>(handlers: &H, payload: &[u8]) -> Result<Vec<u8>, String> {{",
                    name
                ),
                "}",
                |e| {
                    let args: Vec<String> =
                        sig.params().iter().map(|p| format!("args.{}", rust_ident(&p.name))).collect();
                    if args.is_empty() {
                        e.block("if !payload.is_empty() {", "}", |e| {
                            e.line(format!(
                                "return Err(format!(\"{}: unexpected {{}} byte payload\", payload.len()));",
                                sig.name()
                            ));
                        });
                    } else {
                        e.line(format!(
                            "let args = <{} as loampack::Pack>::from_bytes(payload).map_err(|e| format!(\"bad arguments: {{}}\", e))?;",
                            args_name(sig)
                        ));
                    }
                    let call = format!("handlers.{}({})", rust_ident(&name), args.join(", "));
                    match sig.returns() {
                        Some(_) => {
                            e.line(format!("let ret = {}?;", call));
                            e.line("loampack::Pack::to_bytes(&ret).map_err(|e| format!(\"bad return value: {}\", e))");
                        }
                        None => {
                            e.line(format!("{}?;", call));
                            e.line("Ok(Vec::new())");
                        }
                    }
                },
            );
            e.blank();
        }

        e.line("/// Runs the handler of call `id`, or returns `None` for an unknown call.");
        e.block(
            "pub fn dispatch<H: Handlers + ?Sized>(handlers: &H, id: u16, payload: &[u8]) -> Option<Result<Vec<u8>, String>> {",
            "}",
            |e| {
                if self.protocol.calls().next().is_none() {
                    e.line("let _ = (handlers, id, payload);");
                    e.line("None");
                    return;
                }
                e.block("match id {", "}", |e| {
                    for sig in self.protocol.calls() {
                        e.line(format!(
                            "{} => Some(dispatch_{}(handlers, payload)),",
                            id_const(sig),
                            snake_case(sig.name())
                        ));
                    }
                    e.line("_ => None,");
                });
            },
        );
        e.blank();

        e.line("/// Registers `handlers` for every call on `peer`.");
        e.block(
            "pub fn serve<H: Handlers>(peer: &loamrun::Peer, handlers: std::sync::Arc<H>) -> loamrun::peer::Result<()> {",
            "}",
            |e| {
                e.block("for id in CALL_IDS {", "}", |e| {
                    e.line("let handlers = handlers.clone();");
                    e.block("peer.serve_raw(id, move |payload| match dispatch(&*handlers, id, payload) {", "})?;", |e| {
                        e.line("Some(result) => result,");
                        e.line("None => Err(format!(\"no handler for call {:#06x}\", id)),");
                    });
                });
                e.line("Ok(())");
            },
        );
    }
}
