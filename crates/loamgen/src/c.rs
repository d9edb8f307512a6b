//! # C Target
//!
//! A header and a source file for the device firmware, C99 with no allocation.
//!
//! ## Conventions
//!
//! Every symbol starts with the snake-cased protocol name, written `p` below.
//!
//! - **Spans**: strings, byte buffers and lists are `struct p_span` views of raw wire
//!   bytes. Unpacking points them into the receive buffer. List elements are read and
//!   written through `p_list_<elem>_at` and `p_list_<elem>_set`.
//! - **Structs**: `Name_size`, `Name_pack` and `Name_unpack`. Unpack decodes a struct
//!   spanning exactly `len` bytes and returns 0 or a negative error code.
//! - **Handlers**: the firmware defines `p_handle_<call>` for every call and `p_on_<notification>`
//!   for every notification it receives. A non-zero handler result is answered with an
//!   Error frame. Variable-length returns are allocated from the `struct p_arena` given
//!   to `p_process`, which resets it per frame.
//! - **Notifications**: `p_store_<notification>` writes a complete frame for the firmware
//!   to send.
//!
//! `p_process` takes one frame without its length prefix and returns the length of the
//! reply frame written to `tx`, 0 when there is nothing to send, or a negative error code.

use loampack::Segment;
use loampack::StructType;
use loampack::Type;
use loamrpc::Protocol;
use loamrpc::Signature;

use crate::emit::Emitter;
use crate::naming::snake_case;
use crate::naming::upper_snake;
use crate::GeneratedFile;
use crate::Target;
use crate::BANNER;

#[derive(Debug, Clone, Copy, Default)]
pub struct CTarget;

impl Target for CTarget {
    fn name(&self) -> &'static str {
        "c"
    }

    fn generate(&self, protocol: &Protocol) -> Vec<GeneratedFile> {
        let c = CProtocol::new(protocol);
        vec![
            GeneratedFile::new(format!("{}.h", c.p), c.header()),
            GeneratedFile::new(format!("{}.c", c.p), c.source()),
        ]
    }
}

struct CProtocol<'a> {
    protocol: &'a Protocol,
    /// Lower-case symbol prefix.
    p: String,
    /// Upper-case macro prefix.
    up: String,
}

/// A struct to emit: either a declared type or a parameter tuple.
struct CStruct<'a> {
    tag: String,
    layout: &'a StructType,
}

impl CStruct<'_> {
    fn fixed_macro(&self) -> String {
        format!("{}_FIXED", upper_snake(&self.tag))
    }
}

fn list_width(ty: &Type) -> Option<usize> {
    match ty {
        Type::List(elem) => Some(elem.fixed_size().unwrap_or(1)),
        _ => None,
    }
}

fn int_ctype(ty: &Type) -> Option<&'static str> {
    let name = match ty {
        Type::U8 => "uint8_t",
        Type::I8 => "int8_t",
        Type::U16 => "uint16_t",
        Type::I16 => "int16_t",
        Type::U32 => "uint32_t",
        Type::I32 => "int32_t",
        Type::U64 => "uint64_t",
        Type::I64 => "int64_t",
        Type::Bits(w) => uint_for_bits(*w),
        _ => return None,
    };
    Some(name)
}

fn uint_for_bits(width: u32) -> &'static str {
    match width {
        0..=8 => "uint8_t",
        9..=16 => "uint16_t",
        17..=32 => "uint32_t",
        _ => "uint64_t",
    }
}

fn is_span(ty: &Type) -> bool {
    matches!(ty, Type::String | Type::Bytes | Type::List(_))
}

/// C literal for an enum constant. `i64::MIN` has no literal of its own.
fn c_literal(value: i64) -> String {
    if value == i64::MIN {
        "(-9223372036854775807LL - 1)".to_string()
    } else if value > i32::MAX as i64 || value < i32::MIN as i64 {
        format!("({}LL)", value)
    } else {
        format!("({})", value)
    }
}

impl<'a> CProtocol<'a> {
    fn new(protocol: &'a Protocol) -> Self {
        let p = snake_case(protocol.name());
        let up = p.to_ascii_uppercase();
        Self { protocol, p, up }
    }

    // ========================================================================
    //  NAMES
    // ========================================================================

    /// Declared type of a value of `ty`.
    fn c_type(&self, ty: &Type) -> String {
        match ty {
            Type::F32 => "float".to_string(),
            Type::Enum(e) => e.name().to_string(),
            Type::Struct(s) => format!("struct {}", s.name()),
            _ if is_span(ty) => format!("struct {}_span", self.p),
            _ => int_ctype(ty).unwrap_or("uint64_t").to_string(),
        }
    }

    fn args_tag(&self, sig: &Signature) -> String {
        format!("{}_{}_args", self.p, snake_case(sig.name()))
    }

    fn id_macro(&self, sig: &Signature) -> String {
        format!("{}_{}_ID", self.up, upper_snake(sig.name()))
    }

    /// Key naming the list accessors for an element type.
    fn elem_key(ty: &Type) -> String {
        match ty {
            Type::Enum(e) => snake_case(e.name()),
            Type::Struct(s) => snake_case(s.name()),
            other => other.to_string(),
        }
    }

    fn structs(&self) -> Vec<CStruct<'a>> {
        let mut out: Vec<CStruct<'a>> = self
            .protocol
            .structs()
            .iter()
            .map(|s| CStruct { tag: s.name().to_string(), layout: s.as_ref() })
            .collect();
        for sig in self.protocol.calls().chain(self.protocol.notifications()) {
            if !sig.params().is_empty() {
                out.push(CStruct { tag: self.args_tag(sig), layout: sig.param_layout() });
            }
        }
        out
    }

    /// Every distinct list element type, in order of first use.
    fn list_elems(&self) -> Vec<Type> {
        let mut elems: Vec<Type> = Vec::new();
        let mut visit = |ty: &Type| {
            if let Type::List(elem) = ty {
                if !elems.iter().any(|seen| seen == elem.as_ref()) {
                    elems.push(elem.as_ref().clone());
                }
            }
        };
        for s in self.structs() {
            for field in s.layout.fields() {
                visit(&field.ty);
            }
        }
        for sig in self.protocol.calls() {
            if let Some(ty) = sig.returns() {
                visit(ty);
            }
        }
        elems
    }

    // ========================================================================
    //  SCALARS
    // ========================================================================

    /// Expression reading a byte-aligned scalar or enum at `ptr`.
    fn read_expr(&self, ty: &Type, ptr: &str) -> String {
        match ty {
            Type::F32 => format!("{}_get_f32({})", self.p, ptr),
            Type::Enum(e) => {
                let size = e.backing().fixed_size().unwrap_or(0);
                format!("({}){}_get_le({}, {})", e.name(), self.p, ptr, size)
            }
            _ => {
                let size = ty.fixed_size().unwrap_or(0);
                format!("({}){}_get_le({}, {})", self.c_type(ty), self.p, ptr, size)
            }
        }
    }

    /// Statement writing a byte-aligned scalar or enum at `ptr`.
    fn write_stmt(&self, ty: &Type, ptr: &str, value: &str) -> String {
        match ty {
            Type::F32 => format!("{}_put_f32({}, {});", self.p, ptr, value),
            _ => {
                let size = ty.fixed_size().unwrap_or(0);
                format!("{}_put_le({}, (uint64_t){}, {});", self.p, ptr, value, size)
            }
        }
    }

    // ========================================================================
    //  HEADER
    // ========================================================================

    fn header(&self) -> String {
        let p = &self.p;
        let up = &self.up;
        let mut e = Emitter::new();

        e.line(format!("/* {} from protocol \"{}\". Do not edit. */", BANNER, self.protocol.name()));
        e.line(format!("#ifndef {}_H", up));
        e.line(format!("#define {}_H", up));
        e.blank();
        e.line("#include <stddef.h>");
        e.line("#include <stdint.h>");
        e.line("#include <string.h>");
        e.blank();
        e.line("#ifdef __cplusplus");
        e.line("extern \"C\" {");
        e.line("#endif");
        e.blank();

        e.line(format!("#define {}_HEADER_LEN 4", up));
        e.blank();
        e.line(format!("#define {}_REQUEST 1", up));
        e.line(format!("#define {}_RESPONSE 2", up));
        e.line(format!("#define {}_NOTIFICATION 3", up));
        e.line(format!("#define {}_ERROR 4", up));
        e.line(format!("#define {}_UNSUPPORTED 5", up));
        e.blank();
        e.line(format!("#define {}_TRUNCATED (-1)", up));
        e.line(format!("#define {}_INVALID_ENUM (-2)", up));
        e.line(format!("#define {}_NO_SPACE (-3)", up));
        e.line(format!("#define {}_TRAILING (-4)", up));
        e.blank();

        e.block(format!("struct {}_span {{", p), "};", |e| {
            e.line("uint8_t *ptr;");
            e.line("size_t len;");
        });
        e.blank();
        e.line("/* Scratch memory for variable-length return values. Reset for every frame. */");
        e.block(format!("struct {}_arena {{", p), "};", |e| {
            e.line("uint8_t *buf;");
            e.line("size_t cap;");
            e.line("size_t used;");
        });
        e.blank();
        e.line(format!("uint8_t *{p}_alloc(struct {p}_arena *arena, size_t len);"));
        e.blank();

        self.scalar_helpers(&mut e);

        for en in self.protocol.enums() {
            let backing = int_ctype(en.backing()).unwrap_or("int64_t");
            e.line(format!("typedef {} {};", backing, en.name()));
            for (constant, value) in en.constants() {
                e.line(format!(
                    "#define {}_{} {}",
                    upper_snake(en.name()),
                    constant.to_ascii_uppercase(),
                    c_literal(*value)
                ));
            }
            e.line(format!("int {}_valid(int64_t value);", en.name()));
            e.blank();
        }

        for s in self.structs() {
            e.block(format!("struct {} {{", s.tag), "};", |e| {
                for field in s.layout.fields() {
                    e.line(format!("{} {};", self.c_type(&field.ty), field.name));
                }
            });
            e.line(format!("#define {} {}", s.fixed_macro(), s.layout.fixed_bytes()));
            e.line(format!("size_t {0}_size(const struct {0} *s);", s.tag));
            e.line(format!("size_t {0}_pack(const struct {0} *s, uint8_t *out);", s.tag));
            e.line(format!("int {0}_unpack(struct {0} *s, uint8_t *buf, size_t len);", s.tag));
            e.blank();
        }

        for elem in self.list_elems() {
            self.list_accessors(&mut e, &elem);
        }

        for sig in self.protocol.calls().chain(self.protocol.notifications()) {
            e.line(format!("#define {} 0x{:04X}", self.id_macro(sig), sig.id()));
        }
        e.blank();

        e.line("/* Implemented by the firmware. */");
        for sig in self.protocol.calls() {
            e.line(format!("{};", self.handler_proto(sig)));
        }
        for sig in self.protocol.notifications() {
            if sig.direction().is_some_and(|d| d.received_by(loamrpc::Role::Device)) {
                e.line(format!("{};", self.on_proto(sig)));
            }
        }
        e.blank();

        for sig in self.protocol.notifications() {
            if sig.direction().is_some_and(|d| d.sent_by(loamrpc::Role::Device)) {
                e.line(format!("{};", self.store_proto(sig)));
            }
        }
        e.line(format!(
            "int {p}_process(uint8_t *rx, size_t rx_len, uint8_t *tx, size_t tx_cap, struct {p}_arena *arena);"
        ));
        e.blank();

        e.line("#ifdef __cplusplus");
        e.line("}");
        e.line("#endif");
        e.blank();
        e.line(format!("#endif /* {}_H */", up));
        e.finish()
    }

    fn scalar_helpers(&self, e: &mut Emitter) {
        let p = &self.p;
        e.function(format!("static inline uint64_t {p}_get_le(const uint8_t *in, unsigned n)"), |e| {
            e.line("uint64_t v = 0;");
            e.line("unsigned i;");
            e.block("for (i = 0; i < n; i++) {", "}", |e| {
                e.line("v |= (uint64_t)in[i] << (8 * i);");
            });
            e.line("return v;");
        });
        e.blank();
        e.function(format!("static inline void {p}_put_le(uint8_t *out, uint64_t v, unsigned n)"), |e| {
            e.line("unsigned i;");
            e.block("for (i = 0; i < n; i++) {", "}", |e| {
                e.line("out[i] = (uint8_t)(v >> (8 * i));");
            });
        });
        e.blank();
        e.function(format!("static inline float {p}_get_f32(const uint8_t *in)"), |e| {
            e.line(format!("uint32_t bits = (uint32_t){p}_get_le(in, 4);"));
            e.line("float v;");
            e.line("memcpy(&v, &bits, 4);");
            e.line("return v;");
        });
        e.blank();
        e.function(format!("static inline void {p}_put_f32(uint8_t *out, float v)"), |e| {
            e.line("uint32_t bits;");
            e.line("memcpy(&bits, &v, 4);");
            e.line(format!("{p}_put_le(out, bits, 4);"));
        });
        e.blank();
    }

    fn list_accessors(&self, e: &mut Emitter, elem: &Type) {
        let p = &self.p;
        let key = Self::elem_key(elem);
        let size = elem.fixed_size().unwrap_or(1);
        let span = format!("struct {}_span", p);

        e.function(format!("static inline size_t {p}_list_{key}_count({span} list)"), |e| {
            e.line(format!("return list.len / {};", size));
        });
        match elem {
            Type::Struct(s) => {
                let name = s.name();
                e.function(
                    format!("static inline int {p}_list_{key}_at({span} list, size_t i, struct {name} *out)"),
                    |e| {
                        e.line(format!("return {name}_unpack(out, list.ptr + i * {size}, {size});"));
                    },
                );
                e.function(
                    format!("static inline void {p}_list_{key}_set({span} list, size_t i, const struct {name} *v)"),
                    |e| {
                        e.line(format!("{name}_pack(v, list.ptr + i * {size});"));
                    },
                );
            }
            _ => {
                let ctype = self.c_type(elem);
                e.function(format!("static inline {ctype} {p}_list_{key}_at({span} list, size_t i)"), |e| {
                    e.line(format!("return {};", self.read_expr(elem, &format!("list.ptr + i * {}", size))));
                });
                e.function(
                    format!("static inline void {p}_list_{key}_set({span} list, size_t i, {ctype} v)"),
                    |e| {
                        e.line(self.write_stmt(elem, &format!("list.ptr + i * {}", size), "v"));
                    },
                );
            }
        }
        e.blank();
    }

    fn handler_proto(&self, sig: &Signature) -> String {
        let mut params = Vec::new();
        if !sig.params().is_empty() {
            params.push(format!("const struct {} *args", self.args_tag(sig)));
        }
        if let Some(ty) = sig.returns() {
            params.push(format!("{} *ret", self.c_type(ty)));
            if ty.is_variable() {
                params.push(format!("struct {}_arena *arena", self.p));
            }
        }
        let params = if params.is_empty() { "void".to_string() } else { params.join(", ") };
        format!("int {}_handle_{}({})", self.p, snake_case(sig.name()), params)
    }

    fn on_proto(&self, sig: &Signature) -> String {
        let params = if sig.params().is_empty() {
            "void".to_string()
        } else {
            format!("const struct {} *args", self.args_tag(sig))
        };
        format!("void {}_on_{}({})", self.p, snake_case(sig.name()), params)
    }

    fn store_proto(&self, sig: &Signature) -> String {
        let mut params = "uint8_t *tx, size_t tx_cap".to_string();
        if !sig.params().is_empty() {
            params.push_str(&format!(", const struct {} *args", self.args_tag(sig)));
        }
        format!("int {}_store_{}({})", self.p, snake_case(sig.name()), params)
    }

    // ========================================================================
    //  SOURCE
    // ========================================================================

    fn source(&self) -> String {
        let p = &self.p;
        let up = &self.up;
        let mut e = Emitter::new();

        e.line(format!("/* {} from protocol \"{}\". Do not edit. */", BANNER, self.protocol.name()));
        e.line(format!("#include \"{}.h\"", p));
        e.blank();

        e.line("/* Bit runs are packed LSB first, starting at bit 0 of the first byte. */");
        e.function(
            format!("static void {p}_put_bits(uint8_t *run, size_t bit, uint64_t value, unsigned width)"),
            |e| {
                e.line("unsigned i;");
                e.block("for (i = 0; i < width; i++, bit++) {", "}", |e| {
                    e.block("if ((value >> i) & 1) {", "}", |e| {
                        e.line("run[bit / 8] |= (uint8_t)(1u << (bit % 8));");
                    });
                });
            },
        );
        e.blank();
        e.function(
            format!("static uint64_t {p}_get_bits(const uint8_t *run, size_t bit, unsigned width)"),
            |e| {
                e.line("uint64_t value = 0;");
                e.line("unsigned i;");
                e.block("for (i = 0; i < width; i++, bit++) {", "}", |e| {
                    e.line("value |= (uint64_t)((run[bit / 8] >> (bit % 8)) & 1) << i;");
                });
                e.line("return value;");
            },
        );
        e.blank();
        e.function(format!("static void {p}_header(uint8_t *tx, uint8_t kind, uint8_t txn, uint16_t id)"), |e| {
            e.line("tx[0] = kind;");
            e.line("tx[1] = txn;");
            e.line(format!("{p}_put_le(tx + 2, id, 2);"));
        });
        e.blank();
        e.function(
            format!("static int {p}_fail(uint8_t *tx, size_t tx_cap, uint8_t kind, uint8_t txn, uint16_t id, const char *reason)"),
            |e| {
                e.line("size_t len = strlen(reason);");
                e.block(format!("if (tx_cap < {up}_HEADER_LEN) {{"), "}", |e| {
                    e.line(format!("return {up}_NO_SPACE;"));
                });
                e.block(format!("if (len > tx_cap - {up}_HEADER_LEN) {{"), "}", |e| {
                    e.line(format!("len = tx_cap - {up}_HEADER_LEN;"));
                });
                e.line(format!("{p}_header(tx, kind, txn, id);"));
                e.line(format!("memcpy(tx + {up}_HEADER_LEN, reason, len);"));
                e.line(format!("return (int)({up}_HEADER_LEN + len);"));
            },
        );
        e.blank();
        e.function(format!("uint8_t *{p}_alloc(struct {p}_arena *arena, size_t len)"), |e| {
            e.line("uint8_t *ptr;");
            e.block("if (arena == NULL || len > arena->cap - arena->used) {", "}", |e| {
                e.line("return NULL;");
            });
            e.line("ptr = arena->buf + arena->used;");
            e.line("arena->used += len;");
            e.line("return ptr;");
        });
        e.blank();

        for en in self.protocol.enums() {
            e.function(format!("int {}_valid(int64_t value)", en.name()), |e| {
                e.block("switch (value) {", "}", |e| {
                    for (constant, _) in en.constants() {
                        e.line(format!("case {}_{}:", upper_snake(en.name()), constant.to_ascii_uppercase()));
                    }
                    e.indent();
                    e.line("return 1;");
                    e.dedent();
                    e.line("default:");
                    e.indent();
                    e.line("return 0;");
                    e.dedent();
                });
            });
            e.blank();
        }

        for s in self.structs() {
            self.struct_size(&mut e, &s);
            self.struct_pack(&mut e, &s);
            self.struct_unpack(&mut e, &s);
        }

        for sig in self.protocol.calls() {
            self.call_dispatch(&mut e, sig);
        }
        for sig in self.protocol.notifications() {
            if sig.direction().is_some_and(|d| d.sent_by(loamrpc::Role::Device)) {
                self.store(&mut e, sig);
            }
        }
        self.notification_dispatch(&mut e);
        self.process(&mut e);
        e.finish()
    }

    /// Expression for the encoded size of a variable member `expr`.
    fn variable_size(&self, ty: &Type, expr: &str) -> String {
        match ty {
            Type::Struct(s) => format!("{}_size(&{})", s.name(), expr),
            _ => format!("{}.len", expr),
        }
    }

    fn struct_size(&self, e: &mut Emitter, s: &CStruct<'_>) {
        e.function(format!("size_t {0}_size(const struct {0} *s)", s.tag), |e| {
            match s.layout.variable_member() {
                Some(v) => {
                    let field = &s.layout.fields()[v];
                    let size = self.variable_size(&field.ty, &format!("s->{}", field.name));
                    e.line(format!("return {} + {};", s.fixed_macro(), size));
                }
                None => {
                    e.line("(void)s;");
                    e.line(format!("return {};", s.fixed_macro()));
                }
            }
        });
        e.blank();
    }

    fn struct_pack(&self, e: &mut Emitter, s: &CStruct<'_>) {
        let fields = s.layout.fields();
        e.function(format!("size_t {0}_pack(const struct {0} *s, uint8_t *out)", s.tag), |e| {
            e.line("size_t at = 0;");
            for segment in s.layout.segments() {
                match segment {
                    Segment::Bits { members, size } => {
                        e.line(format!("memset(out + at, 0, {});", size));
                        let mut bit = 0;
                        for field in &fields[members.clone()] {
                            let width = field.ty.bit_width().unwrap_or(0);
                            e.line(format!(
                                "{}_put_bits(out + at, {}, (uint64_t)s->{}, {});",
                                self.p, bit, field.name, width
                            ));
                            bit += width;
                        }
                        e.line(format!("at += {};", size));
                    }
                    Segment::Member(i) => {
                        let field = &fields[*i];
                        let member = format!("s->{}", field.name);
                        match &field.ty {
                            Type::Struct(inner) => {
                                e.line(format!("at += {}_pack(&{}, out + at);", inner.name(), member));
                            }
                            ty if is_span(ty) => {
                                e.block(format!("if ({}.len != 0) {{", member), "}", |e| {
                                    e.line(format!("memmove(out + at, {0}.ptr, {0}.len);", member));
                                });
                                e.line(format!("at += {}.len;", member));
                            }
                            ty => {
                                e.line(self.write_stmt(ty, "out + at", &member));
                                e.line(format!("at += {};", ty.fixed_size().unwrap_or(0)));
                            }
                        }
                    }
                }
            }
            e.line("return at;");
        });
        e.blank();
    }

    fn struct_unpack(&self, e: &mut Emitter, s: &CStruct<'_>) {
        let up = &self.up;
        let fields = s.layout.fields();
        let fixed = s.fixed_macro();
        let variable = s.layout.variable_member();
        let nested = fields.iter().any(|f| matches!(f.ty, Type::Struct(_)));
        let list_check = fields.iter().find_map(|f| match &f.ty {
            Type::List(elem) if matches!(elem.as_ref(), Type::Struct(_) | Type::Enum(_)) => Some(elem.as_ref()),
            _ => None,
        });

        e.function(format!("int {0}_unpack(struct {0} *s, uint8_t *buf, size_t len)", s.tag), |e| {
            e.line("size_t at = 0;");
            if variable.is_some() {
                e.line("size_t var;");
            }
            if nested || matches!(list_check, Some(Type::Struct(_))) {
                e.line("int rc;");
            }
            if let Some(elem) = list_check {
                e.line("size_t i;");
                if let Type::Struct(inner) = elem {
                    e.line(format!("struct {} elem;", inner.name()));
                }
            }
            // `len < 0` on a size_t trips -Wtype-limits.
            if s.layout.fixed_bytes() > 0 {
                e.block(format!("if (len < {}) {{", fixed), "}", |e| {
                    e.line(format!("return {}_TRUNCATED;", up));
                });
            }
            match variable {
                Some(_) => e.line(format!("var = len - {};", fixed)),
                None => e.block(format!("if (len > {}) {{", fixed), "}", |e| {
                    e.line(format!("return {}_TRAILING;", up));
                }),
            }

            for segment in s.layout.segments() {
                match segment {
                    Segment::Bits { members, size } => {
                        let mut bit = 0;
                        for field in &fields[members.clone()] {
                            let width = field.ty.bit_width().unwrap_or(0);
                            e.line(format!(
                                "s->{} = ({}){}_get_bits(buf + at, {}, {});",
                                field.name,
                                self.c_type(&field.ty),
                                self.p,
                                bit,
                                width
                            ));
                            if let Type::Enum(en) = &field.ty {
                                self.enum_check(e, en.name(), &format!("s->{}", field.name));
                            }
                            bit += width;
                        }
                        e.line(format!("at += {};", size));
                    }
                    Segment::Member(i) => {
                        let field = &fields[*i];
                        let member = format!("s->{}", field.name);
                        let is_var = variable == Some(*i);
                        match &field.ty {
                            Type::Struct(inner) => {
                                let size = if is_var {
                                    "var".to_string()
                                } else {
                                    format!("{}_FIXED", upper_snake(inner.name()))
                                };
                                e.line(format!("rc = {}_unpack(&{}, buf + at, {});", inner.name(), member, size));
                                e.block("if (rc != 0) {", "}", |e| e.line("return rc;"));
                                e.line(format!("at += {};", size));
                            }
                            ty if is_span(ty) => {
                                if let Some(width) = list_width(ty).filter(|w| *w > 1) {
                                    e.block(format!("if (var % {} != 0) {{", width), "}", |e| {
                                        e.line(format!("return {}_TRUNCATED;", up));
                                    });
                                }
                                e.line(format!("{}.ptr = buf + at;", member));
                                e.line(format!("{}.len = var;", member));
                                if let Type::List(elem) = ty {
                                    self.list_check(e, elem, &member);
                                }
                                e.line("at += var;");
                            }
                            ty => {
                                e.line(format!("{} = {};", member, self.read_expr(ty, "buf + at")));
                                if let Type::Enum(en) = ty {
                                    self.enum_check(e, en.name(), &member);
                                }
                                e.line(format!("at += {};", ty.fixed_size().unwrap_or(0)));
                            }
                        }
                    }
                }
            }
            e.line("(void)at;");
            e.line("return 0;");
        });
        e.blank();
    }

    fn enum_check(&self, e: &mut Emitter, name: &str, expr: &str) {
        e.block(format!("if (!{}_valid({})) {{", name, expr), "}", |e| {
            e.line(format!("return {}_INVALID_ENUM;", self.up));
        });
    }

    /// Validates every element of a list of enums or structs.
    fn list_check(&self, e: &mut Emitter, elem: &Type, member: &str) {
        let width = elem.fixed_size().unwrap_or(1);
        match elem {
            Type::Enum(en) => {
                e.block(format!("for (i = 0; i < var / {}; i++) {{", width), "}", |e| {
                    let read = self.read_expr(elem, &format!("{}.ptr + i * {}", member, width));
                    self.enum_check(e, en.name(), &read);
                });
            }
            Type::Struct(inner) => {
                e.block(format!("for (i = 0; i < var / {}; i++) {{", width), "}", |e| {
                    e.line(format!("rc = {}_unpack(&elem, {}.ptr + i * {}, {});", inner.name(), member, width, width));
                    e.block("if (rc != 0) {", "}", |e| e.line("return rc;"));
                });
            }
            _ => {}
        }
    }

    fn call_dispatch(&self, e: &mut Emitter, sig: &Signature) {
        let p = &self.p;
        let up = &self.up;
        let name = snake_case(sig.name());
        let id = self.id_macro(sig);
        let has_args = !sig.params().is_empty();
        let variable_ret = sig.returns().is_some_and(|ty| ty.is_variable());

        let arena = if variable_ret { format!("struct {p}_arena *arena") } else { format!("struct {p}_arena *unused") };
        e.function(
            format!(
                "static int {p}_call_{name}(uint8_t txn, uint8_t *payload, size_t len, uint8_t *tx, size_t tx_cap, {arena})"
            ),
            |e| {
                if has_args {
                    e.line(format!("struct {} args;", self.args_tag(sig)));
                }
                if let Some(ty) = sig.returns() {
                    e.line(format!("{} ret;", self.c_type(ty)));
                    e.line("size_t size;");
                }
                e.line("int rc;");
                if !variable_ret {
                    e.line("(void)unused;");
                }

                if has_args {
                    e.line(format!("rc = {}_unpack(&args, payload, len);", self.args_tag(sig)));
                } else {
                    e.line("(void)payload;");
                    e.line(format!("rc = len == 0 ? 0 : {}_TRAILING;", up));
                }
                e.block("if (rc != 0) {", "}", |e| {
                    e.line(format!("return {p}_fail(tx, tx_cap, {up}_ERROR, txn, {id}, \"malformed arguments\");"));
                });

                let mut call_args = Vec::new();
                if has_args {
                    call_args.push("&args".to_string());
                }
                if sig.returns().is_some() {
                    call_args.push("&ret".to_string());
                    if variable_ret {
                        call_args.push("arena".to_string());
                    }
                }
                e.line(format!("rc = {p}_handle_{name}({});", call_args.join(", ")));
                e.block("if (rc != 0) {", "}", |e| {
                    e.line(format!("return {p}_fail(tx, tx_cap, {up}_ERROR, txn, {id}, \"handler failed\");"));
                });

                match sig.returns() {
                    None => {
                        e.block(format!("if (tx_cap < {up}_HEADER_LEN) {{"), "}", |e| {
                            e.line(format!("return {up}_NO_SPACE;"));
                        });
                        e.line(format!("{p}_header(tx, {up}_RESPONSE, txn, {id});"));
                        e.line(format!("return {up}_HEADER_LEN;"));
                    }
                    Some(ty) => {
                        let size = match ty {
                            Type::Struct(s) => format!("{}_size(&ret)", s.name()),
                            ty if is_span(ty) => "ret.len".to_string(),
                            ty => ty.fixed_size().unwrap_or(0).to_string(),
                        };
                        e.line(format!("size = {};", size));
                        e.block(format!("if (tx_cap < {up}_HEADER_LEN || size > tx_cap - {up}_HEADER_LEN) {{"), "}", |e| {
                            e.line(format!(
                                "return {p}_fail(tx, tx_cap, {up}_ERROR, txn, {id}, \"response too large\");"
                            ));
                        });
                        let out = format!("tx + {up}_HEADER_LEN");
                        match ty {
                            Type::Struct(s) => e.line(format!("{}_pack(&ret, {});", s.name(), out)),
                            ty if is_span(ty) => {
                                e.block("if (size != 0) {", "}", |e| {
                                    e.line(format!("memmove({}, ret.ptr, size);", out));
                                });
                            }
                            ty => e.line(self.write_stmt(ty, &out, "ret")),
                        }
                        e.line(format!("{p}_header(tx, {up}_RESPONSE, txn, {id});"));
                        e.line(format!("return (int)({up}_HEADER_LEN + size);"));
                    }
                }
            },
        );
        e.blank();
    }

    fn store(&self, e: &mut Emitter, sig: &Signature) {
        let p = &self.p;
        let up = &self.up;
        let id = self.id_macro(sig);
        e.function(self.store_proto(sig), |e| {
            if sig.params().is_empty() {
                e.block(format!("if (tx_cap < {up}_HEADER_LEN) {{"), "}", |e| {
                    e.line(format!("return {up}_NO_SPACE;"));
                });
                e.line(format!("{p}_header(tx, {up}_NOTIFICATION, 0, {id});"));
                e.line(format!("return {up}_HEADER_LEN;"));
                return;
            }
            let tag = self.args_tag(sig);
            e.line(format!("size_t size = {}_size(args);", tag));
            e.block(format!("if (tx_cap < {up}_HEADER_LEN || size > tx_cap - {up}_HEADER_LEN) {{"), "}", |e| {
                e.line(format!("return {up}_NO_SPACE;"));
            });
            e.line(format!("{p}_header(tx, {up}_NOTIFICATION, 0, {id});"));
            e.line(format!("{}_pack(args, tx + {up}_HEADER_LEN);", tag));
            e.line(format!("return (int)({up}_HEADER_LEN + size);"));
        });
        e.blank();
    }

    fn notification_dispatch(&self, e: &mut Emitter) {
        let p = &self.p;
        let received: Vec<&Signature> = self
            .protocol
            .notifications()
            .filter(|sig| sig.direction().is_some_and(|d| d.received_by(loamrpc::Role::Device)))
            .collect();

        e.line("/* Malformed and unknown notifications are dropped. */");
        e.function(format!("static void {p}_notification(uint16_t id, uint8_t *payload, size_t len)"), |e| {
            e.line("(void)payload;");
            e.line("(void)len;");
            e.block("switch (id) {", "}", |e| {
                for sig in &received {
                    let name = snake_case(sig.name());
                    e.block(format!("case {}: {{", self.id_macro(sig)), "}", |e| {
                        if sig.params().is_empty() {
                            e.block("if (len == 0) {", "}", |e| e.line(format!("{p}_on_{name}();")));
                        } else {
                            let tag = self.args_tag(sig);
                            e.line(format!("struct {} args;", tag));
                            e.block(format!("if ({}_unpack(&args, payload, len) == 0) {{", tag), "}", |e| {
                                e.line(format!("{p}_on_{name}(&args);"));
                            });
                        }
                        e.line("break;");
                    });
                }
                e.line("default:");
                e.indent();
                e.line("break;");
                e.dedent();
            });
        });
        e.blank();
    }

    fn process(&self, e: &mut Emitter) {
        let p = &self.p;
        let up = &self.up;
        e.function(
            format!("int {p}_process(uint8_t *rx, size_t rx_len, uint8_t *tx, size_t tx_cap, struct {p}_arena *arena)"),
            |e| {
                e.line("uint8_t kind;");
                e.line("uint8_t txn;");
                e.line("uint16_t id;");
                e.line("uint8_t *payload;");
                e.line("size_t len;");
                e.block(format!("if (rx_len < {up}_HEADER_LEN) {{"), "}", |e| {
                    e.line(format!("return {up}_TRUNCATED;"));
                });
                e.line("kind = rx[0];");
                e.line("txn = rx[1];");
                e.line(format!("id = (uint16_t){p}_get_le(rx + 2, 2);"));
                e.line(format!("payload = rx + {up}_HEADER_LEN;"));
                e.line(format!("len = rx_len - {up}_HEADER_LEN;"));
                e.block("if (arena != NULL) {", "}", |e| e.line("arena->used = 0;"));
                e.block(format!("if (kind == {up}_NOTIFICATION) {{"), "}", |e| {
                    e.line(format!("{p}_notification(id, payload, len);"));
                    e.line("return 0;");
                });
                e.block(format!("if (kind != {up}_REQUEST) {{"), "}", |e| e.line("return 0;"));
                e.block("switch (id) {", "}", |e| {
                    for sig in self.protocol.calls() {
                        e.line(format!("case {}:", self.id_macro(sig)));
                        e.indent();
                        e.line(format!(
                            "return {p}_call_{}(txn, payload, len, tx, tx_cap, arena);",
                            snake_case(sig.name())
                        ));
                        e.dedent();
                    }
                    e.line("default:");
                    e.indent();
                    e.block(format!("if (tx_cap < {up}_HEADER_LEN) {{"), "}", |e| {
                        e.line(format!("return {up}_NO_SPACE;"));
                    });
                    e.line(format!("{p}_header(tx, {up}_UNSUPPORTED, txn, id);"));
                    e.line(format!("return {up}_HEADER_LEN;"));
                    e.dedent();
                });
            },
        );
    }
}
