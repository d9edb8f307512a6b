//! Indented line writer used by both targets.

const INDENT: &str = "    ";

#[derive(Debug, Default)]
pub(crate) struct Emitter {
    out: String,
    depth: usize,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes one line at the current depth. An empty line carries no indentation.
    pub fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if !text.is_empty() {
            for _ in 0..self.depth {
                self.out.push_str(INDENT);
            }
            self.out.push_str(text);
        }
        self.out.push('\n');
    }

    pub fn blank(&mut self) {
        self.out.push('\n');
    }

    pub fn indent(&mut self) {
        self.depth += 1;
    }

    pub fn dedent(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Writes `open`, the indented body, then `close`.
    pub fn block(&mut self, open: impl AsRef<str>, close: &str, body: impl FnOnce(&mut Self)) {
        self.line(open);
        self.indent();
        body(self);
        self.dedent();
        self.line(close);
    }

    /// A C function definition, brace on its own line.
    pub fn function(&mut self, signature: impl AsRef<str>, body: impl FnOnce(&mut Self)) {
        self.line(signature);
        self.block("{", "}", body);
    }

    pub fn finish(self) -> String {
        self.out
    }
}
