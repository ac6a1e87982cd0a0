//! Indent-aware string builder for PL/pgSQL generation.
//!
//! Generated SQL uses 4-space indentation.

/// Indent-aware string builder that produces formatted PL/pgSQL source.
pub struct CodeWriter {
    buf: String,
    indent_level: usize,
}

impl CodeWriter {
    pub fn new() -> Self {
        Self {
            buf: String::with_capacity(4096),
            indent_level: 0,
        }
    }

    /// Write a complete line (appends newline).
    pub fn line(&mut self, text: &str) {
        self.write_indent();
        self.buf.push_str(text);
        self.buf.push('\n');
    }

    /// Re-indent a pre-rendered fragment at the current level.
    pub fn lines(&mut self, text: &str) {
        for line in text.lines() {
            if line.is_empty() {
                self.blank();
            } else {
                self.line(line);
            }
        }
    }

    /// Write an empty line.
    pub fn blank(&mut self) {
        self.buf.push('\n');
    }

    /// Increase indent by one level.
    pub fn indent(&mut self) {
        self.indent_level += 1;
    }

    /// Decrease indent by one level.
    pub fn dedent(&mut self) {
        self.indent_level = self.indent_level.saturating_sub(1);
    }

    /// Write `text` and increase indent (e.g. `BEGIN`, `FOR ... LOOP`).
    pub fn block_open(&mut self, text: &str) {
        self.line(text);
        self.indent();
    }

    /// Decrease indent and write `text` (e.g. `END;`, `END LOOP;`).
    pub fn block_close(&mut self, text: &str) {
        self.dedent();
        self.line(text);
    }

    /// Dedent, write a divider such as `ELSE` or `EXCEPTION`, re-indent.
    pub fn block_divider(&mut self, text: &str) {
        self.dedent();
        self.line(text);
        self.indent();
    }

    /// `IF cond THEN` and increase indent.
    pub fn if_open(&mut self, condition: &str) {
        self.block_open(&format!("IF {} THEN", condition));
    }

    pub fn if_else(&mut self) {
        self.block_divider("ELSE");
    }

    pub fn if_close(&mut self) {
        self.block_close("END IF;");
    }

    /// `-- text`
    pub fn comment(&mut self, text: &str) {
        self.line(&format!("-- {}", text));
    }

    /// Consume the writer and return the generated string.
    pub fn finish(self) -> String {
        self.buf
    }

    fn write_indent(&mut self) {
        for _ in 0..self.indent_level {
            self.buf.push_str("    ");
        }
    }
}

impl Default for CodeWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_line() {
        let mut w = CodeWriter::new();
        w.line("RETURN v_result;");
        assert_eq!(w.finish(), "RETURN v_result;\n");
    }

    #[test]
    fn if_else_blocks() {
        let mut w = CodeWriter::new();
        w.if_open("v_x > 0");
        w.line("a();");
        w.if_else();
        w.line("b();");
        w.if_close();
        assert_eq!(
            w.finish(),
            "IF v_x > 0 THEN\n    a();\nELSE\n    b();\nEND IF;\n"
        );
    }

    #[test]
    fn nested_blocks() {
        let mut w = CodeWriter::new();
        w.block_open("BEGIN");
        w.block_open("FOR v_row IN SELECT 1 LOOP");
        w.line("NULL;");
        w.block_close("END LOOP;");
        w.block_divider("EXCEPTION");
        w.line("WHEN OTHERS THEN RAISE;");
        w.block_close("END;");
        assert_eq!(
            w.finish(),
            "BEGIN\n    FOR v_row IN SELECT 1 LOOP\n        NULL;\n    END LOOP;\nEXCEPTION\n    WHEN OTHERS THEN RAISE;\nEND;\n"
        );
    }

    #[test]
    fn fragments_are_reindented() {
        let mut w = CodeWriter::new();
        w.indent();
        w.lines("IF x THEN\n    y;\nEND IF;\n");
        assert_eq!(w.finish(), "    IF x THEN\n        y;\n    END IF;\n");
    }

    #[test]
    fn blank_line() {
        let mut w = CodeWriter::new();
        w.line("a;");
        w.blank();
        w.line("b;");
        assert_eq!(w.finish(), "a;\n\nb;\n");
    }

    #[test]
    fn dedent_saturates_at_zero() {
        let mut w = CodeWriter::new();
        w.dedent();
        w.line("x;");
        assert_eq!(w.finish(), "x;\n");
    }
}
