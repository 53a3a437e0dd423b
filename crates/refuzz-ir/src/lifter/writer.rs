//! Indentation-aware line output.

const INDENT: &str = "    ";

/// Accumulates Python source one line at a time
#[derive(Debug, Default)]
pub(crate) struct ScriptWriter {
    output: String,
    indent: usize,
    num_lines: usize,
    /// Whether each open block already holds a statement
    block_has_statement: Vec<bool>,
}

impl ScriptWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Number of lines written so far
    pub(crate) fn current_line(&self) -> usize {
        self.num_lines
    }

    pub(crate) fn emit(&mut self, line: &str) {
        if let Some(flag) = self.block_has_statement.last_mut() {
            *flag = true;
        }
        self.write_line(line);
    }

    /// Comment lines do not count as block content
    pub(crate) fn emit_comment(&mut self, text: &str) {
        for line in text.lines() {
            self.write_line(&format!("# {}", line));
        }
    }

    pub(crate) fn open_block(&mut self, header: &str) {
        self.emit(header);
        self.indent += 1;
        self.block_has_statement.push(false);
    }

    pub(crate) fn close_block(&mut self) {
        if let Some(false) = self.block_has_statement.pop() {
            self.write_line("pass");
        }
        self.indent = self.indent.saturating_sub(1);
    }

    pub(crate) fn finish(self) -> String {
        self.output
    }

    fn write_line(&mut self, line: &str) {
        for _ in 0..self.indent {
            self.output.push_str(INDENT);
        }
        self.output.push_str(line);
        self.output.push('\n');
        self.num_lines += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_block_gets_pass() {
        let mut w = ScriptWriter::new();
        w.open_block("if x:");
        w.emit_comment("nothing");
        w.close_block();
        w.emit("y = 1");
        assert_eq!(w.finish(), "if x:\n    # nothing\n    pass\ny = 1\n");
    }

    #[test]
    fn test_nested_indentation() {
        let mut w = ScriptWriter::new();
        w.open_block("def f0():");
        w.open_block("while True:");
        w.emit("break");
        w.close_block();
        w.close_block();
        assert_eq!(w.current_line(), 3);
        assert_eq!(w.finish(), "def f0():\n    while True:\n        break\n");
    }
}
