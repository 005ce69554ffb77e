//! The indentation- and color-aware output writer.
//!
//! The emitter drives this with role-tagged fragments — keywords, type
//! names, identifiers, literals, comments — so that colored terminal
//! output and plain file output share one code path. Colors are applied
//! only when requested by the CLI flag.

use colored::Colorize;

const INDENT: &str = "    ";

/// The role a fragment plays in the output, which picks its color.
#[derive(Clone, Copy, Debug)]
pub enum Role {
    Keyword,
    Type,
    Identifier,
    Symbol,
    Literal,
    Comment,
}

pub struct Printer {
    output: String,
    indent: usize,
    colorful: bool,
    at_line_start: bool,
}

impl Printer {
    pub fn new(colorful: bool) -> Self {
        Self {
            output: String::new(),
            indent: 0,
            colorful,
            at_line_start: true,
        }
    }

    pub fn finish(self) -> String {
        self.output
    }

    pub fn indent(&mut self) {
        self.indent += 1;
    }

    pub fn dedent(&mut self) {
        debug_assert!(self.indent > 0);
        self.indent = self.indent.saturating_sub(1);
    }

    pub fn newline(&mut self) {
        self.output.push('\n');
        self.at_line_start = true;
    }

    pub fn space(&mut self) {
        self.write_plain(" ");
    }

    fn write_plain(&mut self, text: &str) {
        if self.at_line_start {
            for _ in 0..self.indent {
                self.output.push_str(INDENT);
            }
            self.at_line_start = false;
        }
        self.output.push_str(text);
    }

    pub fn write(&mut self, role: Role, text: &str) {
        if !self.colorful {
            self.write_plain(text);
            return;
        }
        let colored = match role {
            Role::Keyword => text.blue().to_string(),
            Role::Type => text.green().to_string(),
            Role::Identifier => text.normal().to_string(),
            Role::Symbol => text.normal().to_string(),
            Role::Literal => text.yellow().to_string(),
            Role::Comment => text.bright_black().to_string(),
        };
        // Indentation must be emitted uncolored before the fragment.
        if self.at_line_start {
            self.write_plain("");
        }
        self.output.push_str(&colored);
    }

    pub fn keyword(&mut self, text: &str) {
        self.write(Role::Keyword, text);
    }

    pub fn type_name(&mut self, text: &str) {
        self.write(Role::Type, text);
    }

    pub fn identifier(&mut self, text: &str) {
        self.write(Role::Identifier, text);
    }

    pub fn symbol(&mut self, text: &str) {
        self.write(Role::Symbol, text);
    }

    pub fn literal(&mut self, text: &str) {
        self.write(Role::Literal, text);
    }

    pub fn comment(&mut self, text: &str) {
        self.write(Role::Comment, &format!("// {}", text));
        self.newline();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indentation_applies_at_line_starts_only() {
        let mut printer = Printer::new(false);
        printer.symbol("{");
        printer.indent();
        printer.newline();
        printer.keyword("return");
        printer.space();
        printer.literal("0");
        printer.symbol(";");
        printer.dedent();
        printer.newline();
        printer.symbol("}");
        assert_eq!(printer.finish(), "{\n    return 0;\n}");
    }
}
