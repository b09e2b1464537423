use std::fmt::Write;

use super::{Diagnostic, Phase, SourceMap};

/// Terminal rendering: headline, location, source line with carets, then
/// notes and the suggestion.
pub struct AnsiRenderer {
    pub use_color: bool,
}

impl AnsiRenderer {
    fn paint(&self, code: &str, s: &str) -> String {
        if self.use_color { format!("\x1b[{code}m{s}\x1b[0m") } else { s.to_string() }
    }

    fn bold(&self, s: &str) -> String {
        self.paint("1", s)
    }

    fn bold_red(&self, s: &str) -> String {
        self.paint("1;31", s)
    }

    fn cyan(&self, s: &str) -> String {
        self.paint("36", s)
    }

    fn dim(&self, s: &str) -> String {
        self.paint("2", s)
    }

    pub fn render(&self, d: &Diagnostic) -> String {
        let mut out = String::new();

        let headline = match (d.phase, d.code) {
            (Phase::Runtime, Some(code)) => format!("runtime error {code}"),
            (Phase::Runtime, None) => "runtime error".to_string(),
            (Phase::Compile, _) => "error".to_string(),
        };
        let _ = writeln!(out, "{}: {}", self.bold_red(&headline), self.bold(&d.message));

        match (&d.label, &d.source) {
            (Some(label), Some(source)) => {
                let map = SourceMap::new(source);
                let (line, col) = map.lookup(label.span.start);
                let text = map.line_text(source, line);
                let _ = writeln!(out, "  {} {line}:{col}", self.cyan("-->"));

                let gutter = line.to_string().len();
                let pad = " ".repeat(gutter);
                let pipe = self.cyan("|");
                let _ = writeln!(out, "{pad} {pipe}");
                let _ = writeln!(out, "{} {pipe} {text}", self.cyan(&format!("{line:>gutter$}")));

                let width = label.span.end.saturating_sub(label.span.start).max(1);
                let carets = self.bold_red(&"^".repeat(width));
                let indent = " ".repeat(col - 1);
                if label.message.is_empty() {
                    let _ = writeln!(out, "{pad} {pipe} {indent}{carets}");
                } else {
                    let _ = writeln!(out, "{pad} {pipe} {indent}{carets} {}", self.bold_red(&label.message));
                }
                let _ = writeln!(out, "{pad} {pipe}");
            }
            _ => {
                if let Some(line) = d.line {
                    let _ = writeln!(out, "  {} line {line}", self.cyan("-->"));
                }
            }
        }

        for note in &d.notes {
            let _ = writeln!(out, "  {} note: {note}", self.dim("="));
        }
        if let Some(suggestion) = &d.suggestion {
            let _ = writeln!(out, "  {} suggestion: {suggestion}", self.dim("="));
        }
        out
    }
}
