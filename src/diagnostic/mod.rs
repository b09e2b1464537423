pub mod ansi;
pub mod json;

use crate::compiler::CompileError;
use crate::lexer::{LexError, Span};
use crate::vm::RuntimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Compile,
    Runtime,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Compile => "compile",
            Phase::Runtime => "runtime",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub span: Span,
    pub message: String,
}

/// Renderer-neutral description of a compile or run failure.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub phase: Phase,
    pub message: String,
    /// Runtime error code.
    pub code: Option<i32>,
    pub line: Option<u32>,
    pub module: Option<String>,
    pub label: Option<Label>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
    pub source: Option<String>,
}

impl Diagnostic {
    pub fn new(phase: Phase, message: impl Into<String>) -> Self {
        Diagnostic {
            phase,
            message: message.into(),
            code: None,
            line: None,
            module: None,
            label: None,
            notes: Vec::new(),
            suggestion: None,
            source: None,
        }
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn with_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.label = Some(Label { span, message: label.into() });
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl From<&LexError> for Diagnostic {
    fn from(e: &LexError) -> Self {
        let span = Span { start: e.position, end: e.position + e.snippet.len().max(1) };
        Diagnostic::new(Phase::Compile, format!("unexpected input '{}'", e.snippet))
            .with_line(e.line)
            .with_span(span, "here")
            .with_suggestion(e.suggestion.clone())
    }
}

impl From<&CompileError> for Diagnostic {
    fn from(e: &CompileError) -> Self {
        let d = Diagnostic::new(Phase::Compile, &e.message).with_line(e.line);
        // resolution errors are found after parsing and carry no span
        if e.span == Span::UNKNOWN {
            return d;
        }
        d.with_span(e.span, "here")
    }
}

impl From<&RuntimeError> for Diagnostic {
    fn from(e: &RuntimeError) -> Self {
        let mut d = Diagnostic::new(Phase::Runtime, &e.message).with_code(e.code);
        if e.line > 0 {
            d = d.with_line(e.line);
        }
        if let Some(module) = &e.module {
            d = d.with_module(module.clone()).with_note(format!("in module '{module}'"));
        }
        d
    }
}

/// Byte offset to (line, column) lookup, both 1-based.
pub struct SourceMap {
    line_starts: Vec<usize>,
}

impl SourceMap {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        SourceMap { line_starts }
    }

    pub fn lookup(&self, offset: usize) -> (usize, usize) {
        let line = self.line_starts.partition_point(|&start| start <= offset).max(1);
        (line, offset - self.line_starts[line - 1] + 1)
    }

    pub fn line_start(&self, line: usize) -> Option<usize> {
        self.line_starts.get(line.checked_sub(1)?).copied()
    }

    pub fn line_text<'a>(&self, source: &'a str, line: usize) -> &'a str {
        let Some(start) = self.line_start(line) else { return "" };
        let end = self.line_starts.get(line).map_or(source.len(), |next| next - 1);
        source.get(start..end).unwrap_or("").trim_end_matches('\r')
    }
}
