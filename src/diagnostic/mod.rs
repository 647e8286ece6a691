pub mod ansi;
pub mod json;
pub mod registry;

use crate::compiler::{CompileError, ErrorKind};
use crate::source_map::Span;

#[derive(Debug, Clone)]
pub struct Label {
    pub span: Span,
    pub message: String,
    pub is_primary: bool,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<&'static str>,
    pub message: String,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
    pub source: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            code: None,
            message: message.into(),
            labels: Vec::new(),
            notes: Vec::new(),
            suggestion: None,
            source: None,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.labels.push(Label { span, message: label.into(), is_primary: true });
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

impl From<&CompileError> for Diagnostic {
    fn from(e: &CompileError) -> Self {
        let label = if e.lexeme.is_empty() { "at end of input".to_string() } else { "here".to_string() };
        let mut d = Diagnostic::error(e.kind.to_string())
            .with_code(e.code())
            .with_span(e.span, label)
            .with_note(format!("line {}", e.line));
        let hint = match &e.kind {
            ErrorKind::ReservedPrefix(name) => {
                Some(format!("rename the global, e.g. '{}'", name.trim_start_matches(crate::lexer::TEMPORARY_PREFIX)))
            }
            ErrorKind::UndefinedTemporary(name) => Some(format!("assign '{name}' earlier in the guard block")),
            ErrorKind::MissingIndex(name) => Some(format!("index the array, e.g. '{name}[0]'")),
            ErrorKind::GuardNotTemporary(name) => {
                Some(format!("copy it into a temporary first: 't_{name} = {name}'"))
            }
            ErrorKind::RegisterExhausted => Some("split the expression over fewer live temporaries".to_string()),
            _ => None,
        };
        if let Some(hint) = hint {
            d = d.with_suggestion(hint);
        }
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{Options, compile};

    #[test]
    fn diagnostic_error_builder() {
        let d = Diagnostic::error("something went wrong");
        assert_eq!(d.message, "something went wrong");
        assert!(d.code.is_none());
        assert!(d.labels.is_empty());
        assert!(d.suggestion.is_none());
    }

    #[test]
    fn diagnostic_with_span_and_code() {
        let d = Diagnostic::error("bad token").with_code("SDVU-P001").with_span(Span { start: 5, end: 8 }, "here");
        assert_eq!(d.code, Some("SDVU-P001"));
        assert_eq!(d.labels[0].span, Span { start: 5, end: 8 });
        assert!(d.labels[0].is_primary);
    }

    #[test]
    fn from_compile_error() {
        let c = compile("int t_x = 1;", Options::default());
        let d = Diagnostic::from(&c.errors[0]);
        assert_eq!(d.code, Some("SDVU-S004"));
        assert!(d.message.contains("t_x"));
        assert_eq!(d.labels[0].span, Span { start: 4, end: 7 });
        assert_eq!(d.suggestion.as_deref(), Some("rename the global, e.g. 'x'"));
        assert_eq!(d.notes, ["line 1"]);
    }

    #[test]
    fn error_at_end_of_input() {
        let c = compile("int x =", Options::default());
        let d = Diagnostic::from(&c.errors[0]);
        assert_eq!(d.labels[0].message, "at end of input");
        assert!(d.suggestion.is_none());
    }
}
