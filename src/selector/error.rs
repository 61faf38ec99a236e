//! compile errors with source spans

use std::fmt;

use thiserror::Error;

use super::expr::ValueType;

/// byte range in the selector source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// smallest span covering both
    pub fn to(self, other: Span) -> Span {
        Span::new(self.start.min(other.start), self.end.max(other.end))
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// what went wrong while compiling a selector
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileErrorKind {
    #[error("unexpected '{found}', expected {expected}")]
    UnexpectedToken {
        found: String,
        expected: &'static str,
    },

    #[error("unexpected end of input, expected {expected}")]
    UnexpectedEnd { expected: &'static str },

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("invalid escape sequence '\\{0}'")]
    InvalidEscape(char),

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("invalid index: {0}")]
    InvalidIndex(String),

    #[error(
        "unknown identifier '{name}'{}",
        .suggestion.as_ref().map(|s| format!(", did you mean '{}'?", s)).unwrap_or_default()
    )]
    UnknownIdentifier {
        name: String,
        suggestion: Option<String>,
    },

    #[error("unknown method '{method}' on {receiver}")]
    UnknownMethod { receiver: ValueType, method: String },

    #[error("'{method}' expects {expected} argument(s), got {found}")]
    WrongArgumentCount {
        method: String,
        expected: usize,
        found: usize,
    },

    #[error("argument {position} of '{method}' must be {expected}, got {found}")]
    WrongArgumentType {
        method: String,
        position: usize,
        expected: ValueType,
        found: ValueType,
    },

    #[error("mismatched expression type: expected {expected}, got {found}")]
    MismatchedType {
        expected: &'static str,
        found: String,
    },

    #[error("invalid regex: {0}")]
    InvalidRegex(String),

    #[error("more than one segment is marked as target")]
    DuplicateTarget,

    #[error("segment needs a name or a [predicate]")]
    EmptySegment,
}

/// structured compile error, always carrying the offending span
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} (at {span})")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub span: Span,
}

impl CompileError {
    pub fn new(kind: CompileErrorKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// render the error under the source line with a caret marker
    pub fn render(&self, source: &str) -> String {
        let start = self.span.start.min(source.len());
        let end = self.span.end.clamp(start, source.len());
        let pad = source[..start].chars().count();
        let width = source[start..end].chars().count().max(1);

        format!(
            "error: {}\n  {}\n  {}{}",
            self.kind,
            source,
            " ".repeat(pad),
            "^".repeat(width)
        )
    }
}
