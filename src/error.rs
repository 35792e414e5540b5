//! Error types and source-position tracking.

use std::fmt;

/// A position in source text, tracked as `(line, column)`, both 1-based.
///
/// `Position::NONE` (the default) means "no position available" — used when
/// the `debug` feature is off, or for synthesized nodes (e.g. property
/// accessor scripts built by [`Engine::get_property`][crate::Engine::get_property]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Position {
    line: u32,
    col: u32,
}

impl Position {
    /// No position information available.
    pub const NONE: Self = Self { line: 0, col: 0 };
    /// The start of a source file.
    pub const START: Self = Self { line: 1, col: 1 };

    /// Create a new position. Use `(0, 0)` for [`Position::NONE`].
    #[must_use]
    pub const fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }

    #[must_use]
    pub const fn line(&self) -> Option<u32> {
        if self.line == 0 {
            None
        } else {
            Some(self.line)
        }
    }

    #[must_use]
    pub const fn col(&self) -> Option<u32> {
        if self.col == 0 {
            None
        } else {
            Some(self.col)
        }
    }

    #[must_use]
    pub const fn is_none(&self) -> bool {
        self.line == 0 && self.col == 0
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "<unknown position>")
        } else {
            write!(f, "line {}, column {}", self.line, self.col)
        }
    }
}

/// Every error kind the interpreter and engine can raise, per the error
/// handling design: each carries the [`Position`] at which it was detected
/// (attached only when the `debug` engine option is on; otherwise `Position::NONE`).
#[derive(Debug, Clone, thiserror::Error)]
pub enum JexlError {
    #[error("parse error at {1}: {0}")]
    Parsing(String, Position),

    #[error("tokenization error at {1}: {0}")]
    Tokenization(String, Position),

    #[error("unknown variable '{0}' at {1}")]
    Variable(String, Position),

    #[error("unknown property '{0}' at {1}")]
    Property(String, Position),

    #[error("unresolved method or constructor '{0}' at {1}")]
    Method(String, Position),

    #[error("ambiguous method or constructor '{0}' at {1}")]
    Ambiguous(String, Position),

    #[error("operator error at {1}: {0}")]
    Operator(String, Position),

    #[error("illegal assignment at {1}: {0}")]
    Assignment(String, Position),

    #[error("'{0}' is already declared in this block at {1}")]
    LexicalRedeclaration(String, Position),

    #[error("'{0}' is shadowed and cannot be accessed at {1}")]
    LexicalShade(String, Position),

    #[error("cannot write to captured variable '{0}' at {1}")]
    ConstCapture(String, Position),

    #[error("annotation '{0}' failed at {1}: {2}")]
    Annotation(String, Position, String),

    #[error("stack overflow at {0}")]
    StackOverflow(Position),

    #[error("evaluation cancelled at {0}")]
    Cancel(Position),

    #[error("uncaught exception at {1}: {0:?}")]
    Throw(crate::Value, Position),

    #[error("runtime error at {1}: {0}")]
    Runtime(String, Position),
}

impl JexlError {
    /// The [`Position`] attached to this error, if any.
    #[must_use]
    pub fn position(&self) -> Position {
        match self {
            Self::Parsing(_, p)
            | Self::Tokenization(_, p)
            | Self::Variable(_, p)
            | Self::Property(_, p)
            | Self::Method(_, p)
            | Self::Ambiguous(_, p)
            | Self::Operator(_, p)
            | Self::Assignment(_, p)
            | Self::LexicalRedeclaration(_, p)
            | Self::LexicalShade(_, p)
            | Self::ConstCapture(_, p)
            | Self::Annotation(_, p, _)
            | Self::StackOverflow(p)
            | Self::Cancel(p)
            | Self::Throw(_, p)
            | Self::Runtime(_, p) => *p,
        }
    }

    /// The value a `catch` clause sees for this error: the thrown value
    /// itself for `Throw` (the "cause"), or a string rendering of the
    /// error for every other (engine-raised) kind.
    #[must_use]
    pub fn to_value(&self) -> crate::Value {
        match self {
            Self::Throw(v, _) => v.clone(),
            other => crate::Value::string(other.to_string()),
        }
    }

    /// Re-attach a position, used when an error bubbles up through a layer
    /// that knows a more precise location than the one it was raised with
    /// (mirrors the source's "fill in missing position" behavior).
    #[must_use]
    pub fn fill_position(mut self, pos: Position) -> Self {
        macro_rules! fill {
            ($($variant:ident),* $(,)?) => {
                match &mut self {
                    $(Self::$variant(_, p) => if p.is_none() { *p = pos; },)*
                    Self::Annotation(_, p, _) => if p.is_none() { *p = pos; },
                    Self::Throw(_, p) => if p.is_none() { *p = pos; },
                }
            };
        }
        fill!(
            Parsing,
            Tokenization,
            Variable,
            Property,
            Method,
            Ambiguous,
            Operator,
            Assignment,
            LexicalRedeclaration,
            LexicalShade,
            ConstCapture,
            StackOverflow,
            Cancel,
            Runtime
        );
        self
    }
}

/// Result type used throughout evaluation. Boxed to keep the `Ok` path
/// (typically a small [`Value`][crate::Value]) free of the error's size.
pub type JexlResult<T> = Result<T, Box<JexlError>>;

impl From<JexlError> for Box<JexlError> {
    fn from(e: JexlError) -> Self {
        Box::new(e)
    }
}

/// Errors produced by the (external) lexer/parser. Kept distinct from
/// [`JexlError`] because parsing happens before any [`Position`]/evaluation
/// context exists; it converts into a `JexlError::Parsing`/`Tokenization` at
/// the point [`Engine::parse`][crate::Engine::parse] surfaces it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("{0}")]
    Tokenization(String, Position),
    #[error("{0}")]
    Syntax(String, Position),
}

impl From<ParseError> for JexlError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::Tokenization(msg, pos) => Self::Tokenization(msg, pos),
            ParseError::Syntax(msg, pos) => Self::Parsing(msg, pos),
        }
    }
}
