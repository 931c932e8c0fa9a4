//! Error types for every phase, from scanning to execution.

use crate::span::Span;
use thiserror::Error;

/// Stable numeric error codes.
///
/// The values are part of the tooling surface (editors and scripts match on
/// them), so variants are only ever appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    Unknown = 0,
    ExpectedExpression = 1,
    ExpectedIdentifier = 2,
    UnexpectedToken = 3,
    UnexpectedEof = 4,
    InvalidInteger = 5,
    UnterminatedString = 6,
    TopLevelReturn = 7,
    IdentifierNotFound = 8,
    DuplicateIdentifier = 9,
    UnknownOperator = 10,
    IdentifierExpected = 11,
    NonNumberIncrement = 12,
    NonNumberDecrement = 13,
    MismatchedTypes = 14,
    UnknownStringOperator = 15,
    UnknownBoolOperator = 16,
    StackOverflow = 17,
    FrameStackOverflow = 18,
    NonFunction = 19,
    NonFunctionCall = 20,
    ArgumentNumberMismatch = 21,
    NonHashable = 22,
    NonIndexable = 23,
    NoDefaultValue = 24,
    ImmutableValue = 25,
    IndexOutOfBounds = 26,
    OptionalParameter = 27,
    DivisionByZero = 28,
    InvalidEscape = 37,
    UnexpectedChar = 38,
    InvalidOpcode = 39,
    InvalidConstant = 40,
    GlobalOutOfRange = 41,
    BuiltinFailure = 42,
    Config = 43,
    OperandOverflow = 44,
    StackUnderflow = 45,
    RangeTooLarge = 46,
    LocalOutOfRange = 47,
    FreeOutOfRange = 48,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "E{:04}", self.as_u16())
    }
}

/// Lexer errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LexerError {
    #[error("Unexpected character '{0}' at {1}")]
    UnexpectedChar(char, Span),

    #[error("String is not terminated at {0}")]
    UnterminatedString(Span),

    #[error("Invalid escape sequence '\\{0}' at {1}")]
    InvalidEscape(char, Span),

    #[error("Expected an integer, but got '{0}' instead at {1}")]
    InvalidNumber(String, Span),
}

impl LexerError {
    pub fn unexpected_char(c: char, span: Span) -> Self {
        Self::UnexpectedChar(c, span)
    }

    pub fn unterminated_string(span: Span) -> Self {
        Self::UnterminatedString(span)
    }

    pub fn invalid_escape(c: char, span: Span) -> Self {
        Self::InvalidEscape(c, span)
    }

    pub fn invalid_number(s: String, span: Span) -> Self {
        Self::InvalidNumber(s, span)
    }

    pub fn span(&self) -> Span {
        match self {
            Self::UnexpectedChar(_, span) => *span,
            Self::UnterminatedString(span) => *span,
            Self::InvalidEscape(_, span) => *span,
            Self::InvalidNumber(_, span) => *span,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnexpectedChar(..) => ErrorCode::UnexpectedChar,
            Self::UnterminatedString(_) => ErrorCode::UnterminatedString,
            Self::InvalidEscape(..) => ErrorCode::InvalidEscape,
            Self::InvalidNumber(..) => ErrorCode::InvalidInteger,
        }
    }
}

/// Parser errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParserError {
    #[error("Unexpected token '{found}', expected {expected} at {span}")]
    UnexpectedToken {
        expected: String,
        found: String,
        span: Span,
    },

    #[error("Expected an expression, but got '{found}' instead at {span}")]
    ExpectedExpression { found: String, span: Span },

    #[error("Expected an identifier, but got '{found}' instead at {span}")]
    ExpectedIdentifier { found: String, span: Span },

    #[error("Unexpected end of file at {0}")]
    UnexpectedEof(Span),

    #[error("Parameter '{name}' cannot be after an optional parameter at {span}")]
    RequiredAfterOptional { name: String, span: Span },

    #[error("{0}")]
    Lexer(#[from] LexerError),
}

impl ParserError {
    pub fn unexpected_token(
        expected: impl Into<String>,
        found: impl Into<String>,
        span: Span,
    ) -> Self {
        Self::UnexpectedToken {
            expected: expected.into(),
            found: found.into(),
            span,
        }
    }

    pub fn expected_expression(found: impl Into<String>, span: Span) -> Self {
        Self::ExpectedExpression {
            found: found.into(),
            span,
        }
    }

    pub fn expected_identifier(found: impl Into<String>, span: Span) -> Self {
        Self::ExpectedIdentifier {
            found: found.into(),
            span,
        }
    }

    pub fn unexpected_eof(span: Span) -> Self {
        Self::UnexpectedEof(span)
    }

    pub fn required_after_optional(name: impl Into<String>, span: Span) -> Self {
        Self::RequiredAfterOptional {
            name: name.into(),
            span,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Self::UnexpectedToken { span, .. } => *span,
            Self::ExpectedExpression { span, .. } => *span,
            Self::ExpectedIdentifier { span, .. } => *span,
            Self::UnexpectedEof(span) => *span,
            Self::RequiredAfterOptional { span, .. } => *span,
            Self::Lexer(err) => err.span(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnexpectedToken { .. } => ErrorCode::UnexpectedToken,
            Self::ExpectedExpression { .. } => ErrorCode::ExpectedExpression,
            Self::ExpectedIdentifier { .. } => ErrorCode::ExpectedIdentifier,
            Self::UnexpectedEof(_) => ErrorCode::UnexpectedEof,
            Self::RequiredAfterOptional { .. } => ErrorCode::OptionalParameter,
            Self::Lexer(err) => err.code(),
        }
    }
}

/// Bytecode compilation errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("Identifier '{name}' not found at {span}")]
    IdentifierNotFound { name: String, span: Span },

    #[error("Identifier '{name}' is already declared at {span}")]
    AlreadyDeclared { name: String, span: Span },

    #[error("Expected an identifier, but got '{found}' instead at {span}")]
    IdentifierExpected { found: String, span: Span },

    #[error("Cannot modify immutable value '{name}' at {span}")]
    ImmutableValue { name: String, span: Span },

    #[error("Return statement is in the main frame at {0}")]
    TopLevelReturn(Span),

    #[error("Unknown operator '{op}' at {span}")]
    UnknownOperator { op: String, span: Span },

    #[error("Too many {what}: {count} exceeds the limit of {limit} at {span}")]
    OperandOverflow {
        what: &'static str,
        count: usize,
        limit: usize,
        span: Span,
    },
}

impl CompileError {
    pub fn identifier_not_found(name: impl Into<String>, span: Span) -> Self {
        Self::IdentifierNotFound {
            name: name.into(),
            span,
        }
    }

    pub fn already_declared(name: impl Into<String>, span: Span) -> Self {
        Self::AlreadyDeclared {
            name: name.into(),
            span,
        }
    }

    pub fn identifier_expected(found: impl Into<String>, span: Span) -> Self {
        Self::IdentifierExpected {
            found: found.into(),
            span,
        }
    }

    pub fn immutable_value(name: impl Into<String>, span: Span) -> Self {
        Self::ImmutableValue {
            name: name.into(),
            span,
        }
    }

    pub fn operand_overflow(what: &'static str, count: usize, limit: usize, span: Span) -> Self {
        Self::OperandOverflow {
            what,
            count,
            limit,
            span,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Self::IdentifierNotFound { span, .. } => *span,
            Self::AlreadyDeclared { span, .. } => *span,
            Self::IdentifierExpected { span, .. } => *span,
            Self::ImmutableValue { span, .. } => *span,
            Self::TopLevelReturn(span) => *span,
            Self::UnknownOperator { span, .. } => *span,
            Self::OperandOverflow { span, .. } => *span,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::IdentifierNotFound { .. } => ErrorCode::IdentifierNotFound,
            Self::AlreadyDeclared { .. } => ErrorCode::DuplicateIdentifier,
            Self::IdentifierExpected { .. } => ErrorCode::IdentifierExpected,
            Self::ImmutableValue { .. } => ErrorCode::ImmutableValue,
            Self::TopLevelReturn(_) => ErrorCode::TopLevelReturn,
            Self::UnknownOperator { .. } => ErrorCode::UnknownOperator,
            Self::OperandOverflow { .. } => ErrorCode::OperandOverflow,
        }
    }

    /// Remediation text shown under the error message.
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::IdentifierNotFound { name, .. } => {
                Some(format!("You must define '{}' before using it", name))
            }
            Self::AlreadyDeclared { .. } => Some("Remove 'let' before the variable name".into()),
            Self::ImmutableValue { .. } => Some("Declare the variable with 'let mut'".into()),
            Self::TopLevelReturn(_) => Some("Use 'exit(0);' instead".into()),
            _ => None,
        }
    }
}

/// Runtime errors.
///
/// These carry no source location; the VM reports what went wrong, not where.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("stack overflow")]
    StackOverflow,

    #[error("frame stack overflow")]
    FrameStackOverflow,

    #[error("stack underflow")]
    StackUnderflow,

    #[error("mismatched types '{0}' and '{1}'")]
    MismatchedTypes(&'static str, &'static str),

    #[error("unknown operator '{op}' for '{left}' and '{right}'")]
    UnknownOperator {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("cannot call non-function '{0}'")]
    NotCallable(&'static str),

    #[error("not a function '{0}'")]
    NotAFunction(&'static str),

    #[error("expected {expected} arguments, but got {got}")]
    WrongArity { expected: usize, got: usize },

    #[error("non-hashable type '{0}'")]
    NonHashable(&'static str),

    #[error("non-indexable type '{0}'")]
    NonIndexable(&'static str),

    #[error("index out of bounds '{index}' (length {length})")]
    IndexOutOfBounds { index: i64, length: usize },

    #[error("cannot modify immutable value '{0}'")]
    ImmutableValue(&'static str),

    #[error("cannot increment non-number value '{0}'")]
    NonNumberIncrement(&'static str),

    #[error("cannot decrement non-number value '{0}'")]
    NonNumberDecrement(&'static str),

    #[error("no value to set for function default parameter")]
    NoDefaultValue,

    #[error("return statement is in the main frame")]
    TopLevelReturn,

    #[error("invalid opcode {byte:#04x} at offset {offset}")]
    InvalidOpcode { byte: u8, offset: usize },

    #[error("constant index {0} is out of range")]
    InvalidConstant(usize),

    #[error("global slot {0} is out of range")]
    GlobalOutOfRange(usize),

    #[error("local slot {0} is out of range")]
    LocalOutOfRange(usize),

    #[error("free variable {0} is out of range")]
    FreeOutOfRange(usize),

    #[error("range of {0} elements is too large")]
    RangeTooLarge(u64),

    #[error("{name}: {message}")]
    Builtin { name: &'static str, message: String },
}

impl RuntimeError {
    pub fn wrong_arity(expected: usize, got: usize) -> Self {
        Self::WrongArity { expected, got }
    }

    pub fn index_out_of_bounds(index: i64, length: usize) -> Self {
        Self::IndexOutOfBounds { index, length }
    }

    pub fn builtin(name: &'static str, message: impl Into<String>) -> Self {
        Self::Builtin {
            name,
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::StackOverflow => ErrorCode::StackOverflow,
            Self::FrameStackOverflow => ErrorCode::FrameStackOverflow,
            Self::StackUnderflow => ErrorCode::StackUnderflow,
            Self::MismatchedTypes(..) => ErrorCode::MismatchedTypes,
            Self::UnknownOperator { left: "String", .. } => ErrorCode::UnknownStringOperator,
            Self::UnknownOperator { left: "Bool", .. } => ErrorCode::UnknownBoolOperator,
            Self::UnknownOperator { .. } => ErrorCode::UnknownOperator,
            Self::DivisionByZero => ErrorCode::DivisionByZero,
            Self::NotCallable(_) => ErrorCode::NonFunctionCall,
            Self::NotAFunction(_) => ErrorCode::NonFunction,
            Self::WrongArity { .. } => ErrorCode::ArgumentNumberMismatch,
            Self::NonHashable(_) => ErrorCode::NonHashable,
            Self::NonIndexable(_) => ErrorCode::NonIndexable,
            Self::IndexOutOfBounds { .. } => ErrorCode::IndexOutOfBounds,
            Self::ImmutableValue(_) => ErrorCode::ImmutableValue,
            Self::NonNumberIncrement(_) => ErrorCode::NonNumberIncrement,
            Self::NonNumberDecrement(_) => ErrorCode::NonNumberDecrement,
            Self::NoDefaultValue => ErrorCode::NoDefaultValue,
            Self::TopLevelReturn => ErrorCode::TopLevelReturn,
            Self::InvalidOpcode { .. } => ErrorCode::InvalidOpcode,
            Self::InvalidConstant(_) => ErrorCode::InvalidConstant,
            Self::GlobalOutOfRange(_) => ErrorCode::GlobalOutOfRange,
            Self::LocalOutOfRange(_) => ErrorCode::LocalOutOfRange,
            Self::FreeOutOfRange(_) => ErrorCode::FreeOutOfRange,
            Self::RangeTooLarge(_) => ErrorCode::RangeTooLarge,
            Self::Builtin { .. } => ErrorCode::BuiltinFailure,
        }
    }
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Bytecode (de)serialization errors.
#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("cannot encode bytecode: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("cannot decode bytecode: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// A unified error type for all phases.
#[derive(Debug, Error)]
pub enum SharkError {
    #[error("Lexer error: {0}")]
    Lexer(#[from] LexerError),

    #[error("Parser error: {0}")]
    Parser(#[from] ParserError),

    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Bytecode error: {0}")]
    Serialize(#[from] SerializeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SharkError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Lexer(err) => err.code(),
            Self::Parser(err) => err.code(),
            Self::Compile(err) => err.code(),
            Self::Runtime(err) => err.code(),
            Self::Config(_) => ErrorCode::Config,
            Self::Serialize(_) | Self::Io(_) => ErrorCode::Unknown,
        }
    }

    pub fn hint(&self) -> Option<String> {
        match self {
            Self::Compile(err) => err.hint(),
            _ => None,
        }
    }

    /// Source location, for the phases that track one.
    pub fn span(&self) -> Option<Span> {
        match self {
            Self::Lexer(err) => Some(err.span()),
            Self::Parser(err) => Some(err.span()),
            Self::Compile(err) => Some(err.span()),
            _ => None,
        }
    }
}

pub type LexerResult<T> = Result<T, LexerError>;
pub type ParserResult<T> = Result<T, ParserError>;
pub type CompileResult<T> = Result<T, CompileError>;
pub type RuntimeResult<T> = Result<T, RuntimeError>;
