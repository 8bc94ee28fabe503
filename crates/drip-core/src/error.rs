use thiserror::Error;

use crate::delivery::TransitionRejected;

// ---------------------------------------------------------------------------
// SyntaxError
// ---------------------------------------------------------------------------

/// Malformed condition or time-expression text, raised at parse time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxError {
    #[error("unknown comparison operator '{0}'")]
    UnknownOperator(String),

    #[error("unknown boolean operator '{0}': expected 'and' or 'or'")]
    UnknownCombinator(String),

    #[error("invalid operand '{0}'")]
    InvalidOperand(String),

    #[error("expected an operand after '{0}'")]
    MissingOperand(String),

    #[error("unterminated string literal starting at '{0}'")]
    UnterminatedString(String),

    #[error("'{0}' is neither a timestamp nor an attribute path")]
    InvalidTimeExpression(String),

    #[error("unknown filter '{0}': expected 'add' or 'subtract'")]
    UnknownFilter(String),

    #[error("malformed filter '{0}': expected '<name>: <amount>, <unit>'")]
    MalformedFilter(String),

    #[error("unknown time unit '{0}'")]
    UnknownUnit(String),
}

// ---------------------------------------------------------------------------
// EvaluationError
// ---------------------------------------------------------------------------

/// A parsed expression could not be evaluated against a given context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationError {
    #[error("attribute '{0}' is not defined")]
    MissingAttribute(String),

    #[error("attribute '{0}' does not resolve to a value")]
    NotAValue(String),

    #[error("'{operand}' evaluated to {found}, expected a boolean")]
    NotBoolean { operand: String, found: &'static str },

    #[error("cannot apply '{op}' to {left} and {right}")]
    Incomparable {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("attribute '{path}' is {found}, expected a timestamp")]
    NotATimestamp { path: String, found: &'static str },

    #[error("date arithmetic out of range: {0}")]
    OutOfRange(String),
}

// ---------------------------------------------------------------------------
// DripError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DripError {
    #[error("not initialized: run 'drip init'")]
    NotInitialized,

    #[error("communication not found: {0}")]
    CommunicationNotFound(String),

    #[error("recipient not found: {0}")]
    RecipientNotFound(String),

    #[error("delivery not found: {communication}/{recipient}")]
    DeliveryNotFound {
        communication: String,
        recipient: String,
    },

    #[error("delivery already exists: {communication}/{recipient}")]
    DeliveryExists {
        communication: String,
        recipient: String,
    },

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("syntax error: {0}")]
    Syntax(#[from] SyntaxError),

    #[error("evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("transition rejected: {0}")]
    Rejected(#[from] TransitionRejected),

    #[error("delivery db: {0}")]
    Db(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DripError>;
