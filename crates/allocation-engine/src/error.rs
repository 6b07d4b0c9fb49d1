use thiserror::Error;

/// Rejected configuration. The previously installed state stays active.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Configuration invariant violated: {0}")]
    Invariant(String),

    #[error("{field} out of range: {value} (allowed {min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Configuration parse error: {0}")]
    Parse(String),
}

/// Bad input data. Absorbed into health warnings, never fatal to a cycle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("Malformed position {symbol}: {reason}")]
    MalformedPosition { symbol: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    /// Internal no-op signal: another cycle holds the processing guard.
    #[error("An evaluation cycle is already in flight")]
    AlreadyEvaluating,

    #[error("Automation is disabled")]
    Disabled,

    #[error("Unknown pending action: {0}")]
    UnknownAction(u64),

    #[error("Action {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: u64,
        from: &'static str,
        to: &'static str,
    },
}
