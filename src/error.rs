//! Error types for relcomp.
//!
//! All errors are strongly typed using thiserror so callers can match on
//! the failing layer (configuration, knowledge base I/O, rule handling).

use std::path::PathBuf;

use thiserror::Error;

/// Configuration errors, raised before any mining starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Input knowledge base is required")]
    MissingInput,

    #[error("Unknown evaluation metric '{symbol}' (expected one of τ, δ, h)")]
    UnknownMetric {
        symbol: String,
    },

    #[error("Parameter '{name}' = {value} is out of range: {expected}")]
    OutOfRange {
        name: &'static str,
        value: f64,
        expected: &'static str,
    },

    #[error("Unknown negative sampling strategy '{name}' (expected uniform, pos-relative or neg-interval)")]
    UnknownStrategy {
        name: String,
    },

    #[error("Unknown rule template '{name}'")]
    UnknownTemplate {
        name: String,
    },
}

/// Knowledge base loading and dumping errors.
#[derive(Debug, Error)]
pub enum KbError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed {file} at line {line}: {reason}")]
    Malformed {
        file: String,
        line: usize,
        reason: String,
    },

    #[error("Corrupted relation file {path}: {reason}")]
    Corrupted {
        path: PathBuf,
        reason: String,
    },

    #[error("Relation '{name}' not found")]
    UnknownRelation {
        name: String,
    },

    #[error("Relation '{name}' expects arity {expected}, got {actual}")]
    ArityMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Duplicate relation '{name}'")]
    DuplicateRelation {
        name: String,
    },

    #[error("Constant id {id} is outside the dictionary (1..={max})")]
    UnknownConstant {
        id: u32,
        max: u32,
    },

    #[error("Failed to write summary: {message}")]
    Summary {
        message: String,
    },
}

impl KbError {
    /// Wraps an I/O error with the path it happened on.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Builds a malformed-file error.
    #[must_use]
    pub fn malformed(file: impl Into<String>, line: usize, reason: impl Into<String>) -> Self {
        Self::Malformed {
            file: file.into(),
            line,
            reason: reason.into(),
        }
    }
}

/// Rule construction, specialization and parsing errors.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Argument location ({literal}, {position}) does not exist")]
    BadLocation {
        literal: usize,
        position: usize,
    },

    #[error("Argument at ({literal}, {position}) is not empty")]
    SlotOccupied {
        literal: usize,
        position: usize,
    },

    #[error("Variable X{var} is not used by the rule")]
    UnknownVariable {
        var: u32,
    },

    #[error("Rule structure is invalid: {reason}")]
    InvalidStructure {
        reason: String,
    },

    #[error("Cannot parse rule '{text}': {reason}")]
    Parse {
        text: String,
        reason: String,
    },
}

impl RuleError {
    /// Builds a parse error.
    #[must_use]
    pub fn parse(text: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            text: text.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this error only means the candidate should be dropped.
    #[must_use]
    pub const fn is_invalid_candidate(&self) -> bool {
        matches!(self, Self::InvalidStructure { .. })
    }
}

/// Top-level error type for relcomp.
#[derive(Debug, Error)]
pub enum RelcompError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Knowledge base error: {0}")]
    Kb(#[from] KbError),

    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    #[error("Validation failed: {missing} facts missing, {extra} facts extra")]
    ValidationFailed {
        missing: usize,
        extra: usize,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl RelcompError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns true if this is a knowledge base error.
    #[must_use]
    pub const fn is_kb(&self) -> bool {
        matches!(self, Self::Kb(_))
    }

    /// Returns true if this is a rule error.
    #[must_use]
    pub const fn is_rule(&self) -> bool {
        matches!(self, Self::Rule(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

/// Result type alias for relcomp operations.
pub type RelcompResult<T> = Result<T, RelcompError>;
