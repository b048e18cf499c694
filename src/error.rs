use thiserror::Error;

/// Errors raised while loading and validating a box-model configuration.
///
/// These are unrecoverable for the run: the driver stays unconfigured and
/// never proceeds with a partial setup. Every variant carries the offending
/// key or name verbatim so the message points at the exact input field.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field is absent from the configuration.
    #[error("missing required configuration field: {0}")]
    MissingField(String),

    /// A conditions column key has too few dot-delimited segments
    /// (the grammar is `<CATEGORY>.<name>.<unit>`).
    #[error("malformed rate parameter key: {0}")]
    MalformedRateKey(String),

    /// A phase or reaction references a species that was never declared.
    #[error("{referrer} references undeclared species: {species}")]
    UndeclaredSpecies { referrer: String, species: String },

    /// A reaction references a phase that was never declared.
    #[error("{referrer} references undeclared phase: {phase}")]
    UndeclaredPhase { referrer: String, phase: String },

    /// A box-model option key carries an unrecognized time unit.
    #[error("unrecognized time unit '{unit}' in option key: {key}")]
    InvalidTimeUnit { key: String, unit: String },

    /// A field exists but has the wrong shape or type.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("failed to parse configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// The external chemistry solver rejected input or failed to converge.
///
/// Terminal for the run; output rows accumulated before the failing step
/// are preserved and returned alongside this error.
#[derive(Debug, Clone, Error)]
#[error("solver failed at t={time_s}s: {message}")]
pub struct SolverError {
    /// Simulation time at which the failure occurred, in seconds.
    pub time_s: f64,
    pub message: String,
}

impl SolverError {
    pub fn new(time_s: f64, message: impl Into<String>) -> Self {
        SolverError {
            time_s,
            message: message.into(),
        }
    }
}
