use thiserror::Error;

/// Failures surfaced by the dashboard core.
///
/// `Validation` and `ShapeMismatch` are resolved where they occur (the
/// operation is aborted). `Network` and `Parse` are captured into view-state
/// and shown inline; they never escape the orchestration layer. `Parse` is
/// reserved for the diagnosis result; a malformed market-data body is a
/// `Network` failure of that endpoint.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DashError {
    #[error("invalid symbol '{input}': expected DIGITS.MARKET, e.g. 00700.HK or 600300.SH")]
    Validation { input: String },

    #[error("{0}")]
    Network(String),

    #[error("result format error: {0}")]
    Parse(String),

    #[error("{kind} series expects {expected} points, got {got}")]
    ShapeMismatch {
        kind: &'static str,
        expected: &'static str,
        got: &'static str,
    },

    #[error("chart session already disposed")]
    Disposed,
}

impl DashError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

impl From<reqwest::Error> for DashError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Network(format!("request timed out: {}", err));
        }
        if err.is_decode() {
            return Self::Network(format!("malformed response: {}", err));
        }
        Self::Network(err.to_string())
    }
}
