//! Ambient error classification (A2). Evaluation helpers return plain diagnostic
//! strings at the `Datamodel` boundary; the session driver classifies any such
//! string into one of these variants before it becomes a queued `error.*` event or a
//! fatal abort, so call sites can match on error *kind* instead of parsing text.

use std::fmt;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone)]
pub enum FsmError {
    /// W3C `error.execution`: a script/expression/action failed to evaluate.
    Execution { message: String },
    /// W3C `error.communication`: a `<send>`/`<invoke>` target could not be reached
    /// or was malformed.
    Communication { message: String },
    /// An interpreter invariant was violated (e.g. the eventless-transition cycle
    /// cap was hit) or the document itself is malformed beyond what `ChartBuilder`
    /// already rejects. Fatal errors stop the owning session.
    Fatal { message: String },
}

impl FsmError {
    pub fn execution(message: impl Into<String>) -> FsmError {
        FsmError::Execution {
            message: message.into(),
        }
    }

    pub fn communication(message: impl Into<String>) -> FsmError {
        FsmError::Communication {
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> FsmError {
        FsmError::Fatal {
            message: message.into(),
        }
    }

    /// The W3C event name this error is reported under, or `None` for fatal errors
    /// which never become a queued event.
    pub fn event_name(&self) -> Option<&'static str> {
        match self {
            FsmError::Execution { .. } => Some("error.execution"),
            FsmError::Communication { .. } => Some("error.communication"),
            FsmError::Fatal { .. } => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            FsmError::Execution { message }
            | FsmError::Communication { message }
            | FsmError::Fatal { message } => message,
        }
    }
}

impl Display for FsmError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            FsmError::Execution { message } => write!(f, "execution error: {message}"),
            FsmError::Communication { message } => write!(f, "communication error: {message}"),
            FsmError::Fatal { message } => write!(f, "fatal error: {message}"),
        }
    }
}

impl std::error::Error for FsmError {}

impl From<String> for FsmError {
    /// Evaluation helpers that predate this classification return plain `String`s;
    /// treat an unclassified failure as an execution error, the most common case.
    fn from(message: String) -> Self {
        FsmError::Execution { message }
    }
}
