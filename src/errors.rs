use std::fmt;

#[derive(Debug)]
pub enum TrialCamError {
    SourceError(String),
    EncodingError(String),
    MuxingError(String),
    IoError(String),
    ConfigError(String),
    WriterError(String),
}

impl fmt::Display for TrialCamError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TrialCamError::SourceError(msg) => write!(f, "Frame source error: {}", msg),
            TrialCamError::EncodingError(msg) => write!(f, "Encoding error: {}", msg),
            TrialCamError::MuxingError(msg) => write!(f, "Muxing error: {}", msg),
            TrialCamError::IoError(msg) => write!(f, "IO error: {}", msg),
            TrialCamError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            TrialCamError::WriterError(msg) => write!(f, "Writer error: {}", msg),
        }
    }
}

impl std::error::Error for TrialCamError {}

impl From<std::io::Error> for TrialCamError {
    fn from(e: std::io::Error) -> Self {
        TrialCamError::IoError(e.to_string())
    }
}

/// Session-level error with a machine-matchable kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionErrorKind {
    Timeout,
    Closed,
    AlreadyStarted,
    AlreadyStopped,
    AlreadyClosed,
    RecordingActive,
    InvalidArgument,
    Backend,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionError {
    pub kind: SessionErrorKind,
    pub message: String,
}

impl SessionError {
    pub fn timeout() -> Self {
        Self {
            kind: SessionErrorKind::Timeout,
            message: "timeout".to_string(),
        }
    }

    pub fn closed() -> Self {
        Self {
            kind: SessionErrorKind::Closed,
            message: "session is closed".to_string(),
        }
    }

    pub fn already_started() -> Self {
        Self {
            kind: SessionErrorKind::AlreadyStarted,
            message: "acquisition is already running".to_string(),
        }
    }

    pub fn already_stopped() -> Self {
        Self {
            kind: SessionErrorKind::AlreadyStopped,
            message: "acquisition is already stopped".to_string(),
        }
    }

    pub fn already_closed() -> Self {
        Self {
            kind: SessionErrorKind::AlreadyClosed,
            message: "session is already closed".to_string(),
        }
    }

    pub fn recording_active(what: &str) -> Self {
        Self {
            kind: SessionErrorKind::RecordingActive,
            message: format!("{what} is not allowed while a trial is recording"),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self {
            kind: SessionErrorKind::InvalidArgument,
            message: message.into(),
        }
    }

    pub fn backend(error: TrialCamError) -> Self {
        Self {
            kind: SessionErrorKind::Backend,
            message: error.to_string(),
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for SessionError {}
