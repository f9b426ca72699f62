use serde::{Deserialize, Serialize};
use std::fmt;

/// RFC 6241 style error tags used on the management surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MgmtErrorKind {
    DataMissing,
    OperationFailed,
    UnknownElement,
}

impl MgmtErrorKind {
    pub fn tag(&self) -> &'static str {
        match self {
            MgmtErrorKind::DataMissing => "data-missing",
            MgmtErrorKind::OperationFailed => "operation-failed",
            MgmtErrorKind::UnknownElement => "unknown-element",
        }
    }
}

/// Structured management error: kind plus offending path plus message.
///
/// These render into the RPC `error` string field, so `Display` is the
/// wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MgmtError {
    pub kind: MgmtErrorKind,
    pub path: String,
    pub message: String,
}

impl MgmtError {
    pub fn data_missing(message: impl Into<String>) -> Self {
        MgmtError {
            kind: MgmtErrorKind::DataMissing,
            path: String::new(),
            message: message.into(),
        }
    }

    pub fn operation_failed(message: impl Into<String>) -> Self {
        MgmtError {
            kind: MgmtErrorKind::OperationFailed,
            path: String::new(),
            message: message.into(),
        }
    }

    pub fn unknown_element(element: impl fmt::Display) -> Self {
        MgmtError {
            kind: MgmtErrorKind::UnknownElement,
            path: String::new(),
            message: format!("unknown element {}", element),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }
}

impl fmt::Display for MgmtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}: {}", self.kind.tag(), self.message)
        } else {
            write!(f, "{}: {}: {}", self.kind.tag(), self.path, self.message)
        }
    }
}

impl std::error::Error for MgmtError {}
