use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Validation,
    Warning,
    Error,
}

impl NoticeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// Transient message shown to the user after a refused or failed action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub title: String,
    pub message: String,
}

impl Notice {
    pub const NO_IMAGE_SELECTED: &'static str = "No image selected";
    pub const NO_ANALYSIS_YET: &'static str = "No analysis yet";
    pub const NO_QUESTION: &'static str = "No question entered";
    pub const BUSY: &'static str = "Analysis in progress";
    pub const FILES_TOO_LARGE: &'static str = "Files too large";
    pub const UNSUPPORTED_FILE: &'static str = "Unsupported file";
    pub const ANALYSIS_FAILED: &'static str = "Error analyzing images";

    pub fn new(kind: NoticeKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn validation(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NoticeKind::Validation, title, message)
    }

    pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NoticeKind::Warning, title, message)
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NoticeKind::Error, title, message)
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            f.write_str(&self.title)
        } else {
            write!(f, "{}: {}", self.title, self.message)
        }
    }
}
