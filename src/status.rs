//! User-facing status notices.
//!
//! The client reports transaction outcomes as short notices (a title plus
//! optional detail) for whatever surface shows them to the user. The crate
//! itself only ships a sink that writes them to `tracing`.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusNotice {
    pub level: StatusLevel,
    pub title: String,
    pub description: Option<String>,
}

impl StatusNotice {
    pub fn new(level: StatusLevel, title: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl fmt::Display for StatusNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{}: {}", self.title, description),
            None => f.write_str(&self.title),
        }
    }
}

/// Receives status notices.
pub trait StatusSink: Send + Sync {
    fn publish(&self, notice: StatusNotice);
}

/// Writes notices to `tracing` at a level matching the notice.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingStatusSink;

impl StatusSink for TracingStatusSink {
    fn publish(&self, notice: StatusNotice) {
        let description = notice.description.as_deref().unwrap_or("");
        match notice.level {
            StatusLevel::Info | StatusLevel::Success => {
                tracing::info!(title = %notice.title, description, "status")
            }
            StatusLevel::Warning => tracing::warn!(title = %notice.title, description, "status"),
            StatusLevel::Error => tracing::error!(title = %notice.title, description, "status"),
        }
    }
}
