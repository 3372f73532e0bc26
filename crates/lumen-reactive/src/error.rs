//! Notification errors

use thiserror::Error;

/// Result type for mutators
pub type Result<T> = std::result::Result<T, NotifyError>;

/// A watch callback failed while a change was being delivered.
///
/// Delivery stops at the first failure; callbacks after it do not run.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("watch callback on `{path}` failed")]
    Callback {
        path: String,
        #[source]
        source: anyhow::Error,
    },
}

impl NotifyError {
    /// Path of the change being delivered, joined with `.`
    pub fn path(&self) -> &str {
        match self {
            NotifyError::Callback { path, .. } => path,
        }
    }
}
