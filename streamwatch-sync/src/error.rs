//! Error types for streamwatch-sync.

use thiserror::Error;

use streamwatch_renderer::RenderError;

/// Failures talking to the live-set provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport-level failure (DNS, TLS, timeout, connection reset).
    #[error("provider request failed: {0}")]
    Request(String),

    /// The provider answered with a non-success status.
    #[error("provider returned HTTP {status} for {endpoint}")]
    Status { status: u16, endpoint: String },

    /// The provider's payload did not match the expected shape.
    #[error("provider response could not be decoded: {0}")]
    Decode(String),

    /// No broadcaster with this login exists.
    #[error("no broadcaster named '{name}'")]
    NotFound { name: String },
}

/// Failures talking to the chat channel.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transport-level failure (DNS, TLS, timeout, connection reset).
    #[error("channel request failed: {0}")]
    Request(String),

    /// The chat service answered with a non-success status.
    #[error("channel returned HTTP {status} for {endpoint}")]
    Status { status: u16, endpoint: String },

    /// The chat service's payload did not match the expected shape.
    #[error("channel response could not be decoded: {0}")]
    Decode(String),
}

/// All errors that can abort a reconciliation pass or a correlator run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("render error: {0}")]
    Render(#[from] RenderError),
}

impl SyncError {
    /// Short error class name used in admin-channel reports.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Provider(ProviderError::NotFound { .. }) => "NotFound",
            SyncError::Provider(_) => "ProviderError",
            SyncError::Store(_) => "StoreError",
            SyncError::Render(_) => "RenderError",
        }
    }

    /// `true` for lookups of names that do not exist, which are surfaced to
    /// the caller instead of being reported as failures.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::Provider(ProviderError::NotFound { .. }))
    }
}
