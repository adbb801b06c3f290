//! Crate-level error types.
//!
//! [`AugmentError`] covers the engine taxonomy (dependency loads, missing
//! host elements, render failures, configuration). [`LoadFailure`] is the
//! settle value shared by every waiter on one script URL, so it is `Clone`.
//! The collaborator REST client has its own `ApiError` in `api::client`.

use thiserror::Error;

/// Why a single script resource failed to become executable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to load script {url}: {detail}")]
pub struct LoadFailure {
    pub url: String,
    pub detail: String,
}

impl LoadFailure {
    pub fn new(url: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            detail: detail.into(),
        }
    }
}

/// A markdown renderer rejected its input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("render failed: {0}")]
pub struct RenderError(pub String);

/// Engine-level failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AugmentError {
    /// A required script failed to load; the dependent feature stays off.
    #[error("required dependency failed: {0}")]
    DependencyLoad(#[from] LoadFailure),

    /// An optional language pack failed; rendering continues without it.
    #[error("optional dependency failed: {0}")]
    OptionalDependency(LoadFailure),

    /// The editor was asked to open before its dependencies were ready.
    #[error("editor dependencies are not ready")]
    DependenciesNotReady,

    /// A host anchor element could not be found by selector.
    #[error("host element not found: {selector}")]
    HostElementMissing { selector: String },

    #[error(transparent)]
    Render(#[from] RenderError),

    /// The page refused a DOM operation.
    #[error("host page rejected {0}")]
    Dom(String),

    /// Configuration could not be read or parsed.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl AugmentError {
    pub fn host_missing(selector: impl Into<String>) -> Self {
        AugmentError::HostElementMissing {
            selector: selector.into(),
        }
    }

    /// `true` for failures that only degrade the page and should be logged
    /// at warning level or below.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            AugmentError::DependencyLoad(_) | AugmentError::Config(_)
        )
    }
}

impl From<toml::de::Error> for AugmentError {
    fn from(e: toml::de::Error) -> Self {
        AugmentError::Config(e.to_string())
    }
}

impl From<serde_json::Error> for AugmentError {
    fn from(e: serde_json::Error) -> Self {
        AugmentError::Config(e.to_string())
    }
}
