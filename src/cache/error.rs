use std::error::Error as StdError;

use thiserror::Error;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors surfaced by a render pass.
#[derive(Debug, Error)]
pub enum RenderCacheError {
    #[error("render cache configuration error: {message}")]
    Configuration { message: String },
    #[error(transparent)]
    Renderer(#[from] RenderError),
    #[error("renderer returned no output for object `{id}`")]
    MissingOutput { id: String },
    #[error("hook `{hook}` failed")]
    Hook {
        hook: String,
        #[source]
        source: HookError,
    },
}

impl RenderCacheError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

/// Failure reported by a [`RenderController`](super::RenderController).
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render failed for `{kind}`: {message}")]
    Failed { kind: String, message: String },
    #[error("render failed for `{kind}`")]
    Source {
        kind: String,
        #[source]
        source: BoxError,
    },
}

impl RenderError {
    pub fn failed(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn source(kind: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Source {
            kind: kind.into(),
            source: source.into(),
        }
    }
}

/// Failure raised by a hook subscriber.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HookError {
    message: String,
}

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure reported by a [`CacheStore`](super::CacheStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache store unavailable: {message}")]
    Unavailable { message: String },
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}
