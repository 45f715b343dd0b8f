//! Cacheability gate and host environment.

use serde_json::Value;

use super::config::CacheConfig;
use super::descriptor::{CacheDescriptor, Context, Granularity};

/// Context key holding the request method of the current call, if any.
pub const CONTEXT_METHOD: &str = "method";

/// Host environment consulted by the render cache.
pub trait Environment: Send + Sync {
    /// Whether the current call may read and write the cache at all.
    fn is_request_cacheable(&self, context: &Context) -> bool;

    /// Key fragments partitioning entries for `granularity`.
    fn granularity_keys(&self, granularity: Granularity, context: &Context) -> Vec<String>;
}

/// Environment driven by the render context.
///
/// Calls whose context carries a [`CONTEXT_METHOD`] other than `GET` or `HEAD`
/// are not cacheable. `PerContext` entries are partitioned by the configured
/// context axes: `axis=<json>` when the context has the axis, bare `axis` when
/// it does not.
#[derive(Debug, Clone, Default)]
pub struct StaticEnvironment {
    axes: Vec<String>,
}

impl StaticEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_axis(mut self, axis: impl Into<String>) -> Self {
        self.axes.push(axis.into());
        self
    }
}

impl Environment for StaticEnvironment {
    fn is_request_cacheable(&self, context: &Context) -> bool {
        match context.get(CONTEXT_METHOD).and_then(Value::as_str) {
            Some(method) => {
                method.eq_ignore_ascii_case("GET") || method.eq_ignore_ascii_case("HEAD")
            }
            None => true,
        }
    }

    fn granularity_keys(&self, granularity: Granularity, context: &Context) -> Vec<String> {
        if granularity != Granularity::PerContext {
            return Vec::new();
        }

        self.axes
            .iter()
            .map(|axis| match context.get(axis) {
                Some(value) => format!("{axis}={value}"),
                None => axis.clone(),
            })
            .collect()
    }
}

/// Whether caching applies to a whole render pass of `kind`.
///
/// Requires a configured granularity on the default descriptor, the global
/// and per-kind toggles, and a cacheable request.
pub fn is_cacheable(
    config: &CacheConfig,
    environment: &dyn Environment,
    kind: &str,
    default: &CacheDescriptor,
    context: &Context,
) -> bool {
    default.granularity.is_some()
        && config.enabled
        && config.is_kind_enabled(kind)
        && environment.is_request_cacheable(context)
}
