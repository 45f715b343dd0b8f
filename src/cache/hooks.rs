//! Extension hook registry.
//!
//! Subscribers are registered per (kind, stage) and run in registration order.
//! Each receives the in-flight data mutably plus the per-object context. A
//! failing subscriber aborts the render pass.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::trace;

use super::descriptor::{CacheDescriptor, Context};
use super::error::{HookError, RenderCacheError};

/// Stage at which a hook runs during key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    DefaultCacheInfo,
    Context,
    CacheInfo,
    Keys,
    Hash,
    Tags,
    Validate,
    Cid,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::DefaultCacheInfo => "default_cache_info",
            Stage::Context => "context",
            Stage::CacheInfo => "cache_info",
            Stage::Keys => "keys",
            Stage::Hash => "hash",
            Stage::Tags => "tags",
            Stage::Validate => "validate",
            Stage::Cid => "cid",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully qualified hook name, e.g. `node.keys`.
pub fn hook_name(kind: &str, stage: Stage) -> String {
    format!("{kind}.{stage}")
}

type Subscriber<T> = Arc<dyn Fn(&mut T, &Context) -> Result<(), HookError> + Send + Sync>;
type PostRender = Arc<dyn Fn(&str, &Value, &Context) + Send + Sync>;

struct Subscribers<T> {
    stage: Stage,
    by_kind: HashMap<String, Vec<Subscriber<T>>>,
}

impl<T> Subscribers<T> {
    fn new(stage: Stage) -> Self {
        Self {
            stage,
            by_kind: HashMap::new(),
        }
    }

    fn push(&mut self, kind: &str, subscriber: Subscriber<T>) {
        self.by_kind
            .entry(kind.to_string())
            .or_default()
            .push(subscriber);
    }

    fn dispatch(
        &self,
        kind: &str,
        data: &mut T,
        context: &Context,
    ) -> Result<(), RenderCacheError> {
        let Some(subscribers) = self.by_kind.get(kind) else {
            return Ok(());
        };

        trace!(
            hook = %hook_name(kind, self.stage),
            subscribers = subscribers.len(),
            "dispatching render cache hook"
        );

        for subscriber in subscribers {
            subscriber(&mut *data, context).map_err(|source| RenderCacheError::Hook {
                hook: hook_name(kind, self.stage),
                source,
            })?;
        }
        Ok(())
    }
}

/// Ordered, typed subscribers for every key-derivation stage.
pub struct HookRegistry {
    default_cache_info: Subscribers<CacheDescriptor>,
    context: Subscribers<Context>,
    cache_info: Subscribers<CacheDescriptor>,
    keys: Subscribers<Vec<String>>,
    hash: Subscribers<Map<String, Value>>,
    tags: Subscribers<Map<String, Value>>,
    validate: Subscribers<Map<String, Value>>,
    cid: Subscribers<Vec<String>>,
    post_render: HashMap<(String, String), Vec<PostRender>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            default_cache_info: Subscribers::new(Stage::DefaultCacheInfo),
            context: Subscribers::new(Stage::Context),
            cache_info: Subscribers::new(Stage::CacheInfo),
            keys: Subscribers::new(Stage::Keys),
            hash: Subscribers::new(Stage::Hash),
            tags: Subscribers::new(Stage::Tags),
            validate: Subscribers::new(Stage::Validate),
            cid: Subscribers::new(Stage::Cid),
            post_render: HashMap::new(),
        }
    }

    /// Rewrite the batch-wide default descriptor before the cacheability check.
    pub fn on_default_cache_info<F>(&mut self, kind: &str, hook: F) -> &mut Self
    where
        F: Fn(&mut CacheDescriptor, &Context) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.default_cache_info.push(kind, Arc::new(hook));
        self
    }

    /// Rewrite the object-scoped context. The second argument is the batch context.
    pub fn on_context<F>(&mut self, kind: &str, hook: F) -> &mut Self
    where
        F: Fn(&mut Context, &Context) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.context.push(kind, Arc::new(hook));
        self
    }

    /// Rewrite a whole object descriptor. Setting `cid` here finalizes it.
    ///
    /// A descriptor that still yields a cid must keep the batch bin; moving it
    /// fails the pass with a configuration error.
    pub fn on_cache_info<F>(&mut self, kind: &str, hook: F) -> &mut Self
    where
        F: Fn(&mut CacheDescriptor, &Context) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.cache_info.push(kind, Arc::new(hook));
        self
    }

    pub fn on_keys<F>(&mut self, kind: &str, hook: F) -> &mut Self
    where
        F: Fn(&mut Vec<String>, &Context) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.keys.push(kind, Arc::new(hook));
        self
    }

    pub fn on_hash<F>(&mut self, kind: &str, hook: F) -> &mut Self
    where
        F: Fn(&mut Map<String, Value>, &Context) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.hash.push(kind, Arc::new(hook));
        self
    }

    pub fn on_tags<F>(&mut self, kind: &str, hook: F) -> &mut Self
    where
        F: Fn(&mut Map<String, Value>, &Context) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.tags.push(kind, Arc::new(hook));
        self
    }

    pub fn on_validate<F>(&mut self, kind: &str, hook: F) -> &mut Self
    where
        F: Fn(&mut Map<String, Value>, &Context) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.validate.push(kind, Arc::new(hook));
        self
    }

    /// Rewrite the final key fragments right before the cid is joined.
    pub fn on_cid<F>(&mut self, kind: &str, hook: F) -> &mut Self
    where
        F: Fn(&mut Vec<String>, &Context) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.cid.push(kind, Arc::new(hook));
        self
    }

    /// Observe the final payload of one object. The return value is ignored.
    ///
    /// Callbacks are keyed by `(kind, id)` on the registry, so they must be
    /// registered before the pass that renders the object. A renderer cannot
    /// attach one to its own output. Registrations are never removed and fire
    /// on every later pass that renders the same id.
    pub fn on_post_render<F>(&mut self, kind: &str, id: &str, callback: F) -> &mut Self
    where
        F: Fn(&str, &Value, &Context) + Send + Sync + 'static,
    {
        self.post_render
            .entry((kind.to_string(), id.to_string()))
            .or_default()
            .push(Arc::new(callback));
        self
    }

    pub(crate) fn default_cache_info(
        &self,
        kind: &str,
        descriptor: &mut CacheDescriptor,
        context: &Context,
    ) -> Result<(), RenderCacheError> {
        self.default_cache_info.dispatch(kind, descriptor, context)
    }

    pub(crate) fn context(
        &self,
        kind: &str,
        scoped: &mut Context,
        base: &Context,
    ) -> Result<(), RenderCacheError> {
        self.context.dispatch(kind, scoped, base)
    }

    pub(crate) fn cache_info(
        &self,
        kind: &str,
        descriptor: &mut CacheDescriptor,
        context: &Context,
    ) -> Result<(), RenderCacheError> {
        self.cache_info.dispatch(kind, descriptor, context)
    }

    /// Runs the `keys`, `hash`, `tags` and `validate` hooks, in that order.
    pub(crate) fn fields(
        &self,
        kind: &str,
        descriptor: &mut CacheDescriptor,
        context: &Context,
    ) -> Result<(), RenderCacheError> {
        self.keys.dispatch(kind, &mut descriptor.keys, context)?;
        self.hash.dispatch(kind, &mut descriptor.hash, context)?;
        self.tags.dispatch(kind, &mut descriptor.tags, context)?;
        self.validate
            .dispatch(kind, &mut descriptor.validate, context)
    }

    pub(crate) fn cid(
        &self,
        kind: &str,
        fragments: &mut Vec<String>,
        context: &Context,
    ) -> Result<(), RenderCacheError> {
        self.cid.dispatch(kind, fragments, context)
    }

    pub(crate) fn post_render(&self, kind: &str, id: &str, payload: &Value, context: &Context) {
        if let Some(callbacks) = self.post_render.get(&(kind.to_string(), id.to_string())) {
            for callback in callbacks {
                callback(id, payload, context);
            }
        }
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}
