//! Per-kind render controllers.
//!
//! A controller knows how to render one kind of object and which fragments
//! identify its output. Every key contribution has a default, so most
//! controllers only implement [`RenderController::kind`] and
//! [`RenderController::render`].

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Map, Value};

use super::config::CacheConfig;
use super::descriptor::{CONTEXT_ID, CacheDescriptor, Context};
use super::error::RenderError;

/// Key fragment every default key starts with.
pub const KEY_PREFIX: &str = "render_cache";

#[async_trait]
pub trait RenderController: Send + Sync {
    type Object: Send + Sync;

    /// Object kind; namespaces hooks and partitions default keys.
    fn kind(&self) -> &str;

    /// Batch-wide descriptor every object descriptor starts from.
    fn default_cache_info(&self, config: &CacheConfig, _context: &Context) -> CacheDescriptor {
        CacheDescriptor {
            bin: config.default_bin.clone(),
            granularity: config.default_granularity,
            expire: config.default_expire,
            ..Default::default()
        }
    }

    /// Context used while deriving the key of `object`.
    fn object_context(&self, _object: &Self::Object, context: &Context) -> Context {
        context.clone()
    }

    fn cache_keys(&self, _object: &Self::Object, _context: &Context) -> Vec<String> {
        vec![KEY_PREFIX.to_string(), self.kind().to_string()]
    }

    fn cache_hash(&self, _object: &Self::Object, context: &Context) -> Map<String, Value> {
        let mut hash = Map::new();
        hash.insert(
            CONTEXT_ID.to_string(),
            context.id().map(Value::from).unwrap_or(Value::Null),
        );
        hash
    }

    fn cache_tags(&self, _object: &Self::Object, _context: &Context) -> Map<String, Value> {
        Map::new()
    }

    fn cache_validate(&self, _object: &Self::Object, _context: &Context) -> Map<String, Value> {
        Map::new()
    }

    /// Render every object in one call. The result must hold an entry for
    /// each input id.
    async fn render(
        &self,
        objects: IndexMap<String, Self::Object>,
        context: &Context,
    ) -> Result<IndexMap<String, Value>, RenderError>;
}
