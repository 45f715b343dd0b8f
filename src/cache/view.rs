//! Batch render orchestration.
//!
//! [`RenderCache::view`] renders a batch of objects of one kind, serving what it
//! can from the store and rendering the rest in a single renderer call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use indexmap::{IndexMap, IndexSet};
use metrics::{counter, histogram};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};

use super::config::CacheConfig;
use super::controller::RenderController;
use super::descriptor::{CacheDescriptor, Context};
use super::error::RenderCacheError;
use super::hooks::HookRegistry;
use super::keys::KeyBuilder;
use super::markup::{self, DefaultFlattener, Flatten};
use super::policy::{Environment, StaticEnvironment, is_cacheable};
use super::recursion;
use super::store::{CacheEntry, CacheStore};

const METRIC_HIT_TOTAL: &str = "render_cache_hit_total";
const METRIC_MISS_TOTAL: &str = "render_cache_miss_total";
const METRIC_STORE_ERROR_TOTAL: &str = "render_cache_store_error_total";
const METRIC_VIEW_MS: &str = "render_cache_view_ms";

/// Batched render cache bound to one store.
pub struct RenderCache {
    config: CacheConfig,
    store: Arc<dyn CacheStore>,
    environment: Arc<dyn Environment>,
    hooks: HookRegistry,
    flattener: Arc<dyn Flatten>,
}

impl RenderCache {
    pub fn new(config: CacheConfig, store: Arc<dyn CacheStore>) -> Self {
        Self {
            config,
            store,
            environment: Arc::new(StaticEnvironment::new()),
            hooks: HookRegistry::new(),
            flattener: Arc::new(DefaultFlattener),
        }
    }

    pub fn with_environment(mut self, environment: Arc<dyn Environment>) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_flattener(mut self, flattener: Arc<dyn Flatten>) -> Self {
        self.flattener = flattener;
        self
    }

    pub fn hooks_mut(&mut self) -> &mut HookRegistry {
        &mut self.hooks
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Key builder sharing this cache's configuration, environment and hooks.
    pub fn key_builder(&self) -> KeyBuilder<'_> {
        KeyBuilder::new(&self.config, self.environment.as_ref(), &self.hooks)
    }

    /// Render `objects`, in input order.
    ///
    /// Objects with a stored entry are served from the store; the others are
    /// rendered in one [`RenderController::render`] call and written back. The
    /// recursion level is raised for the whole pass.
    #[instrument(skip_all, fields(kind = controller.kind(), objects = objects.len()))]
    pub async fn view<C>(
        &self,
        controller: &C,
        objects: IndexMap<String, C::Object>,
        context: &Context,
    ) -> Result<IndexMap<String, Value>, RenderCacheError>
    where
        C: RenderController + ?Sized,
    {
        let started_at = Instant::now();
        let result = recursion::scope(async {
            let _guard = recursion::enter();
            self.view_pass(controller, objects, context).await
        })
        .await;

        histogram!(METRIC_VIEW_MS, "kind" => controller.kind().to_string())
            .record(started_at.elapsed().as_secs_f64() * 1000.0);
        result
    }

    async fn view_pass<C>(
        &self,
        controller: &C,
        objects: IndexMap<String, C::Object>,
        context: &Context,
    ) -> Result<IndexMap<String, Value>, RenderCacheError>
    where
        C: RenderController + ?Sized,
    {
        let kind = controller.kind();

        let mut default = controller.default_cache_info(&self.config, context);
        self.hooks.default_cache_info(kind, &mut default, context)?;

        if !is_cacheable(
            &self.config,
            self.environment.as_ref(),
            kind,
            &default,
            context,
        ) {
            debug!(kind, outcome = "bypass", "render cache not applicable");
            return self.render_uncached(controller, objects, context).await;
        }

        if default.bin.is_empty() {
            return Err(RenderCacheError::configuration(format!(
                "default cache descriptor of `{kind}` has an empty bin"
            )));
        }

        let builder = self.key_builder();
        let mut descriptors: IndexMap<String, CacheDescriptor> =
            IndexMap::with_capacity(objects.len());
        for (id, object) in &objects {
            let descriptor = builder.build(controller, object, &context.for_object(id), &default)?;
            if descriptor.cid.is_some() && descriptor.bin != default.bin {
                let (moved, read) = (&descriptor.bin, &default.bin);
                return Err(RenderCacheError::configuration(format!(
                    "`{kind}` object `{id}` moved to bin `{moved}` but the batch reads `{read}`"
                )));
            }
            descriptors.insert(id.clone(), descriptor);
        }

        let cached = self.fetch(kind, &default.bin, &descriptors).await;

        let mut hits: HashMap<String, Value> = HashMap::new();
        let mut misses: IndexMap<String, C::Object> = IndexMap::new();
        for (id, object) in objects {
            let hit = descriptors
                .get(&id)
                .and_then(|descriptor| descriptor.cid.as_deref())
                .and_then(|cid| cached.get(cid))
                .map(|entry| entry.data.clone());
            match hit {
                Some(data) => {
                    hits.insert(id, data);
                }
                None => {
                    misses.insert(id, object);
                }
            }
        }

        debug!(
            kind,
            bin = %default.bin,
            hits = hits.len(),
            misses = misses.len(),
            "render cache lookup"
        );
        counter!(METRIC_HIT_TOTAL, "kind" => kind.to_string()).increment(hits.len() as u64);
        counter!(METRIC_MISS_TOTAL, "kind" => kind.to_string()).increment(misses.len() as u64);

        let mut rendered = if misses.is_empty() {
            IndexMap::new()
        } else {
            render_batch(controller, misses, context).await?
        };

        let mut output = IndexMap::with_capacity(descriptors.len());
        for (id, descriptor) in &descriptors {
            let mut payload = match hits.remove(id) {
                Some(mut payload) => {
                    markup::restore_preserved(&mut payload);
                    payload
                }
                None => {
                    let mut payload = rendered
                        .swap_remove(id)
                        .ok_or_else(|| RenderCacheError::MissingOutput { id: id.clone() })?;
                    markup::strip_weight(&mut payload);
                    let prepared = markup::prepare(payload, descriptor, self.flattener.as_ref())?;
                    if let (Some(cid), Some(stored)) = (descriptor.cid.as_deref(), prepared.stored)
                    {
                        self.write(kind, descriptor, cid, stored).await;
                    }
                    prepared.output
                }
            };

            markup::strip_weight(&mut payload);
            self.hooks
                .post_render(kind, id, &payload, &context.for_object(id));
            output.insert(id.clone(), payload);
        }

        Ok(output)
    }

    async fn render_uncached<C>(
        &self,
        controller: &C,
        objects: IndexMap<String, C::Object>,
        context: &Context,
    ) -> Result<IndexMap<String, Value>, RenderCacheError>
    where
        C: RenderController + ?Sized,
    {
        let kind = controller.kind();
        let mut output = render_batch(controller, objects, context).await?;
        for (id, payload) in output.iter_mut() {
            markup::strip_weight(payload);
            self.hooks
                .post_render(kind, id, payload, &context.for_object(id));
        }
        Ok(output)
    }

    /// One batched read for every distinct cid. Read failures degrade to all-miss.
    async fn fetch(
        &self,
        kind: &str,
        bin: &str,
        descriptors: &IndexMap<String, CacheDescriptor>,
    ) -> HashMap<String, CacheEntry> {
        let cids: IndexSet<String> = descriptors
            .values()
            .filter_map(|descriptor| descriptor.cid.clone())
            .collect();
        if cids.is_empty() {
            return HashMap::new();
        }

        let cids: Vec<String> = cids.into_iter().collect();
        match self.store.get_multiple(bin, &cids).await {
            Ok(mut found) => {
                let now = OffsetDateTime::now_utc();
                found.retain(|_, entry| !entry.is_expired_at(now));
                found
            }
            Err(err) => {
                warn!(
                    kind,
                    bin,
                    error = %err,
                    outcome = "all_miss",
                    "render cache read failed"
                );
                counter!(
                    METRIC_STORE_ERROR_TOTAL,
                    "kind" => kind.to_string(),
                    "op" => "get_multiple"
                )
                .increment(1);
                HashMap::new()
            }
        }
    }

    async fn write(&self, kind: &str, descriptor: &CacheDescriptor, cid: &str, data: Value) {
        let entry = CacheEntry::new(data, descriptor.expire, descriptor.tag_names());
        if let Err(err) = self.store.set(&descriptor.bin, cid, entry).await {
            warn!(
                kind,
                bin = %descriptor.bin,
                cid,
                error = %err,
                "render cache write failed"
            );
            counter!(
                METRIC_STORE_ERROR_TOTAL,
                "kind" => kind.to_string(),
                "op" => "set"
            )
            .increment(1);
        }
    }
}

/// Call the renderer once and return its output in request order.
async fn render_batch<C>(
    controller: &C,
    objects: IndexMap<String, C::Object>,
    context: &Context,
) -> Result<IndexMap<String, Value>, RenderCacheError>
where
    C: RenderController + ?Sized,
{
    let ids: Vec<String> = objects.keys().cloned().collect();
    let mut rendered = controller.render(objects, context).await?;

    ids.into_iter()
        .map(|id| match rendered.swap_remove(&id) {
            Some(payload) => Ok((id, payload)),
            None => Err(RenderCacheError::MissingOutput { id }),
        })
        .collect()
}
