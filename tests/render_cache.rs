use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use indexmap::IndexMap;
use render_cache::cache::{
    CONTEXT_METHOD, CacheConfig, CacheDescriptor, Context, Granularity, MarkupOptions,
    MemoryStore, RenderCache, RenderController, RenderError, StaticEnvironment, recursion,
};
use serde_json::{Map, Value, json};

const BIN: &str = "cache_render";

/// Renders article teasers and records which ids each render call received.
#[derive(Default)]
struct Teasers {
    calls: Mutex<Vec<Vec<String>>>,
    levels: Mutex<Vec<usize>>,
}

impl Teasers {
    fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn levels(&self) -> Vec<usize> {
        self.levels.lock().expect("levels lock").clone()
    }
}

#[async_trait]
impl RenderController for Teasers {
    type Object = String;

    fn kind(&self) -> &str {
        "teaser"
    }

    fn cache_tags(&self, _object: &String, context: &Context) -> Map<String, Value> {
        let mut tags = Map::new();
        if let Some(id) = context.id() {
            tags.insert(format!("node:{id}"), json!(true));
        }
        tags
    }

    async fn render(
        &self,
        objects: IndexMap<String, String>,
        context: &Context,
    ) -> Result<IndexMap<String, Value>, RenderError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(objects.keys().cloned().collect());
        self.levels
            .lock()
            .expect("levels lock")
            .push(recursion::level());

        let role = context
            .get("role")
            .and_then(Value::as_str)
            .unwrap_or("anonymous")
            .to_string();
        Ok(objects
            .into_iter()
            .map(|(id, title)| {
                let payload = json!({
                    "#markup": format!("<h2>{title}</h2>"),
                    "#attached": {"library": ["teaser"]},
                    "#weight": 1,
                    "byline": {"#markup": format!("<p>for {role}</p>")},
                });
                (id, payload)
            })
            .collect())
    }
}

/// Renders pages whose body is a nested batch of teasers.
struct Pages {
    cache: Arc<RenderCache>,
    teasers: Teasers,
    levels: Mutex<Vec<(usize, bool)>>,
}

#[async_trait]
impl RenderController for Pages {
    type Object = Vec<String>;

    fn kind(&self) -> &str {
        "page"
    }

    async fn render(
        &self,
        objects: IndexMap<String, Vec<String>>,
        context: &Context,
    ) -> Result<IndexMap<String, Value>, RenderError> {
        self.levels
            .lock()
            .expect("levels lock")
            .push((recursion::level(), recursion::is_recursive()));

        let mut output = IndexMap::new();
        for (id, children) in objects {
            let batch: IndexMap<String, String> = children
                .into_iter()
                .map(|child| (child.clone(), format!("Title {child}")))
                .collect();
            let rendered = self
                .cache
                .view(&self.teasers, batch, context)
                .await
                .map_err(|err| RenderError::source("page", err))?;
            let body: Map<String, Value> = rendered.into_iter().collect();
            output.insert(id, Value::Object(body));
        }
        Ok(output)
    }
}

fn batch(ids: &[&str]) -> IndexMap<String, String> {
    ids.iter()
        .map(|id| (id.to_string(), format!("Title {id}")))
        .collect()
}

fn memory_cache(config: CacheConfig) -> (RenderCache, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new(&config));
    (RenderCache::new(config, store.clone()), store)
}

#[tokio::test]
async fn empty_store_renders_all_objects_once_and_writes_each() {
    let (cache, store) = memory_cache(CacheConfig::default());
    let teasers = Teasers::default();

    let output = cache
        .view(&teasers, batch(&["a", "b", "c"]), &Context::new())
        .await
        .expect("view succeeds");

    assert_eq!(output.keys().collect::<Vec<_>>(), ["a", "b", "c"]);
    assert_eq!(teasers.calls(), vec![vec!["a", "b", "c"]]);
    assert_eq!(store.len(BIN), 3);
    assert_eq!(output["a"]["#markup"], json!("<h2>Title a</h2>"));
    assert!(output["a"].get("#weight").is_none());
}

#[tokio::test]
async fn repeated_call_is_served_from_the_store() {
    let (cache, _) = memory_cache(CacheConfig::default());
    let teasers = Teasers::default();

    let first = cache
        .view(&teasers, batch(&["a", "b", "c"]), &Context::new())
        .await
        .expect("first view");
    let second = cache
        .view(&teasers, batch(&["a", "b", "c"]), &Context::new())
        .await
        .expect("second view");

    assert_eq!(teasers.calls().len(), 1);
    assert_eq!(first, second);
}

#[tokio::test]
async fn partial_hits_keep_input_order() {
    let (cache, _) = memory_cache(CacheConfig::default());
    let teasers = Teasers::default();

    cache
        .view(&teasers, batch(&["b"]), &Context::new())
        .await
        .expect("warm b");
    let output = cache
        .view(&teasers, batch(&["a", "b", "c"]), &Context::new())
        .await
        .expect("mixed view");

    assert_eq!(output.keys().collect::<Vec<_>>(), ["a", "b", "c"]);
    assert_eq!(teasers.calls(), vec![vec!["b"], vec!["a", "c"]]);
}

#[tokio::test]
async fn no_cache_object_is_always_rendered() {
    let (mut cache, store) = memory_cache(CacheConfig::default());
    cache
        .hooks_mut()
        .on_cache_info("teaser", |descriptor, context| {
            if context.id() == Some("b") {
                descriptor.granularity = Some(Granularity::NoCache);
            }
            Ok(())
        });
    let teasers = Teasers::default();

    for _ in 0..2 {
        cache
            .view(&teasers, batch(&["a", "b"]), &Context::new())
            .await
            .expect("view succeeds");
    }

    assert_eq!(store.len(BIN), 1);
    assert_eq!(teasers.calls(), vec![vec!["a", "b"], vec!["b"]]);
}

#[tokio::test]
async fn eager_markup_returns_markup_and_preserved_properties() {
    let (mut cache, _) = memory_cache(CacheConfig::default());
    cache
        .hooks_mut()
        .on_default_cache_info("teaser", |descriptor, _| {
            descriptor.render_to_markup = Some(MarkupOptions::preserving(["#attached"]));
            Ok(())
        });
    let teasers = Teasers::default();
    let expected = json!({
        "#markup": "<h2>Title a</h2><p>for anonymous</p>",
        "#attached": {"library": ["teaser"]},
    });

    let miss = cache
        .view(&teasers, batch(&["a"]), &Context::new())
        .await
        .expect("miss");
    let hit = cache
        .view(&teasers, batch(&["a"]), &Context::new())
        .await
        .expect("hit");

    assert_eq!(miss["a"], expected);
    assert_eq!(hit["a"], expected);
    assert_eq!(teasers.calls().len(), 1);
}

#[tokio::test]
async fn disabled_cache_bypasses_the_store() {
    let (cache, store) = memory_cache(CacheConfig {
        enabled: false,
        ..Default::default()
    });
    let teasers = Teasers::default();
    let mut expected = Teasers::default()
        .render(batch(&["a", "b"]), &Context::new())
        .await
        .expect("direct render");
    for payload in expected.values_mut() {
        if let Some(fields) = payload.as_object_mut() {
            fields.remove("#weight");
        }
    }

    for _ in 0..2 {
        let output = cache
            .view(&teasers, batch(&["a", "b"]), &Context::new())
            .await
            .expect("view succeeds");
        assert_eq!(output, expected);
    }

    assert!(store.is_empty(BIN));
    assert_eq!(teasers.calls().len(), 2);
}

#[tokio::test]
async fn disabled_kind_and_unsafe_method_bypass_the_store() {
    let mut config = CacheConfig::default();
    config.kinds.insert("teaser".to_string(), false);
    let (disabled, disabled_store) = memory_cache(config);
    let (enabled, enabled_store) = memory_cache(CacheConfig::default());
    let teasers = Teasers::default();

    disabled
        .view(&teasers, batch(&["a"]), &Context::new())
        .await
        .expect("view succeeds");
    enabled
        .view(
            &teasers,
            batch(&["a"]),
            &Context::new().with(CONTEXT_METHOD, "POST"),
        )
        .await
        .expect("view succeeds");

    assert!(disabled_store.is_empty(BIN));
    assert!(enabled_store.is_empty(BIN));
}

#[tokio::test]
async fn unconfigured_granularity_bypasses_the_store() {
    let (mut cache, store) = memory_cache(CacheConfig::default());
    cache
        .hooks_mut()
        .on_default_cache_info("teaser", |descriptor, _| {
            descriptor.granularity = None;
            Ok(())
        });

    cache
        .view(&Teasers::default(), batch(&["a"]), &Context::new())
        .await
        .expect("view succeeds");

    assert!(store.is_empty(BIN));
}

#[tokio::test]
async fn per_context_entries_are_partitioned_by_role() {
    let config = CacheConfig {
        default_granularity: Some(Granularity::PerContext),
        ..Default::default()
    };
    let (cache, store) = memory_cache(config);
    let cache = cache.with_environment(Arc::new(StaticEnvironment::new().with_axis("role")));
    let teasers = Teasers::default();

    let editor = cache
        .view(
            &teasers,
            batch(&["a"]),
            &Context::new().with("role", "editor"),
        )
        .await
        .expect("editor view");
    let viewer = cache
        .view(
            &teasers,
            batch(&["a"]),
            &Context::new().with("role", "viewer"),
        )
        .await
        .expect("viewer view");
    cache
        .view(
            &teasers,
            batch(&["a"]),
            &Context::new().with("role", "editor"),
        )
        .await
        .expect("editor again");

    assert_ne!(editor["a"], viewer["a"]);
    assert_eq!(teasers.calls().len(), 2);
    assert_eq!(store.len(BIN), 2);
}

#[tokio::test]
async fn per_context_axis_values_keep_their_json_type() {
    let config = CacheConfig {
        default_granularity: Some(Granularity::PerContext),
        ..Default::default()
    };
    let (cache, store) = memory_cache(config);
    let cache = cache.with_environment(Arc::new(StaticEnvironment::new().with_axis("role")));
    let teasers = Teasers::default();
    let contexts = [
        Context::new(),
        Context::new().with("role", ""),
        Context::new().with("role", 7),
        Context::new().with("role", "7"),
    ];

    for context in &contexts {
        cache
            .view(&teasers, batch(&["a"]), context)
            .await
            .expect("view succeeds");
    }

    assert_eq!(teasers.calls().len(), 4);
    assert_eq!(store.len(BIN), 4);
}

#[tokio::test]
async fn invalidated_tags_force_a_fresh_render() {
    let (cache, store) = memory_cache(CacheConfig::default());
    let teasers = Teasers::default();

    cache
        .view(&teasers, batch(&["a", "b"]), &Context::new())
        .await
        .expect("warm");
    assert_eq!(store.invalidate_tags(["node:a"]), 1);
    cache
        .view(&teasers, batch(&["a", "b"]), &Context::new())
        .await
        .expect("after invalidation");

    assert_eq!(teasers.calls(), vec![vec!["a", "b"], vec!["a"]]);
}

#[tokio::test]
async fn key_builder_and_view_agree_on_cids() {
    let (cache, store) = memory_cache(CacheConfig::default());
    let teasers = Teasers::default();

    cache
        .view(&teasers, batch(&["a"]), &Context::new())
        .await
        .expect("view succeeds");

    let default: CacheDescriptor = teasers.default_cache_info(cache.config(), &Context::new());
    let descriptor = cache
        .key_builder()
        .build(
            &teasers,
            &"Title a".to_string(),
            &Context::new().for_object("a"),
            &default,
        )
        .expect("descriptor builds");
    let cid = descriptor.cid.expect("cid computed");

    assert!(store.get(BIN, &cid).is_some());
}

#[tokio::test]
async fn nested_passes_observe_outer_recursion_level() {
    let (cache, _) = memory_cache(CacheConfig::default());
    let cache = Arc::new(cache);
    let pages = Pages {
        cache: Arc::clone(&cache),
        teasers: Teasers::default(),
        levels: Mutex::new(Vec::new()),
    };
    let mut input = IndexMap::new();
    input.insert("front".to_string(), vec!["a".to_string(), "b".to_string()]);

    let output = cache
        .view(&pages, input, &Context::new())
        .await
        .expect("page renders");

    assert_eq!(output["front"]["a"]["#markup"], json!("<h2>Title a</h2>"));
    assert_eq!(*pages.levels.lock().expect("levels lock"), vec![(1, true)]);
    assert_eq!(pages.teasers.levels(), vec![2]);
    assert_eq!(recursion::level(), 0);
}

#[tokio::test]
async fn spawned_passes_start_from_level_zero() {
    let (cache, _) = memory_cache(CacheConfig::default());
    let cache = Arc::new(cache);
    let teasers = Arc::new(Teasers::default());

    let outer = recursion::scope(async {
        let _guard = recursion::enter();
        let cache = Arc::clone(&cache);
        let teasers = Arc::clone(&teasers);
        tokio::spawn(async move {
            cache
                .view(teasers.as_ref(), batch(&["a"]), &Context::new())
                .await
                .map(|output| output.len())
        })
        .await
    })
    .await;

    let rendered = outer
        .expect("task joins")
        .expect("spawned view succeeds");
    assert_eq!(rendered, 1);
    assert_eq!(teasers.levels(), vec![1]);
}
