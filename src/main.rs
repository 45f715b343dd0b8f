use std::{
    path::Path,
    process,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use indexmap::IndexMap;
use render_cache::{
    cache::{
        CacheConfig, Context, HookRegistry, MarkupOptions, MemoryStore, RenderCache,
        RenderController, RenderError,
    },
    config::{self, CidArgs, Command, LoadError, ObjectsArgs, ViewArgs},
    infra::{error::InfraError, telemetry},
};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[derive(Debug, Error)]
enum CliError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Cache(#[from] render_cache::cache::RenderCacheError),
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_error(&error);
        process::exit(1);
    }
}

fn report_error(error: &CliError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "render-cache error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_writer(std::io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "render-cache error");
    });
}

async fn run() -> Result<(), CliError> {
    let (cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    let cache_config = CacheConfig::from(&settings.cache);
    match cli_args.command {
        Command::Cid(args) => run_cid(cache_config, args).await,
        Command::View(args) => run_view(cache_config, args).await,
    }
}

/// Passes payloads through unchanged and tags each entry with `{kind}:{id}`.
struct JsonController {
    kind: String,
    rendered: AtomicUsize,
}

impl JsonController {
    fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            rendered: AtomicUsize::new(0),
        }
    }

    fn take_rendered(&self) -> usize {
        self.rendered.swap(0, Ordering::Relaxed)
    }
}

#[async_trait]
impl RenderController for JsonController {
    type Object = Value;

    fn kind(&self) -> &str {
        &self.kind
    }

    fn cache_tags(&self, _object: &Value, context: &Context) -> Map<String, Value> {
        let mut tags = Map::new();
        if let Some(id) = context.id() {
            tags.insert(format!("{}:{id}", self.kind), Value::Bool(true));
        }
        tags
    }

    async fn render(
        &self,
        objects: IndexMap<String, Value>,
        _context: &Context,
    ) -> Result<IndexMap<String, Value>, RenderError> {
        self.rendered.fetch_add(objects.len(), Ordering::Relaxed);
        Ok(objects)
    }
}

async fn run_cid(config: CacheConfig, args: CidArgs) -> Result<(), CliError> {
    let (objects, context) = load_batch(&args.objects).await?;
    let controller = JsonController::new(&args.objects.kind);
    let cache = RenderCache::new(config.clone(), Arc::new(MemoryStore::new(&config)));

    let default = controller.default_cache_info(cache.config(), &context);
    let builder = cache.key_builder();
    let mut cids = Map::new();
    for (id, object) in &objects {
        let descriptor = builder.build(&controller, object, &context.for_object(id), &default)?;
        cids.insert(
            id.clone(),
            descriptor.cid.map(Value::String).unwrap_or(Value::Null),
        );
    }

    print_json(&Value::Object(cids))
}

async fn run_view(config: CacheConfig, args: ViewArgs) -> Result<(), CliError> {
    let (objects, context) = load_batch(&args.objects).await?;
    let controller = JsonController::new(&args.objects.kind);

    let mut hooks = HookRegistry::new();
    if args.markup {
        let options = MarkupOptions::preserving(args.preserve.iter().cloned());
        hooks.on_default_cache_info(&args.objects.kind, move |descriptor, _| {
            descriptor.render_to_markup = Some(options.clone());
            Ok(())
        });
    }
    let cache = RenderCache::new(config.clone(), Arc::new(MemoryStore::new(&config)))
        .with_hooks(hooks);

    let passes = args.passes.max(1);
    let mut stats = Vec::with_capacity(passes);
    let mut output = IndexMap::new();
    for pass in 1..=passes {
        output = cache.view(&controller, objects.clone(), &context).await?;
        let rendered = controller.take_rendered();
        let cached = objects.len().saturating_sub(rendered);
        log_pass(pass, rendered, cached);
        stats.push(json!({ "pass": pass, "rendered": rendered, "cached": cached }));
    }

    let output: Map<String, Value> = output.into_iter().collect();
    print_json(&json!({ "passes": stats, "output": output }))
}

fn log_pass(pass: usize, rendered: usize, cached: usize) {
    info!(target: "render_cache::cli", pass, rendered, cached, "render pass complete");
}

async fn load_batch(args: &ObjectsArgs) -> Result<(IndexMap<String, Value>, Context), InfraError> {
    let objects = read_json_object(&args.file).await?;
    let context = match args.context.as_ref() {
        Some(path) => Context::from(read_json_object(path).await?),
        None => Context::new(),
    };
    Ok((objects.into_iter().collect(), context))
}

async fn read_json_object(path: &Path) -> Result<Map<String, Value>, InfraError> {
    let raw = tokio::fs::read_to_string(path).await?;
    let display = path.display().to_string();
    match serde_json::from_str(&raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(InfraError::input(display, "expected a JSON object")),
        Err(err) => Err(InfraError::input(display, err.to_string())),
    }
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| InfraError::from(std::io::Error::from(err)))?;
    println!("{rendered}");
    Ok(())
}
