use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the render-cache binary.
#[derive(Debug, Parser)]
#[command(name = "render-cache", version, about = "Batched render cache tools")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "RENDER_CACHE_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub logging: LoggingOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Print the cache id of every object in a JSON object file.
    Cid(CidArgs),
    /// Render a JSON object file through the cache, one or more times.
    View(ViewArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Clone)]
pub struct ObjectsArgs {
    /// JSON object mapping object ids to payloads.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// Object kind the batch belongs to.
    #[arg(long, value_name = "KIND", default_value = "node")]
    pub kind: String,

    /// JSON object used as the base render context.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub context: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheOverrides {
    /// Enable or disable the render cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Override the hash algorithm (blake3|sha256|sha512).
    #[arg(long = "cache-hash-algorithm", value_name = "NAME")]
    pub cache_hash_algorithm: Option<String>,

    /// Override the default bin.
    #[arg(long = "cache-default-bin", value_name = "BIN")]
    pub cache_default_bin: Option<String>,

    /// Override the default granularity (none|no_cache|per_object|per_context).
    #[arg(long = "cache-default-granularity", value_name = "GRANULARITY")]
    pub cache_default_granularity: Option<String>,

    /// Override the default expiry (permanent|temporary|SECONDS).
    #[arg(long = "cache-default-expire", value_name = "EXPIRY")]
    pub cache_default_expire: Option<String>,

    /// Override the maximum number of entries per bin.
    #[arg(long = "cache-bin-capacity", value_name = "COUNT")]
    pub cache_bin_capacity: Option<usize>,
}

#[derive(Debug, Args, Clone)]
pub struct CidArgs {
    #[command(flatten)]
    pub objects: ObjectsArgs,

    #[command(flatten)]
    pub overrides: CacheOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct ViewArgs {
    #[command(flatten)]
    pub objects: ObjectsArgs,

    #[command(flatten)]
    pub overrides: CacheOverrides,

    /// Number of render passes over the same batch.
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(usize))]
    pub passes: usize,

    /// Cache flattened markup instead of the structured payload.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub markup: bool,

    /// Top-level properties kept next to the markup (repeatable).
    #[arg(long = "preserve", value_name = "PROPERTY")]
    pub preserve: Vec<String>,
}

impl Command {
    pub fn cache_overrides(&self) -> &CacheOverrides {
        match self {
            Command::Cid(args) => &args.overrides,
            Command::View(args) => &args.overrides,
        }
    }

    pub fn objects(&self) -> &ObjectsArgs {
        match self {
            Command::Cid(args) => &args.objects,
            Command::View(args) => &args.objects,
        }
    }
}
