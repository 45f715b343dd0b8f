//! Render cache.
//!
//! Caches the rendered output of batches of objects:
//!
//! - **Keys**: every object gets a [`CacheDescriptor`] whose cid is derived from
//!   controller contributions, hooks and the host [`Environment`]
//! - **Store**: one batched read per pass and one write per miss, through
//!   [`CacheStore`]
//! - **Markup mode**: output can be flattened to markup before it is stored,
//!   keeping selected properties alongside
//!
//! ## Configuration
//!
//! Cache behavior is controlled via the `[cache]` section:
//!
//! ```toml
//! [cache]
//! enabled = true
//! hash_algorithm = "blake3"
//! default_bin = "cache_render"
//! default_granularity = "per_object"
//! # ... see config.rs for all options
//! ```

mod config;
mod controller;
mod descriptor;
mod error;
mod hooks;
mod keys;
mod lock;
pub mod markup;
mod merge;
mod policy;
pub mod recursion;
mod registry;
mod store;
mod view;

pub use config::CacheConfig;
pub use controller::{KEY_PREFIX, RenderController};
pub use descriptor::{CONTEXT_ID, CacheDescriptor, Context, Expiry, Granularity, MarkupOptions};
pub use error::{HookError, RenderCacheError, RenderError, StoreError};
pub use hooks::{HookRegistry, Stage, hook_name};
pub use keys::{
    HASH_RENDER_METHOD, HASH_RENDER_OPTIONS, HashAlgorithm, KeyBuilder, hash_fragment,
    materialize_cid,
};
pub use markup::{DefaultFlattener, Flatten};
pub use merge::deep_merge;
pub use policy::{CONTEXT_METHOD, Environment, StaticEnvironment, is_cacheable};
pub use registry::{EntryKey, TagRegistry};
pub use store::{CacheEntry, CacheStore, MemoryStore};
pub use view::RenderCache;
