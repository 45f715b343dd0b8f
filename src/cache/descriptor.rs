//! Cache descriptor and render context.
//!
//! A [`CacheDescriptor`] is built once per object per render pass and describes
//! how that object's cache entry is keyed, tagged and stored.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Context key carrying the id of the object currently being rendered.
pub const CONTEXT_ID: &str = "id";

/// Policy controlling whether and how rendered output may be shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    /// Always render fresh; no cache id is computed.
    NoCache,
    /// One entry per object, shared by every caller.
    PerObject,
    /// One entry per object and context class (role, session, ...), as
    /// partitioned by the host environment.
    PerContext,
}

impl Granularity {
    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::NoCache => "no_cache",
            Granularity::PerObject => "per_object",
            Granularity::PerContext => "per_context",
        }
    }
}

/// Lifetime hint handed to the store with every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Expiry {
    /// Kept until evicted or invalidated by tag.
    #[default]
    Permanent,
    /// Dropped on the next general wipe of temporary entries.
    Temporary,
    /// Expires after the given duration.
    After(Duration),
}

/// Markup-mode settings (`render_cache_render_to_markup`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MarkupOptions {
    /// Top-level properties copied aside before flattening and restored on read.
    #[serde(default)]
    pub preserve_properties: Vec<String>,
    /// Leave flattening and storage to the downstream renderer.
    #[serde(default)]
    pub cache_late: bool,
}

impl MarkupOptions {
    pub fn preserving<I, S>(properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            preserve_properties: properties.into_iter().map(Into::into).collect(),
            cache_late: false,
        }
    }

    pub fn late(mut self) -> Self {
        self.cache_late = true;
        self
    }
}

/// Describes cacheability and key derivation for one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CacheDescriptor {
    pub bin: String,
    pub granularity: Option<Granularity>,
    pub expire: Expiry,
    pub keys: Vec<String>,
    pub hash: Map<String, Value>,
    pub tags: Map<String, Value>,
    pub validate: Map<String, Value>,
    pub cid: Option<String>,
    pub render_to_markup: Option<MarkupOptions>,
}

impl CacheDescriptor {
    pub fn new(bin: impl Into<String>, granularity: Granularity) -> Self {
        Self {
            bin: bin.into(),
            granularity: Some(granularity),
            ..Default::default()
        }
    }

    pub fn with_expire(mut self, expire: Expiry) -> Self {
        self.expire = expire;
        self
    }

    pub fn with_markup(mut self, options: MarkupOptions) -> Self {
        self.render_to_markup = Some(options);
        self
    }

    pub fn is_no_cache(&self) -> bool {
        matches!(self.granularity, Some(Granularity::NoCache))
    }

    /// Tag names whose flag is set, in insertion order.
    pub fn tag_names(&self) -> Vec<String> {
        self.tags
            .iter()
            .filter(|(_, flag)| !matches!(flag, Value::Bool(false) | Value::Null))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Ambient state describing how objects are rendered.
///
/// The base context is shared by a whole batch; each object sees a copy with
/// its own [`CONTEXT_ID`] entry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context(Map<String, Value>);

impl Context {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Id of the object this context was scoped to, if any.
    pub fn id(&self) -> Option<&str> {
        self.0.get(CONTEXT_ID).and_then(Value::as_str)
    }

    /// Copy of this context scoped to a single object.
    pub fn for_object(&self, id: &str) -> Self {
        let mut scoped = self.clone();
        scoped.set(CONTEXT_ID, id);
        scoped
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for Context {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
