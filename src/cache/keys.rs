//! Cache key derivation.
//!
//! Builds the [`CacheDescriptor`] of one object and materializes its cache id
//! from key fragments plus a digest of the hash fragments.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256, Sha512};

use super::config::CacheConfig;
use super::controller::RenderController;
use super::descriptor::{CacheDescriptor, Context, Granularity};
use super::error::RenderCacheError;
use super::hooks::HookRegistry;
use super::merge::deep_merge;
use super::policy::Environment;

/// Hash entry recording whether output is cached as markup.
pub const HASH_RENDER_METHOD: &str = "render_method";
/// Hash entry holding the serialized markup options.
pub const HASH_RENDER_OPTIONS: &str = "render_options";

const FRAGMENT_SEPARATOR: &str = ":";
const HASH_SEPARATOR: &str = "\n";

/// Digest used to fold hash fragments into a single key fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Blake3,
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            HashAlgorithm::Blake3 => "blake3",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
        }
    }

    /// Hex digest of `data`.
    pub fn digest(self, data: &[u8]) -> String {
        match self {
            HashAlgorithm::Blake3 => blake3::hash(data).to_hex().to_string(),
            HashAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(data);
                hex::encode(hasher.finalize())
            }
            HashAlgorithm::Sha512 => {
                let mut hasher = Sha512::new();
                hasher.update(data);
                hex::encode(hasher.finalize())
            }
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "blake3" => Ok(HashAlgorithm::Blake3),
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha512" => Ok(HashAlgorithm::Sha512),
            other => Err(format!(
                "unknown hash algorithm `{other}` (expected blake3, sha256 or sha512)"
            )),
        }
    }
}

/// Digest of the hash fragment values, in insertion order.
///
/// Values are JSON encoded before joining; JSON escapes newlines, so the
/// separator never appears inside a value.
pub fn hash_fragment(algorithm: HashAlgorithm, hash: &Map<String, Value>) -> String {
    let joined = hash
        .values()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(HASH_SEPARATOR);
    algorithm.digest(joined.as_bytes())
}

/// Join key fragments into a cache id.
///
/// `%` and `:` are percent-encoded inside fragments so two different fragment
/// sequences never produce the same id.
pub fn materialize_cid(fragments: &[String]) -> String {
    fragments
        .iter()
        .map(|fragment| escape_fragment(fragment))
        .collect::<Vec<_>>()
        .join(FRAGMENT_SEPARATOR)
}

fn escape_fragment(fragment: &str) -> Cow<'_, str> {
    if fragment.contains(['%', ':']) {
        Cow::Owned(fragment.replace('%', "%25").replace(':', "%3A"))
    } else {
        Cow::Borrowed(fragment)
    }
}

/// Derives object descriptors for one render pass.
pub struct KeyBuilder<'a> {
    pub(crate) config: &'a CacheConfig,
    pub(crate) environment: &'a dyn Environment,
    pub(crate) hooks: &'a HookRegistry,
}

impl<'a> KeyBuilder<'a> {
    pub fn new(
        config: &'a CacheConfig,
        environment: &'a dyn Environment,
        hooks: &'a HookRegistry,
    ) -> Self {
        Self {
            config,
            environment,
            hooks,
        }
    }

    /// Build the descriptor of `object` from the batch default `base`.
    ///
    /// `context` is the per-object context, with its `id` entry set.
    pub fn build<C>(
        &self,
        controller: &C,
        object: &C::Object,
        context: &Context,
        base: &CacheDescriptor,
    ) -> Result<CacheDescriptor, RenderCacheError>
    where
        C: RenderController + ?Sized,
    {
        let kind = controller.kind();

        let mut scoped = controller.object_context(object, context);
        self.hooks.context(kind, &mut scoped, context)?;

        let mut descriptor = base.clone();
        descriptor.cid = None;
        descriptor
            .keys
            .extend(controller.cache_keys(object, &scoped));
        descriptor
            .hash
            .extend(controller.cache_hash(object, &scoped));
        deep_merge(
            &mut descriptor.tags,
            &controller.cache_tags(object, &scoped),
        );
        deep_merge(
            &mut descriptor.validate,
            &controller.cache_validate(object, &scoped),
        );

        descriptor.hash.insert(
            HASH_RENDER_METHOD.to_string(),
            Value::Bool(descriptor.render_to_markup.is_some()),
        );
        if let Some(options) = descriptor.render_to_markup.as_ref() {
            let serialized = serde_json::to_string(options).map_err(|err| {
                RenderCacheError::configuration(format!("markup options not serializable: {err}"))
            })?;
            descriptor
                .hash
                .insert(HASH_RENDER_OPTIONS.to_string(), Value::String(serialized));
        }

        self.hooks.cache_info(kind, &mut descriptor, &scoped)?;
        if let Some(cid) = descriptor.cid.as_deref() {
            if cid.is_empty() {
                return Err(RenderCacheError::configuration(format!(
                    "hook `{kind}.cache_info` set an empty cid"
                )));
            }
            return Ok(descriptor);
        }

        let granularity = match descriptor.granularity {
            None | Some(Granularity::NoCache) => return Ok(descriptor),
            Some(granularity) => granularity,
        };

        self.hooks.fields(kind, &mut descriptor, &scoped)?;

        descriptor
            .keys
            .extend(self.environment.granularity_keys(granularity, &scoped));
        descriptor
            .keys
            .push(hash_fragment(self.config.hash_algorithm, &descriptor.hash));

        self.hooks.cid(kind, &mut descriptor.keys, &scoped)?;
        descriptor.cid = Some(materialize_cid(&descriptor.keys));

        Ok(descriptor)
    }
}
