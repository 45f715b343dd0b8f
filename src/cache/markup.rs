//! Markup mode: flattening structured payloads and carrying preserved
//! properties through the store.

use serde_json::{Map, Value};

use super::descriptor::{CacheDescriptor, MarkupOptions};
use super::error::RenderCacheError;

pub const MARKUP: &str = "#markup";
pub const PREFIX: &str = "#prefix";
pub const SUFFIX: &str = "#suffix";
pub const WEIGHT: &str = "#weight";
/// Descriptor embedded for the downstream renderer in late caching.
pub const CACHE: &str = "#cache";
/// Stored bag of properties restored at the top level on read.
pub const PRESERVED: &str = "#render_cache_preserved";

/// Turns a structured payload into markup.
pub trait Flatten: Send + Sync {
    fn flatten(&self, payload: &Value) -> String;
}

/// Concatenates `#prefix`, `#markup`, children ordered by `#weight` and
/// `#suffix`. Children are the properties without a leading `#`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFlattener;

impl Flatten for DefaultFlattener {
    fn flatten(&self, payload: &Value) -> String {
        let mut out = String::new();
        flatten_into(payload, &mut out);
        out
    }
}

fn flatten_into(value: &Value, out: &mut String) {
    match value {
        Value::Null => {}
        Value::String(text) => out.push_str(text),
        Value::Array(items) => items.iter().for_each(|item| flatten_into(item, out)),
        Value::Object(map) => {
            if let Some(prefix) = map.get(PREFIX) {
                flatten_into(prefix, out);
            }
            if let Some(markup) = map.get(MARKUP) {
                flatten_into(markup, out);
            }

            let mut children: Vec<&Value> = map
                .iter()
                .filter(|(key, _)| !key.starts_with('#'))
                .map(|(_, child)| child)
                .collect();
            children.sort_by(|a, b| weight(a).total_cmp(&weight(b)));
            for child in children {
                flatten_into(child, out);
            }

            if let Some(suffix) = map.get(SUFFIX) {
                flatten_into(suffix, out);
            }
        }
        other => out.push_str(&other.to_string()),
    }
}

fn weight(value: &Value) -> f64 {
    value.get(WEIGHT).and_then(Value::as_f64).unwrap_or(0.0)
}

/// Remove the ordering-only `#weight` property from a top-level payload.
pub fn strip_weight(payload: &mut Value) {
    if let Value::Object(map) = payload {
        map.remove(WEIGHT);
    }
}

/// Merge a stored preserved bag back into the payload and drop the marker.
pub fn restore_preserved(payload: &mut Value) {
    let Value::Object(map) = payload else {
        return;
    };
    if let Some(Value::Object(preserved)) = map.remove(PRESERVED) {
        map.extend(preserved);
    }
}

/// Value returned to the caller and, when it should be written, the value to store.
#[derive(Debug, Clone, PartialEq)]
pub struct Prepared {
    pub output: Value,
    pub stored: Option<Value>,
}

/// Apply the write policy of `descriptor` to a freshly rendered payload.
pub fn prepare(
    payload: Value,
    descriptor: &CacheDescriptor,
    flattener: &dyn Flatten,
) -> Result<Prepared, RenderCacheError> {
    let cacheable = descriptor.cid.is_some();

    let Some(options) = descriptor.render_to_markup.as_ref() else {
        let stored = cacheable.then(|| payload.clone());
        return Ok(Prepared {
            output: payload,
            stored,
        });
    };

    if options.cache_late {
        return late(payload, descriptor, flattener, cacheable);
    }

    let preserved = collect_preserved(&payload, options);
    let markup = Value::String(flattener.flatten(&payload));

    let mut output = Map::new();
    output.insert(MARKUP.to_string(), markup.clone());
    output.extend(preserved.clone());

    let stored = cacheable.then(|| {
        let mut stored = Map::new();
        stored.insert(MARKUP.to_string(), markup);
        if !preserved.is_empty() {
            stored.insert(PRESERVED.to_string(), Value::Object(preserved));
        }
        Value::Object(stored)
    });

    Ok(Prepared {
        output: Value::Object(output),
        stored,
    })
}

fn late(
    payload: Value,
    descriptor: &CacheDescriptor,
    flattener: &dyn Flatten,
    cacheable: bool,
) -> Result<Prepared, RenderCacheError> {
    let mut map = match payload {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert(MARKUP.to_string(), Value::String(flattener.flatten(&other)));
            map
        }
    };

    if cacheable {
        let embedded = serde_json::to_value(descriptor).map_err(|err| {
            RenderCacheError::configuration(format!("cache descriptor not serializable: {err}"))
        })?;
        map.insert(CACHE.to_string(), embedded);
    }

    Ok(Prepared {
        output: Value::Object(map),
        stored: None,
    })
}

fn collect_preserved(payload: &Value, options: &MarkupOptions) -> Map<String, Value> {
    options
        .preserve_properties
        .iter()
        .filter_map(|property| {
            payload
                .get(property)
                .map(|value| (property.clone(), value.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::cache::descriptor::Granularity;

    fn descriptor(markup: Option<MarkupOptions>, cid: Option<&str>) -> CacheDescriptor {
        CacheDescriptor {
            cid: cid.map(str::to_string),
            render_to_markup: markup,
            ..CacheDescriptor::new("cache_render", Granularity::PerObject)
        }
    }

    #[test]
    fn default_flattener_orders_children_by_weight() {
        let payload = json!({
            "#prefix": "<div>",
            "#suffix": "</div>",
            "#markup": "title",
            "second": {"#markup": "B", "#weight": 5},
            "first": {"#markup": "A", "#weight": -1},
            "#attached": {"css": ["x.css"]},
        });

        assert_eq!(DefaultFlattener.flatten(&payload), "<div>titleAB</div>");
    }

    #[test]
    fn structured_mode_stores_payload_verbatim() {
        let payload = json!({"#theme": "node", "title": "A"});

        let prepared = prepare(
            payload.clone(),
            &descriptor(None, Some("cid-a")),
            &DefaultFlattener,
        )
        .expect("prepared");

        assert_eq!(prepared.output, payload);
        assert_eq!(prepared.stored, Some(payload));
    }

    #[test]
    fn nothing_is_stored_without_cid() {
        let prepared = prepare(
            json!({"#markup": "x"}),
            &descriptor(None, None),
            &DefaultFlattener,
        )
        .expect("prepared");

        assert!(prepared.stored.is_none());
    }

    #[test]
    fn eager_markup_keeps_preserved_properties() {
        let payload = json!({
            "#markup": "<p>A</p>",
            "#attached": {"js": ["a.js"]},
            "#other": true,
        });
        let options = MarkupOptions::preserving(["#attached"]);

        let prepared = prepare(
            payload,
            &descriptor(Some(options), Some("cid-a")),
            &DefaultFlattener,
        )
        .expect("prepared");

        assert_eq!(
            prepared.output,
            json!({"#markup": "<p>A</p>", "#attached": {"js": ["a.js"]}})
        );
        let mut stored = prepared.stored.expect("stored");
        assert_eq!(
            stored,
            json!({"#markup": "<p>A</p>", PRESERVED: {"#attached": {"js": ["a.js"]}}})
        );

        restore_preserved(&mut stored);
        assert_eq!(stored, prepared.output);
    }

    #[test]
    fn late_markup_embeds_descriptor_and_skips_store() {
        let payload = json!({"#markup": "A"});
        let options = MarkupOptions::preserving(["#attached"]).late();
        let descriptor = descriptor(Some(options), Some("cid-a"));

        let prepared = prepare(payload, &descriptor, &DefaultFlattener).expect("prepared");

        assert!(prepared.stored.is_none());
        assert_eq!(prepared.output[CACHE]["cid"], json!("cid-a"));
        assert_eq!(prepared.output[MARKUP], json!("A"));
    }

    #[test]
    fn strip_weight_only_touches_top_level() {
        let mut payload = json!({"#weight": 3, "child": {"#weight": 1}});
        strip_weight(&mut payload);
        assert_eq!(payload, json!({"child": {"#weight": 1}}));
    }
}
