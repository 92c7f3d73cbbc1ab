//! Pure derivation of timeline fields from an event's source and metadata.

use serde_json::Value;

use crate::event::Metadata;

/// Where the event being derived was read from.
///
/// Events read back from the raw event table and events delivered off the stream
/// fall back to different confidence values when the metadata carries none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivationSite {
    Stored,
    Streamed,
}

impl DerivationSite {
    pub fn default_confidence(self) -> f64 {
        match self {
            DerivationSite::Stored => 0.5,
            DerivationSite::Streamed => 0.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Derived {
    pub category: String,
    pub confidence: f64,
    pub geo_context: Metadata,
}

pub fn derive(source: &str, metadata: &Metadata, site: DerivationSite) -> Derived {
    Derived {
        category: derive_category(source, metadata),
        confidence: derive_confidence(metadata, site),
        geo_context: derive_geo_context(metadata),
    }
}

/// `metadata.category` when it is a non-empty string, the event source otherwise.
pub fn derive_category(source: &str, metadata: &Metadata) -> String {
    match metadata.get("category") {
        Some(Value::String(category)) if !category.is_empty() => category.clone(),
        _ => source.to_owned(),
    }
}

/// `metadata.confidence` when numeric, clamped into `[0, 1]`. Strings are not parsed.
pub fn derive_confidence(metadata: &Metadata, site: DerivationSite) -> f64 {
    metadata
        .get("confidence")
        .and_then(Value::as_f64)
        .map(|confidence| confidence.clamp(0.0, 1.0))
        .unwrap_or_else(|| site.default_confidence())
}

pub fn derive_geo_context(metadata: &Metadata) -> Metadata {
    match metadata.get("geo_context") {
        Some(Value::Object(geo)) => geo.clone(),
        _ => Metadata::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata(value: Value) -> Metadata {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {}", other),
        }
    }

    #[test]
    fn category_falls_back_to_source() {
        let empty = Metadata::new();
        assert_eq!(derive_category("device-x", &empty), "device-x");

        let focus = metadata(json!({"category": "focus"}));
        assert_eq!(derive_category("device-x", &focus), "focus");

        for not_a_category in [json!(""), json!(3), json!(null), json!(["focus"])] {
            let meta = metadata(json!({ "category": not_a_category }));
            assert_eq!(derive_category("device-x", &meta), "device-x");
        }
    }

    #[test]
    fn numeric_confidence_is_kept_exactly() {
        for value in [0.0, 0.25, 0.5, 0.9999, 1.0] {
            let meta = metadata(json!({ "confidence": value }));
            assert_eq!(derive_confidence(&meta, DerivationSite::Streamed), value);
            assert_eq!(derive_confidence(&meta, DerivationSite::Stored), value);
        }

        let integer = metadata(json!({"confidence": 1}));
        assert_eq!(derive_confidence(&integer, DerivationSite::Streamed), 1.0);
    }

    #[test]
    fn confidence_defaults_depend_on_site() {
        let empty = Metadata::new();
        assert_eq!(derive_confidence(&empty, DerivationSite::Stored), 0.5);
        assert_eq!(derive_confidence(&empty, DerivationSite::Streamed), 0.6);

        for not_numeric in [json!("0.9"), json!(null), json!(true), json!({"v": 1})] {
            let meta = metadata(json!({ "confidence": not_numeric }));
            assert_eq!(derive_confidence(&meta, DerivationSite::Streamed), 0.6);
        }
    }

    #[test]
    fn out_of_range_confidence_is_clamped() {
        let high = metadata(json!({"confidence": 7.5}));
        let low = metadata(json!({"confidence": -2}));
        assert_eq!(derive_confidence(&high, DerivationSite::Streamed), 1.0);
        assert_eq!(derive_confidence(&low, DerivationSite::Streamed), 0.0);
    }

    #[test]
    fn geo_context_must_be_a_mapping() {
        let geo = metadata(json!({"geo_context": {"city": "Lisbon", "lat": 38.7}}));
        assert_eq!(
            derive_geo_context(&geo),
            metadata(json!({"city": "Lisbon", "lat": 38.7}))
        );

        let list = metadata(json!({"geo_context": ["Lisbon"]}));
        assert!(derive_geo_context(&list).is_empty());
        assert!(derive_geo_context(&Metadata::new()).is_empty());
    }

    #[test]
    fn derivation_does_not_touch_its_input() {
        let meta = metadata(json!({"category": "focus", "confidence": 0.7}));
        let before = meta.clone();

        let first = derive("calendar", &meta, DerivationSite::Streamed);
        let second = derive("calendar", &meta, DerivationSite::Streamed);

        assert_eq!(meta, before);
        assert_eq!(first, second);
        assert_eq!(first.category, "focus");
        assert_eq!(first.confidence, 0.7);
    }
}
