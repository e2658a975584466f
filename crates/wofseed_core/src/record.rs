use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

const ID_KEYS: [&str; 3] = ["wof:id", "wof_id", "id"];
const PARENT_KEYS: [&str; 4] = ["wof:parent_id", "wof:belongsto", "parent_id", "parent"];
const PLACETYPE_KEYS: [&str; 2] = ["wof:placetype", "placetype"];
const PRIMARY_NAME_KEYS: [&str; 2] = ["wof:name", "name"];
const PREFERRED_NAME_KEYS: [&str; 3] = ["name:eng_x_preferred", "name:eng", "name:eng_x_variant"];
const LABEL_KEYS: [&str; 4] = ["wof:label", "label", "qs:name", "gn:name"];

/// One place record reduced to the four fields the hierarchy needs.
///
/// `parent_id` is `None` when the source carries no usable parent. Ids are
/// always strings so numeric and string sources key the same map entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalRecord {
    pub id: String,
    pub parent_id: Option<String>,
    pub placetype: String,
    pub name: String,
}

/// Ingestion-boundary view of a parsed document.
#[derive(Debug, Clone, Copy)]
pub enum DocumentShape<'a> {
    FeatureCollection(&'a [Value]),
    Feature(&'a Value),
    Bare(&'a Value),
}

impl<'a> DocumentShape<'a> {
    pub fn classify(document: &'a Value) -> Self {
        match document.get("type").and_then(Value::as_str) {
            Some("FeatureCollection") => Self::FeatureCollection(
                document
                    .get("features")
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]),
            ),
            Some("Feature") => Self::Feature(document),
            _ => Self::Bare(document),
        }
    }
}

/// Parse raw JSON text, treating malformed input as "no document".
pub fn parse_document(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => Some(value),
        Err(error) => {
            debug!(%error, "skipping malformed JSON document");
            None
        }
    }
}

/// Fan a document out into canonical records, one per feature for
/// collections and at most one otherwise.
pub fn records_from_document(
    document: &Value,
    allowed_placetypes: Option<&BTreeSet<String>>,
) -> Vec<CanonicalRecord> {
    match DocumentShape::classify(document) {
        DocumentShape::FeatureCollection(features) => features
            .iter()
            .filter_map(|feature| normalize(feature, allowed_placetypes))
            .collect(),
        DocumentShape::Feature(feature) => normalize(feature, allowed_placetypes)
            .into_iter()
            .collect(),
        DocumentShape::Bare(bare) => normalize(bare, allowed_placetypes).into_iter().collect(),
    }
}

/// Normalize a single Feature or bare properties object.
///
/// Returns `None` for anything that is not an object, for collections (the
/// caller fans those out), and for records without an id or a name. When an
/// allow-set is given, records whose placetype is not a member are dropped.
pub fn normalize(
    document: &Value,
    allowed_placetypes: Option<&BTreeSet<String>>,
) -> Option<CanonicalRecord> {
    if let DocumentShape::FeatureCollection(_) = DocumentShape::classify(document) {
        return None;
    }
    let properties = properties_of(document)?;

    let id = first_present(properties, &ID_KEYS).and_then(canonical_id)?;
    let name = extract_name(properties)?;
    let parent_id = first_present(properties, &PARENT_KEYS).and_then(canonical_parent_id);
    let placetype = first_present(properties, &PLACETYPE_KEYS)
        .and_then(Value::as_str)
        .map(|value| value.trim().to_ascii_lowercase())
        .unwrap_or_default();

    if let Some(allowed) = allowed_placetypes
        && !allowed.contains(&placetype)
    {
        debug!(%id, %placetype, "dropping record with placetype outside the allow-set");
        return None;
    }

    Some(CanonicalRecord {
        id,
        parent_id,
        placetype,
        name,
    })
}

fn properties_of(document: &Value) -> Option<&Map<String, Value>> {
    let object = document.as_object()?;
    match object.get("properties") {
        Some(Value::Object(properties)) => Some(properties),
        Some(_) if object.get("type").and_then(Value::as_str) == Some("Feature") => None,
        _ => Some(object),
    }
}

fn first_present<'a>(properties: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| properties.get(*key))
}

/// Stringify an id-like value. Integral floats lose their fraction so
/// `85633793` and `85633793.0` key the same node.
pub fn canonical_id(value: &Value) -> Option<String> {
    let rendered = match value {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => {
            if let Some(integer) = number.as_i64() {
                integer.to_string()
            } else if let Some(integer) = number.as_u64() {
                integer.to_string()
            } else {
                let float = number.as_f64()?;
                if float.fract() == 0.0 && float.is_finite() {
                    format!("{float:.0}")
                } else {
                    float.to_string()
                }
            }
        }
        Value::Array(items) => return items.iter().find_map(canonical_id),
        _ => return None,
    };
    if rendered.is_empty() {
        None
    } else {
        Some(rendered)
    }
}

// WOF marks unknown or multiple parents with negative sentinels.
fn canonical_parent_id(value: &Value) -> Option<String> {
    let id = canonical_id(value)?;
    if id.starts_with('-') && id[1..].chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    Some(id)
}

fn extract_name(properties: &Map<String, Value>) -> Option<String> {
    if let Some(name) = PRIMARY_NAME_KEYS
        .iter()
        .find_map(|key| properties.get(*key).and_then(name_text))
    {
        return Some(name);
    }
    if let Some(name) = PREFERRED_NAME_KEYS
        .iter()
        .find_map(|key| properties.get(*key).and_then(name_text))
    {
        return Some(name);
    }
    if let Some(name) = properties
        .iter()
        .filter(|(key, _)| key.starts_with("name:"))
        .find_map(|(_, value)| name_text(value))
    {
        return Some(name);
    }
    LABEL_KEYS
        .iter()
        .find_map(|key| properties.get(*key).and_then(name_text))
}

fn name_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Array(items) => items.iter().find_map(name_text),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use serde_json::json;

    use super::{CanonicalRecord, DocumentShape, normalize, parse_document, records_from_document};

    fn allow(types: &[&str]) -> BTreeSet<String> {
        types.iter().map(|item| (*item).to_string()).collect()
    }

    #[test]
    fn feature_properties_are_normalized() {
        let document = json!({
            "type": "Feature",
            "id": 999,
            "properties": {
                "wof:id": 85633793,
                "wof:parent_id": 102191575,
                "wof:placetype": "Country",
                "wof:name": "United States"
            }
        });
        let record = normalize(&document, None).expect("record");
        assert_eq!(
            record,
            CanonicalRecord {
                id: "85633793".to_string(),
                parent_id: Some("102191575".to_string()),
                placetype: "country".to_string(),
                name: "United States".to_string(),
            }
        );
    }

    #[test]
    fn bare_objects_and_wrapped_properties_are_accepted() {
        let bare = json!({"id": "7", "parent": 3, "placetype": "region", "name": "North"});
        let record = normalize(&bare, None).expect("bare record");
        assert_eq!(record.id, "7");
        assert_eq!(record.parent_id.as_deref(), Some("3"));

        let wrapped = json!({"properties": {"wof_id": 8, "name": "South"}});
        let record = normalize(&wrapped, None).expect("wrapped record");
        assert_eq!(record.id, "8");
        assert_eq!(record.parent_id, None);
        assert_eq!(record.placetype, "");
    }

    #[test]
    fn numeric_and_string_ids_canonicalize_identically() {
        let numeric = normalize(&json!({"id": 42, "name": "A"}), None).expect("numeric");
        let float = normalize(&json!({"id": 42.0, "name": "A"}), None).expect("float");
        let text = normalize(&json!({"id": " 42 ", "name": "A"}), None).expect("text");
        assert_eq!(numeric.id, "42");
        assert_eq!(float.id, "42");
        assert_eq!(text.id, "42");
    }

    #[test]
    fn first_present_id_alias_wins_even_when_null() {
        let document = json!({"wof:id": null, "id": 5, "name": "Shadowed"});
        assert!(normalize(&document, None).is_none());
    }

    #[test]
    fn negative_parent_sentinels_mean_no_parent() {
        let document = json!({"id": 1, "wof:parent_id": -1, "name": "Orphan"});
        let record = normalize(&document, None).expect("record");
        assert_eq!(record.parent_id, None);
    }

    #[test]
    fn belongsto_alias_uses_first_listed_ancestor() {
        let document = json!({"id": 1, "wof:belongsto": [11, 12], "name": "Town"});
        let record = normalize(&document, None).expect("record");
        assert_eq!(record.parent_id.as_deref(), Some("11"));
    }

    #[test]
    fn name_falls_back_through_language_and_label_keys() {
        let preferred = json!({"id": 1, "name": "  ", "name:eng_x_preferred": ["", "Munich"]});
        assert_eq!(normalize(&preferred, None).expect("preferred").name, "Munich");

        let suffixed = json!({"id": 1, "name:fra_x_preferred": ["Munich (fr)"]});
        assert_eq!(normalize(&suffixed, None).expect("suffixed").name, "Munich (fr)");

        let label = json!({"id": 1, "wof:label": "Labelled"});
        assert_eq!(normalize(&label, None).expect("label").name, "Labelled");
    }

    #[test]
    fn records_without_id_or_name_are_dropped() {
        assert!(normalize(&json!({"name": "No id"}), None).is_none());
        assert!(normalize(&json!({"id": 1}), None).is_none());
        assert!(normalize(&json!({"id": "", "name": "Blank"}), None).is_none());
        assert!(normalize(&json!(["not", "an", "object"]), None).is_none());
    }

    #[test]
    fn allow_set_rejects_unknown_placetypes() {
        let allowed = allow(&["country", "region"]);
        let venue = json!({"id": 1, "name": "Cafe", "placetype": "venue"});
        let untyped = json!({"id": 2, "name": "Mystery"});
        let region = json!({"id": 3, "name": "North", "placetype": "REGION"});
        assert!(normalize(&venue, Some(&allowed)).is_none());
        assert!(normalize(&untyped, Some(&allowed)).is_none());
        assert!(normalize(&region, Some(&allowed)).is_some());
    }

    #[test]
    fn normalization_is_idempotent() {
        let document = json!({"properties": {"wof:id": "9", "wof:name": "Nine", "wof:placetype": "locality"}});
        let first = normalize(&document, None);
        let second = normalize(&document, None);
        assert_eq!(first, second);
    }

    #[test]
    fn feature_collections_fan_out_in_order() {
        let collection = json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {"wof:id": 1, "wof:name": "One"}},
                {"type": "Feature", "properties": {"wof:name": "Missing id"}},
                {"type": "Feature", "properties": {"wof:id": 2, "wof:name": "Two"}}
            ]
        });
        assert!(matches!(
            DocumentShape::classify(&collection),
            DocumentShape::FeatureCollection(features) if features.len() == 3
        ));
        assert!(normalize(&collection, None).is_none());

        let records = records_from_document(&collection, None);
        let ids = records.iter().map(|record| record.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn malformed_json_is_not_a_document() {
        assert!(parse_document("{\"id\": ").is_none());
        assert!(parse_document("{\"id\": 1}").is_some());
    }
}
