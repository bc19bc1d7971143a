//! EPCR Canonical - Deterministic JSON and Content Hashing
//!
//! JCS-style canonicalization (RFC 8785 shape: recursively sorted keys,
//! no insignificant whitespace, fixed escaping) and the SHA-256 digest
//! taken over the canonical bytes. The digest recorded at submission time
//! is the tamper-evident proof of exactly what content was transmitted,
//! so logically identical documents must always hash identically.

use chrono::SecondsFormat;
use epcr_core::{CanonicalError, ChartDocument, Sha256Hex, Timestamp};
use serde_json::Value;
use sha2::{Digest, Sha256};

// ============================================================================
// CANONICAL JSON
// ============================================================================

/// Render a JSON value in canonical form: object keys recursively sorted,
/// no whitespace, two-character escapes where JSON defines them and
/// lowercase \u00xx for remaining control characters.
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_json_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(fields) => {
            let mut keys: Vec<&String> = fields.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_string(key, out);
                out.push(':');
                if let Some(field) = fields.get(*key) {
                    write_canonical(field, out);
                }
            }
            out.push('}');
        }
    }
}

fn write_json_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{0008}' => out.push_str("\\b"),
            '\u{000C}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

// ============================================================================
// HASHING
// ============================================================================

/// SHA-256 over the canonical rendering of a JSON value, as 64 lowercase
/// hex characters.
pub fn canonical_hash(value: &Value) -> Sha256Hex {
    hash_bytes(canonicalize(value).as_bytes())
}

/// SHA-256 over raw bytes, as 64 lowercase hex characters. Used for wire
/// artifacts, which are hashed exactly as transmitted.
pub fn hash_bytes(bytes: &[u8]) -> Sha256Hex {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

// ============================================================================
// SUBMISSION PAYLOAD
// ============================================================================

/// Build the submission-relevant view of a chart, stamped with the fixed
/// submission timestamp.
///
/// The payload carries the clinical content and authorship, and excludes
/// volatile bookkeeping: lifecycle status, completeness score and issues,
/// edit markers, and the recorded digest itself. The key set is fixed so
/// two charts with the same content always produce the same canonical
/// bytes.
pub fn submission_payload(
    chart: &ChartDocument,
    submitted_at: Timestamp,
) -> Result<Value, CanonicalError> {
    let mut payload = serde_json::Map::new();
    payload.insert("chart_id".to_string(), Value::String(chart.chart_id.to_string()));
    payload.insert("tenant_id".to_string(), Value::String(chart.tenant_id.to_string()));
    payload.insert("mode".to_string(), Value::String(chart.mode.as_db_str().to_string()));
    payload.insert(
        "resource_pack".to_string(),
        Value::String(chart.resource_pack.clone()),
    );
    payload.insert("created_by".to_string(), Value::String(chart.created_by.clone()));
    payload.insert("patient".to_string(), to_canonical_value(&chart.patient)?);
    payload.insert("incident".to_string(), to_canonical_value(&chart.incident)?);
    payload.insert("vitals".to_string(), to_canonical_value(&chart.vitals)?);
    payload.insert("medications".to_string(), to_canonical_value(&chart.medications)?);
    payload.insert("procedures".to_string(), to_canonical_value(&chart.procedures)?);
    payload.insert("assessments".to_string(), to_canonical_value(&chart.assessments)?);
    payload.insert("attachments".to_string(), to_canonical_value(&chart.attachments)?);
    payload.insert("narrative".to_string(), opt_string(&chart.narrative));
    payload.insert("disposition".to_string(), opt_string(&chart.disposition));
    payload.insert("extensions".to_string(), to_canonical_value(&chart.extensions)?);
    payload.insert(
        "submitted_at".to_string(),
        Value::String(submitted_at.to_rfc3339_opts(SecondsFormat::Micros, true)),
    );
    Ok(Value::Object(payload))
}

fn to_canonical_value<T: serde::Serialize>(value: &T) -> Result<Value, CanonicalError> {
    serde_json::to_value(value).map_err(|e| CanonicalError::Serialize {
        reason: e.to_string(),
    })
}

fn opt_string(value: &Option<String>) -> Value {
    match value {
        Some(s) => Value::String(s.clone()),
        None => Value::Null,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use epcr_core::{new_entity_id, ChartMode, ChartStatus};
    use serde_json::json;

    #[test]
    fn test_canonical_form_sorts_keys_and_drops_whitespace() {
        let value: Value = serde_json::from_str(r#"{ "b": [1, 2], "a": "x" }"#).unwrap();
        assert_eq!(canonicalize(&value), r#"{"a":"x","b":[1,2]}"#);
    }

    #[test]
    fn test_canonical_form_sorts_nested_keys() {
        let left: Value = serde_json::from_str(r#"{"a":1,"b":{"x":1,"y":[{"q":1,"p":2}]}}"#).unwrap();
        let right: Value =
            serde_json::from_str(r#"{"b":{"y":[{"p":2,"q":1}],"x":1},"a":1}"#).unwrap();
        assert_eq!(canonicalize(&left), canonicalize(&right));
    }

    #[test]
    fn test_canonical_string_escaping() {
        let value = json!({"s": "line\nbreak \"quoted\" \\ tab\t\u{0001}"});
        assert_eq!(
            canonicalize(&value),
            r#"{"s":"line\nbreak \"quoted\" \\ tab\t"}"#
        );
    }

    #[test]
    fn test_canonical_preserves_unicode() {
        let value = json!({"name": "Ødegård"});
        assert_eq!(canonicalize(&value), r#"{"name":"Ødegård"}"#);
    }

    #[test]
    fn test_hash_key_order_independent() {
        let left: Value = serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();
        let right: Value = serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap();
        assert_eq!(canonical_hash(&left), canonical_hash(&right));
    }

    #[test]
    fn test_hash_leaf_change_sensitive() {
        let base = json!({"patient": {"last_name": "Smith"}});
        let changed = json!({"patient": {"last_name": "Smyth"}});
        assert_ne!(canonical_hash(&base), canonical_hash(&changed));
    }

    #[test]
    fn test_hash_shape() {
        let digest = canonical_hash(&json!({"a": 1}));
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_hash_bytes_matches_known_vector() {
        // sha256 of the empty input
        assert_eq!(
            hash_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_submission_payload_excludes_bookkeeping() {
        let tenant = new_entity_id();
        let mut chart = ChartDocument::new(tenant, ChartMode::Basic, "pack-ms-2024", "medic-7")
            .with_narrative("Patient found alert and oriented.");
        chart.status = ChartStatus::Submitted;
        chart.completeness_score = 85;
        chart.completeness_issues = vec!["missing disposition".to_string()];
        chart.sha256_submitted = Some("ab".repeat(32));

        let payload = submission_payload(&chart, Utc::now()).unwrap();
        let object = payload.as_object().unwrap();
        assert!(object.contains_key("narrative"));
        assert!(object.contains_key("submitted_at"));
        assert!(object.contains_key("chart_id"));
        assert!(!object.contains_key("status"));
        assert!(!object.contains_key("completeness_score"));
        assert!(!object.contains_key("completeness_issues"));
        assert!(!object.contains_key("sha256_submitted"));
        assert!(!object.contains_key("last_modified_at"));
    }

    #[test]
    fn test_submission_payload_hash_fixed_by_stamp() {
        let tenant = new_entity_id();
        let chart = ChartDocument::new(tenant, ChartMode::Basic, "pack-ms-2024", "medic-7")
            .with_narrative("Patient found alert and oriented.");

        let stamp = Utc::now();
        let first = submission_payload(&chart, stamp).unwrap();
        let second = submission_payload(&chart, stamp).unwrap();
        assert_eq!(canonical_hash(&first), canonical_hash(&second));

        // A different clinical leaf changes the digest.
        let revised = chart.with_narrative("Patient found unresponsive.");
        let third = submission_payload(&revised, stamp).unwrap();
        assert_ne!(canonical_hash(&first), canonical_hash(&third));
    }
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_json() -> impl Strategy<Value = serde_json::Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| Value::Number(n.into())),
            "[a-zA-Z0-9 \\n\\t\"\\\\]{0,16}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map("[a-z_]{1,8}", inner, 0..6)
                    .prop_map(|fields| Value::Object(fields.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// canonical output parses back to a value that canonicalizes
        /// identically, so escaping and layout are self-consistent
        #[test]
        fn prop_canonical_idempotent_under_reparse(value in arb_json()) {
            let canonical = canonicalize(&value);
            let reparsed: Value = serde_json::from_str(&canonical)
                .expect("canonical output must be valid JSON");
            prop_assert_eq!(canonicalize(&reparsed), canonical);
        }

        /// the digest is a pure function of the canonical bytes
        #[test]
        fn prop_hash_deterministic(value in arb_json()) {
            prop_assert_eq!(canonical_hash(&value), canonical_hash(&value.clone()));
        }

        /// changing a leaf value changes the digest
        #[test]
        fn prop_leaf_change_changes_hash(a in "[a-z]{1,12}", b in "[a-z]{1,12}") {
            prop_assume!(a != b);
            let left = serde_json::json!({ "field": a });
            let right = serde_json::json!({ "field": b });
            prop_assert_ne!(canonical_hash(&left), canonical_hash(&right));
        }
    }
}
