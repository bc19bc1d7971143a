//! EPCR Sync - Offline Edit Conflict Resolution
//!
//! When a crew device reconnects, its offline copy of a chart may have
//! diverged from the server's. The resolver decides which content wins.
//! It never touches storage: it returns a resolved document plus notes,
//! and the caller applies the result through the normal update path,
//! which re-runs the editability guards and recomputes completeness.
//!
//! Lifecycle fields (status, submitted_at, sha256_submitted) are always
//! taken from the server copy regardless of policy: an offline device
//! cannot move a chart through its lifecycle, only edit content.

use epcr_core::{ChartDocument, EntityId, EpcrError, EpcrResult, ResolveError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Fields that never require a merge rule: lifecycle is server-owned,
/// completeness is recomputed after the merge, and the edit markers are
/// the resolver's own input.
const RULE_EXEMPT_FIELDS: &[&str] = &[
    "status",
    "submitted_at",
    "sha256_submitted",
    "completeness_score",
    "completeness_issues",
    "last_modified_at",
    "last_modified_by",
];

/// The append-only clinical lists, merged as id-keyed unions under
/// `MergePolicy::ListUnion`.
const LIST_FIELDS: &[&str] = &[
    "vitals",
    "medications",
    "procedures",
    "assessments",
    "attachments",
];

// ============================================================================
// POLICY AND RESOLUTION TYPES
// ============================================================================

/// Per-field precedence for explicit merge rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldRule {
    PreferLocal,
    PreferServer,
}

/// How to resolve a diverged chart.
///
/// `LastWriteWins` is the baseline: the side with the later edit marker
/// wins the whole document. The richer policies are only trusted where
/// they are explicit: any differing field without a rule fails the
/// resolution rather than being merged implicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergePolicy {
    /// Later `last_modified_at` marker wins the entire document.
    LastWriteWins,
    /// Every differing content field must carry an explicit rule.
    FieldLevel { rules: BTreeMap<String, FieldRule> },
    /// Clinical item lists merge as a union keyed by item id (server
    /// order first, then local-only items); differing scalar fields
    /// still require explicit rules.
    ListUnion {
        scalar_rules: BTreeMap<String, FieldRule>,
    },
}

/// Which side survived for one differing field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeptSide {
    Local,
    Server,
    Merged,
}

impl fmt::Display for KeptSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KeptSide::Local => "local",
            KeptSide::Server => "server",
            KeptSide::Merged => "merged",
        };
        write!(f, "{s}")
    }
}

/// One differing top-level content field and the side that was kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictNote {
    pub field: String,
    pub kept: KeptSide,
}

/// A resolved document plus the audit trail of what differed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub resolved: ChartDocument,
    pub notes: Vec<ConflictNote>,
}

// ============================================================================
// RESOLUTION
// ============================================================================

/// Resolve a diverged local/server pair under the given policy.
pub fn resolve_conflict(
    local: &ChartDocument,
    server: &ChartDocument,
    policy: &MergePolicy,
) -> EpcrResult<Resolution> {
    if local.chart_id != server.chart_id {
        return Err(EpcrError::Resolve(ResolveError::DocumentMismatch {
            reason: format!(
                "chart ids differ: local {}, server {}",
                local.chart_id, server.chart_id
            ),
        }));
    }
    if local.tenant_id != server.tenant_id {
        return Err(EpcrError::Resolve(ResolveError::DocumentMismatch {
            reason: "tenants differ".to_string(),
        }));
    }

    let differing = content_diff(local, server)?;

    match policy {
        MergePolicy::LastWriteWins => {
            let local_wins = local.last_modified_at > server.last_modified_at;
            let kept = if local_wins {
                KeptSide::Local
            } else {
                KeptSide::Server
            };
            let mut resolved = if local_wins {
                local.clone()
            } else {
                server.clone()
            };
            keep_server_lifecycle(server, &mut resolved);
            let notes = differing
                .into_iter()
                .map(|field| ConflictNote { field, kept })
                .collect();
            Ok(Resolution { resolved, notes })
        }
        MergePolicy::FieldLevel { rules } => {
            let (resolved, notes) = merge_by_rules(local, server, &differing, rules)?;
            Ok(Resolution { resolved, notes })
        }
        MergePolicy::ListUnion { scalar_rules } => {
            let list_fields: Vec<String> = differing
                .iter()
                .filter(|field| LIST_FIELDS.contains(&field.as_str()))
                .cloned()
                .collect();
            let scalar_fields: Vec<String> = differing
                .iter()
                .filter(|field| !LIST_FIELDS.contains(&field.as_str()))
                .cloned()
                .collect();

            let (mut resolved, mut notes) =
                merge_by_rules(local, server, &scalar_fields, scalar_rules)?;
            for field in &list_fields {
                apply_list_union(local, server, field, &mut resolved);
                notes.push(ConflictNote {
                    field: field.clone(),
                    kept: KeptSide::Merged,
                });
            }
            notes.sort_by(|a, b| a.field.cmp(&b.field));
            Ok(Resolution { resolved, notes })
        }
    }
}

/// Differing top-level content fields, sorted. Rule-exempt fields are
/// never reported.
fn content_diff(local: &ChartDocument, server: &ChartDocument) -> EpcrResult<Vec<String>> {
    let local_value = to_object(local)?;
    let server_value = to_object(server)?;

    let mut fields: Vec<String> = server_value
        .keys()
        .filter(|key| !RULE_EXEMPT_FIELDS.contains(&key.as_str()))
        .filter(|key| local_value.get(*key) != server_value.get(*key))
        .cloned()
        .collect();
    fields.sort();
    Ok(fields)
}

/// Rule-driven scalar merge: server copy is the base, PreferLocal fields
/// are copied over from the local document, and any differing field
/// without a rule fails the whole resolution.
fn merge_by_rules(
    local: &ChartDocument,
    server: &ChartDocument,
    differing: &[String],
    rules: &BTreeMap<String, FieldRule>,
) -> EpcrResult<(ChartDocument, Vec<ConflictNote>)> {
    let mut notes = Vec::new();
    let mut prefer_local = Vec::new();

    for field in differing {
        match rules.get(field) {
            None => {
                return Err(EpcrError::Resolve(ResolveError::UnspecifiedField {
                    field: field.clone(),
                }))
            }
            Some(FieldRule::PreferServer) => notes.push(ConflictNote {
                field: field.clone(),
                kept: KeptSide::Server,
            }),
            Some(FieldRule::PreferLocal) => {
                prefer_local.push(field.clone());
                notes.push(ConflictNote {
                    field: field.clone(),
                    kept: KeptSide::Local,
                });
            }
        }
    }

    let mut resolved = server.clone();
    if !prefer_local.is_empty() {
        let mut resolved_value = serde_json::to_value(&resolved).map_err(merge_failed)?;
        let local_value = serde_json::to_value(local).map_err(merge_failed)?;
        if let (Value::Object(resolved_map), Value::Object(local_map)) =
            (&mut resolved_value, &local_value)
        {
            for field in &prefer_local {
                if let Some(value) = local_map.get(field) {
                    resolved_map.insert(field.clone(), value.clone());
                }
            }
        }
        resolved = serde_json::from_value(resolved_value).map_err(merge_failed)?;
    }
    keep_server_lifecycle(server, &mut resolved);
    Ok((resolved, notes))
}

fn apply_list_union(
    local: &ChartDocument,
    server: &ChartDocument,
    field: &str,
    resolved: &mut ChartDocument,
) {
    match field {
        "vitals" => resolved.vitals = union_by_id(&server.vitals, &local.vitals, |v| v.item_id),
        "medications" => {
            resolved.medications =
                union_by_id(&server.medications, &local.medications, |m| m.item_id)
        }
        "procedures" => {
            resolved.procedures = union_by_id(&server.procedures, &local.procedures, |p| p.item_id)
        }
        "assessments" => {
            resolved.assessments =
                union_by_id(&server.assessments, &local.assessments, |a| a.item_id)
        }
        "attachments" => {
            resolved.attachments =
                union_by_id(&server.attachments, &local.attachments, |a| a.item_id)
        }
        _ => {}
    }
}

/// Server items in order, then local-only items in local order.
fn union_by_id<T: Clone, F: Fn(&T) -> EntityId>(server: &[T], local: &[T], id: F) -> Vec<T> {
    let known: HashSet<EntityId> = server.iter().map(&id).collect();
    let mut merged = server.to_vec();
    merged.extend(
        local
            .iter()
            .filter(|item| !known.contains(&id(item)))
            .cloned(),
    );
    merged
}

/// Lifecycle stays with the server copy whatever the policy decided.
fn keep_server_lifecycle(server: &ChartDocument, resolved: &mut ChartDocument) {
    resolved.status = server.status;
    resolved.submitted_at = server.submitted_at;
    resolved.sha256_submitted = server.sha256_submitted.clone();
}

fn to_object(doc: &ChartDocument) -> EpcrResult<serde_json::Map<String, Value>> {
    match serde_json::to_value(doc).map_err(merge_failed)? {
        Value::Object(map) => Ok(map),
        _ => Err(EpcrError::Resolve(ResolveError::MergeFailed {
            reason: "chart did not serialize to an object".to_string(),
        })),
    }
}

fn merge_failed(e: serde_json::Error) -> EpcrError {
    EpcrError::Resolve(ResolveError::MergeFailed {
        reason: e.to_string(),
    })
}

// ============================================================================
// TESTS
// ============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
