//! EPCR Scoring - Completeness Engine
//!
//! Pure, deterministic scoring of chart documents against declarative
//! per-mode field tables, plus the stricter submission-readiness gate.
//! Completeness ("how documented is this chart") is advisory; readiness
//! ("may this chart legally be submitted") blocks the submit operation.

use epcr_core::{
    ChartDocument, ChartMode, CompletenessReport, MissingField, SubmissionPolicy,
    SubmissionReadiness,
};
use once_cell::sync::Lazy;

// ============================================================================
// FIELD TABLES
// ============================================================================

/// One expected field: stable key, crew-facing label, weight, and the
/// presence test. Rows are data; the engine below never special-cases a
/// field, so policy changes stay inside these tables.
#[derive(Clone, Copy)]
pub struct ExpectedField {
    pub key: &'static str,
    pub label: &'static str,
    pub weight: u32,
    pub present: fn(&ChartDocument) -> bool,
}

fn has_text(value: &Option<String>) -> bool {
    value.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false)
}

static BASIC_FIELDS: Lazy<Vec<ExpectedField>> = Lazy::new(|| {
    vec![
        ExpectedField {
            key: "patient.last_name",
            label: "Patient last name",
            weight: 10,
            present: |doc| has_text(&doc.patient.last_name),
        },
        ExpectedField {
            key: "patient.first_name",
            label: "Patient first name",
            weight: 5,
            present: |doc| has_text(&doc.patient.first_name),
        },
        ExpectedField {
            key: "patient.date_of_birth",
            label: "Patient date of birth",
            weight: 10,
            present: |doc| doc.patient.date_of_birth.is_some(),
        },
        ExpectedField {
            key: "patient.sex",
            label: "Patient sex",
            weight: 5,
            present: |doc| has_text(&doc.patient.sex),
        },
        ExpectedField {
            key: "incident.incident_number",
            label: "Incident number",
            weight: 10,
            present: |doc| has_text(&doc.incident.incident_number),
        },
        ExpectedField {
            key: "incident.unit_id",
            label: "Responding unit",
            weight: 10,
            present: |doc| has_text(&doc.incident.unit_id),
        },
        ExpectedField {
            key: "incident.crew",
            label: "Crew members",
            weight: 10,
            present: |doc| doc.incident.crew.iter().any(|m| !m.trim().is_empty()),
        },
        ExpectedField {
            key: "incident.dispatched_at",
            label: "Dispatch time",
            weight: 5,
            present: |doc| doc.incident.dispatched_at.is_some(),
        },
        ExpectedField {
            key: "vitals",
            label: "At least one set of vitals",
            weight: 15,
            present: |doc| !doc.vitals.is_empty(),
        },
        ExpectedField {
            key: "narrative",
            label: "Narrative",
            weight: 15,
            present: |doc| has_text(&doc.narrative),
        },
        ExpectedField {
            key: "disposition",
            label: "Disposition",
            weight: 15,
            present: |doc| has_text(&doc.disposition),
        },
    ]
});

static ADVANCED_FIELDS: Lazy<Vec<ExpectedField>> = Lazy::new(|| {
    let mut fields = BASIC_FIELDS.clone();
    fields.extend([
        ExpectedField {
            key: "patient.weight_kg",
            label: "Patient weight",
            weight: 10,
            present: |doc| doc.patient.weight_kg.is_some(),
        },
        ExpectedField {
            key: "vitals.serial",
            label: "Serial vitals (two or more sets)",
            weight: 10,
            present: |doc| doc.vitals.len() >= 2,
        },
        ExpectedField {
            key: "assessments",
            label: "At least one assessment",
            weight: 10,
            present: |doc| !doc.assessments.is_empty(),
        },
    ]);
    fields
});

static CRITICAL_CARE_FIELDS: Lazy<Vec<ExpectedField>> = Lazy::new(|| {
    let mut fields = ADVANCED_FIELDS.clone();
    fields.extend([
        ExpectedField {
            key: "incident.arrived_at",
            label: "Arrival time",
            weight: 5,
            present: |doc| doc.incident.arrived_at.is_some(),
        },
        ExpectedField {
            key: "procedures",
            label: "At least one procedure",
            weight: 10,
            present: |doc| !doc.procedures.is_empty(),
        },
        ExpectedField {
            key: "attachments",
            label: "Transfer documentation attached",
            weight: 10,
            present: |doc| !doc.attachments.is_empty(),
        },
    ]);
    fields
});

/// The expected-field table for a chart mode.
pub fn fields_for(mode: ChartMode) -> &'static [ExpectedField] {
    match mode {
        ChartMode::Basic => &BASIC_FIELDS,
        ChartMode::Advanced => &ADVANCED_FIELDS,
        ChartMode::CriticalCare => &CRITICAL_CARE_FIELDS,
    }
}

// ============================================================================
// SCORING
// ============================================================================

/// Score a chart against the field table for the given mode.
///
/// The score is the weighted percentage of expected fields present,
/// rounded to the nearest integer; `missing` lists absent fields in
/// table order. Pure: same document and mode always produce the same
/// report.
pub fn score_chart(doc: &ChartDocument, mode: ChartMode) -> CompletenessReport {
    let fields = fields_for(mode);
    let total: u32 = fields.iter().map(|field| field.weight).sum();
    let mut present_weight: u32 = 0;
    let mut missing = Vec::new();

    for field in fields {
        if (field.present)(doc) {
            present_weight += field.weight;
        } else {
            missing.push(MissingField {
                field: field.key.to_string(),
                label: field.label.to_string(),
            });
        }
    }

    let score = if total == 0 {
        100
    } else {
        ((present_weight * 100 + total / 2) / total) as i32
    };

    CompletenessReport { score, missing }
}

/// Recompute a document's stored completeness fields in place.
/// Every mutation pathway calls this so the stored score never goes stale.
pub fn rescore(doc: &mut ChartDocument) {
    let report = score_chart(doc, doc.mode);
    doc.completeness_score = report.score;
    doc.completeness_issues = report
        .missing
        .iter()
        .map(|missing| missing.label.clone())
        .collect();
}

/// The stricter submission gate: only the fields that make a chart
/// legally submittable, with thresholds from the policy. Distinct from
/// completeness; a chart can score well and still not be ready.
pub fn score_for_submission(doc: &ChartDocument, policy: &SubmissionPolicy) -> SubmissionReadiness {
    let mut blocking_issues = Vec::new();

    let narrative_chars = doc
        .narrative
        .as_deref()
        .map(|s| s.trim().chars().count())
        .unwrap_or(0);
    if narrative_chars < policy.min_narrative_chars as usize {
        blocking_issues.push(format!(
            "narrative must be at least {} characters",
            policy.min_narrative_chars
        ));
    }

    if doc.vitals.len() < policy.min_vitals_entries as usize {
        blocking_issues.push(format!(
            "at least {} vitals entries are required",
            policy.min_vitals_entries
        ));
    }

    if policy.require_disposition && !has_text(&doc.disposition) {
        blocking_issues.push("disposition is required".to_string());
    }

    if policy.require_unit_id && !has_text(&doc.incident.unit_id) {
        blocking_issues.push("responding unit is required".to_string());
    }

    if policy.require_crew && !doc.incident.crew.iter().any(|m| !m.trim().is_empty()) {
        blocking_issues.push("at least one crew member is required".to_string());
    }

    SubmissionReadiness {
        ready: blocking_issues.is_empty(),
        blocking_issues,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use epcr_core::{
        new_entity_id, AssessmentEntry, AttachmentRef, ChartMode, IncidentDetails, PatientSummary,
        ProcedureEntry, VitalsEntry,
    };

    fn empty_chart(mode: ChartMode) -> ChartDocument {
        ChartDocument::new(new_entity_id(), mode, "pack-ms-2024", "medic-7")
    }

    fn compliant_chart(mode: ChartMode) -> ChartDocument {
        let mut doc = empty_chart(mode)
            .with_narrative(
                "Crew arrived to find the patient alert and oriented, complaining of chest \
                 discomfort. Assessment and transport documented below.",
            )
            .with_disposition("transported")
            .with_patient(PatientSummary {
                first_name: Some("Avery".to_string()),
                last_name: Some("Smith".to_string()),
                date_of_birth: Some(
                    chrono::NaiveDate::from_ymd_opt(1962, 4, 18).expect("valid date"),
                ),
                sex: Some("F".to_string()),
                weight_kg: Some(72.5),
            })
            .with_incident(IncidentDetails {
                incident_number: Some("2024-001842".to_string()),
                unit_id: Some("M-14".to_string()),
                crew: vec!["medic-7".to_string(), "emt-22".to_string()],
                dispatched_at: Some(Utc::now()),
                arrived_at: Some(Utc::now()),
                scene_address: Some("412 Oak St".to_string()),
            });
        doc.vitals.push(VitalsEntry::new(Utc::now()));
        doc.vitals.push(VitalsEntry::new(Utc::now()));
        doc.assessments.push(AssessmentEntry {
            item_id: new_entity_id(),
            assessed_at: Utc::now(),
            impression: "chest pain, non-traumatic".to_string(),
            findings: None,
        });
        doc.procedures.push(ProcedureEntry {
            item_id: new_entity_id(),
            performed_at: Utc::now(),
            name: "12-lead ECG".to_string(),
            outcome: Some("acquired".to_string()),
            performed_by: "medic-7".to_string(),
        });
        doc.attachments.push(AttachmentRef {
            item_id: new_entity_id(),
            name: "transfer-packet.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            blob_key: "attach/1".to_string(),
            sha256: "ab".repeat(32),
        });
        doc
    }

    fn default_policy() -> SubmissionPolicy {
        SubmissionPolicy {
            min_narrative_chars: 40,
            min_vitals_entries: 1,
            require_disposition: true,
            require_unit_id: true,
            require_crew: true,
        }
    }

    #[test]
    fn test_empty_chart_scores_low_with_missing_fields() {
        let doc = empty_chart(ChartMode::Basic);
        let report = score_chart(&doc, ChartMode::Basic);
        assert_eq!(report.score, 0);
        assert_eq!(report.missing.len(), fields_for(ChartMode::Basic).len());
        // table order is preserved
        assert_eq!(report.missing[0].field, "patient.last_name");
    }

    #[test]
    fn test_compliant_chart_scores_full() {
        for mode in [ChartMode::Basic, ChartMode::Advanced, ChartMode::CriticalCare] {
            let doc = compliant_chart(mode);
            let report = score_chart(&doc, mode);
            assert_eq!(report.score, 100, "mode {mode:?}");
            assert!(report.missing.is_empty());
        }
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let mut doc = empty_chart(ChartMode::Advanced).with_narrative("short note");
        doc.vitals.push(VitalsEntry::new(Utc::now()));
        let first = score_chart(&doc, ChartMode::Advanced);
        let second = score_chart(&doc, ChartMode::Advanced);
        assert_eq!(first, second);
    }

    #[test]
    fn test_mode_tables_nest() {
        // A partially filled document can only lose points as the mode
        // expects more.
        let mut doc = empty_chart(ChartMode::Basic).with_narrative("documented");
        doc.vitals.push(VitalsEntry::new(Utc::now()));
        let basic = score_chart(&doc, ChartMode::Basic).score;
        let advanced = score_chart(&doc, ChartMode::Advanced).score;
        let critical = score_chart(&doc, ChartMode::CriticalCare).score;
        assert!(advanced <= basic);
        assert!(critical <= advanced);
    }

    #[test]
    fn test_rescore_matches_fresh_report() {
        let mut doc = compliant_chart(ChartMode::Basic);
        doc.completeness_score = -1;
        doc.completeness_issues = vec!["stale".to_string()];
        rescore(&mut doc);
        let report = score_chart(&doc, doc.mode);
        assert_eq!(doc.completeness_score, report.score);
        assert_eq!(
            doc.completeness_issues,
            report
                .missing
                .iter()
                .map(|m| m.label.clone())
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_zero_vitals_blocks_submission() {
        let mut doc = compliant_chart(ChartMode::Basic);
        doc.vitals.clear();
        let readiness = score_for_submission(&doc, &default_policy());
        assert!(!readiness.ready);
        assert!(readiness
            .blocking_issues
            .iter()
            .any(|issue| issue.contains("vitals")));
    }

    #[test]
    fn test_compliant_chart_is_ready() {
        let doc = compliant_chart(ChartMode::Basic);
        let readiness = score_for_submission(&doc, &default_policy());
        assert!(readiness.ready);
        assert!(readiness.blocking_issues.is_empty());
    }

    #[test]
    fn test_short_narrative_blocks_submission() {
        let doc = compliant_chart(ChartMode::Basic).with_narrative("too short");
        let readiness = score_for_submission(&doc, &default_policy());
        assert!(!readiness.ready);
        assert!(readiness
            .blocking_issues
            .iter()
            .any(|issue| issue.contains("narrative")));
    }

    #[test]
    fn test_whitespace_narrative_counts_as_absent() {
        let doc = compliant_chart(ChartMode::Basic).with_narrative("   \n\t  ");
        let readiness = score_for_submission(&doc, &default_policy());
        assert!(!readiness.ready);

        let report = score_chart(&doc, ChartMode::Basic);
        assert!(report.missing.iter().any(|m| m.field == "narrative"));
    }

    #[test]
    fn test_relaxed_policy_accepts_minimal_chart() {
        let policy = SubmissionPolicy {
            min_narrative_chars: 0,
            min_vitals_entries: 0,
            require_disposition: false,
            require_unit_id: false,
            require_crew: false,
        };
        let doc = empty_chart(ChartMode::Basic);
        let readiness = score_for_submission(&doc, &policy);
        assert!(readiness.ready);
    }
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
