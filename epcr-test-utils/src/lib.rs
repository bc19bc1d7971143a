//! EPCR Test Utilities
//!
//! Centralized test infrastructure for the EPCR workspace:
//! - Mock collaborators implementing the integration trait seams
//! - Fixture builders for common chart shapes
//! - Proptest generators for core types

// Re-export the in-memory storage surface for convenience
pub use epcr_store::StoreHub;

use chrono::Utc;
use epcr_core::{
    new_entity_id, ArtifactRef, AssessmentEntry, AttachmentRef, BlobStore, ChartDocument,
    ChartMode, ChartStatus, DomainEvent, EpcrError, EpcrResult, EventPublisher, IncidentDetails,
    IntegrationError, IssueSeverity, PatientSummary, ProcedureEntry, RegulatoryValidator,
    SubmissionPolicy, TenantId, ValidationIssue, ValidationReport, VitalsEntry, WireExporter,
};
use std::sync::{Arc, Mutex};

// ============================================================================
// MOCK BLOB STORE
// ============================================================================

/// One stored blob, exactly as it was put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub bucket: String,
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// In-memory blob store that records every put and hashes content the
/// same way a real artifact store would.
#[derive(Debug, Clone, Default)]
pub struct MockBlobStore {
    blobs: Arc<Mutex<Vec<StoredBlob>>>,
}

impl MockBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every blob stored so far, in put order.
    pub fn puts(&self) -> Vec<StoredBlob> {
        self.blobs.lock().expect("blob lock").clone()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().expect("blob lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes stored under `bucket`/`key`, if any.
    pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.blobs
            .lock()
            .expect("blob lock")
            .iter()
            .find(|blob| blob.bucket == bucket && blob.key == key)
            .map(|blob| blob.bytes.clone())
    }
}

impl BlobStore for MockBlobStore {
    fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> EpcrResult<ArtifactRef> {
        let artifact = ArtifactRef {
            bucket: bucket.to_string(),
            key: key.to_string(),
            sha256: epcr_canonical::hash_bytes(bytes),
            content_type: content_type.to_string(),
            size_bytes: bytes.len() as i64,
        };
        self.blobs.lock().expect("blob lock").push(StoredBlob {
            bucket: bucket.to_string(),
            key: key.to_string(),
            bytes: bytes.to_vec(),
            content_type: content_type.to_string(),
        });
        Ok(artifact)
    }
}

/// Blob store that rejects every put, for fail-closed tests.
#[derive(Debug, Clone, Default)]
pub struct FailingBlobStore;

impl BlobStore for FailingBlobStore {
    fn put(&self, _: &str, _: &str, _: &[u8], _: &str) -> EpcrResult<ArtifactRef> {
        Err(EpcrError::Integration(IntegrationError::BlobStoreFailed {
            reason: "mock blob store configured to fail".to_string(),
        }))
    }
}

// ============================================================================
// SCRIPTED VALIDATOR
// ============================================================================

/// Validator that returns a pre-scripted report and records the state
/// codes it was asked about.
#[derive(Debug, Clone)]
pub struct ScriptedValidator {
    report: ValidationReport,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedValidator {
    /// A validator that passes everything.
    pub fn passing() -> Self {
        Self {
            report: ValidationReport {
                valid: true,
                issues: Vec::new(),
            },
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A validator reporting the given error-severity issues.
    pub fn with_errors(messages: &[&str]) -> Self {
        Self {
            report: ValidationReport {
                valid: false,
                issues: messages
                    .iter()
                    .map(|message| ValidationIssue {
                        severity: IssueSeverity::Error,
                        message: message.to_string(),
                    })
                    .collect(),
            },
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A validator reporting only warning-severity issues.
    pub fn with_warnings(messages: &[&str]) -> Self {
        Self {
            report: ValidationReport {
                valid: true,
                issues: messages
                    .iter()
                    .map(|message| ValidationIssue {
                        severity: IssueSeverity::Warning,
                        message: message.to_string(),
                    })
                    .collect(),
            },
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// State codes validated so far, in call order.
    pub fn validated_states(&self) -> Vec<String> {
        self.calls.lock().expect("validator lock").clone()
    }
}

impl RegulatoryValidator for ScriptedValidator {
    fn validate(&self, _wire_bytes: &[u8], state_code: &str) -> EpcrResult<ValidationReport> {
        self.calls
            .lock()
            .expect("validator lock")
            .push(state_code.to_string());
        Ok(self.report.clone())
    }
}

// ============================================================================
// EXPORTERS
// ============================================================================

/// Deterministic exporter rendering the chart as canonical JSON, so
/// identical documents always export to identical bytes.
#[derive(Debug, Clone, Default)]
pub struct CanonicalJsonExporter;

impl WireExporter for CanonicalJsonExporter {
    fn export(&self, document: &ChartDocument, agency: &str) -> EpcrResult<Vec<u8>> {
        let value = serde_json::json!({
            "agency": agency,
            "chart": serde_json::to_value(document).map_err(|e| {
                EpcrError::Integration(IntegrationError::ExportFailed {
                    reason: e.to_string(),
                })
            })?,
        });
        Ok(epcr_canonical::canonicalize(&value).into_bytes())
    }

    fn content_type(&self) -> &str {
        "application/json"
    }
}

/// Exporter that fails every export, for fail-closed tests.
#[derive(Debug, Clone, Default)]
pub struct FailingExporter;

impl WireExporter for FailingExporter {
    fn export(&self, _: &ChartDocument, _: &str) -> EpcrResult<Vec<u8>> {
        Err(EpcrError::Integration(IntegrationError::ExportFailed {
            reason: "mock exporter configured to fail".to_string(),
        }))
    }
}

// ============================================================================
// EVENT PUBLISHERS
// ============================================================================

/// Publisher that records every event it is handed.
#[derive(Debug, Clone, Default)]
pub struct RecordingPublisher {
    events: Arc<Mutex<Vec<DomainEvent>>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Published events in publish order.
    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().expect("publisher lock").clone()
    }

    /// Names of published events in publish order.
    pub fn event_names(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .map(|event| event.event_name)
            .collect()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: &DomainEvent) -> EpcrResult<()> {
        self.events.lock().expect("publisher lock").push(event.clone());
        Ok(())
    }
}

/// Publisher that fails every publish. The managers must swallow these
/// failures, so operations still succeed against it.
#[derive(Debug, Clone, Default)]
pub struct FailingPublisher;

impl EventPublisher for FailingPublisher {
    fn publish(&self, event: &DomainEvent) -> EpcrResult<()> {
        Err(EpcrError::Integration(IntegrationError::PublishFailed {
            event: event.event_name.clone(),
            reason: "mock publisher configured to fail".to_string(),
        }))
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;

    /// Policy used across workflow tests: one vitals set, a real
    /// narrative, disposition, unit, and crew.
    pub fn default_policy() -> SubmissionPolicy {
        SubmissionPolicy {
            min_narrative_chars: 40,
            min_vitals_entries: 1,
            require_disposition: true,
            require_unit_id: true,
            require_crew: true,
        }
    }

    /// A freshly created draft with nothing documented.
    pub fn empty_chart(tenant_id: TenantId, mode: ChartMode) -> ChartDocument {
        ChartDocument::new(tenant_id, mode, "pack-ms-2024", "medic-7")
    }

    /// A draft that passes both completeness scoring and the default
    /// submission policy for every chart mode.
    pub fn compliant_chart(tenant_id: TenantId, mode: ChartMode) -> ChartDocument {
        let mut doc = empty_chart(tenant_id, mode)
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
        epcr_scoring::rescore(&mut doc);
        doc
    }

    /// A compliant chart already moved to SUBMITTED, with the digest and
    /// timestamp invariants satisfied. Useful for seeding submission
    /// workflow tests without running the submit pathway.
    pub fn submitted_chart(tenant_id: TenantId, mode: ChartMode) -> ChartDocument {
        let mut doc = compliant_chart(tenant_id, mode);
        let submitted_at = Utc::now();
        doc.submitted_at = Some(submitted_at);
        let payload = epcr_canonical::submission_payload(&doc, submitted_at)
            .expect("fixture chart serializes");
        doc.sha256_submitted = Some(epcr_canonical::canonical_hash(&payload));
        doc.status = ChartStatus::Submitted;
        doc
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use epcr_core::SubmissionStatus;
    use proptest::prelude::*;

    pub fn arb_chart_mode() -> impl Strategy<Value = ChartMode> {
        prop_oneof![
            Just(ChartMode::Basic),
            Just(ChartMode::Advanced),
            Just(ChartMode::CriticalCare),
        ]
    }

    pub fn arb_chart_status() -> impl Strategy<Value = ChartStatus> {
        prop_oneof![
            Just(ChartStatus::Draft),
            Just(ChartStatus::Submitted),
            Just(ChartStatus::Locked),
            Just(ChartStatus::Cancelled),
        ]
    }

    pub fn arb_submission_status() -> impl Strategy<Value = SubmissionStatus> {
        prop_oneof![
            Just(SubmissionStatus::Pending),
            Just(SubmissionStatus::Submitted),
            Just(SubmissionStatus::Acknowledged),
            Just(SubmissionStatus::Accepted),
            Just(SubmissionStatus::Rejected),
        ]
    }

    /// Narratives long enough to satisfy the default fixture policy.
    pub fn arb_qualifying_narrative() -> impl Strategy<Value = String> {
        "[a-zA-Z ,.]{40,160}"
    }

    /// A vitals entry with a random subset of measurements recorded.
    pub fn arb_vitals() -> impl Strategy<Value = VitalsEntry> {
        (
            proptest::option::of(30i32..220),
            proptest::option::of(4i32..60),
            proptest::option::of(50i32..260),
            proptest::option::of(20i32..160),
            proptest::option::of(50i32..100),
        )
            .prop_map(|(pulse, resp, sys, dia, spo2)| {
                let mut vitals = VitalsEntry::new(Utc::now());
                vitals.pulse_bpm = pulse;
                vitals.respiratory_rate = resp;
                vitals.systolic_bp = sys;
                vitals.diastolic_bp = dia;
                vitals.spo2_percent = spo2;
                vitals
            })
    }

    /// A draft chart with random narrative, disposition, and vitals.
    pub fn arb_draft_chart() -> impl Strategy<Value = ChartDocument> {
        (
            arb_chart_mode(),
            proptest::option::of("[a-zA-Z ]{1,120}"),
            proptest::option::of("[a-z ]{1,24}"),
            proptest::collection::vec(arb_vitals(), 0..4),
        )
            .prop_map(|(mode, narrative, disposition, vitals)| {
                let mut doc = fixtures::empty_chart(new_entity_id(), mode);
                doc.narrative = narrative;
                doc.disposition = disposition;
                doc.vitals = vitals;
                epcr_scoring::rescore(&mut doc);
                doc
            })
    }
}

// ============================================================================
// TESTS
// ============================================================================
