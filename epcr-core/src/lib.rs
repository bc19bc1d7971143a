//! EPCR Core - Entity Types
//!
//! Pure data structures for charts, submissions, and their audit trail.
//! All other crates depend on this. This crate contains ONLY data types,
//! state-machine rules, and the integration trait seams - no storage, no
//! I/O, no business orchestration. Actual exporter/validator/blob-store
//! implementations are supplied by the hosting application.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Entity identifier using UUIDv7 for timestamp-sortable IDs.
/// UUIDv7 embeds a Unix timestamp, making IDs naturally sortable by creation time.
pub type EntityId = Uuid;

/// Tenant identifier. Every record is scoped to exactly one tenant.
pub type TenantId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// SHA-256 digest rendered as 64 lowercase hex characters.
pub type Sha256Hex = String;

/// Generate a new UUIDv7 EntityId (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}

// ============================================================================
// ENUMS
// ============================================================================

/// Record kind discriminator for store errors and polymorphic references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    Chart,
    Submission,
}

/// Care level a chart is documented at. Drives which completeness
/// field table applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChartMode {
    /// Basic life support documentation
    Basic,
    /// Advanced life support documentation
    Advanced,
    /// Critical care transport documentation
    CriticalCare,
}

impl ChartMode {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ChartMode::Basic => "basic",
            ChartMode::Advanced => "advanced",
            ChartMode::CriticalCare => "critical_care",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, ChartModeParseError> {
        match s.to_lowercase().as_str() {
            "basic" => Ok(ChartMode::Basic),
            "advanced" => Ok(ChartMode::Advanced),
            "critical_care" => Ok(ChartMode::CriticalCare),
            _ => Err(ChartModeParseError(s.to_string())),
        }
    }
}

impl fmt::Display for ChartMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for ChartMode {
    type Err = ChartModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid chart mode string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartModeParseError(pub String);

impl fmt::Display for ChartModeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid chart mode: {}", self.0)
    }
}

impl std::error::Error for ChartModeParseError {}

/// Lifecycle status of a chart.
///
/// DRAFT -> SUBMITTED -> LOCKED is forward-only. CANCELLED is reachable
/// from DRAFT or SUBMITTED, never from LOCKED. LOCKED and CANCELLED
/// freeze all clinical content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChartStatus {
    /// Open for editing by the crew
    Draft,
    /// Finalized by the crew, eligible for regulatory submission
    Submitted,
    /// Accepted by the authority, permanently read-only
    Locked,
    /// Abandoned, permanently read-only
    Cancelled,
}

impl ChartStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ChartStatus::Draft => "draft",
            ChartStatus::Submitted => "submitted",
            ChartStatus::Locked => "locked",
            ChartStatus::Cancelled => "cancelled",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, ChartStatusParseError> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(ChartStatus::Draft),
            "submitted" => Ok(ChartStatus::Submitted),
            "locked" => Ok(ChartStatus::Locked),
            "cancelled" => Ok(ChartStatus::Cancelled),
            _ => Err(ChartStatusParseError(s.to_string())),
        }
    }

    /// Check whether clinical content (item lists, narrative) may still change.
    pub fn is_content_frozen(&self) -> bool {
        matches!(self, ChartStatus::Locked | ChartStatus::Cancelled)
    }

    /// Check whether the chart can move to SUBMITTED.
    pub fn can_submit(&self) -> bool {
        matches!(self, ChartStatus::Draft)
    }

    /// Check whether the chart can move to CANCELLED.
    pub fn can_cancel(&self) -> bool {
        matches!(self, ChartStatus::Draft | ChartStatus::Submitted)
    }

    /// Check whether regulatory submission attempts may be created.
    pub fn accepts_submission_attempts(&self) -> bool {
        matches!(self, ChartStatus::Submitted | ChartStatus::Locked)
    }
}

impl fmt::Display for ChartStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for ChartStatus {
    type Err = ChartStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid chart status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartStatusParseError(pub String);

impl fmt::Display for ChartStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid chart status: {}", self.0)
    }
}

impl std::error::Error for ChartStatusParseError {}

/// Status of one regulatory submission attempt.
///
/// The lowercase db strings are the persisted wire contract shared with
/// the authority integration. Changing them requires a data migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubmissionStatus {
    /// Created locally, not yet transmitted
    Pending,
    /// Transmitted to the authority endpoint
    Submitted,
    /// Receipt confirmed by the authority
    Acknowledged,
    /// Passed authority processing (terminal)
    Accepted,
    /// Failed authority processing (terminal)
    Rejected,
}

impl SubmissionStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Submitted => "submitted",
            SubmissionStatus::Acknowledged => "acknowledged",
            SubmissionStatus::Accepted => "accepted",
            SubmissionStatus::Rejected => "rejected",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, SubmissionStatusParseError> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(SubmissionStatus::Pending),
            "submitted" => Ok(SubmissionStatus::Submitted),
            "acknowledged" => Ok(SubmissionStatus::Acknowledged),
            "accepted" => Ok(SubmissionStatus::Accepted),
            "rejected" => Ok(SubmissionStatus::Rejected),
            _ => Err(SubmissionStatusParseError(s.to_string())),
        }
    }

    /// The complete transition table. Every status change must come from
    /// this table; anything else is an illegal transition.
    ///
    /// pending -> submitted -> acknowledged -> accepted
    /// with rejected reachable from submitted and acknowledged.
    pub fn allowed_transitions(&self) -> &'static [SubmissionStatus] {
        match self {
            SubmissionStatus::Pending => &[SubmissionStatus::Submitted],
            SubmissionStatus::Submitted => {
                &[SubmissionStatus::Acknowledged, SubmissionStatus::Rejected]
            }
            SubmissionStatus::Acknowledged => {
                &[SubmissionStatus::Accepted, SubmissionStatus::Rejected]
            }
            SubmissionStatus::Accepted => &[],
            SubmissionStatus::Rejected => &[],
        }
    }

    /// Check whether a direct transition to `target` is legal.
    pub fn can_transition_to(&self, target: SubmissionStatus) -> bool {
        self.allowed_transitions().contains(&target)
    }

    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Only rejected attempts may be retried.
    pub fn can_retry(&self) -> bool {
        matches!(self, SubmissionStatus::Rejected)
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = SubmissionStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid submission status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionStatusParseError(pub String);

impl fmt::Display for SubmissionStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid submission status: {}", self.0)
    }
}

impl std::error::Error for SubmissionStatusParseError {}

/// The append-only clinical item lists a chart carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClinicalListKind {
    Vitals,
    Medications,
    Procedures,
    Assessments,
    Attachments,
}

impl ClinicalListKind {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ClinicalListKind::Vitals => "vitals",
            ClinicalListKind::Medications => "medications",
            ClinicalListKind::Procedures => "procedures",
            ClinicalListKind::Assessments => "assessments",
            ClinicalListKind::Attachments => "attachments",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, ClinicalListKindParseError> {
        match s.to_lowercase().as_str() {
            "vitals" => Ok(ClinicalListKind::Vitals),
            "medications" => Ok(ClinicalListKind::Medications),
            "procedures" => Ok(ClinicalListKind::Procedures),
            "assessments" => Ok(ClinicalListKind::Assessments),
            "attachments" => Ok(ClinicalListKind::Attachments),
            _ => Err(ClinicalListKindParseError(s.to_string())),
        }
    }
}

impl fmt::Display for ClinicalListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for ClinicalListKind {
    type Err = ClinicalListKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid clinical list kind string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClinicalListKindParseError(pub String);

impl fmt::Display for ClinicalListKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid clinical list kind: {}", self.0)
    }
}

impl std::error::Error for ClinicalListKindParseError {}

/// Severity of a regulatory validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueSeverity {
    /// Advisory, does not block submission
    Warning,
    /// Blocks submission
    Error,
}

impl IssueSeverity {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            IssueSeverity::Warning => "warning",
            IssueSeverity::Error => "error",
        }
    }

    /// Check whether an issue of this severity blocks submission.
    pub fn is_blocking(&self) -> bool {
        matches!(self, IssueSeverity::Error)
    }
}

impl fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

/// Action recorded in a chart audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChartAction {
    Created,
    Updated,
    ItemAppended,
    Submitted,
    Cancelled,
    Locked,
}

impl ChartAction {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ChartAction::Created => "chart_created",
            ChartAction::Updated => "chart_updated",
            ChartAction::ItemAppended => "item_appended",
            ChartAction::Submitted => "chart_submitted",
            ChartAction::Cancelled => "chart_cancelled",
            ChartAction::Locked => "chart_locked",
        }
    }
}

impl fmt::Display for ChartAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

// ============================================================================
// CLINICAL ITEM STRUCTS
// ============================================================================

/// One set of vital signs. Absent measurements stay None rather than 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitalsEntry {
    pub item_id: EntityId,
    pub taken_at: Timestamp,
    pub pulse_bpm: Option<i32>,
    pub respiratory_rate: Option<i32>,
    pub systolic_bp: Option<i32>,
    pub diastolic_bp: Option<i32>,
    pub spo2_percent: Option<i32>,
    pub gcs_total: Option<i32>,
    pub notes: Option<String>,
}

impl VitalsEntry {
    /// Create an empty vitals set taken at the given time.
    pub fn new(taken_at: Timestamp) -> Self {
        Self {
            item_id: new_entity_id(),
            taken_at,
            pulse_bpm: None,
            respiratory_rate: None,
            systolic_bp: None,
            diastolic_bp: None,
            spo2_percent: None,
            gcs_total: None,
            notes: None,
        }
    }
}

/// One medication administration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationEntry {
    pub item_id: EntityId,
    pub administered_at: Timestamp,
    pub name: String,
    pub dose: f64,
    pub dose_unit: String,
    pub route: String,
    pub administered_by: String,
}

/// One performed procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureEntry {
    pub item_id: EntityId,
    pub performed_at: Timestamp,
    pub name: String,
    pub outcome: Option<String>,
    pub performed_by: String,
}

/// One clinical assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentEntry {
    pub item_id: EntityId,
    pub assessed_at: Timestamp,
    pub impression: String,
    pub findings: Option<serde_json::Value>,
}

/// Reference to an uploaded attachment (image, ECG strip, signature).
/// The bytes live in the blob store; the chart only records the pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub item_id: EntityId,
    pub name: String,
    pub content_type: String,
    pub blob_key: String,
    pub sha256: Sha256Hex,
}

/// A clinical item destined for one of the chart's append-only lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClinicalEntry {
    Vitals(VitalsEntry),
    Medication(MedicationEntry),
    Procedure(ProcedureEntry),
    Assessment(AssessmentEntry),
    Attachment(AttachmentRef),
}

impl ClinicalEntry {
    /// The list this entry belongs to.
    pub fn kind(&self) -> ClinicalListKind {
        match self {
            ClinicalEntry::Vitals(_) => ClinicalListKind::Vitals,
            ClinicalEntry::Medication(_) => ClinicalListKind::Medications,
            ClinicalEntry::Procedure(_) => ClinicalListKind::Procedures,
            ClinicalEntry::Assessment(_) => ClinicalListKind::Assessments,
            ClinicalEntry::Attachment(_) => ClinicalListKind::Attachments,
        }
    }

    /// The entry's item id.
    pub fn item_id(&self) -> EntityId {
        match self {
            ClinicalEntry::Vitals(v) => v.item_id,
            ClinicalEntry::Medication(m) => m.item_id,
            ClinicalEntry::Procedure(p) => p.item_id,
            ClinicalEntry::Assessment(a) => a.item_id,
            ClinicalEntry::Attachment(a) => a.item_id,
        }
    }

    /// Assign a fresh item id if the entry arrived without one.
    /// Offline clients may ship entries with a nil id.
    pub fn ensure_item_id(&mut self) {
        let slot = match self {
            ClinicalEntry::Vitals(v) => &mut v.item_id,
            ClinicalEntry::Medication(m) => &mut m.item_id,
            ClinicalEntry::Procedure(p) => &mut p.item_id,
            ClinicalEntry::Assessment(a) => &mut a.item_id,
            ClinicalEntry::Attachment(a) => &mut a.item_id,
        };
        if slot.is_nil() {
            *slot = new_entity_id();
        }
    }
}

// ============================================================================
// CHART DOCUMENT
// ============================================================================

/// Patient demographics. All fields optional; completeness scoring
/// decides which ones a given chart mode expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PatientSummary {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub sex: Option<String>,
    pub weight_kg: Option<f64>,
}

/// Incident and response details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct IncidentDetails {
    pub incident_number: Option<String>,
    pub unit_id: Option<String>,
    pub crew: Vec<String>,
    pub dispatched_at: Option<Timestamp>,
    pub arrived_at: Option<Timestamp>,
    pub scene_address: Option<String>,
}

/// The chart document - one patient care encounter record.
///
/// Stored as the payload of a VersionedRecord; the envelope owns the
/// version counter, this struct owns the clinical content. Invariants:
/// `sha256_submitted` is Some exactly when status is Submitted or Locked,
/// and `completeness_score`/`completeness_issues` always reflect a fresh
/// scoring of the current content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartDocument {
    pub chart_id: EntityId,
    pub tenant_id: TenantId,
    pub mode: ChartMode,
    /// Which agency resource pack (protocols, pick lists) authored this chart.
    pub resource_pack: String,
    pub status: ChartStatus,
    pub created_by: String,
    pub last_modified_by: String,
    /// Edit marker used for offline conflict resolution. Distinct from the
    /// envelope's updated_at: offline copies carry this marker with them.
    pub last_modified_at: Timestamp,
    pub patient: PatientSummary,
    pub incident: IncidentDetails,
    pub vitals: Vec<VitalsEntry>,
    pub medications: Vec<MedicationEntry>,
    pub procedures: Vec<ProcedureEntry>,
    pub assessments: Vec<AssessmentEntry>,
    pub attachments: Vec<AttachmentRef>,
    pub narrative: Option<String>,
    pub disposition: Option<String>,
    pub completeness_score: i32,
    pub completeness_issues: Vec<String>,
    pub submitted_at: Option<Timestamp>,
    pub sha256_submitted: Option<Sha256Hex>,
    /// Agency-specific fields outside the well-known set.
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl ChartDocument {
    /// Create an empty draft chart.
    pub fn new(tenant_id: TenantId, mode: ChartMode, resource_pack: &str, created_by: &str) -> Self {
        let now = Utc::now();
        Self {
            chart_id: new_entity_id(),
            tenant_id,
            mode,
            resource_pack: resource_pack.to_string(),
            status: ChartStatus::Draft,
            created_by: created_by.to_string(),
            last_modified_by: created_by.to_string(),
            last_modified_at: now,
            patient: PatientSummary::default(),
            incident: IncidentDetails::default(),
            vitals: Vec::new(),
            medications: Vec::new(),
            procedures: Vec::new(),
            assessments: Vec::new(),
            attachments: Vec::new(),
            narrative: None,
            disposition: None,
            completeness_score: 0,
            completeness_issues: Vec::new(),
            submitted_at: None,
            sha256_submitted: None,
            extensions: BTreeMap::new(),
        }
    }

    /// Set the narrative (builder style).
    pub fn with_narrative(mut self, narrative: &str) -> Self {
        self.narrative = Some(narrative.to_string());
        self
    }

    /// Set the disposition (builder style).
    pub fn with_disposition(mut self, disposition: &str) -> Self {
        self.disposition = Some(disposition.to_string());
        self
    }

    /// Set patient demographics (builder style).
    pub fn with_patient(mut self, patient: PatientSummary) -> Self {
        self.patient = patient;
        self
    }

    /// Set incident details (builder style).
    pub fn with_incident(mut self, incident: IncidentDetails) -> Self {
        self.incident = incident;
        self
    }

    /// Append a clinical entry to its list, assigning an item id if absent.
    pub fn push_entry(&mut self, mut entry: ClinicalEntry) {
        entry.ensure_item_id();
        match entry {
            ClinicalEntry::Vitals(v) => self.vitals.push(v),
            ClinicalEntry::Medication(m) => self.medications.push(m),
            ClinicalEntry::Procedure(p) => self.procedures.push(p),
            ClinicalEntry::Assessment(a) => self.assessments.push(a),
            ClinicalEntry::Attachment(a) => self.attachments.push(a),
        }
    }

    /// Number of entries in the given list.
    pub fn entry_count(&self, kind: ClinicalListKind) -> usize {
        match kind {
            ClinicalListKind::Vitals => self.vitals.len(),
            ClinicalListKind::Medications => self.medications.len(),
            ClinicalListKind::Procedures => self.procedures.len(),
            ClinicalListKind::Assessments => self.assessments.len(),
            ClinicalListKind::Attachments => self.attachments.len(),
        }
    }

    /// Record who touched the document and when.
    pub fn touch(&mut self, actor: &str, at: Timestamp) {
        self.last_modified_by = actor.to_string();
        self.last_modified_at = at;
    }
}

/// Partial update to a chart. Each Some field fully replaces the
/// corresponding document field; None fields are left untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ChartPatch {
    pub narrative: Option<String>,
    pub disposition: Option<String>,
    pub patient: Option<PatientSummary>,
    pub incident: Option<IncidentDetails>,
    pub extensions: Option<BTreeMap<String, serde_json::Value>>,
}

impl ChartPatch {
    /// Apply this patch to a document. Does not touch status, item lists,
    /// or scoring fields; those have their own pathways.
    pub fn apply_to(&self, doc: &mut ChartDocument) {
        if let Some(narrative) = &self.narrative {
            doc.narrative = Some(narrative.clone());
        }
        if let Some(disposition) = &self.disposition {
            doc.disposition = Some(disposition.clone());
        }
        if let Some(patient) = &self.patient {
            doc.patient = patient.clone();
        }
        if let Some(incident) = &self.incident {
            doc.incident = incident.clone();
        }
        if let Some(extensions) = &self.extensions {
            doc.extensions = extensions.clone();
        }
    }

    /// Labels of the fields this patch carries, for audit entries.
    pub fn changed_fields(&self) -> Vec<String> {
        let mut fields = Vec::new();
        if self.narrative.is_some() {
            fields.push("narrative".to_string());
        }
        if self.disposition.is_some() {
            fields.push("disposition".to_string());
        }
        if self.patient.is_some() {
            fields.push("patient".to_string());
        }
        if self.incident.is_some() {
            fields.push("incident".to_string());
        }
        if self.extensions.is_some() {
            fields.push("extensions".to_string());
        }
        fields
    }

    /// A patch with no fields set changes nothing.
    pub fn is_empty(&self) -> bool {
        self.changed_fields().is_empty()
    }
}

// ============================================================================
// SUBMISSION STRUCTS
// ============================================================================

/// Pointer to a stored wire artifact plus its content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub bucket: String,
    pub key: String,
    pub sha256: Sha256Hex,
    pub content_type: String,
    pub size_bytes: i64,
}

/// One attempt to transmit a chart's regulatory export to an authority.
///
/// Attempts are immutable history: a retry creates a new attempt linked
/// via `previous_submission_id` rather than mutating the rejected one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionAttempt {
    pub submission_id: EntityId,
    pub chart_id: EntityId,
    /// Authority code, e.g. the destination state.
    pub state_code: String,
    /// Which configured endpoint this attempt targets.
    pub endpoint_ref: String,
    pub status: SubmissionStatus,
    /// The exported payload exactly as transmitted.
    pub artifact: ArtifactRef,
    /// The authority's response payload, if one was captured.
    pub response_artifact: Option<ArtifactRef>,
    pub attempt_count: i32,
    pub previous_submission_id: Option<EntityId>,
}

impl SubmissionAttempt {
    /// Create the first attempt for a chart.
    pub fn new(chart_id: EntityId, state_code: &str, endpoint_ref: &str, artifact: ArtifactRef) -> Self {
        Self {
            submission_id: new_entity_id(),
            chart_id,
            state_code: state_code.to_string(),
            endpoint_ref: endpoint_ref.to_string(),
            status: SubmissionStatus::Pending,
            artifact,
            response_artifact: None,
            attempt_count: 1,
            previous_submission_id: None,
        }
    }

    /// Create the follow-up attempt after this one was rejected.
    /// Carries a fresh artifact; the rejected attempt stays untouched.
    pub fn retry_with(&self, artifact: ArtifactRef) -> Self {
        Self {
            submission_id: new_entity_id(),
            chart_id: self.chart_id,
            state_code: self.state_code.clone(),
            endpoint_ref: self.endpoint_ref.clone(),
            status: SubmissionStatus::Pending,
            artifact,
            response_artifact: None,
            attempt_count: self.attempt_count + 1,
            previous_submission_id: Some(self.submission_id),
        }
    }
}

/// Append-only record of one submission status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionStatusEvent {
    pub event_id: EntityId,
    pub submission_id: EntityId,
    pub chart_id: EntityId,
    /// None for the creation event.
    pub from_status: Option<SubmissionStatus>,
    pub to_status: SubmissionStatus,
    pub actor: String,
    pub occurred_at: Timestamp,
    pub artifact: Option<ArtifactRef>,
    pub note: Option<String>,
}

impl SubmissionStatusEvent {
    /// Record a transition.
    pub fn new(
        submission_id: EntityId,
        chart_id: EntityId,
        from_status: Option<SubmissionStatus>,
        to_status: SubmissionStatus,
        actor: &str,
    ) -> Self {
        Self {
            event_id: new_entity_id(),
            submission_id,
            chart_id,
            from_status,
            to_status,
            actor: actor.to_string(),
            occurred_at: Utc::now(),
            artifact: None,
            note: None,
        }
    }

    /// Attach the artifact involved in this transition (builder style).
    pub fn with_artifact(mut self, artifact: ArtifactRef) -> Self {
        self.artifact = Some(artifact);
        self
    }

    /// Attach a free-text note (builder style).
    pub fn with_note(mut self, note: &str) -> Self {
        self.note = Some(note.to_string());
        self
    }
}

/// Append-only record of one chart mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartAuditEntry {
    pub entry_id: EntityId,
    pub chart_id: EntityId,
    pub tenant_id: TenantId,
    pub action: ChartAction,
    pub actor: String,
    pub occurred_at: Timestamp,
    /// Labels of the fields or lists the action touched.
    pub changes: Vec<String>,
    pub detail: Option<String>,
}

impl ChartAuditEntry {
    /// Record a chart action.
    pub fn new(chart_id: EntityId, tenant_id: TenantId, action: ChartAction, actor: &str) -> Self {
        Self {
            entry_id: new_entity_id(),
            chart_id,
            tenant_id,
            action,
            actor: actor.to_string(),
            occurred_at: Utc::now(),
            changes: Vec::new(),
            detail: None,
        }
    }

    /// Attach changed-field labels (builder style).
    pub fn with_changes(mut self, changes: Vec<String>) -> Self {
        self.changes = changes;
        self
    }

    /// Attach a free-text detail (builder style).
    pub fn with_detail(mut self, detail: &str) -> Self {
        self.detail = Some(detail.to_string());
        self
    }
}

// ============================================================================
// SCORING AND VALIDATION REPORTS
// ============================================================================

/// One expected field absent from a chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingField {
    /// Stable field key, e.g. "patient.last_name".
    pub field: String,
    /// Human-readable label shown to the crew.
    pub label: String,
}

/// Output of completeness scoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletenessReport {
    /// Percentage of expected field weight present, 0 to 100.
    pub score: i32,
    /// Absent fields in table order.
    pub missing: Vec<MissingField>,
}

/// Output of the stricter submission-readiness check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReadiness {
    pub ready: bool,
    /// Reasons the chart cannot legally be submitted yet.
    pub blocking_issues: Vec<String>,
}

/// One issue reported by the regulatory validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    pub message: String,
}

/// Verdict of the regulatory validator over an exported payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// Messages of all blocking (error severity) issues.
    pub fn blocking_messages(&self) -> Vec<String> {
        self.issues
            .iter()
            .filter(|issue| issue.severity.is_blocking())
            .map(|issue| issue.message.clone())
            .collect()
    }
}

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Record store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Record not found: {kind:?} with id {id}")]
    NotFound { kind: RecordKind, id: EntityId },

    #[error("Version conflict on {kind:?} {id}: expected {expected}, found {actual}")]
    VersionConflict {
        kind: RecordKind,
        id: EntityId,
        expected: i64,
        actual: i64,
    },

    #[error("Insert failed for {kind:?}: {reason}")]
    InsertFailed { kind: RecordKind, reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Chart lifecycle errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChartError {
    #[error("Chart {chart_id} is not editable in status {status}")]
    NotEditable {
        chart_id: EntityId,
        status: ChartStatus,
    },

    #[error("Chart {chart_id} is not ready for submission: {blocking:?}")]
    NotReady {
        chart_id: EntityId,
        blocking: Vec<String>,
    },

    #[error("Chart {chart_id} failed regulatory validation: {errors:?}")]
    ValidationBlocked {
        chart_id: EntityId,
        errors: Vec<String>,
    },

    #[error("Chart {chart_id} has already been submitted")]
    AlreadySubmitted { chart_id: EntityId },

    #[error("Chart {chart_id} cannot be submitted from status {status}")]
    NotSubmittable {
        chart_id: EntityId,
        status: ChartStatus,
    },

    #[error("Chart {chart_id} cannot be cancelled from status {status}")]
    NotCancellable {
        chart_id: EntityId,
        status: ChartStatus,
    },
}

/// Submission workflow errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("Illegal transition for submission {submission_id}: {from} -> {to}, allowed: {allowed:?}")]
    IllegalTransition {
        submission_id: EntityId,
        from: SubmissionStatus,
        to: SubmissionStatus,
        allowed: Vec<SubmissionStatus>,
    },

    #[error("Submission {submission_id} is terminal in status {status}")]
    AlreadyTerminal {
        submission_id: EntityId,
        status: SubmissionStatus,
    },

    #[error("Chart {chart_id} in status {status} does not accept submission attempts")]
    ChartNotSubmitted {
        chart_id: EntityId,
        status: ChartStatus,
    },

    #[error("Submission {submission_id} cannot be retried from status {status}")]
    RetryNotAllowed {
        submission_id: EntityId,
        status: SubmissionStatus,
    },
}

/// Offline conflict resolution errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Documents do not describe the same chart: {reason}")]
    DocumentMismatch { reason: String },

    #[error("No merge rule specified for differing field: {field}")]
    UnspecifiedField { field: String },

    #[error("Merge failed: {reason}")]
    MergeFailed { reason: String },
}

/// Canonicalization errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CanonicalError {
    #[error("Canonical serialization failed: {reason}")]
    Serialize { reason: String },
}

/// Errors from external collaborators (exporter, validator, blob store,
/// event publisher).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IntegrationError {
    #[error("Wire export failed: {reason}")]
    ExportFailed { reason: String },

    #[error("Regulatory validator unavailable: {reason}")]
    ValidatorUnavailable { reason: String },

    #[error("Artifact storage failed: {reason}")]
    BlobStoreFailed { reason: String },

    #[error("Event publish failed for {event}: {reason}")]
    PublishFailed { event: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all EPCR errors.
#[derive(Debug, Clone, Error)]
pub enum EpcrError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Chart error: {0}")]
    Chart(#[from] ChartError),

    #[error("Submission error: {0}")]
    Submission(#[from] SubmissionError),

    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Canonical error: {0}")]
    Canonical(#[from] CanonicalError),

    #[error("Integration error: {0}")]
    Integration(#[from] IntegrationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for EPCR operations.
pub type EpcrResult<T> = Result<T, EpcrError>;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Thresholds gating legal submission of a chart.
/// ALL values are required - no defaults anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionPolicy {
    /// Minimum narrative length in characters.
    pub min_narrative_chars: i32,
    /// Minimum number of vitals entries.
    pub min_vitals_entries: i32,
    /// Whether a disposition value is required.
    pub require_disposition: bool,
    /// Whether incident unit identification is required.
    pub require_unit_id: bool,
    /// Whether at least one crew member must be identified.
    pub require_crew: bool,
}

impl SubmissionPolicy {
    /// Validate the policy.
    /// Returns Ok(()) if valid, Err(EpcrError::Config) if invalid.
    pub fn validate(&self) -> EpcrResult<()> {
        if self.min_narrative_chars < 0 {
            return Err(EpcrError::Config(ConfigError::InvalidValue {
                field: "min_narrative_chars".to_string(),
                value: self.min_narrative_chars.to_string(),
                reason: "min_narrative_chars must be non-negative".to_string(),
            }));
        }

        if self.min_vitals_entries < 0 {
            return Err(EpcrError::Config(ConfigError::InvalidValue {
                field: "min_vitals_entries".to_string(),
                value: self.min_vitals_entries.to_string(),
                reason: "min_vitals_entries must be non-negative".to_string(),
            }));
        }

        Ok(())
    }
}

// ============================================================================
// INTEGRATION TRAIT SEAMS
// ============================================================================

/// A domain event emitted after a transaction commits.
///
/// Publication is fire-and-forget: the durable change has already
/// committed by the time an event is built, so a publish failure is
/// logged and swallowed by the caller, never retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event_name: String,
    pub tenant_id: TenantId,
    pub entity_id: EntityId,
    pub entity_type: RecordKind,
    pub payload: serde_json::Value,
    pub correlation_id: EntityId,
    pub occurred_at: Timestamp,
}

impl DomainEvent {
    pub fn new(
        event_name: &str,
        tenant_id: TenantId,
        entity_id: EntityId,
        entity_type: RecordKind,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_name: event_name.to_string(),
            tenant_id,
            entity_id,
            entity_type,
            payload,
            correlation_id: new_entity_id(),
            occurred_at: Utc::now(),
        }
    }

    /// Carry a caller-supplied correlation id instead of a fresh one.
    pub fn with_correlation(mut self, correlation_id: EntityId) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

/// Content-addressed artifact storage for wire payloads and agency
/// responses. Implementations must be thread-safe (Send + Sync).
pub trait BlobStore: Send + Sync {
    /// Store bytes under `bucket`/`key` and return the stored artifact's
    /// reference, including its content hash and size.
    fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> EpcrResult<ArtifactRef>;
}

/// State-level regulatory schema validation of an exported payload.
pub trait RegulatoryValidator: Send + Sync {
    /// Validate wire bytes against the given state's schema rules.
    /// Error-severity issues block submission; warnings do not.
    fn validate(&self, wire_bytes: &[u8], state_code: &str) -> EpcrResult<ValidationReport>;
}

/// Serializes a chart into the regulatory wire format.
///
/// Must be deterministic: identical documents produce identical bytes,
/// so a re-export of unchanged content hashes to the same value.
pub trait WireExporter: Send + Sync {
    fn export(&self, document: &ChartDocument, agency: &str) -> EpcrResult<Vec<u8>>;

    /// MIME type of the exported bytes, recorded on stored artifacts.
    fn content_type(&self) -> &str {
        "application/octet-stream"
    }
}

/// Fire-and-forget domain event sink.
///
/// Injected at manager construction; process-wide publisher lifecycle
/// is owned by the hosting application, not this workspace.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: &DomainEvent) -> EpcrResult<()>;
}

// ============================================================================
// TESTS
// ============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
