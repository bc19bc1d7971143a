//! Submission Workflow Manager
//!
//! One SubmissionAttempt per try at transmitting a chart's regulatory
//! export. The transition table is a persisted contract:
//!
//! pending      -> {submitted}
//! submitted    -> {acknowledged, rejected}
//! acknowledged -> {accepted, rejected}
//! accepted     -> {}            (terminal)
//! rejected     -> {}            (terminal)
//!
//! The pending -> submitted transition is recorded here but performed by
//! the external dispatcher that owns wire transmission. Acceptance locks
//! the owning chart in the same transaction: a chart is never LOCKED
//! without an accepted attempt, and an attempt is never accepted while
//! leaving its chart unlocked.

use chrono::Utc;
use epcr_core::{
    new_entity_id, BlobStore, ChartAction, ChartAuditEntry, ChartStatus, DomainEvent, EntityId,
    EpcrResult, EventPublisher, RecordKind, SubmissionAttempt, SubmissionError, SubmissionStatus,
    SubmissionStatusEvent, TenantId, WireExporter,
};
use epcr_store::{StoreHub, VersionedRecord};
use std::sync::Arc;

use crate::publish_best_effort;

/// Bucket for exported wire payloads.
const EXPORT_BUCKET: &str = "submission-exports";
/// Bucket for authority response payloads.
const RESPONSE_BUCKET: &str = "submission-responses";

/// Orchestrates submission attempts and their status workflow.
pub struct SubmissionManager {
    hub: Arc<StoreHub>,
    exporter: Arc<dyn WireExporter>,
    blob_store: Arc<dyn BlobStore>,
    publisher: Arc<dyn EventPublisher>,
}

impl SubmissionManager {
    pub fn new(
        hub: Arc<StoreHub>,
        exporter: Arc<dyn WireExporter>,
        blob_store: Arc<dyn BlobStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            hub,
            exporter,
            blob_store,
            publisher,
        }
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Create the first submission attempt for a chart.
    ///
    /// The chart must be SUBMITTED or LOCKED. The export is stored as an
    /// artifact before anything else commits: an export or storage
    /// failure aborts the whole operation fail-closed.
    pub fn create_submission(
        &self,
        tenant_id: TenantId,
        chart_id: EntityId,
        state_code: &str,
        endpoint_ref: &str,
        actor: &str,
    ) -> EpcrResult<VersionedRecord<SubmissionAttempt>> {
        let chart = self.hub.charts().get(tenant_id, chart_id)?;
        if !chart.data.status.accepts_submission_attempts() {
            return Err(SubmissionError::ChartNotSubmitted {
                chart_id,
                status: chart.data.status,
            }
            .into());
        }

        let artifact = self.export_artifact(&chart.data)?;
        let attempt = SubmissionAttempt::new(chart_id, state_code, endpoint_ref, artifact.clone());
        let event = SubmissionStatusEvent::new(
            attempt.submission_id,
            chart_id,
            None,
            SubmissionStatus::Pending,
            actor,
        )
        .with_artifact(artifact);

        let mut uow = self.hub.begin();
        let record = self.hub.submissions().stage_create(&mut uow, tenant_id, attempt);
        self.hub.submission_events().stage_append(&mut uow, event);
        self.hub.commit(uow)?;

        tracing::info!(
            submission_id = %record.id,
            chart_id = %chart_id,
            state_code = %state_code,
            "submission attempt created"
        );
        publish_best_effort(
            self.publisher.as_ref(),
            DomainEvent::new(
                "submission.created",
                tenant_id,
                record.id,
                RecordKind::Submission,
                serde_json::json!({
                    "chart_id": chart_id,
                    "state_code": state_code,
                    "attempt_count": record.data.attempt_count,
                }),
            ),
        );
        Ok(record)
    }

    /// Advance an attempt's status along the transition table.
    ///
    /// An optional authority response payload is stored as an artifact
    /// before any state changes. When the target status is `accepted`,
    /// the owning chart is locked within the same transaction; if the
    /// chart's version check fails at commit, the submission status
    /// change and its event roll back with it.
    pub fn advance_status(
        &self,
        tenant_id: TenantId,
        submission_id: EntityId,
        to_status: SubmissionStatus,
        response_payload: Option<&[u8]>,
        actor: &str,
    ) -> EpcrResult<VersionedRecord<SubmissionAttempt>> {
        let record = self.hub.submissions().get(tenant_id, submission_id)?;
        let from = record.data.status;
        if !from.can_transition_to(to_status) {
            if from.is_terminal() {
                return Err(SubmissionError::AlreadyTerminal {
                    submission_id,
                    status: from,
                }
                .into());
            }
            return Err(SubmissionError::IllegalTransition {
                submission_id,
                from,
                to: to_status,
                allowed: from.allowed_transitions().to_vec(),
            }
            .into());
        }

        // Fail-closed: store the response before any state change.
        let response_artifact = match response_payload {
            Some(bytes) => Some(self.blob_store.put(
                RESPONSE_BUCKET,
                &format!("{submission_id}/{}", to_status.as_db_str()),
                bytes,
                "application/octet-stream",
            )?),
            None => None,
        };

        let mut updated = record.data.clone();
        updated.status = to_status;
        if response_artifact.is_some() {
            updated.response_artifact = response_artifact.clone();
        }
        let mut event = SubmissionStatusEvent::new(
            submission_id,
            record.data.chart_id,
            Some(from),
            to_status,
            actor,
        );
        if let Some(artifact) = &response_artifact {
            event = event.with_artifact(artifact.clone());
        }

        let mut uow = self.hub.begin();
        self.hub.submissions().stage_update(
            &mut uow,
            tenant_id,
            submission_id,
            record.version,
            updated,
        );
        self.hub.submission_events().stage_append(&mut uow, event);

        if to_status == SubmissionStatus::Accepted {
            // Lock the owning chart in the same transaction. A stale
            // chart version fails the commit and rolls everything back.
            let chart = self.hub.charts().get(tenant_id, record.data.chart_id)?;
            let mut doc = chart.data.clone();
            doc.status = ChartStatus::Locked;
            doc.touch(actor, Utc::now());
            self.hub.charts().stage_update(
                &mut uow,
                tenant_id,
                record.data.chart_id,
                chart.version,
                doc,
            );
            self.hub.chart_audit().stage_append(
                &mut uow,
                ChartAuditEntry::new(
                    record.data.chart_id,
                    tenant_id,
                    ChartAction::Locked,
                    actor,
                )
                .with_detail(&format!("submission {submission_id} accepted")),
            );
        }

        self.hub.commit(uow)?;

        tracing::info!(
            submission_id = %submission_id,
            from = %from,
            to = %to_status,
            "submission status advanced"
        );
        let event_name = match to_status {
            SubmissionStatus::Accepted => "submission.accepted",
            SubmissionStatus::Rejected => "submission.rejected",
            _ => "submission.status_changed",
        };
        publish_best_effort(
            self.publisher.as_ref(),
            DomainEvent::new(
                event_name,
                tenant_id,
                submission_id,
                RecordKind::Submission,
                serde_json::json!({
                    "chart_id": record.data.chart_id,
                    "from_status": from,
                    "to_status": to_status,
                }),
            ),
        );

        self.hub.submissions().get(tenant_id, submission_id)
    }

    /// Retry a rejected attempt.
    ///
    /// Re-exports the chart's *current* content, stores a fresh artifact,
    /// and creates a new attempt linked to the rejected one, which stays
    /// untouched.
    pub fn retry_submission(
        &self,
        tenant_id: TenantId,
        submission_id: EntityId,
        actor: &str,
    ) -> EpcrResult<VersionedRecord<SubmissionAttempt>> {
        let record = self.hub.submissions().get(tenant_id, submission_id)?;
        if !record.data.status.can_retry() {
            return Err(SubmissionError::RetryNotAllowed {
                submission_id,
                status: record.data.status,
            }
            .into());
        }

        let chart = self.hub.charts().get(tenant_id, record.data.chart_id)?;
        let artifact = self.export_artifact(&chart.data)?;
        let next = record.data.retry_with(artifact.clone());
        let event = SubmissionStatusEvent::new(
            next.submission_id,
            next.chart_id,
            None,
            SubmissionStatus::Pending,
            actor,
        )
        .with_artifact(artifact)
        .with_note(&format!("retry of {submission_id}"));

        let mut uow = self.hub.begin();
        let created = self.hub.submissions().stage_create(&mut uow, tenant_id, next);
        self.hub.submission_events().stage_append(&mut uow, event);
        self.hub.commit(uow)?;

        tracing::info!(
            submission_id = %created.id,
            previous = %submission_id,
            attempt_count = created.data.attempt_count,
            "submission retried"
        );
        publish_best_effort(
            self.publisher.as_ref(),
            DomainEvent::new(
                "submission.retried",
                tenant_id,
                created.id,
                RecordKind::Submission,
                serde_json::json!({
                    "chart_id": created.data.chart_id,
                    "previous_submission_id": submission_id,
                    "attempt_count": created.data.attempt_count,
                }),
            ),
        );
        Ok(created)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn get_submission(
        &self,
        tenant_id: TenantId,
        submission_id: EntityId,
    ) -> EpcrResult<VersionedRecord<SubmissionAttempt>> {
        self.hub.submissions().get(tenant_id, submission_id)
    }

    /// All attempts for a chart, in creation order.
    pub fn list_for_chart(
        &self,
        tenant_id: TenantId,
        chart_id: EntityId,
    ) -> EpcrResult<Vec<VersionedRecord<SubmissionAttempt>>> {
        self.hub
            .submissions()
            .list_by(tenant_id, |attempt| attempt.chart_id == chart_id)
    }

    /// The retry chain ending at the given attempt, oldest first,
    /// reconstructed by walking previous_submission_id backward.
    pub fn history(
        &self,
        tenant_id: TenantId,
        submission_id: EntityId,
    ) -> EpcrResult<Vec<VersionedRecord<SubmissionAttempt>>> {
        let mut chain = Vec::new();
        let mut cursor = Some(submission_id);
        while let Some(id) = cursor {
            let record = self.hub.submissions().get(tenant_id, id)?;
            cursor = record.data.previous_submission_id;
            chain.push(record);
        }
        chain.reverse();
        Ok(chain)
    }

    /// Status events for one attempt, in append order.
    pub fn status_events(
        &self,
        tenant_id: TenantId,
        submission_id: EntityId,
    ) -> EpcrResult<Vec<SubmissionStatusEvent>> {
        // Ownership check before reading the shared log.
        self.hub.submissions().get(tenant_id, submission_id)?;
        self.hub
            .submission_events()
            .filtered(|event| event.submission_id == submission_id)
    }

    fn export_artifact(
        &self,
        doc: &epcr_core::ChartDocument,
    ) -> EpcrResult<epcr_core::ArtifactRef> {
        let wire = self.exporter.export(doc, &doc.resource_pack)?;
        self.blob_store.put(
            EXPORT_BUCKET,
            &format!("{}/{}", doc.chart_id, new_entity_id()),
            &wire,
            self.exporter.content_type(),
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================
