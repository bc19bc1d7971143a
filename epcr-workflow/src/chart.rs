//! Chart Lifecycle Manager
//!
//! DRAFT -> SUBMITTED -> LOCKED is forward-only; DRAFT or SUBMITTED may
//! move to CANCELLED. LOCKED and CANCELLED freeze clinical content. Every
//! mutation recomputes the stored completeness fields and lands atomically
//! with its audit entry.

use chrono::Utc;
use epcr_canonical::{canonical_hash, submission_payload};
use epcr_core::{
    ChartAction, ChartAuditEntry, ChartDocument, ChartError, ChartMode, ChartPatch, ChartStatus,
    ClinicalEntry, DomainEvent, EntityId, EpcrResult, EventPublisher, RecordKind,
    RegulatoryValidator, SubmissionPolicy, TenantId, WireExporter,
};
use epcr_scoring::{rescore, score_for_submission};
use epcr_store::{StoreHub, VersionedRecord};
use std::sync::Arc;

use crate::publish_best_effort;

/// Orchestrates the chart lifecycle over the store hub.
///
/// Collaborators are injected at construction; their process-wide
/// lifecycle belongs to the hosting application.
pub struct ChartManager {
    hub: Arc<StoreHub>,
    exporter: Arc<dyn WireExporter>,
    validator: Arc<dyn RegulatoryValidator>,
    publisher: Arc<dyn EventPublisher>,
    policy: SubmissionPolicy,
}

impl ChartManager {
    /// Build a manager. Fails if the submission policy is invalid.
    pub fn new(
        hub: Arc<StoreHub>,
        exporter: Arc<dyn WireExporter>,
        validator: Arc<dyn RegulatoryValidator>,
        publisher: Arc<dyn EventPublisher>,
        policy: SubmissionPolicy,
    ) -> EpcrResult<Self> {
        policy.validate()?;
        Ok(Self {
            hub,
            exporter,
            validator,
            publisher,
            policy,
        })
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Create a new draft chart with completeness computed immediately.
    pub fn create_chart(
        &self,
        tenant_id: TenantId,
        mode: ChartMode,
        resource_pack: &str,
        actor: &str,
    ) -> EpcrResult<VersionedRecord<ChartDocument>> {
        let mut doc = ChartDocument::new(tenant_id, mode, resource_pack, actor);
        rescore(&mut doc);

        let mut uow = self.hub.begin();
        let record = self.hub.charts().stage_create(&mut uow, tenant_id, doc);
        self.hub.chart_audit().stage_append(
            &mut uow,
            ChartAuditEntry::new(record.id, tenant_id, ChartAction::Created, actor),
        );
        self.hub.commit(uow)?;

        tracing::debug!(chart_id = %record.id, mode = %mode, "chart created");
        Ok(record)
    }

    /// Apply a patch to an editable chart, recomputing completeness.
    pub fn update_chart(
        &self,
        tenant_id: TenantId,
        chart_id: EntityId,
        expected_version: i64,
        patch: &ChartPatch,
        actor: &str,
    ) -> EpcrResult<VersionedRecord<ChartDocument>> {
        let record = self.hub.charts().get(tenant_id, chart_id)?;
        let mut doc = record.data;
        self.ensure_editable(&doc)?;

        patch.apply_to(&mut doc);
        doc.touch(actor, Utc::now());
        rescore(&mut doc);

        let mut uow = self.hub.begin();
        self.hub
            .charts()
            .stage_update(&mut uow, tenant_id, chart_id, expected_version, doc);
        self.hub.chart_audit().stage_append(
            &mut uow,
            ChartAuditEntry::new(chart_id, tenant_id, ChartAction::Updated, actor)
                .with_changes(patch.changed_fields()),
        );
        self.hub.commit(uow)?;

        self.hub.charts().get(tenant_id, chart_id)
    }

    /// Append one clinical entry to its list, assigning an item id if the
    /// entry arrived without one.
    pub fn append_item(
        &self,
        tenant_id: TenantId,
        chart_id: EntityId,
        expected_version: i64,
        mut entry: ClinicalEntry,
        actor: &str,
    ) -> EpcrResult<VersionedRecord<ChartDocument>> {
        let record = self.hub.charts().get(tenant_id, chart_id)?;
        let mut doc = record.data;
        self.ensure_editable(&doc)?;

        entry.ensure_item_id();
        let list = entry.kind();
        doc.push_entry(entry);
        doc.touch(actor, Utc::now());
        rescore(&mut doc);

        let mut uow = self.hub.begin();
        self.hub
            .charts()
            .stage_update(&mut uow, tenant_id, chart_id, expected_version, doc);
        self.hub.chart_audit().stage_append(
            &mut uow,
            ChartAuditEntry::new(chart_id, tenant_id, ChartAction::ItemAppended, actor)
                .with_changes(vec![list.to_string()]),
        );
        self.hub.commit(uow)?;

        self.hub.charts().get(tenant_id, chart_id)
    }

    /// Cancel a chart. Legal from DRAFT or SUBMITTED, never from LOCKED.
    pub fn cancel_chart(
        &self,
        tenant_id: TenantId,
        chart_id: EntityId,
        expected_version: i64,
        actor: &str,
    ) -> EpcrResult<VersionedRecord<ChartDocument>> {
        let record = self.hub.charts().get(tenant_id, chart_id)?;
        let mut doc = record.data;
        if !doc.status.can_cancel() {
            return Err(ChartError::NotCancellable {
                chart_id,
                status: doc.status,
            }
            .into());
        }

        doc.status = ChartStatus::Cancelled;
        // The digest belongs to SUBMITTED and LOCKED only.
        doc.submitted_at = None;
        doc.sha256_submitted = None;
        doc.touch(actor, Utc::now());
        rescore(&mut doc);

        let mut uow = self.hub.begin();
        self.hub
            .charts()
            .stage_update(&mut uow, tenant_id, chart_id, expected_version, doc);
        self.hub.chart_audit().stage_append(
            &mut uow,
            ChartAuditEntry::new(chart_id, tenant_id, ChartAction::Cancelled, actor),
        );
        self.hub.commit(uow)?;

        tracing::debug!(chart_id = %chart_id, "chart cancelled");
        self.hub.charts().get(tenant_id, chart_id)
    }

    /// Submit a chart for regulatory transmission.
    ///
    /// Three ordered, short-circuiting guards, none of which mutate
    /// anything: the completeness gate, the regulatory validation gate,
    /// and the idempotency gate. On success the chart moves to SUBMITTED
    /// with its canonical digest recorded, atomically with the audit
    /// entry, and a `chart.submitted` event is published best-effort
    /// after the commit.
    pub fn submit_chart(
        &self,
        tenant_id: TenantId,
        chart_id: EntityId,
        expected_version: i64,
        state_code: &str,
        actor: &str,
    ) -> EpcrResult<VersionedRecord<ChartDocument>> {
        let record = self.hub.charts().get(tenant_id, chart_id)?;
        let mut doc = record.data;

        // Guard 1: completeness.
        let readiness = score_for_submission(&doc, &self.policy);
        if !readiness.ready {
            return Err(ChartError::NotReady {
                chart_id,
                blocking: readiness.blocking_issues,
            }
            .into());
        }

        // Guard 2: regulatory validation. Warnings pass, errors block.
        let wire = self.exporter.export(&doc, &doc.resource_pack)?;
        let report = self.validator.validate(&wire, state_code)?;
        let errors = report.blocking_messages();
        if !errors.is_empty() {
            return Err(ChartError::ValidationBlocked { chart_id, errors }.into());
        }

        // Guard 3: idempotency. Submission is not re-entrant.
        match doc.status {
            ChartStatus::Draft => {}
            ChartStatus::Submitted => {
                return Err(ChartError::AlreadySubmitted { chart_id }.into())
            }
            ChartStatus::Locked | ChartStatus::Cancelled => {
                return Err(ChartError::NotSubmittable {
                    chart_id,
                    status: doc.status,
                }
                .into())
            }
        }

        let submitted_at = Utc::now();
        doc.submitted_at = Some(submitted_at);
        let payload = submission_payload(&doc, submitted_at)?;
        let digest = canonical_hash(&payload);
        doc.sha256_submitted = Some(digest.clone());
        doc.status = ChartStatus::Submitted;
        doc.touch(actor, submitted_at);
        rescore(&mut doc);

        let mut uow = self.hub.begin();
        self.hub
            .charts()
            .stage_update(&mut uow, tenant_id, chart_id, expected_version, doc);
        self.hub.chart_audit().stage_append(
            &mut uow,
            ChartAuditEntry::new(chart_id, tenant_id, ChartAction::Submitted, actor)
                .with_detail(&digest),
        );
        // A version conflict here rolls back the status change and the
        // audit entry together.
        self.hub.commit(uow)?;

        tracing::info!(chart_id = %chart_id, sha256 = %digest, "chart submitted");
        publish_best_effort(
            self.publisher.as_ref(),
            DomainEvent::new(
                "chart.submitted",
                tenant_id,
                chart_id,
                RecordKind::Chart,
                serde_json::json!({
                    "sha256_submitted": digest,
                    "submitted_at": submitted_at,
                    "state_code": state_code,
                }),
            ),
        );

        self.hub.charts().get(tenant_id, chart_id)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn get_chart(
        &self,
        tenant_id: TenantId,
        chart_id: EntityId,
    ) -> EpcrResult<VersionedRecord<ChartDocument>> {
        self.hub.charts().get(tenant_id, chart_id)
    }

    pub fn list_charts(
        &self,
        tenant_id: TenantId,
    ) -> EpcrResult<Vec<VersionedRecord<ChartDocument>>> {
        self.hub.charts().list(tenant_id)
    }

    pub fn list_charts_by_status(
        &self,
        tenant_id: TenantId,
        status: ChartStatus,
    ) -> EpcrResult<Vec<VersionedRecord<ChartDocument>>> {
        self.hub.charts().list_by(tenant_id, |doc| doc.status == status)
    }

    /// Audit entries for one chart, in append order.
    pub fn audit_trail(
        &self,
        tenant_id: TenantId,
        chart_id: EntityId,
    ) -> EpcrResult<Vec<ChartAuditEntry>> {
        self.hub
            .chart_audit()
            .filtered(|entry| entry.tenant_id == tenant_id && entry.chart_id == chart_id)
    }

    fn ensure_editable(&self, doc: &ChartDocument) -> EpcrResult<()> {
        if doc.status.is_content_frozen() {
            return Err(ChartError::NotEditable {
                chart_id: doc.chart_id,
                status: doc.status,
            }
            .into());
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
