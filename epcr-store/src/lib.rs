//! EPCR Store - Versioned Records and Unit of Work
//!
//! Generic tenant-scoped document store with optimistic concurrency, the
//! append-only audit sinks, and the staged-write transaction object the
//! workflow managers commit through. The in-memory backing here is the
//! reference implementation; `StoreHub` is the seam a database-backed
//! implementation replaces.

use chrono::Utc;
use epcr_core::{
    ChartAuditEntry, ChartDocument, EntityId, EpcrError, EpcrResult, RecordKind, StoreError,
    SubmissionAttempt, SubmissionStatusEvent, TenantId, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// Serializes every mutation and commit touching one StoreHub.
type CommitGate = Arc<Mutex<()>>;

// ============================================================================
// RECORD ENVELOPE
// ============================================================================

/// Envelope wrapping every stored document.
///
/// The envelope owns identity, tenancy, and the version counter; the
/// payload owns the domain content. Version starts at 1 and increases by
/// exactly 1 per successful update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedRecord<T> {
    pub id: EntityId,
    pub tenant_id: TenantId,
    pub version: i64,
    pub data: T,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Payload types the generic store can hold.
pub trait Recordable: Clone + Send + Sync + 'static {
    /// Discriminator used in store errors.
    const KIND: RecordKind;

    /// The payload's own identity, used as the record id.
    fn record_id(&self) -> EntityId;
}

impl Recordable for ChartDocument {
    const KIND: RecordKind = RecordKind::Chart;

    fn record_id(&self) -> EntityId {
        self.chart_id
    }
}

impl Recordable for SubmissionAttempt {
    const KIND: RecordKind = RecordKind::Submission;

    fn record_id(&self) -> EntityId {
        self.submission_id
    }
}

// ============================================================================
// UNIT OF WORK
// ============================================================================

/// One staged write. `check` validates preconditions, `apply` performs the
/// write. Once every staged check has passed under the commit gate, apply
/// cannot fail: check already acquired the same locks, and no other writer
/// runs while the gate is held.
trait StagedOp: Send {
    fn check(&self) -> Result<(), StoreError>;
    fn apply(&self) -> Result<(), StoreError>;
}

struct StagedCreate<T: Recordable> {
    records: Arc<RwLock<HashMap<EntityId, VersionedRecord<T>>>>,
    record: VersionedRecord<T>,
}

impl<T: Recordable> StagedOp for StagedCreate<T> {
    fn check(&self) -> Result<(), StoreError> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        if records.contains_key(&self.record.id) {
            return Err(StoreError::InsertFailed {
                kind: T::KIND,
                reason: "already exists".to_string(),
            });
        }
        Ok(())
    }

    fn apply(&self) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::LockPoisoned)?;
        records.insert(self.record.id, self.record.clone());
        Ok(())
    }
}

struct StagedUpdate<T: Recordable> {
    records: Arc<RwLock<HashMap<EntityId, VersionedRecord<T>>>>,
    tenant_id: TenantId,
    id: EntityId,
    expected_version: i64,
    data: T,
}

impl<T: Recordable> StagedOp for StagedUpdate<T> {
    fn check(&self) -> Result<(), StoreError> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        let record = match records.get(&self.id) {
            Some(record) if record.tenant_id == self.tenant_id => record,
            _ => {
                return Err(StoreError::NotFound {
                    kind: T::KIND,
                    id: self.id,
                })
            }
        };
        if record.version != self.expected_version {
            return Err(StoreError::VersionConflict {
                kind: T::KIND,
                id: self.id,
                expected: self.expected_version,
                actual: record.version,
            });
        }
        Ok(())
    }

    fn apply(&self) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::LockPoisoned)?;
        let record = records.get_mut(&self.id).ok_or(StoreError::NotFound {
            kind: T::KIND,
            id: self.id,
        })?;
        record.data = self.data.clone();
        record.version += 1;
        record.updated_at = Utc::now();
        Ok(())
    }
}

struct StagedAppend<E: Clone + Send + Sync + 'static> {
    entries: Arc<RwLock<Vec<E>>>,
    entry: E,
}

impl<E: Clone + Send + Sync + 'static> StagedOp for StagedAppend<E> {
    fn check(&self) -> Result<(), StoreError> {
        // Appends carry no precondition; they ride or fall with the batch.
        self.entries
            .read()
            .map(|_| ())
            .map_err(|_| StoreError::LockPoisoned)
    }

    fn apply(&self) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        entries.push(self.entry.clone());
        Ok(())
    }
}

/// Explicit transaction scope.
///
/// Writes staged here do not touch the store until `StoreHub::commit`.
/// Commit validates every staged precondition first and applies nothing
/// if any fails, so a batch lands entirely or not at all. Dropping an
/// uncommitted UnitOfWork discards all staged writes.
pub struct UnitOfWork {
    ops: Vec<Box<dyn StagedOp>>,
}

impl UnitOfWork {
    fn new() -> Self {
        Self { ops: Vec::new() }
    }

    fn stage(&mut self, op: Box<dyn StagedOp>) {
        self.ops.push(op);
    }

    /// Number of staged writes.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True when nothing has been staged.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

// ============================================================================
// RECORD STORE
// ============================================================================

/// Tenant-scoped versioned store for one payload type.
///
/// No locks are exposed to callers; the version field is the sole
/// serialization primitive. A mismatched expected version is the only
/// conflict signal and never causes a partial write.
pub struct RecordStore<T: Recordable> {
    records: Arc<RwLock<HashMap<EntityId, VersionedRecord<T>>>>,
    gate: CommitGate,
}

impl<T: Recordable> RecordStore<T> {
    fn with_gate(gate: CommitGate) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            gate,
        }
    }

    /// Create a standalone store with its own commit gate.
    /// Stores inside a StoreHub share the hub's gate instead.
    pub fn new() -> Self {
        Self::with_gate(Arc::new(Mutex::new(())))
    }

    /// Insert a new record at version 1.
    pub fn create(&self, tenant_id: TenantId, data: T) -> EpcrResult<VersionedRecord<T>> {
        let _gate = self.gate.lock().map_err(|_| StoreError::LockPoisoned)?;
        let mut records = self.records.write().map_err(|_| StoreError::LockPoisoned)?;
        let id = data.record_id();
        if records.contains_key(&id) {
            return Err(EpcrError::Store(StoreError::InsertFailed {
                kind: T::KIND,
                reason: "already exists".to_string(),
            }));
        }
        let now = Utc::now();
        let record = VersionedRecord {
            id,
            tenant_id,
            version: 1,
            data,
            created_at: now,
            updated_at: now,
        };
        records.insert(id, record.clone());
        Ok(record)
    }

    /// Fetch a record by id within a tenant.
    pub fn get(&self, tenant_id: TenantId, id: EntityId) -> EpcrResult<VersionedRecord<T>> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        match records.get(&id) {
            Some(record) if record.tenant_id == tenant_id => Ok(record.clone()),
            _ => Err(EpcrError::Store(StoreError::NotFound { kind: T::KIND, id })),
        }
    }

    /// Replace a record's payload, guarded by the caller's expected version.
    /// On success the stored version is exactly expected_version + 1.
    pub fn update(
        &self,
        tenant_id: TenantId,
        id: EntityId,
        expected_version: i64,
        data: T,
    ) -> EpcrResult<VersionedRecord<T>> {
        let _gate = self.gate.lock().map_err(|_| StoreError::LockPoisoned)?;
        let mut records = self.records.write().map_err(|_| StoreError::LockPoisoned)?;
        let record = match records.get_mut(&id) {
            Some(record) if record.tenant_id == tenant_id => record,
            _ => return Err(EpcrError::Store(StoreError::NotFound { kind: T::KIND, id })),
        };
        if record.version != expected_version {
            return Err(EpcrError::Store(StoreError::VersionConflict {
                kind: T::KIND,
                id,
                expected: expected_version,
                actual: record.version,
            }));
        }
        record.data = data;
        record.version += 1;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    /// All records for a tenant, ordered by id (UUIDv7, so creation order).
    pub fn list(&self, tenant_id: TenantId) -> EpcrResult<Vec<VersionedRecord<T>>> {
        self.list_by(tenant_id, |_| true)
    }

    /// Records for a tenant whose payload matches the predicate.
    pub fn list_by<F>(&self, tenant_id: TenantId, predicate: F) -> EpcrResult<Vec<VersionedRecord<T>>>
    where
        F: Fn(&T) -> bool,
    {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut matched: Vec<VersionedRecord<T>> = records
            .values()
            .filter(|record| record.tenant_id == tenant_id && predicate(&record.data))
            .cloned()
            .collect();
        matched.sort_by_key(|record| record.id);
        Ok(matched)
    }

    /// Stage a create onto a unit of work. Returns the record as it will
    /// exist after commit.
    pub fn stage_create(
        &self,
        uow: &mut UnitOfWork,
        tenant_id: TenantId,
        data: T,
    ) -> VersionedRecord<T> {
        let now = Utc::now();
        let record = VersionedRecord {
            id: data.record_id(),
            tenant_id,
            version: 1,
            data,
            created_at: now,
            updated_at: now,
        };
        uow.stage(Box::new(StagedCreate {
            records: Arc::clone(&self.records),
            record: record.clone(),
        }));
        record
    }

    /// Stage an update onto a unit of work. The expected-version check
    /// runs at commit time, against the then-current stored version.
    pub fn stage_update(
        &self,
        uow: &mut UnitOfWork,
        tenant_id: TenantId,
        id: EntityId,
        expected_version: i64,
        data: T,
    ) {
        uow.stage(Box::new(StagedUpdate {
            records: Arc::clone(&self.records),
            tenant_id,
            id,
            expected_version,
            data,
        }));
    }

    /// Number of stored records across all tenants.
    pub fn count(&self) -> usize {
        self.records.read().map(|records| records.len()).unwrap_or(0)
    }
}

impl<T: Recordable> Default for RecordStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// AUDIT LOG
// ============================================================================

/// Append-only sink. No update or delete operations exist; entries are
/// observed in commit order.
pub struct AuditLog<E: Clone + Send + Sync + 'static> {
    entries: Arc<RwLock<Vec<E>>>,
    gate: CommitGate,
}

impl<E: Clone + Send + Sync + 'static> AuditLog<E> {
    fn with_gate(gate: CommitGate) -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
            gate,
        }
    }

    /// Create a standalone log with its own commit gate.
    pub fn new() -> Self {
        Self::with_gate(Arc::new(Mutex::new(())))
    }

    /// Append one entry immediately.
    pub fn append(&self, entry: E) -> EpcrResult<()> {
        let _gate = self.gate.lock().map_err(|_| StoreError::LockPoisoned)?;
        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        entries.push(entry);
        Ok(())
    }

    /// Stage an append onto a unit of work. The entry lands only if the
    /// whole batch commits, so no audit entry can exist for a transition
    /// that did not durably happen.
    pub fn stage_append(&self, uow: &mut UnitOfWork, entry: E) {
        uow.stage(Box::new(StagedAppend {
            entries: Arc::clone(&self.entries),
            entry,
        }));
    }

    /// All entries in append order.
    pub fn snapshot(&self) -> EpcrResult<Vec<E>> {
        let entries = self.entries.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(entries.clone())
    }

    /// Entries matching the predicate, in append order.
    pub fn filtered<F>(&self, predicate: F) -> EpcrResult<Vec<E>>
    where
        F: Fn(&E) -> bool,
    {
        let entries = self.entries.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(entries.iter().filter(|e| predicate(e)).cloned().collect())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    /// True when no entries have been appended.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: Clone + Send + Sync + 'static> Default for AuditLog<E> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// STORE HUB
// ============================================================================

/// The full storage surface the workflow managers run against: one store
/// per aggregate plus the append-only logs, all sharing one commit gate
/// so multi-aggregate batches are all-or-nothing.
pub struct StoreHub {
    gate: CommitGate,
    charts: RecordStore<ChartDocument>,
    submissions: RecordStore<SubmissionAttempt>,
    chart_audit: AuditLog<ChartAuditEntry>,
    submission_events: AuditLog<SubmissionStatusEvent>,
}

impl StoreHub {
    /// Create an empty in-memory hub.
    pub fn new() -> Self {
        let gate: CommitGate = Arc::new(Mutex::new(()));
        Self {
            charts: RecordStore::with_gate(Arc::clone(&gate)),
            submissions: RecordStore::with_gate(Arc::clone(&gate)),
            chart_audit: AuditLog::with_gate(Arc::clone(&gate)),
            submission_events: AuditLog::with_gate(Arc::clone(&gate)),
            gate,
        }
    }

    /// Open a unit of work. Stage writes through the individual stores,
    /// then pass it back to `commit`. Only the outermost orchestration
    /// should commit.
    pub fn begin(&self) -> UnitOfWork {
        UnitOfWork::new()
    }

    /// Validate then apply every staged write under the commit gate.
    /// Any failed precondition aborts the whole batch with nothing applied.
    pub fn commit(&self, uow: UnitOfWork) -> EpcrResult<()> {
        let _gate = self.gate.lock().map_err(|_| StoreError::LockPoisoned)?;
        for op in &uow.ops {
            op.check()?;
        }
        for op in &uow.ops {
            op.apply()?;
        }
        Ok(())
    }

    pub fn charts(&self) -> &RecordStore<ChartDocument> {
        &self.charts
    }

    pub fn submissions(&self) -> &RecordStore<SubmissionAttempt> {
        &self.submissions
    }

    pub fn chart_audit(&self) -> &AuditLog<ChartAuditEntry> {
        &self.chart_audit
    }

    pub fn submission_events(&self) -> &AuditLog<SubmissionStatusEvent> {
        &self.submission_events
    }
}

impl Default for StoreHub {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
