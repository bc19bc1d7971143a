//! EPCR Workflow - Chart and Submission Lifecycle Managers
//!
//! Orchestration over the versioned record store: the chart lifecycle
//! (create, update, append, cancel, submit) and the regulatory submission
//! workflow (create attempt, advance status, retry). Both managers stage
//! every write of an operation onto one unit of work and commit it at the
//! outermost level, so each operation lands entirely or not at all -
//! including the append-only audit entries riding along with it.
//!
//! Domain events are published only after the commit succeeds, and a
//! publish failure is logged and swallowed: the durable change already
//! happened, and the publisher offers no delivery guarantee.

mod chart;
mod submission;

pub use chart::ChartManager;
pub use submission::SubmissionManager;

use epcr_core::{DomainEvent, EventPublisher};

/// Publish after commit; warn and drop on failure, never escalate.
pub(crate) fn publish_best_effort(publisher: &dyn EventPublisher, event: DomainEvent) {
    if let Err(err) = publisher.publish(&event) {
        tracing::warn!(
            event = %event.event_name,
            entity_id = %event.entity_id,
            error = %err,
            "domain event publish failed; dropping"
        );
    }
}
