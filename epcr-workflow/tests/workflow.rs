//! End-to-end workflow scenarios: a chart's journey from an empty draft
//! through submission, regulatory transmission, acceptance, and lock,
//! plus the concurrency invariants the version counter enforces.

use std::sync::Arc;

use chrono::Utc;
use epcr_core::{
    new_entity_id, ChartError, ChartMode, ChartPatch, ChartStatus, ClinicalEntry, EpcrError,
    EventPublisher, StoreError, SubmissionStatus, VitalsEntry,
};
use epcr_scoring::score_chart;
use epcr_store::StoreHub;
use epcr_test_utils::fixtures::default_policy;
use epcr_test_utils::{CanonicalJsonExporter, MockBlobStore, RecordingPublisher, ScriptedValidator};
use epcr_workflow::{ChartManager, SubmissionManager};
use proptest::prelude::*;

struct World {
    charts: ChartManager,
    submissions: SubmissionManager,
    hub: Arc<StoreHub>,
    publisher: Arc<RecordingPublisher>,
}

fn world() -> World {
    let hub = Arc::new(StoreHub::new());
    let exporter = Arc::new(CanonicalJsonExporter);
    let publisher = Arc::new(RecordingPublisher::new());
    let charts = ChartManager::new(
        Arc::clone(&hub),
        exporter.clone(),
        Arc::new(ScriptedValidator::passing()),
        Arc::clone(&publisher) as Arc<dyn EventPublisher>,
        default_policy(),
    )
    .unwrap();
    let submissions = SubmissionManager::new(
        Arc::clone(&hub),
        exporter,
        Arc::new(MockBlobStore::new()),
        Arc::clone(&publisher) as Arc<dyn EventPublisher>,
    );
    World {
        charts,
        submissions,
        hub,
        publisher,
    }
}

#[test]
fn chart_journey_from_empty_draft_to_locked() {
    let w = world();
    let tenant = new_entity_id();

    // A crew opens a basic chart. Nothing is documented yet.
    let chart = w
        .charts
        .create_chart(tenant, ChartMode::Basic, "pack-ms-2024", "medic-7")
        .unwrap();
    assert_eq!(chart.data.status, ChartStatus::Draft);

    // Zero vitals recorded: the completeness gate blocks submission.
    let blocked = w.charts.submit_chart(tenant, chart.id, 1, "MS", "medic-7");
    match blocked {
        Err(EpcrError::Chart(ChartError::NotReady { blocking, .. })) => {
            assert!(!blocking.is_empty())
        }
        other => panic!("expected NotReady, got {other:?}"),
    }
    assert_eq!(
        w.charts.get_chart(tenant, chart.id).unwrap().data.status,
        ChartStatus::Draft
    );

    // The crew documents the encounter.
    let patch = ChartPatch {
        narrative: Some(
            "Crew arrived to find the patient alert and oriented, complaining of chest \
             discomfort. Vitals obtained, patient transported without incident."
                .to_string(),
        ),
        disposition: Some("transported".to_string()),
        incident: Some(epcr_core::IncidentDetails {
            incident_number: Some("2024-001842".to_string()),
            unit_id: Some("M-14".to_string()),
            crew: vec!["medic-7".to_string()],
            dispatched_at: Some(Utc::now()),
            arrived_at: Some(Utc::now()),
            scene_address: Some("412 Oak St".to_string()),
        }),
        ..ChartPatch::default()
    };
    w.charts
        .update_chart(tenant, chart.id, 1, &patch, "medic-7")
        .unwrap();
    w.charts
        .append_item(
            tenant,
            chart.id,
            2,
            ClinicalEntry::Vitals(VitalsEntry::new(Utc::now())),
            "medic-7",
        )
        .unwrap();

    // Now submission succeeds and records the digest.
    let submitted = w
        .charts
        .submit_chart(tenant, chart.id, 3, "MS", "medic-7")
        .unwrap();
    assert_eq!(submitted.data.status, ChartStatus::Submitted);
    assert_eq!(submitted.data.sha256_submitted.as_ref().unwrap().len(), 64);

    // Regulatory transmission: pending through accepted.
    let attempt = w
        .submissions
        .create_submission(tenant, chart.id, "MS", "ms-prod", "dispatcher")
        .unwrap();
    for status in [
        SubmissionStatus::Submitted,
        SubmissionStatus::Acknowledged,
        SubmissionStatus::Accepted,
    ] {
        w.submissions
            .advance_status(tenant, attempt.id, status, None, "dispatcher")
            .unwrap();
    }

    // Acceptance locked the chart; content is now frozen.
    let locked = w.charts.get_chart(tenant, chart.id).unwrap();
    assert_eq!(locked.data.status, ChartStatus::Locked);
    let late_edit = w.charts.update_chart(
        tenant,
        chart.id,
        locked.version,
        &ChartPatch {
            narrative: Some("post-hoc revision".to_string()),
            ..ChartPatch::default()
        },
        "medic-7",
    );
    assert!(matches!(
        late_edit,
        Err(EpcrError::Chart(ChartError::NotEditable { .. }))
    ));

    // Cancel is rejected once locked.
    assert!(matches!(
        w.charts
            .cancel_chart(tenant, chart.id, locked.version, "medic-7"),
        Err(EpcrError::Chart(ChartError::NotCancellable { .. }))
    ));

    // The audit trail tells the whole story in order.
    let actions: Vec<String> = w
        .charts
        .audit_trail(tenant, chart.id)
        .unwrap()
        .iter()
        .map(|entry| entry.action.to_string())
        .collect();
    assert_eq!(
        actions,
        vec![
            "chart_created",
            "chart_updated",
            "item_appended",
            "chart_submitted",
            "chart_locked",
        ]
    );

    let names = w.publisher.event_names();
    assert!(names.contains(&"chart.submitted".to_string()));
    assert!(names.contains(&"submission.accepted".to_string()));
}

#[test]
fn rejection_and_retry_keep_history_immutable() {
    let w = world();
    let tenant = new_entity_id();
    let chart = w
        .hub
        .charts()
        .create(
            tenant,
            epcr_test_utils::fixtures::submitted_chart(tenant, ChartMode::Basic),
        )
        .unwrap();

    let first = w
        .submissions
        .create_submission(tenant, chart.id, "MS", "ms-prod", "dispatcher")
        .unwrap();
    w.submissions
        .advance_status(tenant, first.id, SubmissionStatus::Submitted, None, "d")
        .unwrap();
    w.submissions
        .advance_status(
            tenant,
            first.id,
            SubmissionStatus::Rejected,
            Some(br#"{"errors":["invalid destination code"]}"#),
            "d",
        )
        .unwrap();

    let second = w.submissions.retry_submission(tenant, first.id, "d").unwrap();
    w.submissions
        .advance_status(tenant, second.id, SubmissionStatus::Submitted, None, "d")
        .unwrap();
    w.submissions
        .advance_status(tenant, second.id, SubmissionStatus::Acknowledged, None, "d")
        .unwrap();
    w.submissions
        .advance_status(tenant, second.id, SubmissionStatus::Accepted, None, "d")
        .unwrap();

    // Chain: rejected first, accepted second; the first is untouched.
    let chain = w.submissions.history(tenant, second.id).unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[0].data.status, SubmissionStatus::Rejected);
    assert_eq!(chain[0].data.attempt_count, 1);
    assert_eq!(chain[1].data.status, SubmissionStatus::Accepted);
    assert_eq!(chain[1].data.attempt_count, 2);
    assert_eq!(
        w.hub.charts().get(tenant, chart.id).unwrap().data.status,
        ChartStatus::Locked
    );
}

#[test]
fn concurrent_updates_same_expected_version_single_winner() {
    let w = world();
    let tenant = new_entity_id();
    let chart = w
        .charts
        .create_chart(tenant, ChartMode::Basic, "pack-ms-2024", "medic-7")
        .unwrap();

    let charts = Arc::new(w.charts);
    let mut handles = Vec::new();
    for text in ["left narrative", "right narrative"] {
        let charts = Arc::clone(&charts);
        let chart_id = chart.id;
        handles.push(std::thread::spawn(move || {
            charts.update_chart(
                tenant,
                chart_id,
                1,
                &ChartPatch {
                    narrative: Some(text.to_string()),
                    ..ChartPatch::default()
                },
                "medic-7",
            )
        }));
    }
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let wins = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(EpcrError::Store(StoreError::VersionConflict { .. }))))
        .count();
    assert_eq!(wins, 1);
    assert_eq!(conflicts, 1);
    assert_eq!(charts.get_chart(tenant, chart.id).unwrap().version, 2);
}

#[test]
fn acceptance_and_chart_writes_race_without_partial_state() {
    let w = world();
    let tenant = new_entity_id();
    let chart = w
        .hub
        .charts()
        .create(
            tenant,
            epcr_test_utils::fixtures::submitted_chart(tenant, ChartMode::Basic),
        )
        .unwrap();
    let attempt = w
        .submissions
        .create_submission(tenant, chart.id, "MS", "ms-prod", "dispatcher")
        .unwrap();
    w.submissions
        .advance_status(tenant, attempt.id, SubmissionStatus::Submitted, None, "d")
        .unwrap();
    w.submissions
        .advance_status(tenant, attempt.id, SubmissionStatus::Acknowledged, None, "d")
        .unwrap();

    // One writer keeps re-reading and rewriting the chart while the
    // acceptance path runs. Whatever interleaving occurs, the outcome
    // must be all-or-nothing across both aggregates.
    let hub = Arc::clone(&w.hub);
    let chart_id = chart.id;
    let writer = std::thread::spawn(move || {
        for _ in 0..50 {
            if let Ok(current) = hub.charts().get(tenant, chart_id) {
                let _ = hub
                    .charts()
                    .update(tenant, chart_id, current.version, current.data);
            }
        }
    });
    let accept = w.submissions.advance_status(
        tenant,
        attempt.id,
        SubmissionStatus::Accepted,
        None,
        "dispatcher",
    );
    writer.join().unwrap();

    let final_attempt = w.submissions.get_submission(tenant, attempt.id).unwrap();
    let final_chart = w.hub.charts().get(tenant, chart.id).unwrap();
    match accept {
        Ok(_) => {
            assert_eq!(final_attempt.data.status, SubmissionStatus::Accepted);
            assert_eq!(final_chart.data.status, ChartStatus::Locked);
        }
        Err(EpcrError::Store(StoreError::VersionConflict { .. })) => {
            assert_eq!(final_attempt.data.status, SubmissionStatus::Acknowledged);
            assert_eq!(final_chart.data.status, ChartStatus::Submitted);
        }
        Err(other) => panic!("unexpected failure: {other}"),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// After any sequence of patches and appended vitals, the stored
    /// completeness equals a fresh scoring of the current document.
    #[test]
    fn prop_completeness_never_stale(
        narratives in proptest::collection::vec(
            proptest::option::of("[a-zA-Z ]{0,80}"), 1..5),
        vitals_appends in 0usize..4,
    ) {
        let w = world();
        let tenant = new_entity_id();
        let chart = w
            .charts
            .create_chart(tenant, ChartMode::Basic, "pack-ms-2024", "medic-7")
            .unwrap();
        let mut version = chart.version;

        for narrative in narratives {
            let patch = ChartPatch {
                narrative,
                ..ChartPatch::default()
            };
            let updated = w
                .charts
                .update_chart(tenant, chart.id, version, &patch, "medic-7")
                .unwrap();
            version = updated.version;
        }
        for _ in 0..vitals_appends {
            let updated = w
                .charts
                .append_item(
                    tenant,
                    chart.id,
                    version,
                    ClinicalEntry::Vitals(VitalsEntry::new(Utc::now())),
                    "medic-7",
                )
                .unwrap();
            version = updated.version;
        }

        let current = w.charts.get_chart(tenant, chart.id).unwrap();
        let fresh = score_chart(&current.data, current.data.mode);
        prop_assert_eq!(current.data.completeness_score, fresh.score);
        prop_assert_eq!(
            current.data.completeness_issues.clone(),
            fresh.missing.iter().map(|m| m.label.clone()).collect::<Vec<_>>()
        );
    }
}
