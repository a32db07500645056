//! End-to-end sync cycles against in-memory collaborators
//!
//! These tests verify that:
//! - A new encounter is mirrored with its documents, binaries and orders
//! - Re-running a cycle performs no writes and reports a duplicate
//! - A failed write leaves no linking resource and is repaired by the next cycle
//! - Patients are reconciled by medical record number
//! - Transaction mode produces the same composite
//! - Tenants sharing one target store never see each other's records

mod common;

use chartsync::domain::{EventStatus, EventType, SkipReason};
use common::*;
use std::sync::Arc;

fn acme_source() -> InMemorySource {
    InMemorySource::default()
        .with(patient("p-1", "MRN-001"))
        .with(finished_encounter("enc-77", "p-1"))
        .with(document("doc-1", "p-1", "enc-77", Some("bin-1")))
        .with(document("doc-2", "p-1", "enc-77", None))
        .with(order("med-1", "p-1", "enc-77"))
        .with_binary("bin-1", b"%PDF-1.4 discharge summary")
}

#[tokio::test]
async fn test_new_encounter_is_mirrored_and_announced() {
    let config = config("sequential", &tenant_block("acme", &["p-1"]));
    let harness = Harness::new(&config, Arc::new(acme_source()));

    let response = harness.pipeline.scheduler().trigger(None).await;
    assert!(response.success, "{}", response.message);

    let target = &harness.target;
    assert_eq!(target.count("acme", "Patient"), 1);
    assert_eq!(target.count("acme", "Encounter"), 1);
    assert_eq!(target.count("acme", "DocumentReference"), 2);
    assert_eq!(target.count("acme", "MedicationRequest"), 1);
    assert_eq!(target.count("acme", "Binary"), 1);

    let links = target.all("acme", "List");
    assert_eq!(links.len(), 1);
    assert_eq!(
        tag(&links[0]),
        Some(("original-source-id/acme".to_string(), "enc-77".to_string()))
    );

    let encounter = &target.all("acme", "Encounter")[0];
    let encounter_id = encounter["id"].as_str().unwrap();
    assert_eq!(tag_code(encounter).as_deref(), Some("enc-77"));
    assert_eq!(
        links[0]["encounter"]["reference"].as_str(),
        Some(format!("Encounter/{encounter_id}").as_str())
    );

    // members point at target ids, never at source ids
    let patient_id = target.all("acme", "Patient")[0]["id"]
        .as_str()
        .unwrap()
        .to_string();
    for doc in target.all("acme", "DocumentReference") {
        assert_eq!(
            doc["subject"]["reference"].as_str(),
            Some(format!("Patient/{patient_id}").as_str())
        );
        assert_eq!(
            doc["context"]["encounter"][0]["reference"].as_str(),
            Some(format!("Encounter/{encounter_id}").as_str())
        );
    }
    let binary_id = target.all("acme", "Binary")[0]["id"]
        .as_str()
        .unwrap()
        .to_string();
    let with_attachment = target
        .all("acme", "DocumentReference")
        .into_iter()
        .find(|d| tag_code(d).as_deref() == Some("doc-1"))
        .unwrap();
    assert_eq!(
        with_attachment["content"][0]["attachment"]["url"].as_str(),
        Some(format!("Binary/{binary_id}").as_str())
    );

    let events = harness.finish().await;
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.event_type, EventType::EncounterSync);
    assert_eq!(event.status, EventStatus::Success);
    assert_eq!(event.skipped, None);
    assert_eq!(
        event.source_encounter_id.as_ref().map(|id| id.as_str()),
        Some("enc-77")
    );
    assert_eq!(
        event.target_encounter_id.as_ref().map(|id| id.as_str()),
        Some(encounter_id)
    );
    assert_eq!(harness.bus.topics(), vec!["chartsync-acme".to_string()]);
}

#[tokio::test]
async fn test_second_cycle_skips_mirrored_encounter() {
    let config = config("sequential", &tenant_block("acme", &["p-1"]));
    let harness = Harness::new(&config, Arc::new(acme_source()));
    let scheduler = harness.pipeline.scheduler();

    assert!(scheduler.trigger(None).await.success);
    let writes_after_first = harness.target.writes();

    let response = scheduler.trigger(None).await;
    assert!(response.success);
    assert_eq!(harness.target.writes(), writes_after_first);
    assert_eq!(harness.target.count("acme", "List"), 1);

    let events = harness.finish().await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].status, EventStatus::Success);
    assert_eq!(events[1].skipped, Some(SkipReason::Duplicate));
    assert!(events[1].target_encounter_id.is_some());
    assert_eq!(events[1].target_encounter_id, events[0].target_encounter_id);
}

#[tokio::test]
async fn test_failed_write_is_repaired_on_next_cycle() {
    let config = config("sequential", &tenant_block("acme", &["p-1"]));
    let harness = Harness::new(&config, Arc::new(acme_source()));
    harness.target.fail_nth_create("DocumentReference", 2);

    let response = harness.pipeline.scheduler().trigger(None).await;
    assert!(!response.success);
    assert_eq!(harness.target.count("acme", "List"), 0);
    assert_eq!(harness.target.count("acme", "DocumentReference"), 1);

    harness.target.clear_failures();
    let harness = harness.restart(&config).await;
    let response = harness.pipeline.scheduler().trigger(None).await;
    assert!(response.success, "{}", response.message);

    // members written by the failed attempt are reused, not duplicated
    assert_eq!(harness.target.count("acme", "DocumentReference"), 2);
    assert_eq!(harness.target.count("acme", "Binary"), 1);
    assert_eq!(harness.target.count("acme", "Patient"), 1);
    assert_eq!(harness.target.count("acme", "List"), 1);

    let events = harness.finish().await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].status, EventStatus::Failed);
    let error = events[0].error.as_deref().unwrap();
    assert!(error.contains("DocumentReference"), "{error}");
    assert_eq!(events[1].status, EventStatus::Success);
    assert_eq!(events[1].skipped, None);
}

#[tokio::test]
async fn test_existing_patient_is_matched_by_mrn() {
    let config = config("sequential", &tenant_block("acme", &["p-1"]));
    let target = Arc::new(InMemoryTarget::default());
    let existing = target.seed(
        "acme",
        serde_json::json!({
            "resourceType": "Patient",
            "identifier": [{"system": MRN_SYSTEM, "value": "MRN-001"}],
        }),
    );
    let harness = Harness::with_target(&config, Arc::new(acme_source()), target);

    assert!(harness.pipeline.scheduler().trigger(None).await.success);

    assert_eq!(harness.target.count("acme", "Patient"), 1);
    let encounter = &harness.target.all("acme", "Encounter")[0];
    assert_eq!(
        encounter["subject"]["reference"].as_str(),
        Some(format!("Patient/{}", existing["id"].as_str().unwrap()).as_str())
    );
    harness.finish().await;
}

#[tokio::test]
async fn test_missing_related_resource_does_not_fail_unit() {
    let source = InMemorySource::default()
        .with(patient("p-1", "MRN-001"))
        .with(finished_encounter("enc-77", "p-1"))
        .with(document("doc-1", "p-1", "enc-77", Some("bin-gone")));
    let config = config("sequential", &tenant_block("acme", &["p-1"]));
    let harness = Harness::new(&config, Arc::new(source));

    assert!(harness.pipeline.scheduler().trigger(None).await.success);
    assert_eq!(harness.target.count("acme", "Binary"), 0);
    assert_eq!(harness.target.count("acme", "DocumentReference"), 1);
    assert_eq!(harness.target.count("acme", "List"), 1);

    let events = harness.finish().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, EventStatus::Success);
}

#[tokio::test]
async fn test_encounter_listing_failure_reports_patient() {
    let source = acme_source();
    source.fail_searches_of("Encounter");
    let config = config("sequential", &tenant_block("acme", &["p-1"]));
    let harness = Harness::new(&config, Arc::new(source));

    let response = harness.pipeline.scheduler().trigger(None).await;
    assert!(!response.success);
    assert_eq!(harness.target.writes(), 0);

    let events = harness.finish().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::PatientSync);
    assert_eq!(events[0].status, EventStatus::Failed);
    assert!(events[0].source_encounter_id.is_none());
}

#[tokio::test]
async fn test_transaction_mode_mirrors_composite() {
    let config = config("transaction", &tenant_block("acme", &["p-1"]));
    let harness = Harness::new(&config, Arc::new(acme_source()));
    let scheduler = harness.pipeline.scheduler();

    let response = scheduler.trigger(None).await;
    assert!(response.success, "{}", response.message);
    assert_eq!(harness.target.count("acme", "Encounter"), 1);
    assert_eq!(harness.target.count("acme", "DocumentReference"), 2);
    assert_eq!(harness.target.count("acme", "Binary"), 1);

    let links = harness.target.all("acme", "List");
    assert_eq!(links.len(), 1);
    // linking resource lists the encounter plus every member
    assert_eq!(links[0]["entry"].as_array().unwrap().len(), 5);

    assert!(scheduler.trigger(None).await.success);
    assert_eq!(harness.target.count("acme", "Encounter"), 1);

    let events = harness.finish().await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].skipped, Some(SkipReason::Duplicate));
}

#[tokio::test]
async fn test_tenants_sharing_a_store_are_isolated() {
    let tenants = format!(
        "{}{}",
        tenant_block("acme", &["p-1"]),
        tenant_block("globex", &["p-1"])
    );
    let config = config("sequential", &tenants);
    let harness = Harness::with_target(
        &config,
        Arc::new(acme_source()),
        Arc::new(InMemoryTarget::shared("store")),
    );

    let summary = harness.pipeline.scheduler().run_cycle(None).await;
    assert!(summary.is_successful());
    assert_eq!(summary.units_synced, 2);
    assert_eq!(summary.units_skipped, 0);

    let target = &harness.target;
    assert_eq!(target.count("store", "Patient"), 2);
    assert_eq!(target.count("store", "Encounter"), 2);
    assert_eq!(target.count("store", "DocumentReference"), 4);
    assert_eq!(target.count("store", "Binary"), 2);

    let mut link_tags: Vec<_> = target.all("store", "List").iter().filter_map(tag).collect();
    link_tags.sort();
    assert_eq!(
        link_tags,
        vec![
            ("original-source-id/acme".to_string(), "enc-77".to_string()),
            ("original-source-id/globex".to_string(), "enc-77".to_string()),
        ]
    );

    // each link points at its own tenant's patient
    let patients: Vec<_> = target.all("store", "Patient");
    for link in target.all("store", "List") {
        let (system, _) = tag(&link).unwrap();
        let owner = patients
            .iter()
            .find(|p| tag(p).map(|(s, _)| s) == Some(system.clone()))
            .unwrap();
        assert_eq!(
            link["subject"]["reference"].as_str(),
            Some(format!("Patient/{}", owner["id"].as_str().unwrap()).as_str())
        );
    }

    let events = harness.finish().await;
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.status == EventStatus::Success && e.skipped.is_none()));
}
