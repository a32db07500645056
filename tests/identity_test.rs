//! Integration tests for patient identity reconciliation

mod common;

use chartsync::core::sync::IdentityReconciler;
use chartsync::domain::{PatientDemographics, PatientId, Tenant};
use chrono::NaiveDate;
use common::*;
use fake::faker::chrono::en::Date;
use fake::faker::name::en::{FirstName, LastName};
use fake::Fake;
use serde_json::json;
use std::sync::Arc;

fn acme() -> Tenant {
    config("sequential", &tenant_block("acme", &["p-1"])).tenants[0]
        .to_tenant()
        .unwrap()
}

fn demographics(source_id: &str, mrn: Option<&str>) -> PatientDemographics {
    let birth_date: NaiveDate = Date().fake();
    PatientDemographics {
        source_id: PatientId::new(source_id).unwrap(),
        mrn: mrn.map(str::to_string),
        family: Some(LastName().fake()),
        given: vec![FirstName().fake()],
        birth_date: Some(birth_date),
        gender: Some("unknown".to_string()),
    }
}

#[tokio::test]
async fn test_creates_tagged_patient_once() {
    let target = Arc::new(InMemoryTarget::default());
    let reconciler = IdentityReconciler::new(target.clone(), TAG_SYSTEM);
    let tenant = acme();
    let person = demographics("p-1", Some("MRN-001"));

    let first = reconciler
        .find_or_create_patient(&tenant, &person)
        .await
        .unwrap();
    let second = reconciler
        .find_or_create_patient(&tenant, &person)
        .await
        .unwrap();
    assert_eq!(first, second);

    let patients = target.all("acme", "Patient");
    assert_eq!(patients.len(), 1);
    assert_eq!(
        tag(&patients[0]),
        Some(("original-source-id/acme".to_string(), "p-1".to_string()))
    );
    assert_eq!(patients[0]["identifier"][0]["value"], "MRN-001");
    assert_eq!(
        patients[0]["name"][0]["family"].as_str(),
        person.family.as_deref()
    );
}

#[tokio::test]
async fn test_reuses_patient_with_same_mrn() {
    let target = Arc::new(InMemoryTarget::default());
    let existing = target.seed(
        "acme",
        json!({
            "resourceType": "Patient",
            "identifier": [{"system": MRN_SYSTEM, "value": "MRN-042"}],
        }),
    );
    let reconciler = IdentityReconciler::new(target.clone(), TAG_SYSTEM);

    let resolved = reconciler
        .find_or_create_patient(&acme(), &demographics("p-42", Some("MRN-042")))
        .await
        .unwrap();

    assert_eq!(resolved.as_str(), existing["id"].as_str().unwrap());
    assert_eq!(target.count("acme", "Patient"), 1);
}

#[tokio::test]
async fn test_falls_back_to_source_tag_without_mrn() {
    let target = Arc::new(InMemoryTarget::default());
    let reconciler = IdentityReconciler::new(target.clone(), TAG_SYSTEM);
    let person = demographics("p-7", None);

    let created = reconciler
        .find_or_create_patient(&acme(), &person)
        .await
        .unwrap();

    // a fresh reconciler has an empty cache and must find the tagged record
    let restarted = IdentityReconciler::new(target.clone(), TAG_SYSTEM);
    let found = restarted
        .find_or_create_patient(&acme(), &person)
        .await
        .unwrap();

    assert_eq!(created, found);
    assert_eq!(target.count("acme", "Patient"), 1);
}

#[tokio::test]
async fn test_patients_are_scoped_per_tenant() {
    let target = Arc::new(InMemoryTarget::default());
    let reconciler = IdentityReconciler::new(target.clone(), TAG_SYSTEM);
    let person = demographics("p-1", Some("MRN-001"));

    let globex = config("sequential", &tenant_block("globex", &["p-1"])).tenants[0]
        .to_tenant()
        .unwrap();
    reconciler
        .find_or_create_patient(&acme(), &person)
        .await
        .unwrap();
    reconciler
        .find_or_create_patient(&globex, &person)
        .await
        .unwrap();

    assert_eq!(target.count("acme", "Patient"), 1);
    assert_eq!(target.count("globex", "Patient"), 1);
}

#[tokio::test]
async fn test_shared_store_never_reuses_another_tenants_patient() {
    let target = Arc::new(InMemoryTarget::shared("store"));
    let reconciler = IdentityReconciler::new(target.clone(), TAG_SYSTEM);
    let person = demographics("p-1", Some("MRN-001"));

    let globex = config("sequential", &tenant_block("globex", &["p-1"])).tenants[0]
        .to_tenant()
        .unwrap();
    let for_acme = reconciler
        .find_or_create_patient(&acme(), &person)
        .await
        .unwrap();

    // same MRN system and source id, but a fresh cache and a different tenant
    let restarted = IdentityReconciler::new(target.clone(), TAG_SYSTEM);
    let for_globex = restarted
        .find_or_create_patient(&globex, &person)
        .await
        .unwrap();

    assert_ne!(for_acme, for_globex);
    assert_eq!(target.count("store", "Patient"), 2);
}
