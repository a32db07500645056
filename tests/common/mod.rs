//! In-memory collaborators shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chartsync::adapters::{
    BusMessage, ConfigTenantDirectory, IssuedToken, MessageBus, NoSessions, SourceEhr,
    TargetStore, TokenIssuer,
};
use chartsync::config::{secret_string, ChartsyncConfig};
use chartsync::core::pipeline::{Collaborators, Pipeline};
use chartsync::domain::{
    AuthContext, BinaryContent, SourceError, SourceId, SyncEvent, SystemCredential, TargetError,
    Tenant, TenantId,
};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

pub const TAG_SYSTEM: &str = "original-source-id";
pub const MRN_SYSTEM: &str = "urn:acme:mrn";

/// Configuration with the given write mode and `[[tenants]]` blocks
pub fn config(write_mode: &str, tenants: &str) -> ChartsyncConfig {
    let toml = format!(
        r#"
[scheduler]
max_parallel_tenants = 4
max_parallel_patients = 4

[target]
base_url = "https://store.example.com/{{tenant}}/fhir"
write_mode = "{write_mode}"

[events]
base_url = "https://bus.example.com/v1/projects/test"
topic_prefix = "chartsync"
max_retries = 1

{tenants}
"#
    );
    let config: ChartsyncConfig = toml::from_str(&toml).expect("test config parses");
    config.validate().expect("test config is valid");
    config
}

/// `[[tenants]]` block for a FHIR tenant with a system credential
pub fn tenant_block(id: &str, patients: &[&str]) -> String {
    credentialed_tenant(id, patients, false)
}

/// Like [`tenant_block`], with patient discovery switched on
pub fn discoverable_tenant_block(id: &str, fallback: &[&str]) -> String {
    credentialed_tenant(id, fallback, true)
}

fn credentialed_tenant(id: &str, patients: &[&str], discover: bool) -> String {
    let patients: Vec<String> = patients.iter().map(|p| format!("\"{p}\"")).collect();
    format!(
        r#"
[[tenants]]
id = "{id}"
ehr_integration = "fhir"
source_base_url = "https://ehr.{id}.example.com/fhir"
mrn_system = "{MRN_SYSTEM}"
patients = [{}]
discover_patients = {discover}

[tenants.system_credential]
token_url = "https://ehr.{id}.example.com/oauth2/token"
client_id = "chartsync"
client_secret = "test-secret"
"#,
        patients.join(", ")
    )
}

/// `[[tenants]]` block for a FHIR tenant with no credential at all
pub fn tenant_without_credential(id: &str, patients: &[&str]) -> String {
    let patients: Vec<String> = patients.iter().map(|p| format!("\"{p}\"")).collect();
    format!(
        r#"
[[tenants]]
id = "{id}"
ehr_integration = "fhir"
source_base_url = "https://ehr.{id}.example.com/fhir"
mrn_system = "{MRN_SYSTEM}"
patients = [{}]
"#,
        patients.join(", ")
    )
}

pub struct Harness {
    pub source: Arc<InMemorySource>,
    pub target: Arc<InMemoryTarget>,
    pub bus: Arc<RecordingBus>,
    pub pipeline: Pipeline,
}

impl Harness {
    pub fn new(config: &ChartsyncConfig, source: Arc<InMemorySource>) -> Self {
        Self::with_target(config, source, Arc::new(InMemoryTarget::default()))
    }

    pub fn with_target(
        config: &ChartsyncConfig,
        source: Arc<InMemorySource>,
        target: Arc<InMemoryTarget>,
    ) -> Self {
        Self::assemble(config, source, target, Arc::new(RecordingBus::default()))
    }

    fn assemble(
        config: &ChartsyncConfig,
        source: Arc<InMemorySource>,
        target: Arc<InMemoryTarget>,
        bus: Arc<RecordingBus>,
    ) -> Self {
        let collaborators = Collaborators {
            directory: Arc::new(
                ConfigTenantDirectory::from_config(&config.tenants).expect("tenants load"),
            ),
            sessions: Arc::new(NoSessions),
            tokens: Arc::new(StaticTokens),
            source: source.clone(),
            target: target.clone(),
            bus: bus.clone(),
        };
        Self {
            pipeline: Pipeline::assemble(collaborators, config),
            source,
            target,
            bus,
        }
    }

    /// Rebuilds the pipeline over the same stores and bus, as a process restart would
    pub async fn restart(self, config: &ChartsyncConfig) -> Self {
        self.pipeline.shutdown().await;
        Self::assemble(config, self.source, self.target, self.bus)
    }

    /// Drains the publisher and returns every event published so far
    pub async fn finish(&self) -> Vec<SyncEvent> {
        self.pipeline.shutdown().await;
        self.bus.events()
    }
}

/// Encounter that finished ten minutes ago
pub fn finished_encounter(id: &str, patient: &str) -> Value {
    let end = Utc::now() - Duration::minutes(10);
    let start = end - Duration::minutes(30);
    json!({
        "resourceType": "Encounter",
        "id": id,
        "status": "finished",
        "subject": {"reference": format!("Patient/{patient}")},
        "period": {"start": start.to_rfc3339(), "end": end.to_rfc3339()},
    })
}

pub fn patient(id: &str, mrn: &str) -> Value {
    json!({
        "resourceType": "Patient",
        "id": id,
        "identifier": [{"system": MRN_SYSTEM, "value": mrn}],
        "name": [{"use": "official", "family": "Rivera", "given": ["Ana"]}],
        "gender": "female",
        "birthDate": "1980-04-02",
    })
}

pub fn document(id: &str, patient: &str, encounter: &str, binary: Option<&str>) -> Value {
    let mut doc = json!({
        "resourceType": "DocumentReference",
        "id": id,
        "status": "current",
        "subject": {"reference": format!("Patient/{patient}")},
        "context": {"encounter": [{"reference": format!("Encounter/{encounter}")}]},
        "content": [],
    });
    if let Some(binary) = binary {
        doc["content"] = json!([{
            "attachment": {"url": format!("Binary/{binary}"), "contentType": "application/pdf"}
        }]);
    }
    doc
}

pub fn order(id: &str, patient: &str, encounter: &str) -> Value {
    json!({
        "resourceType": "MedicationRequest",
        "id": id,
        "status": "active",
        "intent": "order",
        "subject": {"reference": format!("Patient/{patient}")},
        "encounter": {"reference": format!("Encounter/{encounter}")},
    })
}

/// Code of the mirrored-record tag, whichever tenant it was written for
pub fn tag_code(resource: &Value) -> Option<String> {
    tag(resource).map(|(_, code)| code)
}

/// `(system, code)` of the mirrored-record tag
pub fn tag(resource: &Value) -> Option<(String, String)> {
    let prefix = format!("{TAG_SYSTEM}/");
    resource["meta"]["tag"].as_array()?.iter().find_map(|t| {
        let system = t["system"].as_str()?;
        let code = t["code"].as_str()?;
        system
            .starts_with(&prefix)
            .then(|| (system.to_string(), code.to_string()))
    })
}

/// Source EHR serving fixed resources for every tenant
#[derive(Default)]
pub struct InMemorySource {
    resources: Mutex<BTreeMap<(String, String), Value>>,
    binaries: Mutex<HashMap<String, Vec<u8>>>,
    failing_searches: Mutex<BTreeSet<String>>,
}

impl InMemorySource {
    pub fn with(self, resource: Value) -> Self {
        self.insert(resource);
        self
    }

    pub fn insert(&self, resource: Value) {
        let key = (
            resource["resourceType"].as_str().unwrap_or_default().to_string(),
            resource["id"].as_str().unwrap_or_default().to_string(),
        );
        self.resources.lock().unwrap().insert(key, resource);
    }

    pub fn with_binary(self, id: &str, data: &[u8]) -> Self {
        self.binaries
            .lock()
            .unwrap()
            .insert(id.to_string(), data.to_vec());
        self
    }

    /// Makes every search of `resource_type` fail
    pub fn fail_searches_of(&self, resource_type: &str) {
        self.failing_searches
            .lock()
            .unwrap()
            .insert(resource_type.to_string());
    }

    fn of_type(&self, resource_type: &str) -> Vec<Value> {
        self.resources
            .lock()
            .unwrap()
            .iter()
            .filter(|((t, _), _)| t == resource_type)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

fn references(resource: &Value, reference: &str) -> bool {
    resource["encounter"]["reference"].as_str() == Some(reference)
        || resource["context"]["encounter"]
            .as_array()
            .map(|a| a.iter().any(|e| e["reference"].as_str() == Some(reference)))
            .unwrap_or(false)
}

#[async_trait]
impl SourceEhr for InMemorySource {
    async fn read_resource(
        &self,
        _tenant: &Tenant,
        _auth: &AuthContext,
        resource_type: &str,
        id: &str,
    ) -> Result<Value, SourceError> {
        self.resources
            .lock()
            .unwrap()
            .get(&(resource_type.to_string(), id.to_string()))
            .cloned()
            .ok_or_else(|| SourceError::NotFound(format!("{resource_type}/{id}")))
    }

    async fn search_resources(
        &self,
        _tenant: &Tenant,
        _auth: &AuthContext,
        resource_type: &str,
        query: &[(String, String)],
    ) -> Result<Vec<Value>, SourceError> {
        if self.failing_searches.lock().unwrap().contains(resource_type) {
            return Err(SourceError::ServerError {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        let mut results = self.of_type(resource_type);
        for (name, value) in query {
            match name.as_str() {
                "patient" => {
                    let subject = format!("Patient/{value}");
                    results.retain(|r| r["subject"]["reference"].as_str() == Some(&subject));
                }
                "encounter" => results.retain(|r| references(r, value)),
                _ => {}
            }
        }
        Ok(results)
    }

    async fn fetch_binary(
        &self,
        _tenant: &Tenant,
        _auth: &AuthContext,
        id: &SourceId,
        content_type: Option<&str>,
    ) -> Result<BinaryContent, SourceError> {
        let data = self
            .binaries
            .lock()
            .unwrap()
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| SourceError::NotFound(format!("Binary/{id}")))?;
        Ok(BinaryContent {
            source_id: id.clone(),
            content_type: content_type
                .unwrap_or("application/octet-stream")
                .to_string(),
            data,
        })
    }
}

#[derive(Default)]
struct TargetState {
    resources: BTreeMap<(String, String), Vec<Value>>,
    next_id: usize,
    writes: usize,
    creates_by_type: HashMap<String, usize>,
    fail_create: Option<(String, usize)>,
}

impl TargetState {
    fn create(&mut self, tenant: &TenantId, resource_type: &str, body: &Value) -> Result<Value, TargetError> {
        let count = self
            .creates_by_type
            .entry(resource_type.to_string())
            .or_default();
        *count += 1;
        if let Some((failing_type, nth)) = &self.fail_create {
            if failing_type == resource_type && *nth == *count {
                return Err(TargetError::ServerError {
                    status: 500,
                    message: format!("injected failure on {resource_type} #{nth}"),
                });
            }
        }

        self.next_id += 1;
        let mut stored = body.clone();
        stored["id"] = json!(format!("{}-{}", resource_type.to_lowercase(), self.next_id));
        self.writes += 1;
        self.resources
            .entry((tenant.to_string(), resource_type.to_string()))
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    fn update(&mut self, tenant: &TenantId, resource_type: &str, id: &str, body: &Value) -> Result<Value, TargetError> {
        let stored = self
            .resources
            .get_mut(&(tenant.to_string(), resource_type.to_string()))
            .and_then(|all| all.iter_mut().find(|r| r["id"].as_str() == Some(id)))
            .ok_or_else(|| TargetError::NotFound(format!("{resource_type}/{id}")))?;
        *stored = body.clone();
        stored["id"] = json!(id);
        self.writes += 1;
        Ok(stored.clone())
    }

    fn search(&self, tenant: &TenantId, resource_type: &str, query: &[(String, String)]) -> Vec<Value> {
        let mut results = self
            .resources
            .get(&(tenant.to_string(), resource_type.to_string()))
            .cloned()
            .unwrap_or_default();
        for (name, value) in query {
            let (system, code) = value.split_once('|').unwrap_or(("", value.as_str()));
            let field = match name.as_str() {
                "_tag" => "tag",
                "identifier" => "identifier",
                _ => continue,
            };
            results.retain(|r| {
                let codings = if field == "tag" {
                    &r["meta"]["tag"]
                } else {
                    &r["identifier"]
                };
                let key = if field == "tag" { "code" } else { "value" };
                codings
                    .as_array()
                    .map(|cs| {
                        cs.iter().any(|c| {
                            c["system"].as_str() == Some(system) && c[key].as_str() == Some(code)
                        })
                    })
                    .unwrap_or(false)
            });
        }
        results
    }
}

/// Target store keeping resources per tenant, with optional failure injection
#[derive(Default)]
pub struct InMemoryTarget {
    state: Mutex<TargetState>,
    shared: Option<TenantId>,
    yielding: bool,
}

impl InMemoryTarget {
    /// One store for every tenant, kept under `name`
    pub fn shared(name: &str) -> Self {
        Self {
            shared: Some(TenantId::new(name).unwrap()),
            ..Self::default()
        }
    }

    /// Yields to the runtime before every call so concurrent units interleave
    pub fn yielding(mut self) -> Self {
        self.yielding = true;
        self
    }

    async fn scope(&self, tenant: &TenantId) -> TenantId {
        if self.yielding {
            tokio::task::yield_now().await;
        }
        self.shared.clone().unwrap_or_else(|| tenant.clone())
    }

    /// Makes the `nth` create of `resource_type` fail (1-based, counted from now on)
    pub fn fail_nth_create(&self, resource_type: &str, nth: usize) {
        let mut state = self.state.lock().unwrap();
        let already = state
            .creates_by_type
            .get(resource_type)
            .copied()
            .unwrap_or(0);
        state.fail_create = Some((resource_type.to_string(), already + nth));
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().fail_create = None;
    }

    pub fn seed(&self, tenant: &str, resource: Value) -> Value {
        let tenant = TenantId::new(tenant).unwrap();
        let resource_type = resource["resourceType"].as_str().unwrap().to_string();
        self.state
            .lock()
            .unwrap()
            .create(&tenant, &resource_type, &resource)
            .unwrap()
    }

    pub fn all(&self, tenant: &str, resource_type: &str) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .resources
            .get(&(tenant.to_string(), resource_type.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn count(&self, tenant: &str, resource_type: &str) -> usize {
        self.all(tenant, resource_type).len()
    }

    /// Creates and updates performed so far
    pub fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }
}

#[async_trait]
impl TargetStore for InMemoryTarget {
    async fn create_resource(
        &self,
        tenant: &TenantId,
        resource_type: &str,
        body: &Value,
    ) -> Result<Value, TargetError> {
        let tenant = &self.scope(tenant).await;
        self.state.lock().unwrap().create(tenant, resource_type, body)
    }

    async fn read_resource(
        &self,
        tenant: &TenantId,
        resource_type: &str,
        id: &str,
    ) -> Result<Value, TargetError> {
        let tenant = &self.scope(tenant).await;
        self.state
            .lock()
            .unwrap()
            .search(tenant, resource_type, &[])
            .into_iter()
            .find(|r| r["id"].as_str() == Some(id))
            .ok_or_else(|| TargetError::NotFound(format!("{resource_type}/{id}")))
    }

    async fn update_resource(
        &self,
        tenant: &TenantId,
        resource_type: &str,
        id: &str,
        body: &Value,
    ) -> Result<Value, TargetError> {
        let tenant = &self.scope(tenant).await;
        self.state
            .lock()
            .unwrap()
            .update(tenant, resource_type, id, body)
    }

    async fn search_resources(
        &self,
        tenant: &TenantId,
        resource_type: &str,
        query: &[(String, String)],
    ) -> Result<Vec<Value>, TargetError> {
        let tenant = &self.scope(tenant).await;
        Ok(self.state.lock().unwrap().search(tenant, resource_type, query))
    }

    /// Conditional PUTs only: `Type?_tag=system|code`
    async fn execute_bundle(&self, tenant: &TenantId, bundle: &Value) -> Result<Value, TargetError> {
        let tenant = &self.scope(tenant).await;
        let mut state = self.state.lock().unwrap();
        let mut responses = Vec::new();
        for entry in bundle["entry"].as_array().cloned().unwrap_or_default() {
            let url = entry["request"]["url"].as_str().unwrap_or_default();
            let (resource_type, query) = url.split_once('?').unwrap_or((url, ""));
            let query: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect();
            let existing = state
                .search(tenant, resource_type, &query)
                .into_iter()
                .find_map(|r| r["id"].as_str().map(str::to_string));
            let stored = match existing {
                Some(id) => state.update(tenant, resource_type, &id, &entry["resource"])?,
                None => state.create(tenant, resource_type, &entry["resource"])?,
            };
            responses.push(json!({
                "resource": stored,
                "response": {"status": "200 OK"},
            }));
        }
        Ok(json!({
            "resourceType": "Bundle",
            "type": "transaction-response",
            "entry": responses,
        }))
    }
}

/// Bus that records every published message
#[derive(Default)]
pub struct RecordingBus {
    topics: Mutex<BTreeSet<String>>,
    messages: Mutex<Vec<(String, BusMessage)>>,
}

impl RecordingBus {
    pub fn topics(&self) -> Vec<String> {
        self.topics.lock().unwrap().iter().cloned().collect()
    }

    pub fn messages(&self) -> Vec<(String, BusMessage)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<SyncEvent> {
        self.messages()
            .iter()
            .map(|(_, m)| serde_json::from_slice(&m.data).expect("event payload is JSON"))
            .collect()
    }
}

#[async_trait]
impl MessageBus for RecordingBus {
    async fn topic_exists(&self, topic: &str) -> chartsync::domain::Result<bool> {
        Ok(self.topics.lock().unwrap().contains(topic))
    }

    async fn create_topic(&self, topic: &str) -> chartsync::domain::Result<()> {
        self.topics.lock().unwrap().insert(topic.to_string());
        Ok(())
    }

    async fn publish(&self, topic: &str, message: &BusMessage) -> chartsync::domain::Result<String> {
        let mut messages = self.messages.lock().unwrap();
        messages.push((topic.to_string(), message.clone()));
        Ok(format!("msg-{}", messages.len()))
    }
}

/// Issues a one-hour token for any system credential
pub struct StaticTokens;

#[async_trait]
impl TokenIssuer for StaticTokens {
    async fn issue_token(
        &self,
        tenant_id: &TenantId,
        _credential: &SystemCredential,
    ) -> chartsync::domain::Result<IssuedToken> {
        Ok(IssuedToken {
            access_token: secret_string(format!("token-{tenant_id}")),
            expires_at: Utc::now() + Duration::hours(1),
        })
    }
}
