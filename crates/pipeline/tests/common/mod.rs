//! In-memory collaborator fakes shared by the pipeline integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use genforge_core::error::CoreError;
use genforge_core::output::{CreateOutputRecord, OutputRecord};
use genforge_core::template::{GenerationTemplate, ParameterMap, ParameterSlot};
use genforge_core::types::{Credits, DbId};
use genforge_pipeline::collaborators::{
    DurableStorage, Ledger, LiveNotifier, OutputStore, TemplateStore,
};
use genforge_pipeline::config::OrchestratorConfig;
use genforge_pipeline::Services;

pub const TEMPLATE_ID: DbId = 3;
pub const USER_ID: DbId = 42;

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryTemplates {
    templates: HashMap<DbId, GenerationTemplate>,
}

impl InMemoryTemplates {
    pub fn with(template: GenerationTemplate) -> Self {
        Self {
            templates: HashMap::from([(template.id, template)]),
        }
    }
}

#[async_trait]
impl TemplateStore for InMemoryTemplates {
    async fn get_template(&self, id: DbId) -> Result<GenerationTemplate, CoreError> {
        self.templates
            .get(&id)
            .cloned()
            .ok_or(CoreError::NotFound {
                entity: "GenerationTemplate",
                id,
            })
    }
}

/// A txt2img-style template with `seed`, `prompt` and an image slot `source`.
pub fn sample_template(cost: Credits) -> GenerationTemplate {
    let mut parameter_map = ParameterMap::new();
    parameter_map.insert("seed".into(), ParameterSlot::value("3", "seed"));
    parameter_map.insert("prompt".into(), ParameterSlot::value("6", "text"));
    parameter_map.insert("source".into(), ParameterSlot::image("10", "image"));

    GenerationTemplate {
        id: TEMPLATE_ID,
        base_definition: serde_json::json!({
            "3": {"class_type": "KSampler", "inputs": {"seed": 0, "steps": 20}},
            "6": {"class_type": "CLIPTextEncode", "inputs": {"text": ""}},
            "9": {"class_type": "SaveImage", "inputs": {"filename_prefix": "ComfyUI"}},
            "10": {"class_type": "LoadImage", "inputs": {}}
        }),
        parameter_map,
        cost,
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeLedger {
    pub balances: Mutex<HashMap<DbId, Credits>>,
    pub debits: Mutex<Vec<(DbId, Credits, String)>>,
}

impl FakeLedger {
    pub fn with_balance(user_id: DbId, balance: Credits) -> Self {
        let ledger = Self::default();
        ledger.balances.lock().unwrap().insert(user_id, balance);
        ledger
    }
}

#[async_trait]
impl Ledger for FakeLedger {
    async fn get_balance(&self, user_id: DbId) -> Result<Credits, CoreError> {
        Ok(*self.balances.lock().unwrap().get(&user_id).unwrap_or(&0))
    }

    async fn debit(&self, user_id: DbId, amount: Credits, reason: &str) -> Result<Credits, CoreError> {
        let mut balances = self.balances.lock().unwrap();
        let balance = balances.entry(user_id).or_insert(0);
        if *balance < amount {
            return Err(CoreError::InsufficientFunds {
                required: amount,
                available: *balance,
            });
        }
        *balance -= amount;
        self.debits
            .lock()
            .unwrap()
            .push((user_id, amount, reason.to_string()));
        Ok(*balance)
    }
}

// ---------------------------------------------------------------------------
// Durable storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub key: String,
    pub content_type: String,
    pub size: usize,
}

/// Records uploads; fails any key ending in one of `failing` filenames.
#[derive(Default)]
pub struct RecordingStorage {
    pub uploads: Mutex<Vec<StoredObject>>,
    pub failing: HashSet<String>,
}

impl RecordingStorage {
    pub fn failing_on(filenames: &[&str]) -> Self {
        Self {
            uploads: Mutex::new(Vec::new()),
            failing: filenames.iter().map(|f| f.to_string()).collect(),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .map(|o| o.key.clone())
            .collect()
    }
}

#[async_trait]
impl DurableStorage for RecordingStorage {
    async fn upload(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, CoreError> {
        let filename = key.rsplit('/').next().unwrap_or(key);
        if self.failing.contains(filename) {
            return Err(CoreError::Internal(format!("bucket rejected {key}")));
        }
        self.uploads.lock().unwrap().push(StoredObject {
            key: key.to_string(),
            content_type: content_type.to_string(),
            size: bytes.len(),
        });
        Ok(format!("https://cdn.test/{key}"))
    }
}

// ---------------------------------------------------------------------------
// Output store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryOutputs {
    pub records: Mutex<Vec<OutputRecord>>,
    next_id: AtomicI64,
}

#[async_trait]
impl OutputStore for InMemoryOutputs {
    async fn create(&self, input: CreateOutputRecord) -> Result<OutputRecord, CoreError> {
        let record = OutputRecord {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            owner_id: input.owner_id,
            template_id: input.template_id,
            job_id: input.job_id,
            filename: input.filename,
            content_type: input.content_type,
            storage_key: input.storage_key,
            storage_url: input.storage_url,
            parameters: input.parameters,
            duration_ms: input.duration_ms,
            created_at: Utc::now(),
        };
        self.records.lock().unwrap().push(record.clone());
        Ok(record)
    }
}

// ---------------------------------------------------------------------------
// Live notifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, serde_json::Value)>>,
}

#[async_trait]
impl LiveNotifier for RecordingNotifier {
    async fn notify(&self, topic: &str, payload: serde_json::Value) -> Result<(), CoreError> {
        self.sent.lock().unwrap().push((topic.to_string(), payload));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Handles to every fake behind a [`Services`] bundle.
pub struct Fakes {
    pub templates: Arc<InMemoryTemplates>,
    pub ledger: Arc<FakeLedger>,
    pub storage: Arc<RecordingStorage>,
    pub outputs: Arc<InMemoryOutputs>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Fakes {
    pub fn new(template: GenerationTemplate, balance: Credits) -> Self {
        Self {
            templates: Arc::new(InMemoryTemplates::with(template)),
            ledger: Arc::new(FakeLedger::with_balance(USER_ID, balance)),
            storage: Arc::new(RecordingStorage::default()),
            outputs: Arc::new(InMemoryOutputs::default()),
            notifier: Arc::new(RecordingNotifier::default()),
        }
    }

    pub fn services(&self) -> Services {
        Services {
            templates: self.templates.clone(),
            ledger: self.ledger.clone(),
            storage: self.storage.clone(),
            outputs: self.outputs.clone(),
            notifier: Some(self.notifier.clone()),
        }
    }
}

/// Config pointing at test servers, with short timings.
pub fn test_config(api_url: &str, ws_url: &str) -> OrchestratorConfig {
    OrchestratorConfig {
        ws_url: ws_url.to_string(),
        api_url: api_url.to_string(),
        auth_token: None,
        reconnect_delay: Duration::from_millis(50),
        max_concurrent_completions: 4,
        pending_job_ttl: None,
        shutdown_timeout: Duration::from_secs(2),
    }
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
