//! In-memory stand-ins for the Taskdeck API and the browser
//!
//! Both record every call so tests can assert on ordering, and can be told
//! to fail specific operations.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use taskdeck_common::{EntityKind, Identifier};

use crate::client::ResourceApi;
use crate::error::{E2eError, E2eResult};
use crate::playwright::PageController;
use crate::scenario::Step;

/// One observed call. Deletes are recorded when they start and when they
/// finish so interleaving is visible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    List(EntityKind),
    Create(EntityKind),
    DeleteStarted(EntityKind, Identifier),
    DeleteFinished(EntityKind, Identifier),
}

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    records: BTreeMap<EntityKind, Vec<Value>>,
    calls: Vec<ApiCall>,
    deleted: Vec<(EntityKind, Identifier)>,
    failing_deletes: HashSet<(EntityKind, Identifier)>,
    failing_lists: HashSet<EntityKind>,
}

/// [`ResourceApi`] backed by a map. Ids are assigned from a single counter
/// starting at 1.
#[derive(Debug, Default)]
pub struct InMemoryApi {
    state: Mutex<State>,
}

impl InMemoryApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record as if it already existed on the server
    pub fn seed(&self, kind: EntityKind, mut record: Value) -> Identifier {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = Identifier::Int(state.next_id);
        record["id"] = serde_json::to_value(&id).unwrap_or(Value::Null);
        state.records.entry(kind).or_default().push(record);
        id
    }

    /// Make deletes of this entity fail with a network error
    pub fn fail_delete(&self, kind: EntityKind, id: Identifier) {
        self.state.lock().failing_deletes.insert((kind, id));
    }

    /// Make listings of this kind fail with a 503
    pub fn fail_list(&self, kind: EntityKind) {
        self.state.lock().failing_lists.insert(kind);
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.state.lock().calls.clone()
    }

    /// Ids successfully deleted, in completion order
    pub fn deleted(&self, kind: EntityKind) -> Vec<Identifier> {
        self.state
            .lock()
            .deleted
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, id)| id.clone())
            .collect()
    }

    /// Records currently stored for `kind`
    pub fn records(&self, kind: EntityKind) -> Vec<Value> {
        self.state.lock().records.get(&kind).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ResourceApi for InMemoryApi {
    async fn list(&self, kind: EntityKind) -> E2eResult<Vec<Value>> {
        let mut state = self.state.lock();
        state.calls.push(ApiCall::List(kind));
        if state.failing_lists.contains(&kind) {
            return Err(E2eError::ApiRequest {
                method: "GET".into(),
                endpoint: kind.endpoint().into(),
                status: 503,
                status_text: "Service Unavailable".into(),
                body: Value::Null,
            });
        }
        Ok(state.records.get(&kind).cloned().unwrap_or_default())
    }

    async fn create(&self, kind: EntityKind, body: Value) -> E2eResult<Value> {
        self.state.lock().calls.push(ApiCall::Create(kind));
        let id = self.seed(kind, body);
        let state = self.state.lock();
        let created = state
            .records
            .get(&kind)
            .and_then(|records| {
                records
                    .iter()
                    .find(|r| Identifier::from_record(r).as_ref() == Some(&id))
            })
            .cloned()
            .unwrap_or(Value::Null);
        Ok(created)
    }

    async fn delete(&self, kind: EntityKind, id: &Identifier) -> E2eResult<()> {
        self.state
            .lock()
            .calls
            .push(ApiCall::DeleteStarted(kind, id.clone()));

        // Let concurrently issued deletes interleave
        tokio::task::yield_now().await;

        let mut state = self.state.lock();
        state.calls.push(ApiCall::DeleteFinished(kind, id.clone()));

        if state.failing_deletes.contains(&(kind, id.clone())) {
            return Err(E2eError::Network(format!("connection reset deleting {} {}", kind, id)));
        }

        let records = state.records.entry(kind).or_default();
        let before = records.len();
        records.retain(|r| Identifier::from_record(r).as_ref() != Some(id));

        if records.len() == before {
            return Err(E2eError::ApiRequest {
                method: "DELETE".into(),
                endpoint: kind.item_endpoint(id),
                status: 404,
                status_text: "Not Found".into(),
                body: Value::Null,
            });
        }

        state.deleted.push((kind, id.clone()));
        Ok(())
    }
}

#[derive(Debug, Default)]
struct PageState {
    steps: Vec<Step>,
    clears: usize,
    fail_clear: bool,
    failures: HashMap<String, u32>,
}

/// [`PageController`] that records steps instead of driving a browser
#[derive(Debug, Default)]
pub struct RecordingPage {
    state: Mutex<PageState>,
}

impl RecordingPage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` runs of the step named `step` (see [`Step::name`])
    pub fn fail_step(&self, step: impl Into<String>, times: u32) {
        self.state.lock().failures.insert(step.into(), times);
    }

    pub fn fail_clear(&self) {
        self.state.lock().fail_clear = true;
    }

    /// Every step attempted, failed attempts included
    pub fn steps(&self) -> Vec<Step> {
        self.state.lock().steps.clone()
    }

    pub fn clears(&self) -> usize {
        self.state.lock().clears
    }
}

#[async_trait]
impl PageController for RecordingPage {
    async fn run_step(&self, step: &Step) -> E2eResult<()> {
        let mut state = self.state.lock();
        state.steps.push(step.clone());

        let name = step.name();
        if let Some(remaining) = state.failures.get_mut(&name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(E2eError::StepFailed {
                    step: name,
                    reason: "injected failure".to_string(),
                });
            }
        }
        Ok(())
    }

    async fn clear_browser_state(&self) -> E2eResult<()> {
        let mut state = self.state.lock();
        state.clears += 1;
        if state.fail_clear {
            return Err(E2eError::Playwright("browser already closed".to_string()));
        }
        Ok(())
    }
}
