//! In-memory Hub and schema source for unit tests.

use crate::error::HubError;
use crate::hub::{
    CheckOutcome, CheckRequest, HubApi, PolicySnapshotResponse, RegisterRequest,
    RegisterResponse, SchemaSyncRequest, SchemaSyncResponse,
};
use crate::schema::SchemaSource;
use async_trait::async_trait;
use cloak_core::{SchemaColumnRecord, Version};
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
pub struct ScriptedHub {
    pub unreachable: AtomicBool,
    pub register_calls: Mutex<Vec<RegisterRequest>>,
    pub check_calls: Mutex<Vec<CheckRequest>>,
    pub fetch_calls: Mutex<Vec<(String, Option<Version>)>>,
    pub sync_calls: Mutex<Vec<SchemaSyncRequest>>,
    /// Answers for successive checks; `Unchanged` without a version once drained.
    pub checks: Mutex<VecDeque<CheckOutcome>>,
    pub snapshot: Mutex<PolicySnapshotResponse>,
    /// Ids the Hub has forgotten: schema sync answers 404 for them.
    pub forgotten: Mutex<HashSet<String>>,
    /// Hub id to acknowledge schema pushes under, when set.
    pub reassign_to: Mutex<Option<String>>,
    issued: AtomicUsize,
}

impl ScriptedHub {
    pub fn script_checks(&self, outcomes: impl IntoIterator<Item = CheckOutcome>) {
        self.checks.lock().unwrap().extend(outcomes);
    }

    pub fn forget(&self, hub_id: &str) {
        self.forgotten.lock().unwrap().insert(hub_id.to_string());
    }

    pub fn registrations(&self) -> usize {
        self.register_calls.lock().unwrap().len()
    }

    fn reachable(&self) -> Result<(), HubError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(HubError::Status {
                status: 503,
                message: "hub unreachable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl HubApi for ScriptedHub {
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, HubError> {
        self.reachable()?;
        self.register_calls.lock().unwrap().push(request.clone());
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(RegisterResponse {
            hub_id: format!("hub-{n}"),
            datasource_id: Some(format!("ds-{n}")),
        })
    }

    async fn check_mappings(&self, request: &CheckRequest) -> Result<CheckOutcome, HubError> {
        self.reachable()?;
        self.check_calls.lock().unwrap().push(request.clone());
        Ok(self
            .checks
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(CheckOutcome::Unchanged {
                current_version: None,
            }))
    }

    async fn fetch_policies(
        &self,
        hub_id: &str,
        version: Option<Version>,
    ) -> Result<PolicySnapshotResponse, HubError> {
        self.reachable()?;
        self.fetch_calls
            .lock()
            .unwrap()
            .push((hub_id.to_string(), version));
        Ok(self.snapshot.lock().unwrap().clone())
    }

    async fn sync_schema(
        &self,
        request: &SchemaSyncRequest,
    ) -> Result<SchemaSyncResponse, HubError> {
        self.reachable()?;
        self.sync_calls.lock().unwrap().push(request.clone());
        if self.forgotten.lock().unwrap().contains(&request.hub_id) {
            return Err(HubError::NotFound);
        }
        let received = self
            .reassign_to
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| request.hub_id.clone());
        Ok(SchemaSyncResponse {
            received_hub_id: Some(received),
        })
    }
}

/// Schema source returning a fixed column list.
pub struct StaticSchema {
    pub records: Vec<SchemaColumnRecord>,
    pub calls: AtomicUsize,
}

impl StaticSchema {
    pub fn new(records: Vec<SchemaColumnRecord>) -> Self {
        Self {
            records,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SchemaSource for StaticSchema {
    async fn collect(&self) -> anyhow::Result<Vec<SchemaColumnRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.clone())
    }
}
