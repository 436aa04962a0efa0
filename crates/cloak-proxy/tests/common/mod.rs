//! In-memory driver and crypto engine shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use cloak_core::{
    DatasourceConfig, EngineConfig, FailureMode, InstanceIdentity, InterceptionConfig,
    PolicyAttributes, PolicyMapping,
};
use cloak_crypto::{CryptoClient, CryptoError, EngineOp, EngineRequest, EngineResponse, EngineTransport};
use cloak_policy::PolicyCache;
use cloak_proxy::{
    ColumnMetadata, Connection, DriverError, EncryptingConnection, InterceptionContext,
    PreparedStatement, ResultSet, Row, SqlValue,
};
use cloak_runtime::{IdentityRenewal, RuntimeError};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub fn seal(text: &str, policy: &str) -> String {
    let mut bytes = vec![0u8; 12];
    bytes.extend_from_slice(text.as_bytes());
    bytes.extend_from_slice(&[0u8; 16]);
    format!("gcm:{policy}:{}", STANDARD.encode(bytes))
}

fn open(value: &str) -> String {
    let payload = value.splitn(3, ':').nth(2).unwrap();
    let bytes = STANDARD.decode(payload).unwrap();
    String::from_utf8(bytes[12..bytes.len() - 16].to_vec()).unwrap()
}

#[derive(Default)]
pub struct FakeEngine {
    pub calls: Mutex<Vec<EngineOp>>,
    pub down: AtomicBool,
    pub never_encrypted: AtomicBool,
}

impl FakeEngine {
    pub fn calls(&self) -> Vec<EngineOp> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EngineTransport for FakeEngine {
    async fn call(
        &self,
        _base_url: &str,
        op: EngineOp,
        request: &EngineRequest,
    ) -> Result<EngineResponse, CryptoError> {
        self.calls.lock().unwrap().push(op);
        if self.down.load(Ordering::SeqCst) {
            return Err(CryptoError::Engine {
                status: 503,
                code: None,
                message: "engine unavailable".into(),
            });
        }
        let decrypting = matches!(op, EngineOp::Decrypt | EngineOp::DecryptBatch);
        if decrypting && self.never_encrypted.load(Ordering::SeqCst) {
            return Ok(EngineResponse::not_encrypted());
        }
        let transform = |v: &String| {
            if decrypting {
                open(v)
            } else {
                seal(v, &request.policy_name)
            }
        };
        Ok(match (&request.data, &request.items) {
            (Some(data), _) => EngineResponse::ok(transform(data)),
            (None, Some(items)) => EngineResponse {
                success: true,
                items: Some(items.iter().map(|v| Some(transform(v))).collect()),
                ..Default::default()
            },
            _ => EngineResponse::default(),
        })
    }
}

/// One statement execution as the database saw it.
#[derive(Debug, Clone)]
pub struct Executed {
    pub sql: String,
    pub params: BTreeMap<usize, SqlValue>,
}

/// Identity pinned to one datasource for the life of the test.
pub struct PinnedIdentity(pub InstanceIdentity);

#[async_trait]
impl IdentityRenewal for PinnedIdentity {
    fn current(&self) -> Option<InstanceIdentity> {
        Some(self.0.clone())
    }

    async fn renew(&self) -> Result<InstanceIdentity, RuntimeError> {
        Ok(self.0.clone())
    }

    fn adopt_hub_id(&self, _hub_id: &str) -> Result<InstanceIdentity, RuntimeError> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
pub struct MemoryDatabase {
    pub executed: Mutex<Vec<Executed>>,
    /// Text values longer than this are rejected as too long.
    pub max_text_len: Mutex<Option<usize>>,
    pub results: Mutex<VecDeque<(Vec<ColumnMetadata>, Vec<Row>)>>,
}

impl MemoryDatabase {
    pub fn limit_text(&self, len: usize) {
        *self.max_text_len.lock().unwrap() = Some(len);
    }

    pub fn script_result(&self, columns: Vec<ColumnMetadata>, rows: Vec<Row>) {
        self.results.lock().unwrap().push_back((columns, rows));
    }

    pub fn executed(&self) -> Vec<Executed> {
        self.executed.lock().unwrap().clone()
    }

    pub fn last_params(&self) -> BTreeMap<usize, SqlValue> {
        self.executed().last().unwrap().params.clone()
    }
}

pub struct MemoryConnection(pub Arc<MemoryDatabase>);

#[async_trait]
impl Connection for MemoryConnection {
    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>, DriverError> {
        Ok(Box::new(MemoryStatement {
            db: Arc::clone(&self.0),
            sql: sql.to_string(),
            params: BTreeMap::new(),
        }))
    }

    async fn close(&self) -> Result<(), DriverError> {
        Ok(())
    }
}

struct MemoryStatement {
    db: Arc<MemoryDatabase>,
    sql: String,
    params: BTreeMap<usize, SqlValue>,
}

impl MemoryStatement {
    fn record(&self) -> usize {
        let mut executed = self.db.executed.lock().unwrap();
        executed.push(Executed {
            sql: self.sql.clone(),
            params: self.params.clone(),
        });
        executed.len()
    }
}

#[async_trait]
impl PreparedStatement for MemoryStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    async fn bind(&mut self, position: usize, value: SqlValue) -> Result<(), DriverError> {
        if position == 0 {
            return Err(DriverError::ParameterIndex(position));
        }
        self.params.insert(position, value);
        Ok(())
    }

    fn clear_parameters(&mut self) {
        self.params.clear();
    }

    async fn execute_update(&mut self) -> Result<u64, DriverError> {
        let execution = self.record();
        let limit = *self.db.max_text_len.lock().unwrap();
        if let Some(limit) = limit {
            let too_long = self
                .params
                .values()
                .filter_map(SqlValue::as_text)
                .any(|t| t.len() > limit);
            if too_long {
                return Err(DriverError::ValueTooLong(format!(
                    "execution {execution}: value exceeds {limit} characters"
                )));
            }
        }
        Ok(1)
    }

    async fn execute_query(&mut self) -> Result<Box<dyn ResultSet>, DriverError> {
        self.record();
        let (columns, rows) = self
            .db
            .results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        Ok(Box::new(MemoryResultSet {
            columns,
            rows: rows.into(),
        }))
    }
}

struct MemoryResultSet {
    columns: Vec<ColumnMetadata>,
    rows: VecDeque<Row>,
}

#[async_trait]
impl ResultSet for MemoryResultSet {
    fn metadata(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    async fn next_row(&mut self) -> Result<Option<Row>, DriverError> {
        Ok(self.rows.pop_front())
    }
}

pub struct Harness {
    pub db: Arc<MemoryDatabase>,
    pub engine: Arc<FakeEngine>,
    pub policies: Arc<PolicyCache>,
    pub connection: EncryptingConnection,
}

impl Harness {
    pub fn new(failure_mode: FailureMode) -> Self {
        Self::build(failure_mode, |context| context)
    }

    /// An instance registered as `datasource_id` whose connection defaults
    /// to the configured schema.
    pub fn with_identity(failure_mode: FailureMode, datasource_id: &str) -> Self {
        let metadata = DatasourceConfig::default().metadata();
        let identity = InstanceIdentity::new("hub-1", Some(datasource_id.into()), &metadata);
        Self::build(failure_mode, move |context| {
            context
                .with_identity(Arc::new(PinnedIdentity(identity)))
                .with_default_schema(metadata.schema.clone())
        })
    }

    fn build(
        failure_mode: FailureMode,
        scope: impl FnOnce(InterceptionContext) -> InterceptionContext,
    ) -> Self {
        let db = Arc::new(MemoryDatabase::default());
        let engine = Arc::new(FakeEngine::default());
        let policies = Arc::new(PolicyCache::in_memory());
        let crypto = Arc::new(CryptoClient::new(
            engine.clone(),
            &EngineConfig {
                fallback_url: Some("http://engine:9000".into()),
                ..Default::default()
            },
        ));
        let config = InterceptionConfig {
            failure_mode,
            ..Default::default()
        };
        let context = Arc::new(scope(InterceptionContext::new(&config, policies.clone(), crypto)));
        let connection = EncryptingConnection::new(Arc::new(MemoryConnection(db.clone())), context);
        Self {
            db,
            engine,
            policies,
            connection,
        }
    }

    /// Protect `key` with `policy`, deterministic or not.
    pub fn protect(&self, entries: &[(&str, &str, bool)], version: i64) {
        let mappings = entries
            .iter()
            .map(|(key, policy, _)| PolicyMapping::new(*key, *policy))
            .collect();
        let attributes: Vec<PolicyAttributes> = entries
            .iter()
            .map(|(_, policy, deterministic)| PolicyAttributes {
                policy_name: policy.to_string(),
                deterministic: *deterministic,
                algorithm: None,
            })
            .collect();
        self.connection
            .context()
            .crypto()
            .set_policy_attributes(attributes.clone());
        self.policies
            .refresh(mappings, attributes, Some(version))
            .unwrap();
    }
}
