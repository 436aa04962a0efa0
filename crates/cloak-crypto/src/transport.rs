//! Engine wire format and HTTP transport.

use crate::error::CryptoError;
use async_trait::async_trait;
use cloak_core::EngineConfig;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

/// Engine answer code meaning "this value was never encrypted".
pub const NOT_ENCRYPTED: &str = "NOT_ENCRYPTED";

/// Engine operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineOp {
    Encrypt,
    EncryptBatch,
    Decrypt,
    DecryptBatch,
}

impl EngineOp {
    pub fn path(&self) -> &'static str {
        match self {
            EngineOp::Encrypt => "/encrypt",
            EngineOp::EncryptBatch => "/encrypt/batch",
            EngineOp::Decrypt => "/decrypt",
            EngineOp::DecryptBatch => "/decrypt/batch",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<String>>,
    pub policy_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_policy_name: Option<String>,
}

impl EngineRequest {
    pub fn single(data: &str, policy_name: &str, mask_policy_name: Option<&str>) -> Self {
        Self {
            data: Some(data.to_string()),
            items: None,
            policy_name: policy_name.to_string(),
            mask_policy_name: mask_policy_name.map(str::to_string),
        }
    }

    pub fn batch(items: Vec<String>, policy_name: &str, mask_policy_name: Option<&str>) -> Self {
        Self {
            data: None,
            items: Some(items),
            policy_name: policy_name.to_string(),
            mask_policy_name: mask_policy_name.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<String>,
    /// Batch results; `null` entries mean "keep the input".
    #[serde(default)]
    pub items: Option<Vec<Option<String>>>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

impl EngineResponse {
    pub fn is_not_encrypted(&self) -> bool {
        self.code.as_deref() == Some(NOT_ENCRYPTED)
    }

    pub fn ok(data: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data.into()),
            ..Default::default()
        }
    }

    pub fn not_encrypted() -> Self {
        Self {
            success: false,
            code: Some(NOT_ENCRYPTED.to_string()),
            message: Some("value is not encrypted".to_string()),
            ..Default::default()
        }
    }
}

/// How requests reach the engine.
#[async_trait]
pub trait EngineTransport: Send + Sync {
    async fn call(
        &self,
        base_url: &str,
        op: EngineOp,
        request: &EngineRequest,
    ) -> Result<EngineResponse, CryptoError>;
}

/// reqwest-backed engine transport with connect and read timeouts.
#[derive(Debug, Clone)]
pub struct HttpEngineTransport {
    client: Client,
}

impl HttpEngineTransport {
    pub fn new(config: &EngineConfig) -> Result<Self, CryptoError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.read_timeout())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl EngineTransport for HttpEngineTransport {
    async fn call(
        &self,
        base_url: &str,
        op: EngineOp,
        request: &EngineRequest,
    ) -> Result<EngineResponse, CryptoError> {
        let url = format!("{}{}", base_url.trim_end_matches('/'), op.path());
        let response = self.client.post(&url).json(request).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            return Ok(serde_json::from_str(&body)?);
        }

        // 422 carries a structured answer, e.g. NOT_ENCRYPTED
        let parsed = serde_json::from_str::<EngineResponse>(&body).ok();
        if status == StatusCode::UNPROCESSABLE_ENTITY
            && let Some(answer) = &parsed
            && answer.is_not_encrypted()
        {
            return Ok(answer.clone());
        }

        Err(CryptoError::Engine {
            status: status.as_u16(),
            code: parsed.as_ref().and_then(|p| p.code.clone()),
            message: parsed.and_then(|p| p.message).unwrap_or(body),
        })
    }
}
