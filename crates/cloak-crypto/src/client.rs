//! The crypto client used by the interceptor.

use crate::envelope::EnvelopeDetector;
use crate::error::CryptoError;
use crate::transport::{EngineOp, EngineRequest, EngineResponse, EngineTransport, HttpEngineTransport};
use cloak_core::{EndpointInfo, EngineConfig, PolicyAttributes};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Encrypts and decrypts single values or batches through the engine.
///
/// The engine location comes from the Hub ([`CryptoClient::apply_endpoint`])
/// and falls back to `engine.fallback_url` until one has been delivered.
pub struct CryptoClient {
    transport: Arc<dyn EngineTransport>,
    endpoint: RwLock<Option<EndpointInfo>>,
    fallback_url: Option<String>,
    detector: EnvelopeDetector,
    attributes: RwLock<HashMap<String, PolicyAttributes>>,
}

impl CryptoClient {
    pub fn new(transport: Arc<dyn EngineTransport>, config: &EngineConfig) -> Self {
        Self {
            transport,
            endpoint: RwLock::new(None),
            fallback_url: config.fallback_url.clone(),
            detector: EnvelopeDetector::from_config(config),
            attributes: RwLock::new(HashMap::new()),
        }
    }

    /// Client over the reqwest transport.
    pub fn http(config: &EngineConfig) -> Result<Self, CryptoError> {
        Ok(Self::new(Arc::new(HttpEngineTransport::new(config)?), config))
    }

    /// Point subsequent calls at a new engine endpoint.
    pub fn apply_endpoint(&self, info: EndpointInfo) {
        let mut guard = self.endpoint.write().unwrap_or_else(|p| p.into_inner());
        let changed = guard.as_ref().map(|e| e.engine_url.as_str()) != Some(info.engine_url.as_str());
        if changed {
            tracing::info!(engine_url = %info.engine_url, version = ?info.version, "Crypto engine endpoint applied");
        }
        *guard = Some(info);
    }

    pub fn endpoint(&self) -> Option<EndpointInfo> {
        self.endpoint.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Replace the cached per-policy attributes.
    pub fn set_policy_attributes(&self, attributes: impl IntoIterator<Item = PolicyAttributes>) {
        let map = attributes
            .into_iter()
            .map(|a| (a.policy_name.clone(), a))
            .collect();
        *self.attributes.write().unwrap_or_else(|p| p.into_inner()) = map;
    }

    /// Whether `policy` produces searchable (deterministic) ciphertext.
    pub fn is_deterministic(&self, policy: &str) -> bool {
        self.attributes
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(policy)
            .is_some_and(|a| a.deterministic)
    }

    pub fn is_encrypted_data(&self, value: &str) -> bool {
        self.detector.is_encrypted(value)
    }

    pub fn detector(&self) -> &EnvelopeDetector {
        &self.detector
    }

    pub async fn encrypt(&self, plaintext: &str, policy: &str) -> Result<String, CryptoError> {
        let request = EngineRequest::single(plaintext, policy, None);
        let response = self.call(EngineOp::Encrypt, &request).await?;
        expect_success(&response)?;
        response
            .data
            .ok_or_else(|| CryptoError::InvalidResponse("encrypt response without data".into()))
    }

    /// Encrypt a filter value so it can be compared against stored ciphertext.
    ///
    /// Non-deterministic policies cannot be searched; the plaintext is
    /// returned unchanged without contacting the engine.
    pub async fn encrypt_for_search(
        &self,
        plaintext: &str,
        policy: &str,
    ) -> Result<String, CryptoError> {
        if !self.is_deterministic(policy) {
            return Ok(plaintext.to_string());
        }
        self.encrypt(plaintext, policy).await
    }

    /// Decrypt a stored value. Values that are not ciphertext come back
    /// unchanged, as do values the engine reports as never encrypted.
    pub async fn decrypt(
        &self,
        ciphertext: &str,
        policy: &str,
        mask_policy: Option<&str>,
    ) -> Result<String, CryptoError> {
        if !self.detector.is_encrypted(ciphertext) {
            return Ok(ciphertext.to_string());
        }

        let request = EngineRequest::single(ciphertext, policy, mask_policy);
        let response = self.call(EngineOp::Decrypt, &request).await?;
        if response.is_not_encrypted() {
            return Ok(ciphertext.to_string());
        }
        expect_success(&response)?;
        response
            .data
            .ok_or_else(|| CryptoError::InvalidResponse("decrypt response without data".into()))
    }

    pub async fn encrypt_batch(
        &self,
        plaintexts: &[String],
        policy: &str,
    ) -> Result<Vec<String>, CryptoError> {
        if plaintexts.is_empty() {
            return Ok(Vec::new());
        }
        let request = EngineRequest::batch(plaintexts.to_vec(), policy, None);
        let response = self.call(EngineOp::EncryptBatch, &request).await?;
        expect_success(&response)?;
        let items = batch_items(response, plaintexts.len())?;
        Ok(items
            .into_iter()
            .zip(plaintexts)
            .map(|(item, original)| item.unwrap_or_else(|| original.clone()))
            .collect())
    }

    /// Decrypt many values of one policy in a single call. Only values that
    /// look like ciphertext are sent; the rest are returned as they are.
    pub async fn decrypt_batch(
        &self,
        values: &[String],
        policy: &str,
        mask_policy: Option<&str>,
    ) -> Result<Vec<String>, CryptoError> {
        let encrypted: Vec<usize> = values
            .iter()
            .enumerate()
            .filter(|(_, v)| self.detector.is_encrypted(v))
            .map(|(i, _)| i)
            .collect();
        if encrypted.is_empty() {
            return Ok(values.to_vec());
        }

        let items: Vec<String> = encrypted.iter().map(|i| values[*i].clone()).collect();
        let request = EngineRequest::batch(items, policy, mask_policy);
        let response = self.call(EngineOp::DecryptBatch, &request).await?;
        if response.is_not_encrypted() {
            return Ok(values.to_vec());
        }
        expect_success(&response)?;

        let decrypted = batch_items(response, encrypted.len())?;
        let mut out = values.to_vec();
        for (index, item) in encrypted.into_iter().zip(decrypted) {
            if let Some(plain) = item {
                out[index] = plain;
            }
        }
        Ok(out)
    }

    fn base_url(&self) -> Result<String, CryptoError> {
        let guard = self.endpoint.read().unwrap_or_else(|p| p.into_inner());
        guard
            .as_ref()
            .map(|e| e.engine_url.clone())
            .filter(|u| !u.is_empty())
            .or_else(|| self.fallback_url.clone())
            .ok_or(CryptoError::NoEndpoint)
    }

    async fn call(
        &self,
        op: EngineOp,
        request: &EngineRequest,
    ) -> Result<EngineResponse, CryptoError> {
        let base_url = self.base_url()?;
        self.transport.call(&base_url, op, request).await
    }
}

fn expect_success(response: &EngineResponse) -> Result<(), CryptoError> {
    if response.success {
        return Ok(());
    }
    Err(CryptoError::Engine {
        status: 200,
        code: response.code.clone(),
        message: response
            .message
            .clone()
            .unwrap_or_else(|| "engine reported failure".to_string()),
    })
}

fn batch_items(response: EngineResponse, expected: usize) -> Result<Vec<Option<String>>, CryptoError> {
    let items = response
        .items
        .ok_or_else(|| CryptoError::InvalidResponse("batch response without items".into()))?;
    if items.len() != expected {
        return Err(CryptoError::InvalidResponse(format!(
            "batch response has {} items, expected {}",
            items.len(),
            expected
        )));
    }
    Ok(items)
}
