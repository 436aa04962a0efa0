//! Hub API: wire types, the [`HubApi`] seam and its HTTP client.

use crate::error::HubError;
use async_trait::async_trait;
use cloak_core::{
    EndpointInfo, HubConfig, PolicyAttributes, PolicyMapping, SchemaColumnRecord, Version,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Header carrying the authoritative version on a 304 answer.
pub const CURRENT_VERSION_HEADER: &str = "X-Current-Version";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub vendor: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub schema: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version: Option<Version>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub hub_id: String,
    #[serde(default)]
    pub datasource_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRequest {
    pub instance_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version: Option<Version>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datasource_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponse {
    #[serde(default)]
    pub has_change: bool,
    #[serde(default)]
    pub reregistered: bool,
    #[serde(default)]
    pub hub_id: Option<String>,
}

/// Result of a version check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// 304, or 200 without a change. Carries `X-Current-Version` when present.
    Unchanged { current_version: Option<Version> },
    /// 200 with a change. `reregistered_hub_id` is set when the Hub moved
    /// this instance to a new id.
    Changed { reregistered_hub_id: Option<String> },
    /// 404: the Hub does not know this instance.
    NotFound,
}

impl CheckOutcome {
    fn from_response(response: CheckResponse) -> Self {
        let reregistered_hub_id = response.hub_id.filter(|_| response.reregistered);
        if response.has_change || reregistered_hub_id.is_some() {
            CheckOutcome::Changed {
                reregistered_hub_id,
            }
        } else {
            CheckOutcome::Unchanged {
                current_version: None,
            }
        }
    }
}

/// Full policy snapshot as served by `GET /mappings`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySnapshotResponse {
    #[serde(default)]
    pub mappings: Vec<PolicyMapping>,
    #[serde(default)]
    pub policies: Vec<PolicyAttributes>,
    #[serde(default)]
    pub version: Option<Version>,
    #[serde(default)]
    pub endpoint: Option<EndpointInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSyncRequest {
    pub instance_id: String,
    pub hub_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datasource_id: Option<String>,
    pub schemas: Vec<SchemaColumnRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSyncResponse {
    #[serde(default)]
    pub received_hub_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotQuery<'a> {
    instance_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<Version>,
}

/// The Hub operations the runtime depends on.
#[async_trait]
pub trait HubApi: Send + Sync {
    /// Register a datasource; yields the instance and datasource ids together.
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, HubError>;

    async fn check_mappings(&self, request: &CheckRequest) -> Result<CheckOutcome, HubError>;

    async fn fetch_policies(
        &self,
        hub_id: &str,
        version: Option<Version>,
    ) -> Result<PolicySnapshotResponse, HubError>;

    async fn sync_schema(&self, request: &SchemaSyncRequest)
    -> Result<SchemaSyncResponse, HubError>;
}

/// reqwest implementation of [`HubApi`].
#[derive(Debug, Clone)]
pub struct HttpHubClient {
    client: Client,
    config: HubConfig,
}

impl HttpHubClient {
    pub fn new(config: &HubConfig) -> Result<Self, HubError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.read_timeout())
            .build()?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, HubError> {
        if !self.config.enabled {
            return Err(HubError::Disabled);
        }
        Ok(request.send().await?)
    }

    async fn json_or_error<T: DeserializeOwned>(response: Response) -> Result<T, HubError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(HubError::NotFound);
        }
        let body = response.text().await?;
        if !status.is_success() {
            return Err(HubError::Status {
                status: status.as_u16(),
                message: body,
            });
        }
        if body.trim().is_empty() {
            return Ok(serde_json::from_str("{}")?);
        }
        Ok(serde_json::from_str(&body)?)
    }
}

fn current_version_header(response: &Response) -> Option<Version> {
    response
        .headers()
        .get(CURRENT_VERSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<Version>().ok())
}

#[async_trait]
impl HubApi for HttpHubClient {
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, HubError> {
        let url = self.config.url("/instances/register");
        let response = self.send(self.client.post(&url).json(request)).await?;
        Self::json_or_error(response).await
    }

    async fn check_mappings(&self, request: &CheckRequest) -> Result<CheckOutcome, HubError> {
        let url = self.config.url("/mappings/check");
        let response = self.send(self.client.get(&url).query(request)).await?;

        match response.status() {
            StatusCode::NOT_MODIFIED => Ok(CheckOutcome::Unchanged {
                current_version: current_version_header(&response),
            }),
            StatusCode::NOT_FOUND => Ok(CheckOutcome::NotFound),
            _ => {
                let header_version = current_version_header(&response);
                let body: CheckResponse = Self::json_or_error(response).await?;
                Ok(match CheckOutcome::from_response(body) {
                    CheckOutcome::Unchanged { .. } => CheckOutcome::Unchanged {
                        current_version: header_version,
                    },
                    other => other,
                })
            }
        }
    }

    async fn fetch_policies(
        &self,
        hub_id: &str,
        version: Option<Version>,
    ) -> Result<PolicySnapshotResponse, HubError> {
        let url = self.config.url("/mappings");
        let query = SnapshotQuery {
            instance_id: hub_id,
            version,
        };
        let response = self.send(self.client.get(&url).query(&query)).await?;
        Self::json_or_error(response).await
    }

    async fn sync_schema(
        &self,
        request: &SchemaSyncRequest,
    ) -> Result<SchemaSyncResponse, HubError> {
        let url = self.config.url("/schemas/sync");
        let response = self.send(self.client.post(&url).json(request)).await?;
        Self::json_or_error(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_response_without_change_is_unchanged() {
        let outcome = CheckOutcome::from_response(CheckResponse::default());
        assert_eq!(
            outcome,
            CheckOutcome::Unchanged {
                current_version: None
            }
        );
    }

    #[test]
    fn reregistration_is_reported_with_the_new_id() {
        let outcome = CheckOutcome::from_response(CheckResponse {
            has_change: false,
            reregistered: true,
            hub_id: Some("hub-9".into()),
        });
        assert_eq!(
            outcome,
            CheckOutcome::Changed {
                reregistered_hub_id: Some("hub-9".into())
            }
        );
    }

    #[test]
    fn hub_id_without_reregistered_flag_is_ignored() {
        let outcome = CheckOutcome::from_response(CheckResponse {
            has_change: true,
            reregistered: false,
            hub_id: Some("hub-1".into()),
        });
        assert_eq!(
            outcome,
            CheckOutcome::Changed {
                reregistered_hub_id: None
            }
        );
    }

    #[test]
    fn snapshot_response_parses_hub_payload() {
        let json = r#"{
            "mappings": [{"key": "public.users.email", "policyName": "pii"}],
            "policies": [{"policyName": "pii", "deterministic": true}],
            "version": 4,
            "endpoint": {"engineUrl": "http://engine:9000"}
        }"#;
        let snapshot: PolicySnapshotResponse = serde_json::from_str(json).unwrap();

        assert_eq!(snapshot.version, Some(4));
        assert!(snapshot.mappings[0].enabled);
        assert!(snapshot.policies[0].deterministic);
        assert_eq!(snapshot.endpoint.unwrap().engine_url, "http://engine:9000");
    }

    mod transport {
        use super::*;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;
        use tokio::task::JoinHandle;

        /// Serve one canned HTTP answer; the handle yields the request head.
        async fn serve_once(response: &'static str) -> (HttpHubClient, JoinHandle<String>) {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let server = tokio::spawn(async move {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                loop {
                    let n = socket.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                    if request_complete(&request) {
                        break;
                    }
                }
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
                String::from_utf8_lossy(&request).into_owned()
            });
            let config = HubConfig {
                base_url: format!("http://{addr}"),
                ..Default::default()
            };
            (HttpHubClient::new(&config).unwrap(), server)
        }

        /// Head received and, when announced, the whole body too.
        fn request_complete(request: &[u8]) -> bool {
            let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
                return false;
            };
            let head = String::from_utf8_lossy(&request[..end]).to_ascii_lowercase();
            let body_len = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            request.len() >= end + 4 + body_len
        }

        fn check_request() -> CheckRequest {
            CheckRequest {
                instance_id: "hub-1".into(),
                current_version: Some(3),
                alias: None,
                datasource_id: Some("ds-1".into()),
            }
        }

        #[tokio::test]
        async fn not_modified_carries_current_version_header() {
            let (client, server) = serve_once(
                "HTTP/1.1 304 Not Modified\r\nX-Current-Version: 7\r\nConnection: close\r\n\r\n",
            )
            .await;

            let outcome = client.check_mappings(&check_request()).await.unwrap();
            assert_eq!(
                outcome,
                CheckOutcome::Unchanged {
                    current_version: Some(7)
                }
            );

            let head = server.await.unwrap();
            assert!(head.starts_with("GET /api/v1/mappings/check?"), "{head}");
            assert!(head.contains("instanceId=hub-1"), "{head}");
            assert!(head.contains("currentVersion=3"), "{head}");
        }

        #[tokio::test]
        async fn unknown_instance_is_not_found() {
            let (client, server) = serve_once(
                "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            )
            .await;

            let outcome = client.check_mappings(&check_request()).await.unwrap();
            assert_eq!(outcome, CheckOutcome::NotFound);
            server.await.unwrap();
        }

        #[tokio::test]
        async fn not_found_on_fetch_is_an_error() {
            let (client, server) = serve_once(
                "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            )
            .await;

            let err = client.fetch_policies("hub-1", None).await.unwrap_err();
            assert!(err.is_not_found());
            server.await.unwrap();
        }

        #[tokio::test]
        async fn empty_body_reads_as_defaults() {
            let (client, server) = serve_once(
                "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            )
            .await;

            let request = SchemaSyncRequest {
                instance_id: "hub-1".into(),
                hub_id: "hub-1".into(),
                datasource_id: None,
                schemas: vec![],
            };
            let response = client.sync_schema(&request).await.unwrap();
            assert_eq!(response, SchemaSyncResponse::default());

            let head = server.await.unwrap();
            assert!(head.starts_with("POST /api/v1/schemas/sync"), "{head}");
        }

        #[tokio::test]
        async fn empty_check_answer_is_unchanged_with_header_version() {
            let (client, server) = serve_once(
                "HTTP/1.1 200 OK\r\nX-Current-Version: 12\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            )
            .await;

            let outcome = client.check_mappings(&check_request()).await.unwrap();
            assert_eq!(
                outcome,
                CheckOutcome::Unchanged {
                    current_version: Some(12)
                }
            );
            server.await.unwrap();
        }

        #[tokio::test]
        async fn server_error_keeps_status_and_body() {
            let (client, server) = serve_once(
                "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 11\r\nConnection: close\r\n\r\nmaintenance",
            )
            .await;

            let err = client.fetch_policies("hub-1", Some(2)).await.unwrap_err();
            match err {
                HubError::Status { status, message } => {
                    assert_eq!(status, 503);
                    assert_eq!(message, "maintenance");
                }
                other => panic!("unexpected error: {other}"),
            }
            server.await.unwrap();
        }

        #[tokio::test]
        async fn disabled_hub_is_never_contacted() {
            let client = HttpHubClient::new(&HubConfig {
                enabled: false,
                ..Default::default()
            })
            .unwrap();
            let err = client.check_mappings(&check_request()).await.unwrap_err();
            assert!(matches!(err, HubError::Disabled));
        }
    }
}
