//! HTTP implementation of [`PlatformClient`] against a worker's
//! control endpoint.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;

use crate::models::worker::Worker;
use crate::{AppError, Result};

use super::{BoxFuture, ClientProvider, PlatformClient, SendReceipt};

/// HTTP client for one worker node.
pub struct HttpWorkerClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: String,
}

#[derive(Deserialize)]
struct SendResponse {
    forwarded_msg_id: i64,
}

impl HttpWorkerClient {
    /// Build a client for `worker` with the given per-call deadline.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` if the underlying HTTP client
    /// cannot be constructed.
    pub fn new(worker: &Worker, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::Internal(format!("http client build failed: {err}")))?;
        Ok(Self {
            http,
            base_url: worker.address.trim_end_matches('/').to_owned(),
            auth_token: worker.auth_token.clone(),
        })
    }

    /// POST a JSON body and classify failures.
    async fn post(&self, path: &str, body: serde_json::Value) -> Result<reqwest::Response> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.auth_token)
            .json(&body)
            .send()
            .await
            .map_err(classify_reqwest)?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else if status.is_server_error() || status.as_u16() == 429 {
            Err(AppError::PlatformTransient(format!("{url}: {status}")))
        } else {
            Err(AppError::PlatformPermanent(format!("{url}: {status}")))
        }
    }
}

/// Timeouts and connection failures are transient; anything the request
/// builder rejects is permanent.
fn classify_reqwest(err: reqwest::Error) -> AppError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        AppError::PlatformTransient(err.to_string())
    } else {
        AppError::PlatformPermanent(err.to_string())
    }
}

impl PlatformClient for HttpWorkerClient {
    fn start_session(&self, session_id: &str, auth_blob: Bytes) -> BoxFuture<'_, Result<()>> {
        let session_id = session_id.to_owned();
        Box::pin(async move {
            self.post(
                &format!("/sessions/{session_id}/start"),
                json!({ "auth_blob": auth_blob.as_ref() }),
            )
            .await?;
            Ok(())
        })
    }

    fn stop_session(&self, session_id: &str) -> BoxFuture<'_, Result<()>> {
        let session_id = session_id.to_owned();
        Box::pin(async move {
            self.post(&format!("/sessions/{session_id}/stop"), json!({})).await?;
            Ok(())
        })
    }

    fn send(&self, destination_chat_id: i64, payload: &str) -> BoxFuture<'_, Result<SendReceipt>> {
        let payload = payload.to_owned();
        Box::pin(async move {
            let response = self
                .post(
                    "/messages/send",
                    json!({ "destination_chat_id": destination_chat_id, "payload": payload }),
                )
                .await?;
            let body: SendResponse = response
                .json()
                .await
                .map_err(|err| AppError::PlatformPermanent(format!("bad send response: {err}")))?;
            Ok(SendReceipt {
                forwarded_msg_id: body.forwarded_msg_id,
            })
        })
    }

    fn edit(
        &self,
        destination_chat_id: i64,
        forwarded_msg_id: i64,
        payload: &str,
    ) -> BoxFuture<'_, Result<()>> {
        let payload = payload.to_owned();
        Box::pin(async move {
            self.post(
                "/messages/edit",
                json!({
                    "destination_chat_id": destination_chat_id,
                    "forwarded_msg_id": forwarded_msg_id,
                    "payload": payload,
                }),
            )
            .await?;
            Ok(())
        })
    }

    fn delete(&self, destination_chat_id: i64, forwarded_msg_id: i64) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.post(
                "/messages/delete",
                json!({
                    "destination_chat_id": destination_chat_id,
                    "forwarded_msg_id": forwarded_msg_id,
                }),
            )
            .await?;
            Ok(())
        })
    }

    fn pause_updates(&self, session_id: &str) -> BoxFuture<'_, Result<()>> {
        let session_id = session_id.to_owned();
        Box::pin(async move {
            self.post(&format!("/sessions/{session_id}/pause-updates"), json!({}))
                .await?;
            Ok(())
        })
    }

    fn resume_updates(&self, session_id: &str) -> BoxFuture<'_, Result<()>> {
        let session_id = session_id.to_owned();
        Box::pin(async move {
            self.post(&format!("/sessions/{session_id}/resume-updates"), json!({}))
                .await?;
            Ok(())
        })
    }
}

/// Caching provider of HTTP worker clients, keyed by worker row id.
pub struct HttpClientProvider {
    timeout: Duration,
    clients: Mutex<HashMap<String, Arc<HttpWorkerClient>>>,
}

impl HttpClientProvider {
    /// Build a provider applying `timeout` to every worker call.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }
}

impl ClientProvider for HttpClientProvider {
    fn client_for(&self, worker: &Worker) -> Arc<dyn PlatformClient> {
        let mut clients = match self.clients.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(client) = clients.get(&worker.id) {
            return Arc::clone(client) as Arc<dyn PlatformClient>;
        }
        // Client construction only fails when TLS backends are broken;
        // fall back to a default-config client rather than panicking.
        let client = HttpWorkerClient::new(worker, self.timeout).unwrap_or_else(|_| {
            HttpWorkerClient {
                http: reqwest::Client::new(),
                base_url: worker.address.trim_end_matches('/').to_owned(),
                auth_token: worker.auth_token.clone(),
            }
        });
        let client = Arc::new(client);
        clients.insert(worker.id.clone(), Arc::clone(&client));
        client
    }
}
