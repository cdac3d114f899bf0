//! HTTP client for the portal's runner protocol.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use toolport_core::protocol::{
    CLAIM_PATH, CallbackRequest, ClaimResponse, ErrorResponse, HEARTBEAT_PATH, HeartbeatRequest,
    HeartbeatResponse, MACHINE_KEY_HEADER, REPORT_PATH, ReportRequest,
};

use crate::error::ClientError;

/// Portal client authenticated as one machine.
#[derive(Debug, Clone)]
pub struct PortalClient {
    http: reqwest::Client,
    base_url: String,
    machine_key: String,
}

impl PortalClient {
    pub fn new(
        base_url: &str,
        machine_key: &str,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        if base_url.is_empty() {
            return Err(ClientError::Config("portal url is empty".into()));
        }
        if machine_key.is_empty() {
            return Err(ClientError::Config("machine key is empty".into()));
        }

        // reqwest is built with rustls-no-provider; Err means already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            machine_key: machine_key.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Machine-authenticated POST. The key travels only to the portal itself.
    async fn machine_post(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<reqwest::Response, ClientError> {
        let resp = self
            .http
            .post(self.url(path))
            .header(MACHINE_KEY_HEADER, &self.machine_key)
            .json(body)
            .send()
            .await?;
        check_status(resp).await
    }

    /// Claim the oldest eligible run. `None` when the queue is empty.
    pub async fn claim(&self) -> Result<Option<ClaimResponse>, ClientError> {
        let resp = self.machine_post(CLAIM_PATH, &serde_json::json!({})).await?;
        if resp.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        Ok(Some(resp.json().await?))
    }

    pub async fn heartbeat(&self, req: &HeartbeatRequest) -> Result<HeartbeatResponse, ClientError> {
        let resp = self.machine_post(HEARTBEAT_PATH, req).await?;
        Ok(resp.json().await?)
    }

    pub async fn report(&self, req: &ReportRequest) -> Result<(), ClientError> {
        self.machine_post(REPORT_PATH, req).await?;
        Ok(())
    }

    /// Token-authenticated completion against the `callback_url` handed out
    /// at claim time. No machine key is sent.
    pub async fn callback(&self, callback_url: &str, req: &CallbackRequest) -> Result<(), ClientError> {
        let resp = self.http.post(callback_url).json(req).send().await?;
        check_status(resp).await?;
        Ok(())
    }
}

/// Turn a non-2xx response into [`ClientError::Api`], preferring the
/// portal's `{"error": ...}` message.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let fallback = status.canonical_reason().unwrap_or("Unknown").to_string();
    let message = match resp.bytes().await {
        Ok(body) => decode_error(&body).unwrap_or(fallback),
        Err(_) => fallback,
    };
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}

fn decode_error(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<ErrorResponse>(body)
        .ok()
        .map(|e| e.error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_settings() {
        assert!(matches!(
            PortalClient::new("", "k", Duration::from_secs(1)),
            Err(ClientError::Config(_))
        ));
        assert!(matches!(
            PortalClient::new("http://portal", "", Duration::from_secs(1)),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn url_joins_without_double_slash() {
        let client = PortalClient::new("http://portal:3000/", "k", Duration::from_secs(1));
        assert!(matches!(
            client.as_ref().map(|c| c.url(CLAIM_PATH)),
            Ok(ref url) if url == "http://portal:3000/api/runner/claim"
        ));
    }

    #[test]
    fn error_body_message_is_extracted() {
        assert_eq!(
            decode_error(br#"{"error":"Invalid machine key"}"#).as_deref(),
            Some("Invalid machine key")
        );
        assert!(decode_error(b"<html>").is_none());
    }
}
