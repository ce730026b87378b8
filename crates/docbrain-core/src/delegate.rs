use bytes::Bytes;
use docbrain_schema::DelegatePayload;
use futures_core::Stream;
use reqwest::StatusCode;

use crate::error::BrainError;

/// Default route on the downstream retrieval+generation agent.
const DEFAULT_ROUTE: &str = "/api/agent/query";

/// HTTP client for the downstream retrieval+generation agent. The caller's
/// bearer credential is forwarded as-is; the response mode is negotiated
/// with the `accept` header.
#[derive(Debug, Clone)]
pub struct DelegateClient {
    client: reqwest::Client,
    base_url: String,
    route: String,
}

impl DelegateClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_route(base_url, DEFAULT_ROUTE)
    }

    pub fn with_route(base_url: impl Into<String>, route: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            route: route.into(),
        }
    }

    fn request(
        &self,
        payload: &DelegatePayload,
        bearer: Option<&str>,
        accept: &str,
    ) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, self.route);
        let mut req = self
            .client
            .post(url)
            .header("accept", accept)
            .json(payload);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        req
    }

    /// One buffered JSON round-trip.
    pub async fn invoke(
        &self,
        payload: &DelegatePayload,
        bearer: Option<&str>,
    ) -> Result<serde_json::Value, BrainError> {
        let resp = self
            .request(payload, bearer, "application/json")
            .send()
            .await
            .map_err(|e| BrainError::downstream(None, e.to_string()))?;

        let status = resp.status();
        if status != StatusCode::OK {
            return Err(read_error(status, resp).await);
        }

        resp.json()
            .await
            .map_err(|e| BrainError::downstream(None, format!("invalid downstream JSON: {e}")))
    }

    /// One streamed round-trip; the body is handed back chunk-by-chunk for
    /// verbatim proxying, never re-buffered.
    pub async fn invoke_stream(
        &self,
        payload: &DelegatePayload,
        bearer: Option<&str>,
    ) -> Result<impl Stream<Item = reqwest::Result<Bytes>>, BrainError> {
        let resp = self
            .request(payload, bearer, "text/event-stream")
            .send()
            .await
            .map_err(|e| BrainError::downstream(None, e.to_string()))?;

        let status = resp.status();
        if status != StatusCode::OK {
            return Err(read_error(status, resp).await);
        }

        Ok(resp.bytes_stream())
    }
}

/// Preserve the downstream status and whatever message its body carries.
async fn read_error(status: StatusCode, resp: reqwest::Response) -> BrainError {
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .or_else(|| v.get("message"))
                .and_then(|m| m.as_str().map(ToOwned::to_owned))
        })
        .unwrap_or(body);
    BrainError::downstream(Some(status.as_u16()), message)
}
