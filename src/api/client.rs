use reqwest::Client as HttpClient;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::app::Session;
use crate::error::ApiError;
use crate::utils::join_url;

/// Shared HTTP plumbing for the channel proxies and the audit collaborator.
#[derive(Debug, Clone)]
pub struct ApiClient {
    pub http: HttpClient,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, session: &Session) -> Self {
        Self {
            http: HttpClient::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: session.token.clone().filter(|t| !t.is_empty()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn endpoint(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    fn with_auth(&self, mut req: RequestBuilder) -> RequestBuilder {
        if let Some(t) = &self.token {
            req = req.header("Authorization", format!("Bearer {}", t));
        }
        req
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.with_auth(self.http.get(self.endpoint(path)))
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.with_auth(self.http.post(self.endpoint(path)))
    }

    pub fn put(&self, path: &str) -> RequestBuilder {
        self.with_auth(self.http.put(self.endpoint(path)))
    }

    /// Sends the request and decodes a JSON body, turning non-2xx statuses
    /// into [`ApiError::Status`] with the server's `detail`/`error` text.
    pub async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ApiError> {
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body: Value = resp.json().await.unwrap_or(Value::Null);
            let detail = body
                .get("detail")
                .or_else(|| body.get("error"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP error! status: {}", status.as_u16()));
            return Err(ApiError::Status { status: status.as_u16(), detail });
        }
        resp.json::<T>().await.map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Like [`send_json`](Self::send_json) but ignores the body.
    pub async fn send_unit(&self, req: RequestBuilder) -> Result<(), ApiError> {
        let _: Value = match self.send_json::<Value>(req).await {
            Ok(v) => v,
            // Empty 2xx bodies are fine here.
            Err(ApiError::Decode(_)) => Value::Null,
            Err(e) => return Err(e),
        };
        Ok(())
    }
}

/// Extracts the record array from a list response. Proxies answer with a
/// bare array or wrap it in `conversations`/`data`.
pub fn records_from(json: Value) -> Result<Vec<Value>, ApiError> {
    match json {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => ["conversations", "data"]
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .ok_or_else(|| ApiError::Decode("no conversation array in response".into())),
        other => Err(ApiError::Decode(format!("expected array, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn records_from_accepts_wrapped_arrays() {
        assert_eq!(records_from(json!([{"id": 1}])).unwrap().len(), 1);
        assert_eq!(records_from(json!({"data": [{"id": 1}, {"id": 2}]})).unwrap().len(), 2);
        assert_eq!(records_from(json!({"conversations": []})).unwrap().len(), 0);
        assert!(records_from(json!({"items": []})).is_err());
        assert!(records_from(json!(3)).is_err());
    }

    #[test]
    fn endpoint_joins_base() {
        let client = ApiClient::new("http://core:8003/", &Session::default());
        assert_eq!(client.endpoint("/api/v1/gmail/send"), "http://core:8003/api/v1/gmail/send");
    }
}
