//! Completion-provider adapter.
//!
//! Implements the `codegate-core` CompletionPort over a plain HTTP GET API that
//! answers `{"response": "..."}`.

use std::time::Duration;

use async_trait::async_trait;

use codegate_core::{errors::Error, ports::CompletionPort, Result};

#[derive(Clone, Debug)]
pub struct HttpCompletionClient {
    pub api_url: String,
    http: reqwest::Client,
}

impl HttpCompletionClient {
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("codegate/0.1")
            .build()
            .map_err(|e| Error::External(format!("completion client build error: {e}")))?;
        Ok(Self {
            api_url: api_url.into(),
            http,
        })
    }
}

#[async_trait]
impl CompletionPort for HttpCompletionClient {
    async fn complete(&self, text: &str) -> Result<String> {
        let resp = self
            .http
            .get(&self.api_url)
            .query(&[("text", text)])
            .send()
            .await
            .map_err(|e| Error::External(format!("completion request error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::External(format!(
                "completion failed: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let v: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("completion json error: {e}")))?;

        let reply = extract_reply(&v)?;
        tracing::debug!(chars = reply.chars().count(), "completion received");
        Ok(reply)
    }
}

fn extract_reply(v: &serde_json::Value) -> Result<String> {
    let text = v
        .get("response")
        .and_then(|t| t.as_str())
        .unwrap_or("")
        .trim()
        .to_string();

    if text.is_empty() {
        return Err(Error::External(
            "completion returned no response".to_string(),
        ));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_is_read_from_response_field() {
        let v = serde_json::json!({ "response": "  hello there \n" });
        assert_eq!(extract_reply(&v).unwrap(), "hello there");
    }

    #[test]
    fn missing_or_blank_reply_is_external_error() {
        for v in [
            serde_json::json!({}),
            serde_json::json!({ "response": "" }),
            serde_json::json!({ "response": 42 }),
        ] {
            let err = extract_reply(&v).unwrap_err();
            assert!(matches!(err, Error::External(_)));
        }
    }

    #[tokio::test]
    async fn unreachable_provider_is_external_error() {
        let client =
            HttpCompletionClient::new("http://127.0.0.1:9/complete", Duration::from_millis(500))
                .unwrap();
        let err = client.complete("hi").await.unwrap_err();
        assert!(matches!(err, Error::External(_)));
    }
}
