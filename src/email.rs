//! Transactional email client (Brevo-compatible `smtp/email` endpoint).

use std::time::Duration;

use serde_json::{json, Value};

use crate::config::ApiConfig;
use crate::error::{Error, Result};

pub struct EmailClient {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
    sender_name: String,
    sender_email: String,
}

impl EmailClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            url: config.email_url.clone(),
            api_key: config.brevo_api_key.clone().filter(|k| !k.trim().is_empty()),
            sender_name: config.sender_name.clone(),
            sender_email: config.sender_email.clone(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Send one HTML email. Without an API key this returns an `error`
    /// payload instead of failing.
    pub async fn send(&self, to: &[String], subject: &str, html: &str) -> Result<Value> {
        let Some(api_key) = &self.api_key else {
            return Ok(json!({ "error": "email API key not configured" }));
        };

        let recipients: Vec<Value> = to.iter().map(|email| json!({ "email": email })).collect();
        let body = json!({
            "sender": { "name": self.sender_name, "email": self.sender_email },
            "to": recipients,
            "subject": subject,
            "htmlContent": html,
        });

        let resp = self
            .http
            .post(&self.url)
            .header("accept", "application/json")
            .header("api-key", api_key)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(Error::upstream(format!(
                "email API error (HTTP {}): {text}",
                status.as_u16()
            )));
        }
        if text.trim().is_empty() {
            return Ok(json!({}));
        }
        serde_json::from_str(&text)
            .map_err(|e| Error::upstream(format!("invalid JSON from email API: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(url: String, key: Option<&str>) -> EmailClient {
        let config = ApiConfig {
            email_url: url,
            brevo_api_key: key.map(String::from),
            ..ApiConfig::default()
        };
        EmailClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn missing_key_returns_error_payload() {
        let c = client("http://127.0.0.1:9/".into(), None);
        let out = c.send(&["a@example.com".into()], "s", "<p>x</p>").await.unwrap();
        assert_eq!(out, json!({ "error": "email API key not configured" }));
    }

    #[tokio::test]
    async fn posts_sender_recipients_and_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/smtp/email"))
            .and(header("api-key", "xkeysib-test"))
            .and(body_partial_json(json!({
                "to": [{ "email": "ops@example.com" }, { "email": "rep@example.com" }],
                "subject": "Alert",
                "htmlContent": "<b>hi</b>",
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "messageId": "<abc@smtp>"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let c = client(format!("{}/smtp/email", server.uri()), Some("xkeysib-test"));
        let out = c
            .send(&["ops@example.com".into(), "rep@example.com".into()], "Alert", "<b>hi</b>")
            .await
            .unwrap();
        assert_eq!(out["messageId"], "<abc@smtp>");

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["sender"]["email"], "alerts@paperplane.ai");
    }

    #[tokio::test]
    async fn rejected_send_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "message": "invalid sender"
            })))
            .mount(&server)
            .await;

        let c = client(format!("{}/smtp/email", server.uri()), Some("k"));
        let err = c.send(&["a@example.com".into()], "s", "b").await.unwrap_err();
        assert!(matches!(err, Error::Upstream(_)));
    }
}
