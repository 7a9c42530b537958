use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use sideline_core::notify::{NotificationSink, NotifyError};
use sideline_shared::Masked;
use tracing::{info, warn};

#[derive(Serialize)]
struct OutgoingEmail<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

/// Transactional email over a JSON HTTP API with bearer auth
#[derive(Clone)]
pub struct HttpMailer {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl HttpMailer {
    pub fn new(api_url: &str, api_key: &str, from: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
            from: from.to_string(),
        })
    }
}

#[async_trait]
impl NotificationSink for HttpMailer {
    async fn send(&self, to: &str, subject: &str, html_body: &str, text_body: &str) -> Result<(), NotifyError> {
        let body = OutgoingEmail {
            from: &self.from,
            to: [to],
            subject,
            html: html_body,
            text: text_body,
        };
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!(to = %Masked(to.to_string()), status = status.as_u16(), "Email rejected");
            return Err(NotifyError::Delivery(format!("status {}: {}", status, text)));
        }
        info!(to = %Masked(to.to_string()), subject, "Email sent");
        Ok(())
    }
}

/// Logs instead of sending; used when no email API is configured
#[derive(Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl NotificationSink for LogMailer {
    async fn send(&self, to: &str, subject: &str, _html_body: &str, text_body: &str) -> Result<(), NotifyError> {
        info!(to = %Masked(to.to_string()), subject, body = text_body, "Email (not sent, no provider configured)");
        Ok(())
    }
}
