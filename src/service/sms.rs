use crate::config::SmsConfig;
use crate::error::app_error::AppError;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct SmsPayload<'a> {
    from: &'a str,
    to: &'a str,
    body: String,
}

/// Sends text messages through an HTTP gateway.
pub struct SmsService {
    config: SmsConfig,
    client: reqwest::Client,
}

impl SmsService {
    pub fn new(config: SmsConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| AppError::delivery(format!("Failed to build SMS client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn code_message(&self, code: &str, ttl_minutes: i64) -> String {
        format!("{} is your {} verification code. It expires in {} minutes.", code, self.config.sender, ttl_minutes)
    }

    pub async fn send_code_sms(&self, to_number: &str, code: &str, ttl_minutes: i64) -> Result<(), AppError> {
        if !self.config.enabled {
            tracing::warn!("SMS service is disabled, skipping verification code");
            return Ok(());
        }

        let payload = SmsPayload {
            from: &self.config.sender,
            to: to_number,
            body: self.code_message(code, ttl_minutes),
        };

        let response = self
            .client
            .post(&self.config.gateway_url)
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::delivery(format!("SMS gateway request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::delivery(format!("SMS gateway returned {}", status)));
        }

        tracing::info!("Verification code SMS sent");
        Ok(())
    }
}
