use crate::config::EmailConfig;
use crate::error::app_error::AppError;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

pub struct EmailService {
    config: EmailConfig,
}

impl EmailService {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    /// Send a one-time sign-in code
    pub async fn send_code_email(&self, to_email: &str, to_name: &str, code: &str, ttl_minutes: i64) -> Result<(), AppError> {
        if !self.config.enabled {
            tracing::warn!("Email service is disabled, skipping verification code email to {}", to_email);
            return Ok(());
        }

        let subject = format!("Your {} verification code", self.config.from_name);
        let html_body = self.generate_code_email_html(to_name, code, ttl_minutes);
        let text_body = self.generate_code_email_text(to_name, code, ttl_minutes);

        self.send_email(to_email, &subject, &html_body, &text_body).await
    }

    fn generate_code_email_html(&self, to_name: &str, code: &str, ttl_minutes: i64) -> String {
        format!(
            r##"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Your verification code</title>
    <style>
        body {{
            margin: 0;
            padding: 24px 12px;
            background-color: #FAFBFC;
            color: #141517;
            font-family: Inter, -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Arial, sans-serif;
            line-height: 1.6;
        }}

        .card {{
            max-width: 520px;
            margin: 0 auto;
            padding: 28px 24px;
            background-color: #FFFFFF;
            border: 1px solid rgba(0, 0, 0, 0.08);
            border-radius: 16px;
        }}

        .code {{
            margin: 20px 0;
            font-size: 32px;
            font-weight: 700;
            letter-spacing: 0.3em;
            text-align: center;
        }}

        .muted {{
            color: #5C5F66;
            font-size: 13px;
        }}
    </style>
</head>
<body>
    <div class="card">
        <p>Hi {name},</p>
        <p>Use this code to finish signing in to {brand}:</p>
        <p class="code">{code}</p>
        <p>The code expires in {ttl} minutes and can only be used once.</p>
        <p class="muted">If you did not try to sign in, change your password. {brand} will never ask you for this code.</p>
    </div>
</body>
</html>
"##,
            name = to_name,
            brand = self.config.from_name,
            code = code,
            ttl = ttl_minutes
        )
    }

    fn generate_code_email_text(&self, to_name: &str, code: &str, ttl_minutes: i64) -> String {
        format!(
            r#"{brand} | Verification code

Hi {name},

Use this code to finish signing in:

    {code}

The code expires in {ttl} minutes and can only be used once.

If you did not try to sign in, change your password. {brand} will never ask you for this code.
"#,
            brand = self.config.from_name,
            name = to_name,
            code = code,
            ttl = ttl_minutes
        )
    }

    /// Send an email using SMTP
    async fn send_email(&self, to_email: &str, subject: &str, html_body: &str, text_body: &str) -> Result<(), AppError> {
        let email = Message::builder()
            .from(
                format!("{} <{}>", self.config.from_name, self.config.from_address)
                    .parse()
                    .map_err(|e| AppError::delivery(format!("Invalid from address: {}", e)))?,
            )
            .to(to_email.parse().map_err(|e| AppError::delivery(format!("Invalid to address: {}", e)))?)
            .subject(subject)
            .multipart(
                lettre::message::MultiPart::alternative()
                    .singlepart(
                        lettre::message::SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text_body.to_string()),
                    )
                    .singlepart(
                        lettre::message::SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body.to_string()),
                    ),
            )
            .map_err(|e| AppError::delivery(format!("Failed to build email: {}", e)))?;

        let creds = Credentials::new(self.config.smtp_username.clone(), self.config.smtp_password.clone());

        let mailer = SmtpTransport::relay(&self.config.smtp_host)
            .map_err(|e| AppError::delivery(format!("Failed to create SMTP transport: {}", e)))?
            .credentials(creds)
            .port(self.config.smtp_port)
            .build();

        // lettre's SMTP transport blocks
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| AppError::delivery(format!("Failed to spawn email sending task: {}", e)))?;

        result.map_err(|e| AppError::delivery(format!("Failed to send email: {}", e)))?;

        tracing::info!("Verification code email sent to {}", to_email);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(enabled: bool) -> EmailConfig {
        EmailConfig {
            enabled,
            smtp_host: "localhost".to_string(),
            smtp_port: 587,
            smtp_username: "test".to_string(),
            smtp_password: "test".to_string(),
            from_address: "no-reply@example.com".to_string(),
            from_name: "TenantAuth".to_string(),
        }
    }

    #[test]
    fn test_generate_code_email_html() {
        let service = EmailService::new(config(false));
        let html = service.generate_code_email_html("John Doe", "482913", 5);

        assert!(html.contains("John Doe"));
        assert!(html.contains("482913"));
        assert!(html.contains("5 minutes"));
        assert!(html.contains("TenantAuth"));
    }

    #[test]
    fn test_generate_code_email_text() {
        let service = EmailService::new(config(false));
        let text = service.generate_code_email_text("Jane Smith", "007311", 10);

        assert!(text.contains("Jane Smith"));
        assert!(text.contains("007311"));
        assert!(text.contains("10 minutes"));
    }

    #[tokio::test]
    async fn disabled_service_skips_delivery() {
        let service = EmailService::new(config(false));
        assert!(service.send_code_email("jane@example.com", "Jane", "123456", 5).await.is_ok());
    }
}
