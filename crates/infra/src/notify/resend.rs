//! Resend (https://resend.com) mail adapter.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{Mailer, NotifyError, Receipt, ReportReady};

pub const DEFAULT_API_URL: &str = "https://api.resend.com/emails";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct ResendMailer {
    client: reqwest::Client,
    api_key: String,
    from: String,
    /// Public site root used to build report links.
    base_url: String,
    api_url: String,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    name: String,
    #[serde(default)]
    message: String,
}

impl ResendMailer {
    pub fn new(
        api_key: impl Into<String>,
        from_addr: &str,
        from_name: &str,
        base_url: impl Into<String>,
    ) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            from: format!("{from_name} <{from_addr}>"),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_url: DEFAULT_API_URL.to_string(),
        })
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn report_url(&self, access_token: &str) -> String {
        format!("{}/report/{}", self.base_url, access_token)
    }

    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), NotifyError> {
        if to.trim().is_empty() || !to.contains('@') {
            return Err(NotifyError::InvalidRecipient(to.to_string()));
        }

        let body = SendRequest {
            from: &self.from,
            to: [to],
            subject,
            html,
        };

        let resp = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            debug!(status = status.as_u16(), "email accepted");
            return Ok(());
        }

        let text = resp.text().await?;
        Err(rejection(status.as_u16(), &text))
    }
}

fn rejection(status: u16, body: &str) -> NotifyError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = if parsed.message.is_empty() {
        body.chars().take(200).collect()
    } else if parsed.name.is_empty() {
        parsed.message
    } else {
        format!("{}: {}", parsed.name, parsed.message)
    };
    NotifyError::Rejected { status, message }
}

fn greeting(business_name: Option<&str>) -> String {
    match business_name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => format!("Hello {name}"),
        None => "Hello".to_string(),
    }
}

fn subject(business_name: Option<&str>, headline: &str) -> String {
    match business_name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => format!("{name}: {headline}"),
        None => headline.to_string(),
    }
}

/// `5900, "usd"` renders as `$59.00`; other currencies as `59.00 EUR`.
fn format_amount(amount_cents: i64, currency: &str) -> String {
    let sign = if amount_cents < 0 { "-" } else { "" };
    let cents = amount_cents.unsigned_abs();
    let major = format!("{}.{:02}", cents / 100, cents % 100);
    if currency.eq_ignore_ascii_case("usd") {
        format!("{sign}${major}")
    } else {
        format!("{sign}{major} {}", currency.to_uppercase())
    }
}

const FOOTER: &str = r#"<hr style="border: none; border-top: 1px solid #e5e7eb; margin: 32px 0;">
  <p style="color: #9ca3af; font-size: 12px;">Risk Mapper · One-time assessment · No account required</p>"#;

fn report_ready_html(business_name: Option<&str>, report_url: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: sans-serif; color: #1a1a1a; max-width: 560px; margin: 0 auto; padding: 24px;">
  <h2>Your Risk Assessment is Ready</h2>
  <p>{greeting},</p>
  <p>Your assessment is complete. The report ranks your highest-priority risks and
  includes tailored mitigation steps.</p>
  <p style="margin: 32px 0;">
    <a href="{url}" style="background: #0f172a; color: #ffffff; padding: 12px 24px; border-radius: 6px; text-decoration: none;">View Your Report</a>
  </p>
  <p style="color: #6b7280; font-size: 14px;">
    This link is your permanent access to the report. If the button does not work, copy this URL:<br>
    <a href="{url}" style="color: #6b7280;">{url}</a>
  </p>
  {FOOTER}
</body>
</html>"#,
        greeting = html_escape(&greeting(business_name)),
        url = report_url,
    )
}

fn receipt_html(business_name: Option<&str>, amount: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: sans-serif; color: #1a1a1a; max-width: 560px; margin: 0 auto; padding: 24px;">
  <h2>Payment Confirmed</h2>
  <p>{greeting},</p>
  <p>We have received your payment of <strong>{amount}</strong>. Your report is being
  generated and a link to it will follow in a separate email shortly.</p>
  {FOOTER}
</body>
</html>"#,
        greeting = html_escape(&greeting(business_name)),
    )
}

fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[async_trait::async_trait]
impl Mailer for ResendMailer {
    #[instrument(skip(self, message), err)]
    async fn send_report_ready(&self, message: &ReportReady) -> Result<(), NotifyError> {
        let name = message.business_name.as_deref();
        let url = self.report_url(message.access_token.as_str());
        self.send(
            &message.to,
            &subject(name, "Your Risk Assessment is Ready"),
            &report_ready_html(name, &url),
        )
        .await
    }

    #[instrument(skip(self, message), fields(amount_cents = message.amount_cents), err)]
    async fn send_receipt(&self, message: &Receipt) -> Result<(), NotifyError> {
        let name = message.business_name.as_deref();
        let amount = format_amount(message.amount_cents, &message.currency);
        self.send(
            &message.to,
            &subject(name, "Payment Confirmed"),
            &receipt_html(name, &amount),
        )
        .await
    }
}
