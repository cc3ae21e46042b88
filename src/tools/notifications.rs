//! Email notification tools. These have side effects and are never cached.

use chrono::{DateTime, NaiveDateTime};
use serde_json::{json, Map, Value};
use tracing::info;

use super::{check_emails, first_row, required_str, string_list};
use crate::catalog::direct as queries;
use crate::context::AppContext;
use crate::db::Row;
use crate::error::{Error, Result};

const MAX_RECIPIENTS: usize = 50;
const FOOTER: &str = "Sent via Paperplane Risk Monitoring";

pub(super) fn definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "send_alert_notification",
            "description": "Send a risk alert notification email for a specific alert. Composes an email with the alert details and sends it to the given recipients.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "alertId": { "type": "string", "description": "The alert UUID to send a notification for" },
                    "recipients": {
                        "type": "array",
                        "items": { "type": "string", "format": "email" },
                        "minItems": 1,
                        "description": "Email addresses to send the alert to"
                    }
                },
                "required": ["alertId", "recipients"],
                "additionalProperties": false
            }
        }),
        json!({
            "name": "send_missing_info_request",
            "description": "Email a rep requesting missing information for a customer. Useful for following up on incomplete customer profiles.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "accountNumber": { "type": "string", "description": "Customer account number" },
                    "fields": {
                        "type": "array",
                        "items": { "type": "string" },
                        "minItems": 1,
                        "description": "Missing field names to request"
                    },
                    "repEmail": { "type": "string", "format": "email", "description": "Rep email address to send the request to" }
                },
                "required": ["accountNumber", "fields", "repEmail"],
                "additionalProperties": false
            }
        }),
    ]
}

pub(super) async fn send_alert_notification(args: &Value, ctx: &AppContext) -> Result<Value> {
    let alert_id = required_str(args, "alertId")?;
    let recipients = string_list(args, "recipients")?;
    if recipients.is_empty() || recipients.len() > MAX_RECIPIENTS {
        return Err(Error::invalid_input(format!(
            "recipients must contain between 1 and {MAX_RECIPIENTS} addresses"
        )));
    }
    check_emails("recipients", &recipients)?;

    let alert = first_row(ctx.query_direct(&queries::alert_for_notification(alert_id)).await?)
        .ok_or_else(|| Error::invalid_input(format!("alert {alert_id} not found")))?;

    let rating = plain(&alert, "rating");
    let customer = plain(&alert, "customer_name");
    let account = plain(&alert, "account_number");
    let subject = format!("[Risk Alert {rating}] {customer} ({account})");

    let sent = ctx.email().send(&recipients, &subject, &alert_html(&alert)).await?;
    info!(alert = alert_id, recipients = recipients.len(), "alert notification sent");

    let mut out = Map::new();
    out.insert("sent".into(), json!(sent.get("error").is_none()));
    out.insert("alertId".into(), alert.get("id").cloned().unwrap_or(Value::Null));
    out.insert("customer".into(), json!(customer));
    out.insert("rating".into(), json!(rating));
    out.insert("recipients".into(), json!(recipients));
    Ok(merge(out, sent))
}

pub(super) async fn send_missing_info_request(args: &Value, ctx: &AppContext) -> Result<Value> {
    let account = required_str(args, "accountNumber")?;
    let fields = string_list(args, "fields")?;
    if fields.is_empty() {
        return Err(Error::invalid_input("fields must not be empty"));
    }
    let rep_email = required_str(args, "repEmail")?.to_string();
    check_emails("repEmail", std::slice::from_ref(&rep_email))?;

    let customer = first_row(ctx.query_direct(&queries::customer_contact_summary(account)).await?)
        .ok_or_else(|| Error::invalid_input(format!("customer {account} not found")))?;

    let name = plain(&customer, "name");
    let subject = format!("[Action Required] Missing Information for {name} ({account})");
    let html = missing_info_html(&customer, account, &fields);

    let sent = ctx
        .email()
        .send(std::slice::from_ref(&rep_email), &subject, &html)
        .await?;
    info!(account, fields = fields.len(), "missing information request sent");

    let mut out = Map::new();
    out.insert("sent".into(), json!(sent.get("error").is_none()));
    out.insert("customer".into(), json!(name));
    out.insert("accountNumber".into(), json!(account));
    out.insert("fields".into(), json!(fields));
    out.insert("recipient".into(), json!(rep_email));
    Ok(merge(out, sent))
}

/// Overlay the email API response on `base`.
fn merge(mut base: Map<String, Value>, response: Value) -> Value {
    if let Value::Object(extra) = response {
        base.extend(extra);
    }
    Value::Object(base)
}

fn rating_color(rating: &str) -> &'static str {
    match rating {
        "A" => "#10B981",
        "B" => "#34D399",
        "C" => "#FBBF24",
        "D" => "#F59E0B",
        "E" => "#F97316",
        "F" => "#EF4444",
        _ => "#6B7280",
    }
}

/// Unescaped text of a field; empty when absent.
fn plain(row: &Row, key: &str) -> String {
    match row.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn escape_html(text: &str) -> String {
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

/// `dd/mm/yyyy` for RFC 3339 or naive ISO timestamps; anything else as given.
fn display_date(raw: &str) -> String {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.format("%d/%m/%Y").to_string();
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return dt.format("%d/%m/%Y").to_string();
    }
    raw.to_string()
}

fn alert_html(alert: &Row) -> String {
    let rating = plain(alert, "rating");
    let score = alert
        .get("score")
        .and_then(Value::as_f64)
        .map(|s| format!("{s:.2}"))
        .unwrap_or_default();
    let summary = match plain(alert, "explanation_summary") {
        s if s.trim().is_empty() => "No summary available".to_string(),
        s => s,
    };
    format!(
        r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <div style="background-color: {color}; color: white; padding: 20px; border-radius: 8px 8px 0 0;">
    <h2 style="margin: 0;">Risk Alert: {customer}</h2>
    <p style="margin: 5px 0 0 0;">Rating: {rating} | Score: {score}</p>
  </div>
  <div style="padding: 20px; border: 1px solid #E5E7EB; border-top: none; border-radius: 0 0 8px 8px;">
    <p><strong>Account:</strong> {account}</p>
    <p><strong>Date:</strong> {date}</p>
    <p><strong>Summary:</strong> {summary}</p>
    <hr style="border: 0; border-top: 1px solid #E5E7EB; margin: 15px 0;">
    <p style="color: #6B7280; font-size: 12px;">{FOOTER}</p>
  </div>
</div>"#,
        color = rating_color(&rating),
        customer = escape_html(&plain(alert, "customer_name")),
        rating = escape_html(&rating),
        account = escape_html(&plain(alert, "account_number")),
        date = escape_html(&display_date(&plain(alert, "timestamp"))),
        summary = escape_html(&summary),
    )
}

fn missing_info_html(customer: &Row, account: &str, fields: &[String]) -> String {
    let manager = match plain(customer, "accountManagerName") {
        m if m.trim().is_empty() => "there".to_string(),
        m => m,
    };
    let items: String = fields
        .iter()
        .map(|f| format!("<li>{}</li>", escape_html(f)))
        .collect();
    format!(
        r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <div style="background-color: #FEF3C7; padding: 20px; border-radius: 8px 8px 0 0;">
    <h2 style="margin: 0; color: #92400E;">Missing Information Request</h2>
  </div>
  <div style="padding: 20px; border: 1px solid #E5E7EB; border-top: none; border-radius: 0 0 8px 8px;">
    <p>Hi {manager},</p>
    <p>We're missing some information for customer <strong>{name}</strong> ({account}).</p>
    <p>Could you please provide the following:</p>
    <ul>{items}</ul>
    <p>Thank you for your help.</p>
    <hr style="border: 0; border-top: 1px solid #E5E7EB; margin: 15px 0;">
    <p style="color: #6B7280; font-size: 12px;">{FOOTER}</p>
  </div>
</div>"#,
        manager = escape_html(&manager),
        name = escape_html(&plain(customer, "name")),
        account = escape_html(account),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::handle_tool_call;
    use super::*;
    use crate::context::testing::{context, RecordingDatabase};

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn payload(result: &super::super::ToolResult) -> Value {
        serde_json::from_str(result.content[0]["text"].as_str().unwrap()).unwrap()
    }

    #[test]
    fn alert_html_escapes_and_colors() {
        let html = alert_html(&row(json!({
            "customer_name": "Smith & <Sons>",
            "rating": "F",
            "score": 0.91234,
            "account_number": "AC01",
            "timestamp": "2025-03-04T09:30:00+00:00",
            "explanation_summary": null,
        })));
        assert!(html.contains("#EF4444"));
        assert!(html.contains("Risk Alert: Smith &amp; &lt;Sons&gt;"));
        assert!(html.contains("Score: 0.91"));
        assert!(html.contains("04/03/2025"));
        assert!(html.contains("No summary available"));
    }

    #[test]
    fn missing_info_html_lists_fields() {
        let html = missing_info_html(
            &row(json!({ "name": "Acme", "accountManagerName": null })),
            "AC01",
            &["VAT number".into(), "Director".into()],
        );
        assert!(html.contains("Hi there,"));
        assert!(html.contains("<li>VAT number</li><li>Director</li>"));
        assert!(html.contains("<strong>Acme</strong> (AC01)"));
    }

    #[test]
    fn dates_fall_back_to_raw_text() {
        assert_eq!(display_date("2025-01-02T03:04:05.678"), "02/01/2025");
        assert_eq!(display_date("yesterday"), "yesterday");
    }

    #[tokio::test]
    async fn alert_without_email_key_reports_not_sent() {
        let db = Arc::new(RecordingDatabase::with(vec![(
            "FROM alerts a",
            json!([{ "id": "a-1", "customer_name": "Acme", "account_number": "AC01", "rating": "D", "score": 0.5 }]),
        )]));
        let ctx = context(db.clone());
        let args = json!({ "alertId": "a-1", "recipients": ["ops@example.com"] });

        let out = payload(&handle_tool_call("send_alert_notification", &args, &ctx).await);
        assert_eq!(out["sent"], false);
        assert_eq!(out["error"], "email API key not configured");
        assert_eq!(out["alertId"], "a-1");
        assert_eq!(out["rating"], "D");

        handle_tool_call("send_alert_notification", &args, &ctx).await;
        assert_eq!(db.call_count(), 2);
        assert!(ctx.cache().is_empty());
    }

    #[tokio::test]
    async fn bad_recipient_is_rejected() {
        let db = Arc::new(RecordingDatabase::default());
        let ctx = context(db.clone());
        let result = handle_tool_call(
            "send_alert_notification",
            &json!({ "alertId": "a-1", "recipients": ["not-an-address"] }),
            &ctx,
        )
        .await;
        assert!(result.is_error);
        assert_eq!(db.call_count(), 0);
    }

    #[tokio::test]
    async fn unknown_customer_is_error() {
        let ctx = context(Arc::new(RecordingDatabase::default()));
        let result = handle_tool_call(
            "send_missing_info_request",
            &json!({ "accountNumber": "ZZ", "fields": ["VAT"], "repEmail": "rep@example.com" }),
            &ctx,
        )
        .await;
        assert!(result.is_error);
        assert!(payload(&result)["error"].as_str().unwrap().contains("ZZ not found"));
    }
}
