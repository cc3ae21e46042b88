//! MCP tool definitions and handlers.
//!
//! Each tool is defined as a JSON schema (returned by [`all_tool_definitions`])
//! and handled by an async function dispatched from [`handle_tool_call`].
//!
//! ## Tool categories
//!
//! **Direct database** ([`direct`]): customer lookup, profile and list,
//! rep intelligence, alert and metric history, risk distribution, current
//! alerts, overview metrics, recent notifications.
//!
//! **Company registry** ([`companies`]): company profile, filings,
//! officers, county court judgments.
//!
//! **ERP via tunnel** ([`tarms`]): transactions, debtor days, invoices,
//! payments, credit status, orders, payment plans.
//!
//! **MIS via tunnel** ([`mis`]): customer search/detail/contacts/notes,
//! customers by branch, branch and rep lists.
//!
//! **Analysis** ([`analysis`]): completion-backed narratives.
//!
//! **Notifications** ([`notifications`]): alert and missing-information
//! emails. Never cached.
//!
//! **Status**: `data_sources`.
//!
//! Read results are memoized through [`Cache::wrap`](crate::cache::Cache::wrap)
//! with a per-source TTL. Every failure is reported as an `{"error": ...}`
//! payload with `isError` set.

mod analysis;
mod companies;
mod direct;
mod mis;
mod notifications;
mod tarms;

use std::future::Future;
use std::ops::RangeInclusive;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::catalog::Statement;
use crate::config::TargetId;
use crate::context::AppContext;
use crate::db::Row;
use crate::error::{Error, Result};

const DIRECT_TTL: Duration = Duration::from_secs(60);
const ALERTS_TTL: Duration = Duration::from_secs(30);
const COMPANIES_TTL: Duration = Duration::from_secs(3600);
const TARMS_TTL: Duration = Duration::from_secs(300);
const MIS_CUSTOMER_TTL: Duration = Duration::from_secs(60);
const MIS_STAFF_TTL: Duration = Duration::from_secs(3600);
const ANALYSIS_TTL: Duration = Duration::from_secs(3600);

/// Returns every tool definition. Tools whose backing source is not
/// configured are listed too; calling them reports what is missing.
pub fn all_tool_definitions() -> Vec<Value> {
    let mut tools = direct::definitions();
    tools.extend(companies::definitions());
    tools.extend(tarms::definitions());
    tools.extend(mis::definitions());
    tools.extend(analysis::definitions());
    tools.extend(notifications::definitions());
    tools.push(json!({
        "name": "data_sources",
        "description": "Report which data sources and APIs are configured and the current state of each SSH tunnel (idle, connecting, ready, failed).",
        "inputSchema": {
            "type": "object",
            "properties": {},
            "additionalProperties": false
        }
    }));
    tools
}

/// Handle a tool call and return MCP content.
pub async fn handle_tool_call(name: &str, args: &Value, ctx: &AppContext) -> ToolResult {
    if !(args.is_object() || args.is_null()) {
        return ToolResult::error("arguments must be an object".into());
    }

    let outcome = match name {
        "customer_lookup" => direct::customer_lookup(args, ctx).await,
        "customer_profile" => direct::customer_profile(args, ctx).await,
        "customer_list" => direct::customer_list(args, ctx).await,
        "customer_intelligence" => direct::customer_intelligence(args, ctx).await,
        "customer_alerts_history" => direct::customer_alerts_history(args, ctx).await,
        "customer_metric_history" => direct::customer_metric_history(args, ctx).await,
        "risk_distribution" => direct::risk_distribution(args, ctx).await,
        "current_alerts" => direct::current_alerts(args, ctx).await,
        "risk_event_detail" => direct::risk_event_detail(args, ctx).await,
        "overview_metrics" => direct::overview_metrics(ctx).await,
        "list_recent_notifications" => direct::list_recent_notifications(args, ctx).await,
        "company_profile" => companies::company_profile(args, ctx).await,
        "company_filings" => companies::company_filings(args, ctx).await,
        "company_officers" => companies::company_officers(args, ctx).await,
        "ccj_records" => companies::ccj_records(args, ctx).await,
        "transaction_history" => tarms::transaction_history(args, ctx).await,
        "debtor_days" => tarms::debtor_days(args, ctx).await,
        "outstanding_invoices" => tarms::outstanding_invoices(args, ctx).await,
        "payment_history" => tarms::payment_history(args, ctx).await,
        "credit_status_history" => tarms::credit_status_history(args, ctx).await,
        "outstanding_orders" => tarms::outstanding_orders(args, ctx).await,
        "payment_plans" => tarms::payment_plans(args, ctx).await,
        "mis_customer_search" => mis::customer_search(args, ctx).await,
        "mis_customer_detail" => mis::customer_detail(args, ctx).await,
        "mis_customer_contacts" => mis::customer_contacts(args, ctx).await,
        "mis_customer_notes" => mis::customer_notes(args, ctx).await,
        "mis_customers_by_branch" => mis::customers_by_branch(args, ctx).await,
        "mis_branch_list" => mis::branch_list(ctx).await,
        "mis_rep_list" => mis::rep_list(args, ctx).await,
        "analyze_customer_risk" => analysis::analyze_customer_risk(args, ctx).await,
        "compare_customers" => analysis::compare_customers(args, ctx).await,
        "portfolio_summary" => analysis::portfolio_summary(args, ctx).await,
        "send_alert_notification" => notifications::send_alert_notification(args, ctx).await,
        "send_missing_info_request" => notifications::send_missing_info_request(args, ctx).await,
        "data_sources" => Ok(ctx.status().await),
        _ => return ToolResult::error(format!("Unknown tool: {}", name)),
    };

    match outcome {
        Ok(value) => {
            debug!(tool = name, "tool call succeeded");
            ToolResult::success(value)
        }
        Err(e) => {
            warn!(tool = name, error = %e, "tool call failed");
            ToolResult::error(e.to_string())
        }
    }
}

/// Result of an MCP tool call, ready to be serialized into a JSON-RPC response.
#[derive(Debug)]
pub struct ToolResult {
    /// MCP content blocks (a single `{"type":"text","text":"..."}` entry).
    pub content: Vec<Value>,
    /// Whether the tool call failed (maps to `isError` in the MCP response).
    pub is_error: bool,
}

impl ToolResult {
    fn success(value: Value) -> Self {
        Self::text(&value, false)
    }

    fn error(message: String) -> Self {
        Self::text(&json!({ "error": message }), true)
    }

    fn text(value: &Value, is_error: bool) -> Self {
        let text = serde_json::to_string_pretty(value).unwrap_or_default();
        Self {
            content: vec![json!({ "type": "text", "text": text })],
            is_error,
        }
    }
}

// ─── Execution helpers ───────────────────────────────────────────────

/// Where a statement runs.
#[derive(Debug, Clone, Copy)]
enum Source {
    Direct,
    Target(TargetId),
}

async fn run(ctx: &AppContext, source: Source, stmt: &Statement) -> Result<Vec<Row>> {
    match source {
        Source::Direct => ctx.query_direct(stmt).await,
        Source::Target(id) => ctx.query_target(id, stmt).await,
    }
}

fn rows_value(rows: Vec<Row>) -> Value {
    Value::Array(rows.into_iter().map(Value::Object).collect())
}

fn first_row(rows: Vec<Row>) -> Option<Row> {
    rows.into_iter().next()
}

/// Memoize `producer` under `tool` and the normalized `params`.
async fn cached<F, Fut>(
    ctx: &AppContext,
    tool: &str,
    params: &Value,
    ttl: Duration,
    producer: F,
) -> Result<Value>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value>>,
{
    ctx.cache().wrap(tool, params, ttl, producer).await
}

/// Run `stmt` and return every row, cached.
async fn cached_rows(
    ctx: &AppContext,
    tool: &str,
    params: Value,
    ttl: Duration,
    source: Source,
    stmt: Statement,
) -> Result<Value> {
    cached(ctx, tool, &params, ttl, || async {
        run(ctx, source, &stmt).await.map(rows_value)
    })
    .await
}

/// Run `stmt` and return its first row, or `null`, cached.
async fn cached_first_row(
    ctx: &AppContext,
    tool: &str,
    params: Value,
    ttl: Duration,
    source: Source,
    stmt: Statement,
) -> Result<Value> {
    cached(ctx, tool, &params, ttl, || async {
        run(ctx, source, &stmt)
            .await
            .map(|rows| first_row(rows).map(Value::Object).unwrap_or(Value::Null))
    })
    .await
}

// ─── Argument helpers ────────────────────────────────────────────────

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    optional_str(args, key)?
        .ok_or_else(|| Error::invalid_input(format!("Missing required parameter: {key}")))
}

/// Absent, `null` and blank strings all read as `None`.
fn optional_str<'a>(args: &'a Value, key: &str) -> Result<Option<&'a str>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let s = s.trim();
            Ok((!s.is_empty()).then_some(s))
        }
        Some(_) => Err(Error::invalid_input(format!("{key} must be a string"))),
    }
}

fn optional_int(args: &Value, key: &str) -> Result<Option<i64>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .or_else(|| {
                v.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| f as i64)
            })
            .map(Some)
            .ok_or_else(|| Error::invalid_input(format!("{key} must be an integer"))),
    }
}

/// Integer argument with a default, rejected outside `range`.
fn int_arg(args: &Value, key: &str, default: i64, range: RangeInclusive<i64>) -> Result<i64> {
    match optional_int(args, key)? {
        None => Ok(default),
        Some(n) if range.contains(&n) => Ok(n),
        Some(_) => Err(Error::invalid_input(format!(
            "{key} must be between {} and {}",
            range.start(),
            range.end()
        ))),
    }
}

fn optional_bool(args: &Value, key: &str) -> Result<Option<bool>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(Error::invalid_input(format!("{key} must be a boolean"))),
    }
}

fn bool_arg(args: &Value, key: &str, default: bool) -> Result<bool> {
    Ok(optional_bool(args, key)?.unwrap_or(default))
}

/// Required array of non-blank strings.
fn string_list(args: &Value, key: &str) -> Result<Vec<String>> {
    let items = match args.get(key) {
        Some(Value::Array(items)) => items,
        None | Some(Value::Null) => {
            return Err(Error::invalid_input(format!("Missing required parameter: {key} (array)")))
        }
        Some(_) => return Err(Error::invalid_input(format!("{key} must be an array of strings"))),
    };
    items
        .iter()
        .map(|item| match item.as_str().map(str::trim) {
            Some(s) if !s.is_empty() => Ok(s.to_string()),
            _ => Err(Error::invalid_input(format!(
                "{key} must contain only non-empty strings"
            ))),
        })
        .collect()
}

/// Minimal address check: one `@`, a non-empty local part, a dotted domain.
fn is_email(address: &str) -> bool {
    let Some((local, domain)) = address.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !address.chars().any(char::is_whitespace)
}

fn check_emails(key: &str, addresses: &[String]) -> Result<()> {
    match addresses.iter().find(|a| !is_email(a)) {
        Some(bad) => Err(Error::invalid_input(format!("{key}: invalid email address {bad:?}"))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;
    use crate::context::testing::{context, RecordingDatabase};

    fn payload(result: &ToolResult) -> Value {
        let text = result.content[0]["text"].as_str().unwrap();
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn tool_names_are_unique_and_schemas_are_objects() {
        let defs = all_tool_definitions();
        let names: HashSet<&str> = defs.iter().map(|d| d["name"].as_str().unwrap()).collect();
        assert_eq!(names.len(), defs.len());
        assert!(names.contains("data_sources"));
        assert!(names.contains("transaction_history"));
        assert!(names.contains("mis_rep_list"));
        for def in &defs {
            assert_eq!(def["inputSchema"]["type"], "object", "{}", def["name"]);
            assert!(def["description"].as_str().is_some_and(|d| !d.is_empty()));
        }
    }

    #[test]
    fn every_required_param_is_declared() {
        for def in all_tool_definitions() {
            let schema = &def["inputSchema"];
            for required in schema["required"].as_array().into_iter().flatten() {
                let key = required.as_str().unwrap();
                assert!(
                    schema["properties"].get(key).is_some(),
                    "{} requires undeclared {key}",
                    def["name"]
                );
            }
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_error_payload() {
        let ctx = context(Arc::new(RecordingDatabase::default()));
        let result = handle_tool_call("nope", &json!({}), &ctx).await;
        assert!(result.is_error);
        assert_eq!(payload(&result), json!({ "error": "Unknown tool: nope" }));
    }

    #[tokio::test]
    async fn non_object_arguments_are_rejected() {
        let ctx = context(Arc::new(RecordingDatabase::default()));
        let result = handle_tool_call("overview_metrics", &json!([1, 2]), &ctx).await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn unconfigured_tunnel_tool_names_missing_settings() {
        let ctx = context(Arc::new(RecordingDatabase::default()));
        let result =
            handle_tool_call("debtor_days", &json!({ "accountNumber": "AC01" }), &ctx).await;
        assert!(result.is_error);
        let message = payload(&result)["error"].as_str().unwrap().to_string();
        assert!(message.starts_with("tarms is not configured"), "{message}");
        assert!(message.contains("db_password"));
    }

    #[tokio::test]
    async fn data_sources_reports_state() {
        let ctx = context(Arc::new(RecordingDatabase::default()));
        let result = handle_tool_call("data_sources", &Value::Null, &ctx).await;
        assert!(!result.is_error);
        let status = payload(&result);
        assert_eq!(status["direct"]["configured"], true);
        assert_eq!(status["tunnels"]["mis"]["state"], "idle");
    }

    #[test]
    fn argument_helpers_validate_types() {
        let args = json!({ "a": "  x ", "blank": " ", "n": 5, "f": 3.0, "frac": 2.5, "b": true });
        assert_eq!(required_str(&args, "a").unwrap(), "x");
        assert!(required_str(&args, "blank").is_err());
        assert!(required_str(&args, "n").is_err());
        assert_eq!(optional_str(&args, "missing").unwrap(), None);

        assert_eq!(int_arg(&args, "n", 1, 1..=10).unwrap(), 5);
        assert_eq!(int_arg(&args, "f", 1, 1..=10).unwrap(), 3);
        assert_eq!(int_arg(&args, "missing", 7, 1..=10).unwrap(), 7);
        assert!(int_arg(&args, "n", 1, 1..=4).is_err());
        assert!(int_arg(&args, "frac", 1, 1..=10).is_err());

        assert!(bool_arg(&args, "b", false).unwrap());
        assert!(bool_arg(&args, "a", false).is_err());
    }

    #[test]
    fn string_list_requires_strings() {
        assert_eq!(
            string_list(&json!({ "xs": ["a", " b "] }), "xs").unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
        assert!(string_list(&json!({ "xs": ["a", 1] }), "xs").is_err());
        assert!(string_list(&json!({}), "xs").is_err());
    }

    #[test]
    fn email_check() {
        assert!(is_email("rep@turnbull.co.uk"));
        assert!(!is_email("rep"));
        assert!(!is_email("@turnbull.co.uk"));
        assert!(!is_email("rep@localhost"));
        assert!(!is_email("a b@x.com"));
        assert!(!is_email("a@b@c.com"));
    }
}
