//! Customer and risk tools over the direct database.

use futures_util::future::try_join;
use serde_json::{json, Value};

use super::{
    cached, cached_first_row, cached_rows, int_arg, optional_bool, optional_int,
    optional_str, required_str, rows_value, Source, ALERTS_TTL, DIRECT_TTL,
};
use crate::catalog::direct::{self as queries, CustomerListFilter};
use crate::context::AppContext;
use crate::db::Row;
use crate::error::{Error, Result};

const METRIC_TYPES: &[&str] = &[
    "risk_rating",
    "risk_score",
    "transaction_volume",
    "running_balance",
    "credit_usage",
    "days_beyond_terms",
    "weighted_days_beyond_terms",
    "remaining_invoice_balance",
    "ytd_transaction_volume",
    "allocated_transaction_volume",
    "on_stop_status",
    "experian_credit_limit",
    "experian_credit_score",
];

const RATING_LETTERS: &[&str] = &["A", "B", "C", "D", "E", "F"];

pub(super) fn definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "customer_lookup",
            "description": "Search for customers by name or account number. Returns matching customers with basic info and risk rating.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Customer name or account number to search for"
                    }
                },
                "required": ["query"],
                "additionalProperties": false
            }
        }),
        json!({
            "name": "customer_profile",
            "description": "Get the full customer profile including all metrics: risk rating, running balance, days beyond terms, credit usage, transaction volumes, insurance limit, Experian scores, and more.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "accountNumber": {
                        "type": "string",
                        "description": "Customer account number"
                    }
                },
                "required": ["accountNumber"],
                "additionalProperties": false
            }
        }),
        json!({
            "name": "customer_list",
            "description": "Get a paginated list of customers with optional filters for branch, rep, risk rating, and on-stop status.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "page": { "type": "integer", "description": "Page number (1-based, default 1)" },
                    "limit": { "type": "integer", "description": "Results per page (default 20, max 500)" },
                    "branch": { "type": "string", "description": "Filter by branch name" },
                    "repId": { "type": "string", "description": "Filter by account manager ID" },
                    "riskRating": { "type": "integer", "description": "Filter by risk rating (1-6)" },
                    "onStop": { "type": "boolean", "description": "Filter by on-stop status" },
                    "sortBy": {
                        "type": "string",
                        "description": "Sort field: name, risk_rating, running_balance, days_beyond_terms, credit_usage, transaction_volume, risk_score (default name)"
                    },
                    "sortOrder": {
                        "type": "string",
                        "enum": ["ASC", "DESC"],
                        "description": "Sort order (default ASC)"
                    }
                },
                "additionalProperties": false
            }
        }),
        json!({
            "name": "customer_intelligence",
            "description": "Get intelligence notes submitted by reps about a customer, including site visit notes, call summaries, and other field intelligence.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "accountNumber": { "type": "string", "description": "Customer account number" },
                    "limit": { "type": "integer", "description": "Max results to return (default 20)" }
                },
                "required": ["accountNumber"],
                "additionalProperties": false
            }
        }),
        json!({
            "name": "customer_alerts_history",
            "description": "Get the history of risk alerts for a customer, including scores, explanations, ratings, and reviewer actions.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "accountNumber": { "type": "string", "description": "Customer account number" },
                    "limit": { "type": "integer", "description": "Max results to return (default 20)" }
                },
                "required": ["accountNumber"],
                "additionalProperties": false
            }
        }),
        json!({
            "name": "customer_metric_history",
            "description": format!(
                "Get time-series data for a specific customer metric. Available metric types: {}.",
                METRIC_TYPES.join(", ")
            ),
            "inputSchema": {
                "type": "object",
                "properties": {
                    "accountNumber": { "type": "string", "description": "Customer account number" },
                    "metricType": { "type": "string", "enum": METRIC_TYPES, "description": "Metric type to retrieve" },
                    "days": { "type": "integer", "description": "Number of days of history (default 90)" }
                },
                "required": ["accountNumber", "metricType"],
                "additionalProperties": false
            }
        }),
        json!({
            "name": "risk_distribution",
            "description": "Get the distribution of risk ratings across the customer portfolio. Shows count, total balance, and average days beyond terms for each risk rating band (1/A through 6/F).",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "branch": { "type": "string", "description": "Filter by branch name" }
                },
                "additionalProperties": false
            }
        }),
        json!({
            "name": "current_alerts",
            "description": "Get unreviewed risk alerts sorted by severity (highest score first). These are alerts that have not yet been actioned by a reviewer.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "limit": { "type": "integer", "description": "Max alerts to return (default 50)" },
                    "minRating": {
                        "type": "string",
                        "enum": RATING_LETTERS,
                        "description": "Minimum rating letter (A-F) to include"
                    }
                },
                "additionalProperties": false
            }
        }),
        json!({
            "name": "risk_event_detail",
            "description": "Get detailed information about a specific risk alert, including the full explanation, feature data, classifier output, and reviewer actions.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "alertId": { "type": "string", "description": "The alert UUID" }
                },
                "required": ["alertId"],
                "additionalProperties": false
            }
        }),
        json!({
            "name": "overview_metrics",
            "description": "Get the latest daily aggregate portfolio metrics: credit balance, days beyond terms, transaction amounts, weighted averages, and open invoices.",
            "inputSchema": {
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }
        }),
        json!({
            "name": "list_recent_notifications",
            "description": "List recent notification and reviewer actions for a customer or across all customers.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "accountNumber": { "type": "string", "description": "Filter by customer account number" },
                    "limit": { "type": "integer", "description": "Max results to return (default 20)" }
                },
                "additionalProperties": false
            }
        }),
    ]
}

pub(super) async fn customer_lookup(args: &Value, ctx: &AppContext) -> Result<Value> {
    let query = required_str(args, "query")?;
    cached_rows(
        ctx,
        "customer_lookup",
        json!({ "query": query }),
        DIRECT_TTL,
        Source::Direct,
        queries::customer_lookup(query),
    )
    .await
}

pub(super) async fn customer_profile(args: &Value, ctx: &AppContext) -> Result<Value> {
    let account = required_str(args, "accountNumber")?;
    cached_first_row(
        ctx,
        "customer_profile",
        json!({ "accountNumber": account }),
        DIRECT_TTL,
        Source::Direct,
        queries::customer_profile(account),
    )
    .await
}

pub(super) async fn customer_list(args: &Value, ctx: &AppContext) -> Result<Value> {
    let sort_order = optional_str(args, "sortOrder")?.unwrap_or("ASC");
    let descending = match sort_order.to_ascii_uppercase().as_str() {
        "ASC" => false,
        "DESC" => true,
        _ => return Err(Error::invalid_input("sortOrder must be ASC or DESC")),
    };
    let filter = CustomerListFilter {
        page: int_arg(args, "page", 1, 1..=100_000)?,
        limit: int_arg(args, "limit", 20, 1..=500)?,
        branch: optional_str(args, "branch")?.map(String::from),
        rep_id: optional_str(args, "repId")?.map(String::from),
        risk_rating: match optional_int(args, "riskRating")? {
            Some(r) if !(1..=6).contains(&r) => {
                return Err(Error::invalid_input("riskRating must be between 1 and 6"))
            }
            other => other,
        },
        on_stop: optional_bool(args, "onStop")?,
        sort_by: optional_str(args, "sortBy")?.unwrap_or("name").to_string(),
        descending,
    };
    let params = json!({
        "page": filter.page,
        "limit": filter.limit,
        "branch": filter.branch,
        "repId": filter.rep_id,
        "riskRating": filter.risk_rating,
        "onStop": filter.on_stop,
        "sortBy": filter.sort_by,
        "sortOrder": if descending { "DESC" } else { "ASC" },
    });
    cached(ctx, "customer_list", &params, DIRECT_TTL, || {
        fetch_customer_list(ctx, &filter)
    })
    .await
}

/// One page of customers plus the total matching count.
pub(super) async fn fetch_customer_list(
    ctx: &AppContext,
    filter: &CustomerListFilter,
) -> Result<Value> {
    let (count, page) = queries::customer_list(filter);
    let (count_rows, rows) = try_join(ctx.query_direct(&count), ctx.query_direct(&page)).await?;

    let total = count_rows
        .first()
        .and_then(|row| row.get("total"))
        .and_then(json_int)
        .unwrap_or(0);
    let limit = filter.limit.max(1);
    Ok(json!({
        "customers": rows_value(rows),
        "totalCount": total,
        "page": filter.page,
        "pageSize": limit,
        "totalPages": (total + limit - 1) / limit,
    }))
}

/// Profile row for `account`, if the customer exists. Uncached.
pub(super) async fn fetch_profile(ctx: &AppContext, account: &str) -> Result<Option<Row>> {
    let rows = ctx.query_direct(&queries::customer_profile(account)).await?;
    Ok(rows.into_iter().next())
}

pub(super) async fn customer_intelligence(args: &Value, ctx: &AppContext) -> Result<Value> {
    let account = required_str(args, "accountNumber")?;
    let limit = int_arg(args, "limit", 20, 1..=500)?;
    cached_rows(
        ctx,
        "customer_intelligence",
        json!({ "accountNumber": account, "limit": limit }),
        DIRECT_TTL,
        Source::Direct,
        queries::customer_intelligence(account, limit),
    )
    .await
}

pub(super) async fn customer_alerts_history(args: &Value, ctx: &AppContext) -> Result<Value> {
    let account = required_str(args, "accountNumber")?;
    let limit = int_arg(args, "limit", 20, 1..=500)?;
    cached_rows(
        ctx,
        "customer_alerts_history",
        json!({ "accountNumber": account, "limit": limit }),
        DIRECT_TTL,
        Source::Direct,
        queries::customer_alerts_history(account, limit),
    )
    .await
}

pub(super) async fn customer_metric_history(args: &Value, ctx: &AppContext) -> Result<Value> {
    let account = required_str(args, "accountNumber")?;
    let metric = required_str(args, "metricType")?;
    if !METRIC_TYPES.contains(&metric) {
        return Err(Error::invalid_input(format!("unknown metricType: {metric}")));
    }
    let days = int_arg(args, "days", 90, 1..=3650)?;
    cached_rows(
        ctx,
        "customer_metric_history",
        json!({ "accountNumber": account, "metricType": metric, "days": days }),
        DIRECT_TTL,
        Source::Direct,
        queries::customer_metric_history(account, metric, days),
    )
    .await
}

pub(super) async fn risk_distribution(args: &Value, ctx: &AppContext) -> Result<Value> {
    let branch = optional_str(args, "branch")?;
    cached_rows(
        ctx,
        "risk_distribution",
        json!({ "branch": branch }),
        DIRECT_TTL,
        Source::Direct,
        queries::risk_distribution(branch),
    )
    .await
}

pub(super) async fn current_alerts(args: &Value, ctx: &AppContext) -> Result<Value> {
    let limit = int_arg(args, "limit", 50, 1..=500)?;
    let min_rating = optional_str(args, "minRating")?.map(str::to_ascii_uppercase);
    if let Some(rating) = &min_rating {
        if !RATING_LETTERS.contains(&rating.as_str()) {
            return Err(Error::invalid_input("minRating must be a letter A-F"));
        }
    }
    cached_rows(
        ctx,
        "current_alerts",
        json!({ "limit": limit, "minRating": min_rating }),
        ALERTS_TTL,
        Source::Direct,
        queries::current_alerts(limit, min_rating.as_deref()),
    )
    .await
}

pub(super) async fn risk_event_detail(args: &Value, ctx: &AppContext) -> Result<Value> {
    let alert_id = required_str(args, "alertId")?;
    cached_first_row(
        ctx,
        "risk_event_detail",
        json!({ "alertId": alert_id }),
        DIRECT_TTL,
        Source::Direct,
        queries::risk_event_detail(alert_id),
    )
    .await
}

pub(super) async fn overview_metrics(ctx: &AppContext) -> Result<Value> {
    cached_first_row(
        ctx,
        "overview_metrics",
        json!({}),
        DIRECT_TTL,
        Source::Direct,
        queries::overview_metrics(),
    )
    .await
}

pub(super) async fn list_recent_notifications(args: &Value, ctx: &AppContext) -> Result<Value> {
    let account = optional_str(args, "accountNumber")?;
    let limit = int_arg(args, "limit", 20, 1..=500)?;
    cached_rows(
        ctx,
        "list_recent_notifications",
        json!({ "accountNumber": account, "limit": limit }),
        DIRECT_TTL,
        Source::Direct,
        queries::recent_notifications(account, limit),
    )
    .await
}

/// Integer from a JSON number or numeric string (`COUNT(*)` may arrive as either).
pub(super) fn json_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::handle_tool_call;
    use super::*;
    use crate::context::testing::{context, RecordingDatabase};
    use crate::db::SqlParam;

    fn payload(result: &super::super::ToolResult) -> Value {
        serde_json::from_str(result.content[0]["text"].as_str().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn lookup_is_cached_across_calls() {
        let db = Arc::new(RecordingDatabase::with(vec![(
            "ILIKE",
            json!([{ "accountNumber": "AC01", "name": "Acme" }]),
        )]));
        let ctx = context(db.clone());

        let first = handle_tool_call("customer_lookup", &json!({ "query": "acme" }), &ctx).await;
        let second = handle_tool_call("customer_lookup", &json!({ "query": "acme" }), &ctx).await;

        assert!(!first.is_error);
        assert_eq!(payload(&first), payload(&second));
        assert_eq!(payload(&first)[0]["name"], "Acme");
        assert_eq!(db.call_count(), 1);
    }

    #[tokio::test]
    async fn missing_profile_is_null() {
        let ctx = context(Arc::new(RecordingDatabase::default()));
        let result =
            handle_tool_call("customer_profile", &json!({ "accountNumber": "ZZ" }), &ctx).await;
        assert!(!result.is_error);
        assert_eq!(payload(&result), Value::Null);
    }

    #[tokio::test]
    async fn customer_list_combines_count_and_page() {
        let db = Arc::new(RecordingDatabase::with(vec![
            ("COUNT(*)", json!([{ "total": 45 }])),
            ("ORDER BY", json!([{ "name": "Acme" }, { "name": "Bolt" }])),
        ]));
        let ctx = context(db.clone());

        let result = handle_tool_call(
            "customer_list",
            &json!({ "page": 2, "branch": "Leeds", "sortOrder": "desc" }),
            &ctx,
        )
        .await;
        let out = payload(&result);
        assert_eq!(out["totalCount"], 45);
        assert_eq!(out["totalPages"], 3);
        assert_eq!(out["pageSize"], 20);
        assert_eq!(out["customers"].as_array().unwrap().len(), 2);

        let calls = db.calls.lock().unwrap();
        let page_call = calls.iter().find(|(sql, _)| sql.contains("OFFSET")).unwrap();
        assert!(page_call.0.contains("DESC NULLS LAST"));
        assert_eq!(page_call.1.last(), Some(&SqlParam::Int(20)));
    }

    #[tokio::test]
    async fn invalid_arguments_never_query() {
        let db = Arc::new(RecordingDatabase::default());
        let ctx = context(db.clone());

        for (tool, args) in [
            ("customer_profile", json!({})),
            ("customer_list", json!({ "sortOrder": "sideways" })),
            ("customer_list", json!({ "riskRating": 9 })),
            ("customer_metric_history", json!({ "accountNumber": "AC01", "metricType": "mood" })),
            ("current_alerts", json!({ "minRating": "Z" })),
            ("current_alerts", json!({ "limit": 0 })),
        ] {
            let result = handle_tool_call(tool, &args, &ctx).await;
            assert!(result.is_error, "{tool} {args}");
            assert!(payload(&result)["error"].as_str().unwrap().starts_with("invalid input"));
        }
        assert_eq!(db.call_count(), 0);
    }

    #[tokio::test]
    async fn distinct_params_are_cached_separately() {
        let db = Arc::new(RecordingDatabase::default());
        let ctx = context(db.clone());

        handle_tool_call("risk_distribution", &json!({}), &ctx).await;
        handle_tool_call("risk_distribution", &json!({ "branch": "York" }), &ctx).await;
        handle_tool_call("risk_distribution", &json!({ "branch": "York" }), &ctx).await;
        assert_eq!(db.call_count(), 2);
    }

    #[tokio::test]
    async fn intelligence_binds_account_and_limit() {
        let db = Arc::new(RecordingDatabase::with(vec![(
            "FROM intelligence",
            json!([{ "title": "Site visit", "rep_name": "Sam" }]),
        )]));
        let ctx = context(db.clone());

        let result = handle_tool_call(
            "customer_intelligence",
            &json!({ "accountNumber": "AC01", "limit": 5 }),
            &ctx,
        )
        .await;
        assert_eq!(payload(&result)[0]["title"], "Site visit");

        let calls = db.calls.lock().unwrap();
        assert_eq!(calls[0].1, vec![SqlParam::Text("AC01".into()), SqlParam::Int(5)]);
    }

    #[test]
    fn counts_parse_from_numbers_or_strings() {
        assert_eq!(json_int(&json!(12)), Some(12));
        assert_eq!(json_int(&json!("12")), Some(12));
        assert_eq!(json_int(&json!(null)), None);
    }
}
