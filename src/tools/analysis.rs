//! Completion-backed analysis tools. Narratives are cached for an hour.

use futures_util::future::{try_join3, try_join_all};
use serde_json::{json, Value};

use super::direct::{fetch_customer_list, fetch_profile};
use super::{cached, first_row, optional_str, required_str, string_list, ANALYSIS_TTL};
use crate::catalog::direct::{self as queries, CustomerListFilter};
use crate::context::AppContext;
use crate::db::Row;
use crate::error::{Error, Result};

pub(super) fn definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "analyze_customer_risk",
            "description": "Generate a risk analysis narrative for a customer from its risk metrics, financial position, and status flags.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "accountNumber": { "type": "string", "description": "Customer account number to analyze" }
                },
                "required": ["accountNumber"],
                "additionalProperties": false
            }
        }),
        json!({
            "name": "compare_customers",
            "description": "Compare risk profiles of 2-10 customers side by side. Useful for benchmarking or reviewing a group of related accounts.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "accountNumbers": {
                        "type": "array",
                        "items": { "type": "string" },
                        "minItems": 2,
                        "maxItems": 10,
                        "description": "Customer account numbers to compare"
                    }
                },
                "required": ["accountNumbers"],
                "additionalProperties": false
            }
        }),
        json!({
            "name": "portfolio_summary",
            "description": "Generate a summary of portfolio risk health. Can be filtered by branch or account manager.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "branch": { "type": "string", "description": "Filter by branch name" },
                    "repId": { "type": "string", "description": "Filter by account manager ID" }
                },
                "additionalProperties": false
            }
        }),
    ]
}

pub(super) async fn analyze_customer_risk(args: &Value, ctx: &AppContext) -> Result<Value> {
    let account = required_str(args, "accountNumber")?;
    cached(
        ctx,
        "analyze_customer_risk",
        &json!({ "accountNumber": account }),
        ANALYSIS_TTL,
        || analyze_one(ctx, account),
    )
    .await
}

async fn analyze_one(ctx: &AppContext, account: &str) -> Result<Value> {
    let profile = fetch_profile(ctx, account)
        .await?
        .ok_or_else(|| Error::invalid_input(format!("customer {account} not found")))?;
    let analysis = ctx.llm().analyze(&risk_prompt(&profile), None).await?;
    Ok(json!({
        "customer": profile.get("name"),
        "accountNumber": account,
        "analysis": analysis,
    }))
}

pub(super) async fn compare_customers(args: &Value, ctx: &AppContext) -> Result<Value> {
    let mut accounts = string_list(args, "accountNumbers")?;
    if !(2..=10).contains(&accounts.len()) {
        return Err(Error::invalid_input(
            "accountNumbers must contain between 2 and 10 entries",
        ));
    }
    accounts.sort();
    accounts.dedup();
    cached(
        ctx,
        "compare_customers",
        &json!({ "accountNumbers": accounts }),
        ANALYSIS_TTL,
        || compare(ctx, &accounts),
    )
    .await
}

async fn compare(ctx: &AppContext, accounts: &[String]) -> Result<Value> {
    let profiles = try_join_all(accounts.iter().map(|a| fetch_profile(ctx, a))).await?;
    let profiles: Vec<Row> = profiles.into_iter().flatten().collect();
    if profiles.len() < 2 {
        return Err(Error::invalid_input(
            "need at least 2 existing customers to compare",
        ));
    }

    let analysis = ctx.llm().analyze(&comparison_prompt(&profiles), None).await?;
    let names: Vec<Value> = profiles
        .iter()
        .map(|p| p.get("name").cloned().unwrap_or(Value::Null))
        .collect();
    Ok(json!({ "customers": names, "analysis": analysis }))
}

pub(super) async fn portfolio_summary(args: &Value, ctx: &AppContext) -> Result<Value> {
    let branch = optional_str(args, "branch")?;
    let rep_id = optional_str(args, "repId")?;
    cached(
        ctx,
        "portfolio_summary",
        &json!({ "branch": branch, "repId": rep_id }),
        ANALYSIS_TTL,
        || summarize(ctx, branch, rep_id),
    )
    .await
}

async fn summarize(ctx: &AppContext, branch: Option<&str>, rep_id: Option<&str>) -> Result<Value> {
    let top_risk = CustomerListFilter {
        page: 1,
        limit: 10,
        branch: branch.map(String::from),
        rep_id: rep_id.map(String::from),
        sort_by: "risk_rating".into(),
        descending: true,
        ..CustomerListFilter::default()
    };
    let distribution_stmt = queries::risk_distribution(branch);
    let overview_stmt = queries::overview_metrics();
    let (distribution, overview, list) = try_join3(
        ctx.query_direct(&distribution_stmt),
        ctx.query_direct(&overview_stmt),
        fetch_customer_list(ctx, &top_risk),
    )
    .await?;
    let overview = first_row(overview);

    let prompt = portfolio_prompt(&distribution, overview.as_ref(), &list, branch, rep_id);
    let analysis = ctx.llm().analyze(&prompt, None).await?;
    Ok(json!({
        "distribution": distribution,
        "totalCustomers": list["totalCount"],
        "analysis": analysis,
    }))
}

// ─── Prompt text ─────────────────────────────────────────────────────

/// Field as display text; null, blank, zero and `false` read as `fallback`.
fn text_or(row: &Row, key: &str, fallback: &str) -> String {
    match row.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        Some(Value::Number(n)) if n.as_f64() != Some(0.0) => n.to_string(),
        Some(Value::Bool(true)) => "true".into(),
        _ => fallback.into(),
    }
}

/// Numeric field rounded to whole units, `0` when absent or non-numeric.
fn whole(row: &Row, key: &str) -> String {
    let n = match row.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    format!("{:.0}", n.unwrap_or(0.0))
}

fn is_truthy(row: &Row, key: &str) -> bool {
    match row.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64() != Some(0.0),
        Some(Value::String(s)) => !s.is_empty(),
        _ => false,
    }
}

fn risk_prompt(p: &Row) -> String {
    format!(
        "Analyze the risk profile for this customer and provide a concise risk assessment:

Customer: {name} ({account})
Branch: {branch}
Account Manager: {manager}
Account Since: {since}

Risk Metrics:
- Risk Rating: {rating} (1=A lowest, 6=F highest)
- Risk Score: {score} (0-1 ML score)
- Days Beyond Terms: {dbt}
- Weighted Days Beyond Terms: {wdbt}

Financial:
- Credit Limit: £{credit_limit}
- Running Balance: £{balance}
- Credit Usage: {usage}%
- Insurance Limit: £{insurance}
- Remaining Invoice Balance: £{remaining}
- YTD Transaction Volume: £{ytd}

Status:
- On Stop: {on_stop}
- Legal Status: {legal}
- Experian Credit Limit: £{experian_limit}
- Experian Credit Score: {experian_score}

Provide:
1. Risk summary (2-3 sentences)
2. Key concerns (bullet points)
3. Recommended actions",
        name = text_or(p, "name", "N/A"),
        account = text_or(p, "accountNumber", "N/A"),
        branch = text_or(p, "branch", "N/A"),
        manager = text_or(p, "accountManagerName", "N/A"),
        since = text_or(p, "accountSince", "N/A"),
        rating = text_or(p, "risk_rating", "N/A"),
        score = text_or(p, "risk_score", "N/A"),
        dbt = text_or(p, "days_beyond_terms", "0"),
        wdbt = text_or(p, "weighted_days_beyond_terms", "0"),
        credit_limit = text_or(p, "creditLimit", "0"),
        balance = text_or(p, "running_balance", "0"),
        usage = text_or(p, "credit_usage", "0"),
        insurance = text_or(p, "insurance_limit", "0"),
        remaining = text_or(p, "remaining_invoice_balance", "0"),
        ytd = text_or(p, "ytd_transaction_volume", "0"),
        on_stop = if is_truthy(p, "on_stop") { "YES" } else { "No" },
        legal = text_or(p, "legal", "Ok"),
        experian_limit = text_or(p, "experian_credit_limit", "0"),
        experian_score = text_or(p, "experian_credit_score", "N/A"),
    )
}

fn comparison_prompt(profiles: &[Row]) -> String {
    let summaries: Vec<String> = profiles
        .iter()
        .map(|p| {
            format!(
                "- {} ({}): Risk {}, Balance £{}, DBT {} days, Credit Usage {}%",
                text_or(p, "name", "N/A"),
                text_or(p, "accountNumber", "N/A"),
                text_or(p, "risk_rating", "N/A"),
                text_or(p, "running_balance", "0"),
                text_or(p, "days_beyond_terms", "0"),
                text_or(p, "credit_usage", "0"),
            )
        })
        .collect();
    format!(
        "Compare these customers and highlight key differences in their risk profiles:

{}

Provide a brief comparison highlighting:
1. Which customer poses the highest risk and why
2. Key differences in payment behavior
3. Any notable patterns",
        summaries.join("\n")
    )
}

fn portfolio_prompt(
    distribution: &[Row],
    overview: Option<&Row>,
    list: &Value,
    branch: Option<&str>,
    rep_id: Option<&str>,
) -> String {
    let bands: Vec<String> = distribution
        .iter()
        .map(|d| {
            format!(
                "Rating {}: {} customers, £{} balance, {} avg DBT",
                text_or(d, "risk_rating", "N/A"),
                text_or(d, "count", "0"),
                whole(d, "total_balance"),
                whole(d, "avg_days_beyond_terms"),
            )
        })
        .collect();

    let top: Vec<String> = list["customers"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
        .map(|c| {
            format!(
                "- {} ({}): Rating {}, £{}",
                text_or(c, "name", "N/A"),
                text_or(c, "accountNumber", "N/A"),
                text_or(c, "risk_rating", "N/A"),
                whole(c, "running_balance"),
            )
        })
        .collect();

    let mut prompt = format!(
        "Summarize this portfolio's risk health:

Risk Distribution:
{}

Total Customers: {}
",
        bands.join("\n"),
        list["totalCount"]
    );
    if let Some(branch) = branch {
        prompt.push_str(&format!("Branch: {branch}\n"));
    }
    if let Some(rep_id) = rep_id {
        prompt.push_str(&format!("Account Manager: {rep_id}\n"));
    }
    prompt.push_str(&format!("\nTop Risk Customers:\n{}\n", top.join("\n")));
    if let Some(o) = overview {
        prompt.push_str(&format!(
            "
Portfolio Overview Metrics:
- Total Credit Balance: £{}
- Total Days Beyond Terms: {}
- Risky Credit Balance: £{}
- Open Invoices: {}
",
            whole(o, "credit_balance"),
            text_or(o, "days_beyond_terms", "0"),
            whole(o, "risky_credit_balance"),
            text_or(o, "open_invoices", "0"),
        ));
    }
    prompt.push_str(
        "
Provide:
1. Portfolio health summary (2-3 sentences)
2. Key risk concentrations
3. Recommended priority actions",
    );
    prompt
}
