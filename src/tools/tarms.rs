//! Financial tools over the ERP database (reached through the tunnel).

use serde_json::{json, Value};

use super::{cached_rows, int_arg, required_str, Source, TARMS_TTL};
use crate::catalog::{tarms as queries, Statement};
use crate::config::TargetId;
use crate::context::AppContext;
use crate::error::Result;

const SOURCE: Source = Source::Target(TargetId::Tarms);

fn account_tool(name: &str, description: &str) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": {
            "type": "object",
            "properties": {
                "accountNumber": { "type": "string", "description": "Customer account number" }
            },
            "required": ["accountNumber"],
            "additionalProperties": false
        }
    })
}

fn account_days_tool(name: &str, description: &str) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": {
            "type": "object",
            "properties": {
                "accountNumber": { "type": "string", "description": "Customer account number" },
                "days": { "type": "integer", "description": "Number of days of history to retrieve (default 365)" }
            },
            "required": ["accountNumber"],
            "additionalProperties": false
        }
    })
}

pub(super) fn definitions() -> Vec<Value> {
    vec![
        account_days_tool(
            "transaction_history",
            "Get customer sales transaction history from the ERP. Shows amounts, invoice numbers, and product codes.",
        ),
        account_tool(
            "debtor_days",
            "Get aged debtor analysis for a customer. Shows monthly running balance, days beyond terms, insurance limit, and credit limit history.",
        ),
        account_tool(
            "outstanding_invoices",
            "Get outstanding (unpaid) invoices for a customer. Shows document numbers, dates, remaining balances, and due dates.",
        ),
        account_days_tool(
            "payment_history",
            "Get payment records for a customer from the ERP. Shows payment amounts, allocation dates, and payment types.",
        ),
        account_tool(
            "credit_status_history",
            "Get the history of credit status changes for a customer. Shows prior status, new status, and action IDs for each change event.",
        ),
        account_tool(
            "outstanding_orders",
            "Get unfulfilled orders for a customer. Shows order numbers, dates, delivery dates, values, and product codes.",
        ),
        account_tool(
            "payment_plans",
            "Get payment plans for a customer. Shows plan dates, amounts, frequency, and status.",
        ),
    ]
}

async fn by_account(
    args: &Value,
    ctx: &AppContext,
    tool: &str,
    build: fn(&str) -> Statement,
) -> Result<Value> {
    let account = required_str(args, "accountNumber")?;
    cached_rows(
        ctx,
        tool,
        json!({ "accountNumber": account }),
        TARMS_TTL,
        SOURCE,
        build(account),
    )
    .await
}

async fn by_account_and_days(
    args: &Value,
    ctx: &AppContext,
    tool: &str,
    build: fn(&str, i64) -> Statement,
) -> Result<Value> {
    let account = required_str(args, "accountNumber")?;
    let days = int_arg(args, "days", 365, 1..=3650)?;
    cached_rows(
        ctx,
        tool,
        json!({ "accountNumber": account, "days": days }),
        TARMS_TTL,
        SOURCE,
        build(account, days),
    )
    .await
}

pub(super) async fn transaction_history(args: &Value, ctx: &AppContext) -> Result<Value> {
    by_account_and_days(args, ctx, "transaction_history", queries::transaction_history).await
}

pub(super) async fn debtor_days(args: &Value, ctx: &AppContext) -> Result<Value> {
    by_account(args, ctx, "debtor_days", queries::debtor_days).await
}

pub(super) async fn outstanding_invoices(args: &Value, ctx: &AppContext) -> Result<Value> {
    by_account(args, ctx, "outstanding_invoices", queries::outstanding_invoices).await
}

pub(super) async fn payment_history(args: &Value, ctx: &AppContext) -> Result<Value> {
    by_account_and_days(args, ctx, "payment_history", queries::payment_history).await
}

pub(super) async fn credit_status_history(args: &Value, ctx: &AppContext) -> Result<Value> {
    by_account(args, ctx, "credit_status_history", queries::credit_status_history).await
}

pub(super) async fn outstanding_orders(args: &Value, ctx: &AppContext) -> Result<Value> {
    by_account(args, ctx, "outstanding_orders", queries::outstanding_orders).await
}

pub(super) async fn payment_plans(args: &Value, ctx: &AppContext) -> Result<Value> {
    by_account(args, ctx, "payment_plans", queries::payment_plans).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::handle_tool_call;
    use super::*;
    use crate::context::testing::{context, RecordingDatabase};

    #[tokio::test]
    async fn days_out_of_range_is_rejected_before_connecting() {
        let ctx = context(Arc::new(RecordingDatabase::default()));
        let result = handle_tool_call(
            "payment_history",
            &json!({ "accountNumber": "AC01", "days": 0 }),
            &ctx,
        )
        .await;
        assert!(result.is_error);
        assert!(result.content[0]["text"].as_str().unwrap().contains("days must be between"));
    }

    #[tokio::test]
    async fn configuration_errors_are_not_cached() {
        let ctx = context(Arc::new(RecordingDatabase::default()));
        let args = json!({ "accountNumber": "AC01" });
        assert!(handle_tool_call("payment_plans", &args, &ctx).await.is_error);
        assert!(ctx.cache().is_empty());
    }
}
