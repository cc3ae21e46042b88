//! Customer and staff tools over the MIS database (reached through the tunnel).

use serde_json::{json, Value};

use super::{
    bool_arg, cached_first_row, cached_rows, int_arg, optional_str, required_str, Source,
    MIS_CUSTOMER_TTL, MIS_STAFF_TTL,
};
use crate::catalog::mis as queries;
use crate::config::TargetId;
use crate::context::AppContext;
use crate::error::{Error, Result};

const SOURCE: Source = Source::Target(TargetId::Mis);

const BRANCH_SORT_FIELDS: &[&str] = &["name", "accountNumber", "creditLimit"];

pub(super) fn definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "mis_customer_search",
            "description": "Search MIS customers by name, account number, email, or postcode. Returns matching customers with branch and rep details.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search term: name, account number, email, or postcode" },
                    "limit": { "type": "integer", "description": "Maximum results to return (default 20)" }
                },
                "required": ["query"],
                "additionalProperties": false
            }
        }),
        json!({
            "name": "mis_customer_detail",
            "description": "Get the full MIS customer record including rep name, branch name, credit terms, credit limit, and contact details.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "accountNumber": { "type": "string", "description": "Customer account number" }
                },
                "required": ["accountNumber"],
                "additionalProperties": false
            }
        }),
        json!({
            "name": "mis_customer_contacts",
            "description": "Get all contacts for a customer including email, phone, interests, and CRM IDs.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "accountNumber": { "type": "string", "description": "Customer account number" },
                    "includeInactive": { "type": "boolean", "description": "Include inactive contacts (default false)" }
                },
                "required": ["accountNumber"],
                "additionalProperties": false
            }
        }),
        json!({
            "name": "mis_customer_notes",
            "description": "Get notes and message history for a customer with timestamps.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "accountNumber": { "type": "string", "description": "Customer account number" },
                    "limit": { "type": "integer", "description": "Maximum notes to return (default 50)" }
                },
                "required": ["accountNumber"],
                "additionalProperties": false
            }
        }),
        json!({
            "name": "mis_customers_by_branch",
            "description": "Get a paginated customer list for a branch with rep assignments and credit terms.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "branchName": { "type": "string", "description": "Branch name" },
                    "page": { "type": "integer", "description": "Page number (default 1)" },
                    "limit": { "type": "integer", "description": "Results per page (default 50)" },
                    "sortBy": {
                        "type": "string",
                        "enum": BRANCH_SORT_FIELDS,
                        "description": "Sort field (default name)"
                    }
                },
                "required": ["branchName"],
                "additionalProperties": false
            }
        }),
        json!({
            "name": "mis_branch_list",
            "description": "Get all branches with names, CRM user IDs, and customer counts.",
            "inputSchema": {
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }
        }),
        json!({
            "name": "mis_rep_list",
            "description": "Get sales reps with activity status, user linkage, and customer counts. Filter by branch or active status.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "branchName": { "type": "string", "description": "Filter by branch name" },
                    "activeOnly": { "type": "boolean", "description": "Only show active reps (default true)" }
                },
                "additionalProperties": false
            }
        }),
    ]
}

pub(super) async fn customer_search(args: &Value, ctx: &AppContext) -> Result<Value> {
    let query = required_str(args, "query")?;
    let limit = int_arg(args, "limit", 20, 1..=500)?;
    cached_rows(
        ctx,
        "mis_customer_search",
        json!({ "query": query, "limit": limit }),
        MIS_CUSTOMER_TTL,
        SOURCE,
        queries::customer_search(query, limit),
    )
    .await
}

pub(super) async fn customer_detail(args: &Value, ctx: &AppContext) -> Result<Value> {
    let account = required_str(args, "accountNumber")?;
    cached_first_row(
        ctx,
        "mis_customer_detail",
        json!({ "accountNumber": account }),
        MIS_CUSTOMER_TTL,
        SOURCE,
        queries::customer_detail(account),
    )
    .await
}

pub(super) async fn customer_contacts(args: &Value, ctx: &AppContext) -> Result<Value> {
    let account = required_str(args, "accountNumber")?;
    let include_inactive = bool_arg(args, "includeInactive", false)?;
    cached_rows(
        ctx,
        "mis_customer_contacts",
        json!({ "accountNumber": account, "includeInactive": include_inactive }),
        MIS_CUSTOMER_TTL,
        SOURCE,
        queries::customer_contacts(account, include_inactive),
    )
    .await
}

pub(super) async fn customer_notes(args: &Value, ctx: &AppContext) -> Result<Value> {
    let account = required_str(args, "accountNumber")?;
    let limit = int_arg(args, "limit", 50, 1..=1000)?;
    cached_rows(
        ctx,
        "mis_customer_notes",
        json!({ "accountNumber": account, "limit": limit }),
        MIS_CUSTOMER_TTL,
        SOURCE,
        queries::customer_notes(account, limit),
    )
    .await
}

pub(super) async fn customers_by_branch(args: &Value, ctx: &AppContext) -> Result<Value> {
    let branch = required_str(args, "branchName")?;
    let page = int_arg(args, "page", 1, 1..=100_000)?;
    let limit = int_arg(args, "limit", 50, 1..=500)?;
    let sort_by = optional_str(args, "sortBy")?.unwrap_or("name");
    if !BRANCH_SORT_FIELDS.contains(&sort_by) {
        return Err(Error::invalid_input(format!(
            "sortBy must be one of: {}",
            BRANCH_SORT_FIELDS.join(", ")
        )));
    }
    cached_rows(
        ctx,
        "mis_customers_by_branch",
        json!({ "branchName": branch, "page": page, "limit": limit, "sortBy": sort_by }),
        MIS_CUSTOMER_TTL,
        SOURCE,
        queries::customers_by_branch(branch, page, limit, sort_by),
    )
    .await
}

pub(super) async fn branch_list(ctx: &AppContext) -> Result<Value> {
    cached_rows(
        ctx,
        "mis_branch_list",
        json!({}),
        MIS_STAFF_TTL,
        SOURCE,
        queries::branch_list(),
    )
    .await
}

pub(super) async fn rep_list(args: &Value, ctx: &AppContext) -> Result<Value> {
    let branch = optional_str(args, "branchName")?;
    let active_only = bool_arg(args, "activeOnly", true)?;
    cached_rows(
        ctx,
        "mis_rep_list",
        json!({ "branchName": branch, "activeOnly": active_only }),
        MIS_STAFF_TTL,
        SOURCE,
        queries::rep_list(branch, active_only),
    )
    .await
}
