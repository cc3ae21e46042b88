//! Company registry tools over the direct database.

use serde_json::{json, Value};

use super::{
    cached_first_row, cached_rows, int_arg, optional_str, required_str, Source, COMPANIES_TTL,
};
use crate::catalog::companies::{self as queries, CompanyRef};
use crate::context::AppContext;
use crate::error::{Error, Result};

fn company_number_tool(name: &str, description: &str) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": {
            "type": "object",
            "properties": {
                "companyNumber": { "type": "string", "description": "Companies House company number" }
            },
            "required": ["companyNumber"],
            "additionalProperties": false
        }
    })
}

pub(super) fn definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "company_profile",
            "description": "Get Companies House profile for a customer's registered company. Includes company status, type, incorporation date, SIC codes, insolvency history, charges, and registered address.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "accountNumber": { "type": "string", "description": "Customer account number (looks up linked company)" },
                    "companyNumber": { "type": "string", "description": "Direct Companies House number" }
                },
                "additionalProperties": false
            }
        }),
        json!({
            "name": "company_filings",
            "description": "Get recent Companies House filings for a company. Shows filing dates, types, descriptions, and categories.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "companyNumber": { "type": "string", "description": "Companies House company number" },
                    "limit": { "type": "integer", "description": "Max filings to return (default 20)" }
                },
                "required": ["companyNumber"],
                "additionalProperties": false
            }
        }),
        company_number_tool(
            "company_officers",
            "Get directors and officers for a company from Companies House data. Shows names, roles, appointment dates, and resignation dates.",
        ),
        company_number_tool(
            "ccj_records",
            "Get County Court Judgments (CCJs) for a company. Shows case numbers, amounts, judgement dates, court names, and satisfaction dates.",
        ),
    ]
}

/// A company number wins over an account number when both are given.
pub(super) async fn company_profile(args: &Value, ctx: &AppContext) -> Result<Value> {
    let company_number = optional_str(args, "companyNumber")?;
    let account = optional_str(args, "accountNumber")?;
    let (company, params) = match (company_number, account) {
        (Some(number), _) => (
            CompanyRef::Number(number),
            json!({ "identifier": number, "isCompanyNumber": true }),
        ),
        (None, Some(account)) => (
            CompanyRef::Account(account),
            json!({ "identifier": account, "isCompanyNumber": false }),
        ),
        (None, None) => {
            return Err(Error::invalid_input(
                "Either accountNumber or companyNumber must be provided",
            ))
        }
    };
    cached_first_row(
        ctx,
        "company_profile",
        params,
        COMPANIES_TTL,
        Source::Direct,
        queries::company_profile(company),
    )
    .await
}

pub(super) async fn company_filings(args: &Value, ctx: &AppContext) -> Result<Value> {
    let number = required_str(args, "companyNumber")?;
    let limit = int_arg(args, "limit", 20, 1..=500)?;
    cached_rows(
        ctx,
        "company_filings",
        json!({ "companyNumber": number, "limit": limit }),
        COMPANIES_TTL,
        Source::Direct,
        queries::company_filings(number, limit),
    )
    .await
}

pub(super) async fn company_officers(args: &Value, ctx: &AppContext) -> Result<Value> {
    let number = required_str(args, "companyNumber")?;
    cached_rows(
        ctx,
        "company_officers",
        json!({ "companyNumber": number }),
        COMPANIES_TTL,
        Source::Direct,
        queries::company_officers(number),
    )
    .await
}

pub(super) async fn ccj_records(args: &Value, ctx: &AppContext) -> Result<Value> {
    let number = required_str(args, "companyNumber")?;
    cached_rows(
        ctx,
        "ccj_records",
        json!({ "companyNumber": number }),
        COMPANIES_TTL,
        Source::Direct,
        queries::ccj_records(number),
    )
    .await
}
