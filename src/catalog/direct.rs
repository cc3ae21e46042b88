//! Queries against the direct PostgreSQL database.

use super::{contains_pattern, page_offset, Statement};
use crate::db::SqlParam;

const LIST_SORT_FIELDS: &[&str] = &[
    "name",
    "risk_rating",
    "running_balance",
    "days_beyond_terms",
    "credit_usage",
    "transaction_volume",
    "risk_score",
];

pub fn customer_lookup(query: &str) -> Statement {
    Statement::new(
        r#"SELECT id, "accountNumber", name, prospect, risk_rating
           FROM mv_customer_metrics
           WHERE ("name" ILIKE $1 OR "accountNumber" ILIKE $1)
             AND "name" IS NOT NULL AND "name" != ''
           ORDER BY name
           LIMIT 20"#,
        vec![contains_pattern(query).into()],
    )
}

pub fn customer_profile(account_number: &str) -> Statement {
    Statement::new(
        r#"SELECT
             mv.id, mv."accountNumber", mv.name, mv.branch,
             mv."creditLimit", mv."creditTerms", mv.legal, mv.on_stop,
             mv."accountManagerId", mv."accountManagerName",
             mv.insurance_limit, mv.prospect,
             mv.ytd_transaction_volume, mv.transaction_volume,
             mv.running_balance, mv.credit_usage, mv.allocated_transaction_volume,
             mv.risk_score, mv.risk_rating,
             mv.days_beyond_terms, mv.weighted_days_beyond_terms,
             mv.remaining_invoice_balance, mv.on_stop_status,
             mv.experian_credit_limit, mv.experian_credit_score,
             mv.last_site_visit, mv.visits_ytd,
             cp.company_number, cp.sleep_until_date, cp.sleep_reason, cp."accountSince"
           FROM mv_customer_metrics mv
           LEFT JOIN customer_profile cp ON mv.id = cp.id
           WHERE mv."accountNumber" = $1
           LIMIT 1"#,
        vec![account_number.into()],
    )
}

/// Filters and paging for [`customer_list`].
#[derive(Debug, Clone, Default)]
pub struct CustomerListFilter {
    pub page: i64,
    pub limit: i64,
    pub branch: Option<String>,
    pub rep_id: Option<String>,
    pub risk_rating: Option<i64>,
    pub on_stop: Option<bool>,
    pub sort_by: String,
    pub descending: bool,
}

/// Returns `(count, page)` statements sharing the same filter.
pub fn customer_list(filter: &CustomerListFilter) -> (Statement, Statement) {
    let mut conditions = vec![r#""name" IS NOT NULL"#.to_string(), r#""name" != ''"#.to_string()];
    let mut params: Vec<SqlParam> = Vec::new();

    if let Some(branch) = &filter.branch {
        params.push(branch.clone().into());
        conditions.push(format!("branch = ${}", params.len()));
    }
    if let Some(rep_id) = &filter.rep_id {
        params.push(rep_id.clone().into());
        conditions.push(format!(r#""accountManagerId"::text = ${}"#, params.len()));
    }
    if let Some(rating) = filter.risk_rating {
        params.push(rating.into());
        conditions.push(format!("CAST(risk_rating AS INTEGER) = ${}", params.len()));
    }
    if let Some(on_stop) = filter.on_stop {
        params.push(on_stop.into());
        conditions.push(format!("on_stop = ${}", params.len()));
    }

    let where_clause = format!("WHERE {}", conditions.join(" AND "));
    let sort_by = if LIST_SORT_FIELDS.contains(&filter.sort_by.as_str()) {
        filter.sort_by.as_str()
    } else {
        "name"
    };
    let order = if filter.descending { "DESC" } else { "ASC" };

    let count = Statement::new(
        format!("SELECT COUNT(*) AS total FROM mv_customer_metrics {where_clause}"),
        params.clone(),
    );

    let limit_idx = params.len() + 1;
    let offset_idx = params.len() + 2;
    let mut page_params = params;
    page_params.push(filter.limit.into());
    page_params.push(page_offset(filter.page, filter.limit).into());

    let page = Statement::new(
        format!(
            r#"SELECT
                 id, "accountNumber", name, branch, "creditLimit", "creditTerms",
                 on_stop, "accountManagerName", insurance_limit, prospect,
                 risk_rating, risk_score, running_balance, days_beyond_terms,
                 credit_usage, transaction_volume, ytd_transaction_volume,
                 remaining_invoice_balance, experian_credit_limit
               FROM mv_customer_metrics
               {where_clause}
               ORDER BY "{sort_by}" {order} NULLS LAST
               LIMIT ${limit_idx} OFFSET ${offset_idx}"#
        ),
        page_params,
    );

    (count, page)
}

pub fn customer_intelligence(account_number: &str, limit: i64) -> Statement {
    Statement::new(
        r#"SELECT i.id, i.account_number, i.customer_name, i.intelligence_type,
                  i.title, i.value, i.call_id, i.timestamp, i.rep_name, i.version
           FROM intelligence i
           JOIN customer_profile cp ON i.customer_id = cp.id
           WHERE cp."accountNumber" = $1
           ORDER BY i.timestamp DESC
           LIMIT $2"#,
        vec![account_number.into(), limit.into()],
    )
}

pub fn customer_alerts_history(account_number: &str, limit: i64) -> Statement {
    Statement::new(
        "SELECT a.id, a.account_number, a.customer_name, a.score, a.timestamp,
                a.explanation, a.explanation_summary, a.feature_data,
                a.rating, a.action, a.reviewer_name
         FROM alerts a
         WHERE a.account_number = $1
         ORDER BY a.timestamp DESC
         LIMIT $2",
        vec![account_number.into(), limit.into()],
    )
}

pub fn customer_metric_history(account_number: &str, metric_type: &str, days: i64) -> Statement {
    Statement::new(
        r#"SELECT cme.time_period, cme.value, cme.metric_type
           FROM customer_metric_events cme
           JOIN customer_profile cp ON cme.customer_id = cp.id
           WHERE cp."accountNumber" = $1
             AND cme.metric_type = $2
             AND cme.time_period >= NOW() - make_interval(days => $3::int)
           ORDER BY cme.time_period ASC"#,
        vec![account_number.into(), metric_type.into(), days.into()],
    )
}

pub fn risk_distribution(branch: Option<&str>) -> Statement {
    let (where_clause, params) = match branch {
        Some(branch) => ("WHERE branch = $1", vec![branch.into()]),
        None => ("", Vec::new()),
    };
    Statement::new(
        format!(
            r#"SELECT
                 COALESCE(CAST(risk_rating AS INTEGER), -1) AS risk_rating,
                 COUNT(*) AS count,
                 SUM(running_balance) AS total_balance,
                 AVG(days_beyond_terms) AS avg_days_beyond_terms,
                 SUM("creditLimit") AS total_credit_limit
               FROM mv_customer_metrics
               {where_clause}
               GROUP BY COALESCE(CAST(risk_rating AS INTEGER), -1)
               ORDER BY risk_rating ASC"#
        ),
        params,
    )
}

/// Unreviewed alerts, most severe first.
pub fn current_alerts(limit: i64, min_rating: Option<&str>) -> Statement {
    let mut conditions = vec!["a.action IS NULL".to_string()];
    let mut params: Vec<SqlParam> = Vec::new();
    if let Some(rating) = min_rating {
        params.push(rating.into());
        conditions.push(format!("a.rating >= ${}", params.len()));
    }
    params.push(limit.into());
    Statement::new(
        format!(
            "SELECT a.id, a.account_number, a.customer_name, a.score,
                    a.timestamp, a.explanation_summary, a.feature_data,
                    a.rating, a.should_notify
             FROM alerts a
             WHERE {}
             ORDER BY a.score DESC, a.timestamp DESC
             LIMIT ${}",
            conditions.join(" AND "),
            params.len()
        ),
        params,
    )
}

pub fn risk_event_detail(alert_id: &str) -> Statement {
    Statement::new(
        "SELECT a.id, a.account_number, a.customer_id, a.customer_name,
                a.score, a.timestamp, a.explanation, a.explanation_summary,
                a.feature_data, a.rating, a.action, a.reviewer_name,
                a.reviewer_id, a.should_notify, a.version,
                re.risk_rating, re.classifier_output, re.score AS risk_score
         FROM alerts a
         LEFT JOIN risk_events re ON re.customer_id = a.customer_id
           AND DATE(re.time_period) = DATE(a.timestamp)
         WHERE a.id::text = $1
         LIMIT 1",
        vec![alert_id.into()],
    )
}

pub fn overview_metrics() -> Statement {
    Statement::new(
        "SELECT *
         FROM overview_metrics
         WHERE time_period_type = 'DAILY'
         ORDER BY time_period DESC
         LIMIT 1",
        Vec::new(),
    )
}

pub fn recent_notifications(account_number: Option<&str>, limit: i64) -> Statement {
    let select = "SELECT uae.id, uae.account_number, uae.timestamp,
                         uae.user_name, uae.action, uae.comment,
                         cp.name AS customer_name
                  FROM user_action_events uae
                  LEFT JOIN customer_profile cp ON uae.customer_id = cp.id";
    match account_number {
        Some(account) => Statement::new(
            format!(
                "{select}
                 WHERE uae.account_number = $1
                 ORDER BY uae.timestamp DESC
                 LIMIT $2"
            ),
            vec![account.into(), limit.into()],
        ),
        None => Statement::new(
            format!(
                "{select}
                 ORDER BY uae.timestamp DESC
                 LIMIT $1"
            ),
            vec![limit.into()],
        ),
    }
}

/// Alert fields needed to compose a notification email.
pub fn alert_for_notification(alert_id: &str) -> Statement {
    Statement::new(
        "SELECT a.id, a.account_number, a.customer_name, a.score,
                a.explanation_summary, a.rating, a.timestamp
         FROM alerts a
         WHERE a.id::text = $1
         LIMIT 1",
        vec![alert_id.into()],
    )
}

/// Customer name and account manager for a missing-information request.
pub fn customer_contact_summary(account_number: &str) -> Statement {
    Statement::new(
        r#"SELECT "accountNumber", name, "accountManagerName"
           FROM mv_customer_metrics
           WHERE "accountNumber" = $1
           LIMIT 1"#,
        vec![account_number.into()],
    )
}
