//! Customer and staff queries against the management-information database.

use super::{contains_pattern, page_offset, Statement};
use crate::db::SqlParam;

pub fn customer_search(query: &str, limit: i64) -> Statement {
    let pattern = contains_pattern(query);
    Statement::new(
        "SELECT c.id, c.account_number, c.name, c.line1, c.line2,
                c.line3, c.line4, c.line5, c.postcode, c.phone, c.email,
                c.creditTerms, c.credit_limit,
                b.name AS branchName,
                r.fullname AS repName
         FROM customer c
         LEFT JOIN branch b ON c.branch = b.id
         LEFT JOIN repDetails r ON c.rep = r.id
         WHERE c.account_number LIKE ? OR c.name LIKE ? OR c.email LIKE ? OR c.postcode LIKE ?
         ORDER BY c.name
         LIMIT ?",
        vec![
            pattern.clone().into(),
            pattern.clone().into(),
            pattern.clone().into(),
            pattern.into(),
            limit.into(),
        ],
    )
}

pub fn customer_detail(account_number: &str) -> Statement {
    Statement::new(
        "SELECT c.*,
                b.name AS branchName,
                r.fullname AS repName
         FROM customer c
         LEFT JOIN branch b ON c.branch = b.id
         LEFT JOIN repDetails r ON c.rep = r.id
         WHERE c.account_number = ?",
        vec![account_number.into()],
    )
}

pub fn customer_contacts(account_number: &str, include_inactive: bool) -> Statement {
    let active_clause = if include_inactive { "" } else { "AND co.active = 1" };
    Statement::new(
        format!(
            "SELECT co.id, co.contact_number, co.firstName, co.lastName, co.fullName,
                    co.email, co.phone, co.mobile, co.contact_type,
                    co.interestBuilding, co.interestTimber, co.interestLandscaping,
                    co.interestPlumbing, co.interestKB, co.interestFibo,
                    co.brevoContactId, co.businessType,
                    co.active, co.gdpr, co.created, co.updated
             FROM contactDetails co
             JOIN customer c ON co.customer = c.id
             WHERE c.account_number = ? {active_clause}
             ORDER BY co.lastName, co.firstName"
        ),
        vec![account_number.into()],
    )
}

pub fn customer_notes(account_number: &str, limit: i64) -> Statement {
    Statement::new(
        "SELECT n.id, n.messageType, n.message, n.payload, n.noteDate, n.created
         FROM customerNotes n
         JOIN customer c ON n.customer = c.id
         WHERE c.account_number = ?
         ORDER BY n.noteDate DESC
         LIMIT ?",
        vec![account_number.into(), limit.into()],
    )
}

/// Sort keys accepted by [`customers_by_branch`], mapped to columns.
fn branch_sort_column(sort_by: &str) -> &'static str {
    match sort_by {
        "accountNumber" => "c.account_number",
        "creditLimit" => "c.credit_limit",
        _ => "c.name",
    }
}

pub fn customers_by_branch(branch_name: &str, page: i64, limit: i64, sort_by: &str) -> Statement {
    Statement::new(
        format!(
            "SELECT c.id, c.account_number, c.name, c.creditTerms, c.credit_limit,
                    c.email, c.phone,
                    r.fullname AS repName
             FROM customer c
             JOIN branch b ON c.branch = b.id
             LEFT JOIN repDetails r ON c.rep = r.id
             WHERE b.name = ?
             ORDER BY {}
             LIMIT ? OFFSET ?",
            branch_sort_column(sort_by)
        ),
        vec![branch_name.into(), limit.into(), page_offset(page, limit).into()],
    )
}

pub fn branch_list() -> Statement {
    Statement::new(
        "SELECT b.id, b.branch_id, b.name, b.email, b.brevoUser,
                COUNT(DISTINCT c.id) AS customer_count
         FROM branch b
         LEFT JOIN customer c ON c.branch = b.id
         GROUP BY b.id, b.branch_id, b.name, b.email, b.brevoUser
         ORDER BY b.name",
        Vec::new(),
    )
}

pub fn rep_list(branch_name: Option<&str>, active_only: bool) -> Statement {
    let mut conditions = Vec::new();
    let mut params: Vec<SqlParam> = Vec::new();
    if active_only {
        conditions.push("r.is_active = 1");
    }
    if let Some(branch) = branch_name {
        conditions.push("b.name = ?");
        params.push(branch.into());
    }
    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    Statement::new(
        format!(
            "SELECT r.id, r.rep_id, r.fullname, r.email, r.mobile, r.k8User, r.is_active,
                    b.name AS primaryBranch,
                    COUNT(DISTINCT c.id) AS customer_count
             FROM repDetails r
             LEFT JOIN customer c ON c.rep = r.id
             LEFT JOIN branch b ON c.branch = b.id
             {where_clause}
             GROUP BY r.id, r.rep_id, r.fullname, r.email, r.mobile, r.k8User, r.is_active, b.name
             ORDER BY r.fullname"
        ),
        params,
    )
}
