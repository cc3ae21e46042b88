//! Financial queries against the ERP database.

use super::Statement;

pub fn transaction_history(account_number: &str, days: i64) -> Statement {
    Statement::new(
        "SELECT t.id, t.customer, t.invoice_number, t.transaction_date,
                t.transactionType, t.sales_amount, t.cogs_amount,
                t.magic_no, t.product_code,
                c.name AS customer_name, c.accountNumber
         FROM transaction t
         JOIN customer c ON t.customer = c.id
         WHERE c.accountNumber = ?
           AND t.transaction_date >= DATE_SUB(CURDATE(), INTERVAL ? DAY)
           AND t.transactionType = 'SL'
           AND t.ignoreTransaction = FALSE
         ORDER BY t.transaction_date DESC",
        vec![account_number.into(), days.into()],
    )
}

/// Last 24 monthly aged-debt snapshots.
pub fn debtor_days(account_number: &str) -> Statement {
    Statement::new(
        "SELECT dd.id, dd.customer, dd.month, dd.year, dd.running_balance,
                dd.days_beyond_terms, dd.insurance_limit, dd.credit_limit,
                dd.statement_balance,
                c.name AS customer_name, c.accountNumber
         FROM debtordays dd
         JOIN customer c ON dd.customer = c.id
         WHERE c.accountNumber = ?
         ORDER BY dd.year DESC, dd.month DESC
         LIMIT 24",
        vec![account_number.into()],
    )
}

pub fn outstanding_invoices(account_number: &str) -> Statement {
    Statement::new(
        "SELECT d.id, d.customer, d.document_number, d.document_type,
                d.document_date, d.remaining_balance, d.paid_balance,
                d.original_balance, d.due_date,
                c.name AS customer_name, c.accountNumber
         FROM documents d
         JOIN customer c ON d.customer = c.id
         WHERE c.accountNumber = ?
           AND d.remaining_balance > 0
         ORDER BY d.document_date DESC",
        vec![account_number.into()],
    )
}

/// Allocation dates are stored as `dd/mm/yyyy` text.
pub fn payment_history(account_number: &str, days: i64) -> Statement {
    Statement::new(
        "SELECT p.id, p.customer, p.documentNumber, p.amount,
                p.allocationDate, p.cashType,
                c.name AS customer_name, c.accountNumber
         FROM payments p
         JOIN customer c ON p.customer = c.id
         WHERE c.accountNumber = ?
           AND STR_TO_DATE(p.allocationDate, '%d/%m/%Y') >= DATE_SUB(CURDATE(), INTERVAL ? DAY)
         ORDER BY STR_TO_DATE(p.allocationDate, '%d/%m/%Y') DESC",
        vec![account_number.into(), days.into()],
    )
}

pub fn credit_status_history(account_number: &str) -> Statement {
    Statement::new(
        "SELECT cs.id, cs.customer, cs.prior_status, cs.new_status,
                cs.action_id, cs.timestamp,
                c.name AS customer_name, c.accountNumber
         FROM creditstatus cs
         JOIN customer c ON cs.customer = c.id
         WHERE c.accountNumber = ?
         ORDER BY cs.timestamp DESC",
        vec![account_number.into()],
    )
}

pub fn outstanding_orders(account_number: &str) -> Statement {
    Statement::new(
        "SELECT oo.id, oo.customer, oo.order_number, oo.order_date,
                oo.delivery_date, oo.order_value, oo.product_code,
                oo.quantity,
                c.name AS customer_name, c.accountNumber
         FROM outstandingorders oo
         JOIN customer c ON oo.customer = c.id
         WHERE c.accountNumber = ?
         ORDER BY oo.order_date DESC",
        vec![account_number.into()],
    )
}

pub fn payment_plans(account_number: &str) -> Statement {
    Statement::new(
        "SELECT pp.id, pp.customer, pp.plan_date, pp.amount,
                pp.frequency, pp.status,
                c.name AS customer_name, c.accountNumber
         FROM paymentplan pp
         JOIN customer c ON pp.customer = c.id
         WHERE c.accountNumber = ?
         ORDER BY pp.plan_date DESC",
        vec![account_number.into()],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqlParam;

    #[test]
    fn placeholder_count_matches_params() {
        let statements = [
            transaction_history("AC01", 365),
            debtor_days("AC01"),
            outstanding_invoices("AC01"),
            payment_history("AC01", 90),
            credit_status_history("AC01"),
            outstanding_orders("AC01"),
            payment_plans("AC01"),
        ];
        for stmt in statements {
            assert_eq!(stmt.sql.matches('?').count(), stmt.params.len(), "{}", stmt.sql);
            assert_eq!(stmt.params[0], SqlParam::Text("AC01".into()));
        }
    }
}
