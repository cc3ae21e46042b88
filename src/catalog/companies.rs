//! Company registry records mirrored into the direct PostgreSQL database.

use super::Statement;

/// How a company is identified: through a customer's linked company, or by
/// its registry number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompanyRef<'a> {
    Account(&'a str),
    Number(&'a str),
}

pub fn company_profile(company: CompanyRef<'_>) -> Statement {
    let (filter, key) = match company {
        CompanyRef::Number(number) => ("cp.company_number = $1", number),
        CompanyRef::Account(account) => (
            r#"cp.company_number = (
                 SELECT company_number FROM customer_profile
                 WHERE "accountNumber" = $1 AND company_number IS NOT NULL
                 LIMIT 1)"#,
            account,
        ),
    };
    Statement::new(
        format!(
            "SELECT cp.id, cp.company_number, cp.company_name, cp.company_status,
                    cp.company_type, cp.incorporation_date, cp.dissolution_date,
                    cp.sic_codes, cp.jurisdiction, cp.has_insolvency_history,
                    cp.has_charges,
                    a.address_line_1, a.address_line_2, a.locality,
                    a.postal_code, a.region, a.country
             FROM company_profile cp
             LEFT JOIN address a ON cp.registered_office_address_id = a.id
             WHERE {filter}
             LIMIT 1"
        ),
        vec![key.into()],
    )
}

pub fn company_filings(company_number: &str, limit: i64) -> Statement {
    Statement::new(
        "SELECT id, company_number, filing_date, filing_type, description,
                category, transaction_id, link, retrieved_document
         FROM company_filing
         WHERE company_number = $1
         ORDER BY filing_date DESC
         LIMIT $2",
        vec![company_number.into(), limit.into()],
    )
}

pub fn company_officers(company_number: &str) -> Statement {
    Statement::new(
        "SELECT pp.id, pp.company_number, pp.is_director, pp.name,
                pp.role, pp.date_of_birth, pp.appointed_on, pp.resigned_on,
                a.address_line_1, a.locality, a.postal_code, a.country
         FROM person_profile pp
         LEFT JOIN address a ON pp.address_id = a.id
         WHERE pp.company_number = $1
         ORDER BY pp.is_director DESC, pp.appointed_on DESC",
        vec![company_number.into()],
    )
}

pub fn ccj_records(company_number: &str) -> Statement {
    Statement::new(
        "SELECT id, jurisdiction, case_num, category, transaction_type,
                company_name, trading_name, defendant_postcode, currency,
                amount, judgement_date, court_name,
                satisfaction_cancellation_date
         FROM ccj_records
         WHERE company_number = $1
         ORDER BY judgement_date DESC",
        vec![company_number.into()],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqlParam;

    #[test]
    fn profile_by_account_resolves_linked_company() {
        let stmt = company_profile(CompanyRef::Account("AC01"));
        assert!(stmt.sql.contains(r#"WHERE "accountNumber" = $1"#));
        assert_eq!(stmt.params, vec![SqlParam::Text("AC01".into())]);
    }

    #[test]
    fn profile_by_number_filters_directly() {
        let stmt = company_profile(CompanyRef::Number("01234567"));
        assert!(stmt.sql.contains("WHERE cp.company_number = $1"));
        assert!(!stmt.sql.contains("customer_profile"));
    }

    #[test]
    fn filings_are_newest_first_and_limited() {
        let stmt = company_filings("01234567", 5);
        assert!(stmt.sql.contains("ORDER BY filing_date DESC"));
        assert_eq!(
            stmt.params,
            vec![SqlParam::Text("01234567".into()), SqlParam::Int(5)]
        );
    }
}
