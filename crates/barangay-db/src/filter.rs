use barangay_types::models::Role;
use rusqlite::types::Value;

/// Conjunction of equality predicates over the `users` table.
///
/// Unset fields don't constrain the match. There is no OR: the portal's
/// membership questions are all simple AND compositions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub verified: Option<bool>,
    pub submitted: Option<bool>,
}

impl UserFilter {
    /// `verified = false AND role = 'resident' AND submitted = true`
    pub fn pending_verification() -> Self {
        Self {
            role: Some(Role::Resident),
            verified: Some(false),
            submitted: Some(true),
        }
    }

    /// `verified = true AND role = 'resident'`
    pub fn verified_residents() -> Self {
        Self {
            role: Some(Role::Resident),
            verified: Some(true),
            submitted: None,
        }
    }

    /// Render as a `WHERE ...` fragment (empty when unconstrained) plus its
    /// positional parameters.
    pub(crate) fn to_sql(&self) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut params = Vec::new();

        if let Some(role) = self.role {
            clauses.push("role = ?");
            params.push(Value::Text(role.as_str().to_string()));
        }
        if let Some(verified) = self.verified {
            clauses.push("verified = ?");
            params.push(Value::Integer(verified as i64));
        }
        if let Some(submitted) = self.submitted {
            clauses.push("submitted = ?");
            params.push(Value::Integer(submitted as i64));
        }

        if clauses.is_empty() {
            (String::new(), params)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), params)
        }
    }
}
