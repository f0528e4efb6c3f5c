mod messages;
mod notifications;
mod requests;
mod settings;
mod users;

use anyhow::Result;

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::Database;
    use crate::models::UserRow;

    pub fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    pub fn resident(id: &str, email: &str) -> UserRow {
        UserRow {
            id: id.to_string(),
            name: format!("Resident {}", id),
            email: email.to_string(),
            phone: None,
            address: Some("Purok 3".to_string()),
            password: "$argon2id$stub".to_string(),
            role: "resident".to_string(),
            verified: false,
            submitted: false,
            id_image: None,
            error_note: None,
            verified_at: None,
            created_at: "2024-01-01T00:00:00+00:00".to_string(),
        }
    }
}
