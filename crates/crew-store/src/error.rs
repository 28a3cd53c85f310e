#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        table: &'static str,
        column: &'static str,
        detail: String,
    },

    #[error("IO error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_row_display() {
        let err = StoreError::CorruptRow {
            table: "checkpoints",
            column: "state",
            detail: "invalid JSON".into(),
        };
        assert_eq!(err.to_string(), "corrupt row in checkpoints.state: invalid JSON");
    }

    #[test]
    fn serde_error_converts() {
        let err: StoreError = serde_json::from_str::<u32>("x").unwrap_err().into();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
