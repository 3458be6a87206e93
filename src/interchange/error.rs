use thiserror::Error;

/// Appended to every container failure.
pub const TEXT_EXPORT_HINT: &str =
    "export the deck from Anki as \"Notes in Plain Text (.txt)\" or CSV and import that instead";

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Malformed package: {0}; {hint}", hint = TEXT_EXPORT_HINT)]
    MalformedContainer(String),

    #[error("No valid cards found in {0}")]
    EmptyResult(String),

    #[error("Invalid JSON dump: {0}")]
    InvalidDump(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<zip::result::ZipError> for ImportError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::MalformedContainer(format!("unreadable archive ({})", err))
    }
}

impl From<rusqlite::Error> for ImportError {
    fn from(err: rusqlite::Error) -> Self {
        Self::MalformedContainer(format!("unreadable collection database ({})", err))
    }
}

impl From<serde_json::Error> for ImportError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidDump(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ImportError>;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_errors_carry_hint() {
        let err = ImportError::from(zip::result::ZipError::InvalidArchive("bad".into()));
        assert!(matches!(err, ImportError::MalformedContainer(_)));
        assert!(err.to_string().contains("Plain Text"));
    }
}
