use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unrecognised status category '{0}'")]
pub struct ParseCategoryError(pub String);

/// Defects in a mapping table or station directory. These are caught before
/// any classification runs; a missing entry is never one of them.
#[derive(Error, Debug)]
pub enum MappingError {
    #[error("mapping row {row}: raw_text is empty")]
    EmptyKey { row: usize },

    #[error("mapping row {row}: {source}")]
    Category {
        row: usize,
        #[source]
        source: ParseCategoryError,
    },

    #[error("conflicting mapping entries for '{key}': {first} vs {second}")]
    Conflict {
        key: String,
        first: String,
        second: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}
