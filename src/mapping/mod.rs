//! Status mapping: raw status text to taxonomy category.
//!
//! [`MappingTable`] is an immutable, versioned snapshot of the manually
//! curated entries. [`StationDirectory`] knows which stations each line
//! serves and expands line-wide tokens in the mapping file.
//! [`UnmappedSummary`] reports the raw texts the table does not cover yet.

mod loader;
mod stations;
mod table;
mod unmapped;

pub use loader::{load_mapping_csv, read_mapping_entries};
pub use stations::StationDirectory;
pub use table::{MappingEntry, MappingTable, normalize_key};
pub use unmapped::UnmappedSummary;
