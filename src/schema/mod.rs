pub mod columns;
pub mod header;

pub use columns::{ColumnMap, ColumnSynonyms, Confidence, Field, ResolvedColumn};
pub use header::{find_header_index, sanitize_header};
