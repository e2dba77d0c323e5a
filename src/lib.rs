//! Schema inference and monthly reconciliation for Yokohama childcare
//! capacity spreadsheets: locate headers in messy grids, resolve the
//! columns and the point-in-time month, join acceptance / waitlist /
//! enrollment sheets per facility, enrich from the curated master
//! registry, and persist one JSON snapshot per month.

pub mod errors;
pub mod fetch;
pub mod process;
pub mod reconcile;
pub mod registry;
pub mod run;
pub mod schema;
pub mod snapshot;
pub mod temporal;

pub use errors::SchemaError;
pub use process::RawGrid;
pub use reconcile::{FacilityRecord, Metrics};
pub use temporal::MonthLabel;
