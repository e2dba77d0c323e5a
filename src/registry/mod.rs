pub mod master;
pub mod misses;
pub mod overlay;
pub mod station;

pub use master::{MasterRegistry, MasterRegistryEntry, RegistryLookup};
pub use misses::{write_misses, MissRecord};
pub use overlay::{enrich, EnrichOutcome, OverwritePolicy};
pub use station::StationRules;
