//! Territory Report Core - territory/address matching and report assembly
//!
//! The pipeline has four stages per territory:
//! 1. **Load**: addresses from a KML point source, territories from a CSV table
//! 2. **Match**: project both into one working CRS and keep the addresses
//!    strictly inside each boundary
//! 3. **Format**: display strings, natural house-number order, street groups
//! 4. **Assemble**: title, composed map image and grouped address table as
//!    an abstract `ReportDocument`

pub mod address;
pub mod address_store;
pub mod assembler;
pub mod config;
pub mod formatter;
pub mod geometry;
pub mod map_image;
pub mod projection;
pub mod spatial;
pub mod territory;

// Re-export key types for convenience
pub use address::{Address, AddressCollection, AddressComponent};
pub use address_store::{AddressLoad, AddressSourceError, AddressStore};
pub use assembler::{AssembledReport, DocumentAssembler, MapImage, TableContent};
pub use config::{ConfigError, ReportConfig};
pub use formatter::{format_address, natural_sort_key, sort_and_group, FormattedAddress, NaturalKey, StreetGroup};
pub use geometry::{GeometryError, InvalidReason};
pub use map_image::{ComposedMap, MapComposer};
pub use projection::{ProjectionError, Reproject};
pub use spatial::{FilterError, FilteredAddressSet, SpatialFilter};
pub use territory::{InputError, Territory, TerritoryError, TerritoryLoader, TerritoryRow, TerritoryTable};
