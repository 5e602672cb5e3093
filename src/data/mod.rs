/// Data layer: core types, loading, and filtering.
///
/// Architecture:
/// ```text
///  training.csv / .parquet   species_id.csv   neon-bands.csv
///        │                         │                │
///        ▼                         ▼                ▼
///   ┌──────────┐
///   │  loader   │  parse files → SpectralTable, SpeciesTable, BandTable
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  good-band columns, outlier rows → subset tables
///   └──────────┘
/// ```

pub mod filter;
pub mod loader;
pub mod model;

pub use model::{unique_sorted, BandTable, Label, SpeciesTable, SpectralTable};
