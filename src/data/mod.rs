/// Data layer: core types, loading, and normalization.
///
/// Architecture:
/// ```text
///  device export (.csv)
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  8-line metadata block + raw table
///   └──────────┘
///        │
///        ▼
///   ┌───────────┐
///   │ normalize  │  DeviceFamily → (dBA, Date, Time) rows
///   └───────────┘
///        │
///        ▼
///   NormalizedFile  metadata + Normalization
/// ```

pub mod loader;
pub mod model;
pub mod normalize;
