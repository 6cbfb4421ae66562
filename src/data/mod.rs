/// Data layer: run model, parsing, registries, and the collected tables.
///
/// Architecture:
/// ```text
///  run JSON (one per material/case)
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse document → ParsedRun
///   └──────────┘
///        │
///        ▼
///   ┌───────────┐     ┌──────────┐
///   │ collector  │ ──▶ │ registry │  nuclides + gamma grid
///   └───────────┘     └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │ Dataset   │  six column-oriented tables
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  key predicates → row indices
///   └──────────┘
/// ```
pub mod collector;
pub mod column;
pub mod elements;
pub mod filter;
pub mod loader;
pub mod model;
pub mod registry;
pub mod tables;
