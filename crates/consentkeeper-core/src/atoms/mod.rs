// ── ConsentKeeper Atoms Layer ──────────────────────────────────────────────
// Pure constants, error types and data model. No side effects, no I/O.
// Dependency rule: atoms may only depend on std and external pure crates.

pub mod constants;
pub mod error;
pub mod types;
