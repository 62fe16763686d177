//! Deterministic projections from the inventory to the Xtream/Stremio wire
//! formats (C10). Pure functions only — the HTTP route handlers that call
//! these and shape JSON responses are the thin edge layer and out of scope.

pub mod stremio_export;
pub mod xtream_export;
