//! Compiles parsed queries, updates, projections and sorts into closures applied to
//! in-memory documents.

pub mod filters;
pub mod projections;
pub mod sort;
pub mod updates;
