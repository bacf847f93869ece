//! # Coinsnap TX - Transform Implementations
//!
//! The two transform stages between the fetcher and the sinks:
//!
//! - **Normalize**: flatten the raw JSON record sequence into a uniform
//!   [`coinsnap_core::Table`] with a union schema
//! - **Clean**: run the declared per-dataset policy (coercion, date
//!   reduction, pruning, null substitution, rounding) in order
//!
//! Both stages are pure: each consumes its input and returns a new table
//! state or a single error identifying what failed.

/// Cleaning pipeline over a normalized table
pub mod clean;

/// JSON record flattening into a tabular schema
pub mod normalize;

pub use clean::clean;
pub use normalize::normalize;
