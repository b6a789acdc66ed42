//! # stackdb Testkit
//!
//! Test utilities for stackdb.
//!
//! This crate provides:
//! - Temporary on-disk stacks and schema files
//! - Property-based generators for values, dictionaries and DUI batches
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stackdb_testkit::prelude::*;
//!
//! #[test]
//! fn counts_people() {
//!     with_temp_stack(|stack| {
//!         let ctx = stack.background_context().unwrap();
//!         seed(&ctx, &[person(1, "Ada")]);
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
