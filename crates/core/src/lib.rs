//! Domain building blocks shared by the try-on service crates.
//!
//! Holds the error type, the job lifecycle, the on-disk image store and
//! the parameterized workflow template.

pub mod error;
pub mod image_store;
pub mod types;
pub mod workflow;
