#![forbid(unsafe_code)]

//! SQLite-backed authoritative store for arbor trees.

mod store;

pub use store::*;
