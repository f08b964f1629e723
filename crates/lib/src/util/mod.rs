//! Shared utilities.
//!
//! Hashing for content-addressed storage, directory copying, and test helpers.

pub mod fs;
pub mod hash;

#[cfg(test)]
pub mod testutil;
