//! m8dist-lib: Core types and logic for the m8dist release pipeline
//!
//! This crate builds and releases `remote-m8` for every platform in a build matrix:
//! - `deps`: pure mapping from a target platform to its native dependency set
//! - `descriptor`: the immutable build environment for one platform job
//! - `frontend`: fetching and injecting the pinned web frontend bundle
//! - `compile`: dependencies-only and full compilation over a content-addressed cache
//! - `patch`: declaring runtime-loaded libraries in Linux binaries
//! - `package`: stripped, deterministic archives with checksums
//! - `release`: tag matching and publishing to a release store
//! - `pipeline`: per-platform jobs and the parallel build matrix

pub mod compile;
pub mod config;
pub mod consts;
pub mod deps;
pub mod descriptor;
pub mod frontend;
pub mod package;
pub mod patch;
pub mod pipeline;
pub mod platform;
pub mod release;
pub mod util;
