mod artifact_tests;
mod build_tests;
mod cache_tests;
mod common;
