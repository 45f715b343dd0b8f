//! Batched render cache.
//!
//! Renders batches of objects through a [`cache::RenderController`], serving
//! unchanged output from a [`cache::CacheStore`] and rendering only the misses.

pub mod cache;
pub mod config;
pub mod infra;
