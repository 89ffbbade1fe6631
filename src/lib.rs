//! tcache - transform-and-cache engine
//!
//! Runs source files through pluggable transformer plugins and memoizes
//! the output in an in-process cache and a durable, content-addressed
//! on-disk cache. Optional coverage instrumentation is orchestrated around
//! the transformer and its source map is composed with the transformer's.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod fs;
pub mod pipeline;
pub mod sourcemap;
pub mod transform;

pub use error::{TcacheError, TcacheResult};
pub use pipeline::{TransformPipeline, TransformRequest, TransformResult};
