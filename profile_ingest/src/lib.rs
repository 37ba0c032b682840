//! Profiling trace ingestion and indexing.
//!
//! This crate turns raw profiler output into normalized, queryable
//! in-memory structures: frames, profiles and profile groups.
//!
//! # Modules
//!
//! - [`chrome`] - Detect and ingest Chrome trace event data
//! - [`frame`] - Normalize raw frame tables into a [`frame::FrameIndex`]
//! - [`profile`] - The [`profile::ProfileGroup`] output model
//!
//! # Supporting primitives
//!
//! - [`heap`] - Binary min-heap used for ordered merges
//! - [`memoize`] - Single-slot caches keyed by argument identity
//!
//! # Example
//!
//! ```no_run
//! use profile_ingest::chrome::parse_chrome_trace;
//! use std::fs;
//!
//! let contents = fs::read_to_string("trace.json").unwrap();
//! let group = parse_chrome_trace(&contents).unwrap();
//!
//! println!("{}: {} profiles", group.name, group.profiles.len());
//! ```

pub mod chrome;
pub mod frame;
pub mod heap;
pub mod memoize;
pub mod profile;
