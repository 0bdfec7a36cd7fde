//! The sweep time series load generator.
//!
//! This library supports the sweep binary found elsewhere in this project. A
//! run enumerates every sensor and calendar day in the configured ranges,
//! renders a minute-resolution temperature series for each and streams the
//! result over HTTP to an ingestion sink, reporting the achieved throughput
//! as it goes.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]

pub mod config;
pub mod counters;
pub mod pipeline;
pub mod signals;
pub mod stats;
pub mod telemetry;
pub mod upload;
pub mod work;
