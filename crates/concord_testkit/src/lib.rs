//! # Concord Testkit
//!
//! Test utilities for concord.
//!
//! This crate provides:
//! - Fixtures: a manual clock, a reference TTL set state machine, and
//!   temp-log helpers
//! - Property-based test generators using proptest
//! - A crash-recovery harness for mangling segment files
//!
//! ## Usage
//!
//! ```rust
//! use concord_testkit::fixtures::TtlSetHarness;
//!
//! let harness = TtlSetHarness::open();
//! harness.clock.set(1000);
//! // ... drive the log and runtime
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
