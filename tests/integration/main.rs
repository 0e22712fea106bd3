//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! against mock adapters. All tests run on the host (x86_64) with no
//! radio required.

#![cfg(not(target_os = "espidf"))]

mod contention_tests;
mod host_tests;
