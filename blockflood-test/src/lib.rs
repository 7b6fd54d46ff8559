//! Test utilities for blockflood.
//!
//! This crate provides utilities to facilitate testing the upload driver and the commit
//! coordinator. See the modules for all available utilities.

pub mod store;
pub mod tracing;
