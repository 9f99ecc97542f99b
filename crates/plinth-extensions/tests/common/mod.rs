//! Common test utilities for plinth-extensions
//!
//! This module provides shared test infrastructure including:
//! - Constants for identifiers and manifests
//! - Site fixtures that write extensions into a temporary directory
//! - Fakes for the migration runner and the catalog transport

#![allow(dead_code)]
#![allow(unused_imports)]

pub mod constants;
pub mod fixtures;
pub mod mocks;

pub use constants::*;
pub use fixtures::*;
pub use mocks::*;
