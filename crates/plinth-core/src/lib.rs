//! # plinth-core
//!
//! Core library for plinth providing:
//! - The error taxonomy shared by every lifecycle component
//! - Configuration types and the hierarchical configuration loader
//! - Shared utilities (home directory resolution, identifier helpers)

pub mod config;
pub mod error;
pub mod types;
pub mod utils;

pub use config::HierarchicalConfigLoader;
pub use error::{Error, Result};
pub use types::PlinthConfig;
pub use utils::get_home_dir;
