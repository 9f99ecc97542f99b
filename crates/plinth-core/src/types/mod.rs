//! Type definitions shared across plinth crates

mod config_types;

pub use config_types::{
    CatalogConfig, ExtensionsConfig, PathsConfig, PlinthConfig, RunnerConfig, UpdatesConfig,
};
