//! # mnemo-config
//!
//! Configuration for the Mnemo memory system. Reads from `mnemo.toml`, then
//! applies environment variable overrides.
//!
//! The loader can reload the file on request, but consumers never read
//! configuration from shared state: they take a snapshot with
//! [`ConfigLoader::get`] and pass the relevant section into each operation.

pub mod schema;
pub mod loader;

pub use schema::MnemoConfig;
pub use schema::{
    ConfigWarning, EmbeddingConfig, EvaluatorConfig, LoggingConfig, MemoryConfig, ServicesConfig,
    WarningSeverity,
};
pub use loader::ConfigLoader;
