//! # mnemo-core
//!
//! Shared vocabulary for the Mnemo memory crates: the unified error type,
//! conversation roles and turns, and the identity a recall is issued for.

pub mod error;
pub mod message;
pub mod types;

pub use error::{MnemoError, Result};
pub use message::{Role, Turn};
pub use types::*;
