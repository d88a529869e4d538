//! Imposters and the registry that runs them.
//!
//! ## Module Structure
//!
//! - `types`: registry errors
//! - `core`: the Imposter struct (stubs, request log, counters)
//! - `manager`: ImposterManager for lifecycle management

mod core;
mod manager;
mod types;


pub use core::Imposter;
pub use manager::ImposterManager;
pub use types::ImposterError;
