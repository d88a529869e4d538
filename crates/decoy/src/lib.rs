//! Decoy: imposter server with Mountebank-compatible stubs.
//!
//! Requests arriving on an imposter's port are normalized into a
//! [`request::Request`], matched against the imposter's stubs and answered with
//! a [`response::Response`] produced by an `is`, `proxy` or `inject` response
//! and its behaviors.

// ===== Engine =====
pub mod behaviors;
pub mod dry_run;
pub mod error;
pub mod predicate;
pub mod proxy;
pub mod request;
pub mod response;
pub mod stubs;

// ===== Server =====
pub mod config;
pub mod imposter;
pub mod protocols;

// Don't export internal modules
mod scripting;

pub use error::{DecoyError, ErrorDetail, ErrorEnvelope};
pub use imposter::{Imposter, ImposterError, ImposterManager};
pub use scripting::{new_state, ScriptState};
