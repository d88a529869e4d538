//! Stubs and the repository that resolves requests against them.

mod repository;
mod types;

pub use repository::{RepositoryOptions, StubRepository};
pub use types::{Match, ResponseConfig, ResponseKind, Stub};
