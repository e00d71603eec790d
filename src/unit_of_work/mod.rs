//! Unit of Work module
//!
//! Scoped transactions over event appends and publications, with listener
//! hooks for prepare, commit and rollback, and nesting through a context.

mod context;
mod error;
mod listener;
mod unit;

pub use context::UnitOfWorkContext;
pub use error::{CommitError, HookError, RollbackCause, UnitOfWorkError};
pub use listener::UnitOfWorkListener;
pub use unit::{CommitHandler, StagedEvents, UnitOfWork, UnitOfWorkState};
