//! # rulecraft-error
//!
//! Unified error handling for rulecraft, following OpenDAL's error handling practices.
//!
//! ## Design Philosophy
//!
//! - **ErrorKind**: Know what error occurred (e.g., InvalidInput, ExternalService)
//! - **ErrorStatus**: Decide how to handle it (Permanent, Temporary, Persistent)
//! - **Error Context**: Assist in locating the cause (stage, iteration, run)
//! - **Error Source**: Wrap underlying errors without leaking raw types
//!
//! ## Usage
//!
//! ```rust
//! use rulecraft_error::{Error, ErrorKind};
//!
//! fn example() -> Result<(), Error> {
//!     Err(Error::new(ErrorKind::ExternalService, "gateway returned 502")
//!         .with_operation("refiner::stage")
//!         .with_context("stage", "evaluate")
//!         .with_context("iteration", "2"))
//! }
//! ```
//!
//! ## Principles
//!
//! - All functions return `Result<T, rulecraft_error::Error>`
//! - External errors are wrapped with `set_source(err)`
//! - Same error handled once, subsequent ops only append context
//! - Don't abuse `From<OtherError>` to prevent raw error leakage

mod error;
mod kind;
mod status;

pub use error::Error;
pub use kind::ErrorKind;
pub use status::ErrorStatus;

/// Result type alias using rulecraft Error
pub type Result<T> = std::result::Result<T, Error>;
