//! Trace error types (re-exported from rulecraft-error)

pub use rulecraft_error::{Error, ErrorKind, Result};
