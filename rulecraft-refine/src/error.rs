//! Refinement errors (re-exported from rulecraft-error)

pub use rulecraft_error::{Error, ErrorKind, ErrorStatus, Result};
