//! # rulecraft-refine
//!
//! The refiner drives an iterative self-refinement loop over a cell library:
//! 1. The gateway writes initial consistency rules from the library text
//! 2. An evaluation prompt checks each rule against the library and keeps the best
//! 3. A reformat prompt strips the evaluation back to Rule / Example / Interpretation
//! 4. Steps 2-3 repeat until the rules stop changing or the iteration bound is hit
//!
//! Every stage is traced through an optional recorder.

pub mod error;
pub mod document;
pub mod prompt;
mod refiner;

pub use error::{Error, ErrorKind, Result};
pub use document::{LibraryDocument, RuleSet};
pub use prompt::{PromptSet, ISOLATION_FOCUS};
pub use refiner::{Refinement, Refiner, Stage};
