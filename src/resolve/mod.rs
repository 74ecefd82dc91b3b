//! Argument resolution and concept expansion
//!
//! Turns parsed steps into executable result trees for one data-table row:
//! dynamic arguments are looked up, special arguments are read from disk and
//! concept invocations are expanded recursively.

#![allow(dead_code)]

mod concept;
mod lookup;
mod params;
mod special;

use std::path::PathBuf;
use thiserror::Error;

pub use concept::{ConceptDefinition, ConceptDictionary, ConceptError, StepResolver};
pub use lookup::ArgLookup;
pub use params::{actual_text, resolve_parameters};
pub use special::SpecialResolver;

/// Resolution failures
///
/// These only occur when validation was bypassed or the parsed input is
/// inconsistent, so callers treat them as fatal for the run.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Accessing an invalid parameter ({0})")]
    MissingParameter(String),

    #[error("Concept definition not found: {0}")]
    UnknownConcept(String),

    #[error("Recursive concept invocation: {}", .0.join(" -> "))]
    RecursiveConcept(Vec<String>),

    #[error("Concept '{signature}' expects {expected} arguments but got {found}")]
    ArgumentCount {
        signature: String,
        expected: usize,
        found: usize,
    },

    #[error("Resolver not found for special param <{0}>")]
    UnknownSpecialType(String),

    #[error("Failed to read special param file {}: {source}", .path.display())]
    SpecialFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read CSV table {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}
