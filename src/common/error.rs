//! The error type shared by every phase.
//!
//! All failures in the pipeline are located errors: a message plus the
//! source location it arose at. The first error aborts the current
//! invocation; no phase attempts recovery. The CLI is responsible for the
//! full `[error] <message> in "<file>" at [<line>:<col>]` rendering, since
//! only it knows the input path.

use thiserror::Error;

use crate::common::location::Location;

#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{message} at {location}")]
pub struct LocatedError {
    pub message: String,
    pub location: Location,
}

impl LocatedError {
    pub fn new(message: impl Into<String>, location: Location) -> Self {
        Self {
            message: message.into(),
            location,
        }
    }
}
