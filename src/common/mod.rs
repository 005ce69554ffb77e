//! # Common Utilities
//!
//! These are common types that exist across all phases, such as the buffer
//! trait shared by the char source and the token cursor, source locations,
//! identifiers that pass from the lexer through to emission unaltered, and
//! the located error every phase reports through.
//!
//! As the different phases should be isolated as much as possible, this
//! module should be kept small to avoid heavy coupling.

pub mod error;
pub mod location;
pub mod multiphase;
pub mod peekable_buffer;
