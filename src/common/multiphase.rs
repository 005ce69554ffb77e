//! Immutable types that cross over multiple phases.
//!
//! Identifiers are lexed once and then passed unaltered between the lexer,
//! the parser, the analyzer, and the emitter, so they are cheap to clone.

use std::fmt;
use std::sync::Arc;

#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Identifier(pub Arc<String>);

impl Identifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Identifier {
    fn from(string: String) -> Self {
        Identifier(Arc::new(string))
    }
}

impl From<&str> for Identifier {
    fn from(string: &str) -> Self {
        Self::from(string.to_owned())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
