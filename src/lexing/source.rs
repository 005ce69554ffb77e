//! A source is an input file fronted by a `PeekableBuffer` that hides how
//! the file is actually loaded. It currently loads the entire file into
//! memory in a single read, as modern systems tend to make IO system calls
//! relatively expensive compared to allocating a larger piece of memory.
//!
//! The source tracks the human-readable line and column of its cursor as
//! characters are consumed, which is where the locations on lexed tokens
//! come from.

use crate::common::location::Location;
use crate::common::peekable_buffer::PeekableBuffer;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Position {
    /// Suitable for calculating offsets in the lexer.
    absolute_character_index: usize,

    // For human consumption in error messages; not designed for
    // calculating offsets.
    character_position_in_line: usize,
    line: usize,
}

impl Position {
    fn update(&mut self, read: char, next: Option<char>) {
        self.absolute_character_index += 1;
        match read {
            '\n' => self.increment_line(),
            // A lone carriage return is a Classic MacOS newline; one
            // followed by a line feed is a Windows newline whose line bump
            // is deferred to the line feed.
            '\r' if next != Some('\n') => self.increment_line(),
            '\r' => {}
            _ => self.character_position_in_line += 1,
        }
    }

    fn increment_line(&mut self) {
        self.character_position_in_line = 1;
        self.line += 1;
    }
}

impl Default for Position {
    fn default() -> Self {
        Self {
            absolute_character_index: 0,
            character_position_in_line: 1,
            line: 1,
        }
    }
}

impl From<Position> for Location {
    fn from(position: Position) -> Self {
        Location::new(position.line, position.character_position_in_line)
    }
}

pub struct Source {
    content: Vec<char>,
    pub position: Position,
}

impl Source {
    pub fn location(&self) -> Location {
        self.position.into()
    }
}

impl From<Vec<char>> for Source {
    fn from(content: Vec<char>) -> Self {
        Self {
            content,
            position: Default::default(),
        }
    }
}

impl From<&str> for Source {
    fn from(source: &str) -> Self {
        Self::from(source.chars().collect::<Vec<char>>())
    }
}

impl PeekableBuffer<char> for Source {
    fn peek_nth(&self, n: usize) -> Option<&char> {
        self.content.get(self.position.absolute_character_index + n)
    }

    fn read(&mut self) -> Option<char> {
        let index = self.position.absolute_character_index;
        let c = *self.content.get(index)?;
        let next = self.content.get(index + 1).copied();
        self.position.update(c, next);
        Some(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_source(s: &str) -> Source {
        Source::from(s)
    }

    #[test]
    fn peeking_and_reading() {
        let mut source = test_source("this is a test");

        assert_eq!(Some(&'t'), source.peek());
        assert_eq!(Some(&'h'), source.peek_nth(1));
        assert_eq!(Some('t'), source.read());
        assert_eq!(Some('h'), source.read());
        assert!(source.discard_many("is is a tes".len()));
        assert_eq!(Some(&'t'), source.peek());
        source.discard();
        assert!(source.peek().is_none());
        assert!(!source.discard());
    }

    #[test]
    fn position_tracking() {
        let test_line = "test line";

        let unix = '\n';
        let windows = "\r\n";
        let mac_os_classic = '\r';

        let mut source = test_source(&format!(
            "{}{}{}{}{}{}{}",
            test_line, unix, test_line, windows, test_line, mac_os_classic, test_line
        ));

        assert_eq!(source.position, Position::default());
        assert_eq!(source.location(), Location::new(1, 1));

        source.discard_many(test_line.len() + 1);
        assert_eq!(source.location(), Location::new(2, 1));

        source.discard_many(4);
        assert_eq!(source.location(), Location::new(2, 5));

        // Through the Windows newline without double-counting it.
        source.discard_many(test_line.len() - 4 + 2);
        assert_eq!(source.location(), Location::new(3, 1));

        source.discard_many(test_line.len() + 1);
        assert_eq!(source.location(), Location::new(4, 1));
    }
}
