//! # Lexing
//!
//! The lexer turns a source file into a finite stream of located tokens:
//! integer and double literals, single-quoted char literals, double-quoted
//! string literals, identifiers, keywords, and symbols. The stream always
//! ends with a single EOF token.
//!
//! Unlike front-ends that feed the parser from a channel, lexing here runs
//! eagerly to completion before parsing starts; the pipeline is strictly
//! single-threaded and each pass finishes before the next begins. The
//! parser consumes the lexed vector through [Tokens], a cursor buffer whose
//! `position`/`seek` pair is what the parser's speculative
//! checkpoint-and-rewind is built on.

mod char_escapes;
mod keywords;

pub mod lexer;
pub mod source;
pub mod tokens;

use crate::common::peekable_buffer::PeekableBuffer;
use crate::lexing::lexer::LexedToken;
use crate::lexing::tokens::Token;

/// A rewindable cursor over a fully lexed token stream.
pub struct Tokens {
    tokens: Vec<LexedToken>,
    cursor: usize,
}

impl From<Vec<LexedToken>> for Tokens {
    fn from(tokens: Vec<LexedToken>) -> Self {
        debug_assert!(matches!(
            tokens.last(),
            Some(LexedToken { token: Token::Eof, .. })
        ));
        Self { tokens, cursor: 0 }
    }
}

impl Tokens {
    /// The current token, or the trailing EOF token if the cursor ran past
    /// the end. Having EOF be an ordinary token simplifies logic over
    /// handling it in a special typed manner in every parsing case.
    pub fn top(&self) -> &LexedToken {
        self.tokens
            .get(self.cursor)
            .or_else(|| self.tokens.last())
            .expect("a token stream always contains at least the EOF token")
    }

    /// The location of the current token, for error reporting.
    pub fn location(&self) -> crate::common::location::Location {
        self.top().location
    }

    /// The cursor, suitable for a later `seek`. Rewinding lives here rather
    /// than on `PeekableBuffer` because only token streams support it.
    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn seek(&mut self, position: usize) {
        self.cursor = position.min(self.tokens.len());
    }
}

impl PeekableBuffer<LexedToken> for Tokens {
    fn peek_nth(&self, n: usize) -> Option<&LexedToken> {
        self.tokens.get(self.cursor + n)
    }

    fn read(&mut self) -> Option<LexedToken> {
        let token = self.tokens.get(self.cursor).cloned();
        if token.is_some() {
            self.cursor += 1;
        }
        token
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::lexer::Lexer;
    use super::source::Source;
    use super::tokens::{Literal, Symbol};
    use super::*;

    fn test_tokens(s: &str) -> Tokens {
        Tokens::from(Lexer::from(Source::from(s)).lex_all().unwrap())
    }

    #[test]
    fn peeking_and_reading() {
        let mut tokens = test_tokens("f(1, 2)");

        assert_eq!(
            tokens.peek().unwrap().token,
            Token::Identifier("f".into())
        );
        assert_eq!(
            tokens.peek_nth(2).unwrap().token,
            Token::Literal(Literal::Int(1))
        );
        tokens.discard();
        assert_eq!(tokens.read().unwrap().token, Token::Symbol(Symbol::ParOpen));
        assert!(tokens.match_next(|lexed| lexed.token == Token::Literal(Literal::Int(1))));
    }

    #[test]
    fn rewinding() {
        let mut tokens = test_tokens("a b c");

        let saved = tokens.position();
        tokens.discard_many(2);
        assert_eq!(tokens.top().token, Token::Identifier("c".into()));
        tokens.seek(saved);
        assert_eq!(tokens.top().token, Token::Identifier("a".into()));
    }

    #[test]
    fn top_sticks_at_eof() {
        let mut tokens = test_tokens("x");
        tokens.discard_many(10);
        assert_eq!(tokens.top().token, Token::Eof);
        assert_eq!(tokens.top().token, Token::Eof);
    }
}
