/// A buffer that allows reading, peeking, and provides convenience methods
/// for common operations like checking a predicate against a peeked value.
///
/// Both the char source fed to the lexer and the token cursor fed to the
/// parser implement this. Rewinding is deliberately not part of the trait:
/// only the token cursor supports it, through its own `position` and
/// `seek`, since seeking a char source backwards would corrupt its line
/// tracking.
pub trait PeekableBuffer<T>
where
    T: Clone,
{
    /// Get an immutable view of the `n`th next element in the buffer, where
    /// `n` is zero indexed.
    fn peek_nth(&self, n: usize) -> Option<&T>;

    /// Consume an item from the buffer and return it.
    fn read(&mut self) -> Option<T>;

    /// Get an immutable view of the next element in the buffer.
    fn peek(&self) -> Option<&T> {
        self.peek_nth(0)
    }

    /// Throw away the next element from the buffer, returning `false` if
    /// the buffer was already empty.
    fn discard(&mut self) -> bool {
        self.read().is_some()
    }

    /// Throw away the next `n` elements from the buffer.
    fn discard_many(&mut self, n: usize) -> bool {
        (0..n).all(|_| self.discard())
    }

    /// Check whether the `n`th next item in the buffer matches `predicate`,
    /// where `n` is zero-indexed.
    fn match_nth(&self, n: usize, predicate: impl Fn(&T) -> bool) -> bool {
        self.peek_nth(n).map_or(false, predicate)
    }

    /// Check whether the next item in the buffer matches `predicate`.
    fn match_next(&self, predicate: impl Fn(&T) -> bool) -> bool {
        self.match_nth(0, predicate)
    }

    /// Check whether the `n`th next item in the buffer is equal to
    /// `to_match`, where `n` is zero-indexed.
    fn nth_is(&self, n: usize, to_match: T) -> bool
    where
        T: PartialEq,
    {
        self.match_nth(n, |c| *c == to_match)
    }

    /// Check whether the next item in the buffer is equal to `to_match`.
    fn next_is(&self, to_match: T) -> bool
    where
        T: PartialEq,
    {
        self.nth_is(0, to_match)
    }
}
