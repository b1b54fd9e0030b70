//! Query chunking.
//!
//! Splits text on whitespace into chunks of at most `max_tokens` tokens.
//! Chunks are rejoined with single spaces, so runs of whitespace collapse,
//! but every token appears exactly once and in order.

use std::iter::FusedIterator;
use std::num::NonZeroUsize;
use std::str::SplitWhitespace;

/// Default chunk size in tokens.
pub const DEFAULT_MAX_TOKENS: NonZeroUsize = match NonZeroUsize::new(4000) {
    Some(n) => n,
    None => unreachable!(),
};

/// Split `text` into chunks of at most `max_tokens` whitespace tokens.
///
/// Empty or whitespace-only text yields no chunks. The iterator is lazy;
/// clone it to restart from the same position.
pub fn chunk(text: &str, max_tokens: NonZeroUsize) -> Chunks<'_> {
    Chunks {
        tokens: text.split_whitespace(),
        max_tokens,
    }
}

/// Lazy chunk iterator returned by [`chunk`].
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    tokens: SplitWhitespace<'a>,
    max_tokens: NonZeroUsize,
}

impl Iterator for Chunks<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let mut out = String::new();
        for (i, token) in self.tokens.by_ref().take(self.max_tokens.get()).enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(token);
        }
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }
}

impl FusedIterator for Chunks<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn n(v: usize) -> NonZeroUsize {
        NonZeroUsize::new(v).unwrap()
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        assert_eq!(chunk("", n(3)).count(), 0);
        assert_eq!(chunk("   \n\t ", n(3)).count(), 0);
    }

    #[test]
    fn test_last_chunk_may_be_short() {
        let chunks: Vec<_> = chunk("a b c d e", n(2)).collect();
        assert_eq!(chunks, vec!["a b", "c d", "e"]);
    }

    #[test]
    fn test_single_chunk_when_under_limit() {
        let chunks: Vec<_> = chunk("is it raining today", DEFAULT_MAX_TOKENS).collect();
        assert_eq!(chunks, vec!["is it raining today"]);
    }

    #[test]
    fn test_clone_restarts() {
        let chunks = chunk("one two three", n(1));
        let first: Vec<_> = chunks.clone().collect();
        let second: Vec<_> = chunks.collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    proptest! {
        #[test]
        fn test_tokens_preserved(text in "[a-z \\n\\t]{0,200}", size in 1usize..10) {
            let chunks: Vec<String> = chunk(&text, n(size)).collect();

            for c in &chunks {
                prop_assert!(c.split_whitespace().count() <= size);
                prop_assert!(c.split_whitespace().count() > 0);
            }

            let rejoined: Vec<&str> = chunks.iter().flat_map(|c| c.split_whitespace()).collect();
            let original: Vec<&str> = text.split_whitespace().collect();
            prop_assert_eq!(rejoined, original);
        }
    }
}
