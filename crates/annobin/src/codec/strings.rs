//! String table optimizer: shares storage among the strings of one
//! serialization session.
//!
//! Lifecycle: `add` every string that will be serialized, call `optimize`
//! once, then classify each string at emission time with `index_or_seq`.
//! Exact duplicates collapse to a single entry; a string that is a prefix
//! of another is stored as a slice of the longer one. The shared storage is
//! one or more "common string" blobs, split when a blob would exceed
//! `split_size` bytes.
//!
//! Classification at emission time: the first fetch of a string returns its
//! non-negative table index (the string is placed as blob + offset +
//! length); every later fetch returns a negative back-reference sequence
//! number, counting unique strings in emission order from 1. The decoder
//! rebuilds the same numbering by appending each materialized string to its
//! own table.

use rustc_hash::FxHashMap;

use crate::error::EncodeError;
use crate::limits::MAX_BLOB_LEN;

/// Deduplicates and shares substrings across the strings of one session.
#[derive(Debug, Default)]
pub struct StringOptimizer<'a> {
    split_size: usize,
    in_strings: Vec<&'a str>,
    index_of: FxHashMap<&'a str, i64>,
    offsets: Vec<u32>,
    blob_of: Vec<u32>,
    blobs: Vec<String>,
    next_seq: i64,
}

impl<'a> StringOptimizer<'a> {
    /// Creates a new optimizer.
    pub fn new() -> Self {
        Self::with_split_size(MAX_BLOB_LEN)
    }

    /// Creates an optimizer with a custom blob split size (mainly for tests).
    pub fn with_split_size(split_size: usize) -> Self {
        Self {
            split_size,
            in_strings: Vec::new(),
            index_of: FxHashMap::default(),
            offsets: Vec::new(),
            blob_of: Vec::new(),
            blobs: Vec::new(),
            next_seq: -1,
        }
    }

    /// Submits a string for the session. Must happen before [`optimize`].
    ///
    /// [`optimize`]: StringOptimizer::optimize
    pub fn add(&mut self, s: &'a str) {
        self.in_strings.push(s);
    }

    /// Sorts, deduplicates and lays the submitted strings out into shared
    /// blobs. Must be called exactly once, after all `add` calls.
    pub fn optimize(&mut self) -> Result<(), EncodeError> {
        let mut sorted = std::mem::take(&mut self.in_strings);
        sorted.sort_unstable();
        sorted.dedup();

        self.offsets = vec![0; sorted.len()];
        self.blob_of = vec![0; sorted.len()];

        // Sorted ascending, walked from the end: each string is checked
        // against the previously appended (lexicographically larger) string
        // and shares its storage when it is a prefix of it.
        let mut previous = "";
        let mut prev_offset = 0u32;
        let mut prev_blob = 0u32;
        let mut blob = String::new();
        for i in (0..sorted.len()).rev() {
            let s = sorted[i];
            if s.len() > self.split_size {
                return Err(EncodeError::StringTooLong { len: s.len() });
            }
            if previous.starts_with(s) {
                self.offsets[i] = prev_offset;
                self.blob_of[i] = prev_blob;
            } else {
                if blob.len() + s.len() > self.split_size {
                    self.blobs.push(std::mem::take(&mut blob));
                }
                prev_offset = blob.len() as u32;
                prev_blob = self.blobs.len() as u32;
                self.offsets[i] = prev_offset;
                self.blob_of[i] = prev_blob;
                blob.push_str(s);
                previous = s;
            }
        }
        self.blobs.push(blob); // the last (possibly empty) one

        self.index_of = sorted
            .iter()
            .enumerate()
            .map(|(i, s)| (*s, i as i64))
            .collect();
        Ok(())
    }

    /// The shared blobs, in wire order.
    pub fn blobs(&self) -> &[String] {
        &self.blobs
    }

    /// Classifies a string at emission time.
    ///
    /// Non-negative: the string's table index, meaning its first emission:
    /// place it via [`offset`]/[`blob_index`]. Negative: `-v` is the
    /// back-reference slot (1-based, in emission order) of the earlier
    /// identical string.
    ///
    /// [`offset`]: StringOptimizer::offset
    /// [`blob_index`]: StringOptimizer::blob_index
    pub fn index_or_seq(&mut self, s: &str) -> i64 {
        let v = *self
            .index_of
            .get(s)
            .expect("string was not submitted before optimize");
        if v >= 0 {
            if let Some(slot) = self.index_of.get_mut(s) {
                *slot = self.next_seq;
                self.next_seq -= 1;
            }
        }
        v
    }

    /// Byte offset of the string at `index` within its blob.
    pub fn offset(&self, index: i64) -> u32 {
        self.offsets[index as usize]
    }

    /// Blob the string at `index` was placed in.
    pub fn blob_index(&self, index: i64) -> u32 {
        self.blob_of[index as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn optimized(strings: &[&'static str]) -> StringOptimizer<'static> {
        let mut os = StringOptimizer::new();
        for s in strings {
            os.add(s);
        }
        os.optimize().unwrap();
        os
    }

    #[test]
    fn test_prefix_shares_storage() {
        let mut os = optimized(&["abc", "ab", "a", "xyz"]);
        let i_abc = os.index_or_seq("abc");
        let i_ab = os.index_or_seq("ab");
        let i_a = os.index_or_seq("a");
        let i_xyz = os.index_or_seq("xyz");
        assert!(i_abc >= 0 && i_ab >= 0 && i_a >= 0);
        assert_eq!(os.offset(i_abc), os.offset(i_ab));
        assert_eq!(os.offset(i_ab), os.offset(i_a));
        assert_eq!(os.blobs().len(), 1);
        let blob = &os.blobs()[0];
        assert_eq!(&blob[os.offset(i_abc) as usize..][..3], "abc");
        assert_eq!(&blob[os.offset(i_xyz) as usize..][..3], "xyz");
    }

    #[test]
    fn test_duplicates_become_backrefs() {
        let mut os = optimized(&["hello", "hello", "world"]);
        assert!(os.index_or_seq("hello") >= 0);
        assert_eq!(os.index_or_seq("hello"), -1);
        assert!(os.index_or_seq("world") >= 0);
        assert_eq!(os.index_or_seq("world"), -2);
        assert_eq!(os.index_or_seq("hello"), -1);
    }

    #[test]
    fn test_blob_split() {
        let mut os = StringOptimizer::with_split_size(8);
        for s in ["aaaa", "bbbb", "cccc"] {
            os.add(s);
        }
        os.optimize().unwrap();
        assert!(os.blobs().len() > 1);
        for s in ["aaaa", "bbbb", "cccc"] {
            let i = os.index_or_seq(s);
            assert!(i >= 0);
            let blob = &os.blobs()[os.blob_index(i) as usize];
            assert_eq!(&blob[os.offset(i) as usize..][..4], s);
        }
    }

    #[test]
    fn test_string_longer_than_split_is_rejected() {
        let mut os = StringOptimizer::with_split_size(4);
        os.add("too long");
        assert!(matches!(
            os.optimize(),
            Err(EncodeError::StringTooLong { len: 8 })
        ));
    }

    #[test]
    fn test_empty_string_is_classified() {
        let mut os = optimized(&["", "a"]);
        assert!(os.index_or_seq("") >= 0);
        assert_eq!(os.index_or_seq(""), -1);
    }
}
