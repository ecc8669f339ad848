//! Tokenizers turning a document string into a set of shingles.
//!
//! Two built-ins are provided: word n-grams and character n-grams with
//! optional padding. Both return *sets*, which is what the MinHash pipeline
//! consumes. A counting variant with identical windowing rules is available
//! for utilities that need occurrence counts.
//!
//! [`Tokenizer`] is the runtime-selectable variant used by the similarity
//! store. It serializes to a compact descriptor string such as
//! `word_ngrams(3)` or `char_ngrams(2,x)` so a store can be reconstructed
//! from persisted settings. Custom functions serialize as the sentinel
//! `custom` and must be supplied again on reload.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::error::StoreError;

/// Default padding character for character n-grams.
pub const DEFAULT_PAD_CHAR: char = '$';

/// All word n-grams contained in `s`.
///
/// Words are runs of non-whitespace, split on any Unicode whitespace. Each
/// token is the space-joined window of `n` consecutive words. If the string
/// holds `n` words or fewer, the single joined string is the only token.
/// Empty input (or `n == 0`) yields the empty set.
pub fn word_ngrams(s: &str, n: usize) -> HashSet<String> {
    if s.is_empty() || n == 0 {
        return HashSet::new();
    }
    let words: Vec<&str> = s.split_whitespace().collect();
    if words.len() <= n {
        return HashSet::from([words.join(" ")]);
    }
    words.windows(n).map(|w| w.join(" ")).collect()
}

/// All character n-grams contained in `s`.
///
/// With `pad` set, both ends of the string are padded with `n - 1` copies of
/// the pad character first, so `"ab"` with `n = 2` gives `"$a"`, `"ab"`,
/// `"b$"`. Pass `None` to disable padding. Empty input yields the empty set
/// regardless of padding.
pub fn char_ngrams(s: &str, n: usize, pad: Option<char>) -> HashSet<String> {
    char_windows(s, n, pad).collect()
}

/// Count all character n-grams in `s`, with the same windowing as
/// [`char_ngrams`].
pub fn count_char_ngrams(s: &str, n: usize, pad: Option<char>) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for gram in char_windows(s, n, pad) {
        *counts.entry(gram).or_insert(0) += 1;
    }
    counts
}

fn char_windows(s: &str, n: usize, pad: Option<char>) -> impl Iterator<Item = String> {
    let mut padded: Vec<char> = Vec::new();
    if !s.is_empty() && n > 0 {
        if let Some(p) = pad {
            padded.extend(std::iter::repeat(p).take(n - 1));
            padded.extend(s.chars());
            padded.extend(std::iter::repeat(p).take(n - 1));
        } else {
            padded.extend(s.chars());
        }
    }
    let count = (padded.len() + 1).saturating_sub(n.max(1));
    (0..count).map(move |i| padded[i..i + n].iter().collect::<String>())
}

/// Tokenization strategy of a similarity store.
///
/// The built-in variants round-trip through [`Tokenizer::descriptor`] and
/// [`Tokenizer::from_descriptor`]. `Custom` carries an arbitrary function and
/// serializes only as the `custom` sentinel.
#[derive(Clone)]
pub enum Tokenizer {
    /// Word n-grams, see [`word_ngrams`].
    WordNgrams { n: usize },
    /// Character n-grams, see [`char_ngrams`]. `pad: None` disables padding.
    CharNgrams { n: usize, pad: Option<char> },
    /// A caller-supplied tokenization function.
    Custom(Arc<dyn Fn(&str) -> HashSet<String> + Send + Sync>),
}

impl Tokenizer {
    /// Word n-gram tokenizer.
    pub fn word_ngrams(n: usize) -> Self {
        Tokenizer::WordNgrams { n }
    }

    /// Character n-gram tokenizer with the default `'$'` padding.
    pub fn char_ngrams(n: usize) -> Self {
        Tokenizer::CharNgrams {
            n,
            pad: Some(DEFAULT_PAD_CHAR),
        }
    }

    /// Character n-gram tokenizer with explicit padding, `None` to disable.
    pub fn char_ngrams_with_pad(n: usize, pad: Option<char>) -> Self {
        Tokenizer::CharNgrams { n, pad }
    }

    /// Wrap a custom tokenization function.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&str) -> HashSet<String> + Send + Sync + 'static,
    {
        Tokenizer::Custom(Arc::new(f))
    }

    /// Tokenize a document into its shingle set.
    pub fn tokens(&self, s: &str) -> HashSet<String> {
        match self {
            Tokenizer::WordNgrams { n } => word_ngrams(s, *n),
            Tokenizer::CharNgrams { n, pad } => char_ngrams(s, *n, *pad),
            Tokenizer::Custom(f) => f(s),
        }
    }

    /// The descriptor string persisted in the settings KV.
    pub fn descriptor(&self) -> String {
        match self {
            Tokenizer::WordNgrams { n } => format!("word_ngrams({n})"),
            Tokenizer::CharNgrams { n, pad: Some(p) } => format!("char_ngrams({n},{p})"),
            Tokenizer::CharNgrams { n, pad: None } => format!("char_ngrams({n},\"\")"),
            Tokenizer::Custom(_) => "custom".to_string(),
        }
    }

    /// Reconstruct a built-in tokenizer from its descriptor.
    ///
    /// The grammar is `word_ngrams(N)`, `char_ngrams(N)` or
    /// `char_ngrams(N, C)` where `N` is a positive integer and `C` a single
    /// character, optionally wrapped in single or double quotes. A quoted
    /// empty string disables padding. The `custom` sentinel cannot be
    /// reconstructed here; the caller has to supply the function itself.
    pub fn from_descriptor(descriptor: &str) -> Result<Self, StoreError> {
        let trimmed = descriptor.trim();
        let (name, args) = trimmed
            .strip_suffix(')')
            .and_then(|s| s.split_once('('))
            .ok_or_else(|| {
                StoreError::InvalidInput(format!("tokenization function not found: {descriptor}"))
            })?;
        let args: Vec<&str> = args.split(',').map(str::trim).collect();

        match (name.trim(), args.as_slice()) {
            ("word_ngrams", [n]) => Ok(Tokenizer::WordNgrams { n: parse_n(n)? }),
            ("char_ngrams", [n]) => Ok(Tokenizer::char_ngrams(parse_n(n)?)),
            ("char_ngrams", [n, pad]) => Ok(Tokenizer::CharNgrams {
                n: parse_n(n)?,
                pad: parse_pad(pad)?,
            }),
            _ => Err(StoreError::InvalidInput(format!(
                "tokenization function not found: {descriptor}"
            ))),
        }
    }
}

fn parse_n(arg: &str) -> Result<usize, StoreError> {
    match arg.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(StoreError::InvalidInput(format!(
            "n-gram length must be a positive integer, got {arg:?}"
        ))),
    }
}

fn parse_pad(arg: &str) -> Result<Option<char>, StoreError> {
    let unquoted = if arg.len() >= 2
        && ((arg.starts_with('"') && arg.ends_with('"'))
            || (arg.starts_with('\'') && arg.ends_with('\'')))
    {
        &arg[1..arg.len() - 1]
    } else {
        arg
    };
    let mut chars = unquoted.chars();
    match (chars.next(), chars.next()) {
        (None, _) => Ok(None),
        (Some(c), None) => Ok(Some(c)),
        _ => Err(StoreError::InvalidInput(format!(
            "pad argument must be a single character, got {arg:?}"
        ))),
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Tokenizer::word_ngrams(3)
    }
}

impl fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor())
    }
}
