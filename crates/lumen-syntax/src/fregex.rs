//! Token Regex
//!
//! Regular-expression-like combinators over token slices. A [`Pattern`]
//! looks at the start of a slice and reports how many tokens it consumes,
//! or `None` when it does not match.
//!
//! Alternation is ordered: [`or`] takes the first alternative that matches,
//! even when a later one would consume more. Repetition is greedy.

use crate::token::Token;
use std::fmt;
use std::sync::Arc;

type MatchFn = dyn Fn(&[Token]) -> Option<usize> + Send + Sync;

/// Matcher over the start of a token slice
#[derive(Clone)]
pub struct Pattern(Arc<MatchFn>);

impl Pattern {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[Token]) -> Option<usize> + Send + Sync + 'static,
    {
        Pattern(Arc::new(f))
    }

    /// Number of tokens consumed at the start of `tokens`
    #[inline]
    pub fn matches(&self, tokens: &[Token]) -> Option<usize> {
        (self.0)(tokens)
    }

    /// Single token of the given kind
    pub fn kind(kind: &str) -> Self {
        let kind: Arc<str> = Arc::from(kind);
        Pattern::new(move |tokens| tokens.first().filter(|t| t.kind == kind).map(|_| 1))
    }

    /// Single token with this text and kind
    pub fn token(text: &str, kind: &str) -> Self {
        let text = text.to_string();
        let kind: Arc<str> = Arc::from(kind);
        Pattern::new(move |tokens| tokens.first().filter(|t| t.text == text && t.kind == kind).map(|_| 1))
    }

    /// Single token accepted by a predicate
    pub fn when<F>(pred: F) -> Self
    where
        F: Fn(&Token) -> bool + Send + Sync + 'static,
    {
        Pattern::new(move |tokens| tokens.first().filter(|t| pred(t)).map(|_| 1))
    }

    /// Any single token
    pub fn any() -> Self {
        Pattern::new(|tokens| (!tokens.is_empty()).then_some(1))
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pattern")
    }
}

/// A single token with exactly this text
impl From<&str> for Pattern {
    fn from(text: &str) -> Self {
        let text = text.to_string();
        Pattern::new(move |tokens| tokens.first().filter(|t| t.text == text).map(|_| 1))
    }
}

/// A sequence: every pattern in order
impl From<Vec<Pattern>> for Pattern {
    fn from(parts: Vec<Pattern>) -> Self {
        and(parts)
    }
}

/// Every pattern in sequence. Stops at the first failure.
pub fn and<I, P>(parts: I) -> Pattern
where
    I: IntoIterator<Item = P>,
    P: Into<Pattern>,
{
    let parts: Vec<Pattern> = parts.into_iter().map(Into::into).collect();
    Pattern::new(move |tokens| {
        let mut used = 0;
        for part in &parts {
            used += part.matches(&tokens[used..])?;
        }
        Some(used)
    })
}

/// The first alternative that matches
pub fn or<I, P>(alternatives: I) -> Pattern
where
    I: IntoIterator<Item = P>,
    P: Into<Pattern>,
{
    let alternatives: Vec<Pattern> = alternatives.into_iter().map(Into::into).collect();
    Pattern::new(move |tokens| alternatives.iter().find_map(|p| p.matches(tokens)))
}

/// Zero-length match when the sequence does not match
pub fn not<I, P>(parts: I) -> Pattern
where
    I: IntoIterator<Item = P>,
    P: Into<Pattern>,
{
    let inner = and(parts);
    Pattern::new(move |tokens| match inner.matches(tokens) {
        Some(_) => None,
        None => Some(0),
    })
}

/// Zero-length match when no alternative matches
pub fn nor<I, P>(alternatives: I) -> Pattern
where
    I: IntoIterator<Item = P>,
    P: Into<Pattern>,
{
    let inner = or(alternatives);
    Pattern::new(move |tokens| match inner.matches(tokens) {
        Some(_) => None,
        None => Some(0),
    })
}

/// The sequence, or nothing
pub fn zero_or_one<I, P>(parts: I) -> Pattern
where
    I: IntoIterator<Item = P>,
    P: Into<Pattern>,
{
    let inner = and(parts);
    Pattern::new(move |tokens| Some(inner.matches(tokens).unwrap_or(0)))
}

/// The sequence repeated at least `min` times, greedily
pub fn x_or_more<I, P>(min: usize, parts: I) -> Pattern
where
    I: IntoIterator<Item = P>,
    P: Into<Pattern>,
{
    let inner = and(parts);
    Pattern::new(move |tokens| {
        let mut used = 0;
        let mut count = 0;
        while let Some(n) = inner.matches(&tokens[used..]) {
            count += 1;
            used += n;
            // a zero-length repetition would repeat forever
            if n == 0 {
                break;
            }
        }
        (count >= min).then_some(used)
    })
}

pub fn zero_or_more<I, P>(parts: I) -> Pattern
where
    I: IntoIterator<Item = P>,
    P: Into<Pattern>,
{
    x_or_more(0, parts)
}

pub fn one_or_more<I, P>(parts: I) -> Pattern
where
    I: IntoIterator<Item = P>,
    P: Into<Pattern>,
{
    x_or_more(1, parts)
}

/// Matches like the sequence but consumes nothing
pub fn look_ahead<I, P>(parts: I) -> Pattern
where
    I: IntoIterator<Item = P>,
    P: Into<Pattern>,
{
    let inner = and(parts);
    Pattern::new(move |tokens| inner.matches(tokens).map(|_| 0))
}

/// Matches only at the end of the token slice
pub fn end() -> Pattern {
    Pattern::new(|tokens| tokens.is_empty().then_some(0))
}

/// A match found by [`match_first`] or [`match_all`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Found {
    pub index: usize,
    pub len: usize,
}

impl Found {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.index..self.index + self.len
    }
}

/// First match at or after `start`
pub fn match_first_from(pattern: &Pattern, haystack: &[Token], start: usize) -> Option<Found> {
    (start..=haystack.len()).find_map(|index| {
        pattern.matches(&haystack[index..]).map(|len| Found { index, len })
    })
}

/// First match anywhere in `haystack`
pub fn match_first(pattern: &Pattern, haystack: &[Token]) -> Option<Found> {
    match_first_from(pattern, haystack, 0)
}

/// All matches; scanning resumes after the end of each match
pub fn match_all(pattern: &Pattern, haystack: &[Token]) -> Vec<Found> {
    let mut found = Vec::new();
    let mut index = 0;
    while index <= haystack.len() {
        match pattern.matches(&haystack[index..]) {
            Some(len) => {
                found.push(Found { index, len });
                index += len.max(1);
            }
            None => index += 1,
        }
    }
    found
}

/// `this.a.b` / `this.a[0]` style property chains on an identifier
pub fn property_chain(root: &str) -> Pattern {
    and([
        Pattern::from(root),
        zero_or_more([or([
            and([Pattern::from("."), Pattern::kind("identifier")]),
            and([Pattern::from("."), Pattern::kind("keyword")]),
            and([Pattern::from("?."), Pattern::kind("identifier")]),
            and([Pattern::from("["), or([Pattern::kind("number"), Pattern::kind("string")]), Pattern::from("]")]),
        ])]),
    ])
}
