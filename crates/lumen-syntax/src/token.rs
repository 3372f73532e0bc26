//! Token Types
//!
//! A token is the source slice a rule matched, tagged with the rule name
//! (`kind`) and the mode it was lexed in. Tokens that stand for a nested mode
//! region own the tokens lexed inside it.

use std::fmt;
use std::sync::Arc;

/// Lexed token
#[derive(Clone)]
pub struct Token {
    /// Matched source text. For region tokens this is the concatenation of
    /// every nested token's text.
    pub text: String,
    /// Name of the rule that produced the token
    pub kind: Arc<str>,
    /// Mode the token was lexed in
    pub mode: Arc<str>,
    pub line: u32,
    pub col: u32,
    /// Tokens of the nested mode region, if this token opened one
    pub tokens: Option<Vec<Token>>,
    /// Length of source consumed, when it differs from `text.len()`
    pub original_length: Option<usize>,
}

impl Token {
    pub fn new(text: impl Into<String>, kind: &Arc<str>, mode: &Arc<str>, line: u32, col: u32) -> Self {
        Self {
            text: text.into(),
            kind: kind.clone(),
            mode: mode.clone(),
            line,
            col,
            tokens: None,
            original_length: None,
        }
    }

    /// Token with a synthetic kind, used by tests and by code that splices
    /// token streams
    pub fn synthetic(text: &str, kind: &str) -> Self {
        Self {
            text: text.to_string(),
            kind: Arc::from(kind),
            mode: Arc::from(""),
            line: 0,
            col: 0,
            tokens: None,
            original_length: None,
        }
    }

    /// Compare the token text
    #[inline]
    pub fn is(&self, text: &str) -> bool {
        self.text == text
    }

    /// Compare the rule name
    #[inline]
    pub fn is_kind(&self, kind: &str) -> bool {
        &*self.kind == kind
    }

    /// Whitespace, line breaks and comments
    pub fn is_trivia(&self) -> bool {
        matches!(&*self.kind, "whitespace" | "ln" | "comment")
    }

    /// Nested tokens, or an empty slice for leaf tokens
    pub fn children(&self) -> &[Token] {
        self.tokens.as_deref().unwrap_or(&[])
    }

    /// Source length this token covers
    pub fn source_len(&self) -> usize {
        self.original_length.unwrap_or(self.text.len())
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl PartialEq<str> for Token {
    fn eq(&self, other: &str) -> bool {
        self.text == other
    }
}

impl PartialEq<&str> for Token {
    fn eq(&self, other: &&str) -> bool {
        self.text == *other
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", self.kind, self.text)?;
        if let Some(children) = &self.tokens {
            f.debug_list().entries(children).finish()?;
        }
        Ok(())
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Concatenate the leaf text of a token list, descending into regions
pub fn join_leaves(tokens: &[Token]) -> String {
    let mut out = String::new();
    fn walk(tokens: &[Token], out: &mut String) {
        for t in tokens {
            match &t.tokens {
                Some(children) => walk(children, out),
                None => out.push_str(&t.text),
            }
        }
    }
    walk(tokens, &mut out);
    out
}

/// Concatenate top-level token text
pub fn join(tokens: &[Token]) -> String {
    tokens.iter().map(|t| t.text.as_str()).collect()
}

/// Copy of `tokens` without whitespace, line breaks and comments
pub fn significant(tokens: &[Token]) -> Vec<Token> {
    tokens.iter().filter(|t| !t.is_trivia()).cloned().collect()
}

/// Like [`significant`] but keeps line breaks, which end brace-less arrow
/// bodies
pub fn without_spaces(tokens: &[Token]) -> Vec<Token> {
    tokens
        .iter()
        .filter(|t| !t.is_kind("whitespace") && !t.is_kind("comment"))
        .cloned()
        .collect()
}
