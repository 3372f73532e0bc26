//! Mode Lexer
//!
//! Tokenizes source text with a [`Grammar`]. A rule may descend into another
//! mode; the nested region is lexed recursively and wrapped as the `tokens` of
//! a single region token whose text is the whole region. The region ends when
//! a rule in the nested mode ascends.
//!
//! Lexing is lossless: concatenating the text of the returned tokens yields
//! the input.

use crate::error::LexError;
use crate::grammar::{Grammar, Transition};
use crate::token::Token;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

/// Lexer options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexOptions {
    /// Fail on unrecognized input instead of collecting it into `unknown` tokens
    pub strict: bool,
    /// Inputs shorter than this many bytes are memoized per thread
    pub cache_threshold: usize,
}

impl Default for LexOptions {
    fn default() -> Self {
        Self {
            strict: true,
            cache_threshold: 1000,
        }
    }
}

impl LexOptions {
    pub fn lenient() -> Self {
        Self {
            strict: false,
            ..Self::default()
        }
    }
}

const UNKNOWN: &str = "unknown";
const CACHE_LIMIT: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    grammar: u64,
    mode: String,
    input: String,
    line: u32,
    col: u32,
    strict: bool,
}

thread_local! {
    static CACHE: RefCell<HashMap<CacheKey, Vec<Token>>> = RefCell::new(HashMap::new());
}

/// Lex `source` starting in `mode` at line 1, column 1
pub fn lex<S: Default>(grammar: &Grammar<S>, source: &str, mode: &str, options: &LexOptions) -> Result<Vec<Token>, LexError> {
    lex_at(grammar, source, mode, 1, 1, options)
}

/// Lex `source` starting in `mode` at the given position.
///
/// Results for small inputs are memoized; callers always receive their own
/// copy and may mutate it.
pub fn lex_at<S: Default>(
    grammar: &Grammar<S>,
    source: &str,
    mode: &str,
    line: u32,
    col: u32,
    options: &LexOptions,
) -> Result<Vec<Token>, LexError> {
    let key = (source.len() < options.cache_threshold).then(|| CacheKey {
        grammar: grammar.id(),
        mode: mode.to_string(),
        input: source.to_string(),
        line,
        col,
        strict: options.strict,
    });
    if let Some(key) = &key {
        if let Some(hit) = CACHE.with(|c| c.borrow().get(key).cloned()) {
            tracing::debug!(mode, len = source.len(), "lex cache hit");
            return Ok(hit);
        }
    }

    let (mode_name, _) = grammar.rules(mode).ok_or_else(|| LexError::UnknownMode(mode.to_string()))?;
    let mut cursor = Cursor { source, pos: 0, line, col };
    let mut state = S::default();
    let mut tokens = Vec::new();
    // Ascending out of the start mode simply ends lexing; keep going if input remains.
    while cursor.pos < source.len() {
        let start = cursor.pos;
        tokens = lex_mode(grammar, &mut cursor, mode_name, &mut state, options, tokens)?;
        if cursor.pos == start {
            return Err(LexError::Stalled {
                mode: mode.to_string(),
                line: cursor.line,
                col: cursor.col,
            });
        }
    }

    if let Some(key) = key {
        CACHE.with(|c| {
            let mut cache = c.borrow_mut();
            if cache.len() >= CACHE_LIMIT {
                cache.clear();
            }
            cache.insert(key, tokens.clone());
        });
    }
    Ok(tokens)
}

struct Cursor<'s> {
    source: &'s str,
    pos: usize,
    line: u32,
    col: u32,
}

impl Cursor<'_> {
    fn advance(&mut self, len: usize) {
        let end = self.pos + len;
        for c in self.source[self.pos..end].chars() {
            if c == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
        self.pos = end;
    }

    fn context(&self) -> String {
        let start = floor_char_boundary(self.source, self.pos.saturating_sub(20));
        let end = floor_char_boundary(self.source, (self.pos + 20).min(self.source.len()));
        self.source[start..end].to_string()
    }
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Lex in `mode` until a rule ascends or input runs out. `result` holds the
/// tokens already belonging to this region (the trigger token of a descent).
fn lex_mode<S>(
    grammar: &Grammar<S>,
    cursor: &mut Cursor<'_>,
    mode: &Arc<str>,
    state: &mut S,
    options: &LexOptions,
    mut result: Vec<Token>,
) -> Result<Vec<Token>, LexError> {
    let (_, rules) = grammar.rules(mode).ok_or_else(|| LexError::UnknownMode(mode.to_string()))?;

    while cursor.pos < cursor.source.len() {
        let ahead = &cursor.source[cursor.pos..];
        let behind = &cursor.source[..cursor.pos];

        let mut found = None;
        for entry in rules {
            let Some(m) = entry.apply(ahead, behind, &result, state) else {
                continue;
            };
            let consumed = m.consumed_len();
            if consumed > ahead.len() || !ahead.is_char_boundary(consumed) {
                continue;
            }
            // A zero-length match is only useful as a mode switch
            if consumed == 0 && m.text.is_empty() && m.transition.is_none() {
                continue;
            }
            found = Some((entry, m, consumed));
            break;
        }

        let Some((entry, m, consumed)) = found else {
            if options.strict {
                return Err(LexError::Unrecognized {
                    line: cursor.line,
                    col: cursor.col,
                    context: cursor.context(),
                });
            }
            let ch_len = ahead.chars().next().map(char::len_utf8).unwrap_or(1);
            tracing::warn!(line = cursor.line, col = cursor.col, %mode, "unrecognized input, collecting as unknown");
            match result.last_mut() {
                Some(last) if last.is_kind(UNKNOWN) && last.tokens.is_none() => last.text.push_str(&ahead[..ch_len]),
                _ => {
                    let kind: Arc<str> = Arc::from(UNKNOWN);
                    result.push(Token::new(&ahead[..ch_len], &kind, mode, cursor.line, cursor.col));
                }
            }
            cursor.advance(ch_len);
            continue;
        };

        let (line, col) = (cursor.line, cursor.col);
        let mut token = Token::new(m.text.clone(), &entry.name, mode, line, col);
        if consumed != m.text.len() {
            token.original_length = Some(consumed);
        }
        cursor.advance(consumed);

        match m.transition {
            None => result.push(token),
            Some(Transition::Ascend) => {
                tracing::trace!(%mode, line, col, "ascend");
                if consumed > 0 || !token.text.is_empty() {
                    result.push(token);
                }
                return Ok(result);
            }
            Some(Transition::Descend(next)) => {
                let (next_mode, _) = grammar.rules(&next).ok_or_else(|| LexError::UnknownMode(next.to_string()))?;
                tracing::trace!(from = %mode, to = %next_mode, line, col, "descend");
                let start = cursor.pos;
                let seed = if token.text.is_empty() { Vec::new() } else { vec![token] };
                let inner = lex_mode(grammar, cursor, next_mode, state, options, seed)?;
                if consumed == 0 && cursor.pos == start {
                    return Err(LexError::Stalled {
                        mode: next_mode.to_string(),
                        line,
                        col,
                    });
                }
                let mut region = Token::new(
                    inner.iter().map(|t| t.text.as_str()).collect::<String>(),
                    &entry.name,
                    mode,
                    line,
                    col,
                );
                let covered: usize = inner.iter().map(Token::source_len).sum();
                if covered != region.text.len() {
                    region.original_length = Some(covered);
                }
                region.tokens = Some(inner);
                result.push(region);
            }
        }
    }
    Ok(result)
}
