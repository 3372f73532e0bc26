//! Grammar tables
//!
//! A grammar maps mode names to an ordered list of named rules. The lexer
//! tries the rules of the current mode in declaration order and the first
//! one that matches wins, so order encodes priority.
//!
//! `S` is per-invocation lexer state (brace depths and the like). Every call
//! to [`lex`](crate::lex) starts from `S::default()`, so independent inputs
//! never share counters.

use crate::error::GrammarError;
use crate::token::Token;
use regex_lite::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_GRAMMAR_ID: AtomicU64 = AtomicU64::new(1);

/// Matcher callback: `(ahead, behind, tokens_so_far, state)`.
///
/// `ahead` is the unlexed rest of the input, `behind` everything consumed so
/// far, and `tokens_so_far` the tokens produced in the current mode region.
pub type MatcherFn<S> = Arc<dyn Fn(&str, &str, &[Token], &mut S) -> Option<Match> + Send + Sync>;

/// Mode change requested by a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Lex the following input in the named mode until it ascends
    Descend(Arc<str>),
    /// Leave the current mode
    Ascend,
}

/// Result of a successful rule match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub text: String,
    pub transition: Option<Transition>,
    /// Source bytes consumed, when different from `text.len()`
    pub consumed: Option<usize>,
}

impl Match {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            transition: None,
            consumed: None,
        }
    }

    /// Zero-length match, only meaningful together with a transition
    pub fn empty() -> Self {
        Self::new("")
    }

    pub fn descend(mut self, mode: &str) -> Self {
        self.transition = Some(Transition::Descend(Arc::from(mode)));
        self
    }

    pub fn ascend(mut self) -> Self {
        self.transition = Some(Transition::Ascend);
        self
    }

    pub fn consuming(mut self, len: usize) -> Self {
        self.consumed = Some(len);
        self
    }

    pub fn consumed_len(&self) -> usize {
        self.consumed.unwrap_or(self.text.len())
    }
}

/// One lexing rule
pub enum Rule<S> {
    /// Exact text
    Literal(String),
    /// Any of these texts, first listed wins
    OneOf(Vec<String>),
    /// Regular expression anchored at the cursor
    Pattern(Regex),
    /// Arbitrary context-sensitive matcher
    Matcher(MatcherFn<S>),
}

impl<S> Rule<S> {
    /// Try the rule against the input at the cursor
    pub fn apply(&self, ahead: &str, behind: &str, tokens: &[Token], state: &mut S) -> Option<Match> {
        match self {
            Rule::Literal(text) => ahead.starts_with(text.as_str()).then(|| Match::new(text.clone())),
            Rule::OneOf(texts) => texts
                .iter()
                .find(|t| ahead.starts_with(t.as_str()))
                .map(|t| Match::new(t.clone())),
            Rule::Pattern(re) => re
                .find(ahead)
                .filter(|m| m.start() == 0)
                .map(|m| Match::new(m.as_str())),
            Rule::Matcher(f) => f(ahead, behind, tokens, state),
        }
    }
}

impl<S> fmt::Debug for Rule<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Literal(t) => write!(f, "Literal({t:?})"),
            Rule::OneOf(ts) => write!(f, "OneOf({ts:?})"),
            Rule::Pattern(re) => write!(f, "Pattern({:?})", re.as_str()),
            Rule::Matcher(_) => f.write_str("Matcher"),
        }
    }
}

/// Named rule with an optional fixed transition
pub struct RuleEntry<S> {
    pub name: Arc<str>,
    pub rule: Rule<S>,
    pub transition: Option<Transition>,
}

impl<S> fmt::Debug for RuleEntry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleEntry")
            .field("name", &self.name)
            .field("rule", &self.rule)
            .field("transition", &self.transition)
            .finish()
    }
}

impl<S> RuleEntry<S> {
    /// Apply the rule and attach the fixed transition, if any
    pub fn apply(&self, ahead: &str, behind: &str, tokens: &[Token], state: &mut S) -> Option<Match> {
        let mut m = self.rule.apply(ahead, behind, tokens, state)?;
        if m.transition.is_none() {
            m.transition = self.transition.clone();
        }
        Some(m)
    }
}

/// Mode name to ordered rules
pub struct Grammar<S = ()> {
    id: u64,
    modes: HashMap<Arc<str>, Vec<RuleEntry<S>>>,
}

impl<S> fmt::Debug for Grammar<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grammar")
            .field("id", &self.id)
            .field("modes", &self.modes)
            .finish()
    }
}

impl<S> Default for Grammar<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Grammar<S> {
    pub fn new() -> Self {
        Self {
            id: NEXT_GRAMMAR_ID.fetch_add(1, Ordering::Relaxed),
            modes: HashMap::new(),
        }
    }

    /// Unique id, used to key the lexer's memo table
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Add rules to a mode, creating it if needed
    pub fn mode(&mut self, name: &str) -> ModeBuilder<'_, S> {
        let rules = self.modes.entry(Arc::from(name)).or_default();
        ModeBuilder { rules }
    }

    /// Rules of a mode together with the interned mode name
    pub fn rules(&self, mode: &str) -> Option<(&Arc<str>, &[RuleEntry<S>])> {
        self.modes.get_key_value(mode).map(|(k, v)| (k, v.as_slice()))
    }

    pub fn has_mode(&self, mode: &str) -> bool {
        self.modes.contains_key(mode)
    }
}

/// Builder returned by [`Grammar::mode`]
pub struct ModeBuilder<'g, S> {
    rules: &'g mut Vec<RuleEntry<S>>,
}

impl<S> ModeBuilder<'_, S> {
    fn push(self, name: &str, rule: Rule<S>, transition: Option<Transition>) -> Self {
        self.rules.push(RuleEntry {
            name: Arc::from(name),
            rule,
            transition,
        });
        self
    }

    pub fn literal(self, name: &str, text: &str) -> Self {
        self.push(name, Rule::Literal(text.to_string()), None)
    }

    pub fn one_of(self, name: &str, texts: &[&str]) -> Self {
        self.push(name, Rule::OneOf(texts.iter().map(|t| t.to_string()).collect()), None)
    }

    /// Regular expression rule; the pattern is anchored automatically
    pub fn pattern(self, name: &str, pattern: &str) -> Result<Self, GrammarError> {
        let re = compile(name, pattern)?;
        Ok(self.push(name, Rule::Pattern(re), None))
    }

    pub fn matcher<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&str, &str, &[Token], &mut S) -> Option<Match> + Send + Sync + 'static,
    {
        self.push(name, Rule::Matcher(Arc::new(f)), None)
    }

    /// Literal that descends into `mode`
    pub fn descend_on(self, name: &str, text: &str, mode: &str) -> Self {
        self.push(name, Rule::Literal(text.to_string()), Some(Transition::Descend(Arc::from(mode))))
    }

    /// Literal that ascends out of the current mode
    pub fn ascend_on(self, name: &str, text: &str) -> Self {
        self.push(name, Rule::Literal(text.to_string()), Some(Transition::Ascend))
    }
}

pub(crate) fn compile(rule: &str, pattern: &str) -> Result<Regex, GrammarError> {
    Regex::new(&format!("^(?:{pattern})")).map_err(|e| GrammarError::Pattern {
        rule: rule.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rules_keep_declaration_order() {
        let mut g: Grammar = Grammar::new();
        g.mode("m").literal("a", "=").literal("b", "==");
        let (_, rules) = g.rules("m").unwrap();
        let m = rules.iter().find_map(|r| r.apply("==", "", &[], &mut ())).unwrap();
        // first declared rule wins even though the second is longer
        assert_eq!(m.text, "=");
    }

    #[test]
    fn test_pattern_is_anchored() {
        let mut g: Grammar = Grammar::new();
        g.mode("m").pattern("num", r"\d+").unwrap();
        let (_, rules) = g.rules("m").unwrap();
        assert!(rules[0].apply("a12", "", &[], &mut ()).is_none());
        assert_eq!(rules[0].apply("12a", "", &[], &mut ()).unwrap().text, "12");
    }

    #[test]
    fn test_bad_pattern_reports_rule() {
        let mut g: Grammar = Grammar::new();
        let err = g.mode("m").pattern("broken", "(").err().unwrap();
        assert!(matches!(err, GrammarError::Pattern { rule, .. } if rule == "broken"));
    }

    #[test]
    fn test_fixed_transition() {
        let mut g: Grammar = Grammar::new();
        g.mode("m").descend_on("open", "(", "inner");
        let (_, rules) = g.rules("m").unwrap();
        let m = rules[0].apply("(x", "", &[], &mut ()).unwrap();
        assert_eq!(m.transition, Some(Transition::Descend(Arc::from("inner"))));
    }
}
