//! Lumen Configuration

use lumen_syntax::LexOptions;
use lumen_template::CompileOptions;
use serde::{Deserialize, Serialize};

/// Configuration options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Fail on unrecognized template input instead of keeping it as
    /// `unknown` tokens
    pub strict_lexing: bool,

    /// Templates shorter than this many bytes are lexed once per thread
    pub lex_cache_threshold: usize,

    /// Write form input values back into the data they display
    pub two_way_binding: bool,

    /// Install `on*=${fn}` attributes as event listeners
    pub event_attributes: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            strict_lexing: true,
            lex_cache_threshold: 1000,
            two_way_binding: true,
            event_attributes: true,
        }
    }
}

impl Config {
    /// Parse a configuration; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn lex_options(&self) -> LexOptions {
        LexOptions {
            strict: self.strict_lexing,
            cache_threshold: self.lex_cache_threshold,
        }
    }

    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            lex: self.lex_options(),
            two_way_binding: self.two_way_binding,
            event_attributes: self.event_attributes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_options() {
        let config = Config::default();
        assert_eq!(config.lex_options(), LexOptions::default());
        let options = config.compile_options();
        assert!(options.two_way_binding);
        assert!(options.event_attributes);
    }

    #[test]
    fn test_partial_json() {
        let config = Config::from_json(r#"{"strict_lexing": false, "lex_cache_threshold": 0}"#).unwrap();
        assert!(!config.strict_lexing);
        assert_eq!(config.lex_cache_threshold, 0);
        assert!(config.two_way_binding);
        assert_eq!(Config::from_json(&config.to_json().unwrap()).unwrap(), config);
    }

    #[test]
    fn test_bad_json() {
        assert!(Config::from_json(r#"{"strict_lexing": "yes"}"#).is_err());
    }
}
