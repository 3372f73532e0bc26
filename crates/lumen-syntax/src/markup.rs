//! Markup Grammar
//!
//! The fixed grammar for HTML interleaved with script and template literals.
//!
//! Modes:
//! - `js`: script source, including regex/division disambiguation and the
//!   brace depth of an enclosing `${ }`
//! - `html`: top-level markup with `<script>` bodies lexed as `js`
//! - `htmlComment`, `templateComment`: comment bodies
//! - `template`: the body of a template literal
//! - `tag`, `templateTag`: attributes of an open tag
//! - `squote`, `dquote`: quoted attribute values
//!
//! Nesting counters live in [`MarkupState`], created fresh for every lex
//! call.

use crate::error::{GrammarError, LexError};
use crate::grammar::{compile, Grammar, Match};
use crate::lexer::{lex, LexOptions};
use crate::token::Token;
use regex_lite::Regex;
use std::sync::OnceLock;

const JS: &str = "js";
const HTML: &str = "html";
const TEMPLATE: &str = "template";
const TAG: &str = "tag";
const TEMPLATE_TAG: &str = "templateTag";

/// Open construct that decides what a `}` or `</script` means
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    /// Inside `${ }` or `#{ }`, with the count of unclosed `{` since it opened
    Expr { depth: usize },
    /// Inside a `<script>` body
    Script,
}

/// Per-lex mutable state of the markup grammar
#[derive(Debug, Clone, Default)]
pub struct MarkupState {
    pub frames: Vec<Frame>,
    /// Lowercased name of the most recent open tag
    pub last_tag: String,
}

const OPERATORS: &[&str] = &[
    ">>>=", "===", "!==", "**=", "<<=", ">>=", ">>>", "...", "&&=", "||=", "??=", "=>", "==", "!=", "<=", ">=", "&&",
    "||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "**", "<<", ">>", "+", "-", "*", "/",
    "%", "=", "<", ">", "!", "~", "&", "|", "^", "?", ":", ",", ".", "(", ")", "[", "]",
];

const KEYWORDS: &str = "await|break|case|catch|class|const|continue|debugger|default|delete|do|else|export|extends|\
false|finally|for|function|if|import|in|instanceof|let|new|null|of|return|super|switch|this|throw|true|try|typeof|\
undefined|var|void|while|with|yield";

/// Keywords after which `/` starts a regex literal
const REGEX_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do", "else", "yield", "await",
];

/// The shared markup grammar
pub fn markup_grammar() -> Result<&'static Grammar<MarkupState>, GrammarError> {
    static GRAMMAR: OnceLock<Result<Grammar<MarkupState>, GrammarError>> = OnceLock::new();
    GRAMMAR.get_or_init(build).as_ref().map_err(Clone::clone)
}

/// Lex the body of a template literal (with or without its backticks)
pub fn parse_template_tokens(source: &str, options: &LexOptions) -> Result<Vec<Token>, LexError> {
    lex(markup_grammar()?, source, TEMPLATE, options)
}

/// Lex script source
pub fn lex_js(source: &str, options: &LexOptions) -> Result<Vec<Token>, LexError> {
    lex(markup_grammar()?, source, JS, options)
}

/// Lex an HTML document
pub fn lex_html(source: &str, options: &LexOptions) -> Result<Vec<Token>, LexError> {
    lex(markup_grammar()?, source, HTML, options)
}

fn build() -> Result<Grammar<MarkupState>, GrammarError> {
    let mut g = Grammar::new();
    js_mode(&mut g)?;
    html_mode(&mut g)?;
    template_mode(&mut g)?;
    tag_mode(&mut g, TAG, false)?;
    tag_mode(&mut g, TEMPLATE_TAG, true)?;
    quote_mode(&mut g, "dquote", '"')?;
    quote_mode(&mut g, "squote", '\'')?;

    g.mode("htmlComment")
        .matcher("comment", |ahead: &str, _: &str, _: &[Token], _: &mut MarkupState| {
            ahead.starts_with("-->").then(|| Match::new("-->").ascend())
        })
        .matcher("text", until(&["-->"]));

    g.mode("templateComment")
        .matcher("comment", |ahead: &str, _: &str, _: &[Token], _: &mut MarkupState| {
            ahead.starts_with("-->").then(|| Match::new("-->").ascend())
        })
        .matcher("expr", open_expr("${"))
        .matcher("text", until(&["-->", "${"]))
        .literal("text", "$");

    Ok(g)
}

fn js_mode(g: &mut Grammar<MarkupState>) -> Result<(), GrammarError> {
    let keyword = compile("keyword", &format!(r"(?:{KEYWORDS})\b"))?;

    g.mode(JS)
        .pattern("whitespace", r"[ \t\r]+")?
        .literal("ln", "\n")
        .pattern("comment", r"//[^\n]*|/\*[\s\S]*?\*/")?
        .literal("semicolon", ";")
        .descend_on("template", "`", TEMPLATE)
        .matcher("braceOpen", |ahead: &str, _: &str, _: &[Token], state: &mut MarkupState| {
            if !ahead.starts_with('{') {
                return None;
            }
            if let Some(Frame::Expr { depth }) = state.frames.last_mut() {
                *depth += 1;
            }
            Some(Match::new("{"))
        })
        .matcher("braceClose", |ahead: &str, _: &str, _: &[Token], state: &mut MarkupState| {
            if !ahead.starts_with('}') {
                return None;
            }
            match state.frames.last_mut() {
                Some(Frame::Expr { depth: 0 }) => {
                    state.frames.pop();
                    Some(Match::new("}").ascend())
                }
                Some(Frame::Expr { depth }) => {
                    *depth -= 1;
                    Some(Match::new("}"))
                }
                _ => Some(Match::new("}")),
            }
        })
        .pattern("hex", r"0[xX][0-9a-fA-F]+")?
        .pattern("number", r"\d+(?:\.\d*)?(?:[eE][+-]?\d+)?|\.\d+(?:[eE][+-]?\d+)?")?
        .matcher("scriptEnd", |ahead: &str, _: &str, _: &[Token], state: &mut MarkupState| {
            if state.frames.last() != Some(&Frame::Script) || !starts_with_ignore_case(ahead, "</script") {
                return None;
            }
            state.frames.pop();
            Some(Match::empty().ascend())
        })
        .matcher("regex", |ahead: &str, _: &str, tokens: &[Token], _: &mut MarkupState| {
            if !regex_allowed(tokens) {
                return None;
            }
            scan_regex(ahead).map(|len| Match::new(&ahead[..len]))
        })
        .one_of("operator", OPERATORS)
        .matcher("keyword", move |ahead: &str, _: &str, _: &[Token], _: &mut MarkupState| {
            find(&keyword, ahead).map(Match::new)
        })
        .pattern("identifier", r"[a-zA-Z_$][\w$]*")?
        .pattern("string", r#""(?:[^"\\\n]|\\[\s\S])*"|'(?:[^'\\\n]|\\[\s\S])*'"#)?;
    Ok(())
}

fn html_mode(g: &mut Grammar<MarkupState>) -> Result<(), GrammarError> {
    let close_tag = close_tag_matcher()?;
    let open_tag = compile("openTag", r"<[a-zA-Z]")?;

    g.mode(HTML)
        .matcher("script", |ahead: &str, _: &str, tokens: &[Token], state: &mut MarkupState| {
            if state.last_tag != "script" || !tokens.last().is_some_and(|t| t.is_kind("openTag")) {
                return None;
            }
            state.last_tag.clear();
            if starts_with_ignore_case(ahead, "</script") {
                return None;
            }
            state.frames.push(Frame::Script);
            Some(Match::empty().descend(JS))
        })
        .descend_on("comment", "<!--", "htmlComment")
        .matcher("closeTag", close_tag)
        .matcher("openTag", move |ahead: &str, _: &str, _: &[Token], _: &mut MarkupState| {
            find(&open_tag, ahead).map(|_| Match::empty().descend(TAG))
        })
        .pattern("text", r"[^<]+")?
        .literal("text", "<");
    Ok(())
}

fn template_mode(g: &mut Grammar<MarkupState>) -> Result<(), GrammarError> {
    let close_tag = close_tag_matcher()?;
    let open_tag = compile("openTag", r"<[a-zA-Z]")?;

    g.mode(TEMPLATE)
        .matcher("template", |ahead: &str, _: &str, tokens: &[Token], _: &mut MarkupState| {
            if !ahead.starts_with('`') {
                return None;
            }
            // The opening backtick of a top-level template is an ordinary token
            Some(if tokens.is_empty() { Match::new("`") } else { Match::new("`").ascend() })
        })
        .matcher("expr", open_expr("${"))
        .matcher("hashExpr", open_expr("#{"))
        .descend_on("comment", "<!--", "templateComment")
        .matcher("closeTag", close_tag)
        .matcher("openTag", move |ahead: &str, _: &str, _: &[Token], _: &mut MarkupState| {
            find(&open_tag, ahead).map(|_| Match::empty().descend(TEMPLATE_TAG))
        })
        .pattern("escape", r"\\[\s\S]")?
        .pattern("text", r"[^`$#<\\]+")?
        .pattern("text", r"[$#<]")?;
    Ok(())
}

fn tag_mode(g: &mut Grammar<MarkupState>, mode: &str, expressions: bool) -> Result<(), GrammarError> {
    let tag_name = compile("tagName", r"<[a-zA-Z][\w\-:.]*")?;

    let mut builder = g
        .mode(mode)
        .matcher("tagName", move |ahead: &str, _: &str, _: &[Token], state: &mut MarkupState| {
            let name = find(&tag_name, ahead)?;
            state.last_tag = name[1..].to_ascii_lowercase();
            Some(Match::new(name))
        })
        .pattern("whitespace", r"\s+")?;
    if expressions {
        builder = builder.matcher("expr", open_expr("${"));
    }
    builder
        .matcher("tagEnd", |ahead: &str, _: &str, _: &[Token], state: &mut MarkupState| {
            if ahead.starts_with("/>") {
                state.last_tag.clear();
                Some(Match::new("/>").ascend())
            } else {
                ahead.starts_with('>').then(|| Match::new(">").ascend())
            }
        })
        .pattern("attrName", r#"[^\s"'<>/=`$]+"#)?
        .literal("equals", "=")
        .descend_on("dquote", "\"", "dquote")
        .descend_on("squote", "'", "squote")
        .pattern("text", r"[\s\S]")?;
    Ok(())
}

fn quote_mode(g: &mut Grammar<MarkupState>, mode: &str, quote: char) -> Result<(), GrammarError> {
    let stop = quote.to_string();
    let text = format!("[^{quote}$]+");
    g.mode(mode)
        .matcher(mode, move |ahead: &str, _: &str, tokens: &[Token], _: &mut MarkupState| {
            if !ahead.starts_with(quote) {
                return None;
            }
            let m = Match::new(stop.clone());
            Some(if tokens.is_empty() { m } else { m.ascend() })
        })
        .matcher("expr", open_expr("${"))
        .pattern("text", &text)?
        .literal("text", "$");
    Ok(())
}

/// `${` or `#{`: open an expression frame and lex its body as script
fn open_expr(
    opener: &'static str,
) -> impl Fn(&str, &str, &[Token], &mut MarkupState) -> Option<Match> + Send + Sync + 'static {
    move |ahead: &str, _: &str, _: &[Token], state: &mut MarkupState| {
        if !ahead.starts_with(opener) {
            return None;
        }
        state.frames.push(Frame::Expr { depth: 0 });
        Some(Match::new(opener).descend(JS))
    }
}

fn close_tag_matcher()
-> Result<impl Fn(&str, &str, &[Token], &mut MarkupState) -> Option<Match> + Send + Sync + 'static, GrammarError> {
    let re = compile("closeTag", r"</[a-zA-Z][\w\-:.]*\s*>")?;
    Ok(move |ahead: &str, _: &str, _: &[Token], state: &mut MarkupState| {
        let text = find(&re, ahead)?;
        state.last_tag.clear();
        Some(Match::new(text))
    })
}

/// Everything up to the first of `stops`, or the rest of the input
fn until(
    stops: &'static [&'static str],
) -> impl Fn(&str, &str, &[Token], &mut MarkupState) -> Option<Match> + Send + Sync + 'static {
    move |ahead: &str, _: &str, _: &[Token], _: &mut MarkupState| {
        let end = stops.iter().filter_map(|s| ahead.find(s)).min().unwrap_or(ahead.len());
        (end > 0).then(|| Match::new(&ahead[..end]))
    }
}

fn find<'a>(re: &Regex, ahead: &'a str) -> Option<&'a str> {
    re.find(ahead).filter(|m| m.start() == 0).map(|m| m.as_str())
}

fn starts_with_ignore_case(ahead: &str, prefix: &str) -> bool {
    ahead.len() >= prefix.len() && ahead.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

/// Whether a `/` after these tokens starts a regex literal rather than a
/// division
fn regex_allowed(tokens: &[Token]) -> bool {
    let Some(prev) = tokens.iter().rev().find(|t| !t.is_trivia()) else {
        return true;
    };
    match &*prev.kind {
        "operator" => !matches!(prev.text.as_str(), ")" | "]"),
        "keyword" => REGEX_KEYWORDS.contains(&prev.text.as_str()),
        "semicolon" | "braceOpen" | "braceClose" => true,
        // the `${` that opened this region
        "expr" | "hashExpr" => prev.tokens.is_none(),
        _ => false,
    }
}

/// Length of a regex literal (with flags) at the start of `ahead`
fn scan_regex(ahead: &str) -> Option<usize> {
    let bytes = ahead.as_bytes();
    if bytes.first() != Some(&b'/') || matches!(bytes.get(1), Some(b'/' | b'*') | None) {
        return None;
    }
    let mut in_class = false;
    let mut i = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'\n' => return None,
            b'[' => in_class = true,
            b']' => in_class = false,
            b'/' if !in_class => {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
                    i += 1;
                }
                return Some(i);
            }
            _ => {}
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::join_leaves;

    fn texts(tokens: &[Token]) -> Vec<&str> {
        tokens.iter().map(|t| t.text.as_str()).collect()
    }

    #[test]
    fn test_template_expression_region() {
        let tokens = parse_template_tokens("`a${1}b`", &LexOptions::default()).unwrap();
        assert_eq!(texts(&tokens), ["`", "a", "${1}", "b", "`"]);
        assert!(tokens[2].is_kind("expr"));
        assert_eq!(texts(tokens[2].children()), ["${", "1", "}"]);
    }

    #[test]
    fn test_braces_inside_expression() {
        let src = "${ {a: {b: 1}}.a }x";
        let tokens = parse_template_tokens(src, &LexOptions::default()).unwrap();
        assert_eq!(texts(&tokens), ["${ {a: {b: 1}}.a }", "x"]);
    }

    #[test]
    fn test_nested_template_in_expression() {
        let src = "<p>${ok ? `<b>${n}</b>` : ''}</p>";
        let tokens = parse_template_tokens(src, &LexOptions::default()).unwrap();
        assert_eq!(texts(&tokens), ["<p>", "${ok ? `<b>${n}</b>` : ''}", "</p>"]);
        let inner = tokens[1].children().iter().find(|t| t.is_kind("template")).unwrap();
        assert_eq!(texts(inner.children()), ["`", "<b>", "${n}", "</b>", "`"]);
        assert_eq!(join_leaves(&tokens), src);
    }

    #[test]
    fn test_attribute_with_expression() {
        let src = r#"<div class="a ${cls}" id=x>"#;
        let tokens = parse_template_tokens(src, &LexOptions::default()).unwrap();
        assert_eq!(tokens.len(), 1);
        let tag = &tokens[0];
        assert!(tag.is_kind("openTag"));
        let kinds: Vec<_> = tag.children().iter().map(|t| t.kind.to_string()).collect();
        assert_eq!(
            kinds,
            ["tagName", "whitespace", "attrName", "equals", "dquote", "whitespace", "attrName", "equals", "attrName", "tagEnd"]
        );
        let value = &tag.children()[4];
        assert_eq!(texts(value.children()), ["\"", "a ", "${cls}", "\""]);
    }

    #[test]
    fn test_whole_attribute_expression() {
        let tokens = parse_template_tokens("<input ${attrs}/>", &LexOptions::default()).unwrap();
        let kinds: Vec<_> = tokens[0].children().iter().map(|t| t.kind.to_string()).collect();
        assert_eq!(kinds, ["tagName", "whitespace", "expr", "tagEnd"]);
    }

    #[test]
    fn test_regex_versus_division() {
        let tokens = lex_js("a / b / c", &LexOptions::default()).unwrap();
        assert!(tokens.iter().all(|t| !t.is_kind("regex")));

        let tokens = lex_js("x = /a[/]b/g.test(s)", &LexOptions::default()).unwrap();
        let re = tokens.iter().find(|t| t.is_kind("regex")).unwrap();
        assert_eq!(re.text, "/a[/]b/g");
    }

    #[test]
    fn test_keyword_needs_word_boundary() {
        let tokens = lex_js("return returned", &LexOptions::default()).unwrap();
        assert!(tokens[0].is_kind("keyword"));
        assert!(tokens[2].is_kind("identifier"));
    }

    #[test]
    fn test_script_body_is_js() {
        let src = "<script>if (a < b) {}</script><p>x</p>";
        let tokens = lex_html(src, &LexOptions::default()).unwrap();
        assert_eq!(texts(&tokens), ["<script>", "if (a < b) {}", "</script>", "<p>", "x", "</p>"]);
        assert!(tokens[1].is_kind("script"));
        assert!(tokens[1].children().iter().any(|t| t.is("<") && t.is_kind("operator")));
    }

    #[test]
    fn test_empty_script() {
        let tokens = lex_html("<script></script>", &LexOptions::default()).unwrap();
        assert_eq!(texts(&tokens), ["<script>", "</script>"]);
    }

    #[test]
    fn test_comments() {
        let tokens = lex_html("a<!-- <b> -->c", &LexOptions::default()).unwrap();
        assert_eq!(texts(&tokens), ["a", "<!-- <b> -->", "c"]);
        assert!(tokens[1].is_trivia());

        let tokens = parse_template_tokens("<!-- ${x} -->", &LexOptions::default()).unwrap();
        assert_eq!(texts(tokens[0].children()), ["<!--", " ", "${x}", " ", "-->"]);
    }

    #[test]
    fn test_independent_lexes_share_no_depth() {
        // an unbalanced expression must not leak its frame into the next lex
        let _ = parse_template_tokens("${ {", &LexOptions::default());
        let tokens = parse_template_tokens("${a}b", &LexOptions::default()).unwrap();
        assert_eq!(texts(&tokens), ["${a}", "b"]);
    }
}
