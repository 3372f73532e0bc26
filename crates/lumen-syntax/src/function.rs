//! Function Structure
//!
//! Finds the name, parameter list and body of a function-like token run:
//! `function name(a, b) { .. }`, method shorthand `name(a) { .. }`, and arrow
//! functions with or without parentheses and braces.
//!
//! Token slices passed here are expected to come from
//! [`without_spaces`](crate::token::without_spaces): line breaks are kept
//! because they can end a brace-less arrow body.

use crate::error::StructureError;
use crate::fregex::{self, Pattern};
use crate::token::Token;
use std::ops::Range;

/// How structure errors are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Return the error
    #[default]
    Strict,
    /// Treat the input as "not this construct" and return `Ok(None)`
    Probe,
}

impl ErrorPolicy {
    fn handle<T>(self, result: Result<T, StructureError>) -> Result<Option<T>, StructureError> {
        match (result, self) {
            (Ok(v), _) => Ok(Some(v)),
            (Err(e), ErrorPolicy::Strict) => Err(e),
            (Err(e), ErrorPolicy::Probe) => {
                tracing::trace!(error = %e, "probe rejected input");
                Ok(None)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionShape {
    /// `function name(..) { .. }`
    Named,
    /// `name(..) { .. }`
    Method,
    /// `a => ..` or `(a, b) => ..`
    Arrow { braces: bool },
}

/// Token ranges of a parsed function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFunction {
    pub shape: FunctionShape,
    pub name: Option<String>,
    /// Parameter tokens, without the surrounding parentheses
    pub args: Range<usize>,
    /// Body tokens, without the surrounding braces
    pub body: Range<usize>,
    /// Index just past the function
    pub end: usize,
}

/// One declared parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgName {
    Name(String),
    /// `{a, b: c}`; each key with its nested binding if it is renamed or
    /// destructured further
    Object(Vec<(String, Option<ArgName>)>),
    /// `[a, , b]`; `None` for holes
    Array(Vec<Option<ArgName>>),
}

impl ArgName {
    /// Every local name this parameter binds, in declaration order
    pub fn bound_names(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect(&self, out: &mut Vec<String>) {
        match self {
            ArgName::Name(n) => out.push(n.clone()),
            ArgName::Object(entries) => {
                for (key, sub) in entries {
                    match sub {
                        Some(sub) => sub.collect(out),
                        None => out.push(key.clone()),
                    }
                }
            }
            ArgName::Array(items) => items.iter().flatten().for_each(|a| a.collect(out)),
        }
    }

    /// The plain name, if this is not a destructuring pattern
    pub fn as_name(&self) -> Option<&str> {
        match self {
            ArgName::Name(n) => Some(n),
            _ => None,
        }
    }
}

impl ParsedFunction {
    pub fn parse(tokens: &[Token], policy: ErrorPolicy) -> Result<Option<Self>, StructureError> {
        policy.handle(parse_function(tokens))
    }

    pub fn args<'t>(&self, tokens: &'t [Token]) -> &'t [Token] {
        &tokens[self.args.clone()]
    }

    pub fn body<'t>(&self, tokens: &'t [Token]) -> &'t [Token] {
        &tokens[self.body.clone()]
    }

    /// Declared parameters, in position order
    pub fn arg_names(&self, tokens: &[Token]) -> Result<Vec<ArgName>, StructureError> {
        arg_names(self.args(tokens))
    }
}

/// A `<watched>.map(<params> => <body>)` loop expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapExpression {
    /// Tokens of the mapped array expression
    pub watched: Range<usize>,
    pub params: Vec<ArgName>,
    /// Callback body tokens
    pub body: Range<usize>,
    /// Whether the body is a `{ }` block
    pub block: bool,
}

/// Recognize a map call with nothing chained after it.
///
/// `items.map(x => x).join('')` and other trailing calls are not simple
/// loops and yield `None`.
pub fn simple_map_expression(tokens: &[Token]) -> Option<MapExpression> {
    let start = skip_ln(tokens, 0);
    let chain = fregex::and([
        fregex::or([Pattern::from("this"), Pattern::kind("identifier")]),
        fregex::zero_or_more([member()]),
    ]);
    let len = chain.matches(&tokens[start..])?;
    let dot = start + len.checked_sub(2)?;
    if len < 3 || !tokens[dot].is(".") || !tokens[dot + 1].is("map") {
        return None;
    }
    let open = dot + 2;
    if !tokens.get(open)?.is("(") {
        return None;
    }
    let close = find_close(tokens, open).ok()?;
    if skip_ln(tokens, close + 1) != tokens.len() {
        return None;
    }

    let inner = &tokens[open + 1..close];
    let callback = ParsedFunction::parse(inner, ErrorPolicy::Probe).ok()??;
    if skip_ln(inner, callback.end) != inner.len() {
        return None;
    }
    let params = callback.arg_names(inner).ok()?;
    Some(MapExpression {
        watched: start..dot,
        params,
        body: callback.body.start + open + 1..callback.body.end + open + 1,
        block: !matches!(callback.shape, FunctionShape::Arrow { braces: false }),
    })
}

fn member() -> Pattern {
    fregex::or([
        fregex::and([Pattern::from("."), Pattern::kind("identifier")]),
        fregex::and([Pattern::from("?."), Pattern::kind("identifier")]),
        fregex::and([
            Pattern::from("["),
            fregex::or([Pattern::kind("number"), Pattern::kind("string"), Pattern::kind("identifier")]),
            Pattern::from("]"),
        ]),
    ])
}

fn parse_function(tokens: &[Token]) -> Result<ParsedFunction, StructureError> {
    let mut i = skip_ln(tokens, 0);
    if tokens.get(i).is_some_and(|t| t.is("async")) {
        let next = skip_ln(tokens, i + 1);
        if tokens.get(next).is_some_and(|t| !t.is("=>")) {
            i = next;
        }
    }
    let first = tokens.get(i).ok_or_else(|| StructureError::UnexpectedEnd("function".into()))?;

    if first.is("function") {
        let mut j = skip_ln(tokens, i + 1);
        if tokens.get(j).is_some_and(|t| t.is("*")) {
            j = skip_ln(tokens, j + 1);
        }
        let name = match tokens.get(j) {
            Some(t) if t.is_kind("identifier") => {
                j = skip_ln(tokens, j + 1);
                Some(t.text.clone())
            }
            _ => None,
        };
        let open = expect(tokens, j, "(")?;
        let close = find_close(tokens, open)?;
        let (body, end) = block_body(tokens, skip_ln(tokens, close + 1))?;
        return Ok(ParsedFunction {
            shape: FunctionShape::Named,
            name,
            args: open + 1..close,
            body,
            end,
        });
    }

    if first.is("(") {
        let close = find_close(tokens, i)?;
        let arrow = expect(tokens, skip_ln(tokens, close + 1), "=>")?;
        return arrow_function(tokens, i + 1..close, arrow);
    }

    if first.is_kind("identifier") {
        let next = skip_ln(tokens, i + 1);
        match tokens.get(next) {
            Some(t) if t.is("=>") => return arrow_function(tokens, i..i + 1, next),
            Some(t) if t.is("(") => {
                let close = find_close(tokens, next)?;
                let (body, end) = block_body(tokens, skip_ln(tokens, close + 1))?;
                return Ok(ParsedFunction {
                    shape: FunctionShape::Method,
                    name: Some(first.text.clone()),
                    args: next + 1..close,
                    body,
                    end,
                });
            }
            _ => {}
        }
    }
    Err(StructureError::NotAFunction(first.text.clone()))
}

fn arrow_function(tokens: &[Token], args: Range<usize>, arrow: usize) -> Result<ParsedFunction, StructureError> {
    let start = skip_ln(tokens, arrow + 1);
    match tokens.get(start) {
        None => Err(StructureError::UnexpectedEnd("arrow function body".into())),
        Some(t) if t.is("{") => {
            let (body, end) = block_body(tokens, start)?;
            Ok(ParsedFunction {
                shape: FunctionShape::Arrow { braces: true },
                name: None,
                args,
                body,
                end,
            })
        }
        Some(_) => {
            let end = expression_end(tokens, start);
            Ok(ParsedFunction {
                shape: FunctionShape::Arrow { braces: false },
                name: None,
                args,
                body: start..end,
                end,
            })
        }
    }
}

fn block_body(tokens: &[Token], open: usize) -> Result<(Range<usize>, usize), StructureError> {
    let open = expect(tokens, open, "{")?;
    let close = find_close(tokens, open)?;
    Ok((open + 1..close, close + 1))
}

/// End of a brace-less arrow body starting at `start`
fn expression_end(tokens: &[Token], start: usize) -> usize {
    let mut depth = 0usize;
    let mut last = start;
    for (j, t) in tokens.iter().enumerate().skip(start) {
        if t.is_kind("ln") {
            if depth == 0 && j > start && !hangs(&tokens[last]) {
                return last + 1;
            }
            continue;
        }
        match t.text.as_str() {
            "(" | "[" | "{" => depth += 1,
            ")" | "]" | "}" => {
                if depth == 0 {
                    return last_significant_end(tokens, start, j);
                }
                depth -= 1;
            }
            ";" | "," if depth == 0 => return last_significant_end(tokens, start, j),
            _ => {}
        }
        last = j;
    }
    last_significant_end(tokens, start, tokens.len())
}

/// Operators that continue an expression onto the next line
fn hangs(token: &Token) -> bool {
    (token.is_kind("operator") && !matches!(token.text.as_str(), ")" | "]")) || token.is_kind("braceOpen")
}

fn last_significant_end(tokens: &[Token], start: usize, end: usize) -> usize {
    let mut e = end;
    while e > start && tokens[e - 1].is_trivia() {
        e -= 1;
    }
    e
}

fn skip_ln(tokens: &[Token], mut i: usize) -> usize {
    while tokens.get(i).is_some_and(Token::is_trivia) {
        i += 1;
    }
    i
}

fn expect(tokens: &[Token], i: usize, text: &str) -> Result<usize, StructureError> {
    match tokens.get(i) {
        Some(t) if t.is(text) => Ok(i),
        Some(t) => Err(StructureError::Unexpected {
            expected: format!("`{text}`"),
            found: t.text.clone(),
        }),
        None => Err(StructureError::UnexpectedEnd(format!("`{text}`"))),
    }
}

fn closer(open: &str) -> Option<&'static str> {
    match open {
        "(" => Some(")"),
        "[" => Some("]"),
        "{" => Some("}"),
        _ => None,
    }
}

/// Index of the bracket closing the one at `open`
pub fn find_close(tokens: &[Token], open: usize) -> Result<usize, StructureError> {
    let opener = tokens[open].text.as_str();
    let expected = closer(opener).ok_or_else(|| StructureError::Unexpected {
        expected: "an opening bracket".into(),
        found: opener.to_string(),
    })?;
    let mut depth = 0usize;
    for (j, t) in tokens.iter().enumerate().skip(open) {
        match t.text.as_str() {
            "(" | "[" | "{" => depth += 1,
            ")" | "]" | "}" => {
                depth -= 1;
                if depth == 0 {
                    return if t.is(expected) {
                        Ok(j)
                    } else {
                        Err(StructureError::Unexpected {
                            expected: format!("`{expected}`"),
                            found: t.text.clone(),
                        })
                    };
                }
            }
            _ => {}
        }
    }
    Err(StructureError::Unclosed {
        open: opener.to_string(),
        expected: expected.to_string(),
        index: open,
    })
}

/// Parse a parameter list (the tokens between the parentheses)
pub fn arg_names(tokens: &[Token]) -> Result<Vec<ArgName>, StructureError> {
    let sig: Vec<&Token> = tokens.iter().filter(|t| !t.is_trivia()).collect();
    split_top_level(&sig, ",")
        .into_iter()
        .filter(|piece| !piece.is_empty())
        .map(binding)
        .collect()
}

/// Split at `sep` tokens outside brackets
fn split_top_level<'a, 't>(tokens: &'a [&'t Token], sep: &str) -> Vec<&'a [&'t Token]> {
    let mut pieces = Vec::new();
    let mut depth = 0i32;
    let mut from = 0;
    for (i, t) in tokens.iter().enumerate() {
        match t.text.as_str() {
            "(" | "[" | "{" => depth += 1,
            ")" | "]" | "}" => depth -= 1,
            s if s == sep && depth == 0 => {
                pieces.push(&tokens[from..i]);
                from = i + 1;
            }
            _ => {}
        }
    }
    pieces.push(&tokens[from..]);
    pieces
}

/// Binding target of one parameter; anything after a top-level `=` is a
/// default value and ignored
fn binding(piece: &[&Token]) -> Result<ArgName, StructureError> {
    let target = split_top_level(piece, "=")[0];
    let target = match target.first() {
        Some(t) if t.is("...") => &target[1..],
        _ => target,
    };
    let first = target.first().ok_or_else(|| StructureError::UnexpectedEnd("parameter name".into()))?;
    match first.text.as_str() {
        "{" => {
            let inner = &target[1..target.len().saturating_sub(1).max(1)];
            let mut entries = Vec::new();
            for entry in split_top_level(inner, ",") {
                let entry = match entry.first() {
                    Some(t) if t.is("...") => &entry[1..],
                    _ => entry,
                };
                let Some(key) = entry.first() else { continue };
                let nested = match entry.get(1) {
                    Some(t) if t.is(":") => Some(binding(&entry[2..])?),
                    _ => None,
                };
                entries.push((unquote(&key.text), nested));
            }
            Ok(ArgName::Object(entries))
        }
        "[" => {
            let inner = &target[1..target.len().saturating_sub(1).max(1)];
            let items = split_top_level(inner, ",")
                .into_iter()
                .map(|item| if item.is_empty() { Ok(None) } else { binding(item).map(Some) })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ArgName::Array(items))
        }
        _ if first.is_kind("identifier") => Ok(ArgName::Name(first.text.clone())),
        _ => Err(StructureError::Unexpected {
            expected: "parameter name".into(),
            found: first.text.clone(),
        }),
    }
}

fn unquote(text: &str) -> String {
    let quoted = text.len() >= 2 && (text.starts_with('"') || text.starts_with('\''));
    if quoted { text[1..text.len() - 1].to_string() } else { text.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::LexOptions;
    use crate::markup::lex_js;
    use crate::token::{join, without_spaces};

    fn js(src: &str) -> Vec<Token> {
        without_spaces(&lex_js(src, &LexOptions::default()).unwrap())
    }

    #[test]
    fn test_named_function() {
        let tokens = js("function add(a, b) { return a + b }");
        let f = ParsedFunction::parse(&tokens, ErrorPolicy::Strict).unwrap().unwrap();
        assert_eq!(f.shape, FunctionShape::Named);
        assert_eq!(f.name.as_deref(), Some("add"));
        assert_eq!(join(f.args(&tokens)), "a,b");
        assert_eq!(join(f.body(&tokens)), "returna+b");
        assert_eq!(f.end, tokens.len());
    }

    #[test]
    fn test_method_and_arrows() {
        let tokens = js("render(x) { x }");
        let f = ParsedFunction::parse(&tokens, ErrorPolicy::Strict).unwrap().unwrap();
        assert_eq!(f.shape, FunctionShape::Method);

        let tokens = js("x => x * 2");
        let f = ParsedFunction::parse(&tokens, ErrorPolicy::Strict).unwrap().unwrap();
        assert_eq!(f.shape, FunctionShape::Arrow { braces: false });
        assert_eq!(join(f.args(&tokens)), "x");
        assert_eq!(join(f.body(&tokens)), "x*2");

        let tokens = js("(a, b) => { return a }");
        let f = ParsedFunction::parse(&tokens, ErrorPolicy::Strict).unwrap().unwrap();
        assert_eq!(f.shape, FunctionShape::Arrow { braces: true });
        assert_eq!(join(f.body(&tokens)), "returna");
    }

    #[test]
    fn test_braceless_body_terminators() {
        let tokens = js("x => x + 1; y");
        let f = ParsedFunction::parse(&tokens, ErrorPolicy::Strict).unwrap().unwrap();
        assert_eq!(join(f.body(&tokens)), "x+1");

        let tokens = js("x => f(x, 1), 2");
        let f = ParsedFunction::parse(&tokens, ErrorPolicy::Strict).unwrap().unwrap();
        assert_eq!(join(f.body(&tokens)), "f(x,1)");

        let tokens = js("x => x +\n 1\nnext");
        let f = ParsedFunction::parse(&tokens, ErrorPolicy::Strict).unwrap().unwrap();
        assert_eq!(join(f.body(&tokens)), "x+\n1");

        let tokens = js("x => x) + 1");
        let f = ParsedFunction::parse(&tokens, ErrorPolicy::Strict).unwrap().unwrap();
        assert_eq!(join(f.body(&tokens)), "x");
    }

    #[test]
    fn test_arg_names_with_destructuring() {
        let tokens = js("function({a, b}={}, c) {}");
        let f = ParsedFunction::parse(&tokens, ErrorPolicy::Strict).unwrap().unwrap();
        let names = f.arg_names(&tokens).unwrap();
        assert_eq!(
            names,
            vec![
                ArgName::Object(vec![("a".into(), None), ("b".into(), None)]),
                ArgName::Name("c".into()),
            ]
        );
    }

    #[test]
    fn test_arg_names_nested_and_defaults() {
        let tokens = js("({x: {y}, z = [1, 2]}, [p, , q] = [], n = {a: 1}) => 0");
        let f = ParsedFunction::parse(&tokens, ErrorPolicy::Strict).unwrap().unwrap();
        let names = f.arg_names(&tokens).unwrap();
        assert_eq!(names.len(), 3);
        assert_eq!(names[0].bound_names(), ["y", "z"]);
        assert_eq!(
            names[1],
            ArgName::Array(vec![Some(ArgName::Name("p".into())), None, Some(ArgName::Name("q".into()))])
        );
        assert_eq!(names[2].as_name(), Some("n"));
    }

    #[test]
    fn test_probe_policy() {
        let tokens = js("a + b");
        assert_eq!(ParsedFunction::parse(&tokens, ErrorPolicy::Probe), Ok(None));
        assert!(matches!(
            ParsedFunction::parse(&tokens, ErrorPolicy::Strict),
            Err(StructureError::NotAFunction(_))
        ));

        let tokens = js("function f(a { }");
        assert!(ParsedFunction::parse(&tokens, ErrorPolicy::Strict).is_err());
        assert_eq!(ParsedFunction::parse(&tokens, ErrorPolicy::Probe), Ok(None));
    }

    #[test]
    fn test_simple_map_expression() {
        let tokens = js("this.fruits.map(f => f)");
        let m = simple_map_expression(&tokens).unwrap();
        assert_eq!(join(&tokens[m.watched.clone()]), "this.fruits");
        assert_eq!(m.params, vec![ArgName::Name("f".into())]);
        assert_eq!(join(&tokens[m.body.clone()]), "f");
        assert!(!m.block);

        let tokens = js("this.pets[0].toys.map((t, i) => { return t })");
        let m = simple_map_expression(&tokens).unwrap();
        assert_eq!(join(&tokens[m.watched.clone()]), "this.pets[0].toys");
        assert_eq!(m.params.len(), 2);
        assert!(m.block);
    }

    #[test]
    fn test_chained_map_is_not_simple() {
        assert!(simple_map_expression(&js("this.a.map(x => x).reduce((s, x) => s + x)")).is_none());
        assert!(simple_map_expression(&js("this.a.map(x => x).join('')")).is_none());
        assert!(simple_map_expression(&js("this.a.filter(x => x)")).is_none());
        assert!(simple_map_expression(&js("this.a.map(x => x, this)")).is_none());
    }
}
