//! Expressions
//!
//! AST and recursive-descent parser for the script inside `${...}`. Input
//! is the token run the markup grammar produced for the expression body,
//! so no re-lexing happens here. One parse method per precedence level,
//! lowest first.

use crate::compile::{self, NodeSpec};
use crate::error::TemplateError;
use lumen_reactive::Value;
use lumen_syntax::function::{arg_names, find_close};
use lumen_syntax::token::{join, significant};
use lumen_syntax::{ArgName, Token};
use std::rc::Rc;

type ParseResult<T> = Result<T, TemplateError>;

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    /// Template literal without markup, evaluates to a string
    Template(Vec<TemplatePart>),
    /// Template literal containing markup, evaluates to a fragment
    Markup(Rc<Vec<NodeSpec>>),
    Array(Vec<Argument>),
    Object(Vec<Property>),
    Identifier(String),
    This,
    Member { object: Box<Expr>, property: Key, optional: bool },
    Call { callee: Box<Expr>, arguments: Vec<Argument>, optional: bool },
    Arrow(Rc<Function>),
    Unary { operator: UnaryOp, argument: Box<Expr> },
    Update { operator: UpdateOp, prefix: bool, argument: Box<Expr> },
    Binary { operator: BinaryOp, left: Box<Expr>, right: Box<Expr> },
    Logical { operator: LogicalOp, left: Box<Expr>, right: Box<Expr> },
    Conditional { test: Box<Expr>, consequent: Box<Expr>, alternate: Box<Expr> },
    Assign { operator: AssignOp, target: Box<Expr>, value: Box<Expr> },
    /// Statement list evaluated in a child scope, yielding its `return`
    Block(Rc<Vec<Stmt>>),
}

#[derive(Debug, Clone)]
pub enum TemplatePart {
    Text(String),
    Expr(Expr),
}

/// Property name in a member access or object literal
#[derive(Debug, Clone)]
pub enum Key {
    Name(String),
    Computed(Box<Expr>),
}

#[derive(Debug, Clone)]
pub enum Property {
    Init { key: Key, value: Expr },
    Spread(Expr),
}

/// Array literal element or call argument
#[derive(Debug, Clone)]
pub enum Argument {
    Expr(Expr),
    Spread(Expr),
    Hole,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub target: ArgName,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone)]
pub enum Body {
    Expr(Expr),
    Block(Vec<Stmt>),
}

#[derive(Debug, Clone)]
pub struct Function {
    pub params: Vec<Param>,
    pub body: Body,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Declare(Vec<(ArgName, Option<Expr>)>),
    Expr(Expr),
    If { test: Expr, consequent: Box<Stmt>, alternate: Option<Box<Stmt>> },
    Return(Option<Expr>),
    Block(Vec<Stmt>),
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp { Minus, Plus, Not, BitwiseNot, Typeof, Void }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp { Increment, Decrement }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add, Sub, Mul, Div, Mod, Pow, LessThan, LessThanEq, GreaterThan, GreaterThanEq,
    Equal, NotEqual, StrictEqual, StrictNotEqual, LeftShift, RightShift, UnsignedRightShift,
    BitwiseAnd, BitwiseOr, BitwiseXor, In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp { And, Or, NullishCoalescing }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp { Assign, AddAssign, SubAssign, MulAssign, DivAssign, ModAssign, AndAssign, OrAssign, NullishAssign }

impl AssignOp {
    fn from_text(text: &str) -> Option<Self> {
        Some(match text {
            "=" => AssignOp::Assign,
            "+=" => AssignOp::AddAssign,
            "-=" => AssignOp::SubAssign,
            "*=" => AssignOp::MulAssign,
            "/=" => AssignOp::DivAssign,
            "%=" => AssignOp::ModAssign,
            "&&=" => AssignOp::AndAssign,
            "||=" => AssignOp::OrAssign,
            "??=" => AssignOp::NullishAssign,
            _ => return None,
        })
    }
}

impl Expr {
    /// Names of a plain property chain such as `this.a.b` or `item[0]`.
    /// `None` for anything with calls, operators or dynamic keys.
    pub fn chain(&self) -> Option<Vec<String>> {
        match self {
            Expr::This => Some(vec!["this".to_string()]),
            Expr::Identifier(name) => Some(vec![name.clone()]),
            Expr::Member { object, property, .. } => {
                let mut chain = object.chain()?;
                chain.push(property.static_name()?);
                Some(chain)
            }
            _ => None,
        }
    }
}

impl Key {
    /// The key when it is known without evaluating anything
    pub fn static_name(&self) -> Option<String> {
        match self {
            Key::Name(name) => Some(name.clone()),
            Key::Computed(expr) => match expr.as_ref() {
                Expr::Literal(Value::String(s)) => Some(s.to_string()),
                Expr::Literal(Value::Number(n)) => Some(lumen_reactive::number_to_string(*n)),
                _ => None,
            },
        }
    }
}

/// Parse one expression. `tokens` may contain whitespace and comments.
pub fn parse_expression(tokens: &[Token]) -> ParseResult<Expr> {
    let tokens = significant(tokens);
    let mut parser = Parser::new(&tokens);
    let expr = parser.parse_expression()?;
    parser.finish()?;
    Ok(expr)
}

/// Parse the statements of a block body (without its braces)
pub fn parse_statements(tokens: &[Token]) -> ParseResult<Vec<Stmt>> {
    let tokens = significant(tokens);
    let mut parser = Parser::new(&tokens);
    let mut body = Vec::new();
    while !parser.at_end() {
        body.push(parser.parse_statement()?);
    }
    Ok(body)
}

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Parser<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&'t Token> {
        self.tokens.get(self.pos + offset)
    }

    fn check(&self, text: &str) -> bool {
        self.peek().is_some_and(|t| t.is(text) && !t.is_kind("string") && !t.is_kind("template"))
    }

    fn advance(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn eat(&mut self, text: &str) -> bool {
        let found = self.check(text);
        if found {
            self.pos += 1;
        }
        found
    }

    fn consume(&mut self, text: &str) -> ParseResult<()> {
        if self.eat(text) {
            Ok(())
        } else {
            Err(self.error(format!("expected `{text}`")))
        }
    }

    fn finish(&self) -> ParseResult<()> {
        if self.at_end() { Ok(()) } else { Err(self.error("unexpected trailing tokens".into())) }
    }

    fn error(&self, message: String) -> TemplateError {
        let found = match self.peek() {
            Some(t) => format!("{message}, found `{}`", t.text),
            None => format!("{message}, found end of input"),
        };
        TemplateError::Syntax {
            message: found,
            snippet: join(self.tokens),
        }
    }

    // Statements

    fn parse_statement(&mut self) -> ParseResult<Stmt> {
        if self.eat(";") {
            return Ok(Stmt::Empty);
        }
        if self.check("{") {
            return Ok(Stmt::Block(self.parse_block()?));
        }
        if self.check("const") || self.check("let") || self.check("var") {
            return self.parse_declaration();
        }
        if self.eat("if") {
            self.consume("(")?;
            let test = self.parse_expression()?;
            self.consume(")")?;
            let consequent = Box::new(self.parse_statement()?);
            let alternate = if self.eat("else") { Some(Box::new(self.parse_statement()?)) } else { None };
            return Ok(Stmt::If { test, consequent, alternate });
        }
        if self.eat("return") {
            let argument = if self.at_end() || self.check(";") || self.check("}") {
                None
            } else {
                Some(self.parse_expression()?)
            };
            self.eat(";");
            return Ok(Stmt::Return(argument));
        }
        let expr = self.parse_expression()?;
        self.eat(";");
        Ok(Stmt::Expr(expr))
    }

    fn parse_block(&mut self) -> ParseResult<Vec<Stmt>> {
        self.consume("{")?;
        let mut body = Vec::new();
        while !self.check("}") {
            if self.at_end() {
                return Err(self.error("expected `}`".into()));
            }
            body.push(self.parse_statement()?);
        }
        self.consume("}")?;
        Ok(body)
    }

    fn parse_declaration(&mut self) -> ParseResult<Stmt> {
        self.advance();
        let mut declarations = Vec::new();
        loop {
            let target = self.parse_pattern()?;
            let init = if self.eat("=") { Some(self.parse_assignment()?) } else { None };
            declarations.push((target, init));
            if !self.eat(",") {
                break;
            }
        }
        self.eat(";");
        Ok(Stmt::Declare(declarations))
    }

    /// A binding target: a name or a destructuring pattern
    fn parse_pattern(&mut self) -> ParseResult<ArgName> {
        let start = self.pos;
        let end = if self.check("{") || self.check("[") {
            find_close(self.tokens, start)? + 1
        } else if self.peek().is_some_and(|t| t.is_kind("identifier")) {
            start + 1
        } else {
            return Err(self.error("expected a binding name".into()));
        };
        self.pos = end;
        arg_names(&self.tokens[start..end])?
            .into_iter()
            .next()
            .ok_or_else(|| self.error("expected a binding name".into()))
    }

    // Expressions

    fn parse_expression(&mut self) -> ParseResult<Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> ParseResult<Expr> {
        if self.is_arrow_start() {
            return self.parse_arrow();
        }
        let target = self.parse_conditional()?;
        let Some(operator) = self.peek().filter(|t| t.is_kind("operator")).and_then(|t| AssignOp::from_text(&t.text))
        else {
            return Ok(target);
        };
        if !matches!(target, Expr::Identifier(_) | Expr::Member { .. }) {
            return Err(self.error("invalid assignment target".into()));
        }
        self.advance();
        let value = self.parse_assignment()?;
        Ok(Expr::Assign {
            operator,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    fn is_arrow_start(&self) -> bool {
        match self.peek() {
            Some(t) if t.is_kind("identifier") => self.peek_at(1).is_some_and(|n| n.is("=>")),
            Some(t) if t.is("(") => find_close(self.tokens, self.pos)
                .ok()
                .and_then(|close| self.tokens.get(close + 1))
                .is_some_and(|n| n.is("=>")),
            _ => false,
        }
    }

    fn parse_arrow(&mut self) -> ParseResult<Expr> {
        let params = if self.check("(") {
            let close = find_close(self.tokens, self.pos)?;
            let params = parse_params(&self.tokens[self.pos + 1..close])?;
            self.pos = close + 1;
            params
        } else {
            let name = self.advance().map(|t| t.text.clone()).unwrap_or_default();
            vec![Param {
                target: ArgName::Name(name),
                default: None,
            }]
        };
        self.consume("=>")?;
        let body = if self.check("{") {
            Body::Block(self.parse_block()?)
        } else {
            Body::Expr(self.parse_assignment()?)
        };
        Ok(Expr::Arrow(Rc::new(Function { params, body })))
    }

    fn parse_function_expression(&mut self) -> ParseResult<Expr> {
        if self.peek().is_some_and(|t| t.is_kind("identifier")) {
            self.advance();
        }
        if !self.check("(") {
            return Err(self.error("expected `(`".into()));
        }
        let close = find_close(self.tokens, self.pos)?;
        let params = parse_params(&self.tokens[self.pos + 1..close])?;
        self.pos = close + 1;
        let body = Body::Block(self.parse_block()?);
        Ok(Expr::Arrow(Rc::new(Function { params, body })))
    }

    fn parse_conditional(&mut self) -> ParseResult<Expr> {
        let test = self.parse_nullish()?;
        if !self.eat("?") {
            return Ok(test);
        }
        let consequent = self.parse_assignment()?;
        self.consume(":")?;
        let alternate = self.parse_assignment()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn parse_nullish(&mut self) -> ParseResult<Expr> {
        self.logical_level("??", LogicalOp::NullishCoalescing, Self::parse_logical_or)
    }

    fn parse_logical_or(&mut self) -> ParseResult<Expr> {
        self.logical_level("||", LogicalOp::Or, Self::parse_logical_and)
    }

    fn parse_logical_and(&mut self) -> ParseResult<Expr> {
        self.logical_level("&&", LogicalOp::And, Self::parse_bitwise_or)
    }

    fn logical_level(
        &mut self,
        text: &str,
        operator: LogicalOp,
        next: fn(&mut Self) -> ParseResult<Expr>,
    ) -> ParseResult<Expr> {
        let mut left = next(self)?;
        while self.eat(text) {
            let right = next(self)?;
            left = Expr::Logical {
                operator,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_bitwise_or(&mut self) -> ParseResult<Expr> {
        self.binary_level(&[("|", BinaryOp::BitwiseOr)], Self::parse_bitwise_xor)
    }

    fn parse_bitwise_xor(&mut self) -> ParseResult<Expr> {
        self.binary_level(&[("^", BinaryOp::BitwiseXor)], Self::parse_bitwise_and)
    }

    fn parse_bitwise_and(&mut self) -> ParseResult<Expr> {
        self.binary_level(&[("&", BinaryOp::BitwiseAnd)], Self::parse_equality)
    }

    fn parse_equality(&mut self) -> ParseResult<Expr> {
        self.binary_level(
            &[
                ("===", BinaryOp::StrictEqual),
                ("!==", BinaryOp::StrictNotEqual),
                ("==", BinaryOp::Equal),
                ("!=", BinaryOp::NotEqual),
            ],
            Self::parse_comparison,
        )
    }

    fn parse_comparison(&mut self) -> ParseResult<Expr> {
        self.binary_level(
            &[
                ("<=", BinaryOp::LessThanEq),
                (">=", BinaryOp::GreaterThanEq),
                ("<", BinaryOp::LessThan),
                (">", BinaryOp::GreaterThan),
                ("in", BinaryOp::In),
            ],
            Self::parse_shift,
        )
    }

    fn parse_shift(&mut self) -> ParseResult<Expr> {
        self.binary_level(
            &[
                ("<<", BinaryOp::LeftShift),
                (">>>", BinaryOp::UnsignedRightShift),
                (">>", BinaryOp::RightShift),
            ],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> ParseResult<Expr> {
        self.binary_level(&[("+", BinaryOp::Add), ("-", BinaryOp::Sub)], Self::parse_multiplicative)
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Expr> {
        self.binary_level(
            &[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Mod)],
            Self::parse_exponent,
        )
    }

    fn binary_level(
        &mut self,
        operators: &[(&str, BinaryOp)],
        next: fn(&mut Self) -> ParseResult<Expr>,
    ) -> ParseResult<Expr> {
        let mut left = next(self)?;
        loop {
            let Some(&(_, operator)) = operators.iter().find(|(text, _)| self.check(text)) else {
                return Ok(left);
            };
            self.advance();
            let right = next(self)?;
            left = Expr::Binary {
                operator,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    /// `**` is right-associative
    fn parse_exponent(&mut self) -> ParseResult<Expr> {
        let base = self.parse_unary()?;
        if !self.eat("**") {
            return Ok(base);
        }
        let exponent = self.parse_exponent()?;
        Ok(Expr::Binary {
            operator: BinaryOp::Pow,
            left: Box::new(base),
            right: Box::new(exponent),
        })
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        let operator = match self.peek().map(|t| t.text.as_str()) {
            Some("!") => UnaryOp::Not,
            Some("-") => UnaryOp::Minus,
            Some("+") => UnaryOp::Plus,
            Some("~") => UnaryOp::BitwiseNot,
            Some("typeof") => UnaryOp::Typeof,
            Some("void") => UnaryOp::Void,
            Some("++") | Some("--") => {
                let operator = if self.check("++") { UpdateOp::Increment } else { UpdateOp::Decrement };
                self.advance();
                let argument = self.parse_unary()?;
                return update(operator, true, argument).ok_or_else(|| self.error("invalid update target".into()));
            }
            _ => return self.parse_postfix(),
        };
        self.advance();
        let argument = self.parse_unary()?;
        Ok(Expr::Unary {
            operator,
            argument: Box::new(argument),
        })
    }

    fn parse_postfix(&mut self) -> ParseResult<Expr> {
        let expr = self.parse_call()?;
        let operator = if self.check("++") {
            UpdateOp::Increment
        } else if self.check("--") {
            UpdateOp::Decrement
        } else {
            return Ok(expr);
        };
        self.advance();
        update(operator, false, expr).ok_or_else(|| self.error("invalid update target".into()))
    }

    fn parse_call(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(".") {
                let property = self.parse_property_name()?;
                expr = member(expr, Key::Name(property), false);
            } else if self.eat("?.") {
                if self.eat("(") {
                    let arguments = self.parse_arguments()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        arguments,
                        optional: true,
                    };
                } else if self.eat("[") {
                    let property = self.parse_expression()?;
                    self.consume("]")?;
                    expr = member(expr, Key::Computed(Box::new(property)), true);
                } else {
                    let property = self.parse_property_name()?;
                    expr = member(expr, Key::Name(property), true);
                }
            } else if self.eat("[") {
                let property = self.parse_expression()?;
                self.consume("]")?;
                expr = member(expr, Key::Computed(Box::new(property)), false);
            } else if self.eat("(") {
                let arguments = self.parse_arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    arguments,
                    optional: false,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_property_name(&mut self) -> ParseResult<String> {
        match self.peek() {
            Some(t) if t.is_kind("identifier") || t.is_kind("keyword") => {
                self.advance();
                Ok(t.text.clone())
            }
            _ => Err(self.error("expected a property name".into())),
        }
    }

    /// Everything after `(` up to and including `)`
    fn parse_arguments(&mut self) -> ParseResult<Vec<Argument>> {
        let mut arguments = Vec::new();
        while !self.eat(")") {
            if self.at_end() {
                return Err(self.error("expected `)`".into()));
            }
            if self.eat("...") {
                arguments.push(Argument::Spread(self.parse_assignment()?));
            } else {
                arguments.push(Argument::Expr(self.parse_assignment()?));
            }
            if !self.check(")") {
                self.consume(",")?;
            }
        }
        Ok(arguments)
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let Some(token) = self.peek() else {
            return Err(self.error("expected an expression".into()));
        };
        match &*token.kind {
            "number" => {
                self.advance();
                return Ok(Expr::Literal(Value::Number(token.text.parse().unwrap_or(f64::NAN))));
            }
            "hex" => {
                self.advance();
                let n = u64::from_str_radix(&token.text[2..], 16).map(|n| n as f64).unwrap_or(f64::NAN);
                return Ok(Expr::Literal(Value::Number(n)));
            }
            "string" => {
                self.advance();
                let inner = &token.text[1..token.text.len().saturating_sub(1).max(1)];
                return Ok(Expr::Literal(Value::from(unescape(inner))));
            }
            "template" => {
                self.advance();
                return parse_template_literal(token);
            }
            "regex" => return Err(self.error("regular expression literals are not supported".into())),
            "identifier" => {
                self.advance();
                return Ok(Expr::Identifier(token.text.clone()));
            }
            _ => {}
        }
        match token.text.as_str() {
            "(" => {
                self.advance();
                let expr = self.parse_expression()?;
                self.consume(")")?;
                Ok(expr)
            }
            "[" => {
                self.advance();
                self.parse_array_literal()
            }
            "{" => {
                self.advance();
                self.parse_object_literal()
            }
            "true" => self.literal(Value::Bool(true)),
            "false" => self.literal(Value::Bool(false)),
            "null" => self.literal(Value::Null),
            "undefined" => self.literal(Value::Undefined),
            "this" => {
                self.advance();
                Ok(Expr::This)
            }
            "function" => {
                self.advance();
                self.parse_function_expression()
            }
            _ => Err(self.error("expected an expression".into())),
        }
    }

    fn literal(&mut self, value: Value) -> ParseResult<Expr> {
        self.advance();
        Ok(Expr::Literal(value))
    }

    fn parse_array_literal(&mut self) -> ParseResult<Expr> {
        let mut elements = Vec::new();
        while !self.eat("]") {
            if self.at_end() {
                return Err(self.error("expected `]`".into()));
            }
            if self.eat(",") {
                elements.push(Argument::Hole);
                continue;
            }
            if self.eat("...") {
                elements.push(Argument::Spread(self.parse_assignment()?));
            } else {
                elements.push(Argument::Expr(self.parse_assignment()?));
            }
            if !self.check("]") {
                self.consume(",")?;
            }
        }
        Ok(Expr::Array(elements))
    }

    fn parse_object_literal(&mut self) -> ParseResult<Expr> {
        let mut properties = Vec::new();
        while !self.eat("}") {
            if self.at_end() {
                return Err(self.error("expected `}`".into()));
            }
            if self.eat("...") {
                properties.push(Property::Spread(self.parse_assignment()?));
            } else {
                let (key, shorthand) = self.parse_object_key()?;
                let value = if self.eat(":") {
                    self.parse_assignment()?
                } else if self.check("(") {
                    self.parse_function_expression()?
                } else {
                    match shorthand {
                        Some(name) => Expr::Identifier(name),
                        None => return Err(self.error("expected `:`".into())),
                    }
                };
                properties.push(Property::Init { key, value });
            }
            if !self.check("}") {
                self.consume(",")?;
            }
        }
        Ok(Expr::Object(properties))
    }

    /// Key of an object literal entry, and the name it binds when used as
    /// shorthand
    fn parse_object_key(&mut self) -> ParseResult<(Key, Option<String>)> {
        let Some(token) = self.advance() else {
            return Err(self.error("expected a property key".into()));
        };
        match &*token.kind {
            "identifier" => Ok((Key::Name(token.text.clone()), Some(token.text.clone()))),
            "keyword" => Ok((Key::Name(token.text.clone()), None)),
            "string" => {
                let inner = &token.text[1..token.text.len().saturating_sub(1).max(1)];
                Ok((Key::Name(unescape(inner)), None))
            }
            "number" => {
                let n = token.text.parse().unwrap_or(f64::NAN);
                Ok((Key::Name(lumen_reactive::number_to_string(n)), None))
            }
            _ if token.is("[") => {
                let key = self.parse_assignment()?;
                self.consume("]")?;
                Ok((Key::Computed(Box::new(key)), None))
            }
            _ => {
                self.pos -= 1;
                Err(self.error("expected a property key".into()))
            }
        }
    }
}

fn member(object: Expr, property: Key, optional: bool) -> Expr {
    Expr::Member {
        object: Box::new(object),
        property,
        optional,
    }
}

fn update(operator: UpdateOp, prefix: bool, argument: Expr) -> Option<Expr> {
    matches!(argument, Expr::Identifier(_) | Expr::Member { .. }).then(|| Expr::Update {
        operator,
        prefix,
        argument: Box::new(argument),
    })
}

/// Parameters between the parentheses of a function
fn parse_params(tokens: &[Token]) -> ParseResult<Vec<Param>> {
    let mut params = Vec::new();
    for piece in split_top_level(tokens, ",") {
        if piece.is_empty() {
            continue;
        }
        let parts = split_top_level(piece, "=");
        let target_len = parts[0].len();
        let target = arg_names(&piece[..target_len])?
            .into_iter()
            .next()
            .ok_or_else(|| TemplateError::Syntax {
                message: "expected a parameter".into(),
                snippet: join(tokens),
            })?;
        let default = if target_len < piece.len() {
            Some(parse_expression(&piece[target_len + 1..])?)
        } else {
            None
        };
        params.push(Param { target, default });
    }
    Ok(params)
}

/// Split at `sep` tokens outside brackets. Only the first split matters
/// for `=`, later ones stay inside the last piece.
fn split_top_level<'a>(tokens: &'a [Token], sep: &str) -> Vec<&'a [Token]> {
    let mut pieces = Vec::new();
    let mut depth = 0i32;
    let mut from = 0;
    for (i, t) in tokens.iter().enumerate() {
        match t.text.as_str() {
            "(" | "[" | "{" => depth += 1,
            ")" | "]" | "}" => depth -= 1,
            s if s == sep && depth == 0 && !(sep == "=" && !pieces.is_empty()) => {
                pieces.push(&tokens[from..i]);
                from = i + 1;
            }
            _ => {}
        }
    }
    pieces.push(&tokens[from..]);
    pieces
}

/// A template literal token: plain ones become string templates, ones
/// with markup become fragments
fn parse_template_literal(token: &Token) -> ParseResult<Expr> {
    let children = token.children();
    let inner = strip_backticks(children);
    let has_markup = inner
        .iter()
        .any(|t| t.is_kind("openTag") || t.is_kind("closeTag") || t.is_kind("comment"));
    if has_markup {
        return Ok(Expr::Markup(Rc::new(compile::compile_nodes(inner)?)));
    }
    let mut parts = Vec::new();
    for t in inner {
        match &*t.kind {
            "expr" | "hashExpr" => parts.push(TemplatePart::Expr(parse_expression(expression_body(t))?)),
            "escape" => parts.push(TemplatePart::Text(unescape(&t.text))),
            _ => parts.push(TemplatePart::Text(t.text.clone())),
        }
    }
    Ok(Expr::Template(parts))
}

/// Tokens between the backticks of a template region
pub(crate) fn strip_backticks(children: &[Token]) -> &[Token] {
    let start = usize::from(children.first().is_some_and(|t| t.is("`")));
    let end = if children.len() > start && children.last().is_some_and(|t| t.is("`")) {
        children.len() - 1
    } else {
        children.len()
    };
    &children[start..end]
}

/// Tokens between `${` (or `#{`) and the closing `}` of an expression region
pub(crate) fn expression_body(token: &Token) -> &[Token] {
    let children = token.children();
    let start = usize::from(!children.is_empty());
    let end = if children.len() > start && children.last().is_some_and(|t| t.is("}")) {
        children.len() - 1
    } else {
        children.len()
    };
    &children[start..end]
}

/// Resolve backslash escapes of a string or template literal
pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(ch) => out.push(ch),
                    None => out.push_str(&hex),
                }
            }
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(ch) => out.push(ch),
                    None => out.push_str(&hex),
                }
            }
            Some('\n') => {}
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_syntax::{lex_js, LexOptions};

    fn parse(src: &str) -> Expr {
        parse_expression(&lex_js(src, &LexOptions::default()).unwrap()).unwrap()
    }

    #[test]
    fn test_precedence() {
        let Expr::Binary { operator, right, .. } = parse("1 + 2 * 3") else {
            panic!("expected a binary expression");
        };
        assert_eq!(operator, BinaryOp::Add);
        assert!(matches!(*right, Expr::Binary { operator: BinaryOp::Mul, .. }));

        let Expr::Conditional { test, .. } = parse("a && b ? c : d") else {
            panic!("expected a conditional");
        };
        assert!(matches!(*test, Expr::Logical { operator: LogicalOp::And, .. }));
    }

    #[test]
    fn test_member_chain() {
        assert_eq!(
            parse("this.items[0].name").chain(),
            Some(vec!["this".to_string(), "items".into(), "0".into(), "name".into()])
        );
        assert_eq!(parse("this.items[i]").chain(), None);
        assert_eq!(parse("this.items.map(x => x)").chain(), None);
    }

    #[test]
    fn test_arrow_forms() {
        let Expr::Arrow(f) = parse("({a, b: [c]}, i = 2) => { const d = a + i; return d }") else {
            panic!("expected an arrow function");
        };
        assert_eq!(f.params.len(), 2);
        assert!(matches!(f.params[0].target, ArgName::Object(_)));
        assert!(f.params[1].default.is_some());
        let Body::Block(body) = &f.body else {
            panic!("expected a block body");
        };
        assert!(matches!(body[0], Stmt::Declare(_)));
        assert!(matches!(body[1], Stmt::Return(Some(_))));

        assert!(matches!(parse("x => x * 2"), Expr::Arrow(_)));
    }

    #[test]
    fn test_assignment_targets() {
        assert!(matches!(parse("this.count += 1"), Expr::Assign { operator: AssignOp::AddAssign, .. }));
        assert!(matches!(parse("this.count++"), Expr::Update { prefix: false, .. }));
        let err = parse_expression(&lex_js("1 = 2", &LexOptions::default()).unwrap()).unwrap_err();
        assert!(matches!(err, TemplateError::Syntax { .. }));
    }

    #[test]
    fn test_literals() {
        assert!(matches!(parse("0x1f"), Expr::Literal(Value::Number(n)) if n == 31.0));
        assert!(matches!(parse("'a\\'b'"), Expr::Literal(Value::String(s)) if &*s == "a'b"));
        let Expr::Object(props) = parse("{a, 'b c': 1, [k]: 2, ...rest}") else {
            panic!("expected an object literal");
        };
        assert_eq!(props.len(), 4);
        let Expr::Template(parts) = parse("`x${1}y`") else {
            panic!("expected a template literal");
        };
        assert_eq!(parts.len(), 3);
    }

    #[test]
    fn test_markup_literal() {
        assert!(matches!(parse("ok ? `<b>${n}</b>` : ''"), Expr::Conditional { .. }));
        let Expr::Conditional { consequent, .. } = parse("ok ? `<b>${n}</b>` : ''") else {
            unreachable!()
        };
        assert!(matches!(*consequent, Expr::Markup(_)));
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        let err = parse_expression(&lex_js("a b", &LexOptions::default()).unwrap()).unwrap_err();
        assert!(err.to_string().contains("trailing"));
    }
}
