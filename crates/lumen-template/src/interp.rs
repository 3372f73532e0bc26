//! Interpreter
//!
//! Tree-walking evaluation of [`Expr`] against a [`Scope`]. Writes through
//! member expressions go through the reactive objects, so an assignment in
//! an event handler patches the DOM before it returns.

use crate::builtins;
use crate::error::{EvalError, Result};
use crate::expr::{
    Argument, AssignOp, BinaryOp, Body, Expr, Function, Key, LogicalOp, Property, Stmt, TemplatePart, UnaryOp,
    UpdateOp,
};
use crate::host::{DomNodeRef, Fragment};
use crate::scope::{ItemPath, Scope, ScopeItem};
use lumen_reactive::{Callable, ObjRef, Value};
use lumen_syntax::ArgName;
use std::rc::Rc;

/// Arrow function or function expression together with its defining scope
pub struct Closure {
    function: Rc<Function>,
    scope: Scope,
}

impl Callable for Closure {
    fn call(&self, _this: &Value, args: &[Value]) -> anyhow::Result<Value> {
        self.invoke(args).map_err(anyhow::Error::from)
    }
}

impl Closure {
    fn invoke(&self, args: &[Value]) -> Result<Value> {
        let scope = self.scope.child();
        for (i, param) in self.function.params.iter().enumerate() {
            let mut value = args.get(i).cloned().unwrap_or_default();
            if let (Value::Undefined, Some(default)) = (&value, &param.default) {
                value = eval(default, &scope)?;
            }
            bind_pattern(&scope, &param.target, value, ItemPath::Unbound);
        }
        match &self.function.body {
            Body::Expr(expr) => eval(expr, &scope),
            Body::Block(stmts) => exec_block(stmts, &scope),
        }
    }
}

enum Flow {
    Normal,
    Return(Value),
}

/// Run a statement list and yield what it returns
pub fn exec_block(stmts: &[Stmt], scope: &Scope) -> Result<Value> {
    for stmt in stmts {
        if let Flow::Return(value) = exec(stmt, scope)? {
            return Ok(value);
        }
    }
    Ok(Value::Undefined)
}

fn exec(stmt: &Stmt, scope: &Scope) -> Result<Flow> {
    match stmt {
        Stmt::Empty => Ok(Flow::Normal),
        Stmt::Expr(expr) => {
            eval(expr, scope)?;
            Ok(Flow::Normal)
        }
        Stmt::Declare(declarations) => {
            for (target, init) in declarations {
                let value = match init {
                    Some(init) => eval(init, scope)?,
                    None => Value::Undefined,
                };
                bind_pattern(scope, target, value, ItemPath::Unbound);
            }
            Ok(Flow::Normal)
        }
        Stmt::If { test, consequent, alternate } => {
            if eval(test, scope)?.truthy() {
                exec(consequent, scope)
            } else if let Some(alternate) = alternate {
                exec(alternate, scope)
            } else {
                Ok(Flow::Normal)
            }
        }
        Stmt::Return(argument) => {
            let value = match argument {
                Some(argument) => eval(argument, scope)?,
                None => Value::Undefined,
            };
            Ok(Flow::Return(value))
        }
        Stmt::Block(stmts) => {
            let inner = scope.child();
            for stmt in stmts {
                if let Flow::Return(value) = exec(stmt, &inner)? {
                    return Ok(Flow::Return(value));
                }
            }
            Ok(Flow::Normal)
        }
    }
}

/// Bind a (possibly destructuring) target. `path` is where `value` lives in
/// the component data, if anywhere.
pub fn bind_pattern(scope: &Scope, target: &ArgName, value: Value, path: ItemPath) {
    match target {
        ArgName::Name(name) => scope.define(name, ScopeItem::new(path, value)),
        ArgName::Object(entries) => {
            for (key, nested) in entries {
                let field = property_or_undefined(&value, key);
                let field_path = path.join(std::slice::from_ref(key));
                match nested {
                    Some(nested) => bind_pattern(scope, nested, field, field_path),
                    None => scope.define(key, ScopeItem::new(field_path, field)),
                }
            }
        }
        ArgName::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                let Some(item) = item else { continue };
                let key = i.to_string();
                let element = property_or_undefined(&value, &key);
                bind_pattern(scope, item, element, path.join(&[key]));
            }
        }
    }
}

fn property_or_undefined(value: &Value, key: &str) -> Value {
    get_property(value, key).unwrap_or_default()
}

pub fn eval(expr: &Expr, scope: &Scope) -> Result<Value> {
    Ok(eval_chain(expr, scope)?.unwrap_or_default())
}

/// Evaluate, reporting `None` when an optional link (`?.`) short-circuited
/// the chain
fn eval_chain(expr: &Expr, scope: &Scope) -> Result<Option<Value>> {
    match expr {
        Expr::Member { object, property, optional } => {
            let Some(target) = eval_chain(object, scope)? else {
                return Ok(None);
            };
            if *optional && target.is_nullish() {
                return Ok(None);
            }
            let key = eval_key(property, scope)?;
            get_property(&target, &key).map(Some)
        }
        Expr::Call { callee, arguments, optional } => {
            if let Expr::Member { object, property, optional: member_optional } = callee.as_ref() {
                let Some(target) = eval_chain(object, scope)? else {
                    return Ok(None);
                };
                if *member_optional && target.is_nullish() {
                    return Ok(None);
                }
                let key = eval_key(property, scope)?;
                let method = match &target {
                    Value::Object(obj) if obj.has(&key) => obj.get(&key),
                    _ => Value::Undefined,
                };
                if *optional && method.is_nullish() && !builtins::has_method(&target, &key) {
                    return Ok(None);
                }
                let args = eval_arguments(arguments, scope)?;
                return call_method(&target, &key, method, &args).map(Some);
            }
            let Some(function) = eval_chain(callee, scope)? else {
                return Ok(None);
            };
            if *optional && function.is_nullish() {
                return Ok(None);
            }
            let args = eval_arguments(arguments, scope)?;
            let name = match callee.as_ref() {
                Expr::Identifier(name) => name.as_str(),
                _ => "expression",
            };
            call_function(&function, &Value::Undefined, &args, name).map(Some)
        }
        _ => eval_plain(expr, scope).map(Some),
    }
}

fn eval_plain(expr: &Expr, scope: &Scope) -> Result<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Template(parts) => {
            let mut out = String::new();
            for part in parts {
                match part {
                    TemplatePart::Text(text) => out.push_str(text),
                    TemplatePart::Expr(expr) => out.push_str(&eval(expr, scope)?.to_display_string()),
                }
            }
            Ok(Value::from(out))
        }
        Expr::Markup(nodes) => Ok(Value::Host(Rc::new(Fragment::new(nodes.clone(), scope.clone())))),
        Expr::Array(elements) => {
            let mut items = Vec::with_capacity(elements.len());
            for element in elements {
                match element {
                    Argument::Expr(expr) => items.push(eval(expr, scope)?),
                    Argument::Spread(expr) => items.extend(spread(&eval(expr, scope)?)),
                    Argument::Hole => items.push(Value::Undefined),
                }
            }
            Ok(Value::Object(ObjRef::array(items)))
        }
        Expr::Object(properties) => {
            let mut entries: Vec<(String, Value)> = Vec::with_capacity(properties.len());
            let mut put = |key: String, value: Value| match entries.iter_mut().find(|(k, _)| *k == key) {
                Some((_, slot)) => *slot = value,
                None => entries.push((key, value)),
            };
            for property in properties {
                match property {
                    Property::Init { key, value } => {
                        let key = eval_key(key, scope)?;
                        put(key, eval(value, scope)?);
                    }
                    Property::Spread(expr) => {
                        if let Value::Object(source) = eval(expr, scope)? {
                            for (key, value) in source.entries() {
                                put(key, value);
                            }
                        }
                    }
                }
            }
            Ok(Value::Object(ObjRef::object(entries)))
        }
        Expr::Identifier(name) => lookup(name, scope),
        Expr::This => Ok(scope.this()),
        Expr::Arrow(function) => Ok(Value::Function(Rc::new(Closure {
            function: function.clone(),
            scope: scope.clone(),
        }))),
        Expr::Unary { operator, argument } => {
            if let (UnaryOp::Typeof, Expr::Identifier(name)) = (operator, argument.as_ref()) {
                if scope.lookup(name).is_none() && builtins::global(name).is_none() {
                    return Ok(Value::str("undefined"));
                }
            }
            let value = eval(argument, scope)?;
            Ok(match operator {
                UnaryOp::Not => Value::Bool(!value.truthy()),
                UnaryOp::Minus => Value::Number(-value.to_number()),
                UnaryOp::Plus => Value::Number(value.to_number()),
                UnaryOp::BitwiseNot => Value::Number(f64::from(!to_int32(value.to_number()))),
                UnaryOp::Typeof => Value::str(value.type_of()),
                UnaryOp::Void => Value::Undefined,
            })
        }
        Expr::Update { operator, prefix, argument } => {
            let old = eval(argument, scope)?.to_number();
            let new = match operator {
                UpdateOp::Increment => old + 1.0,
                UpdateOp::Decrement => old - 1.0,
            };
            assign(argument, Value::Number(new), scope)?;
            Ok(Value::Number(if *prefix { new } else { old }))
        }
        Expr::Binary { operator, left, right } => {
            let left = eval(left, scope)?;
            let right = eval(right, scope)?;
            Ok(binary(*operator, &left, &right))
        }
        Expr::Logical { operator, left, right } => {
            let left = eval(left, scope)?;
            let short_circuit = match operator {
                LogicalOp::And => !left.truthy(),
                LogicalOp::Or => left.truthy(),
                LogicalOp::NullishCoalescing => !left.is_nullish(),
            };
            if short_circuit { Ok(left) } else { eval(right, scope) }
        }
        Expr::Conditional { test, consequent, alternate } => {
            if eval(test, scope)?.truthy() {
                eval(consequent, scope)
            } else {
                eval(alternate, scope)
            }
        }
        Expr::Assign { operator, target, value } => {
            let result = match operator {
                AssignOp::Assign => eval(value, scope)?,
                AssignOp::AndAssign | AssignOp::OrAssign | AssignOp::NullishAssign => {
                    let current = eval(target, scope)?;
                    let keep = match operator {
                        AssignOp::AndAssign => !current.truthy(),
                        AssignOp::OrAssign => current.truthy(),
                        _ => !current.is_nullish(),
                    };
                    if keep {
                        return Ok(current);
                    }
                    eval(value, scope)?
                }
                compound => {
                    let current = eval(target, scope)?;
                    let operand = eval(value, scope)?;
                    let op = match compound {
                        AssignOp::AddAssign => BinaryOp::Add,
                        AssignOp::SubAssign => BinaryOp::Sub,
                        AssignOp::MulAssign => BinaryOp::Mul,
                        AssignOp::DivAssign => BinaryOp::Div,
                        _ => BinaryOp::Mod,
                    };
                    binary(op, &current, &operand)
                }
            };
            assign(target, result.clone(), scope)?;
            Ok(result)
        }
        Expr::Block(stmts) => exec_block(stmts, &scope.child()),
        Expr::Member { .. } | Expr::Call { .. } => eval(expr, scope),
    }
}

fn lookup(name: &str, scope: &Scope) -> Result<Value> {
    if let Some(item) = scope.lookup(name) {
        return Ok(item.value);
    }
    builtins::global(name).ok_or_else(|| EvalError::NotDefined(name.to_string()))
}

fn eval_key(key: &Key, scope: &Scope) -> Result<String> {
    match key {
        Key::Name(name) => Ok(name.clone()),
        Key::Computed(expr) => Ok(eval(expr, scope)?.to_display_string()),
    }
}

fn eval_arguments(arguments: &[Argument], scope: &Scope) -> Result<Vec<Value>> {
    let mut values = Vec::with_capacity(arguments.len());
    for argument in arguments {
        match argument {
            Argument::Expr(expr) => values.push(eval(expr, scope)?),
            Argument::Spread(expr) => values.extend(spread(&eval(expr, scope)?)),
            Argument::Hole => values.push(Value::Undefined),
        }
    }
    Ok(values)
}

fn spread(value: &Value) -> Vec<Value> {
    match value {
        Value::Object(obj) if obj.is_array() => obj.iter_values(),
        Value::String(s) => s.chars().map(|c| Value::from(c.to_string())).collect(),
        _ => Vec::new(),
    }
}

/// Write `value` to an identifier or member target
fn assign(target: &Expr, value: Value, scope: &Scope) -> Result<()> {
    match target {
        Expr::Identifier(name) => {
            if scope.assign(name, value) {
                Ok(())
            } else {
                Err(EvalError::NotDefined(name.clone()))
            }
        }
        Expr::Member { object, property, .. } => {
            let object = eval(object, scope)?;
            let key = eval_key(property, scope)?;
            match object {
                Value::Object(obj) => {
                    obj.set(&key, value)?;
                    Ok(())
                }
                other => Err(EvalError::NotAssignable {
                    property: key,
                    target: other.type_of(),
                }),
            }
        }
        _ => Err(EvalError::InvalidTarget),
    }
}

/// Read `key` of `target`, failing on `null`/`undefined`
pub fn get_property(target: &Value, key: &str) -> Result<Value> {
    match target {
        Value::Undefined | Value::Null => Err(EvalError::PropertyOfNullish {
            property: key.to_string(),
            target: if matches!(target, Value::Null) { "null" } else { "undefined" },
        }),
        Value::Object(obj) => Ok(obj.get(key)),
        Value::String(s) => Ok(match key {
            "length" => Value::Number(s.chars().count() as f64),
            _ => key
                .parse::<usize>()
                .ok()
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::from(c.to_string()))
                .unwrap_or_default(),
        }),
        Value::Function(f) if key == "name" => Ok(Value::str(f.name())),
        Value::Host(host) => Ok(host
            .as_any()
            .downcast_ref::<DomNodeRef>()
            .map(|node| node.property(key))
            .unwrap_or_default()),
        _ => Ok(Value::Undefined),
    }
}

/// Call `key` on `target`: an own function property first, then a built-in
fn call_method(target: &Value, key: &str, method: Value, args: &[Value]) -> Result<Value> {
    if let Value::Function(_) = method {
        return call_function(&method, target, args, key);
    }
    if let Some(result) = builtins::call_method(target, key, args) {
        return result;
    }
    if target.is_nullish() {
        return Err(EvalError::PropertyOfNullish {
            property: key.to_string(),
            target: if matches!(target, Value::Null) { "null" } else { "undefined" },
        });
    }
    Err(EvalError::NotCallable(key.to_string()))
}

/// Invoke a function value
pub fn call_function(function: &Value, this: &Value, args: &[Value], name: &str) -> Result<Value> {
    match function {
        Value::Function(f) => f.call(this, args).map_err(EvalError::from_host),
        _ => Err(EvalError::NotCallable(name.to_string())),
    }
}

pub(crate) fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    n.trunc().rem_euclid(4_294_967_296.0) as u32 as i32
}

pub(crate) fn binary(operator: BinaryOp, left: &Value, right: &Value) -> Value {
    use BinaryOp::*;
    match operator {
        Add => {
            let stringy = |v: &Value| !matches!(v, Value::Undefined | Value::Null | Value::Bool(_) | Value::Number(_));
            if stringy(left) || stringy(right) {
                let mut s = left.to_display_string();
                s.push_str(&right.to_display_string());
                Value::from(s)
            } else {
                Value::Number(left.to_number() + right.to_number())
            }
        }
        Sub => Value::Number(left.to_number() - right.to_number()),
        Mul => Value::Number(left.to_number() * right.to_number()),
        Div => Value::Number(left.to_number() / right.to_number()),
        Mod => Value::Number(left.to_number() % right.to_number()),
        Pow => Value::Number(left.to_number().powf(right.to_number())),
        LessThan | LessThanEq | GreaterThan | GreaterThanEq => {
            let ordering = match (left, right) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => left.to_number().partial_cmp(&right.to_number()),
            };
            let Some(ordering) = ordering else {
                return Value::Bool(false);
            };
            Value::Bool(match operator {
                LessThan => ordering.is_lt(),
                LessThanEq => ordering.is_le(),
                GreaterThan => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
        Equal => Value::Bool(left.loose_equals(right)),
        NotEqual => Value::Bool(!left.loose_equals(right)),
        StrictEqual => Value::Bool(left.strict_equals(right)),
        StrictNotEqual => Value::Bool(!left.strict_equals(right)),
        LeftShift => Value::Number(f64::from(to_int32(left.to_number()).wrapping_shl(shift_count(right)))),
        RightShift => Value::Number(f64::from(to_int32(left.to_number()).wrapping_shr(shift_count(right)))),
        UnsignedRightShift => {
            Value::Number(f64::from((to_int32(left.to_number()) as u32).wrapping_shr(shift_count(right))))
        }
        BitwiseAnd => Value::Number(f64::from(to_int32(left.to_number()) & to_int32(right.to_number()))),
        BitwiseOr => Value::Number(f64::from(to_int32(left.to_number()) | to_int32(right.to_number()))),
        BitwiseXor => Value::Number(f64::from(to_int32(left.to_number()) ^ to_int32(right.to_number()))),
        In => Value::Bool(match right {
            Value::Object(obj) => obj.has(&left.to_display_string()),
            _ => false,
        }),
    }
}

fn shift_count(value: &Value) -> u32 {
    (to_int32(value.to_number()) as u32) & 31
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse_expression;
    use lumen_reactive::watch;
    use lumen_syntax::{lex_js, LexOptions};
    use serde_json::json;
    use std::cell::RefCell;

    fn run(src: &str, data: &ObjRef) -> Result<Value> {
        let expr = parse_expression(&lex_js(src, &LexOptions::default()).unwrap()).unwrap();
        eval(&expr, &Scope::root(data))
    }

    fn data(v: serde_json::Value) -> ObjRef {
        Value::from_json(&v).as_object().unwrap().clone()
    }

    #[test]
    fn test_arithmetic_and_strings() {
        let d = data(json!({"a": 2, "name": "Ada"}));
        assert_eq!(run("this.a * 3 + 1", &d).unwrap(), Value::Number(7.0));
        assert_eq!(run("'Hi ' + this.name + '!'", &d).unwrap(), Value::str("Hi Ada!"));
        assert_eq!(run("`${this.name}:${this.a ** 2}`", &d).unwrap(), Value::str("Ada:4"));
        assert_eq!(run("this.a > 1 ? 'big' : 'small'", &d).unwrap(), Value::str("big"));
        assert_eq!(run("this.missing ?? 'none'", &d).unwrap(), Value::str("none"));
        assert_eq!(run("7 % 4 | 8", &d).unwrap(), Value::Number(11.0));
    }

    #[test]
    fn test_optional_chain_and_errors() {
        let d = data(json!({"user": null}));
        assert_eq!(run("this.user?.name.first", &d).unwrap(), Value::Undefined);
        let err = run("this.user.name", &d).unwrap_err();
        assert!(matches!(err, EvalError::PropertyOfNullish { target: "null", .. }));
        assert!(matches!(run("nope + 1", &d).unwrap_err(), EvalError::NotDefined(_)));
        assert_eq!(run("typeof nope", &d).unwrap(), Value::str("undefined"));
        assert!(matches!(run("this.user()", &d).unwrap_err(), EvalError::NotCallable(_)));
    }

    #[test]
    fn test_closures_and_array_methods() {
        let d = data(json!({"items": [{"n": 1, "done": true}, {"n": 2, "done": false}, {"n": 3, "done": true}]}));
        assert_eq!(
            run("this.items.filter(i => i.done).map(({n}) => n * 10).join('-')", &d).unwrap(),
            Value::str("10-30")
        );
        assert_eq!(run("this.items.reduce((sum, i) => sum + i.n, 0)", &d).unwrap(), Value::Number(6.0));
        let src = "(x => { const y = x + 1; if (y > 2) { return 'big' } else return 'small' })(2)";
        assert_eq!(run(src, &d).unwrap(), Value::str("big"));
    }

    #[test]
    fn test_assignment_notifies() {
        let d = data(json!({"count": 1, "list": []}));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        let id = watch(&d, &["count"], move |c| {
            log.borrow_mut().push(c.new_value.to_display_string());
            Ok(())
        });
        run("this.count++", &d).unwrap();
        run("this.count += 5", &d).unwrap();
        assert_eq!(*seen.borrow(), ["2", "7"]);
        lumen_reactive::unwatch(id);

        run("this.list.push(1, 2)", &d).unwrap();
        assert_eq!(d.get("list").as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_object_literal_and_spread() {
        let d = data(json!({"base": {"a": 1, "b": 2}}));
        let v = run("({...this.base, b: 3, ['c' + 1]: [...[1, 2], 3].length})", &d).unwrap();
        assert_eq!(v.to_json(), json!({"a": 1, "b": 3, "c1": 3}));
    }
}
