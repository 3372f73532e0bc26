//! Values
//!
//! Dynamic values with script semantics: objects and arrays are shared by
//! reference, everything else is copied.

use crate::object::ObjRef;
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// Something that can be called from a template expression
pub trait Callable {
    fn call(&self, this: &Value, args: &[Value]) -> anyhow::Result<Value>;

    fn name(&self) -> &str {
        "anonymous"
    }
}

/// Opaque value owned by a higher layer (rendered fragments and the like)
pub trait HostValue: fmt::Debug {
    fn as_any(&self) -> &dyn Any;

    fn type_name(&self) -> &str;

    /// String coercion
    fn to_display(&self) -> String {
        format!("[object {}]", self.type_name())
    }
}

/// Rust closure exposed as a function value
pub struct NativeFunction {
    name: String,
    f: Box<dyn Fn(&Value, &[Value]) -> anyhow::Result<Value>>,
}

impl NativeFunction {
    pub fn new<F>(name: &str, f: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> anyhow::Result<Value> + 'static,
    {
        Self {
            name: name.to_string(),
            f: Box::new(f),
        }
    }

    /// Wrap straight into a [`Value::Function`]
    pub fn value<F>(name: &str, f: F) -> Value
    where
        F: Fn(&Value, &[Value]) -> anyhow::Result<Value> + 'static,
    {
        Value::Function(Rc::new(Self::new(name, f)))
    }
}

impl Callable for NativeFunction {
    fn call(&self, this: &Value, args: &[Value]) -> anyhow::Result<Value> {
        (self.f)(this, args)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Object(ObjRef),
    Function(Rc<dyn Callable>),
    Host(Rc<dyn HostValue>),
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::String(Rc::from(s))
    }

    #[inline]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn as_object(&self) -> Option<&ObjRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Array handle, if this is an array
    pub fn as_array(&self) -> Option<&ObjRef> {
        self.as_object().filter(|o| o.is_array())
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Object(_) | Value::Function(_) | Value::Host(_) => true,
        }
    }

    /// `typeof`
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null | Value::Object(_) | Value::Host(_) => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) => "function",
        }
    }

    /// Numeric coercion
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(s) => {
                let t = s.trim();
                if t.is_empty() {
                    0.0
                } else {
                    t.parse().unwrap_or(f64::NAN)
                }
            }
            Value::Object(o) if o.is_array() => match o.len() {
                0 => 0.0,
                1 => o.get("0").to_number(),
                _ => f64::NAN,
            },
            _ => f64::NAN,
        }
    }

    /// String coercion
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".into(),
            Value::Null => "null".into(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::String(s) => s.to_string(),
            Value::Object(o) if o.is_array() => o
                .iter_values()
                .iter()
                .map(|v| if v.is_nullish() { String::new() } else { v.to_display_string() })
                .collect::<Vec<_>>()
                .join(","),
            Value::Object(_) => "[object Object]".into(),
            Value::Function(f) => format!("function {}() {{ [native code] }}", f.name()),
            Value::Host(h) => h.to_display(),
        }
    }

    /// `===`
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Host(a), Value::Host(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// `==`
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Number(_), Value::String(_))
            | (Value::String(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => self.to_number() == other.to_number(),
            _ => self.strict_equals(other),
        }
    }

    /// Equality used to skip no-op writes: like `===` but `NaN` equals itself
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan() => true,
            _ => self.strict_equals(other),
        }
    }

    /// Deep copy of JSON data into shared objects
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::str(s),
            serde_json::Value::Array(items) => Value::Object(ObjRef::array(items.iter().map(Value::from_json).collect())),
            serde_json::Value::Object(map) => Value::Object(ObjRef::object(
                map.iter().map(|(k, v)| (k.as_str(), Value::from_json(v))).collect::<Vec<_>>(),
            )),
        }
    }

    /// JSON snapshot. Functions, host values and `undefined` become `null`;
    /// a cycle is cut with `null`.
    pub fn to_json(&self) -> serde_json::Value {
        let mut seen = Vec::new();
        self.to_json_inner(&mut seen)
    }

    fn to_json_inner(&self, seen: &mut Vec<ObjRef>) -> serde_json::Value {
        match self {
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.to_string()),
            Value::Object(o) => {
                if seen.iter().any(|s| s.ptr_eq(o)) {
                    return serde_json::Value::Null;
                }
                seen.push(o.clone());
                let json = if o.is_array() {
                    serde_json::Value::Array(o.iter_values().iter().map(|v| v.to_json_inner(seen)).collect())
                } else {
                    serde_json::Value::Object(
                        o.entries()
                            .into_iter()
                            .map(|(k, v)| (k, v.to_json_inner(seen)))
                            .collect(),
                    )
                };
                seen.pop();
                json
            }
            _ => serde_json::Value::Null,
        }
    }
}

/// Number to string the way script does it: integers print without a
/// fraction
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".into()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".into() } else { "-Infinity".into() }
    } else if n == n.trunc() && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => f.write_str(&number_to_string(*n)),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Object(o) => write!(f, "{o:?}"),
            Value::Function(func) => write!(f, "[Function {}]", func.name()),
            Value::Host(h) => write!(f, "{h:?}"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.strict_equals(other)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<ObjRef> for Value {
    fn from(o: ObjRef) -> Self {
        Value::Object(o)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_number_formatting() {
        assert_eq!(number_to_string(3.0), "3");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(1.5), "1.5");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_coercions() {
        assert_eq!(Value::str(" 42 ").to_number(), 42.0);
        assert!(Value::str("x").to_number().is_nan());
        assert!(!Value::str("").truthy());
        assert!(Value::Number(-1.0).truthy());
        assert_eq!(Value::from_json(&json!([1, null, "a"])).to_display_string(), "1,,a");
        assert_eq!(Value::from_json(&json!({"a": 1})).to_display_string(), "[object Object]");
    }

    #[test]
    fn test_equality() {
        assert!(Value::Number(1.0).loose_equals(&Value::str("1")));
        assert!(!Value::Number(1.0).strict_equals(&Value::str("1")));
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(!Value::Null.loose_equals(&Value::Number(0.0)));
        assert!(Value::Number(f64::NAN).same_value(&Value::Number(f64::NAN)));

        let o = Value::from_json(&json!({}));
        assert!(o.strict_equals(&o.clone()));
        assert!(!o.strict_equals(&Value::from_json(&json!({}))));
    }

    #[test]
    fn test_json_round_trip() {
        let data = json!({"name": "x", "tags": ["a", "b"], "n": 2.5, "ok": true, "none": null});
        assert_eq!(Value::from_json(&data).to_json(), data);
    }

    #[test]
    fn test_to_json_cuts_cycles() {
        let v = Value::from_json(&json!({"a": 1}));
        let o = v.as_object().unwrap();
        o.set("me", v.clone()).unwrap();
        assert_eq!(v.to_json(), json!({"a": 1, "me": null}));
    }

    #[test]
    fn test_native_function() {
        let f = NativeFunction::value("double", |_, args| Ok(Value::Number(args[0].to_number() * 2.0)));
        let Value::Function(f) = f else { panic!("not a function") };
        assert_eq!(f.name(), "double");
        assert_eq!(f.call(&Value::Undefined, &[Value::Number(4.0)]).unwrap(), Value::Number(8.0));
    }
}
