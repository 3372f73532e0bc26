//! Built-in methods and globals available to template expressions

use crate::error::{EvalError, Result};
use crate::interp::call_function;
use lumen_reactive::{number_to_string, NativeFunction, ObjRef, Value};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;

const ARRAY_METHODS: &[&str] = &[
    "map", "filter", "find", "findIndex", "some", "every", "forEach", "reduce", "join", "includes", "indexOf", "slice",
    "concat", "push", "pop", "shift", "unshift", "splice", "reverse", "sort", "toString",
];

const STRING_METHODS: &[&str] = &[
    "toUpperCase", "toLowerCase", "trim", "trimStart", "trimEnd", "includes", "startsWith", "endsWith", "slice",
    "split", "replace", "replaceAll", "indexOf", "charAt", "padStart", "padEnd", "repeat", "toString",
];

/// Whether `key` names a built-in method of `target`
pub fn has_method(target: &Value, key: &str) -> bool {
    match target {
        Value::Object(obj) if obj.is_array() => ARRAY_METHODS.contains(&key),
        Value::String(_) => STRING_METHODS.contains(&key),
        Value::Number(_) => matches!(key, "toFixed" | "toString"),
        Value::Undefined | Value::Null => false,
        _ => key == "toString",
    }
}

/// Run a built-in method. `None` when `target` has no such method.
pub fn call_method(target: &Value, key: &str, args: &[Value]) -> Option<Result<Value>> {
    if !has_method(target, key) {
        return None;
    }
    Some(match target {
        Value::Object(obj) if obj.is_array() => array_method(obj, key, args),
        Value::String(s) => Ok(string_method(s, key, args)),
        Value::Number(n) => Ok(number_method(*n, key, args)),
        other => Ok(Value::from(other.to_display_string())),
    })
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or_default()
}

/// Resolve a possibly negative index argument against `len`
fn relative_index(value: Option<&Value>, len: usize, default: usize) -> usize {
    let Some(value) = value.filter(|v| !matches!(v, Value::Undefined)) else {
        return default;
    };
    let n = value.to_number();
    if n.is_nan() {
        return 0;
    }
    let n = n.trunc();
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        (n as usize).min(len)
    }
}

fn array_method(array: &ObjRef, key: &str, args: &[Value]) -> Result<Value> {
    let callback = arg(args, 0);
    let this = Value::Undefined;
    let each = |f: &mut dyn FnMut(usize, Value, Value) -> Result<bool>| -> Result<()> {
        let array_value = Value::Object(array.clone());
        for (i, item) in array.iter_values().into_iter().enumerate() {
            let result = call_function(&callback, &this, &[item.clone(), Value::Number(i as f64), array_value.clone()], key)?;
            if !f(i, item, result)? {
                break;
            }
        }
        Ok(())
    };
    match key {
        "map" => {
            let mut out = Vec::with_capacity(array.len());
            each(&mut |_, _, result| {
                out.push(result);
                Ok(true)
            })?;
            Ok(Value::Object(ObjRef::array(out)))
        }
        "filter" => {
            let mut out = Vec::new();
            each(&mut |_, item, result| {
                if result.truthy() {
                    out.push(item);
                }
                Ok(true)
            })?;
            Ok(Value::Object(ObjRef::array(out)))
        }
        "find" | "findIndex" => {
            let mut found = None;
            each(&mut |i, item, result| {
                if result.truthy() {
                    found = Some((i, item));
                }
                Ok(found.is_none())
            })?;
            Ok(match (key, found) {
                ("find", Some((_, item))) => item,
                ("find", None) => Value::Undefined,
                (_, Some((i, _))) => Value::Number(i as f64),
                (_, None) => Value::Number(-1.0),
            })
        }
        "some" | "every" => {
            let want = key == "some";
            let mut answer = !want;
            each(&mut |_, _, result| {
                if result.truthy() == want {
                    answer = want;
                    return Ok(false);
                }
                Ok(true)
            })?;
            Ok(Value::Bool(answer))
        }
        "forEach" => {
            each(&mut |_, _, _| Ok(true))?;
            Ok(Value::Undefined)
        }
        "reduce" => {
            let items = array.iter_values();
            let mut iter = items.into_iter().enumerate();
            let mut acc = match args.get(1) {
                Some(init) => init.clone(),
                None => match iter.next() {
                    Some((_, first)) => first,
                    None => {
                        return Err(EvalError::Thrown(anyhow::anyhow!("reduce of empty array with no initial value")));
                    }
                },
            };
            let array_value = Value::Object(array.clone());
            for (i, item) in iter {
                acc = call_function(&callback, &this, &[acc, item, Value::Number(i as f64), array_value.clone()], key)?;
            }
            Ok(acc)
        }
        "join" | "toString" => {
            let sep = match args.first() {
                Some(Value::Undefined) | None => ",".to_string(),
                Some(sep) if key == "join" => sep.to_display_string(),
                Some(_) => ",".to_string(),
            };
            let parts: Vec<String> = array
                .iter_values()
                .iter()
                .map(|v| if v.is_nullish() { String::new() } else { v.to_display_string() })
                .collect();
            Ok(Value::from(parts.join(&sep)))
        }
        "includes" => {
            let needle = arg(args, 0);
            Ok(Value::Bool(array.iter_values().iter().any(|v| v.same_value(&needle))))
        }
        "indexOf" => {
            let needle = arg(args, 0);
            let index = array.iter_values().iter().position(|v| v.strict_equals(&needle));
            Ok(Value::Number(index.map_or(-1.0, |i| i as f64)))
        }
        "slice" => {
            let items = array.iter_values();
            let start = relative_index(args.first(), items.len(), 0);
            let end = relative_index(args.get(1), items.len(), items.len()).max(start);
            Ok(Value::Object(ObjRef::array(items[start..end].to_vec())))
        }
        "concat" => {
            let mut items = array.iter_values();
            for value in args {
                match value {
                    Value::Object(other) if other.is_array() => items.extend(other.iter_values()),
                    other => items.push(other.clone()),
                }
            }
            Ok(Value::Object(ObjRef::array(items)))
        }
        "push" => Ok(Value::Number(array.push(args.to_vec())? as f64)),
        "pop" => Ok(array.pop()?),
        "shift" => Ok(array.shift()?),
        "unshift" => Ok(Value::Number(array.unshift(args.to_vec())? as f64)),
        "splice" => {
            let len = array.len();
            let start = relative_index(args.first(), len, 0);
            let delete = match args.get(1) {
                None => len - start,
                Some(count) => (count.to_number().max(0.0) as usize).min(len - start),
            };
            let inserted = args.iter().skip(2).cloned().collect();
            Ok(Value::Object(ObjRef::array(array.splice(start, delete, inserted)?)))
        }
        "reverse" => {
            array.reverse()?;
            Ok(Value::Object(array.clone()))
        }
        "sort" => {
            let failure: RefCell<Option<EvalError>> = RefCell::new(None);
            array.sort_by(|a, b| {
                if failure.borrow().is_some() {
                    return Ordering::Equal;
                }
                compare(&callback, a, b).unwrap_or_else(|err| {
                    *failure.borrow_mut() = Some(err);
                    Ordering::Equal
                })
            })?;
            match failure.into_inner() {
                Some(err) => Err(err),
                None => Ok(Value::Object(array.clone())),
            }
        }
        _ => Ok(Value::Undefined),
    }
}

/// Sort order: a comparator's sign, or string order with `undefined` last
fn compare(comparator: &Value, a: &Value, b: &Value) -> Result<Ordering> {
    match (a, b) {
        (Value::Undefined, Value::Undefined) => return Ok(Ordering::Equal),
        (Value::Undefined, _) => return Ok(Ordering::Greater),
        (_, Value::Undefined) => return Ok(Ordering::Less),
        _ => {}
    }
    if let Value::Function(_) = comparator {
        let n = call_function(comparator, &Value::Undefined, &[a.clone(), b.clone()], "sort")?.to_number();
        return Ok(n.partial_cmp(&0.0).unwrap_or(Ordering::Equal));
    }
    Ok(a.to_display_string().cmp(&b.to_display_string()))
}

fn string_method(s: &str, key: &str, args: &[Value]) -> Value {
    let text = |i: usize| args.get(i).map(Value::to_display_string).unwrap_or_default();
    match key {
        "toUpperCase" => Value::from(s.to_uppercase()),
        "toLowerCase" => Value::from(s.to_lowercase()),
        "trim" => Value::str(s.trim()),
        "trimStart" => Value::str(s.trim_start()),
        "trimEnd" => Value::str(s.trim_end()),
        "includes" => Value::Bool(s.contains(&text(0))),
        "startsWith" => Value::Bool(s.starts_with(&text(0))),
        "endsWith" => Value::Bool(s.ends_with(&text(0))),
        "indexOf" => Value::Number(match s.find(&text(0)) {
            Some(byte) => s[..byte].chars().count() as f64,
            None => -1.0,
        }),
        "charAt" => {
            let i = args.first().map_or(0.0, Value::to_number) as usize;
            Value::from(s.chars().nth(i).map(String::from).unwrap_or_default())
        }
        "slice" => {
            let chars: Vec<char> = s.chars().collect();
            let start = relative_index(args.first(), chars.len(), 0);
            let end = relative_index(args.get(1), chars.len(), chars.len()).max(start);
            Value::from(chars[start..end].iter().collect::<String>())
        }
        "split" => {
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::Undefined) => vec![Value::str(s)],
                Some(sep) => {
                    let sep = sep.to_display_string();
                    if sep.is_empty() {
                        s.chars().map(|c| Value::from(c.to_string())).collect()
                    } else {
                        s.split(sep.as_str()).map(Value::str).collect()
                    }
                }
            };
            Value::Object(ObjRef::array(parts))
        }
        "replace" => Value::from(s.replacen(&text(0), &text(1), 1)),
        "replaceAll" => Value::from(s.replace(&text(0), &text(1))),
        "padStart" | "padEnd" => {
            let width = args.first().map_or(0.0, Value::to_number).max(0.0) as usize;
            let fill = match args.get(1) {
                Some(v) if !matches!(v, Value::Undefined) => v.to_display_string(),
                _ => " ".to_string(),
            };
            let len = s.chars().count();
            if width <= len || fill.is_empty() {
                return Value::str(s);
            }
            let pad: String = fill.chars().cycle().take(width - len).collect();
            Value::from(if key == "padStart" { format!("{pad}{s}") } else { format!("{s}{pad}") })
        }
        "repeat" => Value::from(s.repeat(args.first().map_or(0.0, Value::to_number).max(0.0) as usize)),
        _ => Value::str(s),
    }
}

fn number_method(n: f64, key: &str, args: &[Value]) -> Value {
    match key {
        "toFixed" => {
            let digits = args.first().map_or(0.0, Value::to_number).clamp(0.0, 100.0) as usize;
            Value::from(format!("{n:.digits$}"))
        }
        _ => Value::from(number_to_string(n)),
    }
}

thread_local! {
    static GLOBALS: HashMap<&'static str, Value> = build_globals();
}

/// A global binding such as `Math` or `String`
pub fn global(name: &str) -> Option<Value> {
    GLOBALS.with(|g| g.get(name).cloned())
}

fn number_args(args: &[Value]) -> impl Iterator<Item = f64> + '_ {
    args.iter().map(Value::to_number)
}

fn build_globals() -> HashMap<&'static str, Value> {
    let mut globals = HashMap::new();
    globals.insert("NaN", Value::Number(f64::NAN));
    globals.insert("Infinity", Value::Number(f64::INFINITY));
    globals.insert(
        "String",
        NativeFunction::value("String", |_, args| Ok(Value::from(arg(args, 0).to_display_string()))),
    );
    globals.insert(
        "Number",
        NativeFunction::value("Number", |_, args| {
            Ok(Value::Number(args.first().map_or(0.0, Value::to_number)))
        }),
    );
    globals.insert("Boolean", NativeFunction::value("Boolean", |_, args| Ok(Value::Bool(arg(args, 0).truthy()))));
    globals.insert(
        "parseInt",
        NativeFunction::value("parseInt", |_, args| {
            let text = arg(args, 0).to_display_string();
            let radix = match args.get(1) {
                Some(r) if !matches!(r, Value::Undefined) => r.to_number() as u32,
                _ => 10,
            };
            Ok(Value::Number(parse_int(text.trim(), radix)))
        }),
    );
    globals.insert(
        "parseFloat",
        NativeFunction::value("parseFloat", |_, args| {
            Ok(Value::Number(parse_float(arg(args, 0).to_display_string().trim())))
        }),
    );
    globals.insert(
        "isNaN",
        NativeFunction::value("isNaN", |_, args| Ok(Value::Bool(arg(args, 0).to_number().is_nan()))),
    );

    let math = ObjRef::object(vec![
        ("PI", Value::Number(std::f64::consts::PI)),
        (
            "min",
            NativeFunction::value("min", |_, args| Ok(Value::Number(number_args(args).fold(f64::INFINITY, f64::min)))),
        ),
        (
            "max",
            NativeFunction::value("max", |_, args| {
                Ok(Value::Number(number_args(args).fold(f64::NEG_INFINITY, f64::max)))
            }),
        ),
        (
            "round",
            NativeFunction::value("round", |_, args| Ok(Value::Number((arg(args, 0).to_number() + 0.5).floor()))),
        ),
        ("floor", NativeFunction::value("floor", |_, args| Ok(Value::Number(arg(args, 0).to_number().floor())))),
        ("ceil", NativeFunction::value("ceil", |_, args| Ok(Value::Number(arg(args, 0).to_number().ceil())))),
        ("abs", NativeFunction::value("abs", |_, args| Ok(Value::Number(arg(args, 0).to_number().abs())))),
        ("sqrt", NativeFunction::value("sqrt", |_, args| Ok(Value::Number(arg(args, 0).to_number().sqrt())))),
    ]);
    globals.insert("Math", Value::Object(math));

    let json = ObjRef::object(vec![
        (
            "stringify",
            NativeFunction::value("stringify", |_, args| {
                Ok(match arg(args, 0) {
                    Value::Undefined | Value::Function(_) => Value::Undefined,
                    value => Value::from(value.to_json().to_string()),
                })
            }),
        ),
        (
            "parse",
            NativeFunction::value("parse", |_, args| {
                let json: serde_json::Value = serde_json::from_str(&arg(args, 0).to_display_string())?;
                Ok(Value::from_json(&json))
            }),
        ),
    ]);
    globals.insert("JSON", Value::Object(json));

    let object = ObjRef::object(vec![
        (
            "keys",
            NativeFunction::value("keys", |_, args| {
                let keys = match arg(args, 0) {
                    Value::Object(obj) => obj.keys().into_iter().map(Value::from).collect(),
                    _ => Vec::new(),
                };
                Ok(Value::Object(ObjRef::array(keys)))
            }),
        ),
        (
            "values",
            NativeFunction::value("values", |_, args| {
                let values = match arg(args, 0) {
                    Value::Object(obj) => obj.iter_values(),
                    _ => Vec::new(),
                };
                Ok(Value::Object(ObjRef::array(values)))
            }),
        ),
        (
            "entries",
            NativeFunction::value("entries", |_, args| {
                let entries = match arg(args, 0) {
                    Value::Object(obj) => obj
                        .entries()
                        .into_iter()
                        .map(|(k, v)| Value::Object(ObjRef::array(vec![Value::from(k), v])))
                        .collect(),
                    _ => Vec::new(),
                };
                Ok(Value::Object(ObjRef::array(entries)))
            }),
        ),
    ]);
    globals.insert("Object", Value::Object(object));

    let array = ObjRef::object(vec![(
        "isArray",
        NativeFunction::value("isArray", |_, args| Ok(Value::Bool(arg(args, 0).as_array().is_some()))),
    )]);
    globals.insert("Array", Value::Object(array));

    let console = ObjRef::object(vec![
        (
            "log",
            NativeFunction::value("log", |_, args| {
                tracing::info!(target: "lumen::console", "{}", display_args(args));
                Ok(Value::Undefined)
            }),
        ),
        (
            "warn",
            NativeFunction::value("warn", |_, args| {
                tracing::warn!(target: "lumen::console", "{}", display_args(args));
                Ok(Value::Undefined)
            }),
        ),
    ]);
    globals.insert("console", Value::Object(console));
    globals
}

fn display_args(args: &[Value]) -> String {
    args.iter().map(Value::to_display_string).collect::<Vec<_>>().join(" ")
}

/// Leading integer of `text` in `radix`, like `parseInt`
fn parse_int(text: &str, radix: u32) -> f64 {
    let (sign, digits) = match text.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, text.strip_prefix('+').unwrap_or(text)),
    };
    let (radix, digits) = match (radix, digits.get(..2)) {
        (16 | 0, Some("0x" | "0X")) => (16, &digits[2..]),
        (0, _) => (10, digits),
        _ => (radix, digits),
    };
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let mut value: Option<f64> = None;
    for c in digits.chars() {
        let Some(d) = c.to_digit(radix) else { break };
        value = Some(value.unwrap_or(0.0) * f64::from(radix) + f64::from(d));
    }
    value.map_or(f64::NAN, |v| sign * v)
}

/// Longest numeric prefix of `text`, like `parseFloat`
fn parse_float(text: &str) -> f64 {
    if text.starts_with("Infinity") || text.starts_with("+Infinity") {
        return f64::INFINITY;
    }
    if text.starts_with("-Infinity") {
        return f64::NEG_INFINITY;
    }
    (1..=text.len())
        .rev()
        .filter(|&end| text.is_char_boundary(end))
        .find_map(|end| text[..end].parse::<f64>().ok().filter(|_| !text[..end].ends_with(['e', 'E'])))
        .unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array(values: &[f64]) -> ObjRef {
        ObjRef::array(values.iter().map(|n| Value::Number(*n)).collect())
    }

    #[test]
    fn test_slice_and_splice_indices() {
        let a = array(&[1.0, 2.0, 3.0, 4.0]);
        let sliced = array_method(&a, "slice", &[Value::Number(-2.0)]).unwrap();
        assert_eq!(sliced.to_json(), serde_json::json!([3.0, 4.0]));

        let removed = array_method(&a, "splice", &[Value::Number(1.0), Value::Number(2.0), Value::Number(9.0)]).unwrap();
        assert_eq!(removed.to_json(), serde_json::json!([2.0, 3.0]));
        assert_eq!(Value::Object(a).to_json(), serde_json::json!([1.0, 9.0, 4.0]));
    }

    #[test]
    fn test_default_sort_is_string_order() {
        let a = array(&[10.0, 9.0, 1.0]);
        array_method(&a, "sort", &[]).unwrap();
        assert_eq!(Value::Object(a).to_json(), serde_json::json!([1.0, 10.0, 9.0]));
    }

    #[test]
    fn test_string_methods() {
        assert_eq!(string_method("a,b", "split", &[Value::str(",")]).to_json(), serde_json::json!(["a", "b"]));
        assert_eq!(string_method("héllo", "slice", &[Value::Number(1.0), Value::Number(3.0)]), Value::str("él"));
        assert_eq!(string_method("7", "padStart", &[Value::Number(3.0), Value::str("0")]), Value::str("007"));
        assert_eq!(number_method(1.005, "toFixed", &[Value::Number(1.0)]), Value::str("1.0"));
    }

    #[test]
    fn test_parse_numbers() {
        assert_eq!(parse_int("42px", 10), 42.0);
        assert_eq!(parse_int("0x1F", 16), 31.0);
        assert!(parse_int("px", 10).is_nan());
        assert_eq!(parse_float("3.5em"), 3.5);
        assert_eq!(parse_float("1e3"), 1000.0);
    }

    #[test]
    fn test_globals() {
        let max = global("Math").unwrap().as_object().unwrap().get("max");
        let out = call_function(&max, &Value::Undefined, &[Value::Number(1.0), Value::Number(5.0)], "max").unwrap();
        assert_eq!(out, Value::Number(5.0));
        assert!(global("window").is_none());
    }
}
