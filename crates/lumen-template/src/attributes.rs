//! Attribute bindings
//!
//! Static attributes are written once. Every attribute with an embedded
//! expression, and every whole-attribute `<div ${expr}>` expression, gets
//! an [`AttrBinding`] that re-renders it when a watched path changes.
//! Bindings also carry the two extras attributes can have: `on*` event
//! handlers and two-way `value` binding.

use crate::compile::{AttrPart, AttrSpec, ElementSpec, ExprKind, ExprSpec, NodeSpec};
use crate::context::RenderContext;
use crate::error::Result;
use crate::host::{DomNodeRef, Fragment};
use crate::interp::{bind_pattern, call_function, eval};
use crate::scope::{ItemPath, Scope};
use crate::vtree::{ListenerGuard, Watches};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use lumen_dom::{Event, Listener, NodeId};
use lumen_reactive::{watch, watch_path, Change, ObjRef, Value};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Which part of the element a binding renders
#[derive(Debug, Clone, Copy)]
enum Slot {
    /// `name="...${}..."`, index into the element's attributes
    Attribute(usize),
    /// `${expr}` in attribute position, index into attribute expressions
    Spread(usize),
}

pub(crate) struct AttrBinding {
    element: Rc<ElementSpec>,
    slot: Slot,
    scope: Scope,
    ctx: Rc<RenderContext>,
    node: NodeId,
    watches: Watches,
    /// Current handler of an `on*` attribute
    handler: RefCell<Value>,
    listeners: RefCell<Vec<ListenerGuard>>,
    /// Names written by the last evaluation of a spread expression
    spread_names: RefCell<Vec<String>>,
    weak_self: Weak<AttrBinding>,
}

/// Write static attributes and create bindings for the dynamic ones
pub(crate) fn bind(
    element: &Rc<ElementSpec>,
    scope: &Scope,
    ctx: &Rc<RenderContext>,
    node: NodeId,
) -> Result<Vec<Rc<AttrBinding>>> {
    // static attributes first, so a bound `value` sees the input's `type`
    for attr in element.attributes.iter().filter(|attr| attr.is_static()) {
        ctx.dom.set_attribute(node, &attr.name, &static_value(attr))?;
    }
    let mut bindings = Vec::new();
    for (i, attr) in element.attributes.iter().enumerate() {
        if !attr.is_static() {
            bindings.push(AttrBinding::start(element, Slot::Attribute(i), scope, ctx, node)?);
        }
    }
    for i in 0..element.attribute_expressions.len() {
        bindings.push(AttrBinding::start(element, Slot::Spread(i), scope, ctx, node)?);
    }
    Ok(bindings)
}

fn static_value(attr: &AttrSpec) -> String {
    attr.parts
        .iter()
        .map(|part| match part {
            AttrPart::Text(text) => text.as_str(),
            AttrPart::Expr(_) => "",
        })
        .collect()
}

impl AttrBinding {
    fn start(
        element: &Rc<ElementSpec>,
        slot: Slot,
        scope: &Scope,
        ctx: &Rc<RenderContext>,
        node: NodeId,
    ) -> Result<Rc<Self>> {
        let binding = Rc::new_cyclic(|weak_self| Self {
            element: element.clone(),
            slot,
            scope: scope.clone(),
            ctx: ctx.clone(),
            node,
            watches: Watches::default(),
            handler: RefCell::new(Value::Undefined),
            listeners: RefCell::new(Vec::new()),
            spread_names: RefCell::new(Vec::new()),
            weak_self: weak_self.clone(),
        });
        binding.watch();
        binding.render()?;
        if binding.is_two_way() {
            binding.listen_for_input();
        }
        Ok(binding)
    }

    fn attribute(&self) -> Option<&AttrSpec> {
        match self.slot {
            Slot::Attribute(i) => self.element.attributes.get(i),
            Slot::Spread(_) => None,
        }
    }

    /// Expressions this binding evaluates
    fn expressions(&self) -> Vec<&Rc<ExprSpec>> {
        match self.slot {
            Slot::Attribute(i) => self.element.attributes[i]
                .parts
                .iter()
                .filter_map(|part| match part {
                    AttrPart::Expr(spec) => Some(spec),
                    AttrPart::Text(_) => None,
                })
                .collect(),
            Slot::Spread(i) => self.element.attribute_expressions.get(i).into_iter().collect(),
        }
    }

    /// `on<event>` name, when this attribute is an event handler
    fn event_name(&self) -> Option<&str> {
        let attr = self.attribute()?;
        if !self.ctx.options.event_attributes || attr.whole_expression().is_none() {
            return None;
        }
        attr.name.strip_prefix("on").filter(|event| !event.is_empty())
    }

    fn is_two_way(&self) -> bool {
        let Some(attr) = self.attribute() else {
            return false;
        };
        self.ctx.options.two_way_binding
            && attr.name == "value"
            && attr
                .whole_expression()
                .is_some_and(|spec| matches!(spec.kind, ExprKind::Simple(_)) && !spec.once)
    }

    fn watch(&self) {
        let Some(root) = self.scope.this().as_object().cloned() else {
            return;
        };
        for spec in self.expressions() {
            // a literal handler never changes
            if spec.once || matches!(&spec.kind, ExprKind::Complex(crate::expr::Expr::Arrow(_))) {
                continue;
            }
            for chain in &spec.watch_chains {
                let Some(path) = self.scope.resolve(chain) else {
                    continue;
                };
                let weak = self.weak_self.clone();
                let id = watch(&root, &path, move |change: &Change| match weak.upgrade() {
                    Some(binding) => binding.on_change(change).map_err(anyhow::Error::from),
                    None => Ok(()),
                });
                self.watches.push(id);
            }
        }
    }

    fn on_change(&self, change: &Change) -> Result<()> {
        if self.ctx.is_in_flight(&change.path) {
            tracing::trace!(path = %change.path.join("."), "skip echo of two-way write");
            return Ok(());
        }
        self.render()
    }

    fn render(&self) -> Result<()> {
        match self.slot {
            Slot::Attribute(i) => {
                let attr = &self.element.attributes[i];
                if let Some(event) = self.event_name() {
                    let Some(spec) = attr.whole_expression() else {
                        return Ok(());
                    };
                    let handler = evaluate(spec, &self.scope)?;
                    self.set_handler(event, handler);
                    return Ok(());
                }
                match attr.whole_expression() {
                    Some(spec) => {
                        let mut value = evaluate(spec, &self.scope)?;
                        if self.is_two_way() {
                            value = control_text(&self.ctx, self.node, value);
                        }
                        self.write_whole(&attr.name, &value)
                    }
                    None => {
                        let mut text = String::new();
                        for part in &attr.parts {
                            match part {
                                AttrPart::Text(t) => text.push_str(t),
                                AttrPart::Expr(spec) => {
                                    let value = evaluate(spec, &self.scope)?;
                                    if !value.is_nullish() {
                                        text.push_str(&value.to_display_string());
                                    }
                                }
                            }
                        }
                        Ok(self.ctx.dom.set_attribute(self.node, &attr.name, &text)?)
                    }
                }
            }
            Slot::Spread(i) => {
                let value = evaluate(&self.element.attribute_expressions[i], &self.scope)?;
                self.write_spread(&value)
            }
        }
    }

    /// An attribute whose value is a single expression
    fn write_whole(&self, name: &str, value: &Value) -> Result<()> {
        let dom = &self.ctx.dom;
        match value {
            Value::Undefined | Value::Null | Value::Bool(false) => {
                dom.remove_attribute(self.node, name)?;
            }
            Value::Bool(true) => dom.set_attribute(self.node, name, "")?,
            other => dom.set_attribute(self.node, name, &attribute_text(other))?,
        }
        Ok(())
    }

    /// `<div ${expr}>`: a string of `name` / `name=value` items or an
    /// object of attributes
    fn write_spread(&self, value: &Value) -> Result<()> {
        let dom = &self.ctx.dom;
        let mut written = Vec::new();
        match value {
            Value::Object(obj) if !obj.is_array() => {
                for (name, v) in obj.entries() {
                    match v {
                        Value::Undefined | Value::Null | Value::Bool(false) => continue,
                        Value::Bool(true) => dom.set_attribute(self.node, &name, "")?,
                        other => dom.set_attribute(self.node, &name, &attribute_text(&other))?,
                    }
                    written.push(name);
                }
            }
            Value::Undefined | Value::Null | Value::Bool(false) => {}
            other => {
                for (name, v) in parse_attribute_list(&other.to_display_string()) {
                    dom.set_attribute(self.node, &name, &v)?;
                    written.push(name);
                }
            }
        }
        let stale: Vec<String> = self
            .spread_names
            .borrow()
            .iter()
            .filter(|name| !written.contains(name))
            .cloned()
            .collect();
        for name in stale {
            dom.remove_attribute(self.node, &name)?;
        }
        *self.spread_names.borrow_mut() = written;
        Ok(())
    }

    fn set_handler(&self, event: &str, handler: Value) {
        let installed = !self.listeners.borrow().is_empty();
        *self.handler.borrow_mut() = handler;
        if installed {
            return;
        }
        let weak = self.weak_self.clone();
        let listener: Listener = Rc::new(move |event: &Event| match weak.upgrade() {
            Some(binding) => binding.fire(event).map_err(anyhow::Error::from),
            None => Ok(()),
        });
        let id = self.ctx.dom.add_event_listener(self.node, event, listener);
        self.listeners.borrow_mut().push(ListenerGuard::new(&self.ctx.dom, id));
    }

    /// Call the current handler with `{type, target}` and `this` bound to
    /// the component data
    fn fire(&self, event: &Event) -> Result<()> {
        let handler = self.handler.borrow().clone();
        if !matches!(handler, Value::Function(_)) {
            return Ok(());
        }
        let event_object = ObjRef::object(vec![
            ("type", Value::str(&event.kind)),
            ("target", Value::Host(Rc::new(DomNodeRef::new(&self.ctx.dom, event.target)))),
        ]);
        let name = self.attribute().map_or("handler", |a| a.name.as_str());
        call_function(&handler, &self.scope.this(), &[Value::Object(event_object)], name)?;
        Ok(())
    }

    fn listen_for_input(&self) {
        for kind in ["input", "change"] {
            let weak = self.weak_self.clone();
            let listener: Listener = Rc::new(move |_: &Event| match weak.upgrade() {
                Some(binding) => binding.write_back().map_err(anyhow::Error::from),
                None => Ok(()),
            });
            let id = self.ctx.dom.add_event_listener(self.node, kind, listener);
            self.listeners.borrow_mut().push(ListenerGuard::new(&self.ctx.dom, id));
        }
    }

    /// Copy the input's current value into the data it is bound to
    fn write_back(&self) -> Result<()> {
        let Some(path) = self.watches.first().and_then(watch_path) else {
            return Ok(());
        };
        let Some(root) = self.scope.this().as_object().cloned() else {
            return Ok(());
        };
        let value = input_value(&self.ctx, self.node);
        tracing::trace!(path = %path.join("."), ?value, "two-way write");
        self.ctx.begin_write(path.clone());
        let result = root.set_path(&path, value);
        self.ctx.end_write();
        result?;
        Ok(())
    }
}

fn input_type(ctx: &RenderContext, node: NodeId) -> String {
    ctx.dom.get_attribute(node, "type").unwrap_or_default().to_ascii_lowercase()
}

/// Typed value of a form control
fn input_value(ctx: &RenderContext, node: NodeId) -> Value {
    let dom = &ctx.dom;
    let raw = dom.get_attribute(node, "value").unwrap_or_default();
    let raw = raw.trim();
    let kind = input_type(ctx, node);
    match kind.as_str() {
        "checkbox" | "radio" => Value::Bool(dom.get_attribute(node, "checked").is_some()),
        "number" | "range" | "date" | "month" | "datetime-local" | "time" if raw.is_empty() => Value::Null,
        "number" | "range" => Value::Number(raw.parse().unwrap_or(f64::NAN)),
        "date" | "month" | "datetime-local" | "time" => Value::Number(date_millis(&kind, raw).unwrap_or(f64::NAN)),
        _ => Value::from(raw.to_string()),
    }
}

/// A number bound to a date or time control, shown the way the control
/// expects its `value`
fn control_text(ctx: &RenderContext, node: NodeId, value: Value) -> Value {
    let Value::Number(millis) = value else {
        return value;
    };
    match date_text(&input_type(ctx, node), millis) {
        Some(text) => Value::from(text),
        None => value,
    }
}

/// Milliseconds for a date or time control, as `valueAsNumber` counts
/// them: dates, months and local date-times from the Unix epoch read as
/// UTC, times from midnight. A month counts from its first day.
fn date_millis(kind: &str, raw: &str) -> Option<f64> {
    let midnight = |date: NaiveDate| date.and_time(NaiveTime::MIN).and_utc().timestamp_millis();
    let millis = match kind {
        "date" => midnight(NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?),
        "month" => midnight(NaiveDate::parse_from_str(&format!("{raw}-01"), "%Y-%m-%d").ok()?),
        "datetime-local" => NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M"))
            .ok()?
            .and_utc()
            .timestamp_millis(),
        "time" => {
            let time = NaiveTime::parse_from_str(raw, "%H:%M:%S%.f")
                .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
                .ok()?;
            i64::from(time.num_seconds_from_midnight()) * 1000 + i64::from(time.nanosecond() / 1_000_000)
        }
        _ => return None,
    };
    Some(millis as f64)
}

fn date_text(kind: &str, millis: f64) -> Option<String> {
    if !millis.is_finite() {
        return None;
    }
    let millis = millis as i64;
    let at = DateTime::from_timestamp_millis(millis)?;
    let whole_minute = millis.rem_euclid(60_000) == 0;
    let format = match kind {
        "date" => "%Y-%m-%d",
        "month" => "%Y-%m",
        "datetime-local" if whole_minute => "%Y-%m-%dT%H:%M",
        "datetime-local" => "%Y-%m-%dT%H:%M:%S%.3f",
        "time" if whole_minute => "%H:%M",
        "time" => "%H:%M:%S%.3f",
        _ => return None,
    };
    Some(at.format(format).to_string())
}

/// Attribute text for a structured value: arrays are class lists, plain
/// objects are style declarations
fn attribute_text(value: &Value) -> String {
    match value {
        Value::Object(obj) if obj.is_array() => obj
            .iter_values()
            .iter()
            .filter(|v| v.truthy())
            .map(Value::to_display_string)
            .collect::<Vec<_>>()
            .join(" "),
        Value::Object(obj) => obj
            .entries()
            .into_iter()
            .filter(|(_, v)| !v.is_nullish())
            .map(|(k, v)| format!("{k}: {};", v.to_display_string()))
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_display_string(),
    }
}

/// Split `a b=1 c="x y"` into attribute pairs
fn parse_attribute_list(text: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut rest = text.trim_start();
    while !rest.is_empty() {
        let name_end = rest.find(|c: char| c.is_whitespace() || c == '=').unwrap_or(rest.len());
        let name = rest[..name_end].to_string();
        rest = &rest[name_end..];
        let mut value = String::new();
        if let Some(after) = rest.strip_prefix('=') {
            match after.chars().next() {
                Some(q @ ('"' | '\'')) => {
                    let body = &after[1..];
                    let end = body.find(q).unwrap_or(body.len());
                    value = body[..end].to_string();
                    rest = body.get(end + 1..).unwrap_or("");
                }
                _ => {
                    let end = after.find(char::is_whitespace).unwrap_or(after.len());
                    value = after[..end].to_string();
                    rest = &after[end..];
                }
            }
        }
        if !name.is_empty() {
            out.push((name, value));
        }
        rest = rest.trim_start();
    }
    out
}

/// Value of a compiled expression outside of child position. A loop yields
/// an array with one entry per element.
pub(crate) fn evaluate(spec: &ExprSpec, scope: &Scope) -> Result<Value> {
    match &spec.kind {
        ExprKind::Simple(expr) | ExprKind::Complex(expr) => eval(expr, scope),
        ExprKind::Loop(lp) => {
            let array = match eval(&lp.array, scope)? {
                Value::Object(obj) if obj.is_array() => obj,
                _ => {
                    return Err(crate::error::EvalError::NotIterable {
                        path: lp.array_chain.as_ref().map(|c| c.join(".")).unwrap_or_default(),
                        snippet: spec.source.clone(),
                    });
                }
            };
            let mut out = Vec::with_capacity(array.len());
            for (i, item) in array.iter_values().into_iter().enumerate() {
                let inner = scope.child();
                let params = [item, Value::Number(i as f64), Value::Object(array.clone())];
                for (param, value) in lp.params.iter().zip(params) {
                    bind_pattern(&inner, param, value, ItemPath::Unbound);
                }
                out.push(match lp.item.as_slice() {
                    [NodeSpec::Expression(item)] => evaluate(item, &inner)?,
                    nodes => Value::Host(Rc::new(Fragment::new(Rc::new(nodes.to_vec()), inner))),
                });
            }
            Ok(Value::Object(ObjRef::array(out)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_list() {
        assert_eq!(
            parse_attribute_list(" disabled data-x=1  title=\"a b\" "),
            vec![
                ("disabled".to_string(), String::new()),
                ("data-x".to_string(), "1".to_string()),
                ("title".to_string(), "a b".to_string()),
            ]
        );
        assert!(parse_attribute_list("   ").is_empty());
    }

    #[test]
    fn test_structured_attribute_text() {
        let classes = Value::from_json(&serde_json::json!(["a", "", null, "b"]));
        assert_eq!(attribute_text(&classes), "a b");
        let style = Value::from_json(&serde_json::json!({"color": "red", "width": 10}));
        assert_eq!(attribute_text(&style), "color: red; width: 10;");
        assert_eq!(attribute_text(&Value::Number(1.5)), "1.5");
    }

    #[test]
    fn test_date_controls() {
        assert_eq!(date_millis("date", "2024-03-05"), Some(1_709_596_800_000.0));
        assert_eq!(date_millis("month", "2024-03"), Some(1_709_251_200_000.0));
        assert_eq!(date_millis("datetime-local", "2024-03-05T10:30"), Some(1_709_634_600_000.0));
        assert_eq!(date_millis("time", "10:30"), Some(37_800_000.0));
        assert_eq!(date_millis("time", "10:30:15.5"), Some(37_815_500.0));
        assert_eq!(date_millis("date", "5 March"), None);

        assert_eq!(date_text("date", 1_709_596_800_000.0).as_deref(), Some("2024-03-05"));
        assert_eq!(date_text("datetime-local", 1_709_634_600_000.0).as_deref(), Some("2024-03-05T10:30"));
        assert_eq!(date_text("time", 37_815_500.0).as_deref(), Some("10:30:15.500"));
        assert_eq!(date_text("date", f64::NAN), None);
        assert_eq!(date_text("text", 0.0), None);
    }
}
