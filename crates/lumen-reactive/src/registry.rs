//! Watch Registry
//!
//! Subscriptions are `(root, path, callback)`. For every object on a watched
//! path the registry records each path by which each root reaches it (the
//! "reach" table), so a write to an object can be translated into the full
//! path of every subscriber that cares, whichever root it watched from.
//!
//! Everything below a watched value is tracked too, so a write deep inside
//! a watched array reaches the array's subscribers.
//!
//! Reach is derived from the subscriptions alone. A write that attaches or
//! detaches an object registers or drops just that subtree; writes of
//! primitives leave the table alone. Moving array elements rebuilds every
//! root that reaches the array. Dropping the last subscription of a root
//! therefore leaves nothing behind.

use crate::error::{NotifyError, Result};
use crate::object::{Object, ObjectId, ObjRef};
use crate::value::Value;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};

/// Called with every relevant change
pub type WatchCallback = Rc<dyn Fn(&Change) -> anyhow::Result<()>>;

/// Subscription handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(u64);

/// How a watched value changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Set,
    Insert,
    Remove,
    Delete,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Set => "set",
            Action::Insert => "insert",
            Action::Remove => "remove",
            Action::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change as seen by one subscriber
#[derive(Debug, Clone)]
pub struct Change {
    pub action: Action,
    /// Path of the changed property, from the subscriber's root
    pub path: Vec<String>,
    pub new_value: Value,
    pub old_value: Value,
    pub root: ObjRef,
}

/// A change to one property of one object
#[derive(Debug, Clone)]
pub(crate) struct Event {
    action: Action,
    key: String,
    new_value: Value,
    old_value: Value,
}

impl Event {
    pub(crate) fn new(action: Action, key: &str, new_value: Value, old_value: Value) -> Self {
        Self {
            action,
            key: key.to_string(),
            new_value,
            old_value,
        }
    }
}

struct Subscription {
    root: ObjRef,
    path: Vec<String>,
    callback: WatchCallback,
}

/// Paths by which each root reaches one object
struct Reach {
    object: Weak<RefCell<Object>>,
    paths: HashMap<ObjectId, Vec<Vec<String>>>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subs: HashMap<WatchId, Subscription>,
    by_root: HashMap<ObjectId, Vec<WatchId>>,
    reach: HashMap<ObjectId, Reach>,
}

/// Sizes of the registry tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryStats {
    pub subscriptions: usize,
    pub roots: usize,
    pub objects: usize,
    pub paths: usize,
}

impl RegistryStats {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

thread_local! {
    static REGISTRY: RefCell<Registry> = RefCell::new(Registry::default());
}

#[cfg(test)]
thread_local! {
    static REGISTERED: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}

/// Subscribe to `path` under `root`.
///
/// The callback hears about writes at the path, above it (a parent object
/// replaced) and below it (a descendant changed).
pub fn watch<S, F>(root: &ObjRef, path: &[S], callback: F) -> WatchId
where
    S: AsRef<str>,
    F: Fn(&Change) -> anyhow::Result<()> + 'static,
{
    let path: Vec<String> = path.iter().map(|s| s.as_ref().to_string()).collect();
    REGISTRY.with(|r| {
        let mut reg = r.borrow_mut();
        reg.next_id += 1;
        let id = WatchId(reg.next_id);
        walk(&mut reg.reach, root, &path);
        reg.by_root.entry(root.id()).or_default().push(id);
        tracing::trace!(?id, path = %path.join("."), "watch");
        reg.subs.insert(
            id,
            Subscription {
                root: root.clone(),
                path,
                callback: Rc::new(callback),
            },
        );
        id
    })
}

/// Drop a subscription. Sibling subscriptions on the same path are not
/// affected. Returns `false` if it was already gone.
pub fn unwatch(id: WatchId) -> bool {
    REGISTRY.with(|r| {
        let mut reg = r.borrow_mut();
        let Some(sub) = reg.subs.remove(&id) else {
            return false;
        };
        let root_id = sub.root.id();
        if let Some(ids) = reg.by_root.get_mut(&root_id) {
            ids.retain(|i| *i != id);
            if ids.is_empty() {
                reg.by_root.remove(&root_id);
            }
        }
        tracing::trace!(?id, path = %sub.path.join("."), "unwatch");
        reg.rebuild_root(root_id);
        true
    })
}

/// Current path of a subscription. Array index segments are rewritten when
/// elements move, so this can differ from the path passed to [`watch`].
pub fn watch_path(id: WatchId) -> Option<Vec<String>> {
    REGISTRY.with(|r| r.borrow().subs.get(&id).map(|s| s.path.clone()))
}

pub fn registry_stats() -> RegistryStats {
    REGISTRY.with(|r| {
        let reg = r.borrow();
        RegistryStats {
            subscriptions: reg.subs.len(),
            roots: reg.by_root.len(),
            objects: reg.reach.len(),
            paths: reg.reach.values().flat_map(|r| r.paths.values()).map(Vec::len).sum(),
        }
    })
}

impl Registry {
    fn rebuild_root(&mut self, root_id: ObjectId) {
        for reach in self.reach.values_mut() {
            reach.paths.remove(&root_id);
        }
        self.reach.retain(|_, r| !r.paths.is_empty() && r.object.strong_count() > 0);

        let Some(ids) = self.by_root.get(&root_id) else {
            return;
        };
        let walks: Vec<(ObjRef, Vec<String>)> = ids
            .iter()
            .filter_map(|id| self.subs.get(id))
            .map(|s| (s.root.clone(), s.path.clone()))
            .collect();
        for (root, path) in walks {
            walk(&mut self.reach, &root, &path);
        }
    }

    /// Calls to make for one event, parents before descendants
    fn calls(&self, obj: &ObjRef, event: &Event) -> Vec<(WatchId, WatchCallback, Change)> {
        let Some(reach) = self.reach.get(&obj.id()) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        let mut calls = Vec::new();
        for (root_id, paths) in &reach.paths {
            let Some(ids) = self.by_root.get(root_id) else {
                continue;
            };
            for path in paths {
                let mut full = path.clone();
                full.push(event.key.clone());
                for id in ids {
                    let Some(sub) = self.subs.get(id) else {
                        continue;
                    };
                    debug_assert_eq!(sub.root.id(), *root_id, "subscription filed under another root");
                    if seen.contains(id) || !(full.starts_with(&sub.path) || sub.path.starts_with(&full)) {
                        continue;
                    }
                    seen.insert(*id);
                    let change = Change {
                        action: event.action,
                        path: full.clone(),
                        new_value: event.new_value.clone(),
                        old_value: event.old_value.clone(),
                        root: sub.root.clone(),
                    };
                    calls.push((sub.path.len(), *id, sub.callback.clone(), change));
                }
            }
        }
        calls.sort_by_key(|(len, id, _, _)| (*len, *id));
        calls.into_iter().map(|(_, id, cb, change)| (id, cb, change)).collect()
    }
}

/// Register `root`, every object along `path` and everything below the
/// watched value as reachable from `root`
fn walk(reach: &mut HashMap<ObjectId, Reach>, root: &ObjRef, path: &[String]) {
    let root_id = root.id();
    register(reach, root, root_id, &[]);
    let mut current = root.clone();
    for (i, segment) in path.iter().enumerate() {
        match current.get(segment) {
            Value::Object(next) => {
                register(reach, &next, root_id, &path[..=i]);
                current = next;
            }
            Value::Undefined | Value::Null => return,
            other => {
                if i + 1 < path.len() && !other.as_str().is_some_and(|_| path[i + 1] == "length") {
                    tracing::warn!(path = %path.join("."), at = %segment, "watch path runs through a primitive");
                }
                return;
            }
        }
    }
    let mut visited = HashSet::new();
    let mut below = path.to_vec();
    walk_below(reach, &current, root_id, &mut below, &mut visited);
}

/// Descendants of a watched value, so deep writes reach its subscribers
fn walk_below(
    reach: &mut HashMap<ObjectId, Reach>,
    obj: &ObjRef,
    root_id: ObjectId,
    path: &mut Vec<String>,
    visited: &mut HashSet<ObjectId>,
) {
    if !visited.insert(obj.id()) {
        return;
    }
    for (key, value) in obj.entries() {
        if let Value::Object(child) = value {
            path.push(key);
            register(reach, &child, root_id, path);
            walk_below(reach, &child, root_id, path, visited);
            path.pop();
        }
    }
}

fn register(reach: &mut HashMap<ObjectId, Reach>, obj: &ObjRef, root_id: ObjectId, path: &[String]) {
    #[cfg(test)]
    REGISTERED.with(|n| n.set(n.get() + 1));
    let entry = reach.entry(obj.id()).or_insert_with(|| Reach {
        object: obj.downgrade(),
        paths: HashMap::new(),
    });
    let paths = entry.paths.entry(root_id).or_default();
    // an extension of a known path means we came back around a cycle
    if paths.iter().any(|known| path.starts_with(known)) {
        return;
    }
    paths.push(path.to_vec());
}

/// Drop every path of `root_id` that runs through `prefix` from the
/// detached subtree at `obj`
fn unregister_below(
    reach: &mut HashMap<ObjectId, Reach>,
    obj: &ObjRef,
    root_id: ObjectId,
    prefix: &[String],
    visited: &mut HashSet<ObjectId>,
) {
    if !visited.insert(obj.id()) {
        return;
    }
    let Some(entry) = reach.get_mut(&obj.id()) else {
        return;
    };
    let Some(paths) = entry.paths.get_mut(&root_id) else {
        return;
    };
    paths.retain(|path| !path.starts_with(prefix));
    if paths.is_empty() {
        entry.paths.remove(&root_id);
    }
    if entry.paths.is_empty() {
        reach.remove(&obj.id());
    }
    for value in obj.iter_values() {
        if let Value::Object(child) = value {
            unregister_below(reach, &child, root_id, prefix, visited);
        }
    }
}

impl Registry {
    /// `(root, full path)` of `obj[key]` for every root reaching `obj`
    fn slots(&self, obj: &ObjRef, key: &str) -> Vec<(ObjectId, Vec<String>)> {
        let Some(reach) = self.reach.get(&obj.id()) else {
            return Vec::new();
        };
        let mut slots = Vec::new();
        for (root_id, paths) in &reach.paths {
            for path in paths {
                let mut full = path.clone();
                full.push(key.to_string());
                slots.push((*root_id, full));
            }
        }
        slots
    }

    /// Keep reach in step with one write: forget the subtree it detached
    /// and register the one it attached
    fn reshape(&mut self, obj: &ObjRef, event: &Event) {
        let old = event.old_value.as_object();
        let new = event.new_value.as_object();
        if old.is_none() && new.is_none() {
            return;
        }
        let slots = self.slots(obj, &event.key);
        if let Some(old) = old {
            for (root_id, full) in &slots {
                unregister_below(&mut self.reach, old, *root_id, full, &mut HashSet::new());
            }
        }
        if let Some(new) = new {
            for (root_id, full) in slots {
                self.attach(new, root_id, full);
            }
        }
    }

    /// Register `child`, newly placed at `full` under `root_id`, for the
    /// subscriptions that watch at or above it, and re-walk the ones whose
    /// path runs through it
    fn attach(&mut self, child: &ObjRef, root_id: ObjectId, full: Vec<String>) {
        let Some(ids) = self.by_root.get(&root_id) else {
            return;
        };
        let mut below = false;
        let mut through = Vec::new();
        for sub in ids.iter().filter_map(|id| self.subs.get(id)) {
            if full.starts_with(&sub.path) {
                below = true;
            } else if sub.path.starts_with(&full) {
                through.push((sub.root.clone(), sub.path.clone()));
            }
        }
        if below {
            register(&mut self.reach, child, root_id, &full);
            let mut path = full;
            walk_below(&mut self.reach, child, root_id, &mut path, &mut HashSet::new());
        }
        for (root, path) in through {
            walk(&mut self.reach, &root, &path);
        }
    }
}

/// Rewrite subscription paths that run through elements of `array` after
/// its elements moved. `map` takes an old index to the new one, or `None`
/// for an element that is gone.
pub(crate) fn remap_indices(array: &ObjRef, map: impl Fn(usize) -> Option<usize>) {
    debug_assert!(array.is_array(), "index remap on a plain object");
    REGISTRY.with(|r| {
        let mut reg = r.borrow_mut();
        let Some(reach) = reg.reach.get(&array.id()) else {
            return;
        };
        let mut rewrites: Vec<(WatchId, usize, String)> = Vec::new();
        let mut touched = HashSet::new();
        for (root_id, paths) in &reach.paths {
            let Some(ids) = reg.by_root.get(root_id) else {
                continue;
            };
            for path in paths {
                let at = path.len();
                for id in ids {
                    let Some(sub) = reg.subs.get(id) else {
                        continue;
                    };
                    if sub.path.len() <= at || !sub.path.starts_with(path) || touched.contains(&(*id, at)) {
                        continue;
                    }
                    let Ok(old) = sub.path[at].parse::<usize>() else {
                        continue;
                    };
                    if let Some(new) = map(old).filter(|new| *new != old) {
                        touched.insert((*id, at));
                        rewrites.push((*id, at, new.to_string()));
                    }
                }
            }
        }
        let roots: Vec<ObjectId> = reach.paths.keys().copied().collect();

        for (id, at, segment) in rewrites {
            if let Some(sub) = reg.subs.get_mut(&id) {
                tracing::trace!(?id, from = %sub.path[at], to = %segment, "rewrite watch path");
                sub.path[at] = segment;
            }
        }
        for root_id in roots {
            reg.rebuild_root(root_id);
        }
    });
}

/// Deliver `events` on `obj` to every interested subscriber, after
/// bringing reach up to date with them.
pub(crate) fn notify(obj: &ObjRef, events: Vec<Event>) -> Result<()> {
    if !is_reached(obj) {
        return Ok(());
    }
    REGISTRY.with(|r| {
        let mut reg = r.borrow_mut();
        for event in &events {
            reg.reshape(obj, event);
        }
    });
    dispatch(obj, events)
}

/// Deliver `events` for elements that moved. [`remap_indices`] has already
/// rebuilt reach for the array's roots.
pub(crate) fn notify_moved(obj: &ObjRef, events: Vec<Event>) -> Result<()> {
    if !is_reached(obj) {
        return Ok(());
    }
    dispatch(obj, events)
}

fn is_reached(obj: &ObjRef) -> bool {
    REGISTRY.with(|r| r.borrow().reach.contains_key(&obj.id()))
}

/// Each event's call list is snapshotted before any callback runs, and a
/// callback unwatched by an earlier one in the same list is skipped.
fn dispatch(obj: &ObjRef, events: Vec<Event>) -> Result<()> {
    for event in events {
        let calls = REGISTRY.with(|r| r.borrow().calls(obj, &event));
        for (id, callback, change) in calls {
            if REGISTRY.with(|r| !r.borrow().subs.contains_key(&id)) {
                continue;
            }
            tracing::trace!(?id, action = %change.action, path = %change.path.join("."), "notify");
            callback(&change).map_err(|source| NotifyError::Callback {
                path: change.path.join("."),
                source,
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;

    type Log = Rc<RefCell<Vec<(Action, String)>>>;

    fn logger(log: &Log) -> impl Fn(&Change) -> anyhow::Result<()> + 'static {
        let log = log.clone();
        move |c: &Change| {
            log.borrow_mut().push((c.action, c.path.join(".")));
            Ok(())
        }
    }

    fn data(v: serde_json::Value) -> ObjRef {
        Value::from_json(&v).as_object().unwrap().clone()
    }

    #[test]
    fn test_parent_self_and_child_changes() {
        let o = data(json!({"a": {"b": {"c": 1}}}));
        let log = Log::default();
        let id = watch(&o, &["a", "b"], logger(&log));

        o.get_path(&["a", "b"]).as_object().unwrap().set("c", 2).unwrap();
        o.get("a").as_object().unwrap().set("b", 3).unwrap();
        o.set("a", Value::Null).unwrap();
        o.set("other", 1).unwrap();

        assert_eq!(
            *log.borrow(),
            [(Action::Set, "a.b.c".into()), (Action::Set, "a.b".into()), (Action::Set, "a".into())]
        );
        unwatch(id);
    }

    #[test]
    fn test_replaced_subtree_is_tracked() {
        let o = data(json!({"a": {"b": 1}}));
        let log = Log::default();
        let id = watch(&o, &["a", "b"], logger(&log));

        let old = o.get("a").as_object().unwrap().clone();
        o.set("a", Value::from_json(&json!({"b": 2}))).unwrap();
        log.borrow_mut().clear();

        // the detached object no longer reaches the subscriber
        old.set("b", 5).unwrap();
        assert!(log.borrow().is_empty());
        o.get("a").as_object().unwrap().set("b", 6).unwrap();
        assert_eq!(log.borrow().len(), 1);
        unwatch(id);
    }

    #[test]
    fn test_same_value_does_not_notify() {
        let o = data(json!({"a": 1}));
        let log = Log::default();
        let id = watch(&o, &["a"], logger(&log));
        o.set("a", 1).unwrap();
        assert!(log.borrow().is_empty());
        unwatch(id);
    }

    #[test]
    fn test_unwatch_inside_callback_skips_sibling() {
        let o = data(json!({"a": 1}));
        let log = Log::default();
        let second: Rc<RefCell<Option<WatchId>>> = Rc::default();
        let s = second.clone();
        let first = watch(&o, &["a"], move |_: &Change| {
            if let Some(id) = s.borrow_mut().take() {
                unwatch(id);
            }
            Ok(())
        });
        *second.borrow_mut() = Some(watch(&o, &["a"], logger(&log)));

        o.set("a", 2).unwrap();
        assert!(log.borrow().is_empty());
        unwatch(first);
    }

    #[test]
    fn test_callback_error_propagates() {
        let o = data(json!({"a": 1}));
        let id = watch(&o, &["a"], |_: &Change| anyhow::bail!("boom"));
        let err = o.set("a", 2).unwrap_err();
        assert_eq!(err.path(), "a");
        assert_eq!(o.get("a"), Value::Number(2.0));
        unwatch(id);
    }

    #[test]
    fn test_shift_rewrites_element_paths() {
        let o = data(json!({"list": [{"n": 0}, {"n": 1}, {"n": 2}]}));
        let log = Log::default();
        let id = watch(&o, &["list", "2", "n"], logger(&log));

        let list = o.get("list").as_object().unwrap().clone();
        list.shift().unwrap();
        assert_eq!(watch_path(id).unwrap(), ["list", "1", "n"]);
        // the watched element moved but its value did not change
        assert!(log.borrow().is_empty());

        list.get("1").as_object().unwrap().set("n", 9).unwrap();
        assert_eq!(*log.borrow(), [(Action::Set, "list.1.n".into())]);
        unwatch(id);
    }

    fn registered() -> usize {
        REGISTERED.with(|n| n.get())
    }

    #[test]
    fn test_primitive_write_leaves_reach_alone() {
        let o = data(json!({
            "title": "a",
            "items": [{"n": 0, "tags": ["x"]}, {"n": 1, "tags": ["y"]}]
        }));
        let log = Log::default();
        let title = watch(&o, &["title"], logger(&log));
        let items = watch(&o, &["items"], logger(&log));
        let stats = registry_stats();
        let count = registered();

        o.set("title", "b").unwrap();
        o.get_path(&["items", "1"]).as_object().unwrap().set("n", 5).unwrap();
        assert_eq!(registry_stats(), stats);
        assert_eq!(registered(), count);
        assert_eq!(*log.borrow(), [(Action::Set, "title".into()), (Action::Set, "items.1.n".into())]);

        unwatch(title);
        unwatch(items);
    }

    #[test]
    fn test_attach_registers_only_the_new_subtree() {
        let o = data(json!({"items": [{"tags": ["x"]}], "big": [[1], [2], [3]]}));
        let log = Log::default();
        let id = watch(&o, &["items"], logger(&log));
        let count = registered();

        let items = o.get("items").as_object().unwrap().clone();
        items.push(vec![Value::from_json(&json!({"tags": ["y"]}))]).unwrap();
        // the pushed item and its tags
        assert_eq!(registered(), count + 2);

        log.borrow_mut().clear();
        o.get_path(&["items", "1", "tags"]).as_object().unwrap().push(vec![Value::str("z")]).unwrap();
        assert_eq!(*log.borrow(), [(Action::Set, "items.1.tags.1".into())]);

        // replacing an item with one of the same shape leaves the table as it was
        let stats = registry_stats();
        let old = items.get("0").as_object().unwrap().clone();
        items.set("0", Value::from_json(&json!({"tags": ["w"]}))).unwrap();
        assert_eq!(registry_stats(), stats);
        log.borrow_mut().clear();
        old.get("tags").as_object().unwrap().push(vec![Value::Null]).unwrap();
        assert!(log.borrow().is_empty());

        unwatch(id);
        assert!(registry_stats().is_empty());
    }

    #[test]
    fn test_cycle_terminates() {
        let o = data(json!({"child": {}}));
        let child = o.get("child").as_object().unwrap().clone();
        child.set("parent", o.clone()).unwrap();
        let log = Log::default();
        let id = watch(&o, &["child", "parent", "child", "x"], logger(&log));

        // coming back to `o` and `child` through the cycle adds no paths
        assert_eq!(registry_stats().paths, 2);
        o.set("child", Value::Null).unwrap();
        assert_eq!(*log.borrow(), [(Action::Set, "child".into())]);

        unwatch(id);
        assert!(registry_stats().is_empty());
    }
}
