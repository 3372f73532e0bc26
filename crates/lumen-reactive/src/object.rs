//! Shared Objects
//!
//! [`ObjRef`] is a reference-counted handle to a plain object or an array.
//! Reads are plain; every write goes through the watch registry so that
//! subscribers on any path reaching the object hear about it.
//!
//! Array methods that shuffle elements report one coarse batch of changes
//! per call rather than one change per moved element:
//!
//! | method      | changes                                                       |
//! |-------------|---------------------------------------------------------------|
//! | `push`      | `set` for every new index                                     |
//! | `pop`       | `remove` at the old last index                                |
//! | `shift`     | `remove` at 0                                                 |
//! | `unshift`   | `insert` at 0, 1, .. n-1                                      |
//! | `splice`    | pairwise `set`, then `insert` ascending or `remove` descending |
//! | `sort`, `reverse` | `set` from the first changed index to the end           |
//! | `truncate`  | `delete` for every dropped index, descending                  |

use crate::error::Result;
use crate::registry::{self, Action, Event};
use crate::value::Value;
use std::cell::{Ref, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::rc::{Rc, Weak};

/// Identity of a shared object, stable for its lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(usize);

/// Object storage
#[derive(Debug, Clone)]
pub enum Object {
    /// Keys in insertion order
    Plain(Vec<(Rc<str>, Value)>),
    Array(Vec<Value>),
}

impl Object {
    fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Object::Plain(entries) => entries.iter().find(|(k, _)| &**k == key).map(|(_, v)| v),
            Object::Array(items) => index(key).and_then(|i| items.get(i)),
        }
    }
}

/// Array index in `key`, if it is one
fn index(key: &str) -> Option<usize> {
    if key.len() > 1 && key.starts_with('0') {
        return None;
    }
    key.parse().ok()
}

/// Shared handle to an object or array
#[derive(Clone)]
pub struct ObjRef(Rc<RefCell<Object>>);

impl ObjRef {
    pub fn new(object: Object) -> Self {
        ObjRef(Rc::new(RefCell::new(object)))
    }

    /// Plain object with these entries
    pub fn object<K: AsRef<str>>(entries: Vec<(K, Value)>) -> Self {
        Self::new(Object::Plain(
            entries.into_iter().map(|(k, v)| (Rc::from(k.as_ref()), v)).collect(),
        ))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Self::new(Object::Array(items))
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        ObjectId(Rc::as_ptr(&self.0) as *const () as usize)
    }

    #[inline]
    pub fn ptr_eq(&self, other: &ObjRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn downgrade(&self) -> Weak<RefCell<Object>> {
        Rc::downgrade(&self.0)
    }

    /// Direct read access to the storage
    pub fn borrow(&self) -> Ref<'_, Object> {
        self.0.borrow()
    }

    pub fn is_array(&self) -> bool {
        matches!(&*self.0.borrow(), Object::Array(_))
    }

    /// Entry count for objects, length for arrays
    pub fn len(&self) -> usize {
        match &*self.0.borrow() {
            Object::Plain(entries) => entries.len(),
            Object::Array(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Property value; `length` on an array is its length
    pub fn get(&self, key: &str) -> Value {
        let object = self.0.borrow();
        match (&*object, object.get(key)) {
            (_, Some(v)) => v.clone(),
            (Object::Array(items), None) if key == "length" => Value::Number(items.len() as f64),
            _ => Value::Undefined,
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.borrow().get(key).is_some()
    }

    /// Value at a path below this object, `undefined` where the path breaks
    pub fn get_path<S: AsRef<str>>(&self, path: &[S]) -> Value {
        let mut current = Value::Object(self.clone());
        for segment in path {
            current = match &current {
                Value::Object(o) => o.get(segment.as_ref()),
                Value::String(s) if segment.as_ref() == "length" => Value::Number(s.chars().count() as f64),
                _ => return Value::Undefined,
            };
        }
        current
    }

    /// Property names, or index strings for arrays
    pub fn keys(&self) -> Vec<String> {
        match &*self.0.borrow() {
            Object::Plain(entries) => entries.iter().map(|(k, _)| k.to_string()).collect(),
            Object::Array(items) => (0..items.len()).map(|i| i.to_string()).collect(),
        }
    }

    pub fn entries(&self) -> Vec<(String, Value)> {
        match &*self.0.borrow() {
            Object::Plain(entries) => entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            Object::Array(items) => items.iter().enumerate().map(|(i, v)| (i.to_string(), v.clone())).collect(),
        }
    }

    /// Snapshot of the values, in order
    pub fn iter_values(&self) -> Vec<Value> {
        match &*self.0.borrow() {
            Object::Plain(entries) => entries.iter().map(|(_, v)| v.clone()).collect(),
            Object::Array(items) => items.clone(),
        }
    }

    /// Write a property. Writing the value already there notifies nobody.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        if key == "length" && self.is_array() {
            let len = value.to_number();
            if len >= 0.0 && len.fract() == 0.0 {
                return self.set_len(len as usize);
            }
            tracing::warn!(length = %value, "invalid array length ignored");
            return Ok(());
        }
        let old = {
            let mut object = self.0.borrow_mut();
            match &mut *object {
                Object::Array(items) => {
                    let Some(i) = index(key) else {
                        tracing::warn!(key, "non-index property on an array ignored");
                        return Ok(());
                    };
                    if i >= items.len() {
                        items.resize(i + 1, Value::Undefined);
                        items[i] = value.clone();
                        Value::Undefined
                    } else if items[i].same_value(&value) {
                        return Ok(());
                    } else {
                        std::mem::replace(&mut items[i], value.clone())
                    }
                }
                Object::Plain(entries) => match entries.iter_mut().find(|(k, _)| &**k == key) {
                    Some((_, slot)) if slot.same_value(&value) => return Ok(()),
                    Some((_, slot)) => std::mem::replace(slot, value.clone()),
                    None => {
                        entries.push((Rc::from(key), value.clone()));
                        Value::Undefined
                    }
                },
            }
        };
        registry::notify(self, vec![Event::new(Action::Set, key, value, old)])
    }

    /// Delete a property. Array elements become `undefined` holes.
    pub fn remove(&self, key: &str) -> Result<Value> {
        let old = {
            let mut object = self.0.borrow_mut();
            match &mut *object {
                Object::Plain(entries) => match entries.iter().position(|(k, _)| &**k == key) {
                    Some(pos) => entries.remove(pos).1,
                    None => return Ok(Value::Undefined),
                },
                Object::Array(items) => match index(key).filter(|&i| i < items.len()) {
                    Some(i) => std::mem::take(&mut items[i]),
                    None => return Ok(Value::Undefined),
                },
            }
        };
        registry::notify(self, vec![Event::new(Action::Delete, key, Value::Undefined, old.clone())])?;
        Ok(old)
    }

    /// Write at a path below this object. Returns `false` when an
    /// intermediate value is missing or not an object.
    pub fn set_path<S: AsRef<str>>(&self, path: &[S], value: impl Into<Value>) -> Result<bool> {
        let Some((last, parents)) = path.split_last() else {
            return Ok(false);
        };
        let parent = self.get_path(parents);
        match parent.as_object() {
            Some(parent) => {
                parent.set(last.as_ref(), value)?;
                Ok(true)
            }
            None => {
                let path: Vec<&str> = path.iter().map(AsRef::as_ref).collect();
                tracing::warn!(path = %path.join("."), "write to a path whose parent is gone");
                Ok(false)
            }
        }
    }

    fn with_items<R>(&self, f: impl FnOnce(&mut Vec<Value>) -> R) -> Option<R> {
        match &mut *self.0.borrow_mut() {
            Object::Array(items) => Some(f(items)),
            Object::Plain(_) => {
                tracing::warn!("array method called on a plain object");
                None
            }
        }
    }

    /// Append values; returns the new length
    pub fn push(&self, values: Vec<Value>) -> Result<usize> {
        let Some((start, events)) = self.with_items(|items| {
            let start = items.len();
            let events: Vec<Event> = values
                .iter()
                .enumerate()
                .map(|(k, v)| Event::new(Action::Set, &(start + k).to_string(), v.clone(), Value::Undefined))
                .collect();
            items.extend(values);
            (start, events)
        }) else {
            return Ok(0);
        };
        let len = start + events.len();
        registry::notify(self, events)?;
        Ok(len)
    }

    pub fn pop(&self) -> Result<Value> {
        let Some(Some((i, old))) = self.with_items(|items| items.pop().map(|v| (items.len(), v))) else {
            return Ok(Value::Undefined);
        };
        registry::remap_indices(self, |k| (k != i).then_some(k));
        registry::notify_moved(self, vec![Event::new(Action::Remove, &i.to_string(), Value::Undefined, old.clone())])?;
        Ok(old)
    }

    pub fn shift(&self) -> Result<Value> {
        let Some(Some(old)) = self.with_items(|items| (!items.is_empty()).then(|| items.remove(0))) else {
            return Ok(Value::Undefined);
        };
        registry::remap_indices(self, |k| k.checked_sub(1));
        registry::notify_moved(self, vec![Event::new(Action::Remove, "0", Value::Undefined, old.clone())])?;
        Ok(old)
    }

    /// Prepend values; returns the new length
    pub fn unshift(&self, values: Vec<Value>) -> Result<usize> {
        let n = values.len();
        let Some(len) = self.with_items(|items| {
            items.splice(0..0, values.iter().cloned());
            items.len()
        }) else {
            return Ok(0);
        };
        if n == 0 {
            return Ok(len);
        }
        registry::remap_indices(self, |k| Some(k + n));
        let events = values
            .into_iter()
            .enumerate()
            .map(|(k, v)| Event::new(Action::Insert, &k.to_string(), v, Value::Undefined))
            .collect();
        registry::notify_moved(self, events)?;
        Ok(len)
    }

    /// Remove `delete_count` elements at `start` and insert `values` there.
    /// Returns the removed elements.
    pub fn splice(&self, start: usize, delete_count: usize, values: Vec<Value>) -> Result<Vec<Value>> {
        let inserted = values.len();
        let Some((start, removed)) = self.with_items(|items| {
            let start = start.min(items.len());
            let end = (start + delete_count).min(items.len());
            let removed: Vec<Value> = items.splice(start..end, values.iter().cloned()).collect();
            (start, removed)
        }) else {
            return Ok(Vec::new());
        };
        let deleted = removed.len();
        let overlap = deleted.min(inserted);

        registry::remap_indices(self, |k| {
            if k < start + overlap {
                Some(k)
            } else if k < start + deleted {
                None
            } else {
                Some(k + inserted - deleted)
            }
        });

        let mut events: Vec<Event> = (0..overlap)
            .filter(|&k| !removed[k].same_value(&values[k]))
            .map(|k| Event::new(Action::Set, &(start + k).to_string(), values[k].clone(), removed[k].clone()))
            .collect();
        if inserted > deleted {
            events.extend((overlap..inserted).map(|k| {
                Event::new(Action::Insert, &(start + k).to_string(), values[k].clone(), Value::Undefined)
            }));
        } else {
            events.extend((overlap..deleted).rev().map(|k| {
                Event::new(Action::Remove, &(start + k).to_string(), Value::Undefined, removed[k].clone())
            }));
        }
        registry::notify_moved(self, events)?;
        Ok(removed)
    }

    /// Stable sort in place. The comparator runs with no borrow held, so it
    /// may read the array.
    pub fn sort_by(&self, mut compare: impl FnMut(&Value, &Value) -> Ordering) -> Result<()> {
        let Some(before) = self.with_items(|items| items.clone()) else {
            return Ok(());
        };
        let mut indexed: Vec<(usize, Value)> = before.iter().cloned().enumerate().collect();
        indexed.sort_by(|a, b| compare(&a.1, &b.1));
        let order: Vec<usize> = indexed.iter().map(|(i, _)| *i).collect();
        self.with_items(|items| *items = indexed.into_iter().map(|(_, v)| v).collect());
        self.reordered(before, order)
    }

    pub fn reverse(&self) -> Result<()> {
        let Some(before) = self.with_items(|items| {
            let before = items.clone();
            items.reverse();
            before
        }) else {
            return Ok(());
        };
        let order = (0..before.len()).rev().collect();
        self.reordered(before, order)
    }

    /// `order[new] = old` after a permutation
    fn reordered(&self, before: Vec<Value>, order: Vec<usize>) -> Result<()> {
        let Some(first) = order.iter().enumerate().position(|(new, &old)| new != old) else {
            return Ok(());
        };
        let mut new_index = vec![0; order.len()];
        for (new, &old) in order.iter().enumerate() {
            new_index[old] = new;
        }
        registry::remap_indices(self, |k| new_index.get(k).copied());

        let after = self.iter_values();
        let events = (first..after.len())
            .map(|k| Event::new(Action::Set, &k.to_string(), after[k].clone(), before[k].clone()))
            .collect();
        registry::notify_moved(self, events)
    }

    /// Drop elements past `len`
    pub fn truncate(&self, len: usize) -> Result<()> {
        let Some(dropped) = self.with_items(|items| if len < items.len() { items.split_off(len) } else { Vec::new() })
        else {
            return Ok(());
        };
        if dropped.is_empty() {
            return Ok(());
        }
        registry::remap_indices(self, |k| (k < len).then_some(k));
        let events = dropped
            .into_iter()
            .enumerate()
            .rev()
            .map(|(k, old)| Event::new(Action::Delete, &(len + k).to_string(), Value::Undefined, old))
            .collect();
        registry::notify_moved(self, events)
    }

    fn set_len(&self, len: usize) -> Result<()> {
        let current = self.len();
        if len < current {
            self.truncate(len)
        } else if len > current {
            self.push(vec![Value::Undefined; len - current]).map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl PartialEq for ObjRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Ok(object) = self.0.try_borrow() else {
            return f.write_str("<borrowed>");
        };
        match &*object {
            // values are shallow to stay finite on cycles
            Object::Array(items) => write!(f, "Array({})", items.len()),
            Object::Plain(entries) => {
                let keys: Vec<&str> = entries.iter().map(|(k, _)| &**k).collect();
                write!(f, "Object{keys:?}")
            }
        }
    }
}
