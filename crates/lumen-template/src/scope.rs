//! Scopes
//!
//! A [`Scope`] is the symbol table an expression is evaluated against. The
//! root frame binds `this` to the component data object; loop bodies and
//! arrow functions push child frames. Alongside its value every binding
//! may know the data path it was read from, which is how a name like
//! `item.title` inside a loop turns into a watchable path such as
//! `todos.3.title`.

use lumen_reactive::{ObjRef, Value};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Where a binding lives in the component data
#[derive(Clone, Default)]
pub enum ItemPath {
    /// Not backed by data (an index, a local `const`, a callback argument)
    #[default]
    Unbound,
    Fixed(Vec<String>),
    /// Computed on demand. Loop items use this because their index moves
    /// as the array is edited.
    Dynamic(Rc<dyn Fn() -> Option<Vec<String>>>),
}

impl ItemPath {
    pub fn current(&self) -> Option<Vec<String>> {
        match self {
            ItemPath::Unbound => None,
            ItemPath::Fixed(path) => Some(path.clone()),
            ItemPath::Dynamic(f) => f(),
        }
    }

    /// This path extended by `rest`
    pub fn join(&self, rest: &[String]) -> ItemPath {
        match self {
            ItemPath::Unbound => ItemPath::Unbound,
            ItemPath::Fixed(path) => ItemPath::Fixed(path.iter().chain(rest).cloned().collect()),
            ItemPath::Dynamic(f) => {
                let f = f.clone();
                let rest = rest.to_vec();
                ItemPath::Dynamic(Rc::new(move || {
                    let mut path = f()?;
                    path.extend(rest.iter().cloned());
                    Some(path)
                }))
            }
        }
    }
}

impl fmt::Debug for ItemPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemPath::Unbound => f.write_str("Unbound"),
            ItemPath::Fixed(path) => write!(f, "Fixed({})", path.join(".")),
            ItemPath::Dynamic(_) => write!(f, "Dynamic({:?})", self.current().map(|p| p.join("."))),
        }
    }
}

/// One named binding
#[derive(Debug, Clone, Default)]
pub struct ScopeItem {
    pub path: ItemPath,
    pub value: Value,
}

impl ScopeItem {
    pub fn new(path: ItemPath, value: Value) -> Self {
        Self { path, value }
    }

    pub fn local(value: Value) -> Self {
        Self::new(ItemPath::Unbound, value)
    }
}

struct Frame {
    vars: RefCell<Vec<(String, ScopeItem)>>,
    parent: Option<Scope>,
}

/// Chain of binding frames
#[derive(Clone)]
pub struct Scope(Rc<Frame>);

impl Scope {
    /// Root scope of a component instance
    pub fn root(data: &ObjRef) -> Self {
        let scope = Self::with_parent(None);
        scope.define("this", ScopeItem::new(ItemPath::Fixed(Vec::new()), Value::Object(data.clone())));
        scope
    }

    fn with_parent(parent: Option<Scope>) -> Self {
        Scope(Rc::new(Frame {
            vars: RefCell::new(Vec::new()),
            parent,
        }))
    }

    /// Empty frame on top of this one
    pub fn child(&self) -> Self {
        Self::with_parent(Some(self.clone()))
    }

    /// Child frame holding `bindings`
    pub fn with(&self, bindings: Vec<(String, ScopeItem)>) -> Self {
        let scope = self.child();
        *scope.0.vars.borrow_mut() = bindings;
        scope
    }

    /// Bind `name` in this frame, shadowing outer bindings
    pub fn define(&self, name: &str, item: ScopeItem) {
        let mut vars = self.0.vars.borrow_mut();
        match vars.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = item,
            None => vars.push((name.to_string(), item)),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<ScopeItem> {
        let mut frame = Some(self);
        while let Some(scope) = frame {
            if let Some((_, item)) = scope.0.vars.borrow().iter().find(|(n, _)| n == name) {
                return Some(item.clone());
            }
            frame = scope.0.parent.as_ref();
        }
        None
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Overwrite the nearest binding of `name`. Returns `false` when no
    /// frame binds it.
    pub fn assign(&self, name: &str, value: Value) -> bool {
        let mut frame = Some(self);
        while let Some(scope) = frame {
            let mut vars = scope.0.vars.borrow_mut();
            if let Some((_, item)) = vars.iter_mut().find(|(n, _)| n == name) {
                item.value = value;
                item.path = ItemPath::Unbound;
                return true;
            }
            drop(vars);
            frame = scope.0.parent.as_ref();
        }
        false
    }

    /// The component data object
    pub fn this(&self) -> Value {
        self.lookup("this").map(|item| item.value).unwrap_or_default()
    }

    /// Turn a local name chain like `["item", "title"]` into a path from
    /// the component data. `None` when the first name is not bound to
    /// data.
    pub fn resolve(&self, chain: &[String]) -> Option<Vec<String>> {
        let (first, rest) = chain.split_first()?;
        let mut path = self.lookup(first)?.path.current()?;
        path.extend(rest.iter().cloned());
        Some(path)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.0.vars.borrow().iter().map(|(n, _)| n.clone()).collect();
        f.debug_struct("Scope")
            .field("names", &names)
            .field("parent", &self.0.parent.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_resolution_through_frames() {
        let data = ObjRef::object(vec![("todos", Value::Null)]);
        let root = Scope::root(&data);
        let item = root.with(vec![(
            "todo".to_string(),
            ScopeItem::new(ItemPath::Fixed(vec!["todos".into(), "3".into()]), Value::Null),
        )]);
        let inner = item.with(vec![("i".to_string(), ScopeItem::local(Value::Number(3.0)))]);

        assert_eq!(inner.resolve(&["this".into(), "todos".into()]), Some(vec!["todos".to_string()]));
        assert_eq!(
            inner.resolve(&["todo".into(), "title".into()]),
            Some(vec!["todos".to_string(), "3".into(), "title".into()])
        );
        assert_eq!(inner.resolve(&["i".into()]), None);
        assert_eq!(inner.resolve(&["Math".into()]), None);
    }

    #[test]
    fn test_dynamic_path_follows_index() {
        let index = Rc::new(Cell::new(2));
        let cell = index.clone();
        let path = ItemPath::Dynamic(Rc::new(move || Some(vec!["list".to_string(), cell.get().to_string()])));
        let deep = path.join(&["name".to_string()]);
        assert_eq!(deep.current(), Some(vec!["list".to_string(), "2".into(), "name".into()]));
        index.set(0);
        assert_eq!(deep.current(), Some(vec!["list".to_string(), "0".into(), "name".into()]));
    }

    #[test]
    fn test_assign_and_shadow() {
        let data = ObjRef::object::<&str>(vec![]);
        let root = Scope::root(&data);
        let outer = root.with(vec![("x".to_string(), ScopeItem::local(Value::Number(1.0)))]);
        let inner = outer.child();
        inner.define("y", ScopeItem::local(Value::Bool(true)));

        assert!(inner.assign("x", Value::Number(2.0)));
        assert_eq!(outer.lookup("x").unwrap().value, Value::Number(2.0));
        assert!(!inner.assign("z", Value::Null));
        assert!(outer.lookup("y").is_none());
        assert!(matches!(inner.this(), Value::Object(_)));
    }
}
