//! Integration tests for path tracking and array change batching

use lumen_reactive::{registry_stats, unwatch, watch, watch_path, Action, Change, ObjRef, Value};
use serde_json::json;
use std::cell::RefCell;
use std::rc::Rc;

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

fn obj(v: Value) -> ObjRef {
    v.as_object().unwrap().clone()
}

#[test]
fn test_fan_out_through_back_reference() {
    let o = data(json!({"b1": {}, "b2": [1, 2]}));
    let b1 = obj(o.get("b1"));
    b1.set("parent", o.clone()).unwrap();

    let from_o = Log::default();
    let from_b1 = Log::default();
    let w1 = watch(&o, &["b2"], logger(&from_o));
    let w2 = watch(&b1, &["parent", "b2"], logger(&from_b1));

    // o.b1.parent.b2[0] = 5
    obj(b1.get_path(&["parent", "b2"])).set("0", 5).unwrap();

    assert_eq!(*from_o.borrow(), [(Action::Set, "b2.0".to_string())]);
    assert_eq!(*from_b1.borrow(), [(Action::Set, "parent.b2.0".to_string())]);
    assert_eq!(o.get_path(&["b2", "0"]), Value::Number(5.0));

    unwatch(w1);
    unwatch(w2);
    b1.remove("parent").unwrap();
}

#[test]
fn test_push_notifies_once_per_item() {
    let o = data(json!({"items": ["a"]}));
    let log = Log::default();
    let id = watch(&o, &["items"], logger(&log));

    obj(o.get("items")).push(vec![Value::str("b"), Value::str("c"), Value::str("d")]).unwrap();
    assert_eq!(
        *log.borrow(),
        [
            (Action::Set, "items.1".to_string()),
            (Action::Set, "items.2".to_string()),
            (Action::Set, "items.3".to_string()),
        ]
    );
    unwatch(id);
}

#[test]
fn test_array_method_events() {
    let o = data(json!({"a": [0, 1, 2, 3]}));
    let a = obj(o.get("a"));
    let log = Log::default();
    let id = watch(&o, &["a"], logger(&log));
    let take = || std::mem::take(&mut *log.borrow_mut());

    a.pop().unwrap();
    assert_eq!(take(), [(Action::Remove, "a.3".to_string())]);

    a.shift().unwrap();
    assert_eq!(take(), [(Action::Remove, "a.0".to_string())]);

    a.unshift(vec![Value::Number(7.0), Value::Number(8.0)]).unwrap();
    assert_eq!(take(), [(Action::Insert, "a.0".to_string()), (Action::Insert, "a.1".to_string())]);

    // [7, 8, 1, 2] -> [7, 9, 2]
    a.splice(1, 2, vec![Value::Number(9.0)]).unwrap();
    assert_eq!(take(), [(Action::Set, "a.1".to_string()), (Action::Remove, "a.2".to_string())]);

    // [7, 9, 2] -> [7, 4, 5, 6, 9, 2]
    a.splice(1, 0, vec![Value::Number(4.0), Value::Number(5.0), Value::Number(6.0)]).unwrap();
    assert_eq!(
        take(),
        [
            (Action::Insert, "a.1".to_string()),
            (Action::Insert, "a.2".to_string()),
            (Action::Insert, "a.3".to_string()),
        ]
    );

    // removals come highest index first
    a.splice(2, 3, vec![]).unwrap();
    assert_eq!(
        take(),
        [
            (Action::Remove, "a.4".to_string()),
            (Action::Remove, "a.3".to_string()),
            (Action::Remove, "a.2".to_string()),
        ]
    );

    // [7, 4, 2] reversed: index 1 stays, so sets start at 0
    a.reverse().unwrap();
    assert_eq!(take().len(), 3);

    a.truncate(1).unwrap();
    assert_eq!(take(), [(Action::Delete, "a.2".to_string()), (Action::Delete, "a.1".to_string())]);

    unwatch(id);
}

#[test]
fn test_sort_moves_element_watchers() {
    let o = data(json!({"people": [{"name": "c"}, {"name": "a"}, {"name": "b"}]}));
    let people = obj(o.get("people"));
    let log = Log::default();
    let id = watch(&o, &["people", "0", "name"], logger(&log));

    people
        .sort_by(|x, y| {
            let key = |v: &Value| v.as_object().map(|o| o.get("name").to_display_string()).unwrap_or_default();
            key(x).cmp(&key(y))
        })
        .unwrap();
    // "c" is now last
    assert_eq!(watch_path(id).unwrap(), ["people", "2", "name"]);

    log.borrow_mut().clear();
    obj(people.get("2")).set("name", "z").unwrap();
    assert_eq!(*log.borrow(), [(Action::Set, "people.2.name".to_string())]);
    unwatch(id);
}

#[test]
fn test_tables_empty_after_cycle() {
    let o = data(json!({"a": {"b": [{"c": 1}, {"c": 2}]}, "d": 1}));
    let ids = vec![
        watch(&o, &["a", "b", "0", "c"], |_: &Change| Ok(())),
        watch(&o, &["a", "b"], |_: &Change| Ok(())),
        watch(&o, &["a", "b"], |_: &Change| Ok(())),
        watch(&o, &["d"], |_: &Change| Ok(())),
    ];
    let inner = obj(o.get_path(&["a", "b", "1"]));
    let other = watch(&inner, &["c"], |_: &Change| Ok(()));
    assert!(!registry_stats().is_empty());

    obj(o.get_path(&["a", "b"])).shift().unwrap();
    for id in ids {
        assert!(unwatch(id));
    }
    assert!(unwatch(other));
    assert!(!unwatch(other));
    assert!(registry_stats().is_empty());
}
