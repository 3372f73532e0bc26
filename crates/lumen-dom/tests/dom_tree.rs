//! Integration tests for the shared DOM handle

use lumen_dom::{Dom, MutationType, NodeId};

fn texts(dom: &Dom, parent: NodeId) -> Vec<String> {
    dom.children(parent).into_iter().filter_map(|c| dom.text(c)).collect()
}

#[test]
fn test_moving_a_node_records_remove_then_add() {
    let dom = Dom::new();
    let a = dom.create_element("a");
    let b = dom.create_element("b");
    let t = dom.create_text("x");
    dom.append_child(a, t).unwrap();
    dom.take_records();

    dom.append_child(b, t).unwrap();
    let records = dom.take_records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].removed_node, Some(t));
    assert_eq!(records[0].target, a);
    assert_eq!(records[1].added_node, Some(t));
    assert_eq!(records[1].target, b);
    assert_eq!(dom.child_count(a), 0);
}

#[test]
fn test_insert_at_front_and_middle() {
    let dom = Dom::new();
    let ul = dom.create_element("ul");
    for s in ["b", "d"] {
        let t = dom.create_text(s);
        dom.append_child(ul, t).unwrap();
    }
    let a = dom.create_text("a");
    dom.insert_at(ul, 0, a).unwrap();
    let c = dom.create_text("c");
    dom.insert_at(ul, 2, c).unwrap();
    assert_eq!(texts(&dom, ul), ["a", "b", "c", "d"]);
    assert_eq!(dom.inner_html(ul), "abcd");
}

#[test]
fn test_created_counter() {
    let dom = Dom::new();
    dom.create_element("div");
    dom.create_text("t");
    assert_eq!(dom.nodes_created(), 2);
    dom.reset_created();
    assert_eq!(dom.nodes_created(), 0);
}

#[test]
fn test_attribute_records() {
    let dom = Dom::new();
    let el = dom.create_element("div");
    dom.set_attribute(el, "class", "a").unwrap();
    dom.set_attribute(el, "class", "a").unwrap();
    assert!(dom.remove_attribute(el, "class").unwrap());
    let records = dom.take_records();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.mutation_type == MutationType::Attributes));
    assert_eq!(records[1].old_value.as_deref(), Some("a"));
}

#[test]
fn test_text_content_nested() {
    let dom = Dom::new();
    let div = dom.create_element("div");
    let span = dom.create_element("span");
    let t1 = dom.create_text("Hello ");
    let t2 = dom.create_text("World");
    dom.append_child(div, t1).unwrap();
    dom.append_child(div, span).unwrap();
    dom.append_child(span, t2).unwrap();
    assert_eq!(dom.text_content(div), "Hello World");
    assert_eq!(dom.outer_html(div), "<div>Hello <span>World</span></div>");
}
