//! Rendering and patching through the public API

use lumen_dom::{Dom, NodeId};
use lumen_reactive::{ObjRef, Value};
use lumen_template::{CompileOptions, EvalError, Instance, Template};
use serde_json::json;

fn data(v: serde_json::Value) -> ObjRef {
    Value::from_json(&v).as_object().unwrap().clone()
}

fn mount(src: &str, d: &ObjRef) -> (Dom, NodeId, Instance) {
    mount_with(src, d, &CompileOptions::default())
}

fn mount_with(src: &str, d: &ObjRef, options: &CompileOptions) -> (Dom, NodeId, Instance) {
    let dom = Dom::new();
    let root = dom.create_element("main");
    let instance = Template::compile(src, options).unwrap().instantiate(d, &dom);
    instance.apply(root, None).unwrap();
    (dom, root, instance)
}

fn first_element(dom: &Dom, root: NodeId) -> NodeId {
    dom.children(root)
        .into_iter()
        .find(|&n| dom.tag_name(n).is_some())
        .unwrap()
}

#[test]
fn test_text_interpolation_updates_in_place() {
    let d = data(json!({"user": {"name": "Ann"}}));
    let (dom, root, _i) = mount("`<p>Hello ${this.user.name}!</p>`", &d);
    assert_eq!(dom.inner_html(root), "<p>Hello Ann!</p>");

    dom.reset_created();
    d.get("user").as_object().unwrap().set("name", "Bo").unwrap();
    assert_eq!(dom.inner_html(root), "<p>Hello Bo!</p>");
    assert_eq!(dom.nodes_created(), 0);

    d.set("user", Value::from_json(&json!({"name": "Cy"}))).unwrap();
    assert_eq!(dom.inner_html(root), "<p>Hello Cy!</p>");
}

#[test]
fn test_attribute_values() {
    let d = data(json!({"cls": "big", "off": true, "tags": ["a", "b"], "style": {"color": "red"}}));
    let (dom, root, _i) = mount(
        r#"`<button class="btn ${this.cls}" disabled=${this.off} data-tags=${this.tags} style=${this.style}>x</button>`"#,
        &d,
    );
    let button = first_element(&dom, root);
    assert_eq!(dom.get_attribute(button, "class").as_deref(), Some("btn big"));
    assert_eq!(dom.get_attribute(button, "disabled").as_deref(), Some(""));
    assert_eq!(dom.get_attribute(button, "data-tags").as_deref(), Some("a b"));
    assert_eq!(dom.get_attribute(button, "style").as_deref(), Some("color: red;"));

    d.set("off", false).unwrap();
    assert_eq!(dom.get_attribute(button, "disabled"), None);
    d.set("cls", "small").unwrap();
    assert_eq!(dom.get_attribute(button, "class").as_deref(), Some("btn small"));
}

#[test]
fn test_whole_attribute_expression() {
    let d = data(json!({"attrs": "hidden data-id=7"}));
    let (dom, root, _i) = mount("`<div ${this.attrs}></div>`", &d);
    let div = first_element(&dom, root);
    assert_eq!(dom.outer_html(div), r#"<div hidden="" data-id="7"></div>"#);

    d.set("attrs", Value::from_json(&json!({"title": "t"}))).unwrap();
    assert_eq!(dom.outer_html(div), r#"<div title="t"></div>"#);
}

#[test]
fn test_event_attribute_calls_handler() {
    let d = data(json!({"count": 0}));
    let (dom, root, _i) = mount("`<button onclick=${() => this.count++}>${this.count}</button>`", &d);
    let button = first_element(&dom, root);
    assert_eq!(dom.get_attribute(button, "onclick"), None);

    dom.dispatch_event(button, "click").unwrap();
    dom.dispatch_event(button, "click").unwrap();
    assert_eq!(d.get("count"), Value::Number(2.0));
    assert_eq!(dom.text_content(button), "2");
}

#[test]
fn test_event_object() {
    let d = data(json!({"seen": ""}));
    let (dom, root, _i) = mount(
        "`<input type=\"text\" oninput=${e => this.seen = e.type + ':' + e.target.tagName}>`",
        &d,
    );
    let input = first_element(&dom, root);
    dom.dispatch_event(input, "input").unwrap();
    assert_eq!(d.get("seen"), Value::str("input:INPUT"));
}

#[test]
fn test_event_attributes_can_be_disabled() {
    let d = data(json!({"f": 1}));
    let options = CompileOptions {
        event_attributes: false,
        ..CompileOptions::default()
    };
    let (dom, root, _i) = mount_with("`<a onclick=${this.f}></a>`", &d, &options);
    let a = first_element(&dom, root);
    assert_eq!(dom.get_attribute(a, "onclick").as_deref(), Some("1"));
}

#[test]
fn test_two_way_binding() {
    let d = data(json!({"form": {"name": "Ann", "age": 30}}));
    let (dom, root, _i) = mount(
        r#"`<input value=${this.form.name}><input type="number" value=${this.form.age}><p>${this.form.name}</p>`"#,
        &d,
    );
    let children = dom.children(root);
    let (name, age) = (children[0], children[1]);
    assert_eq!(dom.get_attribute(name, "value").as_deref(), Some("Ann"));

    dom.set_attribute(name, "value", "Bob").unwrap();
    dom.dispatch_event(name, "input").unwrap();
    assert_eq!(d.get_path(&["form", "name"]), Value::str("Bob"));
    assert_eq!(dom.text_content(children[2]), "Bob");

    dom.set_attribute(age, "value", "41").unwrap();
    dom.dispatch_event(age, "change").unwrap();
    assert_eq!(d.get_path(&["form", "age"]), Value::Number(41.0));

    d.get("form").as_object().unwrap().set("name", "Cy").unwrap();
    assert_eq!(dom.get_attribute(name, "value").as_deref(), Some("Cy"));
}

#[test]
fn test_two_way_checkbox() {
    let d = data(json!({"done": false}));
    let (dom, root, _i) = mount(r#"`<input type="checkbox" value=${this.done}>`"#, &d);
    let input = first_element(&dom, root);

    dom.set_attribute(input, "checked", "").unwrap();
    dom.dispatch_event(input, "change").unwrap();
    assert_eq!(d.get("done"), Value::Bool(true));

    dom.remove_attribute(input, "checked").unwrap();
    dom.dispatch_event(input, "change").unwrap();
    assert_eq!(d.get("done"), Value::Bool(false));
}

#[test]
fn test_two_way_date() {
    let d = data(json!({"when": null, "at": 37_800_000}));
    let (dom, root, _i) = mount(
        r#"`<input type="date" value=${this.when}><input type="time" value=${this.at}>`"#,
        &d,
    );
    let children = dom.children(root);
    let (when, at) = (children[0], children[1]);
    assert_eq!(dom.get_attribute(when, "value"), None);
    assert_eq!(dom.get_attribute(at, "value").as_deref(), Some("10:30"));

    dom.set_attribute(when, "value", "2024-03-05").unwrap();
    dom.dispatch_event(when, "input").unwrap();
    assert_eq!(d.get("when"), Value::Number(1_709_596_800_000.0));
    assert_eq!(dom.get_attribute(when, "value").as_deref(), Some("2024-03-05"));

    d.set("when", 1_709_683_200_000.0).unwrap();
    assert_eq!(dom.get_attribute(when, "value").as_deref(), Some("2024-03-06"));

    dom.set_attribute(when, "value", "").unwrap();
    dom.dispatch_event(when, "change").unwrap();
    assert_eq!(d.get("when"), Value::Null);
}

#[test]
fn test_conditional_fragment() {
    let d = data(json!({"show": false, "msg": "hi"}));
    let (dom, root, _i) = mount("`<div>${this.show ? `<b>${this.msg}</b>` : 'none'}</div>`", &d);
    assert_eq!(dom.inner_html(root), "<div>none</div>");

    d.set("show", true).unwrap();
    assert_eq!(dom.inner_html(root), "<div><b>hi</b></div>");

    d.set("msg", "yo").unwrap();
    assert_eq!(dom.inner_html(root), "<div><b>yo</b></div>");
}

#[test]
fn test_complex_expression_with_callbacks() {
    let d = data(json!({"todos": [{"t": "a", "done": true}, {"t": "b", "done": false}]}));
    let (dom, root, _i) = mount(
        "`<p>${this.todos.filter(x => !x.done).length} left: ${this.todos.map(x => x.t).join(', ')}</p>`",
        &d,
    );
    assert_eq!(dom.inner_html(root), "<p>1 left: a, b</p>");

    let todos = d.get("todos").as_object().unwrap().clone();
    todos.push(vec![Value::from_json(&json!({"t": "c", "done": false}))]).unwrap();
    assert_eq!(dom.inner_html(root), "<p>2 left: a, b, c</p>");

    todos.get("0").as_object().unwrap().set("done", false).unwrap();
    assert_eq!(dom.inner_html(root), "<p>3 left: a, b, c</p>");
}

#[test]
fn test_loop_with_block_body() {
    let d = data(json!({"n": [1, 2, 3]}));
    let (dom, root, _i) = mount(
        "`<ul>${this.n.map(v => { const sq = v * v; return `<li>${sq}</li>`; })}</ul>`",
        &d,
    );
    assert_eq!(dom.inner_html(root), "<ul><li>1</li><li>4</li><li>9</li></ul>");

    d.get("n").as_object().unwrap().pop().unwrap();
    assert_eq!(dom.inner_html(root), "<ul><li>1</li><li>4</li></ul>");
}

#[test]
fn test_sort_and_reverse_patch_the_loop() {
    let d = data(json!({"l": ["b", "c", "a"]}));
    let (dom, root, _i) = mount("`<ol>${this.l.map(x => `<li>${x}</li>`)}</ol>`", &d);
    let l = d.get("l").as_object().unwrap().clone();

    l.sort_by(|a, b| a.to_display_string().cmp(&b.to_display_string())).unwrap();
    assert_eq!(dom.inner_html(root), "<ol><li>a</li><li>b</li><li>c</li></ol>");

    l.reverse().unwrap();
    assert_eq!(dom.inner_html(root), "<ol><li>c</li><li>b</li><li>a</li></ol>");

    l.truncate(1).unwrap();
    assert_eq!(dom.inner_html(root), "<ol><li>c</li></ol>");
}

#[test]
fn test_loops_beside_each_other() {
    let d = data(json!({"a": [1], "b": [2]}));
    let (dom, root, _i) = mount("`<p>${this.a.map(x => `<i>${x}</i>`)}|${this.b.map(x => `<u>${x}</u>`)}</p>`", &d);
    d.get("a").as_object().unwrap().push(vec![Value::Number(3.0)]).unwrap();
    d.get("b").as_object().unwrap().unshift(vec![Value::Number(0.0)]).unwrap();
    assert_eq!(dom.inner_html(root), "<p><i>1</i><i>3</i>|<u>0</u><u>2</u></p>");

    d.get("a").as_object().unwrap().shift().unwrap();
    d.get("b").as_object().unwrap().push(vec![Value::Number(9.0)]).unwrap();
    assert_eq!(dom.inner_html(root), "<p><i>3</i>|<u>0</u><u>2</u><u>9</u></p>");
}

#[test]
fn test_evaluation_errors_propagate() {
    let d = data(json!({}));
    let template = Template::compile("`<p>${this.missing.name}</p>`", &CompileOptions::default()).unwrap();
    let dom = Dom::new();
    let err = template.instantiate(&d, &dom).apply(NodeId::NONE, None).err().unwrap();
    assert!(matches!(err, EvalError::PropertyOfNullish { .. }));
    assert_eq!(err.to_string(), "cannot read `name` of undefined");
}

#[test]
fn test_failing_patch_reaches_the_writer() {
    let d = data(json!({"o": {"v": 1}}));
    let (_dom, _root, _i) = mount("`<p>${this.o.v}</p>`", &d);
    let err = d.set("o", Value::Null).unwrap_err();
    assert_eq!(err.path(), "o");
}
