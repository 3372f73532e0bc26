//! Integration tests for the markup grammar and the structure helpers

use lumen_syntax::function::{arg_names, simple_map_expression};
use lumen_syntax::token::{join_leaves, significant, without_spaces};
use lumen_syntax::{lex_html, lex_js, parse_template_tokens, ArgName, LexError, LexOptions, Token};

fn assert_balanced(tokens: &[Token]) {
    for t in tokens {
        if let Some(children) = &t.tokens {
            let inner: String = children.iter().map(|c| c.text.as_str()).collect();
            assert_eq!(inner, t.text, "region text must equal its children");
            assert_balanced(children);
        }
    }
}

#[test]
fn test_round_trip_templates() {
    let sources = [
        "`a${1}b`",
        "<ul>${this.items.map(item => `<li class=\"${item.cls}\">${item.name}</li>`)}</ul>",
        "<input value=${this.value} ${this.attrs} onclick=${e => this.count++}>",
        "<!-- ${a} --><b>#{this.once}</b> $ # < \\` tail",
        "<p>${ {a: 1, b: {c: `x${2}`}}.a / 2 }</p>",
        "<div style='color: ${c}'>\n  line two\n</div>",
    ];
    for src in sources {
        let tokens = parse_template_tokens(src, &LexOptions::default()).unwrap();
        assert_eq!(join_leaves(&tokens), src);
        assert_balanced(&tokens);
    }
}

#[test]
fn test_round_trip_html_and_js() {
    let html = "<html><script>let re = /<\\/b>/g; x = a / b;</script><p a=\"1\">t</p></html>";
    let tokens = lex_html(html, &LexOptions::default()).unwrap();
    assert_eq!(join_leaves(&tokens), html);

    let js = "const f = (a, {b}) => {\n  // note\n  return `${a}${b}` + 0x1f + 1.5e3;\n}";
    let tokens = lex_js(js, &LexOptions::default()).unwrap();
    assert_eq!(join_leaves(&tokens), js);
    assert!(tokens.iter().any(|t| t.is_kind("comment")));
}

#[test]
fn test_mode_balance_example() {
    let tokens = parse_template_tokens("`a${1}b`", &LexOptions::default()).unwrap();
    let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
    assert_eq!(texts, ["`", "a", "${1}", "b", "`"]);
    let inner: Vec<&str> = tokens[2].children().iter().map(|t| t.text.as_str()).collect();
    assert_eq!(inner, ["${", "1", "}"]);
}

#[test]
fn test_strict_and_lenient_unknown() {
    let err = lex_js("a = 1 @ 2", &LexOptions::default()).unwrap_err();
    assert!(matches!(err, LexError::Unrecognized { line: 1, col: 7, .. }));

    let tokens = lex_js("a = 1 @@ 2", &LexOptions::lenient()).unwrap();
    let unknown: Vec<&Token> = tokens.iter().filter(|t| t.is_kind("unknown")).collect();
    assert_eq!(unknown.len(), 1);
    assert_eq!(unknown[0].text, "@@");
    assert_eq!(join_leaves(&tokens), "a = 1 @@ 2");
}

#[test]
fn test_loop_body_from_template() {
    let tokens = parse_template_tokens("${this.fruits.map(f => f)}", &LexOptions::default()).unwrap();
    let expr = tokens[0].children();
    // strip the `${` and `}` delimiters
    let body = without_spaces(&expr[1..expr.len() - 1]);
    let map = simple_map_expression(&body).unwrap();
    assert_eq!(map.params, vec![ArgName::Name("f".into())]);
}

#[test]
fn test_arg_names_from_parameter_tokens() {
    let tokens = significant(&lex_js("{a, b}={}, c", &LexOptions::default()).unwrap());
    let names = arg_names(&tokens).unwrap();
    assert_eq!(
        names,
        vec![
            ArgName::Object(vec![("a".into(), None), ("b".into(), None)]),
            ArgName::Name("c".into()),
        ]
    );
}
