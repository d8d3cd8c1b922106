//! Java entry-point class detection

use tree_sitter::{Node, Parser};

/// Class name used when no class declaration can be found
pub const DEFAULT_JAVA_ENTRY: &str = "Main";

/// Name of the class the source file must be named after.
///
/// Preference order: a public top-level class, then a top-level class that
/// declares `main`, then the first top-level class.
pub fn detect_java_entry(source: &str) -> String {
    let mut parser = Parser::new();
    if parser
        .set_language(&tree_sitter_java::LANGUAGE.into())
        .is_err()
    {
        return DEFAULT_JAVA_ENTRY.to_string();
    }
    let Some(tree) = parser.parse(source, None) else {
        return DEFAULT_JAVA_ENTRY.to_string();
    };

    let src = source.as_bytes();
    let root = tree.root_node();
    let mut cursor = root.walk();
    let classes: Vec<Node> = root
        .named_children(&mut cursor)
        .filter(|n| n.kind() == "class_declaration")
        .collect();

    classes
        .iter()
        .find(|c| is_public(**c, src))
        .or_else(|| classes.iter().find(|c| declares_main(**c, src)))
        .or_else(|| classes.first())
        .and_then(|c| c.child_by_field_name("name"))
        .and_then(|name| name.utf8_text(src).ok())
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_JAVA_ENTRY.to_string())
}

fn is_public(class: Node, src: &[u8]) -> bool {
    let mut cursor = class.walk();
    let found = class
        .children(&mut cursor)
        .filter(|n| n.kind() == "modifiers")
        .any(|m| has_modifier(m, "public", src));
    found
}

fn has_modifier(modifiers: Node, keyword: &str, src: &[u8]) -> bool {
    modifiers
        .utf8_text(src)
        .map(|text| text.split_whitespace().any(|w| w == keyword))
        .unwrap_or(false)
}

fn declares_main(class: Node, src: &[u8]) -> bool {
    let Some(body) = class.child_by_field_name("body") else {
        return false;
    };
    let mut cursor = body.walk();
    let found = body
        .named_children(&mut cursor)
        .filter(|n| n.kind() == "method_declaration")
        .any(|method| {
            let named_main = method
                .child_by_field_name("name")
                .and_then(|n| n.utf8_text(src).ok())
                == Some("main");
            let mut cursor = method.walk();
            let is_static = method
                .children(&mut cursor)
                .filter(|n| n.kind() == "modifiers")
                .any(|m| has_modifier(m, "static", src));
            named_main && is_static
        });
    found
}
