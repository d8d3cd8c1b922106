//! Syntax-tree checks for Python sources

use tree_sitter::{Node, Parser};

use crate::core::ValidationError;

/// Modules that give access to processes, files, the network or the interpreter
pub const DENIED_IMPORTS: &[&str] = &[
    "os",
    "subprocess",
    "sys",
    "socket",
    "pathlib",
    "shutil",
    "glob",
    "tempfile",
    "urllib",
    "requests",
    "http",
    "ftplib",
    "smtplib",
    "pickle",
    "marshal",
    "ctypes",
    "multiprocessing",
    "importlib",
    "builtins",
    "eval",
    "exec",
    "compile",
    "__import__",
];

/// Builtins that read files or stdin, exit the interpreter, or expose scopes
pub const DENIED_CALLS: &[&str] = &[
    "open",
    "file",
    "input",
    "raw_input",
    "exit",
    "quit",
    "help",
    "dir",
    "vars",
    "locals",
    "globals",
    "eval",
    "exec",
    "compile",
    "__import__",
    "getattr",
    "setattr",
    "delattr",
    "breakpoint",
];

/// Reflective attributes used to climb out of restricted scopes
pub const DENIED_ATTRIBUTES: &[&str] = &[
    "__import__",
    "__globals__",
    "__locals__",
    "__code__",
    "__func__",
    "__self__",
    "__class__",
    "__bases__",
    "__subclasses__",
    "__mro__",
    "__dict__",
    "__builtins__",
];

/// Names denied even as bare references
const DENIED_IDENTIFIERS: &[&str] = &["__builtins__", "__import__"];

/// Parse `source` and reject denied imports, calls and attribute accesses.
/// Nodes are visited in document order so the first offending construct is reported.
pub fn check(source: &str) -> Result<(), ValidationError> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| ValidationError::SyntaxInvalid(format!("parser unavailable: {}", e)))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| ValidationError::SyntaxInvalid("source could not be parsed".into()))?;

    let root = tree.root_node();
    if root.has_error() {
        return Err(ValidationError::SyntaxInvalid(describe_syntax_error(root)));
    }

    let bytes = source.as_bytes();
    let mut stack = vec![root];

    while let Some(node) = stack.pop() {
        check_node(node, bytes)?;

        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }

    Ok(())
}

fn check_node(node: Node, src: &[u8]) -> Result<(), ValidationError> {
    match node.kind() {
        // Python 2 forms the grammar still accepts; python3 rejects them
        "print_statement" | "exec_statement" => {
            let pos = node.start_position();
            let statement = node.kind().trim_end_matches("_statement");
            return Err(ValidationError::SyntaxInvalid(format!(
                "Python 2 {} statement at line {}, column {}",
                statement,
                pos.row + 1,
                pos.column + 1
            )));
        }
        "import_statement" => {
            let mut cursor = node.walk();
            for name in node.children_by_field_name("name", &mut cursor) {
                let module = imported_name(name, src);
                if is_denied_module(module) {
                    return Err(denied("import", module));
                }
            }
        }
        "import_from_statement" => {
            if let Some(module) = node.child_by_field_name("module_name") {
                let module = text(module, src).trim_start_matches('.');
                if is_denied_module(module) {
                    return Err(denied("import from", module));
                }
            }
            let mut cursor = node.walk();
            for name in node.children_by_field_name("name", &mut cursor) {
                let imported = imported_name(name, src);
                if DENIED_IMPORTS.contains(&imported) || DENIED_CALLS.contains(&imported) {
                    return Err(denied("import", imported));
                }
            }
        }
        "call" => {
            if let Some(function) = node.child_by_field_name("function") {
                match function.kind() {
                    "identifier" => {
                        let name = text(function, src);
                        if DENIED_CALLS.contains(&name) {
                            return Err(denied("call to", name));
                        }
                    }
                    "attribute" => {
                        if let Some(attr) = function.child_by_field_name("attribute") {
                            let name = text(attr, src);
                            if DENIED_ATTRIBUTES.contains(&name) {
                                return Err(denied("call to attribute", name));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        "attribute" => {
            if let Some(attr) = node.child_by_field_name("attribute") {
                let name = text(attr, src);
                if DENIED_ATTRIBUTES.contains(&name) {
                    return Err(denied("attribute", name));
                }
            }
        }
        "identifier" => {
            let name = text(node, src);
            if DENIED_IDENTIFIERS.contains(&name) {
                return Err(denied("reference to", name));
            }
        }
        _ => {}
    }
    Ok(())
}

/// Name being imported, ignoring any `as` alias
fn imported_name<'a>(node: Node, src: &'a [u8]) -> &'a str {
    if node.kind() == "aliased_import" {
        if let Some(name) = node.child_by_field_name("name") {
            return text(name, src);
        }
    }
    text(node, src)
}

fn is_denied_module(module: &str) -> bool {
    let root = module.split('.').next().unwrap_or(module);
    DENIED_IMPORTS.contains(&module) || DENIED_IMPORTS.contains(&root)
}

fn text<'a>(node: Node, src: &'a [u8]) -> &'a str {
    node.utf8_text(src).unwrap_or("")
}

fn denied(what: &str, name: &str) -> ValidationError {
    ValidationError::CapabilityDenied(format!("{} '{}'", what, name))
}

/// Locate the first error or missing node and describe where it is
fn describe_syntax_error(root: Node) -> String {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            let pos = node.start_position();
            let what = if node.is_missing() {
                format!("missing {}", node.kind())
            } else {
                "invalid syntax".to_string()
            };
            return format!("{} at line {}, column {}", what, pos.row + 1, pos.column + 1);
        }
        if !node.has_error() {
            continue;
        }
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
    "invalid syntax".to_string()
}
