//! tree-sitter front end
//!
//! tree-sitter never fails outright on bad input; it inserts ERROR and
//! MISSING nodes instead. [`parse_source`] turns such a tree into a
//! [`ParseError`] so callers can branch on a plain `Result`.

use crate::error::ParseError;
use crate::language::SourceLanguage;
use std::ops::Range;
use tree_sitter::{Node, Parser, Tree};

/// Name of the global output object whose calls are migrated
pub const OUTPUT_OBJECT: &str = "console";

/// Output methods tracked on the global output object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OutputMethod {
    /// `console.log`
    Log,
    /// `console.info`
    Info,
    /// `console.warn`
    Warn,
    /// `console.error`
    Error,
    /// `console.debug`
    Debug,
}

impl OutputMethod {
    /// Every tracked method
    pub const ALL: [OutputMethod; 5] = [
        OutputMethod::Log,
        OutputMethod::Info,
        OutputMethod::Warn,
        OutputMethod::Error,
        OutputMethod::Debug,
    ];

    /// Method name as written in source
    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            OutputMethod::Log => "log",
            OutputMethod::Info => "info",
            OutputMethod::Warn => "warn",
            OutputMethod::Error => "error",
            OutputMethod::Debug => "debug",
        }
    }

    /// Parse method name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().find(|m| m.name() == name).copied()
    }

    /// Component-logger method the call is rewritten to
    #[inline]
    #[must_use]
    pub fn logger_level(&self) -> &'static str {
        match self {
            OutputMethod::Log | OutputMethod::Info => "info",
            OutputMethod::Warn => "warn",
            OutputMethod::Error => "error",
            OutputMethod::Debug => "debug",
        }
    }

    /// Pattern label recorded in migration records
    #[inline]
    #[must_use]
    pub fn pattern(&self) -> String {
        format!("{OUTPUT_OBJECT}.{}", self.name())
    }
}

/// A located `object.property(...)` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberCall {
    /// Property (method) name
    pub property: String,
    /// Byte range of `object.property`
    pub callee: Range<usize>,
    /// Byte offset just after the opening parenthesis
    pub args_open: usize,
    /// Source text of each argument
    pub arguments: Vec<String>,
    /// 1-based line
    pub line: usize,
    /// 1-based column
    pub column: usize,
}

/// A located direct-output invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    /// Tracked method
    pub method: OutputMethod,
    /// Call location and arguments
    pub call: MemberCall,
}

/// Resolved import of the component-logger symbol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRef {
    /// Module specifier as written (without quotes)
    pub specifier: String,
    /// 1-based line of the declaration
    pub line: usize,
}

/// Parse source text into a tree, rejecting trees that contain errors
///
/// # Errors
/// - `ParseError::GrammarUnavailable` if the grammar cannot be loaded
/// - `ParseError::NoTree` if the parser gives up
/// - `ParseError::Syntax` at the first ERROR or MISSING node
pub fn parse_source(content: &str, language: SourceLanguage) -> Result<Tree, ParseError> {
    let mut parser = new_parser(language)?;
    let tree = parser.parse(content, None).ok_or(ParseError::NoTree)?;

    let root = tree.root_node();
    if root.has_error() {
        return Err(first_error(root).map_or_else(
            || ParseError::syntax(1, 1, "unrecoverable syntax"),
            |node| {
                let pos = node.start_position();
                let message = if node.is_missing() {
                    format!("missing '{}'", node.kind())
                } else {
                    "unexpected input".to_string()
                };
                ParseError::syntax(pos.row + 1, pos.column + 1, message)
            },
        ));
    }

    Ok(tree)
}

/// Check that a grammar loads; run as an INIT prerequisite
///
/// # Errors
/// Returns `ParseError::GrammarUnavailable` when the grammar ABI is incompatible.
pub fn check_grammar(language: SourceLanguage) -> Result<(), ParseError> {
    new_parser(language).map(|_| ())
}

fn new_parser(language: SourceLanguage) -> Result<Parser, ParseError> {
    let mut parser = Parser::new();
    parser
        .set_language(&language.grammar())
        .map_err(|e| ParseError::GrammarUnavailable {
            language: language.name(),
            message: e.to_string(),
        })?;
    Ok(parser)
}

fn first_error(root: Node<'_>) -> Option<Node<'_>> {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            return Some(node);
        }
        if node.has_error() {
            let mut cursor = node.walk();
            let children: Vec<_> = node.children(&mut cursor).collect();
            // reversed so the leftmost child is examined first
            stack.extend(children.into_iter().rev());
        }
    }
    None
}

/// Pre-order traversal over every node of a tree
pub fn visit<'t>(tree: &'t Tree, mut f: impl FnMut(Node<'t>)) {
    let mut cursor = tree.walk();
    loop {
        f(cursor.node());
        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return;
            }
        }
    }
}

fn has_child_kind(node: Node<'_>, kind: &str) -> bool {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).any(|c| c.kind() == kind);
    found
}

/// `?.` between two sibling nodes; the grammar does not always expose it as a child
fn has_optional_token(source: &str, from: usize, to: usize) -> bool {
    source.get(from..to).is_some_and(|gap| gap.contains("?."))
}

fn text<'s>(node: Node<'_>, source: &'s str) -> &'s str {
    source.get(node.byte_range()).unwrap_or_default()
}

/// Match `object.property(args)` with a plain identifier object
fn member_call(node: Node<'_>, source: &str, object_name: &str) -> Option<MemberCall> {
    if node.kind() != "call_expression" || has_child_kind(node, "optional_chain") {
        return None;
    }
    let callee = node.child_by_field_name("function")?;
    if callee.kind() != "member_expression" || has_child_kind(callee, "optional_chain") {
        return None;
    }
    let object = callee.child_by_field_name("object")?;
    let property = callee.child_by_field_name("property")?;
    if object.kind() != "identifier"
        || property.kind() != "property_identifier"
        || text(object, source) != object_name
    {
        return None;
    }
    let args = node.child_by_field_name("arguments")?;
    if args.kind() != "arguments"
        || has_optional_token(source, object.end_byte(), property.start_byte())
        || has_optional_token(source, callee.end_byte(), args.start_byte())
    {
        return None;
    }

    let mut cursor = args.walk();
    let arguments = args
        .named_children(&mut cursor)
        .filter(|a| a.kind() != "comment")
        .map(|a| text(a, source).to_string())
        .collect();

    let pos = node.start_position();
    Some(MemberCall {
        property: text(property, source).to_string(),
        callee: callee.byte_range(),
        args_open: args.start_byte() + 1,
        arguments,
        line: pos.row + 1,
        column: pos.column + 1,
    })
}

/// Locate every direct-output call site in a tree
#[must_use]
pub fn find_call_sites(tree: &Tree, source: &str) -> Vec<CallSite> {
    let mut sites = Vec::new();
    visit(tree, |node| {
        if let Some(call) = member_call(node, source, OUTPUT_OBJECT) {
            if let Some(method) = OutputMethod::from_name(&call.property) {
                sites.push(CallSite { method, call });
            }
        }
    });
    sites
}

/// Locate every call made on the component-logger symbol
#[must_use]
pub fn find_logger_calls(tree: &Tree, source: &str, symbol: &str) -> Vec<MemberCall> {
    let mut calls = Vec::new();
    visit(tree, |node| {
        if let Some(call) = member_call(node, source, symbol) {
            calls.push(call);
        }
    });
    calls
}

/// Find an `import { symbol } from '...'` or `const { symbol } = require('...')`
#[must_use]
pub fn find_logger_import(tree: &Tree, source: &str, symbol: &str) -> Option<ImportRef> {
    let mut found = None;
    visit(tree, |node| {
        if found.is_some() {
            return;
        }
        found = match node.kind() {
            "import_statement" => es_import(node, source, symbol),
            "variable_declarator" => require_import(node, source, symbol),
            _ => None,
        };
    });
    found
}

fn binds_symbol(node: Node<'_>, source: &str, symbol: &str) -> bool {
    let mut stack = vec![node];
    while let Some(n) = stack.pop() {
        if matches!(n.kind(), "identifier" | "shorthand_property_identifier_pattern")
            && text(n, source) == symbol
        {
            return true;
        }
        let mut cursor = n.walk();
        stack.extend(n.children(&mut cursor));
    }
    false
}

fn unquote(literal: &str) -> String {
    literal
        .trim_matches(|c| c == '\'' || c == '"' || c == '`')
        .to_string()
}

fn es_import(node: Node<'_>, source: &str, symbol: &str) -> Option<ImportRef> {
    let mut cursor = node.walk();
    let clause = node
        .children(&mut cursor)
        .find(|c| c.kind() == "import_clause")?;
    if !binds_symbol(clause, source, symbol) {
        return None;
    }
    let specifier = node.child_by_field_name("source")?;
    Some(ImportRef {
        specifier: unquote(text(specifier, source)),
        line: node.start_position().row + 1,
    })
}

fn require_import(node: Node<'_>, source: &str, symbol: &str) -> Option<ImportRef> {
    let name = node.child_by_field_name("name")?;
    let value = node.child_by_field_name("value")?;
    if value.kind() != "call_expression" {
        return None;
    }
    let function = value.child_by_field_name("function")?;
    if text(function, source) != "require" || !binds_symbol(name, source, symbol) {
        return None;
    }
    let args = value.child_by_field_name("arguments")?;
    let mut cursor = args.walk();
    let first = args.named_children(&mut cursor).next()?;
    if first.kind() != "string" {
        return None;
    }
    Some(ImportRef {
        specifier: unquote(text(first, source)),
        line: node.start_position().row + 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(src: &str) -> Tree {
        parse_source(src, SourceLanguage::TypeScript).unwrap()
    }

    #[test]
    fn parses_typed_source() {
        let src = "interface A { x: number }\nconst a: A = { x: 1 };\nconsole.log(a.x as number);\n";
        let tree = ts(src);
        assert_eq!(find_call_sites(&tree, src).len(), 1);
    }

    #[test]
    fn parses_markup_with_tsx() {
        let src = "const el = <div onClick={() => console.warn('x')}>hi</div>;\n";
        let tree = parse_source(src, SourceLanguage::Tsx).unwrap();
        let sites = find_call_sites(&tree, src);
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].method, OutputMethod::Warn);
    }

    #[test]
    fn unterminated_string_is_syntax_error() {
        let err = parse_source("const s = 'oops;\nconsole.log(s);\n", SourceLanguage::TypeScript)
            .unwrap_err();
        assert!(err.is_syntax(), "{err}");
    }

    #[test]
    fn call_site_positions_and_arguments() {
        let src = "function f() {\n  console.error('failed', err, { code });\n}\n";
        let tree = ts(src);
        let sites = find_call_sites(&tree, src);
        assert_eq!(sites.len(), 1);
        let call = &sites[0].call;
        assert_eq!((call.line, call.column), (2, 3));
        assert_eq!(call.arguments, vec!["'failed'", "err", "{ code }"]);
        assert_eq!(&src[call.callee.clone()], "console.error");
    }

    #[test]
    fn ignores_untracked_shapes() {
        let src = "console.table(x);\nconsole?.log(x);\nconsole['log'](x);\nlogger.log(x);\nconsole.log?.(x);\n";
        let tree = ts(src);
        assert!(find_call_sites(&tree, src).is_empty());
    }

    #[test]
    fn optional_call_tokens_are_detected_between_siblings() {
        let src = "console.log?.(x);\nconsole.log (x);\n";
        let tree = ts(src);
        let sites = find_call_sites(&tree, src);
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].call.line, 2);
    }

    #[test]
    fn finds_es_import() {
        let src = "import { a, ComponentLogger } from \"../utils/component-logger\";\n";
        let tree = ts(src);
        let import = find_logger_import(&tree, src, "ComponentLogger").unwrap();
        assert_eq!(import.specifier, "../utils/component-logger");
        assert_eq!(import.line, 1);
    }

    #[test]
    fn finds_require_import() {
        let src = "const { ComponentLogger } = require('./utils/component-logger');\n";
        let tree = parse_source(src, SourceLanguage::Tsx).unwrap();
        let import = find_logger_import(&tree, src, "ComponentLogger").unwrap();
        assert_eq!(import.specifier, "./utils/component-logger");
    }

    #[test]
    fn unrelated_import_is_not_logger_import() {
        let src = "import { Logger } from './logger';\n";
        assert!(find_logger_import(&ts(src), src, "ComponentLogger").is_none());
    }

    #[test]
    fn logger_calls_are_located() {
        let src = "ComponentLogger.info('Core', 'started', { correlationId });\n";
        let calls = find_logger_calls(&ts(src), src, "ComponentLogger");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].property, "info");
        assert_eq!(calls[0].arguments.len(), 3);
    }

    #[test]
    fn bundled_grammars_load() {
        assert!(check_grammar(SourceLanguage::TypeScript).is_ok());
        assert!(check_grammar(SourceLanguage::Tsx).is_ok());
    }
}
