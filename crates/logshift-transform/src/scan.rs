//! Read-only scans over source text
//!
//! Used by post-condition rules and the validator. Each scan prefers the
//! syntax tree and falls back to a line-oriented regex when the file does
//! not parse.

use crate::language::SourceLanguage;
use crate::parser::{find_call_sites, find_logger_calls, parse_source, MemberCall};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

static OUTPUT_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)(?:^|[^\w$.])console\s*\.\s*(?:log|info|warn|error|debug)\s*\(")
        .expect("output call pattern is valid")
});

/// Cheap textual pre-check: could this file contain direct output calls?
///
/// May report calls inside strings or comments; never misses a real one.
#[inline]
#[must_use]
pub fn mentions_output_calls(content: &str) -> bool {
    OUTPUT_CALL.is_match(content)
}

/// Number of residual direct-output calls in a file
#[must_use]
pub fn count_output_calls(content: &str, path: &Path) -> usize {
    if !mentions_output_calls(content) {
        return 0;
    }
    let language = SourceLanguage::from_path(path).unwrap_or(SourceLanguage::Tsx);
    match parse_source(content, language) {
        Ok(tree) => find_call_sites(&tree, content).len(),
        Err(_) => OUTPUT_CALL.find_iter(content).count(),
    }
}

/// Calls made on the logger symbol, with their argument text
#[must_use]
pub fn logger_calls(content: &str, path: &Path, symbol: &str) -> Vec<MemberCall> {
    if !content.contains(symbol) {
        return Vec::new();
    }
    let language = SourceLanguage::from_path(path).unwrap_or(SourceLanguage::Tsx);
    match parse_source(content, language) {
        Ok(tree) => find_logger_calls(&tree, content, symbol),
        Err(_) => textual_logger_calls(content, symbol),
    }
}

fn textual_logger_calls(content: &str, symbol: &str) -> Vec<MemberCall> {
    let Ok(re) = Regex::new(&format!(
        r"(?:^|[^\w$.]){}\s*\.\s*([\w$]+)\s*\(",
        regex::escape(symbol)
    )) else {
        return Vec::new();
    };

    content
        .lines()
        .enumerate()
        .flat_map(|(idx, line)| {
            re.captures_iter(line)
                .filter_map(|c| {
                    let whole = c.get(0)?;
                    let property = c.get(1)?;
                    let rest = &line[whole.end()..];
                    Some(MemberCall {
                        property: property.as_str().to_string(),
                        callee: 0..0,
                        args_open: 0,
                        arguments: vec![rest.to_string()],
                        line: idx + 1,
                        column: whole.start() + 1,
                    })
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_structurally_when_parseable() {
        // the string literal is not a call
        let src = "const s = 'console.log(x)';\nconsole.warn(s);\n";
        assert!(mentions_output_calls(src));
        assert_eq!(count_output_calls(src, Path::new("a.ts")), 1);
    }

    #[test]
    fn counts_textually_when_broken() {
        let src = "let = ;\nconsole.warn(1);\nconsole.log(2);\n";
        assert_eq!(count_output_calls(src, Path::new("a.ts")), 2);
    }

    #[test]
    fn no_mention_short_circuits() {
        assert_eq!(count_output_calls("export {}\n", Path::new("a.ts")), 0);
    }

    #[test]
    fn logger_calls_fallback_captures_rest_of_line() {
        let src = "let = ;\nComponentLogger.error('Core', password);\n";
        let calls = logger_calls(src, Path::new("a.ts"), "ComponentLogger");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].property, "error");
        assert_eq!(calls[0].line, 2);
        assert!(calls[0].arguments[0].contains("password"));
    }
}
