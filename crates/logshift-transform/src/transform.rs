//! Call-site transformer
//!
//! Rewrites `console.<method>(args)` into
//! `<Symbol>.<level>("<Component>", args)` and adds the logger import when a
//! file gained its first tagged call.
//!
//! # Strategies
//!
//! ```text
//! parse_source ──Ok(tree)──▶ structural rewrite ──▶ re-parse guard ──▶ output
//!      │
//!      └──Err(Syntax)──▶ textual rewrite (ordered regexes) ──▶ output + warnings
//! ```
//!
//! The transformer never touches the filesystem: callers decide whether and
//! when the returned content is persisted.

use crate::component::ComponentTag;
use crate::error::{ParseError, TransformError, TransformResult};
use crate::imports::{import_line, prepend_import, relative_specifier, ImportMatcher};
use crate::language::SourceLanguage;
use crate::parser::{find_call_sites, find_logger_import, parse_source, OutputMethod};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tree_sitter::Tree;

/// Default component-logger symbol
pub const DEFAULT_LOGGER_SYMBOL: &str = "ComponentLogger";

/// How a file was rewritten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Syntax-tree rewrite
    Structural,
    /// Regex rewrite of an unparseable file
    Textual,
}

/// Result of transforming one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutput {
    /// Rewritten source
    pub content: String,
    /// Number of call sites rewritten
    pub replacements: usize,
    /// Distinct source patterns rewritten (`console.log`, ...)
    pub patterns: Vec<String>,
    /// Strategy that produced `content`
    pub strategy: Strategy,
    /// Whether an import declaration was inserted
    pub import_added: bool,
    /// Whether `content` parses cleanly
    pub reparses: bool,
    /// Non-fatal findings (fallback used, residual malformation)
    pub warnings: Vec<String>,
}

impl TransformOutput {
    fn unchanged(content: &str, strategy: Strategy) -> Self {
        Self {
            content: content.to_string(),
            replacements: 0,
            patterns: Vec::new(),
            strategy,
            import_added: false,
            reparses: strategy == Strategy::Structural,
            warnings: Vec::new(),
        }
    }

    /// Whether the transform produced new content
    #[inline]
    #[must_use]
    pub fn is_rewrite(&self) -> bool {
        self.replacements > 0
    }
}

#[derive(Debug, Clone)]
struct FallbackRule {
    method: OutputMethod,
    empty: Regex,
    with_args: Regex,
}

impl FallbackRule {
    fn new(method: OutputMethod) -> Self {
        let name = method.name();
        let empty = Regex::new(&format!(
            r"(?m)(^|[^\w$.])console\s*\.\s*{name}\s*\(\s*\)"
        ))
        .expect("fallback pattern is valid");
        let with_args = Regex::new(&format!(r"(?m)(^|[^\w$.])console\s*\.\s*{name}\s*\("))
            .expect("fallback pattern is valid");
        Self {
            method,
            empty,
            with_args,
        }
    }
}

/// Rewrites direct output calls into component-tagged logger calls
#[derive(Debug, Clone)]
pub struct Transformer {
    symbol: String,
    logger_module: PathBuf,
    imports: ImportMatcher,
    fallback: Vec<FallbackRule>,
}

#[derive(Debug)]
struct Edit {
    range: Range<usize>,
    text: String,
}

impl Transformer {
    /// Create transformer for `symbol` exported by `logger_module`
    ///
    /// `logger_module` must be expressed against the same base as the file
    /// paths later passed to [`Transformer::transform`] (usually both absolute).
    #[must_use]
    pub fn new(symbol: impl Into<String>, logger_module: impl Into<PathBuf>) -> Self {
        let symbol = symbol.into();
        // errors and warnings first so the most important calls are rewritten
        // even if a later rule misbehaves on odd input
        let order = [
            OutputMethod::Error,
            OutputMethod::Warn,
            OutputMethod::Info,
            OutputMethod::Debug,
            OutputMethod::Log,
        ];
        Self {
            imports: ImportMatcher::new(&symbol),
            fallback: order.into_iter().map(FallbackRule::new).collect(),
            logger_module: logger_module.into(),
            symbol,
        }
    }

    /// Logger symbol written into call sites
    #[inline]
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Logger module location
    #[inline]
    #[must_use]
    pub fn logger_module(&self) -> &Path {
        &self.logger_module
    }

    /// Transform one file's content
    ///
    /// Syntax errors route to the textual strategy and never surface as `Err`.
    ///
    /// # Errors
    /// - `TransformError::BrokeSyntax` if a structural rewrite does not re-parse
    /// - `TransformError::Parser` if the grammar cannot be loaded
    pub fn transform(
        &self,
        content: &str,
        component: ComponentTag,
        file_path: &Path,
    ) -> TransformResult<TransformOutput> {
        let language = SourceLanguage::from_path(file_path).unwrap_or(SourceLanguage::Tsx);

        parse_source(content, language).map_or_else(
            |err| self.recover(err, content, component, file_path, language),
            |tree| self.structural(&tree, content, component, file_path, language),
        )
    }

    fn recover(
        &self,
        err: ParseError,
        content: &str,
        component: ComponentTag,
        file_path: &Path,
        language: SourceLanguage,
    ) -> TransformResult<TransformOutput> {
        if !err.is_syntax() {
            return Err(err.into());
        }
        tracing::warn!(
            file = %file_path.display(),
            error = %err,
            "structural parse failed; using textual fallback"
        );
        Ok(self.textual(content, component, file_path, language, &err))
    }

    fn tag_literal(component: ComponentTag) -> String {
        format!("\"{}\"", component.name())
    }

    fn import_for(&self, file_path: &Path) -> String {
        import_line(
            &self.symbol,
            &relative_specifier(file_path, &self.logger_module),
        )
    }

    fn structural(
        &self,
        tree: &Tree,
        content: &str,
        component: ComponentTag,
        file_path: &Path,
        language: SourceLanguage,
    ) -> TransformResult<TransformOutput> {
        let sites = find_call_sites(tree, content);
        if sites.is_empty() {
            return Ok(TransformOutput::unchanged(content, Strategy::Structural));
        }

        let tag = Self::tag_literal(component);
        let mut patterns = BTreeSet::new();
        let mut edits = Vec::with_capacity(sites.len() * 2);

        for site in &sites {
            patterns.insert(site.method.pattern());
            edits.push(Edit {
                range: site.call.callee.clone(),
                text: format!("{}.{}", self.symbol, site.method.logger_level()),
            });
            let inserted = if site.call.arguments.is_empty() {
                tag.clone()
            } else {
                format!("{tag}, ")
            };
            edits.push(Edit {
                range: site.call.args_open..site.call.args_open,
                text: inserted,
            });
        }

        let mut rewritten = apply_edits(content, edits);

        let import_added = find_logger_import(tree, content, &self.symbol).is_none();
        if import_added {
            rewritten = prepend_import(&rewritten, &self.import_for(file_path));
        }

        if let Err(source) = parse_source(&rewritten, language) {
            return Err(TransformError::BrokeSyntax {
                path: file_path.to_path_buf(),
                source,
            });
        }

        tracing::debug!(
            file = %file_path.display(),
            component = %component,
            replacements = sites.len(),
            import_added,
            "structural rewrite"
        );

        Ok(TransformOutput {
            content: rewritten,
            replacements: sites.len(),
            patterns: patterns.into_iter().collect(),
            strategy: Strategy::Structural,
            import_added,
            reparses: true,
            warnings: Vec::new(),
        })
    }

    fn textual(
        &self,
        content: &str,
        component: ComponentTag,
        file_path: &Path,
        language: SourceLanguage,
        cause: &ParseError,
    ) -> TransformOutput {
        let tag = Self::tag_literal(component);
        // `$` is legal in identifiers but special in replacement templates
        let symbol = self.symbol.replace('$', "$$");
        let mut out = content.to_string();
        let mut replacements = 0;
        let mut patterns = BTreeSet::new();

        for rule in &self.fallback {
            let level = rule.method.logger_level();
            let empty_repl = format!("${{1}}{symbol}.{level}({tag})");
            let args_repl = format!("${{1}}{symbol}.{level}({tag}, ");

            for (re, repl) in [(&rule.empty, &empty_repl), (&rule.with_args, &args_repl)] {
                // nested calls share a delimiter with their parent match, so
                // repeat until the pattern is exhausted
                loop {
                    let hits = re.find_iter(&out).count();
                    if hits == 0 {
                        break;
                    }
                    replacements += hits;
                    patterns.insert(rule.method.pattern());
                    out = re.replace_all(&out, repl.as_str()).into_owned();
                }
            }
        }

        let mut import_added = false;
        if replacements > 0 && !self.imports.is_imported(content) {
            out = prepend_import(&out, &self.import_for(file_path));
            import_added = true;
        }

        let mut warnings = vec![format!(
            "{}: {cause}; textual fallback applied",
            file_path.display()
        )];
        let reparses = parse_source(&out, language).is_ok();
        if !reparses {
            warnings.push(format!(
                "{}: source was malformed before migration and remains unparseable",
                file_path.display()
            ));
        }

        TransformOutput {
            content: out,
            replacements,
            patterns: patterns.into_iter().collect(),
            strategy: Strategy::Textual,
            import_added,
            reparses,
            warnings,
        }
    }
}

impl Default for Transformer {
    fn default() -> Self {
        Self::new(DEFAULT_LOGGER_SYMBOL, "src/utils/component-logger")
    }
}

/// Apply non-overlapping edits back to front
fn apply_edits(content: &str, mut edits: Vec<Edit>) -> String {
    // later starts first; on equal starts the wider edit goes first so a
    // zero-width insertion lands in front of it
    edits.sort_by(|a, b| {
        b.range
            .start
            .cmp(&a.range.start)
            .then(b.range.end.cmp(&a.range.end))
    });
    let mut out = content.to_string();
    for edit in edits {
        out.replace_range(edit.range, &edit.text);
    }
    out
}
