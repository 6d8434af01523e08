//! Import declarations for the component-logger symbol

use regex::Regex;
use std::path::{Component, Path, PathBuf};

/// Module specifier from `file` to `module` (extension-less, `./` or `../` prefixed)
///
/// Both paths must share a base (both absolute, or both relative to the same
/// root). Purely lexical: nothing is read from disk.
#[must_use]
pub fn relative_specifier(file: &Path, module: &Path) -> String {
    let from_dir = file.parent().unwrap_or_else(|| Path::new(""));
    let from: Vec<Component<'_>> = lexical(from_dir);
    let to: Vec<Component<'_>> = lexical(module);

    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<String> = Vec::new();
    parts.extend(std::iter::repeat("..".to_string()).take(from.len() - common));
    parts.extend(
        to[common..]
            .iter()
            .map(|c| c.as_os_str().to_string_lossy().into_owned()),
    );

    let mut spec = parts.join("/");
    if let Some(stripped) = strip_source_extension(&spec) {
        spec = stripped;
    }
    if spec.starts_with("..") {
        spec
    } else {
        format!("./{spec}")
    }
}

fn lexical(path: &Path) -> Vec<Component<'_>> {
    let mut out: Vec<Component<'_>> = Vec::new();
    for c in path.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.last(), Some(Component::Normal(_))) {
                    out.pop();
                } else {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

fn strip_source_extension(spec: &str) -> Option<String> {
    const EXTS: &[&str] = &[".ts", ".tsx", ".js", ".jsx", ".mjs", ".cjs"];
    EXTS.iter()
        .find_map(|ext| spec.strip_suffix(ext))
        .map(str::to_string)
}

/// Import declaration line for `symbol` from `specifier`
#[must_use]
pub fn import_line(symbol: &str, specifier: &str) -> String {
    format!("import {{ {symbol} }} from '{specifier}';\n")
}

/// Insert an import line at the top of `content`, after a shebang if present
#[must_use]
pub fn prepend_import(content: &str, line: &str) -> String {
    let mut out = String::with_capacity(content.len() + line.len());
    if content.starts_with("#!") {
        let split = content.find('\n').map_or(content.len(), |i| i + 1);
        out.push_str(&content[..split]);
        if split == content.len() && !content.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(line);
        out.push_str(&content[split..]);
    } else {
        out.push_str(line);
        out.push_str(content);
    }
    out
}

/// Textual matcher for imports of one symbol, usable on unparseable files
#[derive(Debug, Clone)]
pub struct ImportMatcher {
    es: Regex,
    require: Regex,
}

impl ImportMatcher {
    /// Build matchers for `symbol`
    ///
    /// # Panics
    /// Never: the symbol is escaped before compilation.
    #[must_use]
    pub fn new(symbol: &str) -> Self {
        let sym = regex::escape(symbol);
        let es = Regex::new(&format!(
            r#"import\s+(?:type\s+)?(?:[\w$]+\s*,\s*)?\{{[^}}]*\b{sym}\b[^}}]*\}}\s*from\s*['"]([^'"]+)['"]"#
        ))
        .expect("escaped import pattern is valid");
        let require = Regex::new(&format!(
            r#"\{{[^}}]*\b{sym}\b[^}}]*\}}\s*=\s*require\(\s*['"]([^'"]+)['"]\s*\)"#
        ))
        .expect("escaped require pattern is valid");
        Self { es, require }
    }

    /// Module specifier of the first import of the symbol, if any
    #[must_use]
    pub fn specifier(&self, content: &str) -> Option<String> {
        self.es
            .captures(content)
            .or_else(|| self.require.captures(content))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// Whether content imports the symbol
    #[inline]
    #[must_use]
    pub fn is_imported(&self, content: &str) -> bool {
        self.specifier(content).is_some()
    }
}

/// Candidate files an import specifier may resolve to
#[must_use]
pub fn resolution_candidates(importer: &Path, specifier: &str) -> Vec<PathBuf> {
    let base = importer
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(specifier);
    let mut candidates = vec![base.clone()];
    for ext in ["ts", "tsx", "js", "jsx", "mjs", "cjs"] {
        let mut with_ext = base.clone().into_os_string();
        with_ext.push(".");
        with_ext.push(ext);
        candidates.push(PathBuf::from(with_ext));
        candidates.push(base.join(format!("index.{ext}")));
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn specifier_to_parent_directory() {
        let spec = relative_specifier(
            Path::new("/repo/src/storage/sqlite.ts"),
            Path::new("/repo/src/utils/component-logger"),
        );
        assert_eq!(spec, "../utils/component-logger");
    }

    #[test]
    fn specifier_in_same_tree() {
        let spec = relative_specifier(
            Path::new("/repo/src/index.ts"),
            Path::new("/repo/src/utils/component-logger.ts"),
        );
        assert_eq!(spec, "./utils/component-logger");
    }

    #[test]
    fn specifier_from_deep_file() {
        let spec = relative_specifier(
            Path::new("/repo/src/cli/commands/sub/run.ts"),
            Path::new("/repo/src/utils/component-logger"),
        );
        assert_eq!(spec, "../../../utils/component-logger");
    }

    #[test]
    fn specifier_normalizes_dots() {
        let spec = relative_specifier(
            Path::new("/repo/./src/a/../b/x.ts"),
            Path::new("/repo/src/utils/component-logger"),
        );
        assert_eq!(spec, "../utils/component-logger");
    }

    #[test]
    fn prepend_plain() {
        let out = prepend_import("const a = 1;\n", "import { L } from './l';\n");
        assert_eq!(out, "import { L } from './l';\nconst a = 1;\n");
    }

    #[test]
    fn prepend_after_shebang() {
        let out = prepend_import("#!/usr/bin/env node\nrun();\n", "import { L } from './l';\n");
        assert_eq!(out, "#!/usr/bin/env node\nimport { L } from './l';\nrun();\n");
    }

    #[test]
    fn prepend_after_bare_shebang() {
        let out = prepend_import("#!/usr/bin/env node", "import { L } from './l';\n");
        assert_eq!(out, "#!/usr/bin/env node\nimport { L } from './l';\n");
    }

    #[test]
    fn textual_import_matching() {
        let m = ImportMatcher::new("ComponentLogger");
        assert_eq!(
            m.specifier("import { x, ComponentLogger as CL } from \"../utils/component-logger\";"),
            Some("../utils/component-logger".to_string())
        );
        assert_eq!(
            m.specifier("const { ComponentLogger } = require('./component-logger');"),
            Some("./component-logger".to_string())
        );
        assert!(!m.is_imported("import { ComponentLoggerFactory } from './f';"));
        assert!(!m.is_imported("ComponentLogger.info('Core', 'x');"));
    }

    #[test]
    fn candidates_cover_extensions_and_index() {
        let c = resolution_candidates(Path::new("/r/src/a.ts"), "./utils/component-logger");
        assert!(c.contains(&PathBuf::from("/r/src/./utils/component-logger.ts")));
        assert!(c.contains(&PathBuf::from("/r/src/./utils/component-logger/index.js")));
    }
}
