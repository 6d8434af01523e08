//! Source languages understood by the parser front end

use std::path::Path;

/// Grammar used to parse a source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceLanguage {
    /// Plain TypeScript (`.ts`): allows `<T>expr` assertions, no markup
    TypeScript,
    /// TypeScript/JavaScript with embedded markup (`.tsx`, `.js`, `.jsx`, ...)
    Tsx,
}

impl SourceLanguage {
    /// Every extension the engine rewrites
    pub const EXTENSIONS: &'static [&'static str] = &["ts", "tsx", "mts", "cts", "js", "jsx", "mjs", "cjs"];

    /// Pick grammar for a path by extension
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "ts" | "mts" | "cts" => Some(SourceLanguage::TypeScript),
            "tsx" | "js" | "jsx" | "mjs" | "cjs" => Some(SourceLanguage::Tsx),
            _ => None,
        }
    }

    /// Human-readable name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            SourceLanguage::TypeScript => "typescript",
            SourceLanguage::Tsx => "tsx",
        }
    }

    /// tree-sitter grammar
    #[must_use]
    pub fn grammar(&self) -> tree_sitter::Language {
        match self {
            SourceLanguage::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            SourceLanguage::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
        }
    }
}

/// Whether the engine considers this path a rewritable source file
#[must_use]
pub fn is_source_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            SourceLanguage::EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
        && !is_declaration_file(path)
}

fn is_declaration_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(".d.ts"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_from_extension() {
        assert_eq!(
            SourceLanguage::from_path(Path::new("a/b.ts")),
            Some(SourceLanguage::TypeScript)
        );
        assert_eq!(
            SourceLanguage::from_path(Path::new("a/b.tsx")),
            Some(SourceLanguage::Tsx)
        );
        assert_eq!(
            SourceLanguage::from_path(Path::new("a/b.JS")),
            Some(SourceLanguage::Tsx)
        );
        assert_eq!(SourceLanguage::from_path(Path::new("a/b.rs")), None);
        assert_eq!(SourceLanguage::from_path(Path::new("Makefile")), None);
    }

    #[test]
    fn source_paths() {
        assert!(is_source_path(Path::new("src/index.ts")));
        assert!(is_source_path(Path::new("src/app.jsx")));
        assert!(!is_source_path(Path::new("src/types.d.ts")));
        assert!(!is_source_path(Path::new("README.md")));
    }
}
