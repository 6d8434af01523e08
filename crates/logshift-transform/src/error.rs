//! Error types for the transform layer
//!
//! Provides error handling for:
//! - Parse operations (source text → syntax tree)
//! - Transform operations (syntax tree → rewritten source)

use std::path::PathBuf;

/// Errors raised while building a syntax tree
///
/// A `ParseError` is never fatal to a migration: the transformer routes it
/// to the textual strategy instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Syntax error in source text (1-based position)
    #[error("syntax error at {line}:{column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    /// The grammar could not be loaded into the parser
    #[error("grammar unavailable for {language}: {message}")]
    GrammarUnavailable {
        language: &'static str,
        message: String,
    },

    /// The parser returned no tree (cancelled or timed out)
    #[error("parser produced no tree")]
    NoTree,

    /// No grammar is registered for this file extension
    #[error("unsupported source file: {0}")]
    Unsupported(PathBuf),
}

impl ParseError {
    /// Create syntax error at position
    pub fn syntax(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            line,
            column,
            message: message.into(),
        }
    }

    /// Whether the error comes from the source text rather than the tooling
    #[inline]
    #[must_use]
    pub fn is_syntax(&self) -> bool {
        matches!(self, Self::Syntax { .. })
    }
}

/// Errors raised while rewriting a file
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    /// A structural rewrite produced source that no longer parses
    #[error("structural rewrite of {path} broke syntax: {source}")]
    BrokeSyntax {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    /// The parser could not be used at all
    #[error("parser unavailable: {0}")]
    Parser(#[from] ParseError),
}

/// Result type alias for transform operations
pub type TransformResult<T> = Result<T, TransformError>;
