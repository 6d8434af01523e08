//! logshift transform layer
//!
//! Turns ad-hoc output calls into component-tagged logger calls.
//!
//! # Core Operations
//!
//! - **Classify**: map a file path to a [`ComponentTag`]
//! - **Parse**: build a tree-sitter syntax tree, or a [`ParseError`]
//! - **Transform**: rewrite call sites and insert the logger import
//! - **Scan**: count residual calls and inspect logger calls read-only
//!
//! # Example
//!
//! ```rust,ignore
//! use logshift_transform::{classify, Transformer};
//! use std::path::Path;
//!
//! let path = Path::new("/repo/src/storage/kv.ts");
//! let transformer = Transformer::new("ComponentLogger", "/repo/src/utils/component-logger");
//!
//! let out = transformer.transform("console.log('x');\n", classify(path), path)?;
//! assert_eq!(out.replacements, 1);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod component;
pub mod error;
pub mod imports;
pub mod language;
pub mod parser;
pub mod scan;
pub mod transform;

pub use component::{classify, classify_explained, Classification, ClassificationCache, ComponentTag};
pub use error::{ParseError, TransformError, TransformResult};
pub use language::{is_source_path, SourceLanguage};
pub use parser::{parse_source, CallSite, ImportRef, MemberCall, OutputMethod};
pub use transform::{Strategy, TransformOutput, Transformer, DEFAULT_LOGGER_SYMBOL};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the transform layer
    pub use crate::component::{classify, ComponentTag};
    pub use crate::error::{ParseError, TransformError};
    pub use crate::transform::{Strategy, TransformOutput, Transformer};
}
