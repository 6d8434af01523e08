//! Component tags and path classification
//!
//! Every source file is attributed to exactly one architectural component.
//! Classification is a pure, total function of the path: ordered substring
//! rules are tested and the first match wins. Paths that match no rule fall
//! back to [`ComponentTag::Core`]; [`Classification::is_default`] exposes that
//! case so callers can report it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Architectural component a file belongs to
///
/// Closed and ordered: the declaration order is the tie-break order used by
/// the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ComponentTag {
    /// Runtime core and anything unclassified
    Core,
    /// Model Context Protocol server (stdio transport)
    Mcp,
    /// CLI, commands, UI and API surface
    Interface,
    /// Agent and swarm coordination
    Coordination,
    /// Memory subsystem
    Memory,
    /// Persistence backends
    Storage,
    /// Terminal / process management
    Terminal,
    /// Lifecycle hooks
    Hooks,
    /// Enterprise features
    Enterprise,
}

impl ComponentTag {
    /// All tags in declaration order
    pub const ALL: [ComponentTag; 9] = [
        ComponentTag::Core,
        ComponentTag::Mcp,
        ComponentTag::Interface,
        ComponentTag::Coordination,
        ComponentTag::Memory,
        ComponentTag::Storage,
        ComponentTag::Terminal,
        ComponentTag::Hooks,
        ComponentTag::Enterprise,
    ];

    /// Name written into rewritten call sites and backup directories
    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ComponentTag::Core => "Core",
            ComponentTag::Mcp => "Mcp",
            ComponentTag::Interface => "Interface",
            ComponentTag::Coordination => "Coordination",
            ComponentTag::Memory => "Memory",
            ComponentTag::Storage => "Storage",
            ComponentTag::Terminal => "Terminal",
            ComponentTag::Hooks => "Hooks",
            ComponentTag::Enterprise => "Enterprise",
        }
    }
}

impl fmt::Display for ComponentTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unknown component name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown component: '{0}'")]
pub struct UnknownComponent(pub String);

impl FromStr for ComponentTag {
    type Err = UnknownComponent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ComponentTag::ALL
            .iter()
            .find(|tag| tag.name().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| UnknownComponent(s.to_string()))
    }
}

/// Ordered classification rules: `(tag, path fragment)`
const RULES: &[(ComponentTag, &str)] = &[
    (ComponentTag::Mcp, "/mcp/"),
    (ComponentTag::Interface, "/cli/"),
    (ComponentTag::Interface, "/commands/"),
    (ComponentTag::Interface, "/ui/"),
    (ComponentTag::Interface, "/api/"),
    (ComponentTag::Coordination, "/coordination/"),
    (ComponentTag::Coordination, "/swarm/"),
    (ComponentTag::Coordination, "/agents/"),
    (ComponentTag::Coordination, "/orchestrat"),
    (ComponentTag::Memory, "/memory/"),
    (ComponentTag::Storage, "/storage/"),
    (ComponentTag::Storage, "/persistence/"),
    (ComponentTag::Storage, "/db/"),
    (ComponentTag::Storage, "/database/"),
    (ComponentTag::Terminal, "/terminal/"),
    (ComponentTag::Hooks, "/hooks/"),
    (ComponentTag::Enterprise, "/enterprise/"),
    (ComponentTag::Core, "/core/"),
];

/// Outcome of classifying one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// Assigned tag
    pub tag: ComponentTag,
    /// Path fragment that matched, `None` when the default applied
    pub rule: Option<&'static str>,
}

impl Classification {
    /// True when no rule matched and the tag is the `Core` fallback
    #[inline]
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.rule.is_none()
    }
}

/// Classify a path, reporting which rule matched
#[must_use]
pub fn classify_explained(path: impl AsRef<Path>) -> Classification {
    let normalized = normalize(path.as_ref());

    RULES
        .iter()
        .find(|(_, fragment)| normalized.contains(fragment))
        .map_or(
            Classification {
                tag: ComponentTag::Core,
                rule: None,
            },
            |(tag, fragment)| Classification {
                tag: *tag,
                rule: Some(fragment),
            },
        )
}

/// Classify a path into a component tag
#[inline]
#[must_use]
pub fn classify(path: impl AsRef<Path>) -> ComponentTag {
    classify_explained(path).tag
}

fn normalize(path: &Path) -> String {
    let mut s = path.to_string_lossy().replace('\\', "/").to_lowercase();
    if !s.starts_with('/') {
        s.insert(0, '/');
    }
    s
}

/// Per-run memo of classifications
///
/// Guarantees that a file keeps the tag it was first given for the whole run.
#[derive(Debug, Default, Clone)]
pub struct ClassificationCache {
    entries: HashMap<PathBuf, Classification>,
}

impl ClassificationCache {
    /// Create empty cache
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify through the cache
    pub fn classify(&mut self, path: &Path) -> Classification {
        *self
            .entries
            .entry(path.to_path_buf())
            .or_insert_with(|| classify_explained(path))
    }

    /// Previously computed classification
    #[inline]
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<Classification> {
        self.entries.get(path).copied()
    }

    /// Number of classified paths
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was classified yet
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Paths that fell back to the default tag
    pub fn defaulted(&self) -> impl Iterator<Item = &Path> {
        self.entries
            .iter()
            .filter(|(_, c)| c.is_default())
            .map(|(p, _)| p.as_path())
    }
}
