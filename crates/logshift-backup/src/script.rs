//! Rollback script generation
//!
//! The script is plain POSIX `sh`: one `mkdir -p` and one `cp` per entry,
//! grouped by component so a reader can cut out a single component.

use crate::store::BackupEntry;
use logshift_transform::ComponentTag;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

/// Quote a path for `sh`
fn sh_quote(path: &Path) -> String {
    let raw = path.to_string_lossy();
    format!("'{}'", raw.replace('\'', r"'\''"))
}

/// Render a rollback script that restores every entry
#[must_use]
pub fn generate_rollback_script(run_id: &str, entries: &[BackupEntry]) -> String {
    let mut grouped: BTreeMap<ComponentTag, Vec<&BackupEntry>> = BTreeMap::new();
    for entry in entries {
        grouped.entry(entry.component).or_default().push(entry);
    }

    let mut out = String::new();
    out.push_str("#!/bin/sh\n");
    let _ = writeln!(out, "# logshift rollback for run {run_id}");
    let _ = writeln!(out, "# {} file(s)", entries.len());
    out.push_str("set -eu\n");

    for (component, group) in &grouped {
        let _ = writeln!(out, "\n# {component} ({} file(s))", group.len());
        for entry in group {
            if let Some(parent) = entry.original_path.parent() {
                let _ = writeln!(out, "mkdir -p {}", sh_quote(parent));
            }
            let _ = writeln!(
                out,
                "cp {} {}",
                sh_quote(&entry.backup_path),
                sh_quote(&entry.original_path)
            );
        }
    }

    let _ = writeln!(out, "\necho 'restored {} file(s)'", entries.len());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ContentHash;
    use chrono::Utc;
    use std::path::PathBuf;

    fn entry(original: &str, backup: &str, component: ComponentTag) -> BackupEntry {
        BackupEntry {
            original_path: PathBuf::from(original),
            backup_path: PathBuf::from(backup),
            component,
            hash: ContentHash::compute(original.as_bytes()),
            sequence: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn one_copy_per_entry_grouped_by_component() {
        let entries = vec![
            entry("/p/src/storage/kv.ts", "/b/Storage/src/storage/kv.ts", ComponentTag::Storage),
            entry("/p/src/core/bus.ts", "/b/Core/src/core/bus.ts", ComponentTag::Core),
        ];
        let script = generate_rollback_script("run-1", &entries);

        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("set -eu"));
        assert_eq!(script.matches("\ncp ").count(), 2);
        let core = script.find("# Core").unwrap();
        let storage = script.find("# Storage").unwrap();
        assert!(core < storage);
        assert!(script.contains("cp '/b/Core/src/core/bus.ts' '/p/src/core/bus.ts'"));
    }

    #[test]
    fn quotes_single_quotes() {
        let entries = vec![entry("/p/it's.ts", "/b/Core/it's.ts", ComponentTag::Core)];
        let script = generate_rollback_script("r", &entries);
        assert!(script.contains(r"'/p/it'\''s.ts'"));
    }

    #[test]
    fn empty_run_is_valid_script() {
        let script = generate_rollback_script("r", &[]);
        assert!(script.contains("restored 0 file(s)"));
        assert!(!script.contains("cp "));
    }
}
