//! Backup store
//!
//! Snapshots a file before it is rewritten and hands back a
//! [`BackupReceipt`]. The only way to overwrite a migrated file is
//! [`BackupStore::write_with_receipt`], which consumes that receipt, so a
//! write without a prior backup does not type-check.
//!
//! Layout of one run:
//!
//! ```text
//! <backup_root>/<run_id>/
//!     manifest.json
//!     rollback.sh
//!     _config/<relative path>
//!     <Component>/<relative path>
//! ```

use crate::error::{BackupError, BackupResult};
use crate::hash::ContentHash;
use crate::script::generate_rollback_script;
use chrono::{DateTime, Utc};
use logshift_transform::ComponentTag;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// File name of the run manifest
pub const MANIFEST_FILE: &str = "manifest.json";
/// File name of the generated rollback script
pub const ROLLBACK_SCRIPT: &str = "rollback.sh";
const CONFIG_DIR: &str = "_config";

/// Recorded mapping from an original file to its pre-migration snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEntry {
    /// File that was (or is about to be) rewritten
    pub original_path: PathBuf,
    /// Snapshot location
    pub backup_path: PathBuf,
    /// Component the file was migrated under
    pub component: ComponentTag,
    /// Digest of the snapshot
    pub hash: ContentHash,
    /// Store-local ordering stamp
    pub sequence: u64,
    /// Wall-clock creation time
    pub created_at: DateTime<Utc>,
}

/// Copy of a configuration file taken before any migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSnapshot {
    /// Original configuration file
    pub original_path: PathBuf,
    /// Snapshot location
    pub backup_path: PathBuf,
}

/// Persistent record of one run's backups
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupManifest {
    /// Run identifier
    pub run_id: String,
    /// Project the run migrated
    pub project_root: PathBuf,
    /// Every component backup, in creation order
    pub entries: Vec<BackupEntry>,
    /// Configuration snapshots taken at start-up
    pub config_snapshots: Vec<ConfigSnapshot>,
    /// Sequence counter
    next_sequence: u64,
}

/// Proof that a file was backed up
///
/// Deliberately neither `Clone` nor constructible outside this crate.
#[derive(Debug)]
pub struct BackupReceipt {
    entry: BackupEntry,
    expected: ContentHash,
}

impl BackupReceipt {
    /// Entry covering the file
    #[inline]
    #[must_use]
    pub fn entry(&self) -> &BackupEntry {
        &self.entry
    }
}

/// Outcome of a receipt-backed write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFile {
    /// Backup that covers the write
    pub entry: BackupEntry,
    /// Ordering stamp of the write (always greater than `entry.sequence`)
    pub sequence: u64,
    /// Wall-clock write time
    pub written_at: DateTime<Utc>,
}

/// Per-run backup store
#[derive(Debug)]
pub struct BackupStore {
    run_dir: PathBuf,
    manifest: Mutex<BackupManifest>,
}

impl BackupStore {
    /// Create the run directory `<backup_root>/<run_id>` and an empty manifest
    ///
    /// # Errors
    /// `BackupError::Io` if the directory or manifest cannot be written.
    pub fn create(
        backup_root: impl AsRef<Path>,
        run_id: &str,
        project_root: impl Into<PathBuf>,
    ) -> BackupResult<Self> {
        let run_dir = backup_root.as_ref().join(run_id);
        std::fs::create_dir_all(&run_dir).map_err(|e| BackupError::io(&run_dir, e))?;

        let store = Self {
            run_dir,
            manifest: Mutex::new(BackupManifest {
                run_id: run_id.to_string(),
                project_root: project_root.into(),
                ..BackupManifest::default()
            }),
        };
        store.persist(&store.manifest.lock())?;

        tracing::info!(run_dir = %store.run_dir.display(), "backup store created");
        Ok(store)
    }

    /// Re-open an existing run directory from its manifest
    ///
    /// # Errors
    /// - `BackupError::NoManifest` if the directory has no manifest
    /// - `BackupError::Manifest` if it cannot be decoded
    pub fn open(run_dir: impl Into<PathBuf>) -> BackupResult<Self> {
        let run_dir = run_dir.into();
        let path = run_dir.join(MANIFEST_FILE);
        if !path.is_file() {
            return Err(BackupError::NoManifest(run_dir));
        }
        let raw = std::fs::read(&path).map_err(|e| BackupError::io(&path, e))?;
        let manifest: BackupManifest = serde_json::from_slice(&raw)?;
        Ok(Self {
            run_dir,
            manifest: Mutex::new(manifest),
        })
    }

    /// Run directory
    #[inline]
    #[must_use]
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Run identifier
    #[must_use]
    pub fn run_id(&self) -> String {
        self.manifest.lock().run_id.clone()
    }

    /// Snapshot of every entry, in creation order
    #[must_use]
    pub fn entries(&self) -> Vec<BackupEntry> {
        self.manifest.lock().entries.clone()
    }

    /// Entries recorded for one component
    #[must_use]
    pub fn entries_for(&self, component: ComponentTag) -> Vec<BackupEntry> {
        self.manifest
            .lock()
            .entries
            .iter()
            .filter(|e| e.component == component)
            .cloned()
            .collect()
    }

    /// Configuration snapshots
    #[must_use]
    pub fn config_snapshots(&self) -> Vec<ConfigSnapshot> {
        self.manifest.lock().config_snapshots.clone()
    }

    fn relative_to_root(project_root: &Path, file: &Path) -> PathBuf {
        file.strip_prefix(project_root).map_or_else(
            |_| {
                file.components()
                    .filter(|c| matches!(c, Component::Normal(_)))
                    .collect()
            },
            Path::to_path_buf,
        )
    }

    fn persist(&self, manifest: &BackupManifest) -> BackupResult<()> {
        let path = self.run_dir.join(MANIFEST_FILE);
        let tmp = self.run_dir.join(format!("{MANIFEST_FILE}.tmp"));
        let json = serde_json::to_vec_pretty(manifest)?;
        std::fs::write(&tmp, json).map_err(|e| BackupError::io(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| BackupError::io(&path, e))
    }

    /// Snapshot `content` of `file` under `<run>/<component>/<relative path>`
    ///
    /// The manifest on disk lists the entry before the receipt is returned.
    /// Backing up a file twice in one run keeps the first snapshot.
    ///
    /// # Errors
    /// `BackupError::Io` or `BackupError::Manifest` when persisting fails.
    pub fn backup(
        &self,
        file: &Path,
        content: &[u8],
        component: ComponentTag,
    ) -> BackupResult<BackupReceipt> {
        let expected = ContentHash::compute(content);
        let mut manifest = self.manifest.lock();

        if let Some(existing) = manifest.entries.iter().find(|e| e.original_path == file) {
            tracing::debug!(file = %file.display(), "file already backed up in this run");
            return Ok(BackupReceipt {
                entry: existing.clone(),
                expected,
            });
        }

        let rel = Self::relative_to_root(&manifest.project_root, file);
        let backup_path = self.run_dir.join(component.name()).join(rel);
        if let Some(parent) = backup_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BackupError::io(parent, e))?;
        }
        std::fs::write(&backup_path, content).map_err(|e| BackupError::io(&backup_path, e))?;

        manifest.next_sequence += 1;
        let entry = BackupEntry {
            original_path: file.to_path_buf(),
            backup_path,
            component,
            hash: expected,
            sequence: manifest.next_sequence,
            created_at: Utc::now(),
        };
        manifest.entries.push(entry.clone());
        self.persist(&manifest)?;

        tracing::debug!(
            file = %file.display(),
            component = %component,
            hash = %expected.short(),
            "backup taken"
        );
        Ok(BackupReceipt { entry, expected })
    }

    /// Overwrite a backed-up file
    ///
    /// # Errors
    /// - `BackupError::StaleReceipt` if the file changed since the backup
    /// - `BackupError::Io` if the write fails
    pub fn write_with_receipt(
        &self,
        receipt: BackupReceipt,
        new_content: &[u8],
    ) -> BackupResult<WrittenFile> {
        let path = &receipt.entry.original_path;
        let current = std::fs::read(path).map_err(|e| BackupError::io(path, e))?;
        let actual = ContentHash::compute(&current);
        if actual != receipt.expected {
            return Err(BackupError::StaleReceipt {
                path: path.clone(),
                expected: receipt.expected.short(),
                actual: actual.short(),
            });
        }

        std::fs::write(path, new_content).map_err(|e| BackupError::io(path, e))?;

        let sequence = {
            let mut manifest = self.manifest.lock();
            manifest.next_sequence += 1;
            manifest.next_sequence
        };
        Ok(WrittenFile {
            entry: receipt.entry,
            sequence,
            written_at: Utc::now(),
        })
    }

    /// Copy a backup back over its original path
    ///
    /// # Errors
    /// - `BackupError::Corrupt` if the snapshot no longer matches its digest
    /// - `BackupError::Io` on filesystem failure
    pub fn restore_file(&self, entry: &BackupEntry) -> BackupResult<()> {
        let bytes =
            std::fs::read(&entry.backup_path).map_err(|e| BackupError::io(&entry.backup_path, e))?;
        if ContentHash::compute(&bytes) != entry.hash {
            return Err(BackupError::Corrupt {
                original: entry.original_path.clone(),
                backup: entry.backup_path.clone(),
            });
        }
        if let Some(parent) = entry.original_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BackupError::io(parent, e))?;
        }
        std::fs::write(&entry.original_path, bytes)
            .map_err(|e| BackupError::io(&entry.original_path, e))?;
        tracing::debug!(file = %entry.original_path.display(), "restored");
        Ok(())
    }

    /// Restore every file backed up under `component`
    ///
    /// Other components are left untouched.
    ///
    /// # Errors
    /// Stops at the first failing restore.
    pub fn restore_component(&self, component: ComponentTag) -> BackupResult<Vec<PathBuf>> {
        let entries = self.entries_for(component);
        for entry in &entries {
            self.restore_file(entry)?;
        }
        tracing::info!(component = %component, files = entries.len(), "component restored");
        Ok(entries.into_iter().map(|e| e.original_path).collect())
    }

    /// Restore every entry of the run
    ///
    /// # Errors
    /// Stops at the first failing restore.
    pub fn restore_all(&self) -> BackupResult<Vec<PathBuf>> {
        let entries = self.entries();
        for entry in &entries {
            self.restore_file(entry)?;
        }
        tracing::info!(files = entries.len(), "run restored");
        Ok(entries.into_iter().map(|e| e.original_path).collect())
    }

    /// Copy a configuration file into `<run>/_config/`
    ///
    /// Returns `None` when the file does not exist.
    ///
    /// # Errors
    /// `BackupError::Io` if the copy fails.
    pub fn snapshot_config(&self, file: &Path) -> BackupResult<Option<PathBuf>> {
        if !file.is_file() {
            return Ok(None);
        }
        let mut manifest = self.manifest.lock();
        let rel = Self::relative_to_root(&manifest.project_root, file);
        let backup_path = self.run_dir.join(CONFIG_DIR).join(rel);
        if let Some(parent) = backup_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BackupError::io(parent, e))?;
        }
        std::fs::copy(file, &backup_path).map_err(|e| BackupError::io(&backup_path, e))?;
        manifest.config_snapshots.push(ConfigSnapshot {
            original_path: file.to_path_buf(),
            backup_path: backup_path.clone(),
        });
        self.persist(&manifest)?;
        Ok(Some(backup_path))
    }

    /// Write `<run>/rollback.sh` covering every entry recorded so far
    ///
    /// # Errors
    /// `BackupError::Io` if the script cannot be written.
    pub fn write_rollback_script(&self) -> BackupResult<PathBuf> {
        let (run_id, entries) = {
            let manifest = self.manifest.lock();
            (manifest.run_id.clone(), manifest.entries.clone())
        };
        install_rollback_script(&self.run_dir, &generate_rollback_script(&run_id, &entries))
    }
}

/// Write a no-op `<run_dir>/rollback.sh` for a run that failed before any backup
///
/// # Errors
/// `BackupError::Io` if the directory or script cannot be written.
pub fn write_empty_rollback_script(run_dir: &Path, run_id: &str) -> BackupResult<PathBuf> {
    std::fs::create_dir_all(run_dir).map_err(|e| BackupError::io(run_dir, e))?;
    install_rollback_script(run_dir, &generate_rollback_script(run_id, &[]))
}

fn install_rollback_script(run_dir: &Path, script: &str) -> BackupResult<PathBuf> {
    let path = run_dir.join(ROLLBACK_SCRIPT);
    std::fs::write(&path, script).map_err(|e| BackupError::io(&path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .map_err(|e| BackupError::io(&path, e))?;
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        store: BackupStore,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("project");
        std::fs::create_dir_all(root.join("src/storage")).unwrap();
        let store = BackupStore::create(dir.path().join("backups"), "run-1", &root).unwrap();
        Fixture {
            _dir: dir,
            root,
            store,
        }
    }

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn backup_lands_under_component_and_relative_path() {
        let f = fixture();
        let file = f.root.join("src/storage/kv.ts");
        write(&file, "console.log(1);\n");

        let receipt = f
            .store
            .backup(&file, b"console.log(1);\n", ComponentTag::Storage)
            .unwrap();

        let expected = f.store.run_dir().join("Storage/src/storage/kv.ts");
        assert_eq!(receipt.entry().backup_path, expected);
        assert_eq!(std::fs::read_to_string(expected).unwrap(), "console.log(1);\n");
    }

    #[test]
    fn manifest_lists_entry_before_write() {
        let f = fixture();
        let file = f.root.join("src/a.ts");
        write(&file, "a");

        let _receipt = f.store.backup(&file, b"a", ComponentTag::Core).unwrap();
        let reopened = BackupStore::open(f.store.run_dir()).unwrap();
        assert_eq!(reopened.entries().len(), 1);
        assert_eq!(reopened.entries()[0].original_path, file);
    }

    #[test]
    fn write_sequence_follows_backup() {
        let f = fixture();
        let file = f.root.join("src/a.ts");
        write(&file, "old");

        let receipt = f.store.backup(&file, b"old", ComponentTag::Core).unwrap();
        let written = f.store.write_with_receipt(receipt, b"new").unwrap();

        assert!(written.entry.sequence < written.sequence);
        assert!(written.entry.created_at <= written.written_at);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "new");
    }

    #[test]
    fn stale_receipt_is_refused() {
        let f = fixture();
        let file = f.root.join("src/a.ts");
        write(&file, "old");

        let receipt = f.store.backup(&file, b"old", ComponentTag::Core).unwrap();
        write(&file, "edited elsewhere");

        let err = f.store.write_with_receipt(receipt, b"new").unwrap_err();
        assert!(matches!(err, BackupError::StaleReceipt { .. }));
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "edited elsewhere");
    }

    #[test]
    fn second_backup_keeps_first_snapshot() {
        let f = fixture();
        let file = f.root.join("src/a.ts");
        write(&file, "v1");

        let r1 = f.store.backup(&file, b"v1", ComponentTag::Core).unwrap();
        f.store.write_with_receipt(r1, b"v2").unwrap();
        let r2 = f.store.backup(&file, b"v2", ComponentTag::Core).unwrap();
        f.store.write_with_receipt(r2, b"v3").unwrap();

        assert_eq!(f.store.entries().len(), 1);
        f.store.restore_all().unwrap();
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "v1");
    }

    #[test]
    fn restore_component_is_byte_identical_and_scoped() {
        let f = fixture();
        let storage = f.root.join("src/storage/kv.ts");
        let core = f.root.join("src/core/bus.ts");
        write(&storage, "storage\r\n\tbytes\u{00e9}");
        write(&core, "core");

        let original = std::fs::read(&storage).unwrap();
        let r = f.store.backup(&storage, &original, ComponentTag::Storage).unwrap();
        f.store.write_with_receipt(r, b"migrated").unwrap();
        let r = f.store.backup(&core, b"core", ComponentTag::Core).unwrap();
        f.store.write_with_receipt(r, b"core migrated").unwrap();

        let restored = f.store.restore_component(ComponentTag::Storage).unwrap();
        assert_eq!(restored, vec![storage.clone()]);
        assert_eq!(std::fs::read(&storage).unwrap(), original);
        assert_eq!(std::fs::read_to_string(&core).unwrap(), "core migrated");
    }

    #[test]
    fn corrupt_backup_is_detected() {
        let f = fixture();
        let file = f.root.join("src/a.ts");
        write(&file, "a");
        let r = f.store.backup(&file, b"a", ComponentTag::Core).unwrap();
        let entry = r.entry().clone();
        std::fs::write(&entry.backup_path, "tampered").unwrap();

        assert!(matches!(
            f.store.restore_file(&entry),
            Err(BackupError::Corrupt { .. })
        ));
    }

    #[test]
    fn config_snapshot_skips_missing_files() {
        let f = fixture();
        let pkg = f.root.join("package.json");
        write(&pkg, "{}");

        assert!(f.store.snapshot_config(&pkg).unwrap().is_some());
        assert!(f
            .store
            .snapshot_config(&f.root.join("tsconfig.json"))
            .unwrap()
            .is_none());
        assert_eq!(f.store.config_snapshots().len(), 1);
        assert!(f.store.entries().is_empty());
    }

    #[test]
    fn open_without_manifest_fails() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            BackupStore::open(dir.path()),
            Err(BackupError::NoManifest(_))
        ));
    }

    #[test]
    fn rollback_script_is_written() {
        let f = fixture();
        let file = f.root.join("src/a.ts");
        write(&file, "a");
        f.store.backup(&file, b"a", ComponentTag::Core).unwrap();

        let path = f.store.write_rollback_script().unwrap();
        let script = std::fs::read_to_string(path).unwrap();
        assert!(script.contains(&file.display().to_string()));
    }

    #[test]
    fn empty_rollback_script_restores_nothing() {
        let dir = TempDir::new().unwrap();
        let run_dir = dir.path().join("backups/run-0");
        let path = write_empty_rollback_script(&run_dir, "run-0").unwrap();

        assert_eq!(path, run_dir.join(ROLLBACK_SCRIPT));
        let script = std::fs::read_to_string(&path).unwrap();
        assert!(script.starts_with("#!/bin/sh"));
        assert!(!script.contains("cp "));
        assert!(script.contains("restored 0 file(s)"));
    }
}
