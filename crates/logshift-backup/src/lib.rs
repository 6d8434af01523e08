//! logshift backup store
//!
//! Pre-write snapshots, receipt-gated writes, restores and rollback scripts.
//!
//! ```rust,ignore
//! let store = BackupStore::create(".logshift/backups", &run_id, &project_root)?;
//! let receipt = store.backup(&path, &content, ComponentTag::Storage)?;
//! store.write_with_receipt(receipt, migrated.as_bytes())?;
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod error;
pub mod hash;
pub mod script;
pub mod store;

pub use error::{BackupError, BackupResult};
pub use hash::ContentHash;
pub use script::generate_rollback_script;
pub use store::{
    write_empty_rollback_script, BackupEntry, BackupManifest, BackupReceipt, BackupStore,
    ConfigSnapshot, WrittenFile, MANIFEST_FILE, ROLLBACK_SCRIPT,
};
