//! Testing utilities for logshift workspace
//!
//! Shared fixtures: temporary project trees and a scripted test runner.

#![allow(missing_docs)]

use async_trait::async_trait;
use logshift_core::{EngineConfig, TestOutcome, TestRunner, ValidationError};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const LOGGER_MODULE: &str = "src/utils/component-logger.ts";

pub const LOGGER_SOURCE: &str = r#"export const ComponentLogger = {
  info: (component: string, ...args: unknown[]) => process.stderr.write(`[${component}] ${args.join(' ')}\n`),
  warn: (component: string, ...args: unknown[]) => process.stderr.write(`[${component}] ${args.join(' ')}\n`),
  error: (component: string, ...args: unknown[]) => process.stderr.write(`[${component}] ${args.join(' ')}\n`),
  debug: (component: string, ...args: unknown[]) => process.stderr.write(`[${component}] ${args.join(' ')}\n`),
};
"#;

/// Three raw output calls of mixed methods
pub const STORAGE_SOURCE: &str = r#"export class KvStore {
  get(key: string): string | undefined {
    console.log('get', key);
    return undefined;
  }
  set(key: string, value: string): void {
    console.warn('set', key);
    if (!value) console.error('empty value for', key);
  }
}
"#;

/// Unterminated string literal
pub const BROKEN_SOURCE: &str = "const greeting = 'hello;\nconsole.log(greeting);\n";

/// A temporary project tree with the logger module in place
pub struct FixtureProject {
    dir: TempDir,
}

impl FixtureProject {
    pub fn new() -> Self {
        let project = Self {
            dir: TempDir::new().unwrap(),
        };
        project.write(LOGGER_MODULE, LOGGER_SOURCE);
        project.write("package.json", "{ \"name\": \"fixture\" }\n");
        project
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.path(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.path(rel)).unwrap()
    }

    /// Defaults rooted here, with tests disabled and two workers
    pub fn config(&self) -> EngineConfig {
        let mut config = EngineConfig::for_project(self.root());
        config.test_command = Vec::new();
        config.max_workers = 2;
        config
    }
}

impl Default for FixtureProject {
    fn default() -> Self {
        Self::new()
    }
}

/// Test runner that returns canned outcomes and counts invocations
#[derive(Debug)]
pub struct ScriptedTestRunner {
    outcome: TestOutcome,
    calls: Mutex<usize>,
}

impl ScriptedTestRunner {
    pub fn exiting(code: i32) -> Arc<Self> {
        Arc::new(Self {
            outcome: TestOutcome {
                exit_code: Some(code),
                duration_ms: 1,
                timed_out: false,
                output_tail: String::new(),
            },
            calls: Mutex::new(0),
        })
    }

    pub fn passing() -> Arc<Self> {
        Self::exiting(0)
    }

    pub fn timing_out() -> Arc<Self> {
        Arc::new(Self {
            outcome: TestOutcome {
                exit_code: None,
                duration_ms: 1_000,
                timed_out: true,
                output_tail: String::new(),
            },
            calls: Mutex::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl TestRunner for ScriptedTestRunner {
    fn is_available(&self) -> bool {
        true
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(1)
    }

    async fn run(&self, _project_root: &Path) -> Result<TestOutcome, ValidationError> {
        *self.calls.lock() += 1;
        Ok(self.outcome.clone())
    }
}
