//! Post-condition rules
//!
//! Each rule inspects the final content of a component's files and yields
//! findings. The severity is fixed per rule.

use crate::config::PostConditionRule;
use logshift_transform::imports::ImportMatcher;
use logshift_transform::scan::{count_output_calls, logger_calls};
use logshift_transform::ComponentTag;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

static SECRET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)password|passwd|secret|token|api_?key|credential|private_?key")
        .expect("secret pattern is valid")
});

// quoted strings and substitution-free template literals
static STRING_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"'(?:[^'\\\n]|\\.)*'|"(?:[^"\\\n]|\\.)*"|`[^`$]*`"#)
        .expect("string literal pattern is valid")
});

static CORRELATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)correlation_?id|request_?id|trace_?id").expect("correlation pattern is valid")
});

/// Whether an argument passes a credential-like value
///
/// Literal text is message wording, not data: `'invalid password'` is fine,
/// `user.password` and `{ password }` are not.
fn leaks_secret(argument: &str) -> bool {
    SECRET.is_match(&STRING_LITERAL.replace_all(argument, "''"))
}

/// How a finding affects the component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Fails the component
    Error,
    /// Reported only
    Warning,
}

impl PostConditionRule {
    /// Fixed severity of the rule
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            Self::NoDirectStdout | Self::ImportPresent | Self::NoSecretLeak => Severity::Error,
            Self::CorrelationToken => Severity::Warning,
        }
    }

    /// Rule name as configured
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::NoDirectStdout => "NoDirectStdout",
            Self::ImportPresent => "ImportPresent",
            Self::NoSecretLeak => "NoSecretLeak",
            Self::CorrelationToken => "CorrelationToken",
        }
    }
}

impl fmt::Display for PostConditionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Final content of one file, as the rules see it
#[derive(Debug, Clone)]
pub struct ScannedFile {
    /// File path
    pub path: PathBuf,
    /// Content after migration (or as transformed, in a dry run)
    pub content: String,
}

/// One rule violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFinding {
    /// Rule that fired
    pub rule: PostConditionRule,
    /// Severity of the rule
    pub severity: Severity,
    /// Offending file, when the finding is file-specific
    pub file: Option<PathBuf>,
    /// Human-readable description
    pub message: String,
}

impl RuleFinding {
    fn new(rule: PostConditionRule, file: Option<PathBuf>, message: String) -> Self {
        Self {
            rule,
            severity: rule.severity(),
            file,
            message,
        }
    }
}

impl fmt::Display for RuleFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "[{}] {}: {}", self.rule, file.display(), self.message),
            None => write!(f, "[{}] {}", self.rule, self.message),
        }
    }
}

/// Inputs shared by every rule of one component
#[derive(Debug)]
pub struct RuleContext<'a> {
    /// Component under check
    pub component: ComponentTag,
    /// Logger symbol
    pub symbol: &'a str,
    /// Component files
    pub files: &'a [ScannedFile],
    imports: ImportMatcher,
}

impl<'a> RuleContext<'a> {
    /// Build context for `component`
    #[must_use]
    pub fn new(component: ComponentTag, symbol: &'a str, files: &'a [ScannedFile]) -> Self {
        Self {
            component,
            symbol,
            files,
            imports: ImportMatcher::new(symbol),
        }
    }
}

/// Run one rule
#[must_use]
pub fn check_rule(rule: PostConditionRule, ctx: &RuleContext<'_>) -> Vec<RuleFinding> {
    match rule {
        PostConditionRule::NoDirectStdout => ctx
            .files
            .iter()
            .filter_map(|f| {
                let residual = count_output_calls(&f.content, &f.path);
                (residual > 0).then(|| {
                    RuleFinding::new(
                        rule,
                        Some(f.path.clone()),
                        format!("{residual} direct output call(s) remain"),
                    )
                })
            })
            .collect(),

        PostConditionRule::ImportPresent => ctx
            .files
            .iter()
            .filter(|f| !logger_calls(&f.content, &f.path, ctx.symbol).is_empty())
            .filter(|f| !ctx.imports.is_imported(&f.content))
            .map(|f| {
                RuleFinding::new(
                    rule,
                    Some(f.path.clone()),
                    format!("uses {} without importing it", ctx.symbol),
                )
            })
            .collect(),

        PostConditionRule::NoSecretLeak => ctx
            .files
            .iter()
            .flat_map(|f| {
                logger_calls(&f.content, &f.path, ctx.symbol)
                    .into_iter()
                    .filter(|call| call.arguments.iter().skip(1).any(|a| leaks_secret(a)))
                    .map(|call| {
                        RuleFinding::new(
                            rule,
                            Some(f.path.clone()),
                            format!("line {}: logger call may leak a credential", call.line),
                        )
                    })
                    .collect::<Vec<_>>()
            })
            .collect(),

        PostConditionRule::CorrelationToken => {
            let mut any_call = false;
            let carried = ctx.files.iter().any(|f| {
                let calls = logger_calls(&f.content, &f.path, ctx.symbol);
                any_call |= !calls.is_empty();
                calls
                    .iter()
                    .any(|c| c.arguments.iter().any(|a| CORRELATION.is_match(a)))
            });
            if any_call && !carried {
                vec![RuleFinding::new(
                    rule,
                    None,
                    format!("no logger call in {} carries a correlation id", ctx.component),
                )]
            } else {
                Vec::new()
            }
        }
    }
}

/// Run every configured rule
#[must_use]
pub fn check_rules(rules: &[PostConditionRule], ctx: &RuleContext<'_>) -> Vec<RuleFinding> {
    rules.iter().flat_map(|r| check_rule(*r, ctx)).collect()
}
