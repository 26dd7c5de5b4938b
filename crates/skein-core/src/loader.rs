//! Loader pipeline: rule selection and transform chain execution.
//!
//! A [`LoaderRule`] pairs a glob predicate with an ordered transform chain.
//! The first rule (in declared config order) whose `test` accepts a module's
//! path and whose `exclude` does not reject it owns that module; rules are
//! never merged. The chain composes: each transform consumes the previous
//! transform's output, and may report discovered dependency specifiers,
//! which accumulate in declaration order and are deduplicated by text.
//!
//! Chains run on a worker thread with a configurable deadline so a stuck
//! transform fails the module with [`LoaderError::Timeout`] instead of
//! stalling the whole build.

use crate::config::{RuleConfig, TransformRef};
use crate::error::{ConfigError, LoaderError};
use rustc_hash::FxHashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

/// Output of one transform step.
#[derive(Debug, Clone)]
pub struct TransformOutput {
    /// Rewritten module content, fed to the next transform in the chain.
    pub content: Vec<u8>,
    /// Dependency specifiers this step discovered (import statements,
    /// stylesheet references, and so on).
    pub dependencies: Vec<String>,
}

impl TransformOutput {
    /// Content-only output with no discovered dependencies.
    #[must_use]
    pub fn content(content: Vec<u8>) -> Self {
        Self {
            content,
            dependencies: Vec::new(),
        }
    }
}

/// The contract every transform implements. Registered by name; dispatched
/// in declared rule order. Internals are opaque to the pipeline.
pub trait Transform: Send + Sync {
    fn name(&self) -> &str;

    /// Rewrite `content` for the module at `path`. `options` is the opaque
    /// per-rule options value from configuration.
    fn transform(
        &self,
        content: &[u8],
        path: &Path,
        options: &serde_json::Value,
    ) -> Result<TransformOutput, String>;
}

/// Named transform lookup. Populated once at startup.
#[derive(Default)]
pub struct TransformRegistry {
    transforms: Vec<Box<dyn Transform>>,
}

impl TransformRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in transforms.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(crate::transforms::ScriptTransform));
        registry.register(Box::new(crate::transforms::StyleTransform));
        registry.register(Box::new(crate::transforms::JsonTransform));
        registry.register(Box::new(crate::transforms::DefineTransform));
        registry
    }

    pub fn register(&mut self, transform: Box<dyn Transform>) {
        self.transforms.push(transform);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn Transform> {
        self.transforms
            .iter()
            .find(|t| t.name() == name)
            .map(AsRef::as_ref)
    }

    /// Registered transform names, for config validation.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.transforms.iter().map(|t| t.name()).collect()
    }
}

/// A compiled loader rule: glob predicates plus the transform chain.
#[derive(Debug, Clone)]
pub struct LoaderRule {
    tests: Vec<glob::Pattern>,
    exclude: Option<glob::Pattern>,
    chain: Vec<TransformRef>,
}

impl LoaderRule {
    /// Compile a rule from configuration. Bad globs are fatal.
    pub fn compile(index: usize, rule: &RuleConfig) -> Result<Self, ConfigError> {
        let tests = expand_braces(&rule.test)
            .iter()
            .map(|p| glob::Pattern::new(p))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ConfigError::InvalidRule {
                index,
                reason: format!("bad test pattern '{}': {e}", rule.test),
            })?;
        let exclude = rule
            .exclude
            .as_deref()
            .map(glob::Pattern::new)
            .transpose()
            .map_err(|e| ConfigError::InvalidRule {
                index,
                reason: format!("bad exclude pattern: {e}"),
            })?;
        Ok(Self {
            tests,
            exclude,
            chain: rule.transforms.clone(),
        })
    }

    /// Does this rule own the module at `path`?
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        if !self.tests.iter().any(|t| t.matches(path)) {
            return false;
        }
        match &self.exclude {
            Some(exclude) => !exclude.matches(path),
            None => true,
        }
    }
}

/// Result of compiling one module through its transform chain.
#[derive(Debug, Clone)]
pub struct Compiled {
    pub content: Vec<u8>,
    /// Discovered dependency specifiers, first-seen order, deduplicated.
    pub dependencies: Vec<String>,
}

/// Selects and runs transform chains. Safe to share across worker threads.
pub struct Pipeline {
    rules: Vec<LoaderRule>,
    registry: Arc<TransformRegistry>,
    timeout: Duration,
}

impl Pipeline {
    pub fn new(
        rule_configs: &[RuleConfig],
        registry: Arc<TransformRegistry>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let rules = rule_configs
            .iter()
            .enumerate()
            .map(|(index, rule)| LoaderRule::compile(index, rule))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            rules,
            registry,
            timeout,
        })
    }

    /// First matching rule for a path, in declared order.
    #[must_use]
    fn select_rule(&self, path: &str) -> Option<&LoaderRule> {
        self.rules.iter().find(|rule| rule.matches(path))
    }

    /// Run the owning rule's chain over `raw`.
    ///
    /// Modules no rule claims pass through unchanged with no dependencies.
    pub fn compile(&self, path: &Path, raw: Vec<u8>) -> Result<Compiled, LoaderError> {
        let path_str = path.to_string_lossy().to_string();
        let Some(rule) = self.select_rule(&path_str) else {
            return Ok(Compiled {
                content: raw,
                dependencies: Vec::new(),
            });
        };

        let chain = rule.chain.clone();
        let registry = Arc::clone(&self.registry);
        let path_owned = path.to_path_buf();
        let (tx, rx) = mpsc::channel();

        // The chain runs on its own thread so the deadline can cut it off.
        // A timed-out worker is abandoned, not joined.
        std::thread::spawn(move || {
            let result = run_chain(&registry, &chain, &path_owned, raw);
            let _ = tx.send(result);
        });

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(_) => Err(LoaderError::Timeout {
                module: path_str,
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

/// Compose the chain left to right, accumulating discovered dependencies.
fn run_chain(
    registry: &TransformRegistry,
    chain: &[TransformRef],
    path: &Path,
    raw: Vec<u8>,
) -> Result<Compiled, LoaderError> {
    let mut content = raw;
    let mut dependencies: Vec<String> = Vec::new();
    let mut seen: FxHashSet<String> = FxHashSet::default();

    for step in chain {
        // Validated at startup; a missing transform here is a config drift.
        let transform =
            registry
                .get(&step.transform)
                .ok_or_else(|| LoaderError::TransformFailure {
                    transform: step.transform.clone(),
                    module: path.to_string_lossy().to_string(),
                    cause: "transform is not registered".to_string(),
                })?;

        let output = transform
            .transform(&content, path, &step.options)
            .map_err(|cause| LoaderError::TransformFailure {
                transform: step.transform.clone(),
                module: path.to_string_lossy().to_string(),
                cause,
            })?;

        content = output.content;
        for dep in output.dependencies {
            if seen.insert(dep.clone()) {
                dependencies.push(dep);
            }
        }
    }

    Ok(Compiled {
        content,
        dependencies,
    })
}

/// Expand one level of `{a,b,c}` alternation into separate glob patterns.
/// `glob::Pattern` itself has no brace support.
#[must_use]
pub fn expand_braces(pattern: &str) -> Vec<String> {
    let (Some(open), Some(close)) = (pattern.find('{'), pattern.find('}')) else {
        return vec![pattern.to_string()];
    };
    if close < open {
        return vec![pattern.to_string()];
    }
    let prefix = &pattern[..open];
    let suffix = &pattern[close + 1..];
    pattern[open + 1..close]
        .split(',')
        .flat_map(|alt| expand_braces(&format!("{prefix}{alt}{suffix}")))
        .collect()
}
