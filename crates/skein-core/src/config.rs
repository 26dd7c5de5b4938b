//! Configuration loading and validation.
//!
//! Configuration lives in `skein.config.json` at the project root:
//!
//! ```json
//! {
//!   "entry": { "index": "src/index.js" },
//!   "outputDir": "build",
//!   "resolve": { "extensions": [".js", ".jsx", ".ts", ".tsx"], "aliases": { "@": "src" } },
//!   "rules": [ { "test": "**/*.js", "exclude": "**/node_modules/**",
//!                "use": [ { "transform": "script" } ] } ],
//!   "assetThresholdBytes": 8196,
//!   "devServer": { "port": 3000, "historyFallback": true }
//! }
//! ```
//!
//! Validation is fatal: the engine refuses to run with an invalid config.

use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Config file names in priority order.
const CONFIG_FILES: &[&str] = &["skein.config.json", "bundler.config.json"];

/// Fully parsed build configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Entry points: bundle name → source path (relative to the project root).
    pub entry: BTreeMap<String, PathBuf>,

    /// Output directory, relative to the project root.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default)]
    pub resolve: ResolveConfig,

    /// Loader rules in declared priority order. First match wins.
    #[serde(default = "default_rules")]
    pub rules: Vec<RuleConfig>,

    /// Assets smaller than this are inlined; at or above it they are emitted
    /// as standalone files.
    #[serde(default = "default_threshold")]
    pub asset_threshold_bytes: u64,

    /// Per-module transform chain timeout.
    #[serde(default = "default_loader_timeout")]
    pub loader_timeout_ms: u64,

    #[serde(default)]
    pub dev_server: DevServerConfig,
}

/// Specifier resolution options.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveConfig {
    /// Extensions probed, in priority order, when a specifier has none.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Prefix aliases: `@` → `src` rewrites `@/util` to `<root>/src/util`.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            aliases: BTreeMap::new(),
        }
    }
}

/// One loader rule: which paths it covers and which transforms run on them.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConfig {
    /// Glob matched against the module path.
    pub test: String,

    /// Optional glob that rejects otherwise-matching paths.
    #[serde(default)]
    pub exclude: Option<String>,

    /// Transform chain, applied left to right.
    #[serde(rename = "use")]
    pub transforms: Vec<TransformRef>,
}

/// Reference to a registered transform plus its opaque options.
#[derive(Debug, Clone, Deserialize)]
pub struct TransformRef {
    pub transform: String,

    #[serde(default)]
    pub options: serde_json::Value,
}

impl TransformRef {
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            transform: name.to_string(),
            options: serde_json::Value::Null,
        }
    }
}

/// Dev server options.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Serve the entry HTML document for extensionless paths, so client-side
    /// routing survives a refresh.
    #[serde(default = "default_history_fallback")]
    pub history_fallback: bool,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            history_fallback: default_history_fallback(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("build")
}

fn default_extensions() -> Vec<String> {
    // Script extensions before style extensions.
    vec![".js", ".jsx", ".ts", ".tsx", ".css"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_threshold() -> u64 {
    8196
}

fn default_loader_timeout() -> u64 {
    10_000
}

fn default_port() -> u16 {
    3000
}

fn default_history_fallback() -> bool {
    true
}

/// Default rule set for projects without an explicit `rules` section:
/// scripts get import scanning, stylesheets get the JS injection wrapper,
/// JSON gets the JSON module wrapper. `node_modules` is excluded throughout.
fn default_rules() -> Vec<RuleConfig> {
    vec![
        RuleConfig {
            test: "**/*.{js,jsx,ts,tsx}".into(),
            exclude: Some("**/node_modules/**".into()),
            transforms: vec![TransformRef::named("script")],
        },
        RuleConfig {
            test: "**/*.css".into(),
            exclude: Some("**/node_modules/**".into()),
            transforms: vec![TransformRef::named("style")],
        },
        RuleConfig {
            test: "**/*.json".into(),
            exclude: Some("**/node_modules/**".into()),
            transforms: vec![TransformRef::named("json")],
        },
    ]
}

impl Config {
    /// Find a config file in the given root directory.
    #[must_use]
    pub fn find_config_file(root: &Path) -> Option<PathBuf> {
        CONFIG_FILES
            .iter()
            .map(|name| root.join(name))
            .find(|path| path.exists())
    }

    /// Load and validate configuration.
    ///
    /// With an explicit `config_path` that file is used; otherwise the root is
    /// searched. When no file exists, a default config is produced with
    /// `src/index.js` as the sole entry.
    pub fn load(
        root: &Path,
        config_path: Option<&Path>,
        known_transforms: &[&str],
    ) -> Result<Self, ConfigError> {
        let path = match config_path {
            Some(p) => {
                let abs = if p.is_absolute() {
                    p.to_path_buf()
                } else {
                    root.join(p)
                };
                Some(abs)
            }
            None => Self::find_config_file(root),
        };

        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                serde_json::from_str::<Config>(&text)
                    .map_err(|source| ConfigError::Parse { path, source })?
            }
            None => Self::default(),
        };

        config.validate(known_transforms)?;
        Ok(config)
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self, known_transforms: &[&str]) -> Result<(), ConfigError> {
        if self.entry.is_empty() {
            return Err(ConfigError::NoEntries);
        }

        if self.asset_threshold_bytes == 0 {
            return Err(ConfigError::InvalidThreshold(
                "threshold must be a positive byte count".into(),
            ));
        }

        for (index, rule) in self.rules.iter().enumerate() {
            if rule.transforms.is_empty() {
                return Err(ConfigError::InvalidRule {
                    index,
                    reason: "empty transform chain".into(),
                });
            }
            glob::Pattern::new(&expand_braces_check(&rule.test)).map_err(|e| {
                ConfigError::InvalidRule {
                    index,
                    reason: format!("bad test pattern '{}': {e}", rule.test),
                }
            })?;
            if let Some(exclude) = &rule.exclude {
                glob::Pattern::new(exclude).map_err(|e| ConfigError::InvalidRule {
                    index,
                    reason: format!("bad exclude pattern '{exclude}': {e}"),
                })?;
            }
            for t in &rule.transforms {
                if !known_transforms.contains(&t.transform.as_str()) {
                    return Err(ConfigError::InvalidRule {
                        index,
                        reason: format!("unknown transform '{}'", t.transform),
                    });
                }
            }
        }

        Ok(())
    }
}

/// `glob::Pattern` has no brace expansion; patterns like `*.{js,ts}` are
/// expanded into alternatives before compilation. For validation it is enough
/// to check the first alternative.
fn expand_braces_check(pattern: &str) -> String {
    crate::loader::expand_braces(pattern)
        .into_iter()
        .next()
        .unwrap_or_else(|| pattern.to_string())
}

impl Default for Config {
    fn default() -> Self {
        let mut entry = BTreeMap::new();
        entry.insert("index".to_string(), PathBuf::from("src/index.js"));
        Self {
            entry,
            output_dir: default_output_dir(),
            resolve: ResolveConfig::default(),
            rules: default_rules(),
            asset_threshold_bytes: default_threshold(),
            loader_timeout_ms: default_loader_timeout(),
            dev_server: DevServerConfig::default(),
        }
    }
}
