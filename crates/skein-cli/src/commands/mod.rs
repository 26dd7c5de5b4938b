pub mod build;
pub mod serve;

use miette::{IntoDiagnostic, Result};
use skein_core::assets::AssetPolicy;
use skein_core::build::{BuildCoordinator, BuildOutcome};
use skein_core::config::Config;
use skein_core::emit::{self, OutputFile};
use skein_core::error::EmitError;
use skein_core::graph::{ModuleGraph, ModuleId};
use skein_core::loader::{Pipeline, TransformRegistry};
use skein_core::resolver::Resolver;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// A configured bundling engine rooted at one project directory. Both
/// commands drive the same engine; `serve` just keeps it alive across
/// incremental passes.
pub struct Engine {
    pub config: Config,
    pub root: PathBuf,
    pub entries: Vec<(String, PathBuf)>,
    coordinator: BuildCoordinator,
    graph: ModuleGraph,
}

impl Engine {
    /// Load config and wire up resolver, pipeline and coordinator. Any
    /// configuration problem is fatal here, before a build starts.
    pub fn new(cwd: &Path, config_path: Option<&Path>) -> Result<Self> {
        let root = dunce::canonicalize(cwd).unwrap_or_else(|_| cwd.to_path_buf());

        let registry = TransformRegistry::with_builtins();
        let known = registry.names();
        let config = Config::load(&root, config_path, &known).into_diagnostic()?;

        let resolver = Arc::new(Resolver::new(root.clone(), &config.resolve));
        let registry = Arc::new(registry);
        let pipeline = Arc::new(
            Pipeline::new(
                &config.rules,
                registry,
                Duration::from_millis(config.loader_timeout_ms),
            )
            .into_diagnostic()?,
        );
        let policy = AssetPolicy::new(config.asset_threshold_bytes);
        let coordinator = BuildCoordinator::new(resolver, pipeline, policy);

        let entries: Vec<(String, PathBuf)> = config
            .entry
            .iter()
            .map(|(name, path)| (name.clone(), path.clone()))
            .collect();

        Ok(Self {
            config,
            root,
            entries,
            coordinator,
            graph: ModuleGraph::new(),
        })
    }

    pub fn build(&mut self) -> BuildOutcome {
        self.coordinator.build(&mut self.graph, &self.entries)
    }

    pub fn rebuild(&mut self, changed: &[PathBuf]) -> BuildOutcome {
        self.coordinator
            .rebuild(&mut self.graph, &self.entries, changed)
    }

    /// Render output files for a successful pass.
    pub fn plan(
        &self,
        entries: &[(String, ModuleId)],
        extra_scripts: &[&str],
    ) -> std::result::Result<Vec<OutputFile>, EmitError> {
        emit::plan(&self.graph, entries, extra_scripts)
    }

    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        if self.config.output_dir.is_absolute() {
            self.config.output_dir.clone()
        } else {
            self.root.join(&self.config.output_dir)
        }
    }

    #[must_use]
    pub fn module_count(&self) -> usize {
        self.graph.len()
    }
}
