//! Module dependency graph.
//!
//! Modules are interned to dense indices; forward edges carry the original
//! specifier text, and reverse (dependent) edges are maintained alongside so
//! incremental invalidation can walk from a changed file to everything that
//! depends on it. Cycles are allowed and every traversal tolerates them.

use crate::assets::Classified;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// Dense index of a module within its graph.
pub type ModuleId = usize;

/// What a module is, decided by its path at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    Script,
    Style,
    Asset,
    Virtual,
}

impl ModuleKind {
    /// Classify a path: known asset extensions are assets, stylesheet
    /// extensions are styles, everything else compiles as a script.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        if crate::assets::AssetKind::is_asset(ext) {
            ModuleKind::Asset
        } else if matches!(ext.to_lowercase().as_str(), "css" | "scss" | "sass") {
            ModuleKind::Style
        } else {
            ModuleKind::Script
        }
    }
}

/// One resolved, compiled unit of source content.
#[derive(Debug, Clone)]
pub struct Module {
    /// Identity: normalized absolute path, plus a `?query` suffix for
    /// virtual/derived modules. Immutable once created.
    pub key: String,
    /// Backing file on disk.
    pub path: PathBuf,
    pub kind: ModuleKind,
    /// Raw file content. Cleared on invalidation.
    pub raw: Vec<u8>,
    /// Compiled output. `None` until the loader pipeline (or asset policy)
    /// has run for the current version.
    pub compiled: Option<Vec<u8>>,
    /// Forward edges in discovery order: `(specifier, target)`.
    pub dependencies: Vec<(String, ModuleId)>,
    /// Asset classification, set only for `ModuleKind::Asset`.
    pub asset: Option<Classified>,
    /// Size of the raw content, tracked for asset classification.
    pub size_bytes: u64,
    pub mime_hint: &'static str,
    /// Bumped on every invalidation; a module is compiled at most once per
    /// version.
    pub version: u64,
}

impl Module {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        let kind = ModuleKind::from_path(&path);
        let mime = crate::assets::mime_hint(&path);
        Self {
            key: path.to_string_lossy().into_owned(),
            path,
            kind,
            raw: Vec::new(),
            compiled: None,
            dependencies: Vec::new(),
            asset: None,
            size_bytes: 0,
            mime_hint: mime,
            version: 0,
        }
    }
}

/// The directed module graph, incrementally maintained.
#[derive(Debug, Default)]
pub struct ModuleGraph {
    modules: Vec<Module>,
    key_to_id: FxHashMap<String, ModuleId>,
    /// Backing path → module ids (query variants share a path).
    path_to_ids: FxHashMap<PathBuf, Vec<ModuleId>>,
    /// Reverse edges: who depends on each module.
    dependents: Vec<FxHashSet<ModuleId>>,
}

impl ModuleGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a module, returning its id. Adding a key twice returns the
    /// existing id unchanged: ModuleIds are unique and stable.
    pub fn add(&mut self, module: Module) -> ModuleId {
        if let Some(&id) = self.key_to_id.get(&module.key) {
            return id;
        }
        let id = self.modules.len();
        self.key_to_id.insert(module.key.clone(), id);
        self.path_to_ids
            .entry(module.path.clone())
            .or_default()
            .push(id);
        self.modules.push(module);
        self.dependents.push(FxHashSet::default());
        id
    }

    #[must_use]
    pub fn get(&self, id: ModuleId) -> Option<&Module> {
        self.modules.get(id)
    }

    pub fn get_mut(&mut self, id: ModuleId) -> Option<&mut Module> {
        self.modules.get_mut(id)
    }

    #[must_use]
    pub fn id_by_key(&self, key: &str) -> Option<ModuleId> {
        self.key_to_id.get(key).copied()
    }

    /// Module ids backed by the given path.
    #[must_use]
    pub fn ids_for_path(&self, path: &Path) -> Vec<ModuleId> {
        self.path_to_ids.get(path).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ModuleId, &Module)> {
        self.modules.iter().enumerate()
    }

    /// Replace a module's forward edges, keeping reverse edges consistent.
    pub fn set_dependencies(&mut self, id: ModuleId, deps: Vec<(String, ModuleId)>) {
        let old: Vec<ModuleId> = self.modules[id]
            .dependencies
            .iter()
            .map(|(_, target)| *target)
            .collect();
        for target in old {
            self.dependents[target].remove(&id);
        }
        for (_, target) in &deps {
            self.dependents[*target].insert(id);
        }
        self.modules[id].dependencies = deps;
    }

    /// Clear a module's content and bump its version. Edges stay in place
    /// until the next compile replaces them.
    pub fn invalidate(&mut self, id: ModuleId) {
        let module = &mut self.modules[id];
        module.raw.clear();
        module.compiled = None;
        module.asset = None;
        module.version += 1;
    }

    /// Everything that transitively depends on the seed set, seeds included,
    /// in BFS order from the seeds.
    #[must_use]
    pub fn dependents_closure(&self, seeds: &[ModuleId]) -> Vec<ModuleId> {
        let mut visited: FxHashSet<ModuleId> = FxHashSet::default();
        let mut order = Vec::new();
        let mut queue: VecDeque<ModuleId> = VecDeque::new();
        for &seed in seeds {
            if visited.insert(seed) {
                order.push(seed);
                queue.push_back(seed);
            }
        }
        while let Some(id) = queue.pop_front() {
            for &dependent in &self.dependents[id] {
                if visited.insert(dependent) {
                    order.push(dependent);
                    queue.push_back(dependent);
                }
            }
        }
        order
    }

    /// Modules reachable from `entry` over forward edges, in BFS discovery
    /// order, entry first. Cycles are fine: visited-set traversal.
    #[must_use]
    pub fn reachable(&self, entry: ModuleId) -> Vec<ModuleId> {
        let mut visited: FxHashSet<ModuleId> = FxHashSet::default();
        let mut order = Vec::new();
        let mut queue: VecDeque<ModuleId> = VecDeque::new();
        visited.insert(entry);
        order.push(entry);
        queue.push_back(entry);
        while let Some(id) = queue.pop_front() {
            for (_, target) in &self.modules[id].dependencies {
                if visited.insert(*target) {
                    order.push(*target);
                    queue.push_back(*target);
                }
            }
        }
        order
    }

    /// Order a module subset dependencies-first. Acyclic parts sort
    /// topologically (Kahn); members of cycles keep their position in the
    /// input (discovery) order, which JS-style lazy binding tolerates.
    #[must_use]
    pub fn toposort_subset(&self, subset: &[ModuleId]) -> Vec<ModuleId> {
        let members: FxHashSet<ModuleId> = subset.iter().copied().collect();
        let mut in_degree: FxHashMap<ModuleId, usize> =
            subset.iter().map(|&id| (id, 0)).collect();

        for &id in subset {
            for (_, target) in &self.modules[id].dependencies {
                if members.contains(target) && *target != id {
                    *in_degree.get_mut(&id).unwrap() += 1;
                }
            }
        }

        let mut queue: VecDeque<ModuleId> = subset
            .iter()
            .copied()
            .filter(|id| in_degree[id] == 0)
            .collect();
        let mut order = Vec::with_capacity(subset.len());
        let mut placed: FxHashSet<ModuleId> = FxHashSet::default();

        while let Some(id) = queue.pop_front() {
            if !placed.insert(id) {
                continue;
            }
            order.push(id);
            // This module is placed; release its dependents within the subset.
            for &dependent in &self.dependents[id] {
                if let Some(deg) = in_degree.get_mut(&dependent) {
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 && !placed.contains(&dependent) {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        // Cycle remainder, in input order.
        for &id in subset {
            if !placed.contains(&id) {
                placed.insert(id);
                order.push(id);
            }
        }

        order
    }
}
