//! Dev-loop building blocks: the server phase machine, live-update events,
//! change debouncing, and the artifact store the HTTP layer serves from.
//!
//! The store is stale-while-revalidate: a rebuild in progress never makes
//! previously published artifacts unavailable, and a stale build generation
//! can never overwrite a newer one.

use crate::emit::OutputFile;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Where the dev server is in its serve/rebuild cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerPhase {
    #[default]
    Idle,
    Building,
    Serving,
    Stopped,
}

/// Live-update notification pushed to connected clients, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UpdateEvent {
    /// The page must reload wholesale (output file set changed, or first
    /// successful build).
    Reload { affected: Vec<String> },
    /// An incremental rebuild succeeded; only these module keys changed.
    Patch { affected: Vec<String> },
    /// A rebuild failed; previous artifacts are still being served.
    Error { message: String },
}

/// Coalesces bursts of filesystem events into one rebuild per quiet window.
#[derive(Debug)]
pub struct ChangeDebouncer {
    window: Duration,
    pending: FxHashSet<PathBuf>,
    deadline: Option<Instant>,
}

impl ChangeDebouncer {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: FxHashSet::default(),
            deadline: None,
        }
    }

    /// Record a changed path. Every event pushes the deadline out, so a
    /// rapid burst settles into a single batch.
    pub fn push(&mut self, path: PathBuf, now: Instant) {
        self.pending.insert(path);
        self.deadline = Some(now + self.window);
    }

    /// Take the batch if the quiet window has elapsed.
    pub fn take_ready(&mut self, now: Instant) -> Option<Vec<PathBuf>> {
        let deadline = self.deadline?;
        if now < deadline || self.pending.is_empty() {
            return None;
        }
        self.deadline = None;
        Some(self.pending.drain().collect())
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }
}

#[derive(Debug, Default)]
struct ArtifactState {
    files: HashMap<String, Arc<Vec<u8>>>,
    generation: u64,
    has_build: bool,
    last_error: Option<String>,
    phase: ServerPhase,
}

/// Shared, lock-guarded view of the last good build's output files.
#[derive(Debug, Default)]
pub struct ArtifactStore {
    inner: RwLock<ArtifactState>,
}

impl ArtifactStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a build's outputs. Returns false (and changes nothing) when a
    /// newer generation has already been committed.
    pub fn publish(&self, generation: u64, outputs: &[OutputFile]) -> bool {
        let mut state = self.inner.write().unwrap();
        if generation <= state.generation && state.has_build {
            return false;
        }
        state.files = outputs
            .iter()
            .map(|o| (o.name.clone(), Arc::new(o.data.clone())))
            .collect();
        state.generation = generation;
        state.has_build = true;
        state.last_error = None;
        true
    }

    /// Record a failed pass. Existing artifacts stay served.
    pub fn record_failure(&self, generation: u64, message: String) {
        let mut state = self.inner.write().unwrap();
        if generation >= state.generation {
            state.last_error = Some(message);
        }
    }

    /// Look up a published file by its output-relative name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Vec<u8>>> {
        self.inner.read().unwrap().files.get(name).cloned()
    }

    /// Names of all published files, unordered.
    #[must_use]
    pub fn file_names(&self) -> Vec<String> {
        self.inner.read().unwrap().files.keys().cloned().collect()
    }

    /// True once any build has been published.
    #[must_use]
    pub fn ready(&self) -> bool {
        self.inner.read().unwrap().has_build
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.read().unwrap().generation
    }

    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.inner.read().unwrap().last_error.clone()
    }

    /// Advance the serve/rebuild cycle. `Stopped` is terminal; later
    /// transitions (a build thread outliving shutdown) are ignored.
    pub fn set_phase(&self, phase: ServerPhase) {
        let mut state = self.inner.write().unwrap();
        if state.phase != ServerPhase::Stopped {
            state.phase = phase;
        }
    }

    #[must_use]
    pub fn phase(&self) -> ServerPhase {
        self.inner.read().unwrap().phase
    }
}

/// MIME type for serving a published file over HTTP.
#[must_use]
pub fn content_type_for(name: &str) -> &'static str {
    match name.rsplit('.').next().unwrap_or_default() {
        "html" => "text/html; charset=utf-8",
        "js" => "text/javascript; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "json" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "gif" => "image/gif",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, data: &[u8]) -> OutputFile {
        OutputFile {
            name: name.to_string(),
            data: data.to_vec(),
        }
    }

    #[test]
    fn test_update_event_wire_shape() {
        let event = UpdateEvent::Patch {
            affected: vec!["/src/a.js".to_string()],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"patch","affected":["/src/a.js"]}"#);

        let back: UpdateEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);

        let err = serde_json::to_string(&UpdateEvent::Error {
            message: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(err, r#"{"type":"error","message":"boom"}"#);
    }

    #[test]
    fn test_store_serves_latest_published_build() {
        let store = ArtifactStore::new();
        assert!(!store.ready());
        assert!(store.get("main.js").is_none());

        assert!(store.publish(1, &[file("main.js", b"one")]));
        assert!(store.ready());
        assert_eq!(store.get("main.js").unwrap().as_slice(), b"one");

        assert!(store.publish(2, &[file("main.js", b"two")]));
        assert_eq!(store.get("main.js").unwrap().as_slice(), b"two");
    }

    #[test]
    fn test_store_rejects_superseded_generation() {
        let store = ArtifactStore::new();
        assert!(store.publish(5, &[file("main.js", b"new")]));
        assert!(!store.publish(3, &[file("main.js", b"stale")]));
        assert_eq!(store.get("main.js").unwrap().as_slice(), b"new");
        assert_eq!(store.generation(), 5);
    }

    #[test]
    fn test_store_keeps_artifacts_across_failures() {
        let store = ArtifactStore::new();
        store.publish(1, &[file("main.js", b"good")]);
        store.record_failure(2, "broken import".to_string());
        assert_eq!(store.get("main.js").unwrap().as_slice(), b"good");
        assert_eq!(store.last_error().unwrap(), "broken import");

        // A later success clears the error.
        store.publish(3, &[file("main.js", b"fixed")]);
        assert!(store.last_error().is_none());
    }

    #[test]
    fn test_phase_cycle_and_terminal_stop() {
        let store = ArtifactStore::new();
        assert_eq!(store.phase(), ServerPhase::Idle);

        store.set_phase(ServerPhase::Building);
        assert_eq!(store.phase(), ServerPhase::Building);

        store.publish(1, &[file("main.js", b"one")]);
        store.set_phase(ServerPhase::Serving);
        assert_eq!(store.phase(), ServerPhase::Serving);

        // Stopped is terminal: a straggling build pass cannot resurrect it.
        store.set_phase(ServerPhase::Stopped);
        store.set_phase(ServerPhase::Building);
        assert_eq!(store.phase(), ServerPhase::Stopped);
    }

    #[test]
    fn test_debouncer_coalesces_bursts() {
        let mut debouncer = ChangeDebouncer::new(Duration::from_millis(50));
        let start = Instant::now();
        debouncer.push(PathBuf::from("/p/a.js"), start);
        debouncer.push(PathBuf::from("/p/b.js"), start + Duration::from_millis(10));
        debouncer.push(PathBuf::from("/p/a.js"), start + Duration::from_millis(20));

        // Still inside the window.
        assert!(debouncer.take_ready(start + Duration::from_millis(30)).is_none());

        let batch = debouncer
            .take_ready(start + Duration::from_millis(200))
            .unwrap();
        assert_eq!(batch.len(), 2);
        assert!(debouncer.is_idle());
        assert!(debouncer.take_ready(start + Duration::from_secs(1)).is_none());
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for("index.html"), "text/html; charset=utf-8");
        assert_eq!(content_type_for("main.js"), "text/javascript; charset=utf-8");
        assert_eq!(content_type_for("assets/logo.png"), "image/png");
        assert_eq!(content_type_for("blob"), "application/octet-stream");
    }
}
