//! `skein serve` command implementation.
//!
//! Long-running dev loop: bundle once, serve the outputs over HTTP, watch the
//! source tree, rebuild incrementally on change, and push update events to
//! connected clients over a WebSocket.
//!
//! Serving is stale-while-revalidate: while a rebuild runs (or fails), HTTP
//! requests keep getting the last good artifacts. Only before the first
//! successful build does the server answer with an error page. The server
//! never exits on a build failure, only on a termination signal.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path as AxumPath, State,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use miette::{IntoDiagnostic, Result};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use skein_core::dev::{content_type_for, ArtifactStore, ChangeDebouncer, ServerPhase, UpdateEvent};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use super::Engine;

const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);
const WATCH_POLL: Duration = Duration::from_millis(25);

/// Dev server action.
#[derive(Debug, Clone)]
pub struct ServeAction {
    pub cwd: PathBuf,
    pub port: Option<u16>,
    pub host: String,
    pub config: Option<PathBuf>,
    pub open: bool,
}

/// Shared state for the HTTP layer. The engine itself lives on the build
/// thread; handlers only ever touch the artifact store.
struct ServeState {
    store: Arc<ArtifactStore>,
    update_tx: broadcast::Sender<UpdateEvent>,
    history_fallback: bool,
}

/// Run the dev server.
pub async fn run(action: ServeAction) -> Result<()> {
    let mut engine = Engine::new(&action.cwd, action.config.as_deref())?;
    let port = action.port.unwrap_or(engine.config.dev_server.port);
    let history_fallback = engine.config.dev_server.history_fallback;
    let root = engine.root.clone();
    let out_dir = engine.output_dir();

    let store = Arc::new(ArtifactStore::new());
    let (update_tx, _) = broadcast::channel::<UpdateEvent>(16);

    // First pass before the server accepts connections, so the common case
    // starts in `Serving` rather than answering with an error page.
    info!(root = %root.display(), "initial build");
    run_pass(&mut engine, &store, &update_tx, None);

    // Build loop: watch, debounce, rebuild, publish. The module graph is not
    // shared; it stays owned by this one thread.
    let loop_store = Arc::clone(&store);
    let loop_tx = update_tx.clone();
    let watch_root = root.clone();
    std::thread::spawn(move || {
        if let Err(e) = build_loop(engine, &watch_root, &out_dir, &loop_store, &loop_tx) {
            warn!("build loop stopped: {e}");
        }
    });

    let state = Arc::new(ServeState {
        store: Arc::clone(&store),
        update_tx,
        history_fallback,
    });

    let app = Router::new()
        .route("/", get(serve_index))
        .route("/__updates", get(updates_websocket))
        .route("/__skein_client.js", get(serve_client_runtime))
        .route("/*path", get(serve_file))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let host_ip = if action.host == "localhost" {
        "127.0.0.1".to_string()
    } else {
        action.host.clone()
    };
    let addr: SocketAddr = format!("{host_ip}:{port}").parse().into_diagnostic()?;

    println!();
    println!("  Dev server running at http://localhost:{port}");
    println!("  Live reload enabled");
    println!();
    println!("  Press Ctrl+C to stop");
    println!();

    if action.open {
        let _ = open_browser(&format!("http://{}:{port}", action.host));
    }

    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .into_diagnostic()?;

    store.set_phase(ServerPhase::Stopped);
    info!(phase = ?store.phase(), "dev server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Open a URL in the default browser.
fn open_browser(url: &str) -> std::io::Result<()> {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg(url).spawn()?;
    }
    #[cfg(target_os = "linux")]
    {
        std::process::Command::new("xdg-open").arg(url).spawn()?;
    }
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("cmd")
            .args(["/C", "start", url])
            .spawn()?;
    }
    Ok(())
}

// ============================================================================
// Build loop
// ============================================================================

/// Run one pass (full or incremental) and publish the result.
fn run_pass(
    engine: &mut Engine,
    store: &ArtifactStore,
    update_tx: &broadcast::Sender<UpdateEvent>,
    changed: Option<&[PathBuf]>,
) {
    store.set_phase(ServerPhase::Building);
    let previous_names = sorted_names(store);
    let outcome = match changed {
        Some(paths) => engine.rebuild(paths),
        None => engine.build(),
    };

    if !outcome.ok() {
        let message = outcome
            .issues
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        warn!(generation = outcome.generation, "build failed:\n{message}");
        store.record_failure(outcome.generation, message.clone());
        let _ = update_tx.send(UpdateEvent::Error { message });
        store.set_phase(ServerPhase::Serving);
        return;
    }

    let outputs = match engine.plan(&outcome.entries, &["/__skein_client.js"]) {
        Ok(outputs) => outputs,
        Err(e) => {
            let message = e.to_string();
            warn!(generation = outcome.generation, "emit failed: {message}");
            store.record_failure(outcome.generation, message.clone());
            let _ = update_tx.send(UpdateEvent::Error { message });
            store.set_phase(ServerPhase::Serving);
            return;
        }
    };

    // A stale pass loses the publish race and is dropped silently.
    if !store.publish(outcome.generation, &outputs) {
        debug!(generation = outcome.generation, "pass superseded, result discarded");
        store.set_phase(ServerPhase::Serving);
        return;
    }

    // A changed output file set means stale script tags; force a reload.
    // Content-only changes ride a patch event.
    let event = if changed.is_some() && sorted_names(store) == previous_names {
        UpdateEvent::Patch {
            affected: outcome.affected,
        }
    } else {
        UpdateEvent::Reload {
            affected: outcome.affected,
        }
    };
    let _ = update_tx.send(event);
    store.set_phase(ServerPhase::Serving);
}

fn sorted_names(store: &ArtifactStore) -> Vec<String> {
    let mut names = store.file_names();
    names.sort();
    names
}

/// Watch the project root and drive incremental passes until the watcher
/// channel closes.
fn build_loop(
    mut engine: Engine,
    root: &Path,
    out_dir: &Path,
    store: &ArtifactStore,
    update_tx: &broadcast::Sender<UpdateEvent>,
) -> notify::Result<()> {
    let (tx, rx) = std::sync::mpsc::channel();
    let mut watcher = RecommendedWatcher::new(tx, notify::Config::default())?;
    watcher.watch(root, RecursiveMode::Recursive)?;

    let mut debouncer = ChangeDebouncer::new(DEBOUNCE_WINDOW);
    loop {
        match rx.recv_timeout(WATCH_POLL) {
            Ok(Ok(event)) => {
                let now = Instant::now();
                for path in event.paths {
                    if !should_ignore(&path, out_dir) {
                        debouncer.push(path, now);
                    }
                }
            }
            Ok(Err(e)) => warn!("watch error: {e}"),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return Ok(()),
        }

        if let Some(batch) = debouncer.take_ready(Instant::now()) {
            debug!(changed = batch.len(), "rebuilding");
            run_pass(&mut engine, store, update_tx, Some(&batch));
            debug!(phase = ?store.phase(), "rebuild done");
        }
    }
}

/// Paths the watcher never reacts to: build outputs, VCS internals,
/// dependencies, dotfiles.
fn should_ignore(path: &Path, out_dir: &Path) -> bool {
    if path.starts_with(out_dir) {
        return true;
    }
    let path_str = path.to_string_lossy();
    if path_str.contains("/node_modules/")
        || path_str.contains("/.git/")
        || path_str.contains("/target/")
    {
        return true;
    }
    if let Some(name) = path.file_name() {
        if name.to_string_lossy().starts_with('.') {
            return true;
        }
    }
    false
}

// ============================================================================
// Route handlers
// ============================================================================

async fn serve_index(State(state): State<Arc<ServeState>>) -> Response {
    artifact_response(&state, "index.html")
}

async fn serve_file(
    State(state): State<Arc<ServeState>>,
    AxumPath(path): AxumPath<String>,
) -> Response {
    // Cache-busting queries are not part of the artifact name.
    let name = path.split('?').next().unwrap_or(&path);

    if state.store.get(name).is_some() {
        return artifact_response(&state, name);
    }

    // Extensionless misses are client-side routes when history fallback is
    // enabled; hand those the entry document.
    let extensionless = !name.rsplit('/').next().unwrap_or(name).contains('.');
    if state.history_fallback && extensionless {
        return artifact_response(&state, "index.html");
    }

    if !state.store.ready() {
        return build_error_page(&state.store);
    }

    (StatusCode::NOT_FOUND, format!("Not found: /{name}")).into_response()
}

fn artifact_response(state: &ServeState, name: &str) -> Response {
    match state.store.get(name) {
        Some(data) => Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", content_type_for(name))
            .header("Cache-Control", "no-cache")
            .body(axum::body::Body::from(data.as_ref().clone()))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        None => build_error_page(&state.store),
    }
}

/// Shown only before the first successful build (or for a missing entry
/// document). Carries the client runtime so the page heals itself once a
/// build succeeds.
fn build_error_page(store: &ArtifactStore) -> Response {
    let message = store
        .last_error()
        .unwrap_or_else(|| "no build has completed yet".to_string());
    let html = format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>skein: build error</title>\n\
         <script src=\"/__skein_client.js\"></script>\n</head>\n<body style=\"font-family: monospace; padding: 2em;\">\n\
         <h1>Build error</h1>\n<pre>{}</pre>\n</body>\n</html>\n",
        html_escape(&message)
    );
    (StatusCode::INTERNAL_SERVER_ERROR, Html(html)).into_response()
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

async fn serve_client_runtime() -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/javascript; charset=utf-8")
        .header("Cache-Control", "no-cache")
        .body(axum::body::Body::from(CLIENT_RUNTIME))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Browser-side runtime served at `/__skein_client.js`.
const CLIENT_RUNTIME: &str = r#"(function () {
  var proto = location.protocol === "https:" ? "wss://" : "ws://";
  var socket = new WebSocket(proto + location.host + "/__updates");
  socket.onmessage = function (msg) {
    var event;
    try {
      event = JSON.parse(msg.data);
    } catch (e) {
      return;
    }
    if (event.type === "reload" || event.type === "patch") {
      location.reload();
    } else if (event.type === "error") {
      console.error("[skein] build error:\n" + event.message);
    }
  };
  socket.onclose = function () {
    setTimeout(function () { location.reload(); }, 1000);
  };
})();
"#;

// ============================================================================
// WebSocket updates
// ============================================================================

async fn updates_websocket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServeState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_updates_socket(socket, state))
}

/// Forward update events to one client, in order, until either side closes.
async fn handle_updates_socket(mut socket: WebSocket, state: Arc<ServeState>) {
    let mut rx = state.update_tx.subscribe();

    // A client connecting mid-failure should see the error immediately.
    if let Some(message) = state.store.last_error() {
        let event = UpdateEvent::Error { message };
        if let Ok(json) = serde_json::to_string(&event) {
            let _ = socket.send(Message::Text(json)).await;
        }
    }

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Ok(event) = event else { break };
                let Ok(json) = serde_json::to_string(&event) else { continue };
                if socket.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
}
