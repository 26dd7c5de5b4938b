//! Output planning and writing.
//!
//! Emission is two-phase: `plan` renders every output file into memory (one
//! chunk per entry, emitted assets, a generated `index.html`), then
//! `write_outputs` puts them on disk through temp-file renames so a crash
//! mid-write never leaves a half-written artifact behind.

use crate::assets::Classified;
use crate::error::EmitError;
use crate::graph::{ModuleGraph, ModuleId};
use rustc_hash::FxHashMap;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// A fully rendered output artifact, path relative to the output directory.
#[derive(Debug, Clone)]
pub struct OutputFile {
    pub name: String,
    pub data: Vec<u8>,
}

/// Render all output files for the given entries. The graph must hold
/// compiled content for everything reachable from them.
pub fn plan(
    graph: &ModuleGraph,
    entries: &[(String, ModuleId)],
    extra_scripts: &[&str],
) -> Result<Vec<OutputFile>, EmitError> {
    let mut outputs: Vec<OutputFile> = Vec::new();
    let mut chunk_names: Vec<String> = Vec::new();
    let mut emitted: FxHashMap<String, ModuleId> = FxHashMap::default();

    for (name, entry_id) in entries {
        let reachable = graph.reachable(*entry_id);
        let order = graph.toposort_subset(&reachable);
        let chunk_name = format!("{name}.js");
        debug!(chunk = %chunk_name, modules = order.len(), "planning chunk");
        outputs.push(OutputFile {
            name: chunk_name.clone(),
            data: render_chunk(graph, &order, *entry_id).into_bytes(),
        });
        chunk_names.push(chunk_name);

        // Any emitted asset reachable from this chunk ships alongside it.
        // Chunks may share assets; each output path is written once.
        for id in reachable {
            let Some(module) = graph.get(id) else { continue };
            if let Some(Classified::Emitted { output_path }) = &module.asset {
                match emitted.get(output_path) {
                    None => {
                        emitted.insert(output_path.clone(), id);
                        outputs.push(OutputFile {
                            name: output_path.clone(),
                            data: module.raw.clone(),
                        });
                    }
                    Some(owner) if *owner == id => {}
                    Some(_) => {
                        return Err(EmitError::NamingCollision {
                            name: output_path.clone(),
                        })
                    }
                }
            }
        }
    }

    outputs.push(OutputFile {
        name: "index.html".to_string(),
        data: index_html(&chunk_names, extra_scripts).into_bytes(),
    });

    // Two artifacts sharing a name would silently clobber each other.
    let mut seen: FxHashMap<&str, ()> = FxHashMap::default();
    for output in &outputs {
        if seen.insert(output.name.as_str(), ()).is_some() {
            return Err(EmitError::NamingCollision {
                name: output.name.clone(),
            });
        }
    }

    Ok(outputs)
}

/// Write planned outputs under `output_dir`, each through a temp file in the
/// same directory tree followed by an atomic rename.
pub fn write_outputs(output_dir: &Path, outputs: &[OutputFile]) -> Result<(), EmitError> {
    std::fs::create_dir_all(output_dir).map_err(|source| EmitError::WriteFailure {
        path: output_dir.to_path_buf(),
        source,
    })?;

    for output in outputs {
        let target = output_dir.join(&output.name);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|source| EmitError::WriteFailure {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let mut tmp =
            NamedTempFile::new_in(output_dir).map_err(|source| EmitError::WriteFailure {
                path: target.clone(),
                source,
            })?;
        tmp.write_all(&output.data)
            .map_err(|source| EmitError::WriteFailure {
                path: target.clone(),
                source,
            })?;
        tmp.persist(&target).map_err(|e| EmitError::WriteFailure {
            path: target.clone(),
            source: e.error,
        })?;
    }
    Ok(())
}

/// Render one self-contained chunk: a module registry keyed by module key,
/// each record pairing a factory with its specifier map, plus a tiny
/// CommonJS-style runtime that loads the entry.
fn render_chunk(graph: &ModuleGraph, order: &[ModuleId], entry: ModuleId) -> String {
    let mut out = String::new();
    out.push_str("(function (modules, entryKey) {\n");
    out.push_str("  var cache = {};\n");
    out.push_str("  function load(key) {\n");
    out.push_str("    var hit = cache[key];\n");
    out.push_str("    if (hit) return hit.exports;\n");
    out.push_str("    var module = (cache[key] = { exports: {} });\n");
    out.push_str("    var record = modules[key];\n");
    out.push_str("    record[0](module, module.exports, function (specifier) {\n");
    out.push_str("      var mapped = record[1][specifier];\n");
    out.push_str("      return load(mapped === undefined ? specifier : mapped);\n");
    out.push_str("    });\n");
    out.push_str("    return module.exports;\n");
    out.push_str("  }\n");
    out.push_str("  load(entryKey);\n");
    out.push_str("})({\n");

    for (position, &id) in order.iter().enumerate() {
        let Some(module) = graph.get(id) else { continue };
        if position > 0 {
            out.push_str(",\n");
        }
        out.push_str(&json_str(&module.key));
        out.push_str(": [function (module, exports, require) {\n");
        out.push_str(&String::from_utf8_lossy(
            module.compiled.as_deref().unwrap_or_default(),
        ));
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("}, ");
        out.push_str(&specifier_map(graph, id));
        out.push(']');
    }

    out.push_str("\n}, ");
    let entry_key = graph.get(entry).map(|m| m.key.as_str()).unwrap_or_default();
    out.push_str(&json_str(entry_key));
    out.push_str(");\n");
    out
}

/// JSON object mapping a module's import specifiers to target module keys.
fn specifier_map(graph: &ModuleGraph, id: ModuleId) -> String {
    let mut map = serde_json::Map::new();
    if let Some(module) = graph.get(id) {
        for (specifier, target) in &module.dependencies {
            if let Some(dep) = graph.get(*target) {
                map.insert(
                    specifier.clone(),
                    serde_json::Value::String(dep.key.clone()),
                );
            }
        }
    }
    serde_json::Value::Object(map).to_string()
}

fn index_html(chunks: &[String], extra_scripts: &[&str]) -> String {
    let mut out = String::new();
    out.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    out.push_str("<meta charset=\"utf-8\">\n");
    out.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    out.push_str("<title>App</title>\n</head>\n<body>\n<div id=\"root\"></div>\n");
    for script in extra_scripts {
        out.push_str(&format!("<script src=\"{script}\"></script>\n"));
    }
    for chunk in chunks {
        out.push_str(&format!("<script src=\"/{chunk}\"></script>\n"));
    }
    out.push_str("</body>\n</html>\n");
    out
}

fn json_str(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetPolicy;
    use crate::build::BuildCoordinator;
    use crate::config::Config;
    use crate::loader::{Pipeline, TransformRegistry};
    use crate::resolver::Resolver;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn build_project(dir: &TempDir, entries: &[(String, PathBuf)]) -> (ModuleGraph, Vec<(String, ModuleId)>) {
        let config = Config::default();
        let resolver = Arc::new(Resolver::new(dir.path().to_path_buf(), &config.resolve));
        let registry = Arc::new(TransformRegistry::with_builtins());
        let pipeline =
            Arc::new(Pipeline::new(&config.rules, registry, Duration::from_secs(10)).unwrap());
        let mut coordinator =
            BuildCoordinator::new(resolver, pipeline, AssetPolicy::new(8196));
        let mut graph = ModuleGraph::new();
        let outcome = coordinator.build(&mut graph, entries);
        assert!(outcome.ok(), "issues: {:?}", outcome.issues);
        (graph, outcome.entries)
    }

    fn entry(name: &str, path: &str) -> (String, PathBuf) {
        (name.to_string(), PathBuf::from(path))
    }

    #[test]
    fn test_chunk_contains_every_reachable_module() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("index.js"), "import './util.js';\nconsole.log('up');\n")
            .unwrap();
        fs::write(dir.path().join("util.js"), "export const util = 7;\n").unwrap();

        let (graph, entries) = build_project(&dir, &[entry("main", "./index.js")]);
        let outputs = plan(&graph, &entries, &[]).unwrap();

        let chunk = outputs.iter().find(|o| o.name == "main.js").unwrap();
        let text = String::from_utf8(chunk.data.clone()).unwrap();
        assert!(text.contains("console.log('up')"));
        assert!(text.contains("const util = 7"));
        assert!(text.contains("\"./util.js\""));
    }

    #[test]
    fn test_inline_asset_data_uri_lands_in_the_chunk() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("index.js"), "import logo from './logo.png';\n").unwrap();
        fs::write(dir.path().join("logo.png"), vec![1u8; 2000]).unwrap();

        let (graph, entries) = build_project(&dir, &[entry("main", "./index.js")]);
        let outputs = plan(&graph, &entries, &[]).unwrap();

        let chunk = outputs.iter().find(|o| o.name == "main.js").unwrap();
        let text = String::from_utf8(chunk.data.clone()).unwrap();
        assert!(text.contains("data:image/png;base64,"));
        // Nothing under assets/ for an inlined file.
        assert!(!outputs.iter().any(|o| o.name.starts_with("assets/")));
    }

    #[test]
    fn test_emitted_asset_becomes_an_output_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("index.js"), "import banner from './banner.png';\n").unwrap();
        fs::write(dir.path().join("banner.png"), vec![2u8; 9000]).unwrap();

        let (graph, entries) = build_project(&dir, &[entry("main", "./index.js")]);
        let outputs = plan(&graph, &entries, &[]).unwrap();

        let asset = outputs.iter().find(|o| o.name == "assets/banner.png").unwrap();
        assert_eq!(asset.data.len(), 9000);
        let chunk = outputs.iter().find(|o| o.name == "main.js").unwrap();
        let text = String::from_utf8(chunk.data.clone()).unwrap();
        assert!(text.contains("\"/assets/banner.png\""));
    }

    #[test]
    fn test_index_html_references_every_chunk() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("one.js"), "console.log(1);\n").unwrap();
        fs::write(dir.path().join("two.js"), "console.log(2);\n").unwrap();

        let (graph, entries) =
            build_project(&dir, &[entry("one", "./one.js"), entry("two", "./two.js")]);
        let outputs = plan(&graph, &entries, &["/__skein_client.js"]).unwrap();

        let html = outputs.iter().find(|o| o.name == "index.html").unwrap();
        let text = String::from_utf8(html.data.clone()).unwrap();
        assert!(text.contains("<script src=\"/one.js\">"));
        assert!(text.contains("<script src=\"/two.js\">"));
        assert!(text.contains("<script src=\"/__skein_client.js\">"));
    }

    #[test]
    fn test_write_outputs_creates_nested_paths() {
        let dir = TempDir::new().unwrap();
        let out_dir = dir.path().join("dist");
        let outputs = vec![
            OutputFile { name: "main.js".into(), data: b"x".to_vec() },
            OutputFile { name: "assets/a.png".into(), data: b"y".to_vec() },
        ];
        write_outputs(&out_dir, &outputs).unwrap();
        assert_eq!(fs::read(out_dir.join("main.js")).unwrap(), b"x");
        assert_eq!(fs::read(out_dir.join("assets/a.png")).unwrap(), b"y");

        // Overwriting on a second pass replaces content in place.
        let outputs = vec![OutputFile { name: "main.js".into(), data: b"z".to_vec() }];
        write_outputs(&out_dir, &outputs).unwrap();
        assert_eq!(fs::read(out_dir.join("main.js")).unwrap(), b"z");
    }

    #[test]
    fn test_duplicate_output_name_is_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("index.js"), "console.log('x');\n").unwrap();
        let (graph, mut entries) = build_project(&dir, &[entry("main", "./index.js")]);
        // Two entries with the same chunk name collide.
        let cloned = entries[0].clone();
        entries.push(cloned);
        let err = plan(&graph, &entries, &[]).unwrap_err();
        assert!(matches!(err, EmitError::NamingCollision { .. }));
    }
}
