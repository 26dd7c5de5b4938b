//! `skein build` command implementation.

use super::Engine;
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use skein_core::emit;
use std::path::PathBuf;
use std::time::Instant;

pub const BUILD_SCHEMA_VERSION: u32 = 1;

/// Build command action.
#[derive(Debug, Clone)]
pub struct BuildAction {
    pub cwd: PathBuf,
    pub config: Option<PathBuf>,
    pub out_dir: Option<PathBuf>,
}

/// Build result for JSON output (stable contract).
#[derive(Serialize)]
struct BuildResultJson {
    schema_version: u32,
    cwd: String,
    ok: bool,
    generation: u64,
    modules: usize,
    outputs: Vec<String>,
    issues: Vec<IssueJson>,
    duration_ms: u64,
    notes: Vec<String>,
}

#[derive(Serialize)]
struct IssueJson {
    code: String,
    message: String,
}

/// Run the build command: one pass, write outputs, exit non-zero on any
/// resolution, loader or emit failure.
pub fn run(action: BuildAction, json: bool) -> Result<()> {
    let start = Instant::now();
    let mut engine = Engine::new(&action.cwd, action.config.as_deref())?;
    let out_dir = action
        .out_dir
        .map(|d| {
            if d.is_absolute() {
                d
            } else {
                engine.root.join(d)
            }
        })
        .unwrap_or_else(|| engine.output_dir());

    let outcome = engine.build();
    let issues: Vec<IssueJson> = outcome
        .issues
        .iter()
        .map(|issue| IssueJson {
            code: issue.code().to_string(),
            message: issue.to_string(),
        })
        .collect();

    if !outcome.ok() {
        return finish(
            json,
            BuildResultJson {
                schema_version: BUILD_SCHEMA_VERSION,
                cwd: engine.root.display().to_string(),
                ok: false,
                generation: outcome.generation,
                modules: engine.module_count(),
                outputs: Vec::new(),
                issues,
                duration_ms: duration_ms(start),
                notes: Vec::new(),
            },
        );
    }

    let outputs = match engine.plan(&outcome.entries, &[]) {
        Ok(outputs) => outputs,
        Err(e) => {
            return finish(
                json,
                BuildResultJson {
                    schema_version: BUILD_SCHEMA_VERSION,
                    cwd: engine.root.display().to_string(),
                    ok: false,
                    generation: outcome.generation,
                    modules: engine.module_count(),
                    outputs: Vec::new(),
                    issues: vec![IssueJson {
                        code: "EMIT_ERROR".to_string(),
                        message: e.to_string(),
                    }],
                    duration_ms: duration_ms(start),
                    notes: Vec::new(),
                },
            );
        }
    };

    emit::write_outputs(&out_dir, &outputs).into_diagnostic()?;

    finish(
        json,
        BuildResultJson {
            schema_version: BUILD_SCHEMA_VERSION,
            cwd: engine.root.display().to_string(),
            ok: true,
            generation: outcome.generation,
            modules: engine.module_count(),
            outputs: outputs.into_iter().map(|o| o.name).collect(),
            issues,
            duration_ms: duration_ms(start),
            notes: Vec::new(),
        },
    )
}

fn duration_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn finish(json: bool, result: BuildResultJson) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).into_diagnostic()?
        );
    } else if result.ok {
        println!(
            "Built {} module{} into {} output file{} ({}ms)",
            result.modules,
            if result.modules == 1 { "" } else { "s" },
            result.outputs.len(),
            if result.outputs.len() == 1 { "" } else { "s" },
            result.duration_ms,
        );
        for name in &result.outputs {
            println!("  {name}");
        }
    } else {
        eprintln!(
            "Build failed with {} error{}:",
            result.issues.len(),
            if result.issues.len() == 1 { "" } else { "s" },
        );
        for issue in &result.issues {
            eprintln!("  [{}] {}", issue.code, issue.message);
        }
    }

    if result.ok {
        Ok(())
    } else {
        std::process::exit(1);
    }
}
