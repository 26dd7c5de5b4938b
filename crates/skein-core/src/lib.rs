#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

pub mod assets;
pub mod build;
pub mod config;
pub mod dev;
pub mod emit;
pub mod error;
pub mod graph;
pub mod loader;
pub mod resolver;
pub mod transforms;

pub use assets::{AssetNamer, AssetPolicy, Classified};
pub use build::{BuildCoordinator, BuildOutcome};
pub use config::Config;
pub use dev::{ArtifactStore, ChangeDebouncer, ServerPhase, UpdateEvent};
pub use emit::OutputFile;
pub use error::{BuildIssue, Error};
pub use graph::{Module, ModuleGraph, ModuleId, ModuleKind};
pub use loader::{Pipeline, Transform, TransformOutput, TransformRegistry};
pub use resolver::Resolver;
