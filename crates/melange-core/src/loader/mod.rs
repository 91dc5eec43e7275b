//! Module loaders.
//!
//! A loader is the evaluation mechanism the bridge calls out to. Two are
//! provided: JSON documents on disk and an external host program. Custom
//! loaders implement [`ModuleLoader`].

mod command;
mod json;
mod traits;

pub use command::CommandModuleLoader;
pub use json::JsonModuleLoader;
pub use traits::{EvaluationContext, ModuleLoader};

use crate::config::LoaderConfig;
use std::sync::Arc;

/// Build the loader described by a config.
pub fn build_loader(config: &LoaderConfig) -> Arc<dyn ModuleLoader> {
    match config {
        LoaderConfig::Json { root: Some(root) } => Arc::new(JsonModuleLoader::with_root(root)),
        LoaderConfig::Json { root: None } => Arc::new(JsonModuleLoader::new()),
        LoaderConfig::Command {
            program,
            args,
            working_dir,
        } => {
            let mut loader = CommandModuleLoader::new(program.clone()).with_args(args.clone());
            if let Some(dir) = working_dir {
                loader = loader.with_working_dir(dir);
            }
            Arc::new(loader)
        }
    }
}
