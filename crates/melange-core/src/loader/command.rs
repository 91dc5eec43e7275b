//! External program loader.
//!
//! Evaluates a module by running a host program with the identifier as its
//! last argument and decoding its standard output as JSON. This is how a
//! module written for another runtime (for example a Node script that
//! `require`s the module and prints `JSON.stringify` of it) gets evaluated.

use super::traits::{EvaluationContext, ModuleLoader};
use crate::error::{BridgeError, Result};
use crate::value::ModuleValue;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::debug;

/// Runs a host program per evaluation.
#[derive(Debug, Clone)]
pub struct CommandModuleLoader {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandModuleLoader {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    /// Arguments placed before the identifier.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

impl ModuleLoader for CommandModuleLoader {
    fn name(&self) -> &'static str {
        "command"
    }

    fn evaluate(&self, identifier: &str, _ctx: &mut EvaluationContext<'_>) -> Result<ModuleValue> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(identifier)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        debug!("Running {} for {}", self.program, identifier);
        let output = cmd.output().map_err(|e| {
            BridgeError::resolution(identifier, format!("failed to run {}: {}", self.program, e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BridgeError::resolution(
                identifier,
                format!("{} exited with {}: {}", self.program, output.status, stderr.trim()),
            ));
        }

        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Err(BridgeError::resolution(
                identifier,
                format!("{} produced no output", self.program),
            ));
        }

        let value: serde_json::Value = serde_json::from_slice(&output.stdout).map_err(|e| {
            BridgeError::resolution(identifier, format!("output is not valid JSON: {}", e))
        })?;

        Ok(ModuleValue::from(value))
    }
}
