// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Subprocess runner for an external STL viewer
//!
//! The viewer receives the exported face files in index order. Picks are
//! mapped back to faces through the manifest, not through the viewer.

use crate::io::FaceManifest;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

const DEFAULT_VIEWER: &str = "f3d";
const FILES_PLACEHOLDER: &str = "{files}";

/// Launches a viewer command such as `f3d {files}` or `meshlab`
pub struct ViewerRunner {
    template: String,
}

impl ViewerRunner {
    pub fn new(command: Option<&str>) -> Self {
        Self {
            template: command.unwrap_or(DEFAULT_VIEWER).to_string(),
        }
    }

    pub fn program(&self) -> Option<&str> {
        self.template.split_whitespace().next()
    }

    /// Check if the viewer program can be started
    pub fn is_available(&self) -> bool {
        self.program()
            .is_some_and(|program| Command::new(program).arg("--version").output().is_ok())
    }

    /// Program and arguments with `{files}` expanded, or files appended
    pub fn command_line(&self, files: &[PathBuf]) -> Result<(String, Vec<String>)> {
        let mut words = self.template.split_whitespace();
        let Some(program) = words.next() else {
            bail!("viewer command is empty");
        };
        let file_args = files.iter().map(|f| f.display().to_string());

        let mut args = Vec::new();
        let mut expanded = false;
        for word in words {
            if word == FILES_PLACEHOLDER {
                args.extend(file_args.clone());
                expanded = true;
            } else {
                args.push(word.to_string());
            }
        }
        if !expanded {
            args.extend(file_args);
        }
        Ok((program.to_string(), args))
    }

    /// Open the written faces of a manifest stored in `directory`
    pub fn show(&self, directory: &Path, manifest: &FaceManifest) -> Result<ExitStatus> {
        let files: Vec<PathBuf> = manifest
            .written()
            .filter_map(|entry| entry.file.as_ref())
            .map(|file| directory.join(file))
            .collect();
        if files.is_empty() {
            bail!("no exported faces in {}", directory.display());
        }

        let (program, args) = self.command_line(&files)?;
        if !self.is_available() {
            bail!("viewer '{program}' is not installed or not in PATH");
        }
        Command::new(&program)
            .args(&args)
            .status()
            .with_context(|| format!("Failed to launch viewer '{program}'"))
    }
}

impl Default for ViewerRunner {
    fn default() -> Self {
        Self::new(None)
    }
}
