//
// kernel_spec.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the MIT License. See LICENSE.txt for license information.
//
//

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::KBError;

/// The token in a kernel's argv that is replaced with the connection file path.
pub const CONNECTION_FILE_PLACEHOLDER: &str = "{connection_file}";

/// The token in a kernel's argv that is replaced with the kernel's resource
/// directory.
pub const RESOURCE_DIR_PLACEHOLDER: &str = "{resource_dir}";

/// From the Jupyter documentation for [Kernel Specs](https://jupyter-client.readthedocs.io/en/stable/kernels.html#kernel-specs).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KernelSpec {
    /// List of command line arguments to be used to start the kernel
    pub argv: Vec<String>,

    // The kernel name as it should be displayed in the UI
    pub display_name: String,

    // The kernel's language
    pub language: String,

    // Environment variables to set for the kernel
    #[serde(default)]
    pub env: serde_json::Map<String, Value>,

    /// Whether the kernel sends its shutdown reply on the shell socket only
    /// (rather than on control); such kernels never publish the idle status
    /// that normally completes a shutdown.
    #[serde(default)]
    pub shutdown_on_shell: bool,
}

impl KernelSpec {
    /// The default kernel spec for a language, or None if we don't know how
    /// to start a kernel for it.
    pub fn default_for(language: &str) -> Option<Self> {
        // Kernels not installed yet keep their bare name, resolved at launch
        let lookup = |name: &str| {
            which::which(name)
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_else(|_| name.to_string())
        };
        let (argv, display_name, shutdown_on_shell) = match language {
            "python" => (
                vec![
                    "python3",
                    "-m",
                    "ipykernel_launcher",
                    "-f",
                    CONNECTION_FILE_PLACEHOLDER,
                ]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>(),
                "Python 3",
                false,
            ),
            "go" => (
                vec![
                    lookup("gonb"),
                    String::from("--kernel"),
                    String::from(CONNECTION_FILE_PLACEHOLDER),
                    String::from("--logtostderr"),
                ],
                "Go (gonb)",
                true,
            ),
            "javascript" => (
                vec![
                    lookup("deno"),
                    String::from("jupyter"),
                    String::from("--kernel"),
                    String::from("--conn"),
                    String::from(CONNECTION_FILE_PLACEHOLDER),
                ],
                "Deno",
                false,
            ),
            "java" => (
                vec![
                    lookup("java"),
                    String::from("-jar"),
                    format!("{}/jjava-launcher.jar", RESOURCE_DIR_PLACEHOLDER),
                    format!("{}/jjava.jar", RESOURCE_DIR_PLACEHOLDER),
                    String::from(CONNECTION_FILE_PLACEHOLDER),
                ],
                "Java (JJava)",
                false,
            ),
            _ => return None,
        };
        Some(Self {
            argv,
            display_name: display_name.to_string(),
            language: language.to_string(),
            env: serde_json::Map::new(),
            shutdown_on_shell,
        })
    }

    /// The path of a language's kernel spec within a project.
    pub fn path_for(project_path: &Path, language: &str) -> PathBuf {
        project_path
            .join("code")
            .join(format!("{}-kernel.json", language))
    }

    /// Read the kernel spec for a language, writing the default spec first if
    /// the project doesn't have one yet.
    pub fn read_or_create(project_path: &Path, language: &str) -> Result<Self, KBError> {
        let path = Self::path_for(project_path, language);
        let io_err = |source| KBError::Io {
            path: path.display().to_string(),
            source,
        };

        if path.exists() {
            let file = File::open(&path).map_err(io_err)?;
            return serde_json::from_reader(BufReader::new(file)).map_err(|e| {
                KBError::Config(format!("invalid kernel spec {}: {}", path.display(), e))
            });
        }

        let spec = Self::default_for(language)
            .ok_or_else(|| KBError::UnsupportedLanguage(language.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let file = File::create(&path).map_err(io_err)?;
        serde_json::to_writer_pretty(file, &spec)
            .map_err(|e| KBError::Config(format!("failed to write {}: {}", path.display(), e)))?;
        log::debug!("Wrote default {} kernel spec to {}", language, path.display());
        Ok(spec)
    }

    /// The environment variables from the spec, as strings. Non-string values
    /// are written in their JSON form.
    pub fn env_vars(&self) -> Vec<(String, String)> {
        self.env
            .iter()
            .map(|(key, value)| match value {
                Value::String(s) => (key.clone(), s.clone()),
                other => (key.clone(), other.to_string()),
            })
            .collect()
    }
}
