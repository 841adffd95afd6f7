//
// environment.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the MIT License. See LICENSE.txt for license information.
//
//

//! Environment variable and executable resolution for kernel processes.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use crate::{error::KBError, kernel_spec::KernelSpec};

/// The file that marks a directory as a Python virtual environment.
const PYVENV_CFG: &str = "pyvenv.cfg";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarActionType {
    Replace,
    Append,
    Prepend,
}

/// A change to one environment variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarAction {
    pub name: String,
    pub value: String,
    pub action: VarActionType,
}

impl VarAction {
    pub fn replace(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            action: VarActionType::Replace,
        }
    }

    pub fn prepend(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            action: VarActionType::Prepend,
        }
    }
}

/// Resolves environment variables for a kernel process.
///
/// Takes the current process environment and applies a series of variable
/// actions (replace, append, prepend) to produce the final environment
/// that will be used when starting the kernel.
pub struct EnvironmentResolver {
    /// The base environment to start from
    initial_env: HashMap<String, String>,

    /// Actions to apply to modify the environment
    var_actions: Vec<VarAction>,
}

impl EnvironmentResolver {
    /// Create a new environment resolver starting from our own environment.
    pub fn new(var_actions: Vec<VarAction>) -> Self {
        Self::with_base(std::env::vars().collect(), var_actions)
    }

    pub fn with_base(initial_env: HashMap<String, String>, var_actions: Vec<VarAction>) -> Self {
        Self {
            initial_env,
            var_actions,
        }
    }

    /// Resolve the environment by applying all variable actions in order.
    pub fn resolve(&self) -> HashMap<String, String> {
        let mut env = self.initial_env.clone();
        for action in &self.var_actions {
            match action.action {
                VarActionType::Replace => {
                    env.insert(action.name.clone(), action.value.clone());
                }
                VarActionType::Append => {
                    let mut value = env.get(&action.name).cloned().unwrap_or_default();
                    value.push_str(&action.value);
                    env.insert(action.name.clone(), value);
                }
                VarActionType::Prepend => {
                    let mut value = env.get(&action.name).cloned().unwrap_or_default();
                    value.insert_str(0, &action.value);
                    env.insert(action.name.clone(), value);
                }
            }
        }
        env
    }
}

/// Whether a directory is a Python virtual environment.
pub fn is_virtual_env(path: &Path) -> bool {
    path.join(PYVENV_CFG).is_file()
}

/// The Python virtual environments a project can run in: directories under
/// `<project>/code` that are virtual environments, plus the `custom` ones the
/// user has pointed us at. Sorted, without duplicates.
pub fn python_virtual_environments(
    project_path: &Path,
    custom: &[PathBuf],
) -> Result<Vec<PathBuf>, KBError> {
    let code_dir = project_path.join("code");
    let entries = std::fs::read_dir(&code_dir).map_err(|source| KBError::Io {
        path: code_dir.display().to_string(),
        source,
    })?;

    let mut venvs: BTreeSet<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir() && is_virtual_env(path))
        .collect();
    venvs.extend(custom.iter().cloned());
    Ok(venvs.into_iter().collect())
}

/// The directory holding a virtual environment's executables.
pub fn venv_bin_dir(venv: &Path) -> PathBuf {
    if cfg!(windows) {
        venv.join("Scripts")
    } else {
        venv.join("bin")
    }
}

/// The interpreter inside a virtual environment.
pub fn venv_python(venv: &Path) -> PathBuf {
    if cfg!(windows) {
        venv_bin_dir(venv).join("python.exe")
    } else {
        venv_bin_dir(venv).join("python3")
    }
}

/// The variables that activate a virtual environment: `VIRTUAL_ENV`, and the
/// environment's executables first on the `PATH`.
pub fn venv_actions(venv: &Path) -> Vec<VarAction> {
    let separator = if cfg!(windows) { ";" } else { ":" };
    let bin = venv_bin_dir(venv);
    vec![
        VarAction::replace("VIRTUAL_ENV", &venv.to_string_lossy()),
        VarAction::prepend("PATH", &format!("{}{}", bin.to_string_lossy(), separator)),
    ]
}

/// The variables a kernel spec asks for. They win over everything else.
pub fn spec_actions(spec: &KernelSpec) -> Vec<VarAction> {
    spec.env_vars()
        .into_iter()
        .map(|(name, value)| VarAction::replace(&name, &value))
        .collect()
}

/// Point the kernel's argv at a real executable.
///
/// For Python, a leading `python`/`python3` is replaced with the virtual
/// environment's interpreter. Otherwise the first argument must be an
/// executable path or a program on the `PATH` (with `PATHEXT` on Windows).
pub fn resolve_argv(
    language: &str,
    argv: &[String],
    venv: Option<&Path>,
) -> Result<Vec<String>, KBError> {
    let (program, rest) = argv
        .split_first()
        .ok_or_else(|| KBError::Config(format!("kernel spec for {} has an empty argv", language)))?;

    let is_python_program = matches!(
        Path::new(program).file_name().and_then(|name| name.to_str()),
        Some("python") | Some("python3")
    );
    let resolved = match venv {
        Some(venv) if language == "python" && is_python_program => {
            let python = venv_python(venv);
            if !python.is_file() {
                return Err(KBError::ExecutableNotFound {
                    language: language.to_string(),
                    path: python.to_string_lossy().to_string(),
                });
            }
            python
        }
        _ => which::which(program).map_err(|err| {
            log::debug!("[kernel {}] Could not find {}: {}", language, program, err);
            KBError::ExecutableNotFound {
                language: language.to_string(),
                path: program.clone(),
            }
        })?,
    };

    let mut argv = Vec::with_capacity(rest.len() + 1);
    argv.push(resolved.to_string_lossy().to_string());
    argv.extend(rest.iter().cloned());
    Ok(argv)
}
