//
// kernel_session_test.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the MIT License. See LICENSE.txt for license information.
//
//

//! Tests for the helpers used to launch kernels and time executions

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{Duration, TimeZone, Utc};
use kbridge::{
    error::KBError,
    kernel_session::{
        environment::{
            is_virtual_env, python_virtual_environments, resolve_argv, venv_actions,
            venv_python, EnvironmentResolver, VarAction, VarActionType,
        },
        make_message_id,
        utils::{
            execution_duration, execution_started_at, format_execution_duration,
            stamp_execution_id, substitute_placeholders,
        },
    },
};

#[test]
fn test_message_ids() {
    let id = make_message_id();
    assert_eq!(id.len(), 10);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    assert_ne!(make_message_id(), make_message_id());
}

#[test]
fn test_format_execution_duration() {
    let cases = [
        (Duration::milliseconds(0), "0ms"),
        (Duration::milliseconds(250), "250ms"),
        (Duration::milliseconds(999), "999ms"),
        (Duration::milliseconds(1000), "1.00s"),
        (Duration::milliseconds(2500), "2.50s"),
        (Duration::milliseconds(12_500), "12.5s"),
        (Duration::seconds(60), "1m"),
        (Duration::seconds(200), "3m 20s"),
        (Duration::seconds(3600), "1h"),
        (Duration::seconds(3900), "1h 5m"),
        (Duration::milliseconds(-40), "0ms"),
    ];
    for (duration, expected) in cases {
        assert_eq!(format_execution_duration(duration), expected);
    }
}

#[test]
fn test_execution_ids_carry_send_time() {
    let sent = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
        + Duration::milliseconds(123);
    let id = stamp_execution_id("3fa9c01b2e", sent);
    assert_eq!(id, "3fa9c01b2e|2025-01-01T12:00:00.123Z");
    assert_eq!(execution_started_at(&id), Some(sent));

    let done = sent + Duration::milliseconds(1500);
    assert_eq!(execution_duration(&id, done), "1.50s");

    // IDs we didn't stamp have no duration
    assert_eq!(execution_started_at("3fa9c01b2e"), None);
    assert_eq!(execution_duration("3fa9c01b2e", done), "");
    assert_eq!(execution_duration("abc|yesterday", done), "");
}

#[test]
fn test_substitute_placeholders() {
    let argv: Vec<String> = [
        "java",
        "-jar",
        "{resource_dir}/launcher.jar",
        "{connection_file}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    let resolved = substitute_placeholders(
        &argv,
        Path::new("/proj/code/java-connection.json"),
        Some(Path::new("/opt/jjava")),
    );
    assert_eq!(
        resolved,
        vec![
            "java",
            "-jar",
            "/opt/jjava/launcher.jar",
            "/proj/code/java-connection.json"
        ]
    );

    // Without a resource directory the placeholder is left alone
    let resolved = substitute_placeholders(&argv, Path::new("/c.json"), None);
    assert_eq!(resolved[2], "{resource_dir}/launcher.jar");
    assert_eq!(resolved[3], "/c.json");
}

#[test]
fn test_environment_resolver() {
    let base = HashMap::from([
        (String::from("PATH"), String::from("/usr/bin")),
        (String::from("LANG"), String::from("C")),
    ]);
    let actions = vec![
        VarAction::prepend("PATH", "/venv/bin:"),
        VarAction {
            name: String::from("PATH"),
            value: String::from(":/opt/bin"),
            action: VarActionType::Append,
        },
        VarAction::replace("LANG", "en_US.UTF-8"),
        VarAction::replace("NEW_VAR", "1"),
    ];
    let env = EnvironmentResolver::with_base(base, actions).resolve();
    assert_eq!(env["PATH"], "/venv/bin:/usr/bin:/opt/bin");
    assert_eq!(env["LANG"], "en_US.UTF-8");
    assert_eq!(env["NEW_VAR"], "1");
}

#[cfg(unix)]
#[test]
fn test_virtual_env_detection() {
    let venv = tempfile::tempdir().expect("tempdir");
    assert!(!is_virtual_env(venv.path()));
    std::fs::write(venv.path().join("pyvenv.cfg"), "home = /usr/bin\n").expect("write");
    assert!(is_virtual_env(venv.path()));

    let actions = venv_actions(venv.path());
    assert!(actions.contains(&VarAction::replace(
        "VIRTUAL_ENV",
        &venv.path().to_string_lossy()
    )));
    let env = EnvironmentResolver::with_base(HashMap::new(), actions).resolve();
    assert!(env["PATH"].starts_with(&venv.path().join("bin").to_string_lossy().to_string()));

    // A leading python is swapped for the venv's interpreter, which must exist
    let argv = vec![
        String::from("python3"),
        String::from("-m"),
        String::from("ipykernel_launcher"),
    ];
    let result = resolve_argv("python", &argv, Some(venv.path()));
    assert!(matches!(result, Err(KBError::ExecutableNotFound { .. })));

    let python = venv_python(venv.path());
    std::fs::create_dir_all(python.parent().expect("parent")).expect("mkdir");
    std::fs::write(&python, "").expect("write");
    let resolved = resolve_argv("python", &argv, Some(venv.path())).expect("resolve");
    assert_eq!(resolved[0], python.to_string_lossy());
    assert_eq!(resolved[1..], argv[1..]);
}

#[cfg(unix)]
#[test]
fn test_resolve_argv_searches_path() {
    let argv = vec![String::from("sh"), String::from("-c"), String::from("true")];
    let resolved = resolve_argv("go", &argv, None).expect("sh is on the PATH");
    assert!(Path::new(&resolved[0]).is_absolute());
    assert!(resolved[0].ends_with("sh"));

    let argv = vec![String::from("definitely-not-a-kernel-7f3a")];
    assert!(matches!(
        resolve_argv("go", &argv, None),
        Err(KBError::ExecutableNotFound { .. })
    ));

    assert!(matches!(
        resolve_argv("go", &[], None),
        Err(KBError::Config(_))
    ));
}

#[cfg(unix)]
#[test]
fn test_resolve_argv_needs_an_executable() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().expect("tempdir");
    let kernel = dir.path().join("kernel");
    std::fs::write(&kernel, "#!/bin/sh\n").expect("write");
    let argv = vec![kernel.to_string_lossy().to_string(), String::from("{connection_file}")];

    // A file that can't be run isn't a kernel
    std::fs::set_permissions(&kernel, std::fs::Permissions::from_mode(0o644)).expect("chmod");
    assert!(matches!(
        resolve_argv("go", &argv, None),
        Err(KBError::ExecutableNotFound { .. })
    ));

    std::fs::set_permissions(&kernel, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    let resolved = resolve_argv("go", &argv, None).expect("resolve");
    assert_eq!(Path::new(&resolved[0]), kernel);
    assert_eq!(resolved[1], "{connection_file}");
}

#[test]
fn test_python_virtual_environments() {
    let project = tempfile::tempdir().expect("tempdir");

    // A project without a code directory can't be searched
    assert!(matches!(
        python_virtual_environments(project.path(), &[]),
        Err(KBError::Io { .. })
    ));

    let code = project.path().join("code");
    for name in ["venv", ".venv", "data"] {
        std::fs::create_dir_all(code.join(name)).expect("mkdir");
    }
    std::fs::write(code.join("venv").join("pyvenv.cfg"), "").expect("write");
    std::fs::write(code.join(".venv").join("pyvenv.cfg"), "").expect("write");
    // A stray file named like a venv is ignored
    std::fs::write(code.join("pyvenv.cfg"), "").expect("write");

    let custom = vec![
        PathBuf::from("/opt/envs/analysis"),
        code.join("venv"),
        PathBuf::from("/opt/envs/analysis"),
    ];
    let venvs = python_virtual_environments(project.path(), &custom).expect("list");
    let mut expected = vec![
        PathBuf::from("/opt/envs/analysis"),
        code.join(".venv"),
        code.join("venv"),
    ];
    expected.sort();
    assert_eq!(venvs, expected);
}
