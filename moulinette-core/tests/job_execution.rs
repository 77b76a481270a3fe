//! Inspection runs: results, failures, timeouts and secondary daemons.

mod common;

use common::{DaemonScript, Harness, RunScript};
use moulinette_core::blueprint::StaticBlueprint;
use moulinette_core::daemon::CONTAINER_SOCKET_PATH;
use moulinette_core::job::{CONTAINER_DATA_DIR, CONTAINER_JOB_DIR, INSPECTOR_COMMAND};
use moulinette_core::{ExecutionContext, ExecutionError, JobError, JobWorkspace, Payload, Scope};
use std::fs;
use std::time::{Duration, Instant};

fn run(workspace: &JobWorkspace, harness: &Harness) -> moulinette_core::Result<Payload> {
    let context = ExecutionContext::new("2024-05-01").with("student", "login_x");
    workspace
        .build_job_environment("env-tp")?
        .fetch_data(&context, &harness.cache())?
        .execute_job(&context)
}

#[test]
fn successful_inspection_returns_the_decoded_payload() {
    let harness = Harness::new();
    harness.runtime.set_run(RunScript::success(
        r#"{"success": {"__type__": "Scope", "name": "root", "hidden": false,
            "entries": [{"__type__": "Scope", "name": "a", "hidden": true, "entries": []}, 42]}}"#,
    ));
    let engine = harness.engine(StaticBlueprint::new);
    let workspace = engine.create_workspace(harness.source.path(), "tp").unwrap();

    let payload = run(&workspace, &harness).unwrap();

    assert_eq!(
        payload,
        Payload::Scope(Scope::new(
            "root",
            false,
            vec![Scope::new("a", true, vec![]).into(), Payload::from(42)],
        ))
    );

    let context: serde_json::Value =
        serde_json::from_slice(&fs::read(workspace.job_dir().join("context.json")).unwrap())
            .unwrap();
    assert_eq!(context["request_date"], "2024-05-01");
    assert_eq!(context["student"], "login_x");
    assert!(workspace.job_dir().join("workdir").is_dir());
}

#[test]
fn container_gets_the_job_and_data_mounts() {
    let harness = Harness::new();
    let engine = harness.engine(StaticBlueprint::new);
    let workspace = engine.create_workspace(harness.source.path(), "tp").unwrap();

    run(&workspace, &harness).unwrap();

    let runs = harness.runtime.runs();
    assert_eq!(runs.len(), 1);
    let request = &runs[0];
    assert_eq!(request.image, "env-tp");
    assert!(uuid::Uuid::parse_str(&request.name).is_ok());
    assert_eq!(request.mounts.len(), 2);
    assert_eq!(request.mounts[0].host, workspace.job_dir());
    assert_eq!(request.mounts[0].container, CONTAINER_JOB_DIR);
    assert_eq!(request.mounts[1].container, CONTAINER_DATA_DIR);
    assert_eq!(request.command, INSPECTOR_COMMAND);
    assert_eq!(harness.runtime.launches(), 0);
}

#[test]
fn nonzero_exit_is_an_inspection_error() {
    let harness = Harness::new();
    harness.runtime.set_run(RunScript::Exit {
        output: "Traceback\n".into(),
        code: 3,
        result: None,
    });
    let engine = harness.engine(StaticBlueprint::new);
    let workspace = engine.create_workspace(harness.source.path(), "tp").unwrap();

    let err = run(&workspace, &harness).unwrap_err();
    assert!(
        matches!(&err, JobError::Execution(ExecutionError::Inspection(message)) if message.contains('3'))
    );
}

#[test]
fn error_payload_is_an_inspection_error() {
    let harness = Harness::new();
    harness
        .runtime
        .set_run(RunScript::success(r#"{"error": {"message": "no main.c"}}"#));
    let engine = harness.engine(StaticBlueprint::new);
    let workspace = engine.create_workspace(harness.source.path(), "tp").unwrap();

    let err = run(&workspace, &harness).unwrap_err();
    assert!(
        matches!(&err, JobError::Execution(ExecutionError::Inspection(message)) if message == "no main.c")
    );
}

#[test]
fn malformed_or_missing_result_is_a_loading_error() {
    let harness = Harness::new();
    let engine = harness.engine(StaticBlueprint::new);
    let workspace = engine.create_workspace(harness.source.path(), "tp").unwrap();

    harness.runtime.set_run(RunScript::success("{ not json"));
    let err = run(&workspace, &harness).unwrap_err();
    assert_eq!(err.kind(), "result_loading");

    harness.runtime.set_run(RunScript::Exit {
        output: String::new(),
        code: 0,
        result: None,
    });
    let err = run(&workspace, &harness).unwrap_err();
    assert_eq!(err.kind(), "result_loading");
}

#[test]
fn timeout_kills_the_named_container_once() {
    let harness = Harness::new();
    harness.runtime.set_run(RunScript::Hang {
        output: "still working\n".into(),
    });
    let engine = harness.engine(StaticBlueprint::new);
    let workspace = engine.create_workspace(harness.source.path(), "tp").unwrap();

    let started = Instant::now();
    let err = run(&workspace, &harness).unwrap_err();

    assert!(started.elapsed() >= Duration::from_secs(1));
    assert!(matches!(
        err,
        JobError::Execution(ExecutionError::Timeout(t)) if t == harness.config.job_timeout
    ));
    let runs = harness.runtime.runs();
    assert_eq!(harness.runtime.kills(), vec![runs[0].name.clone()]);
}

#[test]
fn timeout_still_stops_the_secondary_daemon() {
    let harness = Harness::new();
    harness.runtime.set_run(RunScript::Hang {
        output: "still working\n".into(),
    });
    let engine = harness.engine(|| StaticBlueprint::new().with_docker(true));
    let workspace = engine.create_workspace(harness.source.path(), "tp").unwrap();

    let err = run(&workspace, &harness).unwrap_err();

    assert_eq!(err.kind(), "timeout");
    let runs = harness.runtime.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(harness.runtime.kills(), vec![runs[0].name.clone()]);
    assert_eq!(harness.runtime.launches(), 1);
    assert_eq!(harness.runtime.daemon_stops(), 1);
}

#[test]
fn secondary_daemon_is_mounted_and_stopped_after_success() {
    let harness = Harness::new();
    let engine = harness.engine(|| StaticBlueprint::new().with_docker(true));
    let workspace = engine.create_workspace(harness.source.path(), "tp").unwrap();

    run(&workspace, &harness).unwrap();

    assert_eq!(harness.runtime.launches(), 1);
    assert_eq!(harness.runtime.daemon_stops(), 1);
    let runs = harness.runtime.runs();
    let socket = runs[0].mounts.last().unwrap();
    assert_eq!(socket.host, harness.runtime.socket_path());
    assert_eq!(socket.container, CONTAINER_SOCKET_PATH);
}

#[test]
fn secondary_daemon_is_stopped_once_when_the_inspection_fails() {
    let harness = Harness::new();
    harness.runtime.set_run(RunScript::Exit {
        output: String::new(),
        code: 1,
        result: None,
    });
    let engine = harness.engine(|| StaticBlueprint::new().with_docker(true));
    let workspace = engine.create_workspace(harness.source.path(), "tp").unwrap();

    assert_eq!(run(&workspace, &harness).unwrap_err().kind(), "inspection");
    assert_eq!(harness.runtime.daemon_stops(), 1);
}

#[test]
fn unready_daemon_fails_before_any_container_starts() {
    let harness = Harness::new();
    harness.runtime.set_daemon(DaemonScript::NeverReady);
    let engine = harness.engine(|| StaticBlueprint::new().with_docker(true));
    let workspace = engine.create_workspace(harness.source.path(), "tp").unwrap();

    let err = run(&workspace, &harness).unwrap_err();

    assert_eq!(err.kind(), "docker_daemon_setup");
    assert!(harness.runtime.runs().is_empty());
    assert_eq!(harness.runtime.daemon_stops(), 1);
}

#[test]
fn daemon_launch_failure_never_starts_a_container() {
    let harness = Harness::new();
    harness.runtime.set_daemon(DaemonScript::LaunchFails);
    let engine = harness.engine(|| StaticBlueprint::new().with_docker(true));
    let workspace = engine.create_workspace(harness.source.path(), "tp").unwrap();

    let err = run(&workspace, &harness).unwrap_err();

    assert!(matches!(
        err,
        JobError::Execution(ExecutionError::DockerDaemonSetup(_))
    ));
    assert!(harness.runtime.runs().is_empty());
    assert!(!workspace.job_dir().join("context.json").exists());
}
