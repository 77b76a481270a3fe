//! Scripted collaborators for exercising the job lifecycle without Docker.

#![allow(dead_code)]

use moulinette_common::Config;
use moulinette_core::blueprint::{Blueprint, FetchContext, Fetcher, StaticBlueprint};
use moulinette_core::daemon::{DaemonSettings, SecondaryDaemon};
use moulinette_core::runtime::{BuildRequest, ContainerRuntime, ProcessHandle, RunRequest};
use moulinette_core::{DaemonError, DirectoryCache, Engine};
use std::io::{Cursor, PipeWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// What the fake inspection container does.
#[derive(Debug, Clone)]
pub enum RunScript {
    /// Print `output`, write `result` (if any) as `result.json`, exit with `code`.
    Exit {
        output: String,
        code: i32,
        result: Option<String>,
    },
    /// Print `output` and never exit until killed.
    Hang { output: String },
}

impl RunScript {
    pub fn success(result: &str) -> Self {
        Self::Exit {
            output: "inspecting\n".into(),
            code: 0,
            result: Some(result.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonScript {
    Ready,
    NeverReady,
    LaunchFails,
}

#[derive(Debug)]
struct State {
    build_code: Mutex<i32>,
    run: Mutex<RunScript>,
    daemon: Mutex<DaemonScript>,
    builds: Mutex<Vec<BuildRequest>>,
    runs: Mutex<Vec<RunRequest>>,
    kills: Mutex<Vec<String>>,
    launches: AtomicUsize,
    daemon_stops: Arc<AtomicUsize>,
    socket_dir: TempDir,
}

/// A container runtime that follows scripts and records every call.
#[derive(Debug, Clone)]
pub struct FakeRuntime {
    state: Arc<State>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            state: Arc::new(State {
                build_code: Mutex::new(0),
                run: Mutex::new(RunScript::success(r#"{"success": null}"#)),
                daemon: Mutex::new(DaemonScript::Ready),
                builds: Mutex::new(Vec::new()),
                runs: Mutex::new(Vec::new()),
                kills: Mutex::new(Vec::new()),
                launches: AtomicUsize::new(0),
                daemon_stops: Arc::new(AtomicUsize::new(0)),
                socket_dir: tempfile::tempdir().unwrap(),
            }),
        }
    }

    pub fn set_build_code(&self, code: i32) {
        *self.state.build_code.lock().unwrap() = code;
    }

    pub fn set_run(&self, script: RunScript) {
        *self.state.run.lock().unwrap() = script;
    }

    pub fn set_daemon(&self, script: DaemonScript) {
        *self.state.daemon.lock().unwrap() = script;
    }

    pub fn builds(&self) -> Vec<BuildRequest> {
        self.state.builds.lock().unwrap().clone()
    }

    pub fn runs(&self) -> Vec<RunRequest> {
        self.state.runs.lock().unwrap().clone()
    }

    pub fn kills(&self) -> Vec<String> {
        self.state.kills.lock().unwrap().clone()
    }

    pub fn launches(&self) -> usize {
        self.state.launches.load(Ordering::SeqCst)
    }

    pub fn daemon_stops(&self) -> usize {
        self.state.daemon_stops.load(Ordering::SeqCst)
    }

    pub fn socket_path(&self) -> PathBuf {
        self.state.socket_dir.path().join("docker.sock")
    }
}

struct FakeProcess {
    output: Option<Box<dyn Read + Send>>,
    code: i32,
    /// Held open to keep the output stream alive; dropped on kill.
    writer: Option<PipeWriter>,
    killed: bool,
}

impl FakeProcess {
    fn exiting(output: &str, code: i32) -> Self {
        Self {
            output: Some(Box::new(Cursor::new(output.as_bytes().to_vec()))),
            code,
            writer: None,
            killed: false,
        }
    }

    fn hanging(output: &str) -> Self {
        let (reader, mut writer) = std::io::pipe().unwrap();
        writer.write_all(output.as_bytes()).unwrap();
        Self {
            output: Some(Box::new(reader)),
            code: 0,
            writer: Some(writer),
            killed: false,
        }
    }
}

impl ProcessHandle for FakeProcess {
    fn take_output(&mut self) -> Option<Box<dyn Read + Send>> {
        self.output.take()
    }

    fn wait(&mut self) -> std::io::Result<Option<i32>> {
        Ok(if self.killed { None } else { Some(self.code) })
    }

    fn kill(&mut self) -> std::io::Result<()> {
        self.killed = true;
        self.writer = None;
        Ok(())
    }
}

struct FakeDaemon {
    ready: bool,
    socket: PathBuf,
    stops: Arc<AtomicUsize>,
}

impl SecondaryDaemon for FakeDaemon {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn socket_path(&self) -> &Path {
        &self.socket
    }

    fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

impl ContainerRuntime for FakeRuntime {
    fn build_image(&self, request: &BuildRequest) -> std::io::Result<Box<dyn ProcessHandle>> {
        self.state.builds.lock().unwrap().push(request.clone());
        let code = *self.state.build_code.lock().unwrap();
        Ok(Box::new(FakeProcess::exiting("Step 1/2\nStep 2/2\n", code)))
    }

    fn run_container(&self, request: &RunRequest) -> std::io::Result<Box<dyn ProcessHandle>> {
        self.state.runs.lock().unwrap().push(request.clone());
        let script = self.state.run.lock().unwrap().clone();
        match script {
            RunScript::Exit {
                output,
                code,
                result,
            } => {
                if let Some(result) = result {
                    std::fs::write(request.mounts[0].host.join("result.json"), result)?;
                }
                Ok(Box::new(FakeProcess::exiting(&output, code)))
            }
            RunScript::Hang { output } => Ok(Box::new(FakeProcess::hanging(&output))),
        }
    }

    fn kill_container(&self, name: &str) -> std::io::Result<()> {
        self.state.kills.lock().unwrap().push(name.to_string());
        Ok(())
    }

    fn launch_daemon(
        &self,
        _settings: &DaemonSettings,
    ) -> Result<Box<dyn SecondaryDaemon>, DaemonError> {
        self.state.launches.fetch_add(1, Ordering::SeqCst);
        let script = *self.state.daemon.lock().unwrap();
        if script == DaemonScript::LaunchFails {
            return Err(DaemonError::Network {
                command: "ip link add".into(),
                reason: "operation not permitted".into(),
            });
        }
        Ok(Box::new(FakeDaemon {
            ready: script == DaemonScript::Ready,
            socket: self.socket_path(),
            stops: Arc::clone(&self.state.daemon_stops),
        }))
    }
}

/// A fetcher that counts its calls and drops a marker file.
#[derive(Clone)]
pub struct CountingFetcher {
    pub name: String,
    pub cacheable: bool,
    pub fail: bool,
    pub calls: Arc<AtomicUsize>,
    pub order: Arc<Mutex<Vec<String>>>,
}

impl CountingFetcher {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            cacheable: true,
            fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
            order: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetcher for CountingFetcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn cacheable(&self) -> bool {
        self.cacheable
    }

    fn fetch(&self, ctx: &FetchContext<'_>) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.order.lock().unwrap().push(self.name.clone());
        if self.fail {
            anyhow::bail!("{} is unreachable", self.name);
        }
        std::fs::write(ctx.delivery_path.join(&self.name), ctx.request_date)?;
        Ok(())
    }
}

/// Scratch directories plus an engine wired to a [`FakeRuntime`].
pub struct Harness {
    pub root: TempDir,
    pub source: TempDir,
    pub runtime: FakeRuntime,
    pub config: Config,
}

impl Harness {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(source.path().join("resources")).unwrap();
        std::fs::write(source.path().join("inspector.py"), "print('ok')\n").unwrap();
        std::fs::write(source.path().join("resources/tests.txt"), "1 2 3\n").unwrap();

        let mut config = Config::default();
        config.root_directory = root.path().join("jobs");
        config.cache_directory = root.path().join("cache");
        config.job_timeout = Duration::from_secs(1);
        config.additional_docker_daemon.max_wait_time = Duration::from_secs(1);

        Self {
            root,
            source,
            runtime: FakeRuntime::new(),
            config,
        }
    }

    /// Engine loading a fresh copy of the blueprint built by `blueprint` on every load.
    pub fn engine<F>(&self, blueprint: F) -> Engine
    where
        F: Fn() -> StaticBlueprint + Send + Sync + 'static,
    {
        Engine::new(self.config.clone())
            .with_runtime(self.runtime.clone())
            .with_loader(move |_: &Path| -> anyhow::Result<Box<dyn Blueprint>> {
                Ok(Box::new(blueprint()))
            })
    }

    pub fn cache(&self) -> DirectoryCache {
        DirectoryCache::new(&self.config.cache_directory)
    }

    /// Job directories currently under the root directory.
    pub fn job_dirs(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(&self.config.root_directory) {
            Ok(entries) => entries.map(|entry| entry.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}
