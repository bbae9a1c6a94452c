//! Engine adapter that drives the engines' command-line clients.
//!
//! Compat operations run `docker --host <address> ...` and native operations
//! run `podman --url <address> ...`, both against the same endpoint socket.
//! CLI output is translated into the API wire shapes in [`super::wire`] so
//! that the rest of the registry never sees CLI formatting.
//!
//! Registry credentials reach `build`, `pull` and `push` through a
//! throwaway client config directory (`--config`). TTY execs run on a
//! pseudo-terminal so they can be resized.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_stream::wrappers::LinesStream;
use tokio_util::io::ReaderStream;
use tracing::warn;

use super::demux::{StdStream, encode_frame};
#[cfg(unix)]
use super::pty;
use super::wire::{
    self, CompatContainer, CompatImage, CompatInfo, CompatNetwork, CompatPort, CompatVolume,
    DiskUsage, NativeContainer, NativeImage, NativePod, UsageData, VolumeUsageEntry,
};
use super::{
    AttachIo, BuildOptions, ByteStream, CompatApi, CreateContainerOptions, CreateNetworkOptions,
    CreatePodOptions, CreateVolumeOptions, EngineConnector, EngineHandle, ExecOptions, ExecSession,
    Filters, JsonStream, LogsOptions, ManifestOptions, NativeApi, PruneReport,
};
use crate::auth::AuthConfig;
use crate::error::{EngineError, Result};
use crate::model::EngineEndpoint;

/// Opens [`CliEngineClient`]s for endpoints.
#[derive(Debug, Clone)]
pub struct CliConnector {
    compat_binary: String,
    native_binary: String,
}

impl CliConnector {
    /// Connector that finds `docker` and `podman` on `$PATH`.
    pub fn new() -> Self {
        Self {
            compat_binary: "docker".to_string(),
            native_binary: "podman".to_string(),
        }
    }

    /// Connector with explicit client binaries.
    pub fn with_binaries(compat: impl Into<String>, native: impl Into<String>) -> Self {
        Self {
            compat_binary: compat.into(),
            native_binary: native.into(),
        }
    }
}

impl Default for CliConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineConnector for CliConnector {
    fn connect(&self, endpoint: Arc<EngineEndpoint>) -> Result<EngineHandle> {
        let client = Arc::new(CliEngineClient::new(
            &self.compat_binary,
            &self.native_binary,
            &endpoint.address,
        ));
        // One client serves both views so the native side shares the
        // compat side's endpoint binding.
        let native: Option<Arc<dyn NativeApi>> = if endpoint.kind.has_native() {
            Some(client.clone())
        } else {
            None
        };
        Ok(EngineHandle::new(endpoint, client, native))
    }
}

/// Client bound to one engine address.
pub struct CliEngineClient {
    compat_binary: String,
    native_binary: String,
    address: String,
    /// Running exec processes keyed by synthetic exec id.
    execs: Arc<Mutex<HashMap<String, ExecProcess>>>,
    next_exec: AtomicU64,
}

impl std::fmt::Debug for CliEngineClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CliEngineClient")
            .field("compat_binary", &self.compat_binary)
            .field("native_binary", &self.native_binary)
            .field("address", &self.address)
            .finish()
    }
}

impl CliEngineClient {
    pub fn new(compat_binary: &str, native_binary: &str, address: &str) -> Self {
        Self {
            compat_binary: compat_binary.to_string(),
            native_binary: native_binary.to_string(),
            address: address.to_string(),
            execs: Arc::new(Mutex::new(HashMap::new())),
            next_exec: AtomicU64::new(1),
        }
    }

    fn compat(&self) -> Command {
        let mut cmd = Command::new(&self.compat_binary);
        cmd.arg("--host").arg(&self.address);
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    fn native(&self) -> Command {
        let mut cmd = Command::new(&self.native_binary);
        cmd.arg("--url").arg(&self.address);
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    /// Compat command that reads registry credentials from a throwaway
    /// client config. The directory must outlive the process.
    fn compat_with_auth(&self, auth: Option<&AuthConfig>) -> Result<(Command, Option<AuthDir>)> {
        let dir = auth.map(AuthDir::write).transpose()?;
        let mut cmd = self.compat();
        if let Some(dir) = &dir {
            cmd.arg("--config").arg(dir.path());
        }
        Ok((cmd, dir))
    }

    fn execs(&self) -> std::sync::MutexGuard<'_, HashMap<String, ExecProcess>> {
        self.execs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn track_exec(&self, exec_id: &str, process: ExecProcess) -> ExecGuard {
        self.execs().insert(exec_id.to_string(), process);
        ExecGuard {
            execs: Arc::clone(&self.execs),
            exec_id: exec_id.to_string(),
        }
    }

    #[cfg(unix)]
    fn exec_on_pty(&self, mut cmd: Command, exec_id: String, with_stdin: bool) -> Result<ExecSession> {
        let terminal = pty::Pty::open()?;
        terminal.connect_child(&mut cmd)?;
        let child = cmd.spawn()?;
        drop(cmd);
        let master = terminal.into_master()?;

        let guard = self.track_exec(
            &exec_id,
            ExecProcess {
                child,
                pty: Some(master.control),
            },
        );
        let mut reader = ReaderStream::new(master.reader);
        let output: ByteStream = Box::pin(async_stream::stream! {
            let _guard = guard;
            while let Some(item) = reader.next().await {
                match item {
                    Ok(bytes) => yield Ok(bytes.to_vec()),
                    Err(e) if pty::is_hangup(&e) => return,
                    Err(e) => {
                        yield Err(EngineError::Io(e));
                        return;
                    }
                }
            }
        });
        let writer = master.writer;
        let input = with_stdin.then(|| -> super::InputSink { Box::pin(writer) });
        Ok(ExecSession {
            exec_id,
            output,
            input,
        })
    }

    #[cfg(not(unix))]
    fn exec_on_pty(&self, _cmd: Command, _exec_id: String, _with_stdin: bool) -> Result<ExecSession> {
        Err(EngineError::Unsupported("tty exec"))
    }
}

/// A CLI exec process, with the pty master of a TTY exec.
struct ExecProcess {
    child: Child,
    #[cfg(unix)]
    pty: Option<std::os::fd::OwnedFd>,
}

impl ExecProcess {
    #[cfg(unix)]
    fn resize(&self, width: u16, height: u16) -> Result<()> {
        let control = self
            .pty
            .as_ref()
            .ok_or(EngineError::Unsupported("resize of an exec without a TTY"))?;
        Ok(pty::resize(control, width, height)?)
    }

    #[cfg(not(unix))]
    fn resize(&self, _width: u16, _height: u16) -> Result<()> {
        Err(EngineError::Unsupported("exec resize"))
    }
}

// ---------------------------------------------------------------------------
// Registry credentials
// ---------------------------------------------------------------------------

/// Registry key the docker CLI files Docker Hub credentials under.
const DOCKER_HUB_KEY: &str = "https://index.docker.io/v1/";

/// A client config directory holding one registry credential. Removed on
/// drop.
struct AuthDir(tempfile::TempDir);

impl AuthDir {
    fn write(auth: &AuthConfig) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("enginehub-auth-").tempdir()?;
        let body = serde_json::to_vec(&client_auth_config(auth))?;
        std::fs::write(dir.path().join("config.json"), body)?;
        Ok(Self(dir))
    }

    fn path(&self) -> &Path {
        self.0.path()
    }
}

/// The `config.json` body carrying `auth` as a basic-auth entry.
fn client_auth_config(auth: &AuthConfig) -> Value {
    let server = match auth.server_address.as_str() {
        "docker.io" | "index.docker.io" | "registry-1.docker.io" => DOCKER_HUB_KEY,
        other => other,
    };
    let token = STANDARD.encode(format!("{}:{}", auth.username, auth.password));
    let mut auths = serde_json::Map::new();
    auths.insert(server.to_string(), json!({ "auth": token }));
    json!({ "auths": auths })
}

/// Keep `dir` alive for as long as `stream` is.
fn holding<T: Send + 'static>(mut stream: BoxStream<'static, T>, dir: Option<AuthDir>) -> BoxStream<'static, T> {
    let Some(dir) = dir else {
        return stream;
    };
    Box::pin(async_stream::stream! {
        let _dir = dir;
        while let Some(item) = stream.next().await {
            yield item;
        }
    })
}

// ---------------------------------------------------------------------------
// Process helpers
// ---------------------------------------------------------------------------

/// Run a command to completion and return its stdout.
async fn run(mut cmd: Command, label: &str) -> Result<Vec<u8>> {
    let output = cmd.output().await?;
    if !output.status.success() {
        return Err(EngineError::Command {
            command: label.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output.stdout)
}

async fn run_trimmed(cmd: Command, label: &str) -> Result<String> {
    let out = run(cmd, label).await?;
    Ok(String::from_utf8_lossy(&out).trim().to_string())
}

/// Parse output that is either a JSON array or one JSON object per line.
fn parse_json_output<T: DeserializeOwned>(out: &[u8]) -> Result<Vec<T>> {
    let text = String::from_utf8_lossy(out);
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }
    if text.starts_with('[') {
        return Ok(serde_json::from_str(text)?);
    }
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| serde_json::from_str(l).map_err(EngineError::from))
        .collect()
}

fn non_empty_lines(out: &[u8]) -> Vec<String> {
    let mut seen = Vec::new();
    for line in String::from_utf8_lossy(out).lines() {
        let line = line.trim();
        if !line.is_empty() && !seen.iter().any(|s| s == line) {
            seen.push(line.to_string());
        }
    }
    seen
}

fn push_filters(cmd: &mut Command, filters: &Filters) {
    let mut keys: Vec<_> = filters.keys().collect();
    keys.sort();
    for key in keys {
        for value in &filters[key] {
            cmd.arg("--filter").arg(format!("{key}={value}"));
        }
    }
}

fn push_labels(cmd: &mut Command, labels: &HashMap<String, String>) {
    let mut pairs: Vec<_> = labels.iter().collect();
    pairs.sort();
    for (k, v) in pairs {
        cmd.arg("--label").arg(format!("{k}={v}"));
    }
}

/// Stream a child's stdout line by line, mapping each line to JSON.
///
/// Lines the mapper rejects are skipped. A non-zero exit after EOF is
/// reported as a final `Err` item carrying the last stderr line.
fn line_stream(mut cmd: Command, label: String, merge_stderr: bool, map: fn(&str) -> Option<Value>) -> JsonStream {
    Box::pin(async_stream::stream! {
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                yield Err(EngineError::Io(e));
                return;
            }
        };
        let Some(stdout) = child.stdout.take() else {
            yield Err(EngineError::StreamClosed(format!("{label}: stdout unavailable")));
            return;
        };
        let stderr = child.stderr.take();

        let out: BoxStream<'static, std::io::Result<String>> =
            LinesStream::new(BufReader::new(stdout).lines()).boxed();
        let mut stderr_task = None;
        let mut lines = match (merge_stderr, stderr) {
            (true, Some(err)) => {
                stream::select(out, LinesStream::new(BufReader::new(err).lines())).boxed()
            }
            (false, Some(mut err)) => {
                stderr_task = Some(tokio::spawn(async move {
                    let mut buf = String::new();
                    let _ = err.read_to_string(&mut buf).await;
                    buf
                }));
                out
            }
            (_, None) => out,
        };

        let mut last_line = String::new();
        while let Some(line) = lines.next().await {
            match line {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    last_line = trimmed.to_string();
                    match map(trimmed) {
                        Some(value) => yield Ok(value),
                        None => warn!(command = %label, line = trimmed, "skipping unparsable output line"),
                    }
                }
                Err(e) => {
                    yield Err(EngineError::Io(e));
                    return;
                }
            }
        }

        let stderr_text = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        match child.wait().await {
            Ok(status) if !status.success() => {
                let stderr = stderr_text
                    .lines()
                    .last()
                    .map(str::to_string)
                    .unwrap_or(last_line);
                yield Err(EngineError::Command {
                    command: label,
                    code: status.code().unwrap_or(-1),
                    stderr,
                });
            }
            Ok(_) => {}
            Err(e) => yield Err(EngineError::Io(e)),
        }
    })
}

fn parse_json_line(line: &str) -> Option<Value> {
    // `docker stats` and friends may prefix lines with terminal escapes.
    let start = line.find('{')?;
    serde_json::from_str(&line[start..]).ok()
}

fn wrap_stream_line(line: &str) -> Option<Value> {
    Some(json!({ "stream": format!("{line}\n") }))
}

fn wrap_status_line(line: &str) -> Option<Value> {
    Some(json!({ "status": line }))
}

/// Stream a child's stdout and stderr as raw bytes.
///
/// With `framed`, chunks are wrapped in multiplexed frames so consumers can
/// tell the two channels apart. The child is killed when the stream drops.
fn child_output(mut child: Child, label: String, framed: bool, check_status: bool) -> ByteStream {
    Box::pin(async_stream::stream! {
        let out = match child.stdout.take() {
            Some(s) => ReaderStream::new(s).map(|r| (StdStream::Stdout, r)).boxed(),
            None => stream::empty().boxed(),
        };
        let err = match child.stderr.take() {
            Some(s) => ReaderStream::new(s).map(|r| (StdStream::Stderr, r)).boxed(),
            None => stream::empty().boxed(),
        };
        let mut merged = stream::select(out, err);

        while let Some((which, item)) = merged.next().await {
            match item {
                Ok(bytes) if framed => yield Ok(encode_frame(which, &bytes)),
                Ok(bytes) => yield Ok(bytes.to_vec()),
                Err(e) => {
                    yield Err(EngineError::Io(e));
                    return;
                }
            }
        }

        if check_status {
            match child.wait().await {
                Ok(status) if !status.success() => yield Err(EngineError::Command {
                    command: label,
                    code: status.code().unwrap_or(-1),
                    stderr: String::new(),
                }),
                Ok(_) => {}
                Err(e) => yield Err(EngineError::Io(e)),
            }
        }
    })
}

fn spawn_piped(mut cmd: Command, with_stdin: bool) -> Result<Child> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    if with_stdin {
        cmd.stdin(Stdio::piped());
    }
    Ok(cmd.spawn()?)
}

// ---------------------------------------------------------------------------
// CLI output translation
// ---------------------------------------------------------------------------

/// One line of `docker ps --format '{{json .}}'`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct PsLine {
    #[serde(rename = "ID")]
    id: String,
    names: String,
    image: String,
    command: String,
    created_at: String,
    state: String,
    status: String,
    ports: String,
    labels: String,
}

impl PsLine {
    fn into_compat(self) -> CompatContainer {
        CompatContainer {
            id: self.id,
            names: self
                .names
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(|n| format!("/{n}"))
                .collect(),
            image: self.image,
            image_id: String::new(),
            command: self.command.trim_matches('"').to_string(),
            created: wire::parse_time(&self.created_at).map(|t| t.timestamp()).unwrap_or(0),
            state: self.state,
            status: self.status,
            ports: parse_port_list(&self.ports),
            labels: Some(parse_label_list(&self.labels)),
        }
    }
}

/// Parse `k=v,k2=v2`.
fn parse_label_list(text: &str) -> HashMap<String, String> {
    text.split(',')
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            let k = k.trim();
            (!k.is_empty()).then(|| (k.to_string(), v.to_string()))
        })
        .collect()
}

/// Parse `0.0.0.0:8080->80/tcp, :::8080->80/tcp, 53/udp`.
fn parse_port_list(text: &str) -> Vec<CompatPort> {
    text.split(',').filter_map(|p| parse_port(p.trim())).collect()
}

fn parse_port(text: &str) -> Option<CompatPort> {
    if text.is_empty() {
        return None;
    }
    let (host, container) = match text.split_once("->") {
        Some((host, container)) => (Some(host), container),
        None => (None, text),
    };
    let (port, proto) = container.split_once('/').unwrap_or((container, "tcp"));
    let private_port = first_of_range(port)?;
    let (ip, public_port) = match host {
        Some(host) => {
            let (ip, port) = host.rsplit_once(':')?;
            (Some(ip.to_string()), Some(first_of_range(port)?))
        }
        None => (None, None),
    };
    Some(CompatPort {
        ip,
        private_port,
        public_port,
        port_type: proto.to_string(),
    })
}

fn first_of_range(text: &str) -> Option<u16> {
    text.split('-').next()?.trim().parse().ok()
}

/// Parse sizes such as `1.2kB`, `3MiB`, `0B` into bytes.
fn parse_human_size(text: &str) -> u64 {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let Ok(number) = number.parse::<f64>() else {
        return 0;
    };
    let multiplier: f64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1.0,
        "kb" => 1e3,
        "mb" => 1e6,
        "gb" => 1e9,
        "tb" => 1e12,
        "kib" => 1024.0,
        "mib" => 1024.0 * 1024.0,
        "gib" => 1024.0 * 1024.0 * 1024.0,
        "tib" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return 0,
    };
    (number * multiplier).round() as u64
}

/// Parse `docker * prune` output.
fn parse_prune_output(text: &str) -> PruneReport {
    let mut report = PruneReport::default();
    for line in text.lines().map(str::trim) {
        if let Some(space) = line.strip_prefix("Total reclaimed space:") {
            report.space_reclaimed = parse_human_size(space);
        } else if line.is_empty() || line.ends_with(':') {
            continue;
        } else {
            let id = line
                .strip_prefix("deleted: ")
                .or_else(|| line.strip_prefix("untagged: "))
                .unwrap_or(line);
            report.deleted.push(id.to_string());
        }
    }
    report
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ImageInspect {
    id: String,
    repo_tags: Option<Vec<String>>,
    repo_digests: Option<Vec<String>>,
    created: String,
    size: i64,
    config: Option<ImageInspectConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ImageInspectConfig {
    labels: Option<HashMap<String, String>>,
}

impl ImageInspect {
    fn into_compat(self) -> CompatImage {
        CompatImage {
            id: self.id,
            repo_tags: self.repo_tags,
            repo_digests: self.repo_digests,
            created: wire::parse_time(&self.created).map(|t| t.timestamp()).unwrap_or(0),
            size: self.size,
            labels: self.config.and_then(|c| c.labels),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct DfOutput {
    volumes: Vec<DfVolume>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct DfVolume {
    name: String,
    links: Value,
    size: String,
}

impl DfVolume {
    fn into_entry(self) -> VolumeUsageEntry {
        let ref_count = match &self.links {
            Value::Number(n) => n.as_i64().unwrap_or(0),
            Value::String(s) => s.trim().parse().unwrap_or(0),
            _ => 0,
        };
        VolumeUsageEntry {
            name: self.name,
            usage_data: Some(UsageData {
                size: parse_human_size(&self.size) as i64,
                ref_count,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// CompatApi
// ---------------------------------------------------------------------------

#[async_trait]
impl CompatApi for CliEngineClient {
    async fn ping(&self) -> Result<()> {
        let mut cmd = self.compat();
        cmd.args(["version", "--format", "{{.Server.Version}}"]);
        run(cmd, "docker version").await.map(|_| ())
    }

    async fn info(&self) -> Result<CompatInfo> {
        let mut cmd = self.compat();
        cmd.args(["info", "--format", "{{json .}}"]);
        let out = run(cmd, "docker info").await?;
        Ok(serde_json::from_slice(&out)?)
    }

    async fn list_containers(&self, all: bool, filters: &Filters) -> Result<Vec<CompatContainer>> {
        let mut cmd = self.compat();
        cmd.args(["ps", "--no-trunc", "--format", "{{json .}}"]);
        if all {
            cmd.arg("--all");
        }
        push_filters(&mut cmd, filters);
        let out = run(cmd, "docker ps").await?;
        let lines: Vec<PsLine> = parse_json_output(&out)?;
        Ok(lines.into_iter().map(PsLine::into_compat).collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<Value> {
        let mut cmd = self.compat();
        cmd.args(["container", "inspect", id]);
        let out = run(cmd, "docker container inspect").await?;
        let mut items: Vec<Value> = parse_json_output(&out)?;
        if items.is_empty() {
            return Err(EngineError::NotFound(format!("container {id}")));
        }
        Ok(items.swap_remove(0))
    }

    async fn create_container(&self, options: &CreateContainerOptions) -> Result<String> {
        let mut cmd = self.compat();
        cmd.arg("create");
        if let Some(name) = &options.name {
            cmd.arg("--name").arg(name);
        }
        push_labels(&mut cmd, &options.labels);
        for env in &options.env {
            cmd.arg("--env").arg(env);
        }
        cmd.arg(&options.image).args(&options.cmd);
        run_trimmed(cmd, "docker create").await
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        let mut cmd = self.compat();
        cmd.args(["start", id]);
        run(cmd, "docker start").await.map(|_| ())
    }

    async fn stop_container(&self, id: &str) -> Result<()> {
        let mut cmd = self.compat();
        cmd.args(["stop", id]);
        run(cmd, "docker stop").await.map(|_| ())
    }

    async fn restart_container(&self, id: &str) -> Result<()> {
        let mut cmd = self.compat();
        cmd.args(["restart", id]);
        run(cmd, "docker restart").await.map(|_| ())
    }

    async fn kill_container(&self, id: &str, signal: Option<&str>) -> Result<()> {
        let mut cmd = self.compat();
        cmd.arg("kill");
        if let Some(signal) = signal {
            cmd.arg("--signal").arg(signal);
        }
        cmd.arg(id);
        run(cmd, "docker kill").await.map(|_| ())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<()> {
        let mut cmd = self.compat();
        cmd.arg("rm");
        if force {
            cmd.arg("--force");
        }
        cmd.arg(id);
        run(cmd, "docker rm").await.map(|_| ())
    }

    async fn prune_containers(&self) -> Result<PruneReport> {
        let mut cmd = self.compat();
        cmd.args(["container", "prune", "--force"]);
        let out = run(cmd, "docker container prune").await?;
        Ok(parse_prune_output(&String::from_utf8_lossy(&out)))
    }

    async fn list_images(&self, all: bool, filters: &Filters) -> Result<Vec<CompatImage>> {
        let mut cmd = self.compat();
        cmd.args(["image", "ls", "--quiet", "--no-trunc"]);
        if all {
            cmd.arg("--all");
        }
        push_filters(&mut cmd, filters);
        let ids = non_empty_lines(&run(cmd, "docker image ls").await?);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = self.compat();
        cmd.args(["image", "inspect"]).args(&ids);
        let out = run(cmd, "docker image inspect").await?;
        let images: Vec<ImageInspect> = parse_json_output(&out)?;
        Ok(images.into_iter().map(ImageInspect::into_compat).collect())
    }

    async fn remove_image(&self, id: &str, force: bool) -> Result<()> {
        let mut cmd = self.compat();
        cmd.arg("rmi");
        if force {
            cmd.arg("--force");
        }
        cmd.arg(id);
        run(cmd, "docker rmi").await.map(|_| ())
    }

    async fn prune_images(&self, all: bool) -> Result<PruneReport> {
        let mut cmd = self.compat();
        cmd.args(["image", "prune", "--force"]);
        if all {
            cmd.arg("--all");
        }
        let out = run(cmd, "docker image prune").await?;
        Ok(parse_prune_output(&String::from_utf8_lossy(&out)))
    }

    async fn list_volumes(&self) -> Result<Vec<CompatVolume>> {
        let mut cmd = self.compat();
        cmd.args(["volume", "ls", "--quiet"]);
        let names = non_empty_lines(&run(cmd, "docker volume ls").await?);
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = self.compat();
        cmd.args(["volume", "inspect"]).args(&names);
        let out = run(cmd, "docker volume inspect").await?;
        parse_json_output(&out)
    }

    async fn disk_usage(&self) -> Result<DiskUsage> {
        let mut cmd = self.compat();
        cmd.args(["system", "df", "--verbose", "--format", "{{json .}}"]);
        let out = run(cmd, "docker system df").await?;
        let df: DfOutput = serde_json::from_slice(&out)?;
        Ok(DiskUsage {
            volumes: df.volumes.into_iter().map(DfVolume::into_entry).collect(),
        })
    }

    async fn create_volume(&self, options: &CreateVolumeOptions) -> Result<String> {
        let mut cmd = self.compat();
        cmd.args(["volume", "create"]);
        push_labels(&mut cmd, &options.labels);
        if let Some(name) = &options.name {
            cmd.arg(name);
        }
        run_trimmed(cmd, "docker volume create").await
    }

    async fn remove_volume(&self, name: &str, force: bool) -> Result<()> {
        let mut cmd = self.compat();
        cmd.args(["volume", "rm"]);
        if force {
            cmd.arg("--force");
        }
        cmd.arg(name);
        run(cmd, "docker volume rm").await.map(|_| ())
    }

    async fn prune_volumes(&self) -> Result<PruneReport> {
        let mut cmd = self.compat();
        cmd.args(["volume", "prune", "--force"]);
        let out = run(cmd, "docker volume prune").await?;
        Ok(parse_prune_output(&String::from_utf8_lossy(&out)))
    }

    async fn list_networks(&self) -> Result<Vec<CompatNetwork>> {
        let mut cmd = self.compat();
        cmd.args(["network", "ls", "--quiet", "--no-trunc"]);
        let ids = non_empty_lines(&run(cmd, "docker network ls").await?);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = self.compat();
        cmd.args(["network", "inspect"]).args(&ids);
        let out = run(cmd, "docker network inspect").await?;
        parse_json_output(&out)
    }

    async fn create_network(&self, options: &CreateNetworkOptions) -> Result<String> {
        let mut cmd = self.compat();
        cmd.args(["network", "create"]);
        if let Some(driver) = &options.driver {
            cmd.arg("--driver").arg(driver);
        }
        push_labels(&mut cmd, &options.labels);
        cmd.arg(&options.name);
        run_trimmed(cmd, "docker network create").await
    }

    async fn remove_network(&self, id: &str) -> Result<()> {
        let mut cmd = self.compat();
        cmd.args(["network", "rm", id]);
        run(cmd, "docker network rm").await.map(|_| ())
    }

    fn events(&self) -> JsonStream {
        let mut cmd = self.compat();
        cmd.args(["events", "--format", "{{json .}}"]);
        line_stream(cmd, "docker events".to_string(), false, parse_json_line)
    }

    async fn attach(&self, id: &str) -> Result<AttachIo> {
        let mut cmd = self.compat();
        cmd.args(["attach", "--sig-proxy=false", id]);
        attach_child(cmd, "docker attach")
    }

    async fn logs(&self, id: &str, options: &LogsOptions) -> Result<ByteStream> {
        let mut cmd = self.compat();
        cmd.arg("logs");
        if options.follow {
            cmd.arg("--follow");
        }
        if let Some(tail) = options.tail {
            cmd.arg("--tail").arg(tail.to_string());
        }
        if options.timestamps {
            cmd.arg("--timestamps");
        }
        cmd.arg(id);
        let child = spawn_piped(cmd, false)?;
        Ok(child_output(child, "docker logs".to_string(), false, true))
    }

    async fn exec(&self, id: &str, options: &ExecOptions) -> Result<ExecSession> {
        let mut cmd = self.compat();
        cmd.arg("exec");
        if options.attach_stdin {
            cmd.arg("--interactive");
        }
        if options.tty {
            cmd.arg("--tty");
        }
        for env in &options.env {
            cmd.arg("--env").arg(env);
        }
        if let Some(user) = &options.user {
            cmd.arg("--user").arg(user);
        }
        if let Some(dir) = &options.working_dir {
            cmd.arg("--workdir").arg(dir);
        }
        cmd.arg(id).args(&options.cmd);

        let exec_id = format!("cli-exec-{}", self.next_exec.fetch_add(1, Ordering::Relaxed));
        if options.tty {
            return self.exec_on_pty(cmd, exec_id, options.attach_stdin);
        }

        let mut child = spawn_piped(cmd, options.attach_stdin)?;
        let input = child
            .stdin
            .take()
            .map(|stdin| -> super::InputSink { Box::pin(stdin) });
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let guard = self.track_exec(
            &exec_id,
            ExecProcess {
                child,
                #[cfg(unix)]
                pty: None,
            },
        );
        let output: ByteStream = Box::pin(async_stream::stream! {
            let _guard = guard;
            let out = match stdout {
                Some(s) => ReaderStream::new(s).map(|r| (StdStream::Stdout, r)).boxed(),
                None => stream::empty().boxed(),
            };
            let err = match stderr {
                Some(s) => ReaderStream::new(s).map(|r| (StdStream::Stderr, r)).boxed(),
                None => stream::empty().boxed(),
            };
            let mut merged = stream::select(out, err);
            while let Some((which, item)) = merged.next().await {
                match item {
                    Ok(bytes) => yield Ok(encode_frame(which, &bytes)),
                    Err(e) => {
                        yield Err(EngineError::Io(e));
                        return;
                    }
                }
            }
        });

        Ok(ExecSession {
            exec_id,
            output,
            input,
        })
    }

    async fn exec_running(&self, exec_id: &str) -> Result<bool> {
        let mut execs = self.execs();
        let Some(process) = execs.get_mut(exec_id) else {
            return Ok(false);
        };
        match process.child.try_wait() {
            Ok(Some(_status)) => {
                execs.remove(exec_id);
                Ok(false)
            }
            Ok(None) => Ok(true),
            Err(e) => {
                warn!(exec_id, error = %e, "error checking exec process status");
                Ok(false)
            }
        }
    }

    async fn resize_exec(&self, exec_id: &str, width: u16, height: u16) -> Result<()> {
        let execs = self.execs();
        let process = execs
            .get(exec_id)
            .ok_or_else(|| EngineError::NotFound(format!("exec {exec_id}")))?;
        process.resize(width, height)
    }

    async fn stats(&self, id: &str) -> Result<ByteStream> {
        let mut cmd = self.compat();
        cmd.args(["stats", "--no-trunc", "--format", "{{json .}}", id]);
        cmd.stdout(Stdio::piped()).stderr(Stdio::null());
        let child = cmd.spawn()?;
        Ok(child_output(child, "docker stats".to_string(), false, true))
    }

    async fn build_image(&self, options: &BuildOptions, auth: Option<AuthConfig>) -> Result<JsonStream> {
        let (mut cmd, auth_dir) = self.compat_with_auth(auth.as_ref())?;
        cmd.arg("build");
        if let Some(file) = &options.containerfile {
            cmd.arg("--file").arg(file);
        }
        if let Some(tag) = &options.tag {
            cmd.arg("--tag").arg(tag);
        }
        if let Some(platform) = &options.platform {
            cmd.arg("--platform").arg(platform);
        }
        let mut args: Vec<_> = options.build_args.iter().collect();
        args.sort();
        for (k, v) in args {
            cmd.arg("--build-arg").arg(format!("{k}={v}"));
        }
        cmd.arg(&options.context_dir);
        let lines = line_stream(cmd, "docker build".to_string(), true, wrap_stream_line);
        Ok(holding(lines, auth_dir))
    }

    async fn pull_image(&self, image: &str, auth: Option<AuthConfig>) -> Result<JsonStream> {
        let (mut cmd, auth_dir) = self.compat_with_auth(auth.as_ref())?;
        cmd.args(["pull", image]);
        let lines = line_stream(cmd, "docker pull".to_string(), false, wrap_status_line);
        Ok(holding(lines, auth_dir))
    }

    async fn push_image(&self, image: &str, auth: Option<AuthConfig>) -> Result<ByteStream> {
        let (mut cmd, auth_dir) = self.compat_with_auth(auth.as_ref())?;
        cmd.args(["push", image]);
        let child = spawn_piped(cmd, false)?;
        Ok(holding(
            child_output(child, "docker push".to_string(), false, true),
            auth_dir,
        ))
    }

    async fn save_images(&self, images: &[String], target: &Path) -> Result<()> {
        let mut cmd = self.compat();
        cmd.arg("save").arg("--output").arg(target).args(images);
        run(cmd, "docker save").await.map(|_| ())
    }

    async fn load_images(&self, archive: &Path) -> Result<()> {
        let mut cmd = self.compat();
        cmd.arg("load").arg("--input").arg(archive);
        run(cmd, "docker load").await.map(|_| ())
    }

    async fn export_container(&self, id: &str, target: &Path) -> Result<()> {
        let mut cmd = self.compat();
        cmd.arg("export").arg("--output").arg(target).arg(id);
        run(cmd, "docker export").await.map(|_| ())
    }

    async fn import_container(&self, archive: &Path, reference: Option<&str>) -> Result<String> {
        let mut cmd = self.compat();
        cmd.arg("import").arg(archive);
        if let Some(reference) = reference {
            cmd.arg(reference);
        }
        run_trimmed(cmd, "docker import").await
    }
}

fn attach_child(cmd: Command, label: &str) -> Result<AttachIo> {
    let mut child = spawn_piped(cmd, true)?;
    let input = child
        .stdin
        .take()
        .map(|stdin| -> super::InputSink { Box::pin(stdin) });
    Ok(AttachIo {
        output: child_output(child, label.to_string(), false, false),
        input,
    })
}

/// Drops the exec's process entry (killing it if still alive) once the
/// output stream is gone.
struct ExecGuard {
    execs: Arc<Mutex<HashMap<String, ExecProcess>>>,
    exec_id: String,
}

impl Drop for ExecGuard {
    fn drop(&mut self) {
        let mut execs = self.execs.lock().unwrap_or_else(|e| e.into_inner());
        execs.remove(&self.exec_id);
    }
}

// ---------------------------------------------------------------------------
// NativeApi
// ---------------------------------------------------------------------------

#[async_trait]
impl NativeApi for CliEngineClient {
    async fn list_containers(&self, all: bool) -> Result<Vec<NativeContainer>> {
        let mut cmd = self.native();
        cmd.args(["ps", "--format", "json"]);
        if all {
            cmd.arg("--all");
        }
        parse_json_output(&run(cmd, "podman ps").await?)
    }

    async fn list_pods(&self) -> Result<Vec<NativePod>> {
        let mut cmd = self.native();
        cmd.args(["pod", "ps", "--format", "json"]);
        parse_json_output(&run(cmd, "podman pod ps").await?)
    }

    async fn list_images(&self, all: bool) -> Result<Vec<NativeImage>> {
        let mut cmd = self.native();
        cmd.args(["images", "--format", "json"]);
        if all {
            cmd.arg("--all");
        }
        parse_json_output(&run(cmd, "podman images").await?)
    }

    async fn create_pod(&self, options: &CreatePodOptions) -> Result<String> {
        let mut cmd = self.native();
        cmd.args(["pod", "create", "--name", &options.name]);
        push_labels(&mut cmd, &options.labels);
        run_trimmed(cmd, "podman pod create").await
    }

    async fn start_pod(&self, id: &str) -> Result<()> {
        let mut cmd = self.native();
        cmd.args(["pod", "start", id]);
        run(cmd, "podman pod start").await.map(|_| ())
    }

    async fn stop_pod(&self, id: &str) -> Result<()> {
        let mut cmd = self.native();
        cmd.args(["pod", "stop", id]);
        run(cmd, "podman pod stop").await.map(|_| ())
    }

    async fn restart_pod(&self, id: &str) -> Result<()> {
        let mut cmd = self.native();
        cmd.args(["pod", "restart", id]);
        run(cmd, "podman pod restart").await.map(|_| ())
    }

    async fn remove_pod(&self, id: &str, force: bool) -> Result<()> {
        let mut cmd = self.native();
        cmd.args(["pod", "rm"]);
        if force {
            cmd.arg("--force");
        }
        cmd.arg(id);
        run(cmd, "podman pod rm").await.map(|_| ())
    }

    async fn create_manifest(&self, options: &ManifestOptions) -> Result<String> {
        let mut cmd = self.native();
        cmd.args(["manifest", "create"]);
        if options.all {
            cmd.arg("--all");
        }
        cmd.arg(&options.name).args(&options.images);
        run_trimmed(cmd, "podman manifest create").await
    }

    async fn attach(&self, id: &str) -> Result<AttachIo> {
        let mut cmd = self.native();
        cmd.args(["attach", "--sig-proxy=false", id]);
        attach_child(cmd, "podman attach")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ps_line_translates_to_api_shape() {
        let line = r#"{"Command":"\"nginx -g 'daemon off;'\"","CreatedAt":"2024-03-01 10:00:00 +0000 UTC","ID":"abc123","Image":"nginx:latest","Labels":"project=demo,tier=web","Names":"web","Ports":"0.0.0.0:8080->80/tcp, :::8080->80/tcp","State":"running","Status":"Up 2 minutes"}"#;
        let ps: PsLine = serde_json::from_str(line).unwrap();
        let c = ps.into_compat();
        assert_eq!(c.id, "abc123");
        assert_eq!(c.names, vec!["/web"]);
        assert_eq!(c.command, "nginx -g 'daemon off;'");
        assert_eq!(c.created, 1709287200);
        assert_eq!(c.ports.len(), 2);
        assert_eq!(c.ports[0].ip.as_deref(), Some("0.0.0.0"));
        assert_eq!(c.ports[1].ip.as_deref(), Some("::"));
        assert_eq!(c.labels.unwrap()["tier"], "web");
    }

    #[test]
    fn port_without_host_binding() {
        let p = parse_port("53/udp").unwrap();
        assert_eq!(p.private_port, 53);
        assert_eq!(p.public_port, None);
        assert_eq!(p.port_type, "udp");
    }

    #[test]
    fn port_range_takes_first() {
        let p = parse_port("0.0.0.0:8000-8001->9000-9001/tcp").unwrap();
        assert_eq!(p.private_port, 9000);
        assert_eq!(p.public_port, Some(8000));
    }

    #[test]
    fn empty_port_list() {
        assert!(parse_port_list("").is_empty());
    }

    #[test]
    fn human_sizes() {
        assert_eq!(parse_human_size("0B"), 0);
        assert_eq!(parse_human_size("1.5kB"), 1500);
        assert_eq!(parse_human_size("2MiB"), 2 * 1024 * 1024);
        assert_eq!(parse_human_size("garbage"), 0);
    }

    #[test]
    fn prune_output_parsing() {
        let text = "Deleted Containers:\nabc\ndef\n\nTotal reclaimed space: 1kB\n";
        let report = parse_prune_output(text);
        assert_eq!(report.deleted, vec!["abc", "def"]);
        assert_eq!(report.space_reclaimed, 1000);

        let images = "Deleted Images:\nuntagged: alpine:3\ndeleted: sha256:111\n\nTotal reclaimed space: 0B";
        let report = parse_prune_output(images);
        assert_eq!(report.deleted, vec!["alpine:3", "sha256:111"]);
    }

    #[test]
    fn json_output_array_or_lines() {
        let arr: Vec<Value> = parse_json_output(br#"[{"a":1},{"a":2}]"#).unwrap();
        assert_eq!(arr.len(), 2);
        let lines: Vec<Value> = parse_json_output(b"{\"a\":1}\n\n{\"a\":2}\n").unwrap();
        assert_eq!(lines.len(), 2);
        let empty: Vec<Value> = parse_json_output(b"  \n").unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn json_line_skips_escape_prefix() {
        let v = parse_json_line("\u{1b}[2J\u{1b}[H{\"CPUPerc\":\"0.5%\"}").unwrap();
        assert_eq!(v["CPUPerc"], "0.5%");
        assert!(parse_json_line("no json here").is_none());
    }

    #[test]
    fn df_volume_links_number_or_string() {
        let df: DfOutput = serde_json::from_str(
            r#"{"Volumes":[{"Name":"a","Links":2,"Size":"1kB"},{"Name":"b","Links":"0","Size":"0B"}]}"#,
        )
        .unwrap();
        let entries: Vec<_> = df.volumes.into_iter().map(DfVolume::into_entry).collect();
        assert_eq!(entries[0].usage_data.as_ref().unwrap().ref_count, 2);
        assert_eq!(entries[0].usage_data.as_ref().unwrap().size, 1000);
        assert_eq!(entries[1].usage_data.as_ref().unwrap().ref_count, 0);
    }

    #[test]
    fn connector_only_gives_native_view_to_native_endpoints() {
        let connector = CliConnector::new();
        let compat = Arc::new(EngineEndpoint::new(
            "docker",
            "default",
            "unix:///var/run/docker.sock",
            crate::model::EngineKind::Compat,
        ));
        let native = Arc::new(EngineEndpoint::new(
            "podman",
            "machine",
            "unix:///run/podman/podman.sock",
            crate::model::EngineKind::Native,
        ));
        assert!(connector.connect(compat).unwrap().native.is_none());
        assert!(connector.connect(native).unwrap().native.is_some());
    }

    #[tokio::test]
    async fn missing_binary_is_io_error() {
        let client = CliEngineClient::new(
            "/nonexistent/docker",
            "/nonexistent/podman",
            "unix:///nowhere.sock",
        );
        let err = CompatApi::ping(&client).await.unwrap_err();
        assert!(matches!(err, EngineError::Io(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn exec_running_unknown_id_is_false() {
        let client = CliEngineClient::new("docker", "podman", "unix:///nowhere.sock");
        assert!(!client.exec_running("cli-exec-404").await.unwrap());
    }

    fn bot(server: &str) -> AuthConfig {
        AuthConfig {
            username: "bot".into(),
            password: "s3cret".into(),
            server_address: server.into(),
        }
    }

    #[test]
    fn client_auth_config_is_basic_auth_per_server() {
        let config = client_auth_config(&bot("quay.io"));
        assert_eq!(config["auths"]["quay.io"]["auth"], STANDARD.encode("bot:s3cret"));

        let hub = client_auth_config(&bot("docker.io"));
        assert!(hub["auths"][DOCKER_HUB_KEY]["auth"].is_string());
        assert!(hub["auths"].get("docker.io").is_none());
    }

    /// A stand-in client binary running `body` as a shell script.
    #[cfg(unix)]
    fn fake_cli(dir: &Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("docker");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    /// Prints the `--config` directory and its `config.json`, if given.
    #[cfg(unix)]
    const ECHO_CONFIG: &str = r#"while [ $# -gt 0 ]; do
  if [ "$1" = --config ]; then echo "$2"; cat "$2/config.json"; echo; fi
  shift
done"#;

    #[cfg(unix)]
    async fn pull_statuses(client: &CliEngineClient, auth: Option<AuthConfig>) -> Vec<String> {
        client
            .pull_image("quay.io/team/app:1", auth)
            .await
            .unwrap()
            .map(|item| item.unwrap()["status"].as_str().unwrap().to_string())
            .collect()
            .await
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn pull_reads_credentials_from_throwaway_config() {
        let bin = tempfile::TempDir::new().unwrap();
        let client = CliEngineClient::new(&fake_cli(bin.path(), ECHO_CONFIG), "podman", "unix:///nowhere.sock");

        let lines = pull_statuses(&client, Some(bot("quay.io"))).await;
        assert_eq!(lines.len(), 2, "output: {lines:?}");
        let config: Value = serde_json::from_str(&lines[1]).unwrap();
        assert_eq!(config["auths"]["quay.io"]["auth"], STANDARD.encode("bot:s3cret"));
        assert!(!Path::new(&lines[0]).exists(), "client config outlived the pull");

        assert!(pull_statuses(&client, None).await.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn push_reads_credentials_and_cleans_up() {
        let bin = tempfile::TempDir::new().unwrap();
        let client = CliEngineClient::new(&fake_cli(bin.path(), ECHO_CONFIG), "podman", "unix:///nowhere.sock");

        let mut output = Vec::new();
        let mut stream = client.push_image("quay.io/team/app:1", Some(bot("quay.io"))).await.unwrap();
        while let Some(chunk) = stream.next().await {
            output.extend(chunk.unwrap());
        }
        let text = String::from_utf8(output).unwrap();
        let dir = text.lines().next().unwrap().to_string();
        assert!(text.contains(&STANDARD.encode("bot:s3cret")));
        drop(stream);
        assert!(!Path::new(&dir).exists());
    }

    #[cfg(unix)]
    fn tty_exec() -> ExecOptions {
        ExecOptions {
            cmd: vec!["sh".into()],
            tty: true,
            attach_stdin: true,
            ..ExecOptions::default()
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn tty_exec_runs_on_a_resizable_terminal() {
        let bin = tempfile::TempDir::new().unwrap();
        let client = CliEngineClient::new(
            &fake_cli(bin.path(), "test -t 0 && echo on-tty; sleep 5"),
            "podman",
            "unix:///nowhere.sock",
        );

        let mut session = CompatApi::exec(&client, "c1", &tty_exec()).await.unwrap();
        assert!(session.input.is_some());
        let mut seen = String::new();
        while !seen.contains("on-tty") {
            let chunk = tokio::time::timeout(std::time::Duration::from_secs(5), session.output.next())
                .await
                .expect("no terminal output")
                .expect("output ended early")
                .unwrap();
            seen.push_str(&String::from_utf8_lossy(&chunk));
        }

        client.resize_exec(&session.exec_id, 120, 40).await.unwrap();
        {
            let execs = client.execs();
            let control = execs[&session.exec_id].pty.as_ref().unwrap();
            let mut size = pty_size();
            let ret = unsafe { libc::ioctl(std::os::fd::AsRawFd::as_raw_fd(control), libc::TIOCGWINSZ as _, &mut size) };
            assert_eq!(ret, 0);
            assert_eq!((size.ws_col, size.ws_row), (120, 40));
        }

        let exec_id = session.exec_id.clone();
        drop(session);
        assert!(!client.exec_running(&exec_id).await.unwrap());
    }

    #[cfg(unix)]
    fn pty_size() -> libc::winsize {
        libc::winsize {
            ws_row: 0,
            ws_col: 0,
            ws_xpixel: 0,
            ws_ypixel: 0,
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn resize_needs_a_known_tty_exec() {
        let bin = tempfile::TempDir::new().unwrap();
        let client = CliEngineClient::new(&fake_cli(bin.path(), "sleep 5"), "podman", "unix:///nowhere.sock");

        assert!(matches!(
            client.resize_exec("cli-exec-404", 80, 24).await,
            Err(EngineError::NotFound(_))
        ));

        let options = ExecOptions {
            cmd: vec!["true".into()],
            ..ExecOptions::default()
        };
        let session = CompatApi::exec(&client, "c1", &options).await.unwrap();
        assert!(matches!(
            client.resize_exec(&session.exec_id, 80, 24).await,
            Err(EngineError::Unsupported(_))
        ));
    }
}
