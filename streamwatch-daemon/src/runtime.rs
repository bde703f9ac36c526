use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use streamwatch_core::types::OwnerId;
use streamwatch_core::{config, Config};
use streamwatch_renderer::Renderer;
use streamwatch_sync::{
    handle_command_failure, CommandContext, CommandFailure, Engine, EngineConfig,
    FailureResponse, LiveSetProvider, MessageStore, PassReport, RecoverySummary,
    RestartCorrelator, RestartOutcome, StateSnapshot, SyncError,
};

use crate::discord::DiscordClient;
use crate::error::{io_err, DaemonError};
use crate::paths::{run_dir, socket_path};
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::twitch::TwitchProvider;

/// Failed check shown to users outside `admin_user_ids`.
pub const NOT_ADMIN_CHECK: &str = "You must be a bot admin to run this command";

// ---------------------------------------------------------------------------
// Engine status and jobs
// ---------------------------------------------------------------------------

/// What other tasks may read about the engine. Published after every pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub state: StateSnapshot,
    pub recovery: Option<RecoverySummary>,
    pub last_pass: Option<PassReport>,
    pub last_pass_at: Option<DateTime<Utc>>,
    /// Error of the most recent pass, cleared by the next successful one.
    pub last_error: Option<String>,
    pub passes: u64,
    /// Outcome of the startup restart correlation, once it has run.
    pub restart: Option<String>,
}

enum EngineJob {
    Reconcile {
        respond_to: oneshot::Sender<Result<PassReport, SyncError>>,
    },
    ResolveOwner {
        name: String,
        respond_to: oneshot::Sender<Result<OwnerId, SyncError>>,
    },
}

/// Cloneable front of the reconcile task.
#[derive(Clone)]
pub struct ReconcilerHandle {
    jobs: mpsc::Sender<EngineJob>,
    status: Arc<RwLock<EngineStatus>>,
}

impl ReconcilerHandle {
    /// Run a pass now, queued behind any pass already in progress.
    pub async fn reconcile(&self) -> Result<PassReport, DaemonError> {
        let (tx, rx) = oneshot::channel();
        self.jobs
            .send(EngineJob::Reconcile { respond_to: tx })
            .await
            .map_err(|_| DaemonError::ChannelClosed("engine queue"))?;
        let outcome = rx
            .await
            .map_err(|_| DaemonError::ChannelClosed("engine response"))?;
        Ok(outcome?)
    }

    pub async fn resolve_owner(&self, name: &str) -> Result<OwnerId, DaemonError> {
        let (tx, rx) = oneshot::channel();
        self.jobs
            .send(EngineJob::ResolveOwner {
                name: name.to_string(),
                respond_to: tx,
            })
            .await
            .map_err(|_| DaemonError::ChannelClosed("engine queue"))?;
        let outcome = rx
            .await
            .map_err(|_| DaemonError::ChannelClosed("engine response"))?;
        Ok(outcome?)
    }

    pub async fn status(&self) -> EngineStatus {
        self.status.read().await.clone()
    }

    async fn record_restart(&self, description: String) {
        self.status.write().await.restart = Some(description);
    }
}

/// Spawn the task that owns `engine`. It recovers the cache, then runs a
/// pass on every `period` tick (the first immediately) and on every queued
/// job until `shutdown` fires.
pub fn spawn_reconciler<P, S>(
    engine: Engine<P, S>,
    period: Duration,
    shutdown: &broadcast::Sender<()>,
) -> (ReconcilerHandle, JoinHandle<Result<(), DaemonError>>)
where
    P: LiveSetProvider + 'static,
    S: MessageStore + 'static,
{
    let (jobs_tx, jobs_rx) = mpsc::channel::<EngineJob>(16);
    let status = Arc::new(RwLock::new(EngineStatus::default()));
    let handle = ReconcilerHandle {
        jobs: jobs_tx,
        status: status.clone(),
    };

    let shutdown = shutdown.clone();
    let shutdown_rx = shutdown.subscribe();
    let task = tokio::spawn(async move {
        let result = reconcile_task(engine, period, status, jobs_rx, shutdown_rx).await;
        let _ = shutdown.send(());
        result
    });
    (handle, task)
}

async fn reconcile_task<P, S>(
    mut engine: Engine<P, S>,
    period: Duration,
    status: Arc<RwLock<EngineStatus>>,
    mut jobs: mpsc::Receiver<EngineJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError>
where
    P: LiveSetProvider,
    S: MessageStore,
{
    match engine.start().await {
        Ok(summary) => {
            let mut guard = status.write().await;
            guard.recovery = Some(summary);
            guard.state = engine.snapshot();
        }
        Err(err) => {
            tracing::warn!(error = %err, "initial cache recovery failed, first pass will retry");
        }
    }

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                if let Err(err) = run_pass(&mut engine, &status).await {
                    tracing::error!(error = %err, "scheduled reconciliation pass failed");
                }
            }
            job = jobs.recv() => {
                let Some(job) = job else { break };
                match job {
                    EngineJob::Reconcile { respond_to } => {
                        let _ = respond_to.send(run_pass(&mut engine, &status).await);
                    }
                    EngineJob::ResolveOwner { name, respond_to } => {
                        let _ = respond_to.send(engine.resolve_owner_id(&name).await);
                    }
                }
            }
        }
    }

    Ok(())
}

async fn run_pass<P, S>(
    engine: &mut Engine<P, S>,
    status: &RwLock<EngineStatus>,
) -> Result<PassReport, SyncError>
where
    P: LiveSetProvider,
    S: MessageStore,
{
    let result = engine.tick().await;

    let mut guard = status.write().await;
    guard.passes += 1;
    guard.last_pass_at = Some(Utc::now());
    guard.state = engine.snapshot();
    match &result {
        Ok(report) => {
            guard.last_pass = Some(report.clone());
            guard.last_error = None;
        }
        Err(err) => guard.last_error = Some(err.to_string()),
    }
    result
}

// ---------------------------------------------------------------------------
// Daemon entry points
// ---------------------------------------------------------------------------

/// Adapters the runtime drives.
pub struct Services<P, S> {
    pub provider: P,
    pub streamer: S,
    /// Channel for restart notices and command error reports.
    pub admin: Arc<dyn MessageStore>,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Load and validate the config, connect to Twitch and Discord, and run.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    let config = config::load_at(&home)?;
    config.validate()?;

    let provider = TwitchProvider::new(
        config.twitch_client_id.clone(),
        config.twitch_client_secret.clone(),
    );
    let discord = Arc::new(DiscordClient::new(config.discord_token.clone()));
    let services = Services {
        provider,
        streamer: discord.channel(config.streamer_channel_id.clone()),
        admin: Arc::new(discord.channel(config.admin_bot_channel_id.clone())),
    };
    run_with(home, config, services).await
}

/// Run the daemon against arbitrary adapters until stopped.
pub async fn run_with<P, S>(
    home: PathBuf,
    config: Config,
    services: Services<P, S>,
) -> Result<(), DaemonError>
where
    P: LiveSetProvider + 'static,
    S: MessageStore + 'static,
{
    ensure_runtime_dirs(&home)?;
    let started_at = Utc::now();

    let renderer = Arc::new(Renderer::with_template_dir(config.template_dir.as_deref())?);
    let engine = Engine::new(
        services.provider,
        services.streamer,
        renderer.clone(),
        EngineConfig::from_config(&config),
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    let (reconciler, reconcile_handle) =
        spawn_reconciler(engine, config.update_interval(), &shutdown_tx);

    let restart_handle = {
        let admin = services.admin.clone();
        let renderer = renderer.clone();
        let command = config.force_restart_command_name.clone();
        let reconciler = reconciler.clone();
        tokio::spawn(async move {
            restart_task(admin, renderer, command, reconciler).await;
            Ok::<(), DaemonError>(())
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let ctx = Arc::new(ClientContext {
            home: home.clone(),
            admin_user_ids: config.admin_user_ids.clone(),
            reconciler: reconciler.clone(),
            renderer: renderer.clone(),
            admin: services.admin.clone(),
            shutdown: shutdown.clone(),
            started_at,
        });
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = socket_server_task(ctx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    tracing::info!(
        interval_secs = config.update_interval().as_secs(),
        game_id = %config.game_id,
        "streamwatch daemon started",
    );

    let (reconcile_result, restart_result, socket_result, signal_result) = tokio::join!(
        reconcile_handle,
        restart_handle,
        socket_handle,
        signal_handle
    );

    handle_join("reconciler", reconcile_result)?;
    handle_join("restart_correlator", restart_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

async fn restart_task(
    admin: Arc<dyn MessageStore>,
    renderer: Arc<Renderer>,
    command: String,
    reconciler: ReconcilerHandle,
) {
    let correlator = RestartCorrelator::new(admin.as_ref(), renderer.as_ref(), &command);
    let description = match correlator.run(Utc::now()).await {
        Ok(RestartOutcome::Replied { marker, elapsed }) => {
            tracing::info!(marker = %marker, elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX), "restart completion posted");
            format!("replied to {marker} after {:.2}s", elapsed.as_secs_f64())
        }
        Ok(RestartOutcome::AlreadyReplied { marker }) => {
            tracing::debug!(marker = %marker, "restart already acknowledged");
            format!("already acknowledged {marker}")
        }
        Ok(RestartOutcome::NotFound) => "no restart request found".to_string(),
        Err(err) => {
            tracing::warn!(error = %err, "restart correlation failed");
            format!("failed: {err}")
        }
    };
    reconciler.record_restart(description).await;
}

// ---------------------------------------------------------------------------
// Socket server
// ---------------------------------------------------------------------------

struct ClientContext {
    home: PathBuf,
    admin_user_ids: BTreeSet<String>,
    reconciler: ReconcilerHandle,
    renderer: Arc<Renderer>,
    admin: Arc<dyn MessageStore>,
    shutdown: broadcast::Sender<()>,
    started_at: DateTime<Utc>,
}

async fn socket_server_task(
    ctx: Arc<ClientContext>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let run = run_dir(&ctx.home);
    if !run.exists() {
        fs::create_dir_all(&run).map_err(|e| io_err(&run, e))?;
    }

    let socket = socket_path(&ctx.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::debug!(socket = %socket.display(), "control socket listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, ctx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(stream: UnixStream, ctx: Arc<ClientContext>) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = dispatch(&ctx, &request).await;
        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" && response.ok {
            break;
        }
    }

    Ok(())
}

async fn dispatch(ctx: &ClientContext, request: &DaemonRequest) -> DaemonResponse {
    let command = CommandContext::new(
        request.user.clone().unwrap_or_else(|| "<local>".to_string()),
        Some(request.cmd.as_str()),
    );

    match request.cmd.as_str() {
        "status" => DaemonResponse::ok(build_status_payload(ctx).await),
        "reconcile" => {
            if let Err(checks) = authorize(&ctx.admin_user_ids, request.user.as_deref()) {
                return failure_response(ctx, &command, CommandFailure::ChecksFailed(checks)).await;
            }
            match ctx.reconciler.reconcile().await {
                Ok(report) => DaemonResponse::ok(json!(report)),
                Err(DaemonError::Sync(err)) => {
                    failure_response(ctx, &command, CommandFailure::from(&err)).await
                }
                Err(err) => DaemonResponse::error(err.to_string()),
            }
        }
        "resolve" => {
            let Some(name) = request.name.as_deref().filter(|n| !n.trim().is_empty()) else {
                return DaemonResponse::error("resolve requires a name");
            };
            match ctx.reconciler.resolve_owner(name).await {
                Ok(owner) => DaemonResponse::ok(json!({ "name": name, "owner_id": owner })),
                Err(DaemonError::Sync(err)) if err.is_not_found() => {
                    DaemonResponse::error(err.to_string())
                }
                Err(DaemonError::Sync(err)) => {
                    failure_response(ctx, &command, CommandFailure::from(&err)).await
                }
                Err(err) => DaemonResponse::error(err.to_string()),
            }
        }
        "stop" => {
            if let Err(checks) = authorize(&ctx.admin_user_ids, request.user.as_deref()) {
                return failure_response(ctx, &command, CommandFailure::ChecksFailed(checks)).await;
            }
            tracing::info!(user = %command.user, "stop requested over control socket");
            let _ = ctx.shutdown.send(());
            DaemonResponse::ok(json!({ "stopping": true }))
        }
        other => DaemonResponse::error(format!("unknown command '{other}'")),
    }
}

async fn failure_response(
    ctx: &ClientContext,
    command: &CommandContext,
    failure: CommandFailure,
) -> DaemonResponse {
    let message = match &failure {
        CommandFailure::Unexpected { kind, message } => format!("{kind}: {message}"),
        CommandFailure::ChecksFailed(_) => String::new(),
    };
    match handle_command_failure(command, failure, &ctx.renderer, Some(ctx.admin.as_ref())).await {
        FailureResponse::Denied(embed) => DaemonResponse::denied(&embed),
        FailureResponse::Reported { posted } => DaemonResponse {
            ok: false,
            data: Some(json!({ "reported": posted })),
            error: Some(message),
        },
    }
}

/// Empty `admins` lets everyone through.
fn authorize(admins: &BTreeSet<String>, user: Option<&str>) -> Result<(), Vec<String>> {
    if admins.is_empty() {
        return Ok(());
    }
    match user {
        Some(user) if admins.contains(user) => Ok(()),
        _ => Err(vec![NOT_ADMIN_CHECK.to_string()]),
    }
}

async fn build_status_payload(ctx: &ClientContext) -> Value {
    let status = ctx.reconciler.status().await;
    json!({
        "running": true,
        "started_at": ctx.started_at,
        "socket": socket_path(&ctx.home).display().to_string(),
        "engine": status,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let run = run_dir(home);
    if !run.exists() {
        fs::create_dir_all(&run).map_err(|e| io_err(&run, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
