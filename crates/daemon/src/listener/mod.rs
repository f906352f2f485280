// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-channel listener.
//!
//! Accepts TCP connections on the control port and runs each one as a
//! reader task plus a writer task joined by an outbound channel, so
//! responses, progress events and console frames share one ordered
//! lane per connection. Each request dispatches onto a bounded worker
//! pool; per-app ordering comes from the lifecycle lanes (requests are
//! admitted in arrival order, and both the worker semaphore and the
//! app mutexes are FIFO).
//!
//! Deadlines: the handler future is spawned, not dropped, when its
//! deadline expires; the caller gets `deadline_exceeded` immediately
//! while the cancellation token lets an in-flight start tear down its
//! fresh sandbox. Side effects already committed stay committed; the
//! reconciler owns their convergence.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use vea_core::{Clock, SystemClock};
use vea_store::AppFilter;

use crate::console::ConsoleHub;
use crate::lifecycle::{
    detect_dependencies, LifecycleCore, LifecycleError, OpOutcome, ProgressEvent,
};
use crate::protocol::{
    self, AppStatusEntry, ManageAction, OpReply, ProtocolError, Request, Response,
};

/// Outbound frames buffered per connection before a slow client starts
/// losing its console subscription.
const OUTBOUND_BUFFER: usize = 256;

/// Concurrent request handlers across all connections.
pub const WORKER_POOL_SIZE: usize = 4;

/// Console lines attached to a `get_app_status` response.
const STATUS_LOG_TAIL: usize = 20;

/// The daemon's concrete core type.
pub type DaemonCore = LifecycleCore<SystemClock>;

/// Shared context for all connections.
pub struct ListenCtx<C: Clock = SystemClock> {
    pub core: Arc<LifecycleCore<C>>,
    pub console: Arc<ConsoleHub<C>>,
    pub workers: Arc<Semaphore>,
    pub clock: C,
}

impl<C: Clock> ListenCtx<C> {
    pub fn new(core: Arc<LifecycleCore<C>>, console: Arc<ConsoleHub<C>>, clock: C) -> Self {
        Self { core, console, workers: Arc::new(Semaphore::new(WORKER_POOL_SIZE)), clock }
    }

    fn now_ms(&self) -> u64 {
        self.clock.epoch_ms()
    }
}

/// Accept loop. Runs until `shutdown` fires.
pub async fn run<C: Clock>(
    listener: TcpListener,
    ctx: Arc<ListenCtx<C>>,
    shutdown: CancellationToken,
) {
    info!(addr = ?listener.local_addr().ok(), "control channel listening");
    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, addr)) => {
                    debug!(%addr, "control connection accepted");
                    let ctx = Arc::clone(&ctx);
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, ctx, shutdown).await;
                    });
                }
                Err(e) => error!(error = %e, "control accept failed"),
            },
            _ = shutdown.cancelled() => {
                info!("control channel shutting down");
                break;
            }
        }
    }
}

/// One connection: reader here, writer in its own task.
async fn handle_connection<C: Clock>(
    stream: TcpStream,
    ctx: Arc<ListenCtx<C>>,
    shutdown: CancellationToken,
) {
    let (mut reader, mut writer) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::channel::<Response>(OUTBOUND_BUFFER);

    let writer_task = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if let Err(e) = protocol::write_message(&mut writer, &message).await {
                debug!(error = %e, "control write failed, dropping connection");
                break;
            }
        }
    });

    loop {
        tokio::select! {
            message = protocol::read_message::<_, Request>(&mut reader) => match message {
                Ok(request) => {
                    let ctx = Arc::clone(&ctx);
                    let out_tx = out_tx.clone();
                    tokio::spawn(async move {
                        handle_request(request, ctx, out_tx).await;
                    });
                }
                Err(ProtocolError::ConnectionClosed) => {
                    debug!("control client disconnected");
                    break;
                }
                Err(ProtocolError::Malformed(e)) => {
                    warn!(error = %e, "malformed control message");
                    let response = Response::Error {
                        id: String::new(),
                        error: format!("malformed message: {e}"),
                        kind: vea_core::ErrorKind::Validation,
                        suggestions: vec!["check the request against the control schema".into()],
                        timestamp: ctx.now_ms(),
                    };
                    if out_tx.send(response).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    // Framing is unrecoverable mid-stream.
                    warn!(error = %e, "control read failed, dropping connection");
                    break;
                }
            },
            _ = shutdown.cancelled() => break,
        }
    }

    drop(out_tx);
    let _ = writer_task.await;
}

/// Acquire a worker slot, run the request, push the response.
async fn handle_request<C: Clock>(
    request: Request,
    ctx: Arc<ListenCtx<C>>,
    out_tx: mpsc::Sender<Response>,
) {
    let Ok(_permit) = Arc::clone(&ctx.workers).acquire_owned().await else {
        return; // pool closed during shutdown
    };
    if let Some(response) = dispatch(request, &ctx, &out_tx).await {
        let _ = out_tx.send(response).await;
    }
}

/// Run a lifecycle operation under the request deadline. The future is
/// spawned so it survives the timeout; `cancel` tells it to roll back.
async fn with_deadline<T, F>(
    deadline: Duration,
    cancel: CancellationToken,
    fut: F,
) -> Result<T, LifecycleError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, LifecycleError>> + Send + 'static,
{
    let mut task = tokio::spawn(fut);
    match tokio::time::timeout(deadline, &mut task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => {
            Err(LifecycleError::Internal(format!("request handler failed: {join_error}")))
        }
        Err(_elapsed) => {
            cancel.cancel();
            Err(LifecycleError::DeadlineExceeded)
        }
    }
}

/// Map one request onto the core. Returns the terminal response, or
/// `None` when frames flow on the outbound lane instead
/// (`console_subscribe`).
pub(crate) async fn dispatch<C: Clock>(
    request: Request,
    ctx: &Arc<ListenCtx<C>>,
    out_tx: &mpsc::Sender<Response>,
) -> Option<Response> {
    let now = ctx.now_ms();
    let deadline = ctx.core.config().request_deadline();

    match request {
        Request::Ping { id } => Some(Response::Pong { id, timestamp: now }),

        Request::DeployRequest(body) => {
            let (id, spec) = body.into_spec();
            let cancel = CancellationToken::new();
            let (progress_tx, forwarder) = progress_lane(ctx, out_tx, &id, &spec.app_id);
            let core = Arc::clone(&ctx.core);
            let op_cancel = cancel.clone();
            let result = with_deadline(deadline, cancel, async move {
                core.deploy(spec, Some(&progress_tx), &op_cancel).await
            })
            .await;
            settle_progress(&result, forwarder).await;
            Some(match result {
                Ok((outcome, _validation)) => {
                    Response::DeployRequest(reply(&id, outcome, ctx.now_ms()))
                }
                Err(e) => Response::from_error(&id, &e, ctx.now_ms()),
            })
        }

        Request::SmartDeploy(body) => {
            let (id, spec) = body.into_spec();
            let cancel = CancellationToken::new();
            let (progress_tx, forwarder) = progress_lane(ctx, out_tx, &id, &spec.app_id);
            let core = Arc::clone(&ctx.core);
            let op_cancel = cancel.clone();
            let result = with_deadline(deadline, cancel, async move {
                core.smart_deploy(spec, Some(&progress_tx), &op_cancel).await
            })
            .await;
            settle_progress(&result, forwarder).await;
            Some(match result {
                Ok((outcome, detection, validation)) => Response::SmartDeploy {
                    reply: reply(&id, outcome, ctx.now_ms()),
                    detection,
                    validation,
                },
                Err(e) => Response::from_error(&id, &e, ctx.now_ms()),
            })
        }

        Request::RunApp { id, app_id } => {
            let cancel = CancellationToken::new();
            let core = Arc::clone(&ctx.core);
            let op_cancel = cancel.clone();
            let result = with_deadline(deadline, cancel, async move {
                core.start(&app_id, &op_cancel).await
            })
            .await;
            Some(op_response(&id, result, ctx.now_ms(), Response::RunApp))
        }

        Request::StopApp { id, app_id, grace_ms } => {
            let core = Arc::clone(&ctx.core);
            let grace = grace_ms.map(Duration::from_millis);
            let result = with_deadline(deadline, CancellationToken::new(), async move {
                core.stop(&app_id, grace).await
            })
            .await;
            Some(op_response(&id, result, ctx.now_ms(), Response::StopApp))
        }

        Request::PauseApp { id, app_id } => {
            let core = Arc::clone(&ctx.core);
            let result =
                with_deadline(deadline, CancellationToken::new(), async move {
                    core.pause(&app_id).await
                })
                .await;
            Some(op_response(&id, result, ctx.now_ms(), Response::AppPaused))
        }

        Request::ResumeApp { id, app_id } => {
            let core = Arc::clone(&ctx.core);
            let result =
                with_deadline(deadline, CancellationToken::new(), async move {
                    core.resume(&app_id).await
                })
                .await;
            Some(op_response(&id, result, ctx.now_ms(), Response::AppResumed))
        }

        Request::UninstallApp { id, app_id } => {
            let core = Arc::clone(&ctx.core);
            let result =
                with_deadline(deadline, CancellationToken::new(), async move {
                    core.remove(&app_id).await
                })
                .await;
            Some(op_response(&id, result, ctx.now_ms(), Response::AppUninstalled))
        }

        Request::ManageApp { id, app_id, action } => {
            let core = Arc::clone(&ctx.core);
            let cancel = CancellationToken::new();
            let op_cancel = cancel.clone();
            let result = with_deadline(deadline, cancel, async move {
                match action {
                    ManageAction::Start => core.start(&app_id, &op_cancel).await,
                    ManageAction::Stop => core.stop(&app_id, None).await,
                    ManageAction::Pause => core.pause(&app_id).await,
                    ManageAction::Resume => core.resume(&app_id).await,
                    ManageAction::Restart => core.restart(&app_id, &op_cancel).await,
                }
            })
            .await;
            Some(op_response(&id, result, ctx.now_ms(), Response::ManageApp))
        }

        Request::ListDeployedApps { id } => {
            let apps: Vec<AppStatusEntry> =
                ctx.core.list(AppFilter::default()).into_iter().map(Into::into).collect();
            Some(Response::ListDeployedApps { id, apps, timestamp: now })
        }

        Request::GetAppStatus { id, app_id } => Some(match ctx.core.get_status(&app_id) {
            Ok(view) => {
                let logs = ctx.core.tail_logs(&app_id, STATUS_LOG_TAIL).unwrap_or_default();
                Response::GetAppStatus { id, app: view.into(), logs, timestamp: now }
            }
            Err(e) => Response::from_error(&id, &e, now),
        }),

        Request::GetDeploymentStatus { id, app_id } => Some(match ctx.core.get_status(&app_id) {
            Ok(view) => Response::DeploymentStatus {
                id,
                app_id: view.app_id.as_str().to_string(),
                state: view.state,
                execution_id: view.execution_id.map(|e| e.as_str().to_string()),
                timestamp: now,
            },
            Err(e) => Response::from_error(&id, &e, now),
        }),

        Request::DetectDependencies { id, app_id, artifact, kind } => {
            let source = match (artifact, app_id) {
                (Some(artifact), _) => Ok((artifact, kind)),
                (None, Some(app_id)) => ctx.core.artifact_of(&app_id),
                (None, None) => Err(LifecycleError::Validation(
                    "detect_dependencies requires artifact or app_id".to_string(),
                )),
            };
            Some(match source {
                Ok((artifact, kind)) => Response::DependenciesDetected {
                    id,
                    dependencies: detect_dependencies(&artifact, kind),
                    timestamp: now,
                },
                Err(e) => Response::from_error(&id, &e, now),
            })
        }

        Request::ValidateSignals { id, signals } => {
            let validation = ctx.core.gateway().validate(&signals);
            Some(Response::SignalsValidated { id, validation, timestamp: now })
        }

        Request::ConsoleSubscribe { id, execution_id } => {
            match ctx.console.subscribe(&execution_id) {
                Some(rx) => {
                    spawn_console_forwarder(rx, out_tx.clone(), execution_id);
                    None
                }
                None => Some(Response::from_error(
                    &id,
                    &LifecycleError::NotFound(execution_id),
                    now,
                )),
            }
        }
    }
}

/// Drain the progress lane before the terminal response goes out. A
/// deadline-expired request still owns its progress sender in the
/// background, so waiting would stall the error frame; late progress
/// is dropped instead.
async fn settle_progress<T>(
    result: &Result<T, LifecycleError>,
    forwarder: tokio::task::JoinHandle<()>,
) {
    match result {
        Err(LifecycleError::DeadlineExceeded) => forwarder.abort(),
        _ => {
            let _ = forwarder.await;
        }
    }
}

/// Per-request progress lane: events are forwarded as
/// `deployment_progress` frames ahead of the terminal response.
fn progress_lane<C: Clock>(
    ctx: &Arc<ListenCtx<C>>,
    out_tx: &mpsc::Sender<Response>,
    id: &str,
    raw_app_id: &str,
) -> (mpsc::Sender<ProgressEvent>, tokio::task::JoinHandle<()>) {
    let (progress_tx, mut progress_rx) = mpsc::channel::<ProgressEvent>(16);
    let out = out_tx.clone();
    let id = id.to_string();
    let app_id = ctx
        .core
        .identity()
        .canonicalize(raw_app_id)
        .map(|a| a.as_str().to_string())
        .unwrap_or_else(|_| raw_app_id.to_string());
    let clock = ctx.clock.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(event) = progress_rx.recv().await {
            let frame = Response::DeploymentProgress {
                id: id.clone(),
                app_id: app_id.clone(),
                event,
                timestamp: clock.epoch_ms(),
            };
            if out.send(frame).await.is_err() {
                break;
            }
        }
    });
    (progress_tx, forwarder)
}

/// Forward console frames until the subscriber lags or disconnects.
fn spawn_console_forwarder(
    mut rx: broadcast::Receiver<vea_store::LogRecord>,
    out_tx: mpsc::Sender<Response>,
    execution_id: String,
) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(record) => {
                    if out_tx.send(Response::console_frame(record)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    // Slow subscribers are dropped, never allowed to
                    // block the source.
                    warn!(execution_id = %execution_id, missed, "console subscriber lagged, dropping");
                    break;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn reply(id: &str, outcome: OpOutcome, timestamp: u64) -> OpReply {
    OpReply::from_outcome(id, outcome, timestamp)
}

fn op_response(
    id: &str,
    result: Result<OpOutcome, LifecycleError>,
    timestamp: u64,
    wrap: fn(OpReply) -> Response,
) -> Response {
    match result {
        Ok(outcome) => wrap(reply(id, outcome, timestamp)),
        Err(e) => Response::from_error(id, &e, timestamp),
    }
}

#[cfg(test)]
#[path = "../listener_tests.rs"]
mod tests;
