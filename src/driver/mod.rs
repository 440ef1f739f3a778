//! Transfer driver: the background thread that owns all in-flight
//! transfers.
//!
//! Exactly one thread performs transport I/O. It runs a current-thread
//! runtime and a `LocalSet`, so every transfer task, every callback, and
//! the sweep all execute on that thread; the in-flight set needs no lock
//! because caller threads only ever reach it through the submission
//! channel. Caller-visible coordination happens through the shared
//! response states (atomic status, cancel flag, condvar).
//!
//! Per tick (default 10 ms) the driver: reaps transfers that resolved
//! naturally, force-terminates transfers whose cancellation flag is set,
//! force-terminates transfers that missed their connection deadline
//! without any transport activity, and force-terminates transfers with
//! no upload/header/body activity for longer than the stall timeout. On shutdown it force-cancels everything still
//! in flight so no caller is left blocked on an unresolved state.

use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, warn};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, LocalSet};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::response::{ResponseState, Status};
use crate::status::{STATUS_STALL_TIMEOUT, STATUS_TIMEOUT};
use crate::transfer::{
    finalize_canceled, finalize_with_code, ActivityClock, Transfer, TransferBuffers, TransferSpec,
};

/// One validated request handed from a caller thread to the driver.
pub(crate) struct Submission {
    pub spec: TransferSpec,
    pub state: Arc<ResponseState>,
}

/// Driver-side bookkeeping for one active transfer.
struct InFlight {
    state: Arc<ResponseState>,
    buffers: Arc<Mutex<TransferBuffers>>,
    activity: Arc<ActivityClock>,
    abort: AbortHandle,
    /// When the per-request timeout expires. Only enforced while the
    /// transport has produced no activity yet; the deadline disarms at
    /// the first upload, header, or body byte.
    connect_deadline: Option<Instant>,
}

/// Spawns the driver thread. It exits when `token` is cancelled or the
/// submission channel closes.
pub(crate) fn spawn(
    config: EngineConfig,
    client: reqwest::Client,
    rx: mpsc::UnboundedReceiver<Submission>,
    token: CancellationToken,
) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("courier-driver".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    // Dropping rx closes the channel, so submissions fail
                    // fast instead of queueing forever.
                    error!("driver runtime initialization failed: {err}");
                    return;
                }
            };
            let local = LocalSet::new();
            local.block_on(&runtime, run(config, client, rx, token));
        })
}

async fn run(
    config: EngineConfig,
    client: reqwest::Client,
    mut rx: mpsc::UnboundedReceiver<Submission>,
    token: CancellationToken,
) {
    let mut in_flight: Vec<InFlight> = Vec::new();
    let mut tick = tokio::time::interval(config.tick_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            submission = rx.recv() => match submission {
                Some(submission) => activate(&mut in_flight, &client, submission),
                None => break,
            },
            _ = tick.tick() => sweep(&mut in_flight, config.stall_timeout),
        }
    }

    if !in_flight.is_empty() {
        debug!(
            "driver shutting down with {} transfer(s) in flight; force-canceling",
            in_flight.len()
        );
    }
    for entry in in_flight.drain(..) {
        entry.abort.abort();
        finalize_canceled(&entry.state, &entry.buffers);
    }
    // Submissions still queued in the channel never became transfers;
    // resolve them too so no caller blocks on shutdown.
    rx.close();
    while let Ok(submission) = rx.try_recv() {
        let buffers = Mutex::new(TransferBuffers::default());
        finalize_canceled(&submission.state, &buffers);
    }
}

/// Moves a submission into the in-flight set and starts its task on the
/// driver thread.
fn activate(in_flight: &mut Vec<InFlight>, client: &reqwest::Client, submission: Submission) {
    let Submission { spec, state } = submission;
    let connect_deadline = spec.timeout.map(|timeout| Instant::now() + timeout);
    let transfer = Transfer::new(spec, Arc::clone(&state), client.clone());
    let buffers = transfer.buffers();
    let activity = transfer.activity();
    let abort = tokio::task::spawn_local(transfer.run()).abort_handle();
    in_flight.push(InFlight {
        state,
        buffers,
        activity,
        abort,
        connect_deadline,
    });
}

/// One pass over the in-flight set: reap resolved transfers and apply
/// the manual termination conditions.
fn sweep(in_flight: &mut Vec<InFlight>, stall_timeout: Duration) {
    in_flight.retain(|entry| {
        if entry.state.status() != Status::Pending {
            // Resolved naturally by its own task; nothing left to do.
            return false;
        }
        if entry.state.cancel_requested() {
            entry.abort.abort();
            finalize_canceled(&entry.state, &entry.buffers);
            return false;
        }
        if let Some(deadline) = entry.connect_deadline {
            // Armed only until the first byte moves: a transfer that is
            // uploading or downloading is past connection establishment,
            // and from then on its liveness belongs to the stall timer.
            if !entry.activity.engaged() && Instant::now() >= deadline {
                warn!("no transport activity before the connection deadline; terminating");
                entry.abort.abort();
                finalize_with_code(&entry.state, &entry.buffers, STATUS_TIMEOUT);
                return false;
            }
        }
        if entry.activity.idle() >= stall_timeout {
            warn!("transfer idle for {stall_timeout:?}; force-terminating as stalled");
            entry.abort.abort();
            finalize_with_code(&entry.state, &entry.buffers, STATUS_STALL_TIMEOUT);
            return false;
        }
        true
    });
}
