use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, info_span, warn};

use crate::{error::JobError, types::FireContext};

use super::Shared;

/// Messages to the timer thread
#[derive(Debug)]
pub(crate) enum Control {
    /// Triggers changed; recompute the next wake-up
    Wake,
    Shutdown,
}

/// One fire event handed to the worker pool
pub(crate) struct Work {
    pub ctx: FireContext,
    pub reply: Option<Sender<Result<(), JobError>>>,
    /// Dispatched by the timer against an idle worker, released when done
    pub claimed: bool,
}

/// Timer loop: dispatch due triggers to idle workers, then sleep until the
/// next one, a released worker, or a control message
pub(crate) fn run_timer(shared: Arc<Shared>, control: Receiver<Control>, work: Sender<Work>) {
    info!(instance = %shared.config.instance_name, "Scheduler timer started");

    loop {
        let idle_workers = shared.idle_workers();
        let due = if idle_workers == 0 {
            Vec::new()
        } else {
            shared.store.lock().take_due(Utc::now(), idle_workers)
        };
        shared.claim_workers(due.len());

        for ctx in due {
            debug!(
                trigger_key = %ctx.trigger_key,
                job_key = %ctx.job_key,
                fire_id = %ctx.fire_id,
                "Trigger due"
            );
            let work_item = Work {
                ctx,
                reply: None,
                claimed: true,
            };
            if work.send(work_item).is_err() {
                warn!("Worker pool gone, stopping timer");
                return;
            }
        }

        // Due triggers left behind by a busy pool wait for a worker's wake-up
        let idle = shared.config.idle_wait;
        let wait = if shared.idle_workers() == 0 {
            idle
        } else {
            shared
                .store
                .lock()
                .earliest_fire()
                .map(|at| (at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
                .unwrap_or(idle)
                .min(idle)
        };

        match control.recv_timeout(wait) {
            Ok(Control::Wake) | Err(RecvTimeoutError::Timeout) => {}
            Ok(Control::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!(instance = %shared.config.instance_name, "Scheduler timer stopped");
}

/// Worker loop: run the job callback for each fire event until the pool closes
pub(crate) fn run_worker(shared: Arc<Shared>, work: Receiver<Work>, control: Sender<Control>) {
    for Work { ctx, reply, claimed } in work.iter() {
        let outcome = run_fire(&shared, &ctx);

        if let (Some(reply), Some(outcome)) = (reply, outcome) {
            let _ = reply.send(outcome);
        }
        if claimed {
            shared.release_worker();
            let _ = control.send(Control::Wake);
        }
    }
}

/// `None` when the fire was skipped or the callback panicked
fn run_fire(shared: &Shared, ctx: &FireContext) -> Option<Result<(), JobError>> {
    if shared.is_shutdown() {
        debug!(fire_id = %ctx.fire_id, "Scheduler shut down, skipping queued fire");
        return None;
    }

    let Some(callback) = shared.callback.read().clone() else {
        error!(job_key = %ctx.job_key, "No job callback installed, dropping fire");
        return None;
    };

    let span = info_span!(
        "fire",
        fire_id = %ctx.fire_id,
        job_key = %ctx.job_key,
        trigger_key = %ctx.trigger_key
    );
    let _entered = span.enter();

    let Ok(outcome) = panic::catch_unwind(AssertUnwindSafe(|| callback.execute(ctx))) else {
        error!("Job callback panicked");
        return None;
    };
    shared.record_fired();

    match &outcome {
        Ok(()) => debug!("Job callback succeeded"),
        Err(e) => warn!(error = %e, "Job callback failed"),
    }
    Some(outcome)
}
