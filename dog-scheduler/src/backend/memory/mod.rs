//! In-process scheduler backend.
//!
//! A timer thread evaluates triggers and hands due fire events to a fixed
//! pool of worker threads, each running the installed [`JobCallback`]
//! synchronously. The timer only takes as many due triggers as there are idle
//! workers, so a saturated pool leaves triggers due instead of queueing a
//! backlog. Nothing is persisted; misfires are fired once on the next timer
//! pass that finds a free worker.

mod storage;
mod timer;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::{
    backend::{ExternalScheduler, JobCallback, JobDetail, Trigger},
    config::SchedulerConfig,
    error::{JobError, SchedulingError, SchedulingResult},
    types::{FireId, JobKey, ScheduleSpec, TriggerKey},
};

use storage::TriggerStore;
use timer::{run_timer, run_worker, Control, Work};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Standby,
    Started,
    Shutdown,
}

/// State shared between the scheduler handle and its threads
pub(crate) struct Shared {
    pub(crate) config: SchedulerConfig,
    pub(crate) store: Mutex<TriggerStore>,
    pub(crate) callback: RwLock<Option<Arc<dyn JobCallback>>>,
    state: Mutex<RunState>,
    fired: AtomicU64,
    idle_workers: AtomicUsize,
}

impl Shared {
    pub(crate) fn is_shutdown(&self) -> bool {
        *self.state.lock() == RunState::Shutdown
    }

    pub(crate) fn record_fired(&self) {
        self.fired.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn idle_workers(&self) -> usize {
        self.idle_workers.load(Ordering::Acquire)
    }

    /// Claim `n` idle workers for timer dispatch; only the timer claims
    pub(crate) fn claim_workers(&self, n: usize) {
        self.idle_workers.fetch_sub(n, Ordering::AcqRel);
    }

    pub(crate) fn release_worker(&self) {
        self.idle_workers.fetch_add(1, Ordering::AcqRel);
    }
}

struct Threads {
    control: Sender<Control>,
    work: Sender<Work>,
    timer: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

/// Outcome handle for a manual fire
#[derive(Debug)]
pub struct FireReceipt {
    fire_id: FireId,
    outcome: Receiver<Result<(), JobError>>,
}

impl FireReceipt {
    pub fn fire_id(&self) -> &FireId {
        &self.fire_id
    }

    /// Wait for the callback to return.
    ///
    /// `None` if it did not return in time, panicked, or was skipped by shutdown.
    pub fn wait(&self, timeout: Duration) -> Option<Result<(), JobError>> {
        self.outcome.recv_timeout(timeout).ok()
    }

    /// Outcome if the callback already returned
    pub fn try_outcome(&self) -> Option<Result<(), JobError>> {
        self.outcome.try_recv().ok()
    }
}

/// In-memory scheduler with a timer thread and a fixed worker pool
pub struct MemoryScheduler {
    shared: Arc<Shared>,
    threads: Mutex<Option<Threads>>,
}

impl MemoryScheduler {
    /// Create a scheduler in standby; nothing fires until [`start`](ExternalScheduler::start)
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                store: Mutex::new(TriggerStore::default()),
                callback: RwLock::new(None),
                state: Mutex::new(RunState::Standby),
                fired: AtomicU64::new(0),
                idle_workers: AtomicUsize::new(config.thread_count.max(1)),
                config,
            }),
            threads: Mutex::new(None),
        }
    }

    /// Fire a trigger's job right now without advancing its schedule
    #[instrument(skip(self), fields(instance = %self.shared.config.instance_name))]
    pub fn fire_now(&self, trigger_key: &TriggerKey) -> SchedulingResult<FireReceipt> {
        let ctx = self.shared.store.lock().manual_fire(trigger_key)?;
        let fire_id = ctx.fire_id.clone();
        let (reply, outcome) = channel::bounded(1);

        let threads = self.threads.lock();
        let threads = threads.as_ref().ok_or(SchedulingError::NotRunning)?;
        threads
            .work
            .send(Work {
                ctx,
                reply: Some(reply),
                claimed: false,
            })
            .map_err(|_| SchedulingError::NotRunning)?;

        debug!(fire_id = %fire_id, "Manual fire dispatched");
        Ok(FireReceipt { fire_id, outcome })
    }

    /// Callbacks that ran to completion, success or failure
    pub fn fired_count(&self) -> u64 {
        self.shared.fired.load(Ordering::Relaxed)
    }

    fn wake(&self) {
        if let Some(threads) = self.threads.lock().as_ref() {
            let _ = threads.control.send(Control::Wake);
        }
    }

    fn spawn_threads(&self) -> SchedulingResult<Threads> {
        let config = &self.shared.config;
        let (control_tx, control_rx) = channel::unbounded();
        let (work_tx, work_rx) = channel::unbounded();

        let thread_count = config.thread_count.max(1);
        let mut workers = Vec::with_capacity(thread_count);
        for i in 0..thread_count {
            let shared = self.shared.clone();
            let work_rx = work_rx.clone();
            let control = control_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-worker-{}", config.instance_name, i))
                .spawn(move || run_worker(shared, work_rx, control))
                .map_err(|e| SchedulingError::Backend(format!("failed to spawn worker: {e}")))?;
            workers.push(handle);
        }

        let shared = self.shared.clone();
        let timer_work = work_tx.clone();
        let timer = thread::Builder::new()
            .name(format!("{}-timer", config.instance_name))
            .spawn(move || run_timer(shared, control_rx, timer_work))
            .map_err(|e| SchedulingError::Backend(format!("failed to spawn timer: {e}")))?;

        Ok(Threads {
            control: control_tx,
            work: work_tx,
            timer,
            workers,
        })
    }
}

impl ExternalScheduler for MemoryScheduler {
    fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    fn set_job_callback(&self, callback: Arc<dyn JobCallback>) {
        let previous = self.shared.callback.write().replace(callback);
        if previous.is_some() {
            warn!(instance = %self.shared.config.instance_name, "Replacing installed job callback");
        }
    }

    fn schedule_job(&self, job: JobDetail, trigger: Trigger) -> SchedulingResult<Option<DateTime<Utc>>> {
        if self.shared.is_shutdown() {
            return Err(SchedulingError::Shutdown);
        }
        let next = self.shared.store.lock().add(job, trigger, Utc::now())?;
        self.wake();
        Ok(next)
    }

    fn unschedule_job(&self, trigger_key: &TriggerKey) -> SchedulingResult<bool> {
        let removed = self.shared.store.lock().remove_trigger(trigger_key);
        if removed {
            self.wake();
        }
        Ok(removed)
    }

    fn reschedule_job(
        &self,
        trigger_key: &TriggerKey,
        schedule: ScheduleSpec,
    ) -> SchedulingResult<Option<DateTime<Utc>>> {
        let next = self
            .shared
            .store
            .lock()
            .reschedule(trigger_key, schedule, Utc::now())?;
        self.wake();
        Ok(next)
    }

    fn delete_job(&self, job_key: &JobKey) -> SchedulingResult<bool> {
        let removed = self.shared.store.lock().remove_job(job_key);
        if removed {
            self.wake();
        }
        Ok(removed)
    }

    fn check_exists(&self, job_key: &JobKey) -> bool {
        self.shared.store.lock().contains_job(job_key)
    }

    fn next_fire_time(&self, trigger_key: &TriggerKey) -> Option<DateTime<Utc>> {
        self.shared.store.lock().next_fire_time(trigger_key)
    }

    fn start(&self) -> SchedulingResult<()> {
        let mut threads = self.threads.lock();
        {
            let state = self.shared.state.lock();
            match *state {
                RunState::Shutdown => return Err(SchedulingError::Shutdown),
                RunState::Started => return Ok(()),
                RunState::Standby => {}
            }
        }

        *threads = Some(self.spawn_threads()?);
        *self.shared.state.lock() = RunState::Started;

        info!(
            instance = %self.shared.config.instance_name,
            thread_count = self.shared.config.thread_count,
            "Scheduler started"
        );
        Ok(())
    }

    fn shutdown(&self, wait_for_jobs: bool) {
        {
            let mut state = self.shared.state.lock();
            if *state == RunState::Shutdown {
                return;
            }
            *state = RunState::Shutdown;
        }

        // Releases the queue senders held by the callback once in-flight fires finish
        self.shared.callback.write().take();

        let Some(threads) = self.threads.lock().take() else {
            info!(instance = %self.shared.config.instance_name, "Scheduler shut down from standby");
            return;
        };
        let Threads {
            control,
            work,
            timer,
            workers,
        } = threads;

        let _ = control.send(Control::Shutdown);
        drop(work);
        if timer.join().is_err() {
            warn!("Scheduler timer thread panicked");
        }

        if wait_for_jobs {
            for worker in workers {
                if worker.join().is_err() {
                    warn!("Scheduler worker thread panicked");
                }
            }
        }

        info!(
            instance = %self.shared.config.instance_name,
            wait_for_jobs,
            "Scheduler shut down"
        );
    }

    fn is_started(&self) -> bool {
        *self.shared.state.lock() == RunState::Started
    }

    fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }
}

impl Drop for MemoryScheduler {
    fn drop(&mut self) {
        self.shutdown(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FireContext;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingCallback {
        calls: AtomicUsize,
        seen: Mutex<Vec<FireContext>>,
    }

    impl JobCallback for CountingCallback {
        fn execute(&self, ctx: &FireContext) -> Result<(), JobError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().push(ctx.clone());
            Ok(())
        }
    }

    fn scheduler() -> (MemoryScheduler, Arc<CountingCallback>) {
        let scheduler = MemoryScheduler::new(
            SchedulerConfig::default()
                .with_thread_count(2)
                .with_idle_wait(Duration::from_millis(50)),
        );
        let callback = Arc::new(CountingCallback::default());
        scheduler.set_job_callback(callback.clone());
        (scheduler, callback)
    }

    fn cron_trigger(name: &str, job: &str) -> Trigger {
        Trigger::new(TriggerKey::named(name), JobKey::named(job), ScheduleSpec::cron("0 0 0 1 1 *"))
    }

    #[test]
    fn test_fire_now_requires_running_scheduler() {
        let (scheduler, _) = scheduler();
        scheduler
            .schedule_job(JobDetail::new(JobKey::named("j")), cron_trigger("t", "j"))
            .unwrap();

        assert!(matches!(
            scheduler.fire_now(&TriggerKey::named("t")),
            Err(SchedulingError::NotRunning)
        ));
    }

    #[test]
    fn test_fire_now_runs_callback_with_merged_data() {
        let (scheduler, callback) = scheduler();
        scheduler.start().unwrap();

        let job = JobDetail::new(JobKey::named("j")).with_data([("k".to_string(), "job".to_string())].into());
        let trigger = cron_trigger("t", "j").with_data([("k".to_string(), "trigger".to_string())].into());
        scheduler.schedule_job(job, trigger).unwrap();

        let receipt = scheduler.fire_now(&TriggerKey::named("t")).unwrap();
        assert_eq!(receipt.wait(Duration::from_secs(2)), Some(Ok(())));

        let seen = callback.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].data["k"], "trigger");
        assert_eq!(&seen[0].fire_id, receipt.fire_id());
        assert_eq!(scheduler.fired_count(), 1);
    }

    #[test]
    fn test_fire_now_unknown_trigger() {
        let (scheduler, _) = scheduler();
        scheduler.start().unwrap();

        assert_eq!(
            scheduler.fire_now(&TriggerKey::named("nope")).unwrap_err(),
            SchedulingError::UnknownTrigger(TriggerKey::named("nope"))
        );
    }

    #[test]
    fn test_due_one_shot_fires_from_timer() {
        let (scheduler, callback) = scheduler();
        scheduler.start().unwrap();

        let at = Utc::now() + chrono::Duration::milliseconds(100);
        scheduler
            .schedule_job(
                JobDetail::new(JobKey::named("j")),
                Trigger::new(TriggerKey::named("t"), JobKey::named("j"), ScheduleSpec::one_shot(at)),
            )
            .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(3);
        while callback.calls.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(callback.calls.load(Ordering::SeqCst), 1);
        assert!(!scheduler.check_exists(&JobKey::named("j")));
    }

    struct GatedCallback {
        started: AtomicUsize,
        gate: Receiver<()>,
    }

    impl JobCallback for GatedCallback {
        fn execute(&self, _: &FireContext) -> Result<(), JobError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let _ = self.gate.recv();
            Ok(())
        }
    }

    #[test]
    fn test_busy_pool_leaves_trigger_due_instead_of_queueing() {
        let scheduler = MemoryScheduler::new(
            SchedulerConfig::default()
                .with_thread_count(1)
                .with_idle_wait(Duration::from_millis(50)),
        );
        let (open, gate) = channel::unbounded();
        let callback = Arc::new(GatedCallback {
            started: AtomicUsize::new(0),
            gate,
        });
        scheduler.set_job_callback(callback.clone());
        scheduler.start().unwrap();
        scheduler
            .schedule_job(
                JobDetail::new(JobKey::named("j")),
                Trigger::new(TriggerKey::named("t"), JobKey::named("j"), ScheduleSpec::cron("* * * * * *")),
            )
            .unwrap();

        thread::sleep(Duration::from_millis(3200));
        assert_eq!(callback.started.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.shared.idle_workers(), 0);
        assert_eq!(scheduler.threads.lock().as_ref().unwrap().work.len(), 0);
        assert!(scheduler.next_fire_time(&TriggerKey::named("t")).unwrap() <= Utc::now());

        // The missed seconds collapse into one fire, not a burst
        drop(open);
        thread::sleep(Duration::from_millis(300));
        assert!(callback.started.load(Ordering::SeqCst) <= 3);
        assert!(scheduler.next_fire_time(&TriggerKey::named("t")).unwrap() > Utc::now() - chrono::Duration::seconds(1));

        scheduler.shutdown(true);
    }

    #[test]
    fn test_shutdown_is_terminal() {
        let (scheduler, _) = scheduler();
        scheduler.start().unwrap();
        scheduler.shutdown(true);

        assert!(scheduler.is_shutdown());
        assert!(!scheduler.is_started());
        assert_eq!(scheduler.start(), Err(SchedulingError::Shutdown));
        assert_eq!(
            scheduler.schedule_job(JobDetail::new(JobKey::named("j")), cron_trigger("t", "j")),
            Err(SchedulingError::Shutdown)
        );
    }
}
