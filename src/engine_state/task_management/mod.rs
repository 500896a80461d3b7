//! # Tick-Synchronized Task Management
//!
//! This module lets expensive, read-only work (cluster detection) run on worker
//! threads while guaranteeing that everything it leads to runs back on the
//! single tick thread, at a tick boundary.
//!
//! ## Architecture Overview
//!
//! - `TickSyncScheduler`: owns the worker pool and the tick-boundary queue
//! - `Task`: a unit of work executed on a worker
//! - `TickFuture`: the pending result of a task; attach a continuation to it
//! - `TaskHandle`: cancels a continuation that has not run yet
//! - `TaskChannel`: communication channel between the tick thread and one worker
//!
//! ## Task Lifecycle
//! 1. `schedule_off_thread()` stamps the task with a sequence number and
//!    distributes it to a worker channel using round-robin
//! 2. The worker processes the task and sends the outcome back
//! 3. `collect_ready()` (called by the tick loop at the start of every tick)
//!    receives outcomes, pairs them with their continuations and returns the
//!    ready work sorted by sequence number
//! 4. The tick loop runs that work with exclusive access to its context
//!
//! ## Ordering
//! Work queued with `run_on_tick()` and continuations share one sequence
//! counter. Ready work always runs in sequence order, so a continuation never
//! runs before tick work that was queued ahead of it.
//!
//! ## Cancellation
//! Dropping a `TickFuture` without attaching a continuation, calling
//! `TaskHandle::cancel()`, or shutting the scheduler down all discard the
//! continuation without running it. The worker may still finish the compute;
//! its outcome is thrown away.
//!
//! ## Example Usage
//! ```rust
//! use std::time::Duration;
//! use vessel_engine::engine_state::task_management::{task::FnTask, TickSyncScheduler};
//!
//! let mut scheduler: TickSyncScheduler<Vec<u32>> = TickSyncScheduler::new(1);
//! let mut log = Vec::new();
//!
//! scheduler
//!     .schedule_off_thread(FnTask::new(|| Ok(21 * 2)))
//!     .then_on_tick_thread(|log: &mut Vec<u32>, value| log.push(value));
//!
//! while !scheduler.is_idle() {
//!     scheduler.wait_for_completion(Duration::from_secs(5));
//!     for work in scheduler.collect_ready() {
//!         work(&mut log);
//!     }
//! }
//! assert_eq!(log, vec![42]);
//! ```

pub mod task;

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::core::error::TaskError;
use crate::core::StResource;
use task::{ErasedTask, Outcome, Task};

/// Work that runs on the tick thread with exclusive access to the context.
pub type TickWork<C> = Box<dyn FnOnce(&mut C)>;

type SuccessFn<C> = Box<dyn FnOnce(&mut C, Box<dyn Any + Send>)>;
type FailureFn<C> = Box<dyn FnOnce(&mut C, TaskError)>;

/// Maximum number of tasks that can be in flight per worker channel.
///
/// This is set to 1 so a long detection on one worker never holds up a task
/// queued behind it while another worker sits idle.
pub const MAX_TASKS_IN_FLIGHT: usize = 1;

struct Job {
    sequence: u64,
    task: Box<dyn ErasedTask>,
}

struct Completion {
    sequence: u64,
    channel: usize,
    outcome: Outcome,
}

/// A communication channel between the tick thread and a worker thread.
pub struct TaskChannel {
    task_sender: Sender<Job>,
    num_tasks_in_flight: usize,
    _worker: JoinHandle<()>,
}

struct PendingEntry<C> {
    on_success: Option<SuccessFn<C>>,
    on_failure: Option<FailureFn<C>>,
    attached: bool,
    outcome: Option<Outcome>,
}

impl<C: 'static> PendingEntry<C> {
    fn new() -> Self {
        PendingEntry {
            on_success: None,
            on_failure: None,
            attached: false,
            outcome: None,
        }
    }

    fn into_work(self, sequence: u64, outcome: Outcome) -> TickWork<C> {
        let PendingEntry {
            on_success,
            on_failure,
            ..
        } = self;
        Box::new(move |context: &mut C| match outcome {
            Ok(value) => {
                if let Some(on_success) = on_success {
                    on_success(context, value);
                }
            }
            Err(task_error) => match on_failure {
                Some(on_failure) => on_failure(context, task_error),
                None => warn!("Task {} failed with no failure handler: {}", sequence, task_error),
            },
        })
    }
}

/// Tick-thread bookkeeping shared with futures and handles.
struct Shared<C> {
    pending: HashMap<u64, PendingEntry<C>>,
    ready: Vec<(u64, TickWork<C>)>,
}

impl<C: 'static> Shared<C> {
    fn complete(&mut self, sequence: u64, outcome: Outcome) {
        match self.pending.remove(&sequence) {
            Some(entry) if entry.attached => {
                self.ready.push((sequence, entry.into_work(sequence, outcome)));
            }
            Some(mut entry) => {
                entry.outcome = Some(outcome);
                self.pending.insert(sequence, entry);
            }
            None => debug!("Discarding outcome of cancelled task {}", sequence),
        }
    }

    fn attach(&mut self, sequence: u64, on_success: SuccessFn<C>) {
        if let Some(mut entry) = self.pending.remove(&sequence) {
            entry.on_success = Some(on_success);
            entry.attached = true;
            match entry.outcome.take() {
                Some(outcome) => self.ready.push((sequence, entry.into_work(sequence, outcome))),
                None => {
                    self.pending.insert(sequence, entry);
                }
            }
        }
    }

    fn cancel(&mut self, sequence: u64) -> bool {
        let was_pending = self.pending.remove(&sequence).is_some();
        let before = self.ready.len();
        self.ready.retain(|(queued, _)| *queued != sequence);
        was_pending || self.ready.len() != before
    }
}

/// Coordinates worker threads and the tick-boundary queue for a context `C`.
///
/// # Thread Affinity
/// The scheduler itself is `!Send`: it must stay on the tick thread that
/// created it. Only tasks cross to workers.
pub struct TickSyncScheduler<C> {
    channels: Vec<TaskChannel>,
    completion_receiver: Receiver<Completion>,
    queued_tasks: VecDeque<Job>,
    current_channel: usize,
    next_sequence: u64,
    shared: StResource<Shared<C>>,
    shut_down: bool,
}

impl<C: 'static> TickSyncScheduler<C> {
    /// Creates a scheduler with `num_workers` worker threads (at least one).
    pub fn new(num_workers: usize) -> Self {
        let num_workers = if num_workers == 0 {
            warn!("Scheduler asked for zero workers, using one");
            1
        } else {
            num_workers
        };

        let (completion_tx, completion_rx) = channel::<Completion>();
        let mut channels = Vec::with_capacity(num_workers);

        for index in 0..num_workers {
            let (task_tx, task_rx) = channel::<Job>();
            let completion_tx = completion_tx.clone();

            let worker = thread::spawn(move || {
                while let Ok(Job { sequence, task }) = task_rx.recv() {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.run()))
                        .unwrap_or(Err(TaskError::Panicked));
                    let completion = Completion {
                        sequence,
                        channel: index,
                        outcome,
                    };
                    if completion_tx.send(completion).is_err() {
                        break;
                    }
                }
            });

            channels.push(TaskChannel {
                task_sender: task_tx,
                num_tasks_in_flight: 0,
                _worker: worker,
            });
        }

        info!(
            "Started {} scheduler workers (available parallelism: {:?})",
            num_workers,
            thread::available_parallelism()
        );

        TickSyncScheduler {
            channels,
            completion_receiver: completion_rx,
            queued_tasks: VecDeque::new(),
            current_channel: 0,
            next_sequence: 0,
            shared: StResource::new(Shared {
                pending: HashMap::new(),
                ready: Vec::new(),
            }),
            shut_down: false,
        }
    }

    fn next_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    /// Runs `task` on a worker. Attach a continuation to the returned future.
    pub fn schedule_off_thread<T: Task>(&mut self, task: T) -> TickFuture<T::Output, C> {
        let sequence = self.next_sequence();
        self.shared.get_mut().pending.insert(sequence, PendingEntry::new());

        if self.shut_down {
            self.shared.get_mut().complete(sequence, Err(TaskError::Disconnected));
        } else {
            self.publish_job(Job {
                sequence,
                task: Box::new(task),
            });
        }

        TickFuture {
            sequence,
            shared: self.shared.clone(),
            attached: false,
            _output: PhantomData,
        }
    }

    /// Queues `work` for the next tick boundary.
    pub fn run_on_tick(&mut self, work: impl FnOnce(&mut C) + 'static) -> TaskHandle<C> {
        let sequence = self.next_sequence();
        let work: TickWork<C> = Box::new(work);
        self.shared.get_mut().ready.push((sequence, work));
        TaskHandle {
            sequence,
            shared: self.shared.clone(),
        }
    }

    fn try_send_task(&mut self, job: Job, channel_idx: usize) -> Result<(), Job> {
        match self.channels[channel_idx].task_sender.send(job) {
            Ok(_) => {
                self.channels[channel_idx].num_tasks_in_flight += 1;
                Ok(())
            }
            Err(returned) => Err(returned.0),
        }
    }

    fn find_available_channel(&self) -> Option<usize> {
        if self.channels.is_empty() {
            return None;
        }

        let start_channel = self.current_channel;
        let mut current = start_channel;
        loop {
            if self.channels[current].num_tasks_in_flight < MAX_TASKS_IN_FLIGHT {
                return Some(current);
            }
            current = (current + 1) % self.channels.len();
            if current == start_channel {
                return None;
            }
        }
    }

    fn publish_job(&mut self, job: Job) -> bool {
        match self.find_available_channel() {
            Some(channel_idx) => match self.try_send_task(job, channel_idx) {
                Ok(_) => {
                    self.current_channel = (channel_idx + 1) % self.channels.len();
                    true
                }
                Err(job) => {
                    error!("Worker {} disconnected", channel_idx);
                    self.shared.get_mut().complete(job.sequence, Err(TaskError::Disconnected));
                    false
                }
            },
            None => {
                self.queued_tasks.push_back(job);
                false
            }
        }
    }

    /// Hands queued tasks to workers that have room.
    pub fn process_queued_tasks(&mut self) {
        while !self.queued_tasks.is_empty() && self.find_available_channel().is_some() {
            if let Some(job) = self.queued_tasks.pop_front() {
                self.publish_job(job);
            }
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        if let Some(channel) = self.channels.get_mut(completion.channel) {
            channel.num_tasks_in_flight = channel.num_tasks_in_flight.saturating_sub(1);
        }
        self.shared
            .get_mut()
            .complete(completion.sequence, completion.outcome);
    }

    /// Receives every outcome the workers have produced so far.
    pub fn process_completed_tasks(&mut self) {
        while let Ok(completion) = self.completion_receiver.try_recv() {
            self.handle_completion(completion);
        }
        self.process_queued_tasks();
    }

    /// Blocks until one outcome arrives or `timeout` passes. Returns true if
    /// an outcome was received.
    pub fn wait_for_completion(&mut self, timeout: Duration) -> bool {
        if self.tasks_in_flight() == 0 {
            return false;
        }
        match self.completion_receiver.recv_timeout(timeout) {
            Ok(completion) => {
                self.handle_completion(completion);
                self.process_queued_tasks();
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => {
                error!("All scheduler workers have exited");
                false
            }
        }
    }

    /// Collects outcomes and returns the work that is ready to run, in
    /// sequence order. Call at a tick boundary, then run every item.
    pub fn collect_ready(&mut self) -> Vec<TickWork<C>> {
        self.process_completed_tasks();
        let mut ready = std::mem::take(&mut self.shared.get_mut().ready);
        ready.sort_by_key(|(sequence, _)| *sequence);
        ready.into_iter().map(|(_, work)| work).collect()
    }

    /// Tasks sent to workers or waiting for one.
    pub fn tasks_in_flight(&self) -> usize {
        self.channels
            .iter()
            .map(|channel| channel.num_tasks_in_flight)
            .sum::<usize>()
            + self.queued_tasks.len()
    }

    /// Returns true once no task is running and no work is waiting to run.
    pub fn is_idle(&self) -> bool {
        self.tasks_in_flight() == 0 && self.shared.get().ready.is_empty()
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.channels.len()
    }

    /// Stops the workers and drops every continuation that has not run.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.channels.clear();
        self.queued_tasks.clear();

        let mut shared = self.shared.get_mut();
        let dropped = shared.pending.len() + shared.ready.len();
        shared.pending.clear();
        shared.ready.clear();
        if dropped > 0 {
            warn!("Scheduler shut down with {} continuations dropped", dropped);
        }
    }
}

impl<C> Drop for TickSyncScheduler<C> {
    fn drop(&mut self) {
        self.channels.clear();
        self.queued_tasks.clear();
        let mut shared = self.shared.get_mut();
        shared.pending.clear();
        shared.ready.clear();
    }
}

/// The not-yet-available output of an off-thread task.
///
/// Dropping it without calling `then_on_tick_thread` cancels the continuation.
#[must_use = "dropping a TickFuture cancels its continuation"]
pub struct TickFuture<T, C> {
    sequence: u64,
    shared: StResource<Shared<C>>,
    attached: bool,
    _output: PhantomData<T>,
}

impl<T: Send + 'static, C: 'static> TickFuture<T, C> {
    /// Runs `on_failure` on the tick thread if the task fails.
    pub fn on_failure(self, on_failure: impl FnOnce(&mut C, TaskError) + 'static) -> Self {
        if let Some(entry) = self.shared.get_mut().pending.get_mut(&self.sequence) {
            entry.on_failure = Some(Box::new(on_failure));
        }
        self
    }

    /// Runs `continuation` on the tick thread, at the first tick boundary after
    /// the task finished.
    pub fn then_on_tick_thread(
        mut self,
        continuation: impl FnOnce(&mut C, T) + 'static,
    ) -> TaskHandle<C> {
        let sequence = self.sequence;
        let on_success: SuccessFn<C> =
            Box::new(move |context: &mut C, value: Box<dyn Any + Send>| {
                match value.downcast::<T>() {
                    Ok(value) => continuation(context, *value),
                    Err(_) => error!("Task {} produced an output of the wrong type", sequence),
                }
            });
        self.shared.get_mut().attach(sequence, on_success);
        self.attached = true;
        TaskHandle {
            sequence,
            shared: self.shared.clone(),
        }
    }
}

impl<T, C> Drop for TickFuture<T, C> {
    fn drop(&mut self) {
        if !self.attached && self.shared.get_mut().pending.remove(&self.sequence).is_some() {
            debug!("Future {} dropped, continuation cancelled", self.sequence);
        }
    }
}

/// Cancels a continuation or queued tick work that has not run yet.
pub struct TaskHandle<C> {
    sequence: u64,
    shared: StResource<Shared<C>>,
}

impl<C: 'static> TaskHandle<C> {
    /// Discards the continuation. Returns false if it already ran.
    pub fn cancel(self) -> bool {
        self.shared.get_mut().cancel(self.sequence)
    }

    /// Returns true while the continuation has not run.
    pub fn is_pending(&self) -> bool {
        let shared = self.shared.get();
        shared.pending.contains_key(&self.sequence)
            || shared.ready.iter().any(|(queued, _)| *queued == self.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine_state::task_management::task::FnTask;
    use std::sync::mpsc;

    fn drain(scheduler: &mut TickSyncScheduler<Vec<String>>, log: &mut Vec<String>) {
        for _ in 0..200 {
            for work in scheduler.collect_ready() {
                work(log);
            }
            if scheduler.is_idle() {
                return;
            }
            scheduler.wait_for_completion(Duration::from_millis(50));
        }
        panic!("scheduler never became idle");
    }

    #[test]
    fn continuation_runs_only_when_collected() {
        let mut scheduler = TickSyncScheduler::new(2);
        let mut log = Vec::new();
        let handle = scheduler
            .schedule_off_thread(FnTask::new(|| Ok(5)))
            .then_on_tick_thread(|log: &mut Vec<String>, value| log.push(format!("got {value}")));
        assert!(handle.is_pending());
        assert!(log.is_empty());

        drain(&mut scheduler, &mut log);
        assert_eq!(log, vec!["got 5"]);
        assert!(!handle.is_pending());
    }

    #[test]
    fn continuations_follow_earlier_tick_work() {
        let mut scheduler = TickSyncScheduler::new(1);
        let mut log = Vec::new();
        let _first = scheduler.run_on_tick(|log: &mut Vec<String>| log.push("tick work".into()));
        let _second = scheduler
            .schedule_off_thread(FnTask::new(|| Ok(())))
            .then_on_tick_thread(|log: &mut Vec<String>, _| log.push("continuation".into()));
        let _third = scheduler.run_on_tick(|log: &mut Vec<String>| log.push("later work".into()));

        drain(&mut scheduler, &mut log);
        assert_eq!(log[0], "tick work");
        assert!(log.contains(&"continuation".to_string()));
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn continuations_keep_submission_order() {
        let mut scheduler = TickSyncScheduler::new(3);
        let mut log = Vec::new();
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let _slow = scheduler
            .schedule_off_thread(FnTask::new(move || {
                gate_rx.recv().map_err(|_| TaskError::Disconnected)
            }))
            .then_on_tick_thread(|log: &mut Vec<String>, _| log.push("slow".into()));
        let _fast = scheduler
            .schedule_off_thread(FnTask::new(|| Ok(())))
            .then_on_tick_thread(|log: &mut Vec<String>, _| log.push("fast".into()));

        scheduler.wait_for_completion(Duration::from_secs(5));
        gate_tx.send(()).unwrap();
        scheduler.wait_for_completion(Duration::from_secs(5));
        for work in scheduler.collect_ready() {
            work(&mut log);
        }
        drain(&mut scheduler, &mut log);
        assert_eq!(log, vec!["slow", "fast"]);
    }

    #[test]
    fn failure_skips_continuation_and_reports() {
        let mut scheduler = TickSyncScheduler::new(1);
        let mut log = Vec::new();
        let _handle = scheduler
            .schedule_off_thread(FnTask::new(|| Err::<u8, _>(TaskError::Failed("boom".into()))))
            .on_failure(|log: &mut Vec<String>, error| log.push(error.to_string()))
            .then_on_tick_thread(|log: &mut Vec<String>, _| log.push("should not run".into()));

        drain(&mut scheduler, &mut log);
        assert_eq!(log, vec!["task failed: boom"]);
    }

    #[test]
    fn panicking_task_reports_panicked() {
        let mut scheduler = TickSyncScheduler::new(1);
        let mut log = Vec::new();
        let _handle = scheduler
            .schedule_off_thread(FnTask::new(|| -> Result<(), TaskError> { panic!("worker blew up") }))
            .on_failure(|log: &mut Vec<String>, error| log.push(format!("{error:?}")))
            .then_on_tick_thread(|_: &mut Vec<String>, _| {});

        drain(&mut scheduler, &mut log);
        assert_eq!(log, vec!["Panicked"]);

        let _after = scheduler
            .schedule_off_thread(FnTask::new(|| Ok(1)))
            .then_on_tick_thread(|log: &mut Vec<String>, _| log.push("worker survived".into()));
        drain(&mut scheduler, &mut log);
        assert_eq!(log.last().map(String::as_str), Some("worker survived"));
    }

    #[test]
    fn cancelled_and_dropped_continuations_never_run() {
        let mut scheduler = TickSyncScheduler::new(1);
        let mut log = Vec::new();
        let handle = scheduler
            .schedule_off_thread(FnTask::new(|| Ok(())))
            .then_on_tick_thread(|log: &mut Vec<String>, _| log.push("cancelled".into()));
        assert!(handle.cancel());

        drop(scheduler.schedule_off_thread(FnTask::new(|| Ok(()))));

        drain(&mut scheduler, &mut log);
        assert!(log.is_empty());
    }

    #[test]
    fn shutdown_drops_pending_work() {
        let mut scheduler = TickSyncScheduler::new(1);
        let mut log = Vec::new();
        let handle = scheduler.run_on_tick(|log: &mut Vec<String>| log.push("never".into()));
        scheduler.shutdown();
        assert!(!handle.is_pending());
        for work in scheduler.collect_ready() {
            work(&mut log);
        }
        assert!(log.is_empty());
    }
}
