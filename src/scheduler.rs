//! Single-threaded periodic task scheduler.
//!
//! Pending fire times live in a min-heap keyed by deadline. A task re-arms
//! itself after its handler returns, so the next deadline is measured from
//! the end of the handler body and handlers never overlap.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::future::Future;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::{MonitorError, Result};

pub type TaskId = usize;

/// A handler the scheduler re-runs every `period()`
pub trait PeriodicTask<C> {
    fn name(&self) -> &'static str;

    fn period(&self) -> Duration;

    /// Acquire resources. Runs on every start from the stopped state; an
    /// error aborts that start and leaves the task stopped.
    fn setup(&mut self, _ctx: &mut C) -> Result<()> {
        Ok(())
    }

    fn run(&mut self, ctx: &mut C);

    /// Release resources after the pending timer has been cancelled
    fn teardown(&mut self, _ctx: &mut C) {}
}

struct Slot<C> {
    task: Box<dyn PeriodicTask<C>>,
    running: bool,
    runs: u64,
}

pub struct Scheduler<C> {
    slots: Vec<Slot<C>>,
    queue: BinaryHeap<Reverse<(Instant, TaskId)>>,
}

impl<C> Default for Scheduler<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Scheduler<C> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            queue: BinaryHeap::new(),
        }
    }

    /// Register a task in the stopped state
    pub fn add(&mut self, task: Box<dyn PeriodicTask<C>>) -> TaskId {
        self.slots.push(Slot {
            task,
            running: false,
            runs: 0,
        });
        self.slots.len() - 1
    }

    /// Set the task up, run it once right away and arm its timer.
    /// Starting a task that is already running does nothing.
    pub fn start(&mut self, id: TaskId, ctx: &mut C, now: Instant) -> Result<()> {
        let slot = self.slot_mut(id)?;
        if slot.running {
            debug!("{} already running", slot.task.name());
            return Ok(());
        }
        slot.task.setup(ctx)?;
        slot.running = true;
        info!(
            "{} started ({} ms period)",
            slot.task.name(),
            slot.task.period().as_millis()
        );
        self.run_and_rearm(id, ctx, now);
        Ok(())
    }

    /// Cancel the pending timer and release the task's resources
    pub fn stop(&mut self, id: TaskId, ctx: &mut C) -> Result<()> {
        let slot = self.slot_mut(id)?;
        if !slot.running {
            return Err(MonitorError::NotRunning(slot.task.name()));
        }
        slot.running = false;
        slot.task.teardown(ctx);
        info!("{} stopped after {} runs", slot.task.name(), slot.runs);
        self.queue.retain(|Reverse((_, queued))| *queued != id);
        Ok(())
    }

    /// Stop every running task, in reverse registration order
    pub fn stop_all(&mut self, ctx: &mut C) {
        for id in (0..self.slots.len()).rev() {
            if self.slots[id].running {
                if let Err(e) = self.stop(id, ctx) {
                    warn!("stop failed: {}", e);
                }
            }
        }
    }

    /// Run every task whose deadline is at or before `now`. Returns the
    /// number of handlers run.
    pub fn fire_due(&mut self, now: Instant, ctx: &mut C) -> usize {
        let mut fired = 0;
        while let Some(Reverse((deadline, id))) = self.queue.peek().copied() {
            if deadline > now {
                break;
            }
            self.queue.pop();
            self.run_and_rearm(id, ctx, now);
            fired += 1;
        }
        fired
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.peek().map(|Reverse((deadline, _))| *deadline)
    }

    pub fn is_running(&self, id: TaskId) -> bool {
        self.slots.get(id).map(|s| s.running).unwrap_or(false)
    }

    pub fn runs(&self, id: TaskId) -> u64 {
        self.slots.get(id).map(|s| s.runs).unwrap_or(0)
    }

    pub fn task_name(&self, id: TaskId) -> Option<&'static str> {
        self.slots.get(id).map(|s| s.task.name())
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Drive the timers until `shutdown` resolves or nothing is left armed
    pub async fn run_until<F: Future<Output = ()>>(&mut self, ctx: &mut C, shutdown: F) {
        tokio::pin!(shutdown);
        loop {
            let Some(deadline) = self.next_deadline() else {
                info!("No task armed, scheduler idle");
                return;
            };
            tokio::select! {
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                    let now = tokio::time::Instant::now().into_std();
                    self.fire_due(now, ctx);
                }
                _ = &mut shutdown => {
                    info!("Scheduler shutting down");
                    return;
                }
            }
        }
    }

    fn run_and_rearm(&mut self, id: TaskId, ctx: &mut C, fired_at: Instant) {
        let slot = &mut self.slots[id];
        let started = Instant::now();
        slot.task.run(ctx);
        slot.runs += 1;
        let next = fired_at + started.elapsed() + slot.task.period();
        self.queue.push(Reverse((next, id)));
    }

    fn slot_mut(&mut self, id: TaskId) -> Result<&mut Slot<C>> {
        self.slots
            .get_mut(id)
            .ok_or_else(|| MonitorError::Config(format!("no task with id {}", id)))
    }
}
