//! Named recurring tasks on a shared worker pool.
//!
//! One dispatcher thread keeps a deadline heap and hands due tasks to a
//! fixed pool of worker threads. A task fires immediately when scheduled and
//! then at a fixed rate; a firing that lands while the previous invocation
//! is still running is skipped, so one task never runs twice at once.
//!
//! Task state moves `Idle -> Running -> Idle` under a per-task lock.
//! [`Scheduler::cancel`] flips the state to `Cancelled` under the same lock,
//! so once it returns no invocation can start, while an invocation already
//! running is left to finish.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::lock;

#[derive(thiserror::Error, Debug)]
pub enum SchedulerError {
    #[error("a task named {0:?} is already scheduled")]
    DuplicateTask(String),
    #[error("task period must be non-zero")]
    ZeroPeriod,
    #[error("scheduler has been shut down")]
    ShutDown,
    #[error("failed to spawn scheduler thread: {0}")]
    Spawn(#[from] std::io::Error),
}

type TaskBody = Box<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TaskState {
    Idle,
    Running,
    Cancelled,
}

struct Task {
    id: u64,
    name: String,
    period: Duration,
    body: TaskBody,
    state: Mutex<TaskState>,
}

impl Task {
    fn is_cancelled(&self) -> bool {
        *lock(&self.state) == TaskState::Cancelled
    }

    fn cancel(&self) {
        *lock(&self.state) = TaskState::Cancelled;
    }

    fn invoke(&self) {
        {
            let mut state = lock(&self.state);
            match *state {
                TaskState::Idle => *state = TaskState::Running,
                TaskState::Running => {
                    log::debug!("task {:?} still running, skipping a firing", self.name);
                    return;
                }
                TaskState::Cancelled => return,
            }
        }

        match catch_unwind(AssertUnwindSafe(|| (self.body)())) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("task {:?} failed: {e:#}", self.name),
            Err(_) => log::error!("task {:?} panicked", self.name),
        }

        let mut state = lock(&self.state);
        if *state == TaskState::Running {
            *state = TaskState::Idle;
        }
    }
}

enum Control {
    Add(Arc<Task>),
    Shutdown,
}

struct Due {
    at: Instant,
    task: Arc<Task>,
}

impl PartialEq for Due {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.task.id == other.task.id
    }
}

impl Eq for Due {}

impl PartialOrd for Due {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Due {
    // min-heap on deadline
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.task.id.cmp(&self.task.id))
    }
}

struct Inner {
    control: Sender<Control>,
    tasks: Mutex<HashMap<String, Arc<Task>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
}

impl Inner {
    fn cancel(&self, name: &str) -> bool {
        let removed = lock(&self.tasks).remove(name);
        match removed {
            Some(task) => {
                task.cancel();
                log::debug!("cancelled task {name:?}");
                true
            }
            None => false,
        }
    }
}

/// Shared scheduler. Clones refer to the same dispatcher and pool.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

/// Non-owning handle for cancelling tasks from inside a task body.
#[derive(Clone)]
pub struct SchedulerHandle {
    inner: Weak<Inner>,
}

impl SchedulerHandle {
    /// See [`Scheduler::cancel`]. Returns `false` once the scheduler is gone.
    pub fn cancel(&self, name: &str) -> bool {
        self.inner.upgrade().is_some_and(|inner| inner.cancel(name))
    }
}

impl Scheduler {
    /// Start the dispatcher and `workers` pool threads (at least one).
    pub fn new(workers: usize) -> Result<Self, SchedulerError> {
        let (control_tx, control_rx) = unbounded();
        let (job_tx, job_rx) = unbounded::<Arc<Task>>();

        let mut threads = Vec::with_capacity(workers.max(1) + 1);
        threads.push(
            thread::Builder::new()
                .name("scheduler".into())
                .spawn(move || dispatch(control_rx, job_tx))?,
        );
        for i in 0..workers.max(1) {
            let jobs = job_rx.clone();
            threads.push(
                thread::Builder::new()
                    .name(format!("scheduler-worker-{i}"))
                    .spawn(move || {
                        for task in jobs.iter() {
                            task.invoke();
                        }
                    })?,
            );
        }

        Ok(Self {
            inner: Arc::new(Inner {
                control: control_tx,
                tasks: Mutex::new(HashMap::new()),
                threads: Mutex::new(threads),
                next_id: AtomicU64::new(0),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    /// Register `body` under `name`, running now and then every `period`.
    pub fn schedule<F>(
        &self,
        name: impl Into<String>,
        period: Duration,
        body: F,
    ) -> Result<(), SchedulerError>
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if period.is_zero() {
            return Err(SchedulerError::ZeroPeriod);
        }
        let name = name.into();

        let mut tasks = lock(&self.inner.tasks);
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShutDown);
        }
        if tasks.contains_key(&name) {
            return Err(SchedulerError::DuplicateTask(name));
        }
        let task = Arc::new(Task {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            name: name.clone(),
            period,
            body: Box::new(body),
            state: Mutex::new(TaskState::Idle),
        });
        self.inner
            .control
            .send(Control::Add(task.clone()))
            .map_err(|_| SchedulerError::ShutDown)?;
        tasks.insert(name.clone(), task);
        log::debug!("scheduled task {name:?} every {period:?}");
        Ok(())
    }

    /// Stop future invocations of `name`. An invocation already running is
    /// not interrupted; none starts after this returns. Returns whether the
    /// task was scheduled.
    pub fn cancel(&self, name: &str) -> bool {
        self.inner.cancel(name)
    }

    pub fn is_scheduled(&self, name: &str) -> bool {
        lock(&self.inner.tasks).contains_key(name)
    }

    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.inner.tasks).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Cancel every task, stop the dispatcher and join the pool. Idempotent.
    pub fn shutdown(&self) {
        let cancelled: Vec<Arc<Task>> = {
            let mut tasks = lock(&self.inner.tasks);
            self.inner.shut_down.store(true, Ordering::SeqCst);
            tasks.drain().map(|(_, t)| t).collect()
        };
        for task in &cancelled {
            task.cancel();
        }
        // the dispatcher may already be gone
        let _ = self.inner.control.send(Control::Shutdown);

        let handles = std::mem::take(&mut *lock(&self.inner.threads));
        let me = thread::current().id();
        for handle in handles {
            if handle.thread().id() == me {
                continue;
            }
            let name = handle.thread().name().unwrap_or("scheduler").to_owned();
            if handle.join().is_err() {
                log::error!("{name} thread panicked");
            }
        }
    }
}

fn dispatch(control: Receiver<Control>, jobs: Sender<Arc<Task>>) {
    let mut queue: BinaryHeap<Due> = BinaryHeap::new();
    loop {
        let message = match queue.peek() {
            Some(next) => {
                let now = Instant::now();
                if next.at <= now {
                    None
                } else {
                    match control.recv_timeout(next.at - now) {
                        Ok(m) => Some(m),
                        Err(RecvTimeoutError::Timeout) => None,
                        Err(RecvTimeoutError::Disconnected) => return,
                    }
                }
            }
            None => match control.recv() {
                Ok(m) => Some(m),
                Err(_) => return,
            },
        };

        match message {
            Some(Control::Add(task)) => queue.push(Due {
                at: Instant::now(),
                task,
            }),
            Some(Control::Shutdown) => return,
            None => {
                let now = Instant::now();
                while queue.peek().is_some_and(|d| d.at <= now) {
                    let Some(due) = queue.pop() else { break };
                    if due.task.is_cancelled() {
                        continue;
                    }
                    if jobs.send(due.task.clone()).is_err() {
                        return;
                    }
                    // fixed rate; missed ticks are skipped, not queued
                    let mut at = due.at + due.task.period;
                    while at <= now {
                        at += due.task.period;
                    }
                    queue.push(Due { at, task: due.task });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter_task(scheduler: &Scheduler, name: &str, period_ms: u64) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        scheduler
            .schedule(name, Duration::from_millis(period_ms), move || {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .expect("schedule");
        count
    }

    #[test]
    fn first_firing_is_within_two_periods_and_repeats() {
        let scheduler = Scheduler::new(2).expect("scheduler");
        let count = counter_task(&scheduler, "tick", 20);
        thread::sleep(Duration::from_millis(40));
        assert!(count.load(Ordering::SeqCst) >= 1);
        thread::sleep(Duration::from_millis(100));
        assert!(count.load(Ordering::SeqCst) >= 3);
        scheduler.shutdown();
    }

    #[test]
    fn no_invocation_after_cancel_returns() {
        let scheduler = Scheduler::new(2).expect("scheduler");
        let count = counter_task(&scheduler, "tick", 2);
        thread::sleep(Duration::from_millis(20));
        assert!(scheduler.cancel("tick"));
        // let an invocation that was already running finish
        thread::sleep(Duration::from_millis(5));
        let after_cancel = count.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), after_cancel);
        assert!(!scheduler.is_scheduled("tick"));
        assert!(!scheduler.cancel("tick"));
        scheduler.shutdown();
    }

    #[test]
    fn cancel_lets_a_running_invocation_finish() {
        let scheduler = Scheduler::new(1).expect("scheduler");
        let (started_tx, started_rx) = crossbeam_channel::bounded(4);
        let finished = Arc::new(AtomicUsize::new(0));
        let f = finished.clone();
        scheduler
            .schedule("slow", Duration::from_millis(5), move || {
                let _ = started_tx.try_send(());
                thread::sleep(Duration::from_millis(40));
                f.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .expect("schedule");

        started_rx
            .recv_timeout(Duration::from_secs(1))
            .expect("first start");
        scheduler.cancel("slow");
        thread::sleep(Duration::from_millis(80));
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(started_rx.try_recv().is_err());
        scheduler.shutdown();
    }

    #[test]
    fn failing_tasks_do_not_affect_others() {
        let scheduler = Scheduler::new(2).expect("scheduler");
        let failures = Arc::new(AtomicUsize::new(0));
        let f = failures.clone();
        scheduler
            .schedule("fails", Duration::from_millis(5), move || {
                f.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("sensor unavailable")
            })
            .expect("schedule");
        scheduler
            .schedule("panics", Duration::from_millis(5), || -> anyhow::Result<()> {
                panic!("boom")
            })
            .expect("schedule");
        let healthy = counter_task(&scheduler, "healthy", 5);

        thread::sleep(Duration::from_millis(60));
        assert!(failures.load(Ordering::SeqCst) >= 2);
        assert!(healthy.load(Ordering::SeqCst) >= 2);
        assert!(scheduler.is_scheduled("panics"));
        scheduler.shutdown();
    }

    #[test]
    fn rejects_duplicates_zero_period_and_scheduling_after_shutdown() {
        let scheduler = Scheduler::new(1).expect("scheduler");
        counter_task(&scheduler, "a", 50);
        assert!(matches!(
            scheduler.schedule("a", Duration::from_millis(5), || Ok(())),
            Err(SchedulerError::DuplicateTask(name)) if name == "a"
        ));
        assert!(matches!(
            scheduler.schedule("b", Duration::ZERO, || Ok(())),
            Err(SchedulerError::ZeroPeriod)
        ));
        assert_eq!(scheduler.task_names(), vec!["a".to_string()]);

        scheduler.shutdown();
        scheduler.shutdown();
        assert!(matches!(
            scheduler.schedule("c", Duration::from_millis(5), || Ok(())),
            Err(SchedulerError::ShutDown)
        ));
    }

    #[test]
    fn task_can_cancel_itself() {
        let scheduler = Scheduler::new(1).expect("scheduler");
        let handle = scheduler.handle();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        scheduler
            .schedule("once", Duration::from_millis(5), move || {
                c.fetch_add(1, Ordering::SeqCst);
                handle.cancel("once");
                Ok(())
            })
            .expect("schedule");
        thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_scheduled("once"));
        scheduler.shutdown();
    }
}
