//! Bounded producer/consumer engine.
//!
//! ```text
//!   job source ──► producer ──► bounded queue ──► worker 0 ──► task(item)
//!   (iterator)     thread       (crossbeam)   ├─► worker 1 ──► task(item)
//!                                             └─► worker N ──► task(item)
//! ```
//!
//! - The producer blocks when the queue is full, so a fast source never
//!   runs ahead of the workers by more than `maximum_queue_size` items.
//! - A `None` from the source means "nothing right now": the producer
//!   sleeps `idle_delay` and asks again. With `quit_on_empty_queue` it
//!   ends the stream instead.
//! - At the end of the stream the producer queues one shutdown sentinel
//!   per worker behind the remaining items.
//! - A failing or panicking task drops its item and the worker moves on.
//! - Stopping is cooperative. Workers finish the item in hand and exit on
//!   their next queue pop. Items already taken from the source but not yet
//!   dispatched (queued, or held by a producer blocked on a full queue) go
//!   to the [`on_undispatched`](TaskEngine::on_undispatched) hook once the
//!   threads have exited.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{self as chan, select, Receiver, Select, Sender};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::TaskConfig;
use crate::error::{TaskError, TaskResult};

/// Lifecycle of a [`TaskEngine`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum EngineState {
    Created,
    Started,
    Stopping,
    Stopped,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// What one worker thread is doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum WorkerState {
    /// Waiting for an item.
    Idle = 0,
    /// Running the task function.
    Running = 1,
    /// Finishing its current item after a stop request.
    Draining = 2,
    /// Exited.
    Stopped = 3,
}

impl WorkerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

/// Counters over the lifetime of an engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    /// Items handed to the task function.
    pub dispatched: u64,
    /// Task calls that returned `Ok`.
    pub succeeded: u64,
    /// Task calls that returned `Err` or panicked.
    pub failed: u64,
    /// Items taken from the source that a stop kept from the task function.
    pub undispatched: u64,
}

#[derive(Default)]
struct Counters {
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    undispatched: AtomicU64,
}

enum Job<T> {
    Run(T),
    Shutdown,
}

type TaskFn<T> = Arc<dyn Fn(T) -> Result<(), String> + Send + Sync>;
type JobSource<T> = Box<dyn Iterator<Item = Option<T>> + Send>;
type UndispatchedFn<T> = Arc<dyn Fn(T) + Send + Sync>;

/// State shared between the engine, its threads and its stop handles.
struct Shared {
    state: Mutex<EngineState>,
    quit: AtomicBool,
    // Dropping the sender wakes everything blocked on the stop channel.
    stop_tx: Mutex<Option<Sender<()>>>,
    workers: Vec<AtomicU8>,
    counters: Counters,
}

impl Shared {
    fn state(&self) -> EngineState {
        *self.state.lock().expect("lock poisoned")
    }

    fn set_state(&self, state: EngineState) {
        *self.state.lock().expect("lock poisoned") = state;
    }

    fn is_quitting(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }

    /// Returns `false` if a stop was already underway.
    fn request_stop(&self) -> bool {
        if self.quit.swap(true, Ordering::SeqCst) {
            return false;
        }
        {
            let mut state = self.state.lock().expect("lock poisoned");
            if *state == EngineState::Started {
                *state = EngineState::Stopping;
            }
        }
        for worker in &self.workers {
            let _ = worker.compare_exchange(
                WorkerState::Running as u8,
                WorkerState::Draining as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
        }
        drop(self.stop_tx.lock().expect("lock poisoned").take());
        true
    }

    fn stats(&self) -> TaskStats {
        TaskStats {
            dispatched: self.counters.dispatched.load(Ordering::SeqCst),
            succeeded: self.counters.succeeded.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            undispatched: self.counters.undispatched.load(Ordering::SeqCst),
        }
    }
}

/// Requests a cooperative stop of one engine. Cheap to clone; stopping
/// more than once is a no-op.
#[derive(Clone)]
pub struct StopHandle {
    shared: Arc<Shared>,
}

impl StopHandle {
    pub fn stop(&self) {
        if self.shared.request_stop() {
            info!("stop requested");
        } else {
            debug!("stop already requested");
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.shared.is_quitting()
    }
}

impl fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopHandle")
            .field("stopping", &self.is_stopping())
            .finish()
    }
}

/// A producer thread feeding `number_of_threads` workers through a bounded
/// queue.
pub struct TaskEngine<T> {
    config: TaskConfig,
    source: Option<JobSource<T>>,
    task: TaskFn<T>,
    on_undispatched: Option<UndispatchedFn<T>>,
    shared: Arc<Shared>,
    stop_rx: Receiver<()>,
    // Kept so items stranded by a stop can be drained after the join.
    queue: Option<Receiver<Job<T>>>,
    producer: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> TaskEngine<T> {
    /// Build an engine that feeds items from `source` to `task`.
    ///
    /// Nothing runs until [`start`](Self::start).
    pub fn new<S, F, E>(config: TaskConfig, source: S, task: F) -> TaskResult<Self>
    where
        S: IntoIterator<Item = Option<T>>,
        S::IntoIter: Send + 'static,
        F: Fn(T) -> Result<(), E> + Send + Sync + 'static,
        E: fmt::Display,
    {
        config.validate()?;
        let (stop_tx, stop_rx) = chan::bounded(0);
        let shared = Arc::new(Shared {
            state: Mutex::new(EngineState::Created),
            quit: AtomicBool::new(false),
            stop_tx: Mutex::new(Some(stop_tx)),
            workers: (0..config.number_of_threads)
                .map(|_| AtomicU8::new(WorkerState::Idle as u8))
                .collect(),
            counters: Counters::default(),
        });
        Ok(Self {
            config,
            source: Some(Box::new(source.into_iter())),
            task: Arc::new(move |item| task(item).map_err(|e| e.to_string())),
            on_undispatched: None,
            shared,
            stop_rx,
            queue: None,
            producer: None,
            workers: Vec::new(),
        })
    }

    /// Receive every item that was taken from the source but never reached
    /// the task function because of a stop. Without a hook such items are
    /// logged and dropped.
    pub fn on_undispatched<F>(mut self, hook: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.on_undispatched = Some(Arc::new(hook));
        self
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.shared
            .workers
            .iter()
            .map(|w| WorkerState::from_u8(w.load(Ordering::SeqCst)))
            .collect()
    }

    pub fn stats(&self) -> TaskStats {
        self.shared.stats()
    }

    /// Spawn the producer and worker threads.
    pub fn start(&mut self) -> TaskResult<()> {
        let state = self.state();
        let Some(source) = self.source.take().filter(|_| state == EngineState::Created) else {
            return Err(TaskError::AlreadyStarted(state));
        };
        if self.shared.is_quitting() {
            debug!("stop requested before start; not spawning threads");
            for worker in &self.shared.workers {
                worker.store(WorkerState::Stopped as u8, Ordering::SeqCst);
            }
            self.shared.set_state(EngineState::Stopped);
            return Ok(());
        }

        let (queue_tx, queue_rx) = chan::bounded::<Job<T>>(self.config.maximum_queue_size);
        for id in 0..self.config.number_of_threads {
            let queue = queue_rx.clone();
            let stop = self.stop_rx.clone();
            let task = Arc::clone(&self.task);
            let hook = self.on_undispatched.clone();
            let shared = Arc::clone(&self.shared);
            let spawned = thread::Builder::new()
                .name(format!("task-worker-{id}"))
                .spawn(move || worker_loop(id, queue, stop, task, hook, shared));
            match spawned {
                Ok(handle) => self.workers.push(handle),
                Err(source) => {
                    self.shared.request_stop();
                    return Err(TaskError::Spawn {
                        thread: format!("task-worker-{id}"),
                        source,
                    });
                }
            }
        }
        self.queue = Some(queue_rx);

        let producer = Producer {
            source,
            queue: queue_tx,
            stop: self.stop_rx.clone(),
            on_undispatched: self.on_undispatched.clone(),
            shared: Arc::clone(&self.shared),
            workers: self.config.number_of_threads,
            idle_delay: self.config.idle_delay(),
            quit_on_empty_queue: self.config.quit_on_empty_queue,
        };
        let spawned = thread::Builder::new()
            .name("task-producer".into())
            .spawn(move || producer.run());
        match spawned {
            Ok(handle) => self.producer = Some(handle),
            Err(source) => {
                self.shared.request_stop();
                return Err(TaskError::Spawn {
                    thread: "task-producer".into(),
                    source,
                });
            }
        }

        {
            let mut state = self.shared.state.lock().expect("lock poisoned");
            if *state == EngineState::Created {
                *state = EngineState::Started;
            }
        }
        info!(
            workers = self.config.number_of_threads,
            queue_size = self.config.maximum_queue_size,
            "task engine started"
        );
        Ok(())
    }

    /// Ask the engine to stop. Same as [`StopHandle::stop`].
    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    /// Block until the producer and every worker have exited.
    ///
    /// Without a stop request this returns only once the job source ends.
    pub fn wait_for_completion(&mut self) -> TaskResult<TaskStats> {
        let mut panicked = None;
        if let Some(producer) = self.producer.take() {
            if producer.join().is_err() {
                error!("producer thread panicked");
                panicked.get_or_insert_with(|| "task-producer".to_string());
            }
        }
        for (id, worker) in self.workers.drain(..).enumerate() {
            if worker.join().is_err() {
                error!(worker = id, "worker thread panicked");
                panicked.get_or_insert_with(|| format!("task-worker-{id}"));
            }
        }
        self.drain_queue();
        self.shared.set_state(EngineState::Stopped);

        let stats = self.stats();
        info!(
            dispatched = stats.dispatched,
            succeeded = stats.succeeded,
            failed = stats.failed,
            undispatched = stats.undispatched,
            "task engine stopped"
        );
        match panicked {
            Some(thread) => Err(TaskError::ThreadPanicked(thread)),
            None => Ok(stats),
        }
    }

    /// `start` followed by `wait_for_completion`.
    pub fn blocking_run(&mut self) -> TaskResult<TaskStats> {
        self.start()?;
        self.wait_for_completion()
    }
}

impl<T> TaskEngine<T> {
    /// Hand back whatever a stop left in the queue. Call only after every
    /// thread has been joined.
    fn drain_queue(&mut self) {
        let Some(queue) = self.queue.take() else {
            return;
        };
        for job in queue.try_iter() {
            if let Job::Run(item) = job {
                hand_back(item, self.on_undispatched.as_ref(), &self.shared);
            }
        }
    }
}

impl<T> Drop for TaskEngine<T> {
    fn drop(&mut self) {
        if self.producer.is_none() && self.workers.is_empty() {
            return;
        }
        self.shared.request_stop();
        if let Some(producer) = self.producer.take() {
            let _ = producer.join();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        self.drain_queue();
    }
}

impl<T> fmt::Debug for TaskEngine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskEngine")
            .field("config", &self.config)
            .field("state", &self.shared.state())
            .field("stats", &self.shared.stats())
            .finish()
    }
}

struct Producer<T> {
    source: JobSource<T>,
    queue: Sender<Job<T>>,
    stop: Receiver<()>,
    on_undispatched: Option<UndispatchedFn<T>>,
    shared: Arc<Shared>,
    workers: usize,
    idle_delay: Duration,
    quit_on_empty_queue: bool,
}

impl<T> Producer<T> {
    fn run(mut self) {
        let mut submitted: u64 = 0;
        loop {
            if self.shared.is_quitting() {
                break;
            }
            let Some(item) = self.source.next() else {
                debug!("job source exhausted");
                break;
            };
            match item {
                Some(job) => {
                    if let Err(job) = self.send(Job::Run(job)) {
                        if let Job::Run(item) = job {
                            hand_back(item, self.on_undispatched.as_ref(), &self.shared);
                        }
                        break;
                    }
                    submitted += 1;
                }
                None if self.quit_on_empty_queue => {
                    debug!("job source empty; ending stream");
                    break;
                }
                None => {
                    let stopped = select! {
                        recv(self.stop) -> _ => true,
                        default(self.idle_delay) => false,
                    };
                    if stopped {
                        break;
                    }
                }
            }
        }

        if !self.shared.is_quitting() {
            for _ in 0..self.workers {
                if self.send(Job::Shutdown).is_err() {
                    break;
                }
            }
        }
        info!(submitted, "producer finished");
    }

    /// Queue one job, blocking while the queue is full. A stop that
    /// arrives first returns the job to the caller.
    fn send(&self, job: Job<T>) -> Result<(), Job<T>> {
        let mut sel = Select::new();
        let send_op = sel.send(&self.queue);
        sel.recv(&self.stop);
        let oper = sel.select();
        if oper.index() == send_op {
            oper.send(&self.queue, job).map_err(|e| {
                warn!("queue closed");
                e.into_inner()
            })
        } else {
            let _ = oper.recv(&self.stop);
            Err(job)
        }
    }
}

fn worker_loop<T>(
    id: usize,
    queue: Receiver<Job<T>>,
    stop: Receiver<()>,
    task: TaskFn<T>,
    on_undispatched: Option<UndispatchedFn<T>>,
    shared: Arc<Shared>,
) {
    let state = &shared.workers[id];
    debug!(worker = id, "worker started");
    loop {
        let job = select! {
            recv(queue) -> job => job.ok(),
            recv(stop) -> _ => None,
        };
        let Some(Job::Run(item)) = job else {
            break;
        };
        if shared.is_quitting() {
            debug!(worker = id, "stop requested; handing item back");
            hand_back(item, on_undispatched.as_ref(), &shared);
            break;
        }

        state.store(WorkerState::Running as u8, Ordering::SeqCst);
        shared.counters.dispatched.fetch_add(1, Ordering::SeqCst);
        match panic::catch_unwind(AssertUnwindSafe(|| task(item))) {
            Ok(Ok(())) => {
                shared.counters.succeeded.fetch_add(1, Ordering::SeqCst);
            }
            Ok(Err(e)) => {
                shared.counters.failed.fetch_add(1, Ordering::SeqCst);
                error!(worker = id, error = %e, "task failed; item dropped");
            }
            Err(payload) => {
                shared.counters.failed.fetch_add(1, Ordering::SeqCst);
                error!(worker = id, panic = panic_message(payload.as_ref()), "task panicked; item dropped");
            }
        }

        // A stop during the task moved us to Draining.
        if state
            .compare_exchange(
                WorkerState::Running as u8,
                WorkerState::Idle as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            break;
        }
    }
    state.store(WorkerState::Stopped as u8, Ordering::SeqCst);
    debug!(worker = id, "worker stopped");
}

fn hand_back<T>(item: T, hook: Option<&UndispatchedFn<T>>, shared: &Shared) {
    shared.counters.undispatched.fetch_add(1, Ordering::SeqCst);
    match hook {
        Some(hook) => hook(item),
        None => warn!("stop requested; dropping undispatched item"),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
