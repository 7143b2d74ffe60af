//! Task scheduler: the only entry point the presentation layer talks to
//!
//! Every task runs on the tokio runtime and reports through one event
//! channel. At most one search is active. Starting a search moves the search
//! generation to the new task's id, aborts the previous search, and from that
//! moment nothing the old search produced reaches the consumer: emitters check
//! the generation before sending and the receiver checks it again before
//! handing an event out.

use crate::config::EngineConfig;
use crate::download::{DownloadRequest, DownloadTask, InFlight};
use crate::error::ConfigError;
use crate::event::{TaskEvent, TaskHandle, TaskId, TaskKind};
use crate::http::{Fetcher, HttpFetcher};
use crate::search::{SearchQuery, SearchTask};
use crate::TaskState;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Id of the active search; 0 before the first search starts
type Generation = Arc<AtomicU64>;

/// Finished tasks whose state stays queryable; older ones are forgotten
const RETAINED_FINISHED: usize = 256;

struct RunningSearch {
    handle: TaskHandle,
    task: JoinHandle<()>,
}

struct Shared {
    next_id: AtomicU64,
    generation: Generation,
    // the one place the active search changes
    search: Mutex<Option<RunningSearch>>,
    states: DashMap<TaskId, TaskState>,
    // finished task ids, oldest first
    finished: Mutex<VecDeque<TaskId>>,
    sink: Mutex<Option<mpsc::UnboundedSender<TaskEvent>>>,
    in_flight: Arc<InFlight>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn is_stale(generation: &AtomicU64, handle: TaskHandle) -> bool {
    handle.kind() == TaskKind::Search && generation.load(Ordering::SeqCst) != handle.id().0
}

impl Shared {
    fn next_handle(&self, kind: TaskKind) -> TaskHandle {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.states.insert(id, TaskState::Created);
        TaskHandle::new(id, kind)
    }

    fn transition(&self, handle: TaskHandle, next: TaskState) -> bool {
        if next == TaskState::Superseded && handle.kind() != TaskKind::Search {
            return false;
        }

        let changed = match self.states.get_mut(&handle.id()) {
            Some(mut state) if state.can_transition_to(next) => {
                trace!(task = %handle, from = ?*state, to = ?next, "state change");
                *state = next;
                true
            }
            Some(state) => {
                trace!(task = %handle, from = ?*state, to = ?next, "ignored state change");
                false
            }
            None => false,
        };

        // the shard guard above is released before pruning touches the map again
        if changed && next.is_terminal() {
            self.retire(handle.id());
        }
        changed
    }

    fn retire(&self, id: TaskId) {
        let mut finished = lock(&self.finished);
        finished.push_back(id);
        while finished.len() > RETAINED_FINISHED {
            if let Some(oldest) = finished.pop_front() {
                self.states.remove(&oldest);
            }
        }
    }

    fn deliver(&self, event: TaskEvent) {
        let sink = lock(&self.sink);
        match sink.as_ref() {
            Some(tx) => {
                if tx.send(event).is_err() {
                    trace!("event consumer dropped");
                }
            }
            None => trace!(task = %event.handle(), "no subscriber, event dropped"),
        }
    }
}

/// Per-task sending side of the event channel
pub(crate) struct Emitter {
    handle: TaskHandle,
    shared: Arc<Shared>,
}

impl Emitter {
    pub(crate) fn handle(&self) -> TaskHandle {
        self.handle
    }

    /// False once a newer search has started; always true for downloads
    pub(crate) fn is_current(&self) -> bool {
        !is_stale(&self.shared.generation, self.handle)
    }

    /// Sends `event` unless this task was superseded; returns whether it was sent
    pub(crate) fn emit(&self, event: TaskEvent) -> bool {
        let terminal = match &event {
            TaskEvent::SearchCompleted { .. } | TaskEvent::DownloadCompleted { .. } => {
                Some(TaskState::Completed)
            }
            TaskEvent::DownloadFailed { .. } => Some(TaskState::Failed),
            _ => None,
        };

        // a search finishing must not interleave with start_search replacing it
        let _active = (terminal.is_some() && self.handle.kind() == TaskKind::Search)
            .then(|| lock(&self.shared.search));

        if !self.is_current() {
            trace!(task = %self.handle, "suppressing event from superseded search");
            return false;
        }

        // terminal state is recorded before the consumer can observe the event
        if let Some(state) = terminal {
            self.shared.transition(self.handle, state);
        }

        self.shared.deliver(event);
        true
    }
}

/// Receiving side handed to the presentation layer
///
/// Drain it on whatever context owns the UI; events from superseded searches
/// are discarded here even if they were already queued.
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<TaskEvent>,
    generation: Generation,
}

impl EventReceiver {
    /// Waits for the next event; `None` once the scheduler and all its tasks are gone
    /// or a newer subscription replaced this one
    pub async fn recv(&mut self) -> Option<TaskEvent> {
        while let Some(event) = self.rx.recv().await {
            if !is_stale(&self.generation, event.handle()) {
                return Some(event);
            }
        }
        None
    }

    /// Returns the next queued event without waiting
    pub fn try_recv(&mut self) -> Option<TaskEvent> {
        while let Ok(event) = self.rx.try_recv() {
            if !is_stale(&self.generation, event.handle()) {
                return Some(event);
            }
        }
        None
    }
}

/// Starts searches and downloads and routes their events to one consumer
///
/// `start_search` and `start_download` spawn onto the current tokio runtime
/// and must be called from within it.
pub struct TaskScheduler {
    shared: Arc<Shared>,
    fetcher: Arc<dyn Fetcher>,
    config: Arc<EngineConfig>,
}

impl TaskScheduler {
    /// Creates a scheduler backed by a real HTTP client
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let fetcher = HttpFetcher::new(&config)?;
        Ok(Self::with_fetcher(config, Arc::new(fetcher)))
    }

    /// Creates a scheduler that fetches through `fetcher`
    pub fn with_fetcher(config: EngineConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        let shared = Shared {
            next_id: AtomicU64::new(1),
            generation: Arc::new(AtomicU64::new(0)),
            search: Mutex::new(None),
            states: DashMap::new(),
            finished: Mutex::new(VecDeque::new()),
            sink: Mutex::new(None),
            in_flight: Arc::new(DashMap::new()),
        };

        Self {
            shared: Arc::new(shared),
            fetcher,
            config: Arc::new(config),
        }
    }

    /// Registers the single consumer, replacing any previous one
    pub fn subscribe(&self) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.shared.sink) = Some(tx);

        EventReceiver {
            rx,
            generation: Arc::clone(&self.shared.generation),
        }
    }

    /// Supersedes any running search and starts a new one
    pub fn start_search(&self, query: SearchQuery) -> TaskHandle {
        // the id is taken under the lock so the generation only ever grows
        let mut active = lock(&self.shared.search);
        let handle = self.shared.next_handle(TaskKind::Search);

        // the generation moves first so the old task is stale before it is aborted
        self.shared.generation.store(handle.id().0, Ordering::SeqCst);
        if let Some(previous) = active.take() {
            previous.task.abort();
            if self.shared.transition(previous.handle, TaskState::Superseded) {
                debug!(task = %previous.handle, by = %handle, "search superseded");
            }
        }

        debug!(task = %handle, term = %query.term, count = query.desired_count, "starting search");
        let task = SearchTask::new(query, Arc::clone(&self.fetcher), Arc::clone(&self.config));
        let emitter = self.emitter(handle);
        let shared = Arc::clone(&self.shared);

        let join = tokio::spawn(async move {
            shared.transition(handle, TaskState::Running);
            task.run(emitter).await;
        });

        *active = Some(RunningSearch { handle, task: join });
        handle
    }

    /// Starts an independent download
    pub fn start_download(&self, request: DownloadRequest) -> TaskHandle {
        let handle = self.shared.next_handle(TaskKind::Download);
        debug!(task = %handle, url = %request.source_url, "starting download");

        let task = DownloadTask::new(
            request,
            Arc::clone(&self.fetcher),
            Arc::clone(&self.config),
            Arc::clone(&self.shared.in_flight),
        );
        let emitter = self.emitter(handle);
        let shared = Arc::clone(&self.shared);

        tokio::spawn(async move {
            shared.transition(handle, TaskState::Running);
            // the outcome already went out as an event
            let _ = task.run(emitter).await;
        });

        handle
    }

    /// Current lifecycle state of a task started by this scheduler
    ///
    /// Returns `None` for handles this scheduler never issued and for finished
    /// tasks once enough newer tasks have finished after them. A search reports
    /// `Completed` once its `SearchCompleted` was sent; if a newer search starts
    /// before the consumer reads it, the receiver drops that event anyway.
    pub fn state(&self, handle: TaskHandle) -> Option<TaskState> {
        self.shared.states.get(&handle.id()).map(|state| *state)
    }

    /// Handle of the search whose events are currently delivered, while it is still running
    pub fn active_search(&self) -> Option<TaskHandle> {
        let active = lock(&self.shared.search);
        active
            .as_ref()
            .map(|search| search.handle)
            .filter(|handle| self.state(*handle).is_some_and(|s| !s.is_terminal()))
    }

    fn emitter(&self, handle: TaskHandle) -> Emitter {
        Emitter {
            handle,
            shared: Arc::clone(&self.shared),
        }
    }
}

#[cfg(test)]
impl EventReceiver {
    /// Collects events of `handle` up to and including its terminal event
    pub(crate) async fn collect_until_terminal(&mut self, handle: TaskHandle) -> Vec<TaskEvent> {
        let mut events = Vec::new();
        loop {
            let event = tokio::time::timeout(std::time::Duration::from_secs(5), self.recv())
                .await
                .expect("timed out waiting for events")
                .expect("event channel closed");
            if event.handle() != handle {
                continue;
            }
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                return events;
            }
        }
    }
}
