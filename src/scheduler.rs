//! Fair FIFO scheduling of path requests over a pool of execution units.
//!
//! [`SchedulerCore`] holds all scheduling state and is driven with explicit
//! timestamps. [`PathfindingScheduler`] runs it on a coordinator thread that wakes
//! for commands, unit events and the next deadline.
//!
//! Requests are handed out strictly in arrival order to the first idle unit. A unit
//! that panics or disconnects fails its in-flight request, sits out a fixed backoff,
//! is respawned and gets every registered chunk replayed before it takes work
//! again. A request that outlives the dispatch timeout resolves to `None` and frees
//! its unit without restarting it.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bevy::{log, math::Vec2};
use crossbeam_channel::{bounded, select, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::{
    chunk::{CellUpdate, ChunkId},
    error::NavError,
    jps::PathOptions,
    path::Path,
    settings::{NavSettings, SchedulerSettings},
    unit::{ExecutionUnit, RequestId, ThreadUnitFactory, UnitEvent, UnitFactory, UnitId, UnitMessage},
    FxIndexMap,
};

/// State of a [`PathTicket`].
#[derive(Debug, Clone, PartialEq)]
pub enum PathPoll {
    Pending,
    /// Resolved. `None` covers no path, timeouts, unit faults and shutdown.
    Ready(Option<Path>),
}

/// Receipt for a submitted path request. Resolves exactly once.
///
/// Reading the result consumes it; polling a ticket that has already produced
/// [`PathPoll::Ready`] yields `Ready(None)`.
#[derive(Debug)]
pub struct PathTicket {
    id: RequestId,
    result: Receiver<Option<Path>>,
}

impl PathTicket {
    fn new(id: RequestId) -> (Self, Sender<Option<Path>>) {
        let (reply, result) = bounded(1);
        (PathTicket { id, result }, reply)
    }

    /// A ticket that is already resolved.
    pub(crate) fn ready(id: RequestId, path: Option<Path>) -> Self {
        let (ticket, reply) = PathTicket::new(id);
        let _ = reply.send(path);
        ticket
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn poll(&self) -> PathPoll {
        match self.result.try_recv() {
            Ok(path) => PathPoll::Ready(path),
            Err(TryRecvError::Empty) => PathPoll::Pending,
            Err(TryRecvError::Disconnected) => PathPoll::Ready(None),
        }
    }

    pub fn wait_timeout(&self, timeout: Duration) -> PathPoll {
        match self.result.recv_timeout(timeout) {
            Ok(path) => PathPoll::Ready(path),
            Err(RecvTimeoutError::Timeout) => PathPoll::Pending,
            Err(RecvTimeoutError::Disconnected) => PathPoll::Ready(None),
        }
    }

    /// Blocks until the request resolves.
    pub fn wait(self) -> Option<Path> {
        self.result.recv().ok().flatten()
    }
}

#[derive(Debug)]
pub(crate) struct PendingRequest {
    id: RequestId,
    start: Vec2,
    goal: Vec2,
    options: PathOptions,
    reply: Sender<Option<Path>>,
}

#[derive(Debug)]
struct InFlight {
    request: RequestId,
    reply: Sender<Option<Path>>,
    deadline: Instant,
}

#[derive(Debug)]
struct UnitSlot<U> {
    id: UnitId,
    generation: u64,
    unit: Option<U>,
    in_flight: Option<InFlight>,
    restarting: bool,
    /// `None` while restarting means the last restart failed and no retry is due.
    restart_at: Option<Instant>,
}

impl<U> UnitSlot<U> {
    fn is_idle(&self) -> bool {
        !self.restarting && self.in_flight.is_none() && self.unit.is_some()
    }
}

#[derive(Debug, Clone)]
struct ChunkRecord {
    version: u64,
    grid: Vec<u8>,
}

/// Point-in-time view of one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitStatus {
    pub id: UnitId,
    pub generation: u64,
    pub busy: bool,
    pub restarting: bool,
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStatus {
    pub units: Vec<UnitStatus>,
    pub queued: usize,
    pub registered_chunks: usize,
}

impl SchedulerStatus {
    pub fn idle_units(&self) -> usize {
        self.units
            .iter()
            .filter(|u| !u.busy && !u.restarting)
            .count()
    }

    pub fn restarting_units(&self) -> usize {
        self.units.iter().filter(|u| u.restarting).count()
    }
}

/// Scheduling state machine. Every method takes the current time so the
/// behaviour is reproducible.
pub(crate) struct SchedulerCore<F: UnitFactory> {
    settings: SchedulerSettings,
    factory: F,
    units: Vec<UnitSlot<F::Unit>>,
    queue: VecDeque<PendingRequest>,
    registry: FxIndexMap<ChunkId, ChunkRecord>,
}

impl<F: UnitFactory> SchedulerCore<F> {
    /// Starts the pool. Units that fail to start are scheduled for a restart;
    /// the pool fails only if none of them started.
    pub(crate) fn new(
        settings: SchedulerSettings,
        mut factory: F,
        now: Instant,
    ) -> Result<Self, NavError> {
        let mut units = Vec::with_capacity(settings.pool_size);
        let mut first_error = None;

        for index in 0..settings.pool_size {
            let id = UnitId(index);
            let (unit, restart_at) = match factory.spawn(id, 0) {
                Ok(unit) => (Some(unit), None),
                Err(err) => {
                    log::error!("Failed to start execution unit {}: {}", id, err);
                    first_error.get_or_insert(err);
                    (None, Some(now + settings.restart_backoff))
                }
            };

            units.push(UnitSlot {
                id,
                generation: 0,
                restarting: unit.is_none(),
                unit,
                in_flight: None,
                restart_at,
            });
        }

        if units.iter().all(|slot| slot.unit.is_none()) {
            return Err(first_error.unwrap_or(NavError::EmptyPool));
        }

        log::info!("Pathfinding pool started with {} execution units", units.len());

        Ok(SchedulerCore {
            settings,
            factory,
            units,
            queue: VecDeque::new(),
            registry: FxIndexMap::default(),
        })
    }

    pub(crate) fn submit(&mut self, request: PendingRequest, now: Instant) {
        log::trace!("Queued path request {}", request.id);
        self.queue.push_back(request);
        self.dispatch(now);
    }

    /// Hands queued requests to idle units, oldest first.
    fn dispatch(&mut self, now: Instant) {
        while !self.queue.is_empty() {
            let Some(index) = self.units.iter().position(UnitSlot::is_idle) else {
                break;
            };
            let Some(request) = self.queue.pop_front() else {
                break;
            };

            let message = UnitMessage::FindPath {
                request: request.id,
                start: request.start,
                goal: request.goal,
                options: request.options,
            };
            let posted = match &self.units[index].unit {
                Some(unit) => unit.post(message),
                None => Err(NavError::UnitDisconnected(self.units[index].id)),
            };

            match posted {
                Ok(()) => {
                    let slot = &mut self.units[index];
                    log::trace!("Dispatched path request {} to unit {}", request.id, slot.id);
                    slot.in_flight = Some(InFlight {
                        request: request.id,
                        reply: request.reply,
                        deadline: now + self.settings.dispatch_timeout,
                    });
                }
                Err(err) => {
                    // The request was never started, keep its place in line.
                    self.queue.push_front(request);
                    self.fault(index, &err.to_string(), now);
                }
            }
        }
    }

    pub(crate) fn on_event(&mut self, event: UnitEvent, now: Instant) {
        match event {
            UnitEvent::PathResult {
                unit,
                generation,
                request,
                path,
            } => {
                let Some(slot) = self.units.get_mut(unit.0) else {
                    return;
                };
                let current = slot.generation == generation
                    && slot
                        .in_flight
                        .as_ref()
                        .is_some_and(|in_flight| in_flight.request == request);

                if current {
                    if let Some(in_flight) = slot.in_flight.take() {
                        let _ = in_flight.reply.send(path);
                    }
                } else {
                    log::debug!(
                        "Ignoring stale result for request {} from unit {}",
                        request,
                        unit
                    );
                }
            }
            UnitEvent::Fault {
                unit,
                generation,
                reason,
            } => {
                if self
                    .units
                    .get(unit.0)
                    .is_some_and(|slot| slot.generation == generation)
                {
                    self.fault(unit.0, &reason, now);
                }
            }
        }

        self.dispatch(now);
    }

    /// Takes a unit out of rotation and schedules its restart.
    fn fault(&mut self, index: usize, reason: &str, now: Instant) {
        let backoff = self.settings.restart_backoff;
        let slot = &mut self.units[index];
        if slot.restarting {
            return;
        }

        log::error!(
            "Execution unit {} faulted: {}. Restarting in {:?}",
            slot.id,
            reason,
            backoff
        );
        slot.unit = None;
        slot.restarting = true;
        slot.restart_at = Some(now + backoff);
        if let Some(in_flight) = slot.in_flight.take() {
            let _ = in_flight.reply.send(None);
        }
    }

    /// Expires timed-out requests, restarts units whose backoff has elapsed and
    /// dispatches whatever that freed up.
    pub(crate) fn tick(&mut self, now: Instant) {
        for slot in &mut self.units {
            if slot
                .in_flight
                .as_ref()
                .is_some_and(|in_flight| in_flight.deadline <= now)
            {
                if let Some(in_flight) = slot.in_flight.take() {
                    log::warn!(
                        "Path request {} on unit {} timed out after {:?}",
                        in_flight.request,
                        slot.id,
                        self.settings.dispatch_timeout
                    );
                    let _ = in_flight.reply.send(None);
                }
            }
        }

        for index in 0..self.units.len() {
            if self.units[index].restart_at.is_some_and(|at| at <= now) {
                self.restart(index);
            }
        }

        self.dispatch(now);
    }

    fn restart(&mut self, index: usize) {
        let slot = &mut self.units[index];
        slot.restart_at = None;
        slot.generation += 1;
        let (id, generation) = (slot.id, slot.generation);

        let unit = match self.factory.spawn(id, generation) {
            Ok(unit) => unit,
            Err(err) => {
                log::error!("Execution unit {} could not be restarted: {}", id, err);
                return;
            }
        };

        for (&chunk, record) in &self.registry {
            let message = UnitMessage::RegisterChunk {
                id: chunk,
                version: record.version,
                grid: record.grid.clone(),
            };
            if let Err(err) = unit.post(message) {
                log::error!("Execution unit {} failed during resync: {}", id, err);
                return;
            }
        }

        log::info!(
            "Execution unit {} restarted as generation {} with {} chunks",
            id,
            generation,
            self.registry.len()
        );
        let slot = &mut self.units[index];
        slot.unit = Some(unit);
        slot.restarting = false;
    }

    fn broadcast(&mut self, message: UnitMessage, now: Instant) {
        let mut failed = Vec::new();
        for (index, slot) in self.units.iter().enumerate() {
            if slot.restarting {
                continue;
            }
            if let Some(unit) = &slot.unit {
                if let Err(err) = unit.post(message.clone()) {
                    failed.push((index, err));
                }
            }
        }

        for (index, err) in failed {
            self.fault(index, &err.to_string(), now);
        }
    }

    pub(crate) fn register_chunk(&mut self, id: ChunkId, version: u64, grid: Vec<u8>, now: Instant) {
        self.registry.insert(
            id,
            ChunkRecord {
                version,
                grid: grid.clone(),
            },
        );
        self.broadcast(UnitMessage::RegisterChunk { id, version, grid }, now);
    }

    pub(crate) fn unregister_chunk(&mut self, id: ChunkId, now: Instant) {
        self.registry.shift_remove(&id);
        self.broadcast(UnitMessage::UnregisterChunk { id }, now);
    }

    pub(crate) fn update_chunk(
        &mut self,
        id: ChunkId,
        version: u64,
        grid: Vec<u8>,
        now: Instant,
    ) -> Result<(), NavError> {
        let record = self
            .registry
            .get_mut(&id)
            .ok_or(NavError::ChunkNotLoaded(id))?;
        if record.grid.len() != grid.len() {
            return Err(NavError::GridSize {
                expected: record.grid.len(),
                actual: grid.len(),
            });
        }

        record.version = version;
        record.grid.clone_from(&grid);
        self.broadcast(UnitMessage::UpdateChunk { id, version, grid }, now);
        Ok(())
    }

    pub(crate) fn update_cells(
        &mut self,
        id: ChunkId,
        version: u64,
        updates: Vec<CellUpdate>,
        now: Instant,
    ) -> Result<(), NavError> {
        let record = self
            .registry
            .get_mut(&id)
            .ok_or(NavError::ChunkNotLoaded(id))?;
        let len = record.grid.len();
        if let Some(bad) = updates.iter().find(|u| u.index as usize >= len) {
            return Err(NavError::CellOutOfRange {
                index: bad.index as usize,
                len,
            });
        }

        for update in &updates {
            record.grid[update.index as usize] = update.flags;
        }
        record.version = version;
        self.broadcast(
            UnitMessage::UpdateCells {
                id,
                version,
                updates,
            },
            now,
        );
        Ok(())
    }

    /// Earliest instant at which [`Self::tick`] has something to do.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.units
            .iter()
            .flat_map(|slot| {
                slot.in_flight
                    .as_ref()
                    .map(|in_flight| in_flight.deadline)
                    .into_iter()
                    .chain(slot.restart_at)
            })
            .min()
    }

    pub(crate) fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            units: self
                .units
                .iter()
                .map(|slot| UnitStatus {
                    id: slot.id,
                    generation: slot.generation,
                    busy: slot.in_flight.is_some(),
                    restarting: slot.restarting,
                })
                .collect(),
            queued: self.queue.len(),
            registered_chunks: self.registry.len(),
        }
    }

    /// Resolves every outstanding request with `None` and drops all units.
    pub(crate) fn shutdown(&mut self) {
        for request in self.queue.drain(..) {
            let _ = request.reply.send(None);
        }
        for slot in &mut self.units {
            if let Some(in_flight) = slot.in_flight.take() {
                let _ = in_flight.reply.send(None);
            }
            slot.unit = None;
        }
    }

    #[cfg(test)]
    fn post_to(&mut self, unit: UnitId, message: UnitMessage) {
        if let Some(Some(handle)) = self.units.get(unit.0).map(|slot| slot.unit.as_ref()) {
            let _ = handle.post(message);
        }
    }
}

enum Command {
    FindPath(PendingRequest),
    RegisterChunk {
        id: ChunkId,
        version: u64,
        grid: Vec<u8>,
    },
    UnregisterChunk(ChunkId),
    UpdateChunk {
        id: ChunkId,
        version: u64,
        grid: Vec<u8>,
    },
    UpdateCells {
        id: ChunkId,
        version: u64,
        updates: Vec<CellUpdate>,
    },
    Status(Sender<SchedulerStatus>),
    #[cfg(test)]
    Inject(UnitId, UnitMessage),
    Shutdown,
}

/// Handle to a running pool of execution units.
///
/// Dropping it stops the coordinator. Requests still queued or in flight resolve
/// to `None`.
pub struct PathfindingScheduler {
    commands: Sender<Command>,
    next_request: AtomicU64,
    coordinator: Option<JoinHandle<()>>,
}

impl PathfindingScheduler {
    /// Starts a pool of thread-backed units.
    pub fn spawn(settings: &NavSettings) -> Result<Self, NavError> {
        let settings = *settings;
        PathfindingScheduler::with_factory(settings.scheduler, move |events| {
            ThreadUnitFactory::new(settings, events)
        })
    }

    /// Starts a pool with units from a custom factory. `build` receives the
    /// channel every unit must report its events on.
    pub fn with_factory<F, B>(settings: SchedulerSettings, build: B) -> Result<Self, NavError>
    where
        F: UnitFactory + 'static,
        B: FnOnce(Sender<UnitEvent>) -> F,
    {
        let (events_tx, events_rx) = unbounded();
        let core = SchedulerCore::new(settings, build(events_tx), Instant::now())?;

        let (commands, commands_rx) = unbounded();
        let coordinator = thread::Builder::new()
            .name("jumpnav-scheduler".to_string())
            .spawn(move || run_coordinator(core, commands_rx, events_rx))
            .map_err(NavError::CoordinatorSpawn)?;

        Ok(PathfindingScheduler {
            commands,
            next_request: AtomicU64::new(1),
            coordinator: Some(coordinator),
        })
    }

    /// Queues a path request. Never fails; if the scheduler is gone the ticket
    /// resolves to `None`.
    pub fn find_path(&self, start: Vec2, goal: Vec2, options: PathOptions) -> PathTicket {
        let id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (ticket, reply) = PathTicket::new(id);
        let request = PendingRequest {
            id,
            start,
            goal,
            options,
            reply,
        };

        if self.commands.send(Command::FindPath(request)).is_err() {
            log::warn!("Path request {} dropped, scheduler is closed", id);
        }
        ticket
    }

    pub fn register_chunk(&self, id: ChunkId, version: u64, grid: Vec<u8>) -> Result<(), NavError> {
        self.send(Command::RegisterChunk { id, version, grid })
    }

    pub fn unregister_chunk(&self, id: ChunkId) -> Result<(), NavError> {
        self.send(Command::UnregisterChunk(id))
    }

    pub fn update_chunk(&self, id: ChunkId, version: u64, grid: Vec<u8>) -> Result<(), NavError> {
        self.send(Command::UpdateChunk { id, version, grid })
    }

    pub fn update_cells(
        &self,
        id: ChunkId,
        version: u64,
        updates: Vec<CellUpdate>,
    ) -> Result<(), NavError> {
        self.send(Command::UpdateCells {
            id,
            version,
            updates,
        })
    }

    pub fn status(&self) -> Result<SchedulerStatus, NavError> {
        let (reply, status) = bounded(1);
        self.send(Command::Status(reply))?;
        status.recv().map_err(|_| NavError::SchedulerClosed)
    }

    #[cfg(test)]
    fn inject(&self, unit: UnitId, message: UnitMessage) -> Result<(), NavError> {
        self.send(Command::Inject(unit, message))
    }

    fn send(&self, command: Command) -> Result<(), NavError> {
        self.commands
            .send(command)
            .map_err(|_| NavError::SchedulerClosed)
    }
}

impl Drop for PathfindingScheduler {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(coordinator) = self.coordinator.take() {
            if coordinator.join().is_err() {
                log::error!("Pathfinding scheduler thread panicked");
            }
        }
    }
}

fn run_coordinator<F: UnitFactory>(
    mut core: SchedulerCore<F>,
    commands: Receiver<Command>,
    events: Receiver<UnitEvent>,
) {
    let mut running = true;
    while running {
        let wake = match core.next_deadline() {
            Some(deadline) => crossbeam_channel::at(deadline),
            None => crossbeam_channel::never(),
        };

        select! {
            recv(commands) -> command => {
                running = match command {
                    Ok(command) => apply(&mut core, command),
                    Err(_) => false,
                };
            }
            recv(events) -> event => {
                if let Ok(event) = event {
                    core.on_event(event, Instant::now());
                }
            }
            recv(wake) -> _ => {}
        }

        core.tick(Instant::now());
    }

    core.shutdown();
    log::debug!("Pathfinding scheduler stopped");
}

/// Returns `false` on shutdown.
fn apply<F: UnitFactory>(core: &mut SchedulerCore<F>, command: Command) -> bool {
    let now = Instant::now();
    let result = match command {
        Command::FindPath(request) => {
            core.submit(request, now);
            Ok(())
        }
        Command::RegisterChunk { id, version, grid } => {
            core.register_chunk(id, version, grid, now);
            Ok(())
        }
        Command::UnregisterChunk(id) => {
            core.unregister_chunk(id, now);
            Ok(())
        }
        Command::UpdateChunk { id, version, grid } => core.update_chunk(id, version, grid, now),
        Command::UpdateCells {
            id,
            version,
            updates,
        } => core.update_cells(id, version, updates, now),
        Command::Status(reply) => {
            let _ = reply.send(core.status());
            Ok(())
        }
        #[cfg(test)]
        Command::Inject(unit, message) => {
            core.post_to(unit, message);
            Ok(())
        }
        Command::Shutdown => return false,
    };

    if let Err(err) = result {
        log::warn!("Chunk change rejected by scheduler: {}", err);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cell::NavCell, settings::NavSettingsBuilder};
    use std::sync::{Arc, Mutex};

    /// Everything posted to fake units, plus which of them refuse messages.
    #[derive(Clone, Default)]
    struct Journal {
        posted: Arc<Mutex<Vec<(UnitId, u64, UnitMessage)>>>,
        broken: Arc<Mutex<Vec<(UnitId, u64)>>>,
        refuse_restart: Arc<Mutex<Vec<UnitId>>>,
        refuse_all: Arc<Mutex<bool>>,
    }

    impl Journal {
        fn find_paths(&self) -> Vec<(UnitId, RequestId)> {
            self.posted
                .lock()
                .unwrap()
                .iter()
                .filter_map(|(unit, _, message)| match message {
                    UnitMessage::FindPath { request, .. } => Some((*unit, *request)),
                    _ => None,
                })
                .collect()
        }

        fn registrations(&self, unit: UnitId, generation: u64) -> Vec<(ChunkId, u64, Vec<u8>)> {
            self.posted
                .lock()
                .unwrap()
                .iter()
                .filter(|(u, g, _)| *u == unit && *g == generation)
                .filter_map(|(_, _, message)| match message {
                    UnitMessage::RegisterChunk { id, version, grid } => {
                        Some((*id, *version, grid.clone()))
                    }
                    _ => None,
                })
                .collect()
        }

        fn position(&self, pred: impl Fn(&(UnitId, u64, UnitMessage)) -> bool) -> Option<usize> {
            self.posted.lock().unwrap().iter().position(pred)
        }
    }

    struct FakeUnit {
        id: UnitId,
        generation: u64,
        journal: Journal,
    }

    impl ExecutionUnit for FakeUnit {
        fn post(&self, message: UnitMessage) -> Result<(), NavError> {
            if self
                .journal
                .broken
                .lock()
                .unwrap()
                .contains(&(self.id, self.generation))
            {
                return Err(NavError::UnitDisconnected(self.id));
            }
            self.journal
                .posted
                .lock()
                .unwrap()
                .push((self.id, self.generation, message));
            Ok(())
        }
    }

    struct FakeFactory(Journal);

    impl UnitFactory for FakeFactory {
        type Unit = FakeUnit;

        fn spawn(&mut self, id: UnitId, generation: u64) -> Result<FakeUnit, NavError> {
            let refused = *self.0.refuse_all.lock().unwrap()
                || (generation > 0 && self.0.refuse_restart.lock().unwrap().contains(&id));
            if refused {
                return Err(NavError::UnitSpawn {
                    unit: id,
                    source: std::io::Error::other("refused"),
                });
            }
            Ok(FakeUnit {
                id,
                generation,
                journal: self.0.clone(),
            })
        }
    }

    fn scheduler_settings(pool_size: usize) -> SchedulerSettings {
        SchedulerSettings {
            pool_size,
            dispatch_timeout: Duration::from_secs(12),
            restart_backoff: Duration::from_millis(1000),
        }
    }

    fn core(pool_size: usize, journal: &Journal, now: Instant) -> SchedulerCore<FakeFactory> {
        SchedulerCore::new(
            scheduler_settings(pool_size),
            FakeFactory(journal.clone()),
            now,
        )
        .unwrap()
    }

    fn submit(
        core: &mut SchedulerCore<FakeFactory>,
        id: RequestId,
        now: Instant,
    ) -> Receiver<Option<Path>> {
        let (reply, result) = bounded(1);
        core.submit(
            PendingRequest {
                id,
                start: Vec2::ZERO,
                goal: Vec2::ONE,
                options: PathOptions::default(),
                reply,
            },
            now,
        );
        result
    }

    fn answer(unit: usize, generation: u64, request: RequestId) -> UnitEvent {
        UnitEvent::PathResult {
            unit: UnitId(unit),
            generation,
            request,
            path: Some(Path::new(vec![Vec2::ZERO, Vec2::ONE], 1.0)),
        }
    }

    #[test]
    fn test_fifo_dispatch_across_units() {
        let t0 = Instant::now();
        let journal = Journal::default();
        let mut core = core(3, &journal, t0);

        let replies: Vec<_> = (1..=5).map(|id| submit(&mut core, id, t0)).collect();
        assert_eq!(
            journal.find_paths(),
            vec![(UnitId(0), 1), (UnitId(1), 2), (UnitId(2), 3)]
        );
        assert_eq!(core.status().queued, 2);

        core.on_event(answer(1, 0, 2), t0);
        assert_eq!(journal.find_paths()[3], (UnitId(1), 4));

        core.on_event(answer(0, 0, 1), t0);
        assert_eq!(journal.find_paths()[4], (UnitId(0), 5));
        assert_eq!(core.status().queued, 0);

        assert!(replies[0].try_recv().unwrap().is_some());
        assert!(replies[1].try_recv().unwrap().is_some());
        assert!(replies[2].try_recv().is_err());
    }

    #[test]
    fn test_timeout_resolves_none_without_restart() {
        let t0 = Instant::now();
        let journal = Journal::default();
        let mut core = core(2, &journal, t0);

        let stuck = submit(&mut core, 1, t0);
        let _second = submit(&mut core, 2, t0);
        let third = submit(&mut core, 3, t0);
        assert_eq!(core.next_deadline(), Some(t0 + Duration::from_secs(12)));

        // The other unit keeps serving the queue.
        core.on_event(answer(1, 0, 2), t0 + Duration::from_secs(1));
        assert_eq!(journal.find_paths()[2], (UnitId(1), 3));
        core.on_event(answer(1, 0, 3), t0 + Duration::from_secs(2));
        assert!(third.try_recv().unwrap().is_some());

        core.tick(t0 + Duration::from_millis(11_999));
        assert!(matches!(stuck.try_recv(), Err(TryRecvError::Empty)));

        core.tick(t0 + Duration::from_secs(12));
        assert_eq!(stuck.try_recv().unwrap(), None);

        let status = core.status();
        assert!(!status.units[0].busy);
        assert!(!status.units[0].restarting);
        assert_eq!(status.units[0].generation, 0);

        // A late answer for the expired request must not settle the next one.
        let fourth = submit(&mut core, 4, t0 + Duration::from_secs(13));
        assert_eq!(journal.find_paths()[3], (UnitId(0), 4));
        core.on_event(answer(0, 0, 1), t0 + Duration::from_secs(14));
        assert!(matches!(fourth.try_recv(), Err(TryRecvError::Empty)));
        assert!(core.status().units[0].busy);
    }

    #[test]
    fn test_fault_restarts_and_replays_registry() {
        let t0 = Instant::now();
        let journal = Journal::default();
        let mut core = core(2, &journal, t0);
        let chunk = ChunkId::new(0, -1);

        core.register_chunk(chunk, 1, vec![1, 1, 1, 1], t0);
        core.update_cells(
            chunk,
            2,
            vec![CellUpdate {
                index: 2,
                flags: NavCell::OBSTACLE.bits(),
            }],
            t0,
        )
        .unwrap();

        let failed = submit(&mut core, 1, t0);
        let _busy = submit(&mut core, 2, t0);
        core.on_event(
            UnitEvent::Fault {
                unit: UnitId(0),
                generation: 0,
                reason: "boom".to_string(),
            },
            t0,
        );
        assert_eq!(failed.try_recv().unwrap(), None);
        assert!(core.status().units[0].restarting);

        let queued = submit(&mut core, 3, t0);
        core.tick(t0 + Duration::from_millis(999));
        assert!(core.status().units[0].restarting);
        assert_eq!(journal.find_paths().len(), 2);

        core.tick(t0 + Duration::from_millis(1000));
        let status = core.status();
        assert!(!status.units[0].restarting);
        assert_eq!(status.units[0].generation, 1);

        assert_eq!(
            journal.registrations(UnitId(0), 1),
            vec![(chunk, 2, vec![1, 1, NavCell::OBSTACLE.bits(), 1])]
        );
        let replay = journal
            .position(|(u, g, m)| {
                *u == UnitId(0) && *g == 1 && matches!(m, UnitMessage::RegisterChunk { .. })
            })
            .unwrap();
        let dispatch = journal
            .position(|(u, g, m)| {
                *u == UnitId(0) && *g == 1 && matches!(m, UnitMessage::FindPath { request: 3, .. })
            })
            .unwrap();
        assert!(replay < dispatch);

        // Results from the replaced instance are ignored.
        core.on_event(answer(0, 0, 3), t0 + Duration::from_millis(1001));
        assert!(matches!(queued.try_recv(), Err(TryRecvError::Empty)));
        core.on_event(answer(0, 1, 3), t0 + Duration::from_millis(1002));
        assert!(queued.try_recv().unwrap().is_some());
    }

    #[test]
    fn test_failed_restart_stays_out_of_rotation() {
        let t0 = Instant::now();
        let journal = Journal::default();
        journal.refuse_restart.lock().unwrap().push(UnitId(0));
        let mut core = core(2, &journal, t0);

        core.on_event(
            UnitEvent::Fault {
                unit: UnitId(0),
                generation: 0,
                reason: "boom".to_string(),
            },
            t0,
        );
        core.tick(t0 + Duration::from_secs(1));
        assert!(core.status().units[0].restarting);
        assert_eq!(core.next_deadline(), None);

        core.tick(t0 + Duration::from_secs(3600));
        assert_eq!(core.status().restarting_units(), 1);

        let _a = submit(&mut core, 1, t0 + Duration::from_secs(3600));
        let _b = submit(&mut core, 2, t0 + Duration::from_secs(3600));
        assert_eq!(journal.find_paths(), vec![(UnitId(1), 1)]);
        assert_eq!(core.status().queued, 1);
    }

    #[test]
    fn test_post_failure_keeps_request_in_line() {
        let t0 = Instant::now();
        let journal = Journal::default();
        journal.broken.lock().unwrap().push((UnitId(0), 0));
        let mut core = core(2, &journal, t0);

        let reply = submit(&mut core, 1, t0);
        assert_eq!(journal.find_paths(), vec![(UnitId(1), 1)]);
        assert!(core.status().units[0].restarting);
        assert!(matches!(reply.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_pool_start() {
        let t0 = Instant::now();
        let journal = Journal::default();
        *journal.refuse_all.lock().unwrap() = true;
        let result = SchedulerCore::new(scheduler_settings(3), FakeFactory(journal.clone()), t0);
        assert!(matches!(result, Err(NavError::UnitSpawn { .. })));

        let result = SchedulerCore::new(scheduler_settings(0), FakeFactory(Journal::default()), t0);
        assert!(matches!(result, Err(NavError::EmptyPool)));
    }

    #[test]
    fn test_registry_changes() {
        let t0 = Instant::now();
        let journal = Journal::default();
        let mut core = core(1, &journal, t0);
        let chunk = ChunkId::new(3, 4);

        assert!(matches!(
            core.update_chunk(chunk, 1, vec![0; 4], t0),
            Err(NavError::ChunkNotLoaded(_))
        ));

        core.register_chunk(chunk, 0, vec![1; 4], t0);
        assert!(matches!(
            core.update_chunk(chunk, 1, vec![0; 9], t0),
            Err(NavError::GridSize { .. })
        ));
        assert!(matches!(
            core.update_cells(chunk, 1, vec![CellUpdate { index: 4, flags: 0 }], t0),
            Err(NavError::CellOutOfRange { .. })
        ));
        core.update_chunk(chunk, 5, vec![0; 4], t0).unwrap();
        assert_eq!(core.status().registered_chunks, 1);

        core.unregister_chunk(chunk, t0);
        assert_eq!(core.status().registered_chunks, 0);
        assert_eq!(journal.posted.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_shutdown_resolves_everything() {
        let t0 = Instant::now();
        let journal = Journal::default();
        let mut core = core(1, &journal, t0);

        let running = submit(&mut core, 1, t0);
        let queued = submit(&mut core, 2, t0);
        core.shutdown();

        assert_eq!(running.try_recv().unwrap(), None);
        assert_eq!(queued.try_recv().unwrap(), None);
    }

    #[test]
    fn test_ready_ticket() {
        let path = Path::new(vec![Vec2::ZERO], 0.0);
        let ticket = PathTicket::ready(9, Some(path.clone()));
        assert_eq!(ticket.id(), 9);
        assert_eq!(ticket.poll(), PathPoll::Ready(Some(path)));
        assert_eq!(ticket.poll(), PathPoll::Ready(None));
    }

    fn open_grid(side: usize) -> Vec<u8> {
        vec![NavCell::WALKABLE.bits(); side * side]
    }

    #[test]
    fn test_threaded_pool_finds_paths() {
        let settings = NavSettingsBuilder::new(10, 1.0).pool_size(2).build();
        let scheduler = PathfindingScheduler::spawn(&settings).unwrap();
        scheduler
            .register_chunk(ChunkId::new(0, 0), 0, open_grid(10))
            .unwrap();

        let tickets: Vec<_> = (0..4)
            .map(|i| {
                scheduler.find_path(
                    Vec2::new(0.0, i as f32),
                    Vec2::new(9.0, 9.0),
                    PathOptions::default(),
                )
            })
            .collect();

        for ticket in tickets {
            match ticket.wait_timeout(Duration::from_secs(5)) {
                PathPoll::Ready(Some(path)) => {
                    assert_eq!(path.last(), Some(Vec2::new(9.0, 9.0)));
                }
                other => panic!("unexpected ticket state {:?}", other),
            }
        }

        let outside = scheduler.find_path(
            Vec2::ZERO,
            Vec2::new(50.0, 50.0),
            PathOptions::default(),
        );
        assert_eq!(outside.wait(), None);

        let status = scheduler.status().unwrap();
        assert_eq!(status.units.len(), 2);
        assert_eq!(status.registered_chunks, 1);
    }

    #[test]
    fn test_threaded_unit_recovers_after_crash() {
        let settings = NavSettingsBuilder::new(10, 1.0)
            .pool_size(1)
            .restart_backoff(Duration::from_millis(20))
            .build();
        let scheduler = PathfindingScheduler::spawn(&settings).unwrap();

        let mut grid = open_grid(10);
        for z in 0..9 {
            grid[z * 10 + 5] = NavCell::OBSTACLE.bits();
        }
        scheduler
            .register_chunk(ChunkId::new(0, 0), 3, grid)
            .unwrap();

        let before = scheduler
            .find_path(Vec2::ZERO, Vec2::new(9.0, 0.0), PathOptions::default())
            .wait()
            .unwrap();

        scheduler.inject(UnitId(0), UnitMessage::Crash).unwrap();

        let mut recovered = false;
        for _ in 0..250 {
            let status = scheduler.status().unwrap();
            if status.units[0].generation == 1 && !status.units[0].restarting {
                recovered = true;
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert!(recovered);

        let after = scheduler
            .find_path(Vec2::ZERO, Vec2::new(9.0, 0.0), PathOptions::default())
            .wait()
            .unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_drop_closes_scheduler() {
        let settings = NavSettingsBuilder::new(10, 1.0).pool_size(1).build();
        let scheduler = PathfindingScheduler::spawn(&settings).unwrap();
        let ticket = scheduler.find_path(Vec2::ZERO, Vec2::ONE, PathOptions::default());
        drop(scheduler);

        assert!(matches!(
            ticket.wait_timeout(Duration::from_secs(5)),
            PathPoll::Ready(_)
        ));
    }
}
