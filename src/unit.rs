//! Execution units: isolated worker threads that each own a private copy of every
//! registered chunk grid and answer one path request at a time.
//!
//! The coordinator talks to a unit only through [`UnitMessage`]s and hears back
//! through [`UnitEvent`]s. Grid bytes are moved into the message, so nothing is
//! shared between the authoritative grids and any unit.
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use bevy::{log, math::Vec2};
use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::{
    chunk::{CellUpdate, ChunkId, ChunkNavigationMap},
    error::NavError,
    grid::ChunkStore,
    jps::{JumpPointSearch, PathOptions},
    path::Path,
    settings::NavSettings,
};

/// Index of a unit in the pool. Stable across restarts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub usize);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of a path request, unique for the lifetime of a scheduler.
pub type RequestId = u64;

/// Coordinator to unit.
#[derive(Debug, Clone)]
pub enum UnitMessage {
    RegisterChunk {
        id: ChunkId,
        version: u64,
        grid: Vec<u8>,
    },
    UnregisterChunk {
        id: ChunkId,
    },
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
    FindPath {
        request: RequestId,
        start: Vec2,
        goal: Vec2,
        options: PathOptions,
    },
    /// Makes the worker panic while handling it.
    #[cfg(test)]
    Crash,
}

/// Unit to coordinator. `generation` tells events of a restarted unit apart
/// from leftovers of the instance it replaced.
#[derive(Debug)]
pub enum UnitEvent {
    PathResult {
        unit: UnitId,
        generation: u64,
        request: RequestId,
        path: Option<Path>,
    },
    /// The unit is broken and must not be used until restarted.
    Fault {
        unit: UnitId,
        generation: u64,
        reason: String,
    },
}

/// Handle to one running execution unit.
pub trait ExecutionUnit: Send {
    /// Queues a message for the unit. Fails if the unit is gone.
    fn post(&self, message: UnitMessage) -> Result<(), NavError>;
}

/// Starts execution units, both initially and after a fault.
pub trait UnitFactory: Send {
    type Unit: ExecutionUnit;

    fn spawn(&mut self, id: UnitId, generation: u64) -> Result<Self::Unit, NavError>;
}

/// An execution unit backed by an OS thread.
///
/// Dropping the handle closes the unit's channel; the thread finishes whatever it
/// is doing and exits. It is never joined, a unit stuck in a long search must not
/// hold up the coordinator.
#[derive(Debug)]
pub struct ThreadUnit {
    id: UnitId,
    sender: Sender<UnitMessage>,
    _worker: JoinHandle<()>,
}

impl ExecutionUnit for ThreadUnit {
    fn post(&self, message: UnitMessage) -> Result<(), NavError> {
        self.sender
            .send(message)
            .map_err(|_| NavError::UnitDisconnected(self.id))
    }
}

/// Spawns [`ThreadUnit`]s that report to one event channel.
#[derive(Debug, Clone)]
pub struct ThreadUnitFactory {
    settings: NavSettings,
    events: Sender<UnitEvent>,
}

impl ThreadUnitFactory {
    pub fn new(settings: NavSettings, events: Sender<UnitEvent>) -> Self {
        ThreadUnitFactory { settings, events }
    }
}

impl UnitFactory for ThreadUnitFactory {
    type Unit = ThreadUnit;

    fn spawn(&mut self, id: UnitId, generation: u64) -> Result<ThreadUnit, NavError> {
        let (sender, receiver) = unbounded();
        let settings = self.settings;
        let events = self.events.clone();

        let worker = thread::Builder::new()
            .name(format!("jumpnav-unit-{}", id.0))
            .spawn(move || run_unit(id, generation, settings, receiver, events))
            .map_err(|source| NavError::UnitSpawn { unit: id, source })?;

        Ok(ThreadUnit {
            id,
            sender,
            _worker: worker,
        })
    }
}

/// State private to one unit.
pub(crate) struct UnitState {
    chunks: ChunkStore,
    solver: JumpPointSearch,
}

impl UnitState {
    pub(crate) fn new(settings: &NavSettings) -> Self {
        UnitState {
            chunks: ChunkStore::new(settings.chunk),
            solver: JumpPointSearch::new(settings.search),
        }
    }

    /// Applies one message. Path requests produce their answer.
    pub(crate) fn handle(
        &mut self,
        message: UnitMessage,
    ) -> Result<Option<(RequestId, Option<Path>)>, NavError> {
        match message {
            UnitMessage::RegisterChunk { id, version, grid } => {
                let (chunk_x, chunk_z) = id.coords();
                let chunk = ChunkNavigationMap::from_bytes(
                    chunk_x,
                    chunk_z,
                    self.chunks.settings(),
                    grid,
                    version,
                )?;
                self.chunks.insert(chunk);
            }
            UnitMessage::UnregisterChunk { id } => {
                self.chunks.remove(id);
            }
            UnitMessage::UpdateChunk { id, version, grid } => {
                let chunk = self
                    .chunks
                    .get_mut(id)
                    .ok_or(NavError::ChunkNotLoaded(id))?;
                chunk.replace_grid(grid)?;
                chunk.set_version(version);
            }
            UnitMessage::UpdateCells {
                id,
                version,
                updates,
            } => {
                let chunk = self
                    .chunks
                    .get_mut(id)
                    .ok_or(NavError::ChunkNotLoaded(id))?;
                chunk.apply_updates(&updates)?;
                chunk.set_version(version);
            }
            UnitMessage::FindPath {
                request,
                start,
                goal,
                options,
            } => {
                let path = self.solver.find_path(&self.chunks, start, goal, &options);
                return Ok(Some((request, path)));
            }
            #[cfg(test)]
            UnitMessage::Crash => panic!("injected unit crash"),
        }

        Ok(None)
    }

    #[cfg(test)]
    pub(crate) fn chunks(&self) -> &ChunkStore {
        &self.chunks
    }
}

fn run_unit(
    id: UnitId,
    generation: u64,
    settings: NavSettings,
    messages: Receiver<UnitMessage>,
    events: Sender<UnitEvent>,
) {
    let mut state = UnitState::new(&settings);

    while let Ok(message) = messages.recv() {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| state.handle(message)));

        let event = match outcome {
            Ok(Ok(Some((request, path)))) => UnitEvent::PathResult {
                unit: id,
                generation,
                request,
                path,
            },
            Ok(Ok(None)) => continue,
            Ok(Err(err)) => {
                // A bad chunk message leaves the unit usable.
                log::warn!("Execution unit {} rejected message: {}", id, err);
                continue;
            }
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                let _ = events.send(UnitEvent::Fault {
                    unit: id,
                    generation,
                    reason,
                });
                return;
            }
        };

        if events.send(event).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cell::NavCell, settings::NavSettingsBuilder};
    use std::time::Duration;

    fn settings() -> NavSettings {
        NavSettingsBuilder::new(10, 1.0).build()
    }

    #[test]
    fn test_unit_state_tracks_chunks() {
        let mut state = UnitState::new(&settings());
        let id = ChunkId::new(0, 0);

        state
            .handle(UnitMessage::RegisterChunk {
                id,
                version: 1,
                grid: vec![NavCell::WALKABLE.bits(); 100],
            })
            .unwrap();
        state
            .handle(UnitMessage::UpdateCells {
                id,
                version: 2,
                updates: vec![CellUpdate {
                    index: 11,
                    flags: (NavCell::WALKABLE | NavCell::WATER).bits(),
                }],
            })
            .unwrap();

        let chunk = state.chunks().get(id).unwrap();
        assert_eq!(chunk.version(), 2);
        assert!(!chunk.is_walkable(1, 1));

        let result = state.handle(UnitMessage::UpdateChunk {
            id: ChunkId::new(5, 5),
            version: 1,
            grid: vec![1; 100],
        });
        assert!(matches!(result, Err(NavError::ChunkNotLoaded(_))));

        state.handle(UnitMessage::UnregisterChunk { id }).unwrap();
        assert!(state.chunks().is_empty());
    }

    #[test]
    fn test_thread_unit_answers_and_faults() {
        let (events_tx, events_rx) = unbounded();
        let mut factory = ThreadUnitFactory::new(settings(), events_tx);
        let unit = factory.spawn(UnitId(0), 7).unwrap();

        unit.post(UnitMessage::RegisterChunk {
            id: ChunkId::new(0, 0),
            version: 0,
            grid: vec![NavCell::WALKABLE.bits(); 100],
        })
        .unwrap();
        unit.post(UnitMessage::FindPath {
            request: 42,
            start: Vec2::ZERO,
            goal: Vec2::new(9.0, 9.0),
            options: PathOptions::default(),
        })
        .unwrap();

        match events_rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            UnitEvent::PathResult {
                unit,
                generation,
                request,
                path,
            } => {
                assert_eq!(unit, UnitId(0));
                assert_eq!(generation, 7);
                assert_eq!(request, 42);
                assert_eq!(path.unwrap().len(), 2);
            }
            other => panic!("unexpected event {:?}", other),
        }

        unit.post(UnitMessage::Crash).unwrap();
        match events_rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            UnitEvent::Fault { unit, reason, .. } => {
                assert_eq!(unit, UnitId(0));
                assert!(reason.contains("injected"));
            }
            other => panic!("unexpected event {:?}", other),
        }

        // The thread is gone once it has faulted.
        let mut closed = false;
        for _ in 0..50 {
            if unit
                .post(UnitMessage::UnregisterChunk {
                    id: ChunkId::new(0, 0),
                })
                .is_err()
            {
                closed = true;
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(closed);
    }
}
