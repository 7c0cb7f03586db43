use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Spinner,
    Health,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Spinner => "spinner",
            TaskKind::Health => "health",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single system-wide task slot.
///
/// The stop handle only exists while a task runs, so "running without a way
/// to stop it" is unrepresentable.
enum SlotState {
    Free,
    Running {
        kind: TaskKind,
        task_id: Uuid,
        stop: watch::Sender<bool>,
    },
}

/// Result of a stop request. Both variants are normal answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped { kind: TaskKind },
    NoActiveTask,
}

impl StopOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            StopOutcome::Stopped { .. } => "Stopped",
            StopOutcome::NoActiveTask => "No active task",
        }
    }
}

/// Receiving end of a per-task stop request. Polled, never awaited.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Ownership of the task slot. Dropping it frees the slot.
pub struct TaskGuard {
    slot: Arc<Mutex<SlotState>>,
    kind: TaskKind,
    task_id: Uuid,
    signal: StopSignal,
}

impl TaskGuard {
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.signal
    }

    /// Frees the slot now rather than at end of scope.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let mut slot = lock_slot(&self.slot);
        // A guard only frees the slot it acquired. If the slot was force
        // released and re-acquired in the meantime it belongs to someone else.
        if let SlotState::Running { task_id, .. } = &*slot {
            if *task_id == self.task_id {
                *slot = SlotState::Free;
                tracing::debug!(task = %self.task_id, kind = %self.kind, "task slot released");
            }
        }
    }
}

impl fmt::Debug for TaskGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGuard")
            .field("kind", &self.kind)
            .field("task_id", &self.task_id)
            .finish()
    }
}

fn lock_slot(slot: &Mutex<SlotState>) -> MutexGuard<'_, SlotState> {
    // Every write replaces the state whole, so a poisoned lock still holds a
    // consistent value.
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct SessionManager {
    slot: Arc<Mutex<SlotState>>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(SlotState::Free)),
        }
    }

    /// Claims the slot for `kind`, or reports which task holds it.
    pub fn try_acquire(&self, kind: TaskKind) -> Result<TaskGuard, SessionError> {
        let mut slot = lock_slot(&self.slot);
        if let SlotState::Running { kind: active, .. } = &*slot {
            return Err(SessionError::AlreadyActive { active: *active });
        }

        let (stop, rx) = watch::channel(false);
        let task_id = Uuid::new_v4();
        *slot = SlotState::Running {
            kind,
            task_id,
            stop,
        };
        drop(slot);

        tracing::debug!(task = %task_id, %kind, "task slot acquired");
        Ok(TaskGuard {
            slot: Arc::clone(&self.slot),
            kind,
            task_id,
            signal: StopSignal { rx },
        })
    }

    /// Asks the running task to stop at its next poll.
    pub fn signal(&self) -> StopOutcome {
        let slot = lock_slot(&self.slot);
        match &*slot {
            SlotState::Running { kind, stop, .. } => {
                stop.send_replace(true);
                StopOutcome::Stopped { kind: *kind }
            }
            SlotState::Free => StopOutcome::NoActiveTask,
        }
    }

    /// Clears the slot unconditionally. A no-op when nothing is running.
    ///
    /// Normal release goes through [`TaskGuard`]; this exists for shutdown.
    /// The evicted task is signalled first so its runner ends at the next
    /// poll instead of streaming on outside the slot.
    pub fn release(&self) {
        let mut slot = lock_slot(&self.slot);
        if let SlotState::Running { kind, task_id, stop } = &*slot {
            stop.send_replace(true);
            tracing::debug!(task = %task_id, %kind, "task slot force released");
        }
        *slot = SlotState::Free;
    }

    pub fn active(&self) -> Option<TaskKind> {
        match &*lock_slot(&self.slot) {
            SlotState::Running { kind, .. } => Some(*kind),
            SlotState::Free => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_then_reject() {
        let manager = SessionManager::new();
        let guard = manager
            .try_acquire(TaskKind::Spinner)
            .expect("slot should be free");
        assert_eq!(guard.kind(), TaskKind::Spinner);
        assert_eq!(manager.active(), Some(TaskKind::Spinner));

        let err = manager.try_acquire(TaskKind::Health).unwrap_err();
        assert_eq!(
            err,
            SessionError::AlreadyActive {
                active: TaskKind::Spinner
            }
        );
    }

    #[test]
    fn test_guard_drop_frees_slot() {
        let manager = SessionManager::new();
        {
            let _guard = manager.try_acquire(TaskKind::Health).unwrap();
            assert_eq!(manager.active(), Some(TaskKind::Health));
        }
        assert_eq!(manager.active(), None);
        assert!(manager.try_acquire(TaskKind::Spinner).is_ok());
    }

    #[test]
    fn test_release_is_idempotent() {
        let manager = SessionManager::new();
        manager.release();
        manager.release();
        assert_eq!(manager.active(), None);
        assert_eq!(manager.signal(), StopOutcome::NoActiveTask);

        let guard = manager.try_acquire(TaskKind::Spinner).unwrap();
        manager.release();
        manager.release();
        drop(guard);
        assert_eq!(manager.active(), None);
    }

    #[test]
    fn test_stale_guard_does_not_free_newer_task() {
        let manager = SessionManager::new();
        let stale = manager.try_acquire(TaskKind::Spinner).unwrap();
        manager.release();

        let current = manager.try_acquire(TaskKind::Health).unwrap();
        assert!(!current.stop_signal().is_triggered());
        drop(stale);
        assert_eq!(manager.active(), Some(TaskKind::Health));

        current.release();
        assert_eq!(manager.active(), None);
    }

    #[test]
    fn test_forced_release_stops_evicted_task() {
        let manager = SessionManager::new();
        let evicted = manager.try_acquire(TaskKind::Spinner).unwrap();
        assert!(!evicted.stop_signal().is_triggered());

        manager.release();
        assert!(evicted.stop_signal().is_triggered());
        assert_eq!(manager.active(), None);
        assert_eq!(manager.signal(), StopOutcome::NoActiveTask);
    }

    #[test]
    fn test_signal_reaches_running_task() {
        let manager = SessionManager::new();
        assert_eq!(manager.signal(), StopOutcome::NoActiveTask);

        let guard = manager.try_acquire(TaskKind::Health).unwrap();
        assert!(!guard.stop_signal().is_triggered());

        assert_eq!(
            manager.signal(),
            StopOutcome::Stopped {
                kind: TaskKind::Health
            }
        );
        assert!(guard.stop_signal().is_triggered());

        // A second stop while the task winds down is still "Stopped".
        assert_eq!(manager.signal().message(), "Stopped");
    }

    #[test]
    fn test_fresh_signal_per_task() {
        let manager = SessionManager::new();
        let first = manager.try_acquire(TaskKind::Spinner).unwrap();
        manager.signal();
        assert!(first.stop_signal().is_triggered());
        drop(first);

        let second = manager.try_acquire(TaskKind::Spinner).unwrap();
        assert!(!second.stop_signal().is_triggered());
    }

    #[test]
    fn test_concurrent_acquire_single_winner() {
        let manager = SessionManager::new();
        let barrier = Arc::new(std::sync::Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let manager = manager.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let kind = if i % 2 == 0 {
                        TaskKind::Spinner
                    } else {
                        TaskKind::Health
                    };
                    barrier.wait();
                    manager.try_acquire(kind)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, SessionError::AlreadyActive { .. })));
    }
}
