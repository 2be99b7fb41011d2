//! Forward-only lifecycle tracking

use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, warn};
use tokio::sync::watch;

use crate::domain::ServiceState;

/// Shared view of the sensor's [`ServiceState`].
///
/// Clones observe the same state. Every accepted transition is also kept in
/// a history so the full path can be inspected after shutdown.
#[derive(Debug, Clone)]
pub struct StateTracker {
    tx: Arc<watch::Sender<ServiceState>>,
    history: Arc<Mutex<Vec<ServiceState>>>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ServiceState::Uninitialized);
        Self {
            tx: Arc::new(tx),
            history: Arc::new(Mutex::new(vec![ServiceState::Uninitialized])),
        }
    }

    pub fn current(&self) -> ServiceState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ServiceState> {
        self.tx.subscribe()
    }

    /// Every state reached so far, oldest first.
    pub fn history(&self) -> Vec<ServiceState> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Move to `next` if it lies ahead of the current state.
    ///
    /// Returns false (and changes nothing) for a backwards or repeated transition.
    pub fn advance(&self, next: ServiceState) -> bool {
        // Held across the update so concurrent transitions are recorded in order
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        let mut previous = next;
        let moved = self.tx.send_if_modified(|state| {
            previous = *state;
            if next > *state {
                *state = next;
                true
            } else {
                false
            }
        });

        if moved {
            history.push(next);
            debug!("state: {previous} -> {next}");
        } else {
            warn!("rejected state transition {previous} -> {next}");
        }
        moved
    }

    /// Wait until the state reaches `target` (or anything after it).
    pub async fn wait_for(&self, target: ServiceState) -> ServiceState {
        let mut rx = self.subscribe();
        let reached = match rx.wait_for(|state| *state >= target).await {
            Ok(state) => *state,
            // The sender lives in `self`, so the channel cannot close here
            Err(_) => self.current(),
        };
        reached
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        let state = StateTracker::new();
        assert_eq!(state.current(), ServiceState::Uninitialized);
        assert!(state.advance(ServiceState::Initializing));
        assert!(state.advance(ServiceState::ProbeLoaded));
        assert_eq!(state.current(), ServiceState::ProbeLoaded);
    }

    #[test]
    fn test_backwards_transition_rejected() {
        let state = StateTracker::new();
        assert!(state.advance(ServiceState::Running));
        assert!(!state.advance(ServiceState::Attached));
        assert!(!state.advance(ServiceState::Running));
        assert_eq!(state.current(), ServiceState::Running);
        assert_eq!(state.history(), vec![ServiceState::Uninitialized, ServiceState::Running]);
    }

    #[test]
    fn test_failure_may_skip_to_stopped() {
        let state = StateTracker::new();
        state.advance(ServiceState::Initializing);
        assert!(state.advance(ServiceState::Stopped));
        assert!(!state.advance(ServiceState::Running));
    }

    #[tokio::test]
    async fn test_wait_for_sees_clone_updates() {
        let state = StateTracker::new();
        let other = state.clone();
        let waiter = tokio::spawn(async move { other.wait_for(ServiceState::Stopped).await });
        state.advance(ServiceState::ShuttingDown);
        state.advance(ServiceState::Stopped);
        assert_eq!(waiter.await.unwrap(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn test_wait_for_target_already_passed() {
        let state = StateTracker::new();
        state.advance(ServiceState::Stopped);
        let reached = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            state.wait_for(ServiceState::Running),
        )
        .await
        .unwrap();
        assert_eq!(reached, ServiceState::Stopped);
    }
}
