use crate::coordinator::error::{CoordinatorError, CoordinatorResult};
use crate::coordinator::types::{StateEvent, UploadState};
use tokio::sync::watch;

/// Lifecycle of one file upload.
///
/// Backed by a `watch` channel so observers can wait for a state without polling.
pub struct UploadStateMachine {
    state: watch::Sender<UploadState>,
}

impl Default for UploadStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadStateMachine {
    pub fn new() -> Self {
        let (state, _) = watch::channel(UploadState::Idle);
        Self { state }
    }

    /// Get current state
    pub fn current_state(&self) -> UploadState {
        self.state.borrow().clone()
    }

    /// Transition state based on event
    pub fn transition(&self, event: StateEvent) -> CoordinatorResult<UploadState> {
        let mut result = Err(CoordinatorError::InvalidStateTransition(String::new()));

        self.state.send_if_modified(|state| match next_state(state, &event) {
            Some(new_state) => {
                *state = new_state.clone();
                result = Ok(new_state);
                true
            }
            None => {
                result = Err(CoordinatorError::InvalidStateTransition(format!(
                    "Cannot handle {event:?} in state {state:?}"
                )));
                false
            }
        });

        result
    }

    /// Wait until the upload reaches a terminal state.
    pub async fn wait_terminal(&self) -> UploadState {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let state = match rx.wait_for(UploadState::is_terminal).await {
            Ok(state) => state.clone(),
            Err(_) => self.current_state(),
        };
        state
    }
}

fn next_state(state: &UploadState, event: &StateEvent) -> Option<UploadState> {
    let next = match (state, event) {
        (UploadState::Idle, StateEvent::Start) => UploadState::Resolving,

        // User-initiated restart of the same upload id
        (UploadState::Failed { .. } | UploadState::Cancelled, StateEvent::Restart) => {
            UploadState::Resolving
        }

        (UploadState::Resolving, StateEvent::Resolved) => UploadState::Transferring,

        (UploadState::Transferring, StateEvent::AllChunksSent) => UploadState::Merging,

        (UploadState::Merging, StateEvent::MergeSucceeded { url }) => {
            UploadState::Completed { url: url.clone() }
        }

        (
            UploadState::Resolving | UploadState::Transferring | UploadState::Merging,
            StateEvent::Fail { error },
        ) => UploadState::Failed {
            error: error.clone(),
        },

        (
            UploadState::Idle
            | UploadState::Resolving
            | UploadState::Transferring
            | UploadState::Merging,
            StateEvent::Cancel,
        ) => UploadState::Cancelled,

        _ => return None,
    };
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn to_merging(sm: &UploadStateMachine) {
        sm.transition(StateEvent::Start).unwrap();
        sm.transition(StateEvent::Resolved).unwrap();
        sm.transition(StateEvent::AllChunksSent).unwrap();
    }

    #[test]
    fn test_state_machine_creation() {
        let sm = UploadStateMachine::new();
        assert_eq!(sm.current_state(), UploadState::Idle);
    }

    #[test]
    fn test_happy_path() {
        let sm = UploadStateMachine::new();
        assert_eq!(sm.transition(StateEvent::Start).unwrap(), UploadState::Resolving);
        assert_eq!(
            sm.transition(StateEvent::Resolved).unwrap(),
            UploadState::Transferring
        );
        assert_eq!(
            sm.transition(StateEvent::AllChunksSent).unwrap(),
            UploadState::Merging
        );
        let done = sm
            .transition(StateEvent::MergeSucceeded {
                url: "http://x/files/a".into(),
            })
            .unwrap();
        assert_eq!(
            done,
            UploadState::Completed {
                url: "http://x/files/a".into()
            }
        );
        assert!(done.is_terminal());
    }

    #[test]
    fn test_cannot_merge_before_all_chunks_sent() {
        let sm = UploadStateMachine::new();
        sm.transition(StateEvent::Start).unwrap();
        sm.transition(StateEvent::Resolved).unwrap();

        let result = sm.transition(StateEvent::MergeSucceeded { url: "u".into() });
        assert!(result.is_err());
        assert_eq!(sm.current_state(), UploadState::Transferring);
    }

    #[test]
    fn test_fail_and_restart() {
        let sm = UploadStateMachine::new();
        to_merging(&sm);
        sm.transition(StateEvent::Fail {
            error: "merge failed".into(),
        })
        .unwrap();
        assert!(sm.current_state().can_restart());

        assert_eq!(sm.transition(StateEvent::Restart).unwrap(), UploadState::Resolving);
    }

    #[test]
    fn test_cancel_from_any_non_terminal_state() {
        for steps in 0..4 {
            let sm = UploadStateMachine::new();
            let events = [StateEvent::Start, StateEvent::Resolved, StateEvent::AllChunksSent];
            for event in events.into_iter().take(steps) {
                sm.transition(event).unwrap();
            }
            assert_eq!(sm.transition(StateEvent::Cancel).unwrap(), UploadState::Cancelled);
        }
    }

    #[test]
    fn test_terminal_states_reject_events() {
        let sm = UploadStateMachine::new();
        to_merging(&sm);
        sm.transition(StateEvent::MergeSucceeded { url: "u".into() })
            .unwrap();

        assert!(sm.transition(StateEvent::Cancel).is_err());
        assert!(sm.transition(StateEvent::Restart).is_err());
        assert!(sm
            .transition(StateEvent::Fail {
                error: "late".into()
            })
            .is_err());
    }

    #[test]
    fn test_invalid_transition() {
        let sm = UploadStateMachine::new();
        // Cannot resolve from Idle
        assert!(sm.transition(StateEvent::Resolved).is_err());
        assert!(sm.transition(StateEvent::Restart).is_err());
    }

    #[tokio::test]
    async fn test_wait_terminal() {
        let sm = std::sync::Arc::new(UploadStateMachine::new());
        sm.transition(StateEvent::Start).unwrap();

        let waiter = {
            let sm = sm.clone();
            tokio::spawn(async move { sm.wait_terminal().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        sm.transition(StateEvent::Cancel).unwrap();

        let state = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state, UploadState::Cancelled);
    }
}
