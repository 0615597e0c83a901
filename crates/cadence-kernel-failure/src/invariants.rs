//! Runtime invariant assertions.
//!
//! Every assertion returns an [`InvariantError`] whose `failure` is an
//! `INVARIANT_BREACH` event ready for [`crate::FailureHandler::handle`].

use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use cadence_kernel_memory::EphemeralStore;
use cadence_types::{AgentId, AgentState, FailureClass, FailureEvent};

pub const SINGLE_TICK: &str = "SINGLE_TICK";
pub const NOT_TERMINATED: &str = "NOT_TERMINATED";
pub const STEP_BOUND: &str = "STEP_BOUND";
pub const NOT_SERIALIZABLE: &str = "NOT_SERIALIZABLE";
pub const EPHEMERAL_LEAK: &str = "EPHEMERAL_LEAK";

#[derive(Error, Debug, Clone, PartialEq)]
#[error("INVARIANT_BREACH [{}]: {}", .failure.code, .failure.message)]
pub struct InvariantError {
    pub failure: FailureEvent,
}

impl InvariantError {
    pub fn new(
        agent: &AgentId,
        tick_seq: u64,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            failure: FailureEvent::new(
                agent.clone(),
                tick_seq,
                FailureClass::InvariantBreach,
                code,
                message,
            ),
        }
    }

    pub fn code(&self) -> &str {
        &self.failure.code
    }
}

/// Fail with `code` unless `condition` holds.
pub fn ensure(
    condition: bool,
    agent: &AgentId,
    tick_seq: u64,
    code: &str,
    message: impl FnOnce() -> String,
) -> Result<(), InvariantError> {
    if condition {
        Ok(())
    } else {
        Err(InvariantError::new(agent, tick_seq, code, message()))
    }
}

/// At most one tick loop per agent at a time.
pub fn assert_single_tick(
    agent: &AgentId,
    tick_seq: u64,
    already_running: bool,
) -> Result<(), InvariantError> {
    ensure(!already_running, agent, tick_seq, SINGLE_TICK, || {
        format!("agent {agent} already has a tick in flight")
    })
}

pub fn assert_not_terminated(
    agent: &AgentId,
    tick_seq: u64,
    state: AgentState,
) -> Result<(), InvariantError> {
    ensure(!state.is_terminal(), agent, tick_seq, NOT_TERMINATED, || {
        format!("agent {agent} is TERMINATED and cannot run")
    })
    .map_err(|mut e| {
        e.failure.context = json!({ "state": state });
        e
    })
}

pub fn assert_step_bound(
    agent: &AgentId,
    tick_seq: u64,
    steps: u64,
    max_steps: u64,
) -> Result<(), InvariantError> {
    ensure(steps <= max_steps, agent, tick_seq, STEP_BOUND, || {
        format!("tick used {steps} steps, bound is {max_steps}")
    })
}

pub fn assert_serializable<T: Serialize + ?Sized>(
    agent: &AgentId,
    tick_seq: u64,
    key: &str,
    value: &T,
) -> Result<(), InvariantError> {
    match serde_json::to_value(value) {
        Ok(_) => Ok(()),
        Err(e) => Err(InvariantError::new(
            agent,
            tick_seq,
            NOT_SERIALIZABLE,
            format!("value for {key} is not JSON serializable: {e}"),
        )),
    }
}

/// The ephemeral scope of a finished tick must be gone.
pub fn assert_ephemeral_released(
    agent: &AgentId,
    tick_seq: u64,
    store: &EphemeralStore,
) -> Result<(), InvariantError> {
    ensure(!store.is_active(agent, tick_seq), agent, tick_seq, EPHEMERAL_LEAK, || {
        format!("ephemeral scope {agent}:{tick_seq} outlived its tick")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn agent() -> AgentId {
        AgentId::from("a")
    }

    #[test]
    fn passing_assertions() {
        let a = agent();
        assert!(assert_single_tick(&a, 1, false).is_ok());
        assert!(assert_not_terminated(&a, 1, AgentState::Active).is_ok());
        assert!(assert_step_bound(&a, 1, 100, 100).is_ok());
        assert!(assert_serializable(&a, 1, "k", &vec![1, 2]).is_ok());
        assert!(assert_ephemeral_released(&a, 1, &EphemeralStore::new()).is_ok());
    }

    #[test]
    fn failures_are_invariant_breaches() {
        let a = agent();
        let err = assert_single_tick(&a, 4, true).unwrap_err();
        assert_eq!(err.code(), SINGLE_TICK);
        assert_eq!(err.failure.class, FailureClass::InvariantBreach);
        assert_eq!(err.failure.tick_seq, 4);
        assert!(err.to_string().starts_with("INVARIANT_BREACH [SINGLE_TICK]"));

        let err = assert_not_terminated(&a, 1, AgentState::Terminated).unwrap_err();
        assert_eq!(err.failure.context["state"], "TERMINATED");

        assert_eq!(assert_step_bound(&a, 1, 101, 100).unwrap_err().code(), STEP_BOUND);
    }

    #[test]
    fn non_string_map_keys_are_not_serializable() {
        let mut bad = HashMap::new();
        bad.insert((1u8, 2u8), 3);
        let err = assert_serializable(&agent(), 2, "pair", &bad).unwrap_err();
        assert_eq!(err.code(), NOT_SERIALIZABLE);
    }

    #[test]
    fn live_scope_is_a_leak() {
        let store = EphemeralStore::new();
        let a = agent();
        store.init(&a, 9).unwrap();
        assert_eq!(
            assert_ephemeral_released(&a, 9, &store).unwrap_err().code(),
            EPHEMERAL_LEAK
        );
        store.destroy(&a, 9).unwrap();
        assert!(assert_ephemeral_released(&a, 9, &store).is_ok());
    }
}
