//! Table-driven state machine
//!
//! Lifecycle bugs fail fast here: every machine is an explicit set of states
//! plus an allow-list of transitions. Asking for an edge that is not in the
//! table returns an [`InvalidTransition`] error instead of silently bending
//! the lifecycle.
//!
//! The machine itself is not synchronized; owners guard it with their own
//! lock alongside the rest of their state.

use crate::error::InvalidTransition;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

/// One recorded transition: when, from, to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition<S> {
    /// When the transition was applied
    pub at: DateTime<Utc>,
    /// State before
    pub from: S,
    /// State after
    pub to: S,
}

/// A state machine over an enum of states with a fixed transition table
///
/// # Example
///
/// ```
/// use virta_pipeline::fsm::StateMachine;
///
/// #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// enum Gate { Closed, Open }
///
/// let mut machine = StateMachine::new(
///     "gate",
///     Gate::Closed,
///     &[(Gate::Closed, &[Gate::Open]), (Gate::Open, &[Gate::Closed])],
/// );
///
/// machine.transition(Gate::Open).unwrap();
/// assert_eq!(machine.state(), Gate::Open);
/// ```
pub struct StateMachine<S> {
    name: &'static str,
    current: S,
    table: HashMap<S, Vec<S>>,
    history: Vec<Transition<S>>,
    transition_count: u64,
}

impl<S> StateMachine<S>
where
    S: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static,
{
    /// Create a machine in `initial` with the given transition table
    ///
    /// The table lists, for each state, the states reachable from it.
    /// States absent from the table have no outgoing edges.
    pub fn new(name: &'static str, initial: S, table: &[(S, &[S])]) -> Self {
        Self {
            name,
            current: initial,
            table: table
                .iter()
                .map(|(from, tos)| (*from, tos.to_vec()))
                .collect(),
            history: Vec::new(),
            transition_count: 0,
        }
    }

    /// The machine's name, used in errors and logs
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Current state
    pub fn state(&self) -> S {
        self.current
    }

    /// Whether `to` is reachable from the current state
    ///
    /// Self-transitions are always allowed (they apply as no-ops).
    pub fn can_transition(&self, to: S) -> bool {
        to == self.current
            || self
                .table
                .get(&self.current)
                .is_some_and(|tos| tos.contains(&to))
    }

    /// Move to `to` if the edge is in the table
    ///
    /// A self-transition succeeds as a no-op without touching the history.
    /// An edge outside the table fails with [`InvalidTransition`] and leaves
    /// the state unchanged.
    pub fn transition(&mut self, to: S) -> Result<(), InvalidTransition> {
        if to == self.current {
            return Ok(());
        }
        if !self.can_transition(to) {
            return Err(InvalidTransition {
                machine: self.name,
                from: format!("{:?}", self.current),
                to: format!("{:?}", to),
            });
        }
        self.apply(to);
        Ok(())
    }

    /// Move to `to` regardless of the table
    ///
    /// For recovery paths that deliberately step outside the normal
    /// lifecycle. The transition is still recorded in the history.
    pub fn force_transition(&mut self, to: S) {
        if to == self.current {
            return;
        }
        tracing::warn!(
            machine = self.name,
            from = ?self.current,
            to = ?to,
            "forced state transition"
        );
        self.apply(to);
    }

    fn apply(&mut self, to: S) {
        let from = self.current;
        self.current = to;
        self.transition_count += 1;
        self.history.push(Transition {
            at: Utc::now(),
            from,
            to,
        });
        tracing::debug!(machine = self.name, from = ?from, to = ?to, "state transition");
    }

    /// Append-only transition history
    pub fn history(&self) -> &[Transition<S>] {
        &self.history
    }

    /// Number of applied transitions (no-ops excluded)
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }
}
