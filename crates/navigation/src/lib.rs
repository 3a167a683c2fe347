//! Shadow tracking of navigation history.
//!
//! The external navigation mechanism cannot be queried precisely on all
//! hosts, so the tracker keeps its own replica of the visited-token stack
//! and reconciles every externally observed location change against it.
//! The shadow stack is the single source of truth; the mechanism is only a
//! notification trigger and a way to move.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use shared::domain::{Direction, LocationToken};
use tracing::debug;
use uuid::Uuid;

/// Token occupying index 0 of every shadow stack, mapped to no item.
pub const ROOT_TOKEN: &str = "000000000000";

/// The external, unreliable history mechanism. Lost or duplicated change
/// notifications are tolerated by the tracker's reconciliation.
pub trait HistoryMechanism: Send + Sync {
    fn current_token(&self) -> Option<LocationToken>;
    fn navigate_to(&self, token: &LocationToken);
    fn back(&self);
    fn go(&self, delta: i64);
    /// Hosts where delegated back/go traversal is unreliable return false;
    /// the tracker then forces the shadow-computed target token itself.
    fn precise_traversal(&self) -> bool {
        true
    }
}

/// Null mechanism for hosts without history support.
pub struct MissingMechanism;

impl HistoryMechanism for MissingMechanism {
    fn current_token(&self) -> Option<LocationToken> {
        None
    }

    fn navigate_to(&self, _token: &LocationToken) {}

    fn back(&self) {}

    fn go(&self, _delta: i64) {}
}

/// One reconciled change event, raised per externally observed location
/// change that was not initiated by the tracker itself.
#[derive(Debug, Clone)]
pub struct HistoryChange<T> {
    pub direction: Direction,
    pub prev_item: Option<T>,
    pub new_item: Option<T>,
    pub new_token: LocationToken,
    /// True for changes arising from external history replay rather than a
    /// fresh programmatic show.
    pub from_history: bool,
}

struct TrackerState<T> {
    items: HashMap<LocationToken, Option<T>>,
    stack: Vec<LocationToken>,
    current_index: usize,
    current_token: LocationToken,
    /// Changes the tracker itself initiated and whose notifications must
    /// not reach the reconciliation path.
    self_initiated: u32,
}

impl<T> TrackerState<T> {
    fn seeded() -> Self {
        let root = LocationToken::from(ROOT_TOKEN);
        Self {
            items: HashMap::from([(root.clone(), None)]),
            stack: vec![root.clone()],
            current_index: 0,
            current_token: root,
            self_initiated: 0,
        }
    }
}

pub struct HistoryTracker<T> {
    mechanism: Arc<dyn HistoryMechanism>,
    inner: Mutex<TrackerState<T>>,
}

impl<T: Clone + Send> HistoryTracker<T> {
    pub fn new(mechanism: Arc<dyn HistoryMechanism>) -> Self {
        Self {
            mechanism,
            inner: Mutex::new(TrackerState::seeded()),
        }
    }

    /// Drops all recorded history and re-seeds the sentinel root.
    pub fn reset(&self) {
        *self.lock() = TrackerState::seeded();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState<T>> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Records a new current item, replacing any forward entries, and asks
    /// the mechanism to navigate to its token. The notification this
    /// triggers is suppressed from reconciliation.
    pub fn add(&self, item: T, token: Option<LocationToken>) -> LocationToken {
        let token =
            token.unwrap_or_else(|| LocationToken(Uuid::new_v4().simple().to_string()));
        {
            let mut state = self.lock();
            state.items.insert(token.clone(), Some(item));
            state.current_index += 1;
            let keep = state.current_index;
            state.stack.truncate(keep);
            state.stack.push(token.clone());
            state.current_token = token.clone();
            state.self_initiated += 1;
        }
        self.mechanism.navigate_to(&token);
        token
    }

    /// Reconciles an externally observed location change against the
    /// shadow stack.
    ///
    /// Returns `None` for self-initiated changes, duplicate notifications
    /// and arrivals at the sentinel root; otherwise classifies the
    /// direction, re-synchronizes the cursor (scanning the whole stack, so
    /// direct jumps are handled), records unknown tokens as fresh forward
    /// entries, and returns the single reconciled event.
    pub fn observe_location_change(&self) -> Option<HistoryChange<T>> {
        let new_token = self.mechanism.current_token()?;
        let mut state = self.lock();

        let prev_token = std::mem::replace(&mut state.current_token, new_token.clone());

        if state.self_initiated > 0 {
            state.self_initiated -= 1;
            return None;
        }

        let position = state.stack.iter().rposition(|token| *token == new_token);
        let direction = match position {
            Some(index) if state.current_index >= 1 && index == state.current_index - 1 => {
                Direction::Back
            }
            // A jump further back than one entry; the one-step heuristic
            // cannot prove a direction for it.
            Some(index) if index + 1 < state.current_index => Direction::Unknown,
            _ => Direction::Forward,
        };

        match position {
            Some(index) => state.current_index = index,
            None if new_token.as_str() != ROOT_TOKEN => {
                // The token could have come from anywhere; treat it as a
                // fresh forward entry.
                state.items.entry(new_token.clone()).or_insert(None);
                state.current_index += 1;
                let keep = state.current_index;
                state.stack.truncate(keep);
                state.stack.push(new_token.clone());
            }
            None => {}
        }

        if new_token.as_str() == ROOT_TOKEN || new_token == prev_token {
            return None;
        }

        debug!(
            token = %new_token,
            ?direction,
            index = state.current_index,
            "history change reconciled"
        );
        Some(HistoryChange {
            direction,
            prev_item: state.items.get(&prev_token).cloned().flatten(),
            new_item: state.items.get(&new_token).cloned().flatten(),
            new_token,
            from_history: true,
        })
    }

    /// Item at `delta` entries from the current position; `-1` is the
    /// previous entry. The sentinel root never yields an item.
    pub fn get_item(&self, delta: i64) -> Option<T> {
        let state = self.lock();
        let index = state.current_index as i64 + delta;
        if index > 0 && (index as usize) < state.stack.len() {
            state.items.get(&state.stack[index as usize]).cloned().flatten()
        } else {
            None
        }
    }

    /// Items from `start` up to, but not including, `end`. An `end <= 0`
    /// is relative to the current position: `0` excludes the current
    /// entry, `-1` includes it. The sentinel contributes a `None` entry
    /// when `start` is 0.
    pub fn get_items(&self, start: usize, end: i64) -> Vec<Option<T>> {
        let state = self.lock();
        let end = if end <= 0 {
            state.current_index as i64 - end
        } else {
            end
        };
        if end <= start as i64 {
            return Vec::new();
        }
        let end = (end as usize).min(state.stack.len());
        (start..end)
            .map(|index| state.items.get(&state.stack[index]).cloned().flatten())
            .collect()
    }

    pub fn current_index(&self) -> usize {
        self.lock().current_index
    }

    pub fn can_go_back(&self) -> bool {
        self.get_items(0, 0).len() > 1
    }

    /// Navigates to the previous entry. On hosts with unreliable delegated
    /// traversal the shadow-computed target token is forced directly; the
    /// reconciliation handler always runs afterwards to confirm
    /// convergence.
    pub fn back(&self) {
        let target = {
            let state = self.lock();
            if state.current_index == 0 {
                return;
            }
            state.stack.get(state.current_index - 1).cloned()
        };
        if self.mechanism.precise_traversal() {
            self.mechanism.back();
        } else if let Some(token) = target {
            self.mechanism.navigate_to(&token);
        }
    }

    /// Navigates `delta` entries through the history, clamped to the
    /// shadow stack on hosts with unreliable traversal.
    pub fn go(&self, delta: i64) {
        if self.mechanism.precise_traversal() {
            self.mechanism.go(delta);
            return;
        }
        let target = {
            let state = self.lock();
            let last = state.stack.len() as i64 - 1;
            let index = (state.current_index as i64 + delta).clamp(0, last.max(0));
            state.stack.get(index as usize).cloned()
        };
        if let Some(token) = target {
            self.mechanism.navigate_to(&token);
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
