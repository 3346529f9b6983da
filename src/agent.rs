//! User-agent selection with a sticky-until-failure retry policy.
//!
//! Each target remembers the last agent that navigated it
//! successfully and keeps using it; a navigation failure or a
//! detected access-denial clears that memory, forcing a fresh random
//! pick on the next attempt. The store is owned by the engine
//! instance, so several engines can coexist in one process.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// The configured agent pool. Read-only after configuration load.
#[derive(Debug, Clone)]
pub struct AgentPool {
    agents: Vec<String>,
}

impl AgentPool {
    pub fn new(agents: Vec<String>) -> Self {
        debug_assert!(!agents.is_empty());
        Self { agents }
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Shuffle-then-pick, reseeded from the wall clock on every call
    /// so repeated attempts do not replay one sequence.
    fn pick(&self) -> String {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as u64
            ^ SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut shuffled = self.agents.clone();
        shuffled.shuffle(&mut rng);
        let index = rng.gen_range(0..shuffled.len());
        shuffled[index].clone()
    }
}

/// Per-target agent state: what was picked for the current attempt
/// and what last worked.
#[derive(Debug, Default, Clone)]
struct AgentState {
    selected: Option<String>,
    working: Option<String>,
}

/// Tracks selected and working agents per target URL.
///
/// Targets run strictly sequentially within a cycle, so a target's
/// state is only ever touched while its own pipeline is active and no
/// locking is needed.
#[derive(Debug, Default)]
pub struct SessionStore {
    pool: AgentPool,
    states: HashMap<String, AgentState>,
}

impl Default for AgentPool {
    fn default() -> Self {
        Self {
            agents: vec![crate::config::DEFAULT_USER_AGENT.to_string()],
        }
    }
}

impl SessionStore {
    pub fn new(pool: AgentPool) -> Self {
        Self {
            pool,
            states: HashMap::new(),
        }
    }

    /// Agent for the next attempt against `url`: the working agent if
    /// one is recorded, else a fresh random selection (recorded as
    /// selected-but-unconfirmed).
    pub fn select(&mut self, url: &str) -> String {
        let state = self.states.entry(url.to_string()).or_default();
        if let Some(working) = &state.working {
            tracing::info!(
                "last working agent was [{working}] for URL [{url}], so will continue using it"
            );
            return working.clone();
        }
        let agent = self.pool.pick();
        tracing::info!(
            "no working agent for URL [{url}], so using selected user-agent [{agent}] for this attempt"
        );
        state.selected = Some(agent.clone());
        agent
    }

    /// Navigation succeeded: promote the selected agent to working if
    /// none is confirmed yet.
    pub fn confirm(&mut self, url: &str) {
        let state = self.states.entry(url.to_string()).or_default();
        if state.working.is_none() {
            if let Some(selected) = &state.selected {
                tracing::info!(
                    "user-agent [{selected}] for URL [{url}] succeeded, so it will be set as the current working agent"
                );
                state.working = Some(selected.clone());
            }
        }
    }

    /// Navigation failed or access was denied: clear the working
    /// agent so the next attempt rotates.
    pub fn invalidate(&mut self, url: &str) {
        if let Some(state) = self.states.get_mut(url) {
            if let Some(working) = state.working.take() {
                tracing::warn!(
                    "user-agent [{working}] for URL [{url}] no longer working, will try a different one on the next request"
                );
            }
        }
    }

    /// The confirmed working agent for `url`, if any.
    pub fn working(&self, url: &str) -> Option<&str> {
        self.states.get(url).and_then(|s| s.working.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(n: usize) -> AgentPool {
        AgentPool::new((0..n).map(|i| format!("agent-{i}")).collect())
    }

    #[test]
    fn test_select_is_sticky_after_success() {
        let mut store = SessionStore::new(pool(8));
        let first = store.select("http://x");
        store.confirm("http://x");
        // A confirmed agent is reused on every following attempt
        for _ in 0..10 {
            assert_eq!(store.select("http://x"), first);
        }
    }

    #[test]
    fn test_unconfirmed_selection_is_not_sticky() {
        let mut store = SessionStore::new(pool(1));
        let a = store.select("http://x");
        // No confirm — working stays unset, selection repeats the pick path
        assert!(store.working("http://x").is_none());
        assert_eq!(store.select("http://x"), a); // pool of one
    }

    #[test]
    fn test_invalidate_forces_rotation() {
        let mut store = SessionStore::new(pool(64));
        let first = store.select("http://x");
        store.confirm("http://x");
        store.invalidate("http://x");
        assert!(store.working("http://x").is_none());

        // With a 64-agent pool a repeat pick is possible but a run of
        // ten repeats is (1/64)^10 — treat that as rotation failure.
        let rotated = (0..10).any(|_| store.select("http://x") != first);
        assert!(rotated, "invalidated target should rotate to a new agent");
    }

    #[test]
    fn test_targets_are_independent() {
        let mut store = SessionStore::new(pool(4));
        store.select("http://a");
        store.confirm("http://a");
        store.select("http://b");
        store.invalidate("http://a");
        // Invalidation of one target never touches another
        assert!(store.working("http://a").is_none());
        store.confirm("http://b");
        assert!(store.working("http://b").is_some());
    }
}
