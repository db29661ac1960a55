//! Bounded per-session conversation windows
//!
//! Each session keeps at most `capacity` turns; appending to a full window
//! evicts the oldest turn. Reads never create a session.

use std::collections::VecDeque;

use dashmap::DashMap;

use crate::message::{Role, Turn};

/// Process-local store of short-term dialogue, keyed by session id
pub struct ConversationWindow {
    sessions: DashMap<String, VecDeque<Turn>>,
    capacity: usize,
}

impl ConversationWindow {
    /// Create a window store holding at most `capacity` turns per session
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append a turn, evicting the oldest when the session is full
    pub fn append(&self, session_id: &str, role: Role, content: impl Into<String>) {
        self.push(session_id, Turn::new(role, content));
    }

    /// Append an already-built turn
    pub fn push(&self, session_id: &str, turn: Turn) {
        // The entry guard holds the shard lock across evict + push
        let mut turns = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));
        if turns.len() == self.capacity {
            turns.pop_front();
        }
        turns.push_back(turn);
    }

    /// Install `turn` only if the session has no turns yet.
    ///
    /// Returns true when the turn was installed.
    pub fn seed(&self, session_id: &str, turn: Turn) -> bool {
        let mut turns = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));
        if !turns.is_empty() {
            return false;
        }
        turns.push_back(turn);
        true
    }

    /// Full ordered history; empty for unknown sessions
    pub fn history(&self, session_id: &str) -> Vec<Turn> {
        self.sessions
            .get(session_id)
            .map(|turns| turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of turns currently held for a session
    pub fn len(&self, session_id: &str) -> usize {
        self.sessions.get(session_id).map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, session_id: &str) -> bool {
        self.len(session_id) == 0
    }

    /// Drop all short-term state for a session. No-op for unknown sessions.
    pub fn reset(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn keeps_most_recent_turns_in_order() {
        let window = ConversationWindow::new(3);
        window.append("s1", Role::User, "u1");
        window.append("s1", Role::Assistant, "a1");
        window.append("s1", Role::User, "u2");
        window.append("s1", Role::Assistant, "a2");
        window.append("s1", Role::User, "u3");

        let history = window.history("s1");
        assert_eq!(
            history,
            vec![
                Turn::user("u2"),
                Turn::assistant("a2"),
                Turn::user("u3"),
            ]
        );
    }

    #[test]
    fn never_exceeds_capacity() {
        let window = ConversationWindow::new(20);
        for i in 0..57 {
            window.append("s", Role::User, format!("m{}", i));
            assert!(window.len("s") <= 20);
        }
        let history = window.history("s");
        assert_eq!(history.len(), 20);
        assert_eq!(history[0].content, "m37");
        assert_eq!(history[19].content, "m56");
    }

    #[test]
    fn unknown_session_reads_empty_without_creating() {
        let window = ConversationWindow::new(5);
        assert!(window.history("ghost").is_empty());
        assert_eq!(window.session_count(), 0);
    }

    #[test]
    fn reset_is_idempotent() {
        let window = ConversationWindow::new(5);
        window.append("s", Role::User, "hi");
        window.reset("s");
        assert!(window.history("s").is_empty());
        window.reset("s");
        window.reset("never-existed");
        assert_eq!(window.session_count(), 0);
    }

    #[test]
    fn seed_only_installs_into_empty_session() {
        let window = ConversationWindow::new(5);
        assert!(window.seed("s", Turn::system("first")));
        assert!(!window.seed("s", Turn::system("second")));
        assert_eq!(window.history("s"), vec![Turn::system("first")]);
    }

    #[test]
    fn sessions_are_isolated() {
        let window = ConversationWindow::new(2);
        window.append("a", Role::User, "for a");
        window.append("b", Role::User, "for b");
        window.reset("a");
        assert_eq!(window.history("b"), vec![Turn::user("for b")]);
    }

    #[test]
    fn concurrent_appends_are_not_lost() {
        let window = Arc::new(ConversationWindow::new(1000));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let window = window.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        window.append("shared", Role::User, format!("{}-{}", t, i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(window.len("shared"), 800);
    }
}
