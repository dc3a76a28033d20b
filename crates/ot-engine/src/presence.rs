/// User presence tracking for collaborative documents
/// Records who is attached to a document and how far each user has caught up
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{Revision, UserId};

/// One attached user's state in a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserState {
    pub user_id: UserId,

    /// Last revision the user is known to have observed
    pub revision: Revision,

    pub joined_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl UserState {
    pub fn new(user_id: UserId, revision: Revision) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            revision,
            joined_at: now,
            last_seen: now,
        }
    }

    /// Update last activity timestamp
    pub fn touch(&mut self) {
        self.last_seen = Utc::now();
    }
}

/// Presence tracker for a single document
#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    users: HashMap<UserId, UserState>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self {
            users: HashMap::new(),
        }
    }

    /// Attach a user at `revision`. Returns `false` if the user was already
    /// attached, in which case their recorded revision is kept.
    pub fn join(&mut self, user_id: &UserId, revision: Revision) -> bool {
        match self.users.get_mut(user_id) {
            Some(state) => {
                state.touch();
                false
            }
            None => {
                self.users
                    .insert(user_id.clone(), UserState::new(user_id.clone(), revision));
                true
            }
        }
    }

    /// Remove user
    pub fn leave(&mut self, user_id: &UserId) -> Option<UserState> {
        self.users.remove(user_id)
    }

    pub fn get(&self, user_id: &UserId) -> Option<&UserState> {
        self.users.get(user_id)
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        self.users.contains_key(user_id)
    }

    /// Record that an attached user has observed `revision`. Revisions never
    /// move backwards; unknown users are ignored.
    pub fn observe(&mut self, user_id: &UserId, revision: Revision) {
        if let Some(state) = self.users.get_mut(user_id) {
            state.revision = state.revision.max(revision);
            state.touch();
        }
    }

    /// Oldest revision any attached user still depends on
    pub fn min_revision(&self) -> Option<Revision> {
        self.users.values().map(|state| state.revision).min()
    }

    /// Attached user ids, sorted for stable output
    pub fn active_users(&self) -> Vec<UserId> {
        let mut users: Vec<_> = self.users.keys().cloned().collect();
        users.sort();
        users
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_tracker() {
        let mut tracker = PresenceTracker::new();
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");

        assert!(tracker.join(&bob, 3));
        assert!(tracker.join(&alice, 5));
        assert_eq!(tracker.active_users(), vec![alice.clone(), bob.clone()]);
        assert_eq!(tracker.min_revision(), Some(3));

        tracker.observe(&bob, 7);
        assert_eq!(tracker.get(&bob).unwrap().revision, 7);
        assert_eq!(tracker.min_revision(), Some(5));

        assert!(tracker.leave(&alice).is_some());
        assert!(tracker.leave(&alice).is_none());
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_rejoin_keeps_revision() {
        let mut tracker = PresenceTracker::new();
        let alice = UserId::from("alice");

        assert!(tracker.join(&alice, 2));
        assert!(!tracker.join(&alice, 10));
        assert_eq!(tracker.get(&alice).unwrap().revision, 2);
    }

    #[test]
    fn test_observe_never_moves_backwards() {
        let mut tracker = PresenceTracker::new();
        let alice = UserId::from("alice");
        tracker.join(&alice, 8);
        tracker.observe(&alice, 4);
        assert_eq!(tracker.get(&alice).unwrap().revision, 8);

        // Unknown user is ignored
        tracker.observe(&UserId::from("ghost"), 1);
        assert!(!tracker.contains(&UserId::from("ghost")));
        assert!(tracker.min_revision().is_some());
    }
}
