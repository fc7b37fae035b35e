//! Percentage rollout bucketing.
//!
//! A user always lands in the same bucket for a given salt, so raising the
//! percentage only ever adds users.

use common::UserId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::order::CustomerIdentity;

/// Maps a user to a stable bucket in `0..100`.
pub fn bucket(user_id: UserId, salt: &str) -> u8 {
    let name = format!("{salt}:{user_id}");
    let digest = Uuid::new_v5(&user_id.as_uuid(), name.as_bytes());
    let (high, _) = digest.as_u64_pair();
    (high % 100) as u8
}

/// Enables a feature for a fixed share of authenticated users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutPolicy {
    pub salt: String,
    /// Share of users enabled, `0..=100`. Larger values act as 100.
    pub percentage: u8,
}

impl RolloutPolicy {
    pub fn new(salt: impl Into<String>, percentage: u8) -> Self {
        Self {
            salt: salt.into(),
            percentage: percentage.min(100),
        }
    }

    pub fn is_enabled_for(&self, user_id: UserId) -> bool {
        if self.percentage >= 100 {
            return true;
        }
        bucket(user_id, &self.salt) < self.percentage
    }

    /// Guests are never in a rollout.
    pub fn is_enabled(&self, identity: &CustomerIdentity) -> bool {
        identity
            .user_id()
            .is_some_and(|user_id| self.is_enabled_for(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_is_stable_and_in_range() {
        let user = UserId::new();
        let first = bucket(user, "salt");
        for _ in 0..10 {
            assert_eq!(bucket(user, "salt"), first);
        }
        assert!(first < 100);
    }

    #[test]
    fn test_bounds() {
        let user = UserId::new();
        assert!(!RolloutPolicy::new("s", 0).is_enabled_for(user));
        assert!(RolloutPolicy::new("s", 100).is_enabled_for(user));
        assert!(RolloutPolicy::new("s", 250).is_enabled_for(user));
    }

    #[test]
    fn test_growing_percentage_keeps_enabled_users() {
        let users: Vec<UserId> = (0..200).map(|_| UserId::new()).collect();
        let narrow = RolloutPolicy::new("card", 20);
        let wide = RolloutPolicy::new("card", 60);
        for user in users {
            if narrow.is_enabled_for(user) {
                assert!(wide.is_enabled_for(user));
            }
        }
    }

    #[test]
    fn test_roughly_proportional() {
        let policy = RolloutPolicy::new("card", 50);
        let enabled = (0..2000)
            .filter(|_| policy.is_enabled_for(UserId::new()))
            .count();
        assert!((700..1300).contains(&enabled), "enabled {enabled} of 2000");
    }

    #[test]
    fn test_guests_are_excluded() {
        let policy = RolloutPolicy::new("card", 100);
        let guest = CustomerIdentity::guest("Ann", "ann@example.com", "5551234567");
        assert!(!policy.is_enabled(&guest));
        assert!(policy.is_enabled(&CustomerIdentity::user(UserId::new())));
    }
}
