/// Conflict resolution policies for concurrent operations on the same target
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::Operation;

/// Which of two concurrent operations prevails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Winner {
    First,
    Second,
}

/// Deterministic total order between two operations, independent of arrival
/// order: client id, then user id, then operation id.
pub fn precedence(a: &Operation, b: &Operation) -> Ordering {
    (&a.client_id, &a.user_id, a.id).cmp(&(&b.client_id, &b.user_id, b.id))
}

/// Whether `a` goes first when both target the same position
pub fn precedes(a: &Operation, b: &Operation) -> bool {
    precedence(a, b) == Ordering::Less
}

/// Later timestamp wins; equal timestamps fall back to precedence (the later
/// operation in precedence order wins).
pub fn last_writer_wins(a: &Operation, b: &Operation) -> Winner {
    match a.timestamp.cmp(&b.timestamp) {
        Ordering::Greater => Winner::First,
        Ordering::Less => Winner::Second,
        Ordering::Equal if precedes(a, b) => Winner::Second,
        Ordering::Equal => Winner::First,
    }
}

/// Earlier timestamp wins; equal timestamps fall back to precedence.
pub fn first_writer_wins(a: &Operation, b: &Operation) -> Winner {
    match a.timestamp.cmp(&b.timestamp) {
        Ordering::Less => Winner::First,
        Ordering::Greater => Winner::Second,
        Ordering::Equal if precedes(a, b) => Winner::First,
        Ordering::Equal => Winner::Second,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn op_at(user: &str, millis: i64) -> Operation {
        Operation::retain(user).with_timestamp(Utc.timestamp_millis_opt(millis).unwrap())
    }

    #[test]
    fn test_last_writer_wins() {
        let a = op_at("alice", 100);
        let b = op_at("bob", 200);
        assert_eq!(last_writer_wins(&a, &b), Winner::Second);
        assert_eq!(last_writer_wins(&b, &a), Winner::First);
    }

    #[test]
    fn test_first_writer_wins() {
        let a = op_at("alice", 100);
        let b = op_at("bob", 200);
        assert_eq!(first_writer_wins(&a, &b), Winner::First);
        assert_eq!(first_writer_wins(&b, &a), Winner::Second);
    }

    #[test]
    fn test_ties_are_antisymmetric() {
        let a = op_at("alice", 100);
        let b = op_at("bob", 100);

        assert!(precedes(&a, &b));
        assert!(!precedes(&b, &a));

        // Both argument orders agree on the same operation
        assert_eq!(last_writer_wins(&a, &b), Winner::Second);
        assert_eq!(last_writer_wins(&b, &a), Winner::First);
        assert_eq!(first_writer_wins(&a, &b), Winner::First);
        assert_eq!(first_writer_wins(&b, &a), Winner::Second);
    }

    #[test]
    fn test_client_id_orders_before_user_id() {
        let a = op_at("zed", 0).with_client("a-tab");
        let b = op_at("amy", 0).with_client("b-tab");
        assert!(precedes(&a, &b));
    }
}
