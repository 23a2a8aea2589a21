use proccore::{InstanceId, NodeId};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::time::Instant;

/// Identity of one join barrier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BarrierKey {
    pub node_id: NodeId,
    pub instance_id: InstanceId,
    pub generation: u64,
}

/// Arrival counter at a parallel join
#[derive(Debug, Clone)]
pub struct JoinBarrier {
    expected: usize,
    arrived: BTreeSet<String>,
    first_arrival: Instant,
    released: bool,
}

impl JoinBarrier {
    fn new(expected: usize, now: Instant) -> Self {
        Self {
            expected,
            arrived: BTreeSet::new(),
            first_arrival: now,
            released: false,
        }
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn arrived(&self) -> usize {
        self.arrived.len()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn deadline(&self, timeout: Duration) -> Instant {
        self.first_arrival + timeout
    }
}

/// What a single arrival did to its barrier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arrival {
    Waiting { arrived: usize, expected: usize },
    Released { expected: usize },
    /// The arrival cannot be counted; the barrier is broken
    Overflow { reason: String },
}

/// Barriers of one instance
#[derive(Debug, Default)]
pub struct BarrierTable {
    barriers: HashMap<BarrierKey, JoinBarrier>,
}

impl BarrierTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an arrival via `flow_id`. `expected` is the join's distinct
    /// incoming flow count.
    pub fn arrive(&mut self, key: BarrierKey, flow_id: &str, expected: usize, now: Instant) -> Arrival {
        let barrier = self
            .barriers
            .entry(key)
            .or_insert_with(|| JoinBarrier::new(expected, now));

        if barrier.released {
            return Arrival::Overflow {
                reason: format!("arrival via '{}' after the barrier was released", flow_id),
            };
        }
        if !barrier.arrived.insert(flow_id.to_string()) {
            return Arrival::Overflow {
                reason: format!("second arrival via '{}'", flow_id),
            };
        }

        if barrier.arrived.len() >= barrier.expected {
            barrier.released = true;
            Arrival::Released {
                expected: barrier.expected,
            }
        } else {
            Arrival::Waiting {
                arrived: barrier.arrived.len(),
                expected: barrier.expected,
            }
        }
    }

    pub fn has_pending(&self) -> bool {
        self.barriers.values().any(|b| !b.released)
    }

    /// Unreleased barriers, in key order
    pub fn pending(&self) -> Vec<(&BarrierKey, &JoinBarrier)> {
        let mut pending: Vec<_> = self.barriers.iter().filter(|(_, b)| !b.released).collect();
        pending.sort_by(|a, b| a.0.cmp(b.0));
        pending
    }

    /// The pending barrier whose deadline comes first
    pub fn next_deadline(&self, timeout: Duration) -> Option<(BarrierKey, Instant)> {
        self.pending()
            .into_iter()
            .map(|(key, barrier)| (key.clone(), barrier.deadline(timeout)))
            .min_by_key(|(_, deadline)| *deadline)
    }

    /// A pending barrier whose deadline has passed
    pub fn expired(&self, timeout: Duration, now: Instant) -> Option<BarrierKey> {
        self.next_deadline(timeout)
            .filter(|(_, deadline)| *deadline <= now)
            .map(|(key, _)| key)
    }

    pub fn get(&self, key: &BarrierKey) -> Option<&JoinBarrier> {
        self.barriers.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn key(generation: u64) -> BarrierKey {
        BarrierKey {
            node_id: "join".to_string(),
            instance_id: Uuid::nil(),
            generation,
        }
    }

    #[test]
    fn test_releases_once_every_flow_arrived() {
        let mut table = BarrierTable::new();
        let now = Instant::now();

        assert_eq!(table.arrive(key(1), "b", 3, now), Arrival::Waiting { arrived: 1, expected: 3 });
        assert_eq!(table.arrive(key(1), "a", 3, now), Arrival::Waiting { arrived: 2, expected: 3 });
        assert!(table.has_pending());
        assert_eq!(table.arrive(key(1), "c", 3, now), Arrival::Released { expected: 3 });
        assert!(!table.has_pending());
    }

    #[test]
    fn test_generations_are_independent() {
        let mut table = BarrierTable::new();
        let now = Instant::now();
        table.arrive(key(1), "a", 2, now);
        assert_eq!(table.arrive(key(2), "a", 2, now), Arrival::Waiting { arrived: 1, expected: 2 });
        assert_eq!(table.pending().len(), 2);
    }

    #[test]
    fn test_duplicate_and_late_arrivals_overflow() {
        let mut table = BarrierTable::new();
        let now = Instant::now();
        table.arrive(key(1), "a", 2, now);
        assert!(matches!(table.arrive(key(1), "a", 2, now), Arrival::Overflow { .. }));

        table.arrive(key(1), "b", 2, now);
        assert!(matches!(table.arrive(key(1), "b", 2, now), Arrival::Overflow { .. }));
    }

    #[test]
    fn test_deadlines() {
        let mut table = BarrierTable::new();
        let start = Instant::now();
        let timeout = Duration::from_millis(50);
        table.arrive(key(2), "a", 2, start + Duration::from_millis(10));
        table.arrive(key(1), "a", 2, start);

        let (first, deadline) = table.next_deadline(timeout).unwrap();
        assert_eq!(first, key(1));
        assert_eq!(deadline, start + timeout);
        assert_eq!(table.expired(timeout, start + Duration::from_millis(20)), None);
        assert_eq!(table.expired(timeout, start + Duration::from_millis(55)), Some(key(1)));
    }
}
