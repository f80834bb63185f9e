//! Process-wide health signals: lifecycle state and consumer partition progress.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Starting = 0,
    Running = 1,
    Draining = 2,
    Stopped = 3,
}

impl From<u8> for LifecycleState {
    fn from(value: u8) -> Self {
        match value {
            0 => LifecycleState::Starting,
            1 => LifecycleState::Running,
            2 => LifecycleState::Draining,
            _ => LifecycleState::Stopped,
        }
    }
}

#[derive(Clone, Debug, Default)]
struct PartitionProgress {
    in_flight: Option<(u64, Instant)>,
    last_committed: Option<u64>,
    processed: u64,
    dead_lettered: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct PartitionSnapshot {
    pub partition: u32,
    pub in_flight_offset: Option<u64>,
    pub in_flight_ms: Option<u64>,
    pub last_committed: Option<u64>,
    pub processed: u64,
    pub dead_lettered: u64,
    pub stalled: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthSnapshot {
    pub state: LifecycleState,
    pub live: bool,
    pub ready: bool,
    pub stalled_partitions: Vec<u32>,
    pub partitions: Vec<PartitionSnapshot>,
}

pub struct Health {
    state: AtomicU8,
    partitions: DashMap<u32, PartitionProgress>,
    stall_threshold: Duration,
}

impl Health {
    pub fn new(stall_threshold: Duration) -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Starting as u8),
            partitions: DashMap::new(),
            stall_threshold,
        }
    }

    pub fn set_state(&self, state: LifecycleState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from(self.state.load(Ordering::SeqCst))
    }

    /// A consumer worker picked up `offset` on `partition`.
    pub fn begin(&self, partition: u32, offset: u64) {
        self.partitions.entry(partition).or_default().in_flight = Some((offset, Instant::now()));
    }

    /// A consumer worker committed `offset` on `partition`.
    pub fn finish(&self, partition: u32, offset: u64, dead_lettered: bool) {
        let mut progress = self.partitions.entry(partition).or_default();
        progress.in_flight = None;
        progress.last_committed = Some(offset);
        progress.processed += 1;
        if dead_lettered {
            progress.dead_lettered += 1;
        }
    }

    /// Partitions holding an event for longer than the stall threshold.
    pub fn stalled_partitions(&self) -> Vec<u32> {
        let mut stalled: Vec<u32> = self
            .partitions
            .iter()
            .filter(|entry| self.is_stalled(entry.value()))
            .map(|entry| *entry.key())
            .collect();
        stalled.sort_unstable();
        stalled
    }

    pub fn is_live(&self) -> bool {
        self.state() != LifecycleState::Stopped && self.stalled_partitions().is_empty()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == LifecycleState::Running && self.stalled_partitions().is_empty()
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let mut partitions: Vec<PartitionSnapshot> = self
            .partitions
            .iter()
            .map(|entry| {
                let progress = entry.value();
                PartitionSnapshot {
                    partition: *entry.key(),
                    in_flight_offset: progress.in_flight.map(|(offset, _)| offset),
                    in_flight_ms: progress
                        .in_flight
                        .map(|(_, since)| since.elapsed().as_millis() as u64),
                    last_committed: progress.last_committed,
                    processed: progress.processed,
                    dead_lettered: progress.dead_lettered,
                    stalled: self.is_stalled(progress),
                }
            })
            .collect();
        partitions.sort_by_key(|p| p.partition);

        let stalled_partitions: Vec<u32> = partitions
            .iter()
            .filter(|p| p.stalled)
            .map(|p| p.partition)
            .collect();
        let state = self.state();

        HealthSnapshot {
            state,
            live: state != LifecycleState::Stopped && stalled_partitions.is_empty(),
            ready: state == LifecycleState::Running && stalled_partitions.is_empty(),
            stalled_partitions,
            partitions,
        }
    }

    fn is_stalled(&self, progress: &PartitionProgress) -> bool {
        progress
            .in_flight
            .is_some_and(|(_, since)| since.elapsed() > self.stall_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readiness_follows_state() {
        let health = Health::new(Duration::from_secs(60));
        assert_eq!(health.state(), LifecycleState::Starting);
        assert!(!health.is_ready());
        assert!(health.is_live());

        health.set_state(LifecycleState::Running);
        assert!(health.is_ready());

        health.set_state(LifecycleState::Draining);
        assert!(!health.is_ready());

        health.set_state(LifecycleState::Stopped);
        assert!(!health.is_live());
    }

    #[test]
    fn test_stalled_partition_fails_liveness() {
        let health = Health::new(Duration::from_millis(10));
        health.set_state(LifecycleState::Running);

        health.begin(3, 42);
        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(health.stalled_partitions(), vec![3]);
        assert!(!health.is_live());
        assert!(!health.is_ready());

        health.finish(3, 42, false);
        assert!(health.stalled_partitions().is_empty());
        assert!(health.is_ready());
    }

    #[test]
    fn test_snapshot_counts_progress() {
        let health = Health::new(Duration::from_secs(60));
        health.begin(0, 0);
        health.finish(0, 0, false);
        health.begin(0, 1);
        health.finish(0, 1, true);

        let snapshot = health.snapshot();
        assert_eq!(snapshot.partitions.len(), 1);
        let partition = &snapshot.partitions[0];
        assert_eq!(partition.processed, 2);
        assert_eq!(partition.dead_lettered, 1);
        assert_eq!(partition.last_committed, Some(1));
        assert_eq!(partition.in_flight_offset, None);
    }
}
