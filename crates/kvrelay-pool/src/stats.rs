//! Pool statistics snapshot.

use serde::{Deserialize, Serialize};

/// Point-in-time view of a connection pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub name: String,
    pub pooling_enabled: bool,
    pub closed: bool,
    pub max_connections: usize,
    pub min_connections: usize,
    /// Idle plus leased (including connections being opened)
    pub total_connections: usize,
    pub active_connections: usize,
    pub idle_connections: usize,
    /// Callers currently queued in `acquire`
    pub waiter_count: usize,
    /// Leases exempt from recycling (subscriber connections)
    pub dedicated_connections: usize,
    pub total_created: u64,
    pub total_destroyed: u64,
    /// Acquires that had to queue
    pub total_waits: u64,
    /// Acquires that gave up with `Exhausted`
    pub total_timeouts: u64,
}

impl PoolStats {
    /// Leased share of the connection limit, in percent.
    #[allow(clippy::cast_precision_loss)]
    pub fn saturation(&self) -> f64 {
        if self.max_connections == 0 {
            return 0.0;
        }
        self.active_connections as f64 / self.max_connections as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturation() {
        let stats = PoolStats {
            max_connections: 4,
            active_connections: 3,
            ..Default::default()
        };
        assert!((stats.saturation() - 75.0).abs() < 1e-9);
        assert!(PoolStats::default().saturation().abs() < f64::EPSILON);
    }
}
