//! The in-memory model of the cluster's replica nodes.
//!
//! Each node carries a health flag and a last-touched timestamp. Selection
//! prefers the nearest node when usable and otherwise rotates round-robin
//! over the member nodes. There is no background probing: an unhealthy node
//! becomes eligible again only once its cool-down has elapsed, and only a
//! successful attempt flips it back to healthy.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::Clock;

/// Identifies a node within its pool, so health outcomes can be reported
/// back against the exact node an attempt used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    /// The designated nearest node.
    Nearest,
    /// A member node, by position in the rotation.
    Member(usize),
}

#[derive(Debug)]
struct NodeState {
    url: Url,
    healthy: bool,
    last_touched_ms: u64,
}

impl NodeState {
    fn new(url: Url) -> Self {
        Self {
            url,
            healthy: true,
            last_touched_ms: 0,
        }
    }

    fn usable(&self, now_ms: u64, healthcheck_interval_ms: u64) -> bool {
        self.healthy || now_ms.saturating_sub(self.last_touched_ms) > healthcheck_interval_ms
    }
}

#[derive(Debug)]
struct PoolInner {
    nearest: Option<NodeState>,
    members: Vec<NodeState>,
    cursor: usize,
}

/// An ordered set of member nodes plus an optional nearest node.
#[derive(Debug)]
pub(crate) struct NodePool {
    healthcheck_interval_ms: u64,
    clock: Arc<dyn Clock>,
    inner: Mutex<PoolInner>,
}

impl NodePool {
    pub(crate) fn new(
        members: Vec<Url>,
        nearest: Option<Url>,
        healthcheck_interval: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        // Start the cursor on the last member so the first pick lands on
        // the first.
        let cursor = members.len().saturating_sub(1);
        Self {
            healthcheck_interval_ms: healthcheck_interval.as_millis() as u64,
            clock,
            inner: Mutex::new(PoolInner {
                nearest: nearest.map(NodeState::new),
                members: members.into_iter().map(NodeState::new).collect(),
                cursor,
            }),
        }
    }

    /// Whether the pool has no nodes at all. The dispatcher then operates
    /// as a pass-through.
    pub(crate) fn is_empty(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.members.is_empty() && inner.nearest.is_none()
    }

    /// Picks the node the next attempt should target.
    ///
    /// The nearest node wins whenever it is healthy or due for a recheck.
    /// Otherwise the cursor walks the members round-robin and the first
    /// healthy-or-due node is taken. When every node is unhealthy and none
    /// is due, the candidate the full pass landed on is returned anyway and
    /// the dispatcher tries it regardless.
    pub(crate) fn pick_next(&self) -> Option<(Slot, Url)> {
        let mut inner = self.inner.lock().unwrap();
        let now = self.clock.now_ms();

        if let Some(nearest) = &inner.nearest {
            if nearest.usable(now, self.healthcheck_interval_ms) {
                return Some((Slot::Nearest, nearest.url.clone()));
            }
        }

        let len = inner.members.len();
        if len == 0 {
            // No members to fall back to; an unhealthy nearest node is
            // still better than nothing.
            return inner
                .nearest
                .as_ref()
                .map(|nearest| (Slot::Nearest, nearest.url.clone()));
        }

        for _ in 0..len {
            inner.cursor = (inner.cursor + 1) % len;
            let candidate = &inner.members[inner.cursor];
            if candidate.usable(now, self.healthcheck_interval_ms) {
                return Some((Slot::Member(inner.cursor), candidate.url.clone()));
            }
        }

        let candidate = &inner.members[inner.cursor];
        Some((Slot::Member(inner.cursor), candidate.url.clone()))
    }

    /// Records the outcome of an attempt: sets the health flag and
    /// refreshes the node's last-touched timestamp.
    pub(crate) fn mark(&self, slot: Slot, healthy: bool) {
        let mut inner = self.inner.lock().unwrap();
        let now = self.clock.now_ms();
        let node = match slot {
            Slot::Nearest => inner.nearest.as_mut(),
            Slot::Member(idx) => inner.members.get_mut(idx),
        };
        let Some(node) = node else { return };
        if node.healthy != healthy {
            debug!(
                "node pool: {} is now {}",
                node.url,
                if healthy { "healthy" } else { "unhealthy" }
            );
        }
        node.healthy = healthy;
        node.last_touched_ms = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::transport::ManualClock;

    fn url(host: &str) -> Url {
        Url::parse(&format!("http://{host}:8108")).unwrap()
    }

    fn pool_of(hosts: &[&str], nearest: Option<&str>, clock: Arc<ManualClock>) -> NodePool {
        NodePool::new(
            hosts.iter().map(|h| url(h)).collect(),
            nearest.map(url),
            Duration::from_millis(20),
            clock,
        )
    }

    fn picked_host(pool: &NodePool) -> (Slot, String) {
        let (slot, url) = pool.pick_next().expect("pool is not empty");
        (slot, url.host_str().unwrap().to_string())
    }

    #[test]
    fn rotation_starts_at_first_member() {
        let clock = Arc::new(ManualClock::new(0));
        let pool = pool_of(&["a", "b", "c"], None, clock);
        let picks: Vec<String> = (0..6).map(|_| picked_host(&pool).1).collect();
        assert_eq!(picks, ["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn unhealthy_member_is_skipped_until_due() {
        let clock = Arc::new(ManualClock::new(0));
        let pool = pool_of(&["a", "b", "c"], None, clock.clone());

        let (slot_a, host) = picked_host(&pool);
        assert_eq!(host, "a");
        pool.mark(slot_a, false);

        // Within the cool-down window the unhealthy node is skipped.
        clock.advance_ms(10);
        assert_eq!(picked_host(&pool).1, "b");
        assert_eq!(picked_host(&pool).1, "c");
        assert_eq!(picked_host(&pool).1, "b");

        // Past the window it becomes due for a recheck.
        clock.advance_ms(11);
        let picks: Vec<String> = (0..3).map(|_| picked_host(&pool).1).collect();
        assert!(picks.contains(&"a".to_string()));
    }

    #[test]
    fn all_unhealthy_still_yields_a_candidate() {
        let clock = Arc::new(ManualClock::new(0));
        let pool = pool_of(&["a", "b"], None, clock);
        for _ in 0..2 {
            let (slot, _) = pool.pick_next().unwrap();
            pool.mark(slot, false);
        }
        // None healthy, none due: the full pass lands somewhere anyway.
        assert!(pool.pick_next().is_some());
    }

    #[test]
    fn nearest_is_preferred_while_healthy() {
        let clock = Arc::new(ManualClock::new(0));
        let pool = pool_of(&["a", "b"], Some("n"), clock.clone());

        assert_eq!(picked_host(&pool), (Slot::Nearest, "n".to_string()));
        pool.mark(Slot::Nearest, false);

        // Nearest out: traffic diverges to the members.
        clock.advance_ms(5);
        assert_eq!(picked_host(&pool).1, "a");
        assert_eq!(picked_host(&pool).1, "b");

        // After the cool-down the nearest node is tried first again.
        clock.advance_ms(20);
        assert_eq!(picked_host(&pool), (Slot::Nearest, "n".to_string()));
    }

    #[test]
    fn nearest_without_members_is_always_returned() {
        let clock = Arc::new(ManualClock::new(0));
        let pool = pool_of(&[], Some("n"), clock);
        pool.mark(Slot::Nearest, false);
        assert_eq!(picked_host(&pool), (Slot::Nearest, "n".to_string()));
    }

    #[test]
    fn successful_mark_restores_rotation_membership() {
        let clock = Arc::new(ManualClock::new(0));
        let pool = pool_of(&["a", "b"], None, clock.clone());

        let (slot_a, _) = pool.pick_next().unwrap();
        pool.mark(slot_a, false);
        clock.advance_ms(25);

        // Due for recheck; a successful attempt flips it back to healthy,
        // with a fresh timestamp.
        let (slot, host) = picked_host(&pool);
        assert_eq!(host, "b");
        pool.mark(slot, true);
        let (slot, host) = picked_host(&pool);
        assert_eq!(host, "a");
        pool.mark(slot, true);
        assert_eq!(picked_host(&pool).1, "b");
    }

    #[test]
    fn empty_pool_reports_empty() {
        let clock = Arc::new(ManualClock::new(0));
        let pool = pool_of(&[], None, clock);
        assert!(pool.is_empty());
        assert!(pool.pick_next().is_none());
    }
}
