//! Pluggable routing: the [`LoadBalancingPolicy`] capability interface and a
//! concrete, testable [`RoundRobinPolicy`].

use std::{
    collections::HashMap,
    fmt::Debug,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use rand::RngCore;

use crate::{
    address::Address,
    host::{Host, HostDistance},
};

/// A finite, ordered, non-restartable sequence of candidate hosts for one
/// request.
///
/// Plans are produced on demand by [`LoadBalancingPolicy::new_query_plan`]
/// and are consumed in place on the worker task; they are never passed
/// across threads (spec §5).
pub type QueryPlan = Box<dyn Iterator<Item = Arc<Host>> + Send>;

/// A stateful routing policy.
///
/// Implementations are constructed once per execution profile (profiles
/// without an explicit policy share the default profile's instance — see
/// spec §4.1) and are driven exclusively from the processor's worker task.
pub trait LoadBalancingPolicy: Debug + Send + Sync {
    /// Initializes the policy with the full host set known at construction
    /// time and the host the driver is already connected to, if any.
    ///
    /// Called exactly once, before any `on_add`/`on_up`/`on_down`/`on_remove`
    /// call and before any `new_query_plan` call.
    fn init(&self, connected_host: Option<Arc<Host>>, hosts: &[Arc<Host>], random: &mut dyn RngCore);

    /// Classifies `host` for this policy. The processor consults this
    /// before delivering `on_add`/`on_up`/`on_down` (spec §4.5's "ignore
    /// gate"); `on_remove` is always delivered regardless of distance.
    fn distance(&self, host: &Host) -> HostDistance;

    /// A host was added to the topology.
    fn on_add(&self, host: Arc<Host>);

    /// A host's pool reported at least one healthy connection.
    fn on_up(&self, host: Arc<Host>);

    /// A host's pool reported down, or hit a critical connection error.
    fn on_down(&self, host: Arc<Host>);

    /// A host was removed from the topology. Always delivered, even for
    /// hosts this policy classified `Ignore`, so policies can free any
    /// per-host state unconditionally.
    fn on_remove(&self, address: Address);

    /// Produces a query plan for one request.
    fn new_query_plan(&self) -> QueryPlan;

    /// Releases any per-loop resources the policy registered during `init`
    /// (e.g. a periodic host-refresh timer). Called once per policy, while
    /// the processor is closing, right after the pool manager has been
    /// asked to close and before the worker drains the rest of the queue.
    /// Most policies register nothing and can rely on the default no-op.
    fn close_handles(&self) {}
}

/// A simple round-robin policy over every host not classified `Ignore`.
///
/// `Ignore` classification here is purely a per-host opt-out: callers can
/// mark specific addresses as ignored (e.g. to model a remote datacenter a
/// profile should never route to) via [`RoundRobinPolicy::ignore`].
#[derive(Debug, Default)]
pub struct RoundRobinPolicy {
    hosts: Mutex<Vec<Arc<Host>>>,
    ignored: Mutex<Vec<Address>>,
    next: AtomicUsize,
}

impl RoundRobinPolicy {
    /// Constructs an empty `RoundRobinPolicy`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `address` as `Ignore`d by this policy from now on.
    pub fn ignore(&self, address: Address) {
        self.ignored.lock().unwrap().push(address);
    }

    fn is_ignored(&self, address: Address) -> bool {
        self.ignored.lock().unwrap().contains(&address)
    }
}

impl LoadBalancingPolicy for RoundRobinPolicy {
    fn init(&self, _connected_host: Option<Arc<Host>>, hosts: &[Arc<Host>], random: &mut dyn RngCore) {
        let mut guard = self.hosts.lock().unwrap();
        *guard = hosts.to_vec();
        // Start the rotation at a random offset so that many processor
        // instances constructed at the same time don't all hammer host[0]
        // first.
        if !guard.is_empty() {
            self.next
                .store((random.next_u32() as usize) % guard.len(), Ordering::Relaxed);
        }
    }

    fn distance(&self, host: &Host) -> HostDistance {
        if self.is_ignored(host.address()) {
            HostDistance::Ignore
        } else {
            HostDistance::Local
        }
    }

    fn on_add(&self, host: Arc<Host>) {
        let mut guard = self.hosts.lock().unwrap();
        if !guard.iter().any(|h| h.address() == host.address()) {
            guard.push(host);
        }
    }

    fn on_up(&self, host: Arc<Host>) {
        self.on_add(host);
    }

    fn on_down(&self, host: Arc<Host>) {
        let mut guard = self.hosts.lock().unwrap();
        guard.retain(|h| h.address() != host.address());
    }

    fn on_remove(&self, address: Address) {
        let mut guard = self.hosts.lock().unwrap();
        guard.retain(|h| h.address() != address);
        self.ignored.lock().unwrap().retain(|a| *a != address);
    }

    fn new_query_plan(&self) -> QueryPlan {
        let hosts = self.hosts.lock().unwrap().clone();
        if hosts.is_empty() {
            return Box::new(std::iter::empty());
        }
        let start = self.next.fetch_add(1, Ordering::Relaxed) % hosts.len();
        let rotated: Vec<Arc<Host>> = hosts[start..].iter().chain(&hosts[..start]).cloned().collect();
        Box::new(rotated.into_iter())
    }
}


#[cfg(test)]
mod test {
    use super::{test_support::CountingPolicy, *};
    use crate::host::HostState;
    use rand::{rngs::SmallRng, SeedableRng};

    fn host(last_octet: u8) -> Arc<Host> {
        Arc::new(Host::new(
            Address::new(std::net::IpAddr::from([127, 0, 0, last_octet]), 9042),
            HostState::Up,
        ))
    }

    #[test]
    fn round_robin_cycles_through_all_hosts() {
        let policy = RoundRobinPolicy::new();
        let mut rng = SmallRng::seed_from_u64(1);
        let hosts = vec![host(1), host(2), host(3)];
        policy.init(None, &hosts, &mut rng);

        let mut seen = std::collections::HashSet::new();
        for _ in 0..3 {
            let plan: Vec<_> = policy.new_query_plan().collect();
            assert_eq!(plan.len(), 3);
            seen.insert(plan[0].address());
        }
        assert_eq!(seen.len(), 3, "every host should eventually lead a plan");
    }

    #[test]
    fn on_down_excludes_host_from_subsequent_plans() {
        let policy = RoundRobinPolicy::new();
        let mut rng = SmallRng::seed_from_u64(1);
        let hosts = vec![host(1), host(2)];
        policy.init(None, &hosts, &mut rng);

        policy.on_down(host(1));
        for _ in 0..4 {
            let plan: Vec<_> = policy.new_query_plan().collect();
            assert!(plan.iter().all(|h| h.address() != host(1).address()));
        }
    }

    #[test]
    fn ignored_host_is_classified_ignore() {
        let policy = RoundRobinPolicy::new();
        policy.ignore(host(9).address());
        assert_eq!(policy.distance(&host(9)), HostDistance::Ignore);
        assert_eq!(policy.distance(&host(1)), HostDistance::Local);
    }

    #[test]
    fn counting_policy_records_each_callback_once() {
        let policy = CountingPolicy::new(vec![]);
        let mut rng = SmallRng::seed_from_u64(1);
        policy.init(None, &[], &mut rng);
        policy.on_add(host(1));
        policy.on_up(host(1));
        policy.on_down(host(1));
        policy.on_remove(host(1).address());

        let calls = policy.calls.lock().unwrap();
        assert_eq!(calls.get("on_add").unwrap().len(), 1);
        assert_eq!(calls.get("on_up").unwrap().len(), 1);
        assert_eq!(calls.get("on_down").unwrap().len(), 1);
        assert_eq!(calls.get("on_remove").unwrap().len(), 1);
    }
}
