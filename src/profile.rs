//! Named bundles of per-request policy knobs.

use std::{fmt::Debug, sync::Arc, time::Duration};

use typed_builder::TypedBuilder;

use crate::policy::LoadBalancingPolicy;

/// A named bundle of {load-balancing policy, consistency level, timeouts,
/// speculative execution config} applied to a request (spec §3).
///
/// Profiles are immutable after construction. A profile built without an
/// explicit `load_balancing_policy` is back-filled with the default
/// profile's policy `Arc` at processor construction time — by identity, not
/// by value, so `Arc::ptr_eq` holds (spec §8 boundary test).
#[derive(Clone, TypedBuilder)]
pub struct ExecutionProfile {
    /// The routing policy used to build query plans for requests carrying
    /// this profile. `None` until back-filled by
    /// [`crate::processor::RequestProcessor::init`] if the builder didn't
    /// set one.
    #[builder(default, setter(strip_option))]
    pub load_balancing_policy: Option<Arc<dyn LoadBalancingPolicy>>,

    /// The consistency level requests under this profile are sent with.
    /// Opaque to the processor; forwarded to the wire layer by the handler.
    #[builder(default = ConsistencyLevel::LocalQuorum)]
    pub consistency: ConsistencyLevel,

    /// Per-request network timeout.
    #[builder(default = Duration::from_secs(12))]
    pub request_timeout: Duration,

    /// Speculative execution configuration, if enabled for this profile.
    #[builder(default)]
    pub speculative_execution: Option<SpeculativeExecutionPolicy>,

    /// Opaque marker naming the retry policy requests under this profile
    /// should consult on failure. Retry-policy internals (backoff, which
    /// error kinds are retryable) are out of scope here; the processor only
    /// carries the marker through to the handler, which is where retry
    /// decisions are actually made.
    #[builder(default)]
    pub retry_policy: Option<RetryPolicyMarker>,
}

impl Debug for ExecutionProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionProfile")
            .field("has_load_balancing_policy", &self.load_balancing_policy.is_some())
            .field("consistency", &self.consistency)
            .field("request_timeout", &self.request_timeout)
            .field("speculative_execution", &self.speculative_execution)
            .field("retry_policy", &self.retry_policy)
            .finish()
    }
}

/// The consistency level a request is sent with. Opaque beyond its name:
/// CQL encoding of these values is out of scope for this spec.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsistencyLevel {
    /// A single replica in the local datacenter must acknowledge.
    LocalOne,
    /// A quorum of replicas in the local datacenter must acknowledge.
    LocalQuorum,
    /// A quorum of all replicas must acknowledge.
    Quorum,
    /// Every replica must acknowledge.
    All,
}

/// Speculative execution: retry against the next host in the plan if the
/// current attempt hasn't completed after `delay`, up to `max_attempts`
/// extra attempts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpeculativeExecutionPolicy {
    /// Delay before issuing a speculative retry.
    pub delay: Duration,
    /// Maximum number of speculative retries beyond the first attempt.
    pub max_attempts: u32,
}

/// Names a retry policy by identity only; retry decisions and backoff are
/// out of scope for this crate (see SPEC_FULL.md's Non-goals).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicyMarker(pub &'static str);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_profile_has_expected_defaults() {
        let profile = ExecutionProfile::builder().build();
        assert_eq!(profile.consistency, ConsistencyLevel::LocalQuorum);
        assert_eq!(profile.request_timeout, Duration::from_secs(12));
        assert!(profile.load_balancing_policy.is_none());
        assert!(profile.speculative_execution.is_none());
        assert!(profile.retry_policy.is_none());
    }

    #[test]
    fn builder_overrides_take_effect() {
        let profile = ExecutionProfile::builder()
            .consistency(ConsistencyLevel::All)
            .request_timeout(Duration::from_secs(1))
            .retry_policy(Some(RetryPolicyMarker("default")))
            .build();
        assert_eq!(profile.consistency, ConsistencyLevel::All);
        assert_eq!(profile.request_timeout, Duration::from_secs(1));
        assert_eq!(profile.retry_policy, Some(RetryPolicyMarker("default")));
    }
}
