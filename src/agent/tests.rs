//! Facade-level and whole-tree integration tests.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::policy::{Policy, Sample};
use super::trace::format_step_count;
use super::PowerBalancerAgent;
use crate::config::AgentConfig;
use crate::consts::{
    CONTROL_POWER_PACKAGE_LIMIT, SIGNAL_EPOCH_COUNT, SIGNAL_EPOCH_RUNTIME,
    SIGNAL_EPOCH_RUNTIME_IGNORE, SIGNAL_EPOCH_RUNTIME_NETWORK, SIGNAL_POWER_PACKAGE_MAX,
    SIGNAL_POWER_PACKAGE_MIN, SIGNAL_POWER_PACKAGE_TDP,
};
use crate::errors::Error;
use crate::platform::mock::{MockBalancer, MockGovernor, MockPlatformIo};
use crate::platform::{PlatformIo, PowerBalancer};

const FAN_IN: [usize; 2] = [4, 4];
const NUM_INTERIOR: usize = 4;
const NUM_LEAF: usize = 16;

fn mock_platform(num_package: usize) -> Arc<MockPlatformIo> {
    let platform = MockPlatformIo::with_packages(num_package);
    platform.set_signal(SIGNAL_POWER_PACKAGE_TDP, 140.0);
    platform.set_signal(SIGNAL_POWER_PACKAGE_MIN, 50.0);
    platform.set_signal(SIGNAL_POWER_PACKAGE_MAX, 600.0);
    platform.set_signal(SIGNAL_EPOCH_RUNTIME, 0.0);
    platform.set_signal(SIGNAL_EPOCH_COUNT, 0.0);
    platform.set_signal(SIGNAL_EPOCH_RUNTIME_NETWORK, 0.0);
    platform.set_signal(SIGNAL_EPOCH_RUNTIME_IGNORE, 0.0);
    Arc::new(platform)
}

fn leaf_agent() -> (Arc<MockPlatformIo>, PowerBalancerAgent) {
    let platform = mock_platform(1);
    let mut agent = PowerBalancerAgent::new(
        Arc::clone(&platform) as Arc<dyn PlatformIo>,
        Some(Box::new(MockGovernor::with_bounds(50.0, 600.0))),
        Some(Box::new(MockBalancer::with_slack(5.0))),
        AgentConfig::default(),
    )
    .unwrap();
    agent.init(0, &FAN_IN).unwrap();
    (platform, agent)
}

fn relay_agent(level: usize) -> PowerBalancerAgent {
    let mut agent =
        PowerBalancerAgent::new(mock_platform(1), None, None, AgentConfig::default()).unwrap();
    agent.init(level, &FAN_IN).unwrap();
    agent
}

#[test]
fn test_role_selection_by_level() {
    let (_, leaf) = leaf_agent();
    assert!(format!("{leaf:?}").contains("Leaf"));

    let interior = relay_agent(1);
    assert!(format!("{interior:?}").contains("Tree(TreeRole"));

    let root = relay_agent(2);
    assert!(format!("{root:?}").contains("Root(RootRole"));
}

#[test]
fn test_init_twice_rejected() {
    let mut agent = relay_agent(1);
    assert_eq!(agent.init(1, &FAN_IN).unwrap_err(), Error::AlreadyInitialized);
}

#[test]
fn test_single_node_job_builds_leaf() {
    let platform = mock_platform(1);
    let mut agent = PowerBalancerAgent::new(
        platform,
        Some(Box::new(MockGovernor::new())),
        Some(Box::new(MockBalancer::new())),
        AgentConfig::default(),
    )
    .unwrap();
    agent.init(0, &[]).unwrap();
    assert!(format!("{agent:?}").contains("Leaf"));
}

#[test]
fn test_empty_fan_in_nonzero_level_rejected() {
    let mut agent =
        PowerBalancerAgent::new(mock_platform(1), None, None, AgentConfig::default()).unwrap();
    assert_eq!(
        agent.init(1, &[]).unwrap_err(),
        Error::InvalidLevel { level: 1, depth: 0 }
    );
}

#[test]
fn test_leaf_requires_collaborators() {
    let mut agent =
        PowerBalancerAgent::new(mock_platform(1), None, None, AgentConfig::default()).unwrap();
    assert_eq!(
        agent.init(0, &FAN_IN).unwrap_err(),
        Error::MissingCollaborator("power governor")
    );
}

/// Inert balancer that shares the averaging window it was handed, so the
/// wiring can be observed after the agent takes ownership.
struct WindowRecorder {
    window: Arc<Mutex<f64>>,
}

impl PowerBalancer for WindowRecorder {
    fn averaging_window(&mut self, window: f64) {
        *self.window.lock().unwrap() = window;
    }
    fn power_cap(&mut self, _cap: f64) {}
    fn target_runtime(&mut self, _target: f64) {}
    fn power_limit(&self) -> f64 {
        f64::NAN
    }
    fn power_limit_adjusted(&mut self, _limit: f64) {}
    fn is_runtime_stable(&mut self, _measured_runtime: f64) -> bool {
        true
    }
    fn calculate_runtime_sample(&mut self) {}
    fn runtime_sample(&self) -> f64 {
        0.0
    }
    fn is_target_met(&mut self, _measured_runtime: f64) -> bool {
        true
    }
    fn power_slack(&self) -> f64 {
        0.0
    }
}

#[test]
fn test_init_sizes_the_averaging_window() {
    let window = Arc::new(Mutex::new(0.0));
    let balancer = WindowRecorder {
        window: Arc::clone(&window),
    };
    let mut agent = PowerBalancerAgent::new(
        mock_platform(1),
        Some(Box::new(MockGovernor::new())),
        Some(Box::new(balancer)),
        AgentConfig::default(),
    )
    .unwrap();
    agent.init(0, &FAN_IN).unwrap();

    // 3.0 x the governor's 13 ms control time window.
    assert!((*window.lock().unwrap() - 0.039).abs() < 1e-12);
}

#[test]
fn test_validate_policy_nan_defaults() {
    let (_, agent) = leaf_agent();
    let mut policy = Policy {
        power_package_limit_total: f64::NAN,
        step_count: f64::NAN,
        max_epoch_runtime: f64::NAN,
        power_slack: f64::NAN,
    };
    agent.validate_policy(&mut policy).unwrap();
    // The budget defaults to TDP, everything else to zero.
    assert_eq!(policy.power_package_limit_total, 140.0);
    assert_eq!(policy.step_count, 0.0);
    assert_eq!(policy.max_epoch_runtime, 0.0);
    assert_eq!(policy.power_slack, 0.0);
}

#[test]
fn test_validate_policy_rejects_all_zero() {
    let platform = mock_platform(1);
    platform.set_signal(SIGNAL_POWER_PACKAGE_TDP, 0.0);
    let agent = PowerBalancerAgent::new(platform, None, None, AgentConfig::default()).unwrap();

    let mut policy = Policy {
        power_package_limit_total: f64::NAN,
        step_count: f64::NAN,
        max_epoch_runtime: f64::NAN,
        power_slack: f64::NAN,
    };
    assert_eq!(agent.validate_policy(&mut policy).unwrap_err(), Error::InvalidPolicy);
}

#[test]
fn test_validate_policy_clamps_budget() {
    let (_, agent) = leaf_agent();

    let mut high = Policy {
        power_package_limit_total: 10_000.0,
        ..Policy::default()
    };
    agent.validate_policy(&mut high).unwrap();
    assert_eq!(high.power_package_limit_total, 600.0);

    let mut low = Policy {
        power_package_limit_total: 1.0,
        ..Policy::default()
    };
    agent.validate_policy(&mut low).unwrap();
    assert_eq!(low.power_package_limit_total, 50.0);

    // Zero stays zero: it is the step-transition sentinel, not a budget.
    let mut sentinel = Policy {
        power_package_limit_total: 0.0,
        step_count: 1.0,
        ..Policy::default()
    };
    agent.validate_policy(&mut sentinel).unwrap();
    assert_eq!(sentinel.power_package_limit_total, 0.0);
}

#[test]
fn test_validate_policy_tolerates_nan_power_range() {
    let platform = mock_platform(1);
    platform.set_signal(SIGNAL_POWER_PACKAGE_MIN, f64::NAN);
    platform.set_signal(SIGNAL_POWER_PACKAGE_MAX, f64::NAN);
    let agent = PowerBalancerAgent::new(platform, None, None, AgentConfig::default()).unwrap();

    // A platform reporting NaN power bounds cannot clamp the budget.
    let mut policy = Policy {
        power_package_limit_total: 300.0,
        ..Policy::default()
    };
    agent.validate_policy(&mut policy).unwrap();
    assert_eq!(policy.power_package_limit_total, 300.0);
}

#[test]
fn test_enforce_policy_splits_across_domains() {
    let platform = mock_platform(2);
    let agent =
        PowerBalancerAgent::new(
            Arc::clone(&platform) as Arc<dyn PlatformIo>,
            None,
            None,
            AgentConfig::default(),
        )
        .unwrap();
    let policy = Policy {
        power_package_limit_total: 300.0,
        ..Policy::default()
    };
    agent.enforce_policy(&policy).unwrap();
    assert_eq!(platform.last_control(CONTROL_POWER_PACKAGE_LIMIT), Some(150.0));
}

#[test]
fn test_wait_enforces_minimum_interval() {
    let (_, mut agent) = leaf_agent();
    let start = Instant::now();
    agent.wait();
    agent.wait();
    // The second wait cannot return before a full interval has elapsed
    // since the first.
    assert!(start.elapsed() >= Duration::from_millis(5));
}

#[test]
fn test_facade_caches_write_flag() {
    let (_, mut agent) = leaf_agent();
    let budget = Policy {
        power_package_limit_total: 500.0,
        ..Policy::default()
    };
    agent.adjust_platform(&budget).unwrap();
    assert!(agent.do_write_batch());
    assert!(agent.do_write_batch());

    // Same request again: governor deduplicates the hardware write.
    agent.adjust_platform(&budget).unwrap();
    assert!(!agent.do_write_batch());
}

/// A full 3-level tree with fan-in [4, 4]: one root, 4 interior nodes and
/// 16 leaves, wired through in-memory policy/sample slots the way the tree
/// transport would move them. Samples only propagate upward when the
/// producing node reports its step complete.
struct SimTree {
    root: PowerBalancerAgent,
    interior: Vec<PowerBalancerAgent>,
    leaves: Vec<PowerBalancerAgent>,
    leaf_platforms: Vec<Arc<MockPlatformIo>>,
    interior_policy: Vec<Policy>,
    leaf_policy: Vec<Policy>,
    leaf_sample: Vec<Sample>,
    interior_sample: Vec<Sample>,
}

impl SimTree {
    fn new() -> Self {
        let mut leaves = Vec::with_capacity(NUM_LEAF);
        let mut leaf_platforms = Vec::with_capacity(NUM_LEAF);
        for _ in 0..NUM_LEAF {
            let (platform, agent) = leaf_agent();
            leaf_platforms.push(platform);
            leaves.push(agent);
        }
        Self {
            root: relay_agent(2),
            interior: (0..NUM_INTERIOR).map(|_| relay_agent(1)).collect(),
            leaves,
            leaf_platforms,
            interior_policy: vec![Policy::default(); NUM_INTERIOR],
            leaf_policy: vec![Policy::default(); NUM_LEAF],
            leaf_sample: vec![Sample::default(); NUM_LEAF],
            interior_sample: vec![Sample::default(); NUM_INTERIOR],
        }
    }

    /// Mark one epoch boundary on every leaf; leaf `i` takes
    /// `1.0 + 0.1 * i` seconds of balanced runtime.
    fn advance_epoch(&self) {
        for (idx, platform) in self.leaf_platforms.iter().enumerate() {
            platform.bump_signal(SIGNAL_EPOCH_COUNT, 1.0);
            platform.set_signal(SIGNAL_EPOCH_RUNTIME, 1.15 + 0.1 * idx as f64);
            platform.set_signal(SIGNAL_EPOCH_RUNTIME_NETWORK, 0.1);
            platform.set_signal(SIGNAL_EPOCH_RUNTIME_IGNORE, 0.05);
        }
    }

    fn tick(&mut self, cap: f64) {
        let mut in_policy = Policy {
            power_package_limit_total: cap,
            ..Policy::default()
        };
        self.root.validate_policy(&mut in_policy).unwrap();
        let mut root_out = vec![Policy::default(); NUM_INTERIOR];
        self.root.split_policy(&in_policy, &mut root_out).unwrap();
        if self.root.do_send_policy() {
            self.interior_policy.copy_from_slice(&root_out);
        }

        for (idx, agent) in self.interior.iter_mut().enumerate() {
            let mut out = vec![Policy::default(); FAN_IN[0]];
            agent
                .split_policy(&self.interior_policy[idx], &mut out)
                .unwrap();
            if agent.do_send_policy() {
                self.leaf_policy[idx * FAN_IN[0]..(idx + 1) * FAN_IN[0]].copy_from_slice(&out);
            }
        }

        for (idx, agent) in self.leaves.iter_mut().enumerate() {
            agent.adjust_platform(&self.leaf_policy[idx]).unwrap();
            let mut sample = Sample::default();
            agent.sample_platform(&mut sample).unwrap();
            if agent.do_send_sample() {
                self.leaf_sample[idx] = sample;
            }
        }

        for (idx, agent) in self.interior.iter_mut().enumerate() {
            let mut sample = Sample::default();
            agent
                .aggregate_sample(
                    &self.leaf_sample[idx * FAN_IN[0]..(idx + 1) * FAN_IN[0]],
                    &mut sample,
                )
                .unwrap();
            if agent.do_send_sample() {
                self.interior_sample[idx] = sample;
            }
        }

        let mut root_sample = Sample::default();
        self.root
            .aggregate_sample(&self.interior_sample, &mut root_sample)
            .unwrap();
    }
}

#[test]
fn test_three_level_tree_walks_the_step_cycle() {
    let mut tree = SimTree::new();
    let cap = 500.0;

    // Tick 1: the cap change resets everything to SEND_DOWN_LIMIT, the
    // policy fans out to all 16 leaves and the step completes tree-wide.
    tree.tick(cap);
    assert!(tree.root.do_send_policy());
    assert!(tree.root.do_send_sample());
    for policy in &tree.leaf_policy {
        assert_eq!(policy.power_package_limit_total, cap);
        assert_eq!(policy.step_count, 0.0);
    }
    for sample in &tree.leaf_sample {
        assert_eq!(sample.step_count, 0.0);
    }

    // Tick 2: the root picked up its own policy advance and broadcasts the
    // MEASURE_RUNTIME transition with the budget field zeroed.
    tree.tick(cap);
    assert!(tree.root.do_send_policy());
    for policy in &tree.leaf_policy {
        assert_eq!(policy.power_package_limit_total, 0.0);
        assert_eq!(policy.step_count, 1.0);
    }
    // No epoch has completed, so no step completion yet.
    assert!(!tree.root.do_send_sample());

    // Tick 3: one epoch on every leaf stabilizes the runtime estimate; the
    // worst balanced runtime (leaf 15: 1.15 + 1.5 - 0.1 - 0.05) bubbles up.
    tree.advance_epoch();
    tree.tick(cap);
    assert!(!tree.root.do_send_policy());
    assert!(tree.root.do_send_sample());
    let worst = 1.15 + 0.1 * 15.0 - 0.1 - 0.05;
    for sample in &tree.interior_sample {
        assert_eq!(sample.step_count, 1.0);
    }

    // Tick 4: REDUCE_LIMIT goes down carrying the worst-case runtime.
    tree.tick(cap);
    assert!(tree.root.do_send_policy());
    for policy in &tree.leaf_policy {
        assert_eq!(policy.step_count, 2.0);
        assert!((policy.max_epoch_runtime - worst).abs() < 1e-12);
    }

    // Tick 5: every leaf meets the target, reports 5 W of slack and
    // 100 W of headroom (600 W ceiling, 500 W limit).
    tree.advance_epoch();
    tree.tick(cap);
    assert!(tree.root.do_send_sample());
    for sample in &tree.interior_sample {
        assert_eq!(sample.step_count, 2.0);
        assert_eq!(sample.sum_power_slack, 20.0);
        assert_eq!(sample.min_power_headroom, 100.0);
    }

    // Tick 6: the next loop starts; the root grants
    // min(80 / 16, 100) = 5 W of slack and every leaf folds it into its
    // cap.
    tree.tick(cap);
    assert!(tree.root.do_send_policy());
    for policy in &tree.leaf_policy {
        assert_eq!(policy.step_count, 3.0);
        assert_eq!(policy.power_slack, 5.0);
        assert_eq!(policy.power_package_limit_total, 0.0);
    }
    assert_eq!(
        format_step_count(tree.leaf_policy[0].step_count).unwrap(),
        "1-STEP_SEND_DOWN_LIMIT"
    );

    // The leaves' trace shows the raised limit.
    let mut row = super::trace::TraceRow::default();
    tree.leaves[0].trace_values(&mut row);
    assert_eq!(row.power_limit, 505.0);
}
