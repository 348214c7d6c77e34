//! In-memory tree simulation of the balancing agent.
//!
//! Builds a synthetic fan-in tree out of mock platform collaborators and
//! drives the full descend / adjust / sample / ascend cycle for a number of
//! ticks, logging the step progression at the root.
//!
//! ```bash
//! cargo run --bin balance_sim -- --fan-in 4,4 --cap 500 --ticks 30
//! cargo run --bin balance_sim -- --fan-in 2,2,2 --cap 400 --json
//! ```

use std::sync::Arc;

use clap::Parser;
use rand::Rng;
use serde::Serialize;
use smallvec::{smallvec, SmallVec};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use power_balancer::platform::mock::{MockBalancer, MockGovernor, MockPlatformIo};
use power_balancer::{
    format_step_count, AgentConfig, Policy, PowerBalancerAgent, Result, Sample, TraceRow,
    SIGNAL_EPOCH_COUNT, SIGNAL_EPOCH_RUNTIME, SIGNAL_EPOCH_RUNTIME_IGNORE,
    SIGNAL_EPOCH_RUNTIME_NETWORK, SIGNAL_POWER_PACKAGE_MAX, SIGNAL_POWER_PACKAGE_MIN,
    SIGNAL_POWER_PACKAGE_TDP,
};

#[derive(Parser)]
#[command(name = "balance_sim")]
#[command(version, about = "Simulate the power balancing tree against mock hardware")]
struct Cli {
    /// Fan-in per tree level above the leaves, e.g. "4,4" for 16 leaves
    #[arg(long, default_value = "4,4", value_delimiter = ',')]
    fan_in: Vec<usize>,

    /// Cluster-wide power budget per node, in watts
    #[arg(long, default_value_t = 500.0)]
    cap: f64,

    /// Number of control-loop ticks to run
    #[arg(long, default_value_t = 30)]
    ticks: u32,

    /// Spread of per-leaf balanced epoch runtime, in seconds: leaf i runs
    /// `1.0 + spread * i / num_leaf` plus jitter
    #[arg(long, default_value_t = 0.5)]
    spread: f64,

    /// Log filter (e.g. info, debug, balance_sim=debug)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print a JSON summary at the end
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct Summary {
    fan_in: Vec<usize>,
    num_leaf: usize,
    ticks: u32,
    final_step: f64,
    final_phase: String,
    leaf_power_limits: Vec<f64>,
}

fn leaf_platform(cap: f64) -> Arc<MockPlatformIo> {
    let platform = MockPlatformIo::new();
    platform.set_signal(SIGNAL_POWER_PACKAGE_TDP, cap);
    platform.set_signal(SIGNAL_POWER_PACKAGE_MIN, 1.0);
    platform.set_signal(SIGNAL_POWER_PACKAGE_MAX, 2.0 * cap);
    platform.set_signal(SIGNAL_EPOCH_RUNTIME, 0.0);
    platform.set_signal(SIGNAL_EPOCH_COUNT, 0.0);
    platform.set_signal(SIGNAL_EPOCH_RUNTIME_NETWORK, 0.0);
    platform.set_signal(SIGNAL_EPOCH_RUNTIME_IGNORE, 0.0);
    Arc::new(platform)
}

struct SimTree {
    /// Agents per level, leaves at index 0 and the root at the top.
    agents: Vec<Vec<PowerBalancerAgent>>,
    leaf_platforms: Vec<Arc<MockPlatformIo>>,
    /// Last policy delivered to each node, per level.
    policy_in: Vec<Vec<Policy>>,
    /// Last completed sample reported by each node, per level.
    sample_up: Vec<Vec<Sample>>,
    fan_in: Vec<usize>,
    spread: f64,
    cap: f64,
}

impl SimTree {
    fn new(fan_in: Vec<usize>, cap: f64, spread: f64) -> Result<Self> {
        let depth = fan_in.len();
        let nodes_at = |level: usize| -> usize { fan_in[level..].iter().product() };

        let mut agents = Vec::with_capacity(depth + 1);
        let mut leaf_platforms = Vec::new();
        for level in 0..=depth {
            let mut level_agents = Vec::with_capacity(nodes_at(level));
            for _ in 0..nodes_at(level) {
                let platform = leaf_platform(cap);
                let (governor, balancer) = if level == 0 {
                    leaf_platforms.push(Arc::clone(&platform));
                    (
                        Some(Box::new(MockGovernor::with_bounds(1.0, 2.0 * cap))
                            as Box<dyn power_balancer::PowerGovernor>),
                        Some(Box::new(MockBalancer::with_stability(2))
                            as Box<dyn power_balancer::PowerBalancer>),
                    )
                } else {
                    (None, None)
                };
                let mut agent =
                    PowerBalancerAgent::new(platform, governor, balancer, AgentConfig::default())?;
                agent.init(level, &fan_in)?;
                level_agents.push(agent);
            }
            agents.push(level_agents);
        }

        let policy_in = (0..=depth)
            .map(|level| vec![Policy::default(); nodes_at(level)])
            .collect();
        let sample_up = (0..=depth)
            .map(|level| vec![Sample::default(); nodes_at(level)])
            .collect();
        Ok(Self {
            agents,
            leaf_platforms,
            policy_in,
            sample_up,
            fan_in,
            spread,
            cap,
        })
    }

    fn depth(&self) -> usize {
        self.fan_in.len()
    }

    fn num_leaf(&self) -> usize {
        self.leaf_platforms.len()
    }

    /// Mark one epoch boundary on every leaf with a jittered runtime.
    fn advance_epoch(&self, rng: &mut impl Rng) {
        let num_leaf = self.num_leaf() as f64;
        for (idx, platform) in self.leaf_platforms.iter().enumerate() {
            let runtime = 1.0 + self.spread * idx as f64 / num_leaf + rng.gen_range(0.0..0.02);
            platform.bump_signal(SIGNAL_EPOCH_COUNT, 1.0);
            platform.set_signal(SIGNAL_EPOCH_RUNTIME, runtime + 0.15);
            platform.set_signal(SIGNAL_EPOCH_RUNTIME_NETWORK, 0.1);
            platform.set_signal(SIGNAL_EPOCH_RUNTIME_IGNORE, 0.05);
        }
    }

    fn tick(&mut self, tick: u32) -> Result<()> {
        let depth = self.depth();

        // Policies flow down, root first.
        let mut root_in = Policy {
            power_package_limit_total: self.cap,
            ..Policy::default()
        };
        self.agents[depth][0].validate_policy(&mut root_in)?;
        self.policy_in[depth][0] = root_in;

        for level in (1..=depth).rev() {
            let fan_out = self.fan_in[level - 1];
            for node in 0..self.agents[level].len() {
                let in_policy = self.policy_in[level][node];
                let mut out: SmallVec<[Policy; 8]> = smallvec![Policy::default(); fan_out];
                let agent = &mut self.agents[level][node];
                agent.split_policy(&in_policy, &mut out)?;
                if agent.do_send_policy() {
                    for (child, child_policy) in out.iter().enumerate() {
                        self.policy_in[level - 1][node * fan_out + child] = *child_policy;
                    }
                }
            }
        }

        // Leaves touch the platform.
        for (idx, agent) in self.agents[0].iter_mut().enumerate() {
            let in_policy = self.policy_in[0][idx];
            agent.adjust_platform(&in_policy)?;
            let mut sample = Sample::default();
            agent.sample_platform(&mut sample)?;
            if agent.do_send_sample() {
                self.sample_up[0][idx] = sample;
            }
        }

        // Samples flow up, completed steps only.
        for level in 1..=depth {
            let fan_out = self.fan_in[level - 1];
            for node in 0..self.agents[level].len() {
                let children =
                    self.sample_up[level - 1][node * fan_out..(node + 1) * fan_out].to_vec();
                let agent = &mut self.agents[level][node];
                let mut sample = Sample::default();
                agent.aggregate_sample(&children, &mut sample)?;
                if agent.do_send_sample() {
                    self.sample_up[level][node] = sample;
                    if level == depth {
                        info!(
                            tick,
                            step = %format_step_count(sample.step_count)?,
                            max_epoch_runtime = sample.max_epoch_runtime,
                            sum_power_slack = sample.sum_power_slack,
                            min_power_headroom = sample.min_power_headroom,
                            "root completed step"
                        );
                    }
                }
            }
        }

        debug!(
            tick,
            root_step = self.policy_in[depth - 1][0].step_count,
            "tick complete"
        );
        Ok(())
    }

    fn summary(&self, ticks: u32) -> Result<Summary> {
        let leaf_power_limits = self.agents[0]
            .iter()
            .map(|agent| {
                let mut row = TraceRow::default();
                agent.trace_values(&mut row);
                row.power_limit
            })
            .collect();
        let final_step = self.policy_in[self.depth() - 1][0].step_count;
        Ok(Summary {
            fan_in: self.fan_in.clone(),
            num_leaf: self.num_leaf(),
            ticks,
            final_step,
            final_phase: format_step_count(final_step)?,
            leaf_power_limits,
        })
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cli.log_level))
        .init();

    if cli.fan_in.is_empty() || cli.fan_in.contains(&0) {
        eprintln!("--fan-in must list at least one non-zero fan-in");
        std::process::exit(2);
    }

    let mut rng = rand::thread_rng();
    let mut tree = SimTree::new(cli.fan_in.clone(), cli.cap, cli.spread)?;
    info!(
        fan_in = ?cli.fan_in,
        num_leaf = tree.num_leaf(),
        cap = cli.cap,
        "simulating balancing tree"
    );

    for tick in 0..cli.ticks {
        // One application epoch per tick once the budget is out.
        if tick >= 2 {
            tree.advance_epoch(&mut rng);
        }
        tree.tick(tick)?;
        let depth = tree.depth();
        tree.agents[depth][0].wait();
    }

    let summary = tree.summary(cli.ticks)?;
    if cli.json {
        match serde_json::to_string_pretty(&summary) {
            Ok(rendered) => println!("{rendered}"),
            Err(err) => eprintln!("failed to render summary: {err}"),
        }
    } else {
        info!(
            final_phase = %summary.final_phase,
            leaf_power_limits = ?summary.leaf_power_limits,
            "simulation finished"
        );
    }
    Ok(())
}
