//! Network lifecycle workflow.
//!
//! A run moves through formation, discovery and join, group setup, route
//! establishment and the data phase. [`LifecyclePlan`] fixes when each
//! scheduled step fires; [`Lifecycle`] reacts to the stack callbacks, drives
//! the link model for sensor readings and feeds the statistics.
//!
//! Route establishment and the data phase are gated by the configured
//! [`DependencyPolicy`]. Under `fixed_margin` they start at their planned
//! time whatever happened before. Under `wait_for_confirmations` each re-posts
//! itself every poll interval until its precondition holds or the wait limit
//! passes.

use crate::metric_defs;
use crate::trace::TraceRecorder;
use tracing::{debug, info, trace, warn};
use zbsim_channel::{LinkEvaluator, Outcome, Transmission};
use zbsim_common::{
    DataConfirm, DataDestination, DataIndication, DiscoveryConfirm, EventPayload, FormationConfirm,
    GroupAddress, JoinConfirm, MessageId, NetworkDescriptor, NodeId, RouteDiscoveryConfirm, RouteTarget,
    SimContext, SimError, SimTime,
};
use zbsim_model::{DependencyPolicy, Group, RoutingMode, ScenarioConfig, Sensor, TopologyProvider};
use zbsim_stack::{CapabilityInfo, DataRequest, DiscoveryRequest, JoinRequest, ProtocolStack};
use zbsim_stats::StatisticsAggregator;

/// Spacing between group memberships of consecutive members.
pub const GROUP_MEMBER_STAGGER_S: f64 = 0.1;

/// Group command frame: ZCL frame control, sequence number, command id.
pub const GROUP_COMMAND_BYTES: u32 = 3;

// ============================================================================
// Plan
// ============================================================================

/// Planned time of every scheduled lifecycle step.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecyclePlan {
    /// Network formation.
    pub formation_at: SimTime,
    /// Discovery start per non-coordinator node, in index order.
    pub discoveries: Vec<(NodeId, SimTime)>,
    /// Group memberships.
    pub group_joins: Vec<(SimTime, NodeId, GroupAddress)>,
    /// Route establishment.
    pub routes_at: SimTime,
    /// Data phase start.
    pub data_at: SimTime,
    /// Reading interval.
    pub reading_interval: SimTime,
    /// Spacing between the first readings of consecutive sensors.
    pub sensor_stagger: SimTime,
    /// Route discovery target.
    pub route_target: RouteTarget,
    /// Sensors in reporting order.
    pub sensors: Vec<Sensor>,
    /// Groups and their commands.
    pub groups: Vec<Group>,
    /// Reading payload size.
    pub payload_bytes: u32,
    /// Simulation horizon.
    pub horizon: SimTime,
}

impl LifecyclePlan {
    /// Build the plan for a validated scenario.
    pub fn from_config(config: &ScenarioConfig) -> Self {
        let timing = &config.timing;
        let discovery_base = timing.formation_at_s + timing.discovery_offset_s;
        let discovery_s: Vec<(NodeId, f64)> = (1..config.nodes as u32)
            .map(|i| (NodeId(i), discovery_base + f64::from(i - 1) * timing.join_stagger_s))
            .collect();
        let last_discovery_s = discovery_s.last().map_or(discovery_base, |(_, t)| *t);
        let routes_s = last_discovery_s + timing.route_margin_s;
        let data_s = routes_s + timing.data_margin_s;

        let groups = config.groups();
        let mut group_joins = Vec::new();
        for group in &groups {
            for (k, member) in group.members.iter().enumerate() {
                let discovery = discovery_s
                    .iter()
                    .find(|(node, _)| node == member)
                    .map_or(discovery_base, |(_, t)| *t);
                let at = discovery + timing.group_setup_offset_s + k as f64 * GROUP_MEMBER_STAGGER_S;
                group_joins.push((SimTime::from_secs(at), *member, group.address));
            }
        }
        group_joins.sort_by_key(|(at, _, _)| *at);

        let route_target = match config.routing {
            RoutingMode::ManyToOne => RouteTarget::ManyToOne,
            RoutingMode::Mesh => RouteTarget::Node(config.mesh_target()),
        };

        LifecyclePlan {
            formation_at: SimTime::from_secs(timing.formation_at_s),
            discoveries: discovery_s
                .into_iter()
                .map(|(node, t)| (node, SimTime::from_secs(t)))
                .collect(),
            group_joins,
            routes_at: SimTime::from_secs(routes_s),
            data_at: SimTime::from_secs(data_s),
            reading_interval: SimTime::from_secs(config.workload.interval_s),
            sensor_stagger: SimTime::from_secs(timing.sensor_stagger_s),
            route_target,
            sensors: config.sensors(),
            groups,
            payload_bytes: config.workload.payload_bytes,
            horizon: SimTime::from_secs(config.duration_s),
        }
    }

    /// Post every scheduled step that does not depend on an earlier phase.
    pub fn schedule(&self, ctx: &mut SimContext) {
        ctx.post_at(self.formation_at, EventPayload::FormNetwork);
        for (node, at) in &self.discoveries {
            ctx.post_at(*at, EventPayload::StartDiscovery { node: *node });
        }
        for (at, node, group) in &self.group_joins {
            ctx.post_at(
                *at,
                EventPayload::JoinGroup {
                    node: *node,
                    group: *group,
                },
            );
        }
        ctx.post_at(self.routes_at, EventPayload::EstablishRoutes);
        ctx.post_at(self.data_at, EventPayload::StartDataPhase);
    }

    /// Offset of reading `sequence` of the `k`-th sensor from the data phase start.
    pub fn reading_offset(&self, k: usize, sequence: u32) -> SimTime {
        let stagger = self.sensor_stagger.as_micros().saturating_mul(k as u64);
        let readings = self.reading_interval.as_micros().saturating_mul(u64::from(sequence));
        SimTime::from_micros(stagger.saturating_add(readings))
    }
}

// ============================================================================
// Node State
// ============================================================================

/// Lifecycle state of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Coordinator before formation.
    Unformed,
    /// Coordinator with a formed network.
    Formed,
    /// Router not on the network.
    Unjoined,
    /// Router scanning for networks.
    Discovering,
    /// Router waiting for its join confirmation.
    Joining,
    /// Router on the network with routing enabled.
    Active,
}

/// Gated phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Routes,
    Data,
}

// ============================================================================
// Workflow
// ============================================================================

/// Everything a handler may touch besides the workflow state.
pub struct RunEnv<'a> {
    /// Clock, channel RNG and event sink.
    pub ctx: &'a mut SimContext,
    /// Statistics for this run.
    pub stats: &'a mut StatisticsAggregator,
    /// Protocol stack.
    pub stack: &'a mut dyn ProtocolStack,
    /// Link model.
    pub evaluator: &'a LinkEvaluator,
    /// Node placement.
    pub topology: &'a dyn TopologyProvider,
    /// Optional event trace.
    pub trace: Option<&'a mut TraceRecorder>,
}

/// Workflow state of one run.
pub struct Lifecycle {
    plan: LifecyclePlan,
    policy: DependencyPolicy,
    required_joins: u64,
    scenario: String,
    states: Vec<NodeState>,
    network: Option<NetworkDescriptor>,
    route_confirmed: bool,
    routes_started: bool,
    data_started: bool,
}

impl Lifecycle {
    /// Create the workflow for a validated scenario.
    pub fn new(config: &ScenarioConfig, plan: LifecyclePlan) -> Self {
        let joinable = config.nodes.saturating_sub(1);
        let required_joins = match config.dependency {
            DependencyPolicy::WaitForConfirmations { min_joined, .. } => min_joined.unwrap_or(joinable),
            DependencyPolicy::FixedMargin => 0,
        };

        let mut states = vec![NodeState::Unjoined; config.nodes];
        if let Some(first) = states.first_mut() {
            *first = NodeState::Unformed;
        }

        Lifecycle {
            plan,
            policy: config.dependency,
            required_joins: required_joins as u64,
            scenario: config.scenario_name(),
            states,
            network: None,
            route_confirmed: false,
            routes_started: false,
            data_started: false,
        }
    }

    /// The plan this workflow follows.
    pub fn plan(&self) -> &LifecyclePlan {
        &self.plan
    }

    /// Current state of a node.
    pub fn state(&self, node: NodeId) -> Option<NodeState> {
        self.states.get(node.index()).copied()
    }

    /// Whether route establishment has started.
    pub fn routes_started(&self) -> bool {
        self.routes_started
    }

    /// Whether the data phase has started.
    pub fn data_started(&self) -> bool {
        self.data_started
    }

    fn set_state(&mut self, node: NodeId, state: NodeState) -> Result<(), SimError> {
        let slot = self
            .states
            .get_mut(node.index())
            .ok_or(SimError::UnknownNode(node))?;
        *slot = state;
        Ok(())
    }

    /// Handle one event.
    pub fn handle(&mut self, payload: &EventPayload, env: &mut RunEnv<'_>) -> Result<(), SimError> {
        match payload {
            EventPayload::FormNetwork => {
                info!("{}: coordinator forming network at {}", self.scenario, env.ctx.time());
                env.stack.form_network(NodeId::COORDINATOR, env.ctx);
            }
            EventPayload::StartDiscovery { node } => self.start_discovery(*node, env)?,
            EventPayload::JoinGroup { node, group } => {
                debug!("{}: {} joining {}", self.scenario, node, group);
                env.stack.add_group(*node, *group, env.ctx);
            }
            EventPayload::EstablishRoutes => self.establish_routes(env),
            EventPayload::StartDataPhase => self.start_data_phase(env),
            EventPayload::SensorReading { sensor, sequence } => self.sensor_reading(*sensor, *sequence, env)?,
            EventPayload::GroupCommand { group, command } => self.group_command(*group, *command, env),
            EventPayload::FormationConfirm(confirm) => self.on_formation(confirm)?,
            EventPayload::DiscoveryConfirm(confirm) => self.on_discovery(confirm, env)?,
            EventPayload::JoinConfirm(confirm) => self.on_join(confirm, env)?,
            EventPayload::RouteDiscoveryConfirm(confirm) => self.on_route(confirm, env),
            EventPayload::DataIndication(indication) => self.on_data(indication, env),
            EventPayload::DataConfirm(confirm) => self.on_data_confirm(confirm, env),
            EventPayload::SimulationEnd => {}
        }
        Ok(())
    }

    // ---- scheduled steps ----

    fn start_discovery(&mut self, node: NodeId, env: &mut RunEnv<'_>) -> Result<(), SimError> {
        if self.state(node) != Some(NodeState::Unjoined) {
            debug!("{}: {} not unjoined, discovery skipped", self.scenario, node);
            return Ok(());
        }
        self.set_state(node, NodeState::Discovering)?;
        debug!("{}: {} starting network discovery", self.scenario, node);
        env.stack.discover_networks(node, &DiscoveryRequest::default(), env.ctx);
        Ok(())
    }

    fn establish_routes(&mut self, env: &mut RunEnv<'_>) {
        if self.routes_started || !self.ready(Phase::Routes, env) {
            return;
        }
        self.routes_started = true;
        match self.plan.route_target {
            RouteTarget::ManyToOne => {
                info!("{}: requesting many-to-one routes at {}", self.scenario, env.ctx.time())
            }
            RouteTarget::Node(target) => {
                info!("{}: discovering mesh route to {} at {}", self.scenario, target, env.ctx.time())
            }
        }
        env.stack.discover_route(NodeId::COORDINATOR, self.plan.route_target, env.ctx);
    }

    fn start_data_phase(&mut self, env: &mut RunEnv<'_>) {
        if self.data_started || !self.ready(Phase::Data, env) {
            return;
        }
        self.data_started = true;
        info!(
            "{}: data phase starting at {} with {} sensor(s)",
            self.scenario,
            env.ctx.time(),
            self.plan.sensors.len()
        );

        for (k, sensor) in self.plan.sensors.iter().enumerate() {
            for sequence in 0..sensor.packets {
                env.ctx.post_event(
                    self.plan.reading_offset(k, sequence),
                    EventPayload::SensorReading {
                        sensor: sensor.node,
                        sequence,
                    },
                );
            }
        }
        for group in &self.plan.groups {
            for offset in &group.command_offsets_s {
                env.ctx.post_event(
                    SimTime::from_secs(*offset),
                    EventPayload::GroupCommand {
                        group: group.address,
                        command: group.command,
                    },
                );
            }
        }
    }

    /// Check a phase's precondition, re-posting the phase while it may still wait.
    fn ready(&self, phase: Phase, env: &mut RunEnv<'_>) -> bool {
        let DependencyPolicy::WaitForConfirmations {
            poll_interval_s,
            max_wait_s,
            ..
        } = self.policy
        else {
            return true;
        };

        let (satisfied, planned, retry) = match phase {
            Phase::Routes => (
                env.stats.join_successes() >= self.required_joins,
                self.plan.routes_at,
                EventPayload::EstablishRoutes,
            ),
            Phase::Data => (self.route_confirmed, self.plan.data_at, EventPayload::StartDataPhase),
        };
        if satisfied {
            return true;
        }

        let now = env.ctx.time();
        if now >= planned + SimTime::from_secs(max_wait_s) {
            warn!(
                "{}: {:?} phase still waiting after {:.1}s, starting anyway",
                self.scenario, phase, max_wait_s
            );
            env.stats.record_dependency_timeout();
            return true;
        }
        trace!("{}: {:?} phase waiting at {}", self.scenario, phase, now);
        env.ctx.post_event(SimTime::from_secs(poll_interval_s), retry);
        false
    }

    fn sensor_reading(&mut self, sensor: NodeId, sequence: u32, env: &mut RunEnv<'_>) -> Result<(), SimError> {
        let sender_pos = env.topology.position(sensor).ok_or(SimError::UnknownNode(sensor))?;
        let receiver_pos = env
            .topology
            .position(NodeId::COORDINATOR)
            .ok_or(SimError::UnknownNode(NodeId::COORDINATOR))?;
        let now = env.ctx.time();

        let attempt = env.evaluator.evaluate(
            &Transmission {
                sender: sensor,
                receiver: NodeId::COORDINATOR,
                sender_pos,
                receiver_pos,
                payload_bytes: self.plan.payload_bytes,
                sent_at: now,
            },
            env.ctx.rng(),
        );
        env.stats.record(&attempt);
        if let Some(trace) = env.trace.as_deref_mut() {
            trace.record_link(&attempt);
        }

        let labels = [("scenario", self.scenario.clone())];
        metrics::counter!(metric_defs::TX_ATTEMPTS.name, &labels).increment(1);
        metrics::histogram!(metric_defs::SNR_DB.name, &labels).record(attempt.link.snr_db);

        let outcome = attempt.outcome();
        if outcome != Outcome::Delivered {
            debug!(
                "{}: reading {} from {} dropped ({}, SNR {:.2} dB, Rx {:.2} dBm)",
                self.scenario,
                sequence,
                sensor,
                outcome.as_label(),
                attempt.link.snr_db,
                attempt.link.rx_power_dbm
            );
            metrics::counter!(
                metric_defs::TX_DROPPED.name,
                "scenario" => self.scenario.clone(),
                "cause" => outcome.as_label()
            )
            .increment(1);
            return Ok(());
        }

        let message = env.ctx.next_message_id();
        env.stats.track_send(message, sensor, now);
        self.report_in_flight(env);
        trace!("{}: reading {} from {} sent as {:?}", self.scenario, sequence, sensor, message);
        env.stack.send_data(
            &DataRequest {
                message,
                source: sensor,
                destination: DataDestination::Unicast(NodeId::COORDINATOR),
                payload_bytes: self.plan.payload_bytes,
            },
            env.ctx,
        );
        Ok(())
    }

    fn group_command(&mut self, group: GroupAddress, command: u8, env: &mut RunEnv<'_>) {
        env.stats.record_group_command();
        let message: MessageId = env.ctx.next_message_id();
        debug!("{}: command 0x{:02x} to {}", self.scenario, command, group);
        env.stack.send_data(
            &DataRequest {
                message,
                source: NodeId::COORDINATOR,
                destination: DataDestination::Group(group),
                payload_bytes: GROUP_COMMAND_BYTES,
            },
            env.ctx,
        );
    }

    // ---- stack callbacks ----

    fn on_formation(&mut self, confirm: &FormationConfirm) -> Result<(), SimError> {
        match (&confirm.network, confirm.status.is_success()) {
            (Some(network), true) => {
                info!(
                    "{}: network formed, PAN 0x{:04x} channel {}",
                    self.scenario, network.pan_id, network.channel
                );
                self.network = Some(network.clone());
                self.set_state(confirm.node, NodeState::Formed)
            }
            _ => {
                warn!("{}: network formation failed: {}", self.scenario, confirm.status.as_label());
                Ok(())
            }
        }
    }

    fn on_discovery(&mut self, confirm: &DiscoveryConfirm, env: &mut RunEnv<'_>) -> Result<(), SimError> {
        let node = confirm.node;
        let network = confirm
            .networks
            .first()
            .filter(|_| confirm.status.is_success());
        let Some(network) = network else {
            warn!(
                "{}: {} discovery failed: {}",
                self.scenario,
                node,
                confirm.status.as_label()
            );
            env.stats.record_discovery_failure();
            return self.set_state(node, NodeState::Unjoined);
        };

        env.stats.record_join_attempt();
        self.set_state(node, NodeState::Joining)?;
        debug!("{}: {} joining PAN 0x{:04x}", self.scenario, node, network.pan_id);
        env.stack.join(
            node,
            &JoinRequest {
                network: network.clone(),
                capability: CapabilityInfo::router(),
            },
            env.ctx,
        );
        Ok(())
    }

    fn on_join(&mut self, confirm: &JoinConfirm, env: &mut RunEnv<'_>) -> Result<(), SimError> {
        let node = confirm.node;
        metrics::counter!(
            metric_defs::JOINS.name,
            "scenario" => self.scenario.clone(),
            "result" => confirm.status.as_label()
        )
        .increment(1);

        if !confirm.status.is_success() {
            warn!("{}: {} join failed: {}", self.scenario, node, confirm.status.as_label());
            return self.set_state(node, NodeState::Unjoined);
        }

        env.stats.record_join_success();
        self.set_state(node, NodeState::Active)?;
        if let Some(address) = confirm.address {
            debug!("{}: {} joined as {}", self.scenario, node, address);
        }
        env.stack.start_router(node, env.ctx);
        Ok(())
    }

    fn on_route(&mut self, confirm: &RouteDiscoveryConfirm, env: &mut RunEnv<'_>) {
        env.stats.record_route_discovery();
        metrics::counter!(
            metric_defs::ROUTE_DISCOVERIES.name,
            "scenario" => self.scenario.clone(),
            "result" => confirm.status.as_label()
        )
        .increment(1);

        if confirm.status.is_success() {
            self.route_confirmed = true;
            info!("{}: route discovery {:?} confirmed", self.scenario, confirm.target);
        } else {
            warn!(
                "{}: route discovery {:?} failed: {}",
                self.scenario,
                confirm.target,
                confirm.status.as_label()
            );
        }
    }

    fn on_data(&mut self, indication: &DataIndication, env: &mut RunEnv<'_>) {
        let now = env.ctx.time();
        let delay_ms = match indication.destination {
            DataDestination::Unicast(_) => {
                let delay = env
                    .stats
                    .record_delay(indication.message, now, indication.payload_bytes);
                if let Some(delay) = delay {
                    let labels = [("scenario", self.scenario.clone())];
                    metrics::counter!(metric_defs::RX_DELIVERED.name, &labels).increment(1);
                    metrics::histogram!(metric_defs::DELAY_MS.name, &labels).record(delay);
                    self.report_in_flight(env);
                }
                delay
            }
            DataDestination::Group(group) => {
                env.stats.record_group_delivery();
                trace!("{}: {} received command for {}", self.scenario, indication.node, group);
                None
            }
        };
        if let Some(trace) = env.trace.as_deref_mut() {
            trace.record_delivery(now, indication, delay_ms);
        }
    }

    fn report_in_flight(&self, env: &RunEnv<'_>) {
        metrics::gauge!(metric_defs::IN_FLIGHT.name, "scenario" => self.scenario.clone())
            .set(env.stats.in_flight() as f64);
    }

    fn on_data_confirm(&mut self, confirm: &DataConfirm, env: &mut RunEnv<'_>) {
        if confirm.status.is_success() {
            return;
        }
        if env.stats.record_protocol_failure(confirm.message) {
            self.report_in_flight(env);
            warn!(
                "{}: send {:?} from {} failed: {}",
                self.scenario,
                confirm.message,
                confirm.node,
                confirm.status.as_label()
            );
        } else {
            debug!(
                "{}: untracked send {:?} from {} failed: {}",
                self.scenario,
                confirm.message,
                confirm.node,
                confirm.status.as_label()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(nodes: usize) -> LifecyclePlan {
        LifecyclePlan::from_config(&ScenarioConfig {
            nodes,
            ..Default::default()
        })
    }

    #[test]
    fn test_default_timeline() {
        let plan = plan(6);
        assert_eq!(plan.formation_at, SimTime::from_secs(1.0));
        let discoveries: Vec<f64> = plan.discoveries.iter().map(|(_, t)| t.as_secs_f64()).collect();
        assert_eq!(discoveries, vec![3.0, 5.0, 7.0, 9.0, 11.0]);
        assert_eq!(plan.routes_at, SimTime::from_secs(16.0));
        assert_eq!(plan.data_at, SimTime::from_secs(21.0));
        assert_eq!(plan.route_target, RouteTarget::ManyToOne);
    }

    #[test]
    fn test_last_reading_fits_default_horizon() {
        let plan = plan(6);
        let last = plan.data_at + plan.reading_offset(0, 49);
        assert_eq!(last, SimTime::from_secs(119.0));
        assert!(last < plan.horizon);
    }

    #[test]
    fn test_reading_offset_saturates() {
        let mut config = ScenarioConfig::default();
        config.workload.interval_s = 1e15;
        config.timing.sensor_stagger_s = 1e15;
        let plan = LifecyclePlan::from_config(&config);
        assert_eq!(plan.reading_offset(7, u32::MAX), SimTime::from_micros(u64::MAX));
        assert!(plan.data_at + plan.reading_offset(7, u32::MAX) >= plan.horizon);
    }

    #[test]
    fn test_sensor_stagger() {
        let plan = plan(10);
        assert_eq!(plan.reading_offset(2, 3), SimTime::from_secs(10.0));
    }

    #[test]
    fn test_group_joins_follow_member_discovery() {
        let plan = plan(6);
        // Node 4 discovers at 9 s, node 5 at 11 s.
        let joins: Vec<(f64, u32, u16)> = plan
            .group_joins
            .iter()
            .map(|(t, n, g)| (t.as_secs_f64(), n.0, g.0))
            .collect();
        assert_eq!(
            joins,
            vec![(11.0, 4, 0x0001), (11.0, 4, 0x0003), (13.0, 5, 0x0002), (13.1, 5, 0x0003)]
        );
    }

    #[test]
    fn test_mesh_plan_targets_far_node() {
        let plan = LifecyclePlan::from_config(&ScenarioConfig {
            nodes: 4,
            routing: RoutingMode::Mesh,
            ..Default::default()
        });
        // 2x2 grid: node 3 sits on the diagonal.
        assert_eq!(plan.route_target, RouteTarget::Node(NodeId(3)));
    }

    #[test]
    fn test_initial_states() {
        let config = ScenarioConfig {
            nodes: 4,
            ..Default::default()
        };
        let lifecycle = Lifecycle::new(&config, LifecyclePlan::from_config(&config));
        assert_eq!(lifecycle.state(NodeId(0)), Some(NodeState::Unformed));
        assert_eq!(lifecycle.state(NodeId(3)), Some(NodeState::Unjoined));
        assert_eq!(lifecycle.state(NodeId(4)), None);
        assert!(!lifecycle.routes_started());
    }
}
