//! # zbsim-stack
//!
//! The seam between the lifecycle workflow and a ZigBee protocol stack.
//!
//! The workflow only issues requests through [`ProtocolStack`] and reacts to
//! the confirmation and indication events the stack posts back into the
//! [`SimContext`]. Association, address allocation and route discovery belong
//! to the stack.
//!
//! [`SimulatedStack`] is a reference stack that answers every request after a
//! fixed latency. It tracks membership and routes well enough to reject
//! requests a real stack would reject, and nothing more.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};
use zbsim_common::{
    DataConfirm, DataDestination, DataIndication, DiscoveryConfirm, EventPayload, FormationConfirm,
    GroupAddress, JoinConfirm, MessageId, NetworkAddress, NetworkDescriptor, NodeId,
    RouteDiscoveryConfirm, RouteTarget, SimContext, SimTime, StackStatus,
};

// ============================================================================
// Requests
// ============================================================================

/// Role requested when joining.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    /// Full-function device that routes for others.
    Router,
    /// Reduced-function end device.
    EndDevice,
}

/// Capability descriptor sent with a join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityInfo {
    /// Requested role.
    pub device_type: DeviceType,
    /// Mains powered.
    pub mains_powered: bool,
    /// Receiver stays on when idle.
    pub rx_on_when_idle: bool,
    /// Ask the parent to allocate a short address.
    pub allocate_address: bool,
}

impl CapabilityInfo {
    /// Capabilities of a mains-powered router.
    pub fn router() -> Self {
        Self {
            device_type: DeviceType::Router,
            mains_powered: true,
            rx_on_when_idle: true,
            allocate_address: true,
        }
    }
}

/// Network discovery parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryRequest {
    /// Channel bitmask (bit n set scans channel n).
    pub scan_channels: u32,
    /// MAC scan duration exponent.
    pub scan_duration: u8,
}

impl Default for DiscoveryRequest {
    fn default() -> Self {
        Self {
            scan_channels: 0x07FF_F800,
            scan_duration: 2,
        }
    }
}

/// Join parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinRequest {
    /// Network to join.
    pub network: NetworkDescriptor,
    /// Capabilities announced to the parent.
    pub capability: CapabilityInfo,
}

/// Application data send.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataRequest {
    /// Correlation id.
    pub message: MessageId,
    /// Sending node.
    pub source: NodeId,
    /// Unicast or groupcast destination.
    pub destination: DataDestination,
    /// Application payload size in bytes.
    pub payload_bytes: u32,
}

// ============================================================================
// Protocol Stack Trait
// ============================================================================

/// Requests the lifecycle workflow issues to the protocol stack.
///
/// Implementations answer by posting [`EventPayload`] callbacks into `ctx`:
/// [`FormationConfirm`], [`DiscoveryConfirm`], [`JoinConfirm`],
/// [`RouteDiscoveryConfirm`], [`DataIndication`] and [`DataConfirm`].
pub trait ProtocolStack {
    /// Form a network with `node` as coordinator.
    fn form_network(&mut self, node: NodeId, ctx: &mut SimContext);

    /// Scan for networks to join.
    fn discover_networks(&mut self, node: NodeId, request: &DiscoveryRequest, ctx: &mut SimContext);

    /// Associate with a discovered network.
    fn join(&mut self, node: NodeId, request: &JoinRequest, ctx: &mut SimContext);

    /// Enable routing on a joined node. No confirmation.
    fn start_router(&mut self, node: NodeId, ctx: &mut SimContext);

    /// Discover a route from `node`.
    fn discover_route(&mut self, node: NodeId, target: RouteTarget, ctx: &mut SimContext);

    /// Send application data.
    fn send_data(&mut self, request: &DataRequest, ctx: &mut SimContext);

    /// Add `node` to a group. No confirmation.
    fn add_group(&mut self, node: NodeId, group: GroupAddress, ctx: &mut SimContext);
}

// ============================================================================
// Simulated Stack
// ============================================================================

/// Latencies and failure rates of [`SimulatedStack`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StackConfig {
    /// Formation request to confirmation, seconds.
    pub formation_latency_s: f64,
    /// Discovery request to confirmation, seconds.
    pub discovery_latency_s: f64,
    /// Join request to confirmation, seconds.
    pub join_latency_s: f64,
    /// Route request to confirmation, seconds.
    pub route_latency_s: f64,
    /// Per-frame processing delay added to the airtime, milliseconds.
    pub processing_delay_ms: f64,
    /// PHY data rate used for airtime, bits per second.
    pub data_rate_bps: f64,
    /// Header bytes added to every payload for airtime.
    pub overhead_bytes: u32,
    /// Probability that an otherwise valid join is refused.
    pub join_failure_probability: f64,
    /// Probability that an otherwise valid data send fails.
    pub data_failure_probability: f64,
    /// PAN id of the formed network.
    pub pan_id: u16,
    /// Extended PAN id of the formed network.
    pub extended_pan_id: u64,
    /// IEEE 802.15.4 channel.
    pub channel: u8,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            formation_latency_s: 0.1,
            discovery_latency_s: 0.25,
            join_latency_s: 0.05,
            route_latency_s: 0.1,
            processing_delay_ms: 2.0,
            data_rate_bps: 250_000.0,
            overhead_bytes: 39,
            join_failure_probability: 0.0,
            data_failure_probability: 0.0,
            pan_id: 0x1a62,
            extended_pan_id: 0x00124b_0001_0203,
            channel: 11,
        }
    }
}

impl StackConfig {
    /// Set the join failure probability.
    pub fn with_join_failures(mut self, probability: f64) -> Self {
        self.join_failure_probability = probability;
        self
    }

    /// Set the data send failure probability.
    pub fn with_data_failures(mut self, probability: f64) -> Self {
        self.data_failure_probability = probability;
        self
    }

    /// Check parameter ranges.
    pub fn validate(&self) -> Result<(), String> {
        let latencies = [
            ("formation_latency_s", self.formation_latency_s),
            ("discovery_latency_s", self.discovery_latency_s),
            ("join_latency_s", self.join_latency_s),
            ("route_latency_s", self.route_latency_s),
            ("processing_delay_ms", self.processing_delay_ms),
        ];
        for (name, value) in latencies {
            if !(value.is_finite() && value >= 0.0) {
                return Err(format!("stack.{} must be >= 0, got {}", name, value));
            }
        }
        for (name, p) in [
            ("join_failure_probability", self.join_failure_probability),
            ("data_failure_probability", self.data_failure_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(format!("stack.{} must be within [0, 1], got {}", name, p));
            }
        }
        if !(self.data_rate_bps.is_finite() && self.data_rate_bps > 0.0) {
            return Err(format!("stack.data_rate_bps must be > 0, got {}", self.data_rate_bps));
        }
        if !(11..=26).contains(&self.channel) {
            return Err(format!("stack.channel must be within 11-26, got {}", self.channel));
        }
        Ok(())
    }

    /// Time from a data request to its indication.
    pub fn delivery_delay(&self, payload_bytes: u32) -> SimTime {
        let airtime_s = f64::from(payload_bytes + self.overhead_bytes) * 8.0 / self.data_rate_bps;
        SimTime::from_secs(airtime_s + self.processing_delay_ms / 1000.0)
    }
}

/// Lowest short address handed to joining nodes.
const FIRST_ADDRESS: u16 = 0x0001;
/// Start of the reserved broadcast range.
const RESERVED_ADDRESSES: u16 = 0xfff8;
/// Random draws before falling back to the first free address.
const ADDRESS_ATTEMPTS: usize = 64;

/// Reference [`ProtocolStack`] answering requests after fixed latencies.
pub struct SimulatedStack {
    config: StackConfig,
    rng: ChaCha8Rng,
    network: Option<NetworkDescriptor>,
    addresses: Vec<Option<NetworkAddress>>,
    assigned: BTreeSet<u16>,
    routers: BTreeSet<NodeId>,
    groups: BTreeMap<GroupAddress, BTreeSet<NodeId>>,
    concentrator_routes: bool,
    routes: BTreeSet<(NodeId, NodeId)>,
}

impl SimulatedStack {
    /// Create a stack for `node_count` nodes drawing from `rng`.
    pub fn new(config: StackConfig, node_count: usize, rng: ChaCha8Rng) -> Self {
        Self {
            config,
            rng,
            network: None,
            addresses: vec![None; node_count],
            assigned: BTreeSet::new(),
            routers: BTreeSet::new(),
            groups: BTreeMap::new(),
            concentrator_routes: false,
            routes: BTreeSet::new(),
        }
    }

    /// Short address of `node`, if it is on the network.
    pub fn address(&self, node: NodeId) -> Option<NetworkAddress> {
        self.addresses.get(node.index()).copied().flatten()
    }

    /// Whether `node` is on the network.
    pub fn is_joined(&self, node: NodeId) -> bool {
        self.address(node).is_some()
    }

    /// Whether `node` has routing enabled.
    pub fn is_router(&self, node: NodeId) -> bool {
        self.routers.contains(&node)
    }

    /// Members of `group`.
    pub fn group_members(&self, group: GroupAddress) -> impl Iterator<Item = NodeId> + '_ {
        self.groups.get(&group).into_iter().flatten().copied()
    }

    /// Whether many-to-one routes toward the coordinator are established.
    pub fn has_concentrator_routes(&self) -> bool {
        self.concentrator_routes
    }

    fn allocate_address(&mut self) -> Option<NetworkAddress> {
        // Stochastic addressing, skipping the coordinator and reserved ranges.
        for _ in 0..ADDRESS_ATTEMPTS {
            let candidate = self.rng.gen_range(FIRST_ADDRESS..RESERVED_ADDRESSES);
            if self.assigned.insert(candidate) {
                return Some(NetworkAddress(candidate));
            }
        }
        let free = (FIRST_ADDRESS..RESERVED_ADDRESSES).find(|a| !self.assigned.contains(a))?;
        self.assigned.insert(free);
        Some(NetworkAddress(free))
    }

    fn roll(&mut self, probability: f64) -> bool {
        probability > 0.0 && self.rng.gen::<f64>() < probability
    }

    fn confirm_data(&self, request: &DataRequest, status: StackStatus, delay: SimTime, ctx: &mut SimContext) {
        ctx.post_event(
            delay,
            EventPayload::DataConfirm(DataConfirm {
                node: request.source,
                message: request.message,
                status,
            }),
        );
    }
}

impl ProtocolStack for SimulatedStack {
    fn form_network(&mut self, node: NodeId, ctx: &mut SimContext) {
        let latency = SimTime::from_secs(self.config.formation_latency_s);
        if !node.is_coordinator() || self.network.is_some() {
            ctx.post_event(
                latency,
                EventPayload::FormationConfirm(FormationConfirm {
                    node,
                    status: StackStatus::InvalidRequest,
                    network: None,
                }),
            );
            return;
        }

        let network = NetworkDescriptor {
            extended_pan_id: self.config.extended_pan_id,
            pan_id: self.config.pan_id,
            channel: self.config.channel,
            permit_joining: true,
        };
        self.network = Some(network.clone());
        if let Some(slot) = self.addresses.get_mut(node.index()) {
            *slot = Some(NetworkAddress::COORDINATOR);
        }
        self.routers.insert(node);
        debug!("Stack: {} formed PAN 0x{:04x} on channel {}", node, network.pan_id, network.channel);
        ctx.post_event(
            latency,
            EventPayload::FormationConfirm(FormationConfirm {
                node,
                status: StackStatus::Success,
                network: Some(network),
            }),
        );
    }

    fn discover_networks(&mut self, node: NodeId, request: &DiscoveryRequest, ctx: &mut SimContext) {
        let networks: Vec<NetworkDescriptor> = self
            .network
            .iter()
            .filter(|n| n.permit_joining && request.scan_channels & (1 << n.channel) != 0)
            .cloned()
            .collect();
        let status = if networks.is_empty() {
            StackStatus::NoNetworks
        } else {
            StackStatus::Success
        };
        trace!("Stack: {} discovery found {} network(s)", node, networks.len());
        ctx.post_event(
            SimTime::from_secs(self.config.discovery_latency_s),
            EventPayload::DiscoveryConfirm(DiscoveryConfirm {
                node,
                status,
                networks,
            }),
        );
    }

    fn join(&mut self, node: NodeId, request: &JoinRequest, ctx: &mut SimContext) {
        let on_network = self
            .network
            .as_ref()
            .is_some_and(|n| n.extended_pan_id == request.network.extended_pan_id);
        let in_topology = node.index() < self.addresses.len();

        let (status, address) = if !on_network || !in_topology || self.is_joined(node) {
            (StackStatus::InvalidRequest, None)
        } else if self.roll(self.config.join_failure_probability) {
            (StackStatus::NotPermitted, None)
        } else if let Some(address) = self.allocate_address() {
            self.addresses[node.index()] = Some(address);
            (StackStatus::Success, Some(address))
        } else {
            debug!("Stack: no short address left for {}", node);
            (StackStatus::NotPermitted, None)
        };

        ctx.post_event(
            SimTime::from_secs(self.config.join_latency_s),
            EventPayload::JoinConfirm(JoinConfirm {
                node,
                status,
                address,
            }),
        );
    }

    fn start_router(&mut self, node: NodeId, _ctx: &mut SimContext) {
        if self.is_joined(node) {
            self.routers.insert(node);
            trace!("Stack: {} routing enabled", node);
        } else {
            debug!("Stack: start router ignored, {} is not on the network", node);
        }
    }

    fn discover_route(&mut self, node: NodeId, target: RouteTarget, ctx: &mut SimContext) {
        let status = match target {
            RouteTarget::ManyToOne if self.is_joined(node) => {
                self.concentrator_routes = true;
                StackStatus::Success
            }
            RouteTarget::Node(dest) if self.is_joined(node) && self.is_joined(dest) => {
                self.routes.insert((node, dest));
                self.routes.insert((dest, node));
                StackStatus::Success
            }
            _ => StackStatus::RouteError,
        };
        ctx.post_event(
            SimTime::from_secs(self.config.route_latency_s),
            EventPayload::RouteDiscoveryConfirm(RouteDiscoveryConfirm {
                node,
                status,
                target,
            }),
        );
    }

    fn send_data(&mut self, request: &DataRequest, ctx: &mut SimContext) {
        let delay = self.config.delivery_delay(request.payload_bytes);

        if !self.is_joined(request.source) {
            self.confirm_data(request, StackStatus::InvalidRequest, delay, ctx);
            return;
        }

        let receivers: Vec<NodeId> = match request.destination {
            DataDestination::Unicast(dest) => {
                if !self.is_joined(dest) {
                    self.confirm_data(request, StackStatus::RouteError, delay, ctx);
                    return;
                }
                vec![dest]
            }
            DataDestination::Group(group) => self
                .group_members(group)
                .filter(|member| *member != request.source && self.is_joined(*member))
                .collect(),
        };

        if self.roll(self.config.data_failure_probability) {
            self.confirm_data(request, StackStatus::RouteError, delay, ctx);
            return;
        }

        for node in receivers {
            ctx.post_event(
                delay,
                EventPayload::DataIndication(DataIndication {
                    node,
                    source: request.source,
                    destination: request.destination,
                    message: request.message,
                    payload_bytes: request.payload_bytes,
                }),
            );
        }
        self.confirm_data(request, StackStatus::Success, delay, ctx);
    }

    fn add_group(&mut self, node: NodeId, group: GroupAddress, _ctx: &mut SimContext) {
        if !self.is_joined(node) {
            debug!("Stack: {} cannot join {} before joining the network", node, group);
            return;
        }
        self.groups.entry(group).or_default().insert(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn stack(nodes: usize) -> (SimulatedStack, SimContext) {
        let ctx = SimContext::new(42);
        let rng = ctx.fork_rng(1);
        (SimulatedStack::new(StackConfig::default(), nodes, rng), ctx)
    }

    fn formed(nodes: usize) -> (SimulatedStack, SimContext, NetworkDescriptor) {
        let (mut stack, mut ctx) = stack(nodes);
        stack.form_network(NodeId::COORDINATOR, &mut ctx);
        let events = ctx.take_pending_events();
        let network = match &events[0].payload {
            EventPayload::FormationConfirm(c) => c.network.clone().unwrap(),
            other => panic!("unexpected {:?}", other),
        };
        (stack, ctx, network)
    }

    fn join_all(stack: &mut SimulatedStack, ctx: &mut SimContext, network: &NetworkDescriptor, nodes: u32) {
        for i in 1..nodes {
            let request = JoinRequest {
                network: network.clone(),
                capability: CapabilityInfo::router(),
            };
            stack.join(NodeId(i), &request, ctx);
        }
        ctx.take_pending_events();
    }

    #[test]
    fn test_formation_then_discovery() {
        let (mut stack, mut ctx, network) = formed(4);
        assert_eq!(stack.address(NodeId::COORDINATOR), Some(NetworkAddress::COORDINATOR));
        assert_eq!(network.channel, 11);

        stack.discover_networks(NodeId(1), &DiscoveryRequest::default(), &mut ctx);
        let events = ctx.take_pending_events();
        match &events[0].payload {
            EventPayload::DiscoveryConfirm(c) => {
                assert_eq!(c.status, StackStatus::Success);
                assert_eq!(c.networks.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(events[0].time, SimTime::from_secs(0.25));
    }

    #[test]
    fn test_discovery_without_network() {
        let (mut stack, mut ctx) = stack(4);
        stack.discover_networks(NodeId(1), &DiscoveryRequest::default(), &mut ctx);
        match &ctx.take_pending_events()[0].payload {
            EventPayload::DiscoveryConfirm(c) => assert_eq!(c.status, StackStatus::NoNetworks),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_second_formation_rejected() {
        let (mut stack, mut ctx, _) = formed(3);
        stack.form_network(NodeId::COORDINATOR, &mut ctx);
        match &ctx.take_pending_events()[0].payload {
            EventPayload::FormationConfirm(c) => assert_eq!(c.status, StackStatus::InvalidRequest),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_join_assigns_unique_addresses() {
        let (mut stack, mut ctx, network) = formed(10);
        join_all(&mut stack, &mut ctx, &network, 10);
        let addresses: BTreeSet<u16> = (0..10).map(|i| stack.address(NodeId(i)).unwrap().0).collect();
        assert_eq!(addresses.len(), 10);
    }

    #[test]
    fn test_join_refused_when_addresses_exhausted() {
        let (mut stack, mut ctx, network) = formed(3);
        stack.assigned = (FIRST_ADDRESS..RESERVED_ADDRESSES).collect();
        let request = JoinRequest {
            network,
            capability: CapabilityInfo::router(),
        };
        stack.join(NodeId(1), &request, &mut ctx);
        let events = ctx.take_pending_events();
        match &events[0].payload {
            EventPayload::JoinConfirm(c) => {
                assert_eq!(c.status, StackStatus::NotPermitted);
                assert!(c.address.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!stack.is_joined(NodeId(1)));
    }

    #[test]
    fn test_address_falls_back_to_first_free() {
        let (mut stack, _ctx, _network) = formed(3);
        stack.assigned = (FIRST_ADDRESS..RESERVED_ADDRESSES).filter(|a| *a != 0x1234).collect();
        assert_eq!(stack.allocate_address(), Some(NetworkAddress(0x1234)));
        assert_eq!(stack.allocate_address(), None);
    }

    #[test]
    fn test_join_failures_are_reported() {
        let mut ctx = SimContext::new(7);
        let config = StackConfig::default().with_join_failures(1.0);
        let mut stack = SimulatedStack::new(config, 3, ChaCha8Rng::seed_from_u64(7));
        stack.form_network(NodeId::COORDINATOR, &mut ctx);
        let network = stack.network.clone().unwrap();
        ctx.take_pending_events();

        stack.join(
            NodeId(1),
            &JoinRequest {
                network,
                capability: CapabilityInfo::router(),
            },
            &mut ctx,
        );
        match &ctx.take_pending_events()[0].payload {
            EventPayload::JoinConfirm(c) => {
                assert_eq!(c.status, StackStatus::NotPermitted);
                assert_eq!(c.address, None);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!stack.is_joined(NodeId(1)));
    }

    #[test]
    fn test_unicast_data_delivers_then_confirms() {
        let (mut stack, mut ctx, network) = formed(4);
        join_all(&mut stack, &mut ctx, &network, 4);

        let request = DataRequest {
            message: MessageId(1),
            source: NodeId(3),
            destination: DataDestination::Unicast(NodeId::COORDINATOR),
            payload_bytes: 20,
        };
        stack.send_data(&request, &mut ctx);
        let events = ctx.take_pending_events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].payload, EventPayload::DataIndication(ref i) if i.node == NodeId::COORDINATOR));
        assert!(matches!(events[1].payload, EventPayload::DataConfirm(ref c) if c.status.is_success()));
        // 59 bytes at 250 kbit/s plus 2 ms processing.
        assert_eq!(events[0].time.as_micros(), 1888 + 2000);
    }

    #[test]
    fn test_data_from_unjoined_node_fails() {
        let (mut stack, mut ctx, _) = formed(4);
        let request = DataRequest {
            message: MessageId(5),
            source: NodeId(2),
            destination: DataDestination::Unicast(NodeId::COORDINATOR),
            payload_bytes: 20,
        };
        stack.send_data(&request, &mut ctx);
        let events = ctx.take_pending_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].payload, EventPayload::DataConfirm(ref c) if !c.status.is_success()));
    }

    #[test]
    fn test_groupcast_reaches_joined_members() {
        let (mut stack, mut ctx, network) = formed(6);
        join_all(&mut stack, &mut ctx, &network, 6);
        let group = GroupAddress(0x0003);
        stack.add_group(NodeId(4), group, &mut ctx);
        stack.add_group(NodeId(5), group, &mut ctx);

        stack.send_data(
            &DataRequest {
                message: MessageId(2),
                source: NodeId::COORDINATOR,
                destination: DataDestination::Group(group),
                payload_bytes: 4,
            },
            &mut ctx,
        );
        let indications = ctx
            .take_pending_events()
            .into_iter()
            .filter(|e| matches!(e.payload, EventPayload::DataIndication(_)))
            .count();
        assert_eq!(indications, 2);
    }

    #[test]
    fn test_config_validation() {
        assert!(StackConfig::default().validate().is_ok());
        assert!(StackConfig::default().with_join_failures(1.5).validate().is_err());
        let bad_channel = StackConfig {
            channel: 30,
            ..Default::default()
        };
        assert!(bad_channel.validate().is_err());
    }

    #[test]
    fn test_route_discovery() {
        let (mut stack, mut ctx, network) = formed(5);
        join_all(&mut stack, &mut ctx, &network, 3);

        stack.discover_route(NodeId::COORDINATOR, RouteTarget::ManyToOne, &mut ctx);
        stack.discover_route(NodeId::COORDINATOR, RouteTarget::Node(NodeId(2)), &mut ctx);
        stack.discover_route(NodeId::COORDINATOR, RouteTarget::Node(NodeId(4)), &mut ctx);
        let statuses: Vec<StackStatus> = ctx
            .take_pending_events()
            .into_iter()
            .filter_map(|e| match e.payload {
                EventPayload::RouteDiscoveryConfirm(c) => Some(c.status),
                _ => None,
            })
            .collect();
        assert_eq!(
            statuses,
            vec![StackStatus::Success, StackStatus::Success, StackStatus::RouteError]
        );
        assert!(stack.has_concentrator_routes());
    }
}
