//! # zbsim-common
//!
//! Common types for the zbsim discrete-event ZigBee simulator.
//!
//! This crate provides core simulation primitives including:
//! - Time representation ([`SimTime`])
//! - Planar node placement ([`Position`])
//! - Node and address identification ([`NodeId`], [`NetworkAddress`], [`GroupAddress`])
//! - Event system ([`Event`], [`EventPayload`])
//! - Protocol stack callbacks ([`DiscoveryConfirm`], [`JoinConfirm`], [`DataIndication`], ...)
//! - Simulation context ([`SimContext`])

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Simulation errors.
#[derive(Debug, Error)]
pub enum SimError {
    /// Node is not part of the topology.
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    /// Simulation time overflow.
    #[error("Simulation time overflow")]
    TimeOverflow,

    /// Event handler error.
    #[error("Event handler error at {node}: {message}")]
    HandlerError {
        /// Node whose handler failed.
        node: NodeId,
        /// Error message.
        message: String,
    },
}

// ============================================================================
// Time Types
// ============================================================================

/// Simulation time in microseconds since simulation start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct SimTime(u64);

impl SimTime {
    /// Zero time.
    pub const ZERO: SimTime = SimTime(0);

    /// Create from microseconds.
    pub fn from_micros(us: u64) -> Self {
        SimTime(us)
    }

    /// Create from milliseconds.
    pub fn from_millis(ms: u64) -> Self {
        SimTime(ms * 1000)
    }

    /// Create from seconds (float). Negative values clamp to zero.
    ///
    /// Rounds to the nearest microsecond so offsets such as `2.3` do not land
    /// one tick early.
    pub fn from_secs(s: f64) -> Self {
        SimTime((s * 1_000_000.0).round().max(0.0) as u64)
    }

    /// Get as microseconds.
    pub fn as_micros(&self) -> u64 {
        self.0
    }

    /// Get as milliseconds.
    pub fn as_millis(&self) -> u64 {
        self.0 / 1000
    }

    /// Get as milliseconds (float).
    pub fn as_millis_f64(&self) -> f64 {
        self.0 as f64 / 1000.0
    }

    /// Get as seconds (float).
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    /// Add duration to time.
    pub fn checked_add(&self, duration: SimTime) -> Option<SimTime> {
        self.0.checked_add(duration.0).map(SimTime)
    }

    /// Subtract duration from time.
    pub fn checked_sub(&self, duration: SimTime) -> Option<SimTime> {
        self.0.checked_sub(duration.0).map(SimTime)
    }
}

impl std::ops::Add for SimTime {
    type Output = SimTime;

    fn add(self, rhs: Self) -> Self::Output {
        SimTime(self.0.saturating_add(rhs.0))
    }
}

impl std::ops::Sub for SimTime {
    type Output = SimTime;

    fn sub(self, rhs: Self) -> Self::Output {
        SimTime(self.0.saturating_sub(rhs.0))
    }
}

impl std::fmt::Display for SimTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3}s", self.as_secs_f64())
    }
}

// ============================================================================
// Placement Types
// ============================================================================

/// Node position on the floor plan, in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate in meters.
    pub x: f64,
    /// Y coordinate in meters.
    pub y: f64,
}

impl Position {
    /// Create a new position.
    pub fn new(x: f64, y: f64) -> Self {
        Position { x, y }
    }

    /// Euclidean distance to another position in meters.
    pub fn distance_to(&self, other: &Position) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

// ============================================================================
// Identifier Types
// ============================================================================

/// Index of a node in the scenario topology. Node 0 is the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    /// The network coordinator.
    pub const COORDINATOR: NodeId = NodeId(0);

    /// Index into per-node tables.
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    /// Whether this node is the coordinator.
    pub fn is_coordinator(&self) -> bool {
        *self == Self::COORDINATOR
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node{}", self.0)
    }
}

/// 16-bit NWK short address assigned on join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkAddress(pub u16);

impl NetworkAddress {
    /// Address held by the coordinator.
    pub const COORDINATOR: NetworkAddress = NetworkAddress(0x0000);
}

impl std::fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// 16-bit group address for groupcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupAddress(pub u16);

impl std::fmt::Display for GroupAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "group:0x{:04x}", self.0)
    }
}

/// Identifier correlating a data send with its indication and confirm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u64);

// ============================================================================
// Protocol Stack Callbacks
// ============================================================================

/// Status reported by the protocol stack in confirmations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StackStatus {
    /// Request completed.
    Success,
    /// Discovery found no network to join.
    NoNetworks,
    /// Parent refused the association.
    NotPermitted,
    /// No route to the destination.
    RouteError,
    /// Request made in a state that does not allow it.
    InvalidRequest,
}

impl StackStatus {
    /// Whether the status signals success.
    pub fn is_success(&self) -> bool {
        matches!(self, StackStatus::Success)
    }

    /// Label used in logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            StackStatus::Success => "success",
            StackStatus::NoNetworks => "no_networks",
            StackStatus::NotPermitted => "not_permitted",
            StackStatus::RouteError => "route_error",
            StackStatus::InvalidRequest => "invalid_request",
        }
    }
}

/// A network found during discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkDescriptor {
    /// Extended PAN identifier.
    pub extended_pan_id: u64,
    /// Short PAN identifier.
    pub pan_id: u16,
    /// IEEE 802.15.4 channel (11-26).
    pub channel: u8,
    /// Whether the network currently accepts joins.
    pub permit_joining: bool,
}

/// Where a route discovery is aimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteTarget {
    /// Concentrator route from every node toward the sender.
    ManyToOne,
    /// Point-to-point discovery toward one node.
    Node(NodeId),
}

/// Addressing mode of a data send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataDestination {
    /// Unicast to one node.
    Unicast(NodeId),
    /// Groupcast to every member of a group.
    Group(GroupAddress),
}

/// Network formation confirmation.
#[derive(Debug, Clone)]
pub struct FormationConfirm {
    /// Node that formed the network.
    pub node: NodeId,
    /// Result.
    pub status: StackStatus,
    /// The formed network, when successful.
    pub network: Option<NetworkDescriptor>,
}

/// Network discovery confirmation.
#[derive(Debug, Clone)]
pub struct DiscoveryConfirm {
    /// Node that scanned.
    pub node: NodeId,
    /// Result.
    pub status: StackStatus,
    /// Networks found, in scan order.
    pub networks: Vec<NetworkDescriptor>,
}

/// Join (association) confirmation.
#[derive(Debug, Clone)]
pub struct JoinConfirm {
    /// Node that joined.
    pub node: NodeId,
    /// Result.
    pub status: StackStatus,
    /// Short address assigned by the parent.
    pub address: Option<NetworkAddress>,
}

/// Route discovery confirmation.
#[derive(Debug, Clone)]
pub struct RouteDiscoveryConfirm {
    /// Node that issued the discovery.
    pub node: NodeId,
    /// Result.
    pub status: StackStatus,
    /// What the discovery targeted.
    pub target: RouteTarget,
}

/// Payload arrival at a node.
#[derive(Debug, Clone)]
pub struct DataIndication {
    /// Receiving node.
    pub node: NodeId,
    /// Originating node.
    pub source: NodeId,
    /// How the payload was addressed.
    pub destination: DataDestination,
    /// Correlation id assigned at send.
    pub message: MessageId,
    /// Application payload size in bytes.
    pub payload_bytes: u32,
}

/// Transmission-level result of a data request.
#[derive(Debug, Clone)]
pub struct DataConfirm {
    /// Sending node.
    pub node: NodeId,
    /// Correlation id assigned at send.
    pub message: MessageId,
    /// Result.
    pub status: StackStatus,
}

// ============================================================================
// Event Types
// ============================================================================

/// Unique identifier for an event. Also the tie-breaker for equal times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub u64);

/// A simulation event.
#[derive(Debug, Clone)]
pub struct Event {
    /// Unique event ID.
    pub id: EventId,
    /// Time when the event occurs.
    pub time: SimTime,
    /// Event payload.
    pub payload: EventPayload,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering for min-heap (earliest time first, then insertion order)
        other.time.cmp(&self.time).then_with(|| other.id.0.cmp(&self.id.0))
    }
}

/// Event payload variants.
#[derive(Debug, Clone)]
pub enum EventPayload {
    // =========== Lifecycle Workflow ===========
    /// Coordinator forms the network.
    FormNetwork,
    /// A node starts network discovery.
    StartDiscovery {
        /// Node that scans.
        node: NodeId,
    },
    /// A node adds itself to a group.
    JoinGroup {
        /// Member node.
        node: NodeId,
        /// Group to join.
        group: GroupAddress,
    },
    /// Coordinator starts route establishment.
    EstablishRoutes,
    /// The data exchange phase begins.
    StartDataPhase,
    /// A sensor sends one reading to the coordinator.
    SensorReading {
        /// Sending sensor.
        sensor: NodeId,
        /// Reading sequence number for this sensor.
        sequence: u32,
    },
    /// Coordinator sends a command to a group.
    GroupCommand {
        /// Target group.
        group: GroupAddress,
        /// Application command byte.
        command: u8,
    },

    // =========== Protocol Stack Callbacks ===========
    /// Network formation finished.
    FormationConfirm(FormationConfirm),
    /// Network discovery finished.
    DiscoveryConfirm(DiscoveryConfirm),
    /// Join finished.
    JoinConfirm(JoinConfirm),
    /// Route discovery finished.
    RouteDiscoveryConfirm(RouteDiscoveryConfirm),
    /// Payload arrived at a node.
    DataIndication(DataIndication),
    /// Data request finished at the sender.
    DataConfirm(DataConfirm),

    // =========== Simulation Control ===========
    /// End the simulation.
    SimulationEnd,
}

impl EventPayload {
    /// Short label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            EventPayload::FormNetwork => "form_network",
            EventPayload::StartDiscovery { .. } => "start_discovery",
            EventPayload::JoinGroup { .. } => "join_group",
            EventPayload::EstablishRoutes => "establish_routes",
            EventPayload::StartDataPhase => "start_data_phase",
            EventPayload::SensorReading { .. } => "sensor_reading",
            EventPayload::GroupCommand { .. } => "group_command",
            EventPayload::FormationConfirm(_) => "formation_confirm",
            EventPayload::DiscoveryConfirm(_) => "discovery_confirm",
            EventPayload::JoinConfirm(_) => "join_confirm",
            EventPayload::RouteDiscoveryConfirm(_) => "route_discovery_confirm",
            EventPayload::DataIndication(_) => "data_indication",
            EventPayload::DataConfirm(_) => "data_confirm",
            EventPayload::SimulationEnd => "simulation_end",
        }
    }
}

// ============================================================================
// Simulation Context
// ============================================================================

/// Per-run simulation state handed to every handler: the virtual clock, the
/// seeded channel RNG and the events produced while handling.
pub struct SimContext {
    time: SimTime,
    seed: u64,
    rng: ChaCha8Rng,
    pending_events: Vec<Event>,
    next_event_id: u64,
    next_message_id: u64,
}

impl SimContext {
    /// Create a new simulation context.
    pub fn new(seed: u64) -> Self {
        SimContext {
            time: SimTime::ZERO,
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            pending_events: Vec::new(),
            next_event_id: 0,
            next_message_id: 1,
        }
    }

    /// Get the current simulation time.
    pub fn time(&self) -> SimTime {
        self.time
    }

    /// Seed the context was created with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Get mutable access to the random number generator.
    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    /// Independent generator on its own stream of the run seed.
    ///
    /// Stream 0 is the context's own generator.
    pub fn fork_rng(&self, stream: u64) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(stream);
        rng
    }

    /// Set the current time (used by event loop).
    pub fn set_time(&mut self, time: SimTime) {
        self.time = time;
    }

    /// Post an event to occur after a delay.
    pub fn post_event(&mut self, delay: SimTime, payload: EventPayload) {
        let time = self.time + delay;
        self.post_at(time, payload);
    }

    /// Post an event at an absolute time. Times in the past run now.
    pub fn post_at(&mut self, time: SimTime, payload: EventPayload) {
        let event = Event {
            id: EventId(self.next_event_id),
            time: time.max(self.time),
            payload,
        };
        self.next_event_id += 1;
        self.pending_events.push(event);
    }

    /// Post an event to occur immediately (at current time).
    pub fn post_immediate(&mut self, payload: EventPayload) {
        self.post_event(SimTime::ZERO, payload);
    }

    /// Take all pending events (used by event loop).
    pub fn take_pending_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.pending_events)
    }

    /// Get the next event ID (used by event loop for external event creation).
    pub fn next_event_id(&mut self) -> u64 {
        let id = self.next_event_id;
        self.next_event_id += 1;
        id
    }

    /// Allocate a message correlation id.
    pub fn next_message_id(&mut self) -> MessageId {
        let id = MessageId(self.next_message_id);
        self.next_message_id += 1;
        id
    }
}
