//! # zbsim-model
//!
//! YAML scenario loading and validation for zbsim.
//!
//! This crate provides:
//! - [`ScenarioConfig`] - every tunable of a scenario run, with defaults
//! - Scenario loading from files and strings, with layered overrides
//! - [`TopologyProvider`] and the built-in layouts
//! - [`ScenarioDescriptor`] - export labels for a run
//!
//! ## Layering
//!
//! Several YAML documents can be merged. Mappings merge key by key and later
//! documents win; any other value is replaced wholesale. The merged document
//! is then deserialized, so fields left out everywhere keep their defaults.

pub mod topology;

pub use topology::{
    FixedTopology, GridTopology, LineTopology, TopologyConfig, TopologyLayout, TopologyProvider,
};

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::Path;
use thiserror::Error;
use zbsim_channel::{ChannelConfig, ChannelError};
use zbsim_common::{GroupAddress, NodeId};
use zbsim_stack::StackConfig;
use zbsim_stats::EnergyModel;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while loading or validating a scenario.
#[derive(Debug, Error)]
pub enum ModelError {
    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid channel parameters.
    #[error("Invalid channel configuration: {0}")]
    Channel(#[from] ChannelError),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

// ============================================================================
// Constants
// ============================================================================

/// Coordinator plus two routers.
pub const MIN_NODES: usize = 3;

/// Default node count.
pub const DEFAULT_NODES: usize = 6;

/// Default inter-node spacing in meters.
pub const DEFAULT_DISTANCE_M: f64 = 10.0;

/// Default simulated duration in seconds.
pub const DEFAULT_DURATION_S: f64 = 120.0;

/// Default run seed.
pub const DEFAULT_SEED: u64 = 42;

/// Node count from which extra sensors report.
pub const EXTRA_SENSOR_MIN_NODES: usize = 8;

/// Node count from which the default light groups exist.
pub const GROUPS_MIN_NODES: usize = 5;

// ============================================================================
// Scenario Sections
// ============================================================================

/// Route establishment strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// One concentrator discovery from the coordinator.
    #[default]
    ManyToOne,
    /// One point-to-point discovery from the coordinator to a far node.
    Mesh,
}

impl std::fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutingMode::ManyToOne => write!(f, "many-to-one"),
            RoutingMode::Mesh => write!(f, "mesh"),
        }
    }
}

/// When the route and data phases may start.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case", deny_unknown_fields)]
pub enum DependencyPolicy {
    /// Phases start at their planned time whatever the recorded state.
    #[default]
    FixedMargin,
    /// Phases wait for the confirmations they depend on.
    WaitForConfirmations {
        /// Joins required before routing. `None` means every non-coordinator.
        #[serde(default)]
        min_joined: Option<usize>,
        /// Re-check interval, seconds.
        #[serde(default = "default_poll_interval_s")]
        poll_interval_s: f64,
        /// Give up waiting after this long past the planned time, seconds.
        #[serde(default = "default_max_wait_s")]
        max_wait_s: f64,
    },
}

fn default_poll_interval_s() -> f64 {
    0.5
}

fn default_max_wait_s() -> f64 {
    30.0
}

/// Phase offsets of the lifecycle, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingConfig {
    /// Network formation time.
    pub formation_at_s: f64,
    /// Delay from formation to the first discovery.
    pub discovery_offset_s: f64,
    /// Spacing between consecutive discoveries.
    pub join_stagger_s: f64,
    /// Delay from a member's discovery to its group membership.
    pub group_setup_offset_s: f64,
    /// Delay from the last discovery to route establishment.
    pub route_margin_s: f64,
    /// Delay from route establishment to the data phase.
    pub data_margin_s: f64,
    /// Spacing between the first readings of consecutive sensors.
    pub sensor_stagger_s: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            formation_at_s: 1.0,
            discovery_offset_s: 2.0,
            join_stagger_s: 2.0,
            group_setup_offset_s: 2.0,
            route_margin_s: 5.0,
            data_margin_s: 5.0,
            sensor_stagger_s: 2.0,
        }
    }
}

/// A node producing readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensorSpec {
    /// Sensor node index.
    pub node: u32,
    /// Readings to send. `None` uses `workload.packets`.
    #[serde(default)]
    pub packets: Option<u32>,
}

/// A group and the commands sent to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupSpec {
    /// Display name.
    pub name: String,
    /// Group address.
    pub address: u16,
    /// Member node indices.
    pub members: Vec<u32>,
    /// Command times relative to the data phase start, seconds.
    #[serde(default)]
    pub command_offsets_s: Vec<f64>,
    /// Application command byte.
    #[serde(default = "default_group_command")]
    pub command: u8,
}

fn default_group_command() -> u8 {
    0x01
}

/// Traffic produced during the data phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkloadConfig {
    /// Readings per sensor.
    pub packets: u32,
    /// Interval between readings, seconds.
    pub interval_s: f64,
    /// Reading payload size, bytes.
    pub payload_bytes: u32,
    /// Readings per extra sensor in large networks.
    pub extra_sensor_packets: u32,
    /// Sensors. `None` derives them from the node count.
    pub sensors: Option<Vec<SensorSpec>>,
    /// Groups. `None` derives them from the node count.
    pub groups: Option<Vec<GroupSpec>>,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            packets: 50,
            interval_s: 2.0,
            payload_bytes: 20,
            extra_sensor_packets: 5,
            sensors: None,
            groups: None,
        }
    }
}

/// Output destinations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// CSV file that receives one row per run.
    pub csv: Option<String>,
}

// ============================================================================
// Scenario Configuration
// ============================================================================

/// Complete description of one scenario run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Scenario label. `None` derives one from the parameters.
    pub scenario: Option<String>,
    /// Run seed.
    pub seed: u64,
    /// Node count, coordinator included.
    pub nodes: usize,
    /// Inter-node spacing, meters.
    pub distance_m: f64,
    /// Simulated duration, seconds.
    pub duration_s: f64,
    /// Node placement.
    pub topology: TopologyConfig,
    /// Route establishment strategy.
    pub routing: RoutingMode,
    /// Mesh route target. `None` picks the node farthest from the coordinator.
    pub mesh_target: Option<u32>,
    /// Phase dependency policy.
    pub dependency: DependencyPolicy,
    /// Phase offsets.
    pub timing: TimingConfig,
    /// Data phase traffic.
    pub workload: WorkloadConfig,
    /// Channel model.
    pub channel: ChannelConfig,
    /// Simulated protocol stack.
    pub stack: StackConfig,
    /// Energy estimate parameters.
    pub energy: EnergyModel,
    /// Output destinations.
    pub output: OutputConfig,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            scenario: None,
            seed: DEFAULT_SEED,
            nodes: DEFAULT_NODES,
            distance_m: DEFAULT_DISTANCE_M,
            duration_s: DEFAULT_DURATION_S,
            topology: TopologyConfig::default(),
            routing: RoutingMode::default(),
            mesh_target: None,
            dependency: DependencyPolicy::default(),
            timing: TimingConfig::default(),
            workload: WorkloadConfig::default(),
            channel: ChannelConfig::default(),
            stack: StackConfig::default(),
            energy: EnergyModel::default(),
            output: OutputConfig::default(),
        }
    }
}

/// Resolved sensor with its reading count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sensor {
    /// Sensor node.
    pub node: NodeId,
    /// Readings to send.
    pub packets: u32,
}

/// Resolved group.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    /// Display name.
    pub name: String,
    /// Group address.
    pub address: GroupAddress,
    /// Members.
    pub members: Vec<NodeId>,
    /// Command offsets from the data phase start, seconds.
    pub command_offsets_s: Vec<f64>,
    /// Application command byte.
    pub command: u8,
}

/// Labels attached to a run's exported results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDescriptor {
    /// Scenario label.
    pub name: String,
    /// Inter-node spacing, meters.
    pub distance_m: f64,
    /// Node count.
    pub nodes: usize,
    /// Noise enabled.
    pub noise: bool,
    /// Fading enabled.
    pub fading: bool,
    /// Path loss exponent.
    pub path_loss_exponent: f64,
}

impl ScenarioConfig {
    /// Scenario label, either configured or `D{distance}_N{nodes}[_Noise][_Fading]`.
    pub fn scenario_name(&self) -> String {
        if let Some(name) = self.scenario.as_ref().filter(|s| !s.is_empty()) {
            return name.clone();
        }
        let mut name = format!("D{}_N{}", format_number(self.distance_m), self.nodes);
        if self.channel.noise_enabled {
            name.push_str("_Noise");
        }
        if self.channel.fading_enabled {
            name.push_str("_Fading");
        }
        name
    }

    /// Export labels for this scenario.
    pub fn descriptor(&self) -> ScenarioDescriptor {
        ScenarioDescriptor {
            name: self.scenario_name(),
            distance_m: self.distance_m,
            nodes: self.nodes,
            noise: self.channel.noise_enabled,
            fading: self.channel.fading_enabled,
            path_loss_exponent: self.channel.path_loss_exponent,
        }
    }

    /// Node placement for this scenario.
    pub fn topology(&self) -> Box<dyn TopologyProvider + Send + Sync> {
        self.topology.build(self.nodes, self.distance_m)
    }

    /// Sensors, configured or derived.
    ///
    /// The derived set is the last node, plus nodes 3 up to the eighth with
    /// `extra_sensor_packets` readings each once the network has at least
    /// eight nodes.
    pub fn sensors(&self) -> Vec<Sensor> {
        if let Some(sensors) = &self.workload.sensors {
            return sensors
                .iter()
                .map(|s| Sensor {
                    node: NodeId(s.node),
                    packets: s.packets.unwrap_or(self.workload.packets),
                })
                .collect();
        }

        let last = NodeId((self.nodes - 1) as u32);
        let mut sensors = vec![Sensor {
            node: last,
            packets: self.workload.packets,
        }];
        if self.nodes >= EXTRA_SENSOR_MIN_NODES {
            let upper = self.nodes.min(EXTRA_SENSOR_MIN_NODES);
            sensors.extend(
                (3..upper as u32)
                    .map(NodeId)
                    .filter(|n| *n != last)
                    .map(|node| Sensor {
                        node,
                        packets: self.workload.extra_sensor_packets,
                    }),
            );
        }
        sensors
    }

    /// Groups, configured or derived.
    ///
    /// From five nodes on, the derived groups are LivingRoom (node 4),
    /// Bedroom (node 5) and AllLights (both), commanded 5 s, 20 s and 35 s
    /// into the data phase. Groups without members are skipped.
    pub fn groups(&self) -> Vec<Group> {
        if let Some(groups) = &self.workload.groups {
            return groups
                .iter()
                .map(|g| Group {
                    name: g.name.clone(),
                    address: GroupAddress(g.address),
                    members: g.members.iter().copied().map(NodeId).collect(),
                    command_offsets_s: g.command_offsets_s.clone(),
                    command: g.command,
                })
                .collect();
        }

        if self.nodes < GROUPS_MIN_NODES {
            return Vec::new();
        }
        let present = |ids: &[u32]| -> Vec<NodeId> {
            ids.iter()
                .copied()
                .filter(|i| (*i as usize) < self.nodes)
                .map(NodeId)
                .collect()
        };
        [
            ("LivingRoom", 0x0001, present(&[4]), 5.0),
            ("Bedroom", 0x0002, present(&[5]), 20.0),
            ("AllLights", 0x0003, present(&[4, 5]), 35.0),
        ]
        .into_iter()
        .filter(|(_, _, members, _)| !members.is_empty())
        .map(|(name, address, members, offset)| Group {
            name: name.to_string(),
            address: GroupAddress(address),
            members,
            command_offsets_s: vec![offset],
            command: default_group_command(),
        })
        .collect()
    }

    /// Target of the mesh route discovery.
    pub fn mesh_target(&self) -> NodeId {
        if let Some(target) = self.mesh_target {
            return NodeId(target);
        }
        let topology = self.topology();
        let origin = topology.position(NodeId::COORDINATOR).unwrap_or_default();
        let mut best = NodeId((self.nodes - 1) as u32);
        let mut best_distance = f64::NEG_INFINITY;
        for i in 1..self.nodes as u32 {
            let node = NodeId(i);
            if let Some(p) = topology.position(node) {
                // Ties go to the higher index.
                let d = origin.distance_to(&p);
                if d >= best_distance {
                    best_distance = d;
                    best = node;
                }
            }
        }
        best
    }

    /// Check the scenario before any simulated time passes.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.nodes < MIN_NODES {
            return Err(ModelError::InvalidConfig(format!(
                "nodes must be at least {} (coordinator plus two routers), got {}",
                MIN_NODES, self.nodes
            )));
        }
        if u32::try_from(self.nodes).is_err() {
            return Err(ModelError::InvalidConfig(format!("nodes too large: {}", self.nodes)));
        }
        positive("distance_m", self.distance_m)?;
        positive("duration_s", self.duration_s)?;
        positive("workload.interval_s", self.workload.interval_s)?;

        let t = &self.timing;
        for (name, value) in [
            ("timing.formation_at_s", t.formation_at_s),
            ("timing.discovery_offset_s", t.discovery_offset_s),
            ("timing.join_stagger_s", t.join_stagger_s),
            ("timing.group_setup_offset_s", t.group_setup_offset_s),
            ("timing.route_margin_s", t.route_margin_s),
            ("timing.data_margin_s", t.data_margin_s),
            ("timing.sensor_stagger_s", t.sensor_stagger_s),
        ] {
            non_negative(name, value)?;
        }

        let in_range = |node: u32, what: &str| -> Result<(), ModelError> {
            if node == 0 || node as usize >= self.nodes {
                return Err(ModelError::InvalidConfig(format!(
                    "{} {} must be a non-coordinator node below {}",
                    what, node, self.nodes
                )));
            }
            Ok(())
        };

        let sensors = self.sensors();
        for (i, sensor) in sensors.iter().enumerate() {
            in_range(sensor.node.0, "sensor")?;
            if sensors[..i].iter().any(|s| s.node == sensor.node) {
                return Err(ModelError::InvalidConfig(format!(
                    "sensor {} listed twice",
                    sensor.node.0
                )));
            }
        }
        for group in self.groups() {
            for member in &group.members {
                in_range(member.0, "group member")?;
            }
            for offset in &group.command_offsets_s {
                non_negative("groups.command_offsets_s", *offset)?;
            }
        }
        if let Some(target) = self.mesh_target {
            in_range(target, "mesh_target")?;
        }

        if let DependencyPolicy::WaitForConfirmations {
            min_joined,
            poll_interval_s,
            max_wait_s,
        } = self.dependency
        {
            positive("dependency.poll_interval_s", poll_interval_s)?;
            non_negative("dependency.max_wait_s", max_wait_s)?;
            if let Some(n) = min_joined {
                if n >= self.nodes {
                    return Err(ModelError::InvalidConfig(format!(
                        "dependency.min_joined {} exceeds the {} joinable nodes",
                        n,
                        self.nodes - 1
                    )));
                }
            }
        }

        self.topology.validate(self.nodes)?;
        self.channel.validate()?;
        self.stack.validate().map_err(ModelError::InvalidConfig)?;
        Ok(())
    }
}

fn positive(name: &str, value: f64) -> Result<(), ModelError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ModelError::InvalidConfig(format!("{} must be > 0, got {}", name, value)))
    }
}

fn non_negative(name: &str, value: f64) -> Result<(), ModelError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ModelError::InvalidConfig(format!("{} must be >= 0, got {}", name, value)))
    }
}

/// Format a number without a trailing `.0` for whole values.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Load a scenario from a file.
pub fn load_scenario(path: &Path) -> Result<ScenarioConfig, ModelError> {
    load_scenarios(&[path])
}

/// Parse a scenario from a YAML string.
pub fn load_scenario_from_str(yaml_str: &str) -> Result<ScenarioConfig, ModelError> {
    load_scenarios_from_str(&[yaml_str])
}

/// Load and merge several scenario files. Later files override earlier ones.
pub fn load_scenarios(paths: &[&Path]) -> Result<ScenarioConfig, ModelError> {
    if paths.is_empty() {
        return Err(ModelError::InvalidConfig("No scenario files provided".to_string()));
    }
    let yaml_strings = paths
        .iter()
        .map(std::fs::read_to_string)
        .collect::<Result<Vec<String>, std::io::Error>>()?;
    let yaml_strs: Vec<&str> = yaml_strings.iter().map(|s| s.as_str()).collect();
    load_scenarios_from_str(&yaml_strs)
}

/// Merge several YAML documents and parse the result.
///
/// Validation is left to the caller so command-line overrides can be applied
/// to the merged scenario first.
pub fn load_scenarios_from_str(yaml_strs: &[&str]) -> Result<ScenarioConfig, ModelError> {
    if yaml_strs.is_empty() {
        return Err(ModelError::InvalidConfig("No scenario strings provided".to_string()));
    }
    let mut merged = Value::Mapping(Default::default());
    for yaml_str in yaml_strs {
        let layer: Value = serde_yaml::from_str(yaml_str)?;
        // An empty document parses as null.
        if !layer.is_null() {
            merge_yaml(&mut merged, layer);
        }
    }
    Ok(serde_yaml::from_value(merged)?)
}

fn merge_yaml(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_yaml(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
