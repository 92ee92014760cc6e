//! Node placement.
//!
//! Node 0 is always the coordinator. The built-in layouts place it at the
//! origin and space the remaining nodes `distance_m` apart.

use crate::ModelError;
use serde::{Deserialize, Serialize};
use zbsim_common::{NodeId, Position};

/// Source of node positions.
pub trait TopologyProvider {
    /// Number of placed nodes.
    fn node_count(&self) -> usize;

    /// Position of a node, or `None` if the node is not placed.
    fn position(&self, node: NodeId) -> Option<Position>;

    /// Distance between two placed nodes.
    fn distance(&self, a: NodeId, b: NodeId) -> Option<f64> {
        Some(self.position(a)?.distance_to(&self.position(b)?))
    }
}

/// Square grid, filled row by row, `ceil(sqrt(n))` nodes wide.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridTopology {
    nodes: usize,
    spacing_m: f64,
    width: usize,
}

impl GridTopology {
    /// Create a grid of `nodes` nodes spaced `spacing_m` apart.
    pub fn new(nodes: usize, spacing_m: f64) -> Self {
        let width = ((nodes as f64).sqrt().ceil() as usize).max(1);
        Self {
            nodes,
            spacing_m,
            width,
        }
    }

    /// Nodes per row.
    pub fn width(&self) -> usize {
        self.width
    }
}

impl TopologyProvider for GridTopology {
    fn node_count(&self) -> usize {
        self.nodes
    }

    fn position(&self, node: NodeId) -> Option<Position> {
        let i = node.index();
        (i < self.nodes).then(|| {
            Position::new(
                (i % self.width) as f64 * self.spacing_m,
                (i / self.width) as f64 * self.spacing_m,
            )
        })
    }
}

/// Nodes in a straight line along the x axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineTopology {
    nodes: usize,
    spacing_m: f64,
}

impl LineTopology {
    /// Create a line of `nodes` nodes spaced `spacing_m` apart.
    pub fn new(nodes: usize, spacing_m: f64) -> Self {
        Self { nodes, spacing_m }
    }
}

impl TopologyProvider for LineTopology {
    fn node_count(&self) -> usize {
        self.nodes
    }

    fn position(&self, node: NodeId) -> Option<Position> {
        let i = node.index();
        (i < self.nodes).then(|| Position::new(i as f64 * self.spacing_m, 0.0))
    }
}

/// Explicit positions, indexed by node.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedTopology {
    positions: Vec<Position>,
}

impl FixedTopology {
    /// Wrap a list of positions.
    pub fn new(positions: Vec<Position>) -> Self {
        Self { positions }
    }
}

impl TopologyProvider for FixedTopology {
    fn node_count(&self) -> usize {
        self.positions.len()
    }

    fn position(&self, node: NodeId) -> Option<Position> {
        self.positions.get(node.index()).copied()
    }
}

/// Built-in layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyLayout {
    /// [`GridTopology`].
    #[default]
    Grid,
    /// [`LineTopology`].
    Line,
    /// [`FixedTopology`] from `positions`.
    Fixed,
}

/// The `topology` section of a scenario.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TopologyConfig {
    /// Layout kind.
    pub layout: TopologyLayout,
    /// Node positions for the fixed layout, coordinator first.
    pub positions: Vec<Position>,
}

impl TopologyConfig {
    /// Build the provider for `nodes` nodes at `spacing_m` spacing.
    pub fn build(&self, nodes: usize, spacing_m: f64) -> Box<dyn TopologyProvider + Send + Sync> {
        match self.layout {
            TopologyLayout::Grid => Box::new(GridTopology::new(nodes, spacing_m)),
            TopologyLayout::Line => Box::new(LineTopology::new(nodes, spacing_m)),
            TopologyLayout::Fixed => Box::new(FixedTopology::new(self.positions.clone())),
        }
    }

    pub(crate) fn validate(&self, nodes: usize) -> Result<(), ModelError> {
        if self.layout != TopologyLayout::Fixed {
            return Ok(());
        }
        if self.positions.len() != nodes {
            return Err(ModelError::InvalidConfig(format!(
                "fixed topology lists {} positions for {} nodes",
                self.positions.len(),
                nodes
            )));
        }
        if let Some(p) = self
            .positions
            .iter()
            .find(|p| !p.x.is_finite() || !p.y.is_finite())
        {
            return Err(ModelError::InvalidConfig(format!(
                "non-finite position ({}, {})",
                p.x, p.y
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_layout() {
        let grid = GridTopology::new(6, 10.0);
        assert_eq!(grid.width(), 3);
        assert_eq!(grid.position(NodeId(0)), Some(Position::new(0.0, 0.0)));
        assert_eq!(grid.position(NodeId(4)), Some(Position::new(10.0, 10.0)));
        assert_eq!(grid.position(NodeId(6)), None);
        assert_eq!(grid.distance(NodeId(0), NodeId(1)), Some(10.0));
    }

    #[test]
    fn test_grid_of_four_is_square() {
        let grid = GridTopology::new(4, 5.0);
        assert_eq!(grid.width(), 2);
        let d = grid.distance(NodeId(0), NodeId(3)).unwrap();
        assert!((d - 50f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_line_layout() {
        let line = LineTopology::new(4, 2.5);
        assert_eq!(line.node_count(), 4);
        assert_eq!(line.distance(NodeId(0), NodeId(3)), Some(7.5));
    }

    #[test]
    fn test_fixed_layout_validation() {
        let config = TopologyConfig {
            layout: TopologyLayout::Fixed,
            positions: vec![Position::new(0.0, 0.0), Position::new(3.0, 4.0)],
        };
        assert!(config.validate(3).is_err());
        assert!(config.validate(2).is_ok());
        let topology = config.build(2, 1.0);
        assert_eq!(topology.distance(NodeId(0), NodeId(1)), Some(5.0));
    }
}
