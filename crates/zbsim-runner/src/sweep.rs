//! Parameter sweeps.
//!
//! A sweep expands a base scenario over distance, node count, noise and
//! fading. Runs share nothing, so they execute on the rayon pool; results
//! come back in grid order regardless of which run finishes first.

use crate::{run_scenario, RunnerError, ScenarioResult};
use rayon::prelude::*;
use tracing::info;
use zbsim_model::ScenarioConfig;

/// Axes of a sweep. Every combination is run once.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepGrid {
    /// Node spacings, m.
    pub distances: Vec<f64>,
    /// Node counts.
    pub nodes: Vec<usize>,
    /// Noise settings to try.
    pub noise_modes: Vec<bool>,
    /// Fading settings to try.
    pub fading_modes: Vec<bool>,
}

impl Default for SweepGrid {
    fn default() -> Self {
        SweepGrid {
            distances: vec![5.0, 10.0, 15.0, 20.0],
            nodes: vec![4, 6, 8, 10],
            noise_modes: vec![false, true],
            fading_modes: vec![false, true],
        }
    }
}

impl SweepGrid {
    /// Number of runs in the grid.
    pub fn len(&self) -> usize {
        self.distances.len() * self.nodes.len() * self.noise_modes.len() * self.fading_modes.len()
    }

    /// True when any axis is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Expand `base` over the grid: distance outermost, then node count,
    /// noise and fading. Explicit scenario names are cleared so every point
    /// gets its derived name.
    pub fn points(&self, base: &ScenarioConfig) -> Vec<ScenarioConfig> {
        let mut points = Vec::with_capacity(self.len());
        for &distance_m in &self.distances {
            for &nodes in &self.nodes {
                for &noise in &self.noise_modes {
                    for &fading in &self.fading_modes {
                        let mut config = base.clone();
                        config.scenario = None;
                        config.distance_m = distance_m;
                        config.nodes = nodes;
                        config.channel.noise_enabled = noise;
                        config.channel.fading_enabled = fading;
                        points.push(config);
                    }
                }
            }
        }
        points
    }
}

/// Run every point of `grid` and return the results in grid order.
///
/// All points are validated before any run starts, so a bad axis value
/// fails the sweep without partial output.
pub fn run_sweep(base: &ScenarioConfig, grid: &SweepGrid) -> Result<Vec<ScenarioResult>, RunnerError> {
    if grid.is_empty() {
        return Err(RunnerError::ConfigError("sweep grid has an empty axis".to_string()));
    }
    let points = grid.points(base);
    for point in &points {
        point.validate()?;
    }
    info!(
        "Sweeping {} scenarios on {} threads",
        points.len(),
        rayon::current_num_threads()
    );

    points.par_iter().map(run_scenario).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_grid() -> SweepGrid {
        SweepGrid {
            distances: vec![5.0, 10.0],
            nodes: vec![4],
            noise_modes: vec![false, true],
            fading_modes: vec![false],
        }
    }

    #[test]
    fn test_points_order() {
        let base = ScenarioConfig {
            scenario: Some("custom".to_string()),
            ..Default::default()
        };
        let names: Vec<String> = small_grid().points(&base).iter().map(|c| c.scenario_name()).collect();
        assert_eq!(names, vec!["D5_N4", "D5_N4_Noise", "D10_N4", "D10_N4_Noise"]);
    }

    #[test]
    fn test_default_grid_size() {
        assert_eq!(SweepGrid::default().len(), 64);
    }

    #[test]
    fn test_sweep_matches_sequential_runs() {
        let mut base = ScenarioConfig {
            duration_s: 40.0,
            ..Default::default()
        };
        base.channel.fading_enabled = false;
        let grid = small_grid();

        let swept = run_sweep(&base, &grid).unwrap();
        let sequential: Vec<_> = grid
            .points(&base)
            .iter()
            .map(|c| run_scenario(c).unwrap())
            .collect();

        assert_eq!(swept.len(), 4);
        for (a, b) in swept.iter().zip(&sequential) {
            assert_eq!(a.scenario.name, b.scenario.name);
            assert_eq!(a.summary.sent, b.summary.sent);
            assert_eq!(a.summary.received, b.summary.received);
        }
    }

    #[test]
    fn test_invalid_axis_rejected() {
        let grid = SweepGrid {
            nodes: vec![2, 4],
            ..small_grid()
        };
        assert!(run_sweep(&ScenarioConfig::default(), &grid).is_err());

        let empty = SweepGrid {
            fading_modes: vec![],
            ..small_grid()
        };
        assert!(matches!(
            run_sweep(&ScenarioConfig::default(), &empty),
            Err(RunnerError::ConfigError(_))
        ));
    }
}
