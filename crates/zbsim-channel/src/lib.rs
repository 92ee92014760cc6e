//! # zbsim-channel
//!
//! Indoor 2.4 GHz link-quality model for zbsim.
//!
//! This crate provides:
//! - Channel parameters ([`ChannelConfig`])
//! - Log-distance path loss ([`path_loss_db`])
//! - Rayleigh fading ([`sample_rayleigh`]) and AWGN noise sampling
//! - Per-transmission delivery decisions ([`LinkEvaluator`], [`TransmissionAttempt`])
//!
//! Each transmission draws one fading sample and one noise sample. There is
//! no waveform or bit-error modeling.

use rand::Rng;
use rand_distr::{Distribution, Normal, StandardNormal};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;
use zbsim_common::{NodeId, Position, SimTime};

// ============================================================================
// Constants
// ============================================================================

/// Noise power used when noise is disabled. Far below any received power the
/// sensitivity check lets through.
pub const DISABLED_NOISE_DBM: f64 = -200.0;

/// IEEE 802.15.4 O-QPSK channel bandwidth at 2.4 GHz.
pub const CHANNEL_BANDWIDTH_HZ: f64 = 2.0e6;

/// Thermal noise density at room temperature.
pub const THERMAL_NOISE_DENSITY_DBM_HZ: f64 = -174.0;

/// Floor applied to the fading coefficient before taking its logarithm.
pub const FADING_EPSILON: f64 = 1e-10;

/// Coefficient below which a low-SNR drop is attributed to fading.
pub const DEFAULT_FADING_CUTOFF: f64 = 0.5;

/// Absolute noise power of a thermal noise density integrated over `bandwidth_hz`.
///
/// `thermal_noise_dbm(CHANNEL_BANDWIDTH_HZ)` is about -111 dBm. Use this to
/// build a [`ChannelConfig::noise_floor_dbm`] from a density.
pub fn thermal_noise_dbm(bandwidth_hz: f64) -> f64 {
    THERMAL_NOISE_DENSITY_DBM_HZ + 10.0 * bandwidth_hz.log10()
}

// ============================================================================
// Errors
// ============================================================================

/// Invalid channel parameters.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// A parameter is out of range.
    #[error("Invalid channel parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name as it appears in configuration files.
        name: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ChannelError {
    ChannelError::InvalidParameter {
        name,
        reason: reason.into(),
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// How a below-threshold SNR drop is split between fading and noise.
///
/// Both policies are heuristics. A deep fade makes fading the likely cause of
/// a drop, not a certain one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassificationPolicy {
    /// Fading is blamed when the coefficient is below `cutoff`.
    CoefficientCutoff {
        /// Coefficient cutoff, 0.5 by default.
        cutoff: f64,
    },
    /// Fading is blamed when the SNR without the fading term would have
    /// cleared the threshold.
    MarginDecomposition,
}

impl std::fmt::Display for ClassificationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassificationPolicy::CoefficientCutoff { cutoff } => write!(f, "coefficient cutoff {}", cutoff),
            ClassificationPolicy::MarginDecomposition => write!(f, "margin decomposition"),
        }
    }
}

impl Default for ClassificationPolicy {
    fn default() -> Self {
        ClassificationPolicy::CoefficientCutoff {
            cutoff: DEFAULT_FADING_CUTOFF,
        }
    }
}

/// Radio and propagation parameters for one scenario run.
///
/// `noise_floor_dbm` is an absolute in-band noise power over the
/// [`CHANNEL_BANDWIDTH_HZ`] channel, not a density. The default of -100 dBm
/// sits about 11 dB above thermal noise to account for indoor 2.4 GHz
/// interference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelConfig {
    /// Enable AWGN noise sampling.
    pub noise_enabled: bool,
    /// Enable Rayleigh fading.
    pub fading_enabled: bool,
    /// Transmit power in dBm.
    pub tx_power_dbm: f64,
    /// Reference distance d0 in meters.
    pub reference_distance_m: f64,
    /// Path loss at the reference distance in dB.
    pub reference_path_loss_db: f64,
    /// Path loss exponent (2.0 free space, 3.0-3.5 indoor).
    pub path_loss_exponent: f64,
    /// In-band noise power in dBm.
    pub noise_floor_dbm: f64,
    /// Receiver noise figure in dB.
    pub noise_figure_db: f64,
    /// Standard deviation of the per-transmission noise sample in dB.
    pub noise_std_dev_db: f64,
    /// Minimum received power for demodulation in dBm.
    pub receiver_sensitivity_dbm: f64,
    /// Minimum SNR for successful reception in dB.
    pub snr_threshold_db: f64,
    /// Drop-cause attribution heuristic.
    pub classification: ClassificationPolicy,
}

impl ChannelConfig {
    /// Default transmit power (CC2530-class radio).
    pub const DEFAULT_TX_POWER_DBM: f64 = 4.0;
    /// Default reference distance.
    pub const DEFAULT_REFERENCE_DISTANCE_M: f64 = 1.0;
    /// Default path loss at 1 m for 2.4 GHz.
    pub const DEFAULT_REFERENCE_PATH_LOSS_DB: f64 = 40.0;
    /// Default indoor path loss exponent.
    pub const DEFAULT_PATH_LOSS_EXPONENT: f64 = 3.0;
    /// Default in-band noise power.
    pub const DEFAULT_NOISE_FLOOR_DBM: f64 = -100.0;
    /// Default receiver noise figure.
    pub const DEFAULT_NOISE_FIGURE_DB: f64 = 3.0;
    /// Default noise sample standard deviation.
    pub const DEFAULT_NOISE_STD_DEV_DB: f64 = 2.0;
    /// Default receiver sensitivity.
    pub const DEFAULT_SENSITIVITY_DBM: f64 = -97.0;
    /// Default SNR threshold for O-QPSK with DSSS.
    pub const DEFAULT_SNR_THRESHOLD_DB: f64 = 6.0;

    /// Noise power before the random variation: floor plus noise figure.
    pub fn effective_noise_dbm(&self) -> f64 {
        self.noise_floor_dbm + self.noise_figure_db
    }

    /// Check parameter ranges.
    pub fn validate(&self) -> Result<(), ChannelError> {
        let finite = [
            ("tx_power_dbm", self.tx_power_dbm),
            ("reference_distance_m", self.reference_distance_m),
            ("reference_path_loss_db", self.reference_path_loss_db),
            ("path_loss_exponent", self.path_loss_exponent),
            ("noise_floor_dbm", self.noise_floor_dbm),
            ("noise_figure_db", self.noise_figure_db),
            ("noise_std_dev_db", self.noise_std_dev_db),
            ("receiver_sensitivity_dbm", self.receiver_sensitivity_dbm),
            ("snr_threshold_db", self.snr_threshold_db),
        ];
        for (name, value) in finite {
            if !value.is_finite() {
                return Err(invalid(name, format!("must be finite, got {}", value)));
            }
        }
        if self.path_loss_exponent <= 0.0 {
            return Err(invalid(
                "path_loss_exponent",
                format!("must be > 0, got {}", self.path_loss_exponent),
            ));
        }
        if self.reference_distance_m <= 0.0 {
            return Err(invalid(
                "reference_distance_m",
                format!("must be > 0, got {}", self.reference_distance_m),
            ));
        }
        if self.noise_std_dev_db < 0.0 {
            return Err(invalid(
                "noise_std_dev_db",
                format!("must be >= 0, got {}", self.noise_std_dev_db),
            ));
        }
        // With noise disabled, anything above sensitivity must clear the SNR check.
        if self.receiver_sensitivity_dbm - DISABLED_NOISE_DBM <= self.snr_threshold_db {
            return Err(invalid(
                "receiver_sensitivity_dbm",
                format!(
                    "{} dBm leaves no SNR margin above the disabled-noise level of {} dBm",
                    self.receiver_sensitivity_dbm, DISABLED_NOISE_DBM
                ),
            ));
        }
        if let ClassificationPolicy::CoefficientCutoff { cutoff } = self.classification {
            if !(cutoff.is_finite() && cutoff > 0.0) {
                return Err(invalid(
                    "classification.cutoff",
                    format!("must be finite and > 0, got {}", cutoff),
                ));
            }
        }
        Ok(())
    }

    /// Decide the outcome for one set of measurements.
    ///
    /// Sensitivity is checked before SNR.
    pub fn classify(&self, rx_power_dbm: f64, snr_db: f64, fading_coefficient: f64, fading_db: f64) -> Outcome {
        if rx_power_dbm < self.receiver_sensitivity_dbm {
            return Outcome::DroppedSensitivity;
        }
        if snr_db < self.snr_threshold_db {
            if !self.fading_enabled {
                return Outcome::DroppedNoise;
            }
            let fading_dominated = match self.classification {
                ClassificationPolicy::CoefficientCutoff { cutoff } => fading_coefficient < cutoff,
                ClassificationPolicy::MarginDecomposition => snr_db - fading_db >= self.snr_threshold_db,
            };
            return if fading_dominated {
                Outcome::DroppedFading
            } else {
                Outcome::DroppedNoise
            };
        }
        Outcome::Delivered
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            noise_enabled: true,
            fading_enabled: true,
            tx_power_dbm: Self::DEFAULT_TX_POWER_DBM,
            reference_distance_m: Self::DEFAULT_REFERENCE_DISTANCE_M,
            reference_path_loss_db: Self::DEFAULT_REFERENCE_PATH_LOSS_DB,
            path_loss_exponent: Self::DEFAULT_PATH_LOSS_EXPONENT,
            noise_floor_dbm: Self::DEFAULT_NOISE_FLOOR_DBM,
            noise_figure_db: Self::DEFAULT_NOISE_FIGURE_DB,
            noise_std_dev_db: Self::DEFAULT_NOISE_STD_DEV_DB,
            receiver_sensitivity_dbm: Self::DEFAULT_SENSITIVITY_DBM,
            snr_threshold_db: Self::DEFAULT_SNR_THRESHOLD_DB,
            classification: ClassificationPolicy::default(),
        }
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Delivery decision for one transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// Frame delivered to the protocol stack.
    Delivered,
    /// Received power below receiver sensitivity.
    DroppedSensitivity,
    /// SNR below threshold, attributed to noise.
    DroppedNoise,
    /// SNR below threshold, attributed to a deep fade.
    DroppedFading,
}

/// Confidence of an outcome's cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Attribution {
    /// Follows directly from a threshold comparison.
    Exact,
    /// Assigned by a [`ClassificationPolicy`] heuristic.
    Heuristic,
}

impl Outcome {
    /// Whether the frame was delivered.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Outcome::Delivered)
    }

    /// How far the stated cause can be trusted.
    pub fn attribution(&self) -> Attribution {
        match self {
            Outcome::Delivered | Outcome::DroppedSensitivity => Attribution::Exact,
            Outcome::DroppedNoise | Outcome::DroppedFading => Attribution::Heuristic,
        }
    }

    /// Label used in logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Outcome::Delivered => "delivered",
            Outcome::DroppedSensitivity => "sensitivity",
            Outcome::DroppedNoise => "noise",
            Outcome::DroppedFading => "fading",
        }
    }
}

/// Measurements and decision for one sender/receiver pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkSample {
    /// Distance in meters, clamped to at least the reference distance.
    pub distance_m: f64,
    /// Path loss in dB.
    pub path_loss_db: f64,
    /// Rayleigh amplitude (1.0 when fading is disabled).
    pub fading_coefficient: f64,
    /// Fading contribution in dB.
    pub fading_db: f64,
    /// Received power in dBm.
    pub rx_power_dbm: f64,
    /// Sampled noise power in dBm.
    pub noise_power_dbm: f64,
    /// Signal-to-noise ratio in dB.
    pub snr_db: f64,
    /// Decision.
    pub outcome: Outcome,
}

impl LinkSample {
    /// SNR with the fading term removed.
    pub fn fading_free_snr_db(&self) -> f64 {
        self.snr_db - self.fading_db
    }
}

/// One send as seen by the channel.
#[derive(Debug, Clone, Copy)]
pub struct Transmission {
    /// Sending node.
    pub sender: NodeId,
    /// Intended receiver.
    pub receiver: NodeId,
    /// Sender position.
    pub sender_pos: Position,
    /// Receiver position.
    pub receiver_pos: Position,
    /// Application payload size.
    pub payload_bytes: u32,
    /// Send time.
    pub sent_at: SimTime,
}

/// A classified transmission.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransmissionAttempt {
    /// Sending node.
    pub sender: NodeId,
    /// Intended receiver.
    pub receiver: NodeId,
    /// Application payload size.
    pub payload_bytes: u32,
    /// Send time.
    pub sent_at: SimTime,
    /// Channel measurements and decision.
    pub link: LinkSample,
}

impl TransmissionAttempt {
    /// The attempt's outcome.
    pub fn outcome(&self) -> Outcome {
        self.link.outcome
    }
}

// ============================================================================
// Propagation
// ============================================================================

/// Log-distance path loss: `PL0 + 10 n log10(d / d0)` with `d` clamped to `d0`.
pub fn path_loss_db(distance_m: f64, config: &ChannelConfig) -> f64 {
    let d = distance_m.max(config.reference_distance_m);
    config.reference_path_loss_db
        + 10.0 * config.path_loss_exponent * (d / config.reference_distance_m).log10()
}

/// Rayleigh amplitude with unit mean square: `sqrt(X^2 + Y^2)`, X and Y ~ N(0, 1/2).
pub fn sample_rayleigh<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let x: f64 = rng.sample::<f64, _>(StandardNormal) * std::f64::consts::FRAC_1_SQRT_2;
    let y: f64 = rng.sample::<f64, _>(StandardNormal) * std::f64::consts::FRAC_1_SQRT_2;
    (x * x + y * y).sqrt()
}

// ============================================================================
// Link Evaluator
// ============================================================================

/// Decides delivery for transmissions under one [`ChannelConfig`].
#[derive(Debug, Clone)]
pub struct LinkEvaluator {
    config: ChannelConfig,
    noise: Normal<f64>,
}

impl LinkEvaluator {
    /// Validate `config` and prepare the sampling distributions.
    pub fn new(config: ChannelConfig) -> Result<Self, ChannelError> {
        config.validate()?;
        let noise = Normal::new(0.0, config.noise_std_dev_db)
            .map_err(|e| invalid("noise_std_dev_db", e.to_string()))?;
        Ok(Self { config, noise })
    }

    /// The active configuration.
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Measure and classify one link.
    ///
    /// Draws two fading samples when fading is enabled, then one noise sample
    /// when noise is enabled, always in that order.
    pub fn sample<R: Rng + ?Sized>(&self, sender_pos: Position, receiver_pos: Position, rng: &mut R) -> LinkSample {
        let config = &self.config;
        let distance_m = sender_pos
            .distance_to(&receiver_pos)
            .max(config.reference_distance_m);
        let path_loss_db = path_loss_db(distance_m, config);

        let (fading_coefficient, fading_db) = if config.fading_enabled {
            let h = sample_rayleigh(rng);
            (h, 20.0 * h.max(FADING_EPSILON).log10())
        } else {
            (1.0, 0.0)
        };

        let rx_power_dbm = config.tx_power_dbm - path_loss_db + fading_db;

        let noise_power_dbm = if config.noise_enabled {
            config.effective_noise_dbm() + self.noise.sample(rng)
        } else {
            DISABLED_NOISE_DBM
        };

        let snr_db = rx_power_dbm - noise_power_dbm;
        let outcome = config.classify(rx_power_dbm, snr_db, fading_coefficient, fading_db);

        LinkSample {
            distance_m,
            path_loss_db,
            fading_coefficient,
            fading_db,
            rx_power_dbm,
            noise_power_dbm,
            snr_db,
            outcome,
        }
    }

    /// Classify one transmission.
    pub fn evaluate<R: Rng + ?Sized>(&self, tx: &Transmission, rng: &mut R) -> TransmissionAttempt {
        let link = self.sample(tx.sender_pos, tx.receiver_pos, rng);
        trace!(
            "Link {}->{}: d={:.1}m pl={:.1}dB h={:.3} rx={:.1}dBm snr={:.1}dB -> {}",
            tx.sender,
            tx.receiver,
            link.distance_m,
            link.path_loss_db,
            link.fading_coefficient,
            link.rx_power_dbm,
            link.snr_db,
            link.outcome.as_label()
        );
        TransmissionAttempt {
            sender: tx.sender,
            receiver: tx.receiver,
            payload_bytes: tx.payload_bytes,
            sent_at: tx.sent_at,
            link,
        }
    }
}

/// One-shot evaluation of a single link under `config`.
pub fn evaluate_link<R: Rng + ?Sized>(
    sender_pos: Position,
    receiver_pos: Position,
    config: &ChannelConfig,
    rng: &mut R,
) -> Result<LinkSample, ChannelError> {
    Ok(LinkEvaluator::new(config.clone())?.sample(sender_pos, receiver_pos, rng))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn clean_config() -> ChannelConfig {
        ChannelConfig {
            noise_enabled: false,
            fading_enabled: false,
            ..Default::default()
        }
    }

    fn at(distance: f64) -> (Position, Position) {
        (Position::new(0.0, 0.0), Position::new(distance, 0.0))
    }

    #[test]
    fn test_path_loss_reference_scenario() {
        let config = ChannelConfig {
            path_loss_exponent: 2.0,
            ..clean_config()
        };
        let (a, b) = at(5.0);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let link = evaluate_link(a, b, &config, &mut rng).unwrap();

        assert!((link.path_loss_db - 53.979).abs() < 0.01, "PL was {}", link.path_loss_db);
        assert!((link.rx_power_dbm + 49.979).abs() < 0.01, "Rx was {}", link.rx_power_dbm);
        assert_eq!(link.outcome, Outcome::Delivered);
    }

    #[test]
    fn test_path_loss_strictly_increasing() {
        for exponent in [0.5, 2.0, 2.7, 3.0, 3.5, 4.0] {
            let config = ChannelConfig {
                path_loss_exponent: exponent,
                ..Default::default()
            };
            let mut previous = path_loss_db(1.0, &config);
            let mut d = 1.0;
            while d < 200.0 {
                d *= 1.1;
                let pl = path_loss_db(d, &config);
                assert!(pl > previous, "PL not increasing at n={} d={}", exponent, d);
                previous = pl;
            }
        }
    }

    #[test]
    fn test_distance_clamped_to_reference() {
        let config = clean_config();
        let evaluator = LinkEvaluator::new(config.clone()).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let p = Position::new(2.0, 2.0);
        let link = evaluator.sample(p, p, &mut rng);
        assert_eq!(link.distance_m, config.reference_distance_m);
        assert_eq!(link.path_loss_db, config.reference_path_loss_db);
    }

    #[test]
    fn test_fading_disabled_gives_unit_coefficient() {
        let config = ChannelConfig {
            fading_enabled: false,
            ..Default::default()
        };
        let evaluator = LinkEvaluator::new(config).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for i in 0..1000 {
            let (a, b) = at(1.0 + i as f64 * 0.05);
            let link = evaluator.sample(a, b, &mut rng);
            assert_eq!(link.fading_coefficient, 1.0);
            assert_eq!(link.fading_db, 0.0);
            assert_ne!(link.outcome, Outcome::DroppedFading);
        }
    }

    #[test]
    fn test_noise_disabled_prevents_snr_drops() {
        let config = ChannelConfig {
            noise_enabled: false,
            fading_enabled: true,
            path_loss_exponent: 4.0,
            ..Default::default()
        };
        let evaluator = LinkEvaluator::new(config).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        for i in 0..5000 {
            let (a, b) = at(1.0 + (i % 100) as f64);
            let link = evaluator.sample(a, b, &mut rng);
            assert_eq!(link.noise_power_dbm, DISABLED_NOISE_DBM);
            assert!(
                matches!(link.outcome, Outcome::Delivered | Outcome::DroppedSensitivity),
                "unexpected {:?} at rx={} snr={}",
                link.outcome,
                link.rx_power_dbm,
                link.snr_db
            );
        }
    }

    #[test]
    fn test_same_seed_same_outcomes() {
        let evaluator = LinkEvaluator::new(ChannelConfig::default()).unwrap();
        let run = |seed: u64| -> Vec<LinkSample> {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            (0..500)
                .map(|i| {
                    let (a, b) = at(5.0 + (i % 20) as f64);
                    evaluator.sample(a, b, &mut rng)
                })
                .collect()
        };
        assert_eq!(run(42), run(42));
        assert_ne!(run(42), run(43));
    }

    #[test]
    fn test_rayleigh_unit_mean_square() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let n = 20_000;
        let mean_square = (0..n)
            .map(|_| {
                let h = sample_rayleigh(&mut rng);
                h * h
            })
            .sum::<f64>()
            / n as f64;
        assert!((mean_square - 1.0).abs() < 0.05, "E[h^2] = {}", mean_square);
    }

    #[test]
    fn test_defaults_make_impairments_observable_indoors() {
        let evaluator = LinkEvaluator::new(ChannelConfig::default()).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let (a, b) = at(20.0);
        let drops = (0..5000)
            .map(|_| evaluator.sample(a, b, &mut rng).outcome)
            .filter(|o| !o.is_delivered())
            .count();
        assert!(drops > 0, "no drops at 20 m with default impairments");
        assert!(drops < 1000, "{} drops at 20 m is implausibly many", drops);
    }

    #[test]
    fn test_sensitivity_takes_precedence() {
        let config = ChannelConfig::default();
        // Below sensitivity and below SNR threshold at the same time.
        let outcome = config.classify(-110.0, -10.0, 0.1, -20.0);
        assert_eq!(outcome, Outcome::DroppedSensitivity);
        assert_eq!(outcome.attribution(), Attribution::Exact);
    }

    #[test]
    fn test_coefficient_cutoff_classification() {
        let config = ChannelConfig::default();
        assert_eq!(config.classify(-90.0, 2.0, 0.3, -10.5), Outcome::DroppedFading);
        assert_eq!(config.classify(-90.0, 2.0, 0.7, -3.1), Outcome::DroppedNoise);
        assert_eq!(config.classify(-90.0, 8.0, 0.3, -10.5), Outcome::Delivered);

        let no_fading = ChannelConfig {
            fading_enabled: false,
            ..Default::default()
        };
        assert_eq!(no_fading.classify(-90.0, 2.0, 0.3, -10.5), Outcome::DroppedNoise);
        assert_eq!(Outcome::DroppedFading.attribution(), Attribution::Heuristic);
    }

    #[test]
    fn test_margin_decomposition_classification() {
        let config = ChannelConfig {
            classification: ClassificationPolicy::MarginDecomposition,
            ..Default::default()
        };
        // Without the -10 dB fade the SNR would be 12 dB: fading is decisive.
        assert_eq!(config.classify(-90.0, 2.0, 0.32, -10.0), Outcome::DroppedFading);
        // Even unfaded the SNR would be 4 dB: noise is decisive.
        assert_eq!(config.classify(-90.0, 1.0, 0.7, -3.0), Outcome::DroppedNoise);
    }

    #[test]
    fn test_classification_labels() {
        assert_eq!(ClassificationPolicy::default().to_string(), "coefficient cutoff 0.5");
        assert_eq!(ClassificationPolicy::MarginDecomposition.to_string(), "margin decomposition");
    }

    #[test]
    fn test_validate_rejects_bad_parameters() {
        let bad = [
            ChannelConfig {
                path_loss_exponent: 0.0,
                ..Default::default()
            },
            ChannelConfig {
                reference_distance_m: -1.0,
                ..Default::default()
            },
            ChannelConfig {
                noise_std_dev_db: -0.5,
                ..Default::default()
            },
            ChannelConfig {
                receiver_sensitivity_dbm: -198.0,
                ..Default::default()
            },
            ChannelConfig {
                tx_power_dbm: f64::NAN,
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(LinkEvaluator::new(config.clone()).is_err(), "accepted {:?}", config);
        }
        assert!(ChannelConfig::default().validate().is_ok());
    }

    #[test]
    fn test_thermal_noise_over_channel_bandwidth() {
        let floor = thermal_noise_dbm(CHANNEL_BANDWIDTH_HZ);
        assert!((floor + 110.99).abs() < 0.01, "thermal floor {}", floor);
    }

    #[test]
    fn test_evaluate_carries_transmission_metadata() {
        let evaluator = LinkEvaluator::new(clean_config()).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let (a, b) = at(10.0);
        let tx = Transmission {
            sender: NodeId(5),
            receiver: NodeId::COORDINATOR,
            sender_pos: a,
            receiver_pos: b,
            payload_bytes: 20,
            sent_at: SimTime::from_secs(21.0),
        };
        let attempt = evaluator.evaluate(&tx, &mut rng);
        assert_eq!(attempt.sender, NodeId(5));
        assert_eq!(attempt.payload_bytes, 20);
        assert_eq!(attempt.sent_at, SimTime::from_secs(21.0));
        assert!((attempt.link.distance_m - 10.0).abs() < 1e-12);
        assert_eq!(attempt.outcome(), Outcome::Delivered);
    }
}
