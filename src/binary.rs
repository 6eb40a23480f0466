//! # Emrich-Piedmonte binary sampler
//!
//! Generates correlated binary vectors with given success probabilities and
//! pairwise (phi) correlations by dichotomizing a latent multivariate normal.
//!
//! For each pair the target correlation fixes the joint success probability
//! `P(X_i = 1, X_j = 1) = rho_ij sqrt(p_i q_i p_j q_j) + p_i p_j`. The latent
//! correlation `psi_ij` is the one for which the bivariate normal orthant
//! probability at the thresholds `z = Φ⁻¹(p)` equals that joint probability.
//! A draw is `X_i = 1{W_i < z_i}` with `W ~ N(0, Ψ)`; the `2^n` cell
//! probabilities of `X` are the corresponding normal orthant probabilities.
//!
//! Plans validate every pair before any random number is drawn.

use rand::rngs::StdRng;
use thiserror::Error;

use crate::copula::{sample_correlated_normals, standard_normal_cdf, standard_normal_quantile};
use crate::correlation::{CorrelationError, CorrelationFactor, CorrelationMatrix};

const BISECTION_TOLERANCE: f64 = 1.0e-12;
const BISECTION_MAX_ITERS: usize = 200;
const BOUND_TOLERANCE: f64 = 1.0e-10;

/// Errors returned by the Emrich-Piedmonte sampler.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BinaryError {
    #[error(
        "correlation {target} between variables {i} and {j} is not attainable; feasible range is [{lower:.4}, {upper:.4}]"
    )]
    InfeasibleCorrelation {
        i: usize,
        j: usize,
        target: f64,
        lower: f64,
        upper: f64,
    },
    #[error("success probability {value} at position {index} must lie strictly inside (0, 1)")]
    InvalidProbability { index: usize, value: f64 },
    #[error("probability vector length ({found}) must equal correlation dimension ({expected})")]
    DimensionMismatch { expected: usize, found: usize },
    #[error(transparent)]
    Correlation(#[from] CorrelationError),
}

/// Attainable phi-correlation range between `Bernoulli(p1)` and `Bernoulli(p2)`.
#[must_use]
pub fn binary_correlation_bounds(p1: f64, p2: f64) -> (f64, f64) {
    let q1 = 1.0 - p1;
    let q2 = 1.0 - p2;
    let lower = (-((p1 * p2) / (q1 * q2)).sqrt()).max(-((q1 * q2) / (p1 * p2)).sqrt());
    let upper = ((p1 * q2) / (p2 * q1)).sqrt().min(((p2 * q1) / (p1 * q2)).sqrt());
    (lower, upper)
}

/// `P(X_1 = 1, X_2 = 1)` implied by marginals and a phi correlation.
#[must_use]
pub fn joint_success_probability(p1: f64, p2: f64, rho: f64) -> f64 {
    rho.mul_add((p1 * (1.0 - p1) * p2 * (1.0 - p2)).sqrt(), p1 * p2)
}

/// `P(X < h, Y < k)` for a standard bivariate normal with correlation `r`.
#[must_use]
pub fn bivariate_normal_cdf(h: f64, k: f64, r: f64) -> f64 {
    bivariate_normal_upper(-h, -k, r)
}

/// Upper orthant probability `P(X > dh, Y > dk)` (Genz, 2004).
fn bivariate_normal_upper(dh: f64, dk: f64, r: f64) -> f64 {
    const W6: [f64; 3] = [0.171_324_492_379_170_5, 0.360_761_573_048_138_4, 0.467_913_934_572_690_4];
    const X6: [f64; 3] = [0.932_469_514_203_152_2, 0.661_209_386_466_264_7, 0.238_619_186_083_197_0];
    const W12: [f64; 6] = [
        0.047_175_336_386_511_77,
        0.106_939_325_995_318_3,
        0.160_078_328_543_346_4,
        0.203_167_426_723_065_9,
        0.233_492_536_538_354_7,
        0.249_147_045_813_402_9,
    ];
    const X12: [f64; 6] = [
        0.981_560_634_246_719_1,
        0.904_117_256_370_475_0,
        0.769_902_674_194_305_0,
        0.587_317_954_286_617_1,
        0.367_831_498_998_180_2,
        0.125_233_408_511_469_2,
    ];
    const W20: [f64; 10] = [
        0.017_614_007_139_152_12,
        0.040_601_429_800_386_94,
        0.062_672_048_334_109_06,
        0.083_276_741_576_704_75,
        0.101_930_119_817_240_4,
        0.118_194_531_961_518_4,
        0.131_688_638_449_176_6,
        0.142_096_109_318_382_1,
        0.149_172_986_472_603_7,
        0.152_753_387_130_725_9,
    ];
    const X20: [f64; 10] = [
        0.993_128_599_185_094_9,
        0.963_971_927_277_913_8,
        0.912_234_428_251_325_9,
        0.839_116_971_822_218_8,
        0.746_331_906_460_150_8,
        0.636_053_680_726_515_0,
        0.510_867_001_950_827_1,
        0.373_706_088_715_419_6,
        0.227_785_851_141_645_1,
        0.076_526_521_133_497_33,
    ];

    if dh == f64::INFINITY || dk == f64::INFINITY {
        return 0.0;
    }
    if dh == f64::NEG_INFINITY {
        return if dk == f64::NEG_INFINITY {
            1.0
        } else {
            standard_normal_cdf(-dk)
        };
    }
    if dk == f64::NEG_INFINITY {
        return standard_normal_cdf(-dh);
    }
    if r == 0.0 {
        return standard_normal_cdf(-dh) * standard_normal_cdf(-dk);
    }

    let (weights, abscissae): (&[f64], &[f64]) = if r.abs() < 0.3 {
        (&W6, &X6)
    } else if r.abs() < 0.75 {
        (&W12, &X12)
    } else {
        (&W20, &X20)
    };
    // Nodes on (0, 2): 1 - x and 1 + x, each with weight w.
    let nodes = abscissae
        .iter()
        .zip(weights)
        .flat_map(|(x, w)| [(1.0 - x, *w), (1.0 + x, *w)]);

    let tau = std::f64::consts::TAU;
    let h = dh;
    let mut k = dk;
    let mut hk = h * k;
    let mut bvn = 0.0;

    if r.abs() < 0.925 {
        let hs = 0.5 * h.mul_add(h, k * k);
        let asr = 0.5 * r.asin();
        for (x, w) in nodes {
            let sn = (asr * x).sin();
            bvn += w * (sn.mul_add(hk, -hs) / sn.mul_add(-sn, 1.0)).exp();
        }
        bvn = (bvn * asr / tau) + standard_normal_cdf(-h) * standard_normal_cdf(-k);
    } else {
        if r < 0.0 {
            k = -k;
            hk = -hk;
        }
        if r.abs() < 1.0 {
            let a_sq = r.mul_add(-r, 1.0);
            let mut a = a_sq.sqrt();
            let bs = (h - k) * (h - k);
            let c = (4.0 - hk) / 8.0;
            let d = (12.0 - hk) / 80.0;
            let asr = -0.5 * (bs / a_sq + hk);
            if asr > -100.0 {
                bvn = a
                    * asr.exp()
                    * (1.0 - c * (bs - a_sq) * d.mul_add(-bs, 1.0) / 3.0 + c * d * a_sq * a_sq);
            }
            if hk > -100.0 {
                let b = bs.sqrt();
                let sp = tau.sqrt() * standard_normal_cdf(-b / a);
                bvn -= (-hk / 2.0).exp() * sp * b * (1.0 - c * bs * d.mul_add(-bs, 1.0) / 3.0);
            }
            a /= 2.0;
            let mut sum = 0.0;
            for (x, w) in nodes {
                let xs = (a * x) * (a * x);
                let asr = -0.5 * (bs / xs + hk);
                if asr > -100.0 {
                    let sp = c * xs * (5.0 * d).mul_add(xs, 1.0) + 1.0;
                    let rs = (1.0 - xs).sqrt();
                    let ep = (-(hk / 2.0) * xs / ((1.0 + rs) * (1.0 + rs))).exp() / rs;
                    sum += w * asr.exp() * (sp - ep);
                }
            }
            bvn = (a * sum - bvn) / tau;
        }
        if r > 0.0 {
            bvn += standard_normal_cdf(-h.max(k));
        } else if h >= k {
            bvn = -bvn;
        } else {
            let span = if h < 0.0 {
                standard_normal_cdf(k) - standard_normal_cdf(h)
            } else {
                standard_normal_cdf(-h) - standard_normal_cdf(-k)
            };
            bvn = span - bvn;
        }
    }
    bvn.clamp(0.0, 1.0)
}

/// Latent normal correlation reproducing a joint success probability.
fn latent_correlation(z1: f64, z2: f64, joint: f64) -> f64 {
    let mut low = -1.0_f64;
    let mut high = 1.0_f64;
    for _ in 0..BISECTION_MAX_ITERS {
        let mid = 0.5 * (low + high);
        if bivariate_normal_cdf(z1, z2, mid) < joint {
            low = mid;
        } else {
            high = mid;
        }
        if high - low < BISECTION_TOLERANCE {
            break;
        }
    }
    0.5 * (low + high)
}

/// Prepared Emrich-Piedmonte sampler for one probability vector.
#[derive(Debug, Clone)]
pub struct EpPlan {
    thresholds: Vec<f64>,
    latent: CorrelationMatrix,
    factor: CorrelationFactor,
}

impl EpPlan {
    /// # Errors
    ///
    /// Returns `BinaryError::InvalidProbability` for probabilities outside
    /// `(0, 1)`, `BinaryError::InfeasibleCorrelation` when a pairwise target
    /// is outside the attainable range, and `BinaryError::Correlation` if the
    /// latent correlation matrix is not positive semi-definite.
    pub fn new(probs: &[f64], correlation: &CorrelationMatrix) -> Result<Self, BinaryError> {
        let dim = correlation.dim();
        if probs.len() != dim {
            return Err(BinaryError::DimensionMismatch {
                expected: dim,
                found: probs.len(),
            });
        }
        if let Some((index, value)) = probs
            .iter()
            .copied()
            .enumerate()
            .find(|(_, p)| !(p.is_finite() && *p > 0.0 && *p < 1.0))
        {
            return Err(BinaryError::InvalidProbability { index, value });
        }

        for i in 0..dim {
            for j in 0..i {
                let target = correlation.get(i, j);
                let (lower, upper) = binary_correlation_bounds(probs[i], probs[j]);
                if target < lower - BOUND_TOLERANCE || target > upper + BOUND_TOLERANCE {
                    return Err(BinaryError::InfeasibleCorrelation {
                        i,
                        j,
                        target,
                        lower,
                        upper,
                    });
                }
            }
        }

        let thresholds = probs
            .iter()
            .copied()
            .map(standard_normal_quantile)
            .collect::<Vec<_>>();
        let mut latent = faer::Mat::<f64>::zeros(dim, dim);
        for i in 0..dim {
            latent[(i, i)] = 1.0;
            for j in 0..i {
                let joint = joint_success_probability(probs[i], probs[j], correlation.get(i, j));
                let psi = latent_correlation(thresholds[i], thresholds[j], joint);
                latent[(i, j)] = psi;
                latent[(j, i)] = psi;
            }
        }
        let latent = CorrelationMatrix::new(latent)?;
        let factor = CorrelationFactor::new(&latent)?;
        Ok(Self {
            thresholds,
            latent,
            factor,
        })
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.thresholds.len()
    }

    /// Latent normal correlation matrix `Ψ`.
    #[must_use]
    pub const fn latent_correlation(&self) -> &CorrelationMatrix {
        &self.latent
    }

    /// One correlated binary vector.
    pub fn sample(&self, rng: &mut StdRng) -> Vec<u8> {
        sample_correlated_normals(&self.factor, rng)
            .into_iter()
            .zip(&self.thresholds)
            .map(|(w, z)| u8::from(w < *z))
            .collect()
    }
}

/// Draw one binary vector with the given marginals and phi correlations.
///
/// # Errors
///
/// See [`EpPlan::new`].
pub fn sample_binary_ep(
    probs: &[f64],
    correlation: &CorrelationMatrix,
    rng: &mut StdRng,
) -> Result<Vec<u8>, BinaryError> {
    Ok(EpPlan::new(probs, correlation)?.sample(rng))
}
