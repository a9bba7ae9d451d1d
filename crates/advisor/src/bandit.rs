//! The C²UCB contextual bandit: covariance `V`, bias `b`, per-arm upper
//! confidence bounds, and the split creation/usage reward update
//! (spec.md §4.4).

use rustc_hash::FxHashMap;

use crate::arm::ArmId;
use crate::error::{AdvisorError, Result};

/// Dense `d x d` matrix stored row-major. `d` is on the order of the
/// total column count (spec.md §9: "typically <= a few hundred"), so a
/// hand-rolled dense representation with an explicit inverse refresh each
/// round is the teacher's preferred trade-off over pulling in a linear
/// algebra crate for a handful of small, well-understood operations.
#[derive(Debug, Clone)]
struct DenseMatrix {
    d: usize,
    data: Vec<f64>,
}

impl DenseMatrix {
    fn identity(d: usize, scale: f64) -> Self {
        let mut data = vec![0.0; d * d];
        for i in 0..d {
            data[i * d + i] = scale;
        }
        DenseMatrix { d, data }
    }

    fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.d + j]
    }

    /// `self += scale * outer(x, x)`.
    fn add_scaled_outer(&mut self, x: &[f64], scale: f64) {
        if scale == 0.0 {
            return;
        }
        for i in 0..self.d {
            if x[i] == 0.0 {
                continue;
            }
            let row = i * self.d;
            for j in 0..self.d {
                self.data[row + j] += scale * x[i] * x[j];
            }
        }
    }

    fn scale_and_add_identity(&mut self, forget_factor: f64, lambda: f64) {
        for i in 0..self.d {
            for j in 0..self.d {
                let identity = if i == j { lambda } else { 0.0 };
                let idx = i * self.d + j;
                self.data[idx] = identity + forget_factor * self.data[idx];
            }
        }
    }

    /// Gauss-Jordan inversion with partial pivoting. `V` is kept PSD by
    /// construction (spec.md §3 invariants), so this should only fail
    /// when `lambda == 0` and the contexts seen so far are rank-deficient.
    fn invert(&self) -> Result<DenseMatrix> {
        let d = self.d;
        let mut aug = vec![0.0; d * 2 * d];
        for i in 0..d {
            for j in 0..d {
                aug[i * 2 * d + j] = self.get(i, j);
            }
            aug[i * 2 * d + d + i] = 1.0;
        }

        for col in 0..d {
            let mut pivot_row = col;
            let mut pivot_val = aug[col * 2 * d + col].abs();
            for row in (col + 1)..d {
                let val = aug[row * 2 * d + col].abs();
                if val > pivot_val {
                    pivot_val = val;
                    pivot_row = row;
                }
            }
            if pivot_val < 1e-12 {
                return Err(AdvisorError::ArithmeticError(
                    "covariance matrix is singular during inversion".to_string(),
                ));
            }
            if pivot_row != col {
                for j in 0..(2 * d) {
                    aug.swap(col * 2 * d + j, pivot_row * 2 * d + j);
                }
            }
            let pivot = aug[col * 2 * d + col];
            for j in 0..(2 * d) {
                aug[col * 2 * d + j] /= pivot;
            }
            for row in 0..d {
                if row == col {
                    continue;
                }
                let factor = aug[row * 2 * d + col];
                if factor == 0.0 {
                    continue;
                }
                for j in 0..(2 * d) {
                    aug[row * 2 * d + j] -= factor * aug[col * 2 * d + j];
                }
            }
        }

        let mut out = vec![0.0; d * d];
        for i in 0..d {
            for j in 0..d {
                out[i * d + j] = aug[i * 2 * d + d + j];
            }
        }
        Ok(DenseMatrix { d, data: out })
    }

    /// `x^T M x`.
    fn quadratic_form(&self, x: &[f64]) -> f64 {
        let mut acc = 0.0;
        for i in 0..self.d {
            if x[i] == 0.0 {
                continue;
            }
            let row = i * self.d;
            let mut row_sum = 0.0;
            for j in 0..self.d {
                row_sum += self.data[row + j] * x[j];
            }
            acc += x[i] * row_sum;
        }
        acc
    }

    /// `M x`.
    fn mul_vec(&self, x: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.d];
        for i in 0..self.d {
            let row = i * self.d;
            let mut acc = 0.0;
            for j in 0..self.d {
                acc += self.data[row + j] * x[j];
            }
            out[i] = acc;
        }
        out
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// One arm's split context: the creation-only vector (every coordinate
/// zero except the size-delta coordinate) and the usage vector (every
/// coordinate except size-delta, which is zeroed).
fn split_context(x: &[f64], creation_coordinate: usize) -> (Vec<f64>, Vec<f64>) {
    let mut creation = vec![0.0; x.len()];
    creation[creation_coordinate] = x[creation_coordinate];
    let mut usage = x.to_vec();
    usage[creation_coordinate] = 0.0;
    (creation, usage)
}

/// Reward observed for one played arm: `(gain, creation_cost)`. The
/// bandit learns a separate coefficient for "this index already exists"
/// (gain) and "this index had to be built this round" (creation_cost),
/// per the disjoint update in spec.md §4.4.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArmReward {
    pub gain: f64,
    pub creation_cost: f64,
}

/// C²UCB bandit state: `V`, `b`, the fixed hyper-parameter block, and the
/// rejection-sampling bookkeeping (spec.md §4.4 last bullet; off by
/// default per the Open Question in spec.md §9).
#[derive(Debug, Clone)]
pub struct CUcbBandit {
    d: usize,
    creation_coordinate: usize,
    lambda: f64,
    alpha0: f64,
    alpha: f64,
    alpha_reduction_rate: f64,
    creation_cost_reduction_factor: f64,
    v: DenseMatrix,
    b: Vec<f64>,
    round: u64,
    round_created: u64,
    delta2: f64,
    tau: u32,
    reject_accu: f64,
}

impl CUcbBandit {
    pub fn new(
        d: usize,
        creation_coordinate: usize,
        alpha0: f64,
        lambda: f64,
        alpha_reduction_rate: f64,
        creation_cost_reduction_factor: f64,
        delta2: f64,
        tau: u32,
    ) -> Self {
        CUcbBandit {
            d,
            creation_coordinate,
            lambda,
            alpha0,
            alpha: alpha0,
            alpha_reduction_rate,
            creation_cost_reduction_factor,
            v: DenseMatrix::identity(d, lambda),
            b: vec![0.0; d],
            round: 0,
            round_created: 0,
            delta2,
            tau,
            reject_accu: 0.0,
        }
    }

    pub fn dimension(&self) -> usize {
        self.d
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// `V == lambda*I` exactly, used to assert the hard-reset invariant
    /// (spec.md §8 item 5).
    pub fn is_at_initial_state(&self) -> bool {
        self.v.data == DenseMatrix::identity(self.d, self.lambda).data && self.b.iter().all(|&x| x == 0.0)
    }

    /// `V` is exactly symmetric (spec.md §3 "`V` stays symmetric; every
    /// update is a rank-<=2 outer-product add, so `V - lambda*I` is PSD").
    /// Diagnostic-only; not used by `compute_ucbs`/`update` themselves.
    pub fn covariance_is_symmetric(&self) -> bool {
        (0..self.d).all(|i| (0..self.d).all(|j| self.v.get(i, j) == self.v.get(j, i)))
    }

    /// Weight estimate `w_hat = V^-1 b`.
    pub fn weight_vector(&self) -> Result<Vec<f64>> {
        let v_inv = self.v.invert()?;
        Ok(v_inv.mul_vec(&self.b))
    }

    /// Computes per-arm upper confidence bounds for the given contexts
    /// and decays `alpha` for the next round (spec.md §4.4 "Selection").
    /// Recovers from a singular `V` by reinitializing it to `lambda*I`
    /// (spec.md §7 `ArithmeticError`).
    pub fn compute_ucbs(&mut self, contexts: &[(ArmId, Vec<f64>)]) -> Result<FxHashMap<ArmId, f64>> {
        let v_inv = match self.v.invert() {
            Ok(inv) => inv,
            Err(_) => {
                self.v = DenseMatrix::identity(self.d, self.lambda);
                self.v.invert()?
            }
        };
        let w_hat = v_inv.mul_vec(&self.b);

        let mut ucbs = FxHashMap::default();
        for (id, x) in contexts {
            let creation_cost = w_hat[self.creation_coordinate] * x[self.creation_coordinate];
            let mean_reward = dot(&w_hat, x) - creation_cost;
            let confidence = self.alpha * v_inv.quadratic_form(x).max(0.0).sqrt();
            let ucb = mean_reward + confidence + creation_cost / self.creation_cost_reduction_factor;
            ucbs.insert(*id, ucb);
        }

        self.alpha /= self.alpha_reduction_rate;
        self.round += 1;
        Ok(ucbs)
    }

    /// Applies the disjoint creation/usage rank-1 updates for every
    /// played arm (spec.md §4.4 "Update").
    pub fn update(&mut self, played: &[(Vec<f64>, ArmReward)]) {
        for (x, reward) in played {
            let (x_creation, x_usage) = split_context(x, self.creation_coordinate);
            self.v.add_scaled_outer(&x_usage, 1.0);
            for i in 0..self.d {
                self.b[i] += x_usage[i] * reward.gain;
            }
            self.v.add_scaled_outer(&x_creation, 1.0);
            for i in 0..self.d {
                self.b[i] += x_creation[i] * (-reward.creation_cost);
            }
        }
    }

    fn hard_reset(&mut self) {
        self.alpha = self.alpha0;
        self.v = DenseMatrix::identity(self.d, self.lambda);
        self.b = vec![0.0; self.d];
    }

    /// Forgets history on workload shift (spec.md §4.4 "Workload-shift
    /// forget"): a hard reset above a 0.5 new-query fraction, otherwise an
    /// exponential forgetting factor applied to both `V` and `b`.
    pub fn workload_change_trigger(&mut self, fraction: f64) {
        if fraction > 0.5 {
            self.hard_reset();
            return;
        }
        let forget_factor = 1.0 - fraction * 2.0;
        if fraction > 0.1 {
            self.alpha = self.alpha0;
        }
        self.v.scale_and_add_identity(forget_factor, self.lambda);
        for b in &mut self.b {
            *b *= forget_factor;
        }
    }

    /// Optional rejection-sampling confidence term (spec.md §4.4 last
    /// bullet). Exposed for testing and tuning; never gates selection.
    pub fn alpha_t(&self, t: u64, m: usize) -> f64 {
        let term = (1.0 + (t * m as u64) as f64 / self.lambda) / self.delta2;
        (self.d as f64 * term.ln()).sqrt() + self.lambda.sqrt()
    }

    /// Mahalanobis-distance-based "error UCB" for one arm's context.
    pub fn error_ucb(&self, x: &[f64], t: u64, m: usize) -> Result<f64> {
        let v_inv = self.v.invert()?;
        Ok(2.0 * self.alpha_t(t, m) * v_inv.quadratic_form(x))
    }

    fn tau_prime(&self, t: u64) -> u32 {
        let elapsed = t.saturating_sub(self.round_created) as u32 + 1;
        elapsed.min(self.tau)
    }

    /// Rolling "badness" used by the Hoeffding-style rejection LCB.
    pub fn model_badness(&self, t: u64) -> f64 {
        self.reject_accu / self.tau_prime(t).max(1) as f64
    }

    /// Records one rejection-sampling verdict (`est - true > err_ucb`)
    /// into the rolling accumulator.
    pub fn record_rejection(&mut self, rejected: bool) {
        self.reject_accu += if rejected { 1.0 } else { 0.0 };
    }
}
