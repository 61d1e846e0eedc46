use std::fmt;
use std::str::FromStr;

use linfa::Float;
use ndarray::{ArrayBase, Data, Ix1};
#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};

use crate::error::{GlmError, Result};
use crate::link::{clamped_exp, inverse_logit, log_add_exp, log_inverse_logit};

/// Working weights are kept inside `[MIN_WEIGHT, MAX_WEIGHT]`
pub(crate) const MIN_WEIGHT: f64 = 1e-10;
pub(crate) const MAX_WEIGHT: f64 = 1e10;

/// Distribution of the response, each with its canonical (or log) link
///
/// | Family | Link | Mean |
/// | :--- | :--- | :--- |
/// | `Gaussian` | identity | `z` |
/// | `Binomial` | logit | `1 / (1 + exp(-z))` |
/// | `Poisson` | log | `exp(z)` |
/// | `NegativeBinomial(r)` | log | `exp(z)` with dispersion `r` |
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Family<F> {
    Gaussian,
    Binomial,
    Poisson,
    NegativeBinomial(F),
}

impl<F: Float> Default for Family<F> {
    fn default() -> Self {
        Family::Gaussian
    }
}

impl<F> Family<F> {
    pub fn name(&self) -> &'static str {
        match self {
            Family::Gaussian => "gaussian",
            Family::Binomial => "binomial",
            Family::Poisson => "poisson",
            Family::NegativeBinomial(_) => "negativebinomial",
        }
    }
}

impl<F> fmt::Display for Family<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parses a family name, the negative binomial starts with dispersion `1`
impl<F: Float> FromStr for Family<F> {
    type Err = GlmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gaussian" | "normal" => Ok(Family::Gaussian),
            "binomial" | "logistic" => Ok(Family::Binomial),
            "poisson" => Ok(Family::Poisson),
            "negativebinomial" | "negative_binomial" => Ok(Family::NegativeBinomial(F::one())),
            _ => Err(GlmError::UnknownFamily(s.to_string())),
        }
    }
}

impl<F: Float> Family<F> {
    /// Factor between the likelihood and the weighted squares of its quadratic
    /// approximation. The gaussian loss is already a sum of squares, all other
    /// losses are approximated by half a sum of squares.
    pub(crate) fn penalty_scale(&self) -> F {
        match self {
            Family::Gaussian => F::one(),
            Family::Binomial | Family::Poisson | Family::NegativeBinomial(_) => F::cast(2.),
        }
    }

    /// Mean response for a linear predictor `z`
    pub fn mean(&self, z: F) -> F {
        match self {
            Family::Gaussian => z,
            Family::Binomial => inverse_logit(z),
            Family::Poisson | Family::NegativeBinomial(_) => clamped_exp(z),
        }
    }

    /// Negative log-likelihood of one observation, up to terms constant in `z`
    pub(crate) fn loss(&self, y: F, z: F, shrinkage: F) -> F {
        match *self {
            Family::Gaussian => (y - z) * (y - z),
            Family::Binomial => {
                let floor = shrinkage.ln();
                let log_p = log_inverse_logit(z).max(floor);
                let log_q = log_inverse_logit(-z).max(floor);
                -(y * log_p + (F::one() - y) * log_q)
            }
            Family::Poisson => clamped_exp(z) - y * z,
            Family::NegativeBinomial(r) => -(y * z - (y + r) * log_add_exp(r.ln(), z)),
        }
    }

    /// Derivative of [`loss`](Self::loss) with respect to `z`
    pub(crate) fn loss_derivative(&self, y: F, z: F, shrinkage: F) -> F {
        match *self {
            Family::Gaussian => F::cast(-2.) * (y - z),
            Family::Binomial => {
                let (p_active, q_active) = binomial_unclipped(z, shrinkage);
                let mut derivative = F::zero();
                if p_active {
                    derivative -= y * inverse_logit(-z);
                }
                if q_active {
                    derivative += (F::one() - y) * inverse_logit(z);
                }
                derivative
            }
            Family::Poisson => clamped_exp(z) - y,
            Family::NegativeBinomial(r) => (y + r) * inverse_logit(z - r.ln()) - y,
        }
    }

    /// Second derivative of [`loss`](Self::loss) with respect to `z`
    pub(crate) fn curvature(&self, y: F, z: F, shrinkage: F) -> F {
        match *self {
            Family::Gaussian => F::cast(2.),
            Family::Binomial => {
                let (p_active, q_active) = binomial_unclipped(z, shrinkage);
                let p = inverse_logit(z);
                let mut share = F::zero();
                if p_active {
                    share += y;
                }
                if q_active {
                    share += F::one() - y;
                }
                share * p * (F::one() - p)
            }
            Family::Poisson => clamped_exp(z),
            Family::NegativeBinomial(r) => {
                let p = inverse_logit(z - r.ln());
                (y + r) * p * (F::one() - p)
            }
        }
    }

    /// One Fisher scoring step at `z`, returns the working weight (before the
    /// sample weight is applied) and the working response.
    pub(crate) fn working(&self, y: F, z: F, shrinkage: F) -> (F, F) {
        let min_weight = F::cast(MIN_WEIGHT);
        match *self {
            Family::Gaussian => (F::one(), y),
            Family::Binomial => {
                let mu = inverse_logit(z).max(shrinkage).min(F::one() - shrinkage);
                let variance = mu * (F::one() - mu);
                (variance, z + (y - mu) / variance.max(min_weight))
            }
            Family::Poisson => {
                let mu = clamped_exp(z);
                (mu, z + (y - mu) / mu.max(min_weight))
            }
            Family::NegativeBinomial(r) => {
                let mu = clamped_exp(z);
                (mu * r / (mu + r), z + (y - mu) / mu.max(min_weight))
            }
        }
    }

    /// Checks that every target lies in the support of the distribution
    pub(crate) fn check_targets<D: Data<Elem = F>>(&self, y: &ArrayBase<D, Ix1>) -> Result<()> {
        if y.iter().any(|v| !v.is_finite()) {
            return Err(GlmError::InvalidValues);
        }
        let valid = match self {
            Family::Gaussian => true,
            Family::Binomial => y.iter().all(|&v| v >= F::zero() && v <= F::one()),
            Family::Poisson | Family::NegativeBinomial(_) => y.iter().all(|&v| v >= F::zero()),
        };
        if valid {
            Ok(())
        } else {
            Err(GlmError::InvalidTargets(self.name()))
        }
    }
}

/// Whether `ln p` and `ln (1 - p)` lie above the floor of the binomial loss,
/// the loss is flat in every clipped term
fn binomial_unclipped<F: Float>(z: F, shrinkage: F) -> (bool, bool) {
    let floor = shrinkage.ln();
    (log_inverse_logit(z) > floor, log_inverse_logit(-z) > floor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    const FAMILIES: [Family<f64>; 4] = [
        Family::Gaussian,
        Family::Binomial,
        Family::Poisson,
        Family::NegativeBinomial(2.5),
    ];

    #[test]
    fn parses_family_names() {
        assert_eq!("gaussian".parse::<Family<f64>>().unwrap(), Family::Gaussian);
        assert_eq!("Binomial".parse::<Family<f64>>().unwrap(), Family::Binomial);
        assert_eq!("poisson".parse::<Family<f32>>().unwrap(), Family::Poisson);
        assert_eq!(
            "negativebinomial".parse::<Family<f64>>().unwrap(),
            Family::NegativeBinomial(1.0)
        );
        assert!(matches!(
            "gamma".parse::<Family<f64>>(),
            Err(GlmError::UnknownFamily(name)) if name == "gamma"
        ));
    }

    #[test]
    fn derivative_matches_finite_differences() {
        let eps = 1e-6;
        for family in FAMILIES.iter() {
            for &(y, z) in &[(0.0, -1.2), (1.0, 0.3), (3.0, 1.1), (0.0, 2.0)] {
                let numeric = (family.loss(y, z + eps, 1e-10) - family.loss(y, z - eps, 1e-10))
                    / (2. * eps);
                assert_abs_diff_eq!(family.loss_derivative(y, z, 1e-10), numeric, epsilon = 1e-6);

                let numeric = (family.loss_derivative(y, z + eps, 1e-10)
                    - family.loss_derivative(y, z - eps, 1e-10))
                    / (2. * eps);
                assert_abs_diff_eq!(family.curvature(y, z, 1e-10), numeric, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn working_step_is_a_newton_step_on_the_score() {
        // weight * (response - z) equals the negative loss derivative, up to
        // the scale between loss and squared error
        for family in FAMILIES.iter() {
            for &(y, z) in &[(0.0, -0.5), (1.0, 0.8), (2.0, 0.1)] {
                let (weight, response) = family.working(y, z, 1e-10);
                let lhs = 2. / family.penalty_scale() * weight * (response - z);
                assert_abs_diff_eq!(lhs, -family.loss_derivative(y, z, 1e-10), epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn negative_binomial_weight_approaches_poisson() {
        let (w_nb, r_nb) = Family::NegativeBinomial(1e9).working(3.0, 0.7, 1e-10);
        let (w_p, r_p) = Family::<f64>::Poisson.working(3.0, 0.7, 1e-10);
        assert_abs_diff_eq!(w_nb, w_p, epsilon = 1e-6);
        assert_abs_diff_eq!(r_nb, r_p, epsilon = 1e-12);
    }

    #[test]
    fn binomial_loss_is_finite_for_saturated_predictions() {
        let loss = Family::<f64>::Binomial.loss(0.0, 800.0, 1e-10);
        assert!(loss.is_finite());
        assert_abs_diff_eq!(loss, -(1e-10f64).ln());
        let (weight, response) = Family::<f64>::Binomial.working(1.0, 800.0, 1e-10);
        assert!(weight > 0.0);
        assert!(response.is_finite());
    }

    #[test]
    fn binomial_derivatives_vanish_where_the_loss_is_clipped() {
        let binomial = Family::<f64>::Binomial;
        let eps = 1e-6;
        for &(y, z) in &[(0.0, 30.0), (1.0, -30.0), (0.0, 800.0)] {
            let numeric =
                (binomial.loss(y, z + eps, 1e-10) - binomial.loss(y, z - eps, 1e-10)) / (2. * eps);
            assert_abs_diff_eq!(numeric, 0.);
            assert_abs_diff_eq!(binomial.loss_derivative(y, z, 1e-10), 0.);
            assert_abs_diff_eq!(binomial.curvature(y, z, 1e-10), 0.);
        }
        // only the clipped term drops out
        assert_abs_diff_eq!(
            binomial.loss_derivative(1.0, 30.0, 1e-10),
            -inverse_logit(-30.0f64),
            epsilon = 1e-20
        );
    }

    #[test]
    fn rejects_targets_outside_support() {
        assert!(Family::<f64>::Binomial.check_targets(&array![0., 1., 0.5]).is_ok());
        assert!(matches!(
            Family::<f64>::Binomial.check_targets(&array![0., 2.]),
            Err(GlmError::InvalidTargets("binomial"))
        ));
        assert!(Family::<f64>::Poisson.check_targets(&array![-1.]).is_err());
        assert!(Family::NegativeBinomial(1.0).check_targets(&array![0., 4.]).is_ok());
        assert!(matches!(
            Family::<f64>::Gaussian.check_targets(&array![f64::NAN]),
            Err(GlmError::InvalidValues)
        ));
    }
}
