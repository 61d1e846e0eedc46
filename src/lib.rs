#![doc = include_str!("../README.md")]

use linfa::Float;
use ndarray::Array1;

#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};

mod algorithm;
mod design;
mod error;
mod family;
mod hyperparams;
mod irls;
pub mod link;
mod loss;
mod quasi_newton;
mod wls;

pub use design::{Coefficients, DesignMatrix};
pub use error::{GlmError, Result};
pub use family::Family;
pub use hyperparams::{
    GlmParams, GlmValidParams, QuasiNewton, Solver, SparseGlmParams, SparseGlmValidParams,
};
pub use quasi_newton::OptimizerStatus;

#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Debug, PartialEq)]
/// Generalized linear model fitted by iteratively reweighted least squares
///
/// This struct contains the coefficients of a fitted model together with the
/// diagnostics of the fit.
///
/// ## Model implementation
///
/// Each outer iteration replaces the likelihood by its quadratic approximation at
/// the current coefficients, which yields a weighted least squares problem with
/// working weights and working responses. The inner problem is solved in closed
/// form when only a ridge penalty is present. With an l1 penalty or box
/// constraints it is solved by cyclical coordinate descent, which soft-thresholds
/// and clips one coefficient at a time. Iterations stop once the coefficients
/// move less than the tolerance.
///
/// See also:
/// * [Regularization Paths for Generalized Linear Models via Coordinate
/// Descent](http://www.jstatsoft.org/v33/i01/paper)
pub struct Glm<F> {
    family: Family<F>,
    coefficients: Coefficients<F>,
    n_iterations: u32,
    n_inner_iterations: u32,
    converged: bool,
}

impl<F: Float> Glm<F> {
    /// Create a default parameter set for the construction of a GLM
    ///
    /// By default a gaussian model with intercept and without penalties is fitted.
    pub fn params() -> GlmParams<F> {
        GlmParams::new()
    }

    /// Create a lasso parameter set for the given family
    pub fn lasso(family: Family<F>, l1_penalty: F) -> GlmParams<F> {
        GlmParams::new().family(family).l1_penalty(l1_penalty)
    }

    /// Create a ridge parameter set for the given family
    pub fn ridge(family: Family<F>, l2_penalty: F) -> GlmParams<F> {
        GlmParams::new().family(family).l2_penalty(l2_penalty)
    }

    /// Number of outer IRLS iterations
    pub fn n_iterations(&self) -> u32 {
        self.n_iterations
    }

    /// Number of coordinate descent passes in the last inner solve, zero for
    /// direct inversion
    pub fn n_inner_iterations(&self) -> u32 {
        self.n_inner_iterations
    }

    /// Whether the coefficients settled before the iteration budget ran out
    pub fn converged(&self) -> bool {
        self.converged
    }
}

#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Debug, PartialEq)]
/// Generalized linear model fitted by an external quasi-Newton optimizer
///
/// Besides the coefficients, the model keeps the objective value and its gradient
/// at the solution, the number of objective evaluations and the termination
/// status of the optimizer. A failed or exhausted optimizer still produces a
/// model, holding the last coefficients it evaluated.
pub struct SparseGlm<F> {
    family: Family<F>,
    coefficients: Coefficients<F>,
    loss: F,
    gradient: Array1<F>,
    n_evaluations: u64,
    status: OptimizerStatus,
}

impl<F: Float> SparseGlm<F> {
    pub fn params() -> SparseGlmParams<F> {
        SparseGlmParams::new()
    }

    /// Penalized negative log-likelihood at the coefficients
    pub fn loss(&self) -> F {
        self.loss
    }

    /// Gradient of [`loss`](Self::loss) in the flat layout, intercept trailing
    pub fn gradient(&self) -> &Array1<F> {
        &self.gradient
    }

    pub fn n_evaluations(&self) -> u64 {
        self.n_evaluations
    }

    pub fn status(&self) -> &OptimizerStatus {
        &self.status
    }

    pub fn converged(&self) -> bool {
        self.status == OptimizerStatus::Converged
    }
}

macro_rules! impl_fitted_model {
    ($model:ident) => {
        impl<F: Float> $model<F> {
            /// Coefficients of the features
            pub fn hyperplane(&self) -> &Array1<F> {
                self.coefficients.weights()
            }

            /// Intercept, zero if none was fitted
            pub fn intercept(&self) -> F {
                self.coefficients.intercept().unwrap_or_else(F::zero)
            }

            pub fn coefficients(&self) -> &Coefficients<F> {
                &self.coefficients
            }

            pub fn family(&self) -> Family<F> {
                self.family
            }

            /// Linear predictor `X w + c`
            pub fn predict_linear<X: DesignMatrix<F> + ?Sized>(&self, x: &X) -> Array1<F> {
                self.coefficients.linear_predictor(x)
            }

            /// Mean response, the inverse link applied to the linear predictor
            pub fn predict_mean<X: DesignMatrix<F> + ?Sized>(&self, x: &X) -> Array1<F> {
                let family = self.family;
                self.predict_linear(x).mapv(|z| family.mean(z))
            }

            /// Probability of the positive class, binomial models only
            pub fn predict_proba<X: DesignMatrix<F> + ?Sized>(&self, x: &X) -> Result<Array1<F>> {
                match self.family {
                    Family::Binomial => Ok(self.predict_linear(x).mapv(link::inverse_logit)),
                    family => Err(GlmError::NotBinomial(family.name())),
                }
            }
        }
    };
}

impl_fitted_model!(Glm);
impl_fitted_model!(SparseGlm);
