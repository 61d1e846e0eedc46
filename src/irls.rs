//! Iteratively reweighted least squares
//!
//! Every outer iteration linearizes the likelihood at the current linear
//! predictor (one Fisher scoring step) and hands the resulting penalized weighted
//! least squares problem to the inner solver.

use linfa::Float;
use ndarray::{Array1, ArrayView1, ArrayView2, Zip};
use tracing::{debug, warn};

use crate::design::Coefficients;
use crate::error::Result;
use crate::family::{Family, MAX_WEIGHT, MIN_WEIGHT};
use crate::hyperparams::{GlmValidParams, Solver};
use crate::wls::{BoxBounds, PenalizedLeastSquares};

/// Result of an IRLS run, non-convergence is not an error
#[derive(Debug, Clone)]
pub(crate) struct IrlsOutcome<F> {
    pub coefficients: Coefficients<F>,
    pub n_iterations: u32,
    pub n_inner_iterations: u32,
    pub converged: bool,
}

/// Working weights and responses at the linear predictor `z`
pub(crate) fn reweight<F: Float>(
    family: Family<F>,
    y: ArrayView1<F>,
    z: ArrayView1<F>,
    sample_weight: ArrayView1<F>,
    shrinkage: F,
) -> (Array1<F>, Array1<F>) {
    let (min_weight, max_weight) = (F::cast(MIN_WEIGHT), F::cast(MAX_WEIGHT));
    let mut weights = Array1::zeros(y.len());
    let mut response = Array1::zeros(y.len());
    Zip::from(&mut weights)
        .and(&mut response)
        .and(&y)
        .and(&z)
        .and(&sample_weight)
        .for_each(|weight, resp, &y, &z, &sw| {
            let (w, r) = family.working(y, z, shrinkage);
            let w = sw * w;
            // NaN weights fall through both comparisons and end up at the floor
            *weight = if w > min_weight {
                w.min(max_weight)
            } else {
                min_weight
            };
            *resp = r;
        });
    (weights, response)
}

#[tracing::instrument(
    level = "debug",
    skip_all,
    fields(family = %params.family(), solver = params.solver().name())
)]
pub(crate) fn irls<F: Float>(
    params: &GlmValidParams<F>,
    x: ArrayView2<F>,
    y: ArrayView1<F>,
    sample_weight: ArrayView1<F>,
    bounds: Option<&BoxBounds<F>>,
) -> Result<IrlsOutcome<F>> {
    let family = params.family();
    let scale = family.penalty_scale();
    let (l1, l2) = (scale * params.l1_penalty(), scale * params.l2_penalty());
    let with_intercept = params.with_intercept();
    let solver = params.solver();

    let mut coef = match params.initial_params() {
        Some((weights, intercept)) => Coefficients::new(
            weights.clone(),
            if with_intercept { Some(*intercept) } else { None },
        ),
        None => Coefficients::zeros(x.ncols(), with_intercept),
    };

    let mut n_inner_iterations = 0;
    let mut converged = false;
    let mut n_iterations = 0;
    while n_iterations < params.max_iterations() {
        n_iterations += 1;

        let z = coef.linear_predictor(&x);
        let (weights, response) =
            reweight(family, y, z.view(), sample_weight, params.shrinkage());
        let problem = PenalizedLeastSquares {
            x: x.view(),
            weights: weights.view(),
            response: response.view(),
            l1,
            l2,
            bounds,
        };

        let (next, inner_converged) = match solver {
            Solver::Inversion => {
                n_inner_iterations = 0;
                (problem.invert(with_intercept)?, true)
            }
            Solver::CoordinateDescent => {
                let mut next = coef.clone();
                let (n_passes, inner_converged) = problem.coordinate_descent(
                    &mut next,
                    params.tolerance(),
                    params.max_inner_iterations(),
                );
                n_inner_iterations = n_passes;
                (next, inner_converged)
            }
        };

        let change = next.distance(&coef);
        coef = next;
        debug!(
            iteration = n_iterations,
            inner_iterations = n_inner_iterations,
            %change,
            "reweighted least squares step"
        );

        // the quadratic approximation of the gaussian loss is exact, an
        // unfinished inner solve is warm started again instead
        if inner_converged && matches!(family, Family::Gaussian) {
            converged = true;
            break;
        }
        if change < params.tolerance() {
            converged = true;
            break;
        }
    }

    if converged {
        debug!(iterations = n_iterations, "converged");
    } else {
        warn!(
            iterations = n_iterations,
            inner_iterations = n_inner_iterations,
            "stopped before convergence, the iteration budget is exhausted"
        );
    }

    Ok(IrlsOutcome {
        coefficients: coef,
        n_iterations,
        n_inner_iterations,
        converged,
    })
}
