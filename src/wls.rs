//! Penalized weighted least squares, the inner problem of every IRLS step
//!
//! Minimizes
//! ```ignore
//! sum_i weight_i * (response_i - x_i w - c)^2 + l1 * ||w||_1 + 0.5 * l2 * ||w||^2
//! ```
//! subject to optional box constraints, either in closed form or by cyclical
//! coordinate descent.

use linfa::Float;
use linfa_linalg::{
    cholesky::Cholesky,
    triangular::{SolveTriangularInplace, UPLO},
};
use ndarray::{concatenate, Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};

use crate::design::{Coefficients, DesignMatrix};
use crate::error::{GlmError, Result};

/// Per-coefficient box constraints, `±inf` marks an open side
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct BoxBounds<F> {
    lower: Array1<F>,
    upper: Array1<F>,
    intercept: Option<(F, F)>,
}

impl<F: Float> BoxBounds<F> {
    /// Reads a `(p, 2)` or, with an intercept, `(p + 1, 2)` matrix of `(lower, upper)` rows
    pub fn from_matrix(bounds: &Array2<F>, n_features: usize, with_intercept: bool) -> Result<Self> {
        let rows = bounds.nrows();
        if rows != n_features && !(with_intercept && rows == n_features + 1) {
            return Err(GlmError::MismatchedBounds {
                expected: n_features,
                found: rows,
            });
        }
        let intercept = if rows > n_features {
            Some((bounds[[n_features, 0]], bounds[[n_features, 1]]))
        } else {
            None
        };
        Ok(BoxBounds {
            lower: bounds.slice(ndarray::s![..n_features, 0]).to_owned(),
            upper: bounds.slice(ndarray::s![..n_features, 1]).to_owned(),
            intercept,
        })
    }

    pub fn clip(&self, j: usize, value: F) -> F {
        value.max(self.lower[j]).min(self.upper[j])
    }

    pub fn clip_intercept(&self, value: F) -> F {
        match self.intercept {
            Some((lower, upper)) => value.max(lower).min(upper),
            None => value,
        }
    }

    pub fn lower(&self) -> &Array1<F> {
        &self.lower
    }

    pub fn upper(&self) -> &Array1<F> {
        &self.upper
    }

    pub fn intercept(&self) -> Option<(F, F)> {
        self.intercept
    }
}

fn soft_threshold<F: Float>(value: F, threshold: F) -> F {
    value.signum() * (value.abs() - threshold).max(F::zero())
}

/// One weighted least squares problem, borrowed from the IRLS driver
pub(crate) struct PenalizedLeastSquares<'a, F> {
    pub x: ArrayView2<'a, F>,
    pub weights: ArrayView1<'a, F>,
    pub response: ArrayView1<'a, F>,
    pub l1: F,
    pub l2: F,
    pub bounds: Option<&'a BoxBounds<F>>,
}

impl<'a, F: Float> PenalizedLeastSquares<'a, F> {
    /// Solves the normal equations `(X^T W X + l2 / 2 * I) w = X^T W r` by a Cholesky
    /// factorization. Only valid without l1 penalty and bounds.
    pub fn invert(&self, with_intercept: bool) -> Result<Coefficients<F>> {
        let (n_samples, n_features) = self.x.dim();
        let design = if with_intercept {
            concatenate![Axis(1), self.x, Array2::ones((n_samples, 1))]
        } else {
            self.x.to_owned()
        };

        let mut gram = design.weighted_gram(self.weights);
        let ridge = self.l2 * F::cast(0.5);
        for j in 0..n_features {
            gram[[j, j]] += ridge;
        }
        let weighted_response = &self.weights * &self.response;
        let mut rhs = design.transpose_product(weighted_response.view());

        let lower = gram.cholesky()?;
        {
            let mut rhs_ia = rhs.view_mut().insert_axis(Axis(1));
            lower.solve_triangular_inplace(&mut rhs_ia, UPLO::Lower)?;
            lower.t().solve_triangular_inplace(&mut rhs_ia, UPLO::Upper)?;
        }

        Ok(Coefficients::from_flat(rhs.view(), with_intercept))
    }

    /// Cyclical coordinate descent, warm started from `coef`
    ///
    /// Every pass first re-centers the intercept and then visits the features in
    /// ascending order. Each feature takes the exact minimizer of its one
    /// dimensional problem: soft-thresholded by the l1 penalty, shrunk by the l2
    /// penalty and clipped into its bounds. Returns the number of passes and
    /// whether the coefficients moved less than `tolerance` in the last one.
    pub fn coordinate_descent(
        &self,
        coef: &mut Coefficients<F>,
        tolerance: F,
        max_passes: u32,
    ) -> (u32, bool) {
        let two = F::cast(2.);
        let n_features = self.x.ncols();
        // residuals `r - Xw - c`, kept up to date with every coordinate step
        let mut residual = &self.response - &coef.linear_predictor(&self.x);
        let norm_cols_x: Array1<F> = self
            .x
            .axis_iter(Axis(1))
            .map(|col| {
                Zip::from(&col)
                    .and(&self.weights)
                    .fold(F::zero(), |acc, &x, &w| acc + w * x * x)
            })
            .collect();
        let weight_sum = self.weights.sum();

        let mut n_passes = 0;
        while n_passes < max_passes {
            let mut change = F::zero();

            if let Some(c_old) = coef.intercept() {
                if weight_sum > F::zero() {
                    let shift = Zip::from(&self.weights)
                        .and(&residual)
                        .fold(F::zero(), |acc, &w, &r| acc + w * r)
                        / weight_sum;
                    let c_new = self
                        .bounds
                        .map_or(c_old + shift, |b| b.clip_intercept(c_old + shift));
                    let d_c = c_new - c_old;
                    if d_c != F::zero() {
                        residual.mapv_inplace(|r| r - d_c);
                        coef.set_intercept(c_new);
                        change += d_c * d_c;
                    }
                }
            }

            for j in 0..n_features {
                let w_old = coef.weights()[j];
                let x_slc = self.x.column(j);
                let denominator = two * norm_cols_x[j] + self.l2;
                let w_new = if denominator > F::zero() {
                    let rho = Zip::from(&x_slc)
                        .and(&self.weights)
                        .and(&residual)
                        .fold(F::zero(), |acc, &x, &w, &r| acc + w * x * r)
                        + norm_cols_x[j] * w_old;
                    soft_threshold(two * rho, self.l1) / denominator
                } else {
                    // the objective does not depend on this coefficient
                    w_old
                };
                let w_new = self.bounds.map_or(w_new, |b| b.clip(j, w_new));

                let d_w = w_new - w_old;
                if d_w != F::zero() {
                    residual.scaled_add(-d_w, &x_slc);
                    coef.weights_mut()[j] = w_new;
                    change += d_w * d_w;
                }
            }
            n_passes += 1;

            if change.sqrt() < tolerance {
                return (n_passes, true);
            }
        }
        (n_passes, false)
    }
}
