//! Penalized negative log-likelihood and its derivatives

use linfa::Float;
use ndarray::{Array1, Array2, ArrayView1, Zip};

use crate::design::{Coefficients, DesignMatrix};
use crate::family::Family;

/// The smooth part of the objective
///
/// ```ignore
/// sum_i weight_i * loss(y_i, x_i w + c) + 0.5 * l2 * ||w||^2
/// ```
///
/// The intercept is never penalized.
pub(crate) struct Objective<'a, F: Float, X: ?Sized> {
    x: &'a X,
    y: ArrayView1<'a, F>,
    sample_weight: ArrayView1<'a, F>,
    family: Family<F>,
    l2: F,
    shrinkage: F,
    with_intercept: bool,
}

impl<'a, F: Float, X: DesignMatrix<F> + ?Sized> Objective<'a, F, X> {
    pub fn new(
        x: &'a X,
        y: ArrayView1<'a, F>,
        sample_weight: ArrayView1<'a, F>,
        family: Family<F>,
        shrinkage: F,
        with_intercept: bool,
    ) -> Self {
        Objective {
            x,
            y,
            sample_weight,
            family,
            l2: F::zero(),
            shrinkage,
            with_intercept,
        }
    }

    pub fn with_l2(mut self, l2: F) -> Self {
        self.l2 = l2;
        self
    }

    pub fn with_intercept(&self) -> bool {
        self.with_intercept
    }

    pub fn loss(&self, coef: &Coefficients<F>) -> F {
        let z = coef.linear_predictor(self.x);
        self.loss_at(coef, &z)
    }

    fn loss_at(&self, coef: &Coefficients<F>, z: &Array1<F>) -> F {
        let family = self.family;
        let shrinkage = self.shrinkage;
        let data = Zip::from(&self.y)
            .and(z)
            .and(&self.sample_weight)
            .fold(F::zero(), |acc, &y, &z, &w| {
                acc + w * family.loss(y, z, shrinkage)
            });
        let w = coef.weights();
        data + F::cast(0.5) * self.l2 * w.dot(w)
    }

    /// Loss and gradient with respect to the flat coefficients
    pub fn loss_and_gradient(&self, coef: &Coefficients<F>) -> (F, Array1<F>) {
        let z = coef.linear_predictor(self.x);
        let loss = self.loss_at(coef, &z);

        let family = self.family;
        let shrinkage = self.shrinkage;
        let dz = Zip::from(&self.y)
            .and(&z)
            .and(&self.sample_weight)
            .map_collect(|&y, &z, &w| w * family.loss_derivative(y, z, shrinkage));

        let mut grad = self.x.transpose_product(dz.view());
        grad.scaled_add(self.l2, coef.weights());
        let grad = match coef.intercept() {
            Some(_) => Coefficients::new(grad, Some(dz.sum())).to_flat(),
            None => grad,
        };
        (loss, grad)
    }

    /// Hessian with respect to the flat coefficients
    pub fn hessian(&self, coef: &Coefficients<F>) -> Array2<F> {
        let z = coef.linear_predictor(self.x);
        let family = self.family;
        let shrinkage = self.shrinkage;
        let d = Zip::from(&self.y)
            .and(&z)
            .and(&self.sample_weight)
            .map_collect(|&y, &z, &w| w * family.curvature(y, z, shrinkage));

        let p = self.x.n_features();
        let gram = self.x.weighted_gram(d.view());
        let n = coef.len();
        let mut hessian = Array2::zeros((n, n));
        hessian.slice_mut(ndarray::s![..p, ..p]).assign(&gram);
        for j in 0..p {
            hessian[[j, j]] += self.l2;
        }
        if coef.intercept().is_some() {
            // the intercept column of X is all ones
            let cross = self.x.transpose_product(d.view());
            hessian.slice_mut(ndarray::s![..p, p]).assign(&cross);
            hessian.slice_mut(ndarray::s![p, ..p]).assign(&cross);
            hessian[[p, p]] = d.sum();
        }
        hessian
    }
}
