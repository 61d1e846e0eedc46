//! Design matrices and the coefficient record shared by both fitting paths

use std::ops::Deref;

use linfa::Float;
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, Axis, Data, Ix2};
#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};
use sprs::{CsMatBase, CsMatI};

/// Read-only access to an `n_samples x n_features` matrix
///
/// Implemented for dense `ndarray` matrices and compressed `sprs` matrices in
/// either storage order.
pub trait DesignMatrix<F: Float> {
    fn n_samples(&self) -> usize;

    fn n_features(&self) -> usize;

    /// `X w`
    fn product(&self, w: ArrayView1<F>) -> Array1<F>;

    /// `X^T v`
    fn transpose_product(&self, v: ArrayView1<F>) -> Array1<F>;

    /// `X^T diag(d) X`
    fn weighted_gram(&self, d: ArrayView1<F>) -> Array2<F>;

    /// Whether all stored entries are finite
    fn all_finite(&self) -> bool;
}

impl<F: Float, D: Data<Elem = F>> DesignMatrix<F> for ArrayBase<D, Ix2> {
    fn n_samples(&self) -> usize {
        self.nrows()
    }

    fn n_features(&self) -> usize {
        self.ncols()
    }

    fn product(&self, w: ArrayView1<F>) -> Array1<F> {
        self.dot(&w)
    }

    fn transpose_product(&self, v: ArrayView1<F>) -> Array1<F> {
        self.t().dot(&v)
    }

    fn weighted_gram(&self, d: ArrayView1<F>) -> Array2<F> {
        let scaled = self * &d.insert_axis(Axis(1));
        scaled.t().dot(self)
    }

    fn all_finite(&self) -> bool {
        self.iter().all(|v| v.is_finite())
    }
}

impl<F, IpS, IS, DS> DesignMatrix<F> for CsMatBase<F, usize, IpS, IS, DS>
where
    F: Float,
    IpS: Deref<Target = [usize]>,
    IS: Deref<Target = [usize]>,
    DS: Deref<Target = [F]>,
{
    fn n_samples(&self) -> usize {
        self.rows()
    }

    fn n_features(&self) -> usize {
        self.cols()
    }

    fn product(&self, w: ArrayView1<F>) -> Array1<F> {
        self * &w
    }

    fn transpose_product(&self, v: ArrayView1<F>) -> Array1<F> {
        &self.transpose_view() * &v
    }

    fn weighted_gram(&self, d: ArrayView1<F>) -> Array2<F> {
        let n = self.rows();
        let diagonal = CsMatI::new_csc((n, n), (0..=n).collect(), (0..n).collect(), d.to_vec());
        let scaled = &diagonal * self;
        (&self.transpose_view() * &scaled).to_dense()
    }

    fn all_finite(&self) -> bool {
        self.data().iter().all(|v| v.is_finite())
    }
}

/// Coefficients of a linear predictor `z = X w + c`
///
/// The intercept is kept apart from the feature weights. Optimizers that work on
/// a single vector see the flat layout `[w_1, .., w_p, c]` with the intercept
/// trailing.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Debug, PartialEq)]
pub struct Coefficients<F> {
    weights: Array1<F>,
    intercept: Option<F>,
}

impl<F: Float> Coefficients<F> {
    pub fn new(weights: Array1<F>, intercept: Option<F>) -> Self {
        Coefficients { weights, intercept }
    }

    pub fn zeros(n_features: usize, with_intercept: bool) -> Self {
        Coefficients {
            weights: Array1::zeros(n_features),
            intercept: if with_intercept { Some(F::zero()) } else { None },
        }
    }

    pub fn weights(&self) -> &Array1<F> {
        &self.weights
    }

    pub(crate) fn weights_mut(&mut self) -> &mut Array1<F> {
        &mut self.weights
    }

    pub fn intercept(&self) -> Option<F> {
        self.intercept
    }

    pub(crate) fn set_intercept(&mut self, intercept: F) {
        if let Some(c) = self.intercept.as_mut() {
            *c = intercept;
        }
    }

    /// Number of entries in the flat layout
    pub fn len(&self) -> usize {
        self.weights.len() + self.intercept.is_some() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_flat(&self) -> Array1<F> {
        match self.intercept {
            Some(c) => self.weights.iter().cloned().chain(std::iter::once(c)).collect(),
            None => self.weights.clone(),
        }
    }

    /// Splits a flat vector, the last entry becomes the intercept if requested
    pub fn from_flat(flat: ArrayView1<F>, with_intercept: bool) -> Self {
        if with_intercept && !flat.is_empty() {
            let p = flat.len() - 1;
            Coefficients {
                weights: flat.slice(ndarray::s![..p]).to_owned(),
                intercept: Some(flat[p]),
            }
        } else {
            Coefficients {
                weights: flat.to_owned(),
                intercept: None,
            }
        }
    }

    /// `X w + c`
    pub fn linear_predictor<X: DesignMatrix<F> + ?Sized>(&self, x: &X) -> Array1<F> {
        let mut z = x.product(self.weights.view());
        if let Some(c) = self.intercept {
            z += c;
        }
        z
    }

    /// Euclidean distance between two coefficient records of the same shape
    pub(crate) fn distance(&self, other: &Self) -> F {
        let weights = self
            .weights
            .iter()
            .zip(other.weights.iter())
            .fold(F::zero(), |acc, (&a, &b)| acc + (a - b) * (a - b));
        let intercept = match (self.intercept, other.intercept) {
            (Some(a), Some(b)) => (a - b) * (a - b),
            _ => F::zero(),
        };
        (weights + intercept).sqrt()
    }
}
