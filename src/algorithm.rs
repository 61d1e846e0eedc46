use linfa::dataset::AsSingleTargets;
use linfa::traits::{Fit, PredictInplace};
use linfa::{DatasetBase, Float, ParamGuard};
use ndarray::{Array1, ArrayBase, ArrayView1, Data, Ix2};

use crate::design::{Coefficients, DesignMatrix};
use crate::error::{GlmError, Result};
use crate::family::Family;
use crate::hyperparams::{GlmValidParams, SparseGlmParams, SparseGlmValidParams};
use crate::irls::irls;
use crate::loss::Objective;
use crate::quasi_newton;
use crate::wls::BoxBounds;
use crate::{Glm, SparseGlm};

impl<F: Float, D: Data<Elem = F>, T: AsSingleTargets<Elem = F>>
    Fit<ArrayBase<D, Ix2>, T, GlmError> for GlmValidParams<F>
{
    type Object = Glm<F>;

    /// Fit a generalized linear model to the dataset by IRLS
    ///
    /// Sample weights are taken from the dataset, every sample counts once if
    /// none are set.
    fn fit(&self, dataset: &DatasetBase<ArrayBase<D, Ix2>, T>) -> Result<Self::Object> {
        let (x, y) = (dataset.records(), dataset.as_single_targets());
        let sample_weight = dataset_weights(dataset);

        let sample_weight = validate_inputs(
            x,
            y.view(),
            sample_weight.as_ref().map(|w| w.view()),
            &self.family(),
            self.initial_params(),
        )?;
        let bounds = self
            .bounds()
            .map(|b| BoxBounds::from_matrix(b, x.ncols(), self.with_intercept()))
            .transpose()?;

        let outcome = irls(self, x.view(), y.view(), sample_weight.view(), bounds.as_ref())?;

        Ok(Glm {
            family: self.family(),
            coefficients: outcome.coefficients,
            n_iterations: outcome.n_iterations,
            n_inner_iterations: outcome.n_inner_iterations,
            converged: outcome.converged,
        })
    }
}

impl<F: Float, D: Data<Elem = F>, T: AsSingleTargets<Elem = F>>
    Fit<ArrayBase<D, Ix2>, T, GlmError> for SparseGlmValidParams<F>
{
    type Object = SparseGlm<F>;

    fn fit(&self, dataset: &DatasetBase<ArrayBase<D, Ix2>, T>) -> Result<Self::Object> {
        let y = dataset.as_single_targets();
        let sample_weight = dataset_weights(dataset);
        self.fit_design(
            dataset.records(),
            y.view(),
            sample_weight.as_ref().map(|w| w.view()),
        )
    }
}

impl<F: Float> SparseGlmValidParams<F> {
    /// Fit the model on any design matrix, dense or compressed
    ///
    /// The optimizer only evaluates the loss and its gradient, so compressed
    /// matrices are never densified. Without `sample_weight` every sample counts
    /// once.
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(family = %self.family(), solver = self.solver().name())
    )]
    pub fn fit_design<X: DesignMatrix<F> + ?Sized>(
        &self,
        x: &X,
        y: ArrayView1<F>,
        sample_weight: Option<ArrayView1<F>>,
    ) -> Result<SparseGlm<F>> {
        let sample_weight = validate_inputs(
            x,
            y,
            sample_weight,
            &self.family(),
            self.initial_params(),
        )?;
        let with_intercept = self.with_intercept();
        let bounds = self
            .bounds()
            .map(|b| BoxBounds::from_matrix(b, x.n_features(), with_intercept))
            .transpose()?;

        let start = match self.initial_params() {
            Some((weights, intercept)) => Coefficients::new(
                weights.clone(),
                if with_intercept { Some(*intercept) } else { None },
            ),
            None => Coefficients::zeros(x.n_features(), with_intercept),
        };

        let objective = Objective::new(
            x,
            y.view(),
            sample_weight.view(),
            self.family(),
            self.shrinkage(),
            with_intercept,
        )
        .with_l2(self.l2_penalty());

        let outcome = quasi_newton::minimize(self, &objective, bounds.as_ref(), start)?;
        let (loss, gradient) = objective.loss_and_gradient(&outcome.coefficients);

        Ok(SparseGlm {
            family: self.family(),
            coefficients: outcome.coefficients,
            loss,
            gradient,
            n_evaluations: outcome.n_evaluations,
            status: outcome.status,
        })
    }
}

impl<F: Float> SparseGlmParams<F> {
    /// Check the parameters and fit the model on any design matrix
    ///
    /// See [`SparseGlmValidParams::fit_design`].
    pub fn fit_design<X: DesignMatrix<F> + ?Sized>(
        &self,
        x: &X,
        y: ArrayView1<F>,
        sample_weight: Option<ArrayView1<F>>,
    ) -> Result<SparseGlm<F>> {
        self.check_ref()?.fit_design(x, y, sample_weight)
    }
}

fn dataset_weights<F: Float, R, T>(dataset: &DatasetBase<R, T>) -> Option<Array1<F>>
where
    R: linfa::dataset::Records,
{
    if dataset.weights.is_empty() {
        None
    } else {
        Some(dataset.weights.mapv(F::cast))
    }
}

/// Checks the data against each other and the model, returns the sample weights
fn validate_inputs<F: Float, X: DesignMatrix<F> + ?Sized>(
    x: &X,
    y: ArrayView1<F>,
    sample_weight: Option<ArrayView1<F>>,
    family: &Family<F>,
    initial_params: &Option<(Array1<F>, F)>,
) -> Result<Array1<F>> {
    let n_samples = x.n_samples();
    if n_samples != y.len() {
        return Err(GlmError::MismatchedShapes(n_samples, y.len()));
    }
    if !x.all_finite() {
        return Err(GlmError::InvalidValues);
    }
    family.check_targets(&y)?;

    if let Some((weights, _)) = initial_params {
        if weights.len() != x.n_features() {
            return Err(GlmError::InvalidInitialParametersGuessSize);
        }
    }

    match sample_weight {
        None => Ok(Array1::ones(n_samples)),
        Some(w) if w.len() != n_samples => {
            Err(GlmError::MismatchedSampleWeights(n_samples, w.len()))
        }
        Some(w) if w.iter().any(|v| !v.is_finite() || v.is_negative()) => {
            Err(GlmError::InvalidSampleWeights)
        }
        Some(w) => Ok(w.to_owned()),
    }
}

macro_rules! impl_predict_mean {
    ($model:ident) => {
        impl<F: Float, D: Data<Elem = F>> PredictInplace<ArrayBase<D, Ix2>, Array1<F>>
            for $model<F>
        {
            /// Predict the mean response of each sample
            fn predict_inplace(&self, x: &ArrayBase<D, Ix2>, y: &mut Array1<F>) {
                assert_eq!(
                    x.nrows(),
                    y.len(),
                    "The number of data points must match the number of output targets."
                );
                assert_eq!(
                    x.ncols(),
                    self.hyperplane().len(),
                    "Number of data features must match the number of features the model was trained with."
                );

                *y = self.predict_mean(x);
            }

            fn default_target(&self, x: &ArrayBase<D, Ix2>) -> Array1<F> {
                Array1::zeros(x.nrows())
            }
        }
    };
}

impl_predict_mean!(Glm);
impl_predict_mean!(SparseGlm);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hyperparams::GlmParams;
    use approx::assert_abs_diff_eq;
    use linfa::traits::Predict;
    use linfa::Dataset;
    use ndarray::{array, Array2};

    #[test]
    fn autotraits() {
        fn has_autotraits<T: Send + Sync + Sized + Unpin + std::panic::UnwindSafe>() {}
        has_autotraits::<Glm<f64>>();
        has_autotraits::<SparseGlm<f64>>();
        has_autotraits::<GlmParams<f64>>();
        has_autotraits::<GlmValidParams<f64>>();
        has_autotraits::<SparseGlmParams<f64>>();
        has_autotraits::<SparseGlmValidParams<f64>>();
        has_autotraits::<GlmError>();
    }

    #[test]
    fn rejects_mismatched_shapes() {
        let ds = Dataset::new(array![[1.], [2.], [3.]], array![1., 2.]);
        let res = Glm::params().fit(&ds);
        assert!(matches!(res, Err(GlmError::MismatchedShapes(3, 2))));
    }

    #[test]
    fn rejects_non_finite_records() {
        let ds = Dataset::new(array![[1.], [f64::NAN], [3.]], array![1., 2., 3.]);
        assert!(matches!(Glm::params().fit(&ds), Err(GlmError::InvalidValues)));
    }

    #[test]
    fn rejects_targets_outside_support() {
        let x = array![[1.], [2.], [3.]];
        let ds = Dataset::new(x.clone(), array![0., 2., 1.]);
        assert!(matches!(
            Glm::params().family(Family::Binomial).fit(&ds),
            Err(GlmError::InvalidTargets("binomial"))
        ));
        let ds = Dataset::new(x, array![0., -1., 1.]);
        assert!(matches!(
            Glm::params().family(Family::Poisson).fit(&ds),
            Err(GlmError::InvalidTargets("poisson"))
        ));
    }

    #[test]
    fn rejects_invalid_sample_weights() {
        let ds = Dataset::new(array![[1.], [2.], [3.]], array![1., 2., 3.])
            .with_weights(array![1., -1., 1.]);
        assert!(matches!(
            Glm::params().fit(&ds),
            Err(GlmError::InvalidSampleWeights)
        ));

        let x = array![[1.], [2.], [3.]];
        let y = array![1., 0., 1.];
        let w = array![1., 1.];
        assert!(matches!(
            SparseGlm::params().fit_design(&x, y.view(), Some(w.view())),
            Err(GlmError::MismatchedSampleWeights(3, 2))
        ));
    }

    #[test]
    fn rejects_mismatched_bounds_and_guess() {
        let ds = Dataset::new(array![[1., 0.], [2., 1.], [3., 0.]], array![1., 2., 3.]);
        let res = Glm::params().bounds(array![[0., 1.]]).fit(&ds);
        assert!(matches!(
            res,
            Err(GlmError::MismatchedBounds {
                expected: 2,
                found: 1
            })
        ));
        // an intercept row is only allowed when an intercept is fitted
        let res = Glm::params()
            .with_intercept(false)
            .bounds(array![[0., 1.], [0., 1.], [0., 1.]])
            .fit(&ds);
        assert!(matches!(res, Err(GlmError::MismatchedBounds { .. })));

        let res = Glm::params().initial_params(array![0.], 0.).fit(&ds);
        assert!(matches!(res, Err(GlmError::InvalidInitialParametersGuessSize)));
    }

    #[test]
    fn zero_weight_removes_a_sample() {
        let x = array![[0.], [1.], [2.], [3.]];
        let ds = Dataset::new(x.clone(), array![1., 3., 5., 100.])
            .with_weights(array![1., 1., 1., 0.]);
        let model = Glm::params().fit(&ds).unwrap();
        // zero weights are floored, not dropped
        assert_abs_diff_eq!(model.hyperplane()[0], 2., epsilon = 1e-6);
        assert_abs_diff_eq!(model.intercept(), 1., epsilon = 1e-6);
    }

    #[test]
    fn predict_returns_means() {
        let x = Array2::from_shape_fn((30, 1), |(i, _)| i as f64 / 10.);
        let y = x.column(0).mapv(|v| (0.3 + 0.5 * v).exp().round());
        let ds = Dataset::new(x.clone(), y);
        let model = Glm::params().family(Family::Poisson).fit(&ds).unwrap();

        let pred = model.predict(&x);
        let expected = model.predict_linear(&x).mapv(f64::exp);
        assert_abs_diff_eq!(pred, expected, epsilon = 1e-12);
        assert!(pred.iter().all(|&p| p > 0.));
    }

    #[test]
    fn sparse_estimator_fits_dense_datasets() {
        let x = array![[0.5], [-1.2], [2.0], [0.1], [-0.4], [1.3], [-2.1], [0.8]];
        let y = array![1., 0., 1., 0., 1., 1., 0., 0.];
        let ds = Dataset::new(x.clone(), y.clone());

        let model = SparseGlm::params().with_intercept(true).fit(&ds).unwrap();
        assert!(model.converged());
        assert!(model.n_evaluations() > 0);
        assert_eq!(model.gradient().len(), 2);

        let direct = SparseGlm::params()
            .with_intercept(true)
            .fit_design(&x, y.view(), None)
            .unwrap();
        assert_abs_diff_eq!(model.hyperplane(), direct.hyperplane(), epsilon = 1e-12);
        assert_abs_diff_eq!(model.loss(), direct.loss(), epsilon = 1e-12);
    }
}
