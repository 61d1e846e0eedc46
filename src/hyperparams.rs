use std::str::FromStr;

use linfa::{Float, ParamGuard};
use ndarray::{Array1, Array2};
#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};

use crate::error::{GlmError, Result};
use crate::family::Family;

/// Inner solver of the IRLS loop
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Solver {
    /// Closed form solution of the ridge normal equations
    Inversion,
    /// Cyclical coordinate descent, supports l1 penalties and bounds
    CoordinateDescent,
}

impl Solver {
    pub fn name(&self) -> &'static str {
        match self {
            Solver::Inversion => "inversion",
            Solver::CoordinateDescent => "coordinate descent",
        }
    }
}

impl FromStr for Solver {
    type Err = GlmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "inv" | "inversion" => Ok(Solver::Inversion),
            "ccd" | "cd" | "coordinate_descent" => Ok(Solver::CoordinateDescent),
            _ => Err(GlmError::UnknownSolver(s.to_string())),
        }
    }
}

/// External optimizer of the quasi-Newton path
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuasiNewton {
    /// Limited memory BFGS with box constraints
    Lbfgsb,
    /// Truncated Newton with conjugate gradient inner steps on the dense
    /// Hessian, no box constraints
    NewtonCg,
}

impl QuasiNewton {
    pub fn name(&self) -> &'static str {
        match self {
            QuasiNewton::Lbfgsb => "l-bfgs-b",
            QuasiNewton::NewtonCg => "newton-cg",
        }
    }
}

impl FromStr for QuasiNewton {
    type Err = GlmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lbfgs" | "lbfgsb" | "l-bfgs-b" => Ok(QuasiNewton::Lbfgsb),
            "tnc" | "newton-cg" | "newtoncg" => Ok(QuasiNewton::NewtonCg),
            _ => Err(GlmError::UnknownSolver(s.to_string())),
        }
    }
}

fn check_penalty<F: Float>(value: F, err: fn(f32) -> GlmError) -> Result<()> {
    if value.is_finite() && !value.is_negative() {
        Ok(())
    } else {
        Err(err(value.to_f32().unwrap_or(f32::NAN)))
    }
}

fn check_positive<F: Float>(value: F, err: fn(f32) -> GlmError) -> Result<()> {
    if value.is_finite() && value > F::zero() {
        Ok(())
    } else {
        Err(err(value.to_f32().unwrap_or(f32::NAN)))
    }
}

fn check_family<F: Float>(family: &Family<F>, shrinkage: F) -> Result<()> {
    if let Family::NegativeBinomial(r) = family {
        check_positive(*r, GlmError::InvalidDispersion)?;
    }
    if !(shrinkage > F::zero() && shrinkage < F::cast(0.5)) {
        return Err(GlmError::InvalidShrinkage(
            shrinkage.to_f32().unwrap_or(f32::NAN),
        ));
    }
    Ok(())
}

fn check_bounds<F: Float>(bounds: &Array2<F>) -> Result<()> {
    if bounds.ncols() != 2 {
        return Err(GlmError::InvalidBoundsShape(bounds.ncols()));
    }
    for (i, row) in bounds.rows().into_iter().enumerate() {
        if row[0].is_nan() || row[1].is_nan() || row[0] > row[1] {
            return Err(GlmError::InvalidBounds(i));
        }
    }
    Ok(())
}

fn check_initial_params<F: Float>(initial_params: &Option<(Array1<F>, F)>) -> Result<()> {
    match initial_params {
        Some((weights, intercept))
            if !intercept.is_finite() || weights.iter().any(|w| !w.is_finite()) =>
        {
            Err(GlmError::InvalidInitialParametersGuess)
        }
        _ => Ok(()),
    }
}

#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Debug, PartialEq)]
/// A verified hyper-parameter set ready for the estimation of a [`Glm`](crate::Glm)
///
/// See [`GlmParams`] for more information.
pub struct GlmValidParams<F> {
    family: Family<F>,
    with_intercept: bool,
    l1_penalty: F,
    l2_penalty: F,
    bounds: Option<Array2<F>>,
    solver: Option<Solver>,
    max_iterations: u32,
    max_inner_iterations: u32,
    tolerance: F,
    shrinkage: F,
    initial_params: Option<(Array1<F>, F)>,
}

impl<F: Float> GlmValidParams<F> {
    pub fn family(&self) -> Family<F> {
        self.family
    }

    pub fn with_intercept(&self) -> bool {
        self.with_intercept
    }

    pub fn l1_penalty(&self) -> F {
        self.l1_penalty
    }

    pub fn l2_penalty(&self) -> F {
        self.l2_penalty
    }

    pub fn bounds(&self) -> Option<&Array2<F>> {
        self.bounds.as_ref()
    }

    /// The inner solver, chosen from the penalties and bounds if it was not set
    ///
    /// Coordinate descent is picked whenever bounds or an l1 penalty are present,
    /// direct inversion otherwise.
    pub fn solver(&self) -> Solver {
        match self.solver {
            Some(solver) => solver,
            None if self.bounds.is_some() || self.l1_penalty > F::zero() => {
                Solver::CoordinateDescent
            }
            None => Solver::Inversion,
        }
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn max_inner_iterations(&self) -> u32 {
        self.max_inner_iterations
    }

    pub fn tolerance(&self) -> F {
        self.tolerance
    }

    pub fn shrinkage(&self) -> F {
        self.shrinkage
    }

    pub fn initial_params(&self) -> &Option<(Array1<F>, F)> {
        &self.initial_params
    }
}

/// A hyper-parameter set for a penalized generalized linear model fitted by IRLS
///
/// Configures and minimizes
/// ```ignore
/// sum_i sample_weight_i * loss(y_i, x_i w + c)
///     + l1_penalty * ||w||_1
///     + 0.5 * l2_penalty * ||w||^2_2
/// ```
/// subject to optional bounds `lower_j <= w_j <= upper_j`. The loss is the negative
/// log-likelihood of the [`Family`], the intercept `c` is never penalized.
///
/// # Parameters
/// | Name | Default | Purpose | Range |
/// | :--- | :--- | :---| :--- |
/// | [family](Self::family) | `Gaussian` | Distribution of the response | |
/// | [with_intercept](Self::with_intercept) | `true` | Enable intercept | `false`, `true` |
/// | [l1_penalty](Self::l1_penalty) | `0` | Lasso penalty | `[0, inf)` |
/// | [l2_penalty](Self::l2_penalty) | `0` | Ridge penalty | `[0, inf)` |
/// | [bounds](Self::bounds) | `None` | `(lower, upper)` per coefficient | `lower <= upper` |
/// | [solver](Self::solver) | automatic | Inner solver | |
/// | [max_iterations](Self::max_iterations) | `100` | Outer IRLS iterations | `[1, inf)` |
/// | [max_inner_iterations](Self::max_inner_iterations) | `10000` | Coordinate descent passes | `[1, inf)` |
/// | [tolerance](Self::tolerance) | `1e-8` | Euclidean change of the coefficients | `(0, inf)` |
/// | [shrinkage](Self::shrinkage) | `1e-10` | Distance of probabilities from 0 and 1 | `(0, 0.5)` |
///
/// # Errors
///
/// Returns [`InvalidL1Penalty`](GlmError::InvalidL1Penalty) or
/// [`InvalidL2Penalty`](GlmError::InvalidL2Penalty) for negative or non-finite penalties.
///
/// Returns [`L1WithInversion`](GlmError::L1WithInversion) or
/// [`BoundsNotSupported`](GlmError::BoundsNotSupported) if the inversion solver was
/// requested together with an l1 penalty or bounds.
///
/// Returns [`InvalidBounds`](GlmError::InvalidBounds) if a lower bound exceeds its upper bound.
///
/// # Example
///
/// ```rust
/// use linfa::prelude::*;
/// use linfa_glm::{Family, Glm, GlmError};
/// use ndarray::array;
///
/// let ds = Dataset::new(
///     array![[0.], [1.], [2.], [3.], [4.], [5.]],
///     array![1., 0., 2., 3., 5., 8.],
/// );
///
/// let model = Glm::params()
///     .family(Family::Poisson)
///     .l1_penalty(0.1)
///     .fit(&ds)?;
///
/// assert!(model.converged());
/// assert!(model.hyperplane()[0] > 0.);
/// # Ok::<(), GlmError>(())
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct GlmParams<F>(GlmValidParams<F>);

impl<F: Float> Default for GlmParams<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Float> GlmParams<F> {
    pub fn new() -> GlmParams<F> {
        Self(GlmValidParams {
            family: Family::Gaussian,
            with_intercept: true,
            l1_penalty: F::zero(),
            l2_penalty: F::zero(),
            bounds: None,
            solver: None,
            max_iterations: 100,
            max_inner_iterations: 10_000,
            tolerance: F::cast(1e-8),
            shrinkage: F::cast(1e-10),
            initial_params: None,
        })
    }

    pub fn family(mut self, family: Family<F>) -> Self {
        self.0.family = family;
        self
    }

    /// Configure the model to fit an intercept.
    /// Defaults to `true` if not set.
    pub fn with_intercept(mut self, with_intercept: bool) -> Self {
        self.0.with_intercept = with_intercept;
        self
    }

    pub fn l1_penalty(mut self, l1_penalty: F) -> Self {
        self.0.l1_penalty = l1_penalty;
        self
    }

    pub fn l2_penalty(mut self, l2_penalty: F) -> Self {
        self.0.l2_penalty = l2_penalty;
        self
    }

    /// Box constraints as a `(n_features, 2)` matrix of `(lower, upper)` rows.
    ///
    /// An optional trailing row bounds the intercept. Use infinite values for
    /// one-sided constraints.
    pub fn bounds(mut self, bounds: Array2<F>) -> Self {
        self.0.bounds = Some(bounds);
        self
    }

    pub fn solver(mut self, solver: Solver) -> Self {
        self.0.solver = Some(solver);
        self
    }

    /// Set the maximum number of outer IRLS iterations.
    ///
    /// Defaults to `100` if not set
    pub fn max_iterations(mut self, max_iterations: u32) -> Self {
        self.0.max_iterations = max_iterations;
        self
    }

    /// Set the maximum number of coordinate descent passes per IRLS iteration.
    ///
    /// Defaults to `10000` if not set
    pub fn max_inner_iterations(mut self, max_inner_iterations: u32) -> Self {
        self.0.max_inner_iterations = max_inner_iterations;
        self
    }

    /// Set the tolerance on the euclidean change of the coefficients (intercept included)
    /// between two iterations.
    ///
    /// Defaults to `1e-8` if not set
    pub fn tolerance(mut self, tolerance: F) -> Self {
        self.0.tolerance = tolerance;
        self
    }

    pub fn shrinkage(mut self, shrinkage: F) -> Self {
        self.0.shrinkage = shrinkage;
        self
    }

    /// Start the iterations from the given weights and intercept instead of zero
    pub fn initial_params(mut self, weights: Array1<F>, intercept: F) -> Self {
        self.0.initial_params = Some((weights, intercept));
        self
    }
}

impl<F: Float> ParamGuard for GlmParams<F> {
    type Checked = GlmValidParams<F>;
    type Error = GlmError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        check_penalty(self.0.l1_penalty, GlmError::InvalidL1Penalty)?;
        check_penalty(self.0.l2_penalty, GlmError::InvalidL2Penalty)?;
        check_positive(self.0.tolerance, GlmError::InvalidTolerance)?;
        if self.0.max_iterations == 0 {
            return Err(GlmError::InvalidMaxIterations(0));
        }
        if self.0.max_inner_iterations == 0 {
            return Err(GlmError::InvalidMaxIterations(0));
        }
        check_family(&self.0.family, self.0.shrinkage)?;
        if let Some(bounds) = &self.0.bounds {
            check_bounds(bounds)?;
        }
        if self.0.solver == Some(Solver::Inversion) {
            if self.0.l1_penalty > F::zero() {
                return Err(GlmError::L1WithInversion);
            }
            if self.0.bounds.is_some() {
                return Err(GlmError::BoundsNotSupported(Solver::Inversion.name()));
            }
        }
        check_initial_params(&self.0.initial_params)?;
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}

#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Debug, PartialEq)]
/// A verified hyper-parameter set ready for the estimation of a [`SparseGlm`](crate::SparseGlm)
///
/// See [`SparseGlmParams`] for more information.
pub struct SparseGlmValidParams<F> {
    family: Family<F>,
    with_intercept: bool,
    l2_penalty: F,
    bounds: Option<Array2<F>>,
    solver: QuasiNewton,
    max_iterations: u64,
    memory: usize,
    gradient_tolerance: F,
    cost_factor: F,
    shrinkage: F,
    initial_params: Option<(Array1<F>, F)>,
}

impl<F: Float> SparseGlmValidParams<F> {
    pub fn family(&self) -> Family<F> {
        self.family
    }

    pub fn with_intercept(&self) -> bool {
        self.with_intercept
    }

    pub fn l2_penalty(&self) -> F {
        self.l2_penalty
    }

    pub fn bounds(&self) -> Option<&Array2<F>> {
        self.bounds.as_ref()
    }

    pub fn solver(&self) -> QuasiNewton {
        self.solver
    }

    pub fn max_iterations(&self) -> u64 {
        self.max_iterations
    }

    pub fn memory(&self) -> usize {
        self.memory
    }

    pub fn gradient_tolerance(&self) -> F {
        self.gradient_tolerance
    }

    pub fn cost_factor(&self) -> F {
        self.cost_factor
    }

    pub fn shrinkage(&self) -> F {
        self.shrinkage
    }

    pub fn initial_params(&self) -> &Option<(Array1<F>, F)> {
        &self.initial_params
    }
}

/// A hyper-parameter set for a generalized linear model fitted by a quasi-Newton optimizer
///
/// Minimizes the smooth objective
/// ```ignore
/// sum_i sample_weight_i * loss(y_i, x_i w + c) + 0.5 * l2_penalty * ||w||^2_2
/// ```
/// subject to optional bounds. Only loss and gradient evaluations touch the
/// design matrix, which makes this estimator the choice for sparse features.
///
/// L-BFGS-B keeps `memory` vectors of length `p + 1`. Newton-CG instead
/// assembles the dense `(p + 1) x (p + 1)` Hessian in every iteration and
/// does not take bounds, so it only suits designs with a moderate number of
/// features.
///
/// # Parameters
/// | Name | Default | Purpose | Range |
/// | :--- | :--- | :---| :--- |
/// | [family](Self::family) | `Binomial` | Distribution of the response | |
/// | [with_intercept](Self::with_intercept) | `false` | Enable intercept | `false`, `true` |
/// | [l2_penalty](Self::l2_penalty) | `0` | Ridge penalty | `[0, inf)` |
/// | [bounds](Self::bounds) | `None` | `(lower, upper)` per coefficient, L-BFGS-B only | `lower <= upper` |
/// | [solver](Self::solver) | `Lbfgsb` | External optimizer | |
/// | [max_iterations](Self::max_iterations) | `15000` | Evaluations (L-BFGS-B) or iterations (Newton-CG) | `[1, inf)` |
/// | [memory](Self::memory) | `10` | Corrections stored by L-BFGS-B | `[1, inf)` |
/// | [gradient_tolerance](Self::gradient_tolerance) | `1e-5` | Projected gradient (L-BFGS-B) or cost change (Newton-CG) | `(0, inf)` |
/// | [cost_factor](Self::cost_factor) | `1e7` | Relative cost reduction in units of machine epsilon (L-BFGS-B) | `(0, inf)` |
/// | [shrinkage](Self::shrinkage) | `1e-10` | Distance of probabilities from 0 and 1 | `(0, 0.5)` |
///
/// # Example
///
/// ```rust
/// use linfa_glm::{GlmError, SparseGlm};
/// use ndarray::array;
/// use sprs::TriMat;
///
/// let mut x = TriMat::new((6, 2));
/// for (row, col, value) in [(0, 0, 1.), (1, 1, 1.), (2, 0, 2.), (3, 1, -1.), (4, 0, -1.), (5, 1, 0.5)] {
///     x.add_triplet(row, col, value);
/// }
/// let x: sprs::CsMat<f64> = x.to_csr();
/// let y = array![1., 1., 1., 0., 0., 1.];
///
/// let model = SparseGlm::params()
///     .l2_penalty(1.0)
///     .fit_design(&x, y.view(), None)?;
///
/// assert!(model.converged());
/// # Ok::<(), GlmError>(())
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct SparseGlmParams<F>(SparseGlmValidParams<F>);

impl<F: Float> Default for SparseGlmParams<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Float> SparseGlmParams<F> {
    pub fn new() -> SparseGlmParams<F> {
        Self(SparseGlmValidParams {
            family: Family::Binomial,
            with_intercept: false,
            l2_penalty: F::zero(),
            bounds: None,
            solver: QuasiNewton::Lbfgsb,
            max_iterations: 15_000,
            memory: 10,
            gradient_tolerance: F::cast(1e-5),
            cost_factor: F::cast(1e7),
            shrinkage: F::cast(1e-10),
            initial_params: None,
        })
    }

    pub fn family(mut self, family: Family<F>) -> Self {
        self.0.family = family;
        self
    }

    /// Configure the model to fit an intercept.
    /// Defaults to `false` if not set.
    pub fn with_intercept(mut self, with_intercept: bool) -> Self {
        self.0.with_intercept = with_intercept;
        self
    }

    pub fn l2_penalty(mut self, l2_penalty: F) -> Self {
        self.0.l2_penalty = l2_penalty;
        self
    }

    /// Box constraints as a `(n_features, 2)` matrix of `(lower, upper)` rows, with an
    /// optional trailing row for the intercept.
    pub fn bounds(mut self, bounds: Array2<F>) -> Self {
        self.0.bounds = Some(bounds);
        self
    }

    pub fn solver(mut self, solver: QuasiNewton) -> Self {
        self.0.solver = solver;
        self
    }

    pub fn max_iterations(mut self, max_iterations: u64) -> Self {
        self.0.max_iterations = max_iterations;
        self
    }

    pub fn memory(mut self, memory: usize) -> Self {
        self.0.memory = memory;
        self
    }

    pub fn gradient_tolerance(mut self, gradient_tolerance: F) -> Self {
        self.0.gradient_tolerance = gradient_tolerance;
        self
    }

    pub fn cost_factor(mut self, cost_factor: F) -> Self {
        self.0.cost_factor = cost_factor;
        self
    }

    pub fn shrinkage(mut self, shrinkage: F) -> Self {
        self.0.shrinkage = shrinkage;
        self
    }

    /// Start the optimizer from the given weights and intercept instead of zero
    pub fn initial_params(mut self, weights: Array1<F>, intercept: F) -> Self {
        self.0.initial_params = Some((weights, intercept));
        self
    }
}

impl<F: Float> ParamGuard for SparseGlmParams<F> {
    type Checked = SparseGlmValidParams<F>;
    type Error = GlmError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        check_penalty(self.0.l2_penalty, GlmError::InvalidL2Penalty)?;
        check_positive(self.0.gradient_tolerance, GlmError::InvalidTolerance)?;
        check_positive(self.0.cost_factor, GlmError::InvalidTolerance)?;
        if self.0.max_iterations == 0 {
            return Err(GlmError::InvalidMaxIterations(0));
        }
        if self.0.memory == 0 {
            return Err(GlmError::InvalidMemory(0));
        }
        check_family(&self.0.family, self.0.shrinkage)?;
        if let Some(bounds) = &self.0.bounds {
            check_bounds(bounds)?;
            if self.0.solver == QuasiNewton::NewtonCg {
                return Err(GlmError::BoundsNotSupported(QuasiNewton::NewtonCg.name()));
            }
        }
        check_initial_params(&self.0.initial_params)?;
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}
