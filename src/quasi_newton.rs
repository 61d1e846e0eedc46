//! Adapters between the penalized likelihood and external optimizers
//!
//! The optimizers own the iteration logic and work on a flat `f64` vector with
//! the intercept trailing. Whatever happens inside the optimizer, the adapter
//! hands back the last coefficients it evaluated together with a status.

use std::cell::{Cell, RefCell};

use argmin::core::{
    CostFunction, Executor, Gradient, Hessian, IterState, State, TerminationReason,
};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::newton::NewtonCG;
use linfa::Float;
use ndarray::{Array1, Array2, ArrayView1};
#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::design::{Coefficients, DesignMatrix};
use crate::error::Result;
use crate::hyperparams::{QuasiNewton, SparseGlmValidParams};
use crate::loss::Objective;
use crate::wls::BoxBounds;

/// How the external optimizer terminated
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OptimizerStatus {
    /// One of the optimizer's convergence criteria was met
    Converged,
    /// The evaluation or iteration budget ran out first
    BudgetExhausted,
    /// The optimizer gave up, e.g. in a failing line search
    Failed(String),
}

pub(crate) struct QuasiNewtonOutcome<F> {
    pub coefficients: Coefficients<F>,
    pub n_evaluations: u64,
    pub status: OptimizerStatus,
}

fn to_f64<F: Float>(value: F) -> f64 {
    value.to_f64().unwrap_or(f64::NAN)
}

fn to_f64_vec<F: Float>(values: ArrayView1<F>) -> Vec<f64> {
    values.iter().map(|&v| to_f64(v)).collect()
}

fn from_f64<'v, F: Float>(
    values: impl IntoIterator<Item = &'v f64>,
    with_intercept: bool,
) -> Coefficients<F> {
    let flat: Array1<F> = values.into_iter().map(|&v| F::cast(v)).collect();
    Coefficients::from_flat(flat.view(), with_intercept)
}

/// Bounds in the layout of the flat coefficients, infinite sides become `None`
fn flat_bounds<F: Float>(
    bounds: &BoxBounds<F>,
    with_intercept: bool,
) -> Vec<(Option<f64>, Option<f64>)> {
    let side = |v: F| if v.is_finite() { Some(to_f64(v)) } else { None };
    let mut flat: Vec<_> = bounds
        .lower()
        .iter()
        .zip(bounds.upper().iter())
        .map(|(&l, &u)| (side(l), side(u)))
        .collect();
    if with_intercept {
        flat.push(match bounds.intercept() {
            Some((l, u)) => (side(l), side(u)),
            None => (None, None),
        });
    }
    flat
}

pub(crate) fn minimize<F: Float, X: DesignMatrix<F> + ?Sized>(
    params: &SparseGlmValidParams<F>,
    objective: &Objective<F, X>,
    bounds: Option<&BoxBounds<F>>,
    start: Coefficients<F>,
) -> Result<QuasiNewtonOutcome<F>> {
    let outcome = match params.solver() {
        QuasiNewton::Lbfgsb => lbfgsb(params, objective, bounds, start),
        QuasiNewton::NewtonCg => newton_cg(params, objective, start)?,
    };
    match &outcome.status {
        OptimizerStatus::Converged => debug!(
            solver = params.solver().name(),
            evaluations = outcome.n_evaluations,
            "converged"
        ),
        OptimizerStatus::BudgetExhausted => warn!(
            solver = params.solver().name(),
            evaluations = outcome.n_evaluations,
            "stopped before convergence, the budget is exhausted"
        ),
        OptimizerStatus::Failed(reason) => warn!(
            solver = params.solver().name(),
            evaluations = outcome.n_evaluations,
            %reason,
            "optimizer failed, keeping the last evaluated coefficients"
        ),
    }
    Ok(outcome)
}

fn lbfgsb<F: Float, X: DesignMatrix<F> + ?Sized>(
    params: &SparseGlmValidParams<F>,
    objective: &Objective<F, X>,
    bounds: Option<&BoxBounds<F>>,
    start: Coefficients<F>,
) -> QuasiNewtonOutcome<F> {
    run_lbfgsb(params, bounds, start, objective.with_intercept(), |coef| {
        objective.loss_and_gradient(coef)
    })
}

fn run_lbfgsb<F: Float>(
    params: &SparseGlmValidParams<F>,
    bounds: Option<&BoxBounds<F>>,
    start: Coefficients<F>,
    with_intercept: bool,
    loss_and_gradient: impl Fn(&Coefficients<F>) -> (F, Array1<F>),
) -> QuasiNewtonOutcome<F> {
    let max_evaluations = params.max_iterations();
    let n_evaluations = Cell::new(0u64);
    let exhausted = Cell::new(false);
    let last = RefCell::new(start.clone());
    let descent = Cell::new(Descent::default());

    let evaluate = |x: &[f64], g: &mut [f64]| -> anyhow::Result<f64> {
        let coef = from_f64::<F>(x, with_intercept);
        let (loss, grad) = loss_and_gradient(&coef);
        if n_evaluations.get() >= max_evaluations {
            // L-BFGS-B has no evaluation limit, a vanishing gradient stops it
            exhausted.set(true);
            g.iter_mut().for_each(|g_i| *g_i = 0.0);
            return Ok(to_f64(loss));
        }
        n_evaluations.set(n_evaluations.get() + 1);

        let loss = to_f64(loss);
        for (g_i, &v) in g.iter_mut().zip(grad.iter()) {
            *g_i = to_f64(v);
        }
        descent.set(descent.get().record(loss));
        *last.borrow_mut() = coef;
        Ok(loss)
    };

    let param = lbfgsb::LbfgsbParameter {
        m: params.memory(),
        factr: to_f64(params.cost_factor()),
        pgtol: to_f64(params.gradient_tolerance()),
        iprint: -1,
    };
    let limits = bounds.map(|bounds| flat_bounds(bounds, with_intercept));
    let mut problem = lbfgsb::LbfgsbProblem::build(to_f64_vec(start.to_flat().view()), evaluate);
    if let Some(limits) = &limits {
        problem.set_bounds(limits.clone());
    }

    let mut state = lbfgsb::LbfgsbState::new(problem, param);
    // `minimize` also returns without error on an abnormal termination, so
    // the stopping criteria are checked again at the returned point
    let result = state.minimize();
    let (coefficients, status) = if exhausted.get() {
        (last.borrow().clone(), OptimizerStatus::BudgetExhausted)
    } else {
        let coefficients = from_f64(state.x(), with_intercept);
        let status = match result {
            Ok(()) => {
                let gradient = projected_gradient(state.x(), state.gx(), limits.as_deref());
                if gradient <= to_f64(params.gradient_tolerance())
                    || descent.get().stalled(to_f64(params.cost_factor()))
                {
                    OptimizerStatus::Converged
                } else {
                    OptimizerStatus::Failed(format!(
                        "abnormal termination with projected gradient {:e}",
                        gradient
                    ))
                }
            }
            Err(err) => OptimizerStatus::Failed(err.to_string()),
        };
        (coefficients, status)
    };

    QuasiNewtonOutcome {
        coefficients,
        n_evaluations: n_evaluations.get(),
        status,
    }
}

/// The two lowest losses evaluated so far, a repeated minimum counts twice
#[derive(Clone, Copy, Debug, Default)]
struct Descent {
    best: Option<f64>,
    previous: Option<f64>,
}

impl Descent {
    fn record(self, loss: f64) -> Self {
        match self.best {
            Some(best) if loss > best => self,
            _ => Descent {
                best: Some(loss),
                previous: self.best,
            },
        }
    }

    /// Relative reduction test of L-BFGS-B on the last improvement
    fn stalled(&self, cost_factor: f64) -> bool {
        match (self.previous, self.best) {
            (Some(previous), Some(best)) => {
                let scale = previous.abs().max(best.abs()).max(1.0);
                (previous - best) / scale <= cost_factor * f64::EPSILON
            }
            _ => false,
        }
    }
}

/// Infinity norm of the projected gradient step `clip(x - g) - x`
fn projected_gradient(
    x: &[f64],
    gradient: &[f64],
    bounds: Option<&[(Option<f64>, Option<f64>)]>,
) -> f64 {
    x.iter()
        .zip(gradient.iter())
        .enumerate()
        .map(|(j, (&x_j, &g_j))| {
            let mut step = x_j - g_j;
            if let Some(&(lower, upper)) = bounds.and_then(|b| b.get(j)) {
                if let Some(lower) = lower {
                    step = step.max(lower);
                }
                if let Some(upper) = upper {
                    step = step.min(upper);
                }
            }
            (step - x_j).abs()
        })
        .fold(0.0, f64::max)
}

/// Objective as seen by argmin, counting evaluations
struct ArgminObjective<'a, 'b, F: Float, X: ?Sized> {
    objective: &'b Objective<'a, F, X>,
    n_evaluations: &'b Cell<u64>,
    last: &'b RefCell<Option<Array1<f64>>>,
}

impl<'a, 'b, F: Float, X: DesignMatrix<F> + ?Sized> ArgminObjective<'a, 'b, F, X> {
    fn coefficients(&self, p: &Array1<f64>) -> Coefficients<F> {
        from_f64(p, self.objective.with_intercept())
    }

    fn record(&self, p: &Array1<f64>) {
        self.n_evaluations.set(self.n_evaluations.get() + 1);
        *self.last.borrow_mut() = Some(p.clone());
    }
}

impl<'a, 'b, F: Float, X: DesignMatrix<F> + ?Sized> CostFunction
    for ArgminObjective<'a, 'b, F, X>
{
    type Param = Array1<f64>;
    type Output = f64;

    fn cost(&self, p: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        self.record(p);
        Ok(to_f64(self.objective.loss(&self.coefficients(p))))
    }
}

impl<'a, 'b, F: Float, X: DesignMatrix<F> + ?Sized> Gradient for ArgminObjective<'a, 'b, F, X> {
    type Param = Array1<f64>;
    type Gradient = Array1<f64>;

    fn gradient(&self, p: &Self::Param) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        self.record(p);
        let (_, grad) = self.objective.loss_and_gradient(&self.coefficients(p));
        Ok(grad.mapv(to_f64))
    }
}

impl<'a, 'b, F: Float, X: DesignMatrix<F> + ?Sized> Hessian for ArgminObjective<'a, 'b, F, X> {
    type Param = Array1<f64>;
    type Hessian = Array2<f64>;

    fn hessian(&self, p: &Self::Param) -> std::result::Result<Self::Hessian, argmin::core::Error> {
        Ok(self.objective.hessian(&self.coefficients(p)).mapv(to_f64))
    }
}

fn newton_cg<F: Float, X: DesignMatrix<F> + ?Sized>(
    params: &SparseGlmValidParams<F>,
    objective: &Objective<F, X>,
    start: Coefficients<F>,
) -> Result<QuasiNewtonOutcome<F>> {
    let n_evaluations = Cell::new(0);
    let last = RefCell::new(None);
    let problem = ArgminObjective {
        objective,
        n_evaluations: &n_evaluations,
        last: &last,
    };
    let linesearch: MoreThuenteLineSearch<Array1<f64>, Array1<f64>, f64> =
        MoreThuenteLineSearch::new();
    let solver = NewtonCG::new(linesearch).with_tolerance(to_f64(params.gradient_tolerance()))?;
    let init_params = Array1::from(to_f64_vec(start.to_flat().view()));
    let max_iterations = params.max_iterations();
    let with_intercept = objective.with_intercept();

    let result = Executor::new(problem, solver)
        .configure(
            |state: IterState<Array1<f64>, Array1<f64>, (), Array2<f64>, f64>| {
                state.param(init_params).max_iters(max_iterations)
            },
        )
        .run();

    let n_evaluations = n_evaluations.get();
    let last_evaluated = || match last.borrow().as_ref() {
        Some(p) => from_f64(p, with_intercept),
        None => start.clone(),
    };

    let (coefficients, status) = match result {
        Ok(result) => {
            let state = result.state();
            let coefficients = match state.get_best_param() {
                Some(p) => from_f64(p, with_intercept),
                None => last_evaluated(),
            };
            let status = match state.get_termination_reason() {
                Some(TerminationReason::SolverConverged)
                | Some(TerminationReason::TargetCostReached) => OptimizerStatus::Converged,
                Some(TerminationReason::MaxItersReached) => OptimizerStatus::BudgetExhausted,
                Some(reason) => OptimizerStatus::Failed(format!("{:?}", reason)),
                None => OptimizerStatus::Failed("terminated without a reason".to_string()),
            };
            (coefficients, status)
        }
        Err(err) => (last_evaluated(), OptimizerStatus::Failed(err.to_string())),
    };

    Ok(QuasiNewtonOutcome {
        coefficients,
        n_evaluations,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::Family;
    use crate::hyperparams::SparseGlmParams;
    use approx::assert_abs_diff_eq;
    use linfa::ParamGuard;
    use ndarray::array;

    #[test]
    fn flat_bounds_mark_open_sides() {
        let bounds = array![[0., f64::INFINITY], [f64::NEG_INFINITY, 2.], [-1., 1.]];
        let bounds = BoxBounds::from_matrix(&bounds, 2, true).unwrap();
        assert_eq!(
            flat_bounds(&bounds, true),
            vec![(Some(0.), None), (None, Some(2.)), (Some(-1.), Some(1.))]
        );

        let bounds = BoxBounds::from_matrix(&array![[0., 1.]], 1, true).unwrap();
        assert_eq!(
            flat_bounds(&bounds, true),
            vec![(Some(0.), Some(1.)), (None, None)]
        );
    }

    #[test]
    fn lbfgsb_and_newton_cg_agree() {
        let x = array![[0.5, 1.0], [-1.2, 0.3], [2.0, -0.7], [0.1, 0.2], [-0.4, -1.5], [1.3, 0.9]];
        let y = array![1., 0., 1., 0., 1., 1.];
        let sw = Array1::ones(6);
        let objective = Objective::new(&x, y.view(), sw.view(), Family::Binomial, 1e-10, true)
            .with_l2(0.5);

        let lbfgsb = SparseGlmParams::new()
            .with_intercept(true)
            .l2_penalty(0.5)
            .gradient_tolerance(1e-8)
            .cost_factor(1e3)
            .check()
            .unwrap();
        let a = minimize(&lbfgsb, &objective, None, Coefficients::zeros(2, true)).unwrap();
        assert_eq!(a.status, OptimizerStatus::Converged);

        let newton = SparseGlmParams::new()
            .with_intercept(true)
            .l2_penalty(0.5)
            .solver(QuasiNewton::NewtonCg)
            .gradient_tolerance(1e-12)
            .check()
            .unwrap();
        let b = minimize(&newton, &objective, None, Coefficients::zeros(2, true)).unwrap();
        assert_eq!(b.status, OptimizerStatus::Converged);
        assert!(b.n_evaluations > 0);

        assert_abs_diff_eq!(a.coefficients.to_flat(), b.coefficients.to_flat(), epsilon = 1e-4);
    }

    #[test]
    fn exhausted_budget_is_not_an_error() {
        let x = array![[0.5], [-1.2], [2.0], [0.1], [-0.4], [1.3]];
        let y = array![1., 0., 1., 0., 1., 1.];
        let sw = Array1::ones(6);
        let objective = Objective::new(&x, y.view(), sw.view(), Family::Binomial, 1e-10, false);
        let params = SparseGlmParams::new().max_iterations(2).check().unwrap();
        let outcome = minimize(&params, &objective, None, Coefficients::zeros(1, false)).unwrap();
        assert_ne!(outcome.status, OptimizerStatus::Converged);
        assert!(outcome.n_evaluations <= 2);
        assert!(f64::is_finite(outcome.coefficients.weights()[0]));
    }

    #[test]
    fn lbfgsb_reports_abnormal_termination() {
        let x = array![[1.], [2.], [3.], [4.]];
        let y = array![2., 4., 6., 8.];
        let sw = Array1::ones(4);
        let objective = Objective::new(&x, y.view(), sw.view(), Family::Gaussian, 1e-10, false);
        let params = SparseGlmParams::new().check().unwrap();
        // a gradient of the wrong sign defeats every line search
        let outcome = run_lbfgsb(&params, None, Coefficients::zeros(1, false), false, |coef| {
            let (loss, grad) = objective.loss_and_gradient(coef);
            (loss, -grad)
        });
        assert!(matches!(outcome.status, OptimizerStatus::Failed(_)));
        assert!(outcome.n_evaluations > 1);
        assert_abs_diff_eq!(outcome.coefficients.weights()[0], 0.);
    }

    #[test]
    fn projected_gradient_ignores_active_bounds() {
        let bounds = [(Some(0.), Some(1.)), (None, None)];
        // the first coordinate sits on its lower bound and is pushed outwards
        assert_abs_diff_eq!(projected_gradient(&[0., 2.], &[3., 0.], Some(&bounds[..])), 0.);
        assert_abs_diff_eq!(projected_gradient(&[0.5, 2.], &[3., -0.25], Some(&bounds[..])), 0.5);
        assert_abs_diff_eq!(projected_gradient(&[0., 2.], &[3., 0.], None), 3.);
    }

    #[test]
    fn descent_stalls_on_tiny_relative_reduction() {
        let descent = Descent::default().record(10.).record(12.);
        assert!(!descent.stalled(1e7));
        let descent = descent.record(10. - 1e-12);
        assert!(descent.stalled(1e7));
        assert!(!descent.record(5.).stalled(1e7));
        assert!(Descent::default().record(3.).record(3.).stalled(1e7));
    }

    #[test]
    fn lbfgsb_respects_bounds() {
        let x = array![[1.], [2.], [3.], [4.]];
        let y = array![2., 4., 6., 8.];
        let sw = Array1::ones(4);
        let objective = Objective::new(&x, y.view(), sw.view(), Family::Gaussian, 1e-10, false);
        let bounds = BoxBounds::from_matrix(&array![[0., 1.5]], 1, false).unwrap();
        let params = SparseGlmParams::new()
            .family(Family::Gaussian)
            .check()
            .unwrap();
        let outcome =
            minimize(&params, &objective, Some(&bounds), Coefficients::zeros(1, false)).unwrap();
        assert_abs_diff_eq!(outcome.coefficients.weights()[0], 1.5, epsilon = 1e-8);
    }
}
