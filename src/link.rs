//! Scalar link helpers
//!
//! Every function branches on the sign of its argument so that no intermediate
//! exponential overflows, both for `f32` and `f64`.

use linfa::Float;

/// The logistic function `1 / (1 + exp(-z))`
pub fn inverse_logit<F: Float>(z: F) -> F {
    if z > F::zero() {
        F::one() / (F::one() + (-z).exp())
    } else {
        let e = z.exp();
        e / (F::one() + e)
    }
}

/// `ln(inverse_logit(z))`, accurate in both tails
pub fn log_inverse_logit<F: Float>(z: F) -> F {
    if z > F::zero() {
        -(-z).exp().ln_1p()
    } else {
        z - z.exp().ln_1p()
    }
}

/// `ln(exp(a) + exp(b))`
pub fn log_add_exp<F: Float>(a: F, b: F) -> F {
    let (hi, lo) = if a > b { (a, b) } else { (b, a) };
    if hi == F::neg_infinity() {
        return hi;
    }
    hi + (lo - hi).exp().ln_1p()
}

/// Exponential with the argument clamped to half the representable exponent
/// range, so that `exp(z)` and its square stay finite.
pub fn clamped_exp<F: Float>(z: F) -> F {
    let bound = <F as num_traits::Float>::max_value().ln() * F::cast(0.5);
    z.max(-bound).min(bound).exp()
}
