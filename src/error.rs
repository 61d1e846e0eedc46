use thiserror::Error;

pub type Result<T> = std::result::Result<T, GlmError>;

#[derive(Error, Debug)]
pub enum GlmError {
    #[error("unknown family `{0}`, expected one of gaussian, binomial, poisson, negativebinomial")]
    UnknownFamily(String),
    #[error("unknown solver `{0}`")]
    UnknownSolver(String),
    #[error("l1 penalty should be positive and finite, but is {0}")]
    InvalidL1Penalty(f32),
    #[error("l2 penalty should be positive and finite, but is {0}")]
    InvalidL2Penalty(f32),
    #[error("tolerance should be positive and finite, but is {0}")]
    InvalidTolerance(f32),
    #[error("number of iterations should be at least 1, but is {0}")]
    InvalidMaxIterations(u64),
    #[error("probability shrinkage should be in range (0, 0.5), but is {0}")]
    InvalidShrinkage(f32),
    #[error("negative binomial dispersion should be positive and finite, but is {0}")]
    InvalidDispersion(f32),
    #[error("history size of the quasi-Newton solver should be at least 1, but is {0}")]
    InvalidMemory(usize),
    #[error("the inversion solver cannot handle an l1 penalty, use coordinate descent instead")]
    L1WithInversion,
    #[error("box constraints are not supported by the {0} solver")]
    BoundsNotSupported(&'static str),
    #[error("bounds should have exactly two columns (lower, upper), but have {0}")]
    InvalidBoundsShape(usize),
    #[error("bounds of coefficient {0} are invalid, lower must not exceed upper and neither may be NaN")]
    InvalidBounds(usize),
    #[error("bounds cover {found} coefficients, but the model has {expected} features")]
    MismatchedBounds { expected: usize, found: usize },
    #[error("Expected `x` and `y` to have same number of rows, got {0} != {1}")]
    MismatchedShapes(usize, usize),
    #[error("Expected one sample weight per row, got {1} weights for {0} rows")]
    MismatchedSampleWeights(usize, usize),
    #[error("sample weights must be finite and non-negative")]
    InvalidSampleWeights,
    #[error("Values must be finite and not `Inf`, `-Inf` or `NaN`")]
    InvalidValues,
    #[error("targets are outside the support of the {0} family")]
    InvalidTargets(&'static str),
    #[error("Size of initial parameter guess must be the same as the number of columns in the feature matrix `x`")]
    InvalidInitialParametersGuessSize,
    #[error("Initial parameter guess must be finite")]
    InvalidInitialParametersGuess,
    #[error("probabilities are only defined for the binomial family, the model was fitted with {0}")]
    NotBinomial(&'static str),
    #[error(transparent)]
    LinalgError(#[from] linfa_linalg::LinalgError),
    #[error(transparent)]
    ArgminError(#[from] argmin::core::Error),
    #[error(transparent)]
    LinfaError(#[from] linfa::error::Error),
}
