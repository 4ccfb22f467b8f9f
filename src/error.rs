use thiserror::Error;

use crate::{simulate::Trajectory, types::Float};

/// Problems with the mechanism description or the inputs of a run. These are
/// detected before any integration happens.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelingError {
    #[error("unknown coordinate `{0}`")]
    UnknownCoordinate(String),

    #[error("unknown parameter `{0}`")]
    UnknownParameter(String),

    #[error("unknown frame `{0}`")]
    UnknownFrame(String),

    #[error("unknown point `{0}`")]
    UnknownPoint(String),

    #[error("name `{0}` is declared more than once")]
    DuplicateName(String),

    #[error("coordinate `{0}` does not appear in any frame or segment")]
    UnusedCoordinate(String),

    #[error("mechanism has no closed loop")]
    NoLoops,

    #[error("loop `{0}` does not depend on any coordinate")]
    DegenerateLoop(String),

    #[error("{constraints} constraints leave no freedom for {coordinates} coordinates")]
    DegreesOfFreedom {
        coordinates: usize,
        constraints: usize,
    },

    #[error("{dependent} dependent coordinates given for {constraints} constraint equations")]
    PartitionMismatch {
        dependent: usize,
        constraints: usize,
    },

    #[error("coordinate `{0}` is listed as independent more than once")]
    DuplicateIndependent(String),

    #[error("constraint Jacobian is singular in the dependent coordinates (reciprocal condition {rcond:e})")]
    SingularPartition { rcond: Float },

    #[error("expected a vector of length {expected}, got {actual}")]
    StateLength { expected: usize, actual: usize },

    #[error("constants {actual:?} do not match the model parameters {expected:?}")]
    ConstantsMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("no sample times given")]
    EmptyTimeGrid,

    #[error("sample times are not strictly increasing at index {index}")]
    NonMonotonicTimes { index: usize },

    #[error("initial condition contains non-finite values")]
    NonFiniteInitialCondition,

    #[error("initial condition violates the constraints (residual {residual:e} > {tolerance:e})")]
    InconsistentInitialCondition { residual: Float, tolerance: Float },

    #[error("integrator setting `{name}` must be positive and finite, got {value}")]
    InvalidIntegratorSetting { name: &'static str, value: Float },

    #[error("minimum step {min_step:e} exceeds the maximum step {max_step:e}")]
    StepBounds { min_step: Float, max_step: Float },
}

/// The dependent coordinates or the accelerations cannot be determined at an
/// evaluated state, e.g. at a dead-center position of the mechanism.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SingularConfiguration {
    #[error("configuration constraints did not converge after {iterations} Newton iterations (residual {residual:e})")]
    NotConverged { iterations: usize, residual: Float },

    #[error("dependent constraint Jacobian is singular (reciprocal condition {rcond:e})")]
    SingularConstraintJacobian { rcond: Float },

    #[error("mass matrix is singular (reciprocal condition {rcond:e})")]
    SingularMassMatrix { rcond: Float },

    #[error("non-finite value in {0}")]
    NonFinite(&'static str),
}

/// The time stepper could not make progress.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum IntegrationDivergence {
    #[error("step size {step:e} fell below the minimum {min_step:e}")]
    StepSizeUnderflow { step: Float, min_step: Float },

    #[error("step budget of {max_steps} steps exhausted")]
    StepBudgetExhausted { max_steps: usize },

    #[error("state became non-finite")]
    NonFiniteState,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FailureKind {
    #[error("singular configuration: {0}")]
    SingularConfiguration(#[from] SingularConfiguration),

    #[error("integration diverged: {0}")]
    IntegrationDivergence(#[from] IntegrationDivergence),
}

/// A run that stopped early. `trajectory` holds every sample produced before
/// the failure.
#[derive(Debug, Clone, Error)]
#[error("simulation failed at t = {time}: {kind}")]
pub struct SimulationFailure {
    pub time: Float,
    pub kind: FailureKind,
    pub trajectory: Trajectory,
}
