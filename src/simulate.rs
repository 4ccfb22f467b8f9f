use na::{DVector, Vector2};
use tracing::{debug, info, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    constants::Constants,
    equations::ConstrainedSystem,
    error::{FailureKind, IntegrationDivergence, ModelingError, SimulationFailure},
    integrators::{dormand_prince, runge_kutta_4, DormandPrinceStep, Integrator},
    linkage::Linkage,
    rhs::{NewtonConfig, RhsEvaluator, WarmStart},
    types::Float,
    util::max_abs,
};

/// Settings of a simulation run
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SimulationConfig {
    pub integrator: Integrator,
    pub newton: NewtonConfig,

    /// Largest constraint residual (configuration and velocity) accepted in
    /// the initial condition
    pub consistency_tolerance: Float,

    /// Abort after this many step attempts, accepted or rejected
    pub max_steps: Option<usize>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            integrator: Integrator::default(),
            newton: NewtonConfig::default(),
            consistency_tolerance: 1e-2,
            max_steps: None,
        }
    }
}

impl SimulationConfig {
    #[must_use]
    pub const fn with_integrator(mut self, integrator: Integrator) -> Self {
        self.integrator = integrator;
        self
    }

    #[must_use]
    pub const fn with_newton(mut self, newton: NewtonConfig) -> Self {
        self.newton = newton;
        self
    }

    #[must_use]
    pub const fn with_consistency_tolerance(mut self, tolerance: Float) -> Self {
        self.consistency_tolerance = tolerance;
        self
    }

    #[must_use]
    pub const fn with_max_steps(mut self, max_steps: Option<usize>) -> Self {
        self.max_steps = max_steps;
        self
    }
}

/// Sampled states [q; u] of a run, in time order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trajectory {
    times: Vec<Float>,
    states: Vec<DVector<Float>>,
}

impl Trajectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, time: Float, state: DVector<Float>) {
        self.times.push(time);
        self.states.push(state);
    }

    pub fn times(&self) -> &[Float] {
        &self.times
    }

    pub fn states(&self) -> &[DVector<Float>] {
        &self.states
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn last(&self) -> Option<(Float, &DVector<Float>)> {
        self.times.last().copied().zip(self.states.last())
    }

    /// Time series of one state entry, e.g. `coordinate(0)` for q1 and
    /// `coordinate(n)` for u1
    pub fn coordinate(&self, index: usize) -> Vec<Float> {
        self.states.iter().map(|x| x[index]).collect()
    }

    /// Inertial positions of a named point at every sample
    pub fn point_history(
        &self,
        linkage: &Linkage,
        point: &str,
        c: &Constants,
    ) -> Result<Vec<Vector2<Float>>, ModelingError> {
        let point = linkage
            .point_index(point)
            .ok_or_else(|| ModelingError::UnknownPoint(point.to_string()))?;
        linkage.check_constants(c)?;
        let n = linkage.num_coordinates();
        Ok(self
            .states
            .iter()
            .map(|x| linkage.position(point, &x.rows(0, n).into_owned(), c))
            .collect())
    }
}

/// A validated run of a constrained system over a grid of sample times.
pub struct Simulation<S: ConstrainedSystem> {
    rhs: RhsEvaluator<S>,
    constants: Constants,
    x0: DVector<Float>,
    times: Vec<Float>,
    config: SimulationConfig,
}

impl<S: ConstrainedSystem> Simulation<S> {
    /// Check the inputs of a run. The initial condition has to satisfy the
    /// configuration and velocity constraints within
    /// `config.consistency_tolerance`; it is otherwise taken as is.
    pub fn new(
        system: S,
        constants: Constants,
        x0: DVector<Float>,
        times: Vec<Float>,
        config: SimulationConfig,
    ) -> Result<Self, ModelingError> {
        if constants.names() != system.parameter_names() {
            return Err(ModelingError::ConstantsMismatch {
                expected: system.parameter_names().to_vec(),
                actual: constants.names().to_vec(),
            });
        }

        let n = system.num_coordinates();
        if x0.len() != 2 * n {
            return Err(ModelingError::StateLength {
                expected: 2 * n,
                actual: x0.len(),
            });
        }
        if x0.iter().any(|v| !v.is_finite()) {
            return Err(ModelingError::NonFiniteInitialCondition);
        }

        config.integrator.validate()?;

        if times.is_empty() {
            return Err(ModelingError::EmptyTimeGrid);
        }
        if let Some(index) = times.windows(2).position(|w| !(w[1] > w[0])) {
            return Err(ModelingError::NonMonotonicTimes { index: index + 1 });
        }

        let q0 = x0.rows(0, n).into_owned();
        let u0 = x0.rows(n, n).into_owned();
        let residual = max_abs(
            system
                .configuration_constraints(&q0, &constants)
                .iter()
                .chain(system.velocity_constraints(&q0, &u0, &constants).iter())
                .cloned(),
        );
        if !(residual <= config.consistency_tolerance) {
            return Err(ModelingError::InconsistentInitialCondition {
                residual,
                tolerance: config.consistency_tolerance,
            });
        }
        debug!(residual, "initial condition accepted");

        Ok(Simulation {
            rhs: RhsEvaluator::new(system, config.newton),
            constants,
            x0,
            times,
            config,
        })
    }

    pub fn system(&self) -> &S {
        self.rhs.system()
    }

    pub fn constants(&self) -> &Constants {
        &self.constants
    }

    /// Integrate from the first sample time to the last.
    ///
    /// The first sample is the initial condition unchanged. Every accepted
    /// step is projected onto the constraints, so every later sample
    /// satisfies them to the Newton tolerance.
    pub fn run(&self) -> Result<Trajectory, SimulationFailure> {
        let mut run = Run {
            rhs: &self.rhs,
            c: &self.constants,
            config: &self.config,
            warm_start: WarmStart::from_state(self.rhs.system().partition(), &self.x0),
            t: self.times[0],
            x: self.x0.clone(),
            trajectory: Trajectory::new(),
            steps: 0,
            rejected: 0,
        };
        run.trajectory.push(run.t, run.x.clone());

        info!(
            samples = self.times.len(),
            integrator = ?self.config.integrator,
            "simulation started"
        );

        let mut dt = match self.config.integrator {
            Integrator::RungeKutta4 { max_step } => max_step,
            Integrator::DormandPrince {
                initial_step,
                max_step,
                ..
            } => initial_step.min(max_step),
        };
        for target in self.times[1..].iter() {
            let advanced = match self.config.integrator {
                Integrator::RungeKutta4 { max_step } => run.advance_fixed(*target, max_step),
                Integrator::DormandPrince {
                    rtol,
                    atol,
                    min_step,
                    max_step,
                    ..
                } => run.advance_adaptive(*target, &mut dt, rtol, atol, min_step, max_step),
            };
            if let Err(kind) = advanced {
                warn!(time = run.t, error = %kind, "simulation failed");
                return Err(SimulationFailure {
                    time: run.t,
                    kind,
                    trajectory: run.trajectory,
                });
            }
            run.trajectory.push(*target, run.x.clone());
        }

        info!(
            samples = run.trajectory.len(),
            steps = run.steps,
            rejected = run.rejected,
            "simulation finished"
        );
        Ok(run.trajectory)
    }
}

/// Mutable state of one call to `Simulation::run`
struct Run<'a, S: ConstrainedSystem> {
    rhs: &'a RhsEvaluator<S>,
    c: &'a Constants,
    config: &'a SimulationConfig,
    warm_start: WarmStart,
    t: Float,
    x: DVector<Float>,
    trajectory: Trajectory,
    steps: usize,
    rejected: usize,
}

impl<'a, S: ConstrainedSystem> Run<'a, S> {
    fn count_step(&mut self) -> Result<(), FailureKind> {
        if let Some(max_steps) = self.config.max_steps {
            if self.steps >= max_steps {
                return Err(IntegrationDivergence::StepBudgetExhausted { max_steps }.into());
            }
        }
        self.steps += 1;
        Ok(())
    }

    /// Take an accepted state, project it onto the constraints and move on
    fn accept(&mut self, t: Float, x: DVector<Float>) -> Result<(), FailureKind> {
        if x.iter().any(|v| !v.is_finite()) {
            return Err(IntegrationDivergence::NonFiniteState.into());
        }
        self.x = self.rhs.resolve(&x, self.c, &mut self.warm_start)?;
        self.t = t;
        Ok(())
    }

    /// Equal RK4 steps no larger than `max_step` up to `target`
    fn advance_fixed(&mut self, target: Float, max_step: Float) -> Result<(), FailureKind> {
        let interval = target - self.t;
        let count = (interval / max_step).ceil().max(1.0) as usize;
        let dt = interval / count as Float;
        for i in 0..count {
            self.count_step()?;
            let (rhs, c, warm_start) = (self.rhs, self.c, &mut self.warm_start);
            let mut f = |t: Float, x: &DVector<Float>| rhs.derivative(x, t, c, warm_start);
            let x = runge_kutta_4(&mut f, self.t, &self.x, dt)?;
            let t = if i + 1 == count {
                target
            } else {
                self.t + dt
            };
            self.accept(t, x)?;
        }
        Ok(())
    }

    /// One Dormand-Prince attempt from the current state. A rejected attempt
    /// leaves the warm start at the current state.
    fn attempt(
        &mut self,
        h: Float,
        rtol: Float,
        atol: Float,
    ) -> Result<DormandPrinceStep, FailureKind> {
        let saved = self.warm_start.clone();
        let (rhs, c, warm_start) = (self.rhs, self.c, &mut self.warm_start);
        let mut f = |t: Float, x: &DVector<Float>| rhs.derivative(x, t, c, warm_start);
        let step = dormand_prince(&mut f, self.t, &self.x, h, rtol, atol)?;
        if !step.accepted() {
            self.warm_start = saved;
        }
        Ok(step)
    }

    /// Adaptive Dormand-Prince steps up to `target`, landing on it exactly.
    /// `dt` carries the proposed step size across sample intervals.
    fn advance_adaptive(
        &mut self,
        target: Float,
        dt: &mut Float,
        rtol: Float,
        atol: Float,
        min_step: Float,
        max_step: Float,
    ) -> Result<(), FailureKind> {
        while self.t < target {
            self.count_step()?;

            let remaining = target - self.t;
            let mut h = dt.min(remaining);
            if remaining - h < min_step {
                h = remaining;
            }
            let last = h == remaining;

            let step = self.attempt(h, rtol, atol)?;
            if step.accepted() {
                let t = if last { target } else { self.t + h };
                self.accept(t, step.state)?;
                // a step shortened to hit the sample says little about the
                // step size the solution allows
                if !last || h >= *dt {
                    *dt = (h * step.factor).min(max_step);
                }
            } else {
                self.rejected += 1;
                *dt = h * step.factor;
                debug!(t = self.t, error = step.error, dt = *dt, "step rejected");
                if *dt < min_step {
                    return Err(IntegrationDivergence::StepSizeUnderflow {
                        step: *dt,
                        min_step,
                    }
                    .into());
                }
            }
        }
        Ok(())
    }
}
