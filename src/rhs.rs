use na::DVector;
use tracing::trace;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    constants::Constants,
    equations::ConstrainedSystem,
    error::SingularConfiguration,
    partition::Partition,
    types::Float,
    util::{max_abs, reciprocal_condition},
};

/// Settings of the Newton solve for the dependent coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NewtonConfig {
    /// Iterations allowed before giving up
    pub max_iterations: usize,

    /// Converged once every configuration constraint is below this in
    /// absolute value
    pub tolerance: Float,

    /// Smallest acceptable reciprocal condition number of the dependent
    /// constraint Jacobian and of the mass matrix
    pub min_rcond: Float,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            tolerance: 1e-10,
            min_rcond: 1e-12,
        }
    }
}

impl NewtonConfig {
    #[must_use]
    pub const fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    #[must_use]
    pub const fn with_tolerance(mut self, tolerance: Float) -> Self {
        self.tolerance = tolerance;
        self
    }

    #[must_use]
    pub const fn with_min_rcond(mut self, min_rcond: Float) -> Self {
        self.min_rcond = min_rcond;
        self
    }
}

/// Last resolved dependent coordinates, used as the initial guess of the next
/// Newton solve.
#[derive(Debug, Clone, PartialEq)]
pub struct WarmStart {
    q_dependent: DVector<Float>,
}

impl WarmStart {
    /// Seed from the dependent coordinates of a full state [q; u]
    pub fn from_state(partition: &Partition, x: &DVector<Float>) -> Self {
        let q = x.rows(0, partition.num_coordinates()).into_owned();
        WarmStart {
            q_dependent: partition.gather_dependent(&q),
        }
    }

    pub fn dependent_coordinates(&self) -> &DVector<Float> {
        &self.q_dependent
    }
}

/// Turns a constrained system into an explicit ODE dx/dt = f(x, t).
///
/// Only the independent coordinates and speeds of a state are trusted. The
/// dependent ones are recomputed from the constraints at every evaluation.
pub struct RhsEvaluator<S: ConstrainedSystem> {
    system: S,
    newton: NewtonConfig,
}

impl<S: ConstrainedSystem> RhsEvaluator<S> {
    pub fn new(system: S, newton: NewtonConfig) -> Self {
        RhsEvaluator { system, newton }
    }

    pub fn system(&self) -> &S {
        &self.system
    }

    pub fn into_system(self) -> S {
        self.system
    }

    pub fn newton(&self) -> &NewtonConfig {
        &self.newton
    }

    /// Solve Φ(q_ind, q_dep) = 0 for q_dep starting from the warm start, then
    /// Φ_q u = 0 for u_dep. Returns the state with the dependent entries
    /// replaced, and stores the new q_dep in `warm_start`.
    ///
    /// The dependent Jacobian block is checked at every iterate, including a
    /// converged one, so that a dead-center position is never accepted.
    pub fn resolve(
        &self,
        x: &DVector<Float>,
        c: &Constants,
        warm_start: &mut WarmStart,
    ) -> Result<DVector<Float>, SingularConfiguration> {
        if x.iter().any(|v| !v.is_finite()) {
            return Err(SingularConfiguration::NonFinite("state"));
        }
        let partition = self.system.partition();
        let n = partition.num_coordinates();
        let mut q = x.rows(0, n).into_owned();
        let mut u = x.rows(n, n).into_owned();
        partition.scatter_dependent(&mut q, &warm_start.q_dependent);

        let mut iterations = 0;
        let (dependent, jacobian, rcond) = loop {
            let phi = self.system.configuration_constraints(&q, c);
            let jacobian = self.system.constraint_jacobian(&q, c);
            let dependent = partition.dependent_columns(&jacobian);

            let rcond = reciprocal_condition(&dependent);
            if !(rcond >= self.newton.min_rcond) {
                return Err(SingularConfiguration::SingularConstraintJacobian { rcond });
            }

            let residual = max_abs(phi.iter().cloned());
            if !residual.is_finite() {
                return Err(SingularConfiguration::NonFinite("configuration constraints"));
            }
            if residual <= self.newton.tolerance {
                trace!(iterations, residual, "resolved dependent coordinates");
                break (dependent, jacobian, rcond);
            }
            if iterations == self.newton.max_iterations {
                return Err(SingularConfiguration::NotConverged {
                    iterations,
                    residual,
                });
            }

            let step = dependent
                .lu()
                .solve(&(-phi))
                .ok_or(SingularConfiguration::SingularConstraintJacobian { rcond })?;
            partition.add_dependent(&mut q, &step);
            iterations += 1;
        };

        let u_independent = partition.gather_independent(&u);
        let rhs = -(partition.independent_columns(&jacobian) * u_independent);
        let u_dependent = dependent
            .lu()
            .solve(&rhs)
            .ok_or(SingularConfiguration::SingularConstraintJacobian { rcond })?;
        if u_dependent.iter().any(|v| !v.is_finite()) {
            return Err(SingularConfiguration::NonFinite("dependent speeds"));
        }
        partition.scatter_dependent(&mut u, &u_dependent);

        warm_start.q_dependent = partition.gather_dependent(&q);

        let mut resolved = x.clone();
        resolved.rows_mut(0, n).copy_from(&q);
        resolved.rows_mut(n, n).copy_from(&u);
        Ok(resolved)
    }

    /// dx/dt at state `x`. The system is autonomous, `t` is accepted for the
    /// integrators' sake.
    pub fn derivative(
        &self,
        x: &DVector<Float>,
        _t: Float,
        c: &Constants,
        warm_start: &mut WarmStart,
    ) -> Result<DVector<Float>, SingularConfiguration> {
        let resolved = self.resolve(x, c, warm_start)?;

        let mass_matrix = self.system.mass_matrix(&resolved, c)?;
        let forcing = self.system.forcing_vector(&resolved, c)?;
        if forcing.iter().any(|v| !v.is_finite()) {
            return Err(SingularConfiguration::NonFinite("forcing vector"));
        }

        let rcond = reciprocal_condition(&mass_matrix);
        if !(rcond >= self.newton.min_rcond) {
            return Err(SingularConfiguration::SingularMassMatrix { rcond });
        }
        let xdot = mass_matrix
            .lu()
            .solve(&forcing)
            .ok_or(SingularConfiguration::SingularMassMatrix { rcond })?;
        if xdot.iter().any(|v| !v.is_finite()) {
            return Err(SingularConfiguration::NonFinite("state derivative"));
        }
        Ok(xdot)
    }
}
