use na::{DMatrix, DVector};

use crate::{
    constants::Constants,
    error::SingularConfiguration,
    linkage::{Body, Linkage},
    partition::Partition,
    types::Float,
    util::reciprocal_condition,
};

/// A constrained system described by its mass matrix and forcing vector over
/// the full state x = [q; u], such that M(x, c) dx/dt = F(x, c),
/// together with holonomic constraints Φ(q) = 0 whose velocity form is
/// Φ_q(q) u = 0.
///
/// Implementations are pure functions of their arguments.
pub trait ConstrainedSystem {
    fn coordinate_names(&self) -> &[String];

    fn parameter_names(&self) -> &[String];

    fn partition(&self) -> &Partition;

    fn num_coordinates(&self) -> usize {
        self.coordinate_names().len()
    }

    fn configuration_constraints(&self, q: &DVector<Float>, c: &Constants) -> DVector<Float>;

    /// ∂Φ/∂q, also the coefficient matrix of the velocity constraints
    fn constraint_jacobian(&self, q: &DVector<Float>, c: &Constants) -> DMatrix<Float>;

    fn velocity_constraints(
        &self,
        q: &DVector<Float>,
        u: &DVector<Float>,
        c: &Constants,
    ) -> DVector<Float> {
        self.constraint_jacobian(q, c) * u
    }

    fn mass_matrix(
        &self,
        x: &DVector<Float>,
        c: &Constants,
    ) -> Result<DMatrix<Float>, SingularConfiguration>;

    fn forcing_vector(
        &self,
        x: &DVector<Float>,
        c: &Constants,
    ) -> Result<DVector<Float>, SingularConfiguration>;
}

/// Equations of motion of a linkage by Kane's method with dependent speeds.
///
/// With C = -Φ_dep⁻¹ Φ_ind, the dependent speeds are u_dep = C u_ind, and the
/// constrained partial velocities of a point with Jacobian J are J T, where
/// T stacks the identity (independent rows) and C (dependent rows).
///
/// Row layout of the 2n x 2n system:
/// ```text
/// | I   0     | |qdot|   | u         |
/// | 0   M_dyn | |udot| = | f_dyn     |   (one row per independent speed)
/// | 0   Φ_q   |          | -Φdot_q u |   (one row per dependent speed)
///
/// M_dyn = Σ m (J_G T)ᵀ J_G + I (w T)ᵀ w
/// f_dyn = Σ (J_P T)ᵀ F_P - Σ m (J_G T)ᵀ Jdot_G u
/// ```
/// where w selects the speed of the body's rotation coordinate.
#[derive(Clone, Debug)]
pub struct KaneEquations {
    linkage: Linkage,
    partition: Partition,
}

impl KaneEquations {
    pub fn new(linkage: Linkage, partition: Partition) -> Self {
        KaneEquations { linkage, partition }
    }

    pub fn linkage(&self) -> &Linkage {
        &self.linkage
    }

    fn split(&self, x: &DVector<Float>) -> (DVector<Float>, DVector<Float>) {
        let n = self.linkage.num_coordinates();
        (x.rows(0, n).into_owned(), x.rows(n, n).into_owned())
    }

    /// T, the map from independent speeds to all speeds
    fn speed_map(
        &self,
        q: &DVector<Float>,
        c: &Constants,
    ) -> Result<DMatrix<Float>, SingularConfiguration> {
        let jacobian = self.linkage.constraint_jacobian(q, c);
        let dependent = self.partition.dependent_columns(&jacobian);
        let independent = self.partition.independent_columns(&jacobian);
        let coupling = dependent.clone().lu().solve(&(-independent)).ok_or_else(|| {
            SingularConfiguration::SingularConstraintJacobian {
                rcond: reciprocal_condition(&dependent),
            }
        })?;
        Ok(self.partition.speed_map(&coupling))
    }

    /// Row vector selecting the rotation speed of a rigid body
    fn rotation_row(&self, frame: usize) -> DMatrix<Float> {
        let mut w = DMatrix::zeros(1, self.linkage.num_coordinates());
        w[(0, self.linkage.frames()[frame].coordinate)] = 1.0;
        w
    }

    fn dynamic_rows(
        &self,
        q: &DVector<Float>,
        c: &Constants,
        map: &DMatrix<Float>,
    ) -> DMatrix<Float> {
        let n = self.linkage.num_coordinates();
        let mut rows = DMatrix::zeros(self.partition.degrees_of_freedom(), n);
        for body in self.linkage.bodies() {
            let (point, mass) = match body {
                Body::Rigid(b) => (b.mass_center, b.mass),
                Body::Particle(p) => (p.point, p.mass),
            };
            let jacobian = DMatrix::from_column_slice(
                2,
                n,
                self.linkage.point_jacobian(point, q, c).as_slice(),
            );
            let partial = &jacobian * map;
            rows += partial.transpose() * &jacobian * c[mass];

            if let Body::Rigid(b) = body {
                let w = self.rotation_row(b.frame);
                let partial = &w * map;
                rows += partial.transpose() * &w * c[b.inertia];
            }
        }
        rows
    }

    fn dynamic_forcing(
        &self,
        q: &DVector<Float>,
        u: &DVector<Float>,
        c: &Constants,
        map: &DMatrix<Float>,
    ) -> DVector<Float> {
        let n = self.linkage.num_coordinates();
        let mut forcing = DVector::zeros(self.partition.degrees_of_freedom());

        // generalized active forces
        for load in self.linkage.loads() {
            let jacobian = DMatrix::from_column_slice(
                2,
                n,
                self.linkage.point_jacobian(load.point, q, c).as_slice(),
            );
            let force = load.evaluate(c);
            forcing += (&jacobian * map).transpose() * DVector::from_column_slice(force.as_slice());
        }

        // inertia forces not proportional to udot
        for body in self.linkage.bodies() {
            let (point, mass) = match body {
                Body::Rigid(b) => (b.mass_center, b.mass),
                Body::Particle(p) => (p.point, p.mass),
            };
            let jacobian = DMatrix::from_column_slice(
                2,
                n,
                self.linkage.point_jacobian(point, q, c).as_slice(),
            );
            let convective = self.linkage.convective_acceleration(point, q, u, c);
            forcing -= (&jacobian * map).transpose()
                * DVector::from_column_slice(convective.as_slice())
                * c[mass];
        }

        forcing
    }
}

impl ConstrainedSystem for KaneEquations {
    fn coordinate_names(&self) -> &[String] {
        self.linkage.coordinate_names()
    }

    fn parameter_names(&self) -> &[String] {
        self.linkage.parameter_names()
    }

    fn partition(&self) -> &Partition {
        &self.partition
    }

    fn configuration_constraints(&self, q: &DVector<Float>, c: &Constants) -> DVector<Float> {
        self.linkage.configuration_constraints(q, c)
    }

    fn constraint_jacobian(&self, q: &DVector<Float>, c: &Constants) -> DMatrix<Float> {
        self.linkage.constraint_jacobian(q, c)
    }

    fn mass_matrix(
        &self,
        x: &DVector<Float>,
        c: &Constants,
    ) -> Result<DMatrix<Float>, SingularConfiguration> {
        let n = self.linkage.num_coordinates();
        let dof = self.partition.degrees_of_freedom();
        let (q, _u) = self.split(x);
        let map = self.speed_map(&q, c)?;

        let mut mass_matrix = DMatrix::zeros(2 * n, 2 * n);
        mass_matrix
            .view_mut((0, 0), (n, n))
            .copy_from(&DMatrix::identity(n, n));
        mass_matrix
            .view_mut((n, n), (dof, n))
            .copy_from(&self.dynamic_rows(&q, c, &map));
        mass_matrix
            .view_mut((n + dof, n), (n - dof, n))
            .copy_from(&self.linkage.constraint_jacobian(&q, c));
        Ok(mass_matrix)
    }

    fn forcing_vector(
        &self,
        x: &DVector<Float>,
        c: &Constants,
    ) -> Result<DVector<Float>, SingularConfiguration> {
        let n = self.linkage.num_coordinates();
        let dof = self.partition.degrees_of_freedom();
        let (q, u) = self.split(x);
        let map = self.speed_map(&q, c)?;

        let mut forcing = DVector::zeros(2 * n);
        forcing.rows_mut(0, n).copy_from(&u);
        forcing
            .rows_mut(n, dof)
            .copy_from(&self.dynamic_forcing(&q, &u, c, &map));
        forcing
            .rows_mut(n + dof, n - dof)
            .copy_from(&(-self.linkage.constraint_bias(&q, &u, c)));
        Ok(forcing)
    }
}
