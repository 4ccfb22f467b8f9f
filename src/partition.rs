use na::{DMatrix, DVector};
use tracing::debug;

use crate::{
    constants::Constants, error::ModelingError, linkage::Linkage, types::Float,
    util::reciprocal_condition,
};

/// Split of the generalized coordinates (and, identically, the generalized
/// speeds) into an independent set that is integrated freely and a dependent
/// set that is solved from the constraints.
///
/// The state vector keeps coordinates in declaration order; the partition
/// only records which indices belong to which set.
#[derive(Clone, Debug, PartialEq)]
pub struct Partition {
    independent: Vec<usize>,
    dependent: Vec<usize>,
}

impl Partition {
    /// Designate `independent` coordinates by name, all others are dependent.
    ///
    /// The number of dependent coordinates must equal the number of
    /// constraint equations, and the constraint Jacobian restricted to the
    /// dependent columns must be invertible at `q_nominal`.
    pub fn new(
        linkage: &Linkage,
        independent: &[&str],
        q_nominal: &DVector<Float>,
        c: &Constants,
        min_rcond: Float,
    ) -> Result<Self, ModelingError> {
        linkage.check_constants(c)?;
        let n = linkage.num_coordinates();
        if q_nominal.len() != n {
            return Err(ModelingError::StateLength {
                expected: n,
                actual: q_nominal.len(),
            });
        }

        let mut independent_indices = vec![];
        for name in independent {
            let i = linkage
                .coordinate_index(name)
                .ok_or_else(|| ModelingError::UnknownCoordinate(name.to_string()))?;
            if independent_indices.contains(&i) {
                return Err(ModelingError::DuplicateIndependent(name.to_string()));
            }
            independent_indices.push(i);
        }
        let dependent: Vec<usize> = (0..n)
            .filter(|i| !independent_indices.contains(i))
            .collect();

        if dependent.len() != linkage.num_constraints() {
            return Err(ModelingError::PartitionMismatch {
                dependent: dependent.len(),
                constraints: linkage.num_constraints(),
            });
        }

        let partition = Partition {
            independent: independent_indices,
            dependent,
        };

        let jacobian = linkage.constraint_jacobian(q_nominal, c);
        let rcond = reciprocal_condition(&partition.dependent_columns(&jacobian));
        if rcond < min_rcond {
            return Err(ModelingError::SingularPartition { rcond });
        }

        debug!(
            independent = ?partition.names(&partition.independent, linkage),
            dependent = ?partition.names(&partition.dependent, linkage),
            rcond,
            "partitioned coordinates"
        );
        Ok(partition)
    }

    fn names(&self, indices: &[usize], linkage: &Linkage) -> Vec<String> {
        indices
            .iter()
            .map(|i| linkage.coordinate_names()[*i].clone())
            .collect()
    }

    pub fn independent(&self) -> &[usize] {
        &self.independent
    }

    pub fn dependent(&self) -> &[usize] {
        &self.dependent
    }

    pub fn num_coordinates(&self) -> usize {
        self.independent.len() + self.dependent.len()
    }

    pub fn degrees_of_freedom(&self) -> usize {
        self.independent.len()
    }

    pub fn is_dependent(&self, coordinate: usize) -> bool {
        self.dependent.contains(&coordinate)
    }

    pub fn dependent_columns(&self, m: &DMatrix<Float>) -> DMatrix<Float> {
        m.select_columns(self.dependent.iter())
    }

    pub fn independent_columns(&self, m: &DMatrix<Float>) -> DMatrix<Float> {
        m.select_columns(self.independent.iter())
    }

    pub fn gather_dependent(&self, v: &DVector<Float>) -> DVector<Float> {
        v.select_rows(self.dependent.iter())
    }

    pub fn gather_independent(&self, v: &DVector<Float>) -> DVector<Float> {
        v.select_rows(self.independent.iter())
    }

    pub fn scatter_dependent(&self, v: &mut DVector<Float>, values: &DVector<Float>) {
        for (i, value) in self.dependent.iter().zip(values.iter()) {
            v[*i] = *value;
        }
    }

    /// v[dependent] += delta
    pub fn add_dependent(&self, v: &mut DVector<Float>, delta: &DVector<Float>) {
        for (i, d) in self.dependent.iter().zip(delta.iter()) {
            v[*i] += d;
        }
    }

    /// Matrix T (n x dof) mapping independent speeds to all speeds, given
    /// C = -Φ_dep⁻¹ Φ_ind (dependent speeds = C * independent speeds)
    pub fn speed_map(&self, coupling: &DMatrix<Float>) -> DMatrix<Float> {
        let mut map = DMatrix::zeros(self.num_coordinates(), self.degrees_of_freedom());
        for (column, i) in self.independent.iter().enumerate() {
            map[(*i, column)] = 1.0;
        }
        for (row, i) in self.dependent.iter().enumerate() {
            map.row_mut(*i).copy_from(&coupling.row(row));
        }
        map
    }
}
