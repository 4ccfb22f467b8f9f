use std::ops::Index;

use na::DVector;

use crate::{error::ModelingError, types::Float};

/// Named physical parameters of a mechanism, e.g. link lengths, masses,
/// moments of inertia and gravitational acceleration.
///
/// Values are caller-supplied in consistent units and stay fixed for the
/// duration of a simulation run.
#[derive(Clone, Debug, PartialEq)]
pub struct Constants {
    names: Vec<String>,
    values: DVector<Float>,
}

impl Constants {
    pub fn new(entries: &[(&str, Float)]) -> Self {
        Constants {
            names: entries.iter().map(|(name, _)| name.to_string()).collect(),
            values: DVector::from_iterator(entries.len(), entries.iter().map(|(_, v)| *v)),
        }
    }

    /// Pair up parameter names with a plain value vector, in order.
    pub fn from_values(names: &[String], values: &[Float]) -> Option<Self> {
        if names.len() != values.len() {
            return None;
        }
        Some(Constants {
            names: names.to_vec(),
            values: DVector::from_column_slice(values),
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &DVector<Float> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn get(&self, name: &str) -> Option<Float> {
        self.index_of(name).map(|i| self.values[i])
    }

    /// Return a copy with one parameter changed
    pub fn with(&self, name: &str, value: Float) -> Result<Self, ModelingError> {
        let i = self
            .index_of(name)
            .ok_or_else(|| ModelingError::UnknownParameter(name.to_string()))?;
        let mut constants = self.clone();
        constants.values[i] = value;
        Ok(constants)
    }
}

impl Index<usize> for Constants {
    type Output = Float;

    fn index(&self, index: usize) -> &Float {
        &self.values[index]
    }
}
