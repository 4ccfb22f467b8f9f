#![allow(non_snake_case)]

use types::Float;
pub extern crate nalgebra as na;

pub mod builders;
pub mod constants;
pub mod energy;
pub mod equations;
pub mod error;
pub mod integrators;
pub mod kinematics;
pub mod linkage;
pub mod partition;
pub mod plot;
pub mod rhs;
pub mod simulate;
pub mod types;
pub mod util;

pub use constants::Constants;
pub use equations::{ConstrainedSystem, KaneEquations};
pub use error::{
    FailureKind, IntegrationDivergence, ModelingError, SimulationFailure, SingularConfiguration,
};
pub use integrators::Integrator;
pub use linkage::{Linkage, LinkageBuilder};
pub use partition::Partition;
pub use rhs::{NewtonConfig, RhsEvaluator, WarmStart};
pub use simulate::{Simulation, SimulationConfig, Trajectory};

pub const PI: Float = std::f64::consts::PI;
pub const TWO_PI: Float = 2.0 * PI;
