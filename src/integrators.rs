use itertools::izip;
use na::DVector;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{error::ModelingError, types::Float};

/// Time stepping scheme of a simulation run
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Integrator {
    /// Classic fourth order Runge-Kutta with a fixed step no larger than
    /// `max_step`
    RungeKutta4 { max_step: Float },

    /// Dormand-Prince 5(4) with embedded error control. A step is accepted
    /// when max |err_i| / (atol + rtol |x_i|) <= 1.
    DormandPrince {
        rtol: Float,
        atol: Float,
        initial_step: Float,
        min_step: Float,
        max_step: Float,
    },
}

impl Default for Integrator {
    fn default() -> Self {
        Integrator::DormandPrince {
            rtol: 1e-8,
            atol: 1e-10,
            initial_step: 1e-3,
            min_step: 1e-12,
            max_step: 0.1,
        }
    }
}

impl Integrator {
    /// Reject step sizes and tolerances that would stall a run
    pub fn validate(&self) -> Result<(), ModelingError> {
        let positive = |name: &'static str, value: Float| {
            if value.is_finite() && value > 0. {
                Ok(())
            } else {
                Err(ModelingError::InvalidIntegratorSetting { name, value })
            }
        };
        match *self {
            Integrator::RungeKutta4 { max_step } => positive("max_step", max_step),
            Integrator::DormandPrince {
                rtol,
                atol,
                initial_step,
                min_step,
                max_step,
            } => {
                positive("rtol", rtol)?;
                positive("atol", atol)?;
                positive("initial_step", initial_step)?;
                positive("min_step", min_step)?;
                positive("max_step", max_step)?;
                if min_step > max_step {
                    return Err(ModelingError::StepBounds { min_step, max_step });
                }
                Ok(())
            }
        }
    }
}

/// x + dt * Σ k_i a_i
fn stage_state(
    x: &DVector<Float>,
    dt: Float,
    slopes: &[DVector<Float>],
    a: &[Float],
) -> DVector<Float> {
    let mut y = x.clone();
    for (k, a) in slopes.iter().zip(a.iter()) {
        if *a != 0. {
            y.axpy(dt * a, k, 1.0);
        }
    }
    y
}

/// One classic RK4 step of size dt from (t, x).
pub fn runge_kutta_4<F, E>(
    f: &mut F,
    t: Float,
    x: &DVector<Float>,
    dt: Float,
) -> Result<DVector<Float>, E>
where
    F: FnMut(Float, &DVector<Float>) -> Result<DVector<Float>, E>,
{
    let k1 = f(t, x)?;
    let k2 = f(t + dt / 2.0, &(x + &k1 * (dt / 2.0)))?;
    let k3 = f(t + dt / 2.0, &(x + &k2 * (dt / 2.0)))?;
    let k4 = f(t + dt, &(x + &k3 * dt))?;

    Ok(x + (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (dt / 6.0))
}

/// Result of one Dormand-Prince attempt
#[derive(Debug, Clone)]
pub struct DormandPrinceStep {
    /// Fifth order solution
    pub state: DVector<Float>,

    /// Scaled error norm, accept if <= 1
    pub error: Float,

    /// Suggested factor for the next step size
    pub factor: Float,
}

impl DormandPrinceStep {
    pub fn accepted(&self) -> bool {
        self.error <= 1.0
    }
}

const DP_C: [Float; 7] = [0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0];

#[rustfmt::skip]
const DP_A: [&[Float]; 6] = [
    &[1.0 / 5.0],
    &[3.0 / 40.0, 9.0 / 40.0],
    &[44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0],
    &[19372.0 / 6561.0, -25360.0 / 2187.0, 64448.0 / 6561.0, -212.0 / 729.0],
    &[9017.0 / 3168.0, -355.0 / 33.0, 46732.0 / 5247.0, 49.0 / 176.0, -5103.0 / 18656.0],
    &[35.0 / 384.0, 0.0, 500.0 / 1113.0, 125.0 / 192.0, -2187.0 / 6784.0, 11.0 / 84.0],
];

/// Difference between the fifth and fourth order weights
const DP_E: [Float; 7] = [
    71.0 / 57600.0,
    0.0,
    -71.0 / 16695.0,
    71.0 / 1920.0,
    -17253.0 / 339200.0,
    22.0 / 525.0,
    -1.0 / 40.0,
];

const SAFETY: Float = 0.9;
const MIN_FACTOR: Float = 0.2;
const MAX_FACTOR: Float = 5.0;

/// One Dormand-Prince 5(4) attempt of size dt from (t, x). The caller decides
/// whether to accept it and how to rescale the step.
pub fn dormand_prince<F, E>(
    f: &mut F,
    t: Float,
    x: &DVector<Float>,
    dt: Float,
    rtol: Float,
    atol: Float,
) -> Result<DormandPrinceStep, E>
where
    F: FnMut(Float, &DVector<Float>) -> Result<DVector<Float>, E>,
{
    let mut slopes: Vec<DVector<Float>> = Vec::with_capacity(7);
    slopes.push(f(t, x)?);
    for (stage, a) in DP_A.iter().enumerate() {
        let y = stage_state(x, dt, &slopes, a);
        slopes.push(f(t + DP_C[stage + 1] * dt, &y)?);
    }

    // The last stage is evaluated at the fifth order solution
    let state = stage_state(x, dt, &slopes, DP_A[5]);

    let mut error_slope = DVector::zeros(x.len());
    for (k, e) in slopes.iter().zip(DP_E.iter()) {
        error_slope.axpy(*e, k, 1.0);
    }
    let error = izip!(x.iter(), state.iter(), error_slope.iter())
        .map(|(x0, x1, e)| {
            let scaled = (dt * e).abs() / (atol + rtol * x0.abs().max(x1.abs()));
            // a NaN component must not read as zero error
            if scaled.is_nan() {
                Float::INFINITY
            } else {
                scaled
            }
        })
        .fold(0., Float::max)
        .max(1e-16);
    let factor = if error.is_finite() {
        (SAFETY * error.powf(-1.0 / 5.0)).clamp(MIN_FACTOR, MAX_FACTOR)
    } else {
        MIN_FACTOR
    };

    Ok(DormandPrinceStep {
        state,
        error,
        factor,
    })
}

#[cfg(test)]
mod integrators_tests {
    use na::dvector;

    use super::*;
    use crate::assert_close;

    /// Harmonic oscillator x'' = -x
    fn oscillator(_t: Float, x: &DVector<Float>) -> Result<DVector<Float>, ()> {
        Ok(dvector![x[1], -x[0]])
    }

    #[test]
    fn runge_kutta_4_order() {
        // Arrange
        let x0 = dvector![1.0, 0.];
        let final_time = 1.0;
        let error = |steps: usize| {
            let dt = final_time / steps as Float;
            let mut x = x0.clone();
            for i in 0..steps {
                x = runge_kutta_4(&mut oscillator, i as Float * dt, &x, dt).unwrap();
            }
            (x[0] - Float::cos(final_time)).abs()
        };

        // Act
        let coarse = error(10);
        let fine = error(20);

        // Assert
        // halving the step divides the error by about 2^4
        assert!(coarse / fine > 12.0 && coarse / fine < 20.0);
    }

    #[test]
    fn dormand_prince_single_step() {
        // Arrange
        let x0 = dvector![1.0, 0.];
        let dt = 0.1;

        // Act
        let step = dormand_prince(&mut oscillator, 0., &x0, dt, 1e-6, 1e-9).unwrap();

        // Assert
        assert!(step.accepted());
        assert_close!(step.state[0], Float::cos(dt), 1e-8);
        assert_close!(step.state[1], -Float::sin(dt), 1e-8);
        assert!(step.factor > 1.0 && step.factor <= MAX_FACTOR);
    }

    #[test]
    fn dormand_prince_rejects_large_step() {
        let x0 = dvector![1.0, 0.];

        let step = dormand_prince(&mut oscillator, 0., &x0, 2.0, 1e-10, 1e-12).unwrap();

        assert!(!step.accepted());
        assert!(step.factor < 1.0 && step.factor >= MIN_FACTOR);
    }

    #[test]
    fn dormand_prince_rejects_nan_error() {
        let mut nan = |_t: Float, _x: &DVector<Float>| -> Result<DVector<Float>, ()> {
            Ok(dvector![Float::NAN, 0.])
        };

        let step = dormand_prince(&mut nan, 0., &dvector![1.0, 0.], 0.1, 1e-6, 1e-9).unwrap();

        assert!(!step.accepted());
        assert_eq!(step.error, Float::INFINITY);
        assert_eq!(step.factor, MIN_FACTOR);
    }

    #[test]
    fn validate_settings() {
        // Arrange
        let adaptive = |field: &str, value: Float| {
            let mut settings = [1e-8, 1e-10, 1e-3, 1e-12, 0.1];
            let index = ["rtol", "atol", "initial_step", "min_step", "max_step"]
                .iter()
                .position(|name| *name == field)
                .unwrap();
            settings[index] = value;
            Integrator::DormandPrince {
                rtol: settings[0],
                atol: settings[1],
                initial_step: settings[2],
                min_step: settings[3],
                max_step: settings[4],
            }
        };

        // Act / Assert
        assert_eq!(Integrator::default().validate(), Ok(()));
        assert_eq!(Integrator::RungeKutta4 { max_step: 1e-3 }.validate(), Ok(()));
        for value in [0., -1e-3, Float::NAN, Float::INFINITY] {
            match (Integrator::RungeKutta4 { max_step: value }).validate() {
                Err(ModelingError::InvalidIntegratorSetting { name, .. }) => {
                    assert_eq!(name, "max_step")
                }
                other => panic!("max_step = {} accepted: {:?}", value, other),
            }
            for field in ["rtol", "atol", "initial_step", "min_step", "max_step"] {
                match adaptive(field, value).validate() {
                    Err(ModelingError::InvalidIntegratorSetting { name, .. }) => {
                        assert_eq!(name, field)
                    }
                    other => panic!("{} = {} accepted: {:?}", field, value, other),
                }
            }
        }
        assert_eq!(
            adaptive("min_step", 1.0).validate(),
            Err(ModelingError::StepBounds {
                min_step: 1.0,
                max_step: 0.1
            })
        );
    }

    #[test]
    fn propagate_derivative_errors() {
        let mut failing = |t: Float, _x: &DVector<Float>| -> Result<DVector<Float>, Float> {
            if t > 0.05 {
                Err(t)
            } else {
                Ok(dvector![1.0])
            }
        };

        let result = dormand_prince(&mut failing, 0., &dvector![0.], 0.1, 1e-6, 1e-9);

        // stages past t = 0.05 fail
        assert!(result.is_err());
        assert!(runge_kutta_4(&mut failing, 0., &dvector![0.], 0.1).is_err());
    }
}
