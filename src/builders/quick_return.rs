use na::{dvector, DVector, Vector2};

use crate::{
    constants::Constants,
    equations::KaneEquations,
    error::ModelingError,
    kinematics::Axis,
    linkage::{LengthSpec, Linkage, LinkageBuilder, SegmentSpec},
    partition::Partition,
    rhs::NewtonConfig,
    types::Float,
    util::linspace,
    PI,
};

pub const COORDINATES: [&str; 6] = ["q1", "q2", "q3", "q4", "q5", "q6"];

pub const PARAMETERS: [&str; 10] = ["r1", "r2", "L", "d1", "d2", "m", "I1", "I2", "I3", "g"];

/// Quick-return mechanism with an extra pendulum hanging from the output
/// slider.
///
/// The crank OP (length r1, angle q1) turns about O and drives slider 1
/// along the slotted arm MQ (length L, angle q2) pivoted at M = (0, -d1).
/// The connecting rod QR (length r2, angle q3 from N.x) links the tip Q of
/// the arm to slider 2, which runs horizontally (position q5) at height d2.
/// q4 is the distance of slider 1 from M along the arm. The pendulum (length
/// r1, angle q6) hangs from slider 2.
pub fn build_quick_return() -> Result<Linkage, ModelingError> {
    let mut builder = LinkageBuilder::new(&COORDINATES, &PARAMETERS);
    builder
        .frame("OP", "q1", 0.)
        .frame("MQ", "q2", 0.)
        .frame("QR", "q3", -PI / 2.0)
        .frame("ADD", "q6", 0.);

    builder
        .point("O", None, vec![])
        .point(
            "P1",
            Some("O"),
            vec![SegmentSpec::along("OP", Axis::Y, LengthSpec::param("r1"))],
        )
        .point(
            "G1",
            Some("O"),
            vec![SegmentSpec::along("OP", Axis::Y, LengthSpec::scaled(0.5, "r1"))],
        )
        .point(
            "M",
            Some("O"),
            vec![SegmentSpec::inertial(Axis::Y, LengthSpec::scaled(-1.0, "d1"))],
        )
        .point(
            "P2",
            Some("M"),
            vec![SegmentSpec::along("MQ", Axis::Y, LengthSpec::coordinate("q4"))],
        )
        .point(
            "Q",
            Some("M"),
            vec![SegmentSpec::along("MQ", Axis::Y, LengthSpec::param("L"))],
        )
        .point(
            "G2",
            Some("M"),
            vec![SegmentSpec::along("MQ", Axis::Y, LengthSpec::scaled(0.5, "L"))],
        )
        .point(
            "G3",
            Some("Q"),
            vec![SegmentSpec::along("QR", Axis::Y, LengthSpec::scaled(0.5, "r2"))],
        )
        .point(
            "R1",
            Some("Q"),
            vec![SegmentSpec::along("QR", Axis::Y, LengthSpec::param("r2"))],
        )
        .point(
            "R2",
            Some("M"),
            vec![
                SegmentSpec::inertial(Axis::Y, LengthSpec::sum(&[(1.0, "d1"), (1.0, "d2")])),
                SegmentSpec::inertial(Axis::X, LengthSpec::coordinate("q5")),
            ],
        )
        .point(
            "F",
            Some("R1"),
            vec![SegmentSpec::along("ADD", Axis::Y, LengthSpec::param("r1"))],
        )
        .point(
            "G4",
            Some("R1"),
            vec![SegmentSpec::along("ADD", Axis::Y, LengthSpec::scaled(0.5, "r1"))],
        );

    builder
        .rigid_body("crank", "G1", "OP", "m", "I1")
        .rigid_body("slotted arm", "G2", "MQ", "m", "I2")
        .rigid_body("connecting rod", "G3", "QR", "m", "I3")
        .particle("slider 1", "P1", "m")
        .particle("slider 2", "R1", "m")
        .rigid_body("additional body", "G4", "ADD", "m", "I3");

    // Slider contact points carry no actuation
    builder
        .gravity("G1", "m", "g")
        .gravity("G2", "m", "g")
        .gravity("G3", "m", "g")
        .force("P2", Vector2::zeros())
        .force("R2", Vector2::zeros());

    builder
        .close_loop("slot", "P1", "P2")
        .close_loop("guide", "R2", "R1");

    builder.build()
}

pub fn quick_return_constants() -> Constants {
    Constants::new(&[
        ("r1", 5.0),
        ("r2", 5.0),
        ("L", 15.0),
        ("d1", 8.0),
        ("d2", 8.0),
        ("m", 12.0),
        ("I1", 6.25),
        ("I2", 56.25),
        ("I3", 6.25),
        ("g", 9.81),
    ])
}

/// Initial state [q; u]. Consistent with the constraints to a few parts in
/// ten thousand only.
pub fn quick_return_initial_state() -> DVector<Float> {
    dvector![
        48.169_f64.to_radians(),
        18.195_f64.to_radians(),
        20.487_f64.to_radians(),
        11.931,
        0.,
        0.,
        10.,
        3.63,
        3.63,
        -24.987,
        -58.08,
        0.
    ]
}

/// 2000 samples over two seconds
pub fn quick_return_sample_times() -> Vec<Float> {
    linspace(0., 2., 2000)
}

/// Equations of motion with the given independent coordinates, partitioned
/// at the reference initial state.
pub fn quick_return_equations(independent: &[&str]) -> Result<KaneEquations, ModelingError> {
    let linkage = build_quick_return()?;
    let c = quick_return_constants();
    let q0 = quick_return_initial_state().rows(0, COORDINATES.len()).into_owned();
    let partition = Partition::new(
        &linkage,
        independent,
        &q0,
        &c,
        NewtonConfig::default().min_rcond,
    )?;
    Ok(KaneEquations::new(linkage, partition))
}

/// Resting state with the connecting rod vertical (q3 = 90°), where slider 2
/// momentarily cannot be driven horizontally. None if the crank is too short
/// to reach it.
pub fn quick_return_dead_center(c: &Constants) -> Option<DVector<Float>> {
    let (r1, r2, L, d1, d2) = (
        c.get("r1")?,
        c.get("r2")?,
        c.get("L")?,
        c.get("d1")?,
        c.get("d2")?,
    );

    // Q sits r2 below the guide
    let cos_q2 = (d1 + d2 - r2) / L;
    if !(cos_q2.abs() <= 1.0) {
        return None;
    }
    let q2 = cos_q2.acos();
    let q5 = -L * q2.sin();

    // Slider 1 on the arm at distance r1 from O
    let discriminant = d1 * d1 * cos_q2 * cos_q2 - d1 * d1 + r1 * r1;
    if discriminant < 0. {
        return None;
    }
    let q4 = d1 * cos_q2 + discriminant.sqrt();
    let p1 = Vector2::new(-q4 * q2.sin(), -d1 + q4 * cos_q2);
    let q1 = Float::atan2(-p1.x, p1.y);

    let mut x = DVector::zeros(2 * COORDINATES.len());
    x.rows_mut(0, 6)
        .copy_from(&dvector![q1, q2, PI / 2.0, q4, q5, 0.]);
    Some(x)
}
