use quick_return::{
    builders::quick_return::{
        quick_return_constants, quick_return_equations, quick_return_initial_state,
        quick_return_sample_times,
    },
    energy::total_energy,
    na::DVector,
    types::Float,
    util::max_abs,
    ConstrainedSystem, Constants, Simulation, SimulationConfig,
};

fn constraint_residual<S: ConstrainedSystem>(system: &S, x: &DVector<Float>, c: &Constants) -> Float {
    let n = system.num_coordinates();
    let q = x.rows(0, n).into_owned();
    let u = x.rows(n, n).into_owned();
    max_abs(
        system
            .configuration_constraints(&q, c)
            .iter()
            .chain(system.velocity_constraints(&q, &u, c).iter())
            .cloned(),
    )
}

#[test]
fn reference_run() {
    // Arrange
    let equations = quick_return_equations(&["q1", "q6"]).unwrap();
    let linkage = equations.linkage().clone();
    let c = quick_return_constants();
    let x0 = quick_return_initial_state();
    let times = quick_return_sample_times();
    let simulation = Simulation::new(
        equations,
        c.clone(),
        x0.clone(),
        times.clone(),
        SimulationConfig::default(),
    )
    .unwrap();

    // Act
    let trajectory = simulation.run().unwrap();

    // Assert
    assert_eq!(trajectory.times(), times.as_slice());
    assert_eq!(trajectory.states()[0], x0);
    for x in trajectory.states()[1..].iter() {
        assert!(constraint_residual(simulation.system(), x, &c) < 1e-8);
    }

    let start = total_energy(&linkage, &trajectory.states()[1], &c);
    for x in trajectory.states()[2..].iter() {
        let energy = total_energy(&linkage, x, &c);
        assert!(((energy - start) / start).abs() < 1e-4);
    }
}
