use std::error::Error;

use quick_return::{
    builders::quick_return::{
        quick_return_constants, quick_return_equations, quick_return_initial_state,
        quick_return_sample_times, COORDINATES,
    },
    energy::total_energy,
    plot::plot_series,
    ConstrainedSystem, Simulation, SimulationConfig, TWO_PI,
};

/// Simulate the quick-return mechanism for two seconds with q1 and q6
/// independent, and plot the coordinate histories
pub fn main() -> Result<(), Box<dyn Error>> {
    let equations = quick_return_equations(&["q1", "q6"])?;
    let linkage = equations.linkage().clone();
    let partition = equations.partition().clone();
    let c = quick_return_constants();
    let x0 = quick_return_initial_state();

    let simulation = Simulation::new(
        equations,
        c.clone(),
        x0,
        quick_return_sample_times(),
        SimulationConfig::default(),
    )?;
    let trajectory = simulation.run()?;

    let names = |indices: &[usize]| -> Vec<&str> {
        indices.iter().map(|&i| COORDINATES[i]).collect()
    };
    println!("independent: {:?}", names(partition.independent()));
    println!("dependent:   {:?}", names(partition.dependent()));
    println!("samples:     {}", trajectory.len());

    if let (Some(first), Some(last)) = (trajectory.states().first(), trajectory.states().last()) {
        let start = total_energy(&linkage, first, &c);
        let end = total_energy(&linkage, last, &c);
        println!(
            "energy:      {:.6} -> {:.6} (drift {:e})",
            start,
            end,
            (end - start) / start.abs()
        );
    }
    if let Some((t, x)) = trajectory.last() {
        println!("final state at t = {}:\n{}", t, x);
    }

    let series: Vec<(String, Vec<f64>)> = COORDINATES
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let mut values = trajectory.coordinate(i);
            if i == 0 {
                values.iter_mut().for_each(|q1| *q1 = q1.rem_euclid(TWO_PI));
            }
            (name.to_string(), values)
        })
        .collect();
    plot_series("quick_return.png", "Quick-return mechanism", trajectory.times(), &series)?;

    Ok(())
}
