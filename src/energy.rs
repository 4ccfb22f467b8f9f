use na::DVector;

use crate::{
    constants::Constants,
    linkage::{Body, Force, Linkage},
    types::Float,
};

/// Σ ½ m |v_G|² + ½ I ω² over all bodies, for a state x = [q; u]
pub fn kinetic_energy(linkage: &Linkage, x: &DVector<Float>, c: &Constants) -> Float {
    let n = linkage.num_coordinates();
    let q = x.rows(0, n).into_owned();
    let u = x.rows(n, n).into_owned();

    let mut KE = 0.;
    for body in linkage.bodies() {
        match body {
            Body::Rigid(b) => {
                let v = linkage.velocity(b.mass_center, &q, &u, c);
                let omega = u[linkage.frames()[b.frame].coordinate];
                KE += 0.5 * c[b.mass] * v.norm_squared() + 0.5 * c[b.inertia] * omega * omega;
            }
            Body::Particle(p) => {
                let v = linkage.velocity(p.point, &q, &u, c);
                KE += 0.5 * c[p.mass] * v.norm_squared();
            }
        }
    }
    KE
}

/// Gravitational potential energy of the gravity loads, with zero height at
/// the origin. Other loads have no potential.
pub fn potential_energy(linkage: &Linkage, x: &DVector<Float>, c: &Constants) -> Float {
    let q = x.rows(0, linkage.num_coordinates()).into_owned();
    linkage
        .loads()
        .iter()
        .filter_map(|load| match load.force {
            Force::Gravity { mass, gravity } => {
                Some(c[mass] * c[gravity] * linkage.position(load.point, &q, c).y)
            }
            Force::Constant(_) => None,
        })
        .sum()
}

pub fn total_energy(linkage: &Linkage, x: &DVector<Float>, c: &Constants) -> Float {
    kinetic_energy(linkage, x, c) + potential_energy(linkage, x, c)
}
