use std::collections::HashSet;

use na::{DMatrix, DVector, Matrix2xX, Vector2};
use tracing::debug;

use crate::{
    constants::Constants,
    error::ModelingError,
    kinematics::{Axis, Direction, Frame, Length, Point, PointKinematics, Segment},
    types::Float,
};

/// Rigid body moving in the plane. `inertia` is the central moment of inertia
/// about the z axis.
#[derive(Clone, Debug, PartialEq)]
pub struct RigidBody {
    pub name: String,
    pub mass_center: usize,
    pub frame: usize,
    pub mass: usize,
    pub inertia: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Particle {
    pub name: String,
    pub point: usize,
    pub mass: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Body {
    Rigid(RigidBody),
    Particle(Particle),
}

impl Body {
    pub fn name(&self) -> &str {
        match self {
            Body::Rigid(body) => &body.name,
            Body::Particle(particle) => &particle.name,
        }
    }
}

/// Force applied at a point
#[derive(Clone, Debug, PartialEq)]
pub enum Force {
    /// -g m N.y, with m and g given by parameter indices
    Gravity { mass: usize, gravity: usize },
    Constant(Vector2<Float>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Load {
    pub point: usize,
    pub force: Force,
}

impl Load {
    pub fn evaluate(&self, c: &Constants) -> Vector2<Float> {
        match &self.force {
            Force::Gravity { mass, gravity } => Vector2::new(0., -c[*gravity] * c[*mass]),
            Force::Constant(force) => *force,
        }
    }
}

/// Closed kinematic loop: points `a` and `b` must coincide. Gives two scalar
/// configuration constraints, (a - b)·N.x = 0 and (a - b)·N.y = 0.
#[derive(Clone, Debug, PartialEq)]
pub struct Loop {
    pub name: String,
    pub a: usize,
    pub b: usize,
}

/// A validated planar mechanism: coordinates, frames, points, bodies, loads
/// and loop-closure constraints.
#[derive(Clone, Debug)]
pub struct Linkage {
    coordinates: Vec<String>,
    parameters: Vec<String>,
    frames: Vec<Frame>,
    points: Vec<Point>,
    bodies: Vec<Body>,
    loads: Vec<Load>,
    loops: Vec<Loop>,
}

impl Linkage {
    pub fn coordinate_names(&self) -> &[String] {
        &self.coordinates
    }

    pub fn parameter_names(&self) -> &[String] {
        &self.parameters
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn bodies(&self) -> &[Body] {
        &self.bodies
    }

    pub fn loads(&self) -> &[Load] {
        &self.loads
    }

    pub fn loops(&self) -> &[Loop] {
        &self.loops
    }

    pub fn num_coordinates(&self) -> usize {
        self.coordinates.len()
    }

    pub fn num_constraints(&self) -> usize {
        2 * self.loops.len()
    }

    pub fn coordinate_index(&self, name: &str) -> Option<usize> {
        self.coordinates.iter().position(|n| n == name)
    }

    pub fn point_index(&self, name: &str) -> Option<usize> {
        self.points.iter().position(|p| p.name == name)
    }

    pub fn kinematics(&self) -> PointKinematics<'_> {
        PointKinematics {
            frames: &self.frames,
            points: &self.points,
        }
    }

    /// Constants must carry exactly the model parameters, in order
    pub fn check_constants(&self, c: &Constants) -> Result<(), ModelingError> {
        if c.names() != self.parameters.as_slice() {
            return Err(ModelingError::ConstantsMismatch {
                expected: self.parameters.clone(),
                actual: c.names().to_vec(),
            });
        }
        Ok(())
    }

    pub fn position(&self, point: usize, q: &DVector<Float>, c: &Constants) -> Vector2<Float> {
        self.kinematics().position(point, q, c)
    }

    pub fn velocity(
        &self,
        point: usize,
        q: &DVector<Float>,
        u: &DVector<Float>,
        c: &Constants,
    ) -> Vector2<Float> {
        self.kinematics().velocity(point, q, u, c)
    }

    pub fn point_jacobian(
        &self,
        point: usize,
        q: &DVector<Float>,
        c: &Constants,
    ) -> Matrix2xX<Float> {
        self.kinematics().jacobian(point, q, c)
    }

    pub fn convective_acceleration(
        &self,
        point: usize,
        q: &DVector<Float>,
        u: &DVector<Float>,
        c: &Constants,
    ) -> Vector2<Float> {
        self.kinematics().convective_acceleration(point, q, u, c)
    }

    /// Angle of a frame's x axis with the inertial x axis
    pub fn frame_angle(&self, frame: usize, q: &DVector<Float>) -> Float {
        let frame = &self.frames[frame];
        q[frame.coordinate] + frame.offset
    }

    /// Loop-closure residuals Φ(q), two per loop
    pub fn configuration_constraints(&self, q: &DVector<Float>, c: &Constants) -> DVector<Float> {
        let kinematics = self.kinematics();
        let mut phi = DVector::zeros(self.num_constraints());
        for (i, l) in self.loops.iter().enumerate() {
            let gap = kinematics.position(l.a, q, c) - kinematics.position(l.b, q, c);
            phi.fixed_rows_mut::<2>(2 * i).copy_from(&gap);
        }
        phi
    }

    /// ∂Φ/∂q. Since the velocity constraints are dΦ/dt with qdot = u, this is
    /// also their coefficient matrix.
    pub fn constraint_jacobian(&self, q: &DVector<Float>, c: &Constants) -> DMatrix<Float> {
        let kinematics = self.kinematics();
        let mut jacobian = DMatrix::zeros(self.num_constraints(), self.num_coordinates());
        for (i, l) in self.loops.iter().enumerate() {
            let rows = kinematics.jacobian(l.a, q, c) - kinematics.jacobian(l.b, q, c);
            jacobian.rows_mut(2 * i, 2).copy_from(&rows);
        }
        jacobian
    }

    pub fn velocity_constraints(
        &self,
        q: &DVector<Float>,
        u: &DVector<Float>,
        c: &Constants,
    ) -> DVector<Float> {
        self.constraint_jacobian(q, c) * u
    }

    /// Φdot_q u, the part of d²Φ/dt² that does not depend on udot
    pub fn constraint_bias(
        &self,
        q: &DVector<Float>,
        u: &DVector<Float>,
        c: &Constants,
    ) -> DVector<Float> {
        let kinematics = self.kinematics();
        let mut bias = DVector::zeros(self.num_constraints());
        for (i, l) in self.loops.iter().enumerate() {
            let gap = kinematics.convective_acceleration(l.a, q, u, c)
                - kinematics.convective_acceleration(l.b, q, u, c);
            bias.fixed_rows_mut::<2>(2 * i).copy_from(&gap);
        }
        bias
    }
}

/// Length of a segment, by parameter or coordinate name
#[derive(Clone, Debug, PartialEq)]
pub enum LengthSpec {
    Constant(Vec<(Float, String)>),
    Coordinate(String),
}

impl LengthSpec {
    pub fn param(name: &str) -> Self {
        LengthSpec::scaled(1.0, name)
    }

    pub fn scaled(factor: Float, name: &str) -> Self {
        LengthSpec::Constant(vec![(factor, name.to_string())])
    }

    pub fn sum(terms: &[(Float, &str)]) -> Self {
        LengthSpec::Constant(terms.iter().map(|(k, n)| (*k, n.to_string())).collect())
    }

    pub fn coordinate(name: &str) -> Self {
        LengthSpec::Coordinate(name.to_string())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum DirectionSpec {
    Fixed(Float),
    Frame(String, Axis),
}

#[derive(Clone, Debug, PartialEq)]
pub struct SegmentSpec {
    pub length: LengthSpec,
    pub direction: DirectionSpec,
}

impl SegmentSpec {
    /// `length` along an axis of a named frame
    pub fn along(frame: &str, axis: Axis, length: LengthSpec) -> Self {
        SegmentSpec {
            length,
            direction: DirectionSpec::Frame(frame.to_string(), axis),
        }
    }

    /// `length` along an axis of the inertial frame N
    pub fn inertial(axis: Axis, length: LengthSpec) -> Self {
        SegmentSpec {
            length,
            direction: DirectionSpec::Fixed(axis.phase()),
        }
    }
}

struct FrameSpec {
    name: String,
    coordinate: String,
    offset: Float,
}

struct PointSpec {
    name: String,
    parent: Option<String>,
    segments: Vec<SegmentSpec>,
}

enum BodySpec {
    Rigid {
        name: String,
        mass_center: String,
        frame: String,
        mass: String,
        inertia: String,
    },
    Particle {
        name: String,
        point: String,
        mass: String,
    },
}

enum ForceSpec {
    Gravity { mass: String, gravity: String },
    Constant(Vector2<Float>),
}

struct LoadSpec {
    point: String,
    force: ForceSpec,
}

struct LoopSpec {
    name: String,
    a: String,
    b: String,
}

/// Declares a planar mechanism by name. Nothing is checked until `build`,
/// which resolves names and rejects structurally invalid topologies.
pub struct LinkageBuilder {
    coordinates: Vec<String>,
    parameters: Vec<String>,
    frames: Vec<FrameSpec>,
    points: Vec<PointSpec>,
    bodies: Vec<BodySpec>,
    loads: Vec<LoadSpec>,
    loops: Vec<LoopSpec>,
}

impl LinkageBuilder {
    pub fn new(coordinates: &[&str], parameters: &[&str]) -> Self {
        LinkageBuilder {
            coordinates: coordinates.iter().map(|s| s.to_string()).collect(),
            parameters: parameters.iter().map(|s| s.to_string()).collect(),
            frames: vec![],
            points: vec![],
            bodies: vec![],
            loads: vec![],
            loops: vec![],
        }
    }

    /// Frame whose x axis is at angle `coordinate + offset` from N.x
    pub fn frame(&mut self, name: &str, coordinate: &str, offset: Float) -> &mut Self {
        self.frames.push(FrameSpec {
            name: name.to_string(),
            coordinate: coordinate.to_string(),
            offset,
        });
        self
    }

    /// Point located from `parent` (the origin if None). The parent must be
    /// declared first.
    pub fn point(
        &mut self,
        name: &str,
        parent: Option<&str>,
        segments: Vec<SegmentSpec>,
    ) -> &mut Self {
        self.points.push(PointSpec {
            name: name.to_string(),
            parent: parent.map(|p| p.to_string()),
            segments,
        });
        self
    }

    pub fn rigid_body(
        &mut self,
        name: &str,
        mass_center: &str,
        frame: &str,
        mass: &str,
        inertia: &str,
    ) -> &mut Self {
        self.bodies.push(BodySpec::Rigid {
            name: name.to_string(),
            mass_center: mass_center.to_string(),
            frame: frame.to_string(),
            mass: mass.to_string(),
            inertia: inertia.to_string(),
        });
        self
    }

    pub fn particle(&mut self, name: &str, point: &str, mass: &str) -> &mut Self {
        self.bodies.push(BodySpec::Particle {
            name: name.to_string(),
            point: point.to_string(),
            mass: mass.to_string(),
        });
        self
    }

    /// Weight -g m N.y acting at `point`
    pub fn gravity(&mut self, point: &str, mass: &str, gravity: &str) -> &mut Self {
        self.loads.push(LoadSpec {
            point: point.to_string(),
            force: ForceSpec::Gravity {
                mass: mass.to_string(),
                gravity: gravity.to_string(),
            },
        });
        self
    }

    pub fn force(&mut self, point: &str, force: Vector2<Float>) -> &mut Self {
        self.loads.push(LoadSpec {
            point: point.to_string(),
            force: ForceSpec::Constant(force),
        });
        self
    }

    pub fn close_loop(&mut self, name: &str, a: &str, b: &str) -> &mut Self {
        self.loops.push(LoopSpec {
            name: name.to_string(),
            a: a.to_string(),
            b: b.to_string(),
        });
        self
    }

    pub fn build(&self) -> Result<Linkage, ModelingError> {
        check_unique(self.coordinates.iter())?;
        check_unique(self.parameters.iter())?;
        check_unique(self.frames.iter().map(|f| &f.name))?;
        check_unique(self.points.iter().map(|p| &p.name))?;
        check_unique(self.bodies.iter().map(|b| match b {
            BodySpec::Rigid { name, .. } | BodySpec::Particle { name, .. } => name,
        }))?;
        check_unique(self.loops.iter().map(|l| &l.name))?;

        let coordinate = |name: &str| {
            self.coordinates
                .iter()
                .position(|n| n == name)
                .ok_or_else(|| ModelingError::UnknownCoordinate(name.to_string()))
        };
        let parameter = |name: &str| {
            self.parameters
                .iter()
                .position(|n| n == name)
                .ok_or_else(|| ModelingError::UnknownParameter(name.to_string()))
        };
        let frame = |name: &str| {
            self.frames
                .iter()
                .position(|f| f.name == name)
                .ok_or_else(|| ModelingError::UnknownFrame(name.to_string()))
        };
        let point = |name: &str| {
            self.points
                .iter()
                .position(|p| p.name == name)
                .ok_or_else(|| ModelingError::UnknownPoint(name.to_string()))
        };

        let frames = self
            .frames
            .iter()
            .map(|f| -> Result<Frame, ModelingError> {
                Ok(Frame {
                    name: f.name.clone(),
                    coordinate: coordinate(&f.coordinate)?,
                    offset: f.offset,
                })
            })
            .collect::<Result<Vec<_>, ModelingError>>()?;

        let mut points: Vec<Point> = vec![];
        for spec in self.points.iter() {
            // Parents must already be declared, which keeps the points a tree
            let parent = match &spec.parent {
                Some(name) => Some(
                    points
                        .iter()
                        .position(|p| &p.name == name)
                        .ok_or_else(|| ModelingError::UnknownPoint(name.clone()))?,
                ),
                None => None,
            };
            let segments = spec
                .segments
                .iter()
                .map(|s| -> Result<Segment, ModelingError> {
                    let length = match &s.length {
                        LengthSpec::Constant(terms) => Length::Constant(
                            terms
                                .iter()
                                .map(|(k, name)| -> Result<(Float, usize), ModelingError> {
                                    Ok((*k, parameter(name)?))
                                })
                                .collect::<Result<Vec<_>, ModelingError>>()?,
                        ),
                        LengthSpec::Coordinate(name) => Length::Coordinate(coordinate(name)?),
                    };
                    let direction = match &s.direction {
                        DirectionSpec::Fixed(angle) => Direction::Fixed(*angle),
                        DirectionSpec::Frame(name, axis) => Direction::Frame {
                            frame: frame(name)?,
                            axis: *axis,
                        },
                    };
                    Ok(Segment { length, direction })
                })
                .collect::<Result<Vec<_>, ModelingError>>()?;
            points.push(Point {
                name: spec.name.clone(),
                parent,
                segments,
            });
        }

        let bodies = self
            .bodies
            .iter()
            .map(|b| -> Result<Body, ModelingError> {
                match b {
                BodySpec::Rigid {
                    name,
                    mass_center,
                    frame: body_frame,
                    mass,
                    inertia,
                } => Ok(Body::Rigid(RigidBody {
                    name: name.clone(),
                    mass_center: point(mass_center)?,
                    frame: frame(body_frame)?,
                    mass: parameter(mass)?,
                    inertia: parameter(inertia)?,
                })),
                BodySpec::Particle {
                    name,
                    point: p,
                    mass,
                } => Ok(Body::Particle(Particle {
                    name: name.clone(),
                    point: point(p)?,
                    mass: parameter(mass)?,
                })),
                }
            })
            .collect::<Result<Vec<_>, ModelingError>>()?;

        let loads = self
            .loads
            .iter()
            .map(|l| -> Result<Load, ModelingError> {
                let force = match &l.force {
                    ForceSpec::Gravity { mass, gravity } => Force::Gravity {
                        mass: parameter(mass)?,
                        gravity: parameter(gravity)?,
                    },
                    ForceSpec::Constant(force) => Force::Constant(*force),
                };
                Ok(Load {
                    point: point(&l.point)?,
                    force,
                })
            })
            .collect::<Result<Vec<_>, ModelingError>>()?;

        let loops = self
            .loops
            .iter()
            .map(|l| -> Result<Loop, ModelingError> {
                Ok(Loop {
                    name: l.name.clone(),
                    a: point(&l.a)?,
                    b: point(&l.b)?,
                })
            })
            .collect::<Result<Vec<_>, ModelingError>>()?;

        let linkage = Linkage {
            coordinates: self.coordinates.clone(),
            parameters: self.parameters.clone(),
            frames,
            points,
            bodies,
            loads,
            loops,
        };
        linkage.check_topology()?;

        debug!(
            coordinates = linkage.num_coordinates(),
            constraints = linkage.num_constraints(),
            bodies = linkage.bodies.len(),
            "built linkage"
        );
        Ok(linkage)
    }
}

impl Linkage {
    fn check_topology(&self) -> Result<(), ModelingError> {
        let kinematics = self.kinematics();

        // Every coordinate has to move something
        let mut used: HashSet<usize> = self
            .points
            .iter()
            .flat_map(|p| p.segments.iter())
            .flat_map(|s| s.coordinates(&self.frames))
            .collect();
        used.extend(self.bodies.iter().filter_map(|b| match b {
            Body::Rigid(body) => Some(self.frames[body.frame].coordinate),
            Body::Particle(_) => None,
        }));
        if let Some(unused) = (0..self.num_coordinates()).find(|i| !used.contains(i)) {
            return Err(ModelingError::UnusedCoordinate(
                self.coordinates[unused].clone(),
            ));
        }

        if self.loops.is_empty() {
            return Err(ModelingError::NoLoops);
        }
        for l in self.loops.iter() {
            if kinematics.relative_coordinates(l.a, l.b).is_empty() {
                return Err(ModelingError::DegenerateLoop(l.name.clone()));
            }
        }

        if self.num_constraints() >= self.num_coordinates() {
            return Err(ModelingError::DegreesOfFreedom {
                coordinates: self.num_coordinates(),
                constraints: self.num_constraints(),
            });
        }

        Ok(())
    }
}

fn check_unique<'a>(names: impl Iterator<Item = &'a String>) -> Result<(), ModelingError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ModelingError::DuplicateName(name.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod linkage_tests {
    use na::dvector;

    use super::*;
    use crate::{assert_vec_close, PI};

    /// Pendulum of length l hanging from the origin on frame A, with its tip
    /// shadowed by Cartesian slider coordinates x and y.
    fn shadowed_pendulum() -> LinkageBuilder {
        let mut builder = LinkageBuilder::new(&["theta", "x", "y"], &["l", "m", "I", "g"]);
        builder
            .frame("A", "theta", 0.)
            .point("O", None, vec![])
            .point(
                "P",
                Some("O"),
                vec![SegmentSpec::along("A", Axis::X, LengthSpec::param("l"))],
            )
            .point(
                "S",
                Some("O"),
                vec![
                    SegmentSpec::inertial(Axis::X, LengthSpec::coordinate("x")),
                    SegmentSpec::inertial(Axis::Y, LengthSpec::coordinate("y")),
                ],
            )
            .rigid_body("rod", "P", "A", "m", "I")
            .gravity("P", "m", "g")
            .close_loop("tip", "P", "S");
        builder
    }

    #[test]
    fn build_and_evaluate_constraints() {
        // Arrange
        let linkage = shadowed_pendulum().build().unwrap();
        let c = Constants::new(&[("l", 2.0), ("m", 1.0), ("I", 0.), ("g", 9.81)]);
        let theta: Float = PI / 6.0;
        let q = dvector![theta, 2.0 * theta.cos(), 2.0 * theta.sin()];
        let u = dvector![1.5, -3.0 * theta.sin(), 3.0 * theta.cos()];

        // Act
        let phi = linkage.configuration_constraints(&q, &c);
        let jacobian = linkage.constraint_jacobian(&q, &c);
        let velocity = linkage.velocity_constraints(&q, &u, &c);

        // Assert
        assert_eq!(linkage.num_constraints(), 2);
        assert_vec_close!(phi, DVector::<Float>::zeros(2), 1e-12);
        assert_vec_close!(velocity, DVector::<Float>::zeros(2), 1e-12);
        assert_vec_close!(jacobian.column(1), dvector![-1.0, 0.], 1e-12);
        assert_vec_close!(jacobian.column(2), dvector![0., -1.0], 1e-12);
    }

    #[test]
    fn constraint_bias_is_centripetal() {
        let linkage = shadowed_pendulum().build().unwrap();
        let c = Constants::new(&[("l", 2.0), ("m", 1.0), ("I", 0.), ("g", 9.81)]);
        let q = dvector![0., 2.0, 0.];
        let u = dvector![3.0, 0., 6.0];

        let bias = linkage.constraint_bias(&q, &u, &c);

        // -l θdot² along the rod, sliders have no convective term
        assert_vec_close!(bias, dvector![-18.0, 0.], 1e-12);
    }

    #[test]
    fn reject_unknown_names() {
        let mut builder = shadowed_pendulum();
        builder.gravity("Z", "m", "g");
        assert_eq!(
            builder.build().unwrap_err(),
            ModelingError::UnknownPoint("Z".to_string())
        );

        let mut builder = shadowed_pendulum();
        builder.particle("blob", "P", "mass");
        assert_eq!(
            builder.build().unwrap_err(),
            ModelingError::UnknownParameter("mass".to_string())
        );
    }

    #[test]
    fn reject_parent_declared_later() {
        let mut builder = LinkageBuilder::new(&["a"], &["l"]);
        builder
            .frame("A", "a", 0.)
            .point(
                "P",
                Some("Q"),
                vec![SegmentSpec::along("A", Axis::X, LengthSpec::param("l"))],
            )
            .point("Q", None, vec![]);

        assert_eq!(
            builder.build().unwrap_err(),
            ModelingError::UnknownPoint("Q".to_string())
        );
    }

    #[test]
    fn reject_unclosed_topologies() {
        let mut open = LinkageBuilder::new(&["theta"], &["l", "m", "I", "g"]);
        open.frame("A", "theta", 0.)
            .point("O", None, vec![])
            .point(
                "P",
                Some("O"),
                vec![SegmentSpec::along("A", Axis::X, LengthSpec::param("l"))],
            );
        assert_eq!(open.build().unwrap_err(), ModelingError::NoLoops);

        let mut degenerate = shadowed_pendulum();
        degenerate.close_loop("self", "P", "P");
        assert_eq!(
            degenerate.build().unwrap_err(),
            ModelingError::DegenerateLoop("self".to_string())
        );
    }

    #[test]
    fn reject_inconsistent_degrees_of_freedom() {
        let mut overconstrained = shadowed_pendulum();
        overconstrained.close_loop("again", "S", "P");

        assert_eq!(
            overconstrained.build().unwrap_err(),
            ModelingError::DegreesOfFreedom {
                coordinates: 3,
                constraints: 4
            }
        );
    }

    #[test]
    fn reject_unused_coordinate() {
        let mut builder = LinkageBuilder::new(&["theta", "x", "y", "z"], &["l", "m", "I", "g"]);
        builder
            .frame("A", "theta", 0.)
            .point("O", None, vec![])
            .point(
                "P",
                Some("O"),
                vec![SegmentSpec::along("A", Axis::X, LengthSpec::param("l"))],
            )
            .point(
                "S",
                Some("O"),
                vec![
                    SegmentSpec::inertial(Axis::X, LengthSpec::coordinate("x")),
                    SegmentSpec::inertial(Axis::Y, LengthSpec::coordinate("y")),
                ],
            )
            .close_loop("tip", "P", "S");

        assert_eq!(
            builder.build().unwrap_err(),
            ModelingError::UnusedCoordinate("z".to_string())
        );
    }

    #[test]
    fn reject_duplicate_names() {
        let mut builder = shadowed_pendulum();
        builder.point("P", None, vec![]);

        assert_eq!(
            builder.build().unwrap_err(),
            ModelingError::DuplicateName("P".to_string())
        );
    }
}
