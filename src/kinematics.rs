use na::{DVector, Matrix2xX, Vector2};

use crate::{constants::Constants, types::Float, PI};

/// Axis of a planar frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

impl Axis {
    /// Angle of the axis measured from the frame's x axis
    pub fn phase(&self) -> Float {
        match self {
            Axis::X => 0.,
            Axis::Y => PI / 2.0,
        }
    }
}

/// Frame rotating about the inertial z axis. Its x axis makes the angle
/// q[coordinate] + offset with the inertial x axis.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub name: String,
    pub coordinate: usize,
    pub offset: Float,
}

/// Length of a segment: either a fixed linear combination of parameters, or
/// a coordinate (a sliding joint).
#[derive(Clone, Debug, PartialEq)]
pub enum Length {
    Constant(Vec<(Float, usize)>),
    Coordinate(usize),
}

/// Direction of a segment: a fixed inertial angle, or an axis of a frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Direction {
    Fixed(Float),
    Frame { frame: usize, axis: Axis },
}

/// A vector `length * e(angle)`, where e(θ) = [cos θ, sin θ]
#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    pub length: Length,
    pub direction: Direction,
}

/// A point located from its parent point (or the origin) by a chain of
/// segments.
#[derive(Clone, Debug, PartialEq)]
pub struct Point {
    pub name: String,
    pub parent: Option<usize>,
    pub segments: Vec<Segment>,
}

/// Numeric values of one segment at a given state
struct SegmentState {
    length: Float,
    length_coordinate: Option<usize>,
    angle: Float,
    angle_coordinate: Option<usize>,
}

impl SegmentState {
    fn e(&self) -> Vector2<Float> {
        Vector2::new(self.angle.cos(), self.angle.sin())
    }

    fn e_perp(&self) -> Vector2<Float> {
        Vector2::new(-self.angle.sin(), self.angle.cos())
    }
}

impl Segment {
    fn evaluate(&self, frames: &[Frame], q: &DVector<Float>, c: &Constants) -> SegmentState {
        let (length, length_coordinate) = match &self.length {
            Length::Constant(terms) => (terms.iter().map(|(k, i)| k * c[*i]).sum(), None),
            Length::Coordinate(i) => (q[*i], Some(*i)),
        };
        let (angle, angle_coordinate) = match &self.direction {
            Direction::Fixed(angle) => (*angle, None),
            Direction::Frame { frame, axis } => {
                let frame = &frames[*frame];
                (
                    q[frame.coordinate] + frame.offset + axis.phase(),
                    Some(frame.coordinate),
                )
            }
        };
        SegmentState {
            length,
            length_coordinate,
            angle,
            angle_coordinate,
        }
    }

    /// Coordinates this segment depends on
    pub fn coordinates(&self, frames: &[Frame]) -> Vec<usize> {
        let mut coordinates = vec![];
        if let Length::Coordinate(i) = self.length {
            coordinates.push(i);
        }
        if let Direction::Frame { frame, .. } = self.direction {
            coordinates.push(frames[frame].coordinate);
        }
        coordinates
    }
}

/// Planar point kinematics over a set of frames and points.
///
/// Every point is a sum of segments ℓ e(θ), so
/// ```text
/// v = ℓdot e + ℓ θdot e⊥
/// a = ℓddot e + ℓ θddot e⊥ + 2 ℓdot θdot e⊥ - ℓ θdot² e
/// ```
/// The last two terms form the convective acceleration, i.e. the part of the
/// acceleration that does not depend on udot.
pub struct PointKinematics<'a> {
    pub frames: &'a [Frame],
    pub points: &'a [Point],
}

impl<'a> PointKinematics<'a> {
    /// Segments from the point back to the origin
    fn chain(&self, point: usize) -> impl Iterator<Item = &'a Segment> + 'a {
        let points = self.points;
        std::iter::successors(Some(point), move |i| points[*i].parent)
            .flat_map(move |i| points[i].segments.iter())
    }

    pub fn position(&self, point: usize, q: &DVector<Float>, c: &Constants) -> Vector2<Float> {
        self.chain(point)
            .map(|s| {
                let s = s.evaluate(self.frames, q, c);
                s.e() * s.length
            })
            .sum()
    }

    /// ∂p/∂q, a 2 x n matrix. Also maps speeds to the point velocity.
    pub fn jacobian(&self, point: usize, q: &DVector<Float>, c: &Constants) -> Matrix2xX<Float> {
        let mut jacobian = Matrix2xX::zeros(q.len());
        for segment in self.chain(point) {
            let s = segment.evaluate(self.frames, q, c);
            if let Some(i) = s.length_coordinate {
                let mut column = jacobian.column_mut(i);
                column += s.e();
            }
            if let Some(i) = s.angle_coordinate {
                let mut column = jacobian.column_mut(i);
                column += s.e_perp() * s.length;
            }
        }
        jacobian
    }

    pub fn velocity(
        &self,
        point: usize,
        q: &DVector<Float>,
        u: &DVector<Float>,
        c: &Constants,
    ) -> Vector2<Float> {
        self.jacobian(point, q, c) * u
    }

    /// Acceleration of the point when all udot are zero, i.e. Jdot * u
    pub fn convective_acceleration(
        &self,
        point: usize,
        q: &DVector<Float>,
        u: &DVector<Float>,
        c: &Constants,
    ) -> Vector2<Float> {
        self.chain(point)
            .map(|segment| {
                let s = segment.evaluate(self.frames, q, c);
                let length_rate = s.length_coordinate.map_or(0., |i| u[i]);
                let angle_rate = s.angle_coordinate.map_or(0., |i| u[i]);
                s.e_perp() * (2.0 * length_rate * angle_rate)
                    - s.e() * (s.length * angle_rate * angle_rate)
            })
            .sum()
    }

    /// Coordinates the position of a point depends on, excluding the segments
    /// it shares with `other` through a common ancestor.
    pub fn relative_coordinates(&self, point: usize, other: usize) -> Vec<usize> {
        let ancestors = |p: usize| -> Vec<usize> {
            std::iter::successors(Some(p), |i| self.points[*i].parent).collect()
        };
        let mine = ancestors(point);
        let theirs = ancestors(other);
        let mut coordinates: Vec<usize> = mine
            .iter()
            .filter(|i| !theirs.contains(*i))
            .chain(theirs.iter().filter(|i| !mine.contains(*i)))
            .flat_map(|i| self.points[*i].segments.iter())
            .flat_map(|s| s.coordinates(self.frames))
            .collect();
        coordinates.sort_unstable();
        coordinates.dedup();
        coordinates
    }
}

#[cfg(test)]
mod kinematics_tests {
    use na::dvector;
    use rand::Rng;

    use super::*;
    use crate::assert_vec_close;

    /// Crank of length r on frame A (angle q0), followed by a slider of
    /// length q1 along the y axis of frame B (angle q2 - π/2).
    fn crank_and_slider() -> (Vec<Frame>, Vec<Point>) {
        let frames = vec![
            Frame {
                name: "A".to_string(),
                coordinate: 0,
                offset: 0.,
            },
            Frame {
                name: "B".to_string(),
                coordinate: 2,
                offset: -PI / 2.0,
            },
        ];
        let points = vec![
            Point {
                name: "O".to_string(),
                parent: None,
                segments: vec![],
            },
            Point {
                name: "A".to_string(),
                parent: Some(0),
                segments: vec![Segment {
                    length: Length::Constant(vec![(1.0, 0)]),
                    direction: Direction::Frame {
                        frame: 0,
                        axis: Axis::X,
                    },
                }],
            },
            Point {
                name: "B".to_string(),
                parent: Some(1),
                segments: vec![
                    Segment {
                        length: Length::Coordinate(1),
                        direction: Direction::Frame {
                            frame: 1,
                            axis: Axis::Y,
                        },
                    },
                    Segment {
                        length: Length::Constant(vec![(-0.5, 0)]),
                        direction: Direction::Fixed(PI / 2.0),
                    },
                ],
            },
        ];
        (frames, points)
    }

    #[test]
    fn position_of_chain() {
        // Arrange
        let (frames, points) = crank_and_slider();
        let kinematics = PointKinematics {
            frames: &frames,
            points: &points,
        };
        let c = Constants::new(&[("r", 2.0)]);
        let q = dvector![PI / 2.0, 3.0, 0.];

        // Act
        let p = kinematics.position(2, &q, &c);

        // Assert
        // crank points up (0, 2); frame B's y axis is the inertial x axis
        assert_vec_close!(p, Vector2::new(3.0, 2.0 - 1.0), 1e-12);
    }

    /// Jacobian and convective acceleration against central differences
    #[test]
    fn derivatives_match_finite_differences() {
        // Arrange
        let (frames, points) = crank_and_slider();
        let kinematics = PointKinematics {
            frames: &frames,
            points: &points,
        };
        let c = Constants::new(&[("r", 1.5)]);
        let mut rng = rand::rng();

        for _ in 0..10 {
            let q = DVector::from_fn(3, |_, _| rng.random_range(-2.0..2.0));
            let u = DVector::from_fn(3, |_, _| rng.random_range(-2.0..2.0));
            let h = 1e-6;

            // Act
            let jacobian = kinematics.jacobian(2, &q, &c);
            let v = kinematics.velocity(2, &q, &u, &c);
            let a = kinematics.convective_acceleration(2, &q, &u, &c);

            // Assert
            let p_plus = kinematics.position(2, &(&q + &u * h), &c);
            let p_minus = kinematics.position(2, &(&q - &u * h), &c);
            assert_vec_close!(v, (p_plus - p_minus) / (2.0 * h), 1e-6);

            let v_plus = kinematics.velocity(2, &(&q + &u * h), &u, &c);
            let v_minus = kinematics.velocity(2, &(&q - &u * h), &u, &c);
            assert_vec_close!(a, (v_plus - v_minus) / (2.0 * h), 1e-5);
            assert_vec_close!(jacobian * &u, v, 1e-12);
        }
    }

    #[test]
    fn relative_coordinates_skip_shared_ancestors() {
        let (frames, points) = crank_and_slider();
        let kinematics = PointKinematics {
            frames: &frames,
            points: &points,
        };

        assert_eq!(kinematics.relative_coordinates(2, 1), vec![1, 2]);
        assert_eq!(kinematics.relative_coordinates(2, 0), vec![0, 1, 2]);
        assert!(kinematics.relative_coordinates(1, 1).is_empty());
    }
}
