use sfm_core::nalgebra::{Matrix3, Rotation3, Unit, Vector3};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn unit(self) -> Unit<Vector3<f64>> {
        match self {
            Axis::X => Vector3::x_axis(),
            Axis::Y => Vector3::y_axis(),
            Axis::Z => Vector3::z_axis(),
        }
    }
}

impl FromStr for Axis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x" => Ok(Axis::X),
            "y" => Ok(Axis::Y),
            "z" => Ok(Axis::Z),
            other => Err(format!("unknown axis {:?}, expected x, y or z", other)),
        }
    }
}

/// Rotates the direction from the point named `from` to the point named `to` onto `axis`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisAlignment {
    pub from: String,
    pub to: String,
    pub axis: Axis,
}

impl FromStr for AxisAlignment {
    type Err = String;

    /// Parses `FROM,TO,AXIS`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        match parts.as_slice() {
            [from, to, axis] if !from.is_empty() && !to.is_empty() => Ok(Self {
                from: from.to_string(),
                to: to.to_string(),
                axis: axis.parse()?,
            }),
            _ => Err(format!("expected FROM,TO,AXIS but got {:?}", s)),
        }
    }
}

fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// The rotation taking the direction of `direction` onto `axis`, from the Rodrigues formula.
///
/// Returns `None` if `direction` has no length.
pub fn rotation_onto(direction: Vector3<f64>, axis: Axis) -> Option<Rotation3<f64>> {
    let a = direction.try_normalize(1e-12)?;
    let b = axis.unit().into_inner();
    let cross = a.cross(&b);
    let sin = cross.norm();
    let cos = a.dot(&b);

    if sin < 1e-12 {
        if cos > 0.0 {
            return Some(Rotation3::identity());
        }
        // Opposite directions: half a turn about any axis perpendicular to both.
        let helper = if a.x.abs() < 0.9 {
            Vector3::x()
        } else {
            Vector3::y()
        };
        let perpendicular = Unit::new_normalize(a.cross(&helper));
        return Some(Rotation3::from_axis_angle(
            &perpendicular,
            std::f64::consts::PI,
        ));
    }

    let k = skew(&cross);
    let matrix = Matrix3::identity() + k + k * k * ((1.0 - cos) / (sin * sin));
    Some(Rotation3::from_matrix_unchecked(matrix))
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn direction_lands_on_axis() {
        let direction = Vector3::new(1.0, 2.0, -0.5);
        for axis in [Axis::X, Axis::Y, Axis::Z] {
            let rotation = rotation_onto(direction, axis).unwrap();
            assert_relative_eq!(
                rotation * direction.normalize(),
                axis.unit().into_inner(),
                epsilon = 1e-12
            );
            assert_relative_eq!(rotation.matrix().determinant(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn opposite_direction_is_half_turn() {
        let rotation = rotation_onto(Vector3::new(0.0, 0.0, -3.0), Axis::Z).unwrap();
        assert_relative_eq!(
            rotation * Vector3::new(0.0, 0.0, -1.0),
            Vector3::z(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn zero_direction_has_no_rotation() {
        assert!(rotation_onto(Vector3::zeros(), Axis::X).is_none());
    }

    #[test]
    fn parses_alignment() {
        let alignment: AxisAlignment = "a, b ,Y".parse().unwrap();
        assert_eq!(
            alignment,
            AxisAlignment {
                from: "a".into(),
                to: "b".into(),
                axis: Axis::Y,
            }
        );
        assert!("a,b".parse::<AxisAlignment>().is_err());
        assert!("a,b,w".parse::<AxisAlignment>().is_err());
    }
}
