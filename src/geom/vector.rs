use crate::Point;
use crate::geom::EPS;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector {
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
}

impl Vector {
    pub const ZERO: Self = Self {
        dx: 0.,
        dy: 0.,
        dz: 0.,
    };

    pub fn new(dx: f64, dy: f64, dz: f64) -> Self {
        Self { dx, dy, dz }
    }

    pub fn from_array(a: [f64; 3]) -> Self {
        Self::new(a[0], a[1], a[2])
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.dx, self.dy, self.dz]
    }

    pub fn from_a_point(pt: Point) -> Self {
        Self::from_points(Point::new(0., 0., 0.), pt)
    }

    pub fn from_points(beg: Point, end: Point) -> Self {
        Self {
            dx: end.x - beg.x,
            dy: end.y - beg.y,
            dz: end.z - beg.z,
        }
    }

    /// Cross product between 2 vectors.
    pub fn cross(self, other: Self) -> Self {
        Self {
            dx: self.dy * other.dz - self.dz * other.dy,
            dy: self.dz * other.dx - self.dx * other.dz,
            dz: self.dx * other.dy - self.dy * other.dx,
        }
    }

    /// Dot product between 2 vectors.
    pub fn dot(self, other: Self) -> f64 {
        self.dx * other.dx + self.dy * other.dy + self.dz * other.dz
    }

    /// Returns the length of the vector.
    pub fn length(&self) -> f64 {
        (self.dx.powi(2) + self.dy.powi(2) + self.dz.powi(2)).sqrt()
    }

    pub fn is_close(&self, other: &Self) -> bool {
        (self.dx - other.dx).abs() < EPS
            && (self.dy - other.dy).abs() < EPS
            && (self.dz - other.dz).abs() < EPS
    }

    /// Normalizes the vector (divides by its length) and returns a copy.
    pub fn normalize(&self) -> Option<Self> {
        let len = self.length();
        if len < EPS {
            None
        } else {
            Some(Self {
                dx: self.dx / len,
                dy: self.dy / len,
                dz: self.dz / len,
            })
        }
    }

    pub fn is_finite(&self) -> bool {
        self.dx.is_finite() && self.dy.is_finite() && self.dz.is_finite()
    }
}

impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prec = f.precision().unwrap_or(2); // Default 2 decimals
        write!(
            f,
            "Vector({:.prec$}, {:.prec$}, {:.prec$})",
            self.dx,
            self.dy,
            self.dz,
            prec = prec
        )
    }
}

impl Add for Vector {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            dx: self.dx + other.dx,
            dy: self.dy + other.dy,
            dz: self.dz + other.dz,
        }
    }
}

impl AddAssign for Vector {
    fn add_assign(&mut self, other: Self) {
        self.dx += other.dx;
        self.dy += other.dy;
        self.dz += other.dz;
    }
}

impl Sub for Vector {
    type Output = Self;
    fn sub(self, other: Self) -> Self {
        Self {
            dx: self.dx - other.dx,
            dy: self.dy - other.dy,
            dz: self.dz - other.dz,
        }
    }
}

impl Neg for Vector {
    type Output = Self;
    fn neg(self) -> Self {
        self * -1.
    }
}

impl Mul<f64> for Vector {
    type Output = Self;
    fn mul(self, other: f64) -> Self {
        Self {
            dx: self.dx * other,
            dy: self.dy * other,
            dz: self.dz * other,
        }
    }
}

// Division by a (near) zero scalar yields None
impl Div<f64> for Vector {
    type Output = Option<Self>;
    fn div(self, other: f64) -> Option<Self> {
        if other.abs() < EPS {
            None
        } else {
            Some(Self {
                dx: self.dx / other,
                dy: self.dy / other,
                dz: self.dz / other,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_points() {
        let p0 = Point::new(1., 1., 1.);
        let p1 = Point::new(0., 0., 0.);
        let va = Vector::from_points(p0, p1);
        let vb = Vector::from_points(p1, p0);
        assert_eq!(va, -vb);
    }

    #[test]
    fn test_cross() {
        let vx = Vector::new(1., 0., 0.);
        let vy = Vector::new(0., 1., 0.);
        let v_cross = vx.cross(vy);
        assert_eq!(v_cross, Vector::new(0., 0., 1.));
        assert_eq!(v_cross.length(), 1.);
    }

    #[test]
    fn test_normalize() {
        let v = Vector::new(9., 0., 0.);
        assert_eq!(v.normalize(), Some(Vector::new(1., 0., 0.)));
        assert!(Vector::ZERO.normalize().is_none());
    }

    #[test]
    fn test_div() {
        let v = Vector::new(2., 4., 6.);
        assert_eq!(v / 2., Some(Vector::new(1., 2., 3.)));
        assert_eq!(v / -2., Some(Vector::new(-1., -2., -3.)));
        assert!((v / 0.).is_none());
    }

    #[test]
    fn test_array_conversion_is_exact() {
        let v = Vector::new(0.1, -1e-300, 7.5e12);
        assert_eq!(Vector::from_array(v.to_array()), v);
    }
}
