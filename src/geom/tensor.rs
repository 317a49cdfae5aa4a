use crate::geom::IsClose;
use crate::{Point, Vector};
use anyhow::{Result, bail};
use ndarray as nd;
use serde::{Deserialize, Serialize};
use std::ops::Mul;

/// Second-order 3x3 tensor stored row-major.
///
/// Used for the rotation/reflection part of boundary transforms, where it is
/// applied to every orientation-sensitive vector carried by a particle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tensor(pub [[f64; 3]; 3]);

impl Tensor {
    pub const IDENTITY: Self = Self([[1., 0., 0.], [0., 1., 0.], [0., 0., 1.]]);

    pub fn new(rows: [[f64; 3]; 3]) -> Self {
        Self(rows)
    }

    /// Rotation by angle `phi` (radians, right-handed) around the axis `u`.
    ///
    /// The axis is normalized first. Fails for a zero-length axis.
    pub fn rotation(u: &Vector, phi: f64) -> Result<Self> {
        let Some(u) = u.normalize() else {
            bail!("rotation axis must have non-zero length");
        };
        let rot = rotation_matrix(&u, phi)?;
        Ok(Self::from_array(rot.view()))
    }

    /// Householder reflection across the plane with normal `n`: `I - 2 n n^T`.
    pub fn reflection(n: &Vector) -> Result<Self> {
        let Some(n) = n.normalize() else {
            bail!("reflection normal must have non-zero length");
        };
        let n = n.to_array();
        let mut rows = Self::IDENTITY.0;
        for (i, row) in rows.iter_mut().enumerate() {
            for (j, val) in row.iter_mut().enumerate() {
                *val -= 2. * n[i] * n[j];
            }
        }
        Ok(Self(rows))
    }

    pub fn from_array(arr: nd::ArrayView2<f64>) -> Self {
        let mut rows = [[0.; 3]; 3];
        for (i, row) in rows.iter_mut().enumerate() {
            for (j, val) in row.iter_mut().enumerate() {
                *val = arr[[i, j]];
            }
        }
        Self(rows)
    }

    pub fn transpose(&self) -> Self {
        let r = &self.0;
        Self([
            [r[0][0], r[1][0], r[2][0]],
            [r[0][1], r[1][1], r[2][1]],
            [r[0][2], r[1][2], r[2][2]],
        ])
    }

    pub fn determinant(&self) -> f64 {
        let r = &self.0;
        r[0][0] * (r[1][1] * r[2][2] - r[1][2] * r[2][1])
            - r[0][1] * (r[1][0] * r[2][2] - r[1][2] * r[2][0])
            + r[0][2] * (r[1][0] * r[2][1] - r[1][1] * r[2][0])
    }

    /// Returns `self . other`.
    pub fn compose(&self, other: &Self) -> Self {
        let mut rows = [[0.; 3]; 3];
        for (i, row) in rows.iter_mut().enumerate() {
            for (j, val) in row.iter_mut().enumerate() {
                *val = (0..3).map(|k| self.0[i][k] * other.0[k][j]).sum();
            }
        }
        Self(rows)
    }

    /// True for rotations and reflections (`T . T^T == I`), up to `tol`.
    pub fn is_orthogonal(&self, tol: f64) -> bool {
        let p = self.compose(&self.transpose());
        (0..3).all(|i| {
            (0..3).all(|j| {
                let expected = if i == j { 1. } else { 0. };
                (p.0[i][j] - expected).abs() <= tol
            })
        })
    }

    /// Applies the tensor to a vector: `T . v`.
    pub fn transform(&self, v: Vector) -> Vector {
        let r = &self.0;
        Vector::new(
            r[0][0] * v.dx + r[0][1] * v.dy + r[0][2] * v.dz,
            r[1][0] * v.dx + r[1][1] * v.dy + r[1][2] * v.dz,
            r[2][0] * v.dx + r[2][1] * v.dy + r[2][2] * v.dz,
        )
    }

    /// Applies the tensor to a point about a fixed `origin`.
    pub fn transform_point(&self, p: Point, origin: Point) -> Point {
        origin + self.transform(p - origin)
    }
}

impl Mul<Vector> for Tensor {
    type Output = Vector;
    fn mul(self, v: Vector) -> Vector {
        self.transform(v)
    }
}

/// Calculate rotation matrix for a unit vector `u` and angle `phi`.
///
/// Rodrigues' formula in its numerically stable form:
/// `R = I + sin(phi) W + 2 sin^2(phi/2) W^2`, with `W` the cross-product
/// matrix of `u`.
/// https://en.wikipedia.org/wiki/Rodrigues%27_rotation_formula
pub fn rotation_matrix(u: &Vector, phi: f64) -> Result<nd::Array2<f64>> {
    if !u.length().is_close(1.) {
        bail!("rotation_matrix() requires u to be a unit vector, got {u}");
    }

    let w: nd::Array2<f64> = nd::arr2(&[[0., -u.dz, u.dy], [u.dz, 0., -u.dx], [-u.dy, u.dx, 0.]]);

    Ok(nd::Array::eye(3) + phi.sin() * &w + (2. * (phi / 2.).sin().powi(2)) * w.dot(&w))
}

impl Default for Tensor {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_rotation_about_z() {
        let rot = Tensor::rotation(&Vector::new(0., 0., 1.), -PI / 2.).unwrap();
        let v = rot * Vector::new(1., 0., 0.);
        assert!((v.dx - 0.).abs() < 1e-12);
        assert!((v.dy + 1.).abs() < 1e-12);
        assert!((v.dz - 0.).abs() < 1e-12);
        assert!(rot.is_orthogonal(1e-12));
        assert!((rot.determinant() - 1.).abs() < 1e-12);
    }

    #[test]
    fn test_rotation_preserves_length() {
        let rot = Tensor::rotation(&Vector::new(1., 2., 3.), 0.7).unwrap();
        let v = Vector::new(-4., 0.5, 2.);
        assert!((rot.transform(v).length() - v.length()).abs() < 1e-12);
    }

    #[test]
    fn test_rotation_zero_axis_fails() {
        assert!(Tensor::rotation(&Vector::ZERO, 1.).is_err());
    }

    #[test]
    fn test_reflection() {
        let refl = Tensor::reflection(&Vector::new(0., 0., 2.)).unwrap();
        let v = refl.transform(Vector::new(1., 2., 3.));
        assert!(v.is_close(&Vector::new(1., 2., -3.)));
        assert!((refl.determinant() + 1.).abs() < 1e-12);
        assert!(refl.is_orthogonal(1e-12));
    }

    #[test]
    fn test_transpose_inverts_rotation() {
        let rot = Tensor::rotation(&Vector::new(0., 1., 0.), 0.3).unwrap();
        assert!(rot.is_orthogonal(1e-12));
        let v = Vector::new(0.2, -0.1, 4.);
        let back = rot.transpose().transform(rot.transform(v));
        assert!((back - v).length() < 1e-12);
    }

    #[test]
    fn test_transform_point_about_origin() {
        let rot = Tensor::rotation(&Vector::new(0., 0., 1.), -PI / 2.).unwrap();
        let p = rot.transform_point(Point::new(1., 0.25, 0.5), Point::new(1., 1., 0.));
        assert!(p.is_within(&Point::new(0.25, 1., 0.5), 1e-12));
    }
}
