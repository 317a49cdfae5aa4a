pub mod point;
pub mod tensor;
pub mod tetrahedron;
pub mod vector;

/// Geometric precision
pub const EPS: f64 = 1e-13;

/// Approximate equality for scalars.
pub trait IsClose {
    fn is_close(&self, other: f64) -> bool;
}

impl IsClose for f64 {
    fn is_close(&self, other: f64) -> bool {
        (self - other).abs() < EPS
    }
}
