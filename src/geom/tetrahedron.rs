use crate::Point;

/// Signed volume: positive when `pt3` lies on the side of triangle
/// `(pt0, pt1, pt2)` that its right-hand normal points to.
pub fn tetrahedron_signed_volume(pt0: Point, pt1: Point, pt2: Point, pt3: Point) -> f64 {
    let a = pt1 - pt0;
    let b = pt2 - pt0;
    let c = pt3 - pt0;
    a.cross(b).dot(c) / 6.
}

/// Returns tetrahedron centroid (i.e. average of each vertices)
pub fn tetrahedron_centroid(pt0: Point, pt1: Point, pt2: Point, pt3: Point) -> Point {
    Point::average(&[pt0, pt1, pt2, pt3])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_corner_tetrahedron() {
        let p0 = Point::new(0., 0., 0.);
        let p1 = Point::new(1., 0., 0.);
        let p2 = Point::new(0., 1., 0.);
        let p3 = Point::new(0., 0., 1.);
        assert!((tetrahedron_signed_volume(p0, p1, p2, p3) - 1. / 6.).abs() < 1e-12);
        assert!((tetrahedron_signed_volume(p0, p2, p1, p3) + 1. / 6.).abs() < 1e-12);
        assert!(tetrahedron_centroid(p0, p1, p2, p3).is_close(&Point::new(0.25, 0.25, 0.25)));
    }

    #[test]
    fn test_degenerate_is_zero() {
        let p0 = Point::new(0., 0., 0.);
        let p1 = Point::new(1., 0., 0.);
        let p2 = Point::new(0., 1., 0.);
        let p3 = Point::new(1., 1., 0.);
        assert!(tetrahedron_signed_volume(p0, p1, p2, p3).abs() < 1e-12);
    }
}
