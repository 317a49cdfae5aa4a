//! Polyhedral mesh partition owned by one rank.
//!
//! Faces are stored owner/neighbour style: every face has an owner cell and
//! internal faces also a neighbour cell. Face area vectors point out of the
//! owner. Internal faces come first, boundary faces follow grouped by patch.

pub mod block;
pub mod patch;

use anyhow::{Result, bail, ensure};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::geom::tetrahedron::{tetrahedron_centroid, tetrahedron_signed_volume};
use crate::{Point, Vector};
use patch::{Patch, PatchDescription, PatchKind, PatchSpec, resolve_patches};

/// Sentinel index indicating a boundary (no neighbour cell).
pub const BOUNDARY: usize = usize::MAX;

/// Containment slack relative to the cell length scale.
pub const CONTAINMENT_TOLERANCE: f64 = 1e-9;

/// Serializable mesh layout, as stored in mesh files.
///
/// `neighbour` holds one entry per internal face; its length therefore is
/// the number of internal faces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshDescription {
    pub points: Vec<Point>,
    pub faces: Vec<Vec<usize>>,
    pub owner: Vec<usize>,
    pub neighbour: Vec<usize>,
    pub patches: Vec<PatchDescription>,
    /// Rank owning this partition.
    #[serde(default)]
    pub rank: usize,
}

/// Mesh partition with precomputed face and cell geometry.
#[derive(Debug, Clone)]
pub struct PolyMesh {
    points: Vec<Point>,
    faces: Vec<Vec<usize>>,
    owner: Vec<usize>,
    /// One entry per face, [`BOUNDARY`] for boundary faces.
    neighbour: Vec<usize>,
    n_internal: usize,
    rank: usize,
    patches: Vec<Patch>,
    patch_specs: Vec<PatchSpec>,
    cells: Vec<Vec<usize>>,
    face_centres: Vec<Point>,
    /// Unit normals, oriented out of the owner.
    face_normals: Vec<Vector>,
    face_areas: Vec<f64>,
    cell_centres: Vec<Point>,
    cell_volumes: Vec<f64>,
}

impl PolyMesh {
    pub fn new(desc: MeshDescription) -> Result<Self> {
        let n_faces = desc.faces.len();
        let n_internal = desc.neighbour.len();
        ensure!(
            desc.owner.len() == n_faces,
            "mesh has {} faces but {} owners",
            n_faces,
            desc.owner.len()
        );
        ensure!(n_internal <= n_faces, "more neighbours than faces");
        for (i, f) in desc.faces.iter().enumerate() {
            ensure!(f.len() >= 3, "face {i} has fewer than 3 vertices");
            ensure!(
                f.iter().all(|&v| v < desc.points.len()),
                "face {i} refers to a missing point"
            );
        }

        let n_cells = desc
            .owner
            .iter()
            .chain(desc.neighbour.iter())
            .max()
            .map_or(0, |&c| c + 1);
        let mut neighbour = desc.neighbour.clone();
        neighbour.resize(n_faces, BOUNDARY);

        let mut cells = vec![Vec::new(); n_cells];
        for (f, &own) in desc.owner.iter().enumerate() {
            cells[own].push(f);
            if neighbour[f] != BOUNDARY {
                ensure!(neighbour[f] != own, "face {f} has the same owner and neighbour");
                cells[neighbour[f]].push(f);
            }
        }
        for (c, faces) in cells.iter().enumerate() {
            ensure!(faces.len() >= 4, "cell {c} is not closed ({} faces)", faces.len());
        }

        // Patches must tile the boundary faces in order
        let mut expected_start = n_internal;
        for p in &desc.patches {
            ensure!(
                p.start == expected_start,
                "patch '{}' starts at face {} instead of {}",
                p.spec.name,
                p.start,
                expected_start
            );
            expected_start += p.size;
        }
        ensure!(
            expected_start == n_faces,
            "patches cover faces up to {expected_start} but the mesh has {n_faces}"
        );
        let patches = resolve_patches(&desc.patches)?;
        for p in &patches {
            if let PatchKind::Processor { neighbour_rank } = p.kind {
                ensure!(
                    neighbour_rank != desc.rank,
                    "processor patch '{}' of rank {} points back to itself",
                    p.name,
                    desc.rank
                );
            }
        }

        let mut face_centres = Vec::with_capacity(n_faces);
        let mut face_normals = Vec::with_capacity(n_faces);
        let mut face_areas = Vec::with_capacity(n_faces);
        for (i, f) in desc.faces.iter().enumerate() {
            let (centre, area_vector) = face_geometry(&desc.points, f);
            let area = area_vector.length();
            let Some(normal) = area_vector.normalize() else {
                bail!("face {i} has zero area");
            };
            face_centres.push(centre);
            face_normals.push(normal);
            face_areas.push(area);
        }

        let mut cell_centres = Vec::with_capacity(n_cells);
        let mut cell_volumes = Vec::with_capacity(n_cells);
        for (c, cell_faces) in cells.iter().enumerate() {
            let guess = Point::average(
                &cell_faces.iter().map(|&f| face_centres[f]).collect::<Vec<_>>(),
            );
            let mut volume = 0.;
            let mut moment = Vector::ZERO;
            for &f in cell_faces {
                let sign = if desc.owner[f] == c { 1. } else { -1. };
                let verts = &desc.faces[f];
                for k in 0..verts.len() {
                    let a = desc.points[verts[k]];
                    let b = desc.points[verts[(k + 1) % verts.len()]];
                    let v = -sign * tetrahedron_signed_volume(a, b, face_centres[f], guess);
                    volume += v;
                    moment += Vector::from_a_point(tetrahedron_centroid(a, b, face_centres[f], guess)) * v;
                }
            }
            ensure!(volume > 0., "cell {c} has non-positive volume {volume}");
            cell_centres.push(Point::default() + moment * (1. / volume));
            cell_volumes.push(volume);
        }

        for f in 0..n_faces {
            let own = desc.owner[f];
            let other = if neighbour[f] == BOUNDARY {
                face_centres[f]
            } else {
                cell_centres[neighbour[f]]
            };
            ensure!(
                (other - cell_centres[own]).dot(face_normals[f]) > 0.,
                "face {f} is not oriented out of its owner cell {own}"
            );
        }

        debug!(
            "Mesh with {} cells, {} faces ({} internal), {} patches",
            n_cells,
            n_faces,
            n_internal,
            patches.len()
        );

        Ok(Self {
            points: desc.points,
            faces: desc.faces,
            owner: desc.owner,
            neighbour,
            n_internal,
            rank: desc.rank,
            patches,
            patch_specs: desc.patches.into_iter().map(|p| p.spec).collect(),
            cells,
            face_centres,
            face_normals,
            face_areas,
            cell_centres,
            cell_volumes,
        })
    }

    /// Rebuilds the serializable layout of this mesh.
    pub fn description(&self) -> MeshDescription {
        MeshDescription {
            points: self.points.clone(),
            faces: self.faces.clone(),
            owner: self.owner.clone(),
            neighbour: self.neighbour[..self.n_internal].to_vec(),
            patches: self
                .patches
                .iter()
                .zip(&self.patch_specs)
                .map(|(p, spec)| PatchDescription {
                    spec: spec.clone(),
                    start: p.start,
                    size: p.size,
                })
                .collect(),
            rank: self.rank,
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn n_faces(&self) -> usize {
        self.faces.len()
    }

    pub fn n_internal_faces(&self) -> usize {
        self.n_internal
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn face(&self, face: usize) -> &[usize] {
        &self.faces[face]
    }

    pub fn face_owner(&self, face: usize) -> usize {
        self.owner[face]
    }

    /// Neighbour cell, or [`BOUNDARY`].
    pub fn face_neighbour(&self, face: usize) -> usize {
        self.neighbour[face]
    }

    pub fn is_internal_face(&self, face: usize) -> bool {
        face < self.n_internal
    }

    pub fn face_centre(&self, face: usize) -> Point {
        self.face_centres[face]
    }

    pub fn face_normal(&self, face: usize) -> Vector {
        self.face_normals[face]
    }

    pub fn face_area(&self, face: usize) -> f64 {
        self.face_areas[face]
    }

    /// Unit normal of `face` pointing out of `cell`.
    pub fn outward_normal(&self, cell: usize, face: usize) -> Vector {
        if self.owner[face] == cell {
            self.face_normals[face]
        } else {
            -self.face_normals[face]
        }
    }

    /// The cell on the other side of an internal face.
    pub fn other_cell(&self, face: usize, cell: usize) -> usize {
        if self.owner[face] == cell {
            self.neighbour[face]
        } else {
            self.owner[face]
        }
    }

    pub fn cell_faces(&self, cell: usize) -> &[usize] {
        &self.cells[cell]
    }

    pub fn cell_centre(&self, cell: usize) -> Point {
        self.cell_centres[cell]
    }

    pub fn cell_volume(&self, cell: usize) -> f64 {
        self.cell_volumes[cell]
    }

    pub fn total_volume(&self) -> f64 {
        self.cell_volumes.iter().sum()
    }

    /// Characteristic cell size, used to scale tolerances.
    pub fn length_scale(&self, cell: usize) -> f64 {
        self.cell_volumes[cell].cbrt()
    }

    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    pub fn patch(&self, index: usize) -> &Patch {
        &self.patches[index]
    }

    pub fn find_patch(&self, name: &str) -> Option<usize> {
        self.patches.iter().position(|p| p.name == name)
    }

    /// Patch containing a boundary face; `None` for internal faces.
    pub fn which_patch(&self, face: usize) -> Option<usize> {
        if self.is_internal_face(face) {
            return None;
        }
        self.patches.iter().position(|p| p.contains_face(face))
    }

    /// Processor patch shared with `rank`, if any.
    pub fn processor_patch_to(&self, rank: usize) -> Option<usize> {
        self.patches.iter().position(|p| {
            matches!(p.kind, PatchKind::Processor { neighbour_rank } if neighbour_rank == rank)
        })
    }

    /// True if `p` is inside the (convex) cell or on its boundary.
    pub fn cell_contains(&self, cell: usize, p: Point) -> bool {
        let tol = CONTAINMENT_TOLERANCE * self.length_scale(cell);
        self.cells[cell].iter().all(|&f| {
            self.outward_normal(cell, f).dot(p - self.face_centres[f]) <= tol
        })
    }

    /// Locates `p` starting from a hint cell.
    ///
    /// Walks across the face `p` lies furthest outside of until the
    /// containing cell is found. Falls back to a full search when the walk
    /// runs into a boundary.
    pub fn locate(&self, p: Point, hint: Option<usize>) -> Option<usize> {
        let Some(mut cell) = hint.filter(|&c| c < self.n_cells()) else {
            return self.find_cell(p);
        };
        for _ in 0..self.n_cells() {
            if self.cell_contains(cell, p) {
                return Some(cell);
            }
            let exit = self.cells[cell]
                .iter()
                .map(|&f| (f, self.outward_normal(cell, f).dot(p - self.face_centres[f])))
                .max_by(|a, b| a.1.total_cmp(&b.1));
            match exit {
                Some((f, _)) if self.is_internal_face(f) => cell = self.other_cell(f, cell),
                _ => break,
            }
        }
        self.find_cell(p)
    }

    /// Exhaustive search over all cells of the partition.
    pub fn find_cell(&self, p: Point) -> Option<usize> {
        (0..self.n_cells()).find(|&c| self.cell_contains(c, p))
    }

    /// Cell in which a new particle at `p` is created on this rank.
    ///
    /// Like [`PolyMesh::find_cell`], but a point on a processor patch shared
    /// with a lower rank is left to that rank, so that every point of a
    /// decomposed domain is claimed by one partition only.
    pub fn claim(&self, p: Point) -> Option<usize> {
        let cell = self.find_cell(p)?;
        let yields = self.patches.iter().any(|patch| {
            matches!(patch.kind, PatchKind::Processor { neighbour_rank } if neighbour_rank < self.rank)
                && (patch.start..patch.start + patch.size).any(|f| self.on_face(f, p))
        });
        (!yields).then_some(cell)
    }

    fn on_face(&self, face: usize, p: Point) -> bool {
        let own = self.owner[face];
        let tol = CONTAINMENT_TOLERANCE * self.length_scale(own);
        self.face_normals[face].dot(p - self.face_centres[face]).abs() <= tol && self.cell_contains(own, p)
    }
}

/// Centre and area vector of a polygonal face.
///
/// Triangulates around the vertex average so that slightly warped faces
/// still get a consistent normal.
fn face_geometry(points: &[Point], face: &[usize]) -> (Point, Vector) {
    let verts: Vec<Point> = face.iter().map(|&v| points[v]).collect();
    let mid = Point::average(&verts);
    let mut area_vector = Vector::ZERO;
    let mut tris = Vec::with_capacity(verts.len());
    for k in 0..verts.len() {
        let a = verts[k];
        let b = verts[(k + 1) % verts.len()];
        let s = (b - a).cross(mid - a) * 0.5;
        area_vector += s;
        tris.push((s, Point::average(&[a, b, mid])));
    }
    let Some(n) = area_vector.normalize() else {
        return (mid, area_vector);
    };
    let mut weight = 0.;
    let mut acc = Vector::ZERO;
    for (s, c) in tris {
        let w = s.dot(n);
        weight += w;
        acc += Vector::from_a_point(c) * w;
    }
    if weight.abs() < f64::EPSILON {
        return (mid, area_vector);
    }
    (Point::default() + acc * (1. / weight), area_vector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::block::BlockMesh;

    fn unit_cube() -> PolyMesh {
        BlockMesh::new(vec![0., 1.], vec![0., 1.], vec![0., 1.])
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_face_geometry_square() {
        let pts = vec![
            Point::new(0., 0., 0.),
            Point::new(2., 0., 0.),
            Point::new(2., 2., 0.),
            Point::new(0., 2., 0.),
        ];
        let (c, s) = face_geometry(&pts, &[0, 1, 2, 3]);
        assert!(c.is_close(&Point::new(1., 1., 0.)));
        assert!(s.is_close(&Vector::new(0., 0., 4.)));
    }

    #[test]
    fn test_unit_cube_geometry() {
        let mesh = unit_cube();
        assert_eq!(mesh.n_cells(), 1);
        assert_eq!(mesh.n_faces(), 6);
        assert_eq!(mesh.n_internal_faces(), 0);
        assert!((mesh.cell_volume(0) - 1.).abs() < 1e-12);
        assert!(mesh.cell_centre(0).is_within(&Point::new(0.5, 0.5, 0.5), 1e-12));
        for f in 0..6 {
            assert!((mesh.face_area(f) - 1.).abs() < 1e-12);
            let out = mesh.face_centre(f) - mesh.cell_centre(0);
            assert!(out.dot(mesh.face_normal(f)) > 0.);
        }
    }

    #[test]
    fn test_containment_and_locate() {
        let mesh = BlockMesh::new(vec![0., 1., 2., 3.], vec![0., 1.], vec![0., 1.])
            .unwrap()
            .build()
            .unwrap();
        let p = Point::new(2.5, 0.5, 0.5);
        assert!(mesh.cell_contains(2, p));
        assert!(!mesh.cell_contains(0, p));
        assert_eq!(mesh.locate(p, Some(0)), Some(2));
        assert_eq!(mesh.find_cell(p), Some(2));
        assert_eq!(mesh.find_cell(Point::new(3.5, 0.5, 0.5)), None);
        // Points on a shared face belong to both cells
        let on_face = Point::new(1., 0.5, 0.5);
        assert!(mesh.cell_contains(0, on_face) && mesh.cell_contains(1, on_face));
    }

    #[test]
    fn test_rejects_inverted_face() {
        let mut desc = BlockMesh::new(vec![0., 1., 2.], vec![0., 1.], vec![0., 1.])
            .unwrap()
            .description();
        desc.faces[0].reverse();
        assert!(PolyMesh::new(desc).is_err());
    }

    #[test]
    fn test_rejects_gap_in_patches() {
        let mut desc = BlockMesh::new(vec![0., 1.], vec![0., 1.], vec![0., 1.])
            .unwrap()
            .description();
        desc.patches.pop();
        assert!(PolyMesh::new(desc).is_err());
    }

    #[test]
    fn test_description_round_trip() {
        let mesh = BlockMesh::new(vec![0., 1., 2.], vec![0., 1.], vec![0., 0.5, 1.])
            .unwrap()
            .build()
            .unwrap();
        let again = PolyMesh::new(mesh.description()).unwrap();
        assert_eq!(again.n_cells(), mesh.n_cells());
        assert_eq!(again.description(), mesh.description());
        assert!((again.total_volume() - 2.).abs() < 1e-12);
    }
}
