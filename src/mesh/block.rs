//! Structured hexahedral meshes and their slab decomposition.

use anyhow::{Result, bail, ensure};
use log::info;

use super::patch::{PatchDescription, PatchSpec, PatchTransform};
use super::{MeshDescription, PolyMesh};
use crate::{Point, Vector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    XMin,
    XMax,
    YMin,
    YMax,
    ZMin,
    ZMax,
}

impl Side {
    /// Order in which boundary patches are laid out.
    pub const ALL: [Side; 6] = [
        Side::XMin,
        Side::XMax,
        Side::YMin,
        Side::YMax,
        Side::ZMin,
        Side::ZMax,
    ];

    pub fn default_name(self) -> &'static str {
        match self {
            Side::XMin => "xMin",
            Side::XMax => "xMax",
            Side::YMin => "yMin",
            Side::YMax => "yMax",
            Side::ZMin => "zMin",
            Side::ZMax => "zMax",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Box of `nx * ny * nz` hexahedra defined by per-axis node coordinates.
///
/// Points are numbered `i + (nx+1) * (j + (ny+1) * k)` and cells
/// `i + nx * (j + ny * k)`. Every side is a wall unless replaced with
/// [`BlockMesh::with_side`].
#[derive(Debug, Clone)]
pub struct BlockMesh {
    x: Vec<f64>,
    y: Vec<f64>,
    z: Vec<f64>,
    sides: [PatchSpec; 6],
}

impl BlockMesh {
    pub fn new(x: Vec<f64>, y: Vec<f64>, z: Vec<f64>) -> Result<Self> {
        for (axis, coords) in [("x", &x), ("y", &y), ("z", &z)] {
            ensure!(coords.len() >= 2, "{axis} axis needs at least 2 nodes");
            ensure!(
                coords.windows(2).all(|w| w[1] > w[0]),
                "{axis} node coordinates must be strictly increasing"
            );
        }
        Ok(Self {
            x,
            y,
            z,
            sides: Side::ALL.map(|s| PatchSpec::wall(s.default_name())),
        })
    }

    /// Uniformly divided box between two corners.
    pub fn uniform(min: Point, max: Point, n: [usize; 3]) -> Result<Self> {
        ensure!(n.iter().all(|&k| k > 0), "cell counts must be positive");
        let axis = |lo: f64, hi: f64, k: usize| -> Vec<f64> {
            (0..=k).map(|i| lo + (hi - lo) * i as f64 / k as f64).collect()
        };
        Self::new(
            axis(min.x, max.x, n[0]),
            axis(min.y, max.y, n[1]),
            axis(min.z, max.z, n[2]),
        )
    }

    pub fn with_side(mut self, side: Side, spec: PatchSpec) -> Self {
        self.sides[side.index()] = spec;
        self
    }

    /// Turns the two sides normal to `axis` (0, 1 or 2) into a flat
    /// periodic pair.
    pub fn with_periodic(self, axis: usize) -> Result<Self> {
        let (lo, hi, coords) = match axis {
            0 => (Side::XMin, Side::XMax, &self.x),
            1 => (Side::YMin, Side::YMax, &self.y),
            2 => (Side::ZMin, Side::ZMax, &self.z),
            _ => bail!("axis must be 0, 1 or 2, got {axis}"),
        };
        let length = coords[coords.len() - 1] - coords[0];
        let mut sep = [0.; 3];
        sep[axis] = length;
        let sep = Vector::from_array(sep);
        let (lo_name, hi_name) = (lo.default_name(), hi.default_name());
        Ok(self
            .with_side(
                lo,
                PatchSpec::cyclic(lo_name, hi_name, PatchTransform::translation(sep)),
            )
            .with_side(
                hi,
                PatchSpec::cyclic(hi_name, lo_name, PatchTransform::translation(-sep)),
            ))
    }

    pub fn n_cells(&self) -> usize {
        (self.x.len() - 1) * (self.y.len() - 1) * (self.z.len() - 1)
    }

    pub fn description(&self) -> MeshDescription {
        self.slab(0, self.x.len() - 1, 0, None, None)
    }

    pub fn build(&self) -> Result<PolyMesh> {
        PolyMesh::new(self.description())
    }

    /// Splits the box into `n_ranks` slabs along x.
    ///
    /// Neighbouring slabs are joined by processor patches named
    /// `procBoundary{me}to{other}`, with matching face order on both sides.
    pub fn decompose(&self, n_ranks: usize) -> Result<Vec<MeshDescription>> {
        let nx = self.x.len() - 1;
        ensure!(
            n_ranks >= 1 && n_ranks <= nx,
            "cannot split {nx} cell layers between {n_ranks} ranks"
        );
        if n_ranks > 1 {
            for side in [Side::XMin, Side::XMax] {
                ensure!(
                    self.sides[side.index()].kind != "cyclic",
                    "periodic x sides cannot be split across ranks"
                );
            }
        }

        let base = nx / n_ranks;
        let extra = nx % n_ranks;
        let mut parts = Vec::with_capacity(n_ranks);
        let mut i0 = 0;
        for r in 0..n_ranks {
            let i1 = i0 + base + usize::from(r < extra);
            let lower = (r > 0).then(|| PatchSpec::processor(&format!("procBoundary{r}to{}", r - 1), r - 1));
            let upper = (r + 1 < n_ranks)
                .then(|| PatchSpec::processor(&format!("procBoundary{r}to{}", r + 1), r + 1));
            parts.push(self.slab(i0, i1, r, lower, upper));
            i0 = i1;
        }
        info!("Decomposed {} cells into {} slabs along x", self.n_cells(), n_ranks);
        Ok(parts)
    }

    /// Mesh of the cell layers `i0..i1` owned by `rank`. `lower`/`upper`
    /// replace the x sides.
    fn slab(
        &self,
        i0: usize,
        i1: usize,
        rank: usize,
        lower: Option<PatchSpec>,
        upper: Option<PatchSpec>,
    ) -> MeshDescription {
        let xs = &self.x[i0..=i1];
        let (nx, ny, nz) = (xs.len() - 1, self.y.len() - 1, self.z.len() - 1);
        let pid = |i: usize, j: usize, k: usize| i + (nx + 1) * (j + (ny + 1) * k);
        let cid = |i: usize, j: usize, k: usize| i + nx * (j + ny * k);
        // Quads with area vectors along +x, +y, +z
        let x_quad = |i, j, k| vec![pid(i, j, k), pid(i, j + 1, k), pid(i, j + 1, k + 1), pid(i, j, k + 1)];
        let y_quad = |i, j, k| vec![pid(i, j, k), pid(i, j, k + 1), pid(i + 1, j, k + 1), pid(i + 1, j, k)];
        let z_quad = |i, j, k| vec![pid(i, j, k), pid(i + 1, j, k), pid(i + 1, j + 1, k), pid(i, j + 1, k)];
        let reversed = |mut f: Vec<usize>| {
            f.reverse();
            f
        };

        let mut points = Vec::with_capacity((nx + 1) * (ny + 1) * (nz + 1));
        for &z in &self.z {
            for &y in &self.y {
                for &x in xs {
                    points.push(Point::new(x, y, z));
                }
            }
        }

        let mut faces = Vec::new();
        let mut owner = Vec::new();
        let mut neighbour = Vec::new();

        for k in 0..nz {
            for j in 0..ny {
                for i in 1..nx {
                    faces.push(x_quad(i, j, k));
                    owner.push(cid(i - 1, j, k));
                    neighbour.push(cid(i, j, k));
                }
            }
        }
        for k in 0..nz {
            for j in 1..ny {
                for i in 0..nx {
                    faces.push(y_quad(i, j, k));
                    owner.push(cid(i, j - 1, k));
                    neighbour.push(cid(i, j, k));
                }
            }
        }
        for k in 1..nz {
            for j in 0..ny {
                for i in 0..nx {
                    faces.push(z_quad(i, j, k));
                    owner.push(cid(i, j, k - 1));
                    neighbour.push(cid(i, j, k));
                }
            }
        }

        let mut patches = Vec::with_capacity(6);
        for side in Side::ALL {
            let start = faces.len();
            match side {
                Side::XMin | Side::XMax => {
                    for k in 0..nz {
                        for j in 0..ny {
                            if side == Side::XMin {
                                faces.push(reversed(x_quad(0, j, k)));
                                owner.push(cid(0, j, k));
                            } else {
                                faces.push(x_quad(nx, j, k));
                                owner.push(cid(nx - 1, j, k));
                            }
                        }
                    }
                }
                Side::YMin | Side::YMax => {
                    for k in 0..nz {
                        for i in 0..nx {
                            if side == Side::YMin {
                                faces.push(reversed(y_quad(i, 0, k)));
                                owner.push(cid(i, 0, k));
                            } else {
                                faces.push(y_quad(i, ny, k));
                                owner.push(cid(i, ny - 1, k));
                            }
                        }
                    }
                }
                Side::ZMin | Side::ZMax => {
                    for j in 0..ny {
                        for i in 0..nx {
                            if side == Side::ZMin {
                                faces.push(reversed(z_quad(i, j, 0)));
                                owner.push(cid(i, j, 0));
                            } else {
                                faces.push(z_quad(i, j, nz));
                                owner.push(cid(i, j, nz - 1));
                            }
                        }
                    }
                }
            }
            let spec = match (side, &lower, &upper) {
                (Side::XMin, Some(p), _) => p.clone(),
                (Side::XMax, _, Some(p)) => p.clone(),
                _ => self.sides[side.index()].clone(),
            };
            patches.push(PatchDescription {
                spec,
                start,
                size: faces.len() - start,
            });
        }

        MeshDescription {
            points,
            faces,
            owner,
            neighbour,
            patches,
            rank,
        }
    }
}
