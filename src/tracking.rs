//! Face-to-face particle tracking through convex polyhedral cells.
//!
//! One call to [`move_particle`] advances a particle by the remaining
//! fraction of a time increment. The particle moves in a straight line
//! with its advection velocity; whenever the segment leaves the current
//! cell the exit face is crossed and the rest of the segment is tracked
//! from there.

pub mod interaction;

use anyhow::{Result, bail};
use log::{trace, warn};
use serde::{Deserialize, Serialize};

use crate::error::TrackingError;
use crate::mesh::PolyMesh;
use crate::mesh::patch::{BoundaryCategory, PatchKind, PatchTransform};
use crate::particle::MeshPosition;
use crate::particle::record::ParticleRecord;
use crate::{Tag, Vector};
use interaction::{PatchInteractions, hit_patch};

/// What the tracker needs from a mesh-tracked entity.
pub trait Tracked {
    fn coords(&self) -> &MeshPosition;
    fn coords_mut(&mut self) -> &mut MeshPosition;
    /// Velocity used to advect the entity.
    fn advection_velocity(&self) -> Vector;
    fn tag(&self) -> Tag;
    fn transform_properties(&mut self, transform: &PatchTransform);
    fn rebound(&mut self, normal: Vector, restitution: f64);
    fn to_record(&self) -> ParticleRecord;
}

fn default_max_face_crossings() -> usize {
    1000
}

fn default_tolerance() -> f64 {
    1e-9
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSettings {
    /// Face crossings allowed per call before recovery kicks in.
    #[serde(default = "default_max_face_crossings")]
    pub max_face_crossings: usize,
    /// Relative slack on the crossing fraction and the recovery nudge.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            max_face_crossings: default_max_face_crossings(),
            tolerance: default_tolerance(),
        }
    }
}

/// Outbound migration produced by a processor-patch hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub rank: usize,
    /// Record with `face` set to the index local to the processor patch
    /// and `carry` set to the time the move still needed.
    pub record: ParticleRecord,
}

/// Per-call tracking context.
pub struct TrackingData<'a> {
    pub mesh: &'a PolyMesh,
    pub interactions: &'a PatchInteractions,
    pub settings: TrackingSettings,
    /// Set when the particle left through a processor patch.
    pub transfer: Option<Transfer>,
    /// Faces crossed during the call.
    pub crossings: usize,
}

impl<'a> TrackingData<'a> {
    pub fn new(mesh: &'a PolyMesh, interactions: &'a PatchInteractions, settings: TrackingSettings) -> Self {
        Self {
            mesh,
            interactions,
            settings,
            transfer: None,
            crossings: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Advancing,
    InternalCross { face: usize },
    ProcessorHit { face: usize, patch: usize },
    PhysicalHit { face: usize, patch: usize },
    Migrating,
    Done { keep: bool },
}

/// Exit face of the segment `disp` starting at the entity position, with
/// the fraction of `disp` at which it is reached.
fn find_exit(mesh: &PolyMesh, coords: &MeshPosition, disp: Vector) -> Option<(usize, f64)> {
    let cell = coords.cell;
    let mut best: Option<(usize, f64)> = None;
    for &f in mesh.cell_faces(cell) {
        let n = mesh.outward_normal(cell, f);
        let denom = n.dot(disp);
        if denom <= 0. {
            continue;
        }
        let lambda = (n.dot(mesh.face_centre(f) - coords.position) / denom).max(0.);
        if best.is_none_or(|(_, l)| lambda < l) {
            best = Some((f, lambda));
        }
    }
    best
}

/// Advances `p` by the rest of an increment of length `dt`.
///
/// Returns `Ok(true)` while the particle stays resident and `Ok(false)`
/// when it was deleted or handed to `td.transfer` for migration.
pub fn move_particle<P: Tracked>(p: &mut P, td: &mut TrackingData, dt: f64) -> Result<bool> {
    if dt == 0. {
        return Ok(true);
    }
    if !(dt.is_finite() && dt > 0.) {
        return Err(TrackingError::InvariantViolation(format!("time step must be positive, got {dt}")).into());
    }
    let mesh = td.mesh;
    let tol = td.settings.tolerance;
    let mut crossings_this_try = 0;
    let mut recovered = false;
    let mut phase = Phase::Advancing;

    loop {
        phase = match phase {
            Phase::Advancing => {
                if p.coords().step_fraction >= 1. {
                    Phase::Done { keep: true }
                } else if crossings_this_try >= td.settings.max_face_crossings {
                    if recovered {
                        return Err(TrackingError::GeometryDegenerate {
                            tag: p.tag(),
                            cell: p.coords().cell,
                            crossings: td.crossings,
                        }
                        .into());
                    }
                    relocate(p, mesh, tol)?;
                    recovered = true;
                    crossings_this_try = 0;
                    Phase::Advancing
                } else {
                    let remaining = 1. - p.coords().step_fraction;
                    let disp = p.advection_velocity() * (dt * remaining);
                    match find_exit(mesh, p.coords(), disp) {
                        Some((face, lambda)) if lambda <= 1. + tol => {
                            let lambda = lambda.min(1.);
                            let coords = p.coords_mut();
                            coords.position = coords.position + disp * lambda;
                            coords.step_fraction = (coords.step_fraction + remaining * lambda).min(1.);
                            coords.face = Some(face);
                            crossings_this_try += 1;
                            td.crossings += 1;
                            trace!(
                                "Particle {} reached face {face} of cell {} at fraction {}",
                                p.tag(),
                                p.coords().cell,
                                p.coords().step_fraction
                            );
                            match mesh.which_patch(face) {
                                None => Phase::InternalCross { face },
                                Some(patch) => match mesh.patch(patch).kind.category() {
                                    BoundaryCategory::Processor => Phase::ProcessorHit { face, patch },
                                    BoundaryCategory::Physical => Phase::PhysicalHit { face, patch },
                                },
                            }
                        }
                        _ => {
                            let coords = p.coords_mut();
                            coords.position = coords.position + disp;
                            coords.step_fraction = 1.;
                            coords.face = None;
                            Phase::Done { keep: true }
                        }
                    }
                }
            }
            Phase::InternalCross { face } => {
                let coords = p.coords_mut();
                coords.cell = mesh.other_cell(face, coords.cell);
                Phase::Advancing
            }
            Phase::ProcessorHit { face, patch } => {
                let patch = mesh.patch(patch);
                let PatchKind::Processor { neighbour_rank } = patch.kind else {
                    bail!("patch '{}' is not a processor patch", patch.name);
                };
                let mut record = p.to_record();
                record.face = (face - patch.start) as i64;
                record.carry = (1. - p.coords().step_fraction) * dt;
                td.transfer = Some(Transfer {
                    rank: neighbour_rank,
                    record,
                });
                Phase::Migrating
            }
            Phase::PhysicalHit { face, patch } => {
                if hit_patch(p, mesh, td.interactions, patch, face)? {
                    Phase::Advancing
                } else {
                    Phase::Done { keep: false }
                }
            }
            Phase::Migrating => return Ok(false),
            Phase::Done { keep } => return Ok(keep),
        };
    }
}

/// Puts a stuck particle back into a cell that contains it and nudges it
/// off faces and vertices towards the cell centre.
fn relocate<P: Tracked>(p: &mut P, mesh: &PolyMesh, tol: f64) -> Result<()> {
    let coords = *p.coords();
    warn!(
        "Particle {} exceeded the face crossing limit in cell {}, relocating",
        p.tag(),
        coords.cell
    );
    let Some(cell) = mesh.locate(coords.position, Some(coords.cell)) else {
        return Err(TrackingError::GeometryDegenerate {
            tag: p.tag(),
            cell: coords.cell,
            crossings: 0,
        }
        .into());
    };
    let centre = mesh.cell_centre(cell);
    let nudge = (centre - coords.position) * tol.sqrt();
    let c = p.coords_mut();
    c.cell = cell;
    c.position = c.position + nudge;
    c.face = None;
    Ok(())
}
