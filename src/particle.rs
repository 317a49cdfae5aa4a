//! Soft particle state.
//!
//! A [`Particle`] is composed of a [`MeshPosition`] (where it is in the
//! mesh) and its physical payload. The tracker only sees it through
//! [`Tracked`].

pub mod history;
pub mod record;

use anyhow::{Result, ensure};
use std::f64::consts::PI;

use crate::coupling::BlendLaw;
use crate::error::TrackingError;
use crate::mesh::PolyMesh;
use crate::mesh::patch::PatchTransform;
use crate::tracking::Tracked;
use crate::{Point, Tag, Vector};
use history::HistoryForce;
use record::ParticleRecord;

/// Location of a tracked entity in the mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshPosition {
    pub position: Point,
    pub cell: usize,
    /// Fraction of the current increment already travelled, in `[0, 1]`.
    pub step_fraction: f64,
    /// Face the entity currently sits on.
    pub face: Option<usize>,
    /// Time left over from an earlier increment, travelled at the start of
    /// the next one. Non-zero after a migration cut a move short.
    pub carry: f64,
}

impl MeshPosition {
    /// Fails unless `cell` exists and contains `position`.
    pub fn new(mesh: &PolyMesh, position: Point, cell: usize) -> Result<Self> {
        if cell >= mesh.n_cells() {
            return Err(TrackingError::InvariantViolation(format!(
                "cell {cell} is out of range ({} cells)",
                mesh.n_cells()
            ))
            .into());
        }
        if !mesh.cell_contains(cell, position) {
            return Err(TrackingError::InvariantViolation(format!(
                "position {position} is not inside cell {cell}"
            ))
            .into());
        }
        Ok(Self {
            position,
            cell,
            step_fraction: 0.,
            face: None,
            carry: 0.,
        })
    }
}

fn check_properties(d: f64, rho: f64) -> Result<()> {
    if !(d.is_finite() && d > 0.) {
        return Err(TrackingError::InvariantViolation(format!("diameter must be positive, got {d}")).into());
    }
    if !(rho.is_finite() && rho > 0.) {
        return Err(TrackingError::InvariantViolation(format!("density must be positive, got {rho}")).into());
    }
    Ok(())
}

/// Volume of a sphere of diameter `d`.
pub fn sphere_volume(d: f64) -> f64 {
    PI * d.powi(3) / 6.
}

#[derive(Debug, Clone, PartialEq)]
pub struct Particle {
    pub coords: MeshPosition,
    d: f64,
    rho: f64,
    mass: f64,
    /// True velocity, authoritative at coupling updates only.
    pub u: Vector,
    /// Blended velocity used for advection.
    pub move_u: Vector,
    pub ensemble_u: Vector,
    pub position_old: Point,
    pub u_old: Vector,
    tag: Tag,
    /// Last known owner in the dynamics engine, -1 when unknown.
    pub engine_rank: i64,
    pub kind: i64,
    pub history: HistoryForce,
}

impl Particle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mesh: &PolyMesh,
        position: Point,
        cell: usize,
        d: f64,
        u: Vector,
        rho: f64,
        tag: Tag,
        engine_rank: i64,
        kind: i64,
    ) -> Result<Self> {
        check_properties(d, rho)?;
        let coords = MeshPosition::new(mesh, position, cell)?;
        Ok(Self {
            coords,
            d,
            rho,
            mass: rho * sphere_volume(d),
            u,
            move_u: u,
            ensemble_u: Vector::ZERO,
            position_old: position,
            u_old: u,
            tag,
            engine_rank,
            kind,
            history: HistoryForce::new(),
        })
    }

    /// Rebuilds a particle from its flat record.
    ///
    /// The record's cell and face are taken as mesh indices of `mesh`.
    pub fn from_record(mesh: &PolyMesh, rec: &ParticleRecord) -> Result<Self> {
        check_properties(rec.diameter, rec.density)?;
        let expected = rec.density * sphere_volume(rec.diameter);
        ensure!(
            (rec.mass - expected).abs() <= 1e-12 * expected,
            TrackingError::InvariantViolation(format!(
                "particle #{} has mass {} but its diameter and density give {}",
                rec.tag, rec.mass, expected
            ))
        );
        let position = Point::from_array(rec.position);
        let mut coords = MeshPosition::new(mesh, position, rec.cell as usize)?;
        coords.step_fraction = rec.step_fraction;
        ensure!(
            rec.carry.is_finite() && rec.carry >= 0.,
            TrackingError::InvariantViolation(format!("particle #{} owes {} s of motion", rec.tag, rec.carry))
        );
        coords.carry = rec.carry;
        coords.face = match rec.face {
            -1 => None,
            f if f >= 0 && (f as usize) < mesh.n_faces() => Some(f as usize),
            f => {
                return Err(TrackingError::SerializationMismatch(format!(
                    "particle #{} refers to face {f} of a {}-face mesh",
                    rec.tag,
                    mesh.n_faces()
                ))
                .into());
            }
        };
        Ok(Self {
            coords,
            d: rec.diameter,
            rho: rec.density,
            mass: rec.mass,
            u: Vector::from_array(rec.u),
            move_u: Vector::from_array(rec.move_u),
            ensemble_u: Vector::from_array(rec.ensemble_u),
            position_old: Point::from_array(rec.position_old),
            u_old: Vector::from_array(rec.u_old),
            tag: Tag(rec.tag),
            engine_rank: rec.engine_rank,
            kind: rec.kind,
            history: HistoryForce::restore(rec.n0, Vector::from_array(rec.sum_delta_fb)),
        })
    }

    pub fn to_record(&self) -> ParticleRecord {
        ParticleRecord {
            cell: self.coords.cell as u64,
            position: self.coords.position.to_array(),
            step_fraction: self.coords.step_fraction,
            face: self.coords.face.map_or(-1, |f| f as i64),
            carry: self.coords.carry,
            diameter: self.d,
            mass: self.mass,
            u: self.u.to_array(),
            move_u: self.move_u.to_array(),
            ensemble_u: self.ensemble_u.to_array(),
            position_old: self.position_old.to_array(),
            u_old: self.u_old.to_array(),
            tag: self.tag.0,
            engine_rank: self.engine_rank,
            kind: self.kind,
            density: self.rho,
            n0: self.history.n0(),
            sum_delta_fb: self.history.sum_delta_fb().to_array(),
        }
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn position(&self) -> Point {
        self.coords.position
    }

    pub fn cell(&self) -> usize {
        self.coords.cell
    }

    pub fn diameter(&self) -> f64 {
        self.d
    }

    pub fn density(&self) -> f64 {
        self.rho
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn vol(&self) -> f64 {
        sphere_volume(self.d)
    }

    /// Replaces diameter and density. The mass follows.
    pub fn set_properties(&mut self, d: f64, rho: f64) -> Result<()> {
        check_properties(d, rho)?;
        self.d = d;
        self.rho = rho;
        self.mass = rho * sphere_volume(d);
        Ok(())
    }

    /// Recomputes the quantities derived from a coupling update.
    ///
    /// Re-validates `d` and `rho`, refreshes the mass and blends `move_u`
    /// from the last two authoritative states.
    pub fn calculate_derived(&mut self, law: BlendLaw, period: f64) -> Result<()> {
        check_properties(self.d, self.rho)?;
        self.mass = self.rho * sphere_volume(self.d);
        self.move_u = match law {
            BlendLaw::Average => (self.u_old + self.u) * 0.5,
            BlendLaw::Latest => self.u,
            BlendLaw::Secant => {
                if !(period.is_finite() && period > 0.) {
                    return Err(TrackingError::InvariantViolation(format!(
                        "secant blending needs a positive coupling period, got {period}"
                    ))
                    .into());
                }
                (self.coords.position - self.position_old) * (1. / period)
            }
        };
        Ok(())
    }

    /// Maps every orientation-sensitive field through a boundary transform.
    ///
    /// Velocities and the history sum are rotated; the previous position is
    /// mapped as a point. Translations only move `position_old`.
    pub fn transform_properties(&mut self, transform: &PatchTransform) {
        self.u = transform.apply_to_vector(self.u);
        self.move_u = transform.apply_to_vector(self.move_u);
        self.ensemble_u = transform.apply_to_vector(self.ensemble_u);
        self.u_old = transform.apply_to_vector(self.u_old);
        self.history.transform(transform);
        self.position_old = transform.apply_to_point(self.position_old);
    }

    /// Reflects the velocity components moving into a wall with outward
    /// unit normal `normal`: `v' = v - (1 + e)(v.n)n`.
    pub fn rebound(&mut self, normal: Vector, restitution: f64) {
        for v in [&mut self.u, &mut self.move_u] {
            let vn = v.dot(normal);
            if vn > 0. {
                *v = *v - normal * ((1. + restitution) * vn);
            }
        }
    }
}

impl Tracked for Particle {
    fn coords(&self) -> &MeshPosition {
        &self.coords
    }

    fn coords_mut(&mut self) -> &mut MeshPosition {
        &mut self.coords
    }

    fn advection_velocity(&self) -> Vector {
        self.move_u
    }

    fn tag(&self) -> Tag {
        self.tag
    }

    fn transform_properties(&mut self, transform: &PatchTransform) {
        Particle::transform_properties(self, transform);
    }

    fn rebound(&mut self, normal: Vector, restitution: f64) {
        Particle::rebound(self, normal, restitution);
    }

    fn to_record(&self) -> ParticleRecord {
        Particle::to_record(self)
    }
}
