//! Batch field I/O for a whole cloud.
//!
//! Each particle attribute is stored as its own array, indexed by particle
//! order. The JSON form round-trips every float exactly, so a cloud written
//! and read back is bit-identical, history state included.

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::cloud::Cloud;
use crate::error::TrackingError;
use crate::particle::record::ParticleRecord;
use crate::{Particle, Point, Tag, Vector};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudFields {
    pub position: Vec<Point>,
    pub cell: Vec<usize>,
    pub step_fraction: Vec<f64>,
    pub carry: Vec<f64>,
    pub d: Vec<f64>,
    pub mass: Vec<f64>,
    pub u: Vec<Vector>,
    pub move_u: Vec<Vector>,
    pub ensemble_u: Vec<Vector>,
    pub position_old: Vec<Point>,
    pub u_old: Vec<Vector>,
    pub tag: Vec<Tag>,
    pub engine_rank: Vec<i64>,
    pub kind: Vec<i64>,
    pub rho: Vec<f64>,
    pub n0: Vec<u64>,
    pub sum_delta_fb: Vec<Vector>,
}

impl CloudFields {
    pub fn from_cloud(cloud: &Cloud) -> Self {
        let mut f = Self::default();
        for p in cloud.iter() {
            f.position.push(p.position());
            f.cell.push(p.cell());
            f.step_fraction.push(p.coords.step_fraction);
            f.carry.push(p.coords.carry);
            f.d.push(p.diameter());
            f.mass.push(p.mass());
            f.u.push(p.u);
            f.move_u.push(p.move_u);
            f.ensemble_u.push(p.ensemble_u);
            f.position_old.push(p.position_old);
            f.u_old.push(p.u_old);
            f.tag.push(p.tag());
            f.engine_rank.push(p.engine_rank);
            f.kind.push(p.kind);
            f.rho.push(p.density());
            f.n0.push(p.history.n0());
            f.sum_delta_fb.push(p.history.sum_delta_fb());
        }
        f
    }

    /// Number of particles. Fails if the arrays disagree.
    pub fn len(&self) -> Result<usize> {
        let lengths = [
            ("cell", self.cell.len()),
            ("stepFraction", self.step_fraction.len()),
            ("carry", self.carry.len()),
            ("d", self.d.len()),
            ("mass", self.mass.len()),
            ("u", self.u.len()),
            ("moveU", self.move_u.len()),
            ("ensembleU", self.ensemble_u.len()),
            ("positionOld", self.position_old.len()),
            ("uOld", self.u_old.len()),
            ("tag", self.tag.len()),
            ("engineRank", self.engine_rank.len()),
            ("kind", self.kind.len()),
            ("rho", self.rho.len()),
            ("n0", self.n0.len()),
            ("sumDeltaFb", self.sum_delta_fb.len()),
        ];
        let n = self.position.len();
        for (name, len) in lengths {
            if len != n {
                return Err(TrackingError::SerializationMismatch(format!(
                    "field '{name}' has {len} entries for {n} particles"
                ))
                .into());
            }
        }
        Ok(n)
    }

    pub fn is_empty(&self) -> bool {
        self.position.is_empty()
    }

    /// Per-particle records, in field order.
    pub fn records(&self) -> Result<Vec<ParticleRecord>> {
        let n = self.len()?;
        Ok((0..n)
            .map(|i| ParticleRecord {
                cell: self.cell[i] as u64,
                position: self.position[i].to_array(),
                step_fraction: self.step_fraction[i],
                face: -1,
                carry: self.carry[i],
                diameter: self.d[i],
                mass: self.mass[i],
                u: self.u[i].to_array(),
                move_u: self.move_u[i].to_array(),
                ensemble_u: self.ensemble_u[i].to_array(),
                position_old: self.position_old[i].to_array(),
                u_old: self.u_old[i].to_array(),
                tag: self.tag[i].value(),
                engine_rank: self.engine_rank[i],
                kind: self.kind[i],
                density: self.rho[i],
                n0: self.n0[i],
                sum_delta_fb: self.sum_delta_fb[i].to_array(),
            })
            .collect())
    }

    /// Rebuilds the particles into `cloud`. Returns how many were added.
    pub fn restore(&self, cloud: &mut Cloud) -> Result<usize> {
        let records = self.records()?;
        let mesh = cloud.mesh();
        for rec in &records {
            let p = Particle::from_record(mesh, rec)
                .with_context(|| format!("Failed to restore particle #{}", rec.tag))?;
            cloud.insert(p)?;
        }
        Ok(records.len())
    }
}

pub fn write_fields(path: &Path, fields: &CloudFields) -> Result<()> {
    fields.len()?;
    let file = File::create(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;
    let writer = BufWriter::new(file);

    serde_json::to_writer(writer, fields)
        .with_context(|| format!("Failed to serialize cloud fields to: {}", path.display()))?;

    Ok(())
}

pub fn read_fields(path: &Path) -> Result<CloudFields> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;
    let reader = BufReader::new(file);

    let fields: CloudFields = serde_json::from_reader(reader)
        .with_context(|| format!("Failed to deserialize cloud fields from: {}", path.display()))?;
    fields.len()?;

    Ok(fields)
}

/// Writes every resident particle of `cloud`.
pub fn write_checkpoint(path: &Path, cloud: &Cloud) -> Result<()> {
    let fields = CloudFields::from_cloud(cloud);
    write_fields(path, &fields)?;
    info!("Wrote {} particles to {}", cloud.len(), path.display());
    Ok(())
}

/// Adds the particles of a checkpoint to `cloud`.
pub fn read_checkpoint(path: &Path, cloud: &mut Cloud) -> Result<usize> {
    let n = read_fields(path)?.restore(cloud)?;
    info!("Restored {n} particles from {}", path.display());
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::config::CloudConfig;
    use crate::mesh::PolyMesh;
    use crate::mesh::block::{BlockMesh, Side};
    use crate::particle::history::HistoryForce;
    use crate::tracking::interaction::InteractionKind;
    use tempfile::tempdir;

    fn mesh() -> PolyMesh {
        BlockMesh::uniform(Point::new(0., 0., 0.), Point::new(1., 1., 1.), [3, 3, 3])
            .unwrap()
            .build()
            .unwrap()
    }

    fn config() -> CloudConfig {
        Side::ALL
            .iter()
            .fold(CloudConfig::new("io"), |c, s| c.with_interaction(s.default_name(), InteractionKind::Escape))
    }

    #[test]
    fn test_checkpoint_round_trip() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("cloud.json");
        let mesh = mesh();

        let mut cloud = Cloud::new(&mesh, config())?;
        for i in 0..5 {
            let at = Point::new(0.1 + 0.17 * i as f64, 1. / 3., 0.7);
            let cell = mesh.find_cell(at).unwrap();
            let mut p = Particle::new(&mesh, at, cell, 1e-3 * (1. + 0.1 * i as f64), Vector::new(0.1, 0.2, 0.3), 997.3, Tag(10 + i), 1, i)?;
            p.move_u = Vector::new(1. / 3., -2. / 7., 1e-300);
            p.history = HistoryForce::restore(i as u64 * 3, Vector::new(0.1 / 3., f64::EPSILON, -1e10));
            p.coords.carry = 0.3 / 7. * i as f64;
            cloud.insert(p)?;
        }
        write_checkpoint(&path, &cloud)?;

        let mut restored = Cloud::new(&mesh, config())?;
        assert_eq!(read_checkpoint(&path, &mut restored)?, 5);
        let a: Vec<_> = cloud.iter().collect();
        let b: Vec<_> = restored.iter().collect();
        assert_eq!(a, b);
        assert_eq!(restored.tags().peek(), Tag(15));
        Ok(())
    }

    #[test]
    fn test_empty_cloud() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("empty.json");
        let mesh = mesh();
        let cloud = Cloud::new(&mesh, config())?;
        write_checkpoint(&path, &cloud)?;
        let fields = read_fields(&path)?;
        assert!(fields.is_empty());
        assert_eq!(fields.len()?, 0);
        let mut restored = Cloud::new(&mesh, config())?;
        assert_eq!(read_checkpoint(&path, &mut restored)?, 0);
        Ok(())
    }

    #[test]
    fn test_length_mismatch() -> Result<()> {
        let mesh = mesh();
        let mut cloud = Cloud::new(&mesh, config())?;
        let at = Point::new(0.5, 0.5, 0.5);
        cloud.insert(Particle::new(&mesh, at, mesh.find_cell(at).unwrap(), 1e-3, Vector::ZERO, 1e3, Tag(0), 0, 0)?)?;
        let mut fields = CloudFields::from_cloud(&cloud);
        fields.n0.push(4);
        let err = fields.len().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TrackingError>(),
            Some(TrackingError::SerializationMismatch(_))
        ));

        let dir = tempdir()?;
        let path = dir.path().join("bad.json");
        assert!(write_fields(&path, &fields).is_err());
        Ok(())
    }
}
