//! Reconciliation with the external particle dynamics engine.
//!
//! Once per coupling period the engine supplies the authoritative state of
//! every particle it knows. Between updates the flow solver advects the
//! particles with a blended velocity so that the motion has no jump at the
//! next update.

use anyhow::Result;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::cloud::Cloud;
use crate::cloud::config::CloudConfig;
use crate::mesh::PolyMesh;
use crate::{Particle, Point, Tag, Vector};

/// Rule for the advection velocity between two coupling updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BlendLaw {
    /// Mean of the previous and the new engine velocity.
    #[default]
    Average,
    /// Displacement between the last two positions over the period.
    Secant,
    /// The new engine velocity as is.
    Latest,
}

/// Authoritative state of one particle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSample {
    pub tag: Tag,
    pub position: Point,
    pub velocity: Vector,
    pub diameter: f64,
    pub density: f64,
    #[serde(default)]
    pub kind: i64,
    #[serde(default)]
    pub engine_rank: i64,
}

/// One coupling cycle worth of engine state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CouplingUpdate {
    pub time: f64,
    pub samples: Vec<EngineSample>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CouplingReport {
    pub updated: usize,
    pub created: usize,
    /// Samples of particles living on another rank, or new particles
    /// located in another partition.
    pub skipped_remote: usize,
    /// Known particles whose new position is not in this partition. They
    /// are handed to the owning rank at the next exchange.
    pub relocated: Vec<Tag>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CouplingBridge {
    pub law: BlendLaw,
    pub period: f64,
}

impl CouplingBridge {
    pub fn new(law: BlendLaw, period: f64) -> Self {
        Self { law, period }
    }

    pub fn from_config(config: &CloudConfig) -> Self {
        Self::new(config.blend, config.coupling_period)
    }

    /// Installs an engine update into the resident particles of `cloud`.
    ///
    /// Particles the update does not mention are left untouched. A sample
    /// with a tag never seen before creates a particle on the one rank that
    /// claims its position. A resident particle moved out of the partition
    /// is handed off. Every rank should receive the same update so that the
    /// tag allocator replicas stay in step.
    pub fn apply(&self, cloud: &mut Cloud, update: &CouplingUpdate) -> Result<CouplingReport> {
        let mut report = CouplingReport::default();
        let mesh = cloud.mesh();
        // Tags below this were issued before the update and live elsewhere
        let first_new = cloud.tags().peek();
        for sample in &update.samples {
            cloud.tags_mut().observe(sample.tag);
            if let Some(p) = cloud.get_mut(sample.tag) {
                let located = self.update_particle(p, sample, mesh)?;
                report.updated += 1;
                if !located {
                    cloud.hand_off(sample.tag);
                    report.relocated.push(sample.tag);
                }
                continue;
            }
            if sample.tag < first_new {
                report.skipped_remote += 1;
                continue;
            }
            let Some(cell) = mesh.claim(sample.position) else {
                report.skipped_remote += 1;
                continue;
            };
            let p = Particle::new(
                mesh,
                sample.position,
                cell,
                sample.diameter,
                sample.velocity,
                sample.density,
                sample.tag,
                sample.engine_rank,
                sample.kind,
            )?;
            cloud.insert(p)?;
            report.created += 1;
        }
        info!(
            "Coupling at t = {}: {} updated, {} created, {} remote, {} relocated",
            update.time,
            report.updated,
            report.created,
            report.skipped_remote,
            report.relocated.len()
        );
        Ok(report)
    }

    /// Returns whether the new position lies in this partition.
    fn update_particle(&self, p: &mut Particle, sample: &EngineSample, mesh: &PolyMesh) -> Result<bool> {
        p.u_old = p.u;
        p.position_old = p.coords.position;
        p.u = sample.velocity;
        p.engine_rank = sample.engine_rank;
        p.set_properties(sample.diameter, sample.density)?;
        let located = match mesh.locate(sample.position, Some(p.coords.cell)) {
            Some(cell) => {
                p.coords.cell = cell;
                true
            }
            None => {
                debug!(
                    "Engine moved particle {} to {}, outside this partition",
                    p.tag(),
                    sample.position
                );
                false
            }
        };
        p.coords.position = sample.position;
        p.coords.face = None;
        p.calculate_derived(self.law, self.period)?;
        Ok(located)
    }
}
