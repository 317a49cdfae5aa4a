use anyhow::{Result, ensure};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::Cloud;
use crate::{Particle, Point, Tag, Vector};

/// Random particles inside an axis-aligned box.
///
/// The draw depends only on the seed, so every rank generates the same
/// particles and keeps those its own partition claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Injection {
    pub min: Point,
    pub max: Point,
    pub count: usize,
    pub diameter: f64,
    pub density: f64,
    pub velocity: Vector,
    #[serde(default)]
    pub kind: i64,
    pub seed: u64,
}

impl Cloud<'_> {
    /// Injects the locally located part of `injection`.
    ///
    /// Reserves `count` tags on every rank, so the allocator replicas stay
    /// in step. Returns the tags of the particles created here.
    pub fn inject(&mut self, injection: &Injection) -> Result<Vec<Tag>> {
        let (lo, hi) = (injection.min, injection.max);
        ensure!(
            lo.x < hi.x && lo.y < hi.y && lo.z < hi.z,
            "injection box {lo} .. {hi} is empty"
        );
        let mut rng = StdRng::seed_from_u64(injection.seed);
        let mesh = self.mesh();
        let mut created = Vec::new();
        for tag in self.tags_mut().reserve(injection.count) {
            let at = Point::new(
                rng.gen_range(lo.x..hi.x),
                rng.gen_range(lo.y..hi.y),
                rng.gen_range(lo.z..hi.z),
            );
            let Some(cell) = mesh.claim(at) else {
                continue;
            };
            let p = Particle::new(
                mesh,
                at,
                cell,
                injection.diameter,
                injection.velocity,
                injection.density,
                Tag(tag),
                -1,
                injection.kind,
            )?;
            self.insert(p)?;
            created.push(Tag(tag));
        }
        info!(
            "{}: injected {} of {} particles",
            self.config().name,
            created.len(),
            injection.count
        );
        Ok(created)
    }
}
