//! Particles resident on one rank.
//!
//! A [`Cloud`] advances all of its particles through the local mesh
//! partition and then takes part in one collective exchange per increment.
//! Particles leaving through a processor patch are held as records in
//! `pending` until the exchange succeeds, so a failed exchange never loses
//! them silently. Particles an engine update placed outside the local
//! partition wait in `relocations` and are offered to every other rank.

pub mod config;
pub mod injection;

use anyhow::Result;
use indexmap::IndexMap;
use log::{debug, info};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};

use crate::coupling::{CouplingBridge, CouplingReport, CouplingUpdate};
use crate::error::TrackingError;
use crate::mesh::PolyMesh;
use crate::particle::history::HistoryModel;
use crate::particle::record::{ParticleRecord, decode_records, encode_records};
use crate::tag::TagAllocator;
use crate::tracking::interaction::PatchInteractions;
use crate::tracking::{TrackingData, Transfer, move_particle};
use crate::transfer::{Envelope, Transport};
use crate::{Particle, Point, Tag, Vector};
use config::CloudConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrackSummary {
    pub tracked: usize,
    pub absorbed: usize,
    pub migrated: usize,
    pub crossings: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExchangeSummary {
    pub sent: usize,
    pub received: usize,
    /// Relocated particles this rank took over.
    pub claimed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepReport {
    pub track: TrackSummary,
    pub exchange: ExchangeSummary,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CloudStatistics {
    pub count: usize,
    pub mass: f64,
    pub momentum: Vector,
    pub kinetic_energy: f64,
}

enum Outcome {
    Resident,
    Absorbed,
    Migrating(Transfer),
}

pub struct Cloud<'m> {
    mesh: &'m PolyMesh,
    config: CloudConfig,
    interactions: PatchInteractions,
    particles: IndexMap<Tag, Particle>,
    pending: Vec<Transfer>,
    /// Records with face -1, placed by position on arrival.
    relocations: Vec<ParticleRecord>,
    tags: TagAllocator,
}

impl<'m> Cloud<'m> {
    /// Fails when a wall or open patch of `mesh` has no registered
    /// interaction.
    pub fn new(mesh: &'m PolyMesh, config: CloudConfig) -> Result<Self> {
        let interactions = PatchInteractions::new(mesh, &config.interactions)?;
        Ok(Self {
            mesh,
            config,
            interactions,
            particles: IndexMap::new(),
            pending: Vec::new(),
            relocations: Vec::new(),
            tags: TagAllocator::default(),
        })
    }

    pub fn mesh(&self) -> &'m PolyMesh {
        self.mesh
    }

    pub fn config(&self) -> &CloudConfig {
        &self.config
    }

    pub fn tags(&self) -> &TagAllocator {
        &self.tags
    }

    pub fn tags_mut(&mut self) -> &mut TagAllocator {
        &mut self.tags
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn get(&self, tag: Tag) -> Option<&Particle> {
        self.particles.get(&tag)
    }

    pub fn get_mut(&mut self, tag: Tag) -> Option<&mut Particle> {
        self.particles.get_mut(&tag)
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.particles.contains_key(&tag)
    }

    /// Particles in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Particle> {
        self.particles.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Particle> {
        self.particles.values_mut()
    }

    /// Records waiting for the next exchange.
    pub fn pending(&self) -> &[Transfer] {
        &self.pending
    }

    /// Particles waiting to be claimed by the rank owning their position.
    pub fn relocations(&self) -> &[ParticleRecord] {
        &self.relocations
    }

    /// Takes a particle out of the cloud and offers it to the other ranks
    /// at the next exchange.
    pub(crate) fn hand_off(&mut self, tag: Tag) {
        if let Some(p) = self.particles.shift_remove(&tag) {
            let mut record = p.to_record();
            record.face = -1;
            self.relocations.push(record);
        }
    }

    pub fn insert(&mut self, particle: Particle) -> Result<()> {
        let tag = particle.tag();
        if self.particles.contains_key(&tag) {
            return Err(TrackingError::InvariantViolation(format!("particle {tag} is already resident")).into());
        }
        self.tags.observe(tag);
        self.particles.insert(tag, particle);
        Ok(())
    }

    pub fn remove(&mut self, tag: Tag) -> Option<Particle> {
        self.particles.shift_remove(&tag)
    }

    pub fn clear(&mut self) {
        self.particles.clear();
    }

    /// Advances every resident particle by `dt`, plus any time it still
    /// owes from an interrupted move.
    ///
    /// Absorbed particles are deleted, particles hitting a processor patch
    /// are moved to the pending list. When a particle fails to track, the
    /// others are still settled this way, the failed one stays resident
    /// where it stopped, and the first failure is returned.
    pub fn track(&mut self, dt: f64) -> Result<TrackSummary> {
        let mesh = self.mesh;
        let interactions = &self.interactions;
        let settings = self.config.tracking;
        let step = |p: &mut Particle| -> Result<(Outcome, usize)> {
            p.coords.step_fraction = 0.;
            let span = dt + p.coords.carry;
            let mut td = TrackingData::new(mesh, interactions, settings);
            let keep = move_particle(p, &mut td, span)?;
            p.coords.carry = 0.;
            let outcome = match (keep, td.transfer) {
                (true, _) => Outcome::Resident,
                (false, Some(t)) => Outcome::Migrating(t),
                (false, None) => Outcome::Absorbed,
            };
            Ok((outcome, td.crossings))
        };
        for record in &mut self.relocations {
            record.carry += dt;
        }
        let results: Vec<(Tag, Result<(Outcome, usize)>)> = if self.config.parallel {
            self.particles
                .par_iter_mut()
                .map(|(tag, p)| (*tag, step(p)))
                .collect()
        } else {
            self.particles
                .iter_mut()
                .map(|(tag, p)| (*tag, step(p)))
                .collect()
        };

        let mut summary = TrackSummary::default();
        let mut gone = HashSet::new();
        let mut failure = None;
        for (tag, result) in results {
            let (outcome, crossings) = match result {
                Ok(r) => r,
                Err(e) => {
                    failure.get_or_insert(e);
                    continue;
                }
            };
            summary.tracked += 1;
            summary.crossings += crossings;
            match outcome {
                Outcome::Resident => {}
                Outcome::Absorbed => {
                    summary.absorbed += 1;
                    gone.insert(tag);
                }
                Outcome::Migrating(t) => {
                    debug!("Particle {tag} leaves for rank {}", t.rank);
                    summary.migrated += 1;
                    gone.insert(tag);
                    self.pending.push(t);
                }
            }
        }
        if !gone.is_empty() {
            self.particles.retain(|tag, _| !gone.contains(tag));
        }
        if let Some(e) = failure {
            return Err(e);
        }
        info!(
            "{}: tracked {}, absorbed {}, migrating {}, {} face crossings",
            self.config.name, summary.tracked, summary.absorbed, summary.migrated, summary.crossings
        );
        Ok(summary)
    }

    /// Collective migration pass. Every rank must call it once per
    /// increment, also with nothing to send.
    ///
    /// Inbound particles are placed on the owner of the matching face of
    /// the processor patch shared with the sender. They are not advanced
    /// again in this increment. Relocated particles go to every other rank
    /// and are kept by the one that claims their position; the ranks then
    /// agree that each of them was claimed exactly once.
    pub fn exchange<T: Transport>(&mut self, transport: &mut T) -> Result<ExchangeSummary> {
        let rank = transport.rank();
        let mut by_dest: BTreeMap<usize, Vec<ParticleRecord>> = BTreeMap::new();
        for t in &self.pending {
            by_dest.entry(t.rank).or_default().push(t.record);
        }
        if !self.relocations.is_empty() {
            for other in (0..transport.n_ranks()).filter(|&r| r != rank) {
                by_dest.entry(other).or_default().extend_from_slice(&self.relocations);
            }
        }
        let outbound = by_dest
            .into_iter()
            .map(|(dest, records)| Envelope {
                source: rank,
                dest,
                payload: encode_records(&records),
            })
            .collect();
        let inbound = transport.exchange(outbound)?;
        let sent = self.pending.len() + self.relocations.len();
        let offered = self.relocations.len() as u64;
        self.pending.clear();
        self.relocations.clear();

        let mut received = 0;
        let mut claimed = 0;
        for env in inbound {
            for record in decode_records(&env.payload)? {
                let particle = if record.face < 0 {
                    match self.settle(env.source, rank, record)? {
                        Some(p) => {
                            claimed += 1;
                            p
                        }
                        None => continue,
                    }
                } else {
                    self.arrive(env.source, rank, record)?
                };
                self.tags.observe(particle.tag());
                self.particles.insert(particle.tag(), particle);
                received += 1;
            }
        }

        let offered: u64 = transport.all_gather(offered)?.iter().sum();
        let taken: u64 = transport.all_gather(claimed as u64)?.iter().sum();
        if offered != taken {
            return Err(TrackingError::MigrationLoss {
                from_rank: rank,
                to_rank: rank,
                detail: format!("{offered} particles changed partition at coupling but {taken} were claimed"),
            }
            .into());
        }
        info!(
            "{}: rank {rank} sent {sent}, received {received} ({claimed} relocated)",
            self.config.name
        );
        Ok(ExchangeSummary { sent, received, claimed })
    }

    /// Takes over a relocated particle if its position lies in this
    /// partition.
    fn settle(&self, source: usize, rank: usize, mut record: ParticleRecord) -> Result<Option<Particle>> {
        let Some(cell) = self.mesh.claim(Point::from_array(record.position)) else {
            return Ok(None);
        };
        let loss = |detail: String| TrackingError::MigrationLoss {
            from_rank: source,
            to_rank: rank,
            detail,
        };
        if self.particles.contains_key(&Tag(record.tag)) {
            return Err(loss(format!("particle #{} is already resident", record.tag)).into());
        }
        record.cell = cell as u64;
        Particle::from_record(self.mesh, &record)
            .map(Some)
            .map_err(|e| loss(format!("particle #{} cannot be rebuilt: {e}", record.tag)).into())
    }

    fn arrive(&self, source: usize, rank: usize, mut record: ParticleRecord) -> Result<Particle> {
        let loss = |detail: String| TrackingError::MigrationLoss {
            from_rank: source,
            to_rank: rank,
            detail,
        };
        let Some(patch) = self.mesh.processor_patch_to(source) else {
            return Err(loss(format!("no processor patch towards rank {source}")).into());
        };
        let patch = self.mesh.patch(patch);
        let local = usize::try_from(record.face).ok().filter(|&f| f < patch.size);
        let Some(local) = local else {
            return Err(loss(format!(
                "particle #{} arrives on face {} of the {}-face patch '{}'",
                record.tag, record.face, patch.size, patch.name
            ))
            .into());
        };
        if self.particles.contains_key(&Tag(record.tag)) {
            return Err(loss(format!("particle #{} is already resident", record.tag)).into());
        }
        let face = patch.start + local;
        record.cell = self.mesh.face_owner(face) as u64;
        record.face = face as i64;
        Particle::from_record(self.mesh, &record)
            .map_err(|e| loss(format!("particle #{} cannot be rebuilt: {e}", record.tag)).into())
    }

    /// One full increment: local tracking, then the exchange barrier.
    pub fn evolve<T: Transport>(&mut self, dt: f64, transport: &mut T) -> Result<StepReport> {
        let track = self.track(dt)?;
        let exchange = self.exchange(transport)?;
        Ok(StepReport { track, exchange })
    }

    /// Installs an engine update using the configured blend law.
    pub fn couple(&mut self, update: &CouplingUpdate) -> Result<CouplingReport> {
        CouplingBridge::from_config(&self.config).apply(self, update)
    }

    /// Appends one history-force increment to every particle.
    pub fn accumulate_history<M: HistoryModel>(&mut self, model: &M) {
        let apply = |p: &mut Particle| {
            let delta = model.increment(p);
            p.history.append(delta);
        };
        if self.config.parallel {
            self.particles.par_values_mut().for_each(apply);
        } else {
            self.particles.values_mut().for_each(apply);
        }
    }

    /// Local totals, based on the engine velocity `U`.
    pub fn statistics(&self) -> CloudStatistics {
        let mut stats = CloudStatistics {
            count: self.particles.len(),
            ..Default::default()
        };
        for p in self.particles.values() {
            stats.mass += p.mass();
            stats.momentum += p.u * p.mass();
            stats.kinetic_energy += 0.5 * p.mass() * p.u.dot(p.u);
        }
        info!(
            "{}: {} particles, mass {:.6e}, momentum {}, kinetic energy {:.6e}",
            self.config.name, stats.count, stats.mass, stats.momentum, stats.kinetic_energy
        );
        stats
    }

    /// Particle volume per cell divided by the cell volume.
    pub fn particle_volume_fraction(&self) -> Vec<f64> {
        let mut alpha = vec![0.; self.mesh.n_cells()];
        for p in self.particles.values() {
            alpha[p.cell()] += p.vol();
        }
        for (cell, a) in alpha.iter_mut().enumerate() {
            *a /= self.mesh.cell_volume(cell);
        }
        alpha
    }
}
