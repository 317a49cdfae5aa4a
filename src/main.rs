use anyhow::{Result, anyhow};
use log::info;
use softparticle::cloud::injection::Injection;
use softparticle::coupling::{CouplingReport, CouplingUpdate, EngineSample};
use softparticle::mesh::block::BlockMesh;
use softparticle::tracking::interaction::InteractionKind;
use softparticle::transfer::{ThreadedTransport, Transport};
use softparticle::{Cloud, CloudConfig, Particle, Point, PolyMesh, Vector};
use std::path::Path;

const N_RANKS: usize = 2;
const FLOW_DT: f64 = 1e-3;
const SUBSTEPS: usize = 10;
const PERIODS: usize = 5;
const GRAVITY: Vector = Vector {
    dx: 0.,
    dy: 0.,
    dz: -9.81,
};

/// Stand-in for the particle dynamics engine: gravity acting over one
/// period on the particles resident at its end. Positions are those the
/// flow side tracked, so walls keep applying.
fn ballistic_update(cloud: &Cloud, rank: usize, time: f64, period: f64) -> CouplingUpdate {
    let samples = cloud
        .iter()
        .map(|p| EngineSample {
            tag: p.tag(),
            position: p.position(),
            velocity: p.u + GRAVITY * period,
            diameter: p.diameter(),
            density: p.density(),
            kind: p.kind,
            engine_rank: rank as i64,
        })
        .collect();
    CouplingUpdate { time, samples }
}

fn default_config() -> CloudConfig {
    let mut config = CloudConfig::new("beads")
        .with_interaction("xMin", InteractionKind::Rebound { restitution: 1. })
        .with_interaction("xMax", InteractionKind::Escape)
        .with_interaction("zMin", InteractionKind::Rebound { restitution: 0.5 })
        .with_interaction("zMax", InteractionKind::Rebound { restitution: 1. });
    config.coupling_period = FLOW_DT * SUBSTEPS as f64;
    config
}

/// Flow substeps over one coupling period, then the engine update for the
/// particles resident at its end.
fn run_period<T: Transport>(cloud: &mut Cloud, transport: &mut T, time: f64) -> Result<CouplingReport> {
    let period = cloud.config().coupling_period;
    let drag_history = |p: &Particle| (p.u - p.move_u) * (1e-6 * p.mass());
    for _ in 0..SUBSTEPS {
        cloud.evolve(FLOW_DT, transport)?;
        cloud.accumulate_history(&drag_history);
    }
    let update = ballistic_update(cloud, transport.rank(), time + period, period);
    cloud.couple(&update)
}

fn run_rank(mesh: &PolyMesh, mut transport: ThreadedTransport, config: CloudConfig) -> Result<()> {
    let rank = transport.rank();
    let mut cloud = Cloud::new(mesh, config)?;
    cloud.inject(&Injection {
        min: Point::new(0.005, 0.002, 0.005),
        max: Point::new(0.095, 0.018, 0.018),
        count: 200,
        diameter: 5e-4,
        density: 2500.,
        velocity: Vector::new(0.5, 0.1, 0.),
        kind: 0,
        seed: 42,
    })?;

    let period = cloud.config().coupling_period;
    let mut time = 0.;
    for _ in 0..PERIODS {
        run_period(&mut cloud, &mut transport, time)?;
        time += period;
    }

    cloud.statistics();
    let counts = transport.all_gather(cloud.len() as u64)?;
    if rank == 0 {
        info!("{} particles left in the domain after t = {time}", counts.iter().sum::<u64>());
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => CloudConfig::from_json_file(Path::new(&path))?,
        None => default_config(),
    };

    let block = BlockMesh::uniform(Point::new(0., 0., 0.), Point::new(0.1, 0.02, 0.02), [10, 2, 2])?
        .with_periodic(1)?;
    let meshes = block
        .decompose(N_RANKS)?
        .into_iter()
        .map(PolyMesh::new)
        .collect::<Result<Vec<_>>>()?;

    let transports = ThreadedTransport::group(N_RANKS);
    std::thread::scope(|s| {
        let handles: Vec<_> = meshes
            .iter()
            .zip(transports)
            .map(|(mesh, transport)| {
                let config = config.clone();
                s.spawn(move || run_rank(mesh, transport, config))
            })
            .collect();
        for h in handles {
            h.join().map_err(|_| anyhow!("rank thread panicked"))??;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use softparticle::Tag;

    #[test]
    fn test_engine_update_covers_particles_that_migrated() {
        let block = BlockMesh::uniform(Point::new(0., 0., 0.), Point::new(0.1, 0.02, 0.02), [10, 2, 2])
            .unwrap()
            .with_periodic(1)
            .unwrap();
        let meshes: Vec<PolyMesh> = block
            .decompose(2)
            .unwrap()
            .into_iter()
            .map(|d| PolyMesh::new(d).unwrap())
            .collect();
        let transports = ThreadedTransport::group(2);
        let results: Vec<(CouplingReport, usize)> = std::thread::scope(|s| {
            let handles: Vec<_> = meshes
                .iter()
                .zip(transports)
                .map(|(mesh, mut transport)| {
                    s.spawn(move || {
                        let mut cloud = Cloud::new(mesh, default_config()).unwrap();
                        if transport.rank() == 0 {
                            // Crosses x = 0.05 within the period
                            let at = Point::new(0.049, 0.005, 0.005);
                            let cell = mesh.find_cell(at).unwrap();
                            let p = Particle::new(mesh, at, cell, 5e-4, Vector::new(0.5, 0., 0.), 2500., Tag(0), -1, 0)
                                .unwrap();
                            cloud.insert(p).unwrap();
                        }
                        let report = run_period(&mut cloud, &mut transport, 0.).unwrap();
                        (report, cloud.len())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results[0], (CouplingReport::default(), 0));
        let (report, len) = &results[1];
        assert_eq!(*len, 1);
        assert_eq!(report.updated, 1);
        assert!(report.relocated.is_empty());
    }
}
