//! Internal, periodic and rotational crossings on small block meshes.

use softparticle::mesh::block::{BlockMesh, Side};
use softparticle::mesh::patch::{PatchSpec, PatchTransform};
use softparticle::tracking::interaction::{InteractionKind, PatchInteractions};
use softparticle::tracking::{TrackingData, TrackingSettings, move_particle};
use softparticle::{Particle, Point, PolyMesh, Tag, Tensor, Vector};
use indexmap::IndexMap;
use std::f64::consts::PI;

fn registry(mesh: &PolyMesh) -> IndexMap<String, InteractionKind> {
    mesh.patches()
        .iter()
        .filter(|p| p.kind.type_name() == "wall")
        .map(|p| (p.name.clone(), InteractionKind::Rebound { restitution: 1. }))
        .collect()
}

fn track(mesh: &PolyMesh, p: &mut Particle, dt: f64) -> bool {
    let interactions = PatchInteractions::new(mesh, &registry(mesh)).unwrap();
    let mut td = TrackingData::new(mesh, &interactions, TrackingSettings::default());
    move_particle(p, &mut td, dt).unwrap()
}

#[test]
fn test_documented_internal_crossing() {
    let mesh = BlockMesh::new(vec![-0.01, 0.01, 0.02], vec![-0.01, 0.01], vec![-0.01, 0.01])
        .unwrap()
        .build()
        .unwrap();
    let origin = Point::new(0., 0., 0.);
    let cell = mesh.find_cell(origin).unwrap();
    let mut p = Particle::new(&mesh, origin, cell, 0.001, Vector::new(1., 0., 0.), 1000., Tag(42), 0, 0).unwrap();

    assert!(track(&mesh, &mut p, 0.01));
    assert_eq!(cell, 0);
    assert_eq!(p.cell(), 1);
    assert_eq!(1. - p.coords.step_fraction, 0.);
    assert_eq!(p.tag(), Tag(42));
}

#[test]
fn test_zero_step_is_a_no_op() {
    let mesh = BlockMesh::new(vec![0., 1.], vec![0., 1.], vec![0., 1.]).unwrap().build().unwrap();
    let mut p = Particle::new(&mesh, Point::new(0.2, 0.3, 0.4), 0, 0.01, Vector::new(5., 5., 5.), 1., Tag(1), 0, 0).unwrap();
    let before = p.clone();
    assert!(track(&mesh, &mut p, 0.));
    assert_eq!(p, before);
}

#[test]
fn test_flat_periodic_translation() {
    let mesh = BlockMesh::uniform(Point::new(0., 0., 0.), Point::new(1., 1., 1.), [4, 1, 1])
        .unwrap()
        .with_periodic(0)
        .unwrap()
        .build()
        .unwrap();
    let start = Point::new(0.9, 0.5, 0.5);
    let u = Vector::new(1., 0.2, 0.);
    let mut p = Particle::new(&mesh, start, 3, 0.01, u, 1000., Tag(3), 0, 0).unwrap();
    p.history.append(Vector::new(0.3, 0.4, 0.));

    assert!(track(&mesh, &mut p, 0.2));
    let unwrapped = start + u * 0.2;
    let offset = p.position() - unwrapped;
    assert!(offset.is_close(&Vector::new(-1., 0., 0.)));
    assert_eq!(p.cell(), 0);
    assert_eq!(p.u, u);
    assert_eq!(p.move_u, u);
    assert_eq!(p.u_old, u);
    assert_eq!(p.history.sum_delta_fb(), Vector::new(0.3, 0.4, 0.));
    assert!(p.position_old.is_close(&Point::new(-0.1, 0.5, 0.5)));
}

#[test]
fn test_rotational_periodic_pair() {
    // Leaving through x = 1 re-enters through y = 1, turned clockwise
    // about the z axis through (1, 1).
    let rot = Tensor::rotation(&Vector::new(0., 0., 1.), -PI / 2.).unwrap();
    let hinge = Point::new(1., 1., 0.);
    let forward = PatchTransform::rotation(rot, hinge).unwrap();
    let mesh = BlockMesh::new(vec![0., 1.], vec![0., 1.], vec![0., 1.])
        .unwrap()
        .with_side(Side::XMax, PatchSpec::cyclic("xMax", "yMax", forward))
        .with_side(Side::YMax, PatchSpec::cyclic("yMax", "xMax", forward.inverse()))
        .build()
        .unwrap();

    let u = Vector::new(1., 0., 0.25);
    let mut p = Particle::new(&mesh, Point::new(0.5, 0.3, 0.25), 0, 0.01, u, 1000., Tag(9), 0, 0).unwrap();
    p.u_old = Vector::new(0.5, 0.5, 0.);
    p.ensemble_u = Vector::new(0., 2., 0.);
    p.history.append(Vector::new(3., 0., 0.));
    let magnitudes = |p: &Particle| {
        [
            p.u.length(),
            p.move_u.length(),
            p.u_old.length(),
            p.ensemble_u.length(),
            p.history.sum_delta_fb().length(),
        ]
    };
    let before = magnitudes(&p);

    // Reaches x = 1 halfway, then moves down from y = 1 for the other half
    assert!(track(&mesh, &mut p, 1.));
    assert!(p.position().is_within(&Point::new(0.3, 0.5, 0.5), 1e-12));
    assert!(p.move_u.is_close(&Vector::new(0., -1., 0.25)));
    assert!(p.u.is_close(&Vector::new(0., -1., 0.25)));
    assert!(p.u_old.is_close(&Vector::new(0.5, -0.5, 0.)));
    assert!(p.ensemble_u.is_close(&Vector::new(2., 0., 0.)));
    assert!(p.history.sum_delta_fb().is_close(&Vector::new(0., -3., 0.)));
    for (a, b) in before.iter().zip(magnitudes(&p)) {
        assert!((a - b).abs() < 1e-12);
    }
}

#[test]
fn test_wall_rebound_keeps_particle_inside() {
    let mesh = BlockMesh::uniform(Point::new(0., 0., 0.), Point::new(1., 1., 1.), [3, 3, 3])
        .unwrap()
        .build()
        .unwrap();
    let mut p = Particle::new(&mesh, Point::new(0.5, 0.5, 0.5), 13, 0.01, Vector::new(3.1, -1.7, 2.3), 1000., Tag(5), 0, 0)
        .unwrap();
    for _ in 0..25 {
        assert!(track(&mesh, &mut p, 0.1));
        p.coords.step_fraction = 0.;
        assert!(mesh.cell_contains(p.cell(), p.position()));
    }
    assert!((p.u.length() - Vector::new(3.1, -1.7, 2.3).length()).abs() < 1e-12);
}
