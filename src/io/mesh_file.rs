//! Mesh description files.
//!
//! A mesh file is the JSON form of a [`MeshDescription`]: points, face
//! vertex lists, owner and neighbour cells, and the boundary patches.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::mesh::{MeshDescription, PolyMesh};

/// Writes a mesh description to a JSON file.
///
/// # Example
/// ```no_run
/// use softparticle::io::write_mesh;
/// use softparticle::mesh::block::BlockMesh;
/// use std::path::Path;
///
/// let block = BlockMesh::new(vec![0., 1.], vec![0., 1.], vec![0., 1.]).unwrap();
/// write_mesh(Path::new("cube.json"), &block.description()).unwrap();
/// ```
pub fn write_mesh(path: &Path, mesh: &MeshDescription) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;
    let writer = BufWriter::new(file);

    serde_json::to_writer(writer, mesh)
        .with_context(|| format!("Failed to serialize mesh to: {}", path.display()))?;

    Ok(())
}

pub fn read_mesh_description(path: &Path) -> Result<MeshDescription> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;
    let reader = BufReader::new(file);

    let mesh: MeshDescription = serde_json::from_reader(reader)
        .with_context(|| format!("Failed to deserialize mesh from: {}", path.display()))?;

    Ok(mesh)
}

/// Reads and validates a mesh partition.
pub fn read_mesh(path: &Path) -> Result<PolyMesh> {
    let desc = read_mesh_description(path)?;
    PolyMesh::new(desc).with_context(|| format!("Invalid mesh in: {}", path.display()))
}
