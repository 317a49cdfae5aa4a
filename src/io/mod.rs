//! File I/O for meshes and particle clouds.
//!
//! Both formats are JSON. Mesh files hold a partition layout, field files
//! hold one array per particle attribute.

pub mod fields;
pub mod mesh_file;

pub use fields::{CloudFields, read_checkpoint, read_fields, write_checkpoint, write_fields};
pub use mesh_file::{read_mesh, read_mesh_description, write_mesh};
