pub mod cloud;
pub mod coupling;
pub mod error;
pub mod geom;
pub mod io;
pub mod mesh;
pub mod particle;
pub mod tag;
pub mod tracking;
pub mod transfer;

// Prelude
pub use cloud::Cloud;
pub use cloud::config::CloudConfig;
pub use error::TrackingError;
pub use geom::point::Point;
pub use geom::tensor::Tensor;
pub use geom::vector::Vector;
pub use mesh::PolyMesh;
pub use particle::Particle;
pub use tag::Tag;
