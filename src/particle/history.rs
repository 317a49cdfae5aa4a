use serde::{Deserialize, Serialize};

use crate::mesh::patch::PatchTransform;
use crate::{Particle, Vector};

/// Running history (Basset) force state carried by a particle.
///
/// Append-only: every force evaluation adds one increment and bumps the
/// step counter. The state is zero at creation and only ever replaced by
/// [`HistoryForce::restore`] when reading a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryForce {
    n0: u64,
    sum_delta_fb: Vector,
}

impl HistoryForce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores serialized state verbatim.
    pub fn restore(n0: u64, sum_delta_fb: Vector) -> Self {
        Self { n0, sum_delta_fb }
    }

    pub fn append(&mut self, delta_fb: Vector) {
        self.sum_delta_fb += delta_fb;
        self.n0 += 1;
    }

    /// Number of force evaluations accumulated so far.
    pub fn n0(&self) -> u64 {
        self.n0
    }

    pub fn sum_delta_fb(&self) -> Vector {
        self.sum_delta_fb
    }

    /// Rotates the accumulated sum into the frame of a paired patch.
    pub fn transform(&mut self, transform: &PatchTransform) {
        self.sum_delta_fb = transform.apply_to_vector(self.sum_delta_fb);
    }
}

/// External flow-force model producing one history increment per
/// evaluation step.
pub trait HistoryModel: Sync {
    fn increment(&self, particle: &Particle) -> Vector;
}

impl<F> HistoryModel for F
where
    F: Fn(&Particle) -> Vector + Sync,
{
    fn increment(&self, particle: &Particle) -> Vector {
        self(particle)
    }
}
