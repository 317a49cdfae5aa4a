//! Boundary-hit handling.
//!
//! Processor patches are handled by the tracker itself (the particle is
//! packed for migration). Every other patch applies its geometric transform
//! first and then the registered [`InteractionKind`].

use anyhow::{Result, bail};
use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};

use super::Tracked;
use crate::error::TrackingError;
use crate::mesh::PolyMesh;
use crate::mesh::patch::PatchKind;

fn unit_restitution() -> f64 {
    1.
}

/// What happens to a particle hitting a physical patch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InteractionKind {
    /// Reflect off the patch, scaling the normal velocity by `restitution`.
    Rebound {
        #[serde(default = "unit_restitution")]
        restitution: f64,
    },
    /// Leave the domain; the particle is deleted.
    Escape,
    /// Continue tracking with the transformed state (periodic patches).
    PassThrough,
}

/// Interaction per mesh patch, resolved once against a mesh.
#[derive(Debug, Clone)]
pub struct PatchInteractions {
    by_patch: Vec<Option<InteractionKind>>,
}

impl PatchInteractions {
    /// Resolves a name-keyed registry against the patches of `mesh`.
    ///
    /// Walls and open patches must be registered; cyclic patches default to
    /// pass-through. Processor patches need no entry.
    pub fn new(mesh: &PolyMesh, registry: &IndexMap<String, InteractionKind>) -> Result<Self> {
        let mut by_patch = Vec::with_capacity(mesh.patches().len());
        for patch in mesh.patches() {
            let entry = registry.get(&patch.name).copied();
            let resolved = match (&patch.kind, entry) {
                (PatchKind::Processor { .. }, _) => None,
                (PatchKind::Cyclic { .. }, None | Some(InteractionKind::PassThrough)) => {
                    Some(InteractionKind::PassThrough)
                }
                (PatchKind::Cyclic { .. }, Some(other)) => {
                    bail!("cyclic patch '{}' only supports passThrough, got {other:?}", patch.name)
                }
                (_, Some(InteractionKind::PassThrough)) => {
                    bail!("patch '{}' is not periodic and cannot be passed through", patch.name)
                }
                (_, Some(kind)) => Some(kind),
                (kind, None) => {
                    return Err(TrackingError::UnknownBoundaryCategory {
                        patch: patch.name.clone(),
                        category: kind.type_name().to_string(),
                    }
                    .into());
                }
            };
            by_patch.push(resolved);
        }
        for name in registry.keys() {
            if mesh.find_patch(name).is_none() {
                debug!("Interaction for '{name}' has no patch in this partition");
            }
        }
        Ok(Self { by_patch })
    }

    pub fn get(&self, patch: usize) -> Option<InteractionKind> {
        self.by_patch.get(patch).copied().flatten()
    }
}

/// Applies a physical patch to a particle sitting on `face`.
///
/// Returns whether the particle is still tracked.
pub(crate) fn hit_patch<P: Tracked>(
    p: &mut P,
    mesh: &PolyMesh,
    interactions: &PatchInteractions,
    patch_index: usize,
    face: usize,
) -> Result<bool> {
    let patch = mesh.patch(patch_index);
    if let PatchKind::Cyclic {
        neighbour_patch,
        transform,
    } = &patch.kind
    {
        let partner = mesh.patch(*neighbour_patch);
        let new_face = partner.start + (face - patch.start);
        let coords = p.coords_mut();
        coords.position = transform.apply_to_point(coords.position);
        coords.cell = mesh.face_owner(new_face);
        coords.face = Some(new_face);
        p.transform_properties(transform);
        debug!(
            "Particle {} crossed cyclic patch '{}' into cell {}",
            p.tag(),
            patch.name,
            mesh.face_owner(new_face)
        );
    }

    match interactions.get(patch_index) {
        Some(InteractionKind::PassThrough) => Ok(true),
        Some(InteractionKind::Escape) => {
            debug!("Particle {} escaped through '{}'", p.tag(), patch.name);
            Ok(false)
        }
        Some(InteractionKind::Rebound { restitution }) => {
            let normal = mesh.outward_normal(p.coords().cell, face);
            p.rebound(normal, restitution);
            debug!("Particle {} rebounded on '{}'", p.tag(), patch.name);
            Ok(true)
        }
        None => Err(TrackingError::UnknownBoundaryCategory {
            patch: patch.name.clone(),
            category: patch.kind.type_name().to_string(),
        }
        .into()),
    }
}
