//! Boundary patches and their geometric pairing transforms.

use anyhow::{Result, bail, ensure};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::TrackingError;
use crate::{Point, Tensor, Vector};

/// Geometric map from a cyclic patch onto its partner.
///
/// A flat periodic pairing is a pure translation; a curved (rotational)
/// pairing is an orthogonal tensor applied about `origin`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PatchTransform {
    Translation { separation: Vector },
    Rotation { tensor: Tensor, origin: Point },
}

impl PatchTransform {
    pub fn translation(separation: Vector) -> Self {
        Self::Translation { separation }
    }

    pub fn rotation(tensor: Tensor, origin: Point) -> Result<Self> {
        ensure!(
            tensor.is_orthogonal(1e-9),
            "cyclic transform tensor must be a rotation or reflection"
        );
        Ok(Self::Rotation { tensor, origin })
    }

    pub fn apply_to_point(&self, p: Point) -> Point {
        match self {
            Self::Translation { separation } => p + *separation,
            Self::Rotation { tensor, origin } => tensor.transform_point(p, *origin),
        }
    }

    /// Transforms a direction-like quantity. Translations leave it unchanged.
    pub fn apply_to_vector(&self, v: Vector) -> Vector {
        match self {
            Self::Translation { .. } => v,
            Self::Rotation { tensor, .. } => tensor.transform(v),
        }
    }

    /// The transform of the partner patch.
    pub fn inverse(&self) -> Self {
        match self {
            Self::Translation { separation } => Self::Translation {
                separation: -*separation,
            },
            Self::Rotation { tensor, origin } => Self::Rotation {
                tensor: tensor.transpose(),
                origin: *origin,
            },
        }
    }
}

/// User-facing patch definition, as found in mesh description files.
///
/// `kind` is a type name (`wall`, `patch`, `cyclic`, `processor`); it is
/// resolved into a [`PatchKind`] when the mesh is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neighbour_patch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neighbour_rank: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<PatchTransform>,
}

impl PatchSpec {
    fn plain(name: &str, kind: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            neighbour_patch: None,
            neighbour_rank: None,
            transform: None,
        }
    }

    pub fn wall(name: &str) -> Self {
        Self::plain(name, "wall")
    }

    /// Generic open boundary (inlet/outlet).
    pub fn patch(name: &str) -> Self {
        Self::plain(name, "patch")
    }

    pub fn cyclic(name: &str, neighbour_patch: &str, transform: PatchTransform) -> Self {
        Self {
            neighbour_patch: Some(neighbour_patch.to_string()),
            transform: Some(transform),
            ..Self::plain(name, "cyclic")
        }
    }

    pub fn processor(name: &str, neighbour_rank: usize) -> Self {
        Self {
            neighbour_rank: Some(neighbour_rank),
            ..Self::plain(name, "processor")
        }
    }
}

/// A patch definition together with its face range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchDescription {
    #[serde(flatten)]
    pub spec: PatchSpec,
    pub start: usize,
    pub size: usize,
}

/// Coarse boundary category used for dispatching particle hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryCategory {
    /// Face shared with another rank's partition.
    Processor,
    /// Walls, open boundaries and periodic pairings.
    Physical,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatchKind {
    Wall,
    Patch,
    Cyclic {
        neighbour_patch: usize,
        transform: PatchTransform,
    },
    Processor {
        neighbour_rank: usize,
    },
}

impl PatchKind {
    pub fn category(&self) -> BoundaryCategory {
        match self {
            Self::Processor { .. } => BoundaryCategory::Processor,
            _ => BoundaryCategory::Physical,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Wall => "wall",
            Self::Patch => "patch",
            Self::Cyclic { .. } => "cyclic",
            Self::Processor { .. } => "processor",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub name: String,
    pub kind: PatchKind,
    /// First mesh face of the patch.
    pub start: usize,
    pub size: usize,
}

impl Patch {
    pub fn contains_face(&self, face: usize) -> bool {
        face >= self.start && face < self.start + self.size
    }

    /// Index of a mesh face within this patch.
    pub fn local_index(&self, face: usize) -> Option<usize> {
        self.contains_face(face).then(|| face - self.start)
    }
}

/// Resolves patch type names and partner references.
pub(crate) fn resolve_patches(descs: &[PatchDescription]) -> Result<Vec<Patch>> {
    let by_name: HashMap<&str, usize> = descs
        .iter()
        .enumerate()
        .map(|(i, d)| (d.spec.name.as_str(), i))
        .collect();
    ensure!(by_name.len() == descs.len(), "patch names must be unique");

    let mut patches = Vec::with_capacity(descs.len());
    for d in descs {
        let spec = &d.spec;
        let kind = match spec.kind.as_str() {
            "wall" => PatchKind::Wall,
            "patch" => PatchKind::Patch,
            "cyclic" => {
                let Some(partner) = spec.neighbour_patch.as_deref() else {
                    bail!("cyclic patch '{}' has no neighbourPatch", spec.name);
                };
                let Some(&neighbour_patch) = by_name.get(partner) else {
                    bail!(
                        "cyclic patch '{}' refers to missing patch '{partner}'",
                        spec.name
                    );
                };
                ensure!(
                    descs[neighbour_patch].size == d.size,
                    "cyclic patch '{}' has {} faces but its partner '{partner}' has {}",
                    spec.name,
                    d.size,
                    descs[neighbour_patch].size
                );
                let Some(transform) = spec.transform else {
                    bail!("cyclic patch '{}' has no transform", spec.name);
                };
                PatchKind::Cyclic {
                    neighbour_patch,
                    transform,
                }
            }
            "processor" => {
                let Some(neighbour_rank) = spec.neighbour_rank else {
                    bail!("processor patch '{}' has no neighbourRank", spec.name);
                };
                PatchKind::Processor { neighbour_rank }
            }
            other => {
                return Err(TrackingError::UnknownBoundaryCategory {
                    patch: spec.name.clone(),
                    category: other.to_string(),
                }
                .into());
            }
        };
        patches.push(Patch {
            name: spec.name.clone(),
            kind,
            start: d.start,
            size: d.size,
        });
    }
    Ok(patches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn desc(spec: PatchSpec, start: usize, size: usize) -> PatchDescription {
        PatchDescription { spec, start, size }
    }

    #[test]
    fn test_translation_inverse() {
        let t = PatchTransform::translation(Vector::new(2., 0., 0.));
        let p = Point::new(-1., 0.5, 0.5);
        let back = t.inverse().apply_to_point(t.apply_to_point(p));
        assert!(back.is_close(&p));
        let v = Vector::new(1., 2., 3.);
        assert_eq!(t.apply_to_vector(v), v);
    }

    #[test]
    fn test_rotation_inverse() {
        let rot = Tensor::rotation(&Vector::new(0., 0., 1.), -PI / 2.).unwrap();
        let t = PatchTransform::rotation(rot, Point::new(1., 1., 0.)).unwrap();
        let p = Point::new(1., 0.3, 0.2);
        let q = t.apply_to_point(p);
        assert!(q.is_within(&Point::new(0.3, 1., 0.2), 1e-12));
        assert!(t.inverse().apply_to_point(q).is_within(&p, 1e-12));
    }

    #[test]
    fn test_rotation_rejects_non_orthogonal() {
        let t = Tensor::new([[2., 0., 0.], [0., 1., 0.], [0., 0., 1.]]);
        assert!(PatchTransform::rotation(t, Point::default()).is_err());
    }

    #[test]
    fn test_resolve_patches() {
        let sep = Vector::new(1., 0., 0.);
        let descs = vec![
            desc(PatchSpec::cyclic("left", "right", PatchTransform::translation(sep)), 4, 2),
            desc(PatchSpec::cyclic("right", "left", PatchTransform::translation(-sep)), 6, 2),
            desc(PatchSpec::wall("walls"), 8, 4),
            desc(PatchSpec::processor("procBoundary0to1", 1), 12, 2),
        ];
        let patches = resolve_patches(&descs).unwrap();
        assert!(matches!(
            patches[0].kind,
            PatchKind::Cyclic {
                neighbour_patch: 1,
                ..
            }
        ));
        assert_eq!(patches[2].kind, PatchKind::Wall);
        assert_eq!(patches[3].kind.category(), BoundaryCategory::Processor);
        assert_eq!(patches[3].local_index(13), Some(1));
        assert_eq!(patches[3].local_index(14), None);
    }

    #[test]
    fn test_unknown_type_is_fatal() {
        let descs = vec![desc(PatchSpec::plain("front", "symmetryPlane"), 0, 1)];
        let err = resolve_patches(&descs).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TrackingError>(),
            Some(TrackingError::UnknownBoundaryCategory { .. })
        ));
    }

    #[test]
    fn test_cyclic_size_mismatch() {
        let t = PatchTransform::translation(Vector::new(1., 0., 0.));
        let descs = vec![
            desc(PatchSpec::cyclic("a", "b", t), 0, 2),
            desc(PatchSpec::cyclic("b", "a", t.inverse()), 2, 3),
        ];
        assert!(resolve_patches(&descs).is_err());
    }

    #[test]
    fn test_spec_json_uses_type_key() {
        let json = serde_json::to_string(&PatchSpec::processor("p", 3)).unwrap();
        assert!(json.contains("\"type\":\"processor\""));
        assert!(json.contains("\"neighbourRank\":3"));
        let back: PatchSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, PatchSpec::processor("p", 3));
    }
}
