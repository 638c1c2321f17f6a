//! The top-level metadata file written at the end of a build (spec §6 "Persisted
//! layout": "`ept.json` ... schema, bounds, scale/offset, SRS, codec choice, subset
//! descriptor, hierarchy step, point count").

use crate::key::Bounds;
use crate::point::{Schema, ScaleOffset};
use crate::subset::SubsetDescriptor;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Metadata {
    pub schema: SerializableSchema,
    /// The bounds of the original input data, before cube-extension.
    pub conforming_bounds: Bounds,
    /// The cube-extended bounds the octree actually indexes against.
    pub cube_bounds: Bounds,
    pub srs: Option<String>,
    pub codec: String,
    pub subset: Option<SubsetDescriptor>,
    pub hierarchy_step: u64,
    pub point_count: u64,
}

/// [`Schema`] isn't directly `Serialize` (its scale/offset is a plain tuple of `DVec3`s,
/// which is fine, but we spell it out so the JSON shape is stable and self-describing
/// rather than relying on `glam`'s derive layout).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct SerializableSchema {
    pub attribute_bytes: usize,
    pub scale_offset: Option<ScaleOffset>,
}

impl From<Schema> for SerializableSchema {
    fn from(schema: Schema) -> Self {
        Self {
            attribute_bytes: schema.attribute_bytes,
            scale_offset: schema.scale_offset,
        }
    }
}

impl From<SerializableSchema> for Schema {
    fn from(schema: SerializableSchema) -> Self {
        Self {
            attribute_bytes: schema.attribute_bytes,
            scale_offset: schema.scale_offset,
        }
    }
}

/// File name suffix for a subset build's metadata/hierarchy files (spec §4.8/§6: "Output
/// files are postfixed with `-{id}`"). Chunk data files are never subset-postfixed.
pub fn subset_suffix(subset: Option<&SubsetDescriptor>) -> String {
    match subset {
        Some(s) => format!("-{}", s.id),
        None => String::new(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use glam::DVec3;

    #[test]
    fn round_trips_through_json() {
        let metadata = Metadata {
            schema: Schema::absolute(4).into(),
            conforming_bounds: Bounds::new(DVec3::splat(0.0), DVec3::splat(7.5)),
            cube_bounds: Bounds::new(DVec3::splat(0.0), DVec3::splat(8.0)),
            srs: Some("EPSG:4326".to_string()),
            codec: "raw".to_string(),
            subset: Some(SubsetDescriptor { id: 2, of: 4 }),
            hierarchy_step: 6,
            point_count: 42,
        };
        let json = serde_json::to_string(&metadata).unwrap();
        let back: Metadata = serde_json::from_str(&json).unwrap();
        assert_eq!(metadata, back);
    }

    #[test]
    fn subset_suffix_is_empty_for_a_whole_build() {
        assert_eq!(subset_suffix(None), "");
        assert_eq!(
            subset_suffix(Some(&SubsetDescriptor { id: 1, of: 4 })),
            "-1"
        );
    }
}
