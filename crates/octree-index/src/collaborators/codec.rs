//! The chunk codec collaborator (spec §6): turns a chunk's resident voxels into bytes
//! for the endpoint and back. The wire layout is opaque to this crate; only the trait
//! boundary is specified.

use crate::point::{Schema, Voxel};

pub trait ChunkCodec {
    type Error: std::error::Error + Send + Sync + 'static;

    fn encode(&self, schema: &Schema, points: &[Voxel]) -> Result<Vec<u8>, Self::Error>;
    fn decode(&self, schema: &Schema, bytes: &[u8]) -> Result<Vec<Voxel>, Self::Error>;
}

/// A length-prefixed, `lz4_flex`-framed codec, for tests only: every point is
/// `point: [f64; 3]` followed by `schema.attribute_bytes` of attribute payload.
#[cfg(any(test, feature = "test-support"))]
pub mod raw {
    use super::*;
    use glam::DVec3;
    use lz4_flex::frame::{FrameDecoder, FrameEncoder};
    use std::io::{Read, Write};

    #[derive(Debug, thiserror::Error)]
    pub enum RawCodecError {
        #[error("lz4 frame error: {0}")]
        Frame(#[from] std::io::Error),
        #[error("truncated point record: expected {expected} bytes, got {got}")]
        Truncated { expected: usize, got: usize },
    }

    #[derive(Clone, Copy, Default)]
    pub struct RawCodec;

    impl ChunkCodec for RawCodec {
        type Error = RawCodecError;

        fn encode(&self, schema: &Schema, points: &[Voxel]) -> Result<Vec<u8>, Self::Error> {
            let mut raw = Vec::with_capacity(points.len() * (24 + schema.attribute_bytes));
            for v in points {
                raw.extend_from_slice(&v.point.x.to_le_bytes());
                raw.extend_from_slice(&v.point.y.to_le_bytes());
                raw.extend_from_slice(&v.point.z.to_le_bytes());
                debug_assert_eq!(v.attributes.len(), schema.attribute_bytes);
                raw.extend_from_slice(&v.attributes);
            }
            let mut encoder = FrameEncoder::new(Vec::new());
            encoder.write_all(&raw)?;
            Ok(encoder.finish()?)
        }

        fn decode(&self, schema: &Schema, bytes: &[u8]) -> Result<Vec<Voxel>, Self::Error> {
            let mut raw = Vec::new();
            FrameDecoder::new(bytes).read_to_end(&mut raw)?;

            let record_len = 24 + schema.attribute_bytes;
            if record_len == 0 || raw.len() % record_len != 0 {
                return Err(RawCodecError::Truncated {
                    expected: record_len,
                    got: raw.len(),
                });
            }

            let mut points = Vec::with_capacity(raw.len() / record_len);
            for chunk in raw.chunks_exact(record_len) {
                let x = f64::from_le_bytes(chunk[0..8].try_into().unwrap());
                let y = f64::from_le_bytes(chunk[8..16].try_into().unwrap());
                let z = f64::from_le_bytes(chunk[16..24].try_into().unwrap());
                let attributes = chunk[24..].to_vec().into_boxed_slice();
                points.push(Voxel::new(DVec3::new(x, y, z), attributes));
            }
            Ok(points)
        }
    }

}
