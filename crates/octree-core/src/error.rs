use thiserror::Error;

/// Low-level errors shared by the allocator and key-arithmetic layers.
///
/// Domain errors (codec/endpoint/build failures) live in `octree_index::error`; this
/// enum only covers invariants that `octree-core` itself can violate.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("depth {depth} exceeds the maximum representable depth {max}")]
    DepthOutOfRange { depth: u32, max: u32 },
}

pub type CoreResult<T> = Result<T, CoreError>;
