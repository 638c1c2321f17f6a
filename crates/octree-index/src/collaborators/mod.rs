//! External collaborators (spec §6): file parsing, chunk encoding, and blob storage are
//! deliberately kept out of this crate's scope. These traits are the seams a concrete
//! build wires in; the `memory`/`raw`/`local` submodules under `#[cfg(test)]` exist only
//! to exercise [`crate::builder::Builder`] end-to-end without real I/O.

pub mod codec;
pub mod endpoint;
pub mod point_source;

pub use codec::ChunkCodec;
pub use endpoint::Endpoint;
pub use point_source::{PointSource, PointStream};
