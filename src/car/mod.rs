//! CAR v1 frame reader.
//!
//! Grounded on `examples/banyancomputer-banyan-cli/tomb-common/src/types/
//! blockstore/car/v1block.rs`'s `varint || cid || content` framing, adapted
//! to a non-seekable async byte stream the way `examples/other_examples/
//! 462430b4_sugyan-atrium__atrium-repo-src-car.rs.rs`'s `read_cid` reads a
//! CIDv1: read the multihash's code/size varints, then its digest, and
//! recover the cid's own byte length by re-serializing it rather than
//! seeking back over what was already consumed.

mod frame;

pub use frame::{CarBlockReader, CarError};
