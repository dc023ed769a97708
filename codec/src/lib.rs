//! Delta codec (§4.1, §4.2): turns a stream of full simulation states
//! into self-contained chunks, and chunks back into any tick they cover.

pub mod decoder;
pub mod encoder;

pub use decoder::{ChunkIter, Decoder};
pub use encoder::{Encoder, TickSample};
