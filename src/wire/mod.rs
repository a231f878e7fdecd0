//! Wire protocol to the analytics process.

mod control;
mod writer;

pub use control::{ControlMessageEncoder, FLUSH_SPACES_LENGTH};
pub use writer::{LengthEncodedReader, LengthEncodedWriter};
