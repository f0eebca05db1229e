mod repository_key;
mod ring_bytes;
mod sync;

pub use repository_key::repository_key;
pub use ring_bytes::RingBytes;
pub use sync::{lock, read, write};
