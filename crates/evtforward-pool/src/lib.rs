mod bitmap;
mod pool;

pub use bitmap::Bitmap;
pub use pool::{BufferHandle, BufferPool, PoolPolicy};
