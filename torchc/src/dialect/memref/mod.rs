//! Memory reference dialect.
//!
//! Buffers with a static shape that are read and written element by element.
//! This is the storage that the loop lowering computes into.
mod op;

use crate::Dialect;

pub use op::AllocOp;
pub use op::LoadOp;
pub use op::StoreOp;

pub struct Memref;

impl Dialect for Memref {
    fn name(&self) -> &'static str {
        "memref"
    }
    fn description(&self) -> &'static str {
        "Memory reference dialect"
    }
}
