//! Dialect definitions.
//!
//! Dialects are collections of operations and types. The `torch` dialect is
//! the input of the compiler and the other dialects are lowering targets.

pub mod arith;
pub mod func;
pub mod math;
pub mod memref;
pub mod scf;
pub mod torch;
pub mod tosa;
