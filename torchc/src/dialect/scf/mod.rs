//! Structured control flow dialect.
//!
//! Being structured means that the control flow has a structure unlike, for
//! example, `goto`s. Loops and conditionals own their bodies as regions, so
//! the lowered code keeps the nesting of the source program.

mod op;

use crate::Dialect;

pub use op::empty_region;
pub use op::ForOp;
pub use op::IfOp;
pub use op::YieldOp;

pub struct Scf;

impl Dialect for Scf {
    fn name(&self) -> &'static str {
        "scf"
    }
    fn description(&self) -> &'static str {
        "Structured control flow dialect"
    }
}
