//! Math dialect.
//!
//! Elementary functions on floats that have no single `arith` counterpart.
mod op;

use crate::Dialect;

pub use op::AbsfOp;
pub use op::ExpOp;
pub use op::RoundevenOp;
pub use op::TanhOp;

pub struct Math;

impl Dialect for Math {
    fn name(&self) -> &'static str {
        "math"
    }
    fn description(&self) -> &'static str {
        "Math dialect"
    }
}
