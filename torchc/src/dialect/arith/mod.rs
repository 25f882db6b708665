//! Arithmetic dialect.
//!
//! This dialect is meant to hold basic integer and floating point operations.
mod op;

use crate::Dialect;

pub use op::AddfOp;
pub use op::AddiOp;
pub use op::CmpfOp;
pub use op::CmpiOp;
pub use op::ConstantOp;
pub use op::DivfOp;
pub use op::DivsiOp;
pub use op::ExtfOp;
pub use op::ExtsiOp;
pub use op::FptosiOp;
pub use op::FptouiOp;
pub use op::IndexCastOp;
pub use op::MaximumfOp;
pub use op::MaxsiOp;
pub use op::MinimumfOp;
pub use op::MinsiOp;
pub use op::MulfOp;
pub use op::MuliOp;
pub use op::NegfOp;
pub use op::RemsiOp;
pub use op::SelectOp;
pub use op::SitofpOp;
pub use op::SubfOp;
pub use op::SubiOp;
pub use op::TruncfOp;
pub use op::TrunciOp;
pub use op::UitofpOp;
pub use op::CMPF_PREDICATES;
pub use op::CMPI_PREDICATES;

pub struct Arith;

impl Dialect for Arith {
    fn name(&self) -> &'static str {
        "arith"
    }
    fn description(&self) -> &'static str {
        "Arithmetic dialect"
    }
}
