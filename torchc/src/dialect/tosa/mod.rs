//! Tensor Operator Set Architecture dialect.
//!
//! A fixed catalog of whole-tensor operators on statically shaped
//! `tensor<..>` values. Backends that implement this catalog can run any
//! program that was legalized into it.
mod op;

use crate::Dialect;

pub use op::broadcast_shape;
pub use op::matmul_shape;
pub use op::pad_shape;
pub use op::reduce_shape;
pub use op::slice_shape;
pub use op::tile_shape;
pub use op::transpose_shape;
pub use op::AbsOp;
pub use op::AddOp;
pub use op::CastOp;
pub use op::ClampOp;
pub use op::ConstOp;
pub use op::ExpOp;
pub use op::MatmulOp;
pub use op::MaximumOp;
pub use op::MinimumOp;
pub use op::MulOp;
pub use op::NegateOp;
pub use op::PadOp;
pub use op::ReciprocalOp;
pub use op::ReduceSumOp;
pub use op::ReshapeOp;
pub use op::SigmoidOp;
pub use op::SliceOp;
pub use op::SubOp;
pub use op::TanhOp;
pub use op::TileOp;
pub use op::TransposeOp;

pub struct Tosa;

impl Dialect for Tosa {
    fn name(&self) -> &'static str {
        "tosa"
    }
    fn description(&self) -> &'static str {
        "Tensor Operator Set Architecture dialect"
    }
}
