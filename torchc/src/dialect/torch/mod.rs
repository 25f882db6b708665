//! Torch dialect.
//!
//! Models TorchScript programs: value semantics tensors (`!torch.vtensor`),
//! primitive scalars, containers, structured control flow, and the
//! object graph of `nn.Module` instances.
mod aten;
mod control;
mod object;
mod op;
mod quant;
mod shape;
mod typ;

use crate::Dialect;

pub(crate) use aten::expect_operands;
pub(crate) use aten::inferred_type;
pub(crate) use aten::reduced_dims;
pub(crate) use aten::scalar_operand;
pub(crate) use aten::slice_params;
pub(crate) use aten::tensor_op;
pub(crate) use aten::tensor_operand;
pub(crate) use aten::transposed_dims;
pub(crate) use aten::verify_inferred;
pub use aten::AbsOp;
pub use aten::AddTensorOp;
pub use aten::BroadcastToOp;
pub use aten::ClampOp;
pub use aten::DivTensorOp;
pub use aten::ExpOp;
pub use aten::MaximumOp;
pub use aten::MinimumOp;
pub use aten::MmOp;
pub use aten::MulTensorOp;
pub use aten::NegOp;
pub use aten::ReluOp;
pub use aten::ReshapeOp;
pub use aten::SigmoidOp;
pub use aten::SliceTensorOp;
pub use aten::SubTensorOp;
pub use aten::SumDimIntListOp;
pub use aten::TanhOp;
pub use aten::TransposeIntOp;
pub use aten::ViewOp;
pub use control::PrimIfOp;
pub use control::PrimIfYieldOp;
pub use control::PrimLoopConditionOp;
pub use control::PrimLoopOp;
pub use object::enclosing_function;
pub(crate) use object::is_assignable;
pub use object::AttrOp;
pub use object::CallMethodOp;
pub use object::ClassTypeOp;
pub use object::GetAttrOp;
pub use object::GlobalSlotGetOp;
pub use object::GlobalSlotInitOp;
pub use object::GlobalSlotOp;
pub use object::GlobalSlotSetOp;
pub use object::MethodOp;
pub use object::NnModuleOp;
pub use object::SetAttrOp;
pub use object::SlotOp;
pub use op::fold_bool;
pub use op::fold_float;
pub use op::fold_int;
pub use op::fold_int_list;
pub use op::fold_value;
pub use op::is_none_value;
pub use op::value_tensor_info;
pub use op::value_torch_type;
pub(crate) use op::operand_type;
pub(crate) use op::replace_op_with_value;
pub(crate) use op::result_type;
pub use op::AddIntOp;
pub use op::ConstantBoolOp;
pub use op::ConstantDeviceOp;
pub use op::ConstantFloatOp;
pub use op::ConstantIntOp;
pub use op::ConstantNoneOp;
pub use op::ConstantStrOp;
pub use op::CopyToTensorOp;
pub use op::CopyToVtensorOp;
pub use op::DerefineOp;
pub use op::DictConstructOp;
pub use op::EqIntOp;
pub use op::GtIntOp;
pub use op::ListConstructOp;
pub use op::LtIntOp;
pub use op::MulIntOp;
pub use op::NeIntOp;
pub use op::SizeIntOp;
pub use op::SubIntOp;
pub use op::TensorStaticInfoCastOp;
pub use op::TupleConstructOp;
pub use quant::DequantizeSelfOp;
pub use quant::IntReprOp;
pub use quant::PerTensorAffineCreateOp;
pub use quant::QuantizePerTensorOp;
pub use shape::broadcast_info;
pub use shape::broadcast_sizes;
pub use shape::broadcast_static;
pub use shape::format_sizes;
pub use shape::normalize_dim;
pub use shape::reshape_sizes;
pub use shape::slice_bounds;
pub use shape::strides;
pub use typ::torch_type;
pub use typ::vtensor_info;
pub use typ::Dtype;
pub use typ::TensorInfo;
pub use typ::TorchType;

pub struct Torch;

impl Dialect for Torch {
    fn name(&self) -> &'static str {
        "torch"
    }
    fn description(&self) -> &'static str {
        "TorchScript dialect"
    }
}
