//! Legalization utilities shared by both lowerings.
//!
//! This covers the type conversion from torch types to builtin types, the
//! legality check that runs before any op is rewritten, the check that no
//! torch op survived, and the side table with quantization parameters.
use crate::dialect::func::CallOp;
use crate::dialect::func::FuncOp;
use crate::dialect::torch;
use crate::dialect::torch::Dtype;
use crate::dialect::torch::PrimLoopConditionOp;
use crate::dialect::torch::PrimLoopOp;
use crate::dialect::torch::TensorInfo;
use crate::dialect::torch::TorchType;
use crate::ir::new_type;
use crate::ir::GuardedOp;
use crate::ir::Op;
use crate::ir::ScalarType;
use crate::ir::ShapedType;
use crate::ir::Type;
use crate::ir::TypeConvert;
use crate::ir::Value;
use crate::pipeline::Target;
use crate::shared::ptr_id;
use crate::shared::Shared;
use crate::shared::SharedExt;
use crate::Error;
use anyhow::Result;
use std::collections::HashMap;

pub fn is_torch_op(op: &dyn Op) -> bool {
    op.name().to_string().starts_with("torch.")
}

/// Shape and storage type of a fully static value tensor.
pub fn static_tensor(info: &TensorInfo) -> Option<(Vec<i64>, ScalarType)> {
    let shape = info.static_shape()?;
    let dtype = info.dtype?;
    Some((shape, dtype.storage_type()))
}

/// Type of a torch value after lowering to `target`.
///
/// Returns `None` for torch types without a counterpart, such as lists,
/// which may only be used as compile-time parameters. Builtin types are
/// returned unchanged.
pub fn lowered_type(typ: &Shared<dyn Type>, target: Target) -> Result<Option<Shared<dyn Type>>> {
    let torch_type = match torch::torch_type(typ) {
        Some(torch_type) => torch_type,
        None => return Ok(Some(typ.clone())),
    };
    let scalar = match &torch_type {
        TorchType::Int => ScalarType::I64,
        TorchType::Float => ScalarType::F64,
        TorchType::Bool => ScalarType::I1,
        TorchType::ValueTensor(info) => {
            let (shape, element) = match static_tensor(info) {
                Some(tensor) => tensor,
                None => {
                    return Err(anyhow::anyhow!(
                        "cannot lower {torch_type}; the shape and dtype have to be static"
                    ));
                }
            };
            let shaped = match target {
                Target::Loops => ShapedType::memref(shape, element),
                Target::Tosa => ShapedType::tensor(shape, element),
            };
            return Ok(Some(new_type(shaped)));
        }
        _ => return Ok(None),
    };
    let lowered = match target {
        Target::Loops => new_type(scalar),
        Target::Tosa => new_type(ShapedType::tensor(vec![], scalar)),
    };
    Ok(Some(lowered))
}

fn convert_for(from: &Shared<dyn Type>, target: Target) -> Result<Shared<dyn Type>> {
    match lowered_type(from, target)? {
        Some(typ) => Ok(typ),
        None => Err(anyhow::anyhow!(
            "type {} has no counterpart in the {} pipeline",
            from.rd(),
            target
        )),
    }
}

pub struct LoopsTypeConverter;

impl TypeConvert for LoopsTypeConverter {
    fn convert_type(from: &Shared<dyn Type>) -> Result<Shared<dyn Type>> {
        convert_for(from, Target::Loops)
    }
}

pub struct TosaTypeConverter;

impl TypeConvert for TosaTypeConverter {
    fn convert_type(from: &Shared<dyn Type>) -> Result<Shared<dyn Type>> {
        convert_for(from, Target::Tosa)
    }
}

fn convert_types<T: TypeConvert>(types: &[Shared<dyn Type>]) -> Result<Vec<Shared<dyn Type>>> {
    types.iter().map(T::convert_type).collect()
}

fn convert_signatures_with<T: TypeConvert>(op: &Shared<dyn Op>) -> Result<()> {
    let guard = op.rd();
    if let Some(func) = guard.as_any().downcast_ref::<FuncOp>() {
        let inputs = convert_types::<T>(&func.argument_types()?.vec());
        let outputs = convert_types::<T>(&func.result_types()?.vec());
        match (inputs, outputs) {
            (Ok(inputs), Ok(outputs)) => func.set_signature(inputs, outputs)?,
            (Err(err), _) | (_, Err(err)) => return Err(Error::legalization(&*guard, err.to_string())),
        }
    } else if guard.as_any().is::<CallOp>() {
        let results = guard.operation().rd().results();
        if let Err(err) = results.convert_types::<T>() {
            return Err(Error::legalization(&*guard, err.to_string()));
        }
    }
    drop(guard);
    for nested in op.ops() {
        convert_signatures_with::<T>(&nested)?;
    }
    Ok(())
}

/// Convert the signatures of all functions and the results of calls.
///
/// Argument values keep their identity, so the uses inside the bodies see
/// the converted types right away.
pub fn convert_signatures(module: &Shared<dyn Op>, target: Target) -> Result<()> {
    match target {
        Target::Loops => convert_signatures_with::<LoopsTypeConverter>(module),
        Target::Tosa => convert_signatures_with::<TosaTypeConverter>(module),
    }
}

/// Ops that only provide compile-time parameters to other torch ops.
///
/// They are erased once their last user has been lowered.
pub fn is_parameter_op(op: &dyn Op) -> bool {
    let any = op.as_any();
    any.is::<torch::ConstantNoneOp>()
        || any.is::<torch::ConstantStrOp>()
        || any.is::<torch::ConstantDeviceOp>()
        || any.is::<torch::ListConstructOp>()
        || any.is::<torch::DerefineOp>()
}

pub fn is_scalar_op(op: &dyn Op) -> bool {
    let any = op.as_any();
    any.is::<torch::ConstantIntOp>()
        || any.is::<torch::ConstantFloatOp>()
        || any.is::<torch::ConstantBoolOp>()
        || any.is::<torch::AddIntOp>()
        || any.is::<torch::SubIntOp>()
        || any.is::<torch::MulIntOp>()
        || any.is::<torch::LtIntOp>()
        || any.is::<torch::GtIntOp>()
        || any.is::<torch::EqIntOp>()
        || any.is::<torch::NeIntOp>()
        || any.is::<torch::SizeIntOp>()
}

pub fn is_tensor_op(op: &dyn Op) -> bool {
    let any = op.as_any();
    any.is::<torch::AddTensorOp>()
        || any.is::<torch::SubTensorOp>()
        || any.is::<torch::MulTensorOp>()
        || any.is::<torch::DivTensorOp>()
        || any.is::<torch::MaximumOp>()
        || any.is::<torch::MinimumOp>()
        || any.is::<torch::ReluOp>()
        || any.is::<torch::NegOp>()
        || any.is::<torch::AbsOp>()
        || any.is::<torch::ExpOp>()
        || any.is::<torch::TanhOp>()
        || any.is::<torch::SigmoidOp>()
        || any.is::<torch::ClampOp>()
        || any.is::<torch::MmOp>()
        || any.is::<torch::SumDimIntListOp>()
        || any.is::<torch::TransposeIntOp>()
        || any.is::<torch::ViewOp>()
        || any.is::<torch::ReshapeOp>()
        || any.is::<torch::SliceTensorOp>()
        || any.is::<torch::BroadcastToOp>()
        || any.is::<torch::QuantizePerTensorOp>()
        || any.is::<torch::DequantizeSelfOp>()
        || any.is::<torch::IntReprOp>()
        || any.is::<torch::PerTensorAffineCreateOp>()
        || any.is::<torch::TensorStaticInfoCastOp>()
}

fn is_supported(op: &dyn Op, target: Target) -> Result<bool> {
    if is_parameter_op(op) || is_tensor_op(op) {
        return Ok(true);
    }
    match target {
        Target::Loops => {
            if is_scalar_op(op) {
                return Ok(true);
            }
            let any = op.as_any();
            if let Some(prim_loop) = any.downcast_ref::<PrimLoopOp>() {
                return Ok(prim_loop.is_for_like());
            }
            Ok(any.is::<torch::PrimIfOp>()
                || any.is::<torch::PrimIfYieldOp>()
                || any.is::<PrimLoopConditionOp>())
        }
        // Scalars are only parameters of tensor ops, so they have to fold.
        Target::Tosa => Ok(is_scalar_op(op) && op.fold().is_some()),
    }
}

/// Static tensor types are required for every tensor operand and result.
fn check_static(op: &dyn Op) -> Result<()> {
    let operation = op.operation().rd();
    let values = operation
        .operands()
        .values()
        .into_iter()
        .chain(operation.results().into_iter());
    for value in values {
        if let Some(info) = torch::value_tensor_info(&value) {
            if static_tensor(&info).is_none() {
                let typ = value.rd().typ()?;
                let typ = typ.rd().to_string();
                return Err(Error::legalization(
                    op,
                    format!("requires static shapes and dtypes, but got {typ}"),
                ));
            }
        }
    }
    Ok(())
}

fn check_legal(op: &Shared<dyn Op>, target: Target) -> Result<()> {
    let guard = op.rd();
    if is_torch_op(&*guard) {
        if !is_supported(&*guard, target)? {
            return Err(Error::not_legalized(&*guard, &target.to_string()));
        }
        if is_tensor_op(&*guard) {
            check_static(&*guard)?;
        }
    }
    drop(guard);
    for nested in op.ops() {
        check_legal(&nested, target)?;
    }
    Ok(())
}

/// Reject a unit with ops that `target` cannot lower, before any op of
/// `target` is created.
///
/// Returns the first offending op in program order.
pub fn ensure_legal(module: &Shared<dyn Op>, target: Target) -> Result<()> {
    check_legal(module, target)
}

fn first_torch_op(op: &Shared<dyn Op>) -> Option<Shared<dyn Op>> {
    if is_torch_op(&*op.rd()) {
        return Some(op.clone());
    }
    op.ops().iter().find_map(first_torch_op)
}

/// Check that no torch op survived the lowering.
pub fn ensure_lowered(module: &Shared<dyn Op>, target: Target) -> Result<()> {
    match first_torch_op(module) {
        Some(op) => Err(Error::not_legalized(&*op.rd(), &target.to_string())),
        None => Ok(()),
    }
}

/// Per-tensor affine parameters: `real = (q - zero_point) * scale`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantParams {
    pub scale: f64,
    pub zero_point: i64,
    pub dtype: Dtype,
}

impl QuantParams {
    /// Validate the parameters against the storage range of `dtype`.
    pub fn new(op: &dyn Op, scale: f64, zero_point: i64, dtype: Dtype) -> Result<Self> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(Error::attribute_range(
                op,
                format!("scale must be positive and finite, but got {scale}"),
            ));
        }
        let storage = dtype.storage_type();
        if let Some((min, max)) = storage.int_range() {
            if zero_point < min || max < zero_point {
                return Err(Error::attribute_range(
                    op,
                    format!("zero point {zero_point} does not fit into {storage}"),
                ));
            }
        }
        Ok(QuantParams {
            scale,
            zero_point,
            dtype,
        })
    }
    /// Smallest and largest stored integer.
    pub fn range(&self) -> (i64, i64) {
        self.dtype.storage_type().int_range().unwrap_or((0, 0))
    }
}

/// Quantization parameters of lowered values.
///
/// After lowering, a quantized tensor is just its storage integers, so the
/// scale and zero point are tracked on the side. The table holds on to the
/// values, which keeps their identity stable.
#[derive(Default)]
pub struct QuantTable {
    entries: HashMap<usize, (Shared<Value>, QuantParams)>,
}

impl QuantTable {
    pub fn new() -> Self {
        QuantTable::default()
    }
    pub fn insert(&mut self, value: &Shared<Value>, params: QuantParams) {
        self.entries.insert(ptr_id(value), (value.clone(), params));
    }
    pub fn get(&self, value: &Shared<Value>) -> Option<QuantParams> {
        self.entries.get(&ptr_id(value)).map(|(_, params)| *params)
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Operation;
    use crate::ir::OperationName;

    #[test]
    fn test_lowered_types() {
        let info = TensorInfo::of(&[3, 4], Dtype::QInt8);
        let typ = TorchType::ValueTensor(info).shared();
        let loops = lowered_type(&typ, Target::Loops).unwrap().unwrap();
        assert_eq!(loops.rd().to_string(), "memref<3x4xi8>");
        let tosa = lowered_type(&typ, Target::Tosa).unwrap().unwrap();
        assert_eq!(tosa.rd().to_string(), "tensor<3x4xi8>");
        let int = TorchType::Int.shared();
        let int = lowered_type(&int, Target::Tosa).unwrap().unwrap();
        assert_eq!(int.rd().to_string(), "tensor<i64>");
        let list = TorchType::List(Box::new(TorchType::Int)).shared();
        assert!(lowered_type(&list, Target::Loops).unwrap().is_none());
        let dynamic = TorchType::ValueTensor(TensorInfo::new(None, Some(Dtype::F32))).shared();
        assert!(lowered_type(&dynamic, Target::Loops).is_err());
    }

    struct Dummy {
        operation: Shared<Operation>,
    }

    impl Op for Dummy {
        fn operation_name() -> OperationName {
            OperationName::new("test.dummy".to_string())
        }
        fn new(operation: Shared<Operation>) -> Self {
            Dummy { operation }
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
        fn operation(&self) -> &Shared<Operation> {
            &self.operation
        }
    }

    #[test]
    fn test_quant_params_range() {
        let op = Dummy::from_operation(Operation::default());
        assert!(QuantParams::new(&op, 0.5, -128, Dtype::QInt8).is_ok());
        let err = QuantParams::new(&op, 0.5, 300, Dtype::QUInt8).unwrap_err();
        let err = err.downcast_ref::<Error>().unwrap();
        assert!(matches!(err, Error::AttributeRange { .. }));
        assert!(QuantParams::new(&op, 0.0, 0, Dtype::QInt8).is_err());
        let params = QuantParams::new(&op, 1.0, 0, Dtype::QUInt8).unwrap();
        assert_eq!(params.range(), (0, 255));
    }
}
