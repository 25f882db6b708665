//! Per-tensor affine quantization.
//!
//! A quantized tensor stores integers `q` that represent the real values
//! `(q - zero_point) * scale`.
use crate::dialect::torch::expect_operands;
use crate::dialect::torch::fold_int;
use crate::dialect::torch::inferred_type;
use crate::dialect::torch::scalar_operand;
use crate::dialect::torch::tensor_op;
use crate::dialect::torch::tensor_operand;
use crate::dialect::torch::verify_inferred;
use crate::dialect::torch::Dtype;
use crate::dialect::torch::TensorInfo;
use crate::dialect::torch::TorchType;
use crate::ir::simple_op;
use crate::ir::Op;
use crate::ir::Type;
use crate::shared::Shared;
use crate::verify::SymbolTable;
use anyhow::Result;

fn quantized_input(op: &dyn Op) -> Result<TensorInfo> {
    let info = tensor_operand(op, 0)?;
    match info.dtype {
        Some(dtype) if !dtype.is_quantized() => Err(anyhow::anyhow!(
            "operand must be a quantized tensor, but has dtype {dtype}"
        )),
        _ => Ok(info),
    }
}

fn infer_quantize(op: &dyn Op) -> Result<TensorInfo> {
    expect_operands(op, 4)?;
    scalar_operand(op, 1, &[TorchType::Float])?;
    scalar_operand(op, 2, &[TorchType::Int])?;
    scalar_operand(op, 3, &[TorchType::Int])?;
    let info = tensor_operand(op, 0)?;
    if let Some(dtype) = info.dtype {
        if !dtype.is_float() {
            return Err(anyhow::anyhow!("can only quantize floats, but got {dtype}"));
        }
    }
    let dtype = match fold_int(&op.operand(3)?) {
        Some(code) => match Dtype::from_code(code) {
            Some(dtype) if dtype.is_quantized() => Some(dtype),
            _ => return Err(anyhow::anyhow!("dtype code {code} is not a quantized dtype")),
        },
        None => None,
    };
    Ok(TensorInfo::new(info.sizes, dtype))
}

fn infer_dequantize(op: &dyn Op) -> Result<TensorInfo> {
    expect_operands(op, 1)?;
    let info = quantized_input(op)?;
    Ok(TensorInfo::new(info.sizes, Some(Dtype::F32)))
}

fn infer_int_repr(op: &dyn Op) -> Result<TensorInfo> {
    expect_operands(op, 1)?;
    let info = quantized_input(op)?;
    let dtype = info.dtype.and_then(|dtype| dtype.int_repr());
    Ok(TensorInfo::new(info.sizes, dtype))
}

fn infer_affine_create(op: &dyn Op) -> Result<TensorInfo> {
    expect_operands(op, 3)?;
    scalar_operand(op, 1, &[TorchType::Float])?;
    scalar_operand(op, 2, &[TorchType::Int])?;
    let info = tensor_operand(op, 0)?;
    let dtype = match info.dtype {
        Some(dtype) => match dtype.quantized() {
            Some(quantized) => Some(quantized),
            None => {
                return Err(anyhow::anyhow!(
                    "expected si8 or ui8 values, but got {dtype}"
                ));
            }
        },
        None => None,
    };
    Ok(TensorInfo::new(info.sizes, dtype))
}

tensor_op!(
    /// `torch.aten.quantize_per_tensor`
    ///
    /// Operands are `self`, `scale`, `zero_point` and the dtype code of the
    /// quantized result (12 for `qint8` and 13 for `quint8`).
    ///
    /// ```mlir
    /// %1 = torch.aten.quantize_per_tensor %0, %scale, %zp, %int12 : !torch.vtensor<[4],f32>, !torch.float, !torch.int, !torch.int -> !torch.vtensor<[4],!torch.qint8>
    /// ```
    QuantizePerTensorOp,
    "torch.aten.quantize_per_tensor",
    infer_quantize
);

tensor_op!(
    /// `torch.aten.dequantize.self`
    DequantizeSelfOp,
    "torch.aten.dequantize.self",
    infer_dequantize
);

tensor_op!(
    /// `torch.aten.int_repr`
    ///
    /// The stored integers of a quantized tensor.
    IntReprOp,
    "torch.aten.int_repr",
    infer_int_repr
);

tensor_op!(
    /// `torch.per_tensor_affine.create`
    ///
    /// Reinterprets integers as a quantized tensor with the given scale and
    /// zero point. This op has no aten counterpart. The represented values
    /// are `(q - zero_point) * scale`.
    PerTensorAffineCreateOp,
    "torch.per_tensor_affine.create",
    infer_affine_create
);
