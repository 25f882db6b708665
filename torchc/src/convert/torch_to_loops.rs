//! Lowering of the torch dialect to loops over buffers.
//!
//! Every tensor becomes a `memref` and every tensor op a `memref.alloc`
//! followed by a loop nest that loads the operands, computes one element
//! and stores it. Scalars become `i64`, `f64` and `i1` values, and the
//! structured control flow of torch maps onto `scf`.
use crate::convert::apply_rewrites;
use crate::convert::legalize::is_parameter_op;
use crate::convert::legalize::lowered_type;
use crate::convert::legalize::static_tensor;
use crate::convert::Builder;
use crate::convert::Pass;
use crate::convert::QuantParams;
use crate::convert::QuantTable;
use crate::convert::Rewrite;
use crate::convert::RewriteResult;
use crate::dialect::arith;
use crate::dialect::math;
use crate::dialect::memref;
use crate::dialect::scf;
use crate::dialect::torch;
use crate::dialect::torch::fold_float;
use crate::dialect::torch::fold_int;
use crate::dialect::torch::is_none_value;
use crate::dialect::torch::replace_op_with_value;
use crate::dialect::torch::Dtype;
use crate::ir::new_type;
use crate::ir::replace_all_uses_with;
use crate::ir::scalar_type;
use crate::ir::shaped_type;
use crate::ir::uses;
use crate::ir::Attribute;
use crate::ir::Attributes;
use crate::ir::GuardedOpOperand;
use crate::ir::GuardedRegion;
use crate::ir::Op;
use crate::ir::ScalarType;
use crate::ir::ShapedType;
use crate::ir::StringAttr;
use crate::ir::Type;
use crate::ir::Users;
use crate::ir::Value;
use crate::pipeline::Target;
use crate::shared::Shared;
use crate::shared::SharedExt;
use crate::Error;
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

type Compute<'a> = dyn Fn(&Builder, &[Shared<Value>]) -> Result<Shared<Value>> + 'a;

fn memref_of(value: &Shared<Value>) -> Result<ShapedType> {
    let typ = value.rd().typ()?;
    match shaped_type(&typ) {
        Some(shaped) => Ok(shaped),
        None => Err(anyhow::anyhow!("expected a memref, but got {}", typ.rd())),
    }
}

fn scalar_of(value: &Shared<Value>) -> Result<ScalarType> {
    let typ = value.rd().typ()?;
    match scalar_type(&typ) {
        Some(scalar) => Ok(scalar),
        None => Err(anyhow::anyhow!("expected a scalar, but got {}", typ.rd())),
    }
}

/// Static shape and element type of result `index`.
fn result_tensor(op: &dyn Op, index: usize) -> Result<(Vec<i64>, ScalarType, Option<Dtype>)> {
    let result = op.result(index)?;
    let info = match torch::value_tensor_info(&result) {
        Some(info) => info,
        None => return Err(Error::legalization(op, "expected a tensor result")),
    };
    match static_tensor(&info) {
        Some((shape, element)) => Ok((shape, element, info.dtype)),
        None => Err(Error::legalization(op, "requires a static result type")),
    }
}

fn lowered(op: &dyn Op, typ: &Shared<dyn Type>) -> Result<Shared<dyn Type>> {
    match lowered_type(typ, Target::Loops)? {
        Some(lowered) => Ok(lowered),
        None => Err(Error::legalization(
            op,
            format!("type {} has no counterpart", typ.rd()),
        )),
    }
}

fn predicate(name: &str) -> Attributes {
    let attributes = Attributes::new();
    let attr: Arc<dyn Attribute> = Arc::new(StringAttr::new(name));
    attributes.insert("predicate", attr);
    attributes
}

fn compare(b: &Builder, name: &str, lhs: &Shared<Value>, rhs: &Shared<Value>) -> Result<Shared<Value>> {
    let operands = [lhs.clone(), rhs.clone()];
    let i1 = new_type(ScalarType::I1);
    if scalar_of(lhs)?.is_float() {
        b.value_with::<arith::CmpfOp>(&operands, predicate(name), i1)
    } else {
        b.value_with::<arith::CmpiOp>(&operands, predicate(name), i1)
    }
}

/// Convert a scalar between element types.
///
/// Booleans are 0 or 1 and `ui8` widens without sign extension.
fn cast(b: &Builder, value: &Shared<Value>, to: ScalarType) -> Result<Shared<Value>> {
    let from = scalar_of(value)?;
    if from == to {
        return Ok(value.clone());
    }
    let operand = [value.clone()];
    let typ = new_type(to);
    if to == ScalarType::I1 {
        let zero = b.scalar(0.0, from)?;
        let name = if from.is_float() { "one" } else { "ne" };
        return compare(b, name, value, &zero);
    }
    if from == ScalarType::I1 {
        let one = b.scalar(1.0, to)?;
        let zero = b.scalar(0.0, to)?;
        return b.value::<arith::SelectOp>(&[value.clone(), one, zero], typ);
    }
    match (from.is_float(), to.is_float()) {
        (true, true) if to.bit_width() > from.bit_width() => b.value::<arith::ExtfOp>(&operand, typ),
        (true, true) => b.value::<arith::TruncfOp>(&operand, typ),
        (false, true) if from.is_unsigned() => b.value::<arith::UitofpOp>(&operand, typ),
        (false, true) => b.value::<arith::SitofpOp>(&operand, typ),
        (true, false) if to.is_unsigned() => b.value::<arith::FptouiOp>(&operand, typ),
        (true, false) => b.value::<arith::FptosiOp>(&operand, typ),
        (false, false) => {
            if from.is_unsigned() && to.bit_width() > from.bit_width() {
                let wide = b.value::<arith::UitofpOp>(&operand, new_type(ScalarType::F64))?;
                b.value::<arith::FptosiOp>(&[wide], typ)
            } else if to.bit_width() > from.bit_width() {
                b.value::<arith::ExtsiOp>(&operand, typ)
            } else {
                b.value::<arith::TrunciOp>(&operand, typ)
            }
        }
    }
}

#[derive(Clone, Copy)]
enum Binary {
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
}

fn binary(b: &Builder, kind: Binary, lhs: &Shared<Value>, rhs: &Shared<Value>) -> Result<Shared<Value>> {
    let element = scalar_of(lhs)?;
    let operands = [lhs.clone(), rhs.clone()];
    let typ = new_type(element);
    match (kind, element.is_float()) {
        (Binary::Add, true) => b.value::<arith::AddfOp>(&operands, typ),
        (Binary::Add, false) => b.value::<arith::AddiOp>(&operands, typ),
        (Binary::Sub, true) => b.value::<arith::SubfOp>(&operands, typ),
        (Binary::Sub, false) => b.value::<arith::SubiOp>(&operands, typ),
        (Binary::Mul, true) => b.value::<arith::MulfOp>(&operands, typ),
        (Binary::Mul, false) => b.value::<arith::MuliOp>(&operands, typ),
        (Binary::Div, true) => b.value::<arith::DivfOp>(&operands, typ),
        (Binary::Div, false) => b.value::<arith::DivsiOp>(&operands, typ),
        (Binary::Max, true) => b.value::<arith::MaximumfOp>(&operands, typ),
        (Binary::Max, false) => b.value::<arith::MaxsiOp>(&operands, typ),
        (Binary::Min, true) => b.value::<arith::MinimumfOp>(&operands, typ),
        (Binary::Min, false) => b.value::<arith::MinsiOp>(&operands, typ),
    }
}

fn alloc(b: &Builder, shape: &[i64], element: ScalarType) -> Result<Shared<Value>> {
    let typ = new_type(ShapedType::memref(shape.to_vec(), element));
    b.value::<memref::AllocOp>(&[], typ)
}

fn load(b: &Builder, buffer: &Shared<Value>, indices: &[Shared<Value>]) -> Result<Shared<Value>> {
    let element = memref_of(buffer)?.element();
    let mut operands = vec![buffer.clone()];
    operands.extend(indices.iter().cloned());
    b.value::<memref::LoadOp>(&operands, new_type(element))
}

fn store(b: &Builder, value: &Shared<Value>, buffer: &Shared<Value>, indices: &[Shared<Value>]) -> Result<()> {
    let mut operands = vec![value.clone(), buffer.clone()];
    operands.extend(indices.iter().cloned());
    b.emit::<memref::StoreOp>(&operands)
}

/// Indices into an operand of `shape` that broadcasts against the loop
/// nest; dimensions are aligned at the end and size 1 dimensions stay at 0.
fn broadcast_indices(b: &Builder, shape: &[i64], ivs: &[Shared<Value>]) -> Result<Vec<Shared<Value>>> {
    let offset = ivs.len() - shape.len();
    let mut indices = vec![];
    for (i, size) in shape.iter().enumerate() {
        if *size == 1 {
            indices.push(b.index(0)?);
        } else {
            indices.push(ivs[offset + i].clone());
        }
    }
    Ok(indices)
}

/// Buffer of `shape` where element `i` is `compute` of the broadcast
/// elements of `inputs` at `i`.
fn elementwise(
    b: &Builder,
    inputs: &[Shared<Value>],
    shape: &[i64],
    element: ScalarType,
    compute: &Compute,
) -> Result<Shared<Value>> {
    let shapes = inputs
        .iter()
        .map(|input| Ok(memref_of(input)?.shape().to_vec()))
        .collect::<Result<Vec<Vec<i64>>>>()?;
    if shapes.iter().any(|s| s.len() > shape.len()) {
        return Err(anyhow::anyhow!("operand rank exceeds the result rank"));
    }
    let output = alloc(b, shape, element)?;
    b.loop_nest(shape, &mut |nested, ivs| {
        let mut loaded = vec![];
        for (input, input_shape) in inputs.iter().zip(&shapes) {
            let indices = broadcast_indices(nested, input_shape, ivs)?;
            loaded.push(load(nested, input, &indices)?);
        }
        let value = compute(nested, &loaded)?;
        let value = cast(nested, &value, element)?;
        store(nested, &value, &output, ivs)
    })?;
    Ok(output)
}

/// `alpha` of `add.Tensor` and `sub.Tensor`, or `None` if it is one.
fn alpha(b: &Builder, op: &dyn Op, element: ScalarType) -> Result<Option<Shared<Value>>> {
    let value = op.operand(2)?;
    if fold_float(&value) == Some(1.0) {
        return Ok(None);
    }
    Ok(Some(cast(b, &value, element)?))
}

fn lower_binary(b: &Builder, op: &dyn Op, kind: Binary) -> Result<Shared<Value>> {
    let (shape, element, _) = result_tensor(op, 0)?;
    let inputs = [op.operand(0)?, op.operand(1)?];
    let any = op.as_any();
    let scaled = any.is::<torch::AddTensorOp>() || any.is::<torch::SubTensorOp>();
    let alpha = if scaled { alpha(b, op, element)? } else { None };
    let compute = |b: &Builder, values: &[Shared<Value>]| {
        let lhs = cast(b, &values[0], element)?;
        let mut rhs = cast(b, &values[1], element)?;
        if let Some(alpha) = &alpha {
            rhs = binary(b, Binary::Mul, &rhs, alpha)?;
        }
        binary(b, kind, &lhs, &rhs)
    };
    elementwise(b, &inputs, &shape, element, &compute)
}

fn negate(b: &Builder, value: &Shared<Value>) -> Result<Shared<Value>> {
    let element = scalar_of(value)?;
    if element.is_float() {
        b.value::<arith::NegfOp>(&[value.clone()], new_type(element))
    } else {
        let zero = b.scalar(0.0, element)?;
        binary(b, Binary::Sub, &zero, value)
    }
}

fn lower_unary(b: &Builder, op: &dyn Op) -> Result<Shared<Value>> {
    let (shape, element, _) = result_tensor(op, 0)?;
    let inputs = [op.operand(0)?];
    let any = op.as_any();
    let typ = new_type(element);
    let zero = b.scalar(0.0, element)?;
    let one = b.scalar(1.0, element)?;
    let compute = |b: &Builder, values: &[Shared<Value>]| -> Result<Shared<Value>> {
        let x = cast(b, &values[0], element)?;
        let operand = [x.clone()];
        if any.is::<torch::ReluOp>() {
            binary(b, Binary::Max, &x, &zero)
        } else if any.is::<torch::NegOp>() {
            negate(b, &x)
        } else if any.is::<torch::AbsOp>() {
            if element.is_float() {
                return b.value::<math::AbsfOp>(&operand, typ.clone());
            }
            let negative = compare(b, "slt", &x, &zero)?;
            let negated = negate(b, &x)?;
            b.value::<arith::SelectOp>(&[negative, negated, x.clone()], typ.clone())
        } else if any.is::<torch::ExpOp>() {
            b.value::<math::ExpOp>(&operand, typ.clone())
        } else if any.is::<torch::TanhOp>() {
            b.value::<math::TanhOp>(&operand, typ.clone())
        } else {
            let negated = negate(b, &x)?;
            let exp = b.value::<math::ExpOp>(&[negated], typ.clone())?;
            let denominator = binary(b, Binary::Add, &one, &exp)?;
            binary(b, Binary::Div, &one, &denominator)
        }
    };
    elementwise(b, &inputs, &shape, element, &compute)
}

fn lower_clamp(b: &Builder, op: &dyn Op) -> Result<Shared<Value>> {
    let (shape, element, _) = result_tensor(op, 0)?;
    let bound = |index: usize| -> Result<Option<Shared<Value>>> {
        let value = op.operand(index)?;
        if is_none_value(&value) {
            return Ok(None);
        }
        Ok(Some(cast(b, &value, element)?))
    };
    let (min, max) = (bound(1)?, bound(2)?);
    let compute = |b: &Builder, values: &[Shared<Value>]| {
        let mut x = cast(b, &values[0], element)?;
        if let Some(min) = &min {
            x = binary(b, Binary::Max, &x, min)?;
        }
        if let Some(max) = &max {
            x = binary(b, Binary::Min, &x, max)?;
        }
        Ok(x)
    };
    elementwise(b, &[op.operand(0)?], &shape, element, &compute)
}

fn lower_mm(b: &Builder, op: &dyn Op) -> Result<Shared<Value>> {
    let (shape, element, _) = result_tensor(op, 0)?;
    let lhs = op.operand(0)?;
    let rhs = op.operand(1)?;
    let contracted = memref_of(&lhs)?.shape()[1];
    let output = alloc(b, &shape, element)?;
    b.loop_nest(&shape, &mut |nested, ivs| {
        let zero = nested.scalar(0.0, element)?;
        let lower = nested.index(0)?;
        let upper = nested.index(contracted)?;
        let step = nested.index(1)?;
        let sum = nested.for_loop(&lower, &upper, &step, &[zero], |body, k, acc| {
            let a = load(body, &lhs, &[ivs[0].clone(), k.clone()])?;
            let a = cast(body, &a, element)?;
            let c = load(body, &rhs, &[k, ivs[1].clone()])?;
            let c = cast(body, &c, element)?;
            let product = binary(body, Binary::Mul, &a, &c)?;
            Ok(vec![binary(body, Binary::Add, &acc[0], &product)?])
        })?;
        store(nested, &sum[0], &output, ivs)
    })?;
    Ok(output)
}

fn lower_sum(b: &Builder, op: &dyn Op) -> Result<Shared<Value>> {
    let (shape, element, _) = result_tensor(op, 0)?;
    let input = op.operand(0)?;
    let input_shape = memref_of(&input)?.shape().to_vec();
    let dims = match torch::reduced_dims(op, input_shape.len())? {
        Some(dims) => dims,
        None => return Err(Error::legalization(op, "requires constant dimensions")),
    };
    let keepdim = shape.len() == input_shape.len();
    let output = alloc(b, &shape, element)?;
    b.loop_nest(&shape, &mut |nested, ivs| {
        let zero = nested.scalar(0.0, element)?;
        store(nested, &zero, &output, ivs)
    })?;
    b.loop_nest(&input_shape, &mut |nested, ivs| {
        let mut indices = vec![];
        for (i, iv) in ivs.iter().enumerate() {
            if !dims.contains(&i) {
                indices.push(iv.clone());
            } else if keepdim {
                indices.push(nested.index(0)?);
            }
        }
        let x = load(nested, &input, ivs)?;
        let x = cast(nested, &x, element)?;
        let acc = load(nested, &output, &indices)?;
        let acc = binary(nested, Binary::Add, &acc, &x)?;
        store(nested, &acc, &output, &indices)
    })?;
    Ok(output)
}

/// Copy into a buffer of the result shape where `index` maps the result
/// indices to the input indices.
fn gather(
    b: &Builder,
    op: &dyn Op,
    index: &dyn Fn(&Builder, &[Shared<Value>]) -> Result<Vec<Shared<Value>>>,
) -> Result<Shared<Value>> {
    let (shape, element, _) = result_tensor(op, 0)?;
    let input = op.operand(0)?;
    let output = alloc(b, &shape, element)?;
    b.loop_nest(&shape, &mut |nested, ivs| {
        let indices = index(nested, ivs)?;
        let x = load(nested, &input, &indices)?;
        let x = cast(nested, &x, element)?;
        store(nested, &x, &output, ivs)
    })?;
    Ok(output)
}

fn lower_transpose(b: &Builder, op: &dyn Op) -> Result<Shared<Value>> {
    let rank = memref_of(&op.operand(0)?)?.rank();
    let (d0, d1) = match torch::transposed_dims(op, rank)? {
        Some(dims) => dims,
        None => return Err(Error::legalization(op, "requires constant dimensions")),
    };
    gather(b, op, &|_, ivs| {
        let mut indices = ivs.to_vec();
        indices.swap(d0, d1);
        Ok(indices)
    })
}

fn index_op<O: Op + 'static>(b: &Builder, lhs: &Shared<Value>, rhs: &Shared<Value>) -> Result<Shared<Value>> {
    b.value::<O>(&[lhs.clone(), rhs.clone()], new_type(ScalarType::Index))
}

fn lower_view(b: &Builder, op: &dyn Op) -> Result<Shared<Value>> {
    let (shape, _, _) = result_tensor(op, 0)?;
    let input_shape = memref_of(&op.operand(0)?)?.shape().to_vec();
    let output_strides = torch::strides(&shape);
    let input_strides = torch::strides(&input_shape);
    gather(b, op, &|b, ivs| {
        let mut linear = b.index(0)?;
        for (iv, stride) in ivs.iter().zip(&output_strides) {
            let stride = b.index(*stride)?;
            let term = index_op::<arith::MuliOp>(b, iv, &stride)?;
            linear = index_op::<arith::AddiOp>(b, &linear, &term)?;
        }
        let mut indices = vec![];
        for (size, stride) in input_shape.iter().zip(&input_strides) {
            let stride = b.index(*stride)?;
            let size = b.index(*size)?;
            let quotient = index_op::<arith::DivsiOp>(b, &linear, &stride)?;
            indices.push(index_op::<arith::RemsiOp>(b, &quotient, &size)?);
        }
        Ok(indices)
    })
}

fn lower_slice(b: &Builder, op: &dyn Op) -> Result<Shared<Value>> {
    let input_shape = memref_of(&op.operand(0)?)?.shape().to_vec();
    let (dim, start, _, step) = match torch::slice_params(op, &input_shape)? {
        Some(params) => params,
        None => return Err(Error::legalization(op, "requires constant slice bounds")),
    };
    gather(b, op, &|b, ivs| {
        let mut indices = ivs.to_vec();
        let step = b.index(step)?;
        let start = b.index(start)?;
        let offset = index_op::<arith::MuliOp>(b, &ivs[dim], &step)?;
        indices[dim] = index_op::<arith::AddiOp>(b, &start, &offset)?;
        Ok(indices)
    })
}

fn lower_broadcast_to(b: &Builder, op: &dyn Op) -> Result<Shared<Value>> {
    let input_shape = memref_of(&op.operand(0)?)?.shape().to_vec();
    gather(b, op, &|b, ivs| broadcast_indices(b, &input_shape, ivs))
}

fn quant_params(op: &dyn Op, dtype: Option<Dtype>) -> Result<QuantParams> {
    let scale = fold_float(&op.operand(1)?);
    let zero_point = fold_int(&op.operand(2)?);
    match (scale, zero_point, dtype) {
        (Some(scale), Some(zero_point), Some(dtype)) if dtype.is_quantized() => {
            QuantParams::new(op, scale, zero_point, dtype)
        }
        _ => Err(Error::legalization(
            op,
            "requires a constant scale, zero point and quantized dtype",
        )),
    }
}

/// `q = clamp(roundeven(x / scale) + zero_point, min, max)` in the storage
/// type.
fn lower_quantize(b: &Builder, op: &dyn Op, table: &Shared<QuantTable>) -> Result<Shared<Value>> {
    let (shape, element, dtype) = result_tensor(op, 0)?;
    let params = quant_params(op, dtype)?;
    let input = op.operand(0)?;
    let real = memref_of(&input)?.element();
    let scale = b.float(params.scale, real)?;
    let zero_point = b.float(params.zero_point as f64, real)?;
    let (min, max) = params.range();
    let min = b.float(min as f64, real)?;
    let max = b.float(max as f64, real)?;
    let compute = |b: &Builder, values: &[Shared<Value>]| {
        let scaled = binary(b, Binary::Div, &values[0], &scale)?;
        let rounded = b.value::<math::RoundevenOp>(&[scaled], new_type(real))?;
        let shifted = binary(b, Binary::Add, &rounded, &zero_point)?;
        let clamped = binary(b, Binary::Max, &shifted, &min)?;
        let clamped = binary(b, Binary::Min, &clamped, &max)?;
        cast(b, &clamped, element)
    };
    let output = elementwise(b, &[input], &shape, element, &compute)?;
    table.wr().insert(&output, params);
    Ok(output)
}

/// `x = (q - zero_point) * scale`.
fn lower_dequantize(b: &Builder, op: &dyn Op, table: &Shared<QuantTable>) -> Result<Shared<Value>> {
    let (shape, element, _) = result_tensor(op, 0)?;
    let input = op.operand(0)?;
    let params = match table.rd().get(&input) {
        Some(params) => params,
        None => return Err(Error::legalization(op, "unknown quantization parameters")),
    };
    let scale = b.float(params.scale, element)?;
    let zero_point = b.float(params.zero_point as f64, element)?;
    let compute = |b: &Builder, values: &[Shared<Value>]| {
        let q = cast(b, &values[0], element)?;
        let shifted = binary(b, Binary::Sub, &q, &zero_point)?;
        binary(b, Binary::Mul, &shifted, &scale)
    };
    elementwise(b, &[input], &shape, element, &compute)
}

fn lower_tensor_op(b: &Builder, op: &dyn Op, table: &Shared<QuantTable>) -> Result<Shared<Value>> {
    let any = op.as_any();
    if any.is::<torch::AddTensorOp>() {
        lower_binary(b, op, Binary::Add)
    } else if any.is::<torch::SubTensorOp>() {
        lower_binary(b, op, Binary::Sub)
    } else if any.is::<torch::MulTensorOp>() {
        lower_binary(b, op, Binary::Mul)
    } else if any.is::<torch::DivTensorOp>() {
        lower_binary(b, op, Binary::Div)
    } else if any.is::<torch::MaximumOp>() {
        lower_binary(b, op, Binary::Max)
    } else if any.is::<torch::MinimumOp>() {
        lower_binary(b, op, Binary::Min)
    } else if any.is::<torch::ClampOp>() {
        lower_clamp(b, op)
    } else if any.is::<torch::MmOp>() {
        lower_mm(b, op)
    } else if any.is::<torch::SumDimIntListOp>() {
        lower_sum(b, op)
    } else if any.is::<torch::TransposeIntOp>() {
        lower_transpose(b, op)
    } else if any.is::<torch::ViewOp>() || any.is::<torch::ReshapeOp>() {
        lower_view(b, op)
    } else if any.is::<torch::SliceTensorOp>() {
        lower_slice(b, op)
    } else if any.is::<torch::BroadcastToOp>() {
        lower_broadcast_to(b, op)
    } else if any.is::<torch::QuantizePerTensorOp>() {
        lower_quantize(b, op, table)
    } else if any.is::<torch::DequantizeSelfOp>() {
        lower_dequantize(b, op, table)
    } else if any.is::<torch::PerTensorAffineCreateOp>() {
        let (_, _, dtype) = result_tensor(op, 0)?;
        let params = quant_params(op, dtype)?;
        let input = op.operand(0)?;
        table.wr().insert(&input, params);
        Ok(input)
    } else if any.is::<torch::IntReprOp>() || any.is::<torch::TensorStaticInfoCastOp>() {
        result_tensor(op, 0)?;
        op.operand(0)
    } else {
        lower_unary(b, op)
    }
}

fn lower_scalar_op(b: &Builder, op: &dyn Op) -> Result<Shared<Value>> {
    let result = op.result(0)?;
    let typ = lowered(op, &result.rd().typ()?)?;
    let literal = match op.as_any().downcast_ref::<torch::SizeIntOp>() {
        Some(size) => {
            let shape = memref_of(&size.operand(0)?)?.shape().to_vec();
            let dim = fold_int(&size.operand(1)?).and_then(|dim| torch::normalize_dim(dim, shape.len()));
            dim.map(|dim| crate::ir::Literal::Int(shape[dim]))
        }
        None => op.fold(),
    };
    if let Some(literal) = literal {
        return match b.literal(&literal, &typ)? {
            Some(constant) => Ok(constant),
            None => Err(Error::legalization(op, format!("cannot materialize {literal}"))),
        };
    }
    let lhs = op.operand(0)?;
    let rhs = op.operand(1)?;
    let any = op.as_any();
    if any.is::<torch::AddIntOp>() {
        binary(b, Binary::Add, &lhs, &rhs)
    } else if any.is::<torch::SubIntOp>() {
        binary(b, Binary::Sub, &lhs, &rhs)
    } else if any.is::<torch::MulIntOp>() {
        binary(b, Binary::Mul, &lhs, &rhs)
    } else if any.is::<torch::LtIntOp>() {
        compare(b, "slt", &lhs, &rhs)
    } else if any.is::<torch::GtIntOp>() {
        compare(b, "sgt", &lhs, &rhs)
    } else if any.is::<torch::EqIntOp>() {
        compare(b, "eq", &lhs, &rhs)
    } else if any.is::<torch::NeIntOp>() {
        compare(b, "ne", &lhs, &rhs)
    } else {
        Err(Error::not_legalized(op, &Target::Loops.to_string()))
    }
}

/// Move the regions of `from` to `to`.
fn move_regions(from: &dyn Op, to: &Shared<dyn Op>) {
    let regions = from.operation().rd().regions();
    for region in &regions {
        region.set_parent(Some(to.clone()));
    }
    to.rd().operation().wr().set_regions(regions);
    from.operation().wr().set_regions(vec![]);
}

/// Point the uses of the results of `from` to the results of `to` and
/// remove `from`.
fn replace_results(from: &dyn Op, to: &Shared<dyn Op>) -> Result<RewriteResult> {
    let changed = RewriteResult::changed_around(from)?;
    let old = from.operation().rd().results();
    let new = to.rd().operation().rd().results();
    for (old, new) in old.into_iter().zip(new) {
        replace_all_uses_with(&old, &new);
    }
    from.remove()?;
    Ok(changed)
}

fn lowered_results(op: &dyn Op) -> Result<Vec<Shared<dyn Type>>> {
    let types = op.operation().rd().result_types()?.vec();
    types.iter().map(|typ| lowered(op, typ)).collect()
}

fn lower_if(op: &Shared<dyn Op>) -> Result<RewriteResult> {
    let guard = op.rd();
    let types = lowered_results(&*guard)?;
    let b = Builder::before(op);
    let condition = guard.operand(0)?;
    let new = b.create::<scf::IfOp>(&[condition], Attributes::new(), types)?;
    move_regions(&*guard, &new);
    replace_results(&*guard, &new)
}

/// `torch.prim.Loop` with a condition that is always true becomes an
/// `scf.for` from zero to the trip count.
fn lower_loop(op: &Shared<dyn Op>) -> Result<RewriteResult> {
    let guard = op.rd();
    let prim_loop = match guard.as_any().downcast_ref::<torch::PrimLoopOp>() {
        Some(prim_loop) => prim_loop,
        None => return Ok(RewriteResult::Unchanged),
    };
    let body = match prim_loop.body() {
        Some(body) => body,
        None => return Err(Error::legalization(&*guard, "expected a loop body")),
    };
    if !prim_loop.is_for_like() {
        return Err(Error::legalization(
            &*guard,
            "requires a loop that always continues",
        ));
    }
    let types = lowered_results(&*guard)?;
    let b = Builder::before(op);
    let max = guard.operand(0)?;
    let upper = match fold_int(&max) {
        Some(max) => b.index(max.max(0))?,
        None => b.value::<arith::IndexCastOp>(&[max], new_type(ScalarType::Index))?,
    };
    let mut operands = vec![b.index(0)?, upper, b.index(1)?];
    operands.extend(prim_loop.inits());
    let new = b.create::<scf::ForOp>(&operands, Attributes::new(), types.clone())?;

    let arguments = body.rd().arguments().into_iter().collect::<Vec<_>>();
    for (argument, typ) in arguments.iter().skip(1).zip(&types) {
        argument.wr().set_type(typ.clone());
    }
    if let Some(iv) = arguments.first() {
        let iv_uses = uses(iv);
        iv.wr().set_type(new_type(ScalarType::Index));
        let first = body.rd().ops().rd().first().cloned();
        if let (false, Some(first)) = (iv_uses.is_empty(), first) {
            let inner = Builder::before(&first);
            let cast = inner.value::<arith::IndexCastOp>(&[iv.clone()], new_type(ScalarType::I64))?;
            for u in iv_uses {
                u.operand.set_value(cast.clone());
            }
        }
    }
    move_regions(&*guard, &new);
    replace_results(&*guard, &new)
}

fn lower_terminator(op: &Shared<dyn Op>, skip: usize) -> Result<RewriteResult> {
    let guard = op.rd();
    let operands = guard.operation().rd().operands().values();
    let b = Builder::before(op);
    b.emit::<scf::YieldOp>(&operands[skip..])?;
    let changed = RewriteResult::changed_around(&*guard)?;
    guard.remove()?;
    Ok(changed)
}

fn erase(op: &Shared<dyn Op>) -> Result<RewriteResult> {
    let guard = op.rd();
    let changed = RewriteResult::changed_around(&*guard)?;
    guard.remove()?;
    Ok(changed)
}

fn has_users(op: &dyn Op) -> bool {
    match op.users() {
        Users::HasNoOpResults => false,
        Users::OpOperands(users) => !users.is_empty(),
    }
}

/// Lower one torch op, in program order.
///
/// Parameter ops such as lists wait until their users are lowered, since
/// those read the parameters at compile time.
struct LowerToLoops {
    table: Shared<QuantTable>,
}

impl Rewrite for LowerToLoops {
    fn name(&self) -> &'static str {
        "torch_to_loops::LowerToLoops"
    }
    fn is_match(&self, op: &dyn Op) -> Result<bool> {
        if !crate::convert::is_torch_op(op) {
            return Ok(false);
        }
        Ok(!is_parameter_op(op) || !has_users(op))
    }
    fn rewrite(&self, op: Shared<dyn Op>) -> Result<RewriteResult> {
        let kind = {
            let guard = op.rd();
            let any = guard.as_any();
            if is_parameter_op(&*guard) {
                return erase(&op);
            } else if any.is::<torch::PrimIfOp>() {
                return lower_if(&op);
            } else if any.is::<torch::PrimLoopOp>() {
                return lower_loop(&op);
            } else if any.is::<torch::PrimIfYieldOp>() {
                return lower_terminator(&op, 0);
            } else if any.is::<torch::PrimLoopConditionOp>() {
                return lower_terminator(&op, 1);
            }
            crate::convert::legalize::is_scalar_op(&*guard)
        };
        let b = Builder::before(&op);
        let guard = op.rd();
        let value = if kind {
            lower_scalar_op(&b, &*guard)?
        } else if crate::convert::legalize::is_tensor_op(&*guard) {
            lower_tensor_op(&b, &*guard, &self.table)?
        } else {
            return Err(Error::not_legalized(&*guard, &Target::Loops.to_string()));
        };
        replace_op_with_value(&*guard, &value)
    }
}

/// Lower to loops and record quantization parameters in `table`.
pub fn convert_to_loops(op: Shared<dyn Op>, table: &Shared<QuantTable>) -> Result<RewriteResult> {
    info!("Running {}", ConvertTorchToLoops::NAME);
    let lower = LowerToLoops {
        table: table.clone(),
    };
    let rewrites: Vec<&dyn Rewrite> = vec![&lower];
    apply_rewrites(op, &rewrites)
}

pub struct ConvertTorchToLoops;

impl Pass for ConvertTorchToLoops {
    const NAME: &'static str = "convert-torch-to-loops";
    fn convert(op: Shared<dyn Op>) -> Result<RewriteResult> {
        crate::convert::convert_signatures(&op, Target::Loops)?;
        let table = Shared::new(QuantTable::new().into());
        convert_to_loops(op, &table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::DefaultParserDispatch;
    use crate::frontend::Parser;
    use indoc::indoc;

    fn lower(src: &str) -> String {
        let module = Parser::<DefaultParserDispatch>::parse(src).unwrap();
        ConvertTorchToLoops::convert(module.clone()).unwrap();
        crate::verify::verify(&module).unwrap();
        let text = module.rd().to_string();
        text
    }

    #[test]
    fn test_relu() {
        let src = indoc! {"
        func.func @f(%x : !torch.vtensor<[4],f32>) -> !torch.vtensor<[4],f32> {
          %0 = torch.aten.relu %x : !torch.vtensor<[4],f32> -> !torch.vtensor<[4],f32>
          return %0 : !torch.vtensor<[4],f32>
        }"};
        let text = lower(src);
        assert!(text.contains("func.func @f(%x : memref<4xf32>) -> memref<4xf32>"), "{text}");
        assert!(text.contains("memref.alloc() : memref<4xf32>"), "{text}");
        assert!(text.contains("arith.maximumf"), "{text}");
        assert!(!text.contains("torch."), "{text}");
    }

    #[test]
    fn test_scalar_loop() {
        let src = indoc! {"
        func.func @f(%n : !torch.int) -> !torch.int {
          %int0 = torch.constant.int 0
          %true = torch.constant.bool true
          %0 = torch.prim.Loop %n, %true, init(%int0) {
          ^bb0(%iv: !torch.int, %acc: !torch.int):
            %1 = torch.aten.add.int %acc, %iv : !torch.int, !torch.int -> !torch.int
            torch.prim.Loop.condition %true, iter(%1 : !torch.int)
          } : (!torch.int, !torch.bool, !torch.int) -> (!torch.int)
          return %0 : !torch.int
        }"};
        let text = lower(src);
        assert!(text.contains("func.func @f(%n : i64) -> i64"), "{text}");
        assert!(text.contains("arith.index_cast %n : i64 -> index"), "{text}");
        assert!(text.contains("scf.for %iv = "), "{text}");
        assert!(text.contains("arith.index_cast %iv : index -> i64"), "{text}");
        assert!(text.contains("scf.yield"), "{text}");
        assert!(!text.contains("torch."), "{text}");
    }
}
