//! Lowering of the torch dialect to tosa.
//!
//! Tensors become statically shaped `tensor` values and every torch op a
//! short sequence of whole-tensor tosa ops. Scalars only survive as
//! compile-time parameters, so they have to fold; the rare scalar that is
//! returned becomes a rank 0 `tosa.const`.
use crate::convert::apply_rewrites;
use crate::convert::legalize::is_parameter_op;
use crate::convert::legalize::is_scalar_op;
use crate::convert::legalize::is_tensor_op;
use crate::convert::legalize::lowered_type;
use crate::convert::legalize::static_tensor;
use crate::convert::Builder;
use crate::convert::Pass;
use crate::convert::QuantParams;
use crate::convert::QuantTable;
use crate::convert::Rewrite;
use crate::convert::RewriteResult;
use crate::dialect::torch;
use crate::dialect::torch::fold_float;
use crate::dialect::torch::fold_int;
use crate::dialect::torch::is_none_value;
use crate::dialect::torch::replace_op_with_value;
use crate::dialect::torch::Dtype;
use crate::dialect::tosa;
use crate::ir::new_type;
use crate::ir::shaped_type;
use crate::ir::uses;
use crate::ir::ArrayAttr;
use crate::ir::Attribute;
use crate::ir::Attributes;
use crate::ir::DenseAttr;
use crate::ir::FloatAttr;
use crate::ir::IntegerAttr;
use crate::ir::Literal;
use crate::ir::Op;
use crate::ir::ScalarType;
use crate::ir::ShapedType;
use crate::ir::Type;
use crate::ir::Value;
use crate::pipeline::Target;
use crate::shared::Shared;
use crate::shared::SharedExt;
use crate::Error;
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

fn tensor(shape: &[i64], element: ScalarType) -> Shared<dyn Type> {
    new_type(ShapedType::tensor(shape.to_vec(), element))
}

fn tensor_of(value: &Shared<Value>) -> Result<ShapedType> {
    let typ = value.rd().typ()?;
    match shaped_type(&typ) {
        Some(shaped) => Ok(shaped),
        None => Err(anyhow::anyhow!("expected a tensor, but got {}", typ.rd())),
    }
}

fn result_tensor(op: &dyn Op) -> Result<(Vec<i64>, ScalarType, Option<Dtype>)> {
    let result = op.result(0)?;
    let info = match torch::value_tensor_info(&result) {
        Some(info) => info,
        None => return Err(Error::legalization(op, "expected a tensor result")),
    };
    match static_tensor(&info) {
        Some((shape, element)) => Ok((shape, element, info.dtype)),
        None => Err(Error::legalization(op, "requires a static result type")),
    }
}

fn array(name: &str, values: Vec<i64>) -> Attributes {
    let attributes = Attributes::new();
    let attr: Arc<dyn Attribute> = Arc::new(ArrayAttr::new(values));
    attributes.insert(name, attr);
    attributes
}

fn cast(b: &Builder, value: &Shared<Value>, element: ScalarType) -> Result<Shared<Value>> {
    let typ = tensor_of(value)?;
    if typ.element() == element {
        return Ok(value.clone());
    }
    b.value::<tosa::CastOp>(&[value.clone()], tensor(typ.shape(), element))
}

fn reshape(b: &Builder, value: &Shared<Value>, shape: &[i64]) -> Result<Shared<Value>> {
    let typ = tensor_of(value)?;
    if typ.shape() == shape {
        return Ok(value.clone());
    }
    let attributes = array("new_shape", shape.to_vec());
    b.value_with::<tosa::ReshapeOp>(&[value.clone()], attributes, tensor(shape, typ.element()))
}

/// Prepend size 1 dimensions up to `rank`, since tosa only broadcasts
/// between equal ranks.
fn to_rank(b: &Builder, value: &Shared<Value>, rank: usize) -> Result<Shared<Value>> {
    let shape = tensor_of(value)?.shape().to_vec();
    if shape.len() >= rank {
        return Ok(value.clone());
    }
    let mut expanded = vec![1; rank - shape.len()];
    expanded.extend(shape);
    reshape(b, value, &expanded)
}

/// A `tosa.const` with all dimensions 1 that broadcasts against any
/// tensor of `rank`.
fn splat(b: &Builder, value: f64, rank: usize, element: ScalarType) -> Result<Shared<Value>> {
    let attributes = Attributes::new();
    let attr: Arc<dyn Attribute> = Arc::new(DenseAttr::splat(value, element.is_float()));
    attributes.insert("value", attr);
    b.value_with::<tosa::ConstOp>(&[], attributes, tensor(&vec![1; rank], element))
}

fn binary<O: Op + 'static>(b: &Builder, lhs: &Shared<Value>, rhs: &Shared<Value>) -> Result<Shared<Value>> {
    let l = tensor_of(lhs)?;
    let r = tensor_of(rhs)?;
    let shape = tosa::broadcast_shape(l.shape(), r.shape())?;
    b.value::<O>(&[lhs.clone(), rhs.clone()], tensor(&shape, l.element()))
}

fn unary<O: Op + 'static>(b: &Builder, value: &Shared<Value>) -> Result<Shared<Value>> {
    let typ = tensor_of(value)?;
    b.value::<O>(&[value.clone()], new_type(typ))
}

fn clamp(b: &Builder, value: &Shared<Value>, min: f64, max: f64) -> Result<Shared<Value>> {
    let attributes = Attributes::new();
    let bounds: [(&str, Arc<dyn Attribute>); 4] = [
        ("min_fp", Arc::new(FloatAttr::new(min))),
        ("max_fp", Arc::new(FloatAttr::new(max))),
        ("min_int", Arc::new(IntegerAttr::new(min.max(i64::MIN as f64) as i64))),
        ("max_int", Arc::new(IntegerAttr::new(max.min(i64::MAX as f64) as i64))),
    ];
    for (name, attr) in bounds {
        attributes.insert(name, attr);
    }
    let typ = tensor_of(value)?;
    b.value_with::<tosa::ClampOp>(&[value.clone()], attributes, new_type(typ))
}

/// Operands of an elementwise op in the result element type and at the
/// result rank.
fn elementwise_operands(b: &Builder, op: &dyn Op, count: usize) -> Result<(Vec<Shared<Value>>, ScalarType)> {
    let (shape, element, _) = result_tensor(op)?;
    let mut operands = vec![];
    for i in 0..count {
        let operand = cast(b, &op.operand(i)?, element)?;
        operands.push(to_rank(b, &operand, shape.len())?);
    }
    Ok((operands, element))
}

fn lower_binary<O: Op + 'static>(b: &Builder, op: &dyn Op) -> Result<Shared<Value>> {
    let (operands, element) = elementwise_operands(b, op, 2)?;
    let any = op.as_any();
    let mut rhs = operands[1].clone();
    if any.is::<torch::AddTensorOp>() || any.is::<torch::SubTensorOp>() {
        let alpha = match fold_float(&op.operand(2)?) {
            Some(alpha) => alpha,
            None => return Err(Error::legalization(op, "requires a constant alpha")),
        };
        if alpha != 1.0 {
            let rank = tensor_of(&rhs)?.rank();
            let alpha = splat(b, alpha, rank, element)?;
            rhs = binary::<tosa::MulOp>(b, &rhs, &alpha)?;
        }
    }
    binary::<O>(b, &operands[0], &rhs)
}

fn lower_div(b: &Builder, op: &dyn Op) -> Result<Shared<Value>> {
    let (operands, element) = elementwise_operands(b, op, 2)?;
    if !element.is_float() {
        return Err(Error::legalization(op, "requires a float result"));
    }
    let reciprocal = unary::<tosa::ReciprocalOp>(b, &operands[1])?;
    binary::<tosa::MulOp>(b, &operands[0], &reciprocal)
}

fn bound(op: &dyn Op, index: usize, default: f64) -> Result<f64> {
    let value = op.operand(index)?;
    if is_none_value(&value) {
        return Ok(default);
    }
    match fold_float(&value) {
        Some(bound) => Ok(bound),
        None => Err(Error::legalization(op, "requires constant bounds")),
    }
}

/// The widest clamp bounds that keep every value of `element`.
fn element_range(element: ScalarType) -> (f64, f64) {
    match element.int_range() {
        Some((min, max)) if !element.is_float() => (min as f64, max as f64),
        _ if element == ScalarType::F64 => (f64::MIN, f64::MAX),
        _ => (f32::MIN as f64, f32::MAX as f64),
    }
}

fn lower_clamp(b: &Builder, op: &dyn Op) -> Result<Shared<Value>> {
    let (operands, element) = elementwise_operands(b, op, 1)?;
    let (lowest, highest) = element_range(element);
    let min = bound(op, 1, lowest)?;
    let max = bound(op, 2, highest)?;
    clamp(b, &operands[0], min, max)
}

fn lower_unary(b: &Builder, op: &dyn Op) -> Result<Shared<Value>> {
    let (operands, element) = elementwise_operands(b, op, 1)?;
    let x = &operands[0];
    let any = op.as_any();
    if any.is::<torch::ReluOp>() {
        let (_, highest) = element_range(element);
        clamp(b, x, 0.0, highest)
    } else if any.is::<torch::NegOp>() {
        unary::<tosa::NegateOp>(b, x)
    } else if any.is::<torch::AbsOp>() {
        unary::<tosa::AbsOp>(b, x)
    } else if any.is::<torch::ExpOp>() {
        unary::<tosa::ExpOp>(b, x)
    } else if any.is::<torch::TanhOp>() {
        unary::<tosa::TanhOp>(b, x)
    } else if any.is::<torch::SigmoidOp>() {
        unary::<tosa::SigmoidOp>(b, x)
    } else {
        Err(Error::not_legalized(op, &Target::Tosa.to_string()))
    }
}

/// `[m, k] x [k, n]` as a batched matmul with a batch of one.
fn lower_mm(b: &Builder, op: &dyn Op) -> Result<Shared<Value>> {
    let (shape, element, _) = result_tensor(op)?;
    let lhs = cast(b, &op.operand(0)?, element)?;
    let rhs = cast(b, &op.operand(1)?, element)?;
    let l = tensor_of(&lhs)?.shape().to_vec();
    let r = tensor_of(&rhs)?.shape().to_vec();
    let lhs = reshape(b, &lhs, &[1, l[0], l[1]])?;
    let rhs = reshape(b, &rhs, &[1, r[0], r[1]])?;
    let batched = [1, shape[0], shape[1]];
    let product = b.value::<tosa::MatmulOp>(&[lhs, rhs], tensor(&batched, element))?;
    reshape(b, &product, &shape)
}

fn lower_sum(b: &Builder, op: &dyn Op) -> Result<Shared<Value>> {
    let (shape, element, _) = result_tensor(op)?;
    let mut x = cast(b, &op.operand(0)?, element)?;
    let rank = tensor_of(&x)?.rank();
    let dims = match torch::reduced_dims(op, rank)? {
        Some(dims) => dims,
        None => return Err(Error::legalization(op, "requires constant dimensions")),
    };
    for dim in dims {
        let current = tensor_of(&x)?.shape().to_vec();
        let reduced = tosa::reduce_shape(&current, dim as i64)?;
        let attributes = Attributes::new();
        let axis: Arc<dyn Attribute> = Arc::new(IntegerAttr::new(dim as i64));
        attributes.insert("axis", axis);
        x = b.value_with::<tosa::ReduceSumOp>(&[x], attributes, tensor(&reduced, element))?;
    }
    reshape(b, &x, &shape)
}

fn lower_transpose(b: &Builder, op: &dyn Op) -> Result<Shared<Value>> {
    let (shape, element, _) = result_tensor(op)?;
    let x = cast(b, &op.operand(0)?, element)?;
    let rank = tensor_of(&x)?.rank();
    let (d0, d1) = match torch::transposed_dims(op, rank)? {
        Some(dims) => dims,
        None => return Err(Error::legalization(op, "requires constant dimensions")),
    };
    if d0 == d1 {
        return Ok(x);
    }
    let mut perms = (0..rank as i64).collect::<Vec<i64>>();
    perms.swap(d0, d1);
    b.value_with::<tosa::TransposeOp>(&[x], array("perms", perms), tensor(&shape, element))
}

fn slice(b: &Builder, value: &Shared<Value>, start: Vec<i64>, size: Vec<i64>) -> Result<Shared<Value>> {
    let element = tensor_of(value)?.element();
    let result = tensor(&size, element);
    let attributes = array("start", start);
    let attr: Arc<dyn Attribute> = Arc::new(ArrayAttr::new(size));
    attributes.insert("size", attr);
    b.value_with::<tosa::SliceOp>(&[value.clone()], attributes, result)
}

/// Strided slices pad the dimension to `length * step`, split it into
/// `[length, step]` and keep the first element of every step.
fn lower_slice(b: &Builder, op: &dyn Op) -> Result<Shared<Value>> {
    let (shape, element, _) = result_tensor(op)?;
    let x = cast(b, &op.operand(0)?, element)?;
    let input = tensor_of(&x)?.shape().to_vec();
    let (dim, start, length, step) = match torch::slice_params(op, &input)? {
        Some(params) => params,
        None => return Err(Error::legalization(op, "requires constant slice bounds")),
    };
    let mut starts = vec![0; input.len()];
    starts[dim] = start;
    if step == 1 || length == 0 {
        return slice(b, &x, starts, shape);
    }
    let covered = (length * step).min(input[dim] - start);
    let mut sizes = input.clone();
    sizes[dim] = covered;
    let mut x = slice(b, &x, starts, sizes.clone())?;
    let missing = length * step - covered;
    if missing > 0 {
        let mut padding = vec![0; 2 * input.len()];
        padding[2 * dim + 1] = missing;
        sizes[dim] = length * step;
        let attributes = array("padding", padding);
        let pad: Arc<dyn Attribute> = Arc::new(FloatAttr::new(0.0));
        attributes.insert("pad_const", pad);
        x = b.value_with::<tosa::PadOp>(&[x], attributes, tensor(&sizes, element))?;
    }
    let mut split = sizes[..dim].to_vec();
    split.extend([length, step]);
    split.extend(&sizes[dim + 1..]);
    let x = reshape(b, &x, &split)?;
    let mut size = split.clone();
    size[dim + 1] = 1;
    let x = slice(b, &x, vec![0; split.len()], size)?;
    reshape(b, &x, &shape)
}

fn lower_broadcast_to(b: &Builder, op: &dyn Op) -> Result<Shared<Value>> {
    let (shape, element, _) = result_tensor(op)?;
    let x = cast(b, &op.operand(0)?, element)?;
    let x = to_rank(b, &x, shape.len())?;
    let input = tensor_of(&x)?.shape().to_vec();
    let multiples = input
        .iter()
        .zip(&shape)
        .map(|(from, to)| if *from == 1 { *to } else { 1 })
        .collect::<Vec<i64>>();
    if multiples.iter().all(|m| *m == 1) {
        return Ok(x);
    }
    b.value_with::<tosa::TileOp>(&[x], array("multiples", multiples), tensor(&shape, element))
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

/// `q = cast(clamp(x * (1 / scale) + zero_point, min, max))`; the cast
/// rounds to nearest even.
fn lower_quantize(b: &Builder, op: &dyn Op, table: &Shared<QuantTable>) -> Result<Shared<Value>> {
    let (_, element, dtype) = result_tensor(op)?;
    let params = quant_params(op, dtype)?;
    let x = op.operand(0)?;
    let typ = tensor_of(&x)?;
    let inverse = splat(b, 1.0 / params.scale, typ.rank(), typ.element())?;
    let scaled = binary::<tosa::MulOp>(b, &x, &inverse)?;
    let zero_point = splat(b, params.zero_point as f64, typ.rank(), typ.element())?;
    let shifted = binary::<tosa::AddOp>(b, &scaled, &zero_point)?;
    let (min, max) = params.range();
    let clamped = clamp(b, &shifted, min as f64, max as f64)?;
    let output = cast(b, &clamped, element)?;
    table.wr().insert(&output, params);
    Ok(output)
}

/// `x = (q - zero_point) * scale`.
fn lower_dequantize(b: &Builder, op: &dyn Op, table: &Shared<QuantTable>) -> Result<Shared<Value>> {
    let (_, element, _) = result_tensor(op)?;
    let q = op.operand(0)?;
    let params = match table.rd().get(&q) {
        Some(params) => params,
        None => return Err(Error::legalization(op, "unknown quantization parameters")),
    };
    let x = cast(b, &q, element)?;
    let rank = tensor_of(&x)?.rank();
    let zero_point = splat(b, params.zero_point as f64, rank, element)?;
    let shifted = binary::<tosa::SubOp>(b, &x, &zero_point)?;
    let scale = splat(b, params.scale, rank, element)?;
    binary::<tosa::MulOp>(b, &shifted, &scale)
}

fn lower_tensor_op(b: &Builder, op: &dyn Op, table: &Shared<QuantTable>) -> Result<Shared<Value>> {
    let any = op.as_any();
    if any.is::<torch::AddTensorOp>() {
        lower_binary::<tosa::AddOp>(b, op)
    } else if any.is::<torch::SubTensorOp>() {
        lower_binary::<tosa::SubOp>(b, op)
    } else if any.is::<torch::MulTensorOp>() {
        lower_binary::<tosa::MulOp>(b, op)
    } else if any.is::<torch::MaximumOp>() {
        lower_binary::<tosa::MaximumOp>(b, op)
    } else if any.is::<torch::MinimumOp>() {
        lower_binary::<tosa::MinimumOp>(b, op)
    } else if any.is::<torch::DivTensorOp>() {
        lower_div(b, op)
    } else if any.is::<torch::ClampOp>() {
        lower_clamp(b, op)
    } else if any.is::<torch::MmOp>() {
        lower_mm(b, op)
    } else if any.is::<torch::SumDimIntListOp>() {
        lower_sum(b, op)
    } else if any.is::<torch::TransposeIntOp>() {
        lower_transpose(b, op)
    } else if any.is::<torch::ViewOp>() || any.is::<torch::ReshapeOp>() {
        let (shape, _, _) = result_tensor(op)?;
        reshape(b, &op.operand(0)?, &shape)
    } else if any.is::<torch::SliceTensorOp>() {
        lower_slice(b, op)
    } else if any.is::<torch::BroadcastToOp>() {
        lower_broadcast_to(b, op)
    } else if any.is::<torch::QuantizePerTensorOp>() {
        lower_quantize(b, op, table)
    } else if any.is::<torch::DequantizeSelfOp>() {
        lower_dequantize(b, op, table)
    } else if any.is::<torch::PerTensorAffineCreateOp>() {
        let (_, _, dtype) = result_tensor(op)?;
        let params = quant_params(op, dtype)?;
        let q = op.operand(0)?;
        table.wr().insert(&q, params);
        Ok(q)
    } else if any.is::<torch::IntReprOp>() || any.is::<torch::TensorStaticInfoCastOp>() {
        result_tensor(op)?;
        op.operand(0)
    } else {
        lower_unary(b, op)
    }
}

/// A scalar that is used outside of torch ops becomes a rank 0 constant.
fn lower_scalar_op(b: &Builder, op: &dyn Op) -> Result<Shared<Value>> {
    let result = op.result(0)?;
    let typ = match lowered_type(&result.rd().typ()?, Target::Tosa)? {
        Some(typ) => typ,
        None => return Err(Error::not_legalized(op, &Target::Tosa.to_string())),
    };
    let is_float = shaped_type(&typ).is_some_and(|shaped| shaped.element().is_float());
    let value = match op.fold() {
        Some(Literal::Int(value)) => value as f64,
        Some(Literal::Float(value)) => value,
        Some(Literal::Bool(value)) => value as i64 as f64,
        _ => return Err(Error::not_legalized(op, &Target::Tosa.to_string())),
    };
    let attributes = Attributes::new();
    let attr: Arc<dyn Attribute> = Arc::new(DenseAttr::splat(value, is_float));
    attributes.insert("value", attr);
    b.value_with::<tosa::ConstOp>(&[], attributes, typ)
}

fn has_torch_users(op: &dyn Op) -> bool {
    op.operation()
        .rd()
        .results()
        .into_iter()
        .flat_map(|result| uses(&result))
        .any(|u| crate::convert::is_torch_op(&*u.op.rd()))
}

/// Lower one torch op, in program order.
struct LowerToTosa {
    table: Shared<QuantTable>,
}

impl Rewrite for LowerToTosa {
    fn name(&self) -> &'static str {
        "torch_to_tosa::LowerToTosa"
    }
    fn is_match(&self, op: &dyn Op) -> Result<bool> {
        if !crate::convert::is_torch_op(op) {
            return Ok(false);
        }
        if is_parameter_op(op) || is_scalar_op(op) {
            return Ok(!has_torch_users(op));
        }
        Ok(true)
    }
    fn rewrite(&self, op: Shared<dyn Op>) -> Result<RewriteResult> {
        let b = Builder::before(&op);
        let guard = op.rd();
        let used = !guard.users().is_empty();
        let value = if is_parameter_op(&*guard) || (is_scalar_op(&*guard) && !used) {
            let changed = RewriteResult::changed_around(&*guard)?;
            guard.remove()?;
            return Ok(changed);
        } else if is_scalar_op(&*guard) {
            lower_scalar_op(&b, &*guard)?
        } else if is_tensor_op(&*guard) {
            lower_tensor_op(&b, &*guard, &self.table)?
        } else {
            return Err(Error::not_legalized(&*guard, &Target::Tosa.to_string()));
        };
        replace_op_with_value(&*guard, &value)
    }
}

/// Lower to tosa and record quantization parameters in `table`.
pub fn convert_to_tosa(op: Shared<dyn Op>, table: &Shared<QuantTable>) -> Result<RewriteResult> {
    info!("Running {}", ConvertTorchToTosa::NAME);
    let lower = LowerToTosa {
        table: table.clone(),
    };
    let rewrites: Vec<&dyn Rewrite> = vec![&lower];
    apply_rewrites(op, &rewrites)
}

pub struct ConvertTorchToTosa;

impl Pass for ConvertTorchToTosa {
    const NAME: &'static str = "convert-torch-to-tosa";
    fn convert(op: Shared<dyn Op>) -> Result<RewriteResult> {
        crate::convert::convert_signatures(&op, Target::Tosa)?;
        let table = Shared::new(QuantTable::new().into());
        convert_to_tosa(op, &table)
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
        ConvertTorchToTosa::convert(module.clone()).unwrap();
        crate::verify::verify(&module).unwrap();
        let text = module.rd().to_string();
        text
    }

    #[test]
    fn test_add_with_alpha() {
        let src = indoc! {"
        func.func @f(%a : !torch.vtensor<[3,1],f32>, %b : !torch.vtensor<[4],f32>) -> !torch.vtensor<[3,4],f32> {
          %int2 = torch.constant.int 2
          %0 = torch.aten.add.Tensor %a, %b, %int2 : !torch.vtensor<[3,1],f32>, !torch.vtensor<[4],f32>, !torch.int -> !torch.vtensor<[3,4],f32>
          return %0 : !torch.vtensor<[3,4],f32>
        }"};
        let text = lower(src);
        assert!(text.contains("func.func @f(%a : tensor<3x1xf32>, %b : tensor<4xf32>) -> tensor<3x4xf32>"), "{text}");
        assert!(text.contains("tosa.reshape %b {new_shape = [1, 4]}"), "{text}");
        assert!(text.contains("tosa.const dense<2.0> : tensor<1x1xf32>"), "{text}");
        assert!(text.contains("tosa.mul"), "{text}");
        assert!(text.contains("tosa.add"), "{text}");
        assert!(!text.contains("torch."), "{text}");
    }

    #[test]
    fn test_relu_is_clamp() {
        let src = indoc! {"
        func.func @f(%x : !torch.vtensor<[4],f32>) -> !torch.vtensor<[4],f32> {
          %0 = torch.aten.relu %x : !torch.vtensor<[4],f32> -> !torch.vtensor<[4],f32>
          return %0 : !torch.vtensor<[4],f32>
        }"};
        let text = lower(src);
        assert!(text.contains("tosa.clamp %x"), "{text}");
        assert!(text.contains("min_fp = 0.0"), "{text}");
    }

    #[test]
    fn test_f64_clamp_keeps_range() {
        let src = indoc! {"
        func.func @f(%x : !torch.vtensor<[2],f64>) -> (!torch.vtensor<[2],f64>, !torch.vtensor<[2],f64>) {
          %none = torch.constant.none
          %0 = torch.aten.relu %x : !torch.vtensor<[2],f64> -> !torch.vtensor<[2],f64>
          %1 = torch.aten.clamp %x, %none, %none : !torch.vtensor<[2],f64>, !torch.none, !torch.none -> !torch.vtensor<[2],f64>
          return %0, %1 : !torch.vtensor<[2],f64>, !torch.vtensor<[2],f64>
        }"};
        let module = Parser::<DefaultParserDispatch>::parse(src).unwrap();
        let options = crate::pipeline::LoweringOptions::new(Target::Tosa);
        crate::pipeline::lower(&module, &options).unwrap();
        let text = module.rd().to_string();
        assert!(text.contains("max_fp = 1.7976931348623157e308"), "{text}");
        assert!(text.contains("min_fp = -1.7976931348623157e308"), "{text}");

        let big = 1.0e300;
        let x = crate::interp::Data::tensor(vec![2], ScalarType::F64, &[big, -big]).unwrap();
        let result = crate::interp::Interpreter::new(&module).call("f", vec![x]).unwrap();
        assert_eq!(result[0].values().unwrap(), vec![big, 0.0]);
        assert_eq!(result[1].values().unwrap(), vec![big, -big]);
    }
}
