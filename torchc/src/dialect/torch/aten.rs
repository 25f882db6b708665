//! Tensor ops with value semantics.
//!
//! All ops in this file are pure and allow type refinement. Their result
//! types are inferred from the operand types, see
//! [Op::infer_result_types], and a declared result type has to be
//! compatible with the inferred one.
use crate::dialect::torch::broadcast_info;
use crate::dialect::torch::fold_bool;
use crate::dialect::torch::fold_int;
use crate::dialect::torch::is_none_value;
use crate::dialect::torch::normalize_dim;
use crate::dialect::torch::reshape_sizes;
use crate::dialect::torch::slice_bounds;
use crate::dialect::torch::value_torch_type;
use crate::dialect::torch::Dtype;
use crate::dialect::torch::ListConstructOp;
use crate::dialect::torch::TensorInfo;
use crate::dialect::torch::TorchType;
use crate::ir::simple_op;
use crate::ir::Op;
use crate::ir::Type;
use crate::shared::Shared;
use crate::shared::SharedExt;
use crate::verify::SymbolTable;
use anyhow::Result;

pub(crate) fn expect_operands(op: &dyn Op, count: usize) -> Result<()> {
    let actual = op.operation().rd().operands().len();
    if actual != count {
        return Err(anyhow::anyhow!("expected {count} operands, but got {actual}"));
    }
    Ok(())
}

/// Info of operand `index`, which has to be a value tensor.
pub(crate) fn tensor_operand(op: &dyn Op, index: usize) -> Result<TensorInfo> {
    let value = op.operand(index)?;
    match value_torch_type(&value) {
        Some(TorchType::ValueTensor(info)) => Ok(info),
        Some(other) => Err(anyhow::anyhow!(
            "operand #{index} must be a value tensor, but got {other}"
        )),
        None => Err(anyhow::anyhow!("operand #{index} must be a value tensor")),
    }
}

/// Check that operand `index` is a subtype of one of `allowed`.
pub(crate) fn scalar_operand(op: &dyn Op, index: usize, allowed: &[TorchType]) -> Result<()> {
    let value = op.operand(index)?;
    let actual = value_torch_type(&value).unwrap_or(TorchType::Any);
    if allowed.iter().any(|typ| actual.is_subtype(typ)) {
        return Ok(());
    }
    let allowed = allowed
        .iter()
        .map(|typ| typ.to_string())
        .collect::<Vec<String>>()
        .join(" or ");
    Err(anyhow::anyhow!("operand #{index} must be {allowed}, but got {actual}"))
}

fn number() -> Vec<TorchType> {
    vec![TorchType::Int, TorchType::Float]
}

fn optional_number() -> Vec<TorchType> {
    vec![
        TorchType::Optional(Box::new(TorchType::Int)),
        TorchType::Optional(Box::new(TorchType::Float)),
    ]
}

fn int_list() -> TorchType {
    TorchType::List(Box::new(TorchType::Int))
}

/// Elements of an integer list where the ones that fold are known.
///
/// Returns `None` if the list is not built by `torch.prim.ListConstruct`.
fn partial_int_list(op: &dyn Op, index: usize) -> Result<Option<Vec<Option<i64>>>> {
    let value = op.operand(index)?;
    let producer = match value.rd().defining_op() {
        Some(producer) => producer,
        None => return Ok(None),
    };
    let producer = producer.rd();
    if !producer.as_any().is::<ListConstructOp>() {
        return Ok(None);
    }
    let operands = producer.operation().rd().operands();
    Ok(Some(operands.values().iter().map(fold_int).collect()))
}

/// Compare the declared result type with the inferred one.
pub(crate) fn verify_inferred(op: &dyn Op, inferred: TensorInfo) -> Result<()> {
    let results = op.operation().rd().results().len();
    if results != 1 {
        return Err(anyhow::anyhow!("expected 1 result, but got {results}"));
    }
    let declared = op.result(0)?;
    let declared = value_torch_type(&declared).unwrap_or(TorchType::Any);
    let info = match &declared {
        TorchType::ValueTensor(info) => info,
        other => {
            return Err(anyhow::anyhow!("result must be a value tensor, but got {other}"));
        }
    };
    if info.meet(&inferred).is_none() {
        let inferred = TorchType::ValueTensor(inferred);
        return Err(anyhow::anyhow!(
            "result type {declared} is incompatible with the inferred type {inferred}"
        ));
    }
    Ok(())
}

pub(crate) fn inferred_type(info: TensorInfo) -> Result<Option<Vec<Shared<dyn Type>>>> {
    Ok(Some(vec![TorchType::ValueTensor(info).shared()]))
}

/// Define a tensor op from the function that infers its result info.
macro_rules! tensor_op {
    ($(#[$meta:meta])* $ty:ident, $mnemonic:literal, $infer:ident) => {
        simple_op!(
            $(#[$meta])*
            $ty,
            $mnemonic,
            {
                fn is_pure(&self) -> bool {
                    true
                }
                fn allows_type_refinement(&self) -> bool {
                    true
                }
                fn infer_result_types(&self) -> Result<Option<Vec<Shared<dyn Type>>>> {
                    inferred_type($infer(self)?)
                }
                fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
                    let inferred = $infer(self)?;
                    verify_inferred(self, inferred)
                }
            }
        );
    };
}

pub(crate) use tensor_op;

fn infer_binary(op: &dyn Op) -> Result<TensorInfo> {
    let lhs = tensor_operand(op, 0)?;
    let rhs = tensor_operand(op, 1)?;
    broadcast_info(&lhs, &rhs)
}

fn infer_binary_plain(op: &dyn Op) -> Result<TensorInfo> {
    expect_operands(op, 2)?;
    infer_binary(op)
}

fn infer_binary_alpha(op: &dyn Op) -> Result<TensorInfo> {
    expect_operands(op, 3)?;
    scalar_operand(op, 2, &number())?;
    infer_binary(op)
}

fn infer_div(op: &dyn Op) -> Result<TensorInfo> {
    expect_operands(op, 2)?;
    let lhs = tensor_operand(op, 0)?;
    let rhs = tensor_operand(op, 1)?;
    let mut info = broadcast_info(&lhs, &rhs)?;
    info.dtype = match (lhs.dtype, rhs.dtype) {
        (Some(a), Some(b)) => a.true_divide(&b),
        _ => None,
    };
    Ok(info)
}

fn infer_unary(op: &dyn Op) -> Result<TensorInfo> {
    expect_operands(op, 1)?;
    let info = tensor_operand(op, 0)?;
    if info.dtype.map(|dtype| dtype.is_quantized()).unwrap_or(false) {
        return Err(anyhow::anyhow!("expected a non-quantized tensor"));
    }
    Ok(info)
}

/// Unary ops that compute in floating point.
fn infer_unary_float(op: &dyn Op) -> Result<TensorInfo> {
    let mut info = infer_unary(op)?;
    info.dtype = info.dtype.map(|dtype| {
        if dtype.is_float() {
            dtype
        } else {
            Dtype::F32
        }
    });
    Ok(info)
}

fn infer_clamp(op: &dyn Op) -> Result<TensorInfo> {
    expect_operands(op, 3)?;
    scalar_operand(op, 1, &optional_number())?;
    scalar_operand(op, 2, &optional_number())?;
    let info = tensor_operand(op, 0)?;
    Ok(info)
}

fn infer_mm(op: &dyn Op) -> Result<TensorInfo> {
    expect_operands(op, 2)?;
    let lhs = tensor_operand(op, 0)?;
    let rhs = tensor_operand(op, 1)?;
    for (name, info) in [("lhs", &lhs), ("rhs", &rhs)] {
        if let Some(rank) = info.rank() {
            if rank != 2 {
                return Err(anyhow::anyhow!("{name} must have rank 2, but has rank {rank}"));
            }
        }
    }
    let dim = |info: &TensorInfo, i: usize| info.sizes.as_ref().and_then(|sizes| sizes[i]);
    if let (Some(k), Some(l)) = (dim(&lhs, 1), dim(&rhs, 0)) {
        if k != l {
            return Err(anyhow::anyhow!(
                "contracting dimensions differ: {k} and {l}"
            ));
        }
    }
    let sizes = Some(vec![dim(&lhs, 0), dim(&rhs, 1)]);
    let dtype = match (lhs.dtype, rhs.dtype) {
        (Some(a), Some(b)) => match a.promote(&b) {
            Some(dtype) => Some(dtype),
            None => return Err(anyhow::anyhow!("cannot promote {a} and {b}")),
        },
        _ => None,
    };
    Ok(TensorInfo::new(sizes, dtype))
}

/// Dimensions reduced by `sum.dim_IntList`; `none` reduces all of them.
pub(crate) fn reduced_dims(op: &dyn Op, rank: usize) -> Result<Option<Vec<usize>>> {
    if is_none_value(&op.operand(1)?) {
        return Ok(Some((0..rank).collect()));
    }
    let dims = match partial_int_list(op, 1)? {
        Some(dims) => dims,
        None => return Ok(None),
    };
    let mut result = vec![];
    for dim in dims {
        let dim = match dim {
            Some(dim) => dim,
            None => return Ok(None),
        };
        match normalize_dim(dim, rank) {
            Some(dim) if !result.contains(&dim) => result.push(dim),
            Some(dim) => return Err(anyhow::anyhow!("dimension {dim} is reduced twice")),
            None => return Err(anyhow::anyhow!("dimension {dim} is out of range")),
        }
    }
    if result.is_empty() {
        result = (0..rank).collect();
    }
    result.sort();
    Ok(Some(result))
}

fn infer_sum(op: &dyn Op) -> Result<TensorInfo> {
    expect_operands(op, 4)?;
    let info = tensor_operand(op, 0)?;
    let none = TorchType::None;
    scalar_operand(op, 1, &[int_list(), none.clone()])?;
    scalar_operand(op, 2, &[TorchType::Bool])?;
    scalar_operand(op, 3, &[TorchType::Int, none])?;
    let dtype = match fold_int(&op.operand(3)?) {
        Some(code) => match Dtype::from_code(code) {
            Some(dtype) => Some(dtype),
            None => return Err(anyhow::anyhow!("unknown dtype code {code}")),
        },
        None => info.dtype.map(|dtype| {
            if dtype.is_float() {
                dtype
            } else {
                Dtype::Si64
            }
        }),
    };
    let keepdim = fold_bool(&op.operand(2)?);
    let sizes = match (&info.sizes, keepdim) {
        (Some(sizes), Some(keepdim)) => match reduced_dims(op, sizes.len())? {
            Some(dims) => {
                let mut result = vec![];
                for (i, size) in sizes.iter().enumerate() {
                    if !dims.contains(&i) {
                        result.push(*size);
                    } else if keepdim {
                        result.push(Some(1));
                    }
                }
                Some(result)
            }
            None => None,
        },
        _ => None,
    };
    Ok(TensorInfo::new(sizes, dtype))
}

/// The two dimensions of `transpose.int`, when known.
pub(crate) fn transposed_dims(op: &dyn Op, rank: usize) -> Result<Option<(usize, usize)>> {
    let d0 = fold_int(&op.operand(1)?);
    let d1 = fold_int(&op.operand(2)?);
    match (d0, d1) {
        (Some(d0), Some(d1)) => match (normalize_dim(d0, rank), normalize_dim(d1, rank)) {
            (Some(a), Some(b)) => Ok(Some((a, b))),
            _ => Err(anyhow::anyhow!("dimensions {d0} and {d1} are out of range")),
        },
        _ => Ok(None),
    }
}

fn infer_transpose(op: &dyn Op) -> Result<TensorInfo> {
    expect_operands(op, 3)?;
    scalar_operand(op, 1, &[TorchType::Int])?;
    scalar_operand(op, 2, &[TorchType::Int])?;
    let info = tensor_operand(op, 0)?;
    let sizes = match &info.sizes {
        Some(sizes) => match transposed_dims(op, sizes.len())? {
            Some((a, b)) => {
                let mut sizes = sizes.clone();
                sizes.swap(a, b);
                Some(sizes)
            }
            None => Some(vec![None; sizes.len()]),
        },
        None => None,
    };
    Ok(TensorInfo::new(sizes, info.dtype))
}

fn infer_view(op: &dyn Op) -> Result<TensorInfo> {
    expect_operands(op, 2)?;
    scalar_operand(op, 1, &[int_list()])?;
    let info = tensor_operand(op, 0)?;
    let sizes = match partial_int_list(op, 1)? {
        Some(list) => match list.iter().copied().collect::<Option<Vec<i64>>>() {
            Some(sizes) => Some(reshape_sizes(&info, &sizes)?),
            None => Some(list.iter().map(|d| d.filter(|d| *d >= 0)).collect()),
        },
        None => None,
    };
    Ok(TensorInfo::new(sizes, info.dtype))
}

/// `(dim, start, length, step)` of a `slice.Tensor` with static operands.
pub(crate) fn slice_params(op: &dyn Op, shape: &[i64]) -> Result<Option<(usize, i64, i64, i64)>> {
    let dim = match fold_int(&op.operand(1)?) {
        Some(dim) => dim,
        None => return Ok(None),
    };
    let dim = match normalize_dim(dim, shape.len()) {
        Some(dim) => dim,
        None => return Err(anyhow::anyhow!("dimension {dim} is out of range")),
    };
    let bound = |index: usize| -> Result<Option<Option<i64>>> {
        let value = op.operand(index)?;
        if is_none_value(&value) {
            return Ok(Some(None));
        }
        Ok(fold_int(&value).map(Some))
    };
    let (start, end) = match (bound(2)?, bound(3)?) {
        (Some(start), Some(end)) => (start, end),
        _ => return Ok(None),
    };
    let step = match fold_int(&op.operand(4)?) {
        Some(step) if step > 0 => step,
        Some(step) => return Err(anyhow::anyhow!("step must be positive, but got {step}")),
        None => return Ok(None),
    };
    let (start, length) = slice_bounds(shape[dim], start, end, step);
    Ok(Some((dim, start, length, step)))
}

fn infer_slice(op: &dyn Op) -> Result<TensorInfo> {
    expect_operands(op, 5)?;
    let optional_int = TorchType::Optional(Box::new(TorchType::Int));
    scalar_operand(op, 1, &[TorchType::Int])?;
    scalar_operand(op, 2, &[optional_int.clone()])?;
    scalar_operand(op, 3, &[optional_int])?;
    scalar_operand(op, 4, &[TorchType::Int])?;
    let info = tensor_operand(op, 0)?;
    if let Some(step) = fold_int(&op.operand(4)?) {
        if step <= 0 {
            return Err(anyhow::anyhow!("step must be positive, but got {step}"));
        }
    }
    let sizes = match &info.sizes {
        Some(sizes) => {
            let mut result = sizes.clone();
            let dim = fold_int(&op.operand(1)?).and_then(|dim| normalize_dim(dim, sizes.len()));
            match dim {
                Some(dim) => {
                    let shape = sizes.iter().map(|d| d.unwrap_or(-1)).collect::<Vec<i64>>();
                    result[dim] = match (sizes[dim], slice_params(op, &shape)?) {
                        (Some(_), Some((_, _, length, _))) => Some(length),
                        _ => None,
                    };
                }
                None => result = vec![None; sizes.len()],
            }
            Some(result)
        }
        None => None,
    };
    Ok(TensorInfo::new(sizes, info.dtype))
}

fn infer_broadcast_to(op: &dyn Op) -> Result<TensorInfo> {
    expect_operands(op, 2)?;
    scalar_operand(op, 1, &[int_list()])?;
    let info = tensor_operand(op, 0)?;
    let target = match partial_int_list(op, 1)? {
        Some(target) => target,
        None => return Ok(TensorInfo::new(None, info.dtype)),
    };
    let sizes = match &info.sizes {
        Some(sizes) => {
            if sizes.len() > target.len() {
                return Err(anyhow::anyhow!(
                    "cannot broadcast rank {} to rank {}",
                    sizes.len(),
                    target.len()
                ));
            }
            let offset = target.len() - sizes.len();
            let mut result = vec![];
            for (i, size) in target.iter().enumerate() {
                let input = if i < offset { None } else { sizes[i - offset] };
                let size = match *size {
                    Some(-1) if i < offset => {
                        return Err(anyhow::anyhow!("-1 is not allowed for new dimension {i}"));
                    }
                    Some(-1) => input,
                    Some(size) => {
                        if let Some(input) = input {
                            if input != 1 && input != size {
                                return Err(anyhow::anyhow!(
                                    "cannot broadcast dimension {i} of size {input} to {size}"
                                ));
                            }
                        }
                        Some(size)
                    }
                    None => None,
                };
                result.push(size);
            }
            Some(result)
        }
        None => Some(target.iter().map(|d| d.filter(|d| *d >= 0)).collect()),
    };
    Ok(TensorInfo::new(sizes, info.dtype))
}

tensor_op!(
    /// `torch.aten.add.Tensor`
    ///
    /// `self + alpha * other` with broadcasting.
    AddTensorOp,
    "torch.aten.add.Tensor",
    infer_binary_alpha
);

tensor_op!(
    /// `torch.aten.sub.Tensor`
    ///
    /// `self - alpha * other` with broadcasting.
    SubTensorOp,
    "torch.aten.sub.Tensor",
    infer_binary_alpha
);

tensor_op!(
    /// `torch.aten.mul.Tensor`
    MulTensorOp,
    "torch.aten.mul.Tensor",
    infer_binary_plain
);

tensor_op!(
    /// `torch.aten.div.Tensor`
    ///
    /// True division; integer inputs give an `f32` result.
    DivTensorOp,
    "torch.aten.div.Tensor",
    infer_div
);

tensor_op!(
    /// `torch.aten.maximum`
    MaximumOp,
    "torch.aten.maximum",
    infer_binary_plain
);

tensor_op!(
    /// `torch.aten.minimum`
    MinimumOp,
    "torch.aten.minimum",
    infer_binary_plain
);

tensor_op!(
    /// `torch.aten.relu`
    ReluOp,
    "torch.aten.relu",
    infer_unary
);

tensor_op!(
    /// `torch.aten.neg`
    NegOp,
    "torch.aten.neg",
    infer_unary
);

tensor_op!(
    /// `torch.aten.abs`
    AbsOp,
    "torch.aten.abs",
    infer_unary
);

tensor_op!(
    /// `torch.aten.exp`
    ExpOp,
    "torch.aten.exp",
    infer_unary_float
);

tensor_op!(
    /// `torch.aten.tanh`
    TanhOp,
    "torch.aten.tanh",
    infer_unary_float
);

tensor_op!(
    /// `torch.aten.sigmoid`
    SigmoidOp,
    "torch.aten.sigmoid",
    infer_unary_float
);

tensor_op!(
    /// `torch.aten.clamp`
    ///
    /// ```mlir
    /// %none = torch.constant.none
    /// %float6 = torch.constant.float 6.0
    /// %1 = torch.aten.clamp %0, %none, %float6 : !torch.vtensor<[3],f32>, !torch.none, !torch.float -> !torch.vtensor<[3],f32>
    /// ```
    ClampOp,
    "torch.aten.clamp",
    infer_clamp
);

tensor_op!(
    /// `torch.aten.mm`
    ///
    /// Matrix product of two rank 2 tensors.
    MmOp,
    "torch.aten.mm",
    infer_mm
);

tensor_op!(
    /// `torch.aten.sum.dim_IntList`
    ///
    /// Operands are `self`, the reduced dimensions (`none` for all),
    /// `keepdim` and an optional dtype code. Integer and boolean inputs sum
    /// to `si64` unless a dtype is given.
    SumDimIntListOp,
    "torch.aten.sum.dim_IntList",
    infer_sum
);

tensor_op!(
    /// `torch.aten.transpose.int`
    TransposeIntOp,
    "torch.aten.transpose.int",
    infer_transpose
);

tensor_op!(
    /// `torch.aten.view`
    ///
    /// At most one size may be `-1`, which is inferred from the number of
    /// elements.
    ViewOp,
    "torch.aten.view",
    infer_view
);

tensor_op!(
    /// `torch.aten.reshape`
    ReshapeOp,
    "torch.aten.reshape",
    infer_view
);

tensor_op!(
    /// `torch.aten.slice.Tensor`
    ///
    /// Operands are `self`, `dim`, `start`, `end` and `step`. The bounds
    /// may be `none` and are clamped to the dimension.
    SliceTensorOp,
    "torch.aten.slice.Tensor",
    infer_slice
);

tensor_op!(
    /// `torch.aten.broadcast_to`
    ///
    /// A size of `-1` keeps the existing dimension.
    BroadcastToOp,
    "torch.aten.broadcast_to",
    infer_broadcast_to
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::DefaultParserDispatch;
    use crate::frontend::Parser;
    use crate::ir::GuardedOp;
    use crate::ir::ModuleOp;
    use indoc::indoc;

    fn last_op(src: &str) -> Shared<dyn crate::ir::Op> {
        let module = Parser::<DefaultParserDispatch>::parse(src).unwrap();
        let module = module.rd();
        let module = module.as_any().downcast_ref::<ModuleOp>().unwrap();
        let body = module.body().unwrap();
        let ops = body.rd().ops();
        let ops = ops.rd();
        ops.last().unwrap().clone()
    }

    #[test]
    fn test_infer_broadcast_add() {
        let src = indoc! {r#"
        func.func @f(%x : !torch.vtensor<[3,1],si64>, %y : !torch.vtensor<[1,4],f32>) -> !torch.vtensor {
          %int1 = torch.constant.int 1
          %0 = torch.aten.add.Tensor %x, %y, %int1 : !torch.vtensor<[3,1],si64>, !torch.vtensor<[1,4],f32>, !torch.int -> !torch.vtensor
          return %0 : !torch.vtensor
        }
        "#};
        let func = last_op(src);
        let ops = func.ops();
        let add = ops[1].clone();
        let types = add.rd().infer_result_types().unwrap().unwrap();
        assert_eq!(types[0].rd().to_string(), "!torch.vtensor<[3,4],f32>");
        assert!(add.is::<AddTensorOp>());
    }

    #[test]
    fn test_infer_div_is_float() {
        let src = indoc! {"
        func.func @f(%x : !torch.vtensor<[2],si64>) -> !torch.vtensor {
          %0 = torch.aten.div.Tensor %x, %x : !torch.vtensor<[2],si64>, !torch.vtensor<[2],si64> -> !torch.vtensor
          return %0 : !torch.vtensor
        }
        "};
        let func = last_op(src);
        let div = func.ops()[0].clone();
        let types = div.rd().infer_result_types().unwrap().unwrap();
        assert_eq!(types[0].rd().to_string(), "!torch.vtensor<[2],f32>");
    }

    #[test]
    fn test_infer_sum_and_view() {
        let src = indoc! {"
        func.func @f(%x : !torch.vtensor<[2,3],si32>) -> !torch.vtensor {
          %int1 = torch.constant.int 1
          %int_1 = torch.constant.int -1
          %true = torch.constant.bool true
          %none = torch.constant.none
          %dims = torch.prim.ListConstruct %int1 : !torch.int -> !torch.list<int>
          %0 = torch.aten.sum.dim_IntList %x, %dims, %true, %none : !torch.vtensor<[2,3],si32>, !torch.list<int>, !torch.bool, !torch.none -> !torch.vtensor
          %sizes = torch.prim.ListConstruct %int_1 : !torch.int -> !torch.list<int>
          %1 = torch.aten.view %x, %sizes : !torch.vtensor<[2,3],si32>, !torch.list<int> -> !torch.vtensor
          return %0 : !torch.vtensor
        }
        "};
        let func = last_op(src);
        let ops = func.ops();
        let sum = ops[5].rd().infer_result_types().unwrap().unwrap();
        assert_eq!(sum[0].rd().to_string(), "!torch.vtensor<[2,1],si64>");
        let view = ops[7].rd().infer_result_types().unwrap().unwrap();
        assert_eq!(view[0].rd().to_string(), "!torch.vtensor<[6],si32>");
    }

    #[test]
    fn test_incompatible_shapes() {
        let src = indoc! {"
        func.func @f(%x : !torch.vtensor<[3],f32>, %y : !torch.vtensor<[4],f32>) -> !torch.vtensor {
          %0 = torch.aten.mul.Tensor %x, %y : !torch.vtensor<[3],f32>, !torch.vtensor<[4],f32> -> !torch.vtensor
          return %0 : !torch.vtensor
        }
        "};
        let func = last_op(src);
        let mul = func.ops()[0].clone();
        let err = mul.rd().infer_result_types().err().unwrap();
        assert!(err.to_string().contains("not broadcast compatible"));
    }
}
