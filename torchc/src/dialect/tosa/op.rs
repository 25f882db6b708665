use crate::frontend::finish_op;
use crate::frontend::Parse;
use crate::frontend::Parser;
use crate::frontend::ParserDispatch;
use crate::frontend::TokenKind;
use crate::ir::shaped_type;
use crate::ir::simple_op;
use crate::ir::Block;
use crate::ir::DenseAttr;
use crate::ir::Op;
use crate::ir::Operation;
use crate::ir::OperationName;
use crate::ir::ScalarType;
use crate::ir::ShapedKind;
use crate::ir::ShapedType;
use crate::ir::Type;
use crate::shared::Shared;
use crate::shared::SharedExt;
use crate::verify::SymbolTable;
use crate::Error;
use anyhow::Result;
use std::fmt::Formatter;

fn tensor_type(typ: &Shared<dyn Type>) -> Result<ShapedType> {
    match shaped_type(typ) {
        Some(shaped) if shaped.kind() == ShapedKind::Tensor && shaped.is_static() => Ok(shaped),
        _ => Err(anyhow::anyhow!(
            "expected a statically shaped tensor, but got {}",
            typ.rd()
        )),
    }
}

/// Operand and result tensor types of `op`.
fn signature(op: &dyn Op, operands: usize) -> Result<(Vec<ShapedType>, ShapedType)> {
    let operation = op.operation().rd();
    let operand_types = operation.operand_types()?.vec();
    let result_types = operation.result_types()?.vec();
    if operand_types.len() != operands || result_types.len() != 1 {
        return Err(anyhow::anyhow!(
            "expected {operands} operands and 1 result, but got {} and {}",
            operand_types.len(),
            result_types.len()
        ));
    }
    let operands = operand_types
        .iter()
        .map(tensor_type)
        .collect::<Result<Vec<ShapedType>>>()?;
    Ok((operands, tensor_type(&result_types[0])?))
}

fn expect_result(result: &ShapedType, shape: &[i64], element: ScalarType) -> Result<()> {
    if result.shape() != shape || result.element() != element {
        let expected = ShapedType::tensor(shape.to_vec(), element);
        return Err(anyhow::anyhow!(
            "expected result type {expected}, but got {result}"
        ));
    }
    Ok(())
}

fn int_array(op: &dyn Op, name: &str) -> Result<Vec<i64>> {
    match op.operation().rd().attributes().get_array(name) {
        Some(values) => Ok(values),
        None => Err(anyhow::anyhow!("missing attribute '{name}'")),
    }
}

/// Shape of an elementwise binary op.
///
/// Both operands have the same rank and each pair of dimensions is equal or
/// contains a 1.
pub fn broadcast_shape(lhs: &[i64], rhs: &[i64]) -> Result<Vec<i64>> {
    if lhs.len() != rhs.len() {
        return Err(anyhow::anyhow!(
            "operands must have the same rank, but got {} and {}",
            lhs.len(),
            rhs.len()
        ));
    }
    lhs.iter()
        .zip(rhs)
        .map(|(l, r)| match (*l, *r) {
            (1, other) | (other, 1) => Ok(other),
            (l, r) if l == r => Ok(l),
            (l, r) => Err(anyhow::anyhow!("dimensions {l} and {r} are not compatible")),
        })
        .collect()
}

pub fn transpose_shape(shape: &[i64], perms: &[i64]) -> Result<Vec<i64>> {
    let mut seen = vec![false; shape.len()];
    let mut result = vec![];
    for perm in perms {
        let index = usize::try_from(*perm).ok().filter(|i| *i < shape.len());
        match index {
            Some(i) if !seen[i] => {
                seen[i] = true;
                result.push(shape[i]);
            }
            _ => return Err(anyhow::anyhow!("perms {perms:?} is not a permutation")),
        }
    }
    if result.len() != shape.len() {
        return Err(anyhow::anyhow!("perms {perms:?} is not a permutation"));
    }
    Ok(result)
}

/// Shape after padding with `[low_0, high_0, low_1, high_1, ...]`.
pub fn pad_shape(shape: &[i64], padding: &[i64]) -> Result<Vec<i64>> {
    if padding.len() != 2 * shape.len() || padding.iter().any(|p| *p < 0) {
        return Err(anyhow::anyhow!(
            "expected {} non-negative padding values, but got {padding:?}",
            2 * shape.len()
        ));
    }
    Ok(shape
        .iter()
        .enumerate()
        .map(|(i, d)| d + padding[2 * i] + padding[2 * i + 1])
        .collect())
}

pub fn tile_shape(shape: &[i64], multiples: &[i64]) -> Result<Vec<i64>> {
    if multiples.len() != shape.len() || multiples.iter().any(|m| *m < 1) {
        return Err(anyhow::anyhow!("invalid multiples {multiples:?}"));
    }
    Ok(shape.iter().zip(multiples).map(|(d, m)| d * m).collect())
}

/// Shape of a batched matmul `[N, H, C] x [N, C, W] -> [N, H, W]`.
pub fn matmul_shape(lhs: &[i64], rhs: &[i64]) -> Result<Vec<i64>> {
    match (lhs, rhs) {
        ([n, h, c], [m, k, w]) if n == m && c == k => Ok(vec![*n, *h, *w]),
        _ => Err(anyhow::anyhow!(
            "incompatible matmul operands {lhs:?} and {rhs:?}"
        )),
    }
}

/// Shape after summing over `axis`; the axis is kept with size 1.
pub fn reduce_shape(shape: &[i64], axis: i64) -> Result<Vec<i64>> {
    let axis = usize::try_from(axis)
        .ok()
        .filter(|axis| *axis < shape.len())
        .ok_or_else(|| anyhow::anyhow!("axis {axis} out of range for rank {}", shape.len()))?;
    let mut result = shape.to_vec();
    result[axis] = 1;
    Ok(result)
}

pub fn slice_shape(shape: &[i64], start: &[i64], size: &[i64]) -> Result<Vec<i64>> {
    if start.len() != shape.len() || size.len() != shape.len() {
        return Err(anyhow::anyhow!("start and size must have rank {}", shape.len()));
    }
    for i in 0..shape.len() {
        if start[i] < 0 || size[i] < 0 || start[i] + size[i] > shape[i] {
            return Err(anyhow::anyhow!(
                "slice [{}, {}) out of bounds for dimension {i} of size {}",
                start[i],
                start[i] + size[i],
                shape[i]
            ));
        }
    }
    Ok(size.to_vec())
}

fn verify_binary(op: &dyn Op) -> Result<()> {
    let (operands, result) = signature(op, 2)?;
    if operands[0].element() != operands[1].element() {
        return Err(anyhow::anyhow!("operands must have the same element type"));
    }
    let shape = broadcast_shape(operands[0].shape(), operands[1].shape())?;
    expect_result(&result, &shape, operands[0].element())
}

fn verify_unary(op: &dyn Op) -> Result<()> {
    let (operands, result) = signature(op, 1)?;
    expect_result(&result, operands[0].shape(), operands[0].element())
}

fn verify_float_unary(op: &dyn Op) -> Result<()> {
    let (operands, _) = signature(op, 1)?;
    if !operands[0].element().is_float() {
        return Err(anyhow::anyhow!("expected a float tensor"));
    }
    verify_unary(op)
}

fn verify_cast(op: &dyn Op) -> Result<()> {
    let (operands, result) = signature(op, 1)?;
    expect_result(&result, operands[0].shape(), result.element())
}

fn verify_clamp(op: &dyn Op) -> Result<()> {
    verify_unary(op)?;
    let attributes = op.operation().rd().attributes();
    let bounds = match (attributes.get_float("min_fp"), attributes.get_float("max_fp")) {
        (Some(min), Some(max)) => (min, max),
        _ => return Err(anyhow::anyhow!("missing attribute 'min_fp' or 'max_fp'")),
    };
    if bounds.0.is_nan() || bounds.1.is_nan() || bounds.0 > bounds.1 {
        return Err(Error::attribute_range(
            op,
            format!("min_fp {} is larger than max_fp {}", bounds.0, bounds.1),
        ));
    }
    match (attributes.get_int("min_int"), attributes.get_int("max_int")) {
        (Some(min), Some(max)) if min > max => Err(Error::attribute_range(
            op,
            format!("min_int {min} is larger than max_int {max}"),
        )),
        (Some(_), Some(_)) => Ok(()),
        _ => Err(anyhow::anyhow!("missing attribute 'min_int' or 'max_int'")),
    }
}

fn verify_reshape(op: &dyn Op) -> Result<()> {
    let (operands, result) = signature(op, 1)?;
    let new_shape = int_array(op, "new_shape")?;
    let count: i64 = new_shape.iter().product();
    if new_shape.iter().any(|d| *d < 0) || count != operands[0].num_elements() {
        return Err(anyhow::anyhow!(
            "cannot reshape {} into {new_shape:?}",
            operands[0]
        ));
    }
    expect_result(&result, &new_shape, operands[0].element())
}

fn verify_transpose(op: &dyn Op) -> Result<()> {
    let (operands, result) = signature(op, 1)?;
    let shape = transpose_shape(operands[0].shape(), &int_array(op, "perms")?)?;
    expect_result(&result, &shape, operands[0].element())
}

fn verify_slice(op: &dyn Op) -> Result<()> {
    let (operands, result) = signature(op, 1)?;
    let start = int_array(op, "start")?;
    let size = int_array(op, "size")?;
    let shape = slice_shape(operands[0].shape(), &start, &size)?;
    expect_result(&result, &shape, operands[0].element())
}

fn verify_pad(op: &dyn Op) -> Result<()> {
    let (operands, result) = signature(op, 1)?;
    if op.operation().rd().attributes().get_float("pad_const").is_none() {
        return Err(anyhow::anyhow!("missing attribute 'pad_const'"));
    }
    let shape = pad_shape(operands[0].shape(), &int_array(op, "padding")?)?;
    expect_result(&result, &shape, operands[0].element())
}

fn verify_tile(op: &dyn Op) -> Result<()> {
    let (operands, result) = signature(op, 1)?;
    let shape = tile_shape(operands[0].shape(), &int_array(op, "multiples")?)?;
    expect_result(&result, &shape, operands[0].element())
}

fn verify_matmul(op: &dyn Op) -> Result<()> {
    let (operands, result) = signature(op, 2)?;
    if operands[0].element() != operands[1].element() {
        return Err(anyhow::anyhow!("operands must have the same element type"));
    }
    let shape = matmul_shape(operands[0].shape(), operands[1].shape())?;
    expect_result(&result, &shape, operands[0].element())
}

fn verify_reduce_sum(op: &dyn Op) -> Result<()> {
    let (operands, result) = signature(op, 1)?;
    let axis = op.operation().rd().attributes().get_int("axis");
    let axis = axis.ok_or_else(|| anyhow::anyhow!("missing attribute 'axis'"))?;
    let shape = reduce_shape(operands[0].shape(), axis)?;
    expect_result(&result, &shape, operands[0].element())
}

/// Tosa ops are pure and only differ in how they are verified.
macro_rules! tosa_op {
    ($(#[$meta:meta])* $ty:ident, $mnemonic:literal, $verify:ident) => {
        simple_op!(
            $(#[$meta])*
            $ty,
            $mnemonic,
            {
                fn is_pure(&self) -> bool {
                    true
                }
                fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
                    $verify(self)
                }
            }
        );
    };
}

tosa_op!(
    /// `tosa.add`
    ///
    /// Elementwise addition. Size-1 dimensions are broadcast, but the ranks
    /// have to be equal.
    ///
    /// ```mlir
    /// %2 = tosa.add %0, %1 : tensor<3x1xf32>, tensor<1x4xf32> -> tensor<3x4xf32>
    /// ```
    AddOp,
    "tosa.add",
    verify_binary
);
tosa_op!(
    /// `tosa.sub`
    SubOp,
    "tosa.sub",
    verify_binary
);
tosa_op!(
    /// `tosa.mul`
    MulOp,
    "tosa.mul",
    verify_binary
);
tosa_op!(
    /// `tosa.maximum`
    MaximumOp,
    "tosa.maximum",
    verify_binary
);
tosa_op!(
    /// `tosa.minimum`
    MinimumOp,
    "tosa.minimum",
    verify_binary
);
tosa_op!(
    /// `tosa.reciprocal`
    ReciprocalOp,
    "tosa.reciprocal",
    verify_float_unary
);
tosa_op!(
    /// `tosa.negate`
    NegateOp,
    "tosa.negate",
    verify_unary
);
tosa_op!(
    /// `tosa.exp`
    ExpOp,
    "tosa.exp",
    verify_float_unary
);
tosa_op!(
    /// `tosa.tanh`
    TanhOp,
    "tosa.tanh",
    verify_float_unary
);
tosa_op!(
    /// `tosa.sigmoid`
    SigmoidOp,
    "tosa.sigmoid",
    verify_float_unary
);
tosa_op!(
    /// `tosa.abs`
    AbsOp,
    "tosa.abs",
    verify_unary
);
tosa_op!(
    /// `tosa.clamp`
    ///
    /// ```mlir
    /// %1 = tosa.clamp %0 {max_fp = 3.4028234663852886e38, max_int = 9223372036854775807, min_fp = 0.0, min_int = 0} : tensor<4xf32> -> tensor<4xf32>
    /// ```
    ///
    /// The float bounds apply to float tensors and the integer bounds to
    /// integer tensors.
    ClampOp,
    "tosa.clamp",
    verify_clamp
);
tosa_op!(
    /// `tosa.cast`
    ///
    /// Float to integer casts round to nearest, ties to even, and saturate.
    CastOp,
    "tosa.cast",
    verify_cast
);
tosa_op!(
    /// `tosa.reshape`
    ReshapeOp,
    "tosa.reshape",
    verify_reshape
);
tosa_op!(
    /// `tosa.transpose`
    ///
    /// Dimension `i` of the result is dimension `perms[i]` of the input.
    TransposeOp,
    "tosa.transpose",
    verify_transpose
);
tosa_op!(
    /// `tosa.slice`
    SliceOp,
    "tosa.slice",
    verify_slice
);
tosa_op!(
    /// `tosa.pad`
    ///
    /// `padding` holds the low and high padding per dimension and the new
    /// elements are `pad_const`.
    PadOp,
    "tosa.pad",
    verify_pad
);
tosa_op!(
    /// `tosa.tile`
    TileOp,
    "tosa.tile",
    verify_tile
);
tosa_op!(
    /// `tosa.matmul`
    MatmulOp,
    "tosa.matmul",
    verify_matmul
);
tosa_op!(
    /// `tosa.reduce_sum`
    ReduceSumOp,
    "tosa.reduce_sum",
    verify_reduce_sum
);

/// `tosa.const`
///
/// ```ebnf
/// `tosa.const` $value `:` type($result)
/// ```
///
/// ```mlir
/// %0 = tosa.const dense<[1.0, 2.0]> : tensor<2xf32>
/// %1 = tosa.const dense<0> : tensor<3x4xi64>
/// ```
pub struct ConstOp {
    operation: Shared<Operation>,
}

impl ConstOp {
    pub fn value(&self) -> Option<DenseAttr> {
        self.operation.rd().attributes().get_dense("value")
    }
}

impl Op for ConstOp {
    fn operation_name() -> OperationName {
        OperationName::new("tosa.const".to_string())
    }
    fn new(operation: Shared<Operation>) -> Self {
        ConstOp { operation }
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn operation(&self) -> &Shared<Operation> {
        &self.operation
    }
    fn is_const(&self) -> bool {
        true
    }
    fn is_pure(&self) -> bool {
        true
    }
    fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
        let (_, result) = signature(self, 0)?;
        let value = match self.value() {
            Some(value) => value,
            None => return Err(anyhow::anyhow!("missing dense value")),
        };
        let count = result.num_elements() as usize;
        if !value.is_splat() && value.values().len() != count {
            return Err(anyhow::anyhow!(
                "expected {count} elements for {result}, but got {}",
                value.values().len()
            ));
        }
        Ok(())
    }
    fn display(&self, f: &mut Formatter<'_>, _indent: i32) -> std::fmt::Result {
        let operation = self.operation.rd();
        operation.display_results(f)?;
        let value = self.value().ok_or(std::fmt::Error)?;
        let typ = operation.result_type(0).ok_or(std::fmt::Error)?;
        let typ = typ.rd().to_string();
        write!(f, "{} {value} : {typ}", operation.name())
    }
}

impl Parse for ConstOp {
    fn op<T: ParserDispatch>(
        parser: &mut Parser<T>,
        parent: Option<Shared<Block>>,
    ) -> Result<Shared<dyn Op>> {
        let mut operation = Operation::default();
        operation.set_parent(parent);
        let results = parser.parse_op_results_into(&mut operation)?;
        parser.parse_operation_name_into::<ConstOp>(&mut operation)?;
        if !parser.check_keyword("dense") {
            let msg = parser.error(parser.peek(), "Expected dense elements");
            return Err(anyhow::anyhow!(msg));
        }
        let value = parser.parse_attribute_value()?;
        operation.attributes().insert("value", value);
        parser.expect(TokenKind::Colon)?;
        let typ = parser.parse_type()?;
        results.set_types(vec![typ])?;
        Ok(finish_op::<ConstOp>(operation, results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::DefaultParserDispatch;
    use indoc::indoc;

    #[test]
    fn test_shape_functions() {
        assert_eq!(broadcast_shape(&[3, 1], &[1, 4]).unwrap(), vec![3, 4]);
        assert!(broadcast_shape(&[3], &[1, 4]).is_err());
        assert_eq!(transpose_shape(&[2, 3, 4], &[2, 0, 1]).unwrap(), vec![4, 2, 3]);
        assert!(transpose_shape(&[2, 3], &[0, 0]).is_err());
        assert_eq!(pad_shape(&[2, 3], &[1, 0, 0, 2]).unwrap(), vec![3, 5]);
        assert_eq!(tile_shape(&[1, 4], &[3, 1]).unwrap(), vec![3, 4]);
        assert_eq!(matmul_shape(&[1, 2, 3], &[1, 3, 5]).unwrap(), vec![1, 2, 5]);
        assert_eq!(reduce_shape(&[2, 3], 1).unwrap(), vec![2, 1]);
        assert!(slice_shape(&[4], &[2], &[3]).is_err());
    }

    #[test]
    fn test_tosa_round_trip() {
        let src = indoc! {"
        module {
          func.func @f(%x : tensor<3x1xf32>) -> tensor<3x4xf32> {
            %0 = tosa.const dense<[1.0, 2.0, 3.0, 4.0]> : tensor<1x4xf32>
            %1 = tosa.add %x, %0 : tensor<3x1xf32>, tensor<1x4xf32> -> tensor<3x4xf32>
            %2 = tosa.clamp %1 {max_fp = 6.0, max_int = 6, min_fp = 0.0, min_int = 0} : tensor<3x4xf32> -> tensor<3x4xf32>
            return %2 : tensor<3x4xf32>
          }
        }"};
        let module = Parser::<DefaultParserDispatch>::parse(src).unwrap();
        assert_eq!(module.rd().to_string(), src);
        crate::verify::verify(&module).unwrap();
    }

    #[test]
    fn test_clamp_range() {
        let src = indoc! {"
        func.func @f(%x : tensor<4xf32>) -> tensor<4xf32> {
          %0 = tosa.clamp %x {max_fp = 0.0, max_int = 0, min_fp = 1.0, min_int = 0} : tensor<4xf32> -> tensor<4xf32>
          return %0 : tensor<4xf32>
        }"};
        let module = Parser::<DefaultParserDispatch>::parse(src).unwrap();
        let diagnostics = crate::verify::verify(&module).unwrap_err();
        assert!(diagnostics.to_string().contains("attribute out of range"));
    }
}
