use crate::dialect::torch::fold_value;
use crate::frontend::finish_op;
use crate::frontend::Parse;
use crate::frontend::Parser;
use crate::frontend::ParserDispatch;
use crate::frontend::TokenKind;
use crate::ir::format_float;
use crate::ir::scalar_type;
use crate::ir::simple_op;
use crate::ir::Attribute;
use crate::ir::Block;
use crate::ir::FloatAttr;
use crate::ir::IntegerAttr;
use crate::ir::Literal;
use crate::ir::Op;
use crate::ir::Operation;
use crate::ir::OperationName;
use crate::ir::ScalarType;
use crate::shared::Shared;
use crate::shared::SharedExt;
use crate::verify::SymbolTable;
use anyhow::Result;
use std::fmt::Formatter;
use std::sync::Arc;

/// Predicates of `arith.cmpi`.
pub const CMPI_PREDICATES: [&str; 10] = [
    "eq", "ne", "slt", "sle", "sgt", "sge", "ult", "ule", "ugt", "uge",
];

/// Predicates of `arith.cmpf`. Only the ordered ones are used.
pub const CMPF_PREDICATES: [&str; 6] = ["oeq", "one", "olt", "ole", "ogt", "oge"];

fn scalar_types(op: &dyn Op) -> Result<(Vec<ScalarType>, Vec<ScalarType>)> {
    let operation = op.operation().rd();
    let to_scalars = |types: Vec<Shared<dyn crate::ir::Type>>| -> Result<Vec<ScalarType>> {
        types
            .iter()
            .map(|typ| match scalar_type(typ) {
                Some(scalar) => Ok(scalar),
                None => Err(anyhow::anyhow!("expected a scalar type, but got {}", typ.rd())),
            })
            .collect()
    };
    let operands = to_scalars(operation.operand_types()?.vec())?;
    let results = to_scalars(operation.result_types()?.vec())?;
    Ok((operands, results))
}

/// Operands and result all have the same type which satisfies `predicate`.
fn verify_same_types(op: &dyn Op, arity: usize, what: &str, predicate: fn(&ScalarType) -> bool) -> Result<()> {
    let (operands, results) = scalar_types(op)?;
    if operands.len() != arity || results.len() != 1 {
        return Err(anyhow::anyhow!(
            "expected {arity} operands and 1 result, but got {} and {}",
            operands.len(),
            results.len()
        ));
    }
    let result = results[0];
    if !predicate(&result) {
        return Err(anyhow::anyhow!("expected {what} type, but got {result}"));
    }
    if operands.iter().any(|operand| *operand != result) {
        return Err(anyhow::anyhow!("operand and result types must be equal"));
    }
    Ok(())
}

fn is_int_like(typ: &ScalarType) -> bool {
    typ.is_integer() || *typ == ScalarType::Index
}

/// Verify a cast from one kind of scalar to another.
fn verify_cast(op: &dyn Op, from: fn(&ScalarType) -> bool, to: fn(&ScalarType) -> bool) -> Result<()> {
    let (operands, results) = scalar_types(op)?;
    if operands.len() != 1 || results.len() != 1 {
        return Err(anyhow::anyhow!("expected 1 operand and 1 result"));
    }
    if !from(&operands[0]) || !to(&results[0]) {
        return Err(anyhow::anyhow!(
            "invalid cast from {} to {}",
            operands[0],
            results[0]
        ));
    }
    Ok(())
}

fn verify_predicate(op: &dyn Op, allowed: &[&str]) -> Result<()> {
    let predicate = op.operation().rd().attributes().get_str("predicate");
    match predicate {
        Some(predicate) if allowed.contains(&predicate.as_str()) => Ok(()),
        Some(predicate) => Err(anyhow::anyhow!("unknown predicate \"{predicate}\"")),
        None => Err(anyhow::anyhow!("missing predicate")),
    }
}

/// Fold an integer op when both operands are constants.
fn fold_int_binary(op: &dyn Op, f: fn(i64, i64) -> Option<i64>) -> Option<Literal> {
    let lhs = fold_value(&op.operand(0).ok()?)?;
    let rhs = fold_value(&op.operand(1).ok()?)?;
    match (lhs, rhs) {
        (Literal::Int(lhs), Literal::Int(rhs)) => f(lhs, rhs).map(Literal::Int),
        _ => None,
    }
}

/// `arith.constant`
///
/// ```ebnf
/// `arith.constant` $value `:` type($result)
/// ```
///
/// ```mlir
/// %c0 = arith.constant 0 : index
/// %cst = arith.constant 1.5 : f32
/// ```
pub struct ConstantOp {
    operation: Shared<Operation>,
}

impl ConstantOp {
    /// The value; `i1` constants are booleans.
    pub fn value(&self) -> Option<Literal> {
        let attributes = self.operation.rd().attributes();
        if let Some(value) = attributes.get_int("value") {
            if self.result_type() == Some(ScalarType::I1) {
                return Some(Literal::Bool(value != 0));
            }
            return Some(Literal::Int(value));
        }
        attributes.get_float("value").map(Literal::Float)
    }
    pub fn result_type(&self) -> Option<ScalarType> {
        let typ = self.operation.rd().result_type(0)?;
        scalar_type(&typ)
    }
}

impl Op for ConstantOp {
    fn operation_name() -> OperationName {
        OperationName::new("arith.constant".to_string())
    }
    fn new(operation: Shared<Operation>) -> Self {
        ConstantOp { operation }
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
    fn fold(&self) -> Option<Literal> {
        self.value()
    }
    fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
        let typ = match self.result_type() {
            Some(typ) => typ,
            None => return Err(anyhow::anyhow!("result must be a scalar type")),
        };
        match self.value() {
            Some(Literal::Float(_)) if typ.is_float() => Ok(()),
            Some(Literal::Bool(_)) => Ok(()),
            Some(Literal::Int(value)) if !typ.is_float() => match typ.int_range() {
                Some((min, max)) if value < min || max < value => Err(anyhow::anyhow!(
                    "value {value} does not fit into {typ}"
                )),
                _ => Ok(()),
            },
            _ => Err(anyhow::anyhow!("value does not match the type {typ}")),
        }
    }
    fn display(&self, f: &mut Formatter<'_>, _indent: i32) -> std::fmt::Result {
        let operation = self.operation.rd();
        operation.display_results(f)?;
        write!(f, "{} ", operation.name())?;
        match self.value() {
            Some(Literal::Float(value)) => write!(f, "{}", format_float(value))?,
            Some(Literal::Bool(value)) => write!(f, "{}", value as i64)?,
            Some(literal) => write!(f, "{literal}")?,
            None => write!(f, "<none>")?,
        }
        let types = operation.result_types().map_err(|_| std::fmt::Error)?;
        write!(f, " : {types}")
    }
}

impl Parse for ConstantOp {
    fn op<T: ParserDispatch>(
        parser: &mut Parser<T>,
        parent: Option<Shared<Block>>,
    ) -> Result<Shared<dyn Op>> {
        let mut operation = Operation::default();
        operation.set_parent(parent);
        let results = parser.parse_op_results_into(&mut operation)?;
        parser.parse_operation_name_into::<ConstantOp>(&mut operation)?;
        let is_int = match parser.peek().kind {
            TokenKind::Integer => true,
            TokenKind::Minus => parser.peek_n(1).map(|t| t.kind) == Some(TokenKind::Integer),
            _ => false,
        };
        let literal = if is_int {
            Literal::Int(parser.parse_integer()?)
        } else {
            Literal::Float(parser.parse_float()?)
        };
        parser.expect(TokenKind::Colon)?;
        let typ = parser.parse_type()?;
        let value: Arc<dyn Attribute> = match (scalar_type(&typ), &literal) {
            (Some(scalar), _) if scalar.is_float() => {
                Arc::new(FloatAttr::new(literal.as_float().unwrap_or_default()))
            }
            (Some(_), Literal::Int(value)) => Arc::new(IntegerAttr::new(*value)),
            _ => {
                let msg = parser.error(parser.previous(), "Expected a matching scalar type");
                return Err(anyhow::anyhow!(msg));
            }
        };
        operation.attributes().insert("value", value);
        results.set_types(vec![typ])?;
        Ok(finish_op::<ConstantOp>(operation, results))
    }
}

/// Define a pure op in the generic syntax with a verifier.
macro_rules! arith_op {
    ($(#[$meta:meta])* $ty:ident, $mnemonic:literal, $verify:expr) => {
        arith_op!($(#[$meta])* $ty, $mnemonic, $verify, |_op: &dyn Op| -> Option<Literal> { None });
    };
    ($(#[$meta:meta])* $ty:ident, $mnemonic:literal, $verify:expr, $fold:expr) => {
        simple_op!(
            $(#[$meta])*
            $ty,
            $mnemonic,
            {
                fn is_pure(&self) -> bool {
                    true
                }
                fn fold(&self) -> Option<Literal> {
                    let fold: fn(&dyn Op) -> Option<Literal> = $fold;
                    fold(self)
                }
                fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
                    let verify: fn(&dyn Op) -> Result<()> = $verify;
                    verify(self)
                }
            }
        );
    };
}

fn int_binary(op: &dyn Op) -> Result<()> {
    verify_same_types(op, 2, "an integer", is_int_like)
}

fn float_binary(op: &dyn Op) -> Result<()> {
    verify_same_types(op, 2, "a float", ScalarType::is_float)
}

fn float_unary(op: &dyn Op) -> Result<()> {
    verify_same_types(op, 1, "a float", ScalarType::is_float)
}

arith_op!(
    /// `arith.addi`
    ///
    /// ```mlir
    /// %2 = arith.addi %0, %1 : index, index -> index
    /// ```
    AddiOp,
    "arith.addi",
    int_binary,
    |op| fold_int_binary(op, |a, b| Some(a.wrapping_add(b)))
);
arith_op!(
    /// `arith.subi`
    SubiOp,
    "arith.subi",
    int_binary,
    |op| fold_int_binary(op, |a, b| Some(a.wrapping_sub(b)))
);
arith_op!(
    /// `arith.muli`
    MuliOp,
    "arith.muli",
    int_binary,
    |op| fold_int_binary(op, |a, b| Some(a.wrapping_mul(b)))
);
arith_op!(
    /// `arith.divsi`
    ///
    /// Signed division rounding towards zero.
    DivsiOp,
    "arith.divsi",
    int_binary,
    |op| fold_int_binary(op, |a, b| a.checked_div(b))
);
arith_op!(
    /// `arith.remsi`
    RemsiOp,
    "arith.remsi",
    int_binary,
    |op| fold_int_binary(op, |a, b| a.checked_rem(b))
);
arith_op!(
    /// `arith.maxsi`
    MaxsiOp,
    "arith.maxsi",
    int_binary,
    |op| fold_int_binary(op, |a, b| Some(a.max(b)))
);
arith_op!(
    /// `arith.minsi`
    MinsiOp,
    "arith.minsi",
    int_binary,
    |op| fold_int_binary(op, |a, b| Some(a.min(b)))
);
arith_op!(
    /// `arith.addf`
    AddfOp,
    "arith.addf",
    float_binary
);
arith_op!(
    /// `arith.subf`
    SubfOp,
    "arith.subf",
    float_binary
);
arith_op!(
    /// `arith.mulf`
    MulfOp,
    "arith.mulf",
    float_binary
);
arith_op!(
    /// `arith.divf`
    DivfOp,
    "arith.divf",
    float_binary
);
arith_op!(
    /// `arith.maximumf`
    MaximumfOp,
    "arith.maximumf",
    float_binary
);
arith_op!(
    /// `arith.minimumf`
    MinimumfOp,
    "arith.minimumf",
    float_binary
);
arith_op!(
    /// `arith.negf`
    NegfOp,
    "arith.negf",
    float_unary
);

fn verify_compare(op: &dyn Op, predicates: &[&str], operand: fn(&ScalarType) -> bool) -> Result<()> {
    verify_predicate(op, predicates)?;
    let (operands, results) = scalar_types(op)?;
    if operands.len() != 2 || operands[0] != operands[1] || !operand(&operands[0]) {
        return Err(anyhow::anyhow!("expected two operands of the same type"));
    }
    if results != [ScalarType::I1] {
        return Err(anyhow::anyhow!("result must be i1"));
    }
    Ok(())
}

arith_op!(
    /// `arith.cmpi`
    ///
    /// ```mlir
    /// %2 = arith.cmpi %0, %1 {predicate = "slt"} : i64, i64 -> i1
    /// ```
    CmpiOp,
    "arith.cmpi",
    |op| verify_compare(op, &CMPI_PREDICATES, is_int_like)
);
arith_op!(
    /// `arith.cmpf`
    CmpfOp,
    "arith.cmpf",
    |op| verify_compare(op, &CMPF_PREDICATES, ScalarType::is_float)
);

fn verify_select(op: &dyn Op) -> Result<()> {
    let (operands, results) = scalar_types(op)?;
    if operands.len() != 3 || results.len() != 1 {
        return Err(anyhow::anyhow!("expected 3 operands and 1 result"));
    }
    if operands[0] != ScalarType::I1 {
        return Err(anyhow::anyhow!("condition must be i1"));
    }
    if operands[1] != results[0] || operands[2] != results[0] {
        return Err(anyhow::anyhow!("values and result must have the same type"));
    }
    Ok(())
}

arith_op!(
    /// `arith.select`
    ///
    /// ```mlir
    /// %3 = arith.select %c, %a, %b : i1, f32, f32 -> f32
    /// ```
    SelectOp,
    "arith.select",
    verify_select
);

fn is_integer(typ: &ScalarType) -> bool {
    typ.is_integer()
}

fn is_float(typ: &ScalarType) -> bool {
    typ.is_float()
}

arith_op!(
    /// `arith.sitofp`
    SitofpOp,
    "arith.sitofp",
    |op| verify_cast(op, is_integer, is_float)
);
arith_op!(
    /// `arith.uitofp`
    UitofpOp,
    "arith.uitofp",
    |op| verify_cast(op, is_integer, is_float)
);
arith_op!(
    /// `arith.fptosi`
    ///
    /// Truncates towards zero.
    FptosiOp,
    "arith.fptosi",
    |op| verify_cast(op, is_float, is_integer)
);
arith_op!(
    /// `arith.fptoui`
    FptouiOp,
    "arith.fptoui",
    |op| verify_cast(op, is_float, is_integer)
);
arith_op!(
    /// `arith.extf`
    ExtfOp,
    "arith.extf",
    |op| verify_cast(op, is_float, is_float)
);
arith_op!(
    /// `arith.truncf`
    TruncfOp,
    "arith.truncf",
    |op| verify_cast(op, is_float, is_float)
);
arith_op!(
    /// `arith.extsi`
    ExtsiOp,
    "arith.extsi",
    |op| verify_cast(op, is_integer, is_integer)
);
arith_op!(
    /// `arith.trunci`
    TrunciOp,
    "arith.trunci",
    |op| verify_cast(op, is_integer, is_integer)
);
arith_op!(
    /// `arith.index_cast`
    ///
    /// Converts between `index` and integers.
    IndexCastOp,
    "arith.index_cast",
    |op| verify_cast(op, is_int_like, is_int_like),
    |op| match fold_value(&op.operand(0).ok()?)? {
        Literal::Int(value) => Some(Literal::Int(value)),
        _ => None,
    }
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::DefaultParserDispatch;
    use crate::ir::ModuleOp;
    use indoc::indoc;

    #[test]
    fn test_constant_round_trip_and_fold() {
        let src = indoc! {r#"
        module {
          func.func @f() -> index {
            %c2 = arith.constant 2 : index
            %c3 = arith.constant 3 : index
            %cst = arith.constant 1.5 : f32
            %0 = arith.muli %c2, %c3 : index, index -> index
            %1 = arith.cmpi %c2, %c3 {predicate = "slt"} : index, index -> i1
            return %0 : index
          }
        }"#};
        let module = Parser::<DefaultParserDispatch>::parse(src).unwrap();
        assert_eq!(module.rd().to_string(), src);
        let module = module.rd();
        let module = module.as_any().downcast_ref::<ModuleOp>().unwrap();
        let func = module.first_op().unwrap();
        let ops = func.rd().ops();
        assert_eq!(ops[3].rd().fold(), Some(Literal::Int(6)));
        assert_eq!(ops[2].rd().fold(), Some(Literal::Float(1.5)));
    }
}
