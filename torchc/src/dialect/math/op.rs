use crate::ir::scalar_type;
use crate::ir::simple_op;
use crate::ir::Op;
use crate::shared::SharedExt;
use crate::verify::SymbolTable;
use anyhow::Result;

fn verify_float_unary(op: &dyn Op) -> Result<()> {
    let operation = op.operation().rd();
    let operands = operation.operand_types()?.vec();
    let results = operation.result_types()?.vec();
    if operands.len() != 1 || results.len() != 1 {
        return Err(anyhow::anyhow!("expected 1 operand and 1 result"));
    }
    let operand = scalar_type(&operands[0]);
    let result = scalar_type(&results[0]);
    match (operand, result) {
        (Some(operand), Some(result)) if operand.is_float() && operand == result => Ok(()),
        _ => Err(anyhow::anyhow!(
            "operand and result must be the same float type, but got {} and {}",
            operands[0].rd(),
            results[0].rd()
        )),
    }
}

macro_rules! math_op {
    ($(#[$meta:meta])* $ty:ident, $mnemonic:literal) => {
        simple_op!(
            $(#[$meta])*
            $ty,
            $mnemonic,
            {
                fn is_pure(&self) -> bool {
                    true
                }
                fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
                    verify_float_unary(self)
                }
            }
        );
    };
}

math_op!(
    /// `math.exp`
    ///
    /// ```mlir
    /// %1 = math.exp %0 : f32 -> f32
    /// ```
    ExpOp,
    "math.exp"
);
math_op!(
    /// `math.tanh`
    TanhOp,
    "math.tanh"
);
math_op!(
    /// `math.absf`
    AbsfOp,
    "math.absf"
);
math_op!(
    /// `math.roundeven`
    ///
    /// Rounds to the nearest integer, ties to even. Used by quantization.
    RoundevenOp,
    "math.roundeven"
);
