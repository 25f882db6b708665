//! Structured control flow: `torch.prim.If` and `torch.prim.Loop`.
use crate::convert::RewriteResult;
use crate::dialect::torch::fold_bool;
use crate::dialect::torch::fold_int;
use crate::dialect::torch::operand_type;
use crate::dialect::torch::torch_type;
use crate::dialect::torch::value_torch_type;
use crate::dialect::torch::TorchType;
use crate::frontend::finish_op;
use crate::frontend::Parse;
use crate::frontend::Parser;
use crate::frontend::ParserDispatch;
use crate::frontend::TokenKind;
use crate::ir::replace_all_uses_with;
use crate::ir::simple_op;
use crate::ir::Block;
use crate::ir::GuardedOp;
use crate::ir::Op;
use crate::ir::OpOperands;
use crate::ir::Operation;
use crate::ir::OperationName;
use crate::ir::Region;
use crate::ir::Type;
use crate::ir::Types;
use crate::ir::Value;
use crate::shared::Shared;
use crate::shared::SharedExt;
use crate::verify::SymbolTable;
use anyhow::Result;
use std::fmt::Formatter;

fn is_subtype(actual: &Shared<dyn Type>, expected: &Shared<dyn Type>) -> bool {
    match (torch_type(actual), torch_type(expected)) {
        (Some(actual), Some(expected)) => actual.is_subtype(&expected),
        _ => actual.rd().to_string() == expected.rd().to_string(),
    }
}

/// Check that the values passed to a terminator fit the expected types.
fn check_forwarded(what: &str, values: &[Shared<Value>], expected: &[Shared<dyn Type>]) -> Result<()> {
    if values.len() != expected.len() {
        return Err(anyhow::anyhow!(
            "{what} passes {} values, but {} are expected",
            values.len(),
            expected.len()
        ));
    }
    for (i, (value, expected)) in values.iter().zip(expected).enumerate() {
        let actual = value.rd().typ()?;
        if !is_subtype(&actual, expected) {
            return Err(anyhow::anyhow!(
                "{what} value #{i} has type {}, but {} is expected",
                actual.rd(),
                expected.rd()
            ));
        }
    }
    Ok(())
}

/// The terminator of the single block of `region` if it is an `O`.
fn terminator_of<O: Op + 'static>(region: &Shared<Region>) -> Option<Shared<dyn Op>> {
    let block = region.rd().entry()?;
    let terminator = block.rd().terminator()?;
    if terminator.is::<O>() {
        Some(terminator)
    } else {
        None
    }
}

fn terminator_operands(terminator: &Shared<dyn Op>) -> Vec<Shared<Value>> {
    terminator.rd().operation().rd().operands().values()
}

/// Move the ops of the entry block of `region`, except for the terminator,
/// in front of `op`. Returns the operands of the terminator.
fn inline_region_before(op: &dyn Op, region: &Shared<Region>) -> Result<Vec<Shared<Value>>> {
    let block = match region.rd().entry() {
        Some(block) => block,
        None => return Err(anyhow::anyhow!("expected a region with a block")),
    };
    let ops = block.rd().ops().rd().clone();
    let (terminator, body) = match ops.split_last() {
        Some(split) => split,
        None => return Err(anyhow::anyhow!("expected a terminator")),
    };
    for nested in body {
        block.rd().remove(&nested.operation())?;
        op.insert_before(nested.clone())?;
    }
    Ok(terminator_operands(terminator))
}

/// `torch.prim.If`
///
/// ```ebnf
/// `torch.prim.If` $condition `->` `(` type($results) `)` region `else` region
/// ```
///
/// For example,
///
/// ```mlir
/// %0 = torch.prim.If %cond -> (!torch.int) {
///   torch.prim.If.yield %int3 : !torch.int
/// } else {
///   torch.prim.If.yield %int4 : !torch.int
/// }
/// ```
pub struct PrimIfOp {
    operation: Shared<Operation>,
}

impl PrimIfOp {
    pub fn then_region(&self) -> Option<Shared<Region>> {
        self.regions().first().cloned()
    }
    pub fn else_region(&self) -> Option<Shared<Region>> {
        self.regions().get(1).cloned()
    }
}

impl Op for PrimIfOp {
    fn operation_name() -> OperationName {
        OperationName::new("torch.prim.If".to_string())
    }
    fn new(operation: Shared<Operation>) -> Self {
        PrimIfOp { operation }
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn operation(&self) -> &Shared<Operation> {
        &self.operation
    }
    fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
        let condition = operand_type(self, 0)?;
        if condition != TorchType::Bool {
            return Err(anyhow::anyhow!("condition must be !torch.bool, but got {condition}"));
        }
        let regions = self.regions();
        if regions.len() != 2 {
            return Err(anyhow::anyhow!(
                "requires a then and an else region, but has {} regions",
                regions.len()
            ));
        }
        let result_types = self.operation.rd().result_types()?.vec();
        for (what, region) in ["then", "else"].iter().zip(&regions) {
            let terminator = match terminator_of::<PrimIfYieldOp>(region) {
                Some(terminator) => terminator,
                None => {
                    return Err(anyhow::anyhow!(
                        "{what} region must end with 'torch.prim.If.yield'"
                    ))
                }
            };
            let yielded = terminator_operands(&terminator);
            check_forwarded(&format!("{what} branch"), &yielded, &result_types)?;
        }
        Ok(())
    }
    fn canonicalize(&self) -> Result<RewriteResult> {
        let condition = match fold_bool(&self.operand(0)?) {
            Some(condition) => condition,
            None => return Ok(RewriteResult::Unchanged),
        };
        let region = if condition {
            self.then_region()
        } else {
            self.else_region()
        };
        let region = match region {
            Some(region) => region,
            None => return Ok(RewriteResult::Unchanged),
        };
        let changed = RewriteResult::changed_around(self)?;
        let yielded = inline_region_before(self, &region)?;
        let results = self.operation.rd().results();
        for (result, value) in results.into_iter().zip(yielded) {
            replace_all_uses_with(&result, &value);
        }
        self.remove()?;
        Ok(changed)
    }
    fn display(&self, f: &mut Formatter<'_>, indent: i32) -> std::fmt::Result {
        let operation = self.operation.rd();
        operation.display_results(f)?;
        let types = operation.result_types().map_err(|_| std::fmt::Error)?;
        write!(f, "{} {} -> ({types})", operation.name(), operation.operands())?;
        let regions = operation.regions();
        if let Some(then) = regions.first() {
            then.rd().display(f, indent)?;
        }
        if let Some(otherwise) = regions.get(1) {
            write!(f, " else")?;
            otherwise.rd().display(f, indent)?;
        }
        Ok(())
    }
}

impl Parse for PrimIfOp {
    fn op<T: ParserDispatch>(
        parser: &mut Parser<T>,
        parent: Option<Shared<Block>>,
    ) -> Result<Shared<dyn Op>> {
        let mut operation = Operation::default();
        operation.set_parent(parent);
        let results = parser.parse_op_results_into(&mut operation)?;
        parser.parse_operation_name_into::<PrimIfOp>(&mut operation)?;
        let condition = parser.parse_op_operand()?;
        operation.set_operands(OpOperands::from_vec(vec![condition]));
        parser.expect(TokenKind::Arrow)?;
        let types = parser.parse_parenthesized_types()?;
        results.set_types(types.vec())?;
        let op = finish_op::<PrimIfOp>(operation, results);
        let then = parser.parse_region(op.clone())?;
        parser.parse_keyword("else")?;
        let otherwise = parser.parse_region(op.clone())?;
        op.operation().wr().set_regions(vec![then, otherwise]);
        Ok(op)
    }
}

simple_op!(
    /// `torch.prim.If.yield`
    PrimIfYieldOp,
    "torch.prim.If.yield",
    {
        fn is_terminator(&self) -> bool {
            true
        }
        fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
            match self.parent_op() {
                Some(parent) if parent.is::<PrimIfOp>() => Ok(()),
                _ => Err(anyhow::anyhow!("expects parent op 'torch.prim.If'")),
            }
        }
    }
);

/// `torch.prim.Loop`
///
/// ```ebnf
/// `torch.prim.Loop` $max_trip_count `,` $initial_condition `,` `init` `(` $inits `)`
///     region `:` `(` type($operands) `)` `->` `(` type($results) `)`
/// ```
///
/// The body receives the iteration number and the loop-carried values and
/// ends with `torch.prim.Loop.condition`. The loop stops when the trip
/// count is reached or the condition is false.
///
/// ```mlir
/// %0 = torch.prim.Loop %int5, %true, init(%x) {
/// ^bb0(%iv: !torch.int, %acc: !torch.int):
///   %1 = torch.aten.add.int %acc, %iv : !torch.int, !torch.int -> !torch.int
///   torch.prim.Loop.condition %true, iter(%1 : !torch.int)
/// } : (!torch.int, !torch.bool, !torch.int) -> (!torch.int)
/// ```
pub struct PrimLoopOp {
    operation: Shared<Operation>,
}

impl PrimLoopOp {
    pub fn inits(&self) -> Vec<Shared<Value>> {
        let operands = self.operation.rd().operands().values();
        operands.into_iter().skip(2).collect()
    }
    pub fn body(&self) -> Option<Shared<Block>> {
        self.region()?.rd().entry()
    }
    /// A loop that always continues until the trip count, like a Python
    /// `for` loop over `range`.
    pub fn is_for_like(&self) -> bool {
        let initial = self.operand(1).ok().and_then(|value| fold_bool(&value));
        let region = match self.region() {
            Some(region) => region,
            None => return false,
        };
        let next = terminator_of::<PrimLoopConditionOp>(&region)
            .and_then(|terminator| terminator.rd().operand(0).ok())
            .and_then(|value| fold_bool(&value));
        initial == Some(true) && next == Some(true)
    }
    fn is_zero_trip(&self) -> bool {
        let max = self.operand(0).ok().and_then(|value| fold_int(&value));
        let initial = self.operand(1).ok().and_then(|value| fold_bool(&value));
        matches!(max, Some(max) if max <= 0) || initial == Some(false)
    }
}

impl Op for PrimLoopOp {
    fn operation_name() -> OperationName {
        OperationName::new("torch.prim.Loop".to_string())
    }
    fn new(operation: Shared<Operation>) -> Self {
        PrimLoopOp { operation }
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn operation(&self) -> &Shared<Operation> {
        &self.operation
    }
    fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
        let max = operand_type(self, 0)?;
        let initial = operand_type(self, 1)?;
        if max != TorchType::Int || initial != TorchType::Bool {
            return Err(anyhow::anyhow!(
                "expects a !torch.int trip count and a !torch.bool condition, but got {max} and {initial}"
            ));
        }
        let result_types = self.operation.rd().result_types()?.vec();
        check_forwarded("init", &self.inits(), &result_types)?;
        let body = match self.body() {
            Some(body) => body,
            None => return Err(anyhow::anyhow!("requires a body block")),
        };
        let arguments = body.rd().arguments().vec().rd().clone();
        if arguments.len() != result_types.len() + 1 {
            return Err(anyhow::anyhow!(
                "body must take the iteration number and {} loop-carried values",
                result_types.len()
            ));
        }
        if value_torch_type(&arguments[0]) != Some(TorchType::Int) {
            return Err(anyhow::anyhow!("iteration number must be !torch.int"));
        }
        for (i, (argument, expected)) in arguments[1..].iter().zip(&result_types).enumerate() {
            let actual = argument.rd().typ()?;
            if actual.rd().to_string() != expected.rd().to_string() {
                return Err(anyhow::anyhow!(
                    "loop-carried argument #{i} has type {}, but the result has type {}",
                    actual.rd(),
                    expected.rd()
                ));
            }
        }
        let region = self.region().ok_or_else(|| anyhow::anyhow!("requires a body"))?;
        let terminator = match terminator_of::<PrimLoopConditionOp>(&region) {
            Some(terminator) => terminator,
            None => {
                return Err(anyhow::anyhow!(
                    "body must end with 'torch.prim.Loop.condition'"
                ))
            }
        };
        let operands = terminator_operands(&terminator);
        if operands.is_empty() || value_torch_type(&operands[0]) != Some(TorchType::Bool) {
            return Err(anyhow::anyhow!("condition must be !torch.bool"));
        }
        check_forwarded("condition", &operands[1..], &result_types)
    }
    fn canonicalize(&self) -> Result<RewriteResult> {
        if !self.is_zero_trip() {
            return Ok(RewriteResult::Unchanged);
        }
        let changed = RewriteResult::changed_around(self)?;
        let results = self.operation.rd().results();
        for (result, init) in results.into_iter().zip(self.inits()) {
            replace_all_uses_with(&result, &init);
        }
        self.remove()?;
        Ok(changed)
    }
    fn display(&self, f: &mut Formatter<'_>, indent: i32) -> std::fmt::Result {
        let operation = self.operation.rd();
        operation.display_results(f)?;
        let operands = operation.operands().values();
        let (header, inits) = operands.split_at(operands.len().min(2));
        write!(
            f,
            "{} {}, init({})",
            operation.name(),
            OpOperands::from_values(header),
            OpOperands::from_values(inits)
        )?;
        if let Some(region) = operation.region() {
            region.rd().display(f, indent)?;
        }
        let operand_types = operation.operand_types().map_err(|_| std::fmt::Error)?;
        let result_types = operation.result_types().map_err(|_| std::fmt::Error)?;
        write!(f, " : ({operand_types}) -> ({result_types})")
    }
}

impl Parse for PrimLoopOp {
    fn op<T: ParserDispatch>(
        parser: &mut Parser<T>,
        parent: Option<Shared<Block>>,
    ) -> Result<Shared<dyn Op>> {
        let mut operation = Operation::default();
        operation.set_parent(parent);
        let results = parser.parse_op_results_into(&mut operation)?;
        let values = results.values();
        parser.parse_operation_name_into::<PrimLoopOp>(&mut operation)?;
        let mut operands = vec![parser.parse_op_operand()?];
        parser.expect(TokenKind::Comma)?;
        operands.push(parser.parse_op_operand()?);
        parser.expect(TokenKind::Comma)?;
        parser.parse_keyword("init")?;
        parser.expect(TokenKind::LParen)?;
        let inits = parser.parse_op_operands()?;
        parser.expect(TokenKind::RParen)?;
        operands.extend(inits.vec().rd().iter().cloned());
        let operands = OpOperands::from_vec(operands);
        operation.set_operands(operands.clone());
        let op = finish_op::<PrimLoopOp>(operation, results);
        let region = parser.parse_region(op.clone())?;
        op.operation().wr().set_regions(vec![region]);
        parser.expect(TokenKind::Colon)?;
        let types = parser.parse_parenthesized_types()?;
        parser.verify_operand_types(&operands, &types)?;
        parser.expect(TokenKind::Arrow)?;
        let types = parser.parse_parenthesized_types()?;
        values.update_types(types.vec())?;
        Ok(op)
    }
}

/// `torch.prim.Loop.condition`
///
/// ```ebnf
/// `torch.prim.Loop.condition` $condition `,` `iter` `(` ($values `:` type($values))? `)`
/// ```
pub struct PrimLoopConditionOp {
    operation: Shared<Operation>,
}

impl Op for PrimLoopConditionOp {
    fn operation_name() -> OperationName {
        OperationName::new("torch.prim.Loop.condition".to_string())
    }
    fn new(operation: Shared<Operation>) -> Self {
        PrimLoopConditionOp { operation }
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn operation(&self) -> &Shared<Operation> {
        &self.operation
    }
    fn is_terminator(&self) -> bool {
        true
    }
    fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
        match self.parent_op() {
            Some(parent) if parent.is::<PrimLoopOp>() => Ok(()),
            _ => Err(anyhow::anyhow!("expects parent op 'torch.prim.Loop'")),
        }
    }
    fn display(&self, f: &mut Formatter<'_>, _indent: i32) -> std::fmt::Result {
        let operation = self.operation.rd();
        let operands = operation.operands().values();
        let (condition, values) = operands.split_at(operands.len().min(1));
        write!(
            f,
            "{} {}, iter(",
            operation.name(),
            OpOperands::from_values(condition)
        )?;
        if !values.is_empty() {
            let values = OpOperands::from_values(values);
            let types = values.types().map_err(|_| std::fmt::Error)?;
            write!(f, "{values} : {types}")?;
        }
        write!(f, ")")
    }
}

impl Parse for PrimLoopConditionOp {
    fn op<T: ParserDispatch>(
        parser: &mut Parser<T>,
        parent: Option<Shared<Block>>,
    ) -> Result<Shared<dyn Op>> {
        let mut operation = Operation::default();
        operation.set_parent(parent);
        let results = parser.parse_op_results_into(&mut operation)?;
        parser.parse_operation_name_into::<PrimLoopConditionOp>(&mut operation)?;
        let mut operands = vec![parser.parse_op_operand()?];
        parser.expect(TokenKind::Comma)?;
        parser.parse_keyword("iter")?;
        parser.expect(TokenKind::LParen)?;
        let values = parser.parse_op_operands()?;
        if !values.is_empty() {
            parser.expect(TokenKind::Colon)?;
            let types: Types = parser.parse_types()?;
            parser.verify_operand_types(&values, &types)?;
        }
        parser.expect(TokenKind::RParen)?;
        operands.extend(values.vec().rd().iter().cloned());
        operation.set_operands(OpOperands::from_vec(operands));
        Ok(finish_op::<PrimLoopConditionOp>(operation, results))
    }
}
