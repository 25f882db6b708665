use crate::frontend::finish_op;
use crate::frontend::Parse;
use crate::frontend::Parser;
use crate::frontend::ParserDispatch;
use crate::frontend::TokenKind;
use crate::ir::new_type;
use crate::ir::same_type;
use crate::ir::scalar_type;
use crate::ir::simple_op;
use crate::ir::Block;
use crate::ir::BlockArgument;
use crate::ir::GuardedOp;
use crate::ir::Op;
use crate::ir::OpOperands;
use crate::ir::Operation;
use crate::ir::OperationName;
use crate::ir::Region;
use crate::ir::ScalarType;
use crate::ir::Type;
use crate::ir::Value;
use crate::ir::Values;
use crate::shared::Shared;
use crate::shared::SharedExt;
use crate::verify::SymbolTable;
use anyhow::Result;
use std::fmt::Formatter;

fn yielded_types(region: &Shared<Region>) -> Result<Vec<Shared<dyn Type>>> {
    let block = region.rd().entry();
    let terminator = block.and_then(|block| block.rd().terminator());
    match terminator {
        Some(terminator) if terminator.is::<YieldOp>() => {
            Ok(terminator.rd().operation().rd().operand_types()?.vec())
        }
        _ => Err(anyhow::anyhow!("region must end with 'scf.yield'")),
    }
}

fn check_same_types(what: &str, actual: &[Shared<dyn Type>], expected: &[Shared<dyn Type>]) -> Result<()> {
    let matches = actual.len() == expected.len()
        && actual.iter().zip(expected).all(|(a, b)| same_type(a, b));
    if matches {
        Ok(())
    } else {
        let show = |types: &[Shared<dyn Type>]| {
            types
                .iter()
                .map(|typ| typ.rd().to_string())
                .collect::<Vec<String>>()
                .join(", ")
        };
        Err(anyhow::anyhow!(
            "{what} types ({}) do not match ({})",
            show(actual),
            show(expected)
        ))
    }
}

/// A region with one empty block.
pub fn empty_region(parent: Shared<dyn Op>, arguments: Values) -> Shared<Region> {
    let region: Shared<Region> = Shared::new(Region::new(vec![], Some(parent)).into());
    let ops = Shared::new(vec![].into());
    let block = Block::new(None, arguments.clone(), ops, Some(region.clone()));
    let block: Shared<Block> = Shared::new(block.into());
    arguments.set_parent(block.clone());
    region.wr().add_block(block);
    region
}

/// `scf.for`
///
/// ```ebnf
/// `scf.for` $iv `=` $lb `to` $ub `step` $step
///     (`iter_args` `(` ($arg `=` $init)* `)` `->` `(` type($results) `)`)? region
/// ```
///
/// The body receives the induction variable and the loop-carried values
/// and ends with `scf.yield` of the next loop-carried values.
///
/// ```mlir
/// %0 = scf.for %i = %c0 to %c4 step %c1 iter_args(%acc = %init) -> (f32) {
///   %1 = arith.addf %acc, %acc : f32, f32 -> f32
///   scf.yield %1 : f32
/// }
/// ```
pub struct ForOp {
    operation: Shared<Operation>,
}

impl ForOp {
    pub fn body(&self) -> Result<Shared<Block>> {
        let block = self.region().and_then(|region| region.rd().entry());
        match block {
            Some(block) => Ok(block),
            None => Err(anyhow::anyhow!("Expected scf.for to have a body")),
        }
    }
    pub fn induction_variable(&self) -> Result<Shared<Value>> {
        match self.body()?.rd().arguments().get(0) {
            Some(iv) => Ok(iv),
            None => Err(anyhow::anyhow!("Expected scf.for to have an induction variable")),
        }
    }
    /// Block arguments for the loop-carried values.
    pub fn region_iter_args(&self) -> Result<Vec<Shared<Value>>> {
        let arguments = self.body()?.rd().arguments();
        Ok(arguments.into_iter().skip(1).collect())
    }
    pub fn inits(&self) -> Vec<Shared<Value>> {
        let operands = self.operation.rd().operands().values();
        operands.into_iter().skip(3).collect()
    }
}

impl Op for ForOp {
    fn operation_name() -> OperationName {
        OperationName::new("scf.for".to_string())
    }
    fn new(operation: Shared<Operation>) -> Self {
        ForOp { operation }
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn operation(&self) -> &Shared<Operation> {
        &self.operation
    }
    fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
        let operation = self.operation.rd();
        let operand_types = operation.operand_types()?.vec();
        if operand_types.len() < 3 {
            return Err(anyhow::anyhow!("expected lower bound, upper bound and step"));
        }
        if operand_types[..3]
            .iter()
            .any(|typ| scalar_type(typ) != Some(ScalarType::Index))
        {
            return Err(anyhow::anyhow!("bounds and step must be of type index"));
        }
        let results = operation.result_types()?.vec();
        check_same_types("iter_args", &operand_types[3..], &results)?;
        let body = self.body()?;
        let arguments = body.rd().arguments().types()?.vec();
        if arguments.is_empty() || scalar_type(&arguments[0]) != Some(ScalarType::Index) {
            return Err(anyhow::anyhow!("induction variable must be of type index"));
        }
        check_same_types("region argument", &arguments[1..], &results)?;
        let region = self.region().ok_or_else(|| anyhow::anyhow!("missing body"))?;
        check_same_types("yield", &yielded_types(&region)?, &results)
    }
    fn display(&self, f: &mut Formatter<'_>, indent: i32) -> std::fmt::Result {
        let operation = self.operation.rd();
        operation.display_results(f)?;
        let operands = operation.operands().values();
        if operands.len() < 3 {
            return Err(std::fmt::Error);
        }
        let iv = self.induction_variable().map_err(|_| std::fmt::Error)?;
        let iv = iv.rd().name().unwrap_or_default();
        let name = |value: &Shared<Value>| value.rd().name().unwrap_or_default();
        write!(
            f,
            "{} {iv} = {} to {} step {}",
            operation.name(),
            name(&operands[0]),
            name(&operands[1]),
            name(&operands[2])
        )?;
        let iter_args = self.region_iter_args().map_err(|_| std::fmt::Error)?;
        if !iter_args.is_empty() {
            let pairs = iter_args
                .iter()
                .zip(&operands[3..])
                .map(|(arg, init)| format!("{} = {}", name(arg), name(init)))
                .collect::<Vec<String>>()
                .join(", ");
            let types = operation.result_types().map_err(|_| std::fmt::Error)?;
            write!(f, " iter_args({pairs}) -> ({types})")?;
        }
        if let Some(region) = operation.region() {
            region.rd().display(f, indent)?;
        }
        Ok(())
    }
}

impl Parse for ForOp {
    fn op<T: ParserDispatch>(
        parser: &mut Parser<T>,
        parent: Option<Shared<Block>>,
    ) -> Result<Shared<dyn Op>> {
        let mut operation = Operation::default();
        operation.set_parent(parent);
        let results = parser.parse_op_results_into(&mut operation)?;
        parser.parse_operation_name_into::<ForOp>(&mut operation)?;
        let iv = parser.expect(TokenKind::PercentIdentifier)?;
        parser.expect(TokenKind::Equal)?;
        let mut operands = vec![parser.parse_op_operand()?];
        parser.parse_keyword("to")?;
        operands.push(parser.parse_op_operand()?);
        parser.parse_keyword("step")?;
        operands.push(parser.parse_op_operand()?);
        let index = new_type(ScalarType::Index);
        let mut arguments = vec![BlockArgument::new(Some(iv.lexeme.clone()), index)];
        let mut names = vec![];
        if parser.check_keyword("iter_args") {
            parser.advance();
            parser.expect(TokenKind::LParen)?;
            while parser.check(TokenKind::PercentIdentifier) {
                names.push(parser.advance().lexeme.clone());
                parser.expect(TokenKind::Equal)?;
                operands.push(parser.parse_op_operand()?);
                if !parser.match_kinds(&[TokenKind::Comma]) {
                    break;
                }
            }
            parser.expect(TokenKind::RParen)?;
            parser.expect(TokenKind::Arrow)?;
            let types = parser.parse_result_types()?;
            if types.len() != names.len() {
                let msg = parser.error(parser.previous(), "Expected a type per iter_arg");
                return Err(anyhow::anyhow!(msg));
            }
            for (name, typ) in names.iter().zip(types.vec()) {
                arguments.push(BlockArgument::new(Some(name.clone()), typ));
            }
            results.set_types(types.vec())?;
        }
        let operands = OpOperands::from_vec(operands);
        let init_types = operands.types()?.vec();
        let declared = arguments[1..]
            .iter()
            .map(|arg| arg.typ())
            .collect::<Vec<Shared<dyn Type>>>();
        check_same_types("iter_args", &init_types[3..], &declared)?;
        operation.set_operands(operands);
        let arguments = arguments
            .into_iter()
            .map(|arg| Shared::new(Value::BlockArgument(arg).into()))
            .collect::<Vec<Shared<Value>>>();
        let op = finish_op::<ForOp>(operation, results);
        let region = parser.parse_region_with_args(op.clone(), Values::from_vec(arguments))?;
        op.operation().wr().set_regions(vec![region]);
        Ok(op)
    }
}

/// `scf.if`
///
/// ```ebnf
/// `scf.if` $condition (`->` `(` type($results) `)`)? region (`else` region)?
/// ```
///
/// The else region is omitted from the output when it is empty and the op
/// has no results.
pub struct IfOp {
    operation: Shared<Operation>,
}

impl IfOp {
    pub fn then_region(&self) -> Option<Shared<Region>> {
        self.regions().first().cloned()
    }
    pub fn else_region(&self) -> Option<Shared<Region>> {
        self.regions().get(1).cloned()
    }
}

impl Op for IfOp {
    fn operation_name() -> OperationName {
        OperationName::new("scf.if".to_string())
    }
    fn new(operation: Shared<Operation>) -> Self {
        IfOp { operation }
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn operation(&self) -> &Shared<Operation> {
        &self.operation
    }
    fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
        let operation = self.operation.rd();
        let condition = operation.operand_types()?.vec();
        if condition.len() != 1 || scalar_type(&condition[0]) != Some(ScalarType::I1) {
            return Err(anyhow::anyhow!("condition must be a single i1"));
        }
        let regions = operation.regions();
        if regions.len() != 2 {
            return Err(anyhow::anyhow!("requires a then and an else region"));
        }
        let results = operation.result_types()?.vec();
        for region in &regions {
            let is_empty = region.rd().ops().is_empty();
            if is_empty && results.is_empty() {
                continue;
            }
            check_same_types("yield", &yielded_types(region)?, &results)?;
        }
        Ok(())
    }
    fn display(&self, f: &mut Formatter<'_>, indent: i32) -> std::fmt::Result {
        let operation = self.operation.rd();
        operation.display_results(f)?;
        write!(f, "{} {}", operation.name(), operation.operands())?;
        let results = operation.result_types().map_err(|_| std::fmt::Error)?;
        if !results.is_empty() {
            write!(f, " -> ({results})")?;
        }
        let regions = operation.regions();
        if let Some(then) = regions.first() {
            then.rd().display(f, indent)?;
        }
        if let Some(otherwise) = regions.get(1) {
            let omit = results.is_empty() && otherwise.rd().ops().is_empty();
            if !omit {
                write!(f, " else")?;
                otherwise.rd().display(f, indent)?;
            }
        }
        Ok(())
    }
}

impl Parse for IfOp {
    fn op<T: ParserDispatch>(
        parser: &mut Parser<T>,
        parent: Option<Shared<Block>>,
    ) -> Result<Shared<dyn Op>> {
        let mut operation = Operation::default();
        operation.set_parent(parent);
        let results = parser.parse_op_results_into(&mut operation)?;
        parser.parse_operation_name_into::<IfOp>(&mut operation)?;
        let condition = parser.parse_op_operand()?;
        operation.set_operands(OpOperands::from_vec(vec![condition]));
        if parser.check(TokenKind::Arrow) {
            parser.advance();
            let types = parser.parse_parenthesized_types()?;
            results.set_types(types.vec())?;
        }
        let op = finish_op::<IfOp>(operation, results);
        let then = parser.parse_region(op.clone())?;
        let otherwise = if parser.check_keyword("else") {
            parser.advance();
            parser.parse_region(op.clone())?
        } else {
            empty_region(op.clone(), Values::default())
        };
        op.operation().wr().set_regions(vec![then, otherwise]);
        Ok(op)
    }
}

simple_op!(
    /// `scf.yield`
    ///
    /// ```mlir
    /// scf.yield %0 : f32
    /// ```
    YieldOp,
    "scf.yield",
    {
        fn is_terminator(&self) -> bool {
            true
        }
        fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
            match self.parent_op() {
                Some(parent) if parent.is::<ForOp>() || parent.is::<IfOp>() => Ok(()),
                _ => Err(anyhow::anyhow!("expects parent op 'scf.for' or 'scf.if'")),
            }
        }
    }
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::DefaultParserDispatch;
    use indoc::indoc;

    #[test]
    fn test_for_and_if_round_trip() {
        let src = indoc! {r#"
        module {
          func.func @f(%x : f32, %c : i1) -> f32 {
            %c0 = arith.constant 0 : index
            %c1 = arith.constant 1 : index
            %c4 = arith.constant 4 : index
            %0 = scf.for %i = %c0 to %c4 step %c1 iter_args(%acc = %x) -> (f32) {
              %1 = arith.addf %acc, %x : f32, f32 -> f32
              scf.yield %1 : f32
            }
            %2 = scf.if %c -> (f32) {
              scf.yield %0 : f32
            } else {
              scf.yield %x : f32
            }
            scf.for %j = %c0 to %c4 step %c1 {
              scf.yield
            }
            return %2 : f32
          }
        }"#};
        let module = Parser::<DefaultParserDispatch>::parse(src).unwrap();
        assert_eq!(module.rd().to_string(), src);
    }
}
