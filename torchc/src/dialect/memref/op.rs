use crate::frontend::finish_op;
use crate::frontend::Parse;
use crate::frontend::Parser;
use crate::frontend::ParserDispatch;
use crate::frontend::TokenKind;
use crate::ir::scalar_type;
use crate::ir::shaped_type;
use crate::ir::Block;
use crate::ir::Op;
use crate::ir::OpOperands;
use crate::ir::Operation;
use crate::ir::OperationName;
use crate::ir::ScalarType;
use crate::ir::ShapedKind;
use crate::ir::ShapedType;
use crate::ir::Type;
use crate::shared::Shared;
use crate::shared::SharedExt;
use crate::verify::SymbolTable;
use anyhow::Result;
use std::fmt::Formatter;

fn memref_type(typ: &Shared<dyn Type>) -> Result<ShapedType> {
    match shaped_type(typ) {
        Some(shaped) if shaped.kind() == ShapedKind::MemRef => Ok(shaped),
        _ => Err(anyhow::anyhow!("expected a memref, but got {}", typ.rd())),
    }
}

/// Check `memref[indices]` where the memref is operand `first`.
fn verify_access(operation: &Operation, first: usize) -> Result<ShapedType> {
    let types = operation.operand_types()?.vec();
    let memref = match types.get(first) {
        Some(memref) => memref_type(memref)?,
        None => return Err(anyhow::anyhow!("missing memref operand")),
    };
    let indices = &types[first + 1..];
    if indices.len() != memref.rank() {
        return Err(anyhow::anyhow!(
            "expected {} indices for {memref}, but got {}",
            memref.rank(),
            indices.len()
        ));
    }
    if indices
        .iter()
        .any(|typ| scalar_type(typ) != Some(ScalarType::Index))
    {
        return Err(anyhow::anyhow!("indices must be of type index"));
    }
    Ok(memref)
}

fn display_access(operation: &Operation, f: &mut Formatter<'_>, first: usize) -> std::fmt::Result {
    let operands = operation.operands().values();
    let name = |index: usize| {
        operands
            .get(index)
            .map(|value| value.rd().name().unwrap_or_default())
            .unwrap_or_default()
    };
    let indices = (first + 1..operands.len())
        .map(name)
        .collect::<Vec<String>>()
        .join(", ");
    let typ = operation
        .operand_types()
        .ok()
        .and_then(|types| types.get(first))
        .ok_or(std::fmt::Error)?;
    let typ = typ.rd().to_string();
    write!(f, "{}[{indices}] : {typ}", name(first))
}

/// Parse `%m[%i, %j] : memref<..>` and check the declared memref type.
fn parse_access<T: ParserDispatch>(parser: &mut Parser<T>) -> Result<OpOperands> {
    let mut operands = vec![parser.parse_op_operand()?];
    parser.expect(TokenKind::LBracket)?;
    while parser.check(TokenKind::PercentIdentifier) {
        operands.push(parser.parse_op_operand()?);
        if !parser.match_kinds(&[TokenKind::Comma]) {
            break;
        }
    }
    parser.expect(TokenKind::RBracket)?;
    parser.expect(TokenKind::Colon)?;
    let declared = parser.parse_type()?;
    let actual = operands[0].rd().typ()?;
    if actual.rd().to_string() != declared.rd().to_string() {
        let msg = format!(
            "Type mismatch: memref declared as {} but used as {}",
            actual.rd(),
            declared.rd()
        );
        return Err(anyhow::anyhow!(parser.error(parser.previous(), &msg)));
    }
    Ok(OpOperands::from_vec(operands))
}

/// `memref.alloc`
///
/// ```ebnf
/// `memref.alloc` `(` `)` `:` type($memref)
/// ```
pub struct AllocOp {
    operation: Shared<Operation>,
}

impl AllocOp {
    pub fn memref_type(&self) -> Result<ShapedType> {
        let typ = self.operation.rd().result_type(0);
        match typ {
            Some(typ) => memref_type(&typ),
            None => Err(anyhow::anyhow!("memref.alloc has no result")),
        }
    }
}

impl Op for AllocOp {
    fn operation_name() -> OperationName {
        OperationName::new("memref.alloc".to_string())
    }
    fn new(operation: Shared<Operation>) -> Self {
        AllocOp { operation }
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn operation(&self) -> &Shared<Operation> {
        &self.operation
    }
    fn is_pure(&self) -> bool {
        true
    }
    fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
        let memref = self.memref_type()?;
        if !memref.is_static() {
            return Err(anyhow::anyhow!("dynamic sizes are not supported: {memref}"));
        }
        Ok(())
    }
    fn display(&self, f: &mut Formatter<'_>, _indent: i32) -> std::fmt::Result {
        let operation = self.operation.rd();
        operation.display_results(f)?;
        let typ = operation.result_type(0).ok_or(std::fmt::Error)?;
        let typ = typ.rd().to_string();
        write!(f, "{}() : {typ}", operation.name())
    }
}

impl Parse for AllocOp {
    fn op<T: ParserDispatch>(
        parser: &mut Parser<T>,
        parent: Option<Shared<Block>>,
    ) -> Result<Shared<dyn Op>> {
        let mut operation = Operation::default();
        operation.set_parent(parent);
        let results = parser.parse_op_results_into(&mut operation)?;
        parser.parse_operation_name_into::<AllocOp>(&mut operation)?;
        parser.expect(TokenKind::LParen)?;
        parser.expect(TokenKind::RParen)?;
        parser.expect(TokenKind::Colon)?;
        let typ = parser.parse_type()?;
        results.set_types(vec![typ])?;
        Ok(finish_op::<AllocOp>(operation, results))
    }
}

/// `memref.load`
///
/// ```ebnf
/// `memref.load` $memref `[` $indices `]` `:` type($memref)
/// ```
///
/// The result has the element type of the memref.
pub struct LoadOp {
    operation: Shared<Operation>,
}

impl Op for LoadOp {
    fn operation_name() -> OperationName {
        OperationName::new("memref.load".to_string())
    }
    fn new(operation: Shared<Operation>) -> Self {
        LoadOp { operation }
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn operation(&self) -> &Shared<Operation> {
        &self.operation
    }
    fn is_pure(&self) -> bool {
        true
    }
    fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
        let operation = self.operation.rd();
        let memref = verify_access(&operation, 0)?;
        let result = operation.result_type(0);
        match result.as_ref().and_then(scalar_type) {
            Some(element) if element == memref.element() => Ok(()),
            _ => Err(anyhow::anyhow!(
                "result type must be the element type of {memref}"
            )),
        }
    }
    fn display(&self, f: &mut Formatter<'_>, _indent: i32) -> std::fmt::Result {
        let operation = self.operation.rd();
        operation.display_results(f)?;
        write!(f, "{} ", operation.name())?;
        display_access(&operation, f, 0)
    }
}

impl Parse for LoadOp {
    fn op<T: ParserDispatch>(
        parser: &mut Parser<T>,
        parent: Option<Shared<Block>>,
    ) -> Result<Shared<dyn Op>> {
        let mut operation = Operation::default();
        operation.set_parent(parent);
        let results = parser.parse_op_results_into(&mut operation)?;
        parser.parse_operation_name_into::<LoadOp>(&mut operation)?;
        let operands = parse_access(parser)?;
        let memref = memref_type(&operands.types()?.vec()[0])?;
        operation.set_operands(operands);
        results.set_types(vec![crate::ir::new_type(memref.element())])?;
        Ok(finish_op::<LoadOp>(operation, results))
    }
}

/// `memref.store`
///
/// ```ebnf
/// `memref.store` $value `,` $memref `[` $indices `]` `:` type($memref)
/// ```
pub struct StoreOp {
    operation: Shared<Operation>,
}

impl Op for StoreOp {
    fn operation_name() -> OperationName {
        OperationName::new("memref.store".to_string())
    }
    fn new(operation: Shared<Operation>) -> Self {
        StoreOp { operation }
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn operation(&self) -> &Shared<Operation> {
        &self.operation
    }
    fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
        let operation = self.operation.rd();
        let memref = verify_access(&operation, 1)?;
        let value = operation.operand_types()?.vec();
        match value.first().and_then(scalar_type) {
            Some(element) if element == memref.element() => Ok(()),
            _ => Err(anyhow::anyhow!(
                "stored value must have the element type of {memref}"
            )),
        }
    }
    fn display(&self, f: &mut Formatter<'_>, _indent: i32) -> std::fmt::Result {
        let operation = self.operation.rd();
        let value = operation.operand_value(0).ok_or(std::fmt::Error)?;
        let value = value.rd().name().unwrap_or_default();
        write!(f, "{} {value}, ", operation.name())?;
        display_access(&operation, f, 1)
    }
}

impl Parse for StoreOp {
    fn op<T: ParserDispatch>(
        parser: &mut Parser<T>,
        parent: Option<Shared<Block>>,
    ) -> Result<Shared<dyn Op>> {
        let mut operation = Operation::default();
        operation.set_parent(parent);
        let results = parser.parse_op_results_into(&mut operation)?;
        parser.parse_operation_name_into::<StoreOp>(&mut operation)?;
        let value = parser.parse_op_operand()?;
        parser.expect(TokenKind::Comma)?;
        let access = parse_access(parser)?;
        let mut operands = vec![value];
        operands.extend(access.vec().rd().iter().cloned());
        operation.set_operands(OpOperands::from_vec(operands));
        Ok(finish_op::<StoreOp>(operation, results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::DefaultParserDispatch;
    use indoc::indoc;

    #[test]
    fn test_memref_round_trip() {
        let src = indoc! {"
        module {
          func.func @f(%x : f32) -> memref<3x4xf32> {
            %c1 = arith.constant 1 : index
            %0 = memref.alloc() : memref<3x4xf32>
            memref.store %x, %0[%c1, %c1] : memref<3x4xf32>
            %1 = memref.load %0[%c1, %c1] : memref<3x4xf32>
            return %0 : memref<3x4xf32>
          }
        }"};
        let module = Parser::<DefaultParserDispatch>::parse(src).unwrap();
        assert_eq!(module.rd().to_string(), src);
    }

    #[test]
    fn test_load_rank_mismatch() {
        let src = indoc! {"
        func.func @f(%m : memref<3x4xf32>) -> f32 {
          %c1 = arith.constant 1 : index
          %0 = memref.load %m[%c1] : memref<3x4xf32>
          return %0 : f32
        }"};
        let module = Parser::<DefaultParserDispatch>::parse(src).unwrap();
        let diagnostics = crate::verify::verify(&module).unwrap_err();
        assert!(diagnostics.to_string().contains("expected 2 indices"));
    }
}
