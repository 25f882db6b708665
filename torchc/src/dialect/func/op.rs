use crate::dialect::torch::is_assignable;
use crate::frontend::Parse;
use crate::frontend::Parser;
use crate::frontend::ParserDispatch;
use crate::frontend::TokenKind;
use crate::ir::simple_op;
use crate::ir::Block;
use crate::ir::GuardedOp;
use crate::ir::Op;
use crate::ir::OpOperands;
use crate::ir::Operation;
use crate::ir::OperationName;
use crate::ir::StringAttr;
use crate::ir::SymbolAttr;
use crate::ir::Type;
use crate::ir::Types;
use crate::ir::Values;
use crate::shared::Shared;
use crate::shared::SharedExt;
use crate::verify::SymbolTable;
use anyhow::Result;
use std::fmt::Formatter;
use std::sync::Arc;
use std::sync::RwLock;

fn check_types(what: &str, actual: &[Shared<dyn Type>], expected: &[Shared<dyn Type>]) -> Result<()> {
    if actual.len() != expected.len() {
        return Err(anyhow::anyhow!(
            "{what}: expected {} values, but got {}",
            expected.len(),
            actual.len()
        ));
    }
    for (i, (actual, expected)) in actual.iter().zip(expected).enumerate() {
        if !is_assignable(actual, expected) {
            return Err(anyhow::anyhow!(
                "{what}: type of #{i} is {}, but {} is expected",
                actual.rd(),
                expected.rd()
            ));
        }
    }
    Ok(())
}

/// `func.func`
///
/// ```ebnf
/// `func.func` (`private`)? $sym_name `(` $arguments `)` (`->` type($results))? region
/// ```
///
/// The arguments of the function are the arguments of the entry block, but
/// the textual form writes them inline. The results are
/// [AnonymousResult](crate::ir::AnonymousResult)s that only hold the
/// signature.
pub struct FuncOp {
    operation: Shared<Operation>,
}

impl FuncOp {
    pub fn sym_name(&self) -> Option<String> {
        self.operation.rd().attributes().get_symbol("sym_name")
    }
    pub fn is_private(&self) -> bool {
        let visibility = self.operation.rd().attributes().get_str("sym_visibility");
        visibility.as_deref() == Some("private")
    }
    pub fn body(&self) -> Result<Shared<Block>> {
        let block = self.region().and_then(|region| region.rd().entry());
        match block {
            Some(block) => Ok(block),
            None => Err(anyhow::anyhow!("Expected function to have a body")),
        }
    }
    pub fn arguments(&self) -> Result<Values> {
        Ok(self.body()?.rd().arguments())
    }
    pub fn argument_types(&self) -> Result<Types> {
        self.arguments()?.types()
    }
    pub fn result_types(&self) -> Result<Types> {
        self.operation.rd().result_types()
    }
    /// Replace the signature. The argument values keep their identity so
    /// that uses inside the body stay valid.
    pub fn set_signature(
        &self,
        inputs: Vec<Shared<dyn Type>>,
        outputs: Vec<Shared<dyn Type>>,
    ) -> Result<()> {
        self.arguments()?.update_types(inputs)?;
        self.operation.wr().set_anonymous_results(outputs);
        Ok(())
    }
}

impl Op for FuncOp {
    fn operation_name() -> OperationName {
        OperationName::new("func.func".to_string())
    }
    fn new(operation: Shared<Operation>) -> Self {
        FuncOp { operation }
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn operation(&self) -> &Shared<Operation> {
        &self.operation
    }
    fn symbol_name(&self) -> Option<String> {
        self.sym_name()
    }
    fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
        let body = self.body()?;
        let terminator = body.rd().terminator();
        let terminator = match terminator {
            Some(terminator) if terminator.is::<ReturnOp>() => terminator,
            _ => return Err(anyhow::anyhow!("body must end with 'return'")),
        };
        let returned = terminator.rd().operation().rd().operand_types()?.vec();
        let expected = self.result_types()?.vec();
        check_types("return", &returned, &expected)
    }
    fn display(&self, f: &mut Formatter<'_>, indent: i32) -> std::fmt::Result {
        write!(f, "{} ", self.operation.rd().name())?;
        if self.is_private() {
            write!(f, "private ")?;
        }
        let name = self.sym_name().unwrap_or_default();
        let arguments = self.arguments().map_err(|_| std::fmt::Error)?;
        write!(f, "@{name}({arguments})")?;
        let results = self.result_types().map_err(|_| std::fmt::Error)?;
        if !results.is_empty() {
            write!(f, " -> ")?;
            results.display_results(f)?;
        }
        if let Some(region) = self.region() {
            region.rd().display(f, indent)?;
        }
        Ok(())
    }
}

impl Parse for FuncOp {
    fn op<T: ParserDispatch>(
        parser: &mut Parser<T>,
        parent: Option<Shared<Block>>,
    ) -> Result<Shared<dyn Op>> {
        let mut operation = Operation::default();
        operation.set_parent(parent);
        parser.parse_operation_name_into::<FuncOp>(&mut operation)?;
        let attributes = operation.attributes();
        if parser.check_keyword("private") {
            parser.advance();
            attributes.insert("sym_visibility", Arc::new(StringAttr::new("private")));
        }
        let name = parser.parse_symbol()?;
        attributes.insert("sym_name", Arc::new(SymbolAttr::new(&name)));
        let arguments = parser.parse_block_arguments()?;
        if parser.check(TokenKind::Arrow) {
            parser.advance();
            let types = parser.parse_result_types()?;
            operation.set_anonymous_results(types.vec());
        }
        let operation: Shared<Operation> = Shared::new(operation.into());
        let op: Shared<dyn Op> = Shared::new(RwLock::new(FuncOp::from_operation_arc(
            operation.clone(),
        )));
        let region = parser.parse_region_with_args(op.clone(), arguments)?;
        operation.wr().set_regions(vec![region]);
        Ok(op)
    }
}

simple_op!(
    /// `return`
    ///
    /// ```mlir
    /// return %0 : !torch.vtensor<[2],f32>
    /// ```
    ReturnOp,
    "return",
    {
        fn is_terminator(&self) -> bool {
            true
        }
        fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
            match self.parent_op() {
                Some(parent) if parent.is::<FuncOp>() => Ok(()),
                _ => Err(anyhow::anyhow!("expects parent op 'func.func'")),
            }
        }
    }
);

/// `func.call`
///
/// ```ebnf
/// `func.call` $callee `(` $operands `)` `:` `(` type($operands) `)` `->` type($results)
/// ```
pub struct CallOp {
    operation: Shared<Operation>,
}

impl CallOp {
    pub fn callee(&self) -> Option<String> {
        self.operation.rd().attributes().get_symbol("callee")
    }
}

impl Op for CallOp {
    fn operation_name() -> OperationName {
        OperationName::new("func.call".to_string())
    }
    fn new(operation: Shared<Operation>) -> Self {
        CallOp { operation }
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn operation(&self) -> &Shared<Operation> {
        &self.operation
    }
    fn verify(&self, symbols: &SymbolTable) -> Result<()> {
        let callee = match self.callee() {
            Some(callee) => callee,
            None => return Err(anyhow::anyhow!("missing callee")),
        };
        let signature = match symbols.function(&callee) {
            Some(signature) => signature,
            None => return Err(anyhow::anyhow!("unknown function @{callee}")),
        };
        let operation = self.operation.rd();
        check_types("arguments", &operation.operand_types()?.vec(), &signature.inputs)?;
        let results = operation.result_types()?.vec();
        check_types("results", &signature.outputs, &results)
    }
    fn display(&self, f: &mut Formatter<'_>, _indent: i32) -> std::fmt::Result {
        let operation = self.operation.rd();
        operation.display_results(f)?;
        let callee = self.callee().unwrap_or_default();
        let operand_types = operation.operand_types().map_err(|_| std::fmt::Error)?;
        let result_types = operation.result_types().map_err(|_| std::fmt::Error)?;
        write!(
            f,
            "{} @{callee}({}) : ({operand_types}) -> ",
            operation.name(),
            operation.operands()
        )?;
        result_types.display_results(f)
    }
}

impl Parse for CallOp {
    fn op<T: ParserDispatch>(
        parser: &mut Parser<T>,
        parent: Option<Shared<Block>>,
    ) -> Result<Shared<dyn Op>> {
        let mut operation = Operation::default();
        operation.set_parent(parent);
        let results = parser.parse_op_results_into(&mut operation)?;
        parser.parse_operation_name_into::<CallOp>(&mut operation)?;
        let callee = parser.parse_symbol()?;
        operation
            .attributes()
            .insert("callee", Arc::new(SymbolAttr::new(&callee)));
        parser.expect(TokenKind::LParen)?;
        let operands: OpOperands = parser.parse_op_operands()?;
        parser.expect(TokenKind::RParen)?;
        operation.set_operands(operands.clone());
        parser.expect(TokenKind::Colon)?;
        let types = parser.parse_parenthesized_types()?;
        parser.verify_operand_types(&operands, &types)?;
        parser.expect(TokenKind::Arrow)?;
        let types = parser.parse_result_types()?;
        results.set_types(types.vec())?;
        Ok(crate::frontend::finish_op::<CallOp>(operation, results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::DefaultParserDispatch;
    use crate::ir::ModuleOp;
    use indoc::indoc;

    #[test]
    fn test_func_round_trip() {
        let src = indoc! {"
        module {
          func.func private @id(%arg0 : !torch.int) -> !torch.int {
            return %arg0 : !torch.int
          }
          func.func @main(%x : !torch.int) -> (!torch.int, !torch.int) {
            %0 = func.call @id(%x) : (!torch.int) -> !torch.int
            return %0, %x : !torch.int, !torch.int
          }
        }"};
        let module = Parser::<DefaultParserDispatch>::parse(src).unwrap();
        assert_eq!(module.rd().to_string(), src);
        let module = module.rd();
        let module = module.as_any().downcast_ref::<ModuleOp>().unwrap();
        let id = module.first_op().unwrap();
        let id = id.rd();
        let id = id.as_any().downcast_ref::<FuncOp>().unwrap();
        assert!(id.is_private());
        assert_eq!(id.symbol_name().as_deref(), Some("id"));
        assert_eq!(id.argument_types().unwrap().to_string(), "!torch.int");
    }
}
