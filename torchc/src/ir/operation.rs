use crate::frontend::Location;
use crate::frontend::Parser;
use crate::frontend::ParserDispatch;
use crate::frontend::TokenKind;
use crate::ir::AnonymousResult;
use crate::ir::Attributes;
use crate::ir::Block;
use crate::ir::Op;
use crate::ir::OpOperand;
use crate::ir::OpOperands;
use crate::ir::Region;
use crate::ir::Type;
use crate::ir::Types;
use crate::ir::Value;
use crate::ir::Values;
use crate::shared::Shared;
use crate::shared::SharedExt;
use anyhow::Result;
use std::fmt::Display;
use std::fmt::Formatter;

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct OperationName {
    name: String,
}

impl OperationName {
    pub fn new(name: String) -> Self {
        Self { name }
    }
    pub fn name(&self) -> String {
        self.name.clone()
    }
    /// The dialect prefix, such as `torch` for `torch.aten.mm`.
    pub fn dialect(&self) -> &str {
        match self.name.split_once('.') {
            Some((dialect, _)) => dialect,
            None => "builtin",
        }
    }
}

impl Display for OperationName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.name.is_empty() {
            write!(f, "<unknown>")?;
        }
        write!(f, "{}", self.name)
    }
}

impl<T: ParserDispatch> Parser<T> {
    fn parse_operation_name(&mut self) -> Result<OperationName> {
        let identifier = self.expect(TokenKind::BareIdentifier)?;
        let name = OperationName::new(identifier.lexeme);
        Ok(name)
    }
    /// Parse the name of `O` and record it with its source location.
    pub fn parse_operation_name_into<O: Op>(
        &mut self,
        operation: &mut Operation,
    ) -> Result<OperationName> {
        let location = self.peek().location;
        let name = self.parse_operation_name()?;
        if name != O::operation_name() {
            let msg = format!("Expected {}, but got {}", O::operation_name(), name);
            return Err(anyhow::anyhow!(self.error(self.previous(), &msg)));
        }
        operation.set_name(name.clone());
        operation.set_location(Some(location));
        Ok(name)
    }
}

/// Note that MLIR distinguishes between Operation and Op.
/// Operation generically models all operations.
/// Op is an interface for more specific operations.
/// For example, `ConstantIntOp` does not take inputs and gives one output.
/// The specific ops do not specify fields apart from `operation` since
/// everything is accessed via a pointer to the `Operation`.
#[derive(Clone)]
pub struct Operation {
    name: OperationName,
    operands: OpOperands,
    attributes: Attributes,
    /// Either [OpResult](crate::ir::OpResult)s or, for function signatures,
    /// [AnonymousResult]s.
    results: Values,
    regions: Vec<Shared<Region>>,
    /// This is set after parsing because not all parents are known during
    /// parsing (for example, the parent of a top-level function will be a
    /// `ModuleOp` that may be created after parsing of the `FuncOp`).
    parent: Option<Shared<Block>>,
    location: Option<Location>,
}

impl Operation {
    pub fn name(&self) -> OperationName {
        self.name.clone()
    }
    pub fn operands(&self) -> OpOperands {
        self.operands.clone()
    }
    pub fn operand(&self, index: usize) -> Option<Shared<OpOperand>> {
        self.operands.get(index)
    }
    /// The value used by operand `index`.
    pub fn operand_value(&self, index: usize) -> Option<Shared<Value>> {
        self.operands.get(index).map(|operand| operand.rd().value())
    }
    pub fn operand_types(&self) -> Result<Types> {
        self.operands.types()
    }
    pub fn attributes(&self) -> Attributes {
        self.attributes.clone()
    }
    pub fn results(&self) -> Values {
        self.results.clone()
    }
    pub fn result(&self, index: usize) -> Option<Shared<Value>> {
        self.results.get(index)
    }
    pub fn result_types(&self) -> Result<Types> {
        self.results.types()
    }
    pub fn result_type(&self, index: usize) -> Option<Shared<dyn Type>> {
        self.results.get(index)?.rd().typ().ok()
    }
    pub fn regions(&self) -> Vec<Shared<Region>> {
        self.regions.clone()
    }
    pub fn region(&self) -> Option<Shared<Region>> {
        self.regions.first().cloned()
    }
    pub fn parent(&self) -> Option<Shared<Block>> {
        self.parent.clone()
    }
    pub fn parent_op(&self) -> Option<Shared<dyn Op>> {
        let parent = self.parent.clone()?;
        let region = parent.rd().parent()?;
        let op = region.rd().parent();
        op
    }
    pub fn location(&self) -> Option<Location> {
        self.location.clone()
    }
    pub fn set_name(&mut self, name: OperationName) {
        self.name = name;
    }
    pub fn set_operands(&mut self, operands: OpOperands) {
        self.operands = operands;
    }
    pub fn set_attributes(&mut self, attributes: Attributes) {
        self.attributes = attributes;
    }
    pub fn set_results(&mut self, results: Values) {
        self.results = results;
    }
    /// Set the results of a function signature to [AnonymousResult]s.
    pub fn set_anonymous_results(&mut self, result_types: Vec<Shared<dyn Type>>) {
        let results = result_types
            .into_iter()
            .map(|typ| Shared::new(Value::FuncResult(AnonymousResult::new(typ)).into()))
            .collect::<Vec<Shared<Value>>>();
        self.results = Values::from_vec(results);
    }
    pub fn set_regions(&mut self, regions: Vec<Shared<Region>>) {
        self.regions = regions;
    }
    pub fn set_parent(&mut self, parent: Option<Shared<Block>>) {
        self.parent = parent;
    }
    pub fn set_location(&mut self, location: Option<Location>) {
        self.location = location;
    }
    /// Display the results of the operation (e.g., `%0 = `).
    pub fn display_results(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if !self.results.is_empty() {
            write!(f, "{} = ", self.results)?;
        }
        Ok(())
    }
    /// Display ` : T_a, T_b -> T_r` or nothing when there are no types.
    pub fn display_signature(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let operand_types = self.operand_types().map_err(|_| std::fmt::Error)?;
        let result_types = self.result_types().map_err(|_| std::fmt::Error)?;
        if operand_types.is_empty() && result_types.is_empty() {
            return Ok(());
        }
        write!(f, " :")?;
        if !operand_types.is_empty() {
            write!(f, " {operand_types}")?;
        }
        if !result_types.is_empty() {
            write!(f, " -> ")?;
            result_types.display_results(f)?;
        }
        Ok(())
    }
    /// Generic form: `%r = name %a, %b {attr = v} : T_a, T_b -> T_r`.
    pub fn display(&self, f: &mut Formatter<'_>, indent: i32) -> std::fmt::Result {
        self.display_results(f)?;
        write!(f, "{}", self.name)?;
        if !self.operands.is_empty() {
            write!(f, " {}", self.operands)?;
        }
        write!(f, "{}", self.attributes)?;
        self.display_signature(f)?;
        for region in &self.regions {
            region.rd().display(f, indent)?;
        }
        Ok(())
    }
}

impl Default for Operation {
    fn default() -> Self {
        Self {
            name: OperationName::new("".to_string()),
            operands: OpOperands::default(),
            attributes: Attributes::new(),
            results: Values::default(),
            regions: vec![],
            parent: None,
            location: None,
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.display(f, 0)
    }
}

pub trait GuardedOperation {
    fn attributes(&self) -> Attributes;
    fn name(&self) -> OperationName;
    fn operands(&self) -> OpOperands;
    fn operand_value(&self, index: usize) -> Option<Shared<Value>>;
    fn parent(&self) -> Option<Shared<Block>>;
    fn regions(&self) -> Vec<Shared<Region>>;
    fn results(&self) -> Values;
    fn set_operands(&self, operands: OpOperands);
    fn set_parent(&self, parent: Option<Shared<Block>>);
    fn set_regions(&self, regions: Vec<Shared<Region>>);
}

impl GuardedOperation for Shared<Operation> {
    fn attributes(&self) -> Attributes {
        self.rd().attributes()
    }
    fn name(&self) -> OperationName {
        self.rd().name()
    }
    fn operands(&self) -> OpOperands {
        self.rd().operands()
    }
    fn operand_value(&self, index: usize) -> Option<Shared<Value>> {
        self.rd().operand_value(index)
    }
    fn parent(&self) -> Option<Shared<Block>> {
        self.rd().parent()
    }
    fn regions(&self) -> Vec<Shared<Region>> {
        self.rd().regions()
    }
    fn results(&self) -> Values {
        self.rd().results()
    }
    fn set_operands(&self, operands: OpOperands) {
        self.wr().set_operands(operands);
    }
    fn set_parent(&self, parent: Option<Shared<Block>>) {
        self.wr().set_parent(parent);
    }
    fn set_regions(&self, regions: Vec<Shared<Region>>) {
        self.wr().set_regions(regions);
    }
}
