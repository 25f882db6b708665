use crate::frontend::Parse;
use crate::frontend::Parser;
use crate::frontend::ParserDispatch;
use crate::ir::Block;
use crate::ir::GuardedRegion;
use crate::ir::Op;
use crate::ir::Operation;
use crate::ir::OperationName;
use crate::ir::Region;
use crate::shared::Shared;
use crate::shared::SharedExt;
use anyhow::Result;
use std::fmt::Formatter;
use std::sync::RwLock;

/// Top-level container of a compilation unit.
pub struct ModuleOp {
    operation: Shared<Operation>,
}

impl Op for ModuleOp {
    fn operation_name() -> OperationName {
        OperationName::new("module".to_string())
    }
    fn new(operation: Shared<Operation>) -> Self {
        Self { operation }
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn operation(&self) -> &Shared<Operation> {
        &self.operation
    }
    fn display(&self, f: &mut Formatter<'_>, indent: i32) -> std::fmt::Result {
        write!(f, "module")?;
        match self.operation().rd().region() {
            Some(region) => region.rd().display(f, indent),
            None => write!(f, " {{\n}}"),
        }
    }
}

impl ModuleOp {
    /// Create an empty module with a single body block.
    pub fn empty() -> Shared<dyn Op> {
        let operation = Operation::default();
        let op: Shared<dyn Op> = Shared::new(RwLock::new(ModuleOp::from_operation(operation)));
        let region: Shared<Region> = Shared::new(Region::default().into());
        region.set_parent(Some(op.clone()));
        let block: Shared<Block> = Shared::new(Block::default().into());
        block.wr().set_parent(Some(region.clone()));
        region.wr().add_block(block);
        op.rd().operation().wr().set_regions(vec![region]);
        op
    }
    pub fn body(&self) -> Result<Shared<Block>> {
        let region = self.operation().rd().region();
        let block = region.and_then(|region| region.entry());
        match block {
            Some(block) => Ok(block),
            None => Err(anyhow::anyhow!("Expected module to have a body block")),
        }
    }
    pub fn first_op(&self) -> Result<Shared<dyn Op>> {
        let block = self.body()?;
        let first = block.rd().ops().rd().first().cloned();
        match first {
            Some(op) => Ok(op),
            None => Err(anyhow::anyhow!("Expected 1 op, got 0")),
        }
    }
}

impl Parse for ModuleOp {
    fn op<T: ParserDispatch>(
        parser: &mut Parser<T>,
        parent: Option<Shared<Block>>,
    ) -> Result<Shared<dyn Op>> {
        let mut operation = Operation::default();
        operation.set_parent(parent);
        parser.parse_operation_name_into::<ModuleOp>(&mut operation)?;
        let operation: Shared<Operation> = Shared::new(operation.into());
        let op: Shared<dyn Op> = Shared::new(RwLock::new(ModuleOp::from_operation_arc(
            operation.clone(),
        )));
        let region = parser.parse_region(op.clone())?;
        operation.wr().set_regions(vec![region]);
        Ok(op)
    }
}
