use crate::ir::GuardedOp;
use crate::ir::Op;
use crate::ir::Operation;
use crate::ir::Region;
use crate::ir::Value;
use crate::ir::Values;
use crate::shared::Shared;
use crate::shared::SharedExt;
use anyhow::Result;
use std::fmt::Display;
use std::fmt::Formatter;
use std::sync::Arc;

/// A list of operations with optional arguments.
///
/// Blocks nested inside `torch.prim.Loop` or `scf.for` receive the induction
/// variable and loop-carried values as arguments.
pub struct Block {
    /// Label such as `^bb0`; function entry blocks have none.
    label: Option<String>,
    arguments: Values,
    ops: Shared<Vec<Shared<dyn Op>>>,
    parent: Option<Shared<Region>>,
}

impl Block {
    pub fn new(
        label: Option<String>,
        arguments: Values,
        ops: Shared<Vec<Shared<dyn Op>>>,
        parent: Option<Shared<Region>>,
    ) -> Self {
        Self {
            label,
            arguments,
            ops,
            parent,
        }
    }
    pub fn label(&self) -> Option<String> {
        self.label.clone()
    }
    pub fn set_label(&mut self, label: Option<String>) {
        self.label = label;
    }
    pub fn arguments(&self) -> Values {
        self.arguments.clone()
    }
    pub fn set_arguments(&mut self, arguments: Values) {
        self.arguments = arguments;
    }
    pub fn ops(&self) -> Shared<Vec<Shared<dyn Op>>> {
        self.ops.clone()
    }
    pub fn set_ops(&mut self, ops: Shared<Vec<Shared<dyn Op>>>) {
        self.ops = ops;
    }
    pub fn parent(&self) -> Option<Shared<Region>> {
        self.parent.clone()
    }
    pub fn set_parent(&mut self, parent: Option<Shared<Region>>) {
        self.parent = parent;
    }
    /// The last op of the block, which is the terminator for non-empty blocks.
    pub fn terminator(&self) -> Option<Shared<dyn Op>> {
        self.ops.rd().last().cloned()
    }
    pub fn index_of(&self, op: &Shared<Operation>) -> Option<usize> {
        let ops = self.ops.rd();
        ops.iter()
            .position(|current| Arc::ptr_eq(current.rd().operation(), op))
    }
    fn expect_index(&self, op: &Shared<Operation>, action: &str) -> Result<usize> {
        match self.index_of(op) {
            Some(index) => Ok(index),
            None => Err(anyhow::anyhow!(
                "could not find {} in its parent block during {action}",
                op.rd().name()
            )),
        }
    }
    pub fn insert_op(&self, op: Shared<dyn Op>, index: usize) {
        self.ops.wr().insert(index, op);
    }
    pub fn push_op(&self, op: Shared<dyn Op>) {
        self.ops.wr().push(op);
    }
    pub fn insert_after(&self, earlier: &Shared<Operation>, later: Shared<dyn Op>) -> Result<()> {
        let index = self.expect_index(earlier, "insert_after")?;
        self.insert_op(later, index + 1);
        Ok(())
    }
    pub fn insert_before(&self, earlier: Shared<dyn Op>, later: &Shared<Operation>) -> Result<()> {
        let index = self.expect_index(later, "insert_before")?;
        self.insert_op(earlier, index);
        Ok(())
    }
    pub fn replace(&self, old: &Shared<Operation>, new: Shared<dyn Op>) -> Result<()> {
        let index = self.expect_index(old, "replace")?;
        self.ops.wr()[index] = new;
        Ok(())
    }
    pub fn remove(&self, op: &Shared<Operation>) -> Result<()> {
        let index = self.expect_index(op, "remove")?;
        self.ops.wr().remove(index);
        Ok(())
    }
    /// Ops following `op` in this block.
    pub fn successors(&self, op: &Shared<Operation>) -> Vec<Shared<dyn Op>> {
        match self.index_of(op) {
            Some(index) => self.ops.rd()[index + 1..].to_vec(),
            None => vec![],
        }
    }
    fn display_header(&self, f: &mut Formatter<'_>, indent: i32) -> std::fmt::Result {
        let label = match &self.label {
            Some(label) => label,
            None => return Ok(()),
        };
        let spaces = crate::ir::spaces(indent - 1);
        write!(f, "{spaces}{label}")?;
        if !self.arguments.is_empty() {
            let arguments = self
                .arguments
                .clone()
                .into_iter()
                .map(|arg| match &*arg.rd() {
                    Value::BlockArgument(arg) => {
                        let name = arg.name().unwrap_or_default();
                        format!("{name}: {}", arg.typ().rd())
                    }
                    other => other.to_string(),
                })
                .collect::<Vec<String>>()
                .join(", ");
            write!(f, "({arguments})")?;
        }
        writeln!(f, ":")
    }
    pub fn display(&self, f: &mut Formatter<'_>, indent: i32) -> std::fmt::Result {
        self.display_header(f, indent)?;
        let ops = self.ops.rd();
        for op in ops.iter() {
            let spaces = crate::ir::spaces(indent);
            write!(f, "{spaces}")?;
            op.rd().display(f, indent)?;
            writeln!(f)?;
        }
        Ok(())
    }
}

impl Default for Block {
    fn default() -> Self {
        let ops = Shared::new(vec![].into());
        Self::new(None, Values::default(), ops, None)
    }
}

impl Display for Block {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.display(f, 0)
    }
}

pub trait GuardedBlock {
    fn arguments(&self) -> Values;
    fn index_of(&self, op: &Shared<Operation>) -> Option<usize>;
    fn ops(&self) -> Vec<Shared<dyn Op>>;
    fn parent(&self) -> Option<Shared<Region>>;
    /// Append `op` and make `self` its parent.
    fn append(&self, op: Shared<dyn Op>);
}

impl GuardedBlock for Shared<Block> {
    fn arguments(&self) -> Values {
        self.rd().arguments()
    }
    fn index_of(&self, op: &Shared<Operation>) -> Option<usize> {
        self.rd().index_of(op)
    }
    fn ops(&self) -> Vec<Shared<dyn Op>> {
        self.rd().ops().rd().clone()
    }
    fn parent(&self) -> Option<Shared<Region>> {
        self.rd().parent()
    }
    fn append(&self, op: Shared<dyn Op>) {
        op.set_parent(self.clone());
        self.rd().push_op(op);
    }
}
