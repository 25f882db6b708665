use crate::ir::Block;
use crate::ir::Op;
use crate::shared::Shared;
use crate::shared::SharedExt;
use std::fmt::Display;
use std::fmt::Formatter;

/// A list of blocks owned by an op, such as the body of a function or the
/// branches of an `if`.
pub struct Region {
    blocks: Vec<Shared<Block>>,
    parent: Option<Shared<dyn Op>>,
}

impl Region {
    pub fn new(blocks: Vec<Shared<Block>>, parent: Option<Shared<dyn Op>>) -> Self {
        Self { blocks, parent }
    }
    pub fn blocks(&self) -> Vec<Shared<Block>> {
        self.blocks.clone()
    }
    pub fn block(&self, index: usize) -> Option<Shared<Block>> {
        self.blocks.get(index).cloned()
    }
    /// The entry block.
    pub fn entry(&self) -> Option<Shared<Block>> {
        self.block(0)
    }
    pub fn parent(&self) -> Option<Shared<dyn Op>> {
        self.parent.clone()
    }
    pub fn ops(&self) -> Vec<Shared<dyn Op>> {
        let mut result = Vec::new();
        for block in self.blocks.iter() {
            let ops = block.rd().ops();
            let ops = ops.rd();
            result.extend(ops.iter().cloned());
        }
        result
    }
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
    pub fn set_blocks(&mut self, blocks: Vec<Shared<Block>>) {
        self.blocks = blocks;
    }
    pub fn add_block(&mut self, block: Shared<Block>) {
        self.blocks.push(block);
    }
    pub fn set_parent(&mut self, parent: Option<Shared<dyn Op>>) {
        self.parent = parent;
    }
    pub fn display(&self, f: &mut Formatter<'_>, indent: i32) -> std::fmt::Result {
        writeln!(f, " {{")?;
        for block in self.blocks.iter() {
            block.rd().display(f, indent + 1)?;
        }
        let spaces = crate::ir::spaces(indent);
        write!(f, "{spaces}}}")
    }
}

impl Display for Region {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.display(f, 0)
    }
}

impl Default for Region {
    fn default() -> Self {
        Self {
            blocks: vec![],
            parent: None,
        }
    }
}

pub trait GuardedRegion {
    fn blocks(&self) -> Vec<Shared<Block>>;
    fn entry(&self) -> Option<Shared<Block>>;
    fn ops(&self) -> Vec<Shared<dyn Op>>;
    fn set_parent(&self, parent: Option<Shared<dyn Op>>);
}

impl GuardedRegion for Shared<Region> {
    fn blocks(&self) -> Vec<Shared<Block>> {
        self.rd().blocks()
    }
    fn entry(&self) -> Option<Shared<Block>> {
        self.rd().entry()
    }
    fn ops(&self) -> Vec<Shared<dyn Op>> {
        self.rd().ops()
    }
    fn set_parent(&self, parent: Option<Shared<dyn Op>>) {
        self.wr().set_parent(parent);
    }
}
