//! Conversion logic for the compiler.
//!
//! This module contains the rewrite driver and the passes that are built on
//! it: type refinement and the two lowerings out of the torch dialect, one
//! to loops over buffers and one to the fixed tosa operator catalog.

use crate::ir::spaces;
use crate::ir::Op;
use crate::shared::Shared;
use crate::shared::SharedExt;
use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

mod builder;
mod legalize;
mod refine_types;
mod torch_to_loops;
mod torch_to_tosa;

pub use builder::Builder;
pub use legalize::convert_signatures;
pub use legalize::ensure_legal;
pub use legalize::ensure_lowered;
pub use legalize::is_parameter_op;
pub use legalize::is_scalar_op;
pub use legalize::is_tensor_op;
pub use legalize::is_torch_op;
pub use legalize::lowered_type;
pub use legalize::static_tensor;
pub use legalize::QuantParams;
pub use legalize::QuantTable;
pub use refine_types::RefineTypes;
pub use torch_to_loops::convert_to_loops;
pub use torch_to_loops::ConvertTorchToLoops;
pub use torch_to_tosa::convert_to_tosa;
pub use torch_to_tosa::ConvertTorchToTosa;

/// The op from which the rewrite driver continues after a change.
pub struct ChangedOp(pub Shared<dyn Op>);

impl ChangedOp {
    pub fn new(op: Shared<dyn Op>) -> Self {
        ChangedOp(op)
    }
}

impl PartialEq for ChangedOp {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Whether a rewrite changed the IR.
///
/// If a rewrite changes the IR, it returns the changed operation. Returning
/// the changed operation is required for passes that change the top-level
/// operation.
#[derive(PartialEq)]
pub enum RewriteResult {
    Changed(ChangedOp),
    Unchanged,
}

impl RewriteResult {
    pub fn is_changed(&self) -> Option<&ChangedOp> {
        match self {
            RewriteResult::Changed(op) => Some(op),
            RewriteResult::Unchanged => None,
        }
    }
    /// Result for a rewrite that modifies the block around `op`.
    ///
    /// This has to be taken before `op` is removed since it needs the parent.
    pub fn changed_around(op: &dyn Op) -> Result<RewriteResult> {
        match op.parent_op() {
            Some(parent) => Ok(RewriteResult::Changed(ChangedOp::new(parent))),
            None => Err(anyhow::anyhow!("{} has no parent op", op.name())),
        }
    }
}

pub trait Rewrite {
    /// The name of the rewrite; is used for logging.
    fn name(&self) -> &'static str;
    /// Returns true if the rewrite can be applied to the given operation.
    ///
    /// This method is not allowed to mutate the IR.
    ///
    /// Note that this implementation usually will look like
    /// ```ignore
    /// Ok(op.as_any().is::<MyOp>())
    /// ```
    fn is_match(&self, op: &dyn Op) -> Result<bool>;
    /// Applies the rewrite to the given operation.
    ///
    /// This method is allowed to mutate the IR.
    fn rewrite(&self, op: Shared<dyn Op>) -> Result<RewriteResult>;
}

fn apply_rewrite(root: Shared<dyn Op>, rewrite: &dyn Rewrite, indent: i32) -> Result<RewriteResult> {
    let is_match = rewrite.is_match(&*root.rd())?;
    if is_match {
        debug!(
            "{}Matched {} with {}",
            spaces(indent),
            root.rd().name(),
            rewrite.name()
        );
        let root_rewrite = rewrite.rewrite(root.clone())?;
        if root_rewrite.is_changed().is_some() {
            debug!("{}--> Changed", spaces(indent));
            return Ok(root_rewrite);
        }
    }
    let ops = root.rd().ops();
    for nested in ops {
        let result = apply_rewrite(nested, rewrite, indent + 1)?;
        if result.is_changed().is_some() {
            let root_passthrough = ChangedOp::new(root.clone());
            return Ok(RewriteResult::Changed(root_passthrough));
        }
    }
    Ok(RewriteResult::Unchanged)
}

fn apply_rewrites_helper(root: Shared<dyn Op>, rewrites: &[&dyn Rewrite]) -> Result<RewriteResult> {
    for rewrite in rewrites {
        let result = apply_rewrite(root.clone(), *rewrite, 0)?;
        if result.is_changed().is_some() {
            return Ok(result);
        }
    }
    Ok(RewriteResult::Unchanged)
}

/// Apply `rewrites` until none of them matches anymore.
///
/// Each iteration walks the IR from `root` and applies the first rewrite
/// that changes something, so ops that are created by a rewrite are visited
/// again.
pub fn apply_rewrites(root: Shared<dyn Op>, rewrites: &[&dyn Rewrite]) -> Result<RewriteResult> {
    let max_iterations = 10240;
    let mut root = root;
    let mut has_changed = false;
    for _ in 0..max_iterations {
        let result = apply_rewrites_helper(root.clone(), rewrites)?;
        match result {
            RewriteResult::Changed(changed) => {
                has_changed = true;
                root = changed.0;
            }
            RewriteResult::Unchanged => {
                if has_changed {
                    let op = ChangedOp::new(root);
                    return Ok(RewriteResult::Changed(op));
                } else {
                    return Ok(result);
                }
            }
        }
    }
    tracing::warn!("Too many rewrite iterations");
    Ok(RewriteResult::Changed(ChangedOp::new(root)))
}

/// A pass is a transformation that can be applied to the IR.
pub trait Pass {
    const NAME: &'static str;
    fn convert(op: Shared<dyn Op>) -> Result<RewriteResult>;
}
