use crate::convert::RewriteResult;
use crate::ir::Attribute;
use crate::ir::Block;
use crate::ir::Literal;
use crate::ir::Operation;
use crate::ir::OperationName;
use crate::ir::Region;
use crate::ir::Type;
use crate::ir::Users;
use crate::ir::Value;
use crate::shared::Shared;
use crate::shared::SharedExt;
use crate::verify::SymbolTable;
use anyhow::Result;
use std::fmt::Display;
use std::fmt::Formatter;
use std::sync::Arc;

/// This is the trait that is implemented by all operations.
///
/// The parser reads the tokens into an [Operation] and wraps it into the
/// specific op type (such as `PrimIfOp`) that knows how to print, verify,
/// fold, and canonicalize it.
pub trait Op {
    fn operation_name() -> OperationName
    where
        Self: Sized;
    /// Create a new [Op] from an [Operation].
    ///
    /// This method has to be implemented by all ops. Do not call it directly,
    /// but rather use [Self::from_operation] which also sets the name.
    fn new(operation: Shared<Operation>) -> Self
    where
        Self: Sized;
    /// Create an [Op] from a shared [Operation] and set the operation name.
    fn from_operation_arc(operation: Shared<Operation>) -> Self
    where
        Self: Sized,
    {
        operation.wr().set_name(Self::operation_name());
        Self::new(operation)
    }
    fn from_operation(operation: Operation) -> Self
    where
        Self: Sized,
    {
        Self::from_operation_arc(Shared::new(operation.into()))
    }
    fn as_any(&self) -> &dyn std::any::Any;
    fn operation(&self) -> &Shared<Operation>;
    /// Returns the name of the operation.
    /// This is a convenience method for `self.operation().name()`.
    /// Unlike `self.operation_name()`, this method is available on a `dyn Op`.
    fn name(&self) -> OperationName {
        self.operation().rd().name()
    }
    fn regions(&self) -> Vec<Shared<Region>> {
        self.operation().rd().regions()
    }
    fn region(&self) -> Option<Shared<Region>> {
        self.operation().rd().region()
    }
    fn canonicalize(&self) -> Result<RewriteResult> {
        Ok(RewriteResult::Unchanged)
    }
    /// Return the constant value of the single result, if known.
    fn fold(&self) -> Option<Literal> {
        None
    }
    /// Check op-local invariants.
    ///
    /// Structural checks (terminators, value visibility) are done by the
    /// verifier before this is called.
    fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
        Ok(())
    }
    /// Result types computed from the operand types.
    ///
    /// Returns `None` when nothing can be inferred.
    fn infer_result_types(&self) -> Result<Option<Vec<Shared<dyn Type>>>> {
        Ok(None)
    }
    /// Whether the result types may be replaced by more precise subtypes and
    /// whether this op accepts refined operand types.
    fn allows_type_refinement(&self) -> bool {
        false
    }
    /// Name under which the op is registered in the symbol table.
    fn symbol_name(&self) -> Option<String> {
        None
    }
    fn is_terminator(&self) -> bool {
        false
    }
    fn is_const(&self) -> bool {
        false
    }
    /// Whether the op has no side effects, so that it can be removed when
    /// its results are unused.
    fn is_pure(&self) -> bool {
        false
    }
    fn attribute(&self, key: &str) -> Option<Arc<dyn Attribute>> {
        self.operation().rd().attributes().get(key)
    }
    /// Insert `earlier` before `self` inside `self`'s parent block.
    fn insert_before(&self, earlier: Shared<dyn Op>) -> Result<()> {
        let block = self.parent_block()?;
        earlier.set_parent(block.clone());
        let block = block.rd();
        block.insert_before(earlier, self.operation())
    }
    /// Insert `later` after `self` inside `self`'s parent block.
    fn insert_after(&self, later: Shared<dyn Op>) -> Result<()> {
        let block = self.parent_block()?;
        later.set_parent(block.clone());
        let block = block.rd();
        block.insert_after(self.operation(), later)
    }
    /// Remove the operation from its parent block.
    fn remove(&self) -> Result<()> {
        let block = self.parent_block()?;
        let block = block.rd();
        block.remove(self.operation())
    }
    /// Replace self with `new` by moving the results of the old operation to
    /// the new op and pointing the `defining_op` of the results to the new op.
    /// In effect, this makes all the uses of the old op refer to the new op.
    fn replace(&self, new: Shared<dyn Op>) -> Result<()> {
        let results = self.operation().rd().results();
        results.set_defining_op(new.clone());
        new.rd().operation().wr().set_results(results);
        let parent = self.operation().rd().parent();
        if let Some(parent) = parent {
            new.set_parent(parent.clone());
            parent.rd().replace(self.operation(), new)?;
        }
        Ok(())
    }
    /// Return ops that are children of this op (inside blocks that are inside
    /// the regions).
    fn ops(&self) -> Vec<Shared<dyn Op>> {
        let mut result = Vec::new();
        for region in self.regions() {
            result.extend(region.rd().ops());
        }
        result
    }
    fn parent_op(&self) -> Option<Shared<dyn Op>> {
        self.operation().rd().parent_op()
    }
    fn parent_block(&self) -> Result<Shared<Block>> {
        let parent = self.operation().rd().parent();
        match parent {
            Some(parent) => Ok(parent),
            None => Err(anyhow::anyhow!("{} has no parent block", self.name())),
        }
    }
    fn set_parent(&self, parent: Shared<Block>) {
        self.operation().wr().set_parent(Some(parent));
    }
    /// Return the result at the given index.
    fn result(&self, index: usize) -> Result<Shared<Value>> {
        let result = self.operation().rd().result(index);
        match result {
            Some(result) => Ok(result),
            None => Err(anyhow::anyhow!("{} has no result {index}", self.name())),
        }
    }
    /// Return the value of the operand at the given index.
    fn operand(&self, index: usize) -> Result<Shared<Value>> {
        let value = self.operation().rd().operand_value(index);
        match value {
            Some(value) => Ok(value),
            None => Err(anyhow::anyhow!("{} has no operand {index}", self.name())),
        }
    }
    fn users(&self) -> Users {
        crate::ir::users(self.operation())
    }
    /// Source location for diagnostics.
    fn location(&self) -> String {
        match self.operation().rd().location() {
            Some(location) => location.to_string(),
            None => "loc(unknown)".to_string(),
        }
    }
    /// Display the operation with the given indentation.
    ///
    /// This method is usually called on a top-level op via `Display::fmt`,
    /// which then calls `display` with `indent` 0. Nested regions increase
    /// the indentation level. The caller writes the leading indentation.
    fn display(&self, f: &mut Formatter<'_>, indent: i32) -> std::fmt::Result {
        self.operation().rd().display(f, indent)
    }
}

impl Display for dyn Op {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.display(f, 0)
    }
}

pub trait GuardedOp {
    fn is<O: Op + 'static>(&self) -> bool;
    fn name(&self) -> OperationName;
    fn operation(&self) -> Shared<Operation>;
    fn ops(&self) -> Vec<Shared<dyn Op>>;
    fn parent_op(&self) -> Option<Shared<dyn Op>>;
    fn set_parent(&self, parent: Shared<Block>);
}

impl GuardedOp for Shared<dyn Op> {
    fn is<O: Op + 'static>(&self) -> bool {
        self.rd().as_any().is::<O>()
    }
    fn name(&self) -> OperationName {
        self.rd().name()
    }
    fn operation(&self) -> Shared<Operation> {
        self.rd().operation().clone()
    }
    fn ops(&self) -> Vec<Shared<dyn Op>> {
        self.rd().ops()
    }
    fn parent_op(&self) -> Option<Shared<dyn Op>> {
        self.rd().parent_op()
    }
    fn set_parent(&self, parent: Shared<Block>) {
        self.rd().set_parent(parent);
    }
}

/// Define an op whose syntax is the generic form, optionally with extra
/// [Op] methods.
///
/// ```ignore
/// simple_op!(
///     /// Doc comment.
///     AddiOp,
///     "arith.addi",
///     {
///         fn is_pure(&self) -> bool {
///             true
///         }
///     }
/// );
/// ```
macro_rules! simple_op {
    ($(#[$meta:meta])* $ty:ident, $mnemonic:literal) => {
        simple_op!($(#[$meta])* $ty, $mnemonic, {});
    };
    ($(#[$meta:meta])* $ty:ident, $mnemonic:literal, { $($body:tt)* }) => {
        $(#[$meta])*
        pub struct $ty {
            operation: $crate::shared::Shared<$crate::ir::Operation>,
        }

        impl $crate::ir::Op for $ty {
            fn operation_name() -> $crate::ir::OperationName {
                $crate::ir::OperationName::new($mnemonic.to_string())
            }
            fn new(operation: $crate::shared::Shared<$crate::ir::Operation>) -> Self {
                $ty { operation }
            }
            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
            fn operation(&self) -> &$crate::shared::Shared<$crate::ir::Operation> {
                &self.operation
            }
            $($body)*
        }

        impl $crate::frontend::Parse for $ty {
            fn op<T: $crate::frontend::ParserDispatch>(
                parser: &mut $crate::frontend::Parser<T>,
                parent: Option<$crate::shared::Shared<$crate::ir::Block>>,
            ) -> anyhow::Result<$crate::shared::Shared<dyn $crate::ir::Op>> {
                parser.parse_simple_op::<$ty>(parent)
            }
        }
    };
}

pub(crate) use simple_op;
