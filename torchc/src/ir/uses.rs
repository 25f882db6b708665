use crate::ir::GuardedBlock;
use crate::ir::GuardedOpOperand;
use crate::ir::Op;
use crate::ir::OpOperand;
use crate::ir::Operation;
use crate::ir::Users;
use crate::ir::Value;
use crate::shared::Shared;
use crate::shared::SharedExt;
use std::sync::Arc;

/// A single use of a value: the op and the operand that refers to the value.
#[derive(Clone)]
pub struct Use {
    pub op: Shared<dyn Op>,
    pub operand: Shared<OpOperand>,
}

/// Ops that can see `value`.
///
/// Results are visible to the ops that follow the defining op (including
/// their nested regions) and block arguments to the whole block.
fn visible_ops(value: &Shared<Value>) -> Vec<Shared<dyn Op>> {
    let scope = match &*value.rd() {
        Value::OpResult(result) => match result.defining_op() {
            Some(op) => {
                let operation = op.rd().operation().clone();
                let parent = operation.rd().parent();
                parent.map(|block| block.rd().successors(&operation))
            }
            None => None,
        },
        Value::BlockArgument(arg) => arg.parent().map(|block| block.ops()),
        Value::FuncResult(_) => None,
    };
    scope.unwrap_or_default()
}

fn collect_uses(value: &Shared<Value>, ops: &[Shared<dyn Op>], out: &mut Vec<Use>) {
    for op in ops {
        let operands = op.rd().operation().rd().operands();
        for operand in operands.into_iter() {
            if Arc::ptr_eq(&operand.value(), value) {
                out.push(Use {
                    op: op.clone(),
                    operand,
                });
            }
        }
        let nested = op.rd().ops();
        collect_uses(value, &nested, out);
    }
}

/// All uses of `value`, in program order.
pub fn uses(value: &Shared<Value>) -> Vec<Use> {
    let mut out = vec![];
    collect_uses(value, &visible_ops(value), &mut out);
    out
}

pub fn has_uses(value: &Shared<Value>) -> bool {
    !uses(value).is_empty()
}

/// Uses of all results of `operation`.
pub fn users(operation: &Shared<Operation>) -> Users {
    let results = operation.rd().results();
    if results.is_empty() {
        return Users::HasNoOpResults;
    }
    let mut out = vec![];
    for result in results.into_iter() {
        out.extend(uses(&result).into_iter().map(|u| u.operand));
    }
    Users::OpOperands(out)
}

/// Point every use of `old` to `new`.
pub fn replace_all_uses_with(old: &Shared<Value>, new: &Shared<Value>) {
    for u in uses(old) {
        u.operand.set_value(new.clone());
    }
}
