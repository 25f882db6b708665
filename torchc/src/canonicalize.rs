use crate::convert::apply_rewrites;
use crate::convert::Builder;
use crate::convert::Pass;
use crate::convert::Rewrite;
use crate::convert::RewriteResult;
use crate::ir::replace_all_uses_with;
use crate::ir::Op;
use crate::ir::Users;
use crate::shared::Shared;
use crate::shared::SharedExt;
use anyhow::Result;
use tracing::info;

/// Run the canonicalization of the op itself, see [Op::canonicalize].
pub struct CanonicalizeOp;

impl Rewrite for CanonicalizeOp {
    fn name(&self) -> &'static str {
        "canonicalize::CanonicalizeOp"
    }
    fn is_match(&self, _op: &dyn Op) -> Result<bool> {
        Ok(true)
    }
    fn rewrite(&self, op: Shared<dyn Op>) -> Result<RewriteResult> {
        let result = op.rd().canonicalize()?;
        Ok(result)
    }
}

/// Replace an op whose single result folds by a constant.
pub struct FoldConstants;

impl Rewrite for FoldConstants {
    fn name(&self) -> &'static str {
        "canonicalize::FoldConstants"
    }
    fn is_match(&self, op: &dyn Op) -> Result<bool> {
        if op.is_const() || !op.is_pure() {
            return Ok(false);
        }
        let results = op.operation().rd().results();
        Ok(results.len() == 1 && op.fold().is_some())
    }
    fn rewrite(&self, op: Shared<dyn Op>) -> Result<RewriteResult> {
        let literal = match op.rd().fold() {
            Some(literal) => literal,
            None => return Ok(RewriteResult::Unchanged),
        };
        let result = op.rd().result(0)?;
        let typ = result.rd().typ()?;
        let builder = Builder::before(&op);
        let constant = match builder.literal(&literal, &typ)? {
            Some(constant) => constant,
            None => return Ok(RewriteResult::Unchanged),
        };
        let op = op.rd();
        let changed = RewriteResult::changed_around(&*op)?;
        replace_all_uses_with(&result, &constant);
        op.remove()?;
        Ok(changed)
    }
}

/// Remove pure ops whose results are unused.
pub struct DeadCodeElimination;

impl Rewrite for DeadCodeElimination {
    fn name(&self) -> &'static str {
        "canonicalize::DeadCodeElimination"
    }
    fn is_match(&self, op: &dyn Op) -> Result<bool> {
        if !op.is_pure() {
            return Ok(false);
        }
        match op.users() {
            Users::HasNoOpResults => Ok(false),
            Users::OpOperands(users) => Ok(users.is_empty()),
        }
    }
    fn rewrite(&self, op: Shared<dyn Op>) -> Result<RewriteResult> {
        let op = op.rd();
        let changed = RewriteResult::changed_around(&*op)?;
        op.remove()?;
        Ok(changed)
    }
}

pub struct Canonicalize;

impl Pass for Canonicalize {
    const NAME: &'static str = "canonicalize";
    fn convert(op: Shared<dyn Op>) -> Result<RewriteResult> {
        info!("Running {}", Self::NAME);
        let rewrites: Vec<&dyn Rewrite> = vec![&CanonicalizeOp, &FoldConstants, &DeadCodeElimination];
        apply_rewrites(op, &rewrites)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::DefaultParserDispatch;
    use crate::frontend::Parser;
    use indoc::indoc;

    fn canonicalize(src: &str) -> String {
        let module = Parser::<DefaultParserDispatch>::parse(src).unwrap();
        Canonicalize::convert(module.clone()).unwrap();
        let text = module.rd().to_string();
        text
    }

    #[test]
    fn test_fold_int_arithmetic() {
        let src = indoc! {"
        func.func @f() -> !torch.int {
          %int2 = torch.constant.int 2
          %int3 = torch.constant.int 3
          %0 = torch.aten.mul.int %int2, %int3 : !torch.int, !torch.int -> !torch.int
          %1 = torch.aten.add.int %0, %int2 : !torch.int, !torch.int -> !torch.int
          return %1 : !torch.int
        }"};
        let text = canonicalize(src);
        assert!(text.contains("%int8 = torch.constant.int 8"), "{text}");
        assert!(!text.contains("torch.aten.mul.int"), "{text}");
        assert!(!text.contains("%int3"), "{text}");
        assert!(text.contains("return %int8 : !torch.int"), "{text}");
    }

    #[test]
    fn test_dead_code_keeps_side_effects() {
        let src = indoc! {"
        torch.global_slot @count : !torch.int {
          %int0 = torch.constant.int 0
          torch.global_slot.init %int0 : !torch.int
        }
        func.func @f(%x : !torch.int) {
          %0 = torch.aten.add.int %x, %x : !torch.int, !torch.int -> !torch.int
          torch.global_slot.set @count = %x : !torch.int
          return
        }"};
        let text = canonicalize(src);
        assert!(!text.contains("torch.aten.add.int"), "{text}");
        assert!(text.contains("torch.global_slot.set @count = %x : !torch.int"), "{text}");
    }
}
