use crate::convert::apply_rewrites;
use crate::convert::Builder;
use crate::convert::Pass;
use crate::convert::Rewrite;
use crate::convert::RewriteResult;
use crate::dialect::torch::torch_type;
use crate::dialect::torch::TensorStaticInfoCastOp;
use crate::dialect::torch::TorchType;
use crate::ir::uses;
use crate::ir::Op;
use crate::ir::Type;
use crate::shared::Shared;
use crate::shared::SharedExt;
use crate::Error;
use anyhow::Result;
use tracing::debug;
use tracing::info;

/// Refined type of every result, or `None` when nothing changes.
fn refined_types(op: &dyn Op) -> Result<Option<Vec<(usize, TorchType, TorchType)>>> {
    if !op.allows_type_refinement() {
        return Ok(None);
    }
    let inferred = match op.infer_result_types() {
        Ok(Some(inferred)) => inferred,
        Ok(None) => return Ok(None),
        Err(err) => return Err(Error::verification(op, err.to_string())),
    };
    let mut changes = vec![];
    for (i, inferred) in inferred.iter().enumerate() {
        let declared = op.result(i)?.rd().typ()?;
        let (declared, inferred) = match (torch_type(&declared), torch_type(inferred)) {
            (Some(declared), Some(inferred)) => (declared, inferred),
            _ => continue,
        };
        match declared.meet(&inferred) {
            Some(refined) if refined != declared => changes.push((i, declared, refined)),
            Some(_) => {}
            None => {
                let (from, to) = (declared.to_string(), inferred.to_string());
                return Err(Error::refinement_conflict(op, from, to));
            }
        }
    }
    if changes.is_empty() {
        Ok(None)
    } else {
        Ok(Some(changes))
    }
}

/// Narrow the result type of one op to the type inferred from its
/// operands.
///
/// Users that cannot take a refined operand, such as `return`, keep
/// seeing the declared type through a `torch.tensor_static_info_cast`.
struct RefineResultTypes;

impl Rewrite for RefineResultTypes {
    fn name(&self) -> &'static str {
        "refine_types::RefineResultTypes"
    }
    fn is_match(&self, op: &dyn Op) -> Result<bool> {
        Ok(refined_types(op)?.is_some())
    }
    fn rewrite(&self, op: Shared<dyn Op>) -> Result<RewriteResult> {
        let changes = match refined_types(&*op.rd())? {
            Some(changes) => changes,
            None => return Ok(RewriteResult::Unchanged),
        };
        for (i, declared, refined) in changes {
            let result = op.rd().result(i)?;
            let fixed = uses(&result)
                .into_iter()
                .filter(|u| !u.op.rd().allows_type_refinement())
                .collect::<Vec<_>>();
            debug!("Refining {declared} to {refined} with {} fixed users", fixed.len());
            if !fixed.is_empty() {
                let builder = Builder::after(&op);
                let declared: Shared<dyn Type> = declared.shared();
                let cast = builder.value::<TensorStaticInfoCastOp>(&[result.clone()], declared)?;
                for u in fixed {
                    u.operand.wr().set_value(cast.clone());
                }
            }
            result.wr().set_type(refined.shared());
        }
        let changed = RewriteResult::changed_around(&*op.rd())?;
        Ok(changed)
    }
}

pub struct RefineTypes;

impl Pass for RefineTypes {
    const NAME: &'static str = "torch-refine-types";
    fn convert(op: Shared<dyn Op>) -> Result<RewriteResult> {
        info!("Running {}", Self::NAME);
        let rewrites: Vec<&dyn Rewrite> = vec![&RefineResultTypes];
        apply_rewrites(op, &rewrites)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::DefaultParserDispatch;
    use crate::frontend::Parser;
    use indoc::indoc;

    #[test]
    fn test_refine_keeps_return_type() {
        let src = indoc! {"
        func.func @f(%x : !torch.vtensor<[2,3],f32>) -> !torch.vtensor {
          %0 = torch.aten.tanh %x : !torch.vtensor<[2,3],f32> -> !torch.vtensor
          %1 = torch.aten.exp %0 : !torch.vtensor -> !torch.vtensor
          return %1 : !torch.vtensor
        }"};
        let module = Parser::<DefaultParserDispatch>::parse(src).unwrap();
        RefineTypes::convert(module.clone()).unwrap();
        let text = module.rd().to_string();
        assert!(text.contains("%0 = torch.aten.tanh %x : !torch.vtensor<[2,3],f32> -> !torch.vtensor<[2,3],f32>"), "{text}");
        assert!(text.contains("%1 = torch.aten.exp %0 : !torch.vtensor<[2,3],f32> -> !torch.vtensor<[2,3],f32>"), "{text}");
        assert!(text.contains("torch.tensor_static_info_cast %1 : !torch.vtensor<[2,3],f32> -> !torch.vtensor"), "{text}");
        assert!(crate::verify::verify(&module).is_ok(), "{text}");
    }

    #[test]
    fn test_refinement_conflict() {
        let src = indoc! {"
        func.func @f(%x : !torch.vtensor<[2],f32>) -> !torch.vtensor<[3],f32> {
          %0 = torch.aten.neg %x : !torch.vtensor<[2],f32> -> !torch.vtensor<[3],f32>
          return %0 : !torch.vtensor<[3],f32>
        }"};
        let module = Parser::<DefaultParserDispatch>::parse(src).unwrap();
        let err = RefineTypes::convert(module).err().unwrap();
        let err = err.downcast_ref::<Error>().unwrap();
        assert!(matches!(err, Error::RefinementConflict { .. }), "{err}");
    }
}
