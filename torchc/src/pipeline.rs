//! Entry points that take a verified unit all the way to one of the two
//! targets.
use crate::canonicalize::Canonicalize;
use crate::canonicalize::DeadCodeElimination;
use crate::convert::apply_rewrites;
use crate::convert::convert_signatures;
use crate::convert::convert_to_loops;
use crate::convert::convert_to_tosa;
use crate::convert::ensure_legal;
use crate::convert::ensure_lowered;
use crate::convert::Pass;
use crate::convert::QuantTable;
use crate::convert::RefineTypes;
use crate::convert::Rewrite;
use crate::ir::Op;
use crate::shared::Shared;
use crate::shared::SharedExt;
use crate::verify::verify;
use anyhow::Result;
use std::fmt;
use std::fmt::Display;
use tracing::info;

/// The target representation of a lowering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    /// Loops over buffers (`scf`, `memref`, `arith`, `math`).
    Loops,
    /// The fixed operator catalog of `tosa`.
    Tosa,
}

impl Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Loops => write!(f, "torch-to-loops"),
            Target::Tosa => write!(f, "torch-to-tosa"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoweringOptions {
    pub target: Target,
    /// Fold constants and simplify control flow before lowering.
    pub canonicalize: bool,
    /// Narrow result types before lowering; this makes more units static
    /// enough to be lowered.
    pub refine_types: bool,
}

impl LoweringOptions {
    pub fn new(target: Target) -> Self {
        LoweringOptions {
            target,
            ..Default::default()
        }
    }
}

impl Default for LoweringOptions {
    fn default() -> Self {
        LoweringOptions {
            target: Target::Loops,
            canonicalize: true,
            refine_types: true,
        }
    }
}

/// A lowered unit.
pub struct Lowering {
    pub unit: Shared<dyn Op>,
    /// Whether the text of the unit changed.
    pub changed: bool,
    /// Quantization parameters of the lowered quantized tensors.
    pub quant: Shared<QuantTable>,
}

/// Lower `unit` to `options.target`.
///
/// The unit is verified first. Canonicalization and type refinement then
/// rewrite torch ops in place. After that, every op is checked against the
/// target, and the lowering fails before any target op is created when one
/// of them cannot be lowered. On success no torch op is left. Lowering a
/// unit that is already lowered leaves it unchanged.
pub fn lower(unit: &Shared<dyn Op>, options: &LoweringOptions) -> Result<Lowering> {
    let target = options.target;
    info!("Lowering unit with {target}");
    let before = unit.rd().to_string();
    verify(unit)?;
    if options.canonicalize {
        Canonicalize::convert(unit.clone())?;
    }
    if options.refine_types {
        RefineTypes::convert(unit.clone())?;
    }
    ensure_legal(unit, target)?;
    convert_signatures(unit, target)?;
    let quant = Shared::new(QuantTable::new().into());
    match target {
        Target::Loops => convert_to_loops(unit.clone(), &quant)?,
        Target::Tosa => convert_to_tosa(unit.clone(), &quant)?,
    };
    if options.canonicalize {
        Canonicalize::convert(unit.clone())?;
    } else {
        let rewrites: Vec<&dyn Rewrite> = vec![&DeadCodeElimination];
        apply_rewrites(unit.clone(), &rewrites)?;
    }
    ensure_lowered(unit, target)?;
    verify(unit)?;
    let changed = unit.rd().to_string() != before;
    info!("Lowered unit with {target} (changed: {changed})");
    Ok(Lowering {
        unit: unit.clone(),
        changed,
        quant,
    })
}

/// Lower independent units; a failure in one unit does not affect the
/// others.
pub fn lower_units(units: &[Shared<dyn Op>], options: &LoweringOptions) -> Vec<Result<Lowering>> {
    units.iter().map(|unit| lower(unit, options)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::DefaultParserDispatch;
    use crate::frontend::Parser;
    use crate::Error;
    use indoc::indoc;

    #[test]
    fn test_unsupported_op_is_rejected_before_rewriting() {
        let src = indoc! {"
        func.func @f(%x : !torch.vtensor<[2],f32>, %n : !torch.int) -> !torch.vtensor<[2],f32> {
          %0 = torch.aten.relu %x : !torch.vtensor<[2],f32> -> !torch.vtensor<[2],f32>
          %1 = torch.aten.add.int %n, %n : !torch.int, !torch.int -> !torch.int
          return %0 : !torch.vtensor<[2],f32>
        }"};
        let module = Parser::<DefaultParserDispatch>::parse(src).unwrap();
        let options = LoweringOptions {
            target: Target::Tosa,
            canonicalize: false,
            refine_types: false,
        };
        let err = lower(&module, &options).err().unwrap();
        let err = err.downcast_ref::<Error>().unwrap();
        assert!(matches!(err, Error::NotLegalized { op, .. } if op == "torch.aten.add.int"), "{err}");
        let text = module.rd().to_string();
        assert!(text.contains("torch.aten.relu"), "{text}");
    }

    #[test]
    fn test_rejected_unit_keeps_refined_torch_ops() {
        let src = indoc! {"
        func.func @f(%x : !torch.vtensor<[2],f32>, %n : !torch.int) -> !torch.int {
          %0 = torch.aten.relu %x : !torch.vtensor<[2],f32> -> !torch.vtensor
          %1 = torch.aten.add.int %n, %n : !torch.int, !torch.int -> !torch.int
          return %1 : !torch.int
        }"};
        let module = Parser::<DefaultParserDispatch>::parse(src).unwrap();
        let err = lower(&module, &LoweringOptions::new(Target::Tosa)).err().unwrap();
        let err = err.downcast_ref::<Error>().unwrap();
        assert!(matches!(err, Error::NotLegalized { op, .. } if op == "torch.aten.add.int"), "{err}");
        let text = module.rd().to_string();
        assert!(!text.contains("tosa."), "{text}");
        assert!(text.contains("torch.aten.add.int %n, %n"), "{text}");
    }

    #[test]
    fn test_target_names() {
        assert_eq!(Target::Loops.to_string(), "torch-to-loops");
        assert_eq!(Target::Tosa.to_string(), "torch-to-tosa");
        assert!(LoweringOptions::new(Target::Tosa).refine_types);
    }
}
