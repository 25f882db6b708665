use crate::canonicalize::Canonicalize;
use crate::convert::ConvertTorchToLoops;
use crate::convert::ConvertTorchToTosa;
use crate::convert::Pass;
use crate::convert::RefineTypes;
use crate::convert::RewriteResult;
use crate::ir::Op;
use crate::shared::Shared;
use anyhow::Result;
use clap::Arg;
use clap::ArgAction;
use std::env::ArgsOs;
use std::fmt;
use std::fmt::Display;
use tracing::subscriber::SetGlobalDefaultError;
use tracing::Level;

/// Name of the pseudo pass that only runs the verifier.
pub const VERIFY: &str = "verify";

/// A transformation pass (e.g., `--convert-torch-to-loops`).
pub struct SinglePass {
    pass: String,
}

impl Display for SinglePass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pass)
    }
}

impl SinglePass {
    pub fn new(pass: &str) -> SinglePass {
        SinglePass {
            pass: pass.trim_start_matches("--").to_string(),
        }
    }
}

fn is_pass_flag(arg: &str) -> bool {
    arg.starts_with("--convert-")
        || arg == "--canonicalize"
        || arg == "--torch-refine-types"
        || arg == "--verify"
}

/// A collection of [SinglePass]es.
pub struct Passes {
    passes: Vec<SinglePass>,
}

impl Display for Passes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self
            .passes
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<String>>();
        write!(f, "{}", names.join(" "))
    }
}

impl Passes {
    pub fn from_vec(passes: Vec<&str>) -> Passes {
        Passes {
            passes: passes.iter().map(|p| SinglePass::new(p)).collect(),
        }
    }
    /// Keep only the arguments that name a pass, in the given order.
    pub fn from_convert_vec(args: Vec<&str>) -> Passes {
        let passes = args.into_iter().filter(|arg| is_pass_flag(arg)).collect();
        Passes::from_vec(passes)
    }
    /// Extract passes from the command line arguments.
    ///
    /// The order of the flags is the order in which the passes run, which
    /// is why this cannot be read from the clap matches.
    pub fn from_convert_args(args: ArgsOs) -> Passes {
        let mut passes = vec![];
        for arg in args {
            let arg = arg.to_string_lossy();
            if is_pass_flag(&arg) {
                passes.push(SinglePass::new(&arg));
            }
        }
        Passes { passes }
    }
    pub fn vec(&self) -> &Vec<SinglePass> {
        &self.passes
    }
}

/// Interface to add custom passes to the compiler.
pub trait TransformDispatch {
    fn dispatch(op: Shared<dyn Op>, pass: &SinglePass) -> Result<RewriteResult>;
}

/// Knows the passes of this crate.
pub struct DefaultTransformDispatch;

/// Initialize logging with the given level.
pub fn init_subscriber(level: Level) -> Result<(), SetGlobalDefaultError> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level)
        .with_test_writer()
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
}

impl TransformDispatch for DefaultTransformDispatch {
    fn dispatch(op: Shared<dyn Op>, pass: &SinglePass) -> Result<RewriteResult> {
        let pass = pass.to_string();
        match pass.as_str() {
            Canonicalize::NAME => Canonicalize::convert(op),
            RefineTypes::NAME => RefineTypes::convert(op),
            ConvertTorchToLoops::NAME => ConvertTorchToLoops::convert(op),
            ConvertTorchToTosa::NAME => ConvertTorchToTosa::convert(op),
            VERIFY => {
                crate::verify::verify(&op)?;
                Ok(RewriteResult::Unchanged)
            }
            _ => Err(anyhow::anyhow!("Unknown pass: {}", pass)),
        }
    }
}

/// Pass flags of the `torchc-opt` driver.
///
/// `--debug` is left to the driver so that it decides how to log.
pub fn default_arguments() -> Vec<Arg> {
    let flag = |name: &'static str, help: &'static str| {
        Arg::new(name)
            .long(name)
            .help(help)
            .action(ArgAction::SetTrue)
    };
    vec![
        flag("canonicalize", "Fold constants and remove dead code"),
        flag(
            "torch-refine-types",
            "Narrow torch result types to the types inferred from the operands",
        ),
        flag(
            "convert-torch-to-loops",
            "Lower torch ops to loops over buffers",
        ),
        flag("convert-torch-to-tosa", "Lower torch ops to tosa"),
        flag("verify", "Only verify the input"),
    ]
}

/// Run `passes` in order on `op`.
pub fn transform<T: TransformDispatch>(op: Shared<dyn Op>, passes: &Passes) -> Result<RewriteResult> {
    let mut result = RewriteResult::Unchanged;
    for pass in passes.vec() {
        let new_result = T::dispatch(op.clone(), pass)?;
        if let RewriteResult::Changed(_) = new_result {
            result = new_result;
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passes_keep_order() {
        let args = vec!["input.mlir", "--torch-refine-types", "--debug", "--convert-torch-to-tosa"];
        let passes = Passes::from_convert_vec(args);
        assert_eq!(passes.to_string(), "torch-refine-types convert-torch-to-tosa");
    }
}
