//! torchc is a compiler for a TorchScript-like intermediate representation.
//!
//! Programs enter as text in the `torch` dialect: tensor arithmetic on
//! value-semantic tensors, scalar arithmetic, structured control flow
//! (`torch.prim.If` and `torch.prim.Loop`) and an object model with class
//! types, module instances and global slots.
//! The text is parsed with [frontend::Parser] into the IR of [ir] and checked
//! by [verify::verify].
//!
//! From there, passes rewrite the IR.
//! A pass is a group of rewrites that are applied until nothing changes.
//! `--canonicalize` folds constants and simplifies control flow, and
//! `--torch-refine-types` narrows result types from the operand types.
//! The two lowerings take the torch ops to a target representation:
//!
//! - `--convert-torch-to-loops` emits loops over buffers (`scf`, `memref`,
//!   `arith` and `math`).
//! - `--convert-torch-to-tosa` emits the fixed operator catalog of `tosa`.
//!
//! [pipeline::lower] runs the whole sequence for one compilation unit and
//! either returns a unit without torch ops or the first construct that could
//! not be lowered.
//! The lowered IR can be executed with [interp::Interpreter], which is how
//! the numeric behavior of both lowerings is tested.
//!
//! ```
//! use torchc::frontend::DefaultParserDispatch;
//! use torchc::frontend::Parser;
//! use torchc::pipeline::lower;
//! use torchc::pipeline::LoweringOptions;
//! use torchc::pipeline::Target;
//! use torchc::shared::SharedExt;
//!
//! let src = "
//! func.func @f(%x : !torch.vtensor<[4],f32>) -> !torch.vtensor<[4],f32> {
//!   %0 = torch.aten.relu %x : !torch.vtensor<[4],f32> -> !torch.vtensor<[4],f32>
//!   return %0 : !torch.vtensor<[4],f32>
//! }
//! ";
//! let module = Parser::<DefaultParserDispatch>::parse(src).unwrap();
//! lower(&module, &LoweringOptions::new(Target::Tosa)).unwrap();
//! assert!(module.rd().to_string().contains("tosa.clamp"));
//! ```

mod canonicalize;
pub mod convert;
pub mod dialect;
mod error;
pub mod frontend;
pub mod interp;
pub mod ir;
pub mod pipeline;
pub mod shared;
#[cfg(feature = "test-utils")]
pub mod tester;
mod transform;
pub mod verify;

pub use canonicalize::Canonicalize;
pub use canonicalize::DeadCodeElimination;
pub use error::Error;
pub use transform::default_arguments;
pub use transform::init_subscriber;
pub use transform::transform;
pub use transform::DefaultTransformDispatch;
pub use transform::Passes;
pub use transform::SinglePass;
pub use transform::TransformDispatch;

/// Dialects can define new operations, attributes, and types.
/// Each dialect is given an unique namespace that is prefixed.
///
/// Dialects can co-exist and can be produced and consumed by different passes.
pub trait Dialect {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
}
