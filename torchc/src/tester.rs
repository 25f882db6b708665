use crate::convert::RewriteResult;
use crate::frontend::DefaultParserDispatch;
use crate::frontend::Parser;
use crate::init_subscriber;
use crate::interp::Data;
use crate::interp::Interpreter;
use crate::ir::GuardedOp;
use crate::ir::GuardedOperation;
use crate::ir::Op;
use crate::pipeline::lower;
use crate::pipeline::LoweringOptions;
use crate::pipeline::Target;
use crate::shared::Shared;
use crate::shared::SharedExt;
use crate::transform;
use crate::DefaultTransformDispatch;
use crate::Passes;
use std::cmp::max;
use std::panic::Location;
use tracing::info;

pub struct Tester;

impl Tester {
    /// Initialize the subscriber for the tests.
    ///
    /// Cannot pass options, since the tests run concurrently.
    pub fn init_tracing() {
        let level = tracing::Level::INFO;
        let _ = init_subscriber(level);
    }
    fn point_to_missing_line(expected: &str, index: usize) -> String {
        let lines = expected
            .lines()
            .enumerate()
            .map(|(i, line)| {
                if i == index {
                    format!("{line}   <== missing")
                } else {
                    line.to_string()
                }
            })
            .collect::<Vec<String>>()
            .join("\n");
        format!("A line is missing from the output:\n```\n{lines}\n```")
    }
    /// Check that `actual` and `expected` are equal up to surrounding
    /// whitespace, reporting the first line that differs.
    pub fn check_lines_exact(actual: &str, expected: &str, caller: &Location<'_>) {
        let actual = actual.trim().lines().collect::<Vec<&str>>();
        let expected = expected.trim().lines().collect::<Vec<&str>>();
        for i in 0..max(actual.len(), expected.len()) {
            match (actual.get(i), expected.get(i)) {
                (Some(a), Some(e)) => assert_eq!(a, e, "line {i}, called from {caller}"),
                (None, _) => panic!("Expected line {i} not found in output: called from {caller}"),
                (_, None) => panic!("Unexpected line {i} in output: called from {caller}"),
            }
        }
    }
    /// Check that the expected lines occur in the actual output in the same
    /// order.
    ///
    /// Expected lines are trimmed and only need to be contained in an actual
    /// line. The output may contain additional lines.
    pub fn check_lines_contain(actual: &str, expected: &str, caller: &Location<'_>) {
        let mut remaining = actual.trim().lines();
        for (i, expected_line) in expected.trim().lines().enumerate() {
            let expected_line = expected_line.trim();
            if expected_line.is_empty() {
                continue;
            }
            if !remaining.any(|line| line.contains(expected_line)) {
                let msg = Self::point_to_missing_line(expected, i);
                panic!("{msg}\nwhen called from {caller}");
            }
        }
    }
    fn print_heading(msg: &str, src: &str) {
        info!("{msg}:\n```\n{src}\n```\n");
    }
    pub fn parse(src: &str) -> (Shared<dyn Op>, String) {
        let src = src.trim();
        Self::print_heading("Before parse", src);
        let module = Parser::<DefaultParserDispatch>::parse(src).unwrap();
        let actual = module.rd().to_string();
        Self::print_heading("After parse", &actual);
        (module, actual)
    }
    pub fn transform(arguments: Vec<&str>, src: &str) -> (Shared<dyn Op>, String) {
        let src = src.trim();
        let module = Parser::<DefaultParserDispatch>::parse(src).unwrap();
        let msg = format!("Before (transform {arguments:?})");
        Self::print_heading(&msg, src);

        for arg in arguments.clone() {
            if arg.starts_with("convert-") {
                panic!("conversion passes should be prefixed with `--convert-`");
            }
        }
        let passes = Passes::from_convert_vec(arguments.clone());
        let result = transform::<DefaultTransformDispatch>(module.clone(), &passes).unwrap();
        let new_root_op = match result {
            RewriteResult::Changed(changed_op) => changed_op.0,
            RewriteResult::Unchanged => {
                panic!("Expected changes");
            }
        };
        let actual = new_root_op.rd().to_string();
        let msg = format!("After (transform {arguments:?})");
        Self::print_heading(&msg, &actual);
        (new_root_op, actual)
    }
    /// Lower `src` with the default options for `target`.
    pub fn lower(target: Target, src: &str) -> (Shared<dyn Op>, String) {
        let (module, _) = Self::parse(src);
        let options = LoweringOptions::new(target);
        let lowering = lower(&module, &options).unwrap();
        let actual = lowering.unit.rd().to_string();
        Self::print_heading(&format!("After lowering with {target}"), &actual);
        (module, actual)
    }
    /// Run function `name` of a lowered module.
    pub fn run(module: &Shared<dyn Op>, name: &str, arguments: Vec<Data>) -> Vec<Data> {
        Interpreter::new(module).call(name, arguments).unwrap()
    }
    fn verify_core(op: Shared<dyn Op>) {
        if !op.name().to_string().contains("module") {
            assert!(
                op.operation().parent().is_some(),
                "op without parent:\n{}",
                op.rd()
            );
        }
    }
    /// Check the parent pointers of every op below `op`.
    ///
    /// Whether an op is in its parent block is visible in the printed IR,
    /// but whether the op also points back to that block is not.
    pub fn verify(op: Shared<dyn Op>) {
        Self::verify_core(op.clone());
        for op in op.ops() {
            Self::verify(op);
        }
    }
}
