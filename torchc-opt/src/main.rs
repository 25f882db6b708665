use anyhow::Result;
use clap::Args;
use clap::Command;
use std::io::Read;
use torchc::convert::RewriteResult;
use torchc::frontend::DefaultParserDispatch;
use torchc::frontend::Parser;
use torchc::pipeline::lower;
use torchc::pipeline::LoweringOptions;
use torchc::pipeline::Target;
use torchc::shared::SharedExt;
use torchc::transform;
use torchc::DefaultTransformDispatch;
use torchc::Passes;
use tracing::Level;

/// Parse, verify, and lower torch dialect IR.
///
/// Passes run in the order in which their flags are given.
#[derive(Args, Debug)]
#[command(version, about)]
struct TorchcArgs {
    /// The input file (- is interpreted as stdin)
    #[arg(default_value = "-")]
    input: String,
    /// Run the whole lowering pipeline to `loops` or `tosa`
    #[arg(long, value_parser = ["loops", "tosa"])]
    lower: Option<String>,
    /// Print debug information
    #[arg(long)]
    debug: bool,
}

fn cli() -> Command {
    let cli = Command::new("torchc-opt").args(torchc::default_arguments());
    TorchcArgs::augment_args(cli)
}

fn target(name: &str) -> Target {
    match name {
        "tosa" => Target::Tosa,
        _ => Target::Loops,
    }
}

fn parse_and_transform(src: &str, passes: &Passes, lowering: Option<Target>) -> Result<String> {
    let module = Parser::<DefaultParserDispatch>::parse(src)?;
    let result = transform::<DefaultTransformDispatch>(module.clone(), passes)?;
    let module = match result {
        RewriteResult::Changed(op) => op.0,
        RewriteResult::Unchanged => module,
    };
    if let Some(target) = lowering {
        lower(&module, &LoweringOptions::new(target))?;
    }
    let text = module.rd().to_string();
    Ok(text)
}

fn read_input(input: &str) -> Result<String> {
    let text = if input == "-" {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        std::fs::read_to_string(input)?
    };
    Ok(text)
}

fn main() {
    let cli = cli();
    let args = std::env::args_os();
    let passes = Passes::from_convert_args(args);
    let matches = cli.get_matches();

    let level = if matches.get_flag("debug") {
        Level::DEBUG
    } else {
        Level::WARN
    };
    let _ = torchc::init_subscriber(level);

    let input = matches
        .get_one::<String>("input")
        .map(|s| s.as_str())
        .unwrap_or("-");
    let lowering = matches.get_one::<String>("lower").map(|s| target(s));
    let result = read_input(input).and_then(|src| parse_and_transform(&src, &passes, lowering));
    match result {
        Ok(text) => println!("{text}"),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use std::panic::Location;
    use torchc::tester::Tester;

    fn run_app(args: Vec<&str>, input_text: &str) -> Result<String> {
        let cli = cli();
        let args_owned: Vec<String> = args.iter().map(|&s| s.to_string()).collect();
        let matches = cli.try_get_matches_from(args_owned)?;
        let lowering = matches.get_one::<String>("lower").map(|s| target(s));
        let passes = Passes::from_convert_vec(args);
        parse_and_transform(input_text, &passes, lowering)
    }

    #[test]
    fn test_help() {
        let args = vec!["torchc-opt", "--help"];
        let err = run_app(args, "").err().unwrap();
        let result = err.to_string();
        assert!(result.contains("Usage: torchc-opt"));
        assert!(result.contains("--convert-torch-to-tosa"));
        assert!(result.contains("--lower"));
    }

    #[test]
    fn test_passes_in_order() {
        let src = indoc! {"
        func.func @f(%x : !torch.vtensor<[2],f32>) -> !torch.vtensor {
          %0 = torch.aten.neg %x : !torch.vtensor<[2],f32> -> !torch.vtensor
          return %0 : !torch.vtensor
        }
        "};
        let args = vec!["torchc-opt", "--torch-refine-types", "--canonicalize"];
        let result = run_app(args, src).unwrap();
        let expected = "%0 = torch.aten.neg %x : !torch.vtensor<[2],f32> -> !torch.vtensor<[2],f32>";
        Tester::check_lines_contain(&result, expected, Location::caller());
    }

    #[test]
    fn test_lower_to_tosa() {
        let src = indoc! {"
        func.func @f(%x : !torch.vtensor<[2],f32>) -> !torch.vtensor<[2],f32> {
          %0 = torch.aten.tanh %x : !torch.vtensor<[2],f32> -> !torch.vtensor<[2],f32>
          return %0 : !torch.vtensor<[2],f32>
        }
        "};
        let args = vec!["torchc-opt", "--lower", "tosa"];
        let result = run_app(args, src).unwrap();
        let expected = indoc! {"
        func.func @f(%x : tensor<2xf32>) -> tensor<2xf32> {
        tosa.tanh %x : tensor<2xf32> -> tensor<2xf32>
        "};
        Tester::check_lines_contain(&result, expected, Location::caller());
    }

    #[test]
    fn test_verification_failure() {
        let src = indoc! {"
        func.func @f(%x : !torch.int) -> !torch.int {
          %0 = func.call @g(%x) : (!torch.int) -> !torch.int
          return %0 : !torch.int
        }
        "};
        let args = vec!["torchc-opt", "--verify"];
        let err = run_app(args, src).err().unwrap();
        assert!(err.to_string().contains("unknown function @g"));
    }
}
