extern crate torchc;

use indoc::indoc;
use std::panic::Location;
use std::str::FromStr;
use torchc::dialect::torch::TorchType;
use torchc::shared::SharedExt;
use torchc::tester::Tester;
use torchc::verify::verify;
use torchc::Error;

#[test]
fn round_trip() {
    Tester::init_tracing();
    let src = indoc! {r#"
    torch.class_type @c {
      torch.attr private "w" : !torch.vtensor<[2],f32>
      torch.method "forward", @forward
    }
    torch.global_slot private @count : !torch.int {
      %int0 = torch.constant.int 0
      torch.global_slot.init %int0 : !torch.int
    }
    func.func private @forward(%self : !torch.nn.Module<"c">, %n : !torch.int) -> !torch.vtensor<[2],f32> {
      %w = torch.prim.GetAttr %self["w"] : !torch.nn.Module<"c"> -> !torch.vtensor<[2],f32>
      %true = torch.constant.bool true
      %0 = torch.prim.Loop %n, %true, init(%w) {
      ^bb0(%iv: !torch.int, %acc: !torch.vtensor<[2],f32>):
        %1 = torch.aten.tanh %acc : !torch.vtensor<[2],f32> -> !torch.vtensor<[2],f32>
        torch.prim.Loop.condition %true, iter(%1 : !torch.vtensor<[2],f32>)
      } : (!torch.int, !torch.bool, !torch.vtensor<[2],f32>) -> (!torch.vtensor<[2],f32>)
      torch.global_slot.set @count = %n : !torch.int
      return %0 : !torch.vtensor<[2],f32>
    }
    "#};
    let (module, printed) = Tester::parse(src);
    Tester::verify(module.clone());
    assert!(verify(&module).is_ok(), "{printed}");
    let (reparsed, reprinted) = Tester::parse(&printed);
    Tester::verify(reparsed);
    assert_eq!(printed, reprinted);
    Tester::check_lines_contain(&printed, src, Location::caller());
}

#[test]
fn round_trip_modules_and_casts() {
    let src = indoc! {r#"
    torch.class_type @c {
      torch.attr "n" : !torch.int
      torch.method "step", @step
    }
    func.func @step(%self : !torch.nn.Module<"c">, %x : !torch.int) -> !torch.int {
      %n = torch.prim.GetAttr %self["n"] : !torch.nn.Module<"c"> -> !torch.int
      %0 = torch.aten.add.int %n, %x : !torch.int, !torch.int -> !torch.int
      torch.prim.SetAttr %self["n"] = %0 : !torch.nn.Module<"c">, !torch.int
      return %0 : !torch.int
    }
    func.func @make(%n : !torch.int) -> !torch.dict<str, int> {
      %m = torch.nn_module {
        torch.slot "n", %n : !torch.int
      } : !torch.nn.Module<"c">
      %0 = torch.prim.CallMethod %m["step"] (%n) : !torch.nn.Module<"c">, (!torch.int) -> !torch.int
      %key = torch.constant.str "step"
      %1 = torch.prim.DictConstruct keys(%key : !torch.str) values(%0 : !torch.int) -> !torch.dict<str, int>
      return %1 : !torch.dict<str, int>
    }
    func.func @casts(%t : !torch.tensor<[2],f32>, %q : !torch.vtensor<[4],si8>) -> (!torch.vtensor, !torch.tensor<[2],f32>, !torch.vtensor<[4],!torch.qint8>) {
      %0 = torch.copy.to_vtensor %t : !torch.tensor<[2],f32> -> !torch.vtensor<[2],f32>
      %1 = torch.tensor_static_info_cast %0 : !torch.vtensor<[2],f32> -> !torch.vtensor
      %2 = torch.copy.to_tensor %0 : !torch.vtensor<[2],f32> -> !torch.tensor<[2],f32>
      %scale = torch.constant.float 0.5
      %zp = torch.constant.int 3
      %3 = torch.per_tensor_affine.create %q, %scale, %zp : !torch.vtensor<[4],si8>, !torch.float, !torch.int -> !torch.vtensor<[4],!torch.qint8>
      return %1, %2, %3 : !torch.vtensor, !torch.tensor<[2],f32>, !torch.vtensor<[4],!torch.qint8>
    }
    "#};
    let (module, printed) = Tester::parse(src);
    Tester::verify(module.clone());
    if let Err(diagnostics) = verify(&module) {
        panic!("{diagnostics}\n{printed}");
    }
    let (reparsed, reprinted) = Tester::parse(&printed);
    Tester::verify(reparsed);
    assert_eq!(printed, reprinted);
    Tester::check_lines_contain(&printed, src, Location::caller());
}

#[test]
fn slot_order_must_match_class() {
    let src = indoc! {r#"
    torch.class_type @c {
      torch.attr "w" : !torch.vtensor<[2],f32>
      torch.attr "b" : !torch.vtensor<[2],f32>
    }
    func.func @make(%w : !torch.vtensor<[2],f32>, %b : !torch.vtensor<[2],f32>) -> !torch.nn.Module<"c"> {
      %m = torch.nn_module {
        torch.slot "b", %b : !torch.vtensor<[2],f32>
        torch.slot "w", %w : !torch.vtensor<[2],f32>
      } : !torch.nn.Module<"c">
      return %m : !torch.nn.Module<"c">
    }
    "#};
    let (module, _) = Tester::parse(src);
    let diagnostics = verify(&module).unwrap_err();
    let first = diagnostics.first().unwrap();
    assert_eq!(first.op, "torch.nn_module");
    assert!(first.message.contains("slot #0 is \"b\""), "{}", first.message);

    let fixed = src.replace(
        "torch.slot \"b\", %b : !torch.vtensor<[2],f32>\n    torch.slot \"w\", %w : !torch.vtensor<[2],f32>",
        "torch.slot \"w\", %w : !torch.vtensor<[2],f32>\n    torch.slot \"b\", %b : !torch.vtensor<[2],f32>",
    );
    assert_ne!(fixed, src);
    let (module, _) = Tester::parse(&fixed);
    assert!(verify(&module).is_ok());
}

#[test]
fn private_attribute_outside_method() {
    let src = indoc! {r#"
    torch.class_type @c {
      torch.attr private "w" : !torch.int
    }
    func.func @peek(%m : !torch.nn.Module<"c">) -> !torch.int {
      %w = torch.prim.GetAttr %m["w"] : !torch.nn.Module<"c"> -> !torch.int
      return %w : !torch.int
    }
    "#};
    let (module, _) = Tester::parse(src);
    let diagnostics = verify(&module).unwrap_err();
    assert_eq!(diagnostics.len(), 1);
    let first = diagnostics.first().unwrap();
    assert_eq!(first.op, "torch.prim.GetAttr");
    assert!(first.message.contains("private member \"w\""));
}

#[test]
fn if_with_constant_condition() {
    let src = indoc! {"
    func.func @f() -> !torch.int {
      %true = torch.constant.bool true
      %0 = torch.prim.If %true -> (!torch.int) {
        %int3 = torch.constant.int 3
        torch.prim.If.yield %int3 : !torch.int
      } else {
        %int4 = torch.constant.int 4
        torch.prim.If.yield %int4 : !torch.int
      }
      return %0 : !torch.int
    }
    "};
    let expected = indoc! {"
    func.func @f() -> !torch.int {
      %int3 = torch.constant.int 3
      return %int3 : !torch.int
    }
    "};
    let (module, actual) = Tester::transform(vec!["--canonicalize"], src);
    Tester::verify(module);
    assert!(!actual.contains("torch.prim.If"), "{actual}");
    assert!(!actual.contains("%int4"), "{actual}");
    Tester::check_lines_contain(&actual, expected, Location::caller());
}

#[test]
fn zero_trip_loop_forwards_inits() {
    let src = indoc! {"
    func.func @f(%x : !torch.int) -> !torch.int {
      %int0 = torch.constant.int 0
      %true = torch.constant.bool true
      %0 = torch.prim.Loop %int0, %true, init(%x) {
      ^bb0(%iv: !torch.int, %acc: !torch.int):
        %1 = torch.aten.mul.int %acc, %iv : !torch.int, !torch.int -> !torch.int
        torch.prim.Loop.condition %true, iter(%1 : !torch.int)
      } : (!torch.int, !torch.bool, !torch.int) -> (!torch.int)
      return %0 : !torch.int
    }
    "};
    let (module, actual) = Tester::transform(vec!["--canonicalize"], src);
    Tester::verify(module);
    assert!(!actual.contains("torch.prim.Loop"), "{actual}");
    assert!(!actual.contains("torch.aten.mul.int"), "{actual}");
    Tester::check_lines_contain(&actual, "return %x : !torch.int", Location::caller());
}

#[test]
fn refine_types() {
    let src = indoc! {"
    func.func @f(%x : !torch.vtensor<[3,1],f32>, %y : !torch.vtensor<[1,4],f32>) -> !torch.vtensor {
      %int1 = torch.constant.int 1
      %0 = torch.aten.add.Tensor %x, %y, %int1 : !torch.vtensor<[3,1],f32>, !torch.vtensor<[1,4],f32>, !torch.int -> !torch.vtensor
      %1 = torch.aten.relu %0 : !torch.vtensor -> !torch.vtensor
      return %1 : !torch.vtensor
    }
    "};
    let expected = indoc! {"
    %0 = torch.aten.add.Tensor %x, %y, %int1 : !torch.vtensor<[3,1],f32>, !torch.vtensor<[1,4],f32>, !torch.int -> !torch.vtensor<[3,4],f32>
    %1 = torch.aten.relu %0 : !torch.vtensor<[3,4],f32> -> !torch.vtensor<[3,4],f32>
    torch.tensor_static_info_cast %1 : !torch.vtensor<[3,4],f32> -> !torch.vtensor
    "};
    let (module, actual) = Tester::transform(vec!["--torch-refine-types"], src);
    Tester::verify(module.clone());
    assert!(verify(&module).is_ok(), "{actual}");
    Tester::check_lines_contain(&actual, expected, Location::caller());
}

#[test]
fn incompatible_refinement_is_rejected() {
    let src = indoc! {"
    func.func @f(%x : !torch.vtensor<[2],f32>) -> !torch.vtensor<[3],f32> {
      %0 = torch.aten.neg %x : !torch.vtensor<[2],f32> -> !torch.vtensor<[3],f32>
      return %0 : !torch.vtensor<[3],f32>
    }
    "};
    let (module, before) = Tester::parse(src);
    let passes = torchc::Passes::from_convert_vec(vec!["--torch-refine-types"]);
    let err = torchc::transform::<torchc::DefaultTransformDispatch>(module.clone(), &passes)
        .err()
        .unwrap();
    let err = err.downcast_ref::<Error>().unwrap();
    assert!(matches!(err, Error::RefinementConflict { .. }), "{err}");
    assert_eq!(module.rd().to_string(), before);
}

#[test]
fn subtype_is_reflexive_and_transitive() {
    let types = [
        "!torch.none",
        "!torch.int",
        "!torch.any",
        "!torch.optional<int>",
        "!torch.vtensor<[3,4],f32>",
        "!torch.vtensor<[3,?],f32>",
        "!torch.vtensor<*,f32>",
        "!torch.vtensor",
        "!torch.tensor<[3,4],f32>",
        "!torch.tensor",
        "!torch.list<vtensor<[2],f32>>",
        "!torch.list<vtensor>",
        "!torch.tuple<int, float>",
        "!torch.tuple<any, any>",
        "!torch.optional<list<int>>",
        "!torch.list<int>",
    ];
    let types = types
        .iter()
        .map(|t| TorchType::from_str(t).unwrap())
        .collect::<Vec<_>>();
    for a in &types {
        assert!(a.is_subtype(a), "{a} is not a subtype of itself");
        for b in &types {
            for c in &types {
                if a.is_subtype(b) && b.is_subtype(c) {
                    assert!(a.is_subtype(c), "{a} <: {b} <: {c}, but not {a} <: {c}");
                }
            }
        }
    }
}
