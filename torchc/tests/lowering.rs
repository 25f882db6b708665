extern crate torchc;

use indoc::indoc;
use std::panic::Location;
use torchc::interp::Data;
use torchc::interp::Scalar;
use torchc::ir::ScalarType;
use torchc::pipeline::lower;
use torchc::pipeline::lower_units;
use torchc::pipeline::LoweringOptions;
use torchc::pipeline::Target;
use torchc::shared::SharedExt;
use torchc::tester::Tester;
use torchc::verify::verify;
use torchc::Error;

const TARGETS: [Target; 2] = [Target::Loops, Target::Tosa];

/// Input data in the form that the lowered signature of `target` expects.
fn array(target: Target, shape: Vec<i64>, element: ScalarType, values: &[f64]) -> Data {
    match target {
        Target::Loops => Data::memref(shape, element, values).unwrap(),
        Target::Tosa => Data::tensor(shape, element, values).unwrap(),
    }
}

fn assert_close(actual: &[f64], expected: &[f64], tolerance: f64) {
    assert_eq!(actual.len(), expected.len(), "{actual:?} vs {expected:?}");
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() <= tolerance, "{actual:?} vs {expected:?}");
    }
}

#[test]
fn broadcast_add() {
    Tester::init_tracing();
    let src = indoc! {"
    func.func @f(%x : !torch.vtensor<[3,1],f32>, %y : !torch.vtensor<[1,4],f32>) -> !torch.vtensor<[3,4],f32> {
      %int1 = torch.constant.int 1
      %0 = torch.aten.add.Tensor %x, %y, %int1 : !torch.vtensor<[3,1],f32>, !torch.vtensor<[1,4],f32>, !torch.int -> !torch.vtensor<[3,4],f32>
      return %0 : !torch.vtensor<[3,4],f32>
    }
    "};
    let x = [1.0, 2.0, 3.0];
    let y = [10.0, 20.0, 30.0, 40.0];
    let mut expected = vec![];
    for a in x {
        for b in y {
            expected.push(a + b);
        }
    }
    for target in TARGETS {
        let (module, actual) = Tester::lower(target, src);
        Tester::verify(module.clone());
        assert!(!actual.contains("torch."), "{actual}");
        let arguments = vec![
            array(target, vec![3, 1], ScalarType::F32, &x),
            array(target, vec![1, 4], ScalarType::F32, &y),
        ];
        let result = Tester::run(&module, "f", arguments);
        let result = result[0].array().unwrap();
        assert_eq!(result.shape, vec![3, 4]);
        assert_eq!(result.values(), expected);
    }
}

#[test]
fn loops_signature_and_buffers() {
    let src = indoc! {"
    func.func @f(%x : !torch.vtensor<[3,1],f32>, %y : !torch.vtensor<[1,4],f32>) -> !torch.vtensor<[3,4],f32> {
      %int1 = torch.constant.int 1
      %0 = torch.aten.add.Tensor %x, %y, %int1 : !torch.vtensor<[3,1],f32>, !torch.vtensor<[1,4],f32>, !torch.int -> !torch.vtensor<[3,4],f32>
      return %0 : !torch.vtensor<[3,4],f32>
    }
    "};
    let expected = indoc! {"
    func.func @f(%x : memref<3x1xf32>, %y : memref<1x4xf32>) -> memref<3x4xf32> {
    memref.alloc() : memref<3x4xf32>
    scf.for
    scf.for
    memref.load %x
    memref.load %y
    arith.addf
    memref.store
    return
    "};
    let (_, actual) = Tester::lower(Target::Loops, src);
    Tester::check_lines_contain(&actual, expected, Location::caller());
}

#[test]
fn index_constants_dominate_nested_loops() {
    let src = indoc! {"
    func.func @f(%x : !torch.vtensor<[2,3,4],f32>) -> !torch.vtensor<[2,3,4],f32> {
      %0 = torch.aten.neg %x : !torch.vtensor<[2,3,4],f32> -> !torch.vtensor<[2,3,4],f32>
      return %0 : !torch.vtensor<[2,3,4],f32>
    }
    "};
    let (module, actual) = Tester::lower(Target::Loops, src);
    assert!(verify(&module).is_ok(), "{actual}");
    let lines = actual.lines().collect::<Vec<_>>();
    let first_loop = lines.iter().position(|l| l.contains("scf.for")).unwrap();
    for (i, line) in lines.iter().enumerate() {
        if line.contains("arith.constant") && line.contains(": index") {
            assert!(i < first_loop, "constant after the loop nest:\n{actual}");
        }
    }
    let values = (0..24).map(|v| v as f64).collect::<Vec<_>>();
    let x = Data::memref(vec![2, 3, 4], ScalarType::F32, &values).unwrap();
    let result = Tester::run(&module, "f", vec![x]);
    let expected = values.iter().map(|v| -v).collect::<Vec<_>>();
    assert_eq!(result[0].values().unwrap(), expected);
}

#[test]
fn tosa_reshapes_for_equal_rank() {
    let src = indoc! {"
    func.func @f(%x : !torch.vtensor<[2,3],f32>, %y : !torch.vtensor<[3],f32>) -> !torch.vtensor<[2,3],f32> {
      %0 = torch.aten.mul.Tensor %x, %y : !torch.vtensor<[2,3],f32>, !torch.vtensor<[3],f32> -> !torch.vtensor<[2,3],f32>
      return %0 : !torch.vtensor<[2,3],f32>
    }
    "};
    let expected = indoc! {"
    func.func @f(%x : tensor<2x3xf32>, %y : tensor<3xf32>) -> tensor<2x3xf32> {
    tosa.reshape %y {new_shape = [1, 3]} : tensor<3xf32> -> tensor<1x3xf32>
    tosa.mul %x
    return
    "};
    let (module, actual) = Tester::lower(Target::Tosa, src);
    Tester::check_lines_contain(&actual, expected, Location::caller());
    let x = Data::tensor(vec![2, 3], ScalarType::F32, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    let y = Data::tensor(vec![3], ScalarType::F32, &[2.0, 0.5, -1.0]).unwrap();
    let result = Tester::run(&module, "f", vec![x, y]);
    assert_eq!(
        result[0].values().unwrap(),
        vec![2.0, 1.0, -3.0, 8.0, 2.5, -6.0]
    );
}

#[test]
fn mm_and_sum() {
    let src = indoc! {"
    func.func @f(%a : !torch.vtensor<[2,3],f32>, %b : !torch.vtensor<[3,2],f32>) -> (!torch.vtensor<[2,2],f32>, !torch.vtensor<[2],f32>) {
      %int1 = torch.constant.int 1
      %false = torch.constant.bool false
      %none = torch.constant.none
      %dims = torch.prim.ListConstruct %int1 : !torch.int -> !torch.list<int>
      %0 = torch.aten.mm %a, %b : !torch.vtensor<[2,3],f32>, !torch.vtensor<[3,2],f32> -> !torch.vtensor<[2,2],f32>
      %1 = torch.aten.sum.dim_IntList %a, %dims, %false, %none : !torch.vtensor<[2,3],f32>, !torch.list<int>, !torch.bool, !torch.none -> !torch.vtensor<[2],f32>
      return %0, %1 : !torch.vtensor<[2,2],f32>, !torch.vtensor<[2],f32>
    }
    "};
    let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    let b = [1.0, 0.0, 0.0, 1.0, 1.0, 1.0];
    for target in TARGETS {
        let (module, actual) = Tester::lower(target, src);
        assert!(!actual.contains("torch."), "{actual}");
        let arguments = vec![
            array(target, vec![2, 3], ScalarType::F32, &a),
            array(target, vec![3, 2], ScalarType::F32, &b),
        ];
        let result = Tester::run(&module, "f", arguments);
        assert_eq!(result[0].values().unwrap(), vec![4.0, 5.0, 10.0, 11.0]);
        assert_eq!(result[1].values().unwrap(), vec![6.0, 15.0]);
    }
}

#[test]
fn strided_slice_and_transpose() {
    let src = indoc! {"
    func.func @f(%x : !torch.vtensor<[7],f32>, %y : !torch.vtensor<[2,3],f32>) -> (!torch.vtensor<[3],f32>, !torch.vtensor<[3,2],f32>) {
      %int0 = torch.constant.int 0
      %int1 = torch.constant.int 1
      %int2 = torch.constant.int 2
      %int6 = torch.constant.int 6
      %0 = torch.aten.slice.Tensor %x, %int0, %int1, %int6, %int2 : !torch.vtensor<[7],f32>, !torch.int, !torch.int, !torch.int, !torch.int -> !torch.vtensor<[3],f32>
      %1 = torch.aten.transpose.int %y, %int0, %int1 : !torch.vtensor<[2,3],f32>, !torch.int, !torch.int -> !torch.vtensor<[3,2],f32>
      return %0, %1 : !torch.vtensor<[3],f32>, !torch.vtensor<[3,2],f32>
    }
    "};
    let x = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    let y = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    for target in TARGETS {
        let (module, _) = Tester::lower(target, src);
        let arguments = vec![
            array(target, vec![7], ScalarType::F32, &x),
            array(target, vec![2, 3], ScalarType::F32, &y),
        ];
        let result = Tester::run(&module, "f", arguments);
        assert_eq!(result[0].values().unwrap(), vec![1.0, 3.0, 5.0]);
        let transposed = result[1].array().unwrap();
        assert_eq!(transposed.shape, vec![3, 2]);
        assert_eq!(transposed.values(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }
}

#[test]
fn quantize_round_trip() {
    let src = indoc! {"
    func.func @f(%x : !torch.vtensor<[6],f32>) -> !torch.vtensor<[6],f32> {
      %scale = torch.constant.float 0.1
      %zp = torch.constant.int 3
      %int12 = torch.constant.int 12
      %0 = torch.aten.quantize_per_tensor %x, %scale, %zp, %int12 : !torch.vtensor<[6],f32>, !torch.float, !torch.int, !torch.int -> !torch.vtensor<[6],!torch.qint8>
      %1 = torch.aten.dequantize.self %0 : !torch.vtensor<[6],!torch.qint8> -> !torch.vtensor<[6],f32>
      return %1 : !torch.vtensor<[6],f32>
    }
    "};
    // The representable range is [(-128 - 3) * 0.1, (127 - 3) * 0.1].
    let x = [-13.1, -1.234, 0.0, 0.05, 3.14159, 12.4];
    for target in TARGETS {
        let (module, _) = Tester::lower(target, src);
        let arguments = vec![array(target, vec![6], ScalarType::F32, &x)];
        let result = Tester::run(&module, "f", arguments);
        assert_close(&result[0].values().unwrap(), &x, 0.1 + 1e-5);
    }
}

#[test]
fn quantization_parameters_are_checked() {
    let src = indoc! {"
    func.func @f(%x : !torch.vtensor<[2],f32>) -> !torch.vtensor<[2],!torch.quint8> {
      %scale = torch.constant.float 0.5
      %zp = torch.constant.int 300
      %int13 = torch.constant.int 13
      %0 = torch.aten.quantize_per_tensor %x, %scale, %zp, %int13 : !torch.vtensor<[2],f32>, !torch.float, !torch.int, !torch.int -> !torch.vtensor<[2],!torch.quint8>
      return %0 : !torch.vtensor<[2],!torch.quint8>
    }
    "};
    for target in TARGETS {
        let (module, _) = Tester::parse(src);
        let err = lower(&module, &LoweringOptions::new(target)).err().unwrap();
        let err = err.downcast_ref::<Error>().unwrap();
        assert!(matches!(err, Error::AttributeRange { .. }), "{err}");
    }
}

#[test]
fn scalar_control_flow_to_loops() {
    let src = indoc! {"
    func.func @f(%n : !torch.int) -> (!torch.int, !torch.int) {
      %int0 = torch.constant.int 0
      %int1 = torch.constant.int 1
      %int2 = torch.constant.int 2
      %int3 = torch.constant.int 3
      %true = torch.constant.bool true
      %0 = torch.prim.Loop %n, %true, init(%int0) {
      ^bb0(%iv: !torch.int, %acc: !torch.int):
        %1 = torch.aten.add.int %acc, %iv : !torch.int, !torch.int -> !torch.int
        torch.prim.Loop.condition %true, iter(%1 : !torch.int)
      } : (!torch.int, !torch.bool, !torch.int) -> (!torch.int)
      %2 = torch.aten.lt.int %n, %int3 : !torch.int, !torch.int -> !torch.bool
      %3 = torch.prim.If %2 -> (!torch.int) {
        torch.prim.If.yield %int1 : !torch.int
      } else {
        torch.prim.If.yield %int2 : !torch.int
      }
      return %0, %3 : !torch.int, !torch.int
    }
    "};
    let (module, actual) = Tester::lower(Target::Loops, src);
    Tester::verify(module.clone());
    Tester::check_lines_contain(&actual, "scf.for\nscf.if\nreturn", Location::caller());
    let result = Tester::run(&module, "f", vec![Data::int(5)]);
    assert_eq!(result[0].scalar().unwrap(), Scalar::Int(10));
    assert_eq!(result[1].scalar().unwrap(), Scalar::Int(2));
    let result = Tester::run(&module, "f", vec![Data::int(0)]);
    assert_eq!(result[0].scalar().unwrap(), Scalar::Int(0));
    assert_eq!(result[1].scalar().unwrap(), Scalar::Int(1));
}

#[test]
fn while_loop_is_not_legalized() {
    let src = indoc! {"
    func.func @f(%n : !torch.int, %c : !torch.bool) -> !torch.int {
      %0 = torch.prim.Loop %n, %c, init(%n) {
      ^bb0(%iv: !torch.int, %acc: !torch.int):
        torch.prim.Loop.condition %c, iter(%acc : !torch.int)
      } : (!torch.int, !torch.bool, !torch.int) -> (!torch.int)
      return %0 : !torch.int
    }
    "};
    let (module, before) = Tester::parse(src);
    let err = lower(&module, &LoweringOptions::new(Target::Loops)).err().unwrap();
    let err = err.downcast_ref::<Error>().unwrap();
    assert!(matches!(err, Error::NotLegalized { op, .. } if op == "torch.prim.Loop"), "{err}");
    assert_eq!(module.rd().to_string(), before);
}

#[test]
fn lowering_is_idempotent() {
    let src = indoc! {"
    func.func @f(%x : !torch.vtensor<[4],f32>) -> !torch.vtensor<[4],f32> {
      %float6 = torch.constant.float 6.0
      %none = torch.constant.none
      %0 = torch.aten.clamp %x, %none, %float6 : !torch.vtensor<[4],f32>, !torch.none, !torch.float -> !torch.vtensor<[4],f32>
      %1 = torch.aten.sigmoid %0 : !torch.vtensor<[4],f32> -> !torch.vtensor<[4],f32>
      return %1 : !torch.vtensor<[4],f32>
    }
    "};
    for target in TARGETS {
        let (module, _) = Tester::parse(src);
        let options = LoweringOptions::new(target);
        let first = lower(&module, &options).unwrap();
        assert!(first.changed);
        let lowered = module.rd().to_string();
        let second = lower(&module, &options).unwrap();
        assert!(!second.changed, "{lowered}");
        assert_eq!(module.rd().to_string(), lowered);
    }
}

#[test]
fn units_fail_independently() {
    let good = indoc! {"
    func.func @f(%x : !torch.vtensor<[2],f32>) -> !torch.vtensor<[2],f32> {
      %0 = torch.aten.neg %x : !torch.vtensor<[2],f32> -> !torch.vtensor<[2],f32>
      return %0 : !torch.vtensor<[2],f32>
    }
    "};
    let bad = indoc! {"
    func.func @f(%x : !torch.vtensor<[?],f32>) -> !torch.vtensor<[?],f32> {
      %0 = torch.aten.neg %x : !torch.vtensor<[?],f32> -> !torch.vtensor<[?],f32>
      return %0 : !torch.vtensor<[?],f32>
    }
    "};
    let units = vec![Tester::parse(good).0, Tester::parse(bad).0];
    let results = lower_units(&units, &LoweringOptions::new(Target::Tosa));
    assert!(results[0].is_ok());
    let err = results[1].as_ref().err().unwrap();
    let err = err.downcast_ref::<Error>().unwrap();
    assert!(matches!(err, Error::Legalization { .. }), "{err}");
    assert!(units[0].rd().to_string().contains("tosa.negate"));
    assert!(units[1].rd().to_string().contains("torch.aten.neg"));
}
