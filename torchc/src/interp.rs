//! Reference evaluator for lowered IR.
//!
//! Executes `func`, `arith`, `math`, `scf`, `memref` and `tosa` ops
//! directly on the IR. It is slow and only meant to check that a lowering
//! computes the same numbers as the formulas of the torch ops.
//!
//! Integers are stored as `i64` and wrapped to the width of their type
//! after every op, so `ui8` values stay in `0..=255` and `i1` in `0..=1`.
//! Floats are stored as `f64` and rounded to `f32` when the type asks for
//! it; `f16` is approximated by `f32`.
use crate::dialect::arith;
use crate::dialect::func::CallOp;
use crate::dialect::func::FuncOp;
use crate::dialect::func::ReturnOp;
use crate::dialect::math;
use crate::dialect::memref;
use crate::dialect::scf;
use crate::dialect::tosa;
use crate::ir::scalar_type;
use crate::ir::shaped_type;
use crate::ir::Block;
use crate::ir::Literal;
use crate::ir::Op;
use crate::ir::ScalarType;
use crate::ir::ShapedKind;
use crate::ir::Value;
use crate::shared::ptr_id;
use crate::shared::Shared;
use crate::shared::SharedExt;
use anyhow::Result;
use std::collections::HashMap;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f64),
}

impl Scalar {
    pub fn as_f64(&self) -> f64 {
        match self {
            Scalar::Int(value) => *value as f64,
            Scalar::Float(value) => *value,
        }
    }
    pub fn as_i64(&self) -> i64 {
        match self {
            Scalar::Int(value) => *value,
            Scalar::Float(value) => *value as i64,
        }
    }
}

/// Wrap an integer to the width of `typ`.
fn wrap(value: i64, typ: ScalarType) -> i64 {
    match typ {
        ScalarType::I1 => value & 1,
        ScalarType::I8 => value as i8 as i64,
        ScalarType::UI8 => value as u8 as i64,
        ScalarType::I32 => value as i32 as i64,
        _ => value,
    }
}

fn round_float(value: f64, typ: ScalarType) -> f64 {
    match typ {
        ScalarType::F16 | ScalarType::F32 => value as f32 as f64,
        _ => value,
    }
}

/// `value` as an element of `typ`.
pub fn normalize(value: f64, typ: ScalarType) -> Scalar {
    if typ.is_float() {
        Scalar::Float(round_float(value, typ))
    } else {
        Scalar::Int(wrap(value as i64, typ))
    }
}

/// A dense row-major array.
#[derive(Clone, Debug, PartialEq)]
pub struct Array {
    pub shape: Vec<i64>,
    pub element: ScalarType,
    pub data: Vec<Scalar>,
}

impl Array {
    pub fn new(shape: Vec<i64>, element: ScalarType, values: &[f64]) -> Result<Self> {
        let count = shape.iter().product::<i64>() as usize;
        if values.len() != count {
            return Err(anyhow::anyhow!(
                "expected {count} values for shape {shape:?}, but got {}",
                values.len()
            ));
        }
        let data = values.iter().map(|v| normalize(*v, element)).collect();
        Ok(Array {
            shape,
            element,
            data,
        })
    }
    fn filled(shape: Vec<i64>, element: ScalarType, value: f64) -> Self {
        let count = shape.iter().product::<i64>() as usize;
        Array {
            data: vec![normalize(value, element); count],
            shape,
            element,
        }
    }
    pub fn values(&self) -> Vec<f64> {
        self.data.iter().map(Scalar::as_f64).collect()
    }
    fn offset(&self, index: &[i64]) -> Result<usize> {
        if index.len() != self.shape.len() {
            return Err(anyhow::anyhow!("expected {} indices", self.shape.len()));
        }
        let mut offset = 0;
        for (i, size) in index.iter().zip(&self.shape) {
            if *i < 0 || *i >= *size {
                return Err(anyhow::anyhow!(
                    "index {index:?} out of bounds for shape {:?}",
                    self.shape
                ));
            }
            offset = offset * size + i;
        }
        Ok(offset as usize)
    }
    fn get(&self, index: &[i64]) -> Result<Scalar> {
        Ok(self.data[self.offset(index)?])
    }
    /// Element at `index` of the broadcast result; size 1 dimensions
    /// repeat.
    fn get_broadcast(&self, index: &[i64]) -> Result<Scalar> {
        let index = index
            .iter()
            .zip(&self.shape)
            .map(|(i, size)| if *size == 1 { 0 } else { *i })
            .collect::<Vec<i64>>();
        self.get(&index)
    }
}

fn unravel(mut linear: i64, shape: &[i64]) -> Vec<i64> {
    let mut index = vec![0; shape.len()];
    for (i, size) in shape.iter().enumerate().rev() {
        index[i] = linear % size;
        linear /= size;
    }
    index
}

/// Every index of `shape` in row-major order.
fn indices(shape: &[i64]) -> impl Iterator<Item = Vec<i64>> + '_ {
    let count = shape.iter().product::<i64>();
    (0..count).map(move |linear| unravel(linear, shape))
}

/// A runtime value.
///
/// Tensors are immutable, memrefs are shared buffers that stores write
/// through.
#[derive(Clone, Debug)]
pub enum Data {
    Scalar(Scalar),
    Tensor(Array),
    Memref(Shared<Array>),
}

impl Data {
    pub fn int(value: i64) -> Data {
        Data::Scalar(Scalar::Int(value))
    }
    pub fn float(value: f64) -> Data {
        Data::Scalar(Scalar::Float(value))
    }
    pub fn tensor(shape: Vec<i64>, element: ScalarType, values: &[f64]) -> Result<Data> {
        Ok(Data::Tensor(Array::new(shape, element, values)?))
    }
    pub fn memref(shape: Vec<i64>, element: ScalarType, values: &[f64]) -> Result<Data> {
        let array = Array::new(shape, element, values)?;
        Ok(Data::Memref(Shared::new(array.into())))
    }
    pub fn scalar(&self) -> Result<Scalar> {
        match self {
            Data::Scalar(scalar) => Ok(*scalar),
            _ => Err(anyhow::anyhow!("expected a scalar, but got an array")),
        }
    }
    /// Snapshot of the array behind a tensor or memref.
    pub fn array(&self) -> Result<Array> {
        match self {
            Data::Tensor(array) => Ok(array.clone()),
            Data::Memref(buffer) => Ok(buffer.rd().clone()),
            Data::Scalar(_) => Err(anyhow::anyhow!("expected an array, but got a scalar")),
        }
    }
    pub fn values(&self) -> Result<Vec<f64>> {
        match self {
            Data::Scalar(scalar) => Ok(vec![scalar.as_f64()]),
            _ => Ok(self.array()?.values()),
        }
    }
}

fn scalar_of(value: &Shared<Value>) -> Result<ScalarType> {
    let typ = value.rd().typ()?;
    if let Some(scalar) = scalar_type(&typ) {
        return Ok(scalar);
    }
    match shaped_type(&typ) {
        Some(shaped) => Ok(shaped.element()),
        None => Err(anyhow::anyhow!("unsupported type {}", typ.rd())),
    }
}

/// Result of running a region: the values passed to its terminator.
type Yielded = Vec<Data>;

/// Evaluator for the functions of one module.
pub struct Interpreter {
    functions: HashMap<String, Shared<dyn Op>>,
}

struct Frame {
    values: HashMap<usize, Data>,
}

impl Frame {
    fn get(&self, value: &Shared<Value>) -> Result<Data> {
        match self.values.get(&ptr_id(value)) {
            Some(data) => Ok(data.clone()),
            None => {
                let name = value.rd().name().unwrap_or_default();
                Err(anyhow::anyhow!("value {name} is not defined"))
            }
        }
    }
    fn set(&mut self, value: &Shared<Value>, data: Data) {
        self.values.insert(ptr_id(value), data);
    }
}

fn operands(op: &dyn Op) -> Vec<Shared<Value>> {
    op.operation().rd().operands().values()
}

fn int_operands(frame: &Frame, op: &dyn Op) -> Result<Vec<i64>> {
    operands(op)
        .iter()
        .map(|value| Ok(frame.get(value)?.scalar()?.as_i64()))
        .collect()
}

fn float_operands(frame: &Frame, op: &dyn Op) -> Result<Vec<f64>> {
    operands(op)
        .iter()
        .map(|value| Ok(frame.get(value)?.scalar()?.as_f64()))
        .collect()
}

fn array_operand(frame: &Frame, op: &dyn Op, index: usize) -> Result<Array> {
    frame.get(&op.operand(index)?)?.array()
}

fn attribute_array(op: &dyn Op, name: &str) -> Result<Vec<i64>> {
    match op.operation().rd().attributes().get_array(name) {
        Some(values) => Ok(values),
        None => Err(anyhow::anyhow!("{} is missing attribute '{name}'", op.name())),
    }
}

fn compare_int(predicate: &str, a: i64, b: i64, typ: ScalarType) -> Result<bool> {
    let bits = typ.bit_width();
    let unsigned = |v: i64| if bits >= 64 { v as u64 } else { (v as u64) & ((1u64 << bits) - 1) };
    Ok(match predicate {
        "eq" => a == b,
        "ne" => a != b,
        "slt" => a < b,
        "sle" => a <= b,
        "sgt" => a > b,
        "sge" => a >= b,
        "ult" => unsigned(a) < unsigned(b),
        "ule" => unsigned(a) <= unsigned(b),
        "ugt" => unsigned(a) > unsigned(b),
        "uge" => unsigned(a) >= unsigned(b),
        _ => return Err(anyhow::anyhow!("unknown predicate {predicate}")),
    })
}

fn compare_float(predicate: &str, a: f64, b: f64) -> Result<bool> {
    let ordered = !a.is_nan() && !b.is_nan();
    Ok(ordered
        && match predicate {
            "oeq" => a == b,
            "one" => a != b,
            "olt" => a < b,
            "ole" => a <= b,
            "ogt" => a > b,
            "oge" => a >= b,
            _ => return Err(anyhow::anyhow!("unknown predicate {predicate}")),
        })
}

/// Float to integer conversion as done by `tosa.cast`: round to nearest
/// even and saturate.
fn saturate(value: f64, typ: ScalarType) -> i64 {
    let rounded = value.round_ties_even();
    match typ.int_range() {
        Some((min, max)) => (rounded.max(min as f64).min(max as f64)) as i64,
        None => rounded as i64,
    }
}

fn cast_scalar(value: Scalar, from: ScalarType, to: ScalarType) -> Scalar {
    match (from.is_float(), to.is_float()) {
        (_, true) => Scalar::Float(round_float(value.as_f64(), to)),
        (true, false) if to == ScalarType::I1 => Scalar::Int((value.as_f64() != 0.0) as i64),
        (true, false) => Scalar::Int(saturate(value.as_f64(), to)),
        (false, false) if to == ScalarType::I1 => Scalar::Int((value.as_i64() != 0) as i64),
        (false, false) => Scalar::Int(wrap(value.as_i64(), to)),
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

impl Interpreter {
    pub fn new(module: &Shared<dyn Op>) -> Self {
        let mut functions = HashMap::new();
        for op in module.rd().ops() {
            let name = op.rd().as_any().downcast_ref::<FuncOp>().and_then(|f| f.sym_name());
            if let Some(name) = name {
                functions.insert(name, op.clone());
            }
        }
        Interpreter { functions }
    }
    /// Call function `name` with `arguments`.
    pub fn call(&self, name: &str, arguments: Vec<Data>) -> Result<Vec<Data>> {
        let function = match self.functions.get(name) {
            Some(function) => function.clone(),
            None => return Err(anyhow::anyhow!("unknown function @{name}")),
        };
        debug!("Calling @{name}");
        let body = {
            let guard = function.rd();
            match guard.as_any().downcast_ref::<FuncOp>() {
                Some(func) => func.body()?,
                None => return Err(anyhow::anyhow!("@{name} is not a function")),
            }
        };
        let mut frame = Frame {
            values: HashMap::new(),
        };
        self.run_block(&mut frame, &body, arguments)
    }
    fn run_block(&self, frame: &mut Frame, block: &Shared<Block>, arguments: Vec<Data>) -> Result<Yielded> {
        let parameters = block.rd().arguments().into_iter().collect::<Vec<_>>();
        if parameters.len() != arguments.len() {
            return Err(anyhow::anyhow!(
                "expected {} arguments, but got {}",
                parameters.len(),
                arguments.len()
            ));
        }
        for (parameter, argument) in parameters.iter().zip(arguments) {
            frame.set(parameter, argument);
        }
        let ops = block.rd().ops().rd().clone();
        for op in ops {
            let guard = op.rd();
            let any = guard.as_any();
            if any.is::<ReturnOp>() || any.is::<scf::YieldOp>() {
                return operands(&*guard).iter().map(|value| frame.get(value)).collect();
            }
            let results = self.run_op(frame, &*guard)?;
            let values = guard.operation().rd().results();
            for (value, data) in values.into_iter().zip(results) {
                frame.set(&value, data);
            }
        }
        Ok(vec![])
    }
    fn run_region(&self, frame: &mut Frame, op: &dyn Op, index: usize, arguments: Vec<Data>) -> Result<Yielded> {
        let regions = op.operation().rd().regions();
        let block = regions.get(index).and_then(|region| region.rd().entry());
        match block {
            Some(block) => self.run_block(frame, &block, arguments),
            None => Err(anyhow::anyhow!("{} has no region #{index}", op.name())),
        }
    }
    fn run_op(&self, frame: &mut Frame, op: &dyn Op) -> Result<Vec<Data>> {
        let any = op.as_any();
        if any.is::<scf::ForOp>() {
            return self.run_for(frame, op);
        }
        if any.is::<scf::IfOp>() {
            let condition = frame.get(&op.operand(0)?)?.scalar()?.as_i64();
            let index = if condition != 0 { 0 } else { 1 };
            return self.run_region(frame, op, index, vec![]);
        }
        if let Some(call) = any.downcast_ref::<CallOp>() {
            let callee = match call.callee() {
                Some(callee) => callee,
                None => return Err(anyhow::anyhow!("call without callee")),
            };
            let callee = callee.trim_start_matches('@');
            let arguments = operands(op)
                .iter()
                .map(|value| frame.get(value))
                .collect::<Result<Vec<Data>>>()?;
            return self.call(callee, arguments);
        }
        if op.name().to_string().starts_with("tosa.") {
            return Ok(vec![Data::Tensor(run_tosa(frame, op)?)]);
        }
        if op.name().to_string().starts_with("memref.") {
            return run_memref(frame, op);
        }
        Ok(vec![run_scalar(frame, op)?])
    }
    fn run_for(&self, frame: &mut Frame, op: &dyn Op) -> Result<Vec<Data>> {
        let bounds = operands(op);
        if bounds.len() < 3 {
            return Err(anyhow::anyhow!("scf.for expects bounds"));
        }
        let lower = frame.get(&bounds[0])?.scalar()?.as_i64();
        let upper = frame.get(&bounds[1])?.scalar()?.as_i64();
        let step = frame.get(&bounds[2])?.scalar()?.as_i64();
        if step <= 0 {
            return Err(anyhow::anyhow!("scf.for step must be positive"));
        }
        let mut carried = bounds[3..]
            .iter()
            .map(|value| frame.get(value))
            .collect::<Result<Vec<Data>>>()?;
        let mut iv = lower;
        while iv < upper {
            let mut arguments = vec![Data::int(iv)];
            arguments.extend(carried);
            carried = self.run_region(frame, op, 0, arguments)?;
            iv += step;
        }
        Ok(carried)
    }
}

fn run_scalar(frame: &Frame, op: &dyn Op) -> Result<Data> {
    let typ = scalar_of(&op.result(0)?)?;
    let any = op.as_any();
    if any.is::<arith::ConstantOp>() {
        return match op.fold() {
            Some(Literal::Int(value)) => Ok(Data::Scalar(normalize(value as f64, typ))),
            Some(Literal::Float(value)) => Ok(Data::Scalar(normalize(value, typ))),
            Some(Literal::Bool(value)) => Ok(Data::int(value as i64)),
            _ => Err(anyhow::anyhow!("unsupported constant")),
        };
    }
    let int = |f: fn(i64, i64) -> Option<i64>| -> Result<Data> {
        let v = int_operands(frame, op)?;
        match f(v[0], v[1]) {
            Some(result) => Ok(Data::int(wrap(result, typ))),
            None => Err(anyhow::anyhow!("{} failed on {} and {}", op.name(), v[0], v[1])),
        }
    };
    let float = |f: fn(f64, f64) -> f64| -> Result<Data> {
        let v = float_operands(frame, op)?;
        Ok(Data::float(round_float(f(v[0], v[1]), typ)))
    };
    let unary = |f: fn(f64) -> f64| -> Result<Data> {
        let v = float_operands(frame, op)?;
        Ok(Data::float(round_float(f(v[0]), typ)))
    };
    if any.is::<arith::AddiOp>() {
        int(|a, b| Some(a.wrapping_add(b)))
    } else if any.is::<arith::SubiOp>() {
        int(|a, b| Some(a.wrapping_sub(b)))
    } else if any.is::<arith::MuliOp>() {
        int(|a, b| Some(a.wrapping_mul(b)))
    } else if any.is::<arith::DivsiOp>() {
        int(|a, b| a.checked_div(b))
    } else if any.is::<arith::RemsiOp>() {
        int(|a, b| a.checked_rem(b))
    } else if any.is::<arith::MaxsiOp>() {
        int(|a, b| Some(a.max(b)))
    } else if any.is::<arith::MinsiOp>() {
        int(|a, b| Some(a.min(b)))
    } else if any.is::<arith::AddfOp>() {
        float(|a, b| a + b)
    } else if any.is::<arith::SubfOp>() {
        float(|a, b| a - b)
    } else if any.is::<arith::MulfOp>() {
        float(|a, b| a * b)
    } else if any.is::<arith::DivfOp>() {
        float(|a, b| a / b)
    } else if any.is::<arith::MaximumfOp>() {
        float(|a, b| if a.is_nan() || b.is_nan() { f64::NAN } else { a.max(b) })
    } else if any.is::<arith::MinimumfOp>() {
        float(|a, b| if a.is_nan() || b.is_nan() { f64::NAN } else { a.min(b) })
    } else if any.is::<arith::NegfOp>() {
        unary(|x| -x)
    } else if any.is::<math::ExpOp>() {
        unary(f64::exp)
    } else if any.is::<math::TanhOp>() {
        unary(f64::tanh)
    } else if any.is::<math::AbsfOp>() {
        unary(f64::abs)
    } else if any.is::<math::RoundevenOp>() {
        unary(f64::round_ties_even)
    } else if any.is::<arith::CmpiOp>() || any.is::<arith::CmpfOp>() {
        let predicate = op.operation().rd().attributes().get_str("predicate");
        let predicate = predicate.unwrap_or_default();
        let lhs = op.operand(0)?;
        let result = if any.is::<arith::CmpiOp>() {
            let v = int_operands(frame, op)?;
            compare_int(&predicate, v[0], v[1], scalar_of(&lhs)?)?
        } else {
            let v = float_operands(frame, op)?;
            compare_float(&predicate, v[0], v[1])?
        };
        Ok(Data::int(result as i64))
    } else if any.is::<arith::SelectOp>() {
        let values = operands(op);
        let condition = frame.get(&values[0])?.scalar()?.as_i64();
        frame.get(&values[if condition != 0 { 1 } else { 2 }])
    } else {
        let value = op.operand(0)?;
        let from = scalar_of(&value)?;
        let x = frame.get(&value)?.scalar()?;
        let result = if any.is::<arith::UitofpOp>() {
            let bits = from.bit_width();
            let unsigned = if bits >= 64 {
                x.as_i64() as u64
            } else {
                (x.as_i64() as u64) & ((1u64 << bits) - 1)
            };
            Scalar::Float(round_float(unsigned as f64, typ))
        } else if any.is::<arith::FptosiOp>() || any.is::<arith::FptouiOp>() {
            Scalar::Int(wrap(x.as_f64().trunc() as i64, typ))
        } else if any.is::<arith::SitofpOp>()
            || any.is::<arith::ExtfOp>()
            || any.is::<arith::TruncfOp>()
            || any.is::<arith::ExtsiOp>()
            || any.is::<arith::TrunciOp>()
            || any.is::<arith::IndexCastOp>()
        {
            cast_scalar(x, from, typ)
        } else {
            return Err(anyhow::anyhow!("cannot evaluate {}", op.name()));
        };
        Ok(Data::Scalar(result))
    }
}

fn run_memref(frame: &Frame, op: &dyn Op) -> Result<Vec<Data>> {
    let any = op.as_any();
    if any.is::<memref::AllocOp>() {
        let typ = op.result(0)?.rd().typ()?;
        let shaped = match shaped_type(&typ) {
            Some(shaped) if shaped.kind() == ShapedKind::MemRef => shaped,
            _ => return Err(anyhow::anyhow!("memref.alloc expects a memref")),
        };
        let array = Array::filled(shaped.shape().to_vec(), shaped.element(), 0.0);
        return Ok(vec![Data::Memref(Shared::new(array.into()))]);
    }
    let values = operands(op);
    let (buffer, value, index) = if any.is::<memref::LoadOp>() {
        (&values[0], None, &values[1..])
    } else if any.is::<memref::StoreOp>() {
        (&values[1], Some(&values[0]), &values[2..])
    } else {
        return Err(anyhow::anyhow!("cannot evaluate {}", op.name()));
    };
    let index = index
        .iter()
        .map(|value| Ok(frame.get(value)?.scalar()?.as_i64()))
        .collect::<Result<Vec<i64>>>()?;
    let buffer = match frame.get(buffer)? {
        Data::Memref(buffer) => buffer,
        _ => return Err(anyhow::anyhow!("{} expects a memref", op.name())),
    };
    match value {
        None => {
            let element = buffer.rd().get(&index)?;
            Ok(vec![Data::Scalar(element)])
        }
        Some(value) => {
            let element = frame.get(value)?.scalar()?;
            let mut array = buffer.wr();
            let offset = array.offset(&index)?;
            array.data[offset] = element;
            Ok(vec![])
        }
    }
}

fn elementwise(inputs: &[Array], element: ScalarType, f: &dyn Fn(&[Scalar]) -> Scalar) -> Result<Array> {
    let mut shape = inputs[0].shape.clone();
    for input in &inputs[1..] {
        shape = tosa::broadcast_shape(&shape, &input.shape)?;
    }
    let mut data = vec![];
    for index in indices(&shape) {
        let args = inputs
            .iter()
            .map(|input| input.get_broadcast(&index))
            .collect::<Result<Vec<Scalar>>>()?;
        data.push(f(&args));
    }
    Ok(Array {
        shape,
        element,
        data,
    })
}

fn arithmetic(element: ScalarType, a: Scalar, b: Scalar, int: fn(i64, i64) -> i64, float: fn(f64, f64) -> f64) -> Scalar {
    if element.is_float() {
        Scalar::Float(round_float(float(a.as_f64(), b.as_f64()), element))
    } else {
        Scalar::Int(wrap(int(a.as_i64(), b.as_i64()), element))
    }
}

fn float_map(element: ScalarType, f: fn(f64) -> f64) -> impl Fn(&[Scalar]) -> Scalar {
    move |v: &[Scalar]| Scalar::Float(round_float(f(v[0].as_f64()), element))
}

fn run_tosa(frame: &Frame, op: &dyn Op) -> Result<Array> {
    let any = op.as_any();
    let result = op.result(0)?.rd().typ()?;
    let result = match shaped_type(&result) {
        Some(result) => result,
        None => return Err(anyhow::anyhow!("{} expects a tensor result", op.name())),
    };
    let element = result.element();
    let attributes = op.operation().rd().attributes();
    if let Some(constant) = any.downcast_ref::<tosa::ConstOp>() {
        let value = match constant.value() {
            Some(value) => value,
            None => return Err(anyhow::anyhow!("tosa.const without value")),
        };
        let values = value.expand(result.num_elements() as usize);
        return Array::new(result.shape().to_vec(), element, &values);
    }
    let x = array_operand(frame, op, 0)?;
    let binary = |int: fn(i64, i64) -> i64, float: fn(f64, f64) -> f64| -> Result<Array> {
        let y = array_operand(frame, op, 1)?;
        elementwise(&[x.clone(), y], element, &|v| arithmetic(element, v[0], v[1], int, float))
    };
    if any.is::<tosa::AddOp>() {
        binary(i64::wrapping_add, |a, b| a + b)
    } else if any.is::<tosa::SubOp>() {
        binary(i64::wrapping_sub, |a, b| a - b)
    } else if any.is::<tosa::MulOp>() {
        binary(i64::wrapping_mul, |a, b| a * b)
    } else if any.is::<tosa::MaximumOp>() {
        binary(i64::max, f64::max)
    } else if any.is::<tosa::MinimumOp>() {
        binary(i64::min, f64::min)
    } else if any.is::<tosa::ReciprocalOp>() {
        elementwise(&[x], element, &float_map(element, |v| 1.0 / v))
    } else if any.is::<tosa::ExpOp>() {
        elementwise(&[x], element, &float_map(element, f64::exp))
    } else if any.is::<tosa::TanhOp>() {
        elementwise(&[x], element, &float_map(element, f64::tanh))
    } else if any.is::<tosa::SigmoidOp>() {
        elementwise(&[x], element, &float_map(element, sigmoid))
    } else if any.is::<tosa::NegateOp>() || any.is::<tosa::AbsOp>() {
        let negate = any.is::<tosa::NegateOp>();
        elementwise(&[x], element, &|v| match v[0] {
            Scalar::Float(f) => Scalar::Float(if negate { -f } else { f.abs() }),
            Scalar::Int(i) => Scalar::Int(wrap(if negate { i.wrapping_neg() } else { i.wrapping_abs() }, element)),
        })
    } else if any.is::<tosa::ClampOp>() {
        let min_fp = attributes.get_float("min_fp").unwrap_or(f64::MIN);
        let max_fp = attributes.get_float("max_fp").unwrap_or(f64::MAX);
        let min_int = attributes.get_int("min_int").unwrap_or(i64::MIN);
        let max_int = attributes.get_int("max_int").unwrap_or(i64::MAX);
        elementwise(&[x], element, &|v| match v[0] {
            Scalar::Float(f) => Scalar::Float(f.max(min_fp).min(max_fp)),
            Scalar::Int(i) => Scalar::Int(i.max(min_int).min(max_int)),
        })
    } else if any.is::<tosa::CastOp>() {
        let from = x.element;
        elementwise(&[x], element, &|v| cast_scalar(v[0], from, element))
    } else if any.is::<tosa::ReshapeOp>() {
        Ok(Array {
            shape: attribute_array(op, "new_shape")?,
            element,
            data: x.data,
        })
    } else if any.is::<tosa::TransposeOp>() {
        let perms = attribute_array(op, "perms")?;
        gather(&x, result.shape(), |index| {
            let mut source = vec![0; index.len()];
            for (i, perm) in perms.iter().enumerate() {
                source[*perm as usize] = index[i];
            }
            source
        })
    } else if any.is::<tosa::SliceOp>() {
        let start = attribute_array(op, "start")?;
        gather(&x, result.shape(), |index| {
            index.iter().zip(&start).map(|(i, s)| i + s).collect()
        })
    } else if any.is::<tosa::TileOp>() {
        let shape = x.shape.clone();
        gather(&x, result.shape(), |index| {
            index.iter().zip(&shape).map(|(i, size)| i % size).collect()
        })
    } else if any.is::<tosa::PadOp>() {
        let padding = attribute_array(op, "padding")?;
        let pad = attributes.get_float("pad_const").unwrap_or(0.0);
        let mut output = Array::filled(result.shape().to_vec(), element, pad);
        for index in indices(&x.shape) {
            let target = index
                .iter()
                .enumerate()
                .map(|(i, v)| v + padding[2 * i])
                .collect::<Vec<i64>>();
            let offset = output.offset(&target)?;
            output.data[offset] = x.get(&index)?;
        }
        Ok(output)
    } else if any.is::<tosa::MatmulOp>() {
        let y = array_operand(frame, op, 1)?;
        let contracted = x.shape[2];
        let mut output = Array::filled(result.shape().to_vec(), element, 0.0);
        for index in indices(result.shape()) {
            let mut sum = normalize(0.0, element);
            for k in 0..contracted {
                let a = x.get(&[index[0], index[1], k])?;
                let b = y.get(&[index[0], k, index[2]])?;
                let product = arithmetic(element, a, b, i64::wrapping_mul, |a, b| a * b);
                sum = arithmetic(element, sum, product, i64::wrapping_add, |a, b| a + b);
            }
            let offset = output.offset(&index)?;
            output.data[offset] = sum;
        }
        Ok(output)
    } else if any.is::<tosa::ReduceSumOp>() {
        let axis = attributes.get_int("axis").unwrap_or(0) as usize;
        let mut output = Array::filled(result.shape().to_vec(), element, 0.0);
        for index in indices(&x.shape) {
            let mut target = index.clone();
            target[axis] = 0;
            let offset = output.offset(&target)?;
            let value = x.get(&index)?;
            output.data[offset] = arithmetic(element, output.data[offset], value, i64::wrapping_add, |a, b| a + b);
        }
        Ok(output)
    } else {
        Err(anyhow::anyhow!("cannot evaluate {}", op.name()))
    }
}

/// Array of `shape` where each element is read from `source` at the
/// index that `map` gives.
fn gather(source: &Array, shape: &[i64], map: impl Fn(&[i64]) -> Vec<i64>) -> Result<Array> {
    let data = indices(shape)
        .map(|index| source.get(&map(&index)))
        .collect::<Result<Vec<Scalar>>>()?;
    Ok(Array {
        shape: shape.to_vec(),
        element: source.element,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::DefaultParserDispatch;
    use crate::frontend::Parser;
    use indoc::indoc;

    #[test]
    fn test_scf_for_sum() {
        let src = indoc! {"
        func.func @sum(%n : index) -> i64 {
          %c0 = arith.constant 0 : index
          %c1 = arith.constant 1 : index
          %zero = arith.constant 0 : i64
          %0 = scf.for %i = %c0 to %n step %c1 iter_args(%acc = %zero) -> (i64) {
            %1 = arith.index_cast %i : index -> i64
            %2 = arith.addi %acc, %1 : i64, i64 -> i64
            scf.yield %2 : i64
          }
          return %0 : i64
        }"};
        let module = Parser::<DefaultParserDispatch>::parse(src).unwrap();
        let interpreter = Interpreter::new(&module);
        let result = interpreter.call("sum", vec![Data::int(5)]).unwrap();
        assert_eq!(result[0].scalar().unwrap(), Scalar::Int(10));
    }

    #[test]
    fn test_wrapping() {
        assert_eq!(wrap(256 + 3, ScalarType::UI8), 3);
        assert_eq!(wrap(-1, ScalarType::UI8), 255);
        assert_eq!(wrap(200, ScalarType::I8), -56);
        assert_eq!(saturate(300.0, ScalarType::I8), 127);
        assert_eq!(saturate(2.5, ScalarType::I8), 2);
    }

    #[test]
    fn test_tosa_broadcast_add() {
        let src = indoc! {"
        func.func @f(%a : tensor<3x1xf32>, %b : tensor<1x4xf32>) -> tensor<3x4xf32> {
          %0 = tosa.add %a, %b : tensor<3x1xf32>, tensor<1x4xf32> -> tensor<3x4xf32>
          return %0 : tensor<3x4xf32>
        }"};
        let module = Parser::<DefaultParserDispatch>::parse(src).unwrap();
        let a = Data::tensor(vec![3, 1], ScalarType::F32, &[1.0, 2.0, 3.0]).unwrap();
        let b = Data::tensor(vec![1, 4], ScalarType::F32, &[10.0, 20.0, 30.0, 40.0]).unwrap();
        let result = Interpreter::new(&module).call("f", vec![a, b]).unwrap();
        let array = result[0].array().unwrap();
        assert_eq!(array.shape, vec![3, 4]);
        assert_eq!(array.values()[5], 22.0);
    }
}
