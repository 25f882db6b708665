use crate::convert::RewriteResult;
use crate::dialect::torch::TensorInfo;
use crate::dialect::torch::TorchType;
use crate::frontend::finish_op;
use crate::frontend::Parse;
use crate::frontend::Parser;
use crate::frontend::ParserDispatch;
use crate::frontend::TokenKind;
use crate::ir::replace_all_uses_with;
use crate::ir::same_type;
use crate::ir::simple_op;
use crate::ir::uses;
use crate::ir::Attribute;
use crate::ir::Attributes;
use crate::ir::Block;
use crate::ir::BooleanAttr;
use crate::ir::FloatAttr;
use crate::ir::IntegerAttr;
use crate::ir::Literal;
use crate::ir::Op;
use crate::ir::OpOperands;
use crate::ir::Operation;
use crate::ir::OperationName;
use crate::ir::StringAttr;
use crate::ir::Value;
use crate::shared::Shared;
use crate::shared::SharedExt;
use crate::verify::SymbolTable;
use anyhow::Result;
use std::fmt::Formatter;
use std::sync::Arc;

/// Constant value of `value`, if the op that defines it folds.
pub fn fold_value(value: &Shared<Value>) -> Option<Literal> {
    let op = value.rd().defining_op()?;
    let op = op.rd();
    op.fold()
}

pub fn fold_int(value: &Shared<Value>) -> Option<i64> {
    match fold_value(value)? {
        Literal::Int(value) => Some(value),
        _ => None,
    }
}

/// Constant float; integers widen to floats.
pub fn fold_float(value: &Shared<Value>) -> Option<f64> {
    fold_value(value)?.as_float()
}

pub fn fold_bool(value: &Shared<Value>) -> Option<bool> {
    fold_value(value)?.as_bool()
}

/// Elements of a `torch.prim.ListConstruct` when they all fold to integers.
pub fn fold_int_list(value: &Shared<Value>) -> Option<Vec<i64>> {
    let op = value.rd().defining_op()?;
    let op = op.rd();
    op.as_any().downcast_ref::<ListConstructOp>()?;
    let operands = op.operation().rd().operands();
    operands
        .values()
        .iter()
        .map(fold_int)
        .collect::<Option<Vec<i64>>>()
}

/// Whether `value` is a known `none`.
pub fn is_none_value(value: &Shared<Value>) -> bool {
    matches!(fold_value(value), Some(Literal::None))
}

/// The torch type of `value`, if it has one.
pub fn value_torch_type(value: &Shared<Value>) -> Option<TorchType> {
    let typ = value.rd().typ().ok()?;
    crate::dialect::torch::torch_type(&typ)
}

/// Tensor info of a value of either tensor kind.
pub fn value_tensor_info(value: &Shared<Value>) -> Option<TensorInfo> {
    value_torch_type(value)?.tensor_info().cloned()
}

pub(crate) fn operand_type(op: &dyn Op, index: usize) -> Result<TorchType> {
    let value = op.operand(index)?;
    match value_torch_type(&value) {
        Some(typ) => Ok(typ),
        None => Err(anyhow::anyhow!("expected operand #{index} to have a torch type")),
    }
}

pub(crate) fn result_type(op: &dyn Op, index: usize) -> Result<TorchType> {
    let value = op.result(index)?;
    match value_torch_type(&value) {
        Some(typ) => Ok(typ),
        None => Err(anyhow::anyhow!("expected result #{index} to have a torch type")),
    }
}

fn num_operands(op: &dyn Op) -> usize {
    op.operation().rd().operands().len()
}

fn num_results(op: &dyn Op) -> usize {
    op.operation().rd().results().len()
}

/// Check the operand and result counts and that every operand and result
/// is a subtype of the expected type.
fn expect_signature(op: &dyn Op, operands: &[TorchType], results: &[TorchType]) -> Result<()> {
    if num_operands(op) != operands.len() {
        return Err(anyhow::anyhow!(
            "expected {} operands, but got {}",
            operands.len(),
            num_operands(op)
        ));
    }
    if num_results(op) != results.len() {
        return Err(anyhow::anyhow!(
            "expected {} results, but got {}",
            results.len(),
            num_results(op)
        ));
    }
    for (i, expected) in operands.iter().enumerate() {
        let actual = operand_type(op, i)?;
        if !actual.is_subtype(expected) {
            return Err(anyhow::anyhow!("operand #{i} must be {expected}, but got {actual}"));
        }
    }
    for (i, expected) in results.iter().enumerate() {
        let actual = result_type(op, i)?;
        if !actual.is_subtype(expected) {
            return Err(anyhow::anyhow!("result #{i} must be {expected}, but got {actual}"));
        }
    }
    Ok(())
}

/// Point the uses of the single result of `op` to `value` and remove `op`.
pub(crate) fn replace_op_with_value(op: &dyn Op, value: &Shared<Value>) -> Result<RewriteResult> {
    let result = op.result(0)?;
    let changed = RewriteResult::changed_around(op)?;
    replace_all_uses_with(&result, value);
    op.remove()?;
    Ok(changed)
}

fn parse_constant<T: ParserDispatch, O: Op + 'static>(
    parser: &mut Parser<T>,
    parent: Option<Shared<Block>>,
    typ: TorchType,
    literal: impl FnOnce(&mut Parser<T>) -> Result<Option<Arc<dyn Attribute>>>,
) -> Result<Shared<dyn Op>> {
    let mut operation = Operation::default();
    operation.set_parent(parent);
    let results = parser.parse_op_results_into(&mut operation)?;
    parser.parse_operation_name_into::<O>(&mut operation)?;
    if let Some(value) = literal(parser)? {
        operation.attributes().insert("value", value);
    }
    results.set_types(vec![typ.shared()])?;
    Ok(finish_op::<O>(operation, results))
}

fn display_constant(op: &dyn Op, f: &mut Formatter<'_>) -> std::fmt::Result {
    let operation = op.operation().rd();
    operation.display_results(f)?;
    write!(f, "{}", operation.name())?;
    if let Some(value) = operation.attributes().get("value") {
        write!(f, " {value}")?;
    }
    Ok(())
}

/// Define a `torch.constant.*` op that prints as `%r = name literal`.
macro_rules! constant_op {
    ($(#[$meta:meta])* $ty:ident, $mnemonic:literal, $typ:expr, $literal:ident, $fold:expr) => {
        $(#[$meta])*
        pub struct $ty {
            operation: Shared<Operation>,
        }

        impl Op for $ty {
            fn operation_name() -> OperationName {
                OperationName::new($mnemonic.to_string())
            }
            fn new(operation: Shared<Operation>) -> Self {
                $ty { operation }
            }
            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
            fn operation(&self) -> &Shared<Operation> {
                &self.operation
            }
            fn is_const(&self) -> bool {
                true
            }
            fn is_pure(&self) -> bool {
                true
            }
            fn fold(&self) -> Option<Literal> {
                let attributes = self.operation.rd().attributes();
                let fold: fn(&Attributes) -> Option<Literal> = $fold;
                fold(&attributes)
            }
            fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
                expect_signature(self, &[], &[$typ])?;
                match self.fold() {
                    Some(_) => Ok(()),
                    None => Err(anyhow::anyhow!("requires a literal value")),
                }
            }
            fn display(&self, f: &mut Formatter<'_>, _indent: i32) -> std::fmt::Result {
                display_constant(self, f)
            }
        }

        impl Parse for $ty {
            fn op<T: ParserDispatch>(
                parser: &mut Parser<T>,
                parent: Option<Shared<Block>>,
            ) -> Result<Shared<dyn Op>> {
                parse_constant::<T, $ty>(parser, parent, $typ, $literal::<T>)
            }
        }
    };
}

fn no_literal<T: ParserDispatch>(_parser: &mut Parser<T>) -> Result<Option<Arc<dyn Attribute>>> {
    Ok(None)
}

fn bool_literal<T: ParserDispatch>(parser: &mut Parser<T>) -> Result<Option<Arc<dyn Attribute>>> {
    Ok(Some(Arc::new(BooleanAttr::new(parser.parse_boolean()?))))
}

fn int_literal<T: ParserDispatch>(parser: &mut Parser<T>) -> Result<Option<Arc<dyn Attribute>>> {
    Ok(Some(Arc::new(IntegerAttr::new(parser.parse_integer()?))))
}

fn float_literal<T: ParserDispatch>(parser: &mut Parser<T>) -> Result<Option<Arc<dyn Attribute>>> {
    Ok(Some(Arc::new(FloatAttr::new(parser.parse_float()?))))
}

fn str_literal<T: ParserDispatch>(parser: &mut Parser<T>) -> Result<Option<Arc<dyn Attribute>>> {
    Ok(Some(Arc::new(StringAttr::new(&parser.parse_string()?))))
}

constant_op!(
    /// `torch.constant.none`
    ///
    /// ```mlir
    /// %none = torch.constant.none
    /// ```
    ConstantNoneOp,
    "torch.constant.none",
    TorchType::None,
    no_literal,
    |_| Some(Literal::None)
);

constant_op!(
    /// `torch.constant.bool`
    ///
    /// ```mlir
    /// %true = torch.constant.bool true
    /// ```
    ConstantBoolOp,
    "torch.constant.bool",
    TorchType::Bool,
    bool_literal,
    |attributes| attributes.get_bool("value").map(Literal::Bool)
);

constant_op!(
    /// `torch.constant.int`
    ///
    /// ```mlir
    /// %int1 = torch.constant.int 1
    /// ```
    ConstantIntOp,
    "torch.constant.int",
    TorchType::Int,
    int_literal,
    |attributes| attributes.get_int("value").map(Literal::Int)
);

constant_op!(
    /// `torch.constant.float`
    ///
    /// ```mlir
    /// %float1.0 = torch.constant.float 1.0
    /// ```
    ConstantFloatOp,
    "torch.constant.float",
    TorchType::Float,
    float_literal,
    |attributes| attributes.get_float("value").map(Literal::Float)
);

constant_op!(
    /// `torch.constant.str`
    ConstantStrOp,
    "torch.constant.str",
    TorchType::Str,
    str_literal,
    |attributes| attributes.get_str("value").map(Literal::Str)
);

constant_op!(
    /// `torch.constant.device`
    ///
    /// ```mlir
    /// %cpu = torch.constant.device "cpu"
    /// ```
    ConstantDeviceOp,
    "torch.constant.device",
    TorchType::Device,
    str_literal,
    |attributes| attributes.get_str("value").map(Literal::Str)
);

/// Check that an op converts between the two tensor kinds without changing
/// the static information.
fn verify_copy(op: &dyn Op, to_value: bool) -> Result<()> {
    let operand = operand_type(op, 0)?;
    let result = result_type(op, 0)?;
    let (from, to) = match (&operand, &result) {
        (TorchType::NonValueTensor(from), TorchType::ValueTensor(to)) if to_value => (from, to),
        (TorchType::ValueTensor(from), TorchType::NonValueTensor(to)) if !to_value => (from, to),
        _ => {
            return Err(anyhow::anyhow!(
                "cannot copy from {operand} to {result}; the copy has to switch tensor kinds"
            ));
        }
    };
    if from != to {
        return Err(anyhow::anyhow!(
            "operand {operand} and result {result} must have the same shape and dtype"
        ));
    }
    Ok(())
}

simple_op!(
    /// `torch.tensor_static_info_cast`
    ///
    /// Changes the static information of a tensor without changing the
    /// tensor kind. Used to bridge between refined and declared types.
    TensorStaticInfoCastOp,
    "torch.tensor_static_info_cast",
    {
        fn is_pure(&self) -> bool {
            true
        }
        fn allows_type_refinement(&self) -> bool {
            true
        }
        fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
            if num_operands(self) != 1 || num_results(self) != 1 {
                return Err(anyhow::anyhow!("expected one operand and one result"));
            }
            let operand = operand_type(self, 0)?;
            let result = result_type(self, 0)?;
            let compatible = match (&operand, &result) {
                (TorchType::ValueTensor(a), TorchType::ValueTensor(b)) => a.meet(b).is_some(),
                (TorchType::NonValueTensor(a), TorchType::NonValueTensor(b)) => {
                    a.meet(b).is_some()
                }
                _ => false,
            };
            if !compatible {
                return Err(anyhow::anyhow!("cannot cast {operand} to {result}"));
            }
            Ok(())
        }
        fn canonicalize(&self) -> Result<RewriteResult> {
            let operand = self.operand(0)?;
            let result_type = self.result(0)?.rd().typ()?;
            if same_type(&operand.rd().typ()?, &result_type) {
                return replace_op_with_value(self, &operand);
            }
            let producer = operand.rd().defining_op();
            if let Some(producer) = producer {
                let producer = producer.rd();
                if producer.as_any().is::<TensorStaticInfoCastOp>() {
                    let original = producer.operand(0)?;
                    if same_type(&original.rd().typ()?, &result_type) {
                        return replace_op_with_value(self, &original);
                    }
                }
            }
            Ok(RewriteResult::Unchanged)
        }
    }
);

simple_op!(
    /// `torch.copy.to_vtensor`
    ///
    /// Snapshot of a non-value tensor as a value tensor.
    CopyToVtensorOp,
    "torch.copy.to_vtensor",
    {
        fn is_pure(&self) -> bool {
            true
        }
        fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
            verify_copy(self, true)
        }
        fn canonicalize(&self) -> Result<RewriteResult> {
            let operand = self.operand(0)?;
            let producer = match operand.rd().defining_op() {
                Some(producer) => producer,
                None => return Ok(RewriteResult::Unchanged),
            };
            if !producer.rd().as_any().is::<CopyToTensorOp>() || uses(&operand).len() != 1 {
                return Ok(RewriteResult::Unchanged);
            }
            let original = producer.rd().operand(0)?;
            let changed = replace_op_with_value(self, &original)?;
            producer.rd().remove()?;
            Ok(changed)
        }
    }
);

simple_op!(
    /// `torch.copy.to_tensor`
    ///
    /// Copy of a value tensor into a fresh non-value tensor.
    CopyToTensorOp,
    "torch.copy.to_tensor",
    {
        fn is_pure(&self) -> bool {
            true
        }
        fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
            verify_copy(self, false)
        }
    }
);

simple_op!(
    /// `torch.derefine`
    ///
    /// Casts a value to a supertype, such as `!torch.int` to
    /// `!torch.optional<int>`.
    DerefineOp,
    "torch.derefine",
    {
        fn is_pure(&self) -> bool {
            true
        }
        fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
            let operand = operand_type(self, 0)?;
            let result = result_type(self, 0)?;
            if !operand.is_subtype(&result) {
                return Err(anyhow::anyhow!("{operand} is not a subtype of {result}"));
            }
            Ok(())
        }
        fn fold(&self) -> Option<Literal> {
            fold_value(&self.operand(0).ok()?)
        }
    }
);

simple_op!(
    /// `torch.prim.ListConstruct`
    ListConstructOp,
    "torch.prim.ListConstruct",
    {
        fn is_pure(&self) -> bool {
            true
        }
        fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
            let element = match result_type(self, 0)? {
                TorchType::List(element) => *element,
                other => return Err(anyhow::anyhow!("expected a list result, but got {other}")),
            };
            for i in 0..num_operands(self) {
                let operand = operand_type(self, i)?;
                if !operand.is_subtype(&element) {
                    return Err(anyhow::anyhow!(
                        "element #{i} of type {operand} is not a subtype of {element}"
                    ));
                }
            }
            Ok(())
        }
    }
);

simple_op!(
    /// `torch.prim.TupleConstruct`
    TupleConstructOp,
    "torch.prim.TupleConstruct",
    {
        fn is_pure(&self) -> bool {
            true
        }
        fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
            let elements = match result_type(self, 0)? {
                TorchType::Tuple(elements) => elements,
                other => return Err(anyhow::anyhow!("expected a tuple result, but got {other}")),
            };
            if elements.len() != num_operands(self) {
                return Err(anyhow::anyhow!(
                    "expected {} elements, but got {}",
                    elements.len(),
                    num_operands(self)
                ));
            }
            for (i, element) in elements.iter().enumerate() {
                let operand = operand_type(self, i)?;
                if !operand.is_subtype(element) {
                    return Err(anyhow::anyhow!(
                        "element #{i} of type {operand} is not a subtype of {element}"
                    ));
                }
            }
            Ok(())
        }
    }
);

/// `torch.prim.DictConstruct`
///
/// ```ebnf
/// `torch.prim.DictConstruct` `keys` `(` $keys `:` type($keys) `)`
///     `values` `(` $values `:` type($values) `)` `->` type($result)
/// ```
///
/// The keys come first in the operand list, followed by the values. The
/// number of keys is kept in the `num_keys` attribute, which is not printed.
pub struct DictConstructOp {
    operation: Shared<Operation>,
}

impl DictConstructOp {
    fn num_keys(&self) -> usize {
        let attributes = self.operation.rd().attributes();
        attributes.get_int("num_keys").unwrap_or(0).max(0) as usize
    }
    pub fn keys(&self) -> Vec<Shared<Value>> {
        let values = self.operation.rd().operands().values();
        values.into_iter().take(self.num_keys()).collect()
    }
    pub fn values(&self) -> Vec<Shared<Value>> {
        let values = self.operation.rd().operands().values();
        values.into_iter().skip(self.num_keys()).collect()
    }
}

fn display_group(f: &mut Formatter<'_>, keyword: &str, values: &[Shared<Value>]) -> std::fmt::Result {
    write!(f, " {keyword}(")?;
    if !values.is_empty() {
        let operands = OpOperands::from_values(values);
        let types = operands.types().map_err(|_| std::fmt::Error)?;
        write!(f, "{operands} : {types}")?;
    }
    write!(f, ")")
}

impl Op for DictConstructOp {
    fn operation_name() -> OperationName {
        OperationName::new("torch.prim.DictConstruct".to_string())
    }
    fn new(operation: Shared<Operation>) -> Self {
        DictConstructOp { operation }
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn operation(&self) -> &Shared<Operation> {
        &self.operation
    }
    fn is_pure(&self) -> bool {
        true
    }
    fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
        let (key_type, value_type) = match result_type(self, 0)? {
            TorchType::Dict(key, value) => (*key, *value),
            other => return Err(anyhow::anyhow!("expected a dict result, but got {other}")),
        };
        let keys = self.keys();
        let values = self.values();
        if keys.len() != values.len() {
            return Err(anyhow::anyhow!(
                "got {} keys, but {} values; keys and values must have the same length",
                keys.len(),
                values.len()
            ));
        }
        for (expected, group) in [(&key_type, &keys), (&value_type, &values)] {
            for value in group {
                let actual = value_torch_type(value).unwrap_or(TorchType::Any);
                if !actual.is_subtype(expected) {
                    return Err(anyhow::anyhow!("{actual} is not a subtype of {expected}"));
                }
            }
        }
        Ok(())
    }
    fn display(&self, f: &mut Formatter<'_>, _indent: i32) -> std::fmt::Result {
        let operation = self.operation.rd();
        operation.display_results(f)?;
        write!(f, "{}", operation.name())?;
        display_group(f, "keys", &self.keys())?;
        display_group(f, "values", &self.values())?;
        let types = operation.result_types().map_err(|_| std::fmt::Error)?;
        write!(f, " -> {types}")
    }
}

impl<T: ParserDispatch> Parser<T> {
    /// Parse `keyword(%a, %b : T_a, T_b)` and return the values.
    fn parse_operand_group(&mut self, keyword: &str) -> Result<Vec<Shared<Value>>> {
        self.parse_keyword(keyword)?;
        self.expect(TokenKind::LParen)?;
        let operands = self.parse_op_operands()?;
        if !operands.is_empty() {
            self.expect(TokenKind::Colon)?;
            let types = self.parse_types()?;
            self.verify_operand_types(&operands, &types)?;
        }
        self.expect(TokenKind::RParen)?;
        Ok(operands.values())
    }
}

impl Parse for DictConstructOp {
    fn op<T: ParserDispatch>(
        parser: &mut Parser<T>,
        parent: Option<Shared<Block>>,
    ) -> Result<Shared<dyn Op>> {
        let mut operation = Operation::default();
        operation.set_parent(parent);
        let results = parser.parse_op_results_into(&mut operation)?;
        parser.parse_operation_name_into::<DictConstructOp>(&mut operation)?;
        let mut values = parser.parse_operand_group("keys")?;
        let num_keys = values.len();
        values.extend(parser.parse_operand_group("values")?);
        operation.set_operands(OpOperands::from_values(&values));
        let attributes = Attributes::new();
        attributes.insert("num_keys", Arc::new(IntegerAttr::new(num_keys as i64)));
        operation.set_attributes(attributes);
        parser.expect(TokenKind::Arrow)?;
        let types = parser.parse_result_types()?;
        results.set_types(types.vec())?;
        Ok(finish_op::<DictConstructOp>(operation, results))
    }
}

fn fold_int_operands(op: &dyn Op) -> Option<(i64, i64)> {
    let lhs = fold_int(&op.operand(0).ok()?)?;
    let rhs = fold_int(&op.operand(1).ok()?)?;
    Some((lhs, rhs))
}

/// Define a binary op on `!torch.int` that folds with `$fold`.
macro_rules! int_binary_op {
    ($(#[$meta:meta])* $ty:ident, $mnemonic:literal, $result:expr, $fold:expr) => {
        simple_op!(
            $(#[$meta])*
            $ty,
            $mnemonic,
            {
                fn is_pure(&self) -> bool {
                    true
                }
                fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
                    expect_signature(self, &[TorchType::Int, TorchType::Int], &[$result])
                }
                fn fold(&self) -> Option<Literal> {
                    let (lhs, rhs) = fold_int_operands(self)?;
                    let fold: fn(i64, i64) -> Literal = $fold;
                    Some(fold(lhs, rhs))
                }
            }
        );
    };
}

int_binary_op!(
    /// `torch.aten.add.int`
    AddIntOp,
    "torch.aten.add.int",
    TorchType::Int,
    |a, b| Literal::Int(a.wrapping_add(b))
);

int_binary_op!(
    /// `torch.aten.sub.int`
    SubIntOp,
    "torch.aten.sub.int",
    TorchType::Int,
    |a, b| Literal::Int(a.wrapping_sub(b))
);

int_binary_op!(
    /// `torch.aten.mul.int`
    MulIntOp,
    "torch.aten.mul.int",
    TorchType::Int,
    |a, b| Literal::Int(a.wrapping_mul(b))
);

int_binary_op!(
    /// `torch.aten.lt.int`
    LtIntOp,
    "torch.aten.lt.int",
    TorchType::Bool,
    |a, b| Literal::Bool(a < b)
);

int_binary_op!(
    /// `torch.aten.gt.int`
    GtIntOp,
    "torch.aten.gt.int",
    TorchType::Bool,
    |a, b| Literal::Bool(a > b)
);

int_binary_op!(
    /// `torch.aten.eq.int`
    EqIntOp,
    "torch.aten.eq.int",
    TorchType::Bool,
    |a, b| Literal::Bool(a == b)
);

int_binary_op!(
    /// `torch.aten.ne.int`
    NeIntOp,
    "torch.aten.ne.int",
    TorchType::Bool,
    |a, b| Literal::Bool(a != b)
);

simple_op!(
    /// `torch.aten.size.int`
    ///
    /// Size of one dimension; folds when that dimension is static.
    SizeIntOp,
    "torch.aten.size.int",
    {
        fn is_pure(&self) -> bool {
            true
        }
        fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
            let tensor = TorchType::ValueTensor(TensorInfo::default());
            expect_signature(self, &[tensor, TorchType::Int], &[TorchType::Int])
        }
        fn fold(&self) -> Option<Literal> {
            let info = value_tensor_info(&self.operand(0).ok()?)?;
            let dim = fold_int(&self.operand(1).ok()?)?;
            let sizes = info.sizes?;
            let dim = crate::dialect::torch::normalize_dim(dim, sizes.len())?;
            sizes[dim].map(Literal::Int)
        }
    }
);
