use crate::dialect::arith;
use crate::dialect::scf::empty_region;
use crate::dialect::scf::ForOp;
use crate::dialect::scf::IfOp;
use crate::dialect::scf::YieldOp;
use crate::dialect::torch;
use crate::dialect::torch::TorchType;
use crate::frontend::finish_op;
use crate::frontend::Location;
use crate::ir::new_type;
use crate::ir::scalar_type;
use crate::ir::Attribute;
use crate::ir::Attributes;
use crate::ir::Block;
use crate::ir::BlockArgument;
use crate::ir::BooleanAttr;
use crate::ir::FloatAttr;
use crate::ir::GuardedBlock;
use crate::ir::IntegerAttr;
use crate::ir::Literal;
use crate::ir::Namer;
use crate::ir::Op;
use crate::ir::OpOperands;
use crate::ir::OpResult;
use crate::ir::Operation;
use crate::ir::ScalarType;
use crate::ir::StringAttr;
use crate::ir::Type;
use crate::ir::UnsetOpResults;
use crate::ir::Value;
use crate::ir::Values;
use crate::shared::ptr_id;
use crate::shared::Shared;
use crate::shared::SharedExt;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;

enum InsertPoint {
    Before(Shared<dyn Op>),
    After(Shared<dyn Op>),
    End(Shared<Block>),
}

struct State {
    namer: Namer,
    anchor: Shared<dyn Op>,
    /// First op placed in front of the anchor. Hoisted constants go in
    /// front of it, so they come before every op of this rewrite.
    first: Option<Shared<dyn Op>>,
    location: Option<Location>,
    indices: HashMap<i64, Shared<Value>>,
}

/// Creates ops for a rewrite of one anchor op.
///
/// New ops go in front of the anchor, or at the end of a block for
/// builders that fill loop and branch bodies. All builders derived from the
/// same anchor share one [Namer], so names stay unique in the function.
/// `index` constants are created once, in front of everything that this
/// rewrite inserts before the anchor, so that they dominate every nested
/// body, including loops that were emitted before the constant was needed.
pub struct Builder {
    point: InsertPoint,
    state: Shared<State>,
}

impl Builder {
    pub fn before(anchor: &Shared<dyn Op>) -> Self {
        let location = anchor.rd().operation().rd().location();
        let state = State {
            namer: Namer::for_op(anchor),
            anchor: anchor.clone(),
            first: None,
            location,
            indices: HashMap::new(),
        };
        Builder {
            point: InsertPoint::Before(anchor.clone()),
            state: Shared::new(state.into()),
        }
    }
    /// Builder that inserts directly behind `anchor`.
    ///
    /// Successive ops end up in reverse order, so this is meant for single
    /// ops that use the results of the anchor.
    pub fn after(anchor: &Shared<dyn Op>) -> Self {
        let builder = Builder::before(anchor);
        Builder {
            point: InsertPoint::After(anchor.clone()),
            state: builder.state,
        }
    }
    fn at_end(&self, block: Shared<Block>) -> Builder {
        Builder {
            point: InsertPoint::End(block),
            state: self.state.clone(),
        }
    }
    fn insert(&self, op: Shared<dyn Op>) -> Result<()> {
        match &self.point {
            InsertPoint::Before(anchor) => {
                let mut state = self.state.wr();
                if state.first.is_none() && ptr_id(anchor) == ptr_id(&state.anchor) {
                    state.first = Some(op.clone());
                }
                drop(state);
                anchor.rd().insert_before(op)
            }
            InsertPoint::After(anchor) => anchor.rd().insert_after(op),
            InsertPoint::End(block) => {
                block.append(op);
                Ok(())
            }
        }
    }
    pub fn fresh_name(&self) -> String {
        self.state.wr().namer.fresh()
    }
    fn new_operation(
        &self,
        operands: &[Shared<Value>],
        attributes: Attributes,
        result_types: Vec<(String, Shared<dyn Type>)>,
    ) -> (Operation, UnsetOpResults) {
        let mut operation = Operation::default();
        operation.set_operands(OpOperands::from_values(operands));
        operation.set_attributes(attributes);
        operation.set_location(self.state.rd().location.clone());
        let results = result_types
            .into_iter()
            .map(|(name, typ)| {
                let result = OpResult::new(Some(name), Some(typ), None);
                Shared::new(Value::OpResult(result).into())
            })
            .collect::<Vec<Shared<Value>>>();
        let results = Values::from_vec(results);
        operation.set_results(results.clone());
        (operation, UnsetOpResults::new(results))
    }
    /// Create an op of type `O` at the insertion point.
    pub fn create<O: Op + 'static>(
        &self,
        operands: &[Shared<Value>],
        attributes: Attributes,
        result_types: Vec<Shared<dyn Type>>,
    ) -> Result<Shared<dyn Op>> {
        let named = result_types
            .into_iter()
            .map(|typ| (self.fresh_name(), typ))
            .collect();
        let (operation, results) = self.new_operation(operands, attributes, named);
        let op = finish_op::<O>(operation, results);
        self.insert(op.clone())?;
        Ok(op)
    }
    /// Create an op with a single result and return that result.
    pub fn value<O: Op + 'static>(
        &self,
        operands: &[Shared<Value>],
        result_type: Shared<dyn Type>,
    ) -> Result<Shared<Value>> {
        self.value_with::<O>(operands, Attributes::new(), result_type)
    }
    pub fn value_with<O: Op + 'static>(
        &self,
        operands: &[Shared<Value>],
        attributes: Attributes,
        result_type: Shared<dyn Type>,
    ) -> Result<Shared<Value>> {
        let op = self.create::<O>(operands, attributes, vec![result_type])?;
        let result = op.rd().result(0)?;
        Ok(result)
    }
    /// Create an op without results, such as a store.
    pub fn emit<O: Op + 'static>(&self, operands: &[Shared<Value>]) -> Result<()> {
        self.create::<O>(operands, Attributes::new(), vec![])?;
        Ok(())
    }
    fn constant<O: Op + 'static>(
        &self,
        name: String,
        value: Option<Arc<dyn Attribute>>,
        typ: Shared<dyn Type>,
    ) -> Result<Shared<Value>> {
        let attributes = Attributes::new();
        if let Some(value) = value {
            attributes.insert("value", value);
        }
        let (operation, results) = self.new_operation(&[], attributes, vec![(name, typ)]);
        let op = finish_op::<O>(operation, results);
        self.insert(op.clone())?;
        let result = op.rd().result(0)?;
        Ok(result)
    }
    /// An `index` constant in front of all ops of this rewrite.
    pub fn index(&self, value: i64) -> Result<Shared<Value>> {
        if let Some(existing) = self.state.rd().indices.get(&value) {
            return Ok(existing.clone());
        }
        let name = if value >= 0 {
            self.state.wr().namer.fresh_named(&format!("c{value}"))
        } else {
            self.fresh_name()
        };
        let point = {
            let state = self.state.rd();
            let first = state.first.clone();
            first.unwrap_or_else(|| state.anchor.clone())
        };
        let hoisted = Builder {
            point: InsertPoint::Before(point),
            state: self.state.clone(),
        };
        let attr: Arc<dyn Attribute> = Arc::new(IntegerAttr::new(value));
        let typ = new_type(ScalarType::Index);
        let result = hoisted.constant::<arith::ConstantOp>(name, Some(attr), typ)?;
        self.state.wr().indices.insert(value, result.clone());
        Ok(result)
    }
    pub fn int(&self, value: i64, typ: ScalarType) -> Result<Shared<Value>> {
        let name = self.state.wr().namer.fresh_named(&format!("c{}_{typ}", value.abs()));
        let attr: Arc<dyn Attribute> = Arc::new(IntegerAttr::new(value));
        self.constant::<arith::ConstantOp>(name, Some(attr), new_type(typ))
    }
    pub fn float(&self, value: f64, typ: ScalarType) -> Result<Shared<Value>> {
        let name = self.state.wr().namer.fresh_named("cst");
        let attr: Arc<dyn Attribute> = Arc::new(FloatAttr::new(value));
        self.constant::<arith::ConstantOp>(name, Some(attr), new_type(typ))
    }
    /// A scalar constant of type `typ`; floats and integers are converted.
    pub fn scalar(&self, value: f64, typ: ScalarType) -> Result<Shared<Value>> {
        if typ.is_float() {
            self.float(value, typ)
        } else {
            self.int(value as i64, typ)
        }
    }
    /// Materialize `literal` as a constant of type `typ`.
    ///
    /// Torch types give `torch.constant.*` ops and scalar types give an
    /// `arith.constant`. Returns `None` if the literal cannot have the type.
    pub fn literal(&self, literal: &Literal, typ: &Shared<dyn Type>) -> Result<Option<Shared<Value>>> {
        if let Some(scalar) = scalar_type(typ) {
            let value = match (literal, scalar.is_float()) {
                (Literal::Float(value), true) => self.float(*value, scalar)?,
                (Literal::Int(value), true) => self.float(*value as f64, scalar)?,
                (Literal::Int(value), false) => self.int(*value, scalar)?,
                (Literal::Bool(value), false) => self.int(*value as i64, scalar)?,
                _ => return Ok(None),
            };
            return Ok(Some(value));
        }
        let torch_type = match torch::torch_type(typ) {
            Some(torch_type) => torch_type,
            None => return Ok(None),
        };
        let namer = |base: &str| self.state.wr().namer.fresh_named(base);
        let value = match (literal, &torch_type) {
            (Literal::Int(value), TorchType::Int) => {
                let name = if *value >= 0 {
                    namer(&format!("int{value}"))
                } else {
                    namer(&format!("int_{}", value.abs()))
                };
                let attr: Arc<dyn Attribute> = Arc::new(IntegerAttr::new(*value));
                self.constant::<torch::ConstantIntOp>(name, Some(attr), typ.clone())?
            }
            (Literal::Float(value), TorchType::Float) => {
                let attr: Arc<dyn Attribute> = Arc::new(FloatAttr::new(*value));
                self.constant::<torch::ConstantFloatOp>(namer("float"), Some(attr), typ.clone())?
            }
            (Literal::Bool(value), TorchType::Bool) => {
                let attr: Arc<dyn Attribute> = Arc::new(BooleanAttr::new(*value));
                let name = namer(if *value { "true" } else { "false" });
                self.constant::<torch::ConstantBoolOp>(name, Some(attr), typ.clone())?
            }
            (Literal::Str(value), TorchType::Str) => {
                let attr: Arc<dyn Attribute> = Arc::new(StringAttr::new(value));
                self.constant::<torch::ConstantStrOp>(namer("str"), Some(attr), typ.clone())?
            }
            (Literal::None, TorchType::None) => {
                self.constant::<torch::ConstantNoneOp>(namer("none"), None, typ.clone())?
            }
            _ => return Ok(None),
        };
        Ok(Some(value))
    }
    fn block_arguments(&self, types: &[Shared<dyn Type>]) -> Values {
        let arguments = types
            .iter()
            .map(|typ| {
                let argument = BlockArgument::new(Some(self.fresh_name()), typ.clone());
                Shared::new(Value::BlockArgument(argument).into())
            })
            .collect();
        Values::from_vec(arguments)
    }
    /// `scf.for` from `lower` to `upper` with loop-carried `inits`.
    ///
    /// `body` receives the induction variable and the loop-carried values
    /// and returns the values for the next iteration.
    pub fn for_loop<F>(
        &self,
        lower: &Shared<Value>,
        upper: &Shared<Value>,
        step: &Shared<Value>,
        inits: &[Shared<Value>],
        body: F,
    ) -> Result<Vec<Shared<Value>>>
    where
        F: FnOnce(&Builder, Shared<Value>, Vec<Shared<Value>>) -> Result<Vec<Shared<Value>>>,
    {
        let mut operands = vec![lower.clone(), upper.clone(), step.clone()];
        operands.extend(inits.iter().cloned());
        let types = inits
            .iter()
            .map(|init| init.rd().typ())
            .collect::<Result<Vec<Shared<dyn Type>>>>()?;
        let op = self.create::<ForOp>(&operands, Attributes::new(), types.clone())?;
        let mut argument_types = vec![new_type(ScalarType::Index)];
        argument_types.extend(types);
        let arguments = self.block_arguments(&argument_types).into_iter().collect::<Vec<_>>();
        let region = empty_region(op.clone(), Values::from_vec(arguments.clone()));
        op.rd().operation().wr().set_regions(vec![region.clone()]);
        let block = region.rd().entry();
        let block = match block {
            Some(block) => block,
            None => return Err(anyhow::anyhow!("scf.for without a body")),
        };
        let nested = self.at_end(block);
        let iv = arguments[0].clone();
        let next = body(&nested, iv, arguments[1..].to_vec())?;
        nested.create::<YieldOp>(&next, Attributes::new(), vec![])?;
        let results = op.rd().operation().rd().results();
        Ok(results.into_iter().collect())
    }
    /// `scf.if` whose branches are filled by `then_body` and `else_body`.
    pub fn if_else<F, G>(
        &self,
        condition: &Shared<Value>,
        result_types: Vec<Shared<dyn Type>>,
        then_body: F,
        else_body: G,
    ) -> Result<Vec<Shared<Value>>>
    where
        F: FnOnce(&Builder) -> Result<Vec<Shared<Value>>>,
        G: FnOnce(&Builder) -> Result<Vec<Shared<Value>>>,
    {
        let op = self.create::<IfOp>(&[condition.clone()], Attributes::new(), result_types)?;
        let then_region = empty_region(op.clone(), Values::default());
        let else_region = empty_region(op.clone(), Values::default());
        op.rd()
            .operation()
            .wr()
            .set_regions(vec![then_region, else_region]);
        let then_block = region_entry(&op, 0)?;
        let nested = self.at_end(then_block);
        let yielded = then_body(&nested)?;
        nested.create::<YieldOp>(&yielded, Attributes::new(), vec![])?;
        let else_block = region_entry(&op, 1)?;
        let nested = self.at_end(else_block);
        let yielded = else_body(&nested)?;
        nested.create::<YieldOp>(&yielded, Attributes::new(), vec![])?;
        let results = op.rd().operation().rd().results();
        Ok(results.into_iter().collect())
    }
    /// Nested `scf.for` loops over every index of `shape`.
    ///
    /// `body` receives one induction variable per dimension.
    pub fn loop_nest(
        &self,
        shape: &[i64],
        body: &mut dyn FnMut(&Builder, &[Shared<Value>]) -> Result<()>,
    ) -> Result<()> {
        let mut ivs = vec![];
        self.nest(shape, &mut ivs, body)
    }
    fn nest(
        &self,
        shape: &[i64],
        ivs: &mut Vec<Shared<Value>>,
        body: &mut dyn FnMut(&Builder, &[Shared<Value>]) -> Result<()>,
    ) -> Result<()> {
        let (size, rest) = match shape.split_first() {
            Some(split) => split,
            None => return body(self, ivs),
        };
        let lower = self.index(0)?;
        let upper = self.index(*size)?;
        let step = self.index(1)?;
        self.for_loop(&lower, &upper, &step, &[], |nested, iv, _| {
            ivs.push(iv);
            nested.nest(rest, ivs, body)?;
            ivs.pop();
            Ok(vec![])
        })?;
        Ok(())
    }
}

fn region_entry(op: &Shared<dyn Op>, index: usize) -> Result<Shared<Block>> {
    let regions = op.rd().regions();
    let block = regions.get(index).and_then(|region| region.rd().entry());
    match block {
        Some(block) => Ok(block),
        None => Err(anyhow::anyhow!("expected region #{index} with an entry block")),
    }
}
