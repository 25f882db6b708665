use crate::frontend::Parser;
use crate::frontend::ParserDispatch;
use crate::frontend::TokenKind;
use crate::ir::Block;
use crate::ir::Op;
use crate::ir::OpOperand;
use crate::ir::Operation;
use crate::ir::Type;
use crate::ir::TypeConvert;
use crate::ir::Types;
use crate::shared::Shared;
use crate::shared::SharedExt;
use anyhow::Result;
use std::fmt::Display;

/// An argument in a block or function.
pub struct BlockArgument {
    name: Option<String>,
    typ: Shared<dyn Type>,
    /// The block for which this [BlockArgument] is an argument.
    ///
    /// Used to find the users of this argument.
    parent: Option<Shared<Block>>,
}

impl BlockArgument {
    pub fn new(name: Option<String>, typ: Shared<dyn Type>) -> Self {
        BlockArgument {
            name,
            typ,
            parent: None,
        }
    }
    pub fn name(&self) -> Option<String> {
        self.name.clone()
    }
    pub fn parent(&self) -> Option<Shared<Block>> {
        self.parent.clone()
    }
    pub fn set_name(&mut self, name: &str) {
        self.name = Some(name.to_string());
    }
    pub fn set_parent(&mut self, parent: Option<Shared<Block>>) {
        self.parent = parent;
    }
    pub fn set_typ(&mut self, typ: Shared<dyn Type>) {
        self.typ = typ;
    }
    pub fn typ(&self) -> Shared<dyn Type> {
        self.typ.clone()
    }
}

impl Display for BlockArgument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let typ = self.typ.rd();
        match &self.name {
            Some(name) => write!(f, "{name} : {typ}"),
            None => write!(f, "{typ}"),
        }
    }
}

/// The result of a function declaration; it has a type but no name.
pub struct AnonymousResult {
    typ: Shared<dyn Type>,
}

impl AnonymousResult {
    pub fn new(typ: Shared<dyn Type>) -> Self {
        AnonymousResult { typ }
    }
    pub fn typ(&self) -> Shared<dyn Type> {
        self.typ.clone()
    }
    pub fn set_typ(&mut self, typ: Shared<dyn Type>) {
        self.typ = typ;
    }
}

impl Display for AnonymousResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.typ.rd())
    }
}

/// A named value produced by an op, such as `%0` in `%0 = torch.constant.int 1`.
pub struct OpResult {
    name: Option<String>,
    typ: Option<Shared<dyn Type>>,
    defining_op: Option<Shared<dyn Op>>,
}

impl OpResult {
    pub fn new(
        name: Option<String>,
        typ: Option<Shared<dyn Type>>,
        defining_op: Option<Shared<dyn Op>>,
    ) -> Self {
        OpResult {
            name,
            typ,
            defining_op,
        }
    }
    pub fn name(&self) -> Option<String> {
        self.name.clone()
    }
    pub fn typ(&self) -> Option<Shared<dyn Type>> {
        self.typ.clone()
    }
    pub fn defining_op(&self) -> Option<Shared<dyn Op>> {
        self.defining_op.clone()
    }
    pub fn set_name(&mut self, name: &str) {
        self.name = Some(name.to_string());
    }
    pub fn set_typ(&mut self, typ: Shared<dyn Type>) {
        self.typ = Some(typ);
    }
    pub fn set_defining_op(&mut self, op: Option<Shared<dyn Op>>) {
        self.defining_op = op;
    }
}

impl Default for OpResult {
    fn default() -> Self {
        Self {
            name: None,
            typ: None,
            defining_op: None,
        }
    }
}

impl Display for OpResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "<unnamed>"),
        }
    }
}

/// Results of an operation that is still being built.
///
/// The results need to point to their defining op, which only exists after
/// the operation has been wrapped into an [Op].
#[must_use = "the results should receive a defining op and types"]
pub struct UnsetOpResults {
    results: Values,
}

impl UnsetOpResults {
    pub fn new(results: Values) -> Self {
        UnsetOpResults { results }
    }
    pub fn values(&self) -> Values {
        self.results.clone()
    }
    pub fn set_defining_op(&self, op: Shared<dyn Op>) {
        self.results.set_defining_op(op);
    }
    pub fn set_types(&self, types: Vec<Shared<dyn Type>>) -> Result<()> {
        self.results.update_types(types)
    }
}

/// Uses of the results of an operation.
pub enum Users {
    /// The operation defines no results that can be used.
    HasNoOpResults,
    OpOperands(Vec<Shared<OpOperand>>),
}

impl Users {
    pub fn len(&self) -> usize {
        match self {
            Users::HasNoOpResults => 0,
            Users::OpOperands(users) => users.len(),
        }
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An SSA value.
pub enum Value {
    /// An argument of a block, which includes function arguments.
    BlockArgument(BlockArgument),
    /// The result of a function signature; not usable as an operand.
    FuncResult(AnonymousResult),
    /// A value produced by an operation.
    OpResult(OpResult),
}

impl Value {
    pub fn name(&self) -> Option<String> {
        match self {
            Value::BlockArgument(arg) => arg.name(),
            Value::FuncResult(_) => None,
            Value::OpResult(result) => result.name(),
        }
    }
    pub fn typ(&self) -> Result<Shared<dyn Type>> {
        match self {
            Value::BlockArgument(arg) => Ok(arg.typ()),
            Value::FuncResult(result) => Ok(result.typ()),
            Value::OpResult(result) => match result.typ() {
                Some(typ) => Ok(typ),
                None => Err(anyhow::anyhow!("type of {self} was not set")),
            },
        }
    }
    pub fn set_type(&mut self, typ: Shared<dyn Type>) {
        match self {
            Value::BlockArgument(arg) => arg.set_typ(typ),
            Value::FuncResult(result) => result.set_typ(typ),
            Value::OpResult(result) => result.set_typ(typ),
        }
    }
    pub fn set_name(&mut self, name: &str) {
        match self {
            Value::BlockArgument(arg) => arg.set_name(name),
            Value::FuncResult(_) => (),
            Value::OpResult(result) => result.set_name(name),
        }
    }
    pub fn defining_op(&self) -> Option<Shared<dyn Op>> {
        match self {
            Value::OpResult(result) => result.defining_op(),
            _ => None,
        }
    }
    pub fn set_defining_op(&mut self, op: Option<Shared<dyn Op>>) {
        if let Value::OpResult(result) = self {
            result.set_defining_op(op);
        }
    }
    pub fn set_parent(&mut self, parent: Option<Shared<Block>>) {
        if let Value::BlockArgument(arg) = self {
            arg.set_parent(parent);
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::BlockArgument(arg) => write!(f, "{arg}"),
            Value::FuncResult(result) => write!(f, "{result}"),
            Value::OpResult(result) => write!(f, "{result}"),
        }
    }
}

pub trait GuardedValue {
    fn name(&self) -> Option<String>;
    fn typ(&self) -> Result<Shared<dyn Type>>;
    fn set_type(&self, typ: Shared<dyn Type>);
    fn defining_op(&self) -> Option<Shared<dyn Op>>;
}

impl GuardedValue for Shared<Value> {
    fn name(&self) -> Option<String> {
        self.rd().name()
    }
    fn typ(&self) -> Result<Shared<dyn Type>> {
        self.rd().typ()
    }
    fn set_type(&self, typ: Shared<dyn Type>) {
        self.wr().set_type(typ);
    }
    fn defining_op(&self) -> Option<Shared<dyn Op>> {
        self.rd().defining_op()
    }
}

#[derive(Clone)]
pub struct Values {
    values: Shared<Vec<Shared<Value>>>,
}

impl IntoIterator for Values {
    type Item = Shared<Value>;
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.rd().clone().into_iter()
    }
}

impl Values {
    pub fn from_vec(values: Vec<Shared<Value>>) -> Self {
        Values {
            values: Shared::new(values.into()),
        }
    }
    pub fn vec(&self) -> Shared<Vec<Shared<Value>>> {
        self.values.clone()
    }
    pub fn get(&self, index: usize) -> Option<Shared<Value>> {
        self.values.rd().get(index).cloned()
    }
    pub fn names(&self) -> Vec<String> {
        self.values
            .rd()
            .iter()
            .map(|value| value.rd().name().unwrap_or_default())
            .collect()
    }
    pub fn len(&self) -> usize {
        self.values.rd().len()
    }
    pub fn is_empty(&self) -> bool {
        self.values.rd().is_empty()
    }
    pub fn types(&self) -> Result<Types> {
        let mut types = vec![];
        for value in self.values.rd().iter() {
            types.push(value.rd().typ()?);
        }
        Ok(Types::from_vec(types))
    }
    pub fn update_types(&self, types: Vec<Shared<dyn Type>>) -> Result<()> {
        let values = self.values.rd();
        if values.len() != types.len() {
            return Err(anyhow::anyhow!(
                "expected {} types, but got {}",
                values.len(),
                types.len()
            ));
        }
        for (value, typ) in values.iter().zip(types) {
            value.wr().set_type(typ);
        }
        Ok(())
    }
    pub fn set_defining_op(&self, op: Shared<dyn Op>) {
        for value in self.values.rd().iter() {
            value.wr().set_defining_op(Some(op.clone()));
        }
    }
    pub fn set_parent(&self, parent: Shared<Block>) {
        for value in self.values.rd().iter() {
            value.wr().set_parent(Some(parent.clone()));
        }
    }
    pub fn push(&self, value: Shared<Value>) {
        self.values.wr().push(value);
    }
    pub fn convert_types<T: TypeConvert>(&self) -> Result<()> {
        for value in self.values.rd().iter() {
            let typ = value.rd().typ()?;
            let converted = T::convert_type(&typ)?;
            value.wr().set_type(converted);
        }
        Ok(())
    }
}

impl Default for Values {
    fn default() -> Self {
        Values::from_vec(vec![])
    }
}

impl Display for Values {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined = self
            .values
            .rd()
            .iter()
            .map(|value| value.rd().to_string())
            .collect::<Vec<String>>()
            .join(", ");
        write!(f, "{joined}")
    }
}

impl<T: ParserDispatch> Parser<T> {
    /// Parse a single block or function argument, `%arg0 : !torch.int`.
    pub fn parse_block_argument(&mut self) -> Result<Shared<Value>> {
        let name = self.expect(TokenKind::PercentIdentifier)?;
        self.expect(TokenKind::Colon)?;
        let typ = self.parse_type()?;
        let arg = BlockArgument::new(Some(name.lexeme.clone()), typ);
        let value = Shared::new(Value::BlockArgument(arg).into());
        Ok(value)
    }
    /// Parse `(%a : T, %b : U)`, including the parentheses.
    pub fn parse_block_arguments(&mut self) -> Result<Values> {
        self.expect(TokenKind::LParen)?;
        let mut values = vec![];
        while !self.check(TokenKind::RParen) {
            values.push(self.parse_block_argument()?);
            if !self.check(TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        self.expect(TokenKind::RParen)?;
        Ok(Values::from_vec(values))
    }
    /// Parse the result names in front of `=`, if any.
    ///
    /// The names are stored into `operation`. The returned handle has to
    /// receive the types and defining op once they are known.
    pub fn parse_op_results_into(&mut self, operation: &mut Operation) -> Result<UnsetOpResults> {
        let mut results = vec![];
        while self.check(TokenKind::PercentIdentifier) {
            let name = self.advance().lexeme.clone();
            let result = OpResult::new(Some(name), None, None);
            results.push(Shared::new(Value::OpResult(result).into()));
            if self.check(TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        if !results.is_empty() {
            self.expect(TokenKind::Equal)?;
        }
        let results = Values::from_vec(results);
        operation.set_results(results.clone());
        Ok(UnsetOpResults::new(results))
    }
}
