use crate::frontend::Parser;
use crate::frontend::ParserDispatch;
use crate::frontend::TokenKind;
use crate::ir::Op;
use crate::ir::Type;
use crate::ir::Types;
use crate::ir::Value;
use crate::shared::Shared;
use crate::shared::SharedExt;
use anyhow::Result;
use std::fmt::Display;

/// A use of a [Value] by an operation.
pub struct OpOperand {
    value: Shared<Value>,
}

impl OpOperand {
    pub fn new(value: Shared<Value>) -> Self {
        OpOperand { value }
    }
    pub fn name(&self) -> String {
        self.value.rd().name().unwrap_or_else(|| "<unnamed>".to_string())
    }
    pub fn value(&self) -> Shared<Value> {
        self.value.clone()
    }
    pub fn set_value(&mut self, value: Shared<Value>) {
        self.value = value;
    }
    /// If this operand is the result of an operation, return the operation
    /// that defines it.
    pub fn defining_op(&self) -> Option<Shared<dyn Op>> {
        self.value.rd().defining_op()
    }
    pub fn typ(&self) -> Result<Shared<dyn Type>> {
        self.value.rd().typ()
    }
}

impl Display for OpOperand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

pub trait GuardedOpOperand {
    fn defining_op(&self) -> Option<Shared<dyn Op>>;
    fn typ(&self) -> Result<Shared<dyn Type>>;
    fn value(&self) -> Shared<Value>;
    fn set_value(&self, value: Shared<Value>);
}

impl GuardedOpOperand for Shared<OpOperand> {
    fn defining_op(&self) -> Option<Shared<dyn Op>> {
        self.rd().defining_op()
    }
    fn typ(&self) -> Result<Shared<dyn Type>> {
        self.rd().typ()
    }
    fn value(&self) -> Shared<Value> {
        self.rd().value()
    }
    fn set_value(&self, value: Shared<Value>) {
        self.wr().set_value(value);
    }
}

#[derive(Clone)]
pub struct OpOperands {
    operands: Shared<Vec<Shared<OpOperand>>>,
}

impl OpOperands {
    pub fn vec(&self) -> Shared<Vec<Shared<OpOperand>>> {
        self.operands.clone()
    }
    pub fn from_vec(operands: Vec<Shared<OpOperand>>) -> Self {
        OpOperands {
            operands: Shared::new(operands.into()),
        }
    }
    pub fn from_values(values: &[Shared<Value>]) -> Self {
        let operands = values
            .iter()
            .map(|value| Shared::new(OpOperand::new(value.clone()).into()))
            .collect::<Vec<Shared<OpOperand>>>();
        OpOperands::from_vec(operands)
    }
    pub fn len(&self) -> usize {
        self.operands.rd().len()
    }
    pub fn is_empty(&self) -> bool {
        self.operands.rd().is_empty()
    }
    pub fn get(&self, index: usize) -> Option<Shared<OpOperand>> {
        self.operands.rd().get(index).cloned()
    }
    pub fn values(&self) -> Vec<Shared<Value>> {
        self.operands.rd().iter().map(|o| o.value()).collect()
    }
    pub fn types(&self) -> Result<Types> {
        let mut types = vec![];
        for operand in self.operands.rd().iter() {
            types.push(operand.typ()?);
        }
        Ok(Types::from_vec(types))
    }
}

impl IntoIterator for OpOperands {
    type Item = Shared<OpOperand>;
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.operands.rd().clone().into_iter()
    }
}

impl Default for OpOperands {
    fn default() -> Self {
        OpOperands::from_vec(vec![])
    }
}

impl Display for OpOperands {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined = self
            .operands
            .rd()
            .iter()
            .map(|o| o.rd().to_string())
            .collect::<Vec<String>>()
            .join(", ");
        write!(f, "{joined}")
    }
}

impl<T: ParserDispatch> Parser<T> {
    /// Parse `%0` and resolve it to the value that was assigned earlier.
    pub fn parse_op_operand(&mut self) -> Result<Shared<OpOperand>> {
        let token = self.expect(TokenKind::PercentIdentifier)?;
        match self.lookup_value(&token.lexeme) {
            Some(value) => Ok(Shared::new(OpOperand::new(value).into())),
            None => {
                let msg = format!("Expected assignment before use of {}", token.lexeme);
                let msg = self.error(&token, &msg);
                Err(anyhow::anyhow!(msg))
            }
        }
    }
    /// Parse a possibly empty comma-separated list of operands.
    pub fn parse_op_operands(&mut self) -> Result<OpOperands> {
        let mut operands = vec![];
        while self.check(TokenKind::PercentIdentifier) {
            operands.push(self.parse_op_operand()?);
            if self.check(TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        Ok(OpOperands::from_vec(operands))
    }
    /// Check the operand types written after the colon against the values.
    pub fn verify_operand_types(&self, operands: &OpOperands, types: &Types) -> Result<()> {
        if operands.len() != types.len() {
            let msg = format!(
                "Expected {} operand types, but got {}",
                operands.len(),
                types.len()
            );
            return Err(anyhow::anyhow!(self.error(self.previous(), &msg)));
        }
        for (operand, typ) in operands.clone().into_iter().zip(types.vec()) {
            let actual = operand.typ()?;
            let actual = actual.rd().to_string();
            let expected = typ.rd().to_string();
            if actual != expected {
                let msg = format!(
                    "Type mismatch for {}: declared as {actual} but used as {expected}",
                    operand.rd().name()
                );
                return Err(anyhow::anyhow!(self.error(self.previous(), &msg)));
            }
        }
        Ok(())
    }
}
