//! Intermediate representation (IR) for the compiler.
//!
//! These data structures are used as the basis for the compiler.
//! For example, this module contains core types such as [Operation] and [Op].

mod attribute;
mod block;
mod literal;
mod module;
mod namer;
mod op;
mod op_operand;
mod operation;
mod region;
mod typ;
mod uses;
mod value;

pub use attribute::escape;
pub use attribute::format_float;
pub use attribute::unescape;
pub use attribute::ArrayAttr;
pub use attribute::Attribute;
pub use attribute::Attributes;
pub use attribute::BooleanAttr;
pub use attribute::DenseAttr;
pub use attribute::FloatAttr;
pub use attribute::IntegerAttr;
pub use attribute::StringAttr;
pub use attribute::SymbolAttr;
pub use attribute::TypeAttr;
pub use block::Block;
pub use block::GuardedBlock;
pub use literal::Literal;
pub use module::ModuleOp;
pub use namer::Namer;
pub use op::GuardedOp;
pub use op::Op;
pub(crate) use op::simple_op;
pub use op_operand::GuardedOpOperand;
pub use op_operand::OpOperand;
pub use op_operand::OpOperands;
pub use operation::GuardedOperation;
pub use operation::Operation;
pub use operation::OperationName;
pub use region::GuardedRegion;
pub use region::Region;
pub use typ::new_type;
pub use typ::same_type;
pub use typ::scalar_type;
pub use typ::shaped_type;
pub use typ::ScalarType;
pub use typ::ShapedKind;
pub use typ::ShapedType;
pub use typ::Type;
pub use typ::TypeConvert;
pub use typ::Types;
pub use uses::has_uses;
pub use uses::replace_all_uses_with;
pub use uses::users;
pub use uses::uses;
pub use uses::Use;
pub use value::AnonymousResult;
pub use value::BlockArgument;
pub use value::GuardedValue;
pub use value::OpResult;
pub use value::UnsetOpResults;
pub use value::Users;
pub use value::Value;
pub use value::Values;

pub fn spaces(indent: i32) -> String {
    "  ".repeat(indent.max(0) as usize)
}
