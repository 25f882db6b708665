//! Object model: class types, module instances, and global slots.
//!
//! Attribute and method accesses name their member by string, but they are
//! resolved against the [ClassLayout](crate::verify::ClassLayout) that is
//! indexed once when the [SymbolTable] is built.
use crate::dialect::func::FuncOp;
use crate::dialect::torch::operand_type;
use crate::dialect::torch::result_type;
use crate::dialect::torch::torch_type;
use crate::dialect::torch::TorchType;
use crate::frontend::finish_op;
use crate::frontend::Parse;
use crate::frontend::Parser;
use crate::frontend::ParserDispatch;
use crate::frontend::TokenKind;
use crate::ir::simple_op;
use crate::ir::Attributes;
use crate::ir::Block;
use crate::ir::BooleanAttr;
use crate::ir::GuardedOp;
use crate::ir::Op;
use crate::ir::OpOperands;
use crate::ir::Operation;
use crate::ir::OperationName;
use crate::ir::StringAttr;
use crate::ir::SymbolAttr;
use crate::ir::Type;
use crate::ir::TypeAttr;
use crate::ir::Types;
use crate::ir::UnsetOpResults;
use crate::ir::Values;
use crate::shared::Shared;
use crate::shared::SharedExt;
use crate::verify::AttrDecl;
use crate::verify::ClassLayout;
use crate::verify::MethodDecl;
use crate::verify::SymbolTable;
use anyhow::Result;
use std::fmt::Formatter;
use std::sync::Arc;

/// Implement the accessors that every op struct needs.
macro_rules! op_struct {
    ($(#[$meta:meta])* $ty:ident, $mnemonic:literal) => {
        $(#[$meta])*
        pub struct $ty {
            operation: Shared<Operation>,
        }

        impl $ty {
            fn op_name() -> OperationName {
                OperationName::new($mnemonic.to_string())
            }
        }
    };
}

macro_rules! op_boilerplate {
    ($ty:ident) => {
        fn operation_name() -> OperationName {
            $ty::op_name()
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
    };
}

fn get_str(op: &dyn Op, key: &str) -> String {
    op.operation().rd().attributes().get_str(key).unwrap_or_default()
}

fn get_symbol(op: &dyn Op, key: &str) -> String {
    let attributes = op.operation().rd().attributes();
    attributes.get_symbol(key).unwrap_or_default()
}

fn is_private(op: &dyn Op) -> bool {
    op.operation().rd().attributes().get_bool("private").unwrap_or(false)
}

fn declared_type(op: &dyn Op) -> Result<TorchType> {
    let typ = op.operation().rd().attributes().get_type("type");
    let typ = match typ {
        Some(typ) => typ,
        None => return Err(anyhow::anyhow!("requires a type attribute")),
    };
    match torch_type(&typ) {
        Some(typ) => Ok(typ),
        None => Err(anyhow::anyhow!("requires a torch type, but got {}", typ.rd())),
    }
}

fn private_prefix(op: &dyn Op) -> &'static str {
    if is_private(op) {
        "private "
    } else {
        ""
    }
}

fn parse_private<T: ParserDispatch>(parser: &mut Parser<T>, attributes: &Attributes) {
    if parser.check_keyword("private") {
        parser.advance();
        attributes.insert("private", Arc::new(BooleanAttr::new(true)));
    }
}

/// Wrap `operation` into `O` and parse the region that follows.
fn parse_body<T: ParserDispatch, O: Op + 'static>(
    parser: &mut Parser<T>,
    operation: Operation,
    results: UnsetOpResults,
) -> Result<Shared<dyn Op>> {
    let op = finish_op::<O>(operation, results);
    let operation = op.rd().operation().clone();
    let region = parser.parse_region(op.clone())?;
    operation.wr().set_regions(vec![region]);
    Ok(op)
}

fn no_results() -> UnsetOpResults {
    UnsetOpResults::new(Values::default())
}

/// Check that `op` is directly nested in an `O`.
fn expect_parent<O: Op + 'static>(op: &dyn Op) -> Result<()> {
    let parent = op.parent_op();
    match parent {
        Some(parent) if parent.is::<O>() => Ok(()),
        _ => Err(anyhow::anyhow!(
            "expects parent op '{}'",
            O::operation_name()
        )),
    }
}

/// Name of the function that (transitively) contains `op`.
pub fn enclosing_function(op: &dyn Op) -> Option<String> {
    let mut parent = op.parent_op();
    while let Some(current) = parent {
        if current.is::<FuncOp>() {
            return current.rd().symbol_name();
        }
        parent = current.parent_op();
    }
    None
}

/// Private members are only accessible from the methods of their class.
fn check_access(op: &dyn Op, symbols: &SymbolTable, class: &str, member: &str, private: bool) -> Result<()> {
    if !private {
        return Ok(());
    }
    let function = enclosing_function(op);
    let allowed = match &function {
        Some(function) => symbols.is_method_of(function, class),
        None => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "cannot access private member \"{member}\" of class \"{class}\" outside of its methods"
        ))
    }
}

fn receiver_class<'a>(op: &dyn Op, symbols: &'a SymbolTable) -> Result<&'a ClassLayout> {
    let class = match operand_type(op, 0)? {
        TorchType::NnModule(class) => class,
        other => {
            return Err(anyhow::anyhow!(
                "receiver must be a !torch.nn.Module, but got {other}"
            ))
        }
    };
    match symbols.class(&class) {
        Some(layout) => Ok(layout),
        None => Err(anyhow::anyhow!("unknown class \"{class}\"")),
    }
}

op_struct!(
    /// `torch.class_type`
    ///
    /// ```ebnf
    /// `torch.class_type` symbol `{` (attr | method)* `}`
    /// ```
    ///
    /// For example,
    ///
    /// ```mlir
    /// torch.class_type @c {
    ///   torch.attr private "w" : !torch.vtensor<[2],f32>
    ///   torch.method "forward", @forward
    /// }
    /// ```
    ClassTypeOp,
    "torch.class_type"
);

impl ClassTypeOp {
    pub fn class_name(&self) -> String {
        get_symbol(self, "sym_name")
    }
    /// Index the attributes and methods of the class.
    pub fn layout(&self) -> Result<ClassLayout> {
        let mut layout = ClassLayout::new(&self.class_name());
        for op in self.ops() {
            let op = op.rd();
            if let Some(attr) = op.as_any().downcast_ref::<AttrOp>() {
                layout.add_attribute(AttrDecl {
                    name: attr.attr_name(),
                    typ: declared_type(attr)?,
                    private: is_private(attr),
                })?;
            } else if let Some(method) = op.as_any().downcast_ref::<MethodOp>() {
                layout.add_method(
                    &method.method_name(),
                    MethodDecl {
                        function: method.function(),
                        private: is_private(method),
                    },
                )?;
            }
        }
        Ok(layout)
    }
}

impl Op for ClassTypeOp {
    op_boilerplate!(ClassTypeOp);
    fn symbol_name(&self) -> Option<String> {
        Some(self.class_name())
    }
    fn verify(&self, symbols: &SymbolTable) -> Result<()> {
        for op in self.ops() {
            let allowed = op.is::<AttrOp>() || op.is::<MethodOp>();
            if !allowed {
                return Err(anyhow::anyhow!(
                    "body may only contain 'torch.attr' and 'torch.method', but contains '{}'",
                    op.name()
                ));
            }
        }
        let layout = self.layout()?;
        for (name, method) in layout.methods() {
            if symbols.function(&method.function).is_none() {
                return Err(anyhow::anyhow!(
                    "method \"{name}\" refers to unknown function @{}",
                    method.function
                ));
            }
        }
        Ok(())
    }
    fn display(&self, f: &mut Formatter<'_>, indent: i32) -> std::fmt::Result {
        write!(f, "{} @{}", self.name(), self.class_name())?;
        match self.region() {
            Some(region) => region.rd().display(f, indent),
            None => write!(f, " {{\n}}"),
        }
    }
}

impl Parse for ClassTypeOp {
    fn op<T: ParserDispatch>(
        parser: &mut Parser<T>,
        parent: Option<Shared<Block>>,
    ) -> Result<Shared<dyn Op>> {
        let mut operation = Operation::default();
        operation.set_parent(parent);
        parser.parse_operation_name_into::<ClassTypeOp>(&mut operation)?;
        let name = parser.parse_symbol()?;
        let attributes = Attributes::new();
        attributes.insert("sym_name", Arc::new(SymbolAttr::new(&name)));
        operation.set_attributes(attributes);
        parse_body::<T, ClassTypeOp>(parser, operation, no_results())
    }
}

op_struct!(
    /// `torch.attr`
    ///
    /// ```ebnf
    /// `torch.attr` `private`? string `:` type
    /// ```
    AttrOp,
    "torch.attr"
);

impl AttrOp {
    pub fn attr_name(&self) -> String {
        get_str(self, "name")
    }
}

impl Op for AttrOp {
    op_boilerplate!(AttrOp);
    fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
        expect_parent::<ClassTypeOp>(self)?;
        declared_type(self)?;
        Ok(())
    }
    fn display(&self, f: &mut Formatter<'_>, _indent: i32) -> std::fmt::Result {
        let typ = declared_type(self).map_err(|_| std::fmt::Error)?;
        write!(
            f,
            "{} {}\"{}\" : {typ}",
            self.name(),
            private_prefix(self),
            self.attr_name()
        )
    }
}

impl Parse for AttrOp {
    fn op<T: ParserDispatch>(
        parser: &mut Parser<T>,
        parent: Option<Shared<Block>>,
    ) -> Result<Shared<dyn Op>> {
        let mut operation = Operation::default();
        operation.set_parent(parent);
        parser.parse_operation_name_into::<AttrOp>(&mut operation)?;
        let attributes = Attributes::new();
        parse_private(parser, &attributes);
        let name = parser.parse_string()?;
        attributes.insert("name", Arc::new(StringAttr::new(&name)));
        parser.expect(TokenKind::Colon)?;
        let typ = parser.parse_type()?;
        attributes.insert("type", Arc::new(TypeAttr::new(typ)));
        operation.set_attributes(attributes);
        Ok(finish_op::<AttrOp>(operation, no_results()))
    }
}

op_struct!(
    /// `torch.method`
    ///
    /// ```ebnf
    /// `torch.method` `private`? string `,` symbol
    /// ```
    MethodOp,
    "torch.method"
);

impl MethodOp {
    pub fn method_name(&self) -> String {
        get_str(self, "name")
    }
    pub fn function(&self) -> String {
        get_symbol(self, "function")
    }
}

impl Op for MethodOp {
    op_boilerplate!(MethodOp);
    fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
        expect_parent::<ClassTypeOp>(self)
    }
    fn display(&self, f: &mut Formatter<'_>, _indent: i32) -> std::fmt::Result {
        write!(
            f,
            "{} {}\"{}\", @{}",
            self.name(),
            private_prefix(self),
            self.method_name(),
            self.function()
        )
    }
}

impl Parse for MethodOp {
    fn op<T: ParserDispatch>(
        parser: &mut Parser<T>,
        parent: Option<Shared<Block>>,
    ) -> Result<Shared<dyn Op>> {
        let mut operation = Operation::default();
        operation.set_parent(parent);
        parser.parse_operation_name_into::<MethodOp>(&mut operation)?;
        let attributes = Attributes::new();
        parse_private(parser, &attributes);
        let name = parser.parse_string()?;
        attributes.insert("name", Arc::new(StringAttr::new(&name)));
        parser.expect(TokenKind::Comma)?;
        let function = parser.parse_symbol()?;
        attributes.insert("function", Arc::new(SymbolAttr::new(&function)));
        operation.set_attributes(attributes);
        Ok(finish_op::<MethodOp>(operation, no_results()))
    }
}

op_struct!(
    /// `torch.nn_module`
    ///
    /// ```ebnf
    /// `torch.nn_module` `{` slot* `}` `:` type($result)
    /// ```
    ///
    /// The slots have to match the attributes of the class in name, order
    /// and type.
    NnModuleOp,
    "torch.nn_module"
);

impl NnModuleOp {
    pub fn class_name(&self) -> Result<String> {
        match result_type(self, 0)? {
            TorchType::NnModule(class) => Ok(class),
            other => Err(anyhow::anyhow!(
                "result must be a !torch.nn.Module, but got {other}"
            )),
        }
    }
    /// Name and value type of every slot in order.
    pub fn slots(&self) -> Result<Vec<(String, TorchType)>> {
        let mut slots = vec![];
        for op in self.ops() {
            let op = op.rd();
            if let Some(slot) = op.as_any().downcast_ref::<SlotOp>() {
                slots.push((slot.slot_name(), operand_type(slot, 0)?));
            }
        }
        Ok(slots)
    }
}

impl Op for NnModuleOp {
    op_boilerplate!(NnModuleOp);
    fn verify(&self, symbols: &SymbolTable) -> Result<()> {
        let class = self.class_name()?;
        let layout = match symbols.class(&class) {
            Some(layout) => layout,
            None => return Err(anyhow::anyhow!("unknown class \"{class}\"")),
        };
        for op in self.ops() {
            if !op.is::<SlotOp>() {
                return Err(anyhow::anyhow!(
                    "body may only contain 'torch.slot', but contains '{}'",
                    op.name()
                ));
            }
        }
        let slots = self.slots()?;
        let attributes = layout.attributes();
        if slots.len() != attributes.len() {
            return Err(anyhow::anyhow!(
                "has {} slots, but class \"{class}\" declares {} attributes",
                slots.len(),
                attributes.len()
            ));
        }
        for (i, ((name, typ), attr)) in slots.iter().zip(attributes).enumerate() {
            if *name != attr.name {
                return Err(anyhow::anyhow!(
                    "slot #{i} is \"{name}\", but class \"{class}\" declares \"{}\" at that position",
                    attr.name
                ));
            }
            if !typ.is_subtype(&attr.typ) {
                return Err(anyhow::anyhow!(
                    "slot \"{name}\" has type {typ}, which is not a subtype of {}",
                    attr.typ
                ));
            }
        }
        Ok(())
    }
    fn display(&self, f: &mut Formatter<'_>, indent: i32) -> std::fmt::Result {
        let operation = self.operation.rd();
        operation.display_results(f)?;
        write!(f, "{}", operation.name())?;
        if let Some(region) = operation.region() {
            region.rd().display(f, indent)?;
        }
        let types = operation.result_types().map_err(|_| std::fmt::Error)?;
        write!(f, " : {types}")
    }
}

impl Parse for NnModuleOp {
    fn op<T: ParserDispatch>(
        parser: &mut Parser<T>,
        parent: Option<Shared<Block>>,
    ) -> Result<Shared<dyn Op>> {
        let mut operation = Operation::default();
        operation.set_parent(parent);
        let results = parser.parse_op_results_into(&mut operation)?;
        let values = results.values();
        parser.parse_operation_name_into::<NnModuleOp>(&mut operation)?;
        let op = parse_body::<T, NnModuleOp>(parser, operation, results)?;
        parser.expect(TokenKind::Colon)?;
        let typ = parser.parse_type()?;
        values.update_types(vec![typ])?;
        Ok(op)
    }
}

op_struct!(
    /// `torch.slot`
    ///
    /// ```ebnf
    /// `torch.slot` string `,` $value `:` type($value)
    /// ```
    SlotOp,
    "torch.slot"
);

impl SlotOp {
    pub fn slot_name(&self) -> String {
        get_str(self, "name")
    }
}

impl Op for SlotOp {
    op_boilerplate!(SlotOp);
    fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
        expect_parent::<NnModuleOp>(self)
    }
    fn display(&self, f: &mut Formatter<'_>, _indent: i32) -> std::fmt::Result {
        let operation = self.operation.rd();
        let types = operation.operand_types().map_err(|_| std::fmt::Error)?;
        write!(
            f,
            "{} \"{}\", {} : {types}",
            operation.name(),
            self.slot_name(),
            operation.operands()
        )
    }
}

impl Parse for SlotOp {
    fn op<T: ParserDispatch>(
        parser: &mut Parser<T>,
        parent: Option<Shared<Block>>,
    ) -> Result<Shared<dyn Op>> {
        let mut operation = Operation::default();
        operation.set_parent(parent);
        parser.parse_operation_name_into::<SlotOp>(&mut operation)?;
        let name = parser.parse_string()?;
        let attributes = Attributes::new();
        attributes.insert("name", Arc::new(StringAttr::new(&name)));
        operation.set_attributes(attributes);
        parser.expect(TokenKind::Comma)?;
        let operand = parser.parse_op_operand()?;
        let operands = OpOperands::from_vec(vec![operand]);
        parser.expect(TokenKind::Colon)?;
        let types = parser.parse_types()?;
        parser.verify_operand_types(&operands, &types)?;
        operation.set_operands(operands);
        Ok(finish_op::<SlotOp>(operation, no_results()))
    }
}

op_struct!(
    /// `torch.global_slot`
    ///
    /// ```ebnf
    /// `torch.global_slot` `private`? symbol `:` type `{` op* global_slot_init `}`
    /// ```
    ///
    /// The body computes the initial value, which has to be a subtype of the
    /// declared type.
    GlobalSlotOp,
    "torch.global_slot"
);

impl GlobalSlotOp {
    pub fn slot_name(&self) -> String {
        get_symbol(self, "sym_name")
    }
    pub fn declared_type(&self) -> Result<TorchType> {
        declared_type(self)
    }
}

impl Op for GlobalSlotOp {
    op_boilerplate!(GlobalSlotOp);
    fn symbol_name(&self) -> Option<String> {
        Some(self.slot_name())
    }
    fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
        let declared = declared_type(self)?;
        let region = match self.region() {
            Some(region) => region,
            None => return Err(anyhow::anyhow!("requires an initializer region")),
        };
        let terminator = region.rd().entry().and_then(|block| block.rd().terminator());
        let terminator = match terminator {
            Some(terminator) if terminator.is::<GlobalSlotInitOp>() => terminator,
            _ => {
                return Err(anyhow::anyhow!(
                    "initializer must end with 'torch.global_slot.init'"
                ))
            }
        };
        let initial = operand_type(&*terminator.rd(), 0)?;
        if !initial.is_subtype(&declared) {
            return Err(anyhow::anyhow!(
                "initial value of type {initial} is not a subtype of {declared}"
            ));
        }
        Ok(())
    }
    fn display(&self, f: &mut Formatter<'_>, indent: i32) -> std::fmt::Result {
        let typ = declared_type(self).map_err(|_| std::fmt::Error)?;
        write!(
            f,
            "{} {}@{} : {typ}",
            self.name(),
            private_prefix(self),
            self.slot_name()
        )?;
        match self.region() {
            Some(region) => region.rd().display(f, indent),
            None => Ok(()),
        }
    }
}

impl Parse for GlobalSlotOp {
    fn op<T: ParserDispatch>(
        parser: &mut Parser<T>,
        parent: Option<Shared<Block>>,
    ) -> Result<Shared<dyn Op>> {
        let mut operation = Operation::default();
        operation.set_parent(parent);
        parser.parse_operation_name_into::<GlobalSlotOp>(&mut operation)?;
        let attributes = Attributes::new();
        parse_private(parser, &attributes);
        let name = parser.parse_symbol()?;
        attributes.insert("sym_name", Arc::new(SymbolAttr::new(&name)));
        parser.expect(TokenKind::Colon)?;
        let typ = parser.parse_type()?;
        attributes.insert("type", Arc::new(TypeAttr::new(typ)));
        operation.set_attributes(attributes);
        parse_body::<T, GlobalSlotOp>(parser, operation, no_results())
    }
}

simple_op!(
    /// `torch.global_slot.init`
    ///
    /// Terminator of the initializer of a `torch.global_slot`.
    GlobalSlotInitOp,
    "torch.global_slot.init",
    {
        fn is_terminator(&self) -> bool {
            true
        }
        fn verify(&self, _symbols: &SymbolTable) -> Result<()> {
            expect_parent::<GlobalSlotOp>(self)?;
            if self.operation.rd().operands().len() != 1 {
                return Err(anyhow::anyhow!("expected exactly one initial value"));
            }
            Ok(())
        }
    }
);

fn slot_type(op: &dyn Op, symbols: &SymbolTable) -> Result<(String, TorchType)> {
    let name = get_symbol(op, "slot");
    match symbols.global_slot(&name) {
        Some(typ) => Ok((name, typ.clone())),
        None => Err(anyhow::anyhow!("unknown global slot @{name}")),
    }
}

op_struct!(
    /// `torch.global_slot.get`
    ///
    /// ```ebnf
    /// `torch.global_slot.get` symbol `:` type($result)
    /// ```
    GlobalSlotGetOp,
    "torch.global_slot.get"
);

impl Op for GlobalSlotGetOp {
    op_boilerplate!(GlobalSlotGetOp);
    fn verify(&self, symbols: &SymbolTable) -> Result<()> {
        let (name, declared) = slot_type(self, symbols)?;
        let result = result_type(self, 0)?;
        if !declared.is_subtype(&result) {
            return Err(anyhow::anyhow!(
                "global slot @{name} of type {declared} cannot be read as {result}"
            ));
        }
        Ok(())
    }
    fn display(&self, f: &mut Formatter<'_>, _indent: i32) -> std::fmt::Result {
        let operation = self.operation.rd();
        operation.display_results(f)?;
        let types = operation.result_types().map_err(|_| std::fmt::Error)?;
        write!(f, "{} @{} : {types}", operation.name(), get_symbol(self, "slot"))
    }
}

impl Parse for GlobalSlotGetOp {
    fn op<T: ParserDispatch>(
        parser: &mut Parser<T>,
        parent: Option<Shared<Block>>,
    ) -> Result<Shared<dyn Op>> {
        let mut operation = Operation::default();
        operation.set_parent(parent);
        let results = parser.parse_op_results_into(&mut operation)?;
        parser.parse_operation_name_into::<GlobalSlotGetOp>(&mut operation)?;
        let name = parser.parse_symbol()?;
        let attributes = Attributes::new();
        attributes.insert("slot", Arc::new(SymbolAttr::new(&name)));
        operation.set_attributes(attributes);
        parser.expect(TokenKind::Colon)?;
        let typ = parser.parse_type()?;
        results.set_types(vec![typ])?;
        Ok(finish_op::<GlobalSlotGetOp>(operation, results))
    }
}

op_struct!(
    /// `torch.global_slot.set`
    ///
    /// ```ebnf
    /// `torch.global_slot.set` symbol `=` $value `:` type($value)
    /// ```
    GlobalSlotSetOp,
    "torch.global_slot.set"
);

impl Op for GlobalSlotSetOp {
    op_boilerplate!(GlobalSlotSetOp);
    fn verify(&self, symbols: &SymbolTable) -> Result<()> {
        let (name, declared) = slot_type(self, symbols)?;
        let value = operand_type(self, 0)?;
        if !value.is_subtype(&declared) {
            return Err(anyhow::anyhow!(
                "cannot store {value} into global slot @{name} of type {declared}"
            ));
        }
        Ok(())
    }
    fn display(&self, f: &mut Formatter<'_>, _indent: i32) -> std::fmt::Result {
        let operation = self.operation.rd();
        let types = operation.operand_types().map_err(|_| std::fmt::Error)?;
        write!(
            f,
            "{} @{} = {} : {types}",
            operation.name(),
            get_symbol(self, "slot"),
            operation.operands()
        )
    }
}

impl Parse for GlobalSlotSetOp {
    fn op<T: ParserDispatch>(
        parser: &mut Parser<T>,
        parent: Option<Shared<Block>>,
    ) -> Result<Shared<dyn Op>> {
        let mut operation = Operation::default();
        operation.set_parent(parent);
        parser.parse_operation_name_into::<GlobalSlotSetOp>(&mut operation)?;
        let name = parser.parse_symbol()?;
        let attributes = Attributes::new();
        attributes.insert("slot", Arc::new(SymbolAttr::new(&name)));
        operation.set_attributes(attributes);
        parser.expect(TokenKind::Equal)?;
        let operands = OpOperands::from_vec(vec![parser.parse_op_operand()?]);
        parser.expect(TokenKind::Colon)?;
        let types = parser.parse_types()?;
        parser.verify_operand_types(&operands, &types)?;
        operation.set_operands(operands);
        Ok(finish_op::<GlobalSlotSetOp>(operation, no_results()))
    }
}

/// Parse `%m["name"]` and return the receiver operand and the name.
fn parse_member<T: ParserDispatch>(parser: &mut Parser<T>, operation: &mut Operation) -> Result<()> {
    let receiver = parser.parse_op_operand()?;
    parser.expect(TokenKind::LBracket)?;
    let name = parser.parse_string()?;
    parser.expect(TokenKind::RBracket)?;
    let attributes = Attributes::new();
    attributes.insert("name", Arc::new(StringAttr::new(&name)));
    operation.set_attributes(attributes);
    operation.set_operands(OpOperands::from_vec(vec![receiver]));
    Ok(())
}

fn display_member(op: &dyn Op, f: &mut Formatter<'_>) -> std::fmt::Result {
    let operation = op.operation().rd();
    let receiver = operation.operand(0).ok_or(std::fmt::Error)?;
    let receiver = receiver.rd().to_string();
    write!(f, "{} {receiver}[\"{}\"]", operation.name(), get_str(op, "name"))
}

/// Attribute `member` of the receiver's class.
fn class_attribute<'a>(
    op: &dyn Op,
    symbols: &'a SymbolTable,
    member: &str,
) -> Result<&'a AttrDecl> {
    let layout = receiver_class(op, symbols)?;
    match layout.attribute(member) {
        Some(attr) => {
            check_access(op, symbols, layout.name(), member, attr.private)?;
            Ok(attr)
        }
        None => Err(anyhow::anyhow!(
            "class \"{}\" has no attribute \"{member}\"",
            layout.name()
        )),
    }
}

op_struct!(
    /// `torch.prim.GetAttr`
    ///
    /// ```ebnf
    /// `torch.prim.GetAttr` $receiver `[` string `]` `:` type($receiver) `->` type($result)
    /// ```
    GetAttrOp,
    "torch.prim.GetAttr"
);

impl GetAttrOp {
    pub fn attr_name(&self) -> String {
        get_str(self, "name")
    }
}

impl Op for GetAttrOp {
    op_boilerplate!(GetAttrOp);
    fn verify(&self, symbols: &SymbolTable) -> Result<()> {
        let attr = class_attribute(self, symbols, &self.attr_name())?;
        let result = result_type(self, 0)?;
        if !attr.typ.is_subtype(&result) {
            return Err(anyhow::anyhow!(
                "attribute \"{}\" of type {} cannot be read as {result}",
                attr.name,
                attr.typ
            ));
        }
        Ok(())
    }
    fn display(&self, f: &mut Formatter<'_>, _indent: i32) -> std::fmt::Result {
        let operation = self.operation.rd();
        operation.display_results(f)?;
        display_member(self, f)?;
        let operands = operation.operand_types().map_err(|_| std::fmt::Error)?;
        let results = operation.result_types().map_err(|_| std::fmt::Error)?;
        write!(f, " : {operands} -> {results}")
    }
}

impl Parse for GetAttrOp {
    fn op<T: ParserDispatch>(
        parser: &mut Parser<T>,
        parent: Option<Shared<Block>>,
    ) -> Result<Shared<dyn Op>> {
        let mut operation = Operation::default();
        operation.set_parent(parent);
        let results = parser.parse_op_results_into(&mut operation)?;
        parser.parse_operation_name_into::<GetAttrOp>(&mut operation)?;
        parse_member(parser, &mut operation)?;
        parser.expect(TokenKind::Colon)?;
        let types = Types::from_vec(vec![parser.parse_type()?]);
        parser.verify_operand_types(&operation.operands(), &types)?;
        parser.expect(TokenKind::Arrow)?;
        let typ = parser.parse_type()?;
        results.set_types(vec![typ])?;
        Ok(finish_op::<GetAttrOp>(operation, results))
    }
}

op_struct!(
    /// `torch.prim.SetAttr`
    ///
    /// ```ebnf
    /// `torch.prim.SetAttr` $receiver `[` string `]` `=` $value `:` type($receiver) `,` type($value)
    /// ```
    SetAttrOp,
    "torch.prim.SetAttr"
);

impl SetAttrOp {
    pub fn attr_name(&self) -> String {
        get_str(self, "name")
    }
}

impl Op for SetAttrOp {
    op_boilerplate!(SetAttrOp);
    fn verify(&self, symbols: &SymbolTable) -> Result<()> {
        let attr = class_attribute(self, symbols, &self.attr_name())?;
        let value = operand_type(self, 1)?;
        if !value.is_subtype(&attr.typ) {
            return Err(anyhow::anyhow!(
                "cannot store {value} into attribute \"{}\" of type {}",
                attr.name,
                attr.typ
            ));
        }
        Ok(())
    }
    fn display(&self, f: &mut Formatter<'_>, _indent: i32) -> std::fmt::Result {
        let operation = self.operation.rd();
        display_member(self, f)?;
        let value = operation.operand(1).ok_or(std::fmt::Error)?;
        let types = operation.operand_types().map_err(|_| std::fmt::Error)?;
        let value = value.rd().to_string();
        write!(f, " = {value} : {types}")
    }
}

impl Parse for SetAttrOp {
    fn op<T: ParserDispatch>(
        parser: &mut Parser<T>,
        parent: Option<Shared<Block>>,
    ) -> Result<Shared<dyn Op>> {
        let mut operation = Operation::default();
        operation.set_parent(parent);
        parser.parse_operation_name_into::<SetAttrOp>(&mut operation)?;
        parse_member(parser, &mut operation)?;
        parser.expect(TokenKind::Equal)?;
        let value = parser.parse_op_operand()?;
        let receiver = operation.operands().vec().rd().clone();
        let operands = OpOperands::from_vec(vec![receiver[0].clone(), value]);
        parser.expect(TokenKind::Colon)?;
        let types = parser.parse_types()?;
        parser.verify_operand_types(&operands, &types)?;
        operation.set_operands(operands);
        Ok(finish_op::<SetAttrOp>(operation, no_results()))
    }
}

op_struct!(
    /// `torch.prim.CallMethod`
    ///
    /// ```ebnf
    /// `torch.prim.CallMethod` $receiver `[` string `]` `(` $args `)`
    ///     `:` type($receiver) `,` `(` type($args) `)` `->` type($results)
    /// ```
    ///
    /// The receiver is passed as the first argument of the function that is
    /// bound to the method.
    CallMethodOp,
    "torch.prim.CallMethod"
);

impl CallMethodOp {
    pub fn method_name(&self) -> String {
        get_str(self, "name")
    }
}

impl Op for CallMethodOp {
    op_boilerplate!(CallMethodOp);
    fn verify(&self, symbols: &SymbolTable) -> Result<()> {
        let layout = receiver_class(self, symbols)?;
        let name = self.method_name();
        let method = match layout.method(&name) {
            Some(method) => method,
            None => {
                return Err(anyhow::anyhow!(
                    "class \"{}\" has no method \"{name}\"",
                    layout.name()
                ))
            }
        };
        check_access(self, symbols, layout.name(), &name, method.private)?;
        let signature = match symbols.function(&method.function) {
            Some(signature) => signature,
            None => return Err(anyhow::anyhow!("unknown function @{}", method.function)),
        };
        let operation = self.operation.rd();
        let operands = operation.operand_types()?;
        if operands.len() != signature.inputs.len() {
            return Err(anyhow::anyhow!(
                "@{} expects {} arguments including the receiver, but got {}",
                method.function,
                signature.inputs.len(),
                operands.len()
            ));
        }
        for (i, (actual, expected)) in operands.vec().iter().zip(&signature.inputs).enumerate().skip(1) {
            if !is_assignable(actual, expected) {
                return Err(anyhow::anyhow!(
                    "argument #{i} has type {}, but @{} expects {}",
                    actual.rd(),
                    method.function,
                    expected.rd()
                ));
            }
        }
        let results = operation.result_types()?;
        if results.to_string() != Types::from_vec(signature.outputs.clone()).to_string() {
            return Err(anyhow::anyhow!(
                "results ({results}) differ from the results of @{}",
                method.function
            ));
        }
        Ok(())
    }
    fn display(&self, f: &mut Formatter<'_>, _indent: i32) -> std::fmt::Result {
        let operation = self.operation.rd();
        operation.display_results(f)?;
        display_member(self, f)?;
        let operands = operation.operands().values();
        let args = OpOperands::from_values(&operands[1..]);
        let types = operation.operand_types().map_err(|_| std::fmt::Error)?;
        let types = types.vec();
        let receiver_type = types[0].rd().to_string();
        let arg_types = Types::from_vec(types[1..].to_vec());
        write!(f, " ({args}) : {receiver_type}, ({arg_types}) -> ")?;
        let results = operation.result_types().map_err(|_| std::fmt::Error)?;
        results.display_results(f)
    }
}

/// Whether a value of type `actual` may be passed where `expected` is
/// declared.
pub(crate) fn is_assignable(actual: &Shared<dyn Type>, expected: &Shared<dyn Type>) -> bool {
    match (torch_type(actual), torch_type(expected)) {
        (Some(actual), Some(expected)) => actual.is_subtype(&expected),
        _ => actual.rd().to_string() == expected.rd().to_string(),
    }
}

impl Parse for CallMethodOp {
    fn op<T: ParserDispatch>(
        parser: &mut Parser<T>,
        parent: Option<Shared<Block>>,
    ) -> Result<Shared<dyn Op>> {
        let mut operation = Operation::default();
        operation.set_parent(parent);
        let results = parser.parse_op_results_into(&mut operation)?;
        parser.parse_operation_name_into::<CallMethodOp>(&mut operation)?;
        parse_member(parser, &mut operation)?;
        parser.expect(TokenKind::LParen)?;
        let args = parser.parse_op_operands()?;
        parser.expect(TokenKind::RParen)?;
        let mut operands = operation.operands().vec().rd().clone();
        operands.extend(args.vec().rd().iter().cloned());
        let operands = OpOperands::from_vec(operands);
        parser.expect(TokenKind::Colon)?;
        let mut types = vec![parser.parse_type()?];
        parser.expect(TokenKind::Comma)?;
        types.extend(parser.parse_parenthesized_types()?.vec());
        parser.verify_operand_types(&operands, &Types::from_vec(types))?;
        operation.set_operands(operands);
        parser.expect(TokenKind::Arrow)?;
        let result_types = parser.parse_result_types()?;
        results.set_types(result_types.vec())?;
        Ok(finish_op::<CallMethodOp>(operation, results))
    }
}
