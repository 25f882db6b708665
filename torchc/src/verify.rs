//! Verification entry point.
//!
//! The verifier first indexes the symbols of a module (functions, class
//! types and global slots) into a [SymbolTable] and then walks every op. For
//! each op it checks the structural rules (operands are defined before use
//! and terminators come last) and calls [Op::verify] for the op-specific
//! rules. All failures are collected into [Diagnostics].
use crate::dialect::func::FuncOp;
use crate::dialect::torch::ClassTypeOp;
use crate::dialect::torch::GlobalSlotOp;
use crate::dialect::torch::TorchType;
use crate::ir::GuardedOp;
use crate::ir::Op;
use crate::ir::Region;
use crate::ir::Type;
use crate::shared::ptr_id;
use crate::shared::Shared;
use crate::shared::SharedExt;
use crate::Error;
use anyhow::Result;
use std::collections::HashMap;
use std::collections::HashSet;
use tracing::debug;

/// A single verification failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{location}: '{op}' op {message}")]
pub struct Diagnostic {
    pub location: String,
    pub op: String,
    pub message: String,
}

impl Diagnostic {
    fn new(op: &dyn Op, err: &anyhow::Error) -> Self {
        let message = match err.downcast_ref::<Error>() {
            Some(Error::Verification { message, .. }) => message.clone(),
            Some(Error::Legalization { message, .. }) => message.clone(),
            Some(Error::AttributeRange { message, .. }) => {
                format!("attribute out of range: {message}")
            }
            _ => err.to_string(),
        };
        Diagnostic {
            location: op.location(),
            op: op.name().to_string(),
            message,
        }
    }
}

fn join_lines(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|diagnostic| diagnostic.to_string())
        .collect::<Vec<String>>()
        .join("\n")
}

/// The failures of one verification run in visiting order.
#[derive(Debug, Clone, Default, PartialEq, thiserror::Error)]
#[error("{}", join_lines(.diagnostics))]
pub struct Diagnostics {
    pub diagnostics: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }
    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }
    pub fn first(&self) -> Option<&Diagnostic> {
        self.diagnostics.first()
    }
    fn push(&mut self, op: &dyn Op, err: &anyhow::Error) {
        self.diagnostics.push(Diagnostic::new(op, err));
    }
}

/// An attribute declared by a `torch.class_type`.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrDecl {
    pub name: String,
    pub typ: TorchType,
    pub private: bool,
}

/// A method declared by a `torch.class_type`.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDecl {
    /// Symbol of the function that implements the method.
    pub function: String,
    pub private: bool,
}

/// Attributes and methods of a class, indexed by name.
///
/// The slot index of an attribute is its position in the class type, which
/// is also the position of its `torch.slot` in every `torch.nn_module`.
#[derive(Debug, Clone)]
pub struct ClassLayout {
    name: String,
    attributes: Vec<AttrDecl>,
    slots: HashMap<String, usize>,
    methods: Vec<(String, MethodDecl)>,
    method_index: HashMap<String, usize>,
}

impl ClassLayout {
    pub fn new(name: &str) -> Self {
        ClassLayout {
            name: name.to_string(),
            attributes: vec![],
            slots: HashMap::new(),
            methods: vec![],
            method_index: HashMap::new(),
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn add_attribute(&mut self, attr: AttrDecl) -> Result<()> {
        if self.slots.contains_key(&attr.name) {
            return Err(anyhow::anyhow!(
                "duplicate attribute \"{}\" in class \"{}\"",
                attr.name,
                self.name
            ));
        }
        self.slots.insert(attr.name.clone(), self.attributes.len());
        self.attributes.push(attr);
        Ok(())
    }
    pub fn add_method(&mut self, name: &str, method: MethodDecl) -> Result<()> {
        if self.method_index.contains_key(name) {
            return Err(anyhow::anyhow!(
                "duplicate method \"{name}\" in class \"{}\"",
                self.name
            ));
        }
        self.method_index.insert(name.to_string(), self.methods.len());
        self.methods.push((name.to_string(), method));
        Ok(())
    }
    pub fn attributes(&self) -> &[AttrDecl] {
        &self.attributes
    }
    pub fn methods(&self) -> impl Iterator<Item = (&str, &MethodDecl)> {
        self.methods
            .iter()
            .map(|(name, method)| (name.as_str(), method))
    }
    pub fn slot_index(&self, name: &str) -> Option<usize> {
        self.slots.get(name).copied()
    }
    pub fn attribute(&self, name: &str) -> Option<&AttrDecl> {
        self.slot_index(name).map(|index| &self.attributes[index])
    }
    pub fn method(&self, name: &str) -> Option<&MethodDecl> {
        self.method_index
            .get(name)
            .map(|index| &self.methods[*index].1)
    }
}

/// Argument and result types of a function.
#[derive(Clone)]
pub struct Signature {
    pub inputs: Vec<Shared<dyn Type>>,
    pub outputs: Vec<Shared<dyn Type>>,
}

/// Module-level symbols.
#[derive(Default)]
pub struct SymbolTable {
    functions: HashMap<String, Signature>,
    classes: HashMap<String, ClassLayout>,
    global_slots: HashMap<String, TorchType>,
    /// Function symbol to the classes that use it as a method.
    methods: HashMap<String, Vec<String>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }
    /// Index the top-level ops of `module`.
    pub fn build(module: &Shared<dyn Op>) -> Result<Self> {
        let mut symbols = SymbolTable::new();
        for op in module.ops() {
            let op = op.rd();
            let any = op.as_any();
            if let Some(func) = any.downcast_ref::<FuncOp>() {
                let name = func.sym_name().unwrap_or_default();
                let signature = Signature {
                    inputs: func.argument_types()?.vec(),
                    outputs: func.result_types()?.vec(),
                };
                if symbols.functions.insert(name.clone(), signature).is_some() {
                    return Err(anyhow::anyhow!("redefinition of function @{name}"));
                }
            } else if let Some(class) = any.downcast_ref::<ClassTypeOp>() {
                let layout = class.layout()?;
                let name = layout.name().to_string();
                for (_, method) in layout.methods() {
                    let classes = symbols.methods.entry(method.function.clone()).or_default();
                    classes.push(name.clone());
                }
                if symbols.classes.insert(name.clone(), layout).is_some() {
                    return Err(anyhow::anyhow!("redefinition of class @{name}"));
                }
            } else if let Some(slot) = any.downcast_ref::<GlobalSlotOp>() {
                let name = slot.slot_name();
                let typ = slot.declared_type()?;
                if symbols.global_slots.insert(name.clone(), typ).is_some() {
                    return Err(anyhow::anyhow!("redefinition of global slot @{name}"));
                }
            }
        }
        Ok(symbols)
    }
    pub fn function(&self, name: &str) -> Option<&Signature> {
        self.functions.get(name)
    }
    pub fn class(&self, name: &str) -> Option<&ClassLayout> {
        self.classes.get(name)
    }
    pub fn global_slot(&self, name: &str) -> Option<&TorchType> {
        self.global_slots.get(name)
    }
    pub fn is_method_of(&self, function: &str, class: &str) -> bool {
        match self.methods.get(function) {
            Some(classes) => classes.iter().any(|c| c == class),
            None => false,
        }
    }
}

struct Verifier<'a> {
    symbols: &'a SymbolTable,
    diagnostics: Diagnostics,
}

impl Verifier<'_> {
    fn check_op(&mut self, op: &Shared<dyn Op>, visible: &mut HashSet<usize>, is_last: bool) {
        let guard = op.rd();
        let operation = guard.operation().rd();
        for (i, value) in operation.operands().values().iter().enumerate() {
            if !visible.contains(&ptr_id(value)) {
                let name = value.rd().name().unwrap_or_default();
                let err = anyhow::anyhow!("operand #{i} ({name}) does not dominate this use");
                self.diagnostics.push(&*guard, &err);
            }
        }
        if guard.is_terminator() && !is_last {
            let err = anyhow::anyhow!("terminator must be the last op in its block");
            self.diagnostics.push(&*guard, &err);
        }
        let regions = operation.regions();
        let results = operation.results();
        drop(operation);
        for region in regions {
            self.check_region(&region, &mut visible.clone());
        }
        if let Err(err) = guard.verify(self.symbols) {
            self.diagnostics.push(&*guard, &err);
        }
        for result in results.into_iter() {
            visible.insert(ptr_id(&result));
        }
    }
    fn check_region(&mut self, region: &Shared<Region>, visible: &mut HashSet<usize>) {
        for block in region.rd().blocks() {
            let block = block.rd();
            for argument in block.arguments().into_iter() {
                visible.insert(ptr_id(&argument));
            }
            let ops = block.ops().rd().clone();
            let count = ops.len();
            for (i, op) in ops.iter().enumerate() {
                self.check_op(op, visible, i + 1 == count);
            }
        }
    }
}

/// Verify a complete unit.
///
/// Returns all failures in the order in which the ops were visited.
pub fn verify(module: &Shared<dyn Op>) -> std::result::Result<(), Diagnostics> {
    let symbols = match SymbolTable::build(module) {
        Ok(symbols) => symbols,
        Err(err) => {
            let mut diagnostics = Diagnostics::default();
            diagnostics.push(&*module.rd(), &err);
            return Err(diagnostics);
        }
    };
    let mut verifier = Verifier {
        symbols: &symbols,
        diagnostics: Diagnostics::default(),
    };
    verifier.check_op(module, &mut HashSet::new(), true);
    debug!("Verification found {} problems", verifier.diagnostics.len());
    if verifier.diagnostics.is_empty() {
        Ok(())
    } else {
        Err(verifier.diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::DefaultParserDispatch;
    use crate::frontend::Parser;
    use indoc::indoc;

    fn parse(src: &str) -> Shared<dyn Op> {
        Parser::<DefaultParserDispatch>::parse(src).unwrap()
    }

    #[test]
    fn test_class_layout() {
        let mut layout = ClassLayout::new("c");
        let typ = TorchType::Int;
        let attr = |name: &str| AttrDecl {
            name: name.to_string(),
            typ: typ.clone(),
            private: false,
        };
        layout.add_attribute(attr("w")).unwrap();
        layout.add_attribute(attr("b")).unwrap();
        assert!(layout.add_attribute(attr("w")).is_err());
        assert_eq!(layout.slot_index("b"), Some(1));
        assert_eq!(layout.attribute("c"), None);
    }

    #[test]
    fn test_terminator_not_last() {
        let src = indoc! {"
        func.func @f(%x : !torch.int) -> !torch.int {
          return %x : !torch.int
          %0 = torch.constant.int 1
        }"};
        let diagnostics = verify(&parse(src)).unwrap_err();
        let messages = diagnostics
            .diagnostics
            .iter()
            .map(|d| d.message.clone())
            .collect::<Vec<String>>();
        assert!(messages.contains(&"terminator must be the last op in its block".to_string()));
    }

    #[test]
    fn test_yield_outside_if() {
        let src = indoc! {"
        func.func @f(%x : !torch.int) -> !torch.int {
          torch.prim.If.yield %x : !torch.int
          return %x : !torch.int
        }"};
        let diagnostics = verify(&parse(src)).unwrap_err();
        let parent = diagnostics
            .diagnostics
            .iter()
            .find(|d| d.message == "expects parent op 'torch.prim.If'")
            .unwrap();
        assert_eq!(parent.op, "torch.prim.If.yield");
    }

    #[test]
    fn test_dict_construct_lengths() {
        let src = indoc! {r#"
        func.func @f(%x : !torch.int) -> !torch.dict<str, int> {
          %a = torch.constant.str "a"
          %b = torch.constant.str "b"
          %0 = torch.prim.DictConstruct keys(%a, %b : !torch.str, !torch.str) values(%x : !torch.int) -> !torch.dict<str, int>
          return %0 : !torch.dict<str, int>
        }"#};
        let diagnostics = verify(&parse(src)).unwrap_err();
        assert_eq!(diagnostics.len(), 1);
        let first = diagnostics.first().unwrap();
        assert_eq!(first.op, "torch.prim.DictConstruct");
        assert!(first.message.contains("got 2 keys, but 1 values"), "{}", first.message);

        let fixed = src.replace("values(%x : !torch.int)", "values(%x, %x : !torch.int, !torch.int)");
        assert!(verify(&parse(&fixed)).is_ok());
    }

    #[test]
    fn test_unknown_callee() {
        let src = indoc! {"
        func.func @f(%x : !torch.int) -> !torch.int {
          %0 = func.call @g(%x) : (!torch.int) -> !torch.int
          return %0 : !torch.int
        }"};
        let diagnostics = verify(&parse(src)).unwrap_err();
        assert_eq!(diagnostics.len(), 1);
        let first = diagnostics.first().unwrap();
        assert_eq!(first.op, "func.call");
        assert_eq!(first.message, "unknown function @g");
    }
}
