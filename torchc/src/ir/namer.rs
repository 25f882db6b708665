use crate::ir::GuardedOp;
use crate::ir::ModuleOp;
use crate::ir::Op;
use crate::shared::Shared;
use crate::shared::SharedExt;
use std::collections::HashSet;

/// Hands out SSA names that are unique within a function.
///
/// Numbered names continue after the largest number in use, like the
/// parser-generated `%0`, `%1`, ... would.
pub struct Namer {
    used: HashSet<String>,
    next: usize,
}

fn collect_names(op: &Shared<dyn Op>, used: &mut HashSet<String>) {
    for result in op.operation().rd().results().into_iter() {
        if let Some(name) = result.rd().name() {
            used.insert(name);
        }
    }
    for region in op.rd().regions() {
        for block in region.rd().blocks() {
            for arg in block.rd().arguments().into_iter() {
                if let Some(name) = arg.rd().name() {
                    used.insert(name);
                }
            }
            for nested in block.rd().ops().rd().iter() {
                collect_names(nested, used);
            }
        }
    }
}

impl Namer {
    /// Namer for the names inside `scope`.
    pub fn new(scope: &Shared<dyn Op>) -> Self {
        let mut used = HashSet::new();
        collect_names(scope, &mut used);
        let next = used
            .iter()
            .filter_map(|name| name.trim_start_matches('%').parse::<usize>().ok())
            .max()
            .map(|max| max + 1)
            .unwrap_or(0);
        Self { used, next }
    }
    /// Namer for the function (or other top-level op) that contains `op`.
    pub fn for_op(op: &Shared<dyn Op>) -> Self {
        let mut scope = op.clone();
        while let Some(parent) = scope.parent_op() {
            if parent.is::<ModuleOp>() {
                break;
            }
            scope = parent;
        }
        Namer::new(&scope)
    }
    /// A fresh numbered name such as `%7`.
    pub fn fresh(&mut self) -> String {
        loop {
            let name = format!("%{}", self.next);
            self.next += 1;
            if self.used.insert(name.clone()) {
                return name;
            }
        }
    }
    /// A fresh name based on `base`, such as `%int5` or `%int5_0`.
    pub fn fresh_named(&mut self, base: &str) -> String {
        let name = format!("%{base}");
        if self.used.insert(name.clone()) {
            return name;
        }
        let mut i = 0;
        loop {
            let name = format!("%{base}_{i}");
            if self.used.insert(name.clone()) {
                return name;
            }
            i += 1;
        }
    }
}
