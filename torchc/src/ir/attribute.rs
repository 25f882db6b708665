use crate::ir::Type;
use crate::shared::Shared;
use crate::shared::SharedExt;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::fmt::Formatter;
use std::sync::Arc;

/// Attributes are known-constant values of operations (a variable is not allowed).
/// Attributes belong to operations and can be used to, for example, specify
/// the predicate of a comparison or the permutation of a transpose.
pub trait Attribute {
    fn as_any(&self) -> &dyn std::any::Any;
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result;
}

impl Display for dyn Attribute {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.display(f)
    }
}

/// Print a float such that it scans back as a float literal.
pub fn format_float(value: f64) -> String {
    format!("{value:?}")
}

/// Escape a string for printing between double quotes.
pub fn escape(src: &str) -> String {
    src.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Inverse of [escape].
pub fn unescape(src: &str) -> String {
    let mut out = String::new();
    let mut chars = src.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

macro_rules! attribute_impl {
    ($ty:ident) => {
        impl Attribute for $ty {
            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
            fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{self}")
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegerAttr {
    value: i64,
}

impl IntegerAttr {
    pub fn new(value: i64) -> Self {
        Self { value }
    }
    pub fn value(&self) -> i64 {
        self.value
    }
}

impl Display for IntegerAttr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

attribute_impl!(IntegerAttr);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FloatAttr {
    value: f64,
}

impl FloatAttr {
    pub fn new(value: f64) -> Self {
        Self { value }
    }
    pub fn value(&self) -> f64 {
        self.value
    }
}

impl Display for FloatAttr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", format_float(self.value))
    }
}

attribute_impl!(FloatAttr);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BooleanAttr {
    value: bool,
}

impl BooleanAttr {
    pub fn new(value: bool) -> Self {
        Self { value }
    }
    pub fn value(&self) -> bool {
        self.value
    }
}

impl Display for BooleanAttr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

attribute_impl!(BooleanAttr);

#[derive(Debug, Clone, PartialEq)]
pub struct StringAttr {
    value: String,
}

impl StringAttr {
    pub fn new(value: &str) -> Self {
        Self {
            value: value.to_string(),
        }
    }
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl Display for StringAttr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{}\"", escape(&self.value))
    }
}

attribute_impl!(StringAttr);

/// Reference to a symbol such as a function or a global slot, `@forward`.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolAttr {
    name: String,
}

impl SymbolAttr {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.trim_start_matches('@').to_string(),
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Display for SymbolAttr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.name)
    }
}

attribute_impl!(SymbolAttr);

/// Dense list of integers, such as a permutation `[1, 0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayAttr {
    values: Vec<i64>,
}

impl ArrayAttr {
    pub fn new(values: Vec<i64>) -> Self {
        Self { values }
    }
    pub fn values(&self) -> &[i64] {
        &self.values
    }
}

impl Display for ArrayAttr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let joined = self
            .values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<String>>()
            .join(", ");
        write!(f, "[{joined}]")
    }
}

attribute_impl!(ArrayAttr);

/// Element data of a constant tensor, `dense<1.0>` or `dense<[1, 2]>`.
///
/// A single value is a splat and fills the whole tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseAttr {
    values: Vec<f64>,
    is_float: bool,
    is_splat: bool,
}

impl DenseAttr {
    pub fn splat(value: f64, is_float: bool) -> Self {
        Self {
            values: vec![value],
            is_float,
            is_splat: true,
        }
    }
    pub fn new(values: Vec<f64>, is_float: bool) -> Self {
        Self {
            values,
            is_float,
            is_splat: false,
        }
    }
    pub fn values(&self) -> &[f64] {
        &self.values
    }
    pub fn is_splat(&self) -> bool {
        self.is_splat
    }
    /// Expand to `count` elements.
    pub fn expand(&self, count: usize) -> Vec<f64> {
        if self.is_splat {
            vec![self.values[0]; count]
        } else {
            self.values.clone()
        }
    }
    fn format(&self, value: f64) -> String {
        if self.is_float {
            format_float(value)
        } else {
            format!("{}", value as i64)
        }
    }
}

impl Display for DenseAttr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_splat {
            write!(f, "dense<{}>", self.format(self.values[0]))
        } else {
            let joined = self
                .values
                .iter()
                .map(|v| self.format(*v))
                .collect::<Vec<String>>()
                .join(", ");
            write!(f, "dense<[{joined}]>")
        }
    }
}

attribute_impl!(DenseAttr);

/// A type stored as attribute, such as the declared type of `torch.attr`.
#[derive(Clone)]
pub struct TypeAttr {
    typ: Shared<dyn Type>,
}

impl TypeAttr {
    pub fn new(typ: Shared<dyn Type>) -> Self {
        Self { typ }
    }
    pub fn typ(&self) -> Shared<dyn Type> {
        self.typ.clone()
    }
}

impl Display for TypeAttr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.typ.rd())
    }
}

attribute_impl!(TypeAttr);

/// Named attributes of an operation, printed as `{name = value}`.
///
/// Keys are ordered so that printing is deterministic.
#[derive(Clone)]
pub struct Attributes {
    map: Shared<BTreeMap<String, Arc<dyn Attribute>>>,
}

impl Attributes {
    pub fn new() -> Self {
        Self {
            map: Shared::new(BTreeMap::new().into()),
        }
    }
    pub fn map(&self) -> Shared<BTreeMap<String, Arc<dyn Attribute>>> {
        self.map.clone()
    }
    pub fn is_empty(&self) -> bool {
        self.map.rd().is_empty()
    }
    pub fn insert(&self, name: &str, attribute: Arc<dyn Attribute>) {
        self.map.wr().insert(name.to_string(), attribute);
    }
    pub fn get(&self, name: &str) -> Option<Arc<dyn Attribute>> {
        self.map.rd().get(name).cloned()
    }
    pub fn remove(&self, name: &str) {
        self.map.wr().remove(name);
    }
    /// Copy the map so that changes to the copy do not affect the original.
    pub fn deep_clone(&self) -> Self {
        let map = self.map.rd().clone();
        Self {
            map: Shared::new(map.into()),
        }
    }
    pub fn get_int(&self, name: &str) -> Option<i64> {
        let attr = self.get(name)?;
        let attr = attr.as_any().downcast_ref::<IntegerAttr>()?;
        Some(attr.value())
    }
    pub fn get_float(&self, name: &str) -> Option<f64> {
        let attr = self.get(name)?;
        if let Some(attr) = attr.as_any().downcast_ref::<FloatAttr>() {
            return Some(attr.value());
        }
        let attr = attr.as_any().downcast_ref::<IntegerAttr>()?;
        Some(attr.value() as f64)
    }
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        let attr = self.get(name)?;
        let attr = attr.as_any().downcast_ref::<BooleanAttr>()?;
        Some(attr.value())
    }
    pub fn get_str(&self, name: &str) -> Option<String> {
        let attr = self.get(name)?;
        let attr = attr.as_any().downcast_ref::<StringAttr>()?;
        Some(attr.value().to_string())
    }
    pub fn get_symbol(&self, name: &str) -> Option<String> {
        let attr = self.get(name)?;
        let attr = attr.as_any().downcast_ref::<SymbolAttr>()?;
        Some(attr.name().to_string())
    }
    pub fn get_array(&self, name: &str) -> Option<Vec<i64>> {
        let attr = self.get(name)?;
        let attr = attr.as_any().downcast_ref::<ArrayAttr>()?;
        Some(attr.values().to_vec())
    }
    pub fn get_type(&self, name: &str) -> Option<Shared<dyn Type>> {
        let attr = self.get(name)?;
        let attr = attr.as_any().downcast_ref::<TypeAttr>()?;
        Some(attr.typ())
    }
    pub fn get_dense(&self, name: &str) -> Option<DenseAttr> {
        let attr = self.get(name)?;
        let attr = attr.as_any().downcast_ref::<DenseAttr>()?;
        Some(attr.clone())
    }
}

impl Default for Attributes {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Attributes {
    /// Prints nothing when empty and ` {a = 1, b = [0, 1]}` otherwise.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let map = self.map.rd();
        if map.is_empty() {
            return Ok(());
        }
        let joined = map
            .iter()
            .map(|(name, value)| format!("{name} = {value}"))
            .collect::<Vec<String>>()
            .join(", ");
        write!(f, " {{{joined}}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let attributes = Attributes::new();
        assert_eq!(attributes.to_string(), "");
        attributes.insert("perms", Arc::new(ArrayAttr::new(vec![1, 0])));
        attributes.insert("alpha", Arc::new(FloatAttr::new(1.0)));
        assert_eq!(attributes.to_string(), " {alpha = 1.0, perms = [1, 0]}");
        assert_eq!(attributes.get_array("perms"), Some(vec![1, 0]));
        assert_eq!(attributes.get_float("alpha"), Some(1.0));
        assert_eq!(attributes.get_int("alpha"), None);

        let copy = attributes.deep_clone();
        copy.remove("perms");
        assert!(attributes.get("perms").is_some());
    }

    #[test]
    fn test_dense() {
        assert_eq!(DenseAttr::splat(2.0, true).to_string(), "dense<2.0>");
        assert_eq!(DenseAttr::new(vec![1.0, 2.0], false).to_string(), "dense<[1, 2]>");
        assert_eq!(DenseAttr::splat(0.5, true).expand(3), vec![0.5, 0.5, 0.5]);
    }

    #[test]
    fn test_escape() {
        let src = "a \"quoted\"\nline";
        assert_eq!(unescape(&escape(src)), src);
    }
}
