use crate::shared::Shared;
use crate::shared::SharedExt;
use anyhow::Result;
use std::fmt::Display;
use std::fmt::Formatter;
use std::str::FromStr;
use std::sync::RwLock;

pub trait Type {
    /// Display the type.
    ///
    /// This has to be implemented by each type so that calls to `Display::fmt`
    /// on a `dyn Type` can be delegated to the type's `display` method.
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result;
    fn as_any(&self) -> &dyn std::any::Any;
}

impl Display for dyn Type {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.display(f)
    }
}

/// Wrap a concrete type into a shared trait object.
pub fn new_type<T: Type + 'static>(typ: T) -> Shared<dyn Type> {
    Shared::new(RwLock::new(typ))
}

/// Structural type equality.
///
/// Types are plain data, so two types are equal when they print the same.
pub fn same_type(a: &Shared<dyn Type>, b: &Shared<dyn Type>) -> bool {
    a.rd().to_string() == b.rd().to_string()
}

/// Interface to convert a type from one dialect to another.
///
/// Implemented by each lowering to map source types onto target types.
pub trait TypeConvert {
    fn convert_type(from: &Shared<dyn Type>) -> Result<Shared<dyn Type>>;
}

/// Builtin scalar types such as `i64`, `ui8`, `f32`, or `index`.
///
/// Integers are signless except for `ui8`, which is kept separate since the
/// quantized `quint8` storage lowers to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    I1,
    I8,
    I32,
    I64,
    UI8,
    F16,
    F32,
    F64,
    Index,
}

impl ScalarType {
    pub fn is_float(&self) -> bool {
        matches!(self, ScalarType::F16 | ScalarType::F32 | ScalarType::F64)
    }
    pub fn is_integer(&self) -> bool {
        !self.is_float() && *self != ScalarType::Index
    }
    pub fn is_unsigned(&self) -> bool {
        *self == ScalarType::UI8
    }
    pub fn bit_width(&self) -> u32 {
        match self {
            ScalarType::I1 => 1,
            ScalarType::I8 | ScalarType::UI8 => 8,
            ScalarType::F16 => 16,
            ScalarType::I32 | ScalarType::F32 => 32,
            ScalarType::I64 | ScalarType::F64 | ScalarType::Index => 64,
        }
    }
    /// Smallest and largest representable value, for integers only.
    pub fn int_range(&self) -> Option<(i64, i64)> {
        match self {
            ScalarType::I1 => Some((0, 1)),
            ScalarType::I8 => Some((i8::MIN as i64, i8::MAX as i64)),
            ScalarType::UI8 => Some((0, u8::MAX as i64)),
            ScalarType::I32 => Some((i32::MIN as i64, i32::MAX as i64)),
            ScalarType::I64 | ScalarType::Index => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }
}

impl Display for ScalarType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ScalarType::I1 => "i1",
            ScalarType::I8 => "i8",
            ScalarType::I32 => "i32",
            ScalarType::I64 => "i64",
            ScalarType::UI8 => "ui8",
            ScalarType::F16 => "f16",
            ScalarType::F32 => "f32",
            ScalarType::F64 => "f64",
            ScalarType::Index => "index",
        };
        write!(f, "{text}")
    }
}

impl FromStr for ScalarType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let typ = match s {
            "i1" => ScalarType::I1,
            "i8" => ScalarType::I8,
            "i32" => ScalarType::I32,
            "i64" => ScalarType::I64,
            "ui8" => ScalarType::UI8,
            "f16" => ScalarType::F16,
            "f32" => ScalarType::F32,
            "f64" => ScalarType::F64,
            "index" => ScalarType::Index,
            _ => return Err(anyhow::anyhow!("unknown scalar type: {s}")),
        };
        Ok(typ)
    }
}

impl Type for ScalarType {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapedKind {
    /// Immutable value, `tensor<...>`.
    Tensor,
    /// Mutable buffer, `memref<...>`.
    MemRef,
}

/// Ranked builtin container such as `tensor<3x4xf32>` or `memref<3xi64>`.
///
/// Unknown dimensions are stored as `-1` and printed as `?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapedType {
    kind: ShapedKind,
    shape: Vec<i64>,
    element: ScalarType,
}

impl ShapedType {
    pub fn new(kind: ShapedKind, shape: Vec<i64>, element: ScalarType) -> Self {
        Self {
            kind,
            shape,
            element,
        }
    }
    pub fn tensor(shape: Vec<i64>, element: ScalarType) -> Self {
        Self::new(ShapedKind::Tensor, shape, element)
    }
    pub fn memref(shape: Vec<i64>, element: ScalarType) -> Self {
        Self::new(ShapedKind::MemRef, shape, element)
    }
    pub fn kind(&self) -> ShapedKind {
        self.kind
    }
    pub fn shape(&self) -> &[i64] {
        &self.shape
    }
    pub fn element(&self) -> ScalarType {
        self.element
    }
    pub fn rank(&self) -> usize {
        self.shape.len()
    }
    pub fn is_static(&self) -> bool {
        self.shape.iter().all(|d| *d >= 0)
    }
    pub fn num_elements(&self) -> i64 {
        self.shape.iter().product()
    }
}

impl Display for ShapedType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self.kind {
            ShapedKind::Tensor => "tensor",
            ShapedKind::MemRef => "memref",
        };
        write!(f, "{name}<")?;
        for dim in &self.shape {
            if *dim < 0 {
                write!(f, "?x")?;
            } else {
                write!(f, "{dim}x")?;
            }
        }
        write!(f, "{}>", self.element)
    }
}

impl FromStr for ShapedType {
    type Err = anyhow::Error;

    /// Parse `tensor<3x?xf32>`, `tensor<f32>` or `memref<4xi64>`.
    fn from_str(s: &str) -> Result<Self> {
        let (kind, rest) = if let Some(rest) = s.strip_prefix("tensor<") {
            (ShapedKind::Tensor, rest)
        } else if let Some(rest) = s.strip_prefix("memref<") {
            (ShapedKind::MemRef, rest)
        } else {
            return Err(anyhow::anyhow!("expected tensor or memref type, got {s}"));
        };
        let body = rest
            .strip_suffix('>')
            .ok_or_else(|| anyhow::anyhow!("unterminated shaped type: {s}"))?;
        let mut parts = body.split('x').collect::<Vec<&str>>();
        let element = parts
            .pop()
            .ok_or_else(|| anyhow::anyhow!("missing element type in {s}"))?;
        let element = ScalarType::from_str(element)?;
        let mut shape = vec![];
        for part in parts {
            let dim = if part == "?" {
                -1
            } else {
                part.parse::<i64>()
                    .map_err(|_| anyhow::anyhow!("invalid dimension {part} in {s}"))?
            };
            shape.push(dim);
        }
        Ok(ShapedType::new(kind, shape, element))
    }
}

impl Type for ShapedType {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// An ordered list of types, such as the operand types of an op.
#[derive(Clone, Default)]
pub struct Types {
    types: Vec<Shared<dyn Type>>,
}

impl Types {
    pub fn from_vec(types: Vec<Shared<dyn Type>>) -> Self {
        Self { types }
    }
    pub fn vec(&self) -> Vec<Shared<dyn Type>> {
        self.types.clone()
    }
    pub fn len(&self) -> usize {
        self.types.len()
    }
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
    pub fn get(&self, index: usize) -> Option<Shared<dyn Type>> {
        self.types.get(index).cloned()
    }
    /// Display as a result type list: bare for one type, parenthesized otherwise.
    pub fn display_results(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.types.len() == 1 {
            write!(f, "{self}")
        } else {
            write!(f, "({self})")
        }
    }
}

impl Display for Types {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let joined = self
            .types
            .iter()
            .map(|t| t.rd().to_string())
            .collect::<Vec<String>>()
            .join(", ");
        write!(f, "{joined}")
    }
}

/// Return the builtin scalar type if `typ` is one.
pub fn scalar_type(typ: &Shared<dyn Type>) -> Option<ScalarType> {
    typ.rd().as_any().downcast_ref::<ScalarType>().copied()
}

/// Return the builtin shaped type if `typ` is one.
pub fn shaped_type(typ: &Shared<dyn Type>) -> Option<ShapedType> {
    typ.rd().as_any().downcast_ref::<ShapedType>().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shaped_type() {
        let typ = ShapedType::from_str("tensor<3x?xf32>").unwrap();
        assert_eq!(typ.shape(), &[3, -1]);
        assert_eq!(typ.element(), ScalarType::F32);
        assert!(!typ.is_static());
        assert_eq!(typ.to_string(), "tensor<3x?xf32>");

        let typ = ShapedType::from_str("memref<f64>").unwrap();
        assert_eq!(typ.rank(), 0);
        assert_eq!(typ.num_elements(), 1);
        assert_eq!(typ.to_string(), "memref<f64>");

        assert!(ShapedType::from_str("tensor<3xbf16>").is_err());
    }

    #[test]
    fn test_scalar_type() {
        for name in ["i1", "i8", "i32", "i64", "ui8", "f16", "f32", "f64", "index"] {
            let typ = ScalarType::from_str(name).unwrap();
            assert_eq!(typ.to_string(), name);
        }
        assert_eq!(ScalarType::UI8.int_range(), Some((0, 255)));
        assert!(ScalarType::F32.int_range().is_none());
    }
}
