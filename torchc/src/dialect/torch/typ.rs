use crate::ir::new_type;
use crate::ir::ScalarType;
use crate::ir::Type;
use crate::shared::Shared;
use crate::shared::SharedExt;
use anyhow::Result;
use std::fmt::Display;
use std::fmt::Formatter;
use std::str::FromStr;

/// Element kind of a torch tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dtype {
    Bool,
    Si8,
    Ui8,
    Si32,
    Si64,
    F16,
    F32,
    F64,
    QInt8,
    QUInt8,
}

impl Dtype {
    pub fn is_float(&self) -> bool {
        matches!(self, Dtype::F16 | Dtype::F32 | Dtype::F64)
    }
    pub fn is_quantized(&self) -> bool {
        matches!(self, Dtype::QInt8 | Dtype::QUInt8)
    }
    pub fn is_integer(&self) -> bool {
        matches!(self, Dtype::Si8 | Dtype::Ui8 | Dtype::Si32 | Dtype::Si64)
    }
    /// Position in the promotion order: bool < integers < floats.
    fn category(&self) -> u8 {
        match self {
            Dtype::Bool => 0,
            Dtype::Si8 | Dtype::Ui8 | Dtype::Si32 | Dtype::Si64 => 1,
            Dtype::F16 | Dtype::F32 | Dtype::F64 => 2,
            Dtype::QInt8 | Dtype::QUInt8 => 3,
        }
    }
    fn width(&self) -> u32 {
        self.storage_type().bit_width()
    }
    /// Result element kind of an elementwise op on `self` and `other`.
    ///
    /// The higher category wins, and within a category the wider type.
    /// Mixing `si8` and `ui8` needs a wider signed type, which is `si32`.
    /// Quantized tensors do not promote.
    pub fn promote(&self, other: &Dtype) -> Option<Dtype> {
        if self.is_quantized() || other.is_quantized() {
            return None;
        }
        if self == other {
            return Some(*self);
        }
        let (a, b) = (self.category(), other.category());
        if a != b {
            return Some(if a > b { *self } else { *other });
        }
        match (self, other) {
            (Dtype::Si8, Dtype::Ui8) | (Dtype::Ui8, Dtype::Si8) => Some(Dtype::Si32),
            _ if self.width() >= other.width() => Some(*self),
            _ => Some(*other),
        }
    }
    /// Element kind of true division.
    pub fn true_divide(&self, other: &Dtype) -> Option<Dtype> {
        let promoted = self.promote(other)?;
        Some(if promoted.is_float() {
            promoted
        } else {
            Dtype::F32
        })
    }
    /// Builtin type that stores the elements.
    pub fn storage_type(&self) -> ScalarType {
        match self {
            Dtype::Bool => ScalarType::I1,
            Dtype::Si8 | Dtype::QInt8 => ScalarType::I8,
            Dtype::Ui8 | Dtype::QUInt8 => ScalarType::UI8,
            Dtype::Si32 => ScalarType::I32,
            Dtype::Si64 => ScalarType::I64,
            Dtype::F16 => ScalarType::F16,
            Dtype::F32 => ScalarType::F32,
            Dtype::F64 => ScalarType::F64,
        }
    }
    /// Quantized kind that is stored as `self`, such as `si8` for `qint8`.
    pub fn quantized(&self) -> Option<Dtype> {
        match self {
            Dtype::Si8 => Some(Dtype::QInt8),
            Dtype::Ui8 => Some(Dtype::QUInt8),
            _ => None,
        }
    }
    /// Integer kind that holds the values of a quantized kind.
    pub fn int_repr(&self) -> Option<Dtype> {
        match self {
            Dtype::QInt8 => Some(Dtype::Si8),
            Dtype::QUInt8 => Some(Dtype::Ui8),
            _ => None,
        }
    }
    /// The scalar type enumeration value as used by the `dtype` operands of
    /// aten ops.
    pub fn code(&self) -> i64 {
        match self {
            Dtype::Ui8 => 0,
            Dtype::Si8 => 1,
            Dtype::Si32 => 3,
            Dtype::Si64 => 4,
            Dtype::F16 => 5,
            Dtype::F32 => 6,
            Dtype::F64 => 7,
            Dtype::Bool => 11,
            Dtype::QInt8 => 12,
            Dtype::QUInt8 => 13,
        }
    }
    pub fn from_code(code: i64) -> Option<Dtype> {
        let dtype = match code {
            0 => Dtype::Ui8,
            1 => Dtype::Si8,
            3 => Dtype::Si32,
            4 => Dtype::Si64,
            5 => Dtype::F16,
            6 => Dtype::F32,
            7 => Dtype::F64,
            11 => Dtype::Bool,
            12 => Dtype::QInt8,
            13 => Dtype::QUInt8,
            _ => return None,
        };
        Some(dtype)
    }
}

impl Display for Dtype {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Dtype::Bool => "i1",
            Dtype::Si8 => "si8",
            Dtype::Ui8 => "ui8",
            Dtype::Si32 => "si32",
            Dtype::Si64 => "si64",
            Dtype::F16 => "f16",
            Dtype::F32 => "f32",
            Dtype::F64 => "f64",
            Dtype::QInt8 => "!torch.qint8",
            Dtype::QUInt8 => "!torch.quint8",
        };
        write!(f, "{text}")
    }
}

impl FromStr for Dtype {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let dtype = match s.trim_start_matches("!torch.") {
            "i1" => Dtype::Bool,
            "si8" => Dtype::Si8,
            "ui8" => Dtype::Ui8,
            "si32" => Dtype::Si32,
            "si64" => Dtype::Si64,
            "f16" => Dtype::F16,
            "f32" => Dtype::F32,
            "f64" => Dtype::F64,
            "qint8" => Dtype::QInt8,
            "quint8" => Dtype::QUInt8,
            _ => return Err(anyhow::anyhow!("unknown dtype: {s}")),
        };
        Ok(dtype)
    }
}

/// What is statically known about a tensor.
///
/// `sizes` is `None` for an unranked tensor and a dimension is `None` when
/// its size is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TensorInfo {
    pub sizes: Option<Vec<Option<i64>>>,
    pub dtype: Option<Dtype>,
}

fn subtype_option<T: PartialEq>(a: &Option<T>, b: &Option<T>) -> bool {
    match (a, b) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(a), Some(b)) => a == b,
    }
}

fn meet_option<T: PartialEq + Clone>(a: &Option<T>, b: &Option<T>) -> Option<Option<T>> {
    match (a, b) {
        (None, x) | (x, None) => Some(x.clone()),
        (Some(a), Some(b)) if a == b => Some(Some(a.clone())),
        _ => None,
    }
}

fn join_option<T: PartialEq + Clone>(a: &Option<T>, b: &Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) if a == b => Some(a.clone()),
        _ => None,
    }
}

impl TensorInfo {
    pub fn new(sizes: Option<Vec<Option<i64>>>, dtype: Option<Dtype>) -> Self {
        Self { sizes, dtype }
    }
    /// Fully static tensor.
    pub fn of(shape: &[i64], dtype: Dtype) -> Self {
        Self::new(Some(shape.iter().map(|d| Some(*d)).collect()), Some(dtype))
    }
    pub fn is_unknown(&self) -> bool {
        self.sizes.is_none() && self.dtype.is_none()
    }
    pub fn rank(&self) -> Option<usize> {
        self.sizes.as_ref().map(|sizes| sizes.len())
    }
    /// The shape if every dimension is known.
    pub fn static_shape(&self) -> Option<Vec<i64>> {
        self.sizes.as_ref()?.iter().copied().collect()
    }
    pub fn is_subtype(&self, other: &TensorInfo) -> bool {
        let sizes = match (&self.sizes, &other.sizes) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(a), Some(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(a, b)| subtype_option(a, b))
            }
        };
        sizes && subtype_option(&self.dtype, &other.dtype)
    }
    /// The most precise info that is a subtype of both, if any.
    pub fn meet(&self, other: &TensorInfo) -> Option<TensorInfo> {
        let sizes = match (&self.sizes, &other.sizes) {
            (None, x) | (x, None) => x.clone(),
            (Some(a), Some(b)) => {
                if a.len() != b.len() {
                    return None;
                }
                let dims = a.iter().zip(b).map(|(a, b)| meet_option(a, b));
                Some(dims.collect::<Option<Vec<Option<i64>>>>()?)
            }
        };
        let dtype = meet_option(&self.dtype, &other.dtype)?;
        Some(TensorInfo::new(sizes, dtype))
    }
    /// The least precise info that both are a subtype of.
    pub fn join(&self, other: &TensorInfo) -> TensorInfo {
        let sizes = match (&self.sizes, &other.sizes) {
            (Some(a), Some(b)) if a.len() == b.len() => {
                Some(a.iter().zip(b).map(|(a, b)| join_option(a, b)).collect())
            }
            _ => None,
        };
        let dtype = join_option(&self.dtype, &other.dtype);
        TensorInfo::new(sizes, dtype)
    }
}

impl Display for TensorInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.sizes {
            Some(sizes) => {
                let dims = sizes
                    .iter()
                    .map(|d| match d {
                        Some(d) => d.to_string(),
                        None => "?".to_string(),
                    })
                    .collect::<Vec<String>>()
                    .join(",");
                write!(f, "[{dims}]")?;
            }
            None => write!(f, "*")?,
        }
        match &self.dtype {
            Some(dtype) => write!(f, ",{dtype}"),
            None => write!(f, ",unk"),
        }
    }
}

/// Types of the torch dialect.
///
/// `NonValueTensor` (`!torch.tensor`) has reference semantics and
/// `ValueTensor` (`!torch.vtensor`) has value semantics. Neither is a
/// subtype of the other; `torch.copy.to_vtensor` and `torch.copy.to_tensor`
/// convert between them.
#[derive(Debug, Clone, PartialEq)]
pub enum TorchType {
    None,
    Bool,
    Int,
    Float,
    Str,
    Device,
    Generator,
    LinearParams,
    Any,
    NonValueTensor(TensorInfo),
    ValueTensor(TensorInfo),
    List(Box<TorchType>),
    Tuple(Vec<TorchType>),
    Dict(Box<TorchType>, Box<TorchType>),
    Optional(Box<TorchType>),
    NnModule(String),
}

/// Split at the commas that are not nested inside `<>`, `[]`, or quotes.
fn split_top_level(s: &str) -> Vec<String> {
    let mut parts = vec![];
    let mut depth = 0;
    let mut quoted = false;
    let mut current = String::new();
    for c in s.chars() {
        match c {
            '"' => quoted = !quoted,
            '<' | '[' if !quoted => depth += 1,
            '>' | ']' if !quoted => depth -= 1,
            ',' if depth == 0 && !quoted => {
                parts.push(current.clone());
                current.clear();
                continue;
            }
            _ => (),
        }
        current.push(c);
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn parse_tensor_info(args: &str) -> Result<TensorInfo> {
    let parts = split_top_level(args);
    if parts.len() != 2 {
        return Err(anyhow::anyhow!("expected tensor sizes and dtype, got <{args}>"));
    }
    let sizes = if parts[0] == "*" {
        None
    } else {
        let inner = parts[0]
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .ok_or_else(|| anyhow::anyhow!("expected sizes like [3,?], got {}", parts[0]))?;
        let mut dims = vec![];
        for dim in inner.split(',').filter(|d| !d.is_empty()) {
            if dim == "?" {
                dims.push(None);
            } else {
                dims.push(Some(dim.parse::<i64>()?));
            }
        }
        Some(dims)
    };
    let dtype = if parts[1] == "unk" {
        None
    } else {
        Some(Dtype::from_str(&parts[1])?)
    };
    Ok(TensorInfo::new(sizes, dtype))
}

impl TorchType {
    pub fn shared(self) -> Shared<dyn Type> {
        new_type(self)
    }
    pub fn vtensor(info: TensorInfo) -> Self {
        TorchType::ValueTensor(info)
    }
    pub fn is_tensor(&self) -> bool {
        matches!(self, TorchType::ValueTensor(_) | TorchType::NonValueTensor(_))
    }
    /// Tensor info of either tensor kind.
    pub fn tensor_info(&self) -> Option<&TensorInfo> {
        match self {
            TorchType::ValueTensor(info) | TorchType::NonValueTensor(info) => Some(info),
            _ => None,
        }
    }
    /// The same tensor kind with different info.
    pub fn with_info(&self, info: TensorInfo) -> Option<TorchType> {
        match self {
            TorchType::ValueTensor(_) => Some(TorchType::ValueTensor(info)),
            TorchType::NonValueTensor(_) => Some(TorchType::NonValueTensor(info)),
            _ => None,
        }
    }
    pub fn is_subtype(&self, other: &TorchType) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (_, TorchType::Any) => true,
            (TorchType::None, TorchType::Optional(_)) => true,
            (TorchType::Optional(a), TorchType::Optional(b)) => a.is_subtype(b),
            (a, TorchType::Optional(b)) => a.is_subtype(b),
            (TorchType::ValueTensor(a), TorchType::ValueTensor(b)) => a.is_subtype(b),
            (TorchType::NonValueTensor(a), TorchType::NonValueTensor(b)) => a.is_subtype(b),
            (TorchType::List(a), TorchType::List(b)) => a.is_subtype(b),
            (TorchType::Tuple(a), TorchType::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(a, b)| a.is_subtype(b))
            }
            (TorchType::Dict(ka, va), TorchType::Dict(kb, vb)) => {
                ka.is_subtype(kb) && va.is_subtype(vb)
            }
            _ => false,
        }
    }
    /// Refine `self` with `other`: the most precise type that is a subtype of
    /// both. Returns `None` when the types conflict, which includes mixing
    /// value and non-value tensors.
    pub fn meet(&self, other: &TorchType) -> Option<TorchType> {
        if self.is_subtype(other) {
            return Some(self.clone());
        }
        if other.is_subtype(self) {
            return Some(other.clone());
        }
        match (self, other) {
            (TorchType::ValueTensor(a), TorchType::ValueTensor(b)) => {
                Some(TorchType::ValueTensor(a.meet(b)?))
            }
            (TorchType::NonValueTensor(a), TorchType::NonValueTensor(b)) => {
                Some(TorchType::NonValueTensor(a.meet(b)?))
            }
            (TorchType::Optional(a), TorchType::Optional(b)) => {
                Some(TorchType::Optional(Box::new(a.meet(b)?)))
            }
            (TorchType::Optional(a), b) | (b, TorchType::Optional(a)) => a.meet(b),
            (TorchType::List(a), TorchType::List(b)) => Some(TorchType::List(Box::new(a.meet(b)?))),
            (TorchType::Tuple(a), TorchType::Tuple(b)) if a.len() == b.len() => {
                let elements = a.iter().zip(b).map(|(a, b)| a.meet(b));
                Some(TorchType::Tuple(elements.collect::<Option<Vec<_>>>()?))
            }
            _ => None,
        }
    }
    /// Least upper bound, used to type the results of branches.
    pub fn join(&self, other: &TorchType) -> TorchType {
        if self.is_subtype(other) {
            return other.clone();
        }
        if other.is_subtype(self) {
            return self.clone();
        }
        match (self, other) {
            (TorchType::ValueTensor(a), TorchType::ValueTensor(b)) => {
                TorchType::ValueTensor(a.join(b))
            }
            (TorchType::NonValueTensor(a), TorchType::NonValueTensor(b)) => {
                TorchType::NonValueTensor(a.join(b))
            }
            (TorchType::None, b) | (b, TorchType::None) => TorchType::Optional(Box::new(b.clone())),
            (TorchType::Optional(a), b) | (b, TorchType::Optional(a)) => {
                TorchType::Optional(Box::new(a.join(b)))
            }
            (TorchType::List(a), TorchType::List(b)) => TorchType::List(Box::new(a.join(b))),
            (TorchType::Tuple(a), TorchType::Tuple(b)) if a.len() == b.len() => {
                TorchType::Tuple(a.iter().zip(b).map(|(a, b)| a.join(b)).collect())
            }
            _ => TorchType::Any,
        }
    }
    /// Parse the type without the `!torch.` prefix, as used inside
    /// containers.
    fn parse_short(s: &str) -> Result<TorchType> {
        let s = s.trim();
        let s = s.strip_prefix("!torch.").unwrap_or(s);
        let (name, args) = match s.find('<') {
            Some(start) => {
                let args = s[start + 1..]
                    .strip_suffix('>')
                    .ok_or_else(|| anyhow::anyhow!("unterminated type: {s}"))?;
                (&s[..start], Some(args))
            }
            None => (s, None),
        };
        let typ = match (name, args) {
            ("none", None) => TorchType::None,
            ("bool", None) => TorchType::Bool,
            ("int", None) => TorchType::Int,
            ("float", None) => TorchType::Float,
            ("str", None) => TorchType::Str,
            ("Device", None) => TorchType::Device,
            ("Generator", None) => TorchType::Generator,
            ("LinearParams", None) => TorchType::LinearParams,
            ("any", None) => TorchType::Any,
            ("tensor", None) => TorchType::NonValueTensor(TensorInfo::default()),
            ("vtensor", None) => TorchType::ValueTensor(TensorInfo::default()),
            ("tensor", Some(args)) => TorchType::NonValueTensor(parse_tensor_info(args)?),
            ("vtensor", Some(args)) => TorchType::ValueTensor(parse_tensor_info(args)?),
            ("list", Some(args)) => TorchType::List(Box::new(Self::parse_short(args)?)),
            ("optional", Some(args)) => TorchType::Optional(Box::new(Self::parse_short(args)?)),
            ("tuple", Some(args)) => {
                let elements = split_top_level(args)
                    .iter()
                    .map(|element| Self::parse_short(element))
                    .collect::<Result<Vec<TorchType>>>()?;
                TorchType::Tuple(elements)
            }
            ("dict", Some(args)) => {
                let parts = split_top_level(args);
                if parts.len() != 2 {
                    return Err(anyhow::anyhow!("expected key and value type in dict<{args}>"));
                }
                let key = Self::parse_short(&parts[0])?;
                let value = Self::parse_short(&parts[1])?;
                TorchType::Dict(Box::new(key), Box::new(value))
            }
            ("nn.Module", Some(args)) => {
                let class = args
                    .trim()
                    .strip_prefix('"')
                    .and_then(|s| s.strip_suffix('"'))
                    .ok_or_else(|| anyhow::anyhow!("expected quoted class name, got {args}"))?;
                TorchType::NnModule(class.to_string())
            }
            _ => return Err(anyhow::anyhow!("unknown torch type: !torch.{s}")),
        };
        Ok(typ)
    }
    fn display_short(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TorchType::None => write!(f, "none"),
            TorchType::Bool => write!(f, "bool"),
            TorchType::Int => write!(f, "int"),
            TorchType::Float => write!(f, "float"),
            TorchType::Str => write!(f, "str"),
            TorchType::Device => write!(f, "Device"),
            TorchType::Generator => write!(f, "Generator"),
            TorchType::LinearParams => write!(f, "LinearParams"),
            TorchType::Any => write!(f, "any"),
            TorchType::NonValueTensor(info) if info.is_unknown() => write!(f, "tensor"),
            TorchType::ValueTensor(info) if info.is_unknown() => write!(f, "vtensor"),
            TorchType::NonValueTensor(info) => write!(f, "tensor<{info}>"),
            TorchType::ValueTensor(info) => write!(f, "vtensor<{info}>"),
            TorchType::List(element) => {
                write!(f, "list<")?;
                element.display_short(f)?;
                write!(f, ">")
            }
            TorchType::Optional(element) => {
                write!(f, "optional<")?;
                element.display_short(f)?;
                write!(f, ">")
            }
            TorchType::Tuple(elements) => {
                write!(f, "tuple<")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    element.display_short(f)?;
                }
                write!(f, ">")
            }
            TorchType::Dict(key, value) => {
                write!(f, "dict<")?;
                key.display_short(f)?;
                write!(f, ", ")?;
                value.display_short(f)?;
                write!(f, ">")
            }
            TorchType::NnModule(class) => write!(f, "nn.Module<\"{class}\">"),
        }
    }
}

impl Display for TorchType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "!torch.")?;
        self.display_short(f)
    }
}

impl FromStr for TorchType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.split_whitespace().collect::<String>();
        if !s.starts_with("!torch.") {
            return Err(anyhow::anyhow!("expected a torch type, got {s}"));
        }
        Self::parse_short(&s)
    }
}

impl Type for TorchType {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Return the torch type if `typ` is one.
pub fn torch_type(typ: &Shared<dyn Type>) -> Option<TorchType> {
    typ.rd().as_any().downcast_ref::<TorchType>().cloned()
}

/// Tensor info of a value-semantic tensor type.
pub fn vtensor_info(typ: &Shared<dyn Type>) -> Option<TensorInfo> {
    match torch_type(typ)? {
        TorchType::ValueTensor(info) => Some(info),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> TorchType {
        TorchType::from_str(s).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let types = [
            "!torch.none",
            "!torch.int",
            "!torch.Device",
            "!torch.vtensor",
            "!torch.tensor<[3,?],f32>",
            "!torch.vtensor<*,si64>",
            "!torch.vtensor<[2],unk>",
            "!torch.vtensor<[],f64>",
            "!torch.vtensor<[4],!torch.qint8>",
            "!torch.list<int>",
            "!torch.list<vtensor<[2],!torch.quint8>>",
            "!torch.tuple<int, vtensor<[2],f32>>",
            "!torch.dict<str, int>",
            "!torch.optional<list<int>>",
            "!torch.nn.Module<\"__torch__.Foo\">",
        ];
        for text in types {
            assert_eq!(t(text).to_string(), text);
        }
        assert_eq!(t("!torch.tuple<int,float>").to_string(), "!torch.tuple<int, float>");
        assert!(TorchType::from_str("!torch.vtensor<[3],bf16>").is_err());
        assert!(TorchType::from_str("!torch.list<int").is_err());
    }

    #[test]
    fn test_tensor_subtype() {
        let static_ = t("!torch.vtensor<[3,4],f32>");
        let partial = t("!torch.vtensor<[3,?],f32>");
        let unranked = t("!torch.vtensor<*,f32>");
        let unknown = t("!torch.vtensor");
        assert!(static_.is_subtype(&partial));
        assert!(partial.is_subtype(&unranked));
        assert!(static_.is_subtype(&unknown));
        assert!(!unranked.is_subtype(&static_));
        assert!(!t("!torch.vtensor<[3,4],f64>").is_subtype(&partial));
        assert!(!t("!torch.vtensor<[3],f32>").is_subtype(&partial));
        assert!(!static_.is_subtype(&t("!torch.tensor")));
        assert!(!t("!torch.tensor<[3,4],f32>").is_subtype(&unknown));
    }

    #[test]
    fn test_container_subtype() {
        assert!(t("!torch.int").is_subtype(&t("!torch.optional<int>")));
        assert!(t("!torch.none").is_subtype(&t("!torch.optional<int>")));
        assert!(!t("!torch.optional<int>").is_subtype(&t("!torch.int")));
        assert!(t("!torch.list<vtensor<[2],f32>>").is_subtype(&t("!torch.list<vtensor>")));
        assert!(t("!torch.tuple<int, float>").is_subtype(&t("!torch.tuple<any, any>")));
        assert!(!t("!torch.tuple<int>").is_subtype(&t("!torch.tuple<int, int>")));
        assert!(t("!torch.nn.Module<\"c\">").is_subtype(&t("!torch.any")));
        assert!(!t("!torch.nn.Module<\"c\">").is_subtype(&t("!torch.nn.Module<\"d\">")));
    }

    #[test]
    fn test_meet_and_join() {
        let a = t("!torch.vtensor<[3,?],f32>");
        let b = t("!torch.vtensor<[?,4],unk>");
        assert_eq!(a.meet(&b), Some(t("!torch.vtensor<[3,4],f32>")));
        assert_eq!(a.join(&b), t("!torch.vtensor<[?,?],unk>"));
        let c = t("!torch.vtensor<[2],f32>");
        assert_eq!(a.meet(&c), None);
        assert_eq!(a.join(&c), t("!torch.vtensor<*,f32>"));
        assert_eq!(a.meet(&t("!torch.tensor<[3,4],f32>")), None);
        assert_eq!(t("!torch.int").join(&t("!torch.none")), t("!torch.optional<int>"));
        assert_eq!(t("!torch.int").join(&t("!torch.float")), t("!torch.any"));
    }

    #[test]
    fn test_promote() {
        assert_eq!(Dtype::Bool.promote(&Dtype::Si64), Some(Dtype::Si64));
        assert_eq!(Dtype::Si64.promote(&Dtype::F16), Some(Dtype::F16));
        assert_eq!(Dtype::F32.promote(&Dtype::F64), Some(Dtype::F64));
        assert_eq!(Dtype::Si8.promote(&Dtype::Ui8), Some(Dtype::Si32));
        assert_eq!(Dtype::Si32.true_divide(&Dtype::Si64), Some(Dtype::F32));
        assert_eq!(Dtype::QInt8.promote(&Dtype::F32), None);
        assert_eq!(Dtype::from_code(Dtype::QUInt8.code()), Some(Dtype::QUInt8));
    }
}
