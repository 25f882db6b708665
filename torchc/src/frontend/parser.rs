use crate::dialect::arith;
use crate::dialect::func;
use crate::dialect::math;
use crate::dialect::memref;
use crate::dialect::scf;
use crate::dialect::torch;
use crate::dialect::torch::TorchType;
use crate::dialect::tosa;
use crate::frontend::scanner::Scanner;
use crate::frontend::token::Token;
use crate::frontend::token::TokenKind;
use crate::ir::unescape;
use crate::ir::ArrayAttr;
use crate::ir::Attribute;
use crate::ir::Attributes;
use crate::ir::Block;
use crate::ir::BooleanAttr;
use crate::ir::DenseAttr;
use crate::ir::FloatAttr;
use crate::ir::GuardedBlock;
use crate::ir::GuardedOp;
use crate::ir::GuardedRegion;
use crate::ir::IntegerAttr;
use crate::ir::ModuleOp;
use crate::ir::Op;
use crate::ir::Operation;
use crate::ir::Region;
use crate::ir::ScalarType;
use crate::ir::ShapedType;
use crate::ir::StringAttr;
use crate::ir::SymbolAttr;
use crate::ir::Type;
use crate::ir::Types;
use crate::ir::UnsetOpResults;
use crate::ir::Value;
use crate::ir::Values;
use crate::shared::Shared;
use crate::shared::SharedExt;
use anyhow::Result;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::RwLock;

/// Interface to add custom operations to the parser.
///
/// Clients can implement this trait to support custom recursive descent
/// parsing. The default implementation can only know about operations defined
/// in this crate. To support custom operations, implement this trait with
/// custom logic, see [DefaultParserDispatch] for an example.
pub trait ParserDispatch {
    /// Preprocess the source before parsing.
    fn preprocess(src: &str) -> String {
        src.to_string()
    }
    /// Parse an operation.
    fn parse_op(parser: &mut Parser<Self>, parent: Option<Shared<Block>>) -> Result<Shared<dyn Op>>
    where
        Self: Sized;
    /// Parse a type.
    fn parse_type(parser: &mut Parser<Self>) -> Result<Shared<dyn Type>>
    where
        Self: Sized;
}

/// Default parser for determining the name of an operation.
///
/// # Examples
///
/// ```mlir
/// %2 = arith.addi %0, %1 : i64, i64 -> i64
/// ```
///
/// The name of the operation is `arith.addi`.
///
/// ```mlir
/// %0, %1 = torch.prim.If %cond -> (!torch.int, !torch.int) {
/// ```
///
/// The name of the operation is `torch.prim.If`.
pub fn default_parse_name<T: ParserDispatch>(parser: &Parser<T>) -> Token {
    let mut n = 0;
    loop {
        let token = match parser.peek_n(n) {
            Some(token) => token,
            None => return parser.peek().clone(),
        };
        match token.kind {
            TokenKind::PercentIdentifier | TokenKind::Comma => n += 1,
            TokenKind::Equal => {
                return match parser.peek_n(n + 1) {
                    Some(name) => name.clone(),
                    None => token.clone(),
                }
            }
            _ => return token.clone(),
        }
    }
}

/// Default operation parser.
///
/// This parser knows about all operations defined in this crate. For
/// operations in external dialects, define another parser dispatcher and use
/// it.
pub struct DefaultParserDispatch;

pub fn default_dispatch<T: ParserDispatch>(
    name: Token,
    parser: &mut Parser<T>,
    parent: Option<Shared<Block>>,
) -> Result<Shared<dyn Op>> {
    match name.lexeme.clone().as_str() {
        "arith.addf" => <arith::AddfOp as Parse>::op(parser, parent),
        "arith.addi" => <arith::AddiOp as Parse>::op(parser, parent),
        "arith.cmpf" => <arith::CmpfOp as Parse>::op(parser, parent),
        "arith.cmpi" => <arith::CmpiOp as Parse>::op(parser, parent),
        "arith.constant" => <arith::ConstantOp as Parse>::op(parser, parent),
        "arith.divf" => <arith::DivfOp as Parse>::op(parser, parent),
        "arith.divsi" => <arith::DivsiOp as Parse>::op(parser, parent),
        "arith.extf" => <arith::ExtfOp as Parse>::op(parser, parent),
        "arith.extsi" => <arith::ExtsiOp as Parse>::op(parser, parent),
        "arith.fptosi" => <arith::FptosiOp as Parse>::op(parser, parent),
        "arith.fptoui" => <arith::FptouiOp as Parse>::op(parser, parent),
        "arith.index_cast" => <arith::IndexCastOp as Parse>::op(parser, parent),
        "arith.maximumf" => <arith::MaximumfOp as Parse>::op(parser, parent),
        "arith.maxsi" => <arith::MaxsiOp as Parse>::op(parser, parent),
        "arith.minimumf" => <arith::MinimumfOp as Parse>::op(parser, parent),
        "arith.minsi" => <arith::MinsiOp as Parse>::op(parser, parent),
        "arith.mulf" => <arith::MulfOp as Parse>::op(parser, parent),
        "arith.muli" => <arith::MuliOp as Parse>::op(parser, parent),
        "arith.negf" => <arith::NegfOp as Parse>::op(parser, parent),
        "arith.remsi" => <arith::RemsiOp as Parse>::op(parser, parent),
        "arith.select" => <arith::SelectOp as Parse>::op(parser, parent),
        "arith.sitofp" => <arith::SitofpOp as Parse>::op(parser, parent),
        "arith.subf" => <arith::SubfOp as Parse>::op(parser, parent),
        "arith.subi" => <arith::SubiOp as Parse>::op(parser, parent),
        "arith.truncf" => <arith::TruncfOp as Parse>::op(parser, parent),
        "arith.trunci" => <arith::TrunciOp as Parse>::op(parser, parent),
        "arith.uitofp" => <arith::UitofpOp as Parse>::op(parser, parent),
        "func.call" => <func::CallOp as Parse>::op(parser, parent),
        "func.func" => <func::FuncOp as Parse>::op(parser, parent),
        "math.absf" => <math::AbsfOp as Parse>::op(parser, parent),
        "math.exp" => <math::ExpOp as Parse>::op(parser, parent),
        "math.roundeven" => <math::RoundevenOp as Parse>::op(parser, parent),
        "math.tanh" => <math::TanhOp as Parse>::op(parser, parent),
        "memref.alloc" => <memref::AllocOp as Parse>::op(parser, parent),
        "memref.load" => <memref::LoadOp as Parse>::op(parser, parent),
        "memref.store" => <memref::StoreOp as Parse>::op(parser, parent),
        "module" => <ModuleOp as Parse>::op(parser, parent),
        "return" => <func::ReturnOp as Parse>::op(parser, parent),
        "scf.for" => <scf::ForOp as Parse>::op(parser, parent),
        "scf.if" => <scf::IfOp as Parse>::op(parser, parent),
        "scf.yield" => <scf::YieldOp as Parse>::op(parser, parent),
        "torch.aten.abs" => <torch::AbsOp as Parse>::op(parser, parent),
        "torch.aten.add.Tensor" => <torch::AddTensorOp as Parse>::op(parser, parent),
        "torch.aten.add.int" => <torch::AddIntOp as Parse>::op(parser, parent),
        "torch.aten.broadcast_to" => <torch::BroadcastToOp as Parse>::op(parser, parent),
        "torch.aten.clamp" => <torch::ClampOp as Parse>::op(parser, parent),
        "torch.aten.dequantize.self" => <torch::DequantizeSelfOp as Parse>::op(parser, parent),
        "torch.aten.div.Tensor" => <torch::DivTensorOp as Parse>::op(parser, parent),
        "torch.aten.eq.int" => <torch::EqIntOp as Parse>::op(parser, parent),
        "torch.aten.exp" => <torch::ExpOp as Parse>::op(parser, parent),
        "torch.aten.gt.int" => <torch::GtIntOp as Parse>::op(parser, parent),
        "torch.aten.int_repr" => <torch::IntReprOp as Parse>::op(parser, parent),
        "torch.aten.lt.int" => <torch::LtIntOp as Parse>::op(parser, parent),
        "torch.aten.maximum" => <torch::MaximumOp as Parse>::op(parser, parent),
        "torch.aten.minimum" => <torch::MinimumOp as Parse>::op(parser, parent),
        "torch.aten.mm" => <torch::MmOp as Parse>::op(parser, parent),
        "torch.aten.mul.Tensor" => <torch::MulTensorOp as Parse>::op(parser, parent),
        "torch.aten.mul.int" => <torch::MulIntOp as Parse>::op(parser, parent),
        "torch.aten.ne.int" => <torch::NeIntOp as Parse>::op(parser, parent),
        "torch.aten.neg" => <torch::NegOp as Parse>::op(parser, parent),
        "torch.aten.quantize_per_tensor" => {
            <torch::QuantizePerTensorOp as Parse>::op(parser, parent)
        }
        "torch.aten.relu" => <torch::ReluOp as Parse>::op(parser, parent),
        "torch.aten.reshape" => <torch::ReshapeOp as Parse>::op(parser, parent),
        "torch.aten.sigmoid" => <torch::SigmoidOp as Parse>::op(parser, parent),
        "torch.aten.size.int" => <torch::SizeIntOp as Parse>::op(parser, parent),
        "torch.aten.slice.Tensor" => <torch::SliceTensorOp as Parse>::op(parser, parent),
        "torch.aten.sub.Tensor" => <torch::SubTensorOp as Parse>::op(parser, parent),
        "torch.aten.sub.int" => <torch::SubIntOp as Parse>::op(parser, parent),
        "torch.aten.sum.dim_IntList" => <torch::SumDimIntListOp as Parse>::op(parser, parent),
        "torch.aten.tanh" => <torch::TanhOp as Parse>::op(parser, parent),
        "torch.aten.transpose.int" => <torch::TransposeIntOp as Parse>::op(parser, parent),
        "torch.aten.view" => <torch::ViewOp as Parse>::op(parser, parent),
        "torch.attr" => <torch::AttrOp as Parse>::op(parser, parent),
        "torch.class_type" => <torch::ClassTypeOp as Parse>::op(parser, parent),
        "torch.constant.bool" => <torch::ConstantBoolOp as Parse>::op(parser, parent),
        "torch.constant.device" => <torch::ConstantDeviceOp as Parse>::op(parser, parent),
        "torch.constant.float" => <torch::ConstantFloatOp as Parse>::op(parser, parent),
        "torch.constant.int" => <torch::ConstantIntOp as Parse>::op(parser, parent),
        "torch.constant.none" => <torch::ConstantNoneOp as Parse>::op(parser, parent),
        "torch.constant.str" => <torch::ConstantStrOp as Parse>::op(parser, parent),
        "torch.copy.to_tensor" => <torch::CopyToTensorOp as Parse>::op(parser, parent),
        "torch.copy.to_vtensor" => <torch::CopyToVtensorOp as Parse>::op(parser, parent),
        "torch.derefine" => <torch::DerefineOp as Parse>::op(parser, parent),
        "torch.global_slot" => <torch::GlobalSlotOp as Parse>::op(parser, parent),
        "torch.global_slot.get" => <torch::GlobalSlotGetOp as Parse>::op(parser, parent),
        "torch.global_slot.init" => <torch::GlobalSlotInitOp as Parse>::op(parser, parent),
        "torch.global_slot.set" => <torch::GlobalSlotSetOp as Parse>::op(parser, parent),
        "torch.method" => <torch::MethodOp as Parse>::op(parser, parent),
        "torch.nn_module" => <torch::NnModuleOp as Parse>::op(parser, parent),
        "torch.per_tensor_affine.create" => {
            <torch::PerTensorAffineCreateOp as Parse>::op(parser, parent)
        }
        "torch.prim.CallMethod" => <torch::CallMethodOp as Parse>::op(parser, parent),
        "torch.prim.DictConstruct" => <torch::DictConstructOp as Parse>::op(parser, parent),
        "torch.prim.GetAttr" => <torch::GetAttrOp as Parse>::op(parser, parent),
        "torch.prim.If" => <torch::PrimIfOp as Parse>::op(parser, parent),
        "torch.prim.If.yield" => <torch::PrimIfYieldOp as Parse>::op(parser, parent),
        "torch.prim.ListConstruct" => <torch::ListConstructOp as Parse>::op(parser, parent),
        "torch.prim.Loop" => <torch::PrimLoopOp as Parse>::op(parser, parent),
        "torch.prim.Loop.condition" => {
            <torch::PrimLoopConditionOp as Parse>::op(parser, parent)
        }
        "torch.prim.SetAttr" => <torch::SetAttrOp as Parse>::op(parser, parent),
        "torch.prim.TupleConstruct" => <torch::TupleConstructOp as Parse>::op(parser, parent),
        "torch.slot" => <torch::SlotOp as Parse>::op(parser, parent),
        "torch.tensor_static_info_cast" => {
            <torch::TensorStaticInfoCastOp as Parse>::op(parser, parent)
        }
        "tosa.abs" => <tosa::AbsOp as Parse>::op(parser, parent),
        "tosa.add" => <tosa::AddOp as Parse>::op(parser, parent),
        "tosa.cast" => <tosa::CastOp as Parse>::op(parser, parent),
        "tosa.clamp" => <tosa::ClampOp as Parse>::op(parser, parent),
        "tosa.const" => <tosa::ConstOp as Parse>::op(parser, parent),
        "tosa.exp" => <tosa::ExpOp as Parse>::op(parser, parent),
        "tosa.matmul" => <tosa::MatmulOp as Parse>::op(parser, parent),
        "tosa.maximum" => <tosa::MaximumOp as Parse>::op(parser, parent),
        "tosa.minimum" => <tosa::MinimumOp as Parse>::op(parser, parent),
        "tosa.mul" => <tosa::MulOp as Parse>::op(parser, parent),
        "tosa.negate" => <tosa::NegateOp as Parse>::op(parser, parent),
        "tosa.pad" => <tosa::PadOp as Parse>::op(parser, parent),
        "tosa.reciprocal" => <tosa::ReciprocalOp as Parse>::op(parser, parent),
        "tosa.reduce_sum" => <tosa::ReduceSumOp as Parse>::op(parser, parent),
        "tosa.reshape" => <tosa::ReshapeOp as Parse>::op(parser, parent),
        "tosa.sigmoid" => <tosa::SigmoidOp as Parse>::op(parser, parent),
        "tosa.slice" => <tosa::SliceOp as Parse>::op(parser, parent),
        "tosa.sub" => <tosa::SubOp as Parse>::op(parser, parent),
        "tosa.tanh" => <tosa::TanhOp as Parse>::op(parser, parent),
        "tosa.tile" => <tosa::TileOp as Parse>::op(parser, parent),
        "tosa.transpose" => <tosa::TransposeOp as Parse>::op(parser, parent),
        _ => {
            let msg = parser.error(&name, &format!("Unknown operation: {}", name.lexeme));
            Err(anyhow::anyhow!(msg))
        }
    }
}

/// Parse builtin types (`i64`, `f32`, `index`, `tensor<3xf32>`,
/// `memref<3xf32>`) and torch types (`!torch.vtensor<[3],f32>`).
pub fn default_parse_type<T: ParserDispatch>(parser: &mut Parser<T>) -> Result<Shared<dyn Type>> {
    let start = parser.peek().clone();
    if parser.check(TokenKind::IntType) {
        let token = parser.advance().clone();
        return match ScalarType::from_str(&token.lexeme) {
            Ok(typ) => Ok(Shared::new(RwLock::new(typ))),
            Err(e) => Err(anyhow::anyhow!(parser.error(&token, &e.to_string()))),
        };
    }
    let text = parser.parse_type_text()?;
    let typ: Result<Shared<dyn Type>> = if text.starts_with("!torch.") {
        TorchType::from_str(&text).map(|typ| typ.shared())
    } else if text.starts_with("tensor<") || text.starts_with("memref<") {
        ShapedType::from_str(&text).map(|typ| {
            let typ: Shared<dyn Type> = Shared::new(RwLock::new(typ));
            typ
        })
    } else {
        ScalarType::from_str(&text).map(|typ| {
            let typ: Shared<dyn Type> = Shared::new(RwLock::new(typ));
            typ
        })
    };
    typ.map_err(|e| anyhow::anyhow!(parser.error(&start, &e.to_string())))
}

impl ParserDispatch for DefaultParserDispatch {
    fn parse_op(
        parser: &mut Parser<Self>,
        parent: Option<Shared<Block>>,
    ) -> Result<Shared<dyn Op>> {
        let name = default_parse_name(parser);
        default_dispatch(name, parser, parent)
    }
    fn parse_type(parser: &mut Parser<Self>) -> Result<Shared<dyn Type>> {
        default_parse_type(parser)
    }
}

/// Interface to define parsing of operations.
///
/// Downstream crates can implement this trait to support parsing of custom
/// operations.
pub trait Parse {
    fn op<T: ParserDispatch>(
        parser: &mut Parser<T>,
        parent: Option<Shared<Block>>,
    ) -> Result<Shared<dyn Op>>
    where
        Self: Sized;
}

pub struct Parser<T: ParserDispatch> {
    src: String,
    tokens: Vec<Token>,
    current: usize,
    /// Values that are visible at the current position, innermost region last.
    scopes: Vec<HashMap<String, Shared<Value>>>,
    _marker: std::marker::PhantomData<T>,
}

impl<T: ParserDispatch> Parser<T> {
    pub fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }
    pub fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }
    pub fn peek(&self) -> &Token {
        // The scanner always ends the stream with an Eof token.
        let last = self.tokens.len() - 1;
        &self.tokens[self.current.min(last)]
    }
    pub fn peek_n(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.current + n)
    }
    pub fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }
    pub fn check(&self, kind: TokenKind) -> bool {
        if self.is_at_end() {
            return false;
        }
        self.peek().kind == kind
    }
    /// Whether the next token is the bare identifier `keyword`.
    pub fn check_keyword(&self, keyword: &str) -> bool {
        self.check(TokenKind::BareIdentifier) && self.peek().lexeme == keyword
    }
    pub fn error(&self, token: &Token, msg: &str) -> String {
        let msg = Scanner::error(&self.src, &token.location, msg);
        format!("\n\n{msg}\n")
    }
    pub fn report_token_error(&self, token: &Token, expected: TokenKind) -> Result<Token> {
        let msg = format!(
            "Expected {:?}, but got `{}` of kind {:?}",
            expected, token.lexeme, token.kind
        );
        let msg = Scanner::error(&self.src, &token.location, &msg);
        Err(anyhow::anyhow!(format!("\n\n{msg}\n")))
    }
    pub fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        if self.check(kind) {
            self.advance();
            Ok(self.previous().clone())
        } else {
            self.report_token_error(self.peek(), kind)
        }
    }
    pub fn match_kinds(&mut self, kinds: &[TokenKind]) -> bool {
        for kind in kinds {
            if self.check(*kind) {
                self.advance();
                return true;
            }
        }
        false
    }
    pub fn parse_keyword(&mut self, keyword: &str) -> Result<()> {
        let token = self.expect(TokenKind::BareIdentifier)?;
        if token.lexeme != keyword {
            let msg = self.error(&token, &format!("Expected keyword: {}", keyword));
            return Err(anyhow::anyhow!(msg));
        }
        Ok(())
    }
    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }
    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }
    /// Find the value that was assigned to `name` in this or an enclosing
    /// region.
    pub fn lookup_value(&self, name: &str) -> Option<Shared<Value>> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).cloned())
    }
    /// Make `value` visible to the ops that follow.
    pub fn define_value(&mut self, value: Shared<Value>) -> Result<()> {
        let name = match value.rd().name() {
            Some(name) => name,
            None => return Ok(()),
        };
        let previous = self.previous().clone();
        let scope = match self.scopes.last_mut() {
            Some(scope) => scope,
            None => return Err(anyhow::anyhow!("No scope to define {name} in")),
        };
        if scope.contains_key(&name) {
            let msg = format!("Redefinition of {name}");
            return Err(anyhow::anyhow!(self.error(&previous, &msg)));
        }
        scope.insert(name, value);
        Ok(())
    }
    pub fn define_values(&mut self, values: &Values) -> Result<()> {
        for value in values.clone().into_iter() {
            self.define_value(value)?;
        }
        Ok(())
    }
    /// Parse a block.
    ///
    /// `arguments` are used for unlabeled entry blocks whose arguments are
    /// written outside the region, such as function arguments.
    pub fn parse_block(&mut self, parent: Shared<Region>, arguments: Values) -> Result<Shared<Block>> {
        let (label, arguments) = if self.check(TokenKind::CaretIdentifier) {
            let label = self.advance().lexeme.clone();
            let arguments = if self.check(TokenKind::LParen) {
                self.parse_block_arguments()?
            } else {
                arguments
            };
            self.expect(TokenKind::Colon)?;
            (Some(label), arguments)
        } else {
            (None, arguments)
        };
        let ops = Shared::new(vec![].into());
        let block = Block::new(label, arguments.clone(), ops, Some(parent));
        let block: Shared<Block> = Shared::new(block.into());
        arguments.set_parent(block.clone());
        self.define_values(&arguments)?;
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::CaretIdentifier) {
            if self.is_at_end() {
                let msg = self.error(self.peek(), "Expected `}` at end of region");
                return Err(anyhow::anyhow!(msg));
            }
            let op = T::parse_op(self, Some(block.clone()))?;
            let results = op.rd().operation().rd().results();
            self.define_values(&results)?;
            block.append(op);
        }
        Ok(block)
    }
    pub fn parse_region(&mut self, parent: Shared<dyn Op>) -> Result<Shared<Region>> {
        self.parse_region_with_args(parent, Values::default())
    }
    /// Parse `{ ... }` where the entry block receives `arguments`.
    pub fn parse_region_with_args(
        &mut self,
        parent: Shared<dyn Op>,
        arguments: Values,
    ) -> Result<Shared<Region>> {
        let region = Region::new(vec![], Some(parent));
        let region: Shared<Region> = Shared::new(region.into());
        self.expect(TokenKind::LBrace)?;
        self.push_scope();
        let mut entry_arguments = Some(arguments);
        while !self.check(TokenKind::RBrace) {
            if self.is_at_end() {
                let msg = self.error(self.peek(), "Expected `}` at end of region");
                return Err(anyhow::anyhow!(msg));
            }
            let arguments = entry_arguments.take().unwrap_or_default();
            let block = self.parse_block(region.clone(), arguments)?;
            region.wr().add_block(block);
        }
        if let Some(arguments) = entry_arguments {
            // `{}` still has an (empty) entry block.
            let ops = Shared::new(vec![].into());
            let block = Block::new(None, arguments.clone(), ops, Some(region.clone()));
            let block: Shared<Block> = Shared::new(block.into());
            arguments.set_parent(block.clone());
            region.wr().add_block(block);
        }
        self.expect(TokenKind::RBrace)?;
        self.pop_scope();
        Ok(region)
    }
    /// Parse the source into a module.
    ///
    /// Top-level ops that are not wrapped in a `module` are put into one.
    pub fn parse(src: &str) -> Result<Shared<dyn Op>> {
        let src = T::preprocess(src);
        let mut parser = Parser::<T> {
            src: src.clone(),
            tokens: Scanner::scan(&src)?,
            current: 0,
            scopes: vec![HashMap::new()],
            _marker: std::marker::PhantomData,
        };
        if parser.is_at_end() {
            return Ok(ModuleOp::empty());
        }
        let op = T::parse_op(&mut parser, None)?;
        if op.is::<ModuleOp>() {
            if !parser.is_at_end() {
                let msg = parser.error(parser.peek(), "Expected end of input after module");
                return Err(anyhow::anyhow!(msg));
            }
            return Ok(op);
        }
        let module = ModuleOp::empty();
        let region = module.rd().region();
        let body = match region.and_then(|region| region.entry()) {
            Some(body) => body,
            None => return Err(anyhow::anyhow!("Expected module to have a body")),
        };
        let results = op.rd().operation().rd().results();
        parser.define_values(&results)?;
        body.append(op);
        while !parser.is_at_end() {
            let op = T::parse_op(&mut parser, Some(body.clone()))?;
            let results = op.rd().operation().rd().results();
            parser.define_values(&results)?;
            body.append(op);
        }
        Ok(module)
    }
    pub fn parse_type(&mut self) -> Result<Shared<dyn Type>> {
        T::parse_type(self)
    }
    /// Parse `T, U, V`.
    pub fn parse_types(&mut self) -> Result<Types> {
        let mut types = vec![self.parse_type()?];
        while self.check(TokenKind::Comma) {
            self.advance();
            types.push(self.parse_type()?);
        }
        Ok(Types::from_vec(types))
    }
    /// Parse `(T, U)`, including the parentheses. The list may be empty.
    pub fn parse_parenthesized_types(&mut self) -> Result<Types> {
        self.expect(TokenKind::LParen)?;
        if self.check(TokenKind::RParen) {
            self.advance();
            return Ok(Types::from_vec(vec![]));
        }
        let types = self.parse_types()?;
        self.expect(TokenKind::RParen)?;
        Ok(types)
    }
    /// Parse the types after `->`: a single type or `(T, U)`.
    pub fn parse_result_types(&mut self) -> Result<Types> {
        if self.check(TokenKind::LParen) {
            self.parse_parenthesized_types()
        } else {
            Ok(Types::from_vec(vec![self.parse_type()?]))
        }
    }
    /// Parse a type to a string.
    ///
    /// This is used to parse types without having to backtrack or do multiple
    /// peeks. Instead, this method provides a full string which then can be
    /// passed around.
    ///
    /// Examples:
    /// ```mlir
    /// !torch.vtensor<[3,?],f32>
    ///
    /// tensor<3x4xf32>
    /// ```
    pub fn parse_type_text(&mut self) -> Result<String> {
        let mut typ = String::new();
        if self.check(TokenKind::Exclamation) {
            self.advance();
            typ.push('!');
        }
        let name = if self.check(TokenKind::IntType) {
            self.advance().clone()
        } else {
            self.expect(TokenKind::BareIdentifier)?
        };
        typ.push_str(&name.lexeme);
        if self.check(TokenKind::Less) {
            let mut depth = 0;
            loop {
                if self.is_at_end() {
                    let msg = self.error(self.peek(), "Unterminated type, expected `>`");
                    return Err(anyhow::anyhow!(msg));
                }
                let token = self.advance().clone();
                match token.kind {
                    TokenKind::Less => depth += 1,
                    TokenKind::Greater => depth -= 1,
                    _ => (),
                }
                typ.push_str(&token.lexeme);
                if depth == 0 {
                    break;
                }
            }
        }
        Ok(typ)
    }
    /// Parse a possibly negative integer such as `-1`.
    pub fn parse_integer(&mut self) -> Result<i64> {
        let negative = self.match_kinds(&[TokenKind::Minus]);
        let token = self.expect(TokenKind::Integer)?;
        match token.lexeme.parse::<i64>() {
            Ok(value) if negative => Ok(-value),
            Ok(value) => Ok(value),
            Err(e) => Err(anyhow::anyhow!(self.error(&token, &e.to_string()))),
        }
    }
    /// Parse a float. Integer literals are accepted too.
    pub fn parse_float(&mut self) -> Result<f64> {
        let negative = self.match_kinds(&[TokenKind::Minus]);
        let token = self.peek().clone();
        let value = match token.kind {
            TokenKind::FloatLiteral | TokenKind::Integer => token.lexeme.parse::<f64>().ok(),
            TokenKind::BareIdentifier if token.lexeme == "inf" => Some(f64::INFINITY),
            TokenKind::BareIdentifier if token.lexeme == "NaN" => Some(f64::NAN),
            _ => None,
        };
        match value {
            Some(value) => {
                self.advance();
                Ok(if negative { -value } else { value })
            }
            None => {
                let msg = format!("Expected float, but got `{}`", token.lexeme);
                Err(anyhow::anyhow!(self.error(&token, &msg)))
            }
        }
    }
    /// Parse `"text"` and return the unescaped contents.
    pub fn parse_string(&mut self) -> Result<String> {
        let token = self.expect(TokenKind::String)?;
        let lexeme = &token.lexeme;
        let inner = &lexeme[1..lexeme.len() - 1];
        Ok(unescape(inner))
    }
    /// Parse `@name` and return `name`.
    pub fn parse_symbol(&mut self) -> Result<String> {
        let token = self.expect(TokenKind::AtIdentifier)?;
        Ok(token.lexeme.trim_start_matches('@').to_string())
    }
    pub fn parse_boolean(&mut self) -> Result<bool> {
        let token = self.expect(TokenKind::BareIdentifier)?;
        match token.lexeme.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => {
                let msg = format!("Expected `true` or `false`, but got `{}`", token.lexeme);
                Err(anyhow::anyhow!(self.error(&token, &msg)))
            }
        }
    }
    /// Parse `[1, -2, 3]`.
    pub fn parse_integer_list(&mut self) -> Result<Vec<i64>> {
        self.expect(TokenKind::LBracket)?;
        let mut values = vec![];
        while !self.check(TokenKind::RBracket) {
            values.push(self.parse_integer()?);
            if !self.match_kinds(&[TokenKind::Comma]) {
                break;
            }
        }
        self.expect(TokenKind::RBracket)?;
        Ok(values)
    }
    fn parse_number_literal(&mut self, is_float: &mut bool) -> Result<f64> {
        let float_ahead = match self.peek().kind {
            TokenKind::Minus => self.peek_n(1).map(|t| t.kind) == Some(TokenKind::FloatLiteral),
            kind => kind == TokenKind::FloatLiteral,
        };
        if float_ahead {
            *is_float = true;
        }
        self.parse_float()
    }
    /// Parse `dense<1.0>` or `dense<[1, 2]>`.
    fn parse_dense(&mut self) -> Result<DenseAttr> {
        self.parse_keyword("dense")?;
        self.expect(TokenKind::Less)?;
        let mut is_float = false;
        let attr = if self.check(TokenKind::LBracket) {
            self.advance();
            let mut values = vec![];
            while !self.check(TokenKind::RBracket) {
                values.push(self.parse_number_literal(&mut is_float)?);
                if !self.match_kinds(&[TokenKind::Comma]) {
                    break;
                }
            }
            self.expect(TokenKind::RBracket)?;
            DenseAttr::new(values, is_float)
        } else {
            let value = self.parse_number_literal(&mut is_float)?;
            DenseAttr::splat(value, is_float)
        };
        self.expect(TokenKind::Greater)?;
        Ok(attr)
    }
    pub fn parse_attribute_value(&mut self) -> Result<Arc<dyn Attribute>> {
        let token = self.peek().clone();
        let next = self.peek_n(1).map(|t| t.kind);
        let attr: Arc<dyn Attribute> = match token.kind {
            TokenKind::Minus if next == Some(TokenKind::FloatLiteral) => {
                Arc::new(FloatAttr::new(self.parse_float()?))
            }
            TokenKind::Minus | TokenKind::Integer => {
                Arc::new(IntegerAttr::new(self.parse_integer()?))
            }
            TokenKind::FloatLiteral => Arc::new(FloatAttr::new(self.parse_float()?)),
            TokenKind::String => Arc::new(StringAttr::new(&self.parse_string()?)),
            TokenKind::AtIdentifier => Arc::new(SymbolAttr::new(&self.parse_symbol()?)),
            TokenKind::LBracket => Arc::new(ArrayAttr::new(self.parse_integer_list()?)),
            TokenKind::BareIdentifier if token.lexeme == "true" || token.lexeme == "false" => {
                Arc::new(BooleanAttr::new(self.parse_boolean()?))
            }
            TokenKind::BareIdentifier if token.lexeme == "dense" => Arc::new(self.parse_dense()?),
            TokenKind::BareIdentifier if token.lexeme == "inf" || token.lexeme == "NaN" => {
                Arc::new(FloatAttr::new(self.parse_float()?))
            }
            _ => {
                let msg = format!("Expected attribute value, but got `{}`", token.lexeme);
                return Err(anyhow::anyhow!(self.error(&token, &msg)));
            }
        };
        Ok(attr)
    }
    /// Parse `{name = value, ...}`.
    pub fn parse_attribute_dict(&mut self) -> Result<Attributes> {
        let attributes = Attributes::new();
        self.expect(TokenKind::LBrace)?;
        while !self.check(TokenKind::RBrace) {
            let name = self.expect(TokenKind::BareIdentifier)?;
            self.expect(TokenKind::Equal)?;
            let value = self.parse_attribute_value()?;
            attributes.insert(&name.lexeme, value);
            if !self.match_kinds(&[TokenKind::Comma]) {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(attributes)
    }
    /// Parse an op in the generic form
    /// `%r = name %a, %b {attr = v} : T_a, T_b -> T_r`.
    pub fn parse_simple_op<O: Op + 'static>(
        &mut self,
        parent: Option<Shared<Block>>,
    ) -> Result<Shared<dyn Op>> {
        let mut operation = Operation::default();
        operation.set_parent(parent);
        let results = self.parse_op_results_into(&mut operation)?;
        self.parse_operation_name_into::<O>(&mut operation)?;
        let operands = self.parse_op_operands()?;
        operation.set_operands(operands.clone());
        if self.check(TokenKind::LBrace) {
            operation.set_attributes(self.parse_attribute_dict()?);
        }
        let mut has_result_types = false;
        if self.check(TokenKind::Colon) {
            self.advance();
            if !self.check(TokenKind::Arrow) {
                let types = self.parse_types()?;
                self.verify_operand_types(&operands, &types)?;
            }
            if self.check(TokenKind::Arrow) {
                self.advance();
                let types = self.parse_result_types()?;
                results.set_types(types.vec())?;
                has_result_types = true;
            }
        } else if !operands.is_empty() {
            let msg = "Expected `:` followed by the operand types";
            return Err(anyhow::anyhow!(self.error(self.peek(), msg)));
        }
        if !results.values().is_empty() && !has_result_types {
            let msg = "Expected `->` followed by the result types";
            return Err(anyhow::anyhow!(self.error(self.peek(), msg)));
        }
        Ok(finish_op::<O>(operation, results))
    }
}

/// Wrap a parsed operation into `O` and point its results to the new op.
pub fn finish_op<O: Op + 'static>(operation: Operation, results: UnsetOpResults) -> Shared<dyn Op> {
    let operation: Shared<Operation> = Shared::new(operation.into());
    let op: Shared<dyn Op> = Shared::new(RwLock::new(O::from_operation_arc(operation)));
    results.set_defining_op(op.clone());
    op
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn parse(src: &str) -> Result<Shared<dyn Op>> {
        Parser::<DefaultParserDispatch>::parse(src)
    }

    #[test]
    fn test_parse_name() {
        let src = "%0, %1 = torch.prim.If %c -> (!torch.int, !torch.int) {";
        let parser = Parser::<DefaultParserDispatch> {
            src: src.to_string(),
            tokens: Scanner::scan(src).unwrap(),
            current: 0,
            scopes: vec![HashMap::new()],
            _marker: std::marker::PhantomData,
        };
        assert_eq!(default_parse_name(&parser).lexeme, "torch.prim.If");
    }

    #[test]
    fn test_wrap_in_module() {
        let src = indoc! {"
        %int1 = torch.constant.int 1
        %int2 = torch.constant.int 2
        %0 = torch.aten.add.int %int1, %int2 : !torch.int, !torch.int -> !torch.int
        "};
        let module = parse(src).unwrap();
        assert!(module.is::<ModuleOp>());
        let ops = module.rd().region().unwrap().ops();
        assert_eq!(ops.len(), 3);
        let text = module.rd().to_string();
        assert!(text.starts_with("module {\n"));
        assert!(text.contains("  %0 = torch.aten.add.int %int1, %int2"));
    }

    #[test]
    fn test_use_before_definition() {
        let src = "%0 = torch.aten.add.int %a, %a : !torch.int, !torch.int -> !torch.int";
        let err = parse(src).err().unwrap().to_string();
        assert!(err.contains("Expected assignment before use of %a"));
    }

    #[test]
    fn test_redefinition() {
        let src = indoc! {"
        %int1 = torch.constant.int 1
        %int1 = torch.constant.int 2
        "};
        let err = parse(src).err().unwrap().to_string();
        assert!(err.contains("Redefinition of %int1"));
    }

    #[test]
    fn test_operand_type_mismatch() {
        let src = indoc! {"
        %int1 = torch.constant.int 1
        %0 = torch.aten.add.int %int1, %int1 : !torch.float, !torch.int -> !torch.int
        "};
        let err = parse(src).err().unwrap().to_string();
        assert!(err.contains("declared as !torch.int but used as !torch.float"));
    }

    #[test]
    fn test_unterminated_type() {
        let src = "func.func @f(%arg0 : !torch.vtensor<[3],f32) {";
        assert!(parse(src).is_err());
    }

    #[test]
    fn test_attribute_dict() {
        let src = indoc! {"
        func.func @f(%arg0 : tensor<2x3xf32>) -> tensor<3x2xf32> {
          %0 = tosa.transpose %arg0 {perms = [1, 0]} : tensor<2x3xf32> -> tensor<3x2xf32>
          return %0 : tensor<3x2xf32>
        }
        "};
        let module = parse(src).unwrap();
        let func = module.rd().ops()[0].clone();
        let transpose = func.rd().ops()[0].clone();
        let perms = transpose.rd().operation().rd().attributes().get_array("perms");
        assert_eq!(perms, Some(vec![1, 0]));
    }
}
