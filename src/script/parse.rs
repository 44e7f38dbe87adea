//! Source parsing.
//!
//! `ruff_python_parser` turns source text into a Python syntax tree, which is
//! then lowered into the interpreter's [`ast`](super::ast). Lowering rejects
//! the constructs the interpreter does not run and performs the scope checks
//! (`return` outside a function, `break` outside a loop, bad assignment
//! targets) that a parser alone does not.

use std::collections::HashSet;
use std::sync::Arc;

use num_bigint::BigInt;
use ruff_python_ast::{self as py, ConversionFlag, InterpolatedStringElement, Number, Operator};
use ruff_python_parser as ruff;
use ruff_text_size::{Ranged, TextRange};

use super::ast::{
    Alias, Arg, BinOp, BoolOp, CmpOp, Comprehension, Constant, DictItem, ExceptHandler, Expr,
    FStringPart, FunctionDef, Param, Params, ScopeInfo, Stmt, StmtKind, UnaryOp,
};
use super::error::ParseError;
use super::long_int;

/// Deepest bracket nesting accepted in source text.
const MAX_NESTING: usize = 200;

/// Deepest statement and expression nesting accepted in the syntax tree.
const MAX_DEPTH: u32 = 1000;

type PResult<T> = Result<T, ParseError>;

/// Parse a chunk of statements.
pub fn parse_module(source: &str) -> PResult<Vec<Stmt>> {
    let lines = LineIndex::new(source);
    check_nesting(source, &lines)?;
    let module = ruff::parse_module(source)
        .map_err(|e| lines.syntax_error(&e))?
        .into_syntax();
    Lowering::new(source, &lines).block(&module.body)
}

/// Parse a single expression.
pub fn parse_expression(source: &str) -> PResult<Expr> {
    let lines = LineIndex::new(source);
    check_nesting(source, &lines)?;
    let parsed = ruff::parse_expression(source)
        .map_err(|e| lines.syntax_error(&e))?
        .into_syntax();
    Lowering::new(source, &lines).expr(&parsed.body)
}

/// Maps byte offsets to 1-based line and column numbers.
struct LineIndex<'a> {
    source: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(source: &'a str) -> Self {
        let mut starts = vec![0];
        starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        Self { source, starts }
    }

    fn position(&self, offset: usize) -> (u32, u32) {
        let offset = offset.min(self.source.len());
        let line = self.starts.partition_point(|&start| start <= offset);
        let start = self.starts.get(line.saturating_sub(1)).copied().unwrap_or(0);
        let column = self.source.get(start..offset).map_or(0, |text| text.chars().count()) + 1;
        (to_u32(line), to_u32(column))
    }

    fn line(&self, range: TextRange) -> u32 {
        self.position(range.start().into()).0
    }

    fn error(&self, offset: usize, message: impl Into<String>) -> ParseError {
        let (line, column) = self.position(offset);
        ParseError::new(line, column, message)
    }

    fn syntax_error(&self, err: &ruff::ParseError) -> ParseError {
        self.error(err.location.start().into(), err.error.to_string())
    }
}

fn to_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Reject deep bracket nesting before the recursive parser sees it.
fn check_nesting(source: &str, lines: &LineIndex<'_>) -> PResult<()> {
    let bytes = source.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            quote @ (b'\'' | b'"') => {
                i = skip_string(bytes, i, quote);
                continue;
            }
            b'(' | b'[' | b'{' => {
                depth += 1;
                if depth > MAX_NESTING {
                    return Err(lines.error(i, "too many nested parentheses"));
                }
            }
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            _ => {}
        }
        i += 1;
    }
    Ok(())
}

/// Offset just past the string literal opening at `start`.
fn skip_string(bytes: &[u8], start: usize, quote: u8) -> usize {
    let fence = [quote; 3];
    let triple = bytes.get(start..start + 3) == Some(&fence[..]);
    let width = if triple { 3 } else { 1 };
    let mut i = start + width;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' if !triple => return i,
            b if b == quote && (!triple || bytes.get(i..i + 3) == Some(&fence[..])) => {
                return i + width;
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Store {
    Assign,
    Delete,
}

impl Store {
    fn verb(self) -> &'static str {
        match self {
            Self::Assign => "assign to",
            Self::Delete => "delete",
        }
    }
}

/// Lowers a ruff syntax tree into [`Stmt`]s and [`Expr`]s.
struct Lowering<'a> {
    source: &'a str,
    lines: &'a LineIndex<'a>,
    depth: u32,
    /// Enclosing `def` and `lambda` bodies, through class bodies.
    functions: u32,
    /// Whether the innermost scope is a function body.
    in_function: bool,
    /// Loops enclosing the current statement within the innermost scope.
    loops: u32,
}

impl<'a> Lowering<'a> {
    fn new(source: &'a str, lines: &'a LineIndex<'a>) -> Self {
        Self {
            source,
            lines,
            depth: 0,
            functions: 0,
            in_function: false,
            loops: 0,
        }
    }

    fn error(&self, range: TextRange, message: impl Into<String>) -> ParseError {
        self.lines.error(range.start().into(), message)
    }

    fn unsupported(&self, range: TextRange, what: &str) -> ParseError {
        self.error(range, format!("{} are not supported", what))
    }

    fn enter(&mut self, range: TextRange) -> PResult<()> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error(range, "too many nested blocks or expressions"));
        }
        self.depth += 1;
        Ok(())
    }

    /// Run `lower` inside a new function (or class) scope.
    fn scoped<T>(&mut self, function: bool, lower: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        let saved = (self.in_function, self.loops, self.functions);
        self.in_function = function;
        self.loops = 0;
        if function {
            self.functions += 1;
        }
        let result = lower(self);
        (self.in_function, self.loops, self.functions) = saved;
        result
    }

    fn block(&mut self, body: &[py::Stmt]) -> PResult<Vec<Stmt>> {
        body.iter().map(|stmt| self.stmt(stmt)).collect()
    }

    fn loop_body(&mut self, body: &[py::Stmt]) -> PResult<Vec<Stmt>> {
        self.loops += 1;
        let body = self.block(body);
        self.loops -= 1;
        body
    }

    fn stmt(&mut self, stmt: &py::Stmt) -> PResult<Stmt> {
        let range = stmt.range();
        self.enter(range)?;
        let kind = self.stmt_kind(stmt, range);
        self.depth -= 1;
        Ok(Stmt::new(kind?, self.lines.line(range)))
    }

    fn stmt_kind(&mut self, stmt: &py::Stmt, range: TextRange) -> PResult<StmtKind> {
        let kind = match stmt {
            py::Stmt::Expr(s) => {
                let value = self.expr(&s.value)?;
                if matches!(value, Expr::Starred(_)) {
                    return Err(self.error(range, "can't use starred expression here"));
                }
                StmtKind::Expr(value)
            }
            py::Stmt::Assign(s) => {
                let targets = s
                    .targets
                    .iter()
                    .map(|target| self.target(target, Store::Assign))
                    .collect::<PResult<_>>()?;
                StmtKind::Assign {
                    targets,
                    value: self.value(&s.value)?,
                }
            }
            py::Stmt::AugAssign(s) => {
                let target = self.expr(&s.target)?;
                if !matches!(
                    target,
                    Expr::Name(_) | Expr::Attribute { .. } | Expr::Subscript { .. }
                ) {
                    return Err(self.error(
                        range,
                        format!("'{}' is an illegal expression for augmented assignment", describe(&target)),
                    ));
                }
                StmtKind::AugAssign {
                    target,
                    op: self.bin_op(s.op, range)?,
                    value: self.value(&s.value)?,
                }
            }
            py::Stmt::AnnAssign(s) => {
                let target = self.target(&s.target, Store::Assign)?;
                if !matches!(
                    target,
                    Expr::Name(_) | Expr::Attribute { .. } | Expr::Subscript { .. }
                ) {
                    return Err(self.error(range, "only single target can be annotated"));
                }
                match &s.value {
                    Some(value) => StmtKind::Assign {
                        targets: vec![target],
                        value: self.value(value)?,
                    },
                    None => StmtKind::Pass,
                }
            }
            py::Stmt::Pass(_) => StmtKind::Pass,
            py::Stmt::Break(_) => {
                if self.loops == 0 {
                    return Err(self.error(range, "'break' outside loop"));
                }
                StmtKind::Break
            }
            py::Stmt::Continue(_) => {
                if self.loops == 0 {
                    return Err(self.error(range, "'continue' not properly in loop"));
                }
                StmtKind::Continue
            }
            py::Stmt::Return(s) => {
                if !self.in_function {
                    return Err(self.error(range, "'return' outside function"));
                }
                StmtKind::Return(self.optional(s.value.as_deref())?)
            }
            py::Stmt::Delete(s) => StmtKind::Delete(
                s.targets
                    .iter()
                    .map(|target| self.target(target, Store::Delete))
                    .collect::<PResult<_>>()?,
            ),
            py::Stmt::Global(s) => StmtKind::Global(names(&s.names)),
            py::Stmt::Nonlocal(s) => {
                if self.functions == 0 {
                    return Err(self.error(range, "nonlocal declaration not allowed at module level"));
                }
                StmtKind::Nonlocal(names(&s.names))
            }
            py::Stmt::If(s) => self.if_stmt(s)?,
            py::Stmt::While(s) => StmtKind::While {
                test: self.expr(&s.test)?,
                body: self.loop_body(&s.body)?,
                orelse: self.block(&s.orelse)?,
            },
            py::Stmt::For(s) => {
                if s.is_async {
                    return Err(self.unsupported(range, "'async for' loops"));
                }
                StmtKind::For {
                    target: self.target(&s.target, Store::Assign)?,
                    iter: self.expr(&s.iter)?,
                    body: self.loop_body(&s.body)?,
                    orelse: self.block(&s.orelse)?,
                }
            }
            py::Stmt::FunctionDef(s) => self.function_def(s, range)?,
            py::Stmt::ClassDef(s) => self.class_def(s, range)?,
            py::Stmt::Raise(s) => StmtKind::Raise(self.optional(s.exc.as_deref())?),
            py::Stmt::Try(s) => self.try_stmt(s, range)?,
            py::Stmt::Assert(s) => StmtKind::Assert {
                test: self.expr(&s.test)?,
                msg: self.optional(s.msg.as_deref())?,
            },
            py::Stmt::Import(s) => StmtKind::Import(s.names.iter().map(alias).collect()),
            py::Stmt::ImportFrom(s) => {
                if s.level > 0 {
                    return Err(self.unsupported(range, "relative imports"));
                }
                if s.names.iter().any(|name| name.name.as_str() == "*") {
                    return Err(self.unsupported(range, "wildcard imports"));
                }
                StmtKind::ImportFrom {
                    module: s
                        .module
                        .as_ref()
                        .map(|module| module.as_str().to_string())
                        .unwrap_or_default(),
                    names: s.names.iter().map(alias).collect(),
                }
            }
            py::Stmt::With(_) => return Err(self.unsupported(range, "'with' statements")),
            py::Stmt::Match(_) => return Err(self.unsupported(range, "'match' statements")),
            py::Stmt::TypeAlias(_) => return Err(self.unsupported(range, "type aliases")),
            py::Stmt::IpyEscapeCommand(_) => {
                return Err(self.unsupported(range, "IPython escape commands"));
            }
        };
        Ok(kind)
    }

    fn if_stmt(&mut self, stmt: &py::StmtIf) -> PResult<StmtKind> {
        let mut orelse = Vec::new();
        for clause in stmt.elif_else_clauses.iter().rev() {
            let body = self.block(&clause.body)?;
            orelse = match &clause.test {
                Some(test) => {
                    let kind = StmtKind::If {
                        test: self.expr(test)?,
                        body,
                        orelse,
                    };
                    vec![Stmt::new(kind, self.lines.line(clause.range))]
                }
                None => body,
            };
        }
        Ok(StmtKind::If {
            test: self.expr(&stmt.test)?,
            body: self.block(&stmt.body)?,
            orelse,
        })
    }

    fn function_def(&mut self, def: &py::StmtFunctionDef, range: TextRange) -> PResult<StmtKind> {
        if def.is_async {
            return Err(self.unsupported(range, "async functions"));
        }
        if def.type_params.is_some() {
            return Err(self.unsupported(range, "type parameters"));
        }
        let decorators = def
            .decorator_list
            .iter()
            .map(|decorator| self.expr(&decorator.expression))
            .collect::<PResult<_>>()?;
        let params = self.params(&def.parameters)?;
        let body = self.scoped(true, |this| this.block(&def.body))?;
        Ok(StmtKind::FunctionDef {
            def: function(def.name.as_str().to_string(), params, body),
            decorators,
        })
    }

    fn class_def(&mut self, class: &py::StmtClassDef, range: TextRange) -> PResult<StmtKind> {
        if class.type_params.is_some() {
            return Err(self.unsupported(range, "type parameters"));
        }
        let decorators = class
            .decorator_list
            .iter()
            .map(|decorator| self.expr(&decorator.expression))
            .collect::<PResult<_>>()?;
        let mut bases = Vec::new();
        if let Some(arguments) = &class.arguments {
            if !arguments.keywords.is_empty() {
                return Err(self.unsupported(range, "class keyword arguments"));
            }
            for base in arguments.args.iter() {
                if matches!(base, py::Expr::Starred(_)) {
                    return Err(self.unsupported(base.range(), "starred base classes"));
                }
                bases.push(self.expr(base)?);
            }
        }
        let body = self.scoped(false, |this| this.block(&class.body))?;
        Ok(StmtKind::ClassDef {
            name: class.name.as_str().to_string(),
            bases,
            body,
            decorators,
        })
    }

    fn try_stmt(&mut self, stmt: &py::StmtTry, range: TextRange) -> PResult<StmtKind> {
        if stmt.is_star {
            return Err(self.unsupported(range, "'except*' clauses"));
        }
        let body = self.block(&stmt.body)?;
        let mut handlers = Vec::with_capacity(stmt.handlers.len());
        for handler in &stmt.handlers {
            let py::ExceptHandler::ExceptHandler(handler) = handler;
            handlers.push(ExceptHandler {
                typ: self.optional(handler.type_.as_deref())?,
                name: handler.name.as_ref().map(|name| name.as_str().to_string()),
                body: self.block(&handler.body)?,
            });
        }
        Ok(StmtKind::Try {
            body,
            handlers,
            orelse: self.block(&stmt.orelse)?,
            finalbody: self.block(&stmt.finalbody)?,
        })
    }

    /// Lower a parameter list. Defaults belong to the enclosing scope.
    fn params(&mut self, params: &py::Parameters) -> PResult<Params> {
        let mut seen = HashSet::new();
        let mut out = Params::default();
        let mut after_default = false;
        for param in params.posonlyargs.iter().chain(&params.args) {
            let default = self.optional(param.default.as_deref())?;
            if default.is_some() {
                after_default = true;
            } else if after_default {
                return Err(self.error(
                    param.range,
                    "non-default argument follows default argument",
                ));
            }
            out.positional.push(Param {
                name: self.param_name(&param.parameter, &mut seen)?,
                default,
            });
        }
        out.vararg = params
            .vararg
            .as_deref()
            .map(|param| self.param_name(param, &mut seen))
            .transpose()?;
        for param in &params.kwonlyargs {
            let default = self.optional(param.default.as_deref())?;
            out.kwonly.push(Param {
                name: self.param_name(&param.parameter, &mut seen)?,
                default,
            });
        }
        out.kwarg = params
            .kwarg
            .as_deref()
            .map(|param| self.param_name(param, &mut seen))
            .transpose()?;
        Ok(out)
    }

    fn param_name(&self, param: &py::Parameter, seen: &mut HashSet<String>) -> PResult<String> {
        let name = param.name.as_str().to_string();
        if !seen.insert(name.clone()) {
            return Err(self.error(
                param.range,
                format!("duplicate argument '{}' in function definition", name),
            ));
        }
        Ok(name)
    }

    /// Lower an assignment, `for` or `del` target.
    fn target(&mut self, expr: &py::Expr, store: Store) -> PResult<Expr> {
        let target = self.expr(expr)?;
        if store == Store::Assign && matches!(target, Expr::Starred(_)) {
            return Err(self.error(
                expr.range(),
                "starred assignment target must be in a list or tuple",
            ));
        }
        self.check_target(&target, store, expr.range())?;
        Ok(target)
    }

    fn check_target(&self, target: &Expr, store: Store, range: TextRange) -> PResult<()> {
        match target {
            Expr::Name(_) | Expr::Attribute { .. } | Expr::Subscript { .. } => Ok(()),
            Expr::Tuple(items) | Expr::List(items) => {
                let starred = items.iter().filter(|item| matches!(item, Expr::Starred(_))).count();
                if store == Store::Assign && starred > 1 {
                    return Err(self.error(range, "multiple starred expressions in assignment"));
                }
                items
                    .iter()
                    .try_for_each(|item| self.check_target(item, store, range))
            }
            Expr::Starred(inner) if store == Store::Assign => self.check_target(inner, store, range),
            other => Err(self.error(
                range,
                format!("cannot {} {}", store.verb(), describe(other)),
            )),
        }
    }

    /// Lower the right-hand side of an assignment.
    fn value(&mut self, expr: &py::Expr) -> PResult<Expr> {
        let value = self.expr(expr)?;
        if matches!(value, Expr::Starred(_)) {
            return Err(self.error(expr.range(), "can't use starred expression here"));
        }
        Ok(value)
    }

    fn optional(&mut self, expr: Option<&py::Expr>) -> PResult<Option<Expr>> {
        expr.map(|expr| self.expr(expr)).transpose()
    }

    fn boxed(&mut self, expr: Option<&py::Expr>) -> PResult<Option<Box<Expr>>> {
        Ok(self.optional(expr)?.map(Box::new))
    }

    fn exprs(&mut self, exprs: &[py::Expr]) -> PResult<Vec<Expr>> {
        exprs.iter().map(|expr| self.expr(expr)).collect()
    }

    fn expr(&mut self, expr: &py::Expr) -> PResult<Expr> {
        let range = expr.range();
        self.enter(range)?;
        let lowered = self.expr_kind(expr, range);
        self.depth -= 1;
        lowered
    }

    fn expr_kind(&mut self, expr: &py::Expr, range: TextRange) -> PResult<Expr> {
        let lowered = match expr {
            py::Expr::BoolOp(e) => Expr::BoolOp {
                op: match e.op {
                    py::BoolOp::And => BoolOp::And,
                    py::BoolOp::Or => BoolOp::Or,
                },
                values: self.exprs(&e.values)?,
            },
            py::Expr::Named(_) => return Err(self.unsupported(range, "assignment expressions")),
            py::Expr::BinOp(e) => Expr::BinOp {
                left: Box::new(self.expr(&e.left)?),
                op: self.bin_op(e.op, range)?,
                right: Box::new(self.expr(&e.right)?),
            },
            py::Expr::UnaryOp(e) => Expr::UnaryOp {
                op: match e.op {
                    py::UnaryOp::Not => UnaryOp::Not,
                    py::UnaryOp::USub => UnaryOp::Neg,
                    py::UnaryOp::UAdd => UnaryOp::Pos,
                    py::UnaryOp::Invert => UnaryOp::Invert,
                },
                operand: Box::new(self.expr(&e.operand)?),
            },
            py::Expr::Lambda(e) => {
                let params = match &e.parameters {
                    Some(params) => self.params(params)?,
                    None => Params::default(),
                };
                let line = self.lines.line(range);
                let body = self.scoped(true, |this| this.expr(&e.body))?;
                let body = vec![Stmt::new(StmtKind::Return(Some(body)), line)];
                Expr::Lambda(function("<lambda>".to_string(), params, body))
            }
            py::Expr::If(e) => Expr::IfExp {
                test: Box::new(self.expr(&e.test)?),
                body: Box::new(self.expr(&e.body)?),
                orelse: Box::new(self.expr(&e.orelse)?),
            },
            py::Expr::Dict(e) => {
                let mut items = Vec::with_capacity(e.items.len());
                for item in &e.items {
                    items.push(match &item.key {
                        Some(key) => DictItem::Pair(self.expr(key)?, self.expr(&item.value)?),
                        None => DictItem::Spread(self.expr(&item.value)?),
                    });
                }
                Expr::Dict(items)
            }
            py::Expr::Set(e) => Expr::Set(self.exprs(&e.elts)?),
            py::Expr::ListComp(e) => Expr::ListComp {
                elt: Box::new(self.expr(&e.elt)?),
                generators: self.generators(&e.generators)?,
            },
            py::Expr::SetComp(e) => Expr::SetComp {
                elt: Box::new(self.expr(&e.elt)?),
                generators: self.generators(&e.generators)?,
            },
            py::Expr::DictComp(e) => Expr::DictComp {
                key: Box::new(match &e.key {
                    Some(key) => self.expr(key)?,
                    None => return Err(self.unsupported(range, "dict unpacking in comprehensions")),
                }),
                value: Box::new(self.expr(&e.value)?),
                generators: self.generators(&e.generators)?,
            },
            // Generator expressions are evaluated eagerly.
            py::Expr::Generator(e) => Expr::ListComp {
                elt: Box::new(self.expr(&e.elt)?),
                generators: self.generators(&e.generators)?,
            },
            py::Expr::Await(_) => return Err(self.unsupported(range, "'await' expressions")),
            py::Expr::Yield(_) | py::Expr::YieldFrom(_) => {
                return Err(self.unsupported(range, "'yield' expressions"));
            }
            py::Expr::Compare(e) => Expr::Compare {
                left: Box::new(self.expr(&e.left)?),
                ops: e.ops.iter().map(|op| cmp_op(*op)).collect(),
                comparators: self.exprs(&e.comparators)?,
            },
            py::Expr::Call(e) => Expr::Call {
                func: Box::new(self.expr(&e.func)?),
                args: self.arguments(&e.arguments)?,
            },
            py::Expr::FString(e) => self.fstring(&e.value)?,
            py::Expr::TString(_) => return Err(self.unsupported(range, "template strings")),
            py::Expr::StringLiteral(e) => Expr::Constant(Constant::Str(Arc::from(e.value.to_str()))),
            py::Expr::BytesLiteral(_) => return Err(self.unsupported(range, "bytes literals")),
            py::Expr::NumberLiteral(e) => Expr::Constant(match &e.value {
                Number::Int(int) => match int.as_i64() {
                    Some(n) => Constant::Int(n),
                    None => {
                        let text = int.to_string();
                        let n = int_literal(&text).ok_or_else(|| {
                            self.error(range, format!("invalid integer literal '{}'", text))
                        })?;
                        Constant::LongInt(Arc::new(n))
                    }
                },
                Number::Float(f) => Constant::Float(*f),
                Number::Complex { .. } => return Err(self.unsupported(range, "complex numbers")),
            }),
            py::Expr::BooleanLiteral(e) => Expr::Constant(Constant::Bool(e.value)),
            py::Expr::NoneLiteral(_) => Expr::Constant(Constant::None),
            py::Expr::EllipsisLiteral(_) => Expr::Constant(Constant::Ellipsis),
            py::Expr::Attribute(e) => Expr::Attribute {
                value: Box::new(self.expr(&e.value)?),
                attr: e.attr.as_str().to_string(),
            },
            py::Expr::Subscript(e) => Expr::Subscript {
                value: Box::new(self.expr(&e.value)?),
                index: Box::new(self.expr(&e.slice)?),
            },
            py::Expr::Starred(e) => Expr::Starred(Box::new(self.expr(&e.value)?)),
            py::Expr::Name(e) => Expr::Name(e.id.as_str().to_string()),
            py::Expr::List(e) => Expr::List(self.exprs(&e.elts)?),
            py::Expr::Tuple(e) => Expr::Tuple(self.exprs(&e.elts)?),
            py::Expr::Slice(e) => Expr::Slice {
                lower: self.boxed(e.lower.as_deref())?,
                upper: self.boxed(e.upper.as_deref())?,
                step: self.boxed(e.step.as_deref())?,
            },
            py::Expr::IpyEscapeCommand(_) => {
                return Err(self.unsupported(range, "IPython escape commands"));
            }
        };
        Ok(lowered)
    }

    fn bin_op(&self, op: Operator, range: TextRange) -> PResult<BinOp> {
        Ok(match op {
            Operator::Add => BinOp::Add,
            Operator::Sub => BinOp::Sub,
            Operator::Mult => BinOp::Mul,
            Operator::Div => BinOp::Div,
            Operator::FloorDiv => BinOp::FloorDiv,
            Operator::Mod => BinOp::Mod,
            Operator::Pow => BinOp::Pow,
            Operator::BitAnd => BinOp::BitAnd,
            Operator::BitOr => BinOp::BitOr,
            Operator::BitXor => BinOp::BitXor,
            Operator::LShift => BinOp::LShift,
            Operator::RShift => BinOp::RShift,
            Operator::MatMult => return Err(self.error(range, "the '@' operator is not supported")),
        })
    }

    fn arguments(&mut self, arguments: &py::Arguments) -> PResult<Vec<Arg>> {
        let mut args = Vec::with_capacity(arguments.args.len() + arguments.keywords.len());
        for arg in arguments.args.iter() {
            args.push(match arg {
                py::Expr::Starred(starred) => Arg::Star(self.expr(&starred.value)?),
                other => Arg::Positional(self.expr(other)?),
            });
        }
        for keyword in arguments.keywords.iter() {
            let value = self.expr(&keyword.value)?;
            args.push(match &keyword.arg {
                Some(name) => Arg::Keyword(name.as_str().to_string(), value),
                None => Arg::DoubleStar(value),
            });
        }
        Ok(args)
    }

    fn generators(&mut self, generators: &[py::Comprehension]) -> PResult<Vec<Comprehension>> {
        let mut out = Vec::with_capacity(generators.len());
        for generator in generators {
            if generator.is_async {
                return Err(self.unsupported(generator.range, "async comprehensions"));
            }
            out.push(Comprehension {
                target: self.target(&generator.target, Store::Assign)?,
                iter: self.expr(&generator.iter)?,
                ifs: self.exprs(&generator.ifs)?,
            });
        }
        Ok(out)
    }

    fn fstring(&mut self, value: &py::FStringValue) -> PResult<Expr> {
        let mut parts = Vec::new();
        for part in value {
            match part {
                py::FStringPart::Literal(literal) => push_literal(&mut parts, &literal.value),
                py::FStringPart::FString(fstring) => {
                    self.fstring_elements(&fstring.elements, &mut parts)?;
                }
            }
        }
        Ok(match parts.as_slice() {
            [] => Expr::Constant(Constant::Str(Arc::from(""))),
            [FStringPart::Literal(text)] => Expr::Constant(Constant::Str(Arc::from(text.as_str()))),
            _ => Expr::FString(parts),
        })
    }

    fn fstring_elements(
        &mut self,
        elements: &py::InterpolatedStringElements,
        parts: &mut Vec<FStringPart>,
    ) -> PResult<()> {
        for element in elements {
            match element {
                InterpolatedStringElement::Literal(literal) => push_literal(parts, &literal.value),
                InterpolatedStringElement::Interpolation(field) => {
                    let mut conversion = match field.conversion {
                        ConversionFlag::None => None,
                        ConversionFlag::Str => Some('s'),
                        ConversionFlag::Repr => Some('r'),
                        ConversionFlag::Ascii => Some('a'),
                    };
                    // `{expr=}` echoes its source text and defaults to repr.
                    if let Some(debug) = &field.debug_text {
                        let text = self.source.get(std::ops::Range::<usize>::from(field.expression.range()));
                        push_literal(
                            parts,
                            &format!("{}{}{}", debug.leading(), text.unwrap_or_default(), debug.trailing()),
                        );
                        if conversion.is_none() && field.format_spec.is_none() {
                            conversion = Some('r');
                        }
                    }
                    let mut spec = Vec::new();
                    if let Some(format_spec) = &field.format_spec {
                        self.fstring_elements(&format_spec.elements, &mut spec)?;
                    }
                    parts.push(FStringPart::Value {
                        expr: Box::new(self.expr(&field.expression)?),
                        conversion,
                        spec,
                    });
                }
            }
        }
        Ok(())
    }
}

fn function(name: String, params: Params, body: Vec<Stmt>) -> Arc<FunctionDef> {
    let scope = Arc::new(ScopeInfo::analyze(&params, &body));
    Arc::new(FunctionDef {
        name,
        params,
        body,
        scope,
    })
}

fn names(identifiers: &[py::Identifier]) -> Vec<String> {
    identifiers.iter().map(|id| id.as_str().to_string()).collect()
}

fn alias(alias: &py::Alias) -> Alias {
    Alias {
        name: alias.name.as_str().to_string(),
        asname: alias.asname.as_ref().map(|name| name.as_str().to_string()),
    }
}

fn push_literal(parts: &mut Vec<FStringPart>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(FStringPart::Literal(last)) = parts.last_mut() {
        last.push_str(text);
    } else {
        parts.push(FStringPart::Literal(text.to_string()));
    }
}

/// Value of an integer literal too large for `i64`, with its radix prefix
/// and digit separators.
fn int_literal(text: &str) -> Option<BigInt> {
    let digits: String = text
        .chars()
        .filter(|c| *c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect();
    let (radix, body) = match digits.get(..2) {
        Some("0x") => (16, &digits[2..]),
        Some("0o") => (8, &digits[2..]),
        Some("0b") => (2, &digits[2..]),
        _ => (10, digits.as_str()),
    };
    long_int::parse(body, radix)
}

fn cmp_op(op: py::CmpOp) -> CmpOp {
    match op {
        py::CmpOp::Eq => CmpOp::Eq,
        py::CmpOp::NotEq => CmpOp::NotEq,
        py::CmpOp::Lt => CmpOp::Lt,
        py::CmpOp::LtE => CmpOp::LtE,
        py::CmpOp::Gt => CmpOp::Gt,
        py::CmpOp::GtE => CmpOp::GtE,
        py::CmpOp::Is => CmpOp::Is,
        py::CmpOp::IsNot => CmpOp::IsNot,
        py::CmpOp::In => CmpOp::In,
        py::CmpOp::NotIn => CmpOp::NotIn,
    }
}

/// How an invalid target is named in error messages.
fn describe(expr: &Expr) -> &'static str {
    match expr {
        Expr::Constant(Constant::None) => "None",
        Expr::Constant(Constant::Bool(true)) => "True",
        Expr::Constant(Constant::Bool(false)) => "False",
        Expr::Constant(Constant::Ellipsis) => "ellipsis",
        Expr::Constant(_) => "literal",
        Expr::FString(_) => "f-string expression",
        Expr::Call { .. } => "function call",
        Expr::Compare { .. } => "comparison",
        Expr::IfExp { .. } => "conditional expression",
        Expr::Lambda(_) => "lambda",
        Expr::Dict(_) => "dict literal",
        Expr::Set(_) => "set display",
        Expr::ListComp { .. } => "list comprehension",
        Expr::SetComp { .. } => "set comprehension",
        Expr::DictComp { .. } => "dict comprehension",
        Expr::Starred(_) => "starred",
        _ => "expression",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Vec<Stmt> {
        parse_module(source).unwrap()
    }

    fn parse_err(source: &str) -> ParseError {
        parse_module(source).unwrap_err()
    }

    #[test]
    fn test_empty_source() {
        assert!(parse("").is_empty());
        assert!(parse("\n\n   \n# only a comment\n").is_empty());
    }

    #[test]
    fn test_assignment_then_expression() {
        let body = parse("a = 10\na");
        assert_eq!(body.len(), 2);
        assert!(matches!(body[0].kind, StmtKind::Assign { .. }));
        assert_eq!(body[1].kind, StmtKind::Expr(Expr::Name("a".into())));
        assert_eq!(body[1].line, 2);
    }

    #[test]
    fn test_chained_and_tuple_assignment() {
        let body = parse("a = b = 1\nx, *rest = [1, 2, 3]");
        match &body[0].kind {
            StmtKind::Assign { targets, .. } => assert_eq!(targets.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
        match &body[1].kind {
            StmtKind::Assign { targets, .. } => {
                assert!(matches!(&targets[0], Expr::Tuple(items) if items.len() == 2))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_operator_precedence() {
        let body = parse("1 + 2 * 3");
        let StmtKind::Expr(Expr::BinOp { op, right, .. }) = &body[0].kind else {
            panic!("expected binop");
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(**right, Expr::BinOp { op: BinOp::Mul, .. }));

        let body = parse("-2 ** 2");
        assert!(matches!(
            &body[0].kind,
            StmtKind::Expr(Expr::UnaryOp {
                op: UnaryOp::Neg,
                ..
            })
        ));
    }

    #[test]
    fn test_comparison_chain() {
        let body = parse("a < b <= c not in d is not e");
        let StmtKind::Expr(Expr::Compare { ops, .. }) = &body[0].kind else {
            panic!("expected compare");
        };
        assert_eq!(ops, &[CmpOp::Lt, CmpOp::LtE, CmpOp::NotIn, CmpOp::IsNot]);
    }

    #[test]
    fn test_class_with_method() {
        let source = "\nclass MyClass:\n    def __init__(self):\n        pass\na = 0";
        let body = parse(source);
        assert_eq!(body.len(), 2);
        assert!(matches!(&body[0].kind, StmtKind::ClassDef { name, .. } if name == "MyClass"));
        assert_eq!(body[0].line, 2);
        assert!(matches!(body[1].kind, StmtKind::Assign { .. }));
    }

    #[test]
    fn test_function_params() {
        let body = parse("def f(a, b=1, *args, c, d=2, **kw):\n    return a");
        let StmtKind::FunctionDef { def, .. } = &body[0].kind else {
            panic!("expected def");
        };
        assert_eq!(def.params.positional.len(), 2);
        assert_eq!(def.params.vararg.as_deref(), Some("args"));
        assert_eq!(def.params.kwonly.len(), 2);
        assert_eq!(def.params.kwarg.as_deref(), Some("kw"));
        assert!(def.scope.is_local("a"));
    }

    #[test]
    fn test_positional_only_params_are_positional() {
        let body = parse("def f(a, /, b):\n    pass");
        let StmtKind::FunctionDef { def, .. } = &body[0].kind else {
            panic!("expected def");
        };
        assert_eq!(def.params.positional.len(), 2);
    }

    #[test]
    fn test_inline_suite_and_semicolons() {
        let body = parse("if x: a = 1; b = 2\nelse: pass");
        let StmtKind::If { body, orelse, .. } = &body[0].kind else {
            panic!("expected if");
        };
        assert_eq!(body.len(), 2);
        assert_eq!(orelse.len(), 1);
    }

    #[test]
    fn test_elif_chain() {
        let body = parse("if a:\n    x\nelif b:\n    y\nelse:\n    z");
        let StmtKind::If { orelse, .. } = &body[0].kind else {
            panic!("expected if");
        };
        let StmtKind::If { orelse: last, .. } = &orelse[0].kind else {
            panic!("expected nested if");
        };
        assert_eq!(orelse[0].line, 3);
        assert_eq!(last[0].kind, StmtKind::Expr(Expr::Name("z".into())));
    }

    #[test]
    fn test_comprehensions() {
        assert!(matches!(
            &parse("[x * 2 for x in xs if x]")[0].kind,
            StmtKind::Expr(Expr::ListComp { .. })
        ));
        assert!(matches!(
            &parse("{k: v for k, v in items}")[0].kind,
            StmtKind::Expr(Expr::DictComp { .. })
        ));
        assert!(matches!(
            &parse("{x for x in xs}")[0].kind,
            StmtKind::Expr(Expr::SetComp { .. })
        ));
        let body = parse("sum(x for x in xs)");
        let StmtKind::Expr(Expr::Call { args, .. }) = &body[0].kind else {
            panic!("expected call");
        };
        assert!(matches!(&args[0], Arg::Positional(Expr::ListComp { .. })));
    }

    #[test]
    fn test_call_arguments() {
        let body = parse("f(a, *b, k=1, **d)");
        let StmtKind::Expr(Expr::Call { args, .. }) = &body[0].kind else {
            panic!("expected call");
        };
        assert!(matches!(&args[0], Arg::Positional(_)));
        assert!(matches!(&args[1], Arg::Star(_)));
        assert!(matches!(&args[2], Arg::Keyword(name, _) if name == "k"));
        assert!(matches!(&args[3], Arg::DoubleStar(_)));
    }

    #[test]
    fn test_slices() {
        let body = parse("a[1:2]\na[::2]\na[1]\na[1, 2]");
        let index = |i: usize| match &body[i].kind {
            StmtKind::Expr(Expr::Subscript { index, .. }) => (**index).clone(),
            other => panic!("unexpected {:?}", other),
        };
        assert!(matches!(index(0), Expr::Slice { lower: Some(_), upper: Some(_), step: None }));
        assert!(matches!(index(1), Expr::Slice { lower: None, upper: None, step: Some(_) }));
        assert_eq!(index(2), Expr::Constant(Constant::Int(1)));
        assert!(matches!(index(3), Expr::Tuple(_)));
    }

    #[test]
    fn test_integer_literals() {
        let value = |source: &str| match &parse(source)[0].kind {
            StmtKind::Expr(Expr::Constant(c)) => c.clone(),
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(value("1_000"), Constant::Int(1000));
        assert_eq!(value("0xff"), Constant::Int(255));
        let Constant::LongInt(n) = value("100_000_000_000_000_000_000") else {
            panic!("expected a long integer");
        };
        assert_eq!(n.to_string(), "100000000000000000000");
        let Constant::LongInt(n) = value("0x1_0000_0000_0000_0000") else {
            panic!("expected a long integer");
        };
        assert_eq!(n.to_string(), "18446744073709551616");
        assert_eq!(value("2.5"), Constant::Float(2.5));
    }

    #[test]
    fn test_fstring_expression() {
        let body = parse("f'{a + 1:.2f} and {b!r}'");
        let StmtKind::Expr(Expr::FString(parts)) = &body[0].kind else {
            panic!("expected f-string");
        };
        assert_eq!(parts.len(), 3);
        assert!(matches!(
            &parts[0],
            FStringPart::Value { spec, .. } if spec == &[FStringPart::Literal(".2f".into())]
        ));
        assert!(matches!(&parts[2], FStringPart::Value { conversion: Some('r'), .. }));
    }

    #[test]
    fn test_fstring_nested_spec_and_debug_text() {
        let body = parse("f'{x:>{width}}'");
        let StmtKind::Expr(Expr::FString(parts)) = &body[0].kind else {
            panic!("expected f-string");
        };
        let FStringPart::Value { spec, .. } = &parts[0] else {
            panic!("expected a replacement field");
        };
        assert_eq!(spec[0], FStringPart::Literal(">".into()));
        assert!(matches!(&spec[1], FStringPart::Value { .. }));

        let body = parse("f'{x=}'");
        let StmtKind::Expr(Expr::FString(parts)) = &body[0].kind else {
            panic!("expected f-string");
        };
        assert_eq!(parts[0], FStringPart::Literal("x=".into()));
        assert!(matches!(&parts[1], FStringPart::Value { conversion: Some('r'), .. }));
    }

    #[test]
    fn test_string_concatenation() {
        let body = parse("'a' 'b' \"c\"");
        assert_eq!(
            body[0].kind,
            StmtKind::Expr(Expr::Constant(Constant::Str(Arc::from("abc"))))
        );
        let body = parse("'a' f'b' 'c'");
        assert_eq!(
            body[0].kind,
            StmtKind::Expr(Expr::Constant(Constant::Str(Arc::from("abc"))))
        );
    }

    #[test]
    fn test_try_statement() {
        let source = "try:\n    x\nexcept (A, B) as e:\n    y\nexcept:\n    z\nelse:\n    w\nfinally:\n    v";
        let body = parse(source);
        let StmtKind::Try {
            handlers,
            orelse,
            finalbody,
            ..
        } = &body[0].kind
        else {
            panic!("expected try");
        };
        assert_eq!(handlers.len(), 2);
        assert_eq!(handlers[0].name.as_deref(), Some("e"));
        assert!(handlers[1].typ.is_none());
        assert_eq!(orelse.len(), 1);
        assert_eq!(finalbody.len(), 1);
    }

    #[test]
    fn test_imports() {
        let body = parse("import math as m, os.path\nfrom math import sqrt, pi as PI");
        let StmtKind::Import(aliases) = &body[0].kind else {
            panic!("expected import");
        };
        assert_eq!(aliases[0].bound_name(), "m");
        assert_eq!(aliases[1].name, "os.path");
        let StmtKind::ImportFrom { module, names } = &body[1].kind else {
            panic!("expected from-import");
        };
        assert_eq!(module, "math");
        assert_eq!(names[1].bound_name(), "PI");
    }

    #[test]
    fn test_decorators() {
        let body = parse("@dec\n@other(1)\ndef f():\n    pass");
        let StmtKind::FunctionDef { decorators, .. } = &body[0].kind else {
            panic!("expected def");
        };
        assert_eq!(decorators.len(), 2);
    }

    #[test]
    fn test_ellipsis_body() {
        let body = parse("def f(): ...");
        assert!(matches!(body[0].kind, StmtKind::FunctionDef { .. }));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse_module("a = ").is_err());
        assert!(parse_module("  a = 1").is_err());
        assert!(parse_module("if x:\npass").is_err());
        assert!(parse_err("1 = a").message.to_lowercase().contains("assign"));
        assert!(parse_err("f() = 1").message.to_lowercase().contains("assign"));
        assert!(parse_err("def f(a=1, b): pass").message.contains("default"));
        assert!(parse_err("def f(a, a): pass").message.to_lowercase().contains("duplicate"));
    }

    #[test]
    fn test_scope_errors() {
        assert_eq!(parse_err("return 1").message, "'return' outside function");
        assert_eq!(parse_err("break").message, "'break' outside loop");
        assert_eq!(parse_err("continue").message, "'continue' not properly in loop");
        assert_eq!(
            parse_err("class C:\n    return 1").message,
            "'return' outside function"
        );
        assert_eq!(
            parse_err("nonlocal x").message,
            "nonlocal declaration not allowed at module level"
        );
        assert!(parse_module("def f():\n    x = 1\n    def g():\n        nonlocal x").is_ok());
    }

    #[test]
    fn test_break_inside_loop_in_function() {
        assert!(parse_module("def f():\n    while True:\n        break").is_ok());
        assert!(parse_module("while True:\n    def f():\n        break").is_err());
        assert!(parse_module("while x:\n    pass\nelse:\n    break").is_err());
        assert!(parse_module("for i in x:\n    try:\n        continue\n    finally:\n        pass").is_ok());
    }

    #[test]
    fn test_invalid_targets() {
        assert!(parse_err("a, *b, *c = x").message.to_lowercase().contains("starred"));
        assert!(parse_err("x = *a").message.to_lowercase().contains("starred"));
        assert!(parse_err("*a = x").message.to_lowercase().contains("starred"));
        assert!(parse_module("del a, b[0], c.d").is_ok());
    }

    #[test]
    fn test_unsupported_constructs() {
        for source in [
            "with x: pass",
            "async def f(): pass",
            "def f():\n    yield 1",
            "(y := 1)",
            "b'bytes'",
            "1j",
            "from math import *",
            "from . import x",
            "class C(metaclass=M): pass",
            "match x:\n    case 1: pass",
        ] {
            let err = parse_err(source);
            assert!(err.message.contains("not supported"), "{}: {}", source, err.message);
        }
    }

    #[test]
    fn test_error_position() {
        let err = parse_err("a = 1\nb = (2 +\n");
        assert!(err.line >= 2);

        let err = parse_err("x = 1\ny = 2\nreturn x");
        assert_eq!((err.line, err.column), (3, 1));

        let err = parse_err("if True:\n    é = 1; break");
        assert_eq!((err.line, err.column), (2, 12));
    }

    #[test]
    fn test_nesting_limit() {
        let source = format!("{}1{}", "(".repeat(500), ")".repeat(500));
        assert!(parse_err(&source).message.contains("nested"));

        let source = format!("x = {}1{}", "[".repeat(100_000), "]".repeat(100_000));
        let err = parse_err(&source);
        assert_eq!((err.line, err.column), (1, 205));
    }

    #[test]
    fn test_nesting_scan_skips_strings_and_comments() {
        let brackets = "(".repeat(300);
        let source = format!("s = '{0}'\nt = \"\"\"\n{0}\n\"\"\"  # {0}\n", brackets);
        assert_eq!(parse(&source).len(), 2);
    }

    #[test]
    fn test_annotated_assignment() {
        let body = parse("x: int = 5\ny: int");
        assert!(matches!(body[0].kind, StmtKind::Assign { .. }));
        assert_eq!(body[1].kind, StmtKind::Pass);
    }

    #[test]
    fn test_lambda() {
        let body = parse("f = lambda x, y=2: x + y");
        let StmtKind::Assign { value, .. } = &body[0].kind else {
            panic!("expected assign");
        };
        let Expr::Lambda(def) = value else {
            panic!("expected lambda");
        };
        assert_eq!(def.name, "<lambda>");
        assert_eq!(def.params.positional.len(), 2);
        assert!(matches!(def.body[0].kind, StmtKind::Return(Some(_))));
    }

    #[test]
    fn test_parse_expression() {
        assert!(matches!(
            parse_expression("a[0] + f(1)").unwrap(),
            Expr::BinOp { op: BinOp::Add, .. }
        ));
        assert!(parse_expression("a = 1").is_err());
    }
}
