//! Parsing and evaluation of the mathematical expressions of a [System](crate::System).
//!
//! Expressions are parsed into a [RawExpr] and then compiled against an
//! [EvaluatorCache]. Every symbol is resolved once to a slot of the cache. Evaluation
//! only reads slots and never looks up names.
mod functions;
mod parser;

pub use functions::*;
pub use parser::*;

use crate::EvaluatorCache;
use cellpotts_concepts::*;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Compiled syntax tree whose symbols point into an [EvaluatorCache].
#[derive(Clone, Debug)]
pub(crate) enum Node {
    Const(f64),
    Slot(usize),
    Param(usize),
    Unary(UnaryOp, Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    Builtin(Builtin, Vec<Node>),
    Random(RandomFunc, Vec<Node>),
    Function(Arc<UserFunction>, Vec<Node>),
    Conditional(Box<Node>, Box<Node>, Box<Node>),
}

impl Node {
    fn eval(&self, cache: &mut EvaluatorCache, params: &[f64]) -> f64 {
        match self {
            Node::Const(value) => *value,
            Node::Slot(slot) => cache.get(*slot),
            Node::Param(index) => params[*index],
            Node::Unary(UnaryOp::Neg, x) => -x.eval(cache, params),
            Node::Unary(UnaryOp::Not, x) => match x.eval(cache, params) == 0.0 {
                true => 1.0,
                false => 0.0,
            },
            Node::Binary(op, a, b) => {
                let a = a.eval(cache, params);
                let b = b.eval(cache, params);
                op.apply(a, b)
            }
            Node::Builtin(builtin, args) => {
                let args = Self::eval_args(args, cache, params);
                builtin.apply(&args)
            }
            Node::Random(random, args) => {
                let args = Self::eval_args(args, cache, params);
                random.sample(&args, cache.rng_mut())
            }
            Node::Function(function, args) => {
                let args = Self::eval_args(args, cache, params);
                function.body.eval(cache, &args)
            }
            Node::Conditional(condition, a, b) => match condition.eval(cache, params) != 0.0 {
                true => a.eval(cache, params),
                false => b.eval(cache, params),
            },
        }
    }

    fn eval_args(args: &[Node], cache: &mut EvaluatorCache, params: &[f64]) -> Vec<f64> {
        args.iter().map(|arg| arg.eval(cache, params)).collect()
    }
}

/// A parametric function `f(x, y) = ...` declared in a [System](crate::System).
#[derive(Clone, Debug)]
pub struct UserFunction {
    name: String,
    params: Vec<String>,
    text: String,
    body: Node,
    symbols: BTreeSet<String>,
    random: BTreeSet<RandomFunc>,
    slots: BTreeSet<usize>,
}

impl UserFunction {
    /// Name under which the function is called.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of the parameters.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Source text of the function body.
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// User defined functions which can be called from expressions.
#[derive(Clone, Debug, Default)]
pub struct FunctionTable {
    functions: BTreeMap<String, Arc<UserFunction>>,
}

impl FunctionTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a function and make it available to all expressions compiled afterwards.
    ///
    /// The body may call all functions which are already part of the table.
    pub fn define(
        &mut self,
        name: &str,
        params: &[String],
        text: &str,
        cache: &mut EvaluatorCache,
        scope: &dyn Scope,
    ) -> Result<(), ParseError> {
        if Builtin::from_name(name).is_some() || RandomFunc::from_name(name).is_some() {
            return Err(ParseError(format!(
                "function \"{name}\" shadows a builtin function"
            )));
        }
        let mut compiler = Compiler::new(text, cache, scope, self, params);
        let body = compiler.compile(&parse_expression(text)?)?;
        let function = UserFunction {
            name: name.to_owned(),
            params: params.to_vec(),
            text: text.to_owned(),
            body,
            symbols: compiler.symbols,
            random: compiler.random,
            slots: compiler.slots,
        };
        self.functions.insert(name.to_owned(), Arc::new(function));
        Ok(())
    }

    /// A function by name.
    pub fn get(&self, name: &str) -> Option<&Arc<UserFunction>> {
        self.functions.get(name)
    }

    /// Number of defined functions.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Is the table empty?
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Names of all user functions called by an expression.
pub fn called_functions(expr: &RawExpr) -> BTreeSet<String> {
    fn collect(expr: &RawExpr, out: &mut BTreeSet<String>) {
        match expr {
            RawExpr::Number(_) | RawExpr::Symbol(_) => (),
            RawExpr::Unary(_, x) => collect(x, out),
            RawExpr::Binary(_, a, b) => {
                collect(a, out);
                collect(b, out);
            }
            RawExpr::Call(name, args) => {
                if name != "if"
                    && Builtin::from_name(name).is_none()
                    && RandomFunc::from_name(name).is_none()
                {
                    out.insert(name.clone());
                }
                args.iter().for_each(|arg| collect(arg, out));
            }
            RawExpr::Conditional(c, a, b) => {
                collect(c, out);
                collect(a, out);
                collect(b, out);
            }
        }
    }
    let mut out = BTreeSet::new();
    collect(expr, &mut out);
    out
}

fn constant(name: &str) -> Option<f64> {
    match name {
        "pi" | "_pi" | "M_PI" => Some(std::f64::consts::PI),
        "_e" => Some(std::f64::consts::E),
        _ => None,
    }
}

struct Compiler<'a> {
    text: &'a str,
    cache: &'a mut EvaluatorCache,
    scope: &'a dyn Scope,
    functions: &'a FunctionTable,
    params: &'a [String],
    symbols: BTreeSet<String>,
    random: BTreeSet<RandomFunc>,
    slots: BTreeSet<usize>,
    called: BTreeSet<String>,
}

impl<'a> Compiler<'a> {
    fn new(
        text: &'a str,
        cache: &'a mut EvaluatorCache,
        scope: &'a dyn Scope,
        functions: &'a FunctionTable,
        params: &'a [String],
    ) -> Self {
        Self {
            text,
            cache,
            scope,
            functions,
            params,
            symbols: BTreeSet::new(),
            random: BTreeSet::new(),
            slots: BTreeSet::new(),
            called: BTreeSet::new(),
        }
    }

    fn error(&self, msg: String) -> ParseError {
        ParseError(format!("{msg} in expression \"{}\"", self.text))
    }

    fn resolve(&mut self, name: &str) -> Result<Node, ParseError> {
        if let Some(index) = self.params.iter().position(|p| p == name) {
            return Ok(Node::Param(index));
        }
        let slot = match self.cache.slot(name) {
            Some(slot) => Some(slot),
            None => self
                .scope
                .lookup(name)
                .map(|info| self.cache.add_external(info)),
        };
        match (slot, constant(name)) {
            (Some(slot), _) => {
                self.symbols.insert(name.to_owned());
                self.slots.insert(slot);
                Ok(Node::Slot(slot))
            }
            (None, Some(value)) => Ok(Node::Const(value)),
            (None, None) => Err(self.error(format!("unknown symbol \"{name}\""))),
        }
    }

    fn compile(&mut self, expr: &RawExpr) -> Result<Node, ParseError> {
        let functions = self.functions;
        Ok(match expr {
            RawExpr::Number(value) => Node::Const(*value),
            RawExpr::Symbol(name) => self.resolve(name)?,
            RawExpr::Unary(op, x) => Node::Unary(*op, Box::new(self.compile(x)?)),
            RawExpr::Binary(op, a, b) => Node::Binary(
                *op,
                Box::new(self.compile(a)?),
                Box::new(self.compile(b)?),
            ),
            RawExpr::Conditional(c, a, b) => Node::Conditional(
                Box::new(self.compile(c)?),
                Box::new(self.compile(a)?),
                Box::new(self.compile(b)?),
            ),
            RawExpr::Call(name, args) => {
                let mut nodes = args
                    .iter()
                    .map(|arg| self.compile(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                let n = nodes.len();
                let arity_error = |compiler: &Self, expected: Arity| {
                    compiler.error(format!(
                        "function \"{name}\" called with {n} arguments (expected {expected:?})"
                    ))
                };
                if name == "if" {
                    if n != 3 {
                        return Err(arity_error(self, Arity::Exact(3)));
                    }
                    let b = nodes.pop();
                    let a = nodes.pop();
                    let c = nodes.pop();
                    match (c, a, b) {
                        (Some(c), Some(a), Some(b)) => {
                            Node::Conditional(Box::new(c), Box::new(a), Box::new(b))
                        }
                        _ => return Err(arity_error(self, Arity::Exact(3))),
                    }
                } else if let Some(builtin) = Builtin::from_name(name) {
                    if !builtin.arity().accepts(n) {
                        return Err(arity_error(self, builtin.arity()));
                    }
                    Node::Builtin(builtin, nodes)
                } else if let Some(random) = RandomFunc::from_name(name) {
                    if !random.arity().accepts(n) {
                        return Err(arity_error(self, random.arity()));
                    }
                    self.random.insert(random);
                    Node::Random(random, nodes)
                } else if let Some(function) = functions.get(name) {
                    if function.params.len() != n {
                        return Err(arity_error(self, Arity::Exact(function.params.len())));
                    }
                    self.called.insert(name.clone());
                    self.symbols.extend(function.symbols.iter().cloned());
                    self.random.extend(function.random.iter().copied());
                    self.slots.extend(function.slots.iter().copied());
                    Node::Function(function.clone(), nodes)
                } else {
                    return Err(self.error(format!("unknown function \"{name}\"")));
                }
            }
        })
    }
}

/// A compiled expression bound to the slots of one [EvaluatorCache].
///
/// ```
/// # use cellpotts_core::*;
/// # use cellpotts_concepts::SymbolFocus;
/// let mut store = SymbolStore::new();
/// store.add_constant("k", 2.0);
/// let mut cache = EvaluatorCache::new(0);
/// let x = cache.add_local("x", 0.0);
/// let expr = Expression::compile("k * x + max(x, 1)", &mut cache, &store, &FunctionTable::new())?;
/// cache.fetch(&store, &SymbolFocus::Global)?;
/// cache.set(x, 3.0);
/// assert_eq!(expr.eval(&mut cache), 9.0);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone, Debug)]
pub struct Expression {
    text: String,
    root: Node,
    symbols: BTreeSet<String>,
    random: BTreeSet<RandomFunc>,
    functions: BTreeSet<String>,
    slots: Vec<usize>,
}

impl Expression {
    /// Parse `text` and resolve all its symbols.
    ///
    /// Symbols are taken from the locals of the cache first. Unknown names are looked up
    /// in `scope` and registered as external slots of the cache.
    pub fn compile(
        text: &str,
        cache: &mut EvaluatorCache,
        scope: &dyn Scope,
        functions: &FunctionTable,
    ) -> Result<Self, ParseError> {
        let raw = parse_expression(text)?;
        let mut compiler = Compiler::new(text, cache, scope, functions, &[]);
        let root = compiler.compile(&raw)?;
        Ok(Self {
            text: text.to_owned(),
            root,
            symbols: compiler.symbols,
            random: compiler.random,
            functions: compiler.called,
            slots: compiler.slots.into_iter().collect(),
        })
    }

    /// Source text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// All symbols the expression depends on, including those used by called functions.
    pub fn symbols(&self) -> &BTreeSet<String> {
        &self.symbols
    }

    /// All random functions used, including those used by called functions.
    pub fn random_functions(&self) -> &BTreeSet<RandomFunc> {
        &self.random
    }

    /// User functions called directly by the expression.
    pub fn functions(&self) -> &BTreeSet<String> {
        &self.functions
    }

    /// Is the value constant apart from random functions?
    pub fn is_constant(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Evaluate with the current values of the cache.
    pub fn eval(&self, cache: &mut EvaluatorCache) -> f64 {
        self.root.eval(cache, &[])
    }

    /// Human readable `name=value` list of all slots the expression reads.
    pub fn bindings(&self, cache: &EvaluatorCache) -> String {
        cache.bindings(&self.slots)
    }
}
