//! Compilation and parallel evaluation of systems of equations.
//!
//! A [System] is built once from a [SystemDescription]. Building classifies all
//! declarations, resolves their symbols against a [Scope], sorts the intermediates by
//! their dependencies and compiles everything into one prototype [SystemSolver].
//! Worker threads evaluate clones of this prototype.
mod event;
mod func;
mod solver;

pub use event::*;
pub use func::*;
pub use solver::{SystemSolver, MIN_TIME_STEP, TINY};

use crate::*;
use cellpotts_concepts::*;
use itertools::Itertools;
use rayon::prelude::*;
use solver::SolverArena;

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Above this number of foci, [System::compute_context_to_buffer] runs in parallel.
pub const PARALLEL_THRESHOLD: usize = 50;

/// A cache slot written back to a symbol of the scope.
#[derive(Clone, Debug)]
pub(crate) struct Output {
    pub slot: usize,
    pub target: SymbolInfo,
}

/// Immutable parts of a compiled system shared by all its solvers.
#[derive(Debug)]
pub(crate) struct SystemTemplate {
    pub intermediates: Vec<SystemFunc>,
    pub odes: Vec<SystemFunc>,
    pub rules: Vec<SystemFunc>,
    pub equations: Vec<SystemFunc>,
    pub outputs: Vec<Output>,
    pub time_slot: usize,
    pub noise_slot: usize,
    pub seed: u64,
}

struct Pending {
    kind: SystemFuncKind,
    symbol: String,
    texts: Vec<String>,
    slots: Vec<usize>,
    spherical: bool,
}

struct Builder<'a> {
    scope: &'a dyn Scope,
    method: SolverMethod,
    cache: EvaluatorCache,
    functions: FunctionTable,
    defined: HashSet<String>,
    pending: Vec<Pending>,
    outputs: Vec<Output>,
}

fn components(symbol: &str) -> [String; 3] {
    ["x", "y", "z"].map(|c| format!("{symbol}.{c}"))
}

fn split_vector(symbol: &str, text: &str) -> Result<Vec<String>, ConfigError> {
    let parts = split_components(text)?;
    match parts.len() {
        3 => Ok(parts.into_iter().map(|p| p.trim().to_owned()).collect()),
        n => Err(ConfigError(format!(
            "vector \"{symbol}\" needs three components but \"{text}\" has {n}"
        ))),
    }
}

impl<'a> Builder<'a> {
    fn new(scope: &'a dyn Scope, method: SolverMethod, seed: u64) -> Self {
        Self {
            scope,
            method,
            cache: EvaluatorCache::new(seed),
            functions: FunctionTable::new(),
            defined: HashSet::new(),
            pending: Vec::new(),
            outputs: Vec::new(),
        }
    }

    fn claim(&mut self, name: &str) -> Result<(), ConfigError> {
        match self.defined.insert(name.to_owned()) {
            true => Ok(()),
            false => Err(ConfigError(format!("symbol \"{name}\" is defined twice"))),
        }
    }

    fn local(&mut self, name: &str) -> Result<usize, ConfigError> {
        self.claim(name)?;
        Ok(self.cache.add_local(name, 0.0))
    }

    /// Resolve an assigned symbol and give it a slot.
    fn target(&mut self, name: &str, kind: SystemFuncKind) -> Result<usize, ConfigError> {
        self.claim(name)?;
        let info = self
            .scope
            .lookup(name)
            .ok_or_else(|| ConfigError(format!("unknown target symbol \"{name}\"")))?;
        if !info.writable {
            return Err(ConfigError(format!("target symbol \"{name}\" is read-only")));
        }
        // The delayed value stays readable under its own name
        let slot = match kind == SystemFuncKind::Eqn && info.delayed {
            true => self.cache.add_local(&format!("{name}'"), 0.0),
            false => self.cache.add_local(name, 0.0),
        };
        self.outputs.push(Output { slot, target: info });
        Ok(slot)
    }

    fn push(&mut self, kind: SystemFuncKind, symbol: &str, texts: Vec<String>, slots: Vec<usize>, spherical: bool) {
        self.pending.push(Pending {
            kind,
            symbol: symbol.to_owned(),
            texts,
            slots,
            spherical,
        });
    }

    fn classify(&mut self, declarations: &[Declaration]) -> Result<Vec<(String, Vec<String>, String)>, ConfigError> {
        let mut functions = Vec::new();
        for declaration in declarations {
            match declaration {
                Declaration::Intermediate { symbol, expression } => {
                    let slot = self.local(symbol)?;
                    self.push(SystemFuncKind::VarInit, symbol, vec![expression.clone()], vec![slot], false);
                }
                Declaration::IntermediateVector {
                    symbol,
                    expression,
                    spherical,
                } => {
                    let texts = split_vector(symbol, expression)?;
                    let slots = components(symbol)
                        .iter()
                        .map(|name| self.local(name))
                        .collect::<Result<Vec<_>, _>>()?;
                    self.push(SystemFuncKind::VarInit, symbol, texts, slots, *spherical);
                }
                Declaration::Function {
                    symbol,
                    parameters,
                    expression,
                } => {
                    self.claim(symbol)?;
                    functions.push((symbol.clone(), parameters.clone(), expression.clone()));
                }
                Declaration::DiffEqn { symbol, expression } => {
                    let slot = self.target(symbol, SystemFuncKind::Ode)?;
                    self.push(SystemFuncKind::Ode, symbol, vec![expression.clone()], vec![slot], false);
                }
                Declaration::VectorDiffEqn { symbol, .. } => {
                    return Err(ConfigError(format!(
                        "vector differential equation for \"{symbol}\" is not supported"
                    )))
                }
                Declaration::Rule { symbol, expression } => {
                    let slot = self.target(symbol, SystemFuncKind::Rule)?;
                    self.push(SystemFuncKind::Rule, symbol, vec![expression.clone()], vec![slot], false);
                }
                Declaration::VectorRule {
                    symbol,
                    expression,
                    spherical,
                } => {
                    let texts = split_vector(symbol, expression)?;
                    let slots = components(symbol)
                        .iter()
                        .map(|name| self.target(name, SystemFuncKind::Rule))
                        .collect::<Result<Vec<_>, _>>()?;
                    self.push(SystemFuncKind::Rule, symbol, texts, slots, *spherical);
                }
                Declaration::Equation { symbol, expression } => {
                    let slot = self.target(symbol, SystemFuncKind::Eqn)?;
                    self.push(SystemFuncKind::Eqn, symbol, vec![expression.clone()], vec![slot], false);
                }
            }
        }
        Ok(functions)
    }

    fn granularity(&self) -> Result<Granularity, ConfigError> {
        let granularities: BTreeSet<_> = self.outputs.iter().map(|o| o.target.granularity).collect();
        match granularities.len() {
            0 | 1 => Ok(granularities.into_iter().next().unwrap_or(Granularity::Global)),
            _ => Err(ConfigError(format!(
                "outputs of one system must share their granularity: {}",
                self.outputs
                    .iter()
                    .map(|o| format!("{} ({:?})", o.target.name, o.target.granularity))
                    .join(", ")
            ))),
        }
    }

    /// Define functions such that every function is defined after all functions it calls.
    fn define_functions(&mut self, mut functions: Vec<(String, Vec<String>, String)>) -> Result<(), ConfigError> {
        let names: BTreeSet<String> = functions.iter().map(|f| f.0.clone()).collect();
        let mut calls = Vec::with_capacity(functions.len());
        for (_, _, text) in functions.iter() {
            let called = called_functions(&parse_expression(text)?);
            calls.push(called.into_iter().filter(|c| names.contains(c)).collect::<BTreeSet<_>>());
        }
        while !functions.is_empty() {
            let next = calls
                .iter()
                .position(|called| called.iter().all(|c| self.functions.get(c).is_some()));
            let Some(index) = next else {
                return Err(ConfigError(format!(
                    "recursive function definitions: {}",
                    functions.iter().map(|f| f.0.as_str()).join(", ")
                )));
            };
            let (name, parameters, text) = functions.remove(index);
            calls.remove(index);
            self.functions
                .define(&name, &parameters, &text, &mut self.cache, self.scope)?;
        }
        Ok(())
    }

    fn compile(&mut self, text: &str) -> Result<Expression, ConfigError> {
        Ok(Expression::compile(text, &mut self.cache, self.scope, &self.functions)?)
    }

    /// Differential equations may only draw normal distributed noise, which is rescaled
    /// with the step size under the Euler-Maruyama scheme.
    fn compile_ode(&mut self, symbol: &str, text: &str) -> Result<Expression, ConfigError> {
        let expression = self.compile(text)?;
        let random = expression.random_functions();
        if let Some(f) = random.iter().find(|f| **f != RandomFunc::Norm) {
            return Err(ConfigError(format!(
                "random function {} is not allowed in the differential equation for \"{symbol}\"",
                f.name()
            )));
        }
        if random.is_empty() {
            return Ok(expression);
        }
        if self.method != SolverMethod::Euler {
            return Err(ConfigError(format!(
                "stochastic differential equation for \"{symbol}\" requires the \
                Euler-Maruyama solver, not {}",
                self.method.name()
            )));
        }
        match inject_noise_scaling(text)? {
            Some(scaled) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("rescaling noise of \"{symbol}\": {scaled}");
                self.compile(&scaled)
            }
            None => Err(ConfigError(format!(
                "noise of \"{symbol}\" must be drawn directly in its differential equation"
            ))),
        }
    }

    fn compile_pending(&mut self) -> Result<Vec<SystemFunc>, ConfigError> {
        let pending = std::mem::take(&mut self.pending);
        let mut funcs = Vec::with_capacity(pending.len());
        for p in pending {
            let expressions = match p.kind {
                SystemFuncKind::Ode => vec![self.compile_ode(&p.symbol, &p.texts[0])?],
                _ => p
                    .texts
                    .iter()
                    .map(|t| self.compile(t))
                    .collect::<Result<Vec<_>, _>>()?,
            };
            funcs.push(SystemFunc::new(p.kind, &p.symbol, expressions, p.slots, p.spherical));
        }
        Ok(funcs)
    }

    fn check_inputs(&self, granularity: Granularity) -> Result<(), ConfigError> {
        match self.cache.externals().find(|info| info.granularity > granularity) {
            Some(info) => Err(ConfigError(format!(
                "symbol \"{}\" ({:?}) can not be read by a system of granularity {:?}",
                info.name, info.granularity, granularity
            ))),
            None => Ok(()),
        }
    }
}

/// Orders intermediates such that every intermediate is computed after all intermediates
/// it depends on.
fn sort_intermediates(intermediates: Vec<SystemFunc>, cache: &EvaluatorCache) -> Result<Vec<SystemFunc>, ConfigError> {
    let defines = |func: &SystemFunc| -> Vec<String> {
        func.slots().iter().map(|s| cache.name(*s).to_owned()).collect()
    };
    let mut unresolved: BTreeSet<String> = intermediates.iter().flat_map(defines).collect();
    let mut remaining = intermediates;
    let mut sorted = Vec::with_capacity(remaining.len());
    while !remaining.is_empty() {
        let next = remaining.iter().position(|func| {
            func.expressions()
                .iter()
                .all(|e| e.symbols().iter().all(|s| !unresolved.contains(s)))
        });
        let Some(index) = next else {
            return Err(ConfigError(format!(
                "cyclic dependency between intermediates: {}",
                remaining
                    .iter()
                    .map(|f| {
                        let texts = f.expressions().iter().map(|e| e.text()).join(", ");
                        format!("{} = {}", f.symbol(), texts)
                    })
                    .join("; ")
            )));
        };
        let func = remaining.remove(index);
        for name in defines(&func) {
            unresolved.remove(&name);
        }
        sorted.push(func);
    }
    Ok(sorted)
}

/// A compiled set of declarations evaluated at every focus of its granularity.
///
/// ```
/// # use cellpotts_core::*;
/// # use cellpotts_concepts::*;
/// let mut store = SymbolStore::new();
/// store.add_variable("y", 1.0);
/// let description = SystemDescription::new(
///     SystemKind::Continuous,
///     SolverSpec::new(SolverMethod::Euler, 0.5),
/// )
/// .with(Declaration::DiffEqn { symbol: "y".into(), expression: "-y".into() });
/// let system = System::new(&description, &store)?;
/// system.compute(&mut store, &SymbolFocus::Global)?;
/// assert_eq!(store.value("y", &SymbolFocus::Global)?, 0.5);
/// # Ok::<(), SystemError>(())
/// ```
#[derive(Debug)]
pub struct System {
    kind: SystemKind,
    granularity: Granularity,
    template: Arc<SystemTemplate>,
    arena: SolverArena,
    parallel_passes: AtomicU64,
    depend_symbols: BTreeSet<String>,
    output_symbols: Vec<SymbolInfo>,
}

impl System {
    /// Compile a description against the symbols of `scope`.
    pub fn new(description: &SystemDescription, scope: &dyn Scope) -> Result<Self, ConfigError> {
        Self::with_granularity(description, scope, Granularity::Global)
    }

    /// Compile a description which is evaluated at foci of at least the given granularity.
    ///
    /// Inputs may be as fine as the foci, even if the outputs are coarser.
    #[cfg_attr(feature = "tracing", instrument(skip_all))]
    pub fn with_granularity(
        description: &SystemDescription,
        scope: &dyn Scope,
        granularity: Granularity,
    ) -> Result<Self, ConfigError> {
        let method = description.method();
        let mut spec = description.solver.clone();
        spec.method = method;
        let mut builder = Builder::new(scope, method, description.seed);
        let time_slot = builder.cache.add_local(TIME_SYMBOL, 0.0);
        let noise_slot = builder.cache.add_local(NOISE_SCALING_SYMBOL, 1.0);
        builder.claim(TIME_SYMBOL)?;
        builder.claim(NOISE_SCALING_SYMBOL)?;

        let functions = builder.classify(&description.declarations)?;
        let granularity = builder.granularity()?.max(granularity);
        builder.define_functions(functions)?;
        let funcs = builder.compile_pending()?;
        builder.check_inputs(granularity)?;

        let mut intermediates = Vec::new();
        let mut odes = Vec::new();
        let mut rules = Vec::new();
        let mut equations = Vec::new();
        for func in funcs {
            match func.kind() {
                SystemFuncKind::VarInit => intermediates.push(func),
                SystemFuncKind::Ode => odes.push(func),
                SystemFuncKind::Rule => rules.push(func),
                SystemFuncKind::Eqn => equations.push(func),
            }
        }
        if !odes.is_empty() && method != SolverMethod::Discrete && !(spec.time_step > 0.0) {
            return Err(ConfigError(format!(
                "differential equations need a positive time step, got {}",
                spec.time_step
            )));
        }

        #[cfg(feature = "tracing")]
        let declared: Vec<String> = intermediates.iter().map(|f| f.symbol().to_owned()).collect();
        let intermediates = sort_intermediates(intermediates, &builder.cache)?;
        #[cfg(feature = "tracing")]
        {
            let order: Vec<&str> = intermediates.iter().map(|f| f.symbol()).collect();
            if order != declared {
                tracing::info!("reordered intermediates to {}", order.join(", "));
            }
        }

        let depend_symbols = builder
            .cache
            .externals()
            .map(|info| info.name.clone())
            .filter(|name| name != TIME_SYMBOL)
            .collect();
        let output_symbols = builder.outputs.iter().map(|o| o.target.clone()).collect();
        let template = Arc::new(SystemTemplate {
            intermediates,
            odes,
            rules,
            equations,
            outputs: builder.outputs,
            time_slot,
            noise_slot,
            seed: description.seed,
        });
        let prototype = SystemSolver::new(Arc::clone(&template), builder.cache, spec);
        Ok(Self {
            kind: description.kind,
            granularity,
            template,
            arena: SolverArena::new(prototype),
            parallel_passes: AtomicU64::new(0),
            depend_symbols,
            output_symbols,
        })
    }

    /// Scheduling of the system.
    pub fn kind(&self) -> SystemKind {
        self.kind
    }

    /// Granularity of all outputs and of the foci the system is evaluated at.
    pub fn target_granularity(&self) -> Granularity {
        self.granularity
    }

    /// Symbols of the scope read by the system, excluding the time.
    pub fn depend_symbols(&self) -> &BTreeSet<String> {
        &self.depend_symbols
    }

    /// Symbols of the scope written by the system in declaration order.
    pub fn output_symbols(&self) -> &[SymbolInfo] {
        &self.output_symbols
    }

    /// Intermediates in evaluation order.
    pub fn intermediates(&self) -> impl Iterator<Item = &str> {
        self.template.intermediates.iter().map(|f| f.symbol())
    }

    /// Numerical settings.
    pub fn solver_spec(&self) -> &SolverSpec {
        self.arena.prototype().spec()
    }

    /// Does the solver control its step size?
    pub fn adaptive(&self) -> bool {
        self.solver_spec().method.is_adaptive()
    }

    /// Change the step of all solvers. Existing per-thread solvers are discarded.
    pub fn set_time_step(&mut self, time_step: f64) {
        self.arena.update(|solver| solver.set_time_step(time_step));
    }

    /// Evaluate at one focus and write the results to their live values.
    #[cfg_attr(feature = "tracing", instrument(skip_all))]
    pub fn compute<S: ScopeMut>(&self, scope: &mut S, focus: &SymbolFocus) -> Result<(), SystemError> {
        self.arena.with_solver(|solver| {
            solver.fetch_symbols(&*scope, focus)?;
            solver.solve()?;
            solver.write_symbols(scope, focus)?;
            Ok(())
        })
    }

    /// Evaluate at one focus and write the results to the buffers of the outputs.
    pub fn compute_to_buffer<S: ScopeMut>(&self, scope: &mut S, focus: &SymbolFocus) -> Result<(), SystemError> {
        self.arena.with_solver(|solver| {
            solver.fetch_symbols(&*scope, focus)?;
            solver.solve()?;
            solver.write_symbols_to_buffer(scope, focus)?;
            Ok(())
        })
    }

    /// Evaluate at one focus and replace the content of `buffer` by the outputs in
    /// declaration order.
    pub fn compute_to_target<S: Scope>(
        &self,
        scope: &S,
        focus: &SymbolFocus,
        buffer: &mut Vec<f64>,
    ) -> Result<(), SystemError> {
        self.arena.with_solver(|solver| {
            solver.fetch_symbols(scope, focus)?;
            solver.solve()?;
            buffer.clear();
            solver.write_symbols_to_ext_buffer(buffer);
            Ok(())
        })
    }

    /// Move all buffered outputs into their live values.
    pub fn apply_buffer<S: ScopeMut>(&self, scope: &mut S) -> Result<(), SystemError> {
        for output in self.template.outputs.iter() {
            scope.apply_buffer(output.target.id)?;
        }
        Ok(())
    }

    /// Write values produced by [System::compute_to_target] at `focus`.
    pub fn apply_ext_buffer<S: ScopeMut>(
        &self,
        scope: &mut S,
        focus: &SymbolFocus,
        buffer: &[f64],
    ) -> Result<(), SystemError> {
        if buffer.len() != self.template.outputs.len() {
            return Err(IndexError(format!(
                "expected {} values but got {}",
                self.template.outputs.len(),
                buffer.len()
            ))
            .into());
        }
        for (output, value) in self.template.outputs.iter().zip(buffer) {
            scope.set(output.target.id, focus, *value)?;
        }
        Ok(())
    }

    /// Evaluate at every focus of the target granularity and write to the buffers.
    ///
    /// All foci observe the values from before this pass. Large passes are distributed
    /// over the rayon thread pool. Their random functions draw from a stream per focus
    /// and pass, thus results do not depend on the number of threads.
    #[cfg_attr(feature = "tracing", instrument(skip_all))]
    pub fn compute_context_to_buffer<S: ScopeMut>(&self, scope: &mut S) -> Result<(), SystemError> {
        let foci = scope.foci(self.granularity);
        if foci.len() <= PARALLEL_THRESHOLD {
            for focus in foci.iter() {
                self.compute_to_buffer(scope, focus)?;
            }
            return Ok(());
        }
        let shared: &S = scope;
        let n_outputs = self.template.outputs.len();
        let pass = self.parallel_passes.fetch_add(1, Ordering::Relaxed);
        let buffers = foci
            .par_iter()
            .map(|focus| {
                let mut buffer = Vec::with_capacity(n_outputs);
                self.arena.with_solver(|solver| {
                    solver.reseed_for(pass, focus);
                    solver.fetch_symbols(shared, focus)?;
                    solver.solve()?;
                    solver.write_symbols_to_ext_buffer(&mut buffer);
                    Ok::<(), SystemError>(())
                })?;
                Ok(buffer)
            })
            .collect::<Result<Vec<_>, SystemError>>()?;
        for (focus, buffer) in foci.iter().zip(buffers) {
            for (output, value) in self.template.outputs.iter().zip(buffer) {
                scope.set_buffer(output.target.id, focus, value)?;
            }
        }
        Ok(())
    }

    /// Publish the results of [System::compute_context_to_buffer].
    pub fn apply_context_buffer<S: ScopeMut>(&self, scope: &mut S) -> Result<(), SystemError> {
        self.apply_buffer(scope)
    }

    /// Evaluate at every focus and publish all results at once.
    pub fn execute_time_step<S: ScopeMut>(&self, scope: &mut S) -> Result<(), SystemError> {
        self.compute_context_to_buffer(scope)?;
        self.apply_context_buffer(scope)
    }
}
