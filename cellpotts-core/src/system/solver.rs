use super::SystemTemplate;
use crate::{EvaluatorCache, SolverMethod, SolverSpec};
use cellpotts_concepts::*;

use std::sync::{Arc, Mutex, OnceLock, PoisonError};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Added to the magnitude of a state when scaling its error estimate.
pub const TINY: f64 = 1e-15;

/// Smallest sub-step an adaptive method may take.
pub const MIN_TIME_STEP: f64 = 1e-30;

const SAFETY: f64 = 0.9;
const SHRINK_EXPONENT: f64 = -0.25;
const GROW_EXPONENT: f64 = -0.2;
const GROW_THRESHOLD: f64 = 0.75;
const MAX_SHRINK: f64 = 0.1;
const REMAINDER_TOLERANCE: f64 = 1e-12;

/// Butcher tableau of an explicit Runge-Kutta method.
///
/// Embedded pairs carry the weights `b_low` of the lower order solution, which are only
/// used for the error estimate. Fixed step methods leave them empty.
#[derive(Debug)]
pub(crate) struct Tableau {
    a: &'static [&'static [f64]],
    b: &'static [f64],
    b_low: &'static [f64],
    c: &'static [f64],
}

impl Tableau {
    fn stages(&self) -> usize {
        self.b.len()
    }
}

const EULER: Tableau = Tableau {
    a: &[&[]],
    b: &[1.0],
    b_low: &[],
    c: &[0.0],
};

const HEUN: Tableau = Tableau {
    a: &[&[], &[1.0]],
    b: &[0.5, 0.5],
    b_low: &[],
    c: &[0.0, 1.0],
};

const RUNGE_KUTTA_4: Tableau = Tableau {
    a: &[&[], &[0.5], &[0.0, 0.5], &[0.0, 0.0, 1.0]],
    b: &[1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0],
    b_low: &[],
    c: &[0.0, 0.5, 0.5, 1.0],
};

const RUNGE_KUTTA_38: Tableau = Tableau {
    a: &[&[], &[1.0 / 3.0], &[-1.0 / 3.0, 1.0], &[1.0, -1.0, 1.0]],
    b: &[1.0 / 8.0, 3.0 / 8.0, 3.0 / 8.0, 1.0 / 8.0],
    b_low: &[],
    c: &[0.0, 1.0 / 3.0, 2.0 / 3.0, 1.0],
};

const BOGACKI_SHAMPINE: Tableau = Tableau {
    a: &[&[], &[0.5], &[0.0, 0.75], &[2.0 / 9.0, 1.0 / 3.0, 4.0 / 9.0]],
    b: &[2.0 / 9.0, 1.0 / 3.0, 4.0 / 9.0, 0.0],
    b_low: &[7.0 / 24.0, 1.0 / 4.0, 1.0 / 3.0, 1.0 / 8.0],
    c: &[0.0, 0.5, 0.75, 1.0],
};

const CASH_KARP: Tableau = Tableau {
    a: &[
        &[],
        &[1.0 / 5.0],
        &[3.0 / 40.0, 9.0 / 40.0],
        &[3.0 / 10.0, -9.0 / 10.0, 6.0 / 5.0],
        &[-11.0 / 54.0, 5.0 / 2.0, -70.0 / 27.0, 35.0 / 27.0],
        &[
            1631.0 / 55296.0,
            175.0 / 512.0,
            575.0 / 13824.0,
            44275.0 / 110592.0,
            253.0 / 4096.0,
        ],
    ],
    b: &[
        37.0 / 378.0,
        0.0,
        250.0 / 621.0,
        125.0 / 594.0,
        0.0,
        512.0 / 1771.0,
    ],
    b_low: &[
        2825.0 / 27648.0,
        0.0,
        18575.0 / 48384.0,
        13525.0 / 55296.0,
        277.0 / 14336.0,
        1.0 / 4.0,
    ],
    c: &[0.0, 1.0 / 5.0, 3.0 / 10.0, 3.0 / 5.0, 1.0, 7.0 / 8.0],
};

const DORMAND_PRINCE: Tableau = Tableau {
    a: &[
        &[],
        &[1.0 / 5.0],
        &[3.0 / 40.0, 9.0 / 40.0],
        &[44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0],
        &[
            19372.0 / 6561.0,
            -25360.0 / 2187.0,
            64448.0 / 6561.0,
            -212.0 / 729.0,
        ],
        &[
            9017.0 / 3168.0,
            -355.0 / 33.0,
            46732.0 / 5247.0,
            49.0 / 176.0,
            -5103.0 / 18656.0,
        ],
        &[
            35.0 / 384.0,
            0.0,
            500.0 / 1113.0,
            125.0 / 192.0,
            -2187.0 / 6784.0,
            11.0 / 84.0,
        ],
    ],
    b: &[
        35.0 / 384.0,
        0.0,
        500.0 / 1113.0,
        125.0 / 192.0,
        -2187.0 / 6784.0,
        11.0 / 84.0,
        0.0,
    ],
    b_low: &[
        5179.0 / 57600.0,
        0.0,
        7571.0 / 16695.0,
        393.0 / 640.0,
        -92097.0 / 339200.0,
        187.0 / 2100.0,
        1.0 / 40.0,
    ],
    c: &[0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0],
};

const MAX_STAGES: usize = 7;

fn tableau(method: SolverMethod) -> Option<&'static Tableau> {
    match method {
        SolverMethod::Euler => Some(&EULER),
        SolverMethod::Heun => Some(&HEUN),
        SolverMethod::RungeKutta4 => Some(&RUNGE_KUTTA_4),
        SolverMethod::RungeKutta38 => Some(&RUNGE_KUTTA_38),
        SolverMethod::BogackiShampine => Some(&BOGACKI_SHAMPINE),
        SolverMethod::CashKarp => Some(&CASH_KARP),
        SolverMethod::DormandPrince => Some(&DORMAND_PRINCE),
        SolverMethod::Discrete => None,
    }
}

/// A right hand side which did not evaluate to a finite number.
#[derive(Debug)]
struct StageFailure(String);

/// Integrates the declarations of one [System](crate::System) at one focus.
///
/// A solver owns the [EvaluatorCache] all compiled expressions of the system read from.
/// One evaluation consists of [SystemSolver::fetch_symbols], [SystemSolver::solve] and one
/// of the write-back methods.
///
/// Every explicit method advances the state $y$ by
/// \\begin{equation}
///     y_{n+1} = y_n + h\sum_i b_i k_i,\qquad k_i = f\left(t_n + c_ih, y_n + h\sum_{j<i}a_{ij}k_j\right)
/// \\end{equation}
/// where intermediates and equations are recomputed before every stage.
#[derive(Clone, Debug)]
pub struct SystemSolver {
    template: Arc<SystemTemplate>,
    cache: EvaluatorCache,
    spec: SolverSpec,
    time_step: f64,
    local_time_step: f64,
    y0: Vec<f64>,
    k: [Vec<f64>; MAX_STAGES],
    dy: Vec<f64>,
    err: Vec<f64>,
}

impl SystemSolver {
    pub(crate) fn new(template: Arc<SystemTemplate>, cache: EvaluatorCache, spec: SolverSpec) -> Self {
        let n = template.odes.len();
        let mut solver = Self {
            template,
            cache,
            time_step: 0.0,
            local_time_step: 0.0,
            y0: vec![0.0; n],
            k: std::array::from_fn(|_| vec![0.0; n]),
            dy: vec![0.0; n],
            err: vec![0.0; n],
            spec,
        };
        solver.set_time_step(solver.spec.time_step);
        solver
    }

    /// Numerical settings.
    pub fn spec(&self) -> &SolverSpec {
        &self.spec
    }

    /// Step taken by [SystemSolver::solve] in units of the system clock.
    pub fn time_step(&self) -> f64 {
        self.time_step
    }

    /// Set the step in simulation time units. It is scaled by the time scaling of the spec.
    pub fn set_time_step(&mut self, time_step: f64) {
        self.spec.time_step = time_step;
        self.time_step = time_step * self.spec.time_scaling;
        self.local_time_step = self.time_step;
    }

    /// Local variables of the solver.
    pub fn cache(&self) -> &EvaluatorCache {
        &self.cache
    }

    /// Current value of a local variable.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.cache.slot(name).map(|slot| self.cache.get(slot))
    }

    pub(crate) fn clone_for_thread(&self, stream: u64) -> Self {
        let mut solver = self.clone();
        solver
            .cache
            .reseed(self.template.seed ^ stream.wrapping_mul(0x9E37_79B9_7F4A_7C15));
        solver
    }

    /// Restart the random functions from a stream unique to `pass` and `focus`.
    pub(crate) fn reseed_for(&mut self, pass: u64, focus: &SymbolFocus) {
        let key = match focus {
            SymbolFocus::Global => 0,
            SymbolFocus::Cell(cell) => *cell as u64 + 1,
            SymbolFocus::MembraneNode { cell, node } => {
                splitmix64(*cell as u64 + 1) ^ splitmix64((node[0] as u64) << 32 | node[1] as u64)
            }
        };
        let seed = splitmix64(self.template.seed ^ splitmix64(pass)) ^ splitmix64(key);
        self.cache.reseed(seed);
    }

    /// Read all inputs and the current values of the outputs at `focus`.
    pub fn fetch_symbols(&mut self, scope: &dyn Scope, focus: &SymbolFocus) -> Result<(), IndexError> {
        let template = Arc::clone(&self.template);
        self.cache.fetch(scope, focus)?;
        for output in template.outputs.iter() {
            self.cache.set(output.slot, scope.get(output.target.id, focus)?);
        }
        self.cache
            .set(template.time_slot, scope.time() * self.spec.time_scaling);
        self.update_local_vars(&template);
        Ok(())
    }

    /// Advance the state by one time step and evaluate the rules afterwards.
    #[cfg_attr(feature = "tracing", instrument(skip_all))]
    pub fn solve(&mut self) -> Result<(), IntegrationError> {
        let template = Arc::clone(&self.template);
        if !template.odes.is_empty() {
            if let Some(tableau) = tableau(self.spec.method) {
                if !(self.time_step > 0.0) {
                    return Err(IntegrationError(format!(
                        "invalid time step {} for differential equations",
                        self.time_step
                    )));
                }
                self.cache
                    .set(template.noise_slot, (1.0 / self.time_step).sqrt());
                match self.spec.method.is_adaptive() {
                    true => self.integrate_adaptive(&template, tableau)?,
                    false => self.integrate_fixed(&template, tableau)?,
                }
            }
        }
        self.discrete(&template)
    }

    fn update_local_vars(&mut self, template: &SystemTemplate) {
        for func in template.intermediates.iter() {
            func.assign(&mut self.cache);
        }
        for func in template.equations.iter() {
            func.assign(&mut self.cache);
        }
    }

    /// Compute all stages of one step of size `h`. The state is left untouched.
    fn stages(&mut self, template: &SystemTemplate, tableau: &Tableau, h: f64) -> Result<(), StageFailure> {
        let t0 = self.cache.get(template.time_slot);
        for (i, ode) in template.odes.iter().enumerate() {
            self.y0[i] = self.cache.get(ode.slots()[0]);
        }
        let result = self.eval_stages(template, tableau, h, t0);
        for (i, ode) in template.odes.iter().enumerate() {
            self.cache.set(ode.slots()[0], self.y0[i]);
        }
        self.cache.set(template.time_slot, t0);
        result
    }

    fn eval_stages(
        &mut self,
        template: &SystemTemplate,
        tableau: &Tableau,
        h: f64,
        t0: f64,
    ) -> Result<(), StageFailure> {
        for (j, a) in tableau.a.iter().enumerate() {
            if j > 0 {
                for (i, ode) in template.odes.iter().enumerate() {
                    let increment: f64 = a.iter().zip(self.k.iter()).map(|(a, k)| a * k[i]).sum();
                    self.cache.set(ode.slots()[0], self.y0[i] + h * increment);
                }
                self.cache.set(template.time_slot, t0 + tableau.c[j] * h);
                self.update_local_vars(template);
            }
            for (i, ode) in template.odes.iter().enumerate() {
                let rate = ode.expressions()[0].eval(&mut self.cache);
                if !rate.is_finite() {
                    return Err(StageFailure(format!(
                        "differential equation for \"{}\" evaluated to {rate}: {}",
                        ode.symbol(),
                        ode.diagnostic(&self.cache)
                    )));
                }
                self.k[j][i] = rate;
            }
        }
        for i in 0..template.odes.len() {
            let mut high = 0.0;
            let mut error = 0.0;
            for j in 0..tableau.stages() {
                high += tableau.b[j] * self.k[j][i];
                if let Some(low) = tableau.b_low.get(j) {
                    error += (tableau.b[j] - low) * self.k[j][i];
                }
            }
            self.dy[i] = h * high;
            self.err[i] = h * error;
        }
        Ok(())
    }

    fn commit(&mut self, template: &SystemTemplate, h: f64) {
        for (i, ode) in template.odes.iter().enumerate() {
            self.cache.set(ode.slots()[0], self.y0[i] + self.dy[i]);
        }
        let t = self.cache.get(template.time_slot);
        self.cache.set(template.time_slot, t + h);
        self.update_local_vars(template);
    }

    fn integrate_fixed(&mut self, template: &SystemTemplate, tableau: &Tableau) -> Result<(), IntegrationError> {
        let h = self.time_step;
        self.stages(template, tableau, h)
            .map_err(|StageFailure(message)| IntegrationError(message))?;
        self.commit(template, h);
        Ok(())
    }

    /// Largest error estimate relative to the tolerance. Non-finite states yield `NaN`.
    fn max_error(&self) -> f64 {
        let mut max_error: f64 = 0.0;
        for ((y0, dy), err) in self.y0.iter().zip(self.dy.iter()).zip(self.err.iter()) {
            let y = y0 + dy;
            let scaled = (err / (self.spec.epsilon * (y.abs() + TINY))).abs();
            if !y.is_finite() || !scaled.is_finite() {
                return f64::NAN;
            }
            max_error = max_error.max(scaled);
        }
        max_error
    }

    fn integrate_adaptive(
        &mut self,
        template: &SystemTemplate,
        tableau: &Tableau,
    ) -> Result<(), IntegrationError> {
        let total = self.time_step;
        let mut elapsed = 0.0;
        let mut h = match self.local_time_step > 0.0 {
            true => self.local_time_step.min(total),
            false => total,
        };
        loop {
            // Every attempt is clamped to the remaining interval
            h = h.min(total - elapsed);
            let (max_error, failure) = match self.stages(template, tableau, h) {
                Ok(()) => (self.max_error(), None),
                Err(StageFailure(message)) => (f64::NAN, Some(message)),
            };
            if max_error <= 1.0 {
                self.commit(template, h);
                elapsed += h;
                if elapsed >= total || total - elapsed <= REMAINDER_TOLERANCE * total {
                    break;
                }
                if max_error < GROW_THRESHOLD {
                    h = (SAFETY * h * max_error.powf(GROW_EXPONENT)).min(total);
                }
            } else {
                self.update_local_vars(template);
                let shrunk = match max_error.is_finite() {
                    true => (SAFETY * h * max_error.powf(SHRINK_EXPONENT)).max(MAX_SHRINK * h),
                    false => MAX_SHRINK * h,
                };
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    "rejected sub-step {h:e} with scaled error {max_error:e}, retrying with {shrunk:e}"
                );
                if shrunk < MIN_TIME_STEP {
                    let reason = failure.unwrap_or_else(|| format!("scaled error {max_error:e}"));
                    return Err(IntegrationError(format!(
                        "unable to integrate system, step size {shrunk:e} fell below \
                        {MIN_TIME_STEP:e}: {reason}"
                    )));
                }
                h = shrunk;
            }
        }
        self.local_time_step = h;
        Ok(())
    }

    /// Evaluate all rules first and assign them afterwards.
    fn discrete(&mut self, template: &SystemTemplate) -> Result<(), IntegrationError> {
        if template.rules.is_empty() {
            return Ok(());
        }
        let mut values = Vec::with_capacity(3 * template.rules.len());
        for rule in template.rules.iter() {
            let start = values.len();
            rule.evaluate(&mut self.cache, &mut values);
            if let Some(value) = values[start..].iter().find(|v| !v.is_finite()) {
                return Err(IntegrationError(format!(
                    "rule for \"{}\" evaluated to {value}: {}",
                    rule.symbol(),
                    rule.diagnostic(&self.cache)
                )));
            }
        }
        let mut values = values.into_iter();
        for rule in template.rules.iter() {
            for (slot, value) in rule.slots().iter().zip(values.by_ref()) {
                self.cache.set(*slot, value);
            }
        }
        Ok(())
    }

    /// Write all outputs to their live values.
    pub fn write_symbols<S: ScopeMut + ?Sized>(
        &self,
        scope: &mut S,
        focus: &SymbolFocus,
    ) -> Result<(), IndexError> {
        for output in self.template.outputs.iter() {
            scope.set(output.target.id, focus, self.cache.get(output.slot))?;
        }
        Ok(())
    }

    /// Write all outputs to their buffers.
    pub fn write_symbols_to_buffer<S: ScopeMut + ?Sized>(
        &self,
        scope: &mut S,
        focus: &SymbolFocus,
    ) -> Result<(), IndexError> {
        for output in self.template.outputs.iter() {
            scope.set_buffer(output.target.id, focus, self.cache.get(output.slot))?;
        }
        Ok(())
    }

    /// Append all outputs in declaration order to `buffer`.
    pub fn write_symbols_to_ext_buffer(&self, buffer: &mut Vec<f64>) {
        buffer.extend(
            self.template
                .outputs
                .iter()
                .map(|output| self.cache.get(output.slot)),
        );
    }
}

fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Lazily created solvers, one per worker thread of the rayon pool.
///
/// Slot `0` serves threads outside the pool. Worker `i` uses slot `i + 1` exclusively, so
/// the per-slot lock is never contended inside a parallel pass.
#[derive(Debug)]
pub(crate) struct SolverArena {
    prototype: SystemSolver,
    slots: Vec<OnceLock<Mutex<SystemSolver>>>,
}

impl SolverArena {
    pub(crate) fn new(prototype: SystemSolver) -> Self {
        let slots = (0..rayon::current_num_threads() + 1)
            .map(|_| OnceLock::new())
            .collect();
        Self { prototype, slots }
    }

    pub(crate) fn prototype(&self) -> &SystemSolver {
        &self.prototype
    }

    /// Change the prototype and drop all clones of the old one.
    pub(crate) fn update(&mut self, f: impl FnOnce(&mut SystemSolver)) {
        f(&mut self.prototype);
        for slot in self.slots.iter_mut() {
            slot.take();
        }
    }

    pub(crate) fn with_solver<R>(&self, f: impl FnOnce(&mut SystemSolver) -> R) -> R {
        let index = rayon::current_thread_index().map_or(0, |i| i + 1);
        let index = match index < self.slots.len() {
            true => index,
            false => 0,
        };
        let solver = self.slots[index].get_or_init(|| {
            #[cfg(feature = "tracing")]
            tracing::debug!("creating solver clone for slot {index}");
            Mutex::new(self.prototype.clone_for_thread(index as u64))
        });
        let mut solver = solver.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut solver)
    }
}
