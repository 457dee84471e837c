use crate::SystemError;
use cellpotts_concepts::ParseError;
use serde::{Deserialize, Serialize};

use std::path::Path;
use std::str::FromStr;

/// Integration method of a [SystemSolver](crate::SystemSolver).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SolverMethod {
    /// Explicit Euler, order 1. Integrates stochastic equations with the Euler-Maruyama
    /// scheme.
    Euler,
    /// Heun's method, order 2
    Heun,
    /// Classical Runge-Kutta, order 4
    RungeKutta4,
    /// Runge-Kutta 3/8 rule, order 4
    RungeKutta38,
    /// Embedded Bogacki-Shampine pair, order 3(2)
    BogackiShampine,
    /// Embedded Cash-Karp pair, order 5(4)
    #[default]
    CashKarp,
    /// Embedded Dormand-Prince pair, order 5(4)
    DormandPrince,
    /// No integration, only rules are evaluated
    Discrete,
}

impl SolverMethod {
    /// Does the method control its step size?
    pub fn is_adaptive(&self) -> bool {
        matches!(
            self,
            SolverMethod::BogackiShampine | SolverMethod::CashKarp | SolverMethod::DormandPrince
        )
    }

    /// Canonical name as used in model files.
    pub fn name(&self) -> &'static str {
        match self {
            SolverMethod::Euler => "euler",
            SolverMethod::Heun => "heun",
            SolverMethod::RungeKutta4 => "runge-kutta",
            SolverMethod::RungeKutta38 => "runge-kutta-3/8",
            SolverMethod::BogackiShampine => "bogacki-shampine",
            SolverMethod::CashKarp => "runge-kutta-adaptive",
            SolverMethod::DormandPrince => "runge-kutta-adaptiveDP",
            SolverMethod::Discrete => "discrete",
        }
    }
}

impl FromStr for SolverMethod {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        // Names are matched case-insensitively
        Ok(match name.to_lowercase().as_str() {
            "euler" | "euler-maruyama" | "1" => SolverMethod::Euler,
            "heun" | "2" => SolverMethod::Heun,
            "runge-kutta" | "fixed4" | "4" => SolverMethod::RungeKutta4,
            "runge-kutta-3/8" => SolverMethod::RungeKutta38,
            "adaptive23" | "bogacki-shampine" => SolverMethod::BogackiShampine,
            "runge-kutta-adaptive" | "adaptive45" | "45" | "runge-kutta-adaptiveck" => {
                SolverMethod::CashKarp
            }
            "runge-kutta-adaptivedp" | "adaptive45-dp" => SolverMethod::DormandPrince,
            "discrete" => SolverMethod::Discrete,
            _ => return Err(ParseError(format!("unknown solver method \"{name}\""))),
        })
    }
}

impl From<String> for SolverMethod {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_e: ParseError| {
            #[cfg(feature = "tracing")]
            tracing::warn!("{}, falling back to {}", _e, SolverMethod::CashKarp.name());
            SolverMethod::CashKarp
        })
    }
}

impl From<SolverMethod> for String {
    fn from(value: SolverMethod) -> Self {
        value.name().to_owned()
    }
}

fn default_time_step() -> f64 {
    1.0
}

fn default_time_scaling() -> f64 {
    1.0
}

fn default_epsilon() -> f64 {
    1e-4
}

/// Numerical settings of a [SystemSolver](crate::SystemSolver).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolverSpec {
    /// Integration method
    #[serde(default)]
    pub method: SolverMethod,
    /// Requested step in simulation time units
    #[serde(default = "default_time_step")]
    pub time_step: f64,
    /// Ratio between the clock of the system and the simulation clock
    #[serde(default = "default_time_scaling")]
    pub time_scaling: f64,
    /// Relative error tolerance of adaptive methods
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
}

impl Default for SolverSpec {
    fn default() -> Self {
        Self {
            method: SolverMethod::default(),
            time_step: default_time_step(),
            time_scaling: default_time_scaling(),
            epsilon: default_epsilon(),
        }
    }
}

impl SolverSpec {
    /// Solver settings with default scaling and tolerance.
    pub fn new(method: SolverMethod, time_step: f64) -> Self {
        Self {
            method,
            time_step,
            ..Default::default()
        }
    }
}

/// A single construct of a [SystemDescription].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Declaration {
    /// Local variable recomputed whenever the state changes
    Intermediate {
        /// Name of the local variable
        symbol: String,
        /// Defining expression
        expression: String,
    },
    /// Three local variables `symbol.x`, `symbol.y` and `symbol.z`
    IntermediateVector {
        /// Name of the vector
        symbol: String,
        /// Three comma separated component expressions
        expression: String,
        /// Components are given as `phi, theta, radius`
        #[serde(default)]
        spherical: bool,
    },
    /// Function callable from all expressions of the system
    Function {
        /// Name of the function
        symbol: String,
        /// Names of the parameters
        #[serde(default)]
        parameters: Vec<String>,
        /// Body of the function
        expression: String,
    },
    /// $\frac{d}{dt}\text{symbol} = \text{expression}$
    DiffEqn {
        /// Integrated symbol
        symbol: String,
        /// Rate of change
        expression: String,
    },
    /// Vector valued differential equation. Not supported.
    VectorDiffEqn {
        /// Integrated symbol
        symbol: String,
        /// Rate of change
        expression: String,
    },
    /// Assignment evaluated once per step after integration
    Rule {
        /// Assigned symbol
        symbol: String,
        /// Assigned value
        expression: String,
    },
    /// Assignment to the components `symbol.x`, `symbol.y` and `symbol.z`
    VectorRule {
        /// Assigned vector
        symbol: String,
        /// Three comma separated component expressions
        expression: String,
        /// Components are given as `phi, theta, radius`
        #[serde(default)]
        spherical: bool,
    },
    /// Assignment which is re-evaluated whenever the state changes
    Equation {
        /// Assigned symbol
        symbol: String,
        /// Assigned value
        expression: String,
    },
}

impl Declaration {
    /// Target or defined name.
    pub fn symbol(&self) -> &str {
        match self {
            Declaration::Intermediate { symbol, .. }
            | Declaration::IntermediateVector { symbol, .. }
            | Declaration::Function { symbol, .. }
            | Declaration::DiffEqn { symbol, .. }
            | Declaration::VectorDiffEqn { symbol, .. }
            | Declaration::Rule { symbol, .. }
            | Declaration::VectorRule { symbol, .. }
            | Declaration::Equation { symbol, .. } => symbol,
        }
    }

    /// Source expression.
    pub fn expression(&self) -> &str {
        match self {
            Declaration::Intermediate { expression, .. }
            | Declaration::IntermediateVector { expression, .. }
            | Declaration::Function { expression, .. }
            | Declaration::DiffEqn { expression, .. }
            | Declaration::VectorDiffEqn { expression, .. }
            | Declaration::Rule { expression, .. }
            | Declaration::VectorRule { expression, .. }
            | Declaration::Equation { expression, .. } => expression,
        }
    }
}

/// When a [System](crate::System) is evaluated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SystemKind {
    /// Integrated every time step
    #[default]
    Continuous,
    /// Rules applied every time step
    Discrete,
    /// Evaluated on demand, e.g. by an [EventSystem](crate::EventSystem)
    Triggered,
}

/// Everything needed to build a [System](crate::System).
///
/// ```
/// # use cellpotts_core::*;
/// let description = SystemDescription::from_json(r#"{
///     "solver": {"method": "heun", "time_step": 0.1},
///     "declarations": [{"DiffEqn": {"symbol": "y", "expression": "-y"}}]
/// }"#)?;
/// assert_eq!(description.solver.method, SolverMethod::Heun);
/// assert_eq!(description.kind, SystemKind::Continuous);
/// # Ok::<(), SystemError>(())
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemDescription {
    /// Scheduling of the system
    #[serde(default)]
    pub kind: SystemKind,
    /// Numerical settings
    #[serde(default)]
    pub solver: SolverSpec,
    /// Declarations in model order
    #[serde(default)]
    pub declarations: Vec<Declaration>,
    /// Seed of the random functions
    #[serde(default)]
    pub seed: u64,
}

impl SystemDescription {
    /// Empty description of the given kind.
    pub fn new(kind: SystemKind, solver: SolverSpec) -> Self {
        Self {
            kind,
            solver,
            declarations: Vec::new(),
            seed: 0,
        }
    }

    /// Append a declaration.
    pub fn with(mut self, declaration: Declaration) -> Self {
        self.declarations.push(declaration);
        self
    }

    /// Set the seed of the random functions.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// The method actually used. Discrete systems never integrate.
    pub fn method(&self) -> SolverMethod {
        match self.kind {
            SystemKind::Discrete => SolverMethod::Discrete,
            _ => self.solver.method,
        }
    }

    /// Read a description from JSON.
    pub fn from_json(text: &str) -> Result<Self, SystemError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read a description from RON.
    pub fn from_ron(text: &str) -> Result<Self, SystemError> {
        Ok(ron::from_str(text)?)
    }

    /// Read a description from a `.json` or `.ron` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SystemError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&text),
            Some("ron") => Self::from_ron(&text),
            _ => Err(SystemError::DeserializationError(format!(
                "unsupported model file {}",
                path.display()
            ))),
        }
    }
}
