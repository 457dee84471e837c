use crate::{EvaluatorCache, Expression};
use itertools::Itertools;
use nalgebra::Vector3;

/// Role of a [SystemFunc] in the evaluation pipeline of a [System](super::System).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SystemFuncKind {
    /// Local variable recomputed whenever the state changes
    VarInit,
    /// Differential equation contributing a rate
    Ode,
    /// Assignment evaluated once after integration
    Rule,
    /// Assignment recomputed together with the intermediates
    Eqn,
}

/// Converts spherical `(phi, theta, radius)` coordinates to cartesian ones.
///
/// $\theta$ is the elevation above the $xy$-plane.
pub fn from_radial(phi: f64, theta: f64, radius: f64) -> Vector3<f64> {
    Vector3::new(
        radius * theta.cos() * phi.cos(),
        radius * theta.cos() * phi.sin(),
        radius * theta.sin(),
    )
}

/// A compiled declaration writing one or three slots of an [EvaluatorCache].
#[derive(Clone, Debug)]
pub struct SystemFunc {
    kind: SystemFuncKind,
    symbol: String,
    expressions: Vec<Expression>,
    slots: Vec<usize>,
    spherical: bool,
}

impl SystemFunc {
    pub(crate) fn new(
        kind: SystemFuncKind,
        symbol: &str,
        expressions: Vec<Expression>,
        slots: Vec<usize>,
        spherical: bool,
    ) -> Self {
        Self {
            kind,
            symbol: symbol.to_owned(),
            expressions,
            slots,
            spherical,
        }
    }

    /// Role within the system.
    pub fn kind(&self) -> SystemFuncKind {
        self.kind
    }

    /// Defined or assigned symbol.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// One expression, or three for vectors.
    pub fn expressions(&self) -> &[Expression] {
        &self.expressions
    }

    /// Cache slots written by [SystemFunc::assign].
    pub fn slots(&self) -> &[usize] {
        &self.slots
    }

    /// Does this declaration define three components?
    pub fn is_vector(&self) -> bool {
        self.slots.len() == 3
    }

    /// Append the current values to `out`.
    pub(crate) fn evaluate(&self, cache: &mut EvaluatorCache, out: &mut Vec<f64>) {
        match (self.expressions.as_slice(), self.spherical) {
            ([phi, theta, radius], true) => {
                let v = from_radial(phi.eval(cache), theta.eval(cache), radius.eval(cache));
                out.extend(v.iter());
            }
            (expressions, _) => out.extend(expressions.iter().map(|e| e.eval(cache))),
        }
    }

    /// Evaluate and store the results in the own slots.
    pub(crate) fn assign(&self, cache: &mut EvaluatorCache) {
        match self.expressions.as_slice() {
            [expression] => {
                let value = expression.eval(cache);
                cache.set(self.slots[0], value);
            }
            _ => {
                let mut values = Vec::with_capacity(3);
                self.evaluate(cache, &mut values);
                for (slot, value) in self.slots.iter().zip(values) {
                    cache.set(*slot, value);
                }
            }
        }
    }

    /// Expression texts together with the current values of their symbols.
    pub(crate) fn diagnostic(&self, cache: &EvaluatorCache) -> String {
        self.expressions
            .iter()
            .map(|e| format!("\"{}\" with {}", e.text(), e.bindings(cache)))
            .join(", ")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{FunctionTable, SymbolStore};

    #[test]
    fn radial_conversion() {
        let v = from_radial(std::f64::consts::FRAC_PI_2, 0.0, 2.0);
        approx::assert_abs_diff_eq!(v, Vector3::new(0.0, 2.0, 0.0), epsilon = 1e-12);
        let v = from_radial(0.0, std::f64::consts::FRAC_PI_2, 1.0);
        approx::assert_abs_diff_eq!(v, Vector3::new(0.0, 0.0, 1.0), epsilon = 1e-12);
    }

    #[test]
    fn vector_assignment() {
        let store = SymbolStore::new();
        let mut cache = EvaluatorCache::new(0);
        let slots = ["v.x", "v.y", "v.z"].map(|n| cache.add_local(n, 0.0)).to_vec();
        let functions = FunctionTable::new();
        let expressions = ["0", "0", "3"]
            .iter()
            .map(|t| Expression::compile(t, &mut cache, &store, &functions).unwrap())
            .collect();
        let func = SystemFunc::new(SystemFuncKind::Rule, "v", expressions, slots.clone(), true);
        assert!(func.is_vector());
        func.assign(&mut cache);
        approx::assert_abs_diff_eq!(cache.get(slots[0]), 3.0, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(cache.get(slots[2]), 0.0, epsilon = 1e-12);
        assert!(func.diagnostic(&cache).contains("\"3\""));
    }
}
