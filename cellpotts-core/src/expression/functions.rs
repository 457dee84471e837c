use rand::Rng;
use rand_distr::{Distribution, Gamma, StandardNormal};
use serde::{Deserialize, Serialize};

/// Name of the normal distributed random function.
pub const RANDOM_NORM: &str = "rand_norm";

/// Number of arguments a function accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arity {
    /// Exactly this number of arguments
    Exact(usize),
    /// Any number of arguments between the bounds (inclusive)
    Between(usize, usize),
    /// At least this number of arguments
    AtLeast(usize),
}

impl Arity {
    /// Does a call with `n` arguments match?
    pub fn accepts(&self, n: usize) -> bool {
        match self {
            Arity::Exact(m) => n == *m,
            Arity::Between(low, high) => *low <= n && n <= *high,
            Arity::AtLeast(m) => n >= *m,
        }
    }
}

/// Deterministic mathematical functions available in every expression.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Builtin {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Sinh,
    Cosh,
    Tanh,
    Exp,
    Ln,
    Log10,
    Log2,
    Sqrt,
    Abs,
    Sign,
    Floor,
    Ceil,
    Round,
    Min,
    Max,
    Pow,
    Mod,
    Hill,
}

impl Builtin {
    /// Look up a builtin by the name used in expressions.
    pub fn from_name(name: &str) -> Option<Self> {
        use Builtin::*;
        Some(match name {
            "sin" => Sin,
            "cos" => Cos,
            "tan" => Tan,
            "asin" => Asin,
            "acos" => Acos,
            "atan" => Atan,
            "atan2" => Atan2,
            "sinh" => Sinh,
            "cosh" => Cosh,
            "tanh" => Tanh,
            "exp" => Exp,
            "ln" | "log" => Ln,
            "log10" => Log10,
            "log2" => Log2,
            "sqrt" => Sqrt,
            "abs" => Abs,
            "sign" => Sign,
            "floor" => Floor,
            "ceil" => Ceil,
            "rint" | "round" => Round,
            "min" => Min,
            "max" => Max,
            "pow" => Pow,
            "mod" => Mod,
            "hill" => Hill,
            _ => return None,
        })
    }

    /// Accepted number of arguments.
    pub fn arity(&self) -> Arity {
        use Builtin::*;
        match self {
            Atan2 | Pow | Mod => Arity::Exact(2),
            Hill => Arity::Exact(3),
            Min | Max => Arity::AtLeast(1),
            _ => Arity::Exact(1),
        }
    }

    /// Evaluate the function. The number of arguments has been checked at compile time.
    pub fn apply(&self, args: &[f64]) -> f64 {
        use Builtin::*;
        let x = args[0];
        match self {
            Sin => x.sin(),
            Cos => x.cos(),
            Tan => x.tan(),
            Asin => x.asin(),
            Acos => x.acos(),
            Atan => x.atan(),
            Atan2 => x.atan2(args[1]),
            Sinh => x.sinh(),
            Cosh => x.cosh(),
            Tanh => x.tanh(),
            Exp => x.exp(),
            Ln => x.ln(),
            Log10 => x.log10(),
            Log2 => x.log2(),
            Sqrt => x.sqrt(),
            Abs => x.abs(),
            Sign => {
                if x > 0.0 {
                    1.0
                } else if x < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }
            Floor => x.floor(),
            Ceil => x.ceil(),
            Round => x.round(),
            Min => args.iter().copied().fold(f64::INFINITY, f64::min),
            Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Pow => x.powf(args[1]),
            Mod => x % args[1],
            // hill(x, k, n) = x^n / (x^n + k^n)
            Hill => {
                let xn = x.powf(args[2]);
                xn / (xn + args[1].powf(args[2]))
            }
        }
    }
}

/// Random functions.
///
/// Only [RandomFunc::Norm] may be used in differential equations. When integrated with
/// the Euler-Maruyama scheme it receives a third argument scaling the sampled noise.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RandomFunc {
    /// `rand_norm(mean, stdev[, scaling])`
    Norm,
    /// `rand_uni(min, max)`
    Uniform,
    /// `rand_bool()`
    Bool,
    /// `rand_gamma(shape, scale)`
    Gamma,
}

impl RandomFunc {
    /// Look up a random function by the name used in expressions.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            RANDOM_NORM => Some(RandomFunc::Norm),
            "rand_uni" => Some(RandomFunc::Uniform),
            "rand_bool" => Some(RandomFunc::Bool),
            "rand_gamma" => Some(RandomFunc::Gamma),
            _ => None,
        }
    }

    /// Name used in expressions.
    pub fn name(&self) -> &'static str {
        match self {
            RandomFunc::Norm => RANDOM_NORM,
            RandomFunc::Uniform => "rand_uni",
            RandomFunc::Bool => "rand_bool",
            RandomFunc::Gamma => "rand_gamma",
        }
    }

    /// Accepted number of arguments.
    pub fn arity(&self) -> Arity {
        match self {
            RandomFunc::Norm => Arity::Between(2, 3),
            RandomFunc::Uniform | RandomFunc::Gamma => Arity::Exact(2),
            RandomFunc::Bool => Arity::Exact(0),
        }
    }

    /// Draw a sample. Invalid distribution parameters yield `NaN`.
    pub fn sample<R: Rng + ?Sized>(&self, args: &[f64], rng: &mut R) -> f64 {
        match self {
            RandomFunc::Norm => {
                let z: f64 = StandardNormal.sample(rng);
                let scaling = args.get(2).copied().unwrap_or(1.0);
                args[0] + args[1] * z * scaling
            }
            RandomFunc::Uniform => args[0] + (args[1] - args[0]) * rng.gen::<f64>(),
            RandomFunc::Bool => match rng.gen_bool(0.5) {
                true => 1.0,
                false => 0.0,
            },
            RandomFunc::Gamma => match Gamma::new(args[0], args[1]) {
                Ok(gamma) => gamma.sample(rng),
                Err(_) => f64::NAN,
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn builtin_lookup_and_arity() {
        assert_eq!(Builtin::from_name("log"), Some(Builtin::Ln));
        assert_eq!(Builtin::from_name("foo"), None);
        assert!(Builtin::Max.arity().accepts(4));
        assert!(!Builtin::Atan2.arity().accepts(1));
        assert_eq!(Builtin::Max.apply(&[1.0, 5.0, 2.0]), 5.0);
        assert_eq!(Builtin::Sign.apply(&[0.0]), 0.0);
        assert_eq!(Builtin::Hill.apply(&[2.0, 2.0, 3.0]), 0.5);
    }

    #[test]
    fn random_samples() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(1);
        let n = 20_000;
        let mean = (0..n)
            .map(|_| RandomFunc::Norm.sample(&[2.0, 0.5], &mut rng))
            .sum::<f64>()
            / n as f64;
        assert!((mean - 2.0).abs() < 0.02);
        for _ in 0..100 {
            let u = RandomFunc::Uniform.sample(&[1.0, 3.0], &mut rng);
            assert!((1.0..3.0).contains(&u));
            let b = RandomFunc::Bool.sample(&[], &mut rng);
            assert!(b == 0.0 || b == 1.0);
        }
        assert!(RandomFunc::Gamma.sample(&[-1.0, 1.0], &mut rng).is_nan());
        // A scaling of zero removes the noise
        assert_eq!(RandomFunc::Norm.sample(&[1.0, 3.0, 0.0], &mut rng), 1.0);
    }
}
