use rand::Rng;
use statrs::distribution::{Continuous, Normal, Uniform};

use crate::{
    error::{ABCErr, ABCResult},
    types::Parameters,
};

pub trait Prior: Send + Sync {
    fn sample(&self, rng: &mut impl Rng) -> Parameters;
    /// Zero outside the support.
    fn density(&self, p: &[f64]) -> f64;
}

/// Prior distribution of a single parameter.
#[derive(Debug, Clone)]
pub enum Marginal {
    Uniform { lower: f64, upper: f64, dist: Uniform },
    Normal { dist: Normal },
}
impl Marginal {
    pub fn uniform(lower: f64, upper: f64) -> ABCResult<Self> {
        if !(lower < upper) {
            return Err(ABCErr::ConfigurationError(format!(
                "Uniform prior needs lower < upper, got [{}, {}]",
                lower, upper
            )));
        }
        Ok(Marginal::Uniform {
            lower,
            upper,
            dist: Uniform::new(lower, upper)?,
        })
    }

    pub fn normal(mean: f64, std_dev: f64) -> ABCResult<Self> {
        Ok(Marginal::Normal {
            dist: Normal::new(mean, std_dev)?,
        })
    }

    pub fn sample(&self, rng: &mut impl Rng) -> f64 {
        match self {
            Marginal::Uniform { dist, .. } => rng.sample(dist),
            Marginal::Normal { dist } => rng.sample(dist),
        }
    }

    pub fn density(&self, v: f64) -> f64 {
        match self {
            Marginal::Uniform { lower, upper, dist } => {
                if v < *lower || v > *upper {
                    0.0
                } else {
                    dist.pdf(v)
                }
            }
            Marginal::Normal { dist } => dist.pdf(v),
        }
    }

    /// Width of the support, when it's bounded.
    pub fn width(&self) -> Option<f64> {
        match self {
            Marginal::Uniform { lower, upper, .. } => Some(upper - lower),
            Marginal::Normal { .. } => None,
        }
    }
}

/// Product of independent per-parameter priors.
#[derive(Debug, Clone)]
pub struct IndependentPrior {
    marginals: Vec<Marginal>,
}
impl IndependentPrior {
    pub fn new(marginals: Vec<Marginal>) -> ABCResult<Self> {
        if marginals.is_empty() {
            return Err(ABCErr::ConfigurationError(
                "Prior needs at least one parameter".into(),
            ));
        }
        Ok(Self { marginals })
    }

    /// Uniform priors from `(lower, upper)` pairs.
    pub fn uniform(bounds: &[(f64, f64)]) -> ABCResult<Self> {
        let marginals = bounds
            .iter()
            .map(|(lower, upper)| Marginal::uniform(*lower, *upper))
            .collect::<ABCResult<Vec<_>>>()?;
        Self::new(marginals)
    }

    pub fn marginals(&self) -> &[Marginal] {
        &self.marginals
    }

    pub fn dimension(&self) -> usize {
        self.marginals.len()
    }
}

impl Prior for IndependentPrior {
    fn sample(&self, rng: &mut impl Rng) -> Parameters {
        self.marginals.iter().map(|m| m.sample(rng)).collect()
    }

    fn density(&self, p: &[f64]) -> f64 {
        if p.len() != self.marginals.len() {
            return 0.0;
        }
        self.marginals
            .iter()
            .zip(p)
            .map(|(m, v)| m.density(*v))
            .product()
    }
}
