use rand::Rng;
use statrs::distribution::{Continuous, Normal, Uniform};

use crate::{
    error::{ABCErr, ABCResult},
    prior::IndependentPrior,
    types::{Parameters, Population},
};

pub mod mvn;

/// Proposal distribution used to move particles between generations.
pub trait Kernel: Send + Sync {
    fn perturb(&self, from: &[f64], rng: &mut impl Rng) -> Parameters;
    /// Transition density from `from` to `to`, needed for the importance weights.
    fn pert_density(&self, from: &[f64], to: &[f64]) -> f64;
}

/// Supplies the kernel that proposes the next generation from the current population.
///
/// Any fixed kernel builds itself; adaptive kernels such as
/// [`mvn::PopulationCovariance`] are rebuilt for every generation attempt.
pub trait KernelBuilder: Send + Sync {
    type Kernel: Kernel + 'static;

    fn build_kernel(&self, pop: &Population) -> ABCResult<Self::Kernel>;
}

impl<K: Kernel + Clone + 'static> KernelBuilder for K {
    type Kernel = K;

    fn build_kernel(&self, _pop: &Population) -> ABCResult<K> {
        Ok(self.clone())
    }
}

fn prior_widths(prior: &IndependentPrior, fraction: f64) -> ABCResult<Vec<f64>> {
    prior
        .marginals()
        .iter()
        .enumerate()
        .map(|(idx, m)| {
            m.width().map(|w| fraction * w).ok_or_else(|| {
                ABCErr::KernelError(format!(
                    "Prior for parameter {} is unbounded, can't scale kernel to it",
                    idx
                ))
            })
        })
        .collect()
}

/// Uniform random walk, each step within half of `widths` either side.
#[derive(Debug, Clone)]
pub struct UniformKernel {
    widths: Vec<f64>,
    steps: Vec<Uniform>,
}
impl UniformKernel {
    pub fn new(widths: &[f64]) -> ABCResult<Self> {
        if widths.is_empty() {
            return Err(ABCErr::KernelError("Kernel needs at least one dimension".into()));
        }
        let steps = widths
            .iter()
            .map(|w| {
                Uniform::new(-0.5 * w, 0.5 * w)
                    .map_err(|e| ABCErr::KernelError(format!("Bad kernel width {}: {}", w, e)))
            })
            .collect::<ABCResult<Vec<_>>>()?;
        Ok(Self {
            widths: widths.to_vec(),
            steps,
        })
    }

    pub fn widths(&self) -> &[f64] {
        &self.widths
    }

    /// Total width of each step is `fraction` of the corresponding uniform prior's range.
    pub fn scaled_to_prior(prior: &IndependentPrior, fraction: f64) -> ABCResult<Self> {
        Self::new(&prior_widths(prior, fraction)?)
    }
}

impl Kernel for UniformKernel {
    fn perturb(&self, from: &[f64], rng: &mut impl Rng) -> Parameters {
        from.iter()
            .zip(&self.steps)
            .map(|(v, step)| v + rng.sample(step))
            .collect()
    }

    fn pert_density(&self, from: &[f64], to: &[f64]) -> f64 {
        if from.len() != self.widths.len() || to.len() != self.widths.len() {
            return 0.0;
        }
        from.iter()
            .zip(to)
            .zip(&self.widths)
            .map(|((a, b), w)| if (b - a).abs() <= 0.5 * w { 1.0 / w } else { 0.0 })
            .product()
    }
}

/// Independent Gaussian random walk in each dimension.
#[derive(Debug, Clone)]
pub struct NormalKernel {
    std_devs: Vec<f64>,
    normals: Vec<Normal>,
}
impl NormalKernel {
    pub fn new(std_devs: &[f64]) -> ABCResult<Self> {
        if std_devs.is_empty() {
            return Err(ABCErr::KernelError("Kernel needs at least one dimension".into()));
        }
        let normals = std_devs
            .iter()
            .map(|sd| {
                Normal::new(0.0, *sd)
                    .map_err(|e| ABCErr::KernelError(format!("Bad kernel width {}: {}", sd, e)))
            })
            .collect::<ABCResult<Vec<_>>>()?;
        Ok(Self {
            std_devs: std_devs.to_vec(),
            normals,
        })
    }

    pub fn std_devs(&self) -> &[f64] {
        &self.std_devs
    }

    /// Width of each step is `fraction` of the corresponding uniform prior's range.
    pub fn scaled_to_prior(prior: &IndependentPrior, fraction: f64) -> ABCResult<Self> {
        Self::new(&prior_widths(prior, fraction)?)
    }
}

impl Kernel for NormalKernel {
    fn perturb(&self, from: &[f64], rng: &mut impl Rng) -> Parameters {
        from.iter()
            .zip(&self.normals)
            .map(|(v, normal)| v + rng.sample(normal))
            .collect()
    }

    fn pert_density(&self, from: &[f64], to: &[f64]) -> f64 {
        if from.len() != self.normals.len() || to.len() != self.normals.len() {
            return 0.0;
        }
        from.iter()
            .zip(to)
            .zip(&self.normals)
            .map(|((a, b), normal)| normal.pdf(b - a))
            .product()
    }
}
