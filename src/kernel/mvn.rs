use nalgebra::{DMatrix, DVector};
use rand::Rng;
use statrs::distribution::Normal;

use crate::{
    error::{ABCErr, ABCResult},
    types::{Parameters, Population},
};

use super::{Kernel, KernelBuilder};

/// Gaussian random walk with a full covariance matrix.
#[derive(Debug, Clone)]
pub struct MultivariateNormalKernel {
    pub covariance: DMatrix<f64>,
    lower: DMatrix<f64>,
    log_norm: f64,
    standard_normal: Normal,
}
impl MultivariateNormalKernel {
    pub fn new(covariance: DMatrix<f64>) -> ABCResult<Self> {
        let dim = covariance.nrows();
        if dim == 0 || covariance.ncols() != dim {
            return Err(ABCErr::KernelError(format!(
                "Covariance must be square and non-empty, got {}x{}",
                dim,
                covariance.ncols()
            )));
        }

        let lower = covariance
            .clone()
            .cholesky()
            .ok_or_else(|| {
                ABCErr::KernelError("Covariance matrix is not positive definite.".into())
            })?
            .l();

        let log_det: f64 = 2.0 * lower.diagonal().iter().map(|d| d.ln()).sum::<f64>();
        let log_norm =
            -0.5 * (cast::f64(dim) * (2.0 * std::f64::consts::PI).ln() + log_det);

        Ok(Self {
            covariance,
            lower,
            log_norm,
            standard_normal: Normal::new(0.0, 1.0)?,
        })
    }

    /// Kernel with `scale` times the weighted covariance of the population.
    pub fn from_population(pop: &Population, scale: f64) -> ABCResult<Self> {
        let particles = pop.normalised_particles();

        let weighted_mean: DVector<f64> = particles
            .iter()
            .map(|particle| particle.weight * DVector::from_column_slice(&particle.parameters))
            .reduce(|acc, vec| acc + vec)
            .ok_or_else(|| ABCErr::KernelError("Failed to build weighted mean.".into()))?;

        let mut weighted_cov: DMatrix<f64> = particles
            .iter()
            .map(|particle| {
                let params = DVector::from_column_slice(&particle.parameters);
                let diff = &params - &weighted_mean;
                particle.weight * (&diff * diff.transpose())
            })
            .reduce(|acc, mat| acc + mat)
            .ok_or_else(|| ABCErr::KernelError("Failed to build weighted covariance.".into()))?;

        // Should be symmetric already, floating point multiplication may say otherwise
        make_symmetric(&mut weighted_cov);

        Self::new(scale * weighted_cov)
    }

    pub fn dimension(&self) -> usize {
        self.covariance.nrows()
    }
}

impl Kernel for MultivariateNormalKernel {
    fn perturb(&self, from: &[f64], rng: &mut impl Rng) -> Parameters {
        let z = DVector::from_fn(self.dimension(), |_, _| rng.sample(&self.standard_normal));
        let step = &self.lower * z;
        from.iter().zip(step.iter()).map(|(a, s)| a + s).collect()
    }

    fn pert_density(&self, from: &[f64], to: &[f64]) -> f64 {
        let dim = self.dimension();
        if from.len() != dim || to.len() != dim {
            return 0.0;
        }
        let delta = DVector::from_iterator(dim, to.iter().zip(from).map(|(b, a)| b - a));
        match self.lower.solve_lower_triangular(&delta) {
            Some(y) => (self.log_norm - 0.5 * y.norm_squared()).exp(),
            None => 0.0,
        }
    }
}

/// Rebuilds a [`MultivariateNormalKernel`] from each generation's weighted covariance.
#[derive(Debug, Clone)]
pub struct PopulationCovariance {
    scale: f64,
}
impl PopulationCovariance {
    /// `scale` multiplies the population covariance; 2 is the usual choice.
    pub fn new(scale: f64) -> ABCResult<Self> {
        if !(scale > 0.0 && scale.is_finite()) {
            return Err(ABCErr::KernelError(format!(
                "Covariance scale must be positive, got {}",
                scale
            )));
        }
        Ok(Self { scale })
    }
}

impl KernelBuilder for PopulationCovariance {
    type Kernel = MultivariateNormalKernel;

    fn build_kernel(&self, pop: &Population) -> ABCResult<MultivariateNormalKernel> {
        let kernel = MultivariateNormalKernel::from_population(pop, self.scale)?;
        log::debug!("Kernel covariance for next generation: {}", kernel.covariance);
        Ok(kernel)
    }
}

fn make_symmetric(matrix: &mut DMatrix<f64>) {
    // Mirror the upper triangle to the lower triangle
    for i in 0..matrix.nrows() {
        for j in i..matrix.ncols() {
            matrix[(j, i)] = matrix[(i, j)];
        }
    }
}
