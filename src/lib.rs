//! Likelihood-free parameter estimation by ABC-SMC with an adaptively shrinking
//! error threshold.
//!
//! A [`Model`] bundles a [`prior::Prior`], a [`kernel::KernelBuilder`] for the
//! perturbation kernel (any fixed [`kernel::Kernel`] is one) and a
//! [`loss::LossEvaluator`].  The [`scheduler::Scheduler`] samples an initial
//! population from the prior, then repeatedly asks the [`rebuild::Rebuilder`]
//! for a new population under a tighter threshold until the shrink step becomes
//! negligible.  The final weighted population approximates the posterior.

pub mod config;
pub mod error;
pub mod kernel;
pub mod loss;
pub mod pool;
pub mod prior;
pub mod rebuild;
pub mod sampler;
pub mod scheduler;
pub mod storage;
pub mod types;

pub use config::Config;
pub use error::{ABCErr, ABCResult};
pub use scheduler::Scheduler;
pub use types::{Generation, Parameters, Particle, Population};

/// Prior, kernel and loss of the problem being fitted.
///
/// Shared read-only between all sampler tasks.
pub struct Model<P, K, L> {
    pub prior: P,
    pub kernel: K,
    pub loss: L,
}
