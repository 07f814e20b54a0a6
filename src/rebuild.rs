use std::{sync::Arc, time::Duration};

use tokio::task::JoinSet;

use crate::{
    error::ABCResult,
    kernel::KernelBuilder,
    loss::LossEvaluator,
    pool::WorkerPool,
    prior::Prior,
    sampler::{sample_particle, CancellationToken, SampleOutcome, SamplingContext},
    types::{Particle, Population},
    Model,
};

/// Builds the next generation from the current one, one sampler task per particle.
pub struct Rebuilder<P, K, L> {
    model: Arc<Model<P, K, L>>,
    maxiter: u64,
    eval_timeout: Option<Duration>,
}
impl<P, K, L> Rebuilder<P, K, L>
where
    P: Prior + 'static,
    K: KernelBuilder + 'static,
    L: LossEvaluator + 'static,
{
    pub fn new(model: Arc<Model<P, K, L>>, maxiter: u64, eval_timeout: Option<Duration>) -> Self {
        Self {
            model,
            maxiter,
            eval_timeout,
        }
    }

    /// New population of the same size whose particles all score within `threshold`.
    ///
    /// `None` when any slot runs out of draws: the threshold isn't reachable with
    /// the current kernel and draw budget.  The first such slot cancels the rest.
    ///
    /// Fails only if no kernel can be built from `pop`.
    pub fn rebuild(
        &self,
        pool: &WorkerPool,
        pop: &Population,
        threshold: f64,
        seeds: &[u64],
    ) -> ABCResult<Option<Population>> {
        let post_size = pop.len();
        debug_assert_eq!(post_size, seeds.len());

        let ctx = Arc::new(SamplingContext {
            model: Arc::clone(&self.model),
            kernel: self.model.kernel.build_kernel(pop)?,
            pop: Arc::new(pop.clone()),
            threshold,
            maxiter: self.maxiter,
            eval_timeout: self.eval_timeout,
            slots: pool.evaluation_slots(),
        });

        let next = pool.block_on(async move {
            let cancel = CancellationToken::new();
            let mut tasks = JoinSet::new();
            for (slot, seed) in seeds.iter().copied().enumerate() {
                tasks.spawn(sample_particle(Arc::clone(&ctx), slot, seed, cancel.clone()));
            }

            let mut next_particles: Vec<Option<Particle>> = vec![None; post_size];
            let mut total_iterations: u64 = 0;
            let mut failed = false;

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(SampleOutcome::Accepted {
                        slot,
                        particle,
                        iterations,
                    }) => {
                        total_iterations += iterations;
                        next_particles[slot] = Some(particle);
                    }
                    Ok(SampleOutcome::Cancelled { .. }) => (),
                    Ok(SampleOutcome::Exhausted { slot, iterations }) => {
                        if !failed {
                            log::debug!(
                                "Slot {} found nothing in {} draws, abandoning generation",
                                slot,
                                iterations
                            );
                            failed = true;
                            cancel.cancel();
                            tasks.abort_all();
                        }
                    }
                    Err(e) if e.is_cancelled() => (),
                    Err(e) => {
                        log::warn!("Sampler task failed: {}", e);
                        failed = true;
                        cancel.cancel();
                        tasks.abort_all();
                    }
                }
            }

            if failed {
                return None;
            }

            let particles = next_particles.into_iter().collect::<Option<Vec<_>>>()?;
            let acceptance = (cast::f64(post_size) / cast::f64(total_iterations)) as f32;
            log::info!("Acceptance rate: {}", acceptance);

            match Population::new(particles, acceptance) {
                Ok(next) => Some(next),
                Err(e) => {
                    log::warn!("Discarding generation with unusable weights: {}", e);
                    None
                }
            }
        });
        Ok(next)
    }
}
