use std::sync::Arc;

use rand::{rngs::SmallRng, Rng, SeedableRng};
use tokio::task::JoinSet;

use crate::{
    config::Config,
    error::{ABCErr, ABCResult},
    kernel::KernelBuilder,
    loss::LossEvaluator,
    pool::WorkerPool,
    prior::Prior,
    rebuild::Rebuilder,
    sampler::{sample_from_prior, InitialOutcome},
    storage::{filesystem::FileSystem, Storage},
    types::{Generation, Parameters, Population},
    Model,
};

#[cfg(test)]
mod tests;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// New population adopted and the threshold lowered
    Accepted,
    /// Threshold out of reach, shrink step halved
    Failed,
}

/// Drives a fit from the prior to the final population.
///
/// Owns the master random source that seeds every sampler task, so a
/// configured `seed` reproduces the whole run.
pub struct Scheduler<P, K, L> {
    model: Arc<Model<P, K, L>>,
    config: Config,
    rebuilder: Rebuilder<P, K, L>,
    rng: SmallRng,
    storage: Option<FileSystem>,
}
impl<P, K, L> Scheduler<P, K, L>
where
    P: Prior + 'static,
    K: KernelBuilder + 'static,
    L: LossEvaluator + 'static,
{
    pub fn new(model: Model<P, K, L>, config: Config) -> ABCResult<Self> {
        config.validate()?;

        let model = Arc::new(model);
        let rebuilder = Rebuilder::new(
            Arc::clone(&model),
            config.algorithm.maxiter,
            config.algorithm.eval_timeout(),
        );
        let rng = match config.job.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        let storage = config.storage.as_ref().map(|s| s.build_fs());

        Ok(Self {
            model,
            config,
            rebuilder,
            rng,
            storage,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> Option<&FileSystem> {
        self.storage.as_ref()
    }

    /// Fits from scratch and returns the final weighted population.
    ///
    /// Doesn't return while the initial sampling can't get a loss under
    /// `init_max_err`, unless `init_max_draws` bounds it.  Once a population
    /// exists the run always ends: failed generations halve the shrink step
    /// until it is negligible, leaving the population as it was.
    pub fn run(&mut self) -> ABCResult<Population> {
        let pool = WorkerPool::from_config(self.config.job.num_workers)?;
        let mut gen = self.initialise(&pool)?;
        self.converge(&pool, &mut gen)?;
        Ok(gen.pop)
    }

    /// Carries on from the latest saved generation, or starts afresh if there isn't one.
    pub fn resume(&mut self) -> ABCResult<Population> {
        let previous = match &self.storage {
            Some(storage) => storage.load_previous_gen()?,
            None => None,
        };

        match previous {
            Some(mut gen) => {
                log::info!(
                    "Resuming from generation {} at threshold {}",
                    gen.number,
                    gen.threshold
                );
                self.advance(&mut gen)?;
                Ok(gen.pop)
            }
            None => self.run(),
        }
    }

    /// Steps `gen` until converged.  `gen` is untouched if the worker pool can't start.
    pub fn advance(&mut self, gen: &mut Generation) -> ABCResult<()> {
        let pool = WorkerPool::from_config(self.config.job.num_workers)?;
        self.converge(&pool, gen)
    }

    fn converge(&mut self, pool: &WorkerPool, gen: &mut Generation) -> ABCResult<()> {
        let err_cutoff = self.config.algorithm.err_cutoff;
        while !gen.is_converged(err_cutoff) {
            self.step(pool, gen)?;
        }

        if gen.is_prior_sample() {
            log::warn!(
                "No generation was accepted, returning the population sampled from the prior"
            );
        }

        log::info!(
            "Converged after generation {} ({} failed attempts), threshold {}, relative step {}",
            gen.number,
            gen.failed_attempts,
            gen.threshold,
            gen.relative_step()
        );
        Ok(())
    }

    /// Rejection samples `post_size` particles from the prior, all equally weighted.
    pub fn initialise(&mut self, pool: &WorkerPool) -> ABCResult<Generation> {
        let post_size = self.config.job.post_size;
        let init_max_err = self.config.algorithm.init_max_err;
        let max_draws = self.config.algorithm.init_max_draws;
        let eval_timeout = self.config.algorithm.eval_timeout();
        let seeds = self.next_seeds(post_size);
        let model = Arc::clone(&self.model);
        let slots = pool.evaluation_slots();

        log::info!(
            "Sampling {} particles from the prior with loss below {}",
            post_size,
            init_max_err
        );

        let (scored, total_draws) = pool.block_on(async move {
            let mut tasks = JoinSet::new();
            for (slot, seed) in seeds.into_iter().enumerate() {
                tasks.spawn(sample_from_prior(
                    Arc::clone(&model),
                    slot,
                    seed,
                    init_max_err,
                    max_draws,
                    eval_timeout,
                    slots.clone(),
                ));
            }

            let mut scored: Vec<Option<(Parameters, f64)>> = vec![None; post_size];
            let mut total_draws: u64 = 0;
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(InitialOutcome::Accepted {
                        slot,
                        parameters,
                        score,
                        draws,
                    }) => {
                        total_draws += draws;
                        scored[slot] = Some((parameters, score));
                    }
                    Ok(InitialOutcome::Exhausted { slot, draws }) => {
                        tasks.abort_all();
                        return Err(ABCErr::InitialisationError(format!(
                            "Slot {} drew {} prior samples without a loss below {}",
                            slot, draws, init_max_err
                        )));
                    }
                    Err(e) => {
                        tasks.abort_all();
                        return Err(ABCErr::InitialisationError(format!(
                            "Initial sampling task failed: {}",
                            e
                        )));
                    }
                }
            }

            Ok((scored, total_draws))
        })?;

        let scored = scored
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| ABCErr::InitialisationError("Initial population incomplete".into()))?;
        let acceptance = (cast::f64(post_size) / cast::f64(total_draws)) as f32;
        let gen = Generation::initial(Population::uniform(scored, acceptance)?);

        log::info!(
            "Initial population accepted {} of {} draws, threshold {}, shrink step {}",
            post_size,
            total_draws,
            gen.threshold,
            gen.shrink_step
        );
        self.save(&gen)?;

        Ok(gen)
    }

    /// One generation attempt at the current threshold.
    ///
    /// Failing to reach the threshold isn't an error; it only halves the shrink step.
    pub fn step(&mut self, pool: &WorkerPool, gen: &mut Generation) -> ABCResult<StepOutcome> {
        let seeds = self.next_seeds(gen.pop.len());

        match self
            .rebuilder
            .rebuild(pool, &gen.pop, gen.threshold, &seeds)?
        {
            Some(pop) => {
                let number = gen.number.checked_add(1).ok_or_else(|| {
                    ABCErr::StorageError(format!(
                        "Generation counter overflowed after generation {}",
                        gen.number
                    ))
                })?;
                gen.pop = pop;
                gen.threshold -= gen.shrink_step;
                if gen.shrink_step >= 0.5 * gen.threshold {
                    gen.shrink_step = 0.5 * gen.threshold;
                }
                gen.number = number;

                log::info!(
                    "Generation {} accepted, threshold now {}, shrink step {}",
                    gen.number,
                    gen.threshold,
                    gen.shrink_step
                );
                log::info!("Posterior mean: {:?}", gen.pop.mean());
                log::info!("Posterior variance: {:?}", gen.pop.variance());
                self.save(gen)?;

                Ok(StepOutcome::Accepted)
            }
            None => {
                gen.shrink_step *= 0.5;
                gen.failed_attempts += 1;
                log::warn!(
                    "Threshold {} not reached, shrink step halved to {}",
                    gen.threshold,
                    gen.shrink_step
                );

                Ok(StepOutcome::Failed)
            }
        }
    }

    fn next_seeds(&mut self, n: usize) -> Vec<u64> {
        (0..n).map(|_| self.rng.gen()).collect()
    }

    fn save(&self, gen: &Generation) -> ABCResult<()> {
        match &self.storage {
            Some(storage) => storage.save_new_gen(gen),
            None => Ok(()),
        }
    }
}
