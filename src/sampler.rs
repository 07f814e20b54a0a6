use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use rand::{rngs::SmallRng, Rng, SeedableRng};

use crate::{
    kernel::{Kernel, KernelBuilder},
    loss::{guarded_score, LossEvaluator},
    pool::EvaluationSlots,
    prior::Prior,
    types::{fsum, Parameters, Particle, Population},
    Model,
};

/// Shared flag telling every task of a generation attempt to stop.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);
impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Read-only snapshot handed to every sampler task of one generation attempt.
pub struct SamplingContext<P, K: KernelBuilder, L> {
    pub model: Arc<Model<P, K, L>>,
    /// Built from `pop` for this attempt
    pub kernel: K::Kernel,
    pub pop: Arc<Population>,
    pub threshold: f64,
    pub maxiter: u64,
    pub eval_timeout: Option<Duration>,
    pub slots: EvaluationSlots,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
    Accepted {
        slot: usize,
        particle: Particle,
        iterations: u64,
    },
    /// Ran out of draws without an acceptable candidate
    Exhausted { slot: usize, iterations: u64 },
    Cancelled { slot: usize },
}

/// Index of the first particle whose cumulative weight reaches `r`.
///
/// Rounding can leave the total weight just short of `r`, in which case the
/// last particle is chosen.
pub fn select_by_weight(weights: &[f64], r: f64) -> usize {
    let mut cumulative = 0.0;
    for (idx, weight) in weights.iter().enumerate() {
        cumulative += weight;
        if cumulative >= r {
            return idx;
        }
    }
    weights.len().saturating_sub(1)
}

/// `prior(p) / sum_i w_i K(p_i, p)` over the population the candidate was proposed from.
pub fn importance_weight<P: Prior, K: Kernel>(
    prior: &P,
    kernel: &K,
    pop: &Population,
    candidate: &[f64],
) -> f64 {
    let denominator = fsum(
        pop.normalised_particles()
            .iter()
            .map(|prev| prev.weight * kernel.pert_density(&prev.parameters, candidate)),
    );
    prior.density(candidate) / denominator
}

/// Attempts up to `maxiter` perturbed draws from the population until one scores within the threshold.
pub async fn sample_particle<P, K, L>(
    ctx: Arc<SamplingContext<P, K, L>>,
    slot: usize,
    seed: u64,
    cancel: CancellationToken,
) -> SampleOutcome
where
    P: Prior + 'static,
    K: KernelBuilder + 'static,
    L: LossEvaluator + 'static,
{
    let mut rng = SmallRng::seed_from_u64(seed);
    let weights = ctx.pop.weights();

    for iteration in 1..=ctx.maxiter {
        if cancel.is_cancelled() {
            return SampleOutcome::Cancelled { slot };
        }

        let source = &ctx.pop.normalised_particles()[select_by_weight(&weights, rng.gen())];
        let candidate = ctx.kernel.perturb(&source.parameters, &mut rng);
        if !(ctx.model.prior.density(&candidate) > 0.0) {
            continue;
        }

        let score = evaluate(&ctx.model, candidate.clone(), ctx.eval_timeout, &ctx.slots).await;
        if score <= ctx.threshold {
            let weight = importance_weight(&ctx.model.prior, &ctx.kernel, &ctx.pop, &candidate);
            return SampleOutcome::Accepted {
                slot,
                particle: Particle {
                    parameters: candidate,
                    score,
                    weight,
                },
                iterations: iteration,
            };
        }
    }

    log::debug!("Slot {} exhausted {} draws", slot, ctx.maxiter);
    SampleOutcome::Exhausted {
        slot,
        iterations: ctx.maxiter,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InitialOutcome {
    Accepted {
        slot: usize,
        parameters: Parameters,
        score: f64,
        draws: u64,
    },
    Exhausted { slot: usize, draws: u64 },
}

/// Rejection sampling from the prior until the loss is below `init_max_err`.
///
/// Without `max_draws` this never returns for a model that can't get under the ceiling.
pub async fn sample_from_prior<P, K, L>(
    model: Arc<Model<P, K, L>>,
    slot: usize,
    seed: u64,
    init_max_err: f64,
    max_draws: Option<u64>,
    eval_timeout: Option<Duration>,
    slots: EvaluationSlots,
) -> InitialOutcome
where
    P: Prior + 'static,
    K: KernelBuilder + 'static,
    L: LossEvaluator + 'static,
{
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut draws = 0;

    loop {
        draws += 1;
        let parameters = model.prior.sample(&mut rng);
        let score = evaluate(&model, parameters.clone(), eval_timeout, &slots).await;
        if score < init_max_err {
            return InitialOutcome::Accepted {
                slot,
                parameters,
                score,
                draws,
            };
        }
        if max_draws.map_or(false, |max| draws >= max) {
            return InitialOutcome::Exhausted { slot, draws };
        }
    }
}

/// Loss of `candidate`, giving up once it has run for `eval_timeout` if one is set.
///
/// The clock starts when the evaluation starts on a blocking thread, not while
/// it waits for a slot.  Waiting evaluations that are aborted never start.
async fn evaluate<P, K, L>(
    model: &Arc<Model<P, K, L>>,
    candidate: Parameters,
    eval_timeout: Option<Duration>,
    slots: &EvaluationSlots,
) -> f64
where
    P: Prior + 'static,
    K: KernelBuilder + 'static,
    L: LossEvaluator + 'static,
{
    let limit = match eval_timeout {
        None => return guarded_score(&model.loss, &candidate),
        Some(limit) => limit,
    };

    let permit = match slots.acquire().await {
        Some(permit) => permit,
        None => {
            log::debug!("Evaluation slots closed");
            return f64::INFINITY;
        }
    };

    let (started_tx, started_rx) = tokio::sync::oneshot::channel();
    let model = Arc::clone(model);
    let handle = tokio::task::spawn_blocking(move || {
        let _ = started_tx.send(());
        let score = guarded_score(&model.loss, &candidate);
        drop(permit);
        score
    });

    if started_rx.await.is_err() {
        log::debug!("Loss evaluation never started");
        return f64::INFINITY;
    }

    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(score)) => score,
        Ok(Err(e)) => {
            log::debug!("Loss evaluation task failed: {}", e);
            f64::INFINITY
        }
        Err(_) => {
            log::debug!("Loss evaluation timed out after {:?}", limit);
            f64::INFINITY
        }
    }
}
