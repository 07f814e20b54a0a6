use std::time::Duration;

use crate::{
    config::{tests::scenario_config, Config},
    kernel::NormalKernel,
    loss::{LossFn, ScoreResult},
    prior::IndependentPrior,
    storage::config::StorageConfig,
    types::fsum,
};

use super::*;

type TestScheduler<F> = Scheduler<IndependentPrior, NormalKernel, LossFn<F>>;

fn scheduler<F>(loss: F, config: Config) -> ABCResult<TestScheduler<F>>
where
    F: Fn(&[f64]) -> ScoreResult + Send + Sync + 'static,
{
    let model = Model {
        prior: IndependentPrior::uniform(&[(0.0, 1.0)])?,
        kernel: NormalKernel::new(&[0.2])?,
        loss: LossFn::new(loss),
    };
    Scheduler::new(model, config)
}

fn distance_from_half(p: &[f64]) -> ScoreResult {
    Ok((p[0] - 0.5).abs())
}

fn always_infinite(_: &[f64]) -> ScoreResult {
    Ok(f64::INFINITY)
}

fn existing_generation() -> ABCResult<Generation> {
    let pop = Population::uniform(
        vec![(vec![0.2], 0.3), (vec![0.5], 0.1), (vec![0.8], 0.3)],
        1.0,
    )?;
    Ok(Generation::initial(pop))
}

#[test]
fn posterior_centres_on_the_minimum() -> ABCResult<()> {
    let mut scheduler = scheduler(distance_from_half, scenario_config())?;

    let posterior = scheduler.run()?;

    assert_eq!(10, posterior.len());
    assert!((fsum(posterior.weights()) - 1.0).abs() < 1e-9);
    let mean = posterior.mean()[0];
    assert!((mean - 0.5).abs() < 0.05, "posterior mean was {}", mean);
    Ok(())
}

#[test]
fn control_values_follow_step_outcomes() -> ABCResult<()> {
    let mut scheduler = scheduler(distance_from_half, scenario_config())?;
    let pool = WorkerPool::new(2)?;

    let mut gen = scheduler.initialise(&pool)?;
    assert_eq!(10, gen.pop.len());
    assert!(gen.pop.weights().iter().all(|w| (w - 0.1).abs() < 1e-12));
    assert!(gen.pop.normalised_particles().iter().all(|p| p.score < 0.5));

    let mut steps = 0;
    while !gen.is_converged(0.01) && steps < 40 {
        let before = gen.clone();
        match scheduler.step(&pool, &mut gen)? {
            StepOutcome::Accepted => {
                assert_eq!(before.number + 1, gen.number);
                assert_eq!(before.threshold - before.shrink_step, gen.threshold);
                assert_eq!(before.shrink_step.min(0.5 * gen.threshold), gen.shrink_step);
                assert!(gen.threshold > 0.0 && gen.threshold < before.threshold);
                assert_eq!(10, gen.pop.len());
                assert!((fsum(gen.pop.weights()) - 1.0).abs() < 1e-9);
                assert!(gen
                    .pop
                    .normalised_particles()
                    .iter()
                    .all(|p| p.score <= before.threshold));
            }
            StepOutcome::Failed => {
                assert_eq!(before.pop, gen.pop);
                assert_eq!(before.threshold, gen.threshold);
                assert_eq!(before.number, gen.number);
                assert_eq!(0.5 * before.shrink_step, gen.shrink_step);
                assert_eq!(before.failed_attempts + 1, gen.failed_attempts);
            }
        }
        steps += 1;
    }
    assert!(gen.number > 0);
    Ok(())
}

#[test]
fn seeded_runs_are_reproducible() -> ABCResult<()> {
    let a = scheduler(distance_from_half, scenario_config())?.run()?;
    let b = scheduler(distance_from_half, scenario_config())?.run()?;
    assert_eq!(a, b);
    Ok(())
}

#[test]
fn pool_failure_leaves_generation_untouched() -> ABCResult<()> {
    let mut config = scenario_config();
    config.job.num_workers = Some(0);
    let mut scheduler = scheduler(distance_from_half, config)?;

    let mut gen = existing_generation()?;
    let before = gen.clone();

    match scheduler.advance(&mut gen) {
        Err(ABCErr::WorkerPoolError(_)) => (),
        other => panic!("Expected worker pool error, got {:?}", other),
    }
    assert_eq!(before, gen);

    assert!(matches!(scheduler.run(), Err(ABCErr::WorkerPoolError(_))));
    Ok(())
}

#[test]
fn unreachable_loss_only_halves_the_step() -> ABCResult<()> {
    let mut config = scenario_config();
    config.algorithm.maxiter = 20;
    let mut scheduler = scheduler(always_infinite, config)?;
    let pool = WorkerPool::new(2)?;

    let mut gen = existing_generation()?;
    let before = gen.clone();

    assert_eq!(StepOutcome::Failed, scheduler.step(&pool, &mut gen)?);
    assert_eq!(0.5 * before.shrink_step, gen.shrink_step);
    assert_eq!(before.pop, gen.pop);

    scheduler.advance(&mut gen)?;

    // Relative step starts at 0.7 / 6 / 0.3, about 0.39; six halvings take it under 0.01
    assert_eq!(6, gen.failed_attempts);
    assert!(gen.relative_step() <= 0.01);
    assert_eq!(before.pop, gen.pop);
    assert_eq!(before.threshold, gen.threshold);
    assert_eq!(0, gen.number);
    assert!(gen.is_prior_sample());
    Ok(())
}

#[test]
fn bounded_initial_sampling_gives_up() -> ABCResult<()> {
    let mut config = scenario_config();
    config.algorithm.init_max_draws = Some(50);
    let mut scheduler = scheduler(always_infinite, config)?;

    match scheduler.run() {
        Err(ABCErr::InitialisationError(_)) => Ok(()),
        other => panic!("Expected initialisation error, got {:?}", other),
    }
}

#[test]
fn accepted_generations_are_checkpointed() -> ABCResult<()> {
    let tmp_dir = tempfile::tempdir()?;
    let base_path = tmp_dir.path().join("fit");
    let mut config = scenario_config();
    config.storage = Some(StorageConfig::FileSystem {
        base_path: base_path.clone(),
    });
    let mut scheduler = scheduler(distance_from_half, config)?;

    let posterior = scheduler.run()?;

    assert!(base_path.join("gen_000.json").exists());
    let latest = FileSystem::new(base_path)
        .load_previous_gen()?
        .expect("at least the initial generation is saved");
    assert!(latest.number > 0);
    assert_eq!(posterior.len(), latest.pop.len());
    for (saved, fitted) in latest
        .pop
        .normalised_particles()
        .iter()
        .zip(posterior.normalised_particles())
    {
        assert!((saved.parameters[0] - fitted.parameters[0]).abs() < 1e-12);
        assert!((saved.weight - fitted.weight).abs() < 1e-12);
    }
    Ok(())
}

#[test]
fn resume_from_saved_generation() -> ABCResult<()> {
    let tmp_dir = tempfile::tempdir()?;
    let storage = FileSystem::new(tmp_dir.path().to_path_buf());
    let saved = existing_generation()?;
    storage.save_new_gen(&saved)?;

    let mut config = scenario_config();
    config.algorithm.maxiter = 20;
    // Sampling from the prior again would fail rather than hang
    config.algorithm.init_max_draws = Some(5);
    config.storage = Some(StorageConfig::FileSystem {
        base_path: tmp_dir.path().to_path_buf(),
    });
    let mut scheduler = scheduler(always_infinite, config)?;

    let posterior = scheduler.resume()?;

    assert_eq!(saved.pop.len(), posterior.len());
    for (saved, resumed) in saved.pop.weights().iter().zip(posterior.weights()) {
        assert!((saved - resumed).abs() < 1e-12);
    }
    Ok(())
}

#[test]
fn initial_sampling_times_evaluations_from_their_start() -> ABCResult<()> {
    let mut config = scenario_config();
    config.job.post_size = 4;
    config.job.num_workers = Some(1);
    config.algorithm.init_max_draws = Some(1);
    config.algorithm.eval_timeout_secs = Some(0.4);
    let slow = |_: &[f64]| -> ScoreResult {
        std::thread::sleep(Duration::from_millis(150));
        Ok(0.1)
    };
    let mut scheduler = scheduler(slow, config)?;
    let pool = WorkerPool::new(1)?;

    // Four evaluations queue behind one thread, 600ms in all
    let gen = scheduler.initialise(&pool)?;

    assert_eq!(4, gen.pop.len());
    assert_eq!(1.0, gen.pop.acceptance());
    Ok(())
}

#[test]
fn generation_counter_overflow_is_an_error() -> ABCResult<()> {
    let mut scheduler = scheduler(distance_from_half, scenario_config())?;
    let pool = WorkerPool::new(2)?;

    let mut gen = existing_generation()?;
    gen.number = u32::MAX;
    let before = gen.clone();

    match scheduler.step(&pool, &mut gen) {
        Err(ABCErr::StorageError(_)) => (),
        other => panic!("Expected storage error, got {:?}", other),
    }
    assert_eq!(before, gen);
    Ok(())
}
