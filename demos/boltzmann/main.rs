use adaptive_abc::{
    kernel::UniformKernel,
    loss::{
        distance::{Observation, WeightedDistance},
        BoxedError, CombinedLoss, LossEvaluator, Simulator, SummaryStatisticLoss,
    },
    prior::IndependentPrior,
    Config, Model, Scheduler,
};
use color_eyre::eyre;
use path_absolutize::Absolutize;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use statrs::distribution::Normal;
use std::path::Path;

const TRUE_V_HALF: f64 = -42.0;
const TRUE_SLOPE: f64 = 7.5;

/// Steady-state activation `1 / (1 + exp((v_half - V) / k))` at fixed test voltages.
struct BoltzmannCurve {
    voltages: Vec<f64>,
}
impl BoltzmannCurve {
    fn evaluate(v_half: f64, slope: f64, voltage: f64) -> f64 {
        1.0 / (1.0 + ((v_half - voltage) / slope).exp())
    }
}
impl Simulator for BoltzmannCurve {
    fn simulate(&self, p: &[f64]) -> Result<Vec<f64>, BoxedError> {
        let (v_half, slope) = (p[0], p[1]);
        if slope <= 0.0 {
            return Err(format!("Slope must be positive, got {}", slope).into());
        }
        Ok(self
            .voltages
            .iter()
            .map(|v| Self::evaluate(v_half, slope, *v))
            .collect())
    }
}

/// Noisy synthetic recording of the true curve, reported with error bars.
fn synthetic_experiment(
    voltages: &[f64],
    experiment: usize,
    noise_sd: f64,
    rng: &mut impl Rng,
) -> eyre::Result<Vec<Observation>> {
    let noise = Normal::new(0.0, noise_sd)?;
    Ok(voltages
        .iter()
        .map(|v| {
            let value = BoltzmannCurve::evaluate(TRUE_V_HALF, TRUE_SLOPE, *v) + rng.sample(noise);
            Observation::with_error(value, experiment, noise_sd)
        })
        .collect())
}

fn experiment_loss(
    voltages: Vec<f64>,
    experiment: usize,
    noise_sd: f64,
    rng: &mut impl Rng,
) -> eyre::Result<Box<dyn LossEvaluator>> {
    let observations = synthetic_experiment(&voltages, experiment, noise_sd, rng)?;
    let distance = WeightedDistance::new(&observations, 0.05)?;
    Ok(Box::new(SummaryStatisticLoss::new(
        BoltzmannCurve { voltages },
        distance,
    )))
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut data_rng = SmallRng::seed_from_u64(7);
    let coarse: Vec<f64> = (0..9).map(|i| -90.0 + 10.0 * i as f64).collect();
    let fine: Vec<f64> = (0..17).map(|i| -60.0 + 2.5 * i as f64).collect();
    let loss = CombinedLoss::new(vec![
        experiment_loss(coarse, 0, 0.03, &mut data_rng)?,
        experiment_loss(fine, 1, 0.05, &mut data_rng)?,
    ])?;

    let prior = IndependentPrior::uniform(&[(-80.0, 0.0), (1.0, 20.0)])?;
    let kernel = UniformKernel::scaled_to_prior(&prior, 0.1)?;

    let path = Path::new("./demos/boltzmann/config.toml").absolutize()?;
    log::info!("Load config from {:?}", path);
    let config = Config::from_path(path)?;

    let mut scheduler = Scheduler::new(
        Model {
            prior,
            kernel,
            loss,
        },
        config,
    )?;
    let posterior = scheduler.resume()?;

    let mean = posterior.mean();
    let variance = posterior.variance();
    log::info!("True values: v_half {}, slope {}", TRUE_V_HALF, TRUE_SLOPE);
    log::info!(
        "Posterior v_half {:.2} (sd {:.2}), slope {:.2} (sd {:.2})",
        mean[0],
        variance[0].sqrt(),
        mean[1],
        variance[1].sqrt()
    );

    Ok(())
}
