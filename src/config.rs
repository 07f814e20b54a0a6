use crate::error::{ABCErr, ABCResult};
use crate::storage::config::StorageConfig;
use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;

const DEFAULT_EVAL_TIMEOUT_SECS: f64 = 5.0;

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
pub struct Job {
    /// Number of particles kept in every generation
    pub post_size: usize,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Defaults to the available parallelism of the machine
    #[serde(default)]
    pub num_workers: Option<usize>,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
pub struct Algorithm {
    /// Per-particle draw budget for a single generation attempt
    pub maxiter: u64,
    /// Run stops once shrink_step / threshold drops to this value
    pub err_cutoff: f64,
    /// Loss ceiling for the initial rejection sampling from the prior
    pub init_max_err: f64,
    /// Wall-clock limit on one loss evaluation, counted from when it starts running; 0 disables it
    #[serde(default = "default_eval_timeout")]
    pub eval_timeout_secs: Option<f64>,
    #[serde(default)]
    pub init_max_draws: Option<u64>,
}

fn default_eval_timeout() -> Option<f64> {
    Some(DEFAULT_EVAL_TIMEOUT_SECS)
}

impl Algorithm {
    pub fn eval_timeout(&self) -> Option<Duration> {
        self.eval_timeout_secs
            .filter(|secs| *secs > 0.0)
            .map(Duration::from_secs_f64)
    }
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub job: Job,
    pub algorithm: Algorithm,
    #[serde(default)]
    pub storage: Option<StorageConfig>,
}
impl Config {
    pub fn from_path<P>(config_path: P) -> ABCResult<Self>
    where
        P: AsRef<Path> + Debug,
    {
        let str = std::fs::read_to_string(config_path.as_ref())?;
        let config: Config = toml::from_str(&str)?;
        config.validate()?;
        log::info!("Loaded config from {:?}: {:#?}", config_path, config);
        Ok(config)
    }

    pub fn validate(&self) -> ABCResult<()> {
        let fail = |msg: String| Err(ABCErr::ConfigurationError(msg));

        if self.job.post_size == 0 {
            return fail("post_size must be at least 1".into());
        }
        if self.algorithm.maxiter == 0 {
            return fail("maxiter must be at least 1".into());
        }
        let cutoff = self.algorithm.err_cutoff;
        if !(cutoff > 0.0 && cutoff < 1.0) {
            return fail(format!("err_cutoff must lie in (0, 1), got {}", cutoff));
        }
        let init_max_err = self.algorithm.init_max_err;
        if !(init_max_err > 0.0) {
            return fail(format!("init_max_err must be positive, got {}", init_max_err));
        }
        match self.algorithm.eval_timeout_secs {
            Some(secs) if !(secs >= 0.0 && secs.is_finite()) => {
                return fail(format!("eval_timeout_secs must not be negative, got {}", secs))
            }
            _ => (),
        }
        if self.algorithm.init_max_draws == Some(0) {
            return fail("init_max_draws must be at least 1 when given".into());
        }

        Ok(())
    }
}
