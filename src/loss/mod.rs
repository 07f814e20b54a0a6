use std::{
    error::Error,
    panic::{self, AssertUnwindSafe},
};

use crate::{
    error::{ABCErr, ABCResult},
    types::fsum,
};

pub mod distance;

use distance::WeightedDistance;

pub type BoxedError = Box<dyn Error + Send + Sync>;
pub type ScoreResult = Result<f64, BoxedError>;

/// Scores how well a parameter vector reproduces the observed data.
///
/// Implementations may fail however they like; the engine turns every
/// failure into an infinite loss (see [`guarded_score`]).
pub trait LossEvaluator: Send + Sync {
    fn score(&self, p: &[f64]) -> ScoreResult;
}

/// Forward model producing the simulated summary statistics for a parameter vector.
pub trait Simulator: Send + Sync {
    fn simulate(&self, p: &[f64]) -> Result<Vec<f64>, BoxedError>;
}

/// Adapts a closure into a [`LossEvaluator`].
pub struct LossFn<F>(F);
impl<F> LossFn<F>
where
    F: Fn(&[f64]) -> ScoreResult + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}
impl<F> LossEvaluator for LossFn<F>
where
    F: Fn(&[f64]) -> ScoreResult + Send + Sync,
{
    fn score(&self, p: &[f64]) -> ScoreResult {
        (self.0)(p)
    }
}

/// Runs a simulation and measures its distance to the observations.
pub struct SummaryStatisticLoss<S> {
    simulator: S,
    distance: WeightedDistance,
}
impl<S: Simulator> SummaryStatisticLoss<S> {
    pub fn new(simulator: S, distance: WeightedDistance) -> Self {
        Self {
            simulator,
            distance,
        }
    }
}
impl<S: Simulator> LossEvaluator for SummaryStatisticLoss<S> {
    fn score(&self, p: &[f64]) -> ScoreResult {
        let simulated = self.simulator.simulate(p)?;
        Ok(self.distance.distance(&simulated))
    }
}

/// Total loss over several registered evaluators, e.g. one per experiment.
pub struct CombinedLoss {
    evaluators: Vec<Box<dyn LossEvaluator>>,
}
impl CombinedLoss {
    pub fn new(evaluators: Vec<Box<dyn LossEvaluator>>) -> ABCResult<Self> {
        if evaluators.is_empty() {
            return Err(ABCErr::ConfigurationError(
                "At least one loss evaluator must be registered".into(),
            ));
        }
        Ok(Self { evaluators })
    }

    pub fn len(&self) -> usize {
        self.evaluators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.evaluators.is_empty()
    }
}
impl LossEvaluator for CombinedLoss {
    fn score(&self, p: &[f64]) -> ScoreResult {
        let scores = self
            .evaluators
            .iter()
            .map(|e| e.score(p))
            .collect::<Result<Vec<f64>, _>>()?;
        Ok(fsum(scores))
    }
}

/// Evaluates the loss, mapping errors, panics, NaN and negative values to infinity.
pub fn guarded_score<L: LossEvaluator + ?Sized>(loss: &L, p: &[f64]) -> f64 {
    match panic::catch_unwind(AssertUnwindSafe(|| loss.score(p))) {
        Ok(result) => sanitise(result, p),
        Err(_) => {
            log::debug!("Loss evaluator panicked for {:?}", p);
            f64::INFINITY
        }
    }
}

fn sanitise(result: ScoreResult, p: &[f64]) -> f64 {
    match result {
        Ok(score) if score >= 0.0 => score,
        Ok(score) => {
            log::debug!("Invalid loss {} for {:?}", score, p);
            f64::INFINITY
        }
        Err(e) => {
            log::debug!("Loss evaluation failed for {:?}: {}", p, e);
            f64::INFINITY
        }
    }
}

#[cfg(test)]
mod tests {
    use super::distance::Observation;
    use super::*;

    struct Linear;
    impl Simulator for Linear {
        fn simulate(&self, p: &[f64]) -> Result<Vec<f64>, BoxedError> {
            if p[0] < 0.0 {
                return Err("negative slope not supported".into());
            }
            Ok((0..3).map(|x| p[0] * x as f64).collect())
        }
    }

    #[test]
    fn summary_statistic_loss() -> ABCResult<()> {
        let obs: Vec<Observation> = [0.0, 2.0, 4.0]
            .iter()
            .map(|v| Observation::new(*v, 0))
            .collect();
        let loss = SummaryStatisticLoss::new(Linear, WeightedDistance::new(&obs, 0.0)?);

        assert_eq!(0.0, guarded_score(&loss, &[2.0]));
        assert!(guarded_score(&loss, &[1.0]) > 0.0);
        assert_eq!(f64::INFINITY, guarded_score(&loss, &[-1.0]));
        Ok(())
    }

    #[test]
    fn failures_become_infinite() {
        let erroring = LossFn::new(|_| Err("solver diverged".into()));
        let panicking = LossFn::new(|_| panic!("boom"));
        let not_a_number = LossFn::new(|_| Ok(f64::NAN));
        let negative = LossFn::new(|_| Ok(-0.5));
        let fine = LossFn::new(|p| Ok(p[0].abs()));

        assert_eq!(f64::INFINITY, guarded_score(&erroring, &[1.0]));
        assert_eq!(f64::INFINITY, guarded_score(&panicking, &[1.0]));
        assert_eq!(f64::INFINITY, guarded_score(&not_a_number, &[1.0]));
        assert_eq!(f64::INFINITY, guarded_score(&negative, &[1.0]));
        assert_eq!(0.25, guarded_score(&fine, &[-0.25]));
    }

    #[test]
    fn combined_loss_sums_evaluators() -> ABCResult<()> {
        let combined = CombinedLoss::new(vec![
            Box::new(LossFn::new(|p| Ok(p[0]))),
            Box::new(LossFn::new(|p| Ok(2.0 * p[0]))),
        ])?;

        assert_eq!(2, combined.len());
        assert_eq!(3.0, guarded_score(&combined, &[1.0]));
        Ok(())
    }

    #[test]
    fn combined_loss_fails_if_any_evaluator_fails() -> ABCResult<()> {
        let combined = CombinedLoss::new(vec![
            Box::new(LossFn::new(|p| Ok(p[0]))),
            Box::new(LossFn::new(|_| Err("no data".into()))),
        ])?;

        assert_eq!(f64::INFINITY, guarded_score(&combined, &[1.0]));
        Ok(())
    }

    #[test]
    fn no_registered_evaluators_is_a_configuration_error() {
        assert!(matches!(
            CombinedLoss::new(vec![]),
            Err(ABCErr::ConfigurationError(_))
        ));
    }
}
