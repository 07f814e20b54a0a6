use serde::{Deserialize, Serialize};

use crate::error::{ABCErr, ABCResult};

/// One calibrated value per model parameter.
pub type Parameters = Vec<f64>;

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Particle {
    pub parameters: Parameters,
    /// Loss recorded when the particle was accepted
    pub score: f64,
    pub weight: f64,
}

/// Fixed-size weighted collection of particles.  Weights always sum to one.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Population {
    acceptance: f32,
    normalised_particles: Vec<Particle>,
}
impl Population {
    /// Normalises the weights of `particles` with a compensated sum.
    pub fn new(mut particles: Vec<Particle>, acceptance: f32) -> ABCResult<Self> {
        let total_weight = fsum(particles.iter().map(|p| p.weight));
        if particles.is_empty() || !(total_weight.is_finite() && total_weight > 0.0) {
            return Err(ABCErr::ConfigurationError(format!(
                "Can't normalise {} particles with total weight {}",
                particles.len(),
                total_weight
            )));
        }
        if let Some(p) = particles.iter().find(|p| !(p.weight >= 0.0)) {
            return Err(ABCErr::ConfigurationError(format!(
                "Encountered invalid particle weight ({})",
                p.weight
            )));
        }

        #[allow(clippy::assign_op_pattern)]
        particles
            .iter_mut()
            .for_each(|p| p.weight = p.weight / total_weight);

        Ok(Self {
            acceptance,
            normalised_particles: particles,
        })
    }

    /// Equally weighted population, as produced by rejection sampling from the prior.
    pub fn uniform(scored: Vec<(Parameters, f64)>, acceptance: f32) -> ABCResult<Self> {
        let weight = 1.0 / cast::f64(scored.len().max(1));
        let particles = scored
            .into_iter()
            .map(|(parameters, score)| Particle {
                parameters,
                score,
                weight,
            })
            .collect();
        Self::new(particles, acceptance)
    }

    pub fn normalised_particles(&self) -> &Vec<Particle> {
        &self.normalised_particles
    }

    pub fn acceptance(&self) -> f32 {
        self.acceptance
    }

    pub fn len(&self) -> usize {
        self.normalised_particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.normalised_particles.is_empty()
    }

    pub fn weights(&self) -> Vec<f64> {
        self.normalised_particles.iter().map(|p| p.weight).collect()
    }

    pub fn dimension(&self) -> usize {
        self.normalised_particles
            .first()
            .map(|p| p.parameters.len())
            .unwrap_or(0)
    }

    /// Weighted posterior mean, per parameter.
    pub fn mean(&self) -> Vec<f64> {
        (0..self.dimension())
            .map(|d| {
                fsum(
                    self.normalised_particles
                        .iter()
                        .map(|p| p.weight * p.parameters[d]),
                )
            })
            .collect()
    }

    /// Weighted posterior variance, per parameter.
    pub fn variance(&self) -> Vec<f64> {
        self.mean()
            .into_iter()
            .enumerate()
            .map(|(d, mean)| {
                fsum(self.normalised_particles.iter().map(|p| {
                    let diff = p.parameters[d] - mean;
                    p.weight * diff * diff
                }))
            })
            .collect()
    }
}

/// Everything the scheduler needs to carry a run forward, and what gets checkpointed.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Generation {
    pub pop: Population,
    pub number: u32,
    /// Current acceptance ceiling on the loss
    pub threshold: f64,
    /// Amount the threshold drops by after the next successful generation
    pub shrink_step: f64,
    #[serde(default)]
    pub failed_attempts: u32,
}
impl Generation {
    /// Initial control values: half the mean initial loss, and the worst initial loss.
    pub fn initial(pop: Population) -> Self {
        let particles = pop.normalised_particles();
        let total_err = fsum(particles.iter().map(|p| p.score));
        let max_err = particles.iter().map(|p| p.score).fold(0.0, f64::max);
        let shrink_step = total_err / (2.0 * cast::f64(particles.len()));

        Self {
            pop,
            number: 0,
            threshold: max_err,
            shrink_step,
            failed_attempts: 0,
        }
    }

    pub fn relative_step(&self) -> f64 {
        self.shrink_step / self.threshold
    }

    /// True until a generation has been accepted.
    pub fn is_prior_sample(&self) -> bool {
        self.number == 0
    }

    pub fn is_converged(&self, err_cutoff: f64) -> bool {
        // NaN (zero threshold) counts as converged
        !(self.relative_step() > err_cutoff)
    }
}

/// Neumaier-compensated summation.
pub fn fsum<I: IntoIterator<Item = f64>>(values: I) -> f64 {
    let mut sum = 0.0;
    let mut compensation = 0.0;
    for v in values {
        let t = sum + v;
        if f64::abs(sum) >= f64::abs(v) {
            compensation += (sum - t) + v;
        } else {
            compensation += (v - t) + sum;
        }
        sum = t;
    }
    sum + compensation
}

#[cfg(test)]
mod tests {
    use super::*;

    fn particle(parameters: Vec<f64>, weight: f64) -> Particle {
        Particle {
            parameters,
            score: 0.0,
            weight,
        }
    }

    #[test]
    fn normalises_weights() -> ABCResult<()> {
        let pop = Population::new(
            vec![
                particle(vec![1.0], 1.0),
                particle(vec![2.0], 3.0),
                particle(vec![3.0], 4.0),
            ],
            0.5,
        )?;

        assert_eq!(vec![0.125, 0.375, 0.5], pop.weights());
        assert!((fsum(pop.weights()) - 1.0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn refuse_to_normalise_zero_or_invalid_weight() {
        let zero = Population::new(vec![particle(vec![1.0], 0.0)], 1.0);
        assert!(zero.is_err());

        let infinite = Population::new(
            vec![particle(vec![1.0], f64::INFINITY), particle(vec![1.0], 1.0)],
            1.0,
        );
        assert!(infinite.is_err());

        let negative = Population::new(
            vec![particle(vec![1.0], -1.0), particle(vec![1.0], 3.0)],
            1.0,
        );
        assert!(negative.is_err());

        assert!(Population::new(vec![], 1.0).is_err());
    }

    #[test]
    fn weighted_mean_and_variance() -> ABCResult<()> {
        let pop = Population::new(
            vec![particle(vec![0.0, 10.0], 1.0), particle(vec![2.0, 10.0], 3.0)],
            1.0,
        )?;

        assert_eq!(vec![1.5, 10.0], pop.mean());
        // 0.25 * 1.5^2 + 0.75 * 0.5^2
        assert_eq!(vec![0.75, 0.0], pop.variance());
        Ok(())
    }

    #[test]
    fn initial_control_values() -> ABCResult<()> {
        let pop = Population::uniform(
            vec![(vec![0.1], 0.2), (vec![0.2], 0.4), (vec![0.3], 0.6), (vec![0.4], 0.8)],
            1.0,
        )?;
        let gen = Generation::initial(pop);

        assert_eq!(0.8, gen.threshold);
        assert!((gen.shrink_step - 0.25).abs() < 1e-12);
        assert_eq!(0, gen.number);
        assert!(gen.is_prior_sample());
        assert!(!gen.is_converged(0.01));
        assert!(gen.is_converged(0.5));
        Ok(())
    }

    #[test]
    fn zero_initial_loss_counts_as_converged() -> ABCResult<()> {
        let pop = Population::uniform(vec![(vec![0.5], 0.0), (vec![0.5], 0.0)], 1.0)?;
        let gen = Generation::initial(pop);

        assert!(gen.relative_step().is_nan());
        assert!(gen.is_converged(0.01));
        Ok(())
    }

    #[test]
    fn compensated_sum_keeps_small_terms() {
        let values = vec![1.0, 1e100, 1.0, -1e100];
        assert_eq!(2.0, fsum(values.clone()));
        assert_eq!(0.0, values.iter().sum::<f64>());
    }
}
