//! Weighted Euclidean distance between simulated and observed summary statistics.
//!
//! Each observed point is weighted so that experiments with many points, a
//! wide spread of values or large reported error bars don't dominate:
//!
//! `w = 1 / (err * sqrt(N_exp * IQR_exp))`, then normalised to a mean of one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics};

use crate::error::{ABCErr, ABCResult};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Observation {
    pub value: f64,
    /// Which experiment the point came from
    pub experiment: usize,
    /// Absolute error bar, if the experiment reported one
    #[serde(default)]
    pub error_bar: Option<f64>,
}
impl Observation {
    pub fn new(value: f64, experiment: usize) -> Self {
        Self {
            value,
            experiment,
            error_bar: None,
        }
    }

    pub fn with_error(value: f64, experiment: usize, error_bar: f64) -> Self {
        Self {
            value,
            experiment,
            error_bar: Some(error_bar),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeightedDistance {
    observed: Vec<f64>,
    weights: Vec<f64>,
}
impl WeightedDistance {
    /// `err_threshold` is a fraction of each experiment's IQR below which an
    /// error bar no longer increases the weight of its point.  Zero disables it.
    pub fn new(observations: &[Observation], err_threshold: f64) -> ABCResult<Self> {
        if observations.is_empty() {
            return Err(ABCErr::ConfigurationError(
                "Distance needs at least one observation".into(),
            ));
        }
        if let Some(o) = observations.iter().find(|o| !o.value.is_finite()) {
            return Err(ABCErr::ConfigurationError(format!(
                "Observed value {} in experiment {} is not finite",
                o.value, o.experiment
            )));
        }
        if !(err_threshold >= 0.0 && err_threshold.is_finite()) {
            return Err(ABCErr::ConfigurationError(format!(
                "Error threshold must be non-negative, got {}",
                err_threshold
            )));
        }

        let by_experiment = group_by_experiment(observations);
        let scale_by_exp: BTreeMap<usize, f64> = by_experiment
            .iter()
            .map(|(exp, values)| (*exp, experiment_scale(values)))
            .collect();
        let err_by_pt = error_weights(observations, err_threshold, &scale_by_exp);

        let mut weights: Vec<f64> = observations
            .iter()
            .zip(&err_by_pt)
            .map(|(o, err)| {
                let n = cast::f64(by_experiment[&o.experiment].len());
                1.0 / (err * (n * scale_by_exp[&o.experiment]).sqrt())
            })
            .collect();

        let mean_weight = weights.iter().sum::<f64>() / cast::f64(weights.len());
        weights.iter_mut().for_each(|w| *w /= mean_weight);
        log::debug!("Distance weights: {:?}", weights);

        Ok(Self {
            observed: observations.iter().map(|o| o.value).collect(),
            weights,
        })
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn observed(&self) -> &[f64] {
        &self.observed
    }

    /// Infinite when the simulation produced nothing usable.
    pub fn distance(&self, simulated: &[f64]) -> f64 {
        if simulated.is_empty()
            || simulated.len() != self.observed.len()
            || simulated.iter().any(|x| !x.is_finite())
        {
            return f64::INFINITY;
        }

        let d = simulated
            .iter()
            .zip(&self.observed)
            .zip(&self.weights)
            .map(|((x, y), w)| {
                let term = w * (x - y);
                term * term
            })
            .sum::<f64>()
            .sqrt();

        if d.is_finite() {
            d
        } else {
            f64::INFINITY
        }
    }
}

fn group_by_experiment(observations: &[Observation]) -> BTreeMap<usize, Vec<f64>> {
    let mut by_exp: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
    for o in observations {
        by_exp.entry(o.experiment).or_default().push(o.value);
    }
    by_exp
}

/// IQR of the experiment's values, or |value| for a lone point.
fn experiment_scale(values: &[f64]) -> f64 {
    let scale = if values.len() > 1 {
        Data::new(values.to_vec()).interquartile_range()
    } else {
        values.first().map(|v| v.abs()).unwrap_or(0.0)
    };

    if scale > 0.0 && scale.is_finite() {
        scale
    } else {
        // Every value the same
        1.0
    }
}

fn error_weights(
    observations: &[Observation],
    err_threshold: f64,
    scale_by_exp: &BTreeMap<usize, f64>,
) -> Vec<f64> {
    let raw: Vec<f64> = observations
        .iter()
        .map(|o| match o.error_bar {
            Some(err) if err > 0.0 && err.is_finite() => {
                if err_threshold > 0.0 {
                    let threshold = err_threshold * scale_by_exp[&o.experiment];
                    f64::max(err / threshold, 1.0)
                } else {
                    err
                }
            }
            _ => 1.0,
        })
        .collect();

    // Normalise to a mean of one within each experiment
    let mut totals: BTreeMap<usize, (f64, usize)> = BTreeMap::new();
    for (o, err) in observations.iter().zip(&raw) {
        let entry = totals.entry(o.experiment).or_insert((0.0, 0));
        entry.0 += err;
        entry.1 += 1;
    }

    observations
        .iter()
        .zip(raw)
        .map(|(o, err)| {
            let (total, count) = totals[&o.experiment];
            if count > 1 {
                err / total * cast::f64(count)
            } else {
                err
            }
        })
        .collect()
}
