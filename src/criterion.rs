//! Information criteria scoring a fitted path set. Lower is better.

/// What a criterion needs to know about a fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelFit {
    pub log_likelihood: f64,
    pub n_paths: usize,
    /// Alignments informative for the full path set.
    pub n_observations: usize,
}

pub trait InformationCriterion: Send + Sync {
    fn name(&self) -> &'static str;

    /// Free parameters of a fit. Frequencies live on the simplex, so
    /// one of them is determined by the rest.
    fn n_parameters(&self, fit: &ModelFit) -> usize {
        fit.n_paths.saturating_sub(1)
    }

    fn score(&self, fit: &ModelFit) -> f64;
}

/// Akaike: 2k − 2 ln L
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Aic;

impl InformationCriterion for Aic {
    fn name(&self) -> &'static str {
        "AIC"
    }

    fn score(&self, fit: &ModelFit) -> f64 {
        2.0 * self.n_parameters(fit) as f64 - 2.0 * fit.log_likelihood
    }
}

/// Bayesian: k ln n − 2 ln L
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Bic;

impl InformationCriterion for Bic {
    fn name(&self) -> &'static str {
        "BIC"
    }

    fn score(&self, fit: &ModelFit) -> f64 {
        let n = fit.n_observations.max(1) as f64;
        self.n_parameters(fit) as f64 * n.ln() - 2.0 * fit.log_likelihood
    }
}
