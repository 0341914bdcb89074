use std::fmt;

use crate::checkpoint::CheckpointError;
use crate::components::SelectionError;
use crate::config::ConfigError;
use crate::enumerate::EnumerationError;
use crate::sampler::SamplerError;

/// Failures that end the analysis of one component while the others
/// carry on.
#[derive(Debug)]
pub enum ComponentError {
    Enumeration(EnumerationError),
    /// Always a `SamplerError::NumericInstability`.
    Numeric(SamplerError),
}

impl fmt::Display for ComponentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentError::Enumeration(err) => write!(f, "{}", err),
            ComponentError::Numeric(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for ComponentError {}

impl From<EnumerationError> for ComponentError {
    fn from(err: EnumerationError) -> Self {
        ComponentError::Enumeration(err)
    }
}

/// Failures that abort the whole run.
#[derive(Debug)]
pub enum EstimatorError {
    Config(ConfigError),
    Selection(SelectionError),
    Checkpoint(CheckpointError),
    Interrupted { component: usize, generation: usize },
    /// A chain state that does not fit its component's path set.
    StateMismatch {
        component: usize,
        expected: usize,
        found: usize,
    },
    ThreadPool(String),
}

impl fmt::Display for EstimatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EstimatorError::Config(err) => write!(f, "{}", err),
            EstimatorError::Selection(err) => write!(f, "{}", err),
            EstimatorError::Checkpoint(err) => write!(f, "{}", err),
            EstimatorError::Interrupted {
                component,
                generation,
            } => write!(
                f,
                "Interrupted while sampling component {} at generation {}",
                component, generation
            ),
            EstimatorError::StateMismatch {
                component,
                expected,
                found,
            } => write!(
                f,
                "Component {}: chain state holds {} frequencies for {} paths",
                component, found, expected
            ),
            EstimatorError::ThreadPool(msg) => {
                write!(f, "Failed to configure thread pool: {}", msg)
            }
        }
    }
}

impl std::error::Error for EstimatorError {}

impl From<ConfigError> for EstimatorError {
    fn from(err: ConfigError) -> Self {
        EstimatorError::Config(err)
    }
}

impl From<SelectionError> for EstimatorError {
    fn from(err: SelectionError) -> Self {
        EstimatorError::Selection(err)
    }
}

impl From<CheckpointError> for EstimatorError {
    fn from(err: CheckpointError) -> Self {
        EstimatorError::Checkpoint(err)
    }
}

/// Sort a sampler failure into the scope it belongs to.
pub(crate) fn scope_sampler_error(
    err: SamplerError,
    component: usize,
) -> Result<ComponentError, EstimatorError> {
    match err {
        SamplerError::NumericInstability { .. } => Ok(ComponentError::Numeric(err)),
        SamplerError::Interrupted { generation } => Err(EstimatorError::Interrupted {
            component,
            generation,
        }),
        SamplerError::StateMismatch { expected, found } => Err(EstimatorError::StateMismatch {
            component,
            expected,
            found,
        }),
        SamplerError::Checkpoint(err) => Err(EstimatorError::Checkpoint(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_failures_stay_with_their_component() {
        let err = SamplerError::NumericInstability {
            generation: 12,
            frequencies: vec![0.0, 1.0],
            log_likelihood: f64::NEG_INFINITY,
        };
        match scope_sampler_error(err, 3) {
            Ok(ComponentError::Numeric(SamplerError::NumericInstability { generation, .. })) => {
                assert_eq!(generation, 12)
            }
            other => panic!("expected a component failure, got {:?}", other),
        }
    }

    #[test]
    fn other_sampler_failures_end_the_run() {
        assert!(matches!(
            scope_sampler_error(SamplerError::Interrupted { generation: 40 }, 3),
            Err(EstimatorError::Interrupted {
                component: 3,
                generation: 40
            })
        ));
        assert!(matches!(
            scope_sampler_error(
                SamplerError::StateMismatch {
                    expected: 2,
                    found: 1
                },
                3
            ),
            Err(EstimatorError::StateMismatch { component: 3, .. })
        ));
    }
}
