//! Stage transitions
//!
//! The pipeline is linear; any non-terminal stage may also fail.

use crate::error::PipelineError;
use crate::types::Stage;

/// Validates a stage transition
///
/// # Errors
/// `PipelineError::IllegalTransition` when `to` is not reachable from `from`.
pub fn validate_transition(from: Stage, to: Stage) -> Result<(), PipelineError> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(PipelineError::IllegalTransition { from, to })
    }
}

/// Stages reachable in one step from `from`
#[must_use]
pub fn allowed_transitions(from: Stage) -> Vec<Stage> {
    use Stage::*;
    match from {
        Init => vec![Analysis, Failed],
        Analysis => vec![Migration, Failed],
        Migration => vec![Validation, Failed],
        Validation => vec![Testing, Failed],
        Testing => vec![Complete, Failed],
        Complete | Failed => vec![],
    }
}

fn allowed(from: Stage, to: Stage) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL: [Stage; 7] = [
        Stage::Init,
        Stage::Analysis,
        Stage::Migration,
        Stage::Validation,
        Stage::Testing,
        Stage::Complete,
        Stage::Failed,
    ];

    #[test]
    fn happy_path_is_legal() {
        let path = [
            Stage::Init,
            Stage::Analysis,
            Stage::Migration,
            Stage::Validation,
            Stage::Testing,
            Stage::Complete,
        ];
        for w in path.windows(2) {
            validate_transition(w[0], w[1]).unwrap();
        }
    }

    #[test]
    fn skipping_a_stage_is_illegal() {
        assert_eq!(
            validate_transition(Stage::Analysis, Stage::Validation),
            Err(PipelineError::IllegalTransition {
                from: Stage::Analysis,
                to: Stage::Validation
            })
        );
    }

    #[test]
    fn terminal_states_are_final() {
        assert!(allowed_transitions(Stage::Complete).is_empty());
        assert!(allowed_transitions(Stage::Failed).is_empty());
    }

    proptest! {
        #[test]
        fn every_live_stage_can_fail(i in 0usize..7) {
            let from = ALL[i];
            prop_assert_eq!(
                validate_transition(from, Stage::Failed).is_ok(),
                !from.is_terminal()
            );
        }

        #[test]
        fn no_transition_goes_backwards(i in 0usize..7, j in 0usize..7) {
            let (from, to) = (ALL[i], ALL[j]);
            if validate_transition(from, to).is_ok() {
                prop_assert!(j > i);
            }
        }
    }
}
