use crate::error::TreeError;
use crate::types::PanelState;

/// Validates a panel lifecycle transition.
///
/// `Removed` is terminal: a node in that state is pruned, and a later message
/// to the same path creates a fresh node instead of reviving it.
pub fn validate_transition(from: PanelState, to: PanelState) -> Result<(), TreeError> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(TreeError::IllegalTransition { from, to })
    }
}

/// States reachable from `from` in one pass
pub fn allowed_transitions(from: PanelState) -> Vec<PanelState> {
    use PanelState::*;
    match from {
        // Active -> Removed happens when a tick samples past the whole window
        Active => vec![Active, Fading, Removed],
        Fading => vec![Fading, Active, Removed],
        Removed => vec![],
    }
}

fn allowed(from: PanelState, to: PanelState) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removed_is_terminal() {
        assert!(allowed_transitions(PanelState::Removed).is_empty());
        assert!(matches!(
            validate_transition(PanelState::Removed, PanelState::Active),
            Err(TreeError::IllegalTransition { .. })
        ));
    }

    #[test]
    fn new_message_revives_fading() {
        assert!(validate_transition(PanelState::Fading, PanelState::Active).is_ok());
    }

    #[test]
    fn coarse_tick_may_skip_fading() {
        assert!(validate_transition(PanelState::Active, PanelState::Removed).is_ok());
    }
}
