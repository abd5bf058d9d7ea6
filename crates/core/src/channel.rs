use crate::types::{ChangeKind, ChannelState, StreamUpdate};

/// Holds the tracked channel's state and derives transitions from updates.
///
/// [`ChannelStateMachine::transition`] never mutates; callers resolve any
/// pending game name and then hand the result to [`ChannelStateMachine::commit`].
#[derive(Debug, Clone, Default)]
pub struct ChannelStateMachine {
    current: ChannelState,
}

impl ChannelStateMachine {
    pub fn new(initial: ChannelState) -> Self {
        Self { current: initial }
    }

    pub fn current(&self) -> &ChannelState {
        &self.current
    }

    /// Computes the change an update would cause against the current state.
    ///
    /// A game change wins over a simultaneous title change.
    pub fn transition(&self, update: &StreamUpdate) -> Transition {
        let previous = &self.current;
        match update {
            StreamUpdate::Offline if previous.online => Transition {
                kind: ChangeKind::WentOffline,
                next: ChannelState::offline(),
            },
            StreamUpdate::Offline => Transition::unchanged(previous),
            StreamUpdate::Live { game_id, title } if !previous.online => Transition {
                kind: ChangeKind::WentOnline,
                next: ChannelState::online(game_id.as_str(), "", title.as_str()),
            },
            StreamUpdate::Live { game_id, title } if *game_id != previous.game_id => Transition {
                kind: ChangeKind::GameChanged,
                next: ChannelState::online(game_id.as_str(), "", title.as_str()),
            },
            StreamUpdate::Live { title, .. } if *title != previous.title => Transition {
                kind: ChangeKind::TitleChanged,
                next: ChannelState::online(
                    previous.game_id.as_str(),
                    previous.game_name.as_str(),
                    title.as_str(),
                ),
            },
            StreamUpdate::Live { .. } => Transition::unchanged(previous),
        }
    }

    /// Applies a transition computed by [`ChannelStateMachine::transition`].
    pub fn commit(&mut self, transition: Transition) -> ChangeKind {
        if transition.kind != ChangeKind::NoChange {
            self.current = transition.next;
        }
        transition.kind
    }
}

/// Result of evaluating an update, not yet applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    kind: ChangeKind,
    next: ChannelState,
}

impl Transition {
    fn unchanged(current: &ChannelState) -> Self {
        Self {
            kind: ChangeKind::NoChange,
            next: current.clone(),
        }
    }

    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    pub fn next(&self) -> &ChannelState {
        &self.next
    }

    /// Game id whose display name must be resolved before committing.
    pub fn pending_game_id(&self) -> Option<&str> {
        match self.kind {
            ChangeKind::WentOnline | ChangeKind::GameChanged => Some(self.next.game_id.as_str()),
            _ => None,
        }
    }

    pub fn with_game_name(mut self, name: impl Into<String>) -> Self {
        self.next.game_name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn online_machine() -> ChannelStateMachine {
        ChannelStateMachine::new(ChannelState::online("gameA", "Game A", "titleA"))
    }

    #[test]
    fn empty_data_goes_offline() {
        let mut machine = online_machine();
        let transition = machine.transition(&StreamUpdate::Offline);
        assert_eq!(transition.kind(), ChangeKind::WentOffline);
        assert_eq!(transition.pending_game_id(), None);

        machine.commit(transition);
        assert_eq!(machine.current(), &ChannelState::offline());
    }

    #[test]
    fn identical_update_is_no_change() {
        let mut machine = online_machine();
        let transition = machine.transition(&StreamUpdate::live("gameA", "titleA"));
        assert_eq!(transition.kind(), ChangeKind::NoChange);

        assert_eq!(machine.commit(transition), ChangeKind::NoChange);
        assert_eq!(
            machine.current(),
            &ChannelState::online("gameA", "Game A", "titleA")
        );
    }

    #[test]
    fn new_game_is_game_changed() {
        let mut machine = online_machine();
        let transition = machine.transition(&StreamUpdate::live("gameB", "titleA"));
        assert_eq!(transition.kind(), ChangeKind::GameChanged);
        assert_eq!(transition.pending_game_id(), Some("gameB"));

        machine.commit(transition.with_game_name("Game B"));
        assert_eq!(
            machine.current(),
            &ChannelState::online("gameB", "Game B", "titleA")
        );
    }

    #[test]
    fn new_title_keeps_game_name() {
        let mut machine = online_machine();
        let transition = machine.transition(&StreamUpdate::live("gameA", "titleB"));
        assert_eq!(transition.kind(), ChangeKind::TitleChanged);
        assert_eq!(transition.pending_game_id(), None);

        machine.commit(transition);
        assert_eq!(
            machine.current(),
            &ChannelState::online("gameA", "Game A", "titleB")
        );
    }

    #[test]
    fn game_change_takes_precedence_over_title() {
        let machine = online_machine();
        let transition = machine.transition(&StreamUpdate::live("gameB", "titleB"));
        assert_eq!(transition.kind(), ChangeKind::GameChanged);
        assert_eq!(transition.next().title, "titleB");
    }

    #[test]
    fn offline_to_live_is_always_went_online() {
        // game and title match what was last seen, but the channel was offline
        let mut machine = ChannelStateMachine::new(ChannelState {
            online: false,
            game_id: "gameA".to_string(),
            game_name: "Game A".to_string(),
            title: "titleA".to_string(),
        });
        let transition = machine.transition(&StreamUpdate::live("gameA", "titleA"));
        assert_eq!(transition.kind(), ChangeKind::WentOnline);
        assert_eq!(transition.pending_game_id(), Some("gameA"));

        machine.commit(transition.with_game_name("Game A"));
        assert!(machine.current().online);
    }

    #[test]
    fn offline_while_offline_is_idempotent() {
        let mut machine = ChannelStateMachine::default();
        let transition = machine.transition(&StreamUpdate::Offline);
        assert_eq!(transition.kind(), ChangeKind::NoChange);
        machine.commit(transition);
        assert_eq!(machine.current(), &ChannelState::offline());
    }

    #[test]
    fn transition_does_not_mutate() {
        let machine = online_machine();
        let _ = machine.transition(&StreamUpdate::Offline);
        assert!(machine.current().online);
    }
}
