use serde::Serialize;

/// What the toolbar badge shows for today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BadgeState {
    Visited,
    Clean,
}

impl BadgeState {
    pub fn text(self) -> &'static str {
        match self {
            BadgeState::Visited => "X",
            BadgeState::Clean => "OK",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            BadgeState::Visited => "Visited a tracked site today",
            BadgeState::Clean => "Clean today",
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            BadgeState::Visited => "#D93025",
            BadgeState::Clean => "#188038",
        }
    }
}

pub trait BadgeSink: Send + Sync {
    fn publish(&self, state: BadgeState);
}
