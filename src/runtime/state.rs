//! 服务器生命周期状态

use std::fmt;

/// 服务器状态
///
/// `Created -> Starting -> Running -> Stopping -> Stopped`，`Stopped` 为终态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl ServerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerState::Created => "CREATED",
            ServerState::Starting => "STARTING",
            ServerState::Running => "RUNNING",
            ServerState::Stopping => "STOPPING",
            ServerState::Stopped => "STOPPED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ServerState::Stopped)
    }

    /// 部署单元能否在此状态下注册服务
    pub fn accepts_registrations(&self) -> bool {
        !self.is_terminal()
    }

    /// 状态机允许的下一步
    pub fn can_transition_to(&self, next: ServerState) -> bool {
        use ServerState::*;
        matches!(
            (self, next),
            (Created, Starting)
                | (Starting, Running)
                | (Created, Stopping)
                | (Starting, Stopping)
                | (Running, Stopping)
                | (Stopping, Stopped)
        )
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
