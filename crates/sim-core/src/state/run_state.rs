/// Host-observable lifecycle of the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum CpuPhase {
    /// Nothing loaded yet.
    #[default]
    Idle,
    /// Program loaded and entry point set; no run in progress.
    Loaded,
    /// Run loop active and ticks flowing.
    Running,
    /// Run loop active with ticks withheld.
    Paused,
    /// Last run ended; a new program may be loaded.
    Stopped,
}

impl CpuPhase {
    /// True while a run loop owns the CPU.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    /// True when a run may be started.
    #[must_use]
    pub const fn can_start(self) -> bool {
        matches!(self, Self::Loaded | Self::Stopped)
    }
}
