use serde::{Deserialize, Serialize};

/// Kernel execution mode, fixed when the kernel is constructed.
///
/// `Live` records new history. `Replay` re-derives outputs and verifies
/// them against previously recorded history without real side effects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelMode {
    #[default]
    Live,
    Replay,
}

impl KernelMode {
    pub fn is_live(self) -> bool {
        matches!(self, KernelMode::Live)
    }

    pub fn is_replay(self) -> bool {
        matches!(self, KernelMode::Replay)
    }
}

impl std::fmt::Display for KernelMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KernelMode::Live => f.write_str("LIVE"),
            KernelMode::Replay => f.write_str("REPLAY"),
        }
    }
}
