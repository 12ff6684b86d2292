use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RevertState {
    #[default]
    Idle,
    PendingRevert,
}

/// Clipboard content before and after the latest content-changing trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardSnapshot {
    pub original: String,
    pub transformed: String,
}

/// Before/after pair offered to diff viewers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiffPair {
    pub original: String,
    pub modified: String,
    pub available: bool,
}

/// What recording a transformation did to the revert state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Text unchanged; nothing stored.
    Unchanged,
    /// New source text; a fresh snapshot was taken.
    Stored { generation: u64 },
    /// Ran on the engine's own output; the stored original was kept
    /// under a new generation.
    Extended { generation: u64 },
    /// Changed, but temporary clipboard storage is off.
    NotStored,
}

impl RecordOutcome {
    pub fn generation(&self) -> Option<u64> {
        match self {
            Self::Stored { generation } | Self::Extended { generation } => Some(*generation),
            Self::Unchanged | Self::NotStored => None,
        }
    }
}

/// Tracks the original/transformed clipboard pair and the revert state.
///
/// Every recorded change bumps `generation`, including a rerun that keeps
/// the stored original. Delayed reverts carry the generation they were
/// scheduled for and become no-ops once it moves on.
#[derive(Debug, Default)]
pub struct HistoryManager {
    state: RevertState,
    snapshot: Option<ClipboardSnapshot>,
    last_diff: Option<(String, String)>,
    generation: u64,
}

impl HistoryManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RevertState {
        self.state
    }

    pub fn snapshot(&self) -> Option<&ClipboardSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether `text` is what the engine itself last wrote.
    pub fn holds_own_output(&self, text: &str) -> bool {
        self.snapshot
            .as_ref()
            .is_some_and(|snapshot| snapshot.transformed == text)
    }

    pub fn record(
        &mut self,
        original: &str,
        transformed: &str,
        temporary_clipboard: bool,
    ) -> RecordOutcome {
        if original == transformed {
            self.last_diff = None;
            return RecordOutcome::Unchanged;
        }

        self.last_diff = Some((original.to_string(), transformed.to_string()));

        if !temporary_clipboard {
            self.discard();
            return RecordOutcome::NotStored;
        }

        if self.state == RevertState::PendingRevert && self.holds_own_output(original) {
            if let Some(snapshot) = self.snapshot.as_mut() {
                snapshot.transformed = transformed.to_string();
            }
            self.generation += 1;
            debug!(
                generation = self.generation,
                "Transformed own output again; keeping stored original"
            );
            return RecordOutcome::Extended {
                generation: self.generation,
            };
        }

        self.generation += 1;
        self.snapshot = Some(ClipboardSnapshot {
            original: original.to_string(),
            transformed: transformed.to_string(),
        });
        self.state = RevertState::PendingRevert;
        debug!(generation = self.generation, "Stored clipboard snapshot");
        RecordOutcome::Stored {
            generation: self.generation,
        }
    }

    /// Ends a pending revert after the original was written back.
    pub fn complete_revert(&mut self) -> Option<ClipboardSnapshot> {
        let snapshot = self.snapshot.take();
        self.state = RevertState::Idle;
        self.last_diff = None;
        snapshot
    }

    /// The user copied something new; the snapshot no longer applies.
    pub fn observe_external_copy(&mut self) {
        if self.snapshot.is_some() {
            debug!("Clipboard changed externally; dropping snapshot");
        }
        self.discard();
    }

    /// Temporary clipboard storage switched off: forget without restoring.
    pub fn disable(&mut self) {
        self.discard();
    }

    fn discard(&mut self) {
        self.snapshot = None;
        self.state = RevertState::Idle;
    }

    pub fn last_diff_pair(&self) -> DiffPair {
        match &self.last_diff {
            Some((original, modified)) => DiffPair {
                original: original.clone(),
                modified: modified.clone(),
                available: true,
            },
            None => DiffPair::default(),
        }
    }
}
