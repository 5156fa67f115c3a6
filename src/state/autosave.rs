use crate::models::NoteId;
use crate::platform::TimerId;
use std::collections::HashMap;

/// Where one note's content write stands.
///
/// `Idle` is not stored: a note without an entry is idle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ChannelState {
    Idle,
    /// Quiet period running; `timer` fires the commit.
    Pending { generation: u64, timer: TimerId },
    /// Write in flight. `attempt` is 1 for the first try. `dirty` means the
    /// content changed since the write started and needs another one.
    Committing {
        generation: u64,
        attempt: u32,
        dirty: bool,
    },
    /// Last write failed; `timer` fires attempt number `attempt`.
    Backoff {
        generation: u64,
        attempt: u32,
        timer: TimerId,
    },
    /// Retries ran out. The local content is the only copy until the next
    /// edit or a teardown.
    Unsaved,
}

impl ChannelState {
    fn timer(&self) -> Option<TimerId> {
        match self {
            ChannelState::Pending { timer, .. } | ChannelState::Backoff { timer, .. } => {
                Some(*timer)
            }
            ChannelState::Idle | ChannelState::Committing { .. } | ChannelState::Unsaved => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Fired {
    Commit { attempt: u32 },
    Stale,
}

/// How a finished write leaves the channel.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Settled {
    Saved,
    /// Edited while in flight; the channel is idle and a new write is due.
    Rewrite,
    Stale,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Failed {
    Retry { attempt: u32 },
    GiveUp,
    /// Edited while in flight; the newer content gets a fresh write.
    Rewrite,
    Stale,
}

/// One debounced write channel per note.
///
/// Generations are unique across all notes, so a timer or completion that
/// belongs to a superseded edit can never match the current state. At most
/// one write per note is in flight.
#[derive(Debug, Default)]
pub(crate) struct AutosaveChannels {
    channels: HashMap<NoteId, ChannelState>,
    next_generation: u64,
}

impl AutosaveChannels {
    pub fn state(&self, note_id: &str) -> ChannelState {
        self.channels
            .get(note_id)
            .copied()
            .unwrap_or(ChannelState::Idle)
    }

    /// Idle notes may take server content; anything else holds local edits.
    pub fn is_idle(&self, note_id: &str) -> bool {
        !self.channels.contains_key(note_id)
    }

    pub fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Records an edit against a write in flight. Returns false when no write
    /// is in flight and the caller should arm a quiet period instead.
    pub fn mark_dirty(&mut self, note_id: &str) -> bool {
        match self.channels.get_mut(note_id) {
            Some(ChannelState::Committing { dirty, .. }) => {
                *dirty = true;
                true
            }
            _ => false,
        }
    }

    /// Removes the note's armed timer ahead of re-arming.
    pub fn take_timer(&mut self, note_id: &str) -> Option<TimerId> {
        let timer = self.state(note_id).timer()?;
        self.channels.remove(note_id);
        Some(timer)
    }

    /// New edit: start a quiet period, superseding whatever was waiting.
    pub fn arm(&mut self, note_id: &str, generation: u64, timer: TimerId) -> Option<TimerId> {
        self.channels
            .insert(
                note_id.to_string(),
                ChannelState::Pending { generation, timer },
            )
            .and_then(|prev| prev.timer())
    }

    pub fn fire(&mut self, note_id: &str, generation: u64) -> Fired {
        let attempt = match self.state(note_id) {
            ChannelState::Pending { generation: g, .. } if g == generation => 1,
            ChannelState::Backoff {
                generation: g,
                attempt,
                ..
            } if g == generation => attempt,
            _ => return Fired::Stale,
        };
        self.channels.insert(
            note_id.to_string(),
            ChannelState::Committing {
                generation,
                attempt,
                dirty: false,
            },
        );
        Fired::Commit { attempt }
    }

    /// True while `generation` is the write in flight for the note.
    pub fn is_committing(&self, note_id: &str, generation: u64) -> bool {
        matches!(
            self.state(note_id),
            ChannelState::Committing { generation: g, .. } if g == generation
        )
    }

    pub fn succeeded(&mut self, note_id: &str, generation: u64) -> Settled {
        match self.state(note_id) {
            ChannelState::Committing {
                generation: g,
                dirty,
                ..
            } if g == generation => {
                self.channels.remove(note_id);
                if dirty {
                    Settled::Rewrite
                } else {
                    Settled::Saved
                }
            }
            _ => Settled::Stale,
        }
    }

    pub fn failed(
        &mut self,
        note_id: &str,
        generation: u64,
        max_attempts: u32,
        retryable: bool,
    ) -> Failed {
        match self.state(note_id) {
            ChannelState::Committing {
                generation: g,
                dirty: true,
                ..
            } if g == generation => {
                self.channels.remove(note_id);
                Failed::Rewrite
            }
            ChannelState::Committing {
                generation: g,
                attempt,
                ..
            } if g == generation => {
                if retryable && attempt < max_attempts {
                    Failed::Retry {
                        attempt: attempt + 1,
                    }
                } else {
                    self.channels
                        .insert(note_id.to_string(), ChannelState::Unsaved);
                    Failed::GiveUp
                }
            }
            _ => Failed::Stale,
        }
    }

    pub fn arm_backoff(
        &mut self,
        note_id: &str,
        generation: u64,
        attempt: u32,
        timer: TimerId,
    ) -> bool {
        if !self.is_committing(note_id, generation) {
            return false;
        }
        self.channels.insert(
            note_id.to_string(),
            ChannelState::Backoff {
                generation,
                attempt,
                timer,
            },
        );
        true
    }

    /// Drops a write still inside its quiet period. Retries already past it
    /// keep going.
    pub fn cancel_pending(&mut self, note_id: &str) -> Option<TimerId> {
        match self.state(note_id) {
            ChannelState::Pending { timer, .. } => {
                self.channels.remove(note_id);
                Some(timer)
            }
            _ => None,
        }
    }

    /// Forgets the note entirely; in-flight completions become stale.
    pub fn teardown(&mut self, note_id: &str) -> Option<TimerId> {
        self.channels.remove(note_id).and_then(|s| s.timer())
    }

    pub fn teardown_all(&mut self) -> Vec<TimerId> {
        self.channels
            .drain()
            .filter_map(|(_, s)| s.timer())
            .collect()
    }
}
