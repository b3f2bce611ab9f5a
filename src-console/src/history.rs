//! Rolling frame history feeding the waterfall view.

use std::collections::VecDeque;
use std::sync::Arc;

use rfscan_common::{SpectrumFrame, BIN_COUNT};

/// Rows kept for the waterfall.
pub const HISTORY_CAPACITY: usize = 300;

/// Fixed-length, most-recent-first store of frames.
///
/// Slots that have not been filled yet hold `None`, the null-frame placeholder.
/// The length never changes after construction.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    rows: VecDeque<Option<Arc<SpectrumFrame>>>,
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryBuffer {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rows: std::iter::repeat(None).take(capacity.max(1)).collect(),
        }
    }

    /// Insert at the head and evict the oldest row.
    pub fn push(&mut self, frame: Arc<SpectrumFrame>) {
        self.rows.pop_back();
        self.rows.push_front(Some(frame));
    }

    /// Always equal to `capacity()`.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.rows.len()
    }

    /// Number of slots holding a real frame.
    pub fn filled(&self) -> usize {
        self.rows.iter().filter(|row| row.is_some()).count()
    }

    pub fn newest(&self) -> Option<&Arc<SpectrumFrame>> {
        self.rows.front().and_then(Option::as_ref)
    }

    /// Rows, newest first.
    pub fn rows(&self) -> impl Iterator<Item = Option<&SpectrumFrame>> + '_ {
        self.rows.iter().map(|row| row.as_deref())
    }

    /// The `capacity x BIN_COUNT` matrix handed to the plotting surface.
    /// Placeholder rows are all `None`.
    pub fn matrix(&self) -> Vec<Vec<Option<u32>>> {
        self.rows
            .iter()
            .map(|row| match row {
                Some(frame) => frame.counts().iter().copied().map(Some).collect(),
                None => vec![None; BIN_COUNT],
            })
            .collect()
    }
}
