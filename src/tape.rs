//! Multi-track measurement tape.
//!
//! The tape is a bounded ring of measurement columns, one track per sampling
//! source. Each track keeps a short list of sampling periods and the columns
//! recorded under them:
//!
//! ```text
//! track 0: periods [300, 600]      columns [c0@0, c1@0, c2@1]
//! track 1: periods [60]            columns []            (placeholder period)
//! ```
//!
//! Producers add columns; the codec reads the *outstanding* columns (those not
//! yet packed into a message) without clearing them; the Mailer releases the
//! columns covered by a message once the collector acknowledged it. Columns
//! carry a per-track sequence number so a release removes exactly what was
//! sent, even if producers kept appending in the meantime.

use crate::error::{critical_error, TapeError};
use parking_lot::Mutex;

// =============================================================================
// Capacity Limits
// =============================================================================

/// Number of tracks on the tape.
pub const MAX_TRACKS_COUNT: usize = 12;

/// Periods retained per track.
pub const MAX_PERIODS_COUNT: usize = 3;

/// Columns retained per track.
pub const MAX_COLUMNS_COUNT: usize = 50;

/// Measurements per column.
pub const MAX_COLUMN_WIDTH: usize = 12;

/// Free-slot signal returned by [`TapeStore::add_column`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnSlots {
    /// This many more columns fit on the track.
    Free(usize),
    /// The track is full; the producer should trigger packing now.
    Exhausted,
}

impl ColumnSlots {
    /// True when the producer should request packing.
    pub fn should_pack(self) -> bool {
        matches!(self, ColumnSlots::Exhausted)
    }
}

/// One measurement vector recorded at a sample instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Per-track sequence number, strictly increasing
    pub seq: u64,
    /// Index into the owning track's period list
    pub period_index: usize,
    /// Measurement values
    pub values: Vec<i32>,
}

/// Outstanding content of one track, as handed to the codec.
///
/// `periods` holds only the periods referenced by `columns`, and the columns'
/// `period_index` values are relative to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackSnapshot {
    /// Track index
    pub track: usize,
    /// Referenced periods, oldest first
    pub periods: Vec<u32>,
    /// Outstanding columns, oldest first
    pub columns: Vec<Column>,
}

/// Per-track high-water sequence numbers covered by one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TapeMark {
    through: [Option<u64>; MAX_TRACKS_COUNT],
}

impl TapeMark {
    /// Records that `track` is covered up to and including `seq`.
    pub fn cover(&mut self, track: usize, seq: u64) {
        if let Some(slot) = self.through.get_mut(track) {
            *slot = Some(slot.map_or(seq, |s| s.max(seq)));
        }
    }

    /// Highest covered sequence number of `track`.
    pub fn covered(&self, track: usize) -> Option<u64> {
        self.through.get(track).copied().flatten()
    }

    /// True when the mark covers no column.
    pub fn is_empty(&self) -> bool {
        self.through.iter().all(Option::is_none)
    }

    fn iter(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.through
            .iter()
            .enumerate()
            .filter_map(|(track, seq)| seq.map(|s| (track, s)))
    }
}

#[derive(Debug, Default)]
struct Track {
    periods: Vec<u32>,
    columns: Vec<Column>,
    next_seq: u64,
    packed_through: Option<u64>,
}

impl Track {
    fn last_period(&self) -> Option<u32> {
        self.periods.last().copied()
    }

    /// The last period has no column recorded under it yet.
    fn last_is_placeholder(&self) -> bool {
        match self.periods.len() {
            0 => false,
            n => self.columns.last().map_or(true, |c| c.period_index != n - 1),
        }
    }

    fn is_outstanding(&self, column: &Column) -> bool {
        self.packed_through.map_or(true, |p| column.seq > p)
    }

    /// Returns true when the track changed.
    fn register_period(&mut self, track: usize, period: u32) -> bool {
        if self.last_period() == Some(period) {
            return false;
        }
        if self.last_is_placeholder() {
            if let Some(last) = self.periods.last_mut() {
                *last = period;
            }
        } else if self.periods.len() >= MAX_PERIODS_COUNT {
            tracing::warn!(
                track,
                period,
                dropped_columns = self.columns.len(),
                "Period list full, restarting track"
            );
            self.periods.clear();
            self.columns.clear();
            self.periods.push(period);
        } else {
            self.periods.push(period);
        }
        true
    }

    fn rewind(&mut self) {
        self.columns.clear();
        if let Some(last) = self.last_period() {
            self.periods = vec![last];
        }
    }

    /// Drops periods no longer referenced by any column and rebases indices.
    fn compact_periods(&mut self) {
        let Some(first) = self.columns.first().map(|c| c.period_index) else {
            self.rewind();
            return;
        };
        if first == 0 {
            return;
        }
        self.periods.drain(..first);
        for column in &mut self.columns {
            column.period_index -= first;
        }
    }

    fn snapshot(&self, track: usize) -> Option<TrackSnapshot> {
        let outstanding: Vec<&Column> = self
            .columns
            .iter()
            .filter(|c| self.is_outstanding(c))
            .collect();
        let first = outstanding.first()?.period_index;
        let last = outstanding.last()?.period_index;
        Some(TrackSnapshot {
            track,
            periods: self.periods.get(first..=last)?.to_vec(),
            columns: outstanding
                .into_iter()
                .map(|c| Column {
                    seq: c.seq,
                    period_index: c.period_index - first,
                    values: c.values.clone(),
                })
                .collect(),
        })
    }
}

#[derive(Debug)]
struct Tape {
    tracks: Vec<Track>,
    revision: u64,
}

impl Tape {
    fn track_mut(&mut self, track: usize) -> Result<&mut Track, TapeError> {
        self.tracks.get_mut(track).ok_or(TapeError::TrackOutOfRange {
            track,
            max: MAX_TRACKS_COUNT,
        })
    }

    fn track(&self, track: usize) -> Result<&Track, TapeError> {
        self.tracks.get(track).ok_or(TapeError::TrackOutOfRange {
            track,
            max: MAX_TRACKS_COUNT,
        })
    }
}

/// Thread-safe tape shared by producers, the Packer and the Mailer.
#[derive(Debug)]
pub struct TapeStore {
    inner: Mutex<Tape>,
}

impl Default for TapeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TapeStore {
    /// Creates an empty tape with [`MAX_TRACKS_COUNT`] tracks.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Tape {
                tracks: (0..MAX_TRACKS_COUNT).map(|_| Track::default()).collect(),
                revision: 0,
            }),
        }
    }

    /// Registers a sampling period without a measurement.
    ///
    /// Repeating the current period is a no-op. A period registered this way
    /// is a placeholder until a column is recorded under it, and is replaced
    /// by the next different period.
    pub fn update_period(&self, track: usize, period: u32) -> Result<(), TapeError> {
        if period == 0 {
            return Err(TapeError::ZeroPeriod);
        }
        let mut tape = self.inner.lock();
        let changed = tape.track_mut(track)?.register_period(track, period);
        if changed {
            tape.revision += 1;
        }
        Ok(())
    }

    /// Appends a measurement column sampled under `period`.
    ///
    /// A column arriving on a full track restarts the track's columns and
    /// keeps only its last period. Errors leave every track untouched.
    pub fn add_column(
        &self,
        track: usize,
        period: u32,
        measurements: &[i32],
    ) -> Result<ColumnSlots, TapeError> {
        if period == 0 {
            return Err(TapeError::ZeroPeriod);
        }
        if measurements.is_empty() || measurements.len() > MAX_COLUMN_WIDTH {
            return Err(TapeError::BadColumnWidth {
                len: measurements.len(),
                max: MAX_COLUMN_WIDTH,
            });
        }

        let mut tape = self.inner.lock();
        let t = tape.track_mut(track)?;
        if t.columns.len() >= MAX_COLUMNS_COUNT {
            tracing::warn!(track, "Tape track full, wrapping");
            t.rewind();
        }
        t.register_period(track, period);

        let seq = t.next_seq;
        t.next_seq += 1;
        let Some(period_index) = t.periods.len().checked_sub(1) else {
            critical_error("tape track has no period after registration");
        };
        t.columns.push(Column {
            seq,
            period_index,
            values: measurements.to_vec(),
        });
        let free = MAX_COLUMNS_COUNT - t.columns.len();
        tape.revision += 1;

        Ok(if free == 0 {
            ColumnSlots::Exhausted
        } else {
            ColumnSlots::Free(free)
        })
    }

    /// Most recent period of `track`, 0 when none is registered.
    pub fn last_period(&self, track: usize) -> Result<u32, TapeError> {
        Ok(self.inner.lock().track(track)?.last_period().unwrap_or(0))
    }

    /// Number of columns held by `track`.
    pub fn records_count(&self, track: usize) -> Result<usize, TapeError> {
        Ok(self.inner.lock().track(track)?.columns.len())
    }

    /// Clears the columns of `track`, keeping its most recent period.
    pub fn rewind(&self, track: usize) -> Result<(), TapeError> {
        let mut tape = self.inner.lock();
        tape.track_mut(track)?.rewind();
        tape.revision += 1;
        Ok(())
    }

    /// Rewinds every track.
    pub fn restart_measurements(&self) {
        let mut tape = self.inner.lock();
        for track in &mut tape.tracks {
            track.rewind();
        }
        tape.revision += 1;
    }

    /// Outstanding columns of every track that has any, oldest first.
    pub fn snapshot(&self) -> Vec<TrackSnapshot> {
        let tape = self.inner.lock();
        tape.tracks
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.snapshot(i))
            .collect()
    }

    /// True when at least one column has not been packed yet.
    pub fn has_outstanding(&self) -> bool {
        let tape = self.inner.lock();
        tape.tracks
            .iter()
            .any(|t| t.columns.iter().any(|c| t.is_outstanding(c)))
    }

    /// Excludes the columns covered by `mark` from later snapshots.
    pub fn mark_packed(&self, mark: &TapeMark) {
        let mut tape = self.inner.lock();
        for (i, seq) in mark.iter() {
            if let Some(t) = tape.tracks.get_mut(i) {
                t.packed_through = Some(t.packed_through.map_or(seq, |p| p.max(seq)));
            }
        }
    }

    /// Removes the columns covered by `mark` from the tape.
    pub fn release(&self, mark: &TapeMark) {
        if mark.is_empty() {
            return;
        }
        let mut tape = self.inner.lock();
        for (i, seq) in mark.iter() {
            if let Some(t) = tape.tracks.get_mut(i) {
                let before = t.columns.len();
                t.columns.retain(|c| c.seq > seq);
                if t.columns.len() != before {
                    t.compact_periods();
                }
            }
        }
        tape.revision += 1;
    }

    /// Counter bumped on every mutation.
    pub fn revision(&self) -> u64 {
        self.inner.lock().revision
    }
}
