//! Persistent experience ("learning") store: an on-disk multimap from
//! position keys to move records, loaded at startup, extended during play
//! and rewritten atomically on exit. File format is fixed 24-byte records
//! so foreign experience files stay interchangeable.

use crate::chess_move::Move;
use bytemuck::{Pod, Zeroable};
use parking_lot::Mutex;
use rand::Rng;
use std::{
    collections::HashMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use thiserror::Error;
use vesper_types::{Eval, Key};

pub const RECORD_SIZE: usize = 24;

lazy_static::lazy_static! {
    /// One nonce per process so concurrent instances keep rewriting their
    /// own shard instead of scattering new files on every persist.
    static ref PROCESS_NONCE: u64 = rand::thread_rng().gen();
}

#[derive(Debug, Error)]
pub enum ExperienceError {
    #[error("experience file `{0}` has size {1}, not a multiple of {RECORD_SIZE}")]
    BadSize(PathBuf, u64),
    #[error("io error on `{0}`: {1}")]
    Io(PathBuf, std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearningMode {
    Off,
    Standard,
    SelfLearning,
}

impl LearningMode {
    pub fn from_option(value: &str) -> Self {
        match value {
            "Off" => Self::Off,
            "Standard" => Self::Standard,
            _ => Self::SelfLearning,
        }
    }

    pub fn is_enabled(self) -> bool {
        self != Self::Off
    }
}

/// On-disk layout, host byte order. The padding word keeps the record at
/// 24 bytes and is always written as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
struct RawRecord {
    key: u64,
    depth: i16,
    score: i16,
    mv: i32,
    performance: i32,
    _pad: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LearningMove {
    pub depth: i32,
    pub score: Eval,
    pub mv: Move,
    pub performance: i32,
}

impl LearningMove {
    fn from_raw(raw: &RawRecord) -> Self {
        Self {
            depth: raw.depth as i32,
            score: Eval::new(raw.score as i32),
            mv: Move::from_raw(raw.mv as u16),
            performance: raw.performance,
        }
    }

    fn to_raw(self, key: Key) -> RawRecord {
        RawRecord {
            key,
            depth: self.depth.clamp(i16::MIN as i32, i16::MAX as i32) as i16,
            score: self.score.inner().clamp(i16::MIN as i32, i16::MAX as i32) as i16,
            mv: self.mv.raw() as i32,
            performance: self.performance,
            _pad: 0,
        }
    }
}

struct Inner {
    /// Buckets keep the current best move in slot zero.
    table: HashMap<Key, Vec<LearningMove>>,
    needs_persisting: bool,
    paused: bool,
}

pub struct ExperienceStore {
    inner: Mutex<Inner>,
    mode: LearningMode,
    read_only: bool,
    concurrent: bool,
    directory: PathBuf,
}

impl ExperienceStore {
    pub fn new(mode: LearningMode, read_only: bool, concurrent: bool, directory: impl Into<PathBuf>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                table: HashMap::new(),
                needs_persisting: false,
                paused: false,
            }),
            mode,
            read_only,
            concurrent,
            directory: directory.into(),
        }
    }

    pub fn mode(&self) -> LearningMode {
        self.mode
    }

    pub fn is_enabled(&self) -> bool {
        self.mode.is_enabled()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn pause(&self) {
        self.inner.lock().paused = true;
    }

    pub fn resume(&self) {
        self.inner.lock().paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    pub fn len(&self) -> usize {
        self.inner.lock().table.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().table.is_empty()
    }

    fn live_path(&self) -> PathBuf {
        self.directory.join("experience.exp")
    }

    /// Loads the main file plus any leftover `_new` / sharded files and
    /// consolidates them back into one, the way a crashed or concurrent
    /// session leaves them behind.
    pub fn init(&self) {
        if !self.is_enabled() {
            return;
        }

        let q_learning = self.mode == LearningMode::SelfLearning;
        let _ = self.load_file(&self.live_path(), q_learning);

        let mut stale = Vec::new();
        let new_file = self.directory.join("experience_new.exp");
        if matches!(self.load_file(&new_file, q_learning), Ok(true)) {
            stale.push(new_file);
        }

        for i in 0.. {
            let shard = self.directory.join(format!("experience{i}.exp"));
            match self.load_file(&shard, q_learning) {
                Ok(true) => stale.push(shard),
                _ => break,
            }
        }

        if !stale.is_empty() {
            let _ = self.persist();
            for path in stale {
                let _ = fs::remove_file(path);
            }
        }

        self.inner.lock().needs_persisting = false;
    }

    /// Appends one file's records. `Ok(false)` means the file does not
    /// exist; malformed files are refused whole.
    fn load_file(&self, path: &Path, q_learning: bool) -> Result<bool, ExperienceError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(ExperienceError::Io(path.to_owned(), e)),
        };

        if bytes.len() % RECORD_SIZE != 0 {
            eprintln!(
                "info string experience file {} has invalid size {}, ignoring it",
                path.display(),
                bytes.len()
            );
            return Err(ExperienceError::BadSize(path.to_owned(), bytes.len() as u64));
        }

        let mut inner = self.inner.lock();
        for chunk in bytes.chunks_exact(RECORD_SIZE) {
            let raw: RawRecord = bytemuck::pod_read_unaligned(chunk);
            insert_or_update(&mut inner, raw.key, LearningMove::from_raw(&raw), q_learning);
        }

        Ok(true)
    }

    /// Buffered insertion used while searching; serialized by the store
    /// mutex so workers and the MCTS never interleave half-updates.
    pub fn add_new_learning(&self, key: Key, lm: LearningMove) {
        if !self.is_enabled() {
            return;
        }

        let q_learning = self.mode == LearningMode::SelfLearning;
        let mut inner = self.inner.lock();
        if inner.paused {
            return;
        }
        insert_or_update(&mut inner, key, lm, q_learning);
    }

    /// All stored moves for `key`, best first.
    pub fn probe(&self, key: Key) -> Vec<LearningMove> {
        self.inner.lock().table.get(&key).cloned().unwrap_or_default()
    }

    pub fn probe_move(&self, key: Key, mv: Move) -> Option<LearningMove> {
        self.inner
            .lock()
            .table
            .get(&key)
            .and_then(|bucket| bucket.iter().find(|lm| lm.mv == mv).copied())
    }

    /// Atomic rewrite: new content goes to `experience_new.exp`, the live
    /// file is removed and the new one renamed over it. Depth-zero probes
    /// never reach the disk. Errors keep memory intact and the dirty flag
    /// set so a later attempt can retry.
    pub fn persist(&self) -> Result<(), ExperienceError> {
        if self.read_only || !self.is_enabled() {
            return Ok(());
        }

        {
            let inner = self.inner.lock();
            if inner.table.is_empty() || !inner.needs_persisting {
                return Ok(());
            }
        }

        let (live, temp) = if self.concurrent {
            let nonce: u64 = *PROCESS_NONCE;
            (
                self.directory.join(format!("experience-{nonce:016x}.exp")),
                self.directory.join(format!("experience_new-{nonce:016x}.exp")),
            )
        } else {
            (self.live_path(), self.directory.join("experience_new.exp"))
        };

        let result = self.write_records(&temp).and_then(|()| {
            let _ = fs::remove_file(&live);
            fs::rename(&temp, &live).map_err(|e| ExperienceError::Io(live.clone(), e))
        });

        match result {
            Ok(()) => {
                self.inner.lock().needs_persisting = false;
                Ok(())
            }
            Err(e) => {
                eprintln!("info string failed to persist experience: {e}");
                Err(e)
            }
        }
    }

    fn write_records(&self, path: &Path) -> Result<(), ExperienceError> {
        let mut file = fs::File::create(path).map_err(|e| ExperienceError::Io(path.to_owned(), e))?;

        let inner = self.inner.lock();
        for (&key, bucket) in &inner.table {
            for lm in bucket {
                if lm.depth == 0 {
                    continue;
                }
                let raw = lm.to_raw(key);
                file.write_all(bytemuck::bytes_of(&raw))
                    .map_err(|e| ExperienceError::Io(path.to_owned(), e))?;
            }
        }

        Ok(())
    }
}

/// Replacement and best-tracking rules shared by file loading and live
/// updates. In Q-learning mode the best move is the highest score; in
/// standard mode the lexicographic (depth, score) maximum.
fn insert_or_update(inner: &mut Inner, key: Key, lm: LearningMove, q_learning: bool) {
    let bucket = inner.table.entry(key).or_default();

    if bucket.is_empty() {
        bucket.push(lm);
        inner.needs_persisting = true;
        return;
    }

    let candidate_idx = match bucket.iter().position(|e| e.mv == lm.mv) {
        None => {
            bucket.push(lm);
            inner.needs_persisting = true;
            Some(bucket.len() - 1)
        }
        Some(idx) => {
            let existing = &mut bucket[idx];
            if existing.depth < lm.depth || (existing.depth == lm.depth && existing.score < lm.score) {
                *existing = lm;
                inner.needs_persisting = true;
                Some(idx)
            } else {
                None
            }
        }
    };

    let Some(idx) = candidate_idx else { return };
    if idx == 0 {
        return;
    }

    let candidate = bucket[idx];
    let best = bucket[0];

    let new_best = if q_learning {
        candidate.score > best.score
    } else {
        best.depth < candidate.depth || (best.depth == candidate.depth && best.score <= candidate.score)
    };

    if new_best {
        bucket.swap(0, idx);
        inner.needs_persisting = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chess_move::MoveFlag;
    use vesper_types::Square;

    fn mv(from: Square, to: Square) -> Move {
        Move::new(from, to, MoveFlag::Quiet)
    }

    fn lm(depth: i32, score: i32, m: Move) -> LearningMove {
        LearningMove {
            depth,
            score: Eval::new(score),
            mv: m,
            performance: 50,
        }
    }

    #[test]
    fn raw_record_is_24_bytes() {
        assert_eq!(std::mem::size_of::<RawRecord>(), RECORD_SIZE);
    }

    #[test]
    fn best_move_occupies_slot_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = ExperienceStore::new(LearningMode::Standard, false, false, dir.path());

        let weak = mv(Square::E2, Square::E3);
        let strong = mv(Square::E2, Square::E4);

        store.add_new_learning(1, lm(4, 10, weak));
        store.add_new_learning(1, lm(8, 30, strong));

        let bucket = store.probe(1);
        assert_eq!(bucket.len(), 2);
        assert_eq!(bucket[0].mv, strong);
    }

    #[test]
    fn deeper_entry_replaces_same_move() {
        let dir = tempfile::tempdir().unwrap();
        let store = ExperienceStore::new(LearningMode::Standard, false, false, dir.path());
        let m = mv(Square::D2, Square::D4);

        store.add_new_learning(1, lm(4, 10, m));
        store.add_new_learning(1, lm(6, -5, m));
        assert_eq!(store.probe_move(1, m).unwrap().depth, 6);

        // Shallower information never downgrades the entry.
        store.add_new_learning(1, lm(5, 100, m));
        assert_eq!(store.probe_move(1, m).unwrap().depth, 6);

        // Same depth, better score does.
        store.add_new_learning(1, lm(6, 40, m));
        assert_eq!(store.probe_move(1, m).unwrap().score, Eval::new(40));
    }

    #[test]
    fn q_learning_best_is_by_score() {
        let dir = tempfile::tempdir().unwrap();
        let store = ExperienceStore::new(LearningMode::SelfLearning, false, false, dir.path());

        let deep = mv(Square::E2, Square::E4);
        let sharp = mv(Square::G2, Square::G4);

        store.add_new_learning(1, lm(12, 10, deep));
        store.add_new_learning(1, lm(4, 80, sharp));

        assert_eq!(store.probe(1)[0].mv, sharp);
    }

    #[test]
    fn persist_then_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ExperienceStore::new(LearningMode::Standard, false, false, dir.path());

        store.add_new_learning(1, lm(8, 30, mv(Square::E2, Square::E4)));
        store.add_new_learning(1, lm(4, 10, mv(Square::E2, Square::E3)));
        store.add_new_learning(2, lm(6, -20, mv(Square::G8, Square::F6)));
        // Depth-zero probes are in-memory only.
        store.add_new_learning(3, lm(0, 0, mv(Square::B1, Square::C3)));

        store.persist().unwrap();

        let reloaded = ExperienceStore::new(LearningMode::Standard, false, false, dir.path());
        reloaded.init();

        assert_eq!(reloaded.probe(1).len(), 2);
        assert_eq!(reloaded.probe(1)[0].mv, mv(Square::E2, Square::E4));
        assert_eq!(reloaded.probe(2).len(), 1);
        assert!(reloaded.probe(3).is_empty(), "depth-0 entries must be dropped on write");
    }

    #[test]
    fn bad_sized_file_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experience.exp");
        fs::write(&path, [0u8; RECORD_SIZE + 3]).unwrap();

        let store = ExperienceStore::new(LearningMode::Standard, false, false, dir.path());
        store.init();
        assert!(store.is_empty());
    }

    #[test]
    fn shards_are_consolidated_on_init() {
        let dir = tempfile::tempdir().unwrap();

        // A shard left behind by a concurrent instance.
        let writer = ExperienceStore::new(LearningMode::Standard, false, false, dir.path());
        writer.add_new_learning(7, lm(5, 15, mv(Square::C2, Square::C4)));
        writer.persist().unwrap();
        fs::rename(dir.path().join("experience.exp"), dir.path().join("experience0.exp")).unwrap();

        let store = ExperienceStore::new(LearningMode::Standard, false, false, dir.path());
        store.init();

        assert_eq!(store.probe(7).len(), 1);
        assert!(dir.path().join("experience.exp").exists());
        assert!(!dir.path().join("experience0.exp").exists());
    }

    #[test]
    fn read_only_mode_never_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = ExperienceStore::new(LearningMode::Standard, true, false, dir.path());
        store.add_new_learning(1, lm(5, 5, mv(Square::A2, Square::A4)));
        store.persist().unwrap();
        assert!(!dir.path().join("experience.exp").exists());
    }

    #[test]
    fn off_mode_is_inert() {
        let dir = tempfile::tempdir().unwrap();
        let store = ExperienceStore::new(LearningMode::Off, false, false, dir.path());
        store.add_new_learning(1, lm(5, 5, mv(Square::A2, Square::A4)));
        assert!(store.is_empty());
    }
}
