//! Dated slot index: cheap discovery of newly saved crashes.
//!
//! Next to the name tree, every date directory carries a date tree of
//! time-bucketed slots. Saving a crash drops a symlink to its name-tree
//! entry into the slot for "now", plus a back link (`date_root`) from the
//! entry to that slot:
//!
//! ```text
//! <root>/<YYYYMMDD>/date/<HH>/<MM>_<SS div interval>/
//!     <crash_id> -> ../../../../20240317/name/de/11/<crash_id>
//!     bucket_0/                    overflow once the slot is full
//!         <crash_id> -> ../../../../../20240317/name/de/11/<crash_id>
//! ```
//!
//! Slots are filed under the date of the save, not the date embedded in the
//! id, so the slot path always reflects when the link was written.
//!
//! A scan walks dates, hours and slots in ascending order and drains every
//! slot strictly older than the slot the scan started in. A writer is never
//! more than one slot behind the clock, so the slot being written to is
//! never drained while a save into it may still be in flight.

use std::collections::VecDeque;
use std::fmt;
use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crashkit_types::CrashId;

use crate::config::FsConfig;
use crate::error::{StoreError, StoreResult};
use crate::perms::{FilePolicy, UmaskGuard};
use crate::radix::{RadixLayout, DATE_ROOT_LINK};
use crate::traits::CrashIdStream;

/// Prefix of overflow sub-directories inside a full slot.
const BUCKET_PREFIX: &str = "bucket_";

/// A position in the date tree: date, hour, minute and slice of the minute.
///
/// Ordering is chronological.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotKey {
    pub date: NaiveDate,
    pub hour: u32,
    pub minute: u32,
    pub slice: u32,
}

impl SlotKey {
    /// The slot containing `at` for slots `interval` seconds wide.
    pub fn at(at: DateTime<Utc>, interval: u32) -> Self {
        Self {
            date: at.date_naive(),
            hour: at.hour(),
            minute: at.minute(),
            slice: at.second() / interval.max(1),
        }
    }

    /// Directory name of the hour level, e.g. `"10"`.
    pub fn hour_dir(&self) -> String {
        format!("{:02}", self.hour)
    }

    /// Directory name of the slot level, e.g. `"05_01"`.
    pub fn slot_dir(&self) -> String {
        format!("{:02}_{:02}", self.minute, self.slice)
    }

    /// Parse the hour and slot directory names back into a key.
    pub fn parse(date: NaiveDate, hour_dir: &str, slot_dir: &str) -> Option<Self> {
        let hour: u32 = hour_dir.parse().ok().filter(|h| *h < 24)?;
        let (minute, slice) = slot_dir.split_once('_')?;
        Some(Self {
            date,
            hour,
            minute: minute.parse().ok().filter(|m| *m < 60)?,
            slice: slice.parse().ok()?,
        })
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.date.format("%Y%m%d"),
            self.hour_dir(),
            self.slot_dir()
        )
    }
}

/// Maintains the date tree for one storage root.
#[derive(Clone, Debug)]
pub struct DateIndex {
    layout: Arc<RadixLayout>,
    policy: FilePolicy,
    date_branch_base: String,
    interval: u32,
    dump_dir_count: usize,
    skip_previous_slot: bool,
}

impl DateIndex {
    pub fn new(layout: Arc<RadixLayout>, config: &FsConfig) -> Self {
        Self {
            layout,
            policy: FilePolicy::from_config(config),
            date_branch_base: config.date_branch_base.clone(),
            interval: config.minute_slice_interval,
            dump_dir_count: config.dump_dir_count,
            skip_previous_slot: config.skip_previous_slot,
        }
    }

    /// The slot a save happening now lands in.
    pub fn current_slot(&self) -> SlotKey {
        SlotKey::at(self.layout.clock().now(), self.interval)
    }

    /// `<root>/<YYYYMMDD>/<date_branch_base>` for `date`.
    fn date_tree(&self, date: NaiveDate) -> PathBuf {
        self.layout.date_dir_for(date).join(&self.date_branch_base)
    }

    /// Directory of a slot.
    fn slot_path(&self, slot: &SlotKey) -> PathBuf {
        self.date_tree(slot.date)
            .join(slot.hour_dir())
            .join(slot.slot_dir())
    }

    /// Register a crash filed under `entry_date` as new.
    ///
    /// Any links left from an earlier save of the same id are dropped
    /// first, so a crash never has more than one forward and one back link.
    /// Link failures are logged and swallowed: the raw record is already
    /// safely in the name tree, and a missing link only delays discovery.
    pub fn link(&self, id: &CrashId, entry_date: NaiveDate) {
        let entry_dir = self.layout.entry_dir_on(id, entry_date);
        self.unlink(id, &entry_dir);

        let slot = self.current_slot();
        let slot_dir = self.slot_path(&slot);
        if let Err(e) = self.policy.create_dirs(&slot_dir) {
            warn!(crash_id = %id, slot = %slot, error = %e, "cannot create date slot");
            return;
        }
        let (link_dir, extra_depth) = match self.pick_bucket(&slot_dir) {
            Ok(found) => found,
            Err(e) => {
                warn!(crash_id = %id, slot = %slot, error = %e, "cannot pick slot bucket");
                return;
            }
        };

        // Both links are relative to the storage root.
        let mut to_entry = up(4 + extra_depth);
        to_entry.push(self.layout.date_dir_name(entry_date));
        to_entry.push(self.layout.entry_dir_from_date(id));
        let mut to_slot = up(self.layout.entry_depth_below_date(id) + 1);
        to_slot.push(self.layout.date_dir_name(slot.date));
        to_slot.push(&self.date_branch_base);
        to_slot.push(slot.hour_dir());
        to_slot.push(slot.slot_dir());
        if extra_depth == 1 {
            if let Some(bucket) = link_dir.file_name() {
                to_slot.push(bucket);
            }
        }

        let forward = link_dir.join(id.as_str());
        let backward = entry_dir.join(DATE_ROOT_LINK);
        let _umask = UmaskGuard::set(self.policy.umask);
        if let Err(e) = symlink(&to_entry, &forward) {
            warn!(crash_id = %id, path = %forward.display(), error = %e, "cannot create date-tree link");
            return;
        }
        if let Err(e) = symlink(&to_slot, &backward) {
            warn!(crash_id = %id, path = %backward.display(), error = %e, "cannot create date_root link");
        }
        debug!(crash_id = %id, slot = %slot, "crash indexed as new");
    }

    /// Drop the forward and back links of the crash stored in `entry_dir`.
    ///
    /// Missing links are expected (the crash may already have been
    /// drained) and are not reported.
    pub fn unlink(&self, id: &CrashId, entry_dir: &Path) {
        let backward = entry_dir.join(DATE_ROOT_LINK);
        match fs::canonicalize(&backward) {
            Ok(slot_dir) => remove_link(&slot_dir.join(id.as_str())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => debug!(crash_id = %id, error = %e, "cannot resolve date_root"),
        }
        remove_link(&backward);
    }

    /// Choose the directory a new link goes into: the slot itself while it
    /// has room, otherwise the first overflow bucket with room.
    fn pick_bucket(&self, slot_dir: &Path) -> StoreResult<(PathBuf, usize)> {
        if count_entries(slot_dir)? < self.dump_dir_count {
            return Ok((slot_dir.to_path_buf(), 0));
        }
        for n in 0.. {
            let bucket = slot_dir.join(format!("{BUCKET_PREFIX}{n}"));
            self.policy.create_dirs(&bucket)?;
            if count_entries(&bucket)? < self.dump_dir_count {
                return Ok((bucket, 1));
            }
        }
        unreachable!("bucket search is unbounded")
    }

    /// Start a scan for new crashes.
    ///
    /// The returned stream is lazy: directories are listed as the scan
    /// reaches them, and each id's links are removed once the consumer has
    /// taken it and asks for the next one (or drops the stream).
    pub fn scan(&self) -> CrashIdStream {
        let now = self.layout.clock().now();
        let current = SlotKey::at(now, self.interval);
        let threshold = if self.skip_previous_slot {
            SlotKey::at(now - Duration::seconds(i64::from(self.interval)), self.interval)
        } else {
            current
        };
        let dates = list_sorted(self.layout.root())
            .into_iter()
            .filter_map(|path| {
                let name = path.file_name()?.to_str()?;
                let date = NaiveDate::parse_from_str(name, "%Y%m%d").ok()?;
                Some((date, self.date_tree(date)))
            })
            .collect();
        debug!(slot = %current, "starting date-tree scan");
        Box::new(NewCrashes {
            index: self.clone(),
            threshold,
            current_hour: (current.date, current.hour),
            dates,
            hours: VecDeque::new(),
            open_hour: None,
            slots: VecDeque::new(),
            open_slot: None,
            entries: VecDeque::new(),
            handed_out: None,
        })
    }
}

/// An hour directory whose slots are being drained.
struct OpenHour {
    date: NaiveDate,
    hour: u32,
    path: PathBuf,
    skipped_any: bool,
}

enum SlotEntry {
    Visit(PathBuf),
    Cleanup(PathBuf),
}

/// Lazy walk over the date tree; see [`DateIndex::scan`].
struct NewCrashes {
    index: DateIndex,
    threshold: SlotKey,
    current_hour: (NaiveDate, u32),
    dates: VecDeque<(NaiveDate, PathBuf)>,
    hours: VecDeque<(NaiveDate, u32, PathBuf)>,
    open_hour: Option<OpenHour>,
    slots: VecDeque<PathBuf>,
    open_slot: Option<PathBuf>,
    entries: VecDeque<SlotEntry>,
    handed_out: Option<PathBuf>,
}

impl NewCrashes {
    /// Remove the links of the id returned by the previous `next` call.
    fn finish_handed_out(&mut self) {
        if let Some(link) = self.handed_out.take() {
            let backward = link.join(DATE_ROOT_LINK);
            let owning_slot = link.parent().and_then(|p| fs::canonicalize(p).ok());
            // Leave the back link alone if a re-save moved it elsewhere.
            if fs::canonicalize(&backward).ok() == owning_slot {
                remove_link(&backward);
            }
            remove_link(&link);
        }
    }

    /// Inspect one slot entry. Returns the crash id if it is ready.
    fn visit(&mut self, path: PathBuf) -> Option<CrashId> {
        let meta = match fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "slot entry vanished");
                return None;
            }
        };
        if meta.is_dir() {
            let mut children: VecDeque<SlotEntry> = list_sorted(&path)
                .into_iter()
                .map(SlotEntry::Visit)
                .collect();
            children.push_back(SlotEntry::Cleanup(path));
            while let Some(child) = children.pop_back() {
                self.entries.push_front(child);
            }
            return None;
        }
        if !meta.file_type().is_symlink() {
            let err = StoreError::corrupt(&path, "unexpected file in date slot");
            warn!(error = %err, "skipping slot entry");
            return None;
        }

        let name = path.file_name()?.to_str()?;
        let id = match CrashId::parse(name) {
            Ok(id) => id,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping slot entry");
                return None;
            }
        };
        if !path.exists() {
            debug!(crash_id = %id, "removing dangling date-tree link");
            remove_link(&path);
            return None;
        }
        if !path.join(self.index.layout.raw_file_name(&id)).is_file() {
            let err = StoreError::corrupt(&path, "linked entry has no raw metadata");
            warn!(crash_id = %id, error = %err, "leaving link for a later scan");
            return None;
        }
        self.handed_out = Some(path);
        Some(id)
    }

    fn open_next_hour(&mut self, date: NaiveDate, hour: u32, path: PathBuf) {
        let mut skipped_any = false;
        for slot_path in list_sorted(&path) {
            let key = slot_path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| SlotKey::parse(date, &format!("{hour:02}"), n));
            match key {
                Some(key) if key >= self.threshold => {
                    debug!(slot = %key, "skipping slot still open for writes");
                    skipped_any = true;
                }
                Some(_) => self.slots.push_back(slot_path),
                None => debug!(path = %slot_path.display(), "ignoring unrecognized slot"),
            }
        }
        self.open_hour = Some(OpenHour {
            date,
            hour,
            path,
            skipped_any,
        });
    }
}

impl Iterator for NewCrashes {
    type Item = CrashId;

    fn next(&mut self) -> Option<CrashId> {
        self.finish_handed_out();
        loop {
            if let Some(entry) = self.entries.pop_front() {
                match entry {
                    SlotEntry::Visit(path) => {
                        if let Some(id) = self.visit(path) {
                            return Some(id);
                        }
                    }
                    SlotEntry::Cleanup(path) => remove_empty_dir(&path),
                }
                continue;
            }
            if let Some(slot) = self.open_slot.take() {
                remove_empty_dir(&slot);
                continue;
            }
            if let Some(slot) = self.slots.pop_front() {
                self.entries = list_sorted(&slot).into_iter().map(SlotEntry::Visit).collect();
                self.open_slot = Some(slot);
                continue;
            }
            if let Some(hour) = self.open_hour.take() {
                if !hour.skipped_any && (hour.date, hour.hour) < self.current_hour {
                    remove_empty_dir(&hour.path);
                }
                continue;
            }
            if let Some((date, hour, path)) = self.hours.pop_front() {
                self.open_next_hour(date, hour, path);
                continue;
            }
            if let Some((date, tree)) = self.dates.pop_front() {
                for hour_path in list_sorted(&tree) {
                    let hour = hour_path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .and_then(|n| n.parse::<u32>().ok())
                        .filter(|h| *h < 24);
                    match hour {
                        Some(hour) => self.hours.push_back((date, hour, hour_path)),
                        None => debug!(path = %hour_path.display(), "ignoring unrecognized hour"),
                    }
                }
                continue;
            }
            return None;
        }
    }
}

impl Drop for NewCrashes {
    fn drop(&mut self) {
        self.finish_handed_out();
    }
}

/// `n` parent-directory components.
fn up(n: usize) -> PathBuf {
    (0..n).map(|_| "..").collect()
}

/// Children of `dir` sorted by name. A missing or unreadable directory
/// lists as empty.
fn list_sorted(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry.into_path()),
            Err(e) => {
                debug!(path = %dir.display(), error = %e, "cannot list directory");
                None
            }
        })
        .collect()
}

fn count_entries(dir: &Path) -> StoreResult<usize> {
    fs::read_dir(dir)
        .map(|entries| entries.count())
        .map_err(|e| StoreError::io(dir, e))
}

fn remove_link(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "cannot remove link"),
    }
}

/// Remove a drained directory. A directory that is not empty yet (a link
/// left for later, or a concurrent writer) is revisited by the next scan.
fn remove_empty_dir(path: &Path) {
    match fs::remove_dir(path) {
        Ok(()) => info!(path = %path.display(), "removed drained directory"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => debug!(path = %path.display(), error = %e, "directory kept for next scan"),
    }
}
