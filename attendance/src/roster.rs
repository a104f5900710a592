//! Per-session roster of enrolled students and their attendance status.
//!
//! The store is mutated through exactly three entry points:
//! [`bulk_load`](RosterStore::bulk_load), [`mark_present`](RosterStore::mark_present)
//! and [`toggle`](RosterStore::toggle). Counts and filtered views are computed
//! from the live entries on every call.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::finalize::{FinalizedEntry, FinalizedRoster};

/// One student's attendance status within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    #[serde(alias = "studentId")]
    pub student_id: String,
    #[serde(alias = "studentName", default)]
    pub student_name: String,
    #[serde(alias = "studentUSN", alias = "studentUsn", default)]
    pub student_usn: String,
    /// Enrolled students default to absent.
    #[serde(default)]
    pub present: bool,
}

impl RosterEntry {
    pub fn new(
        student_id: impl Into<String>,
        student_name: impl Into<String>,
        student_usn: impl Into<String>,
    ) -> Self {
        Self {
            student_id: student_id.into(),
            student_name: student_name.into(),
            student_usn: student_usn.into(),
            present: false,
        }
    }

    pub fn with_present(mut self, present: bool) -> Self {
        self.present = present;
        self
    }
}

/// Whether the roster has been fetched.
///
/// `Loaded` with zero entries means "nobody enrolled", which is different
/// from `Idle` ("never fetched").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    Idle,
    Loading,
    Loaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RosterStats {
    pub present: usize,
    pub absent: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFilter {
    #[default]
    All,
    Present,
    Absent,
}

impl StatusFilter {
    pub fn matches(self, entry: &RosterEntry) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Present => entry.present,
            StatusFilter::Absent => !entry.present,
        }
    }
}

/// Status filter plus an optional case-insensitive search over name and USN.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterQuery {
    #[serde(default)]
    pub status: StatusFilter,
    #[serde(default)]
    pub q: Option<String>,
}

impl RosterQuery {
    pub fn status(status: StatusFilter) -> Self {
        Self { status, q: None }
    }

    pub fn search(mut self, q: impl Into<String>) -> Self {
        self.q = Some(q.into());
        self
    }

    fn needle(&self) -> Option<String> {
        self.q
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }
}

/// Result of applying a check-in to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    Marked,
    AlreadyPresent,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct RosterStore {
    entries: Vec<RosterEntry>,
    index: HashMap<String, usize>,
    load_state: LoadState,
    ever_loaded: bool,
    /// Ids flipped by hand; their status survives a reload.
    corrected: HashSet<String>,
}

impl Default for RosterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RosterStore {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            load_state: LoadState::Idle,
            ever_loaded: false,
            corrected: HashSet::new(),
        }
    }

    pub fn load_state(&self) -> LoadState {
        self.load_state
    }

    pub fn is_loaded(&self) -> bool {
        self.load_state == LoadState::Loaded
    }

    /// True once any fetch has succeeded, even while a refetch is in flight.
    pub fn has_loaded(&self) -> bool {
        self.ever_loaded
    }

    /// Marks a fetch as in flight. Returns `false` if one already is.
    pub fn begin_loading(&mut self) -> bool {
        if self.load_state == LoadState::Loading {
            return false;
        }
        self.load_state = LoadState::Loading;
        true
    }

    /// Ends an in-flight fetch that failed, keeping whatever was loaded before.
    pub fn fail_loading(&mut self) {
        if self.load_state == LoadState::Loading {
            self.load_state = if self.ever_loaded {
                LoadState::Loaded
            } else {
                LoadState::Idle
            };
        }
    }

    /// Replaces the whole collection, keeping server order.
    ///
    /// Duplicate student ids keep their first occurrence. Students that were
    /// toggled by hand keep their local status. Returns how many duplicates
    /// were discarded.
    pub fn bulk_load(&mut self, incoming: Vec<RosterEntry>) -> usize {
        let mut entries = Vec::with_capacity(incoming.len());
        let mut index = HashMap::with_capacity(incoming.len());
        let mut dropped = 0;

        for entry in incoming {
            if index.contains_key(&entry.student_id) {
                tracing::warn!(
                    "Discarding duplicate roster entry for student {}",
                    entry.student_id
                );
                dropped += 1;
                continue;
            }
            let mut entry = entry;
            if let Some(local) = self.corrected_status(&entry.student_id) {
                entry.present = local;
            }
            index.insert(entry.student_id.clone(), entries.len());
            entries.push(entry);
        }

        self.corrected.retain(|id| index.contains_key(id));
        self.entries = entries;
        self.index = index;
        self.ever_loaded = true;
        self.load_state = LoadState::Loaded;
        dropped
    }

    /// Sets one student present. Unknown ids are never inserted.
    pub fn mark_present(&mut self, student_id: &str) -> MarkOutcome {
        match self.index.get(student_id) {
            Some(&i) if self.entries[i].present => MarkOutcome::AlreadyPresent,
            Some(&i) => {
                self.entries[i].present = true;
                MarkOutcome::Marked
            }
            None => MarkOutcome::Unknown,
        }
    }

    /// Flips one student's status in place and returns the new value.
    pub fn toggle(&mut self, student_id: &str) -> Option<bool> {
        let i = *self.index.get(student_id)?;
        let entry = &mut self.entries[i];
        entry.present = !entry.present;
        self.corrected.insert(student_id.to_string());
        Some(entry.present)
    }

    fn corrected_status(&self, student_id: &str) -> Option<bool> {
        if !self.corrected.contains(student_id) {
            return None;
        }
        self.get(student_id).map(|e| e.present)
    }

    pub fn get(&self, student_id: &str) -> Option<&RosterEntry> {
        self.index.get(student_id).map(|&i| &self.entries[i])
    }

    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> RosterStats {
        let present = self.entries.iter().filter(|e| e.present).count();
        RosterStats {
            present,
            absent: self.entries.len() - present,
            total: self.entries.len(),
        }
    }

    pub fn filter(&self, status: StatusFilter) -> impl Iterator<Item = &RosterEntry> {
        self.entries.iter().filter(move |e| status.matches(e))
    }

    pub fn query(&self, query: &RosterQuery) -> Vec<&RosterEntry> {
        let needle = query.needle();
        self.filter(query.status)
            .filter(|e| match &needle {
                Some(n) => {
                    e.student_name.to_lowercase().contains(n)
                        || e.student_usn.to_lowercase().contains(n)
                }
                None => true,
            })
            .collect()
    }

    /// Projects every entry to `{student_id, present}` in store order.
    pub fn snapshot(&self) -> FinalizedRoster {
        FinalizedRoster {
            entries: self
                .entries
                .iter()
                .map(|e| FinalizedEntry {
                    student_id: e.student_id.clone(),
                    present: e.present,
                })
                .collect(),
        }
    }
}
