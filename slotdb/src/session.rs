//! Session aggregation: turning activity pulses into slots.
//!
//! A target is either idle or has an open session `(start, last)`. Active
//! pulses extend the session while they arrive within the expiry gap of the
//! previous one; an inactive pulse, a late active pulse, or an expiration
//! sweep closes it and flushes a [`Slot`] to the [`SlotStore`].
//!
//! | state         | pulse           | condition            | effect                                   |
//! |---------------|-----------------|----------------------|------------------------------------------|
//! | idle          | active `ts`     |                      | open `(ts, ts+1)`                        |
//! | idle          | inactive `ts`   |                      | flush `(ts, 1)`                          |
//! | open `(s, l)` | active `ts`     | `ts - l > exp`       | flush `(s, l-s)`, open `(ts, ts+1)`      |
//! | open `(s, l)` | active `ts`     | `l < ts <= l + exp`  | open `(s, ts)`                           |
//! | open `(s, l)` | active `ts`     | `ts <= l`            | ignored                                  |
//! | open `(s, l)` | inactive `ts`   | `ts - l > exp`       | flush `(s, l-s)` and `(ts, 1)`, idle     |
//! | open `(s, l)` | inactive `ts`   | otherwise            | flush `(s, max(ts, l) - s)`, idle        |
//!
//! All transitions run under one aggregator-wide lock, and the session table
//! is written through to `action_index.json` after every change so open
//! sessions survive a restart.

use std::path::Path;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{Result, SessionError};
use crate::index::KeyValueIndex;
use crate::slot::{Slot, SlotStore};

/// Name of the session index file in the store directory.
pub(crate) const ACTION_INDEX_FILE: &str = "action_index.json";

/// Length in bytes of a persisted session record.
pub const ACTION_RECORD_LEN: usize = 8;

/// An open session of one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    /// Timestamp of the first pulse of the session.
    pub start: u32,
    /// Timestamp of the latest pulse accepted into the session.
    pub last: u32,
}

impl Session {
    /// Encodes the session as `start` then `last`, both u32 little-endian.
    pub fn to_bytes(self) -> [u8; ACTION_RECORD_LEN] {
        let mut out = [0u8; ACTION_RECORD_LEN];
        out[..4].copy_from_slice(&self.start.to_le_bytes());
        out[4..].copy_from_slice(&self.last.to_le_bytes());
        out
    }

    /// Decodes a persisted session record of `target`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidActionRecord`] unless `bytes` is
    /// exactly 8 bytes long.
    pub fn from_bytes(target: &str, bytes: &[u8]) -> std::result::Result<Self, SessionError> {
        let record: [u8; ACTION_RECORD_LEN] =
            bytes
                .try_into()
                .map_err(|_| SessionError::InvalidActionRecord {
                    target: target.to_string(),
                    len: bytes.len(),
                })?;

        Ok(Self {
            start: u32::from_le_bytes([record[0], record[1], record[2], record[3]]),
            last: u32::from_le_bytes([record[4], record[5], record[6], record[7]]),
        })
    }
}

/// Outcome of applying one pulse to a target's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Slots to append, in order.
    pub flushed: Vec<Slot>,
    /// State after the pulse; `None` is idle.
    pub next: Option<Session>,
}

/// Computes the effect of a pulse on a target's current state.
pub fn transition(current: Option<Session>, active: bool, ts: u32, expiry: u32) -> Transition {
    let fresh = Session {
        start: ts,
        last: ts.saturating_add(1),
    };

    let Some(open) = current else {
        return if active {
            Transition {
                flushed: Vec::new(),
                next: Some(fresh),
            }
        } else {
            Transition {
                flushed: vec![Slot::new(ts, 1)],
                next: None,
            }
        };
    };

    let closed = Slot::new(open.start, open.last.saturating_sub(open.start));
    let stale = ts.saturating_sub(open.last) > expiry;

    match (active, stale) {
        (true, true) => Transition {
            flushed: vec![closed],
            next: Some(fresh),
        },
        (true, false) if ts > open.last => Transition {
            flushed: Vec::new(),
            next: Some(Session {
                start: open.start,
                last: ts,
            }),
        },
        (true, false) => Transition {
            flushed: Vec::new(),
            next: Some(open),
        },
        (false, true) => Transition {
            flushed: vec![closed, Slot::new(ts, 1)],
            next: None,
        },
        (false, false) => Transition {
            flushed: vec![Slot::new(
                open.start,
                ts.max(open.last).saturating_sub(open.start),
            )],
            next: None,
        },
    }
}

/// Snapshot of all open sessions as parallel columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenSessions {
    /// Target names, sorted.
    pub targets: Vec<String>,
    /// Session start per target.
    pub starts: Vec<u32>,
    /// Latest accepted pulse per target.
    pub lasts: Vec<u32>,
}

impl OpenSessions {
    /// Number of open sessions.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether no session is open.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Table of open sessions, persisted write-through.
#[derive(Debug)]
pub struct SessionAggregator {
    sessions: KeyValueIndex<Vec<u8>>,
    gate: Mutex<()>,
    expiry: u32,
}

impl SessionAggregator {
    /// Opens the session table stored at `path`.
    ///
    /// Every persisted record is validated; reloaded sessions are open again
    /// with their stored values. No expiration sweep runs on load.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded or holds a record that is
    /// not 8 bytes long.
    pub fn open<P: AsRef<Path>>(path: P, expiry: u32) -> Result<Self> {
        let sessions = KeyValueIndex::open(path)?;
        let aggregator = Self {
            sessions,
            gate: Mutex::new(()),
            expiry,
        };

        let reloaded = aggregator.decode_all()?;
        if !reloaded.is_empty() {
            info!(sessions = reloaded.len(), "reloaded open sessions");
        }

        Ok(aggregator)
    }

    /// Maximum gap between pulses of one session, in seconds.
    pub fn expiry(&self) -> u32 {
        self.expiry
    }

    /// Applies an active or inactive pulse for `target` at `ts`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored record is invalid, a flushed slot cannot
    /// be appended, or the session table cannot be persisted. When the first
    /// append fails the session state is left unchanged.
    pub fn pulse(&self, slots: &SlotStore, target: &str, active: bool, ts: u32) -> Result<()> {
        let _gate = self.gate.lock();

        let current = self
            .sessions
            .get(target)
            .map(|bytes| Session::from_bytes(target, &bytes))
            .transpose()?;
        let step = transition(current, active, ts, self.expiry);

        debug!(
            target_name = target,
            active,
            ts,
            ?current,
            next = ?step.next,
            flushed = step.flushed.len(),
            "session pulse"
        );

        for slot in &step.flushed {
            slots.append(target, slot.start, slot.duration)?;
        }

        if step.next != current {
            match step.next {
                Some(session) => self
                    .sessions
                    .insert(target.to_string(), session.to_bytes().to_vec())?,
                None => {
                    self.sessions.remove(target)?;
                }
            }
        }

        Ok(())
    }

    /// Closes every session whose last pulse is more than the expiry gap
    /// before `now`, flushing `(start, last - start)` for each.
    ///
    /// Returns whether any session was closed. Sessions flushed before a
    /// failure are still removed, so a retry does not duplicate their slots.
    ///
    /// # Errors
    ///
    /// Returns an error if a record is invalid, an append fails, or the
    /// table cannot be persisted.
    pub fn sweep_expired(&self, slots: &SlotStore, now: u32) -> Result<bool> {
        let _gate = self.gate.lock();

        let expired: Vec<(String, Session)> = self
            .decode_all()?
            .into_iter()
            .filter(|(_, session)| now.saturating_sub(session.last) > self.expiry)
            .collect();

        let mut closed = Vec::with_capacity(expired.len());
        let mut failure = None;
        for (target, session) in expired {
            match slots.append(&target, session.start, session.last.saturating_sub(session.start)) {
                Ok(()) => {
                    info!(target_name = %target, start = session.start, last = session.last, "expired session");
                    closed.push(target);
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if !closed.is_empty() {
            self.sessions.update(|table| {
                for target in &closed {
                    table.remove(target);
                }
            })?;
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(!closed.is_empty()),
        }
    }

    /// Snapshot of all open sessions.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidActionRecord`] if a record is invalid.
    pub fn open_sessions(&self) -> Result<OpenSessions> {
        let mut out = OpenSessions::default();
        for (target, session) in self.decode_all()? {
            out.targets.push(target);
            out.starts.push(session.start);
            out.lasts.push(session.last);
        }
        Ok(out)
    }

    fn decode_all(&self) -> Result<Vec<(String, Session)>> {
        self.sessions
            .entries()
            .into_iter()
            .map(|(target, bytes)| -> Result<(String, Session)> {
                let session = Session::from_bytes(&target, &bytes)?;
                Ok((target, session))
            })
            .collect()
    }
}
