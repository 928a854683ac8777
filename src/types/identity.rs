//! Cache identity of a query.
//!
//! A query has a *stable* identity and, once it has been touched in the
//! editor, an *edit* identity derived from the last-edited timestamp.
//! While the caller is editing, reads and writes use the edit identity only
//! so that transient edits never pollute the stable entry. Once editing
//! settles, the first read promotes whatever the edit identity holds to the
//! stable identity.

use super::query::MetricQuery;
use crate::clock::truncate_to_minute;

/// A query whose `to` is within this many seconds of "now" is treated as a
/// rolling "last X time" query.
pub const LAST_X_THRESHOLD_SECS: i64 = 90;

/// Identity keys for one query at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryIdentity {
    pub stable: String,
    pub edit: Option<String>,
    pub editing: bool,
    pub last_x_time: bool,
}

/// Outcome of looking up a query identity in a keyed namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyResolution {
    /// Entry present under this key.
    Hit(String),
    /// Entry must move from `from` to `to` before being read under `to`.
    Promote { from: String, to: String },
    /// Nothing cached; writes go to this key.
    Miss(String),
}

impl KeyResolution {
    /// Key that holds the data after the resolution is applied.
    pub fn key(&self) -> &str {
        match self {
            KeyResolution::Hit(key) | KeyResolution::Miss(key) => key,
            KeyResolution::Promote { to, .. } => to,
        }
    }
}

impl QueryIdentity {
    /// Derive the identity of `query` as seen at `now_ms` (epoch millis).
    pub fn derive(query: &MetricQuery, now_ms: i64) -> Self {
        let now_secs = now_ms.div_euclid(1000);
        let last_x_time = now_secs - query.to < LAST_X_THRESHOLD_SECS;

        let mut stable = format!(
            "{}:{}:{}:{}:{}",
            query.path, query.query_type, query.group, query.host.label, query.data_source.label
        );
        if !last_x_time {
            let anchor = truncate_to_minute(query.from) + truncate_to_minute(query.to);
            stable.push_str(&format!(":{anchor}"));
        }

        let edit = (query.last_edited_ms > 0).then(|| format!("{stable}:{}", query.last_edited_ms));
        let editing = query.last_edited_ms > 0
            && now_ms.saturating_sub(query.last_edited_ms)
                < query.collect_interval.saturating_mul(1000);

        Self {
            stable,
            edit,
            editing,
            last_x_time,
        }
    }

    /// Key reads and writes go to right now.
    pub fn active(&self) -> &str {
        match (&self.edit, self.editing) {
            (Some(edit), true) => edit,
            _ => &self.stable,
        }
    }

    /// Resolve against a namespace in precedence order.
    ///
    /// Editing: the edit key only. Not editing: the stable key, else a
    /// promotion from the edit key, else a miss on the stable key.
    pub fn resolve(&self, contains: impl Fn(&str) -> bool) -> KeyResolution {
        if self.editing {
            let key = self.active().to_string();
            return if contains(&key) {
                KeyResolution::Hit(key)
            } else {
                KeyResolution::Miss(key)
            };
        }
        if contains(&self.stable) {
            return KeyResolution::Hit(self.stable.clone());
        }
        match &self.edit {
            Some(edit) if contains(edit) => KeyResolution::Promote {
                from: edit.clone(),
                to: self.stable.clone(),
            },
            _ => KeyResolution::Miss(self.stable.clone()),
        }
    }
}
