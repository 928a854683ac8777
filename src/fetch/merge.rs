//! Instance matcher and chunk merger.
//!
//! Chunks arrive in slot order (oldest first). The merger walks them newest
//! first, so every instance's accumulated series only ever grows at its
//! tail and stays most-recent-first without sorting.

use std::collections::BTreeMap;

use regex::Regex;
use tracing::debug;

use crate::types::{
    Cell, Frame, InstanceSelection, MergedSeries, NO_DATA, RawDataChunk, ValuesAndTime,
};
use crate::{GapcacheError, Result};

/// Separator between the data-source name and the instance label in raw
/// instance keys, e.g. `CPU-core0`.
pub const INSTANCE_DELIMITER: char = '-';

/// Compiled form of an [`InstanceSelection`].
#[derive(Debug, Clone)]
pub enum InstanceMatcher {
    Select(Vec<String>),
    Regex(Regex),
}

impl InstanceMatcher {
    pub fn new(selection: &InstanceSelection) -> Result<Self> {
        Ok(match selection {
            InstanceSelection::Select(labels) => InstanceMatcher::Select(labels.clone()),
            InstanceSelection::Regex(pattern) => InstanceMatcher::Regex(Regex::new(pattern)?),
        })
    }

    /// Short instance name if `raw_key` is selected.
    ///
    /// Explicit labels match `{ds}-{label}`, `{ds}{label}` or the bare label.
    /// A regex is tested against the key with everything up to and
    /// including the first delimiter removed.
    pub fn matches(&self, data_source_name: &str, raw_key: &str) -> Option<String> {
        match self {
            InstanceMatcher::Select(labels) => labels
                .iter()
                .find(|label| {
                    raw_key == label.as_str()
                        || raw_key.strip_prefix(data_source_name).is_some_and(|rest| {
                            rest == label.as_str()
                                || rest.strip_prefix(INSTANCE_DELIMITER) == Some(label.as_str())
                        })
                })
                .cloned(),
            InstanceMatcher::Regex(regex) => {
                let short = raw_key
                    .split_once(INSTANCE_DELIMITER)
                    .map_or(raw_key, |(_, rest)| rest);
                regex.is_match(short).then(|| short.to_string())
            }
        }
    }
}

/// Everything the merge produced.
#[derive(Debug, Clone, Default)]
pub struct MergeOutput {
    /// Windowed frames of matched instances, sorted by name.
    pub frames: Vec<Frame>,
    /// Unfiltered union of matched (or, while editing, all) instances.
    pub full: MergedSeries,
    pub matched_any: bool,
    /// Earliest `from_time` of the fetched chunks, epoch seconds.
    pub earliest_fetched_secs: Option<i64>,
    /// Latest timestamp seen on a matched instance, epoch seconds.
    pub latest_matched_secs: Option<i64>,
    /// Earliest timestamp seen on a matched instance, epoch seconds.
    pub earliest_matched_secs: Option<i64>,
}

/// Merge parameters that stay fixed for one query.
#[derive(Debug, Clone)]
pub struct MergeSpec<'a> {
    pub from: i64,
    pub to: i64,
    pub matcher: &'a InstanceMatcher,
    /// Keep unmatched instances in the full series.
    pub editing: bool,
    /// Data points rendered as frame fields; empty means all.
    pub data_points: &'a [String],
}

/// Fold `chunks` (slot order, oldest first) into frames and a full series.
///
/// A chunk whose status is not OK fails the whole merge.
pub fn merge(chunks: &[RawDataChunk], spec: &MergeSpec<'_>) -> Result<MergeOutput> {
    let mut out = MergeOutput::default();
    let mut frames: BTreeMap<String, Frame> = BTreeMap::new();

    for chunk in chunks.iter().rev() {
        if !chunk.is_ok() {
            return Err(GapcacheError::ChunkFailed {
                job_id: chunk.job_id,
                message: chunk.error.clone(),
            });
        }
        if chunk.from_time > 0 {
            out.earliest_fetched_secs = Some(
                out.earliest_fetched_secs
                    .map_or(chunk.from_time, |t| t.min(chunk.from_time)),
            );
        }
        if out.full.data_source_name.is_empty() {
            out.full.data_source_name = chunk.data_source_name.clone();
        }
        if out.full.data_points.is_empty() {
            out.full.data_points = chunk.data_points.clone();
        }

        // Columns of frames first seen in this chunk.
        let columns: &[String] = if spec.data_points.is_empty() {
            &chunk.data_points
        } else {
            spec.data_points
        };

        for (raw_key, series) in &chunk.instances {
            let short = spec.matcher.matches(&chunk.data_source_name, raw_key);
            if let Some(short) = &short {
                out.matched_any = true;
                if let Some(latest) = series.latest_ms() {
                    let latest = latest.div_euclid(1000);
                    out.latest_matched_secs =
                        Some(out.latest_matched_secs.map_or(latest, |t| t.max(latest)));
                }
                if let Some(earliest) = series.earliest_ms() {
                    let earliest = earliest.div_euclid(1000);
                    out.earliest_matched_secs =
                        Some(out.earliest_matched_secs.map_or(earliest, |t| t.min(earliest)));
                }

                let frame = frames
                    .entry(short.clone())
                    .or_insert_with(|| Frame::new(short.clone(), columns));
                // Chunks may list data points in different orders.
                let column_index: Vec<Option<usize>> = frame
                    .fields
                    .iter()
                    .map(|field| chunk.data_points.iter().position(|dp| *dp == field.name))
                    .collect();
                let mut merged_rows = 0usize;
                for i in 0..series.len() {
                    let ts_ms = series.time[i];
                    let ts = ts_ms.div_euclid(1000);
                    if spec.from <= ts && ts <= spec.to {
                        if frame.time.last().is_some_and(|last| ts_ms >= *last) {
                            continue;
                        }
                        frame.time.push(ts_ms);
                        let row = &series.values[i];
                        for (field, idx) in frame.fields.iter_mut().zip(&column_index) {
                            let value = idx
                                .and_then(|j| row.get(j))
                                .map_or(f64::NAN, Cell::as_f64);
                            field.values.push(value);
                        }
                        merged_rows += 1;
                    } else if merged_rows > 0 {
                        // Descending: nothing further in this chunk is in the window.
                        break;
                    }
                }
            }

            if spec.editing || short.is_some() {
                let held = out.full.instances.entry(raw_key.clone()).or_default();
                if chunk.data_points == out.full.data_points {
                    held.extend_older(series);
                } else {
                    held.extend_older(&reorder_columns(
                        series,
                        &chunk.data_points,
                        &out.full.data_points,
                    ));
                }
            }
        }
    }

    out.frames = frames.into_values().collect();
    debug!(
        frames = out.frames.len(),
        instances = out.full.instances.len(),
        matched = out.matched_any,
        "merged chunks"
    );
    Ok(out)
}

/// Rewrite each row of `series` from `from` column order to `to` column order.
fn reorder_columns(series: &ValuesAndTime, from: &[String], to: &[String]) -> ValuesAndTime {
    let index: Vec<Option<usize>> = to
        .iter()
        .map(|name| from.iter().position(|dp| dp == name))
        .collect();
    ValuesAndTime {
        time: series.time.clone(),
        values: series
            .values
            .iter()
            .map(|row| {
                index
                    .iter()
                    .map(|idx| {
                        idx.and_then(|j| row.get(j))
                            .cloned()
                            .unwrap_or_else(|| Cell::Text(NO_DATA.into()))
                    })
                    .collect()
            })
            .collect(),
    }
}
