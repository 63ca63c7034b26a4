//! Attendance Table Extractor.
//!
//! Selects the academic period, submits the query form, snapshots the
//! rendered tables once, and projects the snapshot into a normalized record.
//! The five projections (header row plus four aggregate rows) are independent
//! read-only queries over the same static snapshot, so their order is
//! irrelevant by construction.

use portal_driver::{Driver, DriverError, FrameRef, RowSnapshot, Scope, TableSnapshot};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::debug;

use crate::config::{TablePick, WaitPolicy};
use crate::errors::ScrapeError;

const YEAR_SELECT: &str = "#year";
const SEM_SELECT: &str = "#sem";
const SUBMIT_INPUT: &str = "input[name=\"submit\"]";
/// Row class the portal uses for both the header and the aggregate rows.
const HEAD_ROW_CLASS: &str = "plum_head";

/// Which academic period to fetch. Values must match the portal's option
/// values exactly; a mismatch yields empty or wrong-period data rather than a
/// hard error, which is the portal's own behavior.
#[derive(Clone, Debug)]
pub struct AttendanceQuery {
    pub year: String,
    pub sem: String,
}

/// Per-subject aggregate rows. Each vector has one entry per subject column
/// of the rendered table; no fixed column count is assumed across periods.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallStats {
    pub overall_class: Vec<String>,
    pub overall_absent: Vec<String>,
    pub overall_present: Vec<String>,
    pub overall_percentage: Vec<String>,
}

/// The normalized scrape result.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub headers: Vec<String>,
    pub overall_stats: OverallStats,
}

/// Submit the period query inside the data frame and extract the record.
pub async fn extract(
    driver: &dyn Driver,
    frame: &FrameRef,
    query: &AttendanceQuery,
    wait: &WaitPolicy,
    pick: &TablePick,
) -> Result<AttendanceRecord, ScrapeError> {
    let scope = Scope::Frame(frame.clone());

    driver
        .select(&scope, YEAR_SELECT, &query.year, wait.element)
        .await
        .map_err(step_failed)?;
    driver
        .select(&scope, SEM_SELECT, &query.sem, wait.element)
        .await
        .map_err(step_failed)?;
    driver
        .click(&scope, SUBMIT_INPUT, wait.element)
        .await
        .map_err(step_failed)?;
    // Same story as the login submit: no load signal, fixed settle.
    sleep(wait.submit_settle).await;

    // The settle only covers the round trip; the table itself may render
    // later, so suspend on it with a bounded wait before snapshotting.
    driver
        .wait_for(&scope, &pick.selector(), wait.element)
        .await
        .map_err(step_failed)?;

    let tables = driver
        .tables(&scope, &pick.selector())
        .await
        .map_err(step_failed)?;
    debug!(target: "pipeline", tables = tables.len(), "results page snapshotted");

    let target = pick_target(&tables, pick)?;
    assemble(target)
}

/// Positional pick among same-class tables. If the page renders fewer tables
/// than the rule needs, that is an extraction error; if it renders more, the
/// wrong table is silently selected, exactly as the original rule behaves.
fn pick_target<'a>(
    tables: &'a [TableSnapshot],
    pick: &TablePick,
) -> Result<&'a TableSnapshot, ScrapeError> {
    if pick.from_last == 0 || tables.len() < pick.from_last {
        return Err(ScrapeError::Extraction(format!(
            "expected at least {} '{}' tables, found {}",
            pick.from_last,
            pick.class_name,
            tables.len()
        )));
    }
    Ok(&tables[tables.len() - pick.from_last])
}

fn assemble(table: &TableSnapshot) -> Result<AttendanceRecord, ScrapeError> {
    let headers = header_cells(table)?;
    let overall_stats = OverallStats {
        overall_class: stat_cells(table, &["Overall Class"], false)?,
        overall_absent: stat_cells(table, &["Overall", "Absent"], false)?,
        overall_present: stat_cells(table, &["Overall", "Present"], false)?,
        // The portal renders this row inconsistently, sometimes with header
        // cells where the other aggregate rows use data cells.
        overall_percentage: stat_cells(table, &["Overall (%)"], true)?,
    };
    Ok(AttendanceRecord {
        headers,
        overall_stats,
    })
}

fn head_rows(table: &TableSnapshot) -> impl Iterator<Item = &RowSnapshot> {
    table.rows.iter().filter(|row| {
        row.class
            .split_whitespace()
            .any(|class| class == HEAD_ROW_CLASS)
    })
}

/// Column headers: the first header-class row containing "Days".
fn header_cells(table: &TableSnapshot) -> Result<Vec<String>, ScrapeError> {
    head_rows(table)
        .find(|row| row.text().contains("Days"))
        .map(|row| {
            row.cells
                .iter()
                .filter(|cell| !cell.header)
                .map(|cell| cell.text.clone())
                .collect()
        })
        .ok_or_else(|| ScrapeError::Extraction("header row containing 'Days' not found".into()))
}

/// Cells of every header-class row whose text contains `needles` in order,
/// minus each row's leading label cell. Header cells are skipped unless
/// `include_header_cells` is set.
fn stat_cells(
    table: &TableSnapshot,
    needles: &[&str],
    include_header_cells: bool,
) -> Result<Vec<String>, ScrapeError> {
    let mut cells = Vec::new();
    let mut matched = false;

    for row in head_rows(table) {
        if !contains_in_order(&row.text(), needles) {
            continue;
        }
        matched = true;
        cells.extend(
            row.cells
                .iter()
                .skip(1)
                .filter(|cell| include_header_cells || !cell.header)
                .map(|cell| cell.text.clone()),
        );
    }

    if matched {
        Ok(cells)
    } else {
        Err(ScrapeError::Extraction(format!(
            "aggregate row matching {needles:?} not found"
        )))
    }
}

/// True when every needle occurs in `haystack`, in the given order.
fn contains_in_order(haystack: &str, needles: &[&str]) -> bool {
    let mut rest = haystack;
    for needle in needles {
        match rest.find(needle) {
            Some(idx) => rest = &rest[idx + needle.len()..],
            None => return false,
        }
    }
    true
}

fn step_failed(err: DriverError) -> ScrapeError {
    if err.is_structural() {
        ScrapeError::Extraction(err.to_string())
    } else {
        ScrapeError::Unknown(err.to_string())
    }
}
