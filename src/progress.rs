// src/progress.rs

//! In-place terminal progress table.
//!
//! One row per task: `[id]. name | status | start | elapsed | try | blocked-on`.
//! On a TTY the table is drawn once and then only changed rows are
//! rewritten using cursor movement; the cursor parks on the table's first
//! line between renders and is restored on teardown. On anything that is
//! not a TTY no escape codes are emitted and full snapshots are appended
//! instead.

use std::io::{IsTerminal, Write};
use std::time::{Duration, SystemTime};

use colored::Colorize;

use crate::exec::RunnerStatus;

/// Renders every `update_interval` incremental updates as a full redraw.
const DEFAULT_UPDATE_INTERVAL: usize = 1200;

/// Row snapshot handed in by the scheduler.
#[derive(Debug, Clone)]
pub struct TaskRow {
    pub index: usize,
    pub name: String,
    pub status: RunnerStatus,
    pub start_time: Option<SystemTime>,
    pub elapsed: Option<Duration>,
    pub attempts: u32,
    pub retry_limit: u32,
    /// Unfinished dependencies, shown for waiting/cancelled rows.
    pub blocking: Vec<String>,
}

pub struct TableProgressView {
    is_tty: bool,
    update_interval: usize,
    id_width: usize,
    name_width: usize,
    separator: String,
    table_rows: usize,
    prev: Vec<String>,
    writes: usize,
    cursor_hidden: bool,
}

impl TableProgressView {
    pub fn new(task_count: usize, name_width_hint: usize) -> Self {
        let id_width = task_count.saturating_sub(1).max(1).to_string().len();
        let name_width = name_width_hint.clamp(4, 32);
        // id + name + status(8) + start(14) + elapsed(9) + try(5) + separators
        let width = 4 + id_width + name_width + 8 + 14 + 9 + 5 + 3 * 4;
        Self {
            is_tty: std::io::stderr().is_terminal(),
            update_interval: DEFAULT_UPDATE_INTERVAL,
            id_width,
            name_width,
            separator: "-".repeat(width),
            table_rows: 2 * task_count + 1,
            prev: vec![String::new(); task_count],
            writes: 0,
            cursor_hidden: false,
        }
    }

    /// Render the rows, rewriting only what changed. `refresh` forces a
    /// fresh full table.
    pub fn render(&mut self, rows: &[TaskRow], refresh: bool) {
        let mut err = std::io::stderr().lock();
        if self.is_tty {
            self.render_tty(&mut err, rows, refresh);
        } else {
            self.render_plain(&mut err, rows, refresh);
        }
        let _ = err.flush();
    }

    fn render_tty(&mut self, out: &mut impl Write, rows: &[TaskRow], refresh: bool) {
        if !self.cursor_hidden {
            let _ = write!(out, "\x1b[?25l");
            self.cursor_hidden = true;
        }

        if refresh && self.writes > 0 {
            // Leave the old table intact and draw a fresh one below it.
            let _ = write!(out, "\x1b[{}B", self.table_rows);
            self.writes = 0;
        }

        if self.writes % self.update_interval == 0 {
            self.print_full_tty(out, rows);
        } else {
            for row in rows {
                let line = self.format_row(row, true);
                if self.prev.get(row.index).is_some_and(|prev| *prev == line) {
                    continue;
                }
                let offset = 2 * row.index + 1;
                let _ = write!(out, "\x1b[{offset}B\r\x1b[K{line}\x1b[{offset}A\r");
                if let Some(prev) = self.prev.get_mut(row.index) {
                    *prev = line;
                }
            }
        }
        self.writes += 1;
    }

    fn print_full_tty(&mut self, out: &mut impl Write, rows: &[TaskRow]) {
        let _ = writeln!(out, "\x1b[K{}", self.separator);
        for row in rows {
            let line = self.format_row(row, true);
            let _ = writeln!(out, "\x1b[K{line}\n\x1b[K{}", self.separator);
            if let Some(prev) = self.prev.get_mut(row.index) {
                *prev = line;
            }
        }
        // Park the cursor back on the table's first line.
        let _ = write!(out, "\x1b[{}A\r", self.table_rows);
    }

    fn render_plain(&mut self, out: &mut impl Write, rows: &[TaskRow], refresh: bool) {
        if refresh || self.writes % self.update_interval == 0 {
            let _ = writeln!(out, "{}", self.separator);
            for row in rows {
                let _ = writeln!(out, "{}", self.format_row(row, false));
            }
            let _ = writeln!(out, "{}", self.separator);
        }
        self.writes += 1;
    }

    fn format_row(&self, row: &TaskRow, color: bool) -> String {
        let mut columns = Vec::with_capacity(8);
        columns.push(format!("[{:0width$}].", row.index, width = self.id_width));

        let mut name = row.name.clone();
        if name.len() > self.name_width {
            name.truncate(self.name_width);
        }
        columns.push(format!("{name:<width$}", width = self.name_width));

        columns.push("|".to_string());
        let status = format!("{:<8}", row.status.label());
        columns.push(if color {
            paint_status(row.status, &status)
        } else {
            status
        });

        if let Some(start) = row.start_time {
            columns.push("|".to_string());
            let start: chrono::DateTime<chrono::Local> = start.into();
            columns.push(start.format("%m.%d %H:%M:%S").to_string());

            columns.push("|".to_string());
            let elapsed = row.elapsed.map(|e| e.as_secs_f64()).unwrap_or(0.0);
            columns.push(format!("{:<9.2}", elapsed));

            columns.push("|".to_string());
            columns.push(format!("{}/{}", row.attempts, row.retry_limit));
        }

        if matches!(row.status, RunnerStatus::Waiting | RunnerStatus::Canceled)
            && !row.blocking.is_empty()
        {
            columns.push("|".to_string());
            let mut blocked = row.blocking.join(",");
            if blocked.len() > 48 {
                blocked.truncate(48);
            }
            columns.push(blocked);
        }

        columns.join(" ")
    }
}

fn paint_status(status: RunnerStatus, label: &str) -> String {
    match status {
        RunnerStatus::Disabled => label.dimmed().to_string(),
        RunnerStatus::Waiting => label.cyan().to_string(),
        RunnerStatus::Ready => label.blue().to_string(),
        RunnerStatus::Running => label.yellow().to_string(),
        RunnerStatus::Done => label.green().to_string(),
        RunnerStatus::Failed => label.red().to_string(),
        RunnerStatus::Killed => label.magenta().to_string(),
        RunnerStatus::Canceled => label.red().to_string(),
    }
}

impl Drop for TableProgressView {
    fn drop(&mut self) {
        if self.is_tty && self.cursor_hidden {
            let mut err = std::io::stderr().lock();
            // Move below the table and bring the cursor back.
            let _ = write!(err, "\x1b[{}B\x1b[?25h", self.table_rows);
            let _ = err.flush();
        }
    }
}
