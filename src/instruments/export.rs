//! Tab-separated trace files.

use anyhow::{Context, Result, bail};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Column-major table: one header cell per column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub header: Vec<String>,
    pub columns: Vec<Vec<f64>>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, label: impl Into<String>, values: Vec<f64>) -> Self {
        self.header.push(label.into());
        self.columns.push(values);
        self
    }

    /// Rows present in every column.
    pub fn rows(&self) -> usize {
        self.columns.iter().map(Vec::len).min().unwrap_or(0)
    }

    pub fn render(&self) -> String {
        let mut out = self.header.join("\t");
        out.push('\n');
        for row in 0..self.rows() {
            for (i, column) in self.columns.iter().enumerate() {
                if i > 0 {
                    out.push('\t');
                }
                let _ = write!(out, "{}", column[row]);
            }
            out.push('\n');
        }
        out
    }
}

/// Appends `.txt` unless the name already ends with it (any case).
pub fn with_txt_extension(path: &Path) -> PathBuf {
    let has_txt = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("txt"));
    if has_txt {
        path.to_path_buf()
    } else {
        let mut name = path.as_os_str().to_os_string();
        name.push(".txt");
        PathBuf::from(name)
    }
}

/// Writes `table`; `None` (no file chosen) does nothing. Returns the path
/// actually written.
pub fn write_table(path: Option<&Path>, table: &Table) -> Result<Option<PathBuf>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let path = with_txt_extension(path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating export directory {}", parent.display()))?;
    }
    fs::write(&path, table.render())
        .with_context(|| format!("writing trace to {}", path.display()))?;
    info!("[export] {} rows -> {}", table.rows(), path.display());
    Ok(Some(path))
}

/// Reads the given zero-based columns of a TSV file written by [`write_table`],
/// skipping the header row.
pub fn read_columns(path: &Path, columns: &[usize]) -> Result<Vec<Vec<f64>>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut out = vec![Vec::new(); columns.len()];
    for (line_no, line) in text.lines().enumerate().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        let cells: Vec<&str> = line.split('\t').collect();
        for (slot, &col) in out.iter_mut().zip(columns) {
            let Some(cell) = cells.get(col) else {
                bail!("{}:{}: missing column {col}", path.display(), line_no + 1);
            };
            let value: f64 = cell.trim().parse().with_context(|| {
                format!("{}:{}: bad number {cell:?}", path.display(), line_no + 1)
            })?;
            slot.push(value);
        }
    }
    Ok(out)
}
