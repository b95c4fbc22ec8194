//! Road grid representation and text file parsing
//!
//! A road grid is a rectangular matrix of lane codes loaded from a plain text
//! file. The first two data lines hold the row and column counts, the
//! following lines hold one row of codes each. Blank lines are ignored
//! everywhere and tokens may be separated by any whitespace.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use thiserror::Error;

use crate::domain::core::{Cell, Direction};
use crate::domain::lane::LaneCode;

/// Errors that can occur while loading a road grid
///
/// Row and column numbers are 1-based, matching what a user sees in an editor.
#[derive(Debug, Error)]
pub enum GridError {
    #[error("failed to read grid: {0}")]
    Io(#[from] io::Error),

    #[error("incomplete file: missing the row and column count lines")]
    MissingDimensions,

    #[error("the first two lines must contain integers (rows and columns), found {value:?}")]
    InvalidDimension { value: String },

    #[error("rows and columns must be > 0, read {rows}x{cols}")]
    NonPositiveDimensions { rows: i64, cols: i64 },

    #[error("grid of {rows}x{cols} cells is too large")]
    TooLarge { rows: usize, cols: usize },

    #[error("file ended before all {expected} grid rows were read (missing row {row})")]
    MissingRow { expected: usize, row: usize },

    #[error("invalid column count on row {row}: expected {expected}, found {found}")]
    ColumnCount { row: usize, expected: usize, found: usize },

    #[error("non-numeric token on row {row}, column {col}: {token:?}")]
    InvalidToken { row: usize, col: usize, token: String },

    #[error("unknown lane code {code} on row {row}, column {col}")]
    UnknownLaneCode { row: usize, col: usize, code: i64 },
}

const PREALLOCATE_CELLS: usize = 64 * 1024;

/// Rectangular matrix of lane codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoadGrid {
    rows: usize,
    cols: usize,
    cells: Vec<LaneCode>,
}

impl RoadGrid {
    /// Builds a grid from already-typed rows
    ///
    /// # Returns
    /// The grid, or `ColumnCount` if the rows are ragged, or
    /// `NonPositiveDimensions` if there is nothing to build
    pub fn from_rows(rows: Vec<Vec<LaneCode>>) -> Result<Self, GridError> {
        let row_count = rows.len();
        let col_count = rows.first().map(Vec::len).unwrap_or(0);
        if row_count == 0 || col_count == 0 {
            return Err(GridError::NonPositiveDimensions {
                rows: row_count as i64,
                cols: col_count as i64,
            });
        }

        let mut cells = Vec::with_capacity(row_count * col_count);
        for (index, row) in rows.into_iter().enumerate() {
            if row.len() != col_count {
                return Err(GridError::ColumnCount {
                    row: index + 1,
                    expected: col_count,
                    found: row.len(),
                });
            }
            cells.extend(row);
        }

        Ok(Self {
            rows: row_count,
            cols: col_count,
            cells,
        })
    }

    /// Loads a grid from a file on disk
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, GridError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    /// Parses a grid from any buffered reader
    pub fn from_reader(reader: impl BufRead) -> Result<Self, GridError> {
        let mut lines = reader.lines();
        let mut next_data_line = move || -> Result<Option<String>, GridError> {
            for line in lines.by_ref() {
                let line = line?;
                if !line.trim().is_empty() {
                    return Ok(Some(line));
                }
            }
            Ok(None)
        };

        let (Some(rows_line), Some(cols_line)) = (next_data_line()?, next_data_line()?) else {
            return Err(GridError::MissingDimensions);
        };
        let rows = parse_dimension(&rows_line)?;
        let cols = parse_dimension(&cols_line)?;
        if rows <= 0 || cols <= 0 {
            return Err(GridError::NonPositiveDimensions { rows, cols });
        }
        let (rows, cols) = (rows as usize, cols as usize);
        let total = rows
            .checked_mul(cols)
            .ok_or(GridError::TooLarge { rows, cols })?;

        // header counts are untrusted until the rows are actually read
        let mut cells = Vec::with_capacity(total.min(PREALLOCATE_CELLS));
        for row in 0..rows {
            let line = next_data_line()?.ok_or(GridError::MissingRow {
                expected: rows,
                row: row + 1,
            })?;

            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() != cols {
                return Err(GridError::ColumnCount {
                    row: row + 1,
                    expected: cols,
                    found: tokens.len(),
                });
            }

            for (col, token) in tokens.into_iter().enumerate() {
                let code: i64 = token.parse().map_err(|_| GridError::InvalidToken {
                    row: row + 1,
                    col: col + 1,
                    token: token.to_string(),
                })?;
                let lane = LaneCode::from_code(code).ok_or(GridError::UnknownLaneCode {
                    row: row + 1,
                    col: col + 1,
                    code,
                })?;
                cells.push(lane);
            }
        }

        Ok(Self { rows, cols, cells })
    }

    /// Returns the grid dimensions as (rows, cols)
    pub fn dimensions(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Checks if the given cell lies inside the grid
    pub fn contains(&self, cell: Cell) -> bool {
        cell.row < self.rows && cell.col < self.cols
    }

    /// Lane code at `cell`, or None outside the grid
    pub fn lane(&self, cell: Cell) -> Option<LaneCode> {
        if !self.contains(cell) {
            return None;
        }
        self.cells.get(cell.row * self.cols + cell.col).copied()
    }

    /// Neighbour of `cell` in `dir` if it is still inside the grid
    pub fn neighbor(&self, cell: Cell, dir: Direction) -> Option<Cell> {
        cell.step(dir).filter(|next| self.contains(*next))
    }

    /// Iterates over every cell with its lane code in row-major order
    pub fn iter(&self) -> impl Iterator<Item = (Cell, LaneCode)> + '_ {
        self.cells
            .iter()
            .enumerate()
            .map(|(index, lane)| (Cell::new(index / self.cols, index % self.cols), *lane))
    }

    /// Renders the grid as text, one row per line, codes zero-padded to two
    /// digits and separated by single spaces
    pub fn to_text(&self) -> String {
        let mut out = String::with_capacity(self.rows * (self.cols * 3 + 1));
        for row in self.cells.chunks(self.cols) {
            let line: Vec<String> = row.iter().map(|lane| format!("{:02}", lane.code())).collect();
            out.push_str(&line.join(" "));
            out.push('\n');
        }
        out
    }
}

impl FromStr for RoadGrid {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_reader(s.as_bytes())
    }
}

fn parse_dimension(line: &str) -> Result<i64, GridError> {
    let trimmed = line.trim();
    trimmed.parse().map_err(|_| GridError::InvalidDimension {
        value: trimmed.to_string(),
    })
}
