//! Result tables returned by every snapshot phase
//!
//! Three schemas exist:
//!
//! ```text
//! node rows:  HOST_ID | HOSTNAME | TABLE   | RESULT | ERR_MSG
//! site rows:  HOST_ID | HOSTNAME | SITE_ID | RESULT | ERR_MSG
//! error rows: ERR_MSG
//! ```
//!
//! Node rows are produced by feasibility checks and target setup; site rows
//! by blocking completion. The two share a width, so consumers tell them
//! apart by the type of the third column.

use crate::error::{Error, Result};
use crate::types::{HostId, SiteId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Host id column name
pub const CNAME_HOST_ID: &str = "HOST_ID";
/// Hostname column name
pub const CNAME_HOSTNAME: &str = "HOSTNAME";
/// Table column name
pub const CNAME_TABLE: &str = "TABLE";
/// Site id column name
pub const CNAME_SITE_ID: &str = "SITE_ID";
/// Result column name
pub const CNAME_RESULT: &str = "RESULT";
/// Error message column name
pub const CNAME_ERR_MSG: &str = "ERR_MSG";

/// Outcome of one unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultStatus {
    /// Completed
    Success,
    /// Failed; see the error column
    Failure,
}

impl ResultStatus {
    /// Wire string stored in the RESULT column
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Success => "SUCCESS",
            ResultStatus::Failure => "FAILURE",
        }
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column value type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    /// 64-bit signed integer
    Integer,
    /// UTF-8 string
    String,
}

/// Column name and type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,
    /// Column type
    pub column_type: ColumnType,
}

impl ColumnInfo {
    /// Create a column
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        ColumnInfo {
            name: name.to_string(),
            column_type,
        }
    }
}

/// One cell of a result row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cell {
    /// Integer cell
    Integer(i64),
    /// String cell
    String(String),
}

impl Cell {
    fn column_type(&self) -> ColumnType {
        match self {
            Cell::Integer(_) => ColumnType::Integer,
            Cell::String(_) => ColumnType::String,
        }
    }

    /// String contents, if this is a string cell
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::String(s) => Some(s),
            Cell::Integer(_) => None,
        }
    }

    /// Integer contents, if this is an integer cell
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Integer(v) => Some(*v),
            Cell::String(_) => None,
        }
    }
}

/// Which of the known schemas a table carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    /// Per-table rows from feasibility or setup
    Node,
    /// Per-site rows from blocking completion
    Site,
    /// Single error-message column
    ErrorMessage,
}

/// Columns of node-scoped result rows
pub fn node_result_columns() -> Vec<ColumnInfo> {
    vec![
        ColumnInfo::new(CNAME_HOST_ID, ColumnType::Integer),
        ColumnInfo::new(CNAME_HOSTNAME, ColumnType::String),
        ColumnInfo::new(CNAME_TABLE, ColumnType::String),
        ColumnInfo::new(CNAME_RESULT, ColumnType::String),
        ColumnInfo::new(CNAME_ERR_MSG, ColumnType::String),
    ]
}

/// Columns of site-scoped result rows
pub fn site_result_columns() -> Vec<ColumnInfo> {
    vec![
        ColumnInfo::new(CNAME_HOST_ID, ColumnType::Integer),
        ColumnInfo::new(CNAME_HOSTNAME, ColumnType::String),
        ColumnInfo::new(CNAME_SITE_ID, ColumnType::Integer),
        ColumnInfo::new(CNAME_RESULT, ColumnType::String),
        ColumnInfo::new(CNAME_ERR_MSG, ColumnType::String),
    ]
}

/// A schema plus rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultTable {
    columns: Vec<ColumnInfo>,
    rows: Vec<Vec<Cell>>,
}

impl ResultTable {
    /// Create an empty table with the given schema
    pub fn new(columns: Vec<ColumnInfo>) -> Self {
        ResultTable {
            columns,
            rows: Vec::new(),
        }
    }

    /// Empty node-scoped table
    pub fn node_results() -> Self {
        Self::new(node_result_columns())
    }

    /// Empty site-scoped table
    pub fn site_results() -> Self {
        Self::new(site_result_columns())
    }

    /// Single-row error-message table
    pub fn error_message(message: impl Into<String>) -> Self {
        let mut table = Self::new(vec![ColumnInfo::new(CNAME_ERR_MSG, ColumnType::String)]);
        table.rows.push(vec![Cell::String(message.into())]);
        table
    }

    /// Schema
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// Type of column `index`, if it exists
    pub fn column_type(&self, index: usize) -> Option<ColumnType> {
        self.columns.get(index).map(|c| c.column_type)
    }

    /// Position of the named column
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Detect which schema this table carries
    ///
    /// Node and site tables differ only in the type of the third column.
    pub fn shape(&self) -> Option<ResultShape> {
        match self.columns.len() {
            1 if self.columns[0].name == CNAME_ERR_MSG => Some(ResultShape::ErrorMessage),
            5 => match self.column_type(2) {
                Some(ColumnType::Integer) => Some(ResultShape::Site),
                Some(ColumnType::String) => Some(ResultShape::Node),
                None => None,
            },
            _ => None,
        }
    }

    /// Append a row, checking arity and cell types
    pub fn add_row(&mut self, row: Vec<Cell>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::InvalidOperation(format!(
                "row has {} cells, table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        for (cell, column) in row.iter().zip(&self.columns) {
            if cell.column_type() != column.column_type {
                return Err(Error::InvalidOperation(format!(
                    "column {} expects {:?}, got {:?}",
                    column.name,
                    column.column_type,
                    cell.column_type()
                )));
            }
        }
        self.rows.push(row);
        Ok(())
    }

    /// Append a node-scoped row
    pub fn add_node_row(
        &mut self,
        host_id: HostId,
        hostname: &str,
        table: &str,
        status: ResultStatus,
        err_msg: &str,
    ) {
        debug_assert_eq!(self.shape(), Some(ResultShape::Node));
        self.rows.push(vec![
            Cell::Integer(host_id.0 as i64),
            Cell::String(hostname.to_string()),
            Cell::String(table.to_string()),
            Cell::String(status.as_str().to_string()),
            Cell::String(err_msg.to_string()),
        ]);
    }

    /// Append a site-scoped row
    pub fn add_site_row(
        &mut self,
        host_id: HostId,
        hostname: &str,
        site_id: SiteId,
        status: ResultStatus,
        err_msg: &str,
    ) {
        debug_assert_eq!(self.shape(), Some(ResultShape::Site));
        self.rows.push(vec![
            Cell::Integer(host_id.0 as i64),
            Cell::String(hostname.to_string()),
            Cell::Integer(site_id.0 as i64),
            Cell::String(status.as_str().to_string()),
            Cell::String(err_msg.to_string()),
        ]);
    }

    /// Append every row of `other`; schemas must match
    pub fn append(&mut self, other: &ResultTable) -> Result<()> {
        if self.columns != other.columns {
            return Err(Error::InvalidOperation(
                "cannot merge result tables with different schemas".to_string(),
            ));
        }
        self.rows.extend(other.rows.iter().cloned());
        Ok(())
    }

    /// All rows
    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    /// Number of rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// True if there are no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// String value at (row, named column)
    pub fn get_string(&self, row: usize, column: &str) -> Option<&str> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index)?.as_str()
    }

    /// Integer value at (row, named column)
    pub fn get_i64(&self, row: usize, column: &str) -> Option<i64> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index)?.as_i64()
    }

    /// True if any row reports FAILURE
    ///
    /// Tables without a RESULT column never report failure.
    pub fn has_failure(&self) -> bool {
        let Some(index) = self.column_index(CNAME_RESULT) else {
            return false;
        };
        self.rows
            .iter()
            .any(|row| row.get(index).and_then(Cell::as_str) == Some(ResultStatus::Failure.as_str()))
    }
}
