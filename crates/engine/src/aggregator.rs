//! Merging per-site result tables into one client-facing table

use shardsave_core::{Error, Result, ResultShape, ResultTable};

/// Merge Phase A results; every input must be node-shaped
pub fn aggregate_feasibility(tables: &[ResultTable]) -> Result<ResultTable> {
    merge(tables, ResultShape::Node)
}

/// Merge Phase B results
///
/// The shape is taken from the first table (the type of its third column
/// tells node rows from site rows); every other table must match it. An
/// empty input yields an empty node-shaped table.
pub fn aggregate_creation(tables: &[ResultTable]) -> Result<ResultTable> {
    let Some(first) = tables.first() else {
        return Ok(ResultTable::node_results());
    };
    let shape = first.shape().ok_or_else(|| {
        Error::InvalidOperation("result table has an unrecognized schema".to_string())
    })?;
    merge(tables, shape)
}

fn merge(tables: &[ResultTable], shape: ResultShape) -> Result<ResultTable> {
    let mut merged = match (shape, tables.first()) {
        (ResultShape::Node, _) => ResultTable::node_results(),
        (ResultShape::Site, _) => ResultTable::site_results(),
        (ResultShape::ErrorMessage, Some(first)) => ResultTable::new(first.columns().to_vec()),
        (ResultShape::ErrorMessage, None) => return Ok(ResultTable::node_results()),
    };
    for table in tables {
        if table.shape() != Some(shape) {
            return Err(Error::InvalidOperation(format!(
                "cannot aggregate {:?} results with {:?} results",
                table.shape(),
                shape
            )));
        }
        merged.append(table)?;
    }
    Ok(merged)
}
