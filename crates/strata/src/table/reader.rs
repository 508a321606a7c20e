//! Streaming reader with predicate pushdown over a table's blocks.
//!
//! The reader walks cold blocks in rotation order and finishes with the
//! active block. For every sealed block it first consults the block's
//! min/max statistics: a predicate that provably matches no row skips the
//! block without touching its bytes. Blocks that survive are materialized
//! into a private [`ColumnStorage`], masked row-by-row against the full
//! predicate conjunction, and drained one row at a time.

use crate::error::{Result, StrataError};
use crate::schema::ColumnType;
use crate::table::block::Block;
use crate::table::column::ColumnStorage;
use crate::table::Table;
use crate::value::{Row, Value};
use bitvec::prelude::*;

/// Comparison operator for [`TableReader::filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
}

/// One column/operator/value predicate.
#[derive(Debug, Clone)]
struct Predicate {
    column: String,
    op: FilterOp,
    value: Value,
}

/// Storage for the block being scanned: the active block's live storage is
/// borrowed as-is, sealed blocks are rematerialized privately per scan.
enum ScanStorage<'t> {
    Live(&'t ColumnStorage),
    Loaded(ColumnStorage),
}

impl ScanStorage<'_> {
    fn get(&self) -> &ColumnStorage {
        match self {
            ScanStorage::Live(storage) => storage,
            ScanStorage::Loaded(storage) => storage,
        }
    }
}

struct BlockScan<'t> {
    storage: ScanStorage<'t>,
    mask: BitVec,
    cursor: usize,
}

/// Pull-based row iterator over all blocks of a table.
///
/// Obtained from [`Table::reader`]. Filters chain and apply as a
/// conjunction; adding one resets the scan position.
pub struct TableReader<'t> {
    table: &'t Table,
    blocks: Vec<&'t Block>,
    current_block_idx: usize,
    current: Option<BlockScan<'t>>,
    predicates: Vec<Predicate>,
}

impl<'t> TableReader<'t> {
    pub(crate) fn new(table: &'t Table) -> Self {
        let mut blocks: Vec<&Block> = table.cold_blocks().iter().collect();
        blocks.push(&table.active_block);
        Self {
            table,
            blocks,
            current_block_idx: 0,
            current: None,
            predicates: Vec::new(),
        }
    }

    /// Adds a predicate and resets the scan position.
    ///
    /// String columns support only [`FilterOp::Eq`] and [`FilterOp::Ne`];
    /// ordering operators match no string rows.
    pub fn filter(mut self, column: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        self.predicates.push(Predicate {
            column: column.into(),
            op,
            value: value.into(),
        });
        self.current_block_idx = 0;
        self.current = None;
        self
    }

    /// Yields the next matching row, or `Ok(None)` once every block is
    /// drained.
    ///
    /// # Errors
    ///
    /// `Query` for a predicate over an unknown column, `TypeMismatch` when
    /// a predicate value does not match its column's type, and
    /// storage/decode errors while materializing a sealed block.
    pub fn next(&mut self) -> Result<Option<Row>> {
        loop {
            let exhausted = match &self.current {
                None => true,
                Some(scan) => scan.cursor >= scan.mask.len(),
            };
            if exhausted {
                if self.current.take().is_some() {
                    self.current_block_idx += 1;
                }
                if !self.load_next_block()? {
                    return Ok(None);
                }
            }

            let Some(scan) = self.current.as_mut() else {
                return Ok(None);
            };
            while scan.cursor < scan.mask.len() && !scan.mask[scan.cursor] {
                scan.cursor += 1;
            }
            if scan.cursor >= scan.mask.len() {
                continue;
            }

            let storage = scan.storage.get();
            let mut row = Row::with_capacity(self.table.schema().columns.len());
            for (logical, col) in self.table.schema().columns.iter().enumerate() {
                let loc = self.table.locations[logical];
                let value = match loc.ty {
                    ColumnType::Int64 => Value::Int64(storage.int64_cols[loc.index][scan.cursor]),
                    ColumnType::Float64 => {
                        Value::Float64(storage.float64_cols[loc.index][scan.cursor])
                    }
                    ColumnType::String => {
                        Value::String(storage.string_at(loc, scan.cursor).to_string())
                    }
                    ColumnType::Boolean => {
                        return Err(StrataError::Query(format!(
                            "column {} has unsupported type",
                            col.name
                        )));
                    }
                };
                row.insert(col.name.clone(), value);
            }

            scan.cursor += 1;
            return Ok(Some(row));
        }
    }

    /// Advances to the next block that cannot be skipped, materializes its
    /// storage and builds the row mask. Returns `false` when no block
    /// remains.
    fn load_next_block(&mut self) -> Result<bool> {
        while self.current_block_idx < self.blocks.len() {
            let block = self.blocks[self.current_block_idx];
            if block.has_live_storage() {
                // The active block's statistics are not final; never skip.
                break;
            }

            let mut skip = false;
            for pred in &self.predicates {
                if self.can_skip(block, pred)? {
                    skip = true;
                    break;
                }
            }
            if !skip {
                break;
            }
            self.current_block_idx += 1;
        }

        if self.current_block_idx >= self.blocks.len() {
            return Ok(false);
        }

        let block = self.blocks[self.current_block_idx];
        let storage = if let Some(live) = &block.storage {
            ScanStorage::Live(live)
        } else {
            let (mut dest, _) = ColumnStorage::new(&self.table.schema().column_types())?;
            block.load_into(&mut dest, self.table.schema(), &self.table.locations)?;
            ScanStorage::Loaded(dest)
        };

        let mut mask = bitvec![1; block.row_count()];
        for pred in &self.predicates {
            Self::apply_predicate(self.table, storage.get(), &mut mask, pred)?;
        }

        self.current = Some(BlockScan {
            storage,
            mask,
            cursor: 0,
        });
        Ok(true)
    }

    /// Decides from the block's statistics whether `pred` can match any row.
    fn can_skip(&self, block: &Block, pred: &Predicate) -> Result<bool> {
        let loc = self
            .table
            .column_location(&pred.column)
            .ok_or_else(|| StrataError::Query(format!("column {} not found", pred.column)))?;
        if block.row_count() == 0 {
            return Ok(false);
        }

        match loc.ty {
            ColumnType::Int64 => {
                let &Value::Int64(target) = &pred.value else {
                    return Err(StrataError::TypeMismatch {
                        column: pred.column.clone(),
                        expected: ColumnType::Int64,
                    });
                };
                Ok(skip_range(
                    target,
                    block.int_min[loc.index],
                    block.int_max[loc.index],
                    pred.op,
                ))
            }
            ColumnType::Float64 => {
                let &Value::Float64(target) = &pred.value else {
                    return Err(StrataError::TypeMismatch {
                        column: pred.column.clone(),
                        expected: ColumnType::Float64,
                    });
                };
                Ok(skip_range(
                    target,
                    block.float_min[loc.index],
                    block.float_max[loc.index],
                    pred.op,
                ))
            }
            // No statistics are tracked for strings; never skip.
            ColumnType::String | ColumnType::Boolean => Ok(false),
        }
    }

    fn apply_predicate(
        table: &Table,
        storage: &ColumnStorage,
        mask: &mut BitVec,
        pred: &Predicate,
    ) -> Result<()> {
        let loc = table
            .column_location(&pred.column)
            .ok_or_else(|| StrataError::Query(format!("column {} not found", pred.column)))?;

        match loc.ty {
            ColumnType::Int64 => {
                let &Value::Int64(target) = &pred.value else {
                    return Err(StrataError::TypeMismatch {
                        column: pred.column.clone(),
                        expected: ColumnType::Int64,
                    });
                };
                let col = &storage.int64_cols[loc.index];
                for i in 0..mask.len() {
                    if mask[i] && !compare(col[i], pred.op, target) {
                        mask.set(i, false);
                    }
                }
            }
            ColumnType::Float64 => {
                let &Value::Float64(target) = &pred.value else {
                    return Err(StrataError::TypeMismatch {
                        column: pred.column.clone(),
                        expected: ColumnType::Float64,
                    });
                };
                let col = &storage.float64_cols[loc.index];
                for i in 0..mask.len() {
                    if mask[i] && !compare(col[i], pred.op, target) {
                        mask.set(i, false);
                    }
                }
            }
            ColumnType::String => {
                let Value::String(target) = &pred.value else {
                    return Err(StrataError::TypeMismatch {
                        column: pred.column.clone(),
                        expected: ColumnType::String,
                    });
                };
                for i in 0..mask.len() {
                    if mask[i] && !compare_str(storage.string_at(loc, i), pred.op, target) {
                        mask.set(i, false);
                    }
                }
            }
            ColumnType::Boolean => {
                return Err(StrataError::Query(format!(
                    "column {} has unsupported type",
                    pred.column
                )));
            }
        }
        Ok(())
    }
}

/// Statistics-based skip decision: true only when `[min, max]` proves that
/// no value in the block can satisfy the comparison against `target`.
fn skip_range<T: PartialOrd>(target: T, min: T, max: T, op: FilterOp) -> bool {
    match op {
        FilterOp::Eq => target < min || target > max,
        FilterOp::Ne => min == target && max == target,
        FilterOp::Gt => max <= target,
        FilterOp::Ge => max < target,
        FilterOp::Lt => min >= target,
        FilterOp::Le => min > target,
    }
}

fn compare<T: PartialOrd>(a: T, op: FilterOp, b: T) -> bool {
    match op {
        FilterOp::Eq => a == b,
        FilterOp::Ne => a != b,
        FilterOp::Lt => a < b,
        FilterOp::Le => a <= b,
        FilterOp::Gt => a > b,
        FilterOp::Ge => a >= b,
    }
}

/// Strings only compare for equality; ordering operators match nothing.
fn compare_str(a: &str, op: FilterOp, b: &str) -> bool {
    match op {
        FilterOp::Eq => a == b,
        FilterOp::Ne => a != b,
        _ => false,
    }
}
