// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Series/table assembler: turns a [`CorrelatedSet`] into a queryable table, either
//! materialized eagerly (`StaticTable`) or computed lazily on access (`DynamicTable`).

use std::collections::{BTreeMap, BTreeSet};

use crate::config::TableConfig;
use crate::correlate::CorrelatedSet;
use crate::model::{Instant, PvName, Value};

/// Common read surface over an assembled table, independent of whether it was materialized
/// eagerly or computed on demand.
pub trait Table {
    fn column_count(&self) -> usize;
    fn row_count(&self) -> usize;
    fn duration_nanos(&self) -> i64;
    /// Approximate resident byte footprint. Exact for `StaticTable`; an estimate for
    /// `DynamicTable`, which holds no materialized cells.
    fn allocation_size(&self) -> u64;
    fn column(&self, name: &str) -> Option<Vec<Option<Value>>>;
    fn cell(&self, row: usize, name: &str) -> Option<Value>;
    fn clear(&mut self);
}

/// A table with every cell materialized up front. Cheap random access, proportional memory.
#[derive(Debug, Default)]
pub struct StaticTable {
    timestamps: Vec<Instant>,
    columns: BTreeMap<PvName, Vec<Option<Value>>>,
}

impl StaticTable {
    /// Builds a static table from `set`, row-major over the union of every block's basis
    /// timestamps in order. Columns are keyed by `pvs` — the original request's PV list —
    /// rather than by whatever PVs happen to appear in `set`'s blocks, so a PV the server
    /// returned zero buckets for still gets a column, filled with `None` in every row.
    pub fn build(set: &CorrelatedSet, pvs: &BTreeSet<PvName>) -> Self {
        let mut timestamps = Vec::new();
        let mut columns: BTreeMap<PvName, Vec<Option<Value>>> = BTreeMap::new();
        for name in pvs {
            columns.insert(name.clone(), Vec::new());
        }

        for block in set.blocks() {
            let block_timestamps = block.basis.timestamps();
            for (row, ts) in block_timestamps.iter().enumerate() {
                timestamps.push(*ts);
                for name in pvs {
                    let cell = block.columns.get(name).map(|col| col.values[row].clone());
                    columns.get_mut(name).unwrap().push(cell);
                }
            }
        }

        Self { timestamps, columns }
    }
}

impl Table for StaticTable {
    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn row_count(&self) -> usize {
        self.timestamps.len()
    }

    fn duration_nanos(&self) -> i64 {
        match (self.timestamps.first(), self.timestamps.last()) {
            (Some(first), Some(last)) => last.diff_nanos(*first),
            _ => 0,
        }
    }

    fn allocation_size(&self) -> u64 {
        let cell_size = std::mem::size_of::<Option<Value>>() as u64;
        (self.row_count() as u64) * (self.column_count() as u64) * cell_size
    }

    fn column(&self, name: &str) -> Option<Vec<Option<Value>>> {
        self.columns.get(name).cloned()
    }

    fn cell(&self, row: usize, name: &str) -> Option<Value> {
        self.columns.get(name)?.get(row)?.clone()
    }

    fn clear(&mut self) {
        self.timestamps.clear();
        self.columns.clear();
    }
}

/// A table that keeps the underlying [`CorrelatedSet`] and resolves each access against it,
/// rather than precomputing the full grid. Avoids the allocation cost of [`StaticTable`] at
/// the expense of per-access lookup work; preferred above `table.static_max`.
#[derive(Debug, Default)]
pub struct DynamicTable {
    set: CorrelatedSet,
    pvs: BTreeSet<PvName>,
}

impl DynamicTable {
    /// `pvs` is the original request's PV list; a name absent from every block still reads
    /// back as a column of `None`s rather than `column`/`cell` reporting it unknown.
    pub fn build(set: CorrelatedSet, pvs: BTreeSet<PvName>) -> Self {
        Self { set, pvs }
    }

    fn row_to_block_and_offset(&self, row: usize) -> Option<(usize, usize)> {
        let mut remaining = row;
        for (block_index, block) in self.set.blocks().iter().enumerate() {
            let count = block.basis.sample_count();
            if remaining < count {
                return Some((block_index, remaining));
            }
            remaining -= count;
        }
        None
    }
}

impl Table for DynamicTable {
    fn column_count(&self) -> usize {
        self.pvs.len()
    }

    fn row_count(&self) -> usize {
        self.set.blocks().iter().map(|b| b.basis.sample_count()).sum()
    }

    fn duration_nanos(&self) -> i64 {
        match (self.set.blocks().first(), self.set.blocks().last()) {
            (Some(first), Some(last)) => last.basis.end().diff_nanos(first.basis.start()),
            _ => 0,
        }
    }

    fn allocation_size(&self) -> u64 {
        // No materialized grid; only the blocks themselves are resident.
        std::mem::size_of::<CorrelatedSet>() as u64
    }

    fn column(&self, name: &str) -> Option<Vec<Option<Value>>> {
        if !self.pvs.contains(name) {
            return None;
        }
        let mut out = Vec::with_capacity(self.row_count());
        for block in self.set.blocks() {
            let count = block.basis.sample_count();
            match block.columns.get(name) {
                Some(col) => out.extend(col.values.iter().cloned().map(Some)),
                None => out.extend(std::iter::repeat(None).take(count)),
            }
        }
        Some(out)
    }

    fn cell(&self, row: usize, name: &str) -> Option<Value> {
        if !self.pvs.contains(name) {
            return None;
        }
        let (block_index, offset) = self.row_to_block_and_offset(row)?;
        let block = &self.set.blocks()[block_index];
        block.columns.get(name).and_then(|col| col.values.get(offset).cloned())
    }

    fn clear(&mut self) {
        self.set = CorrelatedSet::default();
        self.pvs.clear();
    }
}

/// Chooses between [`StaticTable`] and [`DynamicTable`] per [`TableConfig`]: static unless
/// the caller asked for dynamic and it's enabled, or the estimated size exceeds
/// `table.static_max` while dynamic tables are enabled.
pub enum AssembledTable {
    Static(StaticTable),
    Dynamic(DynamicTable),
}

impl AssembledTable {
    pub fn as_table(&self) -> &dyn Table {
        match self {
            AssembledTable::Static(t) => t,
            AssembledTable::Dynamic(t) => t,
        }
    }
}

pub struct TableAssembler {
    config: TableConfig,
}

impl TableAssembler {
    pub fn new(config: TableConfig) -> Self {
        Self { config }
    }

    /// `pvs` is the original request's PV list `P`; every name in it gets a column in the
    /// assembled table even if `set` holds no block mentioning it.
    pub fn assemble(&self, set: CorrelatedSet, pvs: &BTreeSet<PvName>, want_dynamic: bool) -> AssembledTable {
        let estimated_rows: usize = set.blocks().iter().map(|b| b.basis.sample_count()).sum();
        let estimated_cols = pvs.len();
        let estimated_bytes =
            (estimated_rows as u64) * (estimated_cols as u64) * std::mem::size_of::<Option<Value>>() as u64;

        let use_dynamic = self.config.dynamic_enabled
            && (want_dynamic || (!self.config.static_default && estimated_bytes > self.config.static_max));

        if use_dynamic {
            AssembledTable::Dynamic(DynamicTable::build(set, pvs.clone()))
        } else {
            AssembledTable::Static(StaticTable::build(&set, pvs))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlate::Correlator;
    use crate::model::{Basis, Bucket, DataColumn, ValueType};

    fn two_block_set() -> CorrelatedSet {
        let mut correlator = Correlator::default();
        let basis_a = Basis::clock(Instant::from_secs(0), 1_000_000_000, 2).unwrap();
        let col_a = DataColumn::new("x".into(), ValueType::F64, vec![Value::F64(1.0), Value::F64(2.0)]).unwrap();
        correlator.insert_bucket(Bucket::new(basis_a, col_a).unwrap()).unwrap();

        let basis_b = Basis::clock(Instant::from_secs(10), 1_000_000_000, 1).unwrap();
        let col_b = DataColumn::new("y".into(), ValueType::F64, vec![Value::F64(3.0)]).unwrap();
        correlator.insert_bucket(Bucket::new(basis_b, col_b).unwrap()).unwrap();

        correlator.correlated_set().clone()
    }

    fn pvs(names: &[&str]) -> BTreeSet<PvName> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn static_table_fills_missing_pv_rows_with_none() {
        let set = two_block_set();
        let table = StaticTable::build(&set, &pvs(&["x", "y"]));
        assert_eq!(table.row_count(), 3);
        assert_eq!(table.column_count(), 2);
        assert_eq!(table.cell(0, "y"), None);
        assert_eq!(table.cell(2, "x"), None);
        assert_eq!(table.cell(2, "y"), Some(Value::F64(3.0)));
    }

    #[test]
    fn static_table_seeds_all_null_column_for_pv_absent_from_every_block() {
        let set = two_block_set();
        let table = StaticTable::build(&set, &pvs(&["x", "y", "z"]));
        assert_eq!(table.column_count(), 3);
        assert_eq!(table.column("z"), Some(vec![None, None, None]));
    }

    #[test]
    fn dynamic_table_matches_static_table_cell_values() {
        let set = two_block_set();
        let static_table = StaticTable::build(&set, &pvs(&["x", "y"]));
        let dynamic_table = DynamicTable::build(set, pvs(&["x", "y"]));
        assert_eq!(static_table.row_count(), dynamic_table.row_count());
        for row in 0..static_table.row_count() {
            assert_eq!(static_table.cell(row, "x"), dynamic_table.cell(row, "x"));
            assert_eq!(static_table.cell(row, "y"), dynamic_table.cell(row, "y"));
        }
    }

    #[test]
    fn dynamic_table_seeds_all_null_column_for_pv_absent_from_every_block() {
        let set = two_block_set();
        let dynamic_table = DynamicTable::build(set, pvs(&["x", "y", "z"]));
        assert_eq!(dynamic_table.column_count(), 3);
        assert_eq!(dynamic_table.column("z"), Some(vec![None, None, None]));
        assert_eq!(dynamic_table.cell(0, "z"), None);
    }

    #[test]
    fn assembler_honors_static_default() {
        let set = two_block_set();
        let assembler = TableAssembler::new(TableConfig::default());
        let table = assembler.assemble(set, &pvs(&["x", "y"]), false);
        assert!(matches!(table, AssembledTable::Static(_)));
    }

    #[test]
    fn assembler_honors_explicit_dynamic_request() {
        let set = two_block_set();
        let assembler = TableAssembler::new(TableConfig::default());
        let table = assembler.assemble(set, &pvs(&["x", "y"]), true);
        assert!(matches!(table, AssembledTable::Dynamic(_)));
    }

    #[test]
    fn clear_empties_static_table() {
        let mut table = StaticTable::build(&two_block_set(), &pvs(&["x", "y"]));
        table.clear();
        assert_eq!(table.row_count(), 0);
        assert_eq!(table.column_count(), 0);
    }
}
