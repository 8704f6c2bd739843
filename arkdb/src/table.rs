//! Tables: a named, root-addressed collection of same-length columns plus
//! their optional secondary indices.
//!
//! A table's root is itself an [`Array`] of refs, shaped like the group
//! directory's own root but with one more field: `[names_offsets,
//! names_blob, row_count, col0_descriptor, col1_descriptor, ...]`. Each
//! column descriptor is in turn the small 5-element array [`Column`] encodes
//! itself as, so growing or shrinking the column count never has to touch
//! sibling columns' data, only this one array of descriptor refs.

use arkdb_tree::array::Array;
use arkdb_tree::btree::cursor::Cursor;
use arkdb_tree::{NodeReader, NodeStore, Ref};

use crate::binary::BinaryColumn;
use crate::column::{Column, ColumnIndex, ColumnStorage, ColumnType, StringIndex};
use crate::Error;

/// A single cell's value, read back from or written into a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone)]
pub struct Table {
    names: Vec<String>,
    columns: Vec<Column>,
    row_count: usize,
}

impl Table {
    pub fn create<S: NodeStore>(
        store: &mut S,
        names: &[&str],
        types: &[ColumnType],
    ) -> Result<Self, Error> {
        assert_eq!(names.len(), types.len(), "one type per column name");
        let mut columns = Vec::with_capacity(types.len());
        for ty in types {
            columns.push(Column::new_empty(store, *ty)?);
        }
        Ok(Self { names: names.iter().map(|s| s.to_string()).collect(), columns, row_count: 0 })
    }

    pub fn open<R: NodeReader>(store: &R, r: Ref) -> Result<Self, Error> {
        let a = Array::from_ref(r);
        let names_offsets = a.get_ref(store, 0)?;
        let names_blob = a.get_ref(store, 1)?;
        let row_count = a.get_ref(store, 2)? as usize;
        let name_col = BinaryColumn::from_roots(names_offsets, names_blob);
        let num_cols = name_col.len(store)?;
        let mut names = Vec::with_capacity(num_cols);
        let mut columns = Vec::with_capacity(num_cols);
        for i in 0..num_cols {
            let bytes = name_col.get(store, i)?;
            names.push(String::from_utf8_lossy(&bytes).into_owned());
            let col_ref = a.get_ref(store, 3 + i)?;
            columns.push(Column::decode_ref(store, col_ref)?);
        }
        Ok(Self { names, columns, row_count })
    }

    pub fn write<S: NodeStore>(&self, store: &mut S) -> Result<Ref, Error> {
        let mut name_col = BinaryColumn::new_empty(store)?;
        for name in &self.names {
            name_col.push(store, name.as_bytes())?;
        }
        let (noff, nblob) = name_col.roots();
        let mut values = vec![noff, nblob, self.row_count as u64];
        for col in &self.columns {
            values.push(col.encode_ref(store)?);
        }
        Ok(Array::bulk_build_refs(store, &values, false, false)?.ref_())
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    /// The position of the column named `name`, for callers that address
    /// columns by name rather than by index.
    pub fn column_index(&self, name: &str) -> Result<usize, Error> {
        self.names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| Error::NoSuchTable { name: name.to_string() })
    }

    pub fn append_row<S: NodeStore>(&mut self, store: &mut S, values: &[Value]) -> Result<usize, Error> {
        assert_eq!(values.len(), self.columns.len(), "one value per column");
        let row = self.row_count;
        for (col, value) in self.columns.iter_mut().zip(values) {
            match (&mut col.storage, value) {
                (ColumnStorage::Int(t), Value::Int(v)) => {
                    t.push(store, *v)?;
                    if let Some(ColumnIndex::Int(idx)) = &mut col.index {
                        idx.insert_row(store, *v, row)?;
                    }
                }
                (ColumnStorage::Str(c), Value::Str(s)) => {
                    c.push(store, s.as_bytes())?;
                    if let Some(ColumnIndex::Str(idx)) = &mut col.index {
                        idx.insert_row(store, c, row, s.as_bytes())?;
                    }
                }
                _ => panic!("column type/value mismatch"),
            }
        }
        self.row_count += 1;
        Ok(row)
    }

    pub fn get<R: NodeReader>(&self, store: &R, row: usize, col: usize) -> Result<Value, Error> {
        if row >= self.row_count {
            return Err(Error::IndexOutOfRange { index: row, len: self.row_count });
        }
        match &self.columns[col].storage {
            ColumnStorage::Int(t) => Ok(Value::Int(t.get(store, row)?)),
            ColumnStorage::Str(c) => Ok(Value::Str(String::from_utf8_lossy(&c.get(store, row)?).into_owned())),
        }
    }

    pub fn sum_int<R: NodeReader>(&self, store: &R, col: usize) -> Result<i64, Error> {
        let t = match &self.columns[col].storage {
            ColumnStorage::Int(t) => t,
            ColumnStorage::Str(_) => return Ok(0),
        };
        let mut cursor = Cursor::new(store, t.root(), 0)?;
        let mut sum = 0i64;
        while let Some(v) = cursor.next()? {
            sum += v;
        }
        Ok(sum)
    }

    pub fn scan_int<R: NodeReader>(&self, store: &R, col: usize) -> Result<Vec<i64>, Error> {
        let t = match &self.columns[col].storage {
            ColumnStorage::Int(t) => t,
            ColumnStorage::Str(_) => return Ok(Vec::new()),
        };
        let mut cursor = Cursor::new(store, t.root(), 0)?;
        let mut out = Vec::new();
        while let Some(v) = cursor.next()? {
            out.push(v);
        }
        Ok(out)
    }

    /// Position of the first row whose stored value is `>= value`, assuming
    /// the column was populated in non-decreasing order (an ordered index
    /// built via [`Table::build_index`] is what makes this valid for
    /// arbitrary insert order).
    pub fn lower_bound_int<R: NodeReader>(&self, store: &R, col: usize, value: i64) -> Result<usize, Error> {
        match &self.columns[col].storage {
            ColumnStorage::Int(t) => t.lower_bound(store, value),
            ColumnStorage::Str(_) => Ok(self.row_count),
        }
    }

    pub fn build_index<S: NodeStore>(&mut self, store: &mut S, col: usize) -> Result<(), Error> {
        let n = self.row_count;
        let column = &mut self.columns[col];
        match &mut column.storage {
            ColumnStorage::Int(t) => {
                let mut idx = match column.index.take() {
                    Some(ColumnIndex::Int(idx)) => idx,
                    _ => arkdb_tree::btree::index::IndexTree::new_empty(store)?,
                };
                for row in 0..n {
                    let v = t.get(store, row)?;
                    idx.insert_row(store, v, row)?;
                }
                column.index = Some(ColumnIndex::Int(idx));
            }
            ColumnStorage::Str(c) => {
                let mut idx = StringIndex::new_empty(store)?;
                for row in 0..n {
                    let v = c.get(store, row)?;
                    idx.insert_row(store, c, row, &v)?;
                }
                column.index = Some(ColumnIndex::Str(idx));
            }
        }
        Ok(())
    }

    pub fn range_query<R: NodeReader>(&self, store: &R, col: usize, low: i64, high: i64) -> Result<Vec<usize>, Error> {
        let idx = match &self.columns[col].index {
            Some(ColumnIndex::Int(idx)) => idx,
            _ => return Ok(Vec::new()),
        };
        let mut sink = Vec::new();
        idx.rows_in_range(store, low, high, &mut sink)?;
        Ok(sink)
    }

    pub fn begins_with<R: NodeReader>(&self, store: &R, col: usize, prefix: &str) -> Result<Vec<usize>, Error> {
        let (c, idx) = match (&self.columns[col].storage, &self.columns[col].index) {
            (ColumnStorage::Str(c), Some(ColumnIndex::Str(idx))) => (c, idx),
            _ => return Ok(Vec::new()),
        };
        idx.begins_with(store, c, prefix.as_bytes())
    }

    /// First row equal to `value`, via the column's ordered index if one
    /// exists; a column with no index reports no match rather than falling
    /// back to a linear scan, since building an index is the documented way
    /// to make this query cheap.
    pub fn find_row<R: NodeReader>(&self, store: &R, col: usize, value: &Value) -> Result<Option<usize>, Error> {
        match (&self.columns[col].index, value) {
            (Some(ColumnIndex::Int(idx)), Value::Int(v)) => {
                let mut sink = Vec::new();
                idx.rows_for(store, *v, &mut sink)?;
                Ok(sink.into_iter().next())
            }
            (Some(ColumnIndex::Str(idx)), Value::Str(s)) => {
                let c = match &self.columns[col].storage {
                    ColumnStorage::Str(c) => c,
                    _ => return Ok(None),
                };
                let hits = idx.begins_with(store, c, s.as_bytes())?;
                for row in hits {
                    if c.get(store, row)? == s.as_bytes() {
                        return Ok(Some(row));
                    }
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    pub fn clear<S: NodeStore>(&mut self, store: &mut S) -> Result<(), Error> {
        for col in &mut self.columns {
            let ty = col.ty();
            *col = Column::new_empty(store, ty)?;
        }
        self.row_count = 0;
        Ok(())
    }

    /// Erase `row` from every column, then rebuild every existing secondary
    /// index from scratch. A targeted per-index removal would be cheaper,
    /// but row deletion is rare enough relative to inserts in the scenarios
    /// this core targets (see S4) that the simpler rebuild is preferred.
    pub fn delete_row<S: NodeStore>(&mut self, store: &mut S, row: usize) -> Result<(), Error> {
        if row >= self.row_count {
            return Err(Error::IndexOutOfRange { index: row, len: self.row_count });
        }
        let had_index: Vec<bool> = self.columns.iter().map(|c| c.index.is_some()).collect();
        for col in &mut self.columns {
            match &mut col.storage {
                ColumnStorage::Int(t) => t.erase(store, row)?,
                ColumnStorage::Str(c) => c.erase(store, row)?,
            }
            col.index = None;
        }
        self.row_count -= 1;
        for (i, had) in had_index.into_iter().enumerate() {
            if had {
                self.build_index(store, i)?;
            }
        }
        Ok(())
    }
}
