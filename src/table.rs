//! Table header parsing and the row cursor.
//!
//! A `Table` binds a [`MemoryBlock`] already holding the bytes described in
//! spec.md §6 ("Table binary layout"): a fixed header, a column directory,
//! padding to 8 bytes, then `rowCount * rowStride` bytes of row data. The
//! loader that produces those bytes (the wire/file parser) is out of
//! scope; `Table::bind` only ever reads what is already in the block.

use std::collections::HashMap;

use crate::error::{KradataError, Result};
use crate::heap::MemoryBlock;
use crate::types::{ColumnType, Value};

const MAGIC: &[u8; 4] = b"KRDA";

fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) / align * align
}

#[derive(Debug, Clone)]
pub struct ColumnMeta {
    pub name: String,
    pub ty: ColumnType,
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug)]
pub struct TableHeader {
    pub version: u16,
    pub row_count: u32,
    pub row_stride: u32,
    pub columns: Vec<ColumnMeta>,
}

fn read_u16(bytes: &[u8], at: usize) -> Result<u16> {
    bytes
        .get(at..at + 2)
        .map(|s| u16::from_le_bytes(s.try_into().unwrap()))
        .ok_or_else(|| KradataError::BadFormat("header truncated reading u16".into()))
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32> {
    bytes
        .get(at..at + 4)
        .map(|s| u32::from_le_bytes(s.try_into().unwrap()))
        .ok_or_else(|| KradataError::BadFormat("header truncated reading u32".into()))
}

impl TableHeader {
    /// Parses the header starting at byte 0 of `view`. Returns the header
    /// plus the byte offset (within `view`) where row data begins.
    fn parse(view: &[u8]) -> Result<(TableHeader, usize)> {
        if view.len() < 16 {
            return Err(KradataError::BadFormat("table block shorter than fixed header".into()));
        }
        if &view[0..4] != MAGIC {
            return Err(KradataError::BadFormat(format!(
                "bad magic {:?}, expected {:?}",
                &view[0..4],
                MAGIC
            )));
        }
        let version = read_u16(view, 4)?;
        let _flags = read_u16(view, 6)?;
        let row_count = read_u32(view, 8)?;
        let row_stride = read_u32(view, 12)?;
        let column_count = read_u16(view, 16)?;
        // 2 bytes reserved follow at offset 18.
        let mut cursor = 20usize;
        let mut columns = Vec::with_capacity(column_count as usize);
        for _ in 0..column_count {
            let name_len = *view
                .get(cursor)
                .ok_or_else(|| KradataError::BadFormat("truncated column directory".into()))?
                as usize;
            cursor += 1;
            let name = std::str::from_utf8(view.get(cursor..cursor + name_len).ok_or_else(|| {
                KradataError::BadFormat("truncated column name".into())
            })?)
            .map_err(|e| KradataError::BadFormat(format!("column name not ascii/utf8: {e}")))?
            .to_string();
            cursor += name_len;

            let type_len = *view
                .get(cursor)
                .ok_or_else(|| KradataError::BadFormat("truncated column directory".into()))?
                as usize;
            cursor += 1;
            let type_name =
                std::str::from_utf8(view.get(cursor..cursor + type_len).ok_or_else(|| {
                    KradataError::BadFormat("truncated column type name".into())
                })?)
                .map_err(|e| KradataError::BadFormat(format!("type name not ascii/utf8: {e}")))?;
            cursor += type_len;

            let offset = read_u32(view, cursor)?;
            cursor += 4;
            let size = read_u32(view, cursor)?;
            cursor += 4;

            let ty = ColumnType::from_name(type_name)?;
            if (offset as u64) + (size as u64) > row_stride as u64 {
                return Err(KradataError::BadFormat(format!(
                    "column {name:?} at [{offset}, {offset}+{size}) exceeds row stride {row_stride}"
                )));
            }
            columns.push(ColumnMeta { name, ty, offset, size });
        }

        // Non-overlap invariant (spec.md §3): sort a copy by offset and walk.
        let mut by_offset: Vec<&ColumnMeta> = columns.iter().collect();
        by_offset.sort_by_key(|c| c.offset);
        for pair in by_offset.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if a.offset + a.size > b.offset {
                return Err(KradataError::BadFormat(format!(
                    "columns {:?} and {:?} overlap",
                    a.name, b.name
                )));
            }
        }

        let header_end = align_up(cursor, 8);
        Ok((
            TableHeader {
                version,
                row_count,
                row_stride,
                columns,
            },
            header_end,
        ))
    }
}

/// A parsed, bound table: header plus the backing bytes.
pub struct Table {
    block: MemoryBlock,
    header: TableHeader,
    header_end: usize,
    by_name: HashMap<String, usize>,
}

impl Table {
    /// Parses `block`'s header and validates that the declared row data
    /// fits within it.
    pub fn bind(block: MemoryBlock) -> Result<Table> {
        let (header, header_end) = TableHeader::parse(block.view())?;
        let needed = header_end + header.row_count as usize * header.row_stride as usize;
        if needed > block.size() {
            return Err(KradataError::BadFormat(format!(
                "table block of {} bytes too small for header ({header_end}) + {} rows of {} bytes",
                block.size(),
                header.row_count,
                header.row_stride
            )));
        }
        let by_name = header
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        Ok(Table {
            block,
            header,
            header_end,
            by_name,
        })
    }

    pub fn row_count(&self) -> u32 {
        self.header.row_count
    }

    pub fn row_stride(&self) -> u32 {
        self.header.row_stride
    }

    pub fn version(&self) -> u16 {
        self.header.version
    }

    pub fn column(&self, ordinal: usize) -> Option<&ColumnMeta> {
        self.header.columns.get(ordinal)
    }

    pub fn column_ordinal(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.header.columns
    }

    pub fn block(&self) -> &MemoryBlock {
        &self.block
    }

    /// Returns a cursor positioned at row 0. Multiple `Row`s over the same
    /// table do not interfere: each just computes its own byte offset.
    pub fn row(&self) -> Row<'_> {
        Row { table: self, index: 0 }
    }

    fn row_start(&self, index: u32) -> usize {
        self.header_end + index as usize * self.header.row_stride as usize
    }
}

/// A mutable cursor over one row of a [`Table`]. Moving `index` changes
/// where every subsequent `get` reads from; nothing is cached across moves.
pub struct Row<'t> {
    table: &'t Table,
    index: u32,
}

impl<'t> Row<'t> {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn set_index(&mut self, index: u32) {
        self.index = index;
    }

    /// Reads the value of the column at `ordinal` for the current row.
    pub fn get(&self, ordinal: usize) -> Result<Value<'t>> {
        let column = self.table.column(ordinal).ok_or_else(|| {
            KradataError::InvalidHandle(format!("no column at ordinal {ordinal}"))
        })?;
        if self.index >= self.table.row_count() {
            return Err(KradataError::InvalidHandle(format!(
                "row index {} out of range (row count {})",
                self.index,
                self.table.row_count()
            )));
        }
        let row_start = self.table.row_start(self.index);
        column.ty.get(
            self.table.block.view(),
            row_start + column.offset as usize,
            column.size as usize,
        )
    }

    pub fn get_by_name(&self, name: &str) -> Result<Value<'t>> {
        let ordinal = self
            .table
            .column_ordinal(name)
            .ok_or_else(|| KradataError::RuleError(format!("unknown column {name:?}")))?;
        self.get(ordinal)
    }
}
