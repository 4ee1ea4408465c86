//! Hand-made unit fixtures for resolver tests.

use crate::dwarf::unit::{
    DieAttributes, DieRange, DieVariant, Entry, LineRow, Node, Unit, UnitProperties,
};
use crate::dwarf::EndianArcSlice;
use gimli::{
    DebugAddrBase, DebugLocListsBase, Encoding, Expression, Format, Range, RunTimeEndian,
    UnitOffset,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

pub fn encoding() -> Encoding {
    Encoding {
        format: Format::Dwarf32,
        version: 4,
        address_size: 8,
    }
}

/// Build a raw DWARF expression from bytes.
pub fn expr(bytes: &[u8]) -> Expression<EndianArcSlice> {
    Expression(EndianArcSlice::new(
        Arc::from(bytes),
        RunTimeEndian::Little,
    ))
}

pub fn attrs(name: &str) -> DieAttributes {
    DieAttributes {
        name: Some(name.to_string()),
        ranges: Box::new([]),
    }
}

pub fn attrs_with_ranges(name: &str, ranges: impl Into<Box<[Range]>>) -> DieAttributes {
    DieAttributes {
        name: Some(name.to_string()),
        ranges: ranges.into(),
    }
}

pub fn anon_attrs() -> DieAttributes {
    DieAttributes {
        name: None,
        ranges: Box::new([]),
    }
}

pub fn anon_attrs_with_ranges(ranges: impl Into<Box<[Range]>>) -> DieAttributes {
    DieAttributes {
        name: None,
        ranges: ranges.into(),
    }
}

pub struct UnitBuilder {
    entries: Vec<Entry>,
    files: Vec<PathBuf>,
    lines: Vec<LineRow>,
    ranges: Vec<Range>,
}

impl UnitBuilder {
    /// A builder with the unit root entry already in place (index 0).
    pub fn new() -> Self {
        Self {
            entries: vec![Entry {
                offset: UnitOffset(0),
                die: DieVariant::Default(DieAttributes::default()),
                node: Node::new_leaf(None),
            }],
            files: vec![],
            lines: vec![],
            ranges: vec![],
        }
    }

    pub fn file(mut self, path: &str) -> Self {
        self.files.push(PathBuf::from(path));
        self
    }

    pub fn range(mut self, begin: u64, end: u64) -> Self {
        self.ranges.push(Range { begin, end });
        self
    }

    pub fn line(mut self, address: u64, file_index: u64, line: u64, is_stmt: bool) -> Self {
        self.lines.push(LineRow::new(address, file_index, line, is_stmt));
        self
    }

    /// Append an entry under `parent` and return its index. The entry unit
    /// offset mirrors the index, so `DieRef::Unit(UnitOffset(idx))` resolves
    /// back to it.
    pub fn die(&mut self, parent: usize, die: DieVariant) -> usize {
        let idx = self.entries.len();
        self.entries.push(Entry {
            offset: UnitOffset(idx),
            die,
            node: Node::new_leaf(Some(parent)),
        });
        self.entries[parent].node.children.push(idx);
        idx
    }

    pub fn build(self) -> Unit {
        let mut lines = self.lines;
        lines.sort_unstable_by_key(|row| row.address);

        let mut ranges = self.ranges;
        ranges.sort_unstable_by_key(|r| r.begin);

        let die_offsets: HashMap<UnitOffset, usize> = self
            .entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| (entry.offset, idx))
            .collect();

        let mut die_ranges: Vec<DieRange> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| matches!(entry.die, DieVariant::Function(_)))
            .flat_map(|(die_idx, entry)| {
                entry
                    .die
                    .base_attributes()
                    .ranges
                    .iter()
                    .map(move |&range| DieRange { range, die_idx })
            })
            .collect();
        die_ranges.sort_unstable_by_key(|dr| dr.range.begin);

        Unit {
            idx: 0,
            name: None,
            comp_dir: None,
            properties: UnitProperties {
                encoding: encoding(),
                offset: None,
                low_pc: 0,
                addr_base: DebugAddrBase(0),
                loclists_base: DebugLocListsBase(0),
                address_size: 8,
            },
            files: self.files,
            lines,
            ranges,
            entries: self.entries,
            die_ranges,
            die_offsets,
        }
    }
}

/// SLEB128 encoding for hand-made expression operands.
pub fn sleb128(mut value: i64) -> Vec<u8> {
    let mut out = vec![];
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        if done {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}
