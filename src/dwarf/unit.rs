use crate::dwarf::EndianArcSlice;
use crate::paths;
use gimli::{
    Attribute, AttributeValue, DebugAddrBase, DebugInfoOffset, DebugLocListsBase, DwAte, Encoding,
    Expression, Range, UnitOffset,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const IS_STMT: u8 = 1 << 1;
const PROLOG_END: u8 = 1 << 2;
const EPILOG_BEGIN: u8 = 1 << 3;
const END_SEQUENCE: u8 = 1 << 4;

/// A row in the line number program's resulting matrix.
#[derive(PartialEq, Debug, Clone)]
pub struct LineRow {
    pub address: u64,
    pub file_index: u64,
    pub line: u64,
    pub column: u64,
    pub(super) flags: u8,
}

impl LineRow {
    pub(crate) fn new(address: u64, file_index: u64, line: u64, is_stmt: bool) -> Self {
        Self {
            address,
            file_index,
            line,
            column: 0,
            flags: if is_stmt { IS_STMT } else { 0 },
        }
    }

    #[inline(always)]
    pub fn is_stmt(&self) -> bool {
        self.flags & IS_STMT == IS_STMT
    }

    #[inline(always)]
    pub fn prolog_end(&self) -> bool {
        self.flags & PROLOG_END == PROLOG_END
    }

    #[inline(always)]
    pub fn epilog_begin(&self) -> bool {
        self.flags & EPILOG_BEGIN == EPILOG_BEGIN
    }

    #[inline(always)]
    pub fn end_sequence(&self) -> bool {
        self.flags & END_SEQUENCE == END_SEQUENCE
    }

    pub(super) fn pack_flags(
        is_stmt: bool,
        prolog_end: bool,
        epilog_begin: bool,
        end_sequence: bool,
    ) -> u8 {
        let mut flags = 0_u8;
        if is_stmt {
            flags |= IS_STMT;
        }
        if prolog_end {
            flags |= PROLOG_END;
        }
        if epilog_begin {
            flags |= EPILOG_BEGIN;
        }
        if end_sequence {
            flags |= END_SEQUENCE;
        }
        flags
    }
}

/// An address range of a function entry, refers to the entry by its index in
/// the unit entries list.
#[derive(Debug, Clone)]
pub struct DieRange {
    pub range: Range,
    pub die_idx: usize,
}

/// A place in the program text: file, line and the instruction address the
/// line table maps it to.
#[derive(Clone, Debug)]
pub struct PlaceDescriptor<'a> {
    pub file: &'a Path,
    pub address: u64,
    pub line: u64,
    pub is_stmt: bool,
    pub prolog_end: bool,
    pub pos_in_unit: usize,
}

/// Reference to another debug information entry, local to a unit or global
/// for the whole `.debug_info` section.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd)]
pub enum DieRef {
    Unit(UnitOffset),
    Global(DebugInfoOffset),
}

impl DieRef {
    pub(super) fn from_attr(attr: Attribute<EndianArcSlice>) -> Option<DieRef> {
        match attr.value() {
            AttributeValue::DebugInfoRef(offset) => Some(DieRef::Global(offset)),
            AttributeValue::UnitRef(offset) => Some(DieRef::Unit(offset)),
            _ => None,
        }
    }
}

/// A variable or frame-base location attribute, normalized at parse time.
#[derive(Debug, Clone)]
pub enum DieLocation {
    /// A single location expression.
    Expr(Expression<EndianArcSlice>),
    /// A location list; the covering entry is selected at evaluation time.
    List(gimli::LocationListsOffset),
}

/// Structure member placement inside its parent.
#[derive(Debug, Clone)]
pub enum MemberLocation {
    Offset(i64),
    Expr(Expression<EndianArcSlice>),
}

#[derive(Debug, PartialEq, Clone, Default)]
pub struct DieAttributes {
    pub name: Option<String>,
    pub ranges: Box<[Range]>,
}

#[derive(Debug, Clone)]
pub struct FunctionDie {
    pub base_attributes: DieAttributes,
    pub decl_file: Option<u64>,
    pub decl_line: Option<u64>,
    pub frame_base: Option<DieLocation>,
    /// DW_AT_inline is present with an "inlined" value.
    pub inline_attr: bool,
    pub declaration: bool,
    pub abstract_origin: Option<DieRef>,
}

impl FunctionDie {
    /// Entry address of a concrete instance, `None` for abstract roots.
    pub fn entry_pc(&self) -> Option<u64> {
        self.base_attributes
            .ranges
            .iter()
            .map(|r| r.begin)
            .min()
    }

    /// A concrete function body with code addresses.
    pub fn is_instance(&self) -> bool {
        !self.base_attributes.ranges.is_empty()
    }

    /// A definition suitable for probing: not a pure declaration, and either
    /// a concrete instance or an abstract inline root.
    pub fn is_definition(&self) -> bool {
        !self.declaration && (self.inline_attr || self.is_instance())
    }

    pub fn contains(&self, pc: u64) -> bool {
        self.base_attributes
            .ranges
            .iter()
            .any(|r| r.begin <= pc && pc < r.end)
    }
}

#[derive(Debug, Clone)]
pub struct InlinedDie {
    pub base_attributes: DieAttributes,
    pub abstract_origin: Option<DieRef>,
    pub call_file: Option<u64>,
    pub call_line: Option<u64>,
}

impl InlinedDie {
    pub fn entry_pc(&self) -> Option<u64> {
        self.base_attributes
            .ranges
            .iter()
            .map(|r| r.begin)
            .min()
    }

    pub fn contains(&self, pc: u64) -> bool {
        self.base_attributes
            .ranges
            .iter()
            .any(|r| r.begin <= pc && pc < r.end)
    }
}

#[derive(Debug, Clone)]
pub struct VariableDie {
    pub base_attributes: DieAttributes,
    pub type_ref: Option<DieRef>,
    pub location: Option<DieLocation>,
    pub external: bool,
    pub const_value: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ParameterDie {
    pub base_attributes: DieAttributes,
    pub type_ref: Option<DieRef>,
    pub location: Option<DieLocation>,
}

#[derive(Debug, Clone)]
pub struct LexicalBlockDie {
    pub base_attributes: DieAttributes,
}

#[derive(Debug, Clone)]
pub struct BaseTypeDie {
    pub base_attributes: DieAttributes,
    pub encoding: Option<DwAte>,
    pub byte_size: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct PointerTypeDie {
    pub base_attributes: DieAttributes,
    pub type_ref: Option<DieRef>,
    pub byte_size: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ArrayTypeDie {
    pub base_attributes: DieAttributes,
    pub type_ref: Option<DieRef>,
}

#[derive(Debug, Clone)]
pub struct StructTypeDie {
    pub base_attributes: DieAttributes,
    pub byte_size: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct UnionTypeDie {
    pub base_attributes: DieAttributes,
    pub byte_size: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct EnumTypeDie {
    pub base_attributes: DieAttributes,
    pub type_ref: Option<DieRef>,
    pub byte_size: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct MemberDie {
    pub base_attributes: DieAttributes,
    pub type_ref: Option<DieRef>,
    pub location: Option<MemberLocation>,
}

#[derive(Debug, Clone)]
pub struct TypeDefDie {
    pub base_attributes: DieAttributes,
    pub type_ref: Option<DieRef>,
}

/// C type qualifiers that are transparent for type resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualifierKind {
    Const,
    Volatile,
    Restrict,
    Shared,
    Atomic,
}

#[derive(Debug, Clone)]
pub struct QualifierDie {
    pub base_attributes: DieAttributes,
    pub kind: QualifierKind,
    pub type_ref: Option<DieRef>,
}

#[derive(Debug, Clone)]
pub enum DieVariant {
    Function(FunctionDie),
    Inlined(InlinedDie),
    Variable(VariableDie),
    Parameter(ParameterDie),
    LexicalBlock(LexicalBlockDie),
    BaseType(BaseTypeDie),
    PointerType(PointerTypeDie),
    ArrayType(ArrayTypeDie),
    StructType(StructTypeDie),
    UnionType(UnionTypeDie),
    EnumType(EnumTypeDie),
    Member(MemberDie),
    TypeDef(TypeDefDie),
    Qualifier(QualifierDie),
    Default(DieAttributes),
}

impl DieVariant {
    pub fn base_attributes(&self) -> &DieAttributes {
        match self {
            DieVariant::Function(die) => &die.base_attributes,
            DieVariant::Inlined(die) => &die.base_attributes,
            DieVariant::Variable(die) => &die.base_attributes,
            DieVariant::Parameter(die) => &die.base_attributes,
            DieVariant::LexicalBlock(die) => &die.base_attributes,
            DieVariant::BaseType(die) => &die.base_attributes,
            DieVariant::PointerType(die) => &die.base_attributes,
            DieVariant::ArrayType(die) => &die.base_attributes,
            DieVariant::StructType(die) => &die.base_attributes,
            DieVariant::UnionType(die) => &die.base_attributes,
            DieVariant::EnumType(die) => &die.base_attributes,
            DieVariant::Member(die) => &die.base_attributes,
            DieVariant::TypeDef(die) => &die.base_attributes,
            DieVariant::Qualifier(die) => &die.base_attributes,
            DieVariant::Default(attrs) => attrs,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.base_attributes().name.as_deref()
    }

    /// The `DW_AT_type` reference of a DIE, for the kinds that carry one.
    pub fn type_ref(&self) -> Option<DieRef> {
        match self {
            DieVariant::Variable(die) => die.type_ref,
            DieVariant::Parameter(die) => die.type_ref,
            DieVariant::PointerType(die) => die.type_ref,
            DieVariant::ArrayType(die) => die.type_ref,
            DieVariant::EnumType(die) => die.type_ref,
            DieVariant::Member(die) => die.type_ref,
            DieVariant::TypeDef(die) => die.type_ref,
            DieVariant::Qualifier(die) => die.type_ref,
            _ => None,
        }
    }
}

/// A DIE describing a value allocated somewhere in the debuggee: a local
/// variable or a formal parameter.
pub trait AllocatedValue {
    fn name(&self) -> Option<&str>;

    fn type_ref(&self) -> Option<DieRef>;

    fn location(&self) -> Option<&DieLocation>;

    /// True for variables linked to an external (global) symbol.
    fn external(&self) -> bool {
        false
    }

    fn const_value(&self) -> Option<i64> {
        None
    }
}

impl AllocatedValue for VariableDie {
    fn name(&self) -> Option<&str> {
        self.base_attributes.name.as_deref()
    }

    fn type_ref(&self) -> Option<DieRef> {
        self.type_ref
    }

    fn location(&self) -> Option<&DieLocation> {
        self.location.as_ref()
    }

    fn external(&self) -> bool {
        self.external
    }

    fn const_value(&self) -> Option<i64> {
        self.const_value
    }
}

impl AllocatedValue for ParameterDie {
    fn name(&self) -> Option<&str> {
        self.base_attributes.name.as_deref()
    }

    fn type_ref(&self) -> Option<DieRef> {
        self.type_ref
    }

    fn location(&self) -> Option<&DieLocation> {
        self.location.as_ref()
    }
}

/// Node of the debug entries tree, child and parent references are indexes
/// in the unit entries list.
#[derive(Debug, Clone, Default)]
pub struct Node {
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

impl Node {
    pub const fn new_leaf(parent: Option<usize>) -> Node {
        Self {
            parent,
            children: vec![],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub offset: UnitOffset,
    pub die: DieVariant,
    pub node: Node,
}

impl Entry {
    pub(super) fn new(offset: UnitOffset, die: DieVariant, parent_idx: Option<usize>) -> Self {
        Self {
            offset,
            die,
            node: Node::new_leaf(parent_idx),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnitProperties {
    pub encoding: Encoding,
    pub offset: Option<DebugInfoOffset>,
    pub low_pc: u64,
    pub addr_base: DebugAddrBase,
    pub loclists_base: DebugLocListsBase,
    pub address_size: u8,
}

/// DWARF compilation unit representation: the line table, the file table and
/// the debug entries tree, all copied out of the reader into owned values.
#[derive(Debug, Clone)]
pub struct Unit {
    pub(crate) idx: usize,
    pub(crate) name: Option<String>,
    pub(crate) comp_dir: Option<PathBuf>,
    pub(crate) properties: UnitProperties,
    pub(crate) files: Vec<PathBuf>,
    /// List of program lines, ordered by address.
    pub(crate) lines: Vec<LineRow>,
    pub(crate) ranges: Vec<Range>,
    pub(crate) entries: Vec<Entry>,
    /// Function ranges ordered by begin address.
    pub(crate) die_ranges: Vec<DieRange>,
    pub(crate) die_offsets: HashMap<UnitOffset, usize>,
}

impl Unit {
    /// Return unit index in the unit registry.
    pub fn idx(&self) -> usize {
        self.idx
    }

    pub(crate) fn set_idx(&mut self, idx: usize) {
        self.idx = idx;
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn comp_dir(&self) -> Option<&Path> {
        self.comp_dir.as_deref()
    }

    /// Return the encoding parameters for this unit.
    pub fn encoding(&self) -> Encoding {
        self.properties.encoding
    }

    /// Return unit range lowest PC.
    pub fn low_pc(&self) -> u64 {
        self.properties.low_pc
    }

    pub fn addr_base(&self) -> DebugAddrBase {
        self.properties.addr_base
    }

    pub fn loclists_base(&self) -> DebugLocListsBase {
        self.properties.loclists_base
    }

    /// Return offset of this unit within the .debug_info section.
    pub fn offset(&self) -> Option<DebugInfoOffset> {
        self.properties.offset
    }

    pub fn address_size(&self) -> u8 {
        self.properties.address_size
    }

    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn entry(&self, idx: usize) -> &Entry {
        &self.entries[idx]
    }

    /// Return entry by its offset in the unit, `None` if it does not exist.
    pub fn find_entry(&self, offset: UnitOffset) -> Option<&Entry> {
        self.die_offsets.get(&offset).map(|&idx| &self.entries[idx])
    }

    pub fn find_entry_idx(&self, offset: UnitOffset) -> Option<usize> {
        self.die_offsets.get(&offset).copied()
    }

    pub fn contains(&self, pc: u64) -> bool {
        match self.ranges.binary_search_by_key(&pc, |r| r.begin) {
            Ok(_) => true,
            Err(pos) => self.ranges[..pos]
                .iter()
                .rev()
                .any(|range| range.begin <= pc && pc < range.end),
        }
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn file(&self, index: u64) -> Option<&Path> {
        self.files.get(index as usize).map(PathBuf::as_path)
    }

    /// Find the real path of a source file known to this unit by its tail.
    pub fn find_realpath(&self, file: &str) -> Option<&Path> {
        self.files
            .iter()
            .map(PathBuf::as_path)
            .find(|f| paths::tail_match(&f.to_string_lossy(), file))
    }

    pub fn lines(&self) -> &[LineRow] {
        &self.lines
    }

    fn place_from_row(&self, pos: usize) -> Option<PlaceDescriptor<'_>> {
        let row = self.lines.get(pos)?;
        Some(PlaceDescriptor {
            file: self.file(row.file_index)?,
            address: row.address,
            line: row.line,
            is_stmt: row.is_stmt(),
            prolog_end: row.prolog_end(),
            pos_in_unit: pos,
        })
    }

    /// Return the nearest place at or before the given program counter.
    pub fn find_place_by_pc(&self, pc: u64) -> Option<PlaceDescriptor<'_>> {
        let pos = match self.lines.binary_search_by_key(&pc, |row| row.address) {
            Ok(mut pos) => {
                while pos > 0 && self.lines[pos - 1].address == pc {
                    pos -= 1;
                }
                pos
            }
            Err(0) => return None,
            Err(pos) => pos - 1,
        };
        self.place_from_row(pos)
    }

    /// Return a place with the line address exactly equal to the given
    /// program counter.
    pub fn find_exact_place_by_pc(&self, pc: u64) -> Option<PlaceDescriptor<'_>> {
        match self.lines.binary_search_by_key(&pc, |row| row.address) {
            Ok(mut pos) => {
                while pos > 0 && self.lines[pos - 1].address == pc {
                    pos -= 1;
                }
                self.place_from_row(pos)
            }
            Err(_) => None,
        }
    }
}
