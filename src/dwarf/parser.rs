use crate::dwarf::unit::{
    ArrayTypeDie, BaseTypeDie, DieAttributes, DieLocation, DieRange, DieRef, DieVariant, Entry,
    EnumTypeDie, FunctionDie, InlinedDie, LexicalBlockDie, LineRow, MemberDie, MemberLocation,
    ParameterDie, PointerTypeDie, QualifierDie, QualifierKind, StructTypeDie, TypeDefDie,
    UnionTypeDie, Unit, UnitProperties, VariableDie,
};
use crate::dwarf::EndianArcSlice;
use crate::error::Result;
use fallible_iterator::FallibleIterator;
use gimli::{
    Attribute, AttributeValue, DebuggingInformationEntry, DwAt, Range, Reader, UnitHeader,
    DW_AT_abstract_origin, DW_AT_byte_size, DW_AT_call_file, DW_AT_call_line, DW_AT_const_value,
    DW_AT_data_member_location, DW_AT_declaration, DW_AT_decl_file, DW_AT_decl_line,
    DW_AT_encoding, DW_AT_external, DW_AT_frame_base, DW_AT_inline, DW_AT_location, DW_AT_name,
    DW_AT_type, DW_INL_not_inlined,
};
use std::collections::HashMap;
use std::num::NonZeroU64;
use std::path::PathBuf;

type GimliUnit = gimli::Unit<EndianArcSlice, usize>;
type GimliDie<'a, 'u> = DebuggingInformationEntry<'a, 'u, EndianArcSlice, usize>;

pub struct DwarfUnitParser<'a> {
    dwarf: &'a gimli::Dwarf<EndianArcSlice>,
}

impl<'a> DwarfUnitParser<'a> {
    pub fn new(dwarf: &'a gimli::Dwarf<EndianArcSlice>) -> Self {
        Self { dwarf }
    }

    fn attr_to_string(
        &self,
        unit: &GimliUnit,
        die: &GimliDie,
        attr: DwAt,
    ) -> gimli::Result<Option<String>> {
        let Some(value) = die.attr_value(attr)? else {
            return Ok(None);
        };
        let s = self.dwarf.attr_string(unit, value)?;
        Ok(Some(s.to_string_lossy()?.into_owned()))
    }

    fn attr_to_udata(die: &GimliDie, attr: DwAt) -> gimli::Result<Option<u64>> {
        Ok(die.attr(attr)?.and_then(|attr| attr.udata_value()))
    }

    fn attr_to_flag(die: &GimliDie, attr: DwAt) -> gimli::Result<bool> {
        Ok(matches!(
            die.attr_value(attr)?,
            Some(AttributeValue::Flag(true))
        ))
    }

    fn attr_to_die_ref(die: &GimliDie, attr: DwAt) -> gimli::Result<Option<DieRef>> {
        Ok(die.attr(attr)?.and_then(DieRef::from_attr))
    }

    /// Normalize a location attribute: an expression stays as is, location
    /// list forms are reduced to a list offset.
    fn parse_location(
        &self,
        unit: &GimliUnit,
        attr: &Attribute<EndianArcSlice>,
    ) -> Option<DieLocation> {
        if let Some(expr) = attr.exprloc_value() {
            return Some(DieLocation::Expr(expr));
        }
        match attr.value() {
            AttributeValue::LocationListsRef(offset) => Some(DieLocation::List(offset)),
            AttributeValue::DebugLocListsIndex(index) => {
                let offset = self
                    .dwarf
                    .locations
                    .get_offset(unit.encoding(), unit.loclists_base, index)
                    .ok()?;
                Some(DieLocation::List(offset))
            }
            _ => None,
        }
    }

    fn attr_to_location(
        &self,
        unit: &GimliUnit,
        die: &GimliDie,
        attr: DwAt,
    ) -> gimli::Result<Option<DieLocation>> {
        Ok(die
            .attr(attr)?
            .and_then(|attr| self.parse_location(unit, &attr)))
    }

    fn die_ranges(&self, unit: &GimliUnit, die: &GimliDie) -> gimli::Result<Box<[Range]>> {
        let ranges: Vec<Range> = self.dwarf.die_ranges(unit, die)?.collect()?;
        Ok(ranges.into())
    }

    fn base_attributes(&self, unit: &GimliUnit, die: &GimliDie) -> gimli::Result<DieAttributes> {
        Ok(DieAttributes {
            name: self.attr_to_string(unit, die, DW_AT_name)?,
            ranges: self.die_ranges(unit, die)?,
        })
    }

    fn parse_die(&self, unit: &GimliUnit, die: &GimliDie) -> gimli::Result<DieVariant> {
        let base_attributes = self.base_attributes(unit, die)?;

        let mb_qualifier = match die.tag() {
            gimli::DW_TAG_const_type => Some(QualifierKind::Const),
            gimli::DW_TAG_volatile_type => Some(QualifierKind::Volatile),
            gimli::DW_TAG_restrict_type => Some(QualifierKind::Restrict),
            gimli::DW_TAG_shared_type => Some(QualifierKind::Shared),
            gimli::DW_TAG_atomic_type => Some(QualifierKind::Atomic),
            _ => None,
        };
        if let Some(kind) = mb_qualifier {
            return Ok(DieVariant::Qualifier(QualifierDie {
                base_attributes,
                kind,
                type_ref: Self::attr_to_die_ref(die, DW_AT_type)?,
            }));
        }

        let variant = match die.tag() {
            gimli::DW_TAG_subprogram => DieVariant::Function(FunctionDie {
                decl_file: Self::attr_to_udata(die, DW_AT_decl_file)?,
                decl_line: Self::attr_to_udata(die, DW_AT_decl_line)?,
                frame_base: self.attr_to_location(unit, die, DW_AT_frame_base)?,
                inline_attr: match die.attr_value(DW_AT_inline)? {
                    Some(AttributeValue::Inline(value)) => value != DW_INL_not_inlined,
                    Some(AttributeValue::Udata(value)) => {
                        value != u64::from(DW_INL_not_inlined.0)
                    }
                    _ => false,
                },
                declaration: Self::attr_to_flag(die, DW_AT_declaration)?,
                abstract_origin: Self::attr_to_die_ref(die, DW_AT_abstract_origin)?,
                base_attributes,
            }),
            gimli::DW_TAG_inlined_subroutine => DieVariant::Inlined(InlinedDie {
                abstract_origin: Self::attr_to_die_ref(die, DW_AT_abstract_origin)?,
                call_file: Self::attr_to_udata(die, DW_AT_call_file)?,
                call_line: Self::attr_to_udata(die, DW_AT_call_line)?,
                base_attributes,
            }),
            gimli::DW_TAG_variable => DieVariant::Variable(VariableDie {
                type_ref: Self::attr_to_die_ref(die, DW_AT_type)?,
                location: self.attr_to_location(unit, die, DW_AT_location)?,
                external: Self::attr_to_flag(die, DW_AT_external)?,
                const_value: die.attr(DW_AT_const_value)?.and_then(|attr| {
                    attr.sdata_value()
                        .or_else(|| attr.udata_value().map(|v| v as i64))
                }),
                base_attributes,
            }),
            gimli::DW_TAG_formal_parameter => DieVariant::Parameter(ParameterDie {
                type_ref: Self::attr_to_die_ref(die, DW_AT_type)?,
                location: self.attr_to_location(unit, die, DW_AT_location)?,
                base_attributes,
            }),
            gimli::DW_TAG_lexical_block => {
                DieVariant::LexicalBlock(LexicalBlockDie { base_attributes })
            }
            gimli::DW_TAG_base_type => DieVariant::BaseType(BaseTypeDie {
                encoding: match die.attr_value(DW_AT_encoding)? {
                    Some(AttributeValue::Encoding(enc)) => Some(enc),
                    _ => None,
                },
                byte_size: Self::attr_to_udata(die, DW_AT_byte_size)?,
                base_attributes,
            }),
            gimli::DW_TAG_pointer_type => DieVariant::PointerType(PointerTypeDie {
                type_ref: Self::attr_to_die_ref(die, DW_AT_type)?,
                byte_size: Self::attr_to_udata(die, DW_AT_byte_size)?,
                base_attributes,
            }),
            gimli::DW_TAG_array_type => DieVariant::ArrayType(ArrayTypeDie {
                type_ref: Self::attr_to_die_ref(die, DW_AT_type)?,
                base_attributes,
            }),
            gimli::DW_TAG_structure_type => DieVariant::StructType(StructTypeDie {
                byte_size: Self::attr_to_udata(die, DW_AT_byte_size)?,
                base_attributes,
            }),
            gimli::DW_TAG_union_type => DieVariant::UnionType(UnionTypeDie {
                byte_size: Self::attr_to_udata(die, DW_AT_byte_size)?,
                base_attributes,
            }),
            gimli::DW_TAG_enumeration_type => DieVariant::EnumType(EnumTypeDie {
                type_ref: Self::attr_to_die_ref(die, DW_AT_type)?,
                byte_size: Self::attr_to_udata(die, DW_AT_byte_size)?,
                base_attributes,
            }),
            gimli::DW_TAG_member => DieVariant::Member(MemberDie {
                type_ref: Self::attr_to_die_ref(die, DW_AT_type)?,
                location: die.attr(DW_AT_data_member_location)?.and_then(|attr| {
                    if let Some(offset) = attr
                        .udata_value()
                        .map(|v| v as i64)
                        .or_else(|| attr.sdata_value())
                    {
                        Some(MemberLocation::Offset(offset))
                    } else {
                        attr.exprloc_value().map(MemberLocation::Expr)
                    }
                }),
                base_attributes,
            }),
            gimli::DW_TAG_typedef => DieVariant::TypeDef(TypeDefDie {
                type_ref: Self::attr_to_die_ref(die, DW_AT_type)?,
                base_attributes,
            }),
            _ => DieVariant::Default(base_attributes),
        };
        Ok(variant)
    }

    pub fn parse(&self, header: UnitHeader<EndianArcSlice>) -> Result<Unit> {
        let unit = self.dwarf.unit(header)?;

        let name = unit
            .name
            .as_ref()
            .and_then(|n| n.to_string_lossy().ok().map(|s| s.into_owned()));
        let comp_dir = unit
            .comp_dir
            .as_ref()
            .and_then(|d| d.to_string_lossy().ok().map(|s| PathBuf::from(s.as_ref())));

        let mut files = vec![];
        let mut lines = vec![];
        if let Some(ref lp) = unit.line_program {
            let mut rows = lp.clone().rows();
            lines = parse_lines(&mut rows)?;
            files = parse_files(self.dwarf, &unit, &rows)?;
        }
        lines.sort_unstable_by_key(|row| row.address);

        let mut ranges: Vec<Range> = self.dwarf.unit_ranges(&unit)?.collect()?;
        ranges.sort_unstable_by_key(|r| r.begin);

        let mut entries: Vec<Entry> = vec![];
        let mut die_offsets = HashMap::new();
        let mut parent_stack: Vec<usize> = vec![];
        let mut prev_idx: Option<usize> = None;

        let mut cursor = unit.entries();
        while let Some((delta_depth, die)) = cursor.next_dfs()? {
            if delta_depth > 0 {
                // the cursor descends one level at a time
                parent_stack.push(prev_idx.expect("first DIE is the unit root"));
            } else {
                for _ in 0..-delta_depth {
                    parent_stack.pop();
                }
            }

            let parent = parent_stack.last().copied();
            let idx = entries.len();
            entries.push(Entry::new(die.offset(), self.parse_die(&unit, die)?, parent));
            if let Some(parent) = parent {
                entries[parent].node.children.push(idx);
            }
            die_offsets.insert(die.offset(), idx);
            prev_idx = Some(idx);
        }

        let mut die_ranges: Vec<DieRange> = entries
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

        Ok(Unit {
            idx: usize::MAX,
            name,
            comp_dir,
            properties: UnitProperties {
                encoding: unit.encoding(),
                offset: unit.header.offset().as_debug_info_offset(),
                low_pc: unit.low_pc,
                addr_base: unit.addr_base,
                loclists_base: unit.loclists_base,
                address_size: unit.header.address_size(),
            },
            files,
            lines,
            ranges,
            entries,
            die_ranges,
            die_offsets,
        })
    }
}

fn parse_lines<R, Offset>(
    rows: &mut gimli::LineRows<R, gimli::IncompleteLineProgram<R, Offset>, Offset>,
) -> gimli::Result<Vec<LineRow>>
where
    R: Reader<Offset = Offset>,
    Offset: gimli::ReaderOffset,
{
    let mut lines = vec![];
    while let Some((_, line_row)) = rows.next_row()? {
        let column = match line_row.column() {
            gimli::ColumnType::LeftEdge => 0,
            gimli::ColumnType::Column(x) => x.get(),
        };

        lines.push(LineRow {
            address: line_row.address(),
            file_index: line_row.file_index(),
            line: line_row.line().map(NonZeroU64::get).unwrap_or(0),
            column,
            flags: LineRow::pack_flags(
                line_row.is_stmt(),
                line_row.prologue_end(),
                line_row.epilogue_begin(),
                line_row.end_sequence(),
            ),
        })
    }

    lines.shrink_to_fit();
    Ok(lines)
}

fn parse_files<R, Offset>(
    dwarf: &gimli::Dwarf<R>,
    unit: &gimli::Unit<R>,
    rows: &gimli::LineRows<R, gimli::IncompleteLineProgram<R, Offset>, Offset>,
) -> gimli::Result<Vec<PathBuf>>
where
    R: Reader<Offset = Offset>,
    Offset: gimli::ReaderOffset,
{
    let mut files = vec![];
    let header = rows.header();
    match header.file(0) {
        Some(file) => files.push(render_file_path(unit, file, header, dwarf)?),
        None => files.push(PathBuf::default()),
    }
    let mut index = 1;
    while let Some(file) = header.file(index) {
        files.push(render_file_path(unit, file, header, dwarf)?);
        index += 1;
    }

    files.shrink_to_fit();
    Ok(files)
}

fn render_file_path<R: Reader>(
    dw_unit: &gimli::Unit<R>,
    file: &gimli::FileEntry<R, R::Offset>,
    header: &gimli::LineProgramHeader<R, R::Offset>,
    sections: &gimli::Dwarf<R>,
) -> gimli::Result<PathBuf> {
    let mut path = if let Some(ref comp_dir) = dw_unit.comp_dir {
        PathBuf::from(comp_dir.to_string_lossy()?.as_ref())
    } else {
        PathBuf::new()
    };

    if file.directory_index() != 0 {
        if let Some(directory) = file.directory(header) {
            path.push(
                sections
                    .attr_string(dw_unit, directory)?
                    .to_string_lossy()?
                    .as_ref(),
            );
        }
    }

    path.push(
        sections
            .attr_string(dw_unit, file.path_name())?
            .to_string_lossy()?
            .as_ref(),
    );

    Ok(path)
}
