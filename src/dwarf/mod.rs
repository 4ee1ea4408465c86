pub mod fields;
pub mod location;
pub mod navigator;
pub mod parser;
#[cfg(test)]
pub(crate) mod testing;
pub mod types;
pub mod unit;

use crate::dwarf::parser::DwarfUnitParser;
use crate::dwarf::unit::{DieRef, Unit};
use crate::error::{Error, Result};
use fallible_iterator::FallibleIterator;
use gimli::{
    BaseAddresses, CfaRule, DebugAddr, DebugFrame, DebugInfoOffset, Dwarf, EhFrame, LocationLists,
    Register, RunTimeEndian, Section, SectionId, UnitOffset, UnwindContext, UnwindSection,
};
use log::{debug, info};
use memmap2::Mmap;
use object::{Object, ObjectSection};
use std::borrow::Cow;
use std::fs;
use std::ops::Add;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub type EndianArcSlice = gimli::EndianArcSlice<gimli::RunTimeEndian>;

/// Debug information of a single object file, parsed into owned units.
///
/// The reader handle is exclusively owned by one resolver invocation at a
/// time; all data reachable from [`Unit`] is copied out of the underlying
/// sections.
pub struct DebugInformation {
    file: PathBuf,
    inner: Dwarf<EndianArcSlice>,
    eh_frame: EhFrame<EndianArcSlice>,
    debug_frame: DebugFrame<EndianArcSlice>,
    bases: BaseAddresses,
    units: Option<Vec<Unit>>,
}

fn load_section(
    id: SectionId,
    file: &object::File,
    endian: RunTimeEndian,
) -> gimli::Result<EndianArcSlice> {
    let data = file
        .section_by_name(id.name())
        .and_then(|section| section.uncompressed_data().ok())
        .unwrap_or(Cow::Borrowed(&[]));
    Ok(gimli::EndianArcSlice::new(Arc::from(&*data), endian))
}

const DEBUG_FILES_DIR: &str = "/usr/lib/debug";

/// Resolve the `.note.gnu.build-id` link to a separate debug information
/// file, if the object carries one.
fn find_separate_debug_file(obj_file: &object::File) -> Result<Option<(PathBuf, Mmap)>> {
    let Some(build_id) = obj_file.section_by_name(".note.gnu.build-id") else {
        return Ok(None);
    };
    let data = build_id.data()?;
    // skip 16 byte note header
    if data.len() < 18 {
        return Ok(None);
    }
    let note = &data[16..];

    let dir = format!("{:x}", note[0]);
    let file = note[1..]
        .iter()
        .map(|&b| format!("{b:02x}"))
        .collect::<Vec<String>>()
        .join("")
        .add(".debug");

    let path = PathBuf::from(DEBUG_FILES_DIR)
        .join(".build-id")
        .join(dir)
        .join(file);
    let Ok(file) = fs::File::open(path.as_path()) else {
        return Ok(None);
    };
    let mmap = unsafe { Mmap::map(&file)? };
    Ok(Some((path, mmap)))
}

impl DebugInformation {
    /// Open an object file and parse its debug information.
    ///
    /// If the file links to a separate debug information file (by build-id),
    /// the DWARF sections are taken from there.
    pub fn open(obj_path: &Path) -> Result<Self> {
        let file = fs::File::open(obj_path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let file = object::File::parse(&*mmap)?;

        let endian = if file.is_little_endian() {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };

        let eh_frame = EhFrame::load(|id| load_section(id, &file, endian))?;
        let debug_frame = DebugFrame::load(|id| load_section(id, &file, endian))?;

        let section_addr = |name: &str| -> Option<u64> {
            file.sections().find_map(|section| {
                if section.name().ok()? == name {
                    Some(section.address())
                } else {
                    None
                }
            })
        };
        let mut bases = BaseAddresses::default();
        if let Some(got) = section_addr(".got") {
            bases = bases.set_got(got);
        }
        if let Some(text) = section_addr(".text") {
            bases = bases.set_text(text);
        }
        if let Some(eh) = section_addr(".eh_frame") {
            bases = bases.set_eh_frame(eh);
        }
        if let Some(eh_frame_hdr) = section_addr(".eh_frame_hdr") {
            bases = bases.set_eh_frame_hdr(eh_frame_hdr);
        }

        let debug_split_file_data;
        let debug_split_file;
        let debug_info_file = if let Some((path, debug_file)) = find_separate_debug_file(&file)? {
            debug!(target: "dwarf-loader", "{obj_path:?} has separate debug information file");
            debug!(target: "dwarf-loader", "load debug information from {path:?}");
            debug_split_file_data = debug_file;
            debug_split_file = object::File::parse(&*debug_split_file_data)?;
            &debug_split_file
        } else {
            debug!(target: "dwarf-loader", "load debug information from {obj_path:?}");
            &file
        };

        let dwarf = Dwarf::load(|id| load_section(id, debug_info_file, endian))?;

        let parser = DwarfUnitParser::new(&dwarf);
        let headers = dwarf.units().collect::<Vec<_>>()?;

        if headers.is_empty() {
            // no units means no debug info
            info!(target: "dwarf-loader", "no debug information for {obj_path:?}");
            return Ok(DebugInformation {
                file: obj_path.to_path_buf(),
                inner: dwarf,
                eh_frame,
                debug_frame,
                bases,
                units: None,
            });
        }

        let mut units = headers
            .into_iter()
            .map(|header| parser.parse(header))
            .collect::<Result<Vec<_>>>()?;

        units.sort_unstable_by_key(|u| u.offset());
        units.iter_mut().enumerate().for_each(|(i, u)| u.set_idx(i));

        Ok(DebugInformation {
            file: obj_path.to_path_buf(),
            inner: dwarf,
            eh_frame,
            debug_frame,
            bases,
            units: Some(units),
        })
    }

    /// Return path to the file the debug information was requested for.
    pub fn pathname(&self) -> &Path {
        self.file.as_path()
    }

    pub fn dwarf(&self) -> &Dwarf<EndianArcSlice> {
        &self.inner
    }

    /// The location lists in the .debug_loc and .debug_loclists sections.
    pub fn locations(&self) -> &LocationLists<EndianArcSlice> {
        &self.inner.locations
    }

    pub fn debug_addr(&self) -> &DebugAddr<EndianArcSlice> {
        &self.inner.debug_addr
    }

    /// Return all dwarf units or an error if no debug information found.
    pub fn get_units(&self) -> Result<&[Unit]> {
        self.units.as_deref().ok_or(Error::NoDebugInformation)
    }

    /// Return unit by its index.
    ///
    /// # Panics
    ///
    /// Panic if the unit does not exist.
    pub fn unit_ensure(&self, idx: usize) -> &Unit {
        &self.units.as_ref().expect("unreachable: units must exist")[idx]
    }

    /// Searches for a unit by occurrences of PC in its ranges.
    pub fn find_unit_by_pc(&self, pc: u64) -> Result<Option<&Unit>> {
        Ok(self.get_units()?.iter().find(|unit| unit.contains(pc)))
    }

    /// Dereference a DIE reference starting from a default unit.
    ///
    /// Returns the owning unit and the entry index inside it.
    pub fn deref_die<'this>(
        &'this self,
        default_unit: &'this Unit,
        reference: DieRef,
    ) -> Option<(&'this Unit, usize)> {
        match reference {
            DieRef::Unit(offset) => default_unit
                .find_entry_idx(offset)
                .map(|idx| (default_unit, idx)),
            DieRef::Global(offset) => {
                let units = self.get_units().ok()?;
                let mb_unit = units.binary_search_by_key(&Some(offset), |u| u.offset());
                let unit = match mb_unit {
                    Ok(pos) => &units[pos],
                    Err(0) => return None,
                    Err(pos) => &units[pos - 1],
                };
                let offset = UnitOffset(offset.0 - unit.offset().unwrap_or(DebugInfoOffset(0)).0);
                unit.find_entry_idx(offset).map(|idx| (unit, idx))
            }
        }
    }

    /// Resolve the call-frame-address rule at the given PC into its canonical
    /// register-plus-offset form.
    ///
    /// Composite CFA expressions are outside the supported subset.
    pub fn resolve_cfa(&self, pc: u64) -> Result<(Register, i64)> {
        let mut ctx = Box::new(UnwindContext::new());

        let rule = match self.eh_frame.unwind_info_for_address(
            &self.bases,
            &mut ctx,
            pc,
            EhFrame::cie_from_offset,
        ) {
            Ok(row) => row.cfa().clone(),
            Err(e) => {
                debug!(target: "resolver", "no .eh_frame row for {pc:#x} ({e}), try .debug_frame");
                let mut ctx = Box::new(UnwindContext::new());
                self.debug_frame
                    .unwind_info_for_address(
                        &self.bases,
                        &mut ctx,
                        pc,
                        DebugFrame::cie_from_offset,
                    )?
                    .cfa()
                    .clone()
            }
        };

        match rule {
            CfaRule::RegisterAndOffset { register, offset } => Ok((register, offset)),
            CfaRule::Expression(_) => Err(Error::UnsupportedCfa),
        }
    }

    /// Build debug information from already parsed units, without any
    /// backing sections. Supports tests over hand-made units.
    #[cfg(test)]
    pub(crate) fn with_units(mut units: Vec<Unit>) -> Self {
        let endian = RunTimeEndian::Little;
        let empty = |_: SectionId| -> gimli::Result<EndianArcSlice> {
            Ok(gimli::EndianArcSlice::new(Arc::from(&b""[..]), endian))
        };
        units.iter_mut().enumerate().for_each(|(i, u)| u.set_idx(i));
        Self {
            file: PathBuf::new(),
            inner: Dwarf::load(empty).expect("infallible"),
            eh_frame: EhFrame::load(empty).expect("infallible"),
            debug_frame: DebugFrame::load(empty).expect("infallible"),
            bases: BaseAddresses::default(),
            units: Some(units),
        }
    }
}
