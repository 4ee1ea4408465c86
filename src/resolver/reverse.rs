use crate::dwarf::navigator;
use crate::dwarf::unit::{DieVariant, InlinedDie, Unit};
use crate::dwarf::DebugInformation;
use crate::error::Result;
use crate::trace::ProbePoint;
use log::debug;
use std::path::PathBuf;

impl DebugInformation {
    /// Reverse translation: recover the enclosing function, source file and
    /// line for a raw instruction address.
    ///
    /// When the address falls into an inlined instance, the instance is used
    /// as the line anchor; at an inlined instance entry the call site is
    /// reported instead. Returns `None` when the address is not covered by
    /// the debug information.
    pub fn find_probe_point(&self, addr: u64) -> Result<Option<ProbePoint>> {
        let Some(unit) = self.find_unit_by_pc(addr)? else {
            debug!(target: "resolver", "no debug information for address {addr:#x}");
            return Ok(None);
        };

        // a line entry exactly at the address; failure does not matter here
        let mut fname: Option<PathBuf> = None;
        let mut lineno: Option<u64> = None;
        if let Some(place) = unit.find_exact_place_by_pc(addr) {
            fname = Some(place.file.to_path_buf());
            lineno = Some(place.line);
        }

        let mut func: Option<String> = None;
        let mut basefunc: Option<String> = None;
        let mut baseaddr: Option<u64> = None;
        let mut baseline: Option<u64> = None;

        if let Some(sp_idx) = navigator::find_subprogram_by_pc(unit, addr) {
            let DieVariant::Function(ref sp) = unit.entry(sp_idx).die else {
                unreachable!("function die expected");
            };
            basefunc = sp.base_attributes.name.clone();
            func = basefunc.clone();
            baseaddr = sp.entry_pc();

            if basefunc.is_none() || baseaddr.is_none() || sp.decl_line.is_none() {
                lineno = None;
            } else {
                baseline = sp.decl_line;
                let mut anchor_file = sp
                    .decl_file
                    .and_then(|idx| unit.file(idx))
                    .map(|p| p.to_path_buf());
                fname = anchor_file.clone().or(fname);

                if Some(addr) == baseaddr {
                    // function entry, the relative line number is zero
                    lineno = baseline;
                } else {
                    // track down the inline functions step by step
                    let mut scope = sp_idx;
                    while let Some(inl_idx) = navigator::find_inline_instance(unit, scope, addr)
                    {
                        let DieVariant::Inlined(ref inlined) = unit.entry(inl_idx).die else {
                            unreachable!("inlined instance expected");
                        };
                        if inlined.entry_pc() == Some(addr) {
                            // the address is an inline entry, report the
                            // call site instead
                            lineno = inlined.call_line;
                            fname = inlined
                                .call_file
                                .and_then(|idx| unit.file(idx))
                                .map(|p| p.to_path_buf());
                            break;
                        }
                        // the address is in the inline body, re-anchor the
                        // line to the inline function
                        let Some((name, decl_line, decl_file)) =
                            self.inline_anchor(unit, inlined)
                        else {
                            break;
                        };
                        func = Some(name);
                        baseline = Some(decl_line);
                        anchor_file = decl_file;
                        scope = inl_idx;
                    }

                    // the line and its anchor must live in one file
                    match (&anchor_file, &fname) {
                        (Some(anchor), Some(fname)) if anchor == fname => {}
                        (Some(_), None) => {}
                        _ => lineno = None,
                    }
                }
            }
        }

        let mut point = ProbePoint {
            file: fname,
            ..Default::default()
        };
        if let (Some(lineno), Some(baseline)) = (lineno, baseline) {
            point.line = Some(lineno as i64 - baseline as i64);
            point.function = func;
        } else if let (Some(basefunc), Some(_)) = (basefunc, baseaddr) {
            point.function = Some(basefunc);
        }
        if let Some(baseaddr) = baseaddr {
            point.offset = Some(addr - baseaddr);
        }

        if point.function.is_none() && point.file.is_none() {
            return Ok(None);
        }
        Ok(Some(point))
    }

    /// Name, declaration line and declaration file of an inlined instance,
    /// taken from its abstract origin.
    fn inline_anchor(
        &self,
        unit: &Unit,
        inlined: &InlinedDie,
    ) -> Option<(String, u64, Option<PathBuf>)> {
        let (origin_unit, origin_idx) = self.deref_die(unit, inlined.abstract_origin?)?;
        let DieVariant::Function(ref origin) = origin_unit.entry(origin_idx).die else {
            return None;
        };
        let name = origin.base_attributes.name.clone()?;
        let decl_line = origin.decl_line?;
        let decl_file = origin
            .decl_file
            .and_then(|idx| origin_unit.file(idx))
            .map(|p| p.to_path_buf());
        Some((name, decl_line, decl_file))
    }
}

#[cfg(test)]
mod test {
    use crate::dwarf::testing;
    use crate::dwarf::unit::{DieRef, DieVariant, FunctionDie, InlinedDie};
    use crate::dwarf::DebugInformation;
    use gimli::{Range, UnitOffset};
    use std::path::Path;

    /// Same program model as the locator tests: `schedule` at 0x1000 with an
    /// inlined `hot` body at 0x1030.
    fn di() -> DebugInformation {
        let mut b = testing::UnitBuilder::new()
            .file("kernel/sched/core.c")
            .range(0x1000, 0x2000)
            .line(0x1000, 0, 120, true)
            .line(0x1010, 0, 121, true)
            .line(0x1030, 0, 122, true);

        let sched = b.die(
            0,
            DieVariant::Function(FunctionDie {
                base_attributes: testing::attrs_with_ranges(
                    "schedule",
                    [Range {
                        begin: 0x1000,
                        end: 0x1080,
                    }],
                ),
                decl_file: Some(0),
                decl_line: Some(119),
                frame_base: None,
                inline_attr: false,
                declaration: false,
                abstract_origin: None,
            }),
        );
        let hot = b.die(
            0,
            DieVariant::Function(FunctionDie {
                base_attributes: testing::attrs("hot"),
                decl_file: Some(0),
                decl_line: Some(90),
                frame_base: None,
                inline_attr: true,
                declaration: false,
                abstract_origin: None,
            }),
        );
        b.die(
            sched,
            DieVariant::Inlined(InlinedDie {
                base_attributes: testing::anon_attrs_with_ranges([Range {
                    begin: 0x1030,
                    end: 0x1040,
                }]),
                abstract_origin: Some(DieRef::Unit(UnitOffset(hot))),
                call_file: Some(0),
                call_line: Some(122),
            }),
        );

        DebugInformation::with_units(vec![b.build()])
    }

    #[test]
    fn test_function_entry() {
        let di = di();
        let point = di.find_probe_point(0x1000).unwrap().expect("point");
        assert_eq!(point.function.as_deref(), Some("schedule"));
        assert_eq!(point.offset, Some(0));
        assert_eq!(point.line, Some(0));
        assert_eq!(point.file.as_deref(), Some(Path::new("kernel/sched/core.c")));
    }

    #[test]
    fn test_function_body_line() {
        let di = di();
        let point = di.find_probe_point(0x1010).unwrap().expect("point");
        assert_eq!(point.function.as_deref(), Some("schedule"));
        // line 121 relative to the declaration line 119
        assert_eq!(point.line, Some(2));
        assert_eq!(point.offset, Some(0x10));
    }

    #[test]
    fn test_inline_entry_reports_call_site() {
        let di = di();
        let point = di.find_probe_point(0x1030).unwrap().expect("point");
        // the anchor stays on the caller, the line is the call site
        assert_eq!(point.function.as_deref(), Some("schedule"));
        assert_eq!(point.line, Some(3));
        assert_eq!(point.file.as_deref(), Some(Path::new("kernel/sched/core.c")));
    }

    #[test]
    fn test_inline_body_falls_back_to_offset() {
        let di = di();
        // no exact line row at this address
        let point = di.find_probe_point(0x1035).unwrap().expect("point");
        assert_eq!(point.function.as_deref(), Some("schedule"));
        assert_eq!(point.line, None);
        assert_eq!(point.offset, Some(0x35));
    }

    #[test]
    fn test_unknown_address() {
        let di = di();
        assert!(di.find_probe_point(0x9000_0000).unwrap().is_none());
    }
}
