use crate::config::ResolverConfig;
use crate::dwarf::navigator;
use crate::dwarf::unit::{DieVariant, FunctionDie, Unit};
use crate::dwarf::DebugInformation;
use crate::error::Result;
use crate::line_list::LineList;
use crate::paths;
use crate::resolver::addr_in_scope;
use crate::trace::{LineRange, LineRangeSpec};
use crate::weak_error;
use log::debug;
use std::path::Path;

impl DebugInformation {
    /// Enumerate probeable source lines for a function or a file interval.
    ///
    /// Returns `None` when no line in the requested scope is probeable.
    pub fn find_line_range(
        &self,
        cfg: &ResolverConfig,
        spec: &LineRangeSpec,
    ) -> Result<Option<LineRange>> {
        let units = self.get_units()?;
        for unit in units {
            let found = match *spec {
                LineRangeSpec::Function {
                    ref name,
                    ref file,
                    range,
                } => self.line_range_by_function(cfg, unit, name, file.as_deref(), range)?,
                LineRangeSpec::File {
                    ref file,
                    start,
                    end,
                } => {
                    let Some(fname) = unit.find_realpath(file).map(Path::to_path_buf) else {
                        continue;
                    };
                    self.line_range_walk(cfg, unit, None, &fname, start, end, None)?
                }
            };
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    fn line_range_by_function(
        &self,
        cfg: &ResolverConfig,
        unit: &Unit,
        name: &str,
        file: Option<&str>,
        range: Option<(u64, u64)>,
    ) -> Result<Option<LineRange>> {
        for idx in 0..unit.entries().len() {
            let entry = unit.entry(idx);
            let DieVariant::Function(ref func) = entry.die else {
                continue;
            };
            if !func.is_definition() || !navigator::compare_name(entry, name) {
                continue;
            }
            let Some(decl_file) = decl_file_of(unit, func) else {
                continue;
            };
            if let Some(file) = file {
                if !paths::tail_match(&decl_file.to_string_lossy(), file) {
                    continue;
                }
            }
            let Some(decl_line) = func.decl_line else {
                continue;
            };
            debug!(target: "resolver", "fname: {decl_file:?}, lineno: {decl_line}");

            let (start, end) = match range {
                Some((rel_start, rel_end)) => (
                    decl_line.saturating_add(rel_start),
                    decl_line.saturating_add(rel_end),
                ),
                None => (decl_line, u64::MAX),
            };
            debug!(target: "resolver", "line range: {start} to {end}");

            let fname = decl_file.to_path_buf();
            return self.line_range_walk(cfg, unit, Some(idx), &fname, start, end, Some(name));
        }
        Ok(None)
    }

    #[allow(clippy::too_many_arguments)]
    fn line_range_walk(
        &self,
        cfg: &ResolverConfig,
        unit: &Unit,
        scope: Option<usize>,
        fname: &Path,
        start: u64,
        end: u64,
        function: Option<&str>,
    ) -> Result<Option<LineRange>> {
        let fname_str = fname.to_string_lossy();
        let mut lines = LineList::new();

        for row in unit.lines() {
            if row.end_sequence() || row.line < start || row.line > end {
                continue;
            }
            let Some(file) = unit.file(row.file_index) else {
                continue;
            };
            if !paths::tail_match(&file.to_string_lossy(), &fname_str) {
                continue;
            }
            if let Some(scope_idx) = scope {
                if !addr_in_scope(unit, scope_idx, row.address) {
                    continue;
                }
            }
            // make sure this line can be reversed back from its address
            if let Some(place) = unit.find_place_by_pc(row.address) {
                if place.line != row.line || place.file != file {
                    continue;
                }
            }
            lines.add(row.line);
        }

        // line tables omit function declaration lines
        if let Some(scope_idx) = scope {
            if let DieVariant::Function(ref func) = unit.entry(scope_idx).die {
                if let Some(decl_line) = func.decl_line {
                    if (start..=end).contains(&decl_line) {
                        lines.add(decl_line);
                    }
                }
            }
        }

        if lines.is_empty() {
            return Ok(None);
        }

        let path = weak_error!(paths::resolve_source_path(
            fname,
            unit.comp_dir(),
            cfg.source_prefix.as_deref(),
        ))
        .unwrap_or_else(|| fname.to_path_buf());

        Ok(Some(LineRange {
            path,
            function: function.map(|name| name.to_string()),
            lines,
        }))
    }
}

fn decl_file_of<'u>(unit: &'u Unit, func: &FunctionDie) -> Option<&'u Path> {
    func.decl_file.and_then(|idx| unit.file(idx))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dwarf::testing;
    use crate::dwarf::unit::{DieRef, DieVariant, FunctionDie, InlinedDie};
    use gimli::{Range, UnitOffset};
    use std::path::PathBuf;

    fn di() -> DebugInformation {
        let mut b = testing::UnitBuilder::new()
            .file("kernel/sched/core.c")
            .range(0x1000, 0x2000)
            .line(0x1000, 0, 120, true)
            .line(0x1010, 0, 121, true)
            .line(0x1030, 0, 122, true)
            .line(0x1050, 0, 300, true);

        let sched = b.die(
            0,
            DieVariant::Function(FunctionDie {
                base_attributes: testing::attrs_with_ranges(
                    "schedule",
                    [Range {
                        begin: 0x1000,
                        end: 0x1040,
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
    fn test_function_lines_include_declaration() {
        let di = di();
        let spec = LineRangeSpec::Function {
            name: "schedule".to_string(),
            file: None,
            range: None,
        };
        let range = di
            .find_line_range(&ResolverConfig::default(), &spec)
            .unwrap()
            .expect("range found");

        // 119 is the declaration line; 122 is excluded as it belongs to an
        // inlined instance body
        assert_eq!(range.lines.iter().collect::<Vec<_>>(), vec![119, 120, 121]);
        assert_eq!(range.function.as_deref(), Some("schedule"));
        assert_eq!(range.path, PathBuf::from("kernel/sched/core.c"));
    }

    #[test]
    fn test_function_lines_bounded() {
        let di = di();
        let spec = LineRangeSpec::Function {
            name: "schedule".to_string(),
            file: None,
            range: Some((0, 1)),
        };
        let range = di
            .find_line_range(&ResolverConfig::default(), &spec)
            .unwrap()
            .expect("range found");
        // declaration line + one relative line
        assert_eq!(range.lines.iter().collect::<Vec<_>>(), vec![119, 120]);
    }

    #[test]
    fn test_file_interval() {
        let di = di();
        let spec = LineRangeSpec::File {
            file: "core.c".to_string(),
            start: 121,
            end: 122,
        };
        let range = di
            .find_line_range(&ResolverConfig::default(), &spec)
            .unwrap()
            .expect("range found");
        assert_eq!(range.lines.iter().collect::<Vec<_>>(), vec![121, 122]);
        assert_eq!(range.function, None);
    }

    #[test]
    fn test_no_matches() {
        let di = di();
        let spec = LineRangeSpec::Function {
            name: "no_such_fn".to_string(),
            file: None,
            range: None,
        };
        assert!(di
            .find_line_range(&ResolverConfig::default(), &spec)
            .unwrap()
            .is_none());

        let spec = LineRangeSpec::File {
            file: "core.c".to_string(),
            start: 1000,
            end: 2000,
        };
        assert!(di
            .find_line_range(&ResolverConfig::default(), &spec)
            .unwrap()
            .is_none());
    }
}
