mod line_range;
mod reverse;

use crate::config::ResolverConfig;
use crate::dwarf::location::{self, FrameBase};
use crate::dwarf::navigator;
use crate::dwarf::unit::{DieVariant, FunctionDie, Unit};
use crate::dwarf::{fields, types, DebugInformation};
use crate::error::{Error, Result};
use crate::lazy;
use crate::line_list::LineList;
use crate::paths;
use crate::request::{ArgSpec, FunctionSelector, ProbeRequest, TargetSelector};
use crate::trace::{ProbeResult, TraceArg};
use log::{debug, warn};
use std::path::Path;

impl DebugInformation {
    /// Find probe sites for a request and append them to `tevs`.
    ///
    /// Returns the number of sites emitted; zero is success-but-empty. On an
    /// error after partial emission the already-appended results stay in
    /// `tevs` and belong to the caller.
    pub fn find_probes(
        &self,
        cfg: &ResolverConfig,
        request: &ProbeRequest,
        tevs: &mut Vec<ProbeResult>,
    ) -> Result<usize> {
        let emitted_before = tevs.len();
        let mut finder = ProbeFinder {
            di: self,
            cfg,
            request,
            lcache: LineList::new(),
            out: &mut *tevs,
        };
        finder.run()?;
        Ok(tevs.len() - emitted_before)
    }
}

/// State of a single probe resolution request.
struct ProbeFinder<'a> {
    di: &'a DebugInformation,
    cfg: &'a ResolverConfig,
    request: &'a ProbeRequest,
    /// Lazy pattern line cache, filled once per request.
    lcache: LineList,
    out: &'a mut Vec<ProbeResult>,
}

/// Scope filter shared by the lazy path and the line-range finder: the
/// address belongs to the scope and no deeper inlined instance covers it.
pub(crate) fn addr_in_scope(unit: &Unit, scope_idx: usize, addr: u64) -> bool {
    navigator::ranges_contain(unit.entry(scope_idx), addr)
        && navigator::find_inline_instance(unit, scope_idx, addr).is_none()
}

impl<'a> ProbeFinder<'a> {
    fn run(&mut self) -> Result<()> {
        let units = self.di.get_units()?;
        for unit in units {
            // a file-scoped request needs the file known to this unit
            let mb_realpath = match self.request.target.file() {
                Some(file) => match unit.find_realpath(file) {
                    Some(realpath) => Some(realpath.to_path_buf()),
                    None => continue,
                },
                None => None,
            };

            match self.request.target {
                TargetSelector::Function(ref sel) => self.find_by_function(unit, sel)?,
                TargetSelector::SourceLine { line, .. } => {
                    let fname = mb_realpath.expect("selector carries a file");
                    self.find_by_line(unit, &fname, line)?;
                }
                TargetSelector::LazyPattern { ref pattern, .. } => {
                    let fname = mb_realpath.expect("selector carries a file");
                    self.find_lazy(unit, None, &fname, pattern)?;
                }
            }
        }
        Ok(())
    }

    fn decl_file_of<'u>(unit: &'u Unit, func: &FunctionDie) -> Option<&'u Path> {
        func.decl_file.and_then(|idx| unit.file(idx))
    }

    fn find_by_function(&mut self, unit: &'a Unit, sel: &FunctionSelector) -> Result<()> {
        for idx in 0..unit.entries().len() {
            let entry = unit.entry(idx);
            let DieVariant::Function(ref func) = entry.die else {
                continue;
            };
            if !func.is_definition() || !navigator::compare_name(entry, &sel.name) {
                continue;
            }
            // check the declared file
            if let Some(ref file) = sel.file {
                match Self::decl_file_of(unit, func) {
                    Some(decl) if paths::tail_match(&decl.to_string_lossy(), file) => {}
                    _ => continue,
                }
            }
            debug!(target: "resolver", "matched function: {}", sel.name);

            if let Some(rel_line) = sel.line {
                // function relative line
                let Some(decl_line) = func.decl_line else {
                    warn!(target: "resolver", "no declaration line for {}", sel.name);
                    continue;
                };
                let Some(fname) = Self::decl_file_of(unit, func).map(Path::to_path_buf) else {
                    warn!(target: "resolver", "no declaration file for {}", sel.name);
                    continue;
                };
                self.find_by_line(unit, &fname, decl_line + rel_line)?;
            } else if func.is_instance() {
                // instances always have the entry address, but in some case
                // the entry address is zero
                let entry_pc = func.entry_pc().expect("instance has ranges");
                if entry_pc == 0 {
                    debug!(target: "resolver", "{} has no entry address, skipped", sel.name);
                } else if let Some(ref pattern) = sel.lazy {
                    let Some(fname) = Self::decl_file_of(unit, func).map(Path::to_path_buf)
                    else {
                        warn!(target: "resolver", "no declaration file for {}", sel.name);
                        continue;
                    };
                    self.find_lazy(unit, Some(idx), &fname, pattern)?;
                } else {
                    self.probe_site(unit, Some(idx), entry_pc + sel.offset.unwrap_or(0))?;
                }
            } else if !self.cfg.no_inlines {
                // inlined function, search instances of it
                self.walk_instances(unit, idx, sel)?;
            }

            if !self.cfg.force_add {
                // no second definition of the symbol expected in this unit
                break;
            }
        }
        Ok(())
    }

    /// Visit every concrete instance of an abstract (inlined) function
    /// definition inside the unit.
    fn walk_instances(
        &mut self,
        unit: &'a Unit,
        origin_idx: usize,
        sel: &FunctionSelector,
    ) -> Result<()> {
        let decl_file = {
            let DieVariant::Function(ref origin) = unit.entry(origin_idx).die else {
                unreachable!("function die expected");
            };
            Self::decl_file_of(unit, origin).map(Path::to_path_buf)
        };

        for idx in 0..unit.entries().len() {
            let entry = unit.entry(idx);
            let (origin_ref, entry_pc) = match entry.die {
                DieVariant::Inlined(ref inlined) => (inlined.abstract_origin, inlined.entry_pc()),
                DieVariant::Function(ref func) => (func.abstract_origin, func.entry_pc()),
                _ => continue,
            };
            let resolved = origin_ref.and_then(|rf| self.di.deref_die(unit, rf));
            let Some((o_unit, o_idx)) = resolved else {
                continue;
            };
            if !(std::ptr::eq(o_unit, unit) && o_idx == origin_idx) {
                continue;
            }

            if let Some(ref pattern) = sel.lazy {
                let Some(ref fname) = decl_file else {
                    warn!(target: "resolver", "no declaration file for {}", sel.name);
                    continue;
                };
                self.find_lazy(unit, Some(idx), fname, pattern)?;
                continue;
            }

            let Some(entry_pc) = entry_pc else {
                warn!(target: "resolver", "failed to get entry address of {}", sel.name);
                continue;
            };
            if entry_pc == 0 {
                debug!(target: "resolver", "{} instance has no entry address, skipped", sel.name);
                continue;
            }
            debug!(target: "resolver", "found inline addr: {entry_pc:#x}");
            self.probe_site(unit, Some(idx), entry_pc + sel.offset.unwrap_or(0))?;
        }
        Ok(())
    }

    fn find_by_line(&mut self, unit: &'a Unit, fname: &Path, lno: u64) -> Result<()> {
        let fname = fname.to_string_lossy();
        for row_idx in 0..unit.lines().len() {
            let row = &unit.lines()[row_idx];
            if row.end_sequence() || row.line != lno {
                continue;
            }
            let Some(file) = unit.file(row.file_index) else {
                continue;
            };
            if !paths::tail_match(&file.to_string_lossy(), &fname) {
                continue;
            }
            // keep going after a hit, the same line may be inlined elsewhere
            self.probe_site(unit, None, row.address)?;
        }
        Ok(())
    }

    fn find_lazy(
        &mut self,
        unit: &'a Unit,
        scope: Option<usize>,
        fname: &Path,
        pattern: &str,
    ) -> Result<()> {
        if self.lcache.is_empty() {
            let path = paths::resolve_source_path(
                fname,
                unit.comp_dir(),
                self.cfg.source_prefix.as_deref(),
            )?;
            self.lcache = lazy::lazy_match_lines(&path, pattern)?;
            if self.lcache.is_empty() {
                return Ok(());
            }
        }

        let fname = fname.to_string_lossy();
        for row_idx in 0..unit.lines().len() {
            let row = &unit.lines()[row_idx];
            if row.end_sequence() || !self.lcache.contains(row.line) {
                continue;
            }
            let Some(file) = unit.file(row.file_index) else {
                continue;
            };
            if !paths::tail_match(&file.to_string_lossy(), &fname) {
                continue;
            }
            if let Some(scope_idx) = scope {
                if !addr_in_scope(unit, scope_idx, row.address) {
                    continue;
                }
            }
            debug!(
                target: "resolver",
                "probe line found: line {} addr {:#x}", row.line, row.address
            );
            self.probe_site(unit, None, row.address)?;
        }
        Ok(())
    }

    /// Convert one candidate address into a trace event.
    ///
    /// `scope` is the DIE the argument search starts from (an inlined
    /// instance or the function itself); when absent, the enclosing function
    /// is looked up by address.
    fn probe_site(&mut self, unit: &'a Unit, scope: Option<usize>, addr: u64) -> Result<()> {
        if self.out.len() >= self.cfg.max_probes {
            warn!(target: "resolver", "too many trace events are found");
            return Err(Error::TooManyProbes(self.cfg.max_probes));
        }

        let sp_idx = match scope {
            Some(idx) if matches!(unit.entry(idx).die, DieVariant::Function(_)) => idx,
            _ => navigator::find_subprogram_by_pc(unit, addr)
                .ok_or(Error::NoEnclosingFunction(addr))?,
        };
        let DieVariant::Function(ref sp) = unit.entry(sp_idx).die else {
            unreachable!("function die expected");
        };
        let scope_idx = scope.unwrap_or(sp_idx);

        let frame_base = FrameBase::resolve(self.di, unit, sp, addr)?;

        let mut tev = self.convert_to_trace_point(sp, addr)?;
        debug!(
            target: "resolver",
            "probe point found: {}+{}",
            if tev.symbol.is_empty() { "<unknown>" } else { &tev.symbol },
            tev.offset
        );

        for spec in &self.request.args {
            let arg = self.find_argument(unit, scope_idx, addr, &frame_base, spec)?;
            tev.args.push(arg);
        }

        self.out.push(tev);
        Ok(())
    }

    fn convert_to_trace_point(&self, sp: &FunctionDie, addr: u64) -> Result<ProbeResult> {
        // verify the address is correct
        if !sp.contains(addr) {
            let name = sp.base_attributes.name.clone().unwrap_or_default();
            warn!(target: "resolver", "specified offset is out of {name}");
            return Err(Error::OffsetOutOfFunction(name));
        }

        let (symbol, offset) = match (&sp.base_attributes.name, sp.entry_pc()) {
            // a DIE with an entry address also carries the symbol name
            (Some(name), Some(entry_pc)) => (name.clone(), addr - entry_pc),
            // nameless function, use the raw address
            _ => (String::new(), addr),
        };

        Ok(ProbeResult {
            symbol,
            offset,
            address: addr,
            retprobe: self.request.target.retprobe(),
            args: vec![],
        })
    }

    /// Resolve one argument specification at a concrete probe address.
    fn find_argument(
        &self,
        unit: &'a Unit,
        scope_idx: usize,
        addr: u64,
        frame_base: &FrameBase,
        spec: &ArgSpec,
    ) -> Result<TraceArg> {
        let mut arg = TraceArg {
            name: spec.name.clone().unwrap_or_else(|| spec.synthesize_name()),
            ..Default::default()
        };

        // raw tokens are passed to the tracer untouched
        if !spec.is_c_varname() {
            if spec.var == "$retval" && !self.request.target.retprobe() {
                return Err(Error::RetvalWithoutRetprobe);
            }
            arg.value = spec.var.clone();
            arg.type_tag = spec.cast.clone();
            return Ok(arg);
        }

        debug!(target: "resolver", "searching '{}' variable in context", spec.var);
        // local variables and parameters of the scope first, then outer
        // scopes up to and including the unit
        let var_idx = navigator::find_variable_or_parameter(unit, scope_idx, &spec.var, Some(addr))
            .or_else(|| navigator::find_variable_or_parameter(unit, 0, &spec.var, Some(addr)))
            .ok_or_else(|| {
                warn!(target: "resolver", "failed to find '{}' in this function", spec.var);
                Error::VariableNotFound(spec.var.clone())
            })?;

        match unit.entry(var_idx).die {
            DieVariant::Variable(ref die) => location::evaluate_location(
                self.di, unit, die, &spec.var, addr, frame_base, self.cfg, &mut arg,
            )?,
            DieVariant::Parameter(ref die) => location::evaluate_location(
                self.di, unit, die, &spec.var, addr, frame_base, self.cfg, &mut arg,
            )?,
            _ => unreachable!("variable or parameter die expected"),
        }

        let (final_unit, final_idx) = if spec.fields.is_empty() {
            (unit, var_idx)
        } else {
            fields::walk_fields(self.di, unit, var_idx, &spec.var, &spec.fields, &mut arg)?
        };

        arg.type_tag = match spec.cast {
            // a user cast always wins over the inferred type
            Some(ref cast) => Some(cast.clone()),
            None => types::infer_type_tag(self.di, final_unit, final_idx, &arg.name)?,
        };
        Ok(arg)
    }
}
