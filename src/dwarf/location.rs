use crate::config::ResolverConfig;
use crate::dwarf::unit::{AllocatedValue, DieLocation, FunctionDie, Unit};
use crate::dwarf::{DebugInformation, EndianArcSlice};
use crate::error::{Error, Result};
use crate::trace::TraceArg;
use fallible_iterator::FallibleIterator;
use gimli::{Expression, Operation, Register};
use log::debug;

/// Canonical form of a function frame base at a given PC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameBase {
    None,
    Register { register: Register, offset: i64 },
}

impl FrameBase {
    /// Resolve the `DW_AT_frame_base` of a function at `pc`.
    ///
    /// A single register op is taken as is; `DW_OP_call_frame_cfa` is
    /// substituted with the call frame information rule at `pc`. Anything
    /// else is outside the supported subset.
    pub fn resolve(
        di: &DebugInformation,
        unit: &Unit,
        function: &FunctionDie,
        pc: u64,
    ) -> Result<FrameBase> {
        let Some(ref location) = function.frame_base else {
            return Ok(FrameBase::None);
        };
        let Some(expr) = expression_at(di, unit, location, pc) else {
            return Ok(FrameBase::None);
        };

        let mut ops = expr.operations(unit.encoding());
        match ops.next()? {
            None => Ok(FrameBase::None),
            Some(Operation::CallFrameCFA) => {
                let (register, offset) = di.resolve_cfa(pc)?;
                Ok(FrameBase::Register { register, offset })
            }
            Some(Operation::RegisterOffset {
                register, offset, ..
            }) => Ok(FrameBase::Register { register, offset }),
            Some(Operation::Register { register }) => Ok(FrameBase::Register {
                register,
                offset: 0,
            }),
            Some(op) => {
                debug!(target: "resolver", "frame base op {op:?} is not supported");
                Err(Error::UnsupportedFrameBase)
            }
        }
    }
}

/// Select the location expression covering `pc` from a location attribute.
pub fn expression_at(
    di: &DebugInformation,
    unit: &Unit,
    location: &DieLocation,
    pc: u64,
) -> Option<Expression<EndianArcSlice>> {
    match location {
        DieLocation::Expr(expr) => Some(expr.clone()),
        DieLocation::List(offset) => {
            let mut iter = di
                .locations()
                .locations(
                    *offset,
                    unit.encoding(),
                    unit.low_pc(),
                    di.debug_addr(),
                    unit.addr_base(),
                )
                .ok()?;
            let entry = iter
                .find(|entry| Ok(entry.range.begin <= pc && pc < entry.range.end))
                .ok()??;
            Some(entry.data)
        }
    }
}

fn static_var(arg: &mut TraceArg, name: &str) {
    // static variables live in memory, make @symbol
    arg.value = format!("@{name}");
    arg.push_frame(0);
}

/// Translate a variable DWARF location at `pc` into the tracer argument base:
/// a register (direct or dereferenced with an offset), a `@symbol`, or an
/// immediate.
pub fn evaluate_location<V: AllocatedValue>(
    di: &DebugInformation,
    unit: &Unit,
    die: &V,
    var_name: &str,
    pc: u64,
    frame_base: &FrameBase,
    cfg: &ResolverConfig,
    arg: &mut TraceArg,
) -> Result<()> {
    let name = die.name().unwrap_or(var_name);

    if die.external() {
        static_var(arg, name);
        return Ok(());
    }

    if let Some(value) = die.const_value() {
        if cfg.allow_immediate {
            arg.value = format!("\\{value}");
            return Ok(());
        }
    }

    let location = die
        .location()
        .ok_or_else(|| Error::LocationNotAvailable(var_name.to_string()))?;
    let expr = expression_at(di, unit, location, pc)
        .ok_or_else(|| Error::LocationNotAvailable(var_name.to_string()))?;

    let mut ops = expr.operations(unit.encoding());
    let first = ops
        .next()?
        .ok_or_else(|| Error::LocationNotAvailable(var_name.to_string()))?;

    let (register, offset, reference) = match first {
        Operation::Address { .. } => {
            static_var(arg, name);
            return Ok(());
        }
        // frame-relative locations compose with the frame base
        Operation::FrameOffset { offset } => match *frame_base {
            FrameBase::Register {
                register,
                offset: base_offset,
            } => (register, offset + base_offset, true),
            FrameBase::None => return Err(Error::NoFrameBase(pc)),
        },
        Operation::RegisterOffset {
            register, offset, ..
        } => (register, offset, true),
        Operation::Register { register } => (register, 0, false),
        op => {
            debug!(target: "resolver", "DW_OP {op:?} is not supported");
            return Err(Error::UnsupportedDwarfOp(format!("{op:?}")));
        }
    };

    let register_name = (cfg.register_name)(register)
        .ok_or(Error::RegisterMappingMissing(register.0))?;
    arg.value = register_name;
    if reference {
        arg.push_frame(offset);
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dwarf::testing;
    use crate::dwarf::unit::VariableDie;
    use crate::error::ErrorKind;

    fn variable(location: Option<DieLocation>) -> VariableDie {
        VariableDie {
            base_attributes: testing::attrs("v"),
            type_ref: None,
            location,
            external: false,
            const_value: None,
        }
    }

    fn eval(
        var: &VariableDie,
        frame_base: &FrameBase,
        cfg: &ResolverConfig,
    ) -> Result<TraceArg> {
        let di = crate::dwarf::DebugInformation::with_units(vec![testing::UnitBuilder::new()
            .build()]);
        let mut arg = TraceArg::default();
        evaluate_location(
            &di,
            di.unit_ensure(0),
            var,
            "v",
            0x1000,
            frame_base,
            cfg,
            &mut arg,
        )?;
        Ok(arg)
    }

    #[test]
    fn test_register_direct() {
        // DW_OP_reg5 (rdi)
        let var = variable(Some(DieLocation::Expr(testing::expr(&[0x55]))));
        let arg = eval(&var, &FrameBase::None, &ResolverConfig::default()).unwrap();
        assert_eq!(arg.value, "%rdi");
        assert!(arg.indirections.is_empty());
    }

    #[test]
    fn test_register_relative() {
        // DW_OP_breg5 8
        let mut bytes = vec![0x75];
        bytes.extend(testing::sleb128(8));
        let var = variable(Some(DieLocation::Expr(testing::expr(&bytes))));
        let arg = eval(&var, &FrameBase::None, &ResolverConfig::default()).unwrap();
        assert_eq!(arg.value, "%rdi");
        assert_eq!(arg.indirections.as_slice(), &[8]);
    }

    #[test]
    fn test_fbreg_composes_with_frame_base() {
        // DW_OP_fbreg -16 over frame base rbp+16
        let mut bytes = vec![0x91];
        bytes.extend(testing::sleb128(-16));
        let var = variable(Some(DieLocation::Expr(testing::expr(&bytes))));
        let frame_base = FrameBase::Register {
            register: gimli::X86_64::RBP,
            offset: 16,
        };
        let arg = eval(&var, &frame_base, &ResolverConfig::default()).unwrap();
        assert_eq!(arg.value, "%rbp");
        assert_eq!(arg.indirections.as_slice(), &[0]);
    }

    #[test]
    fn test_fbreg_without_frame_base() {
        let mut bytes = vec![0x91];
        bytes.extend(testing::sleb128(-16));
        let var = variable(Some(DieLocation::Expr(testing::expr(&bytes))));
        let err = eval(&var, &FrameBase::None, &ResolverConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
    }

    #[test]
    fn test_static_address() {
        // DW_OP_addr 0xdeadbeef
        let mut bytes = vec![0x03];
        bytes.extend(0xdeadbeef_u64.to_le_bytes());
        let var = variable(Some(DieLocation::Expr(testing::expr(&bytes))));
        let arg = eval(&var, &FrameBase::None, &ResolverConfig::default()).unwrap();
        assert_eq!(arg.value, "@v");
        assert_eq!(arg.indirections.as_slice(), &[0]);
    }

    #[test]
    fn test_external_variable() {
        let mut var = variable(None);
        var.external = true;
        let arg = eval(&var, &FrameBase::None, &ResolverConfig::default()).unwrap();
        assert_eq!(arg.value, "@v");
        assert_eq!(arg.indirections.as_slice(), &[0]);
    }

    #[test]
    fn test_const_value_immediate() {
        let mut var = variable(None);
        var.const_value = Some(42);
        let arg = eval(&var, &FrameBase::None, &ResolverConfig::default()).unwrap();
        assert_eq!(arg.value, "\\42");

        let cfg = ResolverConfig {
            allow_immediate: false,
            ..Default::default()
        };
        let err = eval(&var, &FrameBase::None, &cfg).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_unsupported_op() {
        // DW_OP_lit0
        let var = variable(Some(DieLocation::Expr(testing::expr(&[0x30]))));
        let err = eval(&var, &FrameBase::None, &ResolverConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
    }

    #[test]
    fn test_missing_register_mapping() {
        let var = variable(Some(DieLocation::Expr(testing::expr(&[0x55]))));
        let cfg = ResolverConfig {
            register_name: |_| None,
            ..Default::default()
        };
        let err = eval(&var, &FrameBase::None, &cfg).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
    }
}
