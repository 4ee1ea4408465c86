use crate::dwarf::navigator;
use crate::dwarf::unit::Unit;
use crate::dwarf::DebugInformation;
use crate::error::{Error, Result};
use log::{debug, info};

/// Widest basic type the tracer understands.
pub const MAX_BASIC_TYPE_BITS: u64 = 64;

/// Map the type of a DIE to a canonical basic type tag (`s8`..`s64`,
/// `u8`..`u64`).
///
/// Types wider than [`MAX_BASIC_TYPE_BITS`] are clamped with a report; types
/// with no size or an odd width yield no tag, leaving the choice to the
/// tracer.
pub fn infer_type_tag(
    di: &DebugInformation,
    unit: &Unit,
    die_idx: usize,
    owner: &str,
) -> Result<Option<String>> {
    let Some((type_unit, type_idx)) = navigator::resolve_type(di, unit, die_idx) else {
        return Err(Error::TypeNotFound(owner.to_string()));
    };

    let type_name = type_unit
        .entry(type_idx)
        .die
        .name()
        .unwrap_or("<unnamed type>")
        .to_string();
    debug!(target: "resolver", "{owner} type is {type_name}");

    let Some(byte_size) = navigator::byte_size(type_unit, type_idx) else {
        return Ok(None);
    };
    if byte_size == 0 {
        return Ok(None);
    }

    let mut bits = byte_size * 8;
    if bits > MAX_BASIC_TYPE_BITS {
        info!(
            target: "resolver",
            "{type_name} exceeds max-bitwidth, cut down to {MAX_BASIC_TYPE_BITS} bits"
        );
        bits = MAX_BASIC_TYPE_BITS;
    }
    if !matches!(bits, 8 | 16 | 32 | 64) {
        debug!(target: "resolver", "odd bit width {bits} of {type_name}, let the tracer infer");
        return Ok(None);
    }

    let prefix = if navigator::is_signed(type_unit, type_idx) {
        's'
    } else {
        'u'
    };
    Ok(Some(format!("{prefix}{bits}")))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dwarf::testing;
    use crate::dwarf::unit::{BaseTypeDie, DieRef, DieVariant, VariableDie};
    use gimli::UnitOffset;

    fn unit_with_typed_var(byte_size: u64, signed: bool) -> crate::dwarf::DebugInformation {
        let mut b = testing::UnitBuilder::new();
        let type_idx = b.die(
            0,
            DieVariant::BaseType(BaseTypeDie {
                base_attributes: testing::attrs("t"),
                encoding: Some(if signed {
                    gimli::DW_ATE_signed
                } else {
                    gimli::DW_ATE_unsigned
                }),
                byte_size: Some(byte_size),
            }),
        );
        b.die(
            0,
            DieVariant::Variable(VariableDie {
                base_attributes: testing::attrs("v"),
                type_ref: Some(DieRef::Unit(UnitOffset(type_idx))),
                location: None,
                external: false,
                const_value: None,
            }),
        );
        crate::dwarf::DebugInformation::with_units(vec![b.build()])
    }

    fn tag_of(byte_size: u64, signed: bool) -> Option<String> {
        let di = unit_with_typed_var(byte_size, signed);
        let unit = di.unit_ensure(0);
        infer_type_tag(&di, unit, 2, "v").unwrap()
    }

    #[test]
    fn test_basic_widths() {
        assert_eq!(tag_of(1, true).as_deref(), Some("s8"));
        assert_eq!(tag_of(2, false).as_deref(), Some("u16"));
        assert_eq!(tag_of(4, true).as_deref(), Some("s32"));
        assert_eq!(tag_of(8, false).as_deref(), Some("u64"));
    }

    #[test]
    fn test_wide_type_is_clamped() {
        // a 128-bit integer is cut down to 64 bits
        assert_eq!(tag_of(16, true).as_deref(), Some("s64"));
        assert_eq!(tag_of(16, false).as_deref(), Some("u64"));
    }

    #[test]
    fn test_odd_and_zero_widths_give_no_tag() {
        assert_eq!(tag_of(3, true), None);
        assert_eq!(tag_of(0, true), None);
    }

    #[test]
    fn test_missing_type_fails() {
        let mut b = testing::UnitBuilder::new();
        b.die(
            0,
            DieVariant::Variable(VariableDie {
                base_attributes: testing::attrs("v"),
                type_ref: None,
                location: None,
                external: false,
                const_value: None,
            }),
        );
        let di = crate::dwarf::DebugInformation::with_units(vec![b.build()]);
        assert!(infer_type_tag(&di, di.unit_ensure(0), 1, "v").is_err());
    }
}
