use crate::dwarf::navigator::{self, data_member_location, find_member, resolve_type};
use crate::dwarf::unit::{DieVariant, MemberDie, Unit};
use crate::dwarf::DebugInformation;
use crate::error::{Error, Result};
use crate::request::FieldStep;
use crate::trace::TraceArg;
use log::debug;

fn member_of<'a>(unit: &'a Unit, idx: usize) -> &'a MemberDie {
    let DieVariant::Member(ref member) = unit.entry(idx).die else {
        unreachable!("member die expected");
    };
    member
}

/// Offset of a member inside its direct parent; members of a union all live
/// at offset zero.
fn member_offset(unit: &Unit, member_idx: usize) -> Result<i64> {
    let parent_is_union = unit.entry(member_idx).node.parent.is_some_and(|parent| {
        matches!(unit.entry(parent).die, DieVariant::UnionType(_))
    });
    if parent_is_union {
        return Ok(0);
    }
    data_member_location(unit, member_of(unit, member_idx))
}

/// Walk a field access chain, dereferencing pointer and array types and
/// accumulating byte offsets into the argument indirection frames.
///
/// A `->` step opens a new outermost frame, a `.` step and an array index
/// fold into the current one; an index on a pointer opens a new frame scaled
/// by the pointee size.
///
/// Returns the DIE whose resolved type describes the final value, for type
/// tag inference.
pub fn walk_fields<'a>(
    di: &'a DebugInformation,
    unit: &'a Unit,
    var_idx: usize,
    var_name: &str,
    fields: &[FieldStep],
    arg: &mut TraceArg,
) -> Result<(&'a Unit, usize)> {
    let mut owner = var_name.to_string();
    let (mut cur_unit, mut cur_idx) = (unit, var_idx);

    for step in fields {
        debug!(target: "resolver", "converting {step} in {owner}");
        let (type_unit, type_idx) = resolve_type(di, cur_unit, cur_idx)
            .ok_or_else(|| Error::TypeNotFound(owner.clone()))?;

        match *step {
            FieldStep::Index(index) => {
                let is_pointer =
                    matches!(type_unit.entry(type_idx).die, DieVariant::PointerType(_));
                if !is_pointer
                    && !matches!(type_unit.entry(type_idx).die, DieVariant::ArrayType(_))
                {
                    return Err(Error::NotAnArray(owner));
                }

                let (elem_unit, elem_idx) = resolve_type(di, type_unit, type_idx)
                    .ok_or_else(|| Error::TypeNotFound(owner.clone()))?;
                let elem_size = navigator::byte_size(elem_unit, elem_idx)
                    .ok_or_else(|| Error::TypeNotFound(owner.clone()))?;

                if is_pointer {
                    arg.push_frame((elem_size * index) as i64);
                } else {
                    if !arg.has_frame() {
                        return Err(Error::RegisterStructure);
                    }
                    arg.add_to_current_frame((elem_size * index) as i64);
                }

                // stay on the array/pointer die, its DW_AT_type is the
                // element type for the next step
                (cur_unit, cur_idx) = (type_unit, type_idx);
                owner = step.to_string();
            }
            FieldStep::Member { ref name, deref } => {
                let (struct_unit, struct_idx) = match type_unit.entry(type_idx).die {
                    DieVariant::PointerType(_) => {
                        if !deref {
                            return Err(Error::DerefExpected(owner));
                        }
                        let (pointee_unit, pointee_idx) = resolve_type(di, type_unit, type_idx)
                            .ok_or_else(|| Error::TypeNotFound(owner.clone()))?;
                        if !matches!(
                            pointee_unit.entry(pointee_idx).die,
                            DieVariant::StructType(_) | DieVariant::UnionType(_)
                        ) {
                            return Err(Error::NotAStructure(owner));
                        }
                        arg.push_frame(0);
                        (pointee_unit, pointee_idx)
                    }
                    DieVariant::StructType(_) | DieVariant::UnionType(_) => {
                        if deref {
                            return Err(Error::MemberAccessExpected(owner));
                        }
                        if !arg.has_frame() {
                            return Err(Error::RegisterStructure);
                        }
                        (type_unit, type_idx)
                    }
                    _ => return Err(Error::NotAStructure(owner)),
                };

                let structure = struct_unit
                    .entry(struct_idx)
                    .die
                    .name()
                    .unwrap_or("<unnamed>")
                    .to_string();
                let (anon_prefix, member_unit, member_idx) =
                    find_member(di, struct_unit, struct_idx, name).ok_or_else(|| {
                        Error::MemberNotFound {
                            structure,
                            member: name.clone(),
                        }
                    })?;

                let offset = anon_prefix + member_offset(member_unit, member_idx)?;
                arg.add_to_current_frame(offset);

                (cur_unit, cur_idx) = (member_unit, member_idx);
                owner = name.clone();
            }
        }
    }

    Ok((cur_unit, cur_idx))
}
