use crate::dwarf::unit::{DieVariant, Entry, MemberDie, MemberLocation, Unit};
use crate::dwarf::DebugInformation;
use crate::error::{Error, Result};
use gimli::Operation;

/// Verdict of a [`find_child`] predicate for the inspected entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkControl {
    /// The entry is the search target, stop.
    Found,
    /// Go down into the entry children, do not visit further siblings.
    DescendOnly,
    /// Skip the entry children, go to the next sibling.
    SkipChildren,
    /// Visit the entry children, then the next sibling.
    Continue,
}

/// Depth-first search over the children of `root`, driven by the predicate.
pub fn find_child<F>(unit: &Unit, root: usize, predicate: &mut F) -> Option<usize>
where
    F: FnMut(usize, &Entry) -> WalkControl,
{
    for &child in &unit.entry(root).node.children {
        match predicate(child, unit.entry(child)) {
            WalkControl::Found => return Some(child),
            WalkControl::Continue => {
                if let Some(found) = find_child(unit, child, predicate) {
                    return Some(found);
                }
            }
            WalkControl::SkipChildren => continue,
            WalkControl::DescendOnly => return find_child(unit, child, predicate),
        }
    }
    None
}

/// Name equality check, false for nameless entries.
pub fn compare_name(entry: &Entry, expected: &str) -> bool {
    entry.die.name() == Some(expected)
}

/// Follow the `DW_AT_type` reference of a DIE through transparent wrappers
/// (qualifiers and typedefs) until a real type is reached.
pub fn resolve_type<'a>(
    di: &'a DebugInformation,
    unit: &'a Unit,
    die_idx: usize,
) -> Option<(&'a Unit, usize)> {
    let mut reference = unit.entry(die_idx).die.type_ref()?;
    let (mut unit, mut idx) = di.deref_die(unit, reference)?;
    loop {
        match &unit.entry(idx).die {
            DieVariant::TypeDef(die) => reference = die.type_ref?,
            DieVariant::Qualifier(die) => reference = die.type_ref?,
            _ => return Some((unit, idx)),
        }
        (unit, idx) = di.deref_die(unit, reference)?;
    }
}

/// Size of a type DIE in bytes. Pointers without an explicit size take the
/// unit address size.
pub fn byte_size(unit: &Unit, die_idx: usize) -> Option<u64> {
    match &unit.entry(die_idx).die {
        DieVariant::BaseType(die) => die.byte_size,
        DieVariant::PointerType(die) => {
            die.byte_size.or(Some(u64::from(unit.address_size())))
        }
        DieVariant::StructType(die) => die.byte_size,
        DieVariant::UnionType(die) => die.byte_size,
        DieVariant::EnumType(die) => die.byte_size,
        _ => None,
    }
}

pub fn is_signed(unit: &Unit, die_idx: usize) -> bool {
    match &unit.entry(die_idx).die {
        DieVariant::BaseType(die) => {
            die.encoding == Some(gimli::DW_ATE_signed)
                || die.encoding == Some(gimli::DW_ATE_signed_char)
        }
        _ => false,
    }
}

/// Byte offset of a member inside its parent structure.
///
/// A literal `DW_AT_data_member_location` is preferred; a location
/// expression is accepted only when it is a single `DW_OP_plus_uconst`.
pub fn data_member_location(unit: &Unit, member: &MemberDie) -> Result<i64> {
    match member.location {
        Some(MemberLocation::Offset(offset)) => Ok(offset),
        Some(MemberLocation::Expr(ref expr)) => {
            let mut ops = expr.clone().operations(unit.encoding());
            let first = ops.next()?;
            match (first, ops.next()?) {
                (Some(Operation::PlusConstant { value }), None) => Ok(value as i64),
                _ => Err(Error::UnsupportedMemberLocation),
            }
        }
        None => Err(Error::UnsupportedMemberLocation),
    }
}

/// True when the PC ranges of an entry cover `pc`.
pub fn ranges_contain(entry: &Entry, pc: u64) -> bool {
    entry
        .die
        .base_attributes()
        .ranges
        .iter()
        .any(|r| r.begin <= pc && pc < r.end)
}

/// Find the function entry whose PC ranges include `pc`.
pub fn find_subprogram_by_pc(unit: &Unit, pc: u64) -> Option<usize> {
    let find_pos = match unit.die_ranges.binary_search_by_key(&pc, |dr| dr.range.begin) {
        Ok(pos) => {
            let mut idx = pos + 1;
            while idx < unit.die_ranges.len() && unit.die_ranges[idx].range.begin == pc {
                idx += 1;
            }
            idx
        }
        Err(pos) => pos,
    };

    unit.die_ranges[..find_pos].iter().rev().find_map(|dr| {
        (dr.range.begin <= pc && pc < dr.range.end).then_some(dr.die_idx)
    })
}

/// Find an inlined instance covering `pc` in the subtree of `scope`,
/// outermost first.
pub fn find_inline_instance(unit: &Unit, scope: usize, pc: u64) -> Option<usize> {
    find_child(unit, scope, &mut |_, entry| match entry.die {
        DieVariant::Inlined(ref inlined) if inlined.contains(pc) => WalkControl::Found,
        _ => WalkControl::Continue,
    })
}

/// Find the deepest inlined instance covering `pc` in the subtree of `scope`.
pub fn find_deepest_inline_instance(unit: &Unit, scope: usize, pc: u64) -> Option<usize> {
    let mut found = None;
    let mut scope = scope;
    while let Some(inner) = find_inline_instance(unit, scope, pc) {
        found = Some(inner);
        scope = inner;
    }
    found
}

/// Search a variable or a formal parameter by name in the subtree of
/// `scope`.
///
/// Only entries that describe an allocated value (a location, a constant
/// value or an external link) qualify. When `pc` is given, lexical scopes
/// not covering it are pruned.
pub fn find_variable_or_parameter(
    unit: &Unit,
    scope: usize,
    name: &str,
    pc: Option<u64>,
) -> Option<usize> {
    find_child(unit, scope, &mut |_, entry| {
        let allocated = match entry.die {
            DieVariant::Variable(ref die) => {
                die.location.is_some() || die.const_value.is_some() || die.external
            }
            DieVariant::Parameter(ref die) => die.location.is_some(),
            _ => false,
        };
        if allocated && compare_name(entry, name) {
            return WalkControl::Found;
        }
        match pc {
            Some(pc) if ranges_contain(entry, pc) => WalkControl::Continue,
            _ => WalkControl::SkipChildren,
        }
    })
}

/// Search a named member of a structure or union type.
///
/// Members of anonymous sub-structures are reachable too: the returned
/// prefix offset accumulates the data member locations of the anonymous
/// members on the path, the returned entry is the named member itself.
pub fn find_member<'a>(
    di: &'a DebugInformation,
    unit: &'a Unit,
    type_idx: usize,
    name: &str,
) -> Option<(i64, &'a Unit, usize)> {
    let is_union = matches!(unit.entry(type_idx).die, DieVariant::UnionType(_));

    for &child in &unit.entry(type_idx).node.children {
        if let DieVariant::Member(ref member) = unit.entry(child).die {
            if member.base_attributes.name.as_deref() == Some(name) {
                return Some((0, unit, child));
            }
        }
    }

    // the member may live in an anonymous sub-structure
    for &child in &unit.entry(type_idx).node.children {
        let DieVariant::Member(ref member) = unit.entry(child).die else {
            continue;
        };
        if member.base_attributes.name.is_some() {
            continue;
        }
        let Some((inner_unit, inner_idx)) = resolve_type(di, unit, child) else {
            continue;
        };
        if !matches!(
            inner_unit.entry(inner_idx).die,
            DieVariant::StructType(_) | DieVariant::UnionType(_)
        ) {
            continue;
        }
        if let Some((prefix, found_unit, found_idx)) = find_member(di, inner_unit, inner_idx, name)
        {
            let own = if is_union {
                0
            } else {
                data_member_location(unit, member).ok()?
            };
            return Some((own + prefix, found_unit, found_idx));
        }
    }

    None
}
