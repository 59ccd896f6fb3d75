//! Type lattice operations used to resolve ambiguous types.
//!
//! The ambiguous elements sit above the concrete types they stand for:
//!
//! ```text
//!            ?0                  ?64
//!          /    \               /   \
//!       ?32      references   long  double
//!      /   \
//!    int  float
//! ```
//!
//! Integral types narrower than `int` are all represented as `int` in registers, and
//! every reference type is a `java/lang/Object`.

use crate::typing::errors::{TypeError, TypeResult};
use dw_ir::types::JAVA_LANG_OBJECT;
use dw_ir::Type;

fn conflict(left: &Type, right: &Type) -> TypeError {
    TypeError::Conflict {
        left: left.clone(),
        right: right.clone(),
        context: String::new(),
    }
}

/// Checks if the ambiguous type `amb` stands for the given type.
fn covers(amb: &Type, t: &Type) -> bool {
    match amb {
        Type::Zero => {
            t.is_int_like()
                || t.is_reference()
                || matches!(t, Type::Float | Type::Narrow | Type::Zero)
        }
        Type::Narrow => t.is_int_like() || matches!(t, Type::Float | Type::Narrow),
        Type::Wide => matches!(t, Type::Long | Type::Double | Type::Wide),
        _ => false,
    }
}

// Arrays of ambiguous elements are references, not lattice tops.
fn is_top(t: &Type) -> bool {
    matches!(t, Type::Zero | Type::Narrow | Type::Wide)
}

fn is_object(t: &Type) -> bool {
    t == &*JAVA_LANG_OBJECT
}

/// Precise-dominating merge: returns the most precise type compatible with both
/// operands.
///
/// Ambiguous types are refined by concrete ones, integral types widen to `int` and
/// distinct references widen to `java/lang/Object`. Merging incompatible concrete
/// types is a [`TypeError::Conflict`].
pub fn merge(left: &Type, right: &Type) -> TypeResult<Type> {
    if left == right {
        return Ok(left.clone());
    }
    match (left, right) {
        (Type::Zero, Type::Narrow) | (Type::Narrow, Type::Zero) => Ok(Type::Narrow),
        (amb, t) | (t, amb) if is_top(amb) && !is_top(t) && covers(amb, t) => {
            Ok(t.clone())
        }
        (l, r) if l.is_int_like() && r.is_int_like() => Ok(Type::Int),
        (Type::Array(_, _), Type::Array(_, _)) => Ok(merge_arrays(left, right)),
        (obj, t) | (t, obj) if is_object(obj) && t.is_reference() => Ok(t.clone()),
        (l, r) if l.is_reference() && r.is_reference() => Ok(JAVA_LANG_OBJECT.clone()),
        _ => Err(conflict(left, right)),
    }
}

// Element types of arrays do not widen: `[B` and `[I` are distinct references.
fn merge_arrays(left: &Type, right: &Type) -> Type {
    let elements = match (left.element(), right.element()) {
        (Some(l), Some(r)) => {
            if l.is_ambiguous() || r.is_ambiguous() || (l.is_reference() && r.is_reference()) {
                merge(&l, &r).ok()
            } else {
                None
            }
        }
        _ => None,
    };
    match elements {
        Some(element) => Type::array_of(element),
        None => JAVA_LANG_OBJECT.clone(),
    }
}

/// Ambiguous-dominating merge: returns the least precise type standing for both
/// operands, possibly an ambiguous one (`int` and `float` merge into `?32`).
pub fn merge_ambiguous(left: &Type, right: &Type) -> TypeResult<Type> {
    if left == right {
        return Ok(left.clone());
    }
    match (left, right) {
        (Type::Zero, Type::Narrow) | (Type::Narrow, Type::Zero) => Ok(Type::Zero),
        (amb, t) | (t, amb) if is_top(amb) && covers(amb, t) => Ok(amb.clone()),
        (l, r) if l.is_int_like() && r.is_int_like() => Ok(Type::Int),
        (l, r) if l.is_reference() && r.is_reference() => Ok(JAVA_LANG_OBJECT.clone()),
        (l, r) if covers(&Type::Narrow, l) && covers(&Type::Narrow, r) => Ok(Type::Narrow),
        (l, r) if covers(&Type::Zero, l) && covers(&Type::Zero, r) => Ok(Type::Zero),
        (l, r) if covers(&Type::Wide, l) && covers(&Type::Wide, r) => Ok(Type::Wide),
        _ => Err(conflict(left, right)),
    }
}
