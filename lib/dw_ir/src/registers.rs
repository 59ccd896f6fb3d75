//! Types definitions to address virtual registers.
//!
//! Register IR instructions do not manipulate register slot numbers directly: they
//! refer to virtual registers through a [register handle](Reg) into the register arena
//! of their [`Body`](crate::Body). Final slot numbers are only assigned when lowering the
//! body into Dalvik bytecode. Two handles designate the same register if and only if they
//! are equal, whatever the types of the registers are.

use crate::types::Type;
use serde::Serialize;
use std::fmt;

/// The virtual register handle type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Reg(u32);

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

impl Reg {
    #[inline]
    pub(crate) const fn new(index: usize) -> Self {
        Self(index as u32)
    }

    /// Returns the position of the register in its body arena.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Role of a register with respect to the method calling convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RegKind {
    /// Plain local register.
    Local,
    /// The `this` register of instance methods.
    This,
    /// The nth declared parameter register.
    Param(usize),
}

/// Virtual register informations stored into the body arena.
#[derive(Debug, Clone, Serialize)]
pub struct RegInfo {
    pub(crate) name: String,
    pub(crate) kind: RegKind,
    pub(crate) declared: Option<Type>,
    pub(crate) type_: Option<Type>,
}

impl RegInfo {
    pub(crate) fn new(name: String, kind: RegKind, declared: Option<Type>) -> Self {
        Self {
            name,
            kind,
            declared,
            type_: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub const fn kind(&self) -> RegKind {
        self.kind
    }

    /// Checks if the register is `this` or a parameter register, whose positions are
    /// imposed by the calling convention.
    #[inline]
    #[must_use]
    pub const fn is_special(&self) -> bool {
        !matches!(self.kind, RegKind::Local)
    }

    /// Returns the type imposed by the method signature (`this` and parameters only).
    #[inline]
    #[must_use]
    pub const fn declared_type(&self) -> Option<&Type> {
        self.declared.as_ref()
    }

    /// Returns the type of the register, if already known.
    #[inline]
    #[must_use]
    pub const fn type_(&self) -> Option<&Type> {
        self.type_.as_ref()
    }

    #[inline]
    pub fn set_type(&mut self, type_: Type) {
        self.type_ = Some(type_);
    }

    /// Returns the number of register slots occupied by the register, once typed.
    #[must_use]
    pub fn width(&self) -> u16 {
        self.type_.as_ref().map_or(1, Type::width)
    }
}
