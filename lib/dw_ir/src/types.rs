//! Register IR typing informations data structures.
//!
//! The register IR does not carry complete static types: the source bytecode only
//! distinguishes values by their bit width at some places (constants, moves, array
//! accesses). Such places are typed with one of the *ambiguous* [`Type`] variants
//! until the typing pass resolves them.

use crate::errors::{IrError, IrResult};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;

/// Register IR type descriptor.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Type {
    /// `void` type, only valid for return types.
    Void,
    /// `boolean` type.
    Boolean,
    /// `byte` type.
    Byte,
    /// `short` type.
    Short,
    /// `char` type.
    Char,
    /// `int` type.
    Int,
    /// `long` type.
    Long,
    /// `float` type.
    Float,
    /// `double` type.
    Double,
    /// Array of the given element type, with its number of dimensions.
    /// The element is never an array itself.
    Array(usize, Box<Self>),
    /// Type of a fully-qualified class.
    Class(String),
    /// A 32-bit zero: `int`, `float` or the `null` reference.
    Zero,
    /// A 32-bit value: `int` or `float`.
    Narrow,
    /// A 64-bit value: `long` or `double`.
    Wide,
}

lazy_static! {
    pub static ref JAVA_LANG_OBJECT: Type = Type::Class("java/lang/Object".to_string());
    pub static ref JAVA_LANG_THROWABLE: Type = Type::Class("java/lang/Throwable".to_string());
    pub static ref JAVA_LANG_STRING: Type = Type::Class("java/lang/String".to_string());
    pub static ref JAVA_LANG_CLASS: Type = Type::Class("java/lang/Class".to_string());
}

impl Type {
    /// Builds the type of an array whose elements are of the given type.
    #[must_use]
    pub fn array_of(element: Self) -> Self {
        match element {
            Self::Array(n, inner) => Self::Array(n + 1, inner),
            t => Self::Array(1, Box::new(t)),
        }
    }

    /// Returns the type of the elements of an array type.
    #[must_use]
    pub fn element(&self) -> Option<Self> {
        match self {
            Self::Array(1, inner) => Some(inner.as_ref().clone()),
            Self::Array(n, inner) => Some(Self::Array(n - 1, inner.clone())),
            _ => None,
        }
    }

    /// Checks if the type is (or contains, for arrays) an ambiguous lattice element.
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        match self {
            Self::Zero | Self::Narrow | Self::Wide => true,
            Self::Array(_, inner) => inner.is_ambiguous(),
            _ => false,
        }
    }

    /// Checks if values of this type occupy a register pair.
    #[inline]
    #[must_use]
    pub const fn is_wide(&self) -> bool {
        matches!(self, Self::Long | Self::Double | Self::Wide)
    }

    #[inline]
    #[must_use]
    pub const fn is_reference(&self) -> bool {
        matches!(self, Self::Array(_, _) | Self::Class(_))
    }

    /// Checks if the type is one of the integral types that are represented as `int`
    /// in registers.
    #[inline]
    #[must_use]
    pub const fn is_int_like(&self) -> bool {
        matches!(
            self,
            Self::Boolean | Self::Byte | Self::Short | Self::Char | Self::Int
        )
    }

    /// Returns the number of register slots needed to store a value of this type.
    #[must_use]
    pub fn width(&self) -> u16 {
        match self {
            Self::Void => 0,
            t if t.is_wide() => 2,
            _ => 1,
        }
    }

    /// Returns a java-like representation of the type.
    #[must_use]
    pub fn to_java_string(&self) -> String {
        match self {
            Self::Void => "void".to_string(),
            Self::Boolean => "boolean".to_string(),
            Self::Byte => "byte".to_string(),
            Self::Short => "short".to_string(),
            Self::Char => "char".to_string(),
            Self::Int => "int".to_string(),
            Self::Long => "long".to_string(),
            Self::Float => "float".to_string(),
            Self::Double => "double".to_string(),
            Self::Array(n, sub) => {
                let mut s = sub.to_java_string();
                for _ in 0..*n {
                    s.push_str("[]");
                }
                s
            }
            Self::Class(name) => name.replace('/', "."),
            Self::Zero => "int|float|null".to_string(),
            Self::Narrow => "int|float".to_string(),
            Self::Wide => "long|double".to_string(),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Void => write!(f, "V"),
            Self::Boolean => write!(f, "Z"),
            Self::Byte => write!(f, "B"),
            Self::Short => write!(f, "S"),
            Self::Char => write!(f, "C"),
            Self::Int => write!(f, "I"),
            Self::Long => write!(f, "J"),
            Self::Float => write!(f, "F"),
            Self::Double => write!(f, "D"),
            Self::Array(n, inner) => {
                for _ in 0..*n {
                    write!(f, "[")?;
                }
                write!(f, "{inner}")
            }
            Self::Class(classname) => write!(f, "L{classname};"),
            Self::Zero => write!(f, "?0"),
            Self::Narrow => write!(f, "?32"),
            Self::Wide => write!(f, "?64"),
        }
    }
}

fn conversion_error(s: &str, to: &str) -> IrError {
    IrError::Conversion {
        from: format!("&str ({s:?})"),
        to: to.to_string(),
    }
}

impl TryFrom<&str> for Type {
    type Error = IrError;

    fn try_from(s: &str) -> IrResult<Self> {
        if s.is_empty() {
            return Err(conversion_error(s, "Type"));
        }

        if s == "V" {
            return Ok(Self::Void);
        }

        let mut i: usize = 0;
        while i < s.len() && &s[i..=i] == "[" {
            i += 1;
        }
        if i >= s.len() || i >= 255 {
            return Err(conversion_error(s, "Type"));
        }

        let t = match &s[i..] {
            "Z" => Self::Boolean,
            "B" => Self::Byte,
            "S" => Self::Short,
            "C" => Self::Char,
            "I" => Self::Int,
            "J" => Self::Long,
            "F" => Self::Float,
            "D" => Self::Double,
            "?0" => Self::Zero,
            "?32" => Self::Narrow,
            "?64" => Self::Wide,
            sub => {
                let l = sub.len();
                if l > 2 && sub.starts_with('L') && sub.ends_with(';') {
                    Self::Class(sub[1..l - 1].to_string())
                } else {
                    return Err(conversion_error(s, "Type"));
                }
            }
        };
        if i == 0 {
            Ok(t)
        } else {
            Ok(Self::Array(i, Box::new(t)))
        }
    }
}

/// Splits a concatenation of type descriptors (such as a prototype parameters list).
pub fn split_descriptors(s: &str) -> IrResult<Vec<Type>> {
    let mut types = Vec::new();
    let bytes = s.as_bytes();
    let mut start = 0;
    while start < bytes.len() {
        let mut end = start;
        while end < bytes.len() && bytes[end] == b'[' {
            end += 1;
        }
        if end >= bytes.len() {
            return Err(conversion_error(s, "Vec<Type>"));
        }
        end = match bytes[end] {
            b'L' => match s[end..].find(';') {
                Some(semi) => end + semi + 1,
                None => return Err(conversion_error(s, "Vec<Type>")),
            },
            _ => end + 1,
        };
        types.push(Type::try_from(&s[start..end])?);
        start = end;
    }
    Ok(types)
}

/// A reference to a field, as used by field access instructions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldRef {
    pub definer: Type,
    pub name: String,
    pub type_: Type,
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}->{}:{}", self.definer, self.name, self.type_)
    }
}

impl TryFrom<&str> for FieldRef {
    type Error = IrError;

    fn try_from(s: &str) -> IrResult<Self> {
        let (definer, rest) = s
            .split_once("->")
            .ok_or_else(|| conversion_error(s, "FieldRef"))?;
        let (name, type_) = rest
            .split_once(':')
            .ok_or_else(|| conversion_error(s, "FieldRef"))?;
        if name.is_empty() {
            return Err(conversion_error(s, "FieldRef"));
        }
        Ok(Self {
            definer: Type::try_from(definer)?,
            name: name.to_string(),
            type_: Type::try_from(type_)?,
        })
    }
}

/// A reference to a method, as used by invocation instructions and method bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodRef {
    pub definer: Type,
    pub name: String,
    pub parameters: Vec<Type>,
    pub return_type: Type,
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}->{}(", self.definer, self.name)?;
        for t in &self.parameters {
            write!(f, "{t}")?;
        }
        write!(f, "){}", self.return_type)
    }
}

impl TryFrom<&str> for MethodRef {
    type Error = IrError;

    fn try_from(s: &str) -> IrResult<Self> {
        let (definer, rest) = s
            .split_once("->")
            .ok_or_else(|| conversion_error(s, "MethodRef"))?;
        let (name, proto) = rest
            .split_once('(')
            .ok_or_else(|| conversion_error(s, "MethodRef"))?;
        let (params, ret) = proto
            .split_once(')')
            .ok_or_else(|| conversion_error(s, "MethodRef"))?;
        if name.is_empty() {
            return Err(conversion_error(s, "MethodRef"));
        }
        Ok(Self {
            definer: Type::try_from(definer)?,
            name: name.to_string(),
            parameters: split_descriptors(params)?,
            return_type: Type::try_from(ret)?,
        })
    }
}

impl MethodRef {
    /// Returns the number of register slots used by the method arguments, including the
    /// receiver when `is_static` is false.
    #[must_use]
    pub fn arguments_width(&self, is_static: bool) -> u16 {
        let receiver = u16::from(!is_static);
        receiver + self.parameters.iter().map(Type::width).sum::<u16>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptors() {
        assert_eq!(Type::try_from("I").unwrap(), Type::Int);
        assert_eq!(
            Type::try_from("[[Ljava/lang/String;").unwrap(),
            Type::Array(2, Box::new(JAVA_LANG_STRING.clone()))
        );
        assert_eq!(
            Type::try_from("[?32").unwrap(),
            Type::Array(1, Box::new(Type::Narrow))
        );
        assert!(Type::try_from("L;").is_err());
        assert!(Type::try_from("[").is_err());
        assert_eq!(format!("{}", Type::array_of(Type::Wide)), "[?64");
    }

    #[test]
    fn array_elements() {
        let t = Type::try_from("[[I").unwrap();
        assert_eq!(t.element(), Some(Type::Array(1, Box::new(Type::Int))));
        assert_eq!(Type::array_of(t.element().unwrap()), t);
        assert_eq!(Type::Int.element(), None);
        assert!(Type::array_of(Type::Zero).is_ambiguous());
    }

    #[test]
    fn member_references() {
        let m = MethodRef::try_from("Lcom/example/Foo;->bar(IJ[Ljava/lang/Object;)V").unwrap();
        assert_eq!(m.name, "bar");
        assert_eq!(m.parameters.len(), 3);
        assert_eq!(m.arguments_width(false), 5);
        assert_eq!(m.arguments_width(true), 4);
        assert_eq!(
            format!("{m}"),
            "Lcom/example/Foo;->bar(IJ[Ljava/lang/Object;)V"
        );

        let f = FieldRef::try_from("Lcom/example/Foo;->count:I").unwrap();
        assert_eq!(f.type_, Type::Int);
        assert!(FieldRef::try_from("Lcom/example/Foo;count:I").is_err());
    }
}
