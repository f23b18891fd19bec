//! JVM typing informations data structures.

use crate::errors::{BytecodeError, BytecodeResult};
use std::convert::TryFrom;
use std::fmt;

/// JVM concrete type descriptor type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
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
    /// Array of the given element type descriptor, usable recursively for arrays of arrays,
    /// though it is invalid to have more than 255 dimensions.
    Array(usize, Box<Self>),
    /// Type of a fully-qualified class, in internal form (`java/lang/Object`).
    Class(String),
}

impl Type {
    /// Returns a java-like representation of the type.
    /// This method is useful for pretty-printing bytecode data. Its result differs
    /// from the `Display` implementation, which produces descriptor strings.
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
        }
    }

    /// Number of local variable or operand stack slots a value of this type occupies.
    #[must_use]
    pub const fn slots(&self) -> usize {
        match self {
            Self::Void => 0,
            Self::Long | Self::Double => 2,
            _ => 1,
        }
    }

    #[must_use]
    pub const fn is_reference(&self) -> bool {
        matches!(self, Self::Array(_, _) | Self::Class(_))
    }

    pub fn as_class_name(&self) -> BytecodeResult<&str> {
        if let Self::Class(name) = self {
            Ok(name)
        } else {
            Err(BytecodeError::InvalidType)
        }
    }

    /// Builds the array type whose elements are of this type.
    #[must_use]
    pub fn array_of(self) -> Self {
        match self {
            Self::Array(n, elt) => Self::Array(n + 1, elt),
            t => Self::Array(1, Box::new(t)),
        }
    }

    /// Returns the type of the elements of an array type.
    #[must_use]
    pub fn element_type(&self) -> Option<Self> {
        match self {
            Self::Array(1, elt) => Some(elt.as_ref().clone()),
            Self::Array(n, elt) => Some(Self::Array(n - 1, elt.clone())),
            _ => None,
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
        }
    }
}

fn conversion_error(s: &str, to: &str) -> BytecodeError {
    BytecodeError::Conversion {
        from: format!("&str ({s:?})"),
        to: to.to_string(),
    }
}

impl TryFrom<&str> for Type {
    type Error = BytecodeError;

    fn try_from(s: &str) -> BytecodeResult<Self> {
        let (t, rest) = split_descriptor(s)?;
        if rest.is_empty() {
            Ok(t)
        } else {
            Err(conversion_error(s, "Type"))
        }
    }
}

/// Reads one type descriptor at the beginning of `s`, returning the remaining input.
fn split_descriptor(s: &str) -> BytecodeResult<(Type, &str)> {
    let mut dims: usize = 0;
    while s[dims..].starts_with('[') {
        dims += 1;
    }
    if dims >= s.len() || dims > 255 {
        return Err(conversion_error(s, "Type"));
    }

    let sub = &s[dims..];
    let (t, rest) = match sub.as_bytes()[0] {
        b'V' if dims == 0 => (Type::Void, &sub[1..]),
        b'Z' => (Type::Boolean, &sub[1..]),
        b'B' => (Type::Byte, &sub[1..]),
        b'S' => (Type::Short, &sub[1..]),
        b'C' => (Type::Char, &sub[1..]),
        b'I' => (Type::Int, &sub[1..]),
        b'J' => (Type::Long, &sub[1..]),
        b'F' => (Type::Float, &sub[1..]),
        b'D' => (Type::Double, &sub[1..]),
        b'L' => {
            let end = sub.find(';').ok_or_else(|| conversion_error(s, "Type"))?;
            if end < 2 {
                return Err(conversion_error(s, "Type"));
            }
            (Type::Class(sub[1..end].to_string()), &sub[end + 1..])
        }
        _ => return Err(conversion_error(s, "Type")),
    };
    if dims == 0 {
        Ok((t, rest))
    } else {
        Ok((Type::Array(dims, Box::new(t)), rest))
    }
}

/// A method prototype: parameters types and return type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodDescriptor {
    params: Vec<Type>,
    ret: Type,
}

impl MethodDescriptor {
    #[must_use]
    pub fn new(params: Vec<Type>, ret: Type) -> Self {
        Self { params, ret }
    }

    #[inline]
    #[must_use]
    pub fn parameters_types(&self) -> &[Type] {
        &self.params
    }

    #[inline]
    #[must_use]
    pub const fn return_type(&self) -> &Type {
        &self.ret
    }

    /// Number of operand stack slots taken by the arguments (receiver excluded).
    #[must_use]
    pub fn arg_slots(&self) -> usize {
        self.params.iter().map(Type::slots).sum()
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(")?;
        for t in &self.params {
            write!(f, "{t}")?;
        }
        write!(f, "){}", self.ret)
    }
}

impl TryFrom<&str> for MethodDescriptor {
    type Error = BytecodeError;

    fn try_from(s: &str) -> BytecodeResult<Self> {
        let Some(mut rest) = s.strip_prefix('(') else {
            return Err(conversion_error(s, "MethodDescriptor"));
        };
        let mut params = Vec::new();
        while !rest.starts_with(')') {
            if rest.is_empty() {
                return Err(conversion_error(s, "MethodDescriptor"));
            }
            let (t, r) = split_descriptor(rest)?;
            if t == Type::Void {
                return Err(conversion_error(s, "MethodDescriptor"));
            }
            params.push(t);
            rest = r;
        }
        let ret = Type::try_from(&rest[1..])?;
        Ok(Self { params, ret })
    }
}

/// Symbolic reference to a field, as found in field access instructions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldRef {
    pub class: String,
    pub name: String,
    pub typ: Type,
}

impl FieldRef {
    #[inline]
    #[must_use]
    pub const fn slots(&self) -> usize {
        self.typ.slots()
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}:{}", self.class, self.name, self.typ)
    }
}

/// Symbolic reference to a method, as found in invocation instructions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodRef {
    pub class: String,
    pub name: String,
    pub descriptor: MethodDescriptor,
}

impl MethodRef {
    #[inline]
    #[must_use]
    pub fn arg_slots(&self) -> usize {
        self.descriptor.arg_slots()
    }

    #[inline]
    #[must_use]
    pub const fn ret_slots(&self) -> usize {
        self.descriptor.return_type().slots()
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}{}", self.class, self.name, self.descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_descriptors() {
        assert_eq!(Type::try_from("I").unwrap(), Type::Int);
        assert_eq!(
            Type::try_from("[[Ljava/lang/String;").unwrap(),
            Type::Array(2, Box::new(Type::Class("java/lang/String".to_string())))
        );
        assert!(Type::try_from("Ljava/lang/String").is_err());
        assert!(Type::try_from("[V").is_err());
        assert!(Type::try_from("II").is_err());
    }

    #[test]
    fn method_descriptors() {
        let descr = MethodDescriptor::try_from("(IJ[Ljava/lang/Object;)D").unwrap();
        assert_eq!(descr.parameters_types().len(), 3);
        assert_eq!(descr.arg_slots(), 4);
        assert_eq!(descr.return_type(), &Type::Double);
        assert_eq!(format!("{descr}"), "(IJ[Ljava/lang/Object;)D");
        assert!(MethodDescriptor::try_from("(I").is_err());
        assert!(MethodDescriptor::try_from("(V)V").is_err());
    }

    #[test]
    fn array_element_types() {
        let arr = Type::Int.array_of().array_of();
        assert_eq!(arr, Type::Array(2, Box::new(Type::Int)));
        assert_eq!(arr.element_type(), Some(Type::Array(1, Box::new(Type::Int))));
        assert_eq!(Type::Int.element_type(), None);
    }
}
