use crate::hierarchy::{
    ClassResolver, LookupFailureCallback, JAVA_LANG_OBJECT, JAVA_LANG_THROWABLE,
};
use crate::typing::errors::{TypeError, TypeResult};
use crate::typing::exceptions::ExceptionSet;
use jf_bytecode::types::Type;
use lazy_static::lazy_static;
use std::convert::TryFrom;
use std::fmt;

/// Abstract value of a frame slot.
///
/// Wide values occupy two slots: the lower one holds the `LongExtra` or
/// `DoubleExtra` marker and the upper one holds the real type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JvmType {
    Top,
    Bottom,
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    LongExtra,
    Float,
    Double,
    DoubleExtra,
    Null,
    ReturnAddress,
    Object(String),
    Array(usize, Box<Type>),
    /// Exception object entering a handler, with the set of classes it may be.
    Exception(ExceptionSet),
}

impl fmt::Display for JvmType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Top => write!(f, "⊤"),
            Self::Bottom => write!(f, "⊥"),
            Self::Boolean => write!(f, "boolean"),
            Self::Byte => write!(f, "byte"),
            Self::Char => write!(f, "char"),
            Self::Short => write!(f, "short"),
            Self::Int => write!(f, "int"),
            Self::Long => write!(f, "long"),
            Self::LongExtra => write!(f, "long_"),
            Self::Float => write!(f, "float"),
            Self::Double => write!(f, "double"),
            Self::DoubleExtra => write!(f, "double_"),
            Self::Null => write!(f, "null"),
            Self::ReturnAddress => write!(f, "retaddr"),
            Self::Object(class) => write!(f, "{class}"),
            Self::Array(n, elt) => write!(f, "{}", Type::Array(*n, elt.clone())),
            Self::Exception(set) => write!(f, "EXC{set}"),
        }
    }
}

impl TryFrom<&Type> for JvmType {
    type Error = TypeError;

    fn try_from(descr: &Type) -> TypeResult<Self> {
        match descr {
            Type::Void => Err(TypeError::VoidValue),
            Type::Boolean => Ok(Self::Boolean),
            Type::Byte => Ok(Self::Byte),
            Type::Short => Ok(Self::Short),
            Type::Char => Ok(Self::Char),
            Type::Int => Ok(Self::Int),
            Type::Long => Ok(Self::Long),
            Type::Float => Ok(Self::Float),
            Type::Double => Ok(Self::Double),
            Type::Array(n, elt) => Ok(Self::Array(*n, elt.clone())),
            Type::Class(name) => Ok(Self::Object(name.clone())),
        }
    }
}

lazy_static! {
    pub static ref OBJECT: JvmType = JvmType::Object(JAVA_LANG_OBJECT.to_string());
    pub static ref THROWABLE: JvmType = JvmType::Object(JAVA_LANG_THROWABLE.to_string());
    pub static ref STRING: JvmType = JvmType::Object("java/lang/String".to_string());
    pub static ref CLASS: JvmType = JvmType::Object("java/lang/Class".to_string());
}

impl JvmType {
    /// Marker stored in the lower slot of a wide value, if this is a wide type.
    #[must_use]
    pub const fn wide_extra(&self) -> Option<Self> {
        match self {
            Self::Long => Some(Self::LongExtra),
            Self::Double => Some(Self::DoubleExtra),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_wide_extra(&self) -> bool {
        matches!(self, Self::LongExtra | Self::DoubleExtra)
    }

    #[must_use]
    pub const fn is_int_like(&self) -> bool {
        matches!(
            self,
            Self::Boolean | Self::Byte | Self::Char | Self::Short | Self::Int
        )
    }

    #[must_use]
    pub const fn is_reference(&self) -> bool {
        matches!(
            self,
            Self::Null | Self::Object(_) | Self::Array(_, _) | Self::Exception(_)
        )
    }

    /// Type of the elements of an array value, as loaded by `aaload`.
    ///
    /// # Errors
    ///
    /// Fails with [`TypeError::ExpectedArray`] when the value is not an array.
    pub fn element_type(&self) -> TypeResult<Self> {
        match self {
            Self::Null => Ok(Self::Null),
            Self::Array(n, elt) => match Type::Array(*n, elt.clone()).element_type() {
                Some(t) => Self::try_from(&t),
                None => Err(TypeError::ExpectedArray(self.to_string())),
            },
            // any array type has Object as supertype
            Self::Object(class) if class == JAVA_LANG_OBJECT => Ok(OBJECT.clone()),
            _ => Err(TypeError::ExpectedArray(self.to_string())),
        }
    }

    /// Class standing for a reference value when merging it with another class.
    fn as_class(
        &self,
        resolver: &dyn ClassResolver,
        callback: &dyn LookupFailureCallback,
    ) -> Option<String> {
        match self {
            Self::Object(class) => Some(class.clone()),
            Self::Array(_, _) => Some(JAVA_LANG_OBJECT.to_string()),
            Self::Exception(set) => Some(set.common_superclass(resolver, callback)),
            _ => None,
        }
    }

    /// Merges two values flowing into the same slot.
    ///
    /// Unrelated values merge to bottom. Class lookup failures are reported to the
    /// callback and the merge falls back to `java/lang/Object`.
    #[must_use]
    pub fn merge(
        &self,
        other: &Self,
        resolver: &dyn ClassResolver,
        callback: &dyn LookupFailureCallback,
    ) -> Self {
        match (self, other) {
            (Self::Top, v) | (v, Self::Top) => v.clone(),
            (a, b) if a == b => a.clone(),
            (Self::Bottom, _) | (_, Self::Bottom) => Self::Bottom,
            (a, b) if a.is_int_like() && b.is_int_like() => Self::Int,
            (Self::Null, v) | (v, Self::Null) if v.is_reference() => v.clone(),
            (Self::Exception(a), Self::Exception(b)) => {
                let mut set = a.clone();
                set.union_with(b);
                Self::Exception(set)
            }
            (a, b) if a.is_reference() && b.is_reference() => {
                let (Some(ca), Some(cb)) = (
                    a.as_class(resolver, callback),
                    b.as_class(resolver, callback),
                ) else {
                    return Self::Bottom;
                };
                match resolver.common_superclass(&ca, &cb) {
                    Ok(class) => Self::Object(class),
                    Err(failure) => {
                        callback.report(&failure);
                        OBJECT.clone()
                    }
                }
            }
            _ => Self::Bottom,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{Hierarchy, LogLookupFailures};
    use crate::testing::Failures;

    fn object(class: &str) -> JvmType {
        JvmType::Object(class.to_string())
    }

    #[test]
    fn primitive_merges() {
        let h = Hierarchy::new();
        let cb = LogLookupFailures;
        assert_eq!(JvmType::Top.merge(&JvmType::Float, &h, &cb), JvmType::Float);
        assert_eq!(JvmType::Byte.merge(&JvmType::Char, &h, &cb), JvmType::Int);
        assert_eq!(JvmType::Int.merge(&JvmType::Float, &h, &cb), JvmType::Bottom);
        assert_eq!(JvmType::Long.merge(&JvmType::Long, &h, &cb), JvmType::Long);
        assert_eq!(JvmType::Bottom.merge(&JvmType::Int, &h, &cb), JvmType::Bottom);
    }

    #[test]
    fn reference_merges() {
        let h = Hierarchy::new();
        let failures = Failures::default();
        assert_eq!(
            JvmType::Null.merge(&STRING, &h, &failures),
            STRING.clone()
        );
        assert_eq!(
            object("java/lang/ArithmeticException").merge(
                &object("java/lang/NullPointerException"),
                &h,
                &failures
            ),
            object("java/lang/RuntimeException")
        );
        let array = JvmType::try_from(&Type::Int.array_of()).unwrap();
        assert_eq!(array.merge(&STRING, &h, &failures), OBJECT.clone());
        assert!(failures.classes().is_empty());

        assert_eq!(object("Unknown").merge(&STRING, &h, &failures), OBJECT.clone());
        assert_eq!(failures.classes(), vec!["Unknown".to_string()]);
        assert_eq!(JvmType::Null.merge(&JvmType::Int, &h, &failures), JvmType::Bottom);
    }

    #[test]
    fn descriptors_and_arrays() {
        assert!(matches!(JvmType::try_from(&Type::Void), Err(TypeError::VoidValue)));
        let matrix = JvmType::try_from(&Type::Class("Foo".to_string()).array_of().array_of()).unwrap();
        assert_eq!(matrix.to_string(), "[[LFoo;");
        let row = matrix.element_type().unwrap();
        assert_eq!(row, JvmType::Array(1, Box::new(Type::Class("Foo".to_string()))));
        assert_eq!(row.element_type().unwrap(), object("Foo"));
        assert!(JvmType::Int.element_type().is_err());
        assert_eq!(JvmType::Long.wide_extra(), Some(JvmType::LongExtra));
    }
}
