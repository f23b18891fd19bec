//! JVM methods definitions.

use crate::code::Code;
use crate::types::{MethodDescriptor, Type};
use bitflags::bitflags;
use std::fmt;

bitflags! {
    pub struct MethodFlags: u32 {
        const ACC_PUBLIC       = 0x0001;
        const ACC_PRIVATE      = 0x0002;
        const ACC_PROTECTED    = 0x0004;
        const ACC_STATIC       = 0x0008;
        const ACC_FINAL        = 0x0010;
        const ACC_SYNCHRONIZED = 0x0020;
        const ACC_BRIDGE       = 0x0040;
        const ACC_VARARGS      = 0x0080;
        const ACC_NATIVE       = 0x0100;
        const ACC_ABSTRACT     = 0x0400;
        const ACC_STRICT       = 0x0800;
        const ACC_SYNTHETIC    = 0x1000;
    }
}

impl fmt::Display for MethodFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.contains(Self::ACC_PUBLIC) {
            write!(f, "public ")?;
        }
        if self.contains(Self::ACC_PRIVATE) {
            write!(f, "private ")?;
        }
        if self.contains(Self::ACC_PROTECTED) {
            write!(f, "protected ")?;
        }
        if self.contains(Self::ACC_STATIC) {
            write!(f, "static ")?;
        }
        if self.contains(Self::ACC_FINAL) {
            write!(f, "final ")?;
        }
        if self.contains(Self::ACC_SYNCHRONIZED) {
            write!(f, "synchronized ")?;
        }
        if self.contains(Self::ACC_NATIVE) {
            write!(f, "native ")?;
        }
        if self.contains(Self::ACC_ABSTRACT) {
            write!(f, "abstract ")?;
        }
        Ok(())
    }
}

/// A method with its (optional) body.
#[derive(Debug, Clone)]
pub struct Method {
    class: String,
    name: String,
    descriptor: MethodDescriptor,
    flags: MethodFlags,
    max_locals: usize,
    code: Option<Code>,
}

impl Method {
    #[must_use]
    pub fn new(
        class: &str,
        name: &str,
        descriptor: MethodDescriptor,
        flags: MethodFlags,
        max_locals: usize,
        code: Option<Code>,
    ) -> Self {
        Self {
            class: class.to_string(),
            name: name.to_string(),
            descriptor,
            flags,
            max_locals,
            code,
        }
    }

    #[inline]
    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.class
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub const fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    #[inline]
    #[must_use]
    pub fn parameters_types(&self) -> &[Type] {
        self.descriptor.parameters_types()
    }

    #[inline]
    #[must_use]
    pub const fn return_type(&self) -> &Type {
        self.descriptor.return_type()
    }

    #[inline]
    #[must_use]
    pub const fn flags(&self) -> MethodFlags {
        self.flags
    }

    #[inline]
    #[must_use]
    pub const fn is_static(&self) -> bool {
        self.flags.contains(MethodFlags::ACC_STATIC)
    }

    /// Number of local variable slots of the frame. It is at least the number of
    /// slots taken by the receiver and the parameters.
    #[must_use]
    pub fn max_locals(&self) -> usize {
        let args = self.descriptor.arg_slots() + usize::from(!self.is_static());
        self.max_locals.max(args)
    }

    #[inline]
    #[must_use]
    pub const fn code(&self) -> Option<&Code> {
        self.code.as_ref()
    }

    /// Fully qualified name used to identify the method in logs and caches.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}.{}{}", self.class, self.name, self.descriptor)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.flags, self.full_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryFrom;

    #[test]
    fn locals_include_arguments() {
        let descr = MethodDescriptor::try_from("(JI)V").unwrap();
        let m = Method::new("Foo", "bar", descr.clone(), MethodFlags::empty(), 0, None);
        assert_eq!(m.max_locals(), 4);
        let m = Method::new("Foo", "bar", descr, MethodFlags::ACC_STATIC, 6, None);
        assert_eq!(m.max_locals(), 6);
        assert_eq!(format!("{m}"), "static Foo.bar(JI)V");
    }
}
