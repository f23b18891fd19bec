//! JVM bytecode data structures definitions, and textual assembly front end.

mod addr;
mod parsers;

pub mod classes;
pub mod code;
pub mod errors;
pub mod instrs;
pub mod methods;
pub mod types;

pub use crate::addr::Addr;
pub use crate::parsers::parse_program as parse;

use crate::classes::ClassDecl;
use crate::errors::BytecodeResult;
use crate::methods::Method;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// A set of class declarations and method bodies, as read from a textual
/// assembly file.
#[derive(Debug, Default)]
pub struct Program {
    pub(crate) classes: Vec<ClassDecl>,
    pub(crate) methods: Vec<Method>,
}

impl Program {
    /// Reads and parses a textual assembly file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> BytecodeResult<Self> {
        let mut file = File::open(path)?;
        let mut input = String::new();
        file.read_to_string(&mut input)?;
        parse(&input)
    }

    #[inline]
    pub fn iter_classes(&self) -> impl Iterator<Item = &ClassDecl> {
        self.classes.iter()
    }

    #[inline]
    pub fn iter_methods(&self) -> impl Iterator<Item = &Method> {
        self.methods.iter()
    }

    #[must_use]
    pub fn get_class(&self, name: &str) -> Option<&ClassDecl> {
        self.classes.iter().find(|c| c.name == name)
    }

    /// Finds a method by its full name (see [`Method::full_name`]).
    #[must_use]
    pub fn get_method(&self, full_name: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.full_name() == full_name)
    }

    #[must_use]
    pub fn methods_count(&self) -> usize {
        self.methods.len()
    }
}
