//! Class declarations, as needed to resolve class hierarchy questions.

use crate::types::MethodDescriptor;

/// Declaration of a method signature in a class, with the informations that
/// exception analyses rely on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDecl {
    pub name: String,
    pub descriptor: MethodDescriptor,
    /// Declared (`throws` clause) exception classes.
    pub exceptions: Vec<String>,
    /// The method never returns normally (it always throws, or exits the process).
    pub unconditional_thrower: bool,
}

/// Declaration of a class or interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDecl {
    pub name: String,
    pub superclass: Option<String>,
    pub interfaces: Vec<String>,
    pub is_interface: bool,
    pub methods: Vec<MethodDecl>,
}

impl ClassDecl {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            superclass: None,
            interfaces: Vec::new(),
            is_interface: false,
            methods: Vec::new(),
        }
    }

    #[must_use]
    pub fn get_method(&self, name: &str, descriptor: &MethodDescriptor) -> Option<&MethodDecl> {
        self.methods
            .iter()
            .find(|m| m.name == name && &m.descriptor == descriptor)
    }
}
