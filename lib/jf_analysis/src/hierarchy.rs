//! Classes hierarchy graph representation, and class resolution capability used by
//! the analyses that need subtyping decisions.

use jf_bytecode::classes::{ClassDecl, MethodDecl};
use jf_bytecode::types::MethodDescriptor;
use jf_bytecode::Program;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

pub const JAVA_LANG_OBJECT: &str = "java/lang/Object";
pub const JAVA_LANG_THROWABLE: &str = "java/lang/Throwable";
pub const JAVA_LANG_RUNTIME_EXCEPTION: &str = "java/lang/RuntimeException";
pub const JAVA_LANG_ERROR: &str = "java/lang/Error";

/// Classes every program implicitly relies on: name, superclass, and whether it is
/// an interface.
const SYSTEM_CLASSES: &[(&str, Option<&str>, bool)] = &[
    (JAVA_LANG_OBJECT, None, false),
    ("java/io/Serializable", Some(JAVA_LANG_OBJECT), true),
    ("java/lang/Cloneable", Some(JAVA_LANG_OBJECT), true),
    ("java/lang/String", Some(JAVA_LANG_OBJECT), false),
    ("java/lang/Class", Some(JAVA_LANG_OBJECT), false),
    (JAVA_LANG_THROWABLE, Some(JAVA_LANG_OBJECT), false),
    ("java/lang/Exception", Some(JAVA_LANG_THROWABLE), false),
    (JAVA_LANG_ERROR, Some(JAVA_LANG_THROWABLE), false),
    (JAVA_LANG_RUNTIME_EXCEPTION, Some("java/lang/Exception"), false),
    ("java/lang/ArithmeticException", Some(JAVA_LANG_RUNTIME_EXCEPTION), false),
    ("java/lang/NullPointerException", Some(JAVA_LANG_RUNTIME_EXCEPTION), false),
    ("java/lang/ClassCastException", Some(JAVA_LANG_RUNTIME_EXCEPTION), false),
    ("java/lang/ArrayStoreException", Some(JAVA_LANG_RUNTIME_EXCEPTION), false),
    ("java/lang/NegativeArraySizeException", Some(JAVA_LANG_RUNTIME_EXCEPTION), false),
    ("java/lang/IllegalMonitorStateException", Some(JAVA_LANG_RUNTIME_EXCEPTION), false),
    ("java/lang/IndexOutOfBoundsException", Some(JAVA_LANG_RUNTIME_EXCEPTION), false),
    (
        "java/lang/ArrayIndexOutOfBoundsException",
        Some("java/lang/IndexOutOfBoundsException"),
        false,
    ),
];

/// A class that could not be found while resolving the class hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("class not found: {class}")]
pub struct LookupFailure {
    pub class: String,
}

impl LookupFailure {
    #[must_use]
    pub fn new(class: &str) -> Self {
        Self {
            class: class.to_string(),
        }
    }
}

/// Sink for class lookup failures that refinement passes recover from.
pub trait LookupFailureCallback {
    fn report(&self, failure: &LookupFailure);
}

/// Reports lookup failures as `log` warnings.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogLookupFailures;

impl LookupFailureCallback for LogLookupFailures {
    fn report(&self, failure: &LookupFailure) {
        log::warn!("{failure}");
    }
}

/// Class resolution capability.
///
/// Only [`ClassResolver::lookup_class`] is required, other queries are derived from it.
pub trait ClassResolver {
    /// Resolves a class by name (internal form, e.g. `java/lang/String`).
    ///
    /// # Errors
    ///
    /// Returns a [`LookupFailure`] if the class is unknown.
    fn lookup_class(&self, name: &str) -> Result<&ClassDecl, LookupFailure>;

    /// Direct supertypes (superclass first, then interfaces).
    fn supertypes(&self, name: &str) -> Result<Vec<String>, LookupFailure> {
        let class = self.lookup_class(name)?;
        Ok(class
            .superclass
            .iter()
            .chain(class.interfaces.iter())
            .cloned()
            .collect())
    }

    fn is_subtype(&self, sub: &str, sup: &str) -> Result<bool, LookupFailure> {
        if sub == sup || sup == JAVA_LANG_OBJECT {
            return Ok(true);
        }
        let mut seen = BTreeSet::new();
        let mut stack = vec![sub.to_string()];
        while let Some(name) = stack.pop() {
            if !seen.insert(name.clone()) {
                continue;
            }
            for parent in self.supertypes(&name)? {
                if parent == sup {
                    return Ok(true);
                }
                stack.push(parent);
            }
        }
        Ok(false)
    }

    /// The class itself followed by its superclasses, up to `java/lang/Object`.
    fn superclass_chain(&self, name: &str) -> Result<Vec<String>, LookupFailure> {
        let mut chain = vec![name.to_string()];
        let mut current = self.lookup_class(name)?;
        while let Some(sup) = &current.superclass {
            if chain.contains(sup) {
                break;
            }
            chain.push(sup.clone());
            current = self.lookup_class(sup)?;
        }
        Ok(chain)
    }

    /// Nearest common superclass of two classes. Interfaces have `java/lang/Object`
    /// as common superclass with anything they are not related to.
    fn common_superclass(&self, a: &str, b: &str) -> Result<String, LookupFailure> {
        if a == b {
            return Ok(a.to_string());
        }
        if self.is_subtype(a, b)? {
            return Ok(b.to_string());
        }
        if self.is_subtype(b, a)? {
            return Ok(a.to_string());
        }
        if self.lookup_class(a)?.is_interface || self.lookup_class(b)?.is_interface {
            return Ok(JAVA_LANG_OBJECT.to_string());
        }
        let chain_a = self.superclass_chain(a)?;
        for c in self.superclass_chain(b)? {
            if chain_a.contains(&c) {
                return Ok(c);
            }
        }
        Ok(JAVA_LANG_OBJECT.to_string())
    }

    /// Finds the declaration of a method in a class or in its supertypes.
    fn method_decl(
        &self,
        class: &str,
        name: &str,
        descriptor: &MethodDescriptor,
    ) -> Result<Option<&MethodDecl>, LookupFailure> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![class.to_string()];
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            let decl = self.lookup_class(&current)?;
            if let Some(method) = decl.get_method(name, descriptor) {
                return Ok(Some(method));
            }
            // superclass is popped first
            stack.extend(decl.interfaces.iter().rev().cloned());
            stack.extend(decl.superclass.iter().cloned());
        }
        Ok(None)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Inheritance {
    Extends,
    Implements,
}

impl fmt::Display for Inheritance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Extends => write!(f, "<extends>"),
            Self::Implements => write!(f, "<implements>"),
        }
    }
}

/// The class hierarchy of a program, seeded with the few `java.lang` classes the
/// analyses rely on.
#[derive(Debug)]
pub struct Hierarchy {
    inner: DiGraph<ClassDecl, Inheritance>,
    node_ids: BTreeMap<String, NodeIndex>,
}

impl Default for Hierarchy {
    fn default() -> Self {
        Self::new()
    }
}

impl Hierarchy {
    /// Builds a hierarchy containing only the system classes.
    #[must_use]
    pub fn new() -> Self {
        let mut hierarchy = Self {
            inner: DiGraph::new(),
            node_ids: BTreeMap::new(),
        };
        for (name, superclass, is_interface) in SYSTEM_CLASSES {
            let mut decl = ClassDecl::new(name);
            decl.superclass = superclass.map(str::to_string);
            decl.is_interface = *is_interface;
            hierarchy.insert_class(decl);
        }
        hierarchy.link();
        hierarchy
    }

    #[must_use]
    pub fn from_program(program: &Program) -> Self {
        Self::from_programs([program])
    }

    /// Builds the hierarchy of several programs, later declarations replacing
    /// earlier ones.
    #[must_use]
    pub fn from_programs<'p>(programs: impl IntoIterator<Item = &'p Program>) -> Self {
        let mut hierarchy = Self::new();
        for class in programs.into_iter().flat_map(Program::iter_classes) {
            hierarchy.insert_class(class.clone());
        }
        hierarchy.close();
        hierarchy.link();
        log::debug!("hierarchy built with {} classes", hierarchy.inner.node_count());
        hierarchy
    }

    /// Inserts a class, replacing any previous declaration of the same name.
    pub fn insert_class(&mut self, class: ClassDecl) {
        if let Some(id) = self.node_ids.get(&class.name) {
            self.inner[*id] = class;
        } else {
            let class_name = class.name.clone();
            let id = self.inner.add_node(class);
            self.node_ids.insert(class_name, id);
        }
    }

    #[must_use]
    pub fn contains_class(&self, class_name: &str) -> bool {
        self.node_ids.contains_key(class_name)
    }

    pub fn iter_classes(&self) -> impl Iterator<Item = &ClassDecl> {
        self.inner.node_weights()
    }

    // Classes without superclass inherit from java/lang/Object.
    fn close(&mut self) {
        let orphans: Vec<NodeIndex> = self
            .inner
            .node_indices()
            .filter(|id| {
                let class = &self.inner[*id];
                class.superclass.is_none() && class.name != JAVA_LANG_OBJECT
            })
            .collect();
        for id in orphans {
            log::warn!(
                "add missing java.lang.Object inheritance to {}",
                self.inner[id].name
            );
            self.inner[id].superclass = Some(JAVA_LANG_OBJECT.to_string());
        }
    }

    // (Re)builds inheritance links between known classes.
    fn link(&mut self) {
        self.inner.clear_edges();
        let mut links = Vec::new();
        for id in self.inner.node_indices() {
            let class = &self.inner[id];
            if let Some(sup) = &class.superclass {
                if let Some(dst) = self.node_ids.get(sup) {
                    links.push((id, *dst, Inheritance::Extends));
                }
            }
            for itf in &class.interfaces {
                if let Some(dst) = self.node_ids.get(itf) {
                    links.push((id, *dst, Inheritance::Implements));
                }
            }
        }
        for (src, dst, link) in links {
            self.inner.add_edge(src, dst, link);
        }
    }

    /// All the transitive supertypes of a class, the class itself included.
    ///
    /// # Errors
    ///
    /// Returns a [`LookupFailure`] naming the first unknown class met during traversal.
    pub fn all_parents(&self, class_name: &str) -> Result<BTreeSet<String>, LookupFailure> {
        let id = self
            .node_ids
            .get(class_name)
            .ok_or_else(|| LookupFailure::new(class_name))?;
        let mut parents = BTreeSet::new();
        let mut dfs = Dfs::new(&self.inner, *id);
        while let Some(id) = dfs.next(&self.inner) {
            let class = &self.inner[id];
            for sup in class.superclass.iter().chain(class.interfaces.iter()) {
                if !self.node_ids.contains_key(sup) {
                    return Err(LookupFailure::new(sup));
                }
            }
            parents.insert(class.name.clone());
        }
        Ok(parents)
    }
}

impl ClassResolver for Hierarchy {
    fn lookup_class(&self, name: &str) -> Result<&ClassDecl, LookupFailure> {
        self.node_ids
            .get(name)
            .map(|id| &self.inner[*id])
            .ok_or_else(|| LookupFailure::new(name))
    }

    fn is_subtype(&self, sub: &str, sup: &str) -> Result<bool, LookupFailure> {
        if sub == sup || sup == JAVA_LANG_OBJECT {
            return Ok(true);
        }
        Ok(self.all_parents(sub)?.contains(sup))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryFrom;

    const CLASSES: &str = r#"
class java/io/IOException extends java/lang/Exception
class java/io/FileNotFoundException extends java/io/IOException
interface Shape
class Square extends Rect implements Shape
  declares area()I throws java/io/IOException
end
class Rect
  declares perimeter()I
end
class Circle implements Shape
class Broken extends Missing
"#;

    fn hierarchy() -> Hierarchy {
        Hierarchy::from_program(&jf_bytecode::parse(CLASSES).unwrap())
    }

    #[test]
    fn subtyping() {
        let h = hierarchy();
        assert!(h
            .is_subtype("java/io/FileNotFoundException", "java/lang/Throwable")
            .unwrap());
        assert!(!h
            .is_subtype("java/io/IOException", "java/lang/RuntimeException")
            .unwrap());
        assert!(h.is_subtype("Square", "Shape").unwrap());
        assert!(h.is_subtype("Square", JAVA_LANG_OBJECT).unwrap());
        assert!(!h.is_subtype("Circle", "Rect").unwrap());
        assert_eq!(
            h.is_subtype("Broken", "Rect"),
            Err(LookupFailure::new("Missing"))
        );
    }

    #[test]
    fn common_superclasses() {
        let h = hierarchy();
        assert_eq!(
            h.common_superclass("java/io/FileNotFoundException", "java/lang/ArithmeticException")
                .unwrap(),
            "java/lang/Exception"
        );
        assert_eq!(h.common_superclass("Square", "Rect").unwrap(), "Rect");
        assert_eq!(h.common_superclass("Square", "Circle").unwrap(), JAVA_LANG_OBJECT);
        assert!(h.common_superclass("Broken", "Rect").is_err());
    }

    #[test]
    fn inherited_method_declarations() {
        let h = hierarchy();
        let descr = MethodDescriptor::try_from("()I").unwrap();
        let decl = h.method_decl("Square", "perimeter", &descr).unwrap().unwrap();
        assert_eq!(decl.name, "perimeter");
        let decl = h.method_decl("Square", "area", &descr).unwrap().unwrap();
        assert_eq!(decl.exceptions, vec!["java/io/IOException"]);
        assert!(h.method_decl("Circle", "area", &descr).unwrap().is_none());
    }
}
