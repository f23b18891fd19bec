//! Exception sets thrown by exception thrower blocks, and their refinement along
//! the outgoing exception edges.

use crate::block::BasicBlock;
use crate::cfg::{BlockId, Cfg, EdgeId};
use crate::edge::EdgeKind;
use crate::frame::Frame;
use crate::hierarchy::{
    ClassResolver, LookupFailure, LookupFailureCallback, JAVA_LANG_ERROR,
    JAVA_LANG_RUNTIME_EXCEPTION, JAVA_LANG_THROWABLE,
};
use crate::typing::types::JvmType;
use jf_bytecode::instrs::{Instr, LabeledInstr};
use jf_bytecode::Addr;
use std::collections::BTreeMap;
use std::fmt;

const NULL_POINTER_EXCEPTION: &str = "java/lang/NullPointerException";

/// Set of exception classes, each one flagged as explicit (thrown by an `athrow`
/// or declared by a callee) or implicit (raised by the JVM).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExceptionSet {
    types: BTreeMap<String, bool>,
}

impl ExceptionSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a class. A class added both explicitly and implicitly is explicit.
    pub fn add(&mut self, class: &str, explicit: bool) {
        let entry = self.types.entry(class.to_string()).or_insert(false);
        *entry |= explicit;
    }

    pub fn remove(&mut self, class: &str) {
        self.types.remove(class);
    }

    pub fn union_with(&mut self, other: &Self) {
        for (class, explicit) in other.iter() {
            self.add(class, explicit);
        }
    }

    pub fn clear(&mut self) {
        self.types.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    #[must_use]
    pub fn contains(&self, class: &str) -> bool {
        self.types.contains_key(class)
    }

    #[must_use]
    pub fn is_explicit(&self, class: &str) -> bool {
        self.types.get(class).copied().unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.types.iter().map(|(c, e)| (c.as_str(), *e))
    }

    #[must_use]
    pub fn has_explicit(&self) -> bool {
        self.types.values().any(|e| *e)
    }

    /// Returns `true` if some class of the set is a checked exception, i.e. neither
    /// a `RuntimeException` nor an `Error`.
    ///
    /// # Errors
    ///
    /// Fails on the first class whose hierarchy cannot be resolved.
    pub fn has_checked(&self, resolver: &dyn ClassResolver) -> Result<bool, LookupFailure> {
        for class in self.types.keys() {
            if !resolver.is_subtype(class, JAVA_LANG_RUNTIME_EXCEPTION)?
                && !resolver.is_subtype(class, JAVA_LANG_ERROR)?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Nearest common superclass of all the classes of the set, `java/lang/Throwable`
    /// for an empty set or when the hierarchy cannot be resolved.
    #[must_use]
    pub fn common_superclass(
        &self,
        resolver: &dyn ClassResolver,
        callback: &dyn LookupFailureCallback,
    ) -> String {
        let mut classes = self.types.keys();
        let Some(first) = classes.next() else {
            return JAVA_LANG_THROWABLE.to_string();
        };
        let mut common = first.clone();
        for class in classes {
            match resolver.common_superclass(&common, class) {
                Ok(c) => common = c,
                Err(failure) => {
                    callback.report(&failure);
                    return JAVA_LANG_THROWABLE.to_string();
                }
            }
        }
        common
    }
}

impl fmt::Display for ExceptionSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (class, explicit)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{class}")?;
            if explicit {
                write!(f, "!")?;
            }
        }
        write!(f, "}}")
    }
}

/// Exceptions of an exception thrower block, stamped with the generation of the
/// block result fact they were computed from.
#[derive(Debug, Clone)]
pub struct CachedExceptionSet {
    pub(crate) generation: u64,
    thrown: ExceptionSet,
    edge_sets: BTreeMap<EdgeId, ExceptionSet>,
}

impl CachedExceptionSet {
    pub(crate) fn compute(
        cfg: &Cfg,
        etb: BlockId,
        frame: &Frame<JvmType>,
        generation: u64,
        resolver: &dyn ClassResolver,
        callback: &dyn LookupFailureCallback,
    ) -> Option<Self> {
        let thrower = cfg.block(etb).exception_thrower()?;
        let thrown = thrown_exceptions(thrower, frame, resolver, callback);
        let edge_sets = refine_on_edges(cfg, etb, thrower.addr(), &thrown, resolver, callback);
        Some(Self {
            generation,
            thrown,
            edge_sets,
        })
    }

    /// All the exceptions the thrower instruction may raise.
    #[inline]
    #[must_use]
    pub const fn thrown(&self) -> &ExceptionSet {
        &self.thrown
    }

    /// Exceptions flowing along an outgoing exception edge.
    #[must_use]
    pub fn edge_set(&self, edge: EdgeId) -> Option<&ExceptionSet> {
        self.edge_sets.get(&edge)
    }
}

fn implicit_exceptions(instr: &Instr) -> &'static [&'static str] {
    match instr {
        Instr::Iaload
        | Instr::Laload
        | Instr::Faload
        | Instr::Daload
        | Instr::Aaload
        | Instr::Baload
        | Instr::Caload
        | Instr::Saload
        | Instr::Iastore
        | Instr::Lastore
        | Instr::Fastore
        | Instr::Dastore
        | Instr::Bastore
        | Instr::Castore
        | Instr::Sastore => &[
            NULL_POINTER_EXCEPTION,
            "java/lang/ArrayIndexOutOfBoundsException",
        ],
        Instr::Aastore => &[
            NULL_POINTER_EXCEPTION,
            "java/lang/ArrayIndexOutOfBoundsException",
            "java/lang/ArrayStoreException",
        ],
        Instr::Idiv | Instr::Irem | Instr::Ldiv | Instr::Lrem => &["java/lang/ArithmeticException"],
        Instr::GetField(_) | Instr::PutField(_) | Instr::ArrayLength | Instr::MonitorEnter => {
            &[NULL_POINTER_EXCEPTION]
        }
        Instr::MonitorExit => &[
            NULL_POINTER_EXCEPTION,
            "java/lang/IllegalMonitorStateException",
        ],
        Instr::NewArray(_) | Instr::MultiANewArray(_, _) => &["java/lang/NegativeArraySizeException"],
        Instr::CheckCast(_) => &["java/lang/ClassCastException"],
        _ => &[],
    }
}

/// Exceptions raised by a thrower instruction, given the frame before it.
pub(crate) fn thrown_exceptions(
    thrower: &LabeledInstr,
    frame: &Frame<JvmType>,
    resolver: &dyn ClassResolver,
    callback: &dyn LookupFailureCallback,
) -> ExceptionSet {
    let mut set = ExceptionSet::new();
    match thrower.instr() {
        Instr::Athrow => match frame.top_value() {
            Ok(JvmType::Object(class)) => set.add(class, true),
            Ok(JvmType::Exception(rethrown)) => {
                for (class, _) in rethrown.iter() {
                    set.add(class, true);
                }
            }
            Ok(JvmType::Null) => set.add(NULL_POINTER_EXCEPTION, false),
            _ => set.add(JAVA_LANG_THROWABLE, true),
        },
        instr => {
            if let Some(mref) = instr.invoked_method() {
                match resolver.method_decl(&mref.class, &mref.name, &mref.descriptor) {
                    Ok(decl) => {
                        for class in decl.iter().flat_map(|d| d.exceptions.iter()) {
                            set.add(class, true);
                        }
                        set.add(JAVA_LANG_RUNTIME_EXCEPTION, false);
                        set.add(JAVA_LANG_ERROR, false);
                    }
                    Err(failure) => {
                        callback.report(&failure);
                        set.add(JAVA_LANG_THROWABLE, false);
                    }
                }
            }
            for class in implicit_exceptions(instr) {
                set.add(class, false);
            }
        }
    }
    set
}

// Address a block is entered at: its thrower for an exception thrower block.
fn entry_addr(block: &BasicBlock) -> Option<Addr> {
    block
        .exception_thrower()
        .map(LabeledInstr::addr)
        .or_else(|| block.start_addr())
}

/// Splits the thrown exceptions among the outgoing exception edges, following
/// the handlers covering the thrower in priority order. Exceptions that are
/// definitely caught by a handler do not reach the next ones. A handler catching
/// a subclass of a thrown class may catch it: it receives its catch type, and the
/// thrown class keeps flowing to the next handlers.
pub(crate) fn refine_on_edges(
    cfg: &Cfg,
    etb: BlockId,
    thrower_addr: Addr,
    thrown: &ExceptionSet,
    resolver: &dyn ClassResolver,
    callback: &dyn LookupFailureCallback,
) -> BTreeMap<EdgeId, ExceptionSet> {
    let mut remaining = thrown.clone();
    let mut edge_sets = BTreeMap::new();
    let handled: Vec<(EdgeId, Option<Addr>)> = cfg
        .outgoing_edges(etb)
        .into_iter()
        .filter(|e| cfg.edge(*e).kind() == EdgeKind::HandledException)
        .map(|e| (e, entry_addr(cfg.block(cfg.target(e)))))
        .collect();

    for handler in cfg.code().handlers_covering(thrower_addr) {
        let edge = handled
            .iter()
            .find(|(_, addr)| *addr == Some(handler.handler_addr()))
            .map(|(e, _)| *e);
        let Some(catch) = handler.catch_type() else {
            if let Some(edge) = edge {
                edge_sets
                    .entry(edge)
                    .or_insert_with(ExceptionSet::new)
                    .union_with(&remaining);
            }
            remaining.clear();
            break;
        };
        let mut caught = ExceptionSet::new();
        for (class, explicit) in remaining.clone().iter() {
            match resolver.is_subtype(class, catch) {
                Ok(true) => {
                    caught.add(class, explicit);
                    remaining.remove(class);
                }
                Ok(false) => match resolver.is_subtype(catch, class) {
                    Ok(true) => caught.add(catch, explicit),
                    Ok(false) => (),
                    Err(failure) => {
                        callback.report(&failure);
                        caught.add(catch, explicit);
                    }
                },
                Err(failure) => {
                    callback.report(&failure);
                    caught.add(catch, explicit);
                }
            }
        }
        if let Some(edge) = edge {
            edge_sets
                .entry(edge)
                .or_insert_with(ExceptionSet::new)
                .union_with(&caught);
        }
    }

    for edge in cfg.outgoing_edges(etb) {
        if cfg.edge(edge).kind() == EdgeKind::UnhandledException {
            edge_sets.insert(edge, remaining.clone());
        }
    }
    edge_sets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{Hierarchy, LogLookupFailures};
    use crate::testing::{cfg_of, program};

    #[test]
    fn explicit_wins_and_checked_exceptions() {
        let p = program("class java/io/IOException extends java/lang/Exception\nend\n");
        let h = Hierarchy::from_program(&p);
        let mut set = ExceptionSet::new();
        set.add("java/lang/ArithmeticException", false);
        set.add("java/lang/ArithmeticException", true);
        assert!(set.is_explicit("java/lang/ArithmeticException"));
        assert!(!set.has_checked(&h).unwrap());

        set.add("java/io/IOException", false);
        assert!(set.has_checked(&h).unwrap());
        assert_eq!(set.common_superclass(&h, &LogLookupFailures), "java/lang/Exception");
        assert_eq!(
            set.to_string(),
            "{java/io/IOException, java/lang/ArithmeticException!}"
        );

        set.add("Unknown", true);
        assert!(set.has_checked(&h).is_err());
    }

    #[test]
    fn handlers_split_thrown_exceptions() {
        let p = program(
            r#"
class java/io/IOException extends java/lang/Exception
end
class java/io/FileNotFoundException extends java/io/IOException
end
class Foo
  declares open()V throws java/io/IOException
end
method Foo.f()V static
  0: invokestatic Foo.open()V
  1: return
  2: pop
  3: return
  4: pop
  5: return
  try 0 1 2 java/io/FileNotFoundException
  try 0 1 4 java/io/IOException
end
"#,
        );
        let h = Hierarchy::from_program(&p);
        let cfg = cfg_of(&p, "Foo.f()V");
        let call = cfg.block_containing(Addr(0))[0];
        let etb = cfg.exception_thrower_block_of(call).unwrap();
        let frame = Frame::valid(0, JvmType::Bottom);
        let sets = CachedExceptionSet::compute(&cfg, etb, &frame, 0, &h, &LogLookupFailures).unwrap();
        assert!(sets.thrown().is_explicit("java/io/IOException"));
        assert!(sets.thrown().contains(JAVA_LANG_ERROR));

        let first = cfg.block_containing(Addr(2))[0];
        let second = cfg.block_containing(Addr(4))[0];
        let to_first = cfg.lookup_edge(etb, first).unwrap();
        let to_second = cfg.lookup_edge(etb, second).unwrap();
        let to_exit = cfg.lookup_edge(etb, cfg.exit()).unwrap();

        // IOException may be a FileNotFoundException
        let first_set = sets.edge_set(to_first).unwrap();
        assert_eq!(first_set.len(), 1);
        assert!(first_set.is_explicit("java/io/FileNotFoundException"));
        let second_set = sets.edge_set(to_second).unwrap();
        assert_eq!(second_set.len(), 1);
        assert!(second_set.contains("java/io/IOException"));
        let unhandled = sets.edge_set(to_exit).unwrap();
        assert!(!unhandled.contains("java/io/IOException"));
        assert!(unhandled.contains(JAVA_LANG_RUNTIME_EXCEPTION));
        assert!(unhandled.contains(JAVA_LANG_ERROR));
    }
}
