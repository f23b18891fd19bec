//! JVM bytecode instructions definitions.

use crate::types::{FieldRef, MethodRef, Type};
use crate::Addr;
use instruction_derive::Instruction;
use std::fmt;

pub trait Instruction {
    fn mnemonic(&self) -> &str;
    /// Number of operand stack slots consumed.
    fn pops(&self) -> usize;
    /// Number of operand stack slots produced.
    fn pushes(&self) -> usize;
    fn can_throw(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabeledInstr {
    pub(crate) addr: Addr,
    pub(crate) instr: Instr,
}

impl Instruction for LabeledInstr {
    #[inline]
    fn mnemonic(&self) -> &str {
        self.instr.mnemonic()
    }

    #[inline]
    fn pops(&self) -> usize {
        self.instr.pops()
    }

    #[inline]
    fn pushes(&self) -> usize {
        self.instr.pushes()
    }

    #[inline]
    fn can_throw(&self) -> bool {
        self.instr.can_throw()
    }
}

impl LabeledInstr {
    #[must_use]
    pub const fn new(addr: Addr, instr: Instr) -> Self {
        Self { addr, instr }
    }

    #[inline]
    #[must_use]
    pub const fn addr(&self) -> Addr {
        self.addr
    }

    #[inline]
    #[must_use]
    pub const fn instr(&self) -> &Instr {
        &self.instr
    }
}

impl fmt::Display for LabeledInstr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:5}: {}", self.addr, self.instr)
    }
}

#[derive(Debug, Clone, PartialEq, Instruction)]
pub enum Instr {
    /// Do nothing.
    #[instruction(mnemonic = "nop")]
    Nop,

    /// Push the `null` reference.
    #[instruction(mnemonic = "aconst_null", pushes = "1")]
    AconstNull,

    /// Push an int constant.
    #[instruction(mnemonic = "iconst", pushes = "1")]
    Iconst(i32),

    /// Push a long constant.
    #[instruction(mnemonic = "lconst", pushes = "2")]
    Lconst(i64),

    /// Push a float constant.
    #[instruction(mnemonic = "fconst", pushes = "1")]
    Fconst(f32),

    /// Push a double constant.
    #[instruction(mnemonic = "dconst", pushes = "2")]
    Dconst(f64),

    /// Push a string constant from the constant pool.
    #[instruction(mnemonic = "ldc", pushes = "1")]
    Ldc(String),

    /// Push a class literal from the constant pool.
    #[instruction(mnemonic = "ldc_class", pushes = "1")]
    LdcClass(Type),

    /// Load int from local variable.
    #[instruction(mnemonic = "iload", pushes = "1")]
    Iload(u16),

    /// Load long from local variable.
    #[instruction(mnemonic = "lload", pushes = "2")]
    Lload(u16),

    /// Load float from local variable.
    #[instruction(mnemonic = "fload", pushes = "1")]
    Fload(u16),

    /// Load double from local variable.
    #[instruction(mnemonic = "dload", pushes = "2")]
    Dload(u16),

    /// Load reference from local variable.
    #[instruction(mnemonic = "aload", pushes = "1")]
    Aload(u16),

    /// Store int into local variable.
    #[instruction(mnemonic = "istore", pops = "1")]
    Istore(u16),

    /// Store long into local variable.
    #[instruction(mnemonic = "lstore", pops = "2")]
    Lstore(u16),

    /// Store float into local variable.
    #[instruction(mnemonic = "fstore", pops = "1")]
    Fstore(u16),

    /// Store double into local variable.
    #[instruction(mnemonic = "dstore", pops = "2")]
    Dstore(u16),

    /// Store reference into local variable.
    #[instruction(mnemonic = "astore", pops = "1")]
    Astore(u16),

    /// Increment local variable by constant.
    #[instruction(mnemonic = "iinc")]
    Iinc(u16, i32),

    /// Load int from array.
    #[instruction(mnemonic = "iaload", pops = "2", pushes = "1", can_throw)]
    Iaload,

    /// Load long from array.
    #[instruction(mnemonic = "laload", pops = "2", pushes = "2", can_throw)]
    Laload,

    /// Load float from array.
    #[instruction(mnemonic = "faload", pops = "2", pushes = "1", can_throw)]
    Faload,

    /// Load double from array.
    #[instruction(mnemonic = "daload", pops = "2", pushes = "2", can_throw)]
    Daload,

    /// Load reference from array.
    #[instruction(mnemonic = "aaload", pops = "2", pushes = "1", can_throw)]
    Aaload,

    /// Load byte or boolean from array.
    #[instruction(mnemonic = "baload", pops = "2", pushes = "1", can_throw)]
    Baload,

    /// Load char from array.
    #[instruction(mnemonic = "caload", pops = "2", pushes = "1", can_throw)]
    Caload,

    /// Load short from array.
    #[instruction(mnemonic = "saload", pops = "2", pushes = "1", can_throw)]
    Saload,

    /// Store into int array.
    #[instruction(mnemonic = "iastore", pops = "3", can_throw)]
    Iastore,

    /// Store into long array.
    #[instruction(mnemonic = "lastore", pops = "4", can_throw)]
    Lastore,

    /// Store into float array.
    #[instruction(mnemonic = "fastore", pops = "3", can_throw)]
    Fastore,

    /// Store into double array.
    #[instruction(mnemonic = "dastore", pops = "4", can_throw)]
    Dastore,

    /// Store into reference array.
    #[instruction(mnemonic = "aastore", pops = "3", can_throw)]
    Aastore,

    /// Store into byte or boolean array.
    #[instruction(mnemonic = "bastore", pops = "3", can_throw)]
    Bastore,

    /// Store into char array.
    #[instruction(mnemonic = "castore", pops = "3", can_throw)]
    Castore,

    /// Store into short array.
    #[instruction(mnemonic = "sastore", pops = "3", can_throw)]
    Sastore,

    /// Pop the top operand stack slot.
    #[instruction(mnemonic = "pop", pops = "1")]
    Pop,

    /// Pop the top two operand stack slots.
    #[instruction(mnemonic = "pop2", pops = "2")]
    Pop2,

    /// Duplicate the top operand stack slot.
    #[instruction(mnemonic = "dup", pops = "1", pushes = "2")]
    Dup,

    /// Duplicate the top operand stack slot and insert it two slots down.
    #[instruction(mnemonic = "dup_x1", pops = "2", pushes = "3")]
    DupX1,

    /// Duplicate the top two operand stack slots.
    #[instruction(mnemonic = "dup2", pops = "2", pushes = "4")]
    Dup2,

    /// Swap the top two operand stack slots.
    #[instruction(mnemonic = "swap", pops = "2", pushes = "2")]
    Swap,

    /// Add int.
    #[instruction(mnemonic = "iadd", pops = "2", pushes = "1")]
    Iadd,

    /// Subtract int.
    #[instruction(mnemonic = "isub", pops = "2", pushes = "1")]
    Isub,

    /// Multiply int.
    #[instruction(mnemonic = "imul", pops = "2", pushes = "1")]
    Imul,

    /// Divide int.
    #[instruction(mnemonic = "idiv", pops = "2", pushes = "1", can_throw)]
    Idiv,

    /// Remainder int.
    #[instruction(mnemonic = "irem", pops = "2", pushes = "1", can_throw)]
    Irem,

    /// Negate int.
    #[instruction(mnemonic = "ineg", pops = "1", pushes = "1")]
    Ineg,

    /// Shift left int.
    #[instruction(mnemonic = "ishl", pops = "2", pushes = "1")]
    Ishl,

    /// Arithmetic shift right int.
    #[instruction(mnemonic = "ishr", pops = "2", pushes = "1")]
    Ishr,

    /// Boolean AND int.
    #[instruction(mnemonic = "iand", pops = "2", pushes = "1")]
    Iand,

    /// Boolean OR int.
    #[instruction(mnemonic = "ior", pops = "2", pushes = "1")]
    Ior,

    /// Boolean XOR int.
    #[instruction(mnemonic = "ixor", pops = "2", pushes = "1")]
    Ixor,

    /// Add long.
    #[instruction(mnemonic = "ladd", pops = "4", pushes = "2")]
    Ladd,

    /// Subtract long.
    #[instruction(mnemonic = "lsub", pops = "4", pushes = "2")]
    Lsub,

    /// Multiply long.
    #[instruction(mnemonic = "lmul", pops = "4", pushes = "2")]
    Lmul,

    /// Divide long.
    #[instruction(mnemonic = "ldiv", pops = "4", pushes = "2", can_throw)]
    Ldiv,

    /// Remainder long.
    #[instruction(mnemonic = "lrem", pops = "4", pushes = "2", can_throw)]
    Lrem,

    /// Add float.
    #[instruction(mnemonic = "fadd", pops = "2", pushes = "1")]
    Fadd,

    /// Multiply float.
    #[instruction(mnemonic = "fmul", pops = "2", pushes = "1")]
    Fmul,

    /// Add double.
    #[instruction(mnemonic = "dadd", pops = "4", pushes = "2")]
    Dadd,

    /// Multiply double.
    #[instruction(mnemonic = "dmul", pops = "4", pushes = "2")]
    Dmul,

    /// Convert int to long.
    #[instruction(mnemonic = "i2l", pops = "1", pushes = "2")]
    I2l,

    /// Convert int to float.
    #[instruction(mnemonic = "i2f", pops = "1", pushes = "1")]
    I2f,

    /// Convert int to double.
    #[instruction(mnemonic = "i2d", pops = "1", pushes = "2")]
    I2d,

    /// Convert long to int.
    #[instruction(mnemonic = "l2i", pops = "2", pushes = "1")]
    L2i,

    /// Convert float to int.
    #[instruction(mnemonic = "f2i", pops = "1", pushes = "1")]
    F2i,

    /// Convert double to int.
    #[instruction(mnemonic = "d2i", pops = "2", pushes = "1")]
    D2i,

    /// Convert int to byte.
    #[instruction(mnemonic = "i2b", pops = "1", pushes = "1")]
    I2b,

    /// Convert int to char.
    #[instruction(mnemonic = "i2c", pops = "1", pushes = "1")]
    I2c,

    /// Convert int to short.
    #[instruction(mnemonic = "i2s", pops = "1", pushes = "1")]
    I2s,

    /// Compare long.
    #[instruction(mnemonic = "lcmp", pops = "4", pushes = "1")]
    Lcmp,

    /// Compare float.
    #[instruction(mnemonic = "fcmpl", pops = "2", pushes = "1")]
    Fcmpl,

    /// Compare double.
    #[instruction(mnemonic = "dcmpl", pops = "4", pushes = "1")]
    Dcmpl,

    /// Branch if int is zero.
    #[instruction(mnemonic = "ifeq", pops = "1")]
    IfEq(Addr),

    /// Branch if int is not zero.
    #[instruction(mnemonic = "ifne", pops = "1")]
    IfNe(Addr),

    /// Branch if int is negative.
    #[instruction(mnemonic = "iflt", pops = "1")]
    IfLt(Addr),

    /// Branch if int is positive or zero.
    #[instruction(mnemonic = "ifge", pops = "1")]
    IfGe(Addr),

    /// Branch if int is positive.
    #[instruction(mnemonic = "ifgt", pops = "1")]
    IfGt(Addr),

    /// Branch if int is negative or zero.
    #[instruction(mnemonic = "ifle", pops = "1")]
    IfLe(Addr),

    /// Branch if ints are equal.
    #[instruction(mnemonic = "if_icmpeq", pops = "2")]
    IfIcmpEq(Addr),

    /// Branch if ints are not equal.
    #[instruction(mnemonic = "if_icmpne", pops = "2")]
    IfIcmpNe(Addr),

    /// Branch if first int is lower.
    #[instruction(mnemonic = "if_icmplt", pops = "2")]
    IfIcmpLt(Addr),

    /// Branch if first int is greater or equal.
    #[instruction(mnemonic = "if_icmpge", pops = "2")]
    IfIcmpGe(Addr),

    /// Branch if first int is greater.
    #[instruction(mnemonic = "if_icmpgt", pops = "2")]
    IfIcmpGt(Addr),

    /// Branch if first int is lower or equal.
    #[instruction(mnemonic = "if_icmple", pops = "2")]
    IfIcmpLe(Addr),

    /// Branch if references are equal.
    #[instruction(mnemonic = "if_acmpeq", pops = "2")]
    IfAcmpEq(Addr),

    /// Branch if references are not equal.
    #[instruction(mnemonic = "if_acmpne", pops = "2")]
    IfAcmpNe(Addr),

    /// Branch if reference is null.
    #[instruction(mnemonic = "ifnull", pops = "1")]
    IfNull(Addr),

    /// Branch if reference is not null.
    #[instruction(mnemonic = "ifnonnull", pops = "1")]
    IfNonNull(Addr),

    /// Branch always.
    #[instruction(mnemonic = "goto")]
    Goto(Addr),

    /// Jump to subroutine, pushing the return address.
    #[instruction(mnemonic = "jsr", pushes = "1")]
    Jsr(Addr),

    /// Return from subroutine, the return address being stored in a local variable.
    #[instruction(mnemonic = "ret")]
    Ret(u16),

    /// Access jump table by index (low key, targets, default target).
    #[instruction(mnemonic = "tableswitch", pops = "1")]
    TableSwitch(i32, Vec<Addr>, Addr),

    /// Access jump table by key match (key/target pairs, default target).
    #[instruction(mnemonic = "lookupswitch", pops = "1")]
    LookupSwitch(Vec<(i32, Addr)>, Addr),

    /// Return int from method.
    #[instruction(mnemonic = "ireturn", pops = "1")]
    Ireturn,

    /// Return long from method.
    #[instruction(mnemonic = "lreturn", pops = "2")]
    Lreturn,

    /// Return float from method.
    #[instruction(mnemonic = "freturn", pops = "1")]
    Freturn,

    /// Return double from method.
    #[instruction(mnemonic = "dreturn", pops = "2")]
    Dreturn,

    /// Return reference from method.
    #[instruction(mnemonic = "areturn", pops = "1")]
    Areturn,

    /// Return void from method.
    #[instruction(mnemonic = "return")]
    Return,

    /// Get static field from class.
    #[instruction(mnemonic = "getstatic", pushes = "_0.slots()")]
    GetStatic(FieldRef),

    /// Set static field in class.
    #[instruction(mnemonic = "putstatic", pops = "_0.slots()")]
    PutStatic(FieldRef),

    /// Fetch field from object.
    #[instruction(mnemonic = "getfield", pops = "1", pushes = "_0.slots()", can_throw)]
    GetField(FieldRef),

    /// Set field in object.
    #[instruction(mnemonic = "putfield", pops = "_0.slots() + 1", can_throw)]
    PutField(FieldRef),

    /// Invoke instance method, dispatch based on class.
    #[instruction(
        mnemonic = "invokevirtual",
        pops = "_0.arg_slots() + 1",
        pushes = "_0.ret_slots()",
        can_throw
    )]
    InvokeVirtual(MethodRef),

    /// Invoke instance method, direct dispatch.
    #[instruction(
        mnemonic = "invokespecial",
        pops = "_0.arg_slots() + 1",
        pushes = "_0.ret_slots()",
        can_throw
    )]
    InvokeSpecial(MethodRef),

    /// Invoke a class (static) method.
    #[instruction(
        mnemonic = "invokestatic",
        pops = "_0.arg_slots()",
        pushes = "_0.ret_slots()",
        can_throw
    )]
    InvokeStatic(MethodRef),

    /// Invoke interface method.
    #[instruction(
        mnemonic = "invokeinterface",
        pops = "_0.arg_slots() + 1",
        pushes = "_0.ret_slots()",
        can_throw
    )]
    InvokeInterface(MethodRef),

    /// Create new object.
    #[instruction(mnemonic = "new", pushes = "1")]
    New(String),

    /// Create new array whose elements have the given type.
    #[instruction(mnemonic = "newarray", pops = "1", pushes = "1", can_throw)]
    NewArray(Type),

    /// Create new multidimensional array of the given array type.
    #[instruction(
        mnemonic = "multianewarray",
        pops = "usize::from(*_1)",
        pushes = "1",
        can_throw
    )]
    MultiANewArray(Type, u8),

    /// Get length of array.
    #[instruction(mnemonic = "arraylength", pops = "1", pushes = "1", can_throw)]
    ArrayLength,

    /// Throw exception or error.
    #[instruction(mnemonic = "athrow", pops = "1", can_throw)]
    Athrow,

    /// Check whether object is of given type.
    #[instruction(mnemonic = "checkcast", pops = "1", pushes = "1", can_throw)]
    CheckCast(Type),

    /// Determine if object is of given type.
    #[instruction(mnemonic = "instanceof", pops = "1", pushes = "1")]
    InstanceOf(Type),

    /// Enter monitor for object.
    #[instruction(mnemonic = "monitorenter", pops = "1", can_throw)]
    MonitorEnter,

    /// Exit monitor for object.
    #[instruction(mnemonic = "monitorexit", pops = "1", can_throw)]
    MonitorExit,
}

impl Instr {
    /// Explicit branch targets of the instruction (fall-through excluded).
    #[must_use]
    pub fn branch_targets(&self) -> Vec<Addr> {
        match self {
            Self::IfEq(a)
            | Self::IfNe(a)
            | Self::IfLt(a)
            | Self::IfGe(a)
            | Self::IfGt(a)
            | Self::IfLe(a)
            | Self::IfIcmpEq(a)
            | Self::IfIcmpNe(a)
            | Self::IfIcmpLt(a)
            | Self::IfIcmpGe(a)
            | Self::IfIcmpGt(a)
            | Self::IfIcmpLe(a)
            | Self::IfAcmpEq(a)
            | Self::IfAcmpNe(a)
            | Self::IfNull(a)
            | Self::IfNonNull(a)
            | Self::Goto(a)
            | Self::Jsr(a) => vec![*a],
            Self::TableSwitch(_, targets, default) => {
                let mut v = targets.clone();
                v.push(*default);
                v
            }
            Self::LookupSwitch(pairs, default) => {
                let mut v: Vec<Addr> = pairs.iter().map(|(_, a)| *a).collect();
                v.push(*default);
                v
            }
            _ => Vec::new(),
        }
    }

    #[must_use]
    pub const fn is_conditional_branch(&self) -> bool {
        matches!(
            self,
            Self::IfEq(_)
                | Self::IfNe(_)
                | Self::IfLt(_)
                | Self::IfGe(_)
                | Self::IfGt(_)
                | Self::IfLe(_)
                | Self::IfIcmpEq(_)
                | Self::IfIcmpNe(_)
                | Self::IfIcmpLt(_)
                | Self::IfIcmpGe(_)
                | Self::IfIcmpGt(_)
                | Self::IfIcmpLe(_)
                | Self::IfAcmpEq(_)
                | Self::IfAcmpNe(_)
                | Self::IfNull(_)
                | Self::IfNonNull(_)
        )
    }

    #[must_use]
    pub const fn is_unconditional_branch(&self) -> bool {
        matches!(self, Self::Goto(_))
    }

    #[must_use]
    pub const fn is_switch(&self) -> bool {
        matches!(self, Self::TableSwitch(_, _, _) | Self::LookupSwitch(_, _))
    }

    #[must_use]
    pub const fn is_return(&self) -> bool {
        matches!(
            self,
            Self::Ireturn
                | Self::Lreturn
                | Self::Freturn
                | Self::Dreturn
                | Self::Areturn
                | Self::Return
        )
    }

    #[must_use]
    pub const fn is_invoke(&self) -> bool {
        matches!(
            self,
            Self::InvokeVirtual(_)
                | Self::InvokeSpecial(_)
                | Self::InvokeStatic(_)
                | Self::InvokeInterface(_)
        )
    }

    /// Returns the invoked method reference, if any.
    #[must_use]
    pub const fn invoked_method(&self) -> Option<&MethodRef> {
        match self {
            Self::InvokeVirtual(m)
            | Self::InvokeSpecial(m)
            | Self::InvokeStatic(m)
            | Self::InvokeInterface(m) => Some(m),
            _ => None,
        }
    }

    /// Returns `true` if normal completion of the instruction continues with
    /// the next instruction in the bytecode stream.
    #[must_use]
    pub const fn falls_through(&self) -> bool {
        !(self.is_return()
            || self.is_switch()
            || matches!(
                self,
                Self::Goto(_) | Self::Jsr(_) | Self::Ret(_) | Self::Athrow
            ))
    }

    /// Returns `true` if the instruction must end a basic block.
    #[must_use]
    pub fn ends_block(&self) -> bool {
        !self.falls_through() || self.is_conditional_branch()
    }

    /// Net effect of the instruction on the operand stack depth, in slots.
    #[must_use]
    pub fn stack_delta(&self) -> i32 {
        self.pushes() as i32 - self.pops() as i32
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.mnemonic())?;
        match self {
            Self::Iconst(v) => write!(f, " {v}"),
            Self::Lconst(v) => write!(f, " {v}"),
            Self::Fconst(v) => write!(f, " {v}"),
            Self::Dconst(v) => write!(f, " {v}"),
            Self::Ldc(s) => write!(f, " {s:?}"),
            Self::LdcClass(t)
            | Self::NewArray(t)
            | Self::CheckCast(t)
            | Self::InstanceOf(t) => write!(f, " {t}"),
            Self::MultiANewArray(t, dims) => write!(f, " {t} {dims}"),
            Self::Iload(l)
            | Self::Lload(l)
            | Self::Fload(l)
            | Self::Dload(l)
            | Self::Aload(l)
            | Self::Istore(l)
            | Self::Lstore(l)
            | Self::Fstore(l)
            | Self::Dstore(l)
            | Self::Astore(l)
            | Self::Ret(l) => write!(f, " {l}"),
            Self::Iinc(l, v) => write!(f, " {l} {v}"),
            Self::TableSwitch(low, targets, default) => {
                write!(f, " {low}")?;
                for t in targets {
                    write!(f, " {t}")?;
                }
                write!(f, " default {default}")
            }
            Self::LookupSwitch(pairs, default) => {
                for (k, t) in pairs {
                    write!(f, " {k}:{t}")?;
                }
                write!(f, " default {default}")
            }
            Self::GetStatic(r) | Self::PutStatic(r) | Self::GetField(r) | Self::PutField(r) => {
                write!(f, " {r}")
            }
            Self::InvokeVirtual(m)
            | Self::InvokeSpecial(m)
            | Self::InvokeStatic(m)
            | Self::InvokeInterface(m) => write!(f, " {m}"),
            Self::New(c) => write!(f, " {c}"),
            i if i.is_conditional_branch() || matches!(i, Self::Goto(_) | Self::Jsr(_)) => {
                for t in i.branch_targets() {
                    write!(f, " {t}")?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MethodDescriptor;
    use std::convert::TryFrom;

    #[test]
    fn derived_stack_effects() {
        assert_eq!(Instr::Iadd.pops(), 2);
        assert_eq!(Instr::Iadd.pushes(), 1);
        assert_eq!(Instr::Lconst(3).stack_delta(), 2);
        let m = MethodRef {
            class: "Foo".to_string(),
            name: "bar".to_string(),
            descriptor: MethodDescriptor::try_from("(JI)D").unwrap(),
        };
        assert_eq!(Instr::InvokeVirtual(m.clone()).pops(), 4);
        assert_eq!(Instr::InvokeStatic(m).pushes(), 2);
        assert_eq!(Instr::MultiANewArray(Type::Int, 3).pops(), 3);
    }

    #[test]
    fn derived_mnemonics_and_throwers() {
        assert_eq!(Instr::IfIcmpLe(Addr(4)).mnemonic(), "if_icmple");
        assert!(Instr::Athrow.can_throw());
        assert!(Instr::Idiv.can_throw());
        assert!(!Instr::Iadd.can_throw());
    }

    #[test]
    fn control_transfers() {
        assert!(!Instr::Goto(Addr(0)).falls_through());
        assert!(Instr::IfEq(Addr(0)).falls_through());
        assert!(Instr::IfEq(Addr(0)).ends_block());
        assert!(!Instr::Iadd.ends_block());
        let switch = Instr::TableSwitch(0, vec![Addr(10), Addr(20)], Addr(30));
        assert_eq!(switch.branch_targets(), vec![Addr(10), Addr(20), Addr(30)]);
        assert_eq!(format!("{}", Instr::Goto(Addr(12))), "goto 12");
    }
}
