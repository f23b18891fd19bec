//! Stack machine shaped dataflow facts.

use crate::errors::{AnalysisError, AnalysisResult};
use jf_bytecode::instrs::Instr;
use jf_bytecode::types::MethodDescriptor;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    Top,
    Bottom,
    Valid,
}

/// Local variable slots followed by the operand stack slots.
///
/// Wide values (`long`, `double`) take two slots, whatever the values are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<V> {
    state: FrameState,
    slots: Vec<V>,
    num_locals: usize,
}

impl<V: Clone> Frame<V> {
    #[must_use]
    pub const fn top(num_locals: usize) -> Self {
        Self {
            state: FrameState::Top,
            slots: Vec::new(),
            num_locals,
        }
    }

    #[must_use]
    pub const fn bottom(num_locals: usize) -> Self {
        Self {
            state: FrameState::Bottom,
            slots: Vec::new(),
            num_locals,
        }
    }

    /// A valid frame with an empty stack and all locals set to `value`.
    #[must_use]
    pub fn valid(num_locals: usize, value: V) -> Self {
        Self {
            state: FrameState::Valid,
            slots: vec![value; num_locals],
            num_locals,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_top(&self) -> bool {
        self.state == FrameState::Top
    }

    #[inline]
    #[must_use]
    pub fn is_bottom(&self) -> bool {
        self.state == FrameState::Bottom
    }

    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.state == FrameState::Valid
    }

    pub fn set_top(&mut self) {
        self.state = FrameState::Top;
        self.slots.clear();
    }

    pub fn set_bottom(&mut self) {
        self.state = FrameState::Bottom;
        self.slots.clear();
    }

    /// Turns the frame into a valid one with locals set to `value`.
    pub fn set_valid(&mut self, value: V) {
        self.state = FrameState::Valid;
        self.slots = vec![value; self.num_locals];
    }

    #[inline]
    #[must_use]
    pub const fn num_locals(&self) -> usize {
        self.num_locals
    }

    /// Locals plus stack depth.
    #[inline]
    #[must_use]
    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    #[must_use]
    pub fn stack_depth(&self) -> usize {
        self.slots.len().saturating_sub(self.num_locals)
    }

    pub fn slots(&self) -> impl Iterator<Item = &V> {
        self.slots.iter()
    }

    /// Returns the value of a local variable.
    ///
    /// # Errors
    ///
    /// Fails with [`AnalysisError::InvalidLocal`] for an out of range index.
    pub fn local(&self, index: usize) -> AnalysisResult<&V> {
        if index >= self.num_locals {
            return Err(AnalysisError::InvalidLocal(index));
        }
        self.slots
            .get(index)
            .ok_or(AnalysisError::InvalidLocal(index))
    }

    /// Sets the value of a local variable.
    ///
    /// # Errors
    ///
    /// Fails with [`AnalysisError::InvalidLocal`] for an out of range index.
    pub fn set_local(&mut self, index: usize, value: V) -> AnalysisResult<()> {
        if index >= self.num_locals {
            return Err(AnalysisError::InvalidLocal(index));
        }
        self.slots
            .get_mut(index)
            .map(|slot| *slot = value)
            .ok_or(AnalysisError::InvalidLocal(index))
    }

    pub fn push(&mut self, value: V) {
        self.slots.push(value);
    }

    /// Pops the value on top of the stack.
    ///
    /// # Errors
    ///
    /// Fails with [`AnalysisError::StackUnderflow`] on an empty stack.
    pub fn pop(&mut self) -> AnalysisResult<V> {
        if self.stack_depth() == 0 {
            return Err(AnalysisError::StackUnderflow);
        }
        self.slots.pop().ok_or(AnalysisError::StackUnderflow)
    }

    /// Pops `n` slots.
    ///
    /// # Errors
    ///
    /// Fails with [`AnalysisError::StackUnderflow`] when the stack is not deep enough.
    pub fn pop_n(&mut self, n: usize) -> AnalysisResult<()> {
        if self.stack_depth() < n {
            return Err(AnalysisError::StackUnderflow);
        }
        self.slots.truncate(self.slots.len() - n);
        Ok(())
    }

    /// Value on top of the stack.
    ///
    /// # Errors
    ///
    /// Fails with [`AnalysisError::StackUnderflow`] on an empty stack.
    pub fn top_value(&self) -> AnalysisResult<&V> {
        self.stack_value(0)
    }

    /// Value `n` slots below the top of the stack.
    ///
    /// # Errors
    ///
    /// Fails with [`AnalysisError::StackUnderflow`] when the stack is not deep enough.
    pub fn stack_value(&self, n: usize) -> AnalysisResult<&V> {
        let index = self.stack_location(n)?;
        self.slots.get(index).ok_or(AnalysisError::StackUnderflow)
    }

    /// Index in the frame slots of the value `n` slots below the top of the stack.
    ///
    /// # Errors
    ///
    /// Fails with [`AnalysisError::StackUnderflow`] when the stack is not deep enough.
    pub fn stack_location(&self, n: usize) -> AnalysisResult<usize> {
        if n >= self.stack_depth() {
            return Err(AnalysisError::StackUnderflow);
        }
        Ok(self.slots.len() - 1 - n)
    }

    pub fn clear_stack(&mut self) {
        self.slots.truncate(self.num_locals);
    }

    pub fn copy_from(&mut self, other: &Self) {
        self.clone_from(other);
    }

    /// Number of argument slots of a call, the receiver included for instance calls.
    #[must_use]
    pub fn num_arguments(instr: &Instr, descriptor: &MethodDescriptor) -> usize {
        let receiver = !matches!(instr, Instr::InvokeStatic(_));
        descriptor.arg_slots() + usize::from(receiver)
    }

    /// Frame slot holding the `i`-th argument slot (receiver included) of the call
    /// about to be executed.
    ///
    /// # Errors
    ///
    /// Fails with [`AnalysisError::StackUnderflow`] when the stack does not hold
    /// all the arguments.
    pub fn argument_slot(&self, i: usize, num_arguments: usize) -> AnalysisResult<usize> {
        if i >= num_arguments {
            return Err(AnalysisError::Internal(format!(
                "argument {i} of a call taking {num_arguments} slots"
            )));
        }
        self.stack_location(num_arguments - 1 - i)
    }

    /// Frame slot holding the receiver of the instance call about to be executed.
    ///
    /// # Errors
    ///
    /// Fails with [`AnalysisError::StackUnderflow`] when the stack does not hold
    /// all the arguments.
    pub fn instance_slot(&self, instr: &Instr, descriptor: &MethodDescriptor) -> AnalysisResult<usize> {
        if matches!(instr, Instr::InvokeStatic(_)) {
            return Err(AnalysisError::Internal(
                "static call has no receiver".to_string(),
            ));
        }
        self.argument_slot(0, Self::num_arguments(instr, descriptor))
    }

    #[must_use]
    pub fn get(&self, slot: usize) -> Option<&V> {
        self.slots.get(slot)
    }
}

/// Slot-wise merge of frame values, supplied by each frame analysis.
pub trait FrameMerger<V> {
    /// Merges two values found in the same slot.
    ///
    /// # Errors
    ///
    /// Fails when the two values cannot be merged.
    fn merge_values(&self, slot: usize, a: &V, b: &V) -> AnalysisResult<V>;
}

/// Merges `other` into `result`:
/// - a top frame is the identity,
/// - a bottom frame is absorbing,
/// - frames of different shapes yield bottom,
/// - otherwise values are merged slot by slot.
///
/// # Errors
///
/// Propagates value merge failures.
pub fn merge_frames<V, M>(merger: &M, other: &Frame<V>, result: &mut Frame<V>) -> AnalysisResult<()>
where
    V: Clone,
    M: FrameMerger<V> + ?Sized,
{
    if other.is_top() {
        return Ok(());
    }
    if result.is_top() {
        result.copy_from(other);
        return Ok(());
    }
    if other.is_bottom() || result.is_bottom() {
        result.set_bottom();
        return Ok(());
    }
    if other.num_slots() != result.num_slots() {
        log::debug!(
            "merging frames of {} and {} slots",
            other.num_slots(),
            result.num_slots()
        );
        result.set_bottom();
        return Ok(());
    }
    for slot in 0..result.slots.len() {
        let merged = merger.merge_values(slot, &result.slots[slot], &other.slots[slot])?;
        result.slots[slot] = merged;
    }
    Ok(())
}

impl<V: fmt::Display> fmt::Display for Frame<V> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.state {
            FrameState::Top => write!(f, "[TOP]"),
            FrameState::Bottom => write!(f, "[BOTTOM]"),
            FrameState::Valid => {
                write!(f, "[")?;
                for (i, v) in self.slots.iter().enumerate() {
                    if i == self.num_locals {
                        write!(f, " |")?;
                    }
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{v}")?;
                }
                if self.slots.len() == self.num_locals {
                    write!(f, " |")?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Max;

    impl FrameMerger<u8> for Max {
        fn merge_values(&self, _slot: usize, a: &u8, b: &u8) -> AnalysisResult<u8> {
            Ok(*a.max(b))
        }
    }

    fn frame(locals: &[u8], stack: &[u8]) -> Frame<u8> {
        let mut f = Frame::valid(locals.len(), 0);
        for (i, v) in locals.iter().enumerate() {
            f.set_local(i, *v).unwrap();
        }
        for v in stack {
            f.push(*v);
        }
        f
    }

    #[test]
    fn merge_laws() {
        let f = frame(&[1, 2], &[3]);

        let mut top = Frame::top(2);
        merge_frames(&Max, &f, &mut top).unwrap();
        assert_eq!(top, f);

        let mut g = f.clone();
        merge_frames(&Max, &Frame::top(2), &mut g).unwrap();
        assert_eq!(g, f);

        let mut bottom = Frame::bottom(2);
        merge_frames(&Max, &f, &mut bottom).unwrap();
        assert!(bottom.is_bottom());
        let mut g = f.clone();
        merge_frames(&Max, &Frame::bottom(2), &mut g).unwrap();
        assert!(g.is_bottom());

        let mut deeper = frame(&[1, 2], &[3, 4]);
        merge_frames(&Max, &f, &mut deeper).unwrap();
        assert!(deeper.is_bottom());

        let mut same = f.clone();
        merge_frames(&Max, &f, &mut same).unwrap();
        assert_eq!(same, f);

        let mut other = frame(&[0, 5], &[1]);
        merge_frames(&Max, &f, &mut other).unwrap();
        assert_eq!(other, frame(&[1, 5], &[3]));
    }

    #[test]
    fn stack_operations() {
        let mut f = frame(&[7], &[]);
        assert!(matches!(f.pop(), Err(AnalysisError::StackUnderflow)));
        f.push(1);
        f.push(2);
        f.push(3);
        assert_eq!(f.stack_depth(), 3);
        assert_eq!(*f.top_value().unwrap(), 3);
        assert_eq!(*f.stack_value(2).unwrap(), 1);
        assert_eq!(f.stack_location(0).unwrap(), 3);
        assert!(f.stack_value(3).is_err());
        assert!(matches!(f.local(1), Err(AnalysisError::InvalidLocal(1))));
        assert_eq!(f.to_string(), "[7 | 1 2 3]");

        f.pop_n(2).unwrap();
        assert_eq!(f.pop().unwrap(), 1);
        f.push(9);
        f.clear_stack();
        assert_eq!(f.num_slots(), 1);
        assert_eq!(f.to_string(), "[7 |]");
    }

    #[test]
    fn call_arguments() {
        use jf_bytecode::types::{MethodRef, Type};

        let descriptor = MethodDescriptor::new(vec![Type::Long, Type::Int], Type::Void);
        let mref = MethodRef {
            class: "Foo".to_string(),
            name: "f".to_string(),
            descriptor: descriptor.clone(),
        };
        let virt = Instr::InvokeVirtual(mref.clone());
        let stat = Instr::InvokeStatic(mref);
        assert_eq!(Frame::<u8>::num_arguments(&virt, &descriptor), 4);
        assert_eq!(Frame::<u8>::num_arguments(&stat, &descriptor), 3);

        // receiver, long (2 slots), int
        let f = frame(&[0], &[10, 20, 21, 30]);
        assert_eq!(f.instance_slot(&virt, &descriptor).unwrap(), 1);
        assert_eq!(f.argument_slot(3, 4).unwrap(), 4);
        assert!(f.instance_slot(&stat, &descriptor).is_err());
    }
}
