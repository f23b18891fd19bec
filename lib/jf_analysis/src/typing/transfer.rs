//! Type inference rules of the instructions.

use crate::errors::{AnalysisError, AnalysisResult};
use crate::typing::errors::TypeError;
use crate::typing::types::{JvmType, CLASS, STRING};
use crate::typing::TypeFrame;
use jf_bytecode::instrs::{Instr, Instruction, LabeledInstr};
use jf_bytecode::types::Type;
use std::convert::TryFrom;

fn push_value(frame: &mut TypeFrame, value: JvmType) {
    if let Some(extra) = value.wide_extra() {
        frame.push(extra);
    }
    frame.push(value);
}

fn push_type(frame: &mut TypeFrame, typ: &Type) -> AnalysisResult<()> {
    if *typ != Type::Void {
        push_value(frame, JvmType::try_from(typ)?);
    }
    Ok(())
}

fn pop_push(frame: &mut TypeFrame, pops: usize, value: JvmType) -> AnalysisResult<()> {
    frame.pop_n(pops)?;
    push_value(frame, value);
    Ok(())
}

// Storing into one half of a wide value invalidates the other half.
fn store_local(frame: &mut TypeFrame, index: usize, value: JvmType) -> AnalysisResult<()> {
    let last = if value.wide_extra().is_some() {
        index + 1
    } else {
        index
    };
    if index > 0 && frame.local(index - 1)?.is_wide_extra() {
        frame.set_local(index - 1, JvmType::Bottom)?;
    }
    if frame.local(last)?.is_wide_extra() && last + 1 < frame.num_locals() {
        frame.set_local(last + 1, JvmType::Bottom)?;
    }
    if let Some(extra) = value.wide_extra() {
        frame.set_local(index, extra)?;
    }
    frame.set_local(last, value)
}

// Both halves must hold the expected wide value.
fn load_wide(frame: &mut TypeFrame, index: u16, value: JvmType) -> AnalysisResult<()> {
    let index = usize::from(index);
    let lower = frame.local(index)?;
    if Some(lower) != value.wide_extra().as_ref() || *frame.local(index + 1)? != value {
        return Err(TypeError::BrokenWideValue(index).into());
    }
    push_value(frame, value);
    Ok(())
}

/// Applies the effect of an instruction on a valid frame.
pub(super) fn model_instruction(linstr: &LabeledInstr, frame: &mut TypeFrame) -> AnalysisResult<()> {
    let instr = linstr.instr();
    match instr {
        Instr::AconstNull => frame.push(JvmType::Null),
        Instr::Iconst(_) => frame.push(JvmType::Int),
        Instr::Lconst(_) => push_value(frame, JvmType::Long),
        Instr::Fconst(_) => frame.push(JvmType::Float),
        Instr::Dconst(_) => push_value(frame, JvmType::Double),
        Instr::Ldc(_) => frame.push(STRING.clone()),
        Instr::LdcClass(_) => frame.push(CLASS.clone()),

        Instr::Iload(i) | Instr::Fload(i) | Instr::Aload(i) => {
            let value = frame.local(usize::from(*i))?.clone();
            frame.push(value);
        }
        Instr::Lload(i) => load_wide(frame, *i, JvmType::Long)?,
        Instr::Dload(i) => load_wide(frame, *i, JvmType::Double)?,
        Instr::Istore(i) | Instr::Fstore(i) | Instr::Astore(i) => {
            let value = frame.pop()?;
            store_local(frame, usize::from(*i), value)?;
        }
        Instr::Lstore(i) | Instr::Dstore(i) => {
            let value = frame.pop()?;
            frame.pop()?;
            store_local(frame, usize::from(*i), value)?;
        }
        Instr::Iinc(i, _) => store_local(frame, usize::from(*i), JvmType::Int)?,

        Instr::Aaload => {
            frame.pop()?;
            let element = match frame.pop()? {
                JvmType::Bottom => JvmType::Bottom,
                array => array.element_type()?,
            };
            frame.push(element);
        }
        Instr::Iaload | Instr::Baload => pop_push(frame, 2, JvmType::Int)?,
        Instr::Caload => pop_push(frame, 2, JvmType::Char)?,
        Instr::Saload => pop_push(frame, 2, JvmType::Short)?,
        Instr::Laload => pop_push(frame, 2, JvmType::Long)?,
        Instr::Faload => pop_push(frame, 2, JvmType::Float)?,
        Instr::Daload => pop_push(frame, 2, JvmType::Double)?,

        Instr::Dup => {
            let value = frame.top_value()?.clone();
            frame.push(value);
        }
        Instr::DupX1 => {
            let v1 = frame.pop()?;
            let v2 = frame.pop()?;
            frame.push(v1.clone());
            frame.push(v2);
            frame.push(v1);
        }
        Instr::Dup2 => {
            let v1 = frame.stack_value(0)?.clone();
            let v2 = frame.stack_value(1)?.clone();
            frame.push(v2);
            frame.push(v1);
        }
        Instr::Swap => {
            let v1 = frame.pop()?;
            let v2 = frame.pop()?;
            frame.push(v1);
            frame.push(v2);
        }

        Instr::Iadd
        | Instr::Isub
        | Instr::Imul
        | Instr::Idiv
        | Instr::Irem
        | Instr::Ineg
        | Instr::Ishl
        | Instr::Ishr
        | Instr::Iand
        | Instr::Ior
        | Instr::Ixor
        | Instr::L2i
        | Instr::F2i
        | Instr::D2i
        | Instr::Lcmp
        | Instr::Fcmpl
        | Instr::Dcmpl
        | Instr::ArrayLength
        | Instr::InstanceOf(_) => pop_push(frame, instr.pops(), JvmType::Int)?,
        Instr::Ladd | Instr::Lsub | Instr::Lmul | Instr::Ldiv | Instr::Lrem | Instr::I2l => {
            pop_push(frame, instr.pops(), JvmType::Long)?;
        }
        Instr::Fadd | Instr::Fmul | Instr::I2f => pop_push(frame, instr.pops(), JvmType::Float)?,
        Instr::Dadd | Instr::Dmul | Instr::I2d => pop_push(frame, instr.pops(), JvmType::Double)?,
        Instr::I2b => pop_push(frame, 1, JvmType::Byte)?,
        Instr::I2c => pop_push(frame, 1, JvmType::Char)?,
        Instr::I2s => pop_push(frame, 1, JvmType::Short)?,

        Instr::Jsr(_) => frame.push(JvmType::ReturnAddress),
        Instr::GetStatic(field) => push_type(frame, &field.typ)?,
        Instr::GetField(field) => {
            frame.pop()?;
            push_type(frame, &field.typ)?;
        }
        Instr::InvokeVirtual(mref)
        | Instr::InvokeSpecial(mref)
        | Instr::InvokeStatic(mref)
        | Instr::InvokeInterface(mref) => {
            frame.pop_n(instr.pops())?;
            push_type(frame, mref.descriptor.return_type())?;
        }
        Instr::New(class) => frame.push(JvmType::Object(class.clone())),
        Instr::NewArray(elt) => {
            frame.pop()?;
            push_type(frame, &elt.clone().array_of())?;
        }
        Instr::MultiANewArray(typ, _) | Instr::CheckCast(typ) => {
            frame.pop_n(instr.pops())?;
            push_type(frame, typ)?;
        }

        // control transfers, stores into arrays and fields, returns...
        i if i.pushes() == 0 => frame.pop_n(i.pops())?,
        i => {
            return Err(AnalysisError::Internal(format!(
                "no typing rule for {}",
                i.mnemonic()
            )))
        }
    }
    Ok(())
}
