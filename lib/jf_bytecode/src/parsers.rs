use crate::classes::{ClassDecl, MethodDecl};
use crate::code::{Code, ExceptionHandler};
use crate::errors::{BytecodeError, BytecodeResult};
use crate::instrs::{Instr, Instruction, LabeledInstr};
use crate::methods::{Method, MethodFlags};
use crate::types::{FieldRef, MethodDescriptor, MethodRef, Type};
use crate::{Addr, Program};
use nom::branch::alt;
use nom::bytes::complete::{escaped_transform, is_not, tag, take_till1};
use nom::character::complete::{char, digit1, i32 as parse_i32, i64 as parse_i64, space0, space1};
use nom::character::complete::{u16 as parse_u16, u8 as parse_u8};
use nom::combinator::{all_consuming, map, map_res, opt, value};
use nom::multi::{many0, separated_list1};
use nom::number::complete::{double, float};
use nom::sequence::{delimited, pair, preceded, separated_pair, terminated, tuple};
use nom::{Finish, IResult};
use std::convert::TryFrom;

// The textual assembly is line oriented: every line is parsed on its own with nom
// combinators, and a small state machine groups lines into classes and methods.

type PResult<'a, O> = IResult<&'a str, O>;

/// Textual assembly parsing function, takes input and returns a freshly built [`Program`].
pub fn parse_program(input: &str) -> BytecodeResult<Program> {
    log::trace!("parsing program...");

    let mut program = Program::default();
    let mut state = State::Toplevel;

    for (i, raw_line) in input.lines().enumerate() {
        let lineno = i + 1;
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let keyword = line.split_whitespace().next().unwrap_or_default();

        state = match (state, keyword) {
            (State::Method(mut m), "end") => {
                program.methods.push(m.finish(lineno)?);
                State::Toplevel
            }
            (State::Method(mut m), "try") => {
                m.handlers.push(run(lineno, line, try_line)?);
                State::Method(m)
            }
            (State::Method(mut m), _) => {
                m.instrs.push(instr_line(lineno, line)?);
                State::Method(m)
            }
            (State::Class(c), "end") => {
                program.classes.push(c);
                State::Toplevel
            }
            (State::Class(mut c), "declares") => {
                c.methods.push(run(lineno, line, declares_line)?);
                State::Class(c)
            }
            (state, "class" | "interface") => {
                if let State::Class(c) = state {
                    program.classes.push(c);
                }
                State::Class(run(lineno, line, class_line)?)
            }
            (state, "method") => {
                if let State::Class(c) = state {
                    program.classes.push(c);
                }
                State::Method(Box::new(run(lineno, line, method_line)?))
            }
            (_, keyword) => {
                return Err(BytecodeError::Parsing {
                    line: lineno,
                    message: format!("unexpected '{keyword}'"),
                })
            }
        };
    }

    match state {
        State::Method(m) => {
            return Err(BytecodeError::Parsing {
                line: input.lines().count(),
                message: format!("unterminated method {}.{}", m.class, m.name),
            })
        }
        State::Class(c) => program.classes.push(c),
        State::Toplevel => (),
    }

    log::debug!(
        "parsed {} classes and {} methods",
        program.classes.len(),
        program.methods.len()
    );
    Ok(program)
}

enum State {
    Toplevel,
    Class(ClassDecl),
    Method(Box<MethodBuilder>),
}

struct MethodBuilder {
    class: String,
    name: String,
    descriptor: MethodDescriptor,
    flags: MethodFlags,
    max_locals: usize,
    instrs: Vec<LabeledInstr>,
    handlers: Vec<ExceptionHandler>,
}

impl MethodBuilder {
    fn finish(&mut self, lineno: usize) -> BytecodeResult<Method> {
        let bodyless = self
            .flags
            .intersects(MethodFlags::ACC_ABSTRACT | MethodFlags::ACC_NATIVE);
        let code = if bodyless && self.instrs.is_empty() {
            None
        } else {
            let code = Code::new(
                std::mem::take(&mut self.instrs),
                std::mem::take(&mut self.handlers),
            )
            .map_err(|err| BytecodeError::Parsing {
                line: lineno,
                message: err.to_string(),
            })?;
            Some(code)
        };
        Ok(Method::new(
            &self.class,
            &self.name,
            self.descriptor.clone(),
            self.flags,
            self.max_locals,
            code,
        ))
    }
}

#[derive(Clone)]
enum Modifier {
    Flag(MethodFlags),
    Locals(usize),
}

/// Removes a trailing `#` comment, ignoring `#` characters inside string literals.
fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..i],
            _ => (),
        }
    }
    line
}

fn run<'a, O, P>(lineno: usize, line: &'a str, parser: P) -> BytecodeResult<O>
where
    P: FnMut(&'a str) -> PResult<'a, O>,
{
    all_consuming(terminated(parser, space0))(line)
        .finish()
        .map(|(_, o)| o)
        .map_err(|err| BytecodeError::Parsing {
            line: lineno,
            message: err.to_string(),
        })
}

fn arg<'a, O, P>(parser: P) -> impl FnMut(&'a str) -> PResult<'a, O>
where
    P: FnMut(&'a str) -> PResult<'a, O>,
{
    preceded(space1, parser)
}

fn token(input: &str) -> PResult<&str> {
    take_till1(|c: char| c.is_whitespace())(input)
}

fn class_name(input: &str) -> PResult<&str> {
    take_till1(|c: char| c.is_whitespace() || c == ',')(input)
}

fn class_list(input: &str) -> PResult<Vec<String>> {
    separated_list1(
        tuple((space0, char(','), space0)),
        map(class_name, str::to_string),
    )(input)
}

fn addr(input: &str) -> PResult<Addr> {
    map(map_res(digit1, str::parse::<usize>), Addr)(input)
}

fn usize_value(input: &str) -> PResult<usize> {
    map_res(digit1, str::parse::<usize>)(input)
}

fn type_desc(input: &str) -> PResult<Type> {
    map_res(token, Type::try_from)(input)
}

fn method_ref(input: &str) -> PResult<MethodRef> {
    map_res(token, |s: &str| -> BytecodeResult<MethodRef> {
        let paren = s.find('(').ok_or(BytecodeError::InvalidType)?;
        let (class, name) = s[..paren]
            .rsplit_once('.')
            .ok_or(BytecodeError::InvalidType)?;
        Ok(MethodRef {
            class: class.to_string(),
            name: name.to_string(),
            descriptor: MethodDescriptor::try_from(&s[paren..])?,
        })
    })(input)
}

fn field_ref(input: &str) -> PResult<FieldRef> {
    map_res(token, |s: &str| -> BytecodeResult<FieldRef> {
        let (path, typ) = s.split_once(':').ok_or(BytecodeError::InvalidType)?;
        let (class, name) = path.rsplit_once('.').ok_or(BytecodeError::InvalidType)?;
        Ok(FieldRef {
            class: class.to_string(),
            name: name.to_string(),
            typ: Type::try_from(typ)?,
        })
    })(input)
}

fn string_literal(input: &str) -> PResult<String> {
    alt((
        value(String::new(), tag("\"\"")),
        delimited(
            char('"'),
            escaped_transform(
                is_not("\\\""),
                '\\',
                alt((
                    value("\\", tag("\\")),
                    value("\"", tag("\"")),
                    value("\n", tag("n")),
                    value("\r", tag("r")),
                    value("\t", tag("t")),
                )),
            ),
            char('"'),
        ),
    ))(input)
}

fn default_target(input: &str) -> PResult<Addr> {
    preceded(pair(space1, tag("default")), arg(addr))(input)
}

fn class_line(input: &str) -> PResult<ClassDecl> {
    let (input, kind) = alt((tag("class"), tag("interface")))(input)?;
    let (input, name) = arg(class_name)(input)?;
    let mut decl = ClassDecl::new(name);
    if kind == "interface" {
        let (input, supers) = opt(preceded(pair(space1, tag("extends")), arg(class_list)))(input)?;
        decl.is_interface = true;
        decl.superclass = Some("java/lang/Object".to_string());
        decl.interfaces = supers.unwrap_or_default();
        return Ok((input, decl));
    }
    let (input, superclass) = opt(preceded(pair(space1, tag("extends")), arg(class_name)))(input)?;
    let (input, interfaces) =
        opt(preceded(pair(space1, tag("implements")), arg(class_list)))(input)?;
    decl.superclass = superclass.map(str::to_string);
    decl.interfaces = interfaces.unwrap_or_default();
    Ok((input, decl))
}

fn declares_line(input: &str) -> PResult<MethodDecl> {
    let (input, _) = tag("declares")(input)?;
    let (input, name) = arg(take_till1(|c: char| c == '(' || c.is_whitespace()))(input)?;
    let (input, descriptor) = map_res(token, MethodDescriptor::try_from)(input)?;
    let (input, exceptions) = opt(preceded(pair(space1, tag("throws")), arg(class_list)))(input)?;
    let (input, noreturn) = opt(preceded(space1, tag("noreturn")))(input)?;
    Ok((
        input,
        MethodDecl {
            name: name.to_string(),
            descriptor,
            exceptions: exceptions.unwrap_or_default(),
            unconditional_thrower: noreturn.is_some(),
        },
    ))
}

fn modifier(input: &str) -> PResult<Modifier> {
    alt((
        map(preceded(pair(tag("locals"), space1), usize_value), Modifier::Locals),
        value(Modifier::Flag(MethodFlags::ACC_PUBLIC), tag("public")),
        value(Modifier::Flag(MethodFlags::ACC_PRIVATE), tag("private")),
        value(Modifier::Flag(MethodFlags::ACC_PROTECTED), tag("protected")),
        value(Modifier::Flag(MethodFlags::ACC_STATIC), tag("static")),
        value(Modifier::Flag(MethodFlags::ACC_FINAL), tag("final")),
        value(
            Modifier::Flag(MethodFlags::ACC_SYNCHRONIZED),
            tag("synchronized"),
        ),
        value(Modifier::Flag(MethodFlags::ACC_NATIVE), tag("native")),
        value(Modifier::Flag(MethodFlags::ACC_ABSTRACT), tag("abstract")),
    ))(input)
}

fn method_line(input: &str) -> PResult<MethodBuilder> {
    let (input, _) = tag("method")(input)?;
    let (input, mref) = arg(method_ref)(input)?;
    let (input, modifiers) = many0(arg(modifier))(input)?;
    let mut flags = MethodFlags::empty();
    let mut max_locals = 0;
    for m in modifiers {
        match m {
            Modifier::Flag(f) => flags |= f,
            Modifier::Locals(n) => max_locals = n,
        }
    }
    Ok((
        input,
        MethodBuilder {
            class: mref.class,
            name: mref.name,
            descriptor: mref.descriptor,
            flags,
            max_locals,
            instrs: Vec::new(),
            handlers: Vec::new(),
        },
    ))
}

fn try_line(input: &str) -> PResult<ExceptionHandler> {
    let (input, _) = tag("try")(input)?;
    let (input, (start, end, handler)) = tuple((arg(addr), arg(addr), arg(addr)))(input)?;
    let (input, catch_type) = arg(alt((
        value(None, tag("any")),
        map(class_name, |s: &str| Some(s.to_string())),
    )))(input)?;
    Ok((input, ExceptionHandler::new(start, end, handler, catch_type)))
}

fn instr_line(lineno: usize, line: &str) -> BytecodeResult<LabeledInstr> {
    let (operands, (offset, mnemonic)) = run_prefix(
        lineno,
        line,
        separated_pair(addr, pair(char(':'), space0), token),
    )?;
    let instr = operands_of(mnemonic, operands).map_err(|err| match err {
        BytecodeError::UnknownMnemonic(_) => err,
        err => BytecodeError::Parsing {
            line: lineno,
            message: format!("{mnemonic}: {err}"),
        },
    })?;
    Ok(LabeledInstr::new(offset, instr))
}

fn run_prefix<'a, O, P>(lineno: usize, line: &'a str, mut parser: P) -> BytecodeResult<(&'a str, O)>
where
    P: FnMut(&'a str) -> PResult<'a, O>,
{
    parser(line).finish().map_err(|err| BytecodeError::Parsing {
        line: lineno,
        message: err.to_string(),
    })
}

fn ops<'a, O, P>(operands: &'a str, parser: P) -> BytecodeResult<O>
where
    P: FnMut(&'a str) -> PResult<'a, O>,
{
    all_consuming(terminated(parser, space0))(operands)
        .finish()
        .map(|(_, o)| o)
        .map_err(|err| BytecodeError::Internal(err.to_string()))
}

/// Instructions without operands, looked up by mnemonic.
fn simple_instr(mnemonic: &str) -> Option<Instr> {
    [
        Instr::Nop,
        Instr::AconstNull,
        Instr::Iaload,
        Instr::Laload,
        Instr::Faload,
        Instr::Daload,
        Instr::Aaload,
        Instr::Baload,
        Instr::Caload,
        Instr::Saload,
        Instr::Iastore,
        Instr::Lastore,
        Instr::Fastore,
        Instr::Dastore,
        Instr::Aastore,
        Instr::Bastore,
        Instr::Castore,
        Instr::Sastore,
        Instr::Pop,
        Instr::Pop2,
        Instr::Dup,
        Instr::DupX1,
        Instr::Dup2,
        Instr::Swap,
        Instr::Iadd,
        Instr::Isub,
        Instr::Imul,
        Instr::Idiv,
        Instr::Irem,
        Instr::Ineg,
        Instr::Ishl,
        Instr::Ishr,
        Instr::Iand,
        Instr::Ior,
        Instr::Ixor,
        Instr::Ladd,
        Instr::Lsub,
        Instr::Lmul,
        Instr::Ldiv,
        Instr::Lrem,
        Instr::Fadd,
        Instr::Fmul,
        Instr::Dadd,
        Instr::Dmul,
        Instr::I2l,
        Instr::I2f,
        Instr::I2d,
        Instr::L2i,
        Instr::F2i,
        Instr::D2i,
        Instr::I2b,
        Instr::I2c,
        Instr::I2s,
        Instr::Lcmp,
        Instr::Fcmpl,
        Instr::Dcmpl,
        Instr::Ireturn,
        Instr::Lreturn,
        Instr::Freturn,
        Instr::Dreturn,
        Instr::Areturn,
        Instr::Return,
        Instr::ArrayLength,
        Instr::Athrow,
        Instr::MonitorEnter,
        Instr::MonitorExit,
    ]
    .into_iter()
    .find(|instr| instr.mnemonic() == mnemonic)
}

fn operands_of(mnemonic: &str, operands: &str) -> BytecodeResult<Instr> {
    if let Some(instr) = simple_instr(mnemonic) {
        ops(operands, space0)?;
        return Ok(instr);
    }

    let instr = match mnemonic {
        "iconst" => Instr::Iconst(ops(operands, arg(parse_i32))?),
        "lconst" => Instr::Lconst(ops(operands, arg(parse_i64))?),
        "fconst" => Instr::Fconst(ops(operands, arg(float))?),
        "dconst" => Instr::Dconst(ops(operands, arg(double))?),
        "ldc" => Instr::Ldc(ops(operands, arg(string_literal))?),
        "ldc_class" => Instr::LdcClass(ops(operands, arg(type_desc))?),
        "iload" => Instr::Iload(ops(operands, arg(parse_u16))?),
        "lload" => Instr::Lload(ops(operands, arg(parse_u16))?),
        "fload" => Instr::Fload(ops(operands, arg(parse_u16))?),
        "dload" => Instr::Dload(ops(operands, arg(parse_u16))?),
        "aload" => Instr::Aload(ops(operands, arg(parse_u16))?),
        "istore" => Instr::Istore(ops(operands, arg(parse_u16))?),
        "lstore" => Instr::Lstore(ops(operands, arg(parse_u16))?),
        "fstore" => Instr::Fstore(ops(operands, arg(parse_u16))?),
        "dstore" => Instr::Dstore(ops(operands, arg(parse_u16))?),
        "astore" => Instr::Astore(ops(operands, arg(parse_u16))?),
        "ret" => Instr::Ret(ops(operands, arg(parse_u16))?),
        "iinc" => {
            let (local, incr) = ops(operands, pair(arg(parse_u16), arg(parse_i32)))?;
            Instr::Iinc(local, incr)
        }
        "ifeq" => Instr::IfEq(ops(operands, arg(addr))?),
        "ifne" => Instr::IfNe(ops(operands, arg(addr))?),
        "iflt" => Instr::IfLt(ops(operands, arg(addr))?),
        "ifge" => Instr::IfGe(ops(operands, arg(addr))?),
        "ifgt" => Instr::IfGt(ops(operands, arg(addr))?),
        "ifle" => Instr::IfLe(ops(operands, arg(addr))?),
        "if_icmpeq" => Instr::IfIcmpEq(ops(operands, arg(addr))?),
        "if_icmpne" => Instr::IfIcmpNe(ops(operands, arg(addr))?),
        "if_icmplt" => Instr::IfIcmpLt(ops(operands, arg(addr))?),
        "if_icmpge" => Instr::IfIcmpGe(ops(operands, arg(addr))?),
        "if_icmpgt" => Instr::IfIcmpGt(ops(operands, arg(addr))?),
        "if_icmple" => Instr::IfIcmpLe(ops(operands, arg(addr))?),
        "if_acmpeq" => Instr::IfAcmpEq(ops(operands, arg(addr))?),
        "if_acmpne" => Instr::IfAcmpNe(ops(operands, arg(addr))?),
        "ifnull" => Instr::IfNull(ops(operands, arg(addr))?),
        "ifnonnull" => Instr::IfNonNull(ops(operands, arg(addr))?),
        "goto" => Instr::Goto(ops(operands, arg(addr))?),
        "jsr" => Instr::Jsr(ops(operands, arg(addr))?),
        "tableswitch" => {
            let (low, targets, default) = ops(
                operands,
                tuple((arg(parse_i32), many0(arg(addr)), default_target)),
            )?;
            Instr::TableSwitch(low, targets, default)
        }
        "lookupswitch" => {
            let (pairs, default) = ops(
                operands,
                pair(
                    many0(arg(separated_pair(parse_i32, char(':'), addr))),
                    default_target,
                ),
            )?;
            Instr::LookupSwitch(pairs, default)
        }
        "getstatic" => Instr::GetStatic(ops(operands, arg(field_ref))?),
        "putstatic" => Instr::PutStatic(ops(operands, arg(field_ref))?),
        "getfield" => Instr::GetField(ops(operands, arg(field_ref))?),
        "putfield" => Instr::PutField(ops(operands, arg(field_ref))?),
        "invokevirtual" => Instr::InvokeVirtual(ops(operands, arg(method_ref))?),
        "invokespecial" => Instr::InvokeSpecial(ops(operands, arg(method_ref))?),
        "invokestatic" => Instr::InvokeStatic(ops(operands, arg(method_ref))?),
        "invokeinterface" => Instr::InvokeInterface(ops(operands, arg(method_ref))?),
        "new" => Instr::New(ops(operands, arg(map(class_name, str::to_string)))?),
        "newarray" => Instr::NewArray(ops(operands, arg(type_desc))?),
        "multianewarray" => {
            let (typ, dims) = ops(operands, pair(arg(type_desc), arg(parse_u8)))?;
            Instr::MultiANewArray(typ, dims)
        }
        "checkcast" => Instr::CheckCast(ops(operands, arg(type_desc))?),
        "instanceof" => Instr::InstanceOf(ops(operands, arg(type_desc))?),
        _ => return Err(BytecodeError::UnknownMnemonic(mnemonic.to_string())),
    };
    Ok(instr)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
class java/lang/Object
class java/lang/Throwable extends java/lang/Object
class Foo extends java/lang/Object implements java/io/Serializable, java/lang/Runnable
  declares run()V throws java/io/IOException
  declares exit()V noreturn
end
interface java/io/Serializable

# a simple method
method Foo.bar(I)I static locals 2
  0: iload 0
  1: ifeq 4            # skip
  2: ldc "a # b"
  3: pop
  4: iconst -1
  5: ireturn
  try 0 4 4 java/lang/Exception
end
"#;

    #[test]
    fn sample_program() {
        let program = parse_program(SAMPLE).unwrap();
        assert_eq!(program.iter_classes().count(), 4);

        let foo = program.get_class("Foo").unwrap();
        assert_eq!(foo.superclass.as_deref(), Some("java/lang/Object"));
        assert_eq!(foo.interfaces.len(), 2);
        assert_eq!(foo.methods.len(), 2);
        assert_eq!(foo.methods[0].exceptions, vec!["java/io/IOException"]);
        assert!(foo.methods[1].unconditional_thrower);
        assert!(program.get_class("java/io/Serializable").unwrap().is_interface);

        let bar = program.iter_methods().next().unwrap();
        assert!(bar.is_static());
        assert_eq!(bar.max_locals(), 2);
        let code = bar.code().unwrap();
        assert_eq!(code.instructions_count(), 6);
        assert_eq!(
            code.instruction_at(Addr(2)).unwrap().instr(),
            &Instr::Ldc("a # b".to_string())
        );
        assert_eq!(code.instruction_at(Addr(4)).unwrap().instr(), &Instr::Iconst(-1));
        let handler = code.iter_handlers().next().unwrap();
        assert_eq!(handler.catch_type(), Some("java/lang/Exception"));
    }

    #[test]
    fn operands_parsing() {
        assert_eq!(
            operands_of("tableswitch", " 3 10 20 default 30").unwrap(),
            Instr::TableSwitch(3, vec![Addr(10), Addr(20)], Addr(30))
        );
        assert_eq!(
            operands_of("lookupswitch", " -1:7 5:9 default 11").unwrap(),
            Instr::LookupSwitch(vec![(-1, Addr(7)), (5, Addr(9))], Addr(11))
        );
        let invoke = operands_of("invokevirtual", " java/io/File.exists()Z").unwrap();
        let m = invoke.invoked_method().unwrap();
        assert_eq!(m.class, "java/io/File");
        assert_eq!(m.name, "exists");
        assert_eq!(
            operands_of("getfield", " Foo.count:J").unwrap().pushes(),
            2
        );
        assert_eq!(operands_of("iinc", " 1 -2").unwrap(), Instr::Iinc(1, -2));
        assert!(operands_of("iadd", " 1").is_err());
        assert!(matches!(
            operands_of("frobnicate", ""),
            Err(BytecodeError::UnknownMnemonic(_))
        ));
    }

    #[test]
    fn display_is_parseable() {
        let instrs = [
            Instr::Ldc("x\"y".to_string()),
            Instr::CheckCast(Type::Class("java/lang/String".to_string())),
            Instr::TableSwitch(0, vec![Addr(4)], Addr(8)),
            Instr::Goto(Addr(2)),
        ];
        for instr in instrs {
            let text = format!("{instr}");
            let (mnemonic, operands) = text.split_at(instr.mnemonic().len());
            assert_eq!(operands_of(mnemonic, operands).unwrap(), instr);
        }
    }

    #[test]
    fn parsing_errors() {
        let res = parse_program("method Foo.bar()V\n  0: return\n");
        assert!(matches!(res, Err(BytecodeError::Parsing { .. })));
        let res = parse_program("declares foo()V\n");
        assert!(matches!(res, Err(BytecodeError::Parsing { line: 1, .. })));
        let res = parse_program("method Foo.bar()V\n  0: return\n  0: return\nend\n");
        assert!(matches!(res, Err(BytecodeError::Parsing { line: 4, .. })));
    }
}
