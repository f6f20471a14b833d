//! This module contains the AST of the JVM bytecode consumed by the analysis. The representation
//! is slightly different from the usual presentation to make it more convenient to match on. For
//! instance:
//!
//!   - The "wide" instruction doesn't show up at all, but instead gets merged into the
//!     instructions it is allowed to modify
//!
//!   - Some instructions (like the branches) get abstracted into one instruction with a field.
//!     This helps with repetitive pattern matches.
//!
//!   - Operands are symbolic: constants, fields and methods carry their names and descriptors
//!     rather than constant pool indices, and jumps refer to [`Label`]s.

use super::Label;
use crate::jvm::{
    BaseType, BinaryName, Error, FieldType, MethodDescriptor, Name, ParseDescriptor, RefType,
    UnqualifiedName,
};

/// Non-branching JVM bytecode instruction
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    Nop,
    AConstNull,
    IConstM1,
    IConst0,
    IConst1,
    IConst2,
    IConst3,
    IConst4,
    IConst5,
    LConst0,
    LConst1,
    FConst0,
    FConst1,
    FConst2,
    DConst0,
    DConst1,
    BiPush(i8),
    SiPush(i16),
    Ldc(Constant), // covers `ldc`, `ldc_w`, and `ldc2_w`
    ILoad(u16),    // covers `iload`, `iload{0,3}`, and `wide iload`
    LLoad(u16),    // covers `lload`, `lload{0,3}`, and `wide lload`
    FLoad(u16),    // covers `fload`, `fload{0,3}`, and `wide fload`
    DLoad(u16),    // covers `dload`, `dload{0,3}`, and `wide dload`
    ALoad(u16),    // covers `aload`, `aload{0,3}`, and `wide aload`
    IALoad,
    LALoad,
    FALoad,
    DALoad,
    AALoad,
    BALoad,
    CALoad,
    SALoad,
    IStore(u16), // covers `istore`, `istore{0,3}`, and `wide istore`
    LStore(u16), // covers `lstore`, `lstore{0,3}`, and `wide lstore`
    FStore(u16), // covers `fstore`, `fstore{0,3}`, and `wide fstore`
    DStore(u16), // covers `dstore`, `dstore{0,3}`, and `wide dstore`
    AStore(u16), // covers `astore`, `astore{0,3}`, and `wide astore`
    IAStore,
    LAStore,
    FAStore,
    DAStore,
    AAStore,
    BAStore,
    CAStore,
    SAStore,
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,
    IAdd,
    LAdd,
    FAdd,
    DAdd,
    ISub,
    LSub,
    FSub,
    DSub,
    IMul,
    LMul,
    FMul,
    DMul,
    IDiv,
    LDiv,
    FDiv,
    DDiv,
    IRem,
    LRem,
    FRem,
    DRem,
    INeg,
    LNeg,
    FNeg,
    DNeg,
    ISh(ShiftType), // covers `ishr`, `ishl`, and `iushr`
    LSh(ShiftType), // covers `lshr`, `lshl`, and `lushr`
    IAnd,
    LAnd,
    IOr,
    LOr,
    IXor,
    LXor,
    IInc(u16, i16), // covers `iinc` and `wide iinc`
    I2L,
    I2F,
    I2D,
    L2I,
    L2F,
    L2D,
    F2I,
    F2L,
    F2D,
    D2I,
    D2L,
    D2F,
    I2B,
    I2C,
    I2S,
    LCmp,
    FCmp(CompareMode), // covers `fcmpl` and `fcmpg`
    DCmp(CompareMode), // covers `dcmpl` and `dcmpg`
    GetStatic(FieldRef),
    PutStatic(FieldRef),
    GetField(FieldRef),
    PutField(FieldRef),
    Invoke(InvokeType, MethodRef), // covers `invokevirtual`, `invokespecial`, `invokestatic`, and `invokeinterface`
    InvokeDynamic(InvokeDynamic),
    New(BinaryName),
    NewArray(BaseType),
    ANewArray(RefType<BinaryName>),
    MultiANewArray(RefType<BinaryName>, u8),
    ArrayLength,
    CheckCast(RefType<BinaryName>),
    InstanceOf(RefType<BinaryName>),
    MonitorEnter,
    MonitorExit,
}

/// Branching JVM bytecode instruction
///
/// These are the instructions which can end a straight-line run of code: either by jumping
/// somewhere (conditionally or not) or by leaving the method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BranchInstruction {
    If(OrdComparison, Label), // covers `ifeq`, `ifne`, `iflt`, `ifge`, `ifgt`, `ifle`
    IfICmp(OrdComparison, Label), // covers `if_icmpeq`, `if_icmpne`, `if_icmplt`, ... `if_icmple`
    IfACmp(EqComparison, Label), // covers `if_acmpeq`, `if_acmpne`
    IfNull(EqComparison, Label), // covers `ifnull`, `ifnonnull`
    Goto(Label),                 // covers `goto` and `goto_w`
    TableSwitch {
        /// Jump target if the argument is less than `low` or greater than
        /// `low + targets.len()`
        default: Label,

        /// Value associated with the first jump target
        low: i32,

        /// Jump targets
        targets: Vec<Label>,
    },
    LookupSwitch {
        /// Jump target if there is no corresponding key
        default: Label,

        /// Jump targets (sorted so that the keys are ascending)
        targets: Vec<(i32, Label)>,
    },
    IReturn,
    LReturn,
    FReturn,
    DReturn,
    AReturn,
    Return,
    AThrow,

    /// Obsolete subroutine call (`jsr` and `jsr_w`), always rejected
    Jsr(Label),

    /// Obsolete subroutine return, always rejected
    Ret(u16),
}

impl BranchInstruction {
    /// Labels this instruction may jump to (not including the fallthrough)
    ///
    /// For switches, the default target comes first.
    pub fn jump_targets(&self) -> Vec<Label> {
        match self {
            BranchInstruction::If(_, lbl)
            | BranchInstruction::IfICmp(_, lbl)
            | BranchInstruction::IfACmp(_, lbl)
            | BranchInstruction::IfNull(_, lbl)
            | BranchInstruction::Goto(lbl)
            | BranchInstruction::Jsr(lbl) => vec![*lbl],
            BranchInstruction::TableSwitch {
                default, targets, ..
            } => {
                let mut ts = vec![*default];
                ts.extend(targets.iter().copied());
                ts
            }
            BranchInstruction::LookupSwitch { default, targets } => {
                let mut ts = vec![*default];
                ts.extend(targets.iter().map(|(_, lbl)| *lbl));
                ts
            }
            BranchInstruction::IReturn
            | BranchInstruction::LReturn
            | BranchInstruction::FReturn
            | BranchInstruction::DReturn
            | BranchInstruction::AReturn
            | BranchInstruction::Return
            | BranchInstruction::AThrow
            | BranchInstruction::Ret(_) => vec![],
        }
    }

    /// Can control continue on to the next instruction?
    pub fn falls_through(&self) -> bool {
        matches!(
            self,
            BranchInstruction::If(_, _)
                | BranchInstruction::IfICmp(_, _)
                | BranchInstruction::IfACmp(_, _)
                | BranchInstruction::IfNull(_, _)
        )
    }
}

/// Loadable constant (operand of `ldc`)
#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),
    Class(RefType<BinaryName>),
    MethodType(MethodDescriptor<BinaryName>),
    MethodHandle(MethodRef),
    FieldHandle(FieldRef),
}

/// Symbolic reference to a field
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub class: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: FieldType<BinaryName>,
}

impl FieldRef {
    /// Construct a field reference from its textual parts
    pub fn parse(class: &str, name: &str, descriptor: &str) -> Result<FieldRef, Error> {
        Ok(FieldRef {
            class: BinaryName::from_str(class).map_err(Error::BadDescriptor)?,
            name: UnqualifiedName::from_str(name).map_err(Error::BadDescriptor)?,
            descriptor: FieldType::parse(descriptor)
                .map_err(|err| Error::BadDescriptor(err.to_string()))?,
        })
    }
}

/// Symbolic reference to a method
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodRef {
    /// Owner of the method (array types show up for methods like `clone`)
    pub class: RefType<BinaryName>,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor<BinaryName>,
    pub is_interface: bool,
}

impl MethodRef {
    /// Construct a method reference from its textual parts
    ///
    /// The class is given as it would appear in a `CONSTANT_Class` (so arrays use their
    /// descriptor).
    pub fn parse(
        class: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<MethodRef, Error> {
        Ok(MethodRef {
            class: RefType::from_class_name(class)
                .map_err(|err| Error::BadDescriptor(err.to_string()))?,
            name: UnqualifiedName::from_str(name).map_err(Error::BadDescriptor)?,
            descriptor: MethodDescriptor::parse(descriptor)
                .map_err(|err| Error::BadDescriptor(err.to_string()))?,
            is_interface,
        })
    }

    pub fn is_constructor(&self) -> bool {
        self.name == UnqualifiedName::INIT
    }
}

/// Call site of an `invokedynamic`
///
/// Only the shape of the call matters for the analysis, so the bootstrap method is not tracked.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InvokeDynamic {
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor<BinaryName>,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum ShiftType {
    Left,
    LogicalRight,
    ArithmeticRight,
}

/// Comparison modes for floating point
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum CompareMode {
    /// -1 on NaN
    L,

    /// 1 on NaN
    G,
}

/// Binary comparison operators available for `int` branches
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum OrdComparison {
    EQ,
    GE,
    GT,
    LE,
    LT,
    NE,
}

/// Binary comparison operators available for reference branches
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum EqComparison {
    EQ,
    NE,
}

/// Types of method invocations (excluding `invokedynamic`)
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum InvokeType {
    Virtual,
    Special,
    Static,
    Interface,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::LabelGenerator;

    #[test]
    fn branch_targets() {
        let mut labels = LabelGenerator::new();
        let (l0, l1, l2) = (
            labels.fresh_label(),
            labels.fresh_label(),
            labels.fresh_label(),
        );

        let cond = BranchInstruction::If(OrdComparison::LT, l1);
        assert_eq!(cond.jump_targets(), vec![l1]);
        assert!(cond.falls_through());

        let switch = BranchInstruction::LookupSwitch {
            default: l0,
            targets: vec![(-4, l1), (10, l2)],
        };
        assert_eq!(switch.jump_targets(), vec![l0, l1, l2]);
        assert!(!switch.falls_through());

        assert!(BranchInstruction::AThrow.jump_targets().is_empty());
        assert!(!BranchInstruction::Goto(l2).falls_through());
    }

    #[test]
    fn parse_references() {
        let clone = MethodRef::parse("[I", "clone", "()Ljava/lang/Object;", false).unwrap();
        assert!(clone.class.is_array());
        assert!(!clone.is_constructor());

        let init = MethodRef::parse("java/lang/Object", "<init>", "()V", false).unwrap();
        assert!(init.is_constructor());

        let out = FieldRef::parse("java/lang/System", "out", "Ljava/io/PrintStream;").unwrap();
        assert_eq!(out.name.as_str(), "out");

        assert!(FieldRef::parse("java/lang/System", "out", "Ljava/io/PrintStream").is_err());
    }
}
