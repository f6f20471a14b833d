use super::*;
use crate::jvm::class_graph::CommonSuperclass;
use crate::jvm::code::{BranchInstruction, Instruction, InvokeType, Label, MethodInfo};
use crate::jvm::descriptors::RenderDescriptor;
use crate::jvm::{BaseType, BinaryName, FieldType, RefType, VerifierErrorKind};
use crate::util::{Offset, OffsetResult, OffsetVec, Width};

/// State of the stack and local variables along one path through the code
///
/// Frames are mutated in place as instructions are executed, and cloned whenever control forks.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Frame<Cls, U> {
    /// Local variables in scope
    pub locals: OffsetVec<VerificationType<Cls, U>>,

    /// Types of values on the stack
    pub stack: OffsetVec<VerificationType<Cls, U>>,
}

/// Frame tracked during the analysis
pub type VerifierFrame = Frame<RefType<BinaryName>, UninitializedRefType>;

impl<Cls: Clone + Eq, U: Clone + Eq> Frame<Cls, U> {
    /// Frame with no locals and an empty stack
    pub fn new() -> Self {
        Frame {
            locals: OffsetVec::new(),
            stack: OffsetVec::new(),
        }
    }

    /// Push a value on top of the stack
    pub fn push(&mut self, value: VerificationType<Cls, U>) {
        self.stack.push(value);
    }

    /// Pop a value off the top of the stack
    pub fn pop(&mut self) -> Result<VerificationType<Cls, U>, VerifierErrorKind> {
        pop_offset_vec(&mut self.stack)
    }

    /// Peek at a value on the stack (`0` is the top of the stack, `1` the value below, etc.)
    pub fn fetch(&self, depth: usize) -> Result<&VerificationType<Cls, U>, VerifierErrorKind> {
        let len = self.stack.len();
        if depth >= len {
            return Err(VerifierErrorKind::EmptyStack);
        }
        self.stack
            .get_index(len - 1 - depth)
            .map(|(_, value)| value)
            .ok_or(VerifierErrorKind::EmptyStack)
    }

    /// Insert a value into the stack under the top `depth` values
    pub fn insert(
        &mut self,
        depth: usize,
        value: VerificationType<Cls, U>,
    ) -> Result<(), VerifierErrorKind> {
        let len = self.stack.len();
        if depth > len {
            return Err(VerifierErrorKind::EmptyStack);
        }
        self.stack.splice(len - depth..len - depth, [value]);
        Ok(())
    }

    /// Read a local variable, which must be set to something other than `Top`
    pub fn load(&self, slot: u16) -> Result<&VerificationType<Cls, U>, VerifierErrorKind> {
        get_local(&self.locals, slot)
    }

    /// Write a local variable, invalidating any wide values partially overwritten
    pub fn store(&mut self, slot: u16, value: VerificationType<Cls, U>) {
        update_local_type(&mut self.locals, slot, value)
    }

    /// Empty the stack (leaving locals alone)
    pub fn clear(&mut self) {
        self.stack.clear();
    }

    /// Update every value in both the locals and the stack
    ///
    /// The updates must not change the width of any value.
    pub fn map(&mut self, mut update: impl FnMut(&mut VerificationType<Cls, U>)) {
        self.locals.map_in_place(&mut update);
        self.stack.map_in_place(&mut update);
    }

    pub fn snapshot(&self) -> FrameSnapshot<VerificationType<Cls, U>> {
        FrameSnapshot::new(
            self.locals.iter().map(|(_, _, t)| t.clone()).collect(),
            self.stack.iter().map(|(_, _, t)| t.clone()).collect(),
        )
    }

    /// Update the maximum locals and stack
    ///
    /// Only has an effect if the size of the locals or the size of the stack is greater than the
    /// previous maximum values.
    pub fn update_maximums(&self, max_locals: &mut Offset, max_stack: &mut Offset) {
        max_locals.0 = max_locals.0.max(self.locals.offset_len().0);
        max_stack.0 = max_stack.0.max(self.stack.offset_len().0);
    }
}

impl<Cls: Clone + Eq, U: Clone + Eq> Default for Frame<Cls, U> {
    fn default() -> Self {
        Frame::new()
    }
}

impl VerifierFrame {
    /// Frame on entry to a method: the receiver (unless the method is static) followed by the
    /// parameters, and an empty stack
    pub fn initial(method: &MethodInfo) -> VerifierFrame {
        let mut frame = Frame::new();
        if !method.is_static() {
            let uninitialized = method.is_constructor() && method.class != BinaryName::OBJECT;
            frame.locals.push(VType::of_this(&method.class, uninitialized));
        }
        for parameter in &method.descriptor.parameters {
            frame.locals.push(VType::of(parameter));
        }
        frame
    }

    /// Replace every occurrence of an uninitialized value with its initialized type
    pub fn erase(&mut self, uninitialized: &VType, this_class: &BinaryName) {
        let initialized = uninitialized.erase(this_class);
        self.map(|value| {
            if value == uninitialized {
                *value = initialized.clone();
            }
        });
    }

    /// Merge another frame into this one, returning whether this frame changed
    ///
    /// Stacks must have the same shape. Locals are merged slot by slot, and wherever the two
    /// frames disagree on the width of a value, every word up to the point where they agree
    /// again becomes `Top`.
    pub fn merge(
        &mut self,
        other: &VerifierFrame,
        oracle: &dyn CommonSuperclass,
    ) -> Result<bool, VerifierErrorKind> {
        if self.stack.len() != other.stack.len()
            || self.stack.offset_len() != other.stack.offset_len()
        {
            return Err(VerifierErrorKind::StackDepthMismatch {
                expected: self.stack.offset_len().0,
                found: other.stack.offset_len().0,
            });
        }

        let mut stack = OffsetVec::new();
        for ((_, _, t1), (_, _, t2)) in self.stack.iter().zip(other.stack.iter()) {
            let merged = t1.merge(t2, oracle);
            if t1.width() != t2.width() || merged.width() != t1.width() {
                return Err(VerifierErrorKind::TypeMismatch {
                    expected: format!("{:?}", t1),
                    found: t2.clone(),
                });
            }
            stack.push(merged);
        }

        let locals = merge_locals(&self.locals, &other.locals, oracle);

        let changed = locals != self.locals || stack != self.stack;
        self.locals = locals;
        self.stack = stack;
        Ok(changed)
    }

    /// Update the frame to reflect the effects of the given (non-branching) instruction
    ///
    /// `preceding_label` is the label right before the instruction (it identifies the allocation
    /// site of a `new`).
    pub fn verify_instruction(
        &mut self,
        insn: &Instruction,
        preceding_label: Option<Label>,
        this_class: &BinaryName,
    ) -> Result<(), VerifierErrorKind> {
        verify_instruction(self, this_class, insn, preceding_label)
    }

    /// Update the frame to reflect the effects of the given branching instruction
    pub fn verify_branch_instruction(
        &mut self,
        insn: &BranchInstruction,
        this_method_return_type: Option<&FieldType<BinaryName>>,
    ) -> Result<(), VerifierErrorKind> {
        verify_branch_instruction(self, this_method_return_type, insn)
    }
}

/// Merge local variables
///
/// Aligned values of the same width merge according to [`VType::merge`] (padding with `Top` if
/// the merged value is narrower). On a width mismatch, both sides are advanced until their
/// cumulative widths line up again and every word consumed along the way becomes `Top`. The
/// result is no longer than the shorter of the two inputs.
fn merge_locals(
    locals1: &OffsetVec<VType>,
    locals2: &OffsetVec<VType>,
    oracle: &dyn CommonSuperclass,
) -> OffsetVec<VType> {
    let mut merged = OffsetVec::new();
    let mut iter1 = locals1.iter().map(|(_, _, t)| t);
    let mut iter2 = locals2.iter().map(|(_, _, t)| t);

    while let (Some(t1), Some(t2)) = (iter1.next(), iter2.next()) {
        if t1.width() == t2.width() {
            let value = t1.merge(t2, oracle);
            let padding = t1.width() - value.width();
            merged.push(value);
            for _ in 0..padding {
                merged.push(VType::Top);
            }
            continue;
        }

        // Resynchronize
        let mut words1 = t1.width();
        let mut words2 = t2.width();
        while words1 != words2 {
            let advanced = if words1 < words2 {
                iter1.next().map(|t| words1 += t.width())
            } else {
                iter2.next().map(|t| words2 += t.width())
            };
            if advanced.is_none() {
                break;
            }
        }
        for _ in 0..words1.min(words2) {
            merged.push(VType::Top);
        }
    }

    merged
}

fn verify_instruction(
    frame: &mut VerifierFrame,
    this_class: &BinaryName,
    insn: &Instruction,
    preceding_label: Option<Label>,
) -> Result<(), VerifierErrorKind> {
    use Instruction::*;
    use VerificationType::*;

    let Frame { stack, locals } = frame;

    match insn {
        Nop => (),
        AConstNull => {
            stack.push(Null);
        }
        IConstM1 | IConst0 | IConst1 | IConst2 | IConst3 | IConst4 | IConst5 => {
            stack.push(Integer);
        }
        LConst0 | LConst1 => {
            stack.push(Long);
        }
        FConst0 | FConst1 | FConst2 => {
            stack.push(Float);
        }
        DConst0 | DConst1 => {
            stack.push(Double);
        }
        BiPush(_) | SiPush(_) => {
            stack.push(Integer);
        }
        Ldc(constant) => {
            stack.push(VType::of_constant(constant));
        }

        ILoad(offset) => {
            get_local_expecting_type(locals, *offset, Integer)?;
            stack.push(Integer);
        }
        LLoad(offset) => {
            get_local_expecting_type(locals, *offset, Long)?;
            stack.push(Long);
        }
        FLoad(offset) => {
            get_local_expecting_type(locals, *offset, Float)?;
            stack.push(Float);
        }
        DLoad(offset) => {
            get_local_expecting_type(locals, *offset, Double)?;
            stack.push(Double);
        }
        ALoad(offset) => {
            let typ = get_local(locals, *offset)?;
            if !typ.is_reference() {
                return Err(type_mismatch("reference", typ));
            }
            let typ = typ.clone();
            stack.push(typ);
        }

        IALoad => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_primitive_array(stack, &[BaseType::Int])?;
            stack.push(Integer);
        }
        LALoad => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_primitive_array(stack, &[BaseType::Long])?;
            stack.push(Long);
        }
        FALoad => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_primitive_array(stack, &[BaseType::Float])?;
            stack.push(Float);
        }
        DALoad => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_primitive_array(stack, &[BaseType::Double])?;
            stack.push(Double);
        }
        AALoad => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            let element = match pop_reference_array(stack)? {
                None => Null,
                Some(element_type) => Object(element_type),
            };
            stack.push(element);
        }
        BALoad => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_primitive_array(stack, &[BaseType::Byte, BaseType::Boolean])?;
            stack.push(Integer);
        }
        CALoad => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_primitive_array(stack, &[BaseType::Char])?;
            stack.push(Integer);
        }
        SALoad => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_primitive_array(stack, &[BaseType::Short])?;
            stack.push(Integer);
        }

        IStore(offset) => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            update_local_type(locals, *offset, Integer);
        }
        FStore(offset) => {
            pop_offset_vec_expecting_type(stack, Float)?;
            update_local_type(locals, *offset, Float);
        }
        LStore(offset) => {
            pop_offset_vec_expecting_type(stack, Long)?;
            update_local_type(locals, *offset, Long);
        }
        DStore(offset) => {
            pop_offset_vec_expecting_type(stack, Double)?;
            update_local_type(locals, *offset, Double);
        }
        AStore(offset) => {
            let popped_type = pop_offset_vec(stack)?;
            if !popped_type.is_reference() {
                return Err(type_mismatch("reference", &popped_type));
            }
            update_local_type(locals, *offset, popped_type);
        }

        IAStore => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_primitive_array(stack, &[BaseType::Int])?;
        }
        LAStore => {
            pop_offset_vec_expecting_type(stack, Long)?;
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_primitive_array(stack, &[BaseType::Long])?;
        }
        FAStore => {
            pop_offset_vec_expecting_type(stack, Float)?;
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_primitive_array(stack, &[BaseType::Float])?;
        }
        DAStore => {
            pop_offset_vec_expecting_type(stack, Double)?;
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_primitive_array(stack, &[BaseType::Double])?;
        }
        AAStore => {
            pop_initialized_reference(stack)?;
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_reference_array(stack)?;
        }
        BAStore => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_primitive_array(stack, &[BaseType::Byte, BaseType::Boolean])?;
        }
        CAStore => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_primitive_array(stack, &[BaseType::Char])?;
        }
        SAStore => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_primitive_array(stack, &[BaseType::Short])?;
        }

        Pop => {
            let _ = pop_offset_vec_expecting_width(stack, 1)?;
        }

        // Form 1 pops two narrow values, form 2 pops one wide value
        Pop2 => {
            let _ = pop_offset_vec_words(stack, 2)?;
        }

        Dup => {
            let arg1 = pop_offset_vec_expecting_width(stack, 1)?;
            stack.push(arg1.clone());
            stack.push(arg1);
        }

        DupX1 => {
            let arg1 = pop_offset_vec_expecting_width(stack, 1)?;
            let arg2 = pop_offset_vec_expecting_width(stack, 1)?;
            stack.push(arg1.clone());
            stack.push(arg2);
            stack.push(arg1);
        }

        // Form 1 reaches under two narrow values, form 2 under one wide value
        DupX2 => {
            let arg1 = pop_offset_vec_expecting_width(stack, 1)?;
            let under = pop_offset_vec_words(stack, 2)?;
            stack.push(arg1.clone());
            stack.extend(under);
            stack.push(arg1);
        }

        Dup2 => {
            let top = pop_offset_vec_words(stack, 2)?;
            stack.extend(top.iter().cloned());
            stack.extend(top);
        }

        Dup2X1 => {
            let top = pop_offset_vec_words(stack, 2)?;
            let arg = pop_offset_vec_expecting_width(stack, 1)?;
            stack.extend(top.iter().cloned());
            stack.push(arg);
            stack.extend(top);
        }

        Dup2X2 => {
            let top = pop_offset_vec_words(stack, 2)?;
            let under = pop_offset_vec_words(stack, 2)?;
            stack.extend(top.iter().cloned());
            stack.extend(under);
            stack.extend(top);
        }

        Swap => {
            let arg1 = pop_offset_vec_expecting_width(stack, 1)?;
            let arg2 = pop_offset_vec_expecting_width(stack, 1)?;
            stack.push(arg1);
            stack.push(arg2);
        }

        IAdd | ISub | IDiv | IMul | IRem | IAnd | IOr | IXor | ISh(_) => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_offset_vec_expecting_type(stack, Integer)?;
            stack.push(Integer);
        }

        LAdd | LSub | LDiv | LMul | LRem | LAnd | LOr | LXor => {
            pop_offset_vec_expecting_type(stack, Long)?;
            pop_offset_vec_expecting_type(stack, Long)?;
            stack.push(Long);
        }

        FAdd | FSub | FDiv | FMul | FRem => {
            pop_offset_vec_expecting_type(stack, Float)?;
            pop_offset_vec_expecting_type(stack, Float)?;
            stack.push(Float);
        }

        DAdd | DSub | DDiv | DMul | DRem => {
            pop_offset_vec_expecting_type(stack, Double)?;
            pop_offset_vec_expecting_type(stack, Double)?;
            stack.push(Double);
        }

        INeg | I2B | I2C | I2S => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            stack.push(Integer);
        }

        LNeg => {
            pop_offset_vec_expecting_type(stack, Long)?;
            stack.push(Long);
        }

        FNeg => {
            pop_offset_vec_expecting_type(stack, Float)?;
            stack.push(Float);
        }

        DNeg => {
            pop_offset_vec_expecting_type(stack, Double)?;
            stack.push(Double);
        }

        LSh(_) => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_offset_vec_expecting_type(stack, Long)?;
            stack.push(Long);
        }

        IInc(offset, _) => {
            get_local_expecting_type(locals, *offset, Integer)?;
        }

        I2L => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            stack.push(Long);
        }
        I2F => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            stack.push(Float);
        }
        I2D => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            stack.push(Double);
        }

        L2I => {
            pop_offset_vec_expecting_type(stack, Long)?;
            stack.push(Integer);
        }
        L2F => {
            pop_offset_vec_expecting_type(stack, Long)?;
            stack.push(Float);
        }
        L2D => {
            pop_offset_vec_expecting_type(stack, Long)?;
            stack.push(Double);
        }

        F2I => {
            pop_offset_vec_expecting_type(stack, Float)?;
            stack.push(Integer);
        }
        F2L => {
            pop_offset_vec_expecting_type(stack, Float)?;
            stack.push(Long);
        }
        F2D => {
            pop_offset_vec_expecting_type(stack, Float)?;
            stack.push(Double);
        }

        D2I => {
            pop_offset_vec_expecting_type(stack, Double)?;
            stack.push(Integer);
        }
        D2L => {
            pop_offset_vec_expecting_type(stack, Double)?;
            stack.push(Long);
        }
        D2F => {
            pop_offset_vec_expecting_type(stack, Double)?;
            stack.push(Float);
        }

        LCmp => {
            pop_offset_vec_expecting_type(stack, Long)?;
            pop_offset_vec_expecting_type(stack, Long)?;
            stack.push(Integer);
        }
        FCmp(_) => {
            pop_offset_vec_expecting_type(stack, Float)?;
            pop_offset_vec_expecting_type(stack, Float)?;
            stack.push(Integer);
        }
        DCmp(_) => {
            pop_offset_vec_expecting_type(stack, Double)?;
            pop_offset_vec_expecting_type(stack, Double)?;
            stack.push(Integer);
        }

        GetStatic(field) => {
            stack.push(VType::of(&field.descriptor));
        }
        PutStatic(field) => {
            pop_offset_vec_expecting_field_type(stack, &field.descriptor)?;
        }

        GetField(field) => {
            pop_initialized_reference(stack)?;
            stack.push(VType::of(&field.descriptor));
        }
        PutField(field) => {
            pop_offset_vec_expecting_field_type(stack, &field.descriptor)?;

            // Constructors may set their own fields before calling the super constructor
            let receiver = pop_offset_vec(stack)?;
            let is_valid_receiver = match &receiver {
                Null | Object(_) => true,
                UninitializedThis => field.class == *this_class,
                _ => false,
            };
            if !is_valid_receiver {
                return Err(type_mismatch(field.class.as_ref(), &receiver));
            }
        }

        Invoke(invoke_type, method) => {
            let desc = &method.descriptor;

            // Check that all the arguments match
            for expected_arg_type in desc.parameters.iter().rev() {
                if let Err(err) = pop_offset_vec_expecting_field_type(stack, expected_arg_type) {
                    log::error!(
                        "Incompatible argument types: {} (for {})",
                        err,
                        desc.render(),
                    );
                    return Err(err);
                }
            }

            if let (InvokeType::Special, true) = (invoke_type, method.is_constructor()) {
                // Initialize
                let receiver = pop_offset_vec(stack)?;
                if !receiver.is_uninitialized() {
                    log::error!(
                        "Constructor called on {:?} (for {})",
                        receiver,
                        desc.render(),
                    );
                    return Err(type_mismatch("uninitialized reference", &receiver));
                }
                frame.erase(&receiver, this_class);
            } else {
                // Pop off the receiver type
                if *invoke_type != InvokeType::Static {
                    if let Err(err) = pop_initialized_reference(stack) {
                        log::error!("Incompatible receiver: {} (for {})", err, desc.render());
                        return Err(err);
                    }
                }
            }

            // Push the return type
            if let Some(return_type) = &desc.return_type {
                frame.stack.push(VType::of(return_type));
            }
        }

        InvokeDynamic(invoke_dynamic) => {
            for expected_arg_type in invoke_dynamic.descriptor.parameters.iter().rev() {
                pop_offset_vec_expecting_field_type(stack, expected_arg_type)?;
            }

            if let Some(return_type) = &invoke_dynamic.descriptor.return_type {
                stack.push(VType::of(return_type));
            }
        }

        New(class) => {
            let site = preceding_label.ok_or(VerifierErrorKind::MissingAllocationSite)?;
            stack.push(VType::of_new(class, site));
        }
        NewArray(base_type) => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            stack.push(Object(RefType::array(FieldType::Base(*base_type))));
        }
        ANewArray(ref_type) => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            stack.push(Object(RefType::array(FieldType::Ref(ref_type.clone()))));
        }
        MultiANewArray(ref_type, dimensions) => {
            for _ in 0..*dimensions {
                pop_offset_vec_expecting_type(stack, Integer)?;
            }
            stack.push(Object(ref_type.clone()));
        }
        ArrayLength => {
            match pop_offset_vec(stack)? {
                Null | Object(RefType::PrimitiveArray(_) | RefType::ObjectArray(_)) => (),
                other if other.is_reference() => {
                    return Err(VerifierErrorKind::ArrayTypeMismatch(other))
                }
                other => return Err(type_mismatch("array", &other)),
            }
            stack.push(Integer);
        }

        CheckCast(ref_type) => {
            pop_initialized_reference(stack)?;
            stack.push(Object(ref_type.clone()));
        }
        InstanceOf(_) => {
            pop_initialized_reference(stack)?;
            stack.push(Integer);
        }

        MonitorEnter | MonitorExit => {
            pop_initialized_reference(stack)?;
        }
    }

    Ok(())
}

fn verify_branch_instruction(
    frame: &mut VerifierFrame,
    this_method_return_type: Option<&FieldType<BinaryName>>,
    insn: &BranchInstruction,
) -> Result<(), VerifierErrorKind> {
    use BranchInstruction::*;
    use VerificationType::*;

    let Frame { stack, .. } = frame;

    let expect_return = |expected: bool| {
        if expected {
            Ok(())
        } else {
            let msg = match this_method_return_type {
                Some(ret_type) => ret_type.render(),
                None => String::from("V"),
            };
            log::error!("Return instruction {:?} does not match return type {}", insn, msg);
            Err(VerifierErrorKind::TypeMismatch {
                expected: msg,
                found: Top,
            })
        }
    };

    match insn {
        If(_, _) => pop_offset_vec_expecting_type(stack, Integer)?,
        IfICmp(_, _) => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_offset_vec_expecting_type(stack, Integer)?;
        }
        IfACmp(_, _) => {
            let atype_1 = pop_offset_vec(stack)?;
            let atype_2 = pop_offset_vec(stack)?;
            if !atype_1.is_reference() {
                return Err(type_mismatch("reference", &atype_1));
            }
            if !atype_2.is_reference() {
                return Err(type_mismatch("reference", &atype_2));
            }
        }
        IfNull(_, _) => {
            let atype = pop_offset_vec(stack)?;
            if !atype.is_reference() {
                return Err(type_mismatch("reference", &atype));
            }
        }
        Goto(_) => (),
        TableSwitch { .. } | LookupSwitch { .. } => {
            pop_offset_vec_expecting_type(stack, Integer)?
        }
        IReturn => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            expect_return(matches!(
                this_method_return_type,
                Some(FieldType::Base(
                    BaseType::Int
                        | BaseType::Char
                        | BaseType::Short
                        | BaseType::Byte
                        | BaseType::Boolean
                ))
            ))?;
        }
        LReturn => {
            pop_offset_vec_expecting_type(stack, Long)?;
            expect_return(this_method_return_type == Some(&FieldType::long()))?;
        }
        FReturn => {
            pop_offset_vec_expecting_type(stack, Float)?;
            expect_return(this_method_return_type == Some(&FieldType::float()))?;
        }
        DReturn => {
            pop_offset_vec_expecting_type(stack, Double)?;
            expect_return(this_method_return_type == Some(&FieldType::double()))?;
        }
        AReturn => {
            pop_initialized_reference(stack)?;
            expect_return(matches!(this_method_return_type, Some(FieldType::Ref(_))))?;
        }
        Return => {
            expect_return(this_method_return_type.is_none())?;
        }
        AThrow => {
            let atype = pop_initialized_reference(stack)?;
            stack.clear();
            stack.push(atype);
        }
        Jsr(_) => return Err(VerifierErrorKind::ObsoleteOpcode("jsr")),
        Ret(_) => return Err(VerifierErrorKind::ObsoleteOpcode("ret")),
    }

    Ok(())
}

fn type_mismatch(expected: impl Into<String>, found: &VType) -> VerifierErrorKind {
    VerifierErrorKind::TypeMismatch {
        expected: expected.into(),
        found: found.clone(),
    }
}

fn get_local<C, U>(
    locals: &OffsetVec<VerificationType<C, U>>,
    offset: u16,
) -> Result<&VerificationType<C, U>, VerifierErrorKind> {
    match locals.get_offset(Offset(offset as usize)) {
        OffsetResult::Ok(_, VerificationType::Top)
        | OffsetResult::InvalidOffset(_)
        | OffsetResult::TooLarge => Err(VerifierErrorKind::LoadInvalid(offset)),
        OffsetResult::Ok(_, typ) => Ok(typ),
    }
}

fn get_local_expecting_type(
    locals: &OffsetVec<VType>,
    offset: u16,
    expected_type: VType,
) -> Result<(), VerifierErrorKind> {
    let typ = get_local(locals, offset)?;
    if *typ == expected_type {
        Ok(())
    } else {
        Err(type_mismatch(format!("{:?}", expected_type), typ))
    }
}

/// Store a value into a local variable slot
///
/// Wide values which are partially overwritten have their remaining word replaced by `Top`, as
/// do the words skipped over when storing past the current end of the locals.
fn update_local_type<C, U>(
    locals: &mut OffsetVec<VerificationType<C, U>>,
    offset: u16,
    new_type: VerificationType<C, U>,
) {
    let offset = Offset(offset as usize);
    while locals.offset_len() < offset {
        locals.push(VerificationType::Top);
    }

    let (mut index, start) = match locals.index_containing(offset) {
        None => {
            locals.push(new_type);
            return;
        }
        Some(found) => found,
    };

    // Split a wide value whose second word is being overwritten
    if start != offset {
        locals.splice(index..index + 1, [VerificationType::Top, VerificationType::Top]);
        index += 1;
    }

    let new_width = new_type.width();
    let old_width = locals
        .get_index(index)
        .map_or(new_width, |(_, old_type)| old_type.width());
    if new_width == old_width {
        locals.splice(index..index + 1, [new_type]);
    } else if new_width < old_width {
        locals.splice(index..index + 1, [new_type, VerificationType::Top]);
    } else {
        match locals.get_index(index + 1).map(|(_, next)| next.width()) {
            None => locals.splice(index..index + 1, [new_type]),
            Some(1) => locals.splice(index..index + 2, [new_type]),
            Some(_) => locals.splice(index..index + 2, [new_type, VerificationType::Top]),
        }
    }
}

fn pop_offset_vec<C, U>(
    stack: &mut OffsetVec<VerificationType<C, U>>,
) -> Result<VerificationType<C, U>, VerifierErrorKind> {
    stack
        .pop()
        .map(|(_, _, typ)| typ)
        .ok_or(VerifierErrorKind::EmptyStack)
}

fn pop_offset_vec_expecting_width(
    stack: &mut OffsetVec<VType>,
    expected_width: usize,
) -> Result<VType, VerifierErrorKind> {
    let typ = pop_offset_vec(stack)?;
    let found_width = typ.width();
    if found_width == expected_width {
        Ok(typ)
    } else {
        Err(VerifierErrorKind::SizeMismatch {
            expected: expected_width,
            found: found_width,
        })
    }
}

/// Pop values until exactly `words` words have been popped (returned bottom first)
fn pop_offset_vec_words(
    stack: &mut OffsetVec<VType>,
    words: usize,
) -> Result<Vec<VType>, VerifierErrorKind> {
    let mut popped = vec![];
    let mut popped_words = 0;
    while popped_words < words {
        let typ = pop_offset_vec(stack)?;
        popped_words += typ.width();
        popped.push(typ);
    }
    if popped_words != words {
        return Err(VerifierErrorKind::SizeRangeMismatch(words));
    }
    popped.reverse();
    Ok(popped)
}

fn pop_offset_vec_expecting_type(
    stack: &mut OffsetVec<VType>,
    expected_type: VType,
) -> Result<(), VerifierErrorKind> {
    let typ = pop_offset_vec(stack)?;
    if typ == expected_type {
        Ok(())
    } else {
        Err(type_mismatch(format!("{:?}", expected_type), &typ))
    }
}

/// Pop a value that can be passed where the field type is expected
///
/// Reference types are not checked for assignability (that would need the full class
/// hierarchy), but they must at least be initialized references.
fn pop_offset_vec_expecting_field_type(
    stack: &mut OffsetVec<VType>,
    expected_type: &FieldType<BinaryName>,
) -> Result<(), VerifierErrorKind> {
    match expected_type {
        FieldType::Base(_) => pop_offset_vec_expecting_type(stack, VType::of(expected_type)),
        FieldType::Ref(_) => pop_initialized_reference(stack).map(|_| ()),
    }
}

/// Pop `null` or an object type
fn pop_initialized_reference(stack: &mut OffsetVec<VType>) -> Result<VType, VerifierErrorKind> {
    let typ = pop_offset_vec(stack)?;
    match typ {
        VerificationType::Null | VerificationType::Object(_) => Ok(typ),
        _ => Err(type_mismatch("initialized reference", &typ)),
    }
}

/// Pop `null` or a one-dimensional array whose elements have one of the given types
fn pop_primitive_array(
    stack: &mut OffsetVec<VType>,
    element_types: &[BaseType],
) -> Result<(), VerifierErrorKind> {
    let typ = pop_offset_vec(stack)?;
    match &typ {
        VerificationType::Null => Ok(()),
        VerificationType::Object(RefType::PrimitiveArray(arr))
            if arr.additional_dimensions == 0 && element_types.contains(&arr.element_type) =>
        {
            Ok(())
        }
        _ if typ.is_reference() => Err(VerifierErrorKind::ArrayTypeMismatch(typ)),
        _ => Err(type_mismatch("array", &typ)),
    }
}

/// Pop `null` or an array of references, returning the element type
fn pop_reference_array(
    stack: &mut OffsetVec<VType>,
) -> Result<Option<RefType<BinaryName>>, VerifierErrorKind> {
    let typ = pop_offset_vec(stack)?;
    match &typ {
        VerificationType::Null => Ok(None),
        VerificationType::Object(array_type) => match array_type.element_type() {
            Some(FieldType::Ref(element_type)) => Ok(Some(element_type)),
            _ => Err(VerifierErrorKind::ArrayTypeMismatch(typ)),
        },
        _ if typ.is_reference() => Err(VerifierErrorKind::ArrayTypeMismatch(typ)),
        _ => Err(type_mismatch("array", &typ)),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_graph::ClassHierarchy;
    use crate::jvm::code::Instruction::*;
    use crate::jvm::code::{LabelGenerator, MethodRef};
    use crate::jvm::{MethodAccessFlags, Name};
    use VerificationType::*;

    fn new_frame<const N: usize, const M: usize>(
        locals: [VType; N],
        stack: [VType; M],
    ) -> VerifierFrame {
        Frame {
            locals: OffsetVec::from(locals),
            stack: OffsetVec::from(stack),
        }
    }

    fn my_class() -> BinaryName {
        BinaryName::from_str("MyClass").unwrap()
    }

    fn locals_of(frame: &VerifierFrame) -> Vec<VType> {
        frame.locals.iter().map(|(_, _, t)| t.clone()).collect()
    }

    #[test]
    fn arithmetic() {
        let binops = [
            (Integer, vec![IAdd, ISub, IDiv, IMul, IRem, IAnd, IOr, IXor]),
            (Long, vec![LAdd, LSub, LDiv, LMul, LRem, LAnd, LOr, LXor]),
            (Float, vec![FAdd, FSub, FDiv, FMul, FRem]),
            (Double, vec![DAdd, DSub, DDiv, DMul, DRem]),
        ];

        for (good_typ, instructions) in binops {
            for instruction in instructions {
                // Try a bunch of different types
                for typ in [Integer, Long, Float, Double, Null, UninitializedThis] {
                    let mut frame_in = new_frame([], [typ.clone(), typ.clone()]);
                    let frame_out = new_frame([], [typ.clone()]);
                    let result = frame_in.verify_instruction(&instruction, None, &my_class());
                    if typ == good_typ {
                        assert!(result.is_ok(), "Verification of {:?}", instruction);
                        assert_eq!(
                            frame_in, frame_out,
                            "Verification output frame of {:?}",
                            instruction
                        );
                    } else {
                        assert!(
                            matches!(result, Err(VerifierErrorKind::TypeMismatch { .. })),
                            "Verification of {:?}",
                            instruction
                        );
                    }
                }

                // Try with a stack that is too small
                let mut frame_in = new_frame([], [good_typ.clone()]);
                assert_eq!(
                    frame_in.verify_instruction(&instruction, None, &my_class()),
                    Err(VerifierErrorKind::EmptyStack),
                    "Verification of {:?}",
                    instruction
                );
            }
        }
    }

    #[test]
    fn stack_primitives() {
        let mut frame = new_frame([], [Integer, Long]);
        assert_eq!(frame.fetch(0), Ok(&Long));
        assert_eq!(frame.fetch(1), Ok(&Integer));
        assert_eq!(frame.fetch(2), Err(VerifierErrorKind::EmptyStack));

        frame.insert(1, Float).unwrap();
        assert_eq!(frame, new_frame([], [Integer, Float, Long]));
        assert_eq!(frame.stack.offset_len(), Offset(4));

        assert_eq!(frame.pop(), Ok(Long));
        frame.clear();
        assert_eq!(frame.pop(), Err(VerifierErrorKind::EmptyStack));
    }

    #[test]
    fn dup_x2_over_long() {
        // ..., long, int -> ..., int, long, int
        let mut frame = new_frame([], [Long, Integer]);
        frame.verify_instruction(&DupX2, None, &my_class()).unwrap();
        assert_eq!(frame, new_frame([], [Integer, Long, Integer]));
        assert_eq!(frame.stack.offset_len(), Offset(4));

        // Form 1: three narrow values
        let mut frame = new_frame([], [Float, Null, Integer]);
        frame.verify_instruction(&DupX2, None, &my_class()).unwrap();
        assert_eq!(frame, new_frame([], [Integer, Float, Null, Integer]));

        // The value being duplicated must be narrow
        let mut frame = new_frame([], [Integer, Long]);
        assert_eq!(
            frame.verify_instruction(&DupX2, None, &my_class()),
            Err(VerifierErrorKind::SizeMismatch {
                expected: 1,
                found: 2
            })
        );
    }

    #[test]
    fn two_word_shuffles() {
        let mut frame = new_frame([], [Integer, Float]);
        frame.verify_instruction(&Dup2, None, &my_class()).unwrap();
        assert_eq!(frame, new_frame([], [Integer, Float, Integer, Float]));

        let mut frame = new_frame([], [Float, Double]);
        frame.verify_instruction(&Dup2X1, None, &my_class()).unwrap();
        assert_eq!(frame, new_frame([], [Double, Float, Double]));

        let mut frame = new_frame([], [Long, Integer, Integer]);
        frame.verify_instruction(&Dup2X2, None, &my_class()).unwrap();
        assert_eq!(
            frame,
            new_frame([], [Integer, Integer, Long, Integer, Integer])
        );

        let mut frame = new_frame([], [Long, Integer]);
        assert_eq!(
            frame.verify_instruction(&Pop2, None, &my_class()),
            Err(VerifierErrorKind::SizeRangeMismatch(2))
        );

        let mut frame = new_frame([], [Integer, Long]);
        assert_eq!(
            frame.verify_instruction(&Swap, None, &my_class()),
            Err(VerifierErrorKind::SizeMismatch {
                expected: 1,
                found: 2
            })
        );
    }

    #[test]
    fn local_realignment() {
        // Narrow over the first word of a wide value
        let mut frame = new_frame([Integer, Long, Float], []);
        frame.store(1, Null);
        assert_eq!(locals_of(&frame), vec![Integer, Null, Top, Float]);

        // Narrow over the second word of a wide value
        let mut frame = new_frame([Integer, Long, Float], []);
        frame.store(2, Null);
        assert_eq!(locals_of(&frame), vec![Integer, Top, Null, Float]);

        // Wide over two narrow values
        let mut frame = new_frame([Integer, Float, Null, Float], []);
        frame.store(1, Double);
        assert_eq!(locals_of(&frame), vec![Integer, Double, Float]);

        // Wide over a narrow value followed by a wide value
        let mut frame = new_frame([Integer, Long], []);
        frame.store(0, Double);
        assert_eq!(locals_of(&frame), vec![Double, Top]);

        // Wide straddling two wide values
        let mut frame = new_frame([Long, Long], []);
        frame.store(1, Double);
        assert_eq!(locals_of(&frame), vec![Top, Double, Top]);

        // Past the end
        let mut frame = new_frame([Integer], []);
        frame.store(3, Long);
        assert_eq!(locals_of(&frame), vec![Integer, Top, Top, Long]);
        assert_eq!(frame.locals.offset_len(), Offset(5));

        // Loading the invalidated words fails
        assert_eq!(frame.load(1), Err(VerifierErrorKind::LoadInvalid(1)));
        assert_eq!(frame.load(4), Err(VerifierErrorKind::LoadInvalid(4)));
        assert_eq!(frame.load(5), Err(VerifierErrorKind::LoadInvalid(5)));
        assert_eq!(frame.load(3), Ok(&Long));
    }

    #[test]
    fn merge_realigns_locals() {
        let hierarchy = ClassHierarchy::with_java_lang();

        // One path stored a long over slots 1-2, the other kept two ints there
        let mut frame = new_frame([Integer, Long, Float], []);
        let other = new_frame([Integer, Integer, Integer, Float], []);
        assert_eq!(frame.merge(&other, &hierarchy), Ok(true));
        assert_eq!(locals_of(&frame), vec![Integer, Top, Top, Float]);

        // Merging again is a no-op
        assert_eq!(frame.merge(&other, &hierarchy), Ok(false));

        // The shorter side decides the length
        let mut frame = new_frame([Integer, Float], []);
        assert_eq!(frame.merge(&new_frame([Integer], []), &hierarchy), Ok(true));
        assert_eq!(locals_of(&frame), vec![Integer]);
    }

    #[test]
    fn merge_with_several_width_mismatches() {
        let hierarchy = ClassHierarchy::with_java_lang();

        // Words: I | L L | F | I | I
        //   vs:  L L | I | F | L L
        let mut frame = new_frame([Integer, Long, Float, Integer, Integer], []);
        let other = new_frame([Long, Integer, Float, Long], []);
        assert_eq!(frame.merge(&other, &hierarchy), Ok(true));
        assert_eq!(locals_of(&frame), vec![Top, Top, Top, Float, Top, Top]);
        assert_eq!(frame.snapshot().locals, vec![Top, Top, Top, Float]);

        // Mismatch running into the end of the shorter side
        let mut frame = new_frame([Integer, Long, Integer], []);
        let other = new_frame([Long, Integer, Long], []);
        assert_eq!(frame.merge(&other, &hierarchy), Ok(true));
        assert_eq!(locals_of(&frame), vec![Top, Top, Top, Top]);
    }

    #[test]
    fn merge_stacks() {
        let hierarchy = ClassHierarchy::with_java_lang();
        let string = Object(RefType::STRING);

        let mut frame = new_frame([], [Integer, Null]);
        assert_eq!(
            frame.merge(&new_frame([], [Integer, string.clone()]), &hierarchy),
            Ok(true)
        );
        assert_eq!(frame, new_frame([], [Integer, string]));

        assert_eq!(
            frame.merge(&new_frame([], [Integer]), &hierarchy),
            Err(VerifierErrorKind::StackDepthMismatch {
                expected: 2,
                found: 1
            })
        );
        assert!(frame
            .merge(&new_frame([], [Long]), &hierarchy)
            .is_err());
    }

    #[test]
    fn constructors() {
        let mut labels = LabelGenerator::new();
        let site = labels.fresh_label();
        let object = MethodRef::parse("java/lang/Object", "<init>", "()V", false).unwrap();
        let method =
            MethodInfo::parse("MyClass", "<init>", "(I)V", MethodAccessFlags::PUBLIC).unwrap();

        let mut frame = VerifierFrame::initial(&method);
        assert_eq!(locals_of(&frame), vec![UninitializedThis, Integer]);

        // `new` needs its allocation site
        assert_eq!(
            frame.verify_instruction(&New(BinaryName::OBJECT), None, &my_class()),
            Err(VerifierErrorKind::MissingAllocationSite)
        );
        frame
            .verify_instruction(&New(BinaryName::OBJECT), Some(site), &my_class())
            .unwrap();
        frame.verify_instruction(&Dup, None, &my_class()).unwrap();
        frame.verify_instruction(&AStore(2), None, &my_class()).unwrap();
        let uninitialized = VType::of_new(&BinaryName::OBJECT, site);
        assert_eq!(frame.load(2), Ok(&uninitialized));

        // Calling a method on an uninitialized value is not allowed
        let to_string =
            MethodRef::parse("java/lang/Object", "toString", "()Ljava/lang/String;", false)
                .unwrap();
        let mut bad = frame.clone();
        assert!(bad
            .verify_instruction(&Invoke(InvokeType::Virtual, to_string), None, &my_class())
            .is_err());

        // Initializing the allocated object updates every copy of it
        frame
            .verify_instruction(&Invoke(InvokeType::Special, object.clone()), None, &my_class())
            .unwrap();
        assert_eq!(frame.load(2), Ok(&Object(RefType::OBJECT)));
        assert!(frame.stack.is_empty());

        // Then the super constructor initializes `this`
        frame.verify_instruction(&ALoad(0), None, &my_class()).unwrap();
        frame
            .verify_instruction(&Invoke(InvokeType::Special, object), None, &my_class())
            .unwrap();
        assert_eq!(frame.load(0), Ok(&Object(RefType::Object(my_class()))));
    }

    #[test]
    fn array_access() {
        let int_array = Object(RefType::array(FieldType::int()));
        let strings = Object(RefType::array(FieldType::object(BinaryName::STRING)));

        let mut frame = new_frame([], [int_array.clone(), Integer]);
        frame.verify_instruction(&IALoad, None, &my_class()).unwrap();
        assert_eq!(frame, new_frame([], [Integer]));

        let mut frame = new_frame([], [strings.clone(), Integer]);
        frame.verify_instruction(&AALoad, None, &my_class()).unwrap();
        assert_eq!(frame, new_frame([], [Object(RefType::STRING)]));

        let mut frame = new_frame([], [Null, Integer]);
        frame.verify_instruction(&AALoad, None, &my_class()).unwrap();
        assert_eq!(frame, new_frame([], [Null]));

        let mut frame = new_frame([], [Object(RefType::STRING), Integer]);
        assert_eq!(
            frame.verify_instruction(&AALoad, None, &my_class()),
            Err(VerifierErrorKind::ArrayTypeMismatch(Object(RefType::STRING)))
        );

        let mut frame = new_frame([], [strings, Integer]);
        assert!(matches!(
            frame.verify_instruction(&IALoad, None, &my_class()),
            Err(VerifierErrorKind::ArrayTypeMismatch(_))
        ));

        let mut frame = new_frame([], [int_array]);
        frame.verify_instruction(&ArrayLength, None, &my_class()).unwrap();
        assert_eq!(frame, new_frame([], [Integer]));
    }

    #[test]
    fn returns() {
        let int = FieldType::int();
        let string = FieldType::object(BinaryName::STRING);

        let mut frame = new_frame([], [Integer]);
        assert!(frame
            .verify_branch_instruction(&BranchInstruction::IReturn, Some(&int))
            .is_ok());

        let mut frame = new_frame([], [Integer]);
        assert!(frame
            .verify_branch_instruction(&BranchInstruction::IReturn, None)
            .is_err());

        let mut frame = new_frame([], [Null]);
        assert!(frame
            .verify_branch_instruction(&BranchInstruction::AReturn, Some(&string))
            .is_ok());

        let mut frame = new_frame([], []);
        assert_eq!(
            frame.verify_branch_instruction(&BranchInstruction::Ret(1), None),
            Err(VerifierErrorKind::ObsoleteOpcode("ret"))
        );
    }
}
