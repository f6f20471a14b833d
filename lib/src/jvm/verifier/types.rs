use crate::jvm::class_graph::CommonSuperclass;
use crate::jvm::code::{Constant, Label};
use crate::jvm::{BaseType, BinaryName, FieldType, RefType};
use crate::util::Width;

/// These types are from [this hierarchy][0]
///
/// The type is generic so that it can be used both during the analysis (with [`RefType`] classes
/// and [`UninitializedRefType`] allocation sites) and for serialization (with constant pool
/// indices and bytecode offsets).
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se7/html/jvms-4.html#jvms-4.10.1.2
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum VerificationType<Cls, U> {
    /// Unusable slot: never set, the second word of a `long` or `double`, or the result of
    /// merging incompatible types
    Top,

    Integer,
    Float,
    Double,
    Long,
    Null,

    /// In the constructor, the `this` parameter starts with this type then turns into an object
    /// type after `<init>` is called
    UninitializedThis,

    /// Object type
    Object(Cls),

    /// State of an object after `new` has been called but `<init>` has not been called
    Uninitialized(U),
}

/// Verification type used throughout the analysis
pub type VType = VerificationType<RefType<BinaryName>, UninitializedRefType>;

/// After a `new` instruction, the top of the stack will contain an uninitialized value. The stack
/// map frame only records where that `new` instruction is, but while analyzing we also want to
/// know the type the value will have once it is initialized.
///
/// Each allocation site is identified by the label placed right before the `new` instruction, so
/// two uninitialized values are the same exactly when they were produced by the same `new`.
#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct UninitializedRefType {
    /// Once the type is initialized, what will it be?
    pub class: BinaryName,

    /// Label immediately preceding the `new` instruction
    pub site: Label,
}

impl<Cls, U> VerificationType<Cls, U> {
    /// Is this type is a reference type?
    pub fn is_reference(&self) -> bool {
        match self {
            VerificationType::Top
            | VerificationType::Integer
            | VerificationType::Float
            | VerificationType::Double
            | VerificationType::Long => false,

            VerificationType::Null
            | VerificationType::UninitializedThis
            | VerificationType::Object(_)
            | VerificationType::Uninitialized(_) => true,
        }
    }

    /// Is this a reference which has not gone through its constructor yet?
    pub fn is_uninitialized(&self) -> bool {
        matches!(
            self,
            VerificationType::UninitializedThis | VerificationType::Uninitialized(_)
        )
    }

    pub fn map<C2, U2>(
        &self,
        map_class: impl Fn(&Cls) -> C2,
        map_uninitialized: impl Fn(&U) -> U2,
    ) -> VerificationType<C2, U2> {
        match self {
            VerificationType::Top => VerificationType::Top,
            VerificationType::Integer => VerificationType::Integer,
            VerificationType::Float => VerificationType::Float,
            VerificationType::Long => VerificationType::Long,
            VerificationType::Double => VerificationType::Double,
            VerificationType::Null => VerificationType::Null,
            VerificationType::UninitializedThis => VerificationType::UninitializedThis,
            VerificationType::Object(cls) => VerificationType::Object(map_class(cls)),
            VerificationType::Uninitialized(uninit) => {
                VerificationType::Uninitialized(map_uninitialized(uninit))
            }
        }
    }

    /// Fallible version of [`Self::map`]
    pub fn try_map<C2, U2, E>(
        &self,
        map_class: impl Fn(&Cls) -> Result<C2, E>,
        map_uninitialized: impl Fn(&U) -> Result<U2, E>,
    ) -> Result<VerificationType<C2, U2>, E> {
        Ok(match self {
            VerificationType::Top => VerificationType::Top,
            VerificationType::Integer => VerificationType::Integer,
            VerificationType::Float => VerificationType::Float,
            VerificationType::Long => VerificationType::Long,
            VerificationType::Double => VerificationType::Double,
            VerificationType::Null => VerificationType::Null,
            VerificationType::UninitializedThis => VerificationType::UninitializedThis,
            VerificationType::Object(cls) => VerificationType::Object(map_class(cls)?),
            VerificationType::Uninitialized(uninit) => {
                VerificationType::Uninitialized(map_uninitialized(uninit)?)
            }
        })
    }
}

impl<Cls, U> Width for VerificationType<Cls, U> {
    fn width(&self) -> usize {
        match self {
            VerificationType::Double | VerificationType::Long => 2,
            _ => 1,
        }
    }
}

/// Sub-`int` integral types collapse into `Integer`
impl<C, U> From<FieldType<C>> for VerificationType<RefType<C>, U> {
    fn from(field_type: FieldType<C>) -> Self {
        match field_type {
            FieldType::Base(BaseType::Int)
            | FieldType::Base(BaseType::Char)
            | FieldType::Base(BaseType::Short)
            | FieldType::Base(BaseType::Byte)
            | FieldType::Base(BaseType::Boolean) => VerificationType::Integer,
            FieldType::Base(BaseType::Float) => VerificationType::Float,
            FieldType::Base(BaseType::Long) => VerificationType::Long,
            FieldType::Base(BaseType::Double) => VerificationType::Double,
            FieldType::Ref(ref_type) => VerificationType::Object(ref_type),
        }
    }
}

impl VType {
    /// Representative of a value of the given type
    pub fn of(field_type: &FieldType<BinaryName>) -> VType {
        VType::from(field_type.clone())
    }

    /// Representative of a value of the given type, or `Null` if there is no type
    pub fn of_null(field_type: Option<&FieldType<BinaryName>>) -> VType {
        field_type.map_or(VerificationType::Null, VType::of)
    }

    /// Type of the receiver in an instance method of `class`
    pub fn of_this(class: &BinaryName, uninitialized: bool) -> VType {
        if uninitialized {
            VerificationType::UninitializedThis
        } else {
            VerificationType::Object(RefType::Object(class.clone()))
        }
    }

    /// Type of the value pushed by the `new` instruction following `site`
    pub fn of_new(class: &BinaryName, site: Label) -> VType {
        VerificationType::Uninitialized(UninitializedRefType {
            class: class.clone(),
            site,
        })
    }

    /// Type pushed by loading a constant
    pub fn of_constant(constant: &Constant) -> VType {
        match constant {
            Constant::Integer(_) => VerificationType::Integer,
            Constant::Float(_) => VerificationType::Float,
            Constant::Long(_) => VerificationType::Long,
            Constant::Double(_) => VerificationType::Double,
            Constant::String(_) => VerificationType::Object(RefType::STRING),
            Constant::Class(_) => VerificationType::Object(RefType::CLASS),
            Constant::MethodType(_) => VerificationType::Object(RefType::METHODTYPE),
            Constant::MethodHandle(_) | Constant::FieldHandle(_) => {
                VerificationType::Object(RefType::METHODHANDLE)
            }
        }
    }

    /// Type this value has once its constructor has run
    ///
    /// Initialized values are returned unchanged, so erasing twice is the same as erasing once.
    pub fn erase(&self, this_class: &BinaryName) -> VType {
        match self {
            VerificationType::UninitializedThis => {
                VerificationType::Object(RefType::Object(this_class.clone()))
            }
            VerificationType::Uninitialized(uninit) => {
                VerificationType::Object(RefType::Object(uninit.class.clone()))
            }
            other => other.clone(),
        }
    }

    /// Merge two values flowing into the same slot
    ///
    ///   - `Top` absorbs everything
    ///   - equal values are unchanged
    ///   - `Null` merges into the other reference
    ///   - an uninitialized value meeting an initialized reference to the same class stays
    ///     uninitialized
    ///   - two object types merge into their common superclass
    ///
    /// Anything else (including uninitialized values meeting other types) is `Top`. Note that
    /// the result can be narrower than the inputs (`Long` and `Double` merge into `Top`).
    pub fn merge(&self, other: &VType, oracle: &dyn CommonSuperclass) -> VType {
        use VerificationType::*;

        match (self, other) {
            (Top, _) | (_, Top) => Top,
            _ if self == other => self.clone(),

            (Null, Object(_)) => other.clone(),
            (Object(_), Null) => self.clone(),

            (Uninitialized(uninit), Object(RefType::Object(cls)))
            | (Object(RefType::Object(cls)), Uninitialized(uninit))
                if uninit.class == *cls =>
            {
                Uninitialized(uninit.clone())
            }

            (Object(ref1), Object(ref2)) => Object(oracle.common_superclass(ref1, ref2)),

            _ => Top,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_graph::ClassHierarchy;
    use crate::jvm::code::LabelGenerator;
    use crate::jvm::Name;
    use VerificationType::*;

    #[test]
    fn sub_int_types_collapse() {
        for field_type in [
            FieldType::int(),
            FieldType::char(),
            FieldType::short(),
            FieldType::byte(),
            FieldType::boolean(),
        ] {
            assert_eq!(VType::of(&field_type), Integer);
        }
        assert_eq!(VType::of(&FieldType::long()).width(), 2);
        assert_eq!(VType::of_null(None), Null);
        assert!(VType::of_constant(&Constant::String(String::from("hi"))).is_reference());
        assert!(!Top::<RefType<BinaryName>, UninitializedRefType>.is_reference());
    }

    #[test]
    fn merge_rules() {
        let hierarchy = ClassHierarchy::with_java_lang();
        let string = Object(RefType::STRING);
        let class = Object(RefType::CLASS);

        assert_eq!(Top.merge(&Integer, &hierarchy), Top);
        assert_eq!(Integer.merge(&Top, &hierarchy), Top);
        assert_eq!(Integer.merge(&Integer, &hierarchy), Integer);
        assert_eq!(Integer.merge(&Float, &hierarchy), Top);
        assert_eq!(Long.merge(&Double, &hierarchy), Top);
        assert_eq!(Null.merge(&string, &hierarchy), string);
        assert_eq!(string.merge(&Null, &hierarchy), string);
        assert_eq!(string.merge(&class, &hierarchy), Object(RefType::OBJECT));
        assert_eq!(UninitializedThis.merge(&string, &hierarchy), Top);
    }

    #[test]
    fn uninitialized_values() {
        let hierarchy = ClassHierarchy::with_java_lang();
        let mut labels = LabelGenerator::new();
        let exception = BinaryName::from_str("java/lang/Exception").unwrap();
        let site1 = VType::of_new(&exception, labels.fresh_label());
        let site2 = VType::of_new(&exception, labels.fresh_label());
        let initialized = Object(RefType::Object(exception.clone()));

        assert!(site1.is_uninitialized());
        assert_ne!(site1, site2, "allocation sites are compared by identity");
        assert_eq!(site1.merge(&site1, &hierarchy), site1);
        assert_eq!(site1.merge(&site2, &hierarchy), Top);
        assert_eq!(site1.merge(&initialized, &hierarchy), site1);
        assert_eq!(initialized.merge(&site2, &hierarchy), site2);
        assert_eq!(site1.merge(&Null, &hierarchy), Top);

        assert_eq!(site1.erase(&BinaryName::OBJECT), initialized);
        assert_eq!(site1.erase(&BinaryName::OBJECT).erase(&BinaryName::OBJECT), initialized);
        assert_eq!(
            UninitializedThis.erase(&BinaryName::STRING),
            VType::of_this(&BinaryName::STRING, false)
        );
    }
}
