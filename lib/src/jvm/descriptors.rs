use super::{BinaryName, Name};
use crate::util::Width;
use std::io::{Error, ErrorKind, Result};
use std::iter::Peekable;
use std::str::Chars;

/// Types which have a textual descriptor form (eg. `[J` or `(ILjava/lang/String;)V`)
pub trait RenderDescriptor {
    fn render(&self) -> String {
        let mut string = String::new();
        self.render_to(&mut string);
        string
    }

    /// Append the descriptor to a string
    fn render_to(&self, write_to: &mut String);
}

pub trait ParseDescriptor: Sized {
    /// Parse a descriptor, rejecting any trailing input
    fn parse(source: &str) -> Result<Self> {
        let mut chars = source.chars().peekable();
        let parsed = Self::parse_from(&mut chars)?;
        match chars.next() {
            None => Ok(parsed),
            Some(c) => Err(invalid(format!("Unexpected '{}' after descriptor", c))),
        }
    }

    /// Parse a descriptor from the front of a character stream
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self>;
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidInput, msg.into())
}

fn truncated(msg: impl Into<String>) -> Error {
    Error::new(ErrorKind::UnexpectedEof, msg.into())
}

/// Primitive value types
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BaseType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
}

impl BaseType {
    const ALL: [(char, BaseType); 8] = [
        ('B', BaseType::Byte),
        ('C', BaseType::Char),
        ('D', BaseType::Double),
        ('F', BaseType::Float),
        ('I', BaseType::Int),
        ('J', BaseType::Long),
        ('S', BaseType::Short),
        ('Z', BaseType::Boolean),
    ];

    fn from_descriptor_char(c: char) -> Option<BaseType> {
        BaseType::ALL
            .iter()
            .find(|(tag, _)| *tag == c)
            .map(|(_, base_type)| *base_type)
    }

    fn descriptor_char(self) -> char {
        BaseType::ALL
            .iter()
            .find(|(_, base_type)| *base_type == self)
            .map_or('?', |(tag, _)| *tag)
    }
}

/// `long` and `double` take two words, in locals and on the stack
impl Width for BaseType {
    fn width(&self) -> usize {
        match self {
            BaseType::Double | BaseType::Long => 2,
            _ => 1,
        }
    }
}

impl RenderDescriptor for BaseType {
    fn render_to(&self, write_to: &mut String) {
        write_to.push(self.descriptor_char());
    }
}

impl ParseDescriptor for BaseType {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        let c = source
            .next()
            .ok_or_else(|| truncated("Missing base type character"))?;
        BaseType::from_descriptor_char(c)
            .ok_or_else(|| invalid(format!("Invalid base type character '{}'", c)))
    }
}

/// Reference type
///
/// The class representation is generic so the same shape can hold names or constant pool
/// indices.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum RefType<Class> {
    Object(Class),
    ObjectArray(ArrayType<Class>),
    PrimitiveArray(ArrayType<BaseType>),
}

/// Array type, split into its innermost element type and its number of dimensions
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ArrayType<T> {
    /// Dimensions beyond the first (`A[]` has 0, `A[][][]` has 2)
    pub additional_dimensions: usize,

    /// Innermost element type (`A` for `A[][]`)
    pub element_type: T,
}

impl<T: RenderDescriptor> RenderDescriptor for ArrayType<T> {
    fn render_to(&self, write_to: &mut String) {
        write_to.extend(std::iter::repeat('[').take(self.additional_dimensions + 1));
        self.element_type.render_to(write_to);
    }
}

/// Object types render as `L<binary name>;`
impl RenderDescriptor for BinaryName {
    fn render_to(&self, write_to: &mut String) {
        write_to.push('L');
        write_to.push_str(self.as_str());
        write_to.push(';');
    }
}

impl ParseDescriptor for BinaryName {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        if source.next() != Some('L') {
            return Err(invalid("Expected object type to start with 'L'"));
        }
        let mut class_name = String::new();
        loop {
            match source.next() {
                Some(';') => return BinaryName::from_string(class_name).map_err(invalid),
                Some(c) => class_name.push(c),
                None => return Err(truncated(format!("Missing ';' after 'L{}'", class_name))),
            }
        }
    }
}

impl<C: RenderDescriptor> RenderDescriptor for RefType<C> {
    fn render_to(&self, write_to: &mut String) {
        match self {
            RefType::Object(cls) => cls.render_to(write_to),
            RefType::PrimitiveArray(arr) => arr.render_to(write_to),
            RefType::ObjectArray(arr) => arr.render_to(write_to),
        }
    }
}

impl<C: ParseDescriptor> ParseDescriptor for RefType<C> {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        let mut dimensions = 0;
        while source.peek() == Some(&'[') {
            source.next();
            dimensions += 1;
        }

        match (dimensions, source.peek().copied()) {
            (0, Some('L')) => Ok(RefType::Object(C::parse_from(source)?)),
            (0, Some(c)) => Err(invalid(format!("Invalid reference type character '{}'", c))),
            (_, Some('L')) => Ok(RefType::ObjectArray(ArrayType {
                additional_dimensions: dimensions - 1,
                element_type: C::parse_from(source)?,
            })),
            (_, Some(_)) => Ok(RefType::PrimitiveArray(ArrayType {
                additional_dimensions: dimensions - 1,
                element_type: BaseType::parse_from(source)?,
            })),
            (_, None) => Err(truncated("Missing reference type")),
        }
    }
}

impl<C> RefType<C> {
    /// Array whose elements have the given type
    pub fn array(field_type: FieldType<C>) -> RefType<C> {
        match field_type {
            FieldType::Base(element_type) => RefType::PrimitiveArray(ArrayType {
                additional_dimensions: 0,
                element_type,
            }),
            FieldType::Ref(RefType::Object(element_type)) => RefType::ObjectArray(ArrayType {
                additional_dimensions: 0,
                element_type,
            }),
            FieldType::Ref(RefType::PrimitiveArray(mut arr)) => {
                arr.additional_dimensions += 1;
                RefType::PrimitiveArray(arr)
            }
            FieldType::Ref(RefType::ObjectArray(mut arr)) => {
                arr.additional_dimensions += 1;
                RefType::ObjectArray(arr)
            }
        }
    }

    pub fn is_array(&self) -> bool {
        !matches!(self, RefType::Object(_))
    }
}

impl<C: Clone> RefType<C> {
    /// Type of the elements of an array type (`None` if this is not an array)
    pub fn element_type(&self) -> Option<FieldType<C>> {
        let element = match self {
            RefType::Object(_) => return None,
            RefType::PrimitiveArray(ArrayType {
                additional_dimensions: 0,
                element_type,
            }) => FieldType::Base(*element_type),
            RefType::ObjectArray(ArrayType {
                additional_dimensions: 0,
                element_type,
            }) => FieldType::object(element_type.clone()),
            RefType::PrimitiveArray(arr) => FieldType::Ref(RefType::PrimitiveArray(ArrayType {
                additional_dimensions: arr.additional_dimensions - 1,
                element_type: arr.element_type,
            })),
            RefType::ObjectArray(arr) => FieldType::Ref(RefType::ObjectArray(ArrayType {
                additional_dimensions: arr.additional_dimensions - 1,
                element_type: arr.element_type.clone(),
            })),
        };
        Some(element)
    }
}

impl RefType<BinaryName> {
    pub const OBJECT: Self = RefType::Object(BinaryName::OBJECT);
    pub const STRING: Self = RefType::Object(BinaryName::STRING);
    pub const THROWABLE: Self = RefType::Object(BinaryName::THROWABLE);
    pub const CLASS: Self = RefType::Object(BinaryName::CLASS);
    pub const METHODTYPE: Self = RefType::Object(BinaryName::METHODTYPE);
    pub const METHODHANDLE: Self = RefType::Object(BinaryName::METHODHANDLE);

    /// Name as it appears in a `CONSTANT_Class` entry: the binary name for classes, and the
    /// descriptor for array types
    pub fn class_name(&self) -> String {
        match self {
            RefType::Object(name) => name.as_str().to_owned(),
            array => array.render(),
        }
    }

    /// Inverse of [`Self::class_name`]
    pub fn from_class_name(name: &str) -> Result<Self> {
        if name.starts_with('[') {
            RefType::parse(name)
        } else {
            BinaryName::from_str(name)
                .map(RefType::Object)
                .map_err(invalid)
        }
    }
}

/// Type of a field, parameter, or return value
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum FieldType<Class> {
    Base(BaseType),
    Ref(RefType<Class>),
}

impl<C> Width for FieldType<C> {
    fn width(&self) -> usize {
        match self {
            FieldType::Base(base_type) => base_type.width(),
            FieldType::Ref(_) => 1,
        }
    }
}

impl<C> FieldType<C> {
    pub const fn object(class_name: C) -> FieldType<C> {
        FieldType::Ref(RefType::Object(class_name))
    }

    pub const fn int() -> FieldType<C> {
        FieldType::Base(BaseType::Int)
    }

    pub const fn long() -> FieldType<C> {
        FieldType::Base(BaseType::Long)
    }

    pub const fn float() -> FieldType<C> {
        FieldType::Base(BaseType::Float)
    }

    pub const fn double() -> FieldType<C> {
        FieldType::Base(BaseType::Double)
    }

    pub const fn char() -> FieldType<C> {
        FieldType::Base(BaseType::Char)
    }

    pub const fn short() -> FieldType<C> {
        FieldType::Base(BaseType::Short)
    }

    pub const fn byte() -> FieldType<C> {
        FieldType::Base(BaseType::Byte)
    }

    pub const fn boolean() -> FieldType<C> {
        FieldType::Base(BaseType::Boolean)
    }
}

impl<C: RenderDescriptor> RenderDescriptor for FieldType<C> {
    fn render_to(&self, write_to: &mut String) {
        match self {
            FieldType::Base(base_type) => base_type.render_to(write_to),
            FieldType::Ref(ref_type) => ref_type.render_to(write_to),
        }
    }
}

impl<C: ParseDescriptor> ParseDescriptor for FieldType<C> {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        match source.peek().copied() {
            Some('L' | '[') => RefType::parse_from(source).map(FieldType::Ref),
            Some(_) => BaseType::parse_from(source).map(FieldType::Base),
            None => Err(truncated("Missing field type")),
        }
    }
}

/// Parameter and return types of a method
#[derive(PartialEq, Eq, Hash, Debug, Clone)]
pub struct MethodDescriptor<Class> {
    pub parameters: Vec<FieldType<Class>>,

    /// `None` for `void`
    pub return_type: Option<FieldType<Class>>,
}

impl<C: RenderDescriptor> RenderDescriptor for MethodDescriptor<C> {
    fn render_to(&self, write_to: &mut String) {
        write_to.push('(');
        for parameter in &self.parameters {
            parameter.render_to(write_to);
        }
        write_to.push(')');
        match &self.return_type {
            None => write_to.push('V'),
            Some(typ) => typ.render_to(write_to),
        };
    }
}

impl<C: ParseDescriptor> ParseDescriptor for MethodDescriptor<C> {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        if source.next() != Some('(') {
            return Err(invalid("Expected '(' to start method descriptor"));
        }

        let mut parameters = vec![];
        loop {
            match source.peek() {
                Some(')') => break,
                Some(_) => parameters.push(FieldType::<C>::parse_from(source)?),
                None => return Err(truncated("Missing ')' in method descriptor")),
            }
        }
        source.next();

        let return_type = if source.peek() == Some(&'V') {
            source.next();
            None
        } else {
            Some(FieldType::<C>::parse_from(source)?)
        };

        Ok(MethodDescriptor {
            parameters,
            return_type,
        })
    }
}
