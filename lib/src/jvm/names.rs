use std::borrow::Cow;
use std::fmt;

/// Simple name of a method or field
///
/// See <https://docs.oracle.com/javase/specs/jvms/se16/html/jvms-4.html#jvms-4.2.2>
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct UnqualifiedName(Cow<'static, str>);

/// Fully qualified class or interface name, using `/` as the package separator
///
/// See <https://docs.oracle.com/javase/specs/jvms/se16/html/jvms-4.html#jvms-4.2.1>
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct BinaryName(Cow<'static, str>);

/// Validated name
pub trait Name: Sized {
    /// Underlying string
    fn as_str(&self) -> &str;

    /// Validate and wrap an owned string
    fn from_string(name: String) -> Result<Self, String>;

    fn from_str(name: &str) -> Result<Self, String> {
        Self::from_string(name.to_owned())
    }
}

/// Names can't be empty or contain `.`, `;`, `[`, or `/`
fn check_segment(kind: &str, name: &str) -> Result<(), String> {
    if name.is_empty() {
        Err(format!("{} name is empty", kind))
    } else if let Some(bad) = name.chars().find(|c| matches!(c, '.' | ';' | '[' | '/')) {
        Err(format!("{} name '{}' contains '{}'", kind, name, bad))
    } else {
        Ok(())
    }
}

impl Name for UnqualifiedName {
    fn as_str(&self) -> &str {
        &self.0
    }

    fn from_string(name: String) -> Result<Self, String> {
        check_segment("Unqualified", &name)?;
        Ok(UnqualifiedName(Cow::Owned(name)))
    }
}

impl Name for BinaryName {
    fn as_str(&self) -> &str {
        &self.0
    }

    fn from_string(name: String) -> Result<Self, String> {
        if name.is_empty() {
            return Err(String::from("Binary name is empty"));
        }
        for package_or_class in name.split('/') {
            check_segment("Binary", package_or_class)
                .map_err(|err| format!("{} (in '{}')", err, name))?;
        }
        Ok(BinaryName(Cow::Owned(name)))
    }
}

impl AsRef<str> for UnqualifiedName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for BinaryName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Names show up in frame dumps, so `Debug` leaves out the quotes
impl fmt::Debug for UnqualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for BinaryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for UnqualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for BinaryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl UnqualifiedName {
    const fn known(value: &'static str) -> UnqualifiedName {
        UnqualifiedName(Cow::Borrowed(value))
    }

    /// Instance initialization method (the only name calls to which initialize a value)
    pub const INIT: Self = Self::known("<init>");
}

impl BinaryName {
    const fn known(value: &'static str) -> BinaryName {
        BinaryName(Cow::Borrowed(value))
    }

    // Types that instructions, constants, and handlers refer to implicitly
    pub const ARITHMETICEXCEPTION: Self = Self::known("java/lang/ArithmeticException");
    pub const CLASS: Self = Self::known("java/lang/Class");
    pub const CLONEABLE: Self = Self::known("java/lang/Cloneable");
    pub const ERROR: Self = Self::known("java/lang/Error");
    pub const EXCEPTION: Self = Self::known("java/lang/Exception");
    pub const METHODHANDLE: Self = Self::known("java/lang/invoke/MethodHandle");
    pub const METHODTYPE: Self = Self::known("java/lang/invoke/MethodType");
    pub const NUMBER: Self = Self::known("java/lang/Number");
    pub const OBJECT: Self = Self::known("java/lang/Object");
    pub const RUNTIMEEXCEPTION: Self = Self::known("java/lang/RuntimeException");
    pub const SERIALIZABLE: Self = Self::known("java/io/Serializable");
    pub const STRING: Self = Self::known("java/lang/String");
    pub const THROWABLE: Self = Self::known("java/lang/Throwable");
}
