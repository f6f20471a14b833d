use crate::jvm::{
    BinaryName, Error, MethodAccessFlags, MethodDescriptor, Name, ParseDescriptor, UnqualifiedName,
};

/// Method whose body is being analyzed
///
/// This determines the state on entry to the method: the receiver (unless the method is static)
/// followed by the parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodInfo {
    /// Class in which the method is declared
    pub class: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor<BinaryName>,
    pub access_flags: MethodAccessFlags,
}

impl MethodInfo {
    /// Construct method information from its textual parts
    pub fn parse(
        class: &str,
        name: &str,
        descriptor: &str,
        access_flags: MethodAccessFlags,
    ) -> Result<MethodInfo, Error> {
        Ok(MethodInfo {
            class: BinaryName::from_str(class).map_err(Error::BadDescriptor)?,
            name: UnqualifiedName::from_str(name).map_err(Error::BadDescriptor)?,
            descriptor: MethodDescriptor::parse(descriptor)
                .map_err(|err| Error::BadDescriptor(err.to_string()))?,
            access_flags,
        })
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    /// Is this an instance initialization method (where `this` starts off uninitialized)?
    pub fn is_constructor(&self) -> bool {
        self.name == UnqualifiedName::INIT
    }
}
