use bitflags::bitflags;

bitflags! {
    /// `access_flags` of a class file, as far as the class hierarchy cares
    ///
    /// See <https://docs.oracle.com/javase/specs/jvms/se16/html/jvms-4.html#jvms-4.1-200-E.1>
    pub struct ClassAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const FINAL = 0x0010;
        const SUPER = 0x0020;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const SYNTHETIC = 0x1000;
        const ENUM = 0x4000;
    }
}

bitflags! {
    /// `access_flags` of a method
    ///
    /// Only `STATIC` changes the analysis (there is no `this` in local 0), the rest are carried
    /// along so that callers can pass flags straight through from a parsed class.
    ///
    /// See <https://docs.oracle.com/javase/specs/jvms/se16/html/jvms-4.html#jvms-4.6-200-A.1>
    pub struct MethodAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const VARARGS = 0x0080;
        const ABSTRACT = 0x0400;
        const SYNTHETIC = 0x1000;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flags_from_class_files() {
        // `public static synchronized` as javac writes it
        let flags = MethodAccessFlags::from_bits_truncate(0x0029);
        assert!(flags.contains(MethodAccessFlags::STATIC));
        assert_eq!(flags, MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC | MethodAccessFlags::SYNCHRONIZED);

        // `public interface` plus the `ACC_ANNOTATION` bit, which gets dropped
        let flags = ClassAccessFlags::from_bits_truncate(0x2601);
        assert_eq!(
            flags,
            ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT
        );
    }
}
