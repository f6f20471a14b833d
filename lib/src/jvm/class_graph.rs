//! Class relationships needed when merging reference types
//!
//! The analysis never loads classes itself. Whenever two different reference types meet at a
//! join point it asks a [`CommonSuperclass`] oracle for the type to generalize to. Any closure
//! with the right shape works as an oracle, and [`ClassHierarchy`] is a ready-made one backed by
//! an explicit map of superclass edges.

use crate::jvm::{ArrayType, BinaryName, ClassAccessFlags, RefType};
use std::collections::{HashMap, HashSet};

/// Resolves the nearest common ancestor of two reference types
///
/// The analysis can be run on several threads at once with a shared oracle, in which case the
/// oracle should be `Sync`.
pub trait CommonSuperclass {
    /// Type both arguments are assignable to
    ///
    /// This should be a total function over the reference types that show up in the analyzed
    /// code. Falling back to `java/lang/Object` is always sound.
    fn common_superclass(
        &self,
        type1: &RefType<BinaryName>,
        type2: &RefType<BinaryName>,
    ) -> RefType<BinaryName>;
}

impl<F> CommonSuperclass for F
where
    F: Fn(&RefType<BinaryName>, &RefType<BinaryName>) -> RefType<BinaryName>,
{
    fn common_superclass(
        &self,
        type1: &RefType<BinaryName>,
        type2: &RefType<BinaryName>,
    ) -> RefType<BinaryName> {
        self(type1, type2)
    }
}

/// Class known to a [`ClassHierarchy`]
#[derive(Clone, Debug)]
pub struct ClassData {
    /// Superclass (only `java/lang/Object` has none)
    pub superclass: Option<BinaryName>,

    pub access_flags: ClassAccessFlags,
}

impl ClassData {
    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::INTERFACE)
    }
}

/// Immutable-once-built class hierarchy
///
/// Interfaces are treated the way the JVM verifier treats them: as if they were
/// `java/lang/Object`.
#[derive(Clone, Debug)]
pub struct ClassHierarchy {
    classes: HashMap<BinaryName, ClassData>,
}

impl ClassHierarchy {
    /// Hierarchy containing only `java/lang/Object`
    pub fn new() -> ClassHierarchy {
        let mut classes = HashMap::new();
        classes.insert(
            BinaryName::OBJECT,
            ClassData {
                superclass: None,
                access_flags: ClassAccessFlags::PUBLIC,
            },
        );
        ClassHierarchy { classes }
    }

    /// Hierarchy containing the handful of `java.lang` types that bytecode refers to implicitly
    /// (constants, exceptions thrown by instructions, array supertypes)
    pub fn with_java_lang() -> ClassHierarchy {
        let mut hierarchy = ClassHierarchy::new();
        let public = ClassAccessFlags::PUBLIC;
        let final_class = ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL;
        let interface =
            ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT;
        let classes = [
            (BinaryName::CLONEABLE, BinaryName::OBJECT, interface),
            (BinaryName::SERIALIZABLE, BinaryName::OBJECT, interface),
            (BinaryName::CLASS, BinaryName::OBJECT, final_class),
            (BinaryName::STRING, BinaryName::OBJECT, final_class),
            (BinaryName::NUMBER, BinaryName::OBJECT, public | ClassAccessFlags::ABSTRACT),
            (BinaryName::METHODTYPE, BinaryName::OBJECT, final_class),
            (BinaryName::METHODHANDLE, BinaryName::OBJECT, public | ClassAccessFlags::ABSTRACT),
            (BinaryName::THROWABLE, BinaryName::OBJECT, public),
            (BinaryName::ERROR, BinaryName::THROWABLE, public),
            (BinaryName::EXCEPTION, BinaryName::THROWABLE, public),
            (BinaryName::RUNTIMEEXCEPTION, BinaryName::EXCEPTION, public),
            (BinaryName::ARITHMETICEXCEPTION, BinaryName::RUNTIMEEXCEPTION, public),
        ];
        for (name, superclass, access_flags) in classes {
            hierarchy.add_class(name, Some(superclass), access_flags);
        }
        hierarchy
    }

    /// Declare a class (replacing any previous declaration with the same name)
    pub fn add_class(
        &mut self,
        name: BinaryName,
        superclass: Option<BinaryName>,
        access_flags: ClassAccessFlags,
    ) {
        self.classes.insert(
            name,
            ClassData {
                superclass,
                access_flags,
            },
        );
    }

    pub fn get(&self, name: &BinaryName) -> Option<&ClassData> {
        self.classes.get(name)
    }

    /// Is the class a known interface?
    pub fn is_interface(&self, name: &BinaryName) -> bool {
        self.classes
            .get(name)
            .map_or(false, |class_data| class_data.is_interface())
    }

    /// The class followed by all of its known superclasses, ending at the first class whose
    /// superclass is missing (normally `java/lang/Object`)
    fn superclass_chain<'a>(&'a self, name: &'a BinaryName) -> Vec<&'a BinaryName> {
        let mut chain = vec![name];
        let mut dont_revisit: HashSet<&BinaryName> = HashSet::new();
        dont_revisit.insert(name);

        let mut current = name;
        loop {
            match self.classes.get(current) {
                None => {
                    log::debug!("Class {} is not in the hierarchy", current);
                    break;
                }
                Some(ClassData {
                    superclass: Some(superclass),
                    ..
                }) => {
                    if !dont_revisit.insert(superclass) {
                        log::debug!("Cyclic superclass chain through {}", superclass);
                        break;
                    }
                    chain.push(superclass);
                    current = superclass;
                }
                Some(ClassData {
                    superclass: None, ..
                }) => break,
            }
        }
        chain
    }

    /// Nearest common superclass of two classes
    fn common_class(&self, class1: &BinaryName, class2: &BinaryName) -> BinaryName {
        if class1 == class2 {
            return class1.clone();
        }
        if self.is_interface(class1) || self.is_interface(class2) {
            return BinaryName::OBJECT;
        }

        let supers1: HashSet<&BinaryName> = self.superclass_chain(class1).into_iter().collect();
        self.superclass_chain(class2)
            .into_iter()
            .find(|superclass| supers1.contains(superclass))
            .cloned()
            .unwrap_or(BinaryName::OBJECT)
    }
}

impl Default for ClassHierarchy {
    fn default() -> ClassHierarchy {
        ClassHierarchy::new()
    }
}

impl CommonSuperclass for ClassHierarchy {
    fn common_superclass(
        &self,
        type1: &RefType<BinaryName>,
        type2: &RefType<BinaryName>,
    ) -> RefType<BinaryName> {
        match (type1, type2) {
            _ if type1 == type2 => type1.clone(),

            (RefType::Object(cls1), RefType::Object(cls2)) => {
                RefType::Object(self.common_class(cls1, cls2))
            }

            // Object arrays of the same dimension merge element-wise
            (RefType::ObjectArray(arr1), RefType::ObjectArray(arr2))
                if arr1.additional_dimensions == arr2.additional_dimensions =>
            {
                RefType::ObjectArray(ArrayType {
                    additional_dimensions: arr1.additional_dimensions,
                    element_type: self.common_class(&arr1.element_type, &arr2.element_type),
                })
            }

            // Object arrays of different dimensions still share the shallower array of objects
            (RefType::ObjectArray(arr1), RefType::ObjectArray(arr2)) => {
                RefType::ObjectArray(ArrayType {
                    additional_dimensions: arr1
                        .additional_dimensions
                        .min(arr2.additional_dimensions),
                    element_type: BinaryName::OBJECT,
                })
            }

            _ => RefType::OBJECT,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::{FieldType, Name, ParseDescriptor};

    fn class(name: &str) -> RefType<BinaryName> {
        RefType::Object(BinaryName::from_str(name).unwrap())
    }

    #[test]
    fn simple_classes() {
        let hierarchy = ClassHierarchy::with_java_lang();

        assert_eq!(
            hierarchy.common_superclass(&RefType::STRING, &RefType::STRING),
            RefType::STRING
        );
        assert_eq!(
            hierarchy.common_superclass(&RefType::STRING, &RefType::OBJECT),
            RefType::OBJECT
        );
        assert_eq!(
            hierarchy.common_superclass(
                &class("java/lang/ArithmeticException"),
                &class("java/lang/Error")
            ),
            RefType::THROWABLE
        );
    }

    #[test]
    fn user_classes() {
        let mut hierarchy = ClassHierarchy::with_java_lang();
        let animal = BinaryName::from_str("zoo/Animal").unwrap();
        let dog = BinaryName::from_str("zoo/Dog").unwrap();
        let cat = BinaryName::from_str("zoo/Cat").unwrap();
        let pet = BinaryName::from_str("zoo/Pet").unwrap();
        let public = ClassAccessFlags::PUBLIC;
        hierarchy.add_class(animal.clone(), Some(BinaryName::OBJECT), public);
        hierarchy.add_class(dog.clone(), Some(animal.clone()), public);
        hierarchy.add_class(cat.clone(), Some(animal.clone()), public);
        hierarchy.add_class(
            pet.clone(),
            Some(BinaryName::OBJECT),
            public | ClassAccessFlags::INTERFACE,
        );

        assert_eq!(
            hierarchy.common_superclass(&RefType::Object(dog.clone()), &RefType::Object(cat)),
            RefType::Object(animal)
        );
        assert_eq!(
            hierarchy.common_superclass(&RefType::Object(dog), &RefType::Object(pet)),
            RefType::OBJECT,
            "interfaces merge to java/lang/Object"
        );
        assert_eq!(
            hierarchy.common_superclass(&class("zoo/Unknown"), &RefType::STRING),
            RefType::OBJECT
        );
    }

    #[test]
    fn arrays() {
        let hierarchy = ClassHierarchy::with_java_lang();
        let parse = |desc: &str| RefType::<BinaryName>::parse(desc).unwrap();

        assert_eq!(
            hierarchy.common_superclass(
                &parse("[Ljava/lang/ArithmeticException;"),
                &parse("[Ljava/lang/Error;")
            ),
            RefType::array(FieldType::object(BinaryName::THROWABLE))
        );
        assert_eq!(
            hierarchy.common_superclass(&parse("[[Ljava/lang/String;"), &parse("[Ljava/lang/String;")),
            RefType::array(FieldType::object(BinaryName::OBJECT))
        );
        assert_eq!(
            hierarchy.common_superclass(&parse("[I"), &parse("[J")),
            RefType::OBJECT
        );
    }

    #[test]
    fn closures_are_oracles() {
        let oracle = |_: &RefType<BinaryName>, _: &RefType<BinaryName>| RefType::THROWABLE;
        assert_eq!(
            oracle.common_superclass(&RefType::STRING, &RefType::CLASS),
            RefType::THROWABLE
        );
    }
}
