//! Signature reader
//!
//! [`ProtoReader`] walks a method descriptor one slot at a time, resolving
//! each fragment to a [`TypeTag`]. The first tag is the return type. A call
//! consumes the parameters, then [`reset`](ProtoReader::reset)s the reader to
//! read the return type again for result conversion.

use tandem_sdk::{
    DescriptorCursor, Fragment, InteropError, InteropResult, ManagedRuntime, TypeTag,
};

/// Resolve one type fragment
pub fn resolve_fragment(managed: &dyn ManagedRuntime, fragment: &str) -> InteropResult<TypeTag> {
    match Fragment::classify(fragment) {
        Fragment::Void => Ok(TypeTag::Void),
        Fragment::Primitive(kind) => Ok(TypeTag::Primitive(kind)),
        Fragment::Class(name) => managed
            .class_by_name(name)
            .map(TypeTag::Ref)
            .ok_or_else(|| InteropError::resolution(format!("unknown class {}", name))),
        Fragment::Array(component) => {
            let component = resolve_fragment(managed, component)?;
            Ok(TypeTag::Ref(managed.array_class(component)?))
        }
    }
}

/// Lazy, restartable reader over a descriptor
pub struct ProtoReader<'a> {
    managed: &'a dyn ManagedRuntime,
    cursor: DescriptorCursor<'a>,
}

impl<'a> ProtoReader<'a> {
    /// Reader positioned at the return type
    pub fn new(managed: &'a dyn ManagedRuntime, descriptor: &'a str) -> Self {
        Self {
            managed,
            cursor: DescriptorCursor::new(descriptor),
        }
    }

    /// Restart at the return type
    pub fn reset(&mut self) {
        self.cursor.reset();
    }

    /// Next type tag, or `None` past the last parameter
    pub fn next_tag(&mut self) -> InteropResult<Option<TypeTag>> {
        match self.cursor.next_fragment()? {
            Some(fragment) => resolve_fragment(self.managed, fragment).map(Some),
            None => Ok(None),
        }
    }

    /// Next tag, which must exist
    pub fn expect_tag(&mut self) -> InteropResult<TypeTag> {
        self.next_tag()?
            .ok_or_else(|| InteropError::resolution("descriptor has fewer slots than the method declares"))
    }

    /// Restart and read the return type
    pub fn return_tag(&mut self) -> InteropResult<TypeTag> {
        self.reset();
        self.expect_tag()
    }
}

/// Component type of an array class
pub fn component_of(managed: &dyn ManagedRuntime, tag: TypeTag) -> InteropResult<TypeTag> {
    match tag {
        TypeTag::Ref(class) => managed
            .class_info(class)?
            .component()
            .ok_or_else(|| InteropError::type_mismatch("array type", managed_name(managed, tag))),
        other => Err(InteropError::type_mismatch("array type", managed_name(managed, other))),
    }
}

/// Human-readable name of a type tag
pub fn managed_name(managed: &dyn ManagedRuntime, tag: TypeTag) -> String {
    match tag {
        TypeTag::Void => "void".to_string(),
        TypeTag::Primitive(kind) => kind.name().to_string(),
        TypeTag::Ref(class) => managed
            .class_info(class)
            .map(|info| info.name.to_string())
            .unwrap_or_else(|_| format!("class#{}", class.to_raw())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::ManagedVm;
    use tandem_sdk::{PrimitiveKind, WellKnownClass};

    #[test]
    fn test_reads_return_then_params() {
        let vm = ManagedVm::new();
        let string = vm.well_known(WellKnownClass::String);
        let mut reader = ProtoReader::new(&*vm, "ZILstd.core.String;[D");
        assert_eq!(reader.next_tag().unwrap(), Some(TypeTag::Primitive(PrimitiveKind::Bool)));
        assert_eq!(reader.next_tag().unwrap(), Some(TypeTag::Primitive(PrimitiveKind::I32)));
        assert_eq!(reader.next_tag().unwrap(), Some(TypeTag::Ref(string)));
        let array = reader.expect_tag().unwrap();
        assert_eq!(
            component_of(&*vm, array).unwrap(),
            TypeTag::Primitive(PrimitiveKind::F64)
        );
        assert_eq!(reader.next_tag().unwrap(), None);

        assert_eq!(reader.return_tag().unwrap(), TypeTag::Primitive(PrimitiveKind::Bool));
    }

    #[test]
    fn test_unknown_class_is_resolution_failure() {
        let vm = ManagedVm::new();
        let mut reader = ProtoReader::new(&*vm, "VLno.such.Class;");
        reader.next_tag().unwrap();
        assert!(matches!(
            reader.next_tag(),
            Err(InteropError::ResolutionFailure(_))
        ));
    }

    #[test]
    fn test_names() {
        let vm = ManagedVm::new();
        let object = vm.well_known(WellKnownClass::Object);
        assert_eq!(managed_name(&*vm, TypeTag::Ref(object)), "std.core.Object");
        assert_eq!(managed_name(&*vm, TypeTag::Primitive(PrimitiveKind::I16)), "short");
    }
}
