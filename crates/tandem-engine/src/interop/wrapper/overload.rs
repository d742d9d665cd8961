//! Overload sets
//!
//! Same-named methods of one class, distinguished by arity. A set is
//! chained to the same-named set of the base class and falls back to it
//! when none of its own entries takes the requested argument count.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use tandem_sdk::{InteropError, InteropResult, ManagedRuntime, MethodId, MethodInfo};

use crate::interop::fatal;

/// Method wrapper whose reflection record is fetched on first call
#[derive(Debug)]
pub struct LazyMethod {
    id: MethodId,
    descriptor: Arc<str>,
    param_count: usize,
    mandatory: usize,
    has_rest: bool,
    info: OnceCell<Arc<MethodInfo>>,
}

impl LazyMethod {
    /// Record the arity shape of `method`
    pub fn new(method: &MethodInfo) -> Self {
        Self {
            id: method.id,
            descriptor: method.descriptor.clone(),
            param_count: method.param_count,
            mandatory: method.mandatory,
            has_rest: method.has_rest,
            info: OnceCell::new(),
        }
    }

    /// Method identity
    pub fn id(&self) -> MethodId {
        self.id
    }

    /// Method descriptor
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Whether the reflection record was fetched
    pub fn is_resolved(&self) -> bool {
        self.info.get().is_some()
    }

    /// Reflection record, fetched once
    pub fn info(&self, managed: &dyn ManagedRuntime) -> InteropResult<&Arc<MethodInfo>> {
        self.info.get_or_try_init(|| managed.method_info(self.id))
    }

    fn accepts(&self, argc: usize) -> bool {
        argc >= self.mandatory && (self.has_rest || argc <= self.param_count)
    }

    fn shape(&self) -> (usize, usize, bool) {
        (self.param_count, self.mandatory, self.has_rest)
    }
}

/// Same-named methods of one class
#[derive(Debug)]
pub struct OverloadSet {
    name: Arc<str>,
    entries: Vec<LazyMethod>,
    base: Option<Arc<OverloadSet>>,
}

impl OverloadSet {
    /// Build a set from the methods of `owner` named `name`
    ///
    /// Entries with identical arity shapes cannot be told apart at call
    /// time; `preferred` names the descriptor that wins. Ambiguous shapes
    /// without a preference, and a preference that matches nothing, are
    /// fatal.
    pub fn build(
        owner: &str,
        name: Arc<str>,
        methods: &[Arc<MethodInfo>],
        preferred: Option<&str>,
        base: Option<Arc<OverloadSet>>,
    ) -> Self {
        if let Some(descriptor) = preferred {
            if !methods.iter().any(|m| &*m.descriptor == descriptor) {
                fatal(&format!(
                    "{}.{}: preferred overload {} does not exist",
                    owner, name, descriptor
                ));
            }
        }
        let mut entries: Vec<LazyMethod> = Vec::with_capacity(methods.len());
        for method in methods {
            let entry = LazyMethod::new(method);
            match entries.iter().position(|e| e.shape() == entry.shape()) {
                None => entries.push(entry),
                Some(i) => match preferred {
                    Some(descriptor) if &*entry.descriptor == descriptor => entries[i] = entry,
                    Some(descriptor) if &*entries[i].descriptor == descriptor => {}
                    _ => fatal(&format!(
                        "{}.{}: overloads {} and {} take the same arguments",
                        owner, name, entries[i].descriptor, entry.descriptor
                    )),
                },
            }
        }
        Self { name, entries, base }
    }

    /// Set with no entries of its own
    pub fn inherited(name: Arc<str>, base: Option<Arc<OverloadSet>>) -> Self {
        Self {
            name,
            entries: Vec::new(),
            base,
        }
    }

    /// Script-visible name
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// Own entries
    pub fn entries(&self) -> &[LazyMethod] {
        &self.entries
    }

    /// Same-named set of the base class
    pub fn base(&self) -> Option<&Arc<OverloadSet>> {
        self.base.as_ref()
    }

    /// Whether neither this set nor any base set has an entry
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.base.as_ref().map_or(true, |b| b.is_empty())
    }

    fn find(&self, argc: usize) -> Option<&LazyMethod> {
        let fixed = self
            .entries
            .iter()
            .filter(|e| !e.has_rest && e.accepts(argc))
            .min_by_key(|e| e.param_count);
        fixed
            .or_else(|| self.entries.iter().find(|e| e.has_rest && e.accepts(argc)))
            .or_else(|| self.base.as_ref().and_then(|b| b.find(argc)))
    }

    /// Entry taking `argc` arguments
    ///
    /// Prefers the fixed-arity entry with the fewest parameters that still
    /// accepts `argc`, then a rest entry, then the base class's set.
    pub fn resolve(&self, argc: usize) -> InteropResult<&LazyMethod> {
        self.find(argc).ok_or_else(|| {
            InteropError::resolution(format!(
                "no overload of {} takes {} arguments",
                self.name, argc
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_sdk::{BodyKind, ClassId, Visibility};

    fn method(id: u32, descriptor: &str, params: usize, mandatory: usize, rest: bool) -> Arc<MethodInfo> {
        Arc::new(MethodInfo {
            id: MethodId::from_raw(id),
            name: Arc::from("m"),
            descriptor: Arc::from(descriptor),
            declaring: ClassId::from_raw(0),
            is_static: false,
            is_constructor: false,
            visibility: Visibility::Public,
            accessor: None,
            param_count: params,
            mandatory,
            has_rest: rest,
            body: BodyKind::Native,
            script_decl: None,
        })
    }

    #[test]
    fn test_resolve_prefers_exact_then_wider() {
        let set = OverloadSet::build(
            "C",
            Arc::from("m"),
            &[method(1, "VI", 1, 1, false), method(2, "VIII", 3, 1, false)],
            None,
            None,
        );
        assert_eq!(set.resolve(1).unwrap().id(), MethodId::from_raw(1));
        assert_eq!(set.resolve(2).unwrap().id(), MethodId::from_raw(2));
        assert_eq!(set.resolve(3).unwrap().id(), MethodId::from_raw(2));
        assert!(set.resolve(0).is_err());
    }

    #[test]
    fn test_rest_and_base_fallback() {
        let base = Arc::new(OverloadSet::build(
            "Base",
            Arc::from("m"),
            &[method(10, "VIIIII", 5, 5, false)],
            None,
            None,
        ));
        let set = OverloadSet::build(
            "Sub",
            Arc::from("m"),
            &[method(1, "VI", 1, 1, false), method(2, "VI[I", 1, 0, true)],
            None,
            Some(base),
        );
        assert_eq!(set.resolve(1).unwrap().id(), MethodId::from_raw(1));
        assert_eq!(set.resolve(4).unwrap().id(), MethodId::from_raw(2));
        assert_eq!(set.resolve(0).unwrap().id(), MethodId::from_raw(2));

        let fixed_only = OverloadSet::build(
            "Sub",
            Arc::from("m"),
            &[method(1, "VI", 1, 1, false), method(3, "VII", 2, 2, false)],
            None,
            set.base().cloned(),
        );
        assert_eq!(fixed_only.resolve(5).unwrap().id(), MethodId::from_raw(10));
    }

    #[test]
    fn test_miss_is_resolution_failure() {
        let set = OverloadSet::build(
            "C",
            Arc::from("m"),
            &[method(1, "VI", 1, 1, false), method(2, "VII", 2, 2, false)],
            None,
            None,
        );
        let err = set.resolve(5).unwrap_err();
        assert!(matches!(err, InteropError::ResolutionFailure(_)));
        assert_eq!(err.to_string(), "Resolution failure: no overload of m takes 5 arguments");
    }

    #[test]
    fn test_preferred_breaks_tie() {
        let set = OverloadSet::build(
            "C",
            Arc::from("m"),
            &[method(1, "VI", 1, 1, false), method(2, "VD", 1, 1, false)],
            Some("VD"),
            None,
        );
        assert_eq!(set.entries().len(), 1);
        assert_eq!(set.resolve(1).unwrap().descriptor(), "VD");
    }

    #[test]
    #[should_panic(expected = "take the same arguments")]
    fn test_ambiguous_shapes_are_fatal() {
        OverloadSet::build(
            "C",
            Arc::from("m"),
            &[method(1, "VI", 1, 1, false), method(2, "VD", 1, 1, false)],
            None,
            None,
        );
    }

    #[test]
    #[should_panic(expected = "does not exist")]
    fn test_missing_preferred_is_fatal() {
        OverloadSet::build("C", Arc::from("m"), &[method(1, "VI", 1, 1, false)], Some("VJ"), None);
    }

    #[test]
    fn test_lazy_info_is_memoized() {
        let vm = crate::managed::ManagedVm::new();
        let object = vm.well_known(tandem_sdk::WellKnownClass::Object);
        let ctor = vm.class_methods(object).unwrap().remove(0);
        let lazy = LazyMethod::new(&ctor);
        assert!(!lazy.is_resolved());
        assert_eq!(lazy.info(&*vm).unwrap().id, ctor.id);
        assert!(lazy.is_resolved());
    }
}
