//! Script-side classes bound to native classes.
//!
//! A [`WrapperClass`] exists for every native class a script has touched,
//! keyed by native class id, so no two wrappers ever bind the same class.
//! Wrappers are created parent-first: a wrapper's parent is the wrapper of
//! its descriptor's superclass, which keeps the two hierarchies in lockstep.

use crate::error::{Error, Result};
use crate::native::{ClassId, MethodKind};
use crate::registry::ClassDescriptor;
use crate::selector::Selector;
use crate::subclass::TrampolineBinding;
use fxhash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Lifecycle of a class as seen by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassState {
    /// Never referenced.
    Unregistered,
    /// Imported from the native registry.
    DescriptorResolved,
    /// Declared by script code; the native class exists.
    NativeSubclassCreated,
    /// At least one bridged method is installed.
    MethodsBound(usize),
}

/// How a wrapper came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassOrigin {
    /// Found in the native registry.
    Imported,
    /// Created by [`crate::Bridge::declare_subclass`].
    Declared,
}

type BindingKey = (MethodKind, Selector);

/// A script-side class.
pub struct WrapperClass {
    descriptor: Rc<ClassDescriptor>,
    parent: Option<Rc<WrapperClass>>,
    origin: ClassOrigin,
    state: Cell<ClassState>,
    bindings: RefCell<FxHashMap<BindingKey, Rc<TrampolineBinding>>>,
    /// Script name (aliased when reserved) to selector.
    names: RefCell<FxHashMap<(MethodKind, String), Selector>>,
    /// Reserved script name to the alias it was bound under.
    aliases: RefCell<FxHashMap<String, String>>,
}

impl WrapperClass {
    fn new(descriptor: Rc<ClassDescriptor>, parent: Option<Rc<WrapperClass>>, origin: ClassOrigin) -> Self {
        let state = match origin {
            ClassOrigin::Imported => ClassState::DescriptorResolved,
            ClassOrigin::Declared => ClassState::NativeSubclassCreated,
        };
        Self {
            descriptor,
            parent,
            origin,
            state: Cell::new(state),
            bindings: RefCell::new(FxHashMap::default()),
            names: RefCell::new(FxHashMap::default()),
            aliases: RefCell::new(FxHashMap::default()),
        }
    }

    /// The native class.
    #[must_use]
    pub fn descriptor(&self) -> &Rc<ClassDescriptor> {
        &self.descriptor
    }

    /// The class name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    /// The wrapper of the superclass.
    #[must_use]
    pub fn parent(&self) -> Option<&Rc<WrapperClass>> {
        self.parent.as_ref()
    }

    /// Whether the class was imported or declared.
    #[must_use]
    pub fn origin(&self) -> ClassOrigin {
        self.origin
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ClassState {
        self.state.get()
    }

    /// The binding installed directly on this class.
    #[must_use]
    pub fn binding(&self, kind: MethodKind, selector: &Selector) -> Option<Rc<TrampolineBinding>> {
        self.bindings
            .borrow()
            .get(&(kind, selector.clone()))
            .cloned()
    }

    /// Bindings installed directly on this class, sorted by selector.
    #[must_use]
    pub fn bindings(&self) -> Vec<Rc<TrampolineBinding>> {
        let mut bindings: Vec<_> = self.bindings.borrow().values().cloned().collect();
        bindings.sort_by(|a, b| a.selector().cmp(b.selector()));
        bindings
    }

    /// Script names of the bridged methods of `kind`, sorted.
    #[must_use]
    pub fn script_names(&self, kind: MethodKind) -> Vec<String> {
        let mut names: Vec<String> = self
            .names
            .borrow()
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// The alias a reserved script name was bound under, searching the
    /// superclass chain.
    #[must_use]
    pub fn alias_for(&self, name: &str) -> Option<String> {
        if let Some(alias) = self.aliases.borrow().get(name) {
            return Some(alias.clone());
        }
        self.parent.as_ref().and_then(|parent| parent.alias_for(name))
    }

    /// Finds the binding a script name (or alias) refers to, searching the
    /// superclass chain.
    #[must_use]
    pub fn resolve_script_name(&self, kind: MethodKind, name: &str) -> Option<Rc<TrampolineBinding>> {
        let selector = self.names.borrow().get(&(kind, name.to_string())).cloned();
        if let Some(binding) = selector.and_then(|selector| self.binding(kind, &selector)) {
            return Some(binding);
        }
        self.parent
            .as_ref()
            .and_then(|parent| parent.resolve_script_name(kind, name))
    }

    /// Iterates this wrapper and its ancestors, nearest first.
    pub fn ancestry(self: &Rc<Self>) -> impl Iterator<Item = Rc<WrapperClass>> {
        std::iter::successors(Some(Rc::clone(self)), |class| class.parent.clone())
    }

    /// Installs a new binding under `script_name`.
    pub(crate) fn bind(&self, binding: Rc<TrampolineBinding>, script_name: &str, alias: Option<&str>) -> Result<()> {
        let key = (binding.kind(), binding.selector().clone());
        if self.bindings.borrow().contains_key(&key) {
            return Err(Error::DuplicateBinding {
                class: self.name().to_string(),
                kind: binding.kind().as_str(),
                selector: binding.selector().to_string(),
            });
        }
        self.record_names(&binding, script_name, alias);
        self.bindings.borrow_mut().insert(key, binding);
        self.state.set(match self.state.get() {
            ClassState::MethodsBound(count) => ClassState::MethodsBound(count + 1),
            _ => ClassState::MethodsBound(1),
        });
        Ok(())
    }

    /// Installs or replaces a binding. Returns the previous one.
    pub(crate) fn rebind(
        &self,
        binding: Rc<TrampolineBinding>,
        script_name: &str,
        alias: Option<&str>,
    ) -> Option<Rc<TrampolineBinding>> {
        let key = (binding.kind(), binding.selector().clone());
        self.record_names(&binding, script_name, alias);
        let previous = self.bindings.borrow_mut().insert(key, binding);
        if previous.is_none() {
            self.state.set(match self.state.get() {
                ClassState::MethodsBound(count) => ClassState::MethodsBound(count + 1),
                _ => ClassState::MethodsBound(1),
            });
        }
        previous
    }

    /// Removes a binding installed by [`WrapperClass::bind`], restoring the
    /// names and state it recorded.
    pub(crate) fn unbind(&self, kind: MethodKind, selector: &Selector, script_name: &str, alias: Option<&str>) {
        if self.bindings.borrow_mut().remove(&(kind, selector.clone())).is_none() {
            return;
        }
        let exposed = alias.unwrap_or(script_name);
        let mut names = self.names.borrow_mut();
        if names.get(&(kind, exposed.to_string())) == Some(selector) {
            names.remove(&(kind, exposed.to_string()));
        }
        if alias.is_some() {
            self.aliases.borrow_mut().remove(script_name);
        }
        self.state.set(match self.state.get() {
            ClassState::MethodsBound(count) if count > 1 => ClassState::MethodsBound(count - 1),
            _ => match self.origin {
                ClassOrigin::Imported => ClassState::DescriptorResolved,
                ClassOrigin::Declared => ClassState::NativeSubclassCreated,
            },
        });
    }

    fn record_names(&self, binding: &TrampolineBinding, script_name: &str, alias: Option<&str>) {
        let exposed = alias.unwrap_or(script_name);
        self.names
            .borrow_mut()
            .insert((binding.kind(), exposed.to_string()), binding.selector().clone());
        if let Some(alias) = alias {
            self.aliases
                .borrow_mut()
                .insert(script_name.to_string(), alias.to_string());
        }
    }
}

impl fmt::Debug for WrapperClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrapperClass")
            .field("name", &self.name())
            .field("parent", &self.parent.as_ref().map(|p| p.name().to_string()))
            .field("origin", &self.origin)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

/// Every wrapper, keyed by native class.
#[derive(Default)]
pub(crate) struct WrapperTable {
    classes: RefCell<FxHashMap<ClassId, Rc<WrapperClass>>>,
}

impl WrapperTable {
    /// The wrapper for `descriptor`, creating it and any missing ancestors.
    pub(crate) fn wrap(&self, descriptor: &Rc<ClassDescriptor>, origin: ClassOrigin) -> Rc<WrapperClass> {
        if let Some(existing) = self.get(descriptor.id()) {
            return existing;
        }
        let parent = descriptor
            .parent()
            .map(|parent| self.wrap(parent, ClassOrigin::Imported));
        let wrapper = Rc::new(WrapperClass::new(Rc::clone(descriptor), parent, origin));
        let wrapper = Rc::clone(
            self.classes
                .borrow_mut()
                .entry(descriptor.id())
                .or_insert(wrapper),
        );
        log::debug!("wrapped class {} ({:?})", wrapper.name(), wrapper.origin());
        wrapper
    }

    pub(crate) fn get(&self, class: ClassId) -> Option<Rc<WrapperClass>> {
        self.classes.borrow().get(&class).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.classes.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SignaturePolicy;
    use crate::native::SimRuntime;
    use crate::registry::Registry;

    #[test]
    fn test_chain_mirrors_descriptors() {
        let registry = Registry::new(Rc::new(SimRuntime::new()), SignaturePolicy::Explicit);
        let table = WrapperTable::default();
        let descriptor = registry.resolve("MutableArray").unwrap();
        let wrapper = table.wrap(&descriptor, ClassOrigin::Imported);

        let names: Vec<String> = wrapper.ancestry().map(|w| w.name().to_string()).collect();
        let expected: Vec<String> = descriptor.ancestry().map(|d| d.name().to_string()).collect();
        assert_eq!(names, expected);
        assert_eq!(table.len(), expected.len());
        assert_eq!(wrapper.state(), ClassState::DescriptorResolved);
    }

    #[test]
    fn test_wrappers_are_injective() {
        let registry = Registry::new(Rc::new(SimRuntime::new()), SignaturePolicy::Explicit);
        let table = WrapperTable::default();
        let array = table.wrap(&registry.resolve("Array").unwrap(), ClassOrigin::Imported);
        let mutable = table.wrap(&registry.resolve("MutableArray").unwrap(), ClassOrigin::Imported);
        assert!(Rc::ptr_eq(mutable.parent().unwrap(), &array));
        let again = table.wrap(&registry.resolve("Array").unwrap(), ClassOrigin::Declared);
        assert!(Rc::ptr_eq(&array, &again));
        assert_eq!(again.origin(), ClassOrigin::Imported);
    }
}
