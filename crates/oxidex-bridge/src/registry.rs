//! Mirror of the native class and method tables.
//!
//! The registry turns native class ids into shared [`ClassDescriptor`]s and
//! native method lists into parsed [`MethodDescriptor`]s. Every cache in
//! here is append-only with insert-if-absent semantics: entries are never
//! replaced or removed, so a descriptor handed out once stays valid and
//! identical for the lifetime of the registry, and reads nested inside a
//! native call see a consistent table.
//!
//! Signature lookup by selector alone scans every class exactly once and
//! keeps the first signature seen per selector. Methods the bridge installs
//! later are appended to that table.

use crate::config::SignaturePolicy;
use crate::encoding::Signature;
use crate::error::{Error, Result};
use crate::native::{ClassId, MethodKind, NativeRuntime};
use crate::selector::{Selector, SelectorShape};
use fxhash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// A resolved native class.
pub struct ClassDescriptor {
    name: Rc<str>,
    id: ClassId,
    parent: Option<Rc<ClassDescriptor>>,
    instance_methods: RefCell<Option<Rc<[MethodDescriptor]>>>,
    class_methods: RefCell<Option<Rc<[MethodDescriptor]>>>,
}

impl ClassDescriptor {
    /// The class name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The native class id.
    #[must_use]
    pub fn id(&self) -> ClassId {
        self.id
    }

    /// The superclass descriptor.
    #[must_use]
    pub fn parent(&self) -> Option<&Rc<ClassDescriptor>> {
        self.parent.as_ref()
    }

    /// Iterates this class and its ancestors, nearest first.
    pub fn ancestry(self: &Rc<Self>) -> impl Iterator<Item = Rc<ClassDescriptor>> {
        std::iter::successors(Some(Rc::clone(self)), |class| class.parent.clone())
    }

    /// True if `self` is `other` or inherits from it.
    #[must_use]
    pub fn is_subclass_of(self: &Rc<Self>, other: &ClassDescriptor) -> bool {
        self.ancestry().any(|class| class.id == other.id)
    }

    fn cache(&self, kind: MethodKind) -> &RefCell<Option<Rc<[MethodDescriptor]>>> {
        match kind {
            MethodKind::Instance => &self.instance_methods,
            MethodKind::Class => &self.class_methods,
        }
    }
}

impl fmt::Debug for ClassDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("name", &self.name)
            .field("id", &self.id.0)
            .field("parent", &self.parent.as_ref().map(|p| p.name()))
            .finish_non_exhaustive()
    }
}

/// A method of a native class.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    /// The selector.
    pub selector: Selector,
    /// Instance or class method.
    pub kind: MethodKind,
    /// The parsed signature; `signature.as_str()` is the raw encoding.
    pub signature: Rc<Signature>,
}

/// Where a signature came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureSource {
    /// Supplied by the caller.
    Explicit,
    /// Found in the native method tables (or recorded by the bridge).
    Runtime,
    /// Derived from the selector's shape.
    Derived,
}

/// A signature and its provenance.
#[derive(Debug, Clone)]
pub struct SignatureLookup {
    /// The signature.
    pub signature: Rc<Signature>,
    /// Where it came from.
    pub source: SignatureSource,
}

/// The default signature for a selector shape: `v@:@` for single-colon
/// action selectors and `@@:` for colon-free accessors.
#[must_use]
pub fn derived_encoding(selector: &Selector) -> Option<&'static str> {
    match selector.shape() {
        SelectorShape::Accessor => Some("@@:"),
        SelectorShape::Action => Some("v@:@"),
        SelectorShape::Keyword => None,
    }
}

/// Class and method registry mirror.
pub struct Registry {
    runtime: Rc<dyn NativeRuntime>,
    policy: SignaturePolicy,
    classes: RefCell<FxHashMap<Rc<str>, Rc<ClassDescriptor>>>,
    by_id: RefCell<FxHashMap<ClassId, Rc<ClassDescriptor>>>,
    parsed: RefCell<FxHashMap<Rc<str>, Rc<Signature>>>,
    signatures: RefCell<Option<FxHashMap<Selector, Rc<Signature>>>>,
    scans: Cell<usize>,
}

impl Registry {
    /// Creates an empty mirror of `runtime`.
    #[must_use]
    pub fn new(runtime: Rc<dyn NativeRuntime>, policy: SignaturePolicy) -> Self {
        Self {
            runtime,
            policy,
            classes: RefCell::new(FxHashMap::default()),
            by_id: RefCell::new(FxHashMap::default()),
            parsed: RefCell::new(FxHashMap::default()),
            signatures: RefCell::new(None),
            scans: Cell::new(0),
        }
    }

    /// The signature policy in effect.
    #[must_use]
    pub fn policy(&self) -> SignaturePolicy {
        self.policy
    }

    /// Resolves a class by name. Repeated calls return the same descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvedClass`] when the runtime has no such
    /// class. Misses are not cached.
    pub fn resolve(&self, name: &str) -> Result<Rc<ClassDescriptor>> {
        if let Some(class) = self.classes.borrow().get(name) {
            return Ok(Rc::clone(class));
        }
        let id = self
            .runtime
            .class_named(name)
            .ok_or_else(|| Error::UnresolvedClass {
                name: name.to_string(),
            })?;
        self.descriptor_for_id(id)
    }

    /// Resolves a class by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvedClass`] for ids the runtime does not know.
    pub fn descriptor_for_id(&self, id: ClassId) -> Result<Rc<ClassDescriptor>> {
        if let Some(class) = self.by_id.borrow().get(&id) {
            return Ok(Rc::clone(class));
        }
        let name = self
            .runtime
            .class_name(id)
            .ok_or_else(|| Error::UnresolvedClass {
                name: format!("<class {}>", id.0),
            })?;
        let parent = match self.runtime.superclass(id) {
            Some(parent) => Some(self.descriptor_for_id(parent)?),
            None => None,
        };

        let descriptor = Rc::new(ClassDescriptor {
            name: Rc::clone(&name),
            id,
            parent,
            instance_methods: RefCell::new(None),
            class_methods: RefCell::new(None),
        });
        let descriptor = Rc::clone(
            self.by_id
                .borrow_mut()
                .entry(id)
                .or_insert(descriptor),
        );
        self.classes
            .borrow_mut()
            .entry(name)
            .or_insert_with(|| Rc::clone(&descriptor));
        log::debug!("resolved class {}", descriptor.name());
        Ok(descriptor)
    }

    /// Parses a signature, sharing the parsed form between identical
    /// encodings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SignatureParse`] for malformed encodings.
    pub fn signature(&self, encoding: &str) -> Result<Rc<Signature>> {
        if let Some(signature) = self.parsed.borrow().get(encoding) {
            return Ok(Rc::clone(signature));
        }
        let signature = Rc::new(Signature::parse(encoding)?);
        Ok(Rc::clone(
            self.parsed
                .borrow_mut()
                .entry(Rc::from(encoding))
                .or_insert(signature),
        ))
    }

    /// Methods defined directly on `class`, sorted by selector. The native
    /// table is read once per class and kind.
    ///
    /// # Errors
    ///
    /// Currently infallible for resolved classes; native methods whose
    /// encodings do not parse are skipped with a warning.
    pub fn methods_of(&self, class: &ClassDescriptor, kind: MethodKind) -> Result<Rc<[MethodDescriptor]>> {
        if let Some(methods) = class.cache(kind).borrow().as_ref() {
            return Ok(Rc::clone(methods));
        }
        let mut methods: Vec<MethodDescriptor> = Vec::new();
        for info in self.runtime.methods(class.id, kind) {
            match self.signature(&info.types) {
                Ok(signature) => methods.push(MethodDescriptor {
                    selector: info.selector,
                    kind,
                    signature,
                }),
                Err(err) => log::warn!(
                    "skipping {}[{} {}]: {err}",
                    kind_prefix(kind),
                    class.name(),
                    info.selector
                ),
            }
        }
        methods.sort_by(|a, b| a.selector.cmp(&b.selector));
        let methods: Rc<[MethodDescriptor]> = methods.into();
        let mut cache = class.cache(kind).borrow_mut();
        Ok(Rc::clone(cache.get_or_insert(methods)))
    }

    /// Adds a bridge-installed method to the cached tables.
    pub(crate) fn append_method(&self, class: &ClassDescriptor, method: MethodDescriptor) {
        self.record_signature(&method.selector, Rc::clone(&method.signature));
        let mut cache = class.cache(method.kind).borrow_mut();
        if let Some(methods) = cache.as_ref() {
            if methods.iter().any(|m| m.selector == method.selector) {
                return;
            }
            let mut extended = methods.to_vec();
            extended.push(method);
            extended.sort_by(|a, b| a.selector.cmp(&b.selector));
            *cache = Some(extended.into());
        }
        // Unscanned tables pick the method up from the runtime on first read.
    }

    /// Finds the method `class` (or an ancestor) responds to.
    ///
    /// # Errors
    ///
    /// Propagates [`Registry::methods_of`] errors.
    pub fn find_method(
        &self,
        class: &Rc<ClassDescriptor>,
        kind: MethodKind,
        selector: &Selector,
    ) -> Result<Option<MethodDescriptor>> {
        for ancestor in class.ancestry() {
            let methods = self.methods_of(&ancestor, kind)?;
            if let Ok(index) = methods.binary_search_by(|m| m.selector.cmp(selector)) {
                return Ok(Some(methods[index].clone()));
            }
        }
        Ok(None)
    }

    /// Looks up a signature by selector alone: the native tables first, then
    /// (under [`SignaturePolicy::Heuristic`]) the shape-derived default.
    #[must_use]
    pub fn lookup_signature(&self, selector: &Selector) -> Option<SignatureLookup> {
        self.ensure_scanned();
        let found = self
            .signatures
            .borrow()
            .as_ref()
            .and_then(|table| table.get(selector).cloned());
        if let Some(signature) = found {
            return Some(SignatureLookup {
                signature,
                source: SignatureSource::Runtime,
            });
        }
        if self.policy == SignaturePolicy::Heuristic {
            return self.derived_signature(selector);
        }
        None
    }

    /// The shape-derived default signature, regardless of policy.
    #[must_use]
    pub fn derived_signature(&self, selector: &Selector) -> Option<SignatureLookup> {
        let encoding = derived_encoding(selector)?;
        let signature = self.signature(encoding).ok()?;
        log::warn!("guessing signature {encoding} for '{selector}'");
        Some(SignatureLookup {
            signature,
            source: SignatureSource::Derived,
        })
    }

    /// Records a signature for `selector` unless one is already known.
    pub fn record_signature(&self, selector: &Selector, signature: Rc<Signature>) {
        self.ensure_scanned();
        if let Some(table) = self.signatures.borrow_mut().as_mut() {
            table.entry(selector.clone()).or_insert(signature);
        }
    }

    /// Every known (selector, signature) pair, sorted by selector.
    #[must_use]
    pub fn all_signatures(&self) -> Vec<(Selector, Rc<Signature>)> {
        self.ensure_scanned();
        let mut pairs: Vec<_> = self
            .signatures
            .borrow()
            .iter()
            .flatten()
            .map(|(selector, signature)| (selector.clone(), Rc::clone(signature)))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        pairs
    }

    /// Every native class name with its superclass name, in registration
    /// order.
    #[must_use]
    pub fn hierarchy(&self) -> Vec<(String, Option<String>)> {
        self.runtime
            .classes()
            .into_iter()
            .filter_map(|id| {
                let name = self.runtime.class_name(id)?;
                let parent = self
                    .runtime
                    .superclass(id)
                    .and_then(|parent| self.runtime.class_name(parent))
                    .map(|parent| parent.to_string());
                Some((name.to_string(), parent))
            })
            .collect()
    }

    /// How many full scans of the native tables have run.
    #[must_use]
    pub fn scan_count(&self) -> usize {
        self.scans.get()
    }

    fn ensure_scanned(&self) {
        if self.signatures.borrow().is_some() {
            return;
        }
        let mut table: FxHashMap<Selector, Rc<Signature>> = FxHashMap::default();
        for class in self.runtime.classes() {
            for kind in [MethodKind::Instance, MethodKind::Class] {
                for info in self.runtime.methods(class, kind) {
                    if table.contains_key(&info.selector) {
                        continue;
                    }
                    match self.signature(&info.types) {
                        Ok(signature) => {
                            table.insert(info.selector, signature);
                        }
                        Err(err) => log::debug!("unparsable encoding for {}: {err}", info.selector),
                    }
                }
            }
        }
        self.scans.set(self.scans.get() + 1);
        log::debug!("scanned native method tables: {} selectors", table.len());
        let mut signatures = self.signatures.borrow_mut();
        if signatures.is_none() {
            *signatures = Some(table);
        }
    }
}

fn kind_prefix(kind: MethodKind) -> char {
    match kind {
        MethodKind::Instance => '-',
        MethodKind::Class => '+',
    }
}
