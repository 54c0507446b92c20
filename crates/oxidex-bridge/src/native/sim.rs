//! In-process reference runtime.
//!
//! `SimRuntime` is a small Objective-C style object system: a class table
//! with instance and metaclass method tables, single inheritance, message
//! dispatch with superclass walk and `super` sends, manual reference
//! counting with an autorelease pool, and class creation at runtime. The
//! Foundation-like classes it ships with live in `foundation.rs`.
//!
//! Objects never reuse ids; a message to a deallocated object raises
//! [`NativeFault::DeadObject`] instead of touching freed state.

use super::foundation::{self, Foundation};
use super::{
    ArgFrame, ClassId, DeallocObserver, Imp, Message, MethodKind, NativeFault,
    NativeFunctionInfo, NativeMethodInfo, NativeRuntime, Number, ObjectId, Receiver,
    ReturnFrame, Target,
};
use crate::selector::Selector;
use fxhash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::ffi::CString;
use std::rc::Rc;

/// A method implemented in Rust against the runtime's internals.
pub(super) type Builtin = fn(&SimRuntime, &mut Message<'_>) -> Result<(), NativeFault>;

#[derive(Clone)]
enum Implementation {
    Builtin(Builtin),
    Dynamic(Imp),
}

#[derive(Clone)]
struct MethodEntry {
    types: Rc<str>,
    imp: Implementation,
}

struct ClassEntry {
    name: Rc<str>,
    superclass: Option<ClassId>,
    instance_methods: FxHashMap<Selector, MethodEntry>,
    class_methods: FxHashMap<Selector, MethodEntry>,
    /// Selectors in definition order, for stable method listings.
    instance_order: Vec<Selector>,
    class_order: Vec<Selector>,
}

impl ClassEntry {
    fn table(&self, kind: MethodKind) -> &FxHashMap<Selector, MethodEntry> {
        match kind {
            MethodKind::Instance => &self.instance_methods,
            MethodKind::Class => &self.class_methods,
        }
    }

    /// Inserts or replaces; returns true if a method was replaced.
    fn insert(&mut self, kind: MethodKind, selector: &Selector, entry: MethodEntry) -> bool {
        let (table, order) = match kind {
            MethodKind::Instance => (&mut self.instance_methods, &mut self.instance_order),
            MethodKind::Class => (&mut self.class_methods, &mut self.class_order),
        };
        let replaced = table.insert(selector.clone(), entry).is_some();
        if !replaced {
            order.push(selector.clone());
        }
        replaced
    }
}

/// Payload of a native object, chosen by class ancestry at allocation.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Payload {
    Plain,
    String(CString),
    Number(Number),
    Array(Vec<ObjectId>),
    Dictionary(Vec<(ObjectId, ObjectId)>),
}

impl Payload {
    fn children(&self) -> Vec<ObjectId> {
        match self {
            Payload::Array(items) => items.clone(),
            Payload::Dictionary(pairs) => pairs
                .iter()
                .flat_map(|(key, value)| [*key, *value])
                .collect(),
            _ => Vec::new(),
        }
    }
}

struct ObjectEntry {
    class: ClassId,
    refcount: usize,
    payload: Payload,
}

/// Phase of a key-value change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangePhase {
    /// `willChangeValueForKey:`
    Will,
    /// `didChangeValueForKey:`
    Did,
}

/// A change notification received by an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    /// The object that changed.
    pub object: ObjectId,
    /// The key.
    pub key: String,
    /// Will or did.
    pub phase: ChangePhase,
}

#[derive(Default)]
struct SimState {
    /// Index `n` holds `ClassId(n + 1)`.
    classes: Vec<ClassEntry>,
    class_ids: FxHashMap<Rc<str>, ClassId>,
    objects: FxHashMap<ObjectId, ObjectEntry>,
    pool: Vec<ObjectId>,
    sends: u64,
    sends_by_selector: FxHashMap<Selector, u64>,
    notifications: Vec<ChangeNotification>,
    functions: FxHashMap<String, NativeFunctionInfo>,
}

impl SimState {
    fn class(&self, id: ClassId) -> Option<&ClassEntry> {
        (id.0 as usize)
            .checked_sub(1)
            .and_then(|index| self.classes.get(index))
    }

    fn class_mut(&mut self, id: ClassId) -> Option<&mut ClassEntry> {
        (id.0 as usize)
            .checked_sub(1)
            .and_then(|index| self.classes.get_mut(index))
    }

    fn lookup(&self, class: ClassId, kind: MethodKind, selector: &Selector) -> Option<MethodEntry> {
        let mut current = Some(class);
        while let Some(id) = current {
            let entry = self.class(id)?;
            if let Some(method) = entry.table(kind).get(selector) {
                return Some(method.clone());
            }
            current = entry.superclass;
        }
        None
    }

    fn is_subclass(&self, class: ClassId, ancestor: ClassId) -> bool {
        let mut current = Some(class);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.class(id).and_then(|entry| entry.superclass);
        }
        false
    }
}

/// In-process Objective-C style runtime.
///
/// # Example
///
/// ```
/// use oxidex_bridge::native::{NativeRuntime, SimRuntime};
///
/// let runtime = SimRuntime::new();
/// let string = runtime.new_string("hello").unwrap();
/// assert_eq!(runtime.string_value(string).as_deref(), Some("hello"));
/// runtime.release(string).unwrap();
/// assert_eq!(runtime.retain_count(string), None);
/// ```
pub struct SimRuntime {
    state: RefCell<SimState>,
    next_object: Cell<u64>,
    foundation: Foundation,
    observer: RefCell<Option<DeallocObserver>>,
}

impl Default for SimRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl SimRuntime {
    /// Creates a runtime with the Foundation-like classes and functions
    /// installed.
    #[must_use]
    pub fn new() -> Self {
        let mut runtime = Self {
            state: RefCell::new(SimState::default()),
            next_object: Cell::new(1),
            foundation: Foundation::default(),
            observer: RefCell::new(None),
        };
        runtime.foundation = foundation::install(&runtime);
        runtime
    }

    pub(super) fn foundation(&self) -> &Foundation {
        &self.foundation
    }

    /// Total number of messages sent.
    #[must_use]
    pub fn send_count(&self) -> u64 {
        self.state.borrow().sends
    }

    /// Number of times `selector` was sent.
    #[must_use]
    pub fn send_count_for(&self, selector: &str) -> u64 {
        let Ok(selector) = selector.parse::<Selector>() else {
            return 0;
        };
        self.state
            .borrow()
            .sends_by_selector
            .get(&selector)
            .copied()
            .unwrap_or(0)
    }

    /// Number of live objects.
    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.state.borrow().objects.len()
    }

    /// Number of objects waiting in the autorelease pool.
    #[must_use]
    pub fn pending_autoreleases(&self) -> usize {
        self.state.borrow().pool.len()
    }

    /// Change notifications received so far, oldest first.
    #[must_use]
    pub fn notifications(&self) -> Vec<ChangeNotification> {
        self.state.borrow().notifications.clone()
    }

    /// Removes and returns the change notifications received so far.
    pub fn take_notifications(&self) -> Vec<ChangeNotification> {
        std::mem::take(&mut self.state.borrow_mut().notifications)
    }

    /// Ids are never reused, so an allocated id that is no longer live
    /// belongs to a deallocated object.
    fn was_allocated(&self, object: ObjectId) -> bool {
        !object.is_nil() && object.0 < self.next_object.get()
    }

    /// Registers a native function.
    pub fn define_function(
        &self,
        name: &str,
        types: Option<&str>,
        imp: super::NativeFn,
    ) {
        self.state.borrow_mut().functions.insert(
            name.to_string(),
            NativeFunctionInfo {
                types: types.map(Rc::from),
                imp,
            },
        );
    }

    // ------------------------------------------------------------------
    // Internals shared with the builtin methods
    // ------------------------------------------------------------------

    pub(super) fn define_class(&self, name: &str, superclass: Option<ClassId>) -> ClassId {
        let mut state = self.state.borrow_mut();
        if let Some(id) = state.class_ids.get(name) {
            return *id;
        }
        let index = u32::try_from(state.classes.len()).unwrap_or(u32::MAX - 1);
        let id = ClassId(index + 1);
        let name: Rc<str> = Rc::from(name);
        state.classes.push(ClassEntry {
            name: Rc::clone(&name),
            superclass,
            instance_methods: FxHashMap::default(),
            class_methods: FxHashMap::default(),
            instance_order: Vec::new(),
            class_order: Vec::new(),
        });
        state.class_ids.insert(name, id);
        id
    }

    pub(super) fn define_builtin(
        &self,
        class: ClassId,
        kind: MethodKind,
        selector: &str,
        types: &str,
        builtin: Builtin,
    ) {
        let Ok(selector) = selector.parse::<Selector>() else {
            return;
        };
        let mut state = self.state.borrow_mut();
        if let Some(entry) = state.class_mut(class) {
            entry.insert(
                kind,
                &selector,
                MethodEntry {
                    types: Rc::from(types),
                    imp: Implementation::Builtin(builtin),
                },
            );
        }
    }

    /// Creates an object with refcount 1.
    pub(super) fn create(&self, class: ClassId, payload: Payload) -> ObjectId {
        let id = ObjectId(self.next_object.get());
        self.next_object.set(id.0 + 1);
        self.state.borrow_mut().objects.insert(
            id,
            ObjectEntry {
                class,
                refcount: 1,
                payload,
            },
        );
        id
    }

    /// Creates an object with refcount 1 and puts it in the pool.
    pub(super) fn create_autoreleased(&self, class: ClassId, payload: Payload) -> ObjectId {
        let id = self.create(class, payload);
        self.state.borrow_mut().pool.push(id);
        id
    }

    /// The payload an `alloc` of `class` starts with.
    pub(super) fn initial_payload(&self, class: ClassId) -> Payload {
        let state = self.state.borrow();
        let f = &self.foundation;
        if state.is_subclass(class, f.string) {
            Payload::String(CString::default())
        } else if state.is_subclass(class, f.number) {
            Payload::Number(Number::Int(0))
        } else if state.is_subclass(class, f.array) {
            Payload::Array(Vec::new())
        } else if state.is_subclass(class, f.dictionary) {
            Payload::Dictionary(Vec::new())
        } else {
            Payload::Plain
        }
    }

    pub(super) fn is_subclass(&self, class: ClassId, ancestor: ClassId) -> bool {
        self.state.borrow().is_subclass(class, ancestor)
    }

    pub(super) fn payload(&self, object: ObjectId) -> Result<Payload, NativeFault> {
        self.state
            .borrow()
            .objects
            .get(&object)
            .map(|entry| entry.payload.clone())
            .ok_or(NativeFault::DeadObject { id: object })
    }

    /// Applies `f` to the payload of a live object.
    pub(super) fn with_payload<T>(
        &self,
        object: ObjectId,
        f: impl FnOnce(&mut Payload) -> Result<T, NativeFault>,
    ) -> Result<T, NativeFault> {
        let mut state = self.state.borrow_mut();
        let entry = state
            .objects
            .get_mut(&object)
            .ok_or(NativeFault::DeadObject { id: object })?;
        f(&mut entry.payload)
    }

    /// Address of a string object's bytes; valid while the object lives.
    pub(super) fn c_string_address(&self, object: ObjectId) -> Result<usize, NativeFault> {
        let state = self.state.borrow();
        match state.objects.get(&object).map(|entry| &entry.payload) {
            Some(Payload::String(text)) => Ok(text.as_ptr() as usize),
            Some(_) => Err(NativeFault::exception(
                "InvalidArgumentException",
                format!("object {object} is not a string"),
            )),
            None => Err(NativeFault::DeadObject { id: object }),
        }
    }

    pub(super) fn record_notification(&self, object: ObjectId, key: String, phase: ChangePhase) {
        self.state
            .borrow_mut()
            .notifications
            .push(ChangeNotification { object, key, phase });
    }

    pub(super) fn class_name_or_unknown(&self, class: ClassId) -> String {
        self.class_name(class)
            .map_or_else(|| format!("<class {}>", class.0), |name| name.to_string())
    }

    /// Payload-aware equality: strings and numbers compare by value,
    /// everything else by identity.
    pub(super) fn objects_equal(&self, a: ObjectId, b: ObjectId) -> bool {
        if a == b {
            return true;
        }
        let state = self.state.borrow();
        match (
            state.objects.get(&a).map(|entry| &entry.payload),
            state.objects.get(&b).map(|entry| &entry.payload),
        ) {
            (Some(Payload::String(x)), Some(Payload::String(y))) => x == y,
            (Some(Payload::Number(x)), Some(Payload::Number(y))) => {
                number_as_f64(*x) == number_as_f64(*y)
            }
            _ => false,
        }
    }

    fn release_all(&self, objects: Vec<ObjectId>) {
        let mut pending = objects;
        while let Some(object) = pending.pop() {
            let freed = {
                let mut state = self.state.borrow_mut();
                let Some(entry) = state.objects.get_mut(&object) else {
                    log::warn!("release of dead object {object}");
                    continue;
                };
                entry.refcount -= 1;
                if entry.refcount > 0 {
                    continue;
                }
                let entry = state.objects.remove(&object);
                entry.map(|entry| entry.payload.children()).unwrap_or_default()
            };
            log::trace!("dealloc {object}");
            let observer = self.observer.borrow().clone();
            if let Some(observer) = observer {
                observer(object);
            }
            pending.extend(freed);
        }
    }
}

pub(super) fn number_as_f64(number: Number) -> f64 {
    match number {
        #[allow(clippy::cast_precision_loss)]
        Number::Int(value) => value as f64,
        Number::Float(value) => value,
        Number::Bool(value) => f64::from(u8::from(value)),
    }
}

impl NativeRuntime for SimRuntime {
    fn classes(&self) -> Vec<ClassId> {
        let count = self.state.borrow().classes.len();
        (1..=count)
            .filter_map(|id| u32::try_from(id).ok().map(ClassId))
            .collect()
    }

    fn class_named(&self, name: &str) -> Option<ClassId> {
        self.state.borrow().class_ids.get(name).copied()
    }

    fn class_name(&self, class: ClassId) -> Option<Rc<str>> {
        self.state
            .borrow()
            .class(class)
            .map(|entry| Rc::clone(&entry.name))
    }

    fn superclass(&self, class: ClassId) -> Option<ClassId> {
        self.state.borrow().class(class)?.superclass
    }

    fn methods(&self, class: ClassId, kind: MethodKind) -> Vec<NativeMethodInfo> {
        let state = self.state.borrow();
        let Some(entry) = state.class(class) else {
            return Vec::new();
        };
        let order = match kind {
            MethodKind::Instance => &entry.instance_order,
            MethodKind::Class => &entry.class_order,
        };
        order
            .iter()
            .filter_map(|selector| {
                entry.table(kind).get(selector).map(|method| NativeMethodInfo {
                    selector: selector.clone(),
                    types: Rc::clone(&method.types),
                })
            })
            .collect()
    }

    fn class_of(&self, object: ObjectId) -> Option<ClassId> {
        self.state.borrow().objects.get(&object).map(|entry| entry.class)
    }

    fn responds_to(&self, receiver: Receiver, selector: &Selector) -> bool {
        let state = self.state.borrow();
        let (class, kind) = match receiver {
            Receiver::Object(object) => match state.objects.get(&object) {
                Some(entry) => (entry.class, MethodKind::Instance),
                None => return false,
            },
            Receiver::Class(class) => (class, MethodKind::Class),
        };
        state.lookup(class, kind, selector).is_some()
    }

    fn send(
        &self,
        target: Target,
        selector: &Selector,
        args: &ArgFrame,
        ret: &mut ReturnFrame,
    ) -> Result<(), NativeFault> {
        let method = {
            let mut state = self.state.borrow_mut();
            state.sends += 1;
            *state.sends_by_selector.entry(selector.clone()).or_insert(0) += 1;

            let class = match target.receiver {
                Receiver::Object(object) if object.is_nil() => {
                    // Messages to nil return zero.
                    ret.clear();
                    return Ok(());
                }
                Receiver::Object(object) => match state.objects.get(&object) {
                    Some(entry) => entry.class,
                    None if self.was_allocated(object) => {
                        return Err(NativeFault::DeadObject { id: object });
                    }
                    None => {
                        return Err(NativeFault::exception(
                            "InvalidReceiverException",
                            format!("no object {object}"),
                        ));
                    }
                },
                Receiver::Class(class) => class,
            };
            let start = target.start.unwrap_or(class);
            match state.lookup(start, target.kind(), selector) {
                Some(method) => method,
                None => {
                    let name = state
                        .class(class)
                        .map_or_else(|| "<unknown>".to_string(), |entry| entry.name.to_string());
                    let prefix = match target.kind() {
                        MethodKind::Instance => "-",
                        MethodKind::Class => "+",
                    };
                    return Err(NativeFault::UnrecognizedSelector {
                        class: name,
                        selector: format!("{prefix}{selector}"),
                    });
                }
            }
        };

        let mut message = Message {
            target,
            selector,
            args,
            ret,
        };
        match method.imp {
            Implementation::Builtin(builtin) => builtin(self, &mut message),
            Implementation::Dynamic(imp) => imp(&mut message),
        }
    }

    fn retain(&self, object: ObjectId) -> Result<(), NativeFault> {
        if object.is_nil() {
            return Ok(());
        }
        let mut state = self.state.borrow_mut();
        let entry = state
            .objects
            .get_mut(&object)
            .ok_or(NativeFault::DeadObject { id: object })?;
        entry.refcount += 1;
        Ok(())
    }

    fn release(&self, object: ObjectId) -> Result<(), NativeFault> {
        if object.is_nil() {
            return Ok(());
        }
        if !self.state.borrow().objects.contains_key(&object) {
            return Err(NativeFault::DeadObject { id: object });
        }
        self.release_all(vec![object]);
        Ok(())
    }

    fn autorelease(&self, object: ObjectId) -> Result<(), NativeFault> {
        if object.is_nil() {
            return Ok(());
        }
        let mut state = self.state.borrow_mut();
        if !state.objects.contains_key(&object) {
            return Err(NativeFault::DeadObject { id: object });
        }
        state.pool.push(object);
        Ok(())
    }

    fn drain_pool(&self) {
        let pending = std::mem::take(&mut self.state.borrow_mut().pool);
        if !pending.is_empty() {
            log::trace!("draining {} autoreleased objects", pending.len());
        }
        // Release in reverse so later autoreleases go first, as a pool pop
        // would.
        let mut ordered = pending;
        ordered.reverse();
        for object in ordered {
            if let Err(fault) = self.release(object) {
                log::warn!("autorelease pool: {fault}");
            }
        }
    }

    fn retain_count(&self, object: ObjectId) -> Option<usize> {
        self.state
            .borrow()
            .objects
            .get(&object)
            .map(|entry| entry.refcount)
    }

    fn allocate_class(&self, name: &str, parent: ClassId) -> Result<ClassId, NativeFault> {
        {
            let state = self.state.borrow();
            if state.class_ids.contains_key(name) {
                return Err(NativeFault::exception(
                    "ClassExistsException",
                    format!("class '{name}' already exists"),
                ));
            }
            if state.class(parent).is_none() {
                return Err(NativeFault::exception(
                    "InvalidArgumentException",
                    format!("unknown parent class {}", parent.0),
                ));
            }
        }
        Ok(self.define_class(name, Some(parent)))
    }

    fn add_method(
        &self,
        class: ClassId,
        kind: MethodKind,
        selector: &Selector,
        types: &str,
        imp: Imp,
    ) -> bool {
        let mut state = self.state.borrow_mut();
        let Some(entry) = state.class_mut(class) else {
            return false;
        };
        if entry.table(kind).contains_key(selector) {
            return false;
        }
        entry.insert(
            kind,
            selector,
            MethodEntry {
                types: Rc::from(types),
                imp: Implementation::Dynamic(imp),
            },
        );
        true
    }

    fn replace_method(
        &self,
        class: ClassId,
        kind: MethodKind,
        selector: &Selector,
        types: &str,
        imp: Imp,
    ) -> bool {
        let mut state = self.state.borrow_mut();
        let Some(entry) = state.class_mut(class) else {
            return false;
        };
        entry.insert(
            kind,
            selector,
            MethodEntry {
                types: Rc::from(types),
                imp: Implementation::Dynamic(imp),
            },
        )
    }

    fn new_string(&self, value: &str) -> Result<ObjectId, NativeFault> {
        let text = CString::new(value).map_err(|_| {
            NativeFault::exception("InvalidArgumentException", "string contains NUL")
        })?;
        Ok(self.create(self.foundation.string, Payload::String(text)))
    }

    fn string_value(&self, object: ObjectId) -> Option<String> {
        match self.state.borrow().objects.get(&object)?.payload {
            Payload::String(ref text) => Some(text.to_string_lossy().into_owned()),
            _ => None,
        }
    }

    fn new_number(&self, value: Number) -> Result<ObjectId, NativeFault> {
        Ok(self.create(self.foundation.number, Payload::Number(value)))
    }

    fn number_value(&self, object: ObjectId) -> Option<Number> {
        match self.state.borrow().objects.get(&object)?.payload {
            Payload::Number(number) => Some(number),
            _ => None,
        }
    }

    fn function(&self, name: &str) -> Option<NativeFunctionInfo> {
        self.state.borrow().functions.get(name).cloned()
    }

    fn set_dealloc_observer(&self, observer: Option<DeallocObserver>) {
        *self.observer.borrow_mut() = observer;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Signature;

    fn send(
        runtime: &SimRuntime,
        target: Target,
        selector: &str,
        types: &str,
    ) -> Result<ReturnFrame, NativeFault> {
        let sig = Signature::parse(types).unwrap();
        let selector: Selector = selector.parse().unwrap();
        let args = ArgFrame::new(sig.arg_types()).unwrap();
        let mut ret = ReturnFrame::new(sig.return_type()).unwrap();
        runtime.send(target, &selector, &args, &mut ret)?;
        Ok(ret)
    }

    #[test]
    fn test_alloc_init_release() {
        let runtime = SimRuntime::new();
        let object_class = runtime.class_named("Object").unwrap();
        let ret = send(&runtime, Target::class(object_class), "alloc", "@#:").unwrap();
        let object = ret.object().unwrap();
        assert_eq!(runtime.retain_count(object), Some(1));
        assert_eq!(runtime.class_of(object), Some(object_class));

        runtime.retain(object).unwrap();
        runtime.release(object).unwrap();
        runtime.release(object).unwrap();
        assert_eq!(runtime.retain_count(object), None);
        assert_eq!(
            send(&runtime, Target::instance(object), "hash", "Q@:").unwrap_err(),
            NativeFault::DeadObject { id: object }
        );
        assert!(runtime.release(object).is_err());
    }

    #[test]
    fn test_unrecognized_selector() {
        let runtime = SimRuntime::new();
        let object_class = runtime.class_named("Object").unwrap();
        let err = send(&runtime, Target::class(object_class), "frobnicate", "v#:").unwrap_err();
        assert!(matches!(err, NativeFault::UnrecognizedSelector { .. }));
        assert_eq!(runtime.send_count_for("frobnicate"), 1);
    }

    #[test]
    fn test_dynamic_method_and_super() {
        let runtime = SimRuntime::new();
        let object_class = runtime.class_named("Object").unwrap();
        let base = runtime.allocate_class("Base", object_class).unwrap();
        let derived = runtime.allocate_class("Derived", base).unwrap();
        assert!(runtime.allocate_class("Base", object_class).is_err());
        assert_eq!(runtime.superclass(derived), Some(base));

        let answer: Selector = "answer".parse().unwrap();
        let base_imp: Imp = Rc::new(|msg: &mut Message<'_>| msg.ret.set_int(1));
        let derived_imp: Imp = Rc::new(|msg: &mut Message<'_>| msg.ret.set_int(2));
        assert!(runtime.add_method(base, MethodKind::Class, &answer, "i#:", Rc::clone(&base_imp)));
        assert!(!runtime.add_method(base, MethodKind::Class, &answer, "i#:", base_imp));
        assert!(runtime.add_method(derived, MethodKind::Class, &answer, "i#:", derived_imp));

        let ret = send(&runtime, Target::class(derived), "answer", "i#:").unwrap();
        assert_eq!(ret.int(), Some(2));
        let target = Target::super_of(Receiver::Class(derived), base);
        let ret = send(&runtime, target, "answer", "i#:").unwrap();
        assert_eq!(ret.int(), Some(1));
        assert_eq!(runtime.methods(derived, MethodKind::Class).len(), 1);
        assert!(runtime.responds_to(Receiver::Class(derived), &answer));
    }

    #[test]
    fn test_autorelease_pool_and_children() {
        let runtime = SimRuntime::new();
        let array = runtime.create(runtime.foundation().mutable_array, Payload::Array(Vec::new()));
        let item = runtime.new_string("item").unwrap();
        runtime
            .with_payload(array, |payload| {
                if let Payload::Array(items) = payload {
                    items.push(item);
                }
                Ok(())
            })
            .unwrap();
        runtime.autorelease(array).unwrap();
        assert_eq!(runtime.pending_autoreleases(), 1);
        runtime.drain_pool();
        assert_eq!(runtime.retain_count(array), None);
        assert_eq!(runtime.retain_count(item), None);
    }

    #[test]
    fn test_dealloc_observer() {
        let runtime = SimRuntime::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        runtime.set_dealloc_observer(Some(Rc::new(move |id| sink.borrow_mut().push(id))));
        let number = runtime.new_number(Number::Int(4)).unwrap();
        runtime.release(number).unwrap();
        assert_eq!(*seen.borrow(), vec![number]);
    }

    #[test]
    fn test_dead_and_unknown_receivers_differ() {
        let runtime = SimRuntime::new();
        let number = runtime.new_number(Number::Int(1)).unwrap();
        runtime.release(number).unwrap();
        assert_eq!(
            send(&runtime, Target::instance(number), "hash", "Q@:").unwrap_err(),
            NativeFault::DeadObject { id: number }
        );
        let unknown = ObjectId(u64::MAX);
        let err = send(&runtime, Target::instance(unknown), "hash", "Q@:").unwrap_err();
        assert!(matches!(err, NativeFault::Exception { .. }), "{err}");
    }

    #[test]
    fn test_take_notifications_drains() {
        let runtime = SimRuntime::new();
        let object = runtime.new_string("observed").unwrap();
        runtime.record_notification(object, "value".to_string(), ChangePhase::Will);
        runtime.record_notification(object, "value".to_string(), ChangePhase::Did);
        let taken = runtime.take_notifications();
        assert_eq!(taken.len(), 2);
        assert_eq!(taken[1].phase, ChangePhase::Did);
        assert!(runtime.take_notifications().is_empty());
        assert!(runtime.notifications().is_empty());
    }

    #[test]
    fn test_message_to_nil() {
        let runtime = SimRuntime::new();
        let ret = send(&runtime, Target::instance(ObjectId::NIL), "count", "Q@:").unwrap();
        assert_eq!(ret.int(), Some(0));
    }
}
