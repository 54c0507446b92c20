//! The bridge facade.
//!
//! [`Bridge`] ties the registry mirror, the ownership ledger, the wrapper
//! table and the bound script methods to one native runtime. It is a cheap
//! `Rc` handle: trampolines installed in the native runtime hold a weak
//! reference back to the same state.

use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::handle::{NativeHandle, OwnershipLedger};
use crate::native::{ClassId, MethodKind, NativeRuntime, Number, ObjectId, Receiver};
use crate::registry::Registry;
use crate::selector::{Ownership, Selector};
use crate::value::Value;
use crate::wrapper::{ClassOrigin, ClassState, WrapperClass, WrapperTable};
use fxhash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::ffi::CString;
use std::fmt;
use std::rc::{Rc, Weak};

/// Counts of boundary crossings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Messages the bridge sent into the native runtime.
    pub script_to_native: u64,
    /// Native messages delivered to script methods.
    pub native_to_script: u64,
}

#[derive(Default)]
pub(crate) struct CallTracker {
    methods: FxHashMap<String, u64>,
    signatures: FxHashMap<String, u64>,
}

impl CallTracker {
    pub(crate) fn record(&mut self, selector: &Selector, signature: &str) {
        *self.methods.entry(selector.name().to_string()).or_insert(0) += 1;
        *self.signatures.entry(signature.to_string()).or_insert(0) += 1;
    }
}

fn top(counts: &FxHashMap<String, u64>, limit: usize) -> Vec<(String, u64)> {
    let mut entries: Vec<(String, u64)> = counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(limit);
    entries
}

pub(crate) struct BridgeInner {
    pub(crate) runtime: Rc<dyn NativeRuntime>,
    pub(crate) ledger: Rc<OwnershipLedger>,
    pub(crate) registry: Registry,
    pub(crate) wrappers: WrapperTable,
    pub(crate) config: BridgeConfig,
    pub(crate) stats: Cell<BridgeStats>,
    pub(crate) calls: RefCell<CallTracker>,
    /// Per-instance script state (accessor values).
    pub(crate) ivars: RefCell<FxHashMap<ObjectId, FxHashMap<String, Value>>>,
    /// C strings returned to native callers, alive until the next drain.
    pub(crate) c_strings: RefCell<Vec<CString>>,
}

impl Drop for BridgeInner {
    fn drop(&mut self) {
        self.runtime.set_dealloc_observer(None);
    }
}

/// A bridge between script values and one native runtime.
///
/// # Example
///
/// ```
/// use oxidex_bridge::{Bridge, Value};
/// use oxidex_bridge::native::SimRuntime;
/// use std::rc::Rc;
///
/// let bridge = Bridge::new(Rc::new(SimRuntime::new()));
/// let text = bridge.string("hello").unwrap();
/// let upper = bridge.send(&text, "uppercaseString", &[]).unwrap();
/// assert_eq!(bridge.to_string_value(&upper).as_deref(), Some("HELLO"));
///
/// let length = bridge.call(&text, "length", &[]).unwrap();
/// assert_eq!(length, Value::Int(5));
/// ```
#[derive(Clone)]
pub struct Bridge {
    pub(crate) inner: Rc<BridgeInner>,
}

impl Bridge {
    /// Creates a bridge with the default configuration.
    #[must_use]
    pub fn new(runtime: Rc<dyn NativeRuntime>) -> Self {
        Self::with_config(runtime, BridgeConfig::default())
    }

    /// Creates a bridge.
    #[must_use]
    pub fn with_config(runtime: Rc<dyn NativeRuntime>, config: BridgeConfig) -> Self {
        let ledger = Rc::new(OwnershipLedger::new(Rc::clone(&runtime)));
        let registry = Registry::new(Rc::clone(&runtime), config.signature_policy);
        let inner = Rc::new(BridgeInner {
            runtime,
            ledger,
            registry,
            wrappers: WrapperTable::default(),
            config,
            stats: Cell::new(BridgeStats::default()),
            calls: RefCell::new(CallTracker::default()),
            ivars: RefCell::new(FxHashMap::default()),
            c_strings: RefCell::new(Vec::new()),
        });

        let weak: Weak<BridgeInner> = Rc::downgrade(&inner);
        inner.runtime.set_dealloc_observer(Some(Rc::new(move |object| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            // Dropping the state may release further objects and re-enter.
            let state = inner.ivars.borrow_mut().remove(&object);
            drop(state);
        })));
        log::debug!(
            "bridge created (signatures: {:?}, track_calls: {})",
            inner.config.signature_policy,
            inner.config.track_calls
        );
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Rc<BridgeInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<BridgeInner> {
        Rc::downgrade(&self.inner)
    }

    /// The native runtime.
    #[must_use]
    pub fn runtime(&self) -> &Rc<dyn NativeRuntime> {
        &self.inner.runtime
    }

    /// The ownership ledger.
    #[must_use]
    pub fn ledger(&self) -> &Rc<OwnershipLedger> {
        &self.inner.ledger
    }

    /// The registry mirror.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Boundary crossing counters.
    #[must_use]
    pub fn stats(&self) -> BridgeStats {
        self.inner.stats.get()
    }

    pub(crate) fn count_outgoing(&self) {
        let mut stats = self.inner.stats.get();
        stats.script_to_native += 1;
        self.inner.stats.set(stats);
    }

    pub(crate) fn count_incoming(&self) {
        let mut stats = self.inner.stats.get();
        stats.native_to_script += 1;
        self.inner.stats.set(stats);
    }

    /// The most sent selectors, most frequent first. Empty unless
    /// `track_calls` is enabled.
    #[must_use]
    pub fn top_methods(&self, limit: usize) -> Vec<(String, u64)> {
        top(&self.inner.calls.borrow().methods, limit)
    }

    /// The most used signatures, most frequent first. Empty unless
    /// `track_calls` is enabled.
    #[must_use]
    pub fn top_signatures(&self, limit: usize) -> Vec<(String, u64)> {
        top(&self.inner.calls.borrow().signatures, limit)
    }

    // ========================================================================
    // Classes
    // ========================================================================

    /// Resolves a native class and returns its wrapper.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvedClass`] for unknown names.
    pub fn import(&self, name: &str) -> Result<Rc<WrapperClass>> {
        let descriptor = self.inner.registry.resolve(name)?;
        Ok(self.inner.wrappers.wrap(&descriptor, ClassOrigin::Imported))
    }

    /// The class object for `name`, as a script value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvedClass`] for unknown names.
    pub fn class(&self, name: &str) -> Result<Value> {
        Ok(Value::Class(self.import(name)?.descriptor().id()))
    }

    /// The lifecycle state of the class called `name`.
    #[must_use]
    pub fn class_state(&self, name: &str) -> ClassState {
        match self.inner.runtime.class_named(name) {
            Some(id) => self
                .inner
                .wrappers
                .get(id)
                .map_or(ClassState::Unregistered, |wrapper| wrapper.state()),
            None => ClassState::Unregistered,
        }
    }

    /// The wrapper of a value's class, with the method table its messages
    /// use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidReceiver`] for values that are neither live
    /// objects nor classes.
    pub fn wrapper_of(&self, value: &Value) -> Result<(Rc<WrapperClass>, MethodKind)> {
        let (class, kind) = self.class_id_of(value).ok_or_else(|| Error::InvalidReceiver {
            selector: "class".to_string(),
            got: value.type_name(),
        })?;
        let descriptor = self.inner.registry.descriptor_for_id(class)?;
        Ok((self.inner.wrappers.wrap(&descriptor, ClassOrigin::Imported), kind))
    }

    pub(crate) fn wrappers(&self) -> &WrapperTable {
        &self.inner.wrappers
    }

    fn class_id_of(&self, value: &Value) -> Option<(ClassId, MethodKind)> {
        match value {
            Value::Object(handle) => self
                .inner
                .runtime
                .class_of(handle.id())
                .map(|class| (class, MethodKind::Instance)),
            Value::Class(class) => Some((*class, MethodKind::Class)),
            _ => None,
        }
    }

    /// True if native dispatch would find `selector` for `receiver`.
    #[must_use]
    pub fn responds_to(&self, receiver: &Value, selector: &str) -> bool {
        let Ok(selector) = selector.parse::<Selector>() else {
            return false;
        };
        match receiver_of(receiver) {
            Some(receiver) => self.inner.runtime.responds_to(receiver, &selector),
            None => false,
        }
    }

    // ========================================================================
    // Script-name dispatch
    // ========================================================================

    /// Calls a method by its script name.
    ///
    /// Bridged script methods are called directly; the callable is the same
    /// one native dispatch reaches. Other names are converted to selectors
    /// (`objectAtIndex_` becomes `objectAtIndex:`) and sent natively.
    /// Reserved names are only reachable through their alias.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchMethod`] when nothing answers to `name`, and
    /// any error of the method itself.
    pub fn call(&self, receiver: &Value, name: &str, args: &[Value]) -> Result<Value> {
        let (wrapper, kind) = self.wrapper_of(receiver)?;
        if let Some(binding) = wrapper.resolve_script_name(kind, name) {
            let expected = binding.signature().explicit_arg_count();
            if args.len() != expected {
                return Err(Error::ArgumentCountMismatch {
                    selector: binding.selector().to_string(),
                    expected,
                    got: args.len(),
                });
            }
            return binding.call(self, receiver, args);
        }

        let config = &self.inner.config;
        if config.is_reserved(name) {
            let alias = config.alias_for(name);
            return Err(Error::NoSuchMethod {
                class: wrapper.name().to_string(),
                name: name.to_string(),
                hint: format!(" (reserved name; native method is reachable as '{alias}')"),
            });
        }
        let native_name = name
            .strip_prefix(config.alias_prefix.as_str())
            .filter(|stripped| config.is_reserved(stripped))
            .unwrap_or(name);

        let selector = Selector::from_script_name(native_name)?;
        let receiver_id = receiver_of(receiver).ok_or_else(|| Error::InvalidReceiver {
            selector: selector.to_string(),
            got: receiver.type_name(),
        })?;
        if !self.inner.runtime.responds_to(receiver_id, &selector) {
            return Err(Error::NoSuchMethod {
                class: wrapper.name().to_string(),
                name: name.to_string(),
                hint: String::new(),
            });
        }
        self.send_selector(receiver, &selector, None, args)
    }

    // ========================================================================
    // Values
    // ========================================================================

    /// Creates an instance of `class` with `+new`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvedClass`] or the native fault of `+new`.
    pub fn new_object(&self, class: &str) -> Result<Value> {
        let class = self.class(class)?;
        self.send(&class, "new", &[])
    }

    /// Boxes a native string.
    ///
    /// # Errors
    ///
    /// Fails when the runtime cannot represent the text.
    pub fn string(&self, text: &str) -> Result<Value> {
        let id = self
            .inner
            .runtime
            .new_string(text)
            .map_err(|fault| Error::NativeCallFault {
                selector: "<box string>".to_string(),
                fault,
            })?;
        Ok(Value::Object(NativeHandle::wrap(&self.inner.ledger, id, Ownership::Owned)?))
    }

    /// Boxes a native number.
    ///
    /// # Errors
    ///
    /// Fails when the runtime cannot box numbers.
    pub fn number(&self, number: Number) -> Result<Value> {
        let id = self
            .inner
            .runtime
            .new_number(number)
            .map_err(|fault| Error::NativeCallFault {
                selector: "<box number>".to_string(),
                fault,
            })?;
        Ok(Value::Object(NativeHandle::wrap(&self.inner.ledger, id, Ownership::Owned)?))
    }

    /// Text of a script string or native string object.
    #[must_use]
    pub fn to_string_value(&self, value: &Value) -> Option<String> {
        match value {
            Value::Str(text) => Some(text.clone()),
            Value::Object(handle) => self.inner.runtime.string_value(handle.id()),
            _ => None,
        }
    }

    /// Integer view of a script number or native number object.
    #[must_use]
    pub fn to_i64(&self, value: &Value) -> Option<i64> {
        match value {
            Value::Object(handle) => match self.inner.runtime.number_value(handle.id())? {
                Number::Int(number) => Some(number),
                #[allow(clippy::cast_possible_truncation)]
                Number::Float(number) => Some(number as i64),
                Number::Bool(flag) => Some(i64::from(flag)),
            },
            other => other.as_i64(),
        }
    }

    /// Floating point view of a script number or native number object.
    #[must_use]
    pub fn to_f64(&self, value: &Value) -> Option<f64> {
        match value {
            Value::Object(handle) => match self.inner.runtime.number_value(handle.id())? {
                #[allow(clippy::cast_precision_loss)]
                Number::Int(number) => Some(number as f64),
                Number::Float(number) => Some(number),
                Number::Bool(flag) => Some(f64::from(u8::from(flag))),
            },
            other => other.as_f64(),
        }
    }

    /// Script state stored on a native instance; nil when unset.
    #[must_use]
    pub fn ivar(&self, receiver: &Value, key: &str) -> Value {
        let Some(handle) = receiver.as_handle() else {
            return Value::Nil;
        };
        self.inner
            .ivars
            .borrow()
            .get(&handle.id())
            .and_then(|state| state.get(key))
            .cloned()
            .unwrap_or(Value::Nil)
    }

    /// Stores script state on a native instance. The state is dropped when
    /// the native object is deallocated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidReceiver`] unless `receiver` is an object.
    pub fn set_ivar(&self, receiver: &Value, key: &str, value: Value) -> Result<()> {
        let handle = receiver.as_handle().ok_or_else(|| Error::InvalidReceiver {
            selector: format!("set {key}"),
            got: receiver.type_name(),
        })?;
        let previous = self
            .inner
            .ivars
            .borrow_mut()
            .entry(handle.id())
            .or_default()
            .insert(key.to_string(), value);
        drop(previous);
        Ok(())
    }

    /// Drains the native autorelease pool and frees C strings handed to
    /// native callers.
    pub fn drain_pool(&self) {
        self.inner.runtime.drain_pool();
        let strings = std::mem::take(&mut *self.inner.c_strings.borrow_mut());
        drop(strings);
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("wrappers", &self.inner.wrappers.len())
            .field("ledger", &self.inner.ledger)
            .field("stats", &self.inner.stats.get())
            .finish_non_exhaustive()
    }
}

/// The native receiver a value stands for. Nil is the nil object.
pub(crate) fn receiver_of(value: &Value) -> Option<Receiver> {
    match value {
        Value::Nil => Some(Receiver::Object(ObjectId::NIL)),
        Value::Object(handle) => Some(Receiver::Object(handle.id())),
        Value::Class(class) => Some(Receiver::Class(*class)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::SimRuntime;

    fn bridge() -> (Rc<SimRuntime>, Bridge) {
        let runtime = Rc::new(SimRuntime::new());
        let bridge = Bridge::new(runtime.clone());
        (runtime, bridge)
    }

    #[test]
    fn test_import_and_state() {
        let (_runtime, bridge) = bridge();
        assert_eq!(bridge.class_state("Array"), ClassState::Unregistered);
        let wrapper = bridge.import("Array").unwrap();
        assert_eq!(wrapper.name(), "Array");
        assert_eq!(bridge.class_state("Array"), ClassState::DescriptorResolved);
        assert_eq!(bridge.class_state("Nope"), ClassState::Unregistered);
        assert!(matches!(bridge.import("Nope"), Err(Error::UnresolvedClass { .. })));
    }

    #[test]
    fn test_unboxing() {
        let (_runtime, bridge) = bridge();
        let number = bridge.number(Number::Int(42)).unwrap();
        assert_eq!(bridge.to_i64(&number), Some(42));
        assert_eq!(bridge.to_f64(&number), Some(42.0));
        let text = bridge.string("abc").unwrap();
        assert_eq!(bridge.to_string_value(&text).as_deref(), Some("abc"));
        assert_eq!(bridge.to_i64(&text), None);
    }

    #[test]
    fn test_ivars_cleared_on_dealloc() {
        let (runtime, bridge) = bridge();
        let object = bridge.new_object("Object").unwrap();
        let payload = bridge.string("payload").unwrap();
        let payload_id = payload.as_handle().unwrap().id();
        bridge.set_ivar(&object, "value", payload).unwrap();
        assert_eq!(runtime.retain_count(payload_id), Some(1));
        drop(object);
        assert_eq!(runtime.retain_count(payload_id), None);
        assert_eq!(bridge.ledger().total_outstanding(), 0);
    }

    #[test]
    fn test_call_reserved_name_hint() {
        let (_runtime, bridge) = bridge();
        let object = bridge.new_object("Object").unwrap();
        let err = bridge.call(&object, "hash", &[]).unwrap_err();
        let Error::NoSuchMethod { hint, .. } = err else {
            panic!("expected NoSuchMethod");
        };
        assert!(hint.contains("oc_hash"));
        assert!(matches!(bridge.call(&object, "oc_hash", &[]), Ok(Value::Int(_) | Value::UInt(_))));
        assert!(matches!(
            bridge.call(&object, "frobnicate", &[]),
            Err(Error::NoSuchMethod { .. })
        ));
    }

    #[test]
    fn test_call_tracking() {
        let runtime = Rc::new(SimRuntime::new());
        let bridge = Bridge::with_config(runtime, BridgeConfig::default().track_calls(true));
        let text = bridge.string("abc").unwrap();
        for _ in 0..3 {
            bridge.send(&text, "length", &[]).unwrap();
        }
        bridge.send(&text, "uppercaseString", &[]).unwrap();
        assert_eq!(bridge.top_methods(1), vec![("length".to_string(), 3)]);
        assert_eq!(bridge.top_signatures(1), vec![("Q@:".to_string(), 3)]);
        assert_eq!(bridge.stats().script_to_native, 4);
    }
}
