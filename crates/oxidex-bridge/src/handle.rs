//! Native object handles and the ownership ledger.
//!
//! Every [`NativeHandle`] stands for exactly one outstanding native retain:
//! creating a handle either retains the object (borrowed results) or adopts
//! a +1 reference the caller already owns (`alloc`/`new`/`copy` results);
//! cloning retains; dropping releases exactly once. The
//! [`OwnershipLedger`] counts the retains each object carries on behalf of
//! the bridge, so a release without a matching retain is detected as
//! [`Error::OverRelease`] before it reaches the native runtime.
//!
//! # Example
//!
//! ```
//! use oxidex_bridge::handle::{NativeHandle, OwnershipLedger};
//! use oxidex_bridge::native::{NativeRuntime, SimRuntime};
//! use oxidex_bridge::selector::Ownership;
//! use std::rc::Rc;
//!
//! let runtime = Rc::new(SimRuntime::new());
//! let ledger = Rc::new(OwnershipLedger::new(runtime.clone()));
//! let id = runtime.new_string("hi").unwrap();
//!
//! let handle = NativeHandle::wrap(&ledger, id, Ownership::Owned).unwrap();
//! let copy = handle.clone();
//! assert_eq!(runtime.retain_count(id), Some(2));
//! drop(handle);
//! drop(copy);
//! assert_eq!(runtime.retain_count(id), None);
//! ```

use crate::error::{Error, Result};
use crate::native::{NativeRuntime, ObjectId};
use crate::selector::Ownership;
use fxhash::FxHashMap;
use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// Retain obligations the bridge holds per native object.
pub struct OwnershipLedger {
    runtime: Rc<dyn NativeRuntime>,
    outstanding: RefCell<FxHashMap<ObjectId, usize>>,
}

impl OwnershipLedger {
    /// Creates an empty ledger over `runtime`.
    #[must_use]
    pub fn new(runtime: Rc<dyn NativeRuntime>) -> Self {
        Self {
            runtime,
            outstanding: RefCell::new(FxHashMap::default()),
        }
    }

    /// The runtime this ledger releases into.
    #[must_use]
    pub fn runtime(&self) -> &Rc<dyn NativeRuntime> {
        &self.runtime
    }

    /// Retains `object` natively and records the obligation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NativeCallFault`] if the runtime refuses the retain.
    pub fn retain(&self, object: ObjectId) -> Result<()> {
        self.runtime
            .retain(object)
            .map_err(|fault| Error::NativeCallFault {
                selector: "retain".to_string(),
                fault,
            })?;
        self.adopt(object);
        Ok(())
    }

    /// Records an obligation for a +1 reference the caller already owns.
    pub fn adopt(&self, object: ObjectId) {
        *self.outstanding.borrow_mut().entry(object).or_insert(0) += 1;
    }

    /// Gives up one obligation without releasing natively, handing the +1
    /// reference to someone else.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OverRelease`] when no obligation is recorded.
    pub fn disown(&self, object: ObjectId) -> Result<()> {
        let mut outstanding = self.outstanding.borrow_mut();
        match outstanding.get_mut(&object) {
            Some(count) if *count > 1 => {
                *count -= 1;
                Ok(())
            }
            Some(_) => {
                outstanding.remove(&object);
                Ok(())
            }
            None => Err(Error::OverRelease { object }),
        }
    }

    /// Releases one obligation natively.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OverRelease`] when the bridge holds no retain on
    /// `object`; the native runtime is not called in that case.
    pub fn release(&self, object: ObjectId) -> Result<()> {
        self.disown(object)?;
        // The ledger borrow is released: deallocation may drop further
        // handles and re-enter here.
        self.runtime
            .release(object)
            .map_err(|fault| Error::NativeCallFault {
                selector: "release".to_string(),
                fault,
            })
    }

    /// Retains the bridge holds on `object`.
    #[must_use]
    pub fn outstanding(&self, object: ObjectId) -> usize {
        self.outstanding
            .borrow()
            .get(&object)
            .copied()
            .unwrap_or(0)
    }

    /// Total retains the bridge holds across all objects.
    #[must_use]
    pub fn total_outstanding(&self) -> usize {
        self.outstanding.borrow().values().sum()
    }
}

impl fmt::Debug for OwnershipLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnershipLedger")
            .field("objects", &self.outstanding.borrow().len())
            .field("retains", &self.total_outstanding())
            .finish()
    }
}

/// A script-side reference to a native object.
pub struct NativeHandle {
    id: ObjectId,
    ledger: Rc<OwnershipLedger>,
    /// False once the reference was handed off by `into_raw`.
    owned: bool,
}

impl NativeHandle {
    /// Wraps `object` according to `ownership`: owned references are
    /// adopted, borrowed ones retained.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidReceiver`] for nil and
    /// [`Error::NativeCallFault`] when the retain fails.
    pub fn wrap(ledger: &Rc<OwnershipLedger>, object: ObjectId, ownership: Ownership) -> Result<Self> {
        if object.is_nil() {
            return Err(Error::InvalidReceiver {
                selector: "retain".to_string(),
                got: "nil",
            });
        }
        match ownership {
            Ownership::Owned => ledger.adopt(object),
            Ownership::Borrowed => ledger.retain(object)?,
        }
        Ok(Self {
            id: object,
            ledger: Rc::clone(ledger),
            owned: true,
        })
    }

    /// The native object.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// The ledger this handle is recorded in.
    #[must_use]
    pub fn ledger(&self) -> &Rc<OwnershipLedger> {
        &self.ledger
    }

    /// Hands this handle's +1 reference to the caller without releasing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OverRelease`] if the ledger lost track of the
    /// obligation.
    pub fn into_raw(mut self) -> Result<ObjectId> {
        self.ledger.disown(self.id)?;
        self.owned = false;
        Ok(self.id)
    }
}

impl Clone for NativeHandle {
    fn clone(&self) -> Self {
        // A clone that could not retain owns nothing and releases nothing.
        let owned = match self.ledger.retain(self.id) {
            Ok(()) => true,
            Err(err) => {
                log::error!("retain of {} failed while cloning a handle: {err}", self.id);
                false
            }
        };
        Self {
            id: self.id,
            ledger: Rc::clone(&self.ledger),
            owned,
        }
    }
}

impl Drop for NativeHandle {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        if let Err(err) = self.ledger.release(self.id) {
            log::error!("{err}");
        }
    }
}

impl PartialEq for NativeHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for NativeHandle {}

impl Hash for NativeHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeHandle({})", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::SimRuntime;

    fn setup() -> (Rc<SimRuntime>, Rc<OwnershipLedger>) {
        let runtime = Rc::new(SimRuntime::new());
        let ledger = Rc::new(OwnershipLedger::new(runtime.clone()));
        (runtime, ledger)
    }

    #[test]
    fn test_borrowed_wrap_retains() {
        let (runtime, ledger) = setup();
        let id = runtime.new_string("x").unwrap();
        let handle = NativeHandle::wrap(&ledger, id, Ownership::Borrowed).unwrap();
        assert_eq!(runtime.retain_count(id), Some(2));
        assert_eq!(ledger.outstanding(id), 1);
        drop(handle);
        assert_eq!(runtime.retain_count(id), Some(1));
        assert_eq!(ledger.outstanding(id), 0);
        runtime.release(id).unwrap();
    }

    #[test]
    fn test_net_zero_in_any_order() {
        let (runtime, ledger) = setup();
        let id = runtime.new_string("x").unwrap();
        let before = runtime.retain_count(id).unwrap();

        let mut handles: Vec<NativeHandle> = (0..5)
            .map(|_| NativeHandle::wrap(&ledger, id, Ownership::Borrowed).unwrap())
            .collect();
        handles.push(handles[2].clone());
        assert_eq!(runtime.retain_count(id), Some(before + 6));

        for index in [3, 0, 3, 1, 1, 0] {
            drop(handles.remove(index));
        }
        assert!(handles.is_empty());
        assert_eq!(runtime.retain_count(id), Some(before));
        assert_eq!(ledger.total_outstanding(), 0);
        runtime.release(id).unwrap();
    }

    #[test]
    fn test_over_release_is_detected() {
        let (runtime, ledger) = setup();
        let id = runtime.new_string("x").unwrap();
        let handle = NativeHandle::wrap(&ledger, id, Ownership::Owned).unwrap();
        let raw = handle.into_raw().unwrap();
        assert_eq!(raw, id);
        assert_eq!(ledger.outstanding(id), 0);
        assert_eq!(ledger.release(id), Err(Error::OverRelease { object: id }));
        // The native object is untouched by the refused release.
        assert_eq!(runtime.retain_count(id), Some(1));
        runtime.release(id).unwrap();
    }

    #[test]
    fn test_identity_equality() {
        let (runtime, ledger) = setup();
        let a = runtime.new_string("same").unwrap();
        let b = runtime.new_string("same").unwrap();
        let ha = NativeHandle::wrap(&ledger, a, Ownership::Owned).unwrap();
        let hb = NativeHandle::wrap(&ledger, b, Ownership::Owned).unwrap();
        assert_ne!(ha, hb);
        assert_eq!(ha, ha.clone());
        assert!(NativeHandle::wrap(&ledger, ObjectId::NIL, Ownership::Owned).is_err());
    }
}
