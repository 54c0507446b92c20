//! Selector interning.
//!
//! Each distinct selector name is interned once per thread and identified by
//! a small integer id. The id is what travels through native call frames in
//! `:` slots; equality and hashing use the id.
//!
//! The bridge is single-threaded, so the intern table is thread-local and
//! append-only.

use crate::error::{Error, Result};
use fxhash::FxHashMap;
use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::str::FromStr;

#[derive(Default)]
struct SelectorTable {
    ids: FxHashMap<Rc<str>, u32>,
    names: Vec<Rc<str>>,
}

thread_local! {
    static SELECTORS: RefCell<SelectorTable> = RefCell::new(SelectorTable::default());
}

/// Ownership convention implied by a selector's method family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// The caller receives a +1 reference and must release it.
    Owned,
    /// The result is borrowed (autoreleased or owned by someone else).
    Borrowed,
}

/// Syntactic shape of a selector, used for default signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorShape {
    /// No colon: `count`, `value`.
    Accessor,
    /// Exactly one trailing colon: `performAction:`.
    Action,
    /// Anything else: `setObject:forKey:`.
    Keyword,
}

/// An interned method name.
///
/// # Example
///
/// ```
/// use oxidex_bridge::Selector;
/// use std::str::FromStr;
///
/// let a = Selector::from_str("setObject:forKey:").unwrap();
/// let b = Selector::from_str("setObject:forKey:").unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.arg_count(), 2);
/// assert_eq!(a.script_name(), "setObject_forKey_");
/// ```
#[derive(Clone)]
pub struct Selector {
    id: u32,
    name: Rc<str>,
}

impl FromStr for Selector {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(Error::InvalidSelector {
                name: name.to_string(),
            });
        }
        Self::intern(name)
    }
}

impl Selector {
    fn intern(name: &str) -> Result<Self> {
        SELECTORS.with(|table| {
            let mut table = table.borrow_mut();
            if let Some((name, id)) = table.ids.get_key_value(name) {
                return Ok(Selector {
                    id: *id,
                    name: Rc::clone(name),
                });
            }
            let id = u32::try_from(table.names.len()).map_err(|_| {
                Error::InvalidSelector {
                    name: name.to_string(),
                }
            })?;
            let name: Rc<str> = Rc::from(name);
            table.names.push(Rc::clone(&name));
            table.ids.insert(Rc::clone(&name), id);
            Ok(Selector { id, name })
        })
    }

    /// Converts a script-level method name (`add_plus_`) into a selector
    /// (`add:plus:`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSelector`] for empty names.
    pub fn from_script_name(name: &str) -> Result<Self> {
        Self::from_str(&name.replace('_', ":"))
    }

    /// Returns the selector for an id previously handed out by
    /// [`Selector::id`].
    #[must_use]
    pub fn from_id(id: u64) -> Option<Self> {
        let id = u32::try_from(id).ok()?;
        SELECTORS.with(|table| {
            let table = table.borrow();
            table.names.get(id as usize).map(|name| Selector {
                id,
                name: Rc::clone(name),
            })
        })
    }

    /// The selector's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The interned id carried in native frames.
    #[must_use]
    pub fn id(&self) -> u64 {
        u64::from(self.id)
    }

    /// Number of explicit arguments (colons in the name).
    #[must_use]
    pub fn arg_count(&self) -> usize {
        self.name.matches(':').count()
    }

    /// The script-level method name: colons become underscores.
    #[must_use]
    pub fn script_name(&self) -> String {
        self.name.replace(':', "_")
    }

    /// The syntactic shape of the name.
    #[must_use]
    pub fn shape(&self) -> SelectorShape {
        match self.arg_count() {
            0 => SelectorShape::Accessor,
            1 if self.name.ends_with(':') => SelectorShape::Action,
            _ => SelectorShape::Keyword,
        }
    }

    /// Ownership of an object returned by this selector.
    ///
    /// Selectors in the `alloc`, `new`, `copy` and `mutableCopy` families
    /// return a +1 reference. A family matches when the name starts with the
    /// family word followed by a non-lowercase character or the end of the
    /// name (`newObject` matches, `newsletter` does not).
    #[must_use]
    pub fn ownership(&self) -> Ownership {
        const FAMILIES: &[&str] = &["alloc", "new", "copy", "mutableCopy"];
        let name = self.name.trim_start_matches('_');
        let owned = FAMILIES.iter().any(|family| {
            name.strip_prefix(family).is_some_and(|rest| {
                rest.chars().next().is_none_or(|c| !c.is_ascii_lowercase())
            })
        });
        if owned {
            Ownership::Owned
        } else {
            Ownership::Borrowed
        }
    }
}

impl PartialEq for Selector {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Selector {}

impl Hash for Selector {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for Selector {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Selector {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.name.cmp(&other.name)
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Selector({})", self.name)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
