//! Collection adapters over native arrays and dictionaries.
//!
//! The adapters hold a handle to the native collection and read it on
//! every access, so they always reflect live native state. Out-of-range
//! reads return `None` instead of raising a native exception.
//!
//! # Example
//!
//! ```
//! use oxidex_bridge::{Bridge, Value};
//! use oxidex_bridge::native::SimRuntime;
//! use std::rc::Rc;
//!
//! let bridge = Bridge::new(Rc::new(SimRuntime::new()));
//! let array = bridge.array_from(["a".into(), "b".into(), "c".into()]).unwrap();
//! let last = array.get(-1).unwrap().unwrap();
//! assert_eq!(bridge.to_string_value(&last).as_deref(), Some("c"));
//! assert!(array.get(3).unwrap().is_none());
//! ```

use crate::bridge::Bridge;
use crate::error::{Error, Result};
use crate::value::Value;
use std::fmt;

const MUTABLE_ARRAY: &str = "MutableArray";
const MUTABLE_DICTIONARY: &str = "MutableDictionary";

/// An ordered native collection.
#[derive(Clone)]
pub struct NativeArray {
    bridge: Bridge,
    object: Value,
}

impl NativeArray {
    /// Wraps a native object answering `count` and `objectAtIndex:`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidReceiver`] for anything else.
    pub fn new(bridge: &Bridge, object: Value) -> Result<Self> {
        require(bridge, &object, &["count", "objectAtIndex:"])?;
        Ok(Self {
            bridge: bridge.clone(),
            object,
        })
    }

    /// The native collection.
    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.object
    }

    /// Unwraps the native collection.
    #[must_use]
    pub fn into_value(self) -> Value {
        self.object
    }

    /// Number of elements.
    ///
    /// # Errors
    ///
    /// Returns the native fault of `count`.
    pub fn len(&self) -> Result<usize> {
        count(&self.bridge, &self.object)
    }

    /// True if there are no elements.
    ///
    /// # Errors
    ///
    /// Returns the native fault of `count`.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// The element at `index`; negative indices count from the end.
    ///
    /// # Errors
    ///
    /// Returns native faults other than range errors.
    pub fn get(&self, index: isize) -> Result<Option<Value>> {
        match self.position(index)? {
            Some(position) => self.object_at(position).map(Some),
            None => Ok(None),
        }
    }

    /// Appends `value`.
    ///
    /// # Errors
    ///
    /// Fails for immutable arrays.
    pub fn push(&self, value: impl Into<Value>) -> Result<()> {
        self.bridge
            .send(&self.object, "addObject:", &[value.into()])
            .map(drop)
    }

    /// Replaces the element at `index`. Returns false when out of range.
    ///
    /// # Errors
    ///
    /// Fails for immutable arrays.
    pub fn set(&self, index: isize, value: impl Into<Value>) -> Result<bool> {
        let Some(position) = self.position(index)? else {
            return Ok(false);
        };
        self.bridge.send(
            &self.object,
            "replaceObjectAtIndex:withObject:",
            &[Value::from(position), value.into()],
        )?;
        Ok(true)
    }

    /// Iterates the elements, re-reading the native count at every step.
    /// Each call starts a fresh pass.
    #[must_use]
    pub fn iter(&self) -> ArrayIter<'_> {
        ArrayIter {
            array: self,
            index: 0,
            done: false,
        }
    }

    /// Copies the elements into a vector.
    ///
    /// # Errors
    ///
    /// Returns the first native fault.
    pub fn to_vec(&self) -> Result<Vec<Value>> {
        self.iter().collect()
    }

    fn position(&self, index: isize) -> Result<Option<usize>> {
        let len = self.len()?;
        let position = if index < 0 {
            len.checked_sub(index.unsigned_abs())
        } else {
            Some(index.unsigned_abs())
        };
        Ok(position.filter(|position| *position < len))
    }

    fn object_at(&self, position: usize) -> Result<Value> {
        self.bridge
            .send(&self.object, "objectAtIndex:", &[Value::from(position)])
    }
}

impl fmt::Debug for NativeArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NativeArray").field(&self.object).finish()
    }
}

impl<'a> IntoIterator for &'a NativeArray {
    type Item = Result<Value>;
    type IntoIter = ArrayIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy iterator over a [`NativeArray`].
pub struct ArrayIter<'a> {
    array: &'a NativeArray,
    index: usize,
    done: bool,
}

impl Iterator for ArrayIter<'_> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.array.len() {
            Ok(len) if self.index < len => {
                let item = self.array.object_at(self.index);
                self.index += 1;
                self.done = item.is_err();
                Some(item)
            }
            Ok(_) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// A keyed native collection.
#[derive(Clone)]
pub struct NativeDictionary {
    bridge: Bridge,
    object: Value,
}

impl NativeDictionary {
    /// Wraps a native object answering `count` and `objectForKey:`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidReceiver`] for anything else.
    pub fn new(bridge: &Bridge, object: Value) -> Result<Self> {
        require(bridge, &object, &["count", "objectForKey:"])?;
        Ok(Self {
            bridge: bridge.clone(),
            object,
        })
    }

    /// The native collection.
    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.object
    }

    /// Number of entries.
    ///
    /// # Errors
    ///
    /// Returns the native fault of `count`.
    pub fn len(&self) -> Result<usize> {
        count(&self.bridge, &self.object)
    }

    /// True if there are no entries.
    ///
    /// # Errors
    ///
    /// Returns the native fault of `count`.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// The value for `key`.
    ///
    /// # Errors
    ///
    /// Returns the native fault of `objectForKey:`.
    pub fn get(&self, key: impl Into<Value>) -> Result<Option<Value>> {
        let value = self.bridge.send(&self.object, "objectForKey:", &[key.into()])?;
        Ok((!value.is_nil()).then_some(value))
    }

    /// Stores `value` under `key`.
    ///
    /// # Errors
    ///
    /// Fails for immutable dictionaries.
    pub fn insert(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<()> {
        self.bridge
            .send(&self.object, "setObject:forKey:", &[value.into(), key.into()])
            .map(drop)
    }

    /// Removes `key`.
    ///
    /// # Errors
    ///
    /// Fails for immutable dictionaries.
    pub fn remove(&self, key: impl Into<Value>) -> Result<()> {
        self.bridge
            .send(&self.object, "removeObjectForKey:", &[key.into()])
            .map(drop)
    }

    /// The keys, in native order.
    ///
    /// # Errors
    ///
    /// Returns the native fault of `allKeys`.
    pub fn keys(&self) -> Result<Vec<Value>> {
        self.listing("allKeys")
    }

    /// The values, in native order.
    ///
    /// # Errors
    ///
    /// Returns the native fault of `allValues`.
    pub fn values(&self) -> Result<Vec<Value>> {
        self.listing("allValues")
    }

    /// Every entry as a (key, value) pair.
    ///
    /// # Errors
    ///
    /// Returns the first native fault.
    pub fn to_pairs(&self) -> Result<Vec<(Value, Value)>> {
        let mut pairs = Vec::new();
        for key in self.keys()? {
            if let Some(value) = self.get(key.clone())? {
                pairs.push((key, value));
            }
        }
        Ok(pairs)
    }

    fn listing(&self, selector: &str) -> Result<Vec<Value>> {
        let list = self.bridge.send(&self.object, selector, &[])?;
        NativeArray::new(&self.bridge, list)?.to_vec()
    }
}

impl fmt::Debug for NativeDictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NativeDictionary").field(&self.object).finish()
    }
}

impl Bridge {
    /// A new, empty native mutable array.
    ///
    /// # Errors
    ///
    /// Fails when the runtime has no mutable array class.
    pub fn array(&self) -> Result<NativeArray> {
        NativeArray::new(self, self.new_object(MUTABLE_ARRAY)?)
    }

    /// A native mutable array holding `items`; strings and numbers are
    /// boxed.
    ///
    /// # Errors
    ///
    /// Fails when an item cannot be boxed.
    pub fn array_from(&self, items: impl IntoIterator<Item = Value>) -> Result<NativeArray> {
        let array = self.array()?;
        for item in items {
            array.push(item)?;
        }
        Ok(array)
    }

    /// A new, empty native mutable dictionary.
    ///
    /// # Errors
    ///
    /// Fails when the runtime has no mutable dictionary class.
    pub fn dictionary(&self) -> Result<NativeDictionary> {
        NativeDictionary::new(self, self.new_object(MUTABLE_DICTIONARY)?)
    }

    /// A native mutable dictionary holding `pairs`.
    ///
    /// # Errors
    ///
    /// Fails when a key or value cannot be boxed.
    pub fn dictionary_from(
        &self,
        pairs: impl IntoIterator<Item = (Value, Value)>,
    ) -> Result<NativeDictionary> {
        let dictionary = self.dictionary()?;
        for (key, value) in pairs {
            dictionary.insert(key, value)?;
        }
        Ok(dictionary)
    }
}

fn require(bridge: &Bridge, object: &Value, selectors: &[&str]) -> Result<()> {
    match selectors.iter().find(|selector| !bridge.responds_to(object, selector)) {
        Some(selector) if object.as_handle().is_some() => Err(Error::InvalidReceiver {
            selector: (*selector).to_string(),
            got: "object without collection methods",
        }),
        Some(selector) => Err(Error::InvalidReceiver {
            selector: (*selector).to_string(),
            got: object.type_name(),
        }),
        None => Ok(()),
    }
}

fn count(bridge: &Bridge, object: &Value) -> Result<usize> {
    let count = bridge.send(object, "count", &[])?;
    count
        .as_i64()
        .and_then(|count| usize::try_from(count).ok())
        .ok_or(Error::TypeMismatch {
            index: 0,
            expected: "count".to_string(),
            got: count.type_name(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::SimRuntime;
    use std::rc::Rc;

    fn bridge() -> Bridge {
        Bridge::new(Rc::new(SimRuntime::new()))
    }

    fn strings(bridge: &Bridge, values: &[Value]) -> Vec<String> {
        values
            .iter()
            .filter_map(|value| bridge.to_string_value(value))
            .collect()
    }

    #[test]
    fn test_array_indexing() {
        let bridge = bridge();
        let array = bridge.array_from(["a".into(), "b".into(), "c".into()]).unwrap();
        assert_eq!(array.len().unwrap(), 3);
        let first = array.get(0).unwrap().unwrap();
        assert_eq!(bridge.to_string_value(&first).as_deref(), Some("a"));
        let second_last = array.get(-2).unwrap().unwrap();
        assert_eq!(bridge.to_string_value(&second_last).as_deref(), Some("b"));
        assert!(array.get(3).unwrap().is_none());
        assert!(array.get(-4).unwrap().is_none());
    }

    #[test]
    fn test_array_set_and_push() {
        let bridge = bridge();
        let array = bridge.array().unwrap();
        assert!(array.is_empty().unwrap());
        array.push("x").unwrap();
        assert!(array.set(-1, "y").unwrap());
        assert!(!array.set(5, "z").unwrap());
        assert_eq!(strings(&bridge, &array.to_vec().unwrap()), vec!["y"]);
    }

    #[test]
    fn test_iteration_sees_live_state() {
        let bridge = bridge();
        let array = bridge.array_from(["a".into()]).unwrap();
        let mut seen = Vec::new();
        for item in &array {
            let item = item.unwrap();
            if seen.is_empty() {
                array.push("b").unwrap();
            }
            seen.push(item);
        }
        assert_eq!(strings(&bridge, &seen), vec!["a", "b"]);
        // A second pass starts over.
        assert_eq!(array.iter().count(), 2);
    }

    #[test]
    fn test_dictionary() {
        let bridge = bridge();
        let dict = bridge
            .dictionary_from([("one".into(), Value::Int(1)), ("two".into(), Value::Int(2))])
            .unwrap();
        assert_eq!(dict.len().unwrap(), 2);
        let one = dict.get("one").unwrap().unwrap();
        assert_eq!(bridge.to_i64(&one), Some(1));
        assert!(dict.get("three").unwrap().is_none());

        dict.remove("one").unwrap();
        let pairs = dict.to_pairs().unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(bridge.to_string_value(&pairs[0].0).as_deref(), Some("two"));
        assert_eq!(strings(&bridge, &dict.keys().unwrap()), vec!["two"]);
        assert_eq!(dict.values().unwrap().len(), 1);
    }

    #[test]
    fn test_wrapping_requires_collection_methods() {
        let bridge = bridge();
        let text = bridge.string("not a list").unwrap();
        assert!(matches!(
            NativeArray::new(&bridge, text),
            Err(Error::InvalidReceiver { .. })
        ));
        assert!(NativeDictionary::new(&bridge, Value::Int(3)).is_err());
    }
}
