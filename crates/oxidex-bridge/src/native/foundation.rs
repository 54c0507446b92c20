//! Foundation-like classes of the reference runtime.
//!
//! | Class               | Payload         | Highlights                           |
//! |---------------------|-----------------|--------------------------------------|
//! | `Object`            | none            | alloc/new/init, retain counting, KVO |
//! | `String`            | UTF-8 C string  | `stringWithUTF8String:`, `length`    |
//! | `Number`            | int/float/bool  | `numberWith*:`, `*Value`             |
//! | `Array`             | object list     | `count`, `objectAtIndex:`            |
//! | `MutableArray`      | object list     | `addObject:`, `replaceObject...`     |
//! | `Dictionary`        | key/value pairs | `objectForKey:`, `allKeys`           |
//! | `MutableDictionary` | key/value pairs | `setObject:forKey:`                  |
//! | `Geometry`          | none            | struct-by-value class methods        |
//!
//! Collections retain their elements. Class methods return autoreleased
//! objects except `alloc` and `new`, which return +1.

use super::sim::{Builtin, ChangePhase, Payload, SimRuntime, number_as_f64};
use super::{
    ArgFrame, ClassId, Message, MethodKind, NativeFault, NativeFn, NativeRuntime, Number,
    ObjectId, Receiver, ReturnFrame, Target,
};
use crate::encoding::{Signature, parse_type_list};
use crate::selector::Selector;
use std::ffi::CString;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// Ids of the builtin classes.
#[derive(Debug, Clone, Copy)]
pub(super) struct Foundation {
    pub object: ClassId,
    pub string: ClassId,
    pub number: ClassId,
    pub array: ClassId,
    pub mutable_array: ClassId,
    pub dictionary: ClassId,
    pub mutable_dictionary: ClassId,
}

impl Default for Foundation {
    /// Placeholder ids used while the runtime is being built.
    fn default() -> Self {
        let unset = ClassId(0);
        Self {
            object: unset,
            string: unset,
            number: unset,
            array: unset,
            mutable_array: unset,
            dictionary: unset,
            mutable_dictionary: unset,
        }
    }
}

const RECT: &str = "{Rect={Point=dd}{Size=dd}}";

pub(super) fn install(rt: &SimRuntime) -> Foundation {
    use MethodKind::{Class, Instance};

    let object = rt.define_class("Object", None);
    let methods: &[(MethodKind, &str, &str, Builtin)] = &[
        (Class, "alloc", "@#:", alloc),
        (Class, "new", "@#:", new),
        (Class, "class", "##:", class_self),
        (Class, "superclass", "##:", class_superclass),
        (Instance, "init", "@@:", init),
        (Instance, "self", "@@:", init),
        (Instance, "class", "#@:", object_class),
        (Instance, "hash", "Q@:", hash),
        (Instance, "isEqual:", "B@:@", is_equal),
        (Instance, "description", "@@:", description),
        (Instance, "respondsToSelector:", "B@::", responds_to_selector),
        (Instance, "retainCount", "Q@:", retain_count),
        (Instance, "performSelector:", "@@::", perform_selector),
        (Instance, "performSelector:withObject:", "@@::@", perform_selector),
        (Instance, "willChangeValueForKey:", "v@:@", will_change),
        (Instance, "didChangeValueForKey:", "v@:@", did_change),
        (Instance, "copy", "@@:", copy),
        (Instance, "mutableCopy", "@@:", mutable_copy),
    ];
    define_all(rt, object, methods);

    let string = rt.define_class("String", Some(object));
    let methods: &[(MethodKind, &str, &str, Builtin)] = &[
        (Class, "string", "@#:", string_empty),
        (Class, "stringWithUTF8String:", "@#:*", string_with_utf8),
        (Instance, "initWithUTF8String:", "@@:*", string_init_utf8),
        (Instance, "length", "Q@:", string_length),
        (Instance, "UTF8String", "*@:", string_utf8),
        (Instance, "stringByAppendingString:", "@@:@", string_append),
        (Instance, "isEqualToString:", "B@:@", is_equal),
        (Instance, "uppercaseString", "@@:", string_uppercase),
    ];
    define_all(rt, string, methods);

    let number = rt.define_class("Number", Some(object));
    let methods: &[(MethodKind, &str, &str, Builtin)] = &[
        (Class, "numberWithInt:", "@#:i", number_with_int),
        (Class, "numberWithLongLong:", "@#:q", number_with_int),
        (Class, "numberWithDouble:", "@#:d", number_with_float),
        (Class, "numberWithFloat:", "@#:f", number_with_float),
        (Class, "numberWithBool:", "@#:B", number_with_bool),
        (Instance, "intValue", "i@:", number_int_value),
        (Instance, "longLongValue", "q@:", number_int_value),
        (Instance, "unsignedLongLongValue", "Q@:", number_int_value),
        (Instance, "doubleValue", "d@:", number_float_value),
        (Instance, "floatValue", "f@:", number_float_value),
        (Instance, "boolValue", "B@:", number_bool_value),
    ];
    define_all(rt, number, methods);

    let array = rt.define_class("Array", Some(object));
    let methods: &[(MethodKind, &str, &str, Builtin)] = &[
        (Class, "array", "@#:", array_empty),
        (Class, "arrayWithObject:", "@#:@", array_with_object),
        (Instance, "count", "Q@:", collection_count),
        (Instance, "objectAtIndex:", "@@:Q", array_object_at),
        (Instance, "firstObject", "@@:", array_first),
        (Instance, "lastObject", "@@:", array_last),
        (Instance, "containsObject:", "B@:@", array_contains),
    ];
    define_all(rt, array, methods);

    let mutable_array = rt.define_class("MutableArray", Some(array));
    let methods: &[(MethodKind, &str, &str, Builtin)] = &[
        (Instance, "addObject:", "v@:@", array_add),
        (Instance, "insertObject:atIndex:", "v@:@Q", array_insert),
        (Instance, "replaceObjectAtIndex:withObject:", "v@:Q@", array_replace),
        (Instance, "removeObjectAtIndex:", "v@:Q", array_remove_at),
        (Instance, "removeLastObject", "v@:", array_remove_last),
        (Instance, "removeAllObjects", "v@:", remove_all),
    ];
    define_all(rt, mutable_array, methods);

    let dictionary = rt.define_class("Dictionary", Some(object));
    let methods: &[(MethodKind, &str, &str, Builtin)] = &[
        (Class, "dictionary", "@#:", dictionary_empty),
        (Instance, "count", "Q@:", collection_count),
        (Instance, "objectForKey:", "@@:@", dictionary_get),
        (Instance, "allKeys", "@@:", dictionary_keys),
        (Instance, "allValues", "@@:", dictionary_values),
    ];
    define_all(rt, dictionary, methods);

    let mutable_dictionary = rt.define_class("MutableDictionary", Some(dictionary));
    let methods: &[(MethodKind, &str, &str, Builtin)] = &[
        (Instance, "setObject:forKey:", "v@:@@", dictionary_set),
        (Instance, "removeObjectForKey:", "v@:@", dictionary_remove),
        (Instance, "removeAllObjects", "v@:", remove_all),
    ];
    define_all(rt, mutable_dictionary, methods);

    let geometry = rt.define_class("Geometry", Some(object));
    let scale_types = format!("{RECT}#:{RECT}d");
    rt.define_builtin(geometry, Class, "scaleRect:by:", &scale_types, geometry_scale_rect);
    rt.define_builtin(geometry, Class, "areaOfSize:", "d#:{Size=dd}", geometry_area);

    install_functions(rt);

    Foundation {
        object,
        string,
        number,
        array,
        mutable_array,
        dictionary,
        mutable_dictionary,
    }
}

fn define_all(rt: &SimRuntime, class: ClassId, methods: &[(MethodKind, &str, &str, Builtin)]) {
    for (kind, selector, types, builtin) in methods {
        rt.define_builtin(class, *kind, selector, types, *builtin);
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn receiver_class(rt: &SimRuntime, msg: &Message<'_>) -> Result<ClassId, NativeFault> {
    match msg.target.receiver {
        Receiver::Class(class) => Ok(class),
        Receiver::Object(object) => rt
            .class_of(object)
            .ok_or(NativeFault::DeadObject { id: object }),
    }
}

fn invalid_argument(reason: impl Into<String>) -> NativeFault {
    NativeFault::exception("InvalidArgumentException", reason)
}

fn non_nil(object: ObjectId, what: &str) -> Result<ObjectId, NativeFault> {
    if object.is_nil() {
        Err(invalid_argument(format!("{what} must not be nil")))
    } else {
        Ok(object)
    }
}

fn index_arg(msg: &Message<'_>, slot: usize) -> Result<usize, NativeFault> {
    let index = msg.args.int(slot)?;
    usize::try_from(index).map_err(|_| range_error(index, None))
}

fn range_error(index: impl std::fmt::Display, len: Option<usize>) -> NativeFault {
    let reason = match len {
        Some(0) => format!("index {index} beyond bounds for empty array"),
        Some(len) => format!("index {index} beyond bounds [0 .. {}]", len - 1),
        None => format!("index {index} beyond bounds"),
    };
    NativeFault::exception("RangeException", reason)
}

fn string_of(rt: &SimRuntime, object: ObjectId) -> Result<String, NativeFault> {
    rt.string_value(object)
        .ok_or_else(|| invalid_argument(format!("object {object} is not a string")))
}

fn items_of(rt: &SimRuntime, object: ObjectId) -> Result<Vec<ObjectId>, NativeFault> {
    match rt.payload(object)? {
        Payload::Array(items) => Ok(items),
        _ => Err(invalid_argument(format!("object {object} is not an array"))),
    }
}

fn pairs_of(rt: &SimRuntime, object: ObjectId) -> Result<Vec<(ObjectId, ObjectId)>, NativeFault> {
    match rt.payload(object)? {
        Payload::Dictionary(pairs) => Ok(pairs),
        _ => Err(invalid_argument(format!("object {object} is not a dictionary"))),
    }
}

/// Mutates an array payload. The closure must not touch the runtime.
fn edit_items<T>(
    rt: &SimRuntime,
    object: ObjectId,
    f: impl FnOnce(&mut Vec<ObjectId>) -> Result<T, NativeFault>,
) -> Result<T, NativeFault> {
    rt.with_payload(object, |payload| match payload {
        Payload::Array(items) => f(items),
        _ => Err(invalid_argument(format!("object {object} is not an array"))),
    })
}

fn edit_pairs<T>(
    rt: &SimRuntime,
    object: ObjectId,
    f: impl FnOnce(&mut Vec<(ObjectId, ObjectId)>) -> Result<T, NativeFault>,
) -> Result<T, NativeFault> {
    rt.with_payload(object, |payload| match payload {
        Payload::Dictionary(pairs) => f(pairs),
        _ => Err(invalid_argument(format!("object {object} is not a dictionary"))),
    })
}

/// Creates an autoreleased array holding retained `items`.
fn new_array(rt: &SimRuntime, class: ClassId, items: Vec<ObjectId>) -> Result<ObjectId, NativeFault> {
    for item in &items {
        rt.retain(*item)?;
    }
    Ok(rt.create_autoreleased(class, Payload::Array(items)))
}

fn new_autoreleased_string(rt: &SimRuntime, text: &str) -> Result<ObjectId, NativeFault> {
    let text = CString::new(text).map_err(|_| invalid_argument("string contains NUL"))?;
    Ok(rt.create_autoreleased(rt.foundation().string, Payload::String(text)))
}

/// Sends `selector` to `target` with a frame built from `types`.
fn call(
    rt: &SimRuntime,
    target: Target,
    selector: &Selector,
    types: &str,
    fill: impl FnOnce(&mut ArgFrame) -> Result<(), NativeFault>,
) -> Result<ReturnFrame, NativeFault> {
    let sig = Signature::parse(types).map_err(|e| invalid_argument(e.to_string()))?;
    let mut args =
        ArgFrame::new(sig.arg_types()).ok_or_else(|| invalid_argument("bad frame layout"))?;
    let receiver = match target.receiver {
        Receiver::Object(object) => object.0,
        Receiver::Class(class) => u64::from(class.0),
    };
    args.set_word(0, receiver)?;
    args.set_selector(1, selector)?;
    fill(&mut args)?;
    let mut ret =
        ReturnFrame::new(sig.return_type()).ok_or_else(|| invalid_argument("bad return layout"))?;
    rt.send(target, selector, &args, &mut ret)?;
    Ok(ret)
}

fn hash_of(rt: &SimRuntime, object: ObjectId) -> u64 {
    let mut hasher = fxhash::FxHasher::default();
    match rt.payload(object) {
        Ok(Payload::String(text)) => text.hash(&mut hasher),
        Ok(Payload::Number(number)) => number_as_f64(number).to_bits().hash(&mut hasher),
        _ => return object.0,
    }
    hasher.finish()
}

fn describe(rt: &SimRuntime, object: ObjectId) -> String {
    if object.is_nil() {
        return "nil".to_string();
    }
    match rt.payload(object) {
        Ok(Payload::String(text)) => text.to_string_lossy().into_owned(),
        Ok(Payload::Number(Number::Int(value))) => value.to_string(),
        Ok(Payload::Number(Number::Float(value))) => value.to_string(),
        Ok(Payload::Number(Number::Bool(value))) => u8::from(value).to_string(),
        Ok(Payload::Array(items)) => {
            let parts: Vec<String> = items.iter().map(|item| describe(rt, *item)).collect();
            format!("({})", parts.join(", "))
        }
        Ok(Payload::Dictionary(pairs)) => {
            let parts: Vec<String> = pairs
                .iter()
                .map(|(key, value)| format!("{} = {}", describe(rt, *key), describe(rt, *value)))
                .collect();
            format!("{{{}}}", parts.join("; "))
        }
        Ok(Payload::Plain) => {
            let class = rt
                .class_of(object)
                .map_or_else(|| "?".to_string(), |class| rt.class_name_or_unknown(class));
            format!("<{class}: {object}>")
        }
        Err(_) => format!("<dead {object}>"),
    }
}

// ============================================================================
// Object
// ============================================================================

fn alloc(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let class = receiver_class(rt, msg)?;
    let object = rt.create(class, rt.initial_payload(class));
    msg.ret.set_object(object)
}

fn new(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let class = receiver_class(rt, msg)?;
    let object = rt.create(class, rt.initial_payload(class));
    let init: Selector = "init"
        .parse()
        .map_err(|e: crate::error::Error| invalid_argument(e.to_string()))?;
    match call(rt, Target::instance(object), &init, "@@:", |_| Ok(())) {
        Ok(ret) => msg.ret.set_object(ret.object().unwrap_or(object)),
        Err(fault) => {
            rt.release(object)?;
            Err(fault)
        }
    }
}

fn init(_rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let object = msg.receiver_object()?;
    msg.ret.set_object(object)
}

fn class_self(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let class = receiver_class(rt, msg)?;
    msg.ret.set_class(class)
}

fn class_superclass(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let class = receiver_class(rt, msg)?;
    match rt.superclass(class) {
        Some(parent) => msg.ret.set_class(parent),
        None => Ok(()),
    }
}

fn object_class(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let class = receiver_class(rt, msg)?;
    msg.ret.set_class(class)
}

fn hash(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let object = msg.receiver_object()?;
    msg.ret.set_int(i128::from(hash_of(rt, object)))
}

fn is_equal(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let object = msg.receiver_object()?;
    let other = msg.args.object(2)?;
    msg.ret.set_bool(rt.objects_equal(object, other))
}

fn description(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let object = msg.receiver_object()?;
    let text = describe(rt, object);
    let string = new_autoreleased_string(rt, &text)?;
    msg.ret.set_object(string)
}

fn responds_to_selector(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let object = msg.receiver_object()?;
    let selector = msg.args.selector(2)?;
    msg.ret
        .set_bool(rt.responds_to(Receiver::Object(object), &selector))
}

fn retain_count(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let object = msg.receiver_object()?;
    let count = rt.retain_count(object).unwrap_or(0);
    msg.ret.set_int(count as i128)
}

fn perform_selector(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let object = msg.receiver_object()?;
    let selector = msg.args.selector(2)?;
    let ret = if msg.args.len() > 3 {
        let argument = msg.args.object(3)?;
        call(rt, Target::instance(object), &selector, "@@:@", |args| {
            args.set_object(2, argument)
        })?
    } else {
        call(rt, Target::instance(object), &selector, "@@:", |_| Ok(()))?
    };
    msg.ret.set_object(ret.object().unwrap_or(ObjectId::NIL))
}

fn change_notification(
    rt: &SimRuntime,
    msg: &Message<'_>,
    phase: ChangePhase,
) -> Result<(), NativeFault> {
    let object = msg.receiver_object()?;
    let key = string_of(rt, msg.args.object(2)?)?;
    log::trace!("{object} {phase:?} change {key}");
    rt.record_notification(object, key, phase);
    Ok(())
}

fn will_change(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    change_notification(rt, msg, ChangePhase::Will)
}

fn did_change(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    change_notification(rt, msg, ChangePhase::Did)
}

fn copy(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let object = msg.receiver_object()?;
    let f = rt.foundation();
    let copied = match rt.payload(object)? {
        Payload::String(_) | Payload::Number(_) => {
            rt.retain(object)?;
            object
        }
        Payload::Array(items) => {
            for item in &items {
                rt.retain(*item)?;
            }
            rt.create(f.array, Payload::Array(items))
        }
        Payload::Dictionary(pairs) => {
            for (key, value) in &pairs {
                rt.retain(*key)?;
                rt.retain(*value)?;
            }
            rt.create(f.dictionary, Payload::Dictionary(pairs))
        }
        Payload::Plain => {
            return Err(NativeFault::UnrecognizedSelector {
                class: rt.class_name_or_unknown(receiver_class(rt, msg)?),
                selector: "-copy".to_string(),
            });
        }
    };
    msg.ret.set_object(copied)
}

fn mutable_copy(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let object = msg.receiver_object()?;
    let f = rt.foundation();
    let copied = match rt.payload(object)? {
        Payload::String(text) => rt.create(f.string, Payload::String(text)),
        Payload::Array(items) => {
            for item in &items {
                rt.retain(*item)?;
            }
            rt.create(f.mutable_array, Payload::Array(items))
        }
        Payload::Dictionary(pairs) => {
            for (key, value) in &pairs {
                rt.retain(*key)?;
                rt.retain(*value)?;
            }
            rt.create(f.mutable_dictionary, Payload::Dictionary(pairs))
        }
        Payload::Number(_) | Payload::Plain => {
            return Err(NativeFault::UnrecognizedSelector {
                class: rt.class_name_or_unknown(receiver_class(rt, msg)?),
                selector: "-mutableCopy".to_string(),
            });
        }
    };
    msg.ret.set_object(copied)
}

// ============================================================================
// String
// ============================================================================

fn string_empty(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let class = receiver_class(rt, msg)?;
    let object = rt.create_autoreleased(class, Payload::String(CString::default()));
    msg.ret.set_object(object)
}

fn c_string_arg(msg: &Message<'_>, slot: usize) -> Result<CString, NativeFault> {
    // SAFETY: `*` arguments are NUL-terminated strings the caller keeps alive
    // for the duration of the send.
    let text = unsafe { msg.args.c_str(slot) }?;
    text.map(std::ffi::CStr::to_owned)
        .ok_or_else(|| invalid_argument("NULL C string"))
}

fn string_with_utf8(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let class = receiver_class(rt, msg)?;
    let text = c_string_arg(msg, 2)?;
    let object = rt.create_autoreleased(class, Payload::String(text));
    msg.ret.set_object(object)
}

fn string_init_utf8(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let object = msg.receiver_object()?;
    let text = c_string_arg(msg, 2)?;
    rt.with_payload(object, |payload| {
        *payload = Payload::String(text);
        Ok(())
    })?;
    msg.ret.set_object(object)
}

fn string_length(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let text = string_of(rt, msg.receiver_object()?)?;
    msg.ret.set_int(text.chars().count() as i128)
}

fn string_utf8(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let address = rt.c_string_address(msg.receiver_object()?)?;
    msg.ret.set_pointer(address)
}

fn string_append(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let head = string_of(rt, msg.receiver_object()?)?;
    let tail = string_of(rt, non_nil(msg.args.object(2)?, "appended string")?)?;
    let object = new_autoreleased_string(rt, &format!("{head}{tail}"))?;
    msg.ret.set_object(object)
}

fn string_uppercase(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let text = string_of(rt, msg.receiver_object()?)?;
    let object = new_autoreleased_string(rt, &text.to_uppercase())?;
    msg.ret.set_object(object)
}

// ============================================================================
// Number
// ============================================================================

fn boxed_number(rt: &SimRuntime, msg: &mut Message<'_>, number: Number) -> Result<(), NativeFault> {
    let object = rt.create_autoreleased(rt.foundation().number, Payload::Number(number));
    msg.ret.set_object(object)
}

fn number_with_int(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let value = msg.args.int(2)?;
    let value = i64::try_from(value).map_err(|_| invalid_argument("integer out of range"))?;
    boxed_number(rt, msg, Number::Int(value))
}

fn number_with_float(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let value = msg.args.double(2)?;
    boxed_number(rt, msg, Number::Float(value))
}

fn number_with_bool(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let value = msg.args.bool(2)?;
    boxed_number(rt, msg, Number::Bool(value))
}

fn number_of(rt: &SimRuntime, msg: &Message<'_>) -> Result<Number, NativeFault> {
    let object = msg.receiver_object()?;
    rt.number_value(object)
        .ok_or_else(|| invalid_argument(format!("object {object} is not a number")))
}

fn number_int_value(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let value = match number_of(rt, msg)? {
        Number::Int(value) => i128::from(value),
        #[allow(clippy::cast_possible_truncation)]
        Number::Float(value) => value as i128,
        Number::Bool(value) => i128::from(value),
    };
    msg.ret.set_int(value)
}

fn number_float_value(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let value = number_as_f64(number_of(rt, msg)?);
    msg.ret.set_double(value)
}

fn number_bool_value(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let value = number_as_f64(number_of(rt, msg)?) != 0.0;
    msg.ret.set_bool(value)
}

// ============================================================================
// Array
// ============================================================================

fn array_empty(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let class = receiver_class(rt, msg)?;
    let object = new_array(rt, class, Vec::new())?;
    msg.ret.set_object(object)
}

fn array_with_object(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let class = receiver_class(rt, msg)?;
    let item = non_nil(msg.args.object(2)?, "array element")?;
    let object = new_array(rt, class, vec![item])?;
    msg.ret.set_object(object)
}

fn collection_count(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let count = match rt.payload(msg.receiver_object()?)? {
        Payload::Array(items) => items.len(),
        Payload::Dictionary(pairs) => pairs.len(),
        _ => return Err(invalid_argument("receiver is not a collection")),
    };
    msg.ret.set_int(count as i128)
}

fn array_object_at(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let items = items_of(rt, msg.receiver_object()?)?;
    let index = msg.args.int(2)?;
    let item = usize::try_from(index)
        .ok()
        .and_then(|i| items.get(i).copied())
        .ok_or_else(|| range_error(index, Some(items.len())))?;
    msg.ret.set_object(item)
}

fn array_first(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let items = items_of(rt, msg.receiver_object()?)?;
    msg.ret
        .set_object(items.first().copied().unwrap_or(ObjectId::NIL))
}

fn array_last(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let items = items_of(rt, msg.receiver_object()?)?;
    msg.ret
        .set_object(items.last().copied().unwrap_or(ObjectId::NIL))
}

fn array_contains(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let items = items_of(rt, msg.receiver_object()?)?;
    let needle = msg.args.object(2)?;
    let found = items.iter().any(|item| rt.objects_equal(*item, needle));
    msg.ret.set_bool(found)
}

fn array_add(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let object = msg.receiver_object()?;
    let item = non_nil(msg.args.object(2)?, "array element")?;
    rt.retain(item)?;
    edit_items(rt, object, |items| {
        items.push(item);
        Ok(())
    })
}

fn array_insert(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let object = msg.receiver_object()?;
    let item = non_nil(msg.args.object(2)?, "array element")?;
    let index = index_arg(msg, 3)?;
    let len = items_of(rt, object)?.len();
    if index > len {
        return Err(range_error(index, Some(len)));
    }
    rt.retain(item)?;
    edit_items(rt, object, |items| {
        items.insert(index, item);
        Ok(())
    })
}

fn array_replace(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let object = msg.receiver_object()?;
    let index = index_arg(msg, 2)?;
    let item = non_nil(msg.args.object(3)?, "array element")?;
    let len = items_of(rt, object)?.len();
    if index >= len {
        return Err(range_error(index, Some(len)));
    }
    rt.retain(item)?;
    let old = edit_items(rt, object, |items| {
        Ok(std::mem::replace(&mut items[index], item))
    })?;
    rt.release(old)
}

fn array_remove_at(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let object = msg.receiver_object()?;
    let index = index_arg(msg, 2)?;
    let removed = edit_items(rt, object, |items| {
        if index < items.len() {
            Ok(items.remove(index))
        } else {
            Err(range_error(index, Some(items.len())))
        }
    })?;
    rt.release(removed)
}

fn array_remove_last(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let object = msg.receiver_object()?;
    match edit_items(rt, object, |items| Ok(items.pop()))? {
        Some(removed) => rt.release(removed),
        None => Err(range_error(0, Some(0))),
    }
}

fn remove_all(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let object = msg.receiver_object()?;
    let removed = rt.with_payload(object, |payload| {
        let removed = payload.clone();
        match payload {
            Payload::Array(items) => items.clear(),
            Payload::Dictionary(pairs) => pairs.clear(),
            _ => return Err(invalid_argument("receiver is not a collection")),
        }
        Ok(removed)
    })?;
    let children = match removed {
        Payload::Array(items) => items,
        Payload::Dictionary(pairs) => pairs.into_iter().flat_map(|(k, v)| [k, v]).collect(),
        _ => Vec::new(),
    };
    for child in children {
        rt.release(child)?;
    }
    Ok(())
}

// ============================================================================
// Dictionary
// ============================================================================

fn dictionary_empty(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let class = receiver_class(rt, msg)?;
    let object = rt.create_autoreleased(class, Payload::Dictionary(Vec::new()));
    msg.ret.set_object(object)
}

fn find_key(rt: &SimRuntime, pairs: &[(ObjectId, ObjectId)], key: ObjectId) -> Option<usize> {
    pairs.iter().position(|(k, _)| rt.objects_equal(*k, key))
}

fn dictionary_get(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let pairs = pairs_of(rt, msg.receiver_object()?)?;
    let key = msg.args.object(2)?;
    let value = find_key(rt, &pairs, key).map_or(ObjectId::NIL, |index| pairs[index].1);
    msg.ret.set_object(value)
}

fn dictionary_keys(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let pairs = pairs_of(rt, msg.receiver_object()?)?;
    let keys = pairs.iter().map(|(key, _)| *key).collect();
    let array = new_array(rt, rt.foundation().array, keys)?;
    msg.ret.set_object(array)
}

fn dictionary_values(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let pairs = pairs_of(rt, msg.receiver_object()?)?;
    let values = pairs.iter().map(|(_, value)| *value).collect();
    let array = new_array(rt, rt.foundation().array, values)?;
    msg.ret.set_object(array)
}

fn dictionary_set(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let object = msg.receiver_object()?;
    let value = non_nil(msg.args.object(2)?, "dictionary value")?;
    let key = non_nil(msg.args.object(3)?, "dictionary key")?;
    let existing = find_key(rt, &pairs_of(rt, object)?, key);
    rt.retain(value)?;
    match existing {
        Some(index) => {
            let old = edit_pairs(rt, object, |pairs| {
                Ok(std::mem::replace(&mut pairs[index].1, value))
            })?;
            rt.release(old)
        }
        None => {
            rt.retain(key)?;
            edit_pairs(rt, object, |pairs| {
                pairs.push((key, value));
                Ok(())
            })
        }
    }
}

fn dictionary_remove(rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let object = msg.receiver_object()?;
    let key = msg.args.object(2)?;
    let Some(index) = find_key(rt, &pairs_of(rt, object)?, key) else {
        return Ok(());
    };
    let (old_key, old_value) = edit_pairs(rt, object, |pairs| Ok(pairs.remove(index)))?;
    rt.release(old_key)?;
    rt.release(old_value)
}

// ============================================================================
// Geometry
// ============================================================================

fn doubles(bytes: &[u8]) -> Vec<f64> {
    bytes
        .chunks_exact(8)
        .filter_map(|chunk| chunk.try_into().ok().map(f64::from_ne_bytes))
        .collect()
}

fn doubles_to_bytes(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|value| value.to_ne_bytes()).collect()
}

fn geometry_scale_rect(_rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let rect = doubles(msg.args.bytes(2)?);
    let factor = msg.args.double(3)?;
    let scaled: Vec<f64> = rect.iter().map(|value| value * factor).collect();
    msg.ret.set_bytes(&doubles_to_bytes(&scaled))
}

fn geometry_area(_rt: &SimRuntime, msg: &mut Message<'_>) -> Result<(), NativeFault> {
    let size = doubles(msg.args.bytes(2)?);
    let area = size.iter().product();
    msg.ret.set_double(area)
}

// ============================================================================
// Functions
// ============================================================================

fn define_function(rt: &SimRuntime, name: &str, types: &str, imp: NativeFn) {
    debug_assert!(parse_type_list(types).is_ok(), "{name}");
    rt.define_function(name, Some(types), imp);
}

fn install_functions(rt: &SimRuntime) {
    define_function(
        rt,
        "iadd",
        "iii",
        Rc::new(|args: &ArgFrame, ret: &mut ReturnFrame| {
            ret.set_int(args.int(0)? + args.int(1)?)
        }),
    );
    define_function(
        rt,
        "uqadd",
        "QQQ",
        Rc::new(|args: &ArgFrame, ret: &mut ReturnFrame| {
            ret.set_int(args.int(0)? + args.int(1)?)
        }),
    );
    define_function(
        rt,
        "cadd",
        "ccc",
        Rc::new(|args: &ArgFrame, ret: &mut ReturnFrame| {
            ret.set_int(args.int(0)? + args.int(1)?)
        }),
    );
    define_function(
        rt,
        "dadd",
        "ddd",
        Rc::new(|args: &ArgFrame, ret: &mut ReturnFrame| {
            ret.set_double(args.double(0)? + args.double(1)?)
        }),
    );
    define_function(
        rt,
        "scale_size",
        "{Size=dd}{Size=dd}d",
        Rc::new(|args: &ArgFrame, ret: &mut ReturnFrame| {
            let factor = args.double(1)?;
            let scaled: Vec<f64> = doubles(args.bytes(0)?)
                .iter()
                .map(|value| value * factor)
                .collect();
            ret.set_bytes(&doubles_to_bytes(&scaled))
        }),
    );
    define_function(
        rt,
        "string_length",
        "Q*",
        Rc::new(|args: &ArgFrame, ret: &mut ReturnFrame| {
            // SAFETY: `*` arguments are NUL-terminated strings the caller
            // keeps alive for the duration of the call.
            let text = unsafe { args.c_str(0) }?;
            ret.set_int(text.map_or(0, |text| text.to_bytes().len()) as i128)
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::frame::write_int;

    fn send(
        rt: &SimRuntime,
        target: Target,
        selector: &str,
        types: &str,
        fill: impl FnOnce(&mut ArgFrame) -> Result<(), NativeFault>,
    ) -> Result<ReturnFrame, NativeFault> {
        let selector: Selector = selector.parse().unwrap();
        call(rt, target, &selector, types, fill)
    }

    #[test]
    fn test_builtin_classes() {
        let rt = SimRuntime::new();
        for name in ["Object", "String", "Number", "Array", "MutableArray", "Dictionary"] {
            assert!(rt.class_named(name).is_some(), "{name}");
        }
        let mutable = rt.class_named("MutableArray").unwrap();
        assert_eq!(rt.superclass(mutable), rt.class_named("Array"));
    }

    #[test]
    fn test_mutable_array_retains_elements() {
        let rt = SimRuntime::new();
        let class = rt.class_named("MutableArray").unwrap();
        let array = send(&rt, Target::class(class), "new", "@#:", |_| Ok(()))
            .unwrap()
            .object()
            .unwrap();
        let item = rt.new_string("a").unwrap();
        send(&rt, Target::instance(array), "addObject:", "v@:@", |args| {
            args.set_object(2, item)
        })
        .unwrap();
        assert_eq!(rt.retain_count(item), Some(2));

        let ret = send(&rt, Target::instance(array), "objectAtIndex:", "@@:Q", |args| {
            args.set_word(2, 0)
        })
        .unwrap();
        assert_eq!(ret.object(), Some(item));

        let err = send(&rt, Target::instance(array), "objectAtIndex:", "@@:Q", |args| {
            args.set_word(2, 5)
        })
        .unwrap_err();
        assert!(matches!(err, NativeFault::Exception { ref name, .. } if name == "RangeException"));

        rt.release(array).unwrap();
        assert_eq!(rt.retain_count(item), Some(1));
        rt.release(item).unwrap();
    }

    #[test]
    fn test_dictionary_value_equality() {
        let rt = SimRuntime::new();
        let class = rt.class_named("MutableDictionary").unwrap();
        let dict = send(&rt, Target::class(class), "new", "@#:", |_| Ok(()))
            .unwrap()
            .object()
            .unwrap();
        let key = rt.new_string("k").unwrap();
        let other_key = rt.new_string("k").unwrap();
        let value = rt.new_number(Number::Int(7)).unwrap();
        send(&rt, Target::instance(dict), "setObject:forKey:", "v@:@@", |args| {
            args.set_object(2, value)?;
            args.set_object(3, key)
        })
        .unwrap();
        let ret = send(&rt, Target::instance(dict), "objectForKey:", "@@:@", |args| {
            args.set_object(2, other_key)
        })
        .unwrap();
        assert_eq!(ret.object(), Some(value));
    }

    #[test]
    fn test_perform_selector_and_description() {
        let rt = SimRuntime::new();
        let string = rt.new_string("hi").unwrap();
        let describe_sel: Selector = "description".parse().unwrap();
        let ret = send(&rt, Target::instance(string), "performSelector:", "@@::", |args| {
            args.set_selector(2, &describe_sel)
        })
        .unwrap();
        let description = ret.object().unwrap();
        assert_eq!(rt.string_value(description).as_deref(), Some("hi"));
        assert_eq!(rt.pending_autoreleases(), 1);
        rt.drain_pool();
        assert_eq!(rt.retain_count(description), None);
    }

    #[test]
    fn test_functions() {
        let rt = SimRuntime::new();
        let info = rt.function("iadd").unwrap();
        let types = parse_type_list(info.types.as_deref().unwrap()).unwrap();
        let mut args = ArgFrame::new(&types[1..]).unwrap();
        assert!(args.set_word(0, 40).is_err());
        let ty = types[1].clone();
        assert!(write_int(&ty, args.slot_mut(0).unwrap(), 40));
        assert!(write_int(&ty, args.slot_mut(1).unwrap(), 2));
        let mut ret = ReturnFrame::new(&types[0]).unwrap();
        (info.imp)(&args, &mut ret).unwrap();
        assert_eq!(ret.int(), Some(42));
    }
}
