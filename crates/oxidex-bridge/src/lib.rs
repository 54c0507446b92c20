//! `OxideX Bridge`: dynamic method bridge to an Objective-C style runtime
//!
//! The bridge lets a dynamically typed script runtime call methods on native
//! objects and lets native code call methods implemented in script, with
//! values marshalled according to Objective-C type encodings. It provides:
//!
//! - **Type Encodings** parsed into [`encoding::TypeDescriptor`] trees
//! - **Dynamic Invocation** through argument frames built from signatures
//! - **Ownership Tracking** with exactly one release per acquired reference
//! - **Subclassing** of native classes with script-implemented methods
//! - **Collection Adapters** over native arrays and dictionaries
//!
//! # Architecture
//!
//! - **Native Layer** ([`native`]): the [`native::NativeRuntime`] trait and
//!   an in-process [`native::SimRuntime`] implementing it
//! - **Metadata Layer** ([`registry`], [`wrapper`]): cached class and method
//!   descriptors and the script-side wrapper classes mirroring them
//! - **Call Layer** ([`Bridge`]): outgoing sends, trampolines for incoming
//!   calls, and value marshalling between the two
//!
//! # Example
//!
//! ```rust
//! use oxidex_bridge::{Bridge, ClassDecl, Value};
//! use oxidex_bridge::native::SimRuntime;
//! use std::rc::Rc;
//!
//! let bridge = Bridge::new(Rc::new(SimRuntime::new()));
//! ClassDecl::new("Greeter", "Object")
//!     .method("greet:", Some("@@:@"), |bridge: &Bridge, _this: &Value, args: &[Value]| {
//!         let name = bridge.to_string_value(&args[0]).unwrap_or_default();
//!         bridge.string(&format!("hello, {name}"))
//!     })
//!     .declare(&bridge)
//!     .unwrap();
//!
//! let greeter = bridge.new_object("Greeter").unwrap();
//! let reply = bridge.send(&greeter, "greet:", &["world".into()]).unwrap();
//! assert_eq!(bridge.to_string_value(&reply).as_deref(), Some("hello, world"));
//! ```

pub mod bridge;
pub mod collections;
pub mod config;
pub mod encoding;
pub mod error;
pub mod function;
pub mod handle;
mod invoke;
mod marshal;
pub mod native;
pub mod registry;
pub mod run_loop;
pub mod selector;
pub mod subclass;
pub mod value;
pub mod wrapper;

// Re-export commonly used types
pub use bridge::{Bridge, BridgeStats};
pub use collections::{ArrayIter, NativeArray, NativeDictionary};
pub use config::{BridgeConfig, SignaturePolicy};
pub use error::{Error, Result};
pub use function::NativeFunction;
pub use handle::NativeHandle;
pub use run_loop::{RunLoop, RunReport};
pub use selector::Selector;
pub use subclass::{ClassDecl, ScriptFn, TrampolineBinding};
pub use value::Value;
pub use wrapper::{ClassState, WrapperClass};
