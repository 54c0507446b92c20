// Common test utilities for integration tests
//
// This module provides shared helper functions and test fixtures
// for use across all integration tests.

#![allow(dead_code)]

use oxidex_bridge::native::SimRuntime;
use oxidex_bridge::{Bridge, BridgeConfig, ClassDecl, Result, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// Arguments seen by a recording script method, one entry per call.
pub type CallLog = Rc<RefCell<Vec<Vec<Value>>>>;

/// Creates a simulated runtime and a bridge over it.
pub fn setup() -> (Rc<SimRuntime>, Bridge) {
    setup_with(BridgeConfig::default())
}

/// Creates a simulated runtime and a bridge with `config`.
pub fn setup_with(config: BridgeConfig) -> (Rc<SimRuntime>, Bridge) {
    // Level from OXIDEX_LOG; later calls find the logger already installed.
    let _ = oxidex_log::init_from_env(None);
    let runtime = Rc::new(SimRuntime::new());
    let bridge = Bridge::with_config(runtime.clone(), config);
    (runtime, bridge)
}

/// Declares `name` < Object with `increment:` (`v@:i`), which records its
/// arguments and adds them to the `count` ivar, and a `value` accessor.
pub fn declare_counter(bridge: &Bridge, name: &str) -> CallLog {
    let log: CallLog = Rc::new(RefCell::new(Vec::new()));
    let calls = Rc::clone(&log);
    ClassDecl::new(name, "Object")
        .method(
            "increment:",
            Some("v@:i"),
            move |bridge: &Bridge, this: &Value, args: &[Value]| -> Result<Value> {
                calls.borrow_mut().push(args.to_vec());
                let count = bridge.ivar(this, "count").as_i64().unwrap_or(0);
                let step = args[0].as_i64().unwrap_or(0);
                bridge.set_ivar(this, "count", Value::Int(count + step))?;
                Ok(Value::Nil)
            },
        )
        .method(
            "count",
            Some("q@:"),
            |bridge: &Bridge, this: &Value, _args: &[Value]| -> Result<Value> {
                Ok(Value::Int(bridge.ivar(this, "count").as_i64().unwrap_or(0)))
            },
        )
        .accessor("value")
        .declare(bridge)
        .expect("Failed to declare counter class");
    log
}

/// Declares `name` < Object with one echo method per entry of `methods`
/// (`(selector, signature)`); each returns its first argument.
pub fn declare_echo(bridge: &Bridge, name: &str, methods: &[(&str, &str)]) {
    let mut decl = ClassDecl::new(name, "Object");
    for &(selector, signature) in methods {
        decl = decl.method(
            selector,
            Some(signature),
            |_bridge: &Bridge, _this: &Value, args: &[Value]| -> Result<Value> {
                Ok(args.first().cloned().unwrap_or(Value::Nil))
            },
        );
    }
    decl.declare(bridge).expect("Failed to declare echo class");
}

/// Reads a native string into a Rust string.
pub fn text(bridge: &Bridge, value: &Value) -> String {
    bridge
        .to_string_value(value)
        .expect("Expected a native string")
}
