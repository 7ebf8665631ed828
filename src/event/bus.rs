//! Listener storage and dispatch.
//!
//! Listeners are keyed by event name on a target. A target chooses where
//! its listeners live through [`EventTarget::storage`] and may override
//! registration and retrieval; the free functions in this module always go
//! through those override points.

use crate::core::error::{EventError, EventResult, HookError};
use crate::core::types::Value;
use indexmap::IndexMap;
use log::{trace, warn};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Fires before conversion; carries the raw input.
pub const PREVALIDATE: &str = "prevalidate";
/// Fires after conversion; carries the converted value.
pub const POSTVALIDATE: &str = "postvalidate";
/// Fires when a bound validator finished processing.
pub const PROCESSED: &str = "processed";
/// Fires after a validator was bound to an owner.
pub const BIND: &str = "bind";
/// Fires after a validator was removed from its owner.
pub const UNBIND: &str = "unbind";

/// Callback attached to an event.
pub type Listener = Arc<dyn Fn(&EventArgs) -> Result<Value, HookError> + Send + Sync>;

/// Wrap a closure as a [`Listener`].
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&EventArgs) -> Result<Value, HookError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Default registration handed to [`EventTarget::on_add_listener`].
pub type DefaultRegistrar<'a> = &'a dyn Fn(&str, Listener) -> EventResult<()>;

/// Default retrieval handed to [`EventTarget::on_get_listeners`].
pub type DefaultProvider<'a> = &'a dyn Fn(&str) -> EventResult<Vec<Listener>>;

/// Shared, ordered listener storage.
///
/// Clones share the same storage.
#[derive(Clone, Default)]
pub struct Listeners {
    inner: Arc<RwLock<IndexMap<String, Vec<Listener>>>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener for an event.
    pub fn push(&self, event: &str, listener: Listener) {
        self.inner
            .write()
            .entry(event.to_string())
            .or_default()
            .push(listener);
    }

    /// Listeners of an event in registration order.
    pub fn get(&self, event: &str) -> Vec<Listener> {
        self.inner.read().get(event).cloned().unwrap_or_default()
    }

    /// Number of listeners registered for an event.
    pub fn count(&self, event: &str) -> usize {
        self.inner.read().get(event).map_or(0, Vec::len)
    }

    /// Event names with at least one listener.
    pub fn events(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().values().all(Vec::is_empty)
    }

    /// Check whether two handles share storage.
    pub fn same_storage(&self, other: &Listeners) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.inner.read();
        let mut map = f.debug_map();
        for (event, listeners) in guard.iter() {
            map.entry(event, &listeners.len());
        }
        map.finish()
    }
}

/// Arguments passed to every listener of one dispatch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventArgs {
    pub positional: Vec<Value>,
    pub named: IndexMap<String, Value>,
}

impl EventArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn with_arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Add a named argument.
    pub fn with_named(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named.insert(name.into(), value.into());
        self
    }

    /// Positional argument; negative positions count from the end.
    pub fn arg(&self, position: isize) -> Option<&Value> {
        let index = self.resolve(position)?;
        self.positional.get(index)
    }

    pub fn named(&self, name: &str) -> Option<&Value> {
        self.named.get(name)
    }

    /// The first positional argument, or `Undefined`.
    pub fn value(&self) -> &Value {
        self.positional.first().unwrap_or(&Value::Undefined)
    }

    fn resolve(&self, position: isize) -> Option<usize> {
        if position < 0 {
            self.positional.len().checked_sub(position.unsigned_abs())
        } else {
            Some(position as usize)
        }
    }

    fn slot_mut(&mut self, carry: &Carry) -> EventResult<&mut Value> {
        match carry {
            Carry::Position(position) => {
                let index = self
                    .resolve(*position)
                    .ok_or_else(|| EventError::MissingCarry(position.to_string()))?;
                self.positional
                    .get_mut(index)
                    .ok_or_else(|| EventError::MissingCarry(position.to_string()))
            }
            Carry::Name(name) => self
                .named
                .get_mut(name)
                .ok_or_else(|| EventError::MissingCarry(name.clone())),
        }
    }
}

/// Argument threaded through a [`pipeline`] as accumulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Carry {
    /// Positional argument; negative positions count from the end.
    Position(isize),
    Name(String),
}

impl From<isize> for Carry {
    fn from(position: isize) -> Self {
        Carry::Position(position)
    }
}

impl From<&str> for Carry {
    fn from(name: &str) -> Self {
        Carry::Name(name.to_string())
    }
}

/// Something listeners can be attached to.
pub trait EventTarget {
    /// Storage used by default registration and retrieval.
    fn storage(&self) -> Option<&Listeners>;

    /// Registration override point.
    fn on_add_listener(
        &self,
        event: &str,
        listener: Listener,
        default: DefaultRegistrar<'_>,
    ) -> EventResult<()> {
        default(event, listener)
    }

    /// Retrieval override point.
    fn on_get_listeners(
        &self,
        event: &str,
        default: DefaultProvider<'_>,
    ) -> EventResult<Vec<Listener>> {
        default(event)
    }
}

impl EventTarget for Listeners {
    fn storage(&self) -> Option<&Listeners> {
        Some(self)
    }
}

/// Register a listener on a target.
pub fn add_listener<T: EventTarget + ?Sized>(
    target: &T,
    event: &str,
    listener: Listener,
) -> EventResult<()> {
    let default = |event: &str, listener: Listener| -> EventResult<()> {
        target
            .storage()
            .ok_or(EventError::NoStorage)?
            .push(event, listener);
        Ok(())
    };
    target.on_add_listener(event, listener, &default)
}

/// Listeners a dispatch on `event` would invoke, in order.
pub fn get_listeners<T: EventTarget + ?Sized>(
    target: &T,
    event: &str,
) -> EventResult<Vec<Listener>> {
    let default = |event: &str| -> EventResult<Vec<Listener>> {
        Ok(target.storage().map(|s| s.get(event)).unwrap_or_default())
    };
    target.on_get_listeners(event, &default)
}

/// Invoke every listener, discarding results.
///
/// A failing listener is logged and does not stop the others.
pub fn notify<T: EventTarget + ?Sized>(target: &T, event: &str, args: &EventArgs) -> EventResult<()> {
    for listener in get_listeners(target, event)? {
        if let Err(e) = listener(args) {
            warn!("Listener for '{}' failed: {}", event, e);
        }
    }
    Ok(())
}

/// Invoke listeners in order, feeding each result into the carried
/// argument of the next call. Returns the final carried value.
pub fn pipeline<T: EventTarget + ?Sized>(
    target: &T,
    event: &str,
    carry: &Carry,
    mut args: EventArgs,
) -> EventResult<Value> {
    let listeners = get_listeners(target, event)?;
    // Fail on a missing slot even when nothing is registered.
    args.slot_mut(carry)?;
    for (i, listener) in listeners.iter().enumerate() {
        let next = listener(&args)?;
        trace!("Pipeline '{}' step {} produced {:?}", event, i, next);
        *args.slot_mut(carry)? = next;
    }
    Ok(args.slot_mut(carry)?.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_suffix(suffix: &'static str) -> Listener {
        listener(move |args| Ok(Value::String(format!("{}{}", args.value(), suffix))))
    }

    #[test]
    fn test_listeners_keep_registration_order() {
        let target = Listeners::new();
        add_listener(&target, "e", add_suffix("a")).unwrap();
        add_listener(&target, "e", add_suffix("b")).unwrap();
        add_listener(&target, "other", add_suffix("c")).unwrap();

        assert_eq!(get_listeners(&target, "e").unwrap().len(), 2);
        assert_eq!(target.count("other"), 1);
        assert!(get_listeners(&target, "missing").unwrap().is_empty());
    }

    #[test]
    fn test_pipeline_threads_positional_carry() {
        let target = Listeners::new();
        add_listener(&target, "e", add_suffix("1")).unwrap();
        add_listener(&target, "e", add_suffix("2")).unwrap();

        let result = pipeline(&target, "e", &Carry::Position(0), EventArgs::new().with_arg("x"));
        assert_eq!(result.unwrap(), Value::from("x12"));
    }

    #[test]
    fn test_pipeline_threads_named_carry() {
        let target = Listeners::new();
        add_listener(
            &target,
            "e",
            listener(|args| {
                let n = args.named("total").and_then(Value::as_integer).unwrap_or(0);
                Ok(Value::Integer(n * 10))
            }),
        )
        .unwrap();

        let args = EventArgs::new().with_arg("ignored").with_named("total", 4i64);
        assert_eq!(
            pipeline(&target, "e", &Carry::from("total"), args).unwrap(),
            Value::Integer(40)
        );
    }

    #[test]
    fn test_pipeline_negative_position() {
        let target = Listeners::new();
        add_listener(&target, "e", add_suffix("!")).unwrap();
        let args = EventArgs::new().with_arg("first").with_arg("last");
        assert_eq!(
            pipeline(&target, "e", &Carry::Position(-1), args).unwrap(),
            Value::from("first!")
        );
    }

    #[test]
    fn test_pipeline_missing_carry() {
        let target = Listeners::new();
        let err = pipeline(&target, "e", &Carry::from("nope"), EventArgs::new()).unwrap_err();
        assert_eq!(err, EventError::MissingCarry("nope".to_string()));
    }

    #[test]
    fn test_pipeline_propagates_hook_error() {
        let target = Listeners::new();
        add_listener(&target, "e", listener(|_| Err(HookError::new("rejected")))).unwrap();
        let err = pipeline(&target, "e", &Carry::Position(0), EventArgs::new().with_arg(1i64))
            .unwrap_err();
        assert_eq!(err, EventError::Hook(HookError::new("rejected")));
    }

    #[test]
    fn test_notify_swallows_listener_failures() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = Arc::new(AtomicUsize::new(0));
        let target = Listeners::new();
        add_listener(&target, "e", listener(|_| Err(HookError::new("boom")))).unwrap();
        let counter = calls.clone();
        add_listener(
            &target,
            "e",
            listener(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Undefined)
            }),
        )
        .unwrap();

        notify(&target, "e", &EventArgs::new()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct Recorder {
        log: RwLock<Vec<String>>,
        storage: Listeners,
    }

    impl EventTarget for Recorder {
        fn storage(&self) -> Option<&Listeners> {
            Some(&self.storage)
        }

        fn on_add_listener(
            &self,
            event: &str,
            listener: Listener,
            default: DefaultRegistrar<'_>,
        ) -> EventResult<()> {
            self.log.write().push(event.to_string());
            default(event, listener)
        }
    }

    #[test]
    fn test_override_receives_default_registrar() {
        let target = Recorder {
            log: RwLock::new(Vec::new()),
            storage: Listeners::new(),
        };
        add_listener(&target, "seen", add_suffix("x")).unwrap();
        assert_eq!(*target.log.read(), vec!["seen".to_string()]);
        assert_eq!(target.storage.count("seen"), 1);
    }
}
