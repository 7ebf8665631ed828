//! Event and hook mechanism.
//!
//! Publish/subscribe keyed by target and event name, with a pipeline
//! dispatch that threads one argument through every listener.

pub mod alias;
pub mod bus;

pub use alias::{Alias, AliasMode, BoundHooks};
pub use bus::{
    add_listener, get_listeners, listener, notify, pipeline, Carry, DefaultProvider,
    DefaultRegistrar, EventArgs, EventTarget, Listener, Listeners, BIND, POSTVALIDATE,
    PREVALIDATE, PROCESSED, UNBIND,
};
