//! Aliased listener targets.
//!
//! An alias forwards registration and retrieval to another target's
//! storage, refusing whichever direction its mode does not allow.

use crate::core::error::{EventError, EventResult};
use crate::event::bus::{
    get_listeners, DefaultProvider, DefaultRegistrar, EventTarget, Listener, Listeners,
};
use std::fmt;

/// Directions an alias forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AliasMode {
    pub fn can_read(self) -> bool {
        matches!(self, AliasMode::ReadOnly | AliasMode::ReadWrite)
    }

    pub fn can_write(self) -> bool {
        matches!(self, AliasMode::WriteOnly | AliasMode::ReadWrite)
    }
}

impl fmt::Display for AliasMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AliasMode::ReadOnly => write!(f, "read-only"),
            AliasMode::WriteOnly => write!(f, "write-only"),
            AliasMode::ReadWrite => write!(f, "read-write"),
        }
    }
}

/// Target forwarding to another target's listener storage.
#[derive(Debug, Clone)]
pub struct Alias {
    target: Listeners,
    mode: AliasMode,
}

impl Alias {
    /// Alias the storage of `target`.
    pub fn of<T: EventTarget + ?Sized>(target: &T, mode: AliasMode) -> EventResult<Self> {
        let storage = target.storage().ok_or(EventError::NoStorage)?;
        Ok(Self::new(storage.clone(), mode))
    }

    pub fn new(target: Listeners, mode: AliasMode) -> Self {
        Self { target, mode }
    }

    pub fn read_only(target: Listeners) -> Self {
        Self::new(target, AliasMode::ReadOnly)
    }

    pub fn mode(&self) -> AliasMode {
        self.mode
    }

    fn forbidden(&self, operation: &str) -> EventError {
        EventError::Forbidden {
            operation: operation.to_string(),
            mode: self.mode.to_string(),
        }
    }
}

impl EventTarget for Alias {
    fn storage(&self) -> Option<&Listeners> {
        Some(&self.target)
    }

    fn on_add_listener(
        &self,
        event: &str,
        listener: Listener,
        default: DefaultRegistrar<'_>,
    ) -> EventResult<()> {
        if !self.mode.can_write() {
            return Err(self.forbidden("add listeners"));
        }
        default(event, listener)
    }

    fn on_get_listeners(
        &self,
        event: &str,
        default: DefaultProvider<'_>,
    ) -> EventResult<Vec<Listener>> {
        if !self.mode.can_read() {
            return Err(self.forbidden("get listeners"));
        }
        default(event)
    }
}

/// Listeners of a bound validator: its own registrations plus a read-only
/// view of its prototype's.
#[derive(Debug, Clone)]
pub struct BoundHooks {
    own: Listeners,
    inherited: Alias,
}

impl BoundHooks {
    pub fn new(prototype: &Listeners) -> Self {
        Self {
            own: Listeners::new(),
            inherited: Alias::read_only(prototype.clone()),
        }
    }

    /// The prototype's listeners, read-only.
    pub fn inherited(&self) -> &Alias {
        &self.inherited
    }

    /// Listeners registered on the binding itself.
    pub fn own(&self) -> &Listeners {
        &self.own
    }
}

impl EventTarget for BoundHooks {
    fn storage(&self) -> Option<&Listeners> {
        Some(&self.own)
    }

    fn on_get_listeners(
        &self,
        event: &str,
        default: DefaultProvider<'_>,
    ) -> EventResult<Vec<Listener>> {
        let mut listeners = get_listeners(&self.inherited, event)?;
        listeners.extend(default(event)?);
        Ok(listeners)
    }
}
