//! Callback hooks fired around and inside migrations
//!
//! A [`Callback`] receives lifecycle events for every unit applied and a
//! [`CallbackEvent::CallComment`] event for every `-- CALL <name>;` directive,
//! at its position among the unit's statements. Callbacks get the target
//! session so they can run data migrations that plain CQL cannot express.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::session::Session;

/// Error type returned by callbacks
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Event discriminant, used as part of a [`CallbackRegister`] key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    BeforeMigration,
    AfterMigration,
    CallComment,
}

/// Event passed to a callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackEvent {
    /// Before the first statement of a unit
    BeforeMigration { migration: String },
    /// After every statement and directive of a unit succeeded
    AfterMigration { migration: String },
    /// At a `-- CALL <name>;` directive
    CallComment { migration: String, name: String },
}

impl CallbackEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            CallbackEvent::BeforeMigration { .. } => EventKind::BeforeMigration,
            CallbackEvent::AfterMigration { .. } => EventKind::AfterMigration,
            CallbackEvent::CallComment { .. } => EventKind::CallComment,
        }
    }

    /// Name of the unit being applied
    pub fn migration(&self) -> &str {
        match self {
            CallbackEvent::BeforeMigration { migration }
            | CallbackEvent::AfterMigration { migration }
            | CallbackEvent::CallComment { migration, .. } => migration,
        }
    }

    /// Directive name, only set for `CallComment`
    pub fn name(&self) -> Option<&str> {
        match self {
            CallbackEvent::CallComment { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Hook invoked by the migrator
#[async_trait]
pub trait Callback: Send + Sync {
    async fn call(&self, session: &dyn Session, event: &CallbackEvent) -> Result<(), BoxError>;
}

/// Adapts a synchronous closure into a [`Callback`]
///
/// ```
/// use cql_migrate::{CallbackEvent, FnCallback};
///
/// let log = FnCallback::new(|event: &CallbackEvent| {
///     println!("{:?} {}", event.kind(), event.migration());
///     Ok(())
/// });
/// # let _ = log;
/// ```
pub struct FnCallback<F> {
    f: F,
}

impl<F> FnCallback<F>
where
    F: Fn(&CallbackEvent) -> Result<(), BoxError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> fmt::Debug for FnCallback<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnCallback")
    }
}

#[async_trait]
impl<F> Callback for FnCallback<F>
where
    F: Fn(&CallbackEvent) -> Result<(), BoxError> + Send + Sync,
{
    async fn call(&self, _session: &dyn Session, event: &CallbackEvent) -> Result<(), BoxError> {
        (self.f)(event)
    }
}

/// Dispatches events to callbacks registered per event kind and name
///
/// Lifecycle events are keyed by migration name, directives by directive
/// name. Lifecycle events with no entry are ignored; a directive with no
/// entry is an error so a misspelt `-- CALL` never passes silently.
#[derive(Default, Clone)]
pub struct CallbackRegister {
    callbacks: HashMap<(EventKind, String), Arc<dyn Callback>>,
}

impl CallbackRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `kind` events named `name`
    pub fn add(
        mut self,
        kind: EventKind,
        name: impl Into<String>,
        callback: impl Callback + 'static,
    ) -> Self {
        self.callbacks.insert((kind, name.into()), Arc::new(callback));
        self
    }

    /// Register a directive handler
    pub fn on_call(self, name: impl Into<String>, callback: impl Callback + 'static) -> Self {
        self.add(EventKind::CallComment, name, callback)
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    fn lookup(&self, event: &CallbackEvent) -> Option<&Arc<dyn Callback>> {
        let name = event.name().unwrap_or_else(|| event.migration());
        self.callbacks.get(&(event.kind(), name.to_string()))
    }
}

impl fmt::Debug for CallbackRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.callbacks.keys().collect();
        keys.sort_by(|a, b| a.1.cmp(&b.1));
        f.debug_struct("CallbackRegister")
            .field("callbacks", &keys)
            .finish()
    }
}

#[async_trait]
impl Callback for CallbackRegister {
    async fn call(&self, session: &dyn Session, event: &CallbackEvent) -> Result<(), BoxError> {
        match (self.lookup(event), event) {
            (Some(callback), _) => callback.call(session, event).await,
            (None, CallbackEvent::CallComment { name, .. }) => {
                Err(format!("no callback registered for '{}'", name).into())
            }
            (None, _) => Ok(()),
        }
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::session::MemorySession;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: Arc<AtomicUsize>) -> impl Callback {
        FnCallback::new(move |_event: &CallbackEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_event_accessors() {
        let event = CallbackEvent::CallComment {
            migration: "3.cql".to_string(),
            name: "Foo".to_string(),
        };
        assert_eq!(event.kind(), EventKind::CallComment);
        assert_eq!(event.migration(), "3.cql");
        assert_eq!(event.name(), Some("Foo"));

        let before = CallbackEvent::BeforeMigration {
            migration: "0.cql".to_string(),
        };
        assert_eq!(before.kind(), EventKind::BeforeMigration);
        assert_eq!(before.name(), None);
    }

    #[tokio::test]
    async fn test_register_dispatches_by_kind_and_name() {
        let session = MemorySession::new();
        let foo = Arc::new(AtomicUsize::new(0));
        let after = Arc::new(AtomicUsize::new(0));

        let register = CallbackRegister::new()
            .on_call("Foo", counting(foo.clone()))
            .add(EventKind::AfterMigration, "1.cql", counting(after.clone()));
        assert_eq!(register.len(), 2);

        let call = CallbackEvent::CallComment {
            migration: "1.cql".to_string(),
            name: "Foo".to_string(),
        };
        register.call(&session, &call).await.unwrap();
        register
            .call(
                &session,
                &CallbackEvent::AfterMigration {
                    migration: "1.cql".to_string(),
                },
            )
            .await
            .unwrap();
        register
            .call(
                &session,
                &CallbackEvent::AfterMigration {
                    migration: "2.cql".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(foo.load(Ordering::SeqCst), 1);
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_register_rejects_unknown_directive() {
        let session = MemorySession::new();
        let register = CallbackRegister::new();
        assert!(register.is_empty());

        let err = register
            .call(
                &session,
                &CallbackEvent::CallComment {
                    migration: "1.cql".to_string(),
                    name: "Missing".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Missing"));

        register
            .call(
                &session,
                &CallbackEvent::BeforeMigration {
                    migration: "1.cql".to_string(),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_fn_callback_propagates_error() {
        let session = MemorySession::new();
        let failing = FnCallback::new(|_event: &CallbackEvent| Err("boom".into()));
        let err = failing
            .call(
                &session,
                &CallbackEvent::BeforeMigration {
                    migration: "0.cql".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}
