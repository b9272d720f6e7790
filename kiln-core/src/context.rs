//! Request-scoped contexts.
//!
//! A [`RequestContext`] is a resource tied to one request: it is entered
//! before the handler runs and exited after it, with the request's failure
//! (if any). A fresh [`RequestContextManager`] aggregates the contexts of one
//! request, enters them by descending order, exits them in exact reverse, and
//! installs itself in [`ambient`](crate::ambient) storage so handler code can
//! reach a context by type with [`find_context`](crate::find_context).

use std::any::Any;
use std::backtrace::BacktraceStatus;
use std::collections::HashSet;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use downcast_rs::impl_downcast;
use parking_lot::{Mutex, RwLock};

use crate::ambient::{self, AmbientToken};
use crate::component::{Component, Injectable};
use crate::error::{ContextError, ContextResult, PoolResult};
use crate::pool::ObjectPool;
use crate::type_key::TypeKey;

/// A resource scoped to a single request.
pub trait RequestContext: Component {
    /// Larger values enter earlier and exit later.
    fn order() -> i32
    where
        Self: Sized,
    {
        0
    }

    /// Called once when the request starts.
    fn enter(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once when the request ends. Returning `true` suppresses
    /// `failure`.
    fn exit(&self, _failure: Option<&RequestFailure>) -> anyhow::Result<bool> {
        Ok(false)
    }

    fn context_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl_downcast!(sync RequestContext);

/// Description of the failure that ended a request.
///
/// Failures built from an `anyhow::Error` keep the error itself, so a context
/// can react to specific error types with [`is`](Self::is) or
/// [`downcast_ref`](Self::downcast_ref).
#[derive(Debug, Clone)]
pub struct RequestFailure {
    kind: String,
    message: String,
    trace: Option<String>,
    error: Option<Arc<anyhow::Error>>,
}

impl RequestFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            trace: None,
            error: None,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    /// Failure of a handler returning `anyhow::Error`, of kind `"error"`.
    ///
    /// The message is the full cause chain; the trace is the error's
    /// backtrace when one was captured (`RUST_BACKTRACE` /
    /// `RUST_LIB_BACKTRACE`).
    pub fn from_error(err: anyhow::Error) -> Self {
        let mut failure = Self::new("error", format!("{err:#}"));
        let backtrace = err.backtrace();
        if backtrace.status() == BacktraceStatus::Captured {
            failure.trace = Some(backtrace.to_string());
        }
        failure.error = Some(Arc::new(err));
        failure
    }

    /// Failure from a caught panic payload.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Box<dyn Any>".to_string()
        };
        Self::new("panic", message)
    }

    /// The error this failure was built from, if any.
    pub fn error(&self) -> Option<&anyhow::Error> {
        self.error.as_deref()
    }

    /// Whether the underlying error is an `E`, looking through `anyhow` context.
    pub fn is<E>(&self) -> bool
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.downcast_ref::<E>().is_some()
    }

    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.as_deref()?.downcast_ref::<E>()
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn trace(&self) -> Option<&str> {
        self.trace.as_deref()
    }
}

impl PartialEq for RequestFailure {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.message == other.message && self.trace == other.trace
    }
}

impl Eq for RequestFailure {}

impl fmt::Display for RequestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Lifecycle of a [`RequestContextManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Inactive,
    Active,
    TornDown,
}

impl ManagerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManagerState::Inactive => "inactive",
            ManagerState::Active => "active",
            ManagerState::TornDown => "torn down",
        }
    }
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request aggregate of request contexts.
pub struct RequestContextManager {
    contexts: RwLock<Vec<Arc<dyn RequestContext>>>,
    state: Mutex<ManagerState>,
    token: Mutex<Option<AmbientToken>>,
}

impl RequestContextManager {
    pub fn new() -> Self {
        Self::with_contexts(Vec::new())
    }

    /// Manager over `contexts`, kept in the given order.
    pub fn with_contexts(contexts: impl IntoIterator<Item = Arc<dyn RequestContext>>) -> Self {
        Self {
            contexts: RwLock::new(contexts.into_iter().collect()),
            state: Mutex::new(ManagerState::Inactive),
            token: Mutex::new(None),
        }
    }

    /// Appends a context. Only allowed before [`enter`](Self::enter).
    pub fn add_context(&self, context: Arc<dyn RequestContext>) -> ContextResult<()> {
        let state = self.state.lock();
        if *state != ManagerState::Inactive {
            return Err(ContextError::InvalidState {
                expected: ManagerState::Inactive.as_str(),
                found: state.as_str(),
            });
        }
        self.contexts.write().push(context);
        Ok(())
    }

    /// Installs this manager in ambient storage and enters every context in
    /// list order.
    ///
    /// If a context fails to enter, the ones already entered are exited in
    /// reverse with a failure describing the error, the previous ambient
    /// value is restored, and the manager is torn down.
    pub fn enter(self: &Arc<Self>) -> ContextResult<()> {
        self.transition(ManagerState::Inactive, ManagerState::Active)?;

        *self.token.lock() = Some(ambient::set(Arc::clone(self)));

        let contexts = self.contexts.read().clone();
        tracing::debug!("Entering {} request context(s)", contexts.len());

        for (index, context) in contexts.iter().enumerate() {
            let name = context.context_name();
            tracing::trace!("Entering request context '{}'", name);

            if let Err(source) = guarded(|| context.enter()) {
                tracing::error!("Request context '{}' failed to enter: {:#}", name, source);

                let failure = RequestFailure::new("enter", format!("{name}: {source:#}"));
                for entered in contexts[..index].iter().rev() {
                    if let Err(e) = guarded(|| entered.exit(Some(&failure))) {
                        tracing::warn!(
                            "Request context '{}' failed to roll back: {:#}",
                            entered.context_name(),
                            e
                        );
                    }
                }

                self.tear_down();
                return Err(ContextError::Enter {
                    context: name,
                    source,
                });
            }
        }

        Ok(())
    }

    /// Exits every context in reverse order, passing the same `failure` to
    /// each, and restores the previous ambient value.
    ///
    /// Returns whether any context suppressed the failure. A failing exit
    /// does not stop the remaining ones; the first error is returned once
    /// all of them ran.
    pub fn exit(&self, failure: Option<&RequestFailure>) -> ContextResult<bool> {
        {
            let state = self.state.lock();
            if *state != ManagerState::Active {
                return Err(ContextError::InvalidState {
                    expected: ManagerState::Active.as_str(),
                    found: state.as_str(),
                });
            }
        }

        let contexts = self.contexts.read().clone();
        match failure {
            Some(failure) => tracing::debug!(
                "Exiting {} request context(s) after failure: {}",
                contexts.len(),
                failure
            ),
            None => tracing::debug!("Exiting {} request context(s)", contexts.len()),
        }

        let mut suppressed = false;
        let mut first_error = None;

        for context in contexts.iter().rev() {
            let name = context.context_name();
            match guarded(|| context.exit(failure)) {
                Ok(true) => {
                    tracing::debug!("Request context '{}' suppressed the failure", name);
                    suppressed = true;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("Request context '{}' failed to exit: {:#}", name, e);
                    if first_error.is_none() {
                        first_error = Some((name, e));
                    }
                }
            }
        }

        self.tear_down();

        match first_error {
            Some((context, source)) => Err(ContextError::Exit { context, source }),
            None => Ok(suppressed && failure.is_some()),
        }
    }

    /// First context whose concrete type is exactly `C`.
    pub fn find_context<C: RequestContext>(&self) -> Option<Arc<C>> {
        let contexts = self.contexts.read();
        contexts
            .iter()
            .find(|context| context.is::<C>())
            .and_then(|context| Arc::clone(context).downcast_arc::<C>().ok())
    }

    pub fn state(&self) -> ManagerState {
        *self.state.lock()
    }

    pub fn len(&self) -> usize {
        self.contexts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.read().is_empty()
    }

    pub fn context_names(&self) -> Vec<&'static str> {
        self.contexts
            .read()
            .iter()
            .map(|context| context.context_name())
            .collect()
    }

    fn transition(&self, from: ManagerState, to: ManagerState) -> ContextResult<()> {
        let mut state = self.state.lock();
        if *state != from {
            return Err(ContextError::InvalidState {
                expected: from.as_str(),
                found: state.as_str(),
            });
        }
        *state = to;
        Ok(())
    }

    fn tear_down(&self) {
        if let Some(token) = self.token.lock().take() {
            ambient::reset(token);
        }
        *self.state.lock() = ManagerState::TornDown;
    }
}

impl Default for RequestContextManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RequestContextManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContextManager")
            .field("state", &self.state())
            .field("contexts", &self.context_names())
            .finish()
    }
}

/// Runs a user callback, turning a panic into an error.
fn guarded<T>(f: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(anyhow::anyhow!(
            "panicked: {}",
            RequestFailure::from_panic(payload.as_ref()).message()
        )),
    }
}

/// How to build one request context type for each request.
#[derive(Clone, Copy)]
pub struct ContextDescriptor {
    key: TypeKey,
    order: i32,
    create: fn(&ObjectPool) -> PoolResult<Arc<dyn RequestContext>>,
    verify: fn(&ObjectPool) -> PoolResult<()>,
}

impl ContextDescriptor {
    pub fn of<C: RequestContext + Injectable>() -> Self {
        fn create<C: RequestContext + Injectable>(
            pool: &ObjectPool,
        ) -> PoolResult<Arc<dyn RequestContext>> {
            let context: Arc<dyn RequestContext> = Arc::new(pool.instantiate::<C>()?);
            Ok(context)
        }

        Self {
            key: TypeKey::of::<C>(),
            order: C::order(),
            create: create::<C>,
            verify: ObjectPool::verify::<C>,
        }
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn order(&self) -> i32 {
        self.order
    }

    /// Builds a new, uncached instance through `pool`.
    pub fn create(&self, pool: &ObjectPool) -> PoolResult<Arc<dyn RequestContext>> {
        (self.create)(pool)
    }

    /// Checks that the context's dependencies can be resolved from `pool`.
    pub fn verify(&self, pool: &ObjectPool) -> PoolResult<()> {
        (self.verify)(pool)
    }
}

impl fmt::Debug for ContextDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextDescriptor")
            .field("key", &self.key)
            .field("order", &self.order)
            .finish()
    }
}

/// Context types of an application, sorted once by descending order.
#[derive(Debug, Clone, Default)]
pub struct ContextRegistry {
    descriptors: Vec<ContextDescriptor>,
}

impl ContextRegistry {
    /// Deduplicates by type (first wins) and sorts; ties keep the given
    /// order.
    pub fn new(descriptors: impl IntoIterator<Item = ContextDescriptor>) -> Self {
        let mut seen = HashSet::new();
        let mut descriptors: Vec<ContextDescriptor> = descriptors
            .into_iter()
            .filter(|d| seen.insert(d.key()))
            .collect();
        descriptors.sort_by(|a, b| b.order().cmp(&a.order()));

        Self { descriptors }
    }

    pub fn descriptors(&self) -> &[ContextDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn verify(&self, pool: &ObjectPool) -> PoolResult<()> {
        self.descriptors.iter().try_for_each(|d| d.verify(pool))
    }

    /// A fresh, inactive manager holding new instances of every context.
    pub fn new_manager(&self, pool: &ObjectPool) -> ContextResult<Arc<RequestContextManager>> {
        let contexts = self
            .descriptors
            .iter()
            .map(|d| d.create(pool))
            .collect::<PoolResult<Vec<_>>>()?;
        Ok(Arc::new(RequestContextManager::with_contexts(contexts)))
    }
}

/// Compile-time registration collected with `inventory`.
pub struct ContextRegistration {
    pub descriptor: fn() -> ContextDescriptor,
    pub module_path: &'static str,
}

inventory::collect!(ContextRegistration);

/// Registers a request context type for discovery.
///
/// ```ignore
/// kiln_core::request_context!(TransactionContext);
/// ```
#[macro_export]
macro_rules! request_context {
    ($ty:ty) => {
        $crate::inventory::submit! {
            $crate::context::ContextRegistration {
                descriptor: $crate::context::ContextDescriptor::of::<$ty>,
                module_path: ::core::module_path!(),
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core_macros::Injectable;

    #[derive(Default)]
    struct EventLog(Mutex<Vec<String>>);

    impl Component for EventLog {}

    impl EventLog {
        fn push(&self, event: impl Into<String>) {
            self.0.lock().push(event.into());
        }

        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.0.lock())
        }
    }

    #[derive(Default)]
    struct Recorder {
        name: &'static str,
        log: Arc<EventLog>,
        fail_enter: bool,
        fail_exit: bool,
        suppress: bool,
    }

    impl Recorder {
        fn named(name: &'static str, log: &Arc<EventLog>) -> Self {
            Self {
                name,
                log: Arc::clone(log),
                ..Default::default()
            }
        }
    }

    impl Component for Recorder {}

    impl RequestContext for Recorder {
        fn enter(&self) -> anyhow::Result<()> {
            self.log.push(format!("enter:{}", self.name));
            if self.fail_enter {
                anyhow::bail!("{} is unavailable", self.name);
            }
            Ok(())
        }

        fn exit(&self, failure: Option<&RequestFailure>) -> anyhow::Result<bool> {
            let seen = failure.map(|f| f.kind().to_string()).unwrap_or("-".into());
            self.log.push(format!("exit:{}:{}", self.name, seen));
            if self.fail_exit {
                anyhow::bail!("{} could not release", self.name);
            }
            Ok(self.suppress)
        }

        fn context_name(&self) -> &'static str {
            self.name
        }
    }

    fn manager_of(contexts: Vec<Recorder>) -> Arc<RequestContextManager> {
        Arc::new(RequestContextManager::with_contexts(
            contexts
                .into_iter()
                .map(|c| Arc::new(c) as Arc<dyn RequestContext>),
        ))
    }

    #[test]
    fn test_enter_in_order_exit_in_reverse() {
        let log = Arc::new(EventLog::default());
        let manager = manager_of(vec![
            Recorder::named("a", &log),
            Recorder::named("b", &log),
            Recorder::named("c", &log),
        ]);

        ambient::isolated(|| {
            manager.enter().unwrap();
            assert_eq!(manager.state(), ManagerState::Active);
            assert!(Arc::ptr_eq(&ambient::current().unwrap(), &manager));

            assert!(!manager.exit(None).unwrap());
            assert!(ambient::current().is_none());
        });

        assert_eq!(
            log.take(),
            vec!["enter:a", "enter:b", "enter:c", "exit:c:-", "exit:b:-", "exit:a:-"]
        );
        assert_eq!(manager.state(), ManagerState::TornDown);
    }

    #[test]
    fn test_failure_reaches_every_context_and_can_be_suppressed() {
        let log = Arc::new(EventLog::default());
        let manager = manager_of(vec![
            Recorder::named("outer", &log),
            Recorder {
                suppress: true,
                ..Recorder::named("inner", &log)
            },
        ]);

        manager.enter().unwrap();
        let failure = RequestFailure::new("ValueError", "bad input");
        assert!(manager.exit(Some(&failure)).unwrap());

        assert_eq!(
            log.take(),
            vec![
                "enter:outer",
                "enter:inner",
                "exit:inner:ValueError",
                "exit:outer:ValueError"
            ]
        );
    }

    #[test]
    fn test_nothing_to_suppress_without_failure() {
        let log = Arc::new(EventLog::default());
        let manager = manager_of(vec![Recorder {
            suppress: true,
            ..Recorder::named("only", &log)
        }]);

        manager.enter().unwrap();
        assert!(!manager.exit(None).unwrap());
    }

    #[test]
    fn test_enter_failure_rolls_back_entered_contexts() {
        let log = Arc::new(EventLog::default());
        let manager = manager_of(vec![
            Recorder::named("first", &log),
            Recorder {
                fail_enter: true,
                ..Recorder::named("second", &log)
            },
            Recorder::named("third", &log),
        ]);

        ambient::isolated(|| {
            match manager.enter() {
                Err(ContextError::Enter { context, source }) => {
                    assert_eq!(context, "second");
                    assert!(source.to_string().contains("unavailable"));
                }
                other => panic!("Expected Enter error, got {other:?}"),
            }
            assert!(ambient::current().is_none());
        });

        assert_eq!(log.take(), vec!["enter:first", "enter:second", "exit:first:enter"]);
        assert_eq!(manager.state(), ManagerState::TornDown);
        assert!(matches!(
            manager.exit(None),
            Err(ContextError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_exit_is_best_effort() {
        let log = Arc::new(EventLog::default());
        let manager = manager_of(vec![
            Recorder::named("a", &log),
            Recorder {
                fail_exit: true,
                ..Recorder::named("b", &log)
            },
            Recorder {
                fail_exit: true,
                ..Recorder::named("c", &log)
            },
        ]);

        ambient::isolated(|| {
            manager.enter().unwrap();
            match manager.exit(None) {
                Err(ContextError::Exit { context, .. }) => assert_eq!(context, "c"),
                other => panic!("Expected Exit error, got {other:?}"),
            }
            assert!(ambient::current().is_none());
        });

        let events = log.take();
        assert_eq!(&events[3..], &["exit:c:-", "exit:b:-", "exit:a:-"]);
        assert_eq!(manager.state(), ManagerState::TornDown);
    }

    struct Exploding;

    impl Component for Exploding {}

    impl RequestContext for Exploding {
        fn exit(&self, _failure: Option<&RequestFailure>) -> anyhow::Result<bool> {
            panic!("boom");
        }
    }

    #[test]
    fn test_panicking_exit_is_reported_as_error() {
        let log = Arc::new(EventLog::default());
        let manager = Arc::new(RequestContextManager::new());
        manager
            .add_context(Arc::new(Recorder::named("a", &log)))
            .unwrap();
        manager.add_context(Arc::new(Exploding)).unwrap();

        manager.enter().unwrap();
        let err = manager.exit(None).unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert_eq!(log.take(), vec!["enter:a", "exit:a:-"]);
    }

    #[test]
    fn test_lifecycle_state_checks() {
        let manager = Arc::new(RequestContextManager::new());
        assert!(matches!(
            manager.exit(None),
            Err(ContextError::InvalidState { expected: "active", found: "inactive" })
        ));

        manager.enter().unwrap();
        assert!(matches!(
            manager.add_context(Arc::new(Exploding)),
            Err(ContextError::InvalidState { .. })
        ));
        assert!(matches!(manager.enter(), Err(ContextError::InvalidState { .. })));
        assert!(manager.exit(None).is_ok());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_find_context_matches_exact_type() {
        let log = Arc::new(EventLog::default());
        let manager = manager_of(vec![Recorder::named("a", &log), Recorder::named("b", &log)]);

        let found = manager.find_context::<Recorder>().unwrap();
        assert_eq!(found.name, "a");
        assert!(manager.find_context::<Exploding>().is_none());
    }

    macro_rules! ordered_context {
        ($name:ident, $order:expr) => {
            #[derive(Injectable)]
            struct $name {
                #[inject(provided)]
                log: Arc<EventLog>,
            }

            impl RequestContext for $name {
                fn order() -> i32 {
                    $order
                }

                fn enter(&self) -> anyhow::Result<()> {
                    self.log.push(concat!("enter:", stringify!($name)));
                    Ok(())
                }

                fn exit(&self, _failure: Option<&RequestFailure>) -> anyhow::Result<bool> {
                    self.log.push(concat!("exit:", stringify!($name)));
                    Ok(false)
                }
            }
        };
    }

    ordered_context!(X, 10);
    ordered_context!(Y, 5);
    ordered_context!(Z, 5);

    #[test]
    fn test_registry_sorts_by_descending_order() {
        let registry = ContextRegistry::new([
            ContextDescriptor::of::<Y>(),
            ContextDescriptor::of::<Z>(),
            ContextDescriptor::of::<X>(),
            ContextDescriptor::of::<Y>(),
        ]);

        let keys: Vec<TypeKey> = registry.descriptors().iter().map(|d| d.key()).collect();
        assert_eq!(
            keys,
            vec![TypeKey::of::<X>(), TypeKey::of::<Y>(), TypeKey::of::<Z>()]
        );
    }

    #[test]
    fn test_registry_builds_fresh_contexts_per_request() {
        let pool = ObjectPool::new();
        let log = Arc::new(EventLog::default());
        pool.put_arc(Arc::clone(&log));

        let registry = ContextRegistry::new([
            ContextDescriptor::of::<Y>(),
            ContextDescriptor::of::<Z>(),
            ContextDescriptor::of::<X>(),
        ]);
        registry.verify(&pool).unwrap();

        let first = registry.new_manager(&pool).unwrap();
        let second = registry.new_manager(&pool).unwrap();
        assert!(!Arc::ptr_eq(
            &first.find_context::<X>().unwrap(),
            &second.find_context::<X>().unwrap()
        ));
        assert!(!pool.contains::<X>());

        first.enter().unwrap();
        first.exit(None).unwrap();
        assert_eq!(
            log.take(),
            vec!["enter:X", "enter:Y", "enter:Z", "exit:Z", "exit:Y", "exit:X"]
        );
    }

    #[test]
    fn test_registry_reports_missing_provided_dependency() {
        let pool = ObjectPool::new();
        let registry = ContextRegistry::new([ContextDescriptor::of::<X>()]);

        assert!(registry.verify(&pool).is_err());
        assert!(matches!(
            registry.new_manager(&pool),
            Err(ContextError::Pool(crate::PoolError::NotProvided { .. }))
        ));
    }

    #[test]
    fn test_failure_from_panic_payload() {
        let payload: Box<dyn Any + Send> = Box::new("index out of bounds");
        let failure = RequestFailure::from_panic(payload.as_ref());
        assert_eq!(failure.kind(), "panic");
        assert_eq!(failure.message(), "index out of bounds");
        assert_eq!(failure.to_string(), "panic: index out of bounds");

        let err = anyhow::anyhow!("root").context("outer");
        assert_eq!(RequestFailure::from_error(err).message(), "outer: root");
    }

    #[derive(Debug, thiserror::Error)]
    #[error("account {0} is locked")]
    struct AccountLocked(u32);

    #[test]
    fn test_failure_keeps_error_for_contexts() {
        let err = anyhow::Error::new(AccountLocked(7)).context("loading profile");
        let failure = RequestFailure::from_error(err);

        assert_eq!(failure.kind(), "error");
        assert_eq!(failure.message(), "loading profile: account 7 is locked");
        assert!(failure.is::<AccountLocked>());
        assert_eq!(failure.downcast_ref::<AccountLocked>().map(|e| e.0), Some(7));
        assert!(!failure.is::<std::io::Error>());

        let relabeled = failure.clone().with_kind("locked").with_trace("at profile.rs:12");
        assert_eq!(relabeled.to_string(), "locked: loading profile: account 7 is locked");
        assert_eq!(relabeled.trace(), Some("at profile.rs:12"));
        assert!(relabeled.error().is_some());

        let plain = RequestFailure::new("error", "no source");
        assert!(plain.error().is_none());
        assert!(!plain.is::<AccountLocked>());
    }
}
