//! Use cases - the write side.
//!
//! A use case performs one application operation: it receives arguments,
//! dispatches payloads through its [`UseCaseContext`] and returns either a
//! settled result or a pending future ([`UseCaseOutcome`]). The runtime wraps
//! every run in lifecycle payloads (will-execute, did-execute, completed and
//! error) so stores and observers can follow it.
//!
//! # Example
//!
//! ```
//! use oneway_core::payload::DomainPayload;
//! use oneway_runtime::use_case::{UseCase, UseCaseContext, UseCaseOutcome};
//!
//! #[derive(Debug, Clone)]
//! enum CounterPayload {
//!     Increment,
//! }
//!
//! impl DomainPayload for CounterPayload {
//!     fn payload_type(&self) -> &str {
//!         "inc"
//!     }
//! }
//!
//! struct Increment;
//!
//! impl UseCase<CounterPayload> for Increment {
//!     type Args = ();
//!
//!     fn execute<'a>(&'a self, ctx: UseCaseContext<CounterPayload>, (): ()) -> UseCaseOutcome<'a> {
//!         ctx.dispatch(CounterPayload::Increment);
//!         UseCaseOutcome::done()
//!     }
//! }
//!
//! assert_eq!(Increment.name(), "Increment");
//! ```

use crate::executor::{ExecutionLink, UseCaseExecutor};
use futures::future::LocalBoxFuture;
use oneway_core::error::UseCaseError;
use oneway_core::meta::{PayloadMeta, UseCaseDescriptor, UseCaseId};
use oneway_core::payload::{AnyValue, DomainPayload, Payload};
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::rc::Rc;

/// Name used when a use case has neither a display name nor a type name
pub const ANONYMOUS_USE_CASE_NAME: &str = "AnonymousUseCase";

/// What a use case run resolves to
pub type UseCaseResult = Result<Option<AnyValue>, UseCaseError>;

/// The value returned by [`UseCase::execute`].
///
/// `Sync` means the run finished before `execute` returned; `Pending` means
/// work continues after it. A pending future that is ready on its first poll
/// counts as finished too.
pub enum UseCaseOutcome<'a> {
    /// The run already settled
    Sync(UseCaseResult),
    /// The run settles when the future does
    Pending(LocalBoxFuture<'a, UseCaseResult>),
}

impl<'a> UseCaseOutcome<'a> {
    /// Finished with no value
    #[must_use]
    pub const fn done() -> Self {
        Self::Sync(Ok(None))
    }

    /// Finished with a value
    #[must_use]
    pub fn value<T: fmt::Debug + 'static>(value: T) -> Self {
        Self::Sync(Ok(Some(AnyValue::new(value))))
    }

    /// Failed synchronously
    #[must_use]
    pub fn fail(error: impl Into<UseCaseError>) -> Self {
        Self::Sync(Err(error.into()))
    }

    /// Continue asynchronously
    #[must_use]
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = UseCaseResult> + 'a,
    {
        Self::Pending(Box::pin(future))
    }

    /// Whether the run already settled
    #[must_use]
    pub const fn is_sync(&self) -> bool {
        matches!(self, Self::Sync(_))
    }
}

impl fmt::Debug for UseCaseOutcome<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(result) => f.debug_tuple("Sync").field(result).finish(),
            Self::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// A unit of application work
pub trait UseCase<P: DomainPayload>: 'static {
    /// Arguments passed to [`execute`](Self::execute)
    type Args: fmt::Debug + Clone + 'static;

    /// Display name used in payload meta and logs.
    ///
    /// Defaults to the type name without its module path.
    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed(short_type_name::<Self>())
    }

    /// Whether the run should happen at all.
    ///
    /// Returning `Ok(false)` dispatches a will-not-execute payload and ends the
    /// run. Returning `Err` is an invalid use; the error is returned to the
    /// caller and nothing is dispatched.
    ///
    /// # Errors
    ///
    /// Implementations return an error when the decision cannot be made.
    fn should_execute(&self, _args: &Self::Args) -> Result<bool, UseCaseError> {
        Ok(true)
    }

    /// Perform the work
    fn execute<'a>(&'a self, ctx: UseCaseContext<P>, args: Self::Args) -> UseCaseOutcome<'a>;
}

/// `Foo` for `my_crate::module::Foo<Bar>`
fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    match base.rsplit("::").next() {
        Some(name) if !name.is_empty() => name,
        _ => ANONYMOUS_USE_CASE_NAME,
    }
}

/// A use case together with its identity.
///
/// Every run of the same instance carries the same [`UseCaseId`] in payload
/// meta. Executing an instance again while an earlier run is still in
/// flight is reported as a warning.
pub struct UseCaseInstance<U> {
    id: UseCaseId,
    use_case: Rc<U>,
}

impl<U> UseCaseInstance<U> {
    /// Give `use_case` a fresh identity
    #[must_use]
    pub fn new(use_case: U) -> Self {
        Self {
            id: UseCaseId::next(),
            use_case: Rc::new(use_case),
        }
    }

    /// Instance identity
    #[must_use]
    pub const fn id(&self) -> UseCaseId {
        self.id
    }

    /// The wrapped use case
    #[must_use]
    pub fn get(&self) -> &U {
        &self.use_case
    }
}

impl<U> Clone for UseCaseInstance<U> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            use_case: Rc::clone(&self.use_case),
        }
    }
}

impl<U> From<U> for UseCaseInstance<U> {
    fn from(use_case: U) -> Self {
        Self::new(use_case)
    }
}

impl<U> fmt::Debug for UseCaseInstance<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UseCaseInstance")
            .field("id", &self.id)
            .field("type", &short_type_name::<U>())
            .finish()
    }
}

/// Adapts a closure into a [`UseCase`].
///
/// # Example
///
/// ```
/// use oneway_core::payload::DomainPayload;
/// use oneway_runtime::use_case::{FnUseCase, UseCase, UseCaseContext, UseCaseOutcome};
///
/// #[derive(Debug, Clone)]
/// struct Renamed(String);
///
/// impl DomainPayload for Renamed {
///     fn payload_type(&self) -> &str {
///         "renamed"
///     }
/// }
///
/// let rename = FnUseCase::named("Rename", |ctx: UseCaseContext<Renamed>, name: String| {
///     ctx.dispatch(Renamed(name));
///     UseCaseOutcome::done()
/// });
/// assert_eq!(UseCase::<Renamed>::name(&rename), "Rename");
/// ```
pub struct FnUseCase<A, F> {
    name: Cow<'static, str>,
    run: F,
    _args: PhantomData<fn(A)>,
}

impl<A, F> FnUseCase<A, F> {
    /// An anonymous closure use case
    #[must_use]
    pub const fn new(run: F) -> Self {
        Self {
            name: Cow::Borrowed(ANONYMOUS_USE_CASE_NAME),
            run,
            _args: PhantomData,
        }
    }

    /// A closure use case with a display name
    #[must_use]
    pub fn named(name: impl Into<Cow<'static, str>>, run: F) -> Self {
        Self {
            name: name.into(),
            run,
            _args: PhantomData,
        }
    }
}

impl<P, A, F> UseCase<P> for FnUseCase<A, F>
where
    P: DomainPayload,
    A: fmt::Debug + Clone + 'static,
    F: Fn(UseCaseContext<P>, A) -> UseCaseOutcome<'static> + 'static,
{
    type Args = A;

    fn name(&self) -> Cow<'static, str> {
        self.name.clone()
    }

    fn execute<'a>(&'a self, ctx: UseCaseContext<P>, args: A) -> UseCaseOutcome<'a> {
        (self.run)(ctx, args)
    }
}

/// The handle a running use case talks to the runtime through.
///
/// Cloning is cheap; a clone may be moved into the pending future.
pub struct UseCaseContext<P> {
    link: Rc<ExecutionLink<P>>,
}

impl<P: DomainPayload> UseCaseContext<P> {
    pub(crate) const fn new(link: Rc<ExecutionLink<P>>) -> Self {
        Self { link }
    }

    /// Dispatch a domain payload attributed to this use case
    pub fn dispatch(&self, payload: P) {
        let meta = self.link.meta(PayloadMeta::untrusted(self.link.now()));
        self.link.dispatch(Payload::User(payload), meta);
    }

    /// Dispatch an error payload attributed to this use case.
    ///
    /// Returning the same error from `execute` afterwards does not dispatch
    /// it a second time.
    pub fn throw_error(&self, error: impl Into<UseCaseError>) {
        self.link.throw_error(error.into());
    }

    /// Prepare a nested run. Its payloads flow through this use case.
    #[must_use]
    pub fn use_case<U: UseCase<P>>(&self, use_case: U) -> UseCaseExecutor<P, U> {
        self.use_case_shared(&UseCaseInstance::new(use_case))
    }

    /// Prepare a nested run of a shared instance
    #[must_use]
    pub fn use_case_shared<U: UseCase<P>>(
        &self,
        instance: &UseCaseInstance<U>,
    ) -> UseCaseExecutor<P, U> {
        UseCaseExecutor::child(instance.clone(), &self.link)
    }

    /// The running use case
    #[must_use]
    pub fn descriptor(&self) -> &UseCaseDescriptor {
        self.link.descriptor()
    }

    /// Whether the run was already released
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.link.is_released()
    }
}

impl<P> Clone for UseCaseContext<P> {
    fn clone(&self) -> Self {
        Self {
            link: Rc::clone(&self.link),
        }
    }
}

impl<P> fmt::Debug for UseCaseContext<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UseCaseContext")
            .field("use_case", self.link.descriptor())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Noop;

    impl DomainPayload for Noop {
        fn payload_type(&self) -> &str {
            "noop"
        }
    }

    struct Plain;

    impl UseCase<Noop> for Plain {
        type Args = ();

        fn execute<'a>(&'a self, _ctx: UseCaseContext<Noop>, (): ()) -> UseCaseOutcome<'a> {
            UseCaseOutcome::done()
        }
    }

    struct Generic<T>(PhantomData<T>);

    impl<T: 'static> UseCase<Noop> for Generic<T> {
        type Args = ();

        fn execute<'a>(&'a self, _ctx: UseCaseContext<Noop>, (): ()) -> UseCaseOutcome<'a> {
            UseCaseOutcome::done()
        }
    }

    #[test]
    fn default_name_is_the_type_name() {
        assert_eq!(Plain.name(), "Plain");
        assert_eq!(Generic::<Vec<String>>(PhantomData).name(), "Generic");
    }

    #[test]
    fn closures_are_anonymous_unless_named() {
        let anonymous = FnUseCase::new(|_ctx: UseCaseContext<Noop>, (): ()| UseCaseOutcome::done());
        assert_eq!(UseCase::<Noop>::name(&anonymous), ANONYMOUS_USE_CASE_NAME);

        let named = FnUseCase::named("Reset", |_ctx: UseCaseContext<Noop>, (): ()| {
            UseCaseOutcome::done()
        });
        assert_eq!(UseCase::<Noop>::name(&named), "Reset");
    }

    #[test]
    fn instance_clones_share_identity() {
        let instance = UseCaseInstance::new(Plain);
        let clone = instance.clone();
        assert_eq!(instance.id(), clone.id());
        assert_ne!(instance.id(), UseCaseInstance::from(Plain).id());
    }

    #[test]
    fn outcome_helpers() {
        assert!(UseCaseOutcome::done().is_sync());
        assert!(!UseCaseOutcome::pending(async { Ok(None) }).is_sync());
        assert!(matches!(
            UseCaseOutcome::fail(UseCaseError::domain("nope")),
            UseCaseOutcome::Sync(Err(_))
        ));
        assert_eq!(format!("{:?}", UseCaseOutcome::value(3)), "Sync(Ok(Some(3)))");
    }
}
