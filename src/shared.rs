//! Reference-counted ownership used for operations, threads, and sources
//! that must stay alive across an asynchronous completion.
//!
//! The original design hand-rolled an intrusive strong/weak control block
//! (`Shared<T>`/`Weak<T>`/`SharedFromThis<T>`). `std::sync::{Arc, Weak}`
//! already provides the same atomic refcount plus upgrade-or-fail semantics,
//! so this module is just naming: `Shared<T>` is `Arc<T>`, `WeakRef<T>` is
//! `Weak<T>`, and [`SharedFromThis`] is a small helper trait for types that
//! need to hand out a `WeakRef` to themselves (an `EventThread` sending
//! itself along with the operations it enqueues, for instance).

use std::sync::{Arc, Weak};

/// Strong reference. An alias, not a wrapper, so it interoperates with any
/// other code expecting an `Arc`.
pub type Shared<T> = Arc<T>;

/// Weak reference. Must be upgraded via [`Weak::upgrade`] before use; a
/// failed upgrade means the owner has been dropped, which the loop treats
/// the same way the original treats a dangling `Weak::lock()` -- the
/// operation is silently discarded.
pub type WeakRef<T> = Weak<T>;

/// Lets a type obtain a [`WeakRef`] to itself without keeping a reference
/// cycle alive. Implementors store a `WeakRef<Self>` set once, at
/// construction, by whoever first wraps them in a `Shared`.
pub trait SharedFromThis<T: ?Sized> {
    /// Returns a weak reference to this value's own `Shared` wrapper.
    fn weak_from_this(&self) -> WeakRef<T>;

    /// Upgrades [`Self::weak_from_this`], panicking if the value has
    /// already been dropped. Only safe to call from code that is itself
    /// running as a method on the live `Shared<T>` -- i.e. from `self`.
    fn shared_from_this(&self) -> Shared<T>
    where
        T: Sized,
    {
        self.weak_from_this()
            .upgrade()
            .expect("shared_from_this called after owner was dropped")
    }
}
