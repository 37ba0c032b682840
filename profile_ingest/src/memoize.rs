//! Single-slot caches keyed by argument identity.
//!
//! Derived structures (frame indices, merged timelines) are expensive to
//! rebuild and are usually requested again with the very same input. These
//! caches compare arguments with [`Rc::ptr_eq`], not `PartialEq`, so a hit
//! costs one pointer comparison no matter how large the input is.
//!
//! Each cache is an ordinary value owned by its caller. It holds exactly
//! one `(arguments, value)` slot, overwritten on every miss. The cached
//! `Rc`s are kept alive, so a freed allocation can never be reused by a
//! different argument and produce a false hit.

use std::rc::Rc;

struct Cache<A, V> {
    args: A,
    value: V,
}

/// Memoizes a unary function by the identity of its argument.
///
/// `None` stands for an absent argument and never counts as a hit, so
/// every call with `None` re-evaluates the function.
///
/// ```
/// use profile_ingest::memoize::MemoizeByReference;
/// use std::rc::Rc;
///
/// let mut total = MemoizeByReference::new(|v: Option<&Vec<u64>>| {
///     v.map(|v| v.iter().sum::<u64>()).unwrap_or(0)
/// });
///
/// let samples = Rc::new(vec![1, 2, 3]);
/// assert_eq!(*total.call(Some(&samples)), 6);
/// assert_eq!(*total.call(Some(&samples)), 6); // cached
/// ```
pub struct MemoizeByReference<A, V, F>
where
    F: Fn(Option<&A>) -> V,
{
    f: F,
    cache: Option<Cache<Option<Rc<A>>, V>>,
}

impl<A, V, F> MemoizeByReference<A, V, F>
where
    F: Fn(Option<&A>) -> V,
{
    pub fn new(f: F) -> Self {
        Self { f, cache: None }
    }

    pub fn call(&mut self, arg: Option<&Rc<A>>) -> &V {
        let hit = match (&self.cache, arg) {
            (Some(cache), Some(arg)) => cache.args.as_ref().is_some_and(|c| Rc::ptr_eq(c, arg)),
            _ => false,
        };

        let cache = match self.cache.take() {
            Some(cache) if hit => cache,
            _ => Cache {
                args: arg.cloned(),
                value: (self.f)(arg.map(|a| &**a)),
            },
        };
        &self.cache.insert(cache).value
    }

    /// True until the first call.
    pub fn is_empty(&self) -> bool {
        self.cache.is_none()
    }

    /// Drop the cached slot and the argument it keeps alive.
    pub fn clear(&mut self) {
        self.cache = None;
    }
}

/// Memoizes a function of a slice of arguments by positional identity.
///
/// A call hits only when it has the same, non-zero number of arguments as
/// the cached call and every argument is the same allocation.
pub struct MemoizeVariadicByReference<A, V, F>
where
    F: Fn(&[Rc<A>]) -> V,
{
    f: F,
    cache: Option<Cache<Vec<Rc<A>>, V>>,
}

impl<A, V, F> MemoizeVariadicByReference<A, V, F>
where
    F: Fn(&[Rc<A>]) -> V,
{
    pub fn new(f: F) -> Self {
        Self { f, cache: None }
    }

    pub fn call(&mut self, args: &[Rc<A>]) -> &V {
        let hit = self.cache.as_ref().is_some_and(|cache| {
            cache.args.len() == args.len()
                && !args.is_empty()
                && cache.args.iter().zip(args).all(|(c, a)| Rc::ptr_eq(c, a))
        });

        let cache = match self.cache.take() {
            Some(cache) if hit => cache,
            _ => Cache {
                args: args.to_vec(),
                value: (self.f)(args),
            },
        };
        &self.cache.insert(cache).value
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_none()
    }

    pub fn clear(&mut self) {
        self.cache = None;
    }
}
