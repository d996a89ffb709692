use crate::context::Context;
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex};

/// Writer-preferring reader/writer lock around a [`Context`].
///
/// Built from a primitive `Mutex` + `Condvar` rather than a library `RwLock`:
/// a generic `RwLock` makes no promise about writer starvation, and this
/// lock needs one. A writer that starts waiting blocks every new reader
/// until it has run, even if readers are continuously arriving.
pub struct ContextLock {
    inner: UnsafeCell<Context>,
    state: Mutex<State>,
    reader_released: Condvar,
    writer_released: Condvar,
}

#[derive(Default)]
struct State {
    readers_active: u32,
    writer_active: bool,
    writers_waiting: u32,
}

// SAFETY: `state` (guarded by `Mutex`) is the sole arbiter of access to
// `inner`; a `ReadGuard` only exists while `readers_active > 0` and
// `!writer_active`, a `WriteGuard` only while `writer_active` and
// `readers_active == 0`.
unsafe impl Sync for ContextLock {}
unsafe impl Send for ContextLock {}

impl ContextLock {
    pub fn new(context: Context) -> Self {
        Self {
            inner: UnsafeCell::new(context),
            state: Mutex::new(State::default()),
            reader_released: Condvar::new(),
            writer_released: Condvar::new(),
        }
    }

    pub fn read(&self) -> ReadGuard<'_> {
        let mut state = self.state.lock().unwrap();
        while state.writer_active || state.writers_waiting > 0 {
            state = self.writer_released.wait(state).unwrap();
        }
        state.readers_active += 1;
        ReadGuard { lock: self }
    }

    pub fn write(&self) -> WriteGuard<'_> {
        let mut state = self.state.lock().unwrap();
        state.writers_waiting += 1;
        while state.writer_active || state.readers_active > 0 {
            state = self.reader_released.wait(state).unwrap();
        }
        state.writers_waiting -= 1;
        state.writer_active = true;
        WriteGuard { lock: self }
    }

    fn release_read(&self) {
        let mut state = self.state.lock().unwrap();
        state.readers_active -= 1;
        if state.readers_active == 0 {
            self.reader_released.notify_all();
        }
    }

    fn release_write(&self) {
        let mut state = self.state.lock().unwrap();
        state.writer_active = false;
        self.reader_released.notify_all();
        self.writer_released.notify_all();
    }

    /// Runs a query, escalating to a write guard and calling
    /// [`Context::make_clean`] if the context is dirty, then re-acquiring a
    /// read guard. Loops in case another writer dirtied the context again
    /// between the rebuild and the re-acquired read guard.
    ///
    /// `compile` is called (and optimized, §4.5 selectivity reorder) fresh
    /// against each freshly-acquired clean guard, never before a rebuild and
    /// never reused across one: a compiled [`QueryAst`](crate::query::QueryAst)
    /// is a snapshot of the condensation, and a rebuild triggered by this
    /// same call would otherwise silently invalidate it. `compile` is
    /// fallible so callers (e.g. the external facade, resolving tag ids)
    /// can surface a lookup failure without their own retry loop.
    pub fn do_query(
        &self,
        compile: impl Fn(&Context) -> crate::error::Result<crate::query::QueryAst>,
        mut visitor: impl FnMut(crate::entity::EntityId),
    ) -> crate::error::Result<()> {
        loop {
            let guard = self.read();
            if !guard.is_dirty() {
                let compiled = crate::query::compiler::optimize(compile(&guard)?);
                return guard.query(&compiled, &mut visitor);
            }
            drop(guard);
            self.write().make_clean();
        }
    }
}

pub struct ReadGuard<'a> {
    lock: &'a ContextLock,
}

impl Deref for ReadGuard<'_> {
    type Target = Context;
    fn deref(&self) -> &Context {
        // SAFETY: see `ContextLock`'s invariant.
        unsafe { &*self.lock.inner.get() }
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_read();
    }
}

pub struct WriteGuard<'a> {
    lock: &'a ContextLock,
}

impl Deref for WriteGuard<'_> {
    type Target = Context;
    fn deref(&self) -> &Context {
        // SAFETY: see `ContextLock`'s invariant.
        unsafe { &*self.lock.inner.get() }
    }
}

impl DerefMut for WriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut Context {
        // SAFETY: see `ContextLock`'s invariant.
        unsafe { &mut *self.lock.inner.get() }
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_write();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::QueryAst;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn concurrent_readers_see_consistent_snapshot() {
        let mut ctx = Context::new();
        let tag = ctx.new_tag(None).unwrap();
        let entity = ctx.new_entity(None).unwrap();
        ctx.add_tag(entity, tag).unwrap();
        let lock = Arc::new(ContextLock::new(ctx));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                let guard = lock.read();
                assert_eq!(guard.num_entities(), 1);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn query_rebuilds_dirty_context_before_matching() {
        let mut ctx = Context::new();
        let a = ctx.new_tag(None).unwrap();
        let b = ctx.new_tag(None).unwrap();
        let c = ctx.new_tag(None).unwrap();
        ctx.imply(a, b).unwrap();
        ctx.imply(b, c).unwrap();
        ctx.imply(c, a).unwrap();
        ctx.unimply(c, a).unwrap();
        assert!(ctx.is_dirty());

        let entity = ctx.new_entity(None).unwrap();
        ctx.add_tag(entity, a).unwrap();
        let lock = ContextLock::new(ctx);

        let mut seen = Vec::new();
        lock.do_query(|_ctx| Ok(QueryAst::Any), |id| seen.push(id)).unwrap();
        assert_eq!(seen, vec![entity]);
        assert!(!lock.read().is_dirty());
    }
}
