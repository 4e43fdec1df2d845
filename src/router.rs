//! Named command table with an all-or-nothing busy redirect.
//!
//! While locked, every registered name resolves to the one shared busy
//! handler; unlocked, every name resolves to its own handler. The lock is a
//! single flag, so a half-locked table cannot be represented.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::rc::Rc;

use crate::error::{SessionError, SessionResult};

/// Arguments a front end can attach to a command invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandArgs {
    pub path: Option<PathBuf>,
    pub index: Option<usize>,
    pub label: Option<u32>,
}

impl CommandArgs {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: Some(path.into()), ..Self::default() }
    }

    pub fn with_index(index: usize) -> Self {
        Self { index: Some(index), ..Self::default() }
    }

    pub fn with_label(label: u32) -> Self {
        Self { label: Some(label), ..Self::default() }
    }
}

/// A command handler. Receives the context, the name it was invoked under,
/// and the arguments.
pub type Handler<C> = Rc<dyn Fn(&mut C, &str, &CommandArgs) -> SessionResult<()>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub locks: u64,
    pub unlocks: u64,
}

pub struct CommandRouter<C> {
    handlers: BTreeMap<String, Handler<C>>,
    busy: Handler<C>,
    locked: bool,
    stats: RouterStats,
}

impl<C> CommandRouter<C> {
    pub fn new(busy: Handler<C>) -> Self {
        Self {
            handlers: BTreeMap::new(),
            busy,
            locked: false,
            stats: RouterStats::default(),
        }
    }

    /// Bind `name` to `handler`, replacing any previous binding. A binding made
    /// while locked takes effect at the next unlock.
    pub fn register(&mut self, name: &str, handler: Handler<C>) {
        if self.handlers.insert(name.to_string(), handler).is_some() {
            log::debug!("Rebinding command '{}'", name);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn command_names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// The handler currently active for `name`.
    ///
    /// Returns an owned handle so the caller can release its borrow of the
    /// router before calling it.
    pub fn resolve(&self, name: &str) -> SessionResult<Handler<C>> {
        if !self.handlers.contains_key(name) {
            return Err(SessionError::UnknownCommand(name.to_string()));
        }
        if self.locked {
            Ok(self.busy.clone())
        } else {
            Ok(self.handlers[name].clone())
        }
    }

    /// Resolve and call `name` against a context that does not own this router.
    pub fn invoke(&self, ctx: &mut C, name: &str, args: &CommandArgs) -> SessionResult<()> {
        let handler = self.resolve(name)?;
        handler(ctx, name, args)
    }

    /// Redirect every command to the busy handler. Returns false when it was
    /// already locked.
    pub fn lock(&mut self) -> bool {
        if self.locked {
            return false;
        }
        self.locked = true;
        self.stats.locks += 1;
        log::debug!("Command routing locked ({} commands)", self.handlers.len());
        true
    }

    /// Restore the normal handlers. Returns false when it was not locked.
    pub fn unlock(&mut self) -> bool {
        if !self.locked {
            log::warn!("Unlock requested while command routing is not locked");
            return false;
        }
        self.locked = false;
        self.stats.unlocks += 1;
        log::debug!("Command routing restored");
        true
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn stats(&self) -> RouterStats {
        self.stats
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Calls {
        normal: Vec<String>,
        busy: Vec<String>,
    }

    fn router() -> CommandRouter<Calls> {
        let mut router = CommandRouter::new(Rc::new(|c: &mut Calls, name: &str, _: &CommandArgs| {
            c.busy.push(name.to_string());
            Ok(())
        }) as Handler<Calls>);
        for name in ["open_file", "classify"] {
            router.register(
                name,
                Rc::new(|c: &mut Calls, name: &str, _: &CommandArgs| {
                    c.normal.push(name.to_string());
                    Ok(())
                }),
            );
        }
        router
    }

    #[test]
    fn unknown_command() {
        let router = router();
        let mut calls = Calls::default();
        let err = router.invoke(&mut calls, "explode", &CommandArgs::none()).unwrap_err();
        assert!(matches!(err, SessionError::UnknownCommand(ref n) if n == "explode"));
    }

    #[test]
    fn lock_redirects_every_command() {
        let mut router = router();
        let mut calls = Calls::default();
        router.invoke(&mut calls, "open_file", &CommandArgs::none()).unwrap();

        assert!(router.lock());
        router.invoke(&mut calls, "open_file", &CommandArgs::none()).unwrap();
        router.invoke(&mut calls, "classify", &CommandArgs::none()).unwrap();
        assert_eq!(calls.normal, vec!["open_file"]);
        assert_eq!(calls.busy, vec!["open_file", "classify"]);

        assert!(router.unlock());
        router.invoke(&mut calls, "classify", &CommandArgs::none()).unwrap();
        assert_eq!(calls.normal, vec!["open_file", "classify"]);
    }

    #[test]
    fn lock_is_reentrant_safe() {
        let mut router = router();
        assert!(router.lock());
        assert!(!router.lock());
        assert!(router.unlock());
        assert!(!router.is_locked());
        assert!(!router.unlock());
        assert_eq!(router.stats(), RouterStats { locks: 1, unlocks: 1 });
    }

    #[test]
    fn unknown_command_stays_unknown_while_locked() {
        let mut router = router();
        router.lock();
        let mut calls = Calls::default();
        assert!(router.invoke(&mut calls, "nope", &CommandArgs::none()).is_err());
        assert!(calls.busy.is_empty());
    }

    #[test]
    fn register_while_locked_applies_after_unlock() {
        let mut router = router();
        router.lock();
        router.register(
            "train",
            Rc::new(|c: &mut Calls, _: &str, _: &CommandArgs| {
                c.normal.push("trained".to_string());
                Ok(())
            }),
        );
        let mut calls = Calls::default();
        router.invoke(&mut calls, "train", &CommandArgs::none()).unwrap();
        assert_eq!(calls.busy, vec!["train"]);
        router.unlock();
        router.invoke(&mut calls, "train", &CommandArgs::none()).unwrap();
        assert_eq!(calls.normal, vec!["trained"]);
    }
}
