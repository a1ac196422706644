//! Front-end event dispatch table.
//!
//! Routes are registered once, as (event kind, target predicate) → handler.
//! Handlers turn an event into an action value; performing the action is up
//! to the caller. A second call to [`DispatchTable::wire`] is a no-op, so
//! setup code can run more than once without doubling handlers.

type Predicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;
type Handler<T, A> = Box<dyn Fn(&T) -> A + Send + Sync>;

struct Route<K, T, A> {
    kind: K,
    predicate: Predicate<T>,
    handler: Handler<T, A>,
}

pub struct DispatchTable<K, T, A> {
    routes: Vec<Route<K, T, A>>,
    wired: bool,
}

/// Registration handle passed to the setup closure.
pub struct Registrar<'a, K, T, A> {
    routes: &'a mut Vec<Route<K, T, A>>,
}

impl<K, T, A> Registrar<'_, K, T, A> {
    pub fn on<P, H>(&mut self, kind: K, predicate: P, handler: H) -> &mut Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
        H: Fn(&T) -> A + Send + Sync + 'static,
    {
        self.routes.push(Route {
            kind,
            predicate: Box::new(predicate),
            handler: Box::new(handler),
        });
        self
    }
}

impl<K: PartialEq, T, A> DispatchTable<K, T, A> {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            wired: false,
        }
    }

    /// Run `setup` the first time only. Returns whether it ran.
    pub fn wire<F>(&mut self, setup: F) -> bool
    where
        F: FnOnce(&mut Registrar<'_, K, T, A>),
    {
        if self.wired {
            return false;
        }
        let mut registrar = Registrar {
            routes: &mut self.routes,
        };
        setup(&mut registrar);
        self.wired = true;
        true
    }

    pub fn is_wired(&self) -> bool {
        self.wired
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Actions of every route matching `kind` whose predicate accepts `target`,
    /// in registration order.
    pub fn dispatch(&self, kind: &K, target: &T) -> Vec<A> {
        self.routes
            .iter()
            .filter(|r| r.kind == *kind && (r.predicate)(target))
            .map(|r| (r.handler)(target))
            .collect()
    }
}

impl<K: PartialEq, T, A> Default for DispatchTable<K, T, A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Kind {
        Click,
        Submit,
    }

    fn setup(r: &mut Registrar<'_, Kind, String, String>) {
        r.on(Kind::Click, |t: &String| t.starts_with("td-"), |t| format!("open {}", t))
            .on(Kind::Click, |t: &String| t == "td-3", |_| "highlight".to_string())
            .on(Kind::Submit, |_| true, |t| format!("submit {}", t));
    }

    #[test]
    fn test_dispatch_matches_kind_and_predicate() {
        let mut table = DispatchTable::new();
        assert!(table.wire(setup));

        assert_eq!(
            table.dispatch(&Kind::Click, &"td-3".to_string()),
            vec!["open td-3".to_string(), "highlight".to_string()]
        );
        assert_eq!(table.dispatch(&Kind::Click, &"td-1".to_string()), vec!["open td-1".to_string()]);
        assert!(table.dispatch(&Kind::Click, &"newsletter".to_string()).is_empty());
        assert_eq!(table.dispatch(&Kind::Submit, &"login".to_string()).len(), 1);
    }

    #[test]
    fn test_wiring_twice_registers_nothing() {
        let mut table = DispatchTable::new();
        assert!(table.wire(setup));
        assert!(!table.wire(setup));
        assert_eq!(table.len(), 3);
        assert_eq!(table.dispatch(&Kind::Submit, &"x".to_string()).len(), 1);
    }
}
