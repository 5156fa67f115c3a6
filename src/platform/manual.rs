use super::{Prompter, Runtime, TimerId};
use futures::executor::{LocalPool, LocalSpawner};
use futures::future::LocalBoxFuture;
use futures::task::LocalSpawnExt;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;

struct Timer {
    id: TimerId,
    due_ms: u64,
    callback: Box<dyn FnOnce()>,
}

/// Deterministic runtime for tests: virtual clock, timers fired by `advance`.
pub(crate) struct ManualRuntime {
    now_ms: Cell<u64>,
    next_id: Cell<u64>,
    timers: RefCell<Vec<Timer>>,
    pool: RefCell<LocalPool>,
    spawner: LocalSpawner,
}

impl ManualRuntime {
    pub fn new() -> Rc<Self> {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Rc::new(Self {
            now_ms: Cell::new(0),
            next_id: Cell::new(0),
            timers: RefCell::new(Vec::new()),
            pool: RefCell::new(pool),
            spawner,
        })
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().len()
    }

    pub fn run_until_stalled(&self) {
        self.pool.borrow_mut().run_until_stalled();
    }

    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.pool.borrow_mut().run_until(fut)
    }

    /// Moves the clock forward, firing due timers in order and letting
    /// spawned tasks settle after each one.
    pub fn advance(&self, ms: u64) {
        let target = self.now_ms.get() + ms;
        self.run_until_stalled();
        loop {
            let next = {
                let mut timers = self.timers.borrow_mut();
                let idx = timers
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.due_ms <= target)
                    .min_by_key(|(_, t)| (t.due_ms, t.id))
                    .map(|(i, _)| i);
                idx.map(|i| timers.remove(i))
            };
            let Some(timer) = next else {
                break;
            };
            self.now_ms.set(timer.due_ms.max(self.now_ms.get()));
            (timer.callback)();
            self.run_until_stalled();
        }
        self.now_ms.set(target);
    }
}

impl Runtime for ManualRuntime {
    fn set_timeout(&self, delay_ms: u32, callback: Box<dyn FnOnce()>) -> TimerId {
        let id = TimerId(self.next_id.get() + 1);
        self.next_id.set(id.0);
        self.timers.borrow_mut().push(Timer {
            id,
            due_ms: self.now_ms.get() + u64::from(delay_ms),
            callback,
        });
        id
    }

    fn clear_timeout(&self, id: TimerId) {
        self.timers.borrow_mut().retain(|t| t.id != id);
    }

    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        self.spawner
            .spawn_local(task)
            .expect("test executor should accept tasks");
    }
}

/// Answers every confirmation with `answer` and records alerts.
pub(crate) struct ScriptedPrompter {
    pub answer: Cell<bool>,
    pub alerts: RefCell<Vec<String>>,
    pub confirms: Cell<usize>,
}

impl ScriptedPrompter {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            answer: Cell::new(true),
            alerts: RefCell::new(Vec::new()),
            confirms: Cell::new(0),
        })
    }
}

impl Prompter for ScriptedPrompter {
    fn confirm(&self, _message: &str) -> bool {
        self.confirms.set(self.confirms.get() + 1);
        self.answer.get()
    }

    fn alert(&self, message: &str) {
        self.alerts.borrow_mut().push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timers_fire_in_due_order_and_clear_works() {
        let rt = ManualRuntime::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let l = log.clone();
        rt.set_timeout(300, Box::new(move || l.borrow_mut().push("late")));
        let l = log.clone();
        rt.set_timeout(100, Box::new(move || l.borrow_mut().push("early")));
        let l = log.clone();
        let cleared = rt.set_timeout(200, Box::new(move || l.borrow_mut().push("cleared")));
        rt.clear_timeout(cleared);

        rt.advance(250);
        assert_eq!(*log.borrow(), vec!["early"]);
        rt.advance(100);
        assert_eq!(*log.borrow(), vec!["early", "late"]);
        assert_eq!(rt.pending_timers(), 0);
    }

    #[test]
    fn test_timer_scheduled_by_timer_fires_within_same_advance() {
        let rt = ManualRuntime::new();
        let hits = Rc::new(Cell::new(0));
        let rt2 = rt.clone();
        let h = hits.clone();
        rt.set_timeout(
            10,
            Box::new(move || {
                h.set(h.get() + 1);
                let h2 = h.clone();
                rt2.set_timeout(10, Box::new(move || h2.set(h2.get() + 1)));
            }),
        );
        rt.advance(20);
        assert_eq!(hits.get(), 2);
    }
}
