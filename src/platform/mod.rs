#[cfg(test)]
pub(crate) mod manual;

use futures::future::LocalBoxFuture;
use wasm_bindgen::JsCast;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub u64);

/// The event loop the sync layer runs on: one-shot timers and local tasks.
pub trait Runtime {
    fn set_timeout(&self, delay_ms: u32, callback: Box<dyn FnOnce()>) -> TimerId;

    /// Clearing an id that already fired (or never existed) is a no-op.
    fn clear_timeout(&self, id: TimerId);

    fn spawn(&self, task: LocalBoxFuture<'static, ()>);
}

/// Resolves after `delay_ms` on `runtime`'s clock. Resolves at once if the
/// runtime drops the timer.
pub(crate) async fn sleep(runtime: &dyn Runtime, delay_ms: u32) {
    let (tx, rx) = futures::channel::oneshot::channel::<()>();
    runtime.set_timeout(
        delay_ms,
        Box::new(move || {
            let _ = tx.send(());
        }),
    );
    let _ = rx.await;
}

/// Blocking user interaction: confirmation before deletes, error notices.
pub trait Prompter {
    fn confirm(&self, message: &str) -> bool;
    fn alert(&self, message: &str);
}

/// `window.setTimeout` plus the Leptos local executor.
#[derive(Clone, Copy, Debug, Default)]
pub struct BrowserRuntime;

impl Runtime for BrowserRuntime {
    fn set_timeout(&self, delay_ms: u32, callback: Box<dyn FnOnce()>) -> TimerId {
        let Some(win) = web_sys::window() else {
            tracing::warn!("no window; timer dropped");
            return TimerId(0);
        };

        let cb = wasm_bindgen::closure::Closure::once_into_js(move || callback());
        let tid = win
            .set_timeout_with_callback_and_timeout_and_arguments_0(
                cb.as_ref().unchecked_ref(),
                i32::try_from(delay_ms).unwrap_or(i32::MAX),
            )
            .unwrap_or(0);
        TimerId(tid as u64)
    }

    fn clear_timeout(&self, id: TimerId) {
        if let Some(win) = web_sys::window() {
            win.clear_timeout_with_handle(id.0 as i32);
        }
    }

    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        leptos::task::spawn_local(task);
    }
}

/// `window.confirm` / `window.alert`.
#[derive(Clone, Copy, Debug, Default)]
pub struct BrowserPrompter;

impl Prompter for BrowserPrompter {
    fn confirm(&self, message: &str) -> bool {
        web_sys::window()
            .and_then(|w| w.confirm_with_message(message).ok())
            .unwrap_or(false)
    }

    fn alert(&self, message: &str) {
        if let Some(w) = web_sys::window() {
            let _ = w.alert_with_message(message);
        }
    }
}
