use std::panic::{self, PanicHookInfo};
use std::thread;

use metrics::counter;
use once_cell::sync::OnceCell;
use tracing::{error, info};

static HOOK: OnceCell<()> = OnceCell::new();

fn message<'a>(info: &'a PanicHookInfo<'_>) -> &'a str {
    let payload = info.payload();
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Log panics and count them in `tierforge_panics_total`, then chain to the
/// hook that was installed before. Installing twice is a no-op.
pub fn install_hook() {
    if HOOK.set(()).is_err() {
        return;
    }

    let chained = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let current = thread::current();
        let at = info.location().map(|l| format!("{l}"));
        error!(
            thread = current.name().unwrap_or("unnamed"),
            location = at.as_deref().unwrap_or("unknown"),
            payload = message(info),
            "panic"
        );
        counter!("tierforge_panics_total").increment(1);
        chained(info);
    }));

    info!("panic hook installed");
}
