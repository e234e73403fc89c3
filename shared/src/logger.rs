use std::sync::Once;

static INIT: Once = Once::new();

/// Bootstraps the process-wide `log`/`env_logger` sink. This is the one piece of ambient,
/// process-global state the core is allowed: it carries no task state and every tracker still
/// logs through the plain `log::{debug,info,warn,error}!` macros directly (see Design Notes).
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = env_logger::try_init();
    });
}
