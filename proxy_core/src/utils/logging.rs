use log::{error, LevelFilter};
use std::sync::Once;

static PANIC_LOGGER: Once = Once::new();

/// Initialize logging using env_logger.
/// The default filter is `info`; `RUST_LOG` overrides it,
/// e.g. `RUST_LOG=proxy_core=debug proxy-rs init`.
pub fn init_logging() {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();
}

/// Route panics from every thread (pool workers included) through the logger
/// before the previous hook runs. Only the first call installs anything.
pub fn install_panic_logger() {
    PANIC_LOGGER.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let thread = std::thread::current();
            error!(
                "thread '{}' panicked: {}",
                thread.name().unwrap_or("<unnamed>"),
                info
            );
            previous(info);
        }));
    });
}
