//! Development helper for structured logging in tests and examples.

/// Initialize a tracing subscriber from the environment.
///
/// The filter is taken from `FILAMENT_LOG`, falling back to `RUST_LOG`
/// (so `FILAMENT_LOG=filament_sp=trace` can raise this library's
/// verbosity without touching the host application's filter). This is a
/// no-op when neither variable is set or when a global subscriber is
/// already installed, so every test can call it unconditionally.
pub fn init_tracing() {
    use std::env;

    let filter = env::var("FILAMENT_LOG").or_else(|_| env::var("RUST_LOG"));
    if let Ok(filter) = filter {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
            .try_init();
    }
}
