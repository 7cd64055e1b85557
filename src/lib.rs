mod capture;
mod commands;
mod config;
mod console;
mod core;
mod error;
mod history;
mod services;

#[cfg(test)]
mod test_support;

pub fn run() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("PANIC in pi-capture: {info}");
        default_hook(info);
    }));

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pi_capture=info,pi_capture_lib=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");

    let result = runtime.block_on(services::ControlService::start());
    // The stdin reader may still be parked in a blocking read.
    runtime.shutdown_timeout(std::time::Duration::from_secs(1));
    if let Err(e) = result {
        tracing::error!("pi-capture failed: {e:#}");
        std::process::exit(1);
    }
}
