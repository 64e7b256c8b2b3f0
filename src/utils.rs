use std::time::Duration;
use tokio::runtime::Handle;
use tokio::signal;
use tokio::task::JoinHandle;

/// run `f` after `delay` on the current runtime
///
/// Returns `None` outside a runtime (e.g. an observation dropped while the
/// runtime shuts down), in which case nothing is scheduled.
pub fn spawn_timer<F>(delay: Duration, f: F) -> Option<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let handle = Handle::try_current().ok()?;
    Some(handle.spawn(async move {
        tokio::time::sleep(delay).await;
        f();
    }))
}

/// `filename` parameter of a Content-Disposition header value
pub fn content_disposition_filename(value: &str) -> Option<String> {
    value.split(';').skip(1).find_map(|param| {
        let (key, val) = param.trim().split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("filename") {
            return None;
        }
        let val = val.trim().trim_matches('"');
        if val.is_empty() {
            None
        } else {
            Some(val.to_string())
        }
    })
}

/// resolves on ctrl-c or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining connections");
}
