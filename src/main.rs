use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use salones::campus::CampusManager;
use salones::config::Config;
use salones::{observability, tls, wire};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r,
            _ = sigterm.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

/// Accept until `shutdown` fires. Each connection holds one permit for its lifetime.
async fn serve(
    listener: TcpListener,
    config: &Config,
    campuses: Arc<CampusManager>,
    permits: Arc<Semaphore>,
    tls_acceptor: Option<pgwire::tokio::TlsAcceptor>,
    shutdown: impl std::future::Future<Output = std::io::Result<()>>,
) {
    tokio::pin!(shutdown);
    loop {
        let (socket, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    error!("accept error: {e}");
                    continue;
                }
            },
            signal = &mut shutdown => {
                if let Err(e) = signal {
                    error!("signal handler failed: {e}");
                }
                info!("shutdown requested, no longer accepting");
                return;
            }
        };

        let Ok(permit) = permits.clone().try_acquire_owned() else {
            warn!("connection limit reached, rejecting {peer}");
            metrics::counter!(observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
            continue;
        };

        info!("connection from {peer}");
        metrics::counter!(observability::CONNECTIONS_TOTAL).increment(1);
        metrics::gauge!(observability::CONNECTIONS_ACTIVE).increment(1.0);

        let campuses = campuses.clone();
        let password = config.password.clone();
        let admin_user = config.admin_user.clone();
        let tls_acceptor = tls_acceptor.clone();
        tokio::spawn(async move {
            let result =
                wire::process_connection(socket, campuses, password, admin_user, tls_acceptor).await;
            if let Err(e) = result {
                error!("connection error from {peer}: {e}");
            }
            metrics::gauge!(observability::CONNECTIONS_ACTIVE).decrement(1.0);
            drop(permit);
        });
    }
}

/// Poll until every permit is back or `timeout` elapses.
async fn drain(permits: &Semaphore, capacity: usize, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    while permits.available_permits() < capacity {
        if tokio::time::Instant::now() >= deadline {
            let open = capacity - permits.available_permits();
            warn!("drain timeout, {open} connections still open");
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    info!("all connections drained");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    observability::init(config.metrics_port)?;
    let tls_acceptor = tls::load_tls_acceptor(&config)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let campuses = Arc::new(CampusManager::new(
        config.data_dir.clone(),
        config.compact_threshold,
        config.lock_timeout,
    ));
    let permits = Arc::new(Semaphore::new(config.max_connections));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!(
        data_dir = %config.data_dir.display(),
        max_connections = config.max_connections,
        lock_timeout = ?config.lock_timeout,
        admin_user = %config.admin_user,
        tls = tls_acceptor.is_some(),
        "salones listening on {addr}"
    );

    serve(listener, &config, campuses, permits.clone(), tls_acceptor, shutdown_signal()).await;

    info!("draining connections");
    drain(&permits, config.max_connections, DRAIN_TIMEOUT).await;
    info!("salones stopped");
    Ok(())
}
