use hyper::Request;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use super::AdminApi;

/// Serves the status API over plain HTTP/1
pub struct AdminServer {
    api: Arc<AdminApi>,
    address: SocketAddr,
}

impl AdminServer {
    pub fn new(api: AdminApi, address: SocketAddr) -> Self {
        Self {
            api: Arc::new(api),
            address,
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Accept connections until `shutdown` resolves
    pub async fn run_until<S>(self, shutdown: S) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        S: Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.address).await?;
        info!("Status API listening on http://{}", listener.local_addr()?);
        tokio::pin!(shutdown);

        loop {
            let (stream, remote_addr) = tokio::select! {
                accepted = listener.accept() => accepted?,
                _ = &mut shutdown => {
                    info!("Status API shutting down");
                    return Ok(());
                }
            };
            let io = TokioIo::new(stream);
            let api = Arc::clone(&self.api);

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let api = Arc::clone(&api);
                    async move {
                        debug!("Status request: {} {}", req.method(), req.uri().path());
                        Ok::<_, hyper::Error>(api.handle(req).await)
                    }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Status connection error from {}: {}", remote_addr, e);
                }
            });
        }
    }
}
