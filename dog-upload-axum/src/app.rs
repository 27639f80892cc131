use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use chrono::Utc;
use dog_upload::UploadCoordinator;
use tokio::net::{TcpListener, ToSocketAddrs};
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::rest;

/// An axum application serving the upload routes
#[derive(Clone)]
pub struct UploadsApp {
    pub coordinator: Arc<UploadCoordinator>,
    routes: Router<()>,
    sweep_every: Option<Duration>,
}

impl UploadsApp {
    pub fn new(coordinator: Arc<UploadCoordinator>) -> Self {
        Self {
            coordinator,
            routes: Router::new(),
            sweep_every: None,
        }
    }

    /// Mount the upload routes under `path`, e.g. `/uploads`
    pub fn mount(self, path: &str) -> Self {
        let router = rest::upload_router(Arc::clone(&self.coordinator));
        self.use_router(path, router)
    }

    pub fn use_router(mut self, path: &str, router: Router<()>) -> Self {
        self.routes = self.routes.nest(path, router);
        self
    }

    /// Periodically expire sessions past their deadline while listening
    pub fn with_expiry_sweep(mut self, every: Duration) -> Self {
        self.sweep_every = Some(every);
        self
    }

    /// The finished router with tracing and `x-request-id` handling
    pub fn router(&self) -> Router<()> {
        self.routes.clone().layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
    }

    pub async fn listen<A>(self, addr: A) -> anyhow::Result<()>
    where
        A: ToSocketAddrs,
    {
        if let Some(every) = self.sweep_every {
            tokio::spawn(sweep_expired(Arc::clone(&self.coordinator), every));
        }

        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "upload routes listening");
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

async fn sweep_expired(coordinator: Arc<UploadCoordinator>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        if let Err(e) = coordinator.expire_stale(Utc::now()).await {
            warn!(error = %e, "expiry sweep failed");
        }
    }
}

/// Upload routes mounted at `/uploads`
pub fn uploads(coordinator: Arc<UploadCoordinator>) -> UploadsApp {
    UploadsApp::new(coordinator).mount("/uploads")
}
