use super::{TileService, routes::router};
use anyhow::{Context, Result};
use std::{net::SocketAddr, sync::Arc};
use tokio::{
	sync::oneshot::{self, Sender},
	task::JoinHandle,
};

/// HTTP listener around a [`TileService`].
pub struct TileServer {
	ip: String,
	port: u16,
	service: Arc<TileService>,
	exit_signal: Option<Sender<()>>,
	join_handle: Option<JoinHandle<()>>,
}

impl TileServer {
	pub fn new(ip: &str, port: u16, service: TileService) -> TileServer {
		TileServer {
			ip: ip.to_owned(),
			port,
			service: Arc::new(service),
			exit_signal: None,
			join_handle: None,
		}
	}

	pub fn service(&self) -> &Arc<TileService> {
		&self.service
	}

	/// Binds and starts serving in the background. Returns the bound address, which tells the actual port
	/// when the server was created with port 0.
	pub async fn start(&mut self) -> Result<SocketAddr> {
		if self.exit_signal.is_some() {
			self.stop().await;
		}

		let addr = format!("{}:{}", self.ip, self.port);
		let listener = tokio::net::TcpListener::bind(&addr)
			.await
			.with_context(|| format!("binding {addr}"))?;
		let local_addr = listener.local_addr()?;
		log::info!("server listens on {local_addr}");

		let app = router(self.service.clone());
		let (tx, rx) = oneshot::channel::<()>();
		let handle = tokio::spawn(async move {
			let result = axum::serve(listener, app.into_make_service())
				.with_graceful_shutdown(async {
					rx.await.ok();
				})
				.await;
			if let Err(error) = result {
				log::error!("server failed: {error}");
			}
		});

		self.exit_signal = Some(tx);
		self.join_handle = Some(handle);
		Ok(local_addr)
	}

	/// Signals a graceful shutdown and waits until open connections are done.
	pub async fn stop(&mut self) {
		let Some(exit_signal) = self.exit_signal.take() else {
			return;
		};
		log::info!("stopping server");
		exit_signal.send(()).ok();
		if let Some(handle) = self.join_handle.take() {
			handle.await.ok();
		}
	}
}
