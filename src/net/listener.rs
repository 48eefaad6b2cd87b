//! Connection acceptor

use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{debug, warn};

use crate::app::AppState;
use crate::net::session::handle_connection;

/// Back-off after a failed accept (e.g. out of file descriptors)
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Accept connections forever, one session task each. No connection limit;
/// late joiners are turned away by the handshake instead.
pub async fn serve(listener: TcpListener, state: AppState) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                }
                tokio::spawn(handle_connection(stream, peer, state.clone()));
            }
            Err(e) => {
                warn!(error = %e, "Accept failed");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
}
