//! Starts wiremock servers, skipping tests where the sandbox forbids binding sockets.

use std::net::TcpListener;

use wiremock::MockServer;

/// Returns `true` when a loopback socket can be bound.
pub fn sockets_available() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

/// Starts a mock server, or returns `None` (after logging) when sockets are unavailable.
pub async fn start_mock_server_or_skip() -> Option<MockServer> {
    if !sockets_available() {
        eprintln!("skipping: loopback sockets are not available in this environment");
        return None;
    }
    Some(MockServer::start().await)
}

/// Value returned by a test that was skipped for lack of sockets.
pub fn socket_skip_return() -> Result<(), Box<dyn std::error::Error>> {
    Ok(())
}
