//! Loopback HTTP stubs for exercising the remote contracts in tests.

use axum::Router;
use tokio::task::JoinHandle;

/// An axum router served on a random localhost port until dropped
pub struct StubServer {
    pub base_url: String,
    handle: JoinHandle<()>,
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn serve(router: Router) -> StubServer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub server");
    let addr = listener.local_addr().expect("stub server address");
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    StubServer {
        base_url: format!("http://{}", addr),
        handle,
    }
}

/// Base URL of a port nothing listens on
pub fn unused_base_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind probe port");
    let addr = listener.local_addr().expect("probe address");
    drop(listener);
    format!("http://{}", addr)
}
