use mock_server::tls::{TestPki, TlsListener};
use mock_server::MockState;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let tls = std::env::var("TLS").is_ok_and(|v| v == "1");
    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr).await?;

    if tls {
        let pki = TestPki::generate("localhost");
        // Clients need this CA to trust the generated leaf.
        println!("{}", pki.ca_pem);
        tracing::info!(%addr, "listening (https)");
        let listener = TlsListener::new(listener, pki.server_config()?);
        mock_server::run_tls(listener, MockState::default()).await?;
    } else {
        tracing::info!(%addr, "listening (http)");
        mock_server::run(listener, MockState::default()).await?;
    }
    Ok(())
}
