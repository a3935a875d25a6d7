use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    dotenvy::dotenv().ok();

    // RUST_LOG controls verbosity, e.g. RUST_LOG=mock_server=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let secret = std::env::var("MOCK_SERVER_SECRET")
        .ok()
        .filter(|secret| !secret.is_empty());

    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, signed = secret.is_some(), "mock upstream listening");
    mock_server::run(listener, secret).await
}
