#[tokio::main]
async fn main() {
    lobby_desktop::init_logging();
    if let Err(e) = lobby_desktop::run().await {
        tracing::error!("lobby failed: {e}");
        std::process::exit(1);
    }
}
