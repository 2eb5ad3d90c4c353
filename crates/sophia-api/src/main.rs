#[tokio::main]
async fn main() {
    if let Err(err) = sophia_api::run().await {
        tracing::error!(error = %err, "sophia-api failed");
        std::process::exit(1);
    }
}
