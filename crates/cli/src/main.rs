#[tokio::main]
async fn main() {
    if let Err(error) = waifu2x_cli::run_from_env().await {
        tracing::error!("{error:#}");
        std::process::exit(1);
    }
}
