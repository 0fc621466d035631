#[tokio::main]
async fn main() {
    fanout_observability::init();

    if let Err(err) = fanout_cli::app::run_from_env().await {
        tracing::error!(error = %format!("{err:#}"), "dispatch run failed");
    }
}
