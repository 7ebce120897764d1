use anteroom::{config::ServerConfig, context::AppContext, error::AdmissionResult, server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> AdmissionResult<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "anteroom=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    print_banner();

    let config = ServerConfig::from_env()?;
    let ctx = AppContext::new(config).await?;

    spawn_sweeper(&ctx);

    server::serve(ctx).await?;

    Ok(())
}

/// Periodic maintenance: flip overdue invitations to `expired` and drop
/// spent rate-limit windows. Both are optimizations; correctness never
/// depends on the sweep running.
fn spawn_sweeper(ctx: &AppContext) {
    let invitations = ctx.invitations.clone();
    let rate_limiter = ctx.rate_limiter.clone();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(600));
        loop {
            interval.tick().await;

            match invitations.mark_expired_sweep().await {
                Ok(0) => {}
                Ok(n) => tracing::info!("Expired {} overdue invitation(s)", n),
                Err(e) => tracing::warn!("Invitation expiry sweep failed: {}", e),
            }

            if let Err(e) = rate_limiter.evict_expired().await {
                tracing::warn!("Rate limit eviction failed: {}", e);
            }
        }
    });
}

fn print_banner() {
    println!(
        r#"
    ___          __
   /   |  ____  / /____  _________  ____  ____ ___
  / /| | / __ \/ __/ _ \/ ___/ __ \/ __ \/ __ `__ \
 / ___ |/ / / / /_/  __/ /  / /_/ / /_/ / / / / / /
/_/  |_/_/ /_/\__/\___/_/   \____/\____/_/ /_/ /_/

        Waiting-room admission service v{}
        "#,
        env!("CARGO_PKG_VERSION")
    );
}
