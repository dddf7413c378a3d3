use std::sync::Arc;

use fix_gateway::{Acceptor, Gateway, GatewayConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt::init();

    let config = GatewayConfig::from_env();
    info!(
        addr = %config.listen_addr,
        comp_id = %config.comp_id,
        journal = config.journal_dir.is_some(),
        cancel_on_disconnect = config.cancel_on_disconnect,
        "starting FIX gateway"
    );

    let gateway = Arc::new(Gateway::new(config)?);
    let acceptor = Acceptor::bind(Arc::clone(&gateway)).await?;

    tokio::select! {
        result = acceptor.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
        }
    }

    Ok(())
}
