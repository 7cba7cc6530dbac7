use anyhow::Result;

use admin_daemon::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry = telemetry::init("admin-daemon")?;
    admin_daemon::server::run().await
}
