#[tokio::main]
async fn main() -> anyhow::Result<()> {
    claimline_cli::run().await?;
    Ok(())
}
