use reconboard::cli::ReconboardCli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ReconboardCli::run().await
}
