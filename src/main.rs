#[tokio::main]
async fn main() -> anyhow::Result<()> {
    datasource_proxy_lib::run().await?;
    Ok(())
}
