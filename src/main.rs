#[tokio::main]
async fn main() -> anyhow::Result<()> {
    drivelog_lib::run().await
}
