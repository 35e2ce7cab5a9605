#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = teachtech_rust::run().await {
        eprintln!("teachtech-rust fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
