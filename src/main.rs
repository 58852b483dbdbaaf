#[tokio::main]
async fn main() {
    if let Err(e) = antigravity_gateway::run().await {
        eprintln!("antigravity-gateway: {:#}", e);
        std::process::exit(1);
    }
}
