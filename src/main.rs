#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telegraph_server::run().await
}
