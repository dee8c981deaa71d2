#[tokio::main]
async fn main() {
    pikaquick::start_server().await;
}
