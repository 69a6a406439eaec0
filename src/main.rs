use growatt_bridge::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let options = Options::new();

    growatt_bridge::app(options).await
}
