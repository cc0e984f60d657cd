use std::error::Error;

use pushline_sdk::client::PushClient;
use serde_json::json;

fn main() -> Result<(), Box<dyn Error>> {
    let base = "REPLACE_WITH_BASE_URL".to_string();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let client = PushClient::new(base)?;
        client.start()?;

        client
            .send(&json!({"jsonrpc":"2.0","id":1,"method":"ping"}))
            .await?;
        println!("message delivered");

        Ok::<(), Box<dyn Error>>(())
    })
}
