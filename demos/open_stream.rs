use std::error::Error;

use pushline_sdk::client::PushClient;
use pushline_sdk::stream::client::StreamOptions;
use pushline_sdk::stream::frame::DecodedEvent;

fn main() -> Result<(), Box<dyn Error>> {
    let base = "REPLACE_WITH_BASE_URL".to_string();
    let events_url = format!("{base}/events");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let client = PushClient::new(base)?
            .with_on_message(|message| println!("structured: {message}"))
            .with_on_close(|| println!("closed"));
        client.start()?;

        let mut stream = client
            .open_stream(&events_url, StreamOptions::default())
            .await?;
        while let Some(event) = stream.next_event().await {
            match event? {
                DecodedEvent::StructuredMessage(message) => {
                    if let Some(method) = message.get("method") {
                        println!("server call {method}: {message}");
                    }
                }
                DecodedEvent::RawPayload(text) => println!("raw: {text}"),
            }
        }

        Ok::<(), Box<dyn Error>>(())
    })
}
