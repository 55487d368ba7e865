use middleware_client::{MessageKind, RequestParams, Result, Session};

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    env_logger::init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://localhost:8080".to_string());
    let channel = std::env::args().nth(2).unwrap_or_else(|| "demo".to_string());

    let session = Session::connect(url.as_str()).await?;
    println!("connected to {url}");

    session.register_message_callback(|session, envelope| {
        println!(
            "[{}] {} on {}: {}",
            envelope.kind, envelope.command, envelope.channel, envelope.payload
        );

        // Echo requests back to whoever asked.
        if envelope.kind == MessageKind::Request && !envelope.source_id.is_empty() {
            let session = session.clone();
            tokio::spawn(async move {
                let params = RequestParams::new(envelope.channel.clone());
                let reply = format!("echo: {}", envelope.payload);
                if let Err(e) = session.reply_to(params, &envelope, reply).await {
                    eprintln!("reply failed: {e}");
                }
            });
        }
    });

    session
        .add_channel_listener(
            RequestParams::new(channel.as_str())
                .on_success(|p| println!("listening: {p}"))
                .on_error(|p| eprintln!("listen failed: {p}")),
        )
        .await?;

    session
        .publish_message(
            RequestParams::new(channel.as_str()).on_error(|p| eprintln!("publish failed: {p}")),
            "hello from channel_client",
        )
        .await?;

    println!("press Ctrl-C to exit");
    let _ = tokio::signal::ctrl_c().await;

    session.shutdown().await;
    Ok(())
}
