//! Subcommand implementations.

use pollcast::{Listener, Payload, PubSub};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::error::Error;

/// Format a received notification as one output line.
pub fn format_notification(channel: &str, payload: &Payload) -> String {
    match payload {
        Payload::Text(text) => format!("{}: {}", channel, text),
        Payload::Json(value) => format!("{}: {}", channel, value),
    }
}

/// Turn command-line text into a payload for `channel`.
///
/// JSON channels require the text to be a JSON document.
pub fn parse_payload(json: bool, raw: &str) -> Result<Payload, Error> {
    if json {
        Ok(Payload::Json(serde_json::from_str(raw)?))
    } else {
        Ok(Payload::Text(raw.to_string()))
    }
}

/// Split a `pipe` input line into channel and payload.
pub fn parse_line(line: &str) -> Result<(&str, &str), Error> {
    line.trim_end()
        .split_once(' ')
        .filter(|(channel, _)| !channel.is_empty())
        .ok_or_else(|| Error::InvalidLine(line.to_string()))
}

/// Print every notification on `channels` to stdout.
pub fn listen_all(pubsub: &PubSub, channels: &[String]) -> Result<(), Error> {
    for channel in channels {
        let name = channel.clone();
        pubsub.listen(
            channel,
            Listener::new(move |_, payload| println!("{}", format_notification(&name, payload))),
        )?;
        tracing::info!(channel = %channel, "listening");
    }
    Ok(())
}

/// Listen until Ctrl-C.
pub async fn run_listen(pubsub: &PubSub, channels: &[String]) -> Result<(), Error> {
    listen_all(pubsub, channels)?;
    tokio::signal::ctrl_c().await?;
    tracing::info!("received shutdown signal");
    Ok(())
}

/// Send one notification.
pub fn run_notify(pubsub: &PubSub, json: bool, channel: &str, raw: &str) -> Result<(), Error> {
    let payload = parse_payload(json, raw)?;
    pubsub.notify(channel, payload)?;
    Ok(())
}

/// Listen on `channels` and notify each stdin line until EOF or Ctrl-C.
pub async fn run_pipe(
    pubsub: &PubSub,
    json_channels: &[String],
    channels: &[String],
) -> Result<(), Error> {
    listen_all(pubsub, channels)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let sent = parse_line(&line).and_then(|(channel, raw)| {
                    let json = json_channels.iter().any(|c| c == channel);
                    run_notify(pubsub, json, channel, raw)
                });
                if let Err(e) = sent {
                    eprintln!("Error: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received shutdown signal");
                break;
            }
        }
    }

    Ok(())
}
