//! Synthetic shell of the mock device.

use std::time::Duration;

use telebridge_common::SessionState;

use super::{ShellLink, TransportError};

const LINE_INTERVAL: Duration = Duration::from_millis(20);

fn synthetic_line(seq: u64, tag: &str) -> String {
    let millis = seq * LINE_INTERVAL.as_millis() as u64;
    format!(
        "[{:>6}.{:03}] I/{}( 1234): synthetic event #{}\n",
        millis / 1000,
        millis % 1000,
        tag,
        seq
    )
}

pub(super) async fn run(link: ShellLink, tags: &[String]) -> Result<(), TransportError> {
    let command = link.command.clone();
    let ShellLink {
        sink,
        output,
        mut input,
        settle,
        ..
    } = link;

    output.debug("Mock device selected, no process spawned");
    sink.status(SessionState::Connected, "Connected to mock device");

    tokio::time::sleep(settle).await;
    if !command.is_empty() {
        output.output(format!("$ {command}\n"));
    }

    let tags: Vec<&str> = tags
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();
    let tags = if tags.is_empty() { vec!["MOCK"] } else { tags };

    let mut ticker = tokio::time::interval(LINE_INTERVAL);
    let mut seq: u64 = 0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let tag = tags[(seq % tags.len() as u64) as usize];
                output.output(synthetic_line(seq, tag));
                seq += 1;
            }
            data = input.recv() => match data {
                Some(bytes) => output.output(String::from_utf8_lossy(&bytes).into_owned()),
                None => return Ok(()),
            },
        }
    }
}
