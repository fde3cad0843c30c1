//! Device-bridge CLI transport: `<tool> -s <id> shell` with piped stdio.

use std::io;

use telebridge_common::SessionState;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{ShellLink, TransportError};
use crate::context::BridgeServices;
use crate::parser::Utf8Decoder;

pub(super) async fn run(
    services: &BridgeServices,
    device_id: &str,
    link: ShellLink,
) -> Result<(), TransportError> {
    let command_line = link.command_line();
    let ShellLink {
        sink,
        output,
        mut input,
        settle,
        ..
    } = link;

    output.debug(format!("Probing {device_id}"));
    services
        .recovery
        .run(&sink, |retried| {
            if retried {
                output.debug("Retrying probe after reconnect");
            }
            services.tool.probe(device_id)
        })
        .await?;
    output.debug("Probe answered");

    let spec = services.tool.shell_spec(device_id, None).with_stdin();
    output.debug(format!("Spawning {spec}"));
    let mut child = services.tool.spawner().spawn(&spec)?;

    let (Some(mut stdin), Some(mut stdout), Some(mut stderr)) =
        (child.stdin.take(), child.stdout.take(), child.stderr.take())
    else {
        return Err(TransportError::Io(io::Error::other(
            "shell process stdio not piped",
        )));
    };

    sink.status(SessionState::Connected, format!("Connected to {device_id}"));

    let settle_timer = tokio::time::sleep(settle);
    tokio::pin!(settle_timer);
    let mut pending = command_line;

    let mut out_buf = [0u8; 4096];
    let mut err_buf = [0u8; 4096];
    let mut out_decoder = Utf8Decoder::new();
    let mut err_decoder = Utf8Decoder::new();
    let (mut out_open, mut err_open) = (true, true);

    while out_open || err_open {
        tokio::select! {
            _ = &mut settle_timer, if pending.is_some() => {
                if let Some(line) = pending.take() {
                    output.debug(format!("Writing command: {}", line.trim_end()));
                    stdin.write_all(line.as_bytes()).await?;
                }
            }
            read = stdout.read(&mut out_buf), if out_open => match read? {
                0 => out_open = false,
                n => output.output(out_decoder.decode(&out_buf[..n])),
            },
            read = stderr.read(&mut err_buf), if err_open => match read? {
                0 => err_open = false,
                n => output.output(err_decoder.decode(&err_buf[..n])),
            },
            data = input.recv() => match data {
                Some(bytes) => stdin.write_all(&bytes).await?,
                None => break,
            },
        }
    }

    let status = child.wait().await?;
    output.debug(format!("Shell process exited: {status}"));
    Ok(())
}
