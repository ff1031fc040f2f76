// ABOUTME: SSH agent forwarding for exec channels.
// ABOUTME: Bridges agent channels opened by the server to the local $SSH_AUTH_SOCK.

use russh::Channel;
use russh::client::Msg;
#[cfg(unix)]
use {
    russh::ChannelMsg,
    tokio::io::{AsyncReadExt, AsyncWriteExt},
    tokio::net::UnixStream,
};

/// Relay one forwarded agent channel in the background.
#[cfg(unix)]
pub(crate) fn spawn_bridge(channel: Channel<Msg>) {
    tokio::spawn(async move {
        let Some(socket) = std::env::var_os("SSH_AUTH_SOCK") else {
            tracing::warn!("Agent forwarding requested but SSH_AUTH_SOCK is not set");
            let _ = channel.close().await;
            return;
        };
        match UnixStream::connect(&socket).await {
            Ok(stream) => {
                if let Err(e) = bridge(stream, channel).await {
                    tracing::debug!("Agent forwarding error: {}", e);
                }
            }
            Err(e) => {
                tracing::warn!("Failed to connect to local SSH agent: {}", e);
                let _ = channel.close().await;
            }
        }
    });
}

#[cfg(not(unix))]
pub(crate) fn spawn_bridge(channel: Channel<Msg>) {
    tokio::spawn(async move {
        tracing::warn!("Agent forwarding needs a Unix agent socket; refusing channel");
        let _ = channel.close().await;
    });
}

#[cfg(unix)]
async fn bridge(mut agent: UnixStream, mut channel: Channel<Msg>) -> std::io::Result<()> {
    let mut agent_closed = false;
    let mut buf = vec![0u8; 16384];

    loop {
        tokio::select! {
            r = agent.read(&mut buf), if !agent_closed => {
                match r {
                    Ok(0) => {
                        agent_closed = true;
                        let _ = channel.eof().await;
                    }
                    Ok(n) => {
                        if channel.data(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => return Err(e),
                }
            }

            msg = channel.wait() => {
                match msg {
                    Some(ChannelMsg::Data { ref data }) => agent.write_all(data).await?,
                    Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break,
                    Some(_) => {}
                }
            }
        }
    }

    let _ = channel.close().await;
    Ok(())
}
