use std::net::Ipv4Addr;

use tracing::{debug, warn};
use wallcast_proto::{ControlMessage, RawFrame};

use crate::{MulticastReceiver, MulticastSender, Result};

/// Broadcaster-side handle for the control channel.
#[derive(Debug)]
pub struct ControlSender {
    sender: MulticastSender,
    port: u16,
}

impl ControlSender {
    pub fn new(group: Ipv4Addr, control_port: u16) -> Result<Self> {
        Ok(Self {
            sender: MulticastSender::new(group)?,
            port: control_port,
        })
    }

    /// Fire-and-forget send. Loss is tolerated: every state write is
    /// republished on a short cadence.
    pub async fn send(&self, msg: &ControlMessage) -> Result<()> {
        let payload = wallcast_proto::encode(msg)?;
        debug!(msg_type = msg.msg_type(), bytes = payload.len(), "Sending control message");
        self.sender.send(&payload, self.port).await?;
        Ok(())
    }
}

/// Receiver-side handle for the control channel.
#[derive(Debug)]
pub struct ControlReceiver {
    receiver: MulticastReceiver,
}

impl ControlReceiver {
    pub fn join(group: Ipv4Addr, control_port: u16) -> Result<Self> {
        Ok(Self {
            receiver: MulticastReceiver::join(group, control_port)?,
        })
    }

    /// Block until the next decodable control message. Non-JSON datagrams and
    /// unknown message types are logged and skipped, never fatal.
    pub async fn recv(&mut self) -> Result<ControlMessage> {
        loop {
            let payload = self.receiver.recv_owned().await?;
            let frame: RawFrame = match wallcast_proto::decode(&payload) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(bytes = payload.len(), error = %e, "Dropping undecodable control datagram");
                    continue;
                }
            };
            match ControlMessage::from_frame(&frame) {
                Some(msg) => return Ok(msg),
                None => {
                    warn!(msg_type = %frame.msg_type, "Ignoring unknown control message type");
                }
            }
        }
    }
}
