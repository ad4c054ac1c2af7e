//! Decode-once codec for the transport layer.
//!
//! - Text frames => relay `Command`
//! - Binary frames => rejected (the protocol is JSON text only)
//! - Ping/Pong/Close are surfaced for lifecycle management

use axum::extract::ws::Message;
use tcpbridge_core::{
    error::{BridgeError, Result},
    protocol::{decode_command, Command, RelayEvent},
};

#[derive(Debug)]
pub enum Inbound {
    Command(Command),
    Ping(Vec<u8>),
    Pong,
    Close,
}

pub fn decode(msg: Message) -> Result<Inbound> {
    match msg {
        Message::Text(s) => decode_command(&s).map(Inbound::Command),
        Message::Binary(_) => Err(BridgeError::BadRequest(
            "binary frames are not supported; send JSON text frames".into(),
        )),
        Message::Ping(v) => Ok(Inbound::Ping(v)),
        Message::Pong(_) => Ok(Inbound::Pong),
        Message::Close(_) => Ok(Inbound::Close),
    }
}

pub fn encode(ev: &RelayEvent) -> Result<Message> {
    ev.to_json().map(Message::Text)
}
