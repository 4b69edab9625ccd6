// Copyright (C) 2026 The Hub Authors. This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! §4.A Transport, send-side, over an axum WebSocket. Mirrors the teacher's
//! `WebSocketConnection` split-sink pattern (`futures_util::stream::SplitSink`
//! behind a handle every part of the connection can clone and push into).

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use hub_common::Message;
use hub_core::{MessageSink, SendFailed};
use tokio::sync::Mutex;
use tracing::trace;

pub struct AxumSink {
    sender: Mutex<Option<SplitSink<WebSocket, WsMessage>>>,
}

impl AxumSink {
    pub fn new(sender: SplitSink<WebSocket, WsMessage>) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }
}

#[async_trait]
impl MessageSink for AxumSink {
    async fn send(&self, msg: Message) -> Result<(), SendFailed> {
        let body = serde_json::to_string(&msg).map_err(|_| SendFailed)?;
        let mut guard = self.sender.lock().await;
        let Some(sender) = guard.as_mut() else {
            return Err(SendFailed);
        };
        if sender.send(WsMessage::Text(body.into())).await.is_err() {
            *guard = None;
            return Err(SendFailed);
        }
        Ok(())
    }

    fn close(&self) {
        if let Ok(mut guard) = self.sender.try_lock() {
            if let Some(mut sender) = guard.take() {
                trace!("closing websocket transport");
                tokio::spawn(async move {
                    let _ = sender.close().await;
                });
            }
        }
    }
}
