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

//! §4.A Transport, send-side only.
//!
//! The receive side of a Transport is owned by whatever accepted the
//! connection (the `hub` binary's WebSocket loop) and is never handed to
//! `hub-core` — the session manager and command dispatcher only ever need
//! to *push* a message at a client, never to read from one directly.
//! Inbound messages always arrive through `ConnectionHandler`/`set_result`.

use async_trait::async_trait;
use hub_common::Message;
use thiserror::Error;

/// §4.A: "fails iff the peer has gone away". Once a transport reports
/// `Closed` any further `send` yields `SendFailed` without blocking —
/// implementations must not busy-wait or panic on a dead peer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("send failed: peer is gone")]
pub struct SendFailed;

#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Serialize and push atomically; partial sends are never observable.
    async fn send(&self, msg: Message) -> Result<(), SendFailed>;

    /// Best-effort close. Must not block; a transport already closed is a
    /// no-op.
    fn close(&self);
}

/// A `MessageSink` that records every message sent to it, for use in
/// `hub-core`'s own unit tests (and by any caller that wants to observe
/// what the session manager / connection handler would have sent without
/// standing up a real socket). Mirrors the teacher's `MockClientSession`.
pub struct MockSink {
    sent: tokio::sync::Mutex<Vec<Message>>,
    closed: std::sync::atomic::AtomicBool,
    fail_sends: std::sync::atomic::AtomicBool,
}

impl MockSink {
    pub fn new() -> Self {
        Self {
            sent: tokio::sync::Mutex::new(Vec::new()),
            closed: std::sync::atomic::AtomicBool::new(false),
            fail_sends: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Simulate a peer that has gone away: subsequent `send` calls fail.
    pub fn simulate_disconnect(&self) {
        self.fail_sends
            .store(true, std::sync::atomic::Ordering::SeqCst);
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub async fn sent_messages(&self) -> Vec<Message> {
        self.sent.lock().await.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl Default for MockSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageSink for MockSink {
    async fn send(&self, msg: Message) -> Result<(), SendFailed> {
        if self.fail_sends.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(SendFailed);
        }
        self.sent.lock().await.push(msg);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_sink_records_sent_messages() {
        let sink = MockSink::new();
        sink.send(Message::error("boom")).await.unwrap();
        assert_eq!(sink.sent_messages().await.len(), 1);
    }

    #[tokio::test]
    async fn disconnected_mock_sink_fails_sends_without_blocking() {
        let sink = MockSink::new();
        sink.simulate_disconnect();
        let result = sink.send(Message::error("boom")).await;
        assert_eq!(result, Err(SendFailed));
        assert!(sink.is_closed());
    }
}
