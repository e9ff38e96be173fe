use bytes::Bytes;

use crate::channel::ChannelReplies;

/// Connection events delivered to a channel's handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A client completed the handshake and holds slot `client`.
    Connected { client: usize },
    /// A data envelope arrived from an active client.
    Message { client: usize, data: Bytes },
    /// The slot was released and can be reused.
    Disconnected { client: usize },
}

/// Per-channel event handler.
///
/// Runs on the channel's own thread, one event at a time. It must not call
/// [`crate::ChannelHandle::send`] for its own channel; use `replies` instead.
pub trait ChannelHandler: Send {
    fn on_event(&mut self, event: ChannelEvent, replies: &mut ChannelReplies<'_>);
}

impl<F> ChannelHandler for F
where
    F: FnMut(ChannelEvent, &mut ChannelReplies<'_>) + Send,
{
    fn on_event(&mut self, event: ChannelEvent, replies: &mut ChannelReplies<'_>) {
        self(event, replies)
    }
}
