use std::collections::VecDeque;

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::demux::{DemuxSink, Demultiplexer};

/// Output of [`DemuxCodec`]: runs of command bytes and whole telemetry frames,
/// in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkChunk {
    Command(Bytes),
    Telemetry(Bytes),
}

/// `tokio_util` decoder wrapping a [`Demultiplexer`] for async serial readers.
#[derive(Debug, Default)]
pub struct DemuxCodec {
    demux: Demultiplexer,
    ready: VecDeque<LinkChunk>,
    command: BytesMut,
}

impl DemuxCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_demultiplexer(demux: Demultiplexer) -> Self {
        Self {
            demux,
            ..Self::default()
        }
    }
}

struct Collect<'a> {
    ready: &'a mut VecDeque<LinkChunk>,
    command: &'a mut BytesMut,
}

impl Collect<'_> {
    fn close_command_run(&mut self) {
        if !self.command.is_empty() {
            let run = self.command.split().freeze();
            self.ready.push_back(LinkChunk::Command(run));
        }
    }
}

impl DemuxSink for Collect<'_> {
    fn command_byte(&mut self, byte: u8) {
        self.command.put_u8(byte);
    }

    fn telemetry_frame(&mut self, frame: Bytes) {
        self.close_command_run();
        self.ready.push_back(LinkChunk::Telemetry(frame));
    }
}

impl Decoder for DemuxCodec {
    type Item = LinkChunk;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if !src.is_empty() {
            let data = src.split();
            let mut sink = Collect {
                ready: &mut self.ready,
                command: &mut self.command,
            };
            self.demux.feed(&data, &mut sink);
            sink.close_command_run();
        }
        Ok(self.ready.pop_front())
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(chunk) = self.decode(src)? {
            return Ok(Some(chunk));
        }
        let mut sink = Collect {
            ready: &mut self.ready,
            command: &mut self.command,
        };
        self.demux.reset(&mut sink);
        sink.close_command_run();
        Ok(self.ready.pop_front())
    }
}
