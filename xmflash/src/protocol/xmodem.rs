//! XMODEM (checksum) receive-and-program engine.
//!
//! The receiver kicks the transfer off with a single NAK, then pulls 132-byte
//! frames from the transport. Every new, valid block is programmed into the
//! sink before it is acknowledged, so an ACK always means "committed".
//!
//! ## Receive loop
//!
//! ```text
//! AwaitingFirstFrame --NAK, wait 10 s x10--> AwaitingFrame --wait 1 s x10--> ...
//!
//!   EOT             -> ACK, Completed
//!   invalid frame   -> NAK, retry same block
//!   previous block  -> ACK, no write
//!   expected block  -> program; ok: ACK, advance; fail: NAK + CAN, Failed
//!   link failure    -> Failed (comms)
//!   10 timeouts     -> Failed (timeout)
//! ```

use std::fmt;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::port::{Received, Transport};
use crate::protocol::control;
use crate::protocol::frame::{Frame, FrameCheck, PAYLOAD_LEN};
use crate::target::ProgramSink;

/// XMODEM receive configuration.
#[derive(Debug, Clone)]
pub struct XmodemConfig {
    /// Wait per attempt for the first frame, after the kick-off NAK.
    pub first_timeout: Duration,
    /// Wait per attempt for every later frame.
    pub frame_timeout: Duration,
    /// Receive attempts per frame request before giving up.
    pub max_retries: u32,
}

impl Default for XmodemConfig {
    fn default() -> Self {
        Self {
            first_timeout: Duration::from_secs(10),
            frame_timeout: Duration::from_secs(1),
            max_retries: 10,
        }
    }
}

/// Where the receive loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveState {
    /// Start condition: the kick-off NAK has not been answered yet.
    AwaitingFirstFrame,
    /// Steady state.
    AwaitingFrame,
    /// The sender finished and the EOT was acknowledged.
    Completed,
    /// The transfer stopped on an error.
    Failed,
}

/// Outcome of a download, as a stable status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TerminalStatus {
    /// Download and programming completed.
    Success,
    /// Destination unaligned or outside the writable region.
    AddressError,
    /// The link failed.
    CommsError,
    /// The sender stopped responding.
    Timeout,
    /// The sink failed to program a block.
    ProgramFailed,
}

impl TerminalStatus {
    /// Numeric status code.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::AddressError => 1,
            Self::CommsError => 2,
            Self::Timeout => 3,
            Self::ProgramFailed => 4,
        }
    }

    /// Status of a finished download call.
    #[must_use]
    pub fn from_result<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(e) => e.status(),
        }
    }
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "success",
            Self::AddressError => "address error",
            Self::CommsError => "comms error",
            Self::Timeout => "timeout",
            Self::ProgramFailed => "programming failure",
        };
        f.write_str(name)
    }
}

/// What a completed download did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TransferSummary {
    /// Address the first block was written to.
    pub base_address: u32,
    /// Address the next block would have been written to.
    pub end_address: u32,
    /// Blocks programmed.
    pub blocks_written: u32,
    /// Payload bytes programmed.
    pub bytes_written: u64,
    /// Resent blocks acknowledged without a write.
    pub duplicates: u32,
    /// Frames rejected with a NAK.
    pub rejected: u32,
}

/// Reported after every committed block.
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    /// Block number just committed.
    pub block: u8,
    /// Address the block was written to.
    pub address: u32,
    /// Total payload bytes programmed so far.
    pub bytes_written: u64,
}

/// Per-call transfer state.
#[derive(Debug)]
struct Session {
    base_address: u32,
    address: u32,
    expected_block: u8,
    state: ReceiveState,
    blocks_written: u32,
    duplicates: u32,
    rejected: u32,
}

impl Session {
    fn new(base_address: u32) -> Self {
        Self {
            base_address,
            address: base_address,
            expected_block: 1,
            state: ReceiveState::AwaitingFirstFrame,
            blocks_written: 0,
            duplicates: 0,
            rejected: 0,
        }
    }

    fn bytes_written(&self) -> u64 {
        u64::from(self.blocks_written) * PAYLOAD_LEN as u64
    }

    fn commit(&mut self) {
        self.address = self
            .address
            .wrapping_add(PAYLOAD_LEN as u32);
        self.expected_block = self
            .expected_block
            .wrapping_add(1);
        self.blocks_written += 1;
    }

    fn summary(&self) -> TransferSummary {
        TransferSummary {
            base_address: self.base_address,
            end_address: self.address,
            blocks_written: self.blocks_written,
            bytes_written: self.bytes_written(),
            duplicates: self.duplicates,
            rejected: self.rejected,
        }
    }
}

enum Step {
    Continue,
    Done,
}

/// XMODEM receiver programming into a sink.
pub struct XmodemReceiver<'a, T: Transport + ?Sized, S: ProgramSink + ?Sized> {
    transport: &'a mut T,
    sink: &'a mut S,
    config: XmodemConfig,
    state: ReceiveState,
}

impl<'a, T: Transport + ?Sized, S: ProgramSink + ?Sized> XmodemReceiver<'a, T, S> {
    /// Create a receiver with the default timeouts.
    pub fn new(transport: &'a mut T, sink: &'a mut S) -> Self {
        Self::with_config(transport, sink, XmodemConfig::default())
    }

    /// Create a receiver with custom configuration.
    pub fn with_config(transport: &'a mut T, sink: &'a mut S, config: XmodemConfig) -> Self {
        Self {
            transport,
            sink,
            config,
            state: ReceiveState::AwaitingFirstFrame,
        }
    }

    /// State the last download ended in; `AwaitingFirstFrame` before any.
    #[must_use]
    pub fn state(&self) -> ReceiveState {
        self.state
    }

    /// Receive a transfer and program it starting at `base_address`.
    ///
    /// `base_address` must already be validated by the caller (see
    /// [`FlashRegion::validate_destination`](crate::target::FlashRegion::validate_destination)).
    pub fn download_and_program(&mut self, base_address: u32) -> Result<TransferSummary> {
        self.download_and_program_with_progress(base_address, |_| {})
    }

    /// Like [`download_and_program`](Self::download_and_program), reporting
    /// every committed block.
    pub fn download_and_program_with_progress<F>(
        &mut self,
        base_address: u32,
        mut progress: F,
    ) -> Result<TransferSummary>
    where
        F: FnMut(&Progress),
    {
        debug!("Starting XMODEM download to {base_address:#010x}");

        let mut session = Session::new(base_address);
        let result = self.run(&mut session, &mut progress);

        match &result {
            Ok(()) => {
                self.state = ReceiveState::Completed;
                debug!(
                    "XMODEM download complete: {} block(s), {} duplicate(s), {} rejected",
                    session.blocks_written, session.duplicates, session.rejected
                );
            },
            Err(e) => {
                self.state = ReceiveState::Failed;
                debug!("XMODEM download failed ({}): {e}", e.status());
            },
        }

        result.map(|()| session.summary())
    }

    fn run<F>(&mut self, session: &mut Session, progress: &mut F) -> Result<()>
    where
        F: FnMut(&Progress),
    {
        let mut frame = Frame::new();
        loop {
            let received = self.request_frame(session, &mut frame)?;
            match self.handle_frame(session, &frame, received, progress)? {
                Step::Continue => {},
                Step::Done => return Ok(()),
            }
        }
    }

    /// Wait for the next frame, retrying timeouts up to the budget.
    fn request_frame(&mut self, session: &mut Session, frame: &mut Frame) -> Result<usize> {
        let first = session.state == ReceiveState::AwaitingFirstFrame;
        let timeout = if first {
            self.config.first_timeout
        } else {
            self.config.frame_timeout
        };

        if first {
            debug!("Sending NAK to start the transfer");
            self.send(session, control::NAK)?;
        }

        let budget = self.config.max_retries.max(1);
        let mut attempts = 0;
        let outcome = loop {
            if attempts == budget {
                break None;
            }
            attempts += 1;
            frame.clear();

            match self.transport.receive(frame.as_mut_bytes(), timeout) {
                Ok(Received::Data(n)) => break Some(n),
                Ok(Received::Timeout) => {
                    trace!("No frame after {timeout:?} (attempt {attempts}/{budget})");
                },
                Err(e) => {
                    session.state = ReceiveState::AwaitingFrame;
                    return Err(Error::Comms {
                        reason: e.to_string(),
                        blocks_written: session.blocks_written,
                    });
                },
            }
        };

        session.state = ReceiveState::AwaitingFrame;
        outcome.ok_or(Error::Timeout {
            attempts,
            blocks_written: session.blocks_written,
        })
    }

    fn handle_frame<F>(
        &mut self,
        session: &mut Session,
        frame: &Frame,
        received: usize,
        progress: &mut F,
    ) -> Result<Step>
    where
        F: FnMut(&Progress),
    {
        match frame.classify(received, session.expected_block) {
            FrameCheck::EndOfTransfer => {
                trace!("EOT received");
                self.send(session, control::ACK)?;
                Ok(Step::Done)
            },
            FrameCheck::Invalid(fault) => {
                warn!(
                    "Rejecting frame while waiting for block {}: {fault}",
                    session.expected_block
                );
                session.rejected += 1;
                self.send(session, control::NAK)?;
                Ok(Step::Continue)
            },
            FrameCheck::Duplicate { block } => {
                debug!("Block {block} already programmed, acknowledging resend");
                session.duplicates += 1;
                self.send(session, control::ACK)?;
                Ok(Step::Continue)
            },
            FrameCheck::New { block } => {
                let address = session.address;
                if let Err(e) = self.sink.program(address, frame.payload()) {
                    warn!("Programming block {block} at {address:#010x} failed: {e}");
                    self.cancel();
                    return Err(Error::ProgramFailed {
                        address,
                        block,
                        blocks_written: session.blocks_written,
                        reason: e.to_string(),
                    });
                }

                session.commit();
                trace!("Block {block} programmed at {address:#010x}");
                self.send(session, control::ACK)?;
                progress(&Progress {
                    block,
                    address,
                    bytes_written: session.bytes_written(),
                });
                Ok(Step::Continue)
            },
        }
    }

    fn send(&mut self, session: &Session, byte: u8) -> Result<()> {
        self.transport
            .send(&[byte])
            .map_err(|e| Error::Comms {
                reason: e.to_string(),
                blocks_written: session.blocks_written,
            })
    }

    /// Reject the current frame and tell the sender to stop.
    fn cancel(&mut self) {
        let sent = self
            .transport
            .send(&[control::NAK])
            .and_then(|()| self.transport.send(&[control::CAN]));
        if let Err(e) = sent {
            warn!("Could not signal cancel to sender: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::FRAME_LEN;
    use crate::target::{FlashRegion, MemoryFlash};
    use std::collections::VecDeque;

    const BASE: u32 = 0x0001_0000;

    /// One scripted receive outcome.
    enum Reply {
        Bytes(Vec<u8>),
        Timeout,
        Fail,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Op {
        Sent(u8),
        Receive(Duration),
    }

    /// Scripted link: replies are consumed in order, an empty script times out.
    struct MockLink {
        replies: VecDeque<Reply>,
        ops: Vec<Op>,
        sends: usize,
        /// 1-based index of the send call that fails.
        fail_send: Option<usize>,
    }

    impl MockLink {
        fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: replies.into(),
                ops: Vec::new(),
                sends: 0,
                fail_send: None,
            }
        }

        fn failing_send(replies: Vec<Reply>, call: usize) -> Self {
            Self {
                fail_send: Some(call),
                ..Self::new(replies)
            }
        }

        fn receive_count(&self) -> usize {
            self.receive_timeouts().len()
        }

        fn sent(&self) -> Vec<u8> {
            self.ops
                .iter()
                .filter_map(|op| match op {
                    Op::Sent(b) => Some(*b),
                    Op::Receive(_) => None,
                })
                .collect()
        }

        fn receive_timeouts(&self) -> Vec<Duration> {
            self.ops
                .iter()
                .filter_map(|op| match op {
                    Op::Receive(t) => Some(*t),
                    Op::Sent(_) => None,
                })
                .collect()
        }
    }

    impl Transport for MockLink {
        fn send(&mut self, bytes: &[u8]) -> Result<()> {
            self.sends += 1;
            if self.fail_send == Some(self.sends) {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "tx stalled",
                )));
            }
            self.ops
                .extend(bytes.iter().map(|&b| Op::Sent(b)));
            Ok(())
        }

        fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<Received> {
            self.ops.push(Op::Receive(timeout));
            match self.replies.pop_front() {
                None | Some(Reply::Timeout) => Ok(Received::Timeout),
                Some(Reply::Fail) => Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "unplugged",
                ))),
                Some(Reply::Bytes(bytes)) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    Ok(Received::Data(n))
                },
            }
        }
    }

    /// Sink recording every write; optionally fails the n-th write attempt.
    #[derive(Default)]
    struct RecordingSink {
        writes: Vec<(u32, Vec<u8>)>,
        fail_attempt: Option<usize>,
        attempts: usize,
    }

    impl ProgramSink for RecordingSink {
        fn program(&mut self, address: u32, block: &[u8; PAYLOAD_LEN]) -> Result<()> {
            self.attempts += 1;
            if self.fail_attempt == Some(self.attempts) {
                return Err(Error::Sink("flash controller busy".into()));
            }
            self.writes.push((address, block.to_vec()));
            Ok(())
        }
    }

    fn data(block: u8, fill: u8) -> Reply {
        Reply::Bytes(Frame::data(block, &[fill; PAYLOAD_LEN]).as_bytes().to_vec())
    }

    fn eot() -> Reply {
        Reply::Bytes(vec![control::EOT])
    }

    fn corrupt(block: u8, fill: u8, index: usize, value: u8) -> Reply {
        let mut frame = Frame::data(block, &[fill; PAYLOAD_LEN]);
        frame.as_mut_bytes()[index] = value;
        Reply::Bytes(frame.as_bytes().to_vec())
    }

    fn fast_config() -> XmodemConfig {
        XmodemConfig {
            first_timeout: Duration::from_millis(100),
            frame_timeout: Duration::from_millis(10),
            max_retries: 10,
        }
    }

    #[test]
    fn test_eot_as_first_frame_completes_with_nothing_written() {
        let mut link = MockLink::new(vec![eot()]);
        let mut sink = RecordingSink::default();

        let summary = XmodemReceiver::new(&mut link, &mut sink)
            .download_and_program(BASE)
            .unwrap();

        assert_eq!(link.sent(), vec![control::NAK, control::ACK]);
        assert!(sink.writes.is_empty());
        assert_eq!(summary.blocks_written, 0);
        assert_eq!(summary.end_address, BASE);
    }

    #[test]
    fn test_three_sequential_blocks_then_eot() {
        let mut link = MockLink::new(vec![data(1, 0xA1), data(2, 0xA2), data(3, 0xA3), eot()]);
        let mut sink = RecordingSink::default();

        let summary = XmodemReceiver::new(&mut link, &mut sink)
            .download_and_program(BASE)
            .unwrap();

        assert_eq!(
            link.sent(),
            vec![control::NAK, control::ACK, control::ACK, control::ACK, control::ACK]
        );
        assert_eq!(sink.writes.len(), 3);
        assert_eq!(sink.writes[0], (BASE, vec![0xA1; PAYLOAD_LEN]));
        assert_eq!(sink.writes[1], (BASE + 128, vec![0xA2; PAYLOAD_LEN]));
        assert_eq!(sink.writes[2], (BASE + 256, vec![0xA3; PAYLOAD_LEN]));
        assert_eq!(
            summary,
            TransferSummary {
                base_address: BASE,
                end_address: BASE + 384,
                blocks_written: 3,
                bytes_written: 384,
                duplicates: 0,
                rejected: 0,
            }
        );
    }

    #[test]
    fn test_resent_block_is_acked_without_rewrite() {
        let mut link = MockLink::new(vec![data(1, 0x01), data(2, 0x02), data(2, 0x02), eot()]);
        let mut sink = RecordingSink::default();

        let summary = XmodemReceiver::new(&mut link, &mut sink)
            .download_and_program(BASE)
            .unwrap();

        assert_eq!(
            link.sent(),
            vec![control::NAK, control::ACK, control::ACK, control::ACK, control::ACK]
        );
        assert_eq!(sink.writes.len(), 2);
        assert_eq!(summary.end_address, BASE + 256);
        assert_eq!(summary.blocks_written, 2);
        assert_eq!(summary.duplicates, 1);
    }

    #[test]
    fn test_first_request_times_out_after_ten_waits() {
        let mut link = MockLink::new(vec![]);
        let mut sink = RecordingSink::default();

        let result = XmodemReceiver::new(&mut link, &mut sink).download_and_program(BASE);

        assert!(matches!(
            result,
            Err(Error::Timeout {
                attempts: 10,
                blocks_written: 0
            })
        ));
        assert_eq!(TerminalStatus::from_result(&result), TerminalStatus::Timeout);
        // One kick-off NAK, then waits only
        assert_eq!(link.sent(), vec![control::NAK]);
        assert_eq!(link.receive_timeouts(), vec![Duration::from_secs(10); 10]);
        assert_eq!(sink.attempts, 0);
    }

    #[test]
    fn test_program_failure_sends_nak_then_can_and_stops() {
        let mut link = MockLink::new(vec![data(1, 0x11), data(2, 0x22), eot()]);
        let mut sink = RecordingSink {
            fail_attempt: Some(1),
            ..Default::default()
        };

        let result = XmodemReceiver::new(&mut link, &mut sink).download_and_program(BASE);

        match &result {
            Err(Error::ProgramFailed {
                address,
                block,
                blocks_written,
                ..
            }) => {
                assert_eq!(*address, BASE);
                assert_eq!(*block, 1);
                assert_eq!(*blocks_written, 0);
            },
            other => panic!("expected ProgramFailed, got {other:?}"),
        }
        assert_eq!(TerminalStatus::from_result(&result), TerminalStatus::ProgramFailed);
        assert_eq!(link.sent(), vec![control::NAK, control::NAK, control::CAN]);
        // Nothing after the cancel
        assert_eq!(link.ops.last(), Some(&Op::Sent(control::CAN)));
        assert_eq!(link.replies.len(), 2);
        assert!(sink.writes.is_empty());
    }

    #[test]
    fn test_program_failure_mid_transfer_reports_progress_so_far() {
        let mut link = MockLink::new(vec![data(1, 1), data(2, 2), data(3, 3), eot()]);
        let mut sink = RecordingSink {
            fail_attempt: Some(3),
            ..Default::default()
        };

        let err = XmodemReceiver::new(&mut link, &mut sink)
            .download_and_program(BASE)
            .unwrap_err();

        assert_eq!(err.blocks_written(), Some(2));
        assert!(matches!(
            err,
            Error::ProgramFailed { address, block: 3, .. } if address == BASE + 256
        ));
    }

    #[test]
    fn test_comms_error_is_fatal_without_retry() {
        let mut link = MockLink::new(vec![Reply::Fail, data(1, 0), eot()]);
        let mut sink = RecordingSink::default();

        let result = XmodemReceiver::new(&mut link, &mut sink).download_and_program(BASE);

        assert!(matches!(result, Err(Error::Comms { .. })));
        assert_eq!(TerminalStatus::from_result(&result), TerminalStatus::CommsError);
        assert_eq!(link.receive_timeouts().len(), 1);
        assert_eq!(link.sent(), vec![control::NAK]);
    }

    #[test]
    fn test_steady_state_uses_short_timeout() {
        let mut link = MockLink::new(vec![data(1, 0x10)]);
        let mut sink = RecordingSink::default();

        let err = XmodemReceiver::new(&mut link, &mut sink)
            .download_and_program(BASE)
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Timeout {
                attempts: 10,
                blocks_written: 1
            }
        ));
        let timeouts = link.receive_timeouts();
        assert_eq!(timeouts.len(), 11);
        assert_eq!(timeouts[0], Duration::from_secs(10));
        assert!(timeouts[1..].iter().all(|&t| t == Duration::from_secs(1)));
    }

    #[test]
    fn test_timeouts_before_first_frame_do_not_resend_nak() {
        let mut link = MockLink::new(vec![Reply::Timeout, Reply::Timeout, data(1, 0x77), eot()]);
        let mut sink = RecordingSink::default();

        XmodemReceiver::new(&mut link, &mut sink)
            .download_and_program(BASE)
            .unwrap();

        assert_eq!(link.sent(), vec![control::NAK, control::ACK, control::ACK]);
        assert_eq!(
            link.receive_timeouts(),
            vec![
                Duration::from_secs(10),
                Duration::from_secs(10),
                Duration::from_secs(10),
                Duration::from_secs(1),
            ]
        );
    }

    #[test]
    fn test_retry_budget_resets_per_frame() {
        let mut replies: Vec<Reply> = (0..9).map(|_| Reply::Timeout).collect();
        replies.push(data(1, 0x01));
        replies.extend((0..9).map(|_| Reply::Timeout));
        replies.push(eot());
        let mut link = MockLink::new(replies);
        let mut sink = RecordingSink::default();

        let summary = XmodemReceiver::with_config(&mut link, &mut sink, fast_config())
            .download_and_program(BASE)
            .unwrap();

        assert_eq!(summary.blocks_written, 1);
    }

    #[test]
    fn test_bad_checksum_is_nakked_then_resend_accepted() {
        let mut link = MockLink::new(vec![
            corrupt(1, 0x20, FRAME_LEN - 1, 0xFF),
            data(1, 0x20),
            eot(),
        ]);
        let mut sink = RecordingSink::default();

        let summary = XmodemReceiver::new(&mut link, &mut sink)
            .download_and_program(BASE)
            .unwrap();

        assert_eq!(
            link.sent(),
            vec![control::NAK, control::NAK, control::ACK, control::ACK]
        );
        assert_eq!(sink.writes, vec![(BASE, vec![0x20; PAYLOAD_LEN])]);
        assert_eq!(summary.rejected, 1);
    }

    #[test]
    fn test_each_validation_failure_leaves_state_untouched() {
        let rejects = vec![
            corrupt(1, 0x30, 0, 0x02),              // bad marker
            corrupt(1, 0x30, 2, 0x00),              // bad complement
            corrupt(1, 0x30, 50, 0x31),             // bad checksum
            data(3, 0x30),                          // expected + 2
            data(2, 0x30),                          // expected + 1
            Reply::Bytes(vec![control::SOH, 1, 0xFE]), // truncated
        ];
        let count = rejects.len();
        let mut replies = rejects;
        replies.push(data(1, 0x30));
        replies.push(eot());

        let mut link = MockLink::new(replies);
        let mut sink = RecordingSink::default();

        let summary = XmodemReceiver::new(&mut link, &mut sink)
            .download_and_program(BASE)
            .unwrap();

        let mut expected = vec![control::NAK];
        expected.extend(std::iter::repeat_n(control::NAK, count));
        expected.extend([control::ACK, control::ACK]);
        assert_eq!(link.sent(), expected);

        // The accepted block still went to the base address as block 1
        assert_eq!(sink.writes, vec![(BASE, vec![0x30; PAYLOAD_LEN])]);
        assert_eq!(summary.rejected as usize, count);
        assert_eq!(summary.end_address, BASE + 128);
    }

    #[test]
    fn test_block_zero_before_first_block_is_acked_without_write() {
        let mut link = MockLink::new(vec![data(0, 0x00), data(1, 0x01), eot()]);
        let mut sink = RecordingSink::default();

        let summary = XmodemReceiver::new(&mut link, &mut sink)
            .download_and_program(BASE)
            .unwrap();

        assert_eq!(summary.duplicates, 1);
        assert_eq!(sink.writes, vec![(BASE, vec![0x01; PAYLOAD_LEN])]);
    }

    #[test]
    fn test_block_numbers_wrap_past_255() {
        let total: u32 = 300;
        let mut replies: Vec<Reply> = (1..=total)
            .map(|i| {
                let mut payload = [0u8; PAYLOAD_LEN];
                payload[..4].copy_from_slice(&i.to_le_bytes());
                Reply::Bytes(Frame::data(i as u8, &payload).as_bytes().to_vec())
            })
            .collect();
        replies.push(eot());

        let region = FlashRegion::new(BASE, total * PAYLOAD_LEN as u32);
        let mut flash = MemoryFlash::new(region);
        let mut link = MockLink::new(replies);

        let summary = XmodemReceiver::new(&mut link, &mut flash)
            .download_and_program(BASE)
            .unwrap();

        assert_eq!(summary.blocks_written, total);
        assert_eq!(flash.write_count(), total);
        for i in [1u32, 255, 256, 257, 300] {
            let address = BASE + (i - 1) * PAYLOAD_LEN as u32;
            assert_eq!(flash.read(address, 4).unwrap(), &i.to_le_bytes()[..]);
        }
    }

    #[test]
    fn test_writing_over_programmed_flash_is_program_failure() {
        let region = FlashRegion::new(BASE, 0x400);
        let mut flash = MemoryFlash::new(region);
        flash.program(BASE + 128, &[0; PAYLOAD_LEN]).unwrap();

        let mut link = MockLink::new(vec![data(1, 1), data(2, 2), eot()]);
        let err = XmodemReceiver::new(&mut link, &mut flash)
            .download_and_program(BASE)
            .unwrap_err();

        assert_eq!(err.status(), TerminalStatus::ProgramFailed);
        assert_eq!(
            link.sent(),
            vec![control::NAK, control::ACK, control::NAK, control::CAN]
        );
    }

    #[test]
    fn test_progress_reported_per_committed_block() {
        let mut link = MockLink::new(vec![data(1, 1), data(1, 1), data(2, 2), eot()]);
        let mut sink = RecordingSink::default();
        let mut seen = Vec::new();

        XmodemReceiver::new(&mut link, &mut sink)
            .download_and_program_with_progress(BASE, |p| {
                seen.push((p.block, p.address, p.bytes_written));
            })
            .unwrap();

        assert_eq!(seen, vec![(1, BASE, 128), (2, BASE + 128, 256)]);
    }

    #[test]
    fn test_terminal_status_codes() {
        assert_eq!(TerminalStatus::Success.code(), 0);
        assert_eq!(TerminalStatus::AddressError.code(), 1);
        assert_eq!(TerminalStatus::CommsError.code(), 2);
        assert_eq!(TerminalStatus::Timeout.code(), 3);
        assert_eq!(TerminalStatus::ProgramFailed.code(), 4);
        assert_eq!(TerminalStatus::ProgramFailed.to_string(), "programming failure");
    }

    #[test]
    fn test_download_into_image_file_with_verify() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.bin");
        let region = FlashRegion::new(BASE, 0x1000);

        let mut image = crate::target::ImageFile::create(&path, region)
            .unwrap()
            .with_verify(true);
        let mut link = MockLink::new(vec![data(1, 0xA1), data(2, 0xA2), data(2, 0xA2), eot()]);

        let summary = XmodemReceiver::new(&mut link, &mut image)
            .download_and_program(BASE)
            .unwrap();
        assert_eq!(summary.blocks_written, 2);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(image.finish(true).unwrap(), 256);

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes[..128].iter().all(|&b| b == 0xA1));
        assert!(bytes[128..].iter().all(|&b| b == 0xA2));
    }

    #[test]
    fn test_failed_ack_send_ends_transfer_as_comms_error() {
        // send 1 is the kick-off NAK, send 2 the ACK for block 1
        let mut link = MockLink::failing_send(vec![data(1, 0x11), data(2, 0x22), eot()], 2);
        let mut sink = RecordingSink::default();

        let mut receiver = XmodemReceiver::new(&mut link, &mut sink);
        let err = receiver.download_and_program(BASE).unwrap_err();
        assert_eq!(receiver.state(), ReceiveState::Failed);

        assert_eq!(err.status(), TerminalStatus::CommsError);
        assert!(matches!(err, Error::Comms { blocks_written: 1, .. }));
        assert_eq!(sink.writes.len(), 1);
        assert_eq!(link.sent(), vec![control::NAK]);
        assert_eq!(link.receive_count(), 1);
    }

    #[test]
    fn test_failed_nak_send_ends_transfer_as_comms_error() {
        let rejected = corrupt(1, 0x11, FRAME_LEN - 1, 0xFF);
        let mut link = MockLink::failing_send(vec![rejected, eot()], 2);
        let mut sink = RecordingSink::default();

        let err = XmodemReceiver::new(&mut link, &mut sink)
            .download_and_program(BASE)
            .unwrap_err();

        assert!(matches!(err, Error::Comms { blocks_written: 0, .. }));
        assert!(sink.writes.is_empty());
        assert_eq!(link.receive_count(), 1);
    }

    #[test]
    fn test_failed_cancel_send_keeps_program_failure() {
        let mut link = MockLink::failing_send(vec![data(1, 0x11), eot()], 2);
        let mut sink = RecordingSink {
            fail_attempt: Some(1),
            ..Default::default()
        };

        let err = XmodemReceiver::new(&mut link, &mut sink)
            .download_and_program(BASE)
            .unwrap_err();

        assert_eq!(err.status(), TerminalStatus::ProgramFailed);
        assert!(matches!(err, Error::ProgramFailed { block: 1, .. }));
        // The cancel NAK failed, so CAN was never attempted
        assert_eq!(link.sent(), vec![control::NAK]);
        assert_eq!(link.receive_count(), 1);
    }

    #[test]
    fn test_link_failure_after_commits_reports_blocks_written() {
        let mut link = MockLink::new(vec![data(1, 1), data(2, 2), Reply::Fail, eot()]);
        let mut sink = RecordingSink::default();

        let err = XmodemReceiver::new(&mut link, &mut sink)
            .download_and_program(BASE)
            .unwrap_err();

        assert_eq!(err.status(), TerminalStatus::CommsError);
        assert!(matches!(err, Error::Comms { blocks_written: 2, .. }));
        assert_eq!(err.blocks_written(), Some(2));
        assert_eq!(link.sent(), vec![control::NAK, control::ACK, control::ACK]);
    }

    #[test]
    fn test_state_tracks_last_download() {
        let mut link = MockLink::new(vec![data(1, 1), eot()]);
        let mut sink = RecordingSink::default();

        let mut receiver = XmodemReceiver::new(&mut link, &mut sink);
        assert_eq!(receiver.state(), ReceiveState::AwaitingFirstFrame);
        receiver.download_and_program(BASE).unwrap();
        assert_eq!(receiver.state(), ReceiveState::Completed);
    }
}
