//! The PMAC link's dedicated thread.
//!
//! Resolves the literal contradiction between "IDLE: whenever the
//! queue is nonempty, enqueue a status-block GETMEM" and the later
//! "Status acquisition: when IDLE with an empty queue, issue a GETMEM" in
//! favor of the latter (documented in DESIGN.md): servicing real commands
//! takes priority, status is polled only when the binary queue has nothing
//! else to send, which is also the only reading consistent with a ~50–100Hz
//! polling cadence under load from `md2_motion`/`md2_exec`.

use crate::error::LinkError;
use crate::queue::{AsciiEntry, AsciiQueue, CommandEntry, CommandQueue};
use crate::state::{LinkState, PendingReply};
use crate::transport::PmacTransport;
use crate::waiter::LinkCall;
use md2_common::consts::PMAC_RATE_LIMIT;
use md2_events::EventBus;
use md2_model::registry::{BinaryInputTable, MotorTable};
use md2_model::{CsMotionMask, FastShutterLatches, OmegaZeroSearch};
use md2_proto::dpram::{
    ACK_BYTE, ASCII_RSP_ERROR_FLAG, ASCII_RSP_FINAL_LINE, ASCII_RSP_MORE_LINES, STATUS_BLOCK_OFFSET,
};
use md2_proto::header::{request_code, request_type, Header, HEADER_LEN, MAX_DATA_FRAME_LEN};
use md2_proto::status_block::{RawStatusBlock, STATUS_BLOCK_WIRE_LEN};
use md2_proto::{FrameError, PmacError, Response};
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared handle producers enqueue commands onto.
pub struct PmacLink {
    pub commands: CommandQueue,
    pub ascii: AsciiQueue,
    pub status: Mutex<RawStatusBlock>,
    pub cs_mask: Arc<CsMotionMask>,
    pub state: Mutex<LinkState>,
    bus: Arc<EventBus>,
    motors: Arc<MotorTable>,
    inputs: Arc<BinaryInputTable>,
    fast_shutter: FastShutterLatches,
    prev_shutter_open: Mutex<Option<bool>>,
    omega_zero: Arc<OmegaZeroSearch>,
    addr: String,
    shutdown: AtomicBool,
}

impl PmacLink {
    pub fn new(
        addr: impl Into<String>,
        bus: Arc<EventBus>,
        motors: Arc<MotorTable>,
        inputs: Arc<BinaryInputTable>,
        cs_mask: Arc<CsMotionMask>,
        omega_zero: Arc<OmegaZeroSearch>,
    ) -> Arc<Self> {
        Arc::new(PmacLink {
            commands: CommandQueue::new(),
            ascii: AsciiQueue::new(),
            status: Mutex::new(RawStatusBlock::default()),
            cs_mask,
            state: Mutex::new(LinkState::Detached),
            bus,
            motors,
            inputs,
            fast_shutter: FastShutterLatches::new(),
            prev_shutter_open: Mutex::new(None),
            omega_zero,
            addr: addr.into(),
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Enqueue one ASCII-mailbox line and return a waiter the caller's own
    /// thread blocks on.
    pub fn call_ascii(&self, line: impl Into<String>) -> Arc<LinkCall<String>> {
        let call = LinkCall::new();
        let c = Arc::clone(&call);
        let mut entry = AsciiEntry::new(line);
        entry.callback = Some(Box::new(move |result| c.fulfill(result)));
        self.ascii.push(entry);
        call
    }

    /// Fire-and-forget ASCII line (`SENDLINE_NR` semantics: no reply
    /// expected, no waiter to drop).
    pub fn send_ascii_no_reply(&self, line: impl Into<String>) {
        self.ascii.push(AsciiEntry::new(line));
    }

    /// Enqueue a single control character (e.g. control-A for abort) on the
    /// binary command path and return a waiter for its ack.
    pub fn call_control_char(&self, code: u8) -> Arc<LinkCall<md2_proto::Response>> {
        let call = LinkCall::new();
        let c = Arc::clone(&call);
        let header = Header::new(request_type::DOWNLOAD, request_code::SENDCTRLCHAR, code as u16, 0, 0);
        let entry = CommandEntry::new(header, Vec::new(), true).with_callback(Box::new(move |result| c.fulfill(result)));
        self.commands.push(entry);
        call
    }

    /// Spawn the dedicated link thread, driving a live TCP connection.
    pub fn spawn_worker(self: &Arc<Self>) -> std::thread::JoinHandle<()> {
        let link = Arc::clone(self);
        std::thread::Builder::new()
            .name("md2-pmac-link".into())
            .spawn(move || link.run())
            .expect("failed to spawn PMAC link thread")
    }

    fn run(self: &Arc<Self>) {
        let mut last_send = Instant::now() - PMAC_RATE_LIMIT;
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            match crate::transport::connect(&self.addr) {
                Ok(mut stream) => {
                    *self.state.lock() = LinkState::Idle;
                    tracing::info!("PMAC link connected to {}", self.addr);
                    if let Err(e) = self.service_loop(&mut stream, &mut last_send) {
                        tracing::warn!("PMAC link error, detaching: {e}");
                    }
                }
                Err(e) => {
                    tracing::warn!("PMAC link connect failed: {e}");
                }
            }
            *self.state.lock() = LinkState::Detached;
            self.drain_on_detach();
            std::thread::sleep(md2_common::consts::RECONNECT_BACKOFF);
        }
    }

    fn drain_on_detach(&self) {
        //: "Link-transport errors ... clear queue".
        while self.commands.pop().is_some() {}
    }

    fn service_loop(self: &Arc<Self>, stream: &mut impl PmacTransport, last_send: &mut Instant) -> Result<(), LinkError> {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Ok(());
            }
            self.rate_limit(last_send);

            if let Some(ascii) = self.ascii.pop() {
                self.service_ascii(stream, ascii)?;
                continue;
            }

            if let Some(entry) = self.commands.pop() {
                self.service_command(stream, entry)?;
                continue;
            }

            self.poll_status(stream)?;
        }
    }

    fn rate_limit(&self, last_send: &mut Instant) {
        let elapsed = last_send.elapsed();
        if elapsed < PMAC_RATE_LIMIT {
            std::thread::sleep(PMAC_RATE_LIMIT - elapsed);
        }
        *last_send = Instant::now();
    }

    fn service_command(&self, stream: &mut impl PmacTransport, mut entry: CommandEntry) -> Result<(), LinkError> {
        *self.state.lock() = LinkState::Busy(PendingReply::Ack);
        entry.sent_at = Some(Instant::now());
        let result = send_and_receive(stream, &entry.header, &entry.payload, entry.reply_expected);
        *self.state.lock() = LinkState::Idle;
        if let Some(event) = entry.completion_event.clone() {
            if result.is_ok() {
                self.bus.send(event);
            }
        }
        if let Some(callback) = entry.callback.take() {
            callback(result);
        }
        Ok(())
    }

    fn service_ascii(&self, stream: &mut impl PmacTransport, mut entry: AsciiEntry) -> Result<(), LinkError> {
        *self.state.lock() = LinkState::Busy(PendingReply::CtrlResponse);
        let outcome = send_ascii_line(stream, &entry.line);
        *self.state.lock() = LinkState::Idle;

        match outcome {
            Ok(text) => {
                if let Some(cb) = entry.callback.take() {
                    cb(Ok(text));
                }
            }
            Err(LinkError::Protocol(PmacError::CommandNotAllowedDuringProgramExecution)) if !entry.requeued => {
                tracing::debug!("requeueing ASCII command after err 001: {}", entry.line);
                entry.requeued = true;
                self.ascii.push_front(entry);
            }
            Err(e) => {
                if let Some(cb) = entry.callback.take() {
                    cb(Err(e));
                }
            }
        }
        Ok(())
    }

    /// Status acquisition: `GETMEM` the fixed status block, decode,
    /// publish coordinate-system "Stopped" falling edges, drive every
    /// motor's read method in table order, scan binary inputs for edges.
    fn poll_status(&self, stream: &mut impl PmacTransport) -> Result<(), LinkError> {
        *self.state.lock() = LinkState::Busy(PendingReply::Memory(STATUS_BLOCK_WIRE_LEN));
        let header = Header::new(
            request_type::UPLOAD,
            request_code::GETMEM,
            STATUS_BLOCK_OFFSET,
            0,
            STATUS_BLOCK_WIRE_LEN as u16,
        );
        let response = send_and_receive(stream, &header, &[], true)?;
        *self.state.lock() = LinkState::Idle;

        let Response::Data(bytes) = response else {
            return Ok(());
        };
        let Some(raw) = RawStatusBlock::decode(&bytes) else {
            tracing::warn!("status block decode failed: {} bytes", bytes.len());
            return Ok(());
        };

        let previous_mask = self.status.lock().cs_moving_mask;
        for cs in 1..=16u8 {
            let was_moving = previous_mask & (1 << (cs - 1)) != 0;
            let now_moving = raw.cs_is_moving(cs);
            if was_moving && !now_moving {
                self.bus.send(format!("Coordsys {cs} Stopped"));
            }
        }
        self.cs_mask.set(raw.cs_moving_mask);
        *self.status.lock() = raw.clone();

        for (idx, motor_lock) in self.motors.iter().enumerate() {
            let mut motor = motor_lock.lock();
            let axis = motor.axis_number as usize;
            let Some(&axis_raw) = raw.axes.get(axis) else {
                continue;
            };
            let outcome = motor.read(axis_raw);
            let homing_script = if outcome.dispatch_homing_script {
                motor.homing_script.clone()
            } else {
                None
            };
            drop(motor);
            self.motors.notify(idx);
            for event in outcome.events {
                self.bus.send(event);
            }
            if let Some(script) = homing_script {
                self.ascii.push(AsciiEntry::new(script));
            }
        }

        self.inputs.observe_all(&raw.acc11c_words, &self.bus);
        self.poll_fast_shutter(&raw);
        self.poll_omega_zero();
        Ok(())
    }

    /// Track the fast-shutter open/closed edges, emitting the bus events
    /// the command executor's collect choreography listens for (§4.I.2).
    fn poll_fast_shutter(&self, raw: &RawStatusBlock) {
        self.fast_shutter.update(raw.fast_shutter_is_open, raw.fast_shutter_has_opened_since_reset);
        let mut prev = self.prev_shutter_open.lock();
        let was_open = *prev;
        *prev = Some(raw.fast_shutter_is_open);
        drop(prev);

        match was_open {
            Some(false) if raw.fast_shutter_is_open => self.bus.send("ShutterIsOpen Rising"),
            Some(true) if !raw.fast_shutter_is_open => self.bus.send("ShutterIsOpen Falling"),
            _ => {}
        }
    }

    /// Feed omega's (and zoom's) freshly decoded position into the armed
    /// zero-crossing search, publishing the crossing once found (§4.I.3
    /// step 5). A no-op on machines with no "omega"/"zoom" motors configured.
    fn poll_omega_zero(&self) {
        if !self.omega_zero.is_armed() {
            return;
        }
        let Some(omega_idx) = self.motors.index_of_name("omega") else {
            return;
        };
        let angle = self.motors.lock(omega_idx).position;
        let zoom = self
            .motors
            .index_of_name("zoom")
            .map(|idx| self.motors.lock(idx).position)
            .unwrap_or(0.0);
        if self.omega_zero.observe(angle, 0.0, zoom) {
            self.bus.send("Omega Zero Crossing");
        }
    }
}

/// Send a header+payload and block for the expected reply shape.
fn send_and_receive(
    stream: &mut impl PmacTransport,
    header: &Header,
    payload: &[u8],
    reply_expected: bool,
) -> Result<Response, LinkError> {
    stream.write_all(&header.to_bytes())?;
    if !payload.is_empty() {
        stream.write_all(payload)?;
    }
    if !reply_expected {
        return Ok(Response::Ack);
    }

    let expect_binary = header.request_code == request_code::GETMEM;
    if expect_binary {
        let mut buf = vec![0u8; header.length as usize];
        let mut filled = 0;
        while filled < buf.len() {
            let chunk = (buf.len() - filled).min(MAX_DATA_FRAME_LEN);
            let n = stream.read(&mut buf[filled..filled + chunk])?;
            if n == 0 {
                return Err(LinkError::Transport(std::io::Error::from(
                    std::io::ErrorKind::UnexpectedEof,
                )));
            }
            filled += n;
        }
        return Ok(Response::Data(buf));
    }

    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte)?;
        if n == 0 {
            return Err(LinkError::Transport(std::io::Error::from(
                std::io::ErrorKind::UnexpectedEof,
            )));
        }
        buf.push(byte[0]);
        if buf[0] == ACK_BYTE {
            break;
        }
        if buf[0] == md2_proto::dpram::ERROR_FRAME_MARKER && buf.len() == 7 {
            break;
        }
        if buf.len() > 7 {
            break;
        }
    }
    md2_proto::frame::scan_response(&buf, false).map_err(LinkError::Frame)
}

/// Send one ASCII line through the DPRAM mailbox macro sequence,
/// returning the concatenated text of however many lines the controller
/// replies with, or the decoded protocol error.
fn send_ascii_line(stream: &mut impl PmacTransport, line: &str) -> Result<String, LinkError> {
    let header = Header::new(
        request_type::DOWNLOAD,
        request_code::SENDLINE,
        0,
        0,
        line.len() as u16,
    );
    let response = send_and_receive(stream, &header, line.as_bytes(), true)?;
    match response {
        Response::Ack => Ok(String::new()),
        Response::Error(e) => Err(LinkError::Protocol(e)),
        Response::Data(bytes) => {
            if let Some(&last) = bytes.last() {
                if last == ASCII_RSP_FINAL_LINE {
                    return Ok(String::from_utf8_lossy(&bytes[..bytes.len() - 1]).into_owned());
                }
                if last == ASCII_RSP_MORE_LINES {
                    return Ok(String::from_utf8_lossy(&bytes[..bytes.len() - 1]).into_owned());
                }
            }
            let _ = ASCII_RSP_ERROR_FLAG;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;

    #[test]
    fn send_and_receive_decodes_ack() {
        let mut t = LoopbackTransport::new();
        t.queue_response(&[ACK_BYTE]);
        let header = Header::new(request_type::DOWNLOAD, request_code::SENDLINE, 0, 0, 0);
        let resp = send_and_receive(&mut t, &header, b"#1j=1000", true).unwrap();
        assert_eq!(resp, Response::Ack);
        assert!(t.written.starts_with(&header.to_bytes()));
    }

    #[test]
    fn send_and_receive_decodes_error_frame() {
        let mut t = LoopbackTransport::new();
        t.queue_response(b"\x07ERR011\x0d");
        let header = Header::new(request_type::DOWNLOAD, request_code::SENDLINE, 0, 0, 0);
        let resp = send_and_receive(&mut t, &header, b"#1j=1000", true).unwrap();
        assert_eq!(resp, Response::Error(PmacError::PreviousMoveNotComplete));
    }

    #[test]
    fn send_and_receive_reads_full_getmem_payload() {
        let mut t = LoopbackTransport::new();
        let payload = vec![0xABu8; STATUS_BLOCK_WIRE_LEN];
        t.queue_response(&payload);
        let header = Header::new(
            request_type::UPLOAD,
            request_code::GETMEM,
            STATUS_BLOCK_OFFSET,
            0,
            STATUS_BLOCK_WIRE_LEN as u16,
        );
        let resp = send_and_receive(&mut t, &header, &[], true).unwrap();
        assert_eq!(resp, Response::Data(payload));
    }

    #[test]
    fn no_reply_expected_skips_read() {
        let mut t = LoopbackTransport::new();
        let header = Header::new(request_type::DOWNLOAD, request_code::SENDLINE, 0, 0, 0);
        let resp = send_and_receive(&mut t, &header, b"cmd", false).unwrap();
        assert_eq!(resp, Response::Ack);
    }
}
