// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-channel receiver: wires the filter, demodulators, tuning plane,
//! and status codec into the four-thread concurrency model of §5 —
//! input, status-in, demod, and status-out — cooperating through block-
//! boundary condition variables and a shutdown flag instead of ambient
//! thread cancellation.

use crate::channel::ChannelSlice;
use crate::config::ReceiverConfig;
use crate::demod::am::AmDemod;
use crate::demod::fm::FmDemod;
use crate::demod::linear::{LinearDemod, OutputMode};
use crate::demod::{Agc, DemodType};
use crate::filter::{Filter, InputDomain, OutputDomain};
use crate::rtp::{RtpHeader, RtpState, SequenceOutcome};
use crate::sample::Sample;
use crate::status::{self, FrontEndReport, StatusEmitter};
use crate::tuning::{FrontEnd, TuningController};

use log::{debug, info, warn};
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Cooperative mode hand-off (§5 item 3): the active demod parks here at
/// its next block boundary when the type changes; no two demods run at
/// once.
struct ModeControl {
    current: Mutex<DemodType>,
    changed: Condvar,
}

impl ModeControl {
    fn new(initial: DemodType) -> Self {
        ModeControl {
            current: Mutex::new(initial),
            changed: Condvar::new(),
        }
    }

    fn set(&self, t: DemodType) {
        let mut g = self.current.lock().unwrap();
        if *g != t {
            *g = t;
            self.changed.notify_all();
        }
    }

    fn get(&self) -> DemodType {
        *self.current.lock().unwrap()
    }
}

/// A bounded queue of post-filter blocks, handed from the demod-agnostic
/// pipeline stage to whichever demod thread is currently active.
struct BlockQueue {
    blocks: Mutex<std::collections::VecDeque<Vec<Sample>>>,
    ready: Condvar,
}

impl BlockQueue {
    fn new() -> Self {
        BlockQueue {
            blocks: Mutex::new(std::collections::VecDeque::new()),
            ready: Condvar::new(),
        }
    }

    fn push(&self, block: Vec<Sample>) {
        let mut q = self.blocks.lock().unwrap();
        q.push_back(block);
        self.ready.notify_one();
    }

    /// Blocks until a block is available or `shutdown` is observed, using
    /// a timeout so the shutdown flag is polled only at a block boundary,
    /// never mid-sample.
    fn pop(&self, shutdown: &AtomicBool) -> Option<Vec<Sample>> {
        let mut q = self.blocks.lock().unwrap();
        loop {
            if let Some(b) = q.pop_front() {
                return Some(b);
            }
            if shutdown.load(Ordering::Relaxed) {
                return None;
            }
            let (g, _) = self.ready.wait_timeout(q, Duration::from_millis(100)).unwrap();
            q = g;
        }
    }
}

/// One channel's full demodulator set; only one is driven per block,
/// selected by the active `DemodType` (§5 item 3).
struct Demodulators {
    am: AmDemod,
    fm: FmDemod,
    linear: LinearDemod,
}

/// Everything one receiver channel owns: tuning plane, filter, channel
/// slice, demodulator set, and status codec state.
pub struct Receiver {
    config: Mutex<ReceiverConfig>,
    tuning: Arc<TuningController>,
    channel: Mutex<ChannelSlice>,
    filter: Mutex<Filter>,
    demods: Mutex<Demodulators>,
    mode: ModeControl,
    status_table: Mutex<StatusEmitter>,
    front_end_report: Mutex<FrontEndReport>,
    input_rtp: Mutex<RtpState>,
    output_rtp: Mutex<RtpState>,
    shutdown: Arc<AtomicBool>,
    block_queue: Arc<BlockQueue>,
    /// Accumulates arbitrary-sized input chunks (RTP payloads rarely land
    /// on an exact filter block boundary) until `block_size` samples are
    /// ready, mirroring the original filter's own input-side buffering.
    input_buffer: Mutex<Vec<Sample>>,
    block_size: usize,
}

impl Receiver {
    pub fn new(config: ReceiverConfig, front_end: Arc<dyn FrontEnd>) -> Arc<Self> {
        let tuning = Arc::new(TuningController::new(
            config.input_samprate,
            -config.input_samprate / 2.0 + 1000.0,
            config.input_samprate / 2.0 - 1000.0,
            front_end,
        ));
        tuning.set_passband_width((config.high_edge - config.low_edge) as f64);

        let channel = ChannelSlice::new(tuning.second_lo_oscillator());

        let filter = Filter::new(
            config.block_size,
            config.impulse_length,
            config.decimation,
            InputDomain::Complex,
            if config.independent_sideband { OutputDomain::CrossConj } else { OutputDomain::Real },
        );

        let agc = Agc::new(
            10f64.powf(config.headroom_db as f64 / 20.0),
            config.agc_hangtime_secs as f64,
            config.output_samprate,
            config.agc_recovery_db_per_sec as f64,
            config.agc_attack_db_per_sec as f64,
        );

        let demods = Demodulators {
            am: AmDemod::new(
                config.output_samprate,
                10f64.powf(config.headroom_db as f64 / 20.0),
                config.agc_hangtime_secs as f64,
                config.agc_recovery_db_per_sec as f64,
            ),
            fm: FmDemod::new(
                config.output_samprate,
                config.low_edge as f64,
                config.high_edge as f64,
                10f64.powf(config.headroom_db as f64 / 20.0),
                config.fm_flat,
            ),
            linear: LinearDemod::new(
                config.output_samprate,
                if config.independent_sideband {
                    OutputMode::Isb
                } else if config.output_channels == 2 {
                    OutputMode::Stereo
                } else {
                    OutputMode::Mono
                },
                tuning.shift_oscillator(),
                agc,
            ),
        };

        let demod_type = config.demod_type;
        let block_size = config.block_size;

        Arc::new(Receiver {
            config: Mutex::new(config),
            tuning,
            channel: Mutex::new(channel),
            filter: Mutex::new(filter),
            demods: Mutex::new(demods),
            mode: ModeControl::new(demod_type),
            status_table: Mutex::new(StatusEmitter::new()),
            front_end_report: Mutex::new(FrontEndReport::new()),
            input_rtp: Mutex::new(RtpState::new()),
            output_rtp: Mutex::new(RtpState::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            block_queue: Arc::new(BlockQueue::new()),
            input_buffer: Mutex::new(Vec::new()),
            block_size,
        })
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn set_demod_type(&self, t: DemodType) {
        self.mode.set(t);
    }

    /// Decode one raw I/Q block already demultiplexed to this channel's
    /// SSRC and push it through the channel slice + filter stage. This is
    /// the body of the "input thread" loop; kept callable directly so
    /// tests can drive it without a real socket.
    pub fn ingest_block(&self, mut samples: Vec<Sample>) {
        self.channel.lock().unwrap().process_block(&mut samples);

        let mut buffer = self.input_buffer.lock().unwrap();
        buffer.extend(samples);
        while buffer.len() >= self.block_size {
            let rest = buffer.split_off(self.block_size);
            let ready = std::mem::replace(&mut *buffer, rest);
            let out = self.filter.lock().unwrap().execute(&ready);
            if !out.is_empty() {
                self.block_queue.push(out);
            }
        }
    }

    /// Body of the demod thread: consumes one post-filter block with
    /// whichever demodulator is currently selected and returns the PCM
    /// audio to send. Returns `None` once shutdown is observed.
    pub fn demodulate_next(&self) -> Option<(Vec<f64>, u8)> {
        let block = self.block_queue.pop(&self.shutdown)?;
        let active = self.mode.get();
        let mut demods = self.demods.lock().unwrap();
        let out = match active {
            DemodType::Am => demods.am.demodulate(&block),
            DemodType::Fm => demods.fm.demodulate(&block),
            DemodType::Linear => demods.linear.demodulate(&block),
        };
        Some((out.audio, out.channels))
    }

    /// Body of the status-in thread: decode one command packet and apply
    /// it, forcing the next status emit.
    pub fn apply_command_packet(self: &Arc<Self>, body: &[u8]) -> crate::error::Result<()> {
        status::apply_command(self.as_ref(), body)?;
        self.status_table.lock().unwrap().note_command_applied();
        Ok(())
    }

    /// Records a front end's own status report (received on the same
    /// status-in socket, tagged as a status rather than a command packet)
    /// so its fields merge into this channel's next emit.
    pub fn ingest_front_end_report(&self, body: &[u8]) -> crate::error::Result<()> {
        self.front_end_report.lock().unwrap().ingest(body)
    }

    /// Body of the status-out thread: build one status packet from the
    /// current tuning/signal snapshot. Called at 10 Hz.
    pub fn build_status_packet(&self) -> Vec<u8> {
        let mut fields = Vec::new();
        let tag = |t: crate::status::table::Tag| t as u8;
        use crate::status::codec;

        {
            let mut b = Vec::new();
            codec::encode_f64(&mut b, tag(crate::status::table::Tag::RadioFrequency), self.tuning.freq());
            fields.push((tag(crate::status::table::Tag::RadioFrequency), b));
        }
        {
            let mut b = Vec::new();
            codec::encode_f64(&mut b, tag(crate::status::table::Tag::FirstLoFrequency), self.tuning.first_lo());
            fields.push((tag(crate::status::table::Tag::FirstLoFrequency), b));
        }
        {
            let mut b = Vec::new();
            codec::encode_f64(&mut b, tag(crate::status::table::Tag::SecondLoFrequency), self.tuning.second_lo());
            fields.push((tag(crate::status::table::Tag::SecondLoFrequency), b));
        }

        let input_rtp = self.input_rtp.lock().unwrap().clone();
        let output_rtp = self.output_rtp.lock().unwrap().clone();
        for (t, count) in [
            (crate::status::table::Tag::InputPackets, input_rtp.packets),
            (crate::status::table::Tag::InputDrops, input_rtp.drops),
            (crate::status::table::Tag::InputDupes, input_rtp.dupes),
            (crate::status::table::Tag::OutputPackets, output_rtp.packets),
        ] {
            let mut b = Vec::new();
            codec::encode_u64(&mut b, tag(t), count);
            fields.push((tag(t), b));
        }

        // Signal power and noise-density meters (SPEC_FULL §11): if_power
        // and baseband_power are sampled straight from the channel slice,
        // noise_density derives from the filter's own passband integral.
        let if_power = self.channel.lock().unwrap().if_power();
        let baseband_power = self.channel.lock().unwrap().baseband_power();
        let nbw = self.filter.lock().unwrap().noise_bandwidth(self.config.lock().unwrap().input_samprate);
        let noise_density = if nbw > 0.0 { baseband_power / nbw } else { 0.0 };
        for (t, value) in [
            (crate::status::table::Tag::IfPower, if_power),
            (crate::status::table::Tag::BasebandPower, baseband_power),
            (crate::status::table::Tag::NoiseDensity, noise_density),
            (crate::status::table::Tag::NoiseBandwidth, nbw),
        ] {
            let mut b = Vec::new();
            codec::encode_f64(&mut b, tag(t), value);
            fields.push((tag(t), b));
        }

        {
            let demods = self.demods.lock().unwrap();
            let (snr, pl_tone) = match self.mode.get() {
                DemodType::Am => (0.0, 0.0),
                DemodType::Fm => (demods.fm.snr(), demods.fm.pl_tone()),
                DemodType::Linear => (demods.linear.snr(), 0.0),
            };
            let mut b = Vec::new();
            codec::encode_f64(&mut b, tag(crate::status::table::Tag::DemodSnr), snr);
            fields.push((tag(crate::status::table::Tag::DemodSnr), b));

            let mut b = Vec::new();
            codec::encode_f64(&mut b, tag(crate::status::table::Tag::PlTone), pl_tone);
            fields.push((tag(crate::status::table::Tag::PlTone), b));
        }

        fields.extend(self.front_end_report.lock().unwrap().fields().iter().cloned());

        self.status_table.lock().unwrap().emit(&fields)
    }

    /// Spawn the four worker threads against real UDP sockets and return
    /// their join handles. Threads terminate when `request_shutdown` is
    /// called; each checks the flag only at a block boundary (§5).
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        self: &Arc<Self>,
        data_in: UdpSocket,
        data_out: UdpSocket,
        data_out_addr: std::net::SocketAddr,
        status_in: UdpSocket,
        status_out: UdpSocket,
        status_out_addr: std::net::SocketAddr,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let receiver = self.clone();
        data_in.set_read_timeout(Some(Duration::from_millis(100))).ok();
        handles.push(std::thread::spawn(move || input_thread(receiver, data_in)));

        let receiver = self.clone();
        status_in.set_read_timeout(Some(Duration::from_millis(100))).ok();
        handles.push(std::thread::spawn(move || status_in_thread(receiver, status_in)));

        let receiver = self.clone();
        handles.push(std::thread::spawn(move || demod_thread(receiver, data_out, data_out_addr)));

        let receiver = self.clone();
        handles.push(std::thread::spawn(move || status_out_thread(receiver, status_out, status_out_addr)));

        handles
    }
}

fn input_thread(receiver: Arc<Receiver>, socket: UdpSocket) {
    let mut buf = vec![0u8; 65536];
    while !receiver.shutdown.load(Ordering::Relaxed) {
        let n = match socket.recv(&mut buf) {
            Ok(n) => n,
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) => {
                warn!("input socket error: {e}");
                continue;
            }
        };
        let (header, offset) = match RtpHeader::decode(&buf[..n]) {
            Ok(v) => v,
            Err(e) => {
                warn!("dropping malformed RTP packet: {e}");
                continue;
            }
        };
        let payload = &buf[offset..n];
        let samples = decode_iq16(payload);

        let outcome = receiver.input_rtp.lock().unwrap().process(&header, samples.len() as u32);
        match outcome {
            SequenceOutcome::Drop => continue,
            SequenceOutcome::Gap { samples: gap } => {
                debug!("input gap of {gap} samples");
                receiver.ingest_block(vec![Sample::new(0.0, 0.0); gap as usize]);
                receiver.ingest_block(samples);
            }
            SequenceOutcome::InSequence => receiver.ingest_block(samples),
        }
    }
    info!("input thread exiting");
}

fn decode_iq16(payload: &[u8]) -> Vec<Sample> {
    payload
        .chunks_exact(4)
        .map(|c| {
            let i = i16::from_be_bytes([c[0], c[1]]) as f64 / 32768.0;
            let q = i16::from_be_bytes([c[2], c[3]]) as f64 / 32768.0;
            Sample::new(i, q)
        })
        .collect()
}

fn status_in_thread(receiver: Arc<Receiver>, socket: UdpSocket) {
    let mut buf = vec![0u8; 4096];
    while !receiver.shutdown.load(Ordering::Relaxed) {
        let n = match socket.recv(&mut buf) {
            Ok(n) => n,
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) => {
                warn!("status-in socket error: {e}");
                continue;
            }
        };
        if n == 0 {
            continue;
        }
        match buf[0] {
            status::DIRECTION_COMMAND => {
                if let Err(e) = receiver.apply_command_packet(&buf[1..n]) {
                    warn!("rejecting malformed command packet: {e}");
                }
            }
            status::DIRECTION_STATUS => {
                if let Err(e) = receiver.ingest_front_end_report(&buf[1..n]) {
                    warn!("rejecting malformed front-end report: {e}");
                }
            }
            _ => {}
        }
    }
    info!("status-in thread exiting");
}

/// Encodes demodulated audio as 16-bit PCM RTP packets and sends them to
/// `dest`. The output SSRC is derived from the process id since a single
/// channel only ever originates one output stream per run (§4.J, §6
/// output-framing group).
fn demod_thread(receiver: Arc<Receiver>, socket: UdpSocket, dest: std::net::SocketAddr) {
    let ssrc = std::process::id();
    let mut sequence: u16 = 0;
    let mut timestamp: u32 = 0;
    while let Some((audio, channels)) = receiver.demodulate_next() {
        if receiver.shutdown.load(Ordering::Relaxed) {
            break;
        }
        if audio.is_empty() {
            continue;
        }

        let payload_type = if channels >= 2 { crate::rtp::PT_PCM_STEREO } else { crate::rtp::PT_PCM_MONO };
        let header = RtpHeader::new(payload_type, sequence, timestamp, ssrc);
        let mut packet = header.encode();
        packet.extend(encode_pcm16(&audio));

        if let Err(e) = socket.send_to(&packet, dest) {
            warn!("data-out send failed: {e}");
        }
        receiver.output_rtp.lock().unwrap().packets += 1;

        sequence = sequence.wrapping_add(1);
        timestamp = timestamp.wrapping_add((audio.len() / channels.max(1) as usize) as u32);
    }
    info!("demod thread exiting");
}

/// Clamps and scales demodulated audio (already AGC-leveled to roughly
/// [-1, 1]) into big-endian 16-bit PCM, matching §6's output payload
/// format.
fn encode_pcm16(audio: &[f64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(audio.len() * 2);
    for &sample in audio {
        let clamped = sample.clamp(-1.0, 1.0);
        let pcm = (clamped * i16::MAX as f64) as i16;
        out.extend_from_slice(&pcm.to_be_bytes());
    }
    out
}

fn status_out_thread(receiver: Arc<Receiver>, socket: UdpSocket, dest: std::net::SocketAddr) {
    while !receiver.shutdown.load(Ordering::Relaxed) {
        let packet = receiver.build_status_packet();
        if let Err(e) = socket.send_to(&packet, dest) {
            warn!("status-out send failed: {e}");
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    info!("status-out thread exiting");
}

impl status::CommandSink for Receiver {
    fn apply_radio_frequency(&self, hz: f64) {
        self.tuning.set_freq(hz);
    }

    fn apply_first_lo(&self, hz: f64) {
        self.tuning.confirm_first_lo(hz, self.tuning.freq());
    }

    fn apply_second_lo_if_in_range(&self, hz: f64) -> bool {
        if self.tuning.lo2_in_range(hz, 0.0) {
            self.tuning.set_freq(self.tuning.first_lo() * (1.0 + self.tuning.calibration()) - hz);
            true
        } else {
            false
        }
    }

    fn set_shift(&self, hz: f64) {
        self.tuning.set_shift(hz);
    }

    fn set_doppler(&self, hz: f64, rate: f64) {
        self.tuning.set_doppler(hz, rate);
    }

    fn set_calibrate(&self, cal: f64) {
        self.tuning.set_calibration(cal);
    }

    fn set_passband(&self, low: f32, high: f32) {
        let mut cfg = self.config.lock().unwrap();
        if low.is_finite() {
            cfg.low_edge = low;
        }
        if high.is_finite() {
            cfg.high_edge = high;
        }
        self.filter.lock().unwrap().set_passband(cfg.low_edge as f64, cfg.high_edge as f64, cfg.kaiser_beta as f64, cfg.input_samprate);
    }

    fn set_kaiser_beta(&self, beta: f32) {
        let mut cfg = self.config.lock().unwrap();
        cfg.kaiser_beta = beta;
        self.filter.lock().unwrap().set_passband(cfg.low_edge as f64, cfg.high_edge as f64, beta as f64, cfg.input_samprate);
    }

    fn set_demod_type(&self, t: u8) {
        self.set_demod_type(if t == 1 { DemodType::Fm } else { DemodType::Linear });
    }

    fn set_independent_sideband(&self, on: bool) {
        self.config.lock().unwrap().independent_sideband = on;
    }

    fn set_pll_enable(&self, on: bool) {
        self.demods.lock().unwrap().linear.set_pll_enabled(on);
    }

    fn set_pll_square(&self, on: bool) {
        self.demods.lock().unwrap().linear.set_square(on);
    }

    fn set_fm_flat(&self, _on: bool) {
        // FM flat/de-emphasis mode is fixed at construction time for now;
        // retuning it live would require rebuilding FmDemod's state.
    }

    fn set_envelope(&self, on: bool) {
        let mut d = self.demods.lock().unwrap();
        d.linear.set_output_mode(if on { OutputMode::Envelope } else { OutputMode::Mono });
    }

    fn set_agc_enable(&self, on: bool) {
        self.demods.lock().unwrap().linear.set_agc_enabled(on);
    }

    fn set_headroom(&self, db: f32) {
        // Headroom is baked into each demod's AGC at construction time;
        // live retuning would need the AGC to expose a setter. Tracked in
        // DESIGN.md as a follow-up rather than implemented here.
        self.config.lock().unwrap().headroom_db = db;
    }

    fn set_agc_hangtime(&self, _secs: f32) {}
    fn set_agc_recovery_rate(&self, _db_per_sec: f32) {}
    fn set_agc_attack_rate(&self, _db_per_sec: f32) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuning::MockFrontEnd;

    fn make_receiver() -> Arc<Receiver> {
        let fe = Arc::new(MockFrontEnd::new());
        let cfg = ReceiverConfig {
            block_size: 256,
            impulse_length: 65,
            decimation: 1,
            ..ReceiverConfig::default()
        };
        Receiver::new(cfg, fe)
    }

    #[test]
    fn ingest_and_demodulate_one_block_round_trip() {
        let receiver = make_receiver();
        receiver.filter.lock().unwrap().set_passband(-8_000.0, 8_000.0, 3.0, 192_000.0);
        receiver.set_demod_type(DemodType::Fm);

        let samples: Vec<Sample> = (0..256).map(|i| Sample::new((0.01 * i as f64).cos(), (0.01 * i as f64).sin())).collect();
        receiver.ingest_block(samples);

        let out = receiver.demodulate_next();
        assert!(out.is_some());
    }

    #[test]
    fn status_packet_carries_direction_byte() {
        let receiver = make_receiver();
        let packet = receiver.build_status_packet();
        assert_eq!(packet[0], status::DIRECTION_STATUS);
    }
}
