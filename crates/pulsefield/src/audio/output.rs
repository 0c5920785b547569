use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{Result, bail};
use cpal::Stream;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

/// Ring buffer size (power of 2 for fast modular arithmetic).
const RING_SIZE: usize = 1 << 16;
const RING_MASK: u32 = (RING_SIZE - 1) as u32;

/// Lock-free single-producer single-consumer ring of mono samples. The
/// synthesis timer thread pushes, the device callback pops.
pub struct RingBuffer {
    data: Box<[AtomicU32]>,
    write_pos: AtomicU32,
    read_pos: AtomicU32,
}

impl RingBuffer {
    pub fn new() -> Self {
        Self {
            data: (0..RING_SIZE).map(|_| AtomicU32::new(0)).collect(),
            write_pos: AtomicU32::new(0),
            read_pos: AtomicU32::new(0),
        }
    }

    /// Push samples, dropping whatever does not fit.
    /// Returns the number of samples accepted.
    pub fn push(&self, samples: &[f32]) -> usize {
        let wp = self.write_pos.load(Ordering::Relaxed);
        let rp = self.read_pos.load(Ordering::Acquire);
        let free = RING_SIZE - wp.wrapping_sub(rp) as usize;
        let n = samples.len().min(free);
        for (i, &s) in samples[..n].iter().enumerate() {
            let idx = (wp.wrapping_add(i as u32) & RING_MASK) as usize;
            self.data[idx].store(s.to_bits(), Ordering::Relaxed);
        }
        self.write_pos
            .store(wp.wrapping_add(n as u32), Ordering::Release);
        n
    }

    /// Pop into `dst`, returning how many samples were written.
    pub fn pop(&self, dst: &mut [f32]) -> usize {
        let wp = self.write_pos.load(Ordering::Acquire);
        let rp = self.read_pos.load(Ordering::Relaxed);
        let available = wp.wrapping_sub(rp) as usize;
        let n = available.min(dst.len());
        for (i, out) in dst[..n].iter_mut().enumerate() {
            let idx = (rp.wrapping_add(i as u32) & RING_MASK) as usize;
            *out = f32::from_bits(self.data[idx].load(Ordering::Relaxed));
        }
        self.read_pos
            .store(rp.wrapping_add(n as u32), Ordering::Release);
        n
    }

    pub fn available(&self) -> usize {
        let wp = self.write_pos.load(Ordering::Acquire);
        let rp = self.read_pos.load(Ordering::Relaxed);
        wp.wrapping_sub(rp) as usize
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Default output device playing whatever the timer thread pushes into
/// `ring`. Underruns play silence.
pub struct AudioOutput {
    _stream: Stream,
    pub ring: Arc<RingBuffer>,
    pub sample_rate: u32,
    pub device_name: String,
}

impl AudioOutput {
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow::anyhow!("No audio output device found"))?;

        let device_name = device
            .description()
            .map(|d| d.name().to_string())
            .unwrap_or_else(|_| "Unknown".into());
        log::info!("Audio output device: {device_name}");

        let config = device.default_output_config()?;
        if config.sample_format() != cpal::SampleFormat::F32 {
            bail!(
                "Unsupported output sample format {:?}",
                config.sample_format()
            );
        }
        let sample_rate = config.sample_rate();
        let channels = config.channels() as usize;
        log::info!("Audio config: {sample_rate}Hz, {channels}ch");

        let ring = Arc::new(RingBuffer::new());
        let ring_clone = ring.clone();
        let mut mono = Vec::new();

        let stream = device.build_output_stream(
            &config.into(),
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels.max(1);
                mono.resize(frames, 0.0);
                let got = ring_clone.pop(&mut mono);
                mono[got..].fill(0.0);
                // Upmix mono to every channel
                for (frame, &s) in data.chunks_mut(channels.max(1)).zip(mono.iter()) {
                    frame.fill(s);
                }
            },
            |err| {
                log::error!("Audio stream error: {err}");
            },
            None,
        )?;

        stream.play()?;
        log::info!("Audio output started");

        Ok(Self {
            _stream: stream,
            ring,
            sample_rate,
            device_name,
        })
    }
}
