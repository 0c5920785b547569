use std::time::{Duration, Instant};

use wgpu::{Buffer, BufferDescriptor, BufferUsages, CommandEncoder, Device, Extent3d};

use crate::pipeline::BackendError;
use crate::raster::Frame;

use super::context::CAPTURE_FORMAT;
use super::render_target::RenderTarget;

/// Upper bound on waiting for a readback map.
const READBACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Offscreen RGBA8 target plus a staging buffer for blocking CPU readback.
pub struct FrameCapture {
    pub target: RenderTarget,
    staging: Buffer,
    /// Bytes per row, padded to wgpu's COPY_BYTES_PER_ROW_ALIGNMENT (256).
    padded_bytes_per_row: u32,
    /// Actual bytes per row (width * 4).
    unpadded_bytes_per_row: u32,
}

impl FrameCapture {
    pub fn new(device: &Device, width: u32, height: u32) -> Self {
        let target = RenderTarget::new(device, width, height, CAPTURE_FORMAT, "frame-capture");

        let unpadded_bytes_per_row = target.width * 4;
        let padded_bytes_per_row =
            align_to(unpadded_bytes_per_row, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let staging = create_staging(device, padded_bytes_per_row, target.height);

        Self {
            target,
            staging,
            padded_bytes_per_row,
            unpadded_bytes_per_row,
        }
    }

    pub fn resize(&mut self, device: &Device, width: u32, height: u32) {
        if width.max(1) == self.target.width && height.max(1) == self.target.height {
            return;
        }
        *self = Self::new(device, width, height);
    }

    /// Copy the capture texture into the staging buffer.
    pub fn copy_to_staging(&self, encoder: &mut CommandEncoder) {
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_bytes_per_row),
                    rows_per_image: Some(self.target.height),
                },
            },
            Extent3d {
                width: self.target.width,
                height: self.target.height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Map the staging buffer and wait for it. Call after the copy was submitted.
    pub fn read(&mut self, device: &Device) -> Result<Frame, BackendError> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.staging.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        if let Err(e) = await_map(&rx, READBACK_TIMEOUT, || {
            let _ = device.poll(wgpu::PollType::Poll);
        }) {
            // A pending or failed map leaves the buffer unusable for the next copy.
            self.staging = create_staging(device, self.padded_bytes_per_row, self.target.height);
            return Err(BackendError::Readback(e));
        }

        let data = self.staging.slice(..).get_mapped_range();
        let rgba = strip_padding(
            &data,
            self.padded_bytes_per_row,
            self.unpadded_bytes_per_row,
            self.target.height,
        );
        drop(data);
        self.staging.unmap();

        Ok(Frame {
            width: self.target.width,
            height: self.target.height,
            rgba,
        })
    }
}

fn create_staging(device: &Device, padded_bytes_per_row: u32, height: u32) -> Buffer {
    device.create_buffer(&BufferDescriptor {
        label: Some("frame-capture-staging"),
        size: padded_bytes_per_row as u64 * height as u64,
        usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
        mapped_at_creation: false,
    })
}

/// Poll until the map callback reports or `timeout` passes.
fn await_map<E: std::fmt::Display>(
    rx: &crossbeam_channel::Receiver<Result<(), E>>,
    timeout: Duration,
    mut poll: impl FnMut(),
) -> Result<(), String> {
    let deadline = Instant::now() + timeout;
    loop {
        poll();
        match rx.recv_timeout(Duration::from_millis(1)) {
            Ok(result) => return result.map_err(|e| e.to_string()),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) if Instant::now() < deadline => {}
            Err(e) => return Err(format!("map did not complete: {e}")),
        }
    }
}

/// Tightly packed rows from a padded copy.
fn strip_padding(data: &[u8], padded: u32, unpadded: u32, height: u32) -> Vec<u8> {
    if padded == unpadded {
        return data[..(unpadded * height) as usize].to_vec();
    }
    let mut out = Vec::with_capacity((unpadded * height) as usize);
    for row in 0..height {
        let start = (row * padded) as usize;
        let end = start + unpadded as usize;
        out.extend_from_slice(&data[start..end]);
    }
    out
}

/// Align `value` up to the next multiple of `alignment`.
fn align_to(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_rounds_up_to_multiple() {
        assert_eq!(align_to(0, 256), 0);
        assert_eq!(align_to(4, 256), 256);
        assert_eq!(align_to(256, 256), 256);
        assert_eq!(align_to(257, 256), 512);
    }

    #[test]
    fn strip_padding_drops_row_tails() {
        // 2 rows of 3 payload bytes padded to 4
        let data = [1, 2, 3, 0, 4, 5, 6, 0];
        assert_eq!(strip_padding(&data, 4, 3, 2), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn map_wait_returns_once_signalled() {
        let (tx, rx) = crossbeam_channel::bounded::<Result<(), String>>(1);
        let mut polls = 0;
        let result = await_map(&rx, Duration::from_secs(1), || {
            polls += 1;
            if polls == 3 {
                tx.send(Ok(())).unwrap();
            }
        });
        assert_eq!(result, Ok(()));
        assert_eq!(polls, 3);
    }

    #[test]
    fn map_wait_gives_up_after_timeout() {
        let (_tx, rx) = crossbeam_channel::bounded::<Result<(), String>>(1);
        let started = Instant::now();
        let result = await_map(&rx, Duration::from_millis(20), || {});
        assert!(result.unwrap_err().contains("did not complete"));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn map_wait_reports_map_errors() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        tx.send(Err("device lost")).unwrap();
        assert_eq!(
            await_map(&rx, Duration::from_secs(1), || {}),
            Err("device lost".to_string())
        );
    }

    #[test]
    fn strip_padding_passes_through_aligned_rows() {
        let data = [9u8; 8];
        assert_eq!(strip_padding(&data, 4, 4, 2), vec![9; 8]);
    }
}
