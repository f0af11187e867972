//! Decoded-frame supply for the 360 viewer.
//!
//! The renderer consumes bi-planar YCbCr 4:2:0 frames through the
//! [`VideoSource`] trait; anything that can hand over decoded planes
//! (a hardware decoder, a demuxer pipeline, a test generator) can sit
//! behind it. This crate ships [`SyntheticSource`], an equirectangular
//! test-pattern generator used by the viewer and the test-suite.
#![forbid(unsafe_code)]

use std::fmt;

#[derive(Debug)]
pub enum FrameError {
    InvalidDimensions {
        width: u32,
        height: u32,
    },
    PlaneSizeMismatch {
        plane: &'static str,
        expected: usize,
        actual: usize,
    },
    SizeOverflow,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::InvalidDimensions { width, height } => {
                write!(f, "invalid frame dimensions: {}x{}", width, height)
            }
            FrameError::PlaneSizeMismatch {
                plane,
                expected,
                actual,
            } => write!(
                f,
                "frame {} plane size mismatch: expected {} bytes, got {}",
                plane, expected, actual
            ),
            FrameError::SizeOverflow => write!(f, "frame size overflow"),
        }
    }
}

impl std::error::Error for FrameError {}

/// YCbCr to RGB conversion variant. Video sources report which matrix
/// their stream was encoded with; the renderer feeds the matching
/// coefficients to its conversion kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorMatrix {
    Bt601,
    Bt709,
}

/// Video-range decode coefficients, matching the layout the GPU kernel
/// consumes: `rgb = y_scale * max(y - 16/255, 0) + (coefficient) * chroma`.
#[derive(Clone, Copy, Debug)]
pub struct ColorCoefficients {
    pub y_scale: f32,
    pub r_cr: f32,
    pub g_cb: f32,
    pub g_cr: f32,
    pub b_cb: f32,
}

impl ColorMatrix {
    pub fn coefficients(self) -> ColorCoefficients {
        match self {
            ColorMatrix::Bt601 => ColorCoefficients {
                y_scale: 1.164,
                r_cr: 1.596,
                g_cb: -0.392,
                g_cr: -0.813,
                b_cb: 2.017,
            },
            ColorMatrix::Bt709 => ColorCoefficients {
                y_scale: 1.164,
                r_cr: 1.793,
                g_cb: -0.213,
                g_cr: -0.533,
                b_cb: 2.112,
            },
        }
    }

    fn kr_kb(self) -> (f32, f32) {
        match self {
            ColorMatrix::Bt601 => (0.299, 0.114),
            ColorMatrix::Bt709 => (0.2126, 0.0722),
        }
    }

    /// CPU reference of the GPU conversion kernel.
    pub fn decode(self, y: u8, cb: u8, cr: u8) -> [u8; 3] {
        let c = self.coefficients();
        let y_adj = ((y as f32 - 16.0) / 255.0).max(0.0) * c.y_scale;
        let cb = cb as f32 / 255.0 - 0.5;
        let cr = cr as f32 / 255.0 - 0.5;
        let r = y_adj + c.r_cr * cr;
        let g = y_adj + c.g_cb * cb + c.g_cr * cr;
        let b = y_adj + c.b_cb * cb;
        [channel_to_u8(r), channel_to_u8(g), channel_to_u8(b)]
    }

    /// Video-range encode, the inverse of [`ColorMatrix::decode`].
    pub fn encode(self, rgb: [u8; 3]) -> (u8, u8, u8) {
        let (kr, kb) = self.kr_kb();
        let kg = 1.0 - kr - kb;
        let r = rgb[0] as f32 / 255.0;
        let g = rgb[1] as f32 / 255.0;
        let b = rgb[2] as f32 / 255.0;
        let luma = kr * r + kg * g + kb * b;
        let y = 16.0 + 219.0 * luma;
        let cb = 128.0 + 224.0 * 0.5 * (b - luma) / (1.0 - kb);
        let cr = 128.0 + 224.0 * 0.5 * (r - luma) / (1.0 - kr);
        (
            y.round().clamp(0.0, 255.0) as u8,
            cb.round().clamp(0.0, 255.0) as u8,
            cr.round().clamp(0.0, 255.0) as u8,
        )
    }
}

fn channel_to_u8(value: f32) -> u8 {
    (value * 255.0).round().clamp(0.0, 255.0) as u8
}

pub fn luma_plane_len(width: u32, height: u32) -> Result<usize, FrameError> {
    let width = usize::try_from(width).map_err(|_| FrameError::SizeOverflow)?;
    let height = usize::try_from(height).map_err(|_| FrameError::SizeOverflow)?;
    width.checked_mul(height).ok_or(FrameError::SizeOverflow)
}

/// Interleaved CbCr plane length at half resolution, two bytes per sample.
pub fn chroma_plane_len(width: u32, height: u32) -> Result<usize, FrameError> {
    let cw = usize::try_from(width.div_ceil(2)).map_err(|_| FrameError::SizeOverflow)?;
    let ch = usize::try_from(height.div_ceil(2)).map_err(|_| FrameError::SizeOverflow)?;
    cw.checked_mul(ch)
        .and_then(|samples| samples.checked_mul(2))
        .ok_or(FrameError::SizeOverflow)
}

/// A decoded bi-planar YCbCr 4:2:0 frame: full-resolution luma plane plus
/// a half-resolution interleaved Cb/Cr plane, tagged with its
/// presentation time.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    pub play_ms: u64,
    pub width: u32,
    pub height: u32,
    pub luma: Vec<u8>,
    pub chroma: Vec<u8>,
}

impl FrameBuffer {
    pub fn new(
        play_ms: u64,
        width: u32,
        height: u32,
        luma: Vec<u8>,
        chroma: Vec<u8>,
    ) -> Result<Self, FrameError> {
        validate_planes(width, height, &luma, &chroma)?;
        Ok(Self {
            play_ms,
            width,
            height,
            luma,
            chroma,
        })
    }

    pub fn as_view(&self) -> FrameView<'_> {
        FrameView {
            width: self.width,
            height: self.height,
            luma: &self.luma,
            chroma: &self.chroma,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub width: u32,
    pub height: u32,
    pub luma: &'a [u8],
    pub chroma: &'a [u8],
}

impl<'a> FrameView<'a> {
    pub fn new(
        width: u32,
        height: u32,
        luma: &'a [u8],
        chroma: &'a [u8],
    ) -> Result<Self, FrameError> {
        validate_planes(width, height, luma, chroma)?;
        Ok(Self {
            width,
            height,
            luma,
            chroma,
        })
    }
}

fn validate_planes(width: u32, height: u32, luma: &[u8], chroma: &[u8]) -> Result<(), FrameError> {
    if width == 0 || height == 0 {
        return Err(FrameError::InvalidDimensions { width, height });
    }
    let luma_expected = luma_plane_len(width, height)?;
    if luma.len() != luma_expected {
        return Err(FrameError::PlaneSizeMismatch {
            plane: "luma",
            expected: luma_expected,
            actual: luma.len(),
        });
    }
    let chroma_expected = chroma_plane_len(width, height)?;
    if chroma.len() != chroma_expected {
        return Err(FrameError::PlaneSizeMismatch {
            plane: "chroma",
            expected: chroma_expected,
            actual: chroma.len(),
        });
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    Playing,
    Paused,
    Ended,
}

/// The decoded-frame collaborator. `has_frame_for` / `copy_frame_for`
/// mirror a player item video output: a new frame exists for a given
/// display timestamp or it does not, and a tick without one is skipped.
/// `playback_state` is the explicit poll interface for transport state.
pub trait VideoSource {
    fn frame_size(&self) -> (u32, u32);
    fn color_matrix(&self) -> ColorMatrix;
    fn has_frame_for(&self, now_ms: u64) -> bool;
    fn copy_frame_for(&mut self, now_ms: u64) -> Option<FrameBuffer>;
    fn playback_state(&self, now_ms: u64) -> PlaybackState;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TestPattern {
    /// 30-degree longitude/latitude checker, phase-shifted per frame.
    Checker,
    /// Longitude/latitude color ramp.
    Gradient,
}

/// Synthetic equirectangular source: paints a test pattern over the
/// longitude/latitude grid and encodes it to video-range bi-planar
/// YCbCr on the CPU. Frames are produced at a fixed rate against the
/// caller's clock; pausing freezes the stream clock.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    fps: f64,
    pattern: TestPattern,
    matrix: ColorMatrix,
    duration_ms: Option<u64>,
    last_frame_index: Option<u64>,
    paused_since_ms: Option<u64>,
    paused_total_ms: u64,
}

impl SyntheticSource {
    pub fn new(
        width: u32,
        height: u32,
        fps: f64,
        pattern: TestPattern,
        matrix: ColorMatrix,
    ) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::InvalidDimensions { width, height });
        }
        Ok(Self {
            width,
            height,
            fps,
            pattern,
            matrix,
            duration_ms: None,
            last_frame_index: None,
            paused_since_ms: None,
            paused_total_ms: 0,
        })
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn is_paused(&self) -> bool {
        self.paused_since_ms.is_some()
    }

    pub fn set_paused(&mut self, paused: bool, now_ms: u64) {
        match (self.paused_since_ms, paused) {
            (None, true) => self.paused_since_ms = Some(now_ms),
            (Some(since), false) => {
                self.paused_total_ms = self
                    .paused_total_ms
                    .saturating_add(now_ms.saturating_sub(since));
                self.paused_since_ms = None;
            }
            _ => {}
        }
    }

    /// Stream time: wall time minus everything spent paused.
    fn stream_ms(&self, now_ms: u64) -> u64 {
        let frozen = match self.paused_since_ms {
            Some(since) => now_ms.saturating_sub(since),
            None => 0,
        };
        now_ms
            .saturating_sub(self.paused_total_ms)
            .saturating_sub(frozen)
    }

    fn frame_index(&self, now_ms: u64) -> Option<u64> {
        let stream_ms = self.stream_ms(now_ms);
        if let Some(duration) = self.duration_ms {
            if stream_ms >= duration {
                return None;
            }
        }
        Some((stream_ms as f64 * self.fps / 1000.0) as u64)
    }

    /// Pattern color at equirect coordinates (u, v) in [0, 1).
    pub fn rgb_at(&self, u: f32, v: f32, frame_index: u64) -> [u8; 3] {
        match self.pattern {
            TestPattern::Checker => {
                let lon_cell = (u * 360.0 / 30.0) as i64;
                let lat_cell = (v * 180.0 / 30.0) as i64;
                let phase = (frame_index / 8) as i64;
                if (lon_cell + lat_cell + phase) % 2 == 0 {
                    [235, 235, 235]
                } else {
                    [32, 32, 32]
                }
            }
            TestPattern::Gradient => [
                channel_to_u8(u),
                channel_to_u8(v),
                channel_to_u8(1.0 - u),
            ],
        }
    }

    fn fill_frame(&self, frame_index: u64) -> FrameBuffer {
        let width = self.width as usize;
        let height = self.height as usize;
        let mut luma = vec![0u8; width * height];
        for py in 0..height {
            let v = (py as f32 + 0.5) / height as f32;
            for px in 0..width {
                let u = (px as f32 + 0.5) / width as f32;
                let (y, _, _) = self.matrix.encode(self.rgb_at(u, v, frame_index));
                luma[py * width + px] = y;
            }
        }

        let chroma_width = self.width.div_ceil(2) as usize;
        let chroma_height = self.height.div_ceil(2) as usize;
        let mut chroma = vec![0u8; chroma_width * chroma_height * 2];
        for cy in 0..chroma_height {
            // Sample at the centre of each 2x2 block, clamped for odd sizes.
            let py = (cy * 2 + 1).min(height - 1);
            let v = (py as f32 + 0.5) / height as f32;
            for cx in 0..chroma_width {
                let px = (cx * 2 + 1).min(width - 1);
                let u = (px as f32 + 0.5) / width as f32;
                let (_, cb, cr) = self.matrix.encode(self.rgb_at(u, v, frame_index));
                let offset = (cy * chroma_width + cx) * 2;
                chroma[offset] = cb;
                chroma[offset + 1] = cr;
            }
        }

        let play_ms = if self.fps > 0.0 {
            (frame_index as f64 * 1000.0 / self.fps) as u64
        } else {
            0
        };
        FrameBuffer {
            play_ms,
            width: self.width,
            height: self.height,
            luma,
            chroma,
        }
    }
}

impl VideoSource for SyntheticSource {
    fn frame_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn color_matrix(&self) -> ColorMatrix {
        self.matrix
    }

    fn has_frame_for(&self, now_ms: u64) -> bool {
        if self.is_paused() {
            return false;
        }
        match self.frame_index(now_ms) {
            Some(index) => self.last_frame_index != Some(index),
            None => false,
        }
    }

    fn copy_frame_for(&mut self, now_ms: u64) -> Option<FrameBuffer> {
        if !self.has_frame_for(now_ms) {
            return None;
        }
        let index = self.frame_index(now_ms)?;
        self.last_frame_index = Some(index);
        Some(self.fill_frame(index))
    }

    fn playback_state(&self, now_ms: u64) -> PlaybackState {
        if self.is_paused() {
            return PlaybackState::Paused;
        }
        match self.frame_index(now_ms) {
            Some(_) => PlaybackState::Playing,
            None => PlaybackState::Ended,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn luma_plane_length_is_validated() {
        let err = FrameBuffer::new(0, 4, 4, vec![0; 15], vec![0; 8]).expect_err("short luma");
        match err {
            FrameError::PlaneSizeMismatch {
                plane, expected, ..
            } => {
                assert_eq!(plane, "luma");
                assert_eq!(expected, 16);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn chroma_plane_length_accounts_for_odd_sizes() {
        // 5x3: luma 15 bytes, chroma ceil(5/2) * ceil(3/2) * 2 = 12 bytes.
        assert_eq!(chroma_plane_len(5, 3).expect("len"), 12);
        let frame = FrameBuffer::new(0, 5, 3, vec![0; 15], vec![0; 12]).expect("frame");
        assert_eq!(frame.as_view().chroma.len(), 12);
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        let err = FrameBuffer::new(0, 0, 4, Vec::new(), Vec::new()).expect_err("zero width");
        assert!(matches!(err, FrameError::InvalidDimensions { .. }));
    }

    #[test]
    fn video_range_white_and_black_decode_exactly() {
        for matrix in [ColorMatrix::Bt601, ColorMatrix::Bt709] {
            let white = matrix.decode(235, 128, 128);
            for channel in white {
                assert!(channel >= 254, "white {:?} via {:?}", white, matrix);
            }
            let black = matrix.decode(16, 128, 128);
            for channel in black {
                assert!(channel <= 1, "black {:?} via {:?}", black, matrix);
            }
        }
    }

    #[test]
    fn encode_then_decode_round_trips() {
        let samples = [
            [255u8, 0, 0],
            [0, 255, 0],
            [0, 0, 255],
            [128, 64, 200],
            [17, 230, 99],
        ];
        for matrix in [ColorMatrix::Bt601, ColorMatrix::Bt709] {
            for rgb in samples {
                let (y, cb, cr) = matrix.encode(rgb);
                let decoded = matrix.decode(y, cb, cr);
                for channel in 0..3 {
                    let diff = (decoded[channel] as i32 - rgb[channel] as i32).abs();
                    assert!(
                        diff <= 3,
                        "{:?} -> {:?} via {:?} (channel {})",
                        rgb,
                        decoded,
                        matrix,
                        channel
                    );
                }
            }
        }
    }

    fn source(fps: f64) -> SyntheticSource {
        SyntheticSource::new(48, 24, fps, TestPattern::Gradient, ColorMatrix::Bt601)
            .expect("source")
    }

    #[test]
    fn frames_arrive_at_the_configured_rate() {
        let mut source = source(10.0);
        assert!(source.has_frame_for(0));
        assert!(source.copy_frame_for(0).is_some());
        assert!(!source.has_frame_for(50));
        assert!(source.copy_frame_for(50).is_none());
        assert!(source.has_frame_for(100));
        let frame = source.copy_frame_for(100).expect("second frame");
        assert_eq!(frame.play_ms, 100);
    }

    #[test]
    fn pausing_freezes_the_stream_clock() {
        let mut source = source(10.0);
        source.copy_frame_for(0);
        source.set_paused(true, 40);
        assert!(!source.has_frame_for(500));
        assert_eq!(source.playback_state(500), PlaybackState::Paused);
        source.set_paused(false, 500);
        // Stream time at wall 560 is 100ms: exactly one frame ahead.
        assert!(source.has_frame_for(560));
        assert_eq!(source.playback_state(560), PlaybackState::Playing);
    }

    #[test]
    fn duration_ends_the_stream() {
        let mut source = source(10.0).with_duration_ms(250);
        assert!(source.copy_frame_for(0).is_some());
        assert!(source.copy_frame_for(100).is_some());
        assert!(!source.has_frame_for(250));
        assert_eq!(source.playback_state(250), PlaybackState::Ended);
    }

    #[test]
    fn generated_planes_have_the_documented_lengths() {
        let mut source = source(30.0);
        let frame = source.copy_frame_for(0).expect("frame");
        FrameView::new(frame.width, frame.height, &frame.luma, &frame.chroma)
            .expect("valid planes");
    }

    #[test]
    fn generated_texels_decode_back_to_the_pattern() {
        let mut source = source(30.0);
        let frame = source.copy_frame_for(0).expect("frame");
        // A texel away from block edges: chroma subsampling error stays small
        // on the smooth gradient.
        let (px, py) = (25usize, 13usize);
        let u = (px as f32 + 0.5) / frame.width as f32;
        let v = (py as f32 + 0.5) / frame.height as f32;
        let expected = source.rgb_at(u, v, 0);
        let y = frame.luma[py * frame.width as usize + px];
        let chroma_width = frame.width.div_ceil(2) as usize;
        let offset = ((py / 2) * chroma_width + px / 2) * 2;
        let decoded = ColorMatrix::Bt601.decode(y, frame.chroma[offset], frame.chroma[offset + 1]);
        for channel in 0..3 {
            let diff = (decoded[channel] as i32 - expected[channel] as i32).abs();
            assert!(
                diff <= 8,
                "decoded {:?}, expected {:?} (channel {})",
                decoded,
                expected,
                channel
            );
        }
    }
}
