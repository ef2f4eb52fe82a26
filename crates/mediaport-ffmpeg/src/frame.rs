// crates/mediaport-ffmpeg/src/frame.rs
//
// A decoded or decode-target unit. Decoded frames own the backend frame
// they were produced from; when the owning stream has an output conversion
// configured, the converted buffer is produced lazily on the first data()
// call and cached for the frame's lifetime. Constructed frames (for the
// write path) allocate writable backend buffers up front.

use std::sync::{Arc, Mutex};

use ffmpeg_the_third as ffmpeg;

use ffmpeg::ffi;
use ffmpeg::format::Pixel;
use ffmpeg::software::{resampling, scaling};
use ffmpeg::util::frame::audio::Audio as AudioFrame;
use ffmpeg::util::frame::video::Video as VideoFrame;

use mediaport_core::types::{ChannelLayout, ColourSpace, Dimensions, FieldOrder, PixelFormat,
                            SampleFormat, SampleRate};
use mediaport_core::{lwarning, MediaProperty, PropertyBag, Rational};

use crate::convert;
use crate::error::{MediaError, Result};

/// Scale/pixel-format conversion shared between a reading stream and the
/// frames it produces.
pub(crate) type SharedScaler = Arc<Mutex<scaling::Context>>;

/// Resample conversion shared between a reading stream and its frames.
pub(crate) type SharedResampler = Arc<Mutex<resampling::Context>>;

pub(crate) enum Native {
    Video(VideoFrame),
    Audio(AudioFrame),
}

/// Plane-level view of a frame's (possibly converted) data. Slices borrow
/// the frame, so the data cannot outlive it.
pub struct FrameData<'a> {
    pub planes: Vec<&'a [u8]>,
    /// Row stride of plane 0 in bytes.
    pub line_size: usize,
    /// Total payload size computed from the converted format and dimensions.
    pub data_size: usize,
    pub dimensions: Dimensions,
    pub pixel_format: PixelFormat,
    pub sample_format: SampleFormat,
    /// Samples per channel; -1 for video.
    pub sample_count: i32,
    pub timestamp: i64,
}

pub struct Frame {
    native: Option<Native>,
    converted: Option<Native>,
    props: PropertyBag,
    timestamp: i64,
    packet_size: i32,
    packet_duration: i64,
    video_out: Option<SharedScaler>,
    audio_out: Option<SharedResampler>,
}

impl Default for Frame {
    fn default() -> Self {
        Frame {
            native: None,
            converted: None,
            props: PropertyBag::new(),
            timestamp: -1,
            packet_size: -1,
            packet_duration: 0,
            video_out: None,
            audio_out: None,
        }
    }
}

impl Frame {
    /// An unallocated frame, as handed out by `create_frame`. Call
    /// `allocate_video` or `allocate_audio` before writing it to a sink.
    pub fn empty() -> Self {
        Frame::default()
    }

    pub(crate) fn from_video(
        frame: VideoFrame,
        timestamp: i64,
        output: Option<SharedScaler>,
    ) -> Self {
        Frame {
            native: Some(Native::Video(frame)),
            timestamp,
            video_out: output,
            ..Frame::default()
        }
    }

    pub(crate) fn from_audio(
        frame: AudioFrame,
        timestamp: i64,
        output: Option<SharedResampler>,
    ) -> Self {
        Frame {
            native: Some(Native::Audio(frame)),
            timestamp,
            audio_out: output,
            ..Frame::default()
        }
    }

    pub(crate) fn set_packet_info(&mut self, size: i32, duration: i64) {
        self.packet_size = size;
        self.packet_duration = duration;
    }

    pub(crate) fn native_mut(&mut self) -> Option<&mut Native> {
        self.native.as_mut()
    }

    pub fn is_visual(&self) -> bool {
        matches!(self.native, Some(Native::Video(_)))
    }

    pub fn is_audio(&self) -> bool {
        matches!(self.native, Some(Native::Audio(_)))
    }

    /// Presentation timestamp in the owning stream's time-scale.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Row stride of plane `index` in the native (unconverted) frame.
    /// Valid for 0 <= index < 8; anything else has no value.
    pub fn line_size(&self, index: usize) -> Option<usize> {
        if index >= ffi::AV_NUM_DATA_POINTERS as usize {
            lwarning!("line_size index out of range: {index}");
            return None;
        }
        let ptr = match self.native.as_ref()? {
            Native::Video(v) => unsafe { (*v.as_ptr()).linesize[index] },
            Native::Audio(a) => unsafe { (*a.as_ptr()).linesize[index] },
        };
        Some(ptr as usize)
    }

    /// Allocate a writable video buffer for a frame that will be encoded.
    pub fn allocate_video(&mut self, format: PixelFormat, dims: Dimensions) -> Result<()> {
        let pix = convert::pixel_to_av(format);
        if pix == Pixel::None || dims.width <= 0 || dims.height <= 0 {
            return Err(MediaError::InvalidArgument(format!(
                "cannot allocate video frame {}x{}", dims.width, dims.height
            )));
        }
        let mut frame = VideoFrame::new(pix, dims.width as u32, dims.height as u32);
        frame.set_pts(Some(0));
        self.native = Some(Native::Video(frame));
        self.converted = None;
        self.props.set(MediaProperty::PixelFormat, format);
        self.props.set(MediaProperty::Dimensions, dims);
        Ok(())
    }

    /// Allocate a writable audio buffer for a frame that will be encoded.
    pub fn allocate_audio(
        &mut self,
        format: SampleFormat,
        samples: usize,
        layout: ChannelLayout,
        rate: SampleRate,
    ) -> Result<()> {
        let fmt = convert::sample_to_av(format);
        if matches!(fmt, ffmpeg::format::Sample::None) || samples == 0 || rate <= 0 {
            return Err(MediaError::InvalidArgument(
                "cannot allocate audio frame without format, samples and rate".into(),
            ));
        }
        let mut frame = AudioFrame::new(fmt, samples, convert::layout_mask(layout));
        frame.set_rate(rate as u32);
        frame.set_pts(Some(0));
        self.native = Some(Native::Audio(frame));
        self.converted = None;
        self.props.set(MediaProperty::AudioFormat, format);
        self.props.set(MediaProperty::AudioSamples, samples as i32);
        self.props.set(MediaProperty::AudioLayout, layout);
        self.props.set(MediaProperty::AudioSamplingRate, rate);
        Ok(())
    }

    /// Mutable access to a plane of a constructed frame, for filling sample
    /// or pixel data before encoding.
    pub fn plane_data_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        match self.native.as_mut()? {
            Native::Video(v) => {
                if index < v.planes() {
                    Some(v.data_mut(index))
                } else {
                    None
                }
            }
            Native::Audio(a) => {
                if index < a.planes() {
                    Some(a.data_mut(index))
                } else {
                    None
                }
            }
        }
    }

    /// The frame's payload. When the owning stream configured an output
    /// conversion, the first call performs the scale/resample into a cached
    /// secondary buffer and the returned view describes the converted data;
    /// otherwise the view points straight into the native frame.
    pub fn data(&mut self) -> Result<FrameData<'_>> {
        self.ensure_converted()?;
        let frame = self
            .converted
            .as_ref()
            .or(self.native.as_ref())
            .ok_or_else(|| MediaError::InvalidArgument("frame holds no data".into()))?;

        Ok(match frame {
            Native::Video(v) => {
                let planes = (0..v.planes()).map(|i| v.data(i)).collect::<Vec<_>>();
                FrameData {
                    line_size: v.stride(0),
                    data_size: video_buffer_size(v),
                    dimensions: Dimensions {
                        width: v.width() as i32,
                        height: v.height() as i32,
                    },
                    pixel_format: convert::pixel_from_av(v.format()),
                    sample_format: SampleFormat::None,
                    sample_count: -1,
                    timestamp: self.timestamp,
                    planes,
                }
            }
            Native::Audio(a) => {
                let planes = (0..a.planes()).map(|i| a.data(i)).collect::<Vec<_>>();
                FrameData {
                    line_size: unsafe { (*a.as_ptr()).linesize[0] as usize },
                    data_size: audio_buffer_size(a),
                    dimensions: Dimensions::default(),
                    pixel_format: PixelFormat::Unknown,
                    sample_format: convert::sample_from_av(a.format()),
                    sample_count: a.samples() as i32,
                    timestamp: self.timestamp,
                    planes,
                }
            }
        })
    }

    fn ensure_converted(&mut self) -> Result<()> {
        if self.converted.is_some() {
            return Ok(());
        }
        match self.native.as_ref() {
            Some(Native::Video(v)) => {
                if let Some(out) = self.video_out.as_ref() {
                    let mut scaler = out.lock().unwrap();
                    let mut scaled = VideoFrame::empty();
                    scaler.run(v, &mut scaled)?;
                    scaled.set_pts(v.pts());
                    self.converted = Some(Native::Video(scaled));
                }
            }
            Some(Native::Audio(a)) => {
                if let Some(out) = self.audio_out.as_ref() {
                    let mut resampler = out.lock().unwrap();
                    let mut resampled = AudioFrame::empty();
                    resampler.run(a, &mut resampled)?;
                    resampled.set_pts(a.pts());
                    self.converted = Some(Native::Audio(resampled));
                }
            }
            None => {}
        }
        Ok(())
    }

    /// Populate the property bag from the native frame. The backend does not
    /// materialise these until a frame has been decoded, so call this before
    /// reading frame-level keys.
    pub fn extract_properties(&mut self) {
        match self.native.as_ref() {
            Some(Native::Video(_)) => self.extract_visual_properties(),
            Some(Native::Audio(_)) => self.extract_audio_properties(),
            None => lwarning!("extract_properties called on an unallocated frame"),
        }
        if self.packet_size >= 0 {
            self.props.set(MediaProperty::FramePacketSize, self.packet_size);
            self.props.set(MediaProperty::FrameDuration, self.packet_duration);
        }
    }

    fn extract_visual_properties(&mut self) {
        let Some(Native::Video(v)) = self.native.as_ref() else {
            return;
        };

        let flags = unsafe { (*v.as_ptr()).flags };
        let interlaced = flags & ffi::AV_FRAME_FLAG_INTERLACED as i32 != 0;
        let top_first = flags & ffi::AV_FRAME_FLAG_TOP_FIELD_FIRST as i32 != 0;
        let order = if interlaced {
            if top_first {
                FieldOrder::TopFirst
            } else {
                FieldOrder::BottomFirst
            }
        } else {
            FieldOrder::Progressive
        };

        let width = v.width() as i64;
        let height = v.height() as i64;
        let sar = v.aspect_ratio();
        let par = if sar.denominator() != 0 {
            Rational::new(sar.numerator() as i64, sar.denominator() as i64)
        } else {
            Rational::ZERO
        };
        let colour = ColourSpace {
            primaries: convert::primaries_from_av(v.color_primaries()),
            transfer: convert::transfer_from_av(v.color_transfer_characteristic()),
            matrix: convert::matrix_from_av(v.color_space()),
            range: convert::range_from_av(v.color_range()),
        };

        self.props.set(MediaProperty::FieldOrder, order);
        if !par.is_zero() {
            self.props.set(MediaProperty::PixelAspectRatio, par);
            if height > 0 {
                self.props
                    .set(MediaProperty::DisplayAspectRatio, par * Rational::new(width, height));
            }
        }
        self.props.set(MediaProperty::ColourSpace, colour);
        self.props.set(
            MediaProperty::Dimensions,
            Dimensions { width: width as i32, height: height as i32 },
        );
    }

    fn extract_audio_properties(&mut self) {
        let Some(Native::Audio(a)) = self.native.as_ref() else {
            return;
        };
        let samples = a.samples() as i32;
        let format = convert::sample_from_av(a.format());
        self.props.set(MediaProperty::AudioSamples, samples);
        self.props.set(MediaProperty::AudioFormat, format);
    }

    pub fn has_property(&self, prop: MediaProperty) -> bool {
        self.props.has(prop)
    }

    pub fn property<T: mediaport_core::properties::FromProperty>(
        &self,
        prop: MediaProperty,
    ) -> Option<T> {
        self.props.get(prop)
    }

    pub fn set_property(&mut self, prop: MediaProperty, value: impl mediaport_core::properties::FromProperty) {
        self.props.set(prop, value);
    }
}

fn video_buffer_size(frame: &VideoFrame) -> usize {
    let size = unsafe {
        ffi::av_image_get_buffer_size(
            frame.format().into(),
            frame.width() as i32,
            frame.height() as i32,
            1,
        )
    };
    size.max(0) as usize
}

fn audio_buffer_size(frame: &AudioFrame) -> usize {
    let channels = frame.ch_layout().channels() as i32;
    let size = unsafe {
        ffi::av_samples_get_buffer_size(
            std::ptr::null_mut(),
            channels,
            frame.samples() as i32,
            frame.format().into(),
            1,
        )
    };
    size.max(0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructed_audio_frame_reports_layout() {
        let mut frame = Frame::empty();
        assert!(!frame.is_audio());
        frame
            .allocate_audio(SampleFormat::Signed16, 20, ChannelLayout::Mono, 22_050)
            .unwrap();
        assert!(frame.is_audio());
        assert!(!frame.is_visual());
        assert_eq!(frame.property::<i32>(MediaProperty::AudioSamples), Some(20));
        assert_eq!(
            frame.property::<SampleFormat>(MediaProperty::AudioFormat),
            Some(SampleFormat::Signed16)
        );

        // s16 mono, 20 samples -> 40 bytes of payload.
        let plane = frame.plane_data_mut(0).unwrap();
        assert!(plane.len() >= 40);
        plane.fill(0);
        let data = frame.data().unwrap();
        assert_eq!(data.sample_count, 20);
        assert_eq!(data.data_size, 40);
        assert_eq!(data.sample_format, SampleFormat::Signed16);
    }

    #[test]
    fn constructed_video_frame_dimensions() {
        let mut frame = Frame::empty();
        frame
            .allocate_video(PixelFormat::Yuv420, Dimensions { width: 64, height: 48 })
            .unwrap();
        assert!(frame.is_visual());
        let data = frame.data().unwrap();
        assert_eq!(data.dimensions, Dimensions { width: 64, height: 48 });
        assert_eq!(data.pixel_format, PixelFormat::Yuv420);
        assert_eq!(data.data_size, 64 * 48 * 3 / 2);
        assert!(data.planes.len() >= 3);
    }

    #[test]
    fn rejects_unallocatable_requests() {
        let mut frame = Frame::empty();
        assert!(frame
            .allocate_video(PixelFormat::Unknown, Dimensions { width: 64, height: 48 })
            .is_err());
        assert!(frame
            .allocate_audio(SampleFormat::None, 20, ChannelLayout::Mono, 22_050)
            .is_err());
        assert!(frame.data().is_err());
        assert!(frame.line_size(99).is_none());
    }
}
