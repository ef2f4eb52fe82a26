// crates/mediaport-ffmpeg/src/stream.rs
//
// One elementary track, reading or writing; the mode is fixed at
// construction.
//
// Reading: owns the decoder and playhead, pulls packets through the owning
// Source's dispatcher, and decides per request whether to seek or read
// forward (a request within one PTS interval ahead of the playhead is
// cheaper to reach by decoding than by seeking). After a seek the demuxer
// lands on the prior keyframe, so frames are drained until the target is
// reached.
//
// Writing: properties accumulate while the stream is configurable; the
// encoder is built once, on the first write_frame, and any setup failure
// poisons the stream. A null frame flushes the encoder and finalises the
// stream.

use std::sync::{Arc, Mutex, Weak};

use ffmpeg_the_third as ffmpeg;

use ffmpeg::codec;
use ffmpeg::ffi;
use ffmpeg::format::Pixel;
use ffmpeg::software::{resampling, scaling};
use ffmpeg::util::frame::audio::Audio as AudioFrame;
use ffmpeg::util::frame::video::Video as VideoFrame;
use ffmpeg::Dictionary;
use ffmpeg::Rational as AvRational;

use mediaport_core::types::{
    ChannelLayout, Codec, CompressionStrategy, Dimensions, FieldOrder, Gop,
    InterpolationMethod, PixelFormat, Preset, Profile, SampleFormat, SampleRate, StreamType,
};
use mediaport_core::{lcritical, ldebug, linfo, lwarning, MediaProperty, PropertyBag, Rational,
                     TimeCode};

use crate::convert;
use crate::error::{MediaError, Result};
use crate::frame::{Frame, Native, SharedResampler, SharedScaler};
use crate::sink::Muxer;
use crate::source::Demuxer;

const RETRY_LIMIT: u32 = 100_000;
const TAG_TIMECODE: &str = "timecode";

/// Audio codecs that encode without a caller-supplied bitrate.
const NOBITRATE_CODECS: [codec::Id; 4] = [
    codec::Id::WAVPACK,
    codec::Id::PCM_S16LE,
    codec::Id::PCM_S32LE,
    codec::Id::FLAC,
];

enum Decoder {
    Video(ffmpeg::decoder::Video),
    Audio(ffmpeg::decoder::Audio),
}

struct Reader {
    demuxer: Weak<Mutex<Demuxer>>,
    /// Absolute stream index within the container.
    index: usize,
    decoder: Decoder,
    /// Expected timestamp delta between consecutive frames; drives the
    /// seek-vs-read-forward decision.
    pts_interval: i64,
    last_timestamp: i64,
    /// (size, duration) of the packet most recently fed to the decoder.
    last_packet: (i32, i64),
    eof_sent: bool,
    video_out: Option<SharedScaler>,
    audio_out: Option<SharedResampler>,
}

enum OpenedEncoder {
    Video(ffmpeg::encoder::video::Video),
    Audio(ffmpeg::encoder::Audio),
}

#[derive(PartialEq)]
enum SetupState {
    Pending,
    Ready,
    Failed,
}

struct Writer {
    muxer: Weak<Mutex<Muxer>>,
    /// Index of the output stream within the container.
    index: usize,
    av_codec: ffmpeg::Codec,
    state: SetupState,
    encoder: Option<OpenedEncoder>,
    /// Encoder-side time base, fixed at setup.
    time_base: AvRational,
    /// Pixel/sample format the encoder will be opened with.
    encoder_pix_fmt: Option<Pixel>,
    encoder_sample_fmt: Option<ffmpeg::format::Sample>,
    input_scaler: Option<scaling::Context>,
    input_resampler: Option<resampling::Context>,
    /// Running PTS: accumulated samples for audio, frame count for video.
    audio_samples: i64,
    video_pts: i64,
    finalised: bool,
}

enum Mode {
    Read(Reader),
    Write(Writer),
}

pub struct Stream {
    props: PropertyBag,
    locked: bool,
    stream_type: StreamType,
    mode: Mode,
}

impl Stream {
    // ── Construction ──────────────────────────────────────────────────────

    /// Build a reading stream over container stream `index`. Registers
    /// interest with the dispatcher, opens the decoder, and extracts header
    /// and first-frame properties.
    pub(crate) fn new_reading(
        demuxer: &Arc<Mutex<Demuxer>>,
        index: usize,
        source_frame_rate: Option<Rational>,
    ) -> Result<Stream> {
        demuxer.lock().unwrap().register_interest(index);

        let mut props = PropertyBag::new();
        let header;
        let decoder;
        {
            let guard = demuxer.lock().unwrap();
            let stream = guard
                .input
                .stream(index)
                .ok_or_else(|| MediaError::InvalidArgument(format!("no stream {index}")))?;
            header = HeaderInfo::read(&stream);
            decoder = open_decoder(&stream, header.codec_id, header.media_type)?;
        }

        let stream_type = match (header.media_type, header.avg_rate_den) {
            (ffi::AVMediaType::AVMEDIA_TYPE_AUDIO, _) => StreamType::Audio,
            (ffi::AVMediaType::AVMEDIA_TYPE_VIDEO, 0) => StreamType::Image,
            (ffi::AVMediaType::AVMEDIA_TYPE_VIDEO, _) => StreamType::Video,
            _ => {
                return Err(MediaError::Unsupported(
                    "stream is neither audio nor video".into(),
                ))
            }
        };

        extract_header_properties(&mut props, &header, &decoder);
        if let Some(rate) = source_frame_rate {
            // The container-level guessed rate is authoritative over the
            // per-stream average.
            props.set(MediaProperty::FrameRate, rate);
        }

        let reader = Reader {
            demuxer: Arc::downgrade(demuxer),
            index,
            decoder,
            pts_interval: header.pts_interval,
            last_timestamp: -1,
            last_packet: (-1, 0),
            eof_sent: false,
            video_out: None,
            audio_out: None,
        };

        let mut stream = Stream {
            props,
            locked: false,
            stream_type,
            mode: Mode::Read(reader),
        };
        if matches!(stream_type, StreamType::Video | StreamType::Image) {
            stream.extract_frame_properties();
        }
        Ok(stream)
    }

    /// Build a writing stream for `codec` inside the sink's container.
    pub(crate) fn new_writing(muxer: &Arc<Mutex<Muxer>>, codec: Codec) -> Result<Stream> {
        let codec_id = convert::codec_to_av(codec);
        let av_codec = ffmpeg::encoder::find(codec_id).ok_or_else(|| {
            lwarning!("unsupported encoder codec {codec:?}");
            MediaError::Unsupported(format!("no encoder for {codec:?}"))
        })?;

        let stream_type = match av_codec.medium() {
            ffmpeg::media::Type::Video => StreamType::Video,
            ffmpeg::media::Type::Audio => StreamType::Audio,
            _ => return Err(MediaError::Unsupported("codec is neither audio nor video".into())),
        };

        let index = {
            let mut guard = muxer.lock().unwrap();
            let ost = guard.octx.add_stream(av_codec)?;
            ost.index()
        };

        let mut props = PropertyBag::new();
        props.set(MediaProperty::Codec, codec);
        props.set(MediaProperty::CodecName, av_codec.name().to_string());

        Ok(Stream {
            props,
            locked: false,
            stream_type,
            mode: Mode::Write(Writer {
                muxer: Arc::downgrade(muxer),
                index,
                av_codec,
                state: SetupState::Pending,
                encoder: None,
                time_base: AvRational::new(1, 1),
                encoder_pix_fmt: None,
                encoder_sample_fmt: None,
                input_scaler: None,
                input_resampler: None,
                audio_samples: 0,
                video_pts: 0,
                finalised: false,
            }),
        })
    }

    // ── Properties ────────────────────────────────────────────────────────

    pub fn stream_type(&self) -> StreamType {
        self.stream_type
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

    /// Set a property. Ignored with a warning once the stream is locked by
    /// its first successful read or write.
    pub fn set_property(
        &mut self,
        prop: MediaProperty,
        value: impl mediaport_core::properties::FromProperty,
    ) {
        if self.locked {
            lwarning!("setting/changing a property of a stream that is in use is prohibited");
            return;
        }
        self.props.set(prop, value);
    }

    pub fn set_properties(
        &mut self,
        entries: std::collections::HashMap<MediaProperty, mediaport_core::PropertyValue>,
    ) {
        if self.locked {
            lwarning!("setting/changing properties of a stream that is in use is prohibited");
            return;
        }
        self.props.set_all(entries);
    }

    /// Playhead: timestamp of the most recently decoded frame.
    pub fn last_timestamp(&self) -> i64 {
        match &self.mode {
            Mode::Read(r) => r.last_timestamp,
            Mode::Write(_) => -1,
        }
    }

    // ── Reading ───────────────────────────────────────────────────────────

    /// Decode the next frame in sequence. `Ok(None)` is end of stream.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.frame(-1)
    }

    /// Retrieve the frame at `timestamp` (stream time-scale units), or the
    /// next frame in sequence when negative. Seeks when the target is
    /// behind the playhead or more than one PTS interval ahead; otherwise
    /// reads forward. The first frame at or past the target is returned.
    pub fn frame(&mut self, timestamp: i64) -> Result<Option<Frame>> {
        let reader = match &mut self.mode {
            Mode::Read(r) => r,
            Mode::Write(_) => {
                lwarning!("stream is set up for encoding");
                return Err(MediaError::InvalidArgument(
                    "frame() called on a writing stream".into(),
                ));
            }
        };

        if timestamp >= 0 && reader.last_timestamp != timestamp {
            let diff = (reader.last_timestamp - timestamp).abs();
            if diff > reader.pts_interval || timestamp < reader.last_timestamp {
                if let Err(e) = reader.seek(timestamp) {
                    lwarning!("failed to seek: {timestamp}");
                    return Err(e);
                }
            }
        }

        let result = if timestamp < 0 {
            reader.decode_next()
        } else {
            let mut retries = 0u32;
            loop {
                match reader.decode_next()? {
                    Some(frame) if frame.timestamp() >= timestamp => break Ok(Some(frame)),
                    Some(_) => {
                        retries += 1;
                        if retries >= RETRY_LIMIT {
                            lwarning!("failed to retrieve frame. ts={timestamp}");
                            break Ok(None);
                        }
                    }
                    None => break Ok(None),
                }
            }
        };
        if let Ok(Some(_)) = &result {
            self.locked = true;
        }
        result
    }

    /// Retrieve the frame at `second` seconds.
    pub fn frame_by_second(&mut self, second: f64) -> Result<Option<Frame>> {
        let scale = self
            .props
            .get::<Rational>(MediaProperty::Timescale)
            .ok_or(MediaError::MissingProperty("TIMESCALE"))?;
        let rate = self
            .props
            .get::<Rational>(MediaProperty::FrameRate)
            .ok_or(MediaError::MissingProperty("FRAME_RATE"))?;
        let timestamp = ((Rational::approximate(second) * rate) / scale).floor();
        self.frame(timestamp)
    }

    /// Retrieve frame number `frame_number`.
    pub fn frame_by_frame_number(&mut self, frame_number: i64) -> Result<Option<Frame>> {
        let scale = self
            .props
            .get::<Rational>(MediaProperty::Timescale)
            .ok_or(MediaError::MissingProperty("TIMESCALE"))?;
        let rate = self
            .props
            .get::<Rational>(MediaProperty::FrameRate)
            .ok_or(MediaError::MissingProperty("FRAME_RATE"))?;
        let timestamp = ((frame_number / rate) / scale).floor();
        self.frame(timestamp)
    }

    /// Decode the entire stream from timestamp 0 to EOF, fixing up
    /// FRAME_COUNT, DURATION and BITRATE from what was actually read.
    /// Properties are transiently unlocked for the duration.
    pub fn index(&mut self) -> Result<()> {
        if !matches!(self.mode, Mode::Read(_)) {
            return Err(MediaError::InvalidArgument(
                "index() called on a writing stream".into(),
            ));
        }
        self.locked = false;
        let result = self.index_inner();
        self.locked = true;
        result
    }

    fn index_inner(&mut self) -> Result<()> {
        let mut current = self.frame(0)?;
        if current.is_none() {
            return Err(MediaError::InvalidArgument(
                "stream produced no frames to index".into(),
            ));
        }
        let mut frame_count: i64 = 0;
        let mut total_bytes: i64 = 0;
        let mut duration_ticks: i64 = 0;
        while let Some(mut frame) = current {
            frame.extract_properties();
            frame_count += 1;
            total_bytes += frame
                .property::<i32>(MediaProperty::FramePacketSize)
                .unwrap_or(0) as i64;
            duration_ticks += frame
                .property::<i64>(MediaProperty::FrameDuration)
                .unwrap_or(0);
            current = self.next_frame()?;
        }

        let scale = self
            .props
            .get::<Rational>(MediaProperty::Timescale)
            .ok_or(MediaError::MissingProperty("TIMESCALE"))?;
        let rate = self
            .props
            .get::<Rational>(MediaProperty::FrameRate)
            .ok_or(MediaError::MissingProperty("FRAME_RATE"))?;

        self.props.set(MediaProperty::FrameCount, frame_count);
        self.props
            .set(MediaProperty::Duration, duration_ticks * scale);
        let bitrate = (total_bytes / (frame_count / rate)).round();
        self.props.set(MediaProperty::Bitrate, bitrate);
        Ok(())
    }

    /// Configure pixel-format conversion (and optional scaling) applied to
    /// every subsequently decoded visual frame.
    pub fn set_output_format_video(
        &mut self,
        format: PixelFormat,
        dims: Option<Dimensions>,
        interp: InterpolationMethod,
    ) -> Result<()> {
        let src_format = self
            .props
            .get::<PixelFormat>(MediaProperty::PixelFormat)
            .ok_or(MediaError::MissingProperty("PIXEL_FORMAT"))?;
        let src_dims = self
            .props
            .get::<Dimensions>(MediaProperty::Dimensions)
            .ok_or(MediaError::MissingProperty("DIMENSIONS"))?;
        let reader = match &mut self.mode {
            Mode::Read(r) => r,
            Mode::Write(_) => {
                lwarning!("stream is set up for encoding");
                return Err(MediaError::InvalidArgument(
                    "set_output_format on a writing stream".into(),
                ));
            }
        };

        let dst_av = convert::pixel_to_av(format);
        let src_av = convert::pixel_to_av(src_format);
        if dst_av == Pixel::None || src_av == Pixel::None {
            lcritical!("unknown pixel format for output conversion");
            return Err(MediaError::Unsupported("unknown pixel format".into()));
        }
        let out_dims = match dims {
            Some(d) if d.width > 0 && d.height > 0 => d,
            _ => src_dims,
        };

        let ctx = scaling::Context::get(
            src_av,
            src_dims.width as u32,
            src_dims.height as u32,
            dst_av,
            out_dims.width as u32,
            out_dims.height as u32,
            convert::interpolation_flags(interp),
        )?;
        reader.video_out = Some(Arc::new(Mutex::new(ctx)));
        Ok(())
    }

    /// Configure sample-format (and optional rate) conversion applied to
    /// every subsequently decoded audio frame; the channel layout is kept.
    pub fn set_output_format_audio(
        &mut self,
        format: SampleFormat,
        rate: Option<SampleRate>,
    ) -> Result<()> {
        let layout = self
            .props
            .get::<ChannelLayout>(MediaProperty::AudioLayout)
            .ok_or(MediaError::MissingProperty("AUDIO_LAYOUT"))?;
        let src_rate = self
            .props
            .get::<i32>(MediaProperty::AudioSamplingRate)
            .ok_or(MediaError::MissingProperty("AUDIO_SAMPLING_RATE"))?;
        let src_format = self
            .props
            .get::<SampleFormat>(MediaProperty::AudioFormat)
            .ok_or(MediaError::MissingProperty("AUDIO_FORMAT"))?;
        let reader = match &mut self.mode {
            Mode::Read(r) => r,
            Mode::Write(_) => {
                lwarning!("stream is set up for encoding");
                return Err(MediaError::InvalidArgument(
                    "set_output_format on a writing stream".into(),
                ));
            }
        };

        let av_layout = convert::layout_to_av(layout);
        let dst_rate = rate.unwrap_or(src_rate);
        let ctx = resampling::Context::get2(
            convert::sample_to_av(src_format),
            av_layout.clone(),
            src_rate as u32,
            convert::sample_to_av(format),
            av_layout,
            dst_rate as u32,
        )
        .map_err(|e| {
            lcritical!("could not init resample context: {e}");
            MediaError::from(e)
        })?;
        reader.audio_out = Some(Arc::new(Mutex::new(ctx)));
        Ok(())
    }

    // ── Writing ───────────────────────────────────────────────────────────

    /// Declare the pixel format pushed frames will arrive in. If the
    /// encoder cannot take it directly, a converter to the encoder's first
    /// supported format is inserted automatically.
    pub fn set_input_format_video(&mut self, format: PixelFormat) -> Result<()> {
        let dims = self.props.get::<Dimensions>(MediaProperty::Dimensions);
        let writer = match &mut self.mode {
            Mode::Write(w) => w,
            Mode::Read(_) => {
                return Err(MediaError::InvalidArgument(
                    "set_input_format on a reading stream".into(),
                ))
            }
        };

        let requested = convert::pixel_to_av(format);
        let supported = supported_pixel_formats(&writer.av_codec);
        if supported.is_empty() {
            lcritical!("encoder has no known supported pixel formats");
            return Err(MediaError::Unsupported(
                "encoder reports no pixel formats".into(),
            ));
        }
        if supported.contains(&requested) {
            writer.encoder_pix_fmt = Some(requested);
            return Ok(());
        }

        // Auto-insert a converter to the encoder's preferred format.
        let fallback = supported[0];
        let Some(dims) = dims else {
            lwarning!(
                "invalid pixel format set as input; valid formats: {:?}",
                supported
            );
            return Err(MediaError::Unsupported(format!(
                "pixel format {format:?} not accepted by encoder"
            )));
        };
        let ctx = scaling::Context::get(
            requested,
            dims.width as u32,
            dims.height as u32,
            fallback,
            dims.width as u32,
            dims.height as u32,
            scaling::Flags::BILINEAR,
        )?;
        writer.input_scaler = Some(ctx);
        writer.encoder_pix_fmt = Some(fallback);
        lwarning!("auto converting input format to {:?}", fallback);
        Ok(())
    }

    /// Declare the sample format pushed frames will arrive in, with the
    /// same auto-conversion rule as the video variant. AUDIO_LAYOUT and
    /// AUDIO_SAMPLING_RATE must be set before a converter can be built.
    pub fn set_input_format_audio(
        &mut self,
        format: SampleFormat,
        rate: Option<SampleRate>,
    ) -> Result<()> {
        let dst_rate = self.props.get::<i32>(MediaProperty::AudioSamplingRate);
        let layout = self.props.get::<ChannelLayout>(MediaProperty::AudioLayout);
        let writer = match &mut self.mode {
            Mode::Write(w) => w,
            Mode::Read(_) => {
                return Err(MediaError::InvalidArgument(
                    "set_input_format on a reading stream".into(),
                ))
            }
        };

        let requested = convert::sample_to_av(format);
        let supported = supported_sample_formats(&writer.av_codec);
        if supported.is_empty() {
            lcritical!("encoder has no known supported sample formats");
            return Err(MediaError::Unsupported(
                "encoder reports no sample formats".into(),
            ));
        }
        if supported.contains(&requested) {
            writer.encoder_sample_fmt = Some(requested);
            return Ok(());
        }

        let fallback = supported[0];
        let Some(dst_rate) = dst_rate else {
            lcritical!("stream sampling rate has not been set");
            return Err(MediaError::MissingProperty("AUDIO_SAMPLING_RATE"));
        };
        let Some(layout) = layout else {
            lcritical!("stream channel layout has not been set");
            return Err(MediaError::MissingProperty("AUDIO_LAYOUT"));
        };
        let src_rate = rate.unwrap_or(dst_rate);
        let av_layout = convert::layout_to_av(layout);
        let ctx = resampling::Context::get2(
            requested,
            av_layout.clone(),
            src_rate as u32,
            fallback,
            av_layout,
            dst_rate as u32,
        )
        .map_err(|e| {
            lcritical!("failed to setup auto audio-converter: {e}");
            MediaError::from(e)
        })?;
        writer.input_resampler = Some(ctx);
        writer.encoder_sample_fmt = Some(fallback);
        linfo!("setup an auto audio-converter");
        Ok(())
    }

    /// Encode one frame, or flush the encoder when `frame` is `None`.
    /// The first call performs encoder setup and writes the container
    /// header; a setup failure poisons the stream.
    pub fn write_frame(&mut self, frame: Option<&mut Frame>) -> Result<()> {
        if !matches!(self.mode, Mode::Write(_)) {
            return Err(MediaError::InvalidArgument(
                "write_frame called on a reading stream".into(),
            ));
        }
        {
            let writer = match &mut self.mode {
                Mode::Write(w) => w,
                Mode::Read(_) => unreachable!(),
            };
            if writer.finalised {
                return Err(MediaError::Finalised);
            }
            if writer.state == SetupState::Failed {
                return Err(MediaError::EncoderFailed);
            }
        }
        if self.writer().state == SetupState::Pending {
            match self.setup_encoder() {
                Ok(()) => self.writer_mut().state = SetupState::Ready,
                Err(e) => {
                    self.writer_mut().state = SetupState::Failed;
                    lcritical!("failed to setup encoder: {e}");
                    return Err(e);
                }
            }
        }

        let writer = self.writer_mut();
        match frame {
            None => {
                match writer.encoder.as_mut() {
                    Some(OpenedEncoder::Video(enc)) => enc.send_eof()?,
                    Some(OpenedEncoder::Audio(enc)) => enc.send_eof()?,
                    None => return Err(MediaError::EncoderFailed),
                }
                writer.finalised = true;
            }
            Some(frame) => {
                send_one_frame(writer, frame)?;
            }
        }
        self.drain_encoder()?;
        self.locked = true;
        Ok(())
    }

    fn writer(&self) -> &Writer {
        match &self.mode {
            Mode::Write(w) => w,
            Mode::Read(_) => unreachable!("checked by caller"),
        }
    }

    fn writer_mut(&mut self) -> &mut Writer {
        match &mut self.mode {
            Mode::Write(w) => w,
            Mode::Read(_) => unreachable!("checked by caller"),
        }
    }

    // ── Encoder setup ─────────────────────────────────────────────────────

    fn setup_encoder(&mut self) -> Result<()> {
        match self.stream_type {
            StreamType::Audio => self.setup_audio_encoder(),
            StreamType::Video | StreamType::Image => self.setup_video_encoder(),
        }
    }

    fn setup_audio_encoder(&mut self) -> Result<()> {
        let props = self.props.clone();
        let writer = self.writer_mut();
        let muxer = writer.muxer.upgrade().ok_or(MediaError::SinkGone)?;
        let mut mx = muxer.lock().unwrap();

        query_container_codec(&mx, &writer.av_codec)?;

        let Some(sample_rate) = props.get::<i32>(MediaProperty::AudioSamplingRate) else {
            lcritical!("audio sample rate property not set");
            return Err(MediaError::MissingProperty("AUDIO_SAMPLING_RATE"));
        };
        check_supported_sample_rates(&writer.av_codec, sample_rate)?;
        let Some(layout) = props.get::<ChannelLayout>(MediaProperty::AudioLayout) else {
            lcritical!("audio layout property not set");
            return Err(MediaError::MissingProperty("AUDIO_LAYOUT"));
        };

        let codec_id = writer.av_codec.id();
        let bitrate = if NOBITRATE_CODECS.contains(&codec_id) {
            props.get::<i64>(MediaProperty::Bitrate)
        } else {
            let Some(b) = props.get::<i64>(MediaProperty::Bitrate) else {
                lcritical!("audio bitrate property not set");
                return Err(MediaError::MissingProperty("BITRATE"));
            };
            Some(b)
        };

        let Some(sample_fmt) = writer.encoder_sample_fmt else {
            lcritical!("input sample format has not been specified");
            return Err(MediaError::MissingProperty("input sample format"));
        };

        let time_base = AvRational::new(1, sample_rate);
        let ctx = codec::context::Context::new_with_codec(writer.av_codec);
        let mut enc = ctx.encoder().audio()?;
        enc.set_rate(sample_rate);
        enc.set_ch_layout(convert::layout_to_av(layout));
        enc.set_format(sample_fmt);
        enc.set_time_base(time_base);
        if let Some(b) = bitrate {
            enc.set_bit_rate(b as usize);
        }
        if container_wants_global_header(&mx) {
            enc.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let opened = enc.open_as_with(writer.av_codec, Dictionary::new()).map_err(|e| {
            lcritical!("could not open output audio encoder: {e}");
            MediaError::from(e)
        })?;

        copy_encoder_parameters(&mut mx, writer.index, opened.as_ptr() as *mut _)?;
        set_output_stream_time_base(&mut mx, writer.index, time_base);

        writer.encoder = Some(OpenedEncoder::Audio(opened));
        writer.time_base = time_base;
        mx.write_header_once()
    }

    fn setup_video_encoder(&mut self) -> Result<()> {
        let props = self.props.clone();
        let writer = self.writer_mut();
        let muxer = writer.muxer.upgrade().ok_or(MediaError::SinkGone)?;
        let mut mx = muxer.lock().unwrap();

        query_container_codec(&mx, &writer.av_codec)?;

        let Some(dims) = props.get::<Dimensions>(MediaProperty::Dimensions) else {
            lcritical!("video dimensions property not set");
            return Err(MediaError::MissingProperty("DIMENSIONS"));
        };
        let Some(frame_rate) = props.get::<Rational>(MediaProperty::FrameRate) else {
            lcritical!("video frame-rate property not set");
            return Err(MediaError::MissingProperty("FRAME_RATE"));
        };
        let Some(compression) = props.get::<CompressionStrategy>(MediaProperty::Compression)
        else {
            lcritical!("video compression method property not set");
            return Err(MediaError::MissingProperty("COMPRESSION"));
        };
        let Some(pix_fmt) = writer.encoder_pix_fmt else {
            lcritical!("input pixel format has not been specified");
            return Err(MediaError::MissingProperty("input pixel format"));
        };

        let rate_av = AvRational::new(
            frame_rate.numerator() as i32,
            frame_rate.denominator() as i32,
        );
        let time_base = rate_av.invert();

        let ctx = codec::context::Context::new_with_codec(writer.av_codec);
        let mut enc = ctx.encoder().video()?;
        enc.set_width(dims.width as u32);
        enc.set_height(dims.height as u32);
        enc.set_format(pix_fmt);
        enc.set_frame_rate(Some(rate_av));
        enc.set_time_base(time_base);

        let mut opts = Dictionary::new();
        match compression {
            CompressionStrategy::Cbr => {
                let Some(bitrate) = props.get::<i64>(MediaProperty::Bitrate) else {
                    lcritical!("video bitrate property not set");
                    return Err(MediaError::MissingProperty("BITRATE"));
                };
                enc.set_bit_rate(bitrate as usize);
                enc.set_max_bit_rate(bitrate as usize);
                unsafe {
                    (*enc.as_mut_ptr()).rc_min_rate = bitrate;
                }
            }
            CompressionStrategy::TargetBitrate => {
                let Some(bitrate) = props.get::<i64>(MediaProperty::Bitrate) else {
                    lcritical!("video bitrate property not set");
                    return Err(MediaError::MissingProperty("BITRATE"));
                };
                enc.set_bit_rate(bitrate as usize);
                if let Some(max) = props.get::<i64>(MediaProperty::MaxBitrate) {
                    enc.set_max_bit_rate(max as usize);
                }
                if let Some(min) = props.get::<i64>(MediaProperty::MinBitrate) {
                    unsafe {
                        (*enc.as_mut_ptr()).rc_min_rate = min;
                    }
                }
            }
            CompressionStrategy::Crf(quality) => {
                // Quality-driven VBR; bit_rate 0 signals no rate target.
                enc.set_bit_rate(0);
                opts.set("crf", &quality.to_string());
            }
        }

        if let Some(gop) = props.get::<Gop>(MediaProperty::Gop) {
            enc.set_gop(gop.n as u32);
            enc.set_max_b_frames(gop.m as usize);
        }

        let threads = props
            .get::<i32>(MediaProperty::Threads)
            .unwrap_or_else(|| {
                let n = hardware_concurrency();
                linfo!("automatically setting thread count to {n} threads");
                n
            });
        unsafe {
            let ptr = enc.as_mut_ptr();
            (*ptr).thread_count = threads;
            (*ptr).thread_type = ffi::FF_THREAD_SLICE as i32;
        }

        apply_profile(&mut enc, &props, writer.av_codec.id());
        if writer.av_codec.id() == codec::Id::H264 {
            if let Some(preset) = props.get::<Preset>(MediaProperty::Preset) {
                opts.set("preset", convert::preset_name(preset));
            }
        }

        if container_wants_global_header(&mx) {
            enc.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let opened = enc.open_as_with(writer.av_codec, opts).map_err(|e| {
            lcritical!("could not open output video encoder: {e}");
            MediaError::from(e)
        })?;

        copy_encoder_parameters(&mut mx, writer.index, opened.as_ptr() as *mut _)?;
        set_output_stream_time_base(&mut mx, writer.index, time_base);

        writer.encoder = Some(OpenedEncoder::Video(opened));
        writer.time_base = time_base;
        mx.write_header_once()
    }

    fn drain_encoder(&mut self) -> Result<()> {
        let writer = self.writer_mut();
        let muxer = writer.muxer.upgrade().ok_or(MediaError::SinkGone)?;
        let mut mx = muxer.lock().unwrap();
        let ost_time_base = mx
            .octx
            .stream(writer.index)
            .map(|s| s.time_base())
            .unwrap_or(writer.time_base);

        let mut packet = ffmpeg::Packet::empty();
        loop {
            let received = match writer.encoder.as_mut() {
                Some(OpenedEncoder::Video(enc)) => enc.receive_packet(&mut packet),
                Some(OpenedEncoder::Audio(enc)) => enc.receive_packet(&mut packet),
                None => return Err(MediaError::EncoderFailed),
            };
            if received.is_err() {
                // Encoder wants more input, or is fully flushed.
                return Ok(());
            }
            packet.set_stream(writer.index);
            packet.rescale_ts(writer.time_base, ost_time_base);
            packet.write_interleaved(&mut mx.octx).map_err(|e| {
                lcritical!("failed to write frame to container: {e}");
                MediaError::from(e)
            })?;
        }
    }

    // ── First-frame property refinement (reading, visual) ─────────────────

    /// Decode frame 0 to learn field order, colour description and a more
    /// trustworthy PAR/DAR than the header carries, then rewind.
    fn extract_frame_properties(&mut self) {
        match self.frame(0) {
            Ok(Some(mut frame)) => {
                frame.extract_properties();
                if self.stream_type == StreamType::Video {
                    if let Some(order) = frame.property::<FieldOrder>(MediaProperty::FieldOrder) {
                        self.props.set(MediaProperty::FieldOrder, order);
                    }
                } else {
                    ldebug!("setting image progressive");
                    self.props
                        .set(MediaProperty::FieldOrder, FieldOrder::Progressive);
                }

                let header_par = self.props.get::<Rational>(MediaProperty::PixelAspectRatio);
                if header_par.is_none() || header_par == Some(Rational::ZERO) {
                    if let Some(par) = frame.property::<Rational>(MediaProperty::PixelAspectRatio)
                    {
                        self.props.set(MediaProperty::PixelAspectRatio, par);
                    }
                }
                if let Some(space) =
                    frame.property::<mediaport_core::types::ColourSpace>(MediaProperty::ColourSpace)
                {
                    self.props.set(MediaProperty::ColourSpace, space);
                }
                if let Some(dar) = frame.property::<Rational>(MediaProperty::DisplayAspectRatio) {
                    self.props.set(MediaProperty::DisplayAspectRatio, dar);
                }
            }
            _ => lcritical!("failed to read a frame from stream"),
        }
        // Ensure the playhead is back at the start.
        if let Mode::Read(reader) = &mut self.mode {
            let _ = reader.seek(0);
            reader.last_timestamp = -1;
        }
        self.locked = false;
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if let Mode::Read(reader) = &self.mode {
            if let Some(demuxer) = reader.demuxer.upgrade() {
                demuxer.lock().unwrap().unregister_interest(reader.index);
            }
        }
    }
}

// ── Reader internals ──────────────────────────────────────────────────────

impl Reader {
    /// Pull packets through the dispatcher and decode until a frame is
    /// produced. `Ok(None)` is end of stream; single-frame decode errors
    /// are logged and skipped.
    fn decode_next(&mut self) -> Result<Option<Frame>> {
        let demuxer = self.demuxer.upgrade().ok_or(MediaError::SourceGone)?;
        loop {
            if let Some(frame) = self.try_receive() {
                return Ok(Some(frame));
            }
            if self.eof_sent {
                return Ok(None);
            }
            let packet = demuxer.lock().unwrap().next_packet(self.index);
            match packet {
                Some(packet) => {
                    self.last_packet = (packet.size() as i32, packet.duration());
                    let sent = match &mut self.decoder {
                        Decoder::Video(d) => d.send_packet(&packet),
                        Decoder::Audio(d) => d.send_packet(&packet),
                    };
                    if let Err(e) = sent {
                        lwarning!("failed sending a packet for decoding: {e}");
                    }
                }
                None => {
                    let _ = match &mut self.decoder {
                        Decoder::Video(d) => d.send_eof(),
                        Decoder::Audio(d) => d.send_eof(),
                    };
                    self.eof_sent = true;
                }
            }
        }
    }

    fn try_receive(&mut self) -> Option<Frame> {
        match &mut self.decoder {
            Decoder::Video(decoder) => {
                let mut decoded = VideoFrame::empty();
                match decoder.receive_frame(&mut decoded) {
                    Ok(()) => {
                        let ts = decoded.timestamp().unwrap_or(self.last_timestamp + 1);
                        self.last_timestamp = ts;
                        let mut frame = Frame::from_video(decoded, ts, self.video_out.clone());
                        frame.set_packet_info(self.last_packet.0, self.last_packet.1);
                        Some(frame)
                    }
                    Err(e) => {
                        log_receive_error(e);
                        None
                    }
                }
            }
            Decoder::Audio(decoder) => {
                let mut decoded = AudioFrame::empty();
                match decoder.receive_frame(&mut decoded) {
                    Ok(()) => {
                        let ts = decoded.timestamp().unwrap_or(self.last_timestamp + 1);
                        self.last_timestamp = ts;
                        let mut frame = Frame::from_audio(decoded, ts, self.audio_out.clone());
                        frame.set_packet_info(self.last_packet.0, self.last_packet.1);
                        Some(frame)
                    }
                    Err(e) => {
                        log_receive_error(e);
                        None
                    }
                }
            }
        }
    }

    /// Flush the decoder, drop the dispatcher's stale packets, and reposition
    /// the demuxer on the keyframe at or before `timestamp`.
    fn seek(&mut self, timestamp: i64) -> Result<()> {
        let demuxer = self.demuxer.upgrade().ok_or(MediaError::SourceGone)?;
        let mut guard = demuxer.lock().unwrap();
        guard.clear_queues();
        match &mut self.decoder {
            Decoder::Video(d) => d.flush(),
            Decoder::Audio(d) => d.flush(),
        }
        ldebug!("seeking. ts={timestamp}, idx={}", self.index);
        let ret = unsafe {
            ffi::av_seek_frame(
                guard.input.as_mut_ptr(),
                self.index as i32,
                timestamp,
                ffi::AVSEEK_FLAG_BACKWARD as i32,
            )
        };
        if ret < 0 {
            let e = ffmpeg::Error::from(ret);
            lwarning!("could not seek frame: {e}");
            return Err(e.into());
        }
        self.eof_sent = false;
        Ok(())
    }
}

fn log_receive_error(e: ffmpeg::Error) {
    match e {
        ffmpeg::Error::Eof => {}
        ffmpeg::Error::Other { errno: ffi::EAGAIN } => {}
        other => lwarning!("failed to decode: {other}"),
    }
}

// ── Shared helpers ────────────────────────────────────────────────────────

struct HeaderInfo {
    codec_id: codec::Id,
    media_type: ffi::AVMediaType,
    time_base: AvRational,
    avg_rate: AvRational,
    avg_rate_den: i32,
    duration: i64,
    nb_frames: i64,
    bit_rate: i64,
    sample_aspect_ratio: AvRational,
    profile: i32,
    pts_interval: i64,
    timecode_tag: Option<String>,
}

impl HeaderInfo {
    fn read(stream: &ffmpeg::Stream<'_>) -> HeaderInfo {
        let params = stream.parameters();
        let (codec_id, media_type, bit_rate, sar, profile) = unsafe {
            let p = params.as_ptr();
            (
                codec::Id::from((*p).codec_id),
                (*p).codec_type,
                (*p).bit_rate,
                (*p).sample_aspect_ratio,
                (*p).profile,
            )
        };
        let time_base = stream.time_base();
        let avg_rate = stream.avg_frame_rate();
        let real_rate = stream.rate();

        let pts_interval = if real_rate.denominator() > 0 && real_rate.numerator() > 0 {
            let tb = Rational::new(time_base.numerator() as i64, time_base.denominator() as i64);
            let fr = Rational::new(real_rate.numerator() as i64, real_rate.denominator() as i64);
            ((1i64 / fr) / tb).round()
        } else {
            0
        };

        HeaderInfo {
            codec_id,
            media_type,
            time_base,
            avg_rate,
            avg_rate_den: avg_rate.denominator(),
            duration: stream.duration(),
            nb_frames: stream.frames(),
            bit_rate,
            sample_aspect_ratio: AvRational::new(sar.num, sar.den.max(0)),
            profile,
            pts_interval,
            timecode_tag: stream.metadata().get(TAG_TIMECODE).map(String::from),
        }
    }
}

fn open_decoder(
    stream: &ffmpeg::Stream<'_>,
    codec_id: codec::Id,
    media_type: ffi::AVMediaType,
) -> Result<Decoder> {
    let mut ctx = codec::context::Context::from_parameters(stream.parameters()).map_err(|e| {
        lcritical!("failed to populate codec context: {e}");
        MediaError::from(e)
    })?;
    unsafe {
        let ptr = ctx.as_mut_ptr();
        (*ptr).thread_count = hardware_concurrency();
        if codec_id == codec::Id::H264 {
            // Equivalent of the fastdecode/zerolatency tunings.
            (*ptr).flags |= ffi::AV_CODEC_FLAG_LOW_DELAY as i32;
            (*ptr).flags2 |= ffi::AV_CODEC_FLAG2_FAST as i32;
        }
    }

    let decoder = match media_type {
        ffi::AVMediaType::AVMEDIA_TYPE_VIDEO => ctx.decoder().video().map(Decoder::Video),
        ffi::AVMediaType::AVMEDIA_TYPE_AUDIO => ctx.decoder().audio().map(Decoder::Audio),
        _ => {
            return Err(MediaError::Unsupported(
                "stream is neither audio nor video".into(),
            ))
        }
    };
    decoder.map_err(|e| {
        lcritical!("could not open codec: {e}");
        MediaError::from(e)
    })
}

fn extract_header_properties(props: &mut PropertyBag, header: &HeaderInfo, decoder: &Decoder) {
    if let Some(codec) = convert::codec_from_av(header.codec_id) {
        props.set(MediaProperty::Codec, codec);
    }
    if let Some(codec) = ffmpeg::decoder::find(header.codec_id) {
        props.set(MediaProperty::CodecName, codec.name().to_string());
    }
    if header.avg_rate_den != 0 {
        props.set(
            MediaProperty::FrameRate,
            Rational::new(
                header.avg_rate.numerator() as i64,
                header.avg_rate_den as i64,
            ),
        );
    }
    let mut timescale = None;
    if header.time_base.denominator() > 0 {
        let scale = Rational::new(
            header.time_base.numerator() as i64,
            header.time_base.denominator() as i64,
        );
        timescale = Some(scale);
        props.set(MediaProperty::Timescale, scale);
        props.set(MediaProperty::Duration, header.duration * scale);
    }
    props.set(MediaProperty::Bitrate, header.bit_rate);

    match decoder {
        Decoder::Video(v) => {
            props.set(MediaProperty::FrameCount, header.nb_frames);
            props.set(
                MediaProperty::PixelFormat,
                convert::pixel_from_av(v.format()),
            );
            let dims = Dimensions {
                width: v.width() as i32,
                height: v.height() as i32,
            };
            props.set(MediaProperty::Dimensions, dims);

            let sar = header.sample_aspect_ratio;
            if sar.denominator() > 0 && sar.numerator() > 0 {
                let par = Rational::new(sar.numerator() as i64, sar.denominator() as i64);
                props.set(MediaProperty::PixelAspectRatio, par);
                if dims.height > 0 {
                    props.set(
                        MediaProperty::DisplayAspectRatio,
                        par * Rational::new(dims.width as i64, dims.height as i64),
                    );
                }
            } else if dims.height > 0 {
                props.set(
                    MediaProperty::DisplayAspectRatio,
                    Rational::new(dims.width as i64, dims.height as i64),
                );
            }
            if let Some(codec) = convert::codec_from_av(header.codec_id) {
                if let Some(profile) = convert::profile_from_av(codec, header.profile) {
                    props.set(MediaProperty::Profile, profile);
                }
            }
        }
        Decoder::Audio(a) => {
            let channels = a.ch_layout().channels() as i32;
            props.set(MediaProperty::AudioChannels, channels);
            props.set(MediaProperty::AudioSamplingRate, a.rate() as i32);
            props.set(
                MediaProperty::AudioFormat,
                convert::sample_from_av(a.format()),
            );
            props.set(
                MediaProperty::AudioLayout,
                convert::layout_from_channels(channels),
            );
        }
    }

    // Start timecode from the stream's metadata, scaled to this stream.
    if let (Some(scale), Some(tc_str)) = (timescale, header.timecode_tag.as_deref()) {
        if let Some(rate) = props.get::<Rational>(MediaProperty::FrameRate) {
            let mut tc = TimeCode::new(scale, rate, 0);
            if !tc.set_timecode(tc_str) {
                lwarning!("failed to configure start timecode");
            }
            props.set(MediaProperty::StartTimecode, tc);
        }
    }
}

fn hardware_concurrency() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(1)
}

fn supported_pixel_formats(codec: &ffmpeg::Codec) -> Vec<Pixel> {
    let mut formats = Vec::new();
    unsafe {
        let mut list = (*codec.as_ptr()).pix_fmts;
        if list.is_null() {
            return formats;
        }
        while (*list) != ffi::AVPixelFormat::AV_PIX_FMT_NONE {
            formats.push(Pixel::from(*list));
            list = list.add(1);
        }
    }
    formats
}

fn supported_sample_formats(codec: &ffmpeg::Codec) -> Vec<ffmpeg::format::Sample> {
    let mut formats = Vec::new();
    unsafe {
        let mut list = (*codec.as_ptr()).sample_fmts;
        if list.is_null() {
            return formats;
        }
        while (*list) != ffi::AVSampleFormat::AV_SAMPLE_FMT_NONE {
            formats.push(ffmpeg::format::Sample::from(*list));
            list = list.add(1);
        }
    }
    formats
}

/// A codec exposing a fixed list of supported rates constrains the caller's
/// AUDIO_SAMPLING_RATE; a codec without one accepts anything.
fn check_supported_sample_rates(codec: &ffmpeg::Codec, sample_rate: i32) -> Result<()> {
    unsafe {
        let mut rates = (*codec.as_ptr()).supported_samplerates;
        if rates.is_null() {
            lwarning!("unable to verify set sample-rate against codec supported rates");
            return Ok(());
        }
        while *rates != 0 {
            if *rates == sample_rate {
                return Ok(());
            }
            rates = rates.add(1);
        }
    }
    lcritical!("invalid sample rate set for audio encoder");
    Err(MediaError::Unsupported(format!(
        "sample rate {sample_rate} not supported by encoder"
    )))
}

fn query_container_codec(mx: &Muxer, codec: &ffmpeg::Codec) -> Result<()> {
    let ret = unsafe {
        ffi::avformat_query_codec(
            (*mx.octx.as_ptr()).oformat,
            codec.id().into(),
            ffi::FF_COMPLIANCE_NORMAL as i32,
        )
    };
    if ret == 1 {
        Ok(())
    } else {
        lcritical!(
            "the codec '{}' is not supported in this container",
            codec.name()
        );
        Err(MediaError::Unsupported(format!(
            "codec {} rejected by output container",
            codec.name()
        )))
    }
}

fn container_wants_global_header(mx: &Muxer) -> bool {
    unsafe {
        let oformat = (*mx.octx.as_ptr()).oformat;
        !oformat.is_null() && ((*oformat).flags & ffi::AVFMT_GLOBALHEADER as i32) != 0
    }
}

fn copy_encoder_parameters(
    mx: &mut Muxer,
    stream_index: usize,
    encoder_ctx: *mut ffi::AVCodecContext,
) -> Result<()> {
    let ret = unsafe {
        ffi::avcodec_parameters_from_context(
            (**(*mx.octx.as_mut_ptr()).streams.add(stream_index)).codecpar,
            encoder_ctx,
        )
    };
    if ret < 0 {
        let e = ffmpeg::Error::from(ret);
        lcritical!("could not copy encoder parameters to output stream: {e}");
        return Err(e.into());
    }
    Ok(())
}

fn set_output_stream_time_base(mx: &mut Muxer, stream_index: usize, time_base: AvRational) {
    unsafe {
        (**(*mx.octx.as_mut_ptr()).streams.add(stream_index)).time_base = time_base.into();
    }
}

fn apply_profile(
    enc: &mut ffmpeg::encoder::video::Video,
    props: &PropertyBag,
    codec_id: codec::Id,
) {
    let Some(profile) = props.get::<Profile>(MediaProperty::Profile) else {
        return;
    };
    let valid = match codec_id {
        codec::Id::H264 => matches!(
            profile,
            Profile::H264Baseline
                | Profile::H264Main
                | Profile::H264High
                | Profile::H264High10
                | Profile::H264High422
                | Profile::H264High444
        ),
        codec::Id::MPEG2VIDEO => matches!(
            profile,
            Profile::Mpeg2Simple | Profile::Mpeg2Main | Profile::Mpeg2High | Profile::Mpeg2_422
        ),
        codec::Id::DNXHD => matches!(
            profile,
            Profile::Dnxhd
                | Profile::DnxhrLb
                | Profile::DnxhrSq
                | Profile::DnxhrHq
                | Profile::DnxhrHqx
                | Profile::Dnxhr444
        ),
        _ => false,
    };
    if valid {
        unsafe {
            (*enc.as_mut_ptr()).profile = convert::profile_to_av(profile);
        }
    } else {
        // Encode continues with the backend default.
        lwarning!("incompatible profile chosen for {codec_id:?} encoder");
    }
}

fn send_one_frame(writer: &mut Writer, frame: &mut Frame) -> Result<()> {
    let native = frame.native_mut().ok_or_else(|| {
        MediaError::InvalidArgument("frame has no allocated data".into())
    })?;

    match (writer.encoder.as_mut(), native) {
        (Some(OpenedEncoder::Audio(enc)), Native::Audio(af)) => {
            if let Some(resampler) = writer.input_resampler.as_mut() {
                let mut converted = AudioFrame::empty();
                resampler.run(af, &mut converted).map_err(|e| {
                    lcritical!("failed to convert audio sample: {e}");
                    MediaError::from(e)
                })?;
                converted.set_pts(Some(writer.audio_samples));
                writer.audio_samples += converted.samples() as i64;
                enc.send_frame(&converted)?;
            } else {
                af.set_pts(Some(writer.audio_samples));
                writer.audio_samples += af.samples() as i64;
                enc.send_frame(af)?;
            }
        }
        (Some(OpenedEncoder::Video(enc)), Native::Video(vf)) => {
            if let Some(scaler) = writer.input_scaler.as_mut() {
                let mut converted = VideoFrame::empty();
                scaler.run(vf, &mut converted).map_err(|e| {
                    lcritical!("failed to convert video frame: {e}");
                    MediaError::from(e)
                })?;
                converted.set_pts(Some(writer.video_pts));
                writer.video_pts += 1;
                enc.send_frame(&converted)?;
            } else {
                vf.set_pts(Some(writer.video_pts));
                writer.video_pts += 1;
                enc.send_frame(vf)?;
            }
        }
        _ => {
            return Err(MediaError::InvalidArgument(
                "frame media type does not match the stream's encoder".into(),
            ))
        }
    }
    Ok(())
}
