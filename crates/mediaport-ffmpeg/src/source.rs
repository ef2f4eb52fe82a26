// crates/mediaport-ffmpeg/src/source.rs
//
// Container reading. The Source owns the demuxer and a cross-stream packet
// buffer so multiple Streams can advance independently without re-reading
// the file: a packet pulled for one stream is queued for any other stream
// that has registered interest, and discarded otherwise. Any seek clears
// the whole buffer since queued packets are stale relative to the new
// playhead.
//
// Numbered image files (shot_0042.png style) are resolved to a demuxer
// sequence pattern before opening, so a directory of stills reads as one
// synthetic video stream.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use ffmpeg_the_third as ffmpeg;

use ffmpeg::ffi;
use ffmpeg::format;
use ffmpeg::Dictionary;

use mediaport_core::sequence;
use mediaport_core::types::StreamType;
use mediaport_core::{lcritical, ldebug, linfo, lwarning, MediaProperty, PropertyBag, Rational,
                     TimeCode};

use crate::error::{MediaError, Result};
use crate::stream::Stream;

const TAG_TIMECODE: &str = "timecode";

/// Demuxer state shared between a Source and the Streams it hands out.
pub(crate) struct Demuxer {
    pub input: format::context::Input,
    /// stream index -> count of live Streams reading it.
    interest: HashMap<usize, u32>,
    /// stream index -> demuxed packets not yet consumed by that stream.
    queues: HashMap<usize, VecDeque<ffmpeg::Packet>>,
}

impl Demuxer {
    fn new(input: format::context::Input) -> Self {
        Demuxer {
            input,
            interest: HashMap::new(),
            queues: HashMap::new(),
        }
    }

    pub fn register_interest(&mut self, stream_index: usize) {
        *self.interest.entry(stream_index).or_insert(0) += 1;
    }

    pub fn unregister_interest(&mut self, stream_index: usize) {
        match self.interest.get_mut(&stream_index) {
            Some(count) if *count > 0 => *count -= 1,
            _ => linfo!("stream {stream_index} was already unqueued"),
        }
    }

    /// Pop a buffered packet for `stream_index`, or read from the demuxer
    /// until one arrives. Packets for other interested streams are queued;
    /// the rest are dropped. `None` means end of file or a read failure.
    pub fn next_packet(&mut self, stream_index: usize) -> Option<ffmpeg::Packet> {
        if let Some(queue) = self.queues.get_mut(&stream_index) {
            if let Some(packet) = queue.pop_front() {
                return Some(packet);
            }
        }
        loop {
            let mut packet = ffmpeg::Packet::empty();
            let ret = unsafe {
                ffi::av_read_frame(self.input.as_mut_ptr(), packet.as_mut_ptr())
            };
            if ret < 0 {
                linfo!("failed to read frame: {}", ffmpeg::Error::from(ret));
                return None;
            }
            let index = packet.stream();
            if index == stream_index {
                return Some(packet);
            }
            if self.interest.get(&index).copied().unwrap_or(0) > 0 {
                self.queues.entry(index).or_default().push_back(packet);
            }
        }
    }

    /// Buffered packets are stale after any seek.
    pub fn clear_queues(&mut self) {
        self.queues.clear();
    }
}

pub struct Source {
    path: PathBuf,
    props: PropertyBag,
    demuxer: Option<Arc<Mutex<Demuxer>>>,
}

impl Source {
    /// Open a media container (or image sequence) for reading.
    pub fn open(path: impl Into<PathBuf>) -> Result<Source> {
        let mut source = Source {
            path: path.into(),
            props: PropertyBag::new(),
            demuxer: None,
        };
        source.initialise()?;
        Ok(source)
    }

    /// (Re-)initialise from the current file path and properties. Called by
    /// `open`; call again after setting SEQUENCE_PATTERN to reopen with a
    /// user-supplied pattern (an empty pattern forces single-file mode).
    pub fn initialise(&mut self) -> Result<()> {
        if !self.path.is_file() {
            lcritical!("path is not an existing regular file: {}", self.path.display());
            return Err(MediaError::InvalidArgument(format!(
                "not a regular file: {}",
                self.path.display()
            )));
        }
        self.reset();

        let (open_path, start_number) = self.resolve_sequence();

        let input = if let Some(number) = start_number.filter(|n| *n > 0) {
            // The demuxer assumes sequences start at zero unless told otherwise.
            let mut opts = Dictionary::new();
            opts.set("start_number", &number.to_string());
            format::input_with_dictionary(&open_path, opts)
        } else {
            format::input(&open_path)
        }
        .map_err(|e| {
            lcritical!("failed to open file, code={e} fileName={}", open_path.display());
            MediaError::from(e)
        })?;

        let mut demuxer = Demuxer::new(input);
        self.find_frame_rate(&mut demuxer);
        self.extract_properties(&demuxer);
        self.extract_metadata(&demuxer);
        self.demuxer = Some(Arc::new(Mutex::new(demuxer)));
        Ok(())
    }

    /// Release the container handle and all packet dispatch state.
    pub fn reset(&mut self) {
        self.demuxer = None;
    }

    pub fn set_file_path(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
        self.props
            .set(MediaProperty::Filename, self.path.to_string_lossy().into_owned());
    }

    /// Resolve an image-sequence member to (pattern path, start number).
    /// A user-set SEQUENCE_PATTERN property overrides detection; an empty
    /// string forces the file to open alone.
    fn resolve_sequence(&self) -> (PathBuf, Option<i64>) {
        if !crate::auto_detect_image_sequences() {
            return (self.path.clone(), None);
        }

        let mut resolved: Option<PathBuf> = None;
        if sequence::path_is_in_sequence(&self.path) {
            resolved = sequence::generate_sequence_pattern(&self.path);
        }
        if let Some(pattern) = self.props.get::<String>(MediaProperty::SequencePattern) {
            resolved = if pattern.is_empty() {
                None
            } else {
                Some(self.path.with_file_name(pattern))
            };
        }

        match resolved {
            Some(pattern) => {
                let start = sequence::sequence_start_number(&self.path);
                (pattern, start)
            }
            None => (self.path.clone(), None),
        }
    }

    fn find_frame_rate(&mut self, demuxer: &mut Demuxer) {
        // Reasonable assumption: at most one video stream matters for the
        // container-level rate.
        let Some(index) = stream_indices_of(demuxer, ffi::AVMediaType::AVMEDIA_TYPE_VIDEO)
            .first()
            .copied()
        else {
            return;
        };
        let rate = unsafe {
            let ctx = demuxer.input.as_mut_ptr();
            let stream = *(*ctx).streams.add(index);
            ffi::av_guess_frame_rate(ctx, stream, std::ptr::null_mut())
        };
        if rate.den != 0 {
            self.props.set(
                MediaProperty::FrameRate,
                Rational::new(rate.num as i64, rate.den as i64),
            );
        }
    }

    fn extract_properties(&mut self, demuxer: &Demuxer) {
        let input = &demuxer.input;
        self.props
            .set(MediaProperty::Filename, self.path.to_string_lossy().into_owned());
        self.props.set(
            MediaProperty::FileFormat,
            input.format().description().to_string(),
        );
        self.props.set(
            MediaProperty::Duration,
            Rational::new(input.duration(), ffi::AV_TIME_BASE as i64),
        );
        let bit_rate = unsafe { (*input.as_ptr()).bit_rate };
        self.props.set(MediaProperty::Bitrate, bit_rate);

        let mut streams = 0i32;
        let mut visual = 0i32;
        let mut audio = 0i32;
        for stream in input.streams() {
            streams += 1;
            match unsafe { (*stream.parameters().as_ptr()).codec_type } {
                ffi::AVMediaType::AVMEDIA_TYPE_VIDEO => visual += 1,
                ffi::AVMediaType::AVMEDIA_TYPE_AUDIO => audio += 1,
                _ => {}
            }
        }
        self.props.set(MediaProperty::Streams, streams);
        self.props.set(MediaProperty::VideoStreams, visual);
        self.props.set(MediaProperty::AudioStreams, audio);
    }

    fn extract_metadata(&mut self, demuxer: &Demuxer) {
        let Some(tc_str) = demuxer.input.metadata().get(TAG_TIMECODE).map(String::from) else {
            return;
        };
        let Some(frame_rate) = self.props.get::<Rational>(MediaProperty::FrameRate) else {
            return;
        };
        let mut tc = TimeCode::new(Rational::new(1, 1), frame_rate, 0);
        if tc.set_timecode(&tc_str) {
            self.props.set(MediaProperty::StartTimecode, tc);
        } else {
            lwarning!("failed to configure start timecode");
        }
    }

    /// Absolute indices of this source's streams of `media_type`.
    fn category_indices(&self, media_type: ffi::AVMediaType) -> Result<Vec<usize>> {
        let demuxer = self.demuxer.as_ref().ok_or(MediaError::SourceGone)?;
        let guard = demuxer.lock().unwrap();
        Ok(stream_indices_of(&guard, media_type))
    }

    /// Obtain a visual (video/image) stream; `index` counts visual streams
    /// only, not all streams.
    pub fn visual_stream(&self, index: usize) -> Result<Stream> {
        let indices = self.category_indices(ffi::AVMediaType::AVMEDIA_TYPE_VIDEO)?;
        let absolute = *indices.get(index).ok_or_else(|| {
            MediaError::InvalidArgument(format!("no visual stream at index {index}"))
        })?;
        let demuxer = self.demuxer.as_ref().ok_or(MediaError::SourceGone)?;
        let frame_rate = self.props.get::<Rational>(MediaProperty::FrameRate);
        Stream::new_reading(demuxer, absolute, frame_rate)
    }

    /// Obtain an audio stream; `index` counts audio streams only.
    pub fn audio_stream(&self, index: usize) -> Result<Stream> {
        let indices = self.category_indices(ffi::AVMediaType::AVMEDIA_TYPE_AUDIO)?;
        let absolute = *indices.get(index).ok_or_else(|| {
            MediaError::InvalidArgument(format!("no audio stream at index {index}"))
        })?;
        let demuxer = self.demuxer.as_ref().ok_or(MediaError::SourceGone)?;
        Stream::new_reading(demuxer, absolute, None)
    }

    pub fn visual_streams(&self) -> Result<Vec<Stream>> {
        let indices = self.category_indices(ffi::AVMediaType::AVMEDIA_TYPE_VIDEO)?;
        (0..indices.len()).map(|i| self.visual_stream(i)).collect()
    }

    pub fn audio_streams(&self) -> Result<Vec<Stream>> {
        let indices = self.category_indices(ffi::AVMediaType::AVMEDIA_TYPE_AUDIO)?;
        (0..indices.len()).map(|i| self.audio_stream(i)).collect()
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

    pub fn set_property(
        &mut self,
        prop: MediaProperty,
        value: impl mediaport_core::properties::FromProperty,
    ) {
        self.props.set(prop, value);
    }

    /// Stream categories present, in container order. Debug/diagnostic aid.
    pub fn stream_types(&self) -> Result<Vec<StreamType>> {
        let demuxer = self.demuxer.as_ref().ok_or(MediaError::SourceGone)?;
        let guard = demuxer.lock().unwrap();
        let mut types = Vec::new();
        for stream in guard.input.streams() {
            let params = stream.parameters();
            match unsafe { (*params.as_ptr()).codec_type } {
                ffi::AVMediaType::AVMEDIA_TYPE_VIDEO => {
                    let image = stream.avg_frame_rate().denominator() == 0;
                    types.push(if image { StreamType::Image } else { StreamType::Video });
                }
                ffi::AVMediaType::AVMEDIA_TYPE_AUDIO => types.push(StreamType::Audio),
                _ => {}
            }
        }
        Ok(types)
    }
}

impl Drop for Source {
    fn drop(&mut self) {
        ldebug!("releasing source {}", self.path.display());
        self.reset();
    }
}

fn stream_indices_of(demuxer: &Demuxer, media_type: ffi::AVMediaType) -> Vec<usize> {
    demuxer
        .input
        .streams()
        .filter(|s| unsafe { (*s.parameters().as_ptr()).codec_type } == media_type)
        .map(|s| s.index())
        .collect()
}
