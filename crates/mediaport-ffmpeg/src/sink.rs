// crates/mediaport-ffmpeg/src/sink.rs
//
// Container writing. The Sink owns the output container; one writing
// Stream is created per requested codec, and the muxer interleaves their
// packets in DTS order. The header is written lazily by the first stream
// whose encoder comes up, at most once; the trailer is written exactly
// once, on finish() or drop.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use ffmpeg_the_third as ffmpeg;

use ffmpeg::format;

use mediaport_core::types::{Codec, StreamType};
use mediaport_core::{lcritical, lwarning, MediaProperty, PropertyBag};

use crate::convert;
use crate::error::{MediaError, Result};
use crate::stream::Stream;

/// Output container state shared between a Sink and its writing Streams.
pub(crate) struct Muxer {
    pub octx: format::context::Output,
    header_written: bool,
    trailer_written: bool,
}

impl Muxer {
    fn new(octx: format::context::Output) -> Self {
        Muxer {
            octx,
            header_written: false,
            trailer_written: false,
        }
    }

    pub fn header_written(&self) -> bool {
        self.header_written
    }

    /// Idempotent header write; the first encoder to finish setup triggers
    /// it, later setups see it already done.
    pub fn write_header_once(&mut self) -> Result<()> {
        if self.header_written {
            return Ok(());
        }
        self.octx.write_header().map_err(|e| {
            lcritical!("could not write output file header: {e}");
            MediaError::from(e)
        })?;
        self.header_written = true;
        Ok(())
    }

    /// One-shot trailer write; requires the header on disk first.
    pub fn write_trailer_once(&mut self) -> Result<()> {
        if !self.header_written {
            return Err(MediaError::InvalidArgument(
                "cannot write trailer before the header".into(),
            ));
        }
        if self.trailer_written {
            return Ok(());
        }
        self.trailer_written = true;
        self.octx.write_trailer().map_err(|e| {
            lcritical!("could not write output file trailer: {e}");
            MediaError::from(e)
        })
    }
}

pub struct Sink {
    path: PathBuf,
    video_codecs: Vec<Codec>,
    audio_codecs: Vec<Codec>,
    props: PropertyBag,
    muxer: Option<Arc<Mutex<Muxer>>>,
    video_streams: Vec<Stream>,
    audio_streams: Vec<Stream>,
}

impl Sink {
    /// Stage a sink for writing. The parent directory of `path` must exist;
    /// the container itself is created by `initialise`.
    pub fn new(
        path: impl Into<PathBuf>,
        video_codecs: Vec<Codec>,
        audio_codecs: Vec<Codec>,
    ) -> Result<Sink> {
        let path = path.into();
        let parent_ok = match path.parent() {
            // A bare file name writes to the working directory.
            Some(parent) if parent.as_os_str().is_empty() => true,
            Some(parent) => parent.is_dir(),
            None => false,
        };
        if path.as_os_str().is_empty() || !parent_ok {
            lcritical!("sink path is unusable: {}", path.display());
            return Err(MediaError::InvalidArgument(format!(
                "parent directory does not exist: {}",
                path.display()
            )));
        }
        let mut props = PropertyBag::new();
        props.set(MediaProperty::Filename, path.to_string_lossy().into_owned());
        Ok(Sink {
            path,
            video_codecs,
            audio_codecs,
            props,
            muxer: None,
            video_streams: Vec::new(),
            audio_streams: Vec::new(),
        })
    }

    /// Allocate the output container (format inferred from the file name),
    /// open the byte sink, and build one writing Stream per codec. Fails if
    /// a codec's media type contradicts the list it was passed in, or if no
    /// stream could be created.
    pub fn initialise(&mut self) -> Result<()> {
        self.muxer = None;
        self.video_streams.clear();
        self.audio_streams.clear();

        let octx = format::output(&self.path).map_err(|e| {
            lcritical!("could not create output context: {e}");
            MediaError::from(e)
        })?;
        let muxer = Arc::new(Mutex::new(Muxer::new(octx)));

        for &codec in &self.video_codecs {
            if !encoder_matches_medium(codec, ffmpeg::media::Type::Video) {
                lcritical!("an audio codec was chosen for video encoding: {codec:?}");
                return Err(MediaError::InvalidArgument(format!(
                    "{codec:?} is not a video codec"
                )));
            }
            match Stream::new_writing(&muxer, codec) {
                Ok(stream) => self.video_streams.push(stream),
                Err(e) => lcritical!("{e}"),
            }
        }
        for &codec in &self.audio_codecs {
            if !encoder_matches_medium(codec, ffmpeg::media::Type::Audio) {
                lcritical!("a video codec was chosen for audio encoding: {codec:?}");
                return Err(MediaError::InvalidArgument(format!(
                    "{codec:?} is not an audio codec"
                )));
            }
            match Stream::new_writing(&muxer, codec) {
                Ok(stream) => self.audio_streams.push(stream),
                Err(e) => lcritical!("{e}"),
            }
        }

        if self.video_streams.is_empty() && self.audio_streams.is_empty() {
            lcritical!("failed to setup any streams");
            return Err(MediaError::InvalidArgument(
                "no streams could be created".into(),
            ));
        }
        self.muxer = Some(muxer);
        Ok(())
    }

    /// Ready once the container exists and at least one stream was built.
    pub fn is_ready(&self) -> bool {
        self.muxer.is_some()
    }

    /// The writing stream for the i-th codec of the video list.
    pub fn visual_stream(&mut self, index: usize) -> Option<&mut Stream> {
        self.video_streams.get_mut(index)
    }

    /// The writing stream for the i-th codec of the audio list.
    pub fn audio_stream(&mut self, index: usize) -> Option<&mut Stream> {
        self.audio_streams.get_mut(index)
    }

    pub fn visual_streams(&mut self) -> &mut [Stream] {
        &mut self.video_streams
    }

    pub fn audio_streams(&mut self) -> &mut [Stream] {
        &mut self.audio_streams
    }

    /// Write the trailer and close out the container. Trailer failure is
    /// surfaced here; the drop path can only log it.
    pub fn finish(&mut self) -> Result<()> {
        let muxer = self.muxer.as_ref().ok_or(MediaError::SinkGone)?;
        muxer.lock().unwrap().write_trailer_once()
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

    pub fn stream_types(&self) -> Vec<StreamType> {
        self.video_streams
            .iter()
            .chain(self.audio_streams.iter())
            .map(|s| s.stream_type())
            .collect()
    }
}

impl Drop for Sink {
    fn drop(&mut self) {
        if let Some(muxer) = &self.muxer {
            let mut guard = muxer.lock().unwrap();
            if guard.header_written() {
                if let Err(e) = guard.write_trailer_once() {
                    lwarning!("trailer write on drop failed: {e}");
                }
            }
        }
    }
}

fn encoder_matches_medium(codec: Codec, medium: ffmpeg::media::Type) -> bool {
    ffmpeg::encoder::find(convert::codec_to_av(codec))
        .map(|c| c.medium() == medium)
        .unwrap_or(false)
}
