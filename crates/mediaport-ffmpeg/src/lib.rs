// crates/mediaport-ffmpeg/src/lib.rs
//
// Library entry points: backend selection, source/sink/frame construction,
// and the process-wide image-sequence auto-detection flag. FFmpeg is the
// only backend wired up; the other enum values are reserved so a second
// backend can be added without reshaping the public API.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use ffmpeg_the_third as ffmpeg;

pub mod convert;
pub mod error;
pub mod frame;
pub mod sink;
pub mod source;
pub mod stream;

pub use error::{MediaError, Result};
pub use frame::{Frame, FrameData};
pub use sink::Sink;
pub use source::Source;
pub use stream::Stream;

pub use mediaport_core::logging::{
    assign_log_callback, reset_log_callback, set_log_level, LogCallback, LogLevel,
};
pub use mediaport_core::properties::{FromProperty, MediaProperty, PropertyBag, PropertyValue};
pub use mediaport_core::rational::Rational;
pub use mediaport_core::timecode::TimeCode;
pub use mediaport_core::types;

use mediaport_core::lwarning;
use mediaport_core::types::Codec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    FFmpeg,
    GStreamer,
    Intel,
}

static AUTO_DETECT_IMG_SEQUENCE: AtomicBool = AtomicBool::new(true);
static BACKEND_LOGS: AtomicBool = AtomicBool::new(true);

/// Initialise the library with a backend. Only FFmpeg is available; the
/// reserved backends log a warning and report failure.
pub fn initialise(backend: Backend) -> bool {
    match backend {
        Backend::FFmpeg => {
            if let Err(e) = ffmpeg::init() {
                lwarning!("backend initialisation failed: {e}");
                return false;
            }
            enable_backend_logs(BACKEND_LOGS.load(Ordering::Relaxed));
            true
        }
        Backend::GStreamer | Backend::Intel => {
            lwarning!("chosen backend type is not available");
            false
        }
    }
}

/// Toggle the backend library's own console output.
pub fn enable_backend_logs(enabled: bool) {
    BACKEND_LOGS.store(enabled, Ordering::Relaxed);
    let level = if enabled {
        ffmpeg::util::log::Level::Verbose
    } else {
        ffmpeg::util::log::Level::Panic
    };
    ffmpeg::util::log::set_level(level);
}

/// Open a media container (or image sequence) for reading.
pub fn create_source(path: impl Into<PathBuf>) -> Result<Source> {
    Source::open(path)
}

/// Create a sink for writing; one stream per codec in each list. Call
/// `initialise` on the result before requesting streams.
pub fn create_sink(
    path: impl Into<PathBuf>,
    video_codecs: Vec<Codec>,
    audio_codecs: Vec<Codec>,
) -> Result<Sink> {
    Sink::new(path, video_codecs, audio_codecs)
}

/// A new frame for populating data to be encoded.
pub fn create_frame() -> Frame {
    Frame::empty()
}

/// Globally enable/disable recognition of numbered image files as
/// sequences when opening a Source.
pub fn set_auto_detect_image_sequences(value: bool) {
    AUTO_DETECT_IMG_SEQUENCE.store(value, Ordering::Relaxed);
}

pub fn auto_detect_image_sequences() -> bool {
    AUTO_DETECT_IMG_SEQUENCE.load(Ordering::Relaxed)
}
