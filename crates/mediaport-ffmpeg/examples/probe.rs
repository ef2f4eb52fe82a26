// Dump the container- and stream-level properties of a media file.
//
//   cargo run --example probe -- /path/to/clip.mp4

use anyhow::{bail, Context, Result};

use mediaport_ffmpeg::types::StreamType;
use mediaport_ffmpeg::{
    create_source, initialise, set_log_level, Backend, LogLevel, MediaProperty, Source, Stream,
};

const CONTAINER_KEYS: [(&str, MediaProperty); 8] = [
    ("file", MediaProperty::Filename),
    ("format", MediaProperty::FileFormat),
    ("duration (s)", MediaProperty::Duration),
    ("streams", MediaProperty::Streams),
    ("video streams", MediaProperty::VideoStreams),
    ("audio streams", MediaProperty::AudioStreams),
    ("bitrate", MediaProperty::Bitrate),
    ("start timecode", MediaProperty::StartTimecode),
];

const STREAM_KEYS: [(&str, MediaProperty); 16] = [
    ("codec", MediaProperty::CodecName),
    ("time-scale", MediaProperty::Timescale),
    ("duration (s)", MediaProperty::Duration),
    ("bitrate", MediaProperty::Bitrate),
    ("frame rate", MediaProperty::FrameRate),
    ("frame count", MediaProperty::FrameCount),
    ("dimensions", MediaProperty::Dimensions),
    ("pixel format", MediaProperty::PixelFormat),
    ("pixel aspect", MediaProperty::PixelAspectRatio),
    ("display aspect", MediaProperty::DisplayAspectRatio),
    ("field order", MediaProperty::FieldOrder),
    ("colour", MediaProperty::ColourSpace),
    ("channels", MediaProperty::AudioChannels),
    ("sample rate", MediaProperty::AudioSamplingRate),
    ("sample format", MediaProperty::AudioFormat),
    ("channel layout", MediaProperty::AudioLayout),
];

fn print_stream(label: &str, stream: &Stream) {
    let kind = match stream.stream_type() {
        StreamType::Video => "video",
        StreamType::Audio => "audio",
        StreamType::Image => "image",
    };
    println!("  {label} ({kind})");
    for (name, key) in STREAM_KEYS {
        if let Some(value) = stream.property::<mediaport_ffmpeg::PropertyValue>(key) {
            println!("    {name:<15} {value}");
        }
    }
}

fn dump(source: &Source) -> Result<()> {
    for (name, key) in CONTAINER_KEYS {
        if let Some(value) = source.property::<mediaport_ffmpeg::PropertyValue>(key) {
            println!("{name:<17} {value}");
        }
    }
    for (i, stream) in source.visual_streams()?.iter().enumerate() {
        print_stream(&format!("visual #{i}"), stream);
    }
    for (i, stream) in source.audio_streams()?.iter().enumerate() {
        print_stream(&format!("audio #{i}"), stream);
    }
    Ok(())
}

fn main() -> Result<()> {
    let Some(path) = std::env::args().nth(1) else {
        bail!("usage: probe <media file>");
    };
    if !initialise(Backend::FFmpeg) {
        bail!("backend initialisation failed");
    }
    set_log_level(LogLevel::Warning);
    let source = create_source(&path).with_context(|| format!("opening {path}"))?;
    dump(&source)
}
