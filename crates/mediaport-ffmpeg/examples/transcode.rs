// Re-encode the first video stream of a file to MPEG-4, driven entirely
// through the property surface.
//
//   cargo run --example transcode -- input.mov output.mp4

use anyhow::{bail, Context, Result};

use mediaport_ffmpeg::types::{Codec, CompressionStrategy, Dimensions, Gop, PixelFormat};
use mediaport_ffmpeg::{create_sink, create_source, initialise, Backend, MediaProperty, Rational};

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let (Some(input), Some(output)) = (args.next(), args.next()) else {
        bail!("usage: transcode <input> <output>");
    };
    if !initialise(Backend::FFmpeg) {
        bail!("backend initialisation failed");
    }

    let source = create_source(&input).with_context(|| format!("opening {input}"))?;
    let mut in_stream = source.visual_stream(0).context("no visual stream")?;

    let dims: Dimensions = in_stream
        .property(MediaProperty::Dimensions)
        .context("source dimensions unknown")?;
    let rate: Rational = in_stream
        .property(MediaProperty::FrameRate)
        .context("source frame rate unknown")?;
    let pix: PixelFormat = in_stream
        .property(MediaProperty::PixelFormat)
        .context("source pixel format unknown")?;
    if pix == PixelFormat::Unknown {
        bail!("source pixel format is not supported");
    }

    let mut sink = create_sink(&output, vec![Codec::Mpeg4], vec![])?;
    sink.initialise()?;
    let out_stream = sink.visual_stream(0).context("no output stream")?;
    out_stream.set_property(MediaProperty::Dimensions, dims);
    out_stream.set_property(MediaProperty::FrameRate, rate);
    out_stream.set_property(MediaProperty::Compression, CompressionStrategy::TargetBitrate);
    out_stream.set_property(MediaProperty::Bitrate, 2_000_000i64);
    out_stream.set_property(MediaProperty::Gop, Gop { n: 12, m: 2 });
    out_stream.set_input_format_video(pix)?;

    let mut frames = 0u64;
    while let Some(mut frame) = in_stream.next_frame()? {
        out_stream.write_frame(Some(&mut frame))?;
        frames += 1;
    }
    out_stream.write_frame(None)?;
    sink.finish()?;

    println!("wrote {frames} frames to {output}");
    Ok(())
}
