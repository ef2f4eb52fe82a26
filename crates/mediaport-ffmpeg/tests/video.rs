// Video write/read round trip against a codec every FFmpeg build carries
// (MPEG-4 part 2). Covers the input-format auto-conversion path (RGB24 in,
// encoder takes planar YUV), GOP and rate-control properties, and on the
// read side: header properties, sequential decode, index(), and seeking
// back after EOF.

use mediaport_ffmpeg::types::{
    Codec, CompressionStrategy, Dimensions, Gop, PixelFormat, StreamType,
};
use mediaport_ffmpeg::{
    create_frame, create_sink, create_source, initialise, Backend, MediaProperty, Rational,
};

const WIDTH: i32 = 64;
const HEIGHT: i32 = 48;
const FRAMES: usize = 25;

fn write_gradient_mp4(path: &std::path::Path) {
    let mut sink = create_sink(path, vec![Codec::Mpeg4], vec![]).unwrap();
    sink.initialise().unwrap();
    let stream = sink.visual_stream(0).unwrap();
    assert_eq!(stream.stream_type(), StreamType::Video);

    stream.set_property(
        MediaProperty::Dimensions,
        Dimensions { width: WIDTH, height: HEIGHT },
    );
    stream.set_property(MediaProperty::FrameRate, Rational::new(25, 1));
    stream.set_property(MediaProperty::Compression, CompressionStrategy::TargetBitrate);
    stream.set_property(MediaProperty::Bitrate, 400_000i64);
    stream.set_property(MediaProperty::Gop, Gop { n: 12, m: 0 });

    // The MPEG-4 encoder does not take packed RGB; a converter to its
    // preferred planar format is inserted automatically.
    stream.set_input_format_video(PixelFormat::Rgb24).unwrap();

    for n in 0..FRAMES {
        let mut frame = create_frame();
        frame
            .allocate_video(PixelFormat::Rgb24, Dimensions { width: WIDTH, height: HEIGHT })
            .unwrap();
        let shade = (n * 10) as u8;
        frame.plane_data_mut(0).unwrap().fill(shade);
        stream.write_frame(Some(&mut frame)).unwrap();
    }
    stream.write_frame(None).unwrap();
    sink.finish().unwrap();
}

#[test]
fn video_encoder_setup_requires_properties() {
    assert!(initialise(Backend::FFmpeg));
    let dir = tempfile::tempdir().unwrap();

    // Nothing configured at all; a failed setup poisons the stream.
    let mut sink = create_sink(dir.path().join("bare.mp4"), vec![Codec::Mpeg4], vec![]).unwrap();
    sink.initialise().unwrap();
    let stream = sink.visual_stream(0).unwrap();
    assert!(stream.write_frame(None).is_err());
    assert!(stream.write_frame(None).is_err());

    // Dimensions but no frame rate.
    let mut sink = create_sink(dir.path().join("norate.mp4"), vec![Codec::Mpeg4], vec![]).unwrap();
    sink.initialise().unwrap();
    let stream = sink.visual_stream(0).unwrap();
    stream.set_property(
        MediaProperty::Dimensions,
        Dimensions { width: WIDTH, height: HEIGHT },
    );
    assert!(stream.write_frame(None).is_err());

    // No compression strategy.
    let mut sink = create_sink(dir.path().join("nocomp.mp4"), vec![Codec::Mpeg4], vec![]).unwrap();
    sink.initialise().unwrap();
    let stream = sink.visual_stream(0).unwrap();
    stream.set_property(
        MediaProperty::Dimensions,
        Dimensions { width: WIDTH, height: HEIGHT },
    );
    stream.set_property(MediaProperty::FrameRate, Rational::new(25, 1));
    assert!(stream.write_frame(None).is_err());

    // Target bitrate chosen but no bitrate value.
    let mut sink = create_sink(dir.path().join("nobr.mp4"), vec![Codec::Mpeg4], vec![]).unwrap();
    sink.initialise().unwrap();
    let stream = sink.visual_stream(0).unwrap();
    stream.set_property(
        MediaProperty::Dimensions,
        Dimensions { width: WIDTH, height: HEIGHT },
    );
    stream.set_property(MediaProperty::FrameRate, Rational::new(25, 1));
    stream.set_property(MediaProperty::Compression, CompressionStrategy::TargetBitrate);
    stream.set_input_format_video(PixelFormat::Yuv420).unwrap();
    assert!(stream.write_frame(None).is_err());

    // No input pixel format declared.
    let mut sink = create_sink(dir.path().join("nofmt.mp4"), vec![Codec::Mpeg4], vec![]).unwrap();
    sink.initialise().unwrap();
    let stream = sink.visual_stream(0).unwrap();
    stream.set_property(
        MediaProperty::Dimensions,
        Dimensions { width: WIDTH, height: HEIGHT },
    );
    stream.set_property(MediaProperty::FrameRate, Rational::new(25, 1));
    stream.set_property(MediaProperty::Compression, CompressionStrategy::TargetBitrate);
    stream.set_property(MediaProperty::Bitrate, 400_000i64);
    assert!(stream.write_frame(None).is_err());
}

#[test]
fn rejected_input_pixel_formats() {
    assert!(initialise(Backend::FFmpeg));
    let dir = tempfile::tempdir().unwrap();

    // A format the encoder cannot take directly needs DIMENSIONS before a
    // converter can be sized.
    let mut sink = create_sink(dir.path().join("nodims.mp4"), vec![Codec::Mpeg4], vec![]).unwrap();
    sink.initialise().unwrap();
    let stream = sink.visual_stream(0).unwrap();
    assert!(stream.set_input_format_video(PixelFormat::Rgb24).is_err());

    // An unknown pixel format is never accepted, converter or not.
    let mut sink = create_sink(dir.path().join("badfmt.mp4"), vec![Codec::Mpeg4], vec![]).unwrap();
    sink.initialise().unwrap();
    let stream = sink.visual_stream(0).unwrap();
    stream.set_property(
        MediaProperty::Dimensions,
        Dimensions { width: WIDTH, height: HEIGHT },
    );
    assert!(stream.set_input_format_video(PixelFormat::Unknown).is_err());
}

#[test]
fn mpeg4_round_trip() {
    assert!(initialise(Backend::FFmpeg));
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gradient.mp4");
    write_gradient_mp4(&path);

    let source = create_source(&path).unwrap();
    assert_eq!(source.property::<i32>(MediaProperty::Streams), Some(1));
    assert_eq!(source.property::<i32>(MediaProperty::VideoStreams), Some(1));
    assert_eq!(source.property::<i32>(MediaProperty::AudioStreams), Some(0));
    assert_eq!(
        source.property::<Rational>(MediaProperty::FrameRate),
        Some(Rational::new(25, 1))
    );
    let duration: Rational = source.property(MediaProperty::Duration).unwrap();
    assert!(duration > Rational::new(9, 10)); // 25 frames at 25 fps, ~1 s

    let mut stream = source.visual_stream(0).unwrap();
    assert_eq!(stream.stream_type(), StreamType::Video);
    assert_eq!(
        stream.property::<Codec>(MediaProperty::Codec),
        Some(Codec::Mpeg4)
    );
    assert_eq!(
        stream.property::<Dimensions>(MediaProperty::Dimensions),
        Some(Dimensions { width: WIDTH, height: HEIGHT })
    );
    assert_eq!(
        stream.property::<PixelFormat>(MediaProperty::PixelFormat),
        Some(PixelFormat::Yuv420)
    );

    // Sequential decode delivers every frame in non-decreasing order.
    let mut count = 0usize;
    let mut last_ts = i64::MIN;
    while let Some(frame) = stream.next_frame().unwrap() {
        assert!(frame.is_visual());
        assert!(frame.timestamp() >= last_ts);
        last_ts = frame.timestamp();
        count += 1;
    }
    assert_eq!(count, FRAMES);

    // index() re-derives the counters from a full decode pass.
    stream.index().unwrap();
    assert_eq!(
        stream.property::<i64>(MediaProperty::FrameCount),
        Some(FRAMES as i64)
    );
    assert!(stream.property::<i64>(MediaProperty::Bitrate).unwrap_or(0) > 0);

    // The playhead is at EOF now; frame(0) must seek back and succeed.
    let frame = stream.frame(0).unwrap().expect("frame at start after seek");
    assert!(frame.timestamp() >= 0);
}

#[test]
fn scaled_output_conversion() {
    assert!(initialise(Backend::FFmpeg));
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scale_me.mp4");
    write_gradient_mp4(&path);

    let source = create_source(&path).unwrap();
    let mut stream = source.visual_stream(0).unwrap();
    stream
        .set_output_format_video(
            PixelFormat::Yuv420,
            Some(Dimensions { width: 32, height: 24 }),
            mediaport_ffmpeg::types::InterpolationMethod::Bilinear,
        )
        .unwrap();

    let mut frame = stream.next_frame().unwrap().expect("first frame");
    let data = frame.data().unwrap();
    assert_eq!(data.pixel_format, PixelFormat::Yuv420);
    assert_eq!(data.dimensions, Dimensions { width: 32, height: 24 });
    assert_eq!(data.data_size, 32 * 24 * 3 / 2);
    assert_eq!(data.line_size, 32);

    // The conversion is cached: a second call sees the same view.
    let again = frame.data().unwrap();
    assert_eq!(again.data_size, 32 * 24 * 3 / 2);
}

#[test]
fn full_size_output_conversion_defaults_to_source_dimensions() {
    assert!(initialise(Backend::FFmpeg));
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("native_size.mp4");
    write_gradient_mp4(&path);

    let source = create_source(&path).unwrap();
    let mut stream = source.visual_stream(0).unwrap();
    stream
        .set_output_format_video(
            PixelFormat::Rgb24,
            None,
            mediaport_ffmpeg::types::InterpolationMethod::Bilinear,
        )
        .unwrap();

    let mut frame = stream.next_frame().unwrap().expect("first frame");
    let data = frame.data().unwrap();
    assert_eq!(data.pixel_format, PixelFormat::Rgb24);
    assert_eq!(
        data.dimensions,
        Dimensions { width: WIDTH, height: HEIGHT }
    );
    assert_eq!(data.data_size, (WIDTH * HEIGHT * 3) as usize);

    // RGB shade round trip: frame 0 was filled with 0, so the decoded,
    // converted pixels are dark across the whole plane.
    assert!(data.planes[0].iter().all(|&b| b < 32));
}
