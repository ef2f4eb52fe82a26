// Image-sequence handling end to end: the library writes a numbered PNG
// run through the image muxer, then opens one member and reads the whole
// run back as a single synthetic video stream. The phases share the
// process-wide auto-detect flag, so they run inside one test.

use mediaport_ffmpeg::types::{Codec, CompressionStrategy, Dimensions, PixelFormat};
use mediaport_ffmpeg::{
    create_frame, create_sink, create_source, initialise, set_auto_detect_image_sequences,
    Backend, MediaProperty, Rational,
};

const WIDTH: i32 = 32;
const HEIGHT: i32 = 32;
const FRAMES: usize = 3;

fn write_png_run(dir: &std::path::Path) {
    let mut sink = create_sink(dir.join("img_%04d.png"), vec![Codec::Png], vec![]).unwrap();
    sink.initialise().unwrap();
    let stream = sink.visual_stream(0).unwrap();
    stream.set_property(
        MediaProperty::Dimensions,
        Dimensions { width: WIDTH, height: HEIGHT },
    );
    stream.set_property(MediaProperty::FrameRate, Rational::new(25, 1));
    stream.set_property(MediaProperty::Compression, CompressionStrategy::TargetBitrate);
    stream.set_property(MediaProperty::Bitrate, 400_000i64);
    stream.set_input_format_video(PixelFormat::Rgb24).unwrap();

    for n in 0..FRAMES {
        let mut frame = create_frame();
        frame
            .allocate_video(PixelFormat::Rgb24, Dimensions { width: WIDTH, height: HEIGHT })
            .unwrap();
        frame.plane_data_mut(0).unwrap().fill((n * 80) as u8);
        stream.write_frame(Some(&mut frame)).unwrap();
    }
    stream.write_frame(None).unwrap();
    sink.finish().unwrap();

    for n in 1..=FRAMES {
        assert!(dir.join(format!("img_{n:04}.png")).is_file());
    }
}

fn count_frames(stream: &mut mediaport_ffmpeg::Stream) -> usize {
    let mut count = 0usize;
    while let Some(frame) = stream.next_frame().unwrap() {
        assert!(frame.is_visual());
        count += 1;
    }
    count
}

#[test]
fn image_sequences_end_to_end() {
    assert!(initialise(Backend::FFmpeg));
    let dir = tempfile::tempdir().unwrap();
    write_png_run(dir.path());

    // Auto-detection folds the numbered run into one stream.
    set_auto_detect_image_sequences(true);
    let source = create_source(dir.path().join("img_0001.png")).unwrap();
    assert_eq!(source.property::<i32>(MediaProperty::Streams), Some(1));
    assert_eq!(source.property::<i32>(MediaProperty::VideoStreams), Some(1));
    let mut stream = source.visual_stream(0).unwrap();
    assert_eq!(
        stream.property::<Dimensions>(MediaProperty::Dimensions),
        Some(Dimensions { width: WIDTH, height: HEIGHT })
    );
    assert_eq!(count_frames(&mut stream), FRAMES);

    // An empty SEQUENCE_PATTERN forces the member open alone.
    let mut single = create_source(dir.path().join("img_0002.png")).unwrap();
    single.set_property(MediaProperty::SequencePattern, String::new());
    single.initialise().unwrap();
    let mut stream = single.visual_stream(0).unwrap();
    assert_eq!(count_frames(&mut stream), 1);

    // Disabling the process-wide flag has the same effect.
    set_auto_detect_image_sequences(false);
    let source = create_source(dir.path().join("img_0001.png")).unwrap();
    let mut stream = source.visual_stream(0).unwrap();
    assert_eq!(count_frames(&mut stream), 1);
    set_auto_detect_image_sequences(true);
}
