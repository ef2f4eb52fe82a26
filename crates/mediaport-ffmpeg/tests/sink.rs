// Writing-side behaviour: sink construction, per-codec stream creation,
// the encoder-setup validation matrix, the property lock latch, and a full
// silence round trip (write a WAV, reopen it, verify what comes back).
//
// Everything here synthesises its own media; PCM codecs and the WAV/MP4
// muxers are part of every FFmpeg build.

use mediaport_ffmpeg::types::{ChannelLayout, Codec, SampleFormat, StreamType};
use mediaport_ffmpeg::{
    create_frame, create_sink, create_source, initialise, Backend, MediaProperty,
};

fn init() {
    assert!(initialise(Backend::FFmpeg));
}

/// Write five 20-sample zero frames of mono s16 PCM at 22.05 kHz.
fn write_silence_wav(path: &std::path::Path) {
    let mut sink = create_sink(path, vec![], vec![Codec::PcmS16Le]).unwrap();
    sink.initialise().unwrap();
    assert!(sink.is_ready());
    {
        let stream = sink.audio_stream(0).unwrap();
        assert_eq!(stream.stream_type(), StreamType::Audio);
        stream.set_property(MediaProperty::AudioLayout, ChannelLayout::Mono);
        stream.set_property(MediaProperty::AudioSamplingRate, 22_050i32);
        stream.set_input_format_audio(SampleFormat::Signed16, None).unwrap();

        for _ in 0..5 {
            let mut frame = create_frame();
            frame
                .allocate_audio(SampleFormat::Signed16, 20, ChannelLayout::Mono, 22_050)
                .unwrap();
            frame.plane_data_mut(0).unwrap().fill(0);
            stream.write_frame(Some(&mut frame)).unwrap();
        }
        stream.write_frame(None).unwrap();
    }
    sink.finish().unwrap();
    // Trailer is one-shot: a second finish is a clean no-op.
    sink.finish().unwrap();
}

#[test]
fn reserved_backends_are_unavailable() {
    assert!(!initialise(Backend::GStreamer));
    assert!(!initialise(Backend::Intel));
    init();
}

#[test]
fn sink_requires_existing_parent_directory() {
    init();
    assert!(create_sink(
        "/definitely/not/a/real/dir/out.wav",
        vec![],
        vec![Codec::PcmS16Le]
    )
    .is_err());

    let dir = tempfile::tempdir().unwrap();
    assert!(create_sink(dir.path().join("out.wav"), vec![], vec![Codec::PcmS16Le]).is_ok());
}

#[test]
fn sink_initialise_requires_a_codec() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let mut sink = create_sink(dir.path().join("out.wav"), vec![], vec![]).unwrap();
    assert!(sink.initialise().is_err());
    assert!(!sink.is_ready());
}

#[test]
fn sink_rejects_mismatched_codec_lists() {
    init();
    let dir = tempfile::tempdir().unwrap();

    // An audio codec in the video list.
    let mut sink =
        create_sink(dir.path().join("a.mp4"), vec![Codec::PcmS16Le], vec![]).unwrap();
    assert!(sink.initialise().is_err());

    // A video codec in the audio list.
    let mut sink =
        create_sink(dir.path().join("b.mp4"), vec![], vec![Codec::Mpeg4]).unwrap();
    assert!(sink.initialise().is_err());
}

#[test]
fn audio_encoder_setup_requires_properties() {
    init();
    let dir = tempfile::tempdir().unwrap();

    // Nothing configured at all.
    let mut sink =
        create_sink(dir.path().join("bare.wav"), vec![], vec![Codec::PcmS16Le]).unwrap();
    sink.initialise().unwrap();
    let stream = sink.audio_stream(0).unwrap();
    assert!(stream.write_frame(None).is_err());

    // Layout but no input format.
    let mut sink =
        create_sink(dir.path().join("nofmt.wav"), vec![], vec![Codec::PcmS16Le]).unwrap();
    sink.initialise().unwrap();
    let stream = sink.audio_stream(0).unwrap();
    stream.set_property(MediaProperty::AudioLayout, ChannelLayout::Mono);
    stream.set_property(MediaProperty::AudioSamplingRate, 22_050i32);
    assert!(stream.write_frame(None).is_err());

    // Rate missing.
    let mut sink =
        create_sink(dir.path().join("norate.wav"), vec![], vec![Codec::PcmS16Le]).unwrap();
    sink.initialise().unwrap();
    let stream = sink.audio_stream(0).unwrap();
    stream.set_property(MediaProperty::AudioLayout, ChannelLayout::Mono);
    stream.set_input_format_audio(SampleFormat::Signed16, None).unwrap();
    assert!(stream.write_frame(None).is_err());
}

#[test]
fn aac_requires_bitrate_and_a_supported_rate() {
    init();
    let dir = tempfile::tempdir().unwrap();

    // No bitrate: AAC is not in the lossless set.
    let mut sink = create_sink(dir.path().join("nobr.m4a"), vec![], vec![Codec::Aac]).unwrap();
    sink.initialise().unwrap();
    let stream = sink.audio_stream(0).unwrap();
    stream.set_property(MediaProperty::AudioLayout, ChannelLayout::Stereo);
    stream.set_property(MediaProperty::AudioSamplingRate, 44_100i32);
    stream.set_input_format_audio(SampleFormat::FloatP, None).unwrap();
    assert!(stream.write_frame(None).is_err());

    // A rate outside the codec's fixed list.
    let mut sink = create_sink(dir.path().join("badrate.m4a"), vec![], vec![Codec::Aac]).unwrap();
    sink.initialise().unwrap();
    let stream = sink.audio_stream(0).unwrap();
    stream.set_property(MediaProperty::AudioLayout, ChannelLayout::Stereo);
    stream.set_property(MediaProperty::AudioSamplingRate, 123_456i32);
    stream.set_property(MediaProperty::Bitrate, 128_000i64);
    stream.set_input_format_audio(SampleFormat::FloatP, None).unwrap();
    assert!(stream.write_frame(None).is_err());
}

#[test]
fn unsupported_input_format_inserts_a_converter() {
    init();
    let dir = tempfile::tempdir().unwrap();

    // AAC takes planar float; declaring packed s16 input builds a resampler,
    // which needs the layout and rate already set.
    let mut sink = create_sink(dir.path().join("conv.m4a"), vec![], vec![Codec::Aac]).unwrap();
    sink.initialise().unwrap();
    let stream = sink.audio_stream(0).unwrap();
    assert!(stream.set_input_format_audio(SampleFormat::Signed16, None).is_err());

    stream.set_property(MediaProperty::AudioLayout, ChannelLayout::Stereo);
    stream.set_property(MediaProperty::AudioSamplingRate, 44_100i32);
    assert!(stream.set_input_format_audio(SampleFormat::Signed16, None).is_ok());
}

#[test]
fn pcm_needs_no_bitrate() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let mut sink =
        create_sink(dir.path().join("nobitrate.wav"), vec![], vec![Codec::PcmS16Le]).unwrap();
    sink.initialise().unwrap();
    let stream = sink.audio_stream(0).unwrap();
    stream.set_property(MediaProperty::AudioLayout, ChannelLayout::Mono);
    stream.set_property(MediaProperty::AudioSamplingRate, 22_050i32);
    stream.set_input_format_audio(SampleFormat::Signed16, None).unwrap();
    assert!(stream.write_frame(None).is_ok());
    assert!(sink.finish().is_ok());
}

#[test]
fn properties_lock_after_first_write() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let mut sink =
        create_sink(dir.path().join("locked.wav"), vec![], vec![Codec::PcmS16Le]).unwrap();
    sink.initialise().unwrap();
    let stream = sink.audio_stream(0).unwrap();
    stream.set_property(MediaProperty::AudioLayout, ChannelLayout::Mono);
    stream.set_property(MediaProperty::AudioSamplingRate, 22_050i32);
    stream.set_input_format_audio(SampleFormat::Signed16, None).unwrap();

    let mut frame = create_frame();
    frame
        .allocate_audio(SampleFormat::Signed16, 20, ChannelLayout::Mono, 22_050)
        .unwrap();
    frame.plane_data_mut(0).unwrap().fill(0);
    stream.write_frame(Some(&mut frame)).unwrap();

    // Locked: the write is ignored and the old value survives.
    stream.set_property(MediaProperty::AudioSamplingRate, 44_100i32);
    assert_eq!(
        stream.property::<i32>(MediaProperty::AudioSamplingRate),
        Some(22_050)
    );

    // A flushed stream accepts no further frames.
    stream.write_frame(None).unwrap();
    assert!(stream.write_frame(Some(&mut frame)).is_err());
    sink.finish().unwrap();
}

#[test]
fn silence_wav_round_trip() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("silence.wav");
    write_silence_wav(&path);

    // Read it back with the library itself.
    let source = create_source(&path).unwrap();
    assert_eq!(source.property::<i32>(MediaProperty::Streams), Some(1));
    assert_eq!(source.property::<i32>(MediaProperty::AudioStreams), Some(1));
    assert_eq!(source.property::<i32>(MediaProperty::VideoStreams), Some(0));

    let mut stream = source.audio_stream(0).unwrap();
    assert_eq!(stream.stream_type(), StreamType::Audio);
    assert_eq!(stream.property::<i32>(MediaProperty::AudioChannels), Some(1));
    assert_eq!(
        stream.property::<i32>(MediaProperty::AudioSamplingRate),
        Some(22_050)
    );
    assert_eq!(
        stream.property::<SampleFormat>(MediaProperty::AudioFormat),
        Some(SampleFormat::Signed16)
    );
    assert_eq!(
        stream.property::<ChannelLayout>(MediaProperty::AudioLayout),
        Some(ChannelLayout::Mono)
    );

    // 5 x 20 pushed samples come back, in however many packets the demuxer
    // chooses to deliver them.
    let mut total_samples = 0i64;
    while let Some(mut frame) = stream.next_frame().unwrap() {
        assert!(frame.is_audio());
        frame.extract_properties();
        total_samples += frame
            .property::<i32>(MediaProperty::AudioSamples)
            .unwrap_or(0) as i64;
    }
    assert_eq!(total_samples, 100);
}

#[test]
fn audio_output_conversion() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("convertible.wav");
    write_silence_wav(&path);

    // Same-rate sample-format conversion: s16 in, s32 out.
    let source = create_source(&path).unwrap();
    let mut stream = source.audio_stream(0).unwrap();
    stream
        .set_output_format_audio(SampleFormat::Signed32, None)
        .unwrap();
    let mut frame = stream.next_frame().unwrap().expect("first frame");
    let data = frame.data().unwrap();
    assert_eq!(data.sample_format, SampleFormat::Signed32);
    assert!(data.sample_count > 0);
    assert_eq!(data.data_size, data.sample_count as usize * 4); // mono s32
    // Silence stays silence through the converter.
    assert!(data.planes[0][..data.data_size].iter().all(|&b| b == 0));
    // The conversion is cached: a second call sees the same view.
    assert_eq!(frame.data().unwrap().sample_format, SampleFormat::Signed32);

    // Rate conversion, layout preserved: 22.05 kHz in, 44.1 kHz out.
    let source = create_source(&path).unwrap();
    let mut stream = source.audio_stream(0).unwrap();
    stream
        .set_output_format_audio(SampleFormat::Signed16, Some(44_100))
        .unwrap();
    let mut frame = stream.next_frame().unwrap().expect("first frame");
    let data = frame.data().unwrap();
    assert_eq!(data.sample_format, SampleFormat::Signed16);
    assert!(data.sample_count > 0);
    assert_eq!(data.data_size, data.sample_count as usize * 2); // mono s16
    assert!(data.planes[0][..data.data_size].iter().all(|&b| b == 0));
}

#[test]
fn source_rejects_missing_files() {
    init();
    assert!(create_source("/no/such/file.mov").is_err());
}
