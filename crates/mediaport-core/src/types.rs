// crates/mediaport-core/src/types.rs
//
// Value types shared by every property-carrying object in the library.
// Backend-neutral: nothing in here references libav. The ffmpeg crate owns
// the mapping tables between these and the backend's identifiers.

pub type SampleRate = i32;
pub type BitRate = i64;

/// Category of an elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    Video,
    Audio,
    /// A video stream with no frame cadence, e.g. a still image or an image
    /// sequence exposed as a single synthetic stream.
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldOrder {
    Progressive,
    TopFirst,
    BottomFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgb24,
    Rgba,
    Rgb48Le,
    Yuv420,
    Yuvj420,
    Yuv422,
    Yuv444,
    Unknown,
}

/// Audio sample formats; the `P` suffix marks planar layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    None,
    Unsigned8,
    Signed16,
    Signed32,
    Signed64,
    Float,
    Double,
    Unsigned8P,
    Signed16P,
    Signed32P,
    Signed64P,
    FloatP,
    DoubleP,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelLayout {
    Mono,
    Stereo,
    StereoLfe,
    ThreeStereo,
    ThreeSurround,
    ThreeSurroundLfe,
    FourStereo,
    FourSurround,
    FourSurroundLfe,
    Five,
    FiveStereo,
    FiveLfe,
    FiveStereoLfe,
    Six,
    SixLfe,
    Seven,
    SevenLfe,
}

/// The closed set of codecs the library maps onto backend encoder/decoder ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    // video
    H264,
    Mpeg2Video,
    Mpeg4,
    Dnxhd,
    Mjpeg,
    Raw,
    // image
    Jpeg2000,
    Png,
    Tiff,
    Dpx,
    // audio
    Aac,
    Ac3,
    Alac,
    Flac,
    Mp3,
    PcmS16Le,
    PcmS24Le,
    Vorbis,
    Wavpack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Profile {
    H264Baseline,
    H264Main,
    H264High,
    H264High10,
    H264High422,
    H264High444,
    Mpeg2Simple,
    Mpeg2Main,
    Mpeg2High,
    Mpeg2_422,
    Dnxhd,
    DnxhrLb,
    DnxhrSq,
    DnxhrHq,
    DnxhrHqx,
    Dnxhr444,
}

/// x264 speed/quality presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Preset {
    VerySlow,
    Slower,
    Slow,
    Medium,
    Fast,
    Faster,
    VeryFast,
    SuperFast,
    UltraFast,
}

/// Rate-control strategy for video encoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionStrategy {
    /// Constant bit-rate: BITRATE pins min, max and average together.
    Cbr,
    /// Average bit-rate target, optionally bounded by MIN_BITRATE/MAX_BITRATE.
    TargetBitrate,
    /// Constant rate factor with the given quality value (x264-style VBR).
    Crf(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterpolationMethod {
    Bilinear,
    Bicublin,
    Bicubic,
    Lanczos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Dimensions {
    pub width: i32,
    pub height: i32,
}

/// Group-of-pictures shape: `n` frames per GOP, at most `m` B-frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Gop {
    pub n: i32,
    pub m: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColourPrimaries {
    Bt709,
    Bt470M,
    Bt470Bg,
    Bt601,
    Bt2020,
    Smpte240M,
    Smpte428,
    #[default]
    Unspecified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransferCharacteristics {
    Bt709,
    Bt470M,
    Bt470Bg,
    Bt601,
    Smpte240M,
    Linear,
    Iec61966_2_1,
    Iec61966_2_4,
    Bt2020_10,
    Bt2020_12,
    Smpte2084,
    Smpte428,
    AribStdB67,
    #[default]
    Unspecified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MatrixCoefficients {
    Rgb,
    Bt709,
    Fcc,
    Bt470Bg,
    Bt601_6,
    Smpte240M,
    Bt2020Ncl,
    Bt2020Cl,
    Smpte2085,
    #[default]
    Unspecified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColourRange {
    Full,
    Tv,
    #[default]
    Unspecified,
}

/// Colour description of a video stream or frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ColourSpace {
    pub primaries: ColourPrimaries,
    pub transfer: TransferCharacteristics,
    pub matrix: MatrixCoefficients,
    pub range: ColourRange,
}

impl ChannelLayout {
    pub fn channels(&self) -> i32 {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
            ChannelLayout::StereoLfe
            | ChannelLayout::ThreeStereo
            | ChannelLayout::ThreeSurround => 3,
            ChannelLayout::ThreeSurroundLfe
            | ChannelLayout::FourStereo
            | ChannelLayout::FourSurround => 4,
            ChannelLayout::FourSurroundLfe | ChannelLayout::Five => 5,
            ChannelLayout::FiveStereo => 5,
            ChannelLayout::FiveLfe | ChannelLayout::FiveStereoLfe | ChannelLayout::Six => 6,
            ChannelLayout::SixLfe | ChannelLayout::Seven => 7,
            ChannelLayout::SevenLfe => 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_counts() {
        assert_eq!(ChannelLayout::Mono.channels(), 1);
        assert_eq!(ChannelLayout::Stereo.channels(), 2);
        assert_eq!(ChannelLayout::FiveLfe.channels(), 6);
        assert_eq!(ChannelLayout::SevenLfe.channels(), 8);
    }
}
