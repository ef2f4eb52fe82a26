// crates/mediaport-ffmpeg/src/convert.rs
//
// Mapping tables between the library's backend-neutral enums and libav
// identifiers. Every conversion is a total `match`; values the library does
// not model collapse to an Unknown/Unspecified variant on the way in and are
// rejected before reaching libav on the way out.

use ffmpeg_the_third as ffmpeg;

use ffmpeg::codec::Id as CodecId;
use ffmpeg::ffi;
use ffmpeg::format::sample::Type as SampleType;
use ffmpeg::format::{Pixel, Sample};
use ffmpeg::software::scaling::Flags as ScaleFlags;
use ffmpeg::util::channel_layout::{ChannelLayout as AvLayout, ChannelLayoutMask};
use ffmpeg::util::color;

use mediaport_core::types::{
    ChannelLayout, Codec, ColourPrimaries, ColourRange, InterpolationMethod,
    MatrixCoefficients, PixelFormat, Preset, Profile, SampleFormat, TransferCharacteristics,
};

pub fn pixel_to_av(format: PixelFormat) -> Pixel {
    match format {
        PixelFormat::Rgb24 => Pixel::RGB24,
        PixelFormat::Rgba => Pixel::RGBA,
        PixelFormat::Rgb48Le => Pixel::RGB48LE,
        PixelFormat::Yuv420 => Pixel::YUV420P,
        PixelFormat::Yuvj420 => Pixel::YUVJ420P,
        PixelFormat::Yuv422 => Pixel::YUV422P,
        PixelFormat::Yuv444 => Pixel::YUV444P,
        PixelFormat::Unknown => Pixel::None,
    }
}

pub fn pixel_from_av(format: Pixel) -> PixelFormat {
    match format {
        Pixel::RGB24 => PixelFormat::Rgb24,
        Pixel::RGBA => PixelFormat::Rgba,
        Pixel::RGB48LE => PixelFormat::Rgb48Le,
        Pixel::YUV420P => PixelFormat::Yuv420,
        Pixel::YUVJ420P => PixelFormat::Yuvj420,
        Pixel::YUV422P => PixelFormat::Yuv422,
        Pixel::YUV444P => PixelFormat::Yuv444,
        _ => PixelFormat::Unknown,
    }
}

pub fn sample_to_av(format: SampleFormat) -> Sample {
    match format {
        SampleFormat::None => Sample::None,
        SampleFormat::Unsigned8 => Sample::U8(SampleType::Packed),
        SampleFormat::Signed16 => Sample::I16(SampleType::Packed),
        SampleFormat::Signed32 => Sample::I32(SampleType::Packed),
        SampleFormat::Signed64 => Sample::I64(SampleType::Packed),
        SampleFormat::Float => Sample::F32(SampleType::Packed),
        SampleFormat::Double => Sample::F64(SampleType::Packed),
        SampleFormat::Unsigned8P => Sample::U8(SampleType::Planar),
        SampleFormat::Signed16P => Sample::I16(SampleType::Planar),
        SampleFormat::Signed32P => Sample::I32(SampleType::Planar),
        SampleFormat::Signed64P => Sample::I64(SampleType::Planar),
        SampleFormat::FloatP => Sample::F32(SampleType::Planar),
        SampleFormat::DoubleP => Sample::F64(SampleType::Planar),
    }
}

pub fn sample_from_av(format: Sample) -> SampleFormat {
    match format {
        Sample::None => SampleFormat::None,
        Sample::U8(SampleType::Packed) => SampleFormat::Unsigned8,
        Sample::I16(SampleType::Packed) => SampleFormat::Signed16,
        Sample::I32(SampleType::Packed) => SampleFormat::Signed32,
        Sample::I64(SampleType::Packed) => SampleFormat::Signed64,
        Sample::F32(SampleType::Packed) => SampleFormat::Float,
        Sample::F64(SampleType::Packed) => SampleFormat::Double,
        Sample::U8(SampleType::Planar) => SampleFormat::Unsigned8P,
        Sample::I16(SampleType::Planar) => SampleFormat::Signed16P,
        Sample::I32(SampleType::Planar) => SampleFormat::Signed32P,
        Sample::I64(SampleType::Planar) => SampleFormat::Signed64P,
        Sample::F32(SampleType::Planar) => SampleFormat::FloatP,
        Sample::F64(SampleType::Planar) => SampleFormat::DoubleP,
    }
}

pub fn codec_to_av(codec: Codec) -> CodecId {
    match codec {
        Codec::H264 => CodecId::H264,
        Codec::Mpeg2Video => CodecId::MPEG2VIDEO,
        Codec::Mpeg4 => CodecId::MPEG4,
        Codec::Dnxhd => CodecId::DNXHD,
        Codec::Mjpeg => CodecId::MJPEG,
        Codec::Raw => CodecId::RAWVIDEO,
        Codec::Jpeg2000 => CodecId::JPEG2000,
        Codec::Png => CodecId::PNG,
        Codec::Tiff => CodecId::TIFF,
        Codec::Dpx => CodecId::DPX,
        Codec::Aac => CodecId::AAC,
        Codec::Ac3 => CodecId::AC3,
        Codec::Alac => CodecId::ALAC,
        Codec::Flac => CodecId::FLAC,
        Codec::Mp3 => CodecId::MP3,
        Codec::PcmS16Le => CodecId::PCM_S16LE,
        Codec::PcmS24Le => CodecId::PCM_S24LE,
        Codec::Vorbis => CodecId::VORBIS,
        Codec::Wavpack => CodecId::WAVPACK,
    }
}

pub fn codec_from_av(id: CodecId) -> Option<Codec> {
    Some(match id {
        CodecId::H264 => Codec::H264,
        CodecId::MPEG2VIDEO => Codec::Mpeg2Video,
        CodecId::MPEG4 => Codec::Mpeg4,
        CodecId::DNXHD => Codec::Dnxhd,
        CodecId::MJPEG => Codec::Mjpeg,
        CodecId::RAWVIDEO => Codec::Raw,
        CodecId::JPEG2000 => Codec::Jpeg2000,
        CodecId::PNG => Codec::Png,
        CodecId::TIFF => Codec::Tiff,
        CodecId::DPX => Codec::Dpx,
        CodecId::AAC => Codec::Aac,
        CodecId::AC3 => Codec::Ac3,
        CodecId::ALAC => Codec::Alac,
        CodecId::FLAC => Codec::Flac,
        CodecId::MP3 => Codec::Mp3,
        CodecId::PCM_S16LE => Codec::PcmS16Le,
        CodecId::PCM_S24LE => Codec::PcmS24Le,
        CodecId::VORBIS => Codec::Vorbis,
        CodecId::WAVPACK => Codec::Wavpack,
        _ => return None,
    })
}

pub fn layout_to_av(layout: ChannelLayout) -> AvLayout<'static> {
    match layout {
        ChannelLayout::Mono => AvLayout::MONO,
        ChannelLayout::Stereo => AvLayout::STEREO,
        ChannelLayout::StereoLfe => AvLayout::_2POINT1,
        ChannelLayout::ThreeStereo => AvLayout::SURROUND,
        ChannelLayout::ThreeSurround => AvLayout::_2_1,
        ChannelLayout::ThreeSurroundLfe => AvLayout::_3POINT1,
        ChannelLayout::FourStereo => AvLayout::QUAD,
        ChannelLayout::FourSurround => AvLayout::_4POINT0,
        ChannelLayout::FourSurroundLfe => AvLayout::_4POINT1,
        ChannelLayout::Five => AvLayout::_5POINT0,
        ChannelLayout::FiveStereo => AvLayout::_5POINT0_BACK,
        ChannelLayout::FiveLfe => AvLayout::_5POINT1,
        ChannelLayout::FiveStereoLfe => AvLayout::_5POINT1_BACK,
        ChannelLayout::Six => AvLayout::_6POINT0,
        ChannelLayout::SixLfe => AvLayout::_6POINT1,
        ChannelLayout::Seven => AvLayout::_7POINT0,
        ChannelLayout::SevenLfe => AvLayout::_7POINT1,
    }
}

pub fn layout_mask(layout: ChannelLayout) -> ChannelLayoutMask {
    match layout {
        ChannelLayout::Mono => ChannelLayoutMask::MONO,
        ChannelLayout::Stereo => ChannelLayoutMask::STEREO,
        ChannelLayout::StereoLfe => ChannelLayoutMask::_2POINT1,
        ChannelLayout::ThreeStereo => ChannelLayoutMask::SURROUND,
        ChannelLayout::ThreeSurround => ChannelLayoutMask::_2_1,
        ChannelLayout::ThreeSurroundLfe => ChannelLayoutMask::_3POINT1,
        ChannelLayout::FourStereo => ChannelLayoutMask::QUAD,
        ChannelLayout::FourSurround => ChannelLayoutMask::_4POINT0,
        ChannelLayout::FourSurroundLfe => ChannelLayoutMask::_4POINT1,
        ChannelLayout::Five => ChannelLayoutMask::_5POINT0,
        ChannelLayout::FiveStereo => ChannelLayoutMask::_5POINT0_BACK,
        ChannelLayout::FiveLfe => ChannelLayoutMask::_5POINT1,
        ChannelLayout::FiveStereoLfe => ChannelLayoutMask::_5POINT1_BACK,
        ChannelLayout::Six => ChannelLayoutMask::_6POINT0,
        ChannelLayout::SixLfe => ChannelLayoutMask::_6POINT1,
        ChannelLayout::Seven => ChannelLayoutMask::_7POINT0,
        ChannelLayout::SevenLfe => ChannelLayoutMask::_7POINT1,
    }
}

/// Classify a decoded stream's layout by channel count. The canonical layout
/// of each count is reported; the distinction between e.g. 5.0 side and 5.0
/// back is not observable through this library's property surface.
pub fn layout_from_channels(channels: i32) -> ChannelLayout {
    match channels {
        1 => ChannelLayout::Mono,
        2 => ChannelLayout::Stereo,
        3 => ChannelLayout::ThreeStereo,
        4 => ChannelLayout::FourSurround,
        5 => ChannelLayout::Five,
        6 => ChannelLayout::FiveLfe,
        7 => ChannelLayout::SixLfe,
        _ => ChannelLayout::SevenLfe,
    }
}

pub fn profile_to_av(profile: Profile) -> i32 {
    (match profile {
        Profile::H264Baseline => ffi::FF_PROFILE_H264_BASELINE,
        Profile::H264Main => ffi::FF_PROFILE_H264_MAIN,
        Profile::H264High => ffi::FF_PROFILE_H264_HIGH,
        Profile::H264High10 => ffi::FF_PROFILE_H264_HIGH_10,
        Profile::H264High422 => ffi::FF_PROFILE_H264_HIGH_422,
        Profile::H264High444 => ffi::FF_PROFILE_H264_HIGH_444,
        Profile::Mpeg2Simple => ffi::FF_PROFILE_MPEG2_SIMPLE,
        Profile::Mpeg2Main => ffi::FF_PROFILE_MPEG2_MAIN,
        Profile::Mpeg2High => ffi::FF_PROFILE_MPEG2_HIGH,
        Profile::Mpeg2_422 => ffi::FF_PROFILE_MPEG2_422,
        Profile::Dnxhd => ffi::FF_PROFILE_DNXHD,
        Profile::DnxhrLb => ffi::FF_PROFILE_DNXHR_LB,
        Profile::DnxhrSq => ffi::FF_PROFILE_DNXHR_SQ,
        Profile::DnxhrHq => ffi::FF_PROFILE_DNXHR_HQ,
        Profile::DnxhrHqx => ffi::FF_PROFILE_DNXHR_HQX,
        Profile::Dnxhr444 => ffi::FF_PROFILE_DNXHR_444,
    }) as i32
}

pub fn profile_from_av(codec: Codec, profile: i32) -> Option<Profile> {
    let profile = profile as i64;
    let matches = |ff: i32| i64::from(ff) == profile;
    Some(match codec {
        Codec::H264 => {
            if matches(ffi::FF_PROFILE_H264_BASELINE) {
                Profile::H264Baseline
            } else if matches(ffi::FF_PROFILE_H264_MAIN) {
                Profile::H264Main
            } else if matches(ffi::FF_PROFILE_H264_HIGH) {
                Profile::H264High
            } else if matches(ffi::FF_PROFILE_H264_HIGH_10) {
                Profile::H264High10
            } else if matches(ffi::FF_PROFILE_H264_HIGH_422) {
                Profile::H264High422
            } else if matches(ffi::FF_PROFILE_H264_HIGH_444) {
                Profile::H264High444
            } else {
                return None;
            }
        }
        Codec::Mpeg2Video => {
            if matches(ffi::FF_PROFILE_MPEG2_SIMPLE) {
                Profile::Mpeg2Simple
            } else if matches(ffi::FF_PROFILE_MPEG2_MAIN) {
                Profile::Mpeg2Main
            } else if matches(ffi::FF_PROFILE_MPEG2_HIGH) {
                Profile::Mpeg2High
            } else if matches(ffi::FF_PROFILE_MPEG2_422) {
                Profile::Mpeg2_422
            } else {
                return None;
            }
        }
        Codec::Dnxhd => {
            if matches(ffi::FF_PROFILE_DNXHD) {
                Profile::Dnxhd
            } else if matches(ffi::FF_PROFILE_DNXHR_LB) {
                Profile::DnxhrLb
            } else if matches(ffi::FF_PROFILE_DNXHR_SQ) {
                Profile::DnxhrSq
            } else if matches(ffi::FF_PROFILE_DNXHR_HQ) {
                Profile::DnxhrHq
            } else if matches(ffi::FF_PROFILE_DNXHR_HQX) {
                Profile::DnxhrHqx
            } else if matches(ffi::FF_PROFILE_DNXHR_444) {
                Profile::Dnxhr444
            } else {
                return None;
            }
        }
        _ => return None,
    })
}

pub fn preset_name(preset: Preset) -> &'static str {
    match preset {
        Preset::VerySlow => "veryslow",
        Preset::Slower => "slower",
        Preset::Slow => "slow",
        Preset::Medium => "medium",
        Preset::Fast => "fast",
        Preset::Faster => "faster",
        Preset::VeryFast => "veryfast",
        Preset::SuperFast => "superfast",
        Preset::UltraFast => "ultrafast",
    }
}

pub fn interpolation_flags(method: InterpolationMethod) -> ScaleFlags {
    match method {
        InterpolationMethod::Bilinear => ScaleFlags::BILINEAR,
        InterpolationMethod::Bicublin => ScaleFlags::BICUBLIN,
        InterpolationMethod::Bicubic => ScaleFlags::BICUBIC,
        InterpolationMethod::Lanczos => ScaleFlags::LANCZOS,
    }
}

pub fn primaries_from_av(value: color::Primaries) -> ColourPrimaries {
    match value {
        color::Primaries::BT709 => ColourPrimaries::Bt709,
        color::Primaries::BT470M => ColourPrimaries::Bt470M,
        color::Primaries::BT470BG => ColourPrimaries::Bt470Bg,
        color::Primaries::SMPTE170M => ColourPrimaries::Bt601,
        color::Primaries::BT2020 => ColourPrimaries::Bt2020,
        color::Primaries::SMPTE240M => ColourPrimaries::Smpte240M,
        color::Primaries::SMPTE428 => ColourPrimaries::Smpte428,
        _ => ColourPrimaries::Unspecified,
    }
}

pub fn transfer_from_av(value: color::TransferCharacteristic) -> TransferCharacteristics {
    match value {
        color::TransferCharacteristic::BT709 => TransferCharacteristics::Bt709,
        color::TransferCharacteristic::GAMMA22 => TransferCharacteristics::Bt470M,
        color::TransferCharacteristic::GAMMA28 => TransferCharacteristics::Bt470Bg,
        color::TransferCharacteristic::SMPTE170M => TransferCharacteristics::Bt601,
        color::TransferCharacteristic::SMPTE240M => TransferCharacteristics::Smpte240M,
        color::TransferCharacteristic::Linear => TransferCharacteristics::Linear,
        color::TransferCharacteristic::IEC61966_2_1 => TransferCharacteristics::Iec61966_2_1,
        color::TransferCharacteristic::IEC61966_2_4 => TransferCharacteristics::Iec61966_2_4,
        color::TransferCharacteristic::BT2020_10 => TransferCharacteristics::Bt2020_10,
        color::TransferCharacteristic::BT2020_12 => TransferCharacteristics::Bt2020_12,
        color::TransferCharacteristic::SMPTE2084 => TransferCharacteristics::Smpte2084,
        color::TransferCharacteristic::SMPTE428 => TransferCharacteristics::Smpte428,
        color::TransferCharacteristic::ARIB_STD_B67 => TransferCharacteristics::AribStdB67,
        _ => TransferCharacteristics::Unspecified,
    }
}

pub fn matrix_from_av(value: color::Space) -> MatrixCoefficients {
    match value {
        color::Space::RGB => MatrixCoefficients::Rgb,
        color::Space::BT709 => MatrixCoefficients::Bt709,
        color::Space::FCC => MatrixCoefficients::Fcc,
        color::Space::BT470BG => MatrixCoefficients::Bt470Bg,
        color::Space::SMPTE170M => MatrixCoefficients::Bt601_6,
        color::Space::SMPTE240M => MatrixCoefficients::Smpte240M,
        color::Space::BT2020NCL => MatrixCoefficients::Bt2020Ncl,
        color::Space::BT2020CL => MatrixCoefficients::Bt2020Cl,
        color::Space::SMPTE2085 => MatrixCoefficients::Smpte2085,
        _ => MatrixCoefficients::Unspecified,
    }
}

pub fn range_from_av(value: color::Range) -> ColourRange {
    match value {
        color::Range::JPEG => ColourRange::Full,
        color::Range::MPEG => ColourRange::Tv,
        _ => ColourRange::Unspecified,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_round_trip() {
        for fmt in [
            PixelFormat::Rgb24,
            PixelFormat::Rgba,
            PixelFormat::Yuv420,
            PixelFormat::Yuv422,
            PixelFormat::Yuv444,
        ] {
            assert_eq!(pixel_from_av(pixel_to_av(fmt)), fmt);
        }
    }

    #[test]
    fn codec_round_trip() {
        for codec in [Codec::H264, Codec::Aac, Codec::PcmS16Le, Codec::Wavpack] {
            assert_eq!(codec_from_av(codec_to_av(codec)), Some(codec));
        }
    }

    #[test]
    fn layout_masks_match_channel_counts() {
        for layout in [
            ChannelLayout::Mono,
            ChannelLayout::Stereo,
            ChannelLayout::FiveLfe,
            ChannelLayout::SevenLfe,
        ] {
            assert_eq!(
                layout_mask(layout).bits().count_ones() as i32,
                layout.channels()
            );
        }
    }
}
