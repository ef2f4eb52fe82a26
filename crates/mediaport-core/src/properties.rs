// crates/mediaport-core/src/properties.rs
//
// Keyed, heterogeneously-typed metadata attached to sources, streams, sinks
// and frames. Keys form a closed enum; values are a tagged union with one
// variant per value shape. Typed reads go through `FromProperty` and yield
// `None` on a missing key or a variant mismatch rather than panicking.

use std::collections::HashMap;

use crate::rational::Rational;
use crate::timecode::TimeCode;
use crate::types::{
    ChannelLayout, Codec, ColourSpace, CompressionStrategy, Dimensions, FieldOrder, Gop,
    PixelFormat, Preset, Profile, SampleFormat,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaProperty {
    Filename,
    FileFormat,
    Duration,
    Streams,
    VideoStreams,
    AudioStreams,
    Bitrate,
    MinBitrate,
    MaxBitrate,
    Timescale,
    FrameRate,
    FrameCount,
    PixelFormat,
    Dimensions,
    PixelAspectRatio,
    DisplayAspectRatio,
    FieldOrder,
    ColourSpace,
    Profile,
    Level,
    Preset,
    Compression,
    Gop,
    Threads,
    Codec,
    CodecName,
    AudioChannels,
    AudioSamplingRate,
    AudioSamples,
    AudioFormat,
    AudioLayout,
    StartTimecode,
    SequencePattern,
    FramePacketSize,
    FrameDuration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Int32(i32),
    Int64(i64),
    Float(f64),
    Str(String),
    Rational(Rational),
    Dimensions(Dimensions),
    TimeCode(TimeCode),
    Codec(Codec),
    PixelFormat(PixelFormat),
    SampleFormat(SampleFormat),
    ChannelLayout(ChannelLayout),
    FieldOrder(FieldOrder),
    ColourSpace(ColourSpace),
    Profile(Profile),
    Preset(Preset),
    Compression(CompressionStrategy),
    Gop(Gop),
}

/// Conversion between a concrete value type and its `PropertyValue` variant.
pub trait FromProperty: Sized {
    fn from_property(value: &PropertyValue) -> Option<Self>;
    fn into_property(self) -> PropertyValue;
}

macro_rules! property_variant {
    ($t:ty, $variant:ident) => {
        impl FromProperty for $t {
            fn from_property(value: &PropertyValue) -> Option<Self> {
                match value {
                    PropertyValue::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }
            fn into_property(self) -> PropertyValue {
                PropertyValue::$variant(self)
            }
        }
    };
}

property_variant!(i32, Int32);
property_variant!(f64, Float);
property_variant!(String, Str);
property_variant!(Rational, Rational);
property_variant!(Dimensions, Dimensions);
property_variant!(TimeCode, TimeCode);
property_variant!(Codec, Codec);
property_variant!(PixelFormat, PixelFormat);
property_variant!(SampleFormat, SampleFormat);
property_variant!(ChannelLayout, ChannelLayout);
property_variant!(FieldOrder, FieldOrder);
property_variant!(ColourSpace, ColourSpace);
property_variant!(Profile, Profile);
property_variant!(Preset, Preset);
property_variant!(CompressionStrategy, Compression);
property_variant!(Gop, Gop);

// Identity conversion, for callers that want the raw tagged value.
impl FromProperty for PropertyValue {
    fn from_property(value: &PropertyValue) -> Option<Self> {
        Some(value.clone())
    }
    fn into_property(self) -> PropertyValue {
        self
    }
}

// An i64 read tolerates an Int32-stored value so callers asking for a
// BitRate out of a bag populated from a 32-bit header field still succeed.
impl FromProperty for i64 {
    fn from_property(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Int64(v) => Some(*v),
            PropertyValue::Int32(v) => Some(*v as i64),
            _ => None,
        }
    }
    fn into_property(self) -> PropertyValue {
        PropertyValue::Int64(self)
    }
}

impl std::fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertyValue::Int32(v) => write!(f, "{v}"),
            PropertyValue::Int64(v) => write!(f, "{v}"),
            PropertyValue::Float(v) => write!(f, "{v}"),
            PropertyValue::Str(v) => write!(f, "{v}"),
            PropertyValue::Rational(v) => write!(f, "{v}"),
            PropertyValue::Dimensions(v) => write!(f, "{}x{}", v.width, v.height),
            PropertyValue::TimeCode(v) => write!(f, "{}", v.to_smpte(true)),
            PropertyValue::Codec(v) => write!(f, "{v:?}"),
            PropertyValue::PixelFormat(v) => write!(f, "{v:?}"),
            PropertyValue::SampleFormat(v) => write!(f, "{v:?}"),
            PropertyValue::ChannelLayout(v) => write!(f, "{v:?}"),
            PropertyValue::FieldOrder(v) => write!(f, "{v:?}"),
            PropertyValue::ColourSpace(v) => write!(
                f,
                "{:?}/{:?}/{:?}/{:?}",
                v.primaries, v.transfer, v.matrix, v.range
            ),
            PropertyValue::Profile(v) => write!(f, "{v:?}"),
            PropertyValue::Preset(v) => write!(f, "{v:?}"),
            PropertyValue::Compression(v) => write!(f, "{v:?}"),
            PropertyValue::Gop(v) => write!(f, "gop(n={}, m={})", v.n, v.m),
        }
    }
}

/// Keyed property storage with typed accessors.
#[derive(Debug, Clone, Default)]
pub struct PropertyBag {
    entries: HashMap<MediaProperty, PropertyValue>,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, prop: MediaProperty) -> bool {
        self.entries.contains_key(&prop)
    }

    /// Store a value, overwriting any previous one.
    pub fn set(&mut self, prop: MediaProperty, value: impl FromProperty) {
        self.entries.insert(prop, value.into_property());
    }

    /// Replace the whole contents.
    pub fn set_all(&mut self, entries: HashMap<MediaProperty, PropertyValue>) {
        self.entries = entries;
    }

    /// Typed read; `None` when the key is absent or holds another type.
    pub fn get<T: FromProperty>(&self, prop: MediaProperty) -> Option<T> {
        self.entries.get(&prop).and_then(T::from_property)
    }

    pub fn raw(&self, prop: MediaProperty) -> Option<&PropertyValue> {
        self.entries.get(&prop)
    }

    pub fn entries(&self) -> &HashMap<MediaProperty, PropertyValue> {
        &self.entries
    }

    pub fn remove(&mut self, prop: MediaProperty) {
        self.entries.remove(&prop);
    }
}
