// crates/mediaport-core/src/timecode.rs
//
// SMPTE timecode over a rational time-scale and frame-rate.
//
// The timestamp is an integer in units of `time_scale` (a scale of 1/1000
// makes it milliseconds). Frame and millisecond counts are derived on
// demand. Drop-frame formatting applies only to the NTSC rates 30000/1001
// and 60000/1001; the second/frame separator becomes ';' in that form.

use crate::lcritical;
use crate::rational::Rational;

const SECONDS_IN_MIN: i64 = 60;
const SECONDS_IN_HOUR: i64 = SECONDS_IN_MIN * 60;
const DROP_FACTOR: f64 = 0.06;

fn ntsc_30() -> Rational {
    Rational::new(30000, 1001)
}

fn ntsc_60() -> Rational {
    Rational::new(60000, 1001)
}

/// Frame counts per clock unit, precomputed at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Cadence {
    drop: bool,
    per_second: i64,
    per_minute: i64,
    per_hour: i64,
    drop_minute: i64,
    drop_ten_minute: i64,
    drop_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeCode {
    time_scale: Rational,
    frame_rate: Rational,
    timestamp: i64,
    cadence: Cadence,
}

impl TimeCode {
    pub fn new(time_scale: Rational, frame_rate: Rational, timestamp: i64) -> Self {
        let rate = frame_rate.to_f64().round() as i64;
        let mut cadence = Cadence {
            drop: frame_rate.denominator() != 1,
            per_second: rate,
            per_minute: rate * SECONDS_IN_MIN,
            per_hour: rate * SECONDS_IN_HOUR,
            drop_minute: 0,
            drop_ten_minute: 0,
            drop_count: 0,
        };
        if cadence.drop {
            let per_minute_exact = (frame_rate * SECONDS_IN_MIN).to_f64();
            cadence.drop_count = (frame_rate.to_f64() * DROP_FACTOR).round() as i64;
            cadence.drop_minute = per_minute_exact.floor() as i64;
            cadence.drop_ten_minute = (per_minute_exact * 10.0).round() as i64;
        }
        TimeCode { time_scale, frame_rate, timestamp, cadence }
    }

    pub fn time_scale(&self) -> Rational {
        self.time_scale
    }

    pub fn frame_rate(&self) -> Rational {
        self.frame_rate
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, timestamp: i64) {
        self.timestamp = timestamp;
    }

    pub fn to_millis(&self) -> i64 {
        ((self.timestamp * self.time_scale) * 1000i64).round()
    }

    pub fn to_frames(&self) -> i64 {
        ((self.timestamp * self.time_scale) * self.frame_rate).floor()
    }

    /// Set the position as a frame count.
    pub fn set_frames(&mut self, count: i64) -> bool {
        if count < 0 {
            return false;
        }
        self.timestamp = ((count / self.frame_rate) / self.time_scale).ceil();
        true
    }

    /// Format as SMPTE timecode. `drop` requests drop-frame form, honoured
    /// only for NTSC 29.97/59.94 material; for any other rate the non-drop
    /// form is produced.
    pub fn to_smpte(&self, drop: bool) -> String {
        self.frames_to_smpte(self.to_frames(), drop)
    }

    /// Parse `hh:mm:ss:ff` (non-drop) or `hh:mm:ss;ff` (drop, NTSC only).
    /// Returns false without mutating state when the string is malformed.
    pub fn set_timecode(&mut self, timecode: &str) -> bool {
        if timecode.len() != 11 || !timecode.is_ascii() {
            lcritical!("Timecode empty or of incorrect length");
            return false;
        }
        let field = |range: std::ops::Range<usize>| {
            let s = &timecode[range];
            if s.bytes().all(|b| b.is_ascii_digit()) {
                s.parse::<i64>().ok()
            } else {
                None
            }
        };

        let Some(hours) = field(0..2) else {
            lcritical!("Timecode hours field is not numeric");
            return false;
        };
        if hours >= 24 {
            lcritical!("Timecode has greater than 23 hours");
            return false;
        }
        if &timecode[2..3] != ":" {
            lcritical!("Timecode has incorrect hour/minute separator");
            return false;
        }
        let Some(minutes) = field(3..5) else {
            lcritical!("Timecode minutes field is not numeric");
            return false;
        };
        if minutes >= 60 {
            lcritical!("Timecode has greater than 59 minutes");
            return false;
        }
        if &timecode[5..6] != ":" {
            lcritical!("Timecode has incorrect minute/second separator");
            return false;
        }
        let Some(tc_seconds) = field(6..8) else {
            lcritical!("Timecode seconds field is not numeric");
            return false;
        };
        if tc_seconds >= 60 {
            lcritical!("Timecode has greater than 59 seconds");
            return false;
        }
        let separator = &timecode[8..9];
        if separator != ":" && separator != ";" {
            lcritical!("Timecode has incorrect second/frame separator");
            return false;
        }
        let ntsc = self.is_ntsc();
        if !ntsc && separator == ";" {
            lcritical!("Timecode has drop-frame separator for a non-NTSC frame-rate");
            return false;
        }
        let Some(tc_frames) = field(9..11) else {
            lcritical!("Timecode frames field is not numeric");
            return false;
        };
        let full_rate = self.frame_rate.ceil();
        if tc_frames >= full_rate {
            lcritical!("Timecode has greater than {} frames", full_rate - 1);
            return false;
        }

        let seconds = tc_seconds + hours * SECONDS_IN_HOUR + minutes * SECONDS_IN_MIN;
        self.timestamp = if separator == ";" {
            // Drop-frame display skips frame numbers on the minute; undo the
            // skip to recover the true frame count before rescaling.
            let total_minutes = hours * 60 + minutes;
            let nominal = full_rate * seconds + tc_frames;
            let dropped = self.cadence.drop_count * (total_minutes - total_minutes / 10);
            (((nominal - dropped) / self.frame_rate) / self.time_scale).ceil()
        } else if ntsc {
            // Non-drop display of NTSC material counts nominal (integer-rate)
            // frames; convert the frame total back through the true rate.
            let all_frames = full_rate * seconds + tc_frames;
            ((all_frames / self.frame_rate) / self.time_scale).round()
        } else {
            (seconds / self.time_scale + (tc_frames / self.frame_rate) / self.time_scale).ceil()
        };
        true
    }

    fn is_ntsc(&self) -> bool {
        self.frame_rate == ntsc_30() || self.frame_rate == ntsc_60()
    }

    // Drop-frame adjustment influenced by http://www.davidheidelberger.com/blog/?p=29
    fn frames_to_smpte(&self, mut frames: i64, drop: bool) -> String {
        let c = &self.cadence;
        let mut token = ':';
        if drop && c.drop && self.is_ntsc() {
            let d = frames / c.drop_ten_minute;
            let m = frames % c.drop_ten_minute;
            if m > c.drop_count {
                frames += c.drop_count * 9 * d
                    + c.drop_count * ((m - c.drop_count) / c.drop_minute);
            } else {
                frames += c.drop_count * 9 * d;
            }
            token = ';';
        }
        let ff = frames % c.per_second;
        let ss = (frames / c.per_second) % 60;
        let mm = (frames / c.per_minute) % 60;
        let hh = (frames / c.per_hour) % 24;
        format!("{hh:02}:{mm:02}:{ss:02}{token}{ff:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tc(scale: (i64, i64), rate: (i64, i64), ts: i64) -> TimeCode {
        TimeCode::new(Rational::new(scale.0, scale.1), Rational::new(rate.0, rate.1), ts)
    }

    #[test]
    fn unity_rate() {
        let t = tc((1, 1), (1, 1), 0);
        assert_eq!(t.timestamp(), 0);
        assert_eq!(t.to_millis(), 0);
        assert_eq!(t.to_frames(), 0);
        assert_eq!(t.to_smpte(true), "00:00:00:00");

        let t = tc((1, 1), (1, 1), 100);
        assert_eq!(t.to_millis(), 100_000);
        assert_eq!(t.to_frames(), 100);
        assert_eq!(t.to_smpte(true), "00:01:40:00");
    }

    #[test]
    fn pal_25() {
        let mut t = tc((1, 1000), (25, 1), 150);
        assert_eq!(t.to_frames(), 3);
        assert_eq!(t.to_millis(), 150);
        assert_eq!(t.to_smpte(true), "00:00:00:03");

        t.set_timestamp(60_000);
        assert_eq!(t.to_frames(), 1_500);
        assert_eq!(t.to_smpte(true), "00:01:00:00");

        t.set_timestamp(3_600_000);
        assert_eq!(t.to_frames(), 90_000);
        assert_eq!(t.to_smpte(true), "01:00:00:00");
    }

    #[test]
    fn ntsc_24_is_never_drop() {
        let t = tc((1, 1000), (24000, 1001), 600_000);
        assert_eq!(t.to_frames(), 14_385);
        assert_eq!(t.to_smpte(true), "00:09:59:09");
        assert_eq!(t.to_smpte(true), t.to_smpte(false));
    }

    #[test]
    fn ntsc_30_drop_frame() {
        let mut t = tc((1, 1000), (30000, 1001), 0);
        assert_eq!(t.to_smpte(true), "00:00:00;00");
        assert_eq!(t.to_smpte(false), "00:00:00:00");

        t.set_timestamp(59_966);
        assert_eq!(t.to_frames(), 1_797);
        assert_eq!(t.to_smpte(true), "00:00:59;27");
        assert_eq!(t.to_smpte(false), "00:00:59:27");

        // One NTSC minute: two frame numbers are dropped.
        t.set_timestamp(60_066);
        assert_eq!(t.to_frames(), 1_800);
        assert_eq!(t.to_smpte(true), "00:01:00;02");
        assert_eq!(t.to_smpte(false), "00:01:00:00");

        // Ten wall-clock minutes: 18 numbers dropped so far, none at the
        // ten-minute mark itself.
        t.set_timestamp(600_600);
        assert_eq!(t.to_frames(), 18_000);
        assert_eq!(t.to_smpte(true), "00:10:00;18");
        assert_eq!(t.to_smpte(false), "00:10:00:00");
    }

    #[test]
    fn ntsc_60_drops_four_frames_per_minute() {
        let mut t = tc((1, 1000), (60000, 1001), 60_066);
        assert_eq!(t.to_frames(), 3_600);
        assert_eq!(t.to_smpte(true), "00:01:00;04");
        assert_eq!(t.to_smpte(false), "00:01:00:00");

        t.set_timestamp(0);
        assert_eq!(t.to_smpte(true), "00:00:00;00");
    }

    #[test]
    fn non_ntsc_drop_request_is_identity() {
        for rate in [(25i64, 1i64), (50, 1), (24, 1), (24000, 1001)] {
            let t = tc((1, 1000), rate, 123_456);
            assert_eq!(t.to_smpte(true), t.to_smpte(false));
        }
    }

    #[test]
    fn parse_round_trip_preserves_frames() {
        for &(rate, ts) in &[
            ((25i64, 1i64), 150i64),
            ((25, 1), 60_000),
            ((30000, 1001), 60_066),
            ((30000, 1001), 59_966),
            ((30000, 1001), 600_600),
            ((60000, 1001), 60_066),
            ((50, 1), 3_600_000),
        ] {
            let original = tc((1, 1000), rate, ts);
            for drop in [true, false] {
                let mut parsed = tc((1, 1000), rate, 0);
                assert!(parsed.set_timecode(&original.to_smpte(drop)),
                        "failed to parse {}", original.to_smpte(drop));
                assert_eq!(parsed.to_frames(), original.to_frames(),
                           "frame mismatch for {}", original.to_smpte(drop));
            }
        }
    }

    #[test]
    fn malformed_strings_leave_state_unchanged() {
        let mut t = tc((1, 1000), (25, 1), 777);
        for bad in [
            "",
            "00:00:00",
            "99:00:00:00",
            "00:61:00:00",
            "00:00:61:00",
            "00:00:00:99",
            "00-00:00:00",
            "00:00:00;00", // drop separator on a PAL rate
            "aa:bb:cc:dd",
        ] {
            assert!(!t.set_timecode(bad), "accepted malformed timecode {bad:?}");
            assert_eq!(t.timestamp(), 777);
        }
    }

    #[test]
    fn set_frames_inverts_to_frames() {
        let mut t = tc((1, 1000), (25, 1), 0);
        assert!(t.set_frames(1_500));
        assert_eq!(t.to_frames(), 1_500);
        assert!(!t.set_frames(-1));
    }
}
