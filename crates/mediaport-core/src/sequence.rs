// crates/mediaport-core/src/sequence.rs
//
// Image-sequence path recognition. A path like `shot_0042.png` is part of a
// sequence when at least one sibling shares the same `<prefix><digits>.<ext>`
// shape; the generated pattern `shot_%04d.png` is what the demuxer consumes,
// with the given file's digits as the start number.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

use crate::{ldebug, linfo, lwarning};

pub const SEQUENCE_MATCHING_PATTERN: &str =
    r"^(.+?)([0-9]+)\.(bmp|dpx|exr|jpeg|jpg|png|tiff|jp2|tga)$";

static SEQUENCE_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(SEQUENCE_MATCHING_PATTERN)
        .case_insensitive(true)
        .build()
        .expect("sequence pattern is valid")
});

struct SequenceParts<'a> {
    prefix: &'a str,
    digits: &'a str,
    extension: &'a str,
}

fn split_sequence_name(file_name: &str) -> Option<SequenceParts<'_>> {
    let caps = SEQUENCE_RE.captures(file_name)?;
    Some(SequenceParts {
        prefix: caps.get(1)?.as_str(),
        digits: caps.get(2)?.as_str(),
        extension: caps.get(3)?.as_str(),
    })
}

/// Identify whether `path` belongs to a contiguous image sequence: two or
/// more files in its directory matching the same prefix and extension with
/// an integer tail.
pub fn path_is_in_sequence(path: &Path) -> bool {
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let Some(parts) = split_sequence_name(file_name) else {
        lwarning!("{} doesn't match filename {}", SEQUENCE_MATCHING_PATTERN, path.display());
        return false;
    };

    let sibling_re = RegexBuilder::new(&format!(
        "^{}[0-9]+\\.{}$",
        regex::escape(parts.prefix),
        regex::escape(parts.extension)
    ))
    .case_insensitive(true)
    .build()
    .expect("escaped sibling pattern is valid");

    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    let Ok(dir) = std::fs::read_dir(parent.unwrap_or_else(|| Path::new("."))) else {
        return false;
    };

    let mut matches = 0;
    for entry in dir.flatten() {
        if let Some(name) = entry.file_name().to_str() {
            if sibling_re.is_match(name) {
                matches += 1;
                if matches > 1 {
                    linfo!("{} is a sequence", path.display());
                    return true;
                }
            }
        }
    }
    false
}

/// Generate the demuxer pattern (`<prefix>%0Nd.<ext>`) for a sequence member.
pub fn generate_sequence_pattern(path: &Path) -> Option<PathBuf> {
    let file_name = path.file_name().and_then(|n| n.to_str())?;
    let Some(parts) = split_sequence_name(file_name) else {
        ldebug!("{} doesn't match filename {}", SEQUENCE_MATCHING_PATTERN, path.display());
        return None;
    };
    let pattern = format!(
        "{}%0{}d.{}",
        parts.prefix,
        parts.digits.len(),
        parts.extension
    );
    Some(path.with_file_name(pattern))
}

/// Extract the start number of a sequence member's file name.
pub fn sequence_start_number(path: &Path) -> Option<i64> {
    let file_name = path.file_name().and_then(|n| n.to_str())?;
    let Some(parts) = split_sequence_name(file_name) else {
        lwarning!("{} doesn't match filename {}", SEQUENCE_MATCHING_PATTERN, path.display());
        return None;
    };
    parts.digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn recognises_member_names() {
        assert!(split_sequence_name("shot_0042.png").is_some());
        assert!(split_sequence_name("SHOT_0042.PNG").is_some());
        assert!(split_sequence_name("frame1.dpx").is_some());
        assert!(split_sequence_name("clip.mov").is_none());
        assert!(split_sequence_name("0042.png").is_none()); // no prefix
        assert!(split_sequence_name("shot_.png").is_none()); // no digits
    }

    #[test]
    fn pattern_generation() {
        let p = generate_sequence_pattern(Path::new("/media/shot_0042.png")).unwrap();
        assert_eq!(p, PathBuf::from("/media/shot_%04d.png"));
        assert_eq!(
            sequence_start_number(Path::new("/media/shot_0042.png")),
            Some(42)
        );
        assert!(generate_sequence_pattern(Path::new("/media/clip.mov")).is_none());
    }

    #[test]
    fn pattern_expansion_reproduces_path() {
        // Expanding the generated pattern at the start number must give back
        // the original file name.
        let path = Path::new("/media/render_00107.tiff");
        let pattern = generate_sequence_pattern(path).unwrap();
        let number = sequence_start_number(path).unwrap();
        let expanded = pattern
            .to_string_lossy()
            .replace("%05d", &format!("{number:05}"));
        assert_eq!(PathBuf::from(expanded), path);
    }

    #[test]
    fn directory_scan_needs_two_members() {
        let dir = tempfile::tempdir().unwrap();
        let solo = dir.path().join("img_0001.png");
        File::create(&solo).unwrap();
        assert!(!path_is_in_sequence(&solo));

        File::create(dir.path().join("img_0002.png")).unwrap();
        assert!(path_is_in_sequence(&solo));

        // Different extension or prefix does not count.
        let other = dir.path().join("take_0001.jpg");
        File::create(&other).unwrap();
        assert!(!path_is_in_sequence(&other));
    }
}
