//! Output directory naming.

use std::path::{Path, PathBuf};

/// Reduce a knowledge-point title to a filesystem-safe name.
///
/// Keeps ASCII alphanumerics, space, `_ - { } [ ] + & =` and `π`; runs of
/// whitespace become a single underscore.
pub fn safe_topic_name(topic: &str) -> String {
    let kept: String = topic
        .chars()
        .filter(|c| {
            c.is_ascii_alphanumeric()
                || matches!(c, ' ' | '_' | '-' | '{' | '}' | '[' | ']' | '+' | '&' | '=' | 'π')
        })
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join("_")
}

/// `<base>/<idx>-<safe topic>`.
pub fn output_dir_for(idx: usize, topic: &str, base: &Path) -> PathBuf {
    base.join(format!("{}-{}", idx, safe_topic_name(topic)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_name_strips_and_joins() {
        assert_eq!(safe_topic_name("  Fourier   Series: intro? "), "Fourier_Series_intro");
        assert_eq!(safe_topic_name("a+b = c"), "a+b_=_c");
        assert_eq!(safe_topic_name("Area of π r^2"), "Area_of_π_r2");
    }

    #[test]
    fn output_dir_is_prefixed_with_index() {
        let dir = output_dir_for(3, "Binary Search", Path::new("/tmp/cases"));
        assert_eq!(dir, PathBuf::from("/tmp/cases/3-Binary_Search"));
    }
}
