//! Display helpers for logs and the CLI.

/// Parameter count with a K/M/B suffix.
pub fn format_params(n: usize) -> String {
    if n >= 1_000_000_000 {
        format!("{:.2}B", n as f64 / 1e9)
    } else if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1e6)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1e3)
    } else {
        n.to_string()
    }
}

/// Joins decoded words, marking tokens copied from the source.
pub fn format_summary(words: &[String], copied: &[bool]) -> String {
    words
        .iter()
        .enumerate()
        .map(|(i, w)| {
            if copied.get(i).copied().unwrap_or(false) {
                format!("__{}__", w)
            } else {
                w.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_params() {
        assert_eq!(format_params(950), "950");
        assert_eq!(format_params(12_300), "12.3K");
        assert_eq!(format_params(4_200_000), "4.2M");
    }

    #[test]
    fn test_format_summary_marks_copies() {
        let words = vec!["the".to_string(), "zorblat".to_string()];
        assert_eq!(format_summary(&words, &[false, true]), "the __zorblat__");
        assert_eq!(format_summary(&words, &[]), "the zorblat");
    }
}
