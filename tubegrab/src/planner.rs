use crate::quality::STANDARD_TIERS;
use crate::types::{
    Container, ExtractionPlan, FetchMode, Provenance, QualityReport, StreamRole, StreamStep, BEST,
    MP3,
};
use tracing::debug;

/// Audio selectors for mp3 requests, most specific first
pub const AUDIO_LADDER: [&str; 4] = ["bestaudio", "best[height<=480]", "worstaudio", "best"];

/// Tiers a `K` label can snap to, highest first
const K_TIERS: [u32; 3] = [4320, 2160, 1440];

/// Target height for a quality label. `None` means unbounded.
///
/// Only the leading token counts, so display labels such as
/// `"1080p (Full HD)"` parse. Labels that do not parse are treated as
/// `best`.
pub fn parse_target_height(label: &str) -> Option<u32> {
    let token = label.split_whitespace().next()?.to_lowercase();
    if token == BEST {
        return None;
    }

    if let Some(digits) = token.strip_suffix('k') {
        let thousands: u32 = digits.parse().ok()?;
        let approx = thousands.checked_mul(1000)?;
        return K_TIERS
            .iter()
            .chain(STANDARD_TIERS.iter())
            .copied()
            .find(|tier| *tier <= approx)
            .or(Some(approx).filter(|h| *h > 0));
    }

    let digits = token.strip_suffix('p').unwrap_or(&token);
    // "720p60" style labels carry a frame rate after the p
    let digits = digits.split('p').next().unwrap_or(digits);
    digits.parse::<u32>().ok().filter(|h| *h > 0)
}

/// Turn a requested label and the detected tiers into an extraction plan.
///
/// Audio requests never consult the report.
pub fn plan(requested: &str, report: Option<&QualityReport>) -> ExtractionPlan {
    if requested.trim().eq_ignore_ascii_case(MP3) {
        return ExtractionPlan {
            label: MP3.to_string(),
            container: Container::Mp3,
            target_height: None,
            steps: vec![StreamStep {
                role: StreamRole::AudioOnly,
                mode: FetchMode::ResolveUrl,
                selectors: AUDIO_LADDER.iter().map(|s| s.to_string()).collect(),
            }],
        };
    }

    let mut target = parse_target_height(requested);
    if let (Some(t), Some(report)) = (target, report) {
        let measured = report.provenance != Provenance::Heuristic && report.max_height > 0;
        if measured && t > report.max_height {
            debug!(requested = t, max = report.max_height, "Capping target to detected maximum");
            target = Some(report.max_height);
        }
    }

    let video_selectors = match target {
        Some(t) => vec![format!("bestvideo[height<={}]", t), "bestvideo".to_string()],
        None => vec!["bestvideo".to_string()],
    };

    ExtractionPlan {
        label: target.map_or_else(|| BEST.to_string(), |t| format!("{}p", t)),
        container: Container::Mp4,
        target_height: target,
        steps: vec![
            StreamStep {
                role: StreamRole::VideoOnly,
                mode: FetchMode::DownloadToPath,
                selectors: video_selectors,
            },
            StreamStep {
                role: StreamRole::AudioOnly,
                mode: FetchMode::DownloadToPath,
                selectors: vec!["bestaudio".to_string(), "bestaudio*".to_string()],
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::{build_report, Detection};
    use proptest::prelude::*;

    fn report(max: u32, provenance: Provenance) -> QualityReport {
        build_report(Detection {
            max_height: max,
            heights: Vec::new(),
            provenance,
        })
    }

    #[test]
    fn test_parse_target_height() {
        let cases = [
            ("1080p", Some(1080)),
            ("1080p (Full HD)", Some(1080)),
            ("720P60", Some(720)),
            ("480", Some(480)),
            ("2K", Some(1440)),
            ("4k", Some(2160)),
            ("8K", Some(4320)),
            ("best", None),
            ("BEST", None),
            ("", None),
            ("ultra", None),
            ("0p", None),
        ];
        for (label, expected) in cases {
            assert_eq!(parse_target_height(label), expected, "label {:?}", label);
        }
    }

    #[test]
    fn test_two_k_is_distinct_from_1080() {
        let r = report(1440, Provenance::WebpageScrape);
        let two_k = plan("2K", Some(&r));
        let full_hd = plan("1080p", Some(&r));

        assert!(two_k.target_height.unwrap() <= 1440);
        assert!(full_hd.target_height.unwrap() <= 1080);
        assert_ne!(two_k.target_height, full_hd.target_height);
    }

    #[test]
    fn test_video_plan_is_two_stream() {
        let plan = plan("720p", Some(&report(1080, Provenance::ToolProbe)));
        assert_eq!(plan.container, Container::Mp4);
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].role, StreamRole::VideoOnly);
        assert_eq!(plan.steps[0].selectors, vec!["bestvideo[height<=720]", "bestvideo"]);
        assert_eq!(plan.steps[1].role, StreamRole::AudioOnly);
        assert_eq!(plan.steps[1].selectors.last().unwrap(), "bestaudio*");
        assert!(plan
            .steps
            .iter()
            .all(|s| s.mode == FetchMode::DownloadToPath));
        assert_eq!(plan.label, "720p");
    }

    #[test]
    fn test_cap_only_for_measured_reports() {
        let measured = plan("4K", Some(&report(1080, Provenance::WebpageScrape)));
        assert_eq!(measured.target_height, Some(1080));

        let guessed = plan("4K", Some(&report(720, Provenance::Heuristic)));
        assert_eq!(guessed.target_height, Some(2160));
    }

    #[test]
    fn test_best_is_unbounded() {
        let plan = plan("best", Some(&report(2160, Provenance::WebpageScrape)));
        assert_eq!(plan.target_height, None);
        assert_eq!(plan.steps[0].selectors, vec!["bestvideo"]);
        assert_eq!(plan.label, "best");
    }

    #[test]
    fn test_mp3_plan() {
        let plan = plan("MP3", None);
        assert_eq!(plan.container, Container::Mp3);
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].mode, FetchMode::ResolveUrl);
        assert_eq!(plan.steps[0].selectors, AUDIO_LADDER.to_vec());
    }

    proptest! {
        #[test]
        fn prop_target_monotonic_in_requested_height(a in 144u32..5000, b in 144u32..5000) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let r = report(1440, Provenance::WebpageScrape);
            let t_lo = plan(&format!("{}p", lo), Some(&r)).target_height.unwrap();
            let t_hi = plan(&format!("{}p", hi), Some(&r)).target_height.unwrap();
            prop_assert!(t_lo <= t_hi);
        }

        #[test]
        fn prop_selector_lists_never_empty(label in "[a-zA-Z0-9 ]{0,12}") {
            let plan = plan(&label, Some(&report(1080, Provenance::ToolProbe)));
            prop_assert!(plan.steps.iter().all(|s| !s.selectors.is_empty()));
        }
    }
}
