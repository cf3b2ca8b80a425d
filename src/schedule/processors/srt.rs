//! Minimal SubRip (.srt) reading and writing.

use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cue {
    pub index: usize,
    /// Timing line as written, e.g. `00:00:01,000 --> 00:00:02,500`.
    pub timing: String,
    pub text: String,
}

/// Parse SRT content into cues. Blocks without a timing line are skipped.
pub fn parse(content: &str) -> Vec<Cue> {
    let content = content.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    let mut cues = Vec::new();

    for block in content.split("\n\n") {
        let mut lines = block.lines().map(str::trim_end).filter(|l| !l.trim().is_empty());
        let Some(first) = lines.next() else {
            continue;
        };

        // the numeric counter is optional in the wild
        let (index, timing) = if first.contains("-->") {
            (cues.len() + 1, first)
        } else {
            match lines.next() {
                Some(timing) if timing.contains("-->") => {
                    (first.trim().parse().unwrap_or(cues.len() + 1), timing)
                }
                _ => continue,
            }
        };

        let text = lines.collect::<Vec<_>>().join("\n");
        cues.push(Cue {
            index,
            timing: timing.trim().to_string(),
            text,
        });
    }

    cues
}

/// Serialize cues, renumbering them from 1.
pub fn render(cues: &[Cue]) -> String {
    let mut out = String::new();
    for (i, cue) in cues.iter().enumerate() {
        let _ = write!(out, "{}\n{}\n{}\n\n", i + 1, cue.timing, cue.text);
    }
    out
}
