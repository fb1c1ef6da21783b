use indexmap::IndexMap;
use regex::Regex;

use super::{
    resolve_identifier, sanitize_identifier, AttributeValue, ParsedReport, ReportError,
    ReportParser,
};

/// Parses `patmatmotifs` reports into motif name → occurrence count.
///
/// A report looks like:
///
/// ```text
/// # Commandline: patmatmotifs
/// #    -sequence XP_001.1.fasta
/// #    -outfile XP_001.1.patmatmotifs
/// ...
/// # Sequence: XP_001.1     from: 1   to: 148
/// # HitCount: 2
/// ...
/// Motif = EF_HAND_1
/// ...
/// Motif = EF_HAND_1
/// ```
///
/// Motifs that do not occur are never part of the output; a report without any motif lines
/// produces an empty mapping.
pub struct MotifParser {
    motif_line: Regex,
    sequence_directive: Regex,
    commandline_directive: Regex,
    hit_count: Regex,
}

impl MotifParser {
    pub fn new() -> Self {
        // the patterns are literals, so compilation cannot fail at runtime
        MotifParser {
            motif_line: Regex::new(r"^\s*Motif\s*=\s*(.*?)\s*$").expect("valid motif pattern"),
            sequence_directive: Regex::new(r"^#\s*Sequence:\s*(\S+)")
                .expect("valid sequence pattern"),
            commandline_directive: Regex::new(r"^#\s+-sequence\s+(\S+)")
                .expect("valid commandline pattern"),
            hit_count: Regex::new(r"^#\s*HitCount:\s*(\d+)").expect("valid hit count pattern"),
        }
    }
}

impl Default for MotifParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportParser for MotifParser {
    fn parse(&self, text: &str, expected: &str) -> ParsedReport {
        let mut issues = Vec::new();
        let mut counts: IndexMap<String, u64> = IndexMap::new();

        let mut sequence_name = None;
        let mut commandline_name = None;
        let mut declared_hits = None;
        let mut motif_lines = 0u64;

        for line in text.lines() {
            if let Some(c) = self.sequence_directive.captures(line) {
                sequence_name.get_or_insert_with(|| sanitize_identifier(&c[1]));
                continue;
            }
            if let Some(c) = self.commandline_directive.captures(line) {
                commandline_name.get_or_insert_with(|| sanitize_identifier(&c[1]));
                continue;
            }
            if let Some(c) = self.hit_count.captures(line) {
                declared_hits = c[1].parse::<u64>().ok();
                continue;
            }

            let Some(c) = self.motif_line.captures(line) else {
                continue;
            };

            let name = &c[1];
            if name.is_empty() {
                issues.push(ReportError::MalformedReport {
                    identifier: sanitize_identifier(expected),
                    reason: format!("motif line without a motif name: `{}`", line.trim()),
                });
                continue;
            }

            motif_lines += 1;
            *counts.entry(name.to_string()).or_insert(0) += 1;
        }

        let identifier = resolve_identifier(
            sequence_name.or(commandline_name),
            expected,
            "sequence",
            &mut issues,
        );

        if let Some(declared) = declared_hits {
            if declared != motif_lines {
                issues.push(ReportError::MalformedReport {
                    identifier: identifier.clone(),
                    reason: format!(
                        "declares {declared} hit(s) but {motif_lines} motif line(s) were found"
                    ),
                });
            }
        }

        ParsedReport {
            identifier,
            attributes: counts
                .into_iter()
                .map(|(name, n)| (name, AttributeValue::Count(n)))
                .collect(),
            issues,
        }
    }
}
