use std::collections::HashSet;
use std::ops::Range;

use itertools::Itertools;
use regex::Regex;
use thiserror::Error;

use super::{
    resolve_identifier, sanitize_identifier, AttributeMap, AttributeValue, ParsedReport,
    ReportError, ReportParser,
};

/// Whether a field holds an integer or a real value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberKind {
    Integer,
    Float,
}

impl NumberKind {
    fn parse(&self, raw: &str) -> Option<AttributeValue> {
        match self {
            NumberKind::Integer => raw.parse::<i64>().ok().map(AttributeValue::Integer),
            NumberKind::Float => raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(AttributeValue::Float),
        }
    }
}

#[derive(Error, Debug)]
pub enum StatsPatternError {
    #[error(transparent)]
    Regex(#[from] regex::Error),

    #[error("pattern `{pattern}` has {groups} capture group(s) but names {fields} field(s)")]
    GroupCount {
        pattern: String,
        groups: usize,
        fields: usize,
    },
}

/// An anchored pattern whose capture groups feed one or more named fields, in order.
#[derive(Debug, Clone)]
pub struct FieldPattern {
    regex: Regex,
    fields: Vec<(String, NumberKind)>,
}

impl FieldPattern {
    pub fn new(pattern: &str, fields: &[(&str, NumberKind)]) -> Result<Self, StatsPatternError> {
        let regex = Regex::new(pattern)?;

        // captures_len includes the implicit whole-match group
        let groups = regex.captures_len() - 1;
        if groups != fields.len() {
            return Err(StatsPatternError::GroupCount {
                pattern: pattern.to_string(),
                groups,
                fields: fields.len(),
            });
        }

        Ok(FieldPattern {
            regex,
            fields: fields
                .iter()
                .map(|(name, kind)| (name.to_string(), *kind))
                .collect(),
        })
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }
}

pub const MOLECULAR_WEIGHT: &str = "Molecular Weight";
pub const RESIDUES: &str = "Number of Residues";
pub const AVERAGE_RESIDUE_WEIGHT: &str = "Average Residue Weight";
pub const CHARGE: &str = "Charge";
pub const ISOELECTRIC_POINT: &str = "Isoelectric Point";
pub const A280_MOLAR_REDUCED: &str = "A280 Molar Extinction (Reduced)";
pub const A280_MOLAR_CYSTINE: &str = "A280 Molar Extinction (Cystine Bridges)";
pub const A280_1MG_REDUCED: &str = "A280 Extinction 1mg/ml (Reduced)";
pub const A280_1MG_CYSTINE: &str = "A280 Extinction 1mg/ml (Cystine Bridges)";
pub const INCLUSION_BODIES: &str = "Improbability of Expression in Inclusion Bodies";

const TITLE_MARKER: &str = "PEPSTATS of";

/// Parses `pepstats` reports into named physicochemical statistics.
///
/// The built-in fields are read from lines such as:
///
/// ```text
/// PEPSTATS of XP_001.1 from 1 to 148
///
/// Molecular weight = 16837.47        Residues = 148
/// Average Residue Weight  = 113.767  Charge   = -24.0
/// Isoelectric Point = 3.9765
/// A280 Molar Extinction Coefficients  = 2980 (reduced)   2980 (cystine bridges)
/// A280 Extinction Coefficients 1mg/ml = 0.177 (reduced)   0.177 (cystine bridges)
/// Improbability of expression in inclusion bodies = 0.953
/// ```
///
/// Further fields can be added with [`StatsParser::with_pattern`].
pub struct StatsParser {
    patterns: Vec<FieldPattern>,
}

impl StatsParser {
    pub fn new() -> Self {
        use NumberKind::*;

        let builtin: [(&str, &[(&str, NumberKind)]); 7] = [
            (
                r"Molecular weight\s*=\s*(\S+)\s+Residues\s*=\s*(\S+)",
                &[(MOLECULAR_WEIGHT, Float), (RESIDUES, Integer)],
            ),
            (
                r"Average Residue Weight\s*=\s*(\S+)",
                &[(AVERAGE_RESIDUE_WEIGHT, Float)],
            ),
            (r"\bCharge\s*=\s*(\S+)", &[(CHARGE, Float)]),
            (r"Isoelectric Point\s*=\s*(\S+)", &[(ISOELECTRIC_POINT, Float)]),
            (
                r"A280 Molar Extinction Coefficients\s*=\s*(\S+?)\s*\(reduced\)\s*(\S+?)\s*\(cystine bridges\)",
                &[(A280_MOLAR_REDUCED, Integer), (A280_MOLAR_CYSTINE, Integer)],
            ),
            (
                r"A280 Extinction Coefficients 1mg/ml\s*=\s*(\S+?)\s*\(reduced\)\s*(\S+?)\s*\(cystine bridges\)",
                &[(A280_1MG_REDUCED, Float), (A280_1MG_CYSTINE, Float)],
            ),
            (
                r"Improbability of expression in inclusion bodies\s*=\s*(\S+)",
                &[(INCLUSION_BODIES, Float)],
            ),
        ];

        // the built-in patterns are literals with matching group counts
        let patterns = builtin
            .iter()
            .map(|(pattern, fields)| {
                FieldPattern::new(pattern, fields).expect("valid built-in pepstats pattern")
            })
            .collect();

        StatsParser { patterns }
    }

    /// Adds a field pattern, checked after the built-in ones.
    pub fn with_pattern(mut self, pattern: FieldPattern) -> Self {
        self.patterns.push(pattern);
        self
    }
}

impl Default for StatsParser {
    fn default() -> Self {
        Self::new()
    }
}

/// One pattern match on one line.
struct Hit<'t> {
    pattern: usize,
    span: Range<usize>,
    values: Vec<&'t str>,
}

fn overlaps(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}

impl ReportParser for StatsParser {
    fn parse(&self, text: &str, expected: &str) -> ParsedReport {
        let fallback = sanitize_identifier(expected);
        let mut issues = Vec::new();
        let mut attributes = AttributeMap::new();
        let mut poisoned: HashSet<String> = HashSet::new();
        let mut title = None;

        for line in text.lines() {
            if let Some(rest) = line.trim_start().strip_prefix(TITLE_MARKER) {
                // "PEPSTATS of <name> from 1 to 148": the name is the third token of the line
                title.get_or_insert_with(|| {
                    sanitize_identifier(rest.split_whitespace().next().unwrap_or_default())
                });
                continue;
            }

            let hits = self
                .patterns
                .iter()
                .enumerate()
                .flat_map(|(i, p)| {
                    p.regex.captures_iter(line).map(move |c| Hit {
                        pattern: i,
                        span: c.get(0).map(|m| m.range()).unwrap_or_default(),
                        values: c.iter().skip(1).flatten().map(|m| m.as_str()).collect(),
                    })
                })
                .collect::<Vec<_>>();

            // a pattern matching twice, or two patterns claiming the same text, cannot be
            // resolved without guessing
            let mut ambiguous = vec![false; hits.len()];
            for (a, b) in (0..hits.len()).tuple_combinations() {
                if hits[a].pattern == hits[b].pattern || overlaps(&hits[a].span, &hits[b].span) {
                    ambiguous[a] = true;
                    ambiguous[b] = true;
                }
            }

            if ambiguous.iter().any(|x| *x) {
                let names = hits
                    .iter()
                    .zip(&ambiguous)
                    .filter(|(_, amb)| **amb)
                    .flat_map(|(hit, _)| self.patterns[hit.pattern].field_names())
                    .unique()
                    .map(str::to_string)
                    .collect::<Vec<_>>();

                for name in &names {
                    attributes.shift_remove(name);
                    poisoned.insert(name.clone());
                }
                issues.push(ReportError::AmbiguousFieldMatch {
                    identifier: fallback.clone(),
                    fields: names.join(", "),
                    line: line.trim().to_string(),
                });
            }

            for (hit, _) in hits.iter().zip(&ambiguous).filter(|(_, amb)| !**amb) {
                let fields = &self.patterns[hit.pattern].fields;

                for ((name, kind), raw) in fields.iter().zip(&hit.values) {
                    if poisoned.contains(name) {
                        continue;
                    }

                    let Some(value) = kind.parse(raw) else {
                        issues.push(ReportError::NumericParse {
                            identifier: fallback.clone(),
                            field: name.clone(),
                            line: line.trim().to_string(),
                        });
                        continue;
                    };

                    match attributes.get(name) {
                        Some(previous) if *previous != value => {
                            attributes.shift_remove(name);
                            poisoned.insert(name.clone());
                            issues.push(ReportError::AmbiguousFieldMatch {
                                identifier: fallback.clone(),
                                fields: name.clone(),
                                line: line.trim().to_string(),
                            });
                        }
                        Some(_) => {}
                        None => {
                            attributes.insert(name.clone(), value);
                        }
                    }
                }
            }
        }

        let identifier = resolve_identifier(title, expected, TITLE_MARKER, &mut issues);

        ParsedReport {
            identifier,
            attributes,
            issues,
        }
    }

    fn column_order(&self) -> Vec<String> {
        self.patterns
            .iter()
            .flat_map(|p| p.field_names())
            .map(str::to_string)
            .collect()
    }
}
