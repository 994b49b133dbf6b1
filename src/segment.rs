//! Segment classification
//!
//! An ordered rule table maps a recency/frequency score pair to a segment.
//! The first matching rule wins, so rule order is part of the table's
//! meaning. Tables are plain data and can be loaded from JSON.

use crate::error::RfmError;
use crate::types::{RfCode, Score, Segment};
use serde::{Deserialize, Serialize};

/// Inclusive range of scores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRange {
    pub min: u8,
    pub max: u8,
}

impl ScoreRange {
    pub const fn new(min: u8, max: u8) -> Self {
        Self { min, max }
    }

    pub const fn exactly(score: u8) -> Self {
        Self::new(score, score)
    }

    pub fn contains(&self, score: Score) -> bool {
        (self.min..=self.max).contains(&score.get())
    }

    fn is_valid(&self) -> bool {
        self.min >= Score::MIN && self.max <= Score::MAX && self.min <= self.max
    }
}

/// One row of the rule table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRule {
    pub recency: ScoreRange,
    pub frequency: ScoreRange,
    pub segment: Segment,
}

impl SegmentRule {
    pub const fn new(recency: ScoreRange, frequency: ScoreRange, segment: Segment) -> Self {
        Self {
            recency,
            frequency,
            segment,
        }
    }

    pub fn matches(&self, code: &RfCode) -> bool {
        self.recency.contains(code.recency) && self.frequency.contains(code.frequency)
    }
}

const DEFAULT_RULES: [SegmentRule; 10] = [
    SegmentRule::new(ScoreRange::new(1, 2), ScoreRange::new(1, 2), Segment::Hibernating),
    SegmentRule::new(ScoreRange::new(1, 2), ScoreRange::new(3, 4), Segment::AtRisk),
    SegmentRule::new(ScoreRange::new(1, 2), ScoreRange::exactly(5), Segment::CantLoose),
    SegmentRule::new(ScoreRange::exactly(3), ScoreRange::new(1, 2), Segment::AboutToSleep),
    SegmentRule::new(ScoreRange::exactly(3), ScoreRange::exactly(3), Segment::NeedAttention),
    SegmentRule::new(ScoreRange::new(3, 4), ScoreRange::new(4, 5), Segment::LoyalCustomers),
    SegmentRule::new(ScoreRange::exactly(4), ScoreRange::exactly(1), Segment::Promising),
    SegmentRule::new(ScoreRange::exactly(5), ScoreRange::exactly(1), Segment::NewCustomers),
    SegmentRule::new(ScoreRange::new(4, 5), ScoreRange::new(2, 3), Segment::PotentialLoyalists),
    SegmentRule::new(ScoreRange::exactly(5), ScoreRange::new(4, 5), Segment::Champions),
];

/// Ordered, first-match-wins rule table (stage 4 of the pipeline)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRules {
    rules: Vec<SegmentRule>,
}

impl Default for SegmentRules {
    fn default() -> Self {
        Self {
            rules: DEFAULT_RULES.to_vec(),
        }
    }
}

impl SegmentRules {
    /// Build a table, rejecting out-of-range or non-exhaustive rules
    pub fn new(rules: Vec<SegmentRule>) -> Result<Self, RfmError> {
        let table = Self { rules };
        table.validate()?;
        Ok(table)
    }

    pub fn rules(&self) -> &[SegmentRule] {
        &self.rules
    }

    /// Classify a score pair
    pub fn classify(&self, code: &RfCode) -> Result<Segment, RfmError> {
        self.rules
            .iter()
            .find(|rule| rule.matches(code))
            .map(|rule| rule.segment)
            .ok_or_else(|| RfmError::UnmappedSegment(code.to_string()))
    }

    /// Classify a textual rf_code such as `"51"`
    pub fn classify_code(&self, code: &str) -> Result<Segment, RfmError> {
        self.classify(&code.parse()?)
    }

    /// Every rf_code no rule matches
    pub fn unmapped_codes(&self) -> Vec<RfCode> {
        RfCode::all()
            .filter(|code| !self.rules.iter().any(|rule| rule.matches(code)))
            .collect()
    }

    /// Segments in the order they first appear in the table
    pub fn segments(&self) -> Vec<Segment> {
        let mut seen = Vec::new();
        for rule in &self.rules {
            if !seen.contains(&rule.segment) {
                seen.push(rule.segment);
            }
        }
        seen
    }

    pub fn validate(&self) -> Result<(), RfmError> {
        if let Some((idx, _)) = self
            .rules
            .iter()
            .enumerate()
            .find(|(_, rule)| !rule.recency.is_valid() || !rule.frequency.is_valid())
        {
            return Err(RfmError::InvalidRules(format!(
                "rule {} has a score range outside {}..={}",
                idx,
                Score::MIN,
                Score::MAX
            )));
        }

        let unmapped = self.unmapped_codes();
        if !unmapped.is_empty() {
            let codes: Vec<String> = unmapped.iter().map(RfCode::to_string).collect();
            return Err(RfmError::InvalidRules(format!(
                "no rule matches rf_codes {}",
                codes.join(", ")
            )));
        }

        Ok(())
    }

    /// Load a rule table from JSON
    pub fn from_json(json: &str) -> Result<Self, RfmError> {
        let table: SegmentRules = serde_json::from_str(json)?;
        table.validate()?;
        Ok(table)
    }

    /// Serialize the rule table to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
