use std::collections::BTreeMap;

use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::*;

/// The interchange document handed to storage and dashboards.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalDocument {
    pub meeting_date: NaiveDate,
    pub city: String,
    pub votes: Vec<CanonicalVote>,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalVote {
    pub agenda_item_number: String,
    #[serde(default)]
    pub agenda_item_title: String,
    pub outcome: Option<Outcome>,
    #[serde(default)]
    pub tally: Tally,
    #[serde(default)]
    pub member_votes: BTreeMap<String, VoteChoice>,
    #[serde(default)]
    pub motion_text: String,
    #[serde(default = "unknown_member")]
    pub mover: String,
    #[serde(default = "unknown_member")]
    pub seconder: String,
    #[serde(default, skip_serializing_if = "MotionType::is_original")]
    pub motion_type: MotionType,
    #[serde(default = "fallback_provenance")]
    pub provenance: Provenance,
    #[serde(default)]
    pub confidence: f64,
}

fn unknown_member() -> String {
    UNKNOWN_MEMBER.to_string()
}

fn fallback_provenance() -> Provenance {
    Provenance::Fallback
}

fn round_confidence(c: f64) -> f64 {
    (c.clamp(0.0, 1.0) * 1000.0).round() / 1000.0
}

/// Serializes final vote sets.
#[derive(Debug, Clone, Default)]
pub struct StandardOutputBuilder {}

impl StandardOutputBuilder {
    pub fn new() -> StandardOutputBuilder {
        StandardOutputBuilder {}
    }

    /// Votes come out in natural item order. The input is not modified.
    pub fn build(&self, meeting: &MeetingMetadata, records: &[VoteRecord]) -> CanonicalDocument {
        let mut sorted: Vec<&VoteRecord> = records.iter().collect();
        sorted.sort_by_key(|r| item_sort_key(r.item_number()));
        let votes: Vec<CanonicalVote> = sorted
            .into_iter()
            .map(|r| CanonicalVote {
                agenda_item_number: r.agenda_item.item_number.clone(),
                agenda_item_title: r.agenda_item.title.clone(),
                outcome: r.outcome,
                tally: r.tally,
                member_votes: r.member_votes.clone(),
                motion_text: r.motion_text.clone(),
                mover: r.mover.clone(),
                seconder: r.seconder.clone(),
                motion_type: r.motion_type,
                provenance: r.provenance,
                confidence: round_confidence(r.confidence),
            })
            .collect();
        debug!("build: {} votes for {} on {}", votes.len(), meeting.city, meeting.meeting_date);
        CanonicalDocument {
            meeting_date: meeting.meeting_date,
            city: meeting.city.clone(),
            votes,
        }
    }
}

impl CanonicalDocument {
    pub fn metadata(&self) -> MeetingMetadata {
        MeetingMetadata {
            city: self.city.clone(),
            meeting_date: self.meeting_date,
        }
    }

    /// Reads the votes back as records, for example to replay a stored
    /// fallback result. Consent ranges and flags are not part of the
    /// document and come back empty.
    pub fn into_records(self) -> Vec<VoteRecord> {
        self.votes
            .into_iter()
            .map(|v| {
                let mut r = VoteRecord::new(
                    AgendaItem::new(&v.agenda_item_number, &v.agenda_item_title),
                    v.outcome,
                    v.tally,
                );
                r.member_votes = v.member_votes;
                r.motion_text = v.motion_text;
                r.mover = v.mover;
                r.seconder = v.seconder;
                r.motion_type = v.motion_type;
                r.provenance = v.provenance;
                r.confidence = v.confidence;
                r
            })
            .collect()
    }
}
