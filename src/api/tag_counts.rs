//! Counting of questions per category name.
//!
//! Questions store their categories inline as a JSON array of names
//! (`["data-structure","stack"]`). A question "uses" a category when the
//! decoded array contains the exact name. Rows whose column does not decode to
//! an array of strings count as untagged.

use crate::tables::QuestionTags;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

pub const CHOICE_QUESTION_TYPE: &str = "CHOICE";

/// Decodes a question's `category` column. Never fails: null, blank and
/// malformed values all yield an empty list.
pub fn parse_tags(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Vec::new();
    };

    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(tags) => tags,
        Err(err) => {
            debug!("Skipping malformed category JSON {:?}: {}", raw, err);
            Vec::new()
        }
    }
}

/// Distinct tags of one row, so a name listed twice still counts once.
fn distinct_tags(raw: Option<&str>) -> BTreeSet<String> {
    parse_tags(raw).into_iter().collect()
}

/// `name -> number of questions` built in a single pass over the rows.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TagCounts {
    counts: HashMap<String, i64>,
}

impl TagCounts {
    pub fn from_rows<'a, I>(rows: I) -> Self
    where
        I: IntoIterator<Item = Option<&'a str>>,
    {
        let mut counts: HashMap<String, i64> = HashMap::new();
        for raw in rows {
            for tag in distinct_tags(raw) {
                *counts.entry(tag).or_default() += 1;
            }
        }
        Self { counts }
    }

    pub fn count(&self, name: &str) -> i64 {
        self.counts.get(name).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// One [`TagCounts`] per subject, so a category is only credited with
/// questions from its own subject.
pub fn counts_by_subject(questions: &[QuestionTags]) -> HashMap<i32, TagCounts> {
    let mut grouped: HashMap<i32, Vec<Option<&str>>> = HashMap::new();
    for question in questions {
        if let Some(subject_id) = question.subject_id {
            grouped
                .entry(subject_id)
                .or_default()
                .push(question.category.as_deref());
        }
    }

    grouped
        .into_iter()
        .map(|(subject_id, rows)| (subject_id, TagCounts::from_rows(rows)))
        .collect()
}

/// Per-name lookup with the same semantics as [`TagCounts`].
pub fn count_tag<'a, I>(rows: I, name: &str) -> i64
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    rows.into_iter()
        .filter(|raw| parse_tags(*raw).iter().any(|tag| tag == name))
        .count() as i64
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TagStat {
    pub category: String,
    pub count: i64,
    pub choice_count: i64,
    pub subjective_count: i64,
}

/// Usage of every tag found in `questions`, split by question type and sorted
/// by tag name.
pub fn tag_stats(questions: &[QuestionTags]) -> Vec<TagStat> {
    let mut stats: BTreeMap<String, TagStat> = BTreeMap::new();

    for question in questions {
        let is_choice = question.question_type == CHOICE_QUESTION_TYPE;
        for tag in distinct_tags(question.category.as_deref()) {
            let stat = stats.entry(tag.clone()).or_insert_with(|| TagStat {
                category: tag,
                count: 0,
                choice_count: 0,
                subjective_count: 0,
            });
            stat.count += 1;
            if is_choice {
                stat.choice_count += 1;
            } else {
                stat.subjective_count += 1;
            }
        }
    }

    stats.into_values().collect()
}

/// Every tag name used by `questions`, deduplicated and sorted.
pub fn tag_names(questions: &[QuestionTags]) -> Vec<String> {
    questions
        .iter()
        .flat_map(|q| parse_tags(q.category.as_deref()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Does the row's tag array contain `name` exactly?
pub fn has_tag(raw: Option<&str>, name: &str) -> bool {
    parse_tags(raw).iter().any(|tag| tag == name)
}

/// A row with no usable tags: null, blank, malformed or an empty array.
pub fn is_untagged(raw: Option<&str>) -> bool {
    parse_tags(raw).is_empty()
}
