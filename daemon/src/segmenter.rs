//! Morphological segmentation of hook text.
//!
//! A MeCab pre-processor running inside the hooked process can annotate each
//! line before it reaches us. Annotated lines look like
//! `$今日,名詞,キョウ|は,助詞,ハ|晴れ,名詞,ハレ`: a leading `$`, units split by
//! `|`, and each unit `surface[,part_of_speech[,reading]]`.

use serde::Serialize;

const SEGMENTED_PREFIX: char = '$';
const UNIT_SEPARATOR: char = '|';
const FIELD_SEPARATOR: char = ',';

/// One linguistic unit of a segmented line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pattern {
    pub word: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part_of_speech: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reading: Option<String>,
}

pub type PatternList = Vec<Pattern>;

/// Detects and decomposes a segmented text format.
pub trait Segmenter: Send + Sync {
    fn is_segmented_format(&self, text: &str) -> bool;
    fn to_pattern_list(&self, text: &str) -> PatternList;
    fn pattern_list_to_original_text(&self, patterns: &[Pattern]) -> String;
}

/// Reads the `$surface,pos,reading|...` form described in the module docs.
#[derive(Debug, Default, Clone, Copy)]
pub struct MecabSegmenter;

impl Segmenter for MecabSegmenter {
    fn is_segmented_format(&self, text: &str) -> bool {
        match text.strip_prefix(SEGMENTED_PREFIX) {
            Some(rest) => !rest.is_empty(),
            None => false,
        }
    }

    fn to_pattern_list(&self, text: &str) -> PatternList {
        let body = text.strip_prefix(SEGMENTED_PREFIX).unwrap_or(text);
        body.split(UNIT_SEPARATOR)
            .filter(|unit| !unit.is_empty())
            .map(parse_unit)
            .collect()
    }

    fn pattern_list_to_original_text(&self, patterns: &[Pattern]) -> String {
        patterns.iter().map(|p| p.word.as_str()).collect()
    }
}

fn parse_unit(unit: &str) -> Pattern {
    let mut fields = unit.splitn(3, FIELD_SEPARATOR);
    let word = fields.next().unwrap_or_default().to_string();
    let part_of_speech = fields.next().filter(|s| !s.is_empty()).map(str::to_string);
    let reading = fields.next().filter(|s| !s.is_empty()).map(str::to_string);
    Pattern {
        word,
        part_of_speech,
        reading,
    }
}
